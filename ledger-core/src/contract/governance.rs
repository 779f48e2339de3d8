use super::{checked_add, derived_id, positive_amount, Contract};
use crate::context::TxContext;
use crate::documents::{GovernanceToken, Proposal, ProposalDraft, ProposalStatus, ProposalVote};
use crate::{Error, Result};

impl Contract {
    /// Mint voting weight to the caller
    pub fn mint_governance_token(&self, ctx: &mut TxContext<'_>, amount: i64) -> Result<GovernanceToken> {
        let amount = positive_amount(amount)?;
        let token = GovernanceToken {
            id: derived_id("gov", ctx),
            owner: ctx.identity().id().clone(),
            amount,
            created: ctx.timestamp_str().to_string(),
        };
        ctx.put(&token)?;

        tracing::info!(token_id = %token.id, owner = %token.owner, amount, "Governance token minted");
        Ok(token)
    }

    /// Open a proposal in the Active state
    pub fn create_proposal(&self, ctx: &mut TxContext<'_>, proposal_json: &str) -> Result<Proposal> {
        let draft = ProposalDraft::parse(proposal_json)?;
        let proposal = Proposal {
            id: derived_id("prop", ctx),
            title: draft.title,
            description: draft.description,
            proposer: ctx.identity().id().clone(),
            status: ProposalStatus::Active,
            for_votes: 0,
            against_votes: 0,
            start_block: draft.start_block,
            end_block: draft.end_block,
            created: ctx.timestamp_str().to_string(),
            updated: ctx.timestamp_str().to_string(),
            executed: None,
        };
        ctx.put(&proposal)?;

        tracing::info!(proposal_id = %proposal.id, proposer = %proposal.proposer, "Proposal created");
        Ok(proposal)
    }

    /// Replace the editable fields of a proposal nobody has voted on yet
    pub fn update_proposal(
        &self,
        ctx: &mut TxContext<'_>,
        proposal_id: &str,
        proposal_json: &str,
    ) -> Result<Proposal> {
        let mut proposal = self.load_proposal(ctx, proposal_id)?;
        if proposal.proposer != *ctx.identity().id() {
            return Err(Error::Unauthorized(format!(
                "only {} may update proposal {}",
                proposal.proposer, proposal_id
            )));
        }
        proposal.require_status(ProposalStatus::Active)?;
        if !ctx
            .scan(&ProposalVote::proposal_prefix(proposal_id), None, 1)?
            .is_empty()
        {
            return Err(Error::InvalidState(format!(
                "proposal {} already has votes",
                proposal_id
            )));
        }

        let draft = ProposalDraft::parse(proposal_json)?;
        proposal.title = draft.title;
        proposal.description = draft.description;
        proposal.start_block = draft.start_block;
        proposal.end_block = draft.end_block;
        proposal.updated = ctx.timestamp_str().to_string();
        ctx.put(&proposal)?;

        Ok(proposal)
    }

    /// Cast the full weight of one governance token
    pub fn vote(
        &self,
        ctx: &mut TxContext<'_>,
        proposal_id: &str,
        token_id: &str,
        support: bool,
    ) -> Result<ProposalVote> {
        let voter = ctx.identity().id().clone();
        let token: GovernanceToken = ctx.require(&GovernanceToken::key_for(token_id), || {
            format!("governance token {}", token_id)
        })?;
        if token.owner != voter {
            return Err(Error::Unauthorized(format!(
                "governance token {} is not owned by {}",
                token_id, voter
            )));
        }

        let mut proposal = self.load_proposal(ctx, proposal_id)?;
        proposal.require_status(ProposalStatus::Active)?;

        let vote_key = ProposalVote::key_for(proposal_id, token_id);
        if ctx.get_raw(&vote_key)?.is_some() {
            return Err(Error::AlreadyVoted {
                proposal_id: proposal_id.to_string(),
                token_id: token_id.to_string(),
            });
        }

        if support {
            proposal.for_votes = checked_add(proposal.for_votes, token.amount)?;
        } else {
            proposal.against_votes = checked_add(proposal.against_votes, token.amount)?;
        }
        proposal.updated = ctx.timestamp_str().to_string();

        let vote = ProposalVote {
            proposal_id: proposal_id.to_string(),
            token_id: token_id.to_string(),
            voter: voter.clone(),
            support,
            votes: token.amount,
            created: ctx.timestamp_str().to_string(),
        };
        ctx.put(&vote)?;
        ctx.put(&proposal)?;

        tracing::info!(proposal_id, token_id, voter = %voter, support, votes = token.amount, "Vote cast");
        Ok(vote)
    }

    /// Tally an Active proposal into Passed or Rejected
    pub fn close_proposal(&self, ctx: &mut TxContext<'_>, proposal_id: &str) -> Result<Proposal> {
        self.require_issuer(ctx, "close proposals")?;
        let mut proposal = self.load_proposal(ctx, proposal_id)?;
        proposal.require_status(ProposalStatus::Active)?;

        proposal.status = if proposal.for_votes > proposal.against_votes {
            ProposalStatus::Passed
        } else {
            ProposalStatus::Rejected
        };
        proposal.updated = ctx.timestamp_str().to_string();
        ctx.put(&proposal)?;

        tracing::info!(
            proposal_id,
            status = ?proposal.status,
            for_votes = proposal.for_votes,
            against_votes = proposal.against_votes,
            "Proposal closed"
        );
        Ok(proposal)
    }

    /// Mark a Passed proposal executed
    pub fn execute_proposal(&self, ctx: &mut TxContext<'_>, proposal_id: &str) -> Result<Proposal> {
        self.require_issuer(ctx, "execute proposals")?;
        let mut proposal = self.load_proposal(ctx, proposal_id)?;
        proposal.require_status(ProposalStatus::Passed)?;

        proposal.status = ProposalStatus::Executed;
        proposal.updated = ctx.timestamp_str().to_string();
        proposal.executed = Some(ctx.timestamp_str().to_string());
        ctx.put(&proposal)?;

        tracing::info!(proposal_id, "Proposal executed");
        Ok(proposal)
    }

    fn load_proposal(&self, ctx: &TxContext<'_>, proposal_id: &str) -> Result<Proposal> {
        ctx.require(&Proposal::key_for(proposal_id), || {
            format!("proposal {}", proposal_id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;
    use super::super::{Operation, OperationOutput};
    use crate::documents::{GovernanceToken, Proposal, ProposalStatus};
    use crate::Error;

    fn token(h: &mut Harness, who: &str, amount: i64) -> GovernanceToken {
        match h
            .execute(&Harness::outsider(who), Operation::MintGovernanceToken { amount })
            .unwrap()
        {
            OperationOutput::GovernanceToken(t) => t,
            other => panic!("unexpected output {:?}", other),
        }
    }

    fn proposal(h: &mut Harness, who: &str) -> Proposal {
        match h
            .execute(
                &Harness::outsider(who),
                Operation::CreateProposal {
                    proposal_json: r#"{"title":"Raise cap","description":"More coins","startBlock":1,"endBlock":10}"#.into(),
                },
            )
            .unwrap()
        {
            OperationOutput::Proposal(p) => p,
            other => panic!("unexpected output {:?}", other),
        }
    }

    fn vote(h: &mut Harness, who: &str, proposal_id: &str, token_id: &str, support: bool) -> crate::Result<OperationOutput> {
        h.execute(
            &Harness::outsider(who),
            Operation::Vote {
                proposal_id: proposal_id.into(),
                token_id: token_id.into(),
                support,
            },
        )
    }

    fn close(h: &mut Harness, proposal_id: &str) -> Proposal {
        match h
            .execute(
                &Harness::issuer("root"),
                Operation::CloseProposal {
                    proposal_id: proposal_id.into(),
                },
            )
            .unwrap()
        {
            OperationOutput::Proposal(p) => p,
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_votes_are_weighted_and_tallied() {
        let mut h = Harness::new();
        let p = proposal(&mut h, "carol");
        assert_eq!(p.status, ProposalStatus::Active);
        assert!(p.id.starts_with("prop_"));

        let heavy = token(&mut h, "alice", 5);
        let light = token(&mut h, "bob", 3);
        vote(&mut h, "alice", &p.id, &heavy.id, true).unwrap();
        vote(&mut h, "bob", &p.id, &light.id, false).unwrap();

        let closed = close(&mut h, &p.id);
        assert_eq!(closed.for_votes, 5);
        assert_eq!(closed.against_votes, 3);
        assert_eq!(closed.status, ProposalStatus::Passed);

        let executed = match h
            .execute(
                &Harness::issuer("root"),
                Operation::ExecuteProposal {
                    proposal_id: p.id.clone(),
                },
            )
            .unwrap()
        {
            OperationOutput::Proposal(p) => p,
            other => panic!("unexpected output {:?}", other),
        };
        assert_eq!(executed.status, ProposalStatus::Executed);
        assert!(executed.executed.is_some());
    }

    #[test]
    fn test_tie_is_rejected_and_cannot_execute() {
        let mut h = Harness::new();
        let p = proposal(&mut h, "carol");
        let a = token(&mut h, "alice", 2);
        let b = token(&mut h, "bob", 2);
        vote(&mut h, "alice", &p.id, &a.id, true).unwrap();
        vote(&mut h, "bob", &p.id, &b.id, false).unwrap();
        assert_eq!(close(&mut h, &p.id).status, ProposalStatus::Rejected);

        let err = h
            .execute(
                &Harness::issuer("root"),
                Operation::ExecuteProposal { proposal_id: p.id },
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_vote_rules() {
        let mut h = Harness::new();
        let p = proposal(&mut h, "carol");
        let t = token(&mut h, "alice", 4);

        assert!(matches!(
            vote(&mut h, "bob", &p.id, &t.id, true),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            vote(&mut h, "alice", &p.id, "gov_missing", true),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            vote(&mut h, "alice", "prop_missing", &t.id, true),
            Err(Error::NotFound(_))
        ));

        vote(&mut h, "alice", &p.id, &t.id, true).unwrap();
        assert!(matches!(
            vote(&mut h, "alice", &p.id, &t.id, false),
            Err(Error::AlreadyVoted { .. })
        ));

        close(&mut h, &p.id);
        let late = token(&mut h, "alice", 1);
        assert!(matches!(
            vote(&mut h, "alice", &p.id, &late.id, true),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_update_proposal_before_votes_only() {
        let mut h = Harness::new();
        let p = proposal(&mut h, "carol");
        let update = |json: &str| Operation::UpdateProposal {
            proposal_id: p.id.clone(),
            proposal_json: json.into(),
        };

        assert!(matches!(
            h.execute(&Harness::outsider("mallory"), update(r#"{"title":"Mine"}"#)),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            h.execute(&Harness::outsider("carol"), update(r#"{"title":""}"#)),
            Err(Error::Validation(_))
        ));

        let updated = h
            .execute(&Harness::outsider("carol"), update(r#"{"title":"Lower cap","endBlock":3}"#))
            .unwrap();
        assert!(matches!(updated, OperationOutput::Proposal(ref u) if u.title == "Lower cap" && u.end_block == 3));

        let t = token(&mut h, "alice", 1);
        vote(&mut h, "alice", &p.id, &t.id, true).unwrap();
        assert!(matches!(
            h.execute(&Harness::outsider("carol"), update(r#"{"title":"Again"}"#)),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_close_and_execute_require_issuer() {
        let mut h = Harness::new();
        let p = proposal(&mut h, "carol");
        let err = h
            .execute(
                &Harness::outsider("carol"),
                Operation::CloseProposal {
                    proposal_id: p.id.clone(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));

        assert!(matches!(
            h.execute(&Harness::outsider("alice"), Operation::MintGovernanceToken { amount: 0 }),
            Err(Error::InvalidAmount(0))
        ));
    }
}
