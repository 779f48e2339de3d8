use super::Contract;
use crate::context::TxContext;
use crate::documents::{CoinTransferEvent, LedgerDocument, UserAccount};
use crate::types::{AccountId, DateRange};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Minted supply over a date range
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplySummary {
    /// Σ of mint amounts
    pub total_supply: u64,
    /// Σ of mint amounts whose recipient is active
    pub total_active_supply: u64,
}

/// Minted and used amounts of active accounts over a date range
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    /// Σ of mints to active accounts
    pub total_minted: u64,
    /// Σ of burns from active accounts
    pub total_used: u64,
}

impl Contract {
    /// Supply minted within `range`
    pub fn total_supply(&self, ctx: &TxContext<'_>, range: &DateRange) -> Result<SupplySummary> {
        let mut summary = SupplySummary::default();
        let mut active = ActiveCache::default();

        self.for_each_transfer(ctx, range, |event| {
            if event.is_mint() {
                summary.total_supply = summary.total_supply.saturating_add(event.amount);
                if active.is_active(ctx, &event.to)? {
                    summary.total_active_supply =
                        summary.total_active_supply.saturating_add(event.amount);
                }
            }
            Ok(())
        })?;

        Ok(summary)
    }

    /// Minted and used amounts of active accounts within `range`
    pub fn summary(&self, ctx: &TxContext<'_>, range: &DateRange) -> Result<UsageSummary> {
        let mut summary = UsageSummary::default();
        let mut active = ActiveCache::default();

        self.for_each_transfer(ctx, range, |event| {
            if event.is_mint() && active.is_active(ctx, &event.to)? {
                summary.total_minted = summary.total_minted.saturating_add(event.amount);
            } else if event.is_burn() && active.is_active(ctx, &event.from)? {
                summary.total_used = summary.total_used.saturating_add(event.amount);
            }
            Ok(())
        })?;

        Ok(summary)
    }

    /// Page through the transfer history, visiting events inside `range`
    fn for_each_transfer(
        &self,
        ctx: &TxContext<'_>,
        range: &DateRange,
        mut visit: impl FnMut(&CoinTransferEvent) -> Result<()>,
    ) -> Result<()> {
        let prefix = CoinTransferEvent::prefix();
        let mut bookmark: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = ctx.scan(&prefix, bookmark.as_deref(), self.page_size)?;
            let Some((last_key, _)) = page.last() else {
                break;
            };
            bookmark = Some(last_key.clone());
            pages += 1;

            for (_, bytes) in &page {
                let event = CoinTransferEvent::from_json(bytes)?;
                if range.contains(&event.timestamp) {
                    visit(&event)?;
                }
            }
        }

        tracing::debug!(pages, page_size = self.page_size, "Scanned transfer history");
        Ok(())
    }
}

/// Active flags looked up once per account
#[derive(Default)]
struct ActiveCache {
    flags: HashMap<AccountId, bool>,
}

impl ActiveCache {
    fn is_active(&mut self, ctx: &TxContext<'_>, account_id: &AccountId) -> Result<bool> {
        if let Some(active) = self.flags.get(account_id) {
            return Ok(*active);
        }
        let active = match ctx.get::<UserAccount>(&UserAccount::key_for(account_id))? {
            Some(account) => account.active,
            None => {
                tracing::warn!(account_id = %account_id, "Account in transfer history not found, counted as inactive");
                false
            }
        };
        self.flags.insert(account_id.clone(), active);
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;
    use super::super::{Operation, Query, QueryOutput};
    use super::{SupplySummary, UsageSummary};
    use crate::Config;

    fn range(start: Option<&str>, end: Option<&str>) -> (Option<String>, Option<String>) {
        (start.map(String::from), end.map(String::from))
    }

    fn supply(h: &Harness, start: Option<&str>, end: Option<&str>) -> SupplySummary {
        let (start_date, end_date) = range(start, end);
        match h
            .evaluate(&Harness::issuer("q"), Query::TotalSupply { start_date, end_date })
            .unwrap()
        {
            QueryOutput::Supply(s) => s,
            other => panic!("unexpected output {:?}", other),
        }
    }

    fn usage(h: &Harness, start: Option<&str>, end: Option<&str>) -> UsageSummary {
        let (start_date, end_date) = range(start, end);
        match h
            .evaluate(&Harness::issuer("q"), Query::Summary { start_date, end_date })
            .unwrap()
        {
            QueryOutput::Usage(u) => u,
            other => panic!("unexpected output {:?}", other),
        }
    }

    /// alice (active) mints 100 and burns 30; bob (inactive) mints 50; a
    /// transfer alice -> bob is neither mint nor use
    fn populated(page_size: usize) -> Harness {
        let mut h = Harness::with_config(Config {
            query_page_size: page_size,
            ..Config::default()
        });
        let alice = Harness::issuer("alice");
        let bob = Harness::issuer("bob");
        h.enroll(&alice);
        h.enroll(&bob);
        h.execute(&alice, Operation::SetActive { active: true }).unwrap();
        h.execute(&alice, Operation::Mint { amount: 100, days: 0 }).unwrap();
        h.execute(&alice, Operation::Mint { amount: 30, days: 5 }).unwrap();
        h.execute(&bob, Operation::Mint { amount: 50, days: 0 }).unwrap();
        h.execute(
            &alice,
            Operation::Transfer {
                to: "bob".into(),
                amount: 10,
            },
        )
        .unwrap();
        h.execute(
            &alice,
            Operation::BurnExpired {
                owner: "alice".into(),
                expiration_date: "2022-01-06".into(),
            },
        )
        .unwrap();
        h
    }

    #[test]
    fn test_total_supply_counts_mints() {
        let h = populated(100);
        assert_eq!(
            supply(&h, None, None),
            SupplySummary {
                total_supply: 180,
                total_active_supply: 130,
            }
        );
    }

    #[test]
    fn test_summary_counts_active_accounts_only() {
        let h = populated(100);
        assert_eq!(
            usage(&h, None, None),
            UsageSummary {
                total_minted: 130,
                total_used: 20,
            }
        );
    }

    #[test]
    fn test_small_pages_give_same_result() {
        let full = populated(100);
        let paged = populated(1);
        assert_eq!(supply(&full, None, None), supply(&paged, None, None));
        assert_eq!(usage(&full, None, None), usage(&paged, None, None));
    }

    #[test]
    fn test_date_filters() {
        let h = populated(2);
        assert_eq!(supply(&h, Some("2022-01-02"), None), SupplySummary::default());
        assert_eq!(supply(&h, None, Some("2021-12-31")), SupplySummary::default());
        // A plain end date covers the whole day
        assert_eq!(supply(&h, Some("2022-01-01"), Some("2022-01-01")).total_supply, 180);
        // Mints happen at 09:00:04, 09:00:05 and 09:00:06
        let partial = supply(&h, Some("2022-01-01T09:00:05Z"), Some("2022-01-01T09:00:06Z"));
        assert_eq!(partial.total_supply, 80);
    }

    #[test]
    fn test_invalid_range_rejected() {
        let h = populated(100);
        let err = h
            .evaluate(
                &Harness::issuer("q"),
                Query::TotalSupply {
                    start_date: Some("2022-02-01".into()),
                    end_date: Some("2022-01-01".into()),
                },
            )
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_empty_history() {
        let h = Harness::new();
        assert_eq!(supply(&h, None, None), SupplySummary::default());
        assert_eq!(usage(&h, None, None), UsageSummary::default());
    }
}
