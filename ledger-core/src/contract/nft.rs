use super::{derived_id, Contract};
use crate::context::TxContext;
use crate::documents::{Nft, NftTransferEvent};
use crate::types::AccountId;
use crate::{Error, Result};

impl Contract {
    /// Mint a new NFT owned and created by the caller
    pub fn mint_nft(&self, ctx: &mut TxContext<'_>, metadata_json: &str) -> Result<Nft> {
        let metadata = Nft::parse_metadata(metadata_json)?;
        let caller = ctx.identity().id().clone();
        let mut account = self.load_account(ctx, &caller)?;

        let id = derived_id("nft", ctx);
        if ctx.get_raw(&Nft::key_for(&id))?.is_some() {
            return Err(Error::InvalidState(format!("nft {} already exists", id)));
        }

        let nft = Nft {
            id: id.clone(),
            owner: caller.clone(),
            creator: caller.clone(),
            metadata,
            created: ctx.timestamp_str().to_string(),
            last_updated: ctx.timestamp_str().to_string(),
            burned: false,
        };

        account.nfts.insert(id.clone());
        account.touch(ctx.timestamp_str());
        ctx.put(&nft)?;
        ctx.put(&account)?;

        tracing::info!(nft_id = %id, owner = %caller, "NFT minted");
        Ok(nft)
    }

    /// Move an NFT to `to`; `from` defaults to the caller
    pub fn transfer_nft(
        &self,
        ctx: &mut TxContext<'_>,
        from: Option<&AccountId>,
        to: &AccountId,
        nft_id: &str,
    ) -> Result<Nft> {
        let from = match from.filter(|f| !f.as_str().is_empty()) {
            Some(from) => from.clone(),
            None => ctx.identity().id().clone(),
        };
        self.require_self_or_admin(ctx, &from, "transfer NFTs")?;
        if from == *to {
            return Err(Error::SelfTransfer);
        }

        let mut nft = self.load_live_nft(ctx, nft_id)?;
        if nft.owner != from {
            return Err(Error::Unauthorized(format!(
                "nft {} is not owned by {}",
                nft_id, from
            )));
        }

        let mut from_account = self.load_account(ctx, &from)?;
        let mut to_account = self.load_account(ctx, to)?;

        nft.owner = to.clone();
        nft.last_updated = ctx.timestamp_str().to_string();
        from_account.nfts.remove(nft_id);
        to_account.nfts.insert(nft_id.to_string());
        from_account.touch(ctx.timestamp_str());
        to_account.touch(ctx.timestamp_str());

        ctx.put(&nft)?;
        ctx.put(&from_account)?;
        ctx.put(&to_account)?;
        ctx.put(&NftTransferEvent {
            from: from.clone(),
            to: to.clone(),
            nft_id: nft_id.to_string(),
            timestamp: ctx.timestamp_str().to_string(),
        })?;

        tracing::info!(nft_id, from = %from, to = %to, "NFT transferred");
        Ok(nft)
    }

    /// Retire an NFT; owner or admin
    pub fn burn_nft(&self, ctx: &mut TxContext<'_>, nft_id: &str) -> Result<Nft> {
        let mut nft = self.load_live_nft(ctx, nft_id)?;
        self.require_self_or_admin(ctx, &nft.owner, "burn NFTs")?;

        nft.burned = true;
        nft.last_updated = ctx.timestamp_str().to_string();
        let mut account = self.load_account(ctx, &nft.owner)?;
        account.nfts.remove(nft_id);
        account.touch(ctx.timestamp_str());

        ctx.put(&nft)?;
        ctx.put(&account)?;

        tracing::info!(nft_id, owner = %nft.owner, "NFT burned");
        Ok(nft)
    }

    fn load_live_nft(&self, ctx: &TxContext<'_>, nft_id: &str) -> Result<Nft> {
        let nft: Nft = ctx.require(&Nft::key_for(nft_id), || format!("nft {}", nft_id))?;
        if nft.burned {
            return Err(Error::InvalidState(format!("nft {} is burned", nft_id)));
        }
        Ok(nft)
    }
}
