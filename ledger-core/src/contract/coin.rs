use super::{checked_add, positive_amount, BurnOutcome, Contract};
use crate::context::TxContext;
use crate::documents::{Coin, CoinTransferEvent};
use crate::types::{parse_date, AccountId};
use crate::{Error, Result};
use chrono::Days;

impl Contract {
    /// Mint `amount` coins to the caller, expiring `days` after the transaction date
    pub fn mint(&self, ctx: &mut TxContext<'_>, amount: i64, days: i64) -> Result<Coin> {
        self.require_issuer(ctx, "mint new tokens")?;
        let amount = positive_amount(amount)?;
        if days < 0 {
            return Err(Error::InvalidDays(days));
        }

        let expiration_date = if days > 0 {
            let date = ctx
                .timestamp()
                .date_naive()
                .checked_add_days(Days::new(days as u64))
                .ok_or(Error::InvalidDays(days))?;
            Some(date)
        } else {
            None
        };

        let minter = ctx.identity().id().clone();
        let mut account = self.load_account(ctx, &minter)?;
        let mut totals = self.load_totals(ctx)?;

        let key = Coin::key_for(&minter, expiration_date);
        let coin = match ctx.get::<Coin>(&key)? {
            Some(mut existing) if !existing.burned => {
                existing.amount = checked_add(existing.amount, amount)?;
                existing
            }
            // A burned bucket at this key is history; minting starts a fresh one
            _ => Coin::new(minter.clone(), amount, expiration_date),
        };

        self.credit(&mut account, &mut totals, amount)?;
        totals.total_supply = checked_add(totals.total_supply, amount)?;
        account.touch(ctx.timestamp_str());

        ctx.put(&coin)?;
        ctx.put(&account)?;
        ctx.put(&totals)?;
        ctx.put(&CoinTransferEvent {
            from: AccountId::system(),
            to: minter.clone(),
            amount,
            expiration_date,
            timestamp: ctx.timestamp_str().to_string(),
        })?;

        tracing::info!(
            minter = %minter,
            amount,
            expiration_date = ?expiration_date,
            "Coins minted"
        );

        Ok(coin)
    }

    /// Transfer from the caller to `to`
    pub fn transfer(&self, ctx: &mut TxContext<'_>, to: &AccountId, amount: i64) -> Result<CoinTransferEvent> {
        let from = ctx.identity().id().clone();
        self.transfer_from(ctx, &from, to, amount)
    }

    /// Transfer from `from` to `to`, spending the earliest-expiring buckets first
    pub fn transfer_from(
        &self,
        ctx: &mut TxContext<'_>,
        from: &AccountId,
        to: &AccountId,
        amount: i64,
    ) -> Result<CoinTransferEvent> {
        self.require_self_or_admin(ctx, from, "transfer")?;
        if from == to {
            return Err(Error::SelfTransfer);
        }
        let amount = positive_amount(amount)?;

        let mut from_account = self.load_account(ctx, from)?;
        if from_account.balance < amount {
            return Err(Error::InsufficientFunds {
                required: amount,
                available: from_account.balance,
            });
        }
        let mut to_account = self.load_account(ctx, to)?;
        let mut totals = self.load_totals(ctx)?;

        let mut buckets: Vec<Coin> = ctx
            .scan_all::<Coin>(&Coin::owner_prefix(from))?
            .into_iter()
            .filter(|coin| !coin.burned && coin.owner == *from)
            .collect();
        buckets.sort_by(Coin::spend_order);

        let mut remaining = amount;
        for bucket in buckets {
            if remaining == 0 {
                break;
            }
            remaining = self.move_bucket(ctx, bucket, to, remaining)?;
        }
        if remaining > 0 {
            return Err(Error::InvariantViolation(format!(
                "balance of {} covers {} but buckets are short by {}",
                from, amount, remaining
            )));
        }

        self.debit(&mut from_account, &mut totals, amount)?;
        self.credit(&mut to_account, &mut totals, amount)?;
        from_account.touch(ctx.timestamp_str());
        to_account.touch(ctx.timestamp_str());

        let event = CoinTransferEvent {
            from: from.clone(),
            to: to.clone(),
            amount,
            expiration_date: None,
            timestamp: ctx.timestamp_str().to_string(),
        };

        ctx.put(&from_account)?;
        ctx.put(&to_account)?;
        ctx.put(&totals)?;
        ctx.put(&event)?;

        tracing::info!(from = %from, to = %to, amount, "Coins transferred");
        Ok(event)
    }

    /// Move up to `need` out of `bucket` into the recipient's bucket with the
    /// same expiration. Returns what is still needed.
    fn move_bucket(
        &self,
        ctx: &mut TxContext<'_>,
        mut bucket: Coin,
        to: &AccountId,
        need: u64,
    ) -> Result<u64> {
        let moved = need.min(bucket.amount);

        let target_key = Coin::key_for(to, bucket.expiration_date);
        let mut target = match ctx.get::<Coin>(&target_key)? {
            Some(existing) if !existing.burned => existing,
            _ => Coin::new(to.clone(), 0, bucket.expiration_date),
        };
        target.amount = checked_add(target.amount, moved)?;

        if moved == bucket.amount {
            ctx.delete(&bucket.key());
        } else {
            bucket.amount -= moved;
            ctx.put(&bucket)?;
        }
        ctx.put(&target)?;

        Ok(need - moved)
    }

    /// Burn the bucket of `owner` expiring on `expiration_date`
    pub fn burn_expired(
        &self,
        ctx: &mut TxContext<'_>,
        owner: &AccountId,
        expiration_date: &str,
    ) -> Result<BurnOutcome> {
        self.require_issuer(ctx, "burn tokens")?;
        let date = parse_date(expiration_date)?;

        let key = Coin::key_for(owner, Some(date));
        let mut coin: Coin = ctx.require(&key, || {
            format!("coin of {} expiring {}", owner, expiration_date)
        })?;
        if coin.burned {
            tracing::debug!(owner = %owner, expiration_date, "Coin already burned");
            return Ok(BurnOutcome::AlreadyBurned(coin));
        }

        let mut account = self.load_account(ctx, owner)?;
        if account.balance < coin.amount {
            return Err(Error::InsufficientFunds {
                required: coin.amount,
                available: account.balance,
            });
        }
        let mut totals = self.load_totals(ctx)?;
        if totals.total_supply < coin.amount {
            return Err(Error::InsufficientSupply {
                required: coin.amount,
                available: totals.total_supply,
            });
        }

        self.debit(&mut account, &mut totals, coin.amount)?;
        totals.total_supply -= coin.amount;
        account.touch(ctx.timestamp_str());
        coin.burned = true;

        ctx.put(&coin)?;
        ctx.put(&account)?;
        ctx.put(&totals)?;
        ctx.put(&CoinTransferEvent {
            from: owner.clone(),
            to: AccountId::system(),
            amount: coin.amount,
            expiration_date: Some(date),
            timestamp: ctx.timestamp_str().to_string(),
        })?;

        tracing::info!(owner = %owner, amount = coin.amount, expiration_date, "Coins burned");
        Ok(BurnOutcome::Burned(coin))
    }
}
