use super::{checked_add, Contract};
use crate::context::TxContext;
use crate::documents::{SystemTotals, UserAccount, SYSTEM_TOTALS_KEY};
use crate::types::{AccountId, ROLE_ATTRIBUTE, USERNAME_ATTRIBUTE};
use crate::{Error, Result};

const DEFAULT_ROLE: &str = "user";

impl Contract {
    /// Create the supply totals document if it does not exist yet
    pub fn initialize(&self, ctx: &mut TxContext<'_>) -> Result<SystemTotals> {
        self.require_issuer(ctx, "initialize the ledger")?;
        if let Some(existing) = ctx.get::<SystemTotals>(SYSTEM_TOTALS_KEY)? {
            return Ok(existing);
        }
        let totals = SystemTotals::default();
        ctx.put(&totals)?;
        tracing::info!(tx_id = %ctx.transaction_id(), "Ledger initialized");
        Ok(totals)
    }

    /// Create the caller's account; an existing account is returned unchanged
    pub fn create_user_account(&self, ctx: &mut TxContext<'_>) -> Result<UserAccount> {
        let identity = ctx.identity();
        let account_id = identity.id().clone();
        account_id.validate()?;

        if let Some(existing) = ctx.get::<UserAccount>(&UserAccount::key_for(&account_id))? {
            return Ok(existing);
        }

        let user_id = identity
            .attribute(USERNAME_ATTRIBUTE)
            .filter(|name| !name.is_empty())
            .unwrap_or(account_id.as_str())
            .to_string();
        let role = identity
            .attribute(ROLE_ATTRIBUTE)
            .filter(|role| !role.is_empty())
            .unwrap_or(DEFAULT_ROLE)
            .to_string();

        let account = UserAccount::new(account_id, user_id, role, ctx.timestamp_str());
        ctx.put(&account)?;

        tracing::info!(account_id = %account.account_id, user_id = %account.user_id, "Account created");
        Ok(account)
    }

    /// Set the caller's active flag, moving its balance in or out of the active supply
    pub fn set_active(&self, ctx: &mut TxContext<'_>, active: bool) -> Result<UserAccount> {
        let caller = ctx.identity().id().clone();
        let mut account = self.load_account(ctx, &caller)?;
        if account.active == active {
            return Ok(account);
        }

        let mut totals = self.load_totals(ctx)?;
        if active {
            totals.total_active_supply = checked_add(totals.total_active_supply, account.balance)?;
        } else {
            totals.total_active_supply = totals
                .total_active_supply
                .checked_sub(account.balance)
                .ok_or(Error::InsufficientSupply {
                    required: account.balance,
                    available: totals.total_active_supply,
                })?;
        }

        account.active = active;
        account.touch(ctx.timestamp_str());
        ctx.put(&account)?;
        ctx.put(&totals)?;
        Ok(account)
    }

    /// Balance of `owner`
    pub fn balance_of(&self, ctx: &TxContext<'_>, owner: &AccountId) -> Result<u64> {
        Ok(self.load_account(ctx, owner)?.balance)
    }

    pub(super) fn load_account(&self, ctx: &TxContext<'_>, account_id: &AccountId) -> Result<UserAccount> {
        ctx.require(&UserAccount::key_for(account_id), || {
            format!("user account {}", account_id)
        })
    }

    /// Supply totals; absent before the first mint
    pub(super) fn load_totals(&self, ctx: &TxContext<'_>) -> Result<SystemTotals> {
        Ok(ctx
            .get::<SystemTotals>(SYSTEM_TOTALS_KEY)?
            .unwrap_or_default())
    }

    /// Add `amount` to an account, keeping the active supply in step
    pub(super) fn credit(
        &self,
        account: &mut UserAccount,
        totals: &mut SystemTotals,
        amount: u64,
    ) -> Result<()> {
        account.balance = checked_add(account.balance, amount)?;
        if account.active {
            totals.total_active_supply = checked_add(totals.total_active_supply, amount)?;
        }
        Ok(())
    }

    /// Remove `amount` from an account, keeping the active supply in step
    pub(super) fn debit(
        &self,
        account: &mut UserAccount,
        totals: &mut SystemTotals,
        amount: u64,
    ) -> Result<()> {
        account.balance = account
            .balance
            .checked_sub(amount)
            .ok_or(Error::InsufficientFunds {
                required: amount,
                available: account.balance,
            })?;
        if account.active {
            totals.total_active_supply = totals
                .total_active_supply
                .checked_sub(amount)
                .ok_or(Error::InsufficientSupply {
                    required: amount,
                    available: totals.total_active_supply,
                })?;
        }
        Ok(())
    }
}
