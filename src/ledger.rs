//! Ledger Adapter - abstracts movement of value between accounts
//!
//! The escrow engine never manipulates balances directly; it requests
//! transfers through the [`Ledger`] trait and observes success or failure.
//! No retries happen here: a failure surfaces synchronously and the caller
//! decides whether the surrounding state transition proceeds.
//!
//! Methods are token-aware because the engine's payment token is
//! owner-mutable and the rescue sweep can target arbitrary tokens.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::{AccountId, TokenId};

/// Transfer failures surfaced by a ledger
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("insufficient allowance: needed {needed}, approved {approved}")]
    InsufficientAllowance { needed: u64, approved: u64 },

    #[error("transfer rejected: {0}")]
    Rejected(String),
}

/// Contract consumed by the escrow engine
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Pull `amount` of `token` from `payer` into `custody`
    ///
    /// Pull-payment semantics: requires a prior allowance from the payer to
    /// the custody account covering at least `amount`.
    async fn transfer_in(
        &self,
        token: &TokenId,
        payer: &AccountId,
        custody: &AccountId,
        amount: u64,
    ) -> Result<(), LedgerError>;

    /// Push `amount` of `token` from `custody` to `recipient`
    async fn transfer_out(
        &self,
        token: &TokenId,
        custody: &AccountId,
        recipient: &AccountId,
        amount: u64,
    ) -> Result<(), LedgerError>;

    /// Read-only balance lookup
    async fn balance_of(&self, token: &TokenId, account: &AccountId) -> u64;
}

#[derive(Default)]
struct LedgerState {
    /// (token, account) -> balance
    balances: HashMap<(TokenId, AccountId), u64>,
    /// (token, owner, spender) -> remaining allowance
    allowances: HashMap<(TokenId, AccountId, AccountId), u64>,
}

/// In-memory multi-token ledger with mint/approve/transfer semantics
///
/// Used by tests and fixtures in place of a real token ledger.
#[derive(Default)]
pub struct InMemoryLedger {
    state: RwLock<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `amount` of `token` to `account` out of thin air
    pub async fn mint(&self, token: &TokenId, account: &AccountId, amount: u64) {
        let mut state = self.state.write().await;
        *state
            .balances
            .entry((token.clone(), account.clone()))
            .or_default() += amount;
    }

    /// Authorize `spender` to pull up to `amount` of `token` from `owner`
    pub async fn approve(
        &self,
        token: &TokenId,
        owner: &AccountId,
        spender: &AccountId,
        amount: u64,
    ) {
        let mut state = self.state.write().await;
        state
            .allowances
            .insert((token.clone(), owner.clone(), spender.clone()), amount);
    }

    /// Remaining allowance from `owner` to `spender`
    pub async fn allowance(&self, token: &TokenId, owner: &AccountId, spender: &AccountId) -> u64 {
        let state = self.state.read().await;
        state
            .allowances
            .get(&(token.clone(), owner.clone(), spender.clone()))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn transfer_in(
        &self,
        token: &TokenId,
        payer: &AccountId,
        custody: &AccountId,
        amount: u64,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.write().await;

        let allowance_key = (token.clone(), payer.clone(), custody.clone());
        let approved = state.allowances.get(&allowance_key).copied().unwrap_or(0);
        if approved < amount {
            return Err(LedgerError::InsufficientAllowance {
                needed: amount,
                approved,
            });
        }

        let payer_key = (token.clone(), payer.clone());
        let available = state.balances.get(&payer_key).copied().unwrap_or(0);
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                needed: amount,
                available,
            });
        }

        state.allowances.insert(allowance_key, approved - amount);
        state.balances.insert(payer_key, available - amount);
        *state
            .balances
            .entry((token.clone(), custody.clone()))
            .or_default() += amount;

        debug!("transfer_in {} {} from {} to {}", amount, token, payer, custody);
        Ok(())
    }

    async fn transfer_out(
        &self,
        token: &TokenId,
        custody: &AccountId,
        recipient: &AccountId,
        amount: u64,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.write().await;

        let custody_key = (token.clone(), custody.clone());
        let available = state.balances.get(&custody_key).copied().unwrap_or(0);
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                needed: amount,
                available,
            });
        }

        state.balances.insert(custody_key, available - amount);
        *state
            .balances
            .entry((token.clone(), recipient.clone()))
            .or_default() += amount;

        debug!("transfer_out {} {} from {} to {}", amount, token, custody, recipient);
        Ok(())
    }

    async fn balance_of(&self, token: &TokenId, account: &AccountId) -> u64 {
        let state = self.state.read().await;
        state
            .balances
            .get(&(token.clone(), account.clone()))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (TokenId, AccountId, AccountId) {
        (
            TokenId::from("tok"),
            AccountId::from("payer"),
            AccountId::from("escrow"),
        )
    }

    #[tokio::test]
    async fn transfer_in_consumes_allowance() {
        let (token, payer, escrow) = ids();
        let ledger = InMemoryLedger::new();
        ledger.mint(&token, &payer, 500).await;
        ledger.approve(&token, &payer, &escrow, 300).await;

        ledger.transfer_in(&token, &payer, &escrow, 200).await.unwrap();

        assert_eq!(ledger.balance_of(&token, &payer).await, 300);
        assert_eq!(ledger.balance_of(&token, &escrow).await, 200);
        assert_eq!(ledger.allowance(&token, &payer, &escrow).await, 100);
    }

    #[tokio::test]
    async fn transfer_in_rejects_without_allowance() {
        let (token, payer, escrow) = ids();
        let ledger = InMemoryLedger::new();
        ledger.mint(&token, &payer, 500).await;

        let err = ledger
            .transfer_in(&token, &payer, &escrow, 200)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientAllowance {
                needed: 200,
                approved: 0
            }
        );
        assert_eq!(ledger.balance_of(&token, &payer).await, 500);
    }

    #[tokio::test]
    async fn transfer_in_rejects_without_funds() {
        let (token, payer, escrow) = ids();
        let ledger = InMemoryLedger::new();
        ledger.mint(&token, &payer, 100).await;
        ledger.approve(&token, &payer, &escrow, 200).await;

        let err = ledger
            .transfer_in(&token, &payer, &escrow, 200)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                needed: 200,
                available: 100
            }
        );
        // allowance untouched on failure
        assert_eq!(ledger.allowance(&token, &payer, &escrow).await, 200);
    }

    #[tokio::test]
    async fn transfer_out_is_bounded_by_balance() {
        let (token, _, escrow) = ids();
        let recipient = AccountId::from("recipient");
        let ledger = InMemoryLedger::new();
        ledger.mint(&token, &escrow, 50).await;

        let err = ledger
            .transfer_out(&token, &escrow, &recipient, 51)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

        ledger.transfer_out(&token, &escrow, &recipient, 50).await.unwrap();
        assert_eq!(ledger.balance_of(&token, &escrow).await, 0);
        assert_eq!(ledger.balance_of(&token, &recipient).await, 50);
    }

    #[tokio::test]
    async fn tokens_are_isolated() {
        let (token, payer, _) = ids();
        let other = TokenId::from("other");
        let ledger = InMemoryLedger::new();
        ledger.mint(&token, &payer, 500).await;

        assert_eq!(ledger.balance_of(&other, &payer).await, 0);
    }
}
