//! Escrow-mediated product marketplace core
//!
//! A buyer locks funds for a product order, a privileged operator advances
//! the order through a shipping/return lifecycle, and funds are released,
//! refunded, or returned according to the final state. The engine is the
//! sole mutator of order state: it holds third-party value across
//! transitions triggered by mutually distrusting actors, keeps fee
//! accounting exact, and rejects any transition that would double-spend,
//! double-refund, or release funds out of sequence.

pub mod engine;
pub mod error;
pub mod ledger;
pub mod models;
pub mod settings;

pub use engine::EscrowEngine;
pub use error::EscrowError;
pub use ledger::{InMemoryLedger, Ledger, LedgerError};
pub use models::{
    AccountId, EscrowConfig, EscrowEvent, FeeRouting, Order, OrderStatus, ProductId, TokenId,
};

/// Result type alias for escrow operations
pub type EscrowResult<T> = Result<T, EscrowError>;
