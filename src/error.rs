//! Error types for the escrow system
//!
//! Every error names a stable cause so callers can tell "approve more funds
//! and retry" apart from "order already shipped". All operations abort with
//! no partial side effects when they return an error.

use thiserror::Error;

use crate::ledger::LedgerError;
use crate::models::{OrderStatus, ProductId};

/// Main error type for escrow operations
#[derive(Error, Debug)]
pub enum EscrowError {
    /// Caller lacks the required role (owner, or the order's buyer)
    #[error("not authorized for {operation}")]
    Unauthorized { operation: &'static str },

    /// Order is not in the required source status for the transition
    #[error("{operation} not allowed while order is {status:?}")]
    InvalidState {
        operation: &'static str,
        status: OrderStatus,
    },

    /// No order exists for the referenced product id
    #[error("no order for product {0}")]
    OrderNotFound(ProductId),

    /// A non-terminal order already occupies the product slot
    #[error("product {0} already has an outstanding order")]
    OrderOutstanding(ProductId),

    /// Request arguments failed validation
    #[error("validation error: {0}")]
    Validation(String),

    /// Underlying transfer failed
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Internal accounting mismatch; a bug, not a recoverable condition
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Settings loading errors
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl EscrowError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an invariant violation error
    pub fn invariant<S: Into<String>>(msg: S) -> Self {
        Self::InvariantViolation(msg.into())
    }
}
