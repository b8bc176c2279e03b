//! Core data models for the escrow system
//!
//! Order records, the order status state machine, the injected engine
//! configuration, and the audit-trail event type.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account reference on the external ledger
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Reference to a fungible token on the external ledger
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(String);

impl TokenId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TokenId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Product identifier; orders are keyed one-per-product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub u64);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Order status state machine enum
///
/// Wire codes keep gaps at 1 and 3 for compatibility with the historical
/// numbering; only the five reachable states exist as variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Funds escrowed, awaiting shipment or cancellation
    Pending,
    /// Shipped and paid out; buyer may still start a return
    Shipped,
    /// Cancelled by the buyer before shipment, funds refunded less fee
    Cancelled,
    /// Return announced by the buyer, awaiting operator receipt
    Returned,
    /// Return received by the operator, funds refunded less fee
    ReturnedReceived,
}

impl OrderStatus {
    /// Numeric wire code for this status
    pub fn code(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Shipped => 2,
            Self::Cancelled => 4,
            Self::Returned => 5,
            Self::ReturnedReceived => 6,
        }
    }

    /// Check if this is a terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::ReturnedReceived)
    }

    /// Check if this state allows shipment
    pub fn can_ship(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Check if this state allows buyer cancellation
    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Check if this state allows the buyer to start a return
    pub fn can_return(&self) -> bool {
        matches!(self, Self::Shipped)
    }

    /// Check if this state allows the operator to receive a return
    pub fn can_receive_return(&self) -> bool {
        matches!(self, Self::Returned)
    }
}

/// Fee disposition policy
///
/// The fee is computed once at purchase time and is never refunded to the
/// buyer on any path; this policy decides where it ends up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeRouting {
    /// Fee goes to the fee address at the order's first exit (shipment or
    /// cancellation); the payment receiver gets the net price on shipment
    #[default]
    Split,
    /// Legacy behavior: the full amount paid (fee included) is forwarded to
    /// the payment receiver on shipment; on cancellation or return the fee
    /// simply stays in escrow custody
    Retain,
}

/// Compute the escrow fee for a subtotal, in parts-per-thousand
///
/// Returns `None` when the result does not fit in a u64.
pub fn fee_for(subtotal: u64, fee_per_mille: u64) -> Option<u64> {
    u64::try_from(u128::from(subtotal) * u128::from(fee_per_mille) / 1000).ok()
}

/// Order record held in the escrow table
///
/// All fields except `status` and `updated_at` are immutable after
/// creation. `amount_paid == price * quantity + fee` for the order's entire
/// life, by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub product_id: ProductId,
    pub buyer: AccountId,
    pub price: u64,
    pub quantity: u64,
    pub fee: u64,
    pub amount_paid: u64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create a pending order, computing fee and amount paid
    ///
    /// Returns `None` when the amounts overflow a u64.
    pub fn new(
        product_id: ProductId,
        buyer: AccountId,
        price: u64,
        quantity: u64,
        fee_per_mille: u64,
    ) -> Option<Self> {
        let subtotal = price.checked_mul(quantity)?;
        let fee = fee_for(subtotal, fee_per_mille)?;
        let amount_paid = subtotal.checked_add(fee)?;
        let now = Utc::now();

        Some(Self {
            product_id,
            buyer,
            price,
            quantity,
            fee,
            amount_paid,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        })
    }

    /// The price portion of the amount paid, excluding the fee
    pub fn subtotal(&self) -> u64 {
        self.amount_paid - self.fee
    }
}

/// Engine configuration: the global roles and fee policy
///
/// Injected at construction and updated only through the engine's
/// owner-gated setters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowConfig {
    /// Privileged operator account
    pub owner: AccountId,
    /// Token used for all order transfers
    pub payment_token: TokenId,
    /// Account credited on successful shipment
    pub payment_receiver: AccountId,
    /// Account credited with fees
    pub fee_address: AccountId,
    /// Fee rate in parts-per-thousand
    pub fee_per_mille: u64,
    /// Fee disposition policy
    pub fee_routing: FeeRouting,
}

/// Escrow event for the audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowEvent {
    pub event_type: String,
    pub product_id: Option<ProductId>,
    pub actor: Option<AccountId>,
    pub amount: Option<u64>,
    pub status: Option<OrderStatus>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
