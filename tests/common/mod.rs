//! Shared fixture for the escrow scenarios

#![allow(dead_code)]

use std::sync::Arc;

use product_escrow::{
    AccountId, EscrowConfig, EscrowEngine, FeeRouting, InMemoryLedger, TokenId,
};

pub const FEE_PER_MILLE: u64 = 20;

pub fn owner() -> AccountId {
    AccountId::from("owner")
}

pub fn buyer() -> AccountId {
    AccountId::from("buyer")
}

pub fn receiver() -> AccountId {
    AccountId::from("receiver")
}

pub fn fee_address() -> AccountId {
    AccountId::from("fees")
}

pub fn escrow() -> AccountId {
    AccountId::from("escrow")
}

pub fn token() -> TokenId {
    TokenId::from("token")
}

/// Engine plus ledger handle, with the buyer funded and approved for
/// `funding` of the payment token
pub async fn setup(routing: FeeRouting, funding: u64) -> (Arc<InMemoryLedger>, EscrowEngine) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let ledger = Arc::new(InMemoryLedger::new());
    ledger.mint(&token(), &buyer(), funding).await;
    ledger.approve(&token(), &buyer(), &escrow(), funding).await;

    let config = EscrowConfig {
        owner: owner(),
        payment_token: token(),
        payment_receiver: receiver(),
        fee_address: fee_address(),
        fee_per_mille: FEE_PER_MILLE,
        fee_routing: routing,
    };

    let engine = EscrowEngine::new(config, escrow(), ledger.clone());
    (ledger, engine)
}
