mod common;

use common::*;
use product_escrow::{EscrowError, FeeRouting, Ledger, LedgerError, OrderStatus, ProductId};

#[tokio::test]
async fn purchase_escrows_price_plus_fee() {
    let (ledger, engine) = setup(FeeRouting::Split, 1_000).await;

    let order = engine
        .purchase_product(&buyer(), ProductId(1), 100, 2)
        .await
        .unwrap();

    assert_eq!(order.buyer, buyer());
    assert_eq!(order.price, 100);
    assert_eq!(order.quantity, 2);
    assert_eq!(order.fee, 4);
    assert_eq!(order.amount_paid, 204);
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.status.code(), 0);

    assert_eq!(ledger.balance_of(&token(), &escrow()).await, 204);
    assert_eq!(ledger.balance_of(&token(), &buyer()).await, 1_000 - 204);

    let events = engine.events_for(ProductId(1)).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "order.purchased");
    assert_eq!(events[0].amount, Some(204));
}

#[tokio::test]
async fn reads_are_idempotent() {
    let (_, engine) = setup(FeeRouting::Split, 1_000).await;
    engine
        .purchase_product(&buyer(), ProductId(1), 100, 2)
        .await
        .unwrap();

    let first = engine.order(ProductId(1)).await.unwrap();
    let second = engine.order(ProductId(1)).await.unwrap();
    assert_eq!(first.amount_paid, second.amount_paid);
    assert_eq!(first.fee, second.fee);
    assert_eq!(first.status, second.status);
    assert_eq!(engine.total_amount_received().await, engine.total_amount_received().await);
    assert_eq!(engine.fee_percentage().await, FEE_PER_MILLE);
}

#[tokio::test]
async fn purchase_without_allowance_fails_cleanly() {
    let (ledger, engine) = setup(FeeRouting::Split, 1_000).await;
    // exhaust the approval with a first purchase, then try again
    engine
        .purchase_product(&buyer(), ProductId(1), 400, 2)
        .await
        .unwrap();
    engine.cancel_order(&buyer(), ProductId(1)).await.unwrap();

    let err = engine
        .purchase_product(&buyer(), ProductId(1), 400, 2)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EscrowError::Ledger(LedgerError::InsufficientAllowance { .. })
    ));
    // slot still holds the cancelled order, untouched by the failed purchase
    let order = engine.order(ProductId(1)).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(ledger.balance_of(&token(), &escrow()).await, 0);
    assert_eq!(ledger.balance_of(&token(), &fee_address()).await, 16);
}

#[tokio::test]
async fn one_outstanding_order_per_product() {
    let (_, engine) = setup(FeeRouting::Split, 10_000).await;
    engine
        .purchase_product(&buyer(), ProductId(1), 100, 2)
        .await
        .unwrap();

    let err = engine
        .purchase_product(&buyer(), ProductId(1), 100, 2)
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::OrderOutstanding(ProductId(1))));

    // terminal disposition frees the slot
    engine.cancel_order(&buyer(), ProductId(1)).await.unwrap();
    let order = engine
        .purchase_product(&buyer(), ProductId(1), 50, 1)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.amount_paid, 51);
}

#[tokio::test]
async fn purchase_overflow_is_a_validation_error() {
    let (_, engine) = setup(FeeRouting::Split, 1_000).await;
    let err = engine
        .purchase_product(&buyer(), ProductId(1), u64::MAX, 2)
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::Validation(_)));
    assert!(engine.order(ProductId(1)).await.is_err());
}
