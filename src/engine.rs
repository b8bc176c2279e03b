//! Escrow Engine - the order table and its admissible-transition logic
//!
//! The engine is the sole mutator of order state. Each operation is atomic
//! per order key: the ledger call(s) and the order-state mutation happen
//! inside one per-product critical section, and a failed ledger call aborts
//! the whole transition before any order mutation. Cross-order operations
//! run concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::EscrowError;
use crate::ledger::{Ledger, LedgerError};
use crate::models::{
    AccountId, EscrowConfig, EscrowEvent, FeeRouting, Order, OrderStatus, ProductId, TokenId,
};
use crate::EscrowResult;

/// Main escrow engine owning the order table and fund custody
pub struct EscrowEngine {
    /// Global roles and fee policy, updated only through owner-gated setters
    config: RwLock<EscrowConfig>,
    /// Ledger account holding escrowed funds
    custody: AccountId,
    /// External value-transfer mechanism
    ledger: Arc<dyn Ledger>,
    /// Order table, one slot per product id; orders are never deleted
    orders: RwLock<HashMap<ProductId, Order>>,
    /// Per-product transition locks
    order_locks: Mutex<HashMap<ProductId, Arc<Mutex<()>>>>,
    /// Sum of amount_paid over all orders that ever reached Shipped
    total_amount_received: RwLock<u64>,
    /// Append-only audit trail
    events: RwLock<Vec<EscrowEvent>>,
}

impl EscrowEngine {
    /// Create a new engine with the given configuration and custody account
    pub fn new(config: EscrowConfig, custody: AccountId, ledger: Arc<dyn Ledger>) -> Self {
        info!("Initializing escrow engine with custody account {}", custody);

        Self {
            config: RwLock::new(config),
            custody,
            ledger,
            orders: RwLock::new(HashMap::new()),
            order_locks: Mutex::new(HashMap::new()),
            total_amount_received: RwLock::new(0),
            events: RwLock::new(Vec::new()),
        }
    }

    /// Lock serializing every state-changing operation on one product id
    async fn order_lock(&self, product_id: ProductId) -> Arc<Mutex<()>> {
        let mut locks = self.order_locks.lock().await;
        locks
            .entry(product_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Purchase a product, escrowing `price * quantity` plus the fee
    ///
    /// Requires a prior ledger allowance from the buyer to the custody
    /// account covering the full amount. One outstanding order per product:
    /// a purchase is rejected while a non-terminal order occupies the slot.
    pub async fn purchase_product(
        &self,
        caller: &AccountId,
        product_id: ProductId,
        price: u64,
        quantity: u64,
    ) -> EscrowResult<Order> {
        if quantity == 0 {
            return Err(EscrowError::validation("quantity must be greater than 0"));
        }

        let lock = self.order_lock(product_id).await;
        let _guard = lock.lock().await;

        if let Some(existing) = self.orders.read().await.get(&product_id) {
            if !existing.status.is_terminal() {
                return Err(EscrowError::OrderOutstanding(product_id));
            }
        }

        let (token, fee_per_mille) = {
            let config = self.config.read().await;
            (config.payment_token.clone(), config.fee_per_mille)
        };

        let order = Order::new(product_id, caller.clone(), price, quantity, fee_per_mille)
            .ok_or_else(|| EscrowError::validation("order amount overflows"))?;

        self.ledger
            .transfer_in(&token, caller, &self.custody, order.amount_paid)
            .await?;

        self.orders.write().await.insert(product_id, order.clone());

        info!(
            "Purchased product {} for {} (fee {}) by {}",
            product_id, order.amount_paid, order.fee, caller
        );
        self.record_event(
            "order.purchased",
            Some(product_id),
            Some(caller),
            Some(order.amount_paid),
            Some(order.status),
            Some(serde_json::json!({
                "price": price,
                "quantity": quantity,
                "fee": order.fee,
            })),
        )
        .await;

        Ok(order)
    }

    /// Ship a pending order, paying out the escrowed funds (owner only)
    pub async fn ship_product(
        &self,
        caller: &AccountId,
        product_id: ProductId,
    ) -> EscrowResult<Order> {
        let lock = self.order_lock(product_id).await;
        let _guard = lock.lock().await;

        let config = self.authorized_config(caller, "ship_product").await?;
        let order = self.order(product_id).await?;
        if !order.status.can_ship() {
            return Err(EscrowError::InvalidState {
                operation: "ship_product",
                status: order.status,
            });
        }

        match config.fee_routing {
            FeeRouting::Retain => {
                self.ledger
                    .transfer_out(
                        &config.payment_token,
                        &self.custody,
                        &config.payment_receiver,
                        order.amount_paid,
                    )
                    .await?;
            }
            FeeRouting::Split => {
                self.split_payout(&config, &config.payment_receiver, order.subtotal(), order.fee)
                    .await?;
            }
        }

        let order = self.advance(product_id, OrderStatus::Shipped).await?;
        *self.total_amount_received.write().await += order.amount_paid;

        info!(
            "Shipped product {}; {} released to {}",
            product_id, order.amount_paid, config.payment_receiver
        );
        self.record_event(
            "order.shipped",
            Some(product_id),
            Some(caller),
            Some(order.amount_paid),
            Some(order.status),
            None,
        )
        .await;

        Ok(order)
    }

    /// Cancel a pending order, refunding the buyer less the fee
    ///
    /// Only the order's buyer may cancel; the fee is never refunded.
    pub async fn cancel_order(
        &self,
        caller: &AccountId,
        product_id: ProductId,
    ) -> EscrowResult<Order> {
        let lock = self.order_lock(product_id).await;
        let _guard = lock.lock().await;

        let config = self.config.read().await.clone();
        let order = self.order(product_id).await?;
        if order.buyer != *caller {
            return Err(EscrowError::Unauthorized {
                operation: "cancel_order",
            });
        }
        if !order.status.can_cancel() {
            return Err(EscrowError::InvalidState {
                operation: "cancel_order",
                status: order.status,
            });
        }

        let refund = order.subtotal();
        match config.fee_routing {
            FeeRouting::Retain => {
                self.ledger
                    .transfer_out(&config.payment_token, &self.custody, &order.buyer, refund)
                    .await?;
            }
            FeeRouting::Split => {
                self.split_payout(&config, &order.buyer, refund, order.fee).await?;
            }
        }

        let order = self.advance(product_id, OrderStatus::Cancelled).await?;

        info!("Cancelled order for product {}; refunded {}", product_id, refund);
        self.record_event(
            "order.cancelled",
            Some(product_id),
            Some(caller),
            Some(refund),
            Some(order.status),
            None,
        )
        .await;

        Ok(order)
    }

    /// Record that the buyer is returning a shipped order
    ///
    /// No funds move; the refund happens when the operator receives the
    /// return.
    pub async fn return_order(
        &self,
        caller: &AccountId,
        product_id: ProductId,
    ) -> EscrowResult<Order> {
        let lock = self.order_lock(product_id).await;
        let _guard = lock.lock().await;

        let order = self.order(product_id).await?;
        if order.buyer != *caller {
            return Err(EscrowError::Unauthorized {
                operation: "return_order",
            });
        }
        if !order.status.can_return() {
            return Err(EscrowError::InvalidState {
                operation: "return_order",
                status: order.status,
            });
        }

        let order = self.advance(product_id, OrderStatus::Returned).await?;

        info!("Return opened for product {}", product_id);
        self.record_event(
            "order.returned",
            Some(product_id),
            Some(caller),
            None,
            Some(order.status),
            None,
        )
        .await;

        Ok(order)
    }

    /// Receive a returned order and refund the buyer less the fee (owner
    /// only)
    ///
    /// The fee was already disposed of at shipment, so the refund pays the
    /// net amount regardless of routing. Custody must hold the refund;
    /// shipment paid the escrowed funds out, so the operator funds custody
    /// before receiving the return, and a failed transfer leaves the order
    /// in `Returned` for a later retry.
    pub async fn receive_return(
        &self,
        caller: &AccountId,
        product_id: ProductId,
    ) -> EscrowResult<Order> {
        let lock = self.order_lock(product_id).await;
        let _guard = lock.lock().await;

        let config = self.authorized_config(caller, "receive_return").await?;
        let order = self.order(product_id).await?;
        if !order.status.can_receive_return() {
            return Err(EscrowError::InvalidState {
                operation: "receive_return",
                status: order.status,
            });
        }

        let refund = order.subtotal();
        self.ledger
            .transfer_out(&config.payment_token, &self.custody, &order.buyer, refund)
            .await?;

        let order = self.advance(product_id, OrderStatus::ReturnedReceived).await?;

        info!(
            "Return received for product {}; refunded {} to {}",
            product_id, refund, order.buyer
        );
        self.record_event(
            "order.return_received",
            Some(product_id),
            Some(caller),
            Some(refund),
            Some(order.status),
            None,
        )
        .await;

        Ok(order)
    }

    /// Sweep an arbitrary token balance out of escrow custody (owner only)
    ///
    /// Rescue operation, bounded by the custody account's actual balance in
    /// that token and independent of the order table.
    pub async fn withdraw_token(
        &self,
        caller: &AccountId,
        token: &TokenId,
        to: &AccountId,
        amount: u64,
    ) -> EscrowResult<()> {
        self.authorized_config(caller, "withdraw_token").await?;
        if amount == 0 {
            return Err(EscrowError::validation("withdraw amount must be greater than 0"));
        }

        self.ledger
            .transfer_out(token, &self.custody, to, amount)
            .await?;

        warn!("Swept {} of token {} from custody to {}", amount, token, to);
        self.record_event(
            "token.withdrawn",
            None,
            Some(caller),
            Some(amount),
            None,
            Some(serde_json::json!({
                "token": token.as_str(),
                "to": to.as_str(),
            })),
        )
        .await;

        Ok(())
    }

    // Owner-gated configuration setters, each overwriting one field.

    /// Change the payment token (owner only)
    pub async fn update_token(&self, caller: &AccountId, token: TokenId) -> EscrowResult<()> {
        self.update_config(caller, "update_token", |config| config.payment_token = token)
            .await
    }

    /// Change the shipment payout account (owner only)
    pub async fn change_payment_receiver(
        &self,
        caller: &AccountId,
        receiver: AccountId,
    ) -> EscrowResult<()> {
        self.update_config(caller, "change_payment_receiver", |config| {
            config.payment_receiver = receiver
        })
        .await
    }

    /// Hand the owner role to another account (owner only)
    pub async fn change_owner(&self, caller: &AccountId, owner: AccountId) -> EscrowResult<()> {
        self.update_config(caller, "change_owner", |config| config.owner = owner)
            .await
    }

    /// Change the fee-collection account (owner only)
    pub async fn change_fee_address(
        &self,
        caller: &AccountId,
        fee_address: AccountId,
    ) -> EscrowResult<()> {
        self.update_config(caller, "change_fee_address", |config| {
            config.fee_address = fee_address
        })
        .await
    }

    /// Change the fee rate, in parts-per-thousand (owner only)
    ///
    /// Applies to future purchases; existing orders keep the fee computed at
    /// purchase time.
    pub async fn change_fee_percentage(
        &self,
        caller: &AccountId,
        fee_per_mille: u64,
    ) -> EscrowResult<()> {
        self.update_config(caller, "change_fee_percentage", |config| {
            config.fee_per_mille = fee_per_mille
        })
        .await
    }

    /// Change the fee disposition policy (owner only)
    pub async fn change_fee_routing(
        &self,
        caller: &AccountId,
        routing: FeeRouting,
    ) -> EscrowResult<()> {
        self.update_config(caller, "change_fee_routing", |config| {
            config.fee_routing = routing
        })
        .await
    }

    // Read accessors.

    /// Look up an order by product id
    pub async fn order(&self, product_id: ProductId) -> EscrowResult<Order> {
        self.orders
            .read()
            .await
            .get(&product_id)
            .cloned()
            .ok_or(EscrowError::OrderNotFound(product_id))
    }

    /// All orders belonging to a buyer
    pub async fn orders_for_buyer(&self, buyer: &AccountId) -> Vec<Order> {
        self.orders
            .read()
            .await
            .values()
            .filter(|order| order.buyer == *buyer)
            .cloned()
            .collect()
    }

    pub async fn owner(&self) -> AccountId {
        self.config.read().await.owner.clone()
    }

    pub async fn payment_token(&self) -> TokenId {
        self.config.read().await.payment_token.clone()
    }

    pub async fn payment_receiver(&self) -> AccountId {
        self.config.read().await.payment_receiver.clone()
    }

    pub async fn fee_address(&self) -> AccountId {
        self.config.read().await.fee_address.clone()
    }

    pub async fn fee_percentage(&self) -> u64 {
        self.config.read().await.fee_per_mille
    }

    pub async fn fee_routing(&self) -> FeeRouting {
        self.config.read().await.fee_routing
    }

    pub async fn total_amount_received(&self) -> u64 {
        *self.total_amount_received.read().await
    }

    /// The ledger account holding escrowed funds
    pub fn custody(&self) -> &AccountId {
        &self.custody
    }

    /// Full audit trail
    pub async fn events(&self) -> Vec<EscrowEvent> {
        self.events.read().await.clone()
    }

    /// Audit events for one product
    pub async fn events_for(&self, product_id: ProductId) -> Vec<EscrowEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|event| event.product_id == Some(product_id))
            .cloned()
            .collect()
    }

    // Internals.

    /// Read the configuration, rejecting callers other than the owner
    async fn authorized_config(
        &self,
        caller: &AccountId,
        operation: &'static str,
    ) -> EscrowResult<EscrowConfig> {
        let config = self.config.read().await;
        if config.owner != *caller {
            return Err(EscrowError::Unauthorized { operation });
        }
        Ok(config.clone())
    }

    /// Apply an owner-gated configuration update
    async fn update_config<F>(
        &self,
        caller: &AccountId,
        operation: &'static str,
        apply: F,
    ) -> EscrowResult<()>
    where
        F: FnOnce(&mut EscrowConfig),
    {
        {
            let mut config = self.config.write().await;
            if config.owner != *caller {
                return Err(EscrowError::Unauthorized { operation });
            }
            apply(&mut config);
        }

        info!("Configuration updated via {}", operation);
        self.record_event(operation, None, Some(caller), None, None, None).await;
        Ok(())
    }

    /// Advance an order's status after its transition's transfers succeeded
    async fn advance(&self, product_id: ProductId, status: OrderStatus) -> EscrowResult<Order> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&product_id)
            .ok_or(EscrowError::OrderNotFound(product_id))?;
        order.status = status;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    /// Pay the net amount to `primary` and the fee to the fee address
    ///
    /// Custody balance is checked up front so the pair cannot half-apply; a
    /// fee payout failing after that check is an accounting bug, not a
    /// recoverable condition.
    async fn split_payout(
        &self,
        config: &EscrowConfig,
        primary: &AccountId,
        net: u64,
        fee: u64,
    ) -> EscrowResult<()> {
        let token = &config.payment_token;
        let owed = net + fee;
        let held = self.ledger.balance_of(token, &self.custody).await;
        if held < owed {
            return Err(LedgerError::InsufficientFunds {
                needed: owed,
                available: held,
            }
            .into());
        }

        self.ledger
            .transfer_out(token, &self.custody, primary, net)
            .await?;
        if fee > 0 {
            self.ledger
                .transfer_out(token, &self.custody, &config.fee_address, fee)
                .await
                .map_err(|err| {
                    EscrowError::invariant(format!(
                        "fee payout failed after custody balance check: {err}"
                    ))
                })?;
        }

        Ok(())
    }

    /// Append an event to the audit trail
    async fn record_event(
        &self,
        event_type: &str,
        product_id: Option<ProductId>,
        actor: Option<&AccountId>,
        amount: Option<u64>,
        status: Option<OrderStatus>,
        metadata: Option<serde_json::Value>,
    ) {
        let event = EscrowEvent {
            event_type: event_type.to_string(),
            product_id,
            actor: actor.cloned(),
            amount,
            status,
            metadata,
            created_at: Utc::now(),
        };

        self.events.write().await.push(event);
    }
}
