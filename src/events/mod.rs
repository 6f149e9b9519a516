use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::ServiceError;

/// Cloneable handle for emitting domain events from services.
///
/// Events are emitted after the owning transaction commits; a full channel or
/// a stopped processor must never fail business flow, so callers treat send
/// errors as warnings.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.sender
            .send(event)
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))
    }
}

/// Everything the engine announces about committed state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: i64,
        user_id: i32,
        total_amount: Decimal,
    },
    OrderStatusChanged {
        order_id: i64,
        old_status: String,
        new_status: String,
    },
    OrderCancelled {
        order_id: i64,
        reason: String,
    },
    PaymentStatusChanged {
        order_id: i64,
        payment_status: String,
        transaction_id: Option<String>,
    },
    StockAdjusted {
        entry_id: i64,
        variant_id: i32,
        action_type: String,
        quantity_before: i32,
        quantity_change: i32,
        quantity_after: i32,
        occurred_at: DateTime<Utc>,
    },
    VoucherConsumed {
        voucher_id: i64,
        order_id: i64,
        user_id: i32,
    },
}

/// Drains the event channel and logs each committed change.
///
/// Runs for the lifetime of the process; exits when every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        debug!("Received event: {:?}", event);

        match event {
            Event::OrderCreated {
                order_id,
                user_id,
                total_amount,
            } => {
                info!(
                    order_id,
                    user_id,
                    %total_amount,
                    "Order created"
                );
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(order_id, %old_status, %new_status, "Order status changed");
            }
            Event::OrderCancelled { order_id, reason } => {
                info!(order_id, %reason, "Order cancelled");
            }
            Event::PaymentStatusChanged {
                order_id,
                payment_status,
                transaction_id,
            } => {
                info!(
                    order_id,
                    %payment_status,
                    transaction_id = transaction_id.as_deref().unwrap_or("-"),
                    "Payment status changed"
                );
            }
            Event::StockAdjusted {
                entry_id,
                variant_id,
                action_type,
                quantity_before,
                quantity_change,
                quantity_after,
                occurred_at,
            } => {
                info!(
                    entry_id,
                    variant_id,
                    %action_type,
                    quantity_before,
                    quantity_change,
                    quantity_after,
                    %occurred_at,
                    "Stock adjusted"
                );
                if quantity_after == 0 {
                    warn!(variant_id, "Variant is out of stock");
                }
            }
            Event::VoucherConsumed {
                voucher_id,
                order_id,
                user_id,
            } => {
                info!(voucher_id, order_id, user_id, "Voucher consumed");
            }
        }
    }

    info!("Event processing loop stopped");
}
