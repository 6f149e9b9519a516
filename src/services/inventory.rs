//! Inventory mutations: order-driven reservation and release, plus the
//! manual adjustment flow used for restocks, damage write-offs and
//! corrections.

use crate::db::DbPool;
use crate::entities::{
    order_detail::{self, Entity as OrderDetail},
    stock_history::{StockActionType, StockReferenceType},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, TransactionTrait};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::stock_ledger::{self, AppliedChange, StockChange};
use super::{run_with_retry, unwrap_txn_error, RetryPolicy};

/// One line of an order's reservation request.
#[derive(Debug, Clone, Copy)]
pub struct ReservationLine {
    pub variant_id: i32,
    pub quantity: i32,
}

/// Decrements stock for every line of a new order, inside the caller's
/// transaction. Lines are applied in ascending variant id so concurrent
/// orders over overlapping variants acquire row locks in the same order.
/// Duplicate variant ids are kept as separate ledger entries.
pub(crate) async fn reserve_for_order<C: ConnectionTrait>(
    conn: &C,
    order_id: i64,
    lines: &[ReservationLine],
) -> Result<Vec<AppliedChange>, ServiceError> {
    let mut ordered = lines.to_vec();
    ordered.sort_by_key(|line| line.variant_id);

    let mut applied = Vec::with_capacity(ordered.len());
    for line in ordered {
        let change = StockChange::sale(order_id, line.quantity);
        applied.push(stock_ledger::append(conn, line.variant_id, &change).await?);
    }
    Ok(applied)
}

/// Restores stock for every detail line of a cancelled order, inside the
/// caller's transaction.
pub(crate) async fn release_for_order<C: ConnectionTrait>(
    conn: &C,
    order_id: i64,
) -> Result<Vec<AppliedChange>, ServiceError> {
    let details = OrderDetail::find()
        .filter(order_detail::Column::OrderId.eq(order_id))
        .order_by_asc(order_detail::Column::ProductVariantId)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    let mut applied = Vec::with_capacity(details.len());
    for detail in details {
        let change = StockChange::order_cancelled(order_id, detail.quantity);
        applied.push(stock_ledger::append(conn, detail.product_variant_id, &change).await?);
    }
    Ok(applied)
}

/// Publishes a stock event for a committed ledger entry. Best effort: a full
/// or closed channel is logged and never fails the committed operation.
pub(crate) async fn notify_stock_changed(event_sender: &EventSender, applied: &AppliedChange) {
    let entry = &applied.entry;
    let event = Event::StockAdjusted {
        entry_id: entry.id,
        variant_id: entry.product_variant_id,
        action_type: entry.action_type.as_str().to_string(),
        quantity_before: entry.quantity_before,
        quantity_change: entry.quantity_change,
        quantity_after: entry.quantity_after,
        occurred_at: entry.created_at,
    };
    if let Err(err) = event_sender.send(event).await {
        warn!(entry_id = entry.id, error = %err, "Failed to publish stock event");
    }
}

/// A manual stock adjustment request.
#[derive(Debug, Clone)]
pub struct AdjustStockInput {
    pub action_type: StockActionType,
    pub quantity_change: i32,
    pub reason: String,
    pub notes: Option<String>,
    pub reference_id: Option<i64>,
    pub reference_type: Option<StockReferenceType>,
    pub performed_by: Option<i32>,
}

#[derive(Clone)]
pub struct InventoryService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    retry: RetryPolicy,
}

impl InventoryService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>, retry: RetryPolicy) -> Self {
        Self {
            db_pool,
            event_sender,
            retry,
        }
    }

    /// Applies a manual stock adjustment in its own transaction, retrying on
    /// deadlock. Order-owned action types are rejected; sales and
    /// cancellations only ever enter the ledger through the order flow.
    #[instrument(skip(self, input), fields(variant_id, action = input.action_type.as_str()))]
    pub async fn adjust_stock(
        &self,
        variant_id: i32,
        input: AdjustStockInput,
    ) -> Result<AppliedChange, ServiceError> {
        if input.action_type.is_order_owned() {
            return Err(ServiceError::ValidationError(format!(
                "Action type '{}' is reserved for the order flow",
                input.action_type.as_str()
            )));
        }
        if input.quantity_change == 0 {
            return Err(ServiceError::ValidationError(
                "quantity_change must be non-zero".to_string(),
            ));
        }
        if input.reason.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "A reason is required for manual stock adjustments".to_string(),
            ));
        }

        let change = StockChange {
            action_type: input.action_type,
            quantity_change: input.quantity_change,
            reason: input.reason,
            notes: input.notes,
            reference_id: input.reference_id,
            reference_type: input.reference_type,
            performed_by: input.performed_by,
        };

        let applied = run_with_retry(self.retry, "adjust_stock", || {
            let change = change.clone();
            async move {
                self.db_pool
                    .transaction::<_, AppliedChange, ServiceError>(move |txn| {
                        Box::pin(
                            async move { stock_ledger::append(txn, variant_id, &change).await },
                        )
                    })
                    .await
                    .map_err(unwrap_txn_error)
            }
        })
        .await?;

        info!(
            variant_id,
            action = applied.entry.action_type.as_str(),
            quantity_change = applied.entry.quantity_change,
            quantity_after = applied.entry.quantity_after,
            "Stock adjusted"
        );

        notify_stock_changed(&self.event_sender, &applied).await;

        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_lines_sort_ascending_for_lock_ordering() {
        let mut lines = vec![
            ReservationLine {
                variant_id: 9,
                quantity: 1,
            },
            ReservationLine {
                variant_id: 2,
                quantity: 4,
            },
            ReservationLine {
                variant_id: 9,
                quantity: 2,
            },
            ReservationLine {
                variant_id: 5,
                quantity: 1,
            },
        ];
        lines.sort_by_key(|line| line.variant_id);

        let ids: Vec<i32> = lines.iter().map(|l| l.variant_id).collect();
        assert_eq!(ids, vec![2, 5, 9, 9]);
        // stable sort keeps the two variant-9 lines in submission order
        let nines: Vec<i32> = lines
            .iter()
            .filter(|l| l.variant_id == 9)
            .map(|l| l.quantity)
            .collect();
        assert_eq!(nines, vec![1, 2]);
    }
}
