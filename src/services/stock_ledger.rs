//! Append-only stock ledger.
//!
//! Every change to a variant's `stock_quantity` goes through [`append`], which
//! writes one immutable `stock_history` row and updates the variant snapshot in
//! the same database transaction. The caller owns the transaction boundary;
//! this module never commits on its own.

use crate::entities::{
    product_variant::{self, Entity as ProductVariant},
    stock_history::{self, StockActionType, StockReferenceType},
};
use crate::errors::ServiceError;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ConnectionTrait, DbBackend, EntityTrait, QuerySelect,
};
use tracing::debug;

/// A requested stock movement, not yet applied.
#[derive(Debug, Clone)]
pub struct StockChange {
    pub action_type: StockActionType,
    pub quantity_change: i32,
    pub reason: String,
    pub notes: Option<String>,
    pub reference_id: Option<i64>,
    pub reference_type: Option<StockReferenceType>,
    pub performed_by: Option<i32>,
}

impl StockChange {
    /// A sale decrement tied to an order.
    pub fn sale(order_id: i64, quantity: i32) -> Self {
        Self {
            action_type: StockActionType::Sale,
            quantity_change: -quantity,
            reason: format!("Order #{} placed", order_id),
            notes: None,
            reference_id: Some(order_id),
            reference_type: Some(StockReferenceType::Order),
            performed_by: None,
        }
    }

    /// A compensating increment appended when an order is cancelled.
    pub fn order_cancelled(order_id: i64, quantity: i32) -> Self {
        Self {
            action_type: StockActionType::OrderCancelled,
            quantity_change: quantity,
            reason: format!("Order #{} cancelled", order_id),
            notes: None,
            reference_id: Some(order_id),
            reference_type: Some(StockReferenceType::Order),
            performed_by: None,
        }
    }
}

/// The persisted ledger row together with the variant row after the update.
#[derive(Debug, Clone)]
pub struct AppliedChange {
    pub entry: stock_history::Model,
    pub variant: product_variant::Model,
}

/// Computes the stock level after a change, rejecting no-op changes and any
/// outcome that would take the level negative.
pub fn level_after(variant_id: i32, current: i32, change: i32) -> Result<i32, ServiceError> {
    if change == 0 {
        return Err(ServiceError::ValidationError(
            "quantity_change must be non-zero".to_string(),
        ));
    }
    let after = current.checked_add(change).ok_or_else(|| {
        ServiceError::ValidationError("quantity_change is out of range".to_string())
    })?;
    if after < 0 {
        return Err(ServiceError::OutOfStock {
            variant_id,
            requested: -change,
            available: current,
        });
    }
    Ok(after)
}

/// Reads the variant row with a row lock so concurrent appends serialize.
/// SQLite has no `FOR UPDATE`; its single-writer model serializes anyway.
async fn load_variant_for_update<C: ConnectionTrait>(
    conn: &C,
    variant_id: i32,
) -> Result<product_variant::Model, ServiceError> {
    let mut query = ProductVariant::find_by_id(variant_id);
    if conn.get_database_backend() != DbBackend::Sqlite {
        query = query.lock_exclusive();
    }
    query
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Product variant {} not found", variant_id)))
}

/// Applies one stock movement inside the caller's transaction.
///
/// Performs the locking read, the non-negativity check, the snapshot update
/// and the ledger insert. Returns the inserted entry along with the updated
/// variant so callers can report new levels without a second read.
pub async fn append<C: ConnectionTrait>(
    conn: &C,
    variant_id: i32,
    change: &StockChange,
) -> Result<AppliedChange, ServiceError> {
    if !change.action_type.is_order_owned() && change.reason.trim().is_empty() {
        return Err(ServiceError::ValidationError(
            "A reason is required for manual stock adjustments".to_string(),
        ));
    }

    let variant = load_variant_for_update(conn, variant_id).await?;
    let quantity_before = variant.stock_quantity;
    let quantity_after = level_after(variant_id, quantity_before, change.quantity_change)?;
    let now = Utc::now();

    let mut active: product_variant::ActiveModel = variant.into();
    active.stock_quantity = Set(quantity_after);
    active.updated_at = Set(now);
    let variant = active.update(conn).await.map_err(ServiceError::db_error)?;

    let entry = stock_history::ActiveModel {
        product_variant_id: Set(variant_id),
        action_type: Set(change.action_type.clone()),
        quantity_before: Set(quantity_before),
        quantity_change: Set(change.quantity_change),
        quantity_after: Set(quantity_after),
        reason: Set(change.reason.clone()),
        notes: Set(change.notes.clone()),
        reference_id: Set(change.reference_id),
        reference_type: Set(change.reference_type.clone()),
        performed_by: Set(change.performed_by),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await
    .map_err(ServiceError::db_error)?;

    debug!(
        variant_id,
        action = change.action_type.as_str(),
        quantity_before,
        quantity_change = change.quantity_change,
        quantity_after,
        "Stock ledger entry appended"
    );

    Ok(AppliedChange { entry, variant })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn decrement_within_stock_is_allowed() {
        assert_eq!(level_after(1, 5, -3).ok(), Some(2));
    }

    #[test]
    fn exact_depletion_reaches_zero() {
        assert_eq!(level_after(1, 5, -5).ok(), Some(0));
    }

    #[test]
    fn overdraw_fails_with_out_of_stock() {
        let err = level_after(7, 5, -6).unwrap_err();
        assert_matches!(
            err,
            ServiceError::OutOfStock {
                variant_id: 7,
                requested: 6,
                available: 5,
            }
        );
    }

    #[test]
    fn zero_change_is_rejected() {
        let err = level_after(1, 5, 0).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn increment_from_zero_restocks() {
        assert_eq!(level_after(1, 0, 40).ok(), Some(40));
    }

    #[test]
    fn overflowing_change_is_rejected() {
        let err = level_after(1, i32::MAX, 1).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn sale_helper_builds_negative_change_with_order_reference() {
        let change = StockChange::sale(42, 3);
        assert_eq!(change.quantity_change, -3);
        assert_eq!(change.reference_id, Some(42));
        assert_eq!(change.action_type, StockActionType::Sale);
        assert_eq!(change.reference_type, Some(StockReferenceType::Order));
    }

    #[test]
    fn cancellation_helper_restores_the_same_quantity() {
        let change = StockChange::order_cancelled(42, 3);
        assert_eq!(change.quantity_change, 3);
        assert_eq!(change.action_type, StockActionType::OrderCancelled);
    }
}
