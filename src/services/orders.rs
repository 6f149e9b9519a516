//! Order orchestration: the only entry point that creates or cancels orders.
//!
//! Creation prices every line, decrements stock, applies an optional voucher
//! and persists the order rows in one database transaction; a failure at any
//! step rolls back everything, so a partially-created order or a phantom
//! stock decrement is never observable. Cancellation is the compensating
//! transaction, restoring stock through the same ledger.

use crate::db::DbPool;
use crate::entities::{
    order::{self, Entity as Order, OrderStatus, PaymentMethod, PaymentStatus},
    order_detail::{self, Entity as OrderDetail},
    product_variant::Entity as ProductVariant,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseTransaction,
    DbBackend, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::inventory::{self, ReservationLine};
use super::pricing::{self, PriceQuote};
use super::stock_ledger::AppliedChange;
use super::vouchers;
use super::{run_with_retry, unwrap_txn_error, Page, RetryPolicy};

/// One requested order line. Prices are never taken from the client.
#[derive(Debug, Clone)]
pub struct OrderItemInput {
    pub variant_id: i32,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct CreateOrderInput {
    pub user_id: i32,
    pub items: Vec<OrderItemInput>,
    pub voucher_code: Option<String>,
    pub payment_method: PaymentMethod,
    pub shipping_address: String,
    pub shipping_province: Option<String>,
    pub shipping_ward: Option<String>,
    pub shipping_fee: Decimal,
    pub notes: Option<String>,
}

/// An order together with its detail lines.
#[derive(Debug, Clone)]
pub struct OrderWithDetails {
    pub order: order::Model,
    pub details: Vec<order_detail::Model>,
}

#[derive(Debug, Clone, Default)]
pub struct OrderListFilter {
    pub user_id: Option<i32>,
    pub status: Option<OrderStatus>,
}

/// The charged total: line subtotals plus shipping minus discount, floored
/// at zero so an over-sized discount can never produce a negative charge.
pub fn order_total(sub_total: Decimal, shipping_fee: Decimal, discount_amount: Decimal) -> Decimal {
    (sub_total + shipping_fee - discount_amount).max(Decimal::ZERO)
}

fn validate_create_input(input: &CreateOrderInput) -> Result<(), ServiceError> {
    if input.items.is_empty() {
        return Err(ServiceError::ValidationError(
            "An order needs at least one item".to_string(),
        ));
    }
    if input.items.iter().any(|item| item.quantity <= 0) {
        return Err(ServiceError::ValidationError(
            "Item quantities must be positive".to_string(),
        ));
    }
    if input.shipping_address.trim().is_empty() {
        return Err(ServiceError::ValidationError(
            "A shipping address is required".to_string(),
        ));
    }
    if input.shipping_fee < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "shipping_fee cannot be negative".to_string(),
        ));
    }
    Ok(())
}

async fn load_order_for_update<C: ConnectionTrait>(
    conn: &C,
    order_id: i64,
) -> Result<order::Model, ServiceError> {
    let mut query = Order::find_by_id(order_id);
    if conn.get_database_backend() != DbBackend::Sqlite {
        query = query.lock_exclusive();
    }
    query
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
}

/// Everything CreateOrder persists, executed inside one transaction.
///
/// Step order matters: pricing and voucher validation are pure reads, the
/// order row must exist before detail lines, ledger references and the
/// voucher usage row can point at it, and the locked stock decrements and
/// locked voucher consumption come last so a failure there aborts the lot.
async fn create_order_in_txn(
    txn: &DatabaseTransaction,
    input: &CreateOrderInput,
) -> Result<(OrderWithDetails, Vec<AppliedChange>, Option<i64>), ServiceError> {
    let now = Utc::now();
    let today = now.date_naive();

    let mut items = input.items.clone();
    items.sort_by_key(|item| item.variant_id);

    let mut priced: Vec<(OrderItemInput, PriceQuote, Decimal)> = Vec::with_capacity(items.len());
    let mut sub_total = Decimal::ZERO;
    for item in items {
        let variant = ProductVariant::find_by_id(item.variant_id)
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "Product variant {} does not exist",
                    item.variant_id
                ))
            })?;
        if !variant.is_active {
            return Err(ServiceError::ValidationError(format!(
                "Product variant {} is not active",
                variant.id
            )));
        }

        let quote = pricing::quote_variant(txn, &variant, today).await?;
        let line_subtotal = quote.unit_price * Decimal::from(item.quantity);
        sub_total += line_subtotal;
        priced.push((item, quote, line_subtotal));
    }

    // An invalid voucher fails the whole order; there is no partial discount
    let voucher = match &input.voucher_code {
        Some(code) => Some(vouchers::validate(txn, code, input.user_id, sub_total, today).await?),
        None => None,
    };
    let discount_amount = voucher
        .as_ref()
        .map(|v| vouchers::compute_discount(v, sub_total, input.shipping_fee))
        .unwrap_or(Decimal::ZERO);
    let total_amount = order_total(sub_total, input.shipping_fee, discount_amount);

    let created = order::ActiveModel {
        user_id: Set(input.user_id),
        status: Set(OrderStatus::Pending),
        payment_method: Set(input.payment_method.clone()),
        payment_status: Set(PaymentStatus::Unpaid),
        payment_transaction_id: Set(None),
        sub_total: Set(sub_total),
        shipping_fee: Set(input.shipping_fee),
        discount_amount: Set(discount_amount),
        total_amount: Set(total_amount),
        voucher_id: Set(voucher.as_ref().map(|v| v.id)),
        shipping_address: Set(input.shipping_address.clone()),
        shipping_province: Set(input.shipping_province.clone()),
        shipping_ward: Set(input.shipping_ward.clone()),
        notes: Set(input.notes.clone()),
        cancel_reason: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(txn)
    .await
    .map_err(ServiceError::db_error)?;

    // Detail lines freeze the quoted price as a historical fact
    let mut details = Vec::with_capacity(priced.len());
    for (item, quote, line_subtotal) in &priced {
        let detail = order_detail::ActiveModel {
            order_id: Set(created.id),
            product_variant_id: Set(item.variant_id),
            quantity: Set(item.quantity),
            unit_price: Set(quote.unit_price),
            discount_amount: Set(quote.unit_discount() * Decimal::from(item.quantity)),
            subtotal: Set(*line_subtotal),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;
        details.push(detail);
    }

    // Atomic decrement per line; any OutOfStock aborts the whole transaction
    let lines: Vec<ReservationLine> = priced
        .iter()
        .map(|(item, _, _)| ReservationLine {
            variant_id: item.variant_id,
            quantity: item.quantity,
        })
        .collect();
    let reservations = inventory::reserve_for_order(txn, created.id, &lines).await?;

    let consumed_voucher_id = match &voucher {
        Some(v) => {
            let consumed =
                vouchers::consume(txn, v.id, input.user_id, created.id, sub_total, today).await?;
            Some(consumed.id)
        }
        None => None,
    };

    Ok((
        OrderWithDetails {
            order: created,
            details,
        },
        reservations,
        consumed_voucher_id,
    ))
}

/// Cancels an order and restores its stock, inside the caller's transaction.
/// When `requesting_user` is given, an order belonging to someone else reads
/// as not found.
async fn cancel_in_txn(
    txn: &DatabaseTransaction,
    order_id: i64,
    reason: &str,
    requesting_user: Option<i32>,
) -> Result<(order::Model, Vec<AppliedChange>), ServiceError> {
    let existing = load_order_for_update(txn, order_id).await?;
    if let Some(user_id) = requesting_user {
        if existing.user_id != user_id {
            return Err(ServiceError::NotFound(format!(
                "Order {} not found",
                order_id
            )));
        }
    }
    if !existing.status.is_cancellable() {
        return Err(ServiceError::InvalidStatusTransition {
            from: existing.status.as_str().to_string(),
            to: OrderStatus::Cancelled.as_str().to_string(),
        });
    }

    let restored = inventory::release_for_order(txn, existing.id).await?;

    let mut active: order::ActiveModel = existing.into();
    active.status = Set(OrderStatus::Cancelled);
    active.cancel_reason = Set(Some(reason.to_string()));
    active.updated_at = Set(Utc::now());
    let cancelled = active.update(txn).await.map_err(ServiceError::db_error)?;

    Ok((cancelled, restored))
}

#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    retry: RetryPolicy,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>, retry: RetryPolicy) -> Self {
        Self {
            db_pool,
            event_sender,
            retry,
        }
    }

    /// Creates an order atomically, retrying the whole transaction on
    /// deadlock. Returns the persisted order with its detail lines.
    #[instrument(skip(self, input), fields(user_id = input.user_id, items = input.items.len()))]
    pub async fn create_order(
        &self,
        input: CreateOrderInput,
    ) -> Result<OrderWithDetails, ServiceError> {
        validate_create_input(&input)?;

        let input = Arc::new(input);
        let (created, reservations, consumed_voucher_id) =
            run_with_retry(self.retry, "create_order", || {
                let input = Arc::clone(&input);
                async move {
                    self.db_pool
                        .transaction::<_, (OrderWithDetails, Vec<AppliedChange>, Option<i64>), ServiceError>(
                            move |txn| Box::pin(async move { create_order_in_txn(txn, &input).await }),
                        )
                        .await
                        .map_err(unwrap_txn_error)
                }
            })
            .await?;

        info!(
            order_id = created.order.id,
            user_id = created.order.user_id,
            total_amount = %created.order.total_amount,
            voucher_id = ?created.order.voucher_id,
            "Order created"
        );

        self.publish(Event::OrderCreated {
            order_id: created.order.id,
            user_id: created.order.user_id,
            total_amount: created.order.total_amount,
        })
        .await;
        if let Some(voucher_id) = consumed_voucher_id {
            self.publish(Event::VoucherConsumed {
                voucher_id,
                order_id: created.order.id,
                user_id: created.order.user_id,
            })
            .await;
        }
        for applied in &reservations {
            inventory::notify_stock_changed(&self.event_sender, applied).await;
        }

        Ok(created)
    }

    /// Cancels an order from `pending` or `processing`, restoring stock via
    /// compensating ledger entries. Voucher usage is deliberately not
    /// restored.
    #[instrument(skip(self, reason), fields(order_id))]
    pub async fn cancel_order(
        &self,
        order_id: i64,
        reason: String,
        requesting_user: Option<i32>,
    ) -> Result<order::Model, ServiceError> {
        if reason.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "A cancellation reason is required".to_string(),
            ));
        }

        let (cancelled, restored) = run_with_retry(self.retry, "cancel_order", || {
            let reason = reason.clone();
            async move {
                self.db_pool
                    .transaction::<_, (order::Model, Vec<AppliedChange>), ServiceError>(
                        move |txn| {
                            Box::pin(async move {
                                cancel_in_txn(txn, order_id, &reason, requesting_user).await
                            })
                        },
                    )
                    .await
                    .map_err(unwrap_txn_error)
            }
        })
        .await?;

        info!(order_id, "Order cancelled");
        self.publish(Event::OrderCancelled {
            order_id,
            reason: cancelled.cancel_reason.clone().unwrap_or_default(),
        })
        .await;
        for applied in &restored {
            inventory::notify_stock_changed(&self.event_sender, applied).await;
        }

        Ok(cancelled)
    }

    /// Applies a status transition. Transitioning to `cancelled` runs the
    /// full cancellation path, so there is no route to a cancelled order
    /// that skips stock restoration.
    #[instrument(skip(self, reason), fields(order_id, to = new_status.as_str()))]
    pub async fn update_order_status(
        &self,
        order_id: i64,
        new_status: OrderStatus,
        reason: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        if new_status == OrderStatus::Cancelled {
            let reason = reason.unwrap_or_else(|| "Cancelled via status update".to_string());
            return self.cancel_order(order_id, reason, None).await;
        }

        let (updated, old_status) = run_with_retry(self.retry, "update_order_status", || {
            let new_status = new_status.clone();
            async move {
                self.db_pool
                    .transaction::<_, (order::Model, OrderStatus), ServiceError>(move |txn| {
                        Box::pin(async move {
                            let existing = load_order_for_update(txn, order_id).await?;
                            let old_status = existing.status.clone();
                            if !old_status.can_transition_to(&new_status) {
                                return Err(ServiceError::InvalidStatusTransition {
                                    from: old_status.as_str().to_string(),
                                    to: new_status.as_str().to_string(),
                                });
                            }
                            let mut active: order::ActiveModel = existing.into();
                            active.status = Set(new_status.clone());
                            active.updated_at = Set(Utc::now());
                            let updated =
                                active.update(txn).await.map_err(ServiceError::db_error)?;
                            Ok((updated, old_status))
                        })
                    })
                    .await
                    .map_err(unwrap_txn_error)
            }
        })
        .await?;

        info!(
            order_id,
            from = old_status.as_str(),
            to = updated.status.as_str(),
            "Order status updated"
        );
        self.publish(Event::OrderStatusChanged {
            order_id,
            old_status: old_status.as_str().to_string(),
            new_status: updated.status.as_str().to_string(),
        })
        .await;

        Ok(updated)
    }

    /// Narrow write path driven by the external payment flow. Payment fields
    /// only, with one coupling: a successful payment advances a pending
    /// order to processing. Stock and vouchers are never touched here.
    #[instrument(skip(self, transaction_id), fields(order_id, to = new_payment_status.as_str()))]
    pub async fn update_payment_status(
        &self,
        order_id: i64,
        new_payment_status: PaymentStatus,
        transaction_id: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let (updated, old) = run_with_retry(self.retry, "update_payment_status", || {
            let new_payment_status = new_payment_status.clone();
            let transaction_id = transaction_id.clone();
            async move {
                self.db_pool
                    .transaction::<_, (order::Model, PaymentStatus), ServiceError>(move |txn| {
                        Box::pin(async move {
                            let existing = load_order_for_update(txn, order_id).await?;
                            let old = existing.payment_status.clone();

                            let allowed = matches!(
                                (&old, &new_payment_status),
                                (PaymentStatus::Unpaid, PaymentStatus::Paid)
                                    | (PaymentStatus::Paid, PaymentStatus::Refund)
                            );
                            if !allowed {
                                return Err(ServiceError::InvalidStatusTransition {
                                    from: old.as_str().to_string(),
                                    to: new_payment_status.as_str().to_string(),
                                });
                            }
                            if new_payment_status == PaymentStatus::Refund
                                && existing.status != OrderStatus::Cancelled
                            {
                                return Err(ServiceError::InvalidOperation(
                                    "Only a cancelled order can be refunded".to_string(),
                                ));
                            }

                            let advance = new_payment_status == PaymentStatus::Paid
                                && existing.status == OrderStatus::Pending;
                            let mut active: order::ActiveModel = existing.into();
                            active.payment_status = Set(new_payment_status.clone());
                            if let Some(tx_id) = transaction_id {
                                active.payment_transaction_id = Set(Some(tx_id));
                            }
                            if advance {
                                active.status = Set(OrderStatus::Processing);
                            }
                            active.updated_at = Set(Utc::now());
                            let updated =
                                active.update(txn).await.map_err(ServiceError::db_error)?;
                            Ok((updated, old))
                        })
                    })
                    .await
                    .map_err(unwrap_txn_error)
            }
        })
        .await?;

        info!(
            order_id,
            from = old.as_str(),
            to = updated.payment_status.as_str(),
            "Payment status updated"
        );
        self.publish(Event::PaymentStatusChanged {
            order_id,
            payment_status: updated.payment_status.as_str().to_string(),
            transaction_id: updated.payment_transaction_id.clone(),
        })
        .await;

        Ok(updated)
    }

    pub async fn get_order(&self, order_id: i64) -> Result<OrderWithDetails, ServiceError> {
        let db = self.db_pool.as_ref();
        let found = Order::find_by_id(order_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let details = OrderDetail::find()
            .filter(order_detail::Column::OrderId.eq(found.id))
            .order_by_asc(order_detail::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(OrderWithDetails {
            order: found,
            details,
        })
    }

    /// One page of orders, newest first, optionally filtered by user and
    /// status.
    pub async fn list_orders(
        &self,
        filter: OrderListFilter,
        page: u64,
        per_page: u64,
    ) -> Result<Page<order::Model>, ServiceError> {
        let db = self.db_pool.as_ref();
        let mut query = Order::find();
        if let Some(user_id) = filter.user_id {
            query = query.filter(order::Column::UserId.eq(user_id));
        }
        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status));
        }

        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::Id)
            .paginate(db, per_page);
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let items = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;

        Ok(Page {
            items,
            total,
            page,
            per_page,
        })
    }

    async fn publish(&self, event: Event) {
        if let Err(err) = self.event_sender.send(event).await {
            warn!(error = %err, "Failed to publish order event");
        }
    }
}
