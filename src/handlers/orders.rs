use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::entities::{
    order::{self, OrderStatus, PaymentMethod, PaymentStatus},
    order_detail,
};
use crate::errors::ServiceError;
use crate::services::orders::{CreateOrderInput, OrderItemInput, OrderListFilter};
use crate::{ApiResponse, AppState, PaginatedResponse};

// Order DTOs

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateOrderRequest {
    #[validate(range(min = 1))]
    pub user_id: i32,

    #[validate(length(min = 1))]
    pub items: Vec<CreateOrderItem>,

    pub voucher_code: Option<String>,

    /// Defaults to `cash_on_delivery`.
    pub payment_method: Option<PaymentMethod>,

    #[validate(length(min = 1))]
    pub shipping_address: String,

    pub shipping_province: Option<String>,
    pub shipping_ward: Option<String>,

    /// Defaults to zero.
    pub shipping_fee: Option<Decimal>,

    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateOrderItem {
    #[validate(range(min = 1))]
    pub variant_id: i32,

    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdatePaymentStatusRequest {
    pub payment_status: PaymentStatus,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CancelOrderRequest {
    #[validate(length(min = 1))]
    pub cancel_reason: String,

    /// When present, the order must belong to this user.
    pub user_id: Option<i32>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct OrderListParams {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub user_id: Option<i32>,
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderItemResponse {
    pub id: i64,
    pub product_variant_id: i32,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub discount_amount: Decimal,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: i64,
    pub user_id: i32,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_transaction_id: Option<String>,
    pub sub_total: Decimal,
    pub shipping_fee: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voucher_id: Option<i64>,
    pub shipping_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_province: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_ward: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    /// Detail lines; omitted from list and mutation responses.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn map_order_item(detail: &order_detail::Model) -> OrderItemResponse {
    OrderItemResponse {
        id: detail.id,
        product_variant_id: detail.product_variant_id,
        quantity: detail.quantity,
        unit_price: detail.unit_price,
        discount_amount: detail.discount_amount,
        subtotal: detail.subtotal,
    }
}

fn map_order(model: order::Model, details: &[order_detail::Model]) -> OrderResponse {
    OrderResponse {
        id: model.id,
        user_id: model.user_id,
        status: model.status,
        payment_method: model.payment_method,
        payment_status: model.payment_status,
        payment_transaction_id: model.payment_transaction_id,
        sub_total: model.sub_total,
        shipping_fee: model.shipping_fee,
        discount_amount: model.discount_amount,
        total_amount: model.total_amount,
        voucher_id: model.voucher_id,
        shipping_address: model.shipping_address,
        shipping_province: model.shipping_province,
        shipping_ward: model.shipping_ward,
        notes: model.notes,
        cancel_reason: model.cancel_reason,
        items: details.iter().map(map_order_item).collect(),
        created_at: model.created_at,
        updated_at: model.updated_at,
    }
}

/// Create a new order
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    description = "Create an order atomically: items are priced server-side, stock is decremented and the voucher (if any) is consumed in one transaction",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 404, description = "Voucher not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Concurrent update conflict", body = crate::errors::ErrorResponse),
        (status = 422, description = "Out of stock or voucher not applicable", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    if let Err(validation_errors) = request.validate() {
        let errors: Vec<String> = validation_errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                let field = field.clone();
                errors.iter().map(move |error| {
                    format!(
                        "{}: {}",
                        field,
                        error.message.as_ref().unwrap_or(&"Invalid value".into())
                    )
                })
            })
            .collect();
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::validation_errors(errors)),
        ));
    }

    let input = CreateOrderInput {
        user_id: request.user_id,
        items: request
            .items
            .iter()
            .map(|item| OrderItemInput {
                variant_id: item.variant_id,
                quantity: item.quantity,
            })
            .collect(),
        voucher_code: request.voucher_code,
        payment_method: request
            .payment_method
            .unwrap_or(PaymentMethod::CashOnDelivery),
        shipping_address: request.shipping_address,
        shipping_province: request.shipping_province,
        shipping_ward: request.shipping_ward,
        shipping_fee: request.shipping_fee.unwrap_or(Decimal::ZERO),
        notes: request.notes,
    };

    let created = state.services.orders.create_order(input).await?;
    let response = map_order(created.order, &created.details);
    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))))
}

/// List orders with pagination and filtering
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders",
    description = "Get a paginated list of orders, newest first, optionally filtered by user and status",
    params(OrderListParams),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<PaginatedResponse<OrderResponse>>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request parameters", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(params): Query<OrderListParams>,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderResponse>>>, ServiceError> {
    let (page, limit) = super::clamp_paging(&state.config, params.page, params.limit);
    let filter = OrderListFilter {
        user_id: params.user_id,
        status: params.status,
    };

    let result = state.services.orders.list_orders(filter, page, limit).await?;
    let total_pages = result.total_pages();
    let items = result
        .items
        .into_iter()
        .map(|model| map_order(model, &[]))
        .collect();

    Ok(Json(ApiResponse::success(PaginatedResponse {
        items,
        total: result.total,
        page: result.page,
        limit: result.per_page,
        total_pages,
    })))
}

/// Get order by ID
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    description = "Retrieve an order with its detail lines",
    params(("id" = i64, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let found = state.services.orders.get_order(id).await?;
    Ok(Json(ApiResponse::success(map_order(
        found.order,
        &found.details,
    ))))
}

/// Update order status
#[utoipa::path(
    patch,
    path = "/api/v1/orders/{id}/status",
    summary = "Update order status",
    description = "Apply a lifecycle transition; moving to `cancelled` restores stock",
    params(("id" = i64, Path, description = "Order ID")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Transition not allowed", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let updated = state
        .services
        .orders
        .update_order_status(id, request.status, request.reason)
        .await?;
    Ok(Json(ApiResponse::success(map_order(updated, &[]))))
}

/// Update payment status
#[utoipa::path(
    patch,
    path = "/api/v1/orders/{id}/payment",
    summary = "Update payment status",
    description = "Record the outcome of the external payment flow; a successful payment advances a pending order to processing",
    params(("id" = i64, Path, description = "Order ID")),
    request_body = UpdatePaymentStatusRequest,
    responses(
        (status = 200, description = "Payment status updated", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Refund requires a cancelled order", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Transition not allowed", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn update_payment_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdatePaymentStatusRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let updated = state
        .services
        .orders
        .update_payment_status(id, request.payment_status, request.transaction_id)
        .await?;
    Ok(Json(ApiResponse::success(map_order(updated, &[]))))
}

/// Cancel an order
#[utoipa::path(
    delete,
    path = "/api/v1/orders/{id}/cancel",
    summary = "Cancel order",
    description = "Cancel a pending or processing order; stock returns via compensating ledger entries, voucher usage is not restored",
    params(("id" = i64, Path, description = "Order ID")),
    request_body = CancelOrderRequest,
    responses(
        (status = 200, description = "Order cancelled", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order can no longer be cancelled", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<CancelOrderRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    request.validate()?;
    let cancelled = state
        .services
        .orders
        .cancel_order(id, request.cancel_reason, request.user_id)
        .await?;
    Ok(Json(ApiResponse::success(map_order(cancelled, &[]))))
}
