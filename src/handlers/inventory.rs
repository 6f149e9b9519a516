use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::entities::{
    product_variant,
    stock_history::{self, StockActionType, StockReferenceType},
};
use crate::errors::ServiceError;
use crate::services::inventory::AdjustStockInput;
use crate::services::stock_analytics::{DailyStockTrend, HistoryFilter, StockOverview};
use crate::{ApiResponse, AppState, PaginatedResponse};

// Inventory DTOs

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct AdjustStockRequest {
    /// One of `return`, `damaged`, `restock`, `adjustment`. The order-owned
    /// types `sale` and `order_cancelled` are rejected here.
    pub action_type: StockActionType,

    /// Signed unit delta; must be non-zero.
    pub quantity_change: i32,

    #[validate(length(min = 1))]
    pub reason: String,

    pub notes: Option<String>,
    pub reference_id: Option<i64>,
    pub reference_type: Option<StockReferenceType>,

    /// Identifier of the administrator performing the adjustment.
    #[validate(range(min = 1))]
    pub admin_id: i32,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct HistoryParams {
    pub variant_id: Option<i32>,
    pub product_id: Option<i32>,
    pub action_type: Option<StockActionType>,
    /// First day included, `YYYY-MM-DD` (UTC).
    pub start_date: Option<NaiveDate>,
    /// Last day included, `YYYY-MM-DD` (UTC).
    pub end_date: Option<NaiveDate>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct LowStockParams {
    /// Overrides the configured low-stock threshold.
    pub threshold: Option<i32>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct TrendParams {
    /// Trailing window in days (default 30, max 90).
    pub days: Option<u32>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StockEntryResponse {
    pub id: i64,
    pub product_variant_id: i32,
    pub action_type: StockActionType,
    pub quantity_before: i32,
    pub quantity_change: i32,
    pub quantity_after: i32,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_type: Option<StockReferenceType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performed_by: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StockAdjustmentResponse {
    pub entry: StockEntryResponse,
    /// Variant stock level after the adjustment.
    pub stock_quantity: i32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct VariantStockResponse {
    pub id: i32,
    pub product_id: i32,
    pub size_id: i32,
    pub color_id: i32,
    pub price: Decimal,
    pub stock_quantity: i32,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

fn map_entry(entry: &stock_history::Model) -> StockEntryResponse {
    StockEntryResponse {
        id: entry.id,
        product_variant_id: entry.product_variant_id,
        action_type: entry.action_type.clone(),
        quantity_before: entry.quantity_before,
        quantity_change: entry.quantity_change,
        quantity_after: entry.quantity_after,
        reason: entry.reason.clone(),
        notes: entry.notes.clone(),
        reference_id: entry.reference_id,
        reference_type: entry.reference_type.clone(),
        performed_by: entry.performed_by,
        created_at: entry.created_at,
    }
}

fn map_variant(variant: &product_variant::Model) -> VariantStockResponse {
    VariantStockResponse {
        id: variant.id,
        product_id: variant.product_id,
        size_id: variant.size_id,
        color_id: variant.color_id,
        price: variant.price,
        stock_quantity: variant.stock_quantity,
        is_active: variant.is_active,
        updated_at: variant.updated_at,
    }
}

/// Manually adjust stock for a variant
#[utoipa::path(
    post,
    path = "/api/v1/inventory/adjust/{variant_id}",
    summary = "Adjust stock",
    description = "Apply a manual stock adjustment (restock, damage, correction). Appends a ledger entry and updates the variant level atomically",
    params(("variant_id" = i32, Path, description = "Product variant ID")),
    request_body = AdjustStockRequest,
    responses(
        (status = 201, description = "Adjustment applied", body = ApiResponse<StockAdjustmentResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 404, description = "Variant not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Concurrent update conflict", body = crate::errors::ErrorResponse),
        (status = 422, description = "Adjustment would drive stock negative", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "inventory"
)]
pub async fn adjust_stock(
    State(state): State<AppState>,
    Path(variant_id): Path<i32>,
    Json(request): Json<AdjustStockRequest>,
) -> Result<(StatusCode, Json<ApiResponse<StockAdjustmentResponse>>), ServiceError> {
    request.validate()?;

    let applied = state
        .services
        .inventory
        .adjust_stock(
            variant_id,
            AdjustStockInput {
                action_type: request.action_type,
                quantity_change: request.quantity_change,
                reason: request.reason,
                notes: request.notes,
                reference_id: request.reference_id,
                reference_type: request.reference_type,
                performed_by: Some(request.admin_id),
            },
        )
        .await?;

    let response = StockAdjustmentResponse {
        entry: map_entry(&applied.entry),
        stock_quantity: applied.variant.stock_quantity,
    };
    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))))
}

/// List stock ledger history
#[utoipa::path(
    get,
    path = "/api/v1/inventory/history",
    summary = "Stock history",
    description = "Paginated ledger entries, newest first, filterable by variant, product, action type and date range",
    params(HistoryParams),
    responses(
        (status = 200, description = "History retrieved", body = ApiResponse<PaginatedResponse<StockEntryResponse>>),
        (status = 400, description = "Invalid request parameters", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "inventory"
)]
pub async fn list_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<ApiResponse<PaginatedResponse<StockEntryResponse>>>, ServiceError> {
    if let (Some(start), Some(end)) = (params.start_date, params.end_date) {
        if start > end {
            return Err(ServiceError::ValidationError(
                "start_date must not be after end_date".to_string(),
            ));
        }
    }

    let (page, limit) = super::clamp_paging(&state.config, params.page, params.limit);
    let filter = HistoryFilter {
        variant_id: params.variant_id,
        product_id: params.product_id,
        action_type: params.action_type,
        from: params
            .start_date
            .map(|day| day.and_time(NaiveTime::MIN).and_utc()),
        to: params
            .end_date
            .map(|day| (day + Days::new(1)).and_time(NaiveTime::MIN).and_utc()),
    };

    let result = state
        .services
        .stock_analytics
        .history(filter, page, limit)
        .await?;
    let total_pages = result.total_pages();
    let items = result.items.iter().map(map_entry).collect();

    Ok(Json(ApiResponse::success(PaginatedResponse {
        items,
        total: result.total,
        page: result.page,
        limit: result.per_page,
        total_pages,
    })))
}

/// Catalog-wide stock overview
#[utoipa::path(
    get,
    path = "/api/v1/inventory/overview",
    summary = "Stock overview",
    description = "Variant counts, total units on hand and low/out-of-stock counters",
    responses(
        (status = 200, description = "Overview retrieved", body = ApiResponse<StockOverview>),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "inventory"
)]
pub async fn stock_overview(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<StockOverview>>, ServiceError> {
    let overview = state.services.stock_analytics.overview().await?;
    Ok(Json(ApiResponse::success(overview)))
}

/// List low-stock variants
#[utoipa::path(
    get,
    path = "/api/v1/inventory/low-stock",
    summary = "Low stock",
    description = "Active variants at or below the low-stock threshold, lowest first",
    params(LowStockParams),
    responses(
        (status = 200, description = "Low-stock variants retrieved", body = ApiResponse<PaginatedResponse<VariantStockResponse>>),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "inventory"
)]
pub async fn low_stock(
    State(state): State<AppState>,
    Query(params): Query<LowStockParams>,
) -> Result<Json<ApiResponse<PaginatedResponse<VariantStockResponse>>>, ServiceError> {
    let (page, limit) = super::clamp_paging(&state.config, params.page, params.limit);
    let result = state
        .services
        .stock_analytics
        .low_stock(params.threshold, page, limit)
        .await?;
    let total_pages = result.total_pages();
    let items = result.items.iter().map(map_variant).collect();

    Ok(Json(ApiResponse::success(PaginatedResponse {
        items,
        total: result.total,
        page: result.page,
        limit: result.per_page,
        total_pages,
    })))
}

/// Daily stock movement trend
#[utoipa::path(
    get,
    path = "/api/v1/inventory/trend",
    summary = "Stock trend",
    description = "Inbound, outbound and net units per day over the trailing window, empty days zero-filled",
    params(TrendParams),
    responses(
        (status = 200, description = "Trend retrieved", body = ApiResponse<Vec<DailyStockTrend>>),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "inventory"
)]
pub async fn stock_trend(
    State(state): State<AppState>,
    Query(params): Query<TrendParams>,
) -> Result<Json<ApiResponse<Vec<DailyStockTrend>>>, ServiceError> {
    let days = params.days.unwrap_or(30);
    let trend = state.services.stock_analytics.trend(days).await?;
    Ok(Json(ApiResponse::success(trend)))
}
