use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::entities::voucher::{self, DiscountType};
use crate::errors::ServiceError;
use crate::{ApiResponse, AppState};

// Voucher DTOs

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ValidateVoucherRequest {
    #[validate(range(min = 1))]
    pub user_id: i32,

    /// Order amount the voucher would apply to (line subtotals, before
    /// shipping).
    pub order_amount: Decimal,

    /// Needed for `free_shipping` vouchers; defaults to zero.
    pub shipping_fee: Option<Decimal>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct AvailableVoucherParams {
    pub user_id: i32,
    /// When present, the minimum-amount check applies and usable vouchers
    /// carry a discount preview.
    pub order_amount: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct VoucherSummary {
    pub id: i64,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub min_order_amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_discount_amount: Option<Decimal>,
    pub usage_limit: Option<i32>,
    pub used_count: i32,
    pub user_limit: i32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub active: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VoucherValidationResponse {
    pub voucher: VoucherSummary,
    /// Discount the voucher grants for the given order amount.
    pub discount_amount: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AvailableVoucherResponse {
    pub voucher: VoucherSummary,
    pub can_use: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_preview: Option<Decimal>,
}

fn map_voucher(model: &voucher::Model) -> VoucherSummary {
    VoucherSummary {
        id: model.id,
        code: model.code.clone(),
        discount_type: model.discount_type.clone(),
        discount_value: model.discount_value,
        min_order_amount: model.min_order_amount,
        max_discount_amount: model.max_discount_amount,
        usage_limit: model.usage_limit,
        used_count: model.used_count,
        user_limit: model.user_limit,
        start_date: model.start_date,
        end_date: model.end_date,
        active: model.active,
    }
}

/// Validate a voucher code for a prospective order
#[utoipa::path(
    post,
    path = "/api/v1/vouchers/validate/{code}",
    summary = "Validate voucher",
    description = "Run the full validation ladder for a code and quote the discount it would grant. Read-only; nothing is consumed",
    params(("code" = String, Path, description = "Voucher code")),
    request_body = ValidateVoucherRequest,
    responses(
        (status = 200, description = "Voucher is applicable", body = ApiResponse<VoucherValidationResponse>),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 404, description = "Voucher not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Voucher not applicable", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "vouchers"
)]
pub async fn validate_voucher(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(request): Json<ValidateVoucherRequest>,
) -> Result<Json<ApiResponse<VoucherValidationResponse>>, ServiceError> {
    request.validate()?;
    if request.order_amount < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "order_amount cannot be negative".to_string(),
        ));
    }
    if request.shipping_fee.is_some_and(|fee| fee < Decimal::ZERO) {
        return Err(ServiceError::ValidationError(
            "shipping_fee cannot be negative".to_string(),
        ));
    }

    let quote = state
        .services
        .vouchers
        .validate_code(
            &code,
            request.user_id,
            request.order_amount,
            request.shipping_fee.unwrap_or(Decimal::ZERO),
        )
        .await?;

    Ok(Json(ApiResponse::success(VoucherValidationResponse {
        voucher: map_voucher(&quote.voucher),
        discount_amount: quote.discount_amount,
    })))
}

/// List vouchers available to a user
#[utoipa::path(
    get,
    path = "/api/v1/vouchers/available",
    summary = "Available vouchers",
    description = "Active vouchers inside their date window, each annotated with whether the user could redeem it and why not",
    params(AvailableVoucherParams),
    responses(
        (status = 200, description = "Vouchers retrieved", body = ApiResponse<Vec<AvailableVoucherResponse>>),
        (status = 400, description = "Invalid request parameters", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "vouchers"
)]
pub async fn available_vouchers(
    State(state): State<AppState>,
    Query(params): Query<AvailableVoucherParams>,
) -> Result<Json<ApiResponse<Vec<AvailableVoucherResponse>>>, ServiceError> {
    let rows = state
        .services
        .vouchers
        .list_available(params.user_id, params.order_amount)
        .await?;

    let items = rows
        .iter()
        .map(|row| AvailableVoucherResponse {
            voucher: map_voucher(&row.voucher),
            can_use: row.can_use,
            reason: row.reason.clone(),
            discount_preview: row.discount_preview,
        })
        .collect();

    Ok(Json(ApiResponse::success(items)))
}
