use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Orderflow API",
        version = "1.0.0",
        description = r#"
# Order Fulfillment & Inventory API

Atomic order creation with server-side pricing, voucher redemption and
non-negative stock tracking through an append-only ledger.

## Features

- **Orders**: Atomic creation (pricing, stock decrement and voucher
  consumption in one transaction), lifecycle transitions, compensating
  cancellation
- **Inventory**: Manual adjustments, full ledger history, overview,
  low-stock listing and daily movement trend
- **Vouchers**: Validation with discount quote, per-user availability

## Error Handling

Failing endpoints return a stable machine-readable code alongside the
HTTP status:

```json
{
  "error": "OUT_OF_STOCK",
  "message": "Insufficient stock for variant 42: requested 3, available 1",
  "request_id": "0b4ee26c-7a4f-4e55-bc67-1a09c2fbb6ac",
  "timestamp": "2025-08-25T10:30:00.000Z"
}
```

## Pagination

List endpoints accept `page` (default 1) and `limit` (default 20,
capped by server configuration).
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "orders", description = "Order lifecycle endpoints"),
        (name = "inventory", description = "Stock adjustment and analytics endpoints"),
        (name = "vouchers", description = "Voucher validation and availability endpoints")
    ),
    paths(
        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::update_payment_status,
        crate::handlers::orders::cancel_order,

        // Inventory
        crate::handlers::inventory::adjust_stock,
        crate::handlers::inventory::list_history,
        crate::handlers::inventory::stock_overview,
        crate::handlers::inventory::low_stock,
        crate::handlers::inventory::stock_trend,

        // Vouchers
        crate::handlers::vouchers::validate_voucher,
        crate::handlers::vouchers::available_vouchers,
    ),
    components(
        schemas(
            // Common types
            crate::ApiResponse<serde_json::Value>,
            crate::PaginatedResponse<serde_json::Value>,

            // Order types
            crate::handlers::orders::CreateOrderRequest,
            crate::handlers::orders::CreateOrderItem,
            crate::handlers::orders::UpdateOrderStatusRequest,
            crate::handlers::orders::UpdatePaymentStatusRequest,
            crate::handlers::orders::CancelOrderRequest,
            crate::handlers::orders::OrderResponse,
            crate::handlers::orders::OrderItemResponse,
            crate::entities::order::OrderStatus,
            crate::entities::order::PaymentMethod,
            crate::entities::order::PaymentStatus,

            // Inventory types
            crate::handlers::inventory::AdjustStockRequest,
            crate::handlers::inventory::StockEntryResponse,
            crate::handlers::inventory::StockAdjustmentResponse,
            crate::handlers::inventory::VariantStockResponse,
            crate::entities::stock_history::StockActionType,
            crate::entities::stock_history::StockReferenceType,
            crate::services::stock_analytics::StockOverview,
            crate::services::stock_analytics::DailyStockTrend,

            // Voucher types
            crate::handlers::vouchers::ValidateVoucherRequest,
            crate::handlers::vouchers::VoucherSummary,
            crate::handlers::vouchers::VoucherValidationResponse,
            crate::handlers::vouchers::AvailableVoucherResponse,
            crate::entities::voucher::DiscountType,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_contains_core_paths() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).expect("document should serialize");
        assert!(json.contains("Orderflow API"));
        assert!(json.contains("/api/v1/orders"));
        assert!(json.contains("/api/v1/inventory/adjust/{variant_id}"));
        assert!(json.contains("/api/v1/vouchers/validate/{code}"));
        assert!(json.contains("OUT_OF_STOCK"));
    }
}
