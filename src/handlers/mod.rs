pub mod inventory;
pub mod orders;
pub mod vouchers;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    inventory::InventoryService, orders::OrderService, stock_analytics::StockAnalyticsService,
    vouchers::VoucherService, RetryPolicy,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub inventory: Arc<InventoryService>,
    pub vouchers: Arc<VoucherService>,
    pub stock_analytics: Arc<StockAnalyticsService>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>, config: &AppConfig) -> Self {
        let retry = RetryPolicy {
            attempts: config.txn_retry_attempts,
            base_backoff: config.txn_retry_backoff(),
        };

        let orders = Arc::new(OrderService::new(
            db_pool.clone(),
            event_sender.clone(),
            retry,
        ));
        let inventory = Arc::new(InventoryService::new(db_pool.clone(), event_sender, retry));
        let vouchers = Arc::new(VoucherService::new(db_pool.clone()));
        let stock_analytics = Arc::new(StockAnalyticsService::new(
            db_pool,
            config.low_stock_threshold,
        ));

        Self {
            orders,
            inventory,
            vouchers,
            stock_analytics,
        }
    }
}

/// Clamps client paging input to the configured bounds. Page numbers start
/// at 1.
pub(crate) fn clamp_paging(
    config: &AppConfig,
    page: Option<u64>,
    limit: Option<u64>,
) -> (u64, u64) {
    let page = page.unwrap_or(1).max(1);
    let limit = limit
        .unwrap_or(config.api_default_page_size)
        .clamp(1, config.api_max_page_size);
    (page, limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        let mut config = AppConfig::new("sqlite::memory:", "127.0.0.1", 0, "test");
        config.api_default_page_size = 20;
        config.api_max_page_size = 100;
        config
    }

    #[test]
    fn paging_defaults_apply() {
        assert_eq!(clamp_paging(&config(), None, None), (1, 20));
    }

    #[test]
    fn page_zero_becomes_one() {
        assert_eq!(clamp_paging(&config(), Some(0), Some(10)), (1, 10));
    }

    #[test]
    fn limit_is_capped() {
        assert_eq!(clamp_paging(&config(), Some(3), Some(10_000)), (3, 100));
        assert_eq!(clamp_paging(&config(), Some(3), Some(0)), (3, 1));
    }
}
