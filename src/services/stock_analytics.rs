//! Read-only aggregation over the stock ledger and variant snapshots.
//!
//! Nothing here participates in the consistency-critical path; every query is
//! a plain read against committed state.

use crate::db::DbPool;
use crate::entities::{
    product_variant::{self, Entity as ProductVariant},
    stock_history::{self, Entity as StockHistory, StockActionType},
};
use crate::errors::ServiceError;
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use utoipa::ToSchema;

use super::Page;

/// Filters for ledger history queries. All fields optional; absent means
/// unfiltered.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub variant_id: Option<i32>,
    pub product_id: Option<i32>,
    pub action_type: Option<StockActionType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Stock position across the whole catalog at a glance.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StockOverview {
    pub total_variants: u64,
    pub active_variants: u64,
    pub total_units: i64,
    pub out_of_stock: u64,
    pub low_stock: u64,
    pub low_stock_threshold: i32,
}

/// Net stock movement for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DailyStockTrend {
    pub date: NaiveDate,
    pub inbound: i64,
    pub outbound: i64,
    pub net_change: i64,
    pub entries: u64,
}

/// Folds variant snapshots into the overview counters. Out-of-stock and
/// low-stock only count active variants; inactive ones are not sellable.
fn summarize_variants(variants: &[product_variant::Model], threshold: i32) -> StockOverview {
    let mut overview = StockOverview {
        total_variants: variants.len() as u64,
        active_variants: 0,
        total_units: 0,
        out_of_stock: 0,
        low_stock: 0,
        low_stock_threshold: threshold,
    };
    for variant in variants {
        overview.total_units += i64::from(variant.stock_quantity);
        if !variant.is_active {
            continue;
        }
        overview.active_variants += 1;
        if variant.stock_quantity == 0 {
            overview.out_of_stock += 1;
        } else if variant.stock_quantity <= threshold {
            overview.low_stock += 1;
        }
    }
    overview
}

/// Buckets ledger entries into one row per day over `days` days ending today,
/// zero-filling days without movement.
fn fold_trend(
    entries: &[stock_history::Model],
    start_day: NaiveDate,
    days: u32,
) -> Vec<DailyStockTrend> {
    let mut buckets: BTreeMap<NaiveDate, DailyStockTrend> = BTreeMap::new();
    for offset in 0..days {
        let date = start_day + Days::new(u64::from(offset));
        buckets.insert(
            date,
            DailyStockTrend {
                date,
                inbound: 0,
                outbound: 0,
                net_change: 0,
                entries: 0,
            },
        );
    }

    for entry in entries {
        let date = entry.created_at.date_naive();
        if let Some(bucket) = buckets.get_mut(&date) {
            if entry.quantity_change >= 0 {
                bucket.inbound += i64::from(entry.quantity_change);
            } else {
                bucket.outbound += i64::from(-entry.quantity_change);
            }
            bucket.net_change += i64::from(entry.quantity_change);
            bucket.entries += 1;
        }
    }

    buckets.into_values().collect()
}

#[derive(Clone)]
pub struct StockAnalyticsService {
    db_pool: Arc<DbPool>,
    low_stock_threshold: i32,
}

impl StockAnalyticsService {
    pub fn new(db_pool: Arc<DbPool>, low_stock_threshold: i32) -> Self {
        Self {
            db_pool,
            low_stock_threshold,
        }
    }

    /// One page of ledger history, newest first.
    pub async fn history(
        &self,
        filter: HistoryFilter,
        page: u64,
        per_page: u64,
    ) -> Result<Page<stock_history::Model>, ServiceError> {
        let db = self.db_pool.as_ref();

        let mut query = StockHistory::find();
        if let Some(variant_id) = filter.variant_id {
            query = query.filter(stock_history::Column::ProductVariantId.eq(variant_id));
        }
        if let Some(product_id) = filter.product_id {
            query = query
                .inner_join(product_variant::Entity)
                .filter(product_variant::Column::ProductId.eq(product_id));
        }
        if let Some(action_type) = filter.action_type {
            query = query.filter(stock_history::Column::ActionType.eq(action_type));
        }
        if let Some(from) = filter.from {
            query = query.filter(stock_history::Column::CreatedAt.gte(from));
        }
        if let Some(to) = filter.to {
            // exclusive upper bound, so whole-day ranges compose cleanly
            query = query.filter(stock_history::Column::CreatedAt.lt(to));
        }

        let paginator = query
            .order_by_desc(stock_history::Column::CreatedAt)
            .order_by_desc(stock_history::Column::Id)
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

    /// Catalog-wide stock counters.
    pub async fn overview(&self) -> Result<StockOverview, ServiceError> {
        let variants = ProductVariant::find()
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;
        Ok(summarize_variants(&variants, self.low_stock_threshold))
    }

    /// One page of active variants at or below the threshold, lowest first.
    /// `threshold` overrides the configured default when given.
    pub async fn low_stock(
        &self,
        threshold: Option<i32>,
        page: u64,
        per_page: u64,
    ) -> Result<Page<product_variant::Model>, ServiceError> {
        let threshold = threshold.unwrap_or(self.low_stock_threshold);
        let paginator = ProductVariant::find()
            .filter(product_variant::Column::IsActive.eq(true))
            .filter(product_variant::Column::StockQuantity.lte(threshold))
            .order_by_asc(product_variant::Column::StockQuantity)
            .order_by_asc(product_variant::Column::Id)
            .paginate(self.db_pool.as_ref(), per_page);
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

    /// Daily movement totals for the trailing `days` days (clamped to 1..=90),
    /// including today, with empty days zero-filled.
    pub async fn trend(&self, days: u32) -> Result<Vec<DailyStockTrend>, ServiceError> {
        let days = days.clamp(1, 90);
        let today = Utc::now().date_naive();
        let start_day = today - Days::new(u64::from(days - 1));
        let cutoff = start_day.and_time(NaiveTime::MIN).and_utc();

        let entries = StockHistory::find()
            .filter(stock_history::Column::CreatedAt.gte(cutoff))
            .order_by_asc(stock_history::Column::CreatedAt)
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        Ok(fold_trend(&entries, start_day, days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn variant(id: i32, stock: i32, active: bool) -> product_variant::Model {
        product_variant::Model {
            id,
            product_id: 1,
            size_id: 1,
            color_id: 1,
            price: dec!(100000),
            stock_quantity: stock,
            is_active: active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn entry(day: u32, hour: u32, change: i32) -> stock_history::Model {
        let created_at = Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap();
        stock_history::Model {
            id: i64::from(day * 100 + hour),
            product_variant_id: 1,
            action_type: if change < 0 {
                StockActionType::Sale
            } else {
                StockActionType::Restock
            },
            quantity_before: 10,
            quantity_change: change,
            quantity_after: 10 + change,
            reason: "test".to_string(),
            notes: None,
            reference_id: None,
            reference_type: None,
            performed_by: None,
            created_at,
        }
    }

    #[test]
    fn overview_counts_only_active_variants_as_stockouts() {
        let variants = vec![
            variant(1, 0, true),
            variant(2, 0, false),
            variant(3, 3, true),
            variant(4, 50, true),
            variant(5, 10, true),
        ];
        let overview = summarize_variants(&variants, 10);

        assert_eq!(overview.total_variants, 5);
        assert_eq!(overview.active_variants, 4);
        assert_eq!(overview.total_units, 63);
        assert_eq!(overview.out_of_stock, 1);
        assert_eq!(overview.low_stock, 2);
    }

    #[test]
    fn trend_buckets_by_day_and_zero_fills_gaps() {
        let start = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let entries = vec![
            entry(10, 9, -2),
            entry(10, 15, -3),
            entry(12, 11, 20),
            entry(12, 12, -1),
        ];

        let trend = fold_trend(&entries, start, 3);

        assert_eq!(trend.len(), 3);
        assert_eq!(trend[0].date, start);
        assert_eq!(trend[0].outbound, 5);
        assert_eq!(trend[0].inbound, 0);
        assert_eq!(trend[0].net_change, -5);
        assert_eq!(trend[0].entries, 2);

        // the 11th has no movement but still appears
        assert_eq!(trend[1].entries, 0);
        assert_eq!(trend[1].net_change, 0);

        assert_eq!(trend[2].inbound, 20);
        assert_eq!(trend[2].outbound, 1);
        assert_eq!(trend[2].net_change, 19);
    }

    #[test]
    fn trend_ignores_entries_outside_the_window() {
        let start = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let entries = vec![entry(9, 23, -4), entry(10, 1, -1)];

        let trend = fold_trend(&entries, start, 2);

        assert_eq!(trend[0].outbound, 1);
        assert_eq!(trend.iter().map(|d| d.entries).sum::<u64>(), 1);
    }
}
