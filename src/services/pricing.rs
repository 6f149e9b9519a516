//! Promotion-aware pricing.
//!
//! Pure reads only. The price returned here is the authoritative unit price
//! charged at order time; client-submitted prices are never trusted.

use crate::entities::{
    product_variant,
    promotion::{self, Entity as Promotion},
    promotion_product,
};
use crate::errors::ServiceError;
use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};

/// The price of one variant at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuote {
    pub variant_id: i32,
    pub list_price: Decimal,
    pub discount_percent: i32,
    pub promotion_id: Option<i32>,
    pub unit_price: Decimal,
}

impl PriceQuote {
    pub fn has_promotion(&self) -> bool {
        self.promotion_id.is_some()
    }

    /// Per-unit discount in whole currency units.
    pub fn unit_discount(&self) -> Decimal {
        self.list_price - self.unit_price
    }
}

/// Rounds to whole currency units, half away from zero. Prices in this domain
/// carry no fractional units.
pub(crate) fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

/// Picks the winning promotion among qualifying candidates: highest
/// `discount_percent` first, ties broken by most recent `created_at`, then by
/// highest id so the outcome is deterministic.
pub fn pick_best_promotion(candidates: Vec<promotion::Model>) -> Option<promotion::Model> {
    candidates
        .into_iter()
        .max_by_key(|promo| (promo.discount_percent, promo.created_at, promo.id))
}

/// Effective unit price after applying a percentage discount to the list price.
pub fn effective_unit_price(list_price: Decimal, discount_percent: i32) -> Decimal {
    let discount =
        round_currency(list_price * Decimal::from(discount_percent) / Decimal::from(100));
    list_price - discount
}

/// Loads the promotions that can price `product_id` on `as_of`: active, linked
/// to the product, and with a date window containing `as_of`. The end date is
/// inclusive through the whole day.
pub async fn active_promotions_for_product<C: ConnectionTrait>(
    conn: &C,
    product_id: i32,
    as_of: NaiveDate,
) -> Result<Vec<promotion::Model>, ServiceError> {
    Promotion::find()
        .inner_join(promotion_product::Entity)
        .filter(promotion_product::Column::ProductId.eq(product_id))
        .filter(promotion::Column::Active.eq(true))
        .filter(promotion::Column::StartDate.lte(as_of))
        .filter(promotion::Column::EndDate.gte(as_of))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// Prices an already-loaded variant under the best active promotion.
pub async fn quote_variant<C: ConnectionTrait>(
    conn: &C,
    variant: &product_variant::Model,
    as_of: NaiveDate,
) -> Result<PriceQuote, ServiceError> {
    let candidates = active_promotions_for_product(conn, variant.product_id, as_of).await?;
    let best = pick_best_promotion(candidates);
    let (discount_percent, promotion_id) = match &best {
        Some(promo) => (promo.discount_percent.clamp(0, 100), Some(promo.id)),
        None => (0, None),
    };

    Ok(PriceQuote {
        variant_id: variant.id,
        list_price: variant.price,
        discount_percent,
        promotion_id,
        unit_price: effective_unit_price(variant.price, discount_percent),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use test_case::test_case;

    fn promo(id: i32, percent: i32, created_hour: u32) -> promotion::Model {
        promotion::Model {
            id,
            name: format!("Promo {}", id),
            discount_percent: percent,
            start_date: NaiveDate::from_ymd_opt(2024, 12, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            active: true,
            created_at: Utc
                .with_ymd_and_hms(2024, 11, 30, created_hour, 0, 0)
                .unwrap(),
        }
    }

    #[test_case(dec!(200000), 50, dec!(100000) ; "fifty percent halves the price")]
    #[test_case(dec!(200000), 0, dec!(200000) ; "zero percent keeps the list price")]
    // 99,999 * 50% = 49,999.5, which rounds up to a 50,000 discount
    #[test_case(dec!(99999), 50, dec!(49999) ; "discount rounds half away from zero")]
    #[test_case(dec!(33333), 10, dec!(30000) ; "ten percent of an odd price")]
    #[test_case(dec!(150000), 100, dec!(0) ; "full discount prices at zero")]
    fn effective_price_cases(list_price: Decimal, percent: i32, expected: Decimal) {
        assert_eq!(effective_unit_price(list_price, percent), expected);
    }

    #[test]
    fn highest_discount_wins() {
        let best = pick_best_promotion(vec![promo(1, 10, 0), promo(2, 50, 0), promo(3, 30, 0)]);
        assert_eq!(best.map(|p| p.id), Some(2));
    }

    #[test]
    fn equal_discounts_fall_back_to_newest_created() {
        let best = pick_best_promotion(vec![promo(1, 30, 9), promo(2, 30, 12), promo(3, 30, 7)]);
        assert_eq!(best.map(|p| p.id), Some(2));
    }

    #[test]
    fn no_candidates_means_no_promotion() {
        assert!(pick_best_promotion(Vec::new()).is_none());
    }
}
