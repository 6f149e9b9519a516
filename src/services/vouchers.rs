//! Voucher validation, discount computation and consumption.
//!
//! Validation is a pure check ladder over a fetched voucher; consumption
//! re-runs the ladder under a row lock inside the order transaction so two
//! concurrent orders cannot both pass a usage cap and both commit.

use crate::db::DbPool;
use crate::entities::{
    voucher::{self, DiscountType, Entity as Voucher},
    voucher_usage::{self, Entity as VoucherUsage},
};
use crate::errors::ServiceError;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DbBackend, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::pricing::round_currency;

/// A validated voucher together with the discount it would grant.
#[derive(Debug, Clone)]
pub struct VoucherQuote {
    pub voucher: voucher::Model,
    pub discount_amount: Decimal,
}

/// One row of the availability listing: the voucher plus whether the asking
/// user could redeem it, and if not, why.
#[derive(Debug, Clone)]
pub struct VoucherAvailability {
    pub voucher: voucher::Model,
    pub can_use: bool,
    pub reason: Option<String>,
    pub discount_preview: Option<Decimal>,
}

/// Runs the validation ladder over an already-fetched voucher. The order of
/// checks is fixed: inactive/window first, then the global cap, then the
/// per-user cap, then the minimum order amount.
pub fn check_voucher(
    voucher: &voucher::Model,
    today: NaiveDate,
    user_usage_count: u64,
    order_amount: Decimal,
) -> Result<(), ServiceError> {
    if !voucher.active || today < voucher.start_date || today > voucher.end_date {
        return Err(ServiceError::VoucherInactive(format!(
            "'{}' is not redeemable on {}",
            voucher.code, today
        )));
    }
    if let Some(limit) = voucher.usage_limit {
        if voucher.used_count >= limit {
            return Err(ServiceError::VoucherExhausted(format!(
                "'{}' has reached its usage limit of {}",
                voucher.code, limit
            )));
        }
    }
    if user_usage_count >= voucher.user_limit as u64 {
        return Err(ServiceError::VoucherUserLimitReached(format!(
            "'{}' allows {} use(s) per user",
            voucher.code, voucher.user_limit
        )));
    }
    if order_amount < voucher.min_order_amount {
        return Err(ServiceError::VoucherMinAmountNotMet(format!(
            "'{}' requires a minimum order amount of {}",
            voucher.code, voucher.min_order_amount
        )));
    }
    Ok(())
}

/// Discount granted by a voucher for the given order amount and shipping fee.
/// Pure; rounds to whole currency units and never exceeds the amount it
/// discounts against.
pub fn compute_discount(
    voucher: &voucher::Model,
    order_amount: Decimal,
    shipping_fee: Decimal,
) -> Decimal {
    match voucher.discount_type {
        DiscountType::Percentage => {
            let raw = round_currency(order_amount * voucher.discount_value / Decimal::from(100));
            match voucher.max_discount_amount {
                Some(cap) => raw.min(cap),
                None => raw,
            }
        }
        DiscountType::FixedAmount => voucher.discount_value.min(order_amount),
        DiscountType::FreeShipping => shipping_fee,
    }
}

async fn count_user_usages<C: ConnectionTrait>(
    conn: &C,
    voucher_id: i64,
    user_id: i32,
) -> Result<u64, ServiceError> {
    VoucherUsage::find()
        .filter(voucher_usage::Column::VoucherId.eq(voucher_id))
        .filter(voucher_usage::Column::UserId.eq(user_id))
        .count(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// Fetches a voucher by code and runs the validation ladder. Does not consume.
/// Codes are stored uppercase, so the lookup uppercases its input.
pub async fn validate<C: ConnectionTrait>(
    conn: &C,
    code: &str,
    user_id: i32,
    order_amount: Decimal,
    today: NaiveDate,
) -> Result<voucher::Model, ServiceError> {
    let code = code.trim().to_uppercase();
    let voucher = Voucher::find()
        .filter(voucher::Column::Code.eq(code.as_str()))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::VoucherNotFound(code.clone()))?;

    let user_usage_count = count_user_usages(conn, voucher.id, user_id).await?;
    check_voucher(&voucher, today, user_usage_count, order_amount)?;
    Ok(voucher)
}

/// Re-reads the voucher with a row lock so the usage-cap re-check and the
/// `used_count` increment serialize with concurrent consumers.
async fn load_voucher_for_update<C: ConnectionTrait>(
    conn: &C,
    voucher_id: i64,
) -> Result<voucher::Model, ServiceError> {
    let mut query = Voucher::find_by_id(voucher_id);
    if conn.get_database_backend() != DbBackend::Sqlite {
        query = query.lock_exclusive();
    }
    query
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::VoucherNotFound(format!("id {}", voucher_id)))
}

/// Consumes one use of a voucher inside the caller's order transaction:
/// locked re-check of every cap, `used_count` increment, usage row insert.
/// Never called standalone, so a voucher is only ever consumed by an order
/// that also commits.
pub async fn consume<C: ConnectionTrait>(
    conn: &C,
    voucher_id: i64,
    user_id: i32,
    order_id: i64,
    order_amount: Decimal,
    today: NaiveDate,
) -> Result<voucher::Model, ServiceError> {
    let voucher = load_voucher_for_update(conn, voucher_id).await?;
    let user_usage_count = count_user_usages(conn, voucher.id, user_id).await?;
    check_voucher(&voucher, today, user_usage_count, order_amount)?;

    let now = Utc::now();
    let new_count = voucher.used_count + 1;
    let mut active: voucher::ActiveModel = voucher.into();
    active.used_count = Set(new_count);
    active.updated_at = Set(now);
    let voucher = active.update(conn).await.map_err(ServiceError::db_error)?;

    voucher_usage::ActiveModel {
        voucher_id: Set(voucher.id),
        user_id: Set(user_id),
        order_id: Set(order_id),
        used_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await
    .map_err(ServiceError::db_error)?;

    debug!(
        voucher_id = voucher.id,
        user_id, order_id, used_count = voucher.used_count,
        "Voucher consumed"
    );

    Ok(voucher)
}

#[derive(Clone)]
pub struct VoucherService {
    db_pool: Arc<DbPool>,
}

impl VoucherService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Validates a code for a prospective order and quotes the discount it
    /// would grant. Read-only; nothing is consumed.
    #[instrument(skip(self), fields(code = %code, user_id))]
    pub async fn validate_code(
        &self,
        code: &str,
        user_id: i32,
        order_amount: Decimal,
        shipping_fee: Decimal,
    ) -> Result<VoucherQuote, ServiceError> {
        let db = self.db_pool.as_ref();
        let today = Utc::now().date_naive();
        let voucher = validate(db, code, user_id, order_amount, today).await?;
        let discount_amount = compute_discount(&voucher, order_amount, shipping_fee);
        Ok(VoucherQuote {
            voucher,
            discount_amount,
        })
    }

    /// Vouchers inside their date window, each annotated with whether the
    /// user could redeem it right now. With an `order_amount` the minimum
    /// check applies and usable vouchers carry a discount preview; without
    /// one the minimum is assumed met.
    pub async fn list_available(
        &self,
        user_id: i32,
        order_amount: Option<Decimal>,
    ) -> Result<Vec<VoucherAvailability>, ServiceError> {
        let db = self.db_pool.as_ref();
        let today = Utc::now().date_naive();

        let candidates = Voucher::find()
            .filter(voucher::Column::Active.eq(true))
            .filter(voucher::Column::StartDate.lte(today))
            .filter(voucher::Column::EndDate.gte(today))
            .order_by_asc(voucher::Column::EndDate)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let usages = VoucherUsage::find()
            .filter(voucher_usage::Column::UserId.eq(user_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        let mut used_by_user: HashMap<i64, u64> = HashMap::new();
        for usage in usages {
            *used_by_user.entry(usage.voucher_id).or_default() += 1;
        }

        let mut results = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let used = used_by_user.get(&candidate.id).copied().unwrap_or(0);
            let probe_amount = order_amount.unwrap_or(candidate.min_order_amount);
            let (can_use, reason) = match check_voucher(&candidate, today, used, probe_amount) {
                Ok(()) => (true, None),
                Err(err) => (false, Some(err.to_string())),
            };
            let discount_preview = match (can_use, order_amount) {
                (true, Some(amount)) => Some(compute_discount(&candidate, amount, Decimal::ZERO)),
                _ => None,
            };
            results.push(VoucherAvailability {
                voucher: candidate,
                can_use,
                reason,
                discount_preview,
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn voucher(discount_type: DiscountType, value: Decimal, cap: Option<Decimal>) -> voucher::Model {
        voucher::Model {
            id: 1,
            code: "SAVE10".to_string(),
            discount_type,
            discount_value: value,
            min_order_amount: dec!(100000),
            max_discount_amount: cap,
            usage_limit: Some(100),
            used_count: 0,
            user_limit: 1,
            start_date: NaiveDate::from_ymd_opt(2024, 12, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn mid_window() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 15).unwrap()
    }

    #[rstest]
    #[case::percentage_capped(
        DiscountType::Percentage, dec!(10), Some(dec!(50000)), dec!(1000000), dec!(0), dec!(50000)
    )]
    #[case::percentage_below_cap(
        DiscountType::Percentage, dec!(10), Some(dec!(50000)), dec!(200000), dec!(0), dec!(20000)
    )]
    // 10% of 15,555 is 1,555.5, rounded half away from zero
    #[case::percentage_rounds(
        DiscountType::Percentage, dec!(10), None, dec!(15555), dec!(0), dec!(1556)
    )]
    #[case::fixed_clamped_to_order(
        DiscountType::FixedAmount, dec!(80000), None, dec!(50000), dec!(0), dec!(50000)
    )]
    #[case::fixed_full_value(
        DiscountType::FixedAmount, dec!(80000), None, dec!(300000), dec!(0), dec!(80000)
    )]
    #[case::free_shipping_equals_fee(
        DiscountType::FreeShipping, dec!(0), None, dec!(300000), dec!(30000), dec!(30000)
    )]
    #[case::free_shipping_without_fee(
        DiscountType::FreeShipping, dec!(0), None, dec!(300000), dec!(0), dec!(0)
    )]
    fn discount_cases(
        #[case] discount_type: DiscountType,
        #[case] value: Decimal,
        #[case] cap: Option<Decimal>,
        #[case] order_amount: Decimal,
        #[case] shipping_fee: Decimal,
        #[case] expected: Decimal,
    ) {
        let v = voucher(discount_type, value, cap);
        assert_eq!(compute_discount(&v, order_amount, shipping_fee), expected);
    }

    #[test]
    fn ladder_accepts_a_valid_redemption() {
        let v = voucher(DiscountType::Percentage, dec!(10), None);
        assert!(check_voucher(&v, mid_window(), 0, dec!(150000)).is_ok());
    }

    #[test]
    fn inactive_flag_blocks_redemption() {
        let mut v = voucher(DiscountType::Percentage, dec!(10), None);
        v.active = false;
        let err = check_voucher(&v, mid_window(), 0, dec!(150000)).unwrap_err();
        assert_eq!(err.code(), "VOUCHER_INACTIVE");
    }

    #[test]
    fn window_is_inclusive_of_both_end_days() {
        let v = voucher(DiscountType::Percentage, dec!(10), None);
        let first = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
        let last = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let after = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();

        assert!(check_voucher(&v, first, 0, dec!(150000)).is_ok());
        assert!(check_voucher(&v, last, 0, dec!(150000)).is_ok());
        assert_eq!(
            check_voucher(&v, after, 0, dec!(150000))
                .unwrap_err()
                .code(),
            "VOUCHER_INACTIVE"
        );
    }

    #[test]
    fn global_cap_exhausts_the_voucher() {
        let mut v = voucher(DiscountType::Percentage, dec!(10), None);
        v.usage_limit = Some(3);
        v.used_count = 3;
        let err = check_voucher(&v, mid_window(), 0, dec!(150000)).unwrap_err();
        assert_eq!(err.code(), "VOUCHER_EXHAUSTED");
    }

    #[test]
    fn unlimited_vouchers_never_exhaust() {
        let mut v = voucher(DiscountType::Percentage, dec!(10), None);
        v.usage_limit = None;
        v.used_count = 10_000;
        assert!(check_voucher(&v, mid_window(), 0, dec!(150000)).is_ok());
    }

    #[test]
    fn per_user_limit_blocks_repeat_use() {
        let v = voucher(DiscountType::Percentage, dec!(10), None);
        let err = check_voucher(&v, mid_window(), 1, dec!(150000)).unwrap_err();
        assert_eq!(err.code(), "VOUCHER_USER_LIMIT_REACHED");
    }

    #[test]
    fn minimum_order_amount_is_enforced_last() {
        let v = voucher(DiscountType::Percentage, dec!(10), None);
        let err = check_voucher(&v, mid_window(), 0, dec!(99999)).unwrap_err();
        assert_eq!(err.code(), "VOUCHER_MIN_AMOUNT_NOT_MET");
    }
}
