// Consistency-critical engine
pub mod inventory;
pub mod orders;
pub mod stock_ledger;
pub mod vouchers;

// Pure pricing reads
pub mod pricing;

// Read-only aggregation over the stock ledger
pub mod stock_analytics;

use crate::errors::ServiceError;
use rand::Rng;
use sea_orm::{ConnAcquireErr, DbErr, TransactionError};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// One page of query results plus the total row count across all pages.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        if self.per_page == 0 {
            0
        } else {
            self.total.div_ceil(self.per_page)
        }
    }
}

/// Bounded retry settings for write transactions that may hit deadlocks.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_backoff: Duration::from_millis(25),
        }
    }
}

/// Flattens the nested error produced by `DatabaseTransaction::transaction`.
pub(crate) fn unwrap_txn_error(err: TransactionError<ServiceError>) -> ServiceError {
    match err {
        TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
        TransactionError::Transaction(service_err) => service_err,
    }
}

/// True when the backend reported a deadlock or serialization failure, which
/// is safe to retry on a fresh transaction.
fn is_retryable_db(err: &DbErr) -> bool {
    let text = err.to_string().to_lowercase();
    text.contains("deadlock")
        || text.contains("could not serialize")
        || text.contains("serialization failure")
        || text.contains("database is locked")
        || text.contains("lock wait timeout")
}

fn is_timeout_db(err: &DbErr) -> bool {
    if let DbErr::ConnectionAcquire(ConnAcquireErr::Timeout) = err {
        return true;
    }
    let text = err.to_string().to_lowercase();
    text.contains("statement timeout") || text.contains("timed out")
}

fn is_retryable(err: &ServiceError) -> bool {
    match err {
        ServiceError::DatabaseError(db_err) => is_retryable_db(db_err),
        _ => false,
    }
}

/// Translates residual database errors into the stable conflict/timeout kinds
/// once retries are exhausted or skipped.
fn classify_residual(err: ServiceError, operation: &str) -> ServiceError {
    match &err {
        ServiceError::DatabaseError(db_err) if is_retryable_db(db_err) => {
            ServiceError::ConcurrencyConflict(format!(
                "{} did not complete after concurrent updates",
                operation
            ))
        }
        ServiceError::DatabaseError(db_err) if is_timeout_db(db_err) => {
            ServiceError::OperationTimeout(format!("{} timed out", operation))
        }
        _ => err,
    }
}

fn jittered_backoff(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32 << (attempt - 1).min(4));
    let jitter = rand::thread_rng().gen_range(0..=exp.as_millis() as u64);
    exp + Duration::from_millis(jitter)
}

/// Runs a whole-transaction operation up to `policy.attempts` times, retrying
/// only on deadlock/serialization failures with jittered backoff in between.
/// Everything else surfaces immediately.
pub(crate) async fn run_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    mut run: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match run().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts && is_retryable(&err) => {
                let backoff = jittered_backoff(policy.base_backoff, attempt);
                warn!(
                    operation,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Transaction conflicted, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(classify_residual(err, operation)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn deadlock() -> ServiceError {
        ServiceError::DatabaseError(DbErr::Custom("deadlock detected".to_string()))
    }

    fn quick() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base_backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn deadlock_and_serialization_failures_are_retryable() {
        assert!(is_retryable_db(&DbErr::Custom(
            "deadlock detected".to_string()
        )));
        assert!(is_retryable_db(&DbErr::Custom(
            "could not serialize access due to concurrent update".to_string()
        )));
        assert!(is_retryable_db(&DbErr::Custom(
            "database is locked".to_string()
        )));
        assert!(!is_retryable_db(&DbErr::Custom(
            "duplicate key value violates unique constraint".to_string()
        )));
    }

    #[test]
    fn residual_deadlock_becomes_concurrency_conflict() {
        let err = classify_residual(deadlock(), "create_order");
        assert_eq!(err.code(), "CONCURRENCY_CONFLICT");

        let err = classify_residual(
            ServiceError::DatabaseError(DbErr::Custom(
                "canceling statement due to statement timeout".to_string(),
            )),
            "create_order",
        );
        assert_eq!(err.code(), "OPERATION_TIMEOUT");
    }

    #[test]
    fn business_errors_pass_through_unchanged() {
        let err = classify_residual(ServiceError::VoucherNotFound("NOPE".to_string()), "x");
        assert_eq!(err.code(), "VOUCHER_NOT_FOUND");
    }

    #[tokio::test]
    async fn retries_transient_conflicts_until_success() {
        let calls = AtomicU32::new(0);
        let result = run_with_retry(quick(), "test_op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(deadlock())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.ok(), Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_concurrency_conflict() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = run_with_retry(quick(), "test_op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(deadlock()) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.unwrap_err().code(), "CONCURRENCY_CONFLICT");
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = run_with_retry(quick(), "test_op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ServiceError::OutOfStock {
                    variant_id: 7,
                    requested: 2,
                    available: 1,
                })
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err().code(), "OUT_OF_STOCK");
    }
}
