use thiserror::Error;

/// Stable error classes the engine branches on.
///
/// These are matched through `anyhow` wrapping via `downcast_ref`, so
/// callers may add context freely without losing the sentinel.
#[derive(Error, Debug, PartialEq)]
pub enum AppError {
    /// The marketplace's daily call budget is exhausted. Ingestion treats
    /// this as a hard break of the current cycle, not a failure.
    #[error("daily marketplace api limit reached")]
    DailyLimitReached,

    /// No baseline row exists for the product key. Scoring treats this as
    /// "cold start", not as a store failure.
    #[error("no baseline for product key: {0}")]
    NoBaseline(String),

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
}

/// True when `err` is (or wraps) the daily-limit sentinel.
pub fn is_daily_limit(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<AppError>(), Some(AppError::DailyLimitReached))
}

/// True when `err` is (or wraps) the no-baseline sentinel.
pub fn is_no_baseline(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<AppError>(), Some(AppError::NoBaseline(_)))
}

/// True when `err` is (or wraps) a cancellation.
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<AppError>(), Some(AppError::Cancelled))
}
