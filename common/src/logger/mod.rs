use std::time::Duration;

use once_cell::sync::OnceCell;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Initialize the process-global tracing subscriber.
///
/// Pretty output for local runs, JSON lines when `json` is set
/// (production). Safe to call more than once; only the first call wins,
/// which keeps test binaries from panicking on double-init.
pub fn init_tracing(json: bool) {
    TRACING_INIT.get_or_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let base = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .with_file(true)
            // Includes timing when the span closes
            .with_span_events(fmt::format::FmtSpan::CLOSE);

        if json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(base.json())
                .init();
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(base.pretty())
                .init();
        }
    });
}

/// Await `fut` and warn when it overran `threshold`.
///
/// Store scans and outbound HTTP in this system are expected to finish
/// well under their threshold; an overrun usually points at a missing
/// index or a saturated pool, so the warning carries the operation name
/// and how far past the threshold it went.
pub async fn warn_slow_op<F, T>(op: &'static str, threshold: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let started = std::time::Instant::now();
    let out = fut.await;
    let took = started.elapsed();
    if took > threshold {
        let over = took - threshold;
        tracing::warn!(
            target: "latency",
            op,
            took_ms = took.as_millis() as u64,
            over_ms = over.as_millis() as u64,
            "operation exceeded its latency threshold"
        );
    }
    out
}
