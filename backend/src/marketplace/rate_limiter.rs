//! In-process marketplace rate limiter: per-second refill with burst plus a
//! daily quota, reconcilable against the marketplace's authoritative
//! numbers.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::AppError;
use crate::model::RateLimitSnapshot;
use crate::time::now_ms;

pub struct RateLimiter {
    rate_per_sec: f64,
    burst: f64,
    inner: Mutex<Inner>,
}

struct Inner {
    tokens: f64,
    last_refill: Instant,
    daily_count: u64,
    daily_max: u64,
    reset_at_ms: u64,
}

impl RateLimiter {
    pub fn new(rate_per_sec: f64, burst: u32, daily_max: u64) -> Self {
        Self {
            rate_per_sec: rate_per_sec.max(0.001),
            burst: burst.max(1) as f64,
            inner: Mutex::new(Inner {
                tokens: burst.max(1) as f64,
                last_refill: Instant::now(),
                daily_count: 0,
                daily_max,
                reset_at_ms: next_utc_midnight_ms(),
            }),
        }
    }

    /// Apply a persisted snapshot, e.g. on restart.
    pub fn restore(&self, snapshot: &RateLimitSnapshot) {
        let mut inner = self.inner.lock();
        inner.daily_count = snapshot.daily_count;
        inner.daily_max = snapshot.daily_max;
        inner.reset_at_ms = snapshot.reset_at_ms;
    }

    /// Take one permit, waiting for the per-second refill when bursty.
    ///
    /// Returns the `DailyLimitReached` sentinel once the daily budget is
    /// spent; the daily counter rolls over at the reset timestamp.
    pub async fn acquire(&self) -> anyhow::Result<()> {
        loop {
            let wait = {
                let mut inner = self.inner.lock();
                self.roll_daily(&mut inner);

                if inner.daily_count >= inner.daily_max {
                    return Err(AppError::DailyLimitReached.into());
                }

                self.refill(&mut inner);
                if inner.tokens >= 1.0 {
                    inner.tokens -= 1.0;
                    inner.daily_count += 1;
                    None
                } else {
                    let deficit = 1.0 - inner.tokens;
                    Some(Duration::from_secs_f64(deficit / self.rate_per_sec))
                }
            };

            match wait {
                None => return Ok(()),
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }

    /// Reconcile with the marketplace's authoritative quota numbers.
    ///
    /// The reset timestamp only ever advances.
    pub fn sync(&self, count: u64, limit: u64, reset_at_ms: u64) {
        let mut inner = self.inner.lock();
        inner.daily_count = count;
        inner.daily_max = limit;
        if reset_at_ms > inner.reset_at_ms {
            inner.reset_at_ms = reset_at_ms;
        }
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        let mut inner = self.inner.lock();
        self.roll_daily(&mut inner);
        RateLimitSnapshot {
            daily_count: inner.daily_count,
            daily_max: inner.daily_max,
            reset_at_ms: inner.reset_at_ms,
        }
    }

    fn refill(&self, inner: &mut Inner) {
        let elapsed = inner.last_refill.elapsed().as_secs_f64();
        inner.last_refill = Instant::now();
        inner.tokens = (inner.tokens + elapsed * self.rate_per_sec).min(self.burst);
    }

    fn roll_daily(&self, inner: &mut Inner) {
        let now = now_ms();
        if now >= inner.reset_at_ms {
            inner.daily_count = 0;
            while inner.reset_at_ms <= now {
                inner.reset_at_ms += 86_400_000;
            }
        }
    }
}

fn next_utc_midnight_ms() -> u64 {
    (now_ms() / 86_400_000 + 1) * 86_400_000
}
