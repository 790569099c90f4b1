//! Time and randomness seams.
//!
//! Strategies and workers never call `tokio::time` or a random generator
//! directly; they go through [`Clock`] and [`RandomSource`] so tests can run
//! on virtual time with fixed jitter.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Source of wall-clock time and delays.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Suspend for `duration`. Sleeps are never cancelled once started.
    async fn sleep(&self, duration: Duration);
}

/// Real clock backed by tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock: sleeping advances time instantly and is recorded.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualClockState>>,
}

#[derive(Debug)]
struct ManualClockState {
    now: DateTime<Utc>,
    sleeps: Vec<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_at(Utc::now())
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualClockState {
                now,
                sleeps: Vec::new(),
            })),
        }
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner.lock().sleeps.clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.inner.lock().sleeps.iter().sum()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.inner.lock().now
    }

    async fn sleep(&self, duration: Duration) {
        {
            let mut state = self.inner.lock();
            state.sleeps.push(duration);
            state.now += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
        }
        tokio::task::yield_now().await;
    }
}

/// Outcome of racing a future against a deadline.
#[derive(Debug, PartialEq, Eq)]
pub enum Deadline<T> {
    Completed(T),
    Elapsed,
}

/// Race `work` against a sleep of `limit` on `clock`.
///
/// Whichever settles first wins. When the deadline wins, `work` is dropped
/// here, but anything it already handed off (spawned tasks, remote calls)
/// keeps running.
pub async fn with_deadline<F>(clock: &dyn Clock, limit: Duration, work: F) -> Deadline<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        out = work => Deadline::Completed(out),
        _ = clock.sleep(limit) => Deadline::Elapsed,
    }
}

/// Uniform random numbers in `[0, 1)`.
pub trait RandomSource: Send + Sync {
    fn next_f64(&self) -> f64;
}

/// `fastrand`-backed source; seedable for reproducible runs.
#[derive(Debug)]
pub struct FastRandom {
    rng: Mutex<fastrand::Rng>,
}

impl FastRandom {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(fastrand::Rng::new()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(fastrand::Rng::with_seed(seed)),
        }
    }
}

impl Default for FastRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for FastRandom {
    fn next_f64(&self) -> f64 {
        self.rng.lock().f64()
    }
}

/// Always returns the same value. 0.5 means "no jitter".
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(pub f64);

impl RandomSource for FixedRandom {
    fn next_f64(&self) -> f64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_clock_records_and_advances() {
        let start = Utc::now();
        let clock = ManualClock::starting_at(start);

        clock.sleep(Duration::from_millis(1500)).await;
        clock.sleep(Duration::from_millis(500)).await;

        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(1500), Duration::from_millis(500)]
        );
        assert_eq!(clock.total_slept(), Duration::from_secs(2));
        assert_eq!((clock.now() - start).num_milliseconds(), 2000);
    }

    #[tokio::test]
    async fn deadline_prefers_ready_work() {
        let clock = ManualClock::new();
        let out = with_deadline(&clock, Duration::from_secs(1), async { 7 }).await;
        assert_eq!(out, Deadline::Completed(7));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_elapses_on_slow_work() {
        let clock = TokioClock;
        let out = with_deadline(&clock, Duration::from_millis(100), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            1
        })
        .await;
        assert_eq!(out, Deadline::Elapsed);
    }

    #[test]
    fn seeded_random_is_reproducible() {
        let a = FastRandom::seeded(42);
        let b = FastRandom::seeded(42);
        for _ in 0..10 {
            let x = a.next_f64();
            assert_eq!(x, b.next_f64());
            assert!((0.0..1.0).contains(&x));
        }
    }
}
