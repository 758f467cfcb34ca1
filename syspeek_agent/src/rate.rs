//! Turns monotonically increasing kernel counters into per-second rates.
//!
//! One engine is shared by HTTP handlers and every stream session. Each
//! observation is a single critical section: the previous sample is read, the
//! delta computed and the new sample written back under the same lock, so
//! interleaved callers never lose an update. Counter decreases (wraparound,
//! device reset, pid reuse) clamp to zero and the new value becomes the
//! baseline immediately.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Lower bound on how long an unobserved key is retained.
pub const MIN_RETENTION: Duration = Duration::from_secs(60);

/// Elapsed time floor for back-to-back samples.
const MIN_ELAPSED_SECS: f64 = 1e-3;

/// Identity of a rate-tracked entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateKey {
    /// Aggregate CPU line (`None`) or a single core.
    Cpu(Option<usize>),
    Interface(String),
    Disk(String),
    Process(u32),
}

#[derive(Debug, Clone)]
struct RateState {
    counters: Vec<u64>,
    observed_at: Instant,
}

/// Clamped counter deltas since the previous observation of a key.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub deltas: Vec<u64>,
    pub elapsed_secs: f64,
}

impl Delta {
    /// Per-second rate of the counter at `idx`.
    pub fn rate(&self, idx: usize) -> f64 {
        self.deltas.get(idx).copied().unwrap_or(0) as f64 / self.elapsed_secs
    }
}

#[derive(Debug, Default)]
pub struct RateEngine {
    state: Mutex<HashMap<RateKey, RateState>>,
}

impl RateEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `counters` for `key` and returns deltas against the previous sample.
    ///
    /// Returns `None` on the first observation of a key (or when the number of
    /// counters changed); callers must not treat that as a measurement.
    pub fn observe_counters(&self, key: RateKey, counters: &[u64], now: Instant) -> Option<Delta> {
        let mut map = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let next = RateState {
            counters: counters.to_vec(),
            observed_at: now,
        };
        let prev = map.insert(key, next)?;
        if prev.counters.len() != counters.len() {
            return None;
        }
        let elapsed = now
            .checked_duration_since(prev.observed_at)
            .unwrap_or(Duration::ZERO)
            .as_secs_f64()
            .max(MIN_ELAPSED_SECS);
        let deltas = counters
            .iter()
            .zip(&prev.counters)
            .map(|(cur, old)| cur.saturating_sub(*old))
            .collect();
        Some(Delta {
            deltas,
            elapsed_secs: elapsed,
        })
    }

    /// Per-second rate of a single cumulative counter. `None` on first sight.
    pub fn observe(&self, key: RateKey, value: u64, now: Instant) -> Option<f64> {
        self.observe_counters(key, &[value], now).map(|d| d.rate(0))
    }

    /// Drops entries not observed within `max_age` of `now`. Returns how many went.
    pub fn evict_stale(&self, max_age: Duration, now: Instant) -> usize {
        let mut map = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let before = map.len();
        map.retain(|_, s| now.saturating_duration_since(s.observed_at) <= max_age);
        before - map.len()
    }

    /// Retention for a given longest sampling period: three periods, at least a minute.
    pub fn retention_for(longest_interval: Duration) -> Duration {
        (longest_interval * 3).max(MIN_RETENTION)
    }

    /// Background eviction of keys idle for longer than `retention`.
    pub fn spawn_janitor(
        self: &Arc<Self>,
        retention: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(retention);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = tokio::time::Instant::now().into_std();
                        let n = engine.evict_stale(retention, now);
                        if n > 0 {
                            debug!("evicted {n} idle rate entries");
                        }
                    }
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
