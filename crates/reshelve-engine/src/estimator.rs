//! Progress and remaining-time estimation for one execution root.
//!
//! # Design
//! - Counters are updated from worker threads behind a single mutex.
//! - The rate comes from a sliding window of recent completion instants so the
//!   estimate follows the current throughput; the run-wide average is the
//!   fallback while the window spans no time.
//! - Nothing is estimated until at least one record has finished.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::error;

const MAX_WINDOW: u64 = 50;

#[derive(Debug)]
struct EstimatorState {
    total: u64,
    started: u64,
    completed: u64,
    failed: u64,
    began: Option<Instant>,
    window: VecDeque<Instant>,
    window_size: usize,
}

/// Thread-safe progress counters for one root.
#[derive(Debug)]
pub struct TaskEstimator {
    state: Mutex<EstimatorState>,
}

impl TaskEstimator {
    /// Estimator for `total` scheduled records.
    #[must_use]
    pub fn new(total: u64) -> Self {
        let window_size = usize::try_from((total / 20).clamp(1, MAX_WINDOW)).unwrap_or(1);
        Self {
            state: Mutex::new(EstimatorState {
                total,
                started: 0,
                completed: 0,
                failed: 0,
                began: None,
                window: VecDeque::with_capacity(window_size),
                window_size,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EstimatorState> {
        self.state.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            error!("task estimator mutex poisoned; continuing with inner state");
            poisoned.into_inner()
        })
    }

    /// Count a dispatched record.
    pub fn started(&self) {
        self.started_at(Instant::now());
    }

    /// Count a dispatched record at `now`.
    pub fn started_at(&self, now: Instant) {
        let mut state = self.lock();
        state.started += 1;
        state.began.get_or_insert(now);
    }

    /// Count a finished record.
    pub fn finished(&self, success: bool) {
        self.finished_at(success, Instant::now());
    }

    /// Count a finished record at `now`.
    pub fn finished_at(&self, success: bool, now: Instant) {
        let mut state = self.lock();
        if success {
            state.completed += 1;
        } else {
            state.failed += 1;
        }
        state.began.get_or_insert(now);
        if state.window.len() == state.window_size {
            state.window.pop_front();
        }
        state.window.push_back(now);
    }

    /// Records scheduled.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.lock().total
    }

    /// Records finished, successfully or not.
    #[must_use]
    pub fn done(&self) -> u64 {
        let state = self.lock();
        state.completed + state.failed
    }

    /// Records dispatched but not yet finished.
    #[must_use]
    pub fn running(&self) -> u64 {
        let state = self.lock();
        state
            .started
            .saturating_sub(state.completed)
            .saturating_sub(state.failed)
    }

    /// Records that finished with a failure.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.lock().failed
    }

    /// Fraction done in `[0, 1]`; an empty schedule counts as complete.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress(&self) -> f64 {
        let state = self.lock();
        if state.total == 0 {
            return 1.0;
        }
        ((state.completed + state.failed) as f64 / state.total as f64).min(1.0)
    }

    /// Estimated time until every record is done.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.remaining_at(Instant::now())
    }

    /// Estimated remaining time as seen at `now`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn remaining_at(&self, now: Instant) -> Option<Duration> {
        let state = self.lock();
        let done = state.completed + state.failed;
        if done == 0 {
            return None;
        }
        let left = state.total.saturating_sub(done);
        if left == 0 {
            return Some(Duration::ZERO);
        }

        let windowed = match (state.window.front(), state.window.back()) {
            (Some(first), Some(last)) if state.window.len() > 1 && last > first => {
                Some((state.window.len() - 1) as f64 / last.duration_since(*first).as_secs_f64())
            }
            _ => None,
        };
        let rate = windowed.or_else(|| {
            let elapsed = now.duration_since(state.began?).as_secs_f64();
            (elapsed > 0.0).then(|| done as f64 / elapsed)
        })?;
        Duration::try_from_secs_f64(left as f64 / rate).ok()
    }
}

/// Render a duration as `HH:MM:SS`; hours are not wrapped.
#[must_use]
pub fn format_hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
