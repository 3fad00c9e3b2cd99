//! Time and identifier sources.
//!
//! Every component reads time through the [`Clock`] trait so that expiry can
//! be driven deterministically in tests with a [`MockClock`]. Identifiers are
//! drawn from a [`Sequence`] owned by the table they key.

use std::{
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::governance::infrastructure::naming::Timestamp;

/// Source of timestamps shared by the engine components.
pub trait Clock: Debug + Send + Sync {
    /// Current time. Successive calls never go backwards.
    fn now(&self) -> Timestamp;
}

/// Wall clock that never hands out a timestamp older than a previous one.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: AtomicU64,
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        let previous = self.last.fetch_max(wall, Ordering::AcqRel);
        Timestamp(previous.max(wall))
    }
}

/// Manually driven clock for tests and simulations.
///
/// Clones share the same underlying time.
#[derive(Debug, Clone, Default)]
pub struct MockClock {
    now: Arc<AtomicU64>,
}

impl MockClock {
    pub fn new(start: Timestamp) -> Self {
        Self { now: Arc::new(AtomicU64::new(start.0)) }
    }

    pub fn set(&self, at: Timestamp) {
        self.now.store(at.0, Ordering::Release);
    }

    pub fn advance(&self, by: Duration) {
        let millis = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.now.fetch_add(millis, Ordering::AcqRel);
    }
}

impl Clock for MockClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now.load(Ordering::Acquire))
    }
}

/// Monotonic identifier source, starting at 1.
#[derive(Debug, Clone, Default)]
pub struct Sequence(Arc<AtomicU64>);

impl Sequence {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}
