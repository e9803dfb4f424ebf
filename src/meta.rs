//! Usage and lifetime metadata tracked per pooled element

use crate::config::PoolOption;
use crate::errors::{PoolError, PoolResult};

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Immutable copy of an element's metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Meta {
    /// When the element was created
    pub create_time: Instant,

    /// Last time the element was checked out or returned
    pub last_use_time: Instant,

    /// How many times the element has been checked out
    pub used_times: u64,

    /// Total time the element spent checked out
    pub used_duration: Duration,

    /// Whether the element is currently checked out
    pub using: bool,
}

impl Meta {
    /// Time since creation
    pub fn age(&self) -> Duration {
        self.create_time.elapsed()
    }

    /// Time since the last checkout or return
    pub fn idle_for(&self) -> Duration {
        self.last_use_time.elapsed()
    }
}

impl fmt::Display for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "age={:?} idle={:?} used_times={} used_duration={:?} using={}",
            self.age(),
            self.idle_for(),
            self.used_times,
            self.used_duration,
            self.using
        )
    }
}

#[derive(Debug)]
struct MetaState {
    last_use_time: Instant,
    used_times: u64,
    used_duration: Duration,
    using: bool,
}

/// Metadata tracker owned by exactly one element
///
/// Both transitions happen under a private lock, so no reader observes a
/// half-applied state.
#[derive(Debug)]
pub struct MetaInfo {
    create_time: Instant,
    state: Mutex<MetaState>,
    /// Id of the pool that created the element, zero until claimed
    owner: AtomicU64,
}

impl MetaInfo {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            create_time: now,
            state: Mutex::new(MetaState {
                last_use_time: now,
                used_times: 0,
                used_duration: Duration::ZERO,
                using: false,
            }),
            owner: AtomicU64::new(0),
        }
    }

    pub(crate) fn claim(&self, pool_id: u64) {
        self.owner.store(pool_id, Ordering::Release);
    }

    pub(crate) fn owner(&self) -> u64 {
        self.owner.load(Ordering::Acquire)
    }

    /// Mark the element as checked out
    pub fn mark_using(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        let last = state.last_use_time;
        state.using = true;
        state.last_use_time = last.max(now);
        state.used_times += 1;
    }

    /// Mark the element as idle again, accounting the time it was in use
    pub fn mark_idle(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        let last = state.last_use_time;
        if state.using {
            state.used_duration += now.saturating_duration_since(last);
        }
        state.last_use_time = last.max(now);
        state.using = false;
    }

    /// Check the element against the pool's idle and life limits
    pub fn is_active(&self, option: &PoolOption) -> PoolResult<()> {
        let last_use = self.state.lock().last_use_time;

        if !option.max_idle_time.is_zero() && last_use.elapsed() >= option.max_idle_time {
            return Err(PoolError::OutOfMaxIdleTime);
        }
        if !option.max_life_time.is_zero() && self.create_time.elapsed() >= option.max_life_time {
            return Err(PoolError::OutOfMaxLife);
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Meta {
        let state = self.state.lock();
        Meta {
            create_time: self.create_time,
            last_use_time: state.last_use_time,
            used_times: state.used_times,
            used_duration: state.used_duration,
            using: state.using,
        }
    }
}

impl Default for MetaInfo {
    fn default() -> Self {
        Self::new()
    }
}
