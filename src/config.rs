//! Pool configuration options

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration shared by every element of a pool
///
/// A zero `max_idle_time` or `max_life_time` means unbounded. A zero
/// `max_open` means the pool never blocks on capacity.
///
/// # Examples
///
/// ```
/// use netpool::PoolOption;
/// use std::time::Duration;
///
/// let option = PoolOption::new()
///     .with_max_open(16)
///     .with_max_idle(4)
///     .with_max_idle_time(Duration::from_secs(90))
///     .with_max_life_time(Duration::from_secs(3600));
///
/// assert_eq!(option.max_open, 16);
/// assert_eq!(option.max_idle, 4);
/// assert_eq!(option.wait_timeout, Some(Duration::from_secs(30)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolOption {
    /// Maximum number of elements, idle or checked out, that may exist at once
    pub max_open: usize,

    /// Maximum number of idle elements kept for reuse
    pub max_idle: usize,

    /// An element idle for longer than this is evicted on next validation
    pub max_idle_time: Duration,

    /// An element older than this is evicted regardless of use
    pub max_life_time: Duration,

    /// How long `get` waits for an element when the pool is at capacity
    pub wait_timeout: Option<Duration>,

    /// Treat an indeterminate liveness probe as a failed one
    pub strict_liveness: bool,
}

impl Default for PoolOption {
    fn default() -> Self {
        Self {
            max_open: 100,
            max_idle: 0,
            max_idle_time: Duration::ZERO,
            max_life_time: Duration::ZERO,
            wait_timeout: Some(Duration::from_secs(30)),
            strict_liveness: false,
        }
    }
}

impl PoolOption {
    /// Create a new option with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of open elements, zero for unbounded
    pub fn with_max_open(mut self, max_open: usize) -> Self {
        self.max_open = max_open;
        self
    }

    /// Set the maximum number of idle elements, zero for no separate limit
    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    pub fn with_max_idle_time(mut self, max_idle_time: Duration) -> Self {
        self.max_idle_time = max_idle_time;
        self
    }

    pub fn with_max_life_time(mut self, max_life_time: Duration) -> Self {
        self.max_life_time = max_life_time;
        self
    }

    /// Set how long `get` may wait when the pool is at capacity
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Wait for capacity until the caller cancels
    pub fn without_wait_timeout(mut self) -> Self {
        self.wait_timeout = None;
        self
    }

    /// Reject connections whose liveness cannot be determined
    ///
    /// # Examples
    ///
    /// ```
    /// use netpool::PoolOption;
    ///
    /// let option = PoolOption::new().with_strict_liveness(true);
    /// assert!(option.strict_liveness);
    /// ```
    pub fn with_strict_liveness(mut self, strict: bool) -> Self {
        self.strict_liveness = strict;
        self
    }

    /// Whether `idle` more elements is over the idle limit
    pub(crate) fn idle_full(&self, idle: usize) -> bool {
        let limit = if self.max_idle > 0 { self.max_idle } else { self.max_open };
        limit > 0 && idle >= limit
    }

    /// Whether `open` elements already consume all capacity
    pub(crate) fn open_full(&self, open: usize) -> bool {
        self.max_open > 0 && open >= self.max_open
    }
}
