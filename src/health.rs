//! Health summary of a pool

use crate::metrics::Stats;

/// Health status derived from a pool's stats
///
/// # Examples
///
/// ```
/// use netpool::{HealthStatus, Stats};
///
/// let stats = Stats { max_open: 10, open: 3, idle: 2, in_use: 1, ..Default::default() };
/// let health = HealthStatus::new(&stats);
///
/// assert!(health.is_healthy());
/// assert_eq!(health.idle_elements, 2);
/// ```
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Checked-out elements relative to capacity (0.0 to 1.0), zero when unbounded
    pub utilization: f64,

    pub idle_elements: usize,

    pub in_use_elements: usize,

    /// Zero for unbounded pools
    pub max_open: usize,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    pub fn new(stats: &Stats) -> Self {
        let utilization = if stats.max_open > 0 {
            stats.in_use as f64 / stats.max_open as f64
        } else {
            0.0
        };

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", utilization * 100.0));
            is_healthy = false;
        }

        if stats.max_open > 0 && stats.open >= stats.max_open && stats.idle == 0 {
            warnings.push("Pool is saturated, gets will wait".to_string());
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization,
            idle_elements: stats.idle,
            in_use_elements: stats.in_use,
            max_open: stats.max_open,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}
