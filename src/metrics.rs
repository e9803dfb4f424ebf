//! Statistics collection and export for pools and pool groups

use crate::errors::PoolError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::ops::Add;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Immutable snapshot of a pool's counters
///
/// # Examples
///
/// ```
/// use netpool::Stats;
///
/// let a = Stats { open: 2, idle: 1, in_use: 1, created: 3, ..Default::default() };
/// let b = Stats { open: 1, idle: 1, created: 1, ..Default::default() };
///
/// let total = a + b;
/// assert_eq!(total.open, 3);
/// assert_eq!(total.created, 4);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Stats {
    /// Configured capacity, zero for unbounded
    pub max_open: usize,

    /// Elements that exist right now, idle or checked out or being created
    pub open: usize,

    /// Elements available for reuse
    pub idle: usize,

    /// Elements checked out by callers
    pub in_use: usize,

    /// Elements ever created
    pub created: u64,

    /// Elements ever discarded, for any reason
    pub discarded: u64,

    /// Elements discarded for exceeding the max idle time
    pub max_idle_time_closed: u64,

    /// Elements discarded for exceeding the max life time
    pub max_life_time_closed: u64,

    /// Number of `get` calls that had to wait
    pub wait_count: u64,

    /// Total time spent waiting
    pub wait_duration: Duration,
}

impl Stats {
    /// Export stats as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut stats = HashMap::new();
        stats.insert("max_open".to_string(), self.max_open.to_string());
        stats.insert("open".to_string(), self.open.to_string());
        stats.insert("idle".to_string(), self.idle.to_string());
        stats.insert("in_use".to_string(), self.in_use.to_string());
        stats.insert("created".to_string(), self.created.to_string());
        stats.insert("discarded".to_string(), self.discarded.to_string());
        stats.insert("max_idle_time_closed".to_string(), self.max_idle_time_closed.to_string());
        stats.insert("max_life_time_closed".to_string(), self.max_life_time_closed.to_string());
        stats.insert("wait_count".to_string(), self.wait_count.to_string());
        stats.insert("wait_duration_ms".to_string(), self.wait_duration.as_millis().to_string());
        stats
    }
}

impl Add for Stats {
    type Output = Stats;

    fn add(self, other: Stats) -> Stats {
        Stats {
            max_open: self.max_open + other.max_open,
            open: self.open + other.open,
            idle: self.idle + other.idle,
            in_use: self.in_use + other.in_use,
            created: self.created + other.created,
            discarded: self.discarded + other.discarded,
            max_idle_time_closed: self.max_idle_time_closed + other.max_idle_time_closed,
            max_life_time_closed: self.max_life_time_closed + other.max_life_time_closed,
            wait_count: self.wait_count + other.wait_count,
            wait_duration: self.wait_duration + other.wait_duration,
        }
    }
}

/// Stats of every sub-pool of a group, by key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupStats<K: Eq + Hash> {
    pools: HashMap<K, Stats>,
}

impl<K: Eq + Hash> GroupStats<K> {
    pub(crate) fn new(pools: HashMap<K, Stats>) -> Self {
        Self { pools }
    }

    pub fn get(&self, key: &K) -> Option<&Stats> {
        self.pools.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &Stats)> {
        self.pools.iter()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Sum of all sub-pool stats
    pub fn total(&self) -> Stats {
        self.pools.values().fold(Stats::default(), |total, stats| total + *stats)
    }

    pub fn into_inner(self) -> HashMap<K, Stats> {
        self.pools
    }

    /// Re-key the stats by the display form of each key
    pub fn to_string_keys(&self) -> GroupStats<String>
    where
        K: Display,
    {
        GroupStats::new(self.pools.iter().map(|(k, v)| (k.to_string(), *v)).collect())
    }
}

/// Stats of a registered pool or group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    Pool(Stats),
    Group(GroupStats<String>),
}

impl Snapshot {
    pub fn total(&self) -> Stats {
        match self {
            Snapshot::Pool(stats) => *stats,
            Snapshot::Group(group) => group.total(),
        }
    }
}

/// Metrics exporter for Prometheus format
pub struct MetricsExporter;

impl MetricsExporter {
    /// Export a pool's stats in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use netpool::{MetricsExporter, Stats};
    /// use std::collections::HashMap;
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = MetricsExporter::export_prometheus(&Stats::default(), "backend", Some(&tags));
    /// assert!(output.contains("netpool_elements_in_use"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        stats: &Stats,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        Self::write_headers(&mut output);
        Self::write_samples(&mut output, stats, &Self::format_labels(pool_name, None, tags));
        output
    }

    /// Export a group's stats, one labelled series per key
    pub fn export_group_prometheus<K: Eq + Hash + Display>(
        stats: &GroupStats<K>,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        Self::write_headers(&mut output);
        for (key, stats) in stats.iter() {
            let labels = Self::format_labels(pool_name, Some(&key.to_string()), tags);
            Self::write_samples(&mut output, stats, &labels);
        }
        output
    }

    /// Export every entry of a registry
    pub fn export_registry(registry: &crate::registry::Registry) -> String {
        let mut output = String::new();
        Self::write_headers(&mut output);
        for (name, snapshot) in registry.snapshot() {
            match snapshot {
                Snapshot::Pool(stats) => {
                    let labels = Self::format_labels(&name, None, None);
                    Self::write_samples(&mut output, &stats, &labels);
                }
                Snapshot::Group(group) => {
                    for (key, stats) in group.iter() {
                        let labels = Self::format_labels(&name, Some(key.as_str()), None);
                        Self::write_samples(&mut output, stats, &labels);
                    }
                }
            }
        }
        output
    }

    fn write_headers(output: &mut String) {
        for (name, kind, help) in SERIES {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} {}\n", name, kind));
        }
    }

    fn write_samples(output: &mut String, stats: &Stats, labels: &str) {
        let values = [
            stats.open as u64,
            stats.idle as u64,
            stats.in_use as u64,
            stats.max_open as u64,
            stats.created,
            stats.discarded,
            stats.max_idle_time_closed,
            stats.max_life_time_closed,
            stats.wait_count,
        ];
        for ((name, _, _), value) in SERIES.iter().zip(values) {
            output.push_str(&format!("{}{{{}}} {}\n", name, labels, value));
        }
        output.push_str(&format!(
            "netpool_wait_seconds_total{{{}}} {:.3}\n",
            labels,
            stats.wait_duration.as_secs_f64()
        ));
    }

    fn format_labels(
        pool_name: &str,
        key: Option<&str>,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(key) = key {
            labels.push(format!("key=\"{}\"", key));
        }
        if let Some(tags) = tags {
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

const SERIES: [(&str, &str, &str); 10] = [
    ("netpool_elements_open", "gauge", "Elements currently open"),
    ("netpool_elements_idle", "gauge", "Elements available for reuse"),
    ("netpool_elements_in_use", "gauge", "Elements checked out"),
    ("netpool_elements_max_open", "gauge", "Configured capacity"),
    ("netpool_elements_created_total", "counter", "Elements created"),
    ("netpool_elements_discarded_total", "counter", "Elements discarded"),
    ("netpool_max_idle_time_closed_total", "counter", "Elements discarded for idleness"),
    ("netpool_max_life_time_closed_total", "counter", "Elements discarded for age"),
    ("netpool_waits_total", "counter", "Gets that waited for an element"),
    ("netpool_wait_seconds_total", "counter", "Time spent waiting for an element"),
];

/// Internal counters tracker
pub(crate) struct MetricsTracker {
    created: AtomicU64,
    discarded: AtomicU64,
    max_idle_time_closed: AtomicU64,
    max_life_time_closed: AtomicU64,
    wait_count: AtomicU64,
    wait_nanos: AtomicU64,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            created: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            max_idle_time_closed: AtomicU64::new(0),
            max_life_time_closed: AtomicU64::new(0),
            wait_count: AtomicU64::new(0),
            wait_nanos: AtomicU64::new(0),
        }
    }

    pub fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self, reason: &PoolError) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        match reason {
            PoolError::OutOfMaxIdleTime => {
                self.max_idle_time_closed.fetch_add(1, Ordering::Relaxed);
            }
            PoolError::OutOfMaxLife => {
                self.max_life_time_closed.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn record_wait(&self, waited: Duration) {
        self.wait_count.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(waited.as_nanos()).unwrap_or(u64::MAX);
        self.wait_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn get_stats(&self, max_open: usize, open: usize, idle: usize, in_use: usize) -> Stats {
        Stats {
            max_open,
            open,
            idle,
            in_use,
            created: self.created.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            max_idle_time_closed: self.max_idle_time_closed.load(Ordering::Relaxed),
            max_life_time_closed: self.max_life_time_closed.load(Ordering::Relaxed),
            wait_count: self.wait_count.load(Ordering::Relaxed),
            wait_duration: Duration::from_nanos(self.wait_nanos.load(Ordering::Relaxed)),
        }
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}
