//! Named pools and groups for configuration-driven lookup and metrics export
//!
//! Register every pool during startup, before the first lookup. Lookups of
//! names that were never registered return `None`.

use crate::conn::RawConn;
use crate::conn_pool::ConnPool;
use crate::element::Element;
use crate::errors::{PoolError, PoolResult};
use crate::group::{ConnPoolGroup, SimplePoolGroup};
use crate::health::HealthStatus;
use crate::metrics::Snapshot;
use crate::pool::SimplePool;

use parking_lot::RwLock;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::sync::OnceLock;
use tracing::debug;

/// Something whose stats can be snapshotted by a registry
pub trait Observable: Send + Sync + 'static {
    fn snapshot(&self) -> Snapshot;
}

impl<E: Element> Observable for SimplePool<E> {
    fn snapshot(&self) -> Snapshot {
        Snapshot::Pool(self.stats())
    }
}

impl<C: RawConn> Observable for ConnPool<C> {
    fn snapshot(&self) -> Snapshot {
        Snapshot::Pool(self.stats())
    }
}

impl<K, E> Observable for SimplePoolGroup<K, E>
where
    K: Eq + Hash + Clone + Debug + Display + Send + Sync + 'static,
    E: Element,
{
    fn snapshot(&self) -> Snapshot {
        Snapshot::Group(self.group_stats().to_string_keys())
    }
}

impl<K, C> Observable for ConnPoolGroup<K, C>
where
    K: Eq + Hash + Clone + Debug + Display + Send + Sync + 'static,
    C: RawConn,
{
    fn snapshot(&self) -> Snapshot {
        Snapshot::Group(self.group_stats().to_string_keys())
    }
}

struct Entry {
    instance: Box<dyn Any + Send + Sync>,
    observe: Box<dyn Fn() -> Snapshot + Send + Sync>,
}

/// Name to pool mapping
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool or group under `name`
    pub fn register<P>(&self, name: impl Into<String>, pool: P) -> PoolResult<()>
    where
        P: Observable + Clone,
    {
        let name = name.into();
        let mut entries = self.entries.write();
        if entries.contains_key(&name) {
            return Err(PoolError::AlreadyRegistered(name));
        }

        let observed = pool.clone();
        debug!(name = %name, "registering pool");
        entries.insert(
            name,
            Entry {
                instance: Box::new(pool),
                observe: Box::new(move || observed.snapshot()),
            },
        );
        Ok(())
    }

    /// The pool registered under `name`, if it has type `P`
    pub fn lookup<P: Clone + 'static>(&self, name: &str) -> Option<P> {
        let entries = self.entries.read();
        entries.get(name)?.instance.downcast_ref::<P>().cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stats of every registered entry, by name
    pub fn snapshot(&self) -> BTreeMap<String, Snapshot> {
        let entries = self.entries.read();
        entries.iter().map(|(name, entry)| (name.clone(), (entry.observe)())).collect()
    }

    /// Health of every registered entry, summed over group members
    pub fn health(&self) -> BTreeMap<String, HealthStatus> {
        self.snapshot()
            .into_iter()
            .map(|(name, snapshot)| (name, HealthStatus::new(&snapshot.total())))
            .collect()
    }
}

/// Process-wide registry
pub fn global() -> &'static Registry {
    static GLOBAL: OnceLock<Registry> = OnceLock::new();
    GLOBAL.get_or_init(Registry::new)
}
