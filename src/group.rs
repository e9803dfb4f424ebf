//! Pools grouped by a sharding key, created lazily on first use

use crate::config::PoolOption;
use crate::conn::{Conn, PooledConn, RawConn};
use crate::conn_pool::{ConnPool, DialFactory, Dialer};
use crate::element::{Element, ElementFactory};
use crate::errors::{PoolError, PoolResult};
use crate::metrics::GroupStats;
use crate::pool::SimplePool;

use dashmap::DashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Produces the element factory of the sub-pool for a key
pub trait GroupFactory<K, E: Element>: Send + Sync + 'static {
    fn factory(&self, key: &K) -> Arc<dyn ElementFactory<E>>;
}

impl<K, E, F, G> GroupFactory<K, E> for F
where
    E: Element,
    F: Fn(&K) -> G + Send + Sync + 'static,
    G: ElementFactory<E>,
{
    fn factory(&self, key: &K) -> Arc<dyn ElementFactory<E>> {
        Arc::new((self)(key))
    }
}

/// A [`SimplePool`] per key sharing one [`PoolOption`]
///
/// Sub-pools are created on first use of a key, exactly once even when
/// several callers race for the same unseen key, and live until the group
/// is closed. Lookups of existing keys only take a shard read lock.
pub struct SimplePoolGroup<K, E: Element> {
    shared: Arc<GroupShared<K, E>>,
}

struct GroupShared<K, E: Element> {
    pools: DashMap<K, SimplePool<E>>,
    option: Arc<PoolOption>,
    generator: Box<dyn GroupFactory<K, E>>,
    closed: AtomicBool,
}

impl<K, E: Element> Clone for SimplePoolGroup<K, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, E> SimplePoolGroup<K, E>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    E: Element,
{
    pub fn new<G>(option: PoolOption, generator: G) -> Self
    where
        G: GroupFactory<K, E>,
    {
        Self {
            shared: Arc::new(GroupShared {
                pools: DashMap::new(),
                option: Arc::new(option),
                generator: Box::new(generator),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Get an element from the sub-pool for `key`
    pub async fn get(&self, ctx: &CancellationToken, key: &K) -> PoolResult<E> {
        let pool = self.pool(key)?;
        pool.get(ctx).await
    }

    /// The sub-pool for `key`, created if needed
    pub fn pool(&self, key: &K) -> PoolResult<SimplePool<E>> {
        let shared = &self.shared;
        if shared.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }
        if let Some(pool) = shared.pools.get(key) {
            return Ok(pool.value().clone());
        }

        let pool = shared
            .pools
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(key = ?key, "creating sub-pool");
                SimplePool::with_shared(Arc::clone(&shared.option), shared.generator.factory(key))
            })
            .value()
            .clone();

        // A close racing with the insert may have missed this pool.
        if shared.closed.load(Ordering::SeqCst) {
            pool.close();
            return Err(PoolError::Closed);
        }
        Ok(pool)
    }

    /// Apply `f` to every idle element of every sub-pool
    ///
    /// `f` may call back into the group, including gets for new keys.
    pub fn range<F>(&self, mut f: F) -> PoolResult<()>
    where
        F: FnMut(&E) -> PoolResult<()>,
    {
        let pools: Vec<SimplePool<E>> =
            self.shared.pools.iter().map(|entry| entry.value().clone()).collect();
        for pool in pools {
            pool.range(&mut f)?;
        }
        Ok(())
    }

    /// Stats of every sub-pool, by key
    pub fn group_stats(&self) -> GroupStats<K> {
        GroupStats::new(
            self.shared
                .pools
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().stats()))
                .collect(),
        )
    }

    pub fn keys(&self) -> Vec<K> {
        self.shared.pools.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Close every sub-pool; later gets fail for every key
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for entry in self.shared.pools.iter() {
            entry.value().close();
        }
        debug!(pools = self.shared.pools.len(), "pool group closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn option(&self) -> &PoolOption {
        &self.shared.option
    }
}

/// Produces the dialer for a key, e.g. a destination address
pub trait GroupDialer<K, C>: Send + Sync + 'static {
    fn dialer(&self, key: &K) -> Arc<dyn Dialer<C>>;
}

impl<K, C, F, D> GroupDialer<K, C> for F
where
    F: Fn(&K) -> D + Send + Sync + 'static,
    D: Dialer<C>,
{
    fn dialer(&self, key: &K) -> Arc<dyn Dialer<C>> {
        Arc::new((self)(key))
    }
}

struct DialGroup<G> {
    dialers: G,
}

impl<K, C, G> GroupFactory<K, Conn<C>> for DialGroup<G>
where
    C: RawConn,
    G: GroupDialer<K, C>,
{
    fn factory(&self, key: &K) -> Arc<dyn ElementFactory<Conn<C>>> {
        Arc::new(DialFactory::new(self.dialers.dialer(key)))
    }
}

/// A connection pool per key
///
/// # Examples
///
/// ```no_run
/// use netpool::{ConnPoolGroup, PoolOption};
/// use std::net::SocketAddr;
/// use tokio::net::TcpStream;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let group: ConnPoolGroup<SocketAddr, TcpStream> =
///     ConnPoolGroup::new(PoolOption::default(), |addr: &SocketAddr| {
///         let addr = *addr;
///         move |_ctx: CancellationToken| TcpStream::connect(addr)
///     });
///
/// let backend: SocketAddr = "127.0.0.1:8080".parse()?;
/// let conn = group.get(&CancellationToken::new(), &backend).await?;
/// conn.close()?;
/// # Ok(())
/// # }
/// ```
pub struct ConnPoolGroup<K, C: RawConn> {
    raw: SimplePoolGroup<K, Conn<C>>,
}

impl<K, C: RawConn> Clone for ConnPoolGroup<K, C> {
    fn clone(&self) -> Self {
        Self { raw: self.raw.clone() }
    }
}

impl<K, C> ConnPoolGroup<K, C>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    C: RawConn,
{
    pub fn new<G>(option: PoolOption, dialers: G) -> Self
    where
        G: GroupDialer<K, C>,
    {
        Self {
            raw: SimplePoolGroup::new(option, DialGroup { dialers }),
        }
    }

    /// Get a connection to `key`
    pub async fn get(&self, ctx: &CancellationToken, key: &K) -> PoolResult<PooledConn<C>> {
        self.pool(key)?.get(ctx).await
    }

    /// The connection pool for `key`, created if needed
    pub fn pool(&self, key: &K) -> PoolResult<ConnPool<C>> {
        self.raw.pool(key).map(ConnPool::from_raw)
    }

    pub fn range<F>(&self, f: F) -> PoolResult<()>
    where
        F: FnMut(&Conn<C>) -> PoolResult<()>,
    {
        self.raw.range(f)
    }

    pub fn group_stats(&self) -> GroupStats<K> {
        self.raw.group_stats()
    }

    pub fn keys(&self) -> Vec<K> {
        self.raw.keys()
    }

    pub fn close(&self) {
        self.raw.close();
    }

    pub fn is_closed(&self) -> bool {
        self.raw.is_closed()
    }

    pub fn option(&self) -> &PoolOption {
        self.raw.option()
    }
}
