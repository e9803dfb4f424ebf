//! Pool of network connections

use crate::config::PoolOption;
use crate::conn::{Conn, PooledConn, RawConn};
use crate::element::ElementFactory;
use crate::errors::PoolResult;
use crate::metrics::Stats;
use crate::pool::SimplePool;

use async_trait::async_trait;
use std::future::Future;
use std::io;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Establishes new raw connections
///
/// Implemented for any `Fn(CancellationToken) -> impl Future<Output = io::Result<C>>`.
/// Retrying failed dials is up to the dialer.
#[async_trait]
pub trait Dialer<C>: Send + Sync + 'static {
    async fn dial(&self, ctx: CancellationToken) -> io::Result<C>;
}

#[async_trait]
impl<C, F, Fut> Dialer<C> for F
where
    C: Send + 'static,
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = io::Result<C>> + Send + 'static,
{
    async fn dial(&self, ctx: CancellationToken) -> io::Result<C> {
        (self)(ctx).await
    }
}

/// Wraps every dialed connection in the pool adapter
pub(crate) struct DialFactory<C> {
    dialer: Arc<dyn Dialer<C>>,
    _phantom: PhantomData<fn() -> C>,
}

impl<C> DialFactory<C> {
    pub(crate) fn new(dialer: Arc<dyn Dialer<C>>) -> Self {
        Self {
            dialer,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<C: RawConn> ElementFactory<Conn<C>> for DialFactory<C> {
    async fn create(&self, ctx: CancellationToken) -> PoolResult<Conn<C>> {
        let raw = self.dialer.dial(ctx).await?;
        Ok(Conn::new(raw))
    }
}

/// Connection pool for a single endpoint
///
/// # Examples
///
/// ```no_run
/// use netpool::{ConnPool, PoolOption};
/// use tokio::io::AsyncWriteExt;
/// use tokio::net::TcpStream;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = ConnPool::new(PoolOption::default(), |_ctx: CancellationToken| {
///     TcpStream::connect("127.0.0.1:6379")
/// });
///
/// let mut conn = pool.get(&CancellationToken::new()).await?;
/// conn.write_all(b"PING\r\n").await?;
/// conn.close()?; // back to the pool
/// # Ok(())
/// # }
/// ```
pub struct ConnPool<C: RawConn> {
    raw: SimplePool<Conn<C>>,
}

impl<C: RawConn> Clone for ConnPool<C> {
    fn clone(&self) -> Self {
        Self { raw: self.raw.clone() }
    }
}

impl<C: RawConn> ConnPool<C> {
    pub fn new<D: Dialer<C>>(option: PoolOption, dialer: D) -> Self {
        Self::with_shared(Arc::new(option), Arc::new(dialer))
    }

    pub(crate) fn with_shared(option: Arc<PoolOption>, dialer: Arc<dyn Dialer<C>>) -> Self {
        Self {
            raw: SimplePool::with_shared(option, Arc::new(DialFactory::new(dialer))),
        }
    }

    pub(crate) fn from_raw(raw: SimplePool<Conn<C>>) -> Self {
        Self { raw }
    }

    /// Get a connection, dialing a new one when no idle one is usable
    pub async fn get(&self, ctx: &CancellationToken) -> PoolResult<PooledConn<C>> {
        let conn = self.raw.get(ctx).await?;
        Ok(PooledConn::new(conn, self.raw.downgrade()))
    }

    /// Apply `f` to every idle connection
    pub fn range<F>(&self, f: F) -> PoolResult<()>
    where
        F: FnMut(&Conn<C>) -> PoolResult<()>,
    {
        self.raw.range(f)
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

    pub fn stats(&self) -> Stats {
        self.raw.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PoolError;
    use crate::testing::{Pipe, echo_server};
    use parking_lot::Mutex;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::Instant;

    fn counting_pool(
        addr: SocketAddr,
        option: PoolOption,
    ) -> (ConnPool<TcpStream>, Arc<AtomicUsize>) {
        let dials = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&dials);
        let pool = ConnPool::new(option, move |_ctx: CancellationToken| {
            counter.fetch_add(1, Ordering::SeqCst);
            TcpStream::connect(addr)
        });
        (pool, dials)
    }

    async fn echo(conn: &mut PooledConn<TcpStream>, msg: &[u8]) {
        conn.write_all(msg).await.unwrap();
        let mut buf = vec![0u8; msg.len()];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, msg);
    }

    #[tokio::test]
    async fn test_close_returns_connection() {
        let addr = echo_server().await;
        let (pool, dials) = counting_pool(addr, PoolOption::default());
        let ctx = CancellationToken::new();

        let mut conn = pool.get(&ctx).await.unwrap();
        let local = conn.local_addr().unwrap();
        echo(&mut conn, b"hello").await;
        conn.close().unwrap();
        assert_eq!(pool.stats().idle, 1);

        let mut conn = pool.get(&ctx).await.unwrap();
        assert_eq!(conn.local_addr().unwrap(), local);
        echo(&mut conn, b"again").await;
        assert_eq!(conn.meta().used_times, 2);
        drop(conn);

        assert_eq!(dials.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test]
    async fn test_idle_timeout_dials_again() {
        let addr = echo_server().await;
        let option = PoolOption::new().with_max_idle_time(Duration::from_millis(50));
        let (pool, dials) = counting_pool(addr, option);
        let ctx = CancellationToken::new();

        let conn = pool.get(&ctx).await.unwrap();
        conn.close().unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let mut conn = pool.get(&ctx).await.unwrap();
        echo(&mut conn, b"fresh").await;
        assert_eq!(dials.load(Ordering::SeqCst), 2);
        assert_eq!(pool.stats().max_idle_time_closed, 1);
    }

    #[tokio::test]
    async fn test_close_during_read_discards() {
        let addr = echo_server().await;
        let (pool, dials) = counting_pool(addr, PoolOption::default());
        let ctx = CancellationToken::new();

        let mut conn = pool.get(&ctx).await.unwrap();
        let mut buf = [0u8; 4];
        let read = tokio::time::timeout(Duration::from_millis(20), conn.read(&mut buf)).await;
        assert!(read.is_err());
        conn.close().unwrap();

        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.discarded, 1);

        let _conn = pool.get(&ctx).await.unwrap();
        assert_eq!(dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_deadline_does_not_leak_to_next_borrower() {
        let addr = echo_server().await;
        let (pool, dials) = counting_pool(addr, PoolOption::default());
        let ctx = CancellationToken::new();

        let mut conn = pool.get(&ctx).await.unwrap();
        echo(&mut conn, b"one").await;
        conn.set_deadline(Some(Instant::now() + Duration::from_millis(10)));
        conn.close().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut conn = pool.get(&ctx).await.unwrap();
        echo(&mut conn, b"two").await;
        assert!(conn.last_error().is_none());
        assert_eq!(dials.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dead_idle_connection_is_replaced() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (pool, dials) = counting_pool(addr, PoolOption::default());
        let ctx = CancellationToken::new();

        let (conn, accepted) = tokio::join!(pool.get(&ctx), listener.accept());
        let conn = conn.unwrap();
        let (server_side, _) = accepted.unwrap();
        conn.close().unwrap();
        assert_eq!(pool.stats().idle, 1);

        drop(server_side);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (conn, accepted) = tokio::join!(pool.get(&ctx), listener.accept());
        let conn = conn.unwrap();
        let _server_side = accepted.unwrap();
        assert_eq!(dials.load(Ordering::SeqCst), 2);
        assert!(RawConn::check_active(&conn).is_ok());
    }

    #[tokio::test]
    async fn test_close_pool_with_checked_out_connection() {
        let addr = echo_server().await;
        let (pool, _dials) = counting_pool(addr, PoolOption::default());
        let ctx = CancellationToken::new();

        let mut conn = pool.get(&ctx).await.unwrap();
        pool.close();
        assert!(matches!(pool.get(&ctx).await, Err(PoolError::Closed)));

        // Still usable until closed, then disposed.
        echo(&mut conn, b"late").await;
        conn.close().unwrap();

        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.open, 0);
        assert_eq!(stats.discarded, 1);
    }

    #[tokio::test]
    async fn test_dial_error_is_surfaced() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (pool, dials) = counting_pool(addr, PoolOption::default());
        let err = pool.get(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, PoolError::Dial(_)));
        assert_eq!(dials.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().open, 0);
    }

    #[tokio::test]
    async fn test_range_over_idle_connections() {
        let addr = echo_server().await;
        let (pool, _dials) = counting_pool(addr, PoolOption::default());
        let ctx = CancellationToken::new();

        let a = pool.get(&ctx).await.unwrap();
        let b = pool.get(&ctx).await.unwrap();
        a.close().unwrap();
        b.close().unwrap();

        let mut peers = 0;
        pool.range(|conn| {
            assert_eq!(conn.peer_addr()?, addr);
            peers += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(peers, 2);
    }

    #[tokio::test]
    async fn test_nested_pool_validates_inner_connection() {
        let addr = echo_server().await;
        let inner = ConnPool::new(PoolOption::default(), move |_ctx: CancellationToken| {
            TcpStream::connect(addr)
        });
        let outer = {
            let inner = inner.clone();
            ConnPool::new(PoolOption::default(), move |_ctx: CancellationToken| {
                let inner = inner.clone();
                async move {
                    inner
                        .get(&CancellationToken::new())
                        .await
                        .map_err(|err| io::Error::other(err.to_string()))
                }
            })
        };
        let ctx = CancellationToken::new();

        let mut conn = outer.get(&ctx).await.unwrap();
        conn.write_all(b"nested").await.unwrap();
        let mut buf = [0u8; 6];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"nested");
        conn.close().unwrap();

        assert_eq!(outer.stats().idle, 1);
        assert_eq!(inner.stats().in_use, 1);

        outer.close();
        // Discarding the outer adapter hands the inner connection back.
        assert_eq!(inner.stats().idle, 1);
        assert_eq!(inner.stats().in_use, 0);
    }

    fn pipe_pool(option: PoolOption) -> (ConnPool<Pipe>, Arc<Mutex<Vec<DuplexStream>>>) {
        let peers = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&peers);
        let pool = ConnPool::new(option, move |_ctx: CancellationToken| {
            let (client, server) = Pipe::pair(8);
            sink.lock().push(server);
            async move { Ok::<_, io::Error>(client) }
        });
        (pool, peers)
    }

    #[tokio::test]
    async fn test_inconclusive_liveness_kept_by_default() {
        let (pool, peers) = pipe_pool(PoolOption::default());
        let ctx = CancellationToken::new();

        pool.get(&ctx).await.unwrap().close().unwrap();
        assert_eq!(pool.stats().idle, 1);

        let conn = pool.get(&ctx).await.unwrap();
        assert_eq!(conn.meta().used_times, 2);
        assert_eq!(peers.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_inconclusive_liveness_discarded_when_strict() {
        let (pool, peers) = pipe_pool(PoolOption::new().with_strict_liveness(true));
        let ctx = CancellationToken::new();

        pool.get(&ctx).await.unwrap().close().unwrap();
        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.discarded, 1);

        // The discard is silent; the next get just dials again.
        let conn = pool.get(&ctx).await.unwrap();
        assert_eq!(conn.meta().used_times, 1);
        assert_eq!(peers.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_close_during_write_discards() {
        let (pool, peers) = pipe_pool(PoolOption::default());
        let ctx = CancellationToken::new();

        let mut conn = pool.get(&ctx).await.unwrap();
        let payload = [1u8; 64];
        let write = tokio::time::timeout(Duration::from_millis(20), conn.write_all(&payload)).await;
        assert!(write.is_err());
        conn.close().unwrap();

        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.open, 0);
        assert_eq!(stats.discarded, 1);

        let _conn = pool.get(&ctx).await.unwrap();
        assert_eq!(peers.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_checked_out_debug_output() {
        let (pool, _peers) = pipe_pool(PoolOption::default());
        let conn = pool.get(&CancellationToken::new()).await.unwrap();
        let output = format!("{:?}", conn);
        assert!(output.starts_with("PooledConn"));
        assert!(output.contains("used_times: 1"));
    }
}
