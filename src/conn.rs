//! Connection adapter that returns itself to its pool on close

use crate::config::PoolOption;
use crate::element::Element;
use crate::errors::{PoolError, PoolResult};
use crate::meta::{Meta, MetaInfo};
use crate::pool::PoolRef;
use crate::probe::{self, Liveness};

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::{Instant, Sleep};
use tracing::{debug, trace};

/// A transport connection that can be pooled
///
/// `check_active` and `probe` have safe defaults, so any stream can be
/// pooled; transports wrapping a socket forward `probe` to it.
pub trait RawConn: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Validation of the connection's own wrapper state, if it has any
    fn check_active(&self) -> PoolResult<()> {
        Ok(())
    }

    /// Liveness of the innermost transport socket
    fn probe(&self) -> Liveness {
        Liveness::Indeterminate(io::Error::from(io::ErrorKind::Unsupported))
    }
}

impl RawConn for TcpStream {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    fn probe(&self) -> Liveness {
        probe::probe_tcp(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IoState {
    Init,
    Started,
    Done,
}

/// Pooled connection state: the raw connection plus in-flight tracking
///
/// This is the element stored in a connection pool. Callers see it through
/// [`PooledConn`].
pub struct Conn<C: RawConn> {
    raw: C,
    meta: MetaInfo,
    last_err: Option<io::Error>,
    read_state: IoState,
    write_state: IoState,
    read_deadline: Option<Pin<Box<Sleep>>>,
    write_deadline: Option<Pin<Box<Sleep>>>,
}

impl<C: RawConn> Conn<C> {
    pub fn new(raw: C) -> Self {
        Self {
            raw,
            meta: MetaInfo::new(),
            last_err: None,
            read_state: IoState::Init,
            write_state: IoState::Init,
            read_deadline: None,
            write_deadline: None,
        }
    }

    /// The connection this adapter wraps, possibly another adapter
    pub fn raw(&self) -> &C {
        &self.raw
    }

    pub fn last_error(&self) -> Option<&io::Error> {
        self.last_err.as_ref()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.raw.local_addr()
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.raw.peer_addr()
    }

    /// Set both deadlines; `None` clears them
    ///
    /// # Panics
    ///
    /// Panics when called with a deadline outside a Tokio runtime.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.set_read_deadline(deadline);
        self.set_write_deadline(deadline);
    }

    /// # Panics
    ///
    /// Panics when called with a deadline outside a Tokio runtime.
    pub fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.read_deadline = deadline.map(|at| Box::pin(tokio::time::sleep_until(at)));
    }

    /// # Panics
    ///
    /// Panics when called with a deadline outside a Tokio runtime.
    pub fn set_write_deadline(&mut self, deadline: Option<Instant>) {
        self.write_deadline = deadline.map(|at| Box::pin(tokio::time::sleep_until(at)));
    }

    fn in_flight(&self) -> bool {
        self.read_state == IoState::Started || self.write_state == IoState::Started
    }

    // Sticky: only the first error is kept.
    fn record_err(&mut self, err: &io::Error) {
        if self.last_err.is_none() {
            self.last_err = Some(io::Error::new(err.kind(), err.to_string()));
        }
    }

    fn mark_closing(&mut self) {
        if self.last_err.is_none() && self.in_flight() {
            debug!("connection closed while read or write in progress");
            self.last_err = Some(io::Error::other(PoolError::ClosedInFlight));
        }
    }

    fn deadline_passed(deadline: &mut Option<Pin<Box<Sleep>>>, cx: &mut Context<'_>) -> bool {
        match deadline {
            Some(sleep) => sleep.as_mut().poll(cx).is_ready(),
            None => false,
        }
    }

    fn poll_io<T>(
        &mut self,
        write: bool,
        cx: &mut Context<'_>,
        op: impl FnOnce(Pin<&mut C>, &mut Context<'_>) -> Poll<io::Result<T>>,
    ) -> Poll<io::Result<T>> {
        let (state, deadline) = if write {
            (&mut self.write_state, &mut self.write_deadline)
        } else {
            (&mut self.read_state, &mut self.read_deadline)
        };
        *state = IoState::Started;

        let result = if Self::deadline_passed(deadline, cx) {
            Poll::Ready(Err(io::Error::from(io::ErrorKind::TimedOut)))
        } else {
            op(Pin::new(&mut self.raw), cx)
        };

        match result {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                if write {
                    self.write_state = IoState::Done;
                } else {
                    self.read_state = IoState::Done;
                }
                if let Err(err) = &result {
                    self.record_err(err);
                }
                Poll::Ready(result)
            }
        }
    }
}

impl<C: RawConn> fmt::Debug for Conn<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("meta", &self.meta.snapshot())
            .field("last_err", &self.last_err)
            .field("read_state", &self.read_state)
            .field("write_state", &self.write_state)
            .finish()
    }
}

impl<C: RawConn> Element for Conn<C> {
    fn meta_info(&self) -> &MetaInfo {
        &self.meta
    }

    fn check_active(&self, option: &PoolOption) -> PoolResult<()> {
        if self.last_err.is_some() || self.in_flight() {
            return Err(PoolError::BadValue);
        }
        self.meta.is_active(option)?;
        self.raw.check_active()?;

        match self.raw.probe() {
            Liveness::Alive => Ok(()),
            Liveness::Dead(err) => Err(err),
            Liveness::Indeterminate(err) if option.strict_liveness => {
                Err(PoolError::Indeterminate(err.kind()))
            }
            Liveness::Indeterminate(err) => {
                trace!(error = %err, "liveness probe inconclusive, keeping connection");
                Ok(())
            }
        }
    }

    /// Clear deadlines left by the previous borrower
    fn reset(&mut self) {
        self.read_deadline = None;
        self.write_deadline = None;
        self.read_state = IoState::Init;
        self.write_state = IoState::Init;
    }
}

impl<C: RawConn> AsyncRead for Conn<C> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.poll_io(false, cx, |raw, cx| raw.poll_read(cx, buf))
    }
}

impl<C: RawConn> AsyncWrite for Conn<C> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.poll_io(true, cx, |raw, cx| raw.poll_write(cx, buf))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_io(true, cx, |raw, cx| raw.poll_flush(cx))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let result = Pin::new(&mut self.raw).poll_shutdown(cx);
        if result.is_ready() {
            // A half-closed connection can never be reused.
            let err = io::Error::new(io::ErrorKind::NotConnected, "write half shut down");
            self.record_err(&err);
        }
        result
    }
}

/// Checked-out connection; closing or dropping it returns it to its pool
///
/// The pool discards instead of recycling when the connection recorded an
/// error, was closed mid read or write, or fails validation.
pub struct PooledConn<C: RawConn> {
    conn: Option<Conn<C>>,
    pool: PoolRef<Conn<C>>,
}

impl<C: RawConn> PooledConn<C> {
    pub(crate) fn new(conn: Conn<C>, pool: PoolRef<Conn<C>>) -> Self {
        Self { conn: Some(conn), pool }
    }

    /// Hand the connection back to its pool
    ///
    /// Always succeeds; whether the connection is reused or discarded is
    /// the pool's decision.
    pub fn close(mut self) -> io::Result<()> {
        self.release();
        Ok(())
    }

    pub fn meta(&self) -> Meta {
        self.meta_info().snapshot()
    }

    fn release(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.mark_closing();
            self.pool.put(conn);
        }
    }
}

impl<C: RawConn> Deref for PooledConn<C> {
    type Target = Conn<C>;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("Connection already released")
    }
}

impl<C: RawConn> DerefMut for PooledConn<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("Connection already released")
    }
}

impl<C: RawConn> fmt::Debug for PooledConn<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.conn {
            Some(conn) => f
                .debug_struct("PooledConn")
                .field("meta", &conn.meta.snapshot())
                .field("last_err", &conn.last_err)
                .finish(),
            None => f.write_str("PooledConn(released)"),
        }
    }
}

impl<C: RawConn> Drop for PooledConn<C> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<C: RawConn> AsyncRead for PooledConn<C> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut **self).poll_read(cx, buf)
    }
}

impl<C: RawConn> AsyncWrite for PooledConn<C> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut **self).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut **self).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut **self).poll_shutdown(cx)
    }
}

/// A pooled connection can itself be pooled by an outer pool
impl<C: RawConn> RawConn for PooledConn<C> {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        (**self).local_addr()
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        (**self).peer_addr()
    }

    fn check_active(&self) -> PoolResult<()> {
        Element::check_active(&**self, self.pool.option())
    }

    fn probe(&self) -> Liveness {
        self.raw().probe()
    }
}
