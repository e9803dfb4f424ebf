//! # netpool
//!
//! Concurrency-safe generic resource pool for async Rust, with pooled
//! network connections and per-key pool groups.
//!
//! ## Features
//!
//! - Generic pool of any [`Element`] with bounded capacity and waiting gets
//! - Idle-time and lifetime eviction from per-element usage metadata
//! - Connection adapter that refuses reuse after errors or interrupted I/O
//! - Non-destructive liveness probe for pooled TCP sockets
//! - Keyed pool groups, one sub-pool per destination
//! - Stats, health summaries and Prometheus metrics export
//! - Name-based registry for configuration-driven lookup
//!
//! ## Quick Start
//!
//! ```no_run
//! use netpool::{ConnPool, PoolOption};
//! use std::time::Duration;
//! use tokio::io::AsyncWriteExt;
//! use tokio::net::TcpStream;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let option = PoolOption::new()
//!     .with_max_open(16)
//!     .with_max_idle_time(Duration::from_secs(60));
//! let pool = ConnPool::new(option, |_ctx: CancellationToken| {
//!     TcpStream::connect("127.0.0.1:6379")
//! });
//!
//! {
//!     let mut conn = pool.get(&CancellationToken::new()).await?;
//!     conn.write_all(b"PING\r\n").await?;
//!     // Connection automatically returned when `conn` goes out of scope
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod conn;
mod conn_pool;
mod element;
mod errors;
mod group;
mod health;
mod meta;
mod metrics;
mod pool;
mod probe;
mod registry;
#[cfg(test)]
mod testing;

pub use config::PoolOption;
pub use conn::{Conn, PooledConn, RawConn};
pub use conn_pool::{ConnPool, Dialer};
pub use element::{Element, ElementFactory};
pub use errors::{PoolError, PoolResult};
pub use group::{ConnPoolGroup, GroupDialer, GroupFactory, SimplePoolGroup};
pub use health::HealthStatus;
pub use meta::{Meta, MetaInfo};
pub use metrics::{GroupStats, MetricsExporter, Snapshot, Stats};
pub use pool::{PoolRef, SimplePool};
pub use probe::{Liveness, probe_tcp};
pub use registry::{Observable, Registry, global};
