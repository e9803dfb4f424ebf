//! The capability set every pooled value implements

use crate::config::PoolOption;
use crate::errors::PoolResult;
use crate::meta::{Meta, MetaInfo};

use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// A value that can live in a [`SimplePool`](crate::SimplePool)
///
/// Only [`meta_info`](Element::meta_info) is required. The default
/// validation checks the pool's idle and life limits.
pub trait Element: Send + 'static {
    /// Metadata tracker owned by this element
    fn meta_info(&self) -> &MetaInfo;

    /// Check whether the element may be handed out or kept idle
    fn check_active(&self, option: &PoolOption) -> PoolResult<()> {
        self.meta_info().is_active(option)
    }

    /// Prepare the element for its next borrower
    fn reset(&mut self) {}

    /// Release the underlying resource
    fn discard(self)
    where
        Self: Sized,
    {
    }

    fn meta(&self) -> Meta {
        self.meta_info().snapshot()
    }
}

/// Creates new elements for a pool
///
/// Implemented for any `Fn(CancellationToken) -> impl Future<Output = PoolResult<E>>`.
#[async_trait]
pub trait ElementFactory<E: Element>: Send + Sync + 'static {
    async fn create(&self, ctx: CancellationToken) -> PoolResult<E>;
}

#[async_trait]
impl<E, F, Fut> ElementFactory<E> for F
where
    E: Element,
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PoolResult<E>> + Send + 'static,
{
    async fn create(&self, ctx: CancellationToken) -> PoolResult<E> {
        (self)(ctx).await
    }
}
