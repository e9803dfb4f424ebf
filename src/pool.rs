//! Generic concurrency-safe pool engine

use crate::config::PoolOption;
use crate::element::{Element, ElementFactory};
use crate::errors::{PoolError, PoolResult};
use crate::metrics::{MetricsTracker, Stats};

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

struct State<E> {
    idle: VecDeque<E>,
    /// Idle plus checked out plus being created
    num_open: usize,
    in_use: usize,
    closed: bool,
}

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

struct Shared<E: Element> {
    id: u64,
    state: Mutex<State<E>>,
    available: Notify,
    option: Arc<PoolOption>,
    factory: Arc<dyn ElementFactory<E>>,
    metrics: MetricsTracker,
}

enum Checkout<E> {
    Idle(E),
    Reserved,
    Full,
}

/// Thread-safe pool of elements created on demand by a factory
///
/// Cloning is cheap and every clone refers to the same pool. Elements
/// returned by [`get`](SimplePool::get) are owned by the caller until they
/// are handed back with [`put`](SimplePool::put).
pub struct SimplePool<E: Element> {
    shared: Arc<Shared<E>>,
}

impl<E: Element> Clone for SimplePool<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E: Element> SimplePool<E> {
    /// Create a new pool
    pub fn new<F>(option: PoolOption, factory: F) -> Self
    where
        F: ElementFactory<E>,
    {
        Self::with_shared(Arc::new(option), Arc::new(factory))
    }

    pub(crate) fn with_shared(
        option: Arc<PoolOption>,
        factory: Arc<dyn ElementFactory<E>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(State {
                    idle: VecDeque::new(),
                    num_open: 0,
                    in_use: 0,
                    closed: false,
                }),
                available: Notify::new(),
                option,
                factory,
                metrics: MetricsTracker::new(),
            }),
        }
    }

    /// Get an element, reusing an idle one when it is still valid
    ///
    /// Idle elements failing validation are discarded and the search
    /// continues. When the pool is at capacity the call waits until an
    /// element is returned or a slot frees up, for at most the wait
    /// timeout. Creating a new element is only bounded by `ctx`.
    pub async fn get(&self, ctx: &CancellationToken) -> PoolResult<E> {
        let shared = &self.shared;
        let deadline = shared.option.wait_timeout.map(|timeout| Instant::now() + timeout);
        let mut wait_start: Option<Instant> = None;

        let result = loop {
            if ctx.is_cancelled() {
                break Err(PoolError::Cancelled);
            }

            let notified = shared.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match shared.checkout() {
                Err(err) => break Err(err),
                Ok(Checkout::Idle(element)) => match element.check_active(&shared.option) {
                    Ok(()) => break shared.hand_out(element),
                    Err(err) => {
                        shared.release(element, &err);
                        continue;
                    }
                },
                Ok(Checkout::Reserved) => {
                    let reservation = Reservation {
                        shared,
                        committed: false,
                    };
                    break self.create(ctx, reservation).await;
                }
                Ok(Checkout::Full) => {}
            }

            if wait_start.is_none() {
                wait_start = Some(Instant::now());
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = ctx.cancelled() => break Err(PoolError::Cancelled),
                _ = sleep_until(deadline) => break Err(PoolError::Timeout(shared.wait_timeout())),
            }
        };

        if let Some(start) = wait_start {
            shared.metrics.record_wait(start.elapsed());
        }
        result
    }

    async fn create(
        &self,
        ctx: &CancellationToken,
        mut reservation: Reservation<'_, E>,
    ) -> PoolResult<E> {
        let shared = &self.shared;
        let created = tokio::select! {
            created = shared.factory.create(ctx.child_token()) => created,
            _ = ctx.cancelled() => Err(PoolError::Cancelled),
        };
        let element = match created {
            Ok(element) => element,
            Err(err) => {
                warn!(error = %err, "failed to create pool element");
                return Err(err);
            }
        };
        shared.metrics.record_created();
        trace!("created new pool element");

        {
            let mut state = shared.state.lock();
            if !state.closed {
                state.in_use += 1;
                reservation.committed = true;
            }
        }
        if !reservation.committed {
            // Reservation drop gives the slot back.
            drop(reservation);
            shared.metrics.record_discarded(&PoolError::Closed);
            element.discard();
            return Err(PoolError::Closed);
        }

        element.meta_info().claim(shared.id);
        element.meta_info().mark_using();
        Ok(element)
    }

    /// Return an element to the pool
    ///
    /// Invalid elements, elements over the idle limit and elements coming
    /// back to a closed pool are discarded. An element this pool did not
    /// hand out is discarded without touching its counters. Never blocks on
    /// the network.
    pub fn put(&self, element: E) {
        self.shared.put(element);
    }

    /// Apply `f` to every idle element without removing it
    ///
    /// Stops at the first error, which is returned. The elements stay idle.
    /// `f` runs without the pool lock held and may call back into the pool;
    /// gets issued meanwhile do not see the elements being visited.
    pub fn range<F>(&self, mut f: F) -> PoolResult<()>
    where
        F: FnMut(&E) -> PoolResult<()>,
    {
        let shared = &self.shared;
        let visiting = std::mem::take(&mut shared.state.lock().idle);
        let result = visiting.iter().try_for_each(&mut f);

        if visiting.is_empty() {
            return result;
        }
        let (surplus, reason) = {
            let mut state = shared.state.lock();
            if state.closed {
                state.num_open = state.num_open.saturating_sub(visiting.len());
                (Vec::from(visiting), PoolError::Closed)
            } else {
                // Elements returned meanwhile are the most recent ones.
                let returned = std::mem::replace(&mut state.idle, visiting);
                state.idle.extend(returned);

                let mut surplus = Vec::new();
                while !state.idle.is_empty() && shared.option.idle_full(state.idle.len() - 1) {
                    surplus.extend(state.idle.pop_front());
                }
                state.num_open = state.num_open.saturating_sub(surplus.len());
                (surplus, PoolError::BadValue)
            }
        };
        shared.available.notify_waiters();

        for element in surplus {
            shared.metrics.record_discarded(&reason);
            element.discard();
        }
        result
    }

    /// Close the pool and discard every idle element
    ///
    /// Checked-out elements are discarded when they are returned.
    pub fn close(&self) {
        let drained: Vec<E> = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.num_open = state.num_open.saturating_sub(state.idle.len());
            state.idle.drain(..).collect()
        };
        self.shared.available.notify_waiters();

        debug!(discarded = drained.len(), "pool closed");
        for element in drained {
            self.shared.metrics.record_discarded(&PoolError::Closed);
            element.discard();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    pub fn option(&self) -> &PoolOption {
        &self.shared.option
    }

    /// Snapshot of the pool's counters
    pub fn stats(&self) -> Stats {
        let (open, idle, in_use) = {
            let state = self.shared.state.lock();
            (state.num_open, state.idle.len(), state.in_use)
        };
        self.shared.metrics.get_stats(self.shared.option.max_open, open, idle, in_use)
    }

    /// Non-owning handle used by elements to return themselves
    pub fn downgrade(&self) -> PoolRef<E> {
        PoolRef {
            shared: Arc::downgrade(&self.shared),
            option: Arc::clone(&self.shared.option),
        }
    }
}

impl<E: Element> Shared<E> {
    fn checkout(&self) -> PoolResult<Checkout<E>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }
        if let Some(element) = state.idle.pop_back() {
            return Ok(Checkout::Idle(element));
        }
        if self.option.open_full(state.num_open) {
            return Ok(Checkout::Full);
        }
        state.num_open += 1;
        Ok(Checkout::Reserved)
    }

    fn hand_out(&self, element: E) -> PoolResult<E> {
        {
            let mut state = self.state.lock();
            if !state.closed {
                state.in_use += 1;
                drop(state);
                element.meta_info().mark_using();
                return Ok(element);
            }
        }
        self.release(element, &PoolError::Closed);
        Err(PoolError::Closed)
    }

    fn put(&self, mut element: E) {
        if element.meta_info().owner() != self.id {
            warn!(pool = self.id, "discarding element handed out by another pool");
            element.discard();
            return;
        }

        element.meta_info().mark_idle();
        let verdict = element.check_active(&self.option);
        if verdict.is_ok() {
            element.reset();
        }

        let mut state = self.state.lock();
        state.in_use = state.in_use.saturating_sub(1);

        let reason = if state.closed {
            Some(PoolError::Closed)
        } else if let Err(err) = verdict {
            Some(err)
        } else if self.option.idle_full(state.idle.len()) {
            Some(PoolError::BadValue)
        } else {
            None
        };

        match reason {
            None => {
                state.idle.push_back(element);
                drop(state);
                self.available.notify_one();
            }
            Some(reason) => {
                drop(state);
                self.release(element, &reason);
            }
        }
    }

    /// Discard an element that no longer counts as idle or in use
    fn release(&self, element: E, reason: &PoolError) {
        {
            let mut state = self.state.lock();
            state.num_open = state.num_open.saturating_sub(1);
        }
        self.available.notify_one();
        self.metrics.record_discarded(reason);
        debug!(reason = %reason, "discarding pool element");
        element.discard();
    }

    fn wait_timeout(&self) -> Duration {
        self.option.wait_timeout.unwrap_or_default()
    }
}

/// Slot reserved for an element being created
struct Reservation<'a, E: Element> {
    shared: &'a Shared<E>,
    committed: bool,
}

impl<E: Element> Drop for Reservation<'_, E> {
    fn drop(&mut self) {
        if !self.committed {
            {
                let mut state = self.shared.state.lock();
                state.num_open = state.num_open.saturating_sub(1);
            }
            self.shared.available.notify_one();
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Weak back-reference from an element to its pool
///
/// Never keeps the pool alive. Returning an element after the pool is gone
/// discards it.
pub struct PoolRef<E: Element> {
    shared: Weak<Shared<E>>,
    option: Arc<PoolOption>,
}

impl<E: Element> Clone for PoolRef<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
            option: Arc::clone(&self.option),
        }
    }
}

impl<E: Element> PoolRef<E> {
    pub fn put(&self, element: E) {
        match self.shared.upgrade() {
            Some(shared) => shared.put(element),
            None => {
                debug!("pool is gone, discarding returned element");
                element.discard();
            }
        }
    }

    pub fn option(&self) -> &PoolOption {
        &self.option
    }
}
