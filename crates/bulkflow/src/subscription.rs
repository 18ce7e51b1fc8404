//! Demand-driven execution of one statement
//!
//! One [`ResultSubscription`] exists per outstanding execution. The consumer
//! grants demand in discrete increments via [`request`]; the subscription
//! acquires admission, issues the asynchronous execution, and folds the
//! possibly-paginated response into an ordered sequence of result items,
//! never delivering more items than cumulative demand allows and fetching
//! subsequent pages only on further demand.
//!
//! The engine is generic over a *result kind* ([`ResultKind`]): the read and
//! write flavors differ only in how a response becomes a page of items, how
//! a failure becomes an error item, and which listener hooks fire.
//!
//! Demand is an atomic counter updated by CAS from the consumer side and the
//! drive task; each subscription's remaining state is owned by its drive
//! task alone, so no subscription-level locking is needed.
//!
//! [`request`]: ResultSubscription::request

use crate::admission::AdmissionController;
use crate::driver::PagedRows;
use crate::error::{DriverResult, ExecutionError, Result};
use crate::listener::{ExecutionContext, ExecutionListener};
use crate::result::{ReadResult, WriteResult};
use crate::statement::Statement;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::Notify;
use tracing::{debug, trace};

/// States of a subscription's execution state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubscriptionState {
    /// Created, no demand yet
    Idle = 0,
    /// Demand present, waiting for a rate token and a concurrency permit
    AwaitingAdmission = 1,
    /// Request issued, awaiting the asynchronous response
    Executing = 2,
    /// A page is being delivered item-by-item against remaining demand
    Draining = 3,
    /// All pages delivered
    Completed = 4,
    /// Terminal error surfaced (fail-fast mode)
    Failed = 5,
    /// Consumer cancelled
    Cancelled = 6,
}

impl SubscriptionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::AwaitingAdmission,
            2 => Self::Executing,
            3 => Self::Draining,
            4 => Self::Completed,
            5 => Self::Failed,
            _ => Self::Cancelled,
        }
    }

    /// Whether the subscription can make no further progress
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One page of converted result items plus an optional continuation
///
/// The item iterator must be lazy: each `next()` performs the minimum work
/// to produce one item, so consumer demand of size k converts at most k
/// items (plus a one-item lookahead used to detect page exhaustion).
pub struct Page<T, R> {
    items: Box<dyn Iterator<Item = T> + Send>,
    next: Option<BoxFuture<'static, DriverResult<R>>>,
}

impl<T, R> Page<T, R> {
    /// A page with a continuation fetching the next page when polled
    pub fn new(
        items: Box<dyn Iterator<Item = T> + Send>,
        next: Option<BoxFuture<'static, DriverResult<R>>>,
    ) -> Self {
        Self { items, next }
    }

    /// A final page with no continuation
    pub fn terminal(items: Box<dyn Iterator<Item = T> + Send>) -> Self {
        Self { items, next: None }
    }
}

/// Strategy converting driver responses of one result kind into pages of
/// typed items
///
/// Injected into the generic subscription engine; the two shipped kinds are
/// [`ReadKind`] and [`WriteKind`].
pub trait ResultKind: Send + Sync + 'static {
    /// The driver response this kind consumes
    type Response: Send + 'static;
    /// The item type delivered to the consumer
    type Item: Send + 'static;

    /// Convert one response into a page of items plus an optional
    /// continuation
    fn to_page(
        &self,
        statement: &Statement,
        response: Self::Response,
        listener: Option<&Arc<dyn ExecutionListener>>,
        ctx: &ExecutionContext,
    ) -> Page<Self::Item, Self::Response>;

    /// Wrap an execution failure into a single error item (resilient mode)
    fn to_error_item(&self, error: ExecutionError) -> Self::Item;

    /// Notify that a request is about to be issued
    fn on_request_started(
        &self,
        listener: &dyn ExecutionListener,
        statement: &Statement,
        ctx: &ExecutionContext,
    );

    /// Notify that a response arrived
    fn on_request_successful(
        &self,
        listener: &dyn ExecutionListener,
        statement: &Statement,
        ctx: &ExecutionContext,
    );

    /// Notify that a request failed
    fn on_request_failed(
        &self,
        listener: &dyn ExecutionListener,
        statement: &Statement,
        error: &ExecutionError,
        ctx: &ExecutionContext,
    );
}

/// Result kind for read statements: one item per row, pages follow the
/// driver's pagination
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadKind;

impl ResultKind for ReadKind {
    type Response = Box<dyn PagedRows>;
    type Item = ReadResult;

    fn to_page(
        &self,
        statement: &Statement,
        mut response: Self::Response,
        listener: Option<&Arc<dyn ExecutionListener>>,
        ctx: &ExecutionContext,
    ) -> Page<ReadResult, Self::Response> {
        let rows = response.take_page();
        let next = if response.has_more_pages() {
            Some(response.fetch_next_page())
        } else {
            None
        };

        let statement = statement.clone();
        let listener = listener.cloned();
        let ctx = ctx.clone();
        let items = rows.into_iter().map(move |row| {
            if let Some(listener) = &listener {
                listener.on_row_received(&row, &ctx);
            }
            ReadResult::success(statement.clone(), row)
        });

        Page::new(Box::new(items), next)
    }

    fn to_error_item(&self, error: ExecutionError) -> ReadResult {
        ReadResult::failure(error)
    }

    fn on_request_started(
        &self,
        listener: &dyn ExecutionListener,
        statement: &Statement,
        ctx: &ExecutionContext,
    ) {
        listener.on_read_request_started(statement, ctx);
    }

    fn on_request_successful(
        &self,
        listener: &dyn ExecutionListener,
        statement: &Statement,
        ctx: &ExecutionContext,
    ) {
        listener.on_read_request_successful(statement, ctx);
    }

    fn on_request_failed(
        &self,
        listener: &dyn ExecutionListener,
        statement: &Statement,
        error: &ExecutionError,
        ctx: &ExecutionContext,
    ) {
        listener.on_read_request_failed(statement, error, ctx);
    }
}

/// Result kind for write statements: exactly one acknowledgement item, no
/// pagination
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteKind;

impl ResultKind for WriteKind {
    type Response = crate::driver::WriteAck;
    type Item = WriteResult;

    fn to_page(
        &self,
        statement: &Statement,
        response: Self::Response,
        _listener: Option<&Arc<dyn ExecutionListener>>,
        _ctx: &ExecutionContext,
    ) -> Page<WriteResult, Self::Response> {
        let item = WriteResult::success(statement.clone(), response);
        Page::terminal(Box::new(std::iter::once(item)))
    }

    fn to_error_item(&self, error: ExecutionError) -> WriteResult {
        WriteResult::failure(error)
    }

    fn on_request_started(
        &self,
        listener: &dyn ExecutionListener,
        statement: &Statement,
        ctx: &ExecutionContext,
    ) {
        listener.on_write_request_started(statement, ctx);
    }

    fn on_request_successful(
        &self,
        listener: &dyn ExecutionListener,
        statement: &Statement,
        ctx: &ExecutionContext,
    ) {
        listener.on_write_request_successful(statement, ctx);
    }

    fn on_request_failed(
        &self,
        listener: &dyn ExecutionListener,
        statement: &Statement,
        error: &ExecutionError,
        ctx: &ExecutionContext,
    ) {
        listener.on_write_request_failed(statement, error, ctx);
    }
}

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// State shared between the consumer handle and the drive task. Demand is
/// the only value both sides mutate; everything else is single-writer.
struct SubscriptionShared {
    id: u64,
    demand: AtomicU64,
    state: AtomicU8,
    wake: Notify,
}

impl SubscriptionShared {
    fn new() -> Self {
        Self {
            id: NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed),
            demand: AtomicU64::new(0),
            state: AtomicU8::new(SubscriptionState::Idle as u8),
            wake: Notify::new(),
        }
    }

    fn state(&self) -> SubscriptionState {
        SubscriptionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Transition to `next` unless already terminal. Terminal states
    /// (including a concurrent cancellation) are never overwritten.
    fn set_state(&self, next: SubscriptionState) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (!SubscriptionState::from_u8(current).is_terminal()).then_some(next as u8)
            });
    }

    fn cancel(&self) {
        let cancelled = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (!SubscriptionState::from_u8(current).is_terminal())
                    .then_some(SubscriptionState::Cancelled as u8)
            })
            .is_ok();
        if cancelled {
            trace!(subscription = self.id, "subscription cancelled");
        }
        self.wake.notify_one();
    }

    fn is_cancelled(&self) -> bool {
        self.state() == SubscriptionState::Cancelled
    }

    fn add_demand(&self, n: u64) {
        if n == 0 {
            return;
        }
        let _ = self
            .demand
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| {
                Some(d.saturating_add(n))
            });
        self.wake.notify_one();
    }

    /// Suspend until demand is present. Returns false on cancellation.
    async fn await_demand(&self) -> bool {
        loop {
            if self.is_cancelled() {
                return false;
            }
            if self.demand.load(Ordering::Acquire) > 0 {
                return true;
            }
            self.wake.notified().await;
        }
    }

    /// Consume one unit of demand, suspending until one is available.
    /// Returns false on cancellation.
    async fn claim_demand(&self) -> bool {
        loop {
            if self.is_cancelled() {
                return false;
            }
            if self
                .demand
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| d.checked_sub(1))
                .is_ok()
            {
                return true;
            }
            self.wake.notified().await;
        }
    }
}

/// Consumer handle to one demand-driven execution
///
/// Created by [`BulkExecutor::read`] / [`BulkExecutor::write`]; items are
/// delivered through [`next`] strictly in production order and never faster
/// than demand granted via [`request`]. Dropping the handle cancels the
/// subscription.
///
/// [`BulkExecutor::read`]: crate::executor::BulkExecutor::read
/// [`BulkExecutor::write`]: crate::executor::BulkExecutor::write
/// [`next`]: Self::next
/// [`request`]: Self::request
pub struct ResultSubscription<T> {
    shared: Arc<SubscriptionShared>,
    rx: mpsc::UnboundedReceiver<Result<T>>,
}

impl<T> ResultSubscription<T> {
    /// Grant `n` more units of demand. Saturates; `request(0)` is a no-op.
    pub fn request(&self, n: u64) {
        self.shared.add_demand(n);
    }

    /// Cancel the subscription. Pending in-flight work may still complete,
    /// but its result is discarded and no further items are delivered.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Current state of the execution state machine
    pub fn state(&self) -> SubscriptionState {
        self.shared.state()
    }

    /// Demand granted but not yet consumed
    pub fn demand(&self) -> u64 {
        self.shared.demand.load(Ordering::Acquire)
    }

    /// Receive the next item. `None` means the subscription terminated
    /// (completed or cancelled); `Some(Err(_))` is the terminal fail-fast
    /// error.
    pub async fn next(&mut self) -> Option<Result<T>> {
        self.rx.recv().await
    }

    /// Receive an already-delivered item without suspending
    pub fn try_next(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Convert into a stream maintaining a fixed demand window of
    /// `prefetch` items (minimum 1)
    pub fn into_stream(self, prefetch: u64) -> BoxStream<'static, Result<T>>
    where
        T: Send + 'static,
    {
        self.request(prefetch.max(1));
        Box::pin(stream::unfold(self, |mut sub| async move {
            let item = sub.next().await?;
            sub.request(1);
            Some((item, sub))
        }))
    }
}

impl<T> Drop for ResultSubscription<T> {
    fn drop(&mut self) {
        self.shared.cancel();
    }
}

/// Spawn the drive task for one statement and hand back the consumer handle.
///
/// `first` must be lazy: the execution is issued only once the future is
/// polled, which happens strictly after admission is granted.
pub(crate) fn subscribe<K>(
    kind: K,
    statement: Statement,
    first: BoxFuture<'static, DriverResult<K::Response>>,
    admission: Arc<AdmissionController>,
    listener: Option<Arc<dyn ExecutionListener>>,
    fail_fast: bool,
) -> ResultSubscription<K::Item>
where
    K: ResultKind,
{
    let shared = Arc::new(SubscriptionShared::new());
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(drive(
        kind,
        statement,
        first,
        admission,
        listener,
        fail_fast,
        Arc::clone(&shared),
        tx,
    ));
    ResultSubscription { shared, rx }
}

/// The subscription state machine. Runs as one task per statement;
/// suspension points are demand waits, admission acquisition and the
/// asynchronous execution itself.
#[allow(clippy::too_many_arguments)]
async fn drive<K>(
    kind: K,
    statement: Statement,
    first: BoxFuture<'static, DriverResult<K::Response>>,
    admission: Arc<AdmissionController>,
    listener: Option<Arc<dyn ExecutionListener>>,
    fail_fast: bool,
    shared: Arc<SubscriptionShared>,
    tx: mpsc::UnboundedSender<Result<K::Item>>,
) where
    K: ResultKind,
{
    let ctx = ExecutionContext::new(shared.id);
    let mut pending = first;

    loop {
        // No admission, and no page fetch, without demand.
        if !shared.await_demand().await {
            return;
        }
        shared.set_state(SubscriptionState::AwaitingAdmission);

        let permit = admission.admit().await;
        if shared.is_cancelled() {
            return;
        }
        shared.set_state(SubscriptionState::Executing);

        if let Some(listener) = &listener {
            kind.on_request_started(listener.as_ref(), &statement, &ctx);
        }
        let outcome = pending.await;
        // One admission cycle per page fetch: release before draining.
        drop(permit);

        if shared.is_cancelled() {
            trace!(subscription = shared.id, "discarding late response");
            return;
        }

        match outcome {
            Ok(response) => {
                if let Some(listener) = &listener {
                    kind.on_request_successful(listener.as_ref(), &statement, &ctx);
                }
                shared.set_state(SubscriptionState::Draining);

                let page = kind.to_page(&statement, response, listener.as_ref(), &ctx);
                let mut items = page.items;
                // One-item lookahead so page exhaustion is detected without
                // waiting for demand that will never be consumed.
                let mut lookahead = items.next();
                while let Some(item) = lookahead {
                    if !shared.claim_demand().await {
                        return;
                    }
                    if tx.send(Ok(item)).is_err() {
                        shared.cancel();
                        return;
                    }
                    lookahead = items.next();
                }

                match page.next {
                    Some(continuation) if !shared.is_cancelled() => {
                        pending = continuation;
                    }
                    _ => {
                        shared.set_state(SubscriptionState::Completed);
                        debug!(subscription = shared.id, "subscription completed");
                        return;
                    }
                }
            }
            Err(cause) => {
                let error = ExecutionError::new(statement.clone(), cause);
                if let Some(listener) = &listener {
                    kind.on_request_failed(listener.as_ref(), &statement, &error, &ctx);
                }
                if fail_fast {
                    shared.set_state(SubscriptionState::Failed);
                    debug!(subscription = shared.id, %error, "subscription failed");
                    let _ = tx.send(Err(error));
                } else {
                    // Resilient mode: the failure becomes one ordinary item.
                    if !shared.claim_demand().await {
                        return;
                    }
                    let _ = tx.send(Ok(kind.to_error_item(error)));
                    shared.set_state(SubscriptionState::Completed);
                }
                return;
            }
        }
    }
}
