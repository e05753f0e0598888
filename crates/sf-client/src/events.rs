//! Lifecycle events and the fire-and-forget event bus.
//!
//! Every physical attempt made by the executor, and every login request made
//! by an auth flow, is reported here. Subscribers never slow down or fail the
//! call that published the event.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{error, warn};

use crate::request::Request;
use crate::response::Response;
use crate::transport::TransportError;

/// A lifecycle notification.
#[derive(Debug, Clone)]
pub enum Event {
    /// A physical request is about to be sent.
    Request { request: Request },
    /// A failed attempt is about to be retried.
    Retry {
        attempt: u32,
        request: Request,
        response: Option<Response>,
        error: Option<TransportError>,
    },
    /// A logical call completed successfully.
    Response { response: Response },
    /// A REST API call consumed quota.
    RestApiCallConsumption { response: Response, count: u32 },
    /// A Bulk API batch consumed quota.
    BulkApiBatchConsumption { response: Response, count: u32 },
}

impl Event {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Request { .. } => "request",
            Event::Retry { .. } => "retry",
            Event::Response { .. } => "response",
            Event::RestApiCallConsumption { .. } => "rest_api_call_consumption",
            Event::BulkApiBatchConsumption { .. } => "bulk_api_batch_consumption",
        }
    }

    /// The response carried by this event, if any.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Event::Request { .. } => None,
            Event::Retry { response, .. } => response.as_ref(),
            Event::Response { response }
            | Event::RestApiCallConsumption { response, .. }
            | Event::BulkApiBatchConsumption { response, .. } => Some(response),
        }
    }

    /// API calls consumed in the org, from the response's usage header.
    pub fn consumed(&self) -> Option<u64> {
        self.response()?.api_usage().map(|u| u.used)
    }

    /// API calls remaining in the org, from the response's usage header.
    pub fn remaining(&self) -> Option<u64> {
        self.response()?.api_usage().map(|u| u.remaining())
    }
}

/// Identifier returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type SyncCallback = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;
type AsyncCallback = Arc<dyn Fn(Arc<Event>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Clone)]
enum Callback {
    /// Runs on the blocking pool.
    Sync(SyncCallback),
    /// Runs as its own task.
    Async(AsyncCallback),
}

struct Inner {
    subscribers: RwLock<Vec<(SubscriptionId, Callback)>>,
    next_id: AtomicU64,
    pending: AtomicUsize,
    idle: Notify,
}

/// Publish/subscribe dispatcher for [`Event`]s.
///
/// Cloning is cheap and clones share subscribers. `publish` returns
/// immediately; callbacks run concurrently in a task group supervised per
/// event, with no ordering guarantee between callbacks. Callback errors and
/// panics are logged and swallowed.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("pending", &self.inner.pending.load(Ordering::SeqCst))
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(0),
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Register a synchronous callback. It runs on the blocking thread pool.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(Callback::Sync(Arc::new(callback)))
    }

    /// Register an async callback. Each invocation is spawned as a task.
    pub fn subscribe_async<F, Fut>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let callback: AsyncCallback = Arc::new(move |event| callback(event).boxed());
        self.insert(Callback::Async(callback))
    }

    /// Remove a subscriber. Events already published still reach it.
    ///
    /// Returns false if the id was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = match self.inner.subscribers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        match self.inner.subscribers.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Dispatch an event to every current subscriber without waiting.
    ///
    /// Must be called from within a Tokio runtime; outside one the event is
    /// dropped with a warning.
    pub fn publish(&self, event: Event) {
        let callbacks: Vec<Callback> = match self.inner.subscribers.read() {
            Ok(guard) => guard.iter().map(|(_, cb)| cb.clone()).collect(),
            Err(poisoned) => poisoned.into_inner().iter().map(|(_, cb)| cb.clone()).collect(),
        };
        if callbacks.is_empty() {
            return;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(event = event.name(), "No async runtime, dropping event");
                return;
            }
        };

        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let event = Arc::new(event);

        handle.spawn(async move {
            let name = event.name();
            let mut tasks = JoinSet::new();
            for callback in callbacks {
                let event = Arc::clone(&event);
                match callback {
                    Callback::Sync(f) => {
                        tasks.spawn_blocking(move || f(&event));
                    }
                    Callback::Async(f) => {
                        tasks.spawn(f(event));
                    }
                }
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!(event = name, error = %err, "Event callback failed"),
                    Err(join_err) if join_err.is_panic() => {
                        error!(event = name, "Event callback panicked")
                    }
                    Err(join_err) => warn!(event = name, error = %join_err, "Event callback cancelled"),
                }
            }

            if inner.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                inner.idle.notify_waiters();
            }
        });
    }

    /// Wait until every event published so far has been fully dispatched.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn insert(&self, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = match self.inner.subscribers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.push((id, callback));
        id
    }
}
