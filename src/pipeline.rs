//! Pipeline orchestration.
//!
//! Wires the listener, classifier, builder, resolver, and dispatcher into a
//! running whole. Each watched collection gets one worker thread that drains
//! its subscription in order; across collections, workers run concurrently
//! and share nothing but read-only profile lookups and counters.

use crate::classify::{classify, Decision, REQUESTS_IN, REQUESTS_OUT};
use crate::dispatch::{DispatchResult, Dispatcher, SkipReason};
use crate::error::{PipelineError, Result};
use crate::listener::{ChangeSource, Listener, StreamSignal, SubscriptionHandle, SubscriptionId};
use crate::payload;
use crate::store::ProfileStore;
use crate::tokens::TokenResolver;
use crate::types::{ChangeBatch, ChangeEvent, CollectionPath, UserId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pipeline configuration.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Root collection holding user records.
    /// Default: "users"
    pub users_root: String,

    /// Buffered signals per subscription before batches get dropped.
    /// Default: 256
    pub subscription_buffer: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            users_root: "users".to_string(),
            subscription_buffer: 256,
        }
    }
}

/// Counters of pipeline activity since startup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub batches: u64,
    pub events: u64,
    /// Notifications delivered.
    pub sent: u64,
    /// Events skipped because the recipient has no registered device.
    pub skipped_missing_token: u64,
    /// Events skipped because the source document was incomplete.
    pub skipped_incomplete: u64,
    /// Events on collections the policy table does not recognize.
    pub ignored: u64,
    /// Events whose (collection, kind) row has no resolved policy.
    pub unhandled: u64,
    /// Delivery calls that failed.
    pub delivery_failures: u64,
    /// Events that hit an infrastructure error before dispatch.
    pub faults: u64,
    /// Transport errors reported in-stream.
    pub stream_errors: u64,
}

#[derive(Default)]
struct Counters {
    batches: AtomicU64,
    events: AtomicU64,
    sent: AtomicU64,
    skipped_missing_token: AtomicU64,
    skipped_incomplete: AtomicU64,
    ignored: AtomicU64,
    unhandled: AtomicU64,
    delivery_failures: AtomicU64,
    faults: AtomicU64,
    stream_errors: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            batches: self.batches.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            skipped_missing_token: self.skipped_missing_token.load(Ordering::Relaxed),
            skipped_incomplete: self.skipped_incomplete.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            unhandled: self.unhandled.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
        }
    }
}

/// How one event ended up.
enum EventOutcome {
    Ignored,
    Unhandled,
    Dispatched(DispatchResult),
    /// Infrastructure error before any dispatch attempt.
    Faulted(PipelineError),
}

/// Shared per-event machinery, used by every worker.
struct Engine {
    resolver: TokenResolver,
    dispatcher: Dispatcher,
    counters: Counters,
}

impl Engine {
    /// Process a batch fully, in event order. One bad event never stops its
    /// siblings.
    fn process_batch(&self, path: &CollectionPath, batch: ChangeBatch) {
        self.counters.batches.fetch_add(1, Ordering::Relaxed);
        debug!(path = %path, events = batch.len(), "processing batch");

        for event in batch.iter() {
            self.counters.events.fetch_add(1, Ordering::Relaxed);
            match self.process_event(event) {
                EventOutcome::Ignored => {
                    self.counters.ignored.fetch_add(1, Ordering::Relaxed);
                }
                EventOutcome::Unhandled => {
                    self.counters.unhandled.fetch_add(1, Ordering::Relaxed);
                }
                EventOutcome::Dispatched(DispatchResult::Sent { .. }) => {
                    self.counters.sent.fetch_add(1, Ordering::Relaxed);
                }
                EventOutcome::Dispatched(DispatchResult::Skipped { reason }) => match reason {
                    SkipReason::MissingToken => {
                        self.counters
                            .skipped_missing_token
                            .fetch_add(1, Ordering::Relaxed);
                        debug!(
                            path = %event.path,
                            document = %event.document_id,
                            "recipient has no registered device"
                        );
                    }
                    SkipReason::Incomplete { .. } => {
                        self.counters
                            .skipped_incomplete
                            .fetch_add(1, Ordering::Relaxed);
                    }
                },
                EventOutcome::Dispatched(DispatchResult::Failed { .. }) => {
                    self.counters.delivery_failures.fetch_add(1, Ordering::Relaxed);
                }
                EventOutcome::Faulted(e) => {
                    self.counters.faults.fetch_add(1, Ordering::Relaxed);
                    error!(
                        path = %event.path,
                        document = %event.document_id,
                        "event processing failed: {}", e
                    );
                }
            }
        }
    }

    fn process_event(&self, event: &ChangeEvent) -> EventOutcome {
        let template = match classify(event) {
            Decision::Notify(template) => template,
            Decision::Ignore => return EventOutcome::Ignored,
            Decision::Unhandled => {
                debug!(
                    path = %event.path,
                    kind = %event.kind,
                    document = %event.document_id,
                    "no policy for change"
                );
                return EventOutcome::Unhandled;
            }
        };

        let payload = match payload::build(event, template.template()) {
            Ok(payload) => payload,
            Err(PipelineError::IncompleteEvent { field }) => {
                warn!(
                    path = %event.path,
                    document = %event.document_id,
                    field = %field,
                    "incomplete event, nothing sent"
                );
                return EventOutcome::Dispatched(DispatchResult::Skipped {
                    reason: SkipReason::Incomplete { field },
                });
            }
            Err(e) => return EventOutcome::Faulted(e),
        };

        let owner = match event.path.owner() {
            Some(owner) => owner,
            None => {
                return EventOutcome::Faulted(PipelineError::InvalidPath(format!(
                    "{} has no owner document",
                    event.path
                )))
            }
        };

        let token = match self.resolver.resolve(&owner) {
            Ok(token) => token,
            Err(e) => return EventOutcome::Faulted(e),
        };

        EventOutcome::Dispatched(self.dispatcher.dispatch(&payload, token.as_ref()))
    }
}

/// A running subscription worker.
struct Worker {
    id: SubscriptionId,
    path: CollectionPath,
    thread: JoinHandle<()>,
}

/// The assembled notification pipeline.
///
/// Construction verifies every external boundary; a pipeline in hand is a
/// usable one. Collections are watched explicitly; each watch spawns a
/// dedicated worker draining that subscription until [`stop`](Self::stop).
pub struct Pipeline {
    config: PipelineConfig,
    listener: Listener,
    store: Arc<dyn ProfileStore>,
    engine: Arc<Engine>,
    workers: Mutex<Vec<Worker>>,
}

impl Pipeline {
    /// Connect to all three boundaries and assemble the pipeline.
    ///
    /// Pings the change source, the profile store, and the push gateway;
    /// any unreachable boundary aborts startup with a `Startup` error
    /// naming it.
    pub fn connect(
        config: PipelineConfig,
        source: Arc<dyn ChangeSource>,
        store: Arc<dyn ProfileStore>,
        dispatcher: Dispatcher,
    ) -> Result<Self> {
        source
            .ping()
            .map_err(|e| PipelineError::Startup(format!("change source: {}", e)))?;
        store
            .ping()
            .map_err(|e| PipelineError::Startup(format!("profile store: {}", e)))?;
        dispatcher
            .ping()
            .map_err(|e| PipelineError::Startup(format!("push gateway: {}", e)))?;

        let listener = Listener::new(source, config.subscription_buffer);
        let engine = Arc::new(Engine {
            resolver: TokenResolver::new(Arc::clone(&store)),
            dispatcher,
            counters: Counters::default(),
        });
        info!(users_root = %config.users_root, "pipeline connected");

        Ok(Self {
            config,
            listener,
            store,
            engine,
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Watch one collection.
    ///
    /// The collection must hang off a user document; that document is the
    /// notification recipient for every event on the stream.
    pub fn watch(&self, path: &CollectionPath) -> Result<SubscriptionId> {
        self.watch_with(path, spawn_worker_thread)
    }

    fn watch_with(
        &self,
        path: &CollectionPath,
        spawn: fn(String, SubscriptionHandle, Arc<Engine>) -> std::io::Result<JoinHandle<()>>,
    ) -> Result<SubscriptionId> {
        if path.owner().is_none() {
            return Err(PipelineError::InvalidPath(format!(
                "{} has no owner document",
                path
            )));
        }

        let handle = self.listener.subscribe(path)?;
        let id = handle.id;
        let engine = Arc::clone(&self.engine);
        let thread = match spawn(format!("watch-{}", path.leaf()), handle, engine) {
            Ok(thread) => thread,
            Err(e) => {
                // The stream has no consumer; take the registration back out.
                self.listener.unsubscribe(id);
                return Err(e.into());
            }
        };

        self.workers.lock().push(Worker {
            id,
            path: path.clone(),
            thread,
        });
        info!(path = %path, "watching collection");
        Ok(id)
    }

    /// Watch both request collections of one user.
    pub fn watch_user(&self, user: &UserId) -> Result<(SubscriptionId, SubscriptionId)> {
        let inbox = self.user_collection(user, REQUESTS_IN)?;
        let outbox = self.user_collection(user, REQUESTS_OUT)?;
        Ok((self.watch(&inbox)?, self.watch(&outbox)?))
    }

    /// Watch the request collections of every user in the store.
    pub fn watch_all_users(&self) -> Result<Vec<SubscriptionId>> {
        let mut ids = Vec::new();
        for profile in self.store.profiles()? {
            let (inbox, outbox) = self.watch_user(&profile.id)?;
            ids.push(inbox);
            ids.push(outbox);
        }
        info!(subscriptions = ids.len(), "watching all users");
        Ok(ids)
    }

    /// Stop one subscription. Signals already queued are drained first.
    pub fn unwatch(&self, id: SubscriptionId) -> bool {
        let worker = {
            let mut workers = self.workers.lock();
            match workers.iter().position(|w| w.id == id) {
                Some(index) => workers.remove(index),
                None => return false,
            }
        };
        self.listener.unsubscribe(id);
        join_worker(worker);
        true
    }

    /// Stop every subscription, draining queued signals first.
    pub fn stop(&self) {
        let workers: Vec<Worker> = {
            let mut guard = self.workers.lock();
            guard.drain(..).collect()
        };
        if workers.is_empty() {
            return;
        }

        for worker in &workers {
            self.listener.unsubscribe(worker.id);
        }
        for worker in workers {
            join_worker(worker);
        }
        info!("pipeline stopped");
    }

    /// Number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Activity counters since startup.
    pub fn stats(&self) -> PipelineStats {
        self.engine.counters.snapshot()
    }

    fn user_collection(&self, user: &UserId, leaf: &str) -> Result<CollectionPath> {
        CollectionPath::parse(format!("{}/{}/{}", self.config.users_root, user, leaf))
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_worker_thread(
    name: String,
    handle: SubscriptionHandle,
    engine: Arc<Engine>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(name)
        .spawn(move || run_worker(handle, engine))
}

fn run_worker(handle: SubscriptionHandle, engine: Arc<Engine>) {
    loop {
        match handle.recv() {
            Ok(StreamSignal::Batch(batch)) => engine.process_batch(&handle.path, batch),
            Ok(StreamSignal::StreamError { message }) => {
                engine.counters.stream_errors.fetch_add(1, Ordering::Relaxed);
                warn!(path = %handle.path, "stream error: {}", message);
            }
            Ok(StreamSignal::Closed { reason }) => {
                debug!(path = %handle.path, ?reason, "stream closed");
                break;
            }
            Err(_) => break,
        }
    }
}

fn join_worker(worker: Worker) {
    if worker.thread.join().is_err() {
        error!(path = %worker.path, "worker thread panicked");
    }
}
