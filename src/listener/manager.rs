//! Listener managing live subscriptions on watched collections.

use crate::error::Result;
use crate::types::CollectionPath;
use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::source::{ChangeSource, SourceSubscription};
use super::types::{BatchSink, DropReason, StreamSignal, SubscriptionHandle, SubscriptionId};

/// Internal subscription state.
struct ActiveSubscription {
    path: CollectionPath,
    /// Listener-side sender, used for the close marker.
    sender: Sender<StreamSignal>,
    /// Cancels the source stream when dropped.
    guard: SourceSubscription,
}

/// Manages one subscription per watched collection.
///
/// Each subscription gets its own bounded channel. The source end never
/// blocks: a full buffer drops the offending batch and keeps the
/// subscription alive.
pub struct Listener {
    source: Arc<dyn ChangeSource>,
    /// Buffered signals per subscription.
    buffer_size: usize,
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, ActiveSubscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl Listener {
    /// Create a listener over the given change source.
    pub fn new(source: Arc<dyn ChangeSource>, buffer_size: usize) -> Self {
        Self {
            source,
            buffer_size,
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start a live subscription on a collection.
    ///
    /// Returns a handle for receiving signals. Signals arrive in stream
    /// order; the stream ends with a `Closed` marker or, if the buffer was
    /// full at close time, with channel disconnection.
    pub fn subscribe(&self, path: &CollectionPath) -> Result<SubscriptionHandle> {
        let (sender, receiver) = bounded(self.buffer_size);
        let sink = BatchSink::new(path.clone(), sender.clone());
        let guard = self.source.subscribe(path, sink)?;

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let subscription = ActiveSubscription {
            path: path.clone(),
            sender,
            guard,
        };
        self.subscriptions.write().insert(id, subscription);
        debug!(id = id.0, path = %path, "subscription started");

        Ok(SubscriptionHandle {
            id,
            path: path.clone(),
            receiver,
        })
    }

    /// Unsubscribe and clean up.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.write();
        if let Some(sub) = subs.remove(&id) {
            // Stop the source stream first so no batch lands behind the
            // close marker.
            sub.guard.cancel();
            let _ = sub.sender.try_send(StreamSignal::Closed {
                reason: DropReason::Unsubscribed,
            });
            debug!(id = id.0, path = %sub.path, "subscription ended");
        }
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }
}
