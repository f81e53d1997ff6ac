//! Subscription types for live collection updates.

use crate::types::{ChangeBatch, CollectionPath};
use crossbeam_channel::Sender;
use tracing::warn;

/// Signals delivered to a subscriber, in stream order.
#[derive(Clone, Debug)]
pub enum StreamSignal {
    /// An ordered batch of changes from one stream tick.
    Batch(ChangeBatch),

    /// The transport reported an error. The stream itself continues; more
    /// signals may follow.
    StreamError { message: String },

    /// The stream is over. No further signals follow.
    Closed { reason: DropReason },
}

/// Why a subscription ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Explicitly unsubscribed.
    Unsubscribed,
    /// The change source shut down.
    SourceClosed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to consume one subscription's signals.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// The collection this subscription watches.
    pub path: CollectionPath,
    /// Channel to receive signals.
    pub receiver: crossbeam_channel::Receiver<StreamSignal>,
}

impl SubscriptionHandle {
    /// Receive the next signal (blocking).
    pub fn recv(&self) -> Result<StreamSignal, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a signal (non-blocking).
    pub fn try_recv(&self) -> Result<StreamSignal, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<StreamSignal, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Delivery side of a subscription, held by the change source.
///
/// All sends are non-blocking. A full buffer drops the signal rather than
/// stalling the source or killing the subscriber.
pub struct BatchSink {
    path: CollectionPath,
    sender: Sender<StreamSignal>,
}

impl BatchSink {
    pub(crate) fn new(path: CollectionPath, sender: Sender<StreamSignal>) -> Self {
        Self { path, sender }
    }

    /// The collection this sink feeds.
    pub fn path(&self) -> &CollectionPath {
        &self.path
    }

    /// Deliver a batch. Returns false once the subscriber is gone, so the
    /// source can stop producing.
    pub fn deliver(&self, batch: ChangeBatch) -> bool {
        match self.sender.try_send(StreamSignal::Batch(batch)) {
            Ok(()) => true,
            Err(crossbeam_channel::TrySendError::Full(signal)) => {
                if let StreamSignal::Batch(dropped) = signal {
                    warn!(
                        path = %self.path,
                        events = dropped.len(),
                        "subscriber buffer full, dropping batch"
                    );
                }
                true
            }
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
        }
    }

    /// Deliver a transport error. Returns false once the subscriber is gone.
    pub fn deliver_error(&self, message: impl Into<String>) -> bool {
        let signal = StreamSignal::StreamError {
            message: message.into(),
        };
        match self.sender.try_send(signal) {
            Ok(()) => true,
            Err(crossbeam_channel::TrySendError::Full(_)) => true,
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
        }
    }

    /// Mark the stream as over (best effort).
    pub fn close(&self, reason: DropReason) {
        let _ = self.sender.try_send(StreamSignal::Closed { reason });
    }
}
