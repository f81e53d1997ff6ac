//! Change source boundary.
//!
//! The listener stays agnostic of where changes come from: anything that can
//! stream ordered batches into a [`BatchSink`] can drive the pipeline. The
//! in-memory store implements this for tests and local runs.

use super::types::BatchSink;
use crate::error::Result;
use crate::types::CollectionPath;
use std::fmt;

/// A provider of live change streams on collections.
pub trait ChangeSource: Send + Sync {
    /// Verify the source is reachable. Called once at startup.
    fn ping(&self) -> Result<()>;

    /// Begin streaming changes on `path` into `sink`.
    ///
    /// The source owns the sink until the returned guard cancels. Batches
    /// within the stream arrive in order; the sink's return value tells the
    /// source when the subscriber is gone.
    fn subscribe(&self, path: &CollectionPath, sink: BatchSink) -> Result<SourceSubscription>;
}

/// Guard for an active source stream. Cancels the stream when dropped.
pub struct SourceSubscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl SourceSubscription {
    /// Wrap a cancellation action.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Cancel the stream now.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for SourceSubscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for SourceSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceSubscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
