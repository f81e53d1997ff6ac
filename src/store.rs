//! Profile store boundary and the in-memory implementation.
//!
//! The pipeline reads user profiles for exactly one thing: the registration
//! token of a notification recipient. Writes never happen from here.
//! [`MemoryStore`] backs tests and local runs, and doubles as a change
//! source so a whole pipeline can run against it.

use crate::error::Result;
use crate::listener::{BatchSink, ChangeSource, DropReason, SourceSubscription};
use crate::types::{ChangeBatch, CollectionPath, UserId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One user record, reduced to what notification delivery needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,

    /// Push registration token, when the user has a registered device.
    /// An empty string means the same as absent: no registered device.
    pub notification_token: Option<String>,
}

impl UserProfile {
    pub fn with_token(id: impl Into<UserId>, token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            notification_token: Some(token.into()),
        }
    }

    pub fn without_token(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            notification_token: None,
        }
    }
}

/// Read-only access to user profiles.
pub trait ProfileStore: Send + Sync {
    /// Point lookup of one profile. `Ok(None)` when no record exists.
    fn profile(&self, id: &UserId) -> Result<Option<UserProfile>>;

    /// Every profile, in stable order. Used by the maintenance sweep.
    fn profiles(&self) -> Result<Vec<UserProfile>>;

    /// Verify the store is reachable. Called once at startup.
    fn ping(&self) -> Result<()>;
}

/// Stream registration inside [`MemoryStore`].
struct RegisteredStream {
    path: CollectionPath,
    sink: BatchSink,
}

/// In-memory profile store and change source.
///
/// Profiles are plain records; change streams are fed by calling
/// [`emit`](Self::emit) from test or driver code.
#[derive(Default)]
pub struct MemoryStore {
    profiles: Mutex<BTreeMap<UserId, UserProfile>>,
    streams: Arc<Mutex<HashMap<u64, RegisteredStream>>>,
    next_stream: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a profile.
    pub fn insert_profile(&self, profile: UserProfile) {
        self.profiles.lock().insert(profile.id.clone(), profile);
    }

    /// Remove a profile. Returns whether one existed.
    pub fn remove_profile(&self, id: &UserId) -> bool {
        self.profiles.lock().remove(id).is_some()
    }

    /// Clear a user's registration token, keeping the record.
    pub fn clear_token(&self, id: &UserId) {
        if let Some(profile) = self.profiles.lock().get_mut(id) {
            profile.notification_token = None;
        }
    }

    /// Number of live change streams.
    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }

    /// Deliver a batch to every stream watching `path`.
    ///
    /// Streams whose subscriber is gone are pruned.
    pub fn emit(&self, path: &CollectionPath, batch: ChangeBatch) {
        let mut dead = Vec::new();
        {
            let streams = self.streams.lock();
            for (key, stream) in streams.iter() {
                if stream.path == *path && !stream.sink.deliver(batch.clone()) {
                    dead.push(*key);
                }
            }
        }
        self.prune(dead);
    }

    /// Deliver a transport error to every stream watching `path`.
    pub fn emit_error(&self, path: &CollectionPath, message: &str) {
        let mut dead = Vec::new();
        {
            let streams = self.streams.lock();
            for (key, stream) in streams.iter() {
                if stream.path == *path && !stream.sink.deliver_error(message) {
                    dead.push(*key);
                }
            }
        }
        self.prune(dead);
    }

    /// End every stream watching `path`, as a source shutdown would.
    pub fn close_streams(&self, path: &CollectionPath) {
        let mut streams = self.streams.lock();
        streams.retain(|_, stream| {
            if stream.path == *path {
                stream.sink.close(DropReason::SourceClosed);
                false
            } else {
                true
            }
        });
    }

    fn prune(&self, dead: Vec<u64>) {
        if !dead.is_empty() {
            let mut streams = self.streams.lock();
            for key in dead {
                streams.remove(&key);
            }
        }
    }
}

impl ProfileStore for MemoryStore {
    fn profile(&self, id: &UserId) -> Result<Option<UserProfile>> {
        Ok(self.profiles.lock().get(id).cloned())
    }

    fn profiles(&self) -> Result<Vec<UserProfile>> {
        Ok(self.profiles.lock().values().cloned().collect())
    }

    fn ping(&self) -> Result<()> {
        Ok(())
    }
}

impl ChangeSource for MemoryStore {
    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn subscribe(&self, path: &CollectionPath, sink: BatchSink) -> Result<SourceSubscription> {
        let key = self.next_stream.fetch_add(1, Ordering::SeqCst);
        self.streams.lock().insert(
            key,
            RegisteredStream {
                path: path.clone(),
                sink,
            },
        );

        let streams = Arc::clone(&self.streams);
        Ok(SourceSubscription::new(move || {
            streams.lock().remove(&key);
        }))
    }
}
