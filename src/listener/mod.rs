//! Live change subscriptions on watched collections.
//!
//! This module connects a change source to in-process subscribers:
//! - One bounded channel per watched collection
//! - Ordered batches of change events per stream tick
//! - Transport errors surfaced in-stream without ending the subscription
//!
//! Sources push through a [`BatchSink`]; consumers pull signals off a
//! [`SubscriptionHandle`]. A full buffer drops the offending batch and keeps
//! the subscription alive.
//!
//! # Example
//!
//! ```ignore
//! let listener = Listener::new(source, 256);
//!
//! let handle = listener.subscribe(&path)?;
//! loop {
//!     match handle.recv() {
//!         Ok(StreamSignal::Batch(batch)) => process(batch),
//!         Ok(StreamSignal::StreamError { message }) => eprintln!("{}", message),
//!         Ok(StreamSignal::Closed { .. }) => break,
//!         Err(_) => break,
//!     }
//! }
//! ```

mod manager;
mod source;
mod types;

pub use manager::Listener;
pub use source::{ChangeSource, SourceSubscription};
pub use types::{BatchSink, DropReason, StreamSignal, SubscriptionHandle, SubscriptionId};
