//! # Herald
//!
//! A change-triggered push notification pipeline: watch per-user request
//! collections, classify each change against a policy table, build a
//! notification payload, resolve the recipient's registration token, and
//! dispatch one delivery call per event.
//!
//! ## Core Concepts
//!
//! - **Listener**: live subscriptions delivering ordered change batches
//! - **Classifier**: fixed policy table mapping changes to decisions
//! - **Builder**: pure transform from event plus template to payload
//! - **Resolver**: read-only lookup of the recipient's token
//! - **Dispatcher**: one blocking delivery call, no retry
//!
//! ## Example
//!
//! ```ignore
//! use herald::{Dispatcher, FcmConfig, FcmGateway, Pipeline, PipelineConfig};
//!
//! let gateway = FcmGateway::connect(FcmConfig::new("my-project", token))?;
//! let dispatcher = Dispatcher::new(Arc::new(gateway));
//!
//! let pipeline = Pipeline::connect(PipelineConfig::default(), source, store, dispatcher)?;
//! pipeline.watch_all_users()?;
//!
//! // ... events flow until shutdown ...
//! pipeline.stop();
//! ```

pub mod classify;
pub mod diagnostics;
pub mod dispatch;
pub mod error;
pub mod listener;
pub mod payload;
pub mod pipeline;
pub mod store;
pub mod tokens;
pub mod types;

// Re-exports
pub use classify::{Decision, NotificationTemplate, TemplateAction, TemplateId};
pub use diagnostics::{run_connectivity_sweep, SweepReport};
pub use dispatch::{
    DeliveryError, DeliveryErrorKind, DispatchResult, Dispatcher, FcmConfig, FcmGateway,
    PushGateway, RecordingGateway, SkipReason,
};
pub use error::{PipelineError, Result};
pub use listener::{
    BatchSink, ChangeSource, DropReason, Listener, SourceSubscription, StreamSignal,
    SubscriptionHandle, SubscriptionId,
};
pub use payload::{Payload, WebAction, WebVariant};
pub use pipeline::{Pipeline, PipelineConfig, PipelineStats};
pub use store::{MemoryStore, ProfileStore, UserProfile};
pub use tokens::{RegistrationToken, TokenResolver};
pub use types::*;
