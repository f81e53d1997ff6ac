//! Change classification.
//!
//! Maps an observed change onto a notification decision via a fixed policy
//! table keyed by collection name and change kind. Rows the table does not
//! resolve are reported as [`Decision::Unhandled`] so callers can count them
//! instead of silently doing nothing.

use crate::types::{ChangeEvent, ChangeKind};
use std::fmt;

/// Collection of requests addressed to a user.
pub const REQUESTS_IN: &str = "requestsIn";

/// Collection of requests a user has sent.
pub const REQUESTS_OUT: &str = "requestsOut";

// --- Templates ---

/// Identifies a notification template in the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TemplateId {
    /// A new incoming session request.
    NewRequest,
}

impl TemplateId {
    /// The template this id names.
    pub fn template(&self) -> &'static NotificationTemplate {
        match self {
            TemplateId::NewRequest => &NEW_REQUEST,
        }
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateId::NewRequest => write!(f, "new_request"),
        }
    }
}

/// A notification text template.
///
/// Placeholders are `{name}` tokens substituted by the payload builder.
/// Placeholder names never prefix one another, so plain string replacement
/// is unambiguous.
pub struct NotificationTemplate {
    /// Title line with placeholders.
    pub title: &'static str,

    /// Body line with placeholders.
    pub body: &'static str,

    /// Interactive actions offered on the rendered notification.
    pub actions: &'static [TemplateAction],
}

/// A single action button on a notification.
pub struct TemplateAction {
    /// Stable action identifier reported back on click.
    pub id: &'static str,

    /// Human-readable button label.
    pub label: &'static str,
}

static NEW_REQUEST: NotificationTemplate = NotificationTemplate {
    title: "Request from {senderFirst}",
    body: "New request from {senderName} for {subject} on {day}s at {time}.",
    actions: &[TemplateAction {
        id: "view_request",
        label: "View Request",
    }],
};

// --- Policy table ---

/// Outcome of classifying one change event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Build and dispatch a notification from the named template.
    Notify(TemplateId),

    /// The change is recognized and deliberately produces nothing.
    Ignore,

    /// No policy row resolves this (collection, kind) pair.
    Unhandled,
}

/// Classify a change event against the policy table.
///
/// Only additions to a user's incoming-request collection notify today.
/// Changes on the outgoing-request collection are observed but have no
/// resolved policy, as do modifications and removals of incoming requests;
/// those come back as [`Decision::Unhandled`]. Anything on an unrecognized
/// collection is ignored.
pub fn classify(event: &ChangeEvent) -> Decision {
    match (event.path.leaf(), event.kind) {
        (REQUESTS_IN, ChangeKind::Added) => Decision::Notify(TemplateId::NewRequest),
        (REQUESTS_IN, ChangeKind::Modified) => Decision::Unhandled,
        (REQUESTS_IN, ChangeKind::Removed) => Decision::Unhandled,
        (REQUESTS_OUT, _) => Decision::Unhandled,
        _ => Decision::Ignore,
    }
}
