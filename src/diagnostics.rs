//! Delivery diagnostics.

use crate::dispatch::{DispatchResult, Dispatcher};
use crate::error::Result;
use crate::payload::{Payload, WebVariant};
use crate::store::ProfileStore;
use crate::tokens::RegistrationToken;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Outcome tallies of one connectivity sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Profiles examined.
    pub attempted: usize,
    /// Diagnostics delivered.
    pub sent: usize,
    /// Profiles with no registered device.
    pub skipped: usize,
    /// Deliveries that failed.
    pub failed: usize,
}

/// Send a fixed diagnostic notification to every user holding a token.
///
/// Maintenance path, separate from the live pipeline: walks the whole
/// profile store synchronously, logs the outcome per user, and never lets
/// one user's failure stop the walk.
pub fn run_connectivity_sweep(
    store: &dyn ProfileStore,
    dispatcher: &Dispatcher,
) -> Result<SweepReport> {
    let payload = diagnostic_payload();
    let mut report = SweepReport::default();

    for profile in store.profiles()? {
        report.attempted += 1;

        let token = profile
            .notification_token
            .as_deref()
            .filter(|token| !token.is_empty());
        let token = match token {
            Some(token) => RegistrationToken::new(profile.id.clone(), token),
            None => {
                report.skipped += 1;
                debug!(user = %profile.id, "no registered device, skipping");
                continue;
            }
        };

        match dispatcher.dispatch(&payload, Some(&token)) {
            DispatchResult::Sent { message_id } => {
                report.sent += 1;
                info!(user = %profile.id, message_id = %message_id, "diagnostic delivered");
            }
            DispatchResult::Skipped { .. } => {
                report.skipped += 1;
            }
            DispatchResult::Failed { error } => {
                report.failed += 1;
                warn!(user = %profile.id, "diagnostic delivery failed: {}", error);
            }
        }
    }

    info!(
        attempted = report.attempted,
        sent = report.sent,
        skipped = report.skipped,
        failed = report.failed,
        "connectivity sweep finished"
    );
    Ok(report)
}

/// The fixed payload every sweep sends.
fn diagnostic_payload() -> Payload {
    let mut data = BTreeMap::new();
    data.insert("score".to_string(), "850".to_string());
    data.insert("time".to_string(), "2:45".to_string());

    Payload {
        title: "Test Notification".to_string(),
        body: "This is a test notification.".to_string(),
        data,
        web: WebVariant {
            urgency: "high",
            require_interaction: true,
            icon: None,
            actions: Vec::new(),
        },
    }
}
