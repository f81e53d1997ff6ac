//! Notification dispatch.
//!
//! One blocking delivery call per event, no automatic retry. The gateway
//! trait keeps the HTTP details out of the pipeline; [`FcmGateway`] talks to
//! the real service, [`RecordingGateway`] stands in for tests.

use crate::error::{PipelineError, Result};
use crate::payload::{Payload, WebVariant};
use crate::tokens::RegistrationToken;
use crate::types::UserId;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default delivery endpoint.
const DEFAULT_ENDPOINT: &str = "https://fcm.googleapis.com";

/// Default per-call timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

// --- Results ---

/// Failure class of one delivery attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryErrorKind {
    /// The registration token is stale or malformed. Worth pruning.
    InvalidToken,
    /// The service could not take the call (overload, outage, timeout).
    ServiceUnavailable,
    /// Anything else.
    Unknown,
}

impl fmt::Display for DeliveryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeliveryErrorKind::InvalidToken => "invalid_token",
            DeliveryErrorKind::ServiceUnavailable => "service_unavailable",
            DeliveryErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// A failed delivery attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryError {
    pub kind: DeliveryErrorKind,
    pub message: String,
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Why an event produced no delivery attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The recipient has no valid registration token.
    MissingToken,
    /// The source document lacked a required field.
    Incomplete { field: String },
}

/// Outcome of dispatching one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchResult {
    /// Delivered; `message_id` is the service's opaque receipt.
    Sent { message_id: String },
    /// Nothing was sent, by policy.
    Skipped { reason: SkipReason },
    /// The delivery call failed.
    Failed { error: DeliveryError },
}

// --- Gateway boundary ---

/// Push delivery boundary.
pub trait PushGateway: Send + Sync {
    /// Verify the service is reachable. Called once at startup.
    fn ping(&self) -> Result<()>;

    /// Deliver one payload to one token. Blocking, bounded by the
    /// implementation's timeout. Success returns the service's message id.
    fn send(&self, payload: &Payload, token: &str)
        -> std::result::Result<String, DeliveryError>;
}

/// Hook invoked when a delivery fails with an invalid token.
pub type InvalidTokenHook = Box<dyn Fn(&UserId, &str) + Send + Sync>;

/// Dispatches payloads through a gateway, one call per event.
pub struct Dispatcher {
    gateway: Arc<dyn PushGateway>,
    on_invalid_token: Option<InvalidTokenHook>,
}

impl Dispatcher {
    pub fn new(gateway: Arc<dyn PushGateway>) -> Self {
        Self {
            gateway,
            on_invalid_token: None,
        }
    }

    /// Register a hook for invalid-token failures, e.g. to prune the stale
    /// token from the profile store. Dispatch itself never acts on it.
    pub fn with_invalid_token_hook(
        mut self,
        hook: impl Fn(&UserId, &str) + Send + Sync + 'static,
    ) -> Self {
        self.on_invalid_token = Some(Box::new(hook));
        self
    }

    /// Verify the gateway is reachable.
    pub fn ping(&self) -> Result<()> {
        self.gateway.ping()
    }

    /// Dispatch one payload.
    ///
    /// A missing token skips without touching the gateway; that is the only
    /// skip this layer produces. Failures are returned, not retried.
    pub fn dispatch(
        &self,
        payload: &Payload,
        token: Option<&RegistrationToken>,
    ) -> DispatchResult {
        let token = match token {
            Some(token) => token,
            None => {
                return DispatchResult::Skipped {
                    reason: SkipReason::MissingToken,
                }
            }
        };

        match self.gateway.send(payload, token.as_str()) {
            Ok(message_id) => {
                debug!(owner = %token.owner(), message_id = %message_id, "notification delivered");
                DispatchResult::Sent { message_id }
            }
            Err(error) => {
                if error.kind == DeliveryErrorKind::InvalidToken {
                    if let Some(hook) = &self.on_invalid_token {
                        hook(token.owner(), token.as_str());
                    }
                }
                warn!(owner = %token.owner(), kind = %error.kind, "delivery failed: {}", error.message);
                DispatchResult::Failed { error }
            }
        }
    }
}

// --- FCM HTTP v1 gateway ---

/// Configuration for the FCM HTTP v1 gateway.
#[derive(Clone, Debug)]
pub struct FcmConfig {
    /// Cloud project owning the messaging credentials.
    pub project_id: String,

    /// OAuth2 bearer token for the v1 API.
    pub auth_token: String,

    /// Service endpoint.
    /// Default: `https://fcm.googleapis.com`
    pub endpoint: String,

    /// Per-call timeout. Expiry surfaces as `ServiceUnavailable`.
    /// Default: 10s
    pub timeout: Duration,
}

impl FcmConfig {
    pub fn new(project_id: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            auth_token: auth_token.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// FCM HTTP v1 client.
pub struct FcmGateway {
    config: FcmConfig,
    send_url: String,
    client: reqwest::blocking::Client,
}

impl FcmGateway {
    /// Build the HTTP client. No network traffic happens here; use
    /// [`ping`](PushGateway::ping) to verify connectivity.
    pub fn connect(config: FcmConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PipelineError::Startup(format!("http client: {}", e)))?;

        let send_url = format!(
            "{}/v1/projects/{}/messages:send",
            config.endpoint.trim_end_matches('/'),
            config.project_id
        );

        Ok(Self {
            config,
            send_url,
            client,
        })
    }

    fn post(
        &self,
        payload: &Payload,
        token: &str,
        validate_only: bool,
    ) -> std::result::Result<String, DeliveryError> {
        let request = WireRequest {
            validate_only,
            message: wire_message(payload, token),
        };

        let response = self
            .client
            .post(&self.send_url)
            .bearer_auth(&self.config.auth_token)
            .json(&request)
            .send();

        let response = match response {
            Ok(response) => response,
            Err(e) => return Err(classify_transport_failure(&e)),
        };

        let status = response.status();
        if status.is_success() {
            let parsed: WireResponse = response.json().map_err(|e| DeliveryError {
                kind: DeliveryErrorKind::Unknown,
                message: format!("malformed response: {}", e),
            })?;
            parsed.name.ok_or_else(|| DeliveryError {
                kind: DeliveryErrorKind::Unknown,
                message: "malformed response: no message name".to_string(),
            })
        } else {
            let body = response.text().unwrap_or_default();
            Err(classify_http_failure(status, &body))
        }
    }
}

impl PushGateway for FcmGateway {
    fn ping(&self) -> Result<()> {
        // Validate-only probe. An invalid-token verdict still proves the
        // service answered and accepted our credentials.
        match self.post(&probe_payload(), "connectivity-probe", true) {
            Ok(_) => Ok(()),
            Err(e) if e.kind == DeliveryErrorKind::InvalidToken => Ok(()),
            Err(e) => Err(PipelineError::delivery(e.kind, e.message)),
        }
    }

    fn send(
        &self,
        payload: &Payload,
        token: &str,
    ) -> std::result::Result<String, DeliveryError> {
        self.post(payload, token, false)
    }
}

fn probe_payload() -> Payload {
    Payload {
        title: "Connectivity check".to_string(),
        body: "Connectivity check".to_string(),
        data: BTreeMap::new(),
        web: WebVariant {
            urgency: "high",
            require_interaction: false,
            icon: None,
            actions: Vec::new(),
        },
    }
}

/// Map an HTTP-level failure onto a delivery error class.
fn classify_http_failure(status: StatusCode, body: &str) -> DeliveryError {
    let kind = if status == StatusCode::NOT_FOUND
        || body.contains("UNREGISTERED")
        || body.contains("INVALID_ARGUMENT")
    {
        DeliveryErrorKind::InvalidToken
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        DeliveryErrorKind::ServiceUnavailable
    } else {
        DeliveryErrorKind::Unknown
    };

    DeliveryError {
        kind,
        message: format!("status {}: {}", status.as_u16(), snippet(body)),
    }
}

/// Map a transport-level failure onto a delivery error class.
fn classify_transport_failure(error: &reqwest::Error) -> DeliveryError {
    let kind = if error.is_timeout() || error.is_connect() {
        DeliveryErrorKind::ServiceUnavailable
    } else {
        DeliveryErrorKind::Unknown
    };

    DeliveryError {
        kind,
        message: error.to_string(),
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

// --- Wire format ---

#[derive(Serialize)]
struct WireRequest<'a> {
    #[serde(skip_serializing_if = "is_false")]
    validate_only: bool,
    message: WireMessage<'a>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    token: &'a str,
    data: &'a BTreeMap<String, String>,
    notification: WireNotification<'a>,
    webpush: WireWebPush<'a>,
}

#[derive(Serialize)]
struct WireNotification<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct WireWebPush<'a> {
    headers: WireWebPushHeaders<'a>,
    notification: WireWebNotification<'a>,
}

#[derive(Serialize)]
struct WireWebPushHeaders<'a> {
    #[serde(rename = "Urgency")]
    urgency: &'a str,
}

#[derive(Serialize)]
struct WireWebNotification<'a> {
    title: &'a str,
    body: &'a str,
    #[serde(rename = "requireInteraction")]
    require_interaction: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<&'a str>,
    actions: Vec<WireWebAction<'a>>,
}

#[derive(Serialize)]
struct WireWebAction<'a> {
    action: &'a str,
    title: &'a str,
}

#[derive(Deserialize)]
struct WireResponse {
    name: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn wire_message<'a>(payload: &'a Payload, token: &'a str) -> WireMessage<'a> {
    WireMessage {
        token,
        data: &payload.data,
        notification: WireNotification {
            title: &payload.title,
            body: &payload.body,
        },
        webpush: WireWebPush {
            headers: WireWebPushHeaders {
                urgency: payload.web.urgency,
            },
            notification: WireWebNotification {
                title: &payload.title,
                body: &payload.body,
                require_interaction: payload.web.require_interaction,
                icon: payload.web.icon.as_deref(),
                actions: payload
                    .web
                    .actions
                    .iter()
                    .map(|a| WireWebAction {
                        action: &a.id,
                        title: &a.label,
                    })
                    .collect(),
            },
        },
    }
}

// --- Recording gateway (test double) ---

/// One recorded delivery.
#[derive(Clone, Debug)]
pub struct RecordedSend {
    pub token: String,
    pub payload: Payload,
}

/// In-memory gateway that records deliveries instead of sending them.
///
/// Failures are scripted per token, so tests can exercise every failure
/// class without a network.
pub struct RecordingGateway {
    sent: Mutex<Vec<RecordedSend>>,
    scripted: Mutex<HashMap<String, DeliveryErrorKind>>,
    reachable: AtomicBool,
    next_id: AtomicU64,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            scripted: Mutex::new(HashMap::new()),
            reachable: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
        }
    }

    /// A gateway whose ping fails, for startup tests.
    pub fn unreachable() -> Self {
        let gateway = Self::new();
        gateway.reachable.store(false, Ordering::SeqCst);
        gateway
    }

    /// Script every delivery to `token` to fail with `kind`.
    pub fn fail_token(&self, token: &str, kind: DeliveryErrorKind) {
        self.scripted.lock().insert(token.to_string(), kind);
    }

    /// Everything delivered so far, in order.
    pub fn sent(&self) -> Vec<RecordedSend> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl Default for RecordingGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl PushGateway for RecordingGateway {
    fn ping(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PipelineError::delivery(
                DeliveryErrorKind::ServiceUnavailable,
                "gateway offline",
            ))
        }
    }

    fn send(
        &self,
        payload: &Payload,
        token: &str,
    ) -> std::result::Result<String, DeliveryError> {
        if let Some(kind) = self.scripted.lock().get(token) {
            return Err(DeliveryError {
                kind: *kind,
                message: "scripted failure".to_string(),
            });
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().push(RecordedSend {
            token: token.to_string(),
            payload: payload.clone(),
        });
        Ok(format!("projects/demo/messages/m{}", n))
    }
}
