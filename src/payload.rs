//! Payload construction.
//!
//! A pure transform from a change event plus a template to the message that
//! gets dispatched. No I/O happens here; a build failure prevents any
//! dispatch attempt for that event.

use crate::classify::NotificationTemplate;
use crate::error::{PipelineError, Result};
use crate::types::ChangeEvent;
use std::collections::BTreeMap;

/// Field holding the sender's display name.
pub const FIELD_SENDER_NAME: &str = "fromUser.name";

/// Field holding the sender's photo URL, used as the web icon.
pub const FIELD_SENDER_PHOTO: &str = "fromUser.photo";

/// Field holding the session subject.
pub const FIELD_SUBJECT: &str = "subject";

/// Field holding the weekday of the requested session.
pub const FIELD_DAY: &str = "day";

/// Field holding the start time of the requested session.
pub const FIELD_TIME: &str = "time";

/// A fully rendered notification, ready for dispatch.
#[derive(Clone, Debug, PartialEq)]
pub struct Payload {
    /// Rendered title line. Never empty.
    pub title: String,

    /// Rendered body line. Never empty.
    pub body: String,

    /// String key/value pairs delivered alongside the notification. Carries
    /// the flattened source document plus its `createTime` and `updateTime`.
    pub data: BTreeMap<String, String>,

    /// Web-specific presentation.
    pub web: WebVariant,
}

/// Presentation details for web delivery.
#[derive(Clone, Debug, PartialEq)]
pub struct WebVariant {
    /// Delivery urgency header value.
    pub urgency: &'static str,

    /// Whether the notification stays visible until acted on.
    pub require_interaction: bool,

    /// Icon URL, when the source document carries a sender photo.
    pub icon: Option<String>,

    /// Action buttons shown on the notification.
    pub actions: Vec<WebAction>,
}

/// One action button on a web notification.
#[derive(Clone, Debug, PartialEq)]
pub struct WebAction {
    pub id: String,
    pub label: String,
}

/// Build a payload from a change event and its template.
///
/// Fails with `IncompleteEvent` naming the first missing field when the
/// event lacks any of the sender name, subject, day, or time. A present but
/// blank sender name also fails, since the title needs its first token.
pub fn build(event: &ChangeEvent, template: &NotificationTemplate) -> Result<Payload> {
    let sender_name = event.fields.require_str(FIELD_SENDER_NAME)?;
    let subject = event.fields.require_str(FIELD_SUBJECT)?;
    let day = event.fields.require_str(FIELD_DAY)?;
    let time = event.fields.require_str(FIELD_TIME)?;

    let sender_first = sender_name
        .split_whitespace()
        .next()
        .ok_or_else(|| PipelineError::incomplete(FIELD_SENDER_NAME))?;

    let title = render(
        template.title,
        &[
            ("{senderFirst}", sender_first),
            ("{senderName}", sender_name),
            ("{subject}", subject),
            ("{day}", day),
            ("{time}", time),
        ],
    );
    let body = render(
        template.body,
        &[
            ("{senderFirst}", sender_first),
            ("{senderName}", sender_name),
            ("{subject}", subject),
            ("{day}", day),
            ("{time}", time),
        ],
    );

    let mut data = event.fields.flatten_strings();
    // Source timestamps win over any same-named document fields.
    data.insert("createTime".to_string(), event.create_time.to_rfc3339());
    data.insert("updateTime".to_string(), event.update_time.to_rfc3339());

    let actions = template
        .actions
        .iter()
        .map(|a| WebAction {
            id: a.id.to_string(),
            label: a.label.to_string(),
        })
        .collect();

    Ok(Payload {
        title,
        body,
        data,
        web: WebVariant {
            urgency: "high",
            require_interaction: true,
            icon: event.fields.str_at(FIELD_SENDER_PHOTO).map(str::to_string),
            actions,
        },
    })
}

/// Substitute `{name}` placeholders. Placeholder names never prefix each
/// other, so repeated single-pass replacement is unambiguous.
fn render(template: &str, substitutions: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (placeholder, value) in substitutions {
        out = out.replace(placeholder, value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::TemplateId;
    use crate::types::{CollectionPath, FieldMap};
    use serde_json::json;

    fn request_event() -> ChangeEvent {
        let path = CollectionPath::parse("users/alice/requestsIn").unwrap();
        let fields = FieldMap::from_object(json!({
            "fromUser": {"name": "Jane Doe", "photo": "http://x/p.jpg"},
            "subject": "AP Calc BC",
            "day": "Monday",
            "time": "3:30 PM",
        }))
        .unwrap();
        ChangeEvent::added(path, "req1", fields)
    }

    #[test]
    fn test_build_renders_title_and_body() {
        let event = request_event();
        let payload = build(&event, TemplateId::NewRequest.template()).unwrap();

        assert_eq!(payload.title, "Request from Jane");
        assert_eq!(
            payload.body,
            "New request from Jane Doe for AP Calc BC on Mondays at 3:30 PM."
        );
    }

    #[test]
    fn test_build_fills_web_variant() {
        let event = request_event();
        let payload = build(&event, TemplateId::NewRequest.template()).unwrap();

        assert_eq!(payload.web.urgency, "high");
        assert!(payload.web.require_interaction);
        assert_eq!(payload.web.icon.as_deref(), Some("http://x/p.jpg"));
        assert_eq!(payload.web.actions.len(), 1);
        assert_eq!(payload.web.actions[0].id, "view_request");
        assert_eq!(payload.web.actions[0].label, "View Request");
    }

    #[test]
    fn test_build_data_carries_fields_and_timestamps() {
        let event = request_event();
        let payload = build(&event, TemplateId::NewRequest.template()).unwrap();

        assert_eq!(
            payload.data.get("fromUser.name").map(String::as_str),
            Some("Jane Doe")
        );
        assert_eq!(
            payload.data.get("subject").map(String::as_str),
            Some("AP Calc BC")
        );
        assert_eq!(
            payload.data.get("createTime"),
            Some(&event.create_time.to_rfc3339())
        );
        assert_eq!(
            payload.data.get("updateTime"),
            Some(&event.update_time.to_rfc3339())
        );
    }

    #[test]
    fn test_timestamps_override_document_fields() {
        let path = CollectionPath::parse("users/alice/requestsIn").unwrap();
        let fields = FieldMap::from_object(json!({
            "fromUser": {"name": "Jane Doe"},
            "subject": "Chemistry",
            "day": "Friday",
            "time": "2:00 PM",
            "createTime": "bogus",
        }))
        .unwrap();
        let event = ChangeEvent::added(path, "req2", fields);

        let payload = build(&event, TemplateId::NewRequest.template()).unwrap();
        assert_eq!(
            payload.data.get("createTime"),
            Some(&event.create_time.to_rfc3339())
        );
    }

    #[test]
    fn test_missing_fields_fail_individually() {
        let template = TemplateId::NewRequest.template();
        for missing in ["fromUser.name", "subject", "day", "time"] {
            let mut object = json!({
                "fromUser": {"name": "Jane Doe"},
                "subject": "AP Calc BC",
                "day": "Monday",
                "time": "3:30 PM",
            });
            // Remove the field under test, nested or flat.
            if let Some(rest) = missing.strip_prefix("fromUser.") {
                object["fromUser"].as_object_mut().unwrap().remove(rest);
            } else {
                object.as_object_mut().unwrap().remove(missing);
            }
            let path = CollectionPath::parse("users/alice/requestsIn").unwrap();
            let event =
                ChangeEvent::added(path, "req3", FieldMap::from_object(object).unwrap());

            let err = build(&event, template).unwrap_err();
            match err {
                PipelineError::IncompleteEvent { field } => assert_eq!(field, missing),
                other => panic!("expected IncompleteEvent, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_blank_sender_name_fails() {
        let path = CollectionPath::parse("users/alice/requestsIn").unwrap();
        let fields = FieldMap::from_object(json!({
            "fromUser": {"name": "   "},
            "subject": "AP Calc BC",
            "day": "Monday",
            "time": "3:30 PM",
        }))
        .unwrap();
        let event = ChangeEvent::added(path, "req4", fields);

        let err = build(&event, TemplateId::NewRequest.template()).unwrap_err();
        match err {
            PipelineError::IncompleteEvent { field } => assert_eq!(field, "fromUser.name"),
            other => panic!("expected IncompleteEvent, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_photo_leaves_icon_unset() {
        let path = CollectionPath::parse("users/alice/requestsIn").unwrap();
        let fields = FieldMap::from_object(json!({
            "fromUser": {"name": "Jane Doe"},
            "subject": "AP Calc BC",
            "day": "Monday",
            "time": "3:30 PM",
        }))
        .unwrap();
        let event = ChangeEvent::added(path, "req5", fields);

        let payload = build(&event, TemplateId::NewRequest.template()).unwrap();
        assert_eq!(payload.web.icon, None);
    }
}
