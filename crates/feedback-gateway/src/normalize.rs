//! Normalizes each source's webhook payload shape into a [`FeedbackEvent`]
//! (§4.5: "normalize them to FeedbackEvents").

use feedback_errors::GatewayError;
use feedback_model::{FeedbackEvent, FeedbackOrigin, FeedbackSource};
use serde::Deserialize;

/// Source A's inbound payload shape (§8 S1: `{content, author:{username}, channel_id}`).
#[derive(Debug, Deserialize)]
pub struct SourceAPayload {
    pub content: String,
    pub author: SourceAAuthor,
    pub channel_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SourceAAuthor {
    pub username: String,
}

/// Source B's inbound payload shape, including the URL-verification
/// handshake (§4.5.1's route table: "incl. URL-verify challenge").
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SourceBPayload {
    Challenge { challenge: String },
    Event(SourceBEvent),
}

#[derive(Debug, Deserialize)]
pub struct SourceBEvent {
    pub text: String,
    pub user: String,
    pub channel: Option<String>,
    pub ts: Option<String>,
}

pub fn normalize_source_a(payload: SourceAPayload) -> Result<FeedbackEvent, GatewayError> {
    if payload.content.trim().is_empty() {
        return Err(GatewayError::EmptyText);
    }
    Ok(FeedbackEvent::new(
        payload.content,
        FeedbackSource::ChatA,
        FeedbackOrigin {
            channel_id: payload.channel_id,
            user_id: Some(payload.author.username),
            message_id: None,
        },
    ))
}

pub fn normalize_source_b(event: SourceBEvent) -> Result<FeedbackEvent, GatewayError> {
    if event.text.trim().is_empty() {
        return Err(GatewayError::EmptyText);
    }
    Ok(FeedbackEvent::new(
        event.text,
        FeedbackSource::ChatB,
        FeedbackOrigin {
            channel_id: event.channel,
            user_id: Some(event.user),
            message_id: event.ts,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_a_payload_maps_fields() {
        let payload = SourceAPayload {
            content: "App crashes on startup".into(),
            author: SourceAAuthor { username: "alice".into() },
            channel_id: Some("C1".into()),
        };
        let event = normalize_source_a(payload).unwrap();
        assert_eq!(event.text, "App crashes on startup");
        assert_eq!(event.source, FeedbackSource::ChatA);
        assert_eq!(event.origin.user_id, Some("alice".into()));
        assert_eq!(event.origin.channel_id, Some("C1".into()));
    }

    #[test]
    fn source_a_rejects_empty_content() {
        let payload = SourceAPayload {
            content: "   ".into(),
            author: SourceAAuthor { username: "alice".into() },
            channel_id: None,
        };
        assert!(matches!(normalize_source_a(payload), Err(GatewayError::EmptyText)));
    }

    #[test]
    fn source_b_challenge_payload_is_distinguished_from_an_event() {
        let raw = r#"{"challenge":"abc123"}"#;
        let payload: SourceBPayload = serde_json::from_str(raw).unwrap();
        assert!(matches!(payload, SourceBPayload::Challenge { challenge } if challenge == "abc123"));
    }

    #[test]
    fn source_b_event_payload_maps_fields() {
        let raw = r#"{"text":"Login button is broken","user":"bob","channel":"C2","ts":"123.456"}"#;
        let payload: SourceBPayload = serde_json::from_str(raw).unwrap();
        let SourceBPayload::Event(event) = payload else {
            panic!("expected an event payload");
        };
        let feedback = normalize_source_b(event).unwrap();
        assert_eq!(feedback.source, FeedbackSource::ChatB);
        assert_eq!(feedback.origin.message_id, Some("123.456".into()));
    }
}
