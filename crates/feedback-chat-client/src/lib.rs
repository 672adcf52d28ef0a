//! Chat notify and interaction-acknowledgement transport (SPEC_FULL.md §4.3, §4.7).

use async_trait::async_trait;
use feedback_errors::ActivityError;
use feedback_model::{encode_correlation, Decision, IssueSpec};
use std::time::Duration;

pub const MAX_BODY_LEN: usize = 4000;
const TRUNCATION_MARKER: &str = "…";

/// The rendered embed fields, observable per §4.3's rendering rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedNotification {
    pub title: String,
    pub color: u32,
    pub body: String,
    pub severity_field: String,
    pub type_field: String,
    pub labels_field: String,
    pub correlation_field: String,
    pub approve_payload: String,
    pub reject_payload: String,
}

/// Renders the approval prompt for `spec`/`workflow_id` per §4.3's
/// observable contract.
pub fn render_notification(spec: &IssueSpec, workflow_id: &str) -> RenderedNotification {
    let title = format!("{} {}", spec.issue_type.emoji(), spec.title);
    let body = truncate_body(&spec.body);
    RenderedNotification {
        title,
        color: spec.severity.color(),
        body,
        severity_field: format!("{:?}", spec.severity).to_uppercase(),
        type_field: format!("{:?}", spec.issue_type).to_uppercase(),
        labels_field: spec.labels.iter().cloned().collect::<Vec<_>>().join(", "),
        correlation_field: workflow_id.to_string(),
        approve_payload: encode_correlation(Decision::Approve, workflow_id),
        reject_payload: encode_correlation(Decision::Reject, workflow_id),
    }
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_BODY_LEN {
        return body.to_string();
    }
    let budget = MAX_BODY_LEN - TRUNCATION_MARKER.chars().count();
    let mut truncated: String = body.chars().take(budget).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

/// Input to the notify activity (§4.3 contract).
pub struct NotifyInput<'a> {
    pub channel_id: &'a str,
    pub spec: &'a IssueSpec,
    pub workflow_id: &'a str,
}

/// Output of the notify activity: either a posted message, or an explicit
/// soft-skip when credentials are absent (§4.3, §7 kind 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Posted { message_id: String },
    SoftSkipped,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Posts the approval prompt. Returns [`NotifyOutcome::SoftSkipped`] when
    /// no bot credential is configured, rather than erroring (§4.3, §7 kind 4).
    async fn notify(&self, input: NotifyInput<'_>) -> Result<NotifyOutcome, ActivityError>;

    /// §4.7: immediate in-band acknowledgement to the user who triggered an
    /// interaction (e.g. "this decision is no longer needed").
    async fn acknowledge_interaction(
        &self,
        interaction_id: &str,
        message: &str,
    ) -> Result<(), ActivityError>;
}

/// Generic HTTP chat client. Backs both Discord- and Slack-shaped bot APIs:
/// the wire shape differs only in the request body the caller constructs, so
/// one `reqwest::Client`-backed transport (mirroring the request/response
/// handling style of a typical HTTP provider client) covers both.
pub struct HttpChatClient {
    client: reqwest::Client,
    bot_credential: Option<String>,
    post_message_url: String,
    interaction_ack_url: String,
}

impl HttpChatClient {
    pub fn new(
        bot_credential: Option<String>,
        post_message_url: impl Into<String>,
        interaction_ack_url: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client builds with static configuration");
        Self {
            client,
            bot_credential,
            post_message_url: post_message_url.into(),
            interaction_ack_url: interaction_ack_url.into(),
        }
    }
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn notify(&self, input: NotifyInput<'_>) -> Result<NotifyOutcome, ActivityError> {
        let Some(credential) = self.bot_credential.as_ref() else {
            tracing::warn!(workflow_id = input.workflow_id, "chat bot credential absent, soft-skipping notify");
            return Ok(NotifyOutcome::SoftSkipped);
        };

        let rendered = render_notification(input.spec, input.workflow_id);
        let body = serde_json::json!({
            "channel_id": input.channel_id,
            "embed": {
                "title": rendered.title,
                "color": rendered.color,
                "description": rendered.body,
                "fields": [
                    {"name": "severity", "value": rendered.severity_field},
                    {"name": "type", "value": rendered.type_field},
                    {"name": "labels", "value": rendered.labels_field},
                    {"name": "workflow", "value": rendered.correlation_field},
                ],
            },
            "components": [
                {"label": "Approve", "custom_id": rendered.approve_payload},
                {"label": "Reject", "custom_id": rendered.reject_payload},
            ],
        });

        let response = self
            .client
            .post(&self.post_message_url)
            .bearer_auth(credential)
            .json(&body)
            .send()
            .await
            .map_err(|e| ActivityError::Unavailable(e.to_string()))?;

        classify_http_status(response.status())?;

        #[derive(serde::Deserialize)]
        struct PostResponse {
            #[serde(alias = "id", alias = "ts")]
            message_id: String,
        }
        let parsed: PostResponse = response
            .json()
            .await
            .map_err(|e| ActivityError::UnexpectedResponse(e.to_string()))?;
        Ok(NotifyOutcome::Posted {
            message_id: parsed.message_id,
        })
    }

    async fn acknowledge_interaction(
        &self,
        interaction_id: &str,
        message: &str,
    ) -> Result<(), ActivityError> {
        let Some(credential) = self.bot_credential.as_ref() else {
            return Ok(());
        };
        let response = self
            .client
            .post(&self.interaction_ack_url)
            .bearer_auth(credential)
            .json(&serde_json::json!({"interaction_id": interaction_id, "content": message}))
            .send()
            .await
            .map_err(|e| ActivityError::Unavailable(e.to_string()))?;
        classify_http_status(response.status())
    }
}

fn classify_http_status(status: reqwest::StatusCode) -> Result<(), ActivityError> {
    if status.is_success() {
        return Ok(());
    }
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(ActivityError::PermissionDenied(format!(
            "chat platform returned {status}"
        )));
    }
    if status.is_server_error() {
        return Err(ActivityError::Unavailable(format!(
            "chat platform returned {status}"
        )));
    }
    Err(ActivityError::UnexpectedResponse(format!(
        "chat platform returned {status}"
    )))
}
