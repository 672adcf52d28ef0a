//! Issue tracker publish transport (SPEC_FULL.md §4.4).

use async_trait::async_trait;
use feedback_errors::ActivityError;
use feedback_model::IssueSpec;
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

const IDEMPOTENCY_MARKER_PREFIX: &str = "feedback-idempotency-token";

/// Derives a stable idempotency token from `feedback_id` (§4.4, GLOSSARY).
/// The token is a hex SHA-256 digest, long enough to be collision-safe and
/// short enough to embed unobtrusively in an issue body.
pub fn idempotency_token(feedback_id: Uuid) -> String {
    let digest = Sha256::digest(feedback_id.as_bytes());
    hex::encode(digest)
}

/// The hidden marker embedded in the issue body so a 409/pre-check can
/// recover the issue a prior, possibly-interrupted publish call created.
pub fn idempotency_marker(token: &str) -> String {
    format!("<!-- {IDEMPOTENCY_MARKER_PREFIX}:{token} -->")
}

pub struct PublishInput<'a> {
    pub feedback_id: Uuid,
    pub spec: &'a IssueSpec,
}

/// Output of the publish activity: either a created/recovered issue, or an
/// explicit soft-skip when no tracker credential is configured (§4.4, §6
/// "tracker credential | Absent ⇒ soft-skip publish").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { external_ref: String },
    SoftSkipped,
}

#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// Creates (or, on 409 / pre-check hit, recovers) the tracker issue for
    /// `input`. Idempotent across retries by construction (§4.4, L3). Returns
    /// [`PublishOutcome::SoftSkipped`] when no tracker credential is
    /// configured, rather than erroring.
    async fn publish(&self, input: PublishInput<'_>) -> Result<PublishOutcome, ActivityError>;
}

pub struct HttpTrackerClient {
    client: reqwest::Client,
    credential: Option<String>,
    target: Option<String>,
    create_issue_url: String,
    search_issues_url: String,
}

impl HttpTrackerClient {
    pub fn new(
        credential: Option<String>,
        target: Option<String>,
        create_issue_url: impl Into<String>,
        search_issues_url: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client builds with static configuration");
        Self {
            client,
            credential,
            target,
            create_issue_url: create_issue_url.into(),
            search_issues_url: search_issues_url.into(),
        }
    }
}

#[async_trait]
impl TrackerClient for HttpTrackerClient {
    async fn publish(&self, input: PublishInput<'_>) -> Result<PublishOutcome, ActivityError> {
        let Some(credential) = self.credential.as_ref() else {
            tracing::warn!(
                feedback_id = %input.feedback_id,
                "tracker credential absent, soft-skipping publish"
            );
            return Ok(PublishOutcome::SoftSkipped);
        };
        let token = idempotency_token(input.feedback_id);
        let marker = idempotency_marker(&token);
        let body = format!("{}\n\n{marker}", input.spec.body);

        let response = self
            .client
            .post(&self.create_issue_url)
            .bearer_auth(credential)
            .json(&serde_json::json!({
                "target": self.target,
                "title": input.spec.title,
                "body": body,
                "labels": input.spec.labels,
                "idempotency_key": token,
            }))
            .send()
            .await
            .map_err(|e| ActivityError::Unavailable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                #[derive(serde::Deserialize)]
                struct CreateResponse {
                    url: String,
                }
                let parsed: CreateResponse = response
                    .json()
                    .await
                    .map_err(|e| ActivityError::UnexpectedResponse(e.to_string()))?;
                Ok(PublishOutcome::Published {
                    external_ref: parsed.url,
                })
            }
            reqwest::StatusCode::CONFLICT => self.recover_existing(&token).await,
            reqwest::StatusCode::NOT_FOUND => Err(ActivityError::PermissionDenied(
                "tracker target not found".into(),
            )),
            status if status.is_server_error() => Err(ActivityError::Unavailable(format!(
                "tracker returned {status}"
            ))),
            status if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN =>
            {
                Err(ActivityError::PermissionDenied(format!(
                    "tracker returned {status}"
                )))
            }
            status => Err(ActivityError::UnexpectedResponse(format!(
                "tracker returned {status}"
            ))),
        }
    }
}

#[derive(serde::Deserialize)]
struct SearchResult {
    items: Vec<SearchItem>,
}
#[derive(serde::Deserialize)]
struct SearchItem {
    url: String,
}

/// Picks the first match out of a parsed tracker search response, or reports
/// the 409-but-no-match condition that would otherwise strand a workflow
/// mid-publish forever (§4.4, L3). Kept separate from the HTTP round-trip so
/// both paths are unit-testable without a live server.
fn pick_recovered_issue(body: &[u8]) -> Result<PublishOutcome, ActivityError> {
    let parsed: SearchResult = serde_json::from_slice(body)
        .map_err(|e| ActivityError::UnexpectedResponse(e.to_string()))?;
    parsed
        .items
        .into_iter()
        .next()
        .map(|item| PublishOutcome::Published {
            external_ref: item.url,
        })
        .ok_or_else(|| {
            ActivityError::UnexpectedResponse(
                "tracker reported 409 but no issue carries the idempotency marker".into(),
            )
        })
}

impl HttpTrackerClient {
    /// §4.4: on 409, locate the already-created issue by its embedded
    /// idempotency marker rather than treating the retry as a failure.
    async fn recover_existing(&self, token: &str) -> Result<PublishOutcome, ActivityError> {
        let credential = self.credential.as_ref().expect("checked by caller");
        let response = self
            .client
            .get(&self.search_issues_url)
            .bearer_auth(credential)
            .query(&[("q", format!("{IDEMPOTENCY_MARKER_PREFIX}:{token}"))])
            .send()
            .await
            .map_err(|e| ActivityError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ActivityError::Unavailable(format!(
                "tracker search returned {}",
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ActivityError::UnexpectedResponse(e.to_string()))?;
        pick_recovered_issue(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_token_is_deterministic() {
        let id = Uuid::new_v4();
        assert_eq!(idempotency_token(id), idempotency_token(id));
    }

    #[test]
    fn idempotency_token_differs_across_ids() {
        assert_ne!(idempotency_token(Uuid::new_v4()), idempotency_token(Uuid::new_v4()));
    }

    #[test]
    fn marker_embeds_the_token_as_a_hidden_comment() {
        let token = idempotency_token(Uuid::new_v4());
        let marker = idempotency_marker(&token);
        assert!(marker.starts_with("<!--"));
        assert!(marker.ends_with("-->"));
        assert!(marker.contains(&token));
    }

    #[tokio::test]
    async fn publish_without_credential_soft_skips() {
        let client = HttpTrackerClient::new(
            None,
            None,
            "http://unused".into(),
            "http://unused".into(),
        );
        let mut labels = std::collections::BTreeSet::new();
        labels.insert("bug".to_string());
        let spec = IssueSpec::new(
            "t".into(),
            "b".into(),
            feedback_model::IssueType::Bug,
            feedback_model::Severity::High,
            labels,
            0.5,
        )
        .unwrap();
        let outcome = client
            .publish(PublishInput {
                feedback_id: Uuid::new_v4(),
                spec: &spec,
            })
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::SoftSkipped);
    }

    #[test]
    fn pick_recovered_issue_returns_first_match() {
        let body = br#"{"items":[{"url":"https://tracker/issues/42"},{"url":"https://tracker/issues/43"}]}"#;
        let outcome = pick_recovered_issue(body).unwrap();
        assert_eq!(
            outcome,
            PublishOutcome::Published {
                external_ref: "https://tracker/issues/42".into()
            }
        );
    }

    #[test]
    fn pick_recovered_issue_errors_when_no_match_found() {
        let body = br#"{"items":[]}"#;
        let err = pick_recovered_issue(body).unwrap_err();
        assert!(matches!(err, ActivityError::UnexpectedResponse(_)));
    }
}
