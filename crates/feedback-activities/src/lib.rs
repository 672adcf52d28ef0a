//! Activity layer: retry/backoff and soft-skip policy around the three
//! external clients (SPEC_FULL.md §4.2-§4.4, §5).
//!
//! Activities own no durable state beyond what they return to the workflow
//! (§3 "Ownership and lifecycles"); each call here re-acquires or reuses a
//! pooled client and returns a plain value, never a live connection.

pub mod retry;

use feedback_analyzer_client::Analyzer;
use feedback_chat_client::{ChatClient, NotifyInput, NotifyOutcome};
use feedback_errors::ActivityError;
use feedback_model::{AnalysisResult, IssueSpec};
use feedback_tracker_client::{PublishInput, PublishOutcome, TrackerClient};
use retry::{retry, RetryPolicy};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Wraps the analyzer RPC client with the pipeline's retry policy (§4.2).
pub struct AnalyzeActivity {
    client: Mutex<Box<dyn Analyzer>>,
    policy: RetryPolicy,
}

impl AnalyzeActivity {
    pub fn new(client: Box<dyn Analyzer>, policy: RetryPolicy) -> Self {
        Self {
            client: Mutex::new(client),
            policy,
        }
    }

    pub async fn analyze(
        &self,
        text: &str,
        source: &str,
        user_id: &str,
    ) -> Result<AnalysisResult, ActivityError> {
        retry(&self.policy, || async {
            let mut client = self.client.lock().await;
            client.analyze_feedback(text, source, user_id).await
        })
        .await
    }
}

/// Wraps the chat client with retry for transport errors; soft-skip is
/// reported as-is without retrying, since it is not an error (§4.3).
pub struct NotifyActivity {
    client: Arc<dyn ChatClient>,
    policy: RetryPolicy,
}

impl NotifyActivity {
    pub fn new(client: Arc<dyn ChatClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub async fn notify(
        &self,
        channel_id: &str,
        spec: &IssueSpec,
        workflow_id: &str,
    ) -> Result<NotifyOutcome, ActivityError> {
        retry(&self.policy, || async {
            self.client
                .notify(NotifyInput {
                    channel_id,
                    spec,
                    workflow_id,
                })
                .await
        })
        .await
    }
}

/// Wraps the tracker client with retry; idempotency is handled inside the
/// tracker client itself via the derived token (§4.4).
pub struct PublishActivity {
    client: Arc<dyn TrackerClient>,
    policy: RetryPolicy,
}

impl PublishActivity {
    pub fn new(client: Arc<dyn TrackerClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub async fn publish(
        &self,
        feedback_id: Uuid,
        spec: &IssueSpec,
    ) -> Result<PublishOutcome, ActivityError> {
        retry(&self.policy, || async {
            self.client
                .publish(PublishInput { feedback_id, spec })
                .await
        })
        .await
    }
}
