//! Webhook-verifying ingestion gateway: signature verification, payload
//! normalization, broker publish, and the chat interaction callback
//! (SPEC_FULL.md §4.5, §4.5.1, §4.7).

pub mod handlers;
pub mod normalize;
pub mod signature;

pub use handlers::{router, AppState, MAX_BODY_BYTES};
pub use signature::{Ed25519Verifier, HmacVerifier, SignatureVerifier};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use ed25519_dalek::{Signer, SigningKey};
    use feedback_activities::retry::RetryPolicy;
    use feedback_activities::{AnalyzeActivity, NotifyActivity, PublishActivity};
    use feedback_analyzer_client::Analyzer;
    use feedback_broker::{BrokerError, BrokerProducer};
    use feedback_chat_client::{ChatClient, NotifyInput, NotifyOutcome};
    use feedback_errors::ActivityError;
    use feedback_model::{AnalysisResult, FeedbackEvent, IssueSpec, IssueType, Severity};
    use feedback_orchestrator::{Activities, Engine, JournalManager};
    use feedback_tracker_client::{PublishInput, PublishOutcome, TrackerClient};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tower::ServiceExt;

    struct NoopAnalyzer;

    #[async_trait]
    impl Analyzer for NoopAnalyzer {
        async fn analyze_feedback(
            &mut self,
            _text: &str,
            _source: &str,
            _user_id: &str,
        ) -> Result<AnalysisResult, ActivityError> {
            let mut labels = std::collections::BTreeSet::new();
            labels.insert("bug".to_string());
            Ok(AnalysisResult {
                is_duplicate: false,
                duplicate_of: None,
                reasoning: String::new(),
                spec: Some(
                    IssueSpec::new(
                        "t".into(),
                        "b".into(),
                        IssueType::Bug,
                        Severity::High,
                        labels,
                        0.9,
                    )
                    .unwrap(),
                ),
            })
        }
    }

    struct NoopChat;

    #[async_trait]
    impl ChatClient for NoopChat {
        async fn notify(&self, _input: NotifyInput<'_>) -> Result<NotifyOutcome, ActivityError> {
            Ok(NotifyOutcome::Posted { message_id: "m".into() })
        }
        async fn acknowledge_interaction(&self, _: &str, _: &str) -> Result<(), ActivityError> {
            Ok(())
        }
    }

    struct NoopTracker;

    #[async_trait]
    impl TrackerClient for NoopTracker {
        async fn publish(&self, input: PublishInput<'_>) -> Result<PublishOutcome, ActivityError> {
            Ok(PublishOutcome::Published {
                external_ref: format!("https://tracker/{}", input.feedback_id),
            })
        }
    }

    struct InMemoryBroker {
        published: Mutex<Vec<FeedbackEvent>>,
    }

    #[async_trait]
    impl BrokerProducer for InMemoryBroker {
        async fn publish(&self, event: &FeedbackEvent) -> Result<(), BrokerError> {
            self.published.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let journal = JournalManager::new(dir.path());
        let activities = Arc::new(Activities {
            analyze: AnalyzeActivity::new(Box::new(NoopAnalyzer), RetryPolicy::default()),
            notify: NotifyActivity::new(Arc::new(NoopChat), RetryPolicy::default()),
            publish: PublishActivity::new(Arc::new(NoopTracker), RetryPolicy::default()),
            approval_timeout: Duration::from_millis(200),
            auto_approve_on_soft_skip: false,
        });
        let engine = Engine::new(journal, activities);
        let state = AppState {
            broker: Arc::new(InMemoryBroker { published: Mutex::new(Vec::new()) }),
            engine,
            source_a_verifier: Arc::new(signature::Ed25519Verifier::new(
                SigningKey::from_bytes(&[9u8; 32]).verifying_key(),
            )),
            source_b_verifier: Arc::new(signature::HmacVerifier::new(b"test-secret".to_vec())),
        };
        (state, dir)
    }

    fn sign_source_a(body: &[u8]) -> (i64, String) {
        let signing_key = SigningKey::from_bytes(&[9u8; 32]);
        let timestamp = chrono::Utc::now().timestamp();
        let mut signed = timestamp.to_string().into_bytes();
        signed.extend_from_slice(body);
        let signature = signing_key.sign(&signed);
        (timestamp, hex::encode(signature.to_bytes()))
    }

    fn sign_source_b(body: &[u8]) -> (i64, String) {
        let timestamp = chrono::Utc::now().timestamp();
        let mut mac = Hmac::<Sha256>::new_from_slice(b"test-secret").unwrap();
        mac.update(b"v0:");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b":");
        mac.update(body);
        (timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    #[tokio::test]
    async fn source_a_webhook_accepts_valid_signature() {
        let (state, _dir) = test_state();
        let app = router(state);
        let body = br#"{"content":"App crashes on startup","author":{"username":"alice"},"channel_id":"C1"}"#;
        let (timestamp, signature) = sign_source_a(body);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/source-a")
                    .header("x-signature-timestamp", timestamp.to_string())
                    .header("x-signature", signature)
                    .body(Body::from(body.to_vec()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn source_a_webhook_rejects_bad_signature() {
        let (state, _dir) = test_state();
        let app = router(state);
        let body = br#"{"content":"App crashes on startup","author":{"username":"alice"},"channel_id":"C1"}"#;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/source-a")
                    .header("x-signature-timestamp", chrono::Utc::now().timestamp().to_string())
                    .header("x-signature", "00")
                    .body(Body::from(body.to_vec()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn source_b_echoes_url_verify_challenge() {
        let (state, _dir) = test_state();
        let app = router(state);
        let body = br#"{"challenge":"abc123"}"#;
        let (timestamp, signature) = sign_source_b(body);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/source-b")
                    .header("x-signature-timestamp", timestamp.to_string())
                    .header("x-signature", signature)
                    .body(Body::from(body.to_vec()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["challenge"], "abc123");
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let (state, _dir) = test_state();
        let app = router(state);
        let body = vec![b'a'; MAX_BODY_BYTES + 1];

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/source-a")
                    .header("x-signature-timestamp", chrono::Utc::now().timestamp().to_string())
                    .header("x-signature", "00")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn interaction_with_unknown_workflow_gets_benign_ack() {
        let (state, _dir) = test_state();
        let app = router(state);
        let body = br#"{"custom_id":"approve:fbk-does-not-exist","actor_id":"alice","interaction_id":"int-1"}"#;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/interaction")
                    .body(Body::from(body.to_vec()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(json["message"].as_str().unwrap().contains("no longer"));
    }

    #[tokio::test]
    async fn health_endpoint_reports_healthy() {
        let (state, _dir) = test_state();
        let app = router(state);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "healthy");
    }
}
