//! gRPC client for the external analyzer (SPEC_FULL.md §4.2, §4.2.1, §6).
//!
//! The generated client stub stays a thin transport: every public method
//! here returns [`ActivityError`], reclassifying `tonic::Status` into the
//! pipeline's error taxonomy at this wrapper's edge rather than leaking gRPC
//! status codes past the activity boundary.

pub mod analyzer {
    tonic::include_proto!("analyzer");
}

use analyzer::analyzer_client::AnalyzerClient as GeneratedClient;
use analyzer::{AnalyzeFeedbackRequest, AnalyzeFeedbackResponse};
use async_trait::async_trait;
use feedback_errors::ActivityError;
use feedback_model::{AnalysisResult, IssueSpec, IssueType, Severity};
use std::collections::BTreeSet;
use std::str::FromStr;
use tonic::transport::Channel;
use uuid::Uuid;

/// The analyzer activity's dependency seam: lets the activity layer and its
/// tests substitute a fake without a running gRPC server, while production
/// wiring uses [`AnalyzerClient`].
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze_feedback(
        &mut self,
        text: &str,
        source: &str,
        user_id: &str,
    ) -> Result<AnalysisResult, ActivityError>;
}

pub struct AnalyzerClient {
    inner: GeneratedClient<Channel>,
}

impl AnalyzerClient {
    pub async fn connect(endpoint: &str) -> Result<Self, ActivityError> {
        let endpoint = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("http://{endpoint}")
        };
        let inner = GeneratedClient::connect(endpoint)
            .await
            .map_err(|e| ActivityError::Unavailable(e.to_string()))?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl Analyzer for AnalyzerClient {
    /// §4.2: synchronous request/response. Empty text is fatal
    /// (`invalid-argument`); transport and quota errors are retriable.
    async fn analyze_feedback(
        &mut self,
        text: &str,
        source: &str,
        user_id: &str,
    ) -> Result<AnalysisResult, ActivityError> {
        if text.trim().is_empty() {
            return Err(ActivityError::InvalidArgument("feedback text is empty".into()));
        }
        let request = tonic::Request::new(AnalyzeFeedbackRequest {
            text: text.to_string(),
            source: source.to_string(),
            user_id: user_id.to_string(),
        });
        let response = self
            .inner
            .analyze_feedback(request)
            .await
            .map_err(classify_status)?
            .into_inner();
        decode_response(response)
    }
}

fn classify_status(status: tonic::Status) -> ActivityError {
    use tonic::Code;
    match status.code() {
        Code::Unavailable | Code::DeadlineExceeded | Code::Aborted | Code::Internal => {
            ActivityError::Unavailable(status.message().to_string())
        }
        Code::InvalidArgument => ActivityError::InvalidArgument(status.message().to_string()),
        Code::ResourceExhausted => {
            ActivityError::ResourceExhausted(status.message().to_string())
        }
        Code::PermissionDenied | Code::Unauthenticated => {
            ActivityError::PermissionDenied(status.message().to_string())
        }
        _ => ActivityError::UnexpectedResponse(status.message().to_string()),
    }
}

fn decode_response(response: AnalyzeFeedbackResponse) -> Result<AnalysisResult, ActivityError> {
    let duplicate_of = if response.duplicate_of.is_empty() {
        None
    } else {
        Some(
            Uuid::from_str(&response.duplicate_of)
                .map_err(|e| ActivityError::UnexpectedResponse(format!("bad duplicate_of: {e}")))?,
        )
    };

    let spec = match response.spec {
        Some(wire_spec) if !response.is_duplicate => {
            let issue_type = parse_issue_type(&wire_spec.issue_type)?;
            let severity = parse_severity(&wire_spec.severity)?;
            let labels: BTreeSet<String> = wire_spec.labels.into_iter().collect();
            let spec = IssueSpec::new(
                wire_spec.title,
                wire_spec.body,
                issue_type,
                severity,
                labels,
                wire_spec.confidence,
            )
            .map_err(|e| ActivityError::UnexpectedResponse(e.to_string()))?;
            Some(spec)
        }
        _ => None,
    };

    Ok(AnalysisResult {
        is_duplicate: response.is_duplicate,
        duplicate_of,
        reasoning: response.reasoning,
        spec,
    })
}

fn parse_issue_type(raw: &str) -> Result<IssueType, ActivityError> {
    match raw {
        "bug" => Ok(IssueType::Bug),
        "feature" => Ok(IssueType::Feature),
        "question" => Ok(IssueType::Question),
        "unspecified" | "" => Ok(IssueType::Unspecified),
        other => Err(ActivityError::UnexpectedResponse(format!(
            "unrecognized issue type {other:?}"
        ))),
    }
}

fn parse_severity(raw: &str) -> Result<Severity, ActivityError> {
    match raw {
        "low" => Ok(Severity::Low),
        "medium" => Ok(Severity::Medium),
        "high" => Ok(Severity::High),
        "critical" => Ok(Severity::Critical),
        "unspecified" | "" => Ok(Severity::Unspecified),
        other => Err(ActivityError::UnexpectedResponse(format!(
            "unrecognized severity {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_response_maps_duplicate_without_spec() {
        let response = AnalyzeFeedbackResponse {
            is_duplicate: true,
            duplicate_of: Uuid::nil().to_string(),
            reasoning: "sim=0.97".into(),
            spec: None,
        };
        let result = decode_response(response).unwrap();
        assert!(result.is_duplicate);
        assert_eq!(result.duplicate_of, Some(Uuid::nil()));
        assert!(result.spec.is_none());
    }

    #[test]
    fn decode_response_maps_non_duplicate_with_spec() {
        let response = AnalyzeFeedbackResponse {
            is_duplicate: false,
            duplicate_of: String::new(),
            reasoning: String::new(),
            spec: Some(analyzer::IssueSpec {
                title: "App crashes on startup".into(),
                body: "body".into(),
                issue_type: "bug".into(),
                severity: "high".into(),
                labels: vec!["bug".into(), "crash".into()],
                confidence: 0.9,
            }),
        };
        let result = decode_response(response).unwrap();
        assert!(!result.is_duplicate);
        let spec = result.spec.unwrap();
        assert_eq!(spec.title, "App crashes on startup");
        assert_eq!(spec.issue_type, IssueType::Bug);
        assert_eq!(spec.severity, Severity::High);
    }

    #[test]
    fn unrecognized_status_code_becomes_unexpected_response() {
        let status = tonic::Status::new(tonic::Code::DataLoss, "disk gone");
        assert!(matches!(
            classify_status(status),
            ActivityError::UnexpectedResponse(_)
        ));
    }

    #[test]
    fn unavailable_status_is_retriable() {
        let status = tonic::Status::new(tonic::Code::Unavailable, "connection refused");
        let err = classify_status(status);
        assert!(err.is_retriable());
    }
}
