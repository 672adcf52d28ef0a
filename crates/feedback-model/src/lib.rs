//! Core data model for the feedback pipeline (SPEC_FULL.md §3, §3.1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

/// The inbound channel a [`FeedbackEvent`] arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedbackSource {
    ChatA,
    ChatB,
    Direct,
}

/// Opaque per-source context carried alongside the raw text (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FeedbackOrigin {
    pub channel_id: Option<String>,
    pub user_id: Option<String>,
    pub message_id: Option<String>,
}

/// The immutable ingestion record. Created at gateway accept, appended to the
/// broker, and never mutated thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub feedback_id: Uuid,
    pub text: String,
    pub source: FeedbackSource,
    pub origin: FeedbackOrigin,
    pub received_at: DateTime<Utc>,
}

impl FeedbackEvent {
    pub fn new(text: String, source: FeedbackSource, origin: FeedbackOrigin) -> Self {
        Self {
            feedback_id: Uuid::new_v4(),
            text,
            source,
            origin,
            received_at: Utc::now(),
        }
    }

    /// The deterministic workflow id derived from this event's `feedback_id`
    /// (§4.6, §5): `"fbk-" + feedback_id`.
    pub fn workflow_id(&self) -> String {
        workflow_id_for(self.feedback_id)
    }
}

/// Deterministic workflow-id derivation shared by the launcher and any code
/// that needs to address a workflow by its originating feedback id.
pub fn workflow_id_for(feedback_id: Uuid) -> String {
    format!("fbk-{feedback_id}")
}

/// Classification of the drafted issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Bug,
    Feature,
    Question,
    Unspecified,
}

impl IssueType {
    /// §4.3 rendering rule: title emoji keyed by issue type.
    pub fn emoji(self) -> &'static str {
        match self {
            IssueType::Bug => "🐛",
            IssueType::Feature => "✨",
            IssueType::Question => "❓",
            IssueType::Unspecified => "📝",
        }
    }
}

/// Severity of the drafted issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
    Unspecified,
}

impl Severity {
    /// §4.3 rendering rule: embed color keyed by severity.
    pub fn color(self) -> u32 {
        match self {
            Severity::Critical => 0xff0000,
            Severity::High => 0xff6600,
            Severity::Medium => 0xffff00,
            Severity::Low => 0x00ff00,
            Severity::Unspecified => 0x808080,
        }
    }
}

pub const MAX_TITLE_LEN: usize = 255;

/// The structured artifact to be published (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueSpec {
    pub title: String,
    pub body: String,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: Severity,
    pub labels: BTreeSet<String>,
    /// Stored as milli-confidence (0..=1000) to keep the type `Eq`-able;
    /// exposed as a float via [`IssueSpec::confidence`].
    confidence_milli: u16,
}

#[derive(Debug, Error)]
pub enum IssueSpecError {
    #[error("title exceeds {MAX_TITLE_LEN} characters")]
    TitleTooLong,
    #[error("confidence must be in [0, 1], got {0}")]
    ConfidenceOutOfRange(f32),
}

impl IssueSpec {
    pub fn new(
        title: String,
        body: String,
        issue_type: IssueType,
        severity: Severity,
        labels: BTreeSet<String>,
        confidence: f32,
    ) -> Result<Self, IssueSpecError> {
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(IssueSpecError::TitleTooLong);
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(IssueSpecError::ConfidenceOutOfRange(confidence));
        }
        Ok(Self {
            title,
            body,
            issue_type,
            severity,
            labels,
            confidence_milli: (confidence * 1000.0).round() as u16,
        })
    }

    pub fn confidence(&self) -> f32 {
        self.confidence_milli as f32 / 1000.0
    }
}

/// The analyzer's output, attached to one [`FeedbackEvent`] (§3, §4.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub is_duplicate: bool,
    pub duplicate_of: Option<Uuid>,
    pub reasoning: String,
    /// Present iff `is_duplicate` is false.
    pub spec: Option<IssueSpec>,
}

/// An approval decision, as it travels from the interaction handler to the
/// orchestrator's signal channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    fn as_str(self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
        }
    }
}

/// The terminal-or-pending disposition of the approval stage, part of
/// `WorkflowInstance` (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalOutcome {
    Pending,
    Approved,
    Rejected,
    TimedOut,
}

/// An inbound approval decision, delivered exactly once to the named signal
/// channel of the target workflow (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    pub workflow_id: String,
    pub decision: Decision,
    pub actor_id: String,
    pub interaction_id: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("correlation id has no ':' separator")]
    MissingSeparator,
    #[error("unrecognized decision token {0:?}")]
    UnknownDecision(String),
    #[error("correlation id has an empty workflow id")]
    EmptyWorkflowId,
}

/// §4.3: the action controls carry `"{decision}:{workflow_id}"` as their
/// opaque payload; this MUST round-trip through the chat platform unchanged
/// (L1 in §8).
pub fn encode_correlation(decision: Decision, workflow_id: &str) -> String {
    format!("{}:{}", decision.as_str(), workflow_id)
}

/// Inverse of [`encode_correlation`]. Splits on the *first* `:` only, per
/// §4.7, so a workflow id that itself contains `:` is preserved.
pub fn parse_correlation(raw: &str) -> Result<(Decision, String), CorrelationError> {
    let (decision_token, workflow_id) =
        raw.split_once(':').ok_or(CorrelationError::MissingSeparator)?;
    let decision = match decision_token {
        "approve" => Decision::Approve,
        "reject" => Decision::Reject,
        other => return Err(CorrelationError::UnknownDecision(other.to_string())),
    };
    if workflow_id.is_empty() {
        return Err(CorrelationError::EmptyWorkflowId);
    }
    Ok((decision, workflow_id.to_string()))
}

/// The pipeline's state machine stages (§4.1), part of `WorkflowInstance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowStage {
    Created,
    Analyzing,
    DuplicateTerminal,
    AwaitingApproval,
    ApprovedPublishing,
    PublishedTerminal,
    RejectedTerminal,
    TimedOutTerminal,
    Failed,
}

impl WorkflowStage {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStage::DuplicateTerminal
                | WorkflowStage::PublishedTerminal
                | WorkflowStage::RejectedTerminal
                | WorkflowStage::TimedOutTerminal
                | WorkflowStage::Failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_round_trips_for_valid_inputs() {
        // L1
        for decision in [Decision::Approve, Decision::Reject] {
            let encoded = encode_correlation(decision, "fbk-abc-123");
            let (decoded_decision, decoded_id) = parse_correlation(&encoded).unwrap();
            assert_eq!(decoded_decision, decision);
            assert_eq!(decoded_id, "fbk-abc-123");
        }
    }

    #[test]
    fn correlation_rejects_unknown_decision() {
        let err = parse_correlation("maybe:fbk-1").unwrap_err();
        assert_eq!(err, CorrelationError::UnknownDecision("maybe".into()));
    }

    #[test]
    fn correlation_rejects_missing_workflow_id() {
        let err = parse_correlation("approve:").unwrap_err();
        assert_eq!(err, CorrelationError::EmptyWorkflowId);
    }

    #[test]
    fn correlation_rejects_no_separator() {
        let err = parse_correlation("approve-fbk-1").unwrap_err();
        assert_eq!(err, CorrelationError::MissingSeparator);
    }

    #[test]
    fn workflow_id_derivation_is_stable() {
        let id = Uuid::new_v4();
        assert_eq!(workflow_id_for(id), format!("fbk-{id}"));
        assert_eq!(workflow_id_for(id), workflow_id_for(id));
    }

    #[test]
    fn issue_spec_rejects_oversized_title() {
        let title = "x".repeat(MAX_TITLE_LEN + 1);
        let err = IssueSpec::new(
            title,
            String::new(),
            IssueType::Bug,
            Severity::High,
            BTreeSet::new(),
            0.5,
        )
        .unwrap_err();
        assert!(matches!(err, IssueSpecError::TitleTooLong));
    }

    #[test]
    fn issue_spec_rejects_confidence_out_of_range() {
        let err = IssueSpec::new(
            "title".into(),
            "body".into(),
            IssueType::Bug,
            Severity::High,
            BTreeSet::new(),
            1.5,
        )
        .unwrap_err();
        assert!(matches!(err, IssueSpecError::ConfidenceOutOfRange(_)));
    }

    #[test]
    fn severity_color_mapping_matches_spec() {
        assert_eq!(Severity::Critical.color(), 0xff0000);
        assert_eq!(Severity::High.color(), 0xff6600);
        assert_eq!(Severity::Medium.color(), 0xffff00);
        assert_eq!(Severity::Low.color(), 0x00ff00);
        assert_eq!(Severity::Unspecified.color(), 0x808080);
    }

    #[test]
    fn issue_type_emoji_mapping_matches_spec() {
        assert_eq!(IssueType::Bug.emoji(), "🐛");
        assert_eq!(IssueType::Feature.emoji(), "✨");
        assert_eq!(IssueType::Question.emoji(), "❓");
        assert_eq!(IssueType::Unspecified.emoji(), "📝");
    }
}
