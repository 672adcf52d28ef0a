//! Durable workflow state (SPEC_FULL.md §3 `WorkflowInstance`).

use chrono::{DateTime, Utc};
use feedback_model::{AnalysisResult, ApprovalOutcome, FeedbackEvent, WorkflowStage};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One durable execution of the pipeline state machine, one per accepted
/// `FeedbackEvent` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub workflow_id: String,
    pub run_id: Uuid,
    pub stage: WorkflowStage,
    pub feedback: FeedbackEvent,
    pub analysis: Option<AnalysisResult>,
    pub approval_outcome: ApprovalOutcome,
    /// Set at most once; setting it is durable (§3 invariant).
    pub external_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    pub fn new(workflow_id: String, feedback: FeedbackEvent) -> Self {
        Self {
            workflow_id,
            run_id: Uuid::new_v4(),
            stage: WorkflowStage::Created,
            feedback,
            analysis: None,
            approval_outcome: ApprovalOutcome::Pending,
            external_ref: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Read-only projection for operator tooling (§4.1 `Describe`).
    pub fn describe(&self) -> DescribeResponse {
        DescribeResponse {
            workflow_id: self.workflow_id.clone(),
            stage: self.stage,
            analysis: self.analysis.clone(),
            approval_outcome: self.approval_outcome,
            external_ref: self.external_ref.clone(),
        }
    }
}

/// `Describe(workflow_id) -> {state, analysis?, approval_outcome?, external_ref?}` (§4.1).
#[derive(Debug, Clone, Serialize)]
pub struct DescribeResponse {
    pub workflow_id: String,
    pub stage: WorkflowStage,
    pub analysis: Option<AnalysisResult>,
    pub approval_outcome: ApprovalOutcome,
    pub external_ref: Option<String>,
}
