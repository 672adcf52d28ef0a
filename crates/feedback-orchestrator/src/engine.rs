//! The durable orchestrator's public contract and state machine
//! (SPEC_FULL.md §4.1, §4.1.1, §5).

use crate::journal::JournalManager;
use crate::state::{DescribeResponse, WorkflowInstance};
use feedback_activities::{AnalyzeActivity, NotifyActivity, PublishActivity};
use feedback_chat_client::NotifyOutcome;
use feedback_errors::OrchestratorError;
use feedback_model::{ApprovalOutcome, Decision, FeedbackEvent, SignalEnvelope, WorkflowStage};
use feedback_tracker_client::PublishOutcome;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

/// The three activities plus the policy knobs the state machine consults
/// (§6 configuration table; §9 Open Question 1's `auto-approve-on-soft-skip`).
pub struct Activities {
    pub analyze: AnalyzeActivity,
    pub notify: NotifyActivity,
    pub publish: PublishActivity,
    pub approval_timeout: Duration,
    pub auto_approve_on_soft_skip: bool,
}

/// Per-workflow bookkeeping not itself part of the durable state: the
/// in-process handle used to deliver signals (§4.1 "Signal").
struct RunningWorkflow {
    instance: Arc<RwLock<WorkflowInstance>>,
    signal_tx: Option<mpsc::Sender<SignalEnvelope>>,
}

/// The orchestrator engine. Holds exclusive write ownership of
/// `WorkflowInstance` state (§5 "Shared-resource policy"); activities may
/// only mutate it by returning values to the engine.
pub struct Engine {
    registry: RwLock<HashMap<String, RunningWorkflow>>,
    journal: JournalManager,
    activities: Arc<Activities>,
}

impl Engine {
    pub fn new(journal: JournalManager, activities: Arc<Activities>) -> Arc<Self> {
        Arc::new(Self {
            registry: RwLock::new(HashMap::new()),
            journal,
            activities,
        })
    }

    /// `Start(event) -> workflow_id` (§4.1). Idempotent: a duplicate call
    /// with the same `feedback_id` returns the existing handle and starts no
    /// second instance (P3, L2).
    pub async fn start(self: &Arc<Self>, event: FeedbackEvent) -> Result<String, OrchestratorError> {
        let workflow_id = event.workflow_id();

        {
            let registry = self.registry.read().await;
            if registry.contains_key(&workflow_id) {
                return Ok(workflow_id);
            }
        }
        // Re-check under the write lock to close the race between two
        // concurrent Start calls for the same feedback_id.
        let mut registry = self.registry.write().await;
        if let Some(existing) = registry.get(&workflow_id) {
            let _ = existing;
            return Ok(workflow_id);
        }

        let instance = match self.journal.load(&workflow_id)? {
            Some(existing) => existing,
            None => WorkflowInstance::new(workflow_id.clone(), event),
        };
        self.journal.save(&instance)?;

        let (signal_tx, signal_rx) = mpsc::channel(1);
        let instance = Arc::new(RwLock::new(instance));
        registry.insert(
            workflow_id.clone(),
            RunningWorkflow {
                instance: instance.clone(),
                signal_tx: Some(signal_tx),
            },
        );
        drop(registry);

        let engine = self.clone();
        let workflow_id_for_task = workflow_id.clone();
        tokio::spawn(async move {
            engine.run_workflow(workflow_id_for_task, instance, signal_rx).await;
        });

        Ok(workflow_id)
    }

    /// `Signal(workflow_id, "user-action", {decision, actor_id})` (§4.1).
    pub async fn signal(
        &self,
        workflow_id: &str,
        envelope: SignalEnvelope,
    ) -> Result<(), OrchestratorError> {
        let registry = self.registry.read().await;
        let running = registry
            .get(workflow_id)
            .ok_or_else(|| OrchestratorError::NotFound {
                workflow_id: workflow_id.to_string(),
            })?;

        let stage = running.instance.read().await.stage;
        if stage.is_terminal() {
            return Err(OrchestratorError::NotFound {
                workflow_id: workflow_id.to_string(),
            });
        }

        if let Some(tx) = &running.signal_tx {
            // First signal is authoritative; a full channel (one already
            // buffered/consumed) means subsequent signals are silently
            // acknowledged without altering state (§4.1 "Tie-break rules").
            let _ = tx.try_send(envelope);
        }
        Ok(())
    }

    /// `Describe(workflow_id) -> {...}` (§4.1): read-only projection.
    pub async fn describe(&self, workflow_id: &str) -> Result<DescribeResponse, OrchestratorError> {
        let registry = self.registry.read().await;
        if let Some(running) = registry.get(workflow_id) {
            return Ok(running.instance.read().await.describe());
        }
        drop(registry);
        self.journal
            .load(workflow_id)?
            .map(|instance| instance.describe())
            .ok_or_else(|| OrchestratorError::NotFound {
                workflow_id: workflow_id.to_string(),
            })
    }

    async fn run_workflow(
        self: Arc<Self>,
        workflow_id: String,
        instance: Arc<RwLock<WorkflowInstance>>,
        mut signal_rx: mpsc::Receiver<SignalEnvelope>,
    ) {
        if let Err(err) = self.drive(&workflow_id, &instance, &mut signal_rx).await {
            tracing::error!(workflow_id, error = %err, "workflow driver failed");
        }
        // The signal channel is no longer consulted once the workflow has
        // reached a terminal stage; drop the sender half so later Signal
        // calls observe NotFound rather than buffering forever.
        let mut registry = self.registry.write().await;
        if let Some(running) = registry.get_mut(&workflow_id) {
            running.signal_tx = None;
        }
    }

    async fn set_stage(&self, instance: &Arc<RwLock<WorkflowInstance>>, stage: WorkflowStage) {
        let mut guard = instance.write().await;
        guard.stage = stage;
        if stage.is_terminal() {
            guard.completed_at = Some(chrono::Utc::now());
        }
        if let Err(err) = self.journal.save(&guard) {
            tracing::error!(workflow_id = %guard.workflow_id, error = %err, "failed to persist journal entry");
        }
    }

    /// Drives a workflow from whatever stage it is actually in, per §4.1.1's
    /// replay contract: a step with a recorded outcome is replayed from the
    /// journaled instance, never re-invoked. `start()` calls this both for
    /// brand-new instances and for ones loaded from the journal (broker
    /// redelivery, process restart), so an already-terminal or mid-flight
    /// instance must resume in place rather than restart at `Analyzing`.
    async fn drive(
        &self,
        workflow_id: &str,
        instance: &Arc<RwLock<WorkflowInstance>>,
        signal_rx: &mut mpsc::Receiver<SignalEnvelope>,
    ) -> Result<(), OrchestratorError> {
        let resume_stage = instance.read().await.stage;
        if resume_stage.is_terminal() {
            return Ok(());
        }

        let analysis = match instance.read().await.analysis.clone() {
            Some(recorded) => recorded,
            None => {
                self.set_stage(instance, WorkflowStage::Analyzing).await;

                let (text, source, user_id) = {
                    let guard = instance.read().await;
                    (
                        guard.feedback.text.clone(),
                        format!("{:?}", guard.feedback.source),
                        guard
                            .feedback
                            .origin
                            .user_id
                            .clone()
                            .unwrap_or_default(),
                    )
                };

                match self.activities.analyze.analyze(&text, &source, &user_id).await {
                    Ok(result) => {
                        instance.write().await.analysis = Some(result.clone());
                        result
                    }
                    Err(err) => {
                        tracing::warn!(workflow_id, error = %err, "analyze activity failed terminally");
                        self.set_stage(instance, WorkflowStage::Failed).await;
                        return Ok(());
                    }
                }
            }
        };

        if analysis.is_duplicate {
            self.set_stage(instance, WorkflowStage::DuplicateTerminal).await;
            return Ok(());
        }

        let Some(spec) = analysis.spec.clone() else {
            tracing::error!(workflow_id, "non-duplicate analysis missing a spec");
            self.set_stage(instance, WorkflowStage::Failed).await;
            return Ok(());
        };

        // A resume into ApprovedPublishing means the approval decision is
        // already recorded; notify and the approval wait are both skipped.
        // A resume into AwaitingApproval means notify already succeeded (or
        // soft-skipped) on a prior run; only the wait is redone. Anything
        // earlier (Created/Analyzing, including a fresh instance) runs both.
        let decision = if resume_stage == WorkflowStage::ApprovedPublishing {
            Some(Decision::Approve)
        } else {
            if resume_stage != WorkflowStage::AwaitingApproval {
                let channel_id = instance
                    .read()
                    .await
                    .feedback
                    .origin
                    .channel_id
                    .clone()
                    .unwrap_or_default();

                let notify_result = self
                    .activities
                    .notify
                    .notify(&channel_id, &spec, workflow_id)
                    .await;

                let proceed_to_approval = match notify_result {
                    Ok(NotifyOutcome::Posted { .. }) => true,
                    Ok(NotifyOutcome::SoftSkipped) => self.activities.auto_approve_on_soft_skip,
                    Err(err) => {
                        tracing::warn!(workflow_id, error = %err, "notify activity failed terminally");
                        false
                    }
                };

                if !proceed_to_approval {
                    self.set_stage(instance, WorkflowStage::Failed).await;
                    return Ok(());
                }

                self.set_stage(instance, WorkflowStage::AwaitingApproval).await;
            }

            match tokio::time::timeout(self.activities.approval_timeout, signal_rx.recv()).await {
                Ok(Some(envelope)) => Some(envelope.decision),
                Ok(None) => None,
                Err(_elapsed) => None,
            }
        };

        match decision {
            Some(Decision::Approve) => {
                instance.write().await.approval_outcome = ApprovalOutcome::Approved;
                self.set_stage(instance, WorkflowStage::ApprovedPublishing).await;
                let feedback_id = instance.read().await.feedback.feedback_id;
                match self.activities.publish.publish(feedback_id, &spec).await {
                    Ok(PublishOutcome::Published { external_ref }) => {
                        instance.write().await.external_ref = Some(external_ref);
                        self.set_stage(instance, WorkflowStage::PublishedTerminal).await;
                    }
                    Ok(PublishOutcome::SoftSkipped) => {
                        tracing::warn!(workflow_id, "tracker credential absent, publish soft-skipped");
                        self.set_stage(instance, WorkflowStage::PublishedTerminal).await;
                    }
                    Err(err) => {
                        tracing::warn!(workflow_id, error = %err, "publish activity failed terminally");
                        self.set_stage(instance, WorkflowStage::Failed).await;
                    }
                }
            }
            Some(Decision::Reject) => {
                instance.write().await.approval_outcome = ApprovalOutcome::Rejected;
                self.set_stage(instance, WorkflowStage::RejectedTerminal).await;
            }
            None => {
                instance.write().await.approval_outcome = ApprovalOutcome::TimedOut;
                self.set_stage(instance, WorkflowStage::TimedOutTerminal).await;
            }
        }

        Ok(())
    }
}
