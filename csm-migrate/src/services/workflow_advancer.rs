//! Workflow Advancer
//!
//! Promotes the root entry through the editorial workflow and deep-publishes
//! it. Stages only move forward, one step at a time:
//!
//! ```text
//! Draft -> InReview -> Approved -> Published
//! ```
//!
//! Each transition waits a short settle interval before the next one. A
//! transition the store rejects is retried a bounded number of times before
//! the entry is reported as stuck. Content types without a workflow skip the
//! stage calls and are published directly.

use crate::error::{MigrateError, MigrateResult};
use crate::services::entry_repository::EntryRepository;
use crate::types::EntryHandle;
use csm_common::config::PacingConfig;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum WorkflowStage {
    Draft,
    InReview,
    Approved,
    Published,
}

impl WorkflowStage {
    /// The only stage this one may move to
    pub fn next(self) -> Option<Self> {
        match self {
            WorkflowStage::Draft => Some(WorkflowStage::InReview),
            WorkflowStage::InReview => Some(WorkflowStage::Approved),
            WorkflowStage::Approved => Some(WorkflowStage::Published),
            WorkflowStage::Published => None,
        }
    }
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkflowStage::Draft => "Draft",
            WorkflowStage::InReview => "InReview",
            WorkflowStage::Approved => "Approved",
            WorkflowStage::Published => "Published",
        })
    }
}

/// Stage history of one entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryWorkflow {
    pub handle: EntryHandle,
    pub stage: WorkflowStage,
    pub history: Vec<WorkflowStage>,
    /// Content type has no workflow; stages were not set in the store
    pub exempt: bool,
}

impl EntryWorkflow {
    pub fn new(handle: EntryHandle) -> Self {
        Self {
            handle,
            stage: WorkflowStage::Draft,
            history: vec![WorkflowStage::Draft],
            exempt: false,
        }
    }

    /// Record a transition; only the immediate successor is accepted
    pub fn transition(&mut self, to: WorkflowStage) -> MigrateResult<()> {
        if self.stage.next() != Some(to) {
            return Err(MigrateError::InvalidTransition {
                from: self.stage.to_string(),
                to: to.to_string(),
            });
        }
        self.stage = to;
        self.history.push(to);
        Ok(())
    }
}

/// Settle delay after each transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleDelays {
    pub review: Duration,
    pub approve: Duration,
}

#[derive(Debug, Clone)]
pub struct WorkflowPolicy {
    pub settle: SettleDelays,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl WorkflowPolicy {
    pub fn from_pacing(pacing: &PacingConfig) -> Self {
        Self {
            settle: SettleDelays {
                review: Duration::from_millis(pacing.review_settle_ms),
                approve: Duration::from_millis(pacing.approve_settle_ms),
            },
            max_attempts: pacing.workflow_max_attempts.max(1),
            retry_delay: Duration::from_millis(pacing.workflow_retry_delay_ms),
        }
    }
}

pub struct WorkflowAdvancer {
    repository: Arc<EntryRepository>,
    policy: WorkflowPolicy,
}

impl WorkflowAdvancer {
    pub fn new(repository: Arc<EntryRepository>, policy: WorkflowPolicy) -> Self {
        Self { repository, policy }
    }

    /// Promote an entry to Approved and deep-publish it
    pub async fn promote_and_publish(
        &self,
        handle: &EntryHandle,
        cancel: &CancellationToken,
    ) -> MigrateResult<EntryWorkflow> {
        let mut workflow = EntryWorkflow::new(handle.clone());

        if self.repository.is_exempt_from_workflow(&handle.content_type) {
            tracing::debug!(uid = %handle.uid, content_type = %handle.content_type, "No workflow for content type");
            workflow.exempt = true;
            workflow.transition(WorkflowStage::InReview)?;
            workflow.transition(WorkflowStage::Approved)?;
        } else {
            for (target, settle) in [
                (WorkflowStage::InReview, self.policy.settle.review),
                (WorkflowStage::Approved, self.policy.settle.approve),
            ] {
                if cancel.is_cancelled() {
                    return Err(MigrateError::Cancelled);
                }
                self.transition_with_retry(&mut workflow, target).await?;
                tokio::time::sleep(settle).await;
            }
        }

        if cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }
        self.repository.publish_deep(handle).await?;
        workflow.transition(WorkflowStage::Published)?;
        tracing::info!(uid = %handle.uid, content_type = %handle.content_type, "Entry published with references");
        Ok(workflow)
    }

    async fn transition_with_retry(&self, workflow: &mut EntryWorkflow, target: WorkflowStage) -> MigrateResult<()> {
        let handle = workflow.handle.clone();
        let mut last_error = None;

        for attempt in 1..=self.policy.max_attempts {
            match self.repository.advance_workflow(&handle, target).await {
                Ok(()) => {
                    tracing::info!(uid = %handle.uid, stage = %target, attempt, "Workflow stage advanced");
                    return workflow.transition(target);
                }
                Err(e) => {
                    tracing::warn!(
                        uid = %handle.uid,
                        stage = %target,
                        attempt,
                        error = %e,
                        "Workflow transition rejected"
                    );
                    last_error = Some(e);
                    if attempt < self.policy.max_attempts {
                        tokio::time::sleep(self.policy.retry_delay).await;
                    }
                }
            }
        }

        Err(MigrateError::WorkflowStuck {
            content_type: handle.content_type,
            uid: handle.uid,
            stage: target.to_string(),
            attempts: self.policy.max_attempts,
            reason: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csm_common::Locale;

    fn handle() -> EntryHandle {
        EntryHandle::new("feature_page", "blt1", Locale::EnUs)
    }

    #[test]
    fn test_stages_move_forward_one_step() {
        let mut wf = EntryWorkflow::new(handle());
        assert_eq!(wf.stage, WorkflowStage::Draft);

        assert!(matches!(
            wf.transition(WorkflowStage::Approved),
            Err(MigrateError::InvalidTransition { .. })
        ));
        wf.transition(WorkflowStage::InReview).unwrap();
        wf.transition(WorkflowStage::Approved).unwrap();
        assert!(wf.transition(WorkflowStage::InReview).is_err());
        wf.transition(WorkflowStage::Published).unwrap();
        assert!(wf.transition(WorkflowStage::Published).is_err());

        assert_eq!(
            wf.history,
            vec![
                WorkflowStage::Draft,
                WorkflowStage::InReview,
                WorkflowStage::Approved,
                WorkflowStage::Published
            ]
        );
        assert!(wf.history.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_policy_from_pacing() {
        let policy = WorkflowPolicy::from_pacing(&PacingConfig::default());
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.settle.review, Duration::from_millis(100));
        assert_eq!(WorkflowPolicy::from_pacing(&PacingConfig::immediate()).settle.approve, Duration::ZERO);
    }
}
