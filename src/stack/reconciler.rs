//! Stack reconciler.
//!
//! Applies a negotiated change set in three phases:
//!
//! 1. wait for the plan to be evaluated,
//! 2. execute it and follow the stack events until the root stack settles,
//! 3. republish the API stage when one is declared.
//!
//! A rejected plan, a rollback or a timeout is reported through
//! [`ApplyOutcome`] instead of an error.

use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::api::{PostApplyFixup, REST_API_TYPE, STAGE_TYPE};
use crate::error::{DeployError, Result, StackError};
use crate::retry::{Poll, RetryPoller};

use super::control_plane::StackControlPlane;
use super::types::{ChangeSetStatus, StackEvent, ROOT_TERMINAL_STATUSES};

/// Status reasons of a change set that contains no changes.
const NO_CHANGES_REASONS: &[&str] = &[
    "The submitted information didn't contain changes.",
    "No updates are to be performed.",
];

/// Terminal statuses that mean the stack rolled back.
const ROLLBACK_STATUSES: &[&str] = &["ROLLBACK_COMPLETE", "UPDATE_ROLLBACK_COMPLETE"];

/// Result of applying a change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// The root stack reached a terminal status.
    Applied {
        /// Final status of the root stack.
        status: String,
        /// Deployment created by the stage fixup, if any.
        stage_deployment: Option<String>,
    },
    /// The change set contained no changes and was not executed.
    NoChanges,
    /// The change set failed evaluation.
    PlanRejected {
        /// Reason reported by the provider.
        reason: String,
    },
    /// The root stack did not settle within the polling bound.
    TimedOut,
}

impl ApplyOutcome {
    /// True if the stack ended in a rollback status.
    #[must_use]
    pub fn is_rolled_back(&self) -> bool {
        matches!(self, Self::Applied { status, .. } if ROLLBACK_STATUSES.contains(&status.as_str()))
    }

    /// True if the stack now matches the plan.
    #[must_use]
    pub fn is_success(&self) -> bool {
        match self {
            Self::Applied { .. } => !self.is_rolled_back(),
            Self::NoChanges => true,
            Self::PlanRejected { .. } | Self::TimedOut => false,
        }
    }
}

/// Result of plan evaluation.
enum Evaluation {
    Ready,
    Failed(String),
}

/// High-water mark over the newest-first event stream.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EventCursor {
    high_water: Option<String>,
}

impl EventCursor {
    /// Creates a cursor positioned after `newest`.
    #[must_use]
    pub const fn after(newest: Option<String>) -> Self {
        Self { high_water: newest }
    }

    /// Id of the newest event seen so far.
    #[must_use]
    pub fn high_water(&self) -> Option<&str> {
        self.high_water.as_deref()
    }

    /// Returns events newer than the mark, oldest first, and moves the mark
    /// to the newest one. `events` must be newest first.
    pub fn advance(&mut self, events: &[StackEvent]) -> Vec<StackEvent> {
        let mut fresh: Vec<StackEvent> = events
            .iter()
            .take_while(|e| self.high_water.as_deref() != Some(e.id.as_str()))
            .cloned()
            .collect();

        if let Some(newest) = events.first() {
            self.high_water = Some(newest.id.clone());
        }

        fresh.reverse();
        fresh
    }
}

/// Applies change sets and follows them to completion.
pub struct StackReconciler {
    /// Control plane.
    control_plane: Arc<dyn StackControlPlane>,
    /// Stage fixup, set when the desired state declares an API stage.
    fixup: Option<PostApplyFixup>,
    /// Poller for change-set evaluation.
    evaluation: RetryPoller,
    /// Poller for stack events.
    events: RetryPoller,
}

impl std::fmt::Debug for StackReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackReconciler")
            .field("fixup", &self.fixup)
            .field("evaluation", &self.evaluation)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl StackReconciler {
    /// Creates a reconciler with the default bounds: 60 evaluation polls
    /// every 5 seconds and 60 event polls every 10 seconds.
    #[must_use]
    pub fn new(control_plane: Arc<dyn StackControlPlane>) -> Self {
        Self {
            control_plane,
            fixup: None,
            evaluation: RetryPoller::new(60, Duration::from_secs(5)),
            events: RetryPoller::new(60, Duration::from_secs(10)),
        }
    }

    /// Enables the API stage fixup.
    #[must_use]
    pub fn with_stage_fixup(mut self, fixup: PostApplyFixup) -> Self {
        self.fixup = Some(fixup);
        self
    }

    /// Overrides the polling bounds.
    #[must_use]
    pub const fn with_pollers(mut self, evaluation: RetryPoller, events: RetryPoller) -> Self {
        self.evaluation = evaluation;
        self.events = events;
        self
    }

    /// Applies `change_set` to `stack_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if a provider call fails, if the change set is in a
    /// state that can never be executed, or if plan evaluation times out.
    pub async fn apply_change_set(&self, stack_name: &str, change_set: &str) -> Result<ApplyOutcome> {
        info!("Applying change set {change_set} to stack {stack_name}");

        match self.evaluate(stack_name, change_set).await? {
            Evaluation::Ready => {}
            Evaluation::Failed(reason) if is_no_changes(&reason) => {
                info!("No changes to be made");
                return Ok(ApplyOutcome::NoChanges);
            }
            Evaluation::Failed(reason) => {
                error!("Change set {change_set} failed: {reason}");
                return Ok(ApplyOutcome::PlanRejected { reason });
            }
        }

        let Some(status) = self.execute(stack_name, change_set).await? else {
            return Ok(ApplyOutcome::TimedOut);
        };

        if ROLLBACK_STATUSES.contains(&status.as_str()) {
            error!("Stack {stack_name} rolled back ({status})");
            return Ok(ApplyOutcome::Applied {
                status,
                stage_deployment: None,
            });
        }

        info!("Stack {stack_name} reached {status}");
        let stage_deployment = self.republish_stage(stack_name).await?;

        Ok(ApplyOutcome::Applied {
            status,
            stage_deployment,
        })
    }

    /// Phase A: waits until the change set is executable or failed.
    async fn evaluate(&self, stack_name: &str, change_set: &str) -> Result<Evaluation> {
        let control_plane = self.control_plane.as_ref();
        let label = format!("change set {change_set} evaluation");

        self.evaluation
            .wait_for(&label, |_| async move {
                let described = match control_plane.describe_change_set(stack_name, change_set).await {
                    Ok(described) => described,
                    Err(err) => return Poll::Failed(DeployError::Provider(err)),
                };

                match described.status {
                    ChangeSetStatus::CreateComplete => {
                        debug!("Change set has {} change(s)", described.changes.len());
                        for change in &described.changes {
                            info!(
                                "  {} {} ({})",
                                change.action, change.logical_id, change.resource_type
                            );
                        }
                        Poll::Done(Evaluation::Ready)
                    }
                    ChangeSetStatus::Failed => {
                        Poll::Done(Evaluation::Failed(described.status_reason.unwrap_or_default()))
                    }
                    ChangeSetStatus::RollbackComplete => {
                        Poll::Failed(DeployError::from(StackError::ChangeSetRejected {
                            change_set: change_set.to_string(),
                            reason: described
                                .status_reason
                                .unwrap_or_else(|| String::from("ROLLBACK_COMPLETE")),
                        }))
                    }
                    ChangeSetStatus::DeletePending
                    | ChangeSetStatus::DeleteInProgress
                    | ChangeSetStatus::DeleteComplete
                    | ChangeSetStatus::DeleteFailed => {
                        Poll::Failed(DeployError::from(StackError::ChangeSetRejected {
                            change_set: change_set.to_string(),
                            reason: described
                                .status_reason
                                .unwrap_or_else(|| String::from("change set was deleted")),
                        }))
                    }
                    other => {
                        debug!("Change set status {other:?}");
                        Poll::Continue
                    }
                }
            })
            .await
    }

    /// Phase B: executes the change set and follows the events.
    ///
    /// Returns the terminal status of the root stack, or `None` on timeout.
    async fn execute(&self, stack_name: &str, change_set: &str) -> Result<Option<String>> {
        let control_plane = self.control_plane.as_ref();

        let existing = control_plane.describe_stack_events(stack_name).await?;
        let cursor = Mutex::new(EventCursor::after(existing.first().map(|e| e.id.clone())));
        let cursor = &cursor;

        control_plane.execute_change_set(stack_name, change_set).await?;
        info!("Executing change set {change_set}");

        let label = format!("stack {stack_name} update");
        let waited = self
            .events
            .wait_for(&label, |_| async move {
                let events = match control_plane.describe_stack_events(stack_name).await {
                    Ok(events) => events,
                    Err(err) => return Poll::Failed(DeployError::Provider(err)),
                };

                let fresh = cursor
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .advance(&events);

                for event in &fresh {
                    match &event.status_reason {
                        Some(reason) => info!(
                            "{} {} {}: {reason}",
                            event.resource_type, event.logical_id, event.status
                        ),
                        None => info!("{} {} {}", event.resource_type, event.logical_id, event.status),
                    }
                }

                fresh
                    .iter()
                    .rev()
                    .find(|e| {
                        e.logical_id == stack_name
                            && ROOT_TERMINAL_STATUSES.contains(&e.status.as_str())
                    })
                    .map_or(Poll::Continue, |e| Poll::Done(e.status.clone()))
            })
            .await;

        match waited {
            Ok(status) => Ok(Some(status)),
            Err(DeployError::Stack(StackError::Timeout { attempts, .. })) => {
                warn!("Stack {stack_name} did not settle after {attempts} polls, giving up");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Phase C: finds the live API and stage and republishes it.
    async fn republish_stage(&self, stack_name: &str) -> Result<Option<String>> {
        let Some(fixup) = &self.fixup else {
            return Ok(None);
        };

        let mut api_id = None;
        let mut stage_name = None;
        let mut next_token = None;

        loop {
            let page = self
                .control_plane
                .list_stack_resources(stack_name, next_token)
                .await?;

            for resource in page.resources {
                match resource.resource_type.as_str() {
                    REST_API_TYPE if api_id.is_none() => api_id = resource.physical_id,
                    STAGE_TYPE if stage_name.is_none() => stage_name = resource.physical_id,
                    _ => {}
                }
            }

            next_token = page.next_token;
            if next_token.is_none() || (api_id.is_some() && stage_name.is_some()) {
                break;
            }
        }

        fixup
            .republish_stage(api_id.as_deref(), stage_name.as_deref())
            .await
    }
}

fn is_no_changes(reason: &str) -> bool {
    NO_CHANGES_REASONS.iter().any(|r| reason.contains(r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockApiStageControlPlane;
    use crate::stack::control_plane::MockStackControlPlane;
    use crate::stack::types::{ChangeSet, ResourceChange, ResourcePage, StackResourceSummary};
    use chrono::Utc;

    fn change_set(status: ChangeSetStatus, reason: Option<&str>) -> ChangeSet {
        ChangeSet {
            id: String::from("cs-1"),
            status,
            status_reason: reason.map(str::to_string),
            changes: vec![ResourceChange {
                action: String::from("Add"),
                logical_id: String::from("HelloFunction"),
                physical_id: None,
                resource_type: String::from("AWS::Lambda::Function"),
                replacement: None,
            }],
        }
    }

    fn event(id: &str, logical_id: &str, status: &str) -> StackEvent {
        StackEvent {
            id: id.to_string(),
            logical_id: logical_id.to_string(),
            resource_type: String::from("AWS::CloudFormation::Stack"),
            status: status.to_string(),
            status_reason: None,
            timestamp: Utc::now(),
        }
    }

    fn fast() -> RetryPoller {
        RetryPoller::new(60, Duration::ZERO)
    }

    fn reconciler(mock: MockStackControlPlane) -> StackReconciler {
        StackReconciler::new(Arc::new(mock)).with_pollers(fast(), fast())
    }

    /// Log output shared with a test subscriber.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn capture(&self) -> tracing::subscriber::DefaultGuard {
            let buffer = self.clone();
            let subscriber = tracing_subscriber::fmt()
                .with_writer(move || buffer.clone())
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_default(subscriber)
        }

        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_cursor_returns_only_new_events_oldest_first() {
        let mut cursor = EventCursor::after(Some(String::from("e1")));

        let page = vec![event("e3", "app", "B"), event("e2", "app", "A"), event("e1", "app", "old")];
        let fresh = cursor.advance(&page);
        let ids: Vec<_> = fresh.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["e2", "e3"]);
        assert_eq!(cursor.high_water(), Some("e3"));

        assert!(cursor.advance(&page).is_empty());
        assert!(cursor.advance(&[]).is_empty());
        assert_eq!(cursor.high_water(), Some("e3"));
    }

    #[test]
    fn test_cursor_without_mark_takes_everything() {
        let mut cursor = EventCursor::default();
        let fresh = cursor.advance(&[event("e2", "app", "B"), event("e1", "app", "A")]);
        assert_eq!(fresh.len(), 2);
        assert_eq!(fresh[0].id, "e1");
    }

    #[test]
    fn test_outcome_flags() {
        let applied = ApplyOutcome::Applied {
            status: String::from("UPDATE_COMPLETE"),
            stage_deployment: None,
        };
        assert!(applied.is_success());

        let rolled_back = ApplyOutcome::Applied {
            status: String::from("UPDATE_ROLLBACK_COMPLETE"),
            stage_deployment: None,
        };
        assert!(rolled_back.is_rolled_back());
        assert!(!rolled_back.is_success());
        assert!(ApplyOutcome::NoChanges.is_success());
        assert!(!ApplyOutcome::TimedOut.is_success());
    }

    #[tokio::test]
    async fn test_no_changes_skips_execution() {
        let mut mock = MockStackControlPlane::new();
        mock.expect_describe_change_set().times(1).returning(|_, _| {
            Ok(change_set(
                ChangeSetStatus::Failed,
                Some("The submitted information didn't contain changes. Submit different information to create a change set."),
            ))
        });
        mock.expect_execute_change_set().never();
        mock.expect_describe_stack_events().never();

        let logs = LogBuffer::default();
        let _guard = logs.capture();

        let outcome = reconciler(mock).apply_change_set("app", "cs-1").await.unwrap();
        assert_eq!(outcome, ApplyOutcome::NoChanges);

        let output = logs.contents();
        assert!(output.contains("INFO"));
        assert!(output.contains("No changes to be made"));
    }

    #[tokio::test]
    async fn test_deleted_change_set_fails_without_waiting() {
        let mut mock = MockStackControlPlane::new();
        mock.expect_describe_change_set()
            .times(1)
            .returning(|_, _| Ok(change_set(ChangeSetStatus::DeleteComplete, None)));
        mock.expect_execute_change_set().never();

        let err = reconciler(mock).apply_change_set("app", "cs-1").await.unwrap_err();
        assert!(matches!(
            err,
            DeployError::Stack(StackError::ChangeSetRejected { ref reason, .. })
                if reason == "change set was deleted"
        ));
    }

    #[tokio::test]
    async fn test_failed_change_set_deletion_keeps_reason() {
        let mut mock = MockStackControlPlane::new();
        mock.expect_describe_change_set()
            .times(1)
            .returning(|_, _| Ok(change_set(ChangeSetStatus::DeleteFailed, Some("Access denied"))));
        mock.expect_execute_change_set().never();

        let err = reconciler(mock).apply_change_set("app", "cs-1").await.unwrap_err();
        assert!(err.to_string().contains("Access denied"));
    }

    #[tokio::test]
    async fn test_failed_plan_is_a_soft_stop() {
        let mut mock = MockStackControlPlane::new();
        mock.expect_describe_change_set().returning(|_, _| {
            Ok(change_set(
                ChangeSetStatus::Failed,
                Some("Resource handler returned message: invalid runtime"),
            ))
        });
        mock.expect_execute_change_set().never();

        let outcome = reconciler(mock).apply_change_set("app", "cs-1").await.unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::PlanRejected {
                reason: String::from("Resource handler returned message: invalid runtime")
            }
        );
    }

    #[tokio::test]
    async fn test_rollback_complete_change_set_is_rejected() {
        let mut mock = MockStackControlPlane::new();
        mock.expect_describe_change_set()
            .returning(|_, _| Ok(change_set(ChangeSetStatus::RollbackComplete, None)));

        let err = reconciler(mock)
            .apply_change_set("app", "cs-1")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeployError::Stack(StackError::ChangeSetRejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_success_path_republishes_stage_once() {
        let mut mock = MockStackControlPlane::new();

        let mut describes = 0;
        mock.expect_describe_change_set().times(2).returning(move |_, _| {
            describes += 1;
            let status = if describes == 1 {
                ChangeSetStatus::CreateInProgress
            } else {
                ChangeSetStatus::CreateComplete
            };
            Ok(change_set(status, None))
        });
        mock.expect_execute_change_set()
            .withf(|stack, cs| stack == "app" && cs == "cs-1")
            .times(1)
            .returning(|_, _| Ok(()));

        let mut polls = 0;
        mock.expect_describe_stack_events().times(3).returning(move |_| {
            polls += 1;
            Ok(match polls {
                1 | 2 => vec![event("old", "app", "UPDATE_COMPLETE")],
                _ => vec![
                    event("e3", "app", "CREATE_COMPLETE"),
                    event("e2", "HelloFunction", "CREATE_COMPLETE"),
                    event("old", "app", "UPDATE_COMPLETE"),
                ],
            })
        });

        mock.expect_list_stack_resources()
            .withf(|_, token| token.is_none())
            .times(1)
            .returning(|_, _| {
                Ok(ResourcePage {
                    resources: vec![StackResourceSummary {
                        logical_id: String::from("HelloApi"),
                        physical_id: Some(String::from("a1b2c3")),
                        resource_type: String::from(REST_API_TYPE),
                    }],
                    next_token: Some(String::from("page-2")),
                })
            });
        mock.expect_list_stack_resources()
            .withf(|_, token| token.as_deref() == Some("page-2"))
            .times(1)
            .returning(|_, _| {
                Ok(ResourcePage {
                    resources: vec![StackResourceSummary {
                        logical_id: String::from("HelloApiStage"),
                        physical_id: Some(String::from("prod")),
                        resource_type: String::from(STAGE_TYPE),
                    }],
                    next_token: None,
                })
            });

        let mut stages = MockApiStageControlPlane::new();
        stages
            .expect_create_deployment()
            .withf(|api, stage| api == "a1b2c3" && stage == "prod")
            .times(1)
            .returning(|_, _| Ok(String::from("dep-1")));

        let outcome = reconciler(mock)
            .with_stage_fixup(PostApplyFixup::new(Arc::new(stages)))
            .apply_change_set("app", "cs-1")
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                status: String::from("CREATE_COMPLETE"),
                stage_deployment: Some(String::from("dep-1")),
            }
        );
    }

    #[tokio::test]
    async fn test_child_resource_terminal_status_is_not_success() {
        let mut mock = MockStackControlPlane::new();
        mock.expect_describe_change_set()
            .returning(|_, _| Ok(change_set(ChangeSetStatus::CreateComplete, None)));
        mock.expect_execute_change_set().returning(|_, _| Ok(()));

        let mut polls = 0;
        mock.expect_describe_stack_events().returning(move |_| {
            polls += 1;
            Ok(if polls == 1 {
                Vec::new()
            } else {
                vec![event("e1", "HelloFunction", "UPDATE_COMPLETE")]
            })
        });

        let outcome = StackReconciler::new(Arc::new(mock))
            .with_pollers(fast(), RetryPoller::new(3, Duration::ZERO))
            .apply_change_set("app", "cs-1")
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_event_timeout_resolves_without_error() {
        let mut mock = MockStackControlPlane::new();
        mock.expect_describe_change_set()
            .returning(|_, _| Ok(change_set(ChangeSetStatus::CreateComplete, None)));
        mock.expect_execute_change_set().times(1).returning(|_, _| Ok(()));
        // One call for the high-water mark, then the 60 polls.
        mock.expect_describe_stack_events()
            .times(61)
            .returning(|_| Ok(vec![event("e1", "app", "UPDATE_IN_PROGRESS")]));
        mock.expect_list_stack_resources().never();

        let logs = LogBuffer::default();
        let _guard = logs.capture();

        let outcome = reconciler(mock).apply_change_set("app", "cs-1").await.unwrap();
        assert_eq!(outcome, ApplyOutcome::TimedOut);

        let output = logs.contents();
        assert!(output.contains("WARN"));
        assert!(output.contains("Stack app did not settle after 60 polls"));
    }

    #[tokio::test]
    async fn test_rollback_skips_fixup() {
        let mut mock = MockStackControlPlane::new();
        mock.expect_describe_change_set()
            .returning(|_, _| Ok(change_set(ChangeSetStatus::CreateComplete, None)));
        mock.expect_execute_change_set().returning(|_, _| Ok(()));

        let mut polls = 0;
        mock.expect_describe_stack_events().returning(move |_| {
            polls += 1;
            Ok(if polls == 1 {
                Vec::new()
            } else {
                vec![event("e9", "app", "UPDATE_ROLLBACK_COMPLETE")]
            })
        });
        mock.expect_list_stack_resources().never();

        let mut stages = MockApiStageControlPlane::new();
        stages.expect_create_deployment().never();

        let outcome = reconciler(mock)
            .with_stage_fixup(PostApplyFixup::new(Arc::new(stages)))
            .apply_change_set("app", "cs-1")
            .await
            .unwrap();

        assert!(outcome.is_rolled_back());
    }
}
