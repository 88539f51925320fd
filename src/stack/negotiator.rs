//! Change-set negotiation.
//!
//! Creating a change set fails in a handful of recoverable ways when the
//! stack is being changed by someone else or was left in a bad state. The
//! negotiator repairs the situation locally (delete and retry, or wait) and
//! only surfaces errors it cannot classify.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{DeployError, Result, StackError};
use crate::retry::{Poll, RetryPoller};

use super::classify::{classify, is_stack_missing, FailureKind};
use super::control_plane::StackControlPlane;
use super::types::{
    ChangeSetHandle, ChangeSetType, CreateChangeSetRequest, ImportResource, CHANGE_SET_NAME,
    REVIEW_IN_PROGRESS,
};

/// Upper bound on create attempts within one negotiation.
const MAX_ROUNDS: u32 = 6;

/// Desired change set for a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetRequest {
    /// Stack name.
    pub stack_name: String,
    /// Location of the uploaded plan document.
    pub template_url: String,
    /// Type used when the stack does not exist: `CREATE` or `IMPORT`.
    pub desired_type: ChangeSetType,
    /// Whether the stack was observed to exist before negotiating.
    pub stack_exists: bool,
    /// Acknowledged capabilities.
    pub capabilities: Vec<String>,
    /// Stack parameters.
    pub parameters: std::collections::BTreeMap<String, String>,
    /// Stack tags.
    pub tags: std::collections::BTreeMap<String, String>,
    /// Resources to import.
    pub import_resources: Vec<ImportResource>,
}

impl ChangeSetRequest {
    /// Type of the first create attempt.
    #[must_use]
    pub const fn initial_type(&self) -> ChangeSetType {
        match self.desired_type {
            ChangeSetType::Import => ChangeSetType::Import,
            _ if self.stack_exists => ChangeSetType::Update,
            other => other,
        }
    }

    /// Type used once the stack is known to exist.
    const fn existing_stack_type(&self) -> ChangeSetType {
        match self.desired_type {
            ChangeSetType::Import => ChangeSetType::Import,
            _ => ChangeSetType::Update,
        }
    }

    fn to_create(&self, change_set_type: ChangeSetType) -> CreateChangeSetRequest {
        let import_resources = if change_set_type == ChangeSetType::Import {
            self.import_resources.clone()
        } else {
            Vec::new()
        };

        CreateChangeSetRequest {
            stack_name: self.stack_name.clone(),
            change_set_name: CHANGE_SET_NAME.to_string(),
            change_set_type,
            template_url: self.template_url.clone(),
            capabilities: self.capabilities.clone(),
            parameters: self.parameters.clone(),
            tags: self.tags.clone(),
            import_resources,
        }
    }
}

/// Creates and repairs the change set of a stack.
pub struct ChangeSetNegotiator {
    /// Control plane.
    control_plane: Arc<dyn StackControlPlane>,
    /// Poller used while a stack is being deleted.
    deletion: RetryPoller,
    /// Poller used while a stack is in a transitional state.
    busy: RetryPoller,
}

impl std::fmt::Debug for ChangeSetNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSetNegotiator")
            .field("deletion", &self.deletion)
            .field("busy", &self.busy)
            .finish_non_exhaustive()
    }
}

impl ChangeSetNegotiator {
    /// Creates a negotiator with default polling bounds.
    #[must_use]
    pub fn new(control_plane: Arc<dyn StackControlPlane>) -> Self {
        Self {
            control_plane,
            deletion: RetryPoller::new(60, Duration::from_secs(5)),
            busy: RetryPoller::new(60, Duration::from_secs(5)),
        }
    }

    /// Overrides the polling bounds.
    #[must_use]
    pub const fn with_pollers(mut self, deletion: RetryPoller, busy: RetryPoller) -> Self {
        self.deletion = deletion;
        self.busy = busy;
        self
    }

    /// Creates the change set, recovering from the known failure modes.
    ///
    /// # Errors
    ///
    /// Returns the provider error unchanged when it is not recoverable, a
    /// timeout when a wait runs out of attempts, or
    /// [`StackError::NegotiationExhausted`] when recoveries keep failing.
    pub async fn create_change_set(&self, request: &ChangeSetRequest) -> Result<ChangeSetHandle> {
        let stack_name = request.stack_name.as_str();
        let mut change_set_type = request.initial_type();

        for round in 1..=MAX_ROUNDS {
            info!("Creating {change_set_type} change set for stack {stack_name}");

            let err = match self
                .control_plane
                .create_change_set(&request.to_create(change_set_type))
                .await
            {
                Ok(id) if id.is_empty() => {
                    return Err(StackError::MissingChangeSetId {
                        stack: stack_name.to_string(),
                    }
                    .into());
                }
                Ok(id) => {
                    info!("Created change set {id}");
                    return Ok(ChangeSetHandle {
                        id,
                        name: CHANGE_SET_NAME.to_string(),
                        stack_name: stack_name.to_string(),
                        change_set_type,
                    });
                }
                Err(err) => err,
            };

            let kind = classify(stack_name, &err);
            debug!(round, ?kind, "change set creation failed: {}", err.message);

            change_set_type = match kind {
                FailureKind::RollbackComplete => {
                    warn!("Stack {stack_name} is in ROLLBACK_COMPLETE and must be recreated");
                    self.control_plane.delete_stack(stack_name).await?;
                    wait_until_gone(self.control_plane.as_ref(), self.deletion, stack_name)
                        .await?;
                    request.desired_type
                }
                FailureKind::StackMissing => {
                    info!("Stack {stack_name} does not exist, creating it");
                    request.desired_type
                }
                FailureKind::Busy => {
                    warn!("Stack {stack_name} is busy: {}", err.message);
                    self.wait_until_settled(request).await?
                }
                FailureKind::ChangeSetExists => {
                    warn!("Deleting stale change set {CHANGE_SET_NAME} of stack {stack_name}");
                    self.control_plane
                        .delete_change_set(stack_name, CHANGE_SET_NAME)
                        .await?;
                    request.existing_stack_type()
                }
                FailureKind::Fatal => return Err(DeployError::Provider(err)),
            };
        }

        Err(StackError::NegotiationExhausted {
            stack: stack_name.to_string(),
            rounds: MAX_ROUNDS,
        }
        .into())
    }

    /// Waits for a busy stack to settle and returns the type to retry with.
    async fn wait_until_settled(&self, request: &ChangeSetRequest) -> Result<ChangeSetType> {
        let control_plane = self.control_plane.as_ref();
        let stack_name = request.stack_name.as_str();
        let label = format!("stack {stack_name} to settle");

        self.busy
            .wait_for(&label, |_| async move {
                match control_plane.describe_stack(stack_name).await {
                    Ok(stacks) => match stacks.first() {
                        None => Poll::Done(request.desired_type),
                        Some(stack) if stack.status == "DELETE_COMPLETE" => {
                            Poll::Done(request.desired_type)
                        }
                        Some(stack) if stack.status == REVIEW_IN_PROGRESS => {
                            Poll::Done(request.desired_type)
                        }
                        Some(stack) if stack.is_complete() => {
                            Poll::Done(request.existing_stack_type())
                        }
                        Some(stack) => {
                            debug!("Stack {stack_name} is {}", stack.status);
                            Poll::Continue
                        }
                    },
                    Err(err) if is_stack_missing(stack_name, &err) => {
                        Poll::Done(request.desired_type)
                    }
                    Err(err) => Poll::Failed(DeployError::Provider(err)),
                }
            })
            .await
    }
}

/// Polls until the stack can no longer be described.
///
/// A failing describe call means the stack is gone.
///
/// # Errors
///
/// Returns a timeout when the stack is still present after all attempts, or
/// [`StackError::DeleteFailed`] when the provider gives up deleting it.
pub async fn wait_until_gone(
    control_plane: &dyn StackControlPlane,
    poller: RetryPoller,
    stack_name: &str,
) -> Result<()> {
    let label = format!("stack {stack_name} deletion");

    poller
        .wait_for(&label, |_| async move {
            match control_plane.describe_stack(stack_name).await {
                Err(err) => {
                    debug!("Stack {stack_name} is gone: {}", err.message);
                    Poll::Done(())
                }
                Ok(stacks) => match stacks.first() {
                    None => Poll::Done(()),
                    Some(stack) if stack.status == "DELETE_COMPLETE" => Poll::Done(()),
                    Some(stack) if stack.status == "DELETE_FAILED" => {
                        Poll::Failed(DeployError::from(StackError::DeleteFailed {
                            stack: stack_name.to_string(),
                            status: stack.status.clone(),
                        }))
                    }
                    Some(_) => Poll::Continue,
                },
            }
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::stack::control_plane::MockStackControlPlane;
    use crate::stack::types::StackDescription;
    use mockall::Sequence;
    use std::collections::BTreeMap;

    fn request(stack_exists: bool, desired_type: ChangeSetType) -> ChangeSetRequest {
        ChangeSetRequest {
            stack_name: String::from("app"),
            template_url: String::from("https://deploys.s3.amazonaws.com/app/template.json"),
            desired_type,
            stack_exists,
            capabilities: vec![String::from("CAPABILITY_IAM")],
            parameters: BTreeMap::new(),
            tags: BTreeMap::new(),
            import_resources: Vec::new(),
        }
    }

    fn stack(status: &str) -> StackDescription {
        StackDescription {
            name: String::from("app"),
            status: status.to_string(),
            outputs: BTreeMap::new(),
        }
    }

    fn validation(message: &str) -> ProviderError {
        ProviderError::with_code("CreateChangeSet", "ValidationError", message)
    }

    fn negotiator(mock: MockStackControlPlane) -> ChangeSetNegotiator {
        let fast = RetryPoller::new(5, Duration::ZERO);
        ChangeSetNegotiator::new(Arc::new(mock)).with_pollers(fast, fast)
    }

    #[tokio::test]
    async fn test_first_attempt_succeeds() {
        let mut mock = MockStackControlPlane::new();
        mock.expect_create_change_set()
            .withf(|r| r.change_set_type == ChangeSetType::Create && r.change_set_name == CHANGE_SET_NAME)
            .times(1)
            .returning(|_| Ok(String::from("cs-1")));

        let handle = negotiator(mock)
            .create_change_set(&request(false, ChangeSetType::Create))
            .await
            .unwrap();

        assert_eq!(handle.id, "cs-1");
        assert_eq!(handle.change_set_type, ChangeSetType::Create);
    }

    #[tokio::test]
    async fn test_rollback_complete_deletes_then_recreates_with_original_type() {
        let mut seq = Sequence::new();
        let mut mock = MockStackControlPlane::new();

        mock.expect_create_change_set()
            .withf(|r| r.change_set_type == ChangeSetType::Update)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(validation(
                    "Stack:arn:aws:cloudformation:eu-west-1:1:stack/app/x is in ROLLBACK_COMPLETE state and can not be updated.",
                ))
            });
        mock.expect_delete_stack()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mock.expect_describe_stack()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![stack("DELETE_IN_PROGRESS")]));
        mock.expect_describe_stack()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(validation("Stack with id app does not exist")));
        mock.expect_create_change_set()
            .withf(|r| r.change_set_type == ChangeSetType::Create)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(String::from("cs-2")));

        let handle = negotiator(mock)
            .create_change_set(&request(true, ChangeSetType::Create))
            .await
            .unwrap();

        assert_eq!(handle.id, "cs-2");
        assert_eq!(handle.change_set_type, ChangeSetType::Create);
    }

    #[tokio::test]
    async fn test_missing_stack_retries_with_create_never_update() {
        let mut mock = MockStackControlPlane::new();
        mock.expect_create_change_set()
            .withf(|r| r.change_set_type == ChangeSetType::Update)
            .times(1)
            .returning(|_| Err(validation("Stack [app] does not exist")));
        mock.expect_create_change_set()
            .withf(|r| r.change_set_type == ChangeSetType::Create)
            .times(1)
            .returning(|_| Ok(String::from("cs-3")));

        let handle = negotiator(mock)
            .create_change_set(&request(true, ChangeSetType::Create))
            .await
            .unwrap();

        assert_eq!(handle.change_set_type, ChangeSetType::Create);
    }

    #[tokio::test]
    async fn test_missing_stack_keeps_import_type() {
        let mut mock = MockStackControlPlane::new();
        let mut seq = Sequence::new();
        mock.expect_create_change_set()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(validation("Stack [app] does not exist")));
        mock.expect_create_change_set()
            .withf(|r| r.change_set_type == ChangeSetType::Import && r.import_resources.len() == 1)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(String::from("cs-4")));

        let mut req = request(true, ChangeSetType::Import);
        req.import_resources.push(ImportResource {
            logical_id: String::from("Uploads"),
            resource_type: String::from("AWS::S3::Bucket"),
            identifier: BTreeMap::from([(String::from("BucketName"), String::from("uploads"))]),
        });

        let handle = negotiator(mock).create_change_set(&req).await.unwrap();
        assert_eq!(handle.change_set_type, ChangeSetType::Import);
    }

    #[tokio::test]
    async fn test_stale_change_set_is_deleted_once() {
        let mut seq = Sequence::new();
        let mut mock = MockStackControlPlane::new();

        mock.expect_create_change_set()
            .withf(|r| r.change_set_type == ChangeSetType::Update)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(ProviderError::with_code(
                    "CreateChangeSet",
                    "AlreadyExistsException",
                    "ChangeSet stack-deploy-pending already exists",
                ))
            });
        mock.expect_delete_change_set()
            .withf(|stack, name| stack == "app" && name == CHANGE_SET_NAME)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        mock.expect_create_change_set()
            .withf(|r| r.change_set_type == ChangeSetType::Update)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(String::from("cs-5")));

        let handle = negotiator(mock)
            .create_change_set(&request(true, ChangeSetType::Create))
            .await
            .unwrap();

        assert_eq!(handle.id, "cs-5");
        assert_eq!(handle.change_set_type, ChangeSetType::Update);
    }

    #[tokio::test]
    async fn test_stale_change_set_on_new_stack_retries_as_update() {
        let types = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut seq = Sequence::new();
        let mut mock = MockStackControlPlane::new();

        let recorded = Arc::clone(&types);
        mock.expect_create_change_set()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |r| {
                recorded.lock().unwrap().push(r.change_set_type);
                Err(ProviderError::with_code(
                    "CreateChangeSet",
                    "AlreadyExistsException",
                    "ChangeSet stack-deploy-pending already exists",
                ))
            });
        mock.expect_delete_change_set()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        let recorded = Arc::clone(&types);
        mock.expect_create_change_set()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |r| {
                recorded.lock().unwrap().push(r.change_set_type);
                Ok(String::from("cs-6"))
            });

        let handle = negotiator(mock)
            .create_change_set(&request(false, ChangeSetType::Create))
            .await
            .unwrap();

        assert_eq!(
            *types.lock().unwrap(),
            vec![ChangeSetType::Create, ChangeSetType::Update]
        );
        assert_eq!(handle.change_set_type, ChangeSetType::Update);
    }

    #[tokio::test]
    async fn test_stale_change_set_keeps_import_type() {
        let mut mock = MockStackControlPlane::new();
        mock.expect_create_change_set()
            .withf(|r| r.change_set_type == ChangeSetType::Import)
            .times(1)
            .returning(|_| {
                Err(ProviderError::with_code(
                    "CreateChangeSet",
                    "AlreadyExistsException",
                    "ChangeSet stack-deploy-pending already exists",
                ))
            });
        mock.expect_delete_change_set()
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_create_change_set()
            .withf(|r| r.change_set_type == ChangeSetType::Import)
            .times(1)
            .returning(|_| Ok(String::from("cs-7")));

        let handle = negotiator(mock)
            .create_change_set(&request(false, ChangeSetType::Import))
            .await
            .unwrap();

        assert_eq!(handle.change_set_type, ChangeSetType::Import);
    }

    #[tokio::test]
    async fn test_busy_stack_waits_then_updates() {
        let mut seq = Sequence::new();
        let mut mock = MockStackControlPlane::new();

        mock.expect_create_change_set()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(validation(
                    "Stack:arn:stack/app/1 is in UPDATE_IN_PROGRESS state and can not be updated.",
                ))
            });
        mock.expect_describe_stack()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![stack("UPDATE_IN_PROGRESS")]));
        mock.expect_describe_stack()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![stack("UPDATE_COMPLETE")]));
        mock.expect_create_change_set()
            .withf(|r| r.change_set_type == ChangeSetType::Update)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(String::from("cs-6")));

        let handle = negotiator(mock)
            .create_change_set(&request(true, ChangeSetType::Create))
            .await
            .unwrap();

        assert_eq!(handle.id, "cs-6");
    }

    #[tokio::test]
    async fn test_busy_stack_that_disappears_is_created() {
        let mut mock = MockStackControlPlane::new();
        let mut seq = Sequence::new();

        mock.expect_create_change_set()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(validation(
                    "Stack:arn:stack/app/1 is in DELETE_IN_PROGRESS state and can not be updated.",
                ))
            });
        mock.expect_describe_stack()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(validation("Stack with id app does not exist")));
        mock.expect_create_change_set()
            .withf(|r| r.change_set_type == ChangeSetType::Create)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(String::from("cs-7")));

        let handle = negotiator(mock)
            .create_change_set(&request(true, ChangeSetType::Create))
            .await
            .unwrap();

        assert_eq!(handle.change_set_type, ChangeSetType::Create);
    }

    #[tokio::test]
    async fn test_busy_timeout_propagates() {
        let mut mock = MockStackControlPlane::new();
        mock.expect_create_change_set().times(1).returning(|_| {
            Err(validation(
                "Stack:arn:stack/app/1 is in UPDATE_IN_PROGRESS state and can not be updated.",
            ))
        });
        mock.expect_describe_stack()
            .times(5)
            .returning(|_| Ok(vec![stack("UPDATE_IN_PROGRESS")]));

        let err = negotiator(mock)
            .create_change_set(&request(true, ChangeSetType::Create))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeployError::Stack(StackError::Timeout { attempts: 5, .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_error_is_rethrown_unchanged() {
        let mut mock = MockStackControlPlane::new();
        mock.expect_create_change_set()
            .times(1)
            .returning(|_| Err(validation("Template format error: YAML not well-formed.")));

        let err = negotiator(mock)
            .create_change_set(&request(false, ChangeSetType::Create))
            .await
            .unwrap_err();

        match err {
            DeployError::Provider(e) => {
                assert_eq!(e, validation("Template format error: YAML not well-formed."));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_negotiation_is_bounded() {
        let mut mock = MockStackControlPlane::new();
        mock.expect_create_change_set()
            .times(MAX_ROUNDS as usize)
            .returning(|_| Err(validation("Stack [app] does not exist")));

        let err = negotiator(mock)
            .create_change_set(&request(false, ChangeSetType::Create))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeployError::Stack(StackError::NegotiationExhausted { rounds: MAX_ROUNDS, .. })
        ));
    }

    #[tokio::test]
    async fn test_wait_until_gone_reports_delete_failure() {
        let mut mock = MockStackControlPlane::new();
        mock.expect_describe_stack()
            .times(1)
            .returning(|_| Ok(vec![stack("DELETE_FAILED")]));

        let err = wait_until_gone(&mock, RetryPoller::new(3, Duration::ZERO), "app")
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Stack(StackError::DeleteFailed { .. })));
    }
}
