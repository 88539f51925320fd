//! Stack and change-set types shared by the negotiator, the reconciler and
//! the provider adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Fixed name of the single outstanding change set of a stack.
pub const CHANGE_SET_NAME: &str = "stack-deploy-pending";

/// Statuses of the root stack that end an apply.
pub const ROOT_TERMINAL_STATUSES: &[&str] = &[
    "UPDATE_COMPLETE",
    "CREATE_COMPLETE",
    "ROLLBACK_COMPLETE",
    "UPDATE_ROLLBACK_COMPLETE",
];

/// Status of a stack that has an unexecuted CREATE change set and was never created.
pub const REVIEW_IN_PROGRESS: &str = "REVIEW_IN_PROGRESS";

/// Kind of change set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeSetType {
    /// Creates the stack.
    Create,
    /// Updates an existing stack.
    Update,
    /// Imports existing resources into the stack.
    Import,
}

impl ChangeSetType {
    /// Wire name of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Import => "IMPORT",
        }
    }
}

impl fmt::Display for ChangeSetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evaluation status of a change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ChangeSetStatus {
    /// Queued for evaluation.
    CreatePending,
    /// Being evaluated.
    CreateInProgress,
    /// Evaluated and executable.
    CreateComplete,
    /// Queued for deletion.
    DeletePending,
    /// Being deleted.
    DeleteInProgress,
    /// Deleted.
    DeleteComplete,
    /// Deletion failed.
    DeleteFailed,
    /// Evaluation failed; see the status reason.
    Failed,
    /// Reported when the stack itself is stuck in a rollback.
    RollbackComplete,
    /// Anything the provider adds later.
    Unknown(String),
}

impl ChangeSetStatus {
    /// Parses the provider's status string.
    #[must_use]
    pub fn parse(status: &str) -> Self {
        match status {
            "CREATE_PENDING" => Self::CreatePending,
            "CREATE_IN_PROGRESS" => Self::CreateInProgress,
            "CREATE_COMPLETE" => Self::CreateComplete,
            "DELETE_PENDING" => Self::DeletePending,
            "DELETE_IN_PROGRESS" => Self::DeleteInProgress,
            "DELETE_COMPLETE" => Self::DeleteComplete,
            "DELETE_FAILED" => Self::DeleteFailed,
            "FAILED" => Self::Failed,
            "ROLLBACK_COMPLETE" => Self::RollbackComplete,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// A planned change to one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceChange {
    /// Add, Modify, Remove, Import, ...
    pub action: String,
    /// Logical id in the template.
    pub logical_id: String,
    /// Physical id, if the resource exists.
    pub physical_id: Option<String>,
    /// Resource type.
    pub resource_type: String,
    /// Replacement policy (`True`, `False`, `Conditional`).
    pub replacement: Option<String>,
}

/// A described change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    /// Change set id.
    pub id: String,
    /// Evaluation status.
    pub status: ChangeSetStatus,
    /// Reason attached to the status, if any.
    pub status_reason: Option<String>,
    /// Planned changes, in provider order.
    pub changes: Vec<ResourceChange>,
}

/// Handle to a change set created by the negotiator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSetHandle {
    /// Change set id returned by the provider.
    pub id: String,
    /// Change set name.
    pub name: String,
    /// Stack the change set belongs to.
    pub stack_name: String,
    /// Type the change set was created with.
    pub change_set_type: ChangeSetType,
}

/// One entry of the stack event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackEvent {
    /// Event id.
    pub id: String,
    /// Logical id of the resource; the stack name for the stack itself.
    pub logical_id: String,
    /// Resource type.
    pub resource_type: String,
    /// Resource status.
    pub status: String,
    /// Status reason, if any.
    pub status_reason: Option<String>,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
}

/// A described stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackDescription {
    /// Stack name.
    pub name: String,
    /// Stack status.
    pub status: String,
    /// Stack outputs.
    pub outputs: BTreeMap<String, String>,
}

impl StackDescription {
    /// True if the status is a settled `*COMPLETE` status.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status.ends_with("COMPLETE")
    }
}

/// Summary of one live stack resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackResourceSummary {
    /// Logical id.
    pub logical_id: String,
    /// Physical id.
    pub physical_id: Option<String>,
    /// Resource type.
    pub resource_type: String,
}

/// One page of stack resources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcePage {
    /// Resources on this page.
    pub resources: Vec<StackResourceSummary>,
    /// Token for the next page.
    pub next_token: Option<String>,
}

/// A resource adopted by an `IMPORT` change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportResource {
    /// Logical id in the template.
    pub logical_id: String,
    /// Resource type.
    pub resource_type: String,
    /// Identifier properties.
    pub identifier: BTreeMap<String, String>,
}

/// Parameters of a single create-change-set call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateChangeSetRequest {
    /// Stack name.
    pub stack_name: String,
    /// Change set name.
    pub change_set_name: String,
    /// Change set type.
    pub change_set_type: ChangeSetType,
    /// Location of the uploaded plan document.
    pub template_url: String,
    /// Acknowledged capabilities.
    pub capabilities: Vec<String>,
    /// Stack parameters.
    pub parameters: BTreeMap<String, String>,
    /// Stack tags.
    pub tags: BTreeMap<String, String>,
    /// Resources to import; only sent with `IMPORT`.
    pub import_resources: Vec<ImportResource>,
}
