//! Stack control plane: change-set negotiation and reconciliation.
//!
//! This module provides:
//! - The [`StackControlPlane`] trait and its CloudFormation backend
//! - Failure classification for change-set creation
//! - [`ChangeSetNegotiator`] to create or repair the pending change set
//! - [`StackReconciler`] to execute it and follow the stack to completion

mod classify;
mod cloudformation;
mod control_plane;
mod negotiator;
mod reconciler;
mod types;

pub use classify::{classify, is_stack_missing, FailureKind};
pub use cloudformation::CloudFormationControlPlane;
pub use control_plane::{ProviderResult, StackControlPlane};
pub use negotiator::{wait_until_gone, ChangeSetNegotiator, ChangeSetRequest};
pub use reconciler::{ApplyOutcome, EventCursor, StackReconciler};
pub use types::{
    ChangeSet, ChangeSetHandle, ChangeSetStatus, ChangeSetType, CreateChangeSetRequest,
    ImportResource, ResourceChange, ResourcePage, StackDescription, StackEvent,
    StackResourceSummary, CHANGE_SET_NAME, REVIEW_IN_PROGRESS, ROOT_TERMINAL_STATUSES,
};

#[cfg(test)]
pub use control_plane::MockStackControlPlane;
