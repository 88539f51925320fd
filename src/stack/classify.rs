//! Classification of change-set creation failures.
//!
//! The provider only reports these conditions through message text and error
//! codes, so the matching lives here, away from the network calls.

use crate::error::ProviderError;

/// Message suffix of a stack stuck after a failed creation.
const ROLLBACK_COMPLETE_SUFFIX: &str = "is in ROLLBACK_COMPLETE state and can not be updated.";

/// Message suffix of a stack in any transitional state.
const BUSY_SUFFIX: &str = "state and can not be updated.";

/// Error code of an unexecuted change set that already uses the fixed name.
const ALREADY_EXISTS_CODE: &str = "AlreadyExistsException";

/// Recovery path for a failed create-change-set call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The stack can never be updated again; delete and recreate it.
    RollbackComplete,
    /// The stack does not exist.
    StackMissing,
    /// The stack is in a transitional state; wait for it to settle.
    Busy,
    /// A stale change set with the same name exists.
    ChangeSetExists,
    /// Not recoverable.
    Fatal,
}

/// Classifies a create-change-set failure. First match wins.
#[must_use]
pub fn classify(stack_name: &str, err: &ProviderError) -> FailureKind {
    let message = err.message.as_str();

    if message.ends_with(ROLLBACK_COMPLETE_SUFFIX) {
        FailureKind::RollbackComplete
    } else if is_stack_missing(stack_name, err) {
        FailureKind::StackMissing
    } else if message.ends_with(BUSY_SUFFIX) {
        FailureKind::Busy
    } else if err.code.as_deref() == Some(ALREADY_EXISTS_CODE) {
        FailureKind::ChangeSetExists
    } else {
        FailureKind::Fatal
    }
}

/// True if the error says the stack does not exist.
///
/// Change-set calls report `Stack [name] does not exist`; describe calls
/// report `Stack with id name does not exist`.
#[must_use]
pub fn is_stack_missing(stack_name: &str, err: &ProviderError) -> bool {
    err.message == format!("Stack [{stack_name}] does not exist")
        || err.message == format!("Stack with id {stack_name} does not exist")
}
