//! Stack control plane trait definition.
//!
//! This module defines the interface the negotiator and the reconciler use
//! to talk to the two-phase stack provider.

use async_trait::async_trait;

use crate::error::ProviderError;

use super::types::{
    ChangeSet, CreateChangeSetRequest, ResourcePage, StackDescription, StackEvent,
};

/// Result of a control plane call.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Trait for stack control plane backends.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StackControlPlane: Send + Sync {
    /// Creates a change set and returns its id.
    async fn create_change_set(&self, request: &CreateChangeSetRequest) -> ProviderResult<String>;

    /// Deletes a change set by name.
    async fn delete_change_set(&self, stack_name: &str, change_set_name: &str)
    -> ProviderResult<()>;

    /// Describes a change set by name or id.
    async fn describe_change_set(&self, stack_name: &str, change_set: &str)
    -> ProviderResult<ChangeSet>;

    /// Executes a change set.
    async fn execute_change_set(&self, stack_name: &str, change_set: &str) -> ProviderResult<()>;

    /// Describes a stack.
    ///
    /// Fails (or returns nothing) when the stack does not exist.
    async fn describe_stack(&self, stack_name: &str) -> ProviderResult<Vec<StackDescription>>;

    /// Returns the most recent page of stack events, newest first.
    async fn describe_stack_events(&self, stack_name: &str) -> ProviderResult<Vec<StackEvent>>;

    /// Lists one page of live stack resources.
    async fn list_stack_resources(
        &self,
        stack_name: &str,
        next_token: Option<String>,
    ) -> ProviderResult<ResourcePage>;

    /// Deletes a stack.
    async fn delete_stack(&self, stack_name: &str) -> ProviderResult<()>;
}
