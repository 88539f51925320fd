//! API stage control plane.
//!
//! The stack provider updates an API definition without pushing it into the
//! running stage. [`PostApplyFixup`] issues the missing deployment.

mod fixup;
mod gateway;

pub use fixup::PostApplyFixup;
pub use gateway::ApiGatewayStages;

use async_trait::async_trait;

use crate::stack::ProviderResult;

/// Resource type of a REST API in the stack.
pub const REST_API_TYPE: &str = "AWS::ApiGateway::RestApi";

/// Resource type of an API stage in the stack.
pub const STAGE_TYPE: &str = "AWS::ApiGateway::Stage";

/// Trait for API stage backends.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ApiStageControlPlane: Send + Sync {
    /// Creates a deployment of `api_id` into `stage_name` and returns its id.
    async fn create_deployment(&self, api_id: &str, stage_name: &str) -> ProviderResult<String>;
}
