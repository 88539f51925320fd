//! API Gateway backend.

use async_trait::async_trait;
use aws_sdk_apigateway::Client;
use tracing::debug;

use crate::error::ProviderError;
use crate::stack::ProviderResult;

use super::ApiStageControlPlane;

/// API Gateway stage backend.
#[derive(Debug, Clone)]
pub struct ApiGatewayStages {
    /// API Gateway client.
    client: Client,
}

impl ApiGatewayStages {
    /// Creates a backend from a loaded AWS configuration.
    #[must_use]
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }
}

#[async_trait]
impl ApiStageControlPlane for ApiGatewayStages {
    async fn create_deployment(&self, api_id: &str, stage_name: &str) -> ProviderResult<String> {
        debug!("CreateDeployment {api_id}/{stage_name}");

        let output = self
            .client
            .create_deployment()
            .rest_api_id(api_id)
            .stage_name(stage_name)
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("CreateDeployment", &e))?;

        Ok(output.id().unwrap_or_default().to_string())
    }
}
