//! Stage re-publication after a stack apply.

use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;

use super::ApiStageControlPlane;

/// Re-publishes an API stage the provider left stale.
pub struct PostApplyFixup {
    /// Stage backend.
    stages: Arc<dyn ApiStageControlPlane>,
}

impl std::fmt::Debug for PostApplyFixup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostApplyFixup").finish_non_exhaustive()
    }
}

impl PostApplyFixup {
    /// Creates a fixup using the given stage backend.
    #[must_use]
    pub fn new(stages: Arc<dyn ApiStageControlPlane>) -> Self {
        Self { stages }
    }

    /// Creates a deployment of `api_id` into `stage_name`.
    ///
    /// Does nothing and returns `None` when either is missing.
    ///
    /// # Errors
    ///
    /// Returns the provider error if the deployment cannot be created.
    pub async fn republish_stage(
        &self,
        api_id: Option<&str>,
        stage_name: Option<&str>,
    ) -> Result<Option<String>> {
        let (Some(api_id), Some(stage_name)) = (api_id, stage_name) else {
            debug!(?api_id, ?stage_name, "No API stage to republish");
            return Ok(None);
        };

        info!("Republishing stage {stage_name} of API {api_id}");
        let deployment_id = self.stages.create_deployment(api_id, stage_name).await?;
        info!("Created deployment {deployment_id}");

        Ok(Some(deployment_id))
    }
}
