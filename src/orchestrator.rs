//! Deployment orchestration.
//!
//! [`DeploymentOrchestrator`] runs one deployment attempt end to end:
//!
//! 1. ensure the deployment bucket exists
//! 2. render the plan document and upload it
//! 3. upload the code bundle and static assets
//! 4. negotiate the change set
//! 5. apply it and follow the stack to completion
//!
//! Every phase adds to a [`DeploymentResultBuilder`] that is passed from one
//! phase to the next. The desired state is never modified.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::api::{ApiStageControlPlane, PostApplyFixup};
use crate::assets::{
    md5_hex, normalize_prefix, AssetSynchronizer, FileEntry, ObjectStore, SyncReport,
    DEFAULT_CONCURRENCY,
};
use crate::config::{BundleSource, DesiredState};
use crate::error::{AssetError, DeployError, Result};
use crate::planner::{object_url, plan_key, render_template, BundleRef, PlanFormat, PlanLocation};
use crate::retry::RetryPoller;
use crate::stack::{
    is_stack_missing, wait_until_gone, ApplyOutcome, ChangeSetHandle, ChangeSetNegotiator,
    ChangeSetRequest, StackControlPlane, StackReconciler, REVIEW_IN_PROGRESS,
};

/// Polling bounds of every wait in a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Waiting for a rolled-back stack to be deleted.
    pub deletion: RetryPoller,
    /// Waiting for a busy stack to settle.
    pub busy: RetryPoller,
    /// Waiting for change-set evaluation.
    pub evaluation: RetryPoller,
    /// Following stack events.
    pub events: RetryPoller,
    /// Waiting for a destroyed stack to disappear.
    pub destroy: RetryPoller,
}

impl Default for Timings {
    fn default() -> Self {
        let five_seconds = RetryPoller::new(60, Duration::from_secs(5));
        Self {
            deletion: five_seconds,
            busy: five_seconds,
            evaluation: five_seconds,
            events: RetryPoller::new(60, Duration::from_secs(10)),
            destroy: five_seconds,
        }
    }
}

impl Timings {
    /// Uses the same bounds for every wait.
    #[must_use]
    pub const fn uniform(poller: RetryPoller) -> Self {
        Self {
            deletion: poller,
            busy: poller,
            evaluation: poller,
            events: poller,
            destroy: poller,
        }
    }
}

/// Everything a deployment produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentResult {
    /// Stack name.
    pub stack_name: String,
    /// Uploaded plan document.
    pub plan: PlanLocation,
    /// Code bundle referenced by the plan.
    pub bundle: Option<BundleRef>,
    /// Upload counts.
    pub sync: SyncReport,
    /// Negotiated change set.
    pub change_set: Option<ChangeSetHandle>,
    /// Outcome of the apply.
    pub outcome: ApplyOutcome,
    /// Stack outputs after a successful apply.
    pub outputs: BTreeMap<String, String>,
}

/// Accumulates a [`DeploymentResult`] across phases.
#[derive(Debug, Clone, Default)]
pub struct DeploymentResultBuilder {
    stack_name: String,
    plan: Option<PlanLocation>,
    bundle: Option<BundleRef>,
    sync: SyncReport,
    change_set: Option<ChangeSetHandle>,
    outcome: Option<ApplyOutcome>,
    outputs: BTreeMap<String, String>,
}

impl DeploymentResultBuilder {
    /// Starts a result for `stack_name`.
    #[must_use]
    pub fn new(stack_name: impl Into<String>) -> Self {
        Self {
            stack_name: stack_name.into(),
            ..Self::default()
        }
    }

    /// Records the uploaded plan.
    #[must_use]
    pub fn plan(mut self, plan: PlanLocation) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Records the code bundle.
    #[must_use]
    pub fn bundle(mut self, bundle: Option<BundleRef>) -> Self {
        self.bundle = bundle;
        self
    }

    /// Adds upload counts.
    #[must_use]
    pub const fn merge_sync(mut self, report: SyncReport) -> Self {
        self.sync.merge(report);
        self
    }

    /// Records the change set.
    #[must_use]
    pub fn change_set(mut self, handle: ChangeSetHandle) -> Self {
        self.change_set = Some(handle);
        self
    }

    /// Records the apply outcome.
    #[must_use]
    pub fn outcome(mut self, outcome: ApplyOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Records the stack outputs.
    #[must_use]
    pub fn outputs(mut self, outputs: BTreeMap<String, String>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Bundle recorded so far.
    #[must_use]
    pub const fn bundle_ref(&self) -> Option<&BundleRef> {
        self.bundle.as_ref()
    }

    /// Finishes the result.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the plan or the outcome is missing.
    pub fn build(self) -> Result<DeploymentResult> {
        let plan = self
            .plan
            .ok_or_else(|| DeployError::internal("deployment finished without a plan"))?;
        let outcome = self
            .outcome
            .ok_or_else(|| DeployError::internal("deployment finished without an outcome"))?;

        Ok(DeploymentResult {
            stack_name: self.stack_name,
            plan,
            bundle: self.bundle,
            sync: self.sync,
            change_set: self.change_set,
            outcome,
            outputs: self.outputs,
        })
    }
}

/// Runs deployments of one desired state.
pub struct DeploymentOrchestrator {
    /// Desired state of this attempt.
    desired: DesiredState,
    /// Object store.
    store: Arc<dyn ObjectStore>,
    /// Stack control plane.
    control_plane: Arc<dyn StackControlPlane>,
    /// API stage backend.
    stages: Arc<dyn ApiStageControlPlane>,
    /// Polling bounds.
    timings: Timings,
    /// Maximum concurrent uploads.
    upload_concurrency: usize,
}

impl std::fmt::Debug for DeploymentOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentOrchestrator")
            .field("stack_name", &self.desired.stack_name)
            .field("timings", &self.timings)
            .field("upload_concurrency", &self.upload_concurrency)
            .finish_non_exhaustive()
    }
}

impl DeploymentOrchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(
        desired: DesiredState,
        store: Arc<dyn ObjectStore>,
        control_plane: Arc<dyn StackControlPlane>,
        stages: Arc<dyn ApiStageControlPlane>,
    ) -> Self {
        Self {
            desired,
            store,
            control_plane,
            stages,
            timings: Timings::default(),
            upload_concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Overrides the polling bounds.
    #[must_use]
    pub const fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Overrides the number of concurrent uploads.
    #[must_use]
    pub const fn with_upload_concurrency(mut self, concurrency: usize) -> Self {
        self.upload_concurrency = concurrency;
        self
    }

    /// Desired state of this orchestrator.
    #[must_use]
    pub const fn desired(&self) -> &DesiredState {
        &self.desired
    }

    /// Runs one deployment attempt.
    ///
    /// A rejected plan, a rollback or a timeout is reported in the returned
    /// outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if an upload fails, if a local file cannot be read,
    /// or if the change set cannot be negotiated.
    pub async fn deploy(&self) -> Result<DeploymentResult> {
        let desired = &self.desired;
        info!(
            "Deploying {} ({}) to stack {}",
            desired.project, desired.stage, desired.stack_name
        );

        let sync = AssetSynchronizer::new(Arc::clone(&self.store), desired.tags.clone())
            .with_concurrency(self.upload_concurrency);
        sync.ensure_bucket(&desired.bucket).await?;

        let (result, bundle_upload) = self
            .resolve_bundle(DeploymentResultBuilder::new(&desired.stack_name))
            .await?;
        let result = self.upload_plan(&sync, result).await?;
        let result = self.upload_artifacts(&sync, bundle_upload, result).await?;
        let result = self.apply(result).await?;

        result.build()
    }

    /// Removes the stack and waits until it is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete call fails, the deletion fails, or the
    /// stack is still present after the polling bound.
    pub async fn destroy_stack(&self) -> Result<()> {
        let stack_name = &self.desired.stack_name;
        info!("Deleting stack {stack_name}");

        self.control_plane.delete_stack(stack_name).await?;
        wait_until_gone(self.control_plane.as_ref(), self.timings.destroy, stack_name).await?;

        info!("Stack {stack_name} deleted");
        Ok(())
    }

    /// Resolves where the code bundle lives.
    ///
    /// A local bundle is keyed by its content hash so that an unchanged
    /// bundle keeps its key and does not change the plan.
    async fn resolve_bundle(
        &self,
        result: DeploymentResultBuilder,
    ) -> Result<(DeploymentResultBuilder, Option<FileEntry>)> {
        let desired = &self.desired;

        match &desired.bundle {
            None => Ok((result, None)),
            Some(BundleSource::Remote { bucket, key }) => {
                debug!("Using packaged bundle {bucket}/{key}");
                let bundle = BundleRef {
                    bucket: bucket.clone(),
                    key: key.clone(),
                };
                Ok((result.bundle(Some(bundle)), None))
            }
            Some(BundleSource::Local(path)) => {
                let body = tokio::fs::read(path).await.map_err(|source| AssetError::Read {
                    path: path.clone(),
                    source,
                })?;
                let key = bundle_key(&desired.prefix, path, &md5_hex(&body));
                let bundle = BundleRef {
                    bucket: desired.bucket.clone(),
                    key: key.clone(),
                };
                Ok((result.bundle(Some(bundle)), Some(FileEntry::bytes(key, body))))
            }
        }
    }

    async fn upload_plan(
        &self,
        sync: &AssetSynchronizer,
        result: DeploymentResultBuilder,
    ) -> Result<DeploymentResultBuilder> {
        let desired = &self.desired;

        let template = render_template(desired, result.bundle_ref())?;
        let format = PlanFormat::resolve(desired.format, &desired.plan_file);
        let key = plan_key(&desired.prefix, &desired.plan_file, format);
        let body = template.to_bytes(format)?;

        info!(
            "Uploading plan with {} resource(s) to {}/{key}",
            template.resources.len(),
            desired.bucket
        );
        let report = sync
            .sync_files(&desired.bucket, vec![FileEntry::bytes(key.clone(), body)])
            .await?;

        let plan = PlanLocation {
            url: object_url(&desired.bucket, desired.region.as_deref(), &key),
            bucket: desired.bucket.clone(),
            key,
        };

        Ok(result.plan(plan).merge_sync(report))
    }

    async fn upload_artifacts(
        &self,
        sync: &AssetSynchronizer,
        bundle: Option<FileEntry>,
        mut result: DeploymentResultBuilder,
    ) -> Result<DeploymentResultBuilder> {
        if let Some(entry) = bundle {
            let report = sync.sync_files(&self.desired.bucket, vec![entry]).await?;
            result = result.merge_sync(report);
        }

        for folder in &self.desired.assets {
            let report = sync
                .sync_folder(&folder.bucket, &folder.source, &folder.prefix)
                .await?;
            result = result.merge_sync(report);
        }

        Ok(result)
    }

    async fn apply(&self, result: DeploymentResultBuilder) -> Result<DeploymentResultBuilder> {
        let desired = &self.desired;
        let plan_url = result
            .plan
            .as_ref()
            .map(|p| p.url.clone())
            .ok_or_else(|| DeployError::internal("plan must be uploaded before applying"))?;

        let request = ChangeSetRequest {
            stack_name: desired.stack_name.clone(),
            template_url: plan_url,
            desired_type: desired.change_set_type,
            stack_exists: self.stack_exists().await?,
            capabilities: desired.capabilities.clone(),
            parameters: desired.parameters.clone(),
            tags: desired.tags.clone(),
            import_resources: desired.import_resources.clone(),
        };

        let handle = ChangeSetNegotiator::new(Arc::clone(&self.control_plane))
            .with_pollers(self.timings.deletion, self.timings.busy)
            .create_change_set(&request)
            .await?;

        let mut reconciler = StackReconciler::new(Arc::clone(&self.control_plane))
            .with_pollers(self.timings.evaluation, self.timings.events);
        if desired.declares_api_stage() {
            reconciler = reconciler.with_stage_fixup(PostApplyFixup::new(Arc::clone(&self.stages)));
        }

        let outcome = reconciler
            .apply_change_set(&desired.stack_name, &handle.id)
            .await?;

        let outputs = if outcome.is_success() {
            self.stack_outputs().await?
        } else {
            BTreeMap::new()
        };

        Ok(result.change_set(handle).outcome(outcome).outputs(outputs))
    }

    /// True if the stack exists and was created at least once.
    async fn stack_exists(&self) -> Result<bool> {
        let stack_name = &self.desired.stack_name;

        match self.control_plane.describe_stack(stack_name).await {
            Ok(stacks) => Ok(stacks
                .first()
                .is_some_and(|s| s.status != REVIEW_IN_PROGRESS && s.status != "DELETE_COMPLETE")),
            Err(err) if is_stack_missing(stack_name, &err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn stack_outputs(&self) -> Result<BTreeMap<String, String>> {
        let stacks = self
            .control_plane
            .describe_stack(&self.desired.stack_name)
            .await?;
        Ok(stacks.into_iter().next().map(|s| s.outputs).unwrap_or_default())
    }
}

/// Content-addressed key of a local bundle: `{prefix}bundle/{md5}/{file name}`.
fn bundle_key(prefix: &str, path: &Path, md5: &str) -> String {
    let file_name = path
        .file_name()
        .map_or_else(|| String::from("bundle.zip"), |n| n.to_string_lossy().into_owned());
    format!("{}bundle/{md5}/{file_name}", normalize_prefix(prefix))
}
