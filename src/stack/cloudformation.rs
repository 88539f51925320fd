//! CloudFormation backend for the stack control plane.

use async_trait::async_trait;
use aws_sdk_cloudformation::Client;
use aws_sdk_cloudformation::primitives::DateTime as SdkDateTime;
use aws_sdk_cloudformation::types::{
    self as cfn, Capability, Parameter, ResourceToImport, Tag,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::error::ProviderError;

use super::control_plane::{ProviderResult, StackControlPlane};
use super::types::{
    ChangeSet, ChangeSetStatus, CreateChangeSetRequest, ResourceChange, ResourcePage,
    StackDescription, StackEvent, StackResourceSummary,
};

/// SDK accessors return `Option<&T>` or `&T` depending on whether the member
/// is required in the service model.
trait Member<'a, T: ?Sized> {
    fn member(self) -> Option<&'a T>;
}

impl<'a, T: ?Sized> Member<'a, T> for &'a T {
    fn member(self) -> Option<&'a T> {
        Some(self)
    }
}

impl<'a, T: ?Sized> Member<'a, T> for Option<&'a T> {
    fn member(self) -> Option<&'a T> {
        self
    }
}

fn text<'a>(value: impl Member<'a, str>) -> String {
    value.member().unwrap_or_default().to_string()
}

fn opt_text<'a>(value: impl Member<'a, str>) -> Option<String> {
    value.member().map(str::to_string)
}

fn items<'a, T: 'a>(value: impl Member<'a, [T]>) -> &'a [T] {
    value.member().unwrap_or_default()
}

fn timestamp<'a>(value: impl Member<'a, SdkDateTime>) -> DateTime<Utc> {
    value
        .member()
        .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
        .unwrap_or_default()
}

fn resource_change(change: &cfn::Change) -> Option<ResourceChange> {
    let rc = change.resource_change()?;
    Some(ResourceChange {
        action: rc
            .action()
            .member()
            .map_or_else(String::new, |a| a.as_str().to_string()),
        logical_id: text(rc.logical_resource_id()),
        physical_id: opt_text(rc.physical_resource_id()),
        resource_type: text(rc.resource_type()),
        replacement: rc.replacement().member().map(|r| r.as_str().to_string()),
    })
}

/// CloudFormation control plane.
#[derive(Debug, Clone)]
pub struct CloudFormationControlPlane {
    /// CloudFormation client.
    client: Client,
}

impl CloudFormationControlPlane {
    /// Creates a control plane from a loaded AWS configuration.
    #[must_use]
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }

    fn parameters(parameters: &BTreeMap<String, String>) -> Vec<Parameter> {
        parameters
            .iter()
            .map(|(key, value)| {
                Parameter::builder()
                    .parameter_key(key)
                    .parameter_value(value)
                    .build()
            })
            .collect()
    }

    fn tags(tags: &BTreeMap<String, String>) -> Vec<Tag> {
        tags.iter()
            .map(|(key, value)| Tag::builder().key(key).value(value).build())
            .collect()
    }

    fn imports(request: &CreateChangeSetRequest) -> Vec<ResourceToImport> {
        request
            .import_resources
            .iter()
            .map(|resource| {
                let identifier: HashMap<String, String> = resource
                    .identifier
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();

                ResourceToImport::builder()
                    .resource_type(&resource.resource_type)
                    .logical_resource_id(&resource.logical_id)
                    .set_resource_identifier(Some(identifier))
                    .build()
            })
            .collect()
    }
}

#[async_trait]
impl StackControlPlane for CloudFormationControlPlane {
    async fn create_change_set(&self, request: &CreateChangeSetRequest) -> ProviderResult<String> {
        debug!(
            "CreateChangeSet {} ({}) for {}",
            request.change_set_name, request.change_set_type, request.stack_name
        );

        let capabilities = request
            .capabilities
            .iter()
            .map(|c| Capability::from(c.as_str()))
            .collect();

        let imports = Self::imports(request);

        let output = self
            .client
            .create_change_set()
            .stack_name(&request.stack_name)
            .change_set_name(&request.change_set_name)
            .change_set_type(cfn::ChangeSetType::from(request.change_set_type.as_str()))
            .template_url(&request.template_url)
            .set_capabilities(Some(capabilities))
            .set_parameters(Some(Self::parameters(&request.parameters)))
            .set_tags(Some(Self::tags(&request.tags)))
            .set_resources_to_import((!imports.is_empty()).then_some(imports))
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("CreateChangeSet", &e))?;

        Ok(text(output.id()))
    }

    async fn delete_change_set(
        &self,
        stack_name: &str,
        change_set_name: &str,
    ) -> ProviderResult<()> {
        debug!("DeleteChangeSet {change_set_name} on {stack_name}");

        self.client
            .delete_change_set()
            .stack_name(stack_name)
            .change_set_name(change_set_name)
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("DeleteChangeSet", &e))?;

        Ok(())
    }

    async fn describe_change_set(
        &self,
        stack_name: &str,
        change_set: &str,
    ) -> ProviderResult<ChangeSet> {
        let mut changes = Vec::new();
        let mut next_token = None;

        // Status fields repeat on every page; the change list is split across them.
        loop {
            let output = self
                .client
                .describe_change_set()
                .stack_name(stack_name)
                .change_set_name(change_set)
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| ProviderError::from_sdk("DescribeChangeSet", &e))?;

            changes.extend(items(output.changes()).iter().filter_map(resource_change));

            next_token = opt_text(output.next_token());
            if next_token.is_none() {
                return Ok(ChangeSet {
                    id: text(output.change_set_id()),
                    status: ChangeSetStatus::parse(
                        output.status().member().map_or("", cfn::ChangeSetStatus::as_str),
                    ),
                    status_reason: opt_text(output.status_reason()),
                    changes,
                });
            }
        }
    }

    async fn execute_change_set(&self, stack_name: &str, change_set: &str) -> ProviderResult<()> {
        debug!("ExecuteChangeSet {change_set} on {stack_name}");

        self.client
            .execute_change_set()
            .stack_name(stack_name)
            .change_set_name(change_set)
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("ExecuteChangeSet", &e))?;

        Ok(())
    }

    async fn describe_stack(&self, stack_name: &str) -> ProviderResult<Vec<StackDescription>> {
        let output = self
            .client
            .describe_stacks()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("DescribeStacks", &e))?;

        Ok(items(output.stacks())
            .iter()
            .map(|stack| StackDescription {
                name: text(stack.stack_name()),
                status: stack
                    .stack_status()
                    .member()
                    .map_or("", cfn::StackStatus::as_str)
                    .to_string(),
                outputs: items(stack.outputs())
                    .iter()
                    .filter_map(|o| Some((opt_text(o.output_key())?, text(o.output_value()))))
                    .collect(),
            })
            .collect())
    }

    async fn describe_stack_events(&self, stack_name: &str) -> ProviderResult<Vec<StackEvent>> {
        let output = self
            .client
            .describe_stack_events()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("DescribeStackEvents", &e))?;

        Ok(items(output.stack_events())
            .iter()
            .map(|event| StackEvent {
                id: text(event.event_id()),
                logical_id: text(event.logical_resource_id()),
                resource_type: text(event.resource_type()),
                status: event
                    .resource_status()
                    .member()
                    .map_or("", cfn::ResourceStatus::as_str)
                    .to_string(),
                status_reason: opt_text(event.resource_status_reason()),
                timestamp: timestamp(event.timestamp()),
            })
            .collect())
    }

    async fn list_stack_resources(
        &self,
        stack_name: &str,
        next_token: Option<String>,
    ) -> ProviderResult<ResourcePage> {
        let output = self
            .client
            .list_stack_resources()
            .stack_name(stack_name)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("ListStackResources", &e))?;

        Ok(ResourcePage {
            resources: items(output.stack_resource_summaries())
                .iter()
                .map(|r| StackResourceSummary {
                    logical_id: text(r.logical_resource_id()),
                    physical_id: opt_text(r.physical_resource_id()),
                    resource_type: text(r.resource_type()),
                })
                .collect(),
            next_token: opt_text(output.next_token()),
        })
    }

    async fn delete_stack(&self, stack_name: &str) -> ProviderResult<()> {
        debug!("DeleteStack {stack_name}");

        self.client
            .delete_stack()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| ProviderError::from_sdk("DeleteStack", &e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::types::{ChangeSetType, ImportResource};

    fn create_request(import_resources: Vec<ImportResource>) -> CreateChangeSetRequest {
        CreateChangeSetRequest {
            stack_name: String::from("app"),
            change_set_name: String::from("stack-deploy-pending"),
            change_set_type: ChangeSetType::Import,
            template_url: String::from("https://deploys.s3.amazonaws.com/app/template.json"),
            capabilities: Vec::new(),
            parameters: BTreeMap::new(),
            tags: BTreeMap::new(),
            import_resources,
        }
    }

    #[test]
    fn test_tags_keep_keys_and_values() {
        let tags = CloudFormationControlPlane::tags(&BTreeMap::from([
            (String::from("env"), String::from("prod")),
            (String::from("team"), String::from("shop")),
        ]));

        let pairs: Vec<(String, String)> = tags
            .iter()
            .map(|t| (text(t.key()), text(t.value())))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (String::from("env"), String::from("prod")),
                (String::from("team"), String::from("shop")),
            ]
        );
    }

    #[test]
    fn test_imports_copy_the_identifier() {
        let request = create_request(vec![ImportResource {
            resource_type: String::from("AWS::S3::Bucket"),
            logical_id: String::from("Assets"),
            identifier: BTreeMap::from([(String::from("BucketName"), String::from("shop-assets"))]),
        }]);

        let imports = CloudFormationControlPlane::imports(&request);

        assert_eq!(imports.len(), 1);
        assert_eq!(text(imports[0].resource_type()), "AWS::S3::Bucket");
        assert_eq!(text(imports[0].logical_resource_id()), "Assets");
        let identifier = imports[0].resource_identifier().member().unwrap();
        assert_eq!(identifier.get("BucketName").map(String::as_str), Some("shop-assets"));
    }

    #[test]
    fn test_no_imports_when_none_requested() {
        assert!(CloudFormationControlPlane::imports(&create_request(Vec::new())).is_empty());
    }

    #[test]
    fn test_resource_change_maps_fields() {
        let change = cfn::Change::builder()
            .resource_change(
                cfn::ResourceChange::builder()
                    .action(cfn::ChangeAction::Modify)
                    .logical_resource_id("Web")
                    .physical_resource_id("shop-prod-web")
                    .resource_type("AWS::Lambda::Function")
                    .replacement(cfn::Replacement::False)
                    .build(),
            )
            .build();

        let mapped = resource_change(&change).unwrap();
        assert_eq!(mapped.action, "Modify");
        assert_eq!(mapped.logical_id, "Web");
        assert_eq!(mapped.physical_id.as_deref(), Some("shop-prod-web"));
        assert_eq!(mapped.replacement.as_deref(), Some("False"));
    }

    #[test]
    fn test_change_without_resource_change_is_skipped() {
        assert!(resource_change(&cfn::Change::builder().build()).is_none());
    }
}
