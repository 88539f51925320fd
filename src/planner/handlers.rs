//! Resource handlers.
//!
//! Each resource kind of the configuration has one handler that renders it
//! into template resources. Handlers live in a static table, in rendering
//! order, and are looked up by kind.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::{ApiConfig, DesiredState, FunctionConfig, RawResourceConfig, ResourceConfig};
use crate::error::{ConfigError, DeployError, Result};

use super::document::{BundleRef, Template};

/// Managed policy attached to every function role.
const BASIC_EXECUTION_POLICY: &str =
    "arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";

/// Values shared by every handler.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    /// Project name.
    pub project: &'a str,
    /// Stage name.
    pub stage: &'a str,
    /// Code bundle, if any.
    pub bundle: Option<&'a BundleRef>,
}

impl RenderContext<'_> {
    /// Physical name of a resource: `{project}-{stage}-{name}`.
    #[must_use]
    pub fn physical_name(&self, name: &str) -> String {
        format!("{}-{}-{name}", self.project, self.stage)
    }
}

/// Renders one kind of resource.
pub trait ResourceHandler: Sync {
    /// Kind label handled, as written in the configuration.
    fn kind(&self) -> &'static str;

    /// Adds the resources for `resource` to `template`.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource is not of this handler's kind or
    /// cannot be rendered.
    fn render(
        &self,
        resource: &ResourceConfig,
        ctx: &RenderContext<'_>,
        template: &mut Template,
    ) -> Result<()>;
}

/// Handlers in rendering order.
pub static HANDLERS: &[&dyn ResourceHandler] = &[&FunctionHandler, &ApiHandler, &RawHandler];

/// Looks up the handler of a resource kind.
#[must_use]
pub fn handler_for(kind: &str) -> Option<&'static dyn ResourceHandler> {
    HANDLERS.iter().copied().find(|h| h.kind() == kind)
}

/// Renders the template of the desired state.
///
/// # Errors
///
/// Returns an error if a resource has no handler or fails to render.
pub fn render_template(desired: &DesiredState, bundle: Option<&BundleRef>) -> Result<Template> {
    let ctx = RenderContext {
        project: &desired.project,
        stage: &desired.stage,
        bundle,
    };

    let mut template = Template::new(Some(format!(
        "{} ({}) deployed by stack-deploy",
        desired.project, desired.stage
    )));

    for handler in HANDLERS {
        for resource in desired.resources.iter().filter(|r| r.kind() == handler.kind()) {
            debug!("Rendering {} {}", resource.kind(), resource.name());
            handler.render(resource, &ctx, &mut template)?;
        }
    }

    Ok(template)
}

/// Converts a declared name into a logical id: `hello-world` becomes `HelloWorld`.
#[must_use]
pub fn logical_id(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_ascii_uppercase().to_string() + chars.as_str()
            })
        })
        .collect()
}

fn wrong_kind(handler: &dyn ResourceHandler, resource: &ResourceConfig) -> DeployError {
    DeployError::internal(format!(
        "{} handler cannot render {} {}",
        handler.kind(),
        resource.kind(),
        resource.name()
    ))
}

/// Function: execution role and function.
#[derive(Debug)]
pub struct FunctionHandler;

impl FunctionHandler {
    fn render_function(
        function: &FunctionConfig,
        ctx: &RenderContext<'_>,
        template: &mut Template,
    ) -> Result<()> {
        let Some(bundle) = ctx.bundle else {
            return Err(ConfigError::validation(
                format!("function '{}' requires a code bundle", function.name),
                "bundle",
            )
            .into());
        };

        let base = logical_id(&function.name);
        let role_id = format!("{base}Role");
        let function_id = format!("{base}Function");

        template.add_resource(
            &role_id,
            json!({
                "Type": "AWS::IAM::Role",
                "Properties": {
                    "AssumeRolePolicyDocument": {
                        "Version": "2012-10-17",
                        "Statement": [{
                            "Effect": "Allow",
                            "Principal": { "Service": ["lambda.amazonaws.com"] },
                            "Action": ["sts:AssumeRole"]
                        }]
                    },
                    "ManagedPolicyArns": [BASIC_EXECUTION_POLICY]
                }
            }),
        )?;

        let mut properties = json!({
            "FunctionName": ctx.physical_name(&function.name),
            "Handler": function.handler,
            "Runtime": function.runtime,
            "MemorySize": function.memory_mb,
            "Timeout": function.timeout_secs,
            "Role": { "Fn::GetAtt": [role_id, "Arn"] },
            "Code": { "S3Bucket": bundle.bucket, "S3Key": bundle.key }
        });

        if !function.environment.is_empty() {
            properties["Environment"] = json!({ "Variables": function.environment });
        }

        template.add_resource(
            &function_id,
            json!({ "Type": "AWS::Lambda::Function", "Properties": properties }),
        )?;
        template.add_output(
            format!("{function_id}Arn"),
            json!({ "Fn::GetAtt": [function_id, "Arn"] }),
        );

        Ok(())
    }
}

impl ResourceHandler for FunctionHandler {
    fn kind(&self) -> &'static str {
        "function"
    }

    fn render(
        &self,
        resource: &ResourceConfig,
        ctx: &RenderContext<'_>,
        template: &mut Template,
    ) -> Result<()> {
        match resource {
            ResourceConfig::Function(function) => Self::render_function(function, ctx, template),
            other => Err(wrong_kind(self, other)),
        }
    }
}

/// API: REST API proxying every path to one function, with a single stage.
#[derive(Debug)]
pub struct ApiHandler;

impl ApiHandler {
    fn render_api(api: &ApiConfig, ctx: &RenderContext<'_>, template: &mut Template) -> Result<()> {
        let api_id = format!("{}Api", logical_id(&api.name));
        let function_id = format!("{}Function", logical_id(&api.function));
        let proxy_id = format!("{api_id}Proxy");
        let root_method_id = format!("{api_id}RootMethod");
        let proxy_method_id = format!("{api_id}ProxyMethod");
        let deployment_id = format!("{api_id}Deployment");
        let stage_name = api.stage.as_deref().unwrap_or(ctx.stage);

        let integration = json!({
            "Type": "AWS_PROXY",
            "IntegrationHttpMethod": "POST",
            "Uri": {
                "Fn::Sub": format!(
                    "arn:${{AWS::Partition}}:apigateway:${{AWS::Region}}:lambda:path/2015-03-31/functions/${{{function_id}.Arn}}/invocations"
                )
            }
        });

        template.add_resource(
            &api_id,
            json!({
                "Type": "AWS::ApiGateway::RestApi",
                "Properties": { "Name": ctx.physical_name(&api.name) }
            }),
        )?;
        template.add_resource(
            &proxy_id,
            json!({
                "Type": "AWS::ApiGateway::Resource",
                "Properties": {
                    "RestApiId": { "Ref": api_id },
                    "ParentId": { "Fn::GetAtt": [api_id, "RootResourceId"] },
                    "PathPart": "{proxy+}"
                }
            }),
        )?;

        for (method_id, resource_id) in [
            (&root_method_id, json!({ "Fn::GetAtt": [api_id, "RootResourceId"] })),
            (&proxy_method_id, json!({ "Ref": proxy_id })),
        ] {
            template.add_resource(
                method_id,
                json!({
                    "Type": "AWS::ApiGateway::Method",
                    "Properties": {
                        "RestApiId": { "Ref": api_id },
                        "ResourceId": resource_id,
                        "HttpMethod": "ANY",
                        "AuthorizationType": "NONE",
                        "Integration": integration
                    }
                }),
            )?;
        }

        template.add_resource(
            format!("{api_id}Permission"),
            json!({
                "Type": "AWS::Lambda::Permission",
                "Properties": {
                    "Action": "lambda:InvokeFunction",
                    "FunctionName": { "Ref": function_id },
                    "Principal": "apigateway.amazonaws.com",
                    "SourceArn": {
                        "Fn::Sub": format!(
                            "arn:${{AWS::Partition}}:execute-api:${{AWS::Region}}:${{AWS::AccountId}}:${{{api_id}}}/*"
                        )
                    }
                }
            }),
        )?;
        template.add_resource(
            &deployment_id,
            json!({
                "Type": "AWS::ApiGateway::Deployment",
                "DependsOn": [root_method_id, proxy_method_id],
                "Properties": { "RestApiId": { "Ref": api_id } }
            }),
        )?;
        template.add_resource(
            format!("{api_id}Stage"),
            json!({
                "Type": "AWS::ApiGateway::Stage",
                "Properties": {
                    "RestApiId": { "Ref": api_id },
                    "DeploymentId": { "Ref": deployment_id },
                    "StageName": stage_name
                }
            }),
        )?;
        template.add_output(
            format!("{api_id}Url"),
            json!({
                "Fn::Sub": format!(
                    "https://${{{api_id}}}.execute-api.${{AWS::Region}}.${{AWS::URLSuffix}}/{stage_name}"
                )
            }),
        );

        Ok(())
    }
}

impl ResourceHandler for ApiHandler {
    fn kind(&self) -> &'static str {
        "api"
    }

    fn render(
        &self,
        resource: &ResourceConfig,
        ctx: &RenderContext<'_>,
        template: &mut Template,
    ) -> Result<()> {
        match resource {
            ResourceConfig::Api(api) => Self::render_api(api, ctx, template),
            other => Err(wrong_kind(self, other)),
        }
    }
}

/// Raw: copied into the template verbatim under its declared name.
#[derive(Debug)]
pub struct RawHandler;

impl RawHandler {
    fn render_raw(raw: &RawResourceConfig, template: &mut Template) -> Result<()> {
        let mut resource = Map::new();
        resource.insert(String::from("Type"), Value::String(raw.resource_type.clone()));
        if !raw.properties.is_null() {
            resource.insert(String::from("Properties"), raw.properties.clone());
        }
        template.add_resource(&raw.name, Value::Object(resource))
    }
}

impl ResourceHandler for RawHandler {
    fn kind(&self) -> &'static str {
        "raw"
    }

    fn render(
        &self,
        resource: &ResourceConfig,
        _ctx: &RenderContext<'_>,
        template: &mut Template,
    ) -> Result<()> {
        match resource {
            ResourceConfig::Raw(raw) => Self::render_raw(raw, template),
            other => Err(wrong_kind(self, other)),
        }
    }
}
