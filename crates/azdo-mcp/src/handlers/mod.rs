//! Tool dispatch.
//!
//! Every Azure DevOps feature area implements [`ToolSet`]; the
//! [`ToolHandler`] owns one instance of each and routes `tools/call`
//! requests to whichever set claims the tool name.

mod identity;
mod pipelines;
mod projects;
mod pull_requests;
mod repos;
mod search;
mod watch_control;
mod wikis;
mod work_items;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use azdo_client::AzureClient;
use azdo_core::Error;
use azdo_watch::WatchContext;

use crate::protocol::{ToolCallResult, ToolDefinition};

/// What a tool produced: structured JSON (pretty-printed before it goes
/// back to the client) or preformatted text returned verbatim.
#[derive(Debug)]
pub enum ToolOutput {
    Json(Value),
    Text(String),
}

/// A group of related tools backed by one feature area.
#[async_trait]
pub trait ToolSet: Send + Sync {
    /// Feature name used in logs.
    fn name(&self) -> &'static str;

    /// Definitions this set contributes to `tools/list`.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Whether this set handles the named tool.
    fn owns(&self, tool: &str) -> bool;

    /// Execute one tool with its raw JSON arguments.
    async fn call(&self, tool: &str, args: Value) -> azdo_core::Result<ToolOutput>;
}

/// Tool handler that routes calls to the feature sets.
pub struct ToolHandler {
    features: Vec<Arc<dyn ToolSet>>,
}

impl ToolHandler {
    /// Create a handler with every feature set registered.
    pub fn new(client: Arc<AzureClient>, watch: WatchContext) -> Self {
        let features: Vec<Arc<dyn ToolSet>> = vec![
            Arc::new(identity::IdentityTools::new(client.clone())),
            Arc::new(projects::ProjectTools::new(client.clone())),
            Arc::new(repos::RepoTools::new(client.clone())),
            Arc::new(pull_requests::PullRequestTools::new(client.clone())),
            Arc::new(pipelines::PipelineTools::new(client.clone())),
            Arc::new(work_items::WorkItemTools::new(client.clone())),
            Arc::new(wikis::WikiTools::new(client.clone())),
            Arc::new(search::SearchTools::new(client)),
            Arc::new(watch_control::WatchControlTools::new(watch)),
        ];
        Self { features }
    }

    #[cfg(test)]
    fn with_features(features: Vec<Arc<dyn ToolSet>>) -> Self {
        Self { features }
    }

    /// All tool definitions, in feature registration order.
    pub fn available_tools(&self) -> Vec<ToolDefinition> {
        self.features
            .iter()
            .flat_map(|feature| feature.definitions())
            .collect()
    }

    /// Execute a tool by name. Failures fold into an `isError` result with
    /// the user-facing message, never a protocol error.
    pub async fn execute(&self, name: &str, arguments: Option<Value>) -> ToolCallResult {
        let args = arguments.unwrap_or_else(|| json!({}));
        let Some(feature) = self.features.iter().find(|feature| feature.owns(name)) else {
            return ToolCallResult::error(format!("Unknown tool: {}", name));
        };
        tracing::debug!(tool = name, feature = feature.name(), "dispatching tool call");

        let outcome = feature.call(name, args).await.and_then(|output| match output {
            ToolOutput::Json(value) => Ok(serde_json::to_string_pretty(&value)?),
            ToolOutput::Text(text) => Ok(text),
        });
        match outcome {
            Ok(text) => ToolCallResult::text(text),
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "tool call failed");
                ToolCallResult::error(e.user_message())
            }
        }
    }
}

/// Deserialize tool arguments into a params struct, naming the tool in
/// the validation message on failure.
fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> azdo_core::Result<T> {
    serde_json::from_value(args)
        .map_err(|e| Error::Validation(format!("Invalid arguments for {}: {}", tool, e)))
}

/// Shorthand for building one tool definition.
fn tool(name: &str, description: &str, input_schema: Value) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

/// Standard description for the optional `projectId` argument, naming the
/// configured default project when there is one.
fn project_description(client: &AzureClient) -> String {
    match client.default_project() {
        Some(project) => format!("The ID or name of the project (Default: {})", project),
        None => "The ID or name of the project".to_string(),
    }
}

/// Standard description for the optional `organizationId` argument.
fn organization_description(client: &AzureClient) -> String {
    match &client.base_urls().organization {
        Some(org) => format!("The ID or name of the organization (Default: {})", org),
        None => "The ID or name of the organization".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ToolResultContent;
    use azdo_watch::WatchConfig;

    fn result_text(result: &ToolCallResult) -> &str {
        match &result.content[0] {
            ToolResultContent::Text { text } => text,
        }
    }

    /// Scriptable feature set for dispatch tests.
    struct StubFeature {
        tool: &'static str,
        respond: fn(Value) -> azdo_core::Result<ToolOutput>,
    }

    #[async_trait]
    impl ToolSet for StubFeature {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn definitions(&self) -> Vec<ToolDefinition> {
            vec![tool(self.tool, "A stub tool", json!({"type": "object", "properties": {}}))]
        }

        fn owns(&self, tool: &str) -> bool {
            tool == self.tool
        }

        async fn call(&self, _tool: &str, args: Value) -> azdo_core::Result<ToolOutput> {
            (self.respond)(args)
        }
    }

    fn stub_handler(
        tool: &'static str,
        respond: fn(Value) -> azdo_core::Result<ToolOutput>,
    ) -> ToolHandler {
        ToolHandler::with_features(vec![Arc::new(StubFeature { tool, respond })])
    }

    #[tokio::test]
    async fn test_execute_routes_to_owning_feature() {
        let handler = stub_handler("stub_tool", |_| Ok(ToolOutput::Json(json!({"ok": true}))));

        let result = handler.execute("stub_tool", None).await;

        assert!(result.is_error.is_none());
        assert_eq!(result_text(&result), "{\n  \"ok\": true\n}");
    }

    #[tokio::test]
    async fn test_execute_text_output_is_verbatim() {
        let handler = stub_handler("stub_tool", |_| {
            Ok(ToolOutput::Text("plain text, not JSON".to_string()))
        });

        let result = handler.execute("stub_tool", None).await;

        assert!(result.is_error.is_none());
        assert_eq!(result_text(&result), "plain text, not JSON");
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let handler = ToolHandler::with_features(vec![]);

        let result = handler.execute("does_not_exist", None).await;

        assert_eq!(result.is_error, Some(true));
        assert_eq!(result_text(&result), "Unknown tool: does_not_exist");
    }

    #[tokio::test]
    async fn test_execute_error_uses_user_message() {
        let handler = stub_handler("stub_tool", |_| {
            Err(Error::NotFound("Repository missing".to_string()))
        });

        let result = handler.execute("stub_tool", None).await;

        assert_eq!(result.is_error, Some(true));
        assert_eq!(result_text(&result), "Not Found: Repository missing");
    }

    #[tokio::test]
    async fn test_execute_defaults_missing_arguments_to_empty_object() {
        let handler = stub_handler("stub_tool", |args| {
            assert_eq!(args, json!({}));
            Ok(ToolOutput::Json(json!([])))
        });

        let result = handler.execute("stub_tool", None).await;

        assert!(result.is_error.is_none());
    }

    #[test]
    fn test_parse_args_reports_tool_name() {
        #[derive(Debug, serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Params {
            #[allow(dead_code)]
            repository_id: String,
        }

        let err = parse_args::<Params>("get_repository", json!({})).unwrap_err();

        let message = err.user_message();
        assert!(message.starts_with("Validation Error: Invalid arguments for get_repository:"));
    }

    #[test]
    fn test_all_tool_names_unique_and_schemas_are_objects() {
        let client = Arc::new(
            AzureClient::new("https://dev.azure.com/acme", "test-pat")
                .unwrap()
                .with_default_project(Some("widgets".to_string())),
        );
        let watch = WatchContext::new(WatchConfig::default());
        let handler = ToolHandler::new(client, watch);

        let tools = handler.available_tools();
        assert_eq!(tools.len(), 45);

        let mut names = std::collections::HashSet::new();
        for tool in &tools {
            assert!(names.insert(tool.name.clone()), "duplicate tool: {}", tool.name);
            assert_eq!(
                tool.input_schema.get("type").and_then(Value::as_str),
                Some("object"),
                "schema for {} is not an object",
                tool.name
            );
            assert!(!tool.description.is_empty(), "{} has no description", tool.name);
        }
    }

    #[test]
    fn test_project_description_names_default() {
        let client = AzureClient::new("https://dev.azure.com/acme", "test-pat")
            .unwrap()
            .with_default_project(Some("widgets".to_string()));
        assert_eq!(
            project_description(&client),
            "The ID or name of the project (Default: widgets)"
        );
        assert_eq!(
            organization_description(&client),
            "The ID or name of the organization (Default: acme)"
        );

        let bare = AzureClient::new("https://dev.azure.com/acme", "test-pat").unwrap();
        assert_eq!(project_description(&bare), "The ID or name of the project");
    }
}
