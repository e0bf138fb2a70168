//! Search tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use azdo_client::{AzureClient, SearchCodeOptions, SearchOptions};
use azdo_core::Error;

use super::{organization_description, parse_args, project_description, tool, ToolOutput, ToolSet};
use crate::protocol::ToolDefinition;

pub struct SearchTools {
    client: Arc<AzureClient>,
}

impl SearchTools {
    pub fn new(client: Arc<AzureClient>) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchCodeArgs {
    search_text: String,
    project_id: Option<String>,
    repository: Option<String>,
    path: Option<String>,
    branch: Option<String>,
    #[serde(default)]
    include_content: bool,
    top: Option<u32>,
    skip: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchArgs {
    search_text: String,
    project_id: Option<String>,
    #[serde(default)]
    filters: Map<String, Value>,
    #[serde(default)]
    include_facets: bool,
    top: Option<u32>,
    skip: Option<u32>,
}

impl SearchArgs {
    fn options(self) -> (Option<String>, String, SearchOptions) {
        let options = SearchOptions {
            skip: self.skip,
            top: self.top,
            filters: self.filters,
            include_facets: self.include_facets,
        };
        (self.project_id, self.search_text, options)
    }
}

#[async_trait]
impl ToolSet for SearchTools {
    fn name(&self) -> &'static str {
        "search"
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        let project = project_description(&self.client);
        let organization = organization_description(&self.client);
        let facet_filters = json!({
            "type": "object",
            "description": "Additional facet filters, mapping a facet name to the values to match",
            "additionalProperties": {
                "type": "array",
                "items": { "type": "string" }
            }
        });
        vec![
            tool(
                "search_code",
                "Search for code across repositories in a project",
                json!({
                    "type": "object",
                    "properties": {
                        "organizationId": {
                            "type": "string",
                            "description": organization
                        },
                        "projectId": {
                            "type": "string",
                            "description": project
                        },
                        "searchText": {
                            "type": "string",
                            "description": "The text to search for"
                        },
                        "repository": {
                            "type": "string",
                            "description": "Restrict results to a repository"
                        },
                        "path": {
                            "type": "string",
                            "description": "Restrict results to a path prefix"
                        },
                        "branch": {
                            "type": "string",
                            "description": "Restrict results to a branch"
                        },
                        "includeContent": {
                            "type": "boolean",
                            "description": "Include file content for the leading results"
                        },
                        "top": {
                            "type": "integer",
                            "description": "Maximum number of results to return (default: 25)"
                        },
                        "skip": {
                            "type": "integer",
                            "description": "Number of results to skip"
                        }
                    },
                    "required": ["searchText"]
                }),
            ),
            tool(
                "search_wiki",
                "Search for content across wiki pages in a project",
                json!({
                    "type": "object",
                    "properties": {
                        "organizationId": {
                            "type": "string",
                            "description": organization
                        },
                        "projectId": {
                            "type": "string",
                            "description": project
                        },
                        "searchText": {
                            "type": "string",
                            "description": "The text to search for"
                        },
                        "filters": facet_filters.clone(),
                        "includeFacets": {
                            "type": "boolean",
                            "description": "Include facet counts in the results"
                        },
                        "top": {
                            "type": "integer",
                            "description": "Maximum number of results to return (default: 25)"
                        },
                        "skip": {
                            "type": "integer",
                            "description": "Number of results to skip"
                        }
                    },
                    "required": ["searchText"]
                }),
            ),
            tool(
                "search_work_items",
                "Search for work items across projects in Azure DevOps",
                json!({
                    "type": "object",
                    "properties": {
                        "organizationId": {
                            "type": "string",
                            "description": organization
                        },
                        "projectId": {
                            "type": "string",
                            "description": project
                        },
                        "searchText": {
                            "type": "string",
                            "description": "The text to search for"
                        },
                        "filters": facet_filters,
                        "includeFacets": {
                            "type": "boolean",
                            "description": "Include facet counts in the results"
                        },
                        "top": {
                            "type": "integer",
                            "description": "Maximum number of results to return (default: 25)"
                        },
                        "skip": {
                            "type": "integer",
                            "description": "Number of results to skip"
                        }
                    },
                    "required": ["searchText"]
                }),
            ),
        ]
    }

    fn owns(&self, tool: &str) -> bool {
        matches!(tool, "search_code" | "search_wiki" | "search_work_items")
    }

    async fn call(&self, tool: &str, args: Value) -> azdo_core::Result<ToolOutput> {
        match tool {
            "search_code" => {
                let args: SearchCodeArgs = parse_args(tool, args)?;
                let results = self
                    .client
                    .search_code(
                        args.project_id.as_deref(),
                        &args.search_text,
                        &SearchCodeOptions {
                            repository: args.repository,
                            path: args.path,
                            branch: args.branch,
                            include_content: args.include_content,
                            skip: args.skip,
                            top: args.top,
                        },
                    )
                    .await?;
                Ok(ToolOutput::Json(results))
            }
            "search_wiki" => {
                let args: SearchArgs = parse_args(tool, args)?;
                let (project, text, options) = args.options();
                let results = self
                    .client
                    .search_wiki(project.as_deref(), &text, &options)
                    .await?;
                Ok(ToolOutput::Json(results))
            }
            "search_work_items" => {
                let args: SearchArgs = parse_args(tool, args)?;
                let (project, text, options) = args.options();
                let results = self
                    .client
                    .search_work_items(project.as_deref(), &text, &options)
                    .await?;
                Ok(ToolOutput::Json(results))
            }
            other => Err(Error::Validation(format!("Unknown tool: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn test_tools(server: &MockServer) -> SearchTools {
        let client = AzureClient::new(&format!("{}/acme", server.base_url()), "test-pat")
            .unwrap()
            .with_default_project(Some("widgets".to_string()));
        SearchTools::new(Arc::new(client))
    }

    #[test]
    fn test_definitions_require_search_text() {
        let server = MockServer::start();
        let tools = test_tools(&server);

        let defs = tools.definitions();
        assert_eq!(defs.len(), 3);
        for def in &defs {
            assert_eq!(
                def.input_schema["required"],
                json!(["searchText"]),
                "{} should require searchText",
                def.name
            );
        }
    }

    #[tokio::test]
    async fn test_search_code_posts_repository_filter() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/acme/widgets/_apis/search/codesearchresults")
                .body_includes("retry_backoff")
                .body_includes("Repository");
            then.status(200).json_body(json!({
                "count": 1,
                "results": [{"path": "/src/retry.rs", "repository": {"name": "api"}}]
            }));
        });
        let tools = test_tools(&server);

        let output = tools
            .call(
                "search_code",
                json!({"searchText": "retry_backoff", "repository": "api"}),
            )
            .await
            .unwrap();

        mock.assert();
        match output {
            ToolOutput::Json(results) => assert_eq!(results["count"], 1),
            other => panic!("expected JSON output, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_search_work_items_scopes_to_project() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/acme/widgets/_apis/search/workitemsearchresults")
                .body_includes("System.TeamProject")
                .body_includes("flaky test");
            then.status(200)
                .json_body(json!({"count": 0, "results": []}));
        });
        let tools = test_tools(&server);

        let output = tools
            .call("search_work_items", json!({"searchText": "flaky test"}))
            .await
            .unwrap();

        mock.assert();
        match output {
            ToolOutput::Json(results) => assert_eq!(results["count"], 0),
            other => panic!("expected JSON output, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_search_wiki_rejects_empty_text() {
        let server = MockServer::start();
        let tools = test_tools(&server);

        let err = tools
            .call("search_wiki", json!({"searchText": ""}))
            .await
            .unwrap_err();

        assert_eq!(err.user_message(), "Validation Error: Search text is required");
    }
}
