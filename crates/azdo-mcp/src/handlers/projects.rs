//! Project tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use azdo_client::{AzureClient, ListProjectsOptions, ProjectDetailsOptions};
use azdo_core::Error;

use super::{organization_description, parse_args, project_description, tool, ToolOutput, ToolSet};
use crate::protocol::ToolDefinition;

pub struct ProjectTools {
    client: Arc<AzureClient>,
}

impl ProjectTools {
    pub fn new(client: Arc<AzureClient>) -> Self {
        Self { client }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListProjectsArgs {
    state_filter: Option<String>,
    top: Option<u32>,
    skip: Option<u32>,
    continuation_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetProjectArgs {
    project_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetProjectDetailsArgs {
    project_id: Option<String>,
    #[serde(default)]
    include_process: bool,
    #[serde(default)]
    include_work_item_types: bool,
    #[serde(default)]
    include_fields: bool,
    #[serde(default)]
    include_teams: bool,
    #[serde(default)]
    expand_team_identity: bool,
    max_teams: Option<u32>,
}

#[async_trait]
impl ToolSet for ProjectTools {
    fn name(&self) -> &'static str {
        "projects"
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        let project = project_description(&self.client);
        let organization = organization_description(&self.client);
        vec![
            tool(
                "list_projects",
                "List all projects in an organization",
                json!({
                    "type": "object",
                    "properties": {
                        "organizationId": {
                            "type": "string",
                            "description": organization
                        },
                        "stateFilter": {
                            "type": "string",
                            "description": "Filter on project state (e.g., all, wellFormed, createPending, deleted)"
                        },
                        "top": {
                            "type": "integer",
                            "description": "Maximum number of projects to return"
                        },
                        "skip": {
                            "type": "integer",
                            "description": "Number of projects to skip"
                        },
                        "continuationToken": {
                            "type": "string",
                            "description": "Continuation token from a previous page of results"
                        }
                    }
                }),
            ),
            tool(
                "get_project",
                "Get details of a specific project",
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
                        }
                    }
                }),
            ),
            tool(
                "get_project_details",
                "Get comprehensive details of a project including process, work item types, and teams",
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
                        "includeProcess": {
                            "type": "boolean",
                            "description": "Include process information in the project result"
                        },
                        "includeWorkItemTypes": {
                            "type": "boolean",
                            "description": "Include work item types and their fields in the process information"
                        },
                        "includeFields": {
                            "type": "boolean",
                            "description": "Include field information for work item types"
                        },
                        "includeTeams": {
                            "type": "boolean",
                            "description": "Include associated teams in the project result"
                        },
                        "expandTeamIdentity": {
                            "type": "boolean",
                            "description": "Expand identity information in the team objects"
                        },
                        "maxTeams": {
                            "type": "integer",
                            "description": "Maximum number of teams to return (default: 100)"
                        }
                    }
                }),
            ),
        ]
    }

    fn owns(&self, tool: &str) -> bool {
        matches!(tool, "list_projects" | "get_project" | "get_project_details")
    }

    async fn call(&self, tool: &str, args: Value) -> azdo_core::Result<ToolOutput> {
        match tool {
            "list_projects" => {
                let args: ListProjectsArgs = parse_args(tool, args)?;
                let projects = self
                    .client
                    .list_projects(&ListProjectsOptions {
                        state_filter: args.state_filter,
                        top: args.top,
                        skip: args.skip,
                        continuation_token: args.continuation_token,
                    })
                    .await?;
                Ok(ToolOutput::Json(Value::Array(projects)))
            }
            "get_project" => {
                let args: GetProjectArgs = parse_args(tool, args)?;
                let project = self.client.get_project(args.project_id.as_deref()).await?;
                Ok(ToolOutput::Json(project))
            }
            "get_project_details" => {
                let args: GetProjectDetailsArgs = parse_args(tool, args)?;
                let details = self
                    .client
                    .get_project_details(
                        args.project_id.as_deref(),
                        &ProjectDetailsOptions {
                            include_process: args.include_process,
                            include_work_item_types: args.include_work_item_types,
                            include_fields: args.include_fields,
                            include_teams: args.include_teams,
                            expand_team_identity: args.expand_team_identity,
                            max_teams: args.max_teams,
                        },
                    )
                    .await?;
                Ok(ToolOutput::Json(details))
            }
            other => Err(Error::Validation(format!("Unknown tool: {}", other))),
        }
    }
}
