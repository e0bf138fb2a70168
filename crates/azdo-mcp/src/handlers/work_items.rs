//! Work item tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use azdo_client::{
    AzureClient, CreateWorkItemOptions, LinkOperation, ListWorkItemsOptions, UpdateWorkItemOptions,
};
use azdo_core::Error;

use super::{organization_description, parse_args, project_description, tool, ToolOutput, ToolSet};
use crate::protocol::ToolDefinition;

pub struct WorkItemTools {
    client: Arc<AzureClient>,
}

impl WorkItemTools {
    pub fn new(client: Arc<AzureClient>) -> Self {
        Self { client }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListWorkItemsArgs {
    project_id: Option<String>,
    team_id: Option<String>,
    query_id: Option<String>,
    wiql: Option<String>,
    top: Option<u32>,
    skip: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetWorkItemArgs {
    work_item_id: i64,
    expand: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateWorkItemArgs {
    project_id: Option<String>,
    work_item_type: String,
    title: String,
    description: Option<String>,
    assigned_to: Option<String>,
    area_path: Option<String>,
    iteration_path: Option<String>,
    priority: Option<i64>,
    parent_id: Option<i64>,
    #[serde(default)]
    additional_fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateWorkItemArgs {
    work_item_id: i64,
    title: Option<String>,
    description: Option<String>,
    assigned_to: Option<String>,
    area_path: Option<String>,
    iteration_path: Option<String>,
    priority: Option<i64>,
    state: Option<String>,
    #[serde(default)]
    additional_fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManageLinkArgs {
    project_id: Option<String>,
    source_work_item_id: i64,
    target_work_item_id: i64,
    operation: String,
    relation_type: String,
    new_relation_type: Option<String>,
    comment: Option<String>,
}

#[async_trait]
impl ToolSet for WorkItemTools {
    fn name(&self) -> &'static str {
        "work_items"
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        let project = project_description(&self.client);
        let organization = organization_description(&self.client);
        let html_note = "Work item description in HTML format. Multi-line text fields (i.e., System.History, AcceptanceCriteria, etc.) must use HTML format. Do not use CDATA tags.";
        vec![
            tool(
                "list_work_items",
                "List work items in a project",
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
                        "teamId": {
                            "type": "string",
                            "description": "The ID of the team"
                        },
                        "queryId": {
                            "type": "string",
                            "description": "ID of a saved work item query"
                        },
                        "wiql": {
                            "type": "string",
                            "description": "Work Item Query Language (WIQL) query"
                        },
                        "top": {
                            "type": "integer",
                            "description": "Maximum number of work items to return"
                        },
                        "skip": {
                            "type": "integer",
                            "description": "Number of work items to skip"
                        }
                    }
                }),
            ),
            tool(
                "get_work_item",
                "Get details of a specific work item",
                json!({
                    "type": "object",
                    "properties": {
                        "workItemId": {
                            "type": "integer",
                            "description": "The ID of the work item"
                        },
                        "expand": {
                            "type": "string",
                            "enum": ["none", "relations", "fields", "links", "all"],
                            "description": "The level of detail to include in the response. Defaults to \"all\" if not specified."
                        }
                    },
                    "required": ["workItemId"]
                }),
            ),
            tool(
                "create_work_item",
                "Create a new work item",
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
                        "workItemType": {
                            "type": "string",
                            "description": "The type of work item to create (e.g., \"Task\", \"Bug\", \"User Story\")"
                        },
                        "title": {
                            "type": "string",
                            "description": "The title of the work item"
                        },
                        "description": {
                            "type": "string",
                            "description": html_note
                        },
                        "assignedTo": {
                            "type": "string",
                            "description": "The email or name of the user to assign the work item to"
                        },
                        "areaPath": {
                            "type": "string",
                            "description": "The area path for the work item"
                        },
                        "iterationPath": {
                            "type": "string",
                            "description": "The iteration path for the work item"
                        },
                        "priority": {
                            "type": "integer",
                            "description": "The priority of the work item"
                        },
                        "parentId": {
                            "type": "integer",
                            "description": "The ID of the parent work item to create a relationship with"
                        },
                        "additionalFields": {
                            "type": "object",
                            "description": "Additional fields to set on the work item, keyed by field reference name"
                        }
                    },
                    "required": ["workItemType", "title"]
                }),
            ),
            tool(
                "update_work_item",
                "Update an existing work item",
                json!({
                    "type": "object",
                    "properties": {
                        "workItemId": {
                            "type": "integer",
                            "description": "The ID of the work item to update"
                        },
                        "title": {
                            "type": "string",
                            "description": "The updated title of the work item"
                        },
                        "description": {
                            "type": "string",
                            "description": html_note
                        },
                        "assignedTo": {
                            "type": "string",
                            "description": "The email or name of the user to assign the work item to"
                        },
                        "areaPath": {
                            "type": "string",
                            "description": "The updated area path for the work item"
                        },
                        "iterationPath": {
                            "type": "string",
                            "description": "The updated iteration path for the work item"
                        },
                        "priority": {
                            "type": "integer",
                            "description": "The updated priority of the work item"
                        },
                        "state": {
                            "type": "string",
                            "description": "The updated state of the work item"
                        },
                        "additionalFields": {
                            "type": "object",
                            "description": "Additional fields to update on the work item, keyed by field reference name"
                        }
                    },
                    "required": ["workItemId"]
                }),
            ),
            tool(
                "manage_work_item_link",
                "Add or remove links between work items",
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
                        "sourceWorkItemId": {
                            "type": "integer",
                            "description": "The ID of the source work item"
                        },
                        "targetWorkItemId": {
                            "type": "integer",
                            "description": "The ID of the target work item"
                        },
                        "operation": {
                            "type": "string",
                            "enum": ["add", "remove", "update"],
                            "description": "The operation to perform on the link"
                        },
                        "relationType": {
                            "type": "string",
                            "description": "The reference name of the relation type (e.g., \"System.LinkTypes.Hierarchy-Forward\")"
                        },
                        "newRelationType": {
                            "type": "string",
                            "description": "The new relation type to use when updating a link"
                        },
                        "comment": {
                            "type": "string",
                            "description": "Optional comment explaining the link"
                        }
                    },
                    "required": ["sourceWorkItemId", "targetWorkItemId", "operation", "relationType"]
                }),
            ),
        ]
    }

    fn owns(&self, tool: &str) -> bool {
        matches!(
            tool,
            "list_work_items"
                | "get_work_item"
                | "create_work_item"
                | "update_work_item"
                | "manage_work_item_link"
        )
    }

    async fn call(&self, tool: &str, args: Value) -> azdo_core::Result<ToolOutput> {
        match tool {
            "list_work_items" => {
                let args: ListWorkItemsArgs = parse_args(tool, args)?;
                let items = self
                    .client
                    .list_work_items(
                        args.project_id.as_deref(),
                        &ListWorkItemsOptions {
                            team_id: args.team_id,
                            query_id: args.query_id,
                            wiql: args.wiql,
                            top: args.top,
                            skip: args.skip,
                        },
                    )
                    .await?;
                Ok(ToolOutput::Json(Value::Array(items)))
            }
            "get_work_item" => {
                let args: GetWorkItemArgs = parse_args(tool, args)?;
                let item = self
                    .client
                    .get_work_item(args.work_item_id, args.expand.as_deref())
                    .await?;
                Ok(ToolOutput::Json(item))
            }
            "create_work_item" => {
                let args: CreateWorkItemArgs = parse_args(tool, args)?;
                let created = self
                    .client
                    .create_work_item(
                        args.project_id.as_deref(),
                        &CreateWorkItemOptions {
                            work_item_type: args.work_item_type,
                            title: args.title,
                            description: args.description,
                            assigned_to: args.assigned_to,
                            area_path: args.area_path,
                            iteration_path: args.iteration_path,
                            priority: args.priority,
                            parent_id: args.parent_id,
                            additional_fields: args.additional_fields,
                        },
                    )
                    .await?;
                Ok(ToolOutput::Json(created))
            }
            "update_work_item" => {
                let args: UpdateWorkItemArgs = parse_args(tool, args)?;
                let updated = self
                    .client
                    .update_work_item(
                        args.work_item_id,
                        &UpdateWorkItemOptions {
                            title: args.title,
                            description: args.description,
                            assigned_to: args.assigned_to,
                            area_path: args.area_path,
                            iteration_path: args.iteration_path,
                            priority: args.priority,
                            state: args.state,
                            additional_fields: args.additional_fields,
                        },
                    )
                    .await?;
                Ok(ToolOutput::Json(updated))
            }
            "manage_work_item_link" => {
                let args: ManageLinkArgs = parse_args(tool, args)?;
                let operation = match args.operation.as_str() {
                    "add" => LinkOperation::Add,
                    "remove" => LinkOperation::Remove,
                    "update" => {
                        let new_relation_type = args.new_relation_type.ok_or_else(|| {
                            Error::Validation(
                                "newRelationType is required for the update operation".to_string(),
                            )
                        })?;
                        LinkOperation::Update { new_relation_type }
                    }
                    other => {
                        return Err(Error::Validation(format!(
                            "Invalid operation: {}. Valid values are: add, remove, update",
                            other
                        )))
                    }
                };
                let result = self
                    .client
                    .manage_work_item_link(
                        args.project_id.as_deref(),
                        args.source_work_item_id,
                        args.target_work_item_id,
                        &args.relation_type,
                        &operation,
                        args.comment.as_deref(),
                    )
                    .await?;
                Ok(ToolOutput::Json(result))
            }
            other => Err(Error::Validation(format!("Unknown tool: {}", other))),
        }
    }
}
