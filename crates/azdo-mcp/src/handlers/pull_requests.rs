//! Pull request tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use azdo_client::{
    AddCommentOptions, AzureClient, CreatePullRequestOptions, ListPullRequestsOptions,
    UpdatePullRequestOptions,
};
use azdo_core::Error;

use super::{organization_description, parse_args, project_description, tool, ToolOutput, ToolSet};
use crate::protocol::ToolDefinition;

pub struct PullRequestTools {
    client: Arc<AzureClient>,
}

impl PullRequestTools {
    pub fn new(client: Arc<AzureClient>) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePullRequestArgs {
    project_id: Option<String>,
    repository_id: String,
    title: String,
    description: Option<String>,
    source_ref_name: String,
    target_ref_name: String,
    #[serde(default)]
    reviewers: Vec<String>,
    #[serde(default)]
    is_draft: bool,
    #[serde(default)]
    work_item_refs: Vec<i64>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPullRequestsArgs {
    project_id: Option<String>,
    repository_id: String,
    status: Option<String>,
    creator_id: Option<String>,
    reviewer_id: Option<String>,
    source_ref_name: Option<String>,
    target_ref_name: Option<String>,
    top: Option<u32>,
    skip: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetCommentsArgs {
    project_id: Option<String>,
    repository_id: String,
    pull_request_id: i64,
    thread_id: Option<i64>,
    #[serde(default)]
    include_deleted: bool,
    top: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddCommentArgs {
    project_id: Option<String>,
    repository_id: String,
    pull_request_id: i64,
    content: String,
    thread_id: Option<i64>,
    parent_comment_id: Option<i64>,
    file_path: Option<String>,
    line_number: Option<u32>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePullRequestArgs {
    project_id: Option<String>,
    repository_id: String,
    pull_request_id: i64,
    title: Option<String>,
    description: Option<String>,
    status: Option<String>,
    is_draft: Option<bool>,
    #[serde(default)]
    add_work_item_ids: Vec<i64>,
    #[serde(default)]
    remove_work_item_ids: Vec<i64>,
    #[serde(default)]
    add_reviewers: Vec<String>,
    #[serde(default)]
    remove_reviewers: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestIdArgs {
    project_id: Option<String>,
    repository_id: String,
    pull_request_id: i64,
}

#[async_trait]
impl ToolSet for PullRequestTools {
    fn name(&self) -> &'static str {
        "pull_requests"
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        let project = project_description(&self.client);
        let organization = organization_description(&self.client);
        vec![
            tool(
                "create_pull_request",
                "Create a new pull request, including reviewers, linked work items, and optional tags",
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
                        "repositoryId": {
                            "type": "string",
                            "description": "The ID or name of the repository"
                        },
                        "title": {
                            "type": "string",
                            "description": "The title of the pull request"
                        },
                        "description": {
                            "type": "string",
                            "description": "The description of the pull request (markdown is supported)"
                        },
                        "sourceRefName": {
                            "type": "string",
                            "description": "The source branch name (e.g., refs/heads/feature-branch)"
                        },
                        "targetRefName": {
                            "type": "string",
                            "description": "The target branch name (e.g., refs/heads/main)"
                        },
                        "reviewers": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "List of reviewer email addresses or IDs"
                        },
                        "isDraft": {
                            "type": "boolean",
                            "description": "Whether the pull request should be created as a draft"
                        },
                        "workItemRefs": {
                            "type": "array",
                            "items": { "type": "integer" },
                            "description": "List of work item IDs to link to the pull request"
                        },
                        "tags": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "List of tags (labels) to apply to the pull request"
                        }
                    },
                    "required": ["repositoryId", "title", "sourceRefName", "targetRefName"]
                }),
            ),
            tool(
                "list_pull_requests",
                "List pull requests in a repository",
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
                        "repositoryId": {
                            "type": "string",
                            "description": "The ID or name of the repository"
                        },
                        "status": {
                            "type": "string",
                            "enum": ["all", "active", "completed", "abandoned"],
                            "description": "Filter by pull request status"
                        },
                        "creatorId": {
                            "type": "string",
                            "description": "Filter by creator ID (must be a UUID)"
                        },
                        "reviewerId": {
                            "type": "string",
                            "description": "Filter by reviewer ID (must be a UUID)"
                        },
                        "sourceRefName": {
                            "type": "string",
                            "description": "Filter by source branch name"
                        },
                        "targetRefName": {
                            "type": "string",
                            "description": "Filter by target branch name"
                        },
                        "top": {
                            "type": "integer",
                            "description": "Maximum number of pull requests to return (Default: 10)"
                        },
                        "skip": {
                            "type": "integer",
                            "description": "Number of pull requests to skip"
                        }
                    },
                    "required": ["repositoryId"]
                }),
            ),
            tool(
                "get_pull_request_comments",
                "Get comments from a specific pull request",
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
                        "repositoryId": {
                            "type": "string",
                            "description": "The ID or name of the repository"
                        },
                        "pullRequestId": {
                            "type": "integer",
                            "description": "The ID of the pull request"
                        },
                        "threadId": {
                            "type": "integer",
                            "description": "The ID of the specific thread to get comments from"
                        },
                        "includeDeleted": {
                            "type": "boolean",
                            "description": "Whether to include deleted comments"
                        },
                        "top": {
                            "type": "integer",
                            "description": "Maximum number of threads/comments to return"
                        }
                    },
                    "required": ["repositoryId", "pullRequestId"]
                }),
            ),
            tool(
                "add_pull_request_comment",
                "Add a comment to a pull request (reply to existing comments or create new threads)",
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
                        "repositoryId": {
                            "type": "string",
                            "description": "The ID or name of the repository"
                        },
                        "pullRequestId": {
                            "type": "integer",
                            "description": "The ID of the pull request"
                        },
                        "content": {
                            "type": "string",
                            "description": "The content of the comment in markdown"
                        },
                        "threadId": {
                            "type": "integer",
                            "description": "The ID of the thread to add the comment to"
                        },
                        "parentCommentId": {
                            "type": "integer",
                            "description": "ID of the parent comment when replying to an existing comment"
                        },
                        "filePath": {
                            "type": "string",
                            "description": "The path of the file to comment on (for new thread on file)"
                        },
                        "lineNumber": {
                            "type": "integer",
                            "description": "The line number to comment on (for new thread on file)"
                        },
                        "status": {
                            "type": "string",
                            "enum": ["active", "fixed", "wontFix", "closed", "pending"],
                            "description": "The status to set for a new thread"
                        }
                    },
                    "required": ["repositoryId", "pullRequestId", "content"]
                }),
            ),
            tool(
                "update_pull_request",
                "Update an existing pull request with new properties, and manage reviewers and work item links",
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
                        "repositoryId": {
                            "type": "string",
                            "description": "The ID or name of the repository"
                        },
                        "pullRequestId": {
                            "type": "integer",
                            "description": "The ID of the pull request to update"
                        },
                        "title": {
                            "type": "string",
                            "description": "The updated title of the pull request"
                        },
                        "description": {
                            "type": "string",
                            "description": "The updated description of the pull request"
                        },
                        "status": {
                            "type": "string",
                            "enum": ["active", "abandoned", "completed"],
                            "description": "The updated status of the pull request"
                        },
                        "isDraft": {
                            "type": "boolean",
                            "description": "Whether the pull request should be marked as a draft (true) or unmarked (false)"
                        },
                        "addWorkItemIds": {
                            "type": "array",
                            "items": { "type": "integer" },
                            "description": "List of work item IDs to link to the pull request"
                        },
                        "removeWorkItemIds": {
                            "type": "array",
                            "items": { "type": "integer" },
                            "description": "List of work item IDs to unlink from the pull request"
                        },
                        "addReviewers": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "List of reviewer email addresses or IDs to add"
                        },
                        "removeReviewers": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "List of reviewer email addresses or IDs to remove"
                        }
                    },
                    "required": ["repositoryId", "pullRequestId"]
                }),
            ),
            tool(
                "get_pull_request_changes",
                "Get the files changed in a pull request, their unified diffs, source/target branch names, and the status of policy evaluations",
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
                        "repositoryId": {
                            "type": "string",
                            "description": "The ID or name of the repository"
                        },
                        "pullRequestId": {
                            "type": "integer",
                            "description": "The ID of the pull request"
                        }
                    },
                    "required": ["repositoryId", "pullRequestId"]
                }),
            ),
            tool(
                "get_pull_request_checks",
                "Summarize the latest status checks and policy evaluations for a pull request.\n- Surfaces pipeline and run identifiers so you can jump straight to the blocking validation.\n- Pair with pipeline tools (e.g., get_pipeline_run, pipeline_timeline) to inspect failures in depth.",
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
                        "repositoryId": {
                            "type": "string",
                            "description": "The ID or name of the repository"
                        },
                        "pullRequestId": {
                            "type": "integer",
                            "description": "The ID of the pull request"
                        }
                    },
                    "required": ["repositoryId", "pullRequestId"]
                }),
            ),
        ]
    }

    fn owns(&self, tool: &str) -> bool {
        matches!(
            tool,
            "create_pull_request"
                | "list_pull_requests"
                | "get_pull_request_comments"
                | "add_pull_request_comment"
                | "update_pull_request"
                | "get_pull_request_changes"
                | "get_pull_request_checks"
        )
    }

    async fn call(&self, tool: &str, args: Value) -> azdo_core::Result<ToolOutput> {
        match tool {
            "create_pull_request" => {
                let args: CreatePullRequestArgs = parse_args(tool, args)?;
                let created = self
                    .client
                    .create_pull_request(
                        args.project_id.as_deref(),
                        &args.repository_id,
                        &CreatePullRequestOptions {
                            title: args.title,
                            description: args.description,
                            source_ref_name: args.source_ref_name,
                            target_ref_name: args.target_ref_name,
                            reviewers: args.reviewers,
                            is_draft: args.is_draft,
                            work_item_ids: args.work_item_refs,
                            tags: args.tags,
                        },
                    )
                    .await?;
                Ok(ToolOutput::Json(created))
            }
            "list_pull_requests" => {
                let args: ListPullRequestsArgs = parse_args(tool, args)?;
                let status = args.status.as_deref().map(str::parse).transpose()?;
                let listed = self
                    .client
                    .list_pull_requests(
                        args.project_id.as_deref(),
                        &args.repository_id,
                        &ListPullRequestsOptions {
                            status,
                            creator_id: args.creator_id,
                            reviewer_id: args.reviewer_id,
                            source_ref_name: args.source_ref_name,
                            target_ref_name: args.target_ref_name,
                            top: args.top,
                            skip: args.skip,
                        },
                    )
                    .await?;
                Ok(ToolOutput::Json(listed))
            }
            "get_pull_request_comments" => {
                let args: GetCommentsArgs = parse_args(tool, args)?;
                let comments = self
                    .client
                    .get_pull_request_comments(
                        args.project_id.as_deref(),
                        &args.repository_id,
                        args.pull_request_id,
                        args.thread_id,
                        args.include_deleted,
                        args.top,
                    )
                    .await?;
                Ok(ToolOutput::Json(Value::Array(comments)))
            }
            "add_pull_request_comment" => {
                let args: AddCommentArgs = parse_args(tool, args)?;
                if args.thread_id.is_none() && args.status.is_none() {
                    return Err(Error::Validation(
                        "Status is required when creating a new thread".to_string(),
                    ));
                }
                let status = args.status.as_deref().map(str::parse).transpose()?;
                let added = self
                    .client
                    .add_pull_request_comment(
                        args.project_id.as_deref(),
                        &args.repository_id,
                        args.pull_request_id,
                        &AddCommentOptions {
                            content: args.content,
                            thread_id: args.thread_id,
                            parent_comment_id: args.parent_comment_id,
                            file_path: args.file_path,
                            line_number: args.line_number,
                            status,
                        },
                    )
                    .await?;
                Ok(ToolOutput::Json(added))
            }
            "update_pull_request" => {
                let args: UpdatePullRequestArgs = parse_args(tool, args)?;
                let status = args.status.as_deref().map(str::parse).transpose()?;
                let updated = self
                    .client
                    .update_pull_request(
                        args.project_id.as_deref(),
                        &args.repository_id,
                        args.pull_request_id,
                        &UpdatePullRequestOptions {
                            title: args.title,
                            description: args.description,
                            status,
                            is_draft: args.is_draft,
                            add_work_item_ids: args.add_work_item_ids,
                            remove_work_item_ids: args.remove_work_item_ids,
                            add_reviewers: args.add_reviewers,
                            remove_reviewers: args.remove_reviewers,
                        },
                    )
                    .await?;
                Ok(ToolOutput::Json(updated))
            }
            "get_pull_request_changes" => {
                let args: PullRequestIdArgs = parse_args(tool, args)?;
                let changes = self
                    .client
                    .get_pull_request_changes(
                        args.project_id.as_deref(),
                        &args.repository_id,
                        args.pull_request_id,
                    )
                    .await?;
                Ok(ToolOutput::Json(changes))
            }
            "get_pull_request_checks" => {
                let args: PullRequestIdArgs = parse_args(tool, args)?;
                let checks = self
                    .client
                    .get_pull_request_checks(
                        args.project_id.as_deref(),
                        &args.repository_id,
                        args.pull_request_id,
                    )
                    .await?;
                Ok(ToolOutput::Json(checks))
            }
            other => Err(Error::Validation(format!("Unknown tool: {}", other))),
        }
    }
}
