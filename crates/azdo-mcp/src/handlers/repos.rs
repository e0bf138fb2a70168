//! Repository tools: listing, file content, tree views, branches, commits.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use azdo_client::repos::format_repository_tree;
use azdo_client::{
    AzureClient, CreateCommitOptions, FileChange, GetFileOptions, RepositoryDetailsOptions,
    RepositoryTreeOptions,
};
use azdo_core::Error;

use super::{organization_description, parse_args, project_description, tool, ToolOutput, ToolSet};
use crate::protocol::ToolDefinition;

pub struct RepoTools {
    client: Arc<AzureClient>,
}

impl RepoTools {
    pub fn new(client: Arc<AzureClient>) -> Self {
        Self { client }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListRepositoriesArgs {
    project_id: Option<String>,
    #[serde(default)]
    include_links: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetRepositoryArgs {
    project_id: Option<String>,
    repository_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetRepositoryDetailsArgs {
    project_id: Option<String>,
    repository_id: String,
    #[serde(default)]
    include_statistics: bool,
    #[serde(default)]
    include_refs: bool,
    ref_filter: Option<String>,
    branch_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetFileContentArgs {
    project_id: Option<String>,
    repository_id: String,
    path: Option<String>,
    version: Option<String>,
    version_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryTreeArgs {
    project_id: Option<String>,
    repository_id: String,
    path: Option<String>,
    depth: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllRepositoriesTreeArgs {
    project_id: Option<String>,
    repository_pattern: Option<String>,
    depth: Option<usize>,
    pattern: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBranchArgs {
    project_id: Option<String>,
    repository_id: String,
    source_branch: String,
    new_branch: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCommitArgs {
    project_id: Option<String>,
    repository_id: String,
    branch_name: String,
    commit_message: String,
    changes: Vec<CommitChangeArgs>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitChangeArgs {
    path: String,
    content: Option<String>,
    search: Option<String>,
    replace: Option<String>,
    #[serde(default)]
    delete: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListCommitsArgs {
    project_id: Option<String>,
    repository_id: String,
    branch_name: String,
    top: Option<u32>,
    skip: Option<u32>,
}

#[async_trait]
impl ToolSet for RepoTools {
    fn name(&self) -> &'static str {
        "repositories"
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        let project = project_description(&self.client);
        let organization = organization_description(&self.client);
        vec![
            tool(
                "get_repository",
                "Get details of a specific repository",
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
                        }
                    },
                    "required": ["repositoryId"]
                }),
            ),
            tool(
                "get_repository_details",
                "Get detailed information about a repository including statistics and refs",
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
                        "includeStatistics": {
                            "type": "boolean",
                            "description": "Whether to include branch statistics",
                            "default": false
                        },
                        "includeRefs": {
                            "type": "boolean",
                            "description": "Whether to include repository refs",
                            "default": false
                        },
                        "refFilter": {
                            "type": "string",
                            "description": "Optional filter for refs (e.g., \"heads/\" or \"tags/\")"
                        },
                        "branchName": {
                            "type": "string",
                            "description": "Name of specific branch to get statistics for (if includeStatistics is true)"
                        }
                    },
                    "required": ["repositoryId"]
                }),
            ),
            tool(
                "list_repositories",
                "List repositories in a project",
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
                        "includeLinks": {
                            "type": "boolean",
                            "description": "Whether to include reference links"
                        }
                    }
                }),
            ),
            tool(
                "get_file_content",
                "Get content of a file or directory from a repository",
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
                        "path": {
                            "type": "string",
                            "description": "Path to the file or folder",
                            "default": "/"
                        },
                        "version": {
                            "type": "string",
                            "description": "The version (branch, tag, or commit) to get content from"
                        },
                        "versionType": {
                            "type": "string",
                            "enum": ["branch", "commit", "tag"],
                            "description": "Type of version specified (branch, commit, or tag)"
                        }
                    },
                    "required": ["repositoryId"]
                }),
            ),
            tool(
                "get_all_repositories_tree",
                "Displays a hierarchical tree view of files and directories across multiple Azure DevOps repositories within a project, based on their default branches",
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
                        "repositoryPattern": {
                            "type": "string",
                            "description": "Repository name pattern (wildcard characters allowed) to filter which repositories are included"
                        },
                        "depth": {
                            "type": "integer",
                            "minimum": 0,
                            "maximum": 10,
                            "description": "Maximum depth to traverse within each repository (0 = unlimited)",
                            "default": 0
                        },
                        "pattern": {
                            "type": "string",
                            "description": "File pattern (wildcard characters allowed) to filter files by within each repository"
                        }
                    }
                }),
            ),
            tool(
                "get_repository_tree",
                "Displays a hierarchical tree view of files and directories within a single repository starting from an optional path",
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
                        "path": {
                            "type": "string",
                            "description": "Path within the repository to start from",
                            "default": "/"
                        },
                        "depth": {
                            "type": "integer",
                            "minimum": 0,
                            "maximum": 10,
                            "description": "Maximum depth to traverse (0 = unlimited)",
                            "default": 0
                        }
                    },
                    "required": ["repositoryId"]
                }),
            ),
            tool(
                "create_branch",
                "Create a new branch from an existing one",
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
                        "sourceBranch": {
                            "type": "string",
                            "description": "Name of the branch to copy from (without \"refs/heads/\", e.g., \"master\")"
                        },
                        "newBranch": {
                            "type": "string",
                            "description": "Name of the new branch to create (without \"refs/heads/\", e.g., \"feature/my-branch\")"
                        }
                    },
                    "required": ["repositoryId", "sourceBranch", "newBranch"]
                }),
            ),
            tool(
                "create_commit",
                "Create a commit on a branch from a list of file changes. Each change adds a new file or rewrites an existing one (content), applies an exact search/replace edit to the current file content, or deletes the file. Provide plain branch names (no \"refs/heads/\").",
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
                        "branchName": {
                            "type": "string",
                            "description": "The branch to commit to (without \"refs/heads/\")"
                        },
                        "commitMessage": {
                            "type": "string",
                            "description": "Commit message"
                        },
                        "changes": {
                            "type": "array",
                            "description": "File changes making up the commit",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "path": {
                                        "type": "string",
                                        "description": "File path within the repository"
                                    },
                                    "content": {
                                        "type": "string",
                                        "description": "Full content for a new file or a complete rewrite of an existing one"
                                    },
                                    "search": {
                                        "type": "string",
                                        "description": "Exact text to find in the current file content (used with replace)"
                                    },
                                    "replace": {
                                        "type": "string",
                                        "description": "Replacement for the first occurrence of the search text"
                                    },
                                    "delete": {
                                        "type": "boolean",
                                        "description": "Delete the file instead of changing it"
                                    }
                                },
                                "required": ["path"]
                            }
                        }
                    },
                    "required": ["repositoryId", "branchName", "commitMessage", "changes"]
                }),
            ),
            tool(
                "list_commits",
                "List recent commits on a branch including file-level diff content for each commit",
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
                        "branchName": {
                            "type": "string",
                            "description": "Branch name to list commits from"
                        },
                        "top": {
                            "type": "integer",
                            "minimum": 1,
                            "maximum": 100,
                            "description": "Maximum number of commits to return (Default: 10)"
                        },
                        "skip": {
                            "type": "integer",
                            "minimum": 0,
                            "description": "Number of commits to skip from the newest"
                        }
                    },
                    "required": ["repositoryId", "branchName"]
                }),
            ),
        ]
    }

    fn owns(&self, tool: &str) -> bool {
        matches!(
            tool,
            "get_repository"
                | "get_repository_details"
                | "list_repositories"
                | "get_file_content"
                | "get_all_repositories_tree"
                | "get_repository_tree"
                | "create_branch"
                | "create_commit"
                | "list_commits"
        )
    }

    async fn call(&self, tool: &str, args: Value) -> azdo_core::Result<ToolOutput> {
        match tool {
            "get_repository" => {
                let args: GetRepositoryArgs = parse_args(tool, args)?;
                let repo = self
                    .client
                    .get_repository(args.project_id.as_deref(), &args.repository_id)
                    .await?;
                Ok(ToolOutput::Json(repo))
            }
            "get_repository_details" => {
                let args: GetRepositoryDetailsArgs = parse_args(tool, args)?;
                let details = self
                    .client
                    .get_repository_details(
                        args.project_id.as_deref(),
                        &args.repository_id,
                        &RepositoryDetailsOptions {
                            include_statistics: args.include_statistics,
                            include_refs: args.include_refs,
                            ref_filter: args.ref_filter,
                            branch_name: args.branch_name,
                        },
                    )
                    .await?;
                Ok(ToolOutput::Json(details))
            }
            "list_repositories" => {
                let args: ListRepositoriesArgs = parse_args(tool, args)?;
                let repos = self
                    .client
                    .list_repositories(args.project_id.as_deref(), args.include_links)
                    .await?;
                Ok(ToolOutput::Json(Value::Array(repos)))
            }
            "get_file_content" => {
                let args: GetFileContentArgs = parse_args(tool, args)?;
                let version_type = args.version_type.as_deref().map(str::parse).transpose()?;
                let content = self
                    .client
                    .get_file_content(
                        args.project_id.as_deref(),
                        &args.repository_id,
                        args.path.as_deref().unwrap_or("/"),
                        &GetFileOptions {
                            version: args.version,
                            version_type,
                        },
                    )
                    .await?;
                Ok(ToolOutput::Json(content))
            }
            "get_all_repositories_tree" => {
                let args: AllRepositoriesTreeArgs = parse_args(tool, args)?;
                let trees = self
                    .client
                    .get_all_repositories_tree(
                        args.project_id.as_deref(),
                        args.repository_pattern.as_deref(),
                        args.depth.unwrap_or(0),
                        args.pattern.as_deref(),
                    )
                    .await?;
                let sections: Vec<String> = trees.iter().map(format_repository_tree).collect();
                Ok(ToolOutput::Text(sections.join("\n")))
            }
            "get_repository_tree" => {
                let args: RepositoryTreeArgs = parse_args(tool, args)?;
                let tree = self
                    .client
                    .get_repository_tree(
                        args.project_id.as_deref(),
                        &args.repository_id,
                        &RepositoryTreeOptions {
                            path: args.path.unwrap_or_else(|| "/".to_string()),
                            depth: args.depth.unwrap_or(0),
                        },
                    )
                    .await?;
                Ok(ToolOutput::Text(format_repository_tree(&tree)))
            }
            "create_branch" => {
                let args: CreateBranchArgs = parse_args(tool, args)?;
                let branch = self
                    .client
                    .create_branch(
                        args.project_id.as_deref(),
                        &args.repository_id,
                        &args.source_branch,
                        &args.new_branch,
                    )
                    .await?;
                Ok(ToolOutput::Json(branch))
            }
            "create_commit" => {
                let args: CreateCommitArgs = parse_args(tool, args)?;
                let changes = args
                    .changes
                    .into_iter()
                    .map(|change| FileChange {
                        path: change.path,
                        content: change.content,
                        search: change.search,
                        replace: change.replace,
                        delete: change.delete,
                    })
                    .collect();
                let commit = self
                    .client
                    .create_commit(
                        args.project_id.as_deref(),
                        &CreateCommitOptions {
                            repository_id: args.repository_id,
                            branch_name: args.branch_name,
                            commit_message: args.commit_message,
                            changes,
                        },
                    )
                    .await?;
                Ok(ToolOutput::Json(commit))
            }
            "list_commits" => {
                let args: ListCommitsArgs = parse_args(tool, args)?;
                let commits = self
                    .client
                    .list_commits(
                        args.project_id.as_deref(),
                        &args.repository_id,
                        &args.branch_name,
                        args.top,
                        args.skip,
                    )
                    .await?;
                Ok(ToolOutput::Json(Value::Array(commits)))
            }
            other => Err(Error::Validation(format!("Unknown tool: {}", other))),
        }
    }
}
