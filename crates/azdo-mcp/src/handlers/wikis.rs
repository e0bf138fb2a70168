//! Wiki tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use azdo_client::{AzureClient, CreateWikiOptions, WikiPageContent};
use azdo_core::enums::WikiType;
use azdo_core::Error;

use super::{organization_description, parse_args, project_description, tool, ToolOutput, ToolSet};
use crate::protocol::ToolDefinition;

pub struct WikiTools {
    client: Arc<AzureClient>,
}

impl WikiTools {
    pub fn new(client: Arc<AzureClient>) -> Self {
        Self { client }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetWikisArgs {
    project_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetWikiPageArgs {
    project_id: Option<String>,
    wiki_id: String,
    page_path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListWikiPagesArgs {
    project_id: Option<String>,
    wiki_id: String,
    top: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateWikiArgs {
    project_id: Option<String>,
    name: String,
    r#type: Option<String>,
    repository_id: Option<String>,
    mapped_path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateWikiPageArgs {
    project_id: Option<String>,
    wiki_id: String,
    page_path: Option<String>,
    content: String,
    comment: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateWikiPageArgs {
    project_id: Option<String>,
    wiki_id: String,
    page_path: String,
    content: String,
    comment: Option<String>,
}

#[async_trait]
impl ToolSet for WikiTools {
    fn name(&self) -> &'static str {
        "wikis"
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        let project = project_description(&self.client);
        let organization = organization_description(&self.client);
        vec![
            tool(
                "get_wikis",
                "Get details of wikis in a project",
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
                "get_wiki_page",
                "Get the content of a wiki page",
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
                        "wikiId": {
                            "type": "string",
                            "description": "The ID or name of the wiki"
                        },
                        "pagePath": {
                            "type": "string",
                            "description": "The path of the page within the wiki"
                        }
                    },
                    "required": ["wikiId", "pagePath"]
                }),
            ),
            tool(
                "list_wiki_pages",
                "List wiki pages from a wiki",
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
                        "wikiId": {
                            "type": "string",
                            "description": "The ID or name of the wiki"
                        },
                        "top": {
                            "type": "integer",
                            "description": "Maximum number of pages to return"
                        }
                    },
                    "required": ["wikiId"]
                }),
            ),
            tool(
                "create_wiki",
                "Create a new wiki in the project",
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
                        "name": {
                            "type": "string",
                            "description": "The name of the new wiki"
                        },
                        "type": {
                            "type": "string",
                            "enum": ["projectWiki", "codeWiki"],
                            "description": "Type of wiki to create (Default: projectWiki)"
                        },
                        "repositoryId": {
                            "type": "string",
                            "description": "The ID of the repository to publish as a code wiki (required for codeWiki)"
                        },
                        "mappedPath": {
                            "type": "string",
                            "description": "Folder of the repository that holds the wiki content (codeWiki only, e.g. /docs)"
                        }
                    },
                    "required": ["name"]
                }),
            ),
            tool(
                "create_wiki_page",
                "Create a new wiki page",
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
                        "wikiId": {
                            "type": "string",
                            "description": "The ID or name of the wiki"
                        },
                        "pagePath": {
                            "type": "string",
                            "description": "Path of the wiki page to create. If the path does not exist, it will be created. Defaults to the wiki root (/). Example: /ParentPage/NewPage"
                        },
                        "content": {
                            "type": "string",
                            "description": "The content for the new wiki page in markdown format"
                        },
                        "comment": {
                            "type": "string",
                            "description": "Optional comment for the creation or update"
                        }
                    },
                    "required": ["wikiId", "content"]
                }),
            ),
            tool(
                "update_wiki_page",
                "Update content of a wiki page",
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
                        "wikiId": {
                            "type": "string",
                            "description": "The ID or name of the wiki"
                        },
                        "pagePath": {
                            "type": "string",
                            "description": "The path of the page within the wiki"
                        },
                        "content": {
                            "type": "string",
                            "description": "The new content for the wiki page in markdown format"
                        },
                        "comment": {
                            "type": "string",
                            "description": "Optional comment for the update"
                        }
                    },
                    "required": ["wikiId", "pagePath", "content"]
                }),
            ),
        ]
    }

    fn owns(&self, tool: &str) -> bool {
        matches!(
            tool,
            "get_wikis"
                | "get_wiki_page"
                | "list_wiki_pages"
                | "create_wiki"
                | "create_wiki_page"
                | "update_wiki_page"
        )
    }

    async fn call(&self, tool: &str, args: Value) -> azdo_core::Result<ToolOutput> {
        match tool {
            "get_wikis" => {
                let args: GetWikisArgs = parse_args(tool, args)?;
                let wikis = self.client.get_wikis(args.project_id.as_deref()).await?;
                Ok(ToolOutput::Json(Value::Array(wikis)))
            }
            "get_wiki_page" => {
                let args: GetWikiPageArgs = parse_args(tool, args)?;
                let content = self
                    .client
                    .get_wiki_page(args.project_id.as_deref(), &args.wiki_id, &args.page_path)
                    .await?;
                Ok(ToolOutput::Text(content))
            }
            "list_wiki_pages" => {
                let args: ListWikiPagesArgs = parse_args(tool, args)?;
                let pages = self
                    .client
                    .list_wiki_pages(args.project_id.as_deref(), &args.wiki_id, args.top)
                    .await?;
                Ok(ToolOutput::Json(Value::Array(pages)))
            }
            "create_wiki" => {
                let args: CreateWikiArgs = parse_args(tool, args)?;
                let wiki_type = args
                    .r#type
                    .as_deref()
                    .map(str::parse)
                    .transpose()?
                    .unwrap_or(WikiType::ProjectWiki);
                let wiki = self
                    .client
                    .create_wiki(
                        args.project_id.as_deref(),
                        &CreateWikiOptions {
                            name: args.name,
                            wiki_type,
                            repository_id: args.repository_id,
                            mapped_path: args.mapped_path,
                            version: None,
                        },
                    )
                    .await?;
                Ok(ToolOutput::Json(wiki))
            }
            "create_wiki_page" => {
                let args: CreateWikiPageArgs = parse_args(tool, args)?;
                let page_path = args.page_path.as_deref().unwrap_or("/");
                let page = self
                    .client
                    .create_wiki_page(
                        args.project_id.as_deref(),
                        &args.wiki_id,
                        page_path,
                        &WikiPageContent {
                            content: args.content,
                            comment: args.comment,
                        },
                    )
                    .await?;
                Ok(ToolOutput::Json(page))
            }
            "update_wiki_page" => {
                let args: UpdateWikiPageArgs = parse_args(tool, args)?;
                let page = self
                    .client
                    .update_wiki_page(
                        args.project_id.as_deref(),
                        &args.wiki_id,
                        &args.page_path,
                        &WikiPageContent {
                            content: args.content,
                            comment: args.comment,
                        },
                    )
                    .await?;
                Ok(ToolOutput::Json(page))
            }
            other => Err(Error::Validation(format!("Unknown tool: {}", other))),
        }
    }
}
