//! Tools for the authenticated identity: profile and organization list.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use azdo_client::AzureClient;
use azdo_core::Error;

use super::{tool, ToolOutput, ToolSet};
use crate::protocol::ToolDefinition;

pub struct IdentityTools {
    client: Arc<AzureClient>,
}

impl IdentityTools {
    pub fn new(client: Arc<AzureClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolSet for IdentityTools {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            tool(
                "get_me",
                "Get details of the authenticated user (id, displayName, email)",
                json!({
                    "type": "object",
                    "properties": {}
                }),
            ),
            tool(
                "list_organizations",
                "List all Azure DevOps organizations accessible to the current authentication",
                json!({
                    "type": "object",
                    "properties": {}
                }),
            ),
        ]
    }

    fn owns(&self, tool: &str) -> bool {
        matches!(tool, "get_me" | "list_organizations")
    }

    async fn call(&self, tool: &str, _args: Value) -> azdo_core::Result<ToolOutput> {
        match tool {
            "get_me" => {
                let profile = self.client.get_me().await?;
                Ok(ToolOutput::Json(serde_json::to_value(profile)?))
            }
            "list_organizations" => {
                let organizations = self.client.list_organizations().await?;
                Ok(ToolOutput::Json(serde_json::to_value(organizations)?))
            }
            other => Err(Error::Validation(format!("Unknown tool: {}", other))),
        }
    }
}
