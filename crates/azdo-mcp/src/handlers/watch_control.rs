//! Test watcher control tools.

use async_trait::async_trait;
use serde_json::{json, Value};

use azdo_core::Error;
use azdo_watch::{ConfigureRequest, WatchContext};

use super::{parse_args, tool, ToolOutput, ToolSet};
use crate::protocol::ToolDefinition;

pub struct WatchControlTools {
    watch: WatchContext,
}

impl WatchControlTools {
    pub fn new(watch: WatchContext) -> Self {
        Self { watch }
    }
}

#[async_trait]
impl ToolSet for WatchControlTools {
    fn name(&self) -> &'static str {
        "watch_control"
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            tool(
                "test_watch_status",
                "Get the status of the background test watcher: latest pass/fail verdict, summary text, and the active configuration",
                json!({
                    "type": "object",
                    "properties": {}
                }),
            ),
            tool(
                "test_watch_configure",
                "Reconfigure the background test watcher. Unset fields keep their current values.",
                json!({
                    "type": "object",
                    "properties": {
                        "enabled": {
                            "type": "boolean",
                            "description": "Start or stop the watcher subprocess"
                        },
                        "command": {
                            "type": "string",
                            "description": "Override the watch command; an empty string clears the override"
                        },
                        "report": {
                            "type": "string",
                            "enum": ["changed", "always", "off"],
                            "description": "When to append watcher status to tool results"
                        },
                        "debug": {
                            "type": "boolean",
                            "description": "Log the parsed watcher output at debug level"
                        },
                        "notify": {
                            "type": "boolean",
                            "description": "Send an MCP log notification when the pass/fail status changes"
                        },
                        "reset": {
                            "type": "boolean",
                            "description": "Clear the command override and reporting deduplication state"
                        }
                    }
                }),
            ),
        ]
    }

    fn owns(&self, tool: &str) -> bool {
        matches!(tool, "test_watch_status" | "test_watch_configure")
    }

    async fn call(&self, tool: &str, args: Value) -> azdo_core::Result<ToolOutput> {
        match tool {
            "test_watch_status" => {
                let snapshot = self.watch.snapshot().await;
                Ok(ToolOutput::Json(serde_json::to_value(snapshot)?))
            }
            "test_watch_configure" => {
                let request: ConfigureRequest = parse_args(tool, args)?;
                let snapshot = self.watch.configure(request).await;
                Ok(ToolOutput::Json(serde_json::to_value(snapshot)?))
            }
            other => Err(Error::Validation(format!("Unknown tool: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use azdo_watch::WatchConfig;

    fn idle_tools() -> WatchControlTools {
        // enabled: false keeps the subprocess from spawning in tests.
        WatchControlTools::new(WatchContext::new(WatchConfig {
            enabled: false,
            ..WatchConfig::default()
        }))
    }

    #[test]
    fn test_definitions_list_both_tools() {
        let tools = idle_tools();

        let defs = tools.definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "test_watch_status");
        assert_eq!(
            defs[1].input_schema["properties"]["report"]["enum"],
            json!(["changed", "always", "off"])
        );
    }

    #[tokio::test]
    async fn test_status_reports_idle_watcher() {
        let tools = idle_tools();

        let output = tools.call("test_watch_status", json!({})).await.unwrap();

        match output {
            ToolOutput::Json(snapshot) => {
                assert_eq!(snapshot["enabled"], false);
                assert_eq!(snapshot["running"], false);
                assert_eq!(snapshot["status"], "UNKNOWN");
            }
            other => panic!("expected JSON output, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_configure_updates_reporting() {
        let tools = idle_tools();

        let output = tools
            .call(
                "test_watch_configure",
                json!({"report": "always", "notify": true}),
            )
            .await
            .unwrap();

        match output {
            ToolOutput::Json(snapshot) => {
                assert_eq!(snapshot["report"], "always");
                assert_eq!(snapshot["notify"], true);
                assert_eq!(snapshot["enabled"], false);
            }
            other => panic!("expected JSON output, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_configure_rejects_unknown_report_mode() {
        let tools = idle_tools();

        let err = tools
            .call("test_watch_configure", json!({"report": "sometimes"}))
            .await
            .unwrap_err();

        let message = err.user_message();
        assert!(
            message.starts_with("Validation Error: Invalid arguments for test_watch_configure"),
            "unexpected message: {}",
            message
        );
    }
}
