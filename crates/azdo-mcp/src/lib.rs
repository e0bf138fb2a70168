//! MCP (Model Context Protocol) server for azdo-tools.
//!
//! This crate speaks JSON-RPC 2.0 over newline-delimited stdio and exposes
//! the Azure DevOps client plus the background test watcher as MCP tools.

pub mod handlers;
pub mod protocol;
pub mod server;
pub mod transport;

pub use handlers::{ToolHandler, ToolSet};
pub use server::McpServer;
