pub mod client;
pub mod config;
pub mod mcp;
pub mod protocol;
pub mod results;
pub mod tool_client;
pub mod tools;

#[cfg(test)]
mod testing;

pub use client::EnvClient;
pub use config::{ClientConfig, RetrySettings, TimeoutSettings};
pub use mcp::{HttpMcpProvider, McpServerEntry, McpServersConfig};
pub use protocol::{EnvProtocol, HttpEnvProtocol, SwitchResult, TaskSummary};
pub use results::{scan_finished_results, scan_finished_tasks, summarize, ResultSummary, TaskResult};
pub use tool_client::{EnvSession, ToolScopedClient};
pub use tools::{ToolCatalog, ToolDescriptor, ToolParameter, ToolProvider};
