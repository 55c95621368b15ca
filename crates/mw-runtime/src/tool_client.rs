use anyhow::Result;
use mw_core::{EnvError, JsonAction, Observation, OpResponse, TaskScore};
use serde_json::{json, Value};

use crate::client::EnvClient;
use crate::mcp::McpServersConfig;
use crate::tools::{condense_tool_result, ToolCatalog, ToolDescriptor};

/// What an agent loop drives: a device session that turns actions into observations.
pub trait EnvSession {
    fn client_mut(&mut self) -> &mut EnvClient;
    fn execute_action(&mut self, action: &JsonAction) -> Result<Observation, EnvError>;

    fn initialize_task(&mut self, task_name: &str) -> Result<Observation, EnvError> {
        self.client_mut().initialize_task(task_name)
    }

    fn tear_down_task(&mut self, task_name: &str) -> OpResponse {
        self.client_mut().tear_down_task(task_name)
    }

    fn get_task_score(&mut self, task_name: &str) -> Result<TaskScore, EnvError> {
        self.client_mut().get_task_score(task_name)
    }

    fn get_task_goal(&mut self, task_name: &str) -> Result<String, EnvError> {
        self.client_mut().get_task_goal(task_name)
    }
}

impl EnvSession for EnvClient {
    fn client_mut(&mut self) -> &mut EnvClient {
        self
    }

    fn execute_action(&mut self, action: &JsonAction) -> Result<Observation, EnvError> {
        EnvClient::execute_action(self, action)
    }
}

/// Device session plus an external tool catalog, scoped per task.
///
/// Tool calls are routed through the full catalog; the active subset is what
/// gets advertised to the agent.
pub struct ToolScopedClient {
    client: EnvClient,
    catalog: ToolCatalog,
    active: Vec<ToolDescriptor>,
}

impl ToolScopedClient {
    pub fn new(client: EnvClient, catalog: ToolCatalog) -> Self {
        let active = catalog.tools().to_vec();
        Self {
            client,
            catalog,
            active,
        }
    }

    /// Catalog from every server in `config`.
    pub fn connect(client: EnvClient, config: &McpServersConfig) -> Result<Self> {
        let catalog = ToolCatalog::load(config.providers()?)?;
        tracing::info!(
            servers = config.servers.len(),
            tools = catalog.len(),
            "loaded tool catalog"
        );
        Ok(Self::new(client, catalog))
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// The active tool subset.
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.active
    }

    /// Recomputes the active subset.
    ///
    /// With a task name the filters come from the task's metadata: tasks
    /// without the `agent-mcp` tag get no tools, the others get every tool
    /// whose name matches the provider half of an `<App>-<Provider>` app.
    /// Without a task, `filters` apply directly and `None` keeps the current
    /// subset.
    pub fn reset_tools(
        &mut self,
        filters: Option<&[String]>,
        task_name: Option<&str>,
    ) -> Result<(), EnvError> {
        let mut tool_task = false;
        let derived;
        let filters = match task_name {
            Some(task_name) => {
                let metadata = self.client.get_task_metadata(task_name)?;
                tool_task = metadata.is_tool_augmented();
                derived = if tool_task {
                    provider_filters(&metadata.apps)
                } else {
                    Vec::new()
                };
                tracing::debug!(
                    task = %task_name,
                    tool_task,
                    filters = ?derived,
                    "derived tool filters from task metadata"
                );
                Some(derived.as_slice())
            }
            None => filters,
        };

        if let Some(filters) = filters {
            self.active = self.catalog.filtered(filters);
        }
        if tool_task && self.active.is_empty() {
            let task = task_name.unwrap_or_default();
            tracing::error!(task = %task, "tool task resolved to an empty tool subset");
            return Err(EnvError::Invariant(format!(
                "task {} requires tools but none of {} matched its apps",
                task,
                self.catalog.len()
            )));
        }
        tracing::debug!(
            active = ?self.active.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            "active tool subset"
        );
        Ok(())
    }

    fn call_tool(&mut self, action: &JsonAction) -> Result<Observation, EnvError> {
        let name = action.action_name.as_deref().unwrap_or_default();
        let arguments = action.action_json.clone().unwrap_or_else(|| json!({}));
        tracing::debug!(tool = %name, arguments = %arguments, "calling tool");
        let result: Value = condense_tool_result(self.catalog.call(name, &arguments)?);

        let mut observation = Observation::from_screenshot(self.client.get_screenshot(true)?);
        observation.tool_call = Some(result);
        Ok(observation)
    }
}

impl EnvSession for ToolScopedClient {
    fn client_mut(&mut self) -> &mut EnvClient {
        &mut self.client
    }

    fn execute_action(&mut self, action: &JsonAction) -> Result<Observation, EnvError> {
        if action.is_tool_call() {
            self.call_tool(action)
        } else {
            self.client.execute_action(action)
        }
    }
}

/// `Calendar-Email` contributes `Email`; single-segment app names contribute nothing.
fn provider_filters(apps: &[String]) -> Vec<String> {
    apps.iter()
        .filter(|app| app.contains('-'))
        .filter_map(|app| app.rsplit('-').next())
        .filter(|provider| !provider.is_empty())
        .map(str::to_string)
        .collect()
}
