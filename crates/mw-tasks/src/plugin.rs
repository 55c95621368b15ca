use mw_core::{TaskInfo, TaskScore};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::controller::DeviceController;

/// Static description every task carries: what to do and which apps it touches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskProfile {
    pub goal: Option<String>,
    pub tags: BTreeSet<String>,
    pub app_names: BTreeSet<String>,
}

impl TaskProfile {
    pub fn new(goal: &str, tags: &[&str], app_names: &[&str]) -> Self {
        Self {
            goal: Some(goal.to_string()),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            app_names: app_names.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn to_info(&self, name: &str) -> TaskInfo {
        TaskInfo {
            name: name.to_string(),
            goal: self.goal.clone().filter(|g| !g.trim().is_empty()),
            tags: self.tags.iter().cloned().collect(),
            app_names: self.app_names.iter().cloned().collect(),
        }
    }
}

/// What a task's initialization hook hands back to the episode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSetup {
    /// Extra context revealed to an agent that asks the user for help.
    pub relevant_information: Option<String>,
}

/// The capability every registered task implements.
///
/// Implementations are shared read-only through the registry, so per-episode
/// state belongs in [`TaskSetup`] or on the device, never in `self`.
pub trait TaskPlugin: Send + Sync {
    fn profile(&self) -> &TaskProfile;

    fn initialize_task_hook(
        &self,
        controller: &mut dyn DeviceController,
    ) -> anyhow::Result<TaskSetup>;

    fn is_successful(&self, controller: &dyn DeviceController) -> anyhow::Result<TaskScore>;
}

/// A compiled-in task type that can be built without external state.
pub trait TaskDefinition: TaskPlugin + Sized + 'static {
    fn instantiate() -> anyhow::Result<Self>;
}

/// Registry name for a compiled-in task: the bare type identifier.
pub fn type_task_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[derive(Debug, thiserror::Error)]
pub enum TaskRunError {
    #[error("task '{task}' was not initialized before evaluation")]
    NotInitialized { task: String },
    #[error("initialization hook for task '{task}' failed: {source}")]
    Hook {
        task: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("evaluation of task '{task}' failed: {source}")]
    Evaluation {
        task: String,
        #[source]
        source: anyhow::Error,
    },
}

/// One episode of a registered task: initialize once, then evaluate.
pub struct TaskRun {
    name: String,
    plugin: Arc<dyn TaskPlugin>,
    setup: Option<TaskSetup>,
}

impl TaskRun {
    pub fn new(name: impl Into<String>, plugin: Arc<dyn TaskPlugin>) -> Self {
        Self {
            name: name.into(),
            plugin,
            setup: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_initialized(&self) -> bool {
        self.setup.is_some()
    }

    pub fn relevant_information(&self) -> Option<&str> {
        self.setup
            .as_ref()
            .and_then(|s| s.relevant_information.as_deref())
    }

    pub fn initialize(
        &mut self,
        controller: &mut dyn DeviceController,
    ) -> Result<&TaskSetup, TaskRunError> {
        let setup = self
            .plugin
            .initialize_task_hook(controller)
            .map_err(|source| TaskRunError::Hook {
                task: self.name.clone(),
                source,
            })?;
        tracing::debug!(task = %self.name, "task initialized");
        Ok(self.setup.insert(setup))
    }

    pub fn evaluate(&self, controller: &dyn DeviceController) -> Result<TaskScore, TaskRunError> {
        if self.setup.is_none() {
            return Err(TaskRunError::NotInitialized {
                task: self.name.clone(),
            });
        }
        self.plugin
            .is_successful(controller)
            .map_err(|source| TaskRunError::Evaluation {
                task: self.name.clone(),
                source,
            })
    }
}
