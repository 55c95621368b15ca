use mw_core::{EnvError, LookupKind, SuiteFamily, TaskInfo, MW_TASK_SET_PATH};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use walkdir::WalkDir;

use crate::definitions;
use crate::manifest::{is_definition_unit, UnitLoader};
use crate::plugin::{type_task_name, TaskDefinition, TaskPlugin, TaskRun};

/// Remembers which task directories already had their scan logged at info level.
///
/// [`ScanLog::global`] lives for the whole process. Callers that rebuild
/// registries repeatedly (tests, long-running services) can pass their own
/// instance or [`ScanLog::reset`] the global one.
#[derive(Debug, Default)]
pub struct ScanLog {
    seen: Mutex<HashSet<PathBuf>>,
}

impl ScanLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static ScanLog {
        static GLOBAL: OnceLock<ScanLog> = OnceLock::new();
        GLOBAL.get_or_init(ScanLog::new)
    }

    /// True the first time `path` is seen by this log.
    pub fn first_visit(&self, path: &Path) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|p| p.into_inner());
        seen.insert(path.to_path_buf())
    }

    pub fn reset(&self) {
        self.seen.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSource {
    Builtin { module: &'static str },
    Manifest { unit: PathBuf },
}

impl TaskSource {
    pub fn describe(&self) -> String {
        match self {
            Self::Builtin { module } => format!("builtin:{}", module),
            Self::Manifest { unit } => unit.display().to_string(),
        }
    }
}

#[derive(Clone)]
pub struct RegisteredTask {
    name: String,
    plugin: Arc<dyn TaskPlugin>,
    source: TaskSource,
}

impl RegisteredTask {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plugin(&self) -> &Arc<dyn TaskPlugin> {
        &self.plugin
    }

    pub fn source(&self) -> &TaskSource {
        &self.source
    }

    pub fn info(&self) -> TaskInfo {
        self.plugin.profile().to_info(&self.name)
    }

    pub fn start(&self) -> TaskRun {
        TaskRun::new(self.name.clone(), Arc::clone(&self.plugin))
    }
}

impl std::fmt::Debug for RegisteredTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTask")
            .field("name", &self.name)
            .field("source", &self.source)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: Vec<RegisteredTask>,
    index: HashMap<String, usize>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a task. A name collision replaces the earlier entry in place.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        plugin: Arc<dyn TaskPlugin>,
        source: TaskSource,
    ) {
        let entry = RegisteredTask {
            name: name.into(),
            plugin,
            source,
        };
        match self.index.get(&entry.name) {
            Some(&slot) => {
                tracing::warn!(
                    task = %entry.name,
                    previous = %self.entries[slot].source.describe(),
                    replacement = %entry.source.describe(),
                    "duplicate task name; overwriting earlier definition"
                );
                self.entries[slot] = entry;
            }
            None => {
                self.index.insert(entry.name.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Instantiates a compiled-in task type and registers it under its type name.
    pub fn register_type<T: TaskDefinition>(&mut self) {
        let full = std::any::type_name::<T>();
        let name = type_task_name::<T>();
        let module = full
            .strip_suffix(name)
            .map(|m| m.trim_end_matches("::"))
            .unwrap_or(full);
        match T::instantiate() {
            Ok(task) => self.register(name, Arc::new(task), TaskSource::Builtin { module }),
            Err(err) => tracing::error!(
                task = name,
                module,
                error = %err,
                "failed to instantiate task"
            ),
        }
    }

    /// Registers every task declared in the definition units under `root`.
    ///
    /// Returns how many tasks were registered. Failures are logged per unit
    /// or per declaration and never abort the scan.
    pub fn scan_dir(&mut self, root: &Path, log: &ScanLog) -> usize {
        if !root.exists() {
            tracing::warn!(path = %root.display(), "task directory not found");
            return 0;
        }
        let announce = log.first_visit(root);
        if announce {
            tracing::info!(path = %root.display(), "scanning task definitions");
        }

        let loader = match UnitLoader::new() {
            Ok(loader) => loader,
            Err(err) => {
                tracing::error!(error = %err, "task unit schema unavailable");
                return 0;
            }
        };

        let units: Vec<PathBuf> = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::warn!(path = %root.display(), error = %err, "skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && is_definition_unit(entry.path()))
            .map(|entry| entry.into_path())
            .collect();

        let mut registered = 0;
        for unit_path in units {
            let unit = match loader.load(&unit_path) {
                Ok(unit) => unit,
                Err(err) => {
                    tracing::error!(
                        path = %unit_path.display(),
                        error = %err,
                        "error loading task definition unit"
                    );
                    continue;
                }
            };
            for declaration in unit.concrete_declarations() {
                match unit.instantiate(declaration) {
                    Ok(Some(task)) => {
                        self.register(
                            declaration.type_name.clone(),
                            Arc::new(task),
                            TaskSource::Manifest {
                                unit: unit_path.clone(),
                            },
                        );
                        registered += 1;
                    }
                    Ok(None) => tracing::debug!(
                        path = %unit_path.display(),
                        task = %declaration.type_name,
                        "declaration has no checker; not a task"
                    ),
                    Err(err) => tracing::error!(
                        path = %unit_path.display(),
                        task = %declaration.type_name,
                        error = %err,
                        "failed to instantiate task"
                    ),
                }
            }
        }

        if announce {
            tracing::info!(path = %root.display(), count = registered, "loaded task definitions");
        }
        registered
    }

    pub fn build(self) -> TaskRegistry {
        TaskRegistry {
            entries: self.entries,
            index: self.index,
        }
    }
}

/// Name-indexed set of task plugins. Read-only once built.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    entries: Vec<RegisteredTask>,
    index: HashMap<String, usize>,
}

impl TaskRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn scan(root: &Path) -> Self {
        Self::scan_with_log(root, ScanLog::global())
    }

    pub fn scan_with_log(root: &Path, log: &ScanLog) -> Self {
        let mut builder = RegistryBuilder::new();
        builder.scan_dir(root, log);
        builder.build()
    }

    /// Stock tasks for `family`, then the manifest tasks of its task set.
    pub fn for_suite_family(family: SuiteFamily, task_set_path: Option<&Path>) -> Self {
        Self::for_suite_family_with_log(family, task_set_path, ScanLog::global())
    }

    pub fn for_suite_family_with_log(
        family: SuiteFamily,
        task_set_path: Option<&Path>,
        log: &ScanLog,
    ) -> Self {
        let mut builder = RegistryBuilder::new();
        definitions::register_suite(&mut builder, family);
        let root = resolve_task_set_dir(family, task_set_path);
        builder.scan_dir(&root, log);
        builder.build()
    }

    pub fn get(&self, name: &str) -> Result<&RegisteredTask, EnvError> {
        match self.index.get(name) {
            Some(&slot) => Ok(&self.entries[slot]),
            None => {
                let err = EnvError::not_found(LookupKind::Task, name, self.list());
                tracing::error!(error = %err, "task lookup failed");
                Err(err)
            }
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Registered task names in registration order.
    pub fn list(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn tasks(&self) -> &[RegisteredTask] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Directory holding the manifest tasks of `family`: an explicit path, then
/// `MW_TASK_SET_PATH`, then `tasks/<family>`.
pub fn resolve_task_set_dir(family: SuiteFamily, explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match mw_core::optional_string_env(MW_TASK_SET_PATH) {
        Ok(Some(path)) => return PathBuf::from(path),
        Ok(None) => {}
        Err(err) => tracing::warn!(error = %err, "ignoring {}", MW_TASK_SET_PATH),
    }
    Path::new("tasks").join(family.as_str())
}
