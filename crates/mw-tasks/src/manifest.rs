use jsonschema::JSONSchema;
use mw_core::{ErrorKind, TaskScore};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::checker::{Checker, CheckerSpec};
use crate::controller::DeviceController;
use crate::plugin::{TaskPlugin, TaskProfile, TaskSetup};

/// Package-initializer unit; holds suite-wide settings, never task declarations.
pub const SUITE_UNIT_FILE: &str = "suite.yaml";
pub const UNIT_EXTENSIONS: &[&str] = &["yaml", "yml"];

const MAX_EXTENDS_DEPTH: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum TaskLoadError {
    #[error("failed to read definition unit {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse definition unit {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
    #[error("definition unit {} is invalid: {message}", .path.display())]
    Invalid { path: PathBuf, message: String },
    #[error("definition unit {} cannot import '{import}': {message}", .path.display())]
    Import {
        path: PathBuf,
        import: String,
        message: String,
    },
    #[error("task '{type_name}' in {} cannot be instantiated: {message}", .path.display())]
    Instantiate {
        path: PathBuf,
        type_name: String,
        message: String,
    },
}

impl TaskLoadError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::PluginLoad
    }
}

/// One `tasks[]` entry of a definition unit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskDeclaration {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub apps: Option<Vec<String>>,
    #[serde(default)]
    pub relevant_information: Option<String>,
    #[serde(default)]
    pub checker: Option<CheckerSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UnitFile {
    #[allow(dead_code)]
    schema_version: String,
    #[serde(default)]
    imports: Vec<String>,
    #[serde(default)]
    tasks: Vec<TaskDeclaration>,
}

#[derive(Debug, Clone)]
struct ImportedDeclaration {
    unit: PathBuf,
    declaration: TaskDeclaration,
}

/// A declaration with its `extends` chain folded in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedDeclaration {
    pub type_name: String,
    pub goal: Option<String>,
    pub tags: Vec<String>,
    pub apps: Vec<String>,
    pub relevant_information: Option<String>,
    pub checker: Option<CheckerSpec>,
}

impl ResolvedDeclaration {
    fn overlay(mut self, child: &TaskDeclaration) -> Self {
        self.type_name = child.type_name.clone();
        if child.goal.is_some() {
            self.goal = child.goal.clone();
        }
        if let Some(tags) = child.tags.as_ref() {
            self.tags = tags.clone();
        }
        if let Some(apps) = child.apps.as_ref() {
            self.apps = apps.clone();
        }
        if child.relevant_information.is_some() {
            self.relevant_information = child.relevant_information.clone();
        }
        if child.checker.is_some() {
            self.checker = child.checker.clone();
        }
        self
    }
}

/// A loaded definition unit: its own declarations plus everything its imports make visible.
#[derive(Debug, Clone)]
pub struct DefinitionUnit {
    path: PathBuf,
    local: Vec<TaskDeclaration>,
    imported: Vec<ImportedDeclaration>,
}

impl DefinitionUnit {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn declarations(&self) -> &[TaskDeclaration] {
        &self.local
    }

    pub fn imported_type_names(&self) -> Vec<&str> {
        self.imported
            .iter()
            .map(|d| d.declaration.type_name.as_str())
            .collect()
    }

    /// Declarations defined in this unit that are candidates for registration.
    pub fn concrete_declarations(&self) -> impl Iterator<Item = &TaskDeclaration> {
        self.local.iter().filter(|d| !d.is_abstract)
    }

    fn lookup(&self, type_name: &str) -> Option<(&Path, &TaskDeclaration)> {
        if let Some(found) = self.local.iter().rev().find(|d| d.type_name == type_name) {
            return Some((self.path.as_path(), found));
        }
        self.imported
            .iter()
            .rev()
            .find(|d| d.declaration.type_name == type_name)
            .map(|d| (d.unit.as_path(), &d.declaration))
    }

    pub fn resolve(&self, type_name: &str) -> Result<ResolvedDeclaration, TaskLoadError> {
        let mut chain: Vec<&TaskDeclaration> = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = Some(type_name.to_string());
        while let Some(name) = cursor {
            if !seen.insert(name.clone()) || chain.len() >= MAX_EXTENDS_DEPTH {
                return Err(self.instantiate_error(
                    type_name,
                    format!("extends chain through '{}' is cyclic", name),
                ));
            }
            let (_, declaration) = self.lookup(&name).ok_or_else(|| {
                self.instantiate_error(
                    type_name,
                    format!("base '{}' is not declared or imported", name),
                )
            })?;
            chain.push(declaration);
            cursor = declaration.extends.clone();
        }

        Ok(chain
            .iter()
            .rev()
            .fold(ResolvedDeclaration::default(), |acc, decl| acc.overlay(decl)))
    }

    /// Builds the plugin for one declaration.
    ///
    /// `Ok(None)` means the declaration resolves without a checker, so it is
    /// not a task.
    pub fn instantiate(
        &self,
        declaration: &TaskDeclaration,
    ) -> Result<Option<ManifestTask>, TaskLoadError> {
        let resolved = self.resolve(&declaration.type_name)?;
        let Some(spec) = resolved.checker.as_ref() else {
            return Ok(None);
        };
        let checker = Checker::from_spec(spec)
            .map_err(|err| self.instantiate_error(&declaration.type_name, err.to_string()))?;
        Ok(Some(ManifestTask {
            profile: TaskProfile {
                goal: resolved.goal.clone(),
                tags: resolved.tags.iter().cloned().collect::<BTreeSet<_>>(),
                app_names: resolved.apps.iter().cloned().collect::<BTreeSet<_>>(),
            },
            relevant_information: resolved.relevant_information.clone(),
            checker,
            unit: self.path.clone(),
        }))
    }

    fn instantiate_error(&self, type_name: &str, message: String) -> TaskLoadError {
        TaskLoadError::Instantiate {
            path: self.path.clone(),
            type_name: type_name.to_string(),
            message,
        }
    }
}

/// Task built from a definition unit.
#[derive(Debug, Clone)]
pub struct ManifestTask {
    profile: TaskProfile,
    relevant_information: Option<String>,
    checker: Checker,
    unit: PathBuf,
}

impl ManifestTask {
    pub fn unit(&self) -> &Path {
        &self.unit
    }

    pub fn checker(&self) -> &Checker {
        &self.checker
    }
}

impl TaskPlugin for ManifestTask {
    fn profile(&self) -> &TaskProfile {
        &self.profile
    }

    fn initialize_task_hook(
        &self,
        controller: &mut dyn DeviceController,
    ) -> anyhow::Result<TaskSetup> {
        controller.clear_interaction_cache();
        Ok(TaskSetup {
            relevant_information: self.relevant_information.clone(),
        })
    }

    fn is_successful(&self, controller: &dyn DeviceController) -> anyhow::Result<TaskScore> {
        Ok(self.checker.evaluate(controller))
    }
}

pub fn is_definition_unit(path: &Path) -> bool {
    let is_unit_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| UNIT_EXTENSIONS.contains(&e))
        .unwrap_or(false);
    let is_suite = path
        .file_name()
        .map(|n| n == SUITE_UNIT_FILE)
        .unwrap_or(false);
    is_unit_ext && !is_suite
}

/// Loads definition units against the bundled `task_unit_v1` schema.
pub struct UnitLoader {
    schema: &'static JSONSchema,
}

impl UnitLoader {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            schema: mw_schemas::cached_schema(mw_schemas::TASK_UNIT_SCHEMA_V1)?,
        })
    }

    pub fn load(&self, path: &Path) -> Result<DefinitionUnit, TaskLoadError> {
        let mut import_chain = Vec::new();
        let (local, imported) = self.load_with_imports(path, &mut import_chain)?;
        Ok(DefinitionUnit {
            path: path.to_path_buf(),
            local,
            imported,
        })
    }

    fn load_with_imports(
        &self,
        path: &Path,
        import_chain: &mut Vec<PathBuf>,
    ) -> Result<(Vec<TaskDeclaration>, Vec<ImportedDeclaration>), TaskLoadError> {
        let unit = self.read_unit(path)?;
        import_chain.push(chain_key(path));

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut imported = Vec::new();
        for import in &unit.imports {
            let import_path = base_dir.join(import);
            let import_error = |message: String| TaskLoadError::Import {
                path: path.to_path_buf(),
                import: import.clone(),
                message,
            };
            if import_chain.contains(&chain_key(&import_path)) {
                return Err(import_error("import cycle".to_string()));
            }
            let (their_local, their_imported) = self
                .load_with_imports(&import_path, import_chain)
                .map_err(|err| import_error(err.to_string()))?;
            imported.extend(their_imported);
            imported.extend(their_local.into_iter().map(|declaration| ImportedDeclaration {
                unit: import_path.clone(),
                declaration,
            }));
        }

        import_chain.pop();
        Ok((unit.tasks, imported))
    }

    fn read_unit(&self, path: &Path) -> Result<UnitFile, TaskLoadError> {
        let raw = fs::read_to_string(path).map_err(|source| TaskLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value = serde_yaml::from_str(&raw).map_err(|err| TaskLoadError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        mw_schemas::validate_with(self.schema, &value).map_err(|err| {
            TaskLoadError::Invalid {
                path: path.to_path_buf(),
                message: err.to_string(),
            }
        })?;
        serde_json::from_value(value).map_err(|err| TaskLoadError::Invalid {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }
}

fn chain_key(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
