//! Read-only summaries over a [`TaskRegistry`].

use mw_core::{matches_filter, AppInfo, EnvError, LookupKind, TaskInfo, TaskStatistics};
use std::collections::BTreeMap;

use crate::registry::TaskRegistry;

pub fn get_task_info(registry: &TaskRegistry, name: &str) -> Result<TaskInfo, EnvError> {
    Ok(registry.get(name)?.info())
}

/// Tasks whose name contains `name_filter`, ordered by first app then name.
pub fn list_tasks(registry: &TaskRegistry, name_filter: Option<&str>) -> Vec<TaskInfo> {
    let mut tasks: Vec<TaskInfo> = registry
        .tasks()
        .iter()
        .filter(|task| name_filter.map_or(true, |f| matches_filter(task.name(), f)))
        .map(|task| task.info())
        .collect();
    tasks.sort_by_key(|task| {
        (
            task.app_names
                .first()
                .map(|a| a.to_lowercase())
                .unwrap_or_default(),
            task.name.to_lowercase(),
        )
    });
    tasks
}

pub fn task_statistics(registry: &TaskRegistry, name_filter: Option<&str>) -> TaskStatistics {
    TaskStatistics::from_tasks(&list_tasks(registry, name_filter))
}

/// Apps referenced by any task, sorted by name.
pub fn list_apps(registry: &TaskRegistry, name_filter: Option<&str>) -> Vec<AppInfo> {
    let mut by_app: BTreeMap<String, AppInfo> = BTreeMap::new();
    for task in registry.tasks() {
        let info = task.info();
        for app in &info.app_names {
            let entry = by_app.entry(app.clone()).or_insert_with(|| AppInfo {
                name: app.clone(),
                ..AppInfo::default()
            });
            entry.tasks.push(info.name.clone());
            if info.is_single_app() {
                entry.single_app_task_count += 1;
            } else {
                entry.cross_app_task_count += 1;
            }
        }
    }
    by_app
        .into_values()
        .filter(|app| name_filter.map_or(true, |f| matches_filter(&app.name, f)))
        .collect()
}

pub fn get_app_info(registry: &TaskRegistry, app_name: &str) -> Result<AppInfo, EnvError> {
    let apps = list_apps(registry, None);
    let available: Vec<String> = apps.iter().map(|a| a.name.clone()).collect();
    apps.into_iter()
        .find(|app| app.name == app_name)
        .ok_or_else(|| EnvError::not_found(LookupKind::App, app_name, available))
}
