use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::TAG_AGENT_MCP;

/// Descriptor view of a registered task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub name: String,
    pub goal: Option<String>,
    pub tags: Vec<String>,
    pub app_names: Vec<String>,
}

impl TaskInfo {
    pub fn is_cross_app(&self) -> bool {
        self.app_names.len() > 1
    }

    pub fn is_single_app(&self) -> bool {
        self.app_names.len() == 1
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn kind_label(&self) -> &'static str {
        if self.is_cross_app() {
            "cross-app"
        } else if self.is_single_app() {
            "single-app"
        } else {
            "no-app"
        }
    }
}

/// Task metadata as reported by the remote side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub apps: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskMetadata {
    pub fn is_tool_augmented(&self) -> bool {
        self.tags.iter().any(|t| t == TAG_AGENT_MCP)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskScore {
    pub score: f64,
    pub reason: String,
}

impl TaskScore {
    pub fn new(score: f64, reason: impl Into<String>) -> Self {
        Self {
            score,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatistics {
    pub total_tasks: usize,
    pub single_app_tasks: usize,
    pub cross_app_tasks: usize,
    pub tasks_without_apps: usize,
    pub tag_counts: BTreeMap<String, usize>,
}

impl TaskStatistics {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a TaskInfo>) -> Self {
        let mut stats = Self::default();
        for task in tasks {
            stats.total_tasks += 1;
            if task.is_single_app() {
                stats.single_app_tasks += 1;
            } else if task.is_cross_app() {
                stats.cross_app_tasks += 1;
            } else {
                stats.tasks_without_apps += 1;
            }
            for tag in &task.tags {
                *stats.tag_counts.entry(tag.clone()).or_insert(0) += 1;
            }
        }
        stats
    }

    /// Tag counts ordered by descending count, then tag name.
    pub fn tags_by_count(&self) -> Vec<(&str, usize)> {
        let mut tags: Vec<(&str, usize)> = self
            .tag_counts
            .iter()
            .map(|(tag, count)| (tag.as_str(), *count))
            .collect();
        tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        tags
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub name: String,
    pub tasks: Vec<String>,
    pub single_app_task_count: usize,
    pub cross_app_task_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, apps: &[&str], tags: &[&str]) -> TaskInfo {
        TaskInfo {
            name: name.to_string(),
            goal: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            app_names: apps.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn app_classification_is_exclusive() {
        for apps in [&[][..], &["Clock"][..], &["Calendar", "Mail"][..]] {
            let info = task("T", apps, &[]);
            assert!(!(info.is_cross_app() && info.is_single_app()));
            assert_eq!(
                !info.is_cross_app() && !info.is_single_app(),
                info.app_names.is_empty()
            );
        }
        assert_eq!(task("T", &["Calendar", "Mail"], &[]).kind_label(), "cross-app");
    }

    #[test]
    fn statistics_count_kinds_and_tags() {
        let tasks = vec![
            task("A", &["Clock"], &["lang-en"]),
            task("B", &["Calendar", "Mail"], &["lang-en", "agent-user-interaction"]),
            task("C", &[], &["lang-cn"]),
        ];
        let stats = TaskStatistics::from_tasks(&tasks);
        assert_eq!(stats.total_tasks, 3);
        assert_eq!(stats.single_app_tasks, 1);
        assert_eq!(stats.cross_app_tasks, 1);
        assert_eq!(stats.tasks_without_apps, 1);
        assert_eq!(stats.tags_by_count()[0], ("lang-en", 2));
    }

    #[test]
    fn metadata_keeps_unknown_fields() {
        let metadata: TaskMetadata = serde_json::from_value(serde_json::json!({
            "tags": ["agent-mcp"],
            "apps": ["Mail-Email"],
            "complexity": 2.5
        }))
        .expect("metadata");
        assert!(metadata.is_tool_augmented());
        assert_eq!(metadata.extra["complexity"], 2.5);
    }
}
