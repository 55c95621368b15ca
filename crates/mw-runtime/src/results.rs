//! Reconstructs finished runs from the `result.txt` files left in a log root.

use anyhow::{Context, Result};
use mw_core::{BACKUP_DIR_MARKER, SCORE_FILE_NAME, SCORE_LINE_PREFIX};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task: String,
    pub score: Option<f64>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub count: usize,
    pub scored: usize,
    pub mean_score: Option<f64>,
    pub successes: usize,
}

/// Splits a result file body into its score line and reason line.
pub fn parse_result_text(text: &str) -> (Option<f64>, Option<String>) {
    let mut lines = text.lines();
    let score = lines.next().and_then(|line| {
        let (_, value) = line.split_once(SCORE_LINE_PREFIX)?;
        value.trim().parse::<f64>().ok()
    });
    let reason = lines.next().map(|line| line.trim().to_string());
    (score, reason)
}

pub fn parse_result_file(path: &Path) -> Result<(Option<f64>, Option<String>)> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read result file {}", path.display()))?;
    Ok(parse_result_text(&text))
}

/// Every finished task under `log_root`, sorted by directory name.
///
/// A task directory is an immediate child holding a `result.txt`; backup
/// copies are skipped, and `task_list` restricts the scan when given.
pub fn scan_finished_results(
    log_root: &Path,
    task_list: Option<&[String]>,
) -> Result<Vec<TaskResult>> {
    if !log_root.is_dir() {
        tracing::debug!(path = %log_root.display(), "log root does not exist");
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(log_root)
        .with_context(|| format!("failed to read log root {}", log_root.display()))?
    {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.contains(BACKUP_DIR_MARKER) {
            continue;
        }
        if let Some(allowed) = task_list {
            if !allowed.iter().any(|task| task == &name) {
                continue;
            }
        }
        if entry.path().join(SCORE_FILE_NAME).is_file() {
            names.push(name);
        }
    }
    names.sort();

    let mut results = Vec::with_capacity(names.len());
    for name in names {
        let path = log_root.join(&name).join(SCORE_FILE_NAME);
        let (score, reason) = match parse_result_file(&path) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "unreadable result file");
                (None, None)
            }
        };
        results.push(TaskResult {
            task: name,
            score,
            reason,
        });
    }
    Ok(results)
}

/// Parallel task names and scores; unparsable scores are `None`.
pub fn scan_finished_tasks(
    log_root: &Path,
    task_list: Option<&[String]>,
) -> Result<(Vec<String>, Vec<Option<f64>>)> {
    Ok(scan_finished_results(log_root, task_list)?
        .into_iter()
        .map(|result| (result.task, result.score))
        .unzip())
}

pub fn summarize(results: &[TaskResult]) -> ResultSummary {
    let scores: Vec<f64> = results.iter().filter_map(|r| r.score).collect();
    let mean_score = if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    };
    ResultSummary {
        count: results.len(),
        scored: scores.len(),
        mean_score,
        successes: scores.iter().filter(|s| **s >= 1.0).count(),
    }
}
