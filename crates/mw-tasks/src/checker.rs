use anyhow::{anyhow, bail, Result};
use mw_core::TaskScore;
use serde::{Deserialize, Serialize};

use crate::controller::DeviceController;

pub const CHECKER_KINDS: &[&str] = &["answer_contains", "answer_equals", "constant"];

const DEFAULT_SUCCESS_REASON: &str = "Task completed";
const DEFAULT_FAILURE_REASON: &str = "Task not completed";

/// Checker block as written in a definition unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckerSpec {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Checker {
    AnswerContains {
        needle: String,
        success_reason: String,
        failure_reason: String,
    },
    AnswerEquals {
        expected: String,
        success_reason: String,
        failure_reason: String,
    },
    Constant {
        score: f64,
        reason: String,
    },
}

impl Checker {
    pub fn answer_contains(
        needle: impl Into<String>,
        success_reason: impl Into<String>,
        failure_reason: impl Into<String>,
    ) -> Self {
        Self::AnswerContains {
            needle: needle.into(),
            success_reason: success_reason.into(),
            failure_reason: failure_reason.into(),
        }
    }

    /// Checker factory for definition units.
    pub fn from_spec(spec: &CheckerSpec) -> Result<Self> {
        let success_reason = spec
            .success_reason
            .clone()
            .unwrap_or_else(|| DEFAULT_SUCCESS_REASON.to_string());
        let failure_reason = spec
            .failure_reason
            .clone()
            .unwrap_or_else(|| DEFAULT_FAILURE_REASON.to_string());
        match spec.kind.as_str() {
            "answer_contains" => {
                let needle = required(&spec.needle, "answer_contains", "needle")?;
                if needle.trim().is_empty() {
                    bail!("answer_contains checker needs a non-empty needle");
                }
                Ok(Self::AnswerContains {
                    needle,
                    success_reason,
                    failure_reason,
                })
            }
            "answer_equals" => Ok(Self::AnswerEquals {
                expected: required(&spec.expected, "answer_equals", "expected")?,
                success_reason,
                failure_reason,
            }),
            "constant" => {
                let score = spec
                    .score
                    .ok_or_else(|| anyhow!("constant checker requires 'score'"))?;
                if !(0.0..=1.0).contains(&score) {
                    bail!("constant checker score must be within [0, 1], got {}", score);
                }
                Ok(Self::Constant {
                    score,
                    reason: spec
                        .reason
                        .clone()
                        .unwrap_or_else(|| format!("constant score {}", score)),
                })
            }
            other => Err(anyhow!(
                "unknown checker kind '{}'; supported: {}",
                other,
                CHECKER_KINDS.join(", ")
            )),
        }
    }

    pub fn evaluate(&self, controller: &dyn DeviceController) -> TaskScore {
        let answer = controller.interaction_cache().unwrap_or_default();
        match self {
            Self::AnswerContains {
                needle,
                success_reason,
                failure_reason,
            } => verdict(
                answer.to_lowercase().contains(&needle.to_lowercase()),
                success_reason,
                failure_reason,
            ),
            Self::AnswerEquals {
                expected,
                success_reason,
                failure_reason,
            } => verdict(
                answer.trim().eq_ignore_ascii_case(expected.trim()),
                success_reason,
                failure_reason,
            ),
            Self::Constant { score, reason } => TaskScore::new(*score, reason.clone()),
        }
    }
}

fn required(value: &Option<String>, kind: &str, field: &str) -> Result<String> {
    value
        .clone()
        .ok_or_else(|| anyhow!("{} checker requires '{}'", kind, field))
}

fn verdict(passed: bool, success_reason: &str, failure_reason: &str) -> TaskScore {
    if passed {
        TaskScore::new(1.0, success_reason)
    } else {
        TaskScore::new(0.0, failure_reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::LocalController;

    fn spec(kind: &str) -> CheckerSpec {
        CheckerSpec {
            kind: kind.to_string(),
            ..CheckerSpec::default()
        }
    }

    #[test]
    fn answer_contains_is_case_insensitive() {
        let checker = Checker::from_spec(&CheckerSpec {
            needle: Some("Finished".to_string()),
            success_reason: Some("Alarm set successfully".to_string()),
            ..spec("answer_contains")
        })
        .expect("checker");

        let mut controller = LocalController::new("emulator-5554");
        let miss = checker.evaluate(&controller);
        assert_eq!(miss.score, 0.0);
        assert_eq!(miss.reason, DEFAULT_FAILURE_REASON);

        controller.record_answer("all FINISHED here");
        let hit = checker.evaluate(&controller);
        assert_eq!(hit.score, 1.0);
        assert_eq!(hit.reason, "Alarm set successfully");
    }

    #[test]
    fn answer_equals_ignores_surrounding_whitespace() {
        let checker = Checker::from_spec(&CheckerSpec {
            expected: Some("42".to_string()),
            ..spec("answer_equals")
        })
        .expect("checker");
        let mut controller = LocalController::new("emulator-5554");
        controller.record_answer(" 42\n");
        assert_eq!(checker.evaluate(&controller).score, 1.0);
        controller.record_answer("420");
        assert_eq!(checker.evaluate(&controller).score, 0.0);
    }

    #[test]
    fn factory_rejects_bad_specs() {
        let err = Checker::from_spec(&spec("regex")).expect_err("unknown kind");
        assert!(err.to_string().contains("answer_contains"));
        assert!(Checker::from_spec(&spec("answer_contains")).is_err());
        assert!(Checker::from_spec(&CheckerSpec {
            score: Some(1.5),
            ..spec("constant")
        })
        .is_err());
    }
}
