use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

pub mod action;
pub mod error;
pub mod observation;
pub mod task_info;

pub use action::{ActionType, JsonAction};
pub use error::{EnvError, ErrorKind, LookupKind, OpResponse, OutcomeKind};
pub use observation::{decode_screenshot_b64, Observation, ObservationKind, Screenshot};
pub use task_info::{AppInfo, TaskInfo, TaskMetadata, TaskScore, TaskStatistics};

pub const SCORE_FILE_NAME: &str = "result.txt";
pub const BACKUP_DIR_MARKER: &str = "backup";
pub const SCORE_LINE_PREFIX: &str = "score:";

pub const TAG_AGENT_MCP: &str = "agent-mcp";
pub const TAG_AGENT_USER_INTERACTION: &str = "agent-user-interaction";
pub const TAG_LANG_EN: &str = "lang-en";
pub const TAG_LANG_CN: &str = "lang-cn";

pub const DEFAULT_ENV_URL: &str = "http://localhost:8000";
pub const DEFAULT_DEVICE: &str = "emulator-5554";

pub const MW_ENV_URL: &str = "MW_ENV_URL";
pub const MW_DEVICE: &str = "MW_DEVICE";
pub const MW_STEP_WAIT_MS: &str = "MW_STEP_WAIT_MS";
pub const MW_SCREENSHOT_RETRY_MAX_ATTEMPTS: &str = "MW_SCREENSHOT_RETRY_MAX_ATTEMPTS";
pub const MW_SCREENSHOT_RETRY_BASE_BACKOFF_MS: &str = "MW_SCREENSHOT_RETRY_BASE_BACKOFF_MS";
pub const MW_CONNECT_TIMEOUT_MS: &str = "MW_CONNECT_TIMEOUT_MS";
pub const MW_REQUEST_TIMEOUT_MS: &str = "MW_REQUEST_TIMEOUT_MS";
pub const MW_EXTENDED_TIMEOUT_MS: &str = "MW_EXTENDED_TIMEOUT_MS";
pub const MW_TASK_SET_PATH: &str = "MW_TASK_SET_PATH";
pub const MW_MCP_CONFIG: &str = "MW_MCP_CONFIG";

/// Emulator profile the remote side boots tasks against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuiteFamily {
    #[default]
    MobileWorld,
    AndroidWorld,
}

impl SuiteFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MobileWorld => "mobile_world",
            Self::AndroidWorld => "android_world",
        }
    }

    pub fn all() -> &'static [SuiteFamily] {
        &[Self::MobileWorld, Self::AndroidWorld]
    }
}

impl fmt::Display for SuiteFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SuiteFamily {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim() {
            "mobile_world" => Ok(Self::MobileWorld),
            "android_world" => Ok(Self::AndroidWorld),
            other => Err(anyhow!(
                "unsupported suite family '{}'; supported: mobile_world, android_world",
                other
            )),
        }
    }
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// Raw value of an environment variable; `None` when unset.
pub fn read_env(name: &str) -> Result<Option<String>> {
    match env::var(name) {
        Ok(raw) => Ok(Some(raw)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(anyhow!("failed reading {}: {}", name, err)),
    }
}

/// Parses an optional setting that must be a positive integer. Blank counts as unset.
pub fn parse_optional_positive<T>(name: &str, raw: Option<&str>) -> Result<Option<T>>
where
    T: FromStr + PartialEq + From<u8>,
{
    let Some(raw) = raw else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let parsed = trimmed.parse::<T>().map_err(|_| {
        anyhow!(
            "{} must be a positive integer when set (got: {})",
            name,
            raw
        )
    })?;
    if parsed == T::from(0) {
        return Err(anyhow!("{} must be > 0 when set", name));
    }
    Ok(Some(parsed))
}

pub fn parse_optional_string(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|trimmed| !trimmed.is_empty())
        .map(str::to_string)
}

/// Trimmed value of `name`; blank counts as unset.
pub fn optional_string_env(name: &str) -> Result<Option<String>> {
    Ok(parse_optional_string(read_env(name)?.as_deref()))
}

/// Case-insensitive substring match used by every name filter in the harness.
pub fn matches_filter(candidate: &str, filter: &str) -> bool {
    candidate
        .to_ascii_lowercase()
        .contains(&filter.to_ascii_lowercase())
}
