use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure discriminator shared by every harness operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Transport,
    PluginLoad,
    Invariant,
    Decode,
    Unsupported,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Transport => "transport",
            Self::PluginLoad => "plugin_load",
            Self::Invariant => "invariant",
            Self::Decode => "decode",
            Self::Unsupported => "unsupported",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupKind {
    Task,
    App,
    Tool,
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task => f.write_str("task"),
            Self::App => f.write_str("app"),
            Self::Tool => f.write_str("tool"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("{kind} '{key}' not found; available: {}", format_available(.available))]
    NotFound {
        kind: LookupKind,
        key: String,
        available: Vec<String>,
    },
    #[error("{context}: {message}")]
    Transport { context: String, message: String },
    #[error("failed to switch to suite_family {target}: {cause}")]
    SwitchFailed { target: String, cause: String },
    #[error("{context}: invalid payload: {message}")]
    Decode { context: String, message: String },
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl EnvError {
    pub fn not_found(kind: LookupKind, key: impl Into<String>, available: Vec<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
            available,
        }
    }

    pub fn transport(context: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::Transport {
            context: context.into(),
            message: err.to_string(),
        }
    }

    pub fn decode(context: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::Decode {
            context: context.into(),
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Transport { .. } | Self::SwitchFailed { .. } => ErrorKind::Transport,
            Self::Decode { .. } => ErrorKind::Decode,
            Self::Invariant(_) => ErrorKind::Invariant,
            Self::Unsupported(_) => ErrorKind::Unsupported,
        }
    }

    /// Valid alternatives for a failed lookup, empty for every other kind.
    pub fn available(&self) -> &[String] {
        match self {
            Self::NotFound { available, .. } => available,
            _ => &[],
        }
    }
}

fn format_available(available: &[String]) -> String {
    if available.is_empty() {
        "<none>".to_string()
    } else {
        available.join(", ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Failure,
}

/// Outcome of an operation that reports failure as a value instead of raising.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpResponse {
    pub kind: OutcomeKind,
    pub message: String,
}

impl OpResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Success,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Failure,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }
}
