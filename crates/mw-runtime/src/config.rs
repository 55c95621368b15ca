use anyhow::Result;
use mw_core::{
    parse_optional_positive, parse_optional_string, read_env, DEFAULT_DEVICE, DEFAULT_ENV_URL, MW_CONNECT_TIMEOUT_MS, MW_DEVICE, MW_ENV_URL,
    MW_EXTENDED_TIMEOUT_MS, MW_REQUEST_TIMEOUT_MS, MW_SCREENSHOT_RETRY_BASE_BACKOFF_MS,
    MW_SCREENSHOT_RETRY_MAX_ATTEMPTS, MW_STEP_WAIT_MS,
};
use std::time::Duration;

const STEP_WAIT_MS_DEFAULT: u64 = 1_000;
const SCREENSHOT_RETRY_MAX_ATTEMPTS_DEFAULT: usize = 3;
const SCREENSHOT_RETRY_BASE_BACKOFF_MS_DEFAULT: u64 = 1_000;
const CONNECT_TIMEOUT_MS_DEFAULT: u64 = 5_000;
const REQUEST_TIMEOUT_MS_DEFAULT: u64 = 60_000;
const EXTENDED_TIMEOUT_MS_DEFAULT: u64 = 300_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: SCREENSHOT_RETRY_MAX_ATTEMPTS_DEFAULT,
            base_backoff_ms: SCREENSHOT_RETRY_BASE_BACKOFF_MS_DEFAULT,
        }
    }
}

impl RetrySettings {
    /// Sleep before attempt `attempt + 1`: `base * 2^(attempt - 1)`, capped at 2^8.
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        let shift = attempt.saturating_sub(1).min(8) as u32;
        Duration::from_millis(self.base_backoff_ms.saturating_mul(1u64 << shift))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutSettings {
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// Task init and suite switches restart apps or the emulator.
    pub extended_timeout_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: CONNECT_TIMEOUT_MS_DEFAULT,
            request_timeout_ms: REQUEST_TIMEOUT_MS_DEFAULT,
            extended_timeout_ms: EXTENDED_TIMEOUT_MS_DEFAULT,
        }
    }
}

impl TimeoutSettings {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn extended(&self) -> Duration {
        Duration::from_millis(self.extended_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub device: String,
    pub step_wait_ms: u64,
    pub retry: RetrySettings,
    pub timeouts: TimeoutSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_ENV_URL.to_string(),
            device: DEFAULT_DEVICE.to_string(),
            step_wait_ms: STEP_WAIT_MS_DEFAULT,
            retry: RetrySettings::default(),
            timeouts: TimeoutSettings::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(read_env)
    }

    /// Defaults overridden by whatever `lookup` returns for the `MW_*` names.
    ///
    /// The screenshot attempt bound can only be lowered.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<Option<String>>,
    {
        let string = |name: &str| -> Result<Option<String>> {
            Ok(parse_optional_string(lookup(name)?.as_deref()))
        };
        let positive_u64 = |name: &str| -> Result<Option<u64>> {
            parse_optional_positive(name, lookup(name)?.as_deref())
        };

        let mut config = Self::default();
        if let Some(url) = string(MW_ENV_URL)? {
            config.base_url = url;
        }
        if let Some(device) = string(MW_DEVICE)? {
            config.device = device;
        }
        if let Some(step_wait_ms) = positive_u64(MW_STEP_WAIT_MS)? {
            config.step_wait_ms = step_wait_ms;
        }
        if let Some(max_attempts) = parse_optional_positive::<usize>(
            MW_SCREENSHOT_RETRY_MAX_ATTEMPTS,
            lookup(MW_SCREENSHOT_RETRY_MAX_ATTEMPTS)?.as_deref(),
        )? {
            if max_attempts > SCREENSHOT_RETRY_MAX_ATTEMPTS_DEFAULT {
                tracing::warn!(
                    requested = max_attempts,
                    max = SCREENSHOT_RETRY_MAX_ATTEMPTS_DEFAULT,
                    "clamping screenshot retry attempts"
                );
            }
            config.retry.max_attempts = max_attempts.min(SCREENSHOT_RETRY_MAX_ATTEMPTS_DEFAULT);
        }
        if let Some(base_backoff_ms) = positive_u64(MW_SCREENSHOT_RETRY_BASE_BACKOFF_MS)? {
            config.retry.base_backoff_ms = base_backoff_ms;
        }
        if let Some(connect_timeout_ms) = positive_u64(MW_CONNECT_TIMEOUT_MS)? {
            config.timeouts.connect_timeout_ms = connect_timeout_ms;
        }
        if let Some(request_timeout_ms) = positive_u64(MW_REQUEST_TIMEOUT_MS)? {
            config.timeouts.request_timeout_ms = request_timeout_ms;
        }
        if let Some(extended_timeout_ms) = positive_u64(MW_EXTENDED_TIMEOUT_MS)? {
            config.timeouts.extended_timeout_ms = extended_timeout_ms;
        }
        Ok(config)
    }

    pub fn with_endpoint(mut self, base_url: impl Into<String>, device: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self.device = device.into();
        self
    }

    pub fn step_wait(&self) -> Duration {
        Duration::from_millis(self.step_wait_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn backoff_doubles_per_attempt() {
        let retry = RetrySettings {
            max_attempts: 3,
            base_backoff_ms: 250,
        };
        assert_eq!(retry.backoff_delay(1), Duration::from_millis(250));
        assert_eq!(retry.backoff_delay(2), Duration::from_millis(500));
        assert_eq!(retry.backoff_delay(3), Duration::from_millis(1_000));
        assert_eq!(retry.backoff_delay(40), Duration::from_millis(250 * 256));
    }

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Result<Option<String>> {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| Ok(values.get(name).cloned())
    }

    #[test]
    fn lookup_overrides_defaults() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            (MW_STEP_WAIT_MS, "25"),
            (MW_SCREENSHOT_RETRY_MAX_ATTEMPTS, "2"),
            (MW_DEVICE, " emulator-5560 "),
            (MW_ENV_URL, "  "),
        ]))
        .expect("config");
        assert_eq!(config.step_wait_ms, 25);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.device, "emulator-5560");
        assert_eq!(config.base_url, DEFAULT_ENV_URL);
        assert_eq!(config.timeouts, TimeoutSettings::default());

        let err = ClientConfig::from_lookup(lookup_from(&[(MW_SCREENSHOT_RETRY_MAX_ATTEMPTS, "0")]))
            .expect_err("zero attempts");
        assert!(err.to_string().contains(MW_SCREENSHOT_RETRY_MAX_ATTEMPTS));
    }

    #[test]
    fn screenshot_attempts_cannot_exceed_three() {
        let config =
            ClientConfig::from_lookup(lookup_from(&[(MW_SCREENSHOT_RETRY_MAX_ATTEMPTS, "10")]))
                .expect("config");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(ClientConfig::from_lookup(lookup_from(&[])).expect("defaults"), ClientConfig::default());
    }
}
