use anyhow::{anyhow, Result};
use mw_core::{EnvError, JsonAction, SuiteFamily, TaskMetadata};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::config::TimeoutSettings;

const INIT_PATH: &str = "init";
const SCREENSHOT_PATH: &str = "screenshot";
const STEP_PATH: &str = "step";
const TASK_LIST_PATH: &str = "task/list";
const TASK_INIT_PATH: &str = "task/init";
const TASK_TEAR_DOWN_PATH: &str = "task/tear_down";
const TASK_EVAL_PATH: &str = "task/eval";
const TASK_GOAL_PATH: &str = "task/goal";
const TASK_METADATA_PATH: &str = "task/metadata";
const TASK_COMPLEXITY_PATH: &str = "task/complexity";
const SUITE_SWITCH_PATH: &str = "suite_family/switch";
const HEALTH_PATH: &str = "health";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitRequest {
    pub device: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRequest {
    pub device: String,
    pub action: JsonAction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskRequest {
    pub task_name: String,
    pub req_device: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScreenshotResponse {
    pub b64_png: String,
}

/// Raw step reply. The step endpoint's status is informational only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReply {
    pub status: u16,
    pub body: String,
}

impl StepReply {
    /// The `result` field of a JSON body, if any.
    pub fn result_text(&self) -> Option<String> {
        let parsed: Value = serde_json::from_str(&self.body).ok()?;
        match parsed.get("result")? {
            Value::String(text) => Some(text.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSummary {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EvalResponse {
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SwitchResult {
    #[serde(default)]
    pub switched: bool,
    #[serde(default)]
    pub avd_name: Option<String>,
    #[serde(default)]
    pub emulator_device_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    #[serde(default)]
    pub ok: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    Transport,
    Status,
    Decode,
}

/// Classified failure raised by [`EnvProtocol`] implementations.
#[derive(Debug)]
pub struct ProtocolError {
    kind: ProtocolErrorKind,
    message: String,
}

impl ProtocolError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: ProtocolErrorKind::Transport,
            message: message.into(),
        }
    }

    pub fn status(message: impl Into<String>) -> Self {
        Self {
            kind: ProtocolErrorKind::Status,
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self {
            kind: ProtocolErrorKind::Decode,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ProtocolErrorKind {
        self.kind
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProtocolError {}

/// Maps a protocol failure onto the harness taxonomy. Unclassified errors count as transport.
pub fn classify_protocol_error(context: impl Into<String>, err: &anyhow::Error) -> EnvError {
    let context = context.into();
    for cause in err.chain() {
        if let Some(protocol_error) = cause.downcast_ref::<ProtocolError>() {
            return match protocol_error.kind() {
                ProtocolErrorKind::Decode => EnvError::decode(context, protocol_error),
                ProtocolErrorKind::Transport | ProtocolErrorKind::Status => {
                    EnvError::transport(context, protocol_error)
                }
            };
        }
        if let Some(env_error) = cause.downcast_ref::<EnvError>() {
            return match env_error.kind() {
                mw_core::ErrorKind::Decode => EnvError::decode(context, env_error),
                _ => EnvError::transport(context, env_error),
            };
        }
    }
    EnvError::transport(context, err)
}

/// The remote environment server's HTTP surface.
pub trait EnvProtocol: Send + Sync {
    fn init_device(&self, request: &InitRequest) -> Result<()>;
    fn screenshot(&self, device: &str) -> Result<ScreenshotResponse>;
    fn step(&self, request: &StepRequest) -> Result<StepReply>;
    fn task_list(&self) -> Result<Vec<TaskSummary>>;
    fn task_init(&self, request: &TaskRequest) -> Result<()>;
    fn task_tear_down(&self, request: &TaskRequest) -> Result<()>;
    fn task_eval(&self, request: &TaskRequest) -> Result<EvalResponse>;
    fn task_goal(&self, task_name: &str) -> Result<Value>;
    fn task_metadata(&self, task_name: &str) -> Result<TaskMetadata>;
    fn task_complexity(&self, task_name: &str) -> Result<f64>;
    fn switch_suite_family(&self, target: SuiteFamily) -> Result<SwitchResult>;
    fn health(&self) -> Result<HealthResponse>;
}

#[derive(Clone)]
pub struct HttpEnvProtocol {
    endpoint: String,
    client: HttpClient,
    timeouts: TimeoutSettings,
}

impl HttpEnvProtocol {
    pub fn new(endpoint: &str, timeouts: TimeoutSettings) -> Result<Self> {
        let endpoint = endpoint.trim().to_string();
        if endpoint.is_empty() {
            return Err(anyhow!("environment endpoint must not be empty"));
        }
        let client = HttpClient::builder()
            .connect_timeout(timeouts.connect())
            .timeout(timeouts.request())
            .build()?;
        Ok(Self {
            endpoint,
            client,
            timeouts,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url_for_path(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn send(
        &self,
        method: &str,
        url: &str,
        builder: RequestBuilder,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let builder = match timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        };
        let response = builder.send().map_err(|err| {
            anyhow!(ProtocolError::transport(format!(
                "env http {} {} transport error: {}",
                method, url, err
            )))
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .map(|value| truncate_error_body(&value))
                .unwrap_or_else(|_| "<response body unavailable>".to_string());
            return Err(anyhow!(ProtocolError::status(format!(
                "env http {} {} failed: status={} body={}",
                method,
                url,
                status.as_u16(),
                body
            ))));
        }
        Ok(response)
    }

    fn decode<Resp: DeserializeOwned>(method: &str, url: &str, response: Response) -> Result<Resp> {
        response.json::<Resp>().map_err(|err| {
            anyhow!(ProtocolError::decode(format!(
                "env http {} {} returned invalid JSON payload: {}",
                method, url, err
            )))
        })
    }

    fn get_json<Resp: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<Resp> {
        let url = self.url_for_path(path);
        let response = self.send("GET", &url, self.client.get(&url).query(query), None)?;
        Self::decode("GET", &url, response)
    }

    fn post_json<Req: Serialize + ?Sized>(
        &self,
        path: &str,
        request: &Req,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let url = self.url_for_path(path);
        self.send("POST", &url, self.client.post(&url).json(request), timeout)
    }
}

impl EnvProtocol for HttpEnvProtocol {
    fn init_device(&self, request: &InitRequest) -> Result<()> {
        self.post_json(INIT_PATH, request, None)?;
        Ok(())
    }

    fn screenshot(&self, device: &str) -> Result<ScreenshotResponse> {
        self.get_json(
            SCREENSHOT_PATH,
            &[("device", device), ("return_b64", "true")],
        )
    }

    fn step(&self, request: &StepRequest) -> Result<StepReply> {
        let url = self.url_for_path(STEP_PATH);
        let response = self.client.post(&url).json(request).send().map_err(|err| {
            anyhow!(ProtocolError::transport(format!(
                "env http POST {} transport error: {}",
                url, err
            )))
        })?;
        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        Ok(StepReply { status, body })
    }

    fn task_list(&self) -> Result<Vec<TaskSummary>> {
        self.get_json(TASK_LIST_PATH, &[])
    }

    fn task_init(&self, request: &TaskRequest) -> Result<()> {
        self.post_json(TASK_INIT_PATH, request, Some(self.timeouts.extended()))?;
        Ok(())
    }

    fn task_tear_down(&self, request: &TaskRequest) -> Result<()> {
        self.post_json(TASK_TEAR_DOWN_PATH, request, None)?;
        Ok(())
    }

    fn task_eval(&self, request: &TaskRequest) -> Result<EvalResponse> {
        self.get_json(
            TASK_EVAL_PATH,
            &[
                ("task_name", request.task_name.as_str()),
                ("req_device", request.req_device.as_str()),
            ],
        )
    }

    fn task_goal(&self, task_name: &str) -> Result<Value> {
        self.get_json(TASK_GOAL_PATH, &[("task_name", task_name)])
    }

    fn task_metadata(&self, task_name: &str) -> Result<TaskMetadata> {
        self.get_json(TASK_METADATA_PATH, &[("task_name", task_name)])
    }

    fn task_complexity(&self, task_name: &str) -> Result<f64> {
        let raw: Value = self.get_json(TASK_COMPLEXITY_PATH, &[("task_name", task_name)])?;
        value_as_f64(&raw).ok_or_else(|| {
            anyhow!(ProtocolError::decode(format!(
                "task complexity for {} is not a number: {}",
                task_name, raw
            )))
        })
    }

    fn switch_suite_family(&self, target: SuiteFamily) -> Result<SwitchResult> {
        let url = self.url_for_path(SUITE_SWITCH_PATH);
        let builder = self
            .client
            .post(&url)
            .query(&[("target_family", target.as_str())]);
        let response = self.send("POST", &url, builder, Some(self.timeouts.extended()))?;
        Self::decode("POST", &url, response)
    }

    fn health(&self) -> Result<HealthResponse> {
        self.get_json(HEALTH_PATH, &[])
    }
}

/// Numbers may arrive as JSON numbers or numeric strings.
pub(crate) fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn truncate_error_body(raw: &str) -> String {
    const MAX_ERROR_BODY_CHARS: usize = 512;
    let normalized = raw.replace('\n', " ");
    if normalized.chars().count() <= MAX_ERROR_BODY_CHARS {
        return normalized;
    }
    normalized.chars().take(MAX_ERROR_BODY_CHARS).collect()
}
