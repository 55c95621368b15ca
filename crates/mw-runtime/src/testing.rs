//! In-process fakes shared by the runtime tests.

use anyhow::{anyhow, Result};
use image::{DynamicImage, RgbaImage};
use mw_core::{Screenshot, SuiteFamily, TaskMetadata};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::config::{ClientConfig, RetrySettings};
use crate::protocol::{
    EnvProtocol, EvalResponse, HealthResponse, InitRequest, ProtocolError, ScreenshotResponse,
    StepReply, StepRequest, SwitchResult, TaskRequest, TaskSummary,
};
use crate::tools::{ToolDescriptor, ToolProvider};

pub(crate) fn fast_config() -> ClientConfig {
    ClientConfig {
        step_wait_ms: 1,
        retry: RetrySettings {
            max_attempts: 3,
            base_backoff_ms: 1,
        },
        ..ClientConfig::default()
    }
}

pub(crate) fn sample_png_b64(width: u32, height: u32) -> String {
    Screenshot::from_image(DynamicImage::ImageRgba8(RgbaImage::new(width, height)))
        .expect("encode png")
        .to_b64()
}

/// Counts WARN events seen while installed as the thread's subscriber.
#[derive(Clone, Default)]
pub(crate) struct WarnCounter {
    pub count: Arc<AtomicUsize>,
}

impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == tracing::Level::WARN {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub(crate) struct FakeEnvState {
    pub init_requests: Vec<InitRequest>,
    pub screenshot_calls: usize,
    pub screenshot_failures_left: usize,
    pub screenshot_payload: Option<String>,
    pub step_requests: Vec<StepRequest>,
    pub step_reply: StepReply,
    pub task_init_requests: Vec<TaskRequest>,
    pub fail_task_init: bool,
    pub tear_down_requests: Vec<TaskRequest>,
    pub fail_tear_down: bool,
    pub eval_requests: Vec<TaskRequest>,
    pub eval: EvalResponse,
    pub metadata: HashMap<String, TaskMetadata>,
    pub task_list: Vec<TaskSummary>,
    pub switch_result: SwitchResult,
    pub switch_error: Option<String>,
    pub healthy: bool,
}

impl Default for FakeEnvState {
    fn default() -> Self {
        Self {
            init_requests: Vec::new(),
            screenshot_calls: 0,
            screenshot_failures_left: 0,
            screenshot_payload: None,
            step_requests: Vec::new(),
            step_reply: StepReply {
                status: 200,
                body: "{}".to_string(),
            },
            task_init_requests: Vec::new(),
            fail_task_init: false,
            tear_down_requests: Vec::new(),
            fail_tear_down: false,
            eval_requests: Vec::new(),
            eval: EvalResponse {
                score: Some(1.0),
                reason: Some("ok".to_string()),
            },
            metadata: HashMap::new(),
            task_list: vec![
                TaskSummary {
                    name: "SimpleAlarmTask".to_string(),
                    tags: vec!["lang-en".to_string()],
                    extra: Map::new(),
                },
                TaskSummary {
                    name: "MailSendTask".to_string(),
                    tags: vec!["lang-en".to_string(), "agent-mcp".to_string()],
                    extra: Map::new(),
                },
            ],
            switch_result: SwitchResult {
                switched: true,
                avd_name: Some("mobile_world_avd".to_string()),
                emulator_device_id: Some("emulator-5554".to_string()),
                extra: Map::new(),
            },
            switch_error: None,
            healthy: true,
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeEnvProtocol {
    state: Arc<Mutex<FakeEnvState>>,
}

impl FakeEnvProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeEnvState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn fail_next_screenshots(&self, count: usize) {
        self.state().screenshot_failures_left = count;
    }

    pub fn set_metadata(&self, task_name: &str, tags: &[&str], apps: &[&str]) {
        self.state().metadata.insert(
            task_name.to_string(),
            TaskMetadata {
                tags: tags.iter().map(|t| t.to_string()).collect(),
                apps: apps.iter().map(|a| a.to_string()).collect(),
                extra: Map::new(),
            },
        );
    }
}

impl EnvProtocol for FakeEnvProtocol {
    fn init_device(&self, request: &InitRequest) -> Result<()> {
        self.state().init_requests.push(request.clone());
        Ok(())
    }

    fn screenshot(&self, _device: &str) -> Result<ScreenshotResponse> {
        let mut state = self.state();
        state.screenshot_calls += 1;
        if state.screenshot_failures_left > 0 {
            state.screenshot_failures_left -= 1;
            return Err(anyhow!(ProtocolError::transport(format!(
                "screenshot failure {}",
                state.screenshot_calls
            ))));
        }
        let b64_png = state
            .screenshot_payload
            .clone()
            .unwrap_or_else(|| sample_png_b64(2, 3));
        Ok(ScreenshotResponse { b64_png })
    }

    fn step(&self, request: &StepRequest) -> Result<StepReply> {
        let mut state = self.state();
        state.step_requests.push(request.clone());
        Ok(state.step_reply.clone())
    }

    fn task_list(&self) -> Result<Vec<TaskSummary>> {
        Ok(self.state().task_list.clone())
    }

    fn task_init(&self, request: &TaskRequest) -> Result<()> {
        let mut state = self.state();
        state.task_init_requests.push(request.clone());
        if state.fail_task_init {
            return Err(anyhow!(ProtocolError::status(
                "env http POST /task/init failed: status=500 body=boom"
            )));
        }
        Ok(())
    }

    fn task_tear_down(&self, request: &TaskRequest) -> Result<()> {
        let mut state = self.state();
        state.tear_down_requests.push(request.clone());
        if state.fail_tear_down {
            return Err(anyhow!(ProtocolError::transport("connection reset")));
        }
        Ok(())
    }

    fn task_eval(&self, request: &TaskRequest) -> Result<EvalResponse> {
        let mut state = self.state();
        state.eval_requests.push(request.clone());
        Ok(state.eval.clone())
    }

    fn task_goal(&self, task_name: &str) -> Result<Value> {
        Ok(json!(format!("Goal of {}", task_name)))
    }

    fn task_metadata(&self, task_name: &str) -> Result<TaskMetadata> {
        self.state()
            .metadata
            .get(task_name)
            .cloned()
            .ok_or_else(|| anyhow!(ProtocolError::status(format!("unknown task {}", task_name))))
    }

    fn task_complexity(&self, _task_name: &str) -> Result<f64> {
        Ok(2.0)
    }

    fn switch_suite_family(&self, _target: SuiteFamily) -> Result<SwitchResult> {
        let state = self.state();
        if let Some(message) = state.switch_error.as_ref() {
            return Err(anyhow!(ProtocolError::transport(message.clone())));
        }
        Ok(state.switch_result.clone())
    }

    fn health(&self) -> Result<HealthResponse> {
        Ok(HealthResponse {
            ok: self.state().healthy,
        })
    }
}

/// Tool provider with a fixed catalog that records every call.
#[derive(Clone)]
pub(crate) struct FakeToolProvider {
    name: String,
    tools: Vec<ToolDescriptor>,
    reply: Value,
    pub calls: Arc<Mutex<Vec<(String, Value)>>>,
}

impl FakeToolProvider {
    pub fn new(name: &str, tool_names: &[&str], reply: Value) -> Self {
        Self {
            name: name.to_string(),
            tools: tool_names
                .iter()
                .map(|tool| ToolDescriptor::named(*tool))
                .collect(),
            reply,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ToolProvider for FakeToolProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        Ok(self.tools.clone())
    }

    fn call_tool(&self, name: &str, arguments: &Value) -> Result<Value> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((name.to_string(), arguments.clone()));
        Ok(self.reply.clone())
    }
}
