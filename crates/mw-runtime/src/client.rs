use anyhow::Result;
use mw_core::{
    decode_screenshot_b64, ActionType, EnvError, JsonAction, Observation, ObservationKind,
    OpResponse, Screenshot, SuiteFamily, TaskMetadata, TaskScore, TAG_AGENT_MCP,
};
use serde_json::Value;
use std::sync::Arc;
use std::thread;

use crate::config::ClientConfig;
use crate::protocol::{
    classify_protocol_error, EnvProtocol, HttpEnvProtocol, InitRequest, StepRequest, SwitchResult,
    TaskRequest, TaskSummary,
};

/// Session against one remote device.
///
/// One client per device session, used from one logical caller at a time.
/// Every call blocks; there is no internal locking.
pub struct EnvClient {
    protocol: Arc<dyn EnvProtocol>,
    config: ClientConfig,
    initialized: bool,
    current_task: Option<String>,
}

impl EnvClient {
    pub fn new(protocol: Arc<dyn EnvProtocol>, config: ClientConfig) -> Self {
        Self {
            protocol,
            config,
            initialized: false,
            current_task: None,
        }
    }

    /// HTTP-backed client for `config.base_url`.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let protocol = HttpEnvProtocol::new(&config.base_url, config.timeouts)?;
        tracing::info!(
            url = %config.base_url,
            device = %config.device,
            "connecting to environment server; first device setup may take several minutes"
        );
        Ok(Self::new(Arc::new(protocol), config))
    }

    pub fn from_env() -> Result<Self> {
        Self::connect(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn device(&self) -> &str {
        &self.config.device
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn current_task(&self) -> Option<&str> {
        self.current_task.as_deref()
    }

    pub fn ensure_initialized(&mut self) -> Result<(), EnvError> {
        if self.initialized {
            return Ok(());
        }
        let request = InitRequest {
            device: self.config.device.clone(),
        };
        self.protocol
            .init_device(&request)
            .map_err(|err| classify_protocol_error("failed to initialize device", &err))?;
        self.initialized = true;
        tracing::debug!(device = %self.config.device, "device initialized");
        Ok(())
    }

    /// Restarts the remote emulator on `target`'s profile.
    ///
    /// Only a confirmed switch resets the session; the device must be
    /// initialized again before the next remote call.
    pub fn switch_suite_family(&mut self, target: SuiteFamily) -> Result<SwitchResult, EnvError> {
        tracing::info!(target = %target, "switching suite family");
        let result = self.protocol.switch_suite_family(target).map_err(|err| {
            let switch_err = EnvError::SwitchFailed {
                target: target.to_string(),
                cause: err.to_string(),
            };
            tracing::error!(error = %switch_err, "suite family switch failed");
            switch_err
        })?;
        if result.switched {
            tracing::info!(
                target = %target,
                avd = result.avd_name.as_deref().unwrap_or("<unknown>"),
                emulator = result.emulator_device_id.as_deref().unwrap_or("<unknown>"),
                "suite family switched"
            );
            self.initialized = false;
            self.current_task = None;
        }
        Ok(result)
    }

    pub fn reset(&mut self, go_home: bool) -> OpResponse {
        let outcome = self.ensure_initialized().and_then(|_| {
            if go_home {
                self.execute_action(&JsonAction::navigate_home()).map(|_| ())
            } else {
                Ok(())
            }
        });
        match outcome {
            Ok(()) => OpResponse::success("Environment reset"),
            Err(err) => {
                tracing::error!(error = %err, "environment reset failed");
                OpResponse::failure(format!("Failed to reset environment: {}", err))
            }
        }
    }

    /// Reads the device screen, retrying every failure with exponential backoff.
    pub fn get_screenshot(&mut self, wait_to_stabilize: bool) -> Result<Screenshot, EnvError> {
        let retry = self.config.retry;
        let attempts = retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.screenshot_once(wait_to_stabilize) {
                Ok(screenshot) => return Ok(screenshot),
                Err(err) if attempt < attempts => {
                    let delay = retry.backoff_delay(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = attempts,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying get_screenshot after error"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn screenshot_once(&mut self, wait_to_stabilize: bool) -> Result<Screenshot, EnvError> {
        self.ensure_initialized()?;
        if wait_to_stabilize {
            thread::sleep(self.config.step_wait());
        }
        let response = self
            .protocol
            .screenshot(&self.config.device)
            .map_err(|err| classify_protocol_error("failed to get screenshot", &err))?;
        decode_screenshot_b64(&response.b64_png)
            .map_err(|err| EnvError::decode("failed to get screenshot", err))
    }

    pub fn get_observation(&mut self, kind: ObservationKind) -> Result<Observation, EnvError> {
        match kind {
            ObservationKind::Screenshot => Ok(Observation::from_screenshot(
                self.get_screenshot(true)?,
            )),
            other => Err(EnvError::Unsupported(format!(
                "observation type {} is not supported yet",
                other.as_str()
            ))),
        }
    }

    /// Sends one action, then re-reads the stabilized screen.
    pub fn execute_action(&mut self, action: &JsonAction) -> Result<Observation, EnvError> {
        self.ensure_initialized()?;
        tracing::debug!(
            action = %serde_json::to_string(action).unwrap_or_default(),
            "executing action"
        );
        let request = StepRequest {
            device: self.config.device.clone(),
            action: action.clone(),
        };
        let reply = self
            .protocol
            .step(&request)
            .map_err(|err| classify_protocol_error("failed to execute action", &err))?;
        if !(200..300).contains(&reply.status) {
            tracing::warn!(
                status = reply.status,
                body = %reply.body,
                "step endpoint returned a non-success status"
            );
        }

        let mut observation = Observation::from_screenshot(self.get_screenshot(true)?);
        if action.action_type == ActionType::AskUser {
            match reply.result_text() {
                Some(answer) => {
                    tracing::debug!(answer = %answer, "ask_user response");
                    observation.ask_user_response = Some(answer);
                }
                None => tracing::warn!(
                    status = reply.status,
                    body = %reply.body,
                    "ask_user step returned no result"
                ),
            }
        }
        Ok(observation)
    }

    /// Names of the tasks the server offers; tool-augmented tasks only when `enable_mcp`.
    pub fn get_suite_task_list(&mut self, enable_mcp: bool) -> Result<Vec<String>, EnvError> {
        self.ensure_initialized()?;
        Ok(self
            .get_task_list()?
            .into_iter()
            .filter(|task| enable_mcp || !task.tags.iter().any(|t| t == TAG_AGENT_MCP))
            .map(|task| task.name)
            .collect())
    }

    /// Raw task summaries. Does not initialize the device.
    pub fn get_task_list(&self) -> Result<Vec<TaskSummary>, EnvError> {
        self.protocol
            .task_list()
            .map_err(|err| classify_protocol_error("failed to list tasks", &err))
    }

    pub fn reinitialize_suite(&self) -> OpResponse {
        OpResponse::success("Suite reinitialized")
    }

    pub fn initialize_task(&mut self, task_name: &str) -> Result<Observation, EnvError> {
        let context = format!("failed to initialize task {}", task_name);
        let outcome = self.initialize_task_inner(task_name);
        outcome.map_err(|err| {
            let wrapped = rewrap(&context, err);
            tracing::error!(task = %task_name, error = %wrapped, "task initialization failed");
            wrapped
        })
    }

    fn initialize_task_inner(&mut self, task_name: &str) -> Result<Observation, EnvError> {
        self.ensure_initialized()?;
        self.protocol
            .task_init(&self.task_request(task_name))
            .map_err(|err| classify_protocol_error("task init", &err))?;
        let observation = Observation::from_screenshot(self.get_screenshot(true)?);
        self.current_task = Some(task_name.to_string());
        tracing::debug!(task = %task_name, "task initialized");
        Ok(observation)
    }

    /// Never fails; the outcome is reported in the response. The current task
    /// is cleared whether or not the remote side accepted the teardown.
    pub fn tear_down_task(&mut self, task_name: &str) -> OpResponse {
        let request = self.task_request(task_name);
        let outcome = self.ensure_initialized().and_then(|_| {
            self.protocol
                .task_tear_down(&request)
                .map_err(|err| classify_protocol_error("task tear down", &err))
        });
        self.current_task = None;
        match outcome {
            Ok(()) => OpResponse::success(format!("Task {} torn down", task_name)),
            Err(err) => {
                tracing::error!(task = %task_name, error = %err, "task teardown failed");
                OpResponse::failure(format!("Failed to tear down task {}: {}", task_name, err))
            }
        }
    }

    pub fn get_task_score(&mut self, task_name: &str) -> Result<TaskScore, EnvError> {
        let context = format!("failed to get task score for {}", task_name);
        self.ensure_initialized()
            .map_err(|err| rewrap(&context, err))?;
        let response = self
            .protocol
            .task_eval(&self.task_request(task_name))
            .map_err(|err| {
                tracing::error!(task = %task_name, error = %err, "task evaluation failed");
                classify_protocol_error(context.clone(), &err)
            })?;
        Ok(TaskScore::new(
            response.score.unwrap_or(0.0),
            response
                .reason
                .unwrap_or_else(|| format!("No reason provided for {}", task_name)),
        ))
    }

    pub fn get_task_goal(&mut self, task_name: &str) -> Result<String, EnvError> {
        self.ensure_initialized()?;
        let goal = self
            .protocol
            .task_goal(task_name)
            .map_err(|err| classify_protocol_error("failed to get task goal", &err))?;
        Ok(match goal {
            Value::String(text) => text,
            other => other.to_string(),
        })
    }

    pub fn get_task_metadata(&mut self, task_name: &str) -> Result<TaskMetadata, EnvError> {
        self.ensure_initialized()?;
        self.protocol
            .task_metadata(task_name)
            .map_err(|err| classify_protocol_error("failed to get task metadata", &err))
    }

    pub fn get_task_complexity(&mut self, task_name: &str) -> Result<f64, EnvError> {
        self.ensure_initialized()?;
        self.protocol
            .task_complexity(task_name)
            .map_err(|err| classify_protocol_error("failed to get task complexity", &err))
    }

    /// Never fails; an unreachable or unhappy server reads as unhealthy.
    pub fn health(&self) -> bool {
        match self.protocol.health() {
            Ok(response) => response.ok,
            Err(err) => {
                tracing::warn!(error = %err, "environment is not healthy");
                false
            }
        }
    }

    pub fn close(&mut self) {
        tracing::debug!(device = %self.config.device, "closing environment client");
    }

    fn task_request(&self, task_name: &str) -> TaskRequest {
        TaskRequest {
            task_name: task_name.to_string(),
            req_device: self.config.device.clone(),
        }
    }
}

/// Re-labels `err` under `context`, keeping its kind.
pub(crate) fn rewrap(context: &str, err: EnvError) -> EnvError {
    match err {
        EnvError::Decode { .. } => EnvError::decode(context, err),
        EnvError::Transport { .. } | EnvError::SwitchFailed { .. } => {
            EnvError::transport(context, err)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, RetrySettings};
    use crate::protocol::{EvalResponse, StepReply};
    use crate::testing::{fast_config, FakeEnvProtocol, WarnCounter};
    use mw_core::{ErrorKind, OutcomeKind};
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use tracing_subscriber::layer::SubscriberExt;

    fn client(fake: &FakeEnvProtocol) -> EnvClient {
        EnvClient::new(Arc::new(fake.clone()), fast_config())
    }

    #[test]
    fn lazy_initialization_happens_once() {
        let fake = FakeEnvProtocol::new();
        let mut env = client(&fake);
        assert!(!env.is_initialized());

        env.ensure_initialized().expect("init");
        env.get_screenshot(false).expect("screenshot");
        env.get_task_goal("SimpleAlarmTask").expect("goal");
        env.execute_action(&JsonAction::click(10, 20)).expect("step");

        let state = fake.state();
        assert_eq!(state.init_requests.len(), 1);
        assert_eq!(state.init_requests[0].device, "emulator-5554");
    }

    #[test]
    fn switch_health_and_raw_task_list_skip_initialization() {
        let fake = FakeEnvProtocol::new();
        let mut env = client(&fake);
        assert!(env.health());
        env.get_task_list().expect("list");
        env.switch_suite_family(SuiteFamily::AndroidWorld)
            .expect("switch");
        assert!(fake.state().init_requests.is_empty());
    }

    #[test]
    fn screenshot_retries_then_succeeds_with_two_warnings() {
        let fake = FakeEnvProtocol::new();
        fake.fail_next_screenshots(2);
        let mut env = client(&fake);

        let counter = WarnCounter::default();
        let subscriber = tracing_subscriber::registry().with(counter.clone());
        let screenshot = tracing::subscriber::with_default(subscriber, || env.get_screenshot(false))
            .expect("third attempt succeeds");

        assert_eq!((screenshot.width(), screenshot.height()), (2, 3));
        assert_eq!(counter.count.load(Ordering::SeqCst), 2);
        assert_eq!(fake.state().screenshot_calls, 3);
    }

    #[test]
    fn screenshot_exhaustion_propagates_the_final_error_kind() {
        let fake = FakeEnvProtocol::new();
        fake.fail_next_screenshots(3);
        let mut env = client(&fake);
        let err = env.get_screenshot(false).expect_err("three failures");
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.to_string().contains("screenshot failure 3"), "{}", err);

        fake.state().screenshot_payload = Some("bm90IGEgcG5n".to_string());
        let err = env.get_screenshot(false).expect_err("undecodable");
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn confirmed_switch_forces_reinitialization() {
        let fake = FakeEnvProtocol::new();
        let mut env = client(&fake);
        env.initialize_task("SimpleAlarmTask").expect("task init");
        assert_eq!(env.current_task(), Some("SimpleAlarmTask"));

        let result = env
            .switch_suite_family(SuiteFamily::AndroidWorld)
            .expect("switch");
        assert!(result.switched);
        assert!(!env.is_initialized());
        assert_eq!(env.current_task(), None);

        env.get_screenshot(false).expect("screenshot");
        assert_eq!(fake.state().init_requests.len(), 2);
    }

    #[test]
    fn unconfirmed_or_failed_switch_keeps_state() {
        let fake = FakeEnvProtocol::new();
        let mut env = client(&fake);
        env.ensure_initialized().expect("init");

        fake.state().switch_result = SwitchResult::default();
        let result = env
            .switch_suite_family(SuiteFamily::MobileWorld)
            .expect("switch");
        assert!(!result.switched);
        assert!(env.is_initialized());

        fake.state().switch_error = Some("emulator crashed".to_string());
        let err = env
            .switch_suite_family(SuiteFamily::AndroidWorld)
            .expect_err("switch failure");
        assert!(matches!(err, EnvError::SwitchFailed { .. }));
        assert!(err.to_string().contains("android_world"));
        assert!(env.is_initialized());
    }

    #[test]
    fn ask_user_attaches_the_step_result() {
        let fake = FakeEnvProtocol::new();
        fake.state().step_reply = StepReply {
            status: 200,
            body: json!({"result": "Next Tuesday"}).to_string(),
        };
        let mut env = client(&fake);
        let observation = env
            .execute_action(&JsonAction::ask_user("Which day?"))
            .expect("ask");
        assert_eq!(observation.ask_user_response.as_deref(), Some("Next Tuesday"));

        let observation = env.execute_action(&JsonAction::click(1, 1)).expect("click");
        assert_eq!(observation.ask_user_response, None);

        fake.state().step_reply = StepReply {
            status: 500,
            body: "oops".to_string(),
        };
        let observation = env
            .execute_action(&JsonAction::ask_user("Again?"))
            .expect("non-2xx step is not an error");
        assert_eq!(observation.ask_user_response, None);

        fake.state().step_reply = StepReply {
            status: 200,
            body: json!({"result": null}).to_string(),
        };
        let observation = env
            .execute_action(&JsonAction::ask_user("Still there?"))
            .expect("null result");
        assert_eq!(observation.ask_user_response, None);
    }

    #[test]
    fn teardown_clears_current_task_even_on_failure() {
        let fake = FakeEnvProtocol::new();
        let mut env = client(&fake);
        env.initialize_task("SimpleMessageTask").expect("init");
        fake.state().fail_tear_down = true;

        let response = env.tear_down_task("SimpleMessageTask");
        assert_eq!(response.kind, OutcomeKind::Failure);
        assert!(response.message.contains("SimpleMessageTask"));
        assert_eq!(env.current_task(), None);
    }

    #[test]
    fn teardown_against_unreachable_endpoint_reports_failure() {
        let config = ClientConfig {
            retry: RetrySettings {
                max_attempts: 1,
                base_backoff_ms: 1,
            },
            ..ClientConfig::default()
        }
        .with_endpoint("http://127.0.0.1:1", "emulator-5554");
        let mut env = EnvClient::connect(config).expect("client");
        let response = env.tear_down_task("SimpleContactTask");
        assert_eq!(response.kind, OutcomeKind::Failure);
        assert!(
            response.message.contains("SimpleContactTask"),
            "{}",
            response.message
        );
        assert!(!env.health());
    }

    #[test]
    fn score_defaults_fill_missing_fields() {
        let fake = FakeEnvProtocol::new();
        let mut env = client(&fake);
        fake.state().eval = EvalResponse::default();
        let score = env.get_task_score("WifiEnableTask").expect("score");
        assert_eq!(score.score, 0.0);
        assert_eq!(score.reason, "No reason provided for WifiEnableTask");

        fake.state().eval = EvalResponse {
            score: Some(1.0),
            reason: Some("WiFi enabled successfully".to_string()),
        };
        let score = env.get_task_score("WifiEnableTask").expect("score");
        assert_eq!(score.score, 1.0);
        assert_eq!(fake.state().eval_requests[1].task_name, "WifiEnableTask");
    }

    #[test]
    fn task_is_recorded_only_after_its_first_screenshot() {
        let fake = FakeEnvProtocol::new();
        let mut env = client(&fake);
        env.ensure_initialized().expect("init");
        fake.fail_next_screenshots(3);

        let err = env
            .initialize_task("SimpleCalendarTask")
            .expect_err("screenshot exhausted");
        assert!(err.to_string().starts_with("failed to initialize task SimpleCalendarTask"));
        assert_eq!(env.current_task(), None);
        assert_eq!(fake.state().task_init_requests.len(), 1);

        env.initialize_task("SimpleCalendarTask").expect("screenshot recovers");
        assert_eq!(env.current_task(), Some("SimpleCalendarTask"));
    }

    #[test]
    fn task_init_failure_is_wrapped_with_the_task_name() {
        let fake = FakeEnvProtocol::new();
        fake.state().fail_task_init = true;
        let mut env = client(&fake);
        let err = env.initialize_task("SimpleAlarmTask").expect_err("init fails");
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.to_string().starts_with("failed to initialize task SimpleAlarmTask"));
        assert_eq!(env.current_task(), None);
    }

    #[test]
    fn suite_task_list_hides_tool_tasks_unless_enabled() {
        let fake = FakeEnvProtocol::new();
        let mut env = client(&fake);
        assert_eq!(
            env.get_suite_task_list(false).expect("list"),
            vec!["SimpleAlarmTask".to_string()]
        );
        assert_eq!(env.get_suite_task_list(true).expect("list").len(), 2);
    }

    #[test]
    fn accessibility_observations_are_unsupported() {
        let fake = FakeEnvProtocol::new();
        let mut env = client(&fake);
        let err = env
            .get_observation(ObservationKind::AccessibilityTree)
            .expect_err("unsupported");
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert!(env.get_observation(ObservationKind::Screenshot).is_ok());
    }

    #[test]
    fn reset_navigates_home_when_asked() {
        let fake = FakeEnvProtocol::new();
        let mut env = client(&fake);
        assert!(env.reset(false).is_success());
        assert!(fake.state().step_requests.is_empty());
        assert!(env.reset(true).is_success());
        assert_eq!(
            fake.state().step_requests[0].action.action_type,
            ActionType::NavigateHome
        );
        assert!(env.reinitialize_suite().is_success());
    }
}
