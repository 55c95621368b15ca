use mw_core::{ActionType, JsonAction, Observation};

/// Device-control handle handed to task hooks and success checks.
pub trait DeviceController {
    fn device_id(&self) -> &str;

    /// Latest free-form answer the agent gave (or the user returned).
    fn interaction_cache(&self) -> Option<&str>;

    fn clear_interaction_cache(&mut self);
}

/// In-process controller that tracks answers from the action stream.
#[derive(Debug, Clone)]
pub struct LocalController {
    device_id: String,
    interaction_cache: Option<String>,
}

impl LocalController {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            interaction_cache: None,
        }
    }

    pub fn record_answer(&mut self, answer: impl Into<String>) {
        self.interaction_cache = Some(answer.into());
    }

    /// Picks up `answer` actions; every other action leaves the cache alone.
    pub fn record_action(&mut self, action: &JsonAction) {
        if action.action_type == ActionType::Answer {
            if let Some(text) = action.text.as_ref() {
                self.record_answer(text.clone());
            }
        }
    }

    pub fn record_observation(&mut self, observation: &Observation) {
        if let Some(response) = observation.ask_user_response.as_ref() {
            self.record_answer(response.clone());
        }
    }
}

impl DeviceController for LocalController {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn interaction_cache(&self) -> Option<&str> {
        self.interaction_cache.as_deref()
    }

    fn clear_interaction_cache(&mut self) {
        self.interaction_cache = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;
    use mw_core::Screenshot;

    #[test]
    fn only_answer_actions_update_the_cache() {
        let mut controller = LocalController::new("emulator-5556");
        controller.record_action(&JsonAction::click(1, 2));
        assert_eq!(controller.interaction_cache(), None);

        controller.record_action(&JsonAction::answer("finished"));
        assert_eq!(controller.interaction_cache(), Some("finished"));
        assert_eq!(controller.device_id(), "emulator-5556");
    }

    #[test]
    fn ask_user_responses_become_the_latest_answer() {
        let screenshot = Screenshot::from_image(DynamicImage::new_rgba8(2, 2)).expect("png");
        let mut controller = LocalController::new("emulator-5554");
        controller.record_answer("finished");

        controller.record_observation(&Observation::from_screenshot(screenshot.clone()));
        assert_eq!(controller.interaction_cache(), Some("finished"));

        let mut observation = Observation::from_screenshot(screenshot);
        observation.ask_user_response = Some("Yes, cancel the dinner".to_string());
        controller.record_observation(&observation);
        assert_eq!(controller.interaction_cache(), Some("Yes, cancel the dinner"));

        controller.clear_interaction_cache();
        assert_eq!(controller.interaction_cache(), None);
    }
}
