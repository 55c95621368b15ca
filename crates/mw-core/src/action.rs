use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Click,
    DoubleTap,
    LongPress,
    Swipe,
    Scroll,
    InputText,
    KeyboardEnter,
    NavigateHome,
    NavigateBack,
    OpenApp,
    Wait,
    Status,
    Answer,
    AskUser,
    Mcp,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::DoubleTap => "double_tap",
            Self::LongPress => "long_press",
            Self::Swipe => "swipe",
            Self::Scroll => "scroll",
            Self::InputText => "input_text",
            Self::KeyboardEnter => "keyboard_enter",
            Self::NavigateHome => "navigate_home",
            Self::NavigateBack => "navigate_back",
            Self::OpenApp => "open_app",
            Self::Wait => "wait",
            Self::Status => "status",
            Self::Answer => "answer",
            Self::AskUser => "ask_user",
            Self::Mcp => "mcp",
        }
    }
}

/// One agent action as sent to the step endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonAction {
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_status: Option<String>,
    /// Tool name for `mcp` actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_name: Option<String>,
    /// Tool arguments for `mcp` actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_json: Option<Value>,
}

impl JsonAction {
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            x: None,
            y: None,
            text: None,
            direction: None,
            app_name: None,
            goal_status: None,
            action_name: None,
            action_json: None,
        }
    }

    pub fn navigate_home() -> Self {
        Self::new(ActionType::NavigateHome)
    }

    pub fn click(x: i64, y: i64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Self::new(ActionType::Click)
        }
    }

    pub fn ask_user(question: impl Into<String>) -> Self {
        Self {
            text: Some(question.into()),
            ..Self::new(ActionType::AskUser)
        }
    }

    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::new(ActionType::Answer)
        }
    }

    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            action_name: Some(name.into()),
            action_json: Some(arguments),
            ..Self::new(ActionType::Mcp)
        }
    }

    pub fn is_tool_call(&self) -> bool {
        self.action_type == ActionType::Mcp
    }
}
