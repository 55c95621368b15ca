use mw_core::{TaskScore, TAG_LANG_EN};

use crate::checker::Checker;
use crate::controller::DeviceController;
use crate::plugin::{TaskDefinition, TaskPlugin, TaskProfile, TaskSetup};
use crate::registry::RegistryBuilder;

/// The agent reports completion by answering with this word.
const COMPLETION_ANSWER: &str = "finished";

macro_rules! answer_confirmed_task {
    ($name:ident, goal: $goal:expr, app: $app:expr, done: $done:expr, not_done: $not_done:expr) => {
        pub struct $name {
            profile: TaskProfile,
            checker: Checker,
        }

        impl TaskDefinition for $name {
            fn instantiate() -> anyhow::Result<Self> {
                Ok(Self {
                    profile: TaskProfile::new($goal, &[TAG_LANG_EN], &[$app]),
                    checker: Checker::answer_contains(COMPLETION_ANSWER, $done, $not_done),
                })
            }
        }

        impl TaskPlugin for $name {
            fn profile(&self) -> &TaskProfile {
                &self.profile
            }

            fn initialize_task_hook(
                &self,
                controller: &mut dyn DeviceController,
            ) -> anyhow::Result<TaskSetup> {
                tracing::info!(device = controller.device_id(), task = stringify!($name), "initializing task");
                controller.clear_interaction_cache();
                Ok(TaskSetup::default())
            }

            fn is_successful(&self, controller: &dyn DeviceController) -> anyhow::Result<TaskScore> {
                Ok(self.checker.evaluate(controller))
            }
        }
    };
}

answer_confirmed_task!(
    SimpleAlarmTask,
    goal: "Set an alarm for 7:00 AM tomorrow",
    app: "Clock",
    done: "Alarm set successfully",
    not_done: "Alarm not set or task not completed"
);

answer_confirmed_task!(
    WifiEnableTask,
    goal: "Turn on WiFi",
    app: "Settings",
    done: "WiFi enabled successfully",
    not_done: "WiFi not enabled or task not completed"
);

answer_confirmed_task!(
    SimpleContactTask,
    goal: "Create a new contact named 'John Doe' with phone number '555-1234'",
    app: "Contacts",
    done: "Contact created successfully",
    not_done: "Contact not created or task not completed"
);

answer_confirmed_task!(
    SimpleMessageTask,
    goal: "Send a text message 'Hello World' to contact '555-5678'",
    app: "Messages",
    done: "Message sent successfully",
    not_done: "Message not sent or task not completed"
);

pub fn register(builder: &mut RegistryBuilder) {
    builder.register_type::<SimpleAlarmTask>();
    builder.register_type::<WifiEnableTask>();
    builder.register_type::<SimpleContactTask>();
    builder.register_type::<SimpleMessageTask>();
}
