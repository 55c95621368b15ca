pub mod checker;
pub mod controller;
pub mod definitions;
pub mod info;
pub mod manifest;
pub mod plugin;
pub mod registry;

pub use checker::{Checker, CheckerSpec};
pub use controller::{DeviceController, LocalController};
pub use manifest::{DefinitionUnit, ManifestTask, TaskLoadError, UnitLoader};
pub use plugin::{TaskDefinition, TaskPlugin, TaskProfile, TaskRun, TaskRunError, TaskSetup};
pub use registry::{RegisteredTask, RegistryBuilder, ScanLog, TaskRegistry, TaskSource};
