//! Compiled-in task definitions, grouped by suite.

use mw_core::SuiteFamily;

use crate::registry::RegistryBuilder;

pub mod android_world;

/// Registers every compiled-in task.
pub fn register_all(builder: &mut RegistryBuilder) {
    android_world::register(builder);
}

/// Registers the compiled-in tasks a suite family ships with.
///
/// `mobile_world` carries the android_world samples alongside its own
/// manifest-defined tasks.
pub fn register_suite(builder: &mut RegistryBuilder, family: SuiteFamily) {
    match family {
        SuiteFamily::AndroidWorld => android_world::register(builder),
        SuiteFamily::MobileWorld => register_all(builder),
    }
}
