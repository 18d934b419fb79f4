// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Validation layer configuration and debug messages.
//!
//! When validation is configured, the `VK_LAYER_KHRONOS_validation` layer and the
//! `VK_EXT_debug_utils` and `VK_EXT_validation_features` extensions become required, and a debug
//! messenger forwards warnings and errors of the layer to the `log` crate.

use crate::{
    macros::{vulkan_bitflags, vulkan_enum},
    Version,
};
use smallvec::SmallVec;
use std::{
    ffi::{c_void, CStr},
    panic::{catch_unwind, AssertUnwindSafe, RefUnwindSafe},
    sync::Arc,
};

pub const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";
pub const API_DUMP_LAYER: &str = "VK_LAYER_LUNARG_api_dump";
pub const DEBUG_UTILS_EXTENSION: &str = "VK_EXT_debug_utils";
pub const VALIDATION_FEATURES_EXTENSION: &str = "VK_EXT_validation_features";

vulkan_enum! {
    /// An optional feature of the validation layer.
    ValidationFeature = ValidationFeatureEnableEXT(i32);

    GpuAssisted = GPU_ASSISTED,
    GpuAssistedReserveBindingSlot = GPU_ASSISTED_RESERVE_BINDING_SLOT,
    BestPractices = BEST_PRACTICES,
    DebugPrintf = DEBUG_PRINTF,
    SynchronizationValidation = SYNCHRONIZATION_VALIDATION,
}

/// The optional features of the validation layer to enable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ValidationFeatures {
    pub gpu_assisted: bool,
    pub gpu_assisted_reserve_binding_slot: bool,
    pub best_practices: bool,
    pub debug_printf: bool,
    pub synchronization: bool,
}

impl ValidationFeatures {
    /// The features that work well together on `api_version`.
    ///
    /// GPU-assisted validation needs Vulkan 1.1, so it is replaced by best practices on 1.0.
    pub fn defaults_for(api_version: Version) -> Self {
        if api_version < Version::V1_1 {
            ValidationFeatures {
                gpu_assisted: false,
                gpu_assisted_reserve_binding_slot: false,
                best_practices: true,
                debug_printf: true,
                synchronization: true,
            }
        } else {
            ValidationFeatures {
                gpu_assisted: true,
                gpu_assisted_reserve_binding_slot: true,
                best_practices: false,
                debug_printf: true,
                synchronization: true,
            }
        }
    }

    /// Returns the enabled features in the order they are passed to the instance.
    pub fn enabled(&self) -> SmallVec<[ValidationFeature; 5]> {
        [
            (self.gpu_assisted, ValidationFeature::GpuAssisted),
            (
                self.gpu_assisted_reserve_binding_slot,
                ValidationFeature::GpuAssistedReserveBindingSlot,
            ),
            (self.best_practices, ValidationFeature::BestPractices),
            (self.debug_printf, ValidationFeature::DebugPrintf),
            (self.synchronization, ValidationFeature::SynchronizationValidation),
        ]
        .into_iter()
        .filter_map(|(enabled, feature)| enabled.then_some(feature))
        .collect()
    }
}

vulkan_bitflags! {
    /// Severity of message.
    MessageSeverity = DebugUtilsMessageSeverityFlagsEXT(u32);

    /// An error that may cause undefined results, including an application crash.
    ERROR = ERROR,

    /// An unexpected use.
    WARNING = WARNING,

    /// An informational message that may be handy when debugging an application.
    INFO = INFO,

    /// Diagnostic information from the loader and layers.
    VERBOSE = VERBOSE,
}

vulkan_bitflags! {
    /// Type of message.
    MessageType = DebugUtilsMessageTypeFlagsEXT(u32);

    /// Specifies that some general event has occurred.
    GENERAL = GENERAL,

    /// Specifies that something has occurred during validation against the Vulkan specification.
    VALIDATION = VALIDATION,

    /// Specifies a potentially non-optimal use of Vulkan.
    PERFORMANCE = PERFORMANCE,
}

/// A message received by the debug messenger.
#[derive(Clone, Copy, Debug)]
pub struct ValidationMessage<'a> {
    pub severity: MessageSeverity,
    pub ty: MessageType,
    /// Identifier of the message, if the layer gave one.
    pub id_name: Option<&'a str>,
    pub description: &'a str,
}

/// What happens to validation errors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValidationMode {
    /// Errors are logged.
    #[default]
    Log,

    /// Errors are logged, and then the process is aborted.
    ///
    /// The abort happens inside the debug callback, on whichever thread made the offending call.
    /// Nothing is returned to the caller and no destructor runs, so the log line is the only
    /// diagnostic. A panic cannot unwind through the driver, so aborting is the only way to stop
    /// at the first validation error. To keep more than the log, pass a handler to
    /// [`SessionBuilder::validation_handler`](crate::SessionBuilder::validation_handler); it
    /// runs before the abort.
    Forbid,
}

impl ValidationMode {
    /// Returns whether a message of `severity` stops the process in this mode.
    #[inline]
    pub fn is_fatal(self, severity: MessageSeverity) -> bool {
        self == ValidationMode::Forbid && severity.intersects(MessageSeverity::ERROR)
    }
}

/// The callback of a debug messenger.
pub type ValidationHandler = Arc<dyn Fn(&ValidationMessage<'_>) + RefUnwindSafe + Send + Sync>;

/// A request for a debug messenger.
#[derive(Clone)]
pub struct DebugMessengerRequest {
    pub severity: MessageSeverity,
    pub ty: MessageType,
    pub handler: ValidationHandler,
}

impl DebugMessengerRequest {
    /// A messenger that logs warnings and errors, and handles errors according to `mode`.
    #[inline]
    pub fn logging(mode: ValidationMode) -> Self {
        Self::forwarding(mode, None)
    }

    /// Like [`logging`](Self::logging), but every message is also passed to `handler` once it
    /// is logged, before an error aborts the process.
    pub fn forwarding(mode: ValidationMode, handler: Option<ValidationHandler>) -> Self {
        DebugMessengerRequest {
            severity: MessageSeverity::WARNING | MessageSeverity::ERROR,
            ty: MessageType::GENERAL | MessageType::VALIDATION | MessageType::PERFORMANCE,
            handler: Arc::new(move |message: &ValidationMessage<'_>| {
                log_message(message);

                if let Some(handler) = &handler {
                    handler(message);
                }

                if mode.is_fatal(message.severity) {
                    std::process::abort();
                }
            }),
        }
    }
}

impl std::fmt::Debug for DebugMessengerRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugMessengerRequest")
            .field("severity", &self.severity)
            .field("ty", &self.ty)
            .finish_non_exhaustive()
    }
}

/// Forwards `message` to the `log` crate at a level that matches its severity.
pub fn log_message(message: &ValidationMessage<'_>) {
    let level = if message.severity.intersects(MessageSeverity::ERROR) {
        log::Level::Error
    } else if message.severity.intersects(MessageSeverity::WARNING) {
        log::Level::Warn
    } else if message.severity.intersects(MessageSeverity::INFO) {
        log::Level::Info
    } else {
        log::Level::Debug
    };

    log::log!(
        level,
        "[{:?}] {}: {}",
        message.ty,
        message.id_name.unwrap_or("unknown"),
        message.description,
    );
}

/// The `pfnUserCallback` of every debug messenger. `user_data` points at a [`ValidationHandler`]
/// that outlives the messenger.
pub(crate) unsafe extern "system" fn trampoline(
    message_severity: ash::vk::DebugUtilsMessageSeverityFlagsEXT,
    message_types: ash::vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const ash::vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user_data: *mut c_void,
) -> ash::vk::Bool32 {
    // Since we box the closure, the type system doesn't detect that the `UnwindSafe`
    // bound is enforced. Therefore we enforce it manually.
    let _ = catch_unwind(AssertUnwindSafe(move || {
        let handler: &ValidationHandler = unsafe { &*user_data.cast_const().cast() };
        let callback_data = unsafe { &*callback_data };

        let id_name = if callback_data.p_message_id_name.is_null() {
            None
        } else {
            unsafe { CStr::from_ptr(callback_data.p_message_id_name) }
                .to_str()
                .ok()
        };

        let description = if callback_data.p_message.is_null() {
            ""
        } else {
            unsafe { CStr::from_ptr(callback_data.p_message) }
                .to_str()
                .unwrap_or("debug callback message not utf-8")
        };

        handler(&ValidationMessage {
            severity: message_severity.into(),
            ty: message_types.into(),
            id_name,
            description,
        });
    }));

    ash::vk::FALSE
}
