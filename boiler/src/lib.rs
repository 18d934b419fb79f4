// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Bootstraps a Vulkan session: instance, physical device, logical device and queues.
//!
//! Instead of writing the same few hundred lines of creation code for every application, you
//! describe what you *want* and what you *need*, and the negotiation pipeline figures out what
//! this host can actually give you.
//!
//! # Brief summary of the pipeline
//!
//! - A [`SessionBuilder`] collects a [`CapabilitySet`] of desired and required layers, instance
//!   extensions and device extensions. Desired names are enabled when available and silently
//!   dropped otherwise. A missing required name is a
//!   [`MissingCapability`](BoilerError::MissingCapability) error that lists every missing name.
//!
//! - Feature pickers and validators are registered per feature tier (Vulkan 1.0, 1.1, 1.2 and
//!   1.3, see the [`features`] module). Registering one for a tier above the requested API
//!   version fails immediately with [`VersionTooLow`](BoilerError::VersionTooLow).
//!
//! - The [`InstanceNegotiator`](instance::InstanceNegotiator) resolves layers first, then
//!   instance extensions, and creates the instance through the [`Driver`](driver::Driver).
//!
//! - Every physical device is enumerated and filtered. Rejected devices are recorded with the
//!   reason they were rejected, and the best surviving device is chosen by a
//!   [`PhysicalDeviceSelector`](device::physical::PhysicalDeviceSelector).
//!
//! - The [`DeviceNegotiator`](device::DeviceNegotiator) resolves device extensions against the
//!   chosen device, takes the [`FeatureChain`](features::FeatureChain) that was built for it
//!   during filtering, asks a
//!   [`QueueFamilyMapper`](device::queue::QueueFamilyMapper) which family plays which role and
//!   creates the logical device.
//!
//! - Everything ends up in a [`SessionContext`], which destroys all of it in reverse creation
//!   order exactly once.
//!
//! # Example
//!
//! ```no_run
//! use boiler::{driver::vulkan::VulkanDriver, features::Features12, SessionBuilder, Version};
//!
//! let driver = VulkanDriver::new().unwrap();
//! let session = SessionBuilder::new(Version::V1_2, "triangle", Version::major_minor(0, 1))
//!     .desire_device_extension("VK_KHR_maintenance4")
//!     .feature_picker(|supported: &Features12| Features12 {
//!         timeline_semaphore: supported.timeline_semaphore,
//!         ..Features12::none()
//!     })
//!     .unwrap()
//!     .build(driver)
//!     .unwrap();
//!
//! if let Some(graphics) = session.queue_families().unwrap().graphics {
//!     println!("graphics work goes to queue family {}", graphics.family_index);
//! }
//! ```

pub use crate::{
    builder::SessionBuilder,
    capabilities::{CapabilityScope, CapabilitySet, NameSet},
    session::{SessionContext, SessionState},
    version::Version,
};
pub use ash::vk::Handle;
use device::physical::DeviceRejection;
use std::{error::Error, fmt};

#[macro_use]
mod tests;
mod builder;
pub mod capabilities;
pub mod debug;
pub mod device;
pub mod driver;
pub mod features;
pub mod instance;
mod macros;
pub mod session;
pub mod surface;
mod version;

/// An error that can happen while negotiating or using a session.
///
/// None of these errors are retried: the capabilities of the host do not change while the
/// process is running.
#[derive(Debug)]
pub enum BoilerError {
    /// Required layers or extensions are not available.
    MissingCapability {
        scope: CapabilityScope,
        /// Every required name that was not available, sorted.
        missing: Vec<String>,
    },

    /// A feature validator rejected the supported features of the chosen device.
    UnsupportedFeature {
        /// The API version that introduced the feature tier.
        tier: Version,
        feature: &'static str,
    },

    /// A feature picker or validator was registered for a tier that needs a higher API version
    /// than the one the session was configured with.
    VersionTooLow {
        required: Version,
        configured: Version,
    },

    /// The session was configured with an API version that the driver does not support.
    UnsupportedApiVersion {
        requested: Version,
        supported: Version,
    },

    /// Every physical device was rejected.
    NoSuitableDevice {
        /// One entry per enumerated physical device, in enumeration order.
        rejections: Vec<DeviceRejection>,
    },

    /// A call into the driver returned an error code.
    DriverCreationFailure {
        /// The Vulkan function that failed.
        function: &'static str,
        error: VulkanError,
    },

    /// The session has already been destroyed.
    UseAfterDestroy,

    /// There is no window with this index.
    MissingWindow { index: usize },

    /// A window did not provide a usable window or display handle.
    WindowHandle(raw_window_handle::HandleError),

    /// The Vulkan library could not be loaded.
    LibraryLoading(ash::LoadingError),
}

impl BoilerError {
    #[inline]
    pub(crate) fn driver(function: &'static str) -> impl FnOnce(VulkanError) -> BoilerError {
        move |error| BoilerError::DriverCreationFailure { function, error }
    }
}

impl Error for BoilerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BoilerError::DriverCreationFailure { error, .. } => Some(error),
            BoilerError::WindowHandle(err) => Some(err),
            BoilerError::LibraryLoading(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for BoilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoilerError::MissingCapability { scope, missing } => {
                write!(f, "the following required {}s are not available: ", scope)?;
                fmt_list(f, missing)
            }
            BoilerError::UnsupportedFeature { tier, feature } => write!(
                f,
                "the required feature `{}` of feature tier {} is not supported",
                feature, tier,
            ),
            BoilerError::VersionTooLow {
                required,
                configured,
            } => write!(
                f,
                "a feature tier of Vulkan {} was used, but the session is configured for Vulkan {}",
                required, configured,
            ),
            BoilerError::UnsupportedApiVersion {
                requested,
                supported,
            } => write!(
                f,
                "Vulkan {} was requested, but the driver only supports Vulkan {}",
                requested, supported,
            ),
            BoilerError::NoSuitableDevice { rejections } => {
                write!(f, "no physical device satisfies the requirements")?;

                for rejection in rejections {
                    write!(f, "\n    {}", rejection)?;
                }

                Ok(())
            }
            BoilerError::DriverCreationFailure { function, .. } => {
                write!(f, "a call to `{}` returned an error", function)
            }
            BoilerError::UseAfterDestroy => write!(f, "the session has already been destroyed"),
            BoilerError::MissingWindow { index } => write!(f, "there is no window {}", index),
            BoilerError::WindowHandle(_) => write!(f, "a window handle is not available"),
            BoilerError::LibraryLoading(_) => write!(f, "the Vulkan library could not be loaded"),
        }
    }
}

pub(crate) fn fmt_list(f: &mut fmt::Formatter<'_>, names: &[String]) -> fmt::Result {
    for (index, name) in names.iter().enumerate() {
        if index != 0 {
            write!(f, ", ")?;
        }

        write!(f, "{}", name)?;
    }

    Ok(())
}

/// An enumeration of runtime errors that can be returned by Vulkan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VulkanError {
    OutOfHostMemory,
    OutOfDeviceMemory,
    InitializationFailed,
    DeviceLost,
    LayerNotPresent,
    ExtensionNotPresent,
    FeatureNotPresent,
    IncompatibleDriver,
    TooManyObjects,
    SurfaceLost,
    NativeWindowInUse,
    ValidationFailed,
    Unknown,
    Unnamed(ash::vk::Result),
}

impl From<ash::vk::Result> for VulkanError {
    fn from(val: ash::vk::Result) -> VulkanError {
        match val {
            ash::vk::Result::ERROR_OUT_OF_HOST_MEMORY => Self::OutOfHostMemory,
            ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => Self::OutOfDeviceMemory,
            ash::vk::Result::ERROR_INITIALIZATION_FAILED => Self::InitializationFailed,
            ash::vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            ash::vk::Result::ERROR_LAYER_NOT_PRESENT => Self::LayerNotPresent,
            ash::vk::Result::ERROR_EXTENSION_NOT_PRESENT => Self::ExtensionNotPresent,
            ash::vk::Result::ERROR_FEATURE_NOT_PRESENT => Self::FeatureNotPresent,
            ash::vk::Result::ERROR_INCOMPATIBLE_DRIVER => Self::IncompatibleDriver,
            ash::vk::Result::ERROR_TOO_MANY_OBJECTS => Self::TooManyObjects,
            ash::vk::Result::ERROR_SURFACE_LOST_KHR => Self::SurfaceLost,
            ash::vk::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR => Self::NativeWindowInUse,
            ash::vk::Result::ERROR_VALIDATION_FAILED_EXT => Self::ValidationFailed,
            ash::vk::Result::ERROR_UNKNOWN => Self::Unknown,
            x => Self::Unnamed(x),
        }
    }
}

impl Error for VulkanError {}

impl fmt::Display for VulkanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VulkanError::OutOfHostMemory => write!(f, "A host memory allocation has failed."),
            VulkanError::OutOfDeviceMemory => write!(f, "A device memory allocation has failed."),
            VulkanError::InitializationFailed => write!(
                f,
                "Initialization of an object could not be completed for implementation-specific reasons.",
            ),
            VulkanError::DeviceLost => write!(f, "The logical or physical device has been lost."),
            VulkanError::LayerNotPresent => write!(
                f,
                "A requested layer is not present or could not be loaded.",
            ),
            VulkanError::ExtensionNotPresent => {
                write!(f, "A requested extension is not supported.")
            }
            VulkanError::FeatureNotPresent => write!(f, "A requested feature is not supported."),
            VulkanError::IncompatibleDriver => write!(
                f,
                "The requested version of Vulkan is not supported by the driver or is otherwise incompatible for implementation-specific reasons.",
            ),
            VulkanError::TooManyObjects => write!(
                f,
                "Too many objects of the type have already been created.",
            ),
            VulkanError::SurfaceLost => write!(f, "A surface is no longer available."),
            VulkanError::NativeWindowInUse => write!(
                f,
                "The requested window is already in use by Vulkan or another API in a manner which prevents it from being used again.",
            ),
            VulkanError::ValidationFailed => write!(f, "Validation failed."),
            VulkanError::Unknown => write!(
                f,
                "An unknown error has occurred; either the application has provided invalid input, or an implementation failure has occurred.",
            ),
            VulkanError::Unnamed(result) => write!(
                f,
                "Unnamed error, VkResult value {}",
                result.as_raw(),
            ),
        }
    }
}
