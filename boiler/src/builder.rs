// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use crate::{
    capabilities::{CapabilityScope, CapabilitySet},
    debug::{
        DebugMessengerRequest, ValidationFeatures, ValidationHandler, ValidationMessage,
        ValidationMode, API_DUMP_LAYER, DEBUG_UTILS_EXTENSION, VALIDATION_FEATURES_EXTENSION,
        VALIDATION_LAYER,
    },
    device::{
        physical::{
            DeviceFilter, DeviceRequirement, PhysicalDeviceCandidate, PhysicalDeviceSelector,
            PhysicalDeviceType, SimpleDeviceSelector,
        },
        queue::{MinimalQueueFamilyMapper, QueueFamilyMapper},
        DeviceCreationHook, DeviceCreator, DeviceNegotiator,
    },
    driver::{DeviceCreateRequest, DeviceDriver, Driver, InstanceCreateRequest, InstanceDriver},
    features::{FeatureCheck, FeaturePolicies, FeatureTier},
    instance::{
        ApplicationInfo, InstanceCreationHook, InstanceCreator, InstanceNegotiator,
        GET_PHYSICAL_DEVICE_PROPERTIES2_EXTENSION, PORTABILITY_ENUMERATION_EXTENSION,
    },
    session::{ExternalInstance, SessionContext},
    surface::{
        self, SessionWindow, GET_SURFACE_CAPABILITIES2_EXTENSION, SURFACE_MAINTENANCE1_EXTENSION,
        SWAPCHAIN_EXTENSION, SWAPCHAIN_MAINTENANCE1_EXTENSION,
    },
    BoilerError, Version, VulkanError,
};
use ash::vk;
use std::{fmt, panic::RefUnwindSafe, sync::Arc, time::Duration};

/// Device extensions that memory allocators use when they are available, and that are core
/// since Vulkan 1.1.
const ALLOCATOR_DEVICE_EXTENSIONS: [&str; 4] = [
    "VK_KHR_dedicated_allocation",
    "VK_KHR_get_memory_requirements2",
    "VK_KHR_bind_memory2",
    "VK_EXT_memory_budget",
];

/// Configures and builds a [`SessionContext`].
///
/// Every setter consumes the builder and returns it. Setters that register something for a
/// feature tier return [`BoilerError::VersionTooLow`] right away when the tier needs a higher
/// API version than the session.
pub struct SessionBuilder {
    application: ApplicationInfo,
    capabilities: CapabilitySet,
    policies: FeaturePolicies,
    requirements: Vec<Box<dyn DeviceRequirement>>,
    selector: Box<dyn PhysicalDeviceSelector>,
    mapper: Box<dyn QueueFamilyMapper>,
    validation: Option<ValidationFeatures>,
    validation_mode: ValidationMode,
    validation_handler: Option<ValidationHandler>,
    api_dump: bool,
    verbose_rejections: bool,
    windows: Vec<Arc<dyn SessionWindow>>,
    instance_creator: Option<InstanceCreator>,
    device_creator: Option<DeviceCreator>,
    instance_hooks: Vec<InstanceCreationHook>,
    device_hooks: Vec<DeviceCreationHook>,
    external_instance: Option<Arc<dyn ExternalInstance>>,
    default_timeout: Duration,
}

impl SessionBuilder {
    /// Starts a session for Vulkan `api_version`. The patch number is ignored.
    pub fn new(
        api_version: Version,
        application_name: impl Into<String>,
        application_version: Version,
    ) -> Self {
        let application = ApplicationInfo::new(api_version, application_name, application_version);

        SessionBuilder {
            policies: FeaturePolicies::new(application.api_version),
            application,
            capabilities: CapabilitySet::new(),
            requirements: Vec::new(),
            selector: Box::new(SimpleDeviceSelector::default()),
            mapper: Box::new(MinimalQueueFamilyMapper),
            validation: None,
            validation_mode: ValidationMode::Log,
            validation_handler: None,
            api_dump: false,
            verbose_rejections: false,
            windows: Vec::new(),
            instance_creator: None,
            device_creator: None,
            instance_hooks: Vec::new(),
            device_hooks: Vec::new(),
            external_instance: None,
            default_timeout: Duration::from_secs(1),
        }
    }

    /// Sets the engine name and version. The default is `boiler` 0.1.0.
    pub fn engine(mut self, name: impl Into<String>, version: Version) -> Self {
        self.application.engine_name = name.into();
        self.application.engine_version = version;
        self
    }

    /// Enables `layer` if it is available.
    pub fn desire_layer(mut self, layer: impl Into<String>) -> Self {
        self.capabilities.desire(CapabilityScope::Layer, layer);
        self
    }

    /// Enables `layer`, and fails if it is not available.
    pub fn require_layer(mut self, layer: impl Into<String>) -> Self {
        self.capabilities.require(CapabilityScope::Layer, layer);
        self
    }

    /// Enables instance extension `extension` if it is available.
    pub fn desire_instance_extension(mut self, extension: impl Into<String>) -> Self {
        self.capabilities
            .desire(CapabilityScope::InstanceExtension, extension);
        self
    }

    /// Enables instance extension `extension`, and fails if it is not available.
    pub fn require_instance_extension(mut self, extension: impl Into<String>) -> Self {
        self.capabilities
            .require(CapabilityScope::InstanceExtension, extension);
        self
    }

    /// Enables device extension `extension` if the chosen device supports it.
    pub fn desire_device_extension(mut self, extension: impl Into<String>) -> Self {
        self.capabilities
            .desire(CapabilityScope::DeviceExtension, extension);
        self
    }

    /// Enables device extension `extension`, and rejects devices that don't support it.
    pub fn require_device_extension(mut self, extension: impl Into<String>) -> Self {
        self.capabilities
            .require(CapabilityScope::DeviceExtension, extension);
        self
    }

    /// Registers a picker for feature tier `F`.
    ///
    /// The picker receives the features the device supports, and returns the ones to enable.
    /// The features returned by all pickers of a tier are combined.
    pub fn feature_picker<F: FeatureTier>(
        mut self,
        picker: impl Fn(&F) -> F + Send + Sync + 'static,
    ) -> Result<Self, BoilerError> {
        self.policies.add_picker::<F>(picker)?;
        Ok(self)
    }

    /// Enables the features of `required`, and rejects devices that don't support all of them.
    pub fn required_features<F: FeatureTier>(mut self, required: F) -> Result<Self, BoilerError> {
        self.policies.add_validator::<F>(required)?;
        self.policies.add_picker::<F>(move |_: &F| required)?;
        Ok(self)
    }

    /// Rejects devices for which `check` returns false. `name` is reported as the missing
    /// feature.
    pub fn feature_validator<F: FeatureTier>(
        mut self,
        name: &'static str,
        check: impl Fn(&F) -> bool + Send + Sync + 'static,
    ) -> Result<Self, BoilerError> {
        self.policies
            .add_validator::<F>(FeatureCheck::new(name, check))?;
        Ok(self)
    }

    /// Rejects devices for which `requirement` returns false.
    pub fn extra_device_requirement(
        mut self,
        requirement: impl Fn(&PhysicalDeviceCandidate) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.requirements.push(Box::new(requirement));
        self
    }

    /// Replaces the way a physical device is chosen among the suitable ones.
    pub fn physical_device_selector(
        mut self,
        selector: impl PhysicalDeviceSelector + 'static,
    ) -> Self {
        self.selector = Box::new(selector);
        self
    }

    /// Prefers the device types in the order they are given.
    ///
    /// The default is discrete GPUs, then integrated GPUs.
    pub fn device_types(self, preferred: impl IntoIterator<Item = PhysicalDeviceType>) -> Self {
        self.physical_device_selector(SimpleDeviceSelector::new(preferred))
    }

    /// Replaces the way queue families are mapped to roles.
    pub fn queue_family_mapper(mut self, mapper: impl QueueFamilyMapper + 'static) -> Self {
        self.mapper = Box::new(mapper);
        self
    }

    /// Enables the validation layer with the default validation features of the API version.
    pub fn validation(self) -> Self {
        let features = ValidationFeatures::defaults_for(self.application.api_version);
        self.validation_features(features)
    }

    /// Enables the validation layer with `features`.
    pub fn validation_features(mut self, features: ValidationFeatures) -> Self {
        self.validation = Some(features);
        self
    }

    /// Aborts the process on the first validation error, after logging it.
    ///
    /// Warnings are still only logged.
    pub fn forbid_validation_errors(mut self) -> Self {
        self.validation_mode = ValidationMode::Forbid;
        self
    }

    /// Passes every warning and error of the validation layer to `handler`, after it is logged.
    ///
    /// Only has an effect together with [`validation`](Self::validation) or
    /// [`forbid_validation_errors`](Self::forbid_validation_errors).
    pub fn validation_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ValidationMessage<'_>) + RefUnwindSafe + Send + Sync + 'static,
    {
        self.validation_handler = Some(Arc::new(handler));
        self
    }

    /// Enables the API dump layer, which prints every Vulkan call.
    pub fn api_dump(mut self) -> Self {
        self.api_dump = true;
        self
    }

    /// Logs why each rejected physical device was rejected.
    pub fn print_device_rejection_info(mut self) -> Self {
        self.verbose_rejections = true;
        self
    }

    /// Adds a window to present to. The chosen device must be able to present to every window
    /// from a single queue family.
    ///
    /// Windows are numbered in the order they are added.
    pub fn add_window(mut self, window: Arc<dyn SessionWindow>) -> Self {
        self.windows.push(window);
        self
    }

    /// Replaces the instance creation call.
    ///
    /// # Panics
    ///
    /// - Panics if an instance creator was already set.
    pub fn instance_creator(
        mut self,
        creator: impl Fn(
                &dyn Driver,
                &InstanceCreateRequest,
            ) -> Result<Arc<dyn InstanceDriver>, VulkanError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        assert!(
            self.instance_creator.is_none(),
            "an instance creator was already set",
        );
        self.instance_creator = Some(Box::new(creator));
        self
    }

    /// Replaces the device creation call.
    ///
    /// # Panics
    ///
    /// - Panics if a device creator was already set.
    pub fn device_creator(
        mut self,
        creator: impl Fn(
                &dyn InstanceDriver,
                vk::PhysicalDevice,
                &DeviceCreateRequest,
            ) -> Result<Arc<dyn DeviceDriver>, VulkanError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        assert!(
            self.device_creator.is_none(),
            "a device creator was already set",
        );
        self.device_creator = Some(Box::new(creator));
        self
    }

    /// Runs `hook` on the instance creation request right before the instance is created.
    pub fn before_instance_creation(
        mut self,
        hook: impl Fn(&mut InstanceCreateRequest) + Send + Sync + 'static,
    ) -> Self {
        self.instance_hooks.push(Box::new(hook));
        self
    }

    /// Runs `hook` on the device creation request right before the device is created.
    pub fn before_device_creation(
        mut self,
        hook: impl Fn(&mut DeviceCreateRequest) + Send + Sync + 'static,
    ) -> Self {
        self.device_hooks.push(Box::new(hook));
        self
    }

    /// Runs the session on top of `external_instance`, whose required extensions become
    /// required extensions of the session.
    pub fn external_instance(mut self, external_instance: Arc<dyn ExternalInstance>) -> Self {
        self.external_instance = Some(external_instance);
        self
    }

    /// Sets the timeout that collaborators should use when waiting on the device. The default
    /// is one second.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Adds the capabilities that the rest of the configuration implies.
    fn add_implicit_capabilities(&mut self) -> Result<(), BoilerError> {
        let api_version = self.application.api_version;
        let capabilities = &mut self.capabilities;

        capabilities.desire(
            CapabilityScope::InstanceExtension,
            PORTABILITY_ENUMERATION_EXTENSION,
        );

        if api_version < Version::V1_1 {
            capabilities.desire(
                CapabilityScope::InstanceExtension,
                GET_PHYSICAL_DEVICE_PROPERTIES2_EXTENSION,
            );

            for extension in ALLOCATOR_DEVICE_EXTENSIONS {
                capabilities.desire(CapabilityScope::DeviceExtension, extension);
            }
        }

        for window in &self.windows {
            let (display, _) = surface::raw_handles(&**window)?;

            for extension in surface::required_extensions(display) {
                capabilities.require(CapabilityScope::InstanceExtension, extension);
            }
        }

        if !self.windows.is_empty() {
            capabilities.desire(
                CapabilityScope::InstanceExtension,
                SURFACE_MAINTENANCE1_EXTENSION,
            );
            capabilities.desire(
                CapabilityScope::InstanceExtension,
                GET_SURFACE_CAPABILITIES2_EXTENSION,
            );
            capabilities.require(CapabilityScope::DeviceExtension, SWAPCHAIN_EXTENSION);
            capabilities.desire(
                CapabilityScope::DeviceExtension,
                SWAPCHAIN_MAINTENANCE1_EXTENSION,
            );
        }

        if self.validation.is_some() {
            capabilities.require(CapabilityScope::Layer, VALIDATION_LAYER);
            capabilities.require(CapabilityScope::InstanceExtension, DEBUG_UTILS_EXTENSION);
            capabilities.require(
                CapabilityScope::InstanceExtension,
                VALIDATION_FEATURES_EXTENSION,
            );
        }

        if self.validation_mode == ValidationMode::Forbid {
            capabilities.require(CapabilityScope::InstanceExtension, DEBUG_UTILS_EXTENSION);
        }

        if self.api_dump {
            capabilities.require(CapabilityScope::Layer, API_DUMP_LAYER);
        }

        if let Some(external_instance) = &self.external_instance {
            for extension in external_instance.required_instance_extensions() {
                capabilities.require(CapabilityScope::InstanceExtension, extension);
            }

            for extension in external_instance.required_device_extensions() {
                capabilities.require(CapabilityScope::DeviceExtension, extension);
            }
        }

        Ok(())
    }

    /// Negotiates the instance, the debug messenger, the surfaces and the device, in that
    /// order.
    ///
    /// When a stage fails, everything created by the stages before it is destroyed again.
    pub fn build(mut self, driver: Arc<dyn Driver>) -> Result<SessionContext, BoilerError> {
        self.add_implicit_capabilities()?;

        let mut session = SessionContext::new(
            driver.clone(),
            self.application.clone(),
            self.default_timeout,
            self.windows.clone(),
            self.external_instance.take(),
        );

        let validation_features = self
            .validation
            .map(|features| features.enabled())
            .unwrap_or_default();

        let negotiated = InstanceNegotiator {
            application: &self.application,
            capabilities: &self.capabilities,
            validation_features: &validation_features,
            hooks: &self.instance_hooks,
            creator: self.instance_creator.as_ref(),
        }
        .negotiate(&*driver)?;
        session.set_instance(negotiated);

        let instance = session.instance()?.clone();

        if self.validation.is_some() || self.validation_mode == ValidationMode::Forbid {
            let messenger = instance
                .create_debug_messenger(DebugMessengerRequest::forwarding(
                    self.validation_mode,
                    self.validation_handler.clone(),
                ))
                .map_err(BoilerError::driver("vkCreateDebugUtilsMessengerEXT"))?;
            session.set_debug_messenger(messenger);
        }

        let mut surfaces = Vec::with_capacity(self.windows.len());

        for window in &self.windows {
            let (display, handle) = surface::raw_handles(&**window)?;
            // The session keeps the window alive until the surface is destroyed.
            let surface = unsafe { instance.create_surface(display, handle) }
                .map_err(BoilerError::driver("vkCreateSurfaceKHR"))?;
            session.push_surface(surface);
            surfaces.push(surface);
        }

        let candidate = DeviceFilter {
            api_version: self.application.api_version,
            capabilities: &self.capabilities,
            enabled_layers: session.enabled_layers()?,
            policies: &self.policies,
            requirements: &self.requirements,
            surfaces: &surfaces,
        }
        .select(&*instance, &*self.selector, self.verbose_rejections)?;

        let negotiated = DeviceNegotiator {
            capabilities: &self.capabilities,
            mapper: &*self.mapper,
            hooks: &self.device_hooks,
            creator: self.device_creator.as_ref(),
        }
        .negotiate(&*instance, &candidate)?;

        session.set_device(candidate.handle, candidate.properties, negotiated);
        session.finish();

        Ok(session)
    }
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("application", &self.application)
            .field("capabilities", &self.capabilities)
            .field("policies", &self.policies)
            .field("validation", &self.validation)
            .field("validation_mode", &self.validation_mode)
            .field("validation_handler", &self.validation_handler.is_some())
            .field("api_dump", &self.api_dump)
            .field("windows", &self.windows.len())
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}
