// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Negotiating the instance.
//!
//! Layers are resolved first, because enabled layers can provide instance extensions of their
//! own. The instance extensions are then resolved against the extensions of the driver and of
//! every enabled layer.

use crate::{
    capabilities::{CapabilityScope, CapabilitySet},
    debug::ValidationFeature,
    driver::{Driver, InstanceCreateRequest, InstanceDriver},
    BoilerError, NameSet, Version, VulkanError,
};
use std::sync::Arc;

pub const PORTABILITY_ENUMERATION_EXTENSION: &str = "VK_KHR_portability_enumeration";
pub const GET_PHYSICAL_DEVICE_PROPERTIES2_EXTENSION: &str =
    "VK_KHR_get_physical_device_properties2";

/// Replaces the default instance creation call.
pub type InstanceCreator = Box<
    dyn Fn(&dyn Driver, &InstanceCreateRequest) -> Result<Arc<dyn InstanceDriver>, VulkanError>
        + Send
        + Sync,
>;

/// Can change the instance creation request right before the instance is created.
pub type InstanceCreationHook = Box<dyn Fn(&mut InstanceCreateRequest) + Send + Sync>;

/// Describes the application to the driver.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ApplicationInfo {
    pub application_name: String,
    pub application_version: Version,
    pub engine_name: String,
    pub engine_version: Version,
    /// The API version of the session. The patch number is always 0.
    pub api_version: Version,
}

impl ApplicationInfo {
    /// Describes an application that runs on the default engine.
    pub fn new(
        api_version: Version,
        application_name: impl Into<String>,
        application_version: Version,
    ) -> Self {
        if api_version.patch != 0 {
            log::debug!(
                "ignoring the patch number of requested API version {}",
                api_version,
            );
        }

        ApplicationInfo {
            application_name: application_name.into(),
            application_version,
            engine_name: "boiler".to_owned(),
            engine_version: Version::major_minor(0, 1),
            api_version: api_version.without_patch(),
        }
    }
}

/// Creates the instance.
pub struct InstanceNegotiator<'a> {
    pub application: &'a ApplicationInfo,
    pub capabilities: &'a CapabilitySet,
    /// Only passed on when not empty.
    pub validation_features: &'a [ValidationFeature],
    pub hooks: &'a [InstanceCreationHook],
    pub creator: Option<&'a InstanceCreator>,
}

/// The outcome of instance negotiation.
pub struct NegotiatedInstance {
    pub instance: Arc<dyn InstanceDriver>,
    pub enabled_layers: NameSet,
    pub enabled_extensions: NameSet,
}

impl InstanceNegotiator<'_> {
    /// Resolves the layers and instance extensions, and creates the instance.
    pub fn negotiate(&self, driver: &dyn Driver) -> Result<NegotiatedInstance, BoilerError> {
        let supported = driver
            .api_version()
            .map_err(BoilerError::driver("vkEnumerateInstanceVersion"))?;

        if self.application.api_version > supported.without_patch() {
            return Err(BoilerError::UnsupportedApiVersion {
                requested: self.application.api_version,
                supported,
            });
        }

        let available_layers = driver
            .layer_names()
            .map_err(BoilerError::driver("vkEnumerateInstanceLayerProperties"))?;
        let enabled_layers = self
            .capabilities
            .resolve(CapabilityScope::Layer, &available_layers)?;

        let mut available_extensions = driver
            .instance_extension_names(None)
            .map_err(BoilerError::driver("vkEnumerateInstanceExtensionProperties"))?;

        for layer in &enabled_layers {
            available_extensions.extend(
                driver
                    .instance_extension_names(Some(layer))
                    .map_err(BoilerError::driver("vkEnumerateInstanceExtensionProperties"))?,
            );
        }

        let enabled_extensions = self
            .capabilities
            .resolve(CapabilityScope::InstanceExtension, &available_extensions)?;

        let mut request = InstanceCreateRequest {
            application_name: self.application.application_name.clone(),
            application_version: self.application.application_version,
            engine_name: self.application.engine_name.clone(),
            engine_version: self.application.engine_version,
            api_version: self.application.api_version,
            enumerate_portability: enabled_extensions.contains(PORTABILITY_ENUMERATION_EXTENSION),
            enabled_layers,
            enabled_extensions,
            validation_features: self.validation_features.iter().copied().collect(),
        };

        for hook in self.hooks {
            hook(&mut request);
        }

        let instance = match self.creator {
            Some(creator) => creator(driver, &request),
            None => driver.create_instance(&request),
        }
        .map_err(BoilerError::driver("vkCreateInstance"))?;

        log::debug!("created instance for Vulkan {}", request.api_version);

        Ok(NegotiatedInstance {
            instance,
            enabled_layers: request.enabled_layers,
            enabled_extensions: request.enabled_extensions,
        })
    }
}
