// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Negotiating the logical device.
//!
//! Once a physical device is chosen, its extensions are resolved against the device-scope
//! capabilities, the feature chain is built, the queue families are mapped to roles, and the
//! device is created with one queue per distinct family.

use self::{
    physical::PhysicalDeviceCandidate,
    queue::{QueueFamilies, QueueFamilyMapper, QueueFamilyMapping},
};
use crate::{
    capabilities::{CapabilityScope, CapabilitySet},
    driver::{DeviceCreateRequest, DeviceDriver, InstanceDriver, QueueCreateRequest},
    features::FeatureChain,
    surface::SWAPCHAIN_MAINTENANCE1_EXTENSION,
    BoilerError, NameSet, VulkanError,
};
use ash::vk;
use std::sync::Arc;

pub mod physical;
pub mod queue;

/// Replaces the default device creation call.
pub type DeviceCreator = Box<
    dyn Fn(
            &dyn InstanceDriver,
            vk::PhysicalDevice,
            &DeviceCreateRequest,
        ) -> Result<Arc<dyn DeviceDriver>, VulkanError>
        + Send
        + Sync,
>;

/// Can change the device creation request right before the device is created.
pub type DeviceCreationHook = Box<dyn Fn(&mut DeviceCreateRequest) + Send + Sync>;

/// Creates the logical device for a chosen physical device.
pub struct DeviceNegotiator<'a> {
    pub capabilities: &'a CapabilitySet,
    pub mapper: &'a dyn QueueFamilyMapper,
    pub hooks: &'a [DeviceCreationHook],
    pub creator: Option<&'a DeviceCreator>,
}

/// The outcome of device negotiation.
pub struct NegotiatedDevice {
    pub device: Arc<dyn DeviceDriver>,
    pub enabled_extensions: NameSet,
    pub enabled_features: FeatureChain,
    pub queue_family_mapping: QueueFamilyMapping,
    pub queues: QueueFamilies,
    /// Whether `VK_EXT_swapchain_maintenance1` is enabled together with its feature.
    pub swapchain_maintenance: bool,
}

impl DeviceNegotiator<'_> {
    /// Creates the device.
    ///
    /// The request holds the resolved device extensions, one queue request per distinct family
    /// of the mapping, and the feature chain of the candidate. When
    /// `VK_EXT_swapchain_maintenance1` is enabled, its feature is enabled too if the device
    /// supports it.
    pub fn negotiate(
        &self,
        instance: &dyn InstanceDriver,
        candidate: &PhysicalDeviceCandidate,
    ) -> Result<NegotiatedDevice, BoilerError> {
        let enabled_extensions = self.capabilities.resolve(
            CapabilityScope::DeviceExtension,
            &candidate.supported_extensions,
        )?;

        // The chain was built against this device while it was being filtered.
        let features = candidate.feature_chain.clone();
        log::debug!("linked feature tiers: {:?}", features.versions());

        let queue_family_mapping = self.mapper.map_queue_families(
            &candidate.queue_family_properties,
            &enabled_extensions,
            &candidate.present_support,
        );
        log::debug!("queue family mapping: {:?}", queue_family_mapping);

        let swapchain_maintenance = enabled_extensions.contains(SWAPCHAIN_MAINTENANCE1_EXTENSION)
            && instance.swapchain_maintenance_support(candidate.handle);
        log::debug!("swapchain maintenance: {}", swapchain_maintenance);

        let mut request = DeviceCreateRequest {
            enabled_extensions,
            queues: queue_family_mapping
                .unique_families()
                .into_iter()
                .map(|(family_index, priorities)| QueueCreateRequest {
                    family_index,
                    priorities,
                })
                .collect(),
            features,
            swapchain_maintenance,
        };

        for hook in self.hooks {
            hook(&mut request);
        }

        let device = match self.creator {
            Some(creator) => creator(instance, candidate.handle, &request),
            None => instance.create_device(candidate.handle, &request),
        }
        .map_err(BoilerError::driver("vkCreateDevice"))?;

        let queues = QueueFamilies::retrieve(&*device, &queue_family_mapping);

        let swapchain_maintenance = request.swapchain_maintenance
            && request
                .enabled_extensions
                .contains(SWAPCHAIN_MAINTENANCE1_EXTENSION);

        Ok(NegotiatedDevice {
            device,
            enabled_extensions: request.enabled_extensions,
            enabled_features: request.features,
            queue_family_mapping,
            queues,
            swapchain_maintenance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{
        physical::{DeviceFilter, PhysicalDeviceCandidate, PhysicalDeviceType},
        queue::{MinimalQueueFamilyMapper, QueueFamilyProperties, QueueFlags},
        DeviceCreationHook, DeviceCreator, DeviceNegotiator,
    };
    use crate::{
        capabilities::{CapabilityScope, CapabilitySet},
        driver::{DeviceCreateRequest, InstanceDriver},
        features::FeaturePolicies,
        tests::{MockDevice, MockDriver, MockInstance},
        BoilerError, NameSet, Version, VulkanError,
    };
    use ash::vk;
    use std::sync::Arc;

    fn candidate(
        instance: &MockInstance,
        capabilities: &CapabilitySet,
    ) -> PhysicalDeviceCandidate {
        let policies = FeaturePolicies::new(Version::V1_2);
        let filter = DeviceFilter {
            api_version: Version::V1_2,
            capabilities,
            enabled_layers: &NameSet::default(),
            policies: &policies,
            requirements: &[],
            surfaces: &[],
        };

        filter.enumerate(instance).unwrap().0.remove(0)
    }

    fn negotiator(capabilities: &CapabilitySet) -> DeviceNegotiator<'_> {
        DeviceNegotiator {
            capabilities,
            mapper: &MinimalQueueFamilyMapper,
            hooks: &[],
            creator: None,
        }
    }

    #[test]
    fn one_queue_per_family() {
        let driver = MockDriver::new(Version::V1_2).with_device(
            MockDevice::new("gpu", PhysicalDeviceType::DiscreteGpu)
                .with_extension("VK_KHR_video_decode_queue")
                .with_queue_families(vec![
                    QueueFamilyProperties::new(QueueFlags::GRAPHICS | QueueFlags::COMPUTE),
                    QueueFamilyProperties::new(QueueFlags::TRANSFER),
                    QueueFamilyProperties::new(QueueFlags::VIDEO_DECODE),
                ]),
        );
        let instance = driver.mock_instance();

        let mut capabilities = CapabilitySet::new();
        capabilities.desire(CapabilityScope::DeviceExtension, "VK_KHR_video_decode_queue");
        capabilities.desire(CapabilityScope::DeviceExtension, "VK_KHR_video_encode_queue");

        let candidate = candidate(&instance, &capabilities);
        let negotiated = negotiator(&capabilities)
            .negotiate(&*instance, &candidate)
            .unwrap();

        assert!(negotiated
            .enabled_extensions
            .contains("VK_KHR_video_decode_queue"));
        assert!(!negotiated
            .enabled_extensions
            .contains("VK_KHR_video_encode_queue"));

        let request = &driver.device_requests()[0];
        let families: Vec<u32> = request.queues.iter().map(|queue| queue.family_index).collect();
        assert_eq!(families, [0, 2]);
        assert!(request
            .queues
            .iter()
            .all(|queue| queue.priorities.as_slice() == [1.0]));

        assert_eq!(negotiated.queues.graphics, negotiated.queues.compute);
        assert_eq!(negotiated.queues.video_decode.unwrap().family_index, 2);
        assert!(negotiated.queues.video_encode.is_none());
        // No windows, so there is nothing to present to.
        assert!(negotiated.queues.present.is_none());
        assert_eq!(negotiated.enabled_features, candidate.feature_chain);
    }

    #[test]
    fn swapchain_maintenance_feature() {
        let mut capabilities = CapabilitySet::new();
        capabilities.desire(CapabilityScope::DeviceExtension, "VK_EXT_swapchain_maintenance1");

        let driver = MockDriver::new(Version::V1_2).with_device(
            MockDevice::new("gpu", PhysicalDeviceType::DiscreteGpu)
                .with_extension("VK_EXT_swapchain_maintenance1"),
        );
        let instance = driver.mock_instance();
        let chosen = candidate(&instance, &capabilities);
        let negotiated = negotiator(&capabilities)
            .negotiate(&*instance, &chosen)
            .unwrap();

        assert!(negotiated.swapchain_maintenance);
        assert!(driver.device_requests()[0].swapchain_maintenance);

        // The extension is there, but the feature isn't.
        let driver = MockDriver::new(Version::V1_2).with_device(
            MockDevice::new("gpu", PhysicalDeviceType::DiscreteGpu)
                .with_extension("VK_EXT_swapchain_maintenance1")
                .with_swapchain_maintenance(false),
        );
        let instance = driver.mock_instance();
        let chosen = candidate(&instance, &capabilities);
        let negotiated = negotiator(&capabilities)
            .negotiate(&*instance, &chosen)
            .unwrap();

        assert!(negotiated
            .enabled_extensions
            .contains("VK_EXT_swapchain_maintenance1"));
        assert!(!negotiated.swapchain_maintenance);
        assert!(!driver.device_requests()[0].swapchain_maintenance);

        // The feature is never queried without the extension.
        let driver = MockDriver::new(Version::V1_2)
            .with_device(MockDevice::new("gpu", PhysicalDeviceType::DiscreteGpu));
        let instance = driver.mock_instance();
        let chosen = candidate(&instance, &capabilities);
        let negotiated = negotiator(&capabilities)
            .negotiate(&*instance, &chosen)
            .unwrap();

        assert!(!negotiated.swapchain_maintenance);
        assert!(!driver.device_requests()[0].swapchain_maintenance);
        assert!(!driver
            .calls()
            .iter()
            .any(|call| call == "vkGetPhysicalDeviceFeatures2"));
    }

    #[test]
    fn hooks_then_creator() {
        let driver = MockDriver::new(Version::V1_2)
            .with_device(MockDevice::new("gpu", PhysicalDeviceType::DiscreteGpu));
        let instance = driver.mock_instance();
        let capabilities = CapabilitySet::new();
        let candidate = candidate(&instance, &capabilities);

        let hooks: Vec<DeviceCreationHook> = vec![Box::new(|request: &mut DeviceCreateRequest| {
            request
                .enabled_extensions
                .insert("VK_KHR_swapchain".to_owned());
        })];
        let creator: DeviceCreator = Box::new(
            |instance: &dyn InstanceDriver,
             physical_device: vk::PhysicalDevice,
             request: &DeviceCreateRequest| {
                assert!(request.enabled_extensions.contains("VK_KHR_swapchain"));
                instance.create_device(physical_device, request)
            },
        );

        let negotiated = DeviceNegotiator {
            hooks: &hooks,
            creator: Some(&creator),
            ..negotiator(&capabilities)
        }
        .negotiate(&*instance, &candidate)
        .unwrap();

        assert!(negotiated.enabled_extensions.contains("VK_KHR_swapchain"));
        assert_eq!(Arc::strong_count(&negotiated.device), 1);
    }

    #[test]
    fn creation_failure() {
        let driver = MockDriver::new(Version::V1_2)
            .with_device(MockDevice::new("gpu", PhysicalDeviceType::DiscreteGpu))
            .failing("vkCreateDevice", VulkanError::FeatureNotPresent);
        let instance = driver.mock_instance();
        let capabilities = CapabilitySet::new();
        let candidate = candidate(&instance, &capabilities);

        assert!(matches!(
            negotiator(&capabilities).negotiate(&*instance, &candidate),
            Err(BoilerError::DriverCreationFailure {
                function: "vkCreateDevice",
                error: VulkanError::FeatureNotPresent,
            }),
        ));
    }
}
