// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Enumerating physical devices, rejecting the unsuitable ones and choosing among the rest.

use crate::{
    capabilities::{CapabilityScope, CapabilitySet},
    driver::InstanceDriver,
    device::queue::QueueFamilyProperties,
    features::{FeatureChain, FeaturePolicies},
    macros::vulkan_enum,
    BoilerError, NameSet, Version, VulkanError,
};
use ash::vk;
use smallvec::{smallvec, SmallVec};
use std::fmt;

vulkan_enum! {
    /// Type of a physical device.
    PhysicalDeviceType = PhysicalDeviceType(i32);

    /// The device is an integrated GPU.
    IntegratedGpu = INTEGRATED_GPU,

    /// The device is a discrete GPU.
    DiscreteGpu = DISCRETE_GPU,

    /// The device is a virtual GPU.
    VirtualGpu = VIRTUAL_GPU,

    /// The device is a CPU.
    Cpu = CPU,

    /// The device is something else.
    Other = OTHER,
}

impl Default for PhysicalDeviceType {
    #[inline]
    fn default() -> Self {
        PhysicalDeviceType::Other
    }
}

/// The properties of a physical device that negotiation looks at.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhysicalDeviceProperties {
    pub device_name: String,
    pub device_type: PhysicalDeviceType,
    /// The highest API version the device supports.
    pub api_version: Version,
    pub driver_version: u32,
    pub vendor_id: u32,
    pub device_id: u32,
}

impl From<&vk::PhysicalDeviceProperties> for PhysicalDeviceProperties {
    fn from(val: &vk::PhysicalDeviceProperties) -> Self {
        PhysicalDeviceProperties {
            device_name: val
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            device_type: val.device_type.try_into().unwrap_or_default(),
            api_version: Version::from_vulkan_version(val.api_version),
            driver_version: val.driver_version,
            vendor_id: val.vendor_id,
            device_id: val.device_id,
        }
    }
}

/// A physical device that passed every check, with everything that was learned about it.
///
/// Candidates only live for one enumeration pass; only the handle of the chosen one survives.
#[derive(Clone, Debug)]
pub struct PhysicalDeviceCandidate {
    /// Borrowed from the instance.
    pub handle: vk::PhysicalDevice,
    pub properties: PhysicalDeviceProperties,
    pub queue_family_properties: Vec<QueueFamilyProperties>,
    /// Whether each queue family can present to every window. All `false` without windows.
    pub present_support: Vec<bool>,
    /// The enabled instance layers, which also contribute device extensions.
    pub supported_layers: NameSet,
    pub supported_extensions: NameSet,
    pub feature_chain: FeatureChain,
}

/// Why a physical device was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectionReason {
    /// Required device extensions are not supported.
    MissingExtensions(Vec<String>),

    /// A feature validator failed.
    UnsupportedFeature {
        tier: Version,
        feature: &'static str,
    },

    /// One of the extra device requirements returned false.
    ExtraRequirement,

    /// No queue family can present to every window. Lists the windows no family can present to,
    /// which is empty when every window is supported but only by different families.
    CannotPresent { windows: Vec<usize> },

    /// Querying the device failed.
    QueryFailed {
        function: &'static str,
        error: VulkanError,
    },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::MissingExtensions(missing) => {
                write!(f, "it doesn't support the required extensions ")?;
                crate::fmt_list(f, missing)
            }
            RejectionReason::UnsupportedFeature { tier, feature } => write!(
                f,
                "it doesn't support the required feature `{}` of tier {}",
                feature, tier,
            ),
            RejectionReason::ExtraRequirement => {
                write!(f, "it doesn't satisfy an extra device requirement")
            }
            RejectionReason::CannotPresent { windows } if windows.is_empty() => write!(
                f,
                "none of its queue families can present to every window",
            ),
            RejectionReason::CannotPresent { windows } => {
                write!(f, "it can't present to window(s) {:?}", windows)
            }
            RejectionReason::QueryFailed { function, error } => {
                write!(f, "`{}` failed: {}", function, error)
            }
        }
    }
}

/// A physical device that was rejected, and why.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceRejection {
    pub device_name: String,
    pub reason: RejectionReason,
}

impl fmt::Display for DeviceRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rejected {} because {}", self.device_name, self.reason)
    }
}

/// An additional check that a physical device must pass.
///
/// Implemented for every `Fn(&PhysicalDeviceCandidate) -> bool`.
pub trait DeviceRequirement: Send + Sync {
    fn check(&self, candidate: &PhysicalDeviceCandidate) -> bool;
}

impl<T> DeviceRequirement for T
where
    T: Fn(&PhysicalDeviceCandidate) -> bool + Send + Sync,
{
    #[inline]
    fn check(&self, candidate: &PhysicalDeviceCandidate) -> bool {
        self(candidate)
    }
}

/// Chooses one of the physical devices that passed every check.
pub trait PhysicalDeviceSelector: Send + Sync {
    /// Returns the index of the chosen candidate, or `None` if none of them will do.
    ///
    /// `candidates` is in driver enumeration order, and is never empty.
    fn select(&self, candidates: &[PhysicalDeviceCandidate]) -> Option<usize>;
}

/// Chooses the first candidate of the most preferred device type.
///
/// When no candidate has any of the preferred types, the first candidate is chosen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimpleDeviceSelector {
    preferred_types: SmallVec<[PhysicalDeviceType; 5]>,
}

impl SimpleDeviceSelector {
    /// Creates a selector that prefers the types in the order they are given.
    pub fn new(preferred_types: impl IntoIterator<Item = PhysicalDeviceType>) -> Self {
        SimpleDeviceSelector {
            preferred_types: preferred_types.into_iter().collect(),
        }
    }

    #[inline]
    pub fn preferred_types(&self) -> &[PhysicalDeviceType] {
        &self.preferred_types
    }
}

impl Default for SimpleDeviceSelector {
    /// Prefers discrete GPUs over integrated GPUs.
    fn default() -> Self {
        SimpleDeviceSelector {
            preferred_types: smallvec![
                PhysicalDeviceType::DiscreteGpu,
                PhysicalDeviceType::IntegratedGpu,
            ],
        }
    }
}

impl PhysicalDeviceSelector for SimpleDeviceSelector {
    fn select(&self, candidates: &[PhysicalDeviceCandidate]) -> Option<usize> {
        self.preferred_types
            .iter()
            .find_map(|&device_type| {
                candidates
                    .iter()
                    .position(|candidate| candidate.properties.device_type == device_type)
            })
            .or_else(|| (!candidates.is_empty()).then_some(0))
    }
}

/// Everything a physical device is checked against.
pub struct DeviceFilter<'a> {
    pub api_version: Version,
    pub capabilities: &'a CapabilitySet,
    pub enabled_layers: &'a NameSet,
    pub policies: &'a FeaturePolicies,
    pub requirements: &'a [Box<dyn DeviceRequirement>],
    /// One surface per window.
    pub surfaces: &'a [vk::SurfaceKHR],
}

enum Evaluation {
    Accepted(Box<PhysicalDeviceCandidate>),
    Rejected(DeviceRejection),
}

impl DeviceFilter<'_> {
    /// Checks every physical device of `instance`, in enumeration order.
    ///
    /// Returns the candidates that passed and the rejections of those that didn't. Every device
    /// is checked, even after one has passed.
    pub fn enumerate(
        &self,
        instance: &dyn InstanceDriver,
    ) -> Result<(Vec<PhysicalDeviceCandidate>, Vec<DeviceRejection>), BoilerError> {
        let handles = instance
            .enumerate_physical_devices()
            .map_err(BoilerError::driver("vkEnumeratePhysicalDevices"))?;

        let mut candidates = Vec::with_capacity(handles.len());
        let mut rejections = Vec::new();

        for handle in handles {
            match self.evaluate(instance, handle)? {
                Evaluation::Accepted(candidate) => candidates.push(*candidate),
                Evaluation::Rejected(rejection) => rejections.push(rejection),
            }
        }

        Ok((candidates, rejections))
    }

    fn evaluate(
        &self,
        instance: &dyn InstanceDriver,
        handle: vk::PhysicalDevice,
    ) -> Result<Evaluation, BoilerError> {
        let properties = instance.physical_device_properties(handle);
        let reject = |reason| {
            Ok(Evaluation::Rejected(DeviceRejection {
                device_name: properties.device_name.clone(),
                reason,
            }))
        };

        let supported_extensions = match self.device_extensions(instance, handle) {
            Ok(extensions) => extensions,
            Err(error) => {
                return reject(RejectionReason::QueryFailed {
                    function: "vkEnumerateDeviceExtensionProperties",
                    error,
                })
            }
        };

        let missing = self
            .capabilities
            .missing(CapabilityScope::DeviceExtension, &supported_extensions);

        if !missing.is_empty() {
            return reject(RejectionReason::MissingExtensions(missing));
        }

        let supported_features = instance.supported_features(handle, self.api_version);
        let feature_chain = match self.policies.build_chain(&supported_features) {
            Ok(chain) => chain,
            Err(BoilerError::UnsupportedFeature { tier, feature }) => {
                return reject(RejectionReason::UnsupportedFeature { tier, feature })
            }
            Err(err) => return Err(err),
        };

        let queue_family_properties = instance.queue_family_properties(handle);
        let (present_support, unsupported_windows) =
            match self.present_support(instance, handle, queue_family_properties.len()) {
                Ok(support) => support,
                Err(error) => {
                    return reject(RejectionReason::QueryFailed {
                        function: "vkGetPhysicalDeviceSurfaceSupportKHR",
                        error,
                    })
                }
            };

        let candidate = PhysicalDeviceCandidate {
            handle,
            properties: properties.clone(),
            queue_family_properties,
            present_support,
            supported_layers: self.enabled_layers.clone(),
            supported_extensions,
            feature_chain,
        };

        if !self
            .requirements
            .iter()
            .all(|requirement| requirement.check(&candidate))
        {
            return reject(RejectionReason::ExtraRequirement);
        }

        if !self.surfaces.is_empty() && !candidate.present_support.contains(&true) {
            return reject(RejectionReason::CannotPresent {
                windows: unsupported_windows,
            });
        }

        Ok(Evaluation::Accepted(Box::new(candidate)))
    }

    fn device_extensions(
        &self,
        instance: &dyn InstanceDriver,
        handle: vk::PhysicalDevice,
    ) -> Result<NameSet, VulkanError> {
        let mut extensions = instance.device_extension_names(handle, None)?;

        for layer in self.enabled_layers {
            extensions.extend(instance.device_extension_names(handle, Some(layer))?);
        }

        Ok(extensions)
    }

    /// Returns whether each family supports every surface, and the surfaces no family supports.
    fn present_support(
        &self,
        instance: &dyn InstanceDriver,
        handle: vk::PhysicalDevice,
        family_count: usize,
    ) -> Result<(Vec<bool>, Vec<usize>), VulkanError> {
        let mut all_surfaces = vec![!self.surfaces.is_empty(); family_count];
        let mut unsupported_windows = Vec::new();

        for (window, &surface) in self.surfaces.iter().enumerate() {
            let mut any_family = false;

            for (family_index, supports_all) in (0..).zip(all_surfaces.iter_mut()) {
                let supported = instance.surface_support(handle, family_index, surface)?;
                *supports_all &= supported;
                any_family |= supported;
            }

            if !any_family {
                unsupported_windows.push(window);
            }
        }

        Ok((all_surfaces, unsupported_windows))
    }

    /// Enumerates the physical devices and lets `selector` choose among those that pass.
    ///
    /// With `verbose`, every rejection is logged at info level. Either way, the rejections are
    /// part of the [`BoilerError::NoSuitableDevice`] that is returned when nothing passes.
    pub fn select(
        &self,
        instance: &dyn InstanceDriver,
        selector: &dyn PhysicalDeviceSelector,
        verbose: bool,
    ) -> Result<PhysicalDeviceCandidate, BoilerError> {
        let (mut candidates, rejections) = self.enumerate(instance)?;

        if verbose {
            for rejection in &rejections {
                log::info!("{}", rejection);
            }
        }

        let chosen = if candidates.is_empty() {
            None
        } else {
            selector.select(&candidates)
        };

        match chosen {
            Some(index) if index < candidates.len() => {
                let candidate = candidates.swap_remove(index);
                log::info!(
                    "chose physical device {} ({:?})",
                    candidate.properties.device_name,
                    candidate.properties.device_type,
                );

                Ok(candidate)
            }
            _ => Err(BoilerError::NoSuitableDevice { rejections }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DeviceFilter, DeviceRequirement, PhysicalDeviceCandidate, PhysicalDeviceSelector,
        PhysicalDeviceType, RejectionReason, SimpleDeviceSelector,
    };
    use crate::{
        capabilities::{name_set, CapabilityScope, CapabilitySet},
        device::queue::{QueueFamilyProperties, QueueFlags},
        features::{FeaturePolicies, Features12},
        tests::{MockDevice, MockDriver},
        BoilerError, NameSet, Version,
    };
    use ash::vk::{self, Handle};

    struct Fixture {
        capabilities: CapabilitySet,
        layers: NameSet,
        policies: FeaturePolicies,
        requirements: Vec<Box<dyn DeviceRequirement>>,
        surfaces: Vec<vk::SurfaceKHR>,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                capabilities: CapabilitySet::new(),
                layers: NameSet::default(),
                policies: FeaturePolicies::new(Version::V1_2),
                requirements: Vec::new(),
                surfaces: Vec::new(),
            }
        }

        fn filter(&self) -> DeviceFilter<'_> {
            DeviceFilter {
                api_version: Version::V1_2,
                capabilities: &self.capabilities,
                enabled_layers: &self.layers,
                policies: &self.policies,
                requirements: &self.requirements,
                surfaces: &self.surfaces,
            }
        }
    }

    fn candidate(name: &str, device_type: PhysicalDeviceType) -> PhysicalDeviceCandidate {
        PhysicalDeviceCandidate {
            handle: vk::PhysicalDevice::null(),
            properties: super::PhysicalDeviceProperties {
                device_name: name.to_owned(),
                device_type,
                ..Default::default()
            },
            queue_family_properties: Vec::new(),
            present_support: Vec::new(),
            supported_layers: NameSet::default(),
            supported_extensions: NameSet::default(),
            feature_chain: Default::default(),
        }
    }

    #[test]
    fn preferred_type_wins_regardless_of_order() {
        let selector = SimpleDeviceSelector::new([
            PhysicalDeviceType::DiscreteGpu,
            PhysicalDeviceType::IntegratedGpu,
        ]);

        let a = candidate("A", PhysicalDeviceType::IntegratedGpu);
        let b = candidate("B", PhysicalDeviceType::DiscreteGpu);

        assert_eq!(selector.select(&[a.clone(), b.clone()]), Some(1));
        assert_eq!(selector.select(&[b, a]), Some(0));
    }

    #[test]
    fn ties_go_to_enumeration_order() {
        let selector = SimpleDeviceSelector::default();
        let candidates = [
            candidate("cpu", PhysicalDeviceType::Cpu),
            candidate("first", PhysicalDeviceType::IntegratedGpu),
            candidate("second", PhysicalDeviceType::IntegratedGpu),
        ];

        assert_eq!(selector.select(&candidates), Some(1));
    }

    #[test]
    fn falls_back_to_first_candidate() {
        let selector = SimpleDeviceSelector::default();
        let candidates = [
            candidate("virtual", PhysicalDeviceType::VirtualGpu),
            candidate("cpu", PhysicalDeviceType::Cpu),
        ];

        assert_eq!(selector.select(&candidates), Some(0));
        assert_eq!(selector.select(&[]), None);
    }

    #[test]
    fn picks_discrete_device() {
        let driver = MockDriver::new(Version::V1_2)
            .with_device(MockDevice::new("integrated", PhysicalDeviceType::IntegratedGpu))
            .with_device(MockDevice::new("discrete", PhysicalDeviceType::DiscreteGpu));
        let instance = driver.mock_instance();
        let fixture = Fixture::new();

        let chosen = fixture
            .filter()
            .select(&*instance, &SimpleDeviceSelector::default(), false)
            .unwrap();
        assert_eq!(chosen.properties.device_name, "discrete");
        assert!(chosen.feature_chain.contains(Version::V1_2));
    }

    #[test]
    fn one_rejection_per_device() {
        let driver = MockDriver::new(Version::V1_2)
            .with_device(
                MockDevice::new("no swapchain", PhysicalDeviceType::DiscreteGpu)
                    .without_extension("VK_KHR_swapchain"),
            )
            .with_device(MockDevice::new("no features", PhysicalDeviceType::IntegratedGpu))
            .with_device(MockDevice::new("too slow", PhysicalDeviceType::Cpu));
        let instance = driver.mock_instance();

        let mut fixture = Fixture::new();
        fixture
            .capabilities
            .require(CapabilityScope::DeviceExtension, "VK_KHR_swapchain");
        fixture
            .policies
            .add_validator::<Features12>(Features12 {
                timeline_semaphore: true,
                ..Features12::none()
            })
            .unwrap();
        fixture.requirements.push(Box::new(|candidate: &PhysicalDeviceCandidate| {
            candidate.properties.device_type != PhysicalDeviceType::Cpu
        }));

        // The second device lacks the timeline semaphore feature.
        instance.edit_device(1, |device| device.features.v1_2.timeline_semaphore = false);

        let result = fixture
            .filter()
            .select(&*instance, &SimpleDeviceSelector::default(), true);

        match result {
            Err(BoilerError::NoSuitableDevice { rejections }) => {
                assert_eq!(rejections.len(), 3);
                assert_eq!(rejections[0].device_name, "no swapchain");
                assert_eq!(
                    rejections[0].reason,
                    RejectionReason::MissingExtensions(vec!["VK_KHR_swapchain".to_owned()]),
                );
                assert_eq!(
                    rejections[1].reason,
                    RejectionReason::UnsupportedFeature {
                        tier: Version::V1_2,
                        feature: "timeline_semaphore",
                    },
                );
                assert_eq!(rejections[2].reason, RejectionReason::ExtraRequirement);
            }
            _ => panic!(),
        }
    }

    #[test]
    fn layer_extensions_count() {
        let driver = MockDriver::new(Version::V1_2).with_device(
            MockDevice::new("gpu", PhysicalDeviceType::DiscreteGpu)
                .with_layer_extension("VK_LAYER_KHRONOS_validation", "VK_EXT_tooling_info"),
        );
        let instance = driver.mock_instance();

        let mut fixture = Fixture::new();
        fixture
            .capabilities
            .require(CapabilityScope::DeviceExtension, "VK_EXT_tooling_info");

        assert!(fixture.filter().enumerate(&*instance).unwrap().0.is_empty());

        fixture.layers = name_set(["VK_LAYER_KHRONOS_validation"]);
        let (candidates, rejections) = fixture.filter().enumerate(&*instance).unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(rejections.is_empty());
        assert!(candidates[0].supported_layers.contains("VK_LAYER_KHRONOS_validation"));
    }

    #[test]
    fn presentation_to_every_window() {
        let driver = MockDriver::new(Version::V1_2)
            .with_device(
                MockDevice::new("headless", PhysicalDeviceType::DiscreteGpu)
                    .with_queue_families(vec![QueueFamilyProperties::new(
                        QueueFlags::GRAPHICS | QueueFlags::COMPUTE,
                    )])
                    .with_present_support(vec![vec![false, false]]),
            )
            .with_device(
                MockDevice::new("split", PhysicalDeviceType::DiscreteGpu)
                    .with_queue_families(vec![
                        QueueFamilyProperties::new(QueueFlags::GRAPHICS),
                        QueueFamilyProperties::new(QueueFlags::COMPUTE),
                    ])
                    .with_present_support(vec![vec![true, false], vec![false, true]]),
            )
            .with_device(
                MockDevice::new("good", PhysicalDeviceType::IntegratedGpu)
                    .with_queue_families(vec![
                        QueueFamilyProperties::new(QueueFlags::GRAPHICS),
                        QueueFamilyProperties::new(QueueFlags::COMPUTE),
                    ])
                    .with_present_support(vec![vec![false, false], vec![true, true]]),
            );
        let instance = driver.mock_instance();

        let mut fixture = Fixture::new();
        fixture.surfaces = vec![
            vk::SurfaceKHR::from_raw(1),
            vk::SurfaceKHR::from_raw(2),
        ];

        let (candidates, rejections) = fixture.filter().enumerate(&*instance).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].properties.device_name, "good");
        assert_eq!(candidates[0].present_support, [false, true]);

        assert_eq!(
            rejections[0].reason,
            RejectionReason::CannotPresent {
                windows: vec![0, 1]
            },
        );
        assert_eq!(
            rejections[1].reason,
            RejectionReason::CannotPresent { windows: vec![] },
        );
    }

    #[test]
    fn no_devices() {
        let driver = MockDriver::new(Version::V1_2);
        let instance = driver.mock_instance();
        let fixture = Fixture::new();

        assert!(matches!(
            fixture
                .filter()
                .select(&*instance, &SimpleDeviceSelector::default(), true),
            Err(BoilerError::NoSuitableDevice { rejections }) if rejections.is_empty(),
        ));
    }
}
