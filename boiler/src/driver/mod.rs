// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The boundary between the negotiation pipeline and the graphics driver.
//!
//! The pipeline never calls Vulkan directly. It goes through the [`Driver`], [`InstanceDriver`]
//! and [`DeviceDriver`] traits, which [`vulkan::VulkanDriver`] implements on top of `ash`.

use crate::{
    debug::{DebugMessengerRequest, ValidationFeature},
    device::{physical::PhysicalDeviceProperties, queue::QueueFamilyProperties},
    features::{FeatureChain, TieredFeatures},
    NameSet, Version, VulkanError,
};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use smallvec::SmallVec;
use std::sync::Arc;

pub mod vulkan;

/// Everything that is passed to instance creation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstanceCreateRequest {
    pub application_name: String,
    pub application_version: Version,
    pub engine_name: String,
    pub engine_version: Version,
    pub api_version: Version,
    pub enabled_layers: NameSet,
    pub enabled_extensions: NameSet,

    /// Whether the `ENUMERATE_PORTABILITY_KHR` flag is set, so that portability implementations
    /// are enumerated too.
    pub enumerate_portability: bool,

    /// The validation features to enable, in order. Empty when validation is not configured.
    pub validation_features: SmallVec<[ValidationFeature; 5]>,
}

/// A queue family to create queues in.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueCreateRequest {
    pub family_index: u32,
    /// One priority per queue.
    pub priorities: SmallVec<[f32; 1]>,
}

/// Everything that is passed to logical device creation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeviceCreateRequest {
    pub enabled_extensions: NameSet,
    pub queues: SmallVec<[QueueCreateRequest; 4]>,
    pub features: FeatureChain,

    /// Whether the `swapchainMaintenance1` feature of `VK_EXT_swapchain_maintenance1` is
    /// enabled. Only set when the extension is enabled too.
    pub swapchain_maintenance: bool,
}

/// The entry point of the driver.
pub trait Driver: Send + Sync {
    /// Returns the highest instance-level API version the driver supports.
    fn api_version(&self) -> Result<Version, VulkanError>;

    /// Returns the names of the available instance layers.
    fn layer_names(&self) -> Result<NameSet, VulkanError>;

    /// Returns the names of the instance extensions of the driver, or of `layer`.
    fn instance_extension_names(&self, layer: Option<&str>) -> Result<NameSet, VulkanError>;

    /// Creates an instance.
    fn create_instance(
        &self,
        request: &InstanceCreateRequest,
    ) -> Result<Arc<dyn InstanceDriver>, VulkanError>;
}

/// An instance that was created by a [`Driver`].
pub trait InstanceDriver: Send + Sync {
    fn handle(&self) -> vk::Instance;

    /// Returns the physical devices, in driver enumeration order.
    fn enumerate_physical_devices(&self) -> Result<Vec<vk::PhysicalDevice>, VulkanError>;

    fn physical_device_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> PhysicalDeviceProperties;

    fn queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<QueueFamilyProperties>;

    /// Returns the names of the device extensions of the physical device, or of `layer`.
    fn device_extension_names(
        &self,
        physical_device: vk::PhysicalDevice,
        layer: Option<&str>,
    ) -> Result<NameSet, VulkanError>;

    /// Returns the features that the physical device supports, for every tier up to
    /// `api_version`. Tiers above it, or above the API version of the device, are `none()`.
    fn supported_features(
        &self,
        physical_device: vk::PhysicalDevice,
        api_version: Version,
    ) -> TieredFeatures;

    /// Returns whether the physical device supports the `swapchainMaintenance1` feature.
    ///
    /// Only called for devices that have the `VK_EXT_swapchain_maintenance1` extension.
    fn swapchain_maintenance_support(&self, physical_device: vk::PhysicalDevice) -> bool;

    /// Returns whether queue family `family_index` can present to `surface`.
    fn surface_support(
        &self,
        physical_device: vk::PhysicalDevice,
        family_index: u32,
        surface: vk::SurfaceKHR,
    ) -> Result<bool, VulkanError>;

    /// Creates a surface for a window.
    ///
    /// # Safety
    ///
    /// - The handles must stay valid until the surface is destroyed.
    unsafe fn create_surface(
        &self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<vk::SurfaceKHR, VulkanError>;

    /// Creates a debug messenger. The handler stays alive until the messenger is destroyed.
    fn create_debug_messenger(
        &self,
        request: DebugMessengerRequest,
    ) -> Result<vk::DebugUtilsMessengerEXT, VulkanError>;

    /// Creates a logical device.
    fn create_device(
        &self,
        physical_device: vk::PhysicalDevice,
        request: &DeviceCreateRequest,
    ) -> Result<Arc<dyn DeviceDriver>, VulkanError>;

    /// # Safety
    ///
    /// - No swapchain may still use `surface`.
    unsafe fn destroy_surface(&self, surface: vk::SurfaceKHR);

    /// # Safety
    ///
    /// - `messenger` must have been created by this instance and not be destroyed yet.
    unsafe fn destroy_debug_messenger(&self, messenger: vk::DebugUtilsMessengerEXT);

    /// Destroys the instance.
    ///
    /// # Safety
    ///
    /// - Every device, surface and messenger of this instance must be destroyed already.
    /// - The instance must not be used afterwards.
    unsafe fn destroy(&self);
}

/// A logical device that was created by an [`InstanceDriver`].
pub trait DeviceDriver: Send + Sync {
    fn handle(&self) -> vk::Device;

    /// Returns queue `queue_index` of family `family_index`, which must have been requested
    /// when the device was created.
    fn queue(&self, family_index: u32, queue_index: u32) -> vk::Queue;

    /// Destroys the device.
    ///
    /// # Safety
    ///
    /// - Every object created from the device must be destroyed already.
    /// - The device must not be used afterwards.
    unsafe fn destroy(&self);
}
