// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The driver backend that calls into the Vulkan library through `ash`.

use super::{DeviceCreateRequest, DeviceDriver, Driver, InstanceCreateRequest, InstanceDriver};
use crate::{
    capabilities::sorted,
    debug::{trampoline, DebugMessengerRequest, ValidationHandler, DEBUG_UTILS_EXTENSION},
    device::{physical::PhysicalDeviceProperties, queue::QueueFamilyProperties},
    features::{Features11, TieredFeatures},
    instance::GET_PHYSICAL_DEVICE_PROPERTIES2_EXTENSION,
    BoilerError, NameSet, Version, VulkanError,
};
use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use smallvec::SmallVec;
use std::{
    ffi::{c_char, CStr, CString},
    fmt, ptr,
    sync::Arc,
};

/// The Vulkan library, loaded at runtime.
pub struct VulkanDriver {
    entry: ash::Entry,
}

impl VulkanDriver {
    /// Loads the Vulkan library of the system.
    pub fn new() -> Result<Arc<Self>, BoilerError> {
        let entry = unsafe { ash::Entry::load() }.map_err(BoilerError::LibraryLoading)?;

        Ok(Self::from_entry(entry))
    }

    /// Uses a library that was already loaded.
    #[inline]
    pub fn from_entry(entry: ash::Entry) -> Arc<Self> {
        Arc::new(VulkanDriver { entry })
    }

    #[inline]
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }
}

impl fmt::Debug for VulkanDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VulkanDriver").finish_non_exhaustive()
    }
}

impl Driver for VulkanDriver {
    fn api_version(&self) -> Result<Version, VulkanError> {
        let version = unsafe { self.entry.try_enumerate_instance_version() }?;

        // Vulkan 1.0 loaders don't have `vkEnumerateInstanceVersion`.
        Ok(version.map_or(Version::V1_0, Version::from_vulkan_version))
    }

    fn layer_names(&self) -> Result<NameSet, VulkanError> {
        let properties = unsafe { self.entry.enumerate_instance_layer_properties() }?;

        Ok(properties
            .iter()
            .filter_map(|property| property.layer_name_as_c_str().ok())
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    fn instance_extension_names(&self, layer: Option<&str>) -> Result<NameSet, VulkanError> {
        let layer = layer
            .map(CString::new)
            .transpose()
            .map_err(|_| VulkanError::LayerNotPresent)?;
        let properties =
            unsafe { self.entry.enumerate_instance_extension_properties(layer.as_deref()) }?;

        Ok(extension_names(&properties))
    }

    fn create_instance(
        &self,
        request: &InstanceCreateRequest,
    ) -> Result<Arc<dyn InstanceDriver>, VulkanError> {
        let application_name = c_string(&request.application_name)?;
        let engine_name = c_string(&request.engine_name)?;
        let layers = c_strings(&request.enabled_layers)?;
        let extensions = c_strings(&request.enabled_extensions)?;
        let layer_ptrs: SmallVec<[*const c_char; 4]> =
            layers.iter().map(|name| name.as_ptr()).collect();
        let extension_ptrs: SmallVec<[*const c_char; 16]> =
            extensions.iter().map(|name| name.as_ptr()).collect();

        let application_info = vk::ApplicationInfo::default()
            .application_name(&application_name)
            .application_version(request.application_version.into_vulkan_version())
            .engine_name(&engine_name)
            .engine_version(request.engine_version.into_vulkan_version())
            .api_version(request.api_version.into_vulkan_version());

        let flags = if request.enumerate_portability {
            vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
        } else {
            vk::InstanceCreateFlags::empty()
        };

        let validation_features: SmallVec<[vk::ValidationFeatureEnableEXT; 5]> = request
            .validation_features
            .iter()
            .map(|&feature| feature.into())
            .collect();
        let mut validation_info =
            vk::ValidationFeaturesEXT::default().enabled_validation_features(&validation_features);

        let mut create_info = vk::InstanceCreateInfo::default()
            .flags(flags)
            .application_info(&application_info)
            .enabled_layer_names(&layer_ptrs)
            .enabled_extension_names(&extension_ptrs);

        if !validation_features.is_empty() {
            create_info = create_info.push_next(&mut validation_info);
        }

        let instance = unsafe { self.entry.create_instance(&create_info, None) }?;

        let debug_utils = request
            .enabled_extensions
            .contains(DEBUG_UTILS_EXTENSION)
            .then(|| ash::ext::debug_utils::Instance::new(&self.entry, &instance));
        let properties2 = (request.api_version < Version::V1_1
            && request
                .enabled_extensions
                .contains(GET_PHYSICAL_DEVICE_PROPERTIES2_EXTENSION))
        .then(|| ash::khr::get_physical_device_properties2::Instance::new(&self.entry, &instance));

        Ok(Arc::new(VulkanInstance {
            surface_fns: ash::khr::surface::Instance::new(&self.entry, &instance),
            debug_utils,
            properties2,
            entry: self.entry.clone(),
            instance,
            api_version: request.api_version,
            messengers: Mutex::new(Vec::new()),
        }))
    }
}

/// An instance created by a [`VulkanDriver`].
pub struct VulkanInstance {
    entry: ash::Entry,
    instance: ash::Instance,
    api_version: Version,
    surface_fns: ash::khr::surface::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    // `vkGetPhysicalDeviceFeatures2KHR`, on a Vulkan 1.0 instance.
    properties2: Option<ash::khr::get_physical_device_properties2::Instance>,
    // The handlers are boxed so that their address, which the driver holds, stays the same.
    messengers: Mutex<Vec<(vk::DebugUtilsMessengerEXT, Box<ValidationHandler>)>>,
}

impl VulkanInstance {
    #[inline]
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    fn device_api_version(&self, physical_device: vk::PhysicalDevice) -> Version {
        let properties =
            unsafe { self.instance.get_physical_device_properties(physical_device) };

        Version::from_vulkan_version(properties.api_version)
            .min(self.api_version)
            .without_patch()
    }

    fn layer_extension_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        layer: &CStr,
    ) -> Result<Vec<vk::ExtensionProperties>, VulkanError> {
        let fns = self.instance.fp_v1_0();

        loop {
            let mut count = 0;
            unsafe {
                (fns.enumerate_device_extension_properties)(
                    physical_device,
                    layer.as_ptr(),
                    &mut count,
                    ptr::null_mut(),
                )
            }
            .result()?;

            let mut properties = Vec::with_capacity(count as usize);
            let result = unsafe {
                (fns.enumerate_device_extension_properties)(
                    physical_device,
                    layer.as_ptr(),
                    &mut count,
                    properties.as_mut_ptr(),
                )
            };

            match result {
                vk::Result::SUCCESS => {
                    unsafe { properties.set_len(count as usize) };
                    return Ok(properties);
                }
                vk::Result::INCOMPLETE => (),
                err => return Err(VulkanError::from(err)),
            }
        }
    }
}

impl fmt::Debug for VulkanInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VulkanInstance")
            .field("handle", &self.instance.handle())
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

impl InstanceDriver for VulkanInstance {
    #[inline]
    fn handle(&self) -> vk::Instance {
        self.instance.handle()
    }

    fn enumerate_physical_devices(&self) -> Result<Vec<vk::PhysicalDevice>, VulkanError> {
        Ok(unsafe { self.instance.enumerate_physical_devices() }?)
    }

    fn physical_device_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> PhysicalDeviceProperties {
        let properties =
            unsafe { self.instance.get_physical_device_properties(physical_device) };

        PhysicalDeviceProperties::from(&properties)
    }

    fn queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<QueueFamilyProperties> {
        let properties = unsafe {
            self.instance
                .get_physical_device_queue_family_properties(physical_device)
        };

        properties.iter().map(QueueFamilyProperties::from).collect()
    }

    fn device_extension_names(
        &self,
        physical_device: vk::PhysicalDevice,
        layer: Option<&str>,
    ) -> Result<NameSet, VulkanError> {
        let properties = match layer {
            None => unsafe {
                self.instance
                    .enumerate_device_extension_properties(physical_device)
            }?,
            Some(layer) => {
                let layer = CString::new(layer).map_err(|_| VulkanError::LayerNotPresent)?;
                self.layer_extension_properties(physical_device, &layer)?
            }
        };

        Ok(extension_names(&properties))
    }

    fn supported_features(
        &self,
        physical_device: vk::PhysicalDevice,
        api_version: Version,
    ) -> TieredFeatures {
        let version = self.device_api_version(physical_device).min(api_version);
        let mut supported = TieredFeatures::none();

        if version < Version::V1_1 {
            let features = unsafe { self.instance.get_physical_device_features(physical_device) };
            supported.v1_0 = (&features).into();

            return supported;
        }

        let mut features11 = vk::PhysicalDeviceVulkan11Features::default();
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut core11 = Core11Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::default();

        if version >= Version::V1_3 {
            features2 = features2.push_next(&mut features13);
        }

        if version >= Version::V1_2 {
            features2 = features2.push_next(&mut features12);
            features2 = features2.push_next(&mut features11);
        } else {
            features2 = core11.link(features2);
        }

        unsafe {
            self.instance
                .get_physical_device_features2(physical_device, &mut features2)
        };
        supported.v1_0 = (&features2.features).into();

        if version >= Version::V1_2 {
            supported.v1_1 = (&features11).into();
            supported.v1_2 = (&features12).into();
        } else {
            supported.v1_1 = core11.features();
        }

        if version >= Version::V1_3 {
            supported.v1_3 = (&features13).into();
        }

        supported
    }

    fn swapchain_maintenance_support(&self, physical_device: vk::PhysicalDevice) -> bool {
        let mut maintenance = vk::PhysicalDeviceSwapchainMaintenance1FeaturesEXT::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut maintenance);

        if self.device_api_version(physical_device) >= Version::V1_1 {
            unsafe {
                self.instance
                    .get_physical_device_features2(physical_device, &mut features2)
            };
        } else if let Some(properties2) = &self.properties2 {
            unsafe { properties2.get_physical_device_features2(physical_device, &mut features2) };
        } else {
            return false;
        }

        maintenance.swapchain_maintenance1 != vk::FALSE
    }

    fn surface_support(
        &self,
        physical_device: vk::PhysicalDevice,
        family_index: u32,
        surface: vk::SurfaceKHR,
    ) -> Result<bool, VulkanError> {
        Ok(unsafe {
            self.surface_fns.get_physical_device_surface_support(
                physical_device,
                family_index,
                surface,
            )
        }?)
    }

    unsafe fn create_surface(
        &self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<vk::SurfaceKHR, VulkanError> {
        unsafe { crate::surface::create_surface(&self.entry, &self.instance, display, window) }
    }

    fn create_debug_messenger(
        &self,
        request: DebugMessengerRequest,
    ) -> Result<vk::DebugUtilsMessengerEXT, VulkanError> {
        let debug_utils = self
            .debug_utils
            .as_ref()
            .ok_or(VulkanError::ExtensionNotPresent)?;

        let handler = Box::new(request.handler);
        let user_data: *const ValidationHandler = &*handler;

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(request.severity.into())
            .message_type(request.ty.into())
            .pfn_user_callback(Some(trampoline))
            .user_data(user_data.cast_mut().cast());

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;
        self.messengers.lock().push((messenger, handler));

        Ok(messenger)
    }

    fn create_device(
        &self,
        physical_device: vk::PhysicalDevice,
        request: &DeviceCreateRequest,
    ) -> Result<Arc<dyn DeviceDriver>, VulkanError> {
        let version = self.device_api_version(physical_device);
        let extensions = c_strings(&request.enabled_extensions)?;
        let extension_ptrs: SmallVec<[*const c_char; 16]> =
            extensions.iter().map(|name| name.as_ptr()).collect();

        let queue_infos: SmallVec<[vk::DeviceQueueCreateInfo<'_>; 4]> = request
            .queues
            .iter()
            .map(|queue| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(queue.family_index)
                    .queue_priorities(&queue.priorities)
            })
            .collect();

        // Tiers that the device itself doesn't know about can't be passed to it.
        let linked = |tier| request.features.contains(tier) && version >= tier;

        let enabled = request.features.enabled_features();
        let features10 = vk::PhysicalDeviceFeatures::from(&enabled.v1_0);
        let mut features11 = vk::PhysicalDeviceVulkan11Features::from(&enabled.v1_1);
        let mut features12 = vk::PhysicalDeviceVulkan12Features::from(&enabled.v1_2);
        let mut features13 = vk::PhysicalDeviceVulkan13Features::from(&enabled.v1_3);
        let mut core11 = Core11Features::new(&enabled.v1_1);
        let mut features2 = vk::PhysicalDeviceFeatures2::default().features(features10);
        let mut swapchain_maintenance =
            vk::PhysicalDeviceSwapchainMaintenance1FeaturesEXT::default()
                .swapchain_maintenance1(true);

        let mut create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs);

        if linked(Version::V1_1) {
            if linked(Version::V1_3) {
                features2 = features2.push_next(&mut features13);
            }

            if linked(Version::V1_2) {
                features2 = features2.push_next(&mut features12);
                features2 = features2.push_next(&mut features11);
            } else {
                features2 = core11.link(features2);
            }

            create_info = create_info.push_next(&mut features2);
        } else {
            create_info = create_info.enabled_features(&features10);
        }

        if request.swapchain_maintenance {
            create_info = create_info.push_next(&mut swapchain_maintenance);
        }

        let device = unsafe {
            self.instance
                .create_device(physical_device, &create_info, None)
        }?;

        Ok(Arc::new(VulkanDevice { device }))
    }

    unsafe fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        unsafe { self.surface_fns.destroy_surface(surface, None) };
    }

    unsafe fn destroy_debug_messenger(&self, messenger: vk::DebugUtilsMessengerEXT) {
        let mut messengers = self.messengers.lock();

        if let Some(debug_utils) = &self.debug_utils {
            unsafe { debug_utils.destroy_debug_utils_messenger(messenger, None) };
        }

        // The handler must outlive the messenger.
        messengers.retain(|(handle, _)| *handle != messenger);
    }

    unsafe fn destroy(&self) {
        unsafe { self.instance.destroy_instance(None) };
    }
}

/// A logical device created by a [`VulkanInstance`].
pub struct VulkanDevice {
    device: ash::Device,
}

impl VulkanDevice {
    #[inline]
    pub fn device(&self) -> &ash::Device {
        &self.device
    }
}

impl fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("handle", &self.device.handle())
            .finish()
    }
}

impl DeviceDriver for VulkanDevice {
    #[inline]
    fn handle(&self) -> vk::Device {
        self.device.handle()
    }

    fn queue(&self, family_index: u32, queue_index: u32) -> vk::Queue {
        unsafe { self.device.get_device_queue(family_index, queue_index) }
    }

    unsafe fn destroy(&self) {
        unsafe { self.device.destroy_device(None) };
    }
}

/// The structs that carry the 1.1 features on a device that predates
/// `VkPhysicalDeviceVulkan11Features`.
#[derive(Default)]
struct Core11Features {
    storage_16bit: vk::PhysicalDevice16BitStorageFeatures<'static>,
    multiview: vk::PhysicalDeviceMultiviewFeatures<'static>,
    variable_pointers: vk::PhysicalDeviceVariablePointersFeatures<'static>,
    protected_memory: vk::PhysicalDeviceProtectedMemoryFeatures<'static>,
    sampler_ycbcr_conversion: vk::PhysicalDeviceSamplerYcbcrConversionFeatures<'static>,
    shader_draw_parameters: vk::PhysicalDeviceShaderDrawParametersFeatures<'static>,
}

impl Core11Features {
    fn new(features: &Features11) -> Self {
        let mut core11 = Core11Features::default();

        core11.storage_16bit.storage_buffer16_bit_access =
            features.storage_buffer16_bit_access.into();
        core11.storage_16bit.uniform_and_storage_buffer16_bit_access =
            features.uniform_and_storage_buffer16_bit_access.into();
        core11.storage_16bit.storage_push_constant16 = features.storage_push_constant16.into();
        core11.storage_16bit.storage_input_output16 = features.storage_input_output16.into();
        core11.multiview.multiview = features.multiview.into();
        core11.multiview.multiview_geometry_shader = features.multiview_geometry_shader.into();
        core11.multiview.multiview_tessellation_shader =
            features.multiview_tessellation_shader.into();
        core11.variable_pointers.variable_pointers_storage_buffer =
            features.variable_pointers_storage_buffer.into();
        core11.variable_pointers.variable_pointers = features.variable_pointers.into();
        core11.protected_memory.protected_memory = features.protected_memory.into();
        core11.sampler_ycbcr_conversion.sampler_ycbcr_conversion =
            features.sampler_ycbcr_conversion.into();
        core11.shader_draw_parameters.shader_draw_parameters =
            features.shader_draw_parameters.into();

        core11
    }

    fn features(&self) -> Features11 {
        Features11 {
            storage_buffer16_bit_access: self.storage_16bit.storage_buffer16_bit_access
                != vk::FALSE,
            uniform_and_storage_buffer16_bit_access: self
                .storage_16bit
                .uniform_and_storage_buffer16_bit_access
                != vk::FALSE,
            storage_push_constant16: self.storage_16bit.storage_push_constant16 != vk::FALSE,
            storage_input_output16: self.storage_16bit.storage_input_output16 != vk::FALSE,
            multiview: self.multiview.multiview != vk::FALSE,
            multiview_geometry_shader: self.multiview.multiview_geometry_shader != vk::FALSE,
            multiview_tessellation_shader: self.multiview.multiview_tessellation_shader
                != vk::FALSE,
            variable_pointers_storage_buffer: self
                .variable_pointers
                .variable_pointers_storage_buffer
                != vk::FALSE,
            variable_pointers: self.variable_pointers.variable_pointers != vk::FALSE,
            protected_memory: self.protected_memory.protected_memory != vk::FALSE,
            sampler_ycbcr_conversion: self.sampler_ycbcr_conversion.sampler_ycbcr_conversion
                != vk::FALSE,
            shader_draw_parameters: self.shader_draw_parameters.shader_draw_parameters
                != vk::FALSE,
        }
    }

    /// Links every struct behind `features2`.
    fn link<'a>(
        &'a mut self,
        features2: vk::PhysicalDeviceFeatures2<'a>,
    ) -> vk::PhysicalDeviceFeatures2<'a> {
        features2
            .push_next(&mut self.shader_draw_parameters)
            .push_next(&mut self.sampler_ycbcr_conversion)
            .push_next(&mut self.protected_memory)
            .push_next(&mut self.variable_pointers)
            .push_next(&mut self.multiview)
            .push_next(&mut self.storage_16bit)
    }
}

fn extension_names(properties: &[vk::ExtensionProperties]) -> NameSet {
    properties
        .iter()
        .filter_map(|property| property.extension_name_as_c_str().ok())
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

fn c_string(value: &str) -> Result<CString, VulkanError> {
    CString::new(value).map_err(|_| VulkanError::InitializationFailed)
}

/// Converts the names in a stable order, so that the driver sees the same list every run.
fn c_strings(names: &NameSet) -> Result<Vec<CString>, VulkanError> {
    sorted(names).into_iter().map(c_string).collect()
}

#[cfg(test)]
mod tests {
    use crate::{
        driver::{Driver, InstanceCreateRequest},
        features::Features10,
        Version,
    };

    #[test]
    fn create_instance_and_query_devices() {
        let driver = vulkan_driver!();

        let api_version = match driver.api_version() {
            Ok(version) => version.min(Version::V1_3),
            Err(_) => return,
        };
        assert!(api_version >= Version::V1_0);
        assert!(driver.layer_names().is_ok());

        assert!(driver.instance_extension_names(None).is_ok());

        let request = InstanceCreateRequest {
            application_name: "boiler test".to_owned(),
            api_version,
            ..Default::default()
        };
        let instance = match driver.create_instance(&request) {
            Ok(instance) => instance,
            Err(_) => return,
        };

        for physical_device in instance.enumerate_physical_devices().unwrap() {
            let properties = instance.physical_device_properties(physical_device);
            assert!(!properties.device_name.is_empty());
            assert!(!instance.queue_family_properties(physical_device).is_empty());

            let supported = instance.supported_features(physical_device, api_version);
            // Every implementation supports this one.
            assert!(supported.v1_0.robust_buffer_access);
            assert_ne!(supported.v1_0, Features10::none());

            assert!(instance
                .device_extension_names(physical_device, None)
                .is_ok());
        }

        unsafe { instance.destroy() };
    }
}
