// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

#![cfg(test)]

//! An in-memory driver that records what the negotiation pipeline does with it.

use crate::{
    debug::{DebugMessengerRequest, ValidationMessage},
    device::{
        physical::{PhysicalDeviceProperties, PhysicalDeviceType},
        queue::{QueueFamilyProperties, QueueFlags},
    },
    driver::{DeviceCreateRequest, DeviceDriver, Driver, InstanceCreateRequest, InstanceDriver},
    features::{Features10, Features11, Features12, Features13, TieredFeatures},
    NameSet, Version, VulkanError,
};
use ash::vk::{self, Handle};
use foldhash::HashMap;
use parking_lot::Mutex;
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, RawDisplayHandle,
    RawWindowHandle, WindowHandle, XlibDisplayHandle, XlibWindowHandle,
};
use std::sync::Arc;

/// Creates the real Vulkan driver, or returns if there is no Vulkan library.
macro_rules! vulkan_driver {
    () => {{
        match crate::driver::vulkan::VulkanDriver::new() {
            Ok(driver) => driver,
            Err(_) => return,
        }
    }};
}

/// Builds a session on a mock driver, applying `$configure` to the builder first.
macro_rules! mock_session {
    ($driver:expr) => {
        mock_session!($driver, |builder| builder)
    };
    ($driver:expr, |$builder:ident| $configure:expr) => {{
        let $builder = crate::SessionBuilder::new(
            crate::Version::V1_2,
            "test",
            crate::Version::major_minor(0, 1),
        );
        let builder: crate::SessionBuilder = $configure;

        builder.build($driver.clone()).unwrap()
    }};
}

macro_rules! assert_should_panic {
    ($msg:expr, $code:block) => {{
        let res = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| $code));

        match res {
            Ok(_) => panic!("Test expected to panic but didn't"),
            Err(err) => {
                if let Some(msg) = err.downcast_ref::<String>() {
                    assert!(msg.contains($msg));
                } else if let Some(&msg) = err.downcast_ref::<&str>() {
                    assert!(msg.contains($msg));
                } else {
                    panic!("Couldn't decipher the panic message of the test")
                }
            }
        }
    }};
}

/// State shared by a mock driver and everything it creates.
#[derive(Default)]
struct MockState {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<&'static str, VulkanError>>,
    instance_requests: Mutex<Vec<InstanceCreateRequest>>,
    device_requests: Mutex<Vec<DeviceCreateRequest>>,
    messenger_requests: Mutex<Vec<DebugMessengerRequest>>,
}

impl MockState {
    /// Records a call, and returns the error that was scripted for it.
    fn call(&self, function: &'static str) -> Result<(), VulkanError> {
        self.calls.lock().push(function.to_owned());

        match self.failures.lock().get(function) {
            Some(&error) => Err(error),
            None => Ok(()),
        }
    }
}

/// A physical device of a [`MockDriver`].
#[derive(Clone, Debug)]
pub(crate) struct MockDevice {
    pub(crate) properties: PhysicalDeviceProperties,
    pub(crate) extensions: NameSet,
    pub(crate) layer_extensions: Vec<(String, String)>,
    pub(crate) queue_families: Vec<QueueFamilyProperties>,
    /// `present_support[family][surface]`. Every family supports every surface when `None`.
    pub(crate) present_support: Option<Vec<Vec<bool>>>,
    pub(crate) features: TieredFeatures,
    pub(crate) swapchain_maintenance: bool,
}

impl MockDevice {
    /// A Vulkan 1.3 device with a single graphics and compute family, that supports every
    /// feature and the swapchain extension. The swapchain maintenance feature is supported once
    /// its extension is added.
    pub(crate) fn new(name: &str, device_type: PhysicalDeviceType) -> Self {
        MockDevice {
            properties: PhysicalDeviceProperties {
                device_name: name.to_owned(),
                device_type,
                api_version: Version::V1_3,
                ..Default::default()
            },
            extensions: crate::capabilities::name_set(["VK_KHR_swapchain"]),
            layer_extensions: Vec::new(),
            queue_families: vec![QueueFamilyProperties::new(
                QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER,
            )],
            present_support: None,
            features: TieredFeatures {
                v1_0: Features10::all(),
                v1_1: Features11::all(),
                v1_2: Features12::all(),
                v1_3: Features13::all(),
            },
            swapchain_maintenance: true,
        }
    }

    pub(crate) fn with_api_version(mut self, api_version: Version) -> Self {
        self.properties.api_version = api_version;
        self
    }

    pub(crate) fn with_extension(mut self, name: &str) -> Self {
        self.extensions.insert(name.to_owned());
        self
    }

    pub(crate) fn without_extension(mut self, name: &str) -> Self {
        self.extensions.remove(name);
        self
    }

    pub(crate) fn with_layer_extension(mut self, layer: &str, name: &str) -> Self {
        self.layer_extensions.push((layer.to_owned(), name.to_owned()));
        self
    }

    pub(crate) fn with_queue_families(mut self, families: Vec<QueueFamilyProperties>) -> Self {
        self.queue_families = families;
        self
    }

    pub(crate) fn with_present_support(mut self, support: Vec<Vec<bool>>) -> Self {
        self.present_support = Some(support);
        self
    }

    pub(crate) fn with_swapchain_maintenance(mut self, supported: bool) -> Self {
        self.swapchain_maintenance = supported;
        self
    }

    pub(crate) fn with_features(mut self, edit: impl FnOnce(&mut TieredFeatures)) -> Self {
        edit(&mut self.features);
        self
    }
}

/// A scriptable in-memory [`Driver`].
pub(crate) struct MockDriver {
    api_version: Version,
    layers: Vec<(String, NameSet)>,
    instance_extensions: NameSet,
    devices: Vec<MockDevice>,
    state: Arc<MockState>,
}

impl MockDriver {
    /// A driver without layers, that supports the surface extensions of Xlib.
    pub(crate) fn new(api_version: Version) -> Self {
        MockDriver {
            api_version,
            layers: Vec::new(),
            instance_extensions: crate::capabilities::name_set([
                "VK_KHR_surface",
                "VK_KHR_xlib_surface",
            ]),
            devices: Vec::new(),
            state: Arc::default(),
        }
    }

    pub(crate) fn with_layer(mut self, name: &str, extensions: &[&str]) -> Self {
        self.layers.push((
            name.to_owned(),
            crate::capabilities::name_set(extensions.iter().copied()),
        ));
        self
    }

    pub(crate) fn with_instance_extension(mut self, name: &str) -> Self {
        self.instance_extensions.insert(name.to_owned());
        self
    }

    pub(crate) fn without_instance_extension(mut self, name: &str) -> Self {
        self.instance_extensions.remove(name);
        self
    }

    pub(crate) fn with_device(mut self, device: MockDevice) -> Self {
        self.devices.push(device);
        self
    }

    /// Makes every call to `function` fail with `error`.
    pub(crate) fn failing(self, function: &'static str, error: VulkanError) -> Self {
        self.state.failures.lock().insert(function, error);
        self
    }

    /// Creates an instance directly, without going through negotiation.
    pub(crate) fn mock_instance(&self) -> Arc<MockInstance> {
        Arc::new(MockInstance {
            devices: Mutex::new(self.devices.clone()),
            surface_count: Mutex::new(0),
            state: self.state.clone(),
        })
    }

    /// Every driver function that was called so far, in order.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.calls.lock().clone()
    }

    pub(crate) fn instance_requests(&self) -> Vec<InstanceCreateRequest> {
        self.state.instance_requests.lock().clone()
    }

    pub(crate) fn device_requests(&self) -> Vec<DeviceCreateRequest> {
        self.state.device_requests.lock().clone()
    }

    /// The requests of every debug messenger that was created, destroyed or not.
    pub(crate) fn messenger_requests(&self) -> Vec<DebugMessengerRequest> {
        self.state.messenger_requests.lock().clone()
    }

    /// Sends `message` to every debug messenger, as the validation layer would.
    pub(crate) fn emit(&self, message: &ValidationMessage<'_>) {
        let requests = self.messenger_requests();

        for request in requests {
            if request.severity.intersects(message.severity) && request.ty.intersects(message.ty) {
                (request.handler)(message);
            }
        }
    }
}

impl Driver for MockDriver {
    fn api_version(&self) -> Result<Version, VulkanError> {
        self.state.call("vkEnumerateInstanceVersion")?;
        Ok(self.api_version)
    }

    fn layer_names(&self) -> Result<NameSet, VulkanError> {
        self.state.call("vkEnumerateInstanceLayerProperties")?;
        Ok(self.layers.iter().map(|(name, _)| name.clone()).collect())
    }

    fn instance_extension_names(&self, layer: Option<&str>) -> Result<NameSet, VulkanError> {
        self.state.call("vkEnumerateInstanceExtensionProperties")?;

        Ok(match layer {
            None => self.instance_extensions.clone(),
            Some(layer) => self
                .layers
                .iter()
                .find(|(name, _)| name == layer)
                .map(|(_, extensions)| extensions.clone())
                .unwrap_or_default(),
        })
    }

    fn create_instance(
        &self,
        request: &InstanceCreateRequest,
    ) -> Result<Arc<dyn InstanceDriver>, VulkanError> {
        self.state.call("vkCreateInstance")?;
        self.state.instance_requests.lock().push(request.clone());

        Ok(self.mock_instance())
    }
}

/// An instance of a [`MockDriver`].
///
/// Physical device `i` has handle `i + 1`. Surface `i` has handle `i + 1`.
pub(crate) struct MockInstance {
    devices: Mutex<Vec<MockDevice>>,
    surface_count: Mutex<u64>,
    state: Arc<MockState>,
}

impl MockInstance {
    pub(crate) fn edit_device(&self, index: usize, edit: impl FnOnce(&mut MockDevice)) {
        edit(&mut self.devices.lock()[index]);
    }

    fn device<T>(&self, handle: vk::PhysicalDevice, f: impl FnOnce(&MockDevice) -> T) -> T {
        let index = handle.as_raw() as usize - 1;
        f(&self.devices.lock()[index])
    }
}

impl InstanceDriver for MockInstance {
    fn handle(&self) -> vk::Instance {
        vk::Instance::from_raw(1)
    }

    fn enumerate_physical_devices(&self) -> Result<Vec<vk::PhysicalDevice>, VulkanError> {
        self.state.call("vkEnumeratePhysicalDevices")?;
        let count = self.devices.lock().len() as u64;

        Ok((1..=count).map(vk::PhysicalDevice::from_raw).collect())
    }

    fn physical_device_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> PhysicalDeviceProperties {
        self.device(physical_device, |device| device.properties.clone())
    }

    fn queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<QueueFamilyProperties> {
        self.device(physical_device, |device| device.queue_families.clone())
    }

    fn device_extension_names(
        &self,
        physical_device: vk::PhysicalDevice,
        layer: Option<&str>,
    ) -> Result<NameSet, VulkanError> {
        self.state.call("vkEnumerateDeviceExtensionProperties")?;

        Ok(self.device(physical_device, |device| match layer {
            None => device.extensions.clone(),
            Some(layer) => device
                .layer_extensions
                .iter()
                .filter(|(name, _)| name == layer)
                .map(|(_, extension)| extension.clone())
                .collect(),
        }))
    }

    fn supported_features(
        &self,
        physical_device: vk::PhysicalDevice,
        api_version: Version,
    ) -> TieredFeatures {
        self.device(physical_device, |device| {
            let version = api_version.min(device.properties.api_version);
            let features = &device.features;

            TieredFeatures {
                v1_0: features.v1_0,
                v1_1: if version >= Version::V1_1 { features.v1_1 } else { Features11::none() },
                v1_2: if version >= Version::V1_2 { features.v1_2 } else { Features12::none() },
                v1_3: if version >= Version::V1_3 { features.v1_3 } else { Features13::none() },
            }
        })
    }

    fn swapchain_maintenance_support(&self, physical_device: vk::PhysicalDevice) -> bool {
        self.state
            .calls
            .lock()
            .push("vkGetPhysicalDeviceFeatures2".to_owned());

        self.device(physical_device, |device| device.swapchain_maintenance)
    }

    fn surface_support(
        &self,
        physical_device: vk::PhysicalDevice,
        family_index: u32,
        surface: vk::SurfaceKHR,
    ) -> Result<bool, VulkanError> {
        self.state.call("vkGetPhysicalDeviceSurfaceSupportKHR")?;
        let surface_index = surface.as_raw() as usize - 1;

        Ok(self.device(physical_device, |device| {
            match &device.present_support {
                None => true,
                Some(support) => support
                    .get(family_index as usize)
                    .and_then(|family| family.get(surface_index))
                    .copied()
                    .unwrap_or(false),
            }
        }))
    }

    unsafe fn create_surface(
        &self,
        _display: RawDisplayHandle,
        _window: RawWindowHandle,
    ) -> Result<vk::SurfaceKHR, VulkanError> {
        self.state.call("vkCreateSurfaceKHR")?;
        let mut count = self.surface_count.lock();
        *count += 1;

        Ok(vk::SurfaceKHR::from_raw(*count))
    }

    fn create_debug_messenger(
        &self,
        request: DebugMessengerRequest,
    ) -> Result<vk::DebugUtilsMessengerEXT, VulkanError> {
        self.state.call("vkCreateDebugUtilsMessengerEXT")?;
        let mut requests = self.state.messenger_requests.lock();
        requests.push(request);

        Ok(vk::DebugUtilsMessengerEXT::from_raw(requests.len() as u64))
    }

    fn create_device(
        &self,
        _physical_device: vk::PhysicalDevice,
        request: &DeviceCreateRequest,
    ) -> Result<Arc<dyn DeviceDriver>, VulkanError> {
        self.state.call("vkCreateDevice")?;
        self.state.device_requests.lock().push(request.clone());

        Ok(Arc::new(MockDeviceDriver {
            state: self.state.clone(),
        }))
    }

    unsafe fn destroy_surface(&self, _surface: vk::SurfaceKHR) {
        self.state.calls.lock().push("vkDestroySurfaceKHR".to_owned());
    }

    unsafe fn destroy_debug_messenger(&self, _messenger: vk::DebugUtilsMessengerEXT) {
        self.state
            .calls
            .lock()
            .push("vkDestroyDebugUtilsMessengerEXT".to_owned());
    }

    unsafe fn destroy(&self) {
        self.state.calls.lock().push("vkDestroyInstance".to_owned());
    }
}

/// A logical device of a [`MockDriver`]. Queue handles encode their family and index.
pub(crate) struct MockDeviceDriver {
    state: Arc<MockState>,
}

impl DeviceDriver for MockDeviceDriver {
    fn handle(&self) -> vk::Device {
        vk::Device::from_raw(1)
    }

    fn queue(&self, family_index: u32, queue_index: u32) -> vk::Queue {
        vk::Queue::from_raw(((family_index as u64 + 1) << 8) | queue_index as u64)
    }

    unsafe fn destroy(&self) {
        self.state.calls.lock().push("vkDestroyDevice".to_owned());
    }
}

/// A window with Xlib handles that don't point at anything.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TestWindow {
    window: u64,
}

impl TestWindow {
    pub(crate) fn xlib(window: u64) -> Self {
        TestWindow { window }
    }
}

impl HasWindowHandle for TestWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        let raw = RawWindowHandle::Xlib(XlibWindowHandle::new(self.window as _));

        Ok(unsafe { WindowHandle::borrow_raw(raw) })
    }
}

impl HasDisplayHandle for TestWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        let raw = RawDisplayHandle::Xlib(XlibDisplayHandle::new(None, 0));

        Ok(unsafe { DisplayHandle::borrow_raw(raw) })
    }
}
