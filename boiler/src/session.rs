// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The negotiated session, and its destruction.

use crate::{
    device::{
        physical::PhysicalDeviceProperties,
        queue::{QueueFamilies, QueueFamilyMapping},
        NegotiatedDevice,
    },
    driver::{DeviceDriver, Driver, InstanceDriver},
    features::FeatureChain,
    instance::{ApplicationInfo, NegotiatedInstance},
    surface::SessionWindow,
    BoilerError, NameSet, Version,
};
use ash::vk;
use parking_lot::Mutex;
use std::{fmt, sync::Arc, time::Duration};

/// The stage a [`SessionContext`] has reached.
///
/// Stages are only ever reached in this order, and none is skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    Uninitialized,
    InstanceNegotiated,
    DeviceNegotiated,
    Ready,
    Destroyed,
}

/// A resource of a collaborator that depends on the device, such as a swapchain or a command
/// pool. Attached resources are destroyed before anything the session owns.
///
/// Implemented for every `FnOnce(&dyn DeviceDriver) + Send`.
pub trait DependentResource: Send {
    fn destroy(self: Box<Self>, device: &dyn DeviceDriver);
}

impl<F> DependentResource for F
where
    F: FnOnce(&dyn DeviceDriver) + Send,
{
    #[inline]
    fn destroy(self: Box<Self>, device: &dyn DeviceDriver) {
        (*self)(device)
    }
}

/// A runtime outside of Vulkan that the session runs on top of, such as an XR runtime.
///
/// It is destroyed after everything else.
pub trait ExternalInstance: Send + Sync {
    /// Instance extensions that the runtime needs.
    fn required_instance_extensions(&self) -> Vec<String>;

    /// Device extensions that the runtime needs.
    fn required_device_extensions(&self) -> Vec<String>;

    fn destroy(&self);
}

/// Everything that was negotiated: the instance, the physical and logical device, the queues,
/// and the surfaces of the windows.
///
/// All handles can be shared with other threads once the session is built. After
/// [`destroy`](Self::destroy), every accessor of a handle returns
/// [`BoilerError::UseAfterDestroy`].
pub struct SessionContext {
    state: SessionState,
    driver: Arc<dyn Driver>,
    application: ApplicationInfo,
    default_timeout: Duration,

    instance: Option<Arc<dyn InstanceDriver>>,
    enabled_layers: NameSet,
    enabled_instance_extensions: NameSet,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,

    windows: Vec<Arc<dyn SessionWindow>>,
    surfaces: Vec<vk::SurfaceKHR>,

    // Borrowed from the instance, and never destroyed.
    physical_device: vk::PhysicalDevice,
    physical_device_properties: PhysicalDeviceProperties,
    device: Option<NegotiatedDevice>,

    dependents: Mutex<Vec<Box<dyn DependentResource>>>,
    external_instance: Option<Arc<dyn ExternalInstance>>,
}

impl SessionContext {
    pub(crate) fn new(
        driver: Arc<dyn Driver>,
        application: ApplicationInfo,
        default_timeout: Duration,
        windows: Vec<Arc<dyn SessionWindow>>,
        external_instance: Option<Arc<dyn ExternalInstance>>,
    ) -> Self {
        SessionContext {
            state: SessionState::Uninitialized,
            driver,
            application,
            default_timeout,
            instance: None,
            enabled_layers: NameSet::default(),
            enabled_instance_extensions: NameSet::default(),
            debug_messenger: None,
            windows,
            surfaces: Vec::new(),
            physical_device: vk::PhysicalDevice::null(),
            physical_device_properties: PhysicalDeviceProperties::default(),
            device: None,
            dependents: Mutex::new(Vec::new()),
            external_instance,
        }
    }

    pub(crate) fn set_instance(&mut self, negotiated: NegotiatedInstance) {
        debug_assert_eq!(self.state, SessionState::Uninitialized);

        self.instance = Some(negotiated.instance);
        self.enabled_layers = negotiated.enabled_layers;
        self.enabled_instance_extensions = negotiated.enabled_extensions;
        self.state = SessionState::InstanceNegotiated;
    }

    pub(crate) fn set_debug_messenger(&mut self, messenger: vk::DebugUtilsMessengerEXT) {
        self.debug_messenger = Some(messenger);
    }

    pub(crate) fn push_surface(&mut self, surface: vk::SurfaceKHR) {
        self.surfaces.push(surface);
    }

    pub(crate) fn set_device(
        &mut self,
        physical_device: vk::PhysicalDevice,
        properties: PhysicalDeviceProperties,
        negotiated: NegotiatedDevice,
    ) {
        debug_assert_eq!(self.state, SessionState::InstanceNegotiated);

        self.physical_device = physical_device;
        self.physical_device_properties = properties;
        self.device = Some(negotiated);
        self.state = SessionState::DeviceNegotiated;
    }

    pub(crate) fn finish(&mut self) {
        debug_assert_eq!(self.state, SessionState::DeviceNegotiated);
        self.state = SessionState::Ready;
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the driver that the session was negotiated with.
    #[inline]
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    #[inline]
    pub fn application(&self) -> &ApplicationInfo {
        &self.application
    }

    /// Returns the API version of the session.
    #[inline]
    pub fn api_version(&self) -> Version {
        self.application.api_version
    }

    /// Returns the timeout that collaborators should use when waiting on the device.
    #[inline]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    fn check_alive(&self) -> Result<(), BoilerError> {
        match self.state {
            SessionState::Destroyed => Err(BoilerError::UseAfterDestroy),
            _ => Ok(()),
        }
    }

    fn negotiated_device(&self) -> Result<&NegotiatedDevice, BoilerError> {
        self.check_alive()?;
        self.device.as_ref().ok_or(BoilerError::UseAfterDestroy)
    }

    pub fn instance(&self) -> Result<&Arc<dyn InstanceDriver>, BoilerError> {
        self.check_alive()?;
        self.instance.as_ref().ok_or(BoilerError::UseAfterDestroy)
    }

    #[inline]
    pub fn instance_handle(&self) -> Result<vk::Instance, BoilerError> {
        self.instance().map(|instance| instance.handle())
    }

    pub fn enabled_layers(&self) -> Result<&NameSet, BoilerError> {
        self.check_alive()?;
        Ok(&self.enabled_layers)
    }

    pub fn enabled_instance_extensions(&self) -> Result<&NameSet, BoilerError> {
        self.check_alive()?;
        Ok(&self.enabled_instance_extensions)
    }

    /// Returns the debug messenger, if validation is enabled.
    pub fn debug_messenger(&self) -> Result<Option<vk::DebugUtilsMessengerEXT>, BoilerError> {
        self.check_alive()?;
        Ok(self.debug_messenger)
    }

    /// Returns the number of windows of the session.
    pub fn window_count(&self) -> Result<usize, BoilerError> {
        self.check_alive()?;
        Ok(self.windows.len())
    }

    /// Returns window `index`, in the order the windows were added.
    pub fn window(&self, index: usize) -> Result<&Arc<dyn SessionWindow>, BoilerError> {
        self.check_alive()?;
        self.windows
            .get(index)
            .ok_or(BoilerError::MissingWindow { index })
    }

    /// Returns the surface of window `index`.
    pub fn surface(&self, index: usize) -> Result<vk::SurfaceKHR, BoilerError> {
        self.check_alive()?;
        self.surfaces
            .get(index)
            .copied()
            .ok_or(BoilerError::MissingWindow { index })
    }

    /// Returns the chosen physical device. The session doesn't own it.
    pub fn physical_device(&self) -> Result<vk::PhysicalDevice, BoilerError> {
        self.negotiated_device()?;
        Ok(self.physical_device)
    }

    pub fn physical_device_properties(&self) -> Result<&PhysicalDeviceProperties, BoilerError> {
        self.negotiated_device()?;
        Ok(&self.physical_device_properties)
    }

    pub fn device(&self) -> Result<&Arc<dyn DeviceDriver>, BoilerError> {
        self.negotiated_device().map(|negotiated| &negotiated.device)
    }

    #[inline]
    pub fn device_handle(&self) -> Result<vk::Device, BoilerError> {
        self.device().map(|device| device.handle())
    }

    pub fn enabled_device_extensions(&self) -> Result<&NameSet, BoilerError> {
        self.negotiated_device()
            .map(|negotiated| &negotiated.enabled_extensions)
    }

    /// Returns the feature chain that the device was created with.
    pub fn enabled_features(&self) -> Result<&FeatureChain, BoilerError> {
        self.negotiated_device()
            .map(|negotiated| &negotiated.enabled_features)
    }

    pub fn queue_family_mapping(&self) -> Result<&QueueFamilyMapping, BoilerError> {
        self.negotiated_device()
            .map(|negotiated| &negotiated.queue_family_mapping)
    }

    pub fn queue_families(&self) -> Result<&QueueFamilies, BoilerError> {
        self.negotiated_device()
            .map(|negotiated| &negotiated.queues)
    }

    /// Returns whether the device was created with the `swapchainMaintenance1` feature of
    /// `VK_EXT_swapchain_maintenance1`.
    pub fn has_swapchain_maintenance(&self) -> Result<bool, BoilerError> {
        self.negotiated_device()
            .map(|negotiated| negotiated.swapchain_maintenance)
    }

    /// Attaches a resource that must be destroyed before the device.
    ///
    /// Resources are destroyed in the reverse order of attachment.
    pub fn attach(&self, resource: impl DependentResource + 'static) -> Result<(), BoilerError> {
        self.check_alive()?;
        self.dependents.lock().push(Box::new(resource));

        Ok(())
    }

    /// Destroys everything the session owns, in the reverse order of creation: the attached
    /// resources, the device, the surfaces, the debug messenger, the instance, the windows and
    /// finally the external instance.
    ///
    /// Calling this again does nothing.
    pub fn destroy(&mut self) {
        if self.state == SessionState::Destroyed {
            return;
        }

        let dependents = std::mem::take(self.dependents.get_mut());

        if let Some(negotiated) = self.device.take() {
            for resource in dependents.into_iter().rev() {
                resource.destroy(&*negotiated.device);
            }

            log::debug!("destroying device");
            unsafe { negotiated.device.destroy() };
        }

        if let Some(instance) = self.instance.take() {
            for surface in self.surfaces.drain(..).rev() {
                unsafe { instance.destroy_surface(surface) };
            }

            if let Some(messenger) = self.debug_messenger.take() {
                log::debug!("destroying debug messenger");
                unsafe { instance.destroy_debug_messenger(messenger) };
            }

            log::debug!("destroying instance");
            unsafe { instance.destroy() };
        }

        self.windows.clear();

        if let Some(external_instance) = self.external_instance.take() {
            log::debug!("destroying external instance");
            external_instance.destroy();
        }

        self.state = SessionState::Destroyed;
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("state", &self.state)
            .field("application", &self.application)
            .field("physical_device", &self.physical_device_properties.device_name)
            .field("windows", &self.windows.len())
            .finish_non_exhaustive()
    }
}
