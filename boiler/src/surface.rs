// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Windows, and the surfaces created for them.
//!
//! Windows are owned by the application and only reach this crate through `raw-window-handle`.
//! Nothing is initialized behind the application's back: the display connection must already be
//! open when a window is registered.

use crate::{BoilerError, VulkanError};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use smallvec::{smallvec, SmallVec};

pub const SURFACE_EXTENSION: &str = "VK_KHR_surface";
pub const SWAPCHAIN_EXTENSION: &str = "VK_KHR_swapchain";
pub const SWAPCHAIN_MAINTENANCE1_EXTENSION: &str = "VK_EXT_swapchain_maintenance1";
pub const SURFACE_MAINTENANCE1_EXTENSION: &str = "VK_EXT_surface_maintenance1";
pub const GET_SURFACE_CAPABILITIES2_EXTENSION: &str = "VK_KHR_get_surface_capabilities2";

/// A window that a session can present to.
pub trait SessionWindow: HasWindowHandle + HasDisplayHandle + Send + Sync {}

impl<T> SessionWindow for T where T: HasWindowHandle + HasDisplayHandle + Send + Sync {}

/// Returns the instance extensions needed to create surfaces on `display`.
pub fn required_extensions(display: RawDisplayHandle) -> SmallVec<[&'static str; 2]> {
    let mut extensions: SmallVec<[&'static str; 2]> = smallvec![SURFACE_EXTENSION];

    match display {
        RawDisplayHandle::Xlib(_) => extensions.push("VK_KHR_xlib_surface"),
        RawDisplayHandle::Xcb(_) => extensions.push("VK_KHR_xcb_surface"),
        RawDisplayHandle::Wayland(_) => extensions.push("VK_KHR_wayland_surface"),
        RawDisplayHandle::Windows(_) => extensions.push("VK_KHR_win32_surface"),
        RawDisplayHandle::Android(_) => extensions.push("VK_KHR_android_surface"),
        RawDisplayHandle::AppKit(_) | RawDisplayHandle::UiKit(_) => {
            extensions.push("VK_EXT_metal_surface")
        }
        _ => (),
    }

    extensions
}

/// Returns the raw handles of `window`.
pub fn raw_handles(
    window: &dyn SessionWindow,
) -> Result<(RawDisplayHandle, RawWindowHandle), BoilerError> {
    let display = window
        .display_handle()
        .map_err(BoilerError::WindowHandle)?
        .as_raw();
    let window = window
        .window_handle()
        .map_err(BoilerError::WindowHandle)?
        .as_raw();

    Ok((display, window))
}

/// Creates a surface for a window.
///
/// Returns `ExtensionNotPresent` for window systems without a surface extension.
///
/// # Safety
///
/// - The handles must be valid, and stay valid until the surface is destroyed.
/// - The surface extension of the window system must be enabled on `instance`.
pub(crate) unsafe fn create_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    display: RawDisplayHandle,
    window: RawWindowHandle,
) -> Result<vk::SurfaceKHR, VulkanError> {
    let result = match (display, window) {
        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(window)) => {
            let display = display.display.ok_or(VulkanError::InitializationFailed)?;
            let create_info = vk::XlibSurfaceCreateInfoKHR::default()
                .dpy(display.as_ptr().cast())
                .window(window.window);
            let loader = ash::khr::xlib_surface::Instance::new(entry, instance);

            unsafe { loader.create_xlib_surface(&create_info, None) }
        }
        (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(window)) => {
            let connection = display.connection.ok_or(VulkanError::InitializationFailed)?;
            let create_info = vk::XcbSurfaceCreateInfoKHR::default()
                .connection(connection.as_ptr())
                .window(window.window.get());
            let loader = ash::khr::xcb_surface::Instance::new(entry, instance);

            unsafe { loader.create_xcb_surface(&create_info, None) }
        }
        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(window)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR::default()
                .display(display.display.as_ptr())
                .surface(window.surface.as_ptr());
            let loader = ash::khr::wayland_surface::Instance::new(entry, instance);

            unsafe { loader.create_wayland_surface(&create_info, None) }
        }
        (_, RawWindowHandle::Win32(window)) => {
            let create_info = vk::Win32SurfaceCreateInfoKHR::default()
                .hinstance(window.hinstance.map_or(0, |hinstance| hinstance.get()))
                .hwnd(window.hwnd.get());
            let loader = ash::khr::win32_surface::Instance::new(entry, instance);

            unsafe { loader.create_win32_surface(&create_info, None) }
        }
        (_, RawWindowHandle::AndroidNdk(window)) => {
            let create_info = vk::AndroidSurfaceCreateInfoKHR::default()
                .window(window.a_native_window.as_ptr());
            let loader = ash::khr::android_surface::Instance::new(entry, instance);

            unsafe { loader.create_android_surface(&create_info, None) }
        }
        _ => return Err(VulkanError::ExtensionNotPresent),
    };

    result.map_err(VulkanError::from)
}

#[cfg(test)]
mod tests {
    use super::{raw_handles, required_extensions, SURFACE_EXTENSION};
    use crate::tests::TestWindow;
    use raw_window_handle::{
        RawDisplayHandle, RawWindowHandle, WaylandDisplayHandle, WebDisplayHandle,
    };
    use std::ptr::NonNull;

    #[test]
    fn xlib_extensions() {
        let window = TestWindow::xlib(7);
        let (display, handle) = raw_handles(&window).unwrap();

        assert_eq!(
            required_extensions(display).as_slice(),
            [SURFACE_EXTENSION, "VK_KHR_xlib_surface"],
        );
        assert!(matches!(handle, RawWindowHandle::Xlib(h) if h.window == 7));
    }

    #[test]
    fn wayland_extensions() {
        let display = RawDisplayHandle::Wayland(WaylandDisplayHandle::new(NonNull::dangling()));
        assert!(required_extensions(display).contains(&"VK_KHR_wayland_surface"));
    }

    #[test]
    fn unknown_window_system() {
        let display = RawDisplayHandle::Web(WebDisplayHandle::new());
        assert_eq!(required_extensions(display).as_slice(), [SURFACE_EXTENSION]);
    }
}
