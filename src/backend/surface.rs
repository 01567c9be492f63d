// Window surface - the presentation target bound to the window

use ash::extensions::khr;
use ash::prelude::VkResult;
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::c_char;
use std::sync::Arc;
use winit::window::Window;

use super::context::GraphicsContext;
use super::error::{RendererError, Result, VkResultExt};

pub struct Surface {
    pub surface: vk::SurfaceKHR,
    pub loader: khr::Surface,
    context: Arc<GraphicsContext>,
}

/// Instance extensions the platform needs to present to `window`
pub fn required_instance_extensions(window: &Window) -> Result<&'static [*const c_char]> {
    ash_window::enumerate_required_extensions(window.raw_display_handle())
        .init_context("Failed to query surface extensions")
}

impl Surface {
    pub fn new(context: Arc<GraphicsContext>, window: &Window) -> Result<Self> {
        let loader = khr::Surface::new(&context.entry, &context.instance);

        let surface = unsafe {
            ash_window::create_surface(
                &context.entry,
                &context.instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .map_err(|e| RendererError::InitializationFailure(format!("Failed to create surface: {e:?}")))?;

        log::info!("Created window surface");

        Ok(Self {
            surface,
            loader,
            context,
        })
    }

    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, family: u32) -> VkResult<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, family, self.surface)
        }
    }

    pub fn capabilities(&self, physical_device: vk::PhysicalDevice) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
        }
    }

    pub fn formats(&self, physical_device: vk::PhysicalDevice) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_formats(physical_device, self.surface)
        }
    }

    pub fn present_modes(&self, physical_device: vk::PhysicalDevice) -> VkResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
        }
    }

    pub fn context(&self) -> &Arc<GraphicsContext> {
        &self.context
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}
