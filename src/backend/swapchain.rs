// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen, plus
// everything keyed to their extent (views, framebuffers).
// Never patched in place: a resize or stale signal replaces the whole set.

use ash::vk;
use std::sync::Arc;

use super::device::Device;
use super::error::{RendererError, Result, VkResultExt};
use super::surface::Surface;

const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Preferred SRGB pair if offered, otherwise whatever the surface lists first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| f.format == PREFERRED_FORMAT.format && f.color_space == PREFERRED_FORMAT.color_space)
        .or_else(|| formats.first().copied())
}

/// `preferred` if the surface offers it; FIFO is always supported
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's own extent when it has one, else the drawable size clamped
/// to what the surface accepts
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, drawable: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: drawable
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: drawable
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum so the driver never blocks us; a max of 0 means
/// "no limit"
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && image_count > caps.max_image_count {
        caps.max_image_count
    } else {
        image_count
    }
}

/// Images are shared between queues only when graphics and present differ
pub fn choose_sharing(graphics_family: u32, present_family: u32) -> (vk::SharingMode, Vec<u32>) {
    if graphics_family == present_family {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, vec![graphics_family, present_family])
    }
}

/// `None` while the window has no area (e.g. minimized)
pub fn drawable_extent(width: u32, height: u32) -> Option<vk::Extent2D> {
    (width > 0 && height > 0).then_some(vk::Extent2D { width, height })
}

/// Extent a rebuild should use, or `None` while either the window or the
/// surface has no area
pub fn rebuild_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> Option<vk::Extent2D> {
    let drawable = drawable_extent(width, height)?;
    let extent = choose_extent(caps, drawable);
    (extent.width > 0 && extent.height > 0).then_some(extent)
}

pub struct SwapchainResources {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    device: Arc<Device>,
}

impl SwapchainResources {
    /// Create a swapchain for `surface`
    ///
    /// `old_swapchain` may be the handle being replaced (or null); it is
    /// retired by the driver but still has to be destroyed by the caller.
    pub fn new(
        device: Arc<Device>,
        surface: &Surface,
        drawable: vk::Extent2D,
        preferred_mode: vk::PresentModeKHR,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<Self> {
        let pd = device.physical_device;
        let caps = surface
            .capabilities(pd)
            .init_context("Failed to query surface capabilities")?;
        let formats = surface
            .formats(pd)
            .init_context("Failed to query surface formats")?;
        let present_modes = surface
            .present_modes(pd)
            .init_context("Failed to query present modes")?;

        let format = choose_surface_format(&formats).ok_or_else(|| {
            RendererError::InitializationFailure("Surface reports no formats".into())
        })?;
        let present_mode = choose_present_mode(&present_modes, preferred_mode);
        let extent = choose_extent(&caps, drawable);
        let image_count = choose_image_count(&caps);
        let (sharing_mode, queue_families) =
            choose_sharing(device.graphics_queue_family, device.present_queue_family);

        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}, {:?}, {:?}",
            extent.width,
            extent.height,
            image_count,
            format.format,
            present_mode,
            sharing_mode
        );

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&queue_families)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { device.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(RendererError::SwapchainCreation)?;

        // Drop takes over from here, including on the error paths below
        let mut this = Self {
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            format,
            extent,
            present_mode,
            device,
        };

        this.images = unsafe { this.device.swapchain_loader.get_swapchain_images(swapchain) }
            .init_context("Failed to get swapchain images")?;

        for &image in &this.images {
            let view = create_image_view(&this.device.device, image, format.format)?;
            this.image_views.push(view);
        }

        log::info!("Created swapchain with {} images", this.images.len());
        Ok(this)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl Drop for SwapchainResources {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.device
                .swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }
    }
}

fn create_image_view(device: &ash::Device, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&create_info, None) }.init_context("Failed to create image view")
}

/// One framebuffer per swapchain image view
pub struct Framebuffers {
    pub framebuffers: Vec<vk::Framebuffer>,
    device: Arc<Device>,
}

impl Framebuffers {
    pub fn new(
        device: Arc<Device>,
        render_pass: vk::RenderPass,
        swapchain: &SwapchainResources,
    ) -> Result<Self> {
        let mut this = Self {
            framebuffers: Vec::with_capacity(swapchain.image_views.len()),
            device,
        };

        for &image_view in &swapchain.image_views {
            let attachments = &[image_view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(attachments)
                .width(swapchain.extent.width)
                .height(swapchain.extent.height)
                .layers(1);

            let framebuffer = unsafe { this.device.device.create_framebuffer(&framebuffer_info, None) }
                .init_context("Failed to create framebuffer")?;
            this.framebuffers.push(framebuffer);
        }

        Ok(this)
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
        }
    }
}
