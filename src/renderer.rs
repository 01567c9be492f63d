// =============================================================================
// RENDERER - Owns every Vulkan resource and drives the frame loop
// =============================================================================
//
// OWNERSHIP:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Renderer                                                       │
// │    ├── FrameExecutor (which slot, which image, rebuild flags)   │
// │    ├── FrameSync     (semaphores + fences per slot)             │
// │    └── Presenter                                                │
// │          ├── ExtentBound (command buffers, framebuffers,        │
// │          │                pipeline, swapchain)                  │
// │          ├── VertexBuffer, CommandPool                          │
// │          └── Surface ─> Device ─> GraphicsContext               │
// └─────────────────────────────────────────────────────────────────┘
//
// Fields are declared in teardown order. Each resource holds an Arc to the
// thing it was created from, so the instance and device outlive every child.
//
// =============================================================================

use ash::vk;
use std::sync::Arc;
use winit::window::Window;

use crate::backend::buffer::{VertexBuffer, TRIANGLE_VERTICES};
use crate::backend::commands::{CommandBuffers, CommandPool, RecordTargets};
use crate::backend::context::GraphicsContext;
use crate::backend::device::Device;
use crate::backend::error::{RendererError, Result};
use crate::backend::frame::{
    AcquireOutcome, FrameExecutor, FrameStatus, FrameTarget, PresentOutcome, RebuildOutcome,
};
use crate::backend::pipeline::PipelineResources;
use crate::backend::shader::ShaderSources;
use crate::backend::surface::{self, Surface};
use crate::backend::swapchain::{self, Framebuffers, SwapchainResources};
use crate::backend::sync::{FrameSlot, FrameSync};
use crate::config::Config;

pub struct Renderer {
    executor: FrameExecutor,
    frame_sync: FrameSync,
    presenter: Presenter,
}

impl Renderer {
    /// Bring up the whole stack for `window`
    ///
    /// Every step propagates its error; whatever was already built is
    /// released in reverse as the locals go out of scope.
    pub fn new(window: Arc<Window>, config: &Config) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        let shaders = config.shaders.validate()?;

        let extensions = surface::required_instance_extensions(&window)?;
        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let context = Arc::new(GraphicsContext::new(
            &config.window.title,
            enable_validation,
            extensions,
        )?);

        let surface = Surface::new(context, &window)?;
        let device = Device::new(&surface)?;
        let command_pool = CommandPool::new(device.clone())?;
        let vertex_buffer = VertexBuffer::new(device.clone(), &TRIANGLE_VERTICES)?;

        let mut presenter = Presenter {
            bound: None,
            vertex_buffer,
            command_pool,
            surface,
            device: device.clone(),
            window,
            shaders,
            preferred_present_mode: config.preferred_present_mode(),
            clear_color: config.graphics.clear_color,
        };

        // A window that starts minimized gets its swapchain on a later frame
        let image_count = match presenter.rebuild()? {
            RebuildOutcome::Rebuilt { image_count } => Some(image_count),
            RebuildOutcome::Deferred => None,
        };

        let frame_sync = FrameSync::new(device, config.graphics.max_frames_in_flight)?;
        let executor = FrameExecutor::new(frame_sync.slots().to_vec(), image_count)?;

        log::info!("Vulkan initialized successfully!");
        Ok(Self {
            executor,
            frame_sync,
            presenter,
        })
    }

    pub fn draw_frame(&mut self) -> Result<FrameStatus> {
        self.executor.draw_frame(&mut self.presenter)
    }

    pub fn notify_resized(&mut self) {
        self.executor.notify_resized();
    }

    /// True while the window has no drawable area and nothing can be shown
    pub fn awaiting_drawable(&self) -> bool {
        self.executor.rebuild_pending()
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.presenter.device.wait_idle()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frame_sync.slots().len()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        // Nothing may be destroyed while the GPU still uses it
        if let Err(e) = self.wait_idle() {
            log::error!("Wait idle before teardown failed: {}", e);
        }
    }
}

/// Everything sized to the current swapchain, torn down and rebuilt together
struct ExtentBound {
    command_buffers: CommandBuffers,
    framebuffers: Framebuffers,
    pipeline: PipelineResources,
    swapchain: SwapchainResources,
}

/// The live Vulkan side of the frame loop
struct Presenter {
    bound: Option<ExtentBound>,
    vertex_buffer: VertexBuffer,
    command_pool: CommandPool,
    surface: Surface,
    device: Arc<Device>,
    window: Arc<Window>,

    shaders: ShaderSources,
    preferred_present_mode: vk::PresentModeKHR,
    clear_color: [f32; 4],
}

impl Presenter {
    fn bound(&self) -> Result<&ExtentBound> {
        self.bound.as_ref().ok_or(RendererError::SwapchainUnavailable)
    }

    /// Drop everything hanging off the swapchain, hand back the swapchain
    /// itself so it can be passed as `old_swapchain`
    fn retire(&mut self) -> Option<SwapchainResources> {
        let ExtentBound {
            command_buffers,
            framebuffers,
            pipeline,
            swapchain,
        } = self.bound.take()?;

        drop(command_buffers);
        drop(framebuffers);
        drop(pipeline);
        Some(swapchain)
    }
}

impl FrameTarget for Presenter {
    fn wait_for_fence(&mut self, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.device.wait_for_fences(&[fence], true, u64::MAX) }
            .map_err(RendererError::render("wait for fence"))
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.device.reset_fences(&[fence]) }
            .map_err(RendererError::render("reset fence"))
    }

    fn acquire_next_image(&mut self, signal: vk::Semaphore) -> Result<AcquireOutcome> {
        let swapchain = self.bound()?.swapchain.swapchain;
        let result = unsafe {
            self.device
                .swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null())
        };

        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::trace!("Acquired image {} from a suboptimal swapchain", index);
                }
                Ok(AcquireOutcome::Image(index))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale),
            Err(e) => Err(RendererError::render("acquire next image")(e)),
        }
    }

    fn submit(&mut self, image_index: u32, slot: &FrameSlot) -> Result<()> {
        let bound = self.bound()?;
        let cmd = *bound
            .command_buffers
            .buffers
            .get(image_index as usize)
            .ok_or(RendererError::SwapchainUnavailable)?;

        let wait_semaphores = [slot.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [cmd];
        let signal_semaphores = [slot.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                slot.in_flight_fence,
            )
        }
        .map_err(RendererError::render("queue submit"))
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<PresentOutcome> {
        let swapchains = [self.bound()?.swapchain.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.device
                .swapchain_loader
                .queue_present(self.device.present_queue, &present_info)
        };

        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            // Suboptimal
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
            Err(e) => Err(RendererError::render("queue present")(e)),
        }
    }

    fn rebuild(&mut self) -> Result<RebuildOutcome> {
        // Some platforms report a 0x0 surface for a moment after restore
        let caps = self
            .surface
            .capabilities(self.device.physical_device)
            .map_err(RendererError::render("query surface capabilities"))?;
        let size = self.window.inner_size();
        let Some(drawable) = swapchain::rebuild_extent(&caps, size.width, size.height) else {
            log::debug!(
                "Nothing to draw on (window {}x{}), deferring swapchain rebuild",
                size.width,
                size.height
            );
            return Ok(RebuildOutcome::Deferred);
        };

        self.device.wait_idle()?;

        let retired = self.retire();
        let old_handle = retired
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), |s| s.swapchain);

        let created = SwapchainResources::new(
            self.device.clone(),
            &self.surface,
            drawable,
            self.preferred_present_mode,
            old_handle,
        );
        // Retired or not, the old swapchain is ours to destroy
        drop(retired);
        let swapchain = created?;

        let pipeline = PipelineResources::new(
            self.device.clone(),
            swapchain.format.format,
            &self.shaders,
        )?;
        let framebuffers = Framebuffers::new(self.device.clone(), pipeline.render_pass, &swapchain)?;
        let command_buffers = CommandBuffers::record(
            self.device.clone(),
            &self.command_pool,
            &RecordTargets {
                swapchain: &swapchain,
                framebuffers: &framebuffers,
                pipeline: &pipeline,
                vertex_buffer: &self.vertex_buffer,
                clear_color: self.clear_color,
            },
        )?;

        let image_count = swapchain.image_count();
        log::info!(
            "Swapchain ready: {}x{}, {} images, {:?}",
            swapchain.extent.width,
            swapchain.extent.height,
            image_count,
            swapchain.present_mode
        );

        self.bound = Some(ExtentBound {
            command_buffers,
            framebuffers,
            pipeline,
            swapchain,
        });

        Ok(RebuildOutcome::Rebuilt { image_count })
    }
}
