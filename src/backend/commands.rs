// Command pool and pre-recorded command buffers
//
// The scene never changes, so each swapchain image gets one command buffer
// recorded up front and resubmitted every frame. They are recorded again
// only when the swapchain is rebuilt.

use ash::vk;
use std::sync::Arc;

use super::buffer::VertexBuffer;
use super::device::Device;
use super::error::{Result, VkResultExt};
use super::pipeline::{self, PipelineResources};
use super::swapchain::{Framebuffers, SwapchainResources};

pub struct CommandPool {
    pub pool: vk::CommandPool,
    device: Arc<Device>,
}

impl CommandPool {
    pub fn new(device: Arc<Device>) -> Result<Self> {
        let pool_info =
            vk::CommandPoolCreateInfo::builder().queue_family_index(device.graphics_queue_family);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .init_context("Failed to create command pool")?;

        Ok(Self { pool, device })
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            // Also frees any command buffers still allocated from it
            self.device.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// Everything a recording needs, borrowed from the live resources
pub struct RecordTargets<'a> {
    pub swapchain: &'a SwapchainResources,
    pub framebuffers: &'a Framebuffers,
    pub pipeline: &'a PipelineResources,
    pub vertex_buffer: &'a VertexBuffer,
    pub clear_color: [f32; 4],
}

/// One command buffer per swapchain image, indexed by image index
pub struct CommandBuffers {
    pub buffers: Vec<vk::CommandBuffer>,
    pool: vk::CommandPool,
    device: Arc<Device>,
}

impl CommandBuffers {
    pub fn record(device: Arc<Device>, pool: &CommandPool, targets: &RecordTargets<'_>) -> Result<Self> {
        let count = targets.framebuffers.framebuffers.len() as u32;
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .init_context("Failed to allocate command buffers")?;

        let this = Self {
            buffers,
            pool: pool.pool,
            device,
        };

        for (&cmd, &framebuffer) in this.buffers.iter().zip(&targets.framebuffers.framebuffers) {
            record_draw(&this.device.device, cmd, framebuffer, targets)?;
        }

        log::info!("Recorded {} command buffers", count);
        Ok(this)
    }
}

impl Drop for CommandBuffers {
    fn drop(&mut self) {
        if self.buffers.is_empty() {
            return;
        }
        unsafe {
            self.device
                .device
                .free_command_buffers(self.pool, &self.buffers);
        }
    }
}

/// Clear, bind, set dynamic viewport/scissor, draw the mesh
fn record_draw(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    framebuffer: vk::Framebuffer,
    targets: &RecordTargets<'_>,
) -> Result<()> {
    let extent = targets.swapchain.extent;
    let clear_values = [vk::ClearValue {
        color: vk::ClearColorValue {
            float32: targets.clear_color,
        },
    }];

    let render_pass_info = vk::RenderPassBeginInfo::builder()
        .render_pass(targets.pipeline.render_pass)
        .framebuffer(framebuffer)
        .render_area(pipeline::scissor(extent))
        .clear_values(&clear_values);

    unsafe {
        let begin_info = vk::CommandBufferBeginInfo::builder();
        device
            .begin_command_buffer(cmd, &begin_info)
            .init_context("Failed to begin command buffer")?;

        device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, targets.pipeline.pipeline);
        device.cmd_set_viewport(cmd, 0, &[pipeline::viewport(extent)]);
        device.cmd_set_scissor(cmd, 0, &[pipeline::scissor(extent)]);
        device.cmd_bind_vertex_buffers(cmd, 0, &[targets.vertex_buffer.buffer], &[0]);
        device.cmd_draw(cmd, targets.vertex_buffer.vertex_count(), 1, 0, 0);
        device.cmd_end_render_pass(cmd);

        device
            .end_command_buffer(cmd)
            .init_context("Failed to end command buffer")?;
    }

    Ok(())
}
