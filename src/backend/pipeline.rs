// Graphics pipeline creation and management
//
// The graphics pipeline defines how vertices are processed and rasterized.
// It includes: vertex input, shaders, rasterization, blending.
// Viewport and scissor are dynamic and set while recording commands.

use ash::vk;
use std::sync::Arc;

use super::buffer::Vertex;
use super::device::Device;
use super::error::{Result, VkResultExt};
use super::shader::{ShaderModule, ShaderSources};

/// Render pass + pipeline, rebuilt together with the swapchain
pub struct PipelineResources {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    device: Arc<Device>,
}

impl PipelineResources {
    pub fn new(device: Arc<Device>, format: vk::Format, shaders: &ShaderSources) -> Result<Self> {
        let render_pass = create_render_pass(&device.device, format)?;

        // Null handles are valid no-ops for the destroy calls in Drop
        let mut this = Self {
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
            render_pass,
            device,
        };

        // No descriptor sets, no push constants
        let layout_info = vk::PipelineLayoutCreateInfo::builder();
        this.layout = unsafe { this.device.device.create_pipeline_layout(&layout_info, None) }
            .init_context("Failed to create pipeline layout")?;

        this.pipeline =
            create_graphics_pipeline(&this.device.device, this.render_pass, this.layout, shaders)?;

        log::info!("Created graphics pipeline for {:?}", format);
        Ok(this)
    }
}

impl Drop for PipelineResources {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
            self.device.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Single-subpass render pass writing one color attachment that ends up
/// ready for presentation
pub fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
    // Color attachment (the swapchain image)
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .build();

    // The layout transition must wait until the acquire semaphore has fired,
    // which is signalled at COLOR_ATTACHMENT_OUTPUT
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .build();

    let attachments = &[color_attachment];
    let subpasses = &[subpass];
    let dependencies = &[dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    unsafe { device.create_render_pass(&render_pass_info, None) }
        .init_context("Failed to create render pass")
}

/// Fixed-function state + the two shader stages
fn create_graphics_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    shaders: &ShaderSources,
) -> Result<vk::Pipeline> {
    let vert_module = ShaderModule::new(device, &shaders.vertex)?;
    let frag_module = ShaderModule::new(device, &shaders.fragment)?;

    let shader_stages = &[
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_module.module)
            .name(&shaders.entry_point)
            .build(),
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag_module.module)
            .name(&shaders.entry_point)
            .build(),
    ];

    // Vertex input
    let bindings = [Vertex::binding_description()];
    let attributes = Vertex::attribute_descriptions();
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    // Input assembly
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Viewport and scissor: counts only, the values come from dynamic state
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let dynamic_states = dynamic_states();
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    // Rasterization
    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false);

    // Multisampling (disabled)
    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    // Color blending (no blending, opaque)
    let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
        .build();

    let color_blend_attachments = &[color_blend_attachment];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(color_blend_attachments);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0)
        .build();

    let pipelines = unsafe {
        device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_, e)| e)
            .init_context("Failed to create graphics pipeline")?
    };

    // Shader modules are dropped here; the pipeline keeps what it needs
    Ok(pipelines[0])
}

fn dynamic_states() -> [vk::DynamicState; 2] {
    [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]
}

/// Full-surface viewport for `extent`
pub fn viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_and_scissor_are_dynamic() {
        assert_eq!(
            dynamic_states(),
            [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]
        );
    }

    #[test]
    fn viewport_covers_extent() {
        let extent = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        let vp = viewport(extent);
        assert_eq!((vp.width, vp.height), (1024.0, 768.0));
        assert_eq!((vp.min_depth, vp.max_depth), (0.0, 1.0));

        let rect = scissor(extent);
        assert_eq!(rect.offset, vk::Offset2D { x: 0, y: 0 });
        assert_eq!(rect.extent, extent);
    }
}
