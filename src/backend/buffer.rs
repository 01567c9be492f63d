// Vertex layout and the static vertex buffer
//
// The buffer lives in host-visible, host-coherent memory and is written
// exactly once at creation.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use std::mem::{offset_of, size_of, size_of_val};
use std::sync::Arc;

use super::device::Device;
use super::error::{RendererError, Result, VkResultExt};

/// Interleaved 2D position + RGB color
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: Vec2,
    pub color: Vec3,
}

impl Vertex {
    pub const fn new(pos: Vec2, color: Vec3) -> Self {
        Self { pos, color }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(size_of::<Self>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            // Position (location 0)
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(offset_of!(Self, pos) as u32)
                .build(),
            // Color (location 1)
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(offset_of!(Self, color) as u32)
                .build(),
        ]
    }
}

/// The one mesh this renderer draws, wound clockwise in Vulkan clip space
pub const TRIANGLE_VERTICES: [Vertex; 3] = [
    Vertex::new(Vec2::new(0.0, -0.5), Vec3::new(1.0, 0.0, 0.0)),
    Vertex::new(Vec2::new(0.5, 0.5), Vec3::new(0.0, 1.0, 0.0)),
    Vertex::new(Vec2::new(-0.5, 0.5), Vec3::new(0.0, 0.0, 1.0)),
];

pub struct VertexBuffer {
    pub buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    vertex_count: u32,
    device: Arc<Device>,
}

impl VertexBuffer {
    /// Create the buffer and copy `vertices` into it
    pub fn new(device: Arc<Device>, vertices: &[Vertex]) -> Result<Self> {
        let size = size_of_val(vertices) as vk::DeviceSize;

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(vk::BufferUsageFlags::VERTEX_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .init_context("Failed to create vertex buffer")?;

        // From here on Drop releases whatever has been created
        let mut this = Self {
            buffer,
            memory: vk::DeviceMemory::null(),
            vertex_count: vertices.len() as u32,
            device,
        };

        let mem_requirements = unsafe { this.device.device.get_buffer_memory_requirements(buffer) };

        let memory_type_index = find_memory_type(
            &this.device.memory_properties,
            mem_requirements.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .ok_or_else(|| {
            RendererError::InitializationFailure(
                "No host-visible, host-coherent memory type for the vertex buffer".into(),
            )
        })?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type_index);

        this.memory = unsafe { this.device.device.allocate_memory(&alloc_info, None) }
            .init_context("Failed to allocate vertex buffer memory")?;

        unsafe {
            this.device
                .device
                .bind_buffer_memory(buffer, this.memory, 0)
                .init_context("Failed to bind vertex buffer memory")?;

            let ptr = this
                .device
                .device
                .map_memory(this.memory, 0, size, vk::MemoryMapFlags::empty())
                .init_context("Failed to map vertex buffer memory")?;

            let bytes: &[u8] = bytemuck::cast_slice(vertices);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
            this.device.device.unmap_memory(this.memory);
        }

        log::info!(
            "Created vertex buffer: {} vertices, {} bytes (memory type {})",
            this.vertex_count,
            size,
            memory_type_index
        );

        Ok(this)
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
}

impl Drop for VertexBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}

/// First memory type allowed by `type_filter` whose flags contain `properties`
pub fn find_memory_type(
    mem_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..mem_properties.memory_type_count).find(|&i| {
        let has_type = (type_filter & (1 << i)) != 0;
        let has_properties = mem_properties.memory_types[i as usize]
            .property_flags
            .contains(properties);
        has_type && has_properties
    })
}
