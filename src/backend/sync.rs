// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync.
// One slot per frame in flight; the slot count has nothing to do with how
// many images the swapchain has.

use ash::vk;
use std::sync::Arc;

use super::device::Device;
use super::error::{Result, VkResultExt};

/// Frame synchronization - one per frame in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

/// Owns the semaphores and fences of every frame slot
pub struct FrameSync {
    slots: Vec<FrameSlot>,
    device: Arc<Device>,
}

impl FrameSync {
    pub fn new(device: Arc<Device>, frames_in_flight: usize) -> Result<Self> {
        let mut this = Self {
            slots: Vec::with_capacity(frames_in_flight),
            device,
        };

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the very first wait on each slot returns at once
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        for _ in 0..frames_in_flight {
            let dev = &this.device.device;
            // Push as we go so Drop sees every handle created so far
            let mut slot = FrameSlot {
                image_available: vk::Semaphore::null(),
                render_finished: vk::Semaphore::null(),
                in_flight_fence: vk::Fence::null(),
            };
            let result = unsafe {
                dev.create_semaphore(&semaphore_info, None).and_then(|s| {
                    slot.image_available = s;
                    let s = dev.create_semaphore(&semaphore_info, None)?;
                    slot.render_finished = s;
                    let f = dev.create_fence(&fence_info, None)?;
                    slot.in_flight_fence = f;
                    Ok(())
                })
            };
            this.slots.push(slot);
            result.init_context("Failed to create frame sync objects")?;
        }

        log::info!("Created sync objects for {} frames in flight", frames_in_flight);
        Ok(this)
    }

    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        let device = &self.device.device;
        unsafe {
            for slot in &self.slots {
                device.destroy_semaphore(slot.image_available, None);
                device.destroy_semaphore(slot.render_finished, None);
                device.destroy_fence(slot.in_flight_fence, None);
            }
        }
    }
}
