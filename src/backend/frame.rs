// Frame executor - the per-frame acquire → submit → present state machine
//
// FRAME TIMELINE (one call to draw_frame):
// ┌──────────────────────────────────────────────────────────────────────┐
// │  wait slot fence ─> acquire ─> wait image fence ─> reset slot fence  │
// │        ─> submit ─> present ─> (rebuild?) ─> next slot               │
// └──────────────────────────────────────────────────────────────────────┘
//
// Device-side ordering (acquire → render → present) is carried entirely by
// the slot's two semaphores; host-side ordering by fences. The executor only
// decides what happens in which order. The actual Vulkan calls live behind
// `FrameTarget`, so the protocol can be exercised without a GPU.

use ash::vk;

use super::error::{RendererError, Result};
use super::sync::FrameSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready (possibly from a suboptimal swapchain)
    Image(u32),
    /// The swapchain no longer matches the surface
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Out of date or suboptimal
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    Rebuilt { image_count: usize },
    /// Nothing to build against yet (zero-area window); try again later
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    Skipped,
}

/// Device operations the executor drives
pub trait FrameTarget {
    /// Block until `fence` is signaled (no timeout)
    fn wait_for_fence(&mut self, fence: vk::Fence) -> Result<()>;
    fn reset_fence(&mut self, fence: vk::Fence) -> Result<()>;
    fn acquire_next_image(&mut self, signal: vk::Semaphore) -> Result<AcquireOutcome>;
    /// Submit the pre-recorded commands for `image_index`, waiting on
    /// `slot.image_available` and signaling `slot.render_finished` and
    /// `slot.in_flight_fence`
    fn submit(&mut self, image_index: u32, slot: &FrameSlot) -> Result<()>;
    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<PresentOutcome>;
    /// Drain the device and rebuild everything keyed to the swapchain
    fn rebuild(&mut self) -> Result<RebuildOutcome>;
}

pub struct FrameExecutor {
    slots: Vec<FrameSlot>,
    /// Fence of the slot that last rendered into each swapchain image
    images_in_flight: Vec<Option<vk::Fence>>,
    current_frame: usize,
    resize_pending: bool,
    rebuild_pending: bool,
}

impl FrameExecutor {
    /// `image_count` is `None` when the swapchain could not be built yet
    pub fn new(slots: Vec<FrameSlot>, image_count: Option<usize>) -> Result<Self> {
        if slots.is_empty() {
            return Err(RendererError::InitializationFailure(
                "At least one frame in flight is required".into(),
            ));
        }
        Ok(Self {
            slots,
            images_in_flight: vec![None; image_count.unwrap_or(0)],
            current_frame: 0,
            resize_pending: false,
            rebuild_pending: image_count.is_none(),
        })
    }

    #[cfg(test)]
    fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Level-triggered: any number of calls before the next present collapse
    /// into one rebuild
    pub fn notify_resized(&mut self) {
        self.resize_pending = true;
    }

    /// True while a rebuild is waiting for a usable drawable size
    pub fn rebuild_pending(&self) -> bool {
        self.rebuild_pending
    }

    pub fn draw_frame<T: FrameTarget>(&mut self, target: &mut T) -> Result<FrameStatus> {
        if self.rebuild_pending && !self.rebuild(target)? {
            return Ok(FrameStatus::Skipped);
        }

        let slot = self.slots[self.current_frame];

        target.wait_for_fence(slot.in_flight_fence)?;

        let image_index = match target.acquire_next_image(slot.image_available)? {
            AcquireOutcome::Image(index) => index,
            AcquireOutcome::Stale => {
                log::debug!("Swapchain stale on acquire, rebuilding");
                self.rebuild(target)?;
                return Ok(FrameStatus::Skipped);
            }
        };

        // An earlier frame may still be rendering into this image
        let image_fence = self
            .images_in_flight
            .get_mut(image_index as usize)
            .ok_or(RendererError::SwapchainUnavailable)?;
        if let Some(fence) = image_fence.replace(slot.in_flight_fence) {
            if fence != slot.in_flight_fence {
                target.wait_for_fence(fence)?;
            }
        }

        target.reset_fence(slot.in_flight_fence)?;
        target.submit(image_index, &slot)?;

        let outcome = target.present(image_index, slot.render_finished)?;
        if outcome == PresentOutcome::Stale || self.resize_pending {
            log::debug!("Rebuilding after present ({:?}, resize {})", outcome, self.resize_pending);
            self.rebuild(target)?;
        }

        self.current_frame = (self.current_frame + 1) % self.slots.len();
        Ok(FrameStatus::Presented)
    }

    /// Returns whether the swapchain was actually rebuilt
    fn rebuild<T: FrameTarget>(&mut self, target: &mut T) -> Result<bool> {
        self.rebuild_pending = true;
        self.resize_pending = false;

        match target.rebuild()? {
            RebuildOutcome::Rebuilt { image_count } => {
                self.images_in_flight = vec![None; image_count];
                self.rebuild_pending = false;
                Ok(true)
            }
            RebuildOutcome::Deferred => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait(u64),
        Reset(u64),
        Acquire(u64),
        Submit(u32, u64),
        Present(u32, u64),
        Rebuild,
    }

    /// Records every call; scripted answers, defaulting to the happy path
    struct Recorder {
        calls: Vec<Call>,
        image_count: u32,
        next_image: u32,
        acquire_script: VecDeque<AcquireOutcome>,
        present_script: VecDeque<PresentOutcome>,
        rebuild_script: VecDeque<RebuildOutcome>,
        submit_error: Option<vk::Result>,
        rebuilding: bool,
        rebuilds: usize,
    }

    impl Recorder {
        fn new(image_count: u32) -> Self {
            Self {
                calls: Vec::new(),
                image_count,
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                rebuild_script: VecDeque::new(),
                submit_error: None,
                rebuilding: false,
                rebuilds: 0,
            }
        }

        fn waits(&self) -> Vec<u64> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Wait(f) => Some(*f),
                    _ => None,
                })
                .collect()
        }

        fn take_calls(&mut self) -> Vec<Call> {
            std::mem::take(&mut self.calls)
        }
    }

    impl FrameTarget for Recorder {
        fn wait_for_fence(&mut self, fence: vk::Fence) -> Result<()> {
            self.calls.push(Call::Wait(fence.as_raw()));
            Ok(())
        }

        fn reset_fence(&mut self, fence: vk::Fence) -> Result<()> {
            self.calls.push(Call::Reset(fence.as_raw()));
            Ok(())
        }

        fn acquire_next_image(&mut self, signal: vk::Semaphore) -> Result<AcquireOutcome> {
            self.calls.push(Call::Acquire(signal.as_raw()));
            Ok(self.acquire_script.pop_front().unwrap_or_else(|| {
                let index = self.next_image;
                self.next_image = (self.next_image + 1) % self.image_count;
                AcquireOutcome::Image(index)
            }))
        }

        fn submit(&mut self, image_index: u32, slot: &FrameSlot) -> Result<()> {
            self.calls
                .push(Call::Submit(image_index, slot.in_flight_fence.as_raw()));
            match self.submit_error {
                Some(result) => Err(RendererError::RenderFailure {
                    stage: "queue submit",
                    result,
                }),
                None => Ok(()),
            }
        }

        fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<PresentOutcome> {
            self.calls.push(Call::Present(image_index, wait.as_raw()));
            Ok(self
                .present_script
                .pop_front()
                .unwrap_or(PresentOutcome::Presented))
        }

        fn rebuild(&mut self) -> Result<RebuildOutcome> {
            assert!(!self.rebuilding, "rebuild re-entered");
            self.rebuilding = true;
            self.calls.push(Call::Rebuild);
            let outcome = self
                .rebuild_script
                .pop_front()
                .unwrap_or(RebuildOutcome::Rebuilt {
                    image_count: self.image_count as usize,
                });
            if let RebuildOutcome::Rebuilt { .. } = outcome {
                self.rebuilds += 1;
                self.next_image = 0;
            }
            self.rebuilding = false;
            Ok(outcome)
        }
    }

    /// Slot i: image_available 100+i, render_finished 200+i, fence 1+i
    fn slots(n: u64) -> Vec<FrameSlot> {
        (0..n)
            .map(|i| FrameSlot {
                image_available: vk::Semaphore::from_raw(100 + i),
                render_finished: vk::Semaphore::from_raw(200 + i),
                in_flight_fence: vk::Fence::from_raw(1 + i),
            })
            .collect()
    }

    #[test]
    fn two_frames_cycle_through_both_slots() {
        let mut executor = FrameExecutor::new(slots(2), Some(3)).unwrap();
        let mut target = Recorder::new(3);

        assert_eq!(executor.current_frame(), 0);
        assert_eq!(executor.draw_frame(&mut target).unwrap(), FrameStatus::Presented);
        assert_eq!(executor.current_frame(), 1);
        assert_eq!(executor.draw_frame(&mut target).unwrap(), FrameStatus::Presented);
        assert_eq!(executor.current_frame(), 0);

        // Fresh images never need an extra wait, so each slot fence is
        // waited on exactly once
        assert_eq!(target.waits(), vec![1, 2]);
        assert_eq!(
            target.calls,
            vec![
                Call::Wait(1),
                Call::Acquire(100),
                Call::Reset(1),
                Call::Submit(0, 1),
                Call::Present(0, 200),
                Call::Wait(2),
                Call::Acquire(101),
                Call::Reset(2),
                Call::Submit(1, 2),
                Call::Present(1, 201),
            ]
        );
    }

    #[test]
    fn slot_count_is_independent_of_image_count() {
        let mut executor = FrameExecutor::new(slots(3), Some(2)).unwrap();
        let mut target = Recorder::new(2);

        for _ in 0..6 {
            executor.draw_frame(&mut target).unwrap();
        }
        assert_eq!(executor.current_frame(), 0);
    }

    #[test]
    fn image_still_in_flight_is_waited_on() {
        let mut executor = FrameExecutor::new(slots(2), Some(2)).unwrap();
        let mut target = Recorder::new(2);
        // Both frames get image 0
        target.acquire_script = VecDeque::from([AcquireOutcome::Image(0), AcquireOutcome::Image(0)]);

        executor.draw_frame(&mut target).unwrap();
        target.take_calls();
        executor.draw_frame(&mut target).unwrap();

        assert_eq!(
            target.calls,
            vec![
                Call::Wait(2),
                Call::Acquire(101),
                Call::Wait(1), // slot 0 rendered into image 0
                Call::Reset(2),
                Call::Submit(0, 2),
                Call::Present(0, 201),
            ]
        );
        assert_eq!(executor.images_in_flight[0], Some(vk::Fence::from_raw(2)));
    }

    #[test]
    fn stale_acquire_rebuilds_and_skips_the_frame() {
        let mut executor = FrameExecutor::new(slots(2), Some(3)).unwrap();
        let mut target = Recorder::new(3);
        target.acquire_script = VecDeque::from([AcquireOutcome::Stale]);

        assert_eq!(executor.draw_frame(&mut target).unwrap(), FrameStatus::Skipped);
        assert_eq!(
            target.take_calls(),
            vec![Call::Wait(1), Call::Acquire(100), Call::Rebuild]
        );
        // Fence was not reset, so the next wait on slot 0 cannot deadlock
        assert_eq!(executor.current_frame(), 0);

        assert_eq!(executor.draw_frame(&mut target).unwrap(), FrameStatus::Presented);
        assert_eq!(target.waits(), vec![1]);
        assert_eq!(target.rebuilds, 1);
    }

    #[test]
    fn back_to_back_stale_signals_rebuild_one_at_a_time() {
        let mut executor = FrameExecutor::new(slots(2), Some(3)).unwrap();
        let mut target = Recorder::new(3);
        target.acquire_script = VecDeque::from([AcquireOutcome::Stale, AcquireOutcome::Stale]);

        assert_eq!(executor.draw_frame(&mut target).unwrap(), FrameStatus::Skipped);
        assert_eq!(executor.draw_frame(&mut target).unwrap(), FrameStatus::Skipped);
        // Recorder asserts on re-entry; two signals, two sequential rebuilds
        assert_eq!(target.rebuilds, 2);
        assert!(!executor.rebuild_pending());
        assert_eq!(executor.draw_frame(&mut target).unwrap(), FrameStatus::Presented);
    }

    #[test]
    fn stale_present_rebuilds_after_advancing() {
        let mut executor = FrameExecutor::new(slots(2), Some(3)).unwrap();
        let mut target = Recorder::new(3);
        target.present_script = VecDeque::from([PresentOutcome::Stale]);

        assert_eq!(executor.draw_frame(&mut target).unwrap(), FrameStatus::Presented);
        assert_eq!(target.calls.last(), Some(&Call::Rebuild));
        assert_eq!(executor.current_frame(), 1);
        // The rebuilt swapchain starts with no image owned by any fence
        assert!(executor.images_in_flight.iter().all(Option::is_none));
    }

    #[test]
    fn repeated_resize_notifications_collapse_into_one_rebuild() {
        let mut executor = FrameExecutor::new(slots(2), Some(3)).unwrap();
        let mut target = Recorder::new(3);

        executor.notify_resized();
        executor.notify_resized();
        executor.notify_resized();
        executor.draw_frame(&mut target).unwrap();
        executor.draw_frame(&mut target).unwrap();

        assert_eq!(target.rebuilds, 1);
        assert_eq!(
            target.calls.iter().filter(|c| **c == Call::Rebuild).count(),
            1
        );
    }

    #[test]
    fn minimized_window_defers_until_size_returns() {
        let mut executor = FrameExecutor::new(slots(2), Some(3)).unwrap();
        let mut target = Recorder::new(3);
        target.acquire_script = VecDeque::from([AcquireOutcome::Stale]);
        target.rebuild_script = VecDeque::from([
            RebuildOutcome::Deferred,
            RebuildOutcome::Deferred,
            RebuildOutcome::Rebuilt { image_count: 2 },
        ]);

        // Minimized: stale swapchain, but nothing to build against
        assert_eq!(executor.draw_frame(&mut target).unwrap(), FrameStatus::Skipped);
        assert!(executor.rebuild_pending());
        target.take_calls();

        // Still minimized: only the rebuild is retried, no device work
        assert_eq!(executor.draw_frame(&mut target).unwrap(), FrameStatus::Skipped);
        assert_eq!(target.take_calls(), vec![Call::Rebuild]);
        assert_eq!(target.rebuilds, 0);

        // Restored: rebuild succeeds and the same call renders a frame
        assert_eq!(executor.draw_frame(&mut target).unwrap(), FrameStatus::Presented);
        assert!(!executor.rebuild_pending());
        assert_eq!(executor.images_in_flight.len(), 2);
        assert_eq!(target.take_calls()[0], Call::Rebuild);
    }

    #[test]
    fn starting_without_swapchain_builds_before_first_frame() {
        let mut executor = FrameExecutor::new(slots(2), None).unwrap();
        let mut target = Recorder::new(3);
        assert!(executor.rebuild_pending());

        assert_eq!(executor.draw_frame(&mut target).unwrap(), FrameStatus::Presented);
        assert_eq!(target.calls[0], Call::Rebuild);
        assert_eq!(target.calls[1], Call::Wait(1));
    }

    #[test]
    fn zero_frames_in_flight_is_rejected() {
        let err = FrameExecutor::new(Vec::new(), Some(3)).err().unwrap();
        assert!(matches!(err, RendererError::InitializationFailure(_)));
    }

    #[test]
    fn submit_failure_is_fatal() {
        let mut executor = FrameExecutor::new(slots(2), Some(3)).unwrap();
        let mut target = Recorder::new(3);
        target.submit_error = Some(vk::Result::ERROR_DEVICE_LOST);

        let err = executor.draw_frame(&mut target).unwrap_err();
        assert!(matches!(
            err,
            RendererError::RenderFailure {
                result: vk::Result::ERROR_DEVICE_LOST,
                ..
            }
        ));
        assert!(!target.calls.iter().any(|c| matches!(c, Call::Present(..))));
    }
}
