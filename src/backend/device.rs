// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Physical device selection (score every candidate, prefer discrete GPU)
// - Queue family resolution (graphics + present, possibly the same family)
// - Logical device + queue creation

use ash::extensions::khr;
use ash::vk;
use std::ffi::CStr;
use std::sync::Arc;

use super::context::GraphicsContext;
use super::error::{RendererError, Result, VkResultExt};
use super::surface::Surface;

/// Bonus that puts any discrete GPU ahead of an otherwise equal integrated one
const DISCRETE_GPU_BONUS: u32 = 1000;

/// Device extensions every candidate must support
pub fn required_device_extensions() -> [&'static CStr; 1] {
    [khr::Swapchain::name()]
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Distinct families, graphics first
    pub fn unique(&self) -> Vec<u32> {
        let mut families: Vec<u32> = self.graphics.into_iter().chain(self.present).collect();
        families.dedup();
        families
    }
}

/// Scan families in index order, stopping as soon as both roles are known
pub fn resolve_queue_families<E>(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> std::result::Result<bool, E>,
) -> std::result::Result<QueueFamilyIndices, E> {
    let mut indices = QueueFamilyIndices::default();

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;

        if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            indices.graphics = Some(index);
        }
        if indices.present.is_none() && supports_present(index)? {
            indices.present = Some(index);
        }
        if indices.is_complete() {
            break;
        }
    }

    Ok(indices)
}

/// Everything the selector needs to know about one physical device
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub physical_device: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub max_image_dimension: u32,
    pub queue_families: QueueFamilyIndices,
    pub extensions_supported: bool,
    pub format_count: usize,
    pub present_mode_count: usize,
}

impl DeviceCandidate {
    fn query(
        instance: &ash::Instance,
        surface: &Surface,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let props = unsafe { instance.get_physical_device_properties(physical_device) };
        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let queue_families = resolve_queue_families(&families, |index| {
            surface.supports_present(physical_device, index)
        })
        .init_context("Failed to query present support")?;

        let available = unsafe { instance.enumerate_device_extension_properties(physical_device) }
            .init_context("Failed to enumerate device extensions")?;
        let extensions_supported = required_device_extensions().iter().all(|required| {
            available
                .iter()
                .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == *required)
        });

        // Surface support can only be asked about once the swapchain extension is known to exist
        let (format_count, present_mode_count) = if extensions_supported {
            let formats = surface
                .formats(physical_device)
                .init_context("Failed to query surface formats")?;
            let modes = surface
                .present_modes(physical_device)
                .init_context("Failed to query present modes")?;
            (formats.len(), modes.len())
        } else {
            (0, 0)
        };

        Ok(Self {
            physical_device,
            name,
            device_type: props.device_type,
            max_image_dimension: props.limits.max_image_dimension2_d,
            queue_families,
            extensions_supported,
            format_count,
            present_mode_count,
        })
    }

    /// Suitability score; 0 means the device cannot be used at all
    pub fn score(&self) -> u32 {
        if !self.queue_families.is_complete()
            || !self.extensions_supported
            || self.format_count == 0
            || self.present_mode_count == 0
        {
            return 0;
        }

        let base = if self.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            DISCRETE_GPU_BONUS
        } else {
            0
        };
        base.saturating_add(self.max_image_dimension)
    }
}

/// Highest-scoring candidate; the earlier one wins a tie
pub fn pick_best(candidates: &[DeviceCandidate]) -> Result<&DeviceCandidate> {
    let mut best: Option<(&DeviceCandidate, u32)> = None;

    for candidate in candidates {
        let score = candidate.score();
        log::debug!("GPU candidate {:?} ({:?}): score {}", candidate.name, candidate.device_type, score);
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((candidate, score));
        }
    }

    match best {
        None => Err(RendererError::DeviceNotFound("No Vulkan-capable GPU found".into())),
        Some((_, 0)) => Err(RendererError::DeviceNotFound(
            "No GPU supports graphics, presentation and swapchains for this surface".into(),
        )),
        Some((candidate, _)) => Ok(candidate),
    }
}

/// Logical device wrapper with automatic cleanup
pub struct Device {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub graphics_queue_family: u32,
    pub present_queue_family: u32,

    // Cached for memory type selection
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,

    pub swapchain_loader: khr::Swapchain,
    _context: Arc<GraphicsContext>,
}

impl Device {
    /// Pick the best GPU for `surface` and create the logical device on it
    pub fn new(surface: &Surface) -> Result<Arc<Self>> {
        let context = surface.context().clone();
        let instance = &context.instance;

        let physical_devices = unsafe { instance.enumerate_physical_devices() }
            .init_context("Failed to enumerate GPUs")?;

        let candidates = physical_devices
            .into_iter()
            .map(|pd| DeviceCandidate::query(instance, surface, pd))
            .collect::<Result<Vec<_>>>()?;

        let chosen = pick_best(&candidates)?;
        let (Some(graphics_queue_family), Some(present_queue_family)) =
            (chosen.queue_families.graphics, chosen.queue_families.present)
        else {
            return Err(RendererError::DeviceNotFound("Queue families unresolved".into()));
        };
        let physical_device = chosen.physical_device;

        let device = Self::create_logical_device(&context, physical_device, &chosen.queue_families)?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_queue_family, 0) };

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        log::info!(
            "Selected GPU: {} ({:?}, score {})",
            chosen.name,
            chosen.device_type,
            chosen.score()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics {}, present {}",
            graphics_queue_family,
            present_queue_family
        );

        let swapchain_loader = khr::Swapchain::new(instance, &device);

        Ok(Arc::new(Self {
            device,
            physical_device,
            graphics_queue,
            present_queue,
            graphics_queue_family,
            present_queue_family,
            memory_properties,
            swapchain_loader,
            _context: context,
        }))
    }

    fn create_logical_device(
        context: &GraphicsContext,
        physical_device: vk::PhysicalDevice,
        families: &QueueFamilyIndices,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<_> = required_device_extensions()
            .iter()
            .map(|name| name.as_ptr())
            .collect();
        // Device layers are ignored by current loaders but older ones still read them
        let layers = context.enabled_layer_ptrs();
        let features = vk::PhysicalDeviceFeatures::default();

        #[allow(deprecated)]
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers)
            .enabled_features(&features);

        unsafe { context.instance.create_device(physical_device, &create_info, None) }
            .init_context("Failed to create logical device")
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.map_err(RendererError::render("device wait idle"))
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        log::info!("Destroying logical device...");
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn capable(device_type: vk::PhysicalDeviceType, max_dim: u32) -> DeviceCandidate {
        DeviceCandidate {
            physical_device: vk::PhysicalDevice::null(),
            name: format!("{device_type:?}-{max_dim}"),
            device_type,
            max_image_dimension: max_dim,
            queue_families: QueueFamilyIndices {
                graphics: Some(0),
                present: Some(0),
            },
            extensions_supported: true,
            format_count: 2,
            present_mode_count: 1,
        }
    }

    #[test]
    fn queue_scan_takes_first_of_each_role() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let indices =
            resolve_queue_families(&families, |i| Ok::<_, ()>(i == 0 || i == 2)).unwrap();
        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(0));
        assert_eq!(indices.unique(), vec![1, 0]);
    }

    #[test]
    fn queue_scan_stops_once_both_roles_resolved() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let mut asked = Vec::new();
        let indices = resolve_queue_families(&families, |i| {
            asked.push(i);
            Ok::<_, ()>(true)
        })
        .unwrap();
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(0));
        assert_eq!(asked, vec![0]);
        assert_eq!(indices.unique(), vec![0]);
    }

    #[test]
    fn queue_scan_without_present_is_incomplete() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = resolve_queue_families(&families, |_| Ok::<_, ()>(false)).unwrap();
        assert!(!indices.is_complete());
    }

    #[test]
    fn queue_scan_propagates_query_errors() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let err = resolve_queue_families(&families, |_| Err(vk::Result::ERROR_SURFACE_LOST_KHR));
        assert_eq!(err, Err(vk::Result::ERROR_SURFACE_LOST_KHR));
    }

    #[test]
    fn missing_capability_scores_zero() {
        let base = capable(vk::PhysicalDeviceType::DISCRETE_GPU, 16384);

        let mut no_graphics = base.clone();
        no_graphics.queue_families.graphics = None;
        let mut no_present = base.clone();
        no_present.queue_families.present = None;
        let mut no_swapchain = base.clone();
        no_swapchain.extensions_supported = false;
        let mut no_formats = base.clone();
        no_formats.format_count = 0;
        let mut no_modes = base.clone();
        no_modes.present_mode_count = 0;

        for candidate in [no_graphics, no_present, no_swapchain, no_formats, no_modes] {
            assert_eq!(candidate.score(), 0, "{candidate:?}");
        }
    }

    #[test]
    fn score_grows_with_image_dimension() {
        let small = capable(vk::PhysicalDeviceType::INTEGRATED_GPU, 4096);
        let large = capable(vk::PhysicalDeviceType::INTEGRATED_GPU, 8192);
        assert!(large.score() > small.score());
        assert_eq!(small.score(), 4096);
    }

    #[test]
    fn discrete_gets_bonus() {
        let discrete = capable(vk::PhysicalDeviceType::DISCRETE_GPU, 2048);
        assert_eq!(discrete.score(), 3048);
    }

    #[test]
    fn dimension_gap_over_1000_outranks_discrete_bonus() {
        let a = capable(vk::PhysicalDeviceType::INTEGRATED_GPU, 4096);
        let b = capable(vk::PhysicalDeviceType::DISCRETE_GPU, 2048);
        let candidates = [a, b];
        let best = pick_best(&candidates).unwrap();
        assert_eq!(best.score(), 4096);
        assert_eq!(best.device_type, vk::PhysicalDeviceType::INTEGRATED_GPU);

        let a = capable(vk::PhysicalDeviceType::INTEGRATED_GPU, 4096);
        let b = capable(vk::PhysicalDeviceType::DISCRETE_GPU, 4096);
        let candidates = [a, b];
        assert_eq!(
            pick_best(&candidates).unwrap().device_type,
            vk::PhysicalDeviceType::DISCRETE_GPU
        );
    }

    #[test]
    fn pick_best_keeps_first_on_tie() {
        let mut first = capable(vk::PhysicalDeviceType::INTEGRATED_GPU, 4096);
        first.name = "first".into();
        let mut second = capable(vk::PhysicalDeviceType::INTEGRATED_GPU, 4096);
        second.name = "second".into();
        let candidates = [first, second];
        assert_eq!(pick_best(&candidates).unwrap().name, "first");
    }

    #[test]
    fn pick_best_fails_without_candidates() {
        assert!(matches!(pick_best(&[]), Err(RendererError::DeviceNotFound(_))));
    }

    #[test]
    fn pick_best_fails_when_everything_scores_zero() {
        let mut unusable = capable(vk::PhysicalDeviceType::DISCRETE_GPU, 16384);
        unusable.extensions_supported = false;
        assert!(matches!(
            pick_best(&[unusable]),
            Err(RendererError::DeviceNotFound(_))
        ));
    }
}
