// Graphics context - Vulkan library, instance and debug messenger
//
// Responsibilities:
// - Instance creation with the windowing extensions
// - Optional validation layer + debug-utils messenger
//
// Everything else holds an Arc<GraphicsContext>, so the instance is the last
// Vulkan object to go.

use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry};
use std::ffi::{c_char, CStr, CString};

use super::error::{RendererError, Result, VkResultExt};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Debug-utils entry points (resolved once by name) plus the installed messenger
struct DebugMessenger {
    loader: DebugUtils,
    messenger: vk::DebugUtilsMessengerEXT,
}

pub struct GraphicsContext {
    debug: Option<DebugMessenger>,
    pub instance: ash::Instance,
    pub entry: Entry,
    pub enabled_layers: Vec<&'static CStr>,
}

impl GraphicsContext {
    /// Create the Vulkan instance
    ///
    /// # Arguments
    /// * `app_name` - Application name reported to the driver
    /// * `enable_diagnostics` - Turn on the validation layer and messenger
    /// * `required_extensions` - Instance extensions the window surface needs
    pub fn new(
        app_name: &str,
        enable_diagnostics: bool,
        required_extensions: &[*const c_char],
    ) -> Result<Self> {
        log::info!("Creating Vulkan instance: {}", app_name);

        let entry = unsafe { Entry::load() }.map_err(|e| {
            RendererError::InitializationFailure(format!(
                "Failed to load Vulkan library. Is Vulkan installed? ({e})"
            ))
        })?;

        let available = entry
            .enumerate_instance_extension_properties(None)
            .init_context("Failed to enumerate instance extensions")?;
        let available_names: Vec<&CStr> = available
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
            .collect();
        log::debug!("Instance extensions available: {:?}", available_names);

        let mut extensions: Vec<*const c_char> = required_extensions.to_vec();
        if enable_diagnostics {
            extensions.push(DebugUtils::name().as_ptr());
        }
        let wanted: Vec<&CStr> = extensions
            .iter()
            .map(|&ptr| unsafe { CStr::from_ptr(ptr) })
            .collect();
        let missing = missing_names(&available_names, &wanted);
        if !missing.is_empty() {
            return Err(RendererError::InitializationFailure(format!(
                "Instance extensions not supported: {:?}",
                missing
            )));
        }

        let enabled_layers = if enable_diagnostics {
            let layers = entry
                .enumerate_instance_layer_properties()
                .init_context("Failed to enumerate instance layers")?;
            let layer_names: Vec<&CStr> = layers
                .iter()
                .map(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) })
                .collect();
            if !missing_names(&layer_names, &[VALIDATION_LAYER]).is_empty() {
                return Err(RendererError::InitializationFailure(format!(
                    "Validation requested but {:?} is not installed",
                    VALIDATION_LAYER
                )));
            }
            vec![VALIDATION_LAYER]
        } else {
            Vec::new()
        };

        let instance = Self::create_instance(&entry, app_name, &extensions, &enabled_layers)?;

        let debug = if enable_diagnostics {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(debug) => Some(debug),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        log::info!(
            "Instance ready ({} extensions, validation {})",
            extensions.len(),
            if debug.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            debug,
            instance,
            entry,
            enabled_layers,
        })
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        extensions: &[*const c_char],
        layers: &[&CStr],
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name).map_err(|_| {
            RendererError::InitializationFailure(format!("Invalid application name {app_name:?}"))
        })?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"No Engine")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let layer_ptrs: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

        // Lets the validation layer report on vkCreateInstance/vkDestroyInstance too
        let mut debug_info = debug_messenger_create_info();

        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(extensions)
            .enabled_layer_names(&layer_ptrs);
        if !layers.is_empty() {
            create_info = create_info.push_next(&mut debug_info);
        }

        unsafe { entry.create_instance(&create_info, None) }
            .init_context("Failed to create Vulkan instance")
    }

    fn setup_debug_messenger(entry: &Entry, instance: &ash::Instance) -> Result<DebugMessenger> {
        let loader = DebugUtils::new(entry, instance);
        let create_info = debug_messenger_create_info();

        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .init_context("Failed to create debug messenger")?;

        Ok(DebugMessenger { loader, messenger })
    }

    pub fn enabled_layer_ptrs(&self) -> Vec<*const c_char> {
        self.enabled_layers.iter().map(|l| l.as_ptr()).collect()
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance...");
        unsafe {
            if let Some(debug) = self.debug.take() {
                debug
                    .loader
                    .destroy_debug_utils_messenger(debug.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn debug_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
        .build()
}

/// Names from `wanted` that do not appear in `available`
fn missing_names<'a>(available: &[&CStr], wanted: &[&'a CStr]) -> Vec<&'a CStr> {
    wanted
        .iter()
        .copied()
        .filter(|name| !available.contains(name))
        .collect()
}

fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Info
    } else {
        log::Level::Trace
    }
}

fn message_kind(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "general"
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    log::log!(
        severity_level(message_severity),
        "[Vulkan/{}] {}",
        message_kind(message_type),
        message.to_string_lossy()
    );

    // Never abort the call that triggered the message
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_maps_to_log_levels() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        assert_eq!(severity_level(S::ERROR), log::Level::Error);
        assert_eq!(severity_level(S::WARNING), log::Level::Warn);
        assert_eq!(severity_level(S::INFO), log::Level::Info);
        assert_eq!(severity_level(S::VERBOSE), log::Level::Trace);
    }

    #[test]
    fn message_kind_prefers_validation() {
        use vk::DebugUtilsMessageTypeFlagsEXT as T;
        assert_eq!(message_kind(T::VALIDATION | T::GENERAL), "validation");
        assert_eq!(message_kind(T::PERFORMANCE), "performance");
        assert_eq!(message_kind(T::GENERAL), "general");
    }

    #[test]
    fn missing_names_reports_only_absent_entries() {
        let available = [c"VK_KHR_surface", c"VK_KHR_xcb_surface"];
        let wanted = [c"VK_KHR_surface", c"VK_EXT_debug_utils"];
        assert_eq!(missing_names(&available, &wanted), vec![c"VK_EXT_debug_utils"]);
        assert!(missing_names(&available, &[c"VK_KHR_surface"]).is_empty());
    }

    #[test]
    fn validation_layer_missing_is_detected() {
        let layers = [c"VK_LAYER_MESA_device_select"];
        assert_eq!(missing_names(&layers, &[VALIDATION_LAYER]), vec![VALIDATION_LAYER]);
    }

    #[test]
    fn callback_never_aborts() {
        let message = c"vkCreateDevice: something odd";
        let data = vk::DebugUtilsMessengerCallbackDataEXT {
            p_message: message.as_ptr(),
            ..Default::default()
        };
        let verdict = unsafe {
            debug_callback(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
                &data,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(verdict, vk::FALSE);
    }
}
