// Renderer error type
//
// Startup failures are fatal and carry a readable reason. Per-frame failures
// are fatal too, except a stale swapchain, which never reaches this type.

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RendererError {
    /// Anything that stops the renderer from coming up
    #[error("initialization failed: {0}")]
    InitializationFailure(String),

    #[error("no suitable GPU: {0}")]
    DeviceNotFound(String),

    #[error("failed to create swapchain: {0:?}")]
    SwapchainCreation(vk::Result),

    /// A device operation failed in a way the frame loop cannot recover from
    #[error("{stage} failed: {result:?}")]
    RenderFailure {
        stage: &'static str,
        result: vk::Result,
    },

    #[error("swapchain resources are not available")]
    SwapchainUnavailable,
}

pub type Result<T, E = RendererError> = std::result::Result<T, E>;

impl RendererError {
    pub fn render(stage: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::RenderFailure { stage, result }
    }
}

/// `.context()`-style conversion from raw Vulkan results into startup errors
pub trait VkResultExt<T> {
    fn init_context(self, what: &str) -> Result<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn init_context(self, what: &str) -> Result<T> {
        self.map_err(|e| RendererError::InitializationFailure(format!("{what}: {e:?}")))
    }
}
