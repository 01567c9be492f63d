// Backend module - Vulkan abstraction layer
//
// Design: Thin wrappers around ash, one owned struct per stage
// Teardown: every wrapper releases its handles in Drop

pub mod buffer;
pub mod commands;
pub mod context;
pub mod device;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use frame::FrameStatus;
