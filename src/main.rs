// =============================================================================
// VULKAN TRIANGLE RENDERER
// =============================================================================
//
// Opens a window and draws one vertex-colored triangle every frame, keeping
// the swapchain in step with window resizes and minimization.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (App)                                         │
// │    └── Renderer                                                 │
// │          └── Context ─> Surface ─> Device                       │
// │                └── Swapchain + Pipeline + Command Buffers       │
// │                      └── Frame executor (fences, semaphores)    │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait for the frame slot's fence
// 2. Acquire swapchain image
// 3. Wait for any frame still rendering into that image
// 4. Submit pre-recorded commands to GPU
// 5. Present rendered image to screen
// 6. Rebuild the swapchain if it went stale or the window was resized
//
// =============================================================================

mod backend;
mod config;
mod renderer;

use anyhow::Result;
use backend::FrameStatus;
use config::Config;
use renderer::Renderer;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{StartCause, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let (config, report) = Config::load();

    init_logging(&config);
    log::info!("Starting Vulkan renderer");
    report.emit();
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        config.window.title
    );
    log::info!(
        "Present mode: {}, frames in flight: {}",
        config.graphics.present_mode,
        config.graphics.max_frames_in_flight
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // Renderer is released before a startup/frame error is reported
    drop(app.renderer.take());
    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Initialize logging, optionally redirected into the configured log file
fn init_logging(config: &Config) {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    // RUST_LOG still wins over the default level
    builder.parse_default_env();

    if config.debug.log_to_file {
        match File::create(&config.debug.log_file) {
            Ok(mut file) => {
                let _ = writeln!(file, "=== Vulkan Renderer Log ===");
                let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                let _ = writeln!(file);
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!(
                "Could not open log file {}: {}. Logging to stderr.",
                config.debug.log_file, e
            ),
        }
    }

    builder.init();
}

/// How often a deferred swapchain rebuild is retried while the window has
/// area but the surface does not yet
const REBUILD_RETRY: Duration = Duration::from_millis(16);

/// How the loop idles between frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pacing {
    /// Redraw as fast as presentation allows
    Continuous,
    /// Retry the rebuild on a short timer
    Retry,
    /// Minimized: sleep until the next window event
    Sleep,
}

fn pacing(awaiting_drawable: bool, size: PhysicalSize<u32>) -> Pacing {
    if !awaiting_drawable {
        Pacing::Continuous
    } else if size.width == 0 || size.height == 0 {
        Pacing::Sleep
    } else {
        Pacing::Retry
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,

    /// Dropped before the window: the surface must go first
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,

    /// First unrecoverable error; returned from main after the loop exits
    fatal: Option<anyhow::Error>,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            config,
            renderer: None,
            window: None,
            fatal: None,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        if self.fatal.is_none() {
            self.fatal = Some(error);
        }
        event_loop.exit();
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(true);

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match Renderer::new(window.clone(), &self.config) {
            Ok(renderer) => {
                log::info!("Rendering with {} frames in flight", renderer.frames_in_flight());
                self.renderer = Some(renderer);
            }
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to initialize Vulkan"));
                return;
            }
        }

        self.window = Some(window);
    }

    /// Handle window events.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(ref mut renderer) = self.renderer {
                    renderer.notify_resized();
                }
                if let Some(ref window) = self.window {
                    window.request_redraw();
                }
            }

            WindowEvent::RedrawRequested => {
                let Some(ref mut renderer) = self.renderer else {
                    return;
                };
                match renderer.draw_frame() {
                    Ok(FrameStatus::Presented) => self.update_fps(),
                    Ok(FrameStatus::Skipped) => {}
                    Err(e) => {
                        self.fail(event_loop, anyhow::Error::new(e).context("Render error"));
                    }
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Redraw continuously. While a rebuild is deferred, sleep until the next
    /// window event when minimized, otherwise retry on a timer.
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let awaiting = self
            .renderer
            .as_ref()
            .is_some_and(Renderer::awaiting_drawable);
        let size = self
            .window
            .as_ref()
            .map(|w| w.inner_size())
            .unwrap_or_default();

        match pacing(awaiting, size) {
            Pacing::Continuous => {
                event_loop.set_control_flow(ControlFlow::Poll);
                if let Some(ref window) = self.window {
                    window.request_redraw();
                }
            }
            Pacing::Retry => {
                event_loop.set_control_flow(ControlFlow::WaitUntil(Instant::now() + REBUILD_RETRY));
            }
            Pacing::Sleep => event_loop.set_control_flow(ControlFlow::Wait),
        }
    }

    fn new_events(&mut self, _event_loop: &ActiveEventLoop, cause: StartCause) {
        if let StartCause::ResumeTimeReached { .. } = cause {
            if let Some(ref window) = self.window {
                window.request_redraw();
            }
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref renderer) = self.renderer {
            if let Err(e) = renderer.wait_idle() {
                log::error!("Failed to drain the GPU on exit: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pacing_follows_rebuild_state_and_window_area() {
        let shown = PhysicalSize::new(800, 600);
        let minimized = PhysicalSize::new(0, 0);

        assert_eq!(pacing(false, shown), Pacing::Continuous);
        assert_eq!(pacing(true, minimized), Pacing::Sleep);
        assert_eq!(pacing(true, PhysicalSize::new(800, 0)), Pacing::Sleep);
        // Window is back but the surface is not: keep retrying without an event
        assert_eq!(pacing(true, shown), Pacing::Retry);
    }
}
