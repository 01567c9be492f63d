// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Every field has a default, so a missing file or a missing key is fine.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub shaders: ShaderConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Triangle".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            max_frames_in_flight: 2,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "renderer.log".to_string(),
            show_fps: true,
        }
    }
}

/// Precompiled SPIR-V artifacts consumed by the pipeline builder
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
    pub entry_point: String,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/triangle.vert.spv"),
            fragment: PathBuf::from("shaders/triangle.frag.spv"),
            entry_point: "main".to_string(),
        }
    }
}

/// Messages produced while loading, held until the logger is installed
#[derive(Debug, Default)]
pub struct LoadReport {
    entries: Vec<(log::Level, String)>,
}

impl LoadReport {
    fn info(&mut self, message: String) {
        self.entries.push((log::Level::Info, message));
    }

    fn warn(&mut self, message: String) {
        self.entries.push((log::Level::Warn, message));
    }

    /// Forward everything collected to the `log` facade
    pub fn emit(&self) {
        for (level, message) in &self.entries {
            log::log!(*level, "{}", message);
        }
    }

    #[cfg(test)]
    fn warnings(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(level, _)| *level == log::Level::Warn)
            .map(|(_, message)| message.as_str())
            .collect()
    }
}

impl Config {
    /// Load configuration from config.toml, falling back to defaults
    ///
    /// Runs before logging is set up, so nothing is logged here; call
    /// `LoadReport::emit` once the logger exists.
    pub fn load() -> (Self, LoadReport) {
        Self::load_or_default("config.toml")
    }

    fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, LoadReport) {
        let path = path.as_ref();
        let mut report = LoadReport::default();

        let config = Self::load_from_path(path, &mut report).unwrap_or_else(|e| {
            report.warn(format!("Failed to load {:?}: {:#}. Using defaults.", path, e));
            Config::default()
        });
        (config, report)
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P, report: &mut LoadReport) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            report.info(format!("Config file not found at {:?}, using defaults", path));
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content, report)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        report.info(format!("Loaded configuration from {:?}", path));
        Ok(config)
    }

    fn parse(content: &str, report: &mut LoadReport) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.sanitize(report);
        Ok(config)
    }

    fn sanitize(&mut self, report: &mut LoadReport) {
        if self.graphics.max_frames_in_flight == 0 {
            report.warn("max_frames_in_flight must be at least 1, using 1".to_string());
            self.graphics.max_frames_in_flight = 1;
        }
    }

    /// Preferred present mode as Vulkan enum; FIFO is the fallback when the
    /// surface does not offer it
    pub fn preferred_present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::MAILBOX
            }
        }
    }
}
