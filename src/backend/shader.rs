// Shader module loading
//
// Vulkan consumes SPIR-V bytecode. The artifacts are produced ahead of time
// (see build.rs) and read from the paths in the [shaders] config section.

use ash::vk;
use std::ffi::CString;
use std::fs::File;
use std::path::Path;

use super::error::{RendererError, Result, VkResultExt};
use crate::config::ShaderConfig;

/// Shader bytecode checked and ready for module creation
pub struct ShaderSources {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
    pub entry_point: CString,
}

impl ShaderConfig {
    /// Read both artifacts and check the entry point name before any Vulkan
    /// object is created from them
    pub fn validate(&self) -> Result<ShaderSources> {
        let entry_point = CString::new(self.entry_point.as_str()).map_err(|_| {
            RendererError::InitializationFailure(format!(
                "Shader entry point {:?} contains a NUL byte",
                self.entry_point
            ))
        })?;
        if self.entry_point.is_empty() {
            return Err(RendererError::InitializationFailure(
                "Shader entry point is empty".into(),
            ));
        }

        Ok(ShaderSources {
            vertex: read_spirv(&self.vertex)?,
            fragment: read_spirv(&self.fragment)?,
            entry_point,
        })
    }
}

/// Load a SPIR-V file as aligned 32-bit words
pub fn read_spirv(path: &Path) -> Result<Vec<u32>> {
    let mut file = File::open(path).map_err(|e| {
        RendererError::InitializationFailure(format!("Cannot open shader {:?}: {}", path, e))
    })?;

    let words = ash::util::read_spv(&mut file).map_err(|e| {
        RendererError::InitializationFailure(format!("Invalid SPIR-V in {:?}: {}", path, e))
    })?;

    if words.is_empty() {
        return Err(RendererError::InitializationFailure(format!(
            "Shader {:?} is empty",
            path
        )));
    }

    log::debug!("Loaded shader {:?} ({} words)", path, words.len());
    Ok(words)
}

/// Shader module that is destroyed as soon as the pipeline no longer needs it
pub struct ShaderModule<'a> {
    pub module: vk::ShaderModule,
    device: &'a ash::Device,
}

impl<'a> ShaderModule<'a> {
    pub fn new(device: &'a ash::Device, code: &[u32]) -> Result<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

        let module = unsafe { device.create_shader_module(&create_info, None) }
            .init_context("Failed to create shader module")?;

        Ok(Self { module, device })
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn scratch_file(name: &str, bytes: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "triangle-renderer-{}-{}",
            std::process::id(),
            name
        ));
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn spirv_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn missing_artifact_is_initialization_failure() {
        let err = read_spirv(Path::new("no/such/shader.spv")).unwrap_err();
        assert!(matches!(err, RendererError::InitializationFailure(_)));
        assert!(err.to_string().contains("no/such/shader.spv"));
    }

    #[test]
    fn truncated_artifact_is_rejected() {
        let path = scratch_file("truncated.spv", &[0x03, 0x02, 0x23, 0x07, 0x00]);
        assert!(matches!(
            read_spirv(&path),
            Err(RendererError::InitializationFailure(_))
        ));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn empty_artifact_is_rejected() {
        let path = scratch_file("empty.spv", &[]);
        assert!(read_spirv(&path).is_err());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn valid_artifact_loads_words() {
        let path = scratch_file("valid.spv", &spirv_bytes(&[SPIRV_MAGIC, 0x0001_0000]));
        let words = read_spirv(&path).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000]);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn config_validation_checks_both_stages() {
        let vert = scratch_file("stage.vert.spv", &spirv_bytes(&[SPIRV_MAGIC, 1]));
        let config = ShaderConfig {
            vertex: vert.clone(),
            fragment: PathBuf::from("missing.frag.spv"),
            entry_point: "main".into(),
        };
        let err = config.validate().err().unwrap();
        assert!(err.to_string().contains("missing.frag.spv"));

        let config = ShaderConfig {
            fragment: vert.clone(),
            ..config
        };
        let sources = config.validate().unwrap();
        assert_eq!(sources.entry_point.as_bytes(), b"main");
        assert_eq!(sources.vertex, sources.fragment);
        let _ = std::fs::remove_file(vert);
    }

    #[test]
    fn bad_entry_point_is_rejected() {
        let config = ShaderConfig {
            entry_point: "ma\0in".into(),
            ..ShaderConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RendererError::InitializationFailure(_))
        ));
    }
}
