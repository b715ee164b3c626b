//! RedLilium Pipeline - asynchronous GPU resource construction and instanced drawing
//!
//! Resources are requested from the main thread and built on a dedicated
//! loader thread that owns a second graphics context sharing the main
//! context's object namespace:
//!
//! - Meshes, textures and materials are cached by name and handed out as
//!   reference-counted handles that are filled in place once built
//! - Missing textures and meshes degrade to builtin placeholders
//! - Vertex array objects are finalized on the main thread
//! - Draw requests are batched per (mesh, material) into instanced draws
//! - Multisampled render targets can be resized and re-sampled in place
//!
//! The [`backend::HeadlessContext`] records every command and backs the
//! tests; the `gl` feature provides an OpenGL context through `glow`.

pub mod backend;
pub mod error;
pub mod loader;
pub mod pipeline;
pub mod resources;

use std::path::PathBuf;
use std::time::Duration;

pub use error::{LoadError, PipelineError, PipelineResult};
pub use loader::{AssetSources, LoaderContext, MemorySource};
pub use pipeline::{FlushStats, PanelId, Pipeline, RenderPass, RenderTargetId};
pub use resources::{Handle, MaterialDef, ShaderKey, UniformDef, UniformLiteral, UniformType};

/// Configuration for the pipeline and its loader thread
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Largest instance count of a single draw call
    pub max_instances: u32,
    /// Directory the asset directories are relative to
    pub asset_root: PathBuf,
    pub shader_dir: PathBuf,
    pub texture_dir: PathBuf,
    pub mesh_dir: PathBuf,
    /// Size of the default framebuffer
    pub viewport: (u32, u32),
    /// Clear color of the geometry buffer
    pub clear_color: [f32; 4],
    /// Initial multisample level, the highest supported if unset
    pub fsaa_level: Option<u32>,
    pub loader_thread_name: String,
    /// How long to wait for the loader thread to upload the builtins
    pub startup_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_instances: 64,
            asset_root: PathBuf::from("data"),
            shader_dir: PathBuf::from("shaders"),
            texture_dir: PathBuf::from("textures"),
            mesh_dir: PathBuf::from("meshes"),
            viewport: (800, 600),
            clear_color: [0.8, 0.8, 0.9, 1.0],
            fsaa_level: None,
            loader_thread_name: "lilium-loader".to_string(),
            startup_timeout: Duration::from_secs(10),
        }
    }
}

impl PipelineConfig {
    pub fn with_max_instances(mut self, max_instances: u32) -> Self {
        self.max_instances = max_instances;
        self
    }

    pub fn with_asset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.asset_root = root.into();
        self
    }

    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = (width, height);
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_fsaa_level(mut self, level: u32) -> Self {
        self.fsaa_level = Some(level);
        self
    }

    pub fn with_loader_thread_name(mut self, name: &str) -> Self {
        self.loader_thread_name = name.to_string();
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_instances, 64);
        assert_eq!(config.viewport, (800, 600));
        assert_eq!(config.clear_color, [0.8, 0.8, 0.9, 1.0]);
        assert!(config.fsaa_level.is_none());
    }

    #[test]
    fn test_config_builders() {
        let config = PipelineConfig::default()
            .with_max_instances(8)
            .with_viewport(320, 240)
            .with_fsaa_level(4)
            .with_asset_root("assets");
        assert_eq!(config.max_instances, 8);
        assert_eq!(config.viewport, (320, 240));
        assert_eq!(config.fsaa_level, Some(4));
        assert_eq!(config.asset_root.join(&config.mesh_dir), PathBuf::from("assets/meshes"));
    }
}
