//! Shared fixtures for pipeline integration tests.
//!
//! Every test drives a real [`Pipeline`] with a loader thread against a
//! pair of headless contexts and an in-memory asset source.

use std::sync::Arc;
use std::time::Duration;

use redlilium_pipeline::backend::{ContextKind, HeadlessDevice};
use redlilium_pipeline::{
    AssetSources, MaterialDef, MemorySource, Pipeline, PipelineConfig, ShaderKey, UniformDef,
    UniformType,
};

pub const SIMPLE_VS: &str = "\
uniform mat4 modelview[LILIUM_MAX_INSTANCES];
uniform mat4 projection;
void main() {}
";

pub const SIMPLE_FS: &str = "\
uniform sampler2D diffuse;
void main() {}
";

/// Shaders of the builtin missing material
pub const GUIVIEW_VS: &str = "\
uniform mat4 modelview[LILIUM_MAX_INSTANCES];
uniform mat4 projection;
void main() {}
";

pub const GUIVIEW_FS: &str = "\
uniform sampler2D guitex;
void main() {}
";

const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Material drawing `simple` shaders with a diffuse texture
pub fn simple_material(texture: &str) -> MaterialDef {
    MaterialDef::new(ShaderKey::new("simple", "simple"))
        .with_uniform("modelview", UniformDef::new(UniformType::ModelView))
        .with_uniform("projection", UniformDef::new(UniformType::Projection))
        .with_uniform("diffuse", UniformDef::texture(texture))
}

/// Memory source with the shaders every test needs
pub fn memory_source() -> Arc<MemorySource> {
    let source = Arc::new(MemorySource::new());
    source.insert_shader("simple.vs", SIMPLE_VS);
    source.insert_shader("simple.fs", SIMPLE_FS);
    source.insert_shader("guiview.vs", GUIVIEW_VS);
    source.insert_shader("guiview.fs", GUIVIEW_FS);
    source
}

pub struct TestPipeline {
    pub device: HeadlessDevice,
    pub source: Arc<MemorySource>,
    pub pipeline: Pipeline,
}

impl TestPipeline {
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        init_logging();
        let device = HeadlessDevice::new();
        let source = memory_source();
        let pipeline = Pipeline::new(
            config,
            Box::new(device.context(ContextKind::Main)),
            Box::new(device.context(ContextKind::Loader)),
            AssetSources::memory(source.clone()),
        )
        .expect("pipeline startup");
        Self {
            device,
            source,
            pipeline,
        }
    }

    /// Wait for the loader to go idle
    pub fn wait_idle(&self) {
        assert!(
            self.pipeline.loader().wait_idle(IDLE_TIMEOUT),
            "loader did not go idle, {} jobs pending",
            self.pipeline.loader().pending_jobs()
        );
    }

    /// Wait for the loader, then finalize whatever it produced
    pub fn settle(&mut self) -> usize {
        self.wait_idle();
        self.pipeline.begin_frame()
    }

    /// Create a render target and make it current
    #[allow(dead_code)]
    pub fn bind_target(&mut self, width: u32, height: u32) -> redlilium_pipeline::RenderTargetId {
        let id = self
            .pipeline
            .create_render_target(width, height, false)
            .expect("render target");
        self.pipeline.set_render_target(Some(id)).expect("bind target");
        id
    }
}
