//! Resource protocol tests against a running loader thread.
//!
//! Each test starts a pipeline on a headless context pair, requests
//! resources from the main thread and checks what the loader built.

mod common;

use std::sync::Arc;
use std::thread;

use common::{simple_material, TestPipeline};
use redlilium_pipeline::backend::{ContextKind, HandleKind, HeadlessDevice};
use redlilium_pipeline::resources::builtins::{MISSING_MESH, MISSING_TEXTURE, QUAD_MESH};
use redlilium_pipeline::resources::{builtins, sbm, ImageData, UniformBinding};
use redlilium_pipeline::{
    AssetSources, Handle, MaterialDef, Pipeline, PipelineConfig, PipelineError, ShaderKey,
    UniformDef, UniformType,
};

fn bindings(material: &Handle<redlilium_pipeline::resources::MaterialInstance>) -> Vec<UniformBinding> {
    material.read().uniforms.clone()
}

#[test]
fn test_concurrent_requests_share_one_build() {
    let t = TestPipeline::new();
    t.source
        .insert_image("shared.png", ImageData::solid_color([255, 0, 0, 255]));
    let loader = Arc::clone(t.pipeline.loader());

    let handles: Vec<_> = thread::scope(|s| {
        let workers: Vec<_> = (0..8)
            .map(|_| s.spawn(|| loader.load_texture("shared.png").unwrap()))
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });
    t.wait_idle();

    assert!(handles.iter().all(|h| Handle::ptr_eq(h, &handles[0])));
    assert_eq!(handles[0].refcount(), 8);
    // The placeholder plus exactly one upload.
    assert_eq!(t.device.live_objects(HandleKind::Texture), 2);
    assert!(handles[0].read().is_built());
}

#[test]
fn test_quad_draw_ready_after_one_drain() {
    let mut t = TestPipeline::new();
    let quad = t.pipeline.load_mesh(QUAD_MESH).unwrap();
    assert!(quad.is_pinned());
    assert!(quad.read().vertex_array().is_none());
    assert!(!quad.read().is_draw_ready());

    assert_eq!(t.pipeline.begin_frame(), 2);
    assert!(quad.read().is_draw_ready());
    assert_eq!(t.pipeline.begin_frame(), 0);
}

#[test]
fn test_missing_texture_returns_placeholder() {
    let t = TestPipeline::new();
    let texture = t.pipeline.load_texture("nonexistent.png").unwrap();
    t.wait_idle();

    let texture = texture.read();
    assert!(texture.substituted);
    assert!(!texture.owned);
    assert_eq!(texture.gpu, t.pipeline.loader().placeholder_texture());
    let placeholder = t.pipeline.load_texture(MISSING_TEXTURE).unwrap();
    assert_eq!(placeholder.read().size(), Some((2, 2)));
    assert!(t.pipeline.loader().errors().is_empty());
}

#[test]
fn test_missing_mesh_substitutes_cube() {
    let mut t = TestPipeline::new();
    t.source.insert_sbm("corrupt", b"SBM1 truncated".to_vec());
    let unknown = t.pipeline.load_mesh("nonexistent").unwrap();
    let corrupt = t.pipeline.load_mesh("corrupt").unwrap();
    t.settle();

    for mesh in [&unknown, &corrupt] {
        let mesh = mesh.read();
        assert!(mesh.substituted);
        assert!(mesh.is_draw_ready());
        assert_eq!(mesh.data, Some(builtins::missing_mesh()));
    }
    let cube = t.pipeline.load_mesh(MISSING_MESH).unwrap();
    assert!(!Handle::ptr_eq(&cube, &unknown));
}

#[test]
fn test_hostile_mesh_header_keeps_loader_running() {
    let mut t = TestPipeline::new();
    let mut offset = builtins::quad_mesh();
    offset.attributes[0].offset = u32::MAX - 2;
    t.source.insert_sbm("offset", sbm::encode(&offset));
    let mut huge = sbm::MAGIC.to_vec();
    for field in [0u32, u32::MAX, 12, 0] {
        huge.extend_from_slice(&field.to_le_bytes());
    }
    t.source.insert_sbm("huge", huge);
    t.source
        .insert_image("ok.png", ImageData::solid_color([1, 2, 3, 255]));

    let meshes = [
        t.pipeline.load_mesh("offset").unwrap(),
        t.pipeline.load_mesh("huge").unwrap(),
    ];
    let texture = t.pipeline.load_texture("ok.png").unwrap();
    t.settle();

    assert!(t.pipeline.is_running());
    assert!(texture.read().is_built());
    for mesh in &meshes {
        let mesh = mesh.read();
        assert!(mesh.substituted);
        assert!(mesh.is_draw_ready());
    }
}

#[test]
fn test_sbm_mesh_round_trips_through_loader() {
    let mut t = TestPipeline::new();
    let original = builtins::missing_mesh();
    t.source.insert_sbm("crate", sbm::encode(&original));

    let mesh = t.pipeline.load_mesh("crate").unwrap();
    assert_eq!(t.settle(), 1);

    let mesh = mesh.read();
    assert!(!mesh.substituted);
    let data = mesh.data.as_ref().unwrap();
    assert_eq!(data.vertex_count, original.vertex_count);
    assert_eq!(data.vertex_stride, original.vertex_stride);
    assert_eq!(data.attributes, original.attributes);
    assert_eq!(data.indices, original.indices);
    assert!(mesh.is_draw_ready());
}

#[test]
fn test_material_requests_share_instance() {
    let t = TestPipeline::new();
    t.pipeline
        .upsert_material_definition("simple", simple_material("crate.png"))
        .unwrap();

    let first = t.pipeline.load_material("simple").unwrap();
    let second = t.pipeline.load_material("simple").unwrap();
    assert!(Handle::ptr_eq(&first, &second));
    assert_eq!(first.refcount(), 2);

    t.wait_idle();
    assert!(first.read().is_ready());
}

#[test]
fn test_identical_shaders_share_program() {
    let t = TestPipeline::new();
    t.pipeline
        .upsert_material_definition("red", simple_material("red.png"))
        .unwrap();
    t.pipeline
        .upsert_material_definition("blue", simple_material("blue.png"))
        .unwrap();
    let red = t.pipeline.load_material("red").unwrap();
    let blue = t.pipeline.load_material("blue").unwrap();
    t.wait_idle();

    let red_program = red.read().program.clone().unwrap();
    let blue_program = blue.read().program.clone().unwrap();
    assert!(Handle::ptr_eq(&red_program, &blue_program));
    drop(blue_program);
    assert_eq!(red_program.refcount(), 3);
    drop(red_program);
    assert_eq!(red.read().program.as_ref().unwrap().refcount(), 2);
    assert_eq!(t.pipeline.loader().resource_counts().programs, 1);
    assert_eq!(t.device.live_objects(HandleKind::Program), 1);
}

#[test]
fn test_repeated_upsert_is_idempotent() {
    let t = TestPipeline::new();
    let def = simple_material("crate.png");
    t.pipeline
        .upsert_material_definition("simple", def.clone())
        .unwrap();
    let material = t.pipeline.load_material("simple").unwrap();
    t.wait_idle();
    let first = bindings(&material);

    t.pipeline.upsert_material_definition("simple", def).unwrap();
    t.wait_idle();

    assert_eq!(bindings(&material), first);
    assert_eq!(material.read().generation, 2);
    assert!(t.pipeline.loader().errors().is_empty());
}

#[test]
fn test_broken_rebuild_keeps_last_good_state() {
    let t = TestPipeline::new();
    t.pipeline
        .upsert_material_definition("simple", simple_material("crate.png"))
        .unwrap();
    let material = t.pipeline.load_material("simple").unwrap();
    t.wait_idle();
    let good = bindings(&material);

    t.source.insert_shader("broken.fs", "#error does not compile\nvoid main() {}\n");
    let broken = MaterialDef::new(ShaderKey::new("simple", "broken"))
        .with_uniform("projection", UniformDef::new(UniformType::Projection));
    t.pipeline
        .upsert_material_definition("simple", broken)
        .unwrap();
    t.wait_idle();

    assert_eq!(bindings(&material), good);
    assert_eq!(material.read().generation, 1);
    let errors = t.pipeline.loader().take_errors();
    assert!(matches!(errors.as_slice(), [PipelineError::Compile { name, .. }] if name == "broken.fs"));
}

#[test]
fn test_missing_shader_source_leaves_material_unbuilt() {
    let t = TestPipeline::new();
    let def = MaterialDef::new(ShaderKey::new("absent", "simple"));
    t.pipeline.upsert_material_definition("absent", def).unwrap();
    let material = t.pipeline.load_material("absent").unwrap();
    t.wait_idle();

    assert!(!material.read().is_ready());
    assert!(matches!(
        t.pipeline.loader().errors().as_slice(),
        [PipelineError::ResourceNotFound(path)] if path == "absent.vs"
    ));
}

#[test]
fn test_garbage_collection_releases_unreferenced() {
    let mut t = TestPipeline::new();
    t.source
        .insert_image("crate.png", ImageData::solid_color([10, 20, 30, 255]));
    t.source.insert_sbm("crate", sbm::encode(&builtins::quad_mesh()));
    t.pipeline
        .upsert_material_definition("simple", simple_material("crate.png"))
        .unwrap();
    let material = t.pipeline.load_material("simple").unwrap();
    let mesh = t.pipeline.load_mesh("crate").unwrap();
    let kept = t.pipeline.load_mesh(QUAD_MESH).unwrap();
    t.settle();
    assert_eq!(t.device.live_objects(HandleKind::Program), 1);
    assert_eq!(t.device.live_objects(HandleKind::Texture), 2);

    assert_eq!(t.pipeline.collect_garbage(), 0);
    drop(material);
    drop(mesh);
    drop(kept);
    // Material, program, two shaders, one texture and one mesh.
    assert_eq!(t.pipeline.collect_garbage(), 6);
    t.wait_idle();

    assert_eq!(t.device.live_objects(HandleKind::Program), 0);
    assert_eq!(t.device.live_objects(HandleKind::Shader), 0);
    assert_eq!(t.device.live_objects(HandleKind::Texture), 1);
    // The two pinned builtins stay finalized.
    assert_eq!(t.device.live_objects(HandleKind::VertexArray), 2);
    let counts = t.pipeline.loader().resource_counts();
    assert_eq!((counts.materials, counts.textures, counts.meshes), (0, 1, 2));
    assert!(t.pipeline.loader().errors().is_empty());
}

#[test]
fn test_startup_failure_aborts_pipeline() {
    common::init_logging();
    let device = HeadlessDevice::new();
    let result = Pipeline::new(
        PipelineConfig::default(),
        Box::new(device.context(ContextKind::Main)),
        Box::new(
            device
                .context(ContextKind::Loader)
                .failing_attach("no shared context"),
        ),
        AssetSources::memory(common::memory_source()),
    );

    match result {
        Err(PipelineError::LoaderStartup(inner)) => {
            assert!(matches!(*inner, PipelineError::Context(ref msg) if msg == "no shared context"))
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("pipeline started without a loader context"),
    }
}

#[test]
fn test_shutdown_joins_loader_and_refuses_requests() {
    let mut t = TestPipeline::new();
    let quad = t.pipeline.load_mesh(QUAD_MESH).unwrap();
    assert!(t.pipeline.is_running());

    t.pipeline.shutdown();
    assert!(!t.pipeline.is_running());
    assert!(matches!(
        t.pipeline.load_mesh("late"),
        Err(PipelineError::ShuttingDown)
    ));
    assert!(matches!(
        t.pipeline.upsert_material_definition("late", simple_material("x.png")),
        Err(PipelineError::ShuttingDown)
    ));
    assert!(quad.is_pinned());
    t.pipeline.shutdown();
}
