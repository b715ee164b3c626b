use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::{Mat4, Vec3};

use redlilium_pipeline::backend::{ContextKind, HeadlessDevice};
use redlilium_pipeline::loader::CrossThreadQueue;
use redlilium_pipeline::resources::builtins::QUAD_MESH;
use redlilium_pipeline::{
    AssetSources, MaterialDef, MemorySource, Pipeline, PipelineConfig, RenderPass, ShaderKey,
    UniformDef, UniformType,
};

// ---------------------------------------------------------------------------
// Cross-thread queue
// ---------------------------------------------------------------------------

fn bench_queue_push_pop(c: &mut Criterion) {
    c.bench_function("queue_push_pop_1024", |b| {
        let queue = CrossThreadQueue::new();
        b.iter(|| {
            for i in 0..1024u32 {
                let _ = queue.push(black_box(i));
            }
            while let Some(value) = queue.try_pop() {
                black_box(value);
            }
        });
    });
}

fn bench_queue_contended(c: &mut Criterion) {
    c.bench_function("queue_4_producers_4096", |b| {
        b.iter(|| {
            let queue = Arc::new(CrossThreadQueue::new());
            std::thread::scope(|s| {
                for _ in 0..4 {
                    let queue = Arc::clone(&queue);
                    s.spawn(move || {
                        for i in 0..1024u32 {
                            let _ = queue.push(i);
                        }
                    });
                }
            });
            let mut popped = 0;
            while queue.try_pop().is_some() {
                popped += 1;
            }
            black_box(popped);
        });
    });
}

// ---------------------------------------------------------------------------
// Draw batching
// ---------------------------------------------------------------------------

fn pipeline() -> (HeadlessDevice, Pipeline) {
    let device = HeadlessDevice::new();
    let source = Arc::new(MemorySource::new());
    source.insert_shader(
        "simple.vs",
        "uniform mat4 modelview[LILIUM_MAX_INSTANCES];\nuniform mat4 projection;\nvoid main() {}\n",
    );
    source.insert_shader("simple.fs", "void main() {}\n");
    let pipeline = Pipeline::new(
        PipelineConfig::default(),
        Box::new(device.context(ContextKind::Main)),
        Box::new(device.context(ContextKind::Loader)),
        AssetSources::memory(source),
    )
    .expect("pipeline startup");
    (device, pipeline)
}

fn bench_batched_frame(c: &mut Criterion) {
    let (device, mut pipeline) = pipeline();
    let target = pipeline
        .create_render_target(256, 256, false)
        .expect("render target");
    pipeline.set_render_target(Some(target)).expect("bind target");
    let def = MaterialDef::new(ShaderKey::new("simple", "simple"))
        .with_uniform("modelview", UniformDef::new(UniformType::ModelView))
        .with_uniform("projection", UniformDef::new(UniformType::Projection));
    pipeline
        .upsert_material_definition("simple", def)
        .expect("definition");
    let mesh = pipeline.load_mesh(QUAD_MESH).expect("quad");
    let material = pipeline.load_material("simple").expect("material");
    pipeline.loader().wait_idle(Duration::from_secs(5));
    pipeline.begin_frame();

    let mut group = c.benchmark_group("batched_frame");
    for instances in [64usize, 1024, 8192] {
        group.bench_with_input(
            BenchmarkId::from_parameter(instances),
            &instances,
            |b, &instances| {
                b.iter(|| {
                    for i in 0..instances {
                        let transform = Mat4::from_translation(Vec3::new(i as f32, 0.0, 0.0));
                        let _ = pipeline.add_draw_task(
                            &mesh,
                            &material,
                            transform,
                            RenderPass::Standard,
                        );
                    }
                    black_box(pipeline.render().ok());
                    device.take_draws();
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_queue_push_pop,
    bench_queue_contended,
    bench_batched_frame,
);
criterion_main!(benches);
