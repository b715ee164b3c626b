//! Instanced draw batching
//!
//! Draw requests are grouped per pass by (mesh, material). Flushing a pass
//! binds each group's program and vertex array once and issues instanced
//! draws of at most `max_instances` transforms each.

use std::collections::HashMap;
use std::ops::AddAssign;
use std::sync::Arc;

use glam::Mat4;

use crate::backend::{DrawCall, GraphicsContext, GraphicsHandle, UniformData};
use crate::error::{PipelineError, PipelineResult};
use crate::resources::{
    Handle, MaterialInstance, MeshResource, ResourceId, UniformBinding, UniformType, UniformValue,
};

/// Render pass a draw task belongs to.
///
/// `Standard`, `PostLighting` and `PostEffect` take user tasks, the rest are
/// driven by the pipeline itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RenderPass {
    Standard,
    Lighting,
    PostLighting,
    PreToneEffect,
    ToneMap,
    PostToneEffect,
    PostEffect,
}

impl RenderPass {
    pub const USER: [Self; 3] = [Self::Standard, Self::PostLighting, Self::PostEffect];

    pub fn is_user_pass(&self) -> bool {
        Self::USER.contains(self)
    }

    fn user_index(&self) -> Option<usize> {
        Self::USER.iter().position(|pass| pass == self)
    }
}

/// One instance of a draw task
#[derive(Debug, Clone)]
pub struct Instance {
    pub transform: Mat4,
    pub bones: Option<Arc<[Mat4]>>,
}

/// All instances of one (mesh, material) pair in a pass
#[derive(Debug)]
pub struct DrawTask {
    pub mesh: Handle<MeshResource>,
    pub material: Handle<MaterialInstance>,
    pub instances: Vec<Instance>,
}

/// Counters reported by a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushStats {
    pub draw_calls: usize,
    pub instances: usize,
    /// Tasks whose mesh or material was not ready
    pub skipped: usize,
}

impl AddAssign for FlushStats {
    fn add_assign(&mut self, rhs: Self) {
        self.draw_calls += rhs.draw_calls;
        self.instances += rhs.instances;
        self.skipped += rhs.skipped;
    }
}

#[derive(Debug, Default)]
struct PassQueue {
    tasks: Vec<DrawTask>,
    index: HashMap<(ResourceId, ResourceId), usize>,
}

impl PassQueue {
    fn take(&mut self) -> Vec<DrawTask> {
        self.index.clear();
        std::mem::take(&mut self.tasks)
    }
}

/// Per-pass draw task lists
#[derive(Debug)]
pub struct DrawBatcher {
    passes: [PassQueue; 3],
    max_instances: usize,
}

impl DrawBatcher {
    pub fn new(max_instances: u32) -> Self {
        Self {
            passes: Default::default(),
            max_instances: max_instances.max(1) as usize,
        }
    }

    pub fn max_instances(&self) -> usize {
        self.max_instances
    }

    fn queue_mut(&mut self, pass: RenderPass) -> PipelineResult<&mut PassQueue> {
        let index = pass.user_index().ok_or(PipelineError::ReservedPass(pass))?;
        Ok(&mut self.passes[index])
    }

    fn push(
        &mut self,
        mesh: &Handle<MeshResource>,
        material: &Handle<MaterialInstance>,
        instance: Instance,
        pass: RenderPass,
    ) -> PipelineResult<()> {
        let queue = self.queue_mut(pass)?;
        let key = (mesh.id(), material.id());
        match queue.index.get(&key) {
            Some(&slot) => queue.tasks[slot].instances.push(instance),
            None => {
                queue.index.insert(key, queue.tasks.len());
                queue.tasks.push(DrawTask {
                    mesh: mesh.clone(),
                    material: material.clone(),
                    instances: vec![instance],
                });
            }
        }
        Ok(())
    }

    pub fn add_draw_task(
        &mut self,
        mesh: &Handle<MeshResource>,
        material: &Handle<MaterialInstance>,
        transform: Mat4,
        pass: RenderPass,
    ) -> PipelineResult<()> {
        let instance = Instance {
            transform,
            bones: None,
        };
        self.push(mesh, material, instance, pass)
    }

    pub fn add_skinned_draw_task(
        &mut self,
        mesh: &Handle<MeshResource>,
        material: &Handle<MaterialInstance>,
        transform: Mat4,
        bones: Arc<[Mat4]>,
        pass: RenderPass,
    ) -> PipelineResult<()> {
        let instance = Instance {
            transform,
            bones: Some(bones),
        };
        self.push(mesh, material, instance, pass)
    }

    pub fn tasks(&self, pass: RenderPass) -> &[DrawTask] {
        match pass.user_index() {
            Some(index) => &self.passes[index].tasks,
            None => &[],
        }
    }

    pub fn instance_count(&self, pass: RenderPass) -> usize {
        self.tasks(pass).iter().map(|task| task.instances.len()).sum()
    }

    pub fn clear(&mut self, pass: RenderPass) {
        if let Some(index) = pass.user_index() {
            self.passes[index].take();
        }
    }

    pub fn clear_all(&mut self) {
        for queue in &mut self.passes {
            queue.take();
        }
    }

    /// Draw every ready task of `pass` and empty the pass.
    ///
    /// Tasks whose mesh awaits finalization or whose material is not built
    /// yet are dropped for this frame.
    pub fn flush(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        pass: RenderPass,
        projection: &Mat4,
        placeholder: Option<GraphicsHandle>,
    ) -> PipelineResult<FlushStats> {
        let tasks = self.queue_mut(pass)?.take();
        let mut stats = FlushStats::default();
        for task in &tasks {
            stats += self.draw_task(ctx, task, projection, placeholder)?;
        }
        if stats.draw_calls > 0 || stats.skipped > 0 {
            log::trace!("Flushed {pass:?}: {stats:?}");
        }
        Ok(stats)
    }

    fn draw_task(
        &self,
        ctx: &mut dyn GraphicsContext,
        task: &DrawTask,
        projection: &Mat4,
        placeholder: Option<GraphicsHandle>,
    ) -> PipelineResult<FlushStats> {
        let skipped = FlushStats {
            skipped: 1,
            ..Default::default()
        };
        let mesh = task.mesh.read();
        let (Some(vertex_array), Some(mode)) = (mesh.vertex_array(), mesh.draw_mode()) else {
            return Ok(skipped);
        };
        if !mesh.is_draw_ready() {
            return Ok(skipped);
        }
        let material = task.material.read();
        let Some(program) = material
            .program
            .as_ref()
            .and_then(|program| program.read().handle)
        else {
            return Ok(skipped);
        };

        ctx.use_program(program)?;
        ctx.bind_vertex_array(vertex_array)?;
        bind_static_uniforms(ctx, &material.uniforms, projection, placeholder)?;

        let mut stats = FlushStats::default();
        let mut transforms = Vec::with_capacity(self.max_instances);
        let mut bones = Vec::new();
        for chunk in task.instances.chunks(self.max_instances) {
            transforms.clear();
            transforms.extend(chunk.iter().map(|instance| instance.transform));
            bones.clear();
            bones.extend(
                chunk
                    .iter()
                    .filter_map(|instance| instance.bones.as_deref())
                    .flatten()
                    .copied(),
            );
            for binding in material.uniforms.iter().filter(|b| b.ty.is_per_instance()) {
                let data = match binding.ty {
                    UniformType::BoneMatrices => UniformData::Matrix4Array(&bones),
                    _ => UniformData::Matrix4Array(&transforms),
                };
                ctx.set_uniform(binding.slot, data)?;
            }
            ctx.draw(&DrawCall {
                mode,
                instances: chunk.len() as u32,
            })?;
            stats.draw_calls += 1;
            stats.instances += chunk.len();
        }
        Ok(stats)
    }
}

/// Write the uniforms that stay constant across a task's chunks
fn bind_static_uniforms(
    ctx: &mut dyn GraphicsContext,
    uniforms: &[UniformBinding],
    projection: &Mat4,
    placeholder: Option<GraphicsHandle>,
) -> PipelineResult<()> {
    let mut unit = 1;
    for binding in uniforms {
        if binding.ty.is_unimplemented() {
            return Err(PipelineError::UnimplementedUniform(binding.ty));
        }
        match binding.ty {
            UniformType::Texture => {
                let texture = match &binding.value {
                    Some(UniformValue::Texture(texture)) => texture.read().gpu.or(placeholder),
                    _ => placeholder,
                };
                let texture = texture.ok_or_else(|| {
                    PipelineError::ResourceNotFound(format!("texture for uniform {}", binding.name))
                })?;
                ctx.bind_texture(unit, texture)?;
                ctx.set_uniform(binding.slot, UniformData::Sampler(unit as i32))?;
                unit += 1;
            }
            UniformType::Projection => {
                ctx.set_uniform(binding.slot, UniformData::Matrix4(projection))?;
            }
            _ => {}
        }
    }
    Ok(())
}
