//! Program linking and uniform resolution for materials

use crate::backend::{GraphicsContext, ShaderStage};
use crate::error::{PipelineError, PipelineResult};
use crate::loader::LoaderContext;
use crate::resources::builtins::MISSING_TEXTURE;
use crate::resources::{
    Handle, JobTarget, MaterialInstance, ProgramObject, ShaderKey, ShaderObject, ShaderSourceKey,
    UniformBinding, UniformDef, UniformLiteral, UniformType, UniformValue,
};

/// Builds materials on the loader context.
///
/// Programs are shared through the shader-key cache and shader stages
/// through the (stage, path) cache, so materials naming the same shaders
/// link once.
pub struct MaterialBuilder<'a> {
    ctx: &'a mut dyn GraphicsContext,
    shared: &'a LoaderContext,
}

impl<'a> MaterialBuilder<'a> {
    pub fn new(ctx: &'a mut dyn GraphicsContext, shared: &'a LoaderContext) -> Self {
        Self { ctx, shared }
    }

    /// Build `target` from its current definition, overwriting it in place.
    ///
    /// On failure the material keeps whatever it held before.
    pub fn build(&mut self, target: &JobTarget<MaterialInstance>) -> PipelineResult<()> {
        let name = target.name();
        let def = self
            .shared
            .material_definition(name)
            .ok_or_else(|| PipelineError::ResourceNotFound(format!("material definition {name}")))?;

        let program = self.load_program(&def.shaders)?;
        let program_handle = program
            .read()
            .handle
            .ok_or_else(|| PipelineError::ResourceNotFound(format!("program {}", def.shaders)))?;

        let mut uniforms = Vec::with_capacity(def.uniforms.len());
        for (uniform, uniform_def) in &def.uniforms {
            let slot = self.ctx.uniform_slot(program_handle, uniform)?;
            if slot == -1 {
                log::debug!("Material {name}: uniform {uniform} not used by {}", def.shaders);
                continue;
            }
            uniforms.push(UniformBinding {
                name: uniform.clone(),
                slot,
                ty: uniform_def.ty,
                value: self.resolve_binding(uniform_def)?,
            });
        }

        // Publish the program before the main thread can see it.
        self.ctx.finish()?;

        let mut instance = target.cell().write();
        instance.program = Some(program);
        instance.uniforms = uniforms;
        instance.generation += 1;
        log::debug!(
            "Built material {name} (generation {}, {} uniforms)",
            instance.generation,
            instance.uniforms.len()
        );
        Ok(())
    }

    /// Linked program for a shader key, reusing the cached one
    pub fn load_program(&mut self, key: &ShaderKey) -> PipelineResult<Handle<ProgramObject>> {
        if key.vert.is_empty() {
            return Err(PipelineError::ResourceNotFound(format!(
                "vertex shader name for program {key}"
            )));
        }
        if key.frag.is_empty() {
            return Err(PipelineError::ResourceNotFound(format!(
                "fragment shader name for program {key}"
            )));
        }

        let program = self
            .shared
            .programs
            .get_or_insert_with(key.clone(), ProgramObject::default, |_| {});
        if program.read().is_linked() {
            return Ok(program);
        }

        let mut shaders = Vec::new();
        for (stage, path) in key.sources() {
            shaders.push(self.load_shader(stage, &path)?);
        }
        let handles: Vec<_> = shaders
            .iter()
            .filter_map(|shader| shader.read().handle)
            .collect();
        let linked = self.ctx.link_program(&handles)?;
        log::debug!("Linked program {key}");

        let mut object = program.cell().write();
        object.handle = Some(linked);
        object.shaders = shaders;
        drop(object);
        Ok(program)
    }

    /// Compiled shader stage for a source path, reusing the cached one
    pub fn load_shader(
        &mut self,
        stage: ShaderStage,
        path: &str,
    ) -> PipelineResult<Handle<ShaderObject>> {
        let key = ShaderSourceKey {
            stage,
            path: path.to_string(),
        };
        let shader = self
            .shared
            .shaders
            .get_or_insert_with(key, ShaderObject::default, |_| {});
        if shader.read().handle.is_some() {
            return Ok(shader);
        }

        let source = self.shared.shader_source(path)?;
        let compiled = self
            .ctx
            .compile_shader(path, stage, &[self.shared.shader_header(), source.as_str()])?;

        let mut object = shader.cell().write();
        object.handle = Some(compiled);
        object.stage = Some(stage);
        drop(object);
        Ok(shader)
    }

    /// Build-time value of a uniform; `None` when supplied per draw
    pub fn resolve_binding(&mut self, def: &UniformDef) -> PipelineResult<Option<UniformValue>> {
        match def.ty {
            UniformType::Texture => {
                let path = match &def.value {
                    Some(UniformLiteral::TexturePath(path)) => path.as_str(),
                    _ => MISSING_TEXTURE,
                };
                let texture = self.shared.load_texture(path)?;
                Ok(Some(UniformValue::Texture(texture)))
            }
            _ => Ok(def.value.clone().and_then(UniformLiteral::into_value)),
        }
    }
}

/// Location of `name` in a linked program, -1 if the program lacks it
pub fn query_uniform_slot(
    ctx: &mut dyn GraphicsContext,
    program: &ProgramObject,
    name: &str,
) -> PipelineResult<i32> {
    match program.handle {
        Some(handle) => ctx.uniform_slot(handle, name),
        None => Err(PipelineError::ResourceNotFound(format!(
            "linked program for uniform {name}"
        ))),
    }
}
