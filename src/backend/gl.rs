//! OpenGL backend on top of `glow`
//!
//! The windowing layer owns the native contexts and hands each
//! [`GlContext`] a [`ContextBinding`] to make it current on the thread that
//! drives it. Both contexts of a pair must be created with object sharing
//! enabled; [`GlNamespace`] mirrors the shared object namespace so handles
//! keep their owner and native object.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use glow::HasContext;
use parking_lot::Mutex;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::{api_error, PipelineError, PipelineResult};

/// Current-context control supplied by the windowing layer
pub trait ContextBinding: Send {
    fn make_current(&mut self) -> Result<(), String>;
    fn release_current(&mut self);
    fn swap_buffers(&mut self) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy)]
enum NativeObject {
    Shader(glow::Shader),
    Program(glow::Program),
    Texture { texture: glow::Texture, target: u32 },
    Buffer(glow::Buffer),
    VertexArray(glow::VertexArray),
    Framebuffer(glow::Framebuffer),
}

#[derive(Debug, Default)]
struct GlObjects {
    next_id: u64,
    objects: HashMap<u64, (ContextKind, NativeObject)>,
}

/// Object table shared by a context pair
#[derive(Debug, Clone, Default)]
pub struct GlNamespace {
    objects: Arc<Mutex<GlObjects>>,
}

impl GlNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a loaded `glow` context; `gl` must have been created from the
    /// native context `binding` controls.
    pub fn context(
        &self,
        kind: ContextKind,
        gl: glow::Context,
        binding: Box<dyn ContextBinding>,
    ) -> GlContext {
        GlContext {
            kind,
            gl,
            binding,
            namespace: self.clone(),
            attached: None,
        }
    }

    fn insert(&self, owner: ContextKind, kind: HandleKind, native: NativeObject) -> GraphicsHandle {
        let mut objects = self.objects.lock();
        objects.next_id += 1;
        let id = objects.next_id;
        objects.objects.insert(id, (owner, native));
        GraphicsHandle::new(id, kind, owner)
    }

    fn get(&self, handle: GraphicsHandle) -> Option<NativeObject> {
        self.objects.lock().objects.get(&handle.id).map(|(_, native)| *native)
    }
}

/// One OpenGL context of a shared pair
pub struct GlContext {
    kind: ContextKind,
    gl: glow::Context,
    binding: Box<dyn ContextBinding>,
    namespace: GlNamespace,
    attached: Option<ThreadId>,
}

// SAFETY: `glow::Context` is `!Send` only because it stores the raw user
// pointer of the debug callback, which this backend never installs. Every
// GL call goes through `ensure_current`, so the context is only driven from
// the thread it was attached on; moving it while detached is sound.
unsafe impl Send for GlContext {}

fn shader_type(stage: ShaderStage) -> u32 {
    match stage {
        ShaderStage::Vertex => glow::VERTEX_SHADER,
        ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        ShaderStage::Geometry => glow::GEOMETRY_SHADER,
    }
}

fn attrib_type(ty: AttribType) -> u32 {
    match ty {
        AttribType::Byte => glow::BYTE,
        AttribType::UByte => glow::UNSIGNED_BYTE,
        AttribType::Short => glow::SHORT,
        AttribType::UShort => glow::UNSIGNED_SHORT,
        AttribType::Int => glow::INT,
        AttribType::UInt => glow::UNSIGNED_INT,
        AttribType::Float => glow::FLOAT,
        AttribType::Half => glow::HALF_FLOAT,
        AttribType::Double => glow::DOUBLE,
    }
}

/// (internal format, format) of a sampled texture
fn pixel_format(format: PixelFormat) -> (i32, u32) {
    match format {
        PixelFormat::R8 => (glow::R8 as i32, glow::RED),
        PixelFormat::Rg8 => (glow::RG8 as i32, glow::RG),
        PixelFormat::Rgb8 => (glow::RGB8 as i32, glow::RGB),
        PixelFormat::Rgba8 => (glow::RGBA8 as i32, glow::RGBA),
    }
}

/// (internal format, format, component type) of attachment storage
fn attachment_format(format: AttachmentFormat) -> (i32, u32, u32) {
    match format {
        AttachmentFormat::Depth24Stencil8 => (
            glow::DEPTH24_STENCIL8 as i32,
            glow::DEPTH_STENCIL,
            glow::UNSIGNED_INT_24_8,
        ),
        AttachmentFormat::Rgba8 => (glow::RGBA8 as i32, glow::RGBA, glow::UNSIGNED_BYTE),
        AttachmentFormat::Rg16Float => (glow::RG16F as i32, glow::RG, glow::HALF_FLOAT),
        AttachmentFormat::Rgba16Float => (glow::RGBA16F as i32, glow::RGBA, glow::HALF_FLOAT),
    }
}

fn framebuffer_status(code: u32) -> FramebufferStatus {
    match code {
        glow::FRAMEBUFFER_COMPLETE => FramebufferStatus::Complete,
        glow::FRAMEBUFFER_INCOMPLETE_ATTACHMENT => FramebufferStatus::IncompleteAttachment,
        glow::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT => FramebufferStatus::MissingAttachment,
        glow::FRAMEBUFFER_INCOMPLETE_DRAW_BUFFER => FramebufferStatus::IncompleteDrawBuffer,
        glow::FRAMEBUFFER_INCOMPLETE_READ_BUFFER => FramebufferStatus::IncompleteReadBuffer,
        glow::FRAMEBUFFER_INCOMPLETE_MULTISAMPLE => FramebufferStatus::IncompleteMultisample,
        _ => FramebufferStatus::Unsupported,
    }
}

impl GlContext {
    #[track_caller]
    fn ensure_current(&self) -> PipelineResult<()> {
        match self.attached {
            Some(id) if id == thread::current().id() => Ok(()),
            _ => Err(PipelineError::api(api_error::INVALID_OPERATION)),
        }
    }

    #[track_caller]
    fn check_error(&self) -> PipelineResult<()> {
        // SAFETY: only called with this context current
        let code = unsafe { self.gl.get_error() };
        if code == glow::NO_ERROR {
            Ok(())
        } else {
            Err(PipelineError::api(code))
        }
    }

    #[track_caller]
    fn native(&self, handle: GraphicsHandle) -> PipelineResult<NativeObject> {
        if handle.kind.is_container() && handle.context != self.kind {
            return Err(PipelineError::InvalidHandle(handle));
        }
        self.namespace
            .get(handle)
            .ok_or(PipelineError::InvalidHandle(handle))
    }

    fn program(&self, handle: GraphicsHandle) -> PipelineResult<glow::Program> {
        match self.native(handle)? {
            NativeObject::Program(program) => Ok(program),
            _ => Err(PipelineError::InvalidHandle(handle)),
        }
    }

    fn texture(&self, handle: GraphicsHandle) -> PipelineResult<(glow::Texture, u32)> {
        match self.native(handle)? {
            NativeObject::Texture { texture, target } => Ok((texture, target)),
            _ => Err(PipelineError::InvalidHandle(handle)),
        }
    }

    fn buffer(&self, handle: GraphicsHandle) -> PipelineResult<glow::Buffer> {
        match self.native(handle)? {
            NativeObject::Buffer(buffer) => Ok(buffer),
            _ => Err(PipelineError::InvalidHandle(handle)),
        }
    }

    fn framebuffer(&self, handle: GraphicsHandle) -> PipelineResult<glow::Framebuffer> {
        match self.native(handle)? {
            NativeObject::Framebuffer(framebuffer) => Ok(framebuffer),
            _ => Err(PipelineError::InvalidHandle(handle)),
        }
    }

    fn insert(&self, kind: HandleKind, native: NativeObject) -> GraphicsHandle {
        let handle = self.namespace.insert(self.kind, kind, native);
        log::trace!("GlContext({:?}): created {kind:?} {}", self.kind, handle.id);
        handle
    }
}

impl GraphicsContext for GlContext {
    fn kind(&self) -> ContextKind {
        self.kind
    }

    fn attach(&mut self) -> PipelineResult<()> {
        self.binding.make_current().map_err(PipelineError::Context)?;
        self.attached = Some(thread::current().id());
        log::debug!("Attached {:?} GL context", self.kind);
        Ok(())
    }

    fn detach(&mut self) {
        if self.attached.take().is_some() {
            self.binding.release_current();
            log::debug!("Detached {:?} GL context", self.kind);
        }
    }

    fn swap_buffers(&mut self) -> PipelineResult<()> {
        self.ensure_current()?;
        self.binding.swap_buffers().map_err(PipelineError::Context)
    }

    fn finish(&mut self) -> PipelineResult<()> {
        self.ensure_current()?;
        // SAFETY: the context is current on this thread
        unsafe { self.gl.finish() };
        self.check_error()
    }

    fn max_samples(&self) -> u32 {
        if self.ensure_current().is_err() {
            log::warn!("max_samples queried on a detached {:?} GL context", self.kind);
            return 0;
        }
        // SAFETY: the context is current and parameter queries have no side effects
        let (color, depth) = unsafe {
            (
                self.gl.get_parameter_i32(glow::MAX_COLOR_TEXTURE_SAMPLES),
                self.gl.get_parameter_i32(glow::MAX_DEPTH_TEXTURE_SAMPLES),
            )
        };
        color.min(depth).max(0) as u32
    }

    fn compile_shader(
        &mut self,
        name: &str,
        stage: ShaderStage,
        sources: &[&str],
    ) -> PipelineResult<GraphicsHandle> {
        self.ensure_current()?;
        let source = sources.concat();
        unsafe {
            let shader = self
                .gl
                .create_shader(shader_type(stage))
                .map_err(PipelineError::Context)?;
            self.gl.shader_source(shader, &source);
            self.gl.compile_shader(shader);
            if !self.gl.get_shader_compile_status(shader) {
                let log = self.gl.get_shader_info_log(shader);
                self.gl.delete_shader(shader);
                return Err(PipelineError::Compile {
                    name: name.to_string(),
                    stage,
                    log,
                });
            }
            Ok(self.insert(HandleKind::Shader, NativeObject::Shader(shader)))
        }
    }

    fn link_program(&mut self, shaders: &[GraphicsHandle]) -> PipelineResult<GraphicsHandle> {
        self.ensure_current()?;
        let mut natives = Vec::with_capacity(shaders.len());
        for handle in shaders {
            match self.native(*handle)? {
                NativeObject::Shader(shader) => natives.push(shader),
                _ => return Err(PipelineError::InvalidHandle(*handle)),
            }
        }
        unsafe {
            let program = self.gl.create_program().map_err(PipelineError::Context)?;
            for shader in &natives {
                self.gl.attach_shader(program, *shader);
            }
            self.gl.link_program(program);
            for shader in &natives {
                self.gl.detach_shader(program, *shader);
            }
            if !self.gl.get_program_link_status(program) {
                let log = self.gl.get_program_info_log(program);
                self.gl.delete_program(program);
                return Err(PipelineError::Link { log });
            }
            Ok(self.insert(HandleKind::Program, NativeObject::Program(program)))
        }
    }

    fn uniform_slot(&mut self, program: GraphicsHandle, name: &str) -> PipelineResult<i32> {
        self.ensure_current()?;
        let program = self.program(program)?;
        let location = unsafe { self.gl.get_uniform_location(program, name) };
        Ok(location.map_or(-1, |location| location.0 as i32))
    }

    fn upload_texture(&mut self, upload: &TextureUpload<'_>) -> PipelineResult<GraphicsHandle> {
        self.ensure_current()?;
        let (internal, format) = pixel_format(upload.format);
        let (min_filter, mag_filter) = match (upload.filter, upload.build_mips) {
            (FilterMode::Nearest, false) => (glow::NEAREST, glow::NEAREST),
            (FilterMode::Nearest, true) => (glow::NEAREST_MIPMAP_NEAREST, glow::NEAREST),
            (FilterMode::Linear, false) => (glow::LINEAR, glow::LINEAR),
            (FilterMode::Linear, true) => (glow::LINEAR_MIPMAP_LINEAR, glow::LINEAR),
        };
        unsafe {
            let texture = self.gl.create_texture().map_err(PipelineError::Context)?;
            self.gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            self.gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                internal,
                upload.width as i32,
                upload.height as i32,
                0,
                format,
                glow::UNSIGNED_BYTE,
                Some(upload.pixels),
            );
            self.gl
                .tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, min_filter as i32);
            self.gl
                .tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, mag_filter as i32);
            if upload.build_mips {
                self.gl.generate_mipmap(glow::TEXTURE_2D);
            }
            self.gl.bind_texture(glow::TEXTURE_2D, None);
            if let Err(err) = self.check_error() {
                self.gl.delete_texture(texture);
                return Err(err);
            }
            log::trace!("GlContext: uploaded texture {} ({}x{})", upload.label, upload.width, upload.height);
            Ok(self.insert(
                HandleKind::Texture,
                NativeObject::Texture {
                    texture,
                    target: glow::TEXTURE_2D,
                },
            ))
        }
    }

    fn create_attachment(&mut self, desc: &AttachmentDescriptor) -> PipelineResult<GraphicsHandle> {
        self.ensure_current()?;
        let (internal, format, ty) = attachment_format(desc.format);
        let (width, height) = (desc.width as i32, desc.height as i32);
        let target = if desc.samples > 1 {
            glow::TEXTURE_2D_MULTISAMPLE
        } else {
            glow::TEXTURE_2D
        };
        unsafe {
            let texture = self.gl.create_texture().map_err(PipelineError::Context)?;
            self.gl.bind_texture(target, Some(texture));
            if desc.samples > 1 {
                self.gl
                    .tex_image_2d_multisample(target, desc.samples as i32, internal, width, height, true);
            } else {
                let levels = desc.mip_levels.max(1) as i32;
                for level in 0..levels {
                    self.gl.tex_image_2d(
                        target,
                        level,
                        internal,
                        (width >> level).max(1),
                        (height >> level).max(1),
                        0,
                        format,
                        ty,
                        None,
                    );
                }
                self.gl
                    .tex_parameter_i32(target, glow::TEXTURE_MAX_LEVEL, levels - 1);
                let min_filter = if levels > 1 {
                    glow::LINEAR_MIPMAP_LINEAR
                } else {
                    glow::LINEAR
                };
                self.gl
                    .tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, min_filter as i32);
                self.gl
                    .tex_parameter_i32(target, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            }
            self.gl.bind_texture(target, None);
            if let Err(err) = self.check_error() {
                self.gl.delete_texture(texture);
                return Err(err);
            }
            Ok(self.insert(HandleKind::Texture, NativeObject::Texture { texture, target }))
        }
    }

    fn generate_mipmaps(&mut self, texture: GraphicsHandle) -> PipelineResult<()> {
        self.ensure_current()?;
        let (texture, target) = self.texture(texture)?;
        unsafe {
            self.gl.bind_texture(target, Some(texture));
            self.gl.generate_mipmap(target);
            self.gl.bind_texture(target, None);
        }
        self.check_error()
    }

    fn create_buffer(&mut self, kind: BufferKind, data: &[u8]) -> PipelineResult<GraphicsHandle> {
        self.ensure_current()?;
        let target = match kind {
            BufferKind::Vertex => glow::ARRAY_BUFFER,
            BufferKind::Index => glow::ELEMENT_ARRAY_BUFFER,
        };
        unsafe {
            let buffer = self.gl.create_buffer().map_err(PipelineError::Context)?;
            self.gl.bind_buffer(target, Some(buffer));
            self.gl.buffer_data_u8_slice(target, data, glow::STATIC_DRAW);
            self.gl.bind_buffer(target, None);
            self.check_error()?;
            Ok(self.insert(HandleKind::Buffer, NativeObject::Buffer(buffer)))
        }
    }

    fn create_vertex_array(
        &mut self,
        desc: &VertexArrayDescriptor<'_>,
    ) -> PipelineResult<GraphicsHandle> {
        self.ensure_current()?;
        let vertex_buffer = self.buffer(desc.vertex_buffer)?;
        let index_buffer = desc.index_buffer.map(|h| self.buffer(h)).transpose()?;
        unsafe {
            let vertex_array = self
                .gl
                .create_vertex_array()
                .map_err(PipelineError::Context)?;
            self.gl.bind_vertex_array(Some(vertex_array));
            self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(vertex_buffer));
            for attribute in desc.attributes {
                let index = attribute.location.index();
                let size = attribute.components as i32;
                let ty = attrib_type(attribute.ty);
                self.gl.enable_vertex_attrib_array(index);
                match attribute.special {
                    AttribSpecial::Integer => self.gl.vertex_attrib_pointer_i32(
                        index,
                        size,
                        ty,
                        desc.stride as i32,
                        attribute.offset as i32,
                    ),
                    special => self.gl.vertex_attrib_pointer_f32(
                        index,
                        size,
                        ty,
                        special == AttribSpecial::Normalize,
                        desc.stride as i32,
                        attribute.offset as i32,
                    ),
                }
            }
            // Constant attributes are context state, not vertex array state.
            for (location, value) in desc.defaults {
                let [x, y, z, w] = match *value {
                    DefaultAttribute::Float(v) => v,
                    DefaultAttribute::Int(v) => v.map(|c| c as f32),
                };
                self.gl.disable_vertex_attrib_array(location.index());
                self.gl.vertex_attrib_4_f32(location.index(), x, y, z, w);
            }
            if let Some(index_buffer) = index_buffer {
                self.gl
                    .bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(index_buffer));
            }
            self.gl.bind_vertex_array(None);
            self.gl.bind_buffer(glow::ARRAY_BUFFER, None);
            if let Err(err) = self.check_error() {
                self.gl.delete_vertex_array(vertex_array);
                return Err(err);
            }
            Ok(self.insert(
                HandleKind::VertexArray,
                NativeObject::VertexArray(vertex_array),
            ))
        }
    }

    fn create_framebuffer(
        &mut self,
        attachments: &[(AttachmentPoint, GraphicsHandle)],
    ) -> PipelineResult<GraphicsHandle> {
        self.ensure_current()?;
        let mut textures = Vec::with_capacity(attachments.len());
        for (point, handle) in attachments {
            textures.push((*point, self.texture(*handle)?));
        }
        unsafe {
            let framebuffer = self
                .gl
                .create_framebuffer()
                .map_err(PipelineError::Context)?;
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer));
            let mut draw_buffers = Vec::new();
            for (point, (texture, target)) in textures {
                let attachment = match point {
                    AttachmentPoint::Color(index) => {
                        draw_buffers.push(glow::COLOR_ATTACHMENT0 + index);
                        glow::COLOR_ATTACHMENT0 + index
                    }
                    AttachmentPoint::DepthStencil => glow::DEPTH_STENCIL_ATTACHMENT,
                };
                self.gl
                    .framebuffer_texture_2d(glow::FRAMEBUFFER, attachment, target, Some(texture), 0);
            }
            self.gl.draw_buffers(&draw_buffers);
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            if let Err(err) = self.check_error() {
                self.gl.delete_framebuffer(framebuffer);
                return Err(err);
            }
            Ok(self.insert(
                HandleKind::Framebuffer,
                NativeObject::Framebuffer(framebuffer),
            ))
        }
    }

    fn framebuffer_status(
        &mut self,
        framebuffer: GraphicsHandle,
    ) -> PipelineResult<FramebufferStatus> {
        self.ensure_current()?;
        let framebuffer = self.framebuffer(framebuffer)?;
        let code = unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer));
            let code = self.gl.check_framebuffer_status(glow::FRAMEBUFFER);
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            code
        };
        Ok(framebuffer_status(code))
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<GraphicsHandle>) -> PipelineResult<()> {
        self.ensure_current()?;
        let framebuffer = framebuffer.map(|h| self.framebuffer(h)).transpose()?;
        unsafe { self.gl.bind_framebuffer(glow::FRAMEBUFFER, framebuffer) };
        self.check_error()
    }

    fn clear(&mut self, flags: ClearFlags, color: [f32; 4]) -> PipelineResult<()> {
        self.ensure_current()?;
        let mut mask = 0;
        if flags.contains(ClearFlags::COLOR) {
            mask |= glow::COLOR_BUFFER_BIT;
        }
        if flags.contains(ClearFlags::DEPTH) {
            mask |= glow::DEPTH_BUFFER_BIT;
        }
        if flags.contains(ClearFlags::STENCIL) {
            mask |= glow::STENCIL_BUFFER_BIT;
        }
        let [r, g, b, a] = color;
        unsafe {
            self.gl.clear_color(r, g, b, a);
            self.gl.clear(mask);
        }
        self.check_error()
    }

    fn blit(
        &mut self,
        src: GraphicsHandle,
        dst: Option<GraphicsHandle>,
        region: BlitRegion,
    ) -> PipelineResult<()> {
        self.ensure_current()?;
        let src = self.framebuffer(src)?;
        let dst = dst.map(|h| self.framebuffer(h)).transpose()?;
        let scaled = (region.src_width, region.src_height) != (region.dst_width, region.dst_height);
        unsafe {
            self.gl.bind_framebuffer(glow::READ_FRAMEBUFFER, Some(src));
            self.gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, dst);
            self.gl.blit_framebuffer(
                0,
                0,
                region.src_width as i32,
                region.src_height as i32,
                0,
                0,
                region.dst_width as i32,
                region.dst_height as i32,
                glow::COLOR_BUFFER_BIT,
                if scaled { glow::LINEAR } else { glow::NEAREST },
            );
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }
        self.check_error()
    }

    fn set_viewport(&mut self, width: u32, height: u32) -> PipelineResult<()> {
        self.ensure_current()?;
        unsafe { self.gl.viewport(0, 0, width as i32, height as i32) };
        Ok(())
    }

    fn use_program(&mut self, program: GraphicsHandle) -> PipelineResult<()> {
        self.ensure_current()?;
        let program = self.program(program)?;
        unsafe { self.gl.use_program(Some(program)) };
        self.check_error()
    }

    fn bind_vertex_array(&mut self, vertex_array: GraphicsHandle) -> PipelineResult<()> {
        self.ensure_current()?;
        let NativeObject::VertexArray(native) = self.native(vertex_array)? else {
            return Err(PipelineError::InvalidHandle(vertex_array));
        };
        unsafe { self.gl.bind_vertex_array(Some(native)) };
        self.check_error()
    }

    fn bind_texture(&mut self, unit: u32, texture: GraphicsHandle) -> PipelineResult<()> {
        self.ensure_current()?;
        let (texture, target) = self.texture(texture)?;
        unsafe {
            self.gl.active_texture(glow::TEXTURE0 + unit);
            self.gl.bind_texture(target, Some(texture));
        }
        self.check_error()
    }

    fn set_uniform(&mut self, slot: i32, value: UniformData<'_>) -> PipelineResult<()> {
        self.ensure_current()?;
        if slot < 0 {
            return Ok(());
        }
        let location = glow::NativeUniformLocation(slot as u32);
        let location = Some(&location);
        unsafe {
            match value {
                UniformData::Sampler(unit) => self.gl.uniform_1_i32(location, unit),
                UniformData::Matrix4(matrix) => {
                    self.gl
                        .uniform_matrix_4_f32_slice(location, false, &matrix.to_cols_array())
                }
                UniformData::Matrix4Array(matrices) => self.gl.uniform_matrix_4_f32_slice(
                    location,
                    false,
                    bytemuck::cast_slice(matrices),
                ),
                UniformData::Vec3(v) => self.gl.uniform_3_f32(location, v.x, v.y, v.z),
                UniformData::Scalar(s) => self.gl.uniform_1_f32(location, s),
            }
        }
        self.check_error()
    }

    fn draw(&mut self, call: &DrawCall) -> PipelineResult<()> {
        self.ensure_current()?;
        let instances = call.instances as i32;
        unsafe {
            match call.mode {
                DrawMode::Arrays { vertex_count } => {
                    self.gl
                        .draw_arrays_instanced(glow::TRIANGLES, 0, vertex_count as i32, instances)
                }
                DrawMode::Indexed {
                    index_count,
                    index_type,
                } => self.gl.draw_elements_instanced(
                    glow::TRIANGLES,
                    index_count as i32,
                    attrib_type(index_type),
                    0,
                    instances,
                ),
            }
        }
        self.check_error()
    }

    fn delete(&mut self, handle: GraphicsHandle) -> PipelineResult<()> {
        self.ensure_current()?;
        let native = {
            let mut objects = self.namespace.objects.lock();
            match objects.objects.get(&handle.id) {
                None => return Err(PipelineError::InvalidHandle(handle)),
                Some((owner, _)) if *owner != self.kind => {
                    return Err(PipelineError::api(api_error::INVALID_OPERATION))
                }
                Some(_) => {}
            }
            objects.objects.remove(&handle.id).map(|(_, native)| native)
        };
        log::trace!("GlContext({:?}): deleting {:?} {}", self.kind, handle.kind, handle.id);
        unsafe {
            match native {
                Some(NativeObject::Shader(shader)) => self.gl.delete_shader(shader),
                Some(NativeObject::Program(program)) => self.gl.delete_program(program),
                Some(NativeObject::Texture { texture, .. }) => self.gl.delete_texture(texture),
                Some(NativeObject::Buffer(buffer)) => self.gl.delete_buffer(buffer),
                Some(NativeObject::VertexArray(vertex_array)) => {
                    self.gl.delete_vertex_array(vertex_array)
                }
                Some(NativeObject::Framebuffer(framebuffer)) => {
                    self.gl.delete_framebuffer(framebuffer)
                }
                None => {}
            }
        }
        self.check_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_formats() {
        assert_eq!(
            attachment_format(AttachmentFormat::Depth24Stencil8).1,
            glow::DEPTH_STENCIL
        );
        assert_eq!(
            attachment_format(AttachmentFormat::Rg16Float).0,
            glow::RG16F as i32
        );
        assert_eq!(pixel_format(PixelFormat::Rgb8), (glow::RGB8 as i32, glow::RGB));
    }

    #[test]
    fn test_framebuffer_status_codes() {
        assert!(framebuffer_status(glow::FRAMEBUFFER_COMPLETE).is_complete());
        assert_eq!(
            framebuffer_status(glow::FRAMEBUFFER_INCOMPLETE_MULTISAMPLE),
            FramebufferStatus::IncompleteMultisample
        );
        assert_eq!(framebuffer_status(0), FramebufferStatus::Unsupported);
    }

    fn assert_send<T: Send>() {}

    #[test]
    fn test_context_is_a_graphics_context() {
        assert_send::<GlContext>();
        let _boxed: fn(GlContext) -> Box<dyn GraphicsContext> = |ctx| Box::new(ctx);
    }

    #[test]
    fn test_index_types_map_to_gl() {
        assert_eq!(attrib_type(AttribType::UShort), glow::UNSIGNED_SHORT);
        assert_eq!(attrib_type(AttribType::UInt), glow::UNSIGNED_INT);
    }
}
