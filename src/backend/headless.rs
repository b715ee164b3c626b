//! Headless recording device.
//!
//! Implements [`GraphicsContext`] without touching GPU hardware. A
//! [`HeadlessDevice`] owns the object namespace shared by its main and
//! loader contexts and enforces the same cross-context rules a real driver
//! does: container objects are usable only on their creating context,
//! shared objects only after the creating context called `finish()`, and
//! every call must come from the thread the context is attached to.
//!
//! Shader sources are scanned for `uniform` declarations, `#error`
//! directives fail compilation, and a stage without `void main` fails to
//! link. Draw calls, clears, blits and presents are recorded so tests can
//! inspect what a frame issued.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use glam::{Mat4, Vec3};
use parking_lot::Mutex;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::{api_error, PipelineError, PipelineResult};

/// Multisample limits reported by the headless device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadlessLimits {
    pub max_color_samples: u32,
    pub max_depth_samples: u32,
}

impl Default for HeadlessLimits {
    fn default() -> Self {
        Self {
            max_color_samples: 8,
            max_depth_samples: 8,
        }
    }
}

/// Storage class of a headless texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureStorage {
    Sampled(PixelFormat),
    Attachment(AttachmentFormat),
}

/// An object living in the headless namespace
#[derive(Debug, Clone, PartialEq)]
pub enum HeadlessObject {
    Shader {
        name: String,
        stage: ShaderStage,
        uniforms: Vec<String>,
        has_main: bool,
    },
    Program {
        shaders: Vec<u64>,
        uniforms: Vec<String>,
    },
    Texture {
        width: u32,
        height: u32,
        storage: TextureStorage,
        samples: u32,
        mip_levels: u32,
        filter: FilterMode,
    },
    Buffer {
        kind: BufferKind,
        len: usize,
    },
    VertexArray {
        vertex_buffer: u64,
        index_buffer: Option<u64>,
        stride: u32,
        attributes: Vec<VertexAttributeBinding>,
        defaults: Vec<(AttribLocation, DefaultAttribute)>,
    },
    Framebuffer {
        attachments: Vec<(AttachmentPoint, u64)>,
    },
}

impl HeadlessObject {
    fn kind(&self) -> HandleKind {
        match self {
            HeadlessObject::Shader { .. } => HandleKind::Shader,
            HeadlessObject::Program { .. } => HandleKind::Program,
            HeadlessObject::Texture { .. } => HandleKind::Texture,
            HeadlessObject::Buffer { .. } => HandleKind::Buffer,
            HeadlessObject::VertexArray { .. } => HandleKind::VertexArray,
            HeadlessObject::Framebuffer { .. } => HandleKind::Framebuffer,
        }
    }
}

/// Owned copy of a uniform write
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedUniform {
    Sampler(i32),
    Matrix4(Mat4),
    Matrix4Array(Vec<Mat4>),
    Vec3(Vec3),
    Scalar(f32),
}

impl From<UniformData<'_>> for RecordedUniform {
    fn from(value: UniformData<'_>) -> Self {
        match value {
            UniformData::Sampler(unit) => RecordedUniform::Sampler(unit),
            UniformData::Matrix4(m) => RecordedUniform::Matrix4(*m),
            UniformData::Matrix4Array(ms) => RecordedUniform::Matrix4Array(ms.to_vec()),
            UniformData::Vec3(v) => RecordedUniform::Vec3(v),
            UniformData::Scalar(s) => RecordedUniform::Scalar(s),
        }
    }
}

/// A draw call as the device saw it
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub context: ContextKind,
    pub program: u64,
    pub vertex_array: u64,
    pub framebuffer: Option<u64>,
    pub call: DrawCall,
    /// Texture unit bindings, ascending by unit
    pub textures: Vec<(u32, u64)>,
    /// Uniform writes since the program was bound
    pub uniforms: Vec<(i32, RecordedUniform)>,
}

impl DrawRecord {
    pub fn uniform(&self, slot: i32) -> Option<&RecordedUniform> {
        self.uniforms
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, value)| value)
    }
}

#[derive(Debug)]
struct ObjectRecord {
    owner: ContextKind,
    published: bool,
    object: HeadlessObject,
}

#[derive(Debug, Default)]
struct Namespace {
    next_id: u64,
    objects: HashMap<u64, ObjectRecord>,
    draws: Vec<DrawRecord>,
    clears: usize,
    blits: usize,
    presents: usize,
}

impl Namespace {
    fn insert(&mut self, owner: ContextKind, object: HeadlessObject) -> GraphicsHandle {
        self.next_id += 1;
        let id = self.next_id;
        let kind = object.kind();
        self.objects.insert(
            id,
            ObjectRecord {
                owner,
                published: false,
                object,
            },
        );
        GraphicsHandle::new(id, kind, owner)
    }
}

/// Shared namespace of a headless context pair
#[derive(Debug, Clone)]
pub struct HeadlessDevice {
    namespace: Arc<Mutex<Namespace>>,
    limits: HeadlessLimits,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::with_limits(HeadlessLimits::default())
    }

    pub fn with_limits(limits: HeadlessLimits) -> Self {
        Self {
            namespace: Arc::new(Mutex::new(Namespace::default())),
            limits,
        }
    }

    /// Create a context on this namespace
    pub fn context(&self, kind: ContextKind) -> HeadlessContext {
        HeadlessContext {
            kind,
            namespace: Arc::clone(&self.namespace),
            limits: self.limits,
            attached: None,
            attach_error: None,
            framebuffer: None,
            program: None,
            vertex_array: None,
            textures: BTreeMap::new(),
            uniforms: Vec::new(),
        }
    }

    /// Every draw recorded so far
    pub fn draws(&self) -> Vec<DrawRecord> {
        self.namespace.lock().draws.clone()
    }

    /// Drain the recorded draws
    pub fn take_draws(&self) -> Vec<DrawRecord> {
        std::mem::take(&mut self.namespace.lock().draws)
    }

    pub fn clears(&self) -> usize {
        self.namespace.lock().clears
    }

    pub fn blits(&self) -> usize {
        self.namespace.lock().blits
    }

    pub fn presents(&self) -> usize {
        self.namespace.lock().presents
    }

    /// Snapshot of a live object
    pub fn object(&self, handle: GraphicsHandle) -> Option<HeadlessObject> {
        self.namespace
            .lock()
            .objects
            .get(&handle.id)
            .map(|record| record.object.clone())
    }

    pub fn is_live(&self, handle: GraphicsHandle) -> bool {
        self.namespace.lock().objects.contains_key(&handle.id)
    }

    /// Number of live objects of one class
    pub fn live_objects(&self, kind: HandleKind) -> usize {
        self.namespace
            .lock()
            .objects
            .values()
            .filter(|record| record.object.kind() == kind)
            .count()
    }
}

/// One side of a headless context pair
#[derive(Debug)]
pub struct HeadlessContext {
    kind: ContextKind,
    namespace: Arc<Mutex<Namespace>>,
    limits: HeadlessLimits,
    attached: Option<ThreadId>,
    attach_error: Option<String>,
    framebuffer: Option<u64>,
    program: Option<u64>,
    vertex_array: Option<u64>,
    textures: BTreeMap<u32, u64>,
    uniforms: Vec<(i32, RecordedUniform)>,
}

impl HeadlessContext {
    /// Make every `attach` call fail with `reason`
    pub fn failing_attach(mut self, reason: impl Into<String>) -> Self {
        self.attach_error = Some(reason.into());
        self
    }

    #[track_caller]
    fn ensure_current(&self) -> PipelineResult<()> {
        match self.attached {
            Some(id) if id == thread::current().id() => Ok(()),
            _ => Err(PipelineError::api(api_error::INVALID_OPERATION)),
        }
    }

    /// Validates that `handle` may be used from this context
    #[track_caller]
    fn check_usable(
        &self,
        ns: &Namespace,
        handle: GraphicsHandle,
        kind: HandleKind,
    ) -> PipelineResult<()> {
        let record = ns
            .objects
            .get(&handle.id)
            .ok_or_else(|| PipelineError::api(api_error::INVALID_VALUE))?;
        if record.object.kind() != kind {
            return Err(PipelineError::api(api_error::INVALID_OPERATION));
        }
        if record.owner != self.kind {
            if kind.is_container() || !record.published {
                return Err(PipelineError::api(api_error::INVALID_OPERATION));
            }
        }
        Ok(())
    }

    fn sample_limit(&self, format: AttachmentFormat) -> u32 {
        if format.is_depth() {
            self.limits.max_depth_samples
        } else {
            self.limits.max_color_samples
        }
    }
}

fn parse_uniforms(source: &str, out: &mut Vec<String>) {
    for line in source.lines() {
        let Some(decl) = line.trim().strip_prefix("uniform ") else {
            continue;
        };
        let decl = decl.split(';').next().unwrap_or_default();
        let Some(name) = decl.split_whitespace().last() else {
            continue;
        };
        let name = name.split('[').next().unwrap_or_default();
        if !name.is_empty() && !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
}

fn compile_log(sources: &[&str]) -> Option<String> {
    let mut log = String::new();
    let mut line_no = 0;
    for source in sources {
        for line in source.lines() {
            line_no += 1;
            if let Some(message) = line.trim().strip_prefix("#error") {
                log.push_str(&format!(
                    "ERROR: 0:{line_no}: '#error' : {}\n",
                    message.trim()
                ));
            }
        }
    }
    (!log.is_empty()).then_some(log)
}

fn mip_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

impl GraphicsContext for HeadlessContext {
    fn kind(&self) -> ContextKind {
        self.kind
    }

    fn attach(&mut self) -> PipelineResult<()> {
        if let Some(reason) = &self.attach_error {
            return Err(PipelineError::Context(reason.clone()));
        }
        let current = thread::current().id();
        match self.attached {
            Some(id) if id != current => Err(PipelineError::Context(format!(
                "{:?} context is current on another thread",
                self.kind
            ))),
            _ => {
                log::trace!("HeadlessContext: attaching {:?} context", self.kind);
                self.attached = Some(current);
                Ok(())
            }
        }
    }

    fn detach(&mut self) {
        log::trace!("HeadlessContext: detaching {:?} context", self.kind);
        self.attached = None;
    }

    fn swap_buffers(&mut self) -> PipelineResult<()> {
        self.ensure_current()?;
        self.namespace.lock().presents += 1;
        Ok(())
    }

    fn finish(&mut self) -> PipelineResult<()> {
        self.ensure_current()?;
        let mut ns = self.namespace.lock();
        for record in ns.objects.values_mut() {
            if record.owner == self.kind {
                record.published = true;
            }
        }
        Ok(())
    }

    fn max_samples(&self) -> u32 {
        self.limits
            .max_color_samples
            .min(self.limits.max_depth_samples)
    }

    fn compile_shader(
        &mut self,
        name: &str,
        stage: ShaderStage,
        sources: &[&str],
    ) -> PipelineResult<GraphicsHandle> {
        self.ensure_current()?;
        log::trace!("HeadlessContext: compiling {:?} shader {}", stage, name);
        if let Some(log) = compile_log(sources) {
            return Err(PipelineError::Compile {
                name: name.to_string(),
                stage,
                log,
            });
        }
        let mut uniforms = Vec::new();
        for source in sources {
            parse_uniforms(source, &mut uniforms);
        }
        let has_main = sources.iter().any(|s| s.contains("void main"));
        Ok(self.namespace.lock().insert(
            self.kind,
            HeadlessObject::Shader {
                name: name.to_string(),
                stage,
                uniforms,
                has_main,
            },
        ))
    }

    fn link_program(&mut self, shaders: &[GraphicsHandle]) -> PipelineResult<GraphicsHandle> {
        self.ensure_current()?;
        let mut ns = self.namespace.lock();
        let mut stages = Vec::new();
        let mut uniforms = Vec::new();
        let mut log = String::new();
        for handle in shaders {
            self.check_usable(&ns, *handle, HandleKind::Shader)?;
            if let Some(ObjectRecord {
                object:
                    HeadlessObject::Shader {
                        name,
                        stage,
                        uniforms: declared,
                        has_main,
                    },
                ..
            }) = ns.objects.get(&handle.id)
            {
                if stages.contains(stage) {
                    log.push_str(&format!("ERROR: duplicate {stage:?} shader {name}\n"));
                }
                if !has_main {
                    log.push_str(&format!("ERROR: missing main() in {stage:?} shader {name}\n"));
                }
                stages.push(*stage);
                for uniform in declared {
                    if !uniforms.contains(uniform) {
                        uniforms.push(uniform.clone());
                    }
                }
            }
        }
        for required in [ShaderStage::Vertex, ShaderStage::Fragment] {
            if !stages.contains(&required) {
                log.push_str(&format!("ERROR: no {required:?} shader attached\n"));
            }
        }
        if !log.is_empty() {
            return Err(PipelineError::Link { log });
        }
        log::trace!("HeadlessContext: linked program with {} uniforms", uniforms.len());
        Ok(ns.insert(
            self.kind,
            HeadlessObject::Program {
                shaders: shaders.iter().map(|h| h.id).collect(),
                uniforms,
            },
        ))
    }

    fn uniform_slot(&mut self, program: GraphicsHandle, name: &str) -> PipelineResult<i32> {
        self.ensure_current()?;
        let ns = self.namespace.lock();
        self.check_usable(&ns, program, HandleKind::Program)?;
        match ns.objects.get(&program.id).map(|r| &r.object) {
            Some(HeadlessObject::Program { uniforms, .. }) => Ok(uniforms
                .iter()
                .position(|u| u == name)
                .map_or(-1, |slot| slot as i32)),
            _ => Err(PipelineError::api(api_error::INVALID_OPERATION)),
        }
    }

    fn upload_texture(&mut self, upload: &TextureUpload<'_>) -> PipelineResult<GraphicsHandle> {
        self.ensure_current()?;
        let expected = upload.width as usize * upload.height as usize * upload.format.channels() as usize;
        if upload.width == 0 || upload.height == 0 || upload.pixels.len() != expected {
            return Err(PipelineError::api(api_error::INVALID_VALUE));
        }
        log::trace!(
            "HeadlessContext: uploading texture {} ({}x{} {:?})",
            upload.label,
            upload.width,
            upload.height,
            upload.format
        );
        let mip_levels = if upload.build_mips {
            mip_count(upload.width, upload.height)
        } else {
            1
        };
        Ok(self.namespace.lock().insert(
            self.kind,
            HeadlessObject::Texture {
                width: upload.width,
                height: upload.height,
                storage: TextureStorage::Sampled(upload.format),
                samples: 1,
                mip_levels,
                filter: upload.filter,
            },
        ))
    }

    fn create_attachment(&mut self, desc: &AttachmentDescriptor) -> PipelineResult<GraphicsHandle> {
        self.ensure_current()?;
        if desc.width == 0 || desc.height == 0 || desc.samples > self.sample_limit(desc.format) {
            return Err(PipelineError::api(api_error::INVALID_VALUE));
        }
        log::trace!(
            "HeadlessContext: creating {:?} attachment ({}x{}, {} samples)",
            desc.format,
            desc.width,
            desc.height,
            desc.samples
        );
        Ok(self.namespace.lock().insert(
            self.kind,
            HeadlessObject::Texture {
                width: desc.width,
                height: desc.height,
                storage: TextureStorage::Attachment(desc.format),
                samples: desc.samples.max(1),
                mip_levels: desc.mip_levels.max(1),
                filter: FilterMode::Linear,
            },
        ))
    }

    fn generate_mipmaps(&mut self, texture: GraphicsHandle) -> PipelineResult<()> {
        self.ensure_current()?;
        let mut ns = self.namespace.lock();
        self.check_usable(&ns, texture, HandleKind::Texture)?;
        if let Some(ObjectRecord {
            object:
                HeadlessObject::Texture {
                    width,
                    height,
                    samples,
                    mip_levels,
                    ..
                },
            ..
        }) = ns.objects.get_mut(&texture.id)
        {
            if *samples > 1 {
                return Err(PipelineError::api(api_error::INVALID_OPERATION));
            }
            *mip_levels = mip_count(*width, *height);
        }
        Ok(())
    }

    fn create_buffer(&mut self, kind: BufferKind, data: &[u8]) -> PipelineResult<GraphicsHandle> {
        self.ensure_current()?;
        log::trace!("HeadlessContext: creating {:?} buffer ({} bytes)", kind, data.len());
        Ok(self
            .namespace
            .lock()
            .insert(self.kind, HeadlessObject::Buffer { kind, len: data.len() }))
    }

    fn create_vertex_array(
        &mut self,
        desc: &VertexArrayDescriptor<'_>,
    ) -> PipelineResult<GraphicsHandle> {
        self.ensure_current()?;
        let mut ns = self.namespace.lock();
        self.check_usable(&ns, desc.vertex_buffer, HandleKind::Buffer)?;
        if let Some(index) = desc.index_buffer {
            self.check_usable(&ns, index, HandleKind::Buffer)?;
        }
        if desc.stride == 0 {
            return Err(PipelineError::api(api_error::INVALID_VALUE));
        }
        for attribute in desc.attributes {
            if !(1..=4).contains(&attribute.components) {
                return Err(PipelineError::api(api_error::INVALID_VALUE));
            }
            if attribute.special == AttribSpecial::Integer && !attribute.ty.is_integer() {
                return Err(PipelineError::api(api_error::INVALID_ENUM));
            }
        }
        log::trace!(
            "HeadlessContext: creating vertex array ({} streams, {} defaults)",
            desc.attributes.len(),
            desc.defaults.len()
        );
        Ok(ns.insert(
            self.kind,
            HeadlessObject::VertexArray {
                vertex_buffer: desc.vertex_buffer.id,
                index_buffer: desc.index_buffer.map(|h| h.id),
                stride: desc.stride,
                attributes: desc.attributes.to_vec(),
                defaults: desc.defaults.to_vec(),
            },
        ))
    }

    fn create_framebuffer(
        &mut self,
        attachments: &[(AttachmentPoint, GraphicsHandle)],
    ) -> PipelineResult<GraphicsHandle> {
        self.ensure_current()?;
        let mut ns = self.namespace.lock();
        for (_, texture) in attachments {
            self.check_usable(&ns, *texture, HandleKind::Texture)?;
        }
        Ok(ns.insert(
            self.kind,
            HeadlessObject::Framebuffer {
                attachments: attachments.iter().map(|(p, t)| (*p, t.id)).collect(),
            },
        ))
    }

    fn framebuffer_status(
        &mut self,
        framebuffer: GraphicsHandle,
    ) -> PipelineResult<FramebufferStatus> {
        self.ensure_current()?;
        let ns = self.namespace.lock();
        self.check_usable(&ns, framebuffer, HandleKind::Framebuffer)?;
        let Some(HeadlessObject::Framebuffer { attachments }) =
            ns.objects.get(&framebuffer.id).map(|r| &r.object)
        else {
            return Err(PipelineError::api(api_error::INVALID_OPERATION));
        };
        if attachments.is_empty() {
            return Ok(FramebufferStatus::MissingAttachment);
        }
        let mut extent = None;
        let mut points = Vec::new();
        for (point, id) in attachments {
            if points.contains(point) {
                return Ok(FramebufferStatus::Unsupported);
            }
            points.push(*point);
            let Some(HeadlessObject::Texture {
                width,
                height,
                storage,
                samples,
                ..
            }) = ns.objects.get(id).map(|r| &r.object)
            else {
                return Ok(FramebufferStatus::IncompleteAttachment);
            };
            let is_depth = matches!(storage, TextureStorage::Attachment(f) if f.is_depth());
            if is_depth != (*point == AttachmentPoint::DepthStencil) {
                return Ok(FramebufferStatus::IncompleteAttachment);
            }
            match extent {
                None => extent = Some((*width, *height, *samples)),
                Some((w, h, s)) => {
                    if s != *samples {
                        return Ok(FramebufferStatus::IncompleteMultisample);
                    }
                    if (w, h) != (*width, *height) {
                        return Ok(FramebufferStatus::IncompleteAttachment);
                    }
                }
            }
        }
        Ok(FramebufferStatus::Complete)
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<GraphicsHandle>) -> PipelineResult<()> {
        self.ensure_current()?;
        if let Some(handle) = framebuffer {
            let ns = self.namespace.lock();
            self.check_usable(&ns, handle, HandleKind::Framebuffer)?;
        }
        self.framebuffer = framebuffer.map(|h| h.id);
        Ok(())
    }

    fn clear(&mut self, _flags: ClearFlags, _color: [f32; 4]) -> PipelineResult<()> {
        self.ensure_current()?;
        self.namespace.lock().clears += 1;
        Ok(())
    }

    fn blit(
        &mut self,
        src: GraphicsHandle,
        dst: Option<GraphicsHandle>,
        _region: BlitRegion,
    ) -> PipelineResult<()> {
        self.ensure_current()?;
        let mut ns = self.namespace.lock();
        self.check_usable(&ns, src, HandleKind::Framebuffer)?;
        if let Some(dst) = dst {
            self.check_usable(&ns, dst, HandleKind::Framebuffer)?;
        }
        ns.blits += 1;
        Ok(())
    }

    fn set_viewport(&mut self, _width: u32, _height: u32) -> PipelineResult<()> {
        self.ensure_current()
    }

    fn use_program(&mut self, program: GraphicsHandle) -> PipelineResult<()> {
        self.ensure_current()?;
        let ns = self.namespace.lock();
        self.check_usable(&ns, program, HandleKind::Program)?;
        drop(ns);
        self.program = Some(program.id);
        self.uniforms.clear();
        Ok(())
    }

    fn bind_vertex_array(&mut self, vertex_array: GraphicsHandle) -> PipelineResult<()> {
        self.ensure_current()?;
        let ns = self.namespace.lock();
        self.check_usable(&ns, vertex_array, HandleKind::VertexArray)?;
        drop(ns);
        self.vertex_array = Some(vertex_array.id);
        Ok(())
    }

    fn bind_texture(&mut self, unit: u32, texture: GraphicsHandle) -> PipelineResult<()> {
        self.ensure_current()?;
        let ns = self.namespace.lock();
        self.check_usable(&ns, texture, HandleKind::Texture)?;
        drop(ns);
        self.textures.insert(unit, texture.id);
        Ok(())
    }

    fn set_uniform(&mut self, slot: i32, value: UniformData<'_>) -> PipelineResult<()> {
        self.ensure_current()?;
        let program = self
            .program
            .ok_or_else(|| PipelineError::api(api_error::INVALID_OPERATION))?;
        if slot < 0 {
            return Ok(());
        }
        let uniform_count = match self.namespace.lock().objects.get(&program).map(|r| &r.object) {
            Some(HeadlessObject::Program { uniforms, .. }) => uniforms.len(),
            _ => return Err(PipelineError::api(api_error::INVALID_OPERATION)),
        };
        if slot as usize >= uniform_count {
            return Err(PipelineError::api(api_error::INVALID_OPERATION));
        }
        self.uniforms.retain(|(s, _)| *s != slot);
        self.uniforms.push((slot, value.into()));
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall) -> PipelineResult<()> {
        self.ensure_current()?;
        let (Some(program), Some(vertex_array)) = (self.program, self.vertex_array) else {
            return Err(PipelineError::api(api_error::INVALID_OPERATION));
        };
        let mut ns = self.namespace.lock();
        if !ns.objects.contains_key(&program) {
            return Err(PipelineError::api(api_error::INVALID_OPERATION));
        }
        let has_indices = match ns.objects.get(&vertex_array).map(|r| &r.object) {
            Some(HeadlessObject::VertexArray { index_buffer, .. }) => index_buffer.is_some(),
            _ => return Err(PipelineError::api(api_error::INVALID_OPERATION)),
        };
        if matches!(call.mode, DrawMode::Indexed { .. }) && !has_indices {
            return Err(PipelineError::api(api_error::INVALID_OPERATION));
        }
        ns.draws.push(DrawRecord {
            context: self.kind,
            program,
            vertex_array,
            framebuffer: self.framebuffer,
            call: *call,
            textures: self.textures.iter().map(|(u, t)| (*u, *t)).collect(),
            uniforms: self.uniforms.clone(),
        });
        Ok(())
    }

    fn delete(&mut self, handle: GraphicsHandle) -> PipelineResult<()> {
        self.ensure_current()?;
        let mut ns = self.namespace.lock();
        match ns.objects.get(&handle.id) {
            None => return Err(PipelineError::api(api_error::INVALID_VALUE)),
            Some(record) if record.owner != self.kind => {
                return Err(PipelineError::api(api_error::INVALID_OPERATION))
            }
            Some(_) => {}
        }
        log::trace!("HeadlessContext: deleting {:?} {}", handle.kind, handle.id);
        ns.objects.remove(&handle.id);
        if self.framebuffer == Some(handle.id) {
            self.framebuffer = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERT: &str = "uniform mat4 modelview[64];\nuniform mat4 projection;\nvoid main() {}\n";
    const FRAG: &str = "uniform sampler2D diffuse;\nvoid main() {}\n";

    fn attached(device: &HeadlessDevice, kind: ContextKind) -> HeadlessContext {
        let mut ctx = device.context(kind);
        ctx.attach().unwrap();
        ctx
    }

    fn program(ctx: &mut HeadlessContext) -> GraphicsHandle {
        let vs = ctx.compile_shader("simple.vs", ShaderStage::Vertex, &[VERT]).unwrap();
        let fs = ctx.compile_shader("simple.fs", ShaderStage::Fragment, &[FRAG]).unwrap();
        ctx.link_program(&[vs, fs]).unwrap()
    }

    #[test]
    fn test_uniform_slots_follow_declarations() {
        let device = HeadlessDevice::new();
        let mut ctx = attached(&device, ContextKind::Loader);
        let program = program(&mut ctx);

        assert_eq!(ctx.uniform_slot(program, "modelview").unwrap(), 0);
        assert_eq!(ctx.uniform_slot(program, "projection").unwrap(), 1);
        assert_eq!(ctx.uniform_slot(program, "diffuse").unwrap(), 2);
        assert_eq!(ctx.uniform_slot(program, "bones").unwrap(), -1);
    }

    #[test]
    fn test_error_directive_fails_compile() {
        let device = HeadlessDevice::new();
        let mut ctx = attached(&device, ContextKind::Loader);
        let err = ctx
            .compile_shader("broken.fs", ShaderStage::Fragment, &["#version 150\n", "#error nope\n"])
            .unwrap_err();
        match err {
            PipelineError::Compile { log, stage, .. } => {
                assert_eq!(stage, ShaderStage::Fragment);
                assert!(log.contains("0:2: '#error' : nope"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_link_requires_main_and_both_stages() {
        let device = HeadlessDevice::new();
        let mut ctx = attached(&device, ContextKind::Loader);
        let vs = ctx.compile_shader("a.vs", ShaderStage::Vertex, &["uniform float x;"]).unwrap();
        let err = ctx.link_program(&[vs]).unwrap_err();
        let PipelineError::Link { log } = err else {
            panic!("expected link error");
        };
        assert!(log.contains("missing main()"));
        assert!(log.contains("no Fragment shader"));
    }

    #[test]
    fn test_shared_objects_need_publication() {
        let device = HeadlessDevice::new();
        let mut loader = attached(&device, ContextKind::Loader);
        let mut main = attached(&device, ContextKind::Main);
        let program = program(&mut loader);

        assert!(main.use_program(program).is_err());
        loader.finish().unwrap();
        assert!(main.use_program(program).is_ok());
    }

    #[test]
    fn test_container_objects_stay_on_their_context() {
        let device = HeadlessDevice::new();
        let mut loader = attached(&device, ContextKind::Loader);
        let mut main = attached(&device, ContextKind::Main);
        let vbo = loader.create_buffer(BufferKind::Vertex, &[0; 12]).unwrap();
        let vao = loader
            .create_vertex_array(&VertexArrayDescriptor {
                vertex_buffer: vbo,
                index_buffer: None,
                stride: 12,
                attributes: &[],
                defaults: &[],
            })
            .unwrap();
        loader.finish().unwrap();

        assert!(main.bind_vertex_array(vao).is_err());
        assert!(main.delete(vbo).is_err());
        assert!(loader.delete(vbo).is_ok());
    }

    #[test]
    fn test_calls_require_attached_thread() {
        let device = HeadlessDevice::new();
        let mut ctx = device.context(ContextKind::Main);
        let err = ctx.create_buffer(BufferKind::Vertex, &[0; 4]).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::GraphicsApi { code: api_error::INVALID_OPERATION, .. }
        ));
    }

    #[test]
    fn test_framebuffer_status() {
        let device = HeadlessDevice::new();
        let mut ctx = attached(&device, ContextKind::Main);
        let attachment = |ctx: &mut HeadlessContext, format, samples, width| {
            ctx.create_attachment(&AttachmentDescriptor {
                width,
                height: 32,
                format,
                samples,
                mip_levels: 1,
            })
            .unwrap()
        };
        let depth = attachment(&mut ctx, AttachmentFormat::Depth24Stencil8, 4, 32);
        let color = attachment(&mut ctx, AttachmentFormat::Rgba8, 4, 32);
        let other = attachment(&mut ctx, AttachmentFormat::Rgba8, 2, 32);

        let complete = ctx
            .create_framebuffer(&[
                (AttachmentPoint::DepthStencil, depth),
                (AttachmentPoint::Color(0), color),
            ])
            .unwrap();
        assert_eq!(ctx.framebuffer_status(complete).unwrap(), FramebufferStatus::Complete);

        let mixed = ctx
            .create_framebuffer(&[
                (AttachmentPoint::Color(0), color),
                (AttachmentPoint::Color(1), other),
            ])
            .unwrap();
        assert_eq!(
            ctx.framebuffer_status(mixed).unwrap(),
            FramebufferStatus::IncompleteMultisample
        );

        ctx.delete(color).unwrap();
        assert_eq!(
            ctx.framebuffer_status(complete).unwrap(),
            FramebufferStatus::IncompleteAttachment
        );
    }

    #[test]
    fn test_attachment_samples_limited() {
        let device = HeadlessDevice::with_limits(HeadlessLimits {
            max_color_samples: 8,
            max_depth_samples: 4,
        });
        let mut ctx = attached(&device, ContextKind::Main);
        assert_eq!(ctx.max_samples(), 4);
        assert!(ctx
            .create_attachment(&AttachmentDescriptor {
                width: 8,
                height: 8,
                format: AttachmentFormat::Depth24Stencil8,
                samples: 8,
                mip_levels: 1,
            })
            .is_err());
    }

    #[test]
    fn test_draw_records_bindings() {
        let device = HeadlessDevice::new();
        let mut ctx = attached(&device, ContextKind::Main);
        let program = program(&mut ctx);
        let vbo = ctx.create_buffer(BufferKind::Vertex, &[0; 36]).unwrap();
        let vao = ctx
            .create_vertex_array(&VertexArrayDescriptor {
                vertex_buffer: vbo,
                index_buffer: None,
                stride: 12,
                attributes: &[],
                defaults: &[],
            })
            .unwrap();
        let texture = ctx
            .upload_texture(&TextureUpload {
                label: "white",
                width: 1,
                height: 1,
                format: PixelFormat::Rgba8,
                pixels: &[255; 4],
                filter: FilterMode::Nearest,
                build_mips: false,
            })
            .unwrap();

        ctx.use_program(program).unwrap();
        ctx.bind_vertex_array(vao).unwrap();
        ctx.bind_texture(1, texture).unwrap();
        ctx.set_uniform(2, UniformData::Sampler(1)).unwrap();
        let call = DrawCall {
            mode: DrawMode::Arrays { vertex_count: 3 },
            instances: 2,
        };
        ctx.draw(&call).unwrap();

        let draws = device.draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].call, call);
        assert_eq!(draws[0].textures, vec![(1, texture.id())]);
        assert_eq!(draws[0].uniform(2), Some(&RecordedUniform::Sampler(1)));

        let indexed = DrawCall {
            mode: DrawMode::Indexed {
                index_count: 3,
                index_type: AttribType::UShort,
            },
            instances: 1,
        };
        assert!(ctx.draw(&indexed).is_err());
    }
}
