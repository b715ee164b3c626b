//! Core graphics context abstraction
//!
//! A [`GraphicsContext`] is the thread-affine command interface of one
//! graphics context. Two contexts, one per thread, share an object
//! namespace: ids minted by either are unique across both.

use crate::backend::types::*;
use crate::error::PipelineResult;

/// Which of the two contexts an object was created on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    Main,
    Loader,
}

/// Object class behind a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Shader,
    Program,
    Texture,
    Buffer,
    VertexArray,
    Framebuffer,
}

impl HandleKind {
    /// Container objects are never shared between contexts
    pub fn is_container(&self) -> bool {
        matches!(self, HandleKind::VertexArray | HandleKind::Framebuffer)
    }
}

/// Handle to a graphics object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphicsHandle {
    pub(crate) id: u64,
    pub(crate) kind: HandleKind,
    pub(crate) context: ContextKind,
}

impl GraphicsHandle {
    pub fn new(id: u64, kind: HandleKind, context: ContextKind) -> Self {
        Self { id, kind, context }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Context the object was created on
    pub fn context(&self) -> ContextKind {
        self.context
    }
}

/// Pixel upload for a sampled 2D texture
#[derive(Debug, Clone)]
pub struct TextureUpload<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pixels: &'a [u8],
    pub filter: FilterMode,
    pub build_mips: bool,
}

/// Render target attachment storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: AttachmentFormat,
    /// 0 or 1 allocates a single-sample texture
    pub samples: u32,
    pub mip_levels: u32,
}

/// One attribute stream inside a vertex buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttributeBinding {
    pub location: AttribLocation,
    pub components: u8,
    pub ty: AttribType,
    pub offset: u32,
    pub special: AttribSpecial,
}

/// Vertex attribute object description
#[derive(Debug, Clone)]
pub struct VertexArrayDescriptor<'a> {
    pub vertex_buffer: GraphicsHandle,
    pub index_buffer: Option<GraphicsHandle>,
    pub stride: u32,
    pub attributes: &'a [VertexAttributeBinding],
    /// Constant values for locations without a stream
    pub defaults: &'a [(AttribLocation, DefaultAttribute)],
}

/// Source rectangle sizes for a framebuffer blit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlitRegion {
    pub src_width: u32,
    pub src_height: u32,
    pub dst_width: u32,
    pub dst_height: u32,
}

/// Per-thread command interface of a graphics context
pub trait GraphicsContext: Send {
    /// Which side of the shared namespace this context is
    fn kind(&self) -> ContextKind;

    /// Make this context current on the calling thread
    fn attach(&mut self) -> PipelineResult<()>;

    /// Release this context from the calling thread
    fn detach(&mut self);

    /// Present the default framebuffer
    fn swap_buffers(&mut self) -> PipelineResult<()>;

    /// Wait until every issued command completed, publishing shared objects
    fn finish(&mut self) -> PipelineResult<()>;

    /// Smallest of the depth and color multisample limits
    fn max_samples(&self) -> u32;

    /// Compile one shader stage from concatenated sources
    fn compile_shader(
        &mut self,
        name: &str,
        stage: ShaderStage,
        sources: &[&str],
    ) -> PipelineResult<GraphicsHandle>;

    /// Link compiled shaders into a program
    fn link_program(&mut self, shaders: &[GraphicsHandle]) -> PipelineResult<GraphicsHandle>;

    /// Uniform location in a linked program, -1 if absent
    fn uniform_slot(&mut self, program: GraphicsHandle, name: &str) -> PipelineResult<i32>;

    /// Upload a sampled texture
    fn upload_texture(&mut self, upload: &TextureUpload<'_>) -> PipelineResult<GraphicsHandle>;

    /// Allocate render target storage
    fn create_attachment(&mut self, desc: &AttachmentDescriptor) -> PipelineResult<GraphicsHandle>;

    /// Regenerate the mip chain of a texture
    fn generate_mipmaps(&mut self, texture: GraphicsHandle) -> PipelineResult<()>;

    /// Upload a static vertex or index buffer
    fn create_buffer(&mut self, kind: BufferKind, data: &[u8]) -> PipelineResult<GraphicsHandle>;

    /// Create a vertex attribute object; context-specific
    fn create_vertex_array(
        &mut self,
        desc: &VertexArrayDescriptor<'_>,
    ) -> PipelineResult<GraphicsHandle>;

    /// Create a framebuffer from attachments; context-specific
    fn create_framebuffer(
        &mut self,
        attachments: &[(AttachmentPoint, GraphicsHandle)],
    ) -> PipelineResult<GraphicsHandle>;

    /// Completeness of a framebuffer
    fn framebuffer_status(&mut self, framebuffer: GraphicsHandle)
        -> PipelineResult<FramebufferStatus>;

    /// Bind a framebuffer for drawing, `None` for the default one
    fn bind_framebuffer(&mut self, framebuffer: Option<GraphicsHandle>) -> PipelineResult<()>;

    /// Clear the bound framebuffer
    fn clear(&mut self, flags: ClearFlags, color: [f32; 4]) -> PipelineResult<()>;

    /// Copy color between framebuffers, `None` targets the default one
    fn blit(
        &mut self,
        src: GraphicsHandle,
        dst: Option<GraphicsHandle>,
        region: BlitRegion,
    ) -> PipelineResult<()>;

    /// Set the viewport of the bound framebuffer
    fn set_viewport(&mut self, width: u32, height: u32) -> PipelineResult<()>;

    /// Bind a program for subsequent uniform writes and draws
    fn use_program(&mut self, program: GraphicsHandle) -> PipelineResult<()>;

    /// Bind a vertex attribute object
    fn bind_vertex_array(&mut self, vertex_array: GraphicsHandle) -> PipelineResult<()>;

    /// Bind a texture to a texture unit
    fn bind_texture(&mut self, unit: u32, texture: GraphicsHandle) -> PipelineResult<()>;

    /// Write a uniform of the bound program
    fn set_uniform(&mut self, slot: i32, value: UniformData<'_>) -> PipelineResult<()>;

    /// Issue an instanced draw with the bound program and vertex array
    fn draw(&mut self, call: &DrawCall) -> PipelineResult<()>;

    /// Delete an object owned by this context
    fn delete(&mut self, handle: GraphicsHandle) -> PipelineResult<()>;
}
