//! Pipeline error types.

use std::panic::Location;

use thiserror::Error;

use crate::backend::{FramebufferStatus, GraphicsHandle, ShaderStage};
use crate::pipeline::{PanelId, RenderPass, RenderTargetId};
use crate::resources::UniformType;

/// Native graphics API error codes.
pub mod api_error {
    pub const INVALID_ENUM: u32 = 0x0500;
    pub const INVALID_VALUE: u32 = 0x0501;
    pub const INVALID_OPERATION: u32 = 0x0502;
    pub const STACK_OVERFLOW: u32 = 0x0503;
    pub const STACK_UNDERFLOW: u32 = 0x0504;
    pub const OUT_OF_MEMORY: u32 = 0x0505;
    pub const INVALID_FRAMEBUFFER_OPERATION: u32 = 0x0506;

    pub fn describe(code: u32) -> &'static str {
        match code {
            INVALID_ENUM => "Invalid Enum",
            INVALID_VALUE => "Invalid Value",
            INVALID_OPERATION => "Invalid Operation",
            STACK_OVERFLOW => "Stack Overflow",
            STACK_UNDERFLOW => "Stack Underflow",
            OUT_OF_MEMORY => "Out of Memory",
            INVALID_FRAMEBUFFER_OPERATION => "Invalid Framebuffer Operation",
            _ => "Unknown Error",
        }
    }
}

/// Errors raised while building resources or rendering.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("{} ({code:#06x}) at {location}", api_error::describe(*.code))]
    GraphicsApi {
        code: u32,
        location: &'static Location<'static>,
    },
    #[error("Framebuffer incomplete: {} at {location}", .status.describe())]
    FramebufferIncomplete {
        status: FramebufferStatus,
        location: &'static Location<'static>,
    },
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),
    #[error("Error compiling {stage:?} shader {name}:\n{log}")]
    Compile {
        name: String,
        stage: ShaderStage,
        log: String,
    },
    #[error("Error linking program:\n{log}")]
    Link { log: String },
    #[error("Uniform type {0:?} is not implemented")]
    UnimplementedUniform(UniformType),
    #[error("Invalid mesh data: {0}")]
    InvalidMesh(String),
    #[error("Failed to decode {path}: {reason}")]
    Decode { path: String, reason: String },
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("Graphics context error: {0}")]
    Context(String),
    #[error("Render pass {0:?} is reserved for the pipeline")]
    ReservedPass(RenderPass),
    #[error("Invalid handle {0:?}")]
    InvalidHandle(GraphicsHandle),
    #[error("Unknown render target {0:?}")]
    UnknownRenderTarget(RenderTargetId),
    #[error("Unknown panel {0:?}")]
    UnknownPanel(PanelId),
    #[error("Loader thread failed to start: {0}")]
    LoaderStartup(Box<PipelineError>),
    #[error("Pipeline is shutting down")]
    ShuttingDown,
}

impl PipelineError {
    /// Graphics API error at the caller's location
    #[track_caller]
    pub fn api(code: u32) -> Self {
        PipelineError::GraphicsApi {
            code,
            location: Location::caller(),
        }
    }

    /// Framebuffer completeness error at the caller's location
    #[track_caller]
    pub fn incomplete(status: FramebufferStatus) -> Self {
        PipelineError::FramebufferIncomplete {
            status,
            location: Location::caller(),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Failure reported by an asset decoder or source loader
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("failed to decode {path}: {reason}")]
    Decode { path: String, reason: String },
    #[error("unsupported data: {0}")]
    Unsupported(String),
}

impl From<LoadError> for PipelineError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::NotFound(path) => PipelineError::ResourceNotFound(path),
            LoadError::Decode { path, reason } => PipelineError::Decode { path, reason },
            LoadError::Unsupported(what) => PipelineError::Unsupported(what),
        }
    }
}
