//! Work items exchanged between the main and loader threads

use std::fmt;

use crate::backend::GraphicsHandle;
use crate::resources::{JobTarget, MaterialInstance, MeshResource, TextureResource};

/// One unit of loader work.
///
/// Every variant that targets a resource holds a [`JobTarget`], so the
/// resource cannot be reclaimed while the job is queued.
pub enum BuildJob {
    /// (Re)build a material from its current definition
    BuildMaterial(JobTarget<MaterialInstance>),
    /// Decode and upload a texture
    LoadTexture(JobTarget<TextureResource>),
    /// Decode a mesh and upload its buffers
    LoadMesh(JobTarget<MeshResource>),
    /// Create the vertex array of an uploaded mesh; main thread only
    FinalizeMesh(JobTarget<MeshResource>),
    /// Delete objects owned by the loader context
    ReleaseHandles(Vec<GraphicsHandle>),
}

impl BuildJob {
    pub fn kind(&self) -> &'static str {
        match self {
            BuildJob::BuildMaterial(_) => "BuildMaterial",
            BuildJob::LoadTexture(_) => "LoadTexture",
            BuildJob::LoadMesh(_) => "LoadMesh",
            BuildJob::FinalizeMesh(_) => "FinalizeMesh",
            BuildJob::ReleaseHandles(_) => "ReleaseHandles",
        }
    }

    /// Name of the targeted resource, if any
    pub fn target_name(&self) -> Option<&str> {
        match self {
            BuildJob::BuildMaterial(target) => Some(target.name()),
            BuildJob::LoadTexture(target) => Some(target.name()),
            BuildJob::LoadMesh(target) | BuildJob::FinalizeMesh(target) => Some(target.name()),
            BuildJob::ReleaseHandles(_) => None,
        }
    }
}

impl fmt::Debug for BuildJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildJob::ReleaseHandles(handles) => write!(f, "ReleaseHandles({})", handles.len()),
            _ => write!(f, "{}({})", self.kind(), self.target_name().unwrap_or_default()),
        }
    }
}
