//! Asset sources the loader reads from
//!
//! Decoding lives behind small traits so the loader can run against the
//! file system or in-memory tables.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::LoadError;
use crate::resources::{sbm, ImageData, MeshData};
use crate::PipelineConfig;

/// Decodes texture files into pixel data
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, path: &str) -> Result<ImageData, LoadError>;
}

/// Decodes named meshes
pub trait MeshDecoder: Send + Sync {
    fn decode(&self, name: &str) -> Result<MeshData, LoadError>;
}

/// Reads shader source files
pub trait ShaderSourceLoader: Send + Sync {
    fn load(&self, path: &str) -> Result<String, LoadError>;
}

fn read_file(path: &Path) -> Result<Vec<u8>, LoadError> {
    fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => LoadError::NotFound(path.display().to_string()),
        _ => LoadError::Decode {
            path: path.display().to_string(),
            reason: e.to_string(),
        },
    })
}

/// Image files under a texture directory
#[derive(Debug, Clone)]
pub struct FileImageDecoder {
    root: PathBuf,
}

impl FileImageDecoder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ImageDecoder for FileImageDecoder {
    fn decode(&self, path: &str) -> Result<ImageData, LoadError> {
        ImageData::from_file(self.root.join(path))
    }
}

/// `<root>/<name>.sbm` files
#[derive(Debug, Clone)]
pub struct SbmFileDecoder {
    root: PathBuf,
}

impl SbmFileDecoder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl MeshDecoder for SbmFileDecoder {
    fn decode(&self, name: &str) -> Result<MeshData, LoadError> {
        let path = self.root.join(format!("{name}.sbm"));
        let bytes = read_file(&path)?;
        sbm::decode(&path.display().to_string(), &bytes)
    }
}

/// Shader sources under a shader directory
#[derive(Debug, Clone)]
pub struct FileShaderLoader {
    root: PathBuf,
}

impl FileShaderLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ShaderSourceLoader for FileShaderLoader {
    fn load(&self, path: &str) -> Result<String, LoadError> {
        let path = self.root.join(path);
        let bytes = read_file(&path)?;
        String::from_utf8(bytes).map_err(|e| LoadError::Decode {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

enum MemoryImage {
    Decoded(ImageData),
    Encoded(Vec<u8>),
}

enum MemoryMesh {
    Decoded(MeshData),
    Sbm(Vec<u8>),
}

/// In-memory asset tables; entries may be replaced at any time
#[derive(Default)]
pub struct MemorySource {
    images: RwLock<HashMap<String, MemoryImage>>,
    meshes: RwLock<HashMap<String, MemoryMesh>>,
    shaders: RwLock<HashMap<String, String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_image(&self, path: &str, image: ImageData) {
        self.images
            .write()
            .insert(path.to_string(), MemoryImage::Decoded(image));
    }

    /// Image file contents, decoded on load
    pub fn insert_image_bytes(&self, path: &str, bytes: Vec<u8>) {
        self.images
            .write()
            .insert(path.to_string(), MemoryImage::Encoded(bytes));
    }

    pub fn insert_mesh(&self, name: &str, mesh: MeshData) {
        self.meshes
            .write()
            .insert(name.to_string(), MemoryMesh::Decoded(mesh));
    }

    /// SBM file contents, decoded on load
    pub fn insert_sbm(&self, name: &str, bytes: Vec<u8>) {
        self.meshes
            .write()
            .insert(name.to_string(), MemoryMesh::Sbm(bytes));
    }

    pub fn insert_shader(&self, path: &str, source: &str) {
        self.shaders
            .write()
            .insert(path.to_string(), source.to_string());
    }
}

impl ImageDecoder for MemorySource {
    fn decode(&self, path: &str) -> Result<ImageData, LoadError> {
        match self.images.read().get(path) {
            Some(MemoryImage::Decoded(image)) => Ok(image.clone()),
            Some(MemoryImage::Encoded(bytes)) => ImageData::from_bytes(bytes, path),
            None => Err(LoadError::NotFound(path.to_string())),
        }
    }
}

impl MeshDecoder for MemorySource {
    fn decode(&self, name: &str) -> Result<MeshData, LoadError> {
        match self.meshes.read().get(name) {
            Some(MemoryMesh::Decoded(mesh)) => Ok(mesh.clone()),
            Some(MemoryMesh::Sbm(bytes)) => sbm::decode(name, bytes),
            None => Err(LoadError::NotFound(name.to_string())),
        }
    }
}

impl ShaderSourceLoader for MemorySource {
    fn load(&self, path: &str) -> Result<String, LoadError> {
        self.shaders
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(path.to_string()))
    }
}

/// The decoders a loader reads assets through
#[derive(Clone)]
pub struct AssetSources {
    pub images: Arc<dyn ImageDecoder>,
    pub meshes: Arc<dyn MeshDecoder>,
    pub shaders: Arc<dyn ShaderSourceLoader>,
}

impl AssetSources {
    /// File system sources rooted at the configured asset directories
    pub fn from_config(config: &PipelineConfig) -> Self {
        let root = &config.asset_root;
        Self {
            images: Arc::new(FileImageDecoder::new(root.join(&config.texture_dir))),
            meshes: Arc::new(SbmFileDecoder::new(root.join(&config.mesh_dir))),
            shaders: Arc::new(FileShaderLoader::new(root.join(&config.shader_dir))),
        }
    }

    /// Serve every asset class from one memory source
    pub fn memory(source: Arc<MemorySource>) -> Self {
        Self {
            images: source.clone(),
            meshes: source.clone(),
            shaders: source,
        }
    }
}
