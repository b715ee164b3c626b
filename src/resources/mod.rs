//! Resource management
//!
//! Cached resource payloads, the refcounted cache that owns them, the SBM
//! mesh codec and the builtin resources.

pub mod builtins;
mod cache;
mod material;
mod mesh;
pub mod sbm;
mod shader;
mod texture;

pub use cache::*;
pub use material::*;
pub use mesh::*;
pub use shader::*;
pub use texture::*;
