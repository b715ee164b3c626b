//! Graphics context abstraction layer
//!
//! Provides the context trait, handle and descriptor types, the headless
//! recording device and, with the `gl` feature, an OpenGL backend.

pub mod headless;
pub mod traits;
pub mod types;

#[cfg(feature = "gl")]
pub mod gl;

pub use headless::{
    DrawRecord, HeadlessContext, HeadlessDevice, HeadlessLimits, HeadlessObject, RecordedUniform,
    TextureStorage,
};
pub use traits::*;
pub use types::*;
