//! Material definitions and built material instances

use std::collections::BTreeMap;

use glam::{Mat4, Vec3};

use crate::resources::cache::Handle;
use crate::resources::shader::{ProgramObject, ShaderKey};
use crate::resources::texture::TextureResource;

/// Semantic of a material uniform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformType {
    Texture,
    ModelView,
    Projection,
    DepthInfo,
    LightColor,
    LightRadius,
    LightPosition,
    BoneMatrices,
}

impl UniformType {
    /// Uniforms filled from the instance list at draw time
    pub fn is_per_instance(&self) -> bool {
        matches!(self, UniformType::ModelView | UniformType::BoneMatrices)
    }

    /// Recognized semantics the batcher cannot supply yet
    pub fn is_unimplemented(&self) -> bool {
        matches!(
            self,
            UniformType::DepthInfo
                | UniformType::LightColor
                | UniformType::LightRadius
                | UniformType::LightPosition
        )
    }
}

/// Literal value attached to a uniform definition
#[derive(Debug, Clone, PartialEq)]
pub enum UniformLiteral {
    TexturePath(String),
    Matrix4(Mat4),
    Vec3(Vec3),
    Scalar(f32),
}

/// One named uniform of a material definition
#[derive(Debug, Clone, PartialEq)]
pub struct UniformDef {
    pub ty: UniformType,
    pub value: Option<UniformLiteral>,
}

impl UniformDef {
    pub fn new(ty: UniformType) -> Self {
        Self { ty, value: None }
    }

    pub fn texture(path: &str) -> Self {
        Self {
            ty: UniformType::Texture,
            value: Some(UniformLiteral::TexturePath(path.to_string())),
        }
    }

    pub fn with_value(mut self, value: UniformLiteral) -> Self {
        self.value = Some(value);
        self
    }
}

/// Material definition registered by the scripting layer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MaterialDef {
    pub shaders: ShaderKey,
    /// Ordered by name so rebuilds resolve bindings in a stable order
    pub uniforms: BTreeMap<String, UniformDef>,
}

impl MaterialDef {
    pub fn new(shaders: ShaderKey) -> Self {
        Self {
            shaders,
            uniforms: BTreeMap::new(),
        }
    }

    pub fn with_uniform(mut self, name: &str, def: UniformDef) -> Self {
        self.uniforms.insert(name.to_string(), def);
        self
    }
}

/// Resolved value of a uniform binding
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Texture(Handle<TextureResource>),
    Matrix4(Mat4),
    Vec3(Vec3),
    Scalar(f32),
    BoneArray(Vec<Mat4>),
}

impl UniformLiteral {
    /// Build-time value; texture paths resolve through the loader instead
    pub fn into_value(self) -> Option<UniformValue> {
        match self {
            UniformLiteral::TexturePath(_) => None,
            UniformLiteral::Matrix4(m) => Some(UniformValue::Matrix4(m)),
            UniformLiteral::Vec3(v) => Some(UniformValue::Vec3(v)),
            UniformLiteral::Scalar(s) => Some(UniformValue::Scalar(s)),
        }
    }
}

/// A uniform present in the linked program
#[derive(Debug, Clone, PartialEq)]
pub struct UniformBinding {
    pub name: String,
    pub slot: i32,
    pub ty: UniformType,
    /// `None` for values supplied per draw
    pub value: Option<UniformValue>,
}

/// A built material; rebuilt in place when its definition changes
#[derive(Debug, Default)]
pub struct MaterialInstance {
    pub program: Option<Handle<ProgramObject>>,
    pub uniforms: Vec<UniformBinding>,
    /// Number of successful builds
    pub generation: u32,
}

impl MaterialInstance {
    pub fn is_ready(&self) -> bool {
        self.program
            .as_ref()
            .is_some_and(|program| program.read().is_linked())
    }

    pub fn binding(&self, name: &str) -> Option<&UniformBinding> {
        self.uniforms.iter().find(|b| b.name == name)
    }
}
