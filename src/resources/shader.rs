//! Shader and program resources

use std::fmt;

use crate::backend::{AttribLocation, GraphicsHandle, ShaderStage};
use crate::resources::cache::Handle;

/// Shader file names a program is linked from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ShaderKey {
    pub vert: String,
    pub frag: String,
    pub geom: Option<String>,
}

impl ShaderKey {
    pub fn new(vert: &str, frag: &str) -> Self {
        Self {
            vert: vert.to_string(),
            frag: frag.to_string(),
            geom: None,
        }
    }

    pub fn with_geometry(mut self, geom: &str) -> Self {
        self.geom = Some(geom.to_string());
        self
    }

    /// Stages and source file paths, in attach order
    pub fn sources(&self) -> impl Iterator<Item = (ShaderStage, String)> + '_ {
        [
            (ShaderStage::Vertex, Some(&self.vert)),
            (ShaderStage::Geometry, self.geom.as_ref()),
            (ShaderStage::Fragment, Some(&self.frag)),
        ]
        .into_iter()
        .filter_map(|(stage, name)| name.map(|name| (stage, format!("{name}{}", stage.file_suffix()))))
    }
}

impl fmt::Display for ShaderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.vert, self.frag)?;
        if let Some(geom) = &self.geom {
            write!(f, "+{geom}")?;
        }
        Ok(())
    }
}

/// Cache key of a compiled shader stage
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderSourceKey {
    pub stage: ShaderStage,
    pub path: String,
}

impl fmt::Display for ShaderSourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// A compiled shader stage
#[derive(Debug, Clone, Default)]
pub struct ShaderObject {
    pub handle: Option<GraphicsHandle>,
    pub stage: Option<ShaderStage>,
}

/// A linked program and the shader stages it holds
#[derive(Debug, Default)]
pub struct ProgramObject {
    pub handle: Option<GraphicsHandle>,
    pub shaders: Vec<Handle<ShaderObject>>,
}

impl ProgramObject {
    pub fn is_linked(&self) -> bool {
        self.handle.is_some()
    }
}

/// Preamble prepended to every shader source
pub fn shader_header(max_instances: u32) -> String {
    let inputs = [
        ("POS", AttribLocation::POS),
        ("NOR", AttribLocation::NOR),
        ("TAN", AttribLocation::TAN),
        ("COL", AttribLocation::COL),
        ("TE0", AttribLocation::TE0),
        ("TE1", AttribLocation::TE1),
        ("SKINIDX", AttribLocation::SKIN_IDX),
        ("SKINWEIGHT", AttribLocation::SKIN_WEIGHT),
    ];

    let mut header = String::from(
        "#version 150\n#extension GL_ARB_explicit_attrib_location : require\n",
    );
    header.push_str(&format!("#define LILIUM_MAX_INSTANCES {max_instances}\n"));
    for (name, location) in inputs {
        header.push_str(&format!(
            "#define LILIUM_VERT_INPUT_{name} {}\n",
            location.index()
        ));
    }
    header.push_str("#define LILIUM_FRAG_OUTPUT_COL 0\n");
    header.push_str("#define LILIUM_FRAG_OUTPUT_NOR 1\n\n");
    header
}
