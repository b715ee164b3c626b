//! Common types shared between graphics contexts

use glam::{Mat4, Vec3};

/// Pipeline stage a shader object is compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
}

impl ShaderStage {
    /// File suffix used when resolving shader source for this stage
    pub fn file_suffix(&self) -> &'static str {
        match self {
            ShaderStage::Vertex => ".vs",
            ShaderStage::Fragment => ".fs",
            ShaderStage::Geometry => ".gs",
        }
    }
}

/// Component type of a vertex attribute or an index stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AttribType {
    Byte = 0,
    UByte = 1,
    Short = 2,
    UShort = 3,
    Int = 4,
    UInt = 5,
    Float = 6,
    Half = 7,
    Double = 8,
}

impl AttribType {
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => AttribType::Byte,
            1 => AttribType::UByte,
            2 => AttribType::Short,
            3 => AttribType::UShort,
            4 => AttribType::Int,
            5 => AttribType::UInt,
            6 => AttribType::Float,
            7 => AttribType::Half,
            8 => AttribType::Double,
            _ => return None,
        })
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn byte_size(&self) -> u32 {
        match self {
            AttribType::Byte | AttribType::UByte => 1,
            AttribType::Short | AttribType::UShort | AttribType::Half => 2,
            AttribType::Int | AttribType::UInt | AttribType::Float => 4,
            AttribType::Double => 8,
        }
    }

    pub fn is_integer(&self) -> bool {
        !matches!(
            self,
            AttribType::Float | AttribType::Half | AttribType::Double
        )
    }

    /// Only unsigned byte, short and int are valid index types
    pub fn is_index_type(&self) -> bool {
        matches!(self, AttribType::UByte | AttribType::UShort | AttribType::UInt)
    }
}

/// Shader input location of a vertex attribute.
///
/// The first eight locations carry fixed semantics; anything from
/// [`AttribLocation::USER_START`] upwards is free for custom streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttribLocation(pub u32);

impl AttribLocation {
    pub const POS: Self = Self(0);
    pub const NOR: Self = Self(1);
    pub const TAN: Self = Self(2);
    pub const COL: Self = Self(3);
    pub const TE0: Self = Self(4);
    pub const TE1: Self = Self(5);
    pub const SKIN_IDX: Self = Self(6);
    pub const SKIN_WEIGHT: Self = Self(7);
    pub const USER_START: Self = Self(8);

    /// Locations that receive a default value when a mesh omits them
    pub const BUILTIN: [Self; 8] = [
        Self::POS,
        Self::NOR,
        Self::TAN,
        Self::COL,
        Self::TE0,
        Self::TE1,
        Self::SKIN_IDX,
        Self::SKIN_WEIGHT,
    ];

    pub fn index(&self) -> u32 {
        self.0
    }

    /// Value a shader reads for this location when no stream is bound
    pub fn default_value(&self) -> Option<DefaultAttribute> {
        Some(match *self {
            Self::POS => DefaultAttribute::Float([0.0, 0.0, 0.0, 1.0]),
            Self::NOR => DefaultAttribute::Float([0.0, 0.0, 1.0, 1.0]),
            Self::TAN => DefaultAttribute::Float([0.0, 1.0, 0.0, 1.0]),
            Self::COL => DefaultAttribute::Float([1.0, 1.0, 1.0, 1.0]),
            Self::TE0 | Self::TE1 => DefaultAttribute::Float([0.0, 0.0, 0.0, 1.0]),
            Self::SKIN_IDX => DefaultAttribute::Int([0, 0, 0, 0]),
            Self::SKIN_WEIGHT => DefaultAttribute::Float([0.0, 0.0, 0.0, 0.0]),
            _ => return None,
        })
    }
}

/// Constant attribute value used for locations without a bound stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultAttribute {
    Float([f32; 4]),
    Int([i32; 4]),
}

/// How attribute components reach the shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AttribSpecial {
    #[default]
    None,
    Normalize,
    Integer,
}

/// Pixel layout of uploaded image data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    R8,
    Rg8,
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    pub fn from_channels(channels: u8) -> Option<Self> {
        match channels {
            1 => Some(PixelFormat::R8),
            2 => Some(PixelFormat::Rg8),
            3 => Some(PixelFormat::Rgb8),
            4 => Some(PixelFormat::Rgba8),
            _ => None,
        }
    }

    pub fn channels(&self) -> u32 {
        match self {
            PixelFormat::R8 => 1,
            PixelFormat::Rg8 => 2,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }
}

/// Internal format of render target attachments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentFormat {
    Depth24Stencil8,
    Rgba8,
    Rg16Float,
    Rgba16Float,
}

impl AttachmentFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, AttachmentFormat::Depth24Stencil8)
    }
}

/// Framebuffer attachment point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentPoint {
    Color(u32),
    DepthStencil,
}

/// Result of a framebuffer completeness check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramebufferStatus {
    Complete,
    IncompleteAttachment,
    MissingAttachment,
    IncompleteDrawBuffer,
    IncompleteReadBuffer,
    IncompleteMultisample,
    Unsupported,
}

impl FramebufferStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, FramebufferStatus::Complete)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            FramebufferStatus::Complete => "Complete",
            FramebufferStatus::IncompleteAttachment => "Incomplete Attachment",
            FramebufferStatus::MissingAttachment => "Missing Attachment",
            FramebufferStatus::IncompleteDrawBuffer => "Incomplete Draw Buffer",
            FramebufferStatus::IncompleteReadBuffer => "Incomplete Read Buffer",
            FramebufferStatus::IncompleteMultisample => "Incomplete Multisample",
            FramebufferStatus::Unsupported => "Unsupported",
        }
    }
}

/// Texture filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

/// Buffer binding target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
}

/// Framebuffer clear flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearFlags(u32);

impl ClearFlags {
    pub const COLOR: Self = Self(1 << 0);
    pub const DEPTH: Self = Self(1 << 1);
    pub const STENCIL: Self = Self(1 << 2);
    pub const ALL: Self = Self(0x7);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for ClearFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Geometry submission mode of a draw call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawMode {
    Arrays { vertex_count: u32 },
    Indexed { index_count: u32, index_type: AttribType },
}

/// An instanced triangle-list draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCall {
    pub mode: DrawMode,
    pub instances: u32,
}

/// Raw uniform upload
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformData<'a> {
    Sampler(i32),
    Matrix4(&'a Mat4),
    Matrix4Array(&'a [Mat4]),
    Vec3(Vec3),
    Scalar(f32),
}
