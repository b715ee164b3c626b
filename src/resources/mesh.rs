//! Mesh data structures

use crate::backend::{
    AttribLocation, AttribSpecial, AttribType, DrawMode, GraphicsHandle, VertexAttributeBinding,
};
use crate::error::{PipelineError, PipelineResult};

/// Placement of one attribute inside the interleaved vertex blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub ty: AttribType,
    pub location: AttribLocation,
    /// Byte offset from the start of a vertex
    pub offset: u32,
    /// Component count, 1 to 4
    pub size: u8,
    pub special: AttribSpecial,
}

impl VertexAttribute {
    pub fn float(location: AttribLocation, offset: u32, size: u8) -> Self {
        Self {
            ty: AttribType::Float,
            location,
            offset,
            size,
            special: AttribSpecial::None,
        }
    }

    pub fn binding(&self) -> VertexAttributeBinding {
        VertexAttributeBinding {
            location: self.location,
            components: self.size,
            ty: self.ty,
            offset: self.offset,
            special: self.special,
        }
    }
}

/// Raw index stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexData {
    pub index_type: AttribType,
    pub count: u32,
    pub bytes: Vec<u8>,
}

/// Geometry handed over by a mesh decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshData {
    pub vertices: Vec<u8>,
    pub vertex_stride: u32,
    pub vertex_count: u32,
    pub attributes: Vec<VertexAttribute>,
    pub indices: Option<IndexData>,
}

impl MeshData {
    /// Interleaved float vertices
    pub fn from_floats(vertices: &[f32], floats_per_vertex: u32, attributes: Vec<VertexAttribute>) -> Self {
        let stride = floats_per_vertex * 4;
        Self {
            vertices: bytemuck::cast_slice(vertices).to_vec(),
            vertex_stride: stride,
            vertex_count: vertices.len() as u32 / floats_per_vertex,
            attributes,
            indices: None,
        }
    }

    pub fn with_u16_indices(mut self, indices: &[u16]) -> Self {
        self.indices = Some(IndexData {
            index_type: AttribType::UShort,
            count: indices.len() as u32,
            bytes: bytemuck::cast_slice(indices).to_vec(),
        });
        self
    }

    pub fn has_attribute(&self, location: AttribLocation) -> bool {
        self.attributes.iter().any(|a| a.location == location)
    }

    pub fn draw_mode(&self) -> DrawMode {
        match &self.indices {
            Some(indices) => DrawMode::Indexed {
                index_count: indices.count,
                index_type: indices.index_type,
            },
            None => DrawMode::Arrays {
                vertex_count: self.vertex_count,
            },
        }
    }

    /// Reject blobs whose sizes or attribute layout do not add up
    pub fn validate(&self) -> PipelineResult<()> {
        if self.vertex_stride == 0 {
            return Err(PipelineError::InvalidMesh("zero vertex stride".into()));
        }
        let expected = self.vertex_count as usize * self.vertex_stride as usize;
        if self.vertices.len() != expected {
            return Err(PipelineError::InvalidMesh(format!(
                "vertex blob is {} bytes, expected {expected}",
                self.vertices.len()
            )));
        }
        for attribute in &self.attributes {
            if !(1..=4).contains(&attribute.size) {
                return Err(PipelineError::InvalidMesh(format!(
                    "attribute {} has {} components",
                    attribute.location.index(),
                    attribute.size
                )));
            }
            let end = u64::from(attribute.offset)
                + u64::from(attribute.size) * u64::from(attribute.ty.byte_size());
            if end > u64::from(self.vertex_stride) {
                return Err(PipelineError::InvalidMesh(format!(
                    "attribute {} ends past the vertex stride",
                    attribute.location.index()
                )));
            }
            if attribute.special == AttribSpecial::Integer && !attribute.ty.is_integer() {
                return Err(PipelineError::InvalidMesh(
                    "can't create an integer attribute from a float value".into(),
                ));
            }
        }
        if let Some(indices) = &self.indices {
            if !indices.index_type.is_index_type() {
                return Err(PipelineError::InvalidMesh(
                    "only UByte, UShort, and UInt are allowed index types".into(),
                ));
            }
            let expected = indices.count as usize * indices.index_type.byte_size() as usize;
            if indices.bytes.len() != expected {
                return Err(PipelineError::InvalidMesh(format!(
                    "index block is {} bytes, expected {expected}",
                    indices.bytes.len()
                )));
            }
        }
        Ok(())
    }
}

/// Buffers uploaded for a mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuMeshBuffers {
    pub vertex: GraphicsHandle,
    pub index: Option<GraphicsHandle>,
    /// Created on the main context by the finalize step
    pub vertex_array: Option<GraphicsHandle>,
}

/// Cached mesh; draw-ready once uploaded and finalized
#[derive(Debug, Default)]
pub struct MeshResource {
    pub data: Option<MeshData>,
    pub buffers: Option<GpuMeshBuffers>,
    pub finalize_pending: bool,
    /// The decoder failed and the missing-mesh cube was used instead
    pub substituted: bool,
}

impl MeshResource {
    pub fn with_data(data: MeshData) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn vertex_array(&self) -> Option<GraphicsHandle> {
        self.buffers.and_then(|b| b.vertex_array)
    }

    pub fn is_draw_ready(&self) -> bool {
        !self.finalize_pending && self.vertex_array().is_some()
    }

    pub fn draw_mode(&self) -> Option<DrawMode> {
        self.data.as_ref().map(MeshData::draw_mode)
    }
}
