//! SBM binary mesh format
//!
//! Little-endian layout:
//!
//! ```text
//! header      magic "SBM1", vertex_count u32, attrib_count u32,
//!             vertex_stride u32, flags u32
//! vertices    vertex_count * vertex_stride bytes
//! indices     (HAS_INDICES only) count u32, index_type u32, bytes
//! attributes  attrib_count * { type u8, semantic u8, size|flags u8,
//!             reserved u8, byte_offset u32 }
//! ```
//!
//! The size byte holds the component count in bits 0-2, the normalized
//! flag in bit 4 and the integer flag in bit 5.

use std::mem::size_of;

use bytemuck::{Pod, Zeroable};

use crate::backend::{AttribLocation, AttribSpecial, AttribType};
use crate::error::LoadError;
use crate::resources::mesh::{IndexData, MeshData, VertexAttribute};

pub const MAGIC: [u8; 4] = *b"SBM1";

pub const FLAG_HAS_INDICES: u32 = 1 << 0;
pub const FLAG_COMPUTE_NORMALS: u32 = 1 << 1;
pub const FLAG_COMPUTE_TANGENTS: u32 = 1 << 2;

const SIZE_MASK: u8 = 0x07;
const NORMALIZED_BIT: u8 = 1 << 4;
const INTEGER_BIT: u8 = 1 << 5;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Header {
    magic: [u8; 4],
    vertex_count: u32,
    attrib_count: u32,
    vertex_stride: u32,
    flags: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct IndexHeader {
    count: u32,
    index_type: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct AttribDesc {
    ty: u8,
    semantic: u8,
    packed: u8,
    reserved: u8,
    offset: u32,
}

struct Reader<'a> {
    name: &'a str,
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn error(&self, reason: impl Into<String>) -> LoadError {
        LoadError::Decode {
            path: self.name.to_string(),
            reason: reason.into(),
        }
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], LoadError> {
        if self.bytes.len() < len {
            return Err(self.error(format!("truncated {what}")));
        }
        let (head, rest) = self.bytes.split_at(len);
        self.bytes = rest;
        Ok(head)
    }

    fn read<T: Pod>(&mut self, what: &str) -> Result<T, LoadError> {
        let bytes = self.take(size_of::<T>(), what)?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }
}

/// Decode an SBM file
pub fn decode(name: &str, bytes: &[u8]) -> Result<MeshData, LoadError> {
    let mut reader = Reader { name, bytes };
    let header: Header = reader.read("header")?;
    if header.magic != MAGIC {
        return Err(reader.error("bad magic"));
    }
    let flags = u32::from_le(header.flags);
    if flags & (FLAG_COMPUTE_NORMALS | FLAG_COMPUTE_TANGENTS) != 0 {
        return Err(LoadError::Unsupported(format!(
            "{name}: runtime normal/tangent generation"
        )));
    }

    let vertex_count = u32::from_le(header.vertex_count);
    let vertex_stride = u32::from_le(header.vertex_stride);
    let blob_len = (vertex_count as usize)
        .checked_mul(vertex_stride as usize)
        .ok_or_else(|| reader.error("vertex blob size overflows"))?;
    let vertices = reader.take(blob_len, "vertex blob")?.to_vec();

    let indices = if flags & FLAG_HAS_INDICES != 0 {
        let index_header: IndexHeader = reader.read("index header")?;
        let count = u32::from_le(index_header.count);
        let index_type = AttribType::from_code(u32::from_le(index_header.index_type))
            .filter(AttribType::is_index_type)
            .ok_or_else(|| reader.error("invalid index type"))?;
        let len = count as usize * index_type.byte_size() as usize;
        let bytes = reader.take(len, "index block")?.to_vec();
        Some(IndexData {
            index_type,
            count,
            bytes,
        })
    } else {
        None
    };

    let attrib_count = u32::from_le(header.attrib_count);
    let descriptor_bytes = (attrib_count as usize).saturating_mul(size_of::<AttribDesc>());
    if descriptor_bytes > reader.bytes.len() {
        return Err(reader.error(format!(
            "{attrib_count} attribute descriptors need {descriptor_bytes} bytes, {} left",
            reader.bytes.len()
        )));
    }
    let mut attributes = Vec::with_capacity(attrib_count as usize);
    for _ in 0..attrib_count {
        let desc: AttribDesc = reader.read("attribute descriptor")?;
        let ty = AttribType::from_code(desc.ty as u32)
            .ok_or_else(|| reader.error(format!("unknown attribute type {}", desc.ty)))?;
        let special = match (desc.packed & NORMALIZED_BIT != 0, desc.packed & INTEGER_BIT != 0) {
            (false, false) => AttribSpecial::None,
            (true, false) => AttribSpecial::Normalize,
            (false, true) => AttribSpecial::Integer,
            (true, true) => return Err(reader.error("attribute both normalized and integer")),
        };
        attributes.push(VertexAttribute {
            ty,
            location: AttribLocation(desc.semantic as u32),
            offset: u32::from_le(desc.offset),
            size: desc.packed & SIZE_MASK,
            special,
        });
    }
    if !reader.bytes.is_empty() {
        return Err(reader.error(format!("{} trailing bytes", reader.bytes.len())));
    }

    let mesh = MeshData {
        vertices,
        vertex_stride,
        vertex_count,
        attributes,
        indices,
    };
    mesh.validate().map_err(|e| reader.error(e.to_string()))?;
    Ok(mesh)
}

/// Encode a mesh as SBM
pub fn encode(mesh: &MeshData) -> Vec<u8> {
    let flags = if mesh.indices.is_some() {
        FLAG_HAS_INDICES
    } else {
        0
    };
    let header = Header {
        magic: MAGIC,
        vertex_count: mesh.vertex_count.to_le(),
        attrib_count: (mesh.attributes.len() as u32).to_le(),
        vertex_stride: mesh.vertex_stride.to_le(),
        flags: flags.to_le(),
    };

    let mut out = Vec::new();
    out.extend_from_slice(bytemuck::bytes_of(&header));
    out.extend_from_slice(&mesh.vertices);
    if let Some(indices) = &mesh.indices {
        let index_header = IndexHeader {
            count: indices.count.to_le(),
            index_type: (indices.index_type.code() as u32).to_le(),
        };
        out.extend_from_slice(bytemuck::bytes_of(&index_header));
        out.extend_from_slice(&indices.bytes);
    }
    for attribute in &mesh.attributes {
        let special = match attribute.special {
            AttribSpecial::None => 0,
            AttribSpecial::Normalize => NORMALIZED_BIT,
            AttribSpecial::Integer => INTEGER_BIT,
        };
        let desc = AttribDesc {
            ty: attribute.ty.code(),
            semantic: attribute.location.index() as u8,
            packed: (attribute.size & SIZE_MASK) | special,
            reserved: 0,
            offset: attribute.offset.to_le(),
        };
        out.extend_from_slice(bytemuck::bytes_of(&desc));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::builtins;

    #[test]
    fn test_round_trip_preserves_layout() {
        for mesh in [builtins::quad_mesh(), builtins::missing_mesh()] {
            let decoded = decode("builtin", &encode(&mesh)).unwrap();
            assert_eq!(decoded.vertex_count, mesh.vertex_count);
            assert_eq!(decoded.vertex_stride, mesh.vertex_stride);
            assert_eq!(decoded.attributes, mesh.attributes);
            assert_eq!(
                decoded.indices.as_ref().map(|i| &i.bytes),
                mesh.indices.as_ref().map(|i| &i.bytes)
            );
            assert_eq!(decoded, mesh);
        }
    }

    #[test]
    fn test_round_trip_keeps_attribute_flags() {
        let mut mesh = builtins::quad_mesh();
        mesh.vertex_stride = 24;
        mesh.vertices = vec![0; 6 * 24];
        mesh.attributes.push(VertexAttribute {
            ty: AttribType::UByte,
            location: AttribLocation::SKIN_IDX,
            offset: 20,
            size: 4,
            special: AttribSpecial::Integer,
        });
        mesh.attributes[1].special = AttribSpecial::Normalize;

        let decoded = decode("flags", &encode(&mesh)).unwrap();
        assert_eq!(decoded.attributes, mesh.attributes);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = encode(&builtins::quad_mesh());
        bytes[0] = b'X';
        assert!(matches!(decode("bad", &bytes), Err(LoadError::Decode { .. })));
    }

    #[test]
    fn test_computed_normals_unsupported() {
        let mut bytes = encode(&builtins::quad_mesh());
        bytes[16] |= FLAG_COMPUTE_NORMALS as u8;
        assert!(matches!(decode("normals", &bytes), Err(LoadError::Unsupported(_))));
    }

    fn header_bytes(vertex_count: u32, attrib_count: u32, stride: u32) -> Vec<u8> {
        let header = Header {
            magic: MAGIC,
            vertex_count: vertex_count.to_le(),
            attrib_count: attrib_count.to_le(),
            vertex_stride: stride.to_le(),
            flags: 0,
        };
        bytemuck::bytes_of(&header).to_vec()
    }

    #[test]
    fn test_huge_attribute_count_is_rejected() {
        let bytes = header_bytes(0, u32::MAX, 12);
        let err = decode("huge", &bytes).unwrap_err();
        assert!(matches!(err, LoadError::Decode { reason, .. } if reason.contains("descriptors")));
    }

    #[test]
    fn test_attribute_offset_past_stride_is_rejected() {
        let mut mesh = builtins::quad_mesh();
        mesh.attributes[0].offset = u32::MAX - 2;
        let err = decode("offset", &encode(&mesh)).unwrap_err();
        assert!(matches!(err, LoadError::Decode { reason, .. } if reason.contains("stride")));
    }

    #[test]
    fn test_rejects_truncated_file() {
        let bytes = encode(&builtins::missing_mesh());
        let err = decode("short", &bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, LoadError::Decode { reason, .. } if reason.contains("truncated")));
    }
}
