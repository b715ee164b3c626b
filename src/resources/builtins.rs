//! Builtin resources available before any asset is loaded
//!
//! These are registered pinned at loader startup and double as the
//! substitutes for assets that fail to decode.

use glam::{Vec2, Vec3};

use crate::backend::AttribLocation;
use crate::resources::material::{MaterialDef, UniformDef, UniformType};
use crate::resources::mesh::{MeshData, VertexAttribute};
use crate::resources::shader::ShaderKey;
use crate::resources::texture::ImageData;

/// Full-screen quad, two triangles
pub const QUAD_MESH: &str = "__quad__";
/// Substitute for meshes that fail to decode
pub const MISSING_MESH: &str = "__missing__";
/// Substitute for textures that fail to decode
pub const MISSING_TEXTURE: &str = "__MISSING__";
/// Material built from `guiview` shaders sampling the missing texture
pub const MISSING_MATERIAL: &str = "__MISSING__";

/// Position and texcoord, 20 bytes per vertex
fn position_uv_layout() -> Vec<VertexAttribute> {
    vec![
        VertexAttribute::float(AttribLocation::POS, 0, 3),
        VertexAttribute::float(AttribLocation::TE0, 12, 2),
    ]
}

pub fn quad_mesh() -> MeshData {
    #[rustfmt::skip]
    let vertices: [f32; 30] = [
        -1.0, -1.0, 0.0,  0.0, 0.0,
         1.0, -1.0, 0.0,  1.0, 0.0,
         1.0,  1.0, 0.0,  1.0, 1.0,
        -1.0, -1.0, 0.0,  0.0, 0.0,
         1.0,  1.0, 0.0,  1.0, 1.0,
        -1.0,  1.0, 0.0,  0.0, 1.0,
    ];
    MeshData::from_floats(&vertices, 5, position_uv_layout())
}

/// Unit cube centered at the origin, four vertices per face
pub fn missing_mesh() -> MeshData {
    let faces = [
        (Vec3::Z, Vec3::X),
        (-Vec3::Z, -Vec3::X),
        (Vec3::X, -Vec3::Z),
        (-Vec3::X, Vec3::Z),
        (Vec3::Y, Vec3::X),
        (-Vec3::Y, Vec3::X),
    ];
    let corners = [
        Vec2::new(0.0, 1.0),
        Vec2::new(1.0, 1.0),
        Vec2::new(1.0, 0.0),
        Vec2::new(0.0, 0.0),
    ];

    let mut vertices = Vec::with_capacity(24 * 5);
    let mut indices = Vec::with_capacity(36);
    for (face, (normal, right)) in faces.into_iter().enumerate() {
        let up = normal.cross(right);
        for uv in corners {
            let position = (normal + right * (uv.x * 2.0 - 1.0) - up * (uv.y * 2.0 - 1.0)) * 0.5;
            vertices.extend_from_slice(&position.to_array());
            vertices.extend_from_slice(&uv.to_array());
        }
        let base = face as u16 * 4;
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    MeshData::from_floats(&vertices, 5, position_uv_layout()).with_u16_indices(&indices)
}

/// 2x2 magenta and black checker
pub fn missing_texture() -> ImageData {
    ImageData::checkerboard(2, 1, [255, 0, 255, 255], [0, 0, 0, 255])
}

pub fn missing_material() -> MaterialDef {
    MaterialDef::new(ShaderKey::new("guiview", "guiview"))
        .with_uniform("modelview", UniformDef::new(UniformType::ModelView))
        .with_uniform("projection", UniformDef::new(UniformType::Projection))
        .with_uniform("guitex", UniformDef::texture(MISSING_TEXTURE))
}

/// Builtin meshes in registration order
pub fn meshes() -> [(&'static str, MeshData); 2] {
    [(QUAD_MESH, quad_mesh()), (MISSING_MESH, missing_mesh())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AttribType, DrawMode};

    #[test]
    fn test_quad_layout() {
        let quad = quad_mesh();
        assert_eq!(quad.vertex_count, 6);
        assert_eq!(quad.vertex_stride, 20);
        assert_eq!(quad.vertices.len(), 120);
        assert_eq!(quad.draw_mode(), DrawMode::Arrays { vertex_count: 6 });
        assert!(quad.validate().is_ok());
    }

    #[test]
    fn test_missing_cube_layout() {
        let cube = missing_mesh();
        assert_eq!(cube.vertex_count, 24);
        assert_eq!(cube.vertices.len(), 480);
        assert_eq!(
            cube.draw_mode(),
            DrawMode::Indexed {
                index_count: 36,
                index_type: AttribType::UShort
            }
        );
        assert!(cube.validate().is_ok());

        let floats: Vec<f32> = bytemuck::pod_collect_to_vec(&cube.vertices);
        for vertex in floats.chunks(5) {
            assert!(vertex[..3].iter().all(|c| c.abs() == 0.5));
        }
    }

    #[test]
    fn test_missing_texture_is_nearest_checker() {
        let tex = missing_texture();
        assert_eq!((tex.width, tex.height), (2, 2));
        assert_eq!(&tex.pixels[..4], &[255, 0, 255, 255]);
        assert_eq!(&tex.pixels[4..8], &[0, 0, 0, 255]);
    }

    #[test]
    fn test_missing_material_uses_placeholder() {
        let def = missing_material();
        assert_eq!(def.shaders, ShaderKey::new("guiview", "guiview"));
        assert_eq!(def.uniforms["guitex"], UniformDef::texture(MISSING_TEXTURE));
        assert_eq!(def.uniforms["projection"].ty, UniformType::Projection);
    }
}
