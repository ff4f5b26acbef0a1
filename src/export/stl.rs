//! Binary STL encoding.

use bytemuck::{Pod, Zeroable};

use super::mesh::TriangleMesh;

const HEADER_LEN: usize = 80;
const HEADER_TEXT: &[u8] = b"citygen binary STL";

/// One facet as laid out on disk.
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C, packed)]
struct StlTriangle {
    normal: [f32; 3],
    vertices: [[f32; 3]; 3],
    attribute_bytes: u16,
}

/// Encode `mesh` as binary STL: 80-byte header, little-endian triangle count,
/// then 50 bytes per facet.
pub fn to_binary_stl(mesh: &TriangleMesh) -> Vec<u8> {
    let records: Vec<StlTriangle> = mesh
        .triangles
        .iter()
        .map(|t| {
            let normal = (t[1] - t[0]).cross(t[2] - t[0]).normalize_or_zero();
            StlTriangle {
                normal: normal.to_array(),
                vertices: [t[0].to_array(), t[1].to_array(), t[2].to_array()],
                attribute_bytes: 0,
            }
        })
        .collect();

    let mut out = Vec::with_capacity(HEADER_LEN + 4 + records.len() * std::mem::size_of::<StlTriangle>());
    out.extend_from_slice(HEADER_TEXT);
    out.resize(HEADER_LEN, 0);
    out.extend_from_slice(&(records.len() as u32).to_le_bytes());
    // Facet fields are written in native order, which is little-endian on every supported target
    out.extend_from_slice(bytemuck::cast_slice(&records));
    out
}
