//! Reorganizes source geometry into per-meshlet contiguous buffers.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

use crate::mesh::SourceMesh;
use crate::partition::Partition;

/// Vertex record read by the meshlet expansion shader, 40 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct MeshletVertex {
    /// Object-space position.
    pub position: [f32; 3],
    /// Object-space normal, zero when the source has none.
    pub normal: [f32; 3],
    /// Tangent with handedness in w, zero when the source has none.
    pub tangent: [f32; 4],
}

/// Geometry laid out meshlet by meshlet.
///
/// Vertex `meshlet.vertex_offset + i` is local vertex `i` of that meshlet.
/// Index `meshlet.triangle_offset + k` belongs to the same meshlet and
/// holds an absolute index into `vertices`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConvertedMesh {
    /// Duplicated per-meshlet vertices.
    pub vertices: Vec<MeshletVertex>,
    /// Absolute triangle indices in meshlet order.
    pub indices: Vec<u32>,
}

impl ConvertedMesh {
    /// Size of both streams in bytes.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        std::mem::size_of_val(self.vertices.as_slice()) + std::mem::size_of_val(self.indices.as_slice())
    }
}

/// Builds the converted mesh for a partition of `mesh`.
#[must_use]
pub fn convert(mesh: &SourceMesh, partition: &Partition) -> ConvertedMesh {
    let vertices = partition
        .vertices
        .iter()
        .map(|&v| {
            let v = v as usize;
            MeshletVertex {
                position: mesh.positions[v].to_array(),
                normal: mesh
                    .normals
                    .as_ref()
                    .map_or(Vec3::ZERO, |n| n[v])
                    .to_array(),
                tangent: mesh
                    .tangents
                    .as_ref()
                    .map_or(Vec4::ZERO, |t| t[v])
                    .to_array(),
            }
        })
        .collect();

    let mut indices = Vec::with_capacity(partition.triangles.len());
    for meshlet in &partition.meshlets {
        indices.extend(
            partition
                .meshlet_triangles(meshlet)
                .iter()
                .map(|&local| meshlet.vertex_offset + u32::from(local)),
        );
    }

    ConvertedMesh { vertices, indices }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjacency::TriangleAdjacency;
    use crate::partition::{partition, MeshletBudget};

    #[test]
    fn test_vertex_layout() {
        assert_eq!(std::mem::size_of::<MeshletVertex>(), 40);
    }

    #[test]
    fn test_converted_indices_resolve_to_source_positions() {
        let mesh = SourceMesh::new(
            vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::ONE, Vec3::Z, Vec3::NEG_X],
            vec![0, 1, 2, 2, 1, 3, 4, 5, 0],
        )
        .with_normals(vec![Vec3::Z; 6]);
        let adjacency = TriangleAdjacency::build(&mesh.indices).unwrap();
        // Small triangle budget forces several meshlets.
        let p = partition(&mesh.indices, 6, &adjacency, MeshletBudget::new(64, 1)).unwrap();
        let converted = convert(&mesh, &p);

        assert_eq!(converted.indices.len(), mesh.indices.len());
        assert_eq!(converted.vertices.len(), p.vertices.len());
        for (k, &index) in converted.indices.iter().enumerate() {
            let source = p.source_triangles[k / 3] as usize;
            let expected = mesh.positions[mesh.indices[source * 3 + k % 3] as usize];
            assert_eq!(converted.vertices[index as usize].position, expected.to_array());
            assert_eq!(converted.vertices[index as usize].normal, [0.0, 0.0, 1.0]);
            assert_eq!(converted.vertices[index as usize].tangent, [0.0; 4]);
        }
    }
}
