//! Procedural test meshes.
//!
//! Defined in code so tests and benchmarks need no asset files. All
//! meshes wind counter-clockwise when seen from the outside.

use glam::Vec3;

use crate::mesh::SourceMesh;

/// Axis-aligned cube with 8 shared corners and 12 triangles.
#[must_use]
pub fn cube(half_extent: f32) -> SourceMesh {
    // Corner i has x from bit 0, y from bit 1, z from bit 2.
    let positions = (0..8_u32)
        .map(|i| {
            let sign = |bit: u32| if i & bit == 0 { -half_extent } else { half_extent };
            Vec3::new(sign(1), sign(2), sign(4))
        })
        .collect();
    let indices = vec![
        0, 4, 6, 0, 6, 2, // -X
        1, 3, 7, 1, 7, 5, // +X
        0, 1, 5, 0, 5, 4, // -Y
        2, 6, 7, 2, 7, 3, // +Y
        0, 2, 3, 0, 3, 1, // -Z
        4, 5, 7, 4, 7, 6, // +Z
    ];
    SourceMesh::new(positions, indices)
}

/// Flat triangle strip of `triangles` triangles facing +Z.
///
/// Consecutive triangles share an edge, so the strip is one connected
/// component. Every triangle after the first adds one new vertex.
#[must_use]
pub fn strip(triangles: u32) -> SourceMesh {
    let positions = (0..triangles + 2)
        .map(|i| Vec3::new((i / 2) as f32, (i % 2) as f32, 0.0))
        .collect();
    let indices = (0..triangles)
        .flat_map(|k| {
            if k % 2 == 0 {
                [k + 1, k, k + 2]
            } else {
                [k, k + 1, k + 2]
            }
        })
        .collect();
    SourceMesh::new(positions, indices)
}

/// Flat grid of `width` x `height` quads in the XY plane facing +Z.
#[must_use]
pub fn grid(width: u32, height: u32, cell: f32) -> SourceMesh {
    let row = width + 1;
    let positions = (0..=height)
        .flat_map(|y| (0..=width).map(move |x| Vec3::new(x as f32 * cell, y as f32 * cell, 0.0)))
        .collect();
    let mut indices = Vec::with_capacity((width * height * 6) as usize);
    for y in 0..height {
        for x in 0..width {
            let v00 = y * row + x;
            let v10 = v00 + 1;
            let v01 = v00 + row;
            let v11 = v01 + 1;
            indices.extend_from_slice(&[v00, v10, v11, v00, v11, v01]);
        }
    }
    SourceMesh::new(positions, indices).with_normals(vec![Vec3::Z; (row * (height + 1)) as usize])
}

/// Latitude/longitude sphere with smooth normals.
///
/// Pole rows emit one triangle per segment, so the mesh has no
/// degenerate triangles.
#[must_use]
pub fn uv_sphere(radius: f32, segments: u32, rings: u32) -> SourceMesh {
    let segments = segments.max(3);
    let rings = rings.max(2);
    let columns = segments + 1;

    let mut normals = Vec::with_capacity(((rings + 1) * columns) as usize);
    for r in 0..=rings {
        let theta = std::f32::consts::PI * r as f32 / rings as f32;
        for s in 0..=segments {
            let phi = std::f32::consts::TAU * s as f32 / segments as f32;
            normals.push(Vec3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin()));
        }
    }
    let positions = normals.iter().map(|n| *n * radius).collect();

    let mut indices = Vec::new();
    for r in 0..rings {
        for s in 0..segments {
            let a = r * columns + s;
            let b = a + columns;
            let c = b + 1;
            let d = a + 1;
            if r != rings - 1 {
                indices.extend_from_slice(&[a, c, b]);
            }
            if r != 0 {
                indices.extend_from_slice(&[a, d, c]);
            }
        }
    }

    SourceMesh::new(positions, indices).with_normals(normals)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face_normal(mesh: &SourceMesh, t: usize) -> Vec3 {
        let [a, b, c] = mesh.triangle(t).map(|i| mesh.positions[i as usize]);
        (b - a).cross(c - a).normalize()
    }

    #[test]
    fn test_cube_faces_point_outward() {
        let mesh = cube(1.0);
        assert_eq!(mesh.triangle_count(), 12);
        for t in 0..12 {
            let [a, b, c] = mesh.triangle(t).map(|i| mesh.positions[i as usize]);
            let centroid = (a + b + c) / 3.0;
            assert!(face_normal(&mesh, t).dot(centroid) > 0.0, "triangle {t}");
        }
    }

    #[test]
    fn test_strip_faces_forward() {
        let mesh = strip(5);
        assert_eq!(mesh.vertex_count(), 7);
        for t in 0..5 {
            assert!(face_normal(&mesh, t).z > 0.99);
        }
    }

    #[test]
    fn test_grid_counts() {
        let mesh = grid(4, 3, 1.0);
        assert_eq!(mesh.vertex_count(), 20);
        assert_eq!(mesh.triangle_count(), 24);
        assert_eq!(mesh.validate(), Ok(()));
    }

    #[test]
    fn test_sphere_has_no_degenerates() {
        let mesh = uv_sphere(1.0, 16, 8);
        assert_eq!(mesh.validate(), Ok(()));
        assert_eq!(mesh.degenerate_triangle_count(), 0);
        // Two pole rows of one triangle, the rest two per segment.
        assert_eq!(mesh.triangle_count(), 16 * (2 * 8 - 2));
    }
}
