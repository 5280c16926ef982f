//! Indexed triangle mesh accepted by the builder.

use glam::{Vec3, Vec4};

use crate::error::{MeshletError, MeshletResult};

/// Indexed triangle list with optional shading attributes.
///
/// Handed over by the host engine. Positions and indices are required;
/// normals and tangents, when present, must match the position count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceMesh {
    /// Vertex positions in object space.
    pub positions: Vec<Vec3>,
    /// Triangle list, three indices per triangle.
    pub indices: Vec<u32>,
    /// Optional per-vertex normals.
    pub normals: Option<Vec<Vec3>>,
    /// Optional per-vertex tangents (w = handedness).
    pub tangents: Option<Vec<Vec4>>,
}

impl SourceMesh {
    /// Creates a mesh from positions and indices only.
    #[must_use]
    pub fn new(positions: Vec<Vec3>, indices: Vec<u32>) -> Self {
        Self {
            positions,
            indices,
            normals: None,
            tangents: None,
        }
    }

    /// Attaches per-vertex normals.
    #[must_use]
    pub fn with_normals(mut self, normals: Vec<Vec3>) -> Self {
        self.normals = Some(normals);
        self
    }

    /// Attaches per-vertex tangents.
    #[must_use]
    pub fn with_tangents(mut self, tangents: Vec<Vec4>) -> Self {
        self.tangents = Some(tangents);
        self
    }

    /// Number of vertices.
    #[inline]
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Number of complete triangles.
    #[inline]
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Returns the three corner indices of triangle `t`.
    #[inline]
    #[must_use]
    pub fn triangle(&self, t: usize) -> [u32; 3] {
        [
            self.indices[t * 3],
            self.indices[t * 3 + 1],
            self.indices[t * 3 + 2],
        ]
    }

    /// Checks the mesh for structural problems.
    ///
    /// # Errors
    ///
    /// Returns the first problem found: bad index count, empty mesh,
    /// out-of-range index, attribute length mismatch or non-finite position.
    pub fn validate(&self) -> MeshletResult<()> {
        if self.indices.len() % 3 != 0 {
            return Err(MeshletError::InvalidIndexCount(self.indices.len()));
        }
        if self.indices.is_empty() {
            return Err(MeshletError::EmptyMesh);
        }

        let vertex_count = self.positions.len();
        if let Some(at) = self.indices.iter().position(|&i| i as usize >= vertex_count) {
            return Err(MeshletError::IndexOutOfRange {
                index: self.indices[at],
                at,
                vertex_count,
            });
        }

        if let Some(normals) = &self.normals {
            check_len("normals", vertex_count, normals.len())?;
        }
        if let Some(tangents) = &self.tangents {
            check_len("tangents", vertex_count, tangents.len())?;
        }

        if let Some(v) = self.positions.iter().position(|p| !p.is_finite()) {
            return Err(MeshletError::NonFinitePosition(v));
        }

        Ok(())
    }

    /// Returns true if triangle `t` has zero area.
    #[must_use]
    pub fn is_degenerate(&self, t: usize) -> bool {
        let [a, b, c] = self.triangle(t);
        if a == b || b == c || a == c {
            return true;
        }
        let p0 = self.positions[a as usize];
        let p1 = self.positions[b as usize];
        let p2 = self.positions[c as usize];
        (p1 - p0).cross(p2 - p0).length_squared() == 0.0
    }

    /// Counts zero-area triangles.
    #[must_use]
    pub fn degenerate_triangle_count(&self) -> usize {
        (0..self.triangle_count())
            .filter(|&t| self.is_degenerate(t))
            .count()
    }

    /// Returns a copy with every zero-area triangle removed.
    ///
    /// Vertex streams are kept as-is; unreferenced vertices are harmless.
    #[must_use]
    pub fn without_degenerate_triangles(&self) -> Self {
        let indices = (0..self.triangle_count())
            .filter(|&t| !self.is_degenerate(t))
            .flat_map(|t| self.triangle(t))
            .collect();
        Self {
            positions: self.positions.clone(),
            indices,
            normals: self.normals.clone(),
            tangents: self.tangents.clone(),
        }
    }
}

fn check_len(attribute: &'static str, expected: usize, actual: usize) -> MeshletResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(MeshletError::AttributeLengthMismatch {
            attribute,
            expected,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> SourceMesh {
        SourceMesh::new(
            vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            vec![0, 1, 2],
        )
    }

    #[test]
    fn test_validate_ok() {
        assert_eq!(triangle().validate(), Ok(()));
    }

    #[test]
    fn test_validate_index_count() {
        let mut mesh = triangle();
        mesh.indices.push(0);
        assert_eq!(mesh.validate(), Err(MeshletError::InvalidIndexCount(4)));
    }

    #[test]
    fn test_validate_empty() {
        let mesh = SourceMesh::new(vec![Vec3::ZERO], Vec::new());
        assert_eq!(mesh.validate(), Err(MeshletError::EmptyMesh));
    }

    #[test]
    fn test_validate_out_of_range() {
        let mut mesh = triangle();
        mesh.indices[2] = 7;
        assert_eq!(
            mesh.validate(),
            Err(MeshletError::IndexOutOfRange { index: 7, at: 2, vertex_count: 3 })
        );
    }

    #[test]
    fn test_validate_attribute_mismatch() {
        let mesh = triangle().with_normals(vec![Vec3::Z; 2]);
        assert!(matches!(
            mesh.validate(),
            Err(MeshletError::AttributeLengthMismatch { attribute: "normals", .. })
        ));
    }

    #[test]
    fn test_validate_non_finite() {
        let mut mesh = triangle();
        mesh.positions[1].x = f32::NAN;
        assert_eq!(mesh.validate(), Err(MeshletError::NonFinitePosition(1)));
    }

    #[test]
    fn test_degenerate_filter() {
        let mut mesh = triangle();
        mesh.indices.extend_from_slice(&[0, 0, 1]);
        assert_eq!(mesh.degenerate_triangle_count(), 1);

        let filtered = mesh.without_degenerate_triangles();
        assert_eq!(filtered.indices, vec![0, 1, 2]);
    }
}
