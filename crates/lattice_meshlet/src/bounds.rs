//! Per-meshlet culling record: bounding sphere and normal cone.
//!
//! The record is shared byte-for-byte with the culling shader, so its
//! layout is fixed:
//!
//! | Offset | Size | Field                               |
//! |--------|------|-------------------------------------|
//! | 0      | 12   | sphere center, 3 x f32              |
//! | 12     | 4    | sphere radius, f32                  |
//! | 16     | 3    | cone axis x, y, z (unit bytes)      |
//! | 19     | 1    | cone cutoff (unit byte)             |
//! | 20     | 4    | apex offset along the axis, f32     |
//!
//! A "unit byte" maps [-1, 1] onto [0, 255] with
//! `round(clamp(x, -1, 1) * 127 + 128)` and back with `(b - 128) / 127`.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::partition::{Meshlet, Partition};

/// Margin added to the cone half-angle before packing, in degrees.
pub const CONE_MARGIN_DEGREES: f32 = 5.0;

/// Cutoff value that disables the cone test.
pub const NEVER_CULL_CUTOFF: f32 = 1.0;

/// Squared sine of the corner angle below which a triangle counts as
/// degenerate. Relative to the edge lengths, so it holds at any scale.
const DEGENERATE_SIN_SQ: f32 = 1e-12;

/// Packs a value in [-1, 1] into a byte.
#[inline]
#[must_use]
pub fn encode_unit_byte(x: f32) -> u8 {
    // f32::max ignores NaN, so NaN packs as -1.
    let clamped = x.max(-1.0).min(1.0);
    (clamped * 127.0 + 128.0).round() as u8
}

/// Unpacks a byte written by [`encode_unit_byte`].
#[inline]
#[must_use]
pub fn decode_unit_byte(b: u8) -> f32 {
    (f32::from(b) - 128.0) / 127.0
}

/// Decoded normal cone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalCone {
    /// Unit cone axis, zero when the cone is disabled.
    pub axis: Vec3,
    /// Backface cutoff. A cluster is back-facing when
    /// `dot(normalize(apex - eye), axis) >= cutoff`.
    pub cutoff: f32,
}

impl NormalCone {
    /// Returns true if the cone test can never reject the cluster.
    #[inline]
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.cutoff >= NEVER_CULL_CUTOFF || self.axis == Vec3::ZERO
    }
}

/// Packed culling record for one meshlet. See the module docs for the
/// byte layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct CullData {
    /// Bounding sphere center in object space.
    pub center: [f32; 3],
    /// Bounding sphere radius.
    pub radius: f32,
    /// Cone axis x, y, z and cutoff as unit bytes.
    pub cone: [u8; 4],
    /// Signed distance from the sphere center back to the triangle
    /// centroid, measured along the cone axis.
    pub apex_offset: f32,
}

impl CullData {
    /// Sphere center as a vector.
    #[inline]
    #[must_use]
    pub fn center(&self) -> Vec3 {
        Vec3::from_array(self.center)
    }

    /// Bounding sphere as (center, radius).
    #[inline]
    #[must_use]
    pub fn bounding_sphere(&self) -> (Vec3, f32) {
        (self.center(), self.radius)
    }

    /// Decodes the packed cone.
    #[must_use]
    pub fn cone(&self) -> NormalCone {
        let axis = Vec3::new(
            decode_unit_byte(self.cone[0]),
            decode_unit_byte(self.cone[1]),
            decode_unit_byte(self.cone[2]),
        );
        NormalCone {
            axis: axis.normalize_or_zero(),
            cutoff: decode_unit_byte(self.cone[3]),
        }
    }

    /// Cone apex in object space.
    #[inline]
    #[must_use]
    pub fn apex(&self) -> Vec3 {
        self.center() - self.cone().axis * self.apex_offset
    }
}

/// Computes the culling record of one meshlet.
///
/// Degenerate triangles contribute no normal. When no usable normal is
/// left, or the normals cancel out, the cone is written as disabled.
#[must_use]
pub fn compute_cull_data(meshlet: &Meshlet, partition: &Partition, positions: &[Vec3]) -> CullData {
    let vertices = partition.meshlet_vertices(meshlet);
    let triangles = partition.meshlet_triangles(meshlet);

    let mut normals = Vec::with_capacity(meshlet.triangle_count as usize);
    let mut corner_sum = Vec3::ZERO;
    for tri in triangles.chunks_exact(3) {
        let p0 = positions[vertices[tri[0] as usize] as usize];
        let p1 = positions[vertices[tri[1] as usize] as usize];
        let p2 = positions[vertices[tri[2] as usize] as usize];
        corner_sum += p0 + p1 + p2;

        if let Some(n) = triangle_normal(p0, p1, p2) {
            normals.push(n);
        }
    }
    let centroid = corner_sum / (triangles.len().max(1) as f32);

    let (center, radius) = loose_sphere(vertices, positions);

    let axis = normals.iter().copied().sum::<Vec3>().normalize_or_zero();
    if axis == Vec3::ZERO {
        return CullData {
            center: center.to_array(),
            radius,
            cone: disabled_cone(),
            apex_offset: 0.0,
        };
    }

    let min_dot = normals
        .iter()
        .map(|n| n.dot(axis))
        .fold(1.0_f32, f32::min)
        .clamp(-1.0, 1.0);

    CullData {
        center: center.to_array(),
        radius,
        cone: [
            encode_unit_byte(axis.x),
            encode_unit_byte(axis.y),
            encode_unit_byte(axis.z),
            encode_unit_byte(cone_cutoff(min_dot)),
        ],
        apex_offset: (center - centroid).dot(axis),
    }
}

/// Unit normal of a triangle, or `None` when it has no usable area.
fn triangle_normal(p0: Vec3, p1: Vec3, p2: Vec3) -> Option<Vec3> {
    let (e1, e2) = (p1 - p0, p2 - p0);
    let n = e1.cross(e2);
    let len_sq = n.length_squared();
    let limit = e1.length_squared() * e2.length_squared() * DEGENERATE_SIN_SQ;
    (len_sq.is_finite() && len_sq > 0.0 && len_sq > limit).then(|| n / len_sq.sqrt())
}

fn disabled_cone() -> [u8; 4] {
    let zero = encode_unit_byte(0.0);
    [zero, zero, zero, encode_unit_byte(NEVER_CULL_CUTOFF)]
}

/// Cutoff for a cone whose narrowest normal has `min_dot` with the axis.
///
/// Returns `-cos(acos(min_dot) + 90deg + margin)`, or the never-cull value
/// once the widened half-angle reaches 90 degrees.
#[must_use]
pub fn cone_cutoff(min_dot: f32) -> f32 {
    let half_angle = min_dot.clamp(-1.0, 1.0).acos() + CONE_MARGIN_DEGREES.to_radians();
    if half_angle >= std::f32::consts::FRAC_PI_2 {
        NEVER_CULL_CUTOFF
    } else {
        -(half_angle + std::f32::consts::FRAC_PI_2).cos()
    }
}

/// Mean of the meshlet's vertices and the largest distance to it.
fn loose_sphere(vertices: &[u32], positions: &[Vec3]) -> (Vec3, f32) {
    if vertices.is_empty() {
        return (Vec3::ZERO, 0.0);
    }
    let center = vertices
        .iter()
        .map(|&v| positions[v as usize])
        .sum::<Vec3>()
        / vertices.len() as f32;
    let radius = vertices
        .iter()
        .map(|&v| positions[v as usize].distance(center))
        .fold(0.0_f32, f32::max);
    (center, radius)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjacency::TriangleAdjacency;
    use crate::partition::{partition, MeshletBudget};

    fn cull_single(positions: &[Vec3], indices: &[u32]) -> CullData {
        let adjacency = TriangleAdjacency::build(indices).unwrap();
        let p = partition(indices, positions.len(), &adjacency, MeshletBudget::default()).unwrap();
        assert_eq!(p.meshlets.len(), 1);
        compute_cull_data(&p.meshlets[0], &p, positions)
    }

    #[test]
    fn test_cull_data_layout() {
        assert_eq!(std::mem::size_of::<CullData>(), 24);
        assert_eq!(std::mem::align_of::<CullData>(), 4);
    }

    #[test]
    fn test_unit_byte_endpoints() {
        assert_eq!(encode_unit_byte(-1.0), 1);
        assert_eq!(encode_unit_byte(0.0), 128);
        assert_eq!(encode_unit_byte(1.0), 255);
        assert_eq!(encode_unit_byte(4.0), 255);
        assert_eq!(encode_unit_byte(f32::NAN), 1);
        assert!((decode_unit_byte(255) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_flat_quad_cone() {
        let positions = [
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
            Vec3::new(-1.0, 1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
        ];
        let data = cull_single(&positions, &[0, 1, 2, 2, 1, 3]);
        let cone = data.cone();

        assert!((cone.axis - Vec3::Z).length() < 0.01);
        // Flat cluster: cutoff is sin(margin).
        let expected = CONE_MARGIN_DEGREES.to_radians().sin();
        assert!((cone.cutoff - expected).abs() < 1.0 / 127.0);
        assert!(data.center().length() < 1e-6);
        assert!((data.radius - 2.0_f32.sqrt()).abs() < 1e-5);
        assert!(data.apex_offset.abs() < 1e-6);
    }

    #[test]
    fn test_opposing_normals_disable_cone() {
        // Same triangle twice with opposite winding.
        let positions = [Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::new(1.0, 1.0, 0.0)];
        let data = cull_single(&positions, &[0, 1, 2, 2, 1, 0]);
        assert!(data.cone().is_disabled());
    }

    #[test]
    fn test_degenerate_only_meshlet() {
        let positions = [Vec3::ZERO, Vec3::X, Vec3::new(2.0, 0.0, 0.0)];
        let data = cull_single(&positions, &[0, 1, 2]);
        let cone = data.cone();

        assert!(cone.is_disabled());
        assert!(!data.apex_offset.is_nan());
        assert!(cone.axis.is_finite());
    }

    #[test]
    fn test_tiny_triangle_keeps_cone() {
        let positions = [Vec3::ZERO, Vec3::X * 1e-4, Vec3::Y * 1e-4];
        let data = cull_single(&positions, &[0, 1, 2]);
        let cone = data.cone();

        assert!(!cone.is_disabled());
        assert!((cone.axis - Vec3::Z).length() < 0.01);
    }

    #[test]
    fn test_triangle_normal_rejects_slivers() {
        assert!(triangle_normal(Vec3::ZERO, Vec3::X, Vec3::new(2.0, 0.0, 0.0)).is_none());
        assert!(triangle_normal(Vec3::ZERO, Vec3::X, Vec3::new(2.0, 1e-9, 0.0)).is_none());
        assert!(triangle_normal(Vec3::ZERO, Vec3::X, Vec3::new(f32::NAN, 1.0, 0.0)).is_none());
        let n = triangle_normal(Vec3::ZERO, Vec3::X * 1e-6, Vec3::Y * 1e-6);
        assert!(n.is_some_and(|n| (n - Vec3::Z).length() < 1e-5));
    }

    #[test]
    fn test_cone_cutoff_range() {
        assert!((cone_cutoff(1.0) - CONE_MARGIN_DEGREES.to_radians().sin()).abs() < 1e-6);
        assert_eq!(cone_cutoff(0.0), NEVER_CULL_CUTOFF);
        assert_eq!(cone_cutoff(-1.0), NEVER_CULL_CUTOFF);
        assert!(cone_cutoff(0.5) < 1.0);
    }

    #[test]
    fn test_cone_cutoff_saturates_at_right_angle() {
        // 84 + 5 degrees stays below 90 and grows toward sin(90).
        let narrow = cone_cutoff(84_f32.to_radians().cos());
        assert!((narrow - 89_f32.to_radians().sin()).abs() < 1e-4);
        assert!(narrow < NEVER_CULL_CUTOFF);

        // 86 + 5 degrees would wrap to sin(91) without saturation.
        assert_eq!(cone_cutoff(86_f32.to_radians().cos()), NEVER_CULL_CUTOFF);
    }
}
