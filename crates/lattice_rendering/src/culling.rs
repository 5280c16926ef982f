//! Frustum and normal-cone culling.
//!
//! Extracts frustum planes from the view-projection matrix and tests
//! bounding volumes against them. [`InstanceCull::is_meshlet_visible`] is
//! the CPU twin of `shaders/meshlet_cull.wgsl` and must stay in step with it.

use std::f32::consts::{FRAC_PI_2, TAU};

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4, Vec3, Vec4};
use lattice_meshlet::CullData;

/// A plane in 3D space (Ax + By + Cz + D = 0).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Plane {
    /// Normal X component.
    pub a: f32,
    /// Normal Y component.
    pub b: f32,
    /// Normal Z component.
    pub c: f32,
    /// Distance from origin.
    pub d: f32,
}

impl Plane {
    /// Creates a new plane.
    #[must_use]
    pub const fn new(a: f32, b: f32, c: f32, d: f32) -> Self {
        Self { a, b, c, d }
    }

    fn from_vec4(v: Vec4) -> Self {
        Self::new(v.x, v.y, v.z, v.w)
    }

    /// Normalizes the plane.
    #[must_use]
    pub fn normalized(self) -> Self {
        let len = self.normal().length();
        if len > 0.0 {
            Self {
                a: self.a / len,
                b: self.b / len,
                c: self.c / len,
                d: self.d / len,
            }
        } else {
            self
        }
    }

    /// Plane normal.
    #[inline]
    #[must_use]
    pub fn normal(&self) -> Vec3 {
        Vec3::new(self.a, self.b, self.c)
    }

    /// Returns the signed distance from a point to the plane.
    #[inline]
    #[must_use]
    pub fn distance_to_point(&self, p: Vec3) -> f32 {
        self.normal().dot(p) + self.d
    }

    /// Converts to array format.
    #[must_use]
    pub const fn as_array(&self) -> [f32; 4] {
        [self.a, self.b, self.c, self.d]
    }
}

/// View frustum for culling.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Frustum {
    /// Left, right, bottom, top, near, far planes.
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Plane indices.
    pub const LEFT: usize = 0;
    /// Right plane index.
    pub const RIGHT: usize = 1;
    /// Bottom plane index.
    pub const BOTTOM: usize = 2;
    /// Top plane index.
    pub const TOP: usize = 3;
    /// Near plane index.
    pub const NEAR: usize = 4;
    /// Far plane index.
    pub const FAR: usize = 5;

    /// Extracts frustum planes from a view-projection matrix.
    ///
    /// Expects wgpu clip space: depth in [0, 1].
    #[must_use]
    pub fn from_view_projection(m: &Mat4) -> Self {
        let (r0, r1, r2, r3) = (m.row(0), m.row(1), m.row(2), m.row(3));

        let mut planes = [Plane::default(); 6];
        planes[Self::LEFT] = Plane::from_vec4(r3 + r0).normalized();
        planes[Self::RIGHT] = Plane::from_vec4(r3 - r0).normalized();
        planes[Self::BOTTOM] = Plane::from_vec4(r3 + r1).normalized();
        planes[Self::TOP] = Plane::from_vec4(r3 - r1).normalized();
        planes[Self::NEAR] = Plane::from_vec4(r2).normalized();
        planes[Self::FAR] = Plane::from_vec4(r3 - r2).normalized();

        Self { planes }
    }

    /// Converts planes to array format for GPU upload.
    #[must_use]
    pub fn as_arrays(&self) -> [[f32; 4]; 6] {
        self.planes.map(|p| p.as_array())
    }

    /// Tests if a sphere intersects the frustum.
    #[must_use]
    pub fn test_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(center) >= -radius)
    }

    /// Tests if an AABB intersects the frustum.
    #[must_use]
    pub fn test_aabb(&self, aabb: &Aabb) -> bool {
        let center = aabb.center();
        let half = aabb.half_extents();

        self.planes.iter().all(|plane| {
            // Projection interval radius of the box onto the plane normal.
            let r = half.dot(plane.normal().abs());
            plane.distance_to_point(center) >= -r
        })
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Aabb {
    /// Inverted box that any union replaces.
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Creates a new AABB.
    #[must_use]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Smallest box containing `points`; [`Aabb::EMPTY`] for none.
    #[must_use]
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        points.into_iter().fold(Self::EMPTY, |acc, p| Self {
            min: acc.min.min(p),
            max: acc.max.max(p),
        })
    }

    /// Returns true if no point was ever added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    /// Returns the center of the AABB.
    #[must_use]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Returns the half-extents of the AABB.
    #[must_use]
    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Union of two boxes.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// World-space box enclosing this box under `m`.
    #[must_use]
    pub fn transformed(&self, m: &Mat4) -> Self {
        if self.is_empty() {
            return *self;
        }
        Self::from_points((0..8).map(|i| {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            m.transform_point3(corner)
        }))
    }
}

/// Largest axis scale of the linear part of `m`.
#[inline]
#[must_use]
pub fn max_scale(m: &Mat4) -> f32 {
    m.x_axis
        .truncate()
        .length()
        .max(m.y_axis.truncate().length())
        .max(m.z_axis.truncate().length())
}

/// Ratio of the largest to the smallest singular value of `m`.
///
/// Bounds how much the map can widen the angle between two directions.
/// Singular, near-singular or non-finite input returns `f32::MAX`.
#[must_use]
pub fn anisotropy(m: &Mat3) -> f32 {
    // Eigenvalues of the symmetric m^T m, closed form.
    let a = m.transpose() * *m;
    let off = a.x_axis.y * a.x_axis.y + a.x_axis.z * a.x_axis.z + a.y_axis.z * a.y_axis.z;
    let q = (a.x_axis.x + a.y_axis.y + a.z_axis.z) / 3.0;
    let p2 = (a.x_axis.x - q).powi(2) + (a.y_axis.y - q).powi(2) + (a.z_axis.z - q).powi(2) + 2.0 * off;
    if !p2.is_finite() || !q.is_finite() {
        return f32::MAX;
    }
    if p2 == 0.0 {
        return if q > 0.0 { 1.0 } else { f32::MAX };
    }

    let p = (p2 / 6.0).sqrt();
    let b = (a - Mat3::from_diagonal(Vec3::splat(q))) * (1.0 / p);
    let phi = (b.determinant() * 0.5).clamp(-1.0, 1.0).acos() / 3.0;
    let largest = q + 2.0 * p * phi.cos();
    let smallest = q + 2.0 * p * (phi + TAU / 3.0).cos();
    if smallest <= largest * f32::EPSILON {
        return f32::MAX;
    }
    (largest / smallest).sqrt()
}

/// Per-instance terms of the meshlet test, derived once from the model
/// matrix and shared by every meshlet of the instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceCull {
    /// Object to world.
    pub model: Mat4,
    /// Inverse-transpose of the linear part, used for cone axes. Zero when
    /// the model is singular.
    pub normal_matrix: Mat3,
    /// Largest axis scale, applied to sphere radii.
    pub scale: f32,
    /// Angle widening factor for normal cones, see [`anisotropy`].
    pub anisotropy: f32,
}

impl InstanceCull {
    /// Derives the culling terms of `model`.
    #[must_use]
    pub fn new(model: &Mat4) -> Self {
        let linear = Mat3::from_mat4(*model);
        let det = linear.determinant();
        let (normal_matrix, anisotropy) = if det.is_finite() && det.abs() > f32::MIN_POSITIVE {
            (linear.inverse().transpose(), self::anisotropy(&linear))
        } else {
            (Mat3::ZERO, f32::MAX)
        };
        Self {
            model: *model,
            normal_matrix,
            scale: max_scale(model),
            anisotropy,
        }
    }

    /// Meshlet visibility for this instance.
    ///
    /// Rejects the meshlet when its transformed bounding sphere is outside
    /// any frustum plane, or when its normal cone faces away from `camera`.
    /// Under non-uniform scale or shear the cone half-angle is widened by
    /// [`anisotropy`](Self::anisotropy), and the test is skipped once it
    /// reaches 90 degrees.
    #[must_use]
    pub fn is_meshlet_visible(&self, cull: &CullData, frustum: &Frustum, camera: Vec3) -> bool {
        let center = self.model.transform_point3(cull.center());
        if !frustum.test_sphere(center, cull.radius * self.scale) {
            return false;
        }

        let cone = cull.cone();
        if cone.is_disabled() {
            return true;
        }
        let axis = (self.normal_matrix * cone.axis).normalize_or_zero();
        if axis == Vec3::ZERO {
            return true;
        }
        let mut cutoff = cone.cutoff;
        if self.anisotropy > 1.0 {
            let half_angle = cutoff.max(0.0).asin();
            if half_angle >= FRAC_PI_2 / self.anisotropy {
                return true;
            }
            cutoff = (half_angle * self.anisotropy).sin();
        }
        let apex = self.model.transform_point3(cull.apex());
        let view = (apex - camera).normalize_or_zero();
        view.dot(axis) < cutoff
    }
}

/// Meshlet visibility for one instance. See
/// [`InstanceCull::is_meshlet_visible`].
#[must_use]
pub fn is_meshlet_visible(cull: &CullData, model: &Mat4, frustum: &Frustum, camera: Vec3) -> bool {
    InstanceCull::new(model).is_meshlet_visible(cull, frustum, camera)
}
