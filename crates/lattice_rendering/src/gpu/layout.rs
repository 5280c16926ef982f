//! Fixed-layout records shared between the CPU and the culling and
//! expansion shaders. Field order and sizes are part of the shader
//! contract; the tests pin them.

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4, Vec3};

use crate::culling::InstanceCull;

/// Bytes reserved at the start of an append buffer for its counter.
///
/// Layout: `u32` count, 12 bytes padding, then `u32` records.
pub const APPEND_HEADER_SIZE: u64 = 16;

/// Byte offset of `instance_count` in [`DrawIndexedIndirectArgs`].
pub const ARGS_INSTANCE_COUNT_OFFSET: u64 = 4;

/// Largest meshlet or instance index a [`VisibleMeshlet`] can hold, plus one.
pub const VISIBLE_INDEX_LIMIT: usize = 1 << 16;

/// Per-instance matrices, 192 bytes.
///
/// `normal_matrix` is a WGSL `mat3x3<f32>`: three columns padded to 16
/// bytes each.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceTransform {
    /// Object to world, column-major.
    pub local_to_world: [[f32; 4]; 4],
    /// Object to clip, column-major.
    pub mvp: [[f32; 4]; 4],
    /// Inverse-transpose of the linear part, column-major, w unused.
    pub normal_matrix: [[f32; 4]; 3],
    /// `[max_scale, anisotropy, 0, 0]`.
    pub cull_params: [f32; 4],
}

impl InstanceTransform {
    /// Builds the record for one instance.
    #[inline]
    #[must_use]
    pub fn new(local_to_world: &Mat4, view_projection: &Mat4) -> Self {
        let cull = InstanceCull::new(local_to_world);
        let n = cull.normal_matrix;
        Self {
            local_to_world: local_to_world.to_cols_array_2d(),
            mvp: (*view_projection * *local_to_world).to_cols_array_2d(),
            normal_matrix: [n.x_axis, n.y_axis, n.z_axis].map(|c| c.extend(0.0).to_array()),
            cull_params: [cull.scale, cull.anisotropy, 0.0, 0.0],
        }
    }

    /// Object-to-world matrix.
    #[inline]
    #[must_use]
    pub fn model(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.local_to_world)
    }

    /// Culling terms as stored, the values the shader reads.
    #[must_use]
    pub fn cull(&self) -> InstanceCull {
        let [x, y, z] = self.normal_matrix.map(|c| Vec3::new(c[0], c[1], c[2]));
        InstanceCull {
            model: self.model(),
            normal_matrix: Mat3::from_cols(x, y, z),
            scale: self.cull_params[0],
            anisotropy: self.cull_params[1],
        }
    }
}

/// Culling pass uniforms, 128 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct CullingUniforms {
    /// Culling camera position, w unused.
    pub camera_position: [f32; 4],
    /// Normalized frustum planes (normal xyz, distance w).
    pub frustum_planes: [[f32; 4]; 6],
    /// `[meshlet_count, instance_count, 0, 0]`.
    pub params: [u32; 4],
}

impl CullingUniforms {
    /// Creates uniforms for one dispatch.
    #[must_use]
    pub fn new(
        camera_position: Vec3,
        frustum_planes: [[f32; 4]; 6],
        meshlet_count: u32,
        instance_count: u32,
    ) -> Self {
        Self {
            camera_position: camera_position.extend(1.0).to_array(),
            frustum_planes,
            params: [meshlet_count, instance_count, 0, 0],
        }
    }

    /// Meshlets per instance.
    #[inline]
    #[must_use]
    pub fn meshlet_count(&self) -> u32 {
        self.params[0]
    }

    /// Instances in the dispatch.
    #[inline]
    #[must_use]
    pub fn instance_count(&self) -> u32 {
        self.params[1]
    }
}

/// Indexed indirect draw arguments, 5 x u32.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirectArgs {
    /// Indices per drawn instance (one full meshlet).
    pub index_count: u32,
    /// Drawn instances, filled by the counter copy.
    pub instance_count: u32,
    /// First index.
    pub first_index: u32,
    /// Base vertex.
    pub base_vertex: i32,
    /// First instance.
    pub first_instance: u32,
}

impl DrawIndexedIndirectArgs {
    /// Base arguments written before each culling dispatch.
    #[must_use]
    pub const fn reset(index_count: u32) -> Self {
        Self {
            index_count,
            instance_count: 0,
            first_index: 0,
            base_vertex: 0,
            first_instance: 0,
        }
    }
}

/// Visible (meshlet, instance) pair appended by the culling pass.
///
/// Meshlet index in the low 16 bits, instance index in the high 16 bits.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
pub struct VisibleMeshlet(pub u32);

impl VisibleMeshlet {
    /// Packs a pair. Both indices must be below [`VISIBLE_INDEX_LIMIT`].
    #[inline]
    #[must_use]
    pub const fn new(meshlet: u32, instance: u32) -> Self {
        Self((meshlet & 0xFFFF) | (instance << 16))
    }

    /// Meshlet index.
    #[inline]
    #[must_use]
    pub const fn meshlet(self) -> u32 {
        self.0 & 0xFFFF
    }

    /// Instance index within the draw group.
    #[inline]
    #[must_use]
    pub const fn instance(self) -> u32 {
        self.0 >> 16
    }
}
