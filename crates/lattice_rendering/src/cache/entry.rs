//! Per-mesh cache entry and its GPU geometry.

use lattice_meshlet::MeshletGeometry;

use crate::culling::Aabb;
use crate::gpu::{BufferBatch, BufferDesc, BufferKind, GpuBackend, GpuError};

use super::asset::MeshId;

/// Device buffers holding one mesh's meshlet geometry.
#[derive(Debug)]
pub struct GpuGeometry<B: GpuBackend> {
    /// [`lattice_meshlet::Meshlet`] descriptors.
    pub meshlets: B::Buffer,
    /// [`lattice_meshlet::CullData`] records.
    pub cull_data: B::Buffer,
    /// [`lattice_meshlet::MeshletVertex`] stream.
    pub vertices: B::Buffer,
    /// Absolute `u32` indices.
    pub indices: B::Buffer,
    /// Total bytes uploaded.
    pub byte_size: u64,
}

impl<B: GpuBackend> GpuGeometry<B> {
    /// Uploads `geometry`. On failure no buffer stays allocated.
    pub(crate) fn upload(gpu: &mut B, geometry: &MeshletGeometry) -> Result<Self, GpuError> {
        let mut batch = BufferBatch::new(gpu);
        let result = Self::create_in(&mut batch, geometry);
        if result.is_err() {
            batch.rollback();
        }
        result
    }

    fn create_in(batch: &mut BufferBatch<'_, B>, geometry: &MeshletGeometry) -> Result<Self, GpuError> {
        let descs = [
            BufferDesc::with_contents(
                "Meshlet Descriptors",
                BufferKind::Structured,
                bytemuck::cast_slice(&geometry.meshlets),
            ),
            BufferDesc::with_contents(
                "Meshlet Cull Data",
                BufferKind::Structured,
                bytemuck::cast_slice(&geometry.cull_data),
            ),
            BufferDesc::with_contents(
                "Meshlet Vertices",
                BufferKind::Structured,
                bytemuck::cast_slice(&geometry.converted.vertices),
            ),
            BufferDesc::with_contents(
                "Meshlet Indices",
                BufferKind::Structured,
                bytemuck::cast_slice(&geometry.converted.indices),
            ),
        ];
        let [meshlets, cull_data, vertices, indices] = &descs;

        Ok(Self {
            meshlets: batch.create(meshlets)?,
            cull_data: batch.create(cull_data)?,
            vertices: batch.create(vertices)?,
            indices: batch.create(indices)?,
            byte_size: descs.iter().map(|d| d.size).sum(),
        })
    }

    pub(crate) fn release(self, gpu: &mut B) {
        gpu.release_buffer(self.meshlets);
        gpu.release_buffer(self.cull_data);
        gpu.release_buffer(self.vertices);
        gpu.release_buffer(self.indices);
    }
}

/// One unique mesh held by the cache.
#[derive(Debug)]
pub struct CacheEntry<B: GpuBackend> {
    mesh_id: MeshId,
    geometry: MeshletGeometry,
    gpu: GpuGeometry<B>,
    ref_count: usize,
    local_bounds: Aabb,
}

impl<B: GpuBackend> CacheEntry<B> {
    pub(crate) fn new(mesh_id: MeshId, geometry: MeshletGeometry, gpu: GpuGeometry<B>) -> Self {
        // Union of meshlet sphere boxes, so it encloses every sphere the
        // culling kernel tests.
        let local_bounds = geometry
            .cull_data
            .iter()
            .map(|cull| {
                let (center, radius) = cull.bounding_sphere();
                Aabb::new(center - radius, center + radius)
            })
            .fold(Aabb::EMPTY, |acc, b| acc.union(&b));

        Self {
            mesh_id,
            geometry,
            gpu,
            ref_count: 0,
            local_bounds,
        }
    }

    /// Mesh id.
    #[must_use]
    pub const fn mesh_id(&self) -> MeshId {
        self.mesh_id
    }

    /// CPU copy of the built geometry.
    #[must_use]
    pub const fn geometry(&self) -> &MeshletGeometry {
        &self.geometry
    }

    /// Device buffers.
    #[must_use]
    pub const fn gpu(&self) -> &GpuGeometry<B> {
        &self.gpu
    }

    /// Live instances sharing this entry.
    #[must_use]
    pub const fn ref_count(&self) -> usize {
        self.ref_count
    }

    /// Object-space bounds of every meshlet sphere.
    #[must_use]
    pub const fn local_bounds(&self) -> &Aabb {
        &self.local_bounds
    }

    /// Meshlets per instance.
    #[must_use]
    pub fn meshlet_count(&self) -> usize {
        self.geometry.meshlet_count()
    }

    /// Indices expanded per drawn meshlet.
    #[must_use]
    pub fn index_count(&self) -> u32 {
        self.geometry.budget.max_index_count()
    }

    pub(crate) fn add_ref(&mut self) {
        self.ref_count += 1;
    }

    /// Drops one reference and returns what is left.
    pub(crate) fn remove_ref(&mut self) -> usize {
        self.ref_count = self.ref_count.saturating_sub(1);
        self.ref_count
    }

    pub(crate) fn release(self, gpu: &mut B) {
        self.gpu.release(gpu);
    }
}
