//! Renderer facade: owns the backend, the mesh cache and the orchestrator.

use glam::Mat4;
use rustc_hash::FxHashMap;
use tracing::info;

use crate::cache::{CacheStats, InstanceHandle, MeshAsset, MeshId, MeshletCache};
use crate::camera::FrameCameras;
use crate::config::MeshletPipelineConfig;
use crate::draw::{CullDrawOrchestrator, FrameReport};
use crate::error::{RenderError, RenderResult};
use crate::gpu::GpuBackend;

/// Meshlet renderer.
///
/// Everything it allocated is released by [`reload`](Self::reload) and on
/// drop. Pass `&mut backend` as `B` to keep the backend after the renderer
/// is gone.
#[derive(Debug)]
pub struct MeshletRenderer<B: GpuBackend> {
    backend: B,
    config: MeshletPipelineConfig,
    cache: MeshletCache<B>,
    orchestrator: CullDrawOrchestrator<B>,
    instances: FxHashMap<InstanceHandle, MeshId>,
    next_handle: u64,
}

impl<B: GpuBackend> MeshletRenderer<B> {
    /// Creates a renderer.
    ///
    /// # Errors
    ///
    /// [`RenderError::Config`] if `config` is invalid.
    pub fn new(backend: B, config: MeshletPipelineConfig) -> RenderResult<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            config,
            cache: MeshletCache::new(config.budget),
            orchestrator: CullDrawOrchestrator::new(config),
            instances: FxHashMap::default(),
            next_handle: 1,
        })
    }

    /// Places an instance of `mesh`.
    ///
    /// # Errors
    ///
    /// Any error of [`MeshletCache::acquire`]. No handle is issued.
    pub fn spawn(&mut self, mesh: &MeshAsset, transform: Mat4) -> RenderResult<InstanceHandle> {
        let handle = InstanceHandle::from_raw(self.next_handle);
        let mesh_id = self.cache.acquire(&mut self.backend, mesh, handle, transform)?;
        self.next_handle += 1;
        self.instances.insert(handle, mesh_id);
        Ok(handle)
    }

    /// Removes an instance.
    ///
    /// # Errors
    ///
    /// [`RenderError::UnknownInstance`] if `handle` is not live.
    pub fn despawn(&mut self, handle: InstanceHandle) -> RenderResult<()> {
        let mesh_id = self
            .instances
            .remove(&handle)
            .ok_or(RenderError::UnknownInstance(handle))?;
        self.cache.release(&mut self.backend, mesh_id, handle)
    }

    /// Moves an instance.
    ///
    /// # Errors
    ///
    /// [`RenderError::UnknownInstance`] if `handle` is not live.
    pub fn set_transform(&mut self, handle: InstanceHandle, transform: Mat4) -> RenderResult<()> {
        let mesh_id = self.mesh_of(handle)?;
        self.cache.set_transform(mesh_id, handle, transform)
    }

    /// Shows or hides an instance.
    ///
    /// # Errors
    ///
    /// [`RenderError::UnknownInstance`] if `handle` is not live.
    pub fn set_enabled(&mut self, handle: InstanceHandle, enabled: bool) -> RenderResult<()> {
        let mesh_id = self.mesh_of(handle)?;
        self.cache.set_enabled(mesh_id, handle, enabled)
    }

    fn mesh_of(&self, handle: InstanceHandle) -> RenderResult<MeshId> {
        self.instances
            .get(&handle)
            .copied()
            .ok_or(RenderError::UnknownInstance(handle))
    }

    /// Culls and draws one frame.
    pub fn render_frame(&mut self, cameras: &FrameCameras) -> FrameReport {
        self.orchestrator
            .execute_frame(&mut self.backend, &mut self.cache, cameras)
    }

    /// Releases every GPU resource and forgets every instance.
    pub fn reload(&mut self) {
        let stats = self.cache.stats();
        self.orchestrator.release_all(&mut self.backend);
        self.cache.release_all(&mut self.backend);
        self.instances.clear();
        if stats.entries > 0 {
            info!(
                "meshlet renderer reloaded: dropped {} meshes, {} instances",
                stats.entries, stats.instances
            );
        }
    }

    /// Mesh of a live instance.
    #[must_use]
    pub fn mesh_id(&self, handle: InstanceHandle) -> Option<MeshId> {
        self.instances.get(&handle).copied()
    }

    /// Live instances.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Cache totals.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> &MeshletPipelineConfig {
        &self.config
    }

    /// Mesh cache.
    #[must_use]
    pub const fn cache(&self) -> &MeshletCache<B> {
        &self.cache
    }

    /// Backend.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Backend, mutably. Buffers owned by the renderer must not be
    /// released through it.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: GpuBackend> Drop for MeshletRenderer<B> {
    fn drop(&mut self) {
        self.reload();
    }
}
