//! Mesh cache: one GPU geometry set per unique mesh, shared by reference
//! count across every instance of that mesh.
//!
//! The first [`MeshletCache::acquire`] of a mesh builds its meshlets and
//! uploads them. Later acquires only add an instance record. The last
//! [`MeshletCache::release`] frees the GPU buffers and purges the entry.
//! Instance lists are rebuilt lazily by [`MeshletCache::rebuild_dirty`],
//! once per frame.

mod asset;
mod entry;
mod instances;

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use glam::Mat4;
use lattice_meshlet::{MeshletBudget, MeshletBuilder};
use tracing::{debug, error, info};

pub use asset::{InstanceHandle, MeshAsset, MeshId};
pub use entry::{CacheEntry, GpuGeometry};
pub use instances::{InstanceGroup, InstanceRecord};

use crate::error::{RenderError, RenderResult};
use crate::gpu::{GpuBackend, VISIBLE_INDEX_LIMIT};

/// Cache totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Unique meshes resident.
    pub entries: usize,
    /// Instances across all meshes.
    pub instances: usize,
    /// Bytes of uploaded geometry.
    pub gpu_bytes: u64,
}

/// Logs and builds a cache inconsistency error.
fn inconsistency(message: String) -> RenderError {
    error!("mesh cache inconsistency: {}", message);
    RenderError::CacheInconsistency(message)
}

/// Reference-counted meshlet geometry cache.
#[derive(Debug)]
pub struct MeshletCache<B: GpuBackend> {
    builder: MeshletBuilder,
    entries: BTreeMap<MeshId, CacheEntry<B>>,
    groups: BTreeMap<MeshId, InstanceGroup>,
    dirty: BTreeSet<MeshId>,
}

impl<B: GpuBackend> MeshletCache<B> {
    /// Creates an empty cache building meshlets under `budget`.
    #[must_use]
    pub fn new(budget: MeshletBudget) -> Self {
        Self {
            builder: MeshletBuilder::new(budget),
            entries: BTreeMap::new(),
            groups: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    /// Adds `instance` of `asset`, building and uploading the mesh on first
    /// use.
    ///
    /// # Errors
    ///
    /// - [`RenderError::Build`] if the mesh is invalid.
    /// - [`RenderError::TooManyMeshlets`] if the mesh does not fit the
    ///   visible record packing.
    /// - [`RenderError::Gpu`] if an upload fails. Nothing is cached.
    /// - [`RenderError::CacheInconsistency`] if `instance` is already
    ///   registered for this mesh.
    pub fn acquire(
        &mut self,
        gpu: &mut B,
        asset: &MeshAsset,
        instance: InstanceHandle,
        transform: Mat4,
    ) -> RenderResult<MeshId> {
        let mesh_id = asset.id();
        if self.groups.get(&mesh_id).is_some_and(|g| g.contains(instance)) {
            return Err(inconsistency(format!(
                "{instance} acquired twice for {mesh_id}"
            )));
        }

        let entry = match self.entries.entry(mesh_id) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => {
                let created = Self::create_entry(&self.builder, gpu, asset)?;
                info!(
                    "cached {}: {} meshlets, {} bytes",
                    mesh_id,
                    created.meshlet_count(),
                    created.gpu().byte_size
                );
                vacant.insert(created)
            }
        };
        entry.add_ref();

        self.groups.entry(mesh_id).or_default().push(InstanceRecord {
            handle: instance,
            transform,
            enabled: true,
        });
        self.dirty.insert(mesh_id);
        Ok(mesh_id)
    }

    fn create_entry(builder: &MeshletBuilder, gpu: &mut B, asset: &MeshAsset) -> RenderResult<CacheEntry<B>> {
        let mesh_id = asset.id();
        let geometry = builder.build(asset.mesh())?;
        if geometry.meshlet_count() > VISIBLE_INDEX_LIMIT {
            return Err(RenderError::TooManyMeshlets {
                mesh: mesh_id,
                count: geometry.meshlet_count(),
                limit: VISIBLE_INDEX_LIMIT,
            });
        }
        let uploaded = GpuGeometry::upload(gpu, &geometry)?;
        Ok(CacheEntry::new(mesh_id, geometry, uploaded))
    }

    /// Removes `instance` from `mesh_id`. The last release frees the
    /// mesh's GPU buffers and purges it.
    ///
    /// # Errors
    ///
    /// [`RenderError::CacheInconsistency`] if the mesh is not cached or
    /// `instance` is not one of its instances. Nothing changes.
    pub fn release(&mut self, gpu: &mut B, mesh_id: MeshId, instance: InstanceHandle) -> RenderResult<()> {
        let (Some(entry), Some(group)) = (self.entries.get_mut(&mesh_id), self.groups.get_mut(&mesh_id)) else {
            return Err(inconsistency(format!(
                "release of {instance} from uncached {mesh_id}"
            )));
        };
        if group.remove(instance).is_none() {
            return Err(inconsistency(format!(
                "{instance} is not an instance of {mesh_id}"
            )));
        }

        if entry.remove_ref() == 0 {
            self.purge(gpu, mesh_id);
        } else {
            self.dirty.insert(mesh_id);
        }
        Ok(())
    }

    fn purge(&mut self, gpu: &mut B, mesh_id: MeshId) {
        self.groups.remove(&mesh_id);
        self.dirty.remove(&mesh_id);
        if let Some(entry) = self.entries.remove(&mesh_id) {
            let bytes = entry.gpu().byte_size;
            entry.release(gpu);
            info!("purged {}: freed {} bytes", mesh_id, bytes);
        }
    }

    /// Frees every entry regardless of reference count.
    pub fn release_all(&mut self, gpu: &mut B) {
        let count = self.entries.len();
        for (_, entry) in std::mem::take(&mut self.entries) {
            entry.release(gpu);
        }
        self.groups.clear();
        self.dirty.clear();
        if count > 0 {
            info!("released all {} cached meshes", count);
        }
    }

    /// Replaces an instance's transform.
    ///
    /// # Errors
    ///
    /// [`RenderError::CacheInconsistency`] for an unknown mesh or instance.
    pub fn set_transform(&mut self, mesh_id: MeshId, instance: InstanceHandle, transform: Mat4) -> RenderResult<()> {
        let changed = self
            .groups
            .get_mut(&mesh_id)
            .and_then(|g| g.set_transform(instance, transform))
            .ok_or_else(|| inconsistency(format!("{instance} of {mesh_id} is not cached")))?;
        if changed {
            self.dirty.insert(mesh_id);
        }
        Ok(())
    }

    /// Enables or disables an instance without releasing it.
    ///
    /// # Errors
    ///
    /// [`RenderError::CacheInconsistency`] for an unknown mesh or instance.
    pub fn set_enabled(&mut self, mesh_id: MeshId, instance: InstanceHandle, enabled: bool) -> RenderResult<()> {
        let changed = self
            .groups
            .get_mut(&mesh_id)
            .and_then(|g| g.set_enabled(instance, enabled))
            .ok_or_else(|| inconsistency(format!("{instance} of {mesh_id} is not cached")))?;
        if changed {
            self.dirty.insert(mesh_id);
        }
        Ok(())
    }

    /// Rebuilds world arrays of every dirty group. Returns how many were
    /// rebuilt.
    pub fn rebuild_dirty(&mut self) -> usize {
        let mut rebuilt = 0;
        for mesh_id in std::mem::take(&mut self.dirty) {
            if let (Some(entry), Some(group)) = (self.entries.get(&mesh_id), self.groups.get_mut(&mesh_id)) {
                group.rebuild(entry.local_bounds());
                rebuilt += 1;
            }
        }
        if rebuilt > 0 {
            debug!("rebuilt {} instance groups", rebuilt);
        }
        rebuilt
    }

    /// Cached entry for `mesh_id`.
    #[must_use]
    pub fn entry(&self, mesh_id: MeshId) -> Option<&CacheEntry<B>> {
        self.entries.get(&mesh_id)
    }

    /// Instance group for `mesh_id`.
    #[must_use]
    pub fn group(&self, mesh_id: MeshId) -> Option<&InstanceGroup> {
        self.groups.get(&mesh_id)
    }

    /// Entries with their groups, in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (&CacheEntry<B>, &InstanceGroup)> {
        self.entries
            .iter()
            .filter_map(|(id, entry)| Some((entry, self.groups.get(id)?)))
    }

    /// Cached ids, ascending.
    pub fn mesh_ids(&self) -> impl Iterator<Item = MeshId> + '_ {
        self.entries.keys().copied()
    }

    /// Returns true if `mesh_id` is resident.
    #[must_use]
    pub fn contains(&self, mesh_id: MeshId) -> bool {
        self.entries.contains_key(&mesh_id)
    }

    /// Number of unique meshes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reference count of `mesh_id`, 0 if not cached.
    #[must_use]
    pub fn ref_count(&self, mesh_id: MeshId) -> usize {
        self.entries.get(&mesh_id).map_or(0, CacheEntry::ref_count)
    }

    /// Current totals.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            instances: self.groups.values().map(InstanceGroup::len).sum(),
            gpu_bytes: self.entries.values().map(|e| e.gpu().byte_size).sum(),
        }
    }
}
