//! Mesh and instance identity.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lattice_meshlet::SourceMesh;

static NEXT_MESH_ID: AtomicU64 = AtomicU64::new(1);

/// Stable id of a loaded mesh asset. Cache key for shared geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MeshId(u64);

impl MeshId {
    /// Wraps a raw id.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MeshId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mesh#{}", self.0)
    }
}

/// Stable id of one placed instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceHandle(u64);

impl InstanceHandle {
    /// Wraps a raw handle.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw handle value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance#{}", self.0)
    }
}

/// A source mesh with its id.
///
/// Clones share the id and the mesh, so every clone maps to the same
/// cache entry.
#[derive(Debug, Clone)]
pub struct MeshAsset {
    id: MeshId,
    mesh: Arc<SourceMesh>,
}

impl MeshAsset {
    /// Loads a mesh under a fresh id.
    #[must_use]
    pub fn new(mesh: SourceMesh) -> Self {
        Self::from_arc(Arc::new(mesh))
    }

    /// Loads a shared mesh under a fresh id.
    #[must_use]
    pub fn from_arc(mesh: Arc<SourceMesh>) -> Self {
        Self {
            id: MeshId(NEXT_MESH_ID.fetch_add(1, Ordering::Relaxed)),
            mesh,
        }
    }

    /// Asset id.
    #[must_use]
    pub const fn id(&self) -> MeshId {
        self.id
    }

    /// Source geometry.
    #[must_use]
    pub fn mesh(&self) -> &SourceMesh {
        &self.mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_meshlet::primitives;

    #[test]
    fn test_ids_are_unique_and_shared_by_clones() {
        let a = MeshAsset::new(primitives::cube(1.0));
        let b = MeshAsset::new(primitives::cube(1.0));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn test_display() {
        assert_eq!(MeshId::from_raw(7).to_string(), "mesh#7");
        assert_eq!(InstanceHandle::from_raw(3).to_string(), "instance#3");
    }
}
