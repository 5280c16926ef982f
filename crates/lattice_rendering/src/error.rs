//! Error types for the rendering side of the meshlet pipeline.

use lattice_meshlet::MeshletError;
use thiserror::Error;

use crate::cache::{InstanceHandle, MeshId};
use crate::gpu::GpuError;

/// Errors raised by the cache, the orchestrator and the renderer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    /// Meshlet build failed for a mesh on its first acquire.
    #[error("meshlet build failed: {0}")]
    Build(#[from] MeshletError),

    /// GPU resource operation failed.
    #[error("gpu: {0}")]
    Gpu(#[from] GpuError),

    /// Cache maps disagree with the caller's view of instance lifetimes.
    #[error("cache inconsistency: {0}")]
    CacheInconsistency(String),

    /// Mesh produced more meshlets than a visibility record can address.
    #[error("mesh {mesh} has {count} meshlets, limit is {limit}")]
    TooManyMeshlets {
        /// Mesh id.
        mesh: MeshId,
        /// Meshlet count.
        count: usize,
        /// Addressable limit.
        limit: usize,
    },

    /// Group has more enabled instances than a visibility record can address.
    #[error("mesh {mesh} has {count} instances, limit is {limit}")]
    TooManyInstances {
        /// Mesh id.
        mesh: MeshId,
        /// Instance count.
        count: usize,
        /// Addressable limit.
        limit: usize,
    },

    /// Handle was never spawned or was already despawned.
    #[error("unknown instance {0}")]
    UnknownInstance(InstanceHandle),

    /// Pipeline configuration is invalid or unreadable.
    #[error("config: {0}")]
    Config(String),
}

/// Result type for rendering operations.
pub type RenderResult<T> = Result<T, RenderError>;
