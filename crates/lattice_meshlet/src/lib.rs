//! # Lattice Meshlet Builder
//!
//! Offline half of the meshlet pipeline. Splits an indexed triangle mesh
//! into small connected clusters and computes the record the GPU uses to
//! cull each cluster.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     MESHLET BUILD                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │  SourceMesh → TriangleAdjacency → partition() → Partition    │
//! │                                        ↓                     │
//! │                  compute_cull_data() → CullData[]            │
//! │                                        ↓                     │
//! │                  convert()           → ConvertedMesh         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - Every triangle lands in exactly one meshlet
//! - No meshlet exceeds its vertex or triangle budget
//! - Degenerate triangles never put NaN into a cull record
//! - No GPU dependency; `lattice_rendering` owns all device work

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]

pub mod adjacency;
pub mod bounds;
pub mod builder;
pub mod convert;
pub mod error;
pub mod mesh;
pub mod partition;
pub mod primitives;

pub use adjacency::TriangleAdjacency;
pub use bounds::{
    compute_cull_data, cone_cutoff, decode_unit_byte, encode_unit_byte, CullData, NormalCone,
    NEVER_CULL_CUTOFF,
};
pub use builder::{MeshletBuilder, MeshletGeometry};
pub use convert::{convert, ConvertedMesh, MeshletVertex};
pub use error::{MeshletError, MeshletResult};
pub use mesh::SourceMesh;
pub use partition::{partition, Meshlet, MeshletBudget, Partition, MAX_TRIANGLES, MAX_VERTICES};

/// Re-export for callers building [`SourceMesh`] values.
pub use glam;
