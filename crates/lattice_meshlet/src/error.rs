//! Error types for meshlet construction.

use thiserror::Error;

/// Errors raised while validating or partitioning a source mesh.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshletError {
    /// Index buffer length is not a multiple of three.
    #[error("index count {0} is not a multiple of 3")]
    InvalidIndexCount(usize),

    /// An index references a vertex past the end of the position array.
    #[error("index {index} at position {at} out of range for {vertex_count} vertices")]
    IndexOutOfRange {
        /// Offending index value.
        index: u32,
        /// Position of the index in the buffer.
        at: usize,
        /// Number of vertices in the mesh.
        vertex_count: usize,
    },

    /// Mesh has no triangles.
    #[error("mesh has no triangles")]
    EmptyMesh,

    /// An optional attribute stream does not match the position count.
    #[error("{attribute} has {actual} elements, expected {expected}")]
    AttributeLengthMismatch {
        /// Attribute name.
        attribute: &'static str,
        /// Expected element count.
        expected: usize,
        /// Actual element count.
        actual: usize,
    },

    /// A vertex position contains NaN or infinity.
    #[error("vertex {0} has a non-finite position")]
    NonFinitePosition(usize),

    /// Cluster budget outside the supported range.
    #[error("invalid meshlet budget: {0}")]
    InvalidBudget(String),
}

/// Result type for meshlet operations.
pub type MeshletResult<T> = Result<T, MeshletError>;
