//! Triangle-to-triangle adjacency via shared edges.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::{MeshletError, MeshletResult};

/// Undirected edge key, smaller index first.
type EdgeKey = (u32, u32);

#[inline]
fn edge_key(a: u32, b: u32) -> EdgeKey {
    if a < b { (a, b) } else { (b, a) }
}

/// Neighbor lists for every triangle of an index buffer.
///
/// Two triangles are neighbors when they share an undirected edge.
/// Boundary edges produce no link. Non-manifold edges link every pair
/// of triangles sharing them.
#[derive(Debug, Clone, Default)]
pub struct TriangleAdjacency {
    neighbors: Vec<SmallVec<[u32; 3]>>,
}

impl TriangleAdjacency {
    /// Builds adjacency for a triangle list.
    ///
    /// Neighbor order is deterministic: for each triangle, its edges are
    /// visited in corner order and linked triangles in ascending index.
    ///
    /// # Errors
    ///
    /// [`MeshletError::InvalidIndexCount`] if `indices.len()` is not a
    /// multiple of three.
    pub fn build(indices: &[u32]) -> MeshletResult<Self> {
        if indices.len() % 3 != 0 {
            return Err(MeshletError::InvalidIndexCount(indices.len()));
        }

        let triangle_count = indices.len() / 3;
        let mut edges: FxHashMap<EdgeKey, SmallVec<[u32; 2]>> = FxHashMap::default();
        edges.reserve(indices.len());

        for (t, tri) in indices.chunks_exact(3).enumerate() {
            for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
                edges.entry(edge_key(a, b)).or_default().push(t as u32);
            }
        }

        let mut neighbors: Vec<SmallVec<[u32; 3]>> = vec![SmallVec::new(); triangle_count];
        for (t, tri) in indices.chunks_exact(3).enumerate() {
            for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
                let Some(sharing) = edges.get(&edge_key(a, b)) else {
                    continue;
                };
                for &other in sharing {
                    if other as usize != t && !neighbors[t].contains(&other) {
                        neighbors[t].push(other);
                    }
                }
            }
        }

        Ok(Self { neighbors })
    }

    /// Neighbors of triangle `triangle`.
    #[inline]
    #[must_use]
    pub fn neighbors(&self, triangle: usize) -> &[u32] {
        &self.neighbors[triangle]
    }

    /// Number of triangles covered.
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.neighbors.len()
    }

    /// Number of undirected links.
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.neighbors.iter().map(SmallVec::len).sum::<usize>() / 2
    }
}
