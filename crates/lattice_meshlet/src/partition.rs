//! Greedy breadth-first meshlet partitioning.
//!
//! Each cluster grows from the lowest unvisited triangle through the
//! adjacency graph, in FIFO order, until its vertex or triangle budget
//! would be exceeded. Triangles that do not fit stay unvisited and seed
//! or join a later cluster, so every triangle is emitted exactly once.

use std::collections::VecDeque;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::adjacency::TriangleAdjacency;
use crate::error::{MeshletError, MeshletResult};

/// Default vertex budget per meshlet.
pub const MAX_VERTICES: u32 = 64;

/// Default triangle budget per meshlet.
pub const MAX_TRIANGLES: u32 = 126;

/// Largest triangle budget accepted by [`MeshletBudget::validate`].
pub const TRIANGLE_BUDGET_LIMIT: u32 = 512;

/// Local slot marker for a vertex not yet in the current cluster.
const UNUSED: u8 = 0xff;

/// Per-cluster vertex and triangle limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshletBudget {
    /// Maximum unique vertices per meshlet.
    pub max_vertices: u32,
    /// Maximum triangles per meshlet.
    pub max_triangles: u32,
}

impl Default for MeshletBudget {
    fn default() -> Self {
        Self {
            max_vertices: MAX_VERTICES,
            max_triangles: MAX_TRIANGLES,
        }
    }
}

impl MeshletBudget {
    /// Creates a budget.
    #[must_use]
    pub const fn new(max_vertices: u32, max_triangles: u32) -> Self {
        Self {
            max_vertices,
            max_triangles,
        }
    }

    /// Checks the budget against the local index width.
    ///
    /// # Errors
    ///
    /// [`MeshletError::InvalidBudget`] unless `3 <= max_vertices <= 255`
    /// and `1 <= max_triangles <= 512`.
    pub fn validate(&self) -> MeshletResult<()> {
        if !(3..=u32::from(UNUSED)).contains(&self.max_vertices) {
            return Err(MeshletError::InvalidBudget(format!(
                "max_vertices must be in 3..=255, got {}",
                self.max_vertices
            )));
        }
        if !(1..=TRIANGLE_BUDGET_LIMIT).contains(&self.max_triangles) {
            return Err(MeshletError::InvalidBudget(format!(
                "max_triangles must be in 1..={TRIANGLE_BUDGET_LIMIT}, got {}",
                self.max_triangles
            )));
        }
        Ok(())
    }

    /// Index count of a full meshlet, the per-instance count of one
    /// indirect draw.
    #[inline]
    #[must_use]
    pub const fn max_index_count(&self) -> u32 {
        self.max_triangles * 3
    }
}

/// One cluster of connected triangles.
///
/// GPU layout, 16 bytes:
///
/// | Offset | Field             |
/// |--------|-------------------|
/// | 0      | `vertex_offset`   |
/// | 4      | `vertex_count`    |
/// | 8      | `triangle_offset` |
/// | 12     | `triangle_count`  |
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Meshlet {
    /// First entry in [`Partition::vertices`].
    pub vertex_offset: u32,
    /// Number of unique vertices.
    pub vertex_count: u32,
    /// First entry in [`Partition::triangles`], counted in indices.
    pub triangle_offset: u32,
    /// Number of triangles.
    pub triangle_count: u32,
}

impl Meshlet {
    /// Range of this meshlet's entries in the global vertex list.
    #[inline]
    #[must_use]
    pub fn vertex_range(&self) -> std::ops::Range<usize> {
        let start = self.vertex_offset as usize;
        start..start + self.vertex_count as usize
    }

    /// Range of this meshlet's local indices in the triangle list.
    #[inline]
    #[must_use]
    pub fn index_range(&self) -> std::ops::Range<usize> {
        let start = self.triangle_offset as usize;
        start..start + self.triangle_count as usize * 3
    }
}

/// Output of [`partition`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    /// Meshlet descriptors in emission order.
    pub meshlets: Vec<Meshlet>,
    /// Source vertex index for every meshlet-local vertex, all meshlets
    /// concatenated.
    pub vertices: Vec<u32>,
    /// Meshlet-local vertex indices, three per triangle, all meshlets
    /// concatenated.
    pub triangles: Vec<u8>,
    /// Source triangle index for every emitted triangle, parallel to
    /// `triangles` divided by three.
    pub source_triangles: Vec<u32>,
}

impl Partition {
    /// Source vertex indices of a meshlet.
    #[must_use]
    pub fn meshlet_vertices(&self, meshlet: &Meshlet) -> &[u32] {
        &self.vertices[meshlet.vertex_range()]
    }

    /// Local triangle indices of a meshlet.
    #[must_use]
    pub fn meshlet_triangles(&self, meshlet: &Meshlet) -> &[u8] {
        &self.triangles[meshlet.index_range()]
    }

    /// Total triangles across all meshlets.
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.triangles.len() / 3
    }
}

/// Cluster under construction.
struct ClusterBuilder {
    local: Vec<u8>,
    vertices: Vec<u32>,
    triangles: Vec<u8>,
    source_triangles: Vec<u32>,
}

impl ClusterBuilder {
    fn new(vertex_count: usize) -> Self {
        Self {
            local: vec![UNUSED; vertex_count],
            vertices: Vec::new(),
            triangles: Vec::new(),
            source_triangles: Vec::new(),
        }
    }

    fn triangle_count(&self) -> usize {
        self.triangles.len() / 3
    }

    fn new_vertex_count(&self, corners: [u32; 3]) -> usize {
        let [a, b, c] = corners;
        let mut added = usize::from(self.local[a as usize] == UNUSED);
        added += usize::from(b != a && self.local[b as usize] == UNUSED);
        added += usize::from(c != a && c != b && self.local[c as usize] == UNUSED);
        added
    }

    fn push(&mut self, triangle: u32, corners: [u32; 3]) {
        for v in corners {
            let slot = &mut self.local[v as usize];
            if *slot == UNUSED {
                // Budget validation keeps the count below UNUSED.
                *slot = self.vertices.len() as u8;
                self.vertices.push(v);
            }
            self.triangles.push(*slot);
        }
        self.source_triangles.push(triangle);
    }

    /// Moves the cluster into `out` and clears the local map.
    fn flush(&mut self, out: &mut Partition) {
        if self.triangles.is_empty() {
            return;
        }
        for &v in &self.vertices {
            self.local[v as usize] = UNUSED;
        }
        out.meshlets.push(Meshlet {
            vertex_offset: out.vertices.len() as u32,
            vertex_count: self.vertices.len() as u32,
            triangle_offset: out.triangles.len() as u32,
            triangle_count: self.triangle_count() as u32,
        });
        out.vertices.append(&mut self.vertices);
        out.triangles.append(&mut self.triangles);
        out.source_triangles.append(&mut self.source_triangles);
    }
}

/// Partitions a triangle list into meshlets.
///
/// `vertex_count` is the length of the source vertex streams and
/// `adjacency` must have been built from the same `indices`.
///
/// # Errors
///
/// - [`MeshletError::InvalidBudget`] if `budget` fails validation.
/// - [`MeshletError::InvalidIndexCount`] if `indices` is not a triangle list
///   or does not match `adjacency`.
/// - [`MeshletError::IndexOutOfRange`] if an index is past `vertex_count`.
pub fn partition(
    indices: &[u32],
    vertex_count: usize,
    adjacency: &TriangleAdjacency,
    budget: MeshletBudget,
) -> MeshletResult<Partition> {
    budget.validate()?;
    if indices.len() % 3 != 0 || indices.len() / 3 != adjacency.triangle_count() {
        return Err(MeshletError::InvalidIndexCount(indices.len()));
    }
    if let Some(at) = indices.iter().position(|&i| i as usize >= vertex_count) {
        return Err(MeshletError::IndexOutOfRange {
            index: indices[at],
            at,
            vertex_count,
        });
    }

    let triangle_count = indices.len() / 3;
    let max_vertices = budget.max_vertices as usize;
    let max_triangles = budget.max_triangles as usize;
    let corners = |t: usize| [indices[t * 3], indices[t * 3 + 1], indices[t * 3 + 2]];

    let mut out = Partition {
        triangles: Vec::with_capacity(indices.len()),
        source_triangles: Vec::with_capacity(triangle_count),
        ..Partition::default()
    };
    let mut visited = vec![false; triangle_count];
    let mut cluster = ClusterBuilder::new(vertex_count);
    let mut queue = VecDeque::new();

    for seed in 0..triangle_count {
        if visited[seed] {
            continue;
        }
        queue.push_back(seed as u32);

        while let Some(t) = queue.pop_front() {
            let t = t as usize;
            if visited[t] {
                continue;
            }
            let tri = corners(t);
            let added = cluster.new_vertex_count(tri);
            if cluster.triangle_count() + 1 > max_triangles
                || cluster.vertices.len() + added > max_vertices
            {
                continue;
            }

            cluster.push(t as u32, tri);
            visited[t] = true;
            queue.extend(
                adjacency
                    .neighbors(t)
                    .iter()
                    .copied()
                    .filter(|&n| !visited[n as usize]),
            );
        }

        cluster.flush(&mut out);
    }

    Ok(out)
}
