//! One-call meshlet build: validate, partition, cull data, convert.

use tracing::{debug, warn};

use crate::adjacency::TriangleAdjacency;
use crate::bounds::{compute_cull_data, CullData};
use crate::convert::{convert, ConvertedMesh};
use crate::error::MeshletResult;
use crate::mesh::SourceMesh;
use crate::partition::{partition, Meshlet, MeshletBudget, Partition};

/// Everything produced offline for one source mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshletGeometry {
    /// Meshlet descriptors.
    pub meshlets: Vec<Meshlet>,
    /// Culling record per meshlet, same order as `meshlets`.
    pub cull_data: Vec<CullData>,
    /// Raw partition buffers.
    pub partition: Partition,
    /// Per-meshlet contiguous vertex and index streams.
    pub converted: ConvertedMesh,
    /// Budget the geometry was built with.
    pub budget: MeshletBudget,
}

impl MeshletGeometry {
    /// Number of meshlets.
    #[inline]
    #[must_use]
    pub fn meshlet_count(&self) -> usize {
        self.meshlets.len()
    }

    /// Number of triangles across all meshlets.
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.partition.triangle_count()
    }
}

/// Builds [`MeshletGeometry`] from a [`SourceMesh`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MeshletBuilder {
    budget: MeshletBudget,
}

impl MeshletBuilder {
    /// Creates a builder with the given budget.
    #[must_use]
    pub const fn new(budget: MeshletBudget) -> Self {
        Self { budget }
    }

    /// Budget used by this builder.
    #[must_use]
    pub const fn budget(&self) -> MeshletBudget {
        self.budget
    }

    /// Runs the full pipeline.
    ///
    /// # Errors
    ///
    /// Returns the first validation error of `mesh` or of the budget.
    pub fn build(&self, mesh: &SourceMesh) -> MeshletResult<MeshletGeometry> {
        self.budget.validate()?;
        mesh.validate()?;

        let degenerate = mesh.degenerate_triangle_count();
        if degenerate > 0 {
            warn!(
                "mesh has {} degenerate triangles out of {}",
                degenerate,
                mesh.triangle_count()
            );
        }

        let adjacency = TriangleAdjacency::build(&mesh.indices)?;
        let partition = partition(&mesh.indices, mesh.vertex_count(), &adjacency, self.budget)?;
        let cull_data = partition
            .meshlets
            .iter()
            .map(|m| compute_cull_data(m, &partition, &mesh.positions))
            .collect();
        let converted = convert(mesh, &partition);

        debug!(
            "built {} meshlets from {} triangles ({} links, {} converted vertices)",
            partition.meshlets.len(),
            mesh.triangle_count(),
            adjacency.link_count(),
            converted.vertices.len()
        );

        Ok(MeshletGeometry {
            meshlets: partition.meshlets.clone(),
            cull_data,
            partition,
            converted,
            budget: self.budget,
        })
    }
}
