//! Per-frame results.

use crate::cache::MeshId;
use crate::gpu::VisibleMeshlet;

/// Counters for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Groups dispatched and drawn.
    pub groups_drawn: u32,
    /// Groups with no enabled instance.
    pub groups_skipped_empty: u32,
    /// Groups whose combined bounds were outside the cull frustum.
    pub groups_frustum_culled: u32,
    /// Groups skipped by an allocation failure or an addressing limit.
    pub groups_failed: u32,
    /// Instances uploaded.
    pub instances_submitted: u32,
    /// (meshlet, instance) pairs tested.
    pub meshlet_tests: u64,
    /// Culling workgroups launched.
    pub dispatched_workgroups: u64,
    /// Draw buffer sets allocated this frame.
    pub buffer_allocations: u32,
}

/// Visible list of one group, read back for debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupReadback {
    /// Group mesh.
    pub mesh_id: MeshId,
    /// Instance count written into the indirect arguments.
    pub visible_count: u32,
    /// Appended records.
    pub visible: Vec<VisibleMeshlet>,
}

/// Result of one [`execute_frame`](super::CullDrawOrchestrator::execute_frame).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Index of the frame, counting from 0.
    pub frame_index: u64,
    /// Counters.
    pub stats: FrameStats,
    /// Per-group visible lists. Empty unless built with the
    /// `debug-readback` feature and enabled in the config.
    pub readbacks: Vec<GroupReadback>,
}
