//! GPU culling and indirect draw orchestration.
//!
//! Each frame, per cached mesh in ascending id order:
//!
//! ```text
//! world matrices ─rayon─→ InstanceTransform[] ─upload─→ transforms
//!                                                          │
//! reset counter + args ──→ dispatch_cull ──→ visibility (append)
//!                                                          │
//!                          copy_counter ──→ args.instance_count
//!                                                          │
//!                          draw_indirect ──→ one batch per mesh
//! ```
//!
//! The visible count never comes back to the CPU: the counter copy and the
//! indirect draw consume it on the device.

mod buffers;
mod report;

use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::{debug, warn};

pub use report::{FrameReport, FrameStats, GroupReadback};

use self::buffers::DrawGroup;
use crate::cache::{CacheEntry, MeshId, MeshletCache};
use crate::camera::FrameCameras;
use crate::config::MeshletPipelineConfig;
use crate::gpu::{
    CullDispatch, CullingUniforms, DrawIndexedIndirectArgs, GpuBackend, InstanceTransform, MeshletDraw,
    APPEND_HEADER_SIZE, ARGS_INSTANCE_COUNT_OFFSET, VISIBLE_INDEX_LIMIT,
};

/// Per-frame inputs shared by every group.
struct FrameInputs {
    slot: usize,
    view_projection: glam::Mat4,
    cull_position: glam::Vec3,
    planes: [[f32; 4]; 6],
}

/// Issues the culling dispatch and indirect draw of every cached mesh.
#[derive(Debug)]
pub struct CullDrawOrchestrator<B: GpuBackend> {
    config: MeshletPipelineConfig,
    groups: BTreeMap<MeshId, DrawGroup<B>>,
    frame_index: u64,
    scratch: Vec<InstanceTransform>,
}

impl<B: GpuBackend> CullDrawOrchestrator<B> {
    /// Creates an orchestrator. `config` should already be validated.
    #[must_use]
    pub fn new(config: MeshletPipelineConfig) -> Self {
        Self {
            config,
            groups: BTreeMap::new(),
            frame_index: 0,
            scratch: Vec::new(),
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &MeshletPipelineConfig {
        &self.config
    }

    /// Frames executed so far.
    #[must_use]
    pub const fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Meshes currently holding draw buffers.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Records and submits one frame.
    ///
    /// Runs the cache's deferred rebuild first. A group that cannot be
    /// submitted is skipped and counted in [`FrameStats`]; the rest of the
    /// frame still draws.
    pub fn execute_frame(&mut self, gpu: &mut B, cache: &mut MeshletCache<B>, cameras: &FrameCameras) -> FrameReport {
        cache.rebuild_dirty();
        self.prune(gpu, cache);

        let frame_index = self.frame_index;
        self.frame_index += 1;

        let cull_camera = cameras.cull_camera();
        let frustum = cull_camera.frustum();
        let inputs = FrameInputs {
            slot: (frame_index % u64::from(self.config.frames_in_flight)) as usize,
            view_projection: cameras.active.view_projection(),
            cull_position: cull_camera.position,
            planes: frustum.as_arrays(),
        };

        let mut report = FrameReport {
            frame_index,
            ..FrameReport::default()
        };
        let mut drawn = Vec::new();

        gpu.begin_frame(frame_index);
        for (entry, group) in cache.iter() {
            let mesh_id = entry.mesh_id();
            let matrices = group.world_matrices();
            if matrices.is_empty() {
                report.stats.groups_skipped_empty += 1;
                continue;
            }
            if matrices.len() > VISIBLE_INDEX_LIMIT {
                warn!(
                    "{} skipped: {} instances exceed the limit of {}",
                    mesh_id,
                    matrices.len(),
                    VISIBLE_INDEX_LIMIT
                );
                report.stats.groups_failed += 1;
                continue;
            }
            if !frustum.test_aabb(&group.bounds()) {
                report.stats.groups_frustum_culled += 1;
                continue;
            }

            let view_projection = inputs.view_projection;
            matrices
                .par_iter()
                .map(|model| InstanceTransform::new(model, &view_projection))
                .collect_into_vec(&mut self.scratch);

            if self.submit_group(gpu, entry, &inputs, &mut report.stats) {
                drawn.push(mesh_id);
            } else {
                report.stats.groups_failed += 1;
            }
        }
        gpu.end_frame();

        #[cfg(feature = "debug-readback")]
        if self.config.debug_readback {
            report.readbacks = self.read_back(gpu, inputs.slot, &drawn);
        }

        debug!(
            "frame {}: {} groups drawn, {} culled, {} failed",
            frame_index,
            drawn.len(),
            report.stats.groups_frustum_culled,
            report.stats.groups_failed
        );
        report
    }

    /// Uploads, dispatches and draws one group from `self.scratch`.
    /// Returns false if its buffers could not be allocated.
    fn submit_group(&mut self, gpu: &mut B, entry: &CacheEntry<B>, inputs: &FrameInputs, stats: &mut FrameStats) -> bool {
        let mesh_id = entry.mesh_id();
        let meshlet_count = entry.meshlet_count() as u32;
        let instance_count = self.scratch.len() as u32;
        let visible_capacity = entry.meshlet_count() * self.scratch.len();

        let frames = self.config.frames_in_flight as usize;
        let group = self
            .groups
            .entry(mesh_id)
            .or_insert_with(|| DrawGroup::new(frames));
        let buffers = match group.prepare(gpu, inputs.slot, self.scratch.len(), visible_capacity) {
            Ok((buffers, allocated)) => {
                if allocated {
                    stats.buffer_allocations += 1;
                }
                buffers
            }
            Err(e) => {
                warn!("{} skipped this frame: {}", mesh_id, e);
                return false;
            }
        };

        let uniforms = CullingUniforms::new(inputs.cull_position, inputs.planes, meshlet_count, instance_count);
        gpu.write_buffer(&buffers.transforms, 0, bytemuck::cast_slice(&self.scratch));
        gpu.write_buffer(&buffers.uniforms, 0, bytemuck::bytes_of(&uniforms));
        gpu.write_buffer(&buffers.visibility, 0, &[0; APPEND_HEADER_SIZE as usize]);
        gpu.write_buffer(
            &buffers.args,
            0,
            bytemuck::bytes_of(&DrawIndexedIndirectArgs::reset(entry.index_count())),
        );

        let geometry = entry.gpu();
        let workgroups = self.config.workgroup_count(meshlet_count, instance_count);
        gpu.dispatch_cull(&CullDispatch {
            cull_data: &geometry.cull_data,
            visibility: &buffers.visibility,
            transforms: &buffers.transforms,
            uniforms: &buffers.uniforms,
            workgroups,
        });
        gpu.copy_counter(&buffers.visibility, &buffers.args, ARGS_INSTANCE_COUNT_OFFSET);
        gpu.draw_indirect(&MeshletDraw {
            vertices: &geometry.vertices,
            indices: &geometry.indices,
            meshlets: &geometry.meshlets,
            visibility: &buffers.visibility,
            transforms: &buffers.transforms,
            args: &buffers.args,
            index_count: entry.index_count(),
        });

        stats.groups_drawn += 1;
        stats.instances_submitted += instance_count;
        stats.meshlet_tests += visible_capacity as u64;
        stats.dispatched_workgroups += u64::from(workgroups);
        true
    }

    /// Frees draw buffers of meshes the cache no longer holds.
    fn prune(&mut self, gpu: &mut B, cache: &MeshletCache<B>) {
        self.groups.retain(|mesh_id, group| {
            let keep = cache.contains(*mesh_id);
            if !keep {
                group.release(gpu);
                debug!("released draw buffers of {}", mesh_id);
            }
            keep
        });
    }

    #[cfg(feature = "debug-readback")]
    fn read_back(&self, gpu: &mut B, slot: usize, drawn: &[MeshId]) -> Vec<GroupReadback> {
        let mut readbacks = Vec::with_capacity(drawn.len());
        for &mesh_id in drawn {
            let Some(buffers) = self.groups.get(&mesh_id).and_then(|g| g.get(slot)) else {
                continue;
            };
            let (args, visibility) = match (gpu.read_buffer(&buffers.args), gpu.read_buffer(&buffers.visibility)) {
                (Ok(args), Ok(visibility)) => (args, visibility),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("readback of {} failed: {}", mesh_id, e);
                    continue;
                }
            };
            let visible_count = bytemuck::pod_collect_to_vec::<u8, DrawIndexedIndirectArgs>(&args)
                .first()
                .map_or(0, |a| a.instance_count);
            let header = APPEND_HEADER_SIZE as usize;
            let end = (header + visible_count as usize * 4).min(visibility.len());
            readbacks.push(GroupReadback {
                mesh_id,
                visible_count,
                visible: bytemuck::pod_collect_to_vec(&visibility[header.min(end)..end]),
            });
        }
        readbacks
    }

    /// Frees every draw buffer.
    pub fn release_all(&mut self, gpu: &mut B) {
        for group in self.groups.values_mut() {
            group.release(gpu);
        }
        self.groups.clear();
        self.scratch.clear();
    }
}
