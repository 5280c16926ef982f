//! Software backend.
//!
//! Executes the culling kernel on the CPU against byte buffers laid out
//! exactly like the GPU ones, and records every draw. Allocation failure
//! can be simulated with a memory budget.

use bytemuck::Pod;
use glam::Vec3;
use lattice_meshlet::CullData;
use rustc_hash::FxHashMap;
use tracing::error;

use super::layout::{
    CullingUniforms, DrawIndexedIndirectArgs, InstanceTransform, VisibleMeshlet, APPEND_HEADER_SIZE,
};
use super::{BufferDesc, BufferKind, CullDispatch, GpuBackend, GpuError, MeshletDraw};
use crate::config::DEFAULT_WORKGROUP_SIZE;
use crate::culling::{Frustum, InstanceCull, Plane};

/// Handle to a [`CpuBackend`] buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuBuffer(u64);

impl CpuBuffer {
    /// Raw handle value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
struct Storage {
    label: String,
    kind: BufferKind,
    data: Vec<u8>,
}

/// A culling dispatch as executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedDispatch {
    /// Frame the dispatch belongs to.
    pub frame: u64,
    /// Workgroups launched.
    pub workgroups: u32,
    /// Meshlets per instance.
    pub meshlet_count: u32,
    /// Instances tested.
    pub instance_count: u32,
}

/// An indirect draw as it would be consumed by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDraw {
    /// Frame the draw belongs to.
    pub frame: u64,
    /// Arguments at draw time.
    pub args: DrawIndexedIndirectArgs,
    /// Visible records the draw expands.
    pub visible: Vec<VisibleMeshlet>,
    /// Meshlet buffer bound to the draw.
    pub meshlets: CpuBuffer,
}

/// CPU emulation of [`GpuBackend`].
#[derive(Debug)]
pub struct CpuBackend {
    buffers: FxHashMap<u64, Storage>,
    next_id: u64,
    workgroup_size: u32,
    memory_budget: Option<u64>,
    allocated_bytes: u64,
    allocation_count: u64,
    frame: u64,
    dispatches: Vec<RecordedDispatch>,
    draws: Vec<RecordedDraw>,
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuBackend {
    /// Creates a backend with the default workgroup size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_workgroup_size(DEFAULT_WORKGROUP_SIZE)
    }

    /// Creates a backend emulating `workgroup_size` threads per group.
    #[must_use]
    pub fn with_workgroup_size(workgroup_size: u32) -> Self {
        Self {
            buffers: FxHashMap::default(),
            next_id: 1,
            workgroup_size: workgroup_size.max(1),
            memory_budget: None,
            allocated_bytes: 0,
            allocation_count: 0,
            frame: 0,
            dispatches: Vec::new(),
            draws: Vec::new(),
        }
    }

    /// Limits total live bytes; allocations beyond it fail.
    pub fn set_memory_budget(&mut self, budget: Option<u64>) {
        self.memory_budget = budget;
    }

    /// Number of live buffers.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Number of live buffers of `kind`.
    #[must_use]
    pub fn live_buffers_of(&self, kind: BufferKind) -> usize {
        self.buffers.values().filter(|s| s.kind == kind).count()
    }

    /// Bytes held by live buffers.
    #[must_use]
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes
    }

    /// Successful allocations since creation.
    #[must_use]
    pub fn allocation_count(&self) -> u64 {
        self.allocation_count
    }

    /// Returns true if `buffer` is live.
    #[must_use]
    pub fn is_live(&self, buffer: CpuBuffer) -> bool {
        self.buffers.contains_key(&buffer.0)
    }

    /// Label of a live buffer.
    #[must_use]
    pub fn label(&self, buffer: CpuBuffer) -> Option<&str> {
        self.buffers.get(&buffer.0).map(|s| s.label.as_str())
    }

    /// Dispatches recorded since the last [`take_dispatches`](Self::take_dispatches).
    #[must_use]
    pub fn dispatches(&self) -> &[RecordedDispatch] {
        &self.dispatches
    }

    /// Draws recorded since the last [`take_draws`](Self::take_draws).
    #[must_use]
    pub fn draws(&self) -> &[RecordedDraw] {
        &self.draws
    }

    /// Drains recorded dispatches.
    pub fn take_dispatches(&mut self) -> Vec<RecordedDispatch> {
        std::mem::take(&mut self.dispatches)
    }

    /// Drains recorded draws.
    pub fn take_draws(&mut self) -> Vec<RecordedDraw> {
        std::mem::take(&mut self.draws)
    }

    fn bytes(&self, buffer: &CpuBuffer) -> &[u8] {
        self.buffers.get(&buffer.0).map_or(&[], |s| s.data.as_slice())
    }

    fn read_records<T: Pod>(&self, buffer: &CpuBuffer, offset: usize, count: usize) -> Vec<T> {
        let bytes = self.bytes(buffer);
        let end = (offset + count * std::mem::size_of::<T>()).min(bytes.len());
        bytemuck::pod_collect_to_vec(&bytes[offset.min(end)..end])
    }

    fn read_u32(&self, buffer: &CpuBuffer, offset: usize) -> u32 {
        self.read_records::<u32>(buffer, offset, 1)
            .first()
            .copied()
            .unwrap_or(0)
    }
}

impl GpuBackend for CpuBackend {
    type Buffer = CpuBuffer;

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<CpuBuffer, GpuError> {
        if let Some(budget) = self.memory_budget {
            if self.allocated_bytes + desc.size > budget {
                return Err(GpuError::OutOfMemory {
                    label: desc.label.to_owned(),
                    size: desc.size,
                });
            }
        }

        let mut data = vec![0; desc.size as usize];
        if let Some(contents) = desc.contents {
            let n = contents.len().min(data.len());
            data[..n].copy_from_slice(&contents[..n]);
        }

        let id = self.next_id;
        self.next_id += 1;
        self.allocated_bytes += desc.size;
        self.allocation_count += 1;
        self.buffers.insert(
            id,
            Storage {
                label: desc.label.to_owned(),
                kind: desc.kind,
                data,
            },
        );
        Ok(CpuBuffer(id))
    }

    fn write_buffer(&mut self, buffer: &CpuBuffer, offset: u64, data: &[u8]) {
        let Some(storage) = self.buffers.get_mut(&buffer.0) else {
            error!("write to unknown buffer {}", buffer.0);
            return;
        };
        let start = offset as usize;
        let Some(dst) = storage.data.get_mut(start..start + data.len()) else {
            error!(
                "write of {} bytes at {} overruns {} ({} bytes)",
                data.len(),
                offset,
                storage.label,
                storage.data.len()
            );
            return;
        };
        dst.copy_from_slice(data);
    }

    fn release_buffer(&mut self, buffer: CpuBuffer) {
        match self.buffers.remove(&buffer.0) {
            Some(storage) => self.allocated_bytes -= storage.data.len() as u64,
            None => error!("release of unknown buffer {}", buffer.0),
        }
    }

    fn begin_frame(&mut self, frame_index: u64) {
        self.frame = frame_index;
    }

    fn dispatch_cull(&mut self, dispatch: &CullDispatch<'_, CpuBuffer>) {
        let Some(uniforms) = self
            .read_records::<CullingUniforms>(dispatch.uniforms, 0, 1)
            .first()
            .copied()
        else {
            error!("culling uniforms buffer too small");
            return;
        };
        let meshlet_count = uniforms.meshlet_count();
        let instance_count = uniforms.instance_count();
        self.dispatches.push(RecordedDispatch {
            frame: self.frame,
            workgroups: dispatch.workgroups,
            meshlet_count,
            instance_count,
        });

        let cull_data: Vec<CullData> =
            self.read_records(dispatch.cull_data, 0, meshlet_count as usize);
        let transforms: Vec<InstanceTransform> =
            self.read_records(dispatch.transforms, 0, instance_count as usize);
        let instances: Vec<InstanceCull> = transforms.iter().map(InstanceTransform::cull).collect();

        let frustum = Frustum {
            planes: uniforms
                .frustum_planes
                .map(|[a, b, c, d]| Plane::new(a, b, c, d)),
        };
        let camera = Vec3::from_slice(&uniforms.camera_position[..3]);

        let pairs = u64::from(meshlet_count) * u64::from(instance_count);
        let invocations = u64::from(dispatch.workgroups) * u64::from(self.workgroup_size);
        let mut visible = Vec::new();
        for id in 0..invocations.min(pairs) {
            let meshlet = (id % u64::from(meshlet_count)) as usize;
            let instance = (id / u64::from(meshlet_count)) as usize;
            let (Some(cull), Some(transform)) = (cull_data.get(meshlet), instances.get(instance)) else {
                continue;
            };
            if transform.is_meshlet_visible(cull, &frustum, camera) {
                visible.push(VisibleMeshlet::new(meshlet as u32, instance as u32));
            }
        }

        let Some(storage) = self.buffers.get_mut(&dispatch.visibility.0) else {
            error!("unknown visibility buffer {}", dispatch.visibility.0);
            return;
        };
        let header = APPEND_HEADER_SIZE as usize;
        if storage.data.len() < header {
            error!("visibility buffer {} has no counter header", storage.label);
            return;
        }
        let capacity = storage.data.len().saturating_sub(header) / 4;
        let mut count = u32::from_ne_bytes([
            storage.data[0],
            storage.data[1],
            storage.data[2],
            storage.data[3],
        ]) as usize;
        for record in visible {
            // Out-of-capacity appends are dropped, as the shader does.
            if count >= capacity {
                break;
            }
            let at = header + count * 4;
            storage.data[at..at + 4].copy_from_slice(&record.0.to_ne_bytes());
            count += 1;
        }
        storage.data[..4].copy_from_slice(&(count as u32).to_ne_bytes());
    }

    fn copy_counter(&mut self, visibility: &CpuBuffer, args: &CpuBuffer, offset: u64) {
        let count = self.read_u32(visibility, 0);
        self.write_buffer(args, offset, &count.to_ne_bytes());
    }

    fn draw_indirect(&mut self, draw: &MeshletDraw<'_, CpuBuffer>) {
        let Some(args) = self
            .read_records::<DrawIndexedIndirectArgs>(draw.args, 0, 1)
            .first()
            .copied()
        else {
            error!("indirect args buffer too small");
            return;
        };
        let visible = self.read_records::<VisibleMeshlet>(
            draw.visibility,
            APPEND_HEADER_SIZE as usize,
            args.instance_count as usize,
        );
        self.draws.push(RecordedDraw {
            frame: self.frame,
            args,
            visible,
            meshlets: *draw.meshlets,
        });
    }

    fn read_buffer(&mut self, buffer: &CpuBuffer) -> Result<Vec<u8>, GpuError> {
        self.buffers
            .get(&buffer.0)
            .map(|s| s.data.clone())
            .ok_or(GpuError::UnknownBuffer(buffer.0))
    }
}
