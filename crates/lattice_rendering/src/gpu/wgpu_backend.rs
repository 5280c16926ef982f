//! wgpu implementation of [`GpuBackend`].
//!
//! All commands of a frame go into one encoder, submitted in
//! [`end_frame`](GpuBackend::end_frame), so every culling dispatch is
//! queued ahead of the draw that consumes it. Queue writes land before the
//! encoder they precede.

use std::borrow::Cow;
use std::sync::Arc;

use tracing::{debug, error, warn};

use super::{BufferDesc, BufferKind, CullDispatch, GpuBackend, GpuError, MeshletDraw};
use crate::config::MeshletPipelineConfig;

const CULL_SHADER: &str = include_str!("../../shaders/meshlet_cull.wgsl");
const EXPAND_SHADER: &str = include_str!("../../shaders/meshlet_expand.wgsl");

/// WebGPU per-dimension dispatch limit.
const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65_535;

/// Smallest buffer created; storage bindings must be non-empty.
const MIN_BUFFER_SIZE: u64 = 16;

/// Handle to a [`WgpuBackend`] buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WgpuBuffer {
    slot: u32,
    size: u64,
}

impl WgpuBuffer {
    /// Allocated size in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }
}

/// Attachments the meshlet draws render into.
#[derive(Debug)]
pub struct WgpuRenderTarget {
    /// Color attachment, loaded and stored.
    pub color: wgpu::TextureView,
    /// Optional depth attachment, loaded and stored.
    pub depth: Option<wgpu::TextureView>,
}

/// wgpu device backend.
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    cull_layout: wgpu::BindGroupLayout,
    cull_pipeline: wgpu::ComputePipeline,
    draw_layout: wgpu::BindGroupLayout,
    draw_pipeline: Option<wgpu::RenderPipeline>,
    target: Option<WgpuRenderTarget>,
    buffers: Vec<Option<(wgpu::Buffer, BufferKind)>>,
    free_slots: Vec<u32>,
    sequential_indices: Option<(wgpu::Buffer, u32)>,
    encoder: Option<wgpu::CommandEncoder>,
    allocated_bytes: u64,
    /// Set once the missing pipeline or target has been reported.
    unbound_reported: bool,
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("live_buffers", &(self.buffers.len() - self.free_slots.len()))
            .field("allocated_bytes", &self.allocated_bytes)
            .field("has_draw_pipeline", &self.draw_pipeline.is_some())
            .finish_non_exhaustive()
    }
}

fn storage_entry(binding: u32, visibility: wgpu::ShaderStages, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

type Slab = [Option<(wgpu::Buffer, BufferKind)>];

fn lookup<'a>(buffers: &'a Slab, handle: &WgpuBuffer) -> Option<&'a wgpu::Buffer> {
    buffers
        .get(handle.slot as usize)
        .and_then(Option::as_ref)
        .map(|(buffer, _)| buffer)
}

fn frame_encoder<'a>(
    encoder: &'a mut Option<wgpu::CommandEncoder>,
    device: &wgpu::Device,
) -> &'a mut wgpu::CommandEncoder {
    encoder.get_or_insert_with(|| {
        device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Meshlet Frame Encoder"),
        })
    })
}

fn bind_group(
    device: &wgpu::Device,
    buffers: &Slab,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    handles: &[&WgpuBuffer],
) -> Option<wgpu::BindGroup> {
    let mut entries = Vec::with_capacity(handles.len());
    for (binding, handle) in handles.iter().enumerate() {
        let Some(buffer) = lookup(buffers, handle) else {
            error!("{} references released buffer slot {}", label, handle.slot);
            return None;
        };
        entries.push(wgpu::BindGroupEntry {
            binding: binding as u32,
            resource: buffer.as_entire_binding(),
        });
    }
    Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &entries,
    }))
}

/// Returns true the first time it is called for `reported`.
fn first_report(reported: &mut bool) -> bool {
    !std::mem::replace(reported, true)
}

/// Culling shader specialized for `workgroup_size`.
///
/// The entry point attribute and the `WORKGROUP_SIZE` constant used for
/// the flat invocation index must agree.
pub(crate) fn cull_shader_source(workgroup_size: u32) -> String {
    CULL_SHADER
        .replace(
            "@workgroup_size(64)",
            &format!("@workgroup_size({workgroup_size})"),
        )
        .replace(
            "const WORKGROUP_SIZE: u32 = 64u;",
            &format!("const WORKGROUP_SIZE: u32 = {workgroup_size}u;"),
        )
}

fn usage_for(kind: BufferKind) -> wgpu::BufferUsages {
    use wgpu::BufferUsages as U;
    match kind {
        BufferKind::Structured | BufferKind::Append => U::STORAGE | U::COPY_DST | U::COPY_SRC,
        BufferKind::IndirectArgs => U::INDIRECT | U::STORAGE | U::COPY_DST | U::COPY_SRC,
        BufferKind::Uniform => U::UNIFORM | U::COPY_DST,
    }
}

impl WgpuBackend {
    /// Creates the backend and its culling pipeline.
    ///
    /// The culling shader is specialized for `config.workgroup_size`.
    #[must_use]
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, config: &MeshletPipelineConfig) -> Self {
        let cull_source = cull_shader_source(config.workgroup_size);
        let cull_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Meshlet Cull Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(cull_source)),
        });

        let cull_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Meshlet Cull Bind Group Layout"),
            entries: &[
                storage_entry(0, wgpu::ShaderStages::COMPUTE, true),
                storage_entry(1, wgpu::ShaderStages::COMPUTE, false),
                storage_entry(2, wgpu::ShaderStages::COMPUTE, true),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let cull_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Meshlet Cull Pipeline Layout"),
            bind_group_layouts: &[&cull_layout],
            push_constant_ranges: &[],
        });
        let cull_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Meshlet Cull Pipeline"),
            layout: Some(&cull_pipeline_layout),
            module: &cull_module,
            entry_point: "cull_meshlets",
        });

        let draw_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Meshlet Draw Bind Group Layout"),
            entries: &[
                storage_entry(0, wgpu::ShaderStages::VERTEX, true),
                storage_entry(1, wgpu::ShaderStages::VERTEX, true),
                storage_entry(2, wgpu::ShaderStages::VERTEX, true),
                storage_entry(3, wgpu::ShaderStages::VERTEX, true),
                storage_entry(4, wgpu::ShaderStages::VERTEX, true),
            ],
        });

        Self {
            device,
            queue,
            cull_layout,
            cull_pipeline,
            draw_layout,
            draw_pipeline: None,
            target: None,
            buffers: Vec::new(),
            free_slots: Vec::new(),
            sequential_indices: None,
            encoder: None,
            allocated_bytes: 0,
            unbound_reported: false,
        }
    }

    /// Layout of bind group 0 in any draw pipeline passed to
    /// [`set_draw_pipeline`](Self::set_draw_pipeline).
    #[must_use]
    pub fn draw_bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.draw_layout
    }

    /// Uses a host-built pipeline for meshlet draws.
    pub fn set_draw_pipeline(&mut self, pipeline: wgpu::RenderPipeline) {
        self.draw_pipeline = Some(pipeline);
        self.unbound_reported = false;
    }

    /// Builds the stock draw pipeline from `meshlet_expand.wgsl`.
    pub fn use_default_draw_pipeline(
        &mut self,
        color_format: wgpu::TextureFormat,
        depth_format: Option<wgpu::TextureFormat>,
    ) {
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Meshlet Expand Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(EXPAND_SHADER)),
        });
        let layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Meshlet Draw Pipeline Layout"),
            bind_group_layouts: &[&self.draw_layout],
            push_constant_ranges: &[],
        });
        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Meshlet Draw Pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: "vs_main",
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: color_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: Some(wgpu::Face::Back),
                ..Default::default()
            },
            depth_stencil: depth_format.map(|format| wgpu::DepthStencilState {
                format,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });
        self.draw_pipeline = Some(pipeline);
        self.unbound_reported = false;
    }

    /// Sets the attachments for the next draws. Draws without a target are
    /// skipped.
    pub fn set_render_target(&mut self, target: Option<WgpuRenderTarget>) {
        self.target = target;
        self.unbound_reported = false;
    }

    /// Bytes held by live buffers.
    #[must_use]
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes
    }

    fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(Some(encoder.finish()));
        }
    }

    fn ensure_sequential_indices(&mut self, count: u32) {
        if matches!(&self.sequential_indices, Some((_, n)) if *n >= count) {
            return;
        }
        let indices: Vec<u32> = (0..count).collect();
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Meshlet Sequential Indices"),
            size: u64::from(count.max(4)) * 4,
            usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue.write_buffer(&buffer, 0, bytemuck::cast_slice(&indices));
        self.sequential_indices = Some((buffer, count));
    }
}

impl GpuBackend for WgpuBackend {
    type Buffer = WgpuBuffer;

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<WgpuBuffer, GpuError> {
        let size = desc.size.max(MIN_BUFFER_SIZE).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let out_of_memory = || GpuError::OutOfMemory {
            label: desc.label.to_owned(),
            size,
        };
        if size > self.device.limits().max_buffer_size {
            return Err(out_of_memory());
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size,
            usage: usage_for(desc.kind),
            mapped_at_creation: false,
        });
        if pollster::block_on(self.device.pop_error_scope()).is_some() {
            return Err(out_of_memory());
        }

        if let Some(contents) = desc.contents {
            self.queue.write_buffer(&buffer, 0, contents);
        }

        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.buffers[slot as usize] = Some((buffer, desc.kind));
                slot
            }
            None => {
                self.buffers.push(Some((buffer, desc.kind)));
                (self.buffers.len() - 1) as u32
            }
        };
        self.allocated_bytes += size;
        Ok(WgpuBuffer { slot, size })
    }

    fn write_buffer(&mut self, buffer: &WgpuBuffer, offset: u64, data: &[u8]) {
        match lookup(&self.buffers, buffer) {
            Some(target) => self.queue.write_buffer(target, offset, data),
            None => error!("write to released buffer slot {}", buffer.slot),
        }
    }

    fn release_buffer(&mut self, buffer: WgpuBuffer) {
        match self.buffers.get_mut(buffer.slot as usize).and_then(Option::take) {
            Some((released, _)) => {
                released.destroy();
                self.allocated_bytes -= buffer.size;
                self.free_slots.push(buffer.slot);
            }
            None => error!("release of unknown buffer slot {}", buffer.slot),
        }
    }

    fn dispatch_cull(&mut self, dispatch: &CullDispatch<'_, WgpuBuffer>) {
        if dispatch.workgroups == 0 {
            return;
        }
        let Some(bind_group) = bind_group(
            &self.device,
            &self.buffers,
            "Meshlet Cull Bind Group",
            &self.cull_layout,
            &[dispatch.cull_data, dispatch.visibility, dispatch.transforms, dispatch.uniforms],
        ) else {
            return;
        };

        let x = dispatch.workgroups.min(MAX_WORKGROUPS_PER_DIMENSION);
        let y = dispatch.workgroups.div_ceil(x);
        let encoder = frame_encoder(&mut self.encoder, &self.device);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Meshlet Cull Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.cull_pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(x, y, 1);
    }

    fn copy_counter(&mut self, visibility: &WgpuBuffer, args: &WgpuBuffer, offset: u64) {
        let (Some(src), Some(dst)) = (lookup(&self.buffers, visibility), lookup(&self.buffers, args))
        else {
            error!("counter copy references a released buffer");
            return;
        };
        frame_encoder(&mut self.encoder, &self.device).copy_buffer_to_buffer(src, 0, dst, offset, 4);
    }

    fn draw_indirect(&mut self, draw: &MeshletDraw<'_, WgpuBuffer>) {
        if self.draw_pipeline.is_none() || self.target.is_none() {
            if first_report(&mut self.unbound_reported) {
                warn!("meshlet draws skipped until a draw pipeline and render target are set");
            } else {
                debug!("meshlet draw skipped: no draw pipeline or render target");
            }
            return;
        }
        self.ensure_sequential_indices(draw.index_count);

        let Some(bind_group) = bind_group(
            &self.device,
            &self.buffers,
            "Meshlet Draw Bind Group",
            &self.draw_layout,
            &[draw.vertices, draw.indices, draw.meshlets, draw.visibility, draw.transforms],
        ) else {
            return;
        };
        let (Some(args), Some(pipeline), Some(target), Some((indices, _))) = (
            lookup(&self.buffers, draw.args),
            self.draw_pipeline.as_ref(),
            self.target.as_ref(),
            self.sequential_indices.as_ref(),
        ) else {
            error!("meshlet draw references a released buffer");
            return;
        };

        let encoder = frame_encoder(&mut self.encoder, &self.device);
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Meshlet Draw Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target.color,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: target.depth.as_ref().map(|view| {
                wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed_indirect(args, 0);
    }

    fn end_frame(&mut self) {
        self.flush();
    }

    fn read_buffer(&mut self, buffer: &WgpuBuffer) -> Result<Vec<u8>, GpuError> {
        let Some((source, kind)) = self
            .buffers
            .get(buffer.slot as usize)
            .and_then(Option::as_ref)
        else {
            return Err(GpuError::UnknownBuffer(u64::from(buffer.slot)));
        };
        if *kind == BufferKind::Uniform {
            return Err(GpuError::Readback("uniform buffers are not copyable".to_owned()));
        }

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Meshlet Readback Staging"),
            size: buffer.size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        frame_encoder(&mut self.encoder, &self.device)
            .copy_buffer_to_buffer(source, 0, &staging, 0, buffer.size);
        self.flush();

        let (tx, rx) = crossbeam_channel::bounded(1);
        let slice = staging.slice(..);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|e| GpuError::Readback(e.to_string()))?
            .map_err(|e| GpuError::Readback(e.to_string()))?;
        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(source: &str) {
        let module = naga::front::wgsl::parse_str(source).unwrap();
        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::default(),
        )
        .validate(&module)
        .unwrap();
    }

    #[test]
    fn test_cull_shader_specialization() {
        let source = cull_shader_source(128);
        assert!(source.contains("@workgroup_size(128)"));
        assert!(source.contains("const WORKGROUP_SIZE: u32 = 128u;"));
        assert!(!source.contains("@workgroup_size(64)"));
        assert!(!source.contains("WORKGROUP_SIZE: u32 = 64u"));
        assert_eq!(cull_shader_source(64), CULL_SHADER);
    }

    #[test]
    fn test_shaders_validate() {
        for size in [32, 64, 256] {
            validate(&cull_shader_source(size));
        }
        validate(EXPAND_SHADER);
    }

    #[test]
    fn test_cull_shader_entry_and_bindings() {
        let module = naga::front::wgsl::parse_str(CULL_SHADER).unwrap();
        let entry = &module.entry_points[0];
        assert_eq!(entry.name, "cull_meshlets");
        assert_eq!(entry.workgroup_size, [64, 1, 1]);

        let mut bindings: Vec<u32> = module
            .global_variables
            .iter()
            .filter_map(|(_, var)| var.binding.as_ref().map(|b| b.binding))
            .collect();
        bindings.sort_unstable();
        assert_eq!(bindings, [0, 1, 2, 3]);
    }

    fn struct_size(module: &naga::Module, name: &str) -> u32 {
        let mut layouter = naga::proc::Layouter::default();
        layouter.update(module.to_ctx()).unwrap();
        let (handle, _) = module
            .types
            .iter()
            .find(|(_, ty)| ty.name.as_deref() == Some(name))
            .unwrap();
        layouter[handle].size
    }

    #[test]
    fn test_shader_records_match_host_layout() {
        use std::mem::size_of;

        use lattice_meshlet::{CullData, Meshlet, MeshletVertex};

        use crate::gpu::{CullingUniforms, InstanceTransform};

        let cull = naga::front::wgsl::parse_str(CULL_SHADER).unwrap();
        assert_eq!(struct_size(&cull, "CullData") as usize, size_of::<CullData>());
        assert_eq!(struct_size(&cull, "InstanceTransform") as usize, size_of::<InstanceTransform>());
        assert_eq!(struct_size(&cull, "CullingUniforms") as usize, size_of::<CullingUniforms>());

        let expand = naga::front::wgsl::parse_str(EXPAND_SHADER).unwrap();
        assert_eq!(struct_size(&expand, "InstanceTransform") as usize, size_of::<InstanceTransform>());
        assert_eq!(struct_size(&expand, "Meshlet") as usize, size_of::<Meshlet>());
        assert_eq!(struct_size(&expand, "Vertex") as usize, size_of::<MeshletVertex>());
    }

    #[test]
    fn test_unbound_draw_reported_once() {
        let mut reported = false;
        assert!(first_report(&mut reported));
        assert!(!first_report(&mut reported));
        assert!(!first_report(&mut reported));
    }
}
