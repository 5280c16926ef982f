//! GPU backend abstraction.
//!
//! The cache and the orchestrator only talk to a [`GpuBackend`]. Two
//! backends ship with the crate:
//!
//! - [`WgpuBackend`]: real device work through wgpu.
//! - [`CpuBackend`]: software emulation of the same command sequence, used
//!   for headless tests and benchmarks.

pub mod cpu;
pub mod layout;
pub mod wgpu_backend;

use std::fmt;

use thiserror::Error;

pub use cpu::{CpuBackend, CpuBuffer, RecordedDispatch, RecordedDraw};
pub use layout::{
    CullingUniforms, DrawIndexedIndirectArgs, InstanceTransform, VisibleMeshlet,
    APPEND_HEADER_SIZE, ARGS_INSTANCE_COUNT_OFFSET, VISIBLE_INDEX_LIMIT,
};
pub use wgpu_backend::{WgpuBackend, WgpuBuffer, WgpuRenderTarget};

/// GPU resource errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// Allocation refused by the device or by the memory budget.
    #[error("out of memory allocating {size} bytes for {label}")]
    OutOfMemory {
        /// Buffer label.
        label: String,
        /// Requested size in bytes.
        size: u64,
    },

    /// Handle does not refer to a live buffer.
    #[error("unknown buffer {0}")]
    UnknownBuffer(u64),

    /// Buffer read-back failed.
    #[error("readback failed: {0}")]
    Readback(String),
}

/// How a buffer is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Read-only structured storage (geometry, cull data, transforms).
    Structured,
    /// Append buffer: counter header followed by records.
    Append,
    /// Indirect draw arguments.
    IndirectArgs,
    /// Uniform constants.
    Uniform,
}

/// Buffer creation request.
#[derive(Debug, Clone, Copy)]
pub struct BufferDesc<'a> {
    /// Debug label.
    pub label: &'a str,
    /// Binding kind.
    pub kind: BufferKind,
    /// Size in bytes.
    pub size: u64,
    /// Initial contents, written at offset 0.
    pub contents: Option<&'a [u8]>,
}

impl<'a> BufferDesc<'a> {
    /// Empty buffer of `size` bytes.
    #[must_use]
    pub const fn new(label: &'a str, kind: BufferKind, size: u64) -> Self {
        Self {
            label,
            kind,
            size,
            contents: None,
        }
    }

    /// Buffer sized to and initialized from `contents`.
    #[must_use]
    pub const fn with_contents(label: &'a str, kind: BufferKind, contents: &'a [u8]) -> Self {
        Self {
            label,
            kind,
            size: contents.len() as u64,
            contents: Some(contents),
        }
    }
}

/// Inputs of one culling dispatch.
#[derive(Debug)]
pub struct CullDispatch<'a, H> {
    /// Per-meshlet [`lattice_meshlet::CullData`].
    pub cull_data: &'a H,
    /// Append buffer receiving [`VisibleMeshlet`] records.
    pub visibility: &'a H,
    /// Per-instance [`InstanceTransform`].
    pub transforms: &'a H,
    /// [`CullingUniforms`].
    pub uniforms: &'a H,
    /// Workgroups to launch.
    pub workgroups: u32,
}

/// Inputs of one indirect meshlet draw.
#[derive(Debug)]
pub struct MeshletDraw<'a, H> {
    /// Converted vertices.
    pub vertices: &'a H,
    /// Converted absolute indices.
    pub indices: &'a H,
    /// Meshlet descriptors.
    pub meshlets: &'a H,
    /// Visible list written by the culling pass.
    pub visibility: &'a H,
    /// Per-instance transforms.
    pub transforms: &'a H,
    /// Indirect arguments.
    pub args: &'a H,
    /// Indices per drawn record, the length of the sequential index range.
    pub index_count: u32,
}

/// Device operations used by the meshlet pipeline.
///
/// Commands issued between [`begin_frame`](Self::begin_frame) and
/// [`end_frame`](Self::end_frame) execute in call order.
pub trait GpuBackend {
    /// Buffer handle.
    type Buffer: Clone + fmt::Debug;

    /// Allocates a buffer.
    ///
    /// # Errors
    ///
    /// [`GpuError::OutOfMemory`] if the device refuses the allocation.
    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<Self::Buffer, GpuError>;

    /// Writes `data` at `offset`. Ordered before later commands.
    fn write_buffer(&mut self, buffer: &Self::Buffer, offset: u64, data: &[u8]);

    /// Frees a buffer. The handle must not be used afterwards.
    fn release_buffer(&mut self, buffer: Self::Buffer);

    /// Starts recording frame `frame_index`.
    fn begin_frame(&mut self, frame_index: u64) {
        let _ = frame_index;
    }

    /// Launches the culling kernel.
    fn dispatch_cull(&mut self, dispatch: &CullDispatch<'_, Self::Buffer>);

    /// Copies the append counter of `visibility` into `args` at `offset`.
    fn copy_counter(&mut self, visibility: &Self::Buffer, args: &Self::Buffer, offset: u64);

    /// Issues one indexed indirect draw.
    fn draw_indirect(&mut self, draw: &MeshletDraw<'_, Self::Buffer>);

    /// Submits the recorded frame.
    fn end_frame(&mut self) {}

    /// Reads a buffer back to the CPU, waiting for pending work.
    ///
    /// # Errors
    ///
    /// [`GpuError::Readback`] if mapping fails.
    fn read_buffer(&mut self, buffer: &Self::Buffer) -> Result<Vec<u8>, GpuError>;
}

impl<B: GpuBackend + ?Sized> GpuBackend for &mut B {
    type Buffer = B::Buffer;

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<Self::Buffer, GpuError> {
        (**self).create_buffer(desc)
    }

    fn write_buffer(&mut self, buffer: &Self::Buffer, offset: u64, data: &[u8]) {
        (**self).write_buffer(buffer, offset, data);
    }

    fn release_buffer(&mut self, buffer: Self::Buffer) {
        (**self).release_buffer(buffer);
    }

    fn begin_frame(&mut self, frame_index: u64) {
        (**self).begin_frame(frame_index);
    }

    fn dispatch_cull(&mut self, dispatch: &CullDispatch<'_, Self::Buffer>) {
        (**self).dispatch_cull(dispatch);
    }

    fn copy_counter(&mut self, visibility: &Self::Buffer, args: &Self::Buffer, offset: u64) {
        (**self).copy_counter(visibility, args, offset);
    }

    fn draw_indirect(&mut self, draw: &MeshletDraw<'_, Self::Buffer>) {
        (**self).draw_indirect(draw);
    }

    fn end_frame(&mut self) {
        (**self).end_frame();
    }

    fn read_buffer(&mut self, buffer: &Self::Buffer) -> Result<Vec<u8>, GpuError> {
        (**self).read_buffer(buffer)
    }
}

/// Buffers created as one set. If any creation fails, [`rollback`]
/// frees the ones already made so a partial set never leaks.
///
/// [`rollback`]: BufferBatch::rollback
pub(crate) struct BufferBatch<'a, B: GpuBackend> {
    gpu: &'a mut B,
    created: Vec<B::Buffer>,
}

impl<'a, B: GpuBackend> BufferBatch<'a, B> {
    pub(crate) fn new(gpu: &'a mut B) -> Self {
        Self {
            gpu,
            created: Vec::with_capacity(4),
        }
    }

    pub(crate) fn create(&mut self, desc: &BufferDesc<'_>) -> Result<B::Buffer, GpuError> {
        let buffer = self.gpu.create_buffer(desc)?;
        self.created.push(buffer.clone());
        Ok(buffer)
    }

    pub(crate) fn rollback(self) {
        for buffer in self.created {
            self.gpu.release_buffer(buffer);
        }
    }
}
