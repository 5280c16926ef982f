//! Per-frame draw buffers, rotated across frames in flight.

use crate::gpu::{
    BufferBatch, BufferDesc, BufferKind, CullingUniforms, DrawIndexedIndirectArgs, GpuBackend, GpuError,
    InstanceTransform, APPEND_HEADER_SIZE,
};

const TRANSFORM_SIZE: u64 = std::mem::size_of::<InstanceTransform>() as u64;
const ARGS_SIZE: u64 = std::mem::size_of::<DrawIndexedIndirectArgs>() as u64;
const UNIFORMS_SIZE: u64 = std::mem::size_of::<CullingUniforms>() as u64;

/// Buffers one group needs for one frame.
#[derive(Debug)]
pub(crate) struct DrawBuffers<B: GpuBackend> {
    pub(crate) transforms: B::Buffer,
    pub(crate) visibility: B::Buffer,
    pub(crate) args: B::Buffer,
    pub(crate) uniforms: B::Buffer,
    instance_count: usize,
    visible_capacity: usize,
}

impl<B: GpuBackend> DrawBuffers<B> {
    fn allocate(gpu: &mut B, instance_count: usize, visible_capacity: usize) -> Result<Self, GpuError> {
        let mut batch = BufferBatch::new(gpu);
        let result = Self::create_in(&mut batch, instance_count, visible_capacity);
        if result.is_err() {
            batch.rollback();
        }
        result
    }

    fn create_in(
        batch: &mut BufferBatch<'_, B>,
        instance_count: usize,
        visible_capacity: usize,
    ) -> Result<Self, GpuError> {
        Ok(Self {
            transforms: batch.create(&BufferDesc::new(
                "Meshlet Instance Transforms",
                BufferKind::Structured,
                instance_count as u64 * TRANSFORM_SIZE,
            ))?,
            visibility: batch.create(&BufferDesc::new(
                "Meshlet Visibility",
                BufferKind::Append,
                APPEND_HEADER_SIZE + visible_capacity as u64 * 4,
            ))?,
            args: batch.create(&BufferDesc::new(
                "Meshlet Indirect Args",
                BufferKind::IndirectArgs,
                ARGS_SIZE,
            ))?,
            uniforms: batch.create(&BufferDesc::new(
                "Meshlet Cull Uniforms",
                BufferKind::Uniform,
                UNIFORMS_SIZE,
            ))?,
            instance_count,
            visible_capacity,
        })
    }

    fn fits(&self, instance_count: usize, visible_capacity: usize) -> bool {
        self.instance_count == instance_count && self.visible_capacity == visible_capacity
    }

    fn release(self, gpu: &mut B) {
        gpu.release_buffer(self.transforms);
        gpu.release_buffer(self.visibility);
        gpu.release_buffer(self.args);
        gpu.release_buffer(self.uniforms);
    }
}

/// Draw buffer sets of one group, one per frame in flight.
#[derive(Debug)]
pub(crate) struct DrawGroup<B: GpuBackend> {
    sets: Vec<Option<DrawBuffers<B>>>,
}

impl<B: GpuBackend> DrawGroup<B> {
    pub(crate) fn new(frames_in_flight: usize) -> Self {
        Self {
            sets: (0..frames_in_flight.max(1)).map(|_| None).collect(),
        }
    }

    /// Returns the set for `slot`, reallocating it if its sizes changed.
    /// The flag is true when a new set was allocated.
    pub(crate) fn prepare(
        &mut self,
        gpu: &mut B,
        slot: usize,
        instance_count: usize,
        visible_capacity: usize,
    ) -> Result<(&DrawBuffers<B>, bool), GpuError> {
        let index = slot % self.sets.len();
        let fits = matches!(
            &self.sets[index],
            Some(buffers) if buffers.fits(instance_count, visible_capacity)
        );
        if fits {
            let buffers = self.sets[index].as_ref().expect("checked by `fits` above");
            return Ok((buffers, false));
        }
        let current = &mut self.sets[index];
        if let Some(stale) = current.take() {
            stale.release(gpu);
        }
        let fresh = DrawBuffers::allocate(gpu, instance_count, visible_capacity)?;
        Ok((current.insert(fresh), true))
    }

    /// Set last prepared for `slot`.
    #[cfg_attr(not(feature = "debug-readback"), allow(dead_code))]
    pub(crate) fn get(&self, slot: usize) -> Option<&DrawBuffers<B>> {
        self.sets.get(slot % self.sets.len())?.as_ref()
    }

    pub(crate) fn release(&mut self, gpu: &mut B) {
        for buffers in self.sets.iter_mut().filter_map(Option::take) {
            buffers.release(gpu);
        }
    }
}
