//! Device-resident convolution mask.

use tracing::trace;

use crate::backend::{ComputeBackend, MemAccess};
use crate::mask::ConvolutionMask;
use crate::ConvolveResult;

/// Mask weights uploaded once and kept on the device for the engine's lifetime.
pub(crate) struct MaskBuffer<B: ComputeBackend> {
    buffer: B::Buffer,
}

impl<B: ComputeBackend> MaskBuffer<B> {
    /// Allocates a read-only buffer and writes the weights with one blocking transfer.
    pub(crate) fn upload(backend: &B, mask: &ConvolutionMask) -> ConvolveResult<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(mask.weights());
        let mut buffer = backend.create_buffer(MemAccess::ReadOnly, bytes.len(), None)?;
        backend.write_buffer(&mut buffer, bytes)?;
        trace!(bytes = bytes.len(), "Uploaded mask weights");
        Ok(Self { buffer })
    }

    pub(crate) fn buffer(&self) -> &B::Buffer {
        &self.buffer
    }
}
