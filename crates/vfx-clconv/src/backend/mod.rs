//! Compute contexts for running the convolution kernel.
//!
//! Provides an OpenCL context and a host-simulated device with a common
//! [`ComputeBackend`] interface.
//!
//! # Architecture
//!
//! ```text
//! ConvolutionEngine<B: ComputeBackend>
//!     +-- HostContext   (simulated device, rayon)
//!     +-- OpenClContext (opencl3, feature "opencl")
//! ```
//!
//! Every handle a backend hands out (buffers, kernels, the context itself)
//! releases its device resource on drop.

mod detect;
mod device;
mod host;

#[cfg(feature = "opencl")]
mod opencl;

pub use detect::{BackendInfo, describe_backends, detect_backends, select_best_backend};
pub use device::{DeviceInfo, DeviceSelector, DeviceType};
pub use host::{HostBuffer, HostContext, HostKernel, HostPlatform, HostProbe};

#[cfg(feature = "opencl")]
pub use opencl::{OpenClBuffer, OpenClContext, OpenClKernel};

use crate::program::ProgramSource;
use crate::worksize::WorkSize;
use crate::ConvolveResult;

/// Host access mode declared for a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemAccess {
    /// Kernels only read the buffer.
    ReadOnly,
    /// Kernels only write the buffer.
    WriteOnly,
    /// Kernels read and write the buffer.
    ReadWrite,
}

impl MemAccess {
    /// Whether kernels may read the buffer.
    pub fn readable(&self) -> bool {
        !matches!(self, Self::WriteOnly)
    }

    /// Whether kernels may write the buffer.
    pub fn writable(&self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

/// Device-resident memory handle. Released on drop.
pub trait DeviceBuffer: Send {
    /// Declared access mode.
    fn access(&self) -> MemAccess;

    /// Size in bytes.
    fn len_bytes(&self) -> usize;
}

/// Arguments for one convolution dispatch, in kernel parameter order.
///
/// Passed to [`ComputeBackend::dispatch`] as a single record so binding and
/// enqueueing happen together.
#[derive(Debug)]
pub struct KernelArgs<'a, B> {
    /// Source pixels.
    pub input: &'a B,
    /// Mask weights.
    pub mask: &'a B,
    /// Destination pixels.
    pub output: &'a B,
    /// Image `(width, height)`.
    pub image_size: [i32; 2],
    /// Mask `(width, height)`.
    pub mask_size: [i32; 2],
    /// Mask anchor `(x, y)`.
    pub mask_origin: [i32; 2],
}

/// A compute context: one device, one in-order queue.
///
/// All transfers are blocking; `dispatch` returns once the kernel has been
/// enqueued, and a subsequent blocking read observes its results.
pub trait ComputeBackend: Send + 'static {
    /// Device buffer handle.
    type Buffer: DeviceBuffer;
    /// Compiled kernel handle.
    type Kernel: Send;

    /// Backend name.
    fn name(&self) -> &'static str;

    /// Properties of the bound device.
    fn device_info(&self) -> &DeviceInfo;

    /// Largest work-group the compiled kernel can run with on this device.
    /// May be below `DeviceInfo::max_work_group_size`.
    fn kernel_work_group_size(&self, kernel: &Self::Kernel) -> usize;

    /// Compiles `source` with `options` and extracts `entry_point`.
    fn build_kernel(&self, source: &ProgramSource, options: &str, entry_point: &str) -> ConvolveResult<Self::Kernel>;

    /// Allocates a buffer of `len_bytes`, optionally initialised from `init`.
    fn create_buffer(&self, access: MemAccess, len_bytes: usize, init: Option<&[u8]>) -> ConvolveResult<Self::Buffer>;

    /// Blocking host-to-device write starting at offset 0.
    fn write_buffer(&self, buffer: &mut Self::Buffer, data: &[u8]) -> ConvolveResult<()>;

    /// Blocking device-to-host read starting at offset 0.
    fn read_buffer(&self, buffer: &Self::Buffer, out: &mut [u8]) -> ConvolveResult<()>;

    /// Binds `args` to `kernel` and enqueues a 2-D NDRange.
    fn dispatch(&self, kernel: &Self::Kernel, args: &KernelArgs<'_, Self::Buffer>, work: &WorkSize) -> ConvolveResult<()>;
}

/// Available compute backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Auto-select best available (OpenCL > host).
    #[default]
    Auto,
    /// Host-simulated device.
    Host,
    /// OpenCL device.
    OpenCl,
}

impl Backend {
    /// Check if this backend is available on current system.
    pub fn is_available(&self) -> bool {
        match self {
            Self::Auto => true,
            Self::Host => true,
            #[cfg(feature = "opencl")]
            Self::OpenCl => OpenClContext::is_available(&DeviceSelector::default()),
            #[cfg(not(feature = "opencl"))]
            Self::OpenCl => false,
        }
    }

    /// Get human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Host => "host",
            Self::OpenCl => "opencl",
        }
    }
}
