//! OpenCL convolution operator for packed RGB rasters.
//!
//! Applies a fixed 2-D weight mask to `IntRgb` images on a compute device.
//! The engine compiles the `convolution` kernel once, keeps the mask on the
//! device, and runs one NDRange per filtered image.
//!
//! # Architecture
//!
//! ```text
//! ConvolutionEngine<B>
//!     ├── ProgramBuilder  (source + options -> kernel)
//!     ├── MaskBuffer      (weights, uploaded once)
//!     └── ComputeBackend
//!             ├── HostContext   (simulated device, rayon)
//!             └── OpenClContext (opencl3, feature "opencl")
//! ```
//!
//! # Example
//!
//! ```rust
//! use vfx_clconv::{ConvolutionEngine, ConvolutionMask, DeviceSelector, EngineConfig, HostContext, ProgramSource, Raster};
//!
//! let ctx = HostContext::new(&DeviceSelector::default())?;
//! let engine = ConvolutionEngine::new(
//!     ctx,
//!     ConvolutionMask::gaussian(5, 1.2),
//!     &ProgramSource::embedded(),
//!     &EngineConfig::default(),
//! )?;
//!
//! let src = Raster::new(320, 240);
//! let mut dst = engine.create_compatible_dest(&src);
//! engine.filter_into(&src, &mut dst)?;
//! engine.shutdown()?;
//! # Ok::<(), vfx_clconv::ConvolveError>(())
//! ```
//!
//! # Features
//!
//! - `opencl` - OpenCL devices via `opencl3`. Without it only the host
//!   device is compiled in.

pub mod backend;
pub mod config;
pub mod engine;
pub mod mask;
pub mod program;
pub mod raster;
pub mod reference;
pub mod worksize;
mod buffer;
mod error;

pub use backend::{
    Backend, BackendInfo, ComputeBackend, DeviceInfo, DeviceSelector, DeviceType, HostContext, HostPlatform,
    HostProbe, MemAccess, describe_backends, detect_backends, select_best_backend,
};
#[cfg(feature = "opencl")]
pub use backend::OpenClContext;
pub use config::{DEFAULT_BUILD_OPTIONS, DEFAULT_ENTRY_POINT, EngineConfig};
pub use engine::{AnyEngine, ConvolutionEngine, create_engine};
pub use error::{ConvolveError, ConvolveResult, Stage};
pub use mask::ConvolutionMask;
pub use program::{ProgramBuilder, ProgramSource};
pub use raster::{PixelLayout, Raster, pack_rgb, unpack_rgb};
pub use worksize::{WorkSize, round_up};
