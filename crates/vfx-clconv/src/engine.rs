//! Convolution engine.
//!
//! Owns one compute context, the compiled `convolution` kernel and the
//! device-resident mask. Each [`ConvolutionEngine::filter`] call uploads the
//! source, dispatches one NDRange and reads the result back; per-call
//! buffers are released on every path.
//!
//! # Example
//!
//! ```rust
//! use vfx_clconv::{Backend, ConvolutionMask, EngineConfig, ProgramSource, Raster, create_engine};
//!
//! let engine = create_engine(
//!     Backend::Host,
//!     ConvolutionMask::box_blur(3),
//!     &ProgramSource::embedded(),
//!     &EngineConfig::default(),
//! ).unwrap();
//!
//! let src = Raster::new(64, 48);
//! let out = engine.filter(&src, None).unwrap();
//! assert_eq!(out.dimensions(), (64, 48));
//! engine.shutdown().unwrap();
//! ```

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, trace};

use crate::backend::{
    Backend, ComputeBackend, DeviceInfo, HostContext, KernelArgs, MemAccess, select_best_backend,
};
#[cfg(feature = "opencl")]
use crate::backend::OpenClContext;
use crate::buffer::MaskBuffer;
use crate::config::EngineConfig;
use crate::mask::ConvolutionMask;
use crate::program::{ProgramBuilder, ProgramSource};
use crate::raster::{PixelLayout, Raster};
use crate::worksize::WorkSize;
use crate::{ConvolveError, ConvolveResult};

// Fields drop in declaration order: mask buffer, kernel, then the context
// (which releases its queue before itself).
struct EngineState<B: ComputeBackend> {
    mask_buffer: MaskBuffer<B>,
    kernel: B::Kernel,
    backend: B,
}

/// Applies one fixed mask to images on one compute device.
///
/// The engine is `Sync`; concurrent `filter` calls serialize on an internal
/// lock covering argument binding, dispatch and readback.
pub struct ConvolutionEngine<B: ComputeBackend> {
    state: Mutex<Option<EngineState<B>>>,
    mask: ConvolutionMask,
    info: DeviceInfo,
    backend_name: &'static str,
}

impl<B: ComputeBackend> ConvolutionEngine<B> {
    /// Builds the kernel and uploads `mask` on a ready context.
    ///
    /// Fails with `InvalidMask` when the mask, used as the work-group size,
    /// exceeds the device limits or the limit of the compiled kernel, and
    /// with `BuildFailure` when the program does not compile. Anything built
    /// before a failure is released.
    pub fn new(backend: B, mask: ConvolutionMask, source: &ProgramSource, config: &EngineConfig) -> ConvolveResult<Self> {
        let info = backend.device_info().clone();
        let (mw, mh) = mask.dimensions();
        if !info.accepts_local_size([mw as usize, mh as usize]) {
            return Err(ConvolveError::InvalidMask(format!(
                "{}x{} mask exceeds work-group limits of '{}' (max {} items, per-dimension {:?})",
                mw, mh, info.name, info.max_work_group_size, info.max_work_item_sizes
            )));
        }

        let kernel = ProgramBuilder::from_config(config).build(&backend, source)?;
        let kernel_limit = backend.kernel_work_group_size(&kernel);
        if (mw as usize) * (mh as usize) > kernel_limit {
            return Err(ConvolveError::InvalidMask(format!(
                "{}x{} mask exceeds the kernel work-group limit of {} items on '{}'",
                mw, mh, kernel_limit, info.name
            )));
        }
        let mask_buffer = MaskBuffer::upload(&backend, &mask)?;

        let backend_name = backend.name();
        info!(
            backend = backend_name,
            device = %info.name,
            mask_w = mw,
            mask_h = mh,
            "Convolution engine ready"
        );

        Ok(Self {
            state: Mutex::new(Some(EngineState { mask_buffer, kernel, backend })),
            mask,
            info,
            backend_name,
        })
    }

    /// Convolves `src` into `dst`, or into a new compatible raster when `dst`
    /// is `None`, and returns the filled destination.
    ///
    /// An owned `dst` is consumed: on any error, validation included, it is
    /// dropped with the call. Use [`filter_into`](Self::filter_into) to keep
    /// the destination across a failure.
    pub fn filter(&self, src: &Raster, dst: Option<Raster>) -> ConvolveResult<Raster> {
        let guard = self.lock();
        let state = guard.as_ref().ok_or(ConvolveError::EngineClosed)?;

        self.validate_source(src)?;
        let mut dst = match dst {
            Some(d) => {
                Self::validate_dest(src, &d)?;
                d
            }
            None => src.compatible_dest(),
        };

        self.run(state, src, &mut dst)?;
        Ok(dst)
    }

    /// Convolves `src` into `dst` in place.
    ///
    /// `dst` is untouched when validation fails. If the final readback
    /// fails its contents are unspecified.
    pub fn filter_into(&self, src: &Raster, dst: &mut Raster) -> ConvolveResult<()> {
        let guard = self.lock();
        let state = guard.as_ref().ok_or(ConvolveError::EngineClosed)?;

        self.validate_source(src)?;
        Self::validate_dest(src, dst)?;
        self.run(state, src, dst)
    }

    /// Releases the mask buffer, kernel, command queue and context, in that order.
    ///
    /// Returns `EngineClosed` if already shut down.
    pub fn shutdown(&self) -> ConvolveResult<()> {
        let state = self.lock().take().ok_or(ConvolveError::EngineClosed)?;
        let EngineState { mask_buffer, kernel, backend } = state;

        drop(mask_buffer);
        trace!("Released mask buffer");
        drop(kernel);
        trace!("Released kernel");
        drop(backend);
        trace!("Released command queue and context");

        info!(backend = self.backend_name, device = %self.info.name, "Convolution engine shut down");
        Ok(())
    }

    /// Whether `shutdown` has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    /// The mask this engine applies.
    pub fn mask(&self) -> &ConvolutionMask {
        &self.mask
    }

    /// Properties of the bound device.
    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Name of the compute backend.
    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    /// A zeroed destination raster that `filter` accepts for `src`.
    pub fn create_compatible_dest(&self, src: &Raster) -> Raster {
        src.compatible_dest()
    }

    fn lock(&self) -> MutexGuard<'_, Option<EngineState<B>>> {
        // A panic mid-filter leaves only per-call buffers behind, which were
        // already dropped during unwinding.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn validate_source(&self, src: &Raster) -> ConvolveResult<()> {
        if src.layout() != PixelLayout::IntRgb {
            return Err(ConvolveError::InvalidImage(format!(
                "source layout {} is not supported, expected {}",
                src.layout().name(),
                PixelLayout::IntRgb.name()
            )));
        }
        let (w, h) = src.dimensions();
        if src.is_empty() {
            return Err(ConvolveError::InvalidImage(format!("source image is empty ({}x{})", w, h)));
        }
        if w > i32::MAX as u32 || h > i32::MAX as u32 {
            return Err(ConvolveError::InvalidImage(format!("source image {}x{} is too large", w, h)));
        }
        let (mw, mh) = self.mask.dimensions();
        if mw > w || mh > h {
            return Err(ConvolveError::InvalidImage(format!(
                "{}x{} mask is larger than {}x{} image",
                mw, mh, w, h
            )));
        }
        Ok(())
    }

    fn validate_dest(src: &Raster, dst: &Raster) -> ConvolveResult<()> {
        if dst.layout() != PixelLayout::IntRgb {
            return Err(ConvolveError::InvalidImage(format!(
                "destination layout {} is not supported, expected {}",
                dst.layout().name(),
                PixelLayout::IntRgb.name()
            )));
        }
        if dst.dimensions() != src.dimensions() {
            return Err(ConvolveError::InvalidImage(format!(
                "destination is {}x{}, source is {}x{}",
                dst.width(),
                dst.height(),
                src.width(),
                src.height()
            )));
        }
        Ok(())
    }

    fn run(&self, state: &EngineState<B>, src: &Raster, dst: &mut Raster) -> ConvolveResult<()> {
        let backend = &state.backend;
        let (w, h) = src.dimensions();
        let bytes = src.size_bytes();

        let input = backend.create_buffer(MemAccess::ReadOnly, bytes, Some(bytemuck::cast_slice(src.data())))?;
        let output = backend.create_buffer(MemAccess::WriteOnly, bytes, None)?;

        let work = WorkSize::for_dispatch(self.mask.dimensions(), (w, h));
        let (mw, mh) = self.mask.dimensions();
        let (ox, oy) = self.mask.origin();
        let args = KernelArgs {
            input: &input,
            mask: state.mask_buffer.buffer(),
            output: &output,
            image_size: [w as i32, h as i32],
            mask_size: [mw as i32, mh as i32],
            mask_origin: [ox as i32, oy as i32],
        };

        debug!(
            width = w,
            height = h,
            global = ?work.global,
            local = ?work.local,
            "Dispatching convolution"
        );
        backend.dispatch(&state.kernel, &args, &work)?;
        backend.read_buffer(&output, bytemuck::cast_slice_mut(dst.data_mut()))?;
        Ok(())
    }
}

impl<B: ComputeBackend> fmt::Debug for ConvolutionEngine<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvolutionEngine")
            .field("backend", &self.backend_name)
            .field("device", &self.info.name)
            .field("mask", &self.mask.dimensions())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Engine type enum for dynamic dispatch.
#[derive(Debug)]
pub enum AnyEngine {
    /// Host-simulated device.
    Host(ConvolutionEngine<HostContext>),
    /// OpenCL device.
    #[cfg(feature = "opencl")]
    OpenCl(ConvolutionEngine<OpenClContext>),
}

impl AnyEngine {
    /// Get backend name.
    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Host(e) => e.backend_name(),
            #[cfg(feature = "opencl")]
            Self::OpenCl(e) => e.backend_name(),
        }
    }

    /// Properties of the bound device.
    pub fn device_info(&self) -> &DeviceInfo {
        match self {
            Self::Host(e) => e.device_info(),
            #[cfg(feature = "opencl")]
            Self::OpenCl(e) => e.device_info(),
        }
    }

    /// The mask this engine applies.
    pub fn mask(&self) -> &ConvolutionMask {
        match self {
            Self::Host(e) => e.mask(),
            #[cfg(feature = "opencl")]
            Self::OpenCl(e) => e.mask(),
        }
    }

    /// See [`ConvolutionEngine::filter`].
    pub fn filter(&self, src: &Raster, dst: Option<Raster>) -> ConvolveResult<Raster> {
        match self {
            Self::Host(e) => e.filter(src, dst),
            #[cfg(feature = "opencl")]
            Self::OpenCl(e) => e.filter(src, dst),
        }
    }

    /// See [`ConvolutionEngine::filter_into`].
    pub fn filter_into(&self, src: &Raster, dst: &mut Raster) -> ConvolveResult<()> {
        match self {
            Self::Host(e) => e.filter_into(src, dst),
            #[cfg(feature = "opencl")]
            Self::OpenCl(e) => e.filter_into(src, dst),
        }
    }

    /// See [`ConvolutionEngine::shutdown`].
    pub fn shutdown(&self) -> ConvolveResult<()> {
        match self {
            Self::Host(e) => e.shutdown(),
            #[cfg(feature = "opencl")]
            Self::OpenCl(e) => e.shutdown(),
        }
    }

    /// Whether `shutdown` has been called.
    pub fn is_closed(&self) -> bool {
        match self {
            Self::Host(e) => e.is_closed(),
            #[cfg(feature = "opencl")]
            Self::OpenCl(e) => e.is_closed(),
        }
    }
}

/// Create an engine on the specified backend.
///
/// The context binds to `config.device`; `Backend::Auto` picks the best
/// available backend first.
pub fn create_engine(
    backend: Backend,
    mask: ConvolutionMask,
    source: &ProgramSource,
    config: &EngineConfig,
) -> ConvolveResult<AnyEngine> {
    match backend {
        Backend::Auto => {
            let best = select_best_backend();
            debug!(backend = best.name(), "Auto-selected backend");
            create_engine(best, mask, source, config)
        }
        Backend::Host => {
            let ctx = HostContext::new(&config.device)?;
            Ok(AnyEngine::Host(ConvolutionEngine::new(ctx, mask, source, config)?))
        }
        Backend::OpenCl => {
            #[cfg(feature = "opencl")]
            {
                let ctx = OpenClContext::new(&config.device)?;
                Ok(AnyEngine::OpenCl(ConvolutionEngine::new(ctx, mask, source, config)?))
            }
            #[cfg(not(feature = "opencl"))]
            {
                let _ = (mask, source, config);
                Err(ConvolveError::BackendNotAvailable(
                    "opencl feature not enabled".to_string()
                ))
            }
        }
    }
}
