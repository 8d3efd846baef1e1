//! OpenCL compute context (opencl3).

use std::ptr;

use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{
    CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_GPU, Device,
};
use opencl3::error_codes::ClError;
use opencl3::kernel::Kernel;
use opencl3::memory::{
    Buffer, CL_MEM_COPY_HOST_PTR, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE, CL_MEM_WRITE_ONLY, ClMem,
};
use opencl3::platform::get_platforms;
use opencl3::program::Program;
use opencl3::types::{CL_BLOCKING, cl_device_id, cl_device_type, cl_mem_flags};
use tracing::{debug, trace};

use super::{ComputeBackend, DeviceBuffer, DeviceInfo, DeviceSelector, DeviceType, KernelArgs, MemAccess};
use crate::error::Stage;
use crate::program::ProgramSource;
use crate::worksize::WorkSize;
use crate::{ConvolveError, ConvolveResult};

fn cl_device_type_of(t: DeviceType) -> cl_device_type {
    match t {
        DeviceType::Gpu => CL_DEVICE_TYPE_GPU,
        DeviceType::Cpu => CL_DEVICE_TYPE_CPU,
        DeviceType::Accelerator => CL_DEVICE_TYPE_ACCELERATOR,
        DeviceType::All => CL_DEVICE_TYPE_ALL,
    }
}

fn device_type_of(t: cl_device_type) -> DeviceType {
    if t & CL_DEVICE_TYPE_GPU != 0 {
        DeviceType::Gpu
    } else if t & CL_DEVICE_TYPE_ACCELERATOR != 0 {
        DeviceType::Accelerator
    } else {
        DeviceType::Cpu
    }
}

fn mem_flags(access: MemAccess) -> cl_mem_flags {
    match access {
        MemAccess::ReadOnly => CL_MEM_READ_ONLY,
        MemAccess::WriteOnly => CL_MEM_WRITE_ONLY,
        MemAccess::ReadWrite => CL_MEM_READ_WRITE,
    }
}

fn fail(stage: Stage) -> impl Fn(ClError) -> ConvolveError {
    move |e| ConvolveError::device(stage, e.0)
}

/// Device buffer allocated through OpenCL.
pub struct OpenClBuffer {
    buffer: Buffer<u8>,
    access: MemAccess,
    len_bytes: usize,
}

// SAFETY: cl_mem handles are reference-counted by the driver and may be
// released from any thread. The engine serialises all use through its lock.
unsafe impl Send for OpenClBuffer {}

impl DeviceBuffer for OpenClBuffer {
    fn access(&self) -> MemAccess {
        self.access
    }

    fn len_bytes(&self) -> usize {
        self.len_bytes
    }
}

/// Compiled OpenCL kernel. The owning program is released after extraction.
pub struct OpenClKernel {
    kernel: Kernel,
}

// SAFETY: see `OpenClBuffer`.
unsafe impl Send for OpenClKernel {}

/// OpenCL context bound to one device with one in-order command queue.
///
/// Fields drop in declaration order, releasing the queue before the context.
pub struct OpenClContext {
    queue: CommandQueue,
    context: Context,
    device_id: cl_device_id,
    info: DeviceInfo,
}

// SAFETY: OpenCL context and queue handles are thread-safe for
// every call made here; the engine never uses them concurrently.
unsafe impl Send for OpenClContext {}

impl OpenClContext {
    /// Selects a platform and device and creates a context and queue on it.
    pub fn new(selector: &DeviceSelector) -> ConvolveResult<Self> {
        let unavailable = |what: String| ConvolveError::DeviceUnavailable(what);

        let platforms = get_platforms().map_err(|e| unavailable(format!("platform query failed ({})", e.0)))?;
        let platform = platforms.get(selector.platform_index).ok_or_else(|| {
            unavailable(format!(
                "platform {} not found ({} enumerated)",
                selector.platform_index,
                platforms.len()
            ))
        })?;
        let platform_name = platform.name().unwrap_or_default();

        let ids = platform
            .get_devices(cl_device_type_of(selector.device_type))
            .unwrap_or_default();
        let id = *ids.get(selector.device_index).ok_or_else(|| {
            unavailable(format!(
                "no {} device {} on platform '{}'",
                selector.device_type, selector.device_index, platform_name
            ))
        })?;

        let device = Device::new(id);
        let info = DeviceInfo {
            name: device.name().unwrap_or_default().trim().to_string(),
            vendor: device.vendor().unwrap_or_default().trim().to_string(),
            device_type: device_type_of(device.dev_type().unwrap_or(CL_DEVICE_TYPE_GPU)),
            max_work_group_size: device.max_work_group_size().unwrap_or(1),
            max_work_item_sizes: device.max_work_item_sizes().unwrap_or_default(),
        };

        let context = Context::from_device(&device)
            .map_err(|e| unavailable(format!("context creation failed ({})", e.0)))?;

        // OpenCL 1.2 queue creation, for platforms without 2.0 support.
        #[allow(deprecated)]
        let queue = CommandQueue::create_default(&context, 0)
            .map_err(|e| unavailable(format!("command queue creation failed ({})", e.0)))?;

        debug!(
            platform = %platform_name.trim(),
            device = %info.name,
            vendor = %info.vendor,
            max_work_group_size = info.max_work_group_size,
            "Created OpenCL context"
        );

        Ok(Self { queue, context, device_id: id, info })
    }

    /// Whether a device matching `selector` can be found.
    pub fn is_available(selector: &DeviceSelector) -> bool {
        get_platforms()
            .ok()
            .and_then(|p| p.into_iter().nth(selector.platform_index))
            .and_then(|p| p.get_devices(cl_device_type_of(selector.device_type)).ok())
            .is_some_and(|ids| ids.len() > selector.device_index)
    }
}

impl ComputeBackend for OpenClContext {
    type Buffer = OpenClBuffer;
    type Kernel = OpenClKernel;

    fn name(&self) -> &'static str {
        "opencl"
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    fn kernel_work_group_size(&self, kernel: &OpenClKernel) -> usize {
        kernel
            .kernel
            .get_work_group_size(self.device_id)
            .unwrap_or(self.info.max_work_group_size)
    }

    fn build_kernel(&self, source: &ProgramSource, options: &str, entry_point: &str) -> ConvolveResult<OpenClKernel> {
        // Err carries the build log.
        let program = Program::create_and_build_from_source(&self.context, source.text(), options)
            .map_err(|log| ConvolveError::BuildFailure { log })?;
        let kernel = Kernel::create(&program, entry_point).map_err(|e| ConvolveError::BuildFailure {
            log: format!("kernel '{}' not found in program ({})", entry_point, e.0),
        })?;
        drop(program);
        trace!(entry = entry_point, "Kernel extracted, program released");
        Ok(OpenClKernel { kernel })
    }

    fn create_buffer(&self, access: MemAccess, len_bytes: usize, init: Option<&[u8]>) -> ConvolveResult<OpenClBuffer> {
        let buffer = match init {
            Some(data) => {
                if data.len() != len_bytes {
                    return Err(ConvolveError::device(Stage::CreateBuffer, -30));
                }
                // SAFETY: COPY_HOST_PTR copies `len_bytes` from `data` during
                // the call; the pointer is not retained.
                unsafe {
                    Buffer::<u8>::create(
                        &self.context,
                        mem_flags(access) | CL_MEM_COPY_HOST_PTR,
                        len_bytes,
                        data.as_ptr() as *mut _,
                    )
                }
            }
            // SAFETY: no host pointer.
            None => unsafe { Buffer::<u8>::create(&self.context, mem_flags(access), len_bytes, ptr::null_mut()) },
        }
        .map_err(fail(Stage::CreateBuffer))?;

        Ok(OpenClBuffer { buffer, access, len_bytes })
    }

    fn write_buffer(&self, buffer: &mut OpenClBuffer, data: &[u8]) -> ConvolveResult<()> {
        // SAFETY: blocking write; `data` outlives the call.
        unsafe {
            self.queue
                .enqueue_write_buffer(&mut buffer.buffer, CL_BLOCKING, 0, data, &[])
                .map_err(fail(Stage::WriteBuffer))?;
        }
        Ok(())
    }

    fn read_buffer(&self, buffer: &OpenClBuffer, out: &mut [u8]) -> ConvolveResult<()> {
        // SAFETY: blocking read; `out` outlives the call.
        unsafe {
            self.queue
                .enqueue_read_buffer(&buffer.buffer, CL_BLOCKING, 0, out, &[])
                .map_err(fail(Stage::ReadBuffer))?;
        }
        Ok(())
    }

    fn dispatch(&self, kernel: &OpenClKernel, args: &KernelArgs<'_, OpenClBuffer>, work: &WorkSize) -> ConvolveResult<()> {
        let k = &kernel.kernel;

        // SAFETY: argument types match the kernel signature in parameter order.
        unsafe {
            k.set_arg(0, &args.input.buffer.get()).map_err(fail(Stage::SetArgument))?;
            k.set_arg(1, &args.mask.buffer.get()).map_err(fail(Stage::SetArgument))?;
            k.set_arg(2, &args.output.buffer.get()).map_err(fail(Stage::SetArgument))?;
            k.set_arg(3, &args.image_size).map_err(fail(Stage::SetArgument))?;
            k.set_arg(4, &args.mask_size).map_err(fail(Stage::SetArgument))?;
            k.set_arg(5, &args.mask_origin).map_err(fail(Stage::SetArgument))?;
        }

        trace!(global = ?work.global, local = ?work.local, "Enqueueing NDRange");

        // SAFETY: work-size arrays hold two elements each and live across the call.
        unsafe {
            self.queue
                .enqueue_nd_range_kernel(k.get(), 2, ptr::null(), work.global.as_ptr(), work.local.as_ptr(), &[])
                .map_err(fail(Stage::Dispatch))?;
        }
        Ok(())
    }
}
