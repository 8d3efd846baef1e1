//! Host-simulated compute device.
//!
//! Models the parts of an OpenCL device the engine depends on: platform and
//! device enumeration, program build diagnostics, sized buffers with access
//! modes, NDRange validation and execution (rayon), and driver error codes.
//! A [`HostProbe`] observes allocations and release order and can inject a
//! one-shot failure at any [`Stage`].

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rayon::prelude::*;
use tracing::{debug, trace, warn};

use super::{ComputeBackend, DeviceBuffer, DeviceInfo, DeviceSelector, DeviceType, KernelArgs, MemAccess};
use crate::error::Stage;
use crate::program::ProgramSource;
use crate::reference::convolve_pixel;
use crate::worksize::WorkSize;
use crate::{ConvolveError, ConvolveResult};

// OpenCL error codes reported by the simulated driver.
const CL_INVALID_VALUE: i32 = -30;
const CL_INVALID_MEM_OBJECT: i32 = -38;
const CL_INVALID_KERNEL_ARGS: i32 = -52;
const CL_INVALID_WORK_GROUP_SIZE: i32 = -54;
const CL_INVALID_WORK_ITEM_SIZE: i32 = -55;
const CL_INVALID_BUFFER_SIZE: i32 = -61;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Platforms
// =============================================================================

/// A simulated platform and the devices it enumerates.
#[derive(Debug, Clone)]
pub struct HostPlatform {
    /// Platform name.
    pub name: String,
    /// Enumerated devices, in enumeration order.
    pub devices: Vec<DeviceInfo>,
}

impl HostPlatform {
    /// One simulated GPU followed by one simulated CPU.
    pub fn simulated() -> Self {
        Self {
            name: "vfx-clconv host".to_string(),
            devices: vec![
                DeviceInfo {
                    name: "Host Simulated GPU".to_string(),
                    vendor: "vfx-rs".to_string(),
                    device_type: DeviceType::Gpu,
                    max_work_group_size: 1024,
                    max_work_item_sizes: vec![1024, 1024, 64],
                },
                DeviceInfo {
                    name: "Host Simulated CPU".to_string(),
                    vendor: "vfx-rs".to_string(),
                    device_type: DeviceType::Cpu,
                    max_work_group_size: 8192,
                    max_work_item_sizes: vec![8192, 8192, 8192],
                },
            ],
        }
    }

    /// Platform with no devices.
    pub fn empty(name: impl Into<String>) -> Self {
        Self { name: name.into(), devices: Vec::new() }
    }

    /// Platform with the given devices.
    pub fn with_devices(name: impl Into<String>, devices: Vec<DeviceInfo>) -> Self {
        Self { name: name.into(), devices }
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::simulated()
    }
}

// =============================================================================
// Shared device state
// =============================================================================

#[derive(Default)]
struct DeviceState {
    next_buffer_id: AtomicU64,
    live_buffers: AtomicUsize,
    total_allocations: AtomicUsize,
    dispatches: AtomicUsize,
    fault: Mutex<Option<(Stage, i32)>>,
    releases: Mutex<Vec<&'static str>>,
}

impl DeviceState {
    fn check(&self, stage: Stage) -> ConvolveResult<()> {
        let mut fault = lock(&self.fault);
        match *fault {
            Some((s, code)) if s == stage => {
                *fault = None;
                warn!(stage = %stage, code, "Injected device failure");
                Err(ConvolveError::device(stage, code))
            }
            _ => Ok(()),
        }
    }

    fn record_release(&self, what: &'static str) {
        lock(&self.releases).push(what);
    }
}

/// Observer for a [`HostContext`] that outlives moving the context into an
/// engine.
#[derive(Clone)]
pub struct HostProbe {
    state: Arc<DeviceState>,
}

impl HostProbe {
    /// Makes the next operation at `stage` fail with driver error `code`.
    pub fn fail_next(&self, stage: Stage, code: i32) {
        *lock(&self.state.fault) = Some((stage, code));
    }

    /// Clears a pending injected failure.
    pub fn clear_fault(&self) {
        *lock(&self.state.fault) = None;
    }

    /// Buffers currently allocated.
    pub fn live_buffers(&self) -> usize {
        self.state.live_buffers.load(Ordering::SeqCst)
    }

    /// Buffers allocated since the context was created.
    pub fn total_allocations(&self) -> usize {
        self.state.total_allocations.load(Ordering::SeqCst)
    }

    /// Kernel executions completed.
    pub fn dispatches(&self) -> usize {
        self.state.dispatches.load(Ordering::SeqCst)
    }

    /// Released objects in release order (`"buffer"`, `"kernel"`, `"queue"`, `"context"`).
    pub fn releases(&self) -> Vec<&'static str> {
        lock(&self.state.releases).clone()
    }
}

impl std::fmt::Debug for HostProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostProbe")
            .field("live_buffers", &self.live_buffers())
            .field("total_allocations", &self.total_allocations())
            .field("dispatches", &self.dispatches())
            .finish()
    }
}

// =============================================================================
// Handles
// =============================================================================

/// Simulated device buffer.
pub struct HostBuffer {
    id: u64,
    access: MemAccess,
    len_bytes: usize,
    words: Mutex<Vec<u32>>,
    state: Arc<DeviceState>,
}

impl DeviceBuffer for HostBuffer {
    fn access(&self) -> MemAccess {
        self.access
    }

    fn len_bytes(&self) -> usize {
        self.len_bytes
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        self.state.live_buffers.fetch_sub(1, Ordering::SeqCst);
        self.state.record_release("buffer");
        trace!(id = self.id, bytes = self.len_bytes, "Released host buffer");
    }
}

impl std::fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBuffer")
            .field("id", &self.id)
            .field("access", &self.access)
            .field("len_bytes", &self.len_bytes)
            .finish()
    }
}

/// Simulated compiled kernel.
pub struct HostKernel {
    entry_point: String,
    options: String,
    work_group_size: usize,
    state: Arc<DeviceState>,
}

impl HostKernel {
    /// Entry point name.
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Options the kernel was built with.
    pub fn options(&self) -> &str {
        &self.options
    }
}

impl std::fmt::Debug for HostKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostKernel")
            .field("entry_point", &self.entry_point)
            .field("options", &self.options)
            .field("work_group_size", &self.work_group_size)
            .finish()
    }
}

impl Drop for HostKernel {
    fn drop(&mut self) {
        self.state.record_release("kernel");
    }
}

// =============================================================================
// Context
// =============================================================================

/// Compute context on a simulated host device.
pub struct HostContext {
    info: DeviceInfo,
    platform: String,
    kernel_work_group_size: Option<usize>,
    state: Arc<DeviceState>,
}

impl HostContext {
    /// Binds to the selected device of the default simulated platform.
    pub fn new(selector: &DeviceSelector) -> ConvolveResult<Self> {
        Self::from_platforms(vec![HostPlatform::simulated()], selector)
    }

    /// Binds to the selected device of `platforms`.
    pub fn from_platforms(platforms: Vec<HostPlatform>, selector: &DeviceSelector) -> ConvolveResult<Self> {
        let count = platforms.len();
        let platform = platforms
            .into_iter()
            .nth(selector.platform_index)
            .ok_or_else(|| {
                ConvolveError::DeviceUnavailable(format!(
                    "platform {} not found ({} enumerated)",
                    selector.platform_index, count
                ))
            })?;

        let info = platform
            .devices
            .into_iter()
            .filter(|d| selector.device_type.matches(d.device_type))
            .nth(selector.device_index)
            .ok_or_else(|| {
                ConvolveError::DeviceUnavailable(format!(
                    "no {} device {} on platform '{}'",
                    selector.device_type, selector.device_index, platform.name
                ))
            })?;

        debug!(platform = %platform.name, device = %info.name, "Created host context");
        Ok(Self {
            info,
            platform: platform.name,
            kernel_work_group_size: None,
            state: Arc::new(DeviceState::default()),
        })
    }

    /// Caps the work-group size of every kernel built on this context below
    /// the device maximum, as register or local-memory pressure does on real
    /// hardware.
    pub fn with_kernel_work_group_size(mut self, limit: usize) -> Self {
        self.kernel_work_group_size = Some(limit);
        self
    }

    /// Observer sharing this context's device state.
    pub fn probe(&self) -> HostProbe {
        HostProbe { state: Arc::clone(&self.state) }
    }

    /// Platform name.
    pub fn platform_name(&self) -> &str {
        &self.platform
    }

    fn check_options(options: &str) -> ConvolveResult<()> {
        const PREFIXES: [&str; 5] = ["-cl-", "-D", "-I", "-W", "-w"];
        for opt in options.split_whitespace() {
            if !PREFIXES.iter().any(|p| opt.starts_with(p)) {
                return Err(ConvolveError::BuildFailure {
                    log: format!("error: invalid build option '{}'", opt),
                });
            }
        }
        Ok(())
    }

    fn check_balanced(source: &ProgramSource) -> ConvolveResult<()> {
        let code = strip_comments(source.text());
        let mut depth = [0i64; 2];
        for (line_no, line) in code.lines().enumerate() {
            for c in line.chars() {
                match c {
                    '{' => depth[0] += 1,
                    '}' => depth[0] -= 1,
                    '(' => depth[1] += 1,
                    ')' => depth[1] -= 1,
                    _ => {}
                }
                if depth.iter().any(|&d| d < 0) {
                    return Err(ConvolveError::BuildFailure {
                        log: format!("{}:{}: error: unexpected '{}'", source.origin(), line_no + 1, c),
                    });
                }
            }
        }
        if depth != [0, 0] {
            return Err(ConvolveError::BuildFailure {
                log: format!("{}: error: unexpected end of file", source.origin()),
            });
        }
        Ok(())
    }

    fn new_buffer(&self, access: MemAccess, len_bytes: usize, words: Vec<u32>) -> HostBuffer {
        let id = self.state.next_buffer_id.fetch_add(1, Ordering::SeqCst);
        self.state.live_buffers.fetch_add(1, Ordering::SeqCst);
        self.state.total_allocations.fetch_add(1, Ordering::SeqCst);
        trace!(id, ?access, bytes = len_bytes, "Allocated host buffer");
        HostBuffer { id, access, len_bytes, words: Mutex::new(words), state: Arc::clone(&self.state) }
    }

    fn validate_args(&self, args: &KernelArgs<'_, HostBuffer>) -> ConvolveResult<()> {
        let arg_err = |code| Err(ConvolveError::device(Stage::SetArgument, code));

        let ids = [args.input.id, args.mask.id, args.output.id];
        if ids[0] == ids[1] || ids[0] == ids[2] || ids[1] == ids[2] {
            return arg_err(CL_INVALID_MEM_OBJECT);
        }
        if !args.input.access.readable() || !args.mask.access.readable() || !args.output.access.writable() {
            return arg_err(CL_INVALID_MEM_OBJECT);
        }
        if args.image_size.iter().chain(&args.mask_size).any(|&d| d <= 0) {
            return arg_err(CL_INVALID_KERNEL_ARGS);
        }
        if args.mask_origin.iter().any(|&o| o < 0) {
            return arg_err(CL_INVALID_KERNEL_ARGS);
        }

        let pixels = (args.image_size[0] as usize) * (args.image_size[1] as usize);
        let weights = (args.mask_size[0] as usize) * (args.mask_size[1] as usize);
        if args.input.len_bytes < pixels * 4
            || args.output.len_bytes < pixels * 4
            || args.mask.len_bytes < weights * 4
        {
            return arg_err(CL_INVALID_KERNEL_ARGS);
        }
        Ok(())
    }

    fn validate_work(&self, work: &WorkSize) -> ConvolveResult<()> {
        let dispatch_err = |code| Err(ConvolveError::device(Stage::Dispatch, code));

        if work.local.contains(&0) {
            return dispatch_err(CL_INVALID_WORK_GROUP_SIZE);
        }
        if work.global[0] % work.local[0] != 0 || work.global[1] % work.local[1] != 0 {
            return dispatch_err(CL_INVALID_WORK_GROUP_SIZE);
        }
        if work.group_items() > self.info.max_work_group_size {
            return dispatch_err(CL_INVALID_WORK_GROUP_SIZE);
        }
        if self.kernel_work_group_size.is_some_and(|limit| work.group_items() > limit) {
            return dispatch_err(CL_INVALID_WORK_GROUP_SIZE);
        }
        let item_ok = work
            .local
            .iter()
            .zip(&self.info.max_work_item_sizes)
            .all(|(l, max)| l <= max);
        if !item_ok {
            return dispatch_err(CL_INVALID_WORK_ITEM_SIZE);
        }
        Ok(())
    }

    /// Always available.
    pub fn is_available() -> bool {
        true
    }
}

impl Drop for HostContext {
    fn drop(&mut self) {
        self.state.record_release("queue");
        self.state.record_release("context");
        debug!(device = %self.info.name, "Released host context");
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("platform", &self.platform)
            .field("device", &self.info.name)
            .finish()
    }
}

impl ComputeBackend for HostContext {
    type Buffer = HostBuffer;
    type Kernel = HostKernel;

    fn name(&self) -> &'static str {
        "host"
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    fn build_kernel(&self, source: &ProgramSource, options: &str, entry_point: &str) -> ConvolveResult<HostKernel> {
        Self::check_options(options)?;
        Self::check_balanced(source)?;
        if !source.declares_kernel(entry_point) {
            return Err(ConvolveError::BuildFailure {
                log: format!("{}: error: no kernel named '{}'", source.origin(), entry_point),
            });
        }
        trace!(entry = entry_point, "Program compiled, kernel extracted, program released");
        let work_group_size = self
            .kernel_work_group_size
            .map_or(self.info.max_work_group_size, |limit| limit.min(self.info.max_work_group_size));
        Ok(HostKernel {
            entry_point: entry_point.to_string(),
            options: options.to_string(),
            work_group_size,
            state: Arc::clone(&self.state),
        })
    }

    fn kernel_work_group_size(&self, kernel: &HostKernel) -> usize {
        kernel.work_group_size
    }

    fn create_buffer(&self, access: MemAccess, len_bytes: usize, init: Option<&[u8]>) -> ConvolveResult<HostBuffer> {
        self.state.check(Stage::CreateBuffer)?;
        if len_bytes == 0 {
            return Err(ConvolveError::device(Stage::CreateBuffer, CL_INVALID_BUFFER_SIZE));
        }

        let mut words = vec![0u32; len_bytes.div_ceil(4)];
        if let Some(data) = init {
            if data.len() != len_bytes {
                return Err(ConvolveError::device(Stage::CreateBuffer, CL_INVALID_VALUE));
            }
            bytemuck::cast_slice_mut::<u32, u8>(&mut words)[..len_bytes].copy_from_slice(data);
        }
        Ok(self.new_buffer(access, len_bytes, words))
    }

    fn write_buffer(&self, buffer: &mut HostBuffer, data: &[u8]) -> ConvolveResult<()> {
        self.state.check(Stage::WriteBuffer)?;
        if data.len() > buffer.len_bytes {
            return Err(ConvolveError::device(Stage::WriteBuffer, CL_INVALID_VALUE));
        }
        let words = buffer.words.get_mut().unwrap_or_else(PoisonError::into_inner);
        bytemuck::cast_slice_mut::<u32, u8>(words)[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: &HostBuffer, out: &mut [u8]) -> ConvolveResult<()> {
        self.state.check(Stage::ReadBuffer)?;
        if out.len() > buffer.len_bytes {
            return Err(ConvolveError::device(Stage::ReadBuffer, CL_INVALID_VALUE));
        }
        let words = lock(&buffer.words);
        out.copy_from_slice(&bytemuck::cast_slice::<u32, u8>(&words)[..out.len()]);
        Ok(())
    }

    fn dispatch(&self, kernel: &HostKernel, args: &KernelArgs<'_, HostBuffer>, work: &WorkSize) -> ConvolveResult<()> {
        self.state.check(Stage::SetArgument)?;
        self.validate_args(args)?;
        self.state.check(Stage::Dispatch)?;
        self.validate_work(work)?;

        trace!(
            entry = %kernel.entry_point,
            global = ?work.global,
            local = ?work.local,
            "Executing NDRange on host"
        );

        let [w, h] = [args.image_size[0] as usize, args.image_size[1] as usize];
        let input = lock(&args.input.words);
        let mask = lock(&args.mask.words);
        let mut output = lock(&args.output.words);

        let pixels = &input[..w * h];
        let weights: Vec<f32> = mask[..(args.mask_size[0] * args.mask_size[1]) as usize]
            .iter()
            .map(|&bits| f32::from_bits(bits))
            .collect();

        // Work items past the image edge (grid padding) do nothing.
        let cols = work.global[0].min(w);
        output[..w * h]
            .par_chunks_mut(w)
            .enumerate()
            .take(work.global[1])
            .for_each(|(gy, row)| {
                for (gx, px) in row.iter_mut().enumerate().take(cols) {
                    *px = convolve_pixel(
                        pixels,
                        args.image_size,
                        &weights,
                        args.mask_size,
                        args.mask_origin,
                        gx as i32,
                        gy as i32,
                    );
                }
            });

        self.state.dispatches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// Blanks out `//` and `/* */` comments, keeping newlines so line numbers hold.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('/', Some('/')) => {
                while chars.next_if(|&n| n != '\n').is_some() {}
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = ' ';
                for n in chars.by_ref() {
                    if n == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
            }
            _ => out.push(c),
        }
    }
    out
}
