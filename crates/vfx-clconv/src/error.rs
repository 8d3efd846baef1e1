//! Error types for the convolution engine.

use std::fmt;

use thiserror::Error;

/// Device-side step that failed during a filter call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Allocating a device buffer.
    CreateBuffer,
    /// Host-to-device transfer.
    WriteBuffer,
    /// Binding a kernel argument.
    SetArgument,
    /// Enqueueing the NDRange.
    Dispatch,
    /// Device-to-host transfer.
    ReadBuffer,
}

impl Stage {
    /// Short lowercase name, used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateBuffer => "create buffer",
            Self::WriteBuffer => "write buffer",
            Self::SetArgument => "set argument",
            Self::Dispatch => "dispatch",
            Self::ReadBuffer => "read buffer",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error type for engine construction and filter calls.
#[derive(Error, Debug)]
pub enum ConvolveError {
    /// No platform or matching device could be selected.
    #[error("no compatible compute device: {0}")]
    DeviceUnavailable(String),

    /// Program compilation or kernel extraction failed.
    #[error("program build failed:\n{log}")]
    BuildFailure {
        /// Compiler diagnostics.
        log: String,
    },

    /// Source or destination raster does not satisfy the filter preconditions.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// Mask is malformed or exceeds the device work-group limits.
    #[error("invalid mask: {0}")]
    InvalidMask(String),

    /// A device operation failed during a filter call.
    #[error("device operation failed at {stage} (error code {code})")]
    DeviceOperationFailure {
        /// Step that failed.
        stage: Stage,
        /// Driver error code.
        code: i32,
    },

    /// Engine was used after `shutdown`.
    #[error("engine is closed")]
    EngineClosed,

    /// Requested backend was not compiled in.
    #[error("backend not available: {0}")]
    BackendNotAvailable(String),

    /// Program source could not be loaded.
    #[error("failed to load program source: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvolveError {
    /// Shorthand for a failed device step.
    pub fn device(stage: Stage, code: i32) -> Self {
        Self::DeviceOperationFailure { stage, code }
    }

    /// Whether the engine stays usable after this error.
    ///
    /// Per-call failures leave the engine intact; construction failures and
    /// use after shutdown do not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidImage(_) | Self::DeviceOperationFailure { .. }
        )
    }
}

/// Result type for convolution operations.
pub type ConvolveResult<T> = Result<T, ConvolveError>;
