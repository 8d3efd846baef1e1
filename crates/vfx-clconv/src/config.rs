//! Engine configuration.

use crate::backend::DeviceSelector;

/// Build option enabling fused multiply-add.
pub const DEFAULT_BUILD_OPTIONS: &str = "-cl-mad-enable";

/// Kernel entry point the shipped program defines.
pub const DEFAULT_ENTRY_POINT: &str = "convolution";

/// Engine configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Platform/device the compute context binds to.
    pub device: DeviceSelector,
    /// Options passed to the program compiler.
    pub build_options: String,
    /// Kernel entry point to extract from the program.
    pub entry_point: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device: DeviceSelector::default(),
            build_options: DEFAULT_BUILD_OPTIONS.to_string(),
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
        }
    }
}

impl EngineConfig {
    /// Sets the device selector.
    pub fn with_device(mut self, device: DeviceSelector) -> Self {
        self.device = device;
        self
    }

    /// Replaces the build options.
    pub fn with_build_options(mut self, options: impl Into<String>) -> Self {
        self.build_options = options.into();
        self
    }

    /// Replaces the kernel entry point.
    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }
}
