//! Platform and device selection.

use std::fmt;

/// Device category to enumerate on a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// Discrete or integrated GPU.
    #[default]
    Gpu,
    /// CPU device.
    Cpu,
    /// Dedicated accelerator.
    Accelerator,
    /// Any device type.
    All,
}

impl DeviceType {
    /// Whether a device of type `other` matches this filter.
    pub fn matches(&self, other: DeviceType) -> bool {
        *self == DeviceType::All || *self == other
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gpu => "GPU",
            Self::Cpu => "CPU",
            Self::Accelerator => "accelerator",
            Self::All => "any",
        };
        f.write_str(name)
    }
}

/// Which platform and device a context binds to.
///
/// The default picks the first GPU on the first platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceSelector {
    /// Index into the enumerated platforms.
    pub platform_index: usize,
    /// Device category to enumerate.
    pub device_type: DeviceType,
    /// Index into the matching devices of that platform.
    pub device_index: usize,
}

impl DeviceSelector {
    /// First device of `device_type` on the first platform.
    pub fn of_type(device_type: DeviceType) -> Self {
        Self { device_type, ..Default::default() }
    }

    /// Sets the platform index.
    pub fn with_platform(mut self, index: usize) -> Self {
        self.platform_index = index;
        self
    }

    /// Sets the device index.
    pub fn with_device(mut self, index: usize) -> Self {
        self.device_index = index;
        self
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "platform {} / {} device {}",
            self.platform_index, self.device_type, self.device_index
        )
    }
}

/// Properties of the selected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device name (e.g. "NVIDIA GeForce RTX 3080").
    pub name: String,
    /// Vendor string.
    pub vendor: String,
    /// Device category.
    pub device_type: DeviceType,
    /// Maximum work items per work group.
    pub max_work_group_size: usize,
    /// Maximum work items per group along each dimension.
    pub max_work_item_sizes: Vec<usize>,
}

impl DeviceInfo {
    /// Whether a `local` work-group size is accepted by this device.
    pub fn accepts_local_size(&self, local: [usize; 2]) -> bool {
        let product = local[0] * local[1];
        let dims_ok = local
            .iter()
            .zip(self.max_work_item_sizes.iter())
            .all(|(l, max)| l <= max);
        product <= self.max_work_group_size && dims_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_selector() {
        let sel = DeviceSelector::default();
        assert_eq!(sel.platform_index, 0);
        assert_eq!(sel.device_type, DeviceType::Gpu);
        assert_eq!(sel.device_index, 0);
        assert_eq!(sel.to_string(), "platform 0 / GPU device 0");
    }

    #[test]
    fn test_type_matches() {
        assert!(DeviceType::All.matches(DeviceType::Cpu));
        assert!(DeviceType::Gpu.matches(DeviceType::Gpu));
        assert!(!DeviceType::Gpu.matches(DeviceType::Cpu));
    }

    #[test]
    fn test_accepts_local_size() {
        let info = DeviceInfo {
            name: "test".into(),
            vendor: "test".into(),
            device_type: DeviceType::Gpu,
            max_work_group_size: 256,
            max_work_item_sizes: vec![256, 16, 1],
        };
        assert!(info.accepts_local_size([16, 16]));
        assert!(!info.accepts_local_size([32, 16]));
        assert!(!info.accepts_local_size([4, 32]));
    }
}
