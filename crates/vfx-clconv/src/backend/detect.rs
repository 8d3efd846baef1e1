//! Which backends this build can reach, and which one `Backend::Auto` picks.
//!
//! Every known backend is listed, including ones compiled out or without a
//! device, so `describe_backends` can tell the user what is missing.

use std::cmp::Reverse;

use super::Backend;

/// A backend as seen by detection.
#[derive(Debug, Clone)]
pub struct BackendInfo {
    /// Backend type.
    pub backend: Backend,
    /// Same as [`Backend::name`].
    pub name: &'static str,
    /// Whether a device can be opened right now.
    pub available: bool,
    /// Auto-selection rank among available backends (higher wins).
    pub priority: u32,
    /// One-line description.
    pub description: &'static str,
}

// Concrete backends with their auto-selection rank.
const KNOWN: [(Backend, u32, &str); 2] = [
    (Backend::OpenCl, 100, "GPU via OpenCL (opencl3)"),
    (Backend::Host, 10, "Simulated device on the host (rayon)"),
];

/// Lists known backends, available ones first, each group by priority.
pub fn detect_backends() -> Vec<BackendInfo> {
    let mut backends: Vec<BackendInfo> = KNOWN
        .iter()
        .map(|&(backend, priority, description)| BackendInfo {
            backend,
            name: backend.name(),
            available: backend.is_available(),
            priority,
            description,
        })
        .collect();
    backends.sort_by_key(|b| Reverse((b.available, b.priority)));
    backends
}

/// The highest-priority available backend. The host device is always there.
pub fn select_best_backend() -> Backend {
    detect_backends()
        .into_iter()
        .find(|b| b.available)
        .map_or(Backend::Host, |b| b.backend)
}

/// One `[+]`/`[-]` line per known backend.
pub fn describe_backends() -> String {
    detect_backends()
        .iter()
        .map(|b| format!("[{}] {}: {}\n", if b.available { '+' } else { '-' }, b.name, b.description))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_listed() {
        let backends = detect_backends();
        assert!(backends.iter().any(|b| b.backend == Backend::Host && b.available));
        assert!(describe_backends().contains("[+] host"));
    }

    #[test]
    fn test_all_backends_listed() {
        let backends = detect_backends();
        assert_eq!(backends.len(), KNOWN.len());
        assert!(backends.iter().all(|b| b.backend != Backend::Auto));
        assert!(describe_backends().contains("opencl: "));
    }

    #[test]
    fn test_available_first() {
        let backends = detect_backends();
        assert!(backends.windows(2).all(|w| w[0].available >= w[1].available));
        assert!(backends[0].available);
        assert_eq!(select_best_backend(), backends[0].backend);
    }

    #[cfg(not(feature = "opencl"))]
    #[test]
    fn test_opencl_compiled_out() {
        let desc = describe_backends();
        assert!(desc.starts_with("[+] host"));
        assert!(desc.contains("[-] opencl"));
        assert_eq!(select_best_backend(), Backend::Host);
    }
}
