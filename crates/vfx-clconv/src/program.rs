//! Program source loading and kernel compilation.

use std::path::Path;

use tracing::debug;

use crate::backend::ComputeBackend;
use crate::config::EngineConfig;
use crate::{ConvolveError, ConvolveResult};

/// Embedded convolution kernel.
const CONVOLUTION_SOURCE: &str = include_str!("../kernels/convolution.cl");

/// Device program source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSource {
    text: String,
    origin: String,
}

impl ProgramSource {
    /// Wraps caller-supplied source text.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), origin: "<inline>".to_string() }
    }

    /// The convolution kernel shipped with this crate.
    pub fn embedded() -> Self {
        Self {
            text: CONVOLUTION_SOURCE.to_string(),
            origin: "convolution.cl".to_string(),
        }
    }

    /// Reads source text from a file.
    pub fn from_file(path: impl AsRef<Path>) -> ConvolveResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), bytes = text.len(), "Loaded program source");
        Ok(Self { text, origin: path.display().to_string() })
    }

    /// Source text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Where the text came from (file path or `<inline>`).
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Whether the source declares `__kernel void <entry_point>(`.
    pub fn declares_kernel(&self, entry_point: &str) -> bool {
        if entry_point.is_empty() {
            return false;
        }
        let mut rest = self.text.as_str();
        while let Some(pos) = rest.find("kernel") {
            let after = &rest[pos + "kernel".len()..];
            let boundary_ok = rest[..pos]
                .chars()
                .next_back()
                .is_none_or(|c| c.is_whitespace() || c == '_');
            if boundary_ok && matches_signature(after, entry_point) {
                return true;
            }
            rest = after;
        }
        false
    }
}

impl Default for ProgramSource {
    fn default() -> Self {
        Self::embedded()
    }
}

// Matches `<ws>void<ws><entry><ws>(` at the start of `s`.
fn matches_signature(s: &str, entry_point: &str) -> bool {
    let Some(s) = s.strip_prefix(char::is_whitespace) else {
        return false;
    };
    let Some(s) = s.trim_start().strip_prefix("void") else {
        return false;
    };
    let Some(s) = s.strip_prefix(char::is_whitespace) else {
        return false;
    };
    let Some(s) = s.trim_start().strip_prefix(entry_point) else {
        return false;
    };
    s.trim_start().starts_with('(')
}

/// Compiles program source into a kernel handle.
///
/// The intermediate program object is released as soon as the kernel has
/// been extracted; only the kernel is kept.
#[derive(Debug, Clone)]
pub struct ProgramBuilder {
    options: String,
    entry_point: String,
}

impl ProgramBuilder {
    /// Builder with explicit options and entry point.
    pub fn new(options: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Self { options: options.into(), entry_point: entry_point.into() }
    }

    /// Builder using the options and entry point of `config`.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.build_options.clone(), config.entry_point.clone())
    }

    /// Compiler options.
    pub fn options(&self) -> &str {
        &self.options
    }

    /// Kernel entry point.
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Compiles `source` on `backend` and extracts the entry point.
    pub fn build<B: ComputeBackend>(&self, backend: &B, source: &ProgramSource) -> ConvolveResult<B::Kernel> {
        if source.text().trim().is_empty() {
            return Err(ConvolveError::BuildFailure {
                log: format!("{}: empty program source", source.origin()),
            });
        }
        if self.entry_point.is_empty() {
            return Err(ConvolveError::BuildFailure {
                log: "kernel entry point name is empty".to_string(),
            });
        }
        debug!(
            backend = backend.name(),
            origin = source.origin(),
            options = %self.options,
            entry = %self.entry_point,
            "Building program"
        );
        backend.build_kernel(source, &self.options, &self.entry_point)
    }
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_declares_convolution() {
        let src = ProgramSource::embedded();
        assert!(src.declares_kernel("convolution"));
        assert!(!src.declares_kernel("blur"));
        assert!(!src.declares_kernel(""));
    }

    #[test]
    fn test_declares_kernel_variants() {
        assert!(ProgramSource::new("__kernel void k(int a) {}").declares_kernel("k"));
        assert!(ProgramSource::new("kernel  void\n  k (int a) {}").declares_kernel("k"));
        assert!(!ProgramSource::new("__kernel void kk(int a) {}").declares_kernel("k"));
        assert!(!ProgramSource::new("void k(int a) {}").declares_kernel("k"));
        assert!(!ProgramSource::new("mykernel void k(int a) {}").declares_kernel("k"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conv.cl");
        std::fs::write(&path, "__kernel void convolution() {}").unwrap();

        let src = ProgramSource::from_file(&path).unwrap();
        assert!(src.declares_kernel("convolution"));
        assert!(src.origin().ends_with("conv.cl"));
    }

    #[test]
    fn test_from_missing_file() {
        let err = ProgramSource::from_file("/nonexistent/conv.cl").unwrap_err();
        assert!(matches!(err, ConvolveError::Io(_)));
    }
}
