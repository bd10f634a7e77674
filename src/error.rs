//! Error types for accelerator assembly, construction and decoding.

use thiserror::Error;

/// Errors that can occur while assembling or building an accelerator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Bvh4Error {
    /// Unknown construction mode, traversal mode or invalid setting.
    #[error("invalid {kind} \"{name}\"")]
    Configuration { kind: &'static str, name: String },

    /// No registered kernel runs on the host CPU.
    #[error("no {geometry} intersector supports the CPU features [{features}]")]
    UnsupportedCpu { geometry: String, features: String },

    /// Node or leaf storage cannot be sized for the primitive count.
    #[error("cannot allocate BVH storage for {prims} primitives: {reason}")]
    Allocation { prims: usize, reason: String },

    /// Internal consistency check failed.
    #[error("structural invariant violated: {0}")]
    StructuralInvariant(String),
}

impl Bvh4Error {
    pub(crate) fn configuration(kind: &'static str, name: impl Into<String>) -> Self {
        Self::Configuration {
            kind,
            name: name.into(),
        }
    }

    pub(crate) fn allocation(prims: usize, reason: impl Into<String>) -> Self {
        Self::Allocation {
            prims,
            reason: reason.into(),
        }
    }
}

/// Result type for accelerator operations.
pub type Result<T, E = Bvh4Error> = std::result::Result<T, E>;
