//! Graphics error types.

use thiserror::Error;

/// Errors that can occur in the renderer.
///
/// Only [`AllocationFailure`](GraphicsError::AllocationFailure) and
/// [`DeviceLost`](GraphicsError::DeviceLost) are expected at runtime on a
/// correctly written caller. [`SurfaceStale`](GraphicsError::SurfaceStale) is
/// produced by the backend but absorbed by the viewport layer, which resizes
/// and reports a skipped frame instead of propagating it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// Device memory or a descriptor pool is exhausted. Fatal, never retried.
    #[error("allocation failed: {0}")]
    AllocationFailure(String),
    /// The swapchain no longer matches its surface (out of date or suboptimal).
    #[error("swapchain is stale and needs to be recreated")]
    SurfaceStale,
    /// A resource was used outside of its contract (programmer error).
    #[error("resource misuse: {0}")]
    ResourceMisuse(String),
    /// Failed to initialize the backend.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),
    /// An invalid parameter was provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// A requested feature is not supported by the device or surface.
    #[error("feature not supported: {0}")]
    FeatureNotSupported(String),
    /// The GPU device was lost.
    #[error("GPU device lost")]
    DeviceLost,
    /// An internal backend error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience result alias used across the crate.
pub type GraphicsResult<T> = Result<T, GraphicsError>;

impl GraphicsError {
    /// Whether the error leaves the renderer unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AllocationFailure(_) | Self::DeviceLost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::AllocationFailure("vertex buffer (65536 bytes)".to_string());
        assert_eq!(
            err.to_string(),
            "allocation failed: vertex buffer (65536 bytes)"
        );

        let err = GraphicsError::SurfaceStale;
        assert_eq!(
            err.to_string(),
            "swapchain is stale and needs to be recreated"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(GraphicsError::AllocationFailure(String::new()).is_fatal());
        assert!(GraphicsError::DeviceLost.is_fatal());
        assert!(!GraphicsError::SurfaceStale.is_fatal());
        assert!(!GraphicsError::ResourceMisuse(String::new()).is_fatal());
    }
}
