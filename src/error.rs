//! Error handling for the attractor engine
//!
//! One error type for every fallible operation. Locally recovered conditions
//! (clamped generations, chunked dispatches, reduction mismatches) are logged
//! instead of surfacing here.

use crate::compute::{BufferKind, BufferRole};

/// Main error type for the attractor engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // Configuration Errors
    #[error("Invalid configuration: {field} = {value} ({reason})")]
    InvalidConfiguration {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config {path}: {error}")]
    ConfigIo { path: String, error: String },

    #[error("Failed to parse config {path}: {error}")]
    ConfigParse { path: String, error: String },

    // Dispatch Errors
    #[error("Dispatch of {kernel} requests {requested} groups (max {max})")]
    DispatchLimitExceeded {
        kernel: String,
        requested: u32,
        max: u32,
    },

    #[error("Invalid dispatch of {kernel}: {reason}")]
    InvalidDispatch { kernel: String, reason: String },

    #[error("Kernel {kernel} expects a {expected:?} buffer for {role:?}, found {found:?}")]
    BufferKindMismatch {
        kernel: String,
        role: BufferRole,
        expected: BufferKind,
        found: BufferKind,
    },

    // Buffer Errors
    #[error("Unknown or released buffer: {id}")]
    UnknownBuffer { id: u32 },

    #[error("Buffer access out of bounds: index {index} >= size {size}")]
    BufferAccess { index: usize, size: usize },

    #[error("Buffer mapping failed: {context}")]
    BufferMapping { context: String },

    // GPU Errors
    #[error("GPU device not found")]
    DeviceNotFound,

    #[error("GPU operation '{operation}' failed: {error}")]
    GpuOperationFailed { operation: String, error: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Type alias for Results in the attractor engine
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Shorthand for the configuration taxonomy entry
    pub fn invalid_config(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        EngineError::InvalidConfiguration {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_dispatch(kernel: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::InvalidDispatch {
            kernel: kernel.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that must stop a cycle before any dispatch
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidConfiguration { .. }
                | EngineError::ConfigIo { .. }
                | EngineError::ConfigParse { .. }
        )
    }
}

// Helper functions for common error patterns

/// Convert Option to Result with context
pub trait OptionExt<T> {
    fn ok_or_engine<F>(self, f: F) -> EngineResult<T>
    where
        F: FnOnce() -> EngineError;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_engine<F>(self, f: F) -> EngineResult<T>
    where
        F: FnOnce() -> EngineError,
    {
        self.ok_or_else(f)
    }
}

/// Extension trait for adding context to foreign errors
pub trait ErrorContext<T> {
    fn context(self, msg: &str) -> EngineResult<T>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn context(self, msg: &str) -> EngineResult<T> {
        self.map_err(|e| EngineError::Internal {
            message: format!("{}: {}", msg, e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::BufferAccess { index: 10, size: 5 };
        assert_eq!(
            err.to_string(),
            "Buffer access out of bounds: index 10 >= size 5"
        );
    }

    #[test]
    fn test_invalid_config_display() {
        let err = EngineError::invalid_config("voxel_size", 0.0, "must be positive");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: voxel_size = 0 (must be positive)"
        );
        assert!(err.is_configuration());
    }

    #[test]
    fn test_option_ext() {
        let opt: Option<i32> = None;
        let result = opt.ok_or_engine(|| EngineError::UnknownBuffer { id: 3 });
        assert!(matches!(result, Err(EngineError::UnknownBuffer { id: 3 })));
    }

    #[test]
    fn test_error_context() {
        let result: Result<i32, std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));
        let with_context = result.context("loading config");
        match with_context {
            Err(EngineError::Internal { message }) => {
                assert!(message.starts_with("loading config"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
