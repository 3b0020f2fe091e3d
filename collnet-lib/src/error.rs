use std::ffi::CStr;

use cuda_lib::CudaError;
use libfabric_sys::fi_strerror;

pub type Result<T> = std::result::Result<T, CollNetError>;

#[derive(Debug, thiserror::Error)]
pub enum CollNetError {
    #[error("{0}")]
    Libfabric(#[from] LibfabricError),
    #[error("CompletionError: {0}")]
    Completion(String),
    #[error("{0}")]
    Cuda(#[from] CudaError),
    #[error("InvalidArgument: {0}")]
    InvalidArgument(&'static str),
    #[error("ResourceExhausted: {0}")]
    ResourceExhausted(&'static str),
    #[error("ProtocolViolation: {0}")]
    Protocol(&'static str),
    #[error("BufferTooSmall")]
    BufferTooSmall,
    #[error("CollNetError: {0}")]
    Custom(&'static str),
}

/// A non-recoverable return code from a provider call. `code` keeps the
/// negative errno-style value the provider returned.
#[derive(Clone, Debug)]
pub struct LibfabricError {
    pub code: i32,
    pub context: &'static str,
}

impl LibfabricError {
    pub fn new(code: i32, context: &'static str) -> Self {
        Self { code, context }
    }
}

impl std::fmt::Display for LibfabricError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "LibfabricError: code {} ({:?}), context: {}",
            self.code,
            unsafe { CStr::from_ptr(fi_strerror(self.code.unsigned_abs() as i32)) },
            self.context
        )
    }
}

impl std::error::Error for LibfabricError {}
