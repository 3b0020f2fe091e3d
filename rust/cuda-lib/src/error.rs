use crate::rt::CudartError;

pub type CudaResult<T> = ::std::result::Result<T, CudaError>;

#[derive(Debug, thiserror::Error)]
pub enum CudaError {
    #[error("{0}")]
    Cudart(#[from] CudartError),
    #[error("GdrCopyError: {0}")]
    GdrCopy(&'static str),
    #[error("GdrCopyLoadError: {0}")]
    GdrCopyLoad(#[from] libloading::Error),
}
