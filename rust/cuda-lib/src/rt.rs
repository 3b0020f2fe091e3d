use std::{
    ffi::{CStr, c_void},
    ptr::NonNull,
};

pub type CudartResult<T> = std::result::Result<T, CudartError>;

#[derive(Clone, Debug)]
pub struct CudartError {
    pub code: u32,
    pub context: &'static str,
}

impl CudartError {
    pub fn new(code: u32, context: &'static str) -> Self {
        Self { code, context }
    }
}

impl std::fmt::Display for CudartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CudartError: code {} ({:?}), context: {}",
            self.code,
            unsafe { CStr::from_ptr(cudart_sys::cudaGetErrorString(self.code)) },
            self.context
        )
    }
}

impl std::error::Error for CudartError {}

pub use cudart_sys::{cudaMemoryTypeDevice, cudaPointerAttributes};
pub fn cudaPointerGetAttributes(
    ptr: NonNull<c_void>,
) -> CudartResult<cudaPointerAttributes> {
    let mut attrs = cudaPointerAttributes::default();
    let ret =
        unsafe { cudart_sys::cudaPointerGetAttributes(&raw mut attrs, ptr.as_ptr()) };
    match ret {
        0 => Ok(attrs),
        _ => Err(CudartError::new(ret, "cudaPointerGetAttributes")),
    }
}

pub fn cudaGetDeviceCount() -> CudartResult<i32> {
    let mut count = 0;
    let ret = unsafe { cudart_sys::cudaGetDeviceCount(&raw mut count) };
    match ret {
        0 => Ok(count),
        _ => Err(CudartError::new(ret, "cudaGetDeviceCount")),
    }
}

pub fn cudaSetDevice(device: i32) -> CudartResult<()> {
    let ret = unsafe { cudart_sys::cudaSetDevice(device) };
    match ret {
        0 => Ok(()),
        _ => Err(CudartError::new(ret, "cudaSetDevice")),
    }
}

pub fn cudaGetDevice() -> CudartResult<i32> {
    let mut device = 0;
    let ret = unsafe { cudart_sys::cudaGetDevice(&raw mut device) };
    match ret {
        0 => Ok(device),
        _ => Err(CudartError::new(ret, "cudaGetDevice")),
    }
}

/// Resolve the CUDA device that owns `ptr`.
///
/// Fails if the pointer is not device memory; the device id is what the
/// provider's HMEM registration path wants.
pub fn device_id_for_ptr(ptr: NonNull<c_void>) -> CudartResult<i32> {
    let attrs = cudaPointerGetAttributes(ptr)?;
    if attrs.type_ != cudaMemoryTypeDevice {
        return Err(CudartError::new(attrs.type_, "pointer is not device memory"));
    }
    Ok(attrs.device)
}
