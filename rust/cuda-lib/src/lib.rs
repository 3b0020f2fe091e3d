#![allow(non_snake_case)]

pub use cudart_sys;
pub use gdrapi_sys;
pub mod gdr;
pub mod rt;

mod error;
pub use error::{CudaError, CudaResult};

#[cfg(test)]
mod test_gdr;
