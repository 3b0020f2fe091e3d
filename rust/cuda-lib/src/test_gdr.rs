use std::{ffi::c_void, ptr::NonNull};

use crate::gdr::GdrCopyContext;
use crate::rt::device_id_for_ptr;

#[test]
#[ignore = "requires a GPU with gdrcopy installed"]
fn gdr_pin_map_rmw() {
    // Set the current device and allocate a device buffer.
    let mut dev_ptr: *mut c_void = std::ptr::null_mut();
    let ret = unsafe { cudart_sys::cudaMalloc(&raw mut dev_ptr, 4096) };
    assert_eq!(ret, 0, "cudaMalloc failed");

    let ctx = GdrCopyContext::new().unwrap();
    let region = ctx.pin_and_map(dev_ptr as u64, 4096).unwrap();

    region.write_u64(0, 7).unwrap();
    assert_eq!(region.read_u64(0).unwrap(), 7);

    // Read-modify-write, the way a signal update runs.
    let v = region.read_u64(0).unwrap();
    region.write_u64(0, v + 3).unwrap();
    let v = region.read_u64(0).unwrap();
    region.write_u64(0, v + 5).unwrap();
    assert_eq!(region.read_u64(0).unwrap(), 15);

    drop(region);
    unsafe { cudart_sys::cudaFree(dev_ptr) };
}

#[test]
#[ignore = "requires a GPU"]
fn device_id_lookup() {
    let mut dev_ptr: *mut c_void = std::ptr::null_mut();
    let ret = unsafe { cudart_sys::cudaMalloc(&raw mut dev_ptr, 256) };
    assert_eq!(ret, 0, "cudaMalloc failed");

    let id = device_id_for_ptr(NonNull::new(dev_ptr).unwrap()).unwrap();
    assert!(id >= 0);

    unsafe { cudart_sys::cudaFree(dev_ptr) };
}
