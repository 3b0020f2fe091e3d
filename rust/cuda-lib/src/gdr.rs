//! GDRCopy wrapper.
//!
//! `libgdrapi.so` is not a build-time dependency: the library is loaded
//! at runtime and its entry points are resolved into a typed vtable, so
//! the plugin still loads on machines without GDRCopy installed. The
//! types come from `gdrapi-sys`, which generates bindings without a link
//! directive.

use std::{
    ffi::{c_ulong, c_void},
    ptr::null_mut,
    sync::Arc,
};

use gdrapi_sys::{gdr_mh_t, gdr_t};
use libloading::Library;
use tracing::debug;

use crate::{CudaError, CudaResult};

/// GPU page granularity required by gdr_pin_buffer.
pub const GPU_PAGE_SIZE: u64 = 1 << 16;

type GdrOpenFn = unsafe extern "C" fn() -> gdr_t;
type GdrCloseFn = unsafe extern "C" fn(gdr_t) -> i32;
type GdrPinBufferFn =
    unsafe extern "C" fn(gdr_t, c_ulong, usize, u64, u32, *mut gdr_mh_t) -> i32;
type GdrUnpinBufferFn = unsafe extern "C" fn(gdr_t, gdr_mh_t) -> i32;
type GdrMapFn = unsafe extern "C" fn(gdr_t, gdr_mh_t, *mut *mut c_void, usize) -> i32;
type GdrUnmapFn = unsafe extern "C" fn(gdr_t, gdr_mh_t, *mut c_void, usize) -> i32;
type GdrCopyToMappingFn =
    unsafe extern "C" fn(gdr_mh_t, *mut c_void, *const c_void, usize) -> i32;
type GdrCopyFromMappingFn =
    unsafe extern "C" fn(gdr_mh_t, *mut c_void, *const c_void, usize) -> i32;

/// Resolved entry points of libgdrapi. The `Library` must outlive every
/// function pointer, so it is kept in the same struct.
struct GdrApi {
    _lib: Library,
    open: GdrOpenFn,
    close: GdrCloseFn,
    pin_buffer: GdrPinBufferFn,
    unpin_buffer: GdrUnpinBufferFn,
    map: GdrMapFn,
    unmap: GdrUnmapFn,
    copy_to_mapping: GdrCopyToMappingFn,
    copy_from_mapping: GdrCopyFromMappingFn,
}

impl GdrApi {
    fn load() -> CudaResult<Self> {
        let lib = unsafe { Library::new("libgdrapi.so") }?;
        unsafe {
            Ok(GdrApi {
                open: *lib.get(b"gdr_open\0")?,
                close: *lib.get(b"gdr_close\0")?,
                pin_buffer: *lib.get(b"gdr_pin_buffer\0")?,
                unpin_buffer: *lib.get(b"gdr_unpin_buffer\0")?,
                map: *lib.get(b"gdr_map\0")?,
                unmap: *lib.get(b"gdr_unmap\0")?,
                copy_to_mapping: *lib.get(b"gdr_copy_to_mapping\0")?,
                copy_from_mapping: *lib.get(b"gdr_copy_from_mapping\0")?,
                _lib: lib,
            })
        }
    }
}

struct GdrHandle {
    api: GdrApi,
    gdr: gdr_t,
}

unsafe impl Send for GdrHandle {}
unsafe impl Sync for GdrHandle {}

impl Drop for GdrHandle {
    fn drop(&mut self) {
        unsafe { (self.api.close)(self.gdr) };
    }
}

/// Process-wide GDRCopy context. Cheap to clone; the underlying gdr
/// handle lives until the last clone is dropped.
#[derive(Clone)]
pub struct GdrCopyContext {
    inner: Arc<GdrHandle>,
}

impl GdrCopyContext {
    pub fn new() -> CudaResult<Self> {
        debug!("gdrcopy: initializing");
        let api = GdrApi::load()?;
        let gdr = unsafe { (api.open)() };
        if gdr.is_null() {
            return Err(CudaError::GdrCopy("gdr_open failed"));
        }
        Ok(GdrCopyContext { inner: Arc::new(GdrHandle { api, gdr }) })
    }

    /// Pin `len` bytes of device memory at `addr` and map them into host
    /// virtual memory. The pin range is widened to GPU page boundaries.
    pub fn pin_and_map(&self, addr: u64, len: usize) -> CudaResult<GdrPinnedRegion> {
        let pin_base = addr & !(GPU_PAGE_SIZE - 1);
        let pin_len =
            ((addr + len as u64).div_ceil(GPU_PAGE_SIZE) * GPU_PAGE_SIZE - pin_base)
                as usize;

        let handle = &*self.inner;
        let mut mh = gdr_mh_t::default();
        let ret = unsafe {
            (handle.api.pin_buffer)(
                handle.gdr,
                pin_base as c_ulong,
                pin_len,
                0,
                0,
                &raw mut mh,
            )
        };
        if ret != 0 {
            return Err(CudaError::GdrCopy("gdr_pin_buffer failed"));
        }

        let mut mapped: *mut c_void = null_mut();
        let ret =
            unsafe { (handle.api.map)(handle.gdr, mh, &raw mut mapped, pin_len) };
        if ret != 0 {
            unsafe { (handle.api.unpin_buffer)(handle.gdr, mh) };
            return Err(CudaError::GdrCopy("gdr_map failed"));
        }

        Ok(GdrPinnedRegion {
            ctx: self.inner.clone(),
            mh,
            mapped,
            pin_len,
            offset: (addr - pin_base) as usize,
        })
    }
}

/// A pinned-and-mapped device memory range. Offsets on the accessors are
/// relative to the address originally passed to `pin_and_map`.
pub struct GdrPinnedRegion {
    ctx: Arc<GdrHandle>,
    mh: gdr_mh_t,
    mapped: *mut c_void,
    pin_len: usize,
    offset: usize,
}

unsafe impl Send for GdrPinnedRegion {}
unsafe impl Sync for GdrPinnedRegion {}

impl GdrPinnedRegion {
    fn map_ptr(&self, off: u64) -> *mut c_void {
        unsafe { self.mapped.byte_add(self.offset + off as usize) }
    }

    pub fn read_u64(&self, off: u64) -> CudaResult<u64> {
        let mut value: u64 = 0;
        let ret = unsafe {
            (self.ctx.api.copy_from_mapping)(
                self.mh,
                &raw mut value as *mut c_void,
                self.map_ptr(off),
                size_of::<u64>(),
            )
        };
        match ret {
            0 => Ok(value),
            _ => Err(CudaError::GdrCopy("gdr_copy_from_mapping failed")),
        }
    }

    pub fn write_u64(&self, off: u64, value: u64) -> CudaResult<()> {
        let ret = unsafe {
            (self.ctx.api.copy_to_mapping)(
                self.mh,
                self.map_ptr(off),
                &raw const value as *const c_void,
                size_of::<u64>(),
            )
        };
        match ret {
            0 => Ok(()),
            _ => Err(CudaError::GdrCopy("gdr_copy_to_mapping failed")),
        }
    }
}

impl Drop for GdrPinnedRegion {
    fn drop(&mut self) {
        unsafe {
            (self.ctx.api.unmap)(self.ctx.gdr, self.mh, self.mapped, self.pin_len);
            (self.ctx.api.unpin_buffer)(self.ctx.gdr, self.mh);
        }
    }
}
