//! Registry of in-flight request objects.
//!
//! Requests are boxed so their addresses are stable; the box address is
//! the provider context pointer, and the table maps it back to the
//! owning box when a completion (or teardown) needs the object.

use std::{collections::HashMap, ffi::c_void, ptr::NonNull};

pub(crate) struct ReqTable<T> {
    map: HashMap<usize, Box<T>>,
}

impl<T> ReqTable<T> {
    pub fn new() -> Self {
        ReqTable { map: HashMap::new() }
    }

    pub fn insert(&mut self, req: Box<T>) -> NonNull<T> {
        let ptr = NonNull::from(Box::as_ref(&req));
        self.map.insert(ptr.as_ptr() as usize, req);
        ptr
    }

    pub fn get_mut(&mut self, ptr: NonNull<T>) -> Option<&mut T> {
        self.map.get_mut(&(ptr.as_ptr() as usize)).map(Box::as_mut)
    }

    pub fn take(&mut self, ptr: NonNull<T>) -> Option<Box<T>> {
        self.map.remove(&(ptr.as_ptr() as usize))
    }
}

pub(crate) fn ctx_of<T>(ptr: NonNull<T>) -> *mut c_void {
    ptr.as_ptr() as *mut c_void
}

pub(crate) fn from_ctx<T>(ctx: *mut c_void) -> Option<NonNull<T>> {
    NonNull::new(ctx as *mut T)
}
