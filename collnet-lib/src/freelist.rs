//! Pool of fixed-size, pre-registered message buffers.
//!
//! Buffers are carved out of page-aligned chunks that cover whole memory
//! pages, because the provider's registration interface wants full-page
//! coverage. The pool grows geometrically on demand, up to an optional
//! entry cap.

use std::{
    alloc::{Layout, alloc_zeroed, dealloc},
    ffi::c_void,
    ptr::NonNull,
};

use once_cell::sync::Lazy;

use crate::error::{CollNetError, Result};

pub(crate) static PAGE_SIZE: Lazy<usize> =
    Lazy::new(|| unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize });

/// Registers each new chunk with the provider and resolves per-rail
/// local descriptors for entries inside it.
pub(crate) trait ChunkRegistrar {
    type Handle;

    fn register(&mut self, ptr: NonNull<u8>, len: usize) -> Result<Self::Handle>;
    fn desc(&self, handle: &Self::Handle, rail_id: u16) -> *mut c_void;
}

/// Page-aligned, page-multiple, zeroed allocation.
pub(crate) struct PageAlloc {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl PageAlloc {
    pub fn new(min_bytes: usize) -> Result<Self> {
        let page = *PAGE_SIZE;
        let bytes = min_bytes.div_ceil(page) * page;
        let layout = Layout::from_size_align(bytes, page)
            .map_err(|_| CollNetError::Custom("bad page allocation layout"))?;
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })
            .ok_or(CollNetError::Custom("page allocation failed"))?;
        Ok(PageAlloc { ptr, layout })
    }

    pub fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for PageAlloc {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// An entry handed out by the pool. Carries its chunk index so the pool
/// can resolve the registration descriptor when posting.
pub(crate) struct FlElem {
    ptr: NonNull<u8>,
    len: usize,
    chunk: u16,
}

impl FlElem {
    pub fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

struct Chunk<H> {
    // The registration must be released before the memory.
    handle: H,
    _mem: PageAlloc,
}

pub(crate) struct Freelist<R: ChunkRegistrar> {
    registrar: R,
    entry_size: usize,
    chunks: Vec<Chunk<R::Handle>>,
    free: Vec<FlElem>,
    allocated_entries: usize,
    next_chunk_entries: usize,
    max_entries: Option<usize>,
}

impl<R: ChunkRegistrar> Freelist<R> {
    pub fn new(
        registrar: R,
        entry_size: usize,
        initial_entries: usize,
        max_entries: Option<usize>,
    ) -> Result<Self> {
        assert!(entry_size > 0);
        let mut fl = Freelist {
            registrar,
            entry_size,
            chunks: Vec::new(),
            free: Vec::new(),
            allocated_entries: 0,
            next_chunk_entries: initial_entries.max(1),
            max_entries,
        };
        fl.grow()?;
        Ok(fl)
    }

    fn grow(&mut self) -> Result<()> {
        let entries = self.next_chunk_entries;
        let mem = PageAlloc::new(entries * self.entry_size)?;
        let handle = self.registrar.register(mem.ptr(), mem.len())?;

        let chunk_idx = u16::try_from(self.chunks.len())
            .map_err(|_| CollNetError::ResourceExhausted("freelist chunk count"))?;
        // Whole pages were allocated, so hand out every entry that fits.
        let n = mem.len() / self.entry_size;
        for i in 0..n {
            self.free.push(FlElem {
                ptr: unsafe { mem.ptr().byte_add(i * self.entry_size) },
                len: self.entry_size,
                chunk: chunk_idx,
            });
        }
        self.allocated_entries += n;
        self.next_chunk_entries *= 2;
        self.chunks.push(Chunk { handle, _mem: mem });
        Ok(())
    }

    pub fn alloc(&mut self) -> Result<FlElem> {
        if let Some(elem) = self.free.pop() {
            return Ok(elem);
        }
        if let Some(max) = self.max_entries {
            if self.allocated_entries >= max {
                return Err(CollNetError::ResourceExhausted("freelist at capacity"));
            }
        }
        self.grow()?;
        self.free
            .pop()
            .ok_or(CollNetError::Custom("freelist growth produced no entries"))
    }

    pub fn free_entry(&mut self, elem: FlElem) {
        self.free.push(elem);
    }

    pub fn desc(&self, elem: &FlElem, rail_id: u16) -> *mut c_void {
        self.registrar.desc(&self.chunks[elem.chunk as usize].handle, rail_id)
    }
}
