use std::{
    collections::HashSet,
    ffi::c_void,
    ptr::NonNull,
    sync::{Arc, Mutex},
};

use crate::{
    error::CollNetError,
    error::Result,
    freelist::{ChunkRegistrar, Freelist, PAGE_SIZE},
};

/// Test registrar: records chunk geometry, registers nothing.
#[derive(Default)]
struct RecordingRegistrar {
    chunks: Arc<Mutex<Vec<(usize, usize)>>>,
}

struct NoDesc;

impl ChunkRegistrar for RecordingRegistrar {
    type Handle = NoDesc;

    fn register(&mut self, ptr: NonNull<u8>, len: usize) -> Result<NoDesc> {
        self.chunks.lock().unwrap().push((ptr.as_ptr() as usize, len));
        Ok(NoDesc)
    }

    fn desc(&self, _handle: &NoDesc, _rail_id: u16) -> *mut c_void {
        std::ptr::null_mut()
    }
}

#[test]
fn entries_are_distinct_and_reusable() {
    let mut fl = Freelist::new(RecordingRegistrar::default(), 64, 8, None).unwrap();
    let mut ptrs = HashSet::new();
    let mut elems = Vec::new();
    for _ in 0..8 {
        let elem = fl.alloc().unwrap();
        assert!(ptrs.insert(elem.ptr().as_ptr() as usize));
        elems.push(elem);
    }
    let first = elems[0].ptr();
    for elem in elems.into_iter().rev() {
        fl.free_entry(elem);
    }
    // LIFO free order puts the first entry back on top.
    assert_eq!(fl.alloc().unwrap().ptr(), first);
}

#[test]
fn chunks_are_page_aligned_and_page_multiple() {
    let registrar = RecordingRegistrar::default();
    let chunks = registrar.chunks.clone();
    let mut fl = Freelist::new(registrar, 48, 3, None).unwrap();

    // Drain the first chunk to force a second, geometrically larger one.
    let mut held = Vec::new();
    let first_chunk_entries = *PAGE_SIZE / 48;
    for _ in 0..first_chunk_entries + 1 {
        held.push(fl.alloc().unwrap());
    }

    let page = *PAGE_SIZE;
    let recorded = chunks.lock().unwrap().clone();
    assert!(recorded.len() >= 2);
    for (base, len) in &recorded {
        assert_eq!(base % page, 0, "chunk base not page aligned");
        assert_eq!(len % page, 0, "chunk length not a page multiple");
    }
    assert!(recorded[1].1 >= recorded[0].1);

    for elem in held {
        fl.free_entry(elem);
    }
}

#[test]
fn growth_is_capped() {
    let entries_per_page = *PAGE_SIZE / 64;
    let mut fl =
        Freelist::new(RecordingRegistrar::default(), 64, 4, Some(entries_per_page))
            .unwrap();
    let mut held = Vec::new();
    for _ in 0..entries_per_page {
        held.push(fl.alloc().unwrap());
    }
    match fl.alloc() {
        Err(CollNetError::ResourceExhausted(_)) => {}
        Err(other) => panic!("expected exhaustion, got {}", other),
        Ok(_) => panic!("expected exhaustion, got an entry"),
    }
    // Freeing makes entries available again without growth.
    fl.free_entry(held.pop().unwrap());
    fl.alloc().unwrap();
}

#[test]
fn entries_are_zeroed_at_start() {
    let mut fl = Freelist::new(RecordingRegistrar::default(), 128, 2, None).unwrap();
    let elem = fl.alloc().unwrap();
    assert!(elem.as_slice().iter().all(|&b| b == 0));
    fl.free_entry(elem);
}
