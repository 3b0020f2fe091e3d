use std::sync::Arc;

use parking_lot::Mutex;

/// Bitset-backed id allocator. Allocation returns the lowest free id so
/// ids stay dense; every id must be freed exactly once.
pub struct IdPool {
    bits: Vec<u64>,
    capacity: usize,
}

impl IdPool {
    pub fn new(capacity: usize) -> Self {
        IdPool { bits: vec![0; capacity.div_ceil(64)], capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocate the lowest free id, or `None` when the pool is
    /// exhausted.
    pub fn allocate(&mut self) -> Option<u64> {
        for (word_idx, word) in self.bits.iter_mut().enumerate() {
            if *word != u64::MAX {
                let bit = word.trailing_ones() as usize;
                let id = word_idx * 64 + bit;
                if id >= self.capacity {
                    return None;
                }
                *word |= 1u64 << bit;
                return Some(id as u64);
            }
        }
        None
    }

    /// Return a previously allocated id to the pool.
    pub fn free(&mut self, id: u64) {
        let id = id as usize;
        assert!(id < self.capacity, "id {} outside pool capacity", id);
        let (word_idx, bit) = (id / 64, id % 64);
        assert!(
            self.bits[word_idx] & (1u64 << bit) != 0,
            "id {} freed twice",
            id
        );
        self.bits[word_idx] &= !(1u64 << bit);
    }
}

/// An id borrowed from a shared pool, returned on drop. Guarantees the
/// exactly-once free that registration keys require.
pub(crate) struct PoolKey {
    key: u64,
    pool: Arc<Mutex<IdPool>>,
}

impl PoolKey {
    pub fn allocate(pool: &Arc<Mutex<IdPool>>) -> Option<PoolKey> {
        let key = pool.lock().allocate()?;
        Some(PoolKey { key, pool: pool.clone() })
    }

    pub fn key(&self) -> u64 {
        self.key
    }
}

impl Drop for PoolKey {
    fn drop(&mut self) {
        self.pool.lock().free(self.key);
    }
}
