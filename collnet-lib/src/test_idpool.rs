use std::sync::Arc;

use parking_lot::Mutex;

use crate::idpool::{IdPool, PoolKey};

#[test]
fn ids_are_unique_until_exhaustion() {
    let mut pool = IdPool::new(100);
    let mut seen = std::collections::HashSet::new();
    for _ in 0..100 {
        let id = pool.allocate().unwrap();
        assert!(id < 100);
        assert!(seen.insert(id), "id {} handed out twice", id);
    }
    assert_eq!(pool.allocate(), None);
}

#[test]
fn freed_ids_are_reusable() {
    let mut pool = IdPool::new(4);
    let ids: Vec<_> = (0..4).map(|_| pool.allocate().unwrap()).collect();
    assert_eq!(pool.allocate(), None);
    pool.free(ids[2]);
    assert_eq!(pool.allocate(), Some(ids[2]));
}

#[test]
fn allocation_is_lowest_free() {
    let mut pool = IdPool::new(70);
    for expect in 0..70u64 {
        assert_eq!(pool.allocate(), Some(expect));
    }
    pool.free(65);
    pool.free(3);
    assert_eq!(pool.allocate(), Some(3));
    assert_eq!(pool.allocate(), Some(65));
}

#[test]
#[should_panic(expected = "freed twice")]
fn double_free_panics() {
    let mut pool = IdPool::new(8);
    let id = pool.allocate().unwrap();
    pool.free(id);
    pool.free(id);
}

#[test]
fn pool_key_returns_on_drop() {
    let pool = Arc::new(Mutex::new(IdPool::new(1)));
    let key = PoolKey::allocate(&pool).unwrap();
    assert_eq!(key.key(), 0);
    assert!(PoolKey::allocate(&pool).is_none());
    drop(key);
    let key = PoolKey::allocate(&pool).unwrap();
    assert_eq!(key.key(), 0);
}
