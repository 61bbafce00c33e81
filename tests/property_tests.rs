//! Property-based tests over arbitrary operation sequences.
//!
//! Uses proptest to generate interleavings of allocate / free / compact /
//! coalesce and verifies the pool's structural invariants after every
//! step against a plain `HashMap` model.

use std::collections::HashMap;

use proptest::prelude::*;
use strpool::{AllocId, PoolError, StringPool};

#[derive(Debug, Clone)]
enum Op {
    Alloc(Vec<u8>),
    /// Free the n-th oldest live allocation (modulo the live count).
    Free(usize),
    /// Free an id a second time.
    DoubleFree(usize),
    Compact(usize),
    Coalesce,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => prop::collection::vec(any::<u8>(), 0..64).prop_map(Op::Alloc),
        3 => (0usize..128).prop_map(Op::Free),
        1 => (0usize..128).prop_map(Op::DoubleFree),
        1 => (0usize..64).prop_map(Op::Compact),
        1 => Just(Op::Coalesce),
    ]
}

/// Everything the pool must keep true after any prefix of operations.
fn check_invariants(pool: &StringPool, model: &HashMap<AllocId, Vec<u8>>) {
    // Active count mirrors the model.
    assert_eq!(pool.active_allocations(), model.len());

    // Counters match a fresh audit of the index; no structural damage.
    let (validity, stats) = pool.audit();
    assert!(validity.is_valid(), "{:?}", validity);
    assert_eq!(stats.bytes, pool.free_bytes());
    assert_eq!(stats.blocks, pool.free_blocks());

    // Every live id reads back exactly what was stored.
    for (id, expected) in model {
        assert_eq!(pool.read(*id).unwrap(), &expected[..]);
        assert_eq!(pool.length_units(*id).unwrap(), expected.len());
    }
}

proptest! {
    #[test]
    fn invariants_hold_across_operation_sequences(ops in prop::collection::vec(op_strategy(), 0..64)) {
        let mut pool = StringPool::new(64, true).unwrap();
        let mut model: HashMap<AllocId, Vec<u8>> = HashMap::new();
        let mut order: Vec<AllocId> = Vec::new();
        let mut freed: Vec<AllocId> = Vec::new();
        let mut max_id = 0u64;

        for op in ops {
            match op {
                Op::Alloc(payload) => {
                    let id = pool.allocate_units(&payload).unwrap();
                    if payload.is_empty() {
                        prop_assert_eq!(id, AllocId::EMPTY);
                    } else {
                        prop_assert!(id.as_u64() > max_id, "ids must be strictly increasing");
                        max_id = id.as_u64();
                        model.insert(id, payload);
                        order.push(id);
                    }
                }
                Op::Free(n) => {
                    if !order.is_empty() {
                        let id = order.remove(n % order.len());
                        pool.free(id);
                        model.remove(&id);
                        freed.push(id);
                        prop_assert_eq!(pool.read(id).unwrap_err(), PoolError::StaleId(id));
                    }
                }
                Op::DoubleFree(n) => {
                    if !freed.is_empty() {
                        let id = freed[n % freed.len()];
                        pool.free(id);
                    }
                }
                Op::Compact(extra) => {
                    let before = pool.active_allocations();
                    pool.compact_and_grow(extra).unwrap();
                    prop_assert_eq!(pool.active_allocations(), before);
                    prop_assert_eq!(pool.fragmentation_pct(), 0);
                }
                Op::Coalesce => {
                    pool.coalesce().unwrap();
                    let (_, stats) = pool.audit();
                    prop_assert_eq!(stats.adjacent_pairs, 0);
                }
            }
            check_invariants(&pool, &model);
        }
    }

    #[test]
    fn allocate_then_read_roundtrips(payload in prop::collection::vec(any::<u8>(), 1..256)) {
        let mut pool = StringPool::new(32, true).unwrap();
        let id = pool.allocate_units(&payload).unwrap();
        prop_assert_eq!(pool.read(id).unwrap(), &payload[..]);
    }

    #[test]
    fn freed_ids_never_resolve_again(strings in prop::collection::vec("[a-z]{1,24}", 1..24)) {
        let mut pool = StringPool::new(64, true).unwrap();
        let ids: Vec<AllocId> = strings.iter().map(|s| pool.allocate(s).unwrap()).collect();

        for (id, s) in ids.iter().zip(&strings) {
            prop_assert_eq!(pool.read(*id).unwrap(), s.as_bytes());
            pool.free(*id);
            prop_assert!(pool.read(*id).is_err());
        }
        prop_assert_eq!(pool.active_allocations(), 0);
    }

    #[test]
    fn compact_keeps_every_survivor(strings in prop::collection::vec("[ -~]{1,32}", 1..32), extra in 0usize..512) {
        let mut pool = StringPool::new(128, true).unwrap();
        let ids: Vec<AllocId> = strings.iter().map(|s| pool.allocate(s).unwrap()).collect();

        // Free every other allocation so there is something to reclaim.
        for id in ids.iter().step_by(2) {
            pool.free(*id);
        }
        let before_capacity = pool.capacity_bytes();
        pool.compact_and_grow(extra).unwrap();

        prop_assert_eq!(pool.capacity_bytes(), before_capacity + extra);
        prop_assert_eq!(pool.fragmentation_pct(), 0);
        for (i, (id, s)) in ids.iter().zip(&strings).enumerate() {
            if i % 2 == 0 {
                prop_assert!(pool.read(*id).is_err());
            } else {
                prop_assert_eq!(pool.read(*id).unwrap(), s.as_bytes());
            }
        }
    }
}
