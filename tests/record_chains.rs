//! Block-chain geometry and free-list reuse, exercised through the record
//! store over small 128-byte blocks (80 content bytes per block).

use shaledb::storage::FreeStack;
use shaledb::{BlockConfig, BlockStore, MemDevice, RecordStore};

fn small_records() -> RecordStore {
    let blocks = BlockStore::new(
        Box::new(MemDevice::new()),
        BlockConfig::new(128, 48).unwrap(),
    )
    .unwrap();
    RecordStore::new(blocks).unwrap()
}

#[test]
fn thousand_byte_record_spans_thirteen_blocks() {
    let records = small_records();
    let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

    let id = records.create_bytes(&payload).unwrap();

    // ceil(1000 / 80) = 13 chain blocks, plus the free-record block 0.
    assert_eq!(records.blocks().block_count().unwrap(), 14);
    assert_eq!(records.find(id).unwrap(), Some(payload));
}

#[test]
fn deleted_chain_reappears_on_the_free_list() {
    let records = small_records();
    let payload = vec![0x5Au8; 1000];
    let id = records.create_bytes(&payload).unwrap();

    records.delete(id).unwrap();

    let stack = FreeStack::new(records.blocks());
    let mut freed = Vec::new();
    while let Some(block_id) = stack.pop().unwrap() {
        freed.push(block_id);
    }
    // All 13 chain blocks are on the stack, most recently pushed first.
    assert_eq!(freed.len(), 13);
    let mut sorted = freed.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (1..=13).collect::<Vec<u32>>());
    assert!(freed.windows(2).all(|w| w[0] > w[1]));
}

#[test]
fn recreate_after_delete_reuses_blocks_in_lifo_order() {
    let records = small_records();
    let payload = vec![0xA1u8; 1000];
    let id = records.create_bytes(&payload).unwrap();
    let peak = records.blocks().block_count().unwrap();

    records.delete(id).unwrap();
    let replacement = records.create_bytes(&payload).unwrap();

    // No growth: the 13 freed blocks satisfy the whole new chain, and the
    // head is the last-freed block.
    assert_eq!(records.blocks().block_count().unwrap(), peak);
    assert_eq!(replacement, 13);
    assert_eq!(records.find(replacement).unwrap(), Some(payload));
}

#[test]
fn repeated_cycles_reuse_blocks_without_growth() {
    let records = small_records();
    // 4 records of 5 blocks each: 20 freed ids fit the free record's 80
    // content bytes exactly, so cycles must not grow the file at all.
    let payload = vec![7u8; 400];

    let mut live = Vec::new();
    for _ in 0..4 {
        live.push(records.create_bytes(&payload).unwrap());
    }
    let peak = records.blocks().block_count().unwrap();

    for _ in 0..20 {
        for id in live.drain(..) {
            records.delete(id).unwrap();
        }
        for _ in 0..4 {
            live.push(records.create_bytes(&payload).unwrap());
        }
        assert_eq!(records.blocks().block_count().unwrap(), peak);
    }

    for id in &live {
        assert_eq!(records.find(*id).unwrap(), Some(payload.clone()));
    }
}

#[test]
fn shrink_then_grow_update_round_trips_latest_payload() {
    let records = small_records();
    let first = vec![1u8; 400];
    let shorter = vec![2u8; 90];
    let longer = vec![3u8; 700];

    let id = records.create_bytes(&first).unwrap();
    records.update(id, &shorter).unwrap();
    records.update(id, &longer).unwrap();

    assert_eq!(records.find(id).unwrap(), Some(longer));
}

#[test]
fn shrinking_update_releases_blocks_for_other_records() {
    let records = small_records();
    let id = records.create_bytes(&vec![9u8; 640]).unwrap();
    let peak = records.blocks().block_count().unwrap();

    records.update(id, &[9u8; 80]).unwrap();
    let other = records.create_bytes(&vec![4u8; 560]).unwrap();

    assert_eq!(records.blocks().block_count().unwrap(), peak);
    assert_eq!(records.find(other).unwrap(), Some(vec![4u8; 560]));
    assert_eq!(records.find(id).unwrap(), Some(vec![9u8; 80]));
}

#[test]
fn many_disjoint_records_stay_bit_identical() {
    let records = small_records();

    let payloads: Vec<Vec<u8>> = (0..50u8)
        .map(|seed| (0..(seed as usize * 17 % 600)).map(|i| seed ^ (i as u8)).collect())
        .collect();
    let ids: Vec<u32> = payloads
        .iter()
        .map(|p| records.create_bytes(p).unwrap())
        .collect();

    for (id, payload) in ids.iter().zip(&payloads) {
        assert_eq!(records.find(*id).unwrap().as_ref(), Some(payload));
    }
}
