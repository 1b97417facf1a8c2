// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Append-only commit log (component C5: Journal).
//!
//! Journal records are stored one-per-block in the same flat block space
//! as document blocks, distinguished by [`BLOCK_TYPE_JOURNAL`] and linked
//! backward from the superblock's `journal_tail` through a `prev` pointer
//! embedded in each block's payload, the same intrusive-list idiom the
//! allocator uses for the free list. A record too large to fit in one
//! block's payload is rejected at buffer time.

use crate::block::{Block, BLOCK_PAYLOAD_SIZE};
use crate::checksum::Checksum;
use crate::error::{CorruptKind, EngineError, Result};
use crate::storage::BlockStorage;
use crate::transaction::Operation;
use crate::util::{read_u32le, read_u64le, write_u32le, write_u64le};

pub(crate) const BLOCK_TYPE_JOURNAL: u16 = 0x0002;

mod offsets {
    pub const PREV: usize = 0;
    pub const SEQUENCE: usize = 8;
    pub const CHECKSUM: usize = 16;
    pub const OP_COUNT: usize = 20;
    pub const OPS: usize = 24;
}

const OP_TAG_INSERT: u8 = 0;
const OP_TAG_UPDATE: u8 = 1;
const OP_TAG_DELETE: u8 = 2;

/// A decoded journal record: one committed transaction's ordered
/// operations, each carrying its final block id.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct JournalRecord {
    pub(crate) sequence: u64,
    pub(crate) ops: Vec<Operation>,
}

fn encode_ops(ops: &[Operation]) -> Vec<u8> {
    let mut buf = Vec::new();
    for op in ops {
        match op {
            Operation::Insert { block_id, payload } => {
                buf.push(OP_TAG_INSERT);
                buf.extend_from_slice(&block_id.to_le_bytes());
                buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
                buf.extend_from_slice(payload);
            }
            Operation::Update { block_id, payload } => {
                buf.push(OP_TAG_UPDATE);
                buf.extend_from_slice(&block_id.to_le_bytes());
                buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
                buf.extend_from_slice(payload);
            }
            Operation::Delete { block_id } => {
                buf.push(OP_TAG_DELETE);
                buf.extend_from_slice(&block_id.to_le_bytes());
            }
        }
    }
    buf
}

fn decode_ops(mut buf: &[u8], op_count: u32) -> Result<Vec<Operation>> {
    let mut ops = Vec::with_capacity(op_count as usize);
    for _ in 0..op_count {
        let tag = *buf.first().ok_or(CorruptKind::JournalMalformed)?;
        buf = &buf[1..];
        if buf.len() < 8 {
            return Err(CorruptKind::JournalMalformed.into());
        }
        let block_id = read_u64le(buf, 0);
        buf = &buf[8..];
        match tag {
            OP_TAG_INSERT | OP_TAG_UPDATE => {
                if buf.len() < 4 {
                    return Err(CorruptKind::JournalMalformed.into());
                }
                let len = read_u32le(buf, 0) as usize;
                buf = &buf[4..];
                let payload = buf.get(..len).ok_or(CorruptKind::JournalMalformed)?.to_vec();
                buf = &buf[len..];
                ops.push(if tag == OP_TAG_INSERT {
                    Operation::Insert { block_id, payload }
                } else {
                    Operation::Update { block_id, payload }
                });
            }
            OP_TAG_DELETE => ops.push(Operation::Delete { block_id }),
            _ => return Err(CorruptKind::JournalMalformed.into()),
        }
    }
    Ok(ops)
}

/// Serialize and append a journal record as a new block, chained after
/// `prev_tail`. The caller is responsible for calling `storage.sync()`
/// afterward (spec.md §4.6 phase 2).
pub(crate) fn append(
    storage: &mut dyn BlockStorage,
    block_id: u64,
    prev_tail: u64,
    sequence: u64,
    ops: &[Operation],
) -> Result<()> {
    let encoded_ops = encode_ops(ops);
    let total_len = offsets::OPS + encoded_ops.len();
    if total_len > BLOCK_PAYLOAD_SIZE {
        return Err(EngineError::InvalidArgument(
            "transaction too large to fit in one journal record",
        ));
    }

    let mut payload = vec![0u8; total_len];
    write_u64le(&mut payload, offsets::PREV, prev_tail);
    write_u64le(&mut payload, offsets::SEQUENCE, sequence);
    write_u32le(&mut payload, offsets::OP_COUNT, ops.len() as u32);
    payload[offsets::OPS..].copy_from_slice(&encoded_ops);

    let checksum = {
        let mut c = Checksum::new();
        c.update(&payload[..offsets::CHECKSUM]);
        c.update(&payload[offsets::CHECKSUM + 4..]);
        c.finalize()
    };
    write_u32le(&mut payload, offsets::CHECKSUM, checksum);

    let block = Block::new(BLOCK_TYPE_JOURNAL, block_id, 0, &payload)?;
    storage.write_block(block_id, &block)
}

fn decode_record(block: &Block) -> Result<(u64, JournalRecord)> {
    let payload = block.payload();
    if payload.len() < offsets::OPS {
        return Err(CorruptKind::JournalMalformed.into());
    }
    let prev = read_u64le(payload, offsets::PREV);
    let sequence = read_u64le(payload, offsets::SEQUENCE);
    let stored_checksum = read_u32le(payload, offsets::CHECKSUM);
    let op_count = read_u32le(payload, offsets::OP_COUNT);

    let mut c = Checksum::new();
    c.update(&payload[..offsets::CHECKSUM]);
    c.update(&payload[offsets::CHECKSUM + 4..]);
    if c.finalize() != stored_checksum {
        return Err(CorruptKind::JournalRecordChecksum { sequence }.into());
    }

    let ops = decode_ops(&payload[offsets::OPS..], op_count)?;
    Ok((prev, JournalRecord { sequence, ops }))
}

/// Walk the journal chain backward from `tail_block_id`, validating each
/// record's checksum, and return the records in ascending sequence
/// order. A checksum failure truncates the walk at that point: the
/// failing record and anything only reachable through it are treated as
/// a torn tail and dropped.
pub(crate) fn replay(storage: &mut dyn BlockStorage, tail_block_id: u64) -> Vec<JournalRecord> {
    let mut records = Vec::new();
    let mut cursor = tail_block_id;
    while cursor != 0 {
        let block = match storage.read_block(cursor) {
            Ok(b) if b.block_type() == BLOCK_TYPE_JOURNAL => b,
            _ => {
                log::warn!("journal chain broken at block {cursor}, truncating torn tail");
                break;
            }
        };
        match decode_record(&block) {
            Ok((prev, record)) => {
                records.push(record);
                cursor = prev;
            }
            Err(err) => {
                log::warn!("journal record at block {cursor} is corrupt: {err}");
                break;
            }
        }
    }
    records.reverse();
    records
}

/// Records with `sequence > since`, oldest first, for `render_journal`.
pub(crate) fn records_since(
    storage: &mut dyn BlockStorage,
    tail_block_id: u64,
    since: u64,
) -> Vec<JournalRecord> {
    replay(storage, tail_block_id)
        .into_iter()
        .filter(|r| r.sequence > since)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_util::MemStorage;

    fn sample_ops() -> Vec<Operation> {
        vec![
            Operation::Insert {
                block_id: 2,
                payload: b"{\"a\":1}".to_vec(),
            },
            Operation::Delete { block_id: 9 },
        ]
    }

    #[test]
    fn test_append_and_replay() {
        let mut storage = MemStorage::default();
        storage.extend(5).unwrap();

        append(&mut storage, 2, 0, 1, &sample_ops()).unwrap();
        append(&mut storage, 3, 2, 2, &sample_ops()).unwrap();

        let records = replay(&mut storage, 3);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sequence, 1);
        assert_eq!(records[1].sequence, 2);
    }

    #[test]
    fn test_records_since_filters() {
        let mut storage = MemStorage::default();
        storage.extend(5).unwrap();
        append(&mut storage, 2, 0, 1, &sample_ops()).unwrap();
        append(&mut storage, 3, 2, 2, &sample_ops()).unwrap();
        append(&mut storage, 4, 3, 3, &sample_ops()).unwrap();

        let records = records_since(&mut storage, 4, 1);
        assert_eq!(
            records.iter().map(|r| r.sequence).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[test]
    fn test_corrupt_tail_is_truncated() {
        let mut storage = MemStorage::default();
        storage.extend(5).unwrap();
        append(&mut storage, 2, 0, 1, &sample_ops()).unwrap();
        append(&mut storage, 3, 2, 2, &sample_ops()).unwrap();

        // Simulate a torn write: corrupt the tail's payload bytes directly
        // without recomputing its checksum.
        let tail = storage.read_block_unchecked(3).unwrap();
        let mut bytes = *tail.as_bytes();
        bytes[100] ^= 0xff;
        let torn = Block::from_bytes_unchecked(bytes);
        storage.write_block(3, &torn).unwrap();

        let records = replay(&mut storage, 3);
        assert!(records.is_empty());
    }
}
