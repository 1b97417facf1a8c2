// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The six-phase durability protocol (component C7: Commit Coordinator).
//!
//! Binds the Journal (C5), Block File (C2), and Superblock (C3). Must
//! either reach phase 6 or leave the database observationally unchanged:
//! every write before the superblock's sync in phase 5 is invisible to a
//! reopened database, since nothing durable references it yet.

use crate::allocator::Allocator;
use crate::block::{Block, BLOCK_TYPE_DOCUMENT, BLOCK_TYPE_TOMBSTONE};
use crate::error::Result;
use crate::journal;
use crate::storage::BlockStorage;
use crate::superblock::Superblock;
use crate::transaction::{Operation, TransactionBuffer};

/// Run the six-phase commit protocol for `txn` against `storage`,
/// updating `superblock` and `committed_allocator` in place. Returns the
/// commit's new sequence number.
pub(crate) fn commit(
    storage: &mut dyn BlockStorage,
    superblock: &mut Superblock,
    committed_allocator: &mut Allocator,
    txn: &mut TransactionBuffer,
) -> Result<u64> {
    let ops = txn.ops().to_vec();

    // Phase 1: serialize the journal record in memory.
    let sequence = superblock.last_sequence + 1;

    // Phase 2: journal write + sync. A fault here (or not reaching it)
    // leaves superblock.last_sequence unchanged, so a subsequent open
    // truncates this record as torn tail. Allocating the journal block
    // id may stage further in-memory growth; publish everything the
    // allocator has staged so far — for this transaction's earlier
    // `apply`/`update_block`/`delete_block` calls and for this id —
    // before writing anything. This is the first point at which this
    // commit is allowed to touch real storage beyond what it reads.
    let journal_block_id = txn.allocator.allocate(storage)?;
    txn.allocator.publish_growth(storage)?;
    journal::append(storage, journal_block_id, superblock.journal_tail, sequence, &ops)?;
    storage.sync()?;

    // Phase 3: block writes for inserts and updates.
    for op in &ops {
        match op {
            Operation::Insert { block_id, payload } => {
                let block = Block::new(BLOCK_TYPE_DOCUMENT, *block_id, 1, payload)?;
                storage.write_block(*block_id, &block)?;
            }
            Operation::Update { block_id, payload } => {
                let existing = storage.read_block(*block_id)?;
                let next_version = existing.version().wrapping_add(1);
                let block = Block::new(BLOCK_TYPE_DOCUMENT, *block_id, next_version, payload)?;
                storage.write_block(*block_id, &block)?;
            }
            Operation::Delete { .. } => {}
        }
    }

    // Phase 4: delete application. Tombstone on disk so a crash after
    // this point but before phase 5 can still be re-derived from the
    // journal rather than relying on free-list state alone.
    for op in &ops {
        if let Operation::Delete { block_id } = op {
            let mut block = storage.read_block_unchecked(*block_id)?;
            block.set_block_type(BLOCK_TYPE_TOMBSTONE);
            block.bump_version();
            storage.write_block(*block_id, &block)?;
        }
    }

    // Also fold the deletes into the working allocator's free list before
    // the linearizing write, so phase 5's superblock already reflects the
    // post-commit free list (no separate publication write is needed).
    for op in &ops {
        if let Operation::Delete { block_id } = op {
            txn.allocator.free(*block_id);
        }
    }
    txn.allocator.publish_frees(storage)?;

    // Phase 5: superblock write + sync via the atomic two-step shadow
    // protocol. This is the linearization point: the commit is visible
    // iff this step is durable.
    superblock.last_sequence = sequence;
    superblock.journal_tail = journal_block_id;
    superblock.total_block_count = txn.allocator.total_block_count;
    superblock.free_list_head = txn.allocator.free_list_head;
    superblock.store(storage)?;

    // Phase 6: free-list publication already folded into phase 4/5 above;
    // adopt the transaction's working allocator as the new committed
    // state and mark the transaction committed.
    *committed_allocator = txn.allocator.clone();
    txn.mark_committed();

    Ok(sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_util::MemStorage;
    use crate::superblock::DEFAULT_GROWTH_STEP;
    use crate::transaction::TxnMode;

    #[test]
    fn test_commit_insert_then_render() {
        let mut storage = MemStorage::default();
        storage.extend(2).unwrap();
        let mut superblock = Superblock::new(DEFAULT_GROWTH_STEP);
        let mut allocator = Allocator::new(0, superblock.total_block_count, DEFAULT_GROWTH_STEP);

        let mut txn = TransactionBuffer::begin(TxnMode::ReadWrite, &allocator);
        let id = txn
            .stage_insert(|a| a.allocate(&mut storage), b"{\"name\":\"Bob\"}".to_vec())
            .unwrap();

        let sequence = commit(&mut storage, &mut superblock, &mut allocator, &mut txn).unwrap();
        assert_eq!(sequence, 1);

        let block = storage.read_block(id).unwrap();
        assert_eq!(block.payload(), b"{\"name\":\"Bob\"}");
        assert_eq!(superblock.last_sequence, 1);
    }

    #[test]
    fn test_commit_delete_frees_block() {
        let mut storage = MemStorage::default();
        storage.extend(2).unwrap();
        let mut superblock = Superblock::new(DEFAULT_GROWTH_STEP);
        let mut allocator = Allocator::new(0, superblock.total_block_count, DEFAULT_GROWTH_STEP);

        let mut txn = TransactionBuffer::begin(TxnMode::ReadWrite, &allocator);
        let id = txn
            .stage_insert(|a| a.allocate(&mut storage), b"{}".to_vec())
            .unwrap();
        commit(&mut storage, &mut superblock, &mut allocator, &mut txn).unwrap();

        let mut txn2 = TransactionBuffer::begin(TxnMode::ReadWrite, &allocator);
        txn2.stage_delete(|a, id| a.free(id), id).unwrap();
        commit(&mut storage, &mut superblock, &mut allocator, &mut txn2).unwrap();

        assert_eq!(allocator.free_list_head, id);
        assert_eq!(superblock.free_list_head, id);
    }

    /// Replays phases 1-4 by hand, stopping short of the phase-5
    /// superblock sync, to simulate a crash in that window — then
    /// reopens (reloads the superblock from storage, as `Database::open`
    /// would) and confirms the in-flight transaction is invisible:
    /// nothing durable references its journal record or its block.
    #[test]
    fn test_crash_before_superblock_sync_is_invisible() {
        let mut storage = MemStorage::default();
        storage.extend(2).unwrap();
        let superblock = Superblock::new(DEFAULT_GROWTH_STEP);
        superblock.store(&mut storage).unwrap();
        let allocator = Allocator::new(0, superblock.total_block_count, DEFAULT_GROWTH_STEP);

        let mut txn = TransactionBuffer::begin(TxnMode::ReadWrite, &allocator);
        txn.stage_insert(|a| a.allocate(&mut storage), b"{\"orphan\":true}".to_vec())
            .unwrap();
        let ops = txn.ops().to_vec();

        // Phases 1-2: journal record written and synced.
        let sequence = superblock.last_sequence + 1;
        let journal_block_id = txn.allocator.allocate(&mut storage).unwrap();
        txn.allocator.publish_growth(&mut storage).unwrap();
        journal::append(&mut storage, journal_block_id, superblock.journal_tail, sequence, &ops).unwrap();
        storage.sync().unwrap();

        // Phase 3: the document block itself written too.
        for op in &ops {
            if let Operation::Insert { block_id, payload } = op {
                let block = Block::new(BLOCK_TYPE_DOCUMENT, *block_id, 1, payload).unwrap();
                storage.write_block(*block_id, &block).unwrap();
            }
        }
        // Crash here: phase 5 (superblock write) never runs.

        let reloaded = Superblock::load(&mut storage).unwrap();
        assert_eq!(reloaded.last_sequence, 0);
        assert_eq!(reloaded.total_block_count, superblock.total_block_count);
        assert_eq!(reloaded.free_list_head, superblock.free_list_head);

        let scan = crate::reader::read_blocks(&mut storage, reloaded.total_block_count, BLOCK_TYPE_DOCUMENT);
        assert!(!scan.contains("orphan"), "uncommitted block must not be reachable after reopen");

        let records = journal::replay(&mut storage, reloaded.journal_tail);
        assert!(records.is_empty(), "uncommitted journal record must not be reachable after reopen");
    }
}
