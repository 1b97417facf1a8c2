// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Block id assignment and free-list management (component C4: Allocator).
//!
//! The free list is an intrusive singly-linked list: its head lives in
//! the superblock, and each free block's "next" pointer lives in the
//! first 8 bytes of its own payload. [`Allocator`] is cloned into a
//! working copy at the start of every read-write transaction
//! ([`crate::transaction::TransactionBuffer`]); only a successful commit
//! copies the working state back and persists it via the superblock, so
//! an aborted transaction leaves the persisted free list untouched.
//!
//! Growing the file when the free list runs dry is likewise staged
//! in-memory: [`allocate`](Allocator::allocate) never calls
//! [`BlockStorage::extend`]/[`BlockStorage::write_block`] itself. It
//! only hands out ids and records the free-list links they'd need on
//! disk in `pending_growth`. [`publish_growth`](Allocator::publish_growth)
//! performs the real I/O, and is only ever called from a transaction
//! that is actually committing (`commit.rs`), so apply-then-abort costs
//! nothing: no block beyond the committed `total_block_count` is ever
//! written.

use crate::block::Block;
use crate::error::Result;
use crate::storage::BlockStorage;
use std::collections::HashMap;

/// Allocator state: the committed (or, inside a transaction, tentative)
/// view of the free list and block count.
#[derive(Clone, Debug)]
pub(crate) struct Allocator {
    pub(crate) free_list_head: u64,
    pub(crate) total_block_count: u64,
    pub(crate) growth_step: u32,
    /// Blocks freed since the last [`publish_frees`](Self::publish_frees)
    /// call, each paired with the free-list link it should point to.
    pending_frees: Vec<(u64, u64)>,
    /// Free-list links for blocks counted into `total_block_count` by a
    /// provisional growth but not yet materialized on disk, keyed by
    /// block id. Entries are removed as their ids are handed out by
    /// `allocate`; whatever remains at commit time is the still-free
    /// tail of the growth batch that `publish_growth` must write out.
    pending_growth: HashMap<u64, u64>,
}

impl Allocator {
    pub(crate) fn new(free_list_head: u64, total_block_count: u64, growth_step: u32) -> Self {
        Self {
            free_list_head,
            total_block_count,
            growth_step,
            pending_frees: Vec::new(),
            pending_growth: HashMap::new(),
        }
    }

    /// Assign a block id: pop the free-list head if non-empty, otherwise
    /// grow the in-memory view by `growth_step` blocks and use the first
    /// of them. Popping a block already durable on disk reads it (to
    /// learn its `next` pointer); popping a provisionally grown block
    /// reads the in-memory link instead. Either way, no write happens
    /// here — only [`publish_growth`](Self::publish_growth) writes.
    pub(crate) fn allocate(&mut self, storage: &mut dyn BlockStorage) -> Result<u64> {
        if self.free_list_head != 0 {
            let head = self.free_list_head;
            let next = if let Some(next) = self.pending_growth.remove(&head) {
                next
            } else {
                storage.read_block(head)?.free_list_next()
            };
            self.free_list_head = next;
            return Ok(head);
        }

        let first_new = self.total_block_count;
        self.total_block_count = first_new + u64::from(self.growth_step);

        // Link the newly grown blocks (after the one we're about to
        // hand out) onto the free list, in memory only.
        let mut next = 0u64;
        for id in (first_new + 1..self.total_block_count).rev() {
            self.pending_growth.insert(id, next);
            next = id;
        }
        self.free_list_head = next;

        Ok(first_new)
    }

    /// Return `block_id` to the head of the free list. Does not write to
    /// disk; on-disk linkage is established lazily (spec.md §4.6 phase 6).
    pub(crate) fn free(&mut self, block_id: u64) {
        self.pending_frees.push((block_id, self.free_list_head));
        self.free_list_head = block_id;
    }

    /// Write the on-disk `next` pointers for any blocks queued by
    /// [`free`](Self::free) since the allocator was created. Called once
    /// per commit (phase 6: free-list publication).
    pub(crate) fn publish_frees(&mut self, storage: &mut dyn BlockStorage) -> Result<()> {
        for (block_id, next) in self.pending_frees.drain(..) {
            let mut block = Block::zeroed();
            block.set_free_list_next(next);
            storage.write_block(block_id, &block)?;
        }
        Ok(())
    }

    /// Materialize any provisional growth recorded by [`allocate`](Self::allocate)
    /// since the allocator was created: extend the file up to
    /// `total_block_count` and write real free-list links for whatever
    /// part of the grown batch is still unused. Called once per commit,
    /// before the blocks it grew are written to (phase 3) or the
    /// superblock is updated to reference them (phase 5).
    pub(crate) fn publish_growth(&mut self, storage: &mut dyn BlockStorage) -> Result<()> {
        if self.total_block_count > storage.block_count() {
            storage.extend(self.total_block_count - storage.block_count())?;
        }
        for (block_id, next) in self.pending_growth.drain() {
            let mut block = Block::zeroed();
            block.set_free_list_next(next);
            storage.write_block(block_id, &block)?;
        }
        Ok(())
    }
}
