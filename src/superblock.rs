// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Root metadata record (component C3: Superblock).
//!
//! Stored redundantly at block 0 (primary) and block 1 (shadow). Writing
//! is an atomic two-step (write shadow, sync, write primary, sync) so a
//! torn write can never leave both copies corrupt.

use crate::block::{Block, BLOCK_SIZE};
use crate::error::{CorruptKind, Result};
use crate::storage::BlockStorage;
use crate::util::{read_u32le, read_u64le, write_u32le, write_u64le};

/// Block id of the primary superblock.
pub(crate) const PRIMARY_BLOCK_ID: u64 = 0;
/// Block id of the shadow superblock.
pub(crate) const SHADOW_BLOCK_ID: u64 = 1;
/// First block id available for journal/data use.
pub(crate) const FIRST_DATA_BLOCK_ID: u64 = 2;

/// Block type used for both superblock copies.
const BLOCK_TYPE_SUPERBLOCK: u16 = 0x0001;

const MAGIC: [u8; 8] = *b"LITHOGRF";
pub(crate) const FORMAT_VERSION: u32 = 1;
/// Default number of blocks the allocator grows the file by when the
/// free list is empty.
pub(crate) const DEFAULT_GROWTH_STEP: u32 = 64;

mod offsets {
    pub const MAGIC: usize = 0;
    pub const FORMAT_VERSION: usize = 8;
    pub const BLOCK_SIZE: usize = 12;
    pub const TOTAL_BLOCK_COUNT: usize = 16;
    pub const FREE_LIST_HEAD: usize = 24;
    pub const LAST_SEQUENCE: usize = 32;
    pub const JOURNAL_TAIL: usize = 40;
    pub const GROWTH_STEP: usize = 48;
}

/// In-memory view of the superblock.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Superblock {
    pub(crate) total_block_count: u64,
    pub(crate) free_list_head: u64,
    pub(crate) last_sequence: u64,
    /// Block id of the most recently committed journal record, or `0` if
    /// the journal is empty. Only advanced by a durable superblock write
    /// (spec.md §4.6 phase 5), so a journal block written but not yet
    /// referenced here is simply unreachable torn tail.
    pub(crate) journal_tail: u64,
    pub(crate) growth_step: u32,
}

impl Superblock {
    /// Build the superblock for a freshly created database.
    pub(crate) fn new(growth_step: u32) -> Self {
        Self {
            total_block_count: FIRST_DATA_BLOCK_ID,
            free_list_head: 0,
            last_sequence: 0,
            journal_tail: 0,
            growth_step,
        }
    }

    fn to_block(self) -> Block {
        let mut payload = [0u8; 64];
        payload[offsets::MAGIC..offsets::MAGIC + 8].copy_from_slice(&MAGIC);
        write_u32le(&mut payload, offsets::FORMAT_VERSION, FORMAT_VERSION);
        write_u32le(&mut payload, offsets::BLOCK_SIZE, BLOCK_SIZE as u32);
        write_u64le(&mut payload, offsets::TOTAL_BLOCK_COUNT, self.total_block_count);
        write_u64le(&mut payload, offsets::FREE_LIST_HEAD, self.free_list_head);
        write_u64le(&mut payload, offsets::LAST_SEQUENCE, self.last_sequence);
        write_u64le(&mut payload, offsets::JOURNAL_TAIL, self.journal_tail);
        write_u32le(&mut payload, offsets::GROWTH_STEP, self.growth_step);
        // OK to unwrap: payload is far smaller than the block payload limit.
        Block::new(BLOCK_TYPE_SUPERBLOCK, 0, 0, &payload).unwrap()
    }

    fn from_block(block: &Block) -> Result<Self> {
        let payload = block.payload();
        if payload.len() < 52 || payload[offsets::MAGIC..offsets::MAGIC + 8] != MAGIC {
            return Err(CorruptKind::SuperblockChecksum.into());
        }
        let format_version = read_u32le(payload, offsets::FORMAT_VERSION);
        let block_size = read_u32le(payload, offsets::BLOCK_SIZE);
        if format_version != FORMAT_VERSION || block_size as usize != BLOCK_SIZE {
            return Err(CorruptKind::SuperblockChecksum.into());
        }
        Ok(Self {
            total_block_count: read_u64le(payload, offsets::TOTAL_BLOCK_COUNT),
            free_list_head: read_u64le(payload, offsets::FREE_LIST_HEAD),
            last_sequence: read_u64le(payload, offsets::LAST_SEQUENCE),
            journal_tail: read_u64le(payload, offsets::JOURNAL_TAIL),
            growth_step: read_u32le(payload, offsets::GROWTH_STEP),
        })
    }

    /// Load the superblock, trying the primary copy first and falling
    /// back to the shadow on checksum failure.
    pub(crate) fn load(storage: &mut dyn BlockStorage) -> Result<Self> {
        if let Ok(block) = storage.read_block(PRIMARY_BLOCK_ID) {
            if let Ok(sb) = Self::from_block(&block) {
                return Ok(sb);
            }
        }
        log::warn!("primary superblock invalid, falling back to shadow copy");
        let shadow = storage.read_block(SHADOW_BLOCK_ID)?;
        Self::from_block(&shadow)
    }

    /// Write both copies using the atomic two-step shadow protocol: write
    /// shadow, sync, write primary, sync. This is the linearization point
    /// for a commit (spec.md §4.6 phase 5).
    pub(crate) fn store(self, storage: &mut dyn BlockStorage) -> Result<()> {
        let block = self.to_block();
        storage.write_block(SHADOW_BLOCK_ID, &block)?;
        storage.sync()?;
        storage.write_block(PRIMARY_BLOCK_ID, &block)?;
        storage.sync()?;
        Ok(())
    }
}
