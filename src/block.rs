// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! On-disk block layout: a 64-byte header followed by a 4032-byte payload.

use crate::checksum::Checksum;
use crate::error::{CorruptKind, EngineError, Result};
use crate::util::{read_u16le, read_u32le, read_u64le, write_u16le, write_u32le, write_u64le};

/// Total size of a block on disk.
pub const BLOCK_SIZE: usize = 4096;
/// Size of the block header.
pub const BLOCK_HEADER_SIZE: usize = 64;
/// Size of the block payload.
pub const BLOCK_PAYLOAD_SIZE: usize = BLOCK_SIZE - BLOCK_HEADER_SIZE;

/// Block type: a user document.
pub const BLOCK_TYPE_DOCUMENT: u16 = 0x0011;
/// Block type: an unallocated block on the free list.
pub const BLOCK_TYPE_FREE: u16 = 0x0000;
/// Block type: a tombstoned block, deleted but not yet reclaimed.
pub const BLOCK_TYPE_TOMBSTONE: u16 = 0x00ff;

mod offsets {
    pub const BLOCK_TYPE: usize = 0;
    pub const PAYLOAD_LEN: usize = 4;
    pub const BLOCK_ID: usize = 8;
    pub const VERSION: usize = 16;
    pub const CHECKSUM: usize = 20;
}

/// A single 4096-byte on-disk block: header plus payload, kept together
/// as one contiguous buffer so it can be read/written with a single
/// whole-block I/O operation.
#[derive(Clone)]
pub(crate) struct Block {
    buf: [u8; BLOCK_SIZE],
}

impl Block {
    /// Construct a zeroed, free block with a valid checksum stamped in,
    /// so a block that was merely extended (never written through
    /// `allocate`) still reads back cleanly instead of looking corrupt.
    pub(crate) fn zeroed() -> Self {
        let mut block = Self {
            buf: [0; BLOCK_SIZE],
        };
        block.recompute_checksum();
        block
    }

    /// Construct a live block carrying `payload` under `block_type`, with
    /// the given `block_id` and `version`, and a freshly computed
    /// checksum.
    pub(crate) fn new(block_type: u16, block_id: u64, version: u32, payload: &[u8]) -> Result<Self> {
        if payload.len() > BLOCK_PAYLOAD_SIZE {
            return Err(EngineError::InvalidArgument(
                "payload exceeds block payload size",
            ));
        }

        let mut block = Self::zeroed();
        write_u16le(&mut block.buf, offsets::BLOCK_TYPE, block_type);
        write_u32le(
            &mut block.buf,
            offsets::PAYLOAD_LEN,
            u32::try_from(payload.len()).unwrap(),
        );
        write_u64le(&mut block.buf, offsets::BLOCK_ID, block_id);
        write_u32le(&mut block.buf, offsets::VERSION, version);
        block.buf[BLOCK_HEADER_SIZE..BLOCK_HEADER_SIZE + payload.len()].copy_from_slice(payload);
        block.recompute_checksum();
        Ok(block)
    }

    /// Parse a block from a raw 4096-byte buffer, validating its checksum.
    ///
    /// A buffer that is entirely zero is treated as an implicitly-free
    /// block rather than corrupt: storage is grown in raw zeroed pages
    /// ([`crate::storage::BlockStorage::extend`]) ahead of any block
    /// actually being written, so "never touched" is a normal, valid
    /// on-disk state rather than a torn write.
    pub(crate) fn from_bytes(buf: [u8; BLOCK_SIZE], block_id: u64) -> Result<Self> {
        if buf == [0u8; BLOCK_SIZE] {
            return Ok(Self::zeroed());
        }
        let block = Self { buf };
        let stored = read_u32le(&block.buf, offsets::CHECKSUM);
        if block.compute_checksum() != stored {
            return Err(CorruptKind::BlockChecksum { block_id }.into());
        }
        Ok(block)
    }

    /// Construct without validating the checksum (used by recovery code
    /// that needs to inspect a possibly-torn block before deciding what
    /// to do with it).
    pub(crate) fn from_bytes_unchecked(buf: [u8; BLOCK_SIZE]) -> Self {
        Self { buf }
    }

    pub(crate) fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.buf
    }

    pub(crate) fn block_type(&self) -> u16 {
        read_u16le(&self.buf, offsets::BLOCK_TYPE)
    }

    pub(crate) fn set_block_type(&mut self, block_type: u16) {
        write_u16le(&mut self.buf, offsets::BLOCK_TYPE, block_type);
        self.recompute_checksum();
    }

    pub(crate) fn version(&self) -> u32 {
        read_u32le(&self.buf, offsets::VERSION)
    }

    pub(crate) fn bump_version(&mut self) {
        let next = self.version().wrapping_add(1);
        write_u32le(&mut self.buf, offsets::VERSION, next);
        self.recompute_checksum();
    }

    pub(crate) fn payload_len(&self) -> usize {
        read_u32le(&self.buf, offsets::PAYLOAD_LEN) as usize
    }

    pub(crate) fn payload(&self) -> &[u8] {
        let len = self.payload_len().min(BLOCK_PAYLOAD_SIZE);
        &self.buf[BLOCK_HEADER_SIZE..BLOCK_HEADER_SIZE + len]
    }

    /// Read the free-list "next" pointer stored in the first 8 bytes of
    /// a free block's payload. `0` means "end of list".
    pub(crate) fn free_list_next(&self) -> u64 {
        read_u64le(&self.buf, BLOCK_HEADER_SIZE)
    }

    pub(crate) fn set_free_list_next(&mut self, next: u64) {
        write_u64le(&mut self.buf, BLOCK_HEADER_SIZE, next);
        write_u16le(&mut self.buf, offsets::BLOCK_TYPE, BLOCK_TYPE_FREE);
        write_u32le(&mut self.buf, offsets::PAYLOAD_LEN, 0);
        self.recompute_checksum();
    }

    fn compute_checksum(&self) -> u32 {
        let mut c = Checksum::new();
        c.update(&self.buf[..offsets::CHECKSUM]);
        c.update(&self.buf[offsets::CHECKSUM + 4..]);
        c.finalize()
    }

    fn recompute_checksum(&mut self) {
        let sum = self.compute_checksum();
        write_u32le(&mut self.buf, offsets::CHECKSUM, sum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let block = Block::new(BLOCK_TYPE_DOCUMENT, 7, 1, b"hello").unwrap();
        let parsed = Block::from_bytes(*block.as_bytes(), 7).unwrap();
        assert_eq!(parsed.payload(), b"hello");
        assert_eq!(parsed.block_type(), BLOCK_TYPE_DOCUMENT);
        assert_eq!(parsed.version(), 1);
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let block = Block::new(BLOCK_TYPE_DOCUMENT, 1, 0, b"x").unwrap();
        let mut bytes = *block.as_bytes();
        bytes[BLOCK_HEADER_SIZE] ^= 0xff;
        assert!(Block::from_bytes(bytes, 1).is_err());
    }

    #[test]
    fn test_free_list_link() {
        let mut block = Block::zeroed();
        block.set_free_list_next(42);
        assert_eq!(block.free_list_next(), 42);
        assert_eq!(block.block_type(), BLOCK_TYPE_FREE);
        let parsed = Block::from_bytes(*block.as_bytes(), 0).unwrap();
        assert_eq!(parsed.free_list_next(), 42);
    }

    #[test]
    fn test_payload_too_large() {
        let payload = vec![0u8; BLOCK_PAYLOAD_SIZE + 1];
        assert!(Block::new(BLOCK_TYPE_DOCUMENT, 1, 0, &payload).is_err());
    }
}
