// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Whole-block file I/O (component C2: Block File).

use crate::block::{Block, BLOCK_SIZE};
use crate::error::{CorruptKind, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

/// Interface used by the Engine to read and write whole blocks of the
/// underlying storage. Implemented for [`File`] for real databases and
/// for an in-memory buffer in tests, mirroring the pluggable-reader
/// pattern used elsewhere for swapping real and in-memory backing
/// stores.
pub(crate) trait BlockStorage: Send {
    /// Number of whole blocks currently present in the storage.
    fn block_count(&self) -> u64;

    /// Read the block at `block_id`, validating its checksum.
    fn read_block(&mut self, block_id: u64) -> Result<Block>;

    /// Read the block at `block_id` without validating its checksum.
    /// Used during recovery to inspect a possibly torn write.
    fn read_block_unchecked(&mut self, block_id: u64) -> Result<Block>;

    /// Write `block` at `block_id`. Not durable until [`sync`] is called.
    ///
    /// [`sync`]: BlockStorage::sync
    fn write_block(&mut self, block_id: u64, block: &Block) -> Result<()>;

    /// Flush all buffered writes to durable storage.
    fn sync(&mut self) -> Result<()>;

    /// Grow the storage by `n` zeroed blocks, returning the id of the
    /// first newly-created block.
    fn extend(&mut self, n: u64) -> Result<u64>;
}

fn byte_offset(block_id: u64) -> u64 {
    block_id * BLOCK_SIZE as u64
}

/// A real on-disk database file.
pub(crate) struct FileStorage {
    file: File,
    block_count: u64,
}

impl FileStorage {
    pub(crate) fn open(file: File) -> Result<Self> {
        let len = file.metadata()?.len();
        let block_count = len / BLOCK_SIZE as u64;
        Ok(Self { file, block_count })
    }

    fn read_raw(&mut self, block_id: u64) -> Result<[u8; BLOCK_SIZE]> {
        if block_id >= self.block_count {
            return Err(CorruptKind::ShortRead { block_id }.into());
        }
        self.file.seek(SeekFrom::Start(byte_offset(block_id)))?;
        let mut buf = [0u8; BLOCK_SIZE];
        self.file
            .read_exact(&mut buf)
            .map_err(|_| CorruptKind::ShortRead { block_id })?;
        Ok(buf)
    }
}

impl BlockStorage for FileStorage {
    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn read_block(&mut self, block_id: u64) -> Result<Block> {
        let buf = self.read_raw(block_id)?;
        Block::from_bytes(buf, block_id)
    }

    fn read_block_unchecked(&mut self, block_id: u64) -> Result<Block> {
        let buf = self.read_raw(block_id)?;
        Ok(Block::from_bytes_unchecked(buf))
    }

    fn write_block(&mut self, block_id: u64, block: &Block) -> Result<()> {
        self.file.seek(SeekFrom::Start(byte_offset(block_id)))?;
        self.file.write_all(block.as_bytes())?;
        if block_id >= self.block_count {
            self.block_count = block_id + 1;
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn extend(&mut self, n: u64) -> Result<u64> {
        let first_new = self.block_count;
        let new_count = first_new + n;
        self.file.set_len(new_count * BLOCK_SIZE as u64)?;
        self.block_count = new_count;
        Ok(first_new)
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    /// An in-memory [`BlockStorage`] used by unit tests so they don't
    /// need to touch the filesystem.
    #[derive(Default)]
    pub(crate) struct MemStorage {
        blocks: Vec<[u8; BLOCK_SIZE]>,
    }

    impl BlockStorage for MemStorage {
        fn block_count(&self) -> u64 {
            self.blocks.len() as u64
        }

        fn read_block(&mut self, block_id: u64) -> Result<Block> {
            let buf = *self
                .blocks
                .get(block_id as usize)
                .ok_or(CorruptKind::ShortRead { block_id })?;
            Block::from_bytes(buf, block_id)
        }

        fn read_block_unchecked(&mut self, block_id: u64) -> Result<Block> {
            let buf = *self
                .blocks
                .get(block_id as usize)
                .ok_or(CorruptKind::ShortRead { block_id })?;
            Ok(Block::from_bytes_unchecked(buf))
        }

        fn write_block(&mut self, block_id: u64, block: &Block) -> Result<()> {
            let idx = block_id as usize;
            if idx >= self.blocks.len() {
                self.blocks.resize(idx + 1, [0; BLOCK_SIZE]);
            }
            self.blocks[idx] = *block.as_bytes();
            Ok(())
        }

        fn sync(&mut self) -> Result<()> {
            Ok(())
        }

        fn extend(&mut self, n: u64) -> Result<u64> {
            let first_new = self.blocks.len() as u64;
            for _ in 0..n {
                self.blocks.push([0; BLOCK_SIZE]);
            }
            Ok(first_new)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::MemStorage;
    use super::*;
    use crate::block::BLOCK_TYPE_DOCUMENT;

    #[test]
    fn test_mem_storage_roundtrip() {
        let mut storage = MemStorage::default();
        storage.extend(4).unwrap();
        let block = Block::new(BLOCK_TYPE_DOCUMENT, 2, 0, b"payload").unwrap();
        storage.write_block(2, &block).unwrap();
        let read = storage.read_block(2).unwrap();
        assert_eq!(read.payload(), b"payload");
    }

    #[test]
    fn test_short_read_is_corrupt() {
        let mut storage = MemStorage::default();
        assert!(storage.read_block(0).is_err());
    }
}
