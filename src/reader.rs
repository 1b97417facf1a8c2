// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Type-filtered scan and single-block render (component C8: Reader).

use crate::document;
use crate::error::{EngineError, Result};
use crate::storage::BlockStorage;

/// Scan every allocated block id, filter by `block_type`, and render the
/// matches as a canonical-text array of `{block_id, size, data}`
/// records. A block that fails its checksum is skipped from the scan and
/// reported as an error entry instead of aborting the whole read.
pub(crate) fn read_blocks(
    storage: &mut dyn BlockStorage,
    total_block_count: u64,
    block_type: u16,
) -> String {
    let mut records = Vec::new();
    for block_id in 1..total_block_count {
        match storage.read_block(block_id) {
            Ok(block) if block.block_type() == block_type => {
                records.push(document::render_scan_record(block_id, &block));
            }
            Ok(_) => {}
            Err(err @ EngineError::Corrupt(_)) => {
                records.push(document::render_error_record(block_id, &err));
            }
            Err(_) => {}
        }
    }
    document::to_canonical_text(&serde_json::Value::Array(records))
}

/// Render a single block as canonical text, optionally including header
/// metadata.
pub(crate) fn render_block(
    storage: &mut dyn BlockStorage,
    block_id: u64,
    include_metadata: bool,
) -> Result<String> {
    let block = storage.read_block(block_id)?;
    Ok(document::to_canonical_text(&document::render_block(
        block_id,
        &block,
        include_metadata,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, BLOCK_TYPE_DOCUMENT};
    use crate::storage::test_util::MemStorage;

    #[test]
    fn test_read_blocks_filters_by_type() {
        let mut storage = MemStorage::default();
        storage.extend(4).unwrap();
        let doc = Block::new(BLOCK_TYPE_DOCUMENT, 2, 0, b"{\"a\":1}").unwrap();
        storage.write_block(2, &doc).unwrap();

        let text = read_blocks(&mut storage, 4, BLOCK_TYPE_DOCUMENT);
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 1);
        assert_eq!(value[0]["block_id"], 2);
    }

    #[test]
    fn test_corrupt_block_reported_not_fatal() {
        let mut storage = MemStorage::default();
        storage.extend(4).unwrap();
        let doc = Block::new(BLOCK_TYPE_DOCUMENT, 2, 0, b"{}").unwrap();
        let mut bytes = *doc.as_bytes();
        bytes[100] ^= 0xff;
        storage
            .write_block(2, &Block::from_bytes_unchecked(bytes))
            .unwrap();

        let text = read_blocks(&mut storage, 4, BLOCK_TYPE_DOCUMENT);
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 1);
        assert!(value[0]["error"].is_string());
    }

    #[test]
    fn test_render_block() {
        let mut storage = MemStorage::default();
        storage.extend(4).unwrap();
        let doc = Block::new(BLOCK_TYPE_DOCUMENT, 3, 5, b"{\"v\":1}").unwrap();
        storage.write_block(3, &doc).unwrap();

        let text = render_block(&mut storage, 3, true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["metadata"]["version"], 5);
    }
}
