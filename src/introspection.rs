// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Engine-level metadata (component C9: Introspection). Neither function
//! here reads a user document payload.

use crate::block::{BLOCK_HEADER_SIZE, BLOCK_PAYLOAD_SIZE, BLOCK_SIZE, BLOCK_TYPE_DOCUMENT, BLOCK_TYPE_FREE, BLOCK_TYPE_TOMBSTONE};
use crate::document::to_canonical_text;
use crate::journal::BLOCK_TYPE_JOURNAL;
use crate::superblock::FORMAT_VERSION;
use serde_json::json;

pub(crate) fn schema(total_block_count: u64) -> String {
    let value = json!({
        "format_version": FORMAT_VERSION,
        "block_types": {
            "document": BLOCK_TYPE_DOCUMENT,
            "free": BLOCK_TYPE_FREE,
            "tombstone": BLOCK_TYPE_TOMBSTONE,
            "journal": BLOCK_TYPE_JOURNAL,
        },
        "block_size": BLOCK_SIZE,
        "block_header_size": BLOCK_HEADER_SIZE,
        "block_payload_size": BLOCK_PAYLOAD_SIZE,
        "total_block_count": total_block_count,
    });
    to_canonical_text(&value)
}

pub(crate) fn constraints() -> String {
    let value = json!({
        "max_payload_size": BLOCK_PAYLOAD_SIZE,
        "min_block_id": 1,
        "sequence_monotonic_gap_free": true,
        "single_writer": true,
        "schema_enforcement": false,
        "secondary_indices": false,
    });
    to_canonical_text(&value)
}
