// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Canonical text rendering shared by the Reader (C8) and Introspection
//! (C9) components.
//!
//! `serde_json::Value`'s default `Map` is backed by a `BTreeMap` (the
//! `preserve_order` feature is not enabled), so serializing a `Value`
//! always emits object keys in the same sorted order regardless of
//! insertion order — exactly the determinism "canonical text" requires,
//! with no extra bookkeeping.

use crate::block::Block;
use crate::journal::JournalRecord;
use crate::transaction::Operation;
use serde_json::{json, Value};

/// Decode a stored payload as a document value. Documents are written as
/// UTF-8 JSON text; a payload that doesn't parse as JSON (e.g. legacy or
/// foreign data) is rendered as a raw string instead of failing the scan.
pub(crate) fn decode_payload(payload: &[u8]) -> Value {
    if let Ok(value) = serde_json::from_slice::<Value>(payload) {
        return value;
    }
    Value::String(String::from_utf8_lossy(payload).into_owned())
}

/// Render one block as a `{block_id, size, data}` record for
/// `read_blocks`.
pub(crate) fn render_scan_record(block_id: u64, block: &Block) -> Value {
    json!({
        "block_id": block_id,
        "size": block.payload_len(),
        "data": decode_payload(block.payload()),
    })
}

/// Render a placeholder entry for a block that failed to read, so a
/// corrupt block is skipped without aborting the whole scan.
pub(crate) fn render_error_record(block_id: u64, error: &crate::error::EngineError) -> Value {
    json!({
        "block_id": block_id,
        "error": error.to_string(),
    })
}

/// Render a single block for `render_block`, optionally including header
/// metadata.
pub(crate) fn render_block(block_id: u64, block: &Block, include_metadata: bool) -> Value {
    let mut value = json!({
        "block_id": block_id,
        "data": decode_payload(block.payload()),
    });
    if include_metadata {
        value["metadata"] = json!({
            "block_type": block.block_type(),
            "version": block.version(),
            "size": block.payload_len(),
        });
    }
    value
}

/// Render one journal record for `render_journal`.
pub(crate) fn render_journal_record(record: &JournalRecord) -> Value {
    let ops: Vec<Value> = record
        .ops
        .iter()
        .map(|op| match op {
            Operation::Insert { block_id, payload } => json!({
                "op": "insert",
                "block_id": block_id,
                "data": decode_payload(payload),
            }),
            Operation::Update { block_id, payload } => json!({
                "op": "update",
                "block_id": block_id,
                "data": decode_payload(payload),
            }),
            Operation::Delete { block_id } => json!({
                "op": "delete",
                "block_id": block_id,
            }),
        })
        .collect();
    json!({
        "sequence": record.sequence,
        "ops": ops,
    })
}

/// Serialize to the canonical compact text form used across the text
/// operations in the boundary.
pub(crate) fn to_canonical_text(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}
