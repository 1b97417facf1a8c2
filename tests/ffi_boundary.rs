// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! End-to-end exercises of the C-compatible boundary, one per scenario
//! named in spec.md §8.

use lithograph::ffi::{
    fdb_blob_free, fdb_db_close, fdb_db_open, fdb_proof_init_builtins, fdb_proof_register_verifier,
    fdb_proof_unregister_verifier, fdb_proof_verify, fdb_read_blocks, fdb_render_journal, fdb_txn_abort,
    fdb_txn_begin, fdb_txn_commit, fdb_apply, LgBlob,
};
use lithograph::{Database, RenderOpts, Status, Transaction, TxnMode};
use std::os::raw::c_void;
use std::ptr;

fn open_db(name: &str) -> (tempfile::TempDir, *mut Database) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    let path_str = path.to_str().unwrap();
    let mut db_ptr: *mut Database = ptr::null_mut();
    let mut err = LgBlob { ptr: ptr::null(), len: 0 };
    let status = unsafe {
        fdb_db_open(path_str.as_ptr(), path_str.len(), ptr::null(), 0, &mut db_ptr, &mut err)
    };
    assert_eq!(status, Status::Ok as i32);
    (dir, db_ptr)
}

unsafe fn text_of(blob: &LgBlob) -> String {
    if blob.ptr.is_null() || blob.len == 0 {
        return String::new();
    }
    std::str::from_utf8(std::slice::from_raw_parts(blob.ptr, blob.len))
        .unwrap()
        .to_string()
}

#[test]
fn scenario_a_version() {
    assert_eq!(lithograph::ffi::fdb_version(), 100);
}

#[test]
fn scenario_b_round_trip_insert() {
    let (_dir, db) = open_db("rt.lgh");
    unsafe {
        let mut txn_ptr: *mut Transaction = ptr::null_mut();
        let mut err = LgBlob { ptr: ptr::null(), len: 0 };
        assert_eq!(
            fdb_txn_begin(db, TxnMode::ReadWrite, &mut txn_ptr, &mut err),
            Status::Ok as i32
        );

        let payload = br#"{"name":"Bob","age":30}"#;
        let result = fdb_apply(txn_ptr, payload.as_ptr(), payload.len());
        assert_eq!(result.status, Status::Ok as i32);
        let block_id: u64 = text_of(&result.data).parse().unwrap();
        assert!(block_id > 0);

        assert_eq!(fdb_txn_commit(txn_ptr, &mut err), Status::Ok as i32);

        let mut scan = LgBlob { ptr: ptr::null(), len: 0 };
        assert_eq!(fdb_read_blocks(db, 0x0011, &mut scan, &mut err), Status::Ok as i32);
        let scan_text = text_of(&scan);
        assert!(scan_text.contains("\"name\":\"Bob\""));
        assert!(scan_text.contains(&format!("\"block_id\":{block_id}")));

        fdb_blob_free(&mut scan);
        drop(Box::from_raw(txn_ptr));
        assert_eq!(fdb_db_close(db), Status::Ok as i32);
    }
}

#[test]
fn scenario_c_abort_discards() {
    let (_dir, db) = open_db("abort.lgh");
    unsafe {
        let mut txn_ptr: *mut Transaction = ptr::null_mut();
        let mut err = LgBlob { ptr: ptr::null(), len: 0 };
        assert_eq!(
            fdb_txn_begin(db, TxnMode::ReadWrite, &mut txn_ptr, &mut err),
            Status::Ok as i32
        );

        let payload = br#"{"tmp":true}"#;
        let result = fdb_apply(txn_ptr, payload.as_ptr(), payload.len());
        assert_eq!(result.status, Status::Ok as i32);

        assert_eq!(fdb_txn_abort(txn_ptr), Status::Ok as i32);

        let mut journal = LgBlob { ptr: ptr::null(), len: 0 };
        let opts = RenderOpts { format: 0, include_metadata: false };
        assert_eq!(fdb_render_journal(db, 0, opts, &mut journal, &mut err), Status::Ok as i32);
        assert!(!text_of(&journal).contains("tmp"));

        fdb_blob_free(&mut journal);
        drop(Box::from_raw(txn_ptr));
        assert_eq!(fdb_db_close(db), Status::Ok as i32);
    }
}

#[test]
fn scenario_d_read_only_rejects_writes() {
    let (_dir, db) = open_db("ro.lgh");
    unsafe {
        let mut txn_ptr: *mut Transaction = ptr::null_mut();
        let mut err = LgBlob { ptr: ptr::null(), len: 0 };
        assert_eq!(
            fdb_txn_begin(db, TxnMode::ReadOnly, &mut txn_ptr, &mut err),
            Status::Ok as i32
        );

        let result = fdb_apply(txn_ptr, b"{}".as_ptr(), 2);
        assert_ne!(result.status, Status::Ok as i32);

        assert_eq!(fdb_txn_abort(txn_ptr), Status::Ok as i32);
        drop(Box::from_raw(txn_ptr));
        assert_eq!(fdb_db_close(db), Status::Ok as i32);
    }
}

#[test]
fn scenario_e_update_bumps_version() {
    let (_dir, db) = open_db("update.lgh");
    unsafe {
        let mut txn_ptr: *mut Transaction = ptr::null_mut();
        let mut err = LgBlob { ptr: ptr::null(), len: 0 };
        assert_eq!(
            fdb_txn_begin(db, TxnMode::ReadWrite, &mut txn_ptr, &mut err),
            Status::Ok as i32
        );
        let result = fdb_apply(txn_ptr, br#"{"v":1}"#.as_ptr(), 7);
        let block_id: u64 = text_of(&result.data).parse().unwrap();
        assert_eq!(fdb_txn_commit(txn_ptr, &mut err), Status::Ok as i32);
        drop(Box::from_raw(txn_ptr));

        let mut txn2_ptr: *mut Transaction = ptr::null_mut();
        assert_eq!(
            fdb_txn_begin(db, TxnMode::ReadWrite, &mut txn2_ptr, &mut err),
            Status::Ok as i32
        );
        let update = br#"{"v":2}"#;
        assert_eq!(
            lithograph::ffi::fdb_update_block(txn2_ptr, block_id, update.as_ptr(), update.len(), &mut err),
            Status::Ok as i32
        );
        assert_eq!(fdb_txn_commit(txn2_ptr, &mut err), Status::Ok as i32);
        drop(Box::from_raw(txn2_ptr));

        let mut text = LgBlob { ptr: ptr::null(), len: 0 };
        let opts = RenderOpts { format: 0, include_metadata: true };
        assert_eq!(
            lithograph::ffi::fdb_render_block(db, block_id, opts, &mut text, &mut err),
            Status::Ok as i32
        );
        let rendered = text_of(&text);
        assert!(rendered.contains("\"v\":2"));
        assert!(rendered.contains("\"version\":2"));

        fdb_blob_free(&mut text);
        assert_eq!(fdb_db_close(db), Status::Ok as i32);
    }
}

#[test]
fn scenario_sequence_numbers_are_monotonic_and_gap_free() {
    let (_dir, db) = open_db("seq.lgh");
    unsafe {
        let mut err = LgBlob { ptr: ptr::null(), len: 0 };
        for i in 0..4u32 {
            let mut txn_ptr: *mut Transaction = ptr::null_mut();
            assert_eq!(
                fdb_txn_begin(db, TxnMode::ReadWrite, &mut txn_ptr, &mut err),
                Status::Ok as i32
            );
            let payload = format!("{{\"i\":{i}}}").into_bytes();
            let result = fdb_apply(txn_ptr, payload.as_ptr(), payload.len());
            assert_eq!(result.status, Status::Ok as i32);
            assert_eq!(fdb_txn_commit(txn_ptr, &mut err), Status::Ok as i32);
            drop(Box::from_raw(txn_ptr));
        }

        let mut journal = LgBlob { ptr: ptr::null(), len: 0 };
        let opts = RenderOpts { format: 0, include_metadata: false };
        assert_eq!(fdb_render_journal(db, 0, opts, &mut journal, &mut err), Status::Ok as i32);
        let parsed: serde_json::Value = serde_json::from_str(&text_of(&journal)).unwrap();
        let sequences: Vec<u64> = parsed
            .as_array()
            .unwrap()
            .iter()
            .map(|record| record["sequence"].as_u64().unwrap())
            .collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);

        fdb_blob_free(&mut journal);
        assert_eq!(fdb_db_close(db), Status::Ok as i32);
    }
}

#[test]
fn scenario_blob_free_is_idempotent() {
    let (_dir, db) = open_db("blobfree.lgh");
    unsafe {
        let mut txn_ptr: *mut Transaction = ptr::null_mut();
        let mut err = LgBlob { ptr: ptr::null(), len: 0 };
        assert_eq!(
            fdb_txn_begin(db, TxnMode::ReadWrite, &mut txn_ptr, &mut err),
            Status::Ok as i32
        );
        let payload = br#"{"x":1}"#;
        let mut result = fdb_apply(txn_ptr, payload.as_ptr(), payload.len());
        assert_eq!(result.status, Status::Ok as i32);
        assert!(!result.data.ptr.is_null());

        fdb_blob_free(&mut result.data);
        assert!(result.data.ptr.is_null());
        assert_eq!(result.data.len, 0);
        // A second free on an already-freed blob must not double-free.
        fdb_blob_free(&mut result.data);

        // Freeing a never-allocated (zero) blob, and a null blob pointer
        // itself, are both no-ops.
        let mut zero = LgBlob { ptr: ptr::null(), len: 0 };
        fdb_blob_free(&mut zero);
        fdb_blob_free(ptr::null_mut());

        assert_eq!(fdb_txn_abort(txn_ptr), Status::Ok as i32);
        drop(Box::from_raw(txn_ptr));
        assert_eq!(fdb_db_close(db), Status::Ok as i32);
    }
}

extern "C" fn accept_any(_ptr: *const u8, _len: usize, _context: *mut c_void) -> i32 {
    0
}

#[test]
fn scenario_f_verifier_lifecycle() {
    assert_eq!(fdb_proof_init_builtins(), Status::Ok as i32);

    let name = "test-scenario-f";
    unsafe {
        assert_eq!(
            fdb_proof_register_verifier(name.as_ptr(), name.len(), accept_any, ptr::null_mut()),
            Status::Ok as i32
        );
        assert_eq!(fdb_proof_unregister_verifier(name.as_ptr(), name.len()), Status::Ok as i32);
        assert_eq!(
            fdb_proof_unregister_verifier(name.as_ptr(), name.len()),
            Status::NotFound as i32
        );

        let proof = serde_json::json!({"type": "fd-holds", "data": "dGVzdA=="}).to_string();
        let mut valid = false;
        let mut err = LgBlob { ptr: ptr::null(), len: 0 };
        let status = fdb_proof_verify(proof.as_ptr(), proof.len(), &mut valid, &mut err);
        assert_eq!(status, Status::Ok as i32);
        assert!(valid);
    }
}
