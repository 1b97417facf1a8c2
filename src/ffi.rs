// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Stable C-compatible boundary (component C1: Blob/Handle ABI).
//!
//! `Database` and `Transaction` (see [`crate::database`]) are the opaque
//! handle types; callers only ever see raw pointers to them. A
//! `Database*` is a borrowed/owned `Arc<Database>` (borrowed by every
//! call except `fdb_db_close`, which consumes it); a `Transaction*` is
//! an owned `Box<Transaction>` the caller is responsible for outliving
//! its database. There is no `fdb_txn_free` in this boundary (matching
//! the upstream header, which declares none), so transaction handles are
//! intentionally not reclaimed here; see `DESIGN.md`.
//!
//! Planned-but-unimplemented operations named in the upstream header
//! (explicit `create`, collections, queries, CBOR codec, checksum
//! verify/repair) are omitted from this boundary entirely rather than
//! stubbed, per the migration note in spec.md §9.

use crate::database::{Database, RenderOpts, Transaction};
use crate::error::{EngineError, Status};
use crate::transaction::TxnMode;
use crate::verifier::{FfiVerifierFn, Verifier, VerifierRegistry};
use std::mem::ManuallyDrop;
use std::os::raw::c_void;
use std::path::Path;
use std::sync::Arc;

/// An owned byte buffer crossing the boundary. Empty iff `ptr` is null
/// and `len` is zero.
#[repr(C)]
pub struct LgBlob {
    pub ptr: *const u8,
    pub len: usize,
}

impl LgBlob {
    const fn empty() -> Self {
        Self {
            ptr: std::ptr::null(),
            len: 0,
        }
    }
}

/// Combined data/provenance/status/error result.
#[repr(C)]
pub struct LgResult {
    pub data: LgBlob,
    pub provenance: LgBlob,
    pub status: i32,
    pub error_blob: LgBlob,
}

/// Render options recognized by the text-rendering operations.
pub type LgRenderOpts = RenderOpts;

fn blob_from_bytes(bytes: Vec<u8>) -> LgBlob {
    if bytes.is_empty() {
        return LgBlob::empty();
    }
    let boxed = bytes.into_boxed_slice();
    let len = boxed.len();
    let ptr = Box::into_raw(boxed) as *const u8;
    LgBlob { ptr, len }
}

fn blob_from_string(s: String) -> LgBlob {
    blob_from_bytes(s.into_bytes())
}

/// # Safety
/// `ptr`/`len` must describe a valid, live `[u8]` for the call's
/// duration, or `ptr` may be null with `len == 0`.
unsafe fn slice_from_raw<'a>(ptr: *const u8, len: usize) -> &'a [u8] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(ptr, len)
    }
}

/// # Safety
/// `ptr` must have been produced by [`Arc::into_raw`] on an
/// `Arc<Database>` that is still alive.
unsafe fn borrow_db(ptr: *const Database) -> ManuallyDrop<Arc<Database>> {
    ManuallyDrop::new(Arc::from_raw(ptr))
}

/// # Safety
/// `out_err` must be null or point to a valid, writable `LgBlob`.
unsafe fn write_err(out_err: *mut LgBlob, err: &EngineError) -> i32 {
    if !out_err.is_null() {
        *out_err = blob_from_string(err.to_string());
    }
    err.status() as i32
}

/// Encode the crate version as `major*10000 + minor*100 + patch`.
#[no_mangle]
pub extern "C" fn fdb_version() -> u32 {
    let major: u32 = env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0);
    let minor: u32 = env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0);
    let patch: u32 = env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0);
    major * 10000 + minor * 100 + patch
}

/// # Safety
/// `path_ptr`/`path_len` must describe a valid UTF-8 path; `opts_ptr`,
/// if non-null, must describe a valid `[u8]` holding a JSON document
/// (see [`crate::database`] for the recognized shape); `out_db` and
/// `out_err` must be valid, writable out-parameters.
#[no_mangle]
pub unsafe extern "C" fn fdb_db_open(
    path_ptr: *const u8,
    path_len: usize,
    opts_ptr: *const u8,
    opts_len: usize,
    out_db: *mut *mut Database,
    out_err: *mut LgBlob,
) -> i32 {
    let path_bytes = slice_from_raw(path_ptr, path_len);
    let path_str = match std::str::from_utf8(path_bytes) {
        Ok(s) => s,
        Err(_) => {
            return write_err(out_err, &EngineError::InvalidArgument("path is not valid UTF-8"));
        }
    };
    let opts = if opts_ptr.is_null() || opts_len == 0 {
        None
    } else {
        Some(slice_from_raw(opts_ptr, opts_len))
    };
    match Database::open(Path::new(path_str), opts) {
        Ok(db) => {
            if !out_db.is_null() {
                *out_db = Arc::into_raw(db) as *mut Database;
            }
            Status::Ok as i32
        }
        Err(err) => write_err(out_err, &err),
    }
}

/// # Safety
/// `db` must be a handle returned by [`fdb_db_open`] and not already
/// closed.
#[no_mangle]
pub unsafe extern "C" fn fdb_db_close(db: *mut Database) -> i32 {
    if db.is_null() {
        return Status::InvalidArgument as i32;
    }
    let arc = Arc::from_raw(db as *const Database);
    match arc.close() {
        Ok(()) => {
            drop(arc);
            Status::Ok as i32
        }
        Err(err) => {
            // Keep the handle alive: the caller should abort the
            // outstanding transaction(s) and retry.
            let _ = Arc::into_raw(arc);
            err.status() as i32
        }
    }
}

/// # Safety
/// `db` must be a valid, live handle; `out_txn`/`out_err` must be valid,
/// writable out-parameters.
#[no_mangle]
pub unsafe extern "C" fn fdb_txn_begin(
    db: *const Database,
    mode: TxnMode,
    out_txn: *mut *mut Transaction,
    out_err: *mut LgBlob,
) -> i32 {
    if db.is_null() {
        return write_err(out_err, &EngineError::InvalidArgument("null database handle"));
    }
    let db = borrow_db(db);
    match db.begin_txn(mode) {
        Ok(txn) => {
            if !out_txn.is_null() {
                *out_txn = Box::into_raw(Box::new(txn));
            }
            Status::Ok as i32
        }
        Err(err) => write_err(out_err, &err),
    }
}

/// # Safety
/// `txn` must be a valid, live handle from [`fdb_txn_begin`].
#[no_mangle]
pub unsafe extern "C" fn fdb_txn_commit(txn: *mut Transaction, out_err: *mut LgBlob) -> i32 {
    if txn.is_null() {
        return write_err(out_err, &EngineError::InvalidArgument("null transaction handle"));
    }
    match (*txn).commit() {
        Ok(()) => Status::Ok as i32,
        Err(err) => write_err(out_err, &err),
    }
}

/// # Safety
/// `txn` must be a valid, live handle from [`fdb_txn_begin`].
#[no_mangle]
pub unsafe extern "C" fn fdb_txn_abort(txn: *mut Transaction) -> i32 {
    if txn.is_null() {
        return Status::InvalidArgument as i32;
    }
    match (*txn).abort() {
        Ok(()) => Status::Ok as i32,
        Err(err) => err.status() as i32,
    }
}

/// # Safety
/// `txn` must be a valid, live handle; `op_ptr`/`op_len` must describe a
/// valid `[u8]`.
#[no_mangle]
pub unsafe extern "C" fn fdb_apply(txn: *mut Transaction, op_ptr: *const u8, op_len: usize) -> LgResult {
    if txn.is_null() {
        return LgResult {
            data: LgBlob::empty(),
            provenance: LgBlob::empty(),
            status: Status::InvalidArgument as i32,
            error_blob: blob_from_string("null transaction handle".to_string()),
        };
    }
    let payload = slice_from_raw(op_ptr, op_len).to_vec();
    match (*txn).apply(payload) {
        Ok(block_id) => LgResult {
            data: blob_from_string(block_id.to_string()),
            provenance: LgBlob::empty(),
            status: Status::Ok as i32,
            error_blob: LgBlob::empty(),
        },
        Err(err) => LgResult {
            data: LgBlob::empty(),
            provenance: LgBlob::empty(),
            status: err.status() as i32,
            error_blob: blob_from_string(err.to_string()),
        },
    }
}

/// # Safety
/// `txn` must be a valid, live handle; `data_ptr`/`data_len` must
/// describe a valid `[u8]`.
#[no_mangle]
pub unsafe extern "C" fn fdb_update_block(
    txn: *mut Transaction,
    block_id: u64,
    data_ptr: *const u8,
    data_len: usize,
    out_err: *mut LgBlob,
) -> i32 {
    if txn.is_null() {
        return write_err(out_err, &EngineError::InvalidArgument("null transaction handle"));
    }
    let payload = slice_from_raw(data_ptr, data_len).to_vec();
    match (*txn).update_block(block_id, payload) {
        Ok(()) => Status::Ok as i32,
        Err(err) => write_err(out_err, &err),
    }
}

/// # Safety
/// `txn` must be a valid, live handle.
#[no_mangle]
pub unsafe extern "C" fn fdb_delete_block(txn: *mut Transaction, block_id: u64, out_err: *mut LgBlob) -> i32 {
    if txn.is_null() {
        return write_err(out_err, &EngineError::InvalidArgument("null transaction handle"));
    }
    match (*txn).delete_block(block_id) {
        Ok(()) => Status::Ok as i32,
        Err(err) => write_err(out_err, &err),
    }
}

/// # Safety
/// `db` must be a valid, live handle; `out_data`/`out_err` must be
/// valid, writable out-parameters.
#[no_mangle]
pub unsafe extern "C" fn fdb_read_blocks(
    db: *const Database,
    block_type: u16,
    out_data: *mut LgBlob,
    out_err: *mut LgBlob,
) -> i32 {
    if db.is_null() {
        return write_err(out_err, &EngineError::InvalidArgument("null database handle"));
    }
    let db = borrow_db(db);
    match db.read_blocks(block_type) {
        Ok(text) => {
            if !out_data.is_null() {
                *out_data = blob_from_string(text);
            }
            Status::Ok as i32
        }
        Err(err) => write_err(out_err, &err),
    }
}

/// # Safety
/// `db` must be a valid, live handle; `out_text`/`out_err` must be
/// valid, writable out-parameters.
#[no_mangle]
pub unsafe extern "C" fn fdb_render_block(
    db: *const Database,
    block_id: u64,
    opts: LgRenderOpts,
    out_text: *mut LgBlob,
    out_err: *mut LgBlob,
) -> i32 {
    if db.is_null() {
        return write_err(out_err, &EngineError::InvalidArgument("null database handle"));
    }
    let db = borrow_db(db);
    match db.render_block(block_id, opts) {
        Ok(text) => {
            if !out_text.is_null() {
                *out_text = blob_from_string(text);
            }
            Status::Ok as i32
        }
        Err(err) => write_err(out_err, &err),
    }
}

/// # Safety
/// `db` must be a valid, live handle; `out_text`/`out_err` must be
/// valid, writable out-parameters.
#[no_mangle]
pub unsafe extern "C" fn fdb_render_journal(
    db: *const Database,
    since: u64,
    _opts: LgRenderOpts,
    out_text: *mut LgBlob,
    out_err: *mut LgBlob,
) -> i32 {
    if db.is_null() {
        return write_err(out_err, &EngineError::InvalidArgument("null database handle"));
    }
    let db = borrow_db(db);
    match db.render_journal(since) {
        Ok(text) => {
            if !out_text.is_null() {
                *out_text = blob_from_string(text);
            }
            Status::Ok as i32
        }
        Err(err) => write_err(out_err, &err),
    }
}

/// # Safety
/// `db` must be a valid, live handle; `out_schema`/`out_err` must be
/// valid, writable out-parameters.
#[no_mangle]
pub unsafe extern "C" fn fdb_introspect_schema(
    db: *const Database,
    out_schema: *mut LgBlob,
    out_err: *mut LgBlob,
) -> i32 {
    if db.is_null() {
        return write_err(out_err, &EngineError::InvalidArgument("null database handle"));
    }
    let db = borrow_db(db);
    match db.introspect_schema() {
        Ok(text) => {
            if !out_schema.is_null() {
                *out_schema = blob_from_string(text);
            }
            Status::Ok as i32
        }
        Err(err) => write_err(out_err, &err),
    }
}

/// # Safety
/// `db` must be a valid, live handle; `out_constraints`/`out_err` must be
/// valid, writable out-parameters.
#[no_mangle]
pub unsafe extern "C" fn fdb_introspect_constraints(
    db: *const Database,
    out_constraints: *mut LgBlob,
    out_err: *mut LgBlob,
) -> i32 {
    if db.is_null() {
        return write_err(out_err, &EngineError::InvalidArgument("null database handle"));
    }
    let db = borrow_db(db);
    match db.introspect_constraints() {
        Ok(text) => {
            if !out_constraints.is_null() {
                *out_constraints = blob_from_string(text);
            }
            Status::Ok as i32
        }
        Err(err) => write_err(out_err, &err),
    }
}

/// # Safety
/// `type_ptr`/`type_len` must describe a valid `[u8]`; `context` is
/// passed back to `callback` unexamined.
#[no_mangle]
pub unsafe extern "C" fn fdb_proof_register_verifier(
    type_ptr: *const u8,
    type_len: usize,
    callback: FfiVerifierFn,
    context: *mut c_void,
) -> i32 {
    let name = match std::str::from_utf8(slice_from_raw(type_ptr, type_len)) {
        Ok(s) => s,
        Err(_) => return Status::InvalidArgument as i32,
    };
    match VerifierRegistry::register(name, Verifier::ffi(callback, context)) {
        Ok(()) => Status::Ok as i32,
        Err(err) => err.status() as i32,
    }
}

/// # Safety
/// `type_ptr`/`type_len` must describe a valid `[u8]`.
#[no_mangle]
pub unsafe extern "C" fn fdb_proof_unregister_verifier(type_ptr: *const u8, type_len: usize) -> i32 {
    let name = match std::str::from_utf8(slice_from_raw(type_ptr, type_len)) {
        Ok(s) => s,
        Err(_) => return Status::InvalidArgument as i32,
    };
    match VerifierRegistry::unregister(name) {
        Ok(()) => Status::Ok as i32,
        Err(err) => err.status() as i32,
    }
}

/// # Safety
/// `proof_ptr`/`proof_len` must describe a valid `[u8]`; `out_valid` and
/// `out_err` must be valid, writable out-parameters.
#[no_mangle]
pub unsafe extern "C" fn fdb_proof_verify(
    proof_ptr: *const u8,
    proof_len: usize,
    out_valid: *mut bool,
    out_err: *mut LgBlob,
) -> i32 {
    let proof = slice_from_raw(proof_ptr, proof_len);
    match VerifierRegistry::verify(proof) {
        Ok(valid) => {
            if !out_valid.is_null() {
                *out_valid = valid;
            }
            Status::Ok as i32
        }
        Err(err) => write_err(out_err, &err),
    }
}

#[no_mangle]
pub extern "C" fn fdb_proof_init_builtins() -> i32 {
    match VerifierRegistry::init_builtins() {
        Ok(()) => Status::Ok as i32,
        Err(err) => err.status() as i32,
    }
}

/// # Safety
/// `blob` must be null or point to a valid, writable `LgBlob` previously
/// produced by this crate (or zero-initialized).
#[no_mangle]
pub unsafe extern "C" fn fdb_blob_free(blob: *mut LgBlob) {
    if blob.is_null() {
        return;
    }
    let b = &mut *blob;
    if !b.ptr.is_null() && b.len > 0 {
        let slice_ptr = std::slice::from_raw_parts_mut(b.ptr as *mut u8, b.len);
        drop(Box::from_raw(slice_ptr));
    }
    b.ptr = std::ptr::null();
    b.len = 0;
}
