// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Ties the Superblock (C3), Allocator (C4), Block File (C2), Journal
//! (C5), Commit Coordinator (C7), Reader (C8), and Introspection (C9)
//! components together behind the `Database`/`Transaction` handles the
//! boundary exposes.
//!
//! Write transactions are serialized not by holding an OS mutex for a
//! transaction's whole lifetime (a write transaction spans several
//! separate boundary calls) but by tracking "at most one active write
//! transaction" as state guarded by [`Database`]'s inner mutex, which is
//! acquired only for the duration of each individual call.

use crate::allocator::Allocator;
use crate::commit;
use crate::document;
use crate::error::{EngineError, Result};
use crate::introspection;
use crate::journal;
use crate::reader;
use crate::storage::{BlockStorage, FileStorage};
use crate::superblock::{Superblock, DEFAULT_GROWTH_STEP};
use crate::transaction::{TransactionBuffer, TxnMode};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Render options recognized by `render_block` and `render_journal`.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct RenderOpts {
    /// `0` is the only currently supported format (text-JSON).
    pub format: i32,
    pub include_metadata: bool,
}

struct Inner {
    storage: Box<dyn BlockStorage>,
    superblock: Superblock,
    committed_allocator: Allocator,
    active_write_txn: Option<TransactionBuffer>,
    live_txn_count: u64,
    poisoned: bool,
}

/// An open database file (spec.md §3's Database entity).
pub struct Database {
    inner: Mutex<Inner>,
}

/// Parse `opts` as `{"journal_growth_step": u32}`, the only recognized
/// key. Absent, null, or empty `opts` keep the built-in default; this
/// only matters for a freshly created database, since an existing one's
/// growth step is already persisted in its superblock.
fn parse_growth_step(opts: Option<&[u8]>) -> Result<u32> {
    let bytes = match opts {
        Some(bytes) if !bytes.is_empty() => bytes,
        _ => return Ok(DEFAULT_GROWTH_STEP),
    };
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|_| EngineError::InvalidArgument("opts is not valid JSON"))?;
    if value.is_null() {
        return Ok(DEFAULT_GROWTH_STEP);
    }
    match value.get("journal_growth_step") {
        None => Ok(DEFAULT_GROWTH_STEP),
        Some(n) => n
            .as_u64()
            .filter(|n| *n > 0 && *n <= u64::from(u32::MAX))
            .map(|n| n as u32)
            .ok_or(EngineError::InvalidArgument(
                "journal_growth_step must be a positive u32",
            )),
    }
}

impl Database {
    /// Open `path`, creating it if absent. `opts`, when present on a
    /// freshly created database, is parsed per [`parse_growth_step`].
    /// Replays the journal chain for integrity validation before handing
    /// back a ready-to-use handle.
    pub fn open(path: &Path, opts: Option<&[u8]>) -> Result<Arc<Self>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let created = file.metadata()?.len() == 0;
        let mut storage = FileStorage::open(file)?;

        let superblock = if created {
            let sb = Superblock::new(parse_growth_step(opts)?);
            storage.extend(2)?;
            sb.store(&mut storage)?;
            sb
        } else {
            let sb = Superblock::load(&mut storage)?;
            let records = journal::replay(&mut storage, sb.journal_tail);
            log::info!("replayed {} durable journal record(s) on open", records.len());
            sb
        };

        let committed_allocator = Allocator::new(
            superblock.free_list_head,
            superblock.total_block_count,
            superblock.growth_step,
        );

        Ok(Arc::new(Self {
            inner: Mutex::new(Inner {
                storage: Box::new(storage),
                superblock,
                committed_allocator,
                active_write_txn: None,
                live_txn_count: 0,
                poisoned: false,
            }),
        }))
    }

    /// Close the database. Fails with `InvalidArgument` if any
    /// transaction is still live.
    pub fn close(&self) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        if inner.live_txn_count > 0 {
            return Err(EngineError::InvalidArgument(
                "cannot close database with live transactions",
            ));
        }
        Ok(())
    }

    fn check_not_poisoned(inner: &Inner) -> Result<()> {
        if inner.poisoned {
            return Err(EngineError::Io(
                "database handle poisoned by a prior unrecoverable commit failure".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn begin_txn(self: &Arc<Self>, mode: TxnMode) -> Result<Transaction> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_not_poisoned(&inner)?;
        if mode == TxnMode::ReadWrite {
            if inner.active_write_txn.is_some() {
                return Err(EngineError::Conflict);
            }
            inner.active_write_txn = Some(TransactionBuffer::begin(mode, &inner.committed_allocator));
        }
        inner.live_txn_count += 1;
        Ok(Transaction {
            database: Arc::clone(self),
            mode,
            state: Mutex::new(TxnState::Active),
        })
    }

    pub(crate) fn read_blocks(&self, block_type: u16) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_not_poisoned(&inner)?;
        let total = inner.superblock.total_block_count;
        Ok(reader::read_blocks(inner.storage.as_mut(), total, block_type))
    }

    pub(crate) fn render_block(&self, block_id: u64, opts: RenderOpts) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_not_poisoned(&inner)?;
        reader::render_block(inner.storage.as_mut(), block_id, opts.include_metadata)
    }

    pub(crate) fn render_journal(&self, since: u64) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_not_poisoned(&inner)?;
        let tail = inner.superblock.journal_tail;
        let records = journal::records_since(inner.storage.as_mut(), tail, since);
        let rendered: Vec<_> = records.iter().map(document::render_journal_record).collect();
        Ok(document::to_canonical_text(&serde_json::Value::Array(rendered)))
    }

    pub(crate) fn introspect_schema(&self) -> Result<String> {
        let inner = self.inner.lock().unwrap();
        Self::check_not_poisoned(&inner)?;
        Ok(introspection::schema(inner.superblock.total_block_count))
    }

    pub(crate) fn introspect_constraints(&self) -> Result<String> {
        let inner = self.inner.lock().unwrap();
        Self::check_not_poisoned(&inner)?;
        Ok(introspection::constraints())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TxnState {
    Active,
    Committed,
    Aborted,
}

/// An in-flight operation against a [`Database`] (spec.md §3's
/// Transaction entity).
pub struct Transaction {
    database: Arc<Database>,
    mode: TxnMode,
    state: Mutex<TxnState>,
}

impl Transaction {
    fn check_active(&self) -> Result<()> {
        match *self.state.lock().unwrap() {
            TxnState::Active => Ok(()),
            TxnState::Committed => Err(EngineError::TxnAlreadyCommitted),
            TxnState::Aborted => Err(EngineError::TxnNotActive),
        }
    }

    /// Stage an insert, returning its tentative block id.
    pub fn apply(&self, payload: Vec<u8>) -> Result<u64> {
        self.check_active()?;
        if self.mode != TxnMode::ReadWrite {
            return Err(EngineError::InvalidArgument(
                "apply requires a read-write transaction",
            ));
        }
        let mut inner = self.database.inner.lock().unwrap();
        Database::check_not_poisoned(&inner)?;
        let Inner {
            storage,
            active_write_txn,
            ..
        } = &mut *inner;
        let txn = active_write_txn
            .as_mut()
            .expect("read-write transaction must have a staged buffer");
        txn.stage_insert(|a| a.allocate(storage.as_mut()), payload)
    }

    pub fn update_block(&self, block_id: u64, payload: Vec<u8>) -> Result<()> {
        self.check_active()?;
        if self.mode != TxnMode::ReadWrite {
            return Err(EngineError::InvalidArgument(
                "update_block requires a read-write transaction",
            ));
        }
        let mut inner = self.database.inner.lock().unwrap();
        Database::check_not_poisoned(&inner)?;
        inner
            .active_write_txn
            .as_mut()
            .expect("read-write transaction must have a staged buffer")
            .stage_update(block_id, payload)
    }

    pub fn delete_block(&self, block_id: u64) -> Result<()> {
        self.check_active()?;
        if self.mode != TxnMode::ReadWrite {
            return Err(EngineError::InvalidArgument(
                "delete_block requires a read-write transaction",
            ));
        }
        let mut inner = self.database.inner.lock().unwrap();
        Database::check_not_poisoned(&inner)?;
        inner
            .active_write_txn
            .as_mut()
            .expect("read-write transaction must have a staged buffer")
            .stage_delete(|a, id| a.free(id), block_id)
    }

    pub fn commit(&self) -> Result<()> {
        self.check_active()?;
        let mut state = self.state.lock().unwrap();
        let mut inner = self.database.inner.lock().unwrap();
        Database::check_not_poisoned(&inner)?;

        if self.mode == TxnMode::ReadOnly {
            *state = TxnState::Committed;
            inner.live_txn_count -= 1;
            return Ok(());
        }

        let mut txn = inner
            .active_write_txn
            .take()
            .expect("read-write transaction must have a staged buffer");
        let Inner {
            storage,
            superblock,
            committed_allocator,
            ..
        } = &mut *inner;
        let result = commit::commit(storage.as_mut(), superblock, committed_allocator, &mut txn);
        inner.live_txn_count -= 1;
        match result {
            Ok(_) => {
                *state = TxnState::Committed;
                Ok(())
            }
            Err(err) => {
                if matches!(err, EngineError::Io(_)) {
                    inner.poisoned = true;
                }
                *state = TxnState::Aborted;
                Err(err)
            }
        }
    }

    pub fn abort(&self) -> Result<()> {
        self.check_active()?;
        let mut state = self.state.lock().unwrap();
        let mut inner = self.database.inner.lock().unwrap();
        if self.mode == TxnMode::ReadWrite {
            inner.active_write_txn = None;
        }
        inner.live_txn_count -= 1;
        *state = TxnState::Aborted;
        Ok(())
    }
}
