// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Staged, uncommitted work (component C6: Transaction Buffer).
//!
//! A [`TransactionBuffer`] accumulates operations against a cloned
//! working view of the [`Allocator`] and is only reconciled into the
//! database's committed state by a successful commit
//! ([`crate::commit`]). Staging never writes to [`crate::storage`] —
//! [`Allocator::allocate`] only reads an already-durable free block to
//! learn its link, never extends the file or writes a new one — so an
//! aborted transaction costs nothing to undo.

use crate::allocator::Allocator;
use crate::error::{EngineError, Result};

/// Read-write or read-only mode a transaction was opened in. Values
/// match the wire encoding at the FFI boundary.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxnMode {
    ReadOnly = 0,
    ReadWrite = 1,
}

/// One staged operation, carrying the block id it will occupy on commit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Operation {
    Insert { block_id: u64, payload: Vec<u8> },
    Update { block_id: u64, payload: Vec<u8> },
    Delete { block_id: u64 },
}

impl Operation {
    pub(crate) fn block_id(&self) -> u64 {
        match self {
            Self::Insert { block_id, .. } | Self::Update { block_id, .. } | Self::Delete { block_id } => {
                *block_id
            }
        }
    }
}

/// Staged operations for one in-flight transaction, keyed by final block
/// id so repeated writes to the same document collapse in place.
pub(crate) struct TransactionBuffer {
    mode: TxnMode,
    /// Tentative allocator view: ids handed out by `apply` here are not
    /// visible to any other transaction until commit copies this back.
    pub(crate) allocator: Allocator,
    ops: Vec<Operation>,
    committed: bool,
}

impl TransactionBuffer {
    pub(crate) fn begin(mode: TxnMode, allocator: &Allocator) -> Self {
        Self {
            mode,
            allocator: allocator.clone(),
            ops: Vec::new(),
            committed: false,
        }
    }

    pub(crate) fn mode(&self) -> TxnMode {
        self.mode
    }

    pub(crate) fn is_committed(&self) -> bool {
        self.committed
    }

    pub(crate) fn mark_committed(&mut self) {
        self.committed = true;
    }

    pub(crate) fn ops(&self) -> &[Operation] {
        &self.ops
    }

    /// Stage an insert of a brand-new document, assigning it a tentative
    /// block id from the transaction's working allocator.
    pub(crate) fn stage_insert(
        &mut self,
        allocate: impl FnOnce(&mut Allocator) -> Result<u64>,
        payload: Vec<u8>,
    ) -> Result<u64> {
        self.require_read_write()?;
        let block_id = allocate(&mut self.allocator)?;
        self.ops.push(Operation::Insert { block_id, payload });
        Ok(block_id)
    }

    /// Stage an update to an existing document. If this transaction
    /// already staged an operation for `block_id`, the new write
    /// collapses onto it per spec.md §4.5's dedup rules:
    /// - a later update replaces an earlier insert or update in place.
    /// - an update after a staged delete is rejected: the document does
    ///   not exist within this transaction's view.
    pub(crate) fn stage_update(&mut self, block_id: u64, payload: Vec<u8>) -> Result<()> {
        self.require_read_write()?;
        if let Some(existing) = self.ops.iter_mut().find(|op| op.block_id() == block_id) {
            match existing {
                Operation::Insert { payload: p, .. } | Operation::Update { payload: p, .. } => {
                    *p = payload;
                }
                Operation::Delete { .. } => return Err(EngineError::NotFound),
            }
            return Ok(());
        }
        self.ops.push(Operation::Update { block_id, payload });
        Ok(())
    }

    /// Stage a delete. Collapse rules per spec.md §4.5:
    /// - deleting a document this same transaction inserted cancels the
    ///   insert out entirely and releases the tentative block id back to
    ///   the working allocator.
    /// - deleting on top of a staged update simply replaces it with a
    ///   delete.
    /// - deleting twice is rejected: the document no longer exists
    ///   within this transaction's view.
    pub(crate) fn stage_delete(
        &mut self,
        release: impl FnOnce(&mut Allocator, u64),
        block_id: u64,
    ) -> Result<()> {
        self.require_read_write()?;
        if let Some(pos) = self.ops.iter().position(|op| op.block_id() == block_id) {
            match &self.ops[pos] {
                Operation::Insert { .. } => {
                    self.ops.remove(pos);
                    release(&mut self.allocator, block_id);
                    return Ok(());
                }
                Operation::Update { .. } => {
                    self.ops[pos] = Operation::Delete { block_id };
                    return Ok(());
                }
                Operation::Delete { .. } => return Err(EngineError::NotFound),
            }
        }
        self.ops.push(Operation::Delete { block_id });
        Ok(())
    }

    fn require_read_write(&self) -> Result<()> {
        if self.mode != TxnMode::ReadWrite {
            return Err(EngineError::InvalidArgument(
                "operation requires a read-write transaction",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator() -> Allocator {
        Allocator::new(0, 2, 4)
    }

    #[test]
    fn test_insert_then_update_collapses() {
        let mut txn = TransactionBuffer::begin(TxnMode::ReadWrite, &allocator());
        let id = txn
            .stage_insert(|a| a.allocate(&mut crate::storage::test_util::MemStorage::default()), b"a".to_vec())
            .unwrap();
        txn.stage_update(id, b"b".to_vec()).unwrap();
        assert_eq!(txn.ops().len(), 1);
        assert_eq!(
            txn.ops()[0],
            Operation::Insert {
                block_id: id,
                payload: b"b".to_vec()
            }
        );
    }

    #[test]
    fn test_insert_then_delete_cancels() {
        let mut txn = TransactionBuffer::begin(TxnMode::ReadWrite, &allocator());
        let id = txn
            .stage_insert(|a| a.allocate(&mut crate::storage::test_util::MemStorage::default()), b"a".to_vec())
            .unwrap();
        txn.stage_delete(|a, id| a.free(id), id).unwrap();
        assert!(txn.ops().is_empty());
    }

    #[test]
    fn test_update_then_delete_replaces() {
        let mut txn = TransactionBuffer::begin(TxnMode::ReadWrite, &allocator());
        txn.stage_update(5, b"a".to_vec()).unwrap();
        txn.stage_delete(|a, id| a.free(id), 5).unwrap();
        assert_eq!(txn.ops(), &[Operation::Delete { block_id: 5 }]);
    }

    #[test]
    fn test_double_delete_rejected() {
        let mut txn = TransactionBuffer::begin(TxnMode::ReadWrite, &allocator());
        txn.stage_delete(|a, id| a.free(id), 5).unwrap();
        assert!(txn.stage_delete(|a, id| a.free(id), 5).is_err());
    }

    #[test]
    fn test_read_only_rejects_mutation() {
        let mut txn = TransactionBuffer::begin(TxnMode::ReadOnly, &allocator());
        assert!(txn.stage_update(1, b"x".to_vec()).is_err());
    }
}
