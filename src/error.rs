// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::io;

/// Boxed error, used for underlying I/O failures.
pub(crate) type BoxedError = Box<dyn Error + Send + Sync + 'static>;

/// Wire status codes, stable across the FFI boundary (spec.md §6).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    Internal = 1,
    NotFound = 2,
    InvalidArgument = 3,
    OutOfMemory = 4,
    NotImplemented = 5,
    TxnNotActive = 6,
    TxnAlreadyCommitted = 7,
    IoError = 8,
    Corruption = 9,
    Conflict = 10,
    AlreadyExists = 11,
}

/// Common error type for all Engine operations.
#[derive(Debug)]
#[non_exhaustive]
pub enum EngineError {
    /// A null or otherwise invalid handle, enum value, or payload was
    /// passed to an operation.
    InvalidArgument(&'static str),

    /// A requested entity (block, verifier) does not exist.
    NotFound,

    /// An entity that must be unique already exists.
    AlreadyExists,

    /// An operation was attempted on a transaction that is not active.
    TxnNotActive,

    /// An operation was attempted on a transaction that has already
    /// committed or aborted.
    TxnAlreadyCommitted,

    /// A concurrent-commit race was detected across handles. Unreachable
    /// in-process (commits are serialized by the writer mutex) but
    /// retained so the status is wire-stable.
    Conflict,

    /// The allocator or journal ran out of space to grow.
    OutOfMemory,

    /// An operation named in the boundary but not implemented by this
    /// Engine (see spec.md §9's open question on planned operations).
    NotImplemented,

    /// An I/O operation failed.
    Io(BoxedError),

    /// On-disk data failed a checksum or structural validation.
    Corrupt(CorruptKind),
}

impl EngineError {
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Self::InvalidArgument(_) => Status::InvalidArgument,
            Self::NotFound => Status::NotFound,
            Self::AlreadyExists => Status::AlreadyExists,
            Self::TxnNotActive => Status::TxnNotActive,
            Self::TxnAlreadyCommitted => Status::TxnAlreadyCommitted,
            Self::Conflict => Status::Conflict,
            Self::OutOfMemory => Status::OutOfMemory,
            Self::NotImplemented => Status::NotImplemented,
            Self::Io(_) => Status::IoError,
            Self::Corrupt(_) => Status::Corruption,
        }
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::NotFound => write!(f, "not found"),
            Self::AlreadyExists => write!(f, "already exists"),
            Self::TxnNotActive => write!(f, "transaction is not active"),
            Self::TxnAlreadyCommitted => {
                write!(f, "transaction already committed or aborted")
            }
            Self::Conflict => write!(f, "concurrent commit conflict"),
            Self::OutOfMemory => write!(f, "allocator exhausted"),
            Self::NotImplemented => write!(f, "not implemented"),
            Self::Io(err) => write!(f, "io error: {err}"),
            Self::Corrupt(c) => write!(f, "corrupt database: {c}"),
        }
    }
}

impl Error for EngineError {}

impl From<io::Error> for EngineError {
    fn from(e: io::Error) -> Self {
        Self::Io(Box::new(e))
    }
}

impl From<CorruptKind> for EngineError {
    fn from(c: CorruptKind) -> Self {
        Self::Corrupt(c)
    }
}

/// Reasons the database may be found corrupt.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum CorruptKind {
    /// The primary and shadow superblock both failed checksum.
    SuperblockChecksum,

    /// A block's header checksum did not match its payload.
    BlockChecksum { block_id: u64 },

    /// A read ran past the end of the file.
    ShortRead { block_id: u64 },

    /// A journal record's checksum did not match its contents.
    JournalRecordChecksum { sequence: u64 },

    /// The journal region is malformed in a way that is not a simple
    /// torn tail (e.g. a length prefix pointing past the file).
    JournalMalformed,
}

impl Display for CorruptKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::SuperblockChecksum => {
                write!(f, "both superblock copies failed checksum")
            }
            Self::BlockChecksum { block_id } => {
                write!(f, "block {block_id} failed checksum")
            }
            Self::ShortRead { block_id } => {
                write!(f, "short read for block {block_id}")
            }
            Self::JournalRecordChecksum { sequence } => {
                write!(f, "journal record {sequence} failed checksum")
            }
            Self::JournalMalformed => write!(f, "journal region is malformed"),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
