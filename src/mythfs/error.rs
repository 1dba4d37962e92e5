//! Closed, per-taxonomy error types.
//!
//! Each fallible operation in [`crate`] returns one of these enums rather
//! than a bare [`std::io::Error`] or a shared catch-all; see `DESIGN.md`
//! for why the taxonomies are kept separate instead of folded together.

use std::io;
use thiserror::Error;

/// Errors that can occur while formatting a volume or reading/validating its
/// superblock.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("disk I/O error: {0}")]
    Disk(#[from] io::Error),
    #[error("block size is not a non-zero multiple of 512")]
    InsaneBlockSize,
    #[error("disk is too small to hold the requested layout")]
    InsufficientDiskSize,
    #[error("invalid bootstrap chunk header")]
    InvalidConfigHeader,
    #[error("invalid superblock header")]
    InvalidHeader,
    #[error("invalid superblock tail marker")]
    InvalidTail,
    #[error("superblock checksum mismatch")]
    InvalidChecksum,
}

/// Errors that can occur while writing a node's content.
#[derive(Debug, Error)]
pub enum WriteNodeError {
    #[error("node does not exist")]
    NodeDoesNotExist,
    #[error("disk I/O error: {0}")]
    Disk(#[from] io::Error),
    #[error("not enough free blocks to satisfy the write")]
    InsufficientDiskSpace,
    #[error("data is too large to be addressed even with triply indirect blocks")]
    TooBig,
    #[error("the node table has no free slot")]
    NodeTableFull,
}

/// Errors that can occur while creating a new node.
#[derive(Debug, Error)]
pub enum MakeNodeError {
    #[error("a node with this id already exists")]
    Exists,
    #[error("node id 0 is reserved and cannot be used")]
    InvalidId,
    #[error("invalid node type")]
    InvalidType,
    #[error("disk I/O error: {0}")]
    Disk(#[from] io::Error),
    #[error("not enough free blocks to satisfy the write")]
    InsufficientDiskSpace,
    #[error("data is too large to be addressed even with triply indirect blocks")]
    DataTooBig,
}

impl From<WriteNodeError> for MakeNodeError {
    fn from(e: WriteNodeError) -> Self {
        match e {
            WriteNodeError::NodeDoesNotExist => {
                // `make_node` always reserves the slot before delegating, so this
                // should be unreachable; fold it into a disk error rather than
                // panicking on a corrupted table.
                MakeNodeError::Disk(io::Error::other("node slot vanished mid-write"))
            }
            WriteNodeError::Disk(e) => MakeNodeError::Disk(e),
            WriteNodeError::InsufficientDiskSpace => MakeNodeError::InsufficientDiskSpace,
            WriteNodeError::TooBig => MakeNodeError::DataTooBig,
            WriteNodeError::NodeTableFull => {
                MakeNodeError::Disk(io::Error::other("node table full"))
            }
        }
    }
}
