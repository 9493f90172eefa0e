//! Error types.
//!
//! Two failure classes exist. Caller-supplied data that cannot be used
//! (ranks, box sizes, connection lists, configuration files) is reported as a
//! [`ConfigError`]. Internal consistency failures between the policy tables and
//! the algorithms are not recoverable and abort through [`invariant!`].

use std::path::PathBuf;

use crate::comm::Rank;
use crate::pool::PoolId;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("communicator must contain at least one rank")]
    EmptyCommunicator,

    #[error("rank {rank} out of range for communicator of size {size}")]
    RankOutOfRange { rank: Rank, size: u32 },

    #[error("duplicate rank {rank} in communicator")]
    DuplicateRank { rank: Rank },

    #[error("local rank {rank} is not a member of the communicator")]
    NotAMember { rank: Rank },

    #[error("invalid box size {box_size} for communicator of size {size}")]
    InvalidBoxSize { box_size: u32, size: u32 },

    #[error("invalid slice size {bytes} bytes")]
    InvalidSliceSize { bytes: u64 },

    #[error("each connection should hold {expected} QPs but {actual} were opened for comm {comm}")]
    ConnectionCount {
        comm: u32,
        expected: usize,
        actual: usize,
    },

    #[error("invalid geometry for pool {pool:?}: {reason}")]
    InvalidPool { pool: PoolId, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Abort on a broken internal invariant.
#[cold]
#[track_caller]
pub fn invariant_violation(msg: std::fmt::Arguments<'_>) -> ! {
    tracing::error!(%msg, "invariant violation");
    panic!("invariant violation: {msg}");
}

/// Check an internal invariant, aborting with a formatted message when it
/// does not hold.
#[macro_export]
macro_rules! invariant {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::error::invariant_violation(format_args!($($arg)+));
        }
    };
}
