//! Action-log tree model for Squirrel.
//!
//! A hoard is a tree of named [`Node`]s. Every change to it is an
//! [`Action`]: a timestamped, path-addressed edit. Replaying the same
//! actions in the same order on any replica yields the same tree, which is
//! what the sync layer builds on.
//!
//! - [`node`]: tree nodes, alarms, constraints, structural diff
//! - [`action`]: action types, wire decoding, stream merging
//! - [`hoard`]: the replay engine with undo and alarm scheduling
//!
//! This crate does no I/O.

pub mod action;
pub mod error;
pub mod hoard;
pub mod node;
pub mod translate;

pub use action::{Action, ActionKind, ActionType, DAY_MS, normalize};
pub use error::{ActionError, Conflict, ConflictKind, HoardError, NodeError};
pub use hoard::{Hoard, HistoryEntry, PlayOptions};
pub use node::{Alarm, Constraints, Node};
pub use translate::{English, Translator};

use std::time::{SystemTime, UNIX_EPOCH};

/// Separator used when a path is shown or stored as a single string.
pub const PATH_SEPARATOR: &str = "↘";

/// Join path components for display or comparison.
pub fn join_path(path: &[String]) -> String {
    path.join(PATH_SEPARATOR)
}

/// Inverse of [`join_path`]. Empty components are dropped.
pub fn split_path(joined: &str) -> Vec<String> {
    joined
        .split(PATH_SEPARATOR)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
