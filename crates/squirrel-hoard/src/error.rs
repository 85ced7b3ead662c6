//! Error types for tree and action-log operations.

use thiserror::Error;

use crate::Action;

/// Errors from direct structural manipulation of a [`Node`](crate::Node).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// A child with this name already exists.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// No child with this name.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Errors raised while constructing or decoding an [`Action`].
///
/// These indicate a version incompatibility or a broken invariant, never a
/// replay conflict. A stream that contains one of these cannot be trusted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// The single-letter type code is not one we know.
    #[error("unrecognised action type: {0:?}")]
    UnknownType(String),

    /// Actions always target a node below the root.
    #[error("action has an empty path")]
    EmptyPath,

    /// The payload could not be interpreted for this action type.
    #[error("bad {code} payload: {reason}")]
    BadPayload { code: char, reason: String },
}

impl ActionError {
    pub(crate) fn bad_payload(code: char, reason: impl Into<String>) -> Self {
        Self::BadPayload {
            code,
            reason: reason.into(),
        }
    }
}

/// Why an action could not be applied to the current tree.
///
/// The display strings are the messages users see in conflict reports.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    #[error("already exists")]
    AlreadyExists,

    #[error("does not exist")]
    DoesNotExist,

    #[error("parent does not exist")]
    ParentDoesNotExist,

    #[error("new parent does not exist")]
    NewParentDoesNotExist,

    /// Rename or move would collide with an existing sibling.
    #[error("it already exists")]
    TargetExists,

    #[error("cannot move a node into itself")]
    MoveIntoSelf,
}

/// A structural precondition failure for a single action.
///
/// Returned as a value; the tree is left exactly as it was before the action
/// was attempted.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{action}: {kind}")]
pub struct Conflict {
    pub action: Action,
    pub kind: ConflictKind,
}

impl Conflict {
    pub fn new(action: Action, kind: ConflictKind) -> Self {
        Self { action, kind }
    }

    /// Human-readable reason, e.g. "already exists".
    pub fn message(&self) -> String {
        self.kind.to_string()
    }
}

/// Errors from [`Hoard`](crate::Hoard) operations other than conflicts.
#[derive(Error, Debug)]
pub enum HoardError {
    #[error("nothing to undo")]
    NothingToUndo,

    /// The undo record no longer applies to the current tree.
    #[error("undo failed: {0}")]
    UndoConflict(Box<Conflict>),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
