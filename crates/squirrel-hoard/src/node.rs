//! Tree nodes.
//!
//! A [`Node`] is either a leaf carrying a `value` or a collection carrying
//! `children`. Both fields are optional and a node may carry both at once
//! (a child added under a leaf turns it into a collection that keeps its
//! value). Children are kept in a name-ordered map so traversal order is
//! stable across replicas.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::NodeError;
use crate::{Action, ActionKind};

/// A reminder attached to a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    /// When the alarm next rings (epoch ms). Any value, including 0, is a
    /// real due date; spent alarms are marked by `expired`.
    pub due: u64,
    /// Interval between rings in ms, 0 for one-shot.
    #[serde(default)]
    pub repeat: u64,
    /// Set once a one-shot alarm has rung.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub expired: bool,
}

impl Alarm {
    pub fn new(due: u64, repeat: u64) -> Self {
        Self {
            due,
            repeat,
            expired: false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// True when the alarm should ring at `now`.
    pub fn is_due(&self, now: u64) -> bool {
        !self.is_expired() && self.due <= now
    }

    /// Reschedule after ringing: step forward by `repeat`, or expire.
    pub fn advance(&mut self) {
        if self.repeat > 0 {
            self.due = self.due.saturating_add(self.repeat);
        } else {
            self.expired = true;
        }
    }
}

/// Rules for generating a value (typically a password) for a leaf.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    pub size: u32,
    pub chars: String,
}

impl Constraints {
    pub fn new(size: u32, chars: impl Into<String>) -> Self {
        Self {
            size,
            chars: chars.into(),
        }
    }
}

/// A node in the hoard tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Last modification time (epoch ms).
    #[serde(default)]
    pub time: u64,

    /// Leaf payload. Older stores wrote this field as `data`.
    #[serde(default, alias = "data", skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<BTreeMap<String, Node>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm: Option<Alarm>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,
}

impl Node {
    /// An empty collection.
    pub fn collection(time: u64) -> Self {
        Self {
            time,
            children: Some(BTreeMap::new()),
            ..Default::default()
        }
    }

    /// A leaf holding `value`.
    pub fn leaf(time: u64, value: impl Into<String>) -> Self {
        Self {
            time,
            value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// Number of direct children.
    pub fn child_count(&self) -> usize {
        self.children.as_ref().map_or(0, BTreeMap::len)
    }

    pub fn get_child(&self, name: &str) -> Option<&Node> {
        self.children.as_ref()?.get(name)
    }

    pub fn get_child_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.children.as_mut()?.get_mut(name)
    }

    /// Attach `node` under `name`. A leaf gains a children map on first add.
    pub fn add_child(&mut self, name: impl Into<String>, node: Node) -> Result<(), NodeError> {
        let name = name.into();
        let children = self.children.get_or_insert_with(BTreeMap::new);
        if children.contains_key(&name) {
            return Err(NodeError::DuplicateKey(name));
        }
        children.insert(name, node);
        Ok(())
    }

    /// Detach and return the child called `name`.
    pub fn remove_child(&mut self, name: &str) -> Result<Node, NodeError> {
        self.children
            .as_mut()
            .and_then(|c| c.remove(name))
            .ok_or_else(|| NodeError::NotFound(name.to_string()))
    }

    /// Visit children in name order. The first `Some` returned by the
    /// visitor stops the walk and is returned.
    pub fn each_child<R>(&self, mut visitor: impl FnMut(&str, &Node) -> Option<R>) -> Option<R> {
        let children = self.children.as_ref()?;
        for (name, child) in children {
            if let Some(found) = visitor(name, child) {
                return Some(found);
            }
        }
        None
    }

    /// Walk `path.len() - offset` steps down from this node.
    ///
    /// `offset = 1` yields the parent of the node addressed by `path`.
    /// Returns `None` if any step is missing; never fails otherwise.
    pub fn node_at(&self, path: &[String], offset: usize) -> Option<&Node> {
        let steps = path.len().checked_sub(offset)?;
        let mut node = self;
        for name in &path[..steps] {
            node = node.get_child(name)?;
        }
        Some(node)
    }

    pub fn node_at_mut(&mut self, path: &[String], offset: usize) -> Option<&mut Node> {
        let steps = path.len().checked_sub(offset)?;
        let mut node = self;
        for name in &path[..steps] {
            node = node.get_child_mut(name)?;
        }
        Some(node)
    }

    /// Path from this node to `target`, matched by identity.
    pub fn path_to(&self, target: &Node) -> Option<Vec<String>> {
        if std::ptr::eq(self, target) {
            return Some(Vec::new());
        }
        self.each_child(|name, child| {
            child.path_to(target).map(|mut rest| {
                rest.insert(0, name.to_string());
                rest
            })
        })
    }

    /// Emit the actions that would turn `self` (at `prefix`) into `other`.
    ///
    /// Metadata changes are only emitted for non-root nodes since the root is
    /// never an action target. Removed children become 'D', added children
    /// become 'I' carrying the whole subtree, shared children are recursed.
    pub fn diff(&self, prefix: &[String], other: &Node, emit: &mut dyn FnMut(Action)) {
        if !prefix.is_empty() {
            let path = prefix.to_vec();
            if self.constraints != other.constraints {
                emit(Action::at(
                    path.clone(),
                    other.time,
                    ActionKind::Constraints(other.constraints.clone()),
                ));
            }
            if self.alarm != other.alarm {
                let kind = match other.alarm {
                    Some(alarm) => ActionKind::Alarm(alarm),
                    None => ActionKind::CancelAlarm,
                };
                emit(Action::at(path.clone(), other.time, kind));
            }
            if self.value != other.value {
                emit(Action::at(
                    path,
                    other.time,
                    ActionKind::Edit {
                        value: other.value.clone(),
                    },
                ));
            }
        }

        let child_path = |name: &str| {
            let mut p = prefix.to_vec();
            p.push(name.to_string());
            p
        };

        self.each_child(|name, mine| {
            match other.get_child(name) {
                Some(theirs) => mine.diff(&child_path(name), theirs, &mut *emit),
                None => emit(Action::at(child_path(name), other.time, ActionKind::Delete)),
            }
            None::<()>
        });

        other.each_child(|name, theirs| {
            if self.get_child(name).is_none() {
                emit(Action::at(
                    child_path(name),
                    theirs.time,
                    ActionKind::Insert {
                        subtree: Box::new(theirs.clone()),
                    },
                ));
            }
            None::<()>
        });
    }
}
