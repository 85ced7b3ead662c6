//! The replay engine.
//!
//! A [`Hoard`] owns one tree plus the undo log built while playing actions
//! into it. Every mutation of the tree goes through [`Hoard::play_action`],
//! which checks the action's structural preconditions against the current
//! tree and either applies it completely or leaves the tree untouched and
//! returns a [`Conflict`].
//!
//! # Timestamps
//!
//! Each action stamps the node whose content it changes:
//!
//! | Type | Stamps |
//! |------|--------|
//! | N | the new node |
//! | I, D, R | the parent collection |
//! | M | the old and the new parent |
//! | E, A, C, X | the target node |
//!
//! 'N' leaves the parent's time alone, which is what lets
//! [`Hoard::actions_to_recreate`] rebuild a tree with identical times.
//! Undo records carry the *previous* time of whatever the redo stamped, so
//! replaying the undo restores it. The one exception is 'M', whose undo can
//! only restore one of the two parents.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::{Conflict, ConflictKind, HoardError};
use crate::{Action, ActionKind, ActionType, Node, join_path};

/// One step of local history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The action as it was played.
    pub redo: Action,
    /// The action that reverses it against the tree it produced.
    pub undo: Action,
}

/// Replay switches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlayOptions {
    /// Record a history entry for each applied action.
    pub undoable: bool,
    /// Create missing ancestors (and, for E/A/X, the target) first.
    pub autocreate: bool,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            undoable: true,
            autocreate: false,
        }
    }
}

impl PlayOptions {
    /// Options for replaying foreign actions: no history, no autocreate.
    pub fn replay() -> Self {
        Self {
            undoable: false,
            autocreate: false,
        }
    }

    pub fn with_autocreate(mut self, autocreate: bool) -> Self {
        self.autocreate = autocreate;
        self
    }

    pub fn with_undoable(mut self, undoable: bool) -> Self {
        self.undoable = undoable;
        self
    }
}

/// A tree plus the history of actions played into it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "HoardSnapshot")]
pub struct Hoard {
    tree: Node,
    history: Vec<HistoryEntry>,
}

/// Accepted serialized forms.
#[derive(Deserialize)]
#[serde(untagged)]
enum HoardSnapshot {
    /// Early stores kept only the action list.
    Legacy { actions: Vec<Action> },
    Current {
        tree: Node,
        #[serde(default)]
        history: Vec<HistoryEntry>,
    },
}

impl From<HoardSnapshot> for Hoard {
    fn from(snapshot: HoardSnapshot) -> Self {
        match snapshot {
            HoardSnapshot::Current { tree, history } => Self { tree, history },
            HoardSnapshot::Legacy { actions } => {
                let mut hoard = Hoard::new();
                let conflicts = hoard.play_actions(&actions, PlayOptions::replay(), &mut |_| {});
                for conflict in &conflicts {
                    warn!("legacy hoard replay: {conflict}");
                }
                hoard
            }
        }
    }
}

impl Default for Hoard {
    fn default() -> Self {
        Self::new()
    }
}

impl Hoard {
    /// An empty hoard: a root collection and no history.
    pub fn new() -> Self {
        Self {
            tree: Node::collection(0),
            history: Vec::new(),
        }
    }

    /// Wrap an existing tree with empty history.
    pub fn from_tree(tree: Node) -> Self {
        Self {
            tree,
            history: Vec::new(),
        }
    }

    pub fn tree(&self) -> &Node {
        &self.tree
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn node_at(&self, path: &[String]) -> Option<&Node> {
        self.tree.node_at(path, 0)
    }

    pub fn can_undo(&self) -> bool {
        !self.history.is_empty()
    }

    /// Drop the undo log. The tree is not touched.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    // =========================================================================
    // Replay
    // =========================================================================

    /// Play one action.
    ///
    /// `player` sees every action that actually changed the tree, in order:
    /// autocreated 'N' actions first, then `action` itself.
    pub fn play_action(
        &mut self,
        action: &Action,
        options: PlayOptions,
        player: &mut dyn FnMut(&Action),
    ) -> Result<(), Conflict> {
        if options.autocreate {
            self.autocreate(action, options, &mut *player)?;
        }

        let undo = self.apply(action).map_err(|kind| {
            debug!("conflict playing {action}: {kind}");
            Conflict::new(action.clone(), kind)
        })?;

        trace!("played {action}");
        if options.undoable {
            self.history.push(HistoryEntry {
                redo: action.clone(),
                undo,
            });
        }
        player(action);
        Ok(())
    }

    /// Play a batch in order, collecting every conflict. A conflict does not
    /// stop the remaining actions.
    pub fn play_actions(
        &mut self,
        actions: &[Action],
        options: PlayOptions,
        player: &mut dyn FnMut(&Action),
    ) -> Vec<Conflict> {
        actions
            .iter()
            .filter_map(|action| self.play_action(action, options, &mut *player).err())
            .collect()
    }

    /// Reverse the most recent history entry. Returns the action undone.
    ///
    /// The undo itself is never recorded; there is no redo.
    pub fn undo(&mut self, player: &mut dyn FnMut(&Action)) -> Result<Action, HoardError> {
        let entry = self.history.pop().ok_or(HoardError::NothingToUndo)?;
        self.play_action(&entry.undo, PlayOptions::replay(), player)
            .map_err(|c| HoardError::UndoConflict(Box::new(c)))?;
        debug!("undid {}", entry.redo);
        Ok(entry.redo)
    }

    /// Synthesize missing ancestors, and for E/A/X the target itself.
    fn autocreate(
        &mut self,
        action: &Action,
        options: PlayOptions,
        player: &mut dyn FnMut(&Action),
    ) -> Result<(), Conflict> {
        let (ancestors, leaf) = match action.action_type() {
            ActionType::New | ActionType::Insert => (true, false),
            ActionType::Edit | ActionType::Alarm | ActionType::Constraints => (true, true),
            ActionType::CancelAlarm
            | ActionType::Delete
            | ActionType::Move
            | ActionType::Rename => (false, false),
        };
        if !ancestors {
            return Ok(());
        }

        let sub_options = options.with_autocreate(false);
        let path = action.path();
        for depth in 1..path.len() {
            let prefix = &path[..depth];
            if self.tree.node_at(prefix, 0).is_none() {
                let create = Action::at(prefix.to_vec(), action.time(), ActionKind::New { value: None });
                self.play_action(&create, sub_options, &mut *player)?;
            }
        }
        if leaf && self.tree.node_at(path, 0).is_none() {
            let create = Action::at(
                path.to_vec(),
                action.time(),
                ActionKind::New {
                    value: Some(String::new()),
                },
            );
            self.play_action(&create, sub_options, &mut *player)?;
        }
        Ok(())
    }

    /// Apply `action` to the tree and return its undo, or explain why not.
    /// On error the tree is unchanged.
    fn apply(&mut self, action: &Action) -> Result<Action, ConflictKind> {
        let path = action.path();
        let parent_path = action.parent_path();
        let name = action.name();
        let time = action.time();

        match action.kind() {
            ActionKind::New { value } => {
                let parent = self
                    .tree
                    .node_at_mut(parent_path, 0)
                    .ok_or(ConflictKind::ParentDoesNotExist)?;
                let node = match value {
                    Some(v) => Node::leaf(time, v.clone()),
                    None => Node::collection(time),
                };
                parent
                    .add_child(name, node)
                    .map_err(|_| ConflictKind::AlreadyExists)?;
                Ok(Action::at(path.to_vec(), parent.time, ActionKind::Delete))
            }

            ActionKind::Insert { subtree } => {
                let parent = self
                    .tree
                    .node_at_mut(parent_path, 0)
                    .ok_or(ConflictKind::ParentDoesNotExist)?;
                parent
                    .add_child(name, (**subtree).clone())
                    .map_err(|_| ConflictKind::AlreadyExists)?;
                let prior = std::mem::replace(&mut parent.time, time);
                Ok(Action::at(path.to_vec(), prior, ActionKind::Delete))
            }

            ActionKind::Delete => {
                let parent = self
                    .tree
                    .node_at_mut(parent_path, 0)
                    .ok_or(ConflictKind::DoesNotExist)?;
                let removed = parent
                    .remove_child(name)
                    .map_err(|_| ConflictKind::DoesNotExist)?;
                let prior = std::mem::replace(&mut parent.time, time);
                Ok(Action::at(
                    path.to_vec(),
                    prior,
                    ActionKind::Insert {
                        subtree: Box::new(removed),
                    },
                ))
            }

            ActionKind::Edit { value } => {
                let node = self.target_mut(path)?;
                let prior_value = std::mem::replace(&mut node.value, value.clone());
                let prior = std::mem::replace(&mut node.time, time);
                Ok(Action::at(path.to_vec(), prior, ActionKind::Edit { value: prior_value }))
            }

            ActionKind::Alarm(alarm) => {
                let node = self.target_mut(path)?;
                let prior_alarm = node.alarm.replace(*alarm);
                let prior = std::mem::replace(&mut node.time, time);
                let undo = match prior_alarm {
                    Some(a) => ActionKind::Alarm(a),
                    None => ActionKind::CancelAlarm,
                };
                Ok(Action::at(path.to_vec(), prior, undo))
            }

            ActionKind::CancelAlarm => {
                let node = self.target_mut(path)?;
                let prior_alarm = node.alarm.take();
                let prior = std::mem::replace(&mut node.time, time);
                let undo = match prior_alarm {
                    Some(a) => ActionKind::Alarm(a),
                    None => ActionKind::CancelAlarm,
                };
                Ok(Action::at(path.to_vec(), prior, undo))
            }

            ActionKind::Constraints(constraints) => {
                let node = self.target_mut(path)?;
                let prior_constraints = std::mem::replace(&mut node.constraints, constraints.clone());
                let prior = std::mem::replace(&mut node.time, time);
                Ok(Action::at(path.to_vec(), prior, ActionKind::Constraints(prior_constraints)))
            }

            ActionKind::Rename { name: new_name } => {
                let parent = self
                    .tree
                    .node_at_mut(parent_path, 0)
                    .ok_or(ConflictKind::DoesNotExist)?;
                if parent.get_child(name).is_none() {
                    return Err(ConflictKind::DoesNotExist);
                }
                if parent.get_child(new_name).is_some() {
                    return Err(ConflictKind::TargetExists);
                }
                let node = parent
                    .remove_child(name)
                    .map_err(|_| ConflictKind::DoesNotExist)?;
                parent
                    .add_child(new_name.clone(), node)
                    .map_err(|_| ConflictKind::TargetExists)?;
                let prior = std::mem::replace(&mut parent.time, time);

                let mut renamed = parent_path.to_vec();
                renamed.push(new_name.clone());
                Ok(Action::at(
                    renamed,
                    prior,
                    ActionKind::Rename {
                        name: name.to_string(),
                    },
                ))
            }

            ActionKind::Move { to } => self.apply_move(action, to),
        }
    }

    fn apply_move(&mut self, action: &Action, to: &[String]) -> Result<Action, ConflictKind> {
        let path = action.path();
        let parent_path = action.parent_path();
        let name = action.name();
        let time = action.time();

        // Check everything before touching the tree.
        if self.tree.node_at(path, 0).is_none() {
            return Err(ConflictKind::DoesNotExist);
        }
        if to.starts_with(path) {
            return Err(ConflictKind::MoveIntoSelf);
        }
        let destination = self
            .tree
            .node_at(to, 0)
            .ok_or(ConflictKind::NewParentDoesNotExist)?;
        if destination.get_child(name).is_some() {
            return Err(ConflictKind::TargetExists);
        }

        let old_parent = self
            .tree
            .node_at_mut(parent_path, 0)
            .ok_or(ConflictKind::DoesNotExist)?;
        let node = old_parent
            .remove_child(name)
            .map_err(|_| ConflictKind::DoesNotExist)?;
        let prior = std::mem::replace(&mut old_parent.time, time);

        // `to` is not inside the moved subtree, so detaching cannot have
        // invalidated it.
        match self.tree.node_at_mut(to, 0) {
            Some(destination) => {
                destination
                    .children
                    .get_or_insert_with(Default::default)
                    .insert(name.to_string(), node);
                destination.time = time;
            }
            None => {
                self.restore_detached(parent_path, name, node, prior);
                return Err(ConflictKind::NewParentDoesNotExist);
            }
        }

        let mut moved = to.to_vec();
        moved.push(name.to_string());
        Ok(Action::at(
            moved,
            prior,
            ActionKind::Move {
                to: parent_path.to_vec(),
            },
        ))
    }

    /// Put a node detached by a failed move back where it came from.
    fn restore_detached(&mut self, parent_path: &[String], name: &str, node: Node, prior: u64) {
        match self.tree.node_at_mut(parent_path, 0) {
            Some(parent) => {
                parent.time = prior;
                if let Err(err) = parent.add_child(name, node) {
                    warn!("could not restore {name} after failed move: {err}");
                }
            }
            None => warn!("lost {name}: parent vanished during move"),
        }
    }

    fn target_mut(&mut self, path: &[String]) -> Result<&mut Node, ConflictKind> {
        self.tree
            .node_at_mut(path, 0)
            .ok_or(ConflictKind::DoesNotExist)
    }

    // =========================================================================
    // Alarms
    // =========================================================================

    /// Ring every alarm due at or before `now`.
    ///
    /// `ring` is awaited for each alarm in turn, never concurrently. After it
    /// returns the alarm is rescheduled by its repeat interval, or marked
    /// expired if it has none. Returns the number of alarms rung.
    pub async fn check_alarms<F, Fut>(&mut self, now: u64, mut ring: F) -> usize
    where
        F: FnMut(Vec<String>, u64) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut due = Vec::new();
        collect_due_alarms(&self.tree, &mut Vec::new(), now, &mut due);

        let mut fired = 0;
        for (path, when) in due {
            debug!("alarm due on {} at {when}", join_path(&path));
            ring(path.clone(), when).await;
            if let Some(alarm) = self
                .tree
                .node_at_mut(&path, 0)
                .and_then(|node| node.alarm.as_mut())
            {
                alarm.advance();
            }
            fired += 1;
        }
        fired
    }

    // =========================================================================
    // Compaction
    // =========================================================================

    /// The shortest action stream that rebuilds this tree from scratch.
    ///
    /// Depth first, children in name order: 'N' for each node (carrying its
    /// value if it is a leaf), an 'E' for a node whose value does not match
    /// its shape, then 'A' and 'X' for any alarm and constraints. Every
    /// action carries the node's own time.
    pub fn actions_to_recreate(&self) -> Vec<Action> {
        let mut actions = Vec::new();
        let mut path = Vec::new();
        self.tree.each_child(|name, child| {
            recreate(child, name, &mut path, &mut actions);
            None::<()>
        });
        actions
    }

    /// Actions that turn this hoard's tree into `other`'s.
    pub fn diff(&self, other: &Hoard) -> Vec<Action> {
        let mut actions = Vec::new();
        self.tree.diff(&[], &other.tree, &mut |a| actions.push(a));
        actions
    }
}

fn collect_due_alarms(node: &Node, path: &mut Vec<String>, now: u64, due: &mut Vec<(Vec<String>, u64)>) {
    node.each_child(|name, child| {
        path.push(name.to_string());
        if let Some(alarm) = child.alarm.filter(|a| a.is_due(now)) {
            due.push((path.clone(), alarm.due));
        }
        collect_due_alarms(child, path, now, due);
        path.pop();
        None::<()>
    });
}

fn recreate(node: &Node, name: &str, path: &mut Vec<String>, actions: &mut Vec<Action>) {
    path.push(name.to_string());
    // 'N' with a value builds a leaf and without one a collection. Nodes
    // that are neither (a collection with a value, a leaf without one) are
    // created in the other shape and then given their real value by 'E'.
    let plain_shape = node.is_leaf() == node.value.is_some();
    let created = if node.is_leaf() {
        Some(node.value.clone().unwrap_or_default())
    } else {
        None
    };
    actions.push(Action::at(path.clone(), node.time, ActionKind::New { value: created }));
    if !plain_shape {
        actions.push(Action::at(
            path.clone(),
            node.time,
            ActionKind::Edit {
                value: node.value.clone(),
            },
        ));
    }
    if let Some(alarm) = node.alarm {
        actions.push(Action::at(path.clone(), node.time, ActionKind::Alarm(alarm)));
    }
    if let Some(constraints) = &node.constraints {
        actions.push(Action::at(
            path.clone(),
            node.time,
            ActionKind::Constraints(Some(constraints.clone())),
        ));
    }
    node.each_child(|child_name, child| {
        recreate(child, child_name, path, actions);
        None::<()>
    });
    path.pop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Alarm, Constraints};
    use serde_json::json;

    fn p(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn act(code: &str, path: &[&str], time: u64, data: Option<serde_json::Value>) -> Action {
        Action::from_parts(code, p(path), Some(time), data).unwrap()
    }

    fn play(h: &mut Hoard, a: &Action) -> Result<(), Conflict> {
        h.play_action(a, PlayOptions::default(), &mut |_| {})
    }

    /// Bank/{pin, card/{number}} plus a sibling "email" leaf.
    fn sample() -> Hoard {
        let mut h = Hoard::new();
        for a in [
            act("N", &["Bank"], 10, None),
            act("N", &["Bank", "pin"], 11, Some(json!("1234"))),
            act("N", &["Bank", "card"], 12, None),
            act("N", &["Bank", "card", "number"], 13, Some(json!("4111"))),
            act("N", &["email"], 14, Some(json!("hunter2"))),
        ] {
            h.play_action(&a, PlayOptions::replay(), &mut |_| {}).unwrap();
        }
        h
    }

    #[test]
    fn test_new_is_idempotent_by_conflict() {
        let mut h = Hoard::new();
        let n = act("N", &["FineDining"], 100, None);
        play(&mut h, &n).unwrap();
        let after_first = h.tree().clone();

        let conflict = play(&mut h, &n).unwrap_err();
        assert_eq!(conflict.kind, ConflictKind::AlreadyExists);
        assert_eq!(conflict.message(), "already exists");
        assert_eq!(h.tree(), &after_first);
        assert_eq!(h.history().len(), 1);
    }

    #[test]
    fn test_new_without_parent_conflicts() {
        let mut h = Hoard::new();
        let conflict = play(&mut h, &act("N", &["a", "b"], 1, None)).unwrap_err();
        assert_eq!(conflict.kind, ConflictKind::ParentDoesNotExist);
        assert_eq!(h.tree(), Hoard::new().tree());
    }

    #[test]
    fn test_undo_round_trip_every_type() {
        let subtree = serde_json::to_string(&Node::leaf(50, "ins")).unwrap();
        let cases = vec![
            act("N", &["Bank", "new"], 100, Some(json!("v"))),
            act("N", &["Bank", "folder"], 100, None),
            act("I", &["Bank", "inserted"], 100, Some(json!(subtree))),
            act("A", &["Bank", "pin"], 100, Some(json!({"due": 500, "repeat": 10}))),
            act("C", &["Bank", "pin"], 100, None),
            act("D", &["Bank", "card"], 100, None),
            act("E", &["Bank", "pin"], 100, Some(json!("9999"))),
            act("E", &["Bank"], 100, Some(json!("folder value"))),
            act("R", &["Bank", "pin"], 100, Some(json!("PIN"))),
            act("X", &["email"], 100, Some(json!("8;abc"))),
        ];

        for case in cases {
            let mut h = sample();
            // Give the pin an alarm so 'C' has something to cancel
            if case.action_type() == ActionType::CancelAlarm {
                play(&mut h, &act("A", &["Bank", "pin"], 50, Some(json!({"due": 1, "repeat": 0})))).unwrap();
            }
            let before = h.tree().clone();
            play(&mut h, &case).unwrap();
            assert_ne!(h.tree(), &before, "{case} changed nothing");
            h.undo(&mut |_| {}).unwrap();
            assert_eq!(h.tree(), &before, "undo of {case} did not restore");
        }
    }

    #[test]
    fn test_move_and_undo() {
        let mut h = sample();
        let before = h.tree().clone();
        let m = act("M", &["email"], 100, Some(json!(["Bank", "card"])));
        play(&mut h, &m).unwrap();

        assert!(h.node_at(&p(&["email"])).is_none());
        let moved = h.node_at(&p(&["Bank", "card", "email"])).unwrap();
        assert_eq!(moved.value.as_deref(), Some("hunter2"));
        assert_eq!(h.node_at(&p(&["Bank", "card"])).unwrap().time, 100);
        assert_eq!(h.tree().time, 100);

        h.undo(&mut |_| {}).unwrap();
        // Shape and the old parent's time come back; the destination
        // keeps the skewed time.
        let mut expected = before.clone();
        expected.get_child_mut("Bank").unwrap().get_child_mut("card").unwrap().time = 0;
        let mut actual = h.tree().clone();
        actual.get_child_mut("Bank").unwrap().get_child_mut("card").unwrap().time = 0;
        assert_eq!(actual, expected);
        assert_eq!(h.tree().time, before.time);
    }

    #[test]
    fn test_move_conflicts() {
        let mut h = sample();
        let before = h.tree().clone();

        let into_self = act("M", &["Bank"], 100, Some(json!(["Bank", "card"])));
        assert_eq!(play(&mut h, &into_self).unwrap_err().kind, ConflictKind::MoveIntoSelf);

        let nowhere = act("M", &["email"], 100, Some(json!(["Nowhere"])));
        assert_eq!(play(&mut h, &nowhere).unwrap_err().kind, ConflictKind::NewParentDoesNotExist);

        let missing = act("M", &["ghost"], 100, Some(json!(["Bank"])));
        assert_eq!(play(&mut h, &missing).unwrap_err().kind, ConflictKind::DoesNotExist);
        assert_eq!(h.tree(), &before);

        play(&mut h, &act("N", &["Bank", "email"], 90, None)).unwrap();
        let before_collision = h.tree().clone();
        let collide = act("M", &["email"], 100, Some(json!(["Bank"])));
        assert_eq!(play(&mut h, &collide).unwrap_err().kind, ConflictKind::TargetExists);
        assert_eq!(h.tree(), &before_collision);
    }

    #[test]
    fn test_rename_collision() {
        let mut h = Hoard::new();
        play(&mut h, &act("N", &["P"], 1, None)).unwrap();
        play(&mut h, &act("N", &["P", "A"], 2, Some(json!("a")))).unwrap();
        play(&mut h, &act("N", &["P", "B"], 3, Some(json!("b")))).unwrap();
        let before = h.tree().clone();

        let conflict = play(&mut h, &act("R", &["P", "A"], 4, Some(json!("B")))).unwrap_err();
        assert_eq!(conflict.message(), "it already exists");
        assert_eq!(h.tree(), &before);
        assert_eq!(h.node_at(&p(&["P", "A"])).unwrap().value.as_deref(), Some("a"));
        assert_eq!(h.node_at(&p(&["P", "B"])).unwrap().value.as_deref(), Some("b"));
    }

    #[test]
    fn test_edit_missing_conflicts() {
        let mut h = sample();
        let conflict = play(&mut h, &act("E", &["Bank", "ghost"], 5, Some(json!("x")))).unwrap_err();
        assert_eq!(conflict.kind, ConflictKind::DoesNotExist);
        let conflict = play(&mut h, &act("D", &["Nope", "ghost"], 5, None)).unwrap_err();
        assert_eq!(conflict.kind, ConflictKind::DoesNotExist);
    }

    #[test]
    fn test_autocreate_chain() {
        let mut h = Hoard::new();
        let mut played = Vec::new();
        let e = act("E", &["One", "Two", "Three"], 42, Some(json!("value")));
        h.play_action(&e, PlayOptions::default().with_autocreate(true), &mut |a| {
            played.push((a.action_type(), a.path().to_vec()))
        })
        .unwrap();

        assert_eq!(
            played,
            vec![
                (ActionType::New, p(&["One"])),
                (ActionType::New, p(&["One", "Two"])),
                (ActionType::New, p(&["One", "Two", "Three"])),
                (ActionType::Edit, p(&["One", "Two", "Three"])),
            ]
        );
        assert_eq!(h.history().len(), 4);
        let leaf = h.node_at(&p(&["One", "Two", "Three"])).unwrap();
        assert_eq!(leaf.value.as_deref(), Some("value"));
        assert!(leaf.is_leaf());

        // Four undos take us back to an empty tree.
        for _ in 0..4 {
            h.undo(&mut |_| {}).unwrap();
        }
        assert_eq!(h.tree(), Hoard::new().tree());
    }

    #[test]
    fn test_autocreate_not_recorded_when_not_undoable() {
        let mut h = Hoard::new();
        let x = act("X", &["a", "b"], 1, Some(json!({"size": 4, "chars": "0-9"})));
        h.play_action(&x, PlayOptions::replay().with_autocreate(true), &mut |_| {})
            .unwrap();
        assert!(h.history().is_empty());
        assert_eq!(
            h.node_at(&p(&["a", "b"])).unwrap().constraints,
            Some(Constraints::new(4, "0-9"))
        );
    }

    #[test]
    fn test_undo_empty() {
        let mut h = Hoard::new();
        assert!(matches!(h.undo(&mut |_| {}), Err(HoardError::NothingToUndo)));
    }

    #[test]
    fn test_play_actions_collects_conflicts() {
        let mut h = Hoard::new();
        let actions = vec![
            act("N", &["a"], 1, None),
            act("N", &["missing", "b"], 2, None),
            act("N", &["a", "c"], 3, Some(json!("x"))),
            act("D", &["zzz"], 4, None),
        ];
        let mut seen = 0;
        let conflicts = h.play_actions(&actions, PlayOptions::replay(), &mut |_| seen += 1);
        assert_eq!(conflicts.len(), 2);
        assert_eq!(seen, 2);
        assert!(h.node_at(&p(&["a", "c"])).is_some());
    }

    #[test]
    fn test_recreate_fine_dining() {
        let mut h = Hoard::new();
        play(&mut h, &act("N", &["FineDining"], 100, None)).unwrap();
        play(&mut h, &act("N", &["FineDining", "Caviar"], 300, None)).unwrap();
        play(
            &mut h,
            &act("N", &["FineDining", "Caviar", "Beluga"], 400, Some(json!("£6.70 per gram"))),
        )
        .unwrap();

        let actions = h.actions_to_recreate();
        let expected = vec![
            act("N", &["FineDining"], 100, None),
            act("N", &["FineDining", "Caviar"], 300, None),
            act("N", &["FineDining", "Caviar", "Beluga"], 400, Some(json!("£6.70 per gram"))),
        ];
        assert_eq!(actions, expected);

        let mut fresh = Hoard::new();
        let conflicts = fresh.play_actions(&actions, PlayOptions::default(), &mut |_| {});
        assert!(conflicts.is_empty());
        assert_eq!(fresh.tree(), h.tree());
    }

    #[test]
    fn test_recreate_with_metadata() {
        let mut h = sample();
        play(&mut h, &act("A", &["Bank", "pin"], 200, Some(json!({"due": 900, "repeat": 0})))).unwrap();
        play(&mut h, &act("X", &["Bank", "pin"], 201, Some(json!("4;0123456789")))).unwrap();
        play(&mut h, &act("D", &["Bank", "card", "number"], 202, None)).unwrap();

        let actions = h.actions_to_recreate();
        let types: String = actions.iter().map(|a| a.action_type().code()).collect();
        // Bank, card, pin(+A+X), email
        assert_eq!(types, "NNNAXN");

        let mut fresh = Hoard::new();
        assert!(fresh.play_actions(&actions, PlayOptions::default(), &mut |_| {}).is_empty());
        assert_eq!(fresh.tree().get_child("Bank"), h.tree().get_child("Bank"));
        assert_eq!(fresh.tree().get_child("email"), h.tree().get_child("email"));
    }

    #[test]
    fn test_recreate_keeps_mixed_shapes() {
        let mut h = Hoard::new();
        play(&mut h, &act("N", &["F"], 10, None)).unwrap();
        play(&mut h, &act("E", &["F"], 11, Some(json!("v")))).unwrap();
        play(&mut h, &act("N", &["F", "inner"], 12, Some(json!("x")))).unwrap();
        play(&mut h, &act("N", &["G"], 13, Some(json!("w")))).unwrap();
        play(&mut h, &act("E", &["G"], 14, None)).unwrap();
        play(&mut h, &act("N", &["H"], 15, None)).unwrap();
        play(&mut h, &act("E", &["H"], 16, Some(json!("empty folder value")))).unwrap();

        let f = h.node_at(&p(&["F"])).unwrap();
        assert!(!f.is_leaf() && f.value.is_some());
        let g = h.node_at(&p(&["G"])).unwrap();
        assert!(g.is_leaf() && g.value.is_none());

        let actions = h.actions_to_recreate();
        let types: String = actions.iter().map(|a| a.action_type().code()).collect();
        // F(+E), inner, G(+E), H(+E)
        assert_eq!(types, "NENNENE");

        let mut fresh = Hoard::new();
        assert!(fresh.play_actions(&actions, PlayOptions::replay(), &mut |_| {}).is_empty());
        assert_eq!(fresh.tree().children, h.tree().children);
    }

    #[test]
    fn test_diff_then_replay_converges() {
        let a = sample();
        let mut b = sample();
        play(&mut b, &act("E", &["Bank", "pin"], 300, Some(json!("0000")))).unwrap();
        play(&mut b, &act("D", &["email"], 301, None)).unwrap();
        play(&mut b, &act("N", &["Wifi"], 302, Some(json!("guest")))).unwrap();

        let mut converged = a.clone();
        let actions = a.diff(&b);
        assert!(converged.play_actions(&actions, PlayOptions::replay(), &mut |_| {}).is_empty());
        assert_eq!(converged.tree().get_child("Bank"), b.tree().get_child("Bank"));
        assert_eq!(converged.tree().get_child("Wifi"), b.tree().get_child("Wifi"));
        assert!(converged.tree().get_child("email").is_none());
    }

    #[test]
    fn test_merged_streams_replay_to_same_tree_either_way() {
        let ours = vec![
            act("N", &["Bank"], 10, None),
            act("N", &["Bank", "pin"], 30, Some(json!("1234"))),
            act("E", &["Bank", "pin"], 50, Some(json!("9999"))),
            act("R", &["Bank", "pin"], 70, Some(json!("PIN"))),
        ];
        let theirs = vec![
            act("N", &["Wifi"], 20, Some(json!("guest"))),
            act("X", &["Wifi"], 40, Some(json!("12;a-z"))),
            act("N", &["Notes"], 50, None),
            act("A", &["Wifi"], 60, Some(json!({"due": 1000, "repeat": 0}))),
        ];

        let ab = Action::merge_streams(ours.clone(), theirs.clone());
        let ba = Action::merge_streams(theirs, ours);
        assert_eq!(ab.len(), 8);
        assert!(ab.windows(2).all(|w| w[0].time() <= w[1].time()));
        assert!(ba.windows(2).all(|w| w[0].time() <= w[1].time()));

        let mut left = Hoard::new();
        let mut right = Hoard::new();
        assert!(left.play_actions(&ab, PlayOptions::replay(), &mut |_| {}).is_empty());
        assert!(right.play_actions(&ba, PlayOptions::replay(), &mut |_| {}).is_empty());
        assert_eq!(left.tree(), right.tree());
        assert_eq!(left.node_at(&p(&["Bank", "PIN"])).unwrap().value.as_deref(), Some("9999"));
    }

    #[tokio::test]
    async fn test_check_alarms() {
        let mut h = sample();
        play(&mut h, &act("A", &["Bank", "pin"], 1, Some(json!({"due": 1000, "repeat": 500})))).unwrap();
        play(&mut h, &act("A", &["email"], 1, Some(json!({"due": 1500, "repeat": 0})))).unwrap();
        play(&mut h, &act("A", &["Bank", "card"], 1, Some(json!({"due": 5000, "repeat": 0})))).unwrap();

        let mut rung = Vec::new();
        let fired = h
            .check_alarms(2000, |path, due| {
                rung.push((path.join("/"), due));
                async {}
            })
            .await;

        assert_eq!(fired, 2);
        assert_eq!(
            rung,
            vec![("Bank/pin".to_string(), 1000), ("email".to_string(), 1500)]
        );
        assert_eq!(h.node_at(&p(&["Bank", "pin"])).unwrap().alarm, Some(Alarm::new(1500, 500)));
        assert!(h.node_at(&p(&["email"])).unwrap().alarm.unwrap().is_expired());

        // The expired one never rings again; the repeating one does.
        let fired = h.check_alarms(2000, |_, _| async {}).await;
        assert_eq!(fired, 1);
    }

    #[test]
    fn test_serde_round_trip_and_legacy() {
        let mut h = sample();
        play(&mut h, &act("E", &["email"], 99, Some(json!("new")))).unwrap();
        let json = serde_json::to_string(&h).unwrap();
        let back: Hoard = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);

        let legacy = json!({"actions": [
            {"type": "N", "path": ["a"], "time": 1},
            {"type": "N", "path": ["a", "b"], "time": 2, "data": "x"}
        ]});
        let old: Hoard = serde_json::from_value(legacy).unwrap();
        assert_eq!(old.node_at(&p(&["a", "b"])).unwrap().value.as_deref(), Some("x"));
        assert!(old.history().is_empty());
    }
}
