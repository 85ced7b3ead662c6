//! Two-replica synchronization.
//!
//! The client replica is a full [`Hoard`] (tree plus undo log) saved as one
//! blob. The cloud replica is nothing but an ordered action stream. Syncing
//! means folding cloud actions the client has not seen into the client tree
//! and writing back a stream that reflects everything now true of the
//! client.
//!
//! # Protocol
//!
//! ```text
//! load_client ──► play_action / undo (Dirty) ──► save_stores
//!                                                  │
//!                          ┌───────────────────────┤
//!                          ▼                       ▼
//!                 update_from_cloud           (no changes)
//!                          │
//!                     save_cloud ──► save_client ──► clear_history (Clean)
//! ```
//!
//! `last_sync` splits the cloud stream: actions at or before it are already
//! reflected locally, actions after it are new. The cloud is always saved
//! before the client because reconciliation moves `last_sync` and may change
//! the client tree; both must be captured in the client blob.

use std::sync::Arc;

use async_trait::async_trait;
use squirrel_hoard::{
    Action, Conflict, English, Hoard, HoardError, PlayOptions, Translator, join_path, now_millis,
};
use tracing::{debug, info, trace, warn};

use crate::blob::{ClientBlob, ClientBlobRef, CloudState, encode_cloud, parse_cloud};
use crate::error::{SyncError, SyncResult};
use crate::progress::{ProgressSink, TracingProgress};
use crate::store::Store;

/// Lets a human filter incoming cloud actions before they are applied.
#[async_trait]
pub trait Selector: Send + Sync {
    /// Return the accepted subset of `candidates`, in their original order.
    async fn select(&self, candidates: Vec<Action>) -> Vec<Action>;
}

/// Mirrors applied actions into a presentation layer.
///
/// Called once per action after the tree has already changed. Must tolerate
/// being told about a change it has already displayed.
#[async_trait]
pub trait UiPlayer: Send + Sync {
    async fn play(&self, action: &Action) -> anyhow::Result<()>;
}

/// Whether the client has changes that are not yet persisted everywhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicaState {
    /// Everything is saved; undo history is empty.
    Clean,
    /// Local edits exist; they can still be undone.
    Dirty,
}

/// Options for [`Hoarder::update_from_cloud`].
pub struct UpdateOptions<'a> {
    /// A stream that has already been loaded. `None` loads it from the cloud
    /// store.
    pub cloud_actions: Option<Vec<Action>>,
    pub selector: Option<&'a dyn Selector>,
    pub ui_player: Option<&'a dyn UiPlayer>,
    pub progress: &'a dyn ProgressSink,
}

impl Default for UpdateOptions<'_> {
    fn default() -> Self {
        Self {
            cloud_actions: None,
            selector: None,
            ui_player: None,
            progress: &TracingProgress,
        }
    }
}

/// What reconciliation did.
#[derive(Debug, Default)]
pub struct UpdateReport {
    /// The stream the cloud should contain from now on.
    pub new_cloud: Vec<Action>,
    /// Cloud actions successfully applied to the client tree.
    pub applied: usize,
    /// Cloud actions that did not apply.
    pub conflicts: Vec<Conflict>,
}

/// Options for [`Hoarder::save_stores`].
pub struct SaveOptions<'a> {
    pub selector: Option<&'a dyn Selector>,
    pub ui_player: Option<&'a dyn UiPlayer>,
    pub progress: &'a dyn ProgressSink,
    /// Reconcile with the cloud even when nothing local changed, to pick up
    /// other clients' edits.
    pub force_cloud: bool,
}

impl Default for SaveOptions<'_> {
    fn default() -> Self {
        Self {
            selector: None,
            ui_player: None,
            progress: &TracingProgress,
            force_cloud: false,
        }
    }
}

/// Outcome of [`Hoarder::save_stores`].
#[derive(Debug, Default)]
pub struct SaveReport {
    pub cloud_saved: bool,
    pub client_saved: bool,
    /// Cloud actions merged during reconciliation.
    pub merged: usize,
    pub conflicts: Vec<Conflict>,
    /// User-facing descriptions of every failure.
    pub errors: Vec<String>,
}

impl SaveReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// True when there was nothing to save.
    pub fn nothing_to_do(&self) -> bool {
        !self.cloud_saved && !self.client_saved && self.errors.is_empty()
    }
}

/// Owns the client hoard and orchestrates syncing it with the cloud.
pub struct Hoarder {
    client_store: Arc<dyn Store>,
    client_key: String,
    cloud_store: Option<Arc<dyn Store>>,
    cloud_path: Option<String>,
    image_url: Option<String>,
    hoard: Hoard,
    last_sync: u64,
    last_save: u64,
    /// The cloud must be rewritten even if no local action is pending.
    cloud_changed: bool,
    /// No client blob was loaded; the first sync takes the cloud wholesale.
    client_is_empty: bool,
    /// Human-readable log of unsaved changes.
    client_changes: Vec<String>,
    /// Cloud actions already replayed into the client that no successful
    /// cloud save has covered yet.
    replayed: Vec<Action>,
    translator: Arc<dyn Translator + Send + Sync>,
}

impl std::fmt::Debug for Hoarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hoarder")
            .field("client", &self.client_store.describe())
            .field("client_key", &self.client_key)
            .field("cloud_path", &self.cloud_path)
            .field("last_sync", &self.last_sync)
            .field("last_save", &self.last_save)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Hoarder {
    /// A hoarder with an empty client and no cloud configured.
    pub fn new(client_store: Arc<dyn Store>, client_key: impl Into<String>) -> Self {
        Self {
            client_store,
            client_key: client_key.into(),
            cloud_store: None,
            cloud_path: None,
            image_url: None,
            hoard: Hoard::new(),
            last_sync: 0,
            last_save: 0,
            cloud_changed: false,
            client_is_empty: true,
            client_changes: Vec::new(),
            replayed: Vec::new(),
            translator: Arc::new(English),
        }
    }

    pub fn with_cloud(mut self, store: Arc<dyn Store>, path: impl Into<String>) -> Self {
        self.cloud_store = Some(store);
        self.cloud_path = Some(path.into());
        self
    }

    /// Use `translator` for change-log messages.
    pub fn with_translator(mut self, translator: Arc<dyn Translator + Send + Sync>) -> Self {
        self.translator = translator;
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn hoard(&self) -> &Hoard {
        &self.hoard
    }

    pub fn last_sync(&self) -> u64 {
        self.last_sync
    }

    pub fn last_save(&self) -> u64 {
        self.last_save
    }

    /// Dirty while there is undo history, a pending cloud rewrite, or an
    /// unsaved change.
    pub fn state(&self) -> ReplicaState {
        if self.hoard.can_undo() || self.cloud_changed || !self.client_changes.is_empty() {
            ReplicaState::Dirty
        } else {
            ReplicaState::Clean
        }
    }

    pub fn cloud_path(&self) -> Option<&str> {
        self.cloud_path.as_deref()
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    pub fn client_is_empty(&self) -> bool {
        self.client_is_empty
    }

    pub fn cloud_changed(&self) -> bool {
        self.cloud_changed
    }

    pub fn set_cloud_store(&mut self, store: Arc<dyn Store>) {
        self.cloud_store = Some(store);
    }

    /// Point at a different cloud resource. The new resource must be
    /// written on the next save.
    pub fn set_cloud_path(&mut self, path: impl Into<String>) {
        let path = path.into();
        if self.cloud_path.as_deref() == Some(path.as_str()) {
            return;
        }
        info!("cloud path set to {path}");
        self.client_changes.push(format!("Cloud path set to '{path}'"));
        self.cloud_path = Some(path);
        self.cloud_changed = true;
    }

    pub fn set_image_url(&mut self, url: Option<String>) {
        if self.image_url == url {
            return;
        }
        self.client_changes.push("Image changed".to_string());
        self.image_url = url;
    }

    // =========================================================================
    // Local edits
    // =========================================================================

    /// Apply a local edit to the client. Undoable until the next successful
    /// save.
    pub fn play_action(&mut self, action: &Action, autocreate: bool) -> Result<(), Conflict> {
        let translator = &*self.translator;
        let changes = &mut self.client_changes;
        self.hoard.play_action(
            action,
            PlayOptions::default().with_autocreate(autocreate),
            &mut |played| changes.push(played.verbose(translator)),
        )
    }

    pub fn can_undo(&self) -> bool {
        self.hoard.can_undo()
    }

    /// Undo the most recent local edit, dropping its line from the change
    /// log. Edits loaded from a saved client have no line to drop.
    pub fn undo(&mut self) -> Result<Action, HoardError> {
        let undone = self.hoard.undo(&mut |_| {})?;
        let line = undone.verbose(&*self.translator);
        if let Some(index) = self.client_changes.iter().rposition(|change| *change == line) {
            self.client_changes.remove(index);
        }
        Ok(undone)
    }

    /// Unsaved changes, oldest first. At most `max` lines; a final line
    /// counts any that were left out.
    pub fn changes(&self, max: usize) -> Vec<String> {
        let total = self.client_changes.len();
        if total <= max {
            return self.client_changes.clone();
        }
        let shown = max.saturating_sub(1);
        let mut lines: Vec<String> = self.client_changes[..shown].to_vec();
        lines.push(format!("... and {} more", total - shown));
        lines
    }

    /// Ring alarms due now. See [`Hoarder::check_alarms_at`].
    pub async fn check_alarms<F, Fut>(&mut self, ring: F) -> usize
    where
        F: FnMut(Vec<String>, u64) -> Fut,
        Fut: Future<Output = ()>,
    {
        self.check_alarms_at(now_millis(), ring).await
    }

    /// Ring alarms due at `now`. Each one that fires is a client change,
    /// since its schedule moved.
    pub async fn check_alarms_at<F, Fut>(&mut self, now: u64, mut ring: F) -> usize
    where
        F: FnMut(Vec<String>, u64) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut rung = Vec::new();
        let fired = self
            .hoard
            .check_alarms(now, |path, due| {
                rung.push(join_path(&path));
                ring(path, due)
            })
            .await;
        if fired > 0 {
            self.client_changes
                .extend(rung.into_iter().map(|path| format!("Reminder on '{path}'")));
        }
        fired
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Load the client blob.
    ///
    /// Returns `Ok(false)` if there is none yet. On any failure the client
    /// starts fresh and empty; the error is returned so the caller can warn.
    pub async fn load_client(&mut self) -> SyncResult<bool> {
        let text = match self.client_store.reads(&self.client_key).await {
            Ok(text) => text,
            Err(err) if err.is_not_found() => {
                info!("no client hoard at {}; starting fresh", self.client_key);
                self.reset_client();
                return Ok(false);
            }
            Err(err) => {
                self.reset_client();
                return Err(SyncError::store(format!("reading client {}", self.client_key), err));
            }
        };

        let blob = match ClientBlob::parse(&text) {
            Ok(blob) => blob,
            Err(err) => {
                warn!("client hoard {} is unreadable; starting fresh", self.client_key);
                self.reset_client();
                return Err(SyncError::parse("client hoard", err));
            }
        };

        if blob.cloud_path.is_some() {
            self.cloud_path = blob.cloud_path;
        }
        self.image_url = blob.image_url;
        self.last_sync = blob.last_sync;
        self.last_save = blob.last_save;
        self.hoard = blob.hoard;
        self.replayed = blob.replayed;
        self.client_is_empty = false;
        self.cloud_changed = false;
        self.client_changes.clear();
        info!(
            "loaded client hoard ({} top-level entries, {} unsynced, last sync {})",
            self.hoard.tree().child_count(),
            self.hoard.history().len(),
            self.last_sync
        );
        Ok(true)
    }

    fn reset_client(&mut self) {
        self.hoard = Hoard::new();
        self.last_sync = 0;
        self.last_save = 0;
        self.client_is_empty = true;
        self.client_changes.clear();
        self.replayed.clear();
    }

    fn cloud_target(&self) -> SyncResult<(Arc<dyn Store>, String)> {
        let store = self.cloud_store.clone().ok_or(SyncError::NoCloudStore)?;
        let path = self.cloud_path.clone().ok_or(SyncError::NoCloudPath)?;
        Ok((store, path))
    }

    /// Load the cloud action stream. A missing resource is an empty stream
    /// that will be created on the next save.
    pub async fn load_cloud(&mut self) -> SyncResult<CloudState> {
        let (store, path) = self.cloud_target()?;
        let text = match store.reads(&path).await {
            Ok(text) => text,
            Err(err) if err.is_not_found() => {
                info!("cloud {path} does not exist yet");
                self.cloud_changed = true;
                return Ok(CloudState::missing());
            }
            Err(err) => return Err(SyncError::store(format!("reading cloud {path}"), err)),
        };
        let actions = parse_cloud(&text).map_err(|e| SyncError::parse("cloud stream", e))?;
        debug!("loaded {} cloud actions from {path}", actions.len());
        Ok(CloudState {
            actions,
            existed: true,
        })
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    fn has_history_after(&self, time: u64) -> bool {
        self.hoard.history().iter().any(|entry| entry.redo.time() > time)
    }

    /// Fold unseen cloud actions into the client and compute the stream the
    /// cloud should hold afterwards.
    ///
    /// One bad action never blocks the rest: conflicts and UI failures are
    /// reported to `options.progress` and replay continues.
    pub async fn update_from_cloud(&mut self, options: UpdateOptions<'_>) -> SyncResult<UpdateReport> {
        let progress = options.progress;
        let cloud = match options.cloud_actions {
            Some(actions) => actions,
            None => self.load_cloud().await?.actions,
        };

        // Actions replayed by an earlier round whose cloud save failed are
        // already in the tree, whatever their time.
        let mut new_cloud = Vec::with_capacity(cloud.len());
        let mut new_client = Vec::new();
        for action in cloud {
            let seen = action.time() <= self.last_sync
                || self.replayed.iter().any(|done| done.is_duplicate_of(&action));
            if seen {
                new_cloud.push(action);
            } else {
                new_client.push(action);
            }
        }

        // Local edits not yet pushed.
        let mut pending = 0;
        for entry in self.hoard.history() {
            if entry.redo.time() > self.last_sync {
                new_cloud.push(entry.redo.clone());
                pending += 1;
            }
        }

        // A previous cloud save may have succeeded without the client save
        // that records it; our own edits then come back as "new".
        new_client.retain(|action| {
            !self
                .hoard
                .history()
                .iter()
                .any(|entry| entry.redo.is_duplicate_of(action))
        });

        debug!(
            "reconciling: {} known, {} local pending, {} incoming",
            new_cloud.len() - pending,
            pending,
            new_client.len()
        );

        let selected = match options.selector {
            Some(selector) if !new_client.is_empty() && !self.client_is_empty => {
                selector.select(new_client).await
            }
            _ => new_client,
        };

        let mut report = UpdateReport::default();
        let mut latest = 0;
        for action in selected {
            new_cloud.push(action.clone());
            self.replayed.push(action.clone());
            match self
                .hoard
                .play_action(&action, PlayOptions::replay(), &mut |_| {})
            {
                Ok(()) => {
                    trace!("merged {action}");
                    report.applied += 1;
                    latest = latest.max(action.time());
                    if let Some(ui) = options.ui_player {
                        if let Err(err) = ui.play(&action).await {
                            progress.warning(&format!("Display of {action} failed: {err}"));
                        }
                    }
                }
                Err(conflict) => {
                    warn!("cloud conflict: {conflict}");
                    progress.warning(&format!(
                        "{}: {}",
                        action.verbose(&*self.translator),
                        conflict.message()
                    ));
                    report.conflicts.push(conflict);
                }
            }
        }

        if self.client_is_empty {
            self.last_sync = now_millis().max(latest);
            self.client_is_empty = false;
        } else if report.applied > 0 {
            self.last_sync = now_millis().max(latest);
            self.client_changes
                .push(format!("Merged {} change(s) from the cloud", report.applied));
        }

        info!(
            "reconciled with cloud: {} applied, {} conflicts",
            report.applied,
            report.conflicts.len()
        );
        report.new_cloud = new_cloud;
        Ok(report)
    }

    // =========================================================================
    // Saving
    // =========================================================================

    /// Write `actions` as the cloud stream.
    pub async fn save_cloud(&self, actions: &[Action]) -> SyncResult<()> {
        let (store, path) = self.cloud_target()?;
        let json = encode_cloud(actions).map_err(|e| SyncError::parse("cloud stream", e))?;
        store
            .writes(&path, &json)
            .await
            .map_err(|e| SyncError::store(format!("writing cloud {path}"), e))?;
        info!("saved {} actions to cloud {path}", actions.len());
        Ok(())
    }

    /// Write the client blob and mark it saved.
    pub async fn save_client(&mut self) -> SyncResult<()> {
        let now = now_millis();
        let json = ClientBlobRef {
            cloud_path: self.cloud_path.as_deref(),
            image_url: self.image_url.as_deref(),
            last_sync: self.last_sync,
            last_save: now,
            hoard: &self.hoard,
            replayed: &self.replayed,
        }
        .to_json()
        .map_err(|e| SyncError::parse("client hoard", e))?;

        self.client_store
            .writes(&self.client_key, &json)
            .await
            .map_err(|e| SyncError::store(format!("writing client {}", self.client_key), e))?;
        self.last_save = now;
        self.client_changes.clear();
        info!("saved client hoard to {}", self.client_key);
        Ok(())
    }

    /// Reconcile and save the cloud, then the client, as needed.
    ///
    /// Never fails outright: each failure is reported to the progress sink
    /// and listed in the returned report. Undo history is cleared only when
    /// everything saved.
    pub async fn save_stores(&mut self, options: SaveOptions<'_>) -> SaveReport {
        let progress = options.progress;
        let mut report = SaveReport::default();

        let cloud_needs = options.force_cloud
            || self.cloud_changed
            || self.client_is_empty
            || self.has_history_after(self.last_sync);
        let client_needs =
            cloud_needs || !self.client_changes.is_empty() || self.has_history_after(self.last_save);

        if !cloud_needs && !client_needs {
            progress.notice("No changes to save");
            return report;
        }

        if cloud_needs {
            match self.push_cloud(&options).await {
                Ok(update) => {
                    report.cloud_saved = true;
                    report.merged = update.applied;
                    report.conflicts = update.conflicts;
                    progress.notice("Saved cloud");
                }
                Err(err) => {
                    let message = format!("Cloud save failed: {err}");
                    progress.error(&message);
                    report.errors.push(message);
                }
            }
        }

        if client_needs {
            match self.save_client().await {
                Ok(()) => {
                    report.client_saved = true;
                    progress.notice("Saved client");
                }
                Err(err) => {
                    let message = format!("Client save failed: {err}");
                    progress.error(&message);
                    report.errors.push(message);
                }
            }
        }

        if report.is_success() {
            self.hoard.clear_history();
        }
        report
    }

    /// Reconcile then write the cloud. On failure the sync point is rolled
    /// back so pending local edits are pushed next time; the cloud actions
    /// replayed meanwhile stay listed so they are not replayed again.
    async fn push_cloud(&mut self, options: &SaveOptions<'_>) -> SyncResult<UpdateReport> {
        let prior_sync = self.last_sync;
        let prior_empty = self.client_is_empty;

        let update = self
            .update_from_cloud(UpdateOptions {
                cloud_actions: None,
                selector: options.selector,
                ui_player: options.ui_player,
                progress: options.progress,
            })
            .await;
        let update = match update {
            Ok(update) => update,
            Err(err) => {
                self.last_sync = prior_sync;
                self.client_is_empty = prior_empty;
                return Err(err);
            }
        };

        if let Err(err) = self.save_cloud(&update.new_cloud).await {
            self.last_sync = prior_sync;
            self.client_is_empty = prior_empty;
            return Err(err);
        }

        let latest = update.new_cloud.iter().map(Action::time).max().unwrap_or(0);
        self.last_sync = now_millis().max(latest);
        self.cloud_changed = false;
        self.replayed.clear();
        Ok(update)
    }
}
