//! Persisted shapes for the client and cloud replicas.

use serde::{Deserialize, Serialize};
use squirrel_hoard::{Action, Hoard, PlayOptions};
use tracing::warn;

/// Everything the client replica keeps between sessions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientBlob {
    #[serde(default)]
    pub cloud_path: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    /// Epoch ms of the last successful cloud reconciliation.
    #[serde(default)]
    pub last_sync: u64,
    /// Epoch ms of the last successful client save.
    #[serde(default)]
    pub last_save: u64,
    pub hoard: Hoard,
    /// Cloud actions already in the tree that the cloud has not yet been
    /// rewritten to include.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replayed: Vec<Action>,
}

impl ClientBlob {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Borrowed form of [`ClientBlob`] used when saving.
#[derive(Serialize)]
pub(crate) struct ClientBlobRef<'a> {
    pub cloud_path: Option<&'a str>,
    pub image_url: Option<&'a str>,
    pub last_sync: u64,
    pub last_save: u64,
    pub hoard: &'a Hoard,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub replayed: &'a [Action],
}

impl ClientBlobRef<'_> {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// The cloud blob is a bare action array; early versions wrapped it.
#[derive(Deserialize)]
#[serde(untagged)]
enum CloudBlob {
    Actions(Vec<Action>),
    Wrapped { actions: Vec<Action> },
}

/// Decode a cloud blob. Blank text is an empty stream.
pub fn parse_cloud(text: &str) -> Result<Vec<Action>, serde_json::Error> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(match serde_json::from_str(text)? {
        CloudBlob::Actions(actions) | CloudBlob::Wrapped { actions } => actions,
    })
}

/// Encode a cloud action stream in the current (bare array) form.
pub fn encode_cloud(actions: &[Action]) -> Result<String, serde_json::Error> {
    serde_json::to_string(actions)
}

/// The cloud stream as loaded.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CloudState {
    pub actions: Vec<Action>,
    /// False when the cloud resource did not exist yet.
    pub existed: bool,
}

impl CloudState {
    pub fn missing() -> Self {
        Self::default()
    }

    /// Replay the stream into a fresh hoard. Conflicts are logged and skipped.
    pub fn to_hoard(&self) -> Hoard {
        let mut hoard = Hoard::new();
        let conflicts = hoard.play_actions(&self.actions, PlayOptions::replay(), &mut |_| {});
        for conflict in conflicts {
            warn!("cloud replay: {conflict}");
        }
        hoard
    }
}
