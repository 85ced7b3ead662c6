//! Client/cloud synchronization for Squirrel hoards.
//!
//! [`Hoarder`] keeps a client [`Hoard`](squirrel_hoard::Hoard) in step with
//! a cloud action stream, reading and writing both through the [`Store`]
//! contract.

pub mod blob;
pub mod error;
pub mod hoarder;
pub mod progress;
pub mod store;

pub use blob::{ClientBlob, CloudState, encode_cloud, parse_cloud};
pub use error::{StoreError, StoreResult, SyncError, SyncResult};
pub use hoarder::{
    Hoarder, ReplicaState, SaveOptions, SaveReport, Selector, UiPlayer, UpdateOptions,
    UpdateReport,
};
pub use progress::{CollectingProgress, ProgressSink, Severity, TracingProgress};
pub use store::{LocalStore, MemoryStore, Store};
