// Two-way merge and the sync engine driving discovery, sessions, and
// merges through a command/event interface.

pub mod engine;
pub mod error;
pub mod merge;

pub use engine::{
    spawn_engine, EngineCommand, EngineEvent, EngineHandle, ShareMode, ShareOutcome, SyncConfig,
    SyncStage,
};
pub use error::SyncError;
pub use merge::{apply_merge, merge_bookmarks, merge_collections, DuplicatePolicy, MergeConfig};
