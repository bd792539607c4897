//! sealtree-sync: keeps an encrypted mirror tree in step with a plaintext source tree

pub mod engine;
pub mod rebuild;
pub mod refresh;
pub mod scheduler;
pub mod watcher;

pub use engine::{sync_tree, FailureStage, FileFailure, SyncOptions, SyncReport};
pub use rebuild::Rebuilder;
pub use refresh::{
    refresh_all, refresh_secret, ItemSource, JsonFileSource, RefreshOutcome, RefreshTarget,
};
pub use scheduler::debounce_loop;
pub use watcher::{watch_root, ChangeWatcher, WatchFilter};
