//! NoteFS: folders and notes from SQLite, mounted as a POSIX tree
//!
//! One call flows one way through the layers:
//! - Note Drive (FUSE callbacks, inode <-> path, dispatch to the blocking pool)
//! - Adapter (POSIX semantics, open-file buffers, editor scratch files)
//! - Entity Store (one transaction per operation)
//!   - Path Resolver, History Tracker and Search Indexer run inside it

pub mod adapter;
pub mod clock;
pub mod config;
pub mod core;
pub mod drive;
pub mod error;
pub mod history;
pub mod resolver;
pub mod search;
pub mod storage;
pub mod store;

pub use adapter::{Adapter, Attr, Target};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Settings;
pub use drive::NoteDrive;
pub use error::{NoteFsError, Result};
pub use history::{HistoryRecord, MutationKind};
pub use search::SearchHit;
pub use storage::{EntityKind, EntityRef, Node};
pub use store::{EntityStore, Entry, Seed};
