//! bucket-mirror - incremental object-store to local directory mirroring
//!
//! Lists a bucket prefix page by page with a resumable cursor, downloads
//! only objects whose content differs from the local copy, and writes each
//! file through a staging file so a partial download never appears under
//! its real name.

pub mod config;
pub mod detect;
pub mod error;
pub mod filter;
pub mod local;
pub mod remote;
pub mod sync;

pub use config::SyncConfig;
pub use error::{MirrorError, Result};
pub use filter::NameFilter;
pub use local::{FileEventListener, LocalFileEvent, LocalFileWriter};
pub use remote::{MemoryStore, RemoteStore};
pub use sync::{InboundSynchronizer, SyncCheckpoint, SyncOutcome, SyncReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
