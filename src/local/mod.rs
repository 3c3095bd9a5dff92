//! Local side of the mirror: path resolution, staged writes, file events

pub mod events;
pub mod paths;
pub mod writer;

pub use events::{FileEventListener, FileOperation, ListenerSet, LocalFileEvent, LoggingListener};
pub use paths::{resolve, resolve_and_create, ResolvedPath};
pub use writer::{FsOps, Finalization, LocalFileWriter, StdFs, WriteOutcome};
