//! Inbound synchronization (bucket -> local directory)
//!
//! Paginated listing with a resumable cursor, per-object change detection
//! and staged local writes. Overlapping runs on one synchronizer are no-ops.

mod checkpoint;
mod inbound;

pub use checkpoint::SyncCheckpoint;
pub use inbound::{InboundSynchronizer, SyncOutcome, SyncReport};
