//! Audit Log System
//!
//! Provides tamper-evident logging with SHA-256 hash chains over
//! day-partitioned, append-only storage.

pub mod entry;
pub mod logger;
pub mod partition;
pub mod query;
pub mod store;
pub mod tail;
pub mod verify;

pub use entry::{AuditEvent, EventFields, EventStatus, GENESIS_HASH};
pub use logger::{AuditLogger, RemovedPartition};
pub use partition::PartitionId;
pub use query::AuditQuery;
pub use store::{Disposition, FileStore, PartitionLock, PartitionStore};
pub use tail::TailStore;
pub use verify::{find_tampered_entries, verify_events, verify_partition_file, verify_records, VerificationReport};
