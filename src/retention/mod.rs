//! Retention Enforcement
//!
//! Removes audit partitions and consent records that have outlived the
//! retention window, honouring legal holds, and records every removal
//! back into the audit log.

pub mod holds;
pub mod policy;
pub mod sweeper;

pub use holds::LegalHolds;
pub use policy::{RetentionPolicy, DEFAULT_RETENTION_DAYS};
pub use sweeper::{CancelFlag, RetentionSweeper, SweepFailure, SweepPhase, SweepReport, SweptPartition};
