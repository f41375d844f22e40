pub mod audit;
pub mod config;
pub mod consent;
pub mod error;
pub mod forwarding;
pub mod retention;

pub use audit::{AuditEvent, AuditLogger, EventFields, EventStatus, PartitionId};
pub use error::{AuditError, AuditResult};
pub use retention::{RetentionSweeper, SweepReport};
