//! Keeping the local replica in step with the calendar server.

mod coordinator;
mod diff;
mod report;

pub use coordinator::{SyncCoordinator, SyncOutcome};
pub use diff::{DiffKind, EntryDiff};
pub use report::{Diagnostic, DiagnosticKind, SyncReport};
