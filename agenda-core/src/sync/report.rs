//! What a sync cycle did, including the entries it had to skip.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiagnosticKind {
    /// The body could not be parsed; the entry is skipped
    Parse,
    /// Storing or removing the entry failed; its changes were discarded
    Storage,
    /// Requested from the server but not returned
    MissingBody,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::Parse => write!(f, "parse"),
            DiagnosticKind::Storage => write!(f, "storage"),
            DiagnosticKind::MissingBody => write!(f, "missing body"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub id: String,
    pub kind: DiagnosticKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Fetched entries not stored because they already started
    pub skipped_past: usize,
    pub diagnostics: Vec<Diagnostic>,
    /// False when a storage failure kept the change token from advancing
    pub token_persisted: bool,
}

impl SyncReport {
    pub fn diagnose(&mut self, id: &str, kind: DiagnosticKind, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            id: id.to_string(),
            kind,
            message: message.into(),
        });
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.diagnostics.iter().filter(|d| d.kind == kind).count()
    }

    /// A degraded cycle completed but skipped some entries.
    pub fn is_degraded(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    pub fn has_storage_failures(&self) -> bool {
        self.count(DiagnosticKind::Storage) > 0
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} removed, {} unchanged",
            self.created, self.updated, self.removed, self.unchanged
        )?;
        if self.skipped_past > 0 {
            write!(f, ", {} already past", self.skipped_past)?;
        }
        if self.is_degraded() {
            write!(f, ", {} skipped", self.diagnostics.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_mentions_skipped_entries() {
        let mut report = SyncReport {
            created: 1,
            ..Default::default()
        };
        assert_eq!(report.to_string(), "1 created, 0 updated, 0 removed, 0 unchanged");

        report.diagnose("bad.ics", DiagnosticKind::Parse, "No VEVENT component");
        report.skipped_past = 2;
        assert_eq!(
            report.to_string(),
            "1 created, 0 updated, 0 removed, 0 unchanged, 2 already past, 1 skipped"
        );
        assert!(report.is_degraded());
        assert!(!report.has_storage_failures());
    }
}
