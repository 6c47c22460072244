//! Diagnostics collection for rewrite sessions.
//!
//! A rewrite can succeed while still carrying actionable facts - most notably
//! a configured mock that never matched any instruction, which usually means a
//! wrong expression or an unreachable call path. Those facts are collected
//! here rather than logged: the container is data, rendering is the caller's
//! concern.
//!
//! The [`Diagnostics`] container uses `boxcar::Vec` for lock-free append, so
//! entries can be recorded from any stage of the pipeline without
//! synchronization overhead.

use std::fmt;

/// Severity of a diagnostic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum DiagnosticSeverity {
    /// Informational
    Info,
    /// Actionable but non-fatal
    Warning,
    /// An error that was tolerated in a lenient path
    Error,
}

/// Pipeline stage a diagnostic originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum DiagnosticCategory {
    /// Expression resolution
    Resolution,
    /// Instruction matching and injection
    Rewrite,
    /// Cross-unit reconciliation
    CrossUnit,
    /// Serialization and loading
    Materialization,
}

/// One diagnostic entry.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity level
    pub severity: DiagnosticSeverity,
    /// Originating stage
    pub category: DiagnosticCategory,
    /// Human-readable message
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.category, self.message)
    }
}

/// Thread-safe, append-only container of diagnostics for one session.
#[derive(Default)]
pub struct Diagnostics {
    entries: boxcar::Vec<Diagnostic>,
}

impl Diagnostics {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an informational entry.
    pub fn info(&self, category: DiagnosticCategory, message: impl Into<String>) {
        self.push(DiagnosticSeverity::Info, category, message);
    }

    /// Records a warning.
    pub fn warning(&self, category: DiagnosticCategory, message: impl Into<String>) {
        self.push(DiagnosticSeverity::Warning, category, message);
    }

    /// Records a tolerated error.
    pub fn error(&self, category: DiagnosticCategory, message: impl Into<String>) {
        self.push(DiagnosticSeverity::Error, category, message);
    }

    fn push(
        &self,
        severity: DiagnosticSeverity,
        category: DiagnosticCategory,
        message: impl Into<String>,
    ) {
        self.entries.push(Diagnostic {
            severity,
            category,
            message: message.into(),
        });
    }

    /// Iterates over all recorded entries.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().map(|(_, entry)| entry)
    }

    /// Number of recorded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.count()
    }

    /// Returns true when nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.count() == 0
    }

    /// Returns true when at least one warning was recorded.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        self.iter()
            .any(|entry| entry.severity == DiagnosticSeverity::Warning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_entries() {
        let diagnostics = Diagnostics::new();
        diagnostics.warning(DiagnosticCategory::Rewrite, "mock never matched");
        diagnostics.info(DiagnosticCategory::Materialization, "2 fields appended");

        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics.has_warnings());
        let first = diagnostics.iter().next().unwrap();
        assert_eq!(first.category, DiagnosticCategory::Rewrite);
    }
}
