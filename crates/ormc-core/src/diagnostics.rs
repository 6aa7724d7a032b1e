//! Side-channel for human-readable diagnostics.
//!
//! Validation and planning report every problem they find to a
//! [`DiagnosticSink`] and then return a single summarizing error, so callers
//! get both a matchable result and the full list of messages.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::id::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub location: Location,
    pub message: String,
}

/// Collects diagnostics in report order.
#[derive(Debug, Default, Clone)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a model error as an error diagnostic.
    pub fn report(&mut self, err: &ModelError) {
        tracing::debug!(%err, "model diagnostic");
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            location: err.location().cloned().unwrap_or_default(),
            message: err.to_string(),
        });
    }

    pub fn warn(&mut self, location: &Location, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            location: location.clone(),
            message: message.into(),
        });
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Returns `Err(ModelError::Invalid)` if any error was reported.
    pub fn finish(&self) -> Result<(), ModelError> {
        match self.error_count() {
            0 => Ok(()),
            count => Err(ModelError::Invalid { count }),
        }
    }
}
