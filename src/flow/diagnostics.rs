//! Non-fatal diagnostic reporting for graph construction.
//!
//! Lowering failures on exotic input must degrade gracefully: top-level construction
//! contains them, records a [`Diagnostic`] in the caller-provided [`DiagnosticSink`] and
//! yields no graph instead of propagating. The sink is a lock-free append-only list, so
//! concurrent constructions can share one sink without synchronization of their own.
//!
//! [`AnalysisOptions`] bundles the sink with the cooperative
//! [`CancellationToken`](crate::CancellationToken) observed during lowering.

use std::sync::Arc;

use crate::operation::OperationId;
use crate::utils::synchronization::CancellationToken;
use crate::Error;

/// The severity of a reported diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// An observation that does not affect the produced graph.
    Warning,
    /// A contained failure; the affected unit has no graph available.
    Error,
}

/// One non-fatal diagnostic event recorded during graph construction.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    severity: Severity,
    message: String,
    operation: Option<OperationId>,
}

impl Diagnostic {
    /// Creates a diagnostic with the given severity and message.
    #[must_use]
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            operation: None,
        }
    }

    /// Attaches the operation the diagnostic refers to.
    #[must_use]
    pub fn with_operation(mut self, operation: OperationId) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Creates the diagnostic recorded when a lowering failure is contained.
    pub(crate) fn contained_failure(error: &Error, operation: OperationId) -> Self {
        Self::new(
            Severity::Error,
            format!("no control flow graph produced: {error}"),
        )
        .with_operation(operation)
    }

    /// Returns the severity of this diagnostic.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }

    /// Returns the human-readable message of this diagnostic.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the operation this diagnostic refers to, if recorded.
    #[must_use]
    pub const fn operation(&self) -> Option<OperationId> {
        self.operation
    }
}

/// A lock-free, append-only collection of diagnostics.
///
/// Multiple threads constructing graphs may push into one sink concurrently; entries are
/// never removed or reordered.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    entries: boxcar::Vec<Diagnostic>,
}

impl DiagnosticSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: boxcar::Vec::new(),
        }
    }

    /// Appends a diagnostic to the sink.
    pub fn push(&self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    /// Returns the number of recorded diagnostics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.count()
    }

    /// Returns `true` if no diagnostics have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns an iterator over the recorded diagnostics.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().map(|(_, diagnostic)| diagnostic)
    }
}

/// Options controlling one graph construction: the cancellation token observed during
/// lowering and the sink contained failures are reported to.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use flowscope::flow::{AnalysisOptions, DiagnosticSink};
/// use flowscope::CancellationToken;
///
/// let sink = Arc::new(DiagnosticSink::new());
/// let options = AnalysisOptions::new()
///     .with_cancellation(CancellationToken::new())
///     .with_diagnostics(Arc::clone(&sink));
/// assert!(!options.cancellation().is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct AnalysisOptions {
    cancellation: CancellationToken,
    diagnostics: Arc<DiagnosticSink>,
}

impl AnalysisOptions {
    /// Creates options with a fresh token and a private sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Replaces the diagnostic sink.
    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: Arc<DiagnosticSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Returns the cancellation token observed during lowering.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns the sink contained failures are reported to.
    #[must_use]
    pub fn diagnostics(&self) -> &Arc<DiagnosticSink> {
        &self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_sink_starts_empty() {
        let sink = DiagnosticSink::new();
        assert!(sink.is_empty());
        assert_eq!(sink.len(), 0);
    }

    #[test]
    fn test_push_and_iterate() {
        let sink = DiagnosticSink::new();
        sink.push(Diagnostic::new(Severity::Warning, "first"));
        sink.push(
            Diagnostic::new(Severity::Error, "second").with_operation(OperationId::new(3)),
        );

        assert_eq!(sink.len(), 2);
        let messages: Vec<_> = sink.iter().map(Diagnostic::message).collect();
        assert!(messages.contains(&"first"));
        assert!(messages.contains(&"second"));

        let with_operation = sink
            .iter()
            .find(|d| d.operation() == Some(OperationId::new(3)))
            .unwrap();
        assert_eq!(with_operation.severity(), Severity::Error);
    }

    #[test]
    fn test_concurrent_push() {
        let sink = Arc::new(DiagnosticSink::new());
        let mut handles = Vec::new();
        for worker in 0..4 {
            let sink = Arc::clone(&sink);
            handles.push(thread::spawn(move || {
                for index in 0..50 {
                    sink.push(Diagnostic::new(
                        Severity::Warning,
                        format!("worker {worker} entry {index}"),
                    ));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(sink.len(), 200);
    }
}
