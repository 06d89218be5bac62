//! Diagnostics types and the push-fed cache.
//!
//! Servers publish diagnostics whenever they like; the cache only ever
//! holds the latest snapshot per document, and readers must treat it as
//! possibly stale between pushes.

use lsp_types::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

/// Severity of a server-emitted diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Information,
    Hint,
}

impl DiagnosticSeverity {
    pub fn label(&self) -> &'static str {
        match self {
            DiagnosticSeverity::Error => "error",
            DiagnosticSeverity::Warning => "warning",
            DiagnosticSeverity::Information => "info",
            DiagnosticSeverity::Hint => "hint",
        }
    }
}

impl From<lsp_types::DiagnosticSeverity> for DiagnosticSeverity {
    fn from(severity: lsp_types::DiagnosticSeverity) -> Self {
        match severity {
            lsp_types::DiagnosticSeverity::ERROR => DiagnosticSeverity::Error,
            lsp_types::DiagnosticSeverity::WARNING => DiagnosticSeverity::Warning,
            lsp_types::DiagnosticSeverity::HINT => DiagnosticSeverity::Hint,
            _ => DiagnosticSeverity::Information,
        }
    }
}

/// Severity filter accepted by the diagnostics operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeverityFilter {
    #[default]
    All,
    Only(DiagnosticSeverity),
}

impl SeverityFilter {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "all" => Some(SeverityFilter::All),
            "error" => Some(SeverityFilter::Only(DiagnosticSeverity::Error)),
            "warning" => Some(SeverityFilter::Only(DiagnosticSeverity::Warning)),
            "info" | "information" => Some(SeverityFilter::Only(DiagnosticSeverity::Information)),
            "hint" => Some(SeverityFilter::Only(DiagnosticSeverity::Hint)),
            _ => None,
        }
    }

    pub fn accepts(&self, severity: DiagnosticSeverity) -> bool {
        match self {
            SeverityFilter::All => true,
            SeverityFilter::Only(wanted) => *wanted == severity,
        }
    }
}

/// One diagnostic, positions already converted to the 1-based agent form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub line: u32,
    pub column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub severity: DiagnosticSeverity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub related: Vec<RelatedInformation>,
}

/// Pointer to a related location attached to a diagnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedInformation {
    pub path: PathBuf,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl Diagnostic {
    pub fn from_lsp(diagnostic: &lsp_types::Diagnostic) -> Self {
        let code = diagnostic.code.as_ref().map(|code| match code {
            lsp_types::NumberOrString::Number(n) => n.to_string(),
            lsp_types::NumberOrString::String(s) => s.clone(),
        });
        let related = diagnostic
            .related_information
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .map(|info| RelatedInformation {
                path: info.location.uri.to_file_path().unwrap_or_default(),
                line: info.location.range.start.line + 1,
                column: info.location.range.start.character + 1,
                message: info.message.clone(),
            })
            .collect();

        Self {
            line: diagnostic.range.start.line + 1,
            column: diagnostic.range.start.character + 1,
            end_line: diagnostic.range.end.line + 1,
            end_column: diagnostic.range.end.character + 1,
            severity: diagnostic
                .severity
                .map(DiagnosticSeverity::from)
                .unwrap_or(DiagnosticSeverity::Error),
            message: diagnostic.message.clone(),
            code,
            source: diagnostic.source.clone(),
            related,
        }
    }
}

/// Per-severity counts across the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSummary {
    pub errors: usize,
    pub warnings: usize,
    pub information: usize,
    pub hints: usize,
}

impl DiagnosticsSummary {
    pub fn total(&self) -> usize {
        self.errors + self.warnings + self.information + self.hints
    }
}

/// Process-wide diagnostics store. Wholly passive: clients push whole
/// replacement snapshots, the document manager clears a uri when its last
/// holder closes.
#[derive(Default)]
pub struct DiagnosticsCache {
    entries: RwLock<HashMap<Url, Vec<Diagnostic>>>,
}

impl DiagnosticsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored sequence for `uri`.
    pub fn update(&self, uri: Url, diagnostics: Vec<Diagnostic>) {
        self.entries.write().unwrap().insert(uri, diagnostics);
    }

    pub fn get(&self, uri: &Url) -> Vec<Diagnostic> {
        self.entries.read().unwrap().get(uri).cloned().unwrap_or_default()
    }

    pub fn clear_uri(&self, uri: &Url) {
        self.entries.write().unwrap().remove(uri);
    }

    pub fn clear_all(&self) {
        self.entries.write().unwrap().clear();
    }

    pub fn uris(&self) -> Vec<Url> {
        self.entries.read().unwrap().keys().cloned().collect()
    }

    pub fn total_count(&self) -> usize {
        self.entries.read().unwrap().values().map(Vec::len).sum()
    }

    pub fn summary(&self) -> DiagnosticsSummary {
        let mut summary = DiagnosticsSummary::default();
        for diagnostic in self.entries.read().unwrap().values().flatten() {
            match diagnostic.severity {
                DiagnosticSeverity::Error => summary.errors += 1,
                DiagnosticSeverity::Warning => summary.warnings += 1,
                DiagnosticSeverity::Information => summary.information += 1,
                DiagnosticSeverity::Hint => summary.hints += 1,
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diag(severity: DiagnosticSeverity, message: &str) -> Diagnostic {
        Diagnostic {
            line: 1,
            column: 1,
            end_line: 1,
            end_column: 2,
            severity,
            message: message.to_string(),
            code: None,
            source: None,
            related: Vec::new(),
        }
    }

    #[test]
    fn update_replaces_the_whole_sequence() {
        let cache = DiagnosticsCache::new();
        let uri = Url::parse("file:///proj/a.ts").unwrap();

        cache.update(
            uri.clone(),
            vec![diag(DiagnosticSeverity::Error, "A"), diag(DiagnosticSeverity::Warning, "B")],
        );
        assert_eq!(cache.get(&uri).len(), 2);

        cache.update(uri.clone(), vec![diag(DiagnosticSeverity::Warning, "C")]);
        let current = cache.get(&uri);
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].message, "C");

        let summary = cache.summary();
        assert_eq!(summary.errors, 0);
        assert_eq!(summary.warnings, 1);
        assert_eq!(summary.total(), 1);
    }

    #[test]
    fn clear_and_counts() {
        let cache = DiagnosticsCache::new();
        let a = Url::parse("file:///proj/a.rs").unwrap();
        let b = Url::parse("file:///proj/b.rs").unwrap();
        cache.update(a.clone(), vec![diag(DiagnosticSeverity::Error, "x")]);
        cache.update(b.clone(), vec![diag(DiagnosticSeverity::Hint, "y")]);

        assert_eq!(cache.total_count(), 2);
        assert_eq!(cache.uris().len(), 2);

        cache.clear_uri(&a);
        assert!(cache.get(&a).is_empty());
        assert_eq!(cache.total_count(), 1);

        cache.clear_all();
        assert_eq!(cache.total_count(), 0);
    }

    #[test]
    fn lsp_conversion_is_one_based() {
        let lsp = lsp_types::Diagnostic {
            range: lsp_types::Range {
                start: lsp_types::Position { line: 4, character: 2 },
                end: lsp_types::Position { line: 4, character: 9 },
            },
            severity: Some(lsp_types::DiagnosticSeverity::WARNING),
            code: Some(lsp_types::NumberOrString::Number(2304)),
            source: Some("ts".into()),
            message: "unused variable".into(),
            ..Default::default()
        };
        let converted = Diagnostic::from_lsp(&lsp);
        assert_eq!((converted.line, converted.column), (5, 3));
        assert_eq!((converted.end_line, converted.end_column), (5, 10));
        assert_eq!(converted.severity, DiagnosticSeverity::Warning);
        assert_eq!(converted.code.as_deref(), Some("2304"));
    }

    #[test]
    fn severity_filter_parsing() {
        assert_eq!(SeverityFilter::parse("all"), Some(SeverityFilter::All));
        assert_eq!(
            SeverityFilter::parse("error"),
            Some(SeverityFilter::Only(DiagnosticSeverity::Error))
        );
        assert!(SeverityFilter::parse("fatal").is_none());
        assert!(SeverityFilter::All.accepts(DiagnosticSeverity::Hint));
        assert!(!SeverityFilter::Only(DiagnosticSeverity::Error).accepts(DiagnosticSeverity::Hint));
    }
}
