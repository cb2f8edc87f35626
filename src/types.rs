use serde::{Deserialize, Serialize};

/// Diagnostic severity as reported by the analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Style,
    Info,
}

impl Severity {
    /// Map an analyzer severity string; unknown strings become `Info`
    pub fn parse(s: &str) -> Self {
        match s {
            "error" => Self::Error,
            "warning" => Self::Warning,
            "style" | "performance" | "portability" => Self::Style,
            _ => Self::Info,
        }
    }
}

/// A single MISRA diagnostic with file location
///
/// Immutable once extracted. Identity is `(file, line, rule_id)`;
/// duplicate diagnostics on that key collapse at extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// File path the diagnostic refers to
    pub file: String,
    /// Line number (1-indexed)
    pub line: u32,
    /// Column number (1-indexed, 0 when unknown)
    pub column: u32,
    /// Analyzer rule id, e.g. `misra-c2012-8.4`
    pub rule_id: String,
    /// Diagnostic severity
    pub severity: Severity,
    /// Human-readable diagnostic text
    pub message: String,
}

impl Violation {
    /// Identity key: duplicates on this key collapse to one record
    pub fn key(&self) -> (&str, u32, &str) {
        (&self.file, self.line, &self.rule_id)
    }
}

/// Bounded slice of source supplied to the model as repair context
///
/// Derived data: recomputed per attempt, never persisted past the task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextWindow {
    pub file: String,
    /// First line covered (1-indexed, inclusive)
    pub start_line: u32,
    /// Last line covered (inclusive)
    pub end_line: u32,
    pub text: String,
}

/// Outcome of semantically validating a generated patch
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// The patch applied cleanly to the snapshot
    pub patch_applied: bool,
    /// The target violation no longer shows up after re-analysis
    pub violation_resolved: bool,
    /// Violations present after the patch that were not in the baseline
    pub new_violations: Vec<Violation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_parse() {
        assert_eq!(Severity::parse("error"), Severity::Error);
        assert_eq!(Severity::parse("performance"), Severity::Style);
        assert_eq!(Severity::parse("whatever"), Severity::Info);
    }

    #[test]
    fn test_violation_key_ignores_column_and_message() {
        let a = Violation {
            file: "a.c".into(),
            line: 10,
            column: 5,
            rule_id: "misra-c2012-8.4".into(),
            severity: Severity::Style,
            message: "first".into(),
        };
        let b = Violation {
            column: 9,
            message: "second".into(),
            ..a.clone()
        };
        assert_eq!(a.key(), b.key());
    }
}
