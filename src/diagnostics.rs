//! Staged diagnostics shared by every pipeline phase.
//!
//! The collector is append-only: phases report what they see and keep
//! going, and the driver decides at stage boundaries whether to stop.

/// A position in the source text. Lines and columns are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLoc {
    pub line: u32,
    pub col: u32,
}

impl SourceLoc {
    pub fn new(line: u32, col: u32) -> Self {
        SourceLoc { line, col }
    }

    /// Location for synthetic instructions (entry call, final halt).
    pub fn synthetic() -> Self {
        SourceLoc { line: 1, col: 1 }
    }
}

impl std::fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Pipeline stage a diagnostic originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Lexer,
    Parser,
    TypeChecker,
    Runtime,
}

impl Stage {
    fn label(self) -> &'static str {
        match self {
            Stage::Lexer => "LEXER",
            Stage::Parser => "PARSE",
            Stage::TypeChecker => "TYPE",
            Stage::Runtime => "RUNTIME",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub stage: Stage,
    pub severity: Severity,
    pub message: String,
    pub loc: SourceLoc,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
        };
        write!(
            f,
            "{} {}: {} [{}]",
            self.stage.label(),
            kind,
            self.message,
            self.loc
        )
    }
}

/// Append-only diagnostic collector. Duplicates are not deduplicated.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics {
            entries: Vec::new(),
        }
    }

    pub fn error(&mut self, stage: Stage, loc: SourceLoc, message: impl Into<String>) {
        self.entries.push(Diagnostic {
            stage,
            severity: Severity::Error,
            message: message.into(),
            loc,
        });
    }

    pub fn warning(&mut self, stage: Stage, loc: SourceLoc, message: impl Into<String>) {
        self.entries.push(Diagnostic {
            stage,
            severity: Severity::Warning,
            message: message.into(),
            loc,
        });
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn error_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.severity == Severity::Error)
    }

    /// True if any *error* came from the given stage.
    pub fn has_errors_from(&self, stage: Stage) -> bool {
        self.entries
            .iter()
            .any(|d| d.severity == Severity::Error && d.stage == stage)
    }

    /// Render every diagnostic to stderr, tagged with the source file.
    pub fn print_all(&self, filename: &str) {
        for d in &self.entries {
            eprintln!(
                "{} {}: {} [{}:{}]",
                d.stage.label(),
                match d.severity {
                    Severity::Error => "ERROR",
                    Severity::Warning => "WARNING",
                },
                d.message,
                filename,
                d.loc
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_is_append_only() {
        let mut diags = Diagnostics::new();
        diags.error(Stage::Parser, SourceLoc::new(1, 2), "first");
        diags.error(Stage::Parser, SourceLoc::new(1, 2), "first");
        diags.warning(Stage::TypeChecker, SourceLoc::new(3, 4), "second");

        // Duplicates are kept.
        assert_eq!(diags.entries().len(), 3);
        assert_eq!(diags.error_count(), 2);
        assert!(diags.has_errors());
    }

    #[test]
    fn test_has_errors_ignores_warnings() {
        let mut diags = Diagnostics::new();
        diags.warning(Stage::Lexer, SourceLoc::new(1, 1), "odd but fine");
        assert!(!diags.has_errors());
        assert_eq!(diags.error_count(), 0);
    }

    #[test]
    fn test_has_errors_from_stage() {
        let mut diags = Diagnostics::new();
        diags.error(Stage::TypeChecker, SourceLoc::new(2, 1), "mismatch");
        assert!(diags.has_errors_from(Stage::TypeChecker));
        assert!(!diags.has_errors_from(Stage::Parser));
    }

    #[test]
    fn test_display_format() {
        let d = Diagnostic {
            stage: Stage::Runtime,
            severity: Severity::Error,
            message: "division by zero".to_string(),
            loc: SourceLoc::new(7, 12),
        };
        assert_eq!(d.to_string(), "RUNTIME ERROR: division by zero [7:12]");
    }
}
