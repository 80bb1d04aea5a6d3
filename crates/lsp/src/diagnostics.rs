//! Translates `Compiler` errors/warnings into LSP diagnostics by running a
//! full `compile` + `resolve` pass over the buffer, so name/type errors
//! surface alongside syntax errors.

use lethe_core::GlobalCounter;
use lethec::compiler::Compiler;
use lethec::config::CompilerConfig;
use lethec::errors::{CompileError, CompileWarning};
use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, Position, Range};

/// Compiles `source` standalone and returns one diagnostic per error and
/// warning. `SourceLocation` is 1-based; clamped to 0 before handing it to
/// the (0-based) LSP `Position`.
pub fn check_document(source: &str) -> Vec<Diagnostic> {
    let mut compiler = Compiler::new(CompilerConfig::new(), GlobalCounter::new());
    compiler.compile(source, "buffer.le");
    compiler.resolve(true);

    let mut diagnostics: Vec<Diagnostic> = compiler
        .take_errors()
        .into_iter()
        .map(error_diagnostic)
        .collect();
    diagnostics.extend(compiler.take_warnings().into_iter().map(warning_diagnostic));
    diagnostics
}

fn point(line: i32, column: i32) -> Position {
    Position {
        line: line.saturating_sub(1).max(0) as u32,
        character: column.saturating_sub(1).max(0) as u32,
    }
}

fn error_diagnostic(err: CompileError) -> Diagnostic {
    let loc = err.location().clone();
    let message = err.message().to_string();
    Diagnostic {
        range: Range {
            start: point(loc.line, loc.column),
            end: point(loc.line, loc.column + 1),
        },
        severity: Some(DiagnosticSeverity::ERROR),
        source: Some("lethec".to_string()),
        message,
        ..Default::default()
    }
}

fn warning_diagnostic(warn: CompileWarning) -> Diagnostic {
    Diagnostic {
        range: Range {
            start: point(warn.loc.line, warn.loc.column),
            end: point(warn.loc.line, warn.loc.column + 1),
        },
        severity: Some(DiagnosticSeverity::WARNING),
        source: Some("lethec".to_string()),
        message: warn.message,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_has_no_diagnostics() {
        assert!(check_document("").is_empty());
    }
}
