//! Compiler error and warning types
//!
//! One error enum for every phase, using a hand-rolled manual
//! `Display`/`std::error::Error` impl rather than pulling in `thiserror`.
//! Top-level driver functions still collapse everything to
//! `Result<T, String>` at the API boundary, since callers just want one
//! message.

use std::fmt;

/// `file:line:column`, round-trips through `#line` directives.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub file: String,
    pub line: i32,
    pub column: i32,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: i32, column: i32) -> Self {
        SourceLocation {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Stable warning ids, so host tooling can filter by number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningId {
    Generic,
    Unreferenced,
    ConvPrecision,
    MissingOverride,
    PrivProtInherit,
    NoinitSmall,
    Shadow,
    Overflow,
    NrvoPrevented,
    Perf,
    Discard,
    DivByZero,
    SignedUnsignedComparison,
    OutOfOrderDesignatedInitializer,
    CompareBoolAndNumber,
    Deprecated,
}

impl WarningId {
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Inverse of `Display`, for config files that name warnings by their
    /// stable string id (e.g. `disabled_warnings = ["SHADOW"]`).
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "GENERIC" => WarningId::Generic,
            "UNREFERENCED" => WarningId::Unreferenced,
            "CONV_PRECISION" => WarningId::ConvPrecision,
            "MISSING_OVERRIDE" => WarningId::MissingOverride,
            "PRIV_PROT_INHERIT" => WarningId::PrivProtInherit,
            "NOINIT_SMALL" => WarningId::NoinitSmall,
            "SHADOW" => WarningId::Shadow,
            "OVERFLOW" => WarningId::Overflow,
            "NRVO_PREVENTED" => WarningId::NrvoPrevented,
            "PERF" => WarningId::Perf,
            "DISCARD" => WarningId::Discard,
            "DIV_BY_ZERO" => WarningId::DivByZero,
            "SIGNED_UNSIGNED_COMPARISON" => WarningId::SignedUnsignedComparison,
            "OUT_OF_ORDER_DESIGNATED_INITIALIZER" => WarningId::OutOfOrderDesignatedInitializer,
            "COMPARE_BOOL_AND_NUMBER" => WarningId::CompareBoolAndNumber,
            "DEPRECATED" => WarningId::Deprecated,
            _ => return None,
        })
    }
}

impl fmt::Display for WarningId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WarningId::Generic => "GENERIC",
            WarningId::Unreferenced => "UNREFERENCED",
            WarningId::ConvPrecision => "CONV_PRECISION",
            WarningId::MissingOverride => "MISSING_OVERRIDE",
            WarningId::PrivProtInherit => "PRIV_PROT_INHERIT",
            WarningId::NoinitSmall => "NOINIT_SMALL",
            WarningId::Shadow => "SHADOW",
            WarningId::Overflow => "OVERFLOW",
            WarningId::NrvoPrevented => "NRVO_PREVENTED",
            WarningId::Perf => "PERF",
            WarningId::Discard => "DISCARD",
            WarningId::DivByZero => "DIV_BY_ZERO",
            WarningId::SignedUnsignedComparison => "SIGNED_UNSIGNED_COMPARISON",
            WarningId::OutOfOrderDesignatedInitializer => "OUT_OF_ORDER_DESIGNATED_INITIALIZER",
            WarningId::CompareBoolAndNumber => "COMPARE_BOOL_AND_NUMBER",
            WarningId::Deprecated => "DEPRECATED",
        };
        write!(f, "{name}")
    }
}

/// One compile-time diagnostic kind
#[derive(Debug)]
pub enum CompileError {
    Lex { message: String, loc: SourceLocation },
    Parse { message: String, loc: SourceLocation },
    Name { message: String, loc: SourceLocation },
    Type { message: String, loc: SourceLocation },
    Template { message: String, loc: SourceLocation },
    Codegen { message: String, loc: SourceLocation },
}

impl CompileError {
    pub fn location(&self) -> &SourceLocation {
        match self {
            CompileError::Lex { loc, .. }
            | CompileError::Parse { loc, .. }
            | CompileError::Name { loc, .. }
            | CompileError::Type { loc, .. }
            | CompileError::Template { loc, .. }
            | CompileError::Codegen { loc, .. } => loc,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CompileError::Lex { message, .. }
            | CompileError::Parse { message, .. }
            | CompileError::Name { message, .. }
            | CompileError::Type { message, .. }
            | CompileError::Template { message, .. }
            | CompileError::Codegen { message, .. } => message,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location(), self.message())
    }
}

impl std::error::Error for CompileError {}

/// A warning with a stable id, used by `ErrorHandler::on_warning`.
#[derive(Debug, Clone)]
pub struct CompileWarning {
    pub id: WarningId,
    pub message: String,
    pub loc: SourceLocation,
}

impl fmt::Display for CompileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: warning[{}]: {}", self.loc, self.id, self.message)
    }
}

/// Event delegates a `Compiler` drives. Implementors collect
/// diagnostics; the default `CollectingErrorHandler` just buffers them.
pub trait ErrorHandler {
    fn on_error(&mut self, err: CompileError);
    fn on_warning(&mut self, warn: CompileWarning);
    fn on_compile(&mut self, _filename: &str) {}
    fn on_resolve(&mut self, _steps: u32) {}

    /// True while speculative parsing is suppressing error emission.
    /// Implementors that don't support recovery can leave this at the
    /// default.
    fn nofail_depth(&self) -> u32 {
        0
    }
}

/// Default collector: buffers everything, used by tests and the CLI.
#[derive(Default)]
pub struct CollectingErrorHandler {
    pub errors: Vec<CompileError>,
    pub warnings: Vec<CompileWarning>,
    nofail: u32,
}

impl CollectingErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Suppress error emission for the duration of `f`, returning its
    /// result. Used for disambiguation-parse recovery: while `nofail > 0`
    /// the sink is suppressed and the caller re-issues the best diagnostic
    /// from whichever path progressed furthest.
    pub fn with_nofail<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.nofail += 1;
        let result = f(self);
        self.nofail -= 1;
        result
    }
}

impl ErrorHandler for CollectingErrorHandler {
    fn on_error(&mut self, err: CompileError) {
        if self.nofail == 0 {
            self.errors.push(err);
        }
    }

    fn on_warning(&mut self, warn: CompileWarning) {
        if self.nofail == 0 {
            self.warnings.push(warn);
        }
    }

    fn nofail_depth(&self) -> u32 {
        self.nofail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warning_ids_format_stably() {
        assert_eq!(WarningId::MissingOverride.to_string(), "MISSING_OVERRIDE");
        assert_eq!(WarningId::DivByZero.to_string(), "DIV_BY_ZERO");
    }

    #[test]
    fn nofail_suppresses_errors_during_speculative_parse() {
        let mut handler = CollectingErrorHandler::new();
        handler.with_nofail(|h| {
            h.on_error(CompileError::Parse {
                message: "speculative".into(),
                loc: SourceLocation::new("a.le", 1, 1),
            });
        });
        assert!(!handler.has_errors());

        handler.on_error(CompileError::Parse {
            message: "real".into(),
            loc: SourceLocation::new("a.le", 2, 1),
        });
        assert!(handler.has_errors());
    }

    #[test]
    fn location_display_format() {
        let loc = SourceLocation::new("foo.le", 10, 4);
        assert_eq!(loc.to_string(), "foo.le:10:4");
    }
}
