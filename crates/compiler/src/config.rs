//! Compiler configuration
//!
//! `CompilerConfig` is the single knob surface a host passes into
//! [`crate::compiler::Compiler::open`]: lint/warning filtering, lexer
//! float-literal mode, recursion limits for the macro engine and parser,
//! and the native-function signatures a host VM provides beyond the
//! language's own builtins.
//!
//! Loaded from TOML via `serde`.

use serde::{Deserialize, Serialize};

use crate::errors::WarningId;
use crate::types::DataTypeKind;

/// A native function the host VM exposes to compiled scripts, with enough
/// type information for the resolver to check call sites against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeFunction {
    /// Name as it appears in Lethe source.
    pub name: String,
    pub params: Vec<DataTypeKind>,
    pub return_type: DataTypeKind,
}

impl NativeFunction {
    pub fn new(name: impl Into<String>, params: Vec<DataTypeKind>, return_type: DataTypeKind) -> Self {
        NativeFunction {
            name: name.into(),
            params,
            return_type,
        }
    }
}

/// Float literal parsing mode: whether a bare `1.0` without an
/// `f` suffix is `f32` or `f64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FloatLiteralMode {
    #[default]
    Double,
    Single,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Additional native functions the host VM provides, beyond what the
    /// language defines itself.
    #[serde(default)]
    pub native_functions: Vec<NativeFunction>,

    /// Warning ids to suppress entirely (never reach `ErrorHandler::on_warning`).
    #[serde(default)]
    pub disabled_warnings: Vec<WarningId>,

    /// Warning ids promoted to hard errors.
    #[serde(default)]
    pub warnings_as_errors: Vec<WarningId>,

    #[serde(default)]
    pub float_literal_mode: FloatLiteralMode,

    /// Maximum macro-expansion recursion depth before `LexError`.
    #[serde(default = "default_macro_depth")]
    pub max_macro_depth: u32,

    /// Maximum recursive-descent parser nesting depth before `ParseError`.
    #[serde(default = "default_parser_depth")]
    pub max_parser_depth: u32,
}

fn default_macro_depth() -> u32 {
    128
}

fn default_parser_depth() -> u32 {
    1024
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            native_functions: Vec::new(),
            disabled_warnings: Vec::new(),
            warnings_as_errors: Vec::new(),
            float_literal_mode: FloatLiteralMode::default(),
            max_macro_depth: default_macro_depth(),
            max_parser_depth: default_parser_depth(),
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_native_function(mut self, f: NativeFunction) -> Self {
        self.native_functions.push(f);
        self
    }

    pub fn is_warning_disabled(&self, id: WarningId) -> bool {
        self.disabled_warnings.contains(&id)
    }

    pub fn is_warning_error(&self, id: WarningId) -> bool {
        self.warnings_as_errors.contains(&id)
    }

    pub fn native_names(&self) -> Vec<&str> {
        self.native_functions.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn from_toml(src: &str) -> Result<Self, String> {
        toml::from_str(src).map_err(|e| format!("invalid compiler config: {e}"))
    }
}

impl Serialize for WarningId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for WarningId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        WarningId::from_name(&s).ok_or_else(|| serde::de::Error::custom(format!("unknown warning id '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_native_functions() {
        let config = CompilerConfig::new();
        assert!(config.native_functions.is_empty());
        assert_eq!(config.max_macro_depth, 128);
        assert_eq!(config.max_parser_depth, 1024);
    }

    #[test]
    fn builder_adds_native_function() {
        let config = CompilerConfig::new().with_native_function(NativeFunction::new(
            "host_log",
            vec![DataTypeKind::String],
            DataTypeKind::Void,
        ));
        assert_eq!(config.native_names(), vec!["host_log"]);
    }

    #[test]
    fn parses_from_toml() {
        let src = r#"
            max_macro_depth = 64
            disabled_warnings = ["SHADOW"]
        "#;
        let config = CompilerConfig::from_toml(src).expect("valid config");
        assert_eq!(config.max_macro_depth, 64);
        assert!(config.is_warning_disabled(WarningId::Shadow));
    }
}
