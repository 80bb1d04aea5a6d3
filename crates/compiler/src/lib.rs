//! Lethe compiler front-end library.
//!
//! Pipeline: [`token_stream`] lexes and expands token macros, [`parser`]
//! builds an [`ast`]/[`scope`] graph, [`resolver`] and [`template`] run to
//! a fixed point, [`constfold`] and [`codegen`] lower the resolved tree
//! into a [`compiled_program::CompiledProgram`]. [`compiler::Compiler`] is
//! the public entry point tying the pipeline together.

pub mod ast;
pub mod codegen;
pub mod compiled_program;
pub mod compiler;
pub mod config;
pub mod constfold;
pub mod errors;
pub mod lexer;
pub mod number;
pub mod parser;
pub mod resolver;
pub mod scope;
pub mod template;
pub mod token;
pub mod token_stream;
pub mod types;

pub use compiled_program::CompiledProgram;
pub use compiler::Compiler;
pub use config::CompilerConfig;
pub use errors::{CompileError, CompileWarning, ErrorHandler, WarningId};
pub use parser::Parser;
