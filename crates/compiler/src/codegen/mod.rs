//! Codegen driver

pub mod composite;
pub mod optimize;
pub mod program;
pub mod state;
pub mod vtbl;

pub use program::CodegenDriver;
pub use state::{ExprStack, Opcode};
pub use vtbl::Vtable;
