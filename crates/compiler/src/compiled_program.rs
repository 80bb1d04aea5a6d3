//! Aggregate compiled output
//!
//! Holds everything produced by a full compile: the uniqued type pool,
//! the constant pool, the name table, the instruction buffer codegen
//! appends to, and the collected diagnostics. This is the "What" a
//! [`crate::compiler::Compiler`] hands back to a caller once codegen
//! finishes.

use lethe_core::NameTable;
use serde::{Deserialize, Serialize};

use crate::ast::AstArena;
use crate::errors::{CompileError, CompileWarning};
use crate::scope::ScopeArena;
use crate::types::{DataTypeId, QDataType, TypePool};

/// One emitted instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: u32,
    pub operands: Vec<i64>,
}

/// One constant-pool entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Constant {
    Int(i64),
    UInt(u64),
    Double(f64),
    String(String),
    Name(String),
}

/// The flat, serializable slice of a [`CompiledProgram`] a host VM actually
/// needs to load: instructions, constants, and the elementary-type table.
/// The compiler-internal `AstArena`/`ScopeArena`/`TypePool` stay behind,
/// since they exist to drive codegen, not to be shipped to a runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BytecodeImage {
    pub instructions: Vec<Instruction>,
    pub constants: Vec<Constant>,
    pub elementary: Vec<QDataType>,
    pub type_count: usize,
}

#[derive(Debug, Default)]
pub struct CompiledProgram {
    pub types: TypePool,
    pub ast: AstArena,
    pub scopes: ScopeArena,
    pub names: NameTable,
    pub constants: Vec<Constant>,
    pub instructions: Vec<Instruction>,
    /// Elementary-type singletons, populated once at construction so
    /// codegen never has to re-intern `int`/`bool`/etc.
    pub elementary: Vec<QDataType>,
    pub errors: Vec<CompileError>,
    pub warnings: Vec<CompileWarning>,
}

impl CompiledProgram {
    pub fn new() -> Self {
        let types = TypePool::new();
        CompiledProgram {
            types,
            ast: AstArena::new(),
            scopes: ScopeArena::new(),
            names: NameTable::new(),
            constants: Vec::new(),
            instructions: Vec::new(),
            elementary: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn push_constant(&mut self, c: Constant) -> u32 {
        let idx = self.constants.len() as u32;
        self.constants.push(c);
        idx
    }

    pub fn emit(&mut self, opcode: u32, operands: Vec<i64>) -> usize {
        let idx = self.instructions.len();
        self.instructions.push(Instruction { opcode, operands });
        idx
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Looks up a composite type by name, for diagnostics and tests that
    /// need to assert on the shape of what got compiled.
    pub fn find_composite(&self, name: &str) -> Option<DataTypeId> {
        (0..self.types.len())
            .map(|i| DataTypeId(i as u32))
            .find(|&id| self.types.get(id).name == name)
    }

    /// Extracts the portion of this program a host VM would persist and
    /// load, leaving the compiler-internal arenas behind.
    pub fn bytecode_image(&self) -> BytecodeImage {
        BytecodeImage {
            instructions: self.instructions.clone(),
            constants: self.constants.clone(),
            elementary: self.elementary.clone(),
            type_count: self.type_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_program_has_elementary_types_preinterned() {
        let program = CompiledProgram::new();
        assert!(program.type_count() >= 15);
    }

    #[test]
    fn emit_returns_sequential_indices() {
        let mut program = CompiledProgram::new();
        let a = program.emit(1, vec![]);
        let b = program.emit(2, vec![1, 2]);
        assert_eq!(a, 0);
        assert_eq!(b, 1);
    }

    #[test]
    fn push_constant_returns_stable_index() {
        let mut program = CompiledProgram::new();
        let idx = program.push_constant(Constant::Int(42));
        match &program.constants[idx as usize] {
            Constant::Int(v) => assert_eq!(*v, 42),
            _ => panic!("wrong constant kind"),
        }
    }

    #[test]
    fn bytecode_image_round_trips_through_bincode() {
        let mut program = CompiledProgram::new();
        program.push_constant(Constant::Int(7));
        program.emit(1, vec![7]);

        let image = program.bytecode_image();
        let bytes = bincode::serialize(&image).unwrap();
        let restored: BytecodeImage = bincode::deserialize(&bytes).unwrap();

        assert_eq!(restored.instructions.len(), 1);
        assert_eq!(restored.constants.len(), 1);
        assert_eq!(restored.type_count, image.type_count);
    }
}
