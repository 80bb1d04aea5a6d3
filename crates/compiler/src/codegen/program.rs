//! `CodegenDriver`
//!
//! Runs the nine phases in the order lists them. Each phase
//! is one method; a phase that records an error still lets later,
//! independent phases run so the driver surfaces as many diagnostics as
//! possible in one pass.

use std::collections::HashMap;

use crate::ast::{AstFlags, AstNodeKind, ConstValue, NodeId};
use crate::compiled_program::{CompiledProgram, Constant};
use crate::constfold::{ConstFolder, TypeGenerator};
use crate::errors::ErrorHandler;
use crate::types::DataTypeKind;

use super::composite::CompositeCodegen;
use super::state::{ExprStack, Opcode};
use super::vtbl::VtblGenerator;

pub struct CodegenDriver<'a> {
    pub program: &'a mut CompiledProgram,
    pub errors: &'a mut dyn ErrorHandler,
    function_index: HashMap<NodeId, u32>,
    vtables: HashMap<crate::scope::ScopeId, super::vtbl::Vtable>,
}

impl<'a> CodegenDriver<'a> {
    pub fn new(program: &'a mut CompiledProgram, errors: &'a mut dyn ErrorHandler) -> Self {
        CodegenDriver {
            program,
            errors,
            function_index: HashMap::new(),
            vtables: HashMap::new(),
        }
    }

    /// Runs every phase in order. Returns `false` if any phase recorded an
    /// error (codegen should not be trusted, but every independent error
    /// has still been surfaced).
    pub fn run(&mut self, root: NodeId) -> bool {
        self.begin_codegen();
        self.fold_const(root);
        self.type_gen_def(root);
        self.resolve_declared_types(root);
        self.type_gen(root);
        let ok_composite = self.code_gen_composite();
        self.code_gen_global_ctor(root);
        self.code_gen(root);
        self.vtbl_gen(root);
        self.optimize();
        let ok_fixup = self.fixup_vtbl();
        ok_composite && ok_fixup
    }

    /// Phase 1: seed elementary types (already interned by
    /// `TypePool::new`, ) and cache them on `CompiledProgram` for
    /// fast codegen lookups.
    fn begin_codegen(&mut self) {
        if self.program.elementary.is_empty() {
            for kind in [
                DataTypeKind::Void,
                DataTypeKind::Bool,
                DataTypeKind::I8,
                DataTypeKind::U8,
                DataTypeKind::I16,
                DataTypeKind::U16,
                DataTypeKind::I32,
                DataTypeKind::U32,
                DataTypeKind::I64,
                DataTypeKind::U64,
                DataTypeKind::Char,
                DataTypeKind::F32,
                DataTypeKind::F64,
                DataTypeKind::String,
            ] {
                let ty = self.program.types.elementary(kind);
                self.program
                    .elementary
                    .push(crate::types::QDataType::new(ty));
            }
        }
    }

    /// Phase 2.
    fn fold_const(&mut self, root: NodeId) {
        let mut folder = ConstFolder::new(&mut self.program.ast, &mut self.program.types);
        folder.fold_until_stable(root);
    }

    /// Phase 3a.
    fn type_gen_def(&mut self, root: NodeId) {
        let mut gen = TypeGenerator::new(&mut self.program.ast, &mut self.program.scopes, &mut self.program.types);
        gen.predeclare(root);
    }

    /// Phase 3a.5: now that every composite has a reserved `DataTypeId`,
    /// turn the raw type text on plain declarations into real `qtype`s.
    fn resolve_declared_types(&mut self, root: NodeId) {
        let mut gen = TypeGenerator::new(&mut self.program.ast, &mut self.program.scopes, &mut self.program.types);
        gen.resolve_declared_types(root);
    }

    /// Phase 3b.
    fn type_gen(&mut self, root: NodeId) {
        let mut gen = TypeGenerator::new(&mut self.program.ast, &mut self.program.scopes, &mut self.program.types);
        gen.generate(root);
    }

    /// Phase 4.
    fn code_gen_composite(&mut self) -> bool {
        let gen = CompositeCodegen::new(&self.program.types);
        for id in gen.needs_synthesis() {
            let ctor = gen.ctor_body(id);
            let dtor = gen.dtor_body(id);
            gen.mark_ctor_defined(&mut self.program.scopes, id);
            for instr in ctor.into_iter().chain(dtor) {
                self.program.instructions.push(instr);
            }
        }
        true
    }

    /// Phase 5: emit one `__init$N` marker pair per top-level `VarDecl`
    /// with an initializer, in source order.
    fn code_gen_global_ctor(&mut self, root: NodeId) {
        let mut counter = 0u32;
        for id in self.program.ast.iter_preorder(root).collect::<Vec<_>>() {
            if let AstNodeKind::VarDecl { .. } = self.program.ast.get(id).kind {
                if !self.program.ast.get(id).children.is_empty() {
                    self.program.emit(Opcode::InitGlobalsBegin.as_u32(), vec![counter as i64]);
                    counter += 1;
                }
            }
        }
        if counter > 0 {
            self.program.emit(Opcode::InitGlobalsEnd.as_u32(), vec![counter as i64]);
        }
    }

    /// Phase 6: tree walk emitting opcodes, tracking a compile-time
    /// expression-type stack.
    fn code_gen(&mut self, root: NodeId) {
        let mut stack = ExprStack::new();
        self.code_gen_node(root, &mut stack);
    }

    fn code_gen_node(&mut self, id: NodeId, stack: &mut ExprStack) {
        let kind = self.program.ast.get(id).kind.clone();
        match kind {
            AstNodeKind::FuncDecl { .. } => {
                let addr = self.program.instructions.len() as u32;
                self.function_index.insert(id, addr);
                for child in self.program.ast.get(id).children.clone() {
                    self.code_gen_node(child, stack);
                }
                self.program.emit(Opcode::Return.as_u32(), vec![]);
            }
            AstNodeKind::IntLiteral(_)
            | AstNodeKind::UIntLiteral(_)
            | AstNodeKind::DoubleLiteral(_)
            | AstNodeKind::BoolLiteral(_)
            | AstNodeKind::StringLiteral(_) => {
                self.code_gen_literal(id, stack);
            }
            AstNodeKind::Binary { op, lhs, rhs } => {
                self.code_gen_node(lhs, stack);
                self.code_gen_node(rhs, stack);
                stack.pop();
                let result = stack.pop();
                if let Some(opcode) = Opcode::for_binary_op(&op) {
                    self.program.emit(opcode.as_u32(), vec![]);
                }
                if let Some(qtype) = result.or(self.program.ast.get(id).qtype) {
                    stack.push(qtype);
                }
            }
            AstNodeKind::Ident(_) => {
                if let Some(qtype) = self.program.ast.get(id).qtype {
                    self.program.emit(Opcode::LoadLocal.as_u32(), vec![id.0 as i64]);
                    stack.push(qtype);
                }
            }
            AstNodeKind::Member { base, name } => {
                self.code_gen_node(base, stack);
                let base_qtype = stack.pop();
                let offset = self.member_offset(base_qtype, &name);
                self.program.emit(Opcode::LoadField.as_u32(), vec![offset as i64]);
                if let Some(qtype) = self.program.ast.get(id).qtype {
                    stack.push(qtype);
                }
            }
            _ => {
                for child in self.program.ast.get(id).children.clone() {
                    self.code_gen_node(child, stack);
                }
            }
        }
    }

    /// `string`/array `.length` is a native property at offset 0; every
    /// other member looks up its declared offset in the base type's own
    /// member table (laid out by `CodeGenComposite`, phase 4, which runs
    /// before this one).
    fn member_offset(&self, base_qtype: Option<crate::types::QDataType>, name: &str) -> u32 {
        let Some(qtype) = base_qtype else { return 0 };
        let dt = self.program.types.get(qtype.ty);
        if name == "length"
            && matches!(
                dt.kind,
                DataTypeKind::String | DataTypeKind::DynamicArray | DataTypeKind::ArrayRef
            )
        {
            return 0;
        }
        dt.members.iter().find(|m| m.name == name).map(|m| m.offset).unwrap_or(0)
    }

    fn code_gen_literal(&mut self, id: NodeId, stack: &mut ExprStack) {
        let node = self.program.ast.get(id);
        let qtype = node.qtype;
        match &node.num {
            Some(ConstValue::Int(v)) => {
                let v = *v;
                self.program.emit(Opcode::PushInt.as_u32(), vec![v]);
            }
            Some(ConstValue::UInt(v)) => {
                let v = *v as i64;
                self.program.emit(Opcode::PushUInt.as_u32(), vec![v]);
            }
            Some(ConstValue::Double(v)) => {
                let idx = self.program.push_constant(Constant::Double(*v));
                self.program.emit(Opcode::PushDouble.as_u32(), vec![idx as i64]);
            }
            Some(ConstValue::Bool(v)) => {
                self.program.emit(Opcode::PushBool.as_u32(), vec![*v as i64]);
            }
            Some(ConstValue::Str(s)) => {
                let s = s.clone();
                let idx = self.program.push_constant(Constant::String(s));
                self.program.emit(Opcode::PushString.as_u32(), vec![idx as i64]);
            }
            None => {
                self.program.emit(Opcode::Nop.as_u32(), vec![]);
            }
        }
        if let Some(qtype) = qtype {
            stack.push(qtype);
        }
    }

    /// Phase 7.
    fn vtbl_gen(&mut self, root: NodeId) {
        let mut gen = VtblGenerator::new(&mut self.program.ast, &self.program.scopes, self.errors);
        gen.run(root);
        self.vtables = gen.vtables;
    }

    /// Phase 8.
    fn optimize(&mut self) {
        let instructions = std::mem::take(&mut self.program.instructions);
        self.program.instructions = super::optimize::optimize(instructions);
    }

    /// Phase 9: patch each vtable slot against the function addresses
    /// `CodeGen` (phase 6) recorded, without re-running `VtblGen`'s
    /// traversal (its fixed-point already ran in phase 7).
    fn fixup_vtbl(&mut self) -> bool {
        let mut ok = true;
        for vtbl in self.vtables.values() {
            for (name, node) in &vtbl.slots {
                if !self.function_index.contains_key(node) {
                    let loc = self.program.ast.get(*node).location.clone();
                    self.errors.on_error(crate::errors::CompileError::Codegen {
                        message: format!("vtable slot for '{name}' has no assigned function address"),
                        loc: crate::errors::SourceLocation::new(loc.file, loc.line, loc.column),
                    });
                    ok = false;
                }
            }
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstNode;
    use crate::errors::CollectingErrorHandler;
    use crate::token::TokenLocation;
    use crate::types::QDataType;

    fn loc() -> TokenLocation {
        TokenLocation::new("t.le", 1, 1)
    }

    #[test]
    fn folds_and_emits_a_constant_expression() {
        let mut program = CompiledProgram::new();
        let i32_ty = QDataType::new(program.types.elementary(DataTypeKind::I32));

        let lhs = program.ast.add(AstNode::new(AstNodeKind::IntLiteral(1), loc()), None);
        program.ast.get_mut(lhs).qtype = Some(i32_ty);
        let rhs = program.ast.add(AstNode::new(AstNodeKind::IntLiteral(2), loc()), None);
        program.ast.get_mut(rhs).qtype = Some(i32_ty);
        let bin = program.ast.add(
            AstNode::new(
                AstNodeKind::Binary {
                    op: "+".to_string(),
                    lhs,
                    rhs,
                },
                loc(),
            ),
            None,
        );
        program.ast.get_mut(bin).children = vec![lhs, rhs];
        let root = program.ast.add(AstNode::new(AstNodeKind::Program, loc()), None);
        program.ast.get_mut(root).children.push(bin);

        let mut handler = CollectingErrorHandler::new();
        let mut driver = CodegenDriver::new(&mut program, &mut handler);
        let ok = driver.run(root);

        assert!(ok);
        assert_eq!(program.ast.get(bin).num, Some(ConstValue::Int(3)));
        assert!(program.instructions.iter().any(|i| i.opcode == Opcode::Add.as_u32()));
    }

    #[test]
    fn begin_codegen_seeds_elementary_types_once() {
        let mut program = CompiledProgram::new();
        let root = program.ast.add(AstNode::new(AstNodeKind::Program, loc()), None);
        let mut handler = CollectingErrorHandler::new();
        let mut driver = CodegenDriver::new(&mut program, &mut handler);
        driver.run(root);
        assert!(!program.elementary.is_empty());
    }
}
