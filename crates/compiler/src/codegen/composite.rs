//! `CodeGenComposite`
//!
//! Synthesizes a default constructor/destructor/assignment body for
//! composite types that need one: any type with a strong/weak pointer
//! member, a nested composite member that itself needs one, or an
//! explicit member initializer. Trivial composites (plain elementary
//! fields only) get none -- the runtime can `memcpy`/zero them.

use crate::compiled_program::Instruction;
use crate::scope::ScopeArena;
use crate::types::{DataTypeId, TypePool};

use super::state::Opcode;

pub struct CompositeCodegen<'a> {
    types: &'a TypePool,
}

impl<'a> CompositeCodegen<'a> {
    pub fn new(types: &'a TypePool) -> Self {
        CompositeCodegen { types }
    }

    /// Returns the ids of composite types needing a synthesized ctor/dtor,
    /// in type-pool order, i.e. declaration order, since `TypeGen` assigns
    /// ids as it walks the tree.
    pub fn needs_synthesis(&self) -> Vec<DataTypeId> {
        (0..self.types.len())
            .map(|i| DataTypeId(i as u32))
            .filter(|&id| {
                let dt = self.types.get(id);
                dt.kind.is_composite() && self.has_nontrivial_member(id)
            })
            .collect()
    }

    fn has_nontrivial_member(&self, id: DataTypeId) -> bool {
        let dt = self.types.get(id);
        dt.members.iter().any(|m| {
            let member_ty = self.types.get(m.qtype.ty);
            member_ty.kind.is_pointerlike() || (member_ty.kind.is_composite() && !member_ty.members.is_empty())
        })
    }

    /// One instruction per pointer-like member: `AddRef` in the
    /// constructor skeleton, `Release` in the destructor skeleton. Strong
    /// and weak refcounts are maintained by the runtime's
    /// `AddRef`/`Release`; the front end only has to call them at the
    /// right points.
    pub fn ctor_body(&self, id: DataTypeId) -> Vec<Instruction> {
        let dt = self.types.get(id);
        dt.members
            .iter()
            .filter(|m| self.types.get(m.qtype.ty).kind.is_pointerlike())
            .map(|m| Instruction {
                opcode: Opcode::AddRef.as_u32(),
                operands: vec![m.offset as i64],
            })
            .collect()
    }

    pub fn dtor_body(&self, id: DataTypeId) -> Vec<Instruction> {
        let dt = self.types.get(id);
        dt.members
            .iter()
            .filter(|m| self.types.get(m.qtype.ty).kind.is_pointerlike())
            .rev()
            .map(|m| Instruction {
                opcode: Opcode::Release.as_u32(),
                operands: vec![m.offset as i64],
            })
            .collect()
    }

    /// Marks the owning scope's `ctor_defined` the way the parser would
    /// have, had the user written one explicitly.
    pub fn mark_ctor_defined(&self, scopes: &mut ScopeArena, id: DataTypeId) {
        if let Some(scope) = self.types.get(id).struct_scope {
            scopes.get_mut(scope).ctor_defined = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataTypeKind, Member, QDataType};

    #[test]
    fn struct_with_strong_ptr_member_needs_synthesis() {
        let mut types = TypePool::new();
        let i32_ty = types.elementary(DataTypeKind::I32);
        let strong = types.strong_ptr(QDataType::new(i32_ty));
        let s = types.declare_composite(DataTypeKind::Struct, "Holder");
        types.set_members(
            s,
            vec![Member {
                name: "value".to_string(),
                qtype: QDataType::new(strong),
                offset: 0,
                bit_offset: None,
            }],
            8,
            8,
        );

        let gen = CompositeCodegen::new(&types);
        assert!(gen.needs_synthesis().contains(&s));
        assert_eq!(gen.ctor_body(s).len(), 1);
        assert_eq!(gen.dtor_body(s).len(), 1);
    }

    #[test]
    fn plain_struct_needs_no_synthesis() {
        let mut types = TypePool::new();
        let i32_ty = types.elementary(DataTypeKind::I32);
        let s = types.declare_composite(DataTypeKind::Struct, "Point");
        types.set_members(
            s,
            vec![
                Member {
                    name: "x".to_string(),
                    qtype: QDataType::new(i32_ty),
                    offset: 0,
                    bit_offset: None,
                },
                Member {
                    name: "y".to_string(),
                    qtype: QDataType::new(i32_ty),
                    offset: 4,
                    bit_offset: None,
                },
            ],
            8,
            4,
        );

        let gen = CompositeCodegen::new(&types);
        assert!(!gen.needs_synthesis().contains(&s));
    }
}
