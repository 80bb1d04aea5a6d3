//! Constant folding & type materialization

use crate::ast::{AstArena, AstFlags, AstNodeKind, ConstValue, NodeId};
use crate::scope::{Member, ScopeArena, ScopeId};
use crate::types::{DataTypeId, DataTypeKind, QDataType, TypePool};

/// `FoldConst(p)`: applied bottom-up, repeatedly, until a pass makes no
/// further progress.
pub struct ConstFolder<'a> {
    ast: &'a mut AstArena,
    types: &'a mut TypePool,
}

impl<'a> ConstFolder<'a> {
    pub fn new(ast: &'a mut AstArena, types: &'a mut TypePool) -> Self {
        ConstFolder { ast, types }
    }

    pub fn fold_until_stable(&mut self, root: NodeId) {
        while self.fold_pass(root) {}
    }

    fn fold_pass(&mut self, id: NodeId) -> bool {
        let mut changed = false;
        for child in self.ast.get(id).children.clone() {
            changed |= self.fold_pass(child);
        }
        changed |= self.fold_node(id);
        changed
    }

    fn fold_node(&mut self, id: NodeId) -> bool {
        if self.ast.get(id).num.is_some() {
            return false;
        }
        match self.ast.get(id).kind.clone() {
            AstNodeKind::IntLiteral(v) => self.seed(id, ConstValue::Int(v)),
            AstNodeKind::UIntLiteral(v) => self.seed(id, ConstValue::UInt(v)),
            AstNodeKind::DoubleLiteral(v) => self.seed(id, ConstValue::Double(v)),
            AstNodeKind::BoolLiteral(v) => self.seed(id, ConstValue::Bool(v)),
            AstNodeKind::CharLiteral(c) => self.seed(id, ConstValue::Int(c as i64)),
            AstNodeKind::StringLiteral(s) => self.seed(id, ConstValue::Str(s)),
            AstNodeKind::Unary { op, operand } => self.fold_unary(id, &op, operand),
            AstNodeKind::Binary { op, lhs, rhs } => self.fold_binary_node(id, &op, lhs, rhs),
            AstNodeKind::Ident(_) | AstNodeKind::ScopeResolution { .. } => self.fold_ref(id),
            AstNodeKind::EnumDecl { .. } => self.fold_enum_members(id),
            _ => false,
        }
    }

    /// A name that resolved to a constant declaration (a `const` variable
    /// or an enum member) folds to that declaration's own value, so
    /// `E::A` and plain references to a folded constant behave like
    /// literals from here on.
    fn fold_ref(&mut self, id: NodeId) -> bool {
        let Some(target) = self.ast.get(id).target else {
            return false;
        };
        let Some(value) = self.ast.get(target).num.clone() else {
            return false;
        };
        let qtype = self.ast.get(target).qtype;
        self.ast.get_mut(id).num = Some(value);
        if qtype.is_some() {
            self.ast.get_mut(id).qtype = qtype;
        }
        self.ast.get_mut(id).flags |= AstFlags::CONST_EXPR;
        true
    }

    /// Assigns each enum member its value: the folded initializer if one
    /// was written, otherwise one past the previous member (starting at
    /// 0), mirroring C-style enum numbering.
    fn fold_enum_members(&mut self, enum_id: NodeId) -> bool {
        let members = self.ast.get(enum_id).children.clone();
        let mut changed = false;
        let mut next_value: i64 = 0;
        for member in members {
            if !matches!(self.ast.get(member).kind, AstNodeKind::VarDecl { .. }) {
                continue;
            }
            if let Some(ConstValue::Int(v)) = self.ast.get(member).num.clone() {
                next_value = v + 1;
                continue;
            }
            let init = self.ast.get(member).children.first().copied();
            let value = match init {
                None => Some(next_value),
                Some(expr) => match self.ast.get(expr).num.clone() {
                    Some(ConstValue::Int(v)) => Some(v),
                    Some(ConstValue::UInt(v)) => Some(v as i64),
                    _ => None,
                },
            };
            let Some(v) = value else { break };
            self.ast.get_mut(member).num = Some(ConstValue::Int(v));
            self.ast.get_mut(member).flags |= AstFlags::CONST_EXPR;
            next_value = v + 1;
            changed = true;
        }
        changed
    }

    fn seed(&mut self, id: NodeId, value: ConstValue) -> bool {
        self.ast.get_mut(id).num = Some(value);
        self.ast.get_mut(id).flags |= AstFlags::CONST_EXPR;
        true
    }

    fn elementary_kind_of(&self, id: NodeId) -> Option<DataTypeKind> {
        self.ast.get(id).qtype.map(|q| self.types.get(q.ty).kind)
    }

    fn fold_unary(&mut self, id: NodeId, op: &str, operand: NodeId) -> bool {
        let Some(operand_num) = self.ast.get(operand).num.clone() else {
            return false;
        };
        let folded = match (op, &operand_num) {
            ("-", ConstValue::Int(v)) => Some(ConstValue::Int(-v)),
            ("-", ConstValue::Double(v)) => Some(ConstValue::Double(-v)),
            ("+", v) => Some(v.clone()),
            ("!", ConstValue::Bool(v)) => Some(ConstValue::Bool(!v)),
            ("~", ConstValue::Int(v)) => Some(ConstValue::Int(!v)),
            ("~", ConstValue::UInt(v)) => Some(ConstValue::UInt(!v)),
            _ => None,
        };
        match folded {
            Some(v) => {
                let qtype = self.ast.get(operand).qtype;
                self.ast.get_mut(id).num = Some(v);
                self.ast.get_mut(id).qtype = qtype;
                self.ast.get_mut(id).flags |= AstFlags::CONST_EXPR;
                true
            }
            None => false,
        }
    }

    fn fold_binary_node(&mut self, id: NodeId, op: &str, lhs: NodeId, rhs: NodeId) -> bool {
        let (Some(lhs_num), Some(rhs_num)) =
            (self.ast.get(lhs).num.clone(), self.ast.get(rhs).num.clone())
        else {
            return false;
        };
        let (Some(lhs_kind), Some(rhs_kind)) =
            (self.elementary_kind_of(lhs), self.elementary_kind_of(rhs))
        else {
            return false;
        };

        let folded = if lhs_kind == DataTypeKind::String || rhs_kind == DataTypeKind::String {
            Self::fold_string(op, &lhs_num, &rhs_num)
        } else {
            Self::compose_type_enum(lhs_kind, rhs_kind)
                .and_then(|result_kind| Self::fold_numeric(op, &lhs_num, &rhs_num, result_kind))
        };

        match folded {
            Some((value, kind)) => {
                let ty = self.types.elementary(kind);
                self.ast.get_mut(id).num = Some(value);
                self.ast.get_mut(id).qtype = Some(QDataType::new(ty));
                self.ast.get_mut(id).flags |= AstFlags::CONST_EXPR;
                true
            }
            None => false,
        }
    }

    /// String `+` concatenates; string `==`/`!=` compares.
    fn fold_string(op: &str, lhs: &ConstValue, rhs: &ConstValue) -> Option<(ConstValue, DataTypeKind)> {
        let (ConstValue::Str(a), ConstValue::Str(b)) = (lhs, rhs) else {
            return None;
        };
        match op {
            "+" => Some((ConstValue::Str(format!("{a}{b}")), DataTypeKind::String)),
            "==" => Some((ConstValue::Bool(a == b), DataTypeKind::Bool)),
            "!=" => Some((ConstValue::Bool(a != b), DataTypeKind::Bool)),
            _ => None,
        }
    }

    /// `ComposeTypeEnum`: the wider/higher-precision type
    /// wins; at equal width, unsigned beats signed.
    fn compose_type_enum(a: DataTypeKind, b: DataTypeKind) -> Option<DataTypeKind> {
        if a == b {
            return Some(a);
        }
        let is_float = |k: DataTypeKind| matches!(k, DataTypeKind::F32 | DataTypeKind::F64);
        if is_float(a) || is_float(b) {
            return Some(if a == DataTypeKind::F64 || b == DataTypeKind::F64 {
                DataTypeKind::F64
            } else {
                DataTypeKind::F32
            });
        }
        let width = |k: DataTypeKind| k.elementary_size().unwrap_or(0);
        let is_unsigned = |k: DataTypeKind| {
            matches!(
                k,
                DataTypeKind::U8 | DataTypeKind::U16 | DataTypeKind::U32 | DataTypeKind::U64 | DataTypeKind::Bool | DataTypeKind::Char
            )
        };
        let (wa, wb) = (width(a), width(b));
        if wa != wb {
            return Some(if wa > wb { a } else { b });
        }
        if is_unsigned(a) {
            Some(a)
        } else if is_unsigned(b) {
            Some(b)
        } else {
            Some(a)
        }
    }

    fn fold_numeric(
        op: &str,
        lhs: &ConstValue,
        rhs: &ConstValue,
        result_kind: DataTypeKind,
    ) -> Option<(ConstValue, DataTypeKind)> {
        let is_cmp = matches!(op, "==" | "!=" | "<" | "<=" | ">" | ">=");
        if is_cmp {
            let a = to_f64(lhs)?;
            let b = to_f64(rhs)?;
            let v = match op {
                "==" => a == b,
                "!=" => a != b,
                "<" => a < b,
                "<=" => a <= b,
                ">" => a > b,
                ">=" => a >= b,
                _ => unreachable!(),
            };
            return Some((ConstValue::Bool(v), DataTypeKind::Bool));
        }
        if matches!(result_kind, DataTypeKind::F32 | DataTypeKind::F64) {
            let a = to_f64(lhs)?;
            let b = to_f64(rhs)?;
            let v = match op {
                "+" => a + b,
                "-" => a - b,
                "*" => a * b,
                "/" if b != 0.0 => a / b,
                _ => return None,
            };
            return Some((ConstValue::Double(v), result_kind));
        }
        if matches!(op, "&&" | "||") {
            let a = to_i64(lhs)? != 0;
            let b = to_i64(rhs)? != 0;
            let v = if op == "&&" { a && b } else { a || b };
            return Some((ConstValue::Bool(v), DataTypeKind::Bool));
        }
        let a = to_i64(lhs)?;
        let b = to_i64(rhs)?;
        let v = match op {
            "+" => a.wrapping_add(b),
            "-" => a.wrapping_sub(b),
            "*" => a.wrapping_mul(b),
            "/" if b != 0 => a.wrapping_div(b),
            "%" if b != 0 => a.wrapping_rem(b),
            "&" => a & b,
            "|" => a | b,
            "^" => a ^ b,
            "<<" => a.wrapping_shl(b as u32),
            ">>" => a.wrapping_shr(b as u32),
            _ => return None,
        };
        let unsigned = matches!(
            result_kind,
            DataTypeKind::U8 | DataTypeKind::U16 | DataTypeKind::U32 | DataTypeKind::U64
        );
        if unsigned {
            Some((ConstValue::UInt(v as u64), result_kind))
        } else {
            Some((ConstValue::Int(v), result_kind))
        }
    }
}

fn to_i64(v: &ConstValue) -> Option<i64> {
    match v {
        ConstValue::Int(i) => Some(*i),
        ConstValue::UInt(u) => Some(*u as i64),
        ConstValue::Bool(b) => Some(*b as i64),
        ConstValue::Double(d) => Some(*d as i64),
        ConstValue::Str(_) => None,
    }
}

fn to_f64(v: &ConstValue) -> Option<f64> {
    match v {
        ConstValue::Int(i) => Some(*i as f64),
        ConstValue::UInt(u) => Some(*u as f64),
        ConstValue::Bool(b) => Some(*b as i64 as f64),
        ConstValue::Double(d) => Some(*d),
        ConstValue::Str(_) => None,
    }
}

fn round_up(offset: u32, align: u32) -> u32 {
    if align <= 1 {
        offset
    } else {
        (offset + align - 1) / align * align
    }
}

/// `TypeGen(p)`: materializes concrete `DataType` entries for
/// every enum/struct/class declaration, in declaration order, caching a
/// back-reference (`qtype`) on the owning AST node.
pub struct TypeGenerator<'a> {
    ast: &'a mut AstArena,
    scopes: &'a mut ScopeArena,
    types: &'a mut TypePool,
}

impl<'a> TypeGenerator<'a> {
    pub fn new(ast: &'a mut AstArena, scopes: &'a mut ScopeArena, types: &'a mut TypePool) -> Self {
        TypeGenerator { ast, scopes, types }
    }

    /// `TypeGenDef`: reserve a `DataTypeId` for every
    /// composite before any member is laid out, so a field referencing its
    /// own enclosing type (e.g. a `weak Node` member of `Node`) resolves
    /// to a real id instead of a forward-reference placeholder.
    pub fn predeclare(&mut self, root: NodeId) {
        for id in self.ast.iter_preorder(root).collect::<Vec<_>>() {
            match &self.ast.get(id).kind {
                AstNodeKind::EnumDecl { name, .. } => {
                    self.types.declare_composite(DataTypeKind::Enum, name);
                }
                AstNodeKind::StructDecl { name, scope, .. } => {
                    let id = self.types.declare_composite(DataTypeKind::Struct, name);
                    self.types.set_struct_scope(id, *scope);
                }
                AstNodeKind::ClassDecl { name, scope, .. } => {
                    let id = self.types.declare_composite(DataTypeKind::Class, name);
                    self.types.set_struct_scope(id, *scope);
                }
                _ => {}
            }
        }
    }

    pub fn generate(&mut self, root: NodeId) {
        for id in self.ast.iter_preorder(root).collect::<Vec<_>>() {
            match self.ast.get(id).kind.clone() {
                AstNodeKind::EnumDecl { name, scope } => self.gen_enum(id, &name, scope),
                AstNodeKind::StructDecl { name, scope, .. } => {
                    self.gen_composite(id, &name, scope, DataTypeKind::Struct);
                }
                AstNodeKind::ClassDecl { name, scope, .. } => {
                    self.gen_composite(id, &name, scope, DataTypeKind::Class);
                }
                _ => {}
            }
        }
    }

    /// Converts the raw type text the parser stashed on every
    /// `VarDecl`/`Param`/`FuncDecl` into a real `qtype`, now that
    /// `predeclare` has reserved a `DataTypeId` for every composite by
    /// name. Declarations that already picked up a `qtype` some other
    /// way (auto-inference from an initializer) are left alone.
    pub fn resolve_declared_types(&mut self, root: NodeId) {
        for id in self.ast.iter_preorder(root).collect::<Vec<_>>() {
            let Some(text) = self.ast.get(id).type_name.clone() else {
                continue;
            };
            let node_qualifiers = self.ast.get(id).qualifiers;

            // `cast<T>`/`offsetof(T,...)`/`alignof(T)`/`typeid(T)` carry
            // their own variant-local `qtype`, separate from the generic
            // `AstNode::qtype` a plain declaration uses.
            let is_type_operator = matches!(
                self.ast.get(id).kind,
                AstNodeKind::Cast { .. }
                    | AstNodeKind::Offsetof { .. }
                    | AstNodeKind::Alignof { .. }
                    | AstNodeKind::Typeid { .. }
            );
            if is_type_operator {
                if let Some(resolved) = self.resolve_type_text(&text, node_qualifiers) {
                    match &mut self.ast.get_mut(id).kind {
                        AstNodeKind::Cast { qtype, .. }
                        | AstNodeKind::Offsetof { qtype, .. }
                        | AstNodeKind::Alignof { qtype }
                        | AstNodeKind::Typeid { qtype } => *qtype = resolved,
                        _ => unreachable!(),
                    }
                }
                continue;
            }

            if self.ast.get(id).qtype.is_some() {
                continue;
            }
            if let Some(qtype) = self.resolve_type_text(&text, node_qualifiers) {
                self.ast.get_mut(id).qtype = Some(qtype);
            }
        }
    }

    /// Parses a type spelling captured by `Parser::parse_type_name`
    /// (qualifiers, base name, then trailing `*`/`[]` suffixes) into a
    /// `QDataType`, stripping suffixes right-to-left. `raw`/`weak` are
    /// declaration-level qualifiers the parser keeps off to the side
    /// (`AstNode::qualifiers`), not part of the type text itself.
    fn resolve_type_text(&mut self, text: &str, node_qualifiers: crate::ast::AstQualifiers) -> Option<QDataType> {
        let mut text = text.trim();
        let mut qualifiers = crate::types::Qualifiers::empty();
        let mut array_suffixes = 0u32;
        let mut pointer_suffixes = 0u32;

        loop {
            if let Some(rest) = text.strip_suffix("[]") {
                array_suffixes += 1;
                text = rest;
            } else if let Some(rest) = text.strip_suffix('*') {
                pointer_suffixes += 1;
                text = rest.trim_end();
            } else if let Some(rest) = text.strip_suffix('&') {
                qualifiers |= crate::types::Qualifiers::REFERENCE;
                text = rest.trim_end();
            } else if let Some(rest) = text.strip_suffix(" const") {
                qualifiers |= crate::types::Qualifiers::CONST;
                text = rest;
            } else {
                break;
            }
        }
        for prefix in ["const ", "native ", "static "] {
            if let Some(rest) = text.strip_prefix(prefix) {
                if prefix == "const " {
                    qualifiers |= crate::types::Qualifiers::CONST;
                }
                text = rest;
            }
        }
        text = text.trim();

        let base = self.elementary_by_name(text).or_else(|| self.types.lookup_composite(text))?;
        let mut qtype = QDataType {
            ty: base,
            qualifiers,
        };
        for _ in 0..pointer_suffixes {
            let ptr = if node_qualifiers.contains(crate::ast::AstQualifiers::RAW) {
                self.types.raw_ptr(qtype)
            } else if node_qualifiers.contains(crate::ast::AstQualifiers::WEAK) {
                self.types.weak_ptr(qtype)
            } else {
                self.types.strong_ptr(qtype)
            };
            qtype = QDataType::new(ptr);
        }
        for _ in 0..array_suffixes {
            qtype = QDataType::new(self.types.dynamic_array(qtype));
        }
        Some(qtype)
    }

    fn elementary_by_name(&mut self, name: &str) -> Option<DataTypeId> {
        let kind = match name {
            "void" => DataTypeKind::Void,
            "bool" => DataTypeKind::Bool,
            "sbyte" => DataTypeKind::I8,
            "byte" => DataTypeKind::U8,
            "short" => DataTypeKind::I16,
            "ushort" => DataTypeKind::U16,
            "int" => DataTypeKind::I32,
            "uint" => DataTypeKind::U32,
            "long" => DataTypeKind::I64,
            "ulong" => DataTypeKind::U64,
            "char" => DataTypeKind::Char,
            "float" => DataTypeKind::F32,
            "double" => DataTypeKind::F64,
            "name" => DataTypeKind::Name,
            "string" => DataTypeKind::String,
            _ => return None,
        };
        Some(self.types.elementary(kind))
    }

    fn gen_enum(&mut self, node: NodeId, name: &str, scope: ScopeId) {
        let id = self.types.declare_composite(DataTypeKind::Enum, name);
        let enum_qtype = QDataType::new(id);
        let members: Vec<crate::types::Member> = self
            .scopes
            .get(scope)
            .members()
            .filter_map(|(n, m)| match m {
                Member::Node(decl) => Some(crate::types::Member {
                    name: n.clone(),
                    qtype: self.ast.get(*decl).qtype.unwrap_or(enum_qtype),
                    offset: 0,
                    bit_offset: None,
                }),
                _ => None,
            })
            .collect();
        self.types.set_members(id, members, 4, 4);
        self.ast.get_mut(node).qtype = Some(enum_qtype);
    }

    fn gen_composite(&mut self, node: NodeId, name: &str, scope: ScopeId, kind: DataTypeKind) -> DataTypeId {
        let id = self.types.declare_composite(kind, name);
        let decls: Vec<(String, NodeId)> = self
            .scopes
            .get(scope)
            .members()
            .filter_map(|(n, m)| match m {
                Member::Node(decl) => Some((n.clone(), *decl)),
                _ => None,
            })
            .filter(|(_, decl)| matches!(self.ast.get(*decl).kind, AstNodeKind::VarDecl { .. }))
            .collect();

        let mut offset = 0u32;
        let mut max_align = 1u32;
        let mut members = Vec::new();
        // Tracks the storage unit a run of bit-fields is currently
        // packed into: (byte offset of the unit, bits already claimed).
        // A non-bit-field member, or a bit-field that no longer fits,
        // closes the run and starts the next unit from a fresh offset.
        let mut bit_run: Option<(u32, u32)> = None;
        for (mname, decl) in decls {
            let Some(qtype) = self.ast.get(decl).qtype else {
                continue;
            };
            let dt = self.types.get(qtype.ty);
            let (size, align) = (dt.size.max(1), dt.align.max(1));
            max_align = max_align.max(align);

            if let Some(width) = self.ast.get(decl).bit_width {
                let storage_bits = size * 8;
                let fits = bit_run.is_some_and(|(_, used)| used + width as u32 <= storage_bits);
                let (unit_offset, used) = if fits {
                    bit_run.unwrap()
                } else {
                    offset = round_up(offset, align);
                    let unit_offset = offset;
                    offset += size;
                    (unit_offset, 0u32)
                };
                members.push(crate::types::Member {
                    name: mname,
                    qtype,
                    offset: unit_offset,
                    bit_offset: Some((used as u8, width)),
                });
                bit_run = Some((unit_offset, used + width as u32));
                continue;
            }

            bit_run = None;
            offset = round_up(offset, align);
            members.push(crate::types::Member {
                name: mname,
                qtype,
                offset,
                bit_offset: None,
            });
            offset += size;
        }
        let size = round_up(offset, max_align);
        self.types.set_members(id, members, size, max_align);
        self.ast.get_mut(node).qtype = Some(QDataType::new(id));
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstArena, AstNode};
    use crate::scope::{NamedScope, ScopeKind};
    use crate::token::TokenLocation;

    fn loc() -> TokenLocation {
        TokenLocation::new("t.le", 1, 1)
    }

    #[test]
    fn folds_additive_constant_expression() {
        let mut ast = AstArena::new();
        let mut types = TypePool::new();
        let i32_ty = QDataType::new(types.elementary(DataTypeKind::I32));

        let lhs = ast.add(AstNode::new(AstNodeKind::IntLiteral(2), loc()), None);
        ast.get_mut(lhs).qtype = Some(i32_ty);
        let rhs = ast.add(AstNode::new(AstNodeKind::IntLiteral(3), loc()), None);
        ast.get_mut(rhs).qtype = Some(i32_ty);
        let root = ast.add(
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
        ast.get_mut(root).children = vec![lhs, rhs];

        let mut folder = ConstFolder::new(&mut ast, &mut types);
        folder.fold_until_stable(root);

        assert_eq!(ast.get(root).num, Some(ConstValue::Int(5)));
        assert!(ast.get(root).flags.contains(AstFlags::CONST_EXPR));
    }

    #[test]
    fn concatenates_string_constants() {
        let mut ast = AstArena::new();
        let mut types = TypePool::new();
        let str_ty = QDataType::new(types.elementary(DataTypeKind::String));

        let lhs = ast.add(
            AstNode::new(AstNodeKind::StringLiteral("foo".to_string()), loc()),
            None,
        );
        ast.get_mut(lhs).qtype = Some(str_ty);
        let rhs = ast.add(
            AstNode::new(AstNodeKind::StringLiteral("bar".to_string()), loc()),
            None,
        );
        ast.get_mut(rhs).qtype = Some(str_ty);
        let root = ast.add(
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
        ast.get_mut(root).children = vec![lhs, rhs];

        let mut folder = ConstFolder::new(&mut ast, &mut types);
        folder.fold_until_stable(root);

        assert_eq!(ast.get(root).num, Some(ConstValue::Str("foobar".to_string())));
    }

    #[test]
    fn identifier_folds_to_its_target_declarations_value() {
        let mut ast = AstArena::new();
        let mut types = TypePool::new();
        let i32_ty = QDataType::new(types.elementary(DataTypeKind::I32));

        let init = ast.add(AstNode::new(AstNodeKind::IntLiteral(5), loc()), None);
        ast.get_mut(init).qtype = Some(i32_ty);
        let decl = ast.add(
            AstNode::new(
                AstNodeKind::VarDecl {
                    name: "X".to_string(),
                    qtype: Some(i32_ty),
                },
                loc(),
            ),
            None,
        );
        ast.get_mut(decl).children.push(init);

        let use_site = ast.add(AstNode::new(AstNodeKind::Ident("X".to_string()), loc()), None);
        ast.get_mut(use_site).target = Some(decl);
        let root = ast.add(AstNode::new(AstNodeKind::Program, loc()), None);
        ast.get_mut(root).children = vec![decl, use_site];

        let mut folder = ConstFolder::new(&mut ast, &mut types);
        folder.fold_until_stable(root);

        assert_eq!(ast.get(use_site).num, Some(ConstValue::Int(5)));
        assert!(ast.get(use_site).flags.contains(AstFlags::CONST_EXPR));
    }

    #[test]
    fn enum_members_number_sequentially_restarting_after_an_explicit_value() {
        let mut ast = AstArena::new();
        let mut types = TypePool::new();

        let enum_decl = ast.add(
            AstNode::new(
                AstNodeKind::EnumDecl {
                    name: "E".to_string(),
                    scope: ScopeId(0),
                },
                loc(),
            ),
            None,
        );
        let a = ast.add(
            AstNode::new(AstNodeKind::VarDecl { name: "A".to_string(), qtype: None }, loc()),
            Some(enum_decl),
        );
        let b = ast.add(
            AstNode::new(AstNodeKind::VarDecl { name: "B".to_string(), qtype: None }, loc()),
            Some(enum_decl),
        );
        ast.add(AstNode::new(AstNodeKind::IntLiteral(5), loc()), Some(b));
        let c = ast.add(
            AstNode::new(AstNodeKind::VarDecl { name: "C".to_string(), qtype: None }, loc()),
            Some(enum_decl),
        );

        let mut folder = ConstFolder::new(&mut ast, &mut types);
        folder.fold_until_stable(enum_decl);

        assert_eq!(ast.get(a).num, Some(ConstValue::Int(0)));
        assert_eq!(ast.get(b).num, Some(ConstValue::Int(5)));
        assert_eq!(ast.get(c).num, Some(ConstValue::Int(6)));
    }

    #[test]
    fn type_gen_lays_out_struct_members_with_alignment() {
        let mut ast = AstArena::new();
        let mut scopes = ScopeArena::new();
        let mut types = TypePool::new();

        let struct_scope = scopes.alloc(NamedScope::new("Packed", ScopeKind::Struct, None));
        let byte_ty = QDataType::new(types.elementary(DataTypeKind::U8));
        let int_ty = QDataType::new(types.elementary(DataTypeKind::I32));

        let field_a = ast.add(
            AstNode::new(
                AstNodeKind::VarDecl {
                    name: "a".to_string(),
                    qtype: Some(byte_ty),
                },
                loc(),
            ),
            None,
        );
        ast.get_mut(field_a).qtype = Some(byte_ty);
        let field_b = ast.add(
            AstNode::new(
                AstNodeKind::VarDecl {
                    name: "b".to_string(),
                    qtype: Some(int_ty),
                },
                loc(),
            ),
            None,
        );
        ast.get_mut(field_b).qtype = Some(int_ty);
        scopes.get_mut(struct_scope).declare("a", Member::Node(field_a));
        scopes.get_mut(struct_scope).declare("b", Member::Node(field_b));

        let decl = ast.add(
            AstNode::new(
                AstNodeKind::StructDecl {
                    name: "Packed".to_string(),
                    scope: struct_scope,
                    base_name: None,
                },
                loc(),
            ),
            None,
        );

        let mut gen = TypeGenerator::new(&mut ast, &mut scopes, &mut types);
        gen.generate(decl);

        let qtype = ast.get(decl).qtype.expect("struct type cached on node");
        let dt = types.get(qtype.ty);
        assert_eq!(dt.members.len(), 2);
        assert_eq!(dt.members[0].offset, 0);
        assert_eq!(dt.members[1].offset, 4); // padded up to int's alignment
        assert_eq!(dt.size, 8);
    }

    #[test]
    fn type_gen_packs_consecutive_bit_fields_into_one_storage_unit() {
        let mut ast = AstArena::new();
        let mut scopes = ScopeArena::new();
        let mut types = TypePool::new();

        let struct_scope = scopes.alloc(NamedScope::new("Flags", ScopeKind::Struct, None));
        let int_ty = QDataType::new(types.elementary(DataTypeKind::I32));

        let field_a = ast.add(
            AstNode::new(
                AstNodeKind::VarDecl {
                    name: "a".to_string(),
                    qtype: Some(int_ty),
                },
                loc(),
            ),
            None,
        );
        ast.get_mut(field_a).qtype = Some(int_ty);
        ast.get_mut(field_a).bit_width = Some(3);

        let field_b = ast.add(
            AstNode::new(
                AstNodeKind::VarDecl {
                    name: "b".to_string(),
                    qtype: Some(int_ty),
                },
                loc(),
            ),
            None,
        );
        ast.get_mut(field_b).qtype = Some(int_ty);
        ast.get_mut(field_b).bit_width = Some(5);

        // A plain (non-bit-field) member after the run starts its own
        // fresh, fully-sized storage unit.
        let field_c = ast.add(
            AstNode::new(
                AstNodeKind::VarDecl {
                    name: "c".to_string(),
                    qtype: Some(int_ty),
                },
                loc(),
            ),
            None,
        );
        ast.get_mut(field_c).qtype = Some(int_ty);

        scopes.get_mut(struct_scope).declare("a", Member::Node(field_a));
        scopes.get_mut(struct_scope).declare("b", Member::Node(field_b));
        scopes.get_mut(struct_scope).declare("c", Member::Node(field_c));

        let decl = ast.add(
            AstNode::new(
                AstNodeKind::StructDecl {
                    name: "Flags".to_string(),
                    scope: struct_scope,
                    base_name: None,
                },
                loc(),
            ),
            None,
        );

        let mut gen = TypeGenerator::new(&mut ast, &mut scopes, &mut types);
        gen.generate(decl);

        let qtype = ast.get(decl).qtype.expect("struct type cached on node");
        let dt = types.get(qtype.ty);
        assert_eq!(dt.members.len(), 3);
        assert_eq!(dt.members[0].offset, 0);
        assert_eq!(dt.members[0].bit_offset, Some((0, 3)));
        assert_eq!(dt.members[1].offset, 0, "b shares a's storage unit");
        assert_eq!(dt.members[1].bit_offset, Some((3, 5)));
        assert_eq!(dt.members[2].offset, 4, "c starts its own unit after the bit-field run");
        assert_eq!(dt.members[2].bit_offset, None);
        assert_eq!(dt.size, 8);
    }
}
