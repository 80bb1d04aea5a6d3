//! Name & type resolver
//!
//! Every identifier/scope-resolution/dot/subscript node gets its `target`
//! and `qtype` filled in here. The driver re-visits the whole tree in
//! passes until a pass makes no further progress, at which point anything still unresolved is a name error.

use crate::ast::{AstArena, AstFlags, AstNodeKind, AstQualifiers, NodeId};
use crate::errors::{CompileError, CompileWarning, ErrorHandler, SourceLocation, WarningId};
use crate::scope::{Member, ScopeArena, ScopeId, ScopeKind};
use crate::types::{DataTypeKind, QDataType, TypePool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Resolved,
    Pending,
}

/// Caps the fixed-point loop so a genuinely unresolvable program (rather
/// than a bug in this resolver) is what produces the final error pass,
/// not a runaway loop.
const MAX_PASSES: u32 = 256;

pub struct Resolver<'a> {
    ast: &'a mut AstArena,
    scopes: &'a mut ScopeArena,
    types: &'a mut TypePool,
    errors: &'a mut dyn ErrorHandler,
}

impl<'a> Resolver<'a> {
    pub fn new(
        ast: &'a mut AstArena,
        scopes: &'a mut ScopeArena,
        types: &'a mut TypePool,
        errors: &'a mut dyn ErrorHandler,
    ) -> Self {
        Resolver {
            ast,
            scopes,
            types,
            errors,
        }
    }

    /// Drives resolution to a fixed point. Returns `true` if the whole
    /// tree resolved cleanly, `false` if the final pass still found
    /// unresolved nodes (in which case those nodes' location got a
    /// `CompileError::Name` emitted).
    pub fn resolve_program(&mut self, root: NodeId, root_scope: ScopeId) -> bool {
        let mut pass = 0;
        let mut adl_attempted = false;
        loop {
            let mut any_progress = false;
            let mut all_resolved = true;
            self.resolve_pass(root, root_scope, &mut any_progress, &mut all_resolved);
            if all_resolved {
                return true;
            }
            pass += 1;
            if !any_progress {
                if !adl_attempted {
                    adl_attempted = true;
                    if self.try_adl_pass(root) {
                        continue;
                    }
                }
                self.report_unresolved(root);
                return false;
            }
            if pass >= MAX_PASSES {
                self.report_unresolved(root);
                return false;
            }
        }
    }

    fn resolve_pass(
        &mut self,
        id: NodeId,
        scope: ScopeId,
        any_progress: &mut bool,
        all_resolved: &mut bool,
    ) {
        if self.ast.get(id).is_resolved() {
            return;
        }
        let child_scope = self.ast.get(id).scope_ref.unwrap_or(scope);
        for child in self.ast.get(id).children.clone() {
            self.resolve_pass(child, child_scope, any_progress, all_resolved);
        }

        match self.resolve_node(id, scope) {
            Status::Resolved => {
                self.ast.get_mut(id).flags |= AstFlags::RESOLVED;
                *any_progress = true;
            }
            Status::Pending => {
                *all_resolved = false;
            }
        }
    }

    fn children_resolved(&self, id: NodeId) -> bool {
        self.ast
            .get(id)
            .children
            .iter()
            .all(|&c| self.ast.get(c).is_resolved())
    }

    /// name lookup composition, steps 1-7, dispatched by node
    /// kind. Structural nodes (blocks, loops, declarations with no
    /// intrinsic symbol of their own) resolve as soon as their children
    /// do; expression nodes additionally need a `target`/`qtype`.
    fn resolve_node(&mut self, id: NodeId, scope: ScopeId) -> Status {
        if !self.children_resolved(id) {
            return Status::Pending;
        }

        let kind = self.ast.get(id).kind.clone();
        match kind {
            AstNodeKind::IntLiteral(_) => {
                self.set_elementary(id, DataTypeKind::I32);
                Status::Resolved
            }
            AstNodeKind::UIntLiteral(_) => {
                self.set_elementary(id, DataTypeKind::U32);
                Status::Resolved
            }
            AstNodeKind::DoubleLiteral(_) => {
                self.set_elementary(id, DataTypeKind::F64);
                Status::Resolved
            }
            AstNodeKind::BoolLiteral(_) => {
                self.set_elementary(id, DataTypeKind::Bool);
                Status::Resolved
            }
            AstNodeKind::CharLiteral(_) => {
                self.set_elementary(id, DataTypeKind::Char);
                Status::Resolved
            }
            AstNodeKind::StringLiteral(_) => {
                self.set_elementary(id, DataTypeKind::String);
                Status::Resolved
            }
            AstNodeKind::NameLiteral(_) => {
                self.set_elementary(id, DataTypeKind::Name);
                Status::Resolved
            }
            AstNodeKind::NullLiteral | AstNodeKind::TokenPaste(_) => Status::Resolved,

            // step 1: this/super
            AstNodeKind::This | AstNodeKind::Super => self.resolve_this_or_super(id, scope),

            // step 2: simple identifier
            AstNodeKind::Ident(name) => self.resolve_ident(id, scope, &name),

            // step 3: A::B
            AstNodeKind::ScopeResolution { base, name } => {
                self.resolve_scope_resolution(id, base, &name)
            }

            // step 4: a.b
            AstNodeKind::Member { base, name } => self.resolve_member(id, base, &name, scope),

            // step 5: a[b]
            AstNodeKind::Index { base, index } => self.resolve_index(id, base, index),

            // step 6: f(args)
            AstNodeKind::Call { callee, args } => self.resolve_call(id, callee, &args),

            // step 7: operators
            AstNodeKind::Binary { lhs, .. } | AstNodeKind::Assign { lhs, .. } => {
                self.resolve_operator(id, lhs)
            }
            AstNodeKind::Unary { operand, .. } | AstNodeKind::PostfixUnary { operand, .. } => {
                self.inherit_qtype(id, operand);
                Status::Resolved
            }
            AstNodeKind::Ternary { then_val, .. } => {
                self.inherit_qtype(id, then_val);
                Status::Resolved
            }
            AstNodeKind::Cast { qtype, .. } => {
                self.ast.get_mut(id).qtype = Some(qtype);
                Status::Resolved
            }
            AstNodeKind::Sizeof { .. } => {
                self.set_elementary(id, DataTypeKind::U64);
                Status::Resolved
            }
            AstNodeKind::Offsetof { .. } | AstNodeKind::Alignof { .. } => {
                self.set_elementary(id, DataTypeKind::U32);
                Status::Resolved
            }
            AstNodeKind::Typeid { .. } => {
                self.set_elementary(id, DataTypeKind::U32);
                Status::Resolved
            }
            AstNodeKind::New { qtype, .. } => {
                let strong = self.types.strong_ptr(qtype);
                self.ast.get_mut(id).qtype = Some(QDataType::new(strong));
                Status::Resolved
            }
            AstNodeKind::ArrayLiteral { elems } => {
                if let Some(&first) = elems.first() {
                    if let Some(elem_qtype) = self.ast.get(first).qtype {
                        let arr = self.types.dynamic_array(elem_qtype);
                        self.ast.get_mut(id).qtype = Some(QDataType::new(arr));
                    }
                }
                Status::Resolved
            }
            AstNodeKind::StructLiteral { .. } | AstNodeKind::RangeExpr { .. } => Status::Resolved,
            AstNodeKind::Delegate { target, .. } => {
                self.inherit_qtype(id, target);
                Status::Resolved
            }

            // resolve a `class B : A` / `struct B : A` base name to the
            // base's own scope, so vtable inheritance and `super::` can
            // walk `NamedScope::base`.
            AstNodeKind::ClassDecl { scope: own_scope, base_name, .. }
            | AstNodeKind::StructDecl { scope: own_scope, base_name, .. } => {
                self.resolve_base_class(scope, own_scope, base_name)
            }

            // declarations: `auto` inference from initializer
            AstNodeKind::VarDecl { .. } => {
                if self.ast.get(id).qtype.is_none() {
                    if let Some(&init) = self.ast.get(id).children.first() {
                        if let Some(q) = self.ast.get(init).qtype {
                            self.ast.get_mut(id).qtype = Some(q);
                        }
                    }
                }
                Status::Resolved
            }

            // everything else is purely structural; its children having
            // resolved is sufficient.
            _ => Status::Resolved,
        }
    }

    fn set_elementary(&mut self, id: NodeId, kind: DataTypeKind) {
        let ty = self.types.elementary(kind);
        self.ast.get_mut(id).qtype = Some(QDataType::new(ty));
    }

    fn inherit_qtype(&mut self, id: NodeId, from: NodeId) {
        let q = self.ast.get(from).qtype;
        self.ast.get_mut(id).qtype = q;
    }

    /// step 1: `this`/`super` resolve against the nearest
    /// enclosing composite scope, walking up through function/block
    /// scopes until a class/struct scope is found.
    fn resolve_this_or_super(&mut self, id: NodeId, scope: ScopeId) -> Status {
        let is_super = matches!(self.ast.get(id).kind, AstNodeKind::Super);
        let mut current = Some(scope);
        while let Some(s) = current {
            let named = self.scopes.get(s);
            if matches!(
                named.kind,
                crate::scope::ScopeKind::Class | crate::scope::ScopeKind::Struct
            ) {
                let target_scope = if is_super { named.base } else { Some(s) };
                return match target_scope {
                    Some(ts) => {
                        if let Some(node) = self.scopes.get(ts).node {
                            self.ast.get_mut(id).target = Some(node);
                        }
                        Status::Resolved
                    }
                    None => {
                        self.name_error(id, "'super' used with no base class".to_string());
                        Status::Resolved
                    }
                };
            }
            current = named.parent;
        }
        self.name_error(id, "'this'/'super' used outside a method".to_string());
        Status::Resolved
    }

    fn resolve_base_class(&mut self, scope: ScopeId, own_scope: ScopeId, base_name: Option<String>) -> Status {
        let Some(base_name) = base_name else {
            return Status::Resolved;
        };
        if self.scopes.get(own_scope).base.is_some() {
            return Status::Resolved;
        }
        match self.scopes.find_symbol_full(scope, &base_name) {
            Some(Member::Scope(s)) => {
                self.scopes.get_mut(own_scope).base = Some(s);
                Status::Resolved
            }
            Some(Member::Node(n)) => match self.scope_of_node(n) {
                Some(s) => {
                    self.scopes.get_mut(own_scope).base = Some(s);
                    Status::Resolved
                }
                None => Status::Pending,
            },
            None => Status::Pending,
        }
    }

    /// step 2.
    fn resolve_ident(&mut self, id: NodeId, scope: ScopeId, name: &str) -> Status {
        match self.scopes.find_symbol_full(scope, name) {
            Some(Member::Node(target)) => {
                self.warn_if_deprecated(id, target, name);
                self.ast.get_mut(id).target = Some(target);
                let target_qtype = self.ast.get(target).qtype;
                self.ast.get_mut(id).qtype = target_qtype;
                self.ast.get_mut(id).flags |= AstFlags::LVALUE;
                Status::Resolved
            }
            Some(Member::Scope(s)) => {
                if let Some(node) = self.scopes.get(s).node {
                    self.ast.get_mut(id).target = Some(node);
                }
                Status::Resolved
            }
            None => {
                // A bare name used as a call's callee gets one chance at
                // argument-dependent lookup once the main fix-point
                // stalls (see `try_adl_pass`), rather than erroring the
                // first time ordinary scope lookup misses.
                if self.is_call_callee(id) {
                    return Status::Pending;
                }
                self.name_error(id, format!("undeclared identifier '{name}'"));
                Status::Resolved
            }
        }
    }

    /// Whether `id` is the callee expression of its parent `Call` node.
    fn is_call_callee(&self, id: NodeId) -> bool {
        let Some(parent) = self.ast.get(id).parent else {
            return false;
        };
        matches!(&self.ast.get(parent).kind, AstNodeKind::Call { callee, .. } if *callee == id)
    }

    /// One-shot retry for calls whose callee never resolved through
    /// ordinary scope lookup: search each argument's type's enclosing
    /// scope for a same-named free function (argument-dependent lookup,
    /// spec-style ADL). Returns whether any callee resolved, so the
    /// fix-point loop knows whether to keep iterating.
    fn try_adl_pass(&mut self, root: NodeId) -> bool {
        let mut made_progress = false;
        for id in self.ast.iter_preorder(root).collect::<Vec<_>>() {
            if self.ast.get(id).is_resolved() {
                continue;
            }
            let name = match &self.ast.get(id).kind {
                AstNodeKind::Ident(n) => n.clone(),
                _ => continue,
            };
            if !self.is_call_callee(id) {
                continue;
            }
            let parent = self.ast.get(id).parent.expect("is_call_callee checked parent");
            let args = match &self.ast.get(parent).kind {
                AstNodeKind::Call { args, .. } => args.clone(),
                _ => continue,
            };
            if let Some(target) = self.find_via_adl(&name, &args) {
                self.warn_if_deprecated(id, target, &name);
                self.ast.get_mut(id).target = Some(target);
                self.ast.get_mut(id).qtype = self.ast.get(target).qtype;
                self.ast.get_mut(id).flags |= AstFlags::LVALUE | AstFlags::RESOLVED;
                made_progress = true;
            }
        }
        made_progress
    }

    /// Looks for a free function named `name` in the enclosing scope of
    /// any argument's struct/class type -- the argument-dependent part of
    /// ADL: the function doesn't have to be visible from the call site's
    /// own scope, only from one of its arguments' types' namespace.
    fn find_via_adl(&self, name: &str, args: &[NodeId]) -> Option<NodeId> {
        for &arg in args {
            let Some(qtype) = self.ast.get(arg).qtype else {
                continue;
            };
            let dt = self.types.get(qtype.ty);
            let Some(struct_scope) = dt.struct_scope else {
                continue;
            };
            let Some(namespace) = self.scopes.get(struct_scope).parent else {
                continue;
            };
            if let Some(Member::Node(n)) = self.scopes.get(namespace).find_local(name) {
                if matches!(self.ast.get(n).kind, AstNodeKind::FuncDecl { .. }) {
                    return Some(n);
                }
            }
        }
        None
    }

    /// step 3: resolve `base` to a scope, then look up `name`
    /// within it.
    fn resolve_scope_resolution(&mut self, id: NodeId, base: NodeId, name: &str) -> Status {
        let Some(base_target) = self.ast.get(base).target else {
            self.name_error(id, "could not resolve left side of '::'".to_string());
            return Status::Resolved;
        };
        let Some(base_scope) = self.scope_of_node(base_target) else {
            self.name_error(id, format!("'{name}' is not a member of a namespace/type"));
            return Status::Resolved;
        };
        match self.scopes.get(base_scope).find_local(name) {
            Some(Member::Node(n)) => {
                self.ast.get_mut(id).target = Some(n);
                self.ast.get_mut(id).qtype = self.ast.get(n).qtype;
                Status::Resolved
            }
            Some(Member::Scope(s)) => {
                if let Some(node) = self.scopes.get(s).node {
                    self.ast.get_mut(id).target = Some(node);
                }
                Status::Resolved
            }
            None => {
                self.name_error(id, format!("'{name}' not found in scope"));
                Status::Resolved
            }
        }
    }

    /// step 4: resolve `base`'s type, then look up `name` in
    /// its `struct_scope`.
    fn resolve_member(&mut self, id: NodeId, base: NodeId, name: &str, scope: ScopeId) -> Status {
        let Some(base_qtype) = self.ast.get(base).qtype else {
            self.name_error(
                id,
                format!("cannot access member '{name}' of unresolved expression"),
            );
            return Status::Resolved;
        };
        let dt = self.types.get(base_qtype.ty);
        // Native read-only properties on elementary/array types, not
        // backed by any user-declared `struct_scope`: `string`/dynamic
        // array `.length`, at a fixed offset the codegen member-access
        // path knows without a member table lookup.
        if name == "length"
            && matches!(dt.kind, DataTypeKind::String | DataTypeKind::DynamicArray | DataTypeKind::ArrayRef)
        {
            self.set_elementary(id, DataTypeKind::I32);
            return Status::Resolved;
        }
        let Some(struct_scope) = dt.struct_scope else {
            let name_of_type = dt.name.clone();
            self.name_error(id, format!("'{name}' is not a member of '{name_of_type}'"));
            return Status::Resolved;
        };
        match self.scopes.find_member(struct_scope, name) {
            Some((Member::Node(n), declaring_scope)) => {
                if let Some(msg) = self.visibility_violation(n, declaring_scope, scope, name) {
                    self.type_error(id, msg);
                    return Status::Resolved;
                }
                self.warn_if_deprecated(id, n, name);
                self.ast.get_mut(id).target = Some(n);
                self.ast.get_mut(id).qtype = self.ast.get(n).qtype;
                self.ast.get_mut(id).flags |= AstFlags::LVALUE;
                Status::Resolved
            }
            _ => {
                let name_of_type = self.types.get(base_qtype.ty).name.clone();
                self.name_error(id, format!("no member named '{name}' on '{name_of_type}'"));
                Status::Resolved
            }
        }
    }

    /// `None` if the access is allowed, else the diagnostic message.
    /// `private` is visible only to the declaring struct/class itself;
    /// `protected` also to its derivatives; unqualified/`public` members
    /// are always visible.
    fn visibility_violation(
        &self,
        member: NodeId,
        declaring_scope: ScopeId,
        accessing_scope: ScopeId,
        name: &str,
    ) -> Option<String> {
        let qualifiers = self.ast.get(member).qualifiers;
        if qualifiers.contains(AstQualifiers::PRIVATE) {
            if self.enclosing_class_scope(accessing_scope) != Some(declaring_scope) {
                return Some(format!("'{name}' is private"));
            }
        } else if qualifiers.contains(AstQualifiers::PROTECTED) {
            let accessor = self.enclosing_class_scope(accessing_scope);
            let allowed = accessor == Some(declaring_scope)
                || accessor.is_some_and(|s| self.scope_derives_from(s, declaring_scope));
            if !allowed {
                return Some(format!("'{name}' is protected"));
            }
        }
        None
    }

    /// Walks `parent` up from `scope` to the nearest enclosing
    /// class/struct scope, if any.
    fn enclosing_class_scope(&self, scope: ScopeId) -> Option<ScopeId> {
        let mut current = Some(scope);
        while let Some(s) = current {
            let named = self.scopes.get(s);
            if matches!(named.kind, ScopeKind::Class | ScopeKind::Struct) {
                return Some(s);
            }
            current = named.parent;
        }
        None
    }

    /// Whether `scope` is `base` itself or derives from it, walking the
    /// `base` chain.
    fn scope_derives_from(&self, scope: ScopeId, base: ScopeId) -> bool {
        let mut current = Some(scope);
        while let Some(s) = current {
            if s == base {
                return true;
            }
            current = self.scopes.get(s).base;
        }
        false
    }

    /// Warns once per reference when `target` carries `[deprecated]`.
    fn warn_if_deprecated(&mut self, id: NodeId, target: NodeId, name: &str) {
        if !self.ast.get(target).qualifiers.contains(AstQualifiers::DEPRECATED) {
            return;
        }
        let loc = self.ast.get(id).location.clone();
        self.errors.on_warning(CompileWarning {
            id: WarningId::Deprecated,
            message: format!("'{name}' is deprecated"),
            loc: SourceLocation::new(loc.file, loc.line, loc.column),
        });
    }

    fn type_error(&mut self, id: NodeId, message: String) {
        let loc = self.ast.get(id).location.clone();
        self.errors.on_error(CompileError::Type {
            message,
            loc: SourceLocation::new(loc.file, loc.line, loc.column),
        });
    }

    /// step 5: built-in subscript for dynamic arrays/static
    /// arrays/strings, else operator `[]` lookup, else single-member
    /// struct degrades to that member.
    fn resolve_index(&mut self, id: NodeId, base: NodeId, _index: NodeId) -> Status {
        let Some(base_qtype) = self.ast.get(base).qtype else {
            return Status::Resolved;
        };
        let dt = self.types.get(base_qtype.ty);
        match dt.kind {
            DataTypeKind::DynamicArray | DataTypeKind::StaticArray | DataTypeKind::ArrayRef => {
                let elem = dt.elem_type;
                self.ast.get_mut(id).qtype = elem;
                self.ast.get_mut(id).flags |= AstFlags::LVALUE;
                Status::Resolved
            }
            DataTypeKind::String => {
                self.set_elementary(id, DataTypeKind::Char);
                Status::Resolved
            }
            DataTypeKind::Struct | DataTypeKind::Class => {
                let struct_scope = dt.struct_scope;
                let single_member = if dt.members.len() == 1 {
                    Some(dt.members[0].qtype)
                } else {
                    None
                };
                let type_name = dt.name.clone();
                if let Some(scope) = struct_scope {
                    if let Some(nodes) = self.scopes.get(scope).operators.get("[]").cloned() {
                        if let Some(&first) = nodes.first() {
                            self.ast.get_mut(id).qtype = self.ast.get(first).qtype;
                            return Status::Resolved;
                        }
                    }
                }
                if let Some(q) = single_member {
                    self.ast.get_mut(id).qtype = Some(q);
                    return Status::Resolved;
                }
                self.name_error(id, format!("'{type_name}' is not indexable"));
                Status::Resolved
            }
            _ => {
                let type_name = dt.name.clone();
                self.name_error(id, format!("'{type_name}' is not indexable"));
                Status::Resolved
            }
        }
    }

    /// step 6: resolve `callee` to a function and adopt its
    /// return type. Overload selection is simplified to "argument count
    /// matches (accounting for defaults)" -- exact-match-then-promotion
    /// ranking is a codegen-time concern this front end doesn't need to
    /// settle to produce a stable `target`.
    fn resolve_call(&mut self, id: NodeId, callee: NodeId, args: &[NodeId]) -> Status {
        let Some(target) = self.ast.get(callee).target else {
            return Status::Resolved;
        };
        if !matches!(self.ast.get(target).kind, AstNodeKind::FuncDecl { .. }) {
            return Status::Resolved;
        }
        let params: Vec<NodeId> = self
            .ast
            .get(target)
            .children
            .iter()
            .copied()
            .filter(|&c| matches!(self.ast.get(c).kind, AstNodeKind::Param { .. }))
            .collect();
        let has_defaults = params.iter().any(|&p| {
            matches!(
                &self.ast.get(p).kind,
                AstNodeKind::Param { default: Some(_), .. }
            )
        });
        if params.len() != args.len() && !has_defaults {
            self.name_error(
                id,
                format!(
                    "call has {} arguments, function expects {}",
                    args.len(),
                    params.len()
                ),
            );
        }
        let body_block = self
            .ast
            .get(target)
            .children
            .iter()
            .copied()
            .find(|&c| matches!(self.ast.get(c).kind, AstNodeKind::Block));
        let ret_qtype = body_block
            .and_then(|b| self.ast.get(b).qtype)
            .or(self.ast.get(target).qtype);
        self.ast.get_mut(id).qtype = ret_qtype;
        Status::Resolved
    }

    /// step 7: once both operands resolved, if the left
    /// operand is a struct/class, search its `operators` table; an
    /// operator whose parameter isn't marked `const` can't bind a
    /// `const` left operand.
    fn resolve_operator(&mut self, id: NodeId, lhs: NodeId) -> Status {
        let Some(lhs_qtype) = self.ast.get(lhs).qtype else {
            return Status::Resolved;
        };
        let dt = self.types.get(lhs_qtype.ty);
        if !matches!(dt.kind, DataTypeKind::Struct | DataTypeKind::Class) {
            self.ast.get_mut(id).qtype = Some(lhs_qtype);
            return Status::Resolved;
        }
        let struct_scope = dt.struct_scope;
        let op_text = match &self.ast.get(id).kind {
            AstNodeKind::Binary { op, .. } | AstNodeKind::Assign { op, .. } => op.clone(),
            _ => return Status::Resolved,
        };
        if let Some(scope) = struct_scope {
            if let Some(candidates) = self.scopes.get(scope).operators.get(&op_text).cloned() {
                let chosen = candidates.into_iter().find(|&c| {
                    let takes_const = self
                        .ast
                        .get(c)
                        .qualifiers
                        .contains(crate::ast::AstQualifiers::CONST);
                    !lhs_qtype.is_const() || takes_const
                });
                if let Some(chosen) = chosen {
                    self.ast.get_mut(id).qtype = self.ast.get(chosen).qtype;
                    return Status::Resolved;
                }
            }
        }
        self.ast.get_mut(id).qtype = Some(lhs_qtype);
        Status::Resolved
    }

    /// The scope a declaration node introduces, for `A::B` resolution.
    fn scope_of_node(&self, node: NodeId) -> Option<ScopeId> {
        match &self.ast.get(node).kind {
            AstNodeKind::ClassDecl { scope, .. }
            | AstNodeKind::StructDecl { scope, .. }
            | AstNodeKind::EnumDecl { scope, .. }
            | AstNodeKind::FuncDecl { scope, .. } => Some(*scope),
            _ => self.ast.get(node).scope_ref,
        }
    }

    fn name_error(&mut self, id: NodeId, message: String) {
        let loc = self.ast.get(id).location.clone();
        self.errors.on_error(CompileError::Name {
            message,
            loc: SourceLocation::new(loc.file, loc.line, loc.column),
        });
    }

    fn report_unresolved(&mut self, root: NodeId) {
        for id in self.ast.iter_preorder(root).collect::<Vec<_>>() {
            if !self.ast.get(id).is_resolved() {
                self.name_error(id, "could not resolve this expression".to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstArena, AstNode};
    use crate::errors::CollectingErrorHandler;
    use crate::scope::{NamedScope, ScopeKind};
    use crate::token::TokenLocation;

    fn loc() -> TokenLocation {
        TokenLocation::new("t.le", 1, 1)
    }

    #[test]
    fn simple_identifier_resolves_to_its_declaration() {
        let mut ast = AstArena::new();
        let mut scopes = ScopeArena::new();
        let mut types = TypePool::new();
        let mut handler = CollectingErrorHandler::new();

        let global = scopes.alloc(NamedScope::new("global", ScopeKind::Global, None));
        let decl = ast.add(
            AstNode::new(
                AstNodeKind::VarDecl {
                    name: "x".to_string(),
                    qtype: Some(QDataType::new(types.elementary(DataTypeKind::I32))),
                },
                loc(),
            ),
            None,
        );
        scopes.get_mut(global).declare("x", Member::Node(decl));

        let use_site = ast.add(AstNode::new(AstNodeKind::Ident("x".to_string()), loc()), None);
        let root = ast.add(AstNode::new(AstNodeKind::Program, loc()), None);
        ast.get_mut(root).children = vec![decl, use_site];
        ast.get_mut(decl).parent = Some(root);
        ast.get_mut(use_site).parent = Some(root);

        let mut resolver = Resolver::new(&mut ast, &mut scopes, &mut types, &mut handler);
        let ok = resolver.resolve_program(root, global);

        assert!(ok);
        assert_eq!(ast.get(use_site).target, Some(decl));
    }

    #[test]
    fn undeclared_identifier_is_a_name_error() {
        let mut ast = AstArena::new();
        let mut scopes = ScopeArena::new();
        let mut types = TypePool::new();
        let mut handler = CollectingErrorHandler::new();

        let global = scopes.alloc(NamedScope::new("global", ScopeKind::Global, None));
        let use_site = ast.add(
            AstNode::new(AstNodeKind::Ident("missing".to_string()), loc()),
            None,
        );
        let root = ast.add(AstNode::new(AstNodeKind::Program, loc()), None);
        ast.get_mut(root).children = vec![use_site];
        ast.get_mut(use_site).parent = Some(root);

        let mut resolver = Resolver::new(&mut ast, &mut scopes, &mut types, &mut handler);
        resolver.resolve_program(root, global);

        assert!(handler.has_errors());
    }

    #[test]
    fn member_access_looks_up_struct_scope() {
        let mut ast = AstArena::new();
        let mut scopes = ScopeArena::new();
        let mut types = TypePool::new();
        let mut handler = CollectingErrorHandler::new();

        let global = scopes.alloc(NamedScope::new("global", ScopeKind::Global, None));
        let struct_scope = scopes.alloc(NamedScope::new("Point", ScopeKind::Struct, Some(global)));
        let field_ty = QDataType::new(types.elementary(DataTypeKind::I32));
        let field = ast.add(
            AstNode::new(
                AstNodeKind::VarDecl {
                    name: "x".to_string(),
                    qtype: Some(field_ty),
                },
                loc(),
            ),
            None,
        );
        scopes.get_mut(struct_scope).declare("x", Member::Node(field));

        let struct_ty = types.declare_composite(DataTypeKind::Struct, "Point");
        types.set_struct_scope(struct_ty, struct_scope);
        types.set_members(
            struct_ty,
            vec![crate::types::Member {
                name: "x".to_string(),
                qtype: field_ty,
                offset: 0,
                bit_offset: None,
            }],
            4,
            4,
        );

        let var = ast.add(
            AstNode::new(
                AstNodeKind::VarDecl {
                    name: "p".to_string(),
                    qtype: Some(QDataType::new(struct_ty)),
                },
                loc(),
            ),
            None,
        );
        scopes.get_mut(global).declare("p", Member::Node(var));

        let base = ast.add(AstNode::new(AstNodeKind::Ident("p".to_string()), loc()), None);
        let member = ast.add(
            AstNode::new(
                AstNodeKind::Member {
                    base,
                    name: "x".to_string(),
                },
                loc(),
            ),
            None,
        );
        ast.get_mut(member).children = vec![base];
        ast.get_mut(base).parent = Some(member);

        let root = ast.add(AstNode::new(AstNodeKind::Program, loc()), None);
        ast.get_mut(root).children = vec![var, member];
        ast.get_mut(var).parent = Some(root);
        ast.get_mut(member).parent = Some(root);

        let mut resolver = Resolver::new(&mut ast, &mut scopes, &mut types, &mut handler);
        resolver.resolve_program(root, global);

        assert_eq!(ast.get(member).target, Some(field));
        assert!(!handler.has_errors());
    }

    #[test]
    fn private_member_access_from_outside_the_class_is_a_type_error() {
        let mut ast = AstArena::new();
        let mut scopes = ScopeArena::new();
        let mut types = TypePool::new();
        let mut handler = CollectingErrorHandler::new();

        let global = scopes.alloc(NamedScope::new("global", ScopeKind::Global, None));
        let struct_scope = scopes.alloc(NamedScope::new("Point", ScopeKind::Struct, Some(global)));
        let field_ty = QDataType::new(types.elementary(DataTypeKind::I32));
        let field = ast.add(
            AstNode::new(
                AstNodeKind::VarDecl {
                    name: "x".to_string(),
                    qtype: Some(field_ty),
                },
                loc(),
            ),
            None,
        );
        ast.get_mut(field).qualifiers = AstQualifiers::PRIVATE;
        scopes.get_mut(struct_scope).declare("x", Member::Node(field));

        let struct_ty = types.declare_composite(DataTypeKind::Struct, "Point");
        types.set_struct_scope(struct_ty, struct_scope);
        types.set_members(
            struct_ty,
            vec![crate::types::Member {
                name: "x".to_string(),
                qtype: field_ty,
                offset: 0,
                bit_offset: None,
            }],
            4,
            4,
        );

        let var = ast.add(
            AstNode::new(
                AstNodeKind::VarDecl {
                    name: "p".to_string(),
                    qtype: Some(QDataType::new(struct_ty)),
                },
                loc(),
            ),
            None,
        );
        scopes.get_mut(global).declare("p", Member::Node(var));

        let base = ast.add(AstNode::new(AstNodeKind::Ident("p".to_string()), loc()), None);
        let member = ast.add(
            AstNode::new(
                AstNodeKind::Member {
                    base,
                    name: "x".to_string(),
                },
                loc(),
            ),
            None,
        );
        ast.get_mut(member).children = vec![base];
        ast.get_mut(base).parent = Some(member);

        let root = ast.add(AstNode::new(AstNodeKind::Program, loc()), None);
        ast.get_mut(root).children = vec![var, member];
        ast.get_mut(var).parent = Some(root);
        ast.get_mut(member).parent = Some(root);

        let mut resolver = Resolver::new(&mut ast, &mut scopes, &mut types, &mut handler);
        // global scope is not Point or a derivative of it
        resolver.resolve_program(root, global);

        assert!(handler.has_errors());
        assert!(matches!(handler.errors[0], CompileError::Type { .. }));
    }

    #[test]
    fn protected_member_is_reachable_from_a_derived_class_scope() {
        let mut ast = AstArena::new();
        let mut scopes = ScopeArena::new();
        let mut types = TypePool::new();
        let mut handler = CollectingErrorHandler::new();

        let global = scopes.alloc(NamedScope::new("global", ScopeKind::Global, None));
        let base_scope = scopes.alloc(NamedScope::new("Base", ScopeKind::Class, Some(global)));
        let field_ty = QDataType::new(types.elementary(DataTypeKind::I32));
        let field = ast.add(
            AstNode::new(
                AstNodeKind::VarDecl {
                    name: "x".to_string(),
                    qtype: Some(field_ty),
                },
                loc(),
            ),
            None,
        );
        ast.get_mut(field).qualifiers = AstQualifiers::PROTECTED;
        scopes.get_mut(base_scope).declare("x", Member::Node(field));

        let mut derived_scope_node = NamedScope::new("Derived", ScopeKind::Class, Some(global));
        derived_scope_node.base = Some(base_scope);
        let derived_scope = scopes.alloc(derived_scope_node);

        let struct_ty = types.declare_composite(DataTypeKind::Class, "Base");
        types.set_struct_scope(struct_ty, base_scope);
        types.set_members(
            struct_ty,
            vec![crate::types::Member {
                name: "x".to_string(),
                qtype: field_ty,
                offset: 0,
                bit_offset: None,
            }],
            4,
            4,
        );

        let var = ast.add(
            AstNode::new(
                AstNodeKind::VarDecl {
                    name: "p".to_string(),
                    qtype: Some(QDataType::new(struct_ty)),
                },
                loc(),
            ),
            None,
        );
        scopes.get_mut(global).declare("p", Member::Node(var));

        let base_use = ast.add(AstNode::new(AstNodeKind::Ident("p".to_string()), loc()), None);
        let member = ast.add(
            AstNode::new(
                AstNodeKind::Member {
                    base: base_use,
                    name: "x".to_string(),
                },
                loc(),
            ),
            None,
        );
        ast.get_mut(member).children = vec![base_use];
        ast.get_mut(base_use).parent = Some(member);

        let root = ast.add(AstNode::new(AstNodeKind::Program, loc()), None);
        ast.get_mut(root).children = vec![var, member];
        ast.get_mut(var).parent = Some(root);
        ast.get_mut(member).parent = Some(root);
        // scope_ref overrides the lexical scope handed to this node's
        // children, as if the access were written inside one of the
        // derived class's own methods.
        ast.get_mut(root).scope_ref = Some(derived_scope);

        let mut resolver = Resolver::new(&mut ast, &mut scopes, &mut types, &mut handler);
        resolver.resolve_program(root, global);

        assert_eq!(ast.get(member).target, Some(field));
        assert!(!handler.has_errors());
    }

    #[test]
    fn referencing_a_deprecated_declaration_warns() {
        let mut ast = AstArena::new();
        let mut scopes = ScopeArena::new();
        let mut types = TypePool::new();
        let mut handler = CollectingErrorHandler::new();

        let global = scopes.alloc(NamedScope::new("global", ScopeKind::Global, None));
        let decl = ast.add(
            AstNode::new(
                AstNodeKind::VarDecl {
                    name: "old".to_string(),
                    qtype: Some(QDataType::new(types.elementary(DataTypeKind::I32))),
                },
                loc(),
            ),
            None,
        );
        ast.get_mut(decl).qualifiers = AstQualifiers::DEPRECATED;
        scopes.get_mut(global).declare("old", Member::Node(decl));

        let use_site = ast.add(AstNode::new(AstNodeKind::Ident("old".to_string()), loc()), None);
        let root = ast.add(AstNode::new(AstNodeKind::Program, loc()), None);
        ast.get_mut(root).children = vec![decl, use_site];
        ast.get_mut(decl).parent = Some(root);
        ast.get_mut(use_site).parent = Some(root);

        let mut resolver = Resolver::new(&mut ast, &mut scopes, &mut types, &mut handler);
        let ok = resolver.resolve_program(root, global);

        assert!(ok);
        assert!(!handler.has_errors());
        assert_eq!(handler.warnings.len(), 1);
        assert_eq!(handler.warnings[0].id, crate::errors::WarningId::Deprecated);
    }

    #[test]
    fn adl_finds_a_call_callee_from_an_arguments_type_namespace() {
        let mut ast = AstArena::new();
        let mut scopes = ScopeArena::new();
        let mut types = TypePool::new();
        let mut handler = CollectingErrorHandler::new();

        let global = scopes.alloc(NamedScope::new("global", ScopeKind::Global, None));
        let struct_scope = scopes.alloc(NamedScope::new("Point", ScopeKind::Struct, Some(global)));
        let struct_ty = types.declare_composite(DataTypeKind::Struct, "Point");
        types.set_struct_scope(struct_ty, struct_scope);
        types.set_members(struct_ty, vec![], 4, 4);

        // `void print(Point p)` declared alongside `Point` in the global
        // namespace -- never imported into the call site's own scope, only
        // reachable because one of the call's arguments has type `Point`.
        let func_scope = scopes.alloc(NamedScope::new("print", ScopeKind::Function, Some(global)));
        let func = ast.add(
            AstNode::new(
                AstNodeKind::FuncDecl {
                    name: "print".to_string(),
                    scope: func_scope,
                },
                loc(),
            ),
            None,
        );
        scopes.get_mut(global).declare("print", Member::Node(func));

        let var = ast.add(
            AstNode::new(
                AstNodeKind::VarDecl {
                    name: "p".to_string(),
                    qtype: Some(QDataType::new(struct_ty)),
                },
                loc(),
            ),
            None,
        );

        // An isolated local scope with no parent: `p` is declared directly
        // in it so the argument still resolves, but `print` is nowhere in
        // its lookup chain -- only ADL, driven by `p`'s type, can find it.
        let local_scope = scopes.alloc(NamedScope::new("block", ScopeKind::Local, None));
        scopes.get_mut(local_scope).declare("p", Member::Node(var));

        let callee = ast.add(AstNode::new(AstNodeKind::Ident("print".to_string()), loc()), None);
        let arg = ast.add(AstNode::new(AstNodeKind::Ident("p".to_string()), loc()), None);
        let call = ast.add(
            AstNode::new(
                AstNodeKind::Call {
                    callee,
                    args: vec![arg],
                },
                loc(),
            ),
            None,
        );
        ast.get_mut(call).children = vec![callee, arg];
        ast.get_mut(callee).parent = Some(call);
        ast.get_mut(arg).parent = Some(call);

        let root = ast.add(AstNode::new(AstNodeKind::Program, loc()), None);
        ast.get_mut(root).children = vec![func, var, call];
        ast.get_mut(func).parent = Some(root);
        ast.get_mut(var).parent = Some(root);
        ast.get_mut(call).parent = Some(root);
        // The call itself resolves against a local scope with no path to
        // the global `print`, forcing ADL to be the only way in.
        ast.get_mut(call).scope_ref = Some(local_scope);

        let mut resolver = Resolver::new(&mut ast, &mut scopes, &mut types, &mut handler);
        resolver.resolve_program(root, global);

        assert!(!handler.has_errors(), "unexpected errors: {:?}", handler.errors);
        assert_eq!(ast.get(callee).target, Some(func));
    }
}
