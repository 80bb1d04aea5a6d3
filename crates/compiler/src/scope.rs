//! Named scopes
//!
//! Scopes form a tree held in one arena per [`crate::compiler::Compiler`]
//! instance and are referred to by [`ScopeId`] index, mirroring the
//! [`crate::ast`] arena discipline.

use std::collections::HashMap;

use crate::ast::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

/// The scope kind determines lookup and storage behavior: `function`/`args`
/// scopes own a stack frame layout, `loop`/`switch` scopes own
/// break/continue targets, etc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Namespace,
    Class,
    Struct,
    Function,
    Args,
    Local,
    Loop,
    Switch,
}

/// A symbol visible for lookup within a scope: either a nested named
/// scope (namespace/class) or a declaration node (variable/function).
#[derive(Debug, Clone, Copy)]
pub enum Member {
    Scope(ScopeId),
    Node(NodeId),
}

#[derive(Debug, Clone, Default)]
pub struct LocalVar {
    pub name: String,
    pub offset: u32,
    pub size: u32,
    pub align: u32,
}

#[derive(Debug, Clone)]
pub struct NamedScope {
    pub name: String,
    /// `using`-introduced alias name, if any.
    pub name_alias: Option<String>,
    pub parent: Option<ScopeId>,
    /// Base class scope, for `class`/`struct` scopes with inheritance.
    pub base: Option<ScopeId>,
    pub kind: ScopeKind,
    /// AST node that introduced this scope (class/function/block decl).
    pub node: Option<NodeId>,
    /// Insertion-ordered member table: lookup must see declarations in
    /// source order for shadowing/redeclaration diagnostics.
    members: Vec<(String, Member)>,
    member_index: HashMap<String, usize>,
    pub named_scopes: Vec<ScopeId>,
    pub scopes: Vec<ScopeId>,
    pub labels: HashMap<String, NodeId>,
    /// Overloaded operator declarations visible in this scope, keyed by
    /// operator token text (`"+"`, `"[]"`, ...).
    pub operators: HashMap<String, Vec<NodeId>>,
    pub local_vars: Vec<LocalVar>,
    pub var_ofs: u32,
    pub var_size: u32,
    pub max_var_align: u32,
    pub max_var_size: u32,
    /// `defer` statements registered in this scope, run in reverse order
    /// on scope exit.
    pub deferred: Vec<NodeId>,
    pub break_handles: Vec<NodeId>,
    pub continue_handles: Vec<NodeId>,
    /// Class scopes capture an implicit `this` for state methods; set once
    /// a state block has been entered.
    pub block_this: bool,
    pub need_extra_scope: bool,
    pub ctor_defined: bool,
    /// Names an `ignores` clause on a (state) class hides from its base
    /// chain, so a derived scope can declare its own unrelated member
    /// under a name the base also happens to use.
    pub ignores: Vec<String>,
}

impl NamedScope {
    pub fn new(name: impl Into<String>, kind: ScopeKind, parent: Option<ScopeId>) -> Self {
        NamedScope {
            name: name.into(),
            name_alias: None,
            parent,
            base: None,
            kind,
            node: None,
            members: Vec::new(),
            member_index: HashMap::new(),
            named_scopes: Vec::new(),
            scopes: Vec::new(),
            labels: HashMap::new(),
            operators: HashMap::new(),
            local_vars: Vec::new(),
            var_ofs: 0,
            var_size: 0,
            max_var_align: 1,
            max_var_size: 0,
            deferred: Vec::new(),
            break_handles: Vec::new(),
            continue_handles: Vec::new(),
            block_this: false,
            need_extra_scope: false,
            ctor_defined: false,
            ignores: Vec::new(),
        }
    }

    /// Returns `false` if `name` already exists in this scope's own member
    /// table (a duplicate-declaration error).
    pub fn declare(&mut self, name: impl Into<String>, member: Member) -> bool {
        let name = name.into();
        if self.member_index.contains_key(&name) {
            return false;
        }
        self.member_index.insert(name.clone(), self.members.len());
        self.members.push((name, member));
        true
    }

    pub fn find_local(&self, name: &str) -> Option<Member> {
        self.member_index.get(name).map(|&i| self.members[i].1)
    }

    pub fn members(&self) -> impl Iterator<Item = &(String, Member)> {
        self.members.iter()
    }

    /// Rewrites every node/scope reference this scope holds through the
    /// given remap tables.
    pub fn remap(&mut self, node_map: &HashMap<NodeId, NodeId>, scope_map: &HashMap<ScopeId, ScopeId>) {
        if let Some(n) = self.node {
            if let Some(&new_n) = node_map.get(&n) {
                self.node = Some(new_n);
            }
        }
        if let Some(p) = self.parent {
            if let Some(&new_p) = scope_map.get(&p) {
                self.parent = Some(new_p);
            }
        }
        if let Some(b) = self.base {
            if let Some(&new_b) = scope_map.get(&b) {
                self.base = Some(new_b);
            }
        }
        for (_, member) in self.members.iter_mut() {
            match member {
                Member::Node(n) => {
                    if let Some(&new_n) = node_map.get(n) {
                        *n = new_n;
                    }
                }
                Member::Scope(s) => {
                    if let Some(&new_s) = scope_map.get(s) {
                        *s = new_s;
                    }
                }
            }
        }
        for s in self.named_scopes.iter_mut().chain(self.scopes.iter_mut()) {
            if let Some(&new_s) = scope_map.get(s) {
                *s = new_s;
            }
        }
        for n in self.labels.values_mut() {
            if let Some(&new_n) = node_map.get(n) {
                *n = new_n;
            }
        }
        for nodes in self.operators.values_mut() {
            for n in nodes.iter_mut() {
                if let Some(&new_n) = node_map.get(n) {
                    *n = new_n;
                }
            }
        }
        for n in self
            .deferred
            .iter_mut()
            .chain(self.break_handles.iter_mut())
            .chain(self.continue_handles.iter_mut())
        {
            if let Some(&new_n) = node_map.get(n) {
                *n = new_n;
            }
        }
    }
}

/// Arena of all scopes in one compiler instance.
#[derive(Debug, Default)]
pub struct ScopeArena {
    scopes: Vec<NamedScope>,
}

impl ScopeArena {
    pub fn new() -> Self {
        ScopeArena { scopes: Vec::new() }
    }

    pub fn alloc(&mut self, scope: NamedScope) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(scope);
        id
    }

    pub fn get(&self, id: ScopeId) -> &NamedScope {
        &self.scopes[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ScopeId) -> &mut NamedScope {
        &mut self.scopes[id.0 as usize]
    }

    /// `FindSymbol`: walk `scope` then its ancestors, returning
    /// the first match. Does not cross class/struct boundaries into outer
    /// namespaces when resolving `this`-qualified lookups -- callers that
    /// need that composition do it themselves (`FindSymbolFull` below).
    pub fn find_symbol(&self, scope: ScopeId, name: &str) -> Option<Member> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = self.get(id);
            if let Some(m) = s.find_local(name) {
                return Some(m);
            }
            current = s.parent;
        }
        None
    }

    /// `FindSymbolFull`: like [`Self::find_symbol`] but also
    /// searches along the base-class chain when the current or an
    /// enclosing scope is a `class`/`struct` scope, modelling inherited
    /// member visibility.
    pub fn find_symbol_full(&self, scope: ScopeId, name: &str) -> Option<Member> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = self.get(id);
            if let Some(m) = s.find_local(name) {
                return Some(m);
            }
            if matches!(s.kind, ScopeKind::Class | ScopeKind::Struct) {
                let mut base = s.base;
                while let Some(base_id) = base {
                    let base_scope = self.get(base_id);
                    if let Some(m) = base_scope.find_local(name) {
                        return Some(m);
                    }
                    base = base_scope.base;
                }
            }
            current = s.parent;
        }
        None
    }

    /// Explicit member access (`a.b`): `find_local` on `scope` itself,
    /// then up the base chain, honoring `scope`'s own `ignores` list --
    /// a name listed there is treated as though the base never declared
    /// it, letting a state class shadow a same-named base member with
    /// its own unrelated declaration. Returns the scope the match was
    /// actually found in, so callers can check visibility against the
    /// declaring scope rather than the accessed one.
    pub fn find_member(&self, scope: ScopeId, name: &str) -> Option<(Member, ScopeId)> {
        if let Some(m) = self.get(scope).find_local(name) {
            return Some((m, scope));
        }
        if self.get(scope).ignores.iter().any(|ignored| ignored == name) {
            return None;
        }
        let mut base = self.get(scope).base;
        while let Some(base_id) = base {
            if let Some(m) = self.get(base_id).find_local(name) {
                return Some((m, base_id));
            }
            base = self.get(base_id).base;
        }
        None
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_declaration_in_same_scope_is_rejected() {
        let mut scope = NamedScope::new("fn", ScopeKind::Function, None);
        assert!(scope.declare("x", Member::Node(NodeId(0))));
        assert!(!scope.declare("x", Member::Node(NodeId(1))));
    }

    #[test]
    fn find_symbol_walks_up_parent_chain() {
        let mut arena = ScopeArena::new();
        let global = arena.alloc(NamedScope::new("global", ScopeKind::Global, None));
        arena
            .get_mut(global)
            .declare("g_var", Member::Node(NodeId(7)));
        let func = arena.alloc(NamedScope::new("f", ScopeKind::Function, Some(global)));

        assert!(matches!(
            arena.find_symbol(func, "g_var"),
            Some(Member::Node(NodeId(7)))
        ));
        assert!(arena.find_symbol(func, "missing").is_none());
    }

    #[test]
    fn find_symbol_full_searches_base_class_chain() {
        let mut arena = ScopeArena::new();
        let base = arena.alloc(NamedScope::new("Base", ScopeKind::Class, None));
        arena
            .get_mut(base)
            .declare("field", Member::Node(NodeId(1)));
        let mut derived = NamedScope::new("Derived", ScopeKind::Class, None);
        derived.base = Some(base);
        let derived_id = arena.alloc(derived);

        assert!(matches!(
            arena.find_symbol_full(derived_id, "field"),
            Some(Member::Node(NodeId(1)))
        ));
        assert!(arena.find_symbol(derived_id, "field").is_none());
    }

    #[test]
    fn find_member_crosses_the_base_chain_and_reports_its_declaring_scope() {
        let mut arena = ScopeArena::new();
        let base = arena.alloc(NamedScope::new("Base", ScopeKind::Class, None));
        arena.get_mut(base).declare("field", Member::Node(NodeId(1)));
        let mut derived = NamedScope::new("Derived", ScopeKind::Class, None);
        derived.base = Some(base);
        let derived_id = arena.alloc(derived);

        let (member, declaring_scope) = arena.find_member(derived_id, "field").unwrap();
        assert!(matches!(member, Member::Node(NodeId(1))));
        assert_eq!(declaring_scope, base);
    }

    #[test]
    fn find_member_hides_a_base_member_named_in_an_ignores_list() {
        let mut arena = ScopeArena::new();
        let base = arena.alloc(NamedScope::new("Base", ScopeKind::Class, None));
        arena.get_mut(base).declare("field", Member::Node(NodeId(1)));
        let mut derived = NamedScope::new("Idle", ScopeKind::Class, None);
        derived.base = Some(base);
        derived.ignores.push("field".to_string());
        let derived_id = arena.alloc(derived);

        assert!(arena.find_member(derived_id, "field").is_none());
        // the base itself is unaffected -- only the ignoring scope stops
        // seeing it.
        assert!(arena.find_member(base, "field").is_some());
    }
}
