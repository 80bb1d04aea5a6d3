//! `VtblGen` / `FixupVtbl`
//!
//! Builds one vtable per class in the AST, inheriting the base class's
//! slots and appending/overriding as the derived class's own methods
//! dictate. Runs to a fixed point: single-inheritance reaches that point
//! in one pass once bases are processed before derived classes (guaranteed
//! by preorder AST visitation, since a class can't be its own ancestor),
//! but the loop structure tolerates a future forward-declared-base
//! extension.

use std::collections::HashMap;

use crate::ast::{AstArena, AstFlags, AstNodeKind, NodeId};
use crate::errors::{CompileError, CompileWarning, ErrorHandler, SourceLocation, WarningId};
use crate::scope::{Member, ScopeArena, ScopeId};

/// One class's vtable: method name -> (slot index, `FuncDecl` node).
#[derive(Debug, Clone, Default)]
pub struct Vtable {
    pub slots: Vec<(String, NodeId)>,
}

impl Vtable {
    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|(n, _)| n == name)
    }
}

pub struct VtblGenerator<'a> {
    ast: &'a mut AstArena,
    scopes: &'a ScopeArena,
    errors: &'a mut dyn ErrorHandler,
    pub vtables: HashMap<ScopeId, Vtable>,
}

impl<'a> VtblGenerator<'a> {
    pub fn new(ast: &'a mut AstArena, scopes: &'a ScopeArena, errors: &'a mut dyn ErrorHandler) -> Self {
        VtblGenerator {
            ast,
            scopes,
            errors,
            vtables: HashMap::new(),
        }
    }

    /// Runs until a pass produces no new vtable entries.
    pub fn run(&mut self, root: NodeId) {
        loop {
            let before: usize = self.vtables.values().map(|v| v.slots.len()).sum();
            for id in self.ast.iter_preorder(root).collect::<Vec<_>>() {
                if let AstNodeKind::ClassDecl { scope, .. } = self.ast.get(id).kind {
                    self.build_class_vtable(scope);
                }
            }
            let after: usize = self.vtables.values().map(|v| v.slots.len()).sum();
            if after == before {
                break;
            }
        }
    }

    fn build_class_vtable(&mut self, scope: ScopeId) {
        if self.vtables.contains_key(&scope) {
            return;
        }
        let base = self.scopes.get(scope).base;
        let mut vtbl = match base {
            Some(base_scope) => {
                self.build_class_vtable(base_scope);
                self.vtables.get(&base_scope).cloned().unwrap_or_default()
            }
            None => Vtable::default(),
        };

        let virtuals: Vec<(String, NodeId)> = self
            .scopes
            .get(scope)
            .members()
            .filter_map(|(name, m)| match m {
                Member::Node(n) => Some((name.clone(), *n)),
                _ => None,
            })
            .filter(|(_, n)| {
                matches!(self.ast.get(*n).kind, AstNodeKind::FuncDecl { .. })
                    && self.ast.get(*n).flags.contains(AstFlags::VIRTUAL)
            })
            .collect();

        for (name, node) in virtuals {
            match vtbl.slot_of(&name) {
                Some(idx) => {
                    let (_, base_node) = vtbl.slots[idx];
                    if self.ast.get(base_node).qualifiers.contains(crate::ast::AstQualifiers::FINAL) {
                        self.error_overrides_final(node, &name);
                    } else if !self.ast.get(node).flags.contains(AstFlags::OVERRIDE) {
                        self.warn_missing_override(node, &name);
                    }
                    vtbl.slots[idx] = (name, node);
                }
                None => vtbl.slots.push((name, node)),
            }
        }

        self.vtables.insert(scope, vtbl);
    }

    fn error_overrides_final(&mut self, node: NodeId, name: &str) {
        let loc = self.ast.get(node).location.clone();
        self.errors.on_error(CompileError::Type {
            message: format!("'{name}' overrides a base method marked 'final'"),
            loc: SourceLocation::new(loc.file, loc.line, loc.column),
        });
    }

    fn warn_missing_override(&mut self, node: NodeId, name: &str) {
        let loc = self.ast.get(node).location.clone();
        self.errors.on_warning(CompileWarning {
            id: WarningId::MissingOverride,
            message: format!("'{name}' overrides a base virtual but is not marked 'override'"),
            loc: SourceLocation::new(loc.file, loc.line, loc.column),
        });
    }

    /// `FixupVtbl`: patches each slot's node reference
    /// into a stable function index now that every class's final vtable
    /// shape is known. Returns an error if any slot still points at an
    /// unresolved (`target.is_none()`) function declaration.
    pub fn fixup(&mut self, function_index: &HashMap<NodeId, u32>) -> bool {
        let mut ok = true;
        for vtbl in self.vtables.values() {
            for (name, node) in &vtbl.slots {
                if !function_index.contains_key(node) {
                    let loc = self.ast.get(*node).location.clone();
                    self.errors.on_error(CompileError::Codegen {
                        message: format!("vtable slot for '{name}' has no assigned function address"),
                        loc: SourceLocation::new(loc.file, loc.line, loc.column),
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
    use crate::scope::{NamedScope, ScopeKind};
    use crate::token::TokenLocation;

    fn loc() -> TokenLocation {
        TokenLocation::new("t.le", 1, 1)
    }

    #[test]
    fn derived_override_replaces_base_slot_at_same_index() {
        let mut ast = AstArena::new();
        let mut scopes = ScopeArena::new();
        let mut handler = CollectingErrorHandler::new();

        let base_scope = scopes.alloc(NamedScope::new("A", ScopeKind::Class, None));
        let base_f = ast.add(
            AstNode::new(
                AstNodeKind::FuncDecl {
                    name: "f".to_string(),
                    scope: scopes.alloc(NamedScope::new("f", ScopeKind::Function, None)),
                },
                loc(),
            ),
            None,
        );
        ast.get_mut(base_f).flags |= AstFlags::VIRTUAL;
        scopes.get_mut(base_scope).declare("f", Member::Node(base_f));

        let mut derived_scope_obj = NamedScope::new("B", ScopeKind::Class, None);
        derived_scope_obj.base = Some(base_scope);
        let derived_scope = scopes.alloc(derived_scope_obj);
        let derived_f = ast.add(
            AstNode::new(
                AstNodeKind::FuncDecl {
                    name: "f".to_string(),
                    scope: scopes.alloc(NamedScope::new("f", ScopeKind::Function, None)),
                },
                loc(),
            ),
            None,
        );
        ast.get_mut(derived_f).flags |= AstFlags::VIRTUAL | AstFlags::OVERRIDE;
        scopes.get_mut(derived_scope).declare("f", Member::Node(derived_f));

        let root = ast.add(AstNode::new(AstNodeKind::Program, loc()), None);
        let base_decl = ast.add(
            AstNode::new(
                AstNodeKind::ClassDecl {
                    name: "A".to_string(),
                    scope: base_scope,
                    base_name: None,
                },
                loc(),
            ),
            Some(root),
        );
        ast.get_mut(root).children.push(base_decl);
        let derived_decl = ast.add(
            AstNode::new(
                AstNodeKind::ClassDecl {
                    name: "B".to_string(),
                    scope: derived_scope,
                    base_name: None,
                },
                loc(),
            ),
            Some(root),
        );
        ast.get_mut(root).children.push(derived_decl);

        let mut gen = VtblGenerator::new(&mut ast, &scopes, &mut handler);
        gen.run(root);

        let derived_vtbl = gen.vtables.get(&derived_scope).unwrap();
        assert_eq!(derived_vtbl.slots.len(), 1);
        assert_eq!(derived_vtbl.slot_of("f"), Some(0));
        assert_eq!(derived_vtbl.slots[0].1, derived_f);
        assert!(!handler.has_errors());
    }

    #[test]
    fn missing_override_keyword_warns() {
        let mut ast = AstArena::new();
        let mut scopes = ScopeArena::new();
        let mut handler = CollectingErrorHandler::new();

        let base_scope = scopes.alloc(NamedScope::new("A", ScopeKind::Class, None));
        let base_f = ast.add(
            AstNode::new(
                AstNodeKind::FuncDecl {
                    name: "f".to_string(),
                    scope: scopes.alloc(NamedScope::new("f", ScopeKind::Function, None)),
                },
                loc(),
            ),
            None,
        );
        ast.get_mut(base_f).flags |= AstFlags::VIRTUAL;
        scopes.get_mut(base_scope).declare("f", Member::Node(base_f));

        let mut derived_scope_obj = NamedScope::new("B", ScopeKind::Class, None);
        derived_scope_obj.base = Some(base_scope);
        let derived_scope = scopes.alloc(derived_scope_obj);
        let derived_f = ast.add(
            AstNode::new(
                AstNodeKind::FuncDecl {
                    name: "f".to_string(),
                    scope: scopes.alloc(NamedScope::new("f", ScopeKind::Function, None)),
                },
                loc(),
            ),
            None,
        );
        ast.get_mut(derived_f).flags |= AstFlags::VIRTUAL; // no OVERRIDE
        scopes.get_mut(derived_scope).declare("f", Member::Node(derived_f));

        let root = ast.add(AstNode::new(AstNodeKind::Program, loc()), None);
        let base_decl = ast.add(
            AstNode::new(
                AstNodeKind::ClassDecl {
                    name: "A".to_string(),
                    scope: base_scope,
                    base_name: None,
                },
                loc(),
            ),
            Some(root),
        );
        ast.get_mut(root).children.push(base_decl);
        let derived_decl = ast.add(
            AstNode::new(
                AstNodeKind::ClassDecl {
                    name: "B".to_string(),
                    scope: derived_scope,
                    base_name: None,
                },
                loc(),
            ),
            Some(root),
        );
        ast.get_mut(root).children.push(derived_decl);

        let mut gen = VtblGenerator::new(&mut ast, &scopes, &mut handler);
        gen.run(root);

        assert_eq!(handler.warnings.len(), 1);
        assert_eq!(handler.warnings[0].id, WarningId::MissingOverride);
    }
}
