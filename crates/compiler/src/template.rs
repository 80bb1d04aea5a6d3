//! Template instantiation
//!
//! Runs after the resolver's first fixed point. Walks the tree for
//! `TemplateInstance` nodes, matches each to its `TemplateDecl`, and
//! deep-clones the generic body (AST subtree *and* the scopes it owns)
//! into a concrete instantiation keyed by a mangled name so repeat uses
//! of `Array<int>` share one instance.

use std::collections::HashMap;

use crate::ast::{AstArena, AstFlags, AstNodeKind, NodeId};
use crate::errors::{CompileError, ErrorHandler, SourceLocation};
use crate::scope::{ScopeArena, ScopeId};
use crate::types::{DataTypeId, QDataType, TypePool};

const MAX_PASSES: u32 = 64;

pub struct TemplateInstantiator<'a> {
    ast: &'a mut AstArena,
    scopes: &'a mut ScopeArena,
    types: &'a mut TypePool,
    errors: &'a mut dyn ErrorHandler,
    /// mangled name -> instantiated node, so repeat uses of the same
    /// template+arguments combination share one clone.
    instances: HashMap<String, NodeId>,
}

impl<'a> TemplateInstantiator<'a> {
    pub fn new(
        ast: &'a mut AstArena,
        scopes: &'a mut ScopeArena,
        types: &'a mut TypePool,
        errors: &'a mut dyn ErrorHandler,
    ) -> Self {
        TemplateInstantiator {
            ast,
            scopes,
            types,
            errors,
            instances: HashMap::new(),
        }
    }

    /// Runs instantiation passes until nothing new resolves (nested
    /// templates may need more than one pass: step 3's "nested
    /// unresolved template references are detected and deferred").
    pub fn instantiate_until_fixed_point(&mut self, root: NodeId) -> bool {
        for _ in 0..MAX_PASSES {
            if !self.instantiate_pass(root) {
                return true;
            }
        }
        false
    }

    /// step 1: collect template definitions and instance
    /// sites, step 2-7 applied to each unresolved instance. Returns
    /// whether this pass made progress.
    fn instantiate_pass(&mut self, root: NodeId) -> bool {
        let templates = self.collect_templates(root);
        let instance_sites: Vec<NodeId> = self
            .ast
            .iter_preorder(root)
            .filter(|&id| {
                matches!(self.ast.get(id).kind, AstNodeKind::TemplateInstance { .. })
                    && self.ast.get(id).target.is_none()
            })
            .collect();

        let mut progress = false;
        for site in instance_sites {
            if self.instantiate_one(site, &templates) {
                progress = true;
            }
        }
        progress
    }

    fn collect_templates(&self, root: NodeId) -> HashMap<String, NodeId> {
        let mut map = HashMap::new();
        for id in self.ast.iter_preorder(root) {
            if let AstNodeKind::TemplateDecl { name, .. } = &self.ast.get(id).kind {
                map.insert(name.clone(), id);
            }
        }
        map
    }

    fn instantiate_one(&mut self, site: NodeId, templates: &HashMap<String, NodeId>) -> bool {
        let name = match &self.ast.get(site).kind {
            AstNodeKind::TemplateInstance { name, .. } => name.clone(),
            _ => return false,
        };
        let Some(args) = self.sync_args_from_children(site) else {
            return false;
        };

        // step 3 (deferred case): an argument still carrying the parser's
        // unresolved placeholder type means some upstream name hasn't
        // resolved yet -- wait for a later pass.
        if args.iter().any(|a| a.ty == DataTypeId(0)) {
            return false;
        }

        let Some(&template_node) = templates.get(&name) else {
            self.template_error(site, format!("'{name}' is not a template"));
            return false;
        };
        let params = match &self.ast.get(template_node).kind {
            AstNodeKind::TemplateDecl { params, .. } => params.clone(),
            _ => {
                self.template_error(site, format!("'{name}' is not a template"));
                return false;
            }
        };
        if params.len() != args.len() {
            self.template_error(
                site,
                format!(
                    "'{name}' takes {} type argument(s), {} given",
                    params.len(),
                    args.len()
                ),
            );
            return false;
        }

        let mangled = self.mangle(&name, &args);
        if let Some(&existing) = self.instances.get(&mangled) {
            self.ast.get_mut(site).target = Some(existing);
            return true;
        }

        let new_root = self.clone_template(template_node, &params, &args, &mangled);
        self.instances.insert(mangled, new_root);
        self.ast.get_mut(site).target = Some(new_root);
        self.ast.get_mut(template_node).flags |= AstFlags::SKIP_CODEGEN;
        true
    }

    /// Reconciles `TemplateInstance::args` with its argument-carrier
    /// children (each a `VarDecl` whose `type_name` is the argument's raw
    /// spelling, resolved to a `qtype` by `TypeGenerator` the same way
    /// any other declaration's type text is). A site built with no
    /// children (as in a hand-built test) keeps its constructor-supplied
    /// `args` untouched. Returns `None` while any carrier is still
    /// waiting on its own type to resolve.
    fn sync_args_from_children(&mut self, site: NodeId) -> Option<Vec<QDataType>> {
        let children = self.ast.get(site).children.clone();
        if children.is_empty() {
            return match &self.ast.get(site).kind {
                AstNodeKind::TemplateInstance { args, .. } => Some(args.clone()),
                _ => None,
            };
        }
        let mut resolved = Vec::with_capacity(children.len());
        for c in children {
            resolved.push(self.ast.get(c).qtype?);
        }
        if let AstNodeKind::TemplateInstance { args, .. } = &mut self.ast.get_mut(site).kind {
            *args = resolved.clone();
        }
        Some(resolved)
    }

    /// step 3: canonical mangled name from qualifier-stripped
    /// argument type text.
    fn mangle(&self, name: &str, args: &[QDataType]) -> String {
        let arg_text: Vec<&str> = args.iter().map(|a| self.types.get(a.ty).name.as_str()).collect();
        format!("{name}<{}>", arg_text.join(","))
    }

    /// steps 4-6: deep-clone the template subtree and its
    /// owned scopes, remap every internal reference through the
    /// old->new tables, rebind the formal type parameters, and attach
    /// the clone alongside the original definition.
    fn clone_template(
        &mut self,
        template_node: NodeId,
        params: &[String],
        args: &[QDataType],
        mangled: &str,
    ) -> NodeId {
        let new_parent = self.ast.get(template_node).parent;
        let mut node_map = HashMap::new();
        let mut scope_map: HashMap<ScopeId, ScopeId> = HashMap::new();
        let new_root = self.clone_subtree_remap(template_node, new_parent, &mut node_map, &mut scope_map);

        let mapping: Vec<(NodeId, NodeId)> = node_map.iter().map(|(&o, &n)| (o, n)).collect();
        for &(_, new_id) in &mapping {
            if let Some(t) = self.ast.get(new_id).target {
                if let Some(&new_t) = node_map.get(&t) {
                    self.ast.get_mut(new_id).target = Some(new_t);
                }
            }
            match &mut self.ast.get_mut(new_id).kind {
                AstNodeKind::ClassDecl { scope, .. }
                | AstNodeKind::StructDecl { scope, .. }
                | AstNodeKind::EnumDecl { scope, .. }
                | AstNodeKind::FuncDecl { scope, .. } => {
                    if let Some(&new_s) = scope_map.get(scope) {
                        *scope = new_s;
                    }
                }
                _ => {}
            }
        }
        for &new_scope in scope_map.values() {
            self.scopes.get_mut(new_scope).remap(&node_map, &scope_map);
        }

        // step 5: rebind each formal type parameter's placeholder typedef
        // to the supplied argument, and rewrite any field/parameter/return
        // type text that spells a parameter name directly (the common
        // case: `T x;` inside the template body becomes `int x;`).
        for new_id in self.ast.iter_preorder(new_root).collect::<Vec<_>>() {
            if let AstNodeKind::TypedefDecl { name } = &self.ast.get(new_id).kind {
                if let Some(pos) = params.iter().position(|p| p == name) {
                    self.ast.get_mut(new_id).qtype = Some(args[pos]);
                }
            }
            if let Some(text) = self.ast.get(new_id).type_name.clone() {
                if let Some(rewritten) = substitute_param_text(&text, params, args, self.types) {
                    self.ast.get_mut(new_id).type_name = Some(rewritten);
                }
            }
        }

        // step 6: the clone gets its own composite name so type
        // generation declares a distinct `DataType` instead of colliding
        // with the template's own (still-generic) one.
        for &child in self.ast.get(new_root).children.clone().iter() {
            match &mut self.ast.get_mut(child).kind {
                AstNodeKind::ClassDecl { name, .. }
                | AstNodeKind::StructDecl { name, .. }
                | AstNodeKind::EnumDecl { name, .. } => {
                    *name = mangled.to_string();
                }
                _ => {}
            }
        }

        // `this` instance's own short name resolves to itself from
        // inside its body: declare an alias in the scope cloned
        // alongside the template definition, if any.
        if let Some(scope_ref) = self.ast.get(new_root).scope_ref {
            if let AstNodeKind::TemplateDecl { name, .. } = &self.ast.get(template_node).kind {
                let name = name.clone();
                self.scopes
                    .get_mut(scope_ref)
                    .declare(name, crate::scope::Member::Node(new_root));
            }
        }

        new_root
    }

    fn clone_subtree_remap(
        &mut self,
        root: NodeId,
        new_parent: Option<NodeId>,
        node_map: &mut HashMap<NodeId, NodeId>,
        scope_map: &mut HashMap<ScopeId, ScopeId>,
    ) -> NodeId {
        let mut new_node = self.ast.get(root).clone();
        let children = new_node.children.clone();
        new_node.children = Vec::new();
        new_node.parent = None;
        if let Some(old_scope) = new_node.scope_ref {
            let new_scope = match scope_map.get(&old_scope) {
                Some(&s) => s,
                None => {
                    let cloned = self.scopes.get(old_scope).clone();
                    let s = self.scopes.alloc(cloned);
                    scope_map.insert(old_scope, s);
                    s
                }
            };
            new_node.scope_ref = Some(new_scope);
        }
        let new_id = self.ast.add(new_node, new_parent);
        node_map.insert(root, new_id);
        for child in children {
            self.clone_subtree_remap(child, Some(new_id), node_map, scope_map);
        }
        new_id
    }

    fn template_error(&mut self, site: NodeId, message: String) {
        let loc = self.ast.get(site).location.clone();
        self.errors.on_error(CompileError::Template {
            message,
            loc: SourceLocation::new(loc.file, loc.line, loc.column),
        });
    }
}

/// If `text` (once its `*`/`[]`/`&`/`const` suffixes are peeled off, the
/// same way `TypeGenerator::resolve_type_text` peels them) spells a
/// formal parameter's name, returns the same text with the parameter
/// replaced by the matching argument's type name. `None` if `text`
/// doesn't name a parameter at all.
fn substitute_param_text(text: &str, params: &[String], args: &[QDataType], types: &TypePool) -> Option<String> {
    let mut base = text.trim();
    let mut suffix = String::new();
    loop {
        if let Some(rest) = base.strip_suffix("[]") {
            suffix = format!("[]{suffix}");
            base = rest;
        } else if let Some(rest) = base.strip_suffix('*') {
            suffix = format!("*{suffix}");
            base = rest.trim_end();
        } else if let Some(rest) = base.strip_suffix('&') {
            suffix = format!("&{suffix}");
            base = rest.trim_end();
        } else if let Some(rest) = base.strip_suffix(" const") {
            suffix = format!(" const{suffix}");
            base = rest;
        } else {
            break;
        }
    }
    let pos = params.iter().position(|p| p == base.trim())?;
    let arg_name = types.get(args[pos].ty).name.clone();
    Some(format!("{arg_name}{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstArena, AstNode};
    use crate::errors::CollectingErrorHandler;
    use crate::scope::{NamedScope, ScopeKind};
    use crate::token::TokenLocation;
    use crate::types::DataTypeKind;

    fn loc() -> TokenLocation {
        TokenLocation::new("t.le", 1, 1)
    }

    #[test]
    fn same_arguments_share_one_instance() {
        let mut ast = AstArena::new();
        let mut scopes = ScopeArena::new();
        let mut types = TypePool::new();
        let mut handler = CollectingErrorHandler::new();

        let class_scope = scopes.alloc(NamedScope::new("Array", ScopeKind::Class, None));
        let class_decl = ast.add(
            AstNode::new(
                AstNodeKind::ClassDecl {
                    name: "Array".to_string(),
                    scope: class_scope,
                    base_name: None,
                },
                loc(),
            ),
            None,
        );
        ast.get_mut(class_decl).scope_ref = Some(class_scope);
        let typedef = ast.add(
            AstNode::new(
                AstNodeKind::TypedefDecl {
                    name: "T".to_string(),
                },
                loc(),
            ),
            Some(class_decl),
        );
        let _ = typedef;

        let root = ast.add(AstNode::new(AstNodeKind::Program, loc()), None);
        let template = ast.add(
            AstNode::new(
                AstNodeKind::TemplateDecl {
                    name: "Array".to_string(),
                    params: vec!["T".to_string()],
                },
                loc(),
            ),
            Some(root),
        );
        ast.get_mut(class_decl).parent = Some(template);
        ast.get_mut(template).children.push(class_decl);

        let int_ty = QDataType::new(types.elementary(DataTypeKind::I32));
        let site_a = ast.add(
            AstNode::new(
                AstNodeKind::TemplateInstance {
                    name: "Array".to_string(),
                    args: vec![int_ty],
                },
                loc(),
            ),
            Some(root),
        );
        let site_b = ast.add(
            AstNode::new(
                AstNodeKind::TemplateInstance {
                    name: "Array".to_string(),
                    args: vec![int_ty],
                },
                loc(),
            ),
            Some(root),
        );

        let mut inst = TemplateInstantiator::new(&mut ast, &mut scopes, &mut types, &mut handler);
        inst.instantiate_until_fixed_point(root);

        assert!(ast.get(site_a).target.is_some());
        assert_eq!(ast.get(site_a).target, ast.get(site_b).target);
        assert!(ast.get(template).flags.contains(AstFlags::SKIP_CODEGEN));
    }

    #[test]
    fn unknown_template_name_is_a_template_error() {
        let mut ast = AstArena::new();
        let mut scopes = ScopeArena::new();
        let mut types = TypePool::new();
        let mut handler = CollectingErrorHandler::new();

        let root = ast.add(AstNode::new(AstNodeKind::Program, loc()), None);
        let int_ty = QDataType::new(types.elementary(DataTypeKind::I32));
        ast.add(
            AstNode::new(
                AstNodeKind::TemplateInstance {
                    name: "Nope".to_string(),
                    args: vec![int_ty],
                },
                loc(),
            ),
            Some(root),
        );

        let mut inst = TemplateInstantiator::new(&mut ast, &mut scopes, &mut types, &mut handler);
        inst.instantiate_until_fixed_point(root);

        assert!(handler.has_errors());
    }
}
