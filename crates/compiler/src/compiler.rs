//! Public compiler API

use std::collections::HashMap;

use lethe_core::GlobalCounter;

use crate::ast::{AstArena, AstNodeKind, NodeId};
use crate::compiled_program::CompiledProgram;
use crate::config::CompilerConfig;
use crate::errors::{CollectingErrorHandler, ErrorHandler};
use crate::lexer::LexerMode;
use crate::parser::Parser;
use crate::scope::{Member, NamedScope, ScopeArena, ScopeId, ScopeKind};
use crate::template::TemplateInstantiator;
use crate::token_stream::TokenStream;
use crate::types::TypePool;

pub struct Compiler {
    config: CompilerConfig,
    counter: GlobalCounter,
    ast: AstArena,
    scopes: ScopeArena,
    types: TypePool,
    errors: CollectingErrorHandler,
    root: Option<NodeId>,
    global_scope: ScopeId,
}

impl Compiler {
    pub fn new(config: CompilerConfig, counter: GlobalCounter) -> Self {
        let mut scopes = ScopeArena::new();
        let global_scope = scopes.alloc(NamedScope::new("<global>", ScopeKind::Global, None));
        Compiler {
            config,
            counter,
            ast: AstArena::new(),
            scopes,
            types: TypePool::new(),
            errors: CollectingErrorHandler::new(),
            root: None,
            global_scope,
        }
    }

    /// `Open(stream, filename)`: initializes a token stream from
    /// source text. Kept separate from `compile` so a host can lex-check a
    /// buffer without committing to a full parse.
    pub fn open(&self, source: &str, filename: impl Into<String>) -> TokenStream {
        TokenStream::new(source, filename, LexerMode::Default)
    }

    /// `Compile(stream, filename)`: parses one translation unit
    /// and splices it into this `Compiler`'s own arenas, so a second call
    /// with another file's source accumulates into the same program the
    /// way imports get folded in.
    pub fn compile(&mut self, source: &str, filename: impl Into<String>) -> NodeId {
        let filename = filename.into();
        self.errors.on_compile(&filename);
        let stream = self.open(source, filename);
        let mut parser = Parser::new(stream, &mut self.errors);
        let unit_root = parser.parse_program();
        let unit_global = parser.global_scope();

        let new_root = self.splice(parser.ast, parser.scopes, unit_root, unit_global);
        self.attach_to_root(new_root);
        new_root
    }

    /// `Merge(other)`: folds another `Compiler`'s parsed tree
    /// into this one. Duplicate non-namespace top-level names are an
    /// error, surfaced the next time `resolve` runs (the merged subtree's
    /// declarations land in this compiler's global scope as ordinary
    /// siblings, so the resolver's existing duplicate-declaration check in
    /// `NamedScope::declare` catches it).
    pub fn merge(&mut self, other: Compiler) -> NodeId {
        let Compiler {
            ast,
            scopes,
            root,
            global_scope,
            ..
        } = other;
        let foreign_root = root.unwrap_or(NodeId(0));
        let new_root = self.splice(ast, scopes, foreign_root, global_scope);
        self.attach_to_root(new_root);
        new_root
    }

    fn attach_to_root(&mut self, new_root: NodeId) {
        match self.root {
            Some(existing) => {
                self.ast.get_mut(existing).children.push(new_root);
                self.ast.get_mut(new_root).parent = Some(existing);
            }
            None => self.root = Some(new_root),
        }
    }

    /// Deep-copies every node reachable from `foreign_root` (and the
    /// scopes those nodes reference) into this compiler's own arenas,
    /// remapping ids along the way -- the same technique
    /// `TemplateInstantiator` uses to fold a cloned subtree into a live
    /// arena, applied here across two distinct arenas.
    /// `foreign_global` is the scope the foreign parse registered its
    /// top-level declarations into; since no AST node's own `scope_ref`
    /// points at it (it's held by the parser, not attached to the root
    /// node), it's cloned explicitly and its members folded into this
    /// compiler's own global scope so the spliced declarations become
    /// visible to lookup.
    fn splice(
        &mut self,
        foreign_ast: AstArena,
        foreign_scopes: ScopeArena,
        foreign_root: NodeId,
        foreign_global: ScopeId,
    ) -> NodeId {
        let mut node_map: HashMap<NodeId, NodeId> = HashMap::new();
        let mut scope_map: HashMap<ScopeId, ScopeId> = HashMap::new();
        let new_root = self.splice_node(&foreign_ast, &foreign_scopes, foreign_root, None, &mut node_map, &mut scope_map);
        let new_global = self.clone_scope_once(&foreign_scopes, foreign_global, &mut scope_map);

        for &new_id in node_map.values() {
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

        let foreign_members: Vec<(String, Member)> =
            self.scopes.get(new_global).members().cloned().collect();
        for (name, member) in foreign_members {
            self.scopes.get_mut(self.global_scope).declare(name, member);
        }

        new_root
    }

    /// Clones `old_scope` into `self.scopes` if it hasn't been cloned
    /// already (memoized via `scope_map`), returning the resulting id.
    fn clone_scope_once(
        &mut self,
        foreign_scopes: &ScopeArena,
        old_scope: ScopeId,
        scope_map: &mut HashMap<ScopeId, ScopeId>,
    ) -> ScopeId {
        if let Some(&s) = scope_map.get(&old_scope) {
            return s;
        }
        let cloned = foreign_scopes.get(old_scope).clone();
        let s = self.scopes.alloc(cloned);
        scope_map.insert(old_scope, s);
        s
    }

    fn splice_node(
        &mut self,
        foreign_ast: &AstArena,
        foreign_scopes: &ScopeArena,
        old_id: NodeId,
        new_parent: Option<NodeId>,
        node_map: &mut HashMap<NodeId, NodeId>,
        scope_map: &mut HashMap<ScopeId, ScopeId>,
    ) -> NodeId {
        let mut new_node = foreign_ast.get(old_id).clone();
        let children = new_node.children.clone();
        new_node.children = Vec::new();
        new_node.parent = None;
        if let Some(old_scope) = new_node.scope_ref {
            new_node.scope_ref = Some(self.clone_scope_once(foreign_scopes, old_scope, scope_map));
        }
        let new_id = self.ast.add(new_node, new_parent);
        node_map.insert(old_id, new_id);
        for child in children {
            self.splice_node(foreign_ast, foreign_scopes, child, Some(new_id), node_map, scope_map);
        }
        new_id
    }

    /// `Resolve(ignoreErrors)`: runs the name-resolution fix
    /// point and template instantiation to a combined stable state (each
    /// instantiation round may expose new names the resolver must revisit).
    ///
    /// Per-declaration type assignment (predeclaring composites by name,
    /// then turning the parser's raw type text into a real `qtype`) has to
    /// happen here too, ahead of each resolver pass, not only later in
    /// `codegen`'s `TypeGenDef`/`TypeGen` phases: name lookup rule 4 (`a.b`
    /// resolves `a`'s type before it can look `b` up in it) needs `a`'s
    /// `qtype` filled in already. `codegen`'s own phases re-run the same
    /// two calls, harmlessly, since both are no-ops once a declaration
    /// already has its `qtype`/composite reserved.
    pub fn resolve(&mut self, ignore_errors: bool) -> bool {
        let Some(root) = self.root else { return true };
        let mut stable = false;
        for _ in 0..16 {
            let mut gen = crate::constfold::TypeGenerator::new(&mut self.ast, &mut self.scopes, &mut self.types);
            gen.predeclare(root);
            gen.resolve_declared_types(root);
            let mut resolver = crate::resolver::Resolver::new(&mut self.ast, &mut self.scopes, &mut self.types, &mut self.errors);
            let resolved = resolver.resolve_program(root, self.global_scope);
            let mut instantiator = TemplateInstantiator::new(&mut self.ast, &mut self.scopes, &mut self.types, &mut self.errors);
            let instantiated = instantiator.instantiate_until_fixed_point(root);
            if resolved && instantiated {
                stable = true;
                break;
            }
        }
        if !ignore_errors && self.errors.has_errors() {
            return false;
        }
        stable
    }

    /// `CodeGen(program)`: runs the codegen driver and hands
    /// back the finished `CompiledProgram`, consuming this `Compiler`.
    pub fn codegen(mut self) -> CompiledProgram {
        let mut program = CompiledProgram::new();
        program.ast = std::mem::take(&mut self.ast);
        program.scopes = std::mem::take(&mut self.scopes);
        program.types = std::mem::take(&mut self.types);
        if let Some(root) = self.root {
            let mut driver = crate::codegen::CodegenDriver::new(&mut program, &mut self.errors);
            driver.run(root);
        }
        program.errors = std::mem::take(&mut self.errors.errors);
        program.warnings = std::mem::take(&mut self.errors.warnings);
        program
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn has_errors(&self) -> bool {
        self.errors.has_errors()
    }

    /// Drains accumulated warnings.
    pub fn take_warnings(&mut self) -> Vec<crate::errors::CompileWarning> {
        std::mem::take(&mut self.errors.warnings)
    }

    /// Drains accumulated errors, for callers (like the LSP collaborator)
    /// that want diagnostics without consuming the compiler via `codegen`.
    pub fn take_errors(&mut self) -> Vec<crate::errors::CompileError> {
        std::mem::take(&mut self.errors.errors)
    }

    pub fn counter(&self) -> &GlobalCounter {
        &self.counter
    }
}
