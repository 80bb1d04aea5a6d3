//! Abstract syntax tree
//!
//! Nodes live in one per-`Compiler` arena (`AstArena`) and reference each
//! other by [`NodeId`] index rather than raw pointers. This sidesteps
//! shared ownership of parent/child/target pointers entirely: a `NodeId`
//! is `Copy`, and child lists are plain `Vec<NodeId>` owned by the parent.

use crate::scope::ScopeId;
use crate::token::TokenLocation;
use crate::types::QDataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

bitflags::bitflags! {
    /// `AstNode` flags: compile-time facts attached to a node as
    /// resolution proceeds (e.g. "this expression is a compile-time
    /// constant" or "this declaration is unreferenced").
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AstFlags: u32 {
        const RESOLVED       = 1 << 0;
        const CONST_EXPR     = 1 << 1;
        const LVALUE         = 1 << 2;
        const UNREFERENCED   = 1 << 3;
        const TEMPLATE       = 1 << 4;
        const TEMPLATE_ARG   = 1 << 5;
        const VIRTUAL        = 1 << 6;
        const OVERRIDE       = 1 << 7;
        const STATIC         = 1 << 8;
        const NOFAIL_CANDIDATE = 1 << 9;
        /// Set on the original generic definition once it has produced at
        /// least one instantiation: the definition
        /// itself never reaches codegen, only its instances do.
        const SKIP_CODEGEN   = 1 << 10;
    }
}

bitflags::bitflags! {
    /// `AstNode` qualifiers bit-mask (const/public/protected/...),
    /// kept distinct from [`AstFlags`] because qualifiers come straight
    /// from source syntax while flags are resolver-derived facts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AstQualifiers: u64 {
        const CONST      = 1 << 0;
        const PUBLIC     = 1 << 1;
        const PROTECTED  = 1 << 2;
        const PRIVATE    = 1 << 3;
        const NATIVE     = 1 << 4;
        const STATIC     = 1 << 5;
        const FINAL      = 1 << 6;
        const TRANSIENT  = 1 << 7;
        const NOCOPY     = 1 << 8;
        const NOBOUNDS   = 1 << 9;
        const NOINIT     = 1 << 10;
        const EDITABLE   = 1 << 11;
        const PLACEABLE  = 1 << 12;
        const LATENT     = 1 << 13;
        const WEAK       = 1 << 14;
        const RAW        = 1 << 15;
        /// Set by the `[deprecated]` attribute; the resolver warns on any
        /// reference to a declaration carrying this bit.
        const DEPRECATED = 1 << 16;
        /// Marks a nested class as a state class: its implicit base is
        /// the class it's nested in rather than `object`, and its method
        /// locals relocate to mangled storage on the outermost non-state
        /// enclosing class.
        const STATE      = 1 << 17;
    }
}

/// Untyped constant payload attached to literal/const-folded nodes. Not
/// `Copy`: `Str` carries an owned concatenation result.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Int(i64),
    UInt(u64),
    Double(f64),
    Bool(bool),
    Str(String),
}

/// Tagged node-kind list, kept as one flat enum: a single match plays the
/// role a `NodeType` byte plus per-kind dispatch would, without a vtable.
#[derive(Debug, Clone)]
pub enum AstNodeKind {
    Program,
    Module { name: String },
    Import { path: String },

    // declarations
    VarDecl { name: String, qtype: Option<QDataType> },
    FuncDecl { name: String, scope: ScopeId },
    /// `base_name` is the parsed `: Base` clause, still an unresolved
    /// name; the resolver looks it up and sets `NamedScope::base` on
    /// `scope` once it finds a matching class/struct.
    ClassDecl { name: String, scope: ScopeId, base_name: Option<String> },
    StructDecl { name: String, scope: ScopeId, base_name: Option<String> },
    EnumDecl { name: String, scope: ScopeId },
    TypedefDecl { name: String },
    TemplateDecl { name: String, params: Vec<String> },
    Param { name: String, qtype: Option<QDataType>, default: Option<NodeId> },

    /// A use of a generic name with arguments (`Array<int>`), pointing
    /// back at its `TemplateDecl` once resolved. The
    /// instantiator rewrites this node's `target` to the deep-cloned,
    /// concrete declaration.
    TemplateInstance { name: String, args: Vec<QDataType> },

    // statements
    Block,
    ExprStmt,
    If { cond: NodeId, then_branch: NodeId, else_branch: Option<NodeId> },
    While { cond: NodeId, body: NodeId },
    DoWhile { cond: NodeId, body: NodeId },
    For { init: Option<NodeId>, cond: Option<NodeId>, step: Option<NodeId>, body: NodeId },
    ForEach { var_name: String, iterable: NodeId, body: NodeId },
    Switch { expr: NodeId, arms: Vec<NodeId> },
    Case { labels: Vec<NodeId>, is_default: bool, body: NodeId },
    Break,
    Continue,
    Return { value: Option<NodeId> },
    Goto { label: String },
    Label { name: String },
    Defer { stmt: NodeId },
    StateBreak,

    // expressions
    IntLiteral(i64),
    UIntLiteral(u64),
    DoubleLiteral(f64),
    BoolLiteral(bool),
    CharLiteral(char),
    StringLiteral(String),
    NameLiteral(String),
    NullLiteral,
    Ident(String),
    This,
    Super,
    Unary { op: String, operand: NodeId },
    PostfixUnary { op: String, operand: NodeId },
    Binary { op: String, lhs: NodeId, rhs: NodeId },
    Assign { op: String, lhs: NodeId, rhs: NodeId },
    Ternary { cond: NodeId, then_val: NodeId, else_val: NodeId },
    Call { callee: NodeId, args: Vec<NodeId> },
    Index { base: NodeId, index: NodeId },
    Member { base: NodeId, name: String },
    ScopeResolution { base: NodeId, name: String },
    Cast { qtype: QDataType, expr: NodeId },
    Sizeof { expr: NodeId },
    Offsetof { qtype: QDataType, member: String },
    Alignof { qtype: QDataType },
    Typeid { qtype: QDataType },
    New { qtype: QDataType, args: Vec<NodeId> },
    ArrayLiteral { elems: Vec<NodeId> },
    StructLiteral { fields: Vec<(Option<String>, NodeId)> },
    RangeExpr { lo: NodeId, hi: NodeId },
    Delegate { target: NodeId, method: String },

    /// Raw macro-expanded token sequence not yet re-parsed into a subtree.
    TokenPaste(String),
}

/// One arena-resident node: payload plus tree links and resolver state.
#[derive(Debug, Clone)]
pub struct AstNode {
    pub kind: AstNodeKind,
    pub location: TokenLocation,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Resolved symbol/type target, filled in by the resolver.
    pub target: Option<NodeId>,
    pub scope_ref: Option<ScopeId>,
    pub qtype: Option<QDataType>,
    /// Raw type text captured by the parser for declarations whose
    /// `qtype` isn't known until type generation (a `VarDecl`/`Param`
    /// with an explicit type and no initializer to infer from, or a
    /// `FuncDecl`'s return type). Cleared once `qtype` is filled in.
    pub type_name: Option<String>,
    pub qualifiers: AstQualifiers,
    pub flags: AstFlags,
    pub num: Option<ConstValue>,
    /// Declared width of a bit-field member (`int x : 3;`); `None` for an
    /// ordinary field. Consumed by `TypeGenerator::gen_composite` when
    /// laying out a struct/class's members.
    pub bit_width: Option<u8>,
}

impl AstNode {
    pub fn new(kind: AstNodeKind, location: TokenLocation) -> Self {
        AstNode {
            kind,
            location,
            parent: None,
            children: Vec::new(),
            target: None,
            scope_ref: None,
            qtype: None,
            type_name: None,
            qualifiers: AstQualifiers::empty(),
            flags: AstFlags::empty(),
            num: None,
            bit_width: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.flags.contains(AstFlags::RESOLVED)
    }
}

/// Arena owning every node for one compile unit.
#[derive(Debug, Default)]
pub struct AstArena {
    nodes: Vec<AstNode>,
}

impl AstArena {
    pub fn new() -> Self {
        AstArena { nodes: Vec::new() }
    }

    /// `AstNode::Add`: allocate a node and link it as the last
    /// child of `parent`, if given.
    pub fn add(&mut self, node: AstNode, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        if let Some(p) = parent {
            self.nodes[p.0 as usize].children.push(id);
            self.nodes[id.0 as usize].parent = Some(p);
        }
        id
    }

    pub fn get(&self, id: NodeId) -> &AstNode {
        &self.nodes[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut AstNode {
        &mut self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// `AstNode::ReplaceChild`: swap one child reference for
    /// another without disturbing sibling order (used by constant folding
    /// and template instantiation to splice in a rewritten subtree).
    pub fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) {
        let children = &mut self.nodes[parent.0 as usize].children;
        if let Some(slot) = children.iter_mut().find(|c| **c == old) {
            *slot = new;
        }
        self.nodes[new.0 as usize].parent = Some(parent);
    }

    /// `AstNode::UnbindNode`: detach `child` from `parent`,
    /// leaving the node allocated (still reachable if another reference
    /// holds it, e.g. a deferred list) but out of the tree.
    pub fn unbind_node(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent.0 as usize]
            .children
            .retain(|&c| c != child);
        self.nodes[child.0 as usize].parent = None;
    }

    /// `AstNode::CopyTo`: deep-clone the subtree rooted at `id`
    /// into this arena, returning the new root. Used by template
    /// instantiation.
    pub fn clone_subtree(&mut self, id: NodeId, new_parent: Option<NodeId>) -> NodeId {
        let node = self.nodes[id.0 as usize].clone();
        let children = node.children.clone();
        let mut copy = node;
        copy.children = Vec::new();
        copy.parent = None;
        let new_id = self.add(copy, new_parent);
        for child in children {
            self.clone_subtree(child, Some(new_id));
        }
        new_id
    }

    pub fn iter_preorder(&self, root: NodeId) -> AstIterator<'_> {
        AstIterator {
            arena: self,
            stack: vec![root],
        }
    }
}

/// Pre-order traversal over an arena-resident subtree.
pub struct AstIterator<'a> {
    arena: &'a AstArena,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for AstIterator<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        let node = self.arena.get(id);
        for &child in node.children.iter().rev() {
            self.stack.push(child);
        }
        Some(id)
    }
}
