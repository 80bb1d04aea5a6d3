//! Recursive-descent parser
//!
//! Depth-limited recursion (1024, guarding against stack blowup on
//! pathological input) and a dedicated function per precedence level for
//! expressions.
//! Produces an [`AstArena`]-resident tree plus the [`ScopeArena`] entries
//! declarations introduce along the way.

use crate::ast::{AstArena, AstFlags, AstNode, AstNodeKind, AstQualifiers, NodeId};
use crate::errors::{CompileError, ErrorHandler, SourceLocation};
use crate::scope::{Member, NamedScope, ScopeArena, ScopeId, ScopeKind};
use crate::token::{Token, TokenType};
use crate::token_stream::TokenStream;

const MAX_DEPTH: u32 = 1024;

pub struct Parser<'h> {
    stream: TokenStream,
    pub ast: AstArena,
    pub scopes: ScopeArena,
    errors: &'h mut dyn ErrorHandler,
    depth: u32,
    global_scope: ScopeId,
    /// Set by `parse_type_name` when it just swallowed `Name<Args>`
    /// syntax; consumed by the declaration call site that cares, so the
    /// resulting `TemplateInstance` node can be built without threading
    /// a return value through every `parse_type_name` caller.
    last_generic_args: Option<(String, Vec<String>)>,
    /// `TemplateInstance` nodes built while parsing a declaration,
    /// spliced onto the program root once parsing finishes.
    pending_templates: Vec<NodeId>,
}

fn loc_to_source(loc: &crate::token::TokenLocation) -> SourceLocation {
    SourceLocation::new(loc.file.clone(), loc.line, loc.column)
}

impl<'h> Parser<'h> {
    pub fn new(stream: TokenStream, errors: &'h mut dyn ErrorHandler) -> Self {
        let mut scopes = ScopeArena::new();
        let global_scope = scopes.alloc(NamedScope::new("<global>", ScopeKind::Global, None));
        Parser {
            stream,
            ast: AstArena::new(),
            scopes,
            errors,
            depth: 0,
            global_scope,
            last_generic_args: None,
            pending_templates: Vec::new(),
        }
    }

    /// The scope this parser registered top-level declarations into.
    /// Hosts that splice a parsed unit's arenas into another `Compiler`
    /// need this id to fold the unit's
    /// top-level names into the target's own global scope.
    pub fn global_scope(&self) -> ScopeId {
        self.global_scope
    }

    fn bump_depth(&mut self) -> Result<(), ()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            self.error("expression nested too deeply".to_string());
            return Err(());
        }
        Ok(())
    }

    fn error(&mut self, message: String) {
        let loc = self
            .stream
            .peek_token()
            .map(|t| loc_to_source(&t.location))
            .unwrap_or_default();
        self.errors.on_error(CompileError::Parse { message, loc });
    }

    fn peek(&mut self) -> Token {
        self.stream.peek_token().unwrap_or_else(|e| Token {
            ttype: Some(TokenType::Invalid),
            err: Some(e),
            ..Default::default()
        })
    }

    fn next(&mut self) -> Token {
        self.stream.get_token().unwrap_or_else(|e| Token {
            ttype: Some(TokenType::Invalid),
            err: Some(e),
            ..Default::default()
        })
    }

    fn at(&mut self, tt: TokenType) -> bool {
        self.peek().ttype() == tt
    }

    fn eat(&mut self, tt: TokenType) -> bool {
        if self.at(tt) {
            self.next();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tt: TokenType, what: &str) -> Token {
        if self.at(tt) {
            self.next()
        } else {
            let found = self.peek();
            self.error(format!("expected {what}, found '{}'", found.text));
            found
        }
    }

    /// translation unit: sequence of imports / namespaces /
    /// typedefs / declarations / `;`.
    pub fn parse_program(&mut self) -> NodeId {
        let loc = self.peek().location.clone();
        let root = self.ast.add(AstNode::new(AstNodeKind::Program, loc), None);
        while !self.at(TokenType::Eof) {
            if self.eat(TokenType::Semicolon) {
                continue;
            }
            if let Some(decl) = self.parse_top_level_item() {
                self.ast.get_mut(decl).parent = Some(root);
                self.ast.get_mut(root).children.push(decl);
            }
        }
        for inst in std::mem::take(&mut self.pending_templates) {
            self.ast.get_mut(inst).parent = Some(root);
            self.ast.get_mut(root).children.push(inst);
        }
        root
    }

    /// Builds a `TemplateInstance` node for a `Name<arg, ...>` type use
    /// captured by `parse_type_name`, with one placeholder carrier child
    /// per argument (a `VarDecl` whose `type_name` is the argument's raw
    /// spelling) so the existing `type_name` -> `qtype` machinery fills
    /// each argument in once its type is declared, the same way it fills
    /// an ordinary declaration's type. Queued for attachment to the
    /// program root rather than the declaration it annotates, so it
    /// doesn't disturb that declaration's own `children` (e.g. the
    /// "first child is the initializer" convention `VarDecl` relies on).
    fn attach_template_instance(&mut self, name: &str, arg_texts: &[String], loc: crate::token::TokenLocation) {
        let inst = self.ast.add(
            AstNode::new(
                AstNodeKind::TemplateInstance {
                    name: name.to_string(),
                    args: vec![crate::types::QDataType::new(crate::types::DataTypeId(0)); arg_texts.len()],
                },
                loc.clone(),
            ),
            None,
        );
        for arg_text in arg_texts {
            let carrier = self.ast.add(
                AstNode::new(
                    AstNodeKind::VarDecl {
                        name: String::new(),
                        qtype: None,
                    },
                    loc.clone(),
                ),
                Some(inst),
            );
            self.ast.get_mut(carrier).type_name = Some(arg_text.trim().to_string());
            self.ast.get_mut(inst).children.push(carrier);
        }
        self.pending_templates.push(inst);
    }

    fn parse_top_level_item(&mut self) -> Option<NodeId> {
        let tok = self.peek();
        match tok.ttype() {
            TokenType::KeywordImport => Some(self.parse_import()),
            TokenType::KeywordNamespace => Some(self.parse_namespace()),
            TokenType::KeywordClass => Some(self.parse_class_or_struct(true, self.global_scope, AstQualifiers::empty())),
            TokenType::KeywordStruct => Some(self.parse_class_or_struct(false, self.global_scope, AstQualifiers::empty())),
            TokenType::KeywordEnum => Some(self.parse_enum()),
            TokenType::KeywordTypedef => Some(self.parse_typedef()),
            TokenType::KeywordUsing => Some(self.parse_using()),
            TokenType::KeywordMacro => {
                self.parse_macro_def();
                None
            }
            TokenType::Hash => {
                self.parse_directive();
                None
            }
            TokenType::LBracket => {
                let extra = self.parse_attribute();
                let item = self.parse_top_level_item();
                if let Some(id) = item {
                    self.ast.get_mut(id).qualifiers |= extra;
                }
                item
            }
            _ => Some(self.parse_declaration_or_function(self.global_scope)),
        }
    }

    fn parse_import(&mut self) -> NodeId {
        let loc = self.next().location; // `import`
        let path_tok = self.expect(TokenType::String, "string literal");
        self.eat(TokenType::Semicolon);
        self.ast.add(
            AstNode::new(AstNodeKind::Import { path: path_tok.text }, loc),
            None,
        )
    }

    fn parse_namespace(&mut self) -> NodeId {
        let loc = self.next().location; // `namespace`
        let mut name = String::new();
        loop {
            let ident = self.expect(TokenType::Ident, "identifier");
            name.push_str(&ident.text);
            if self.eat(TokenType::DoubleColon) {
                name.push_str("::");
                continue;
            }
            break;
        }
        let node = self
            .ast
            .add(AstNode::new(AstNodeKind::Module { name }, loc), None);
        if self.eat(TokenType::Semicolon) {
            // auto-closes at EOF: remaining top-level items belong to it
            // conceptually, but the flat arena model doesn't need explicit
            // re-parenting for this to resolve correctly downstream.
            return node;
        }
        self.expect(TokenType::LBrace, "'{'");
        self.stream.begin_macro_scope();
        while !self.at(TokenType::RBrace) && !self.at(TokenType::Eof) {
            if self.eat(TokenType::Semicolon) {
                continue;
            }
            if let Some(item) = self.parse_top_level_item() {
                self.ast.get_mut(item).parent = Some(node);
                self.ast.get_mut(node).children.push(item);
            }
        }
        self.expect(TokenType::RBrace, "'}'");
        self.stream.end_macro_scope();
        node
    }

    fn parse_directive(&mut self) {
        self.next(); // `#`
        let ident = self.peek();
        if ident.ttype() == TokenType::Ident && ident.text == "line" {
            self.next();
            let line_tok = self.expect(TokenType::Integer, "line number");
            let file = if self.at(TokenType::String) {
                Some(self.next().text)
            } else {
                None
            };
            if let crate::token::TokenNumber::Integer(n) = line_tok.number {
                self.stream_set_location(n as i32, file);
            }
        } else {
            self.error("unknown preprocessor directive".to_string());
            while !self.at(TokenType::Eof) && !self.at(TokenType::Semicolon) {
                self.next();
            }
        }
    }

    fn stream_set_location(&mut self, line: i32, file: Option<String>) {
        self.stream.set_location(line, file);
    }

    /// Parses `[ ... ]` and returns any qualifier bits it maps to, to be
    /// merged into the next declaration's qualifiers. `deprecated` is the
    /// only attribute with semantic weight right now; anything else is
    /// accepted and dropped.
    fn parse_attribute(&mut self) -> AstQualifiers {
        self.next(); // `[`
        let mut q = AstQualifiers::empty();
        let mut depth = 1;
        while depth > 0 && !self.at(TokenType::Eof) {
            let t = self.next();
            match t.ttype() {
                TokenType::LBracket => depth += 1,
                TokenType::RBracket => depth -= 1,
                TokenType::Ident if t.text == "deprecated" => q |= AstQualifiers::DEPRECATED,
                _ => {}
            }
        }
        q
    }

    fn parse_typedef(&mut self) -> NodeId {
        let loc = self.next().location; // `typedef`
        let _qtype = self.parse_type_name();
        let name = self.expect(TokenType::Ident, "typedef name").text;
        self.eat(TokenType::Semicolon);
        self.ast
            .add(AstNode::new(AstNodeKind::TypedefDecl { name }, loc), None)
    }

    /// `macro NAME(params...) body... endmacro` (or object-like without
    /// the parameter list). Installs the definition directly into the
    /// token stream; produces no AST node of its own.
    fn parse_macro_def(&mut self) {
        self.next(); // `macro`
        match self.stream.parse_macro_definition() {
            Ok(m) => {
                if let Err(e) = self.stream.add_macro(m) {
                    self.error(e);
                }
            }
            Err(e) => self.error(e),
        }
    }

    fn parse_using(&mut self) -> NodeId {
        let loc = self.next().location; // `using`
        let name = self.expect(TokenType::Ident, "alias name").text;
        self.expect(TokenType::Eq, "'='");
        let _qtype = self.parse_type_name();
        self.eat(TokenType::Semicolon);
        self.ast
            .add(AstNode::new(AstNodeKind::TypedefDecl { name }, loc), None)
    }

    /// Consumes a type name: qualifiers, base, array/ptr suffixes. Returns
    /// the textual spelling; full semantic resolution happens later, once
    /// type generation has every composite's `DataTypeId` reserved. The
    /// parser only needs enough structure to know where the type ends.
    fn parse_type_name(&mut self) -> String {
        self.last_generic_args = None;
        let mut text = String::new();
        loop {
            let t = self.peek();
            match t.ttype() {
                TokenType::KeywordConst | TokenType::KeywordNative | TokenType::KeywordStatic => {
                    text.push_str(&self.next().text);
                    text.push(' ');
                }
                _ => break,
            }
        }
        let base = self.next();
        text.push_str(&base.text);
        if self.at(TokenType::Lt) && base.ttype() == TokenType::Ident {
            // template instantiation args, e.g. array<T>
            text.push('<');
            self.next();
            let mut depth = 1;
            let mut arg_texts = Vec::new();
            let mut current_arg = String::new();
            while depth > 0 && !self.at(TokenType::Eof) {
                let t = self.next();
                match t.ttype() {
                    TokenType::Lt => depth += 1,
                    TokenType::Gt => depth -= 1,
                    TokenType::Comma if depth == 1 => {
                        arg_texts.push(std::mem::take(&mut current_arg));
                        text.push(',');
                        continue;
                    }
                    _ => {}
                }
                if depth > 0 {
                    text.push_str(&t.text);
                    current_arg.push_str(&t.text);
                }
            }
            if !current_arg.is_empty() {
                arg_texts.push(current_arg);
            }
            text.push('>');
            self.last_generic_args = Some((base.text.clone(), arg_texts));
        }
        while self.at(TokenType::LBracket) || self.at(TokenType::Star) {
            if self.eat(TokenType::Star) {
                text.push('*');
                continue;
            }
            self.next(); // `[`
            if !self.at(TokenType::RBracket) {
                // fixed-size dimension; skip expression tokens
                let mut depth = 1;
                while depth > 0 && !self.at(TokenType::Eof) {
                    match self.next().ttype() {
                        TokenType::LBracket => depth += 1,
                        TokenType::RBracket => depth -= 1,
                        _ => {}
                    }
                }
                text.push_str("[]");
                continue;
            }
            self.expect(TokenType::RBracket, "']'");
            text.push_str("[]");
        }
        if self.eat(TokenType::KeywordConst) {
            text.push_str(" const");
        }
        if self.eat(TokenType::Amp) {
            text.push('&');
        }
        text
    }

    fn looks_like_type_start(&mut self) -> bool {
        matches!(
            self.peek().ttype(),
            TokenType::KeywordTypeVoid
                | TokenType::KeywordTypeBool
                | TokenType::KeywordTypeByte
                | TokenType::KeywordTypeSByte
                | TokenType::KeywordTypeShort
                | TokenType::KeywordTypeUShort
                | TokenType::KeywordTypeChar
                | TokenType::KeywordTypeInt
                | TokenType::KeywordTypeUInt
                | TokenType::KeywordTypeLong
                | TokenType::KeywordTypeULong
                | TokenType::KeywordTypeFloat
                | TokenType::KeywordTypeDouble
                | TokenType::KeywordTypeName
                | TokenType::KeywordTypeString
                | TokenType::KeywordAuto
                | TokenType::KeywordConst
                | TokenType::KeywordNative
                | TokenType::KeywordStatic
                | TokenType::Ident
        )
    }

    /// `parent_scope` is `global_scope` for a top-level declaration, or the
    /// enclosing class's own scope for a nested (state) class. `qualifiers`
    /// carries any qualifier keywords `parse_member` already consumed
    /// before recognizing this as a nested class (currently only `state`
    /// is meaningful here).
    fn parse_class_or_struct(&mut self, is_class: bool, parent_scope: ScopeId, qualifiers: AstQualifiers) -> NodeId {
        let loc = self.next().location; // `class`/`struct`
        let name = self.expect(TokenType::Ident, "type name").text;

        let mut template_params = Vec::new();
        if self.eat(TokenType::Lt) {
            loop {
                template_params.push(self.expect(TokenType::Ident, "template parameter").text);
                if !self.eat(TokenType::Comma) {
                    break;
                }
            }
            self.expect(TokenType::Gt, "'>'");
        }

        let mut base = None;
        if self.eat(TokenType::Colon) {
            base = Some(self.expect(TokenType::Ident, "base class name").text);
        } else if is_class && qualifiers.contains(AstQualifiers::STATE) {
            // a nested state class with no explicit base auto-inherits the
            // class it's nested in, so its methods see the outer class's
            // own members without a `super::` qualifier.
            base = Some(self.scopes.get(parent_scope).name.clone());
        }

        let scope_kind = if is_class {
            ScopeKind::Class
        } else {
            ScopeKind::Struct
        };
        let scope = self
            .scopes
            .alloc(NamedScope::new(name.clone(), scope_kind, Some(parent_scope)));

        let kind = if is_class {
            AstNodeKind::ClassDecl {
                name: name.clone(),
                scope,
                base_name: base.clone(),
            }
        } else {
            AstNodeKind::StructDecl {
                name: name.clone(),
                scope,
                base_name: base.clone(),
            }
        };
        let node = self.ast.add(AstNode::new(kind, loc.clone()), None);
        self.ast.get_mut(node).qualifiers |= qualifiers;
        if !template_params.is_empty() {
            self.ast.get_mut(node).flags |= crate::ast::AstFlags::TEMPLATE;
        }
        self.scopes.get_mut(scope).node = Some(node);
        self.scopes
            .get_mut(parent_scope)
            .declare(name.clone(), Member::Scope(scope));

        // One placeholder alias per formal parameter, so
        // `TemplateInstantiator::clone_template` has a `TypedefDecl` to
        // rebind once an instance supplies concrete arguments.
        for param in &template_params {
            let typedef = self.ast.add(
                AstNode::new(AstNodeKind::TypedefDecl { name: param.clone() }, loc.clone()),
                Some(node),
            );
            self.ast.get_mut(node).children.push(typedef);
        }

        let open_brace = self.eat(TokenType::LBrace);
        if !open_brace {
            self.expect(TokenType::LBrace, "'{'");
        }
        self.stream.begin_macro_scope();

        let mut has_ctor = false;
        let mut pending_qualifiers = AstQualifiers::empty();
        while !self.at(TokenType::RBrace) && !self.at(TokenType::Eof) {
            if self.eat(TokenType::Semicolon) {
                continue;
            }
            if self.at(TokenType::LBracket) {
                pending_qualifiers |= self.parse_attribute();
                continue;
            }
            if is_class && self.at(TokenType::KeywordIgnores) {
                self.next();
                loop {
                    if self.at(TokenType::Ident) {
                        let ignored = self.next().text;
                        self.scopes.get_mut(scope).ignores.push(ignored);
                        if self.eat(TokenType::Comma) {
                            continue;
                        }
                    }
                    break;
                }
                self.eat(TokenType::Semicolon);
                continue;
            }
            let member = self.parse_member(scope, &name);
            if let Some(member) = member {
                self.ast.get_mut(member).qualifiers |= pending_qualifiers;
                pending_qualifiers = AstQualifiers::empty();
                if let AstNodeKind::FuncDecl { name: ref fname, .. } = self.ast.get(member).kind {
                    let fname = fname.clone();
                    if fname == name {
                        has_ctor = true;
                    }
                    // A non-static class method is virtual by default --
                    // `final` marks it not-further-overridable, it doesn't
                    // pull it out of the vtable (a final method can still
                    // replace a base slot, it just can't be replaced
                    // itself; `VtblGen` is what enforces that half).
                    let q = self.ast.get(member).qualifiers;
                    if is_class && !q.contains(AstQualifiers::STATIC) {
                        self.ast.get_mut(member).flags |= AstFlags::VIRTUAL;
                    }
                }
                self.ast.get_mut(member).parent = Some(node);
                self.ast.get_mut(node).children.push(member);
            }
        }
        self.expect(TokenType::RBrace, "'}'");
        self.stream.end_macro_scope();
        self.eat(TokenType::KeywordEndclass);
        self.eat(TokenType::Semicolon);

        if !has_ctor {
            self.scopes.get_mut(scope).ctor_defined = false;
        }

        if template_params.is_empty() {
            node
        } else {
            let decl = self.ast.add(
                AstNode::new(
                    AstNodeKind::TemplateDecl {
                        name: name.clone(),
                        params: template_params,
                    },
                    self.ast.get(node).location.clone(),
                ),
                None,
            );
            // `clone_template`'s self-alias step needs the class's own
            // scope to declare the instantiated name back into.
            self.ast.get_mut(decl).scope_ref = Some(scope);
            self.ast.get_mut(node).parent = Some(decl);
            self.ast.get_mut(decl).children.push(node);
            decl
        }
    }

    fn node_is_named(&self, node: NodeId, name: &str) -> bool {
        matches!(&self.ast.get(node).kind, AstNodeKind::FuncDecl { name: n, .. } if n == name)
    }

    fn parse_member(&mut self, class_scope: ScopeId, class_name: &str) -> Option<NodeId> {
        let _ = class_name;
        if let Some(node) = self.try_parse_nested_class(class_scope) {
            return Some(node);
        }
        Some(self.parse_declaration_or_function(class_scope))
    }

    /// A `[state] class Name ...` appearing directly in a class body is a
    /// nested (state) class, not an ordinary field/method declaration.
    fn try_parse_nested_class(&mut self, class_scope: ScopeId) -> Option<NodeId> {
        if self.at(TokenType::KeywordState) {
            let state_tok = self.next();
            if self.at(TokenType::KeywordClass) {
                return Some(self.parse_class_or_struct(true, class_scope, AstQualifiers::STATE));
            }
            self.stream.unget_token(state_tok);
            return None;
        }
        if self.at(TokenType::KeywordClass) {
            return Some(self.parse_class_or_struct(true, class_scope, AstQualifiers::empty()));
        }
        None
    }

    fn parse_enum(&mut self) -> NodeId {
        let loc = self.next().location; // `enum`
        let _is_class = self.eat(TokenType::KeywordClass) || self.eat(TokenType::KeywordStruct);
        let name = if self.at(TokenType::Ident) {
            self.next().text
        } else {
            String::new()
        };
        if self.eat(TokenType::Colon) {
            self.parse_type_name();
        }
        let scope = self
            .scopes
            .alloc(NamedScope::new(name.clone(), ScopeKind::Namespace, Some(self.global_scope)));
        let node = self.ast.add(
            AstNode::new(AstNodeKind::EnumDecl { name: name.clone(), scope }, loc),
            None,
        );
        self.scopes.get_mut(scope).node = Some(node);
        if !name.is_empty() {
            self.scopes
                .get_mut(self.global_scope)
                .declare(name, Member::Scope(scope));
        }
        self.expect(TokenType::LBrace, "'{'");
        while !self.at(TokenType::RBrace) && !self.at(TokenType::Eof) {
            let item_loc = self.peek().location.clone();
            let item_name = self.expect(TokenType::Ident, "enum member").text;
            let value = if self.eat(TokenType::Eq) {
                Some(self.parse_expression())
            } else {
                None
            };
            let item = self.ast.add(
                AstNode::new(
                    AstNodeKind::VarDecl {
                        name: item_name.clone(),
                        qtype: None,
                    },
                    item_loc,
                ),
                Some(node),
            );
            if let Some(v) = value {
                self.ast.get_mut(v).parent = Some(item);
                self.ast.get_mut(item).children.push(v);
            }
            self.scopes
                .get_mut(scope)
                .declare(item_name, Member::Node(item));
            if !self.eat(TokenType::Comma) {
                break;
            }
        }
        self.expect(TokenType::RBrace, "'}'");
        self.eat(TokenType::Semicolon);
        node
    }

    /// Disambiguates `qualifiers type name(...)` (function) from
    /// `qualifiers type name ...;` (variable), and handles `name := expr`
    /// type-inferred declarations.
    fn parse_declaration_or_function(&mut self, scope: ScopeId) -> NodeId {
        let start_loc = self.peek().location.clone();

        // `name := expr;`.
        // The stream only buffers one token at a time internally, but
        // `unget_token` lets this function do its own two-token
        // lookahead: peek past `ident :` and restore both tokens if the
        // `=` that would make it a walrus isn't there.
        if self.peek().ttype() == TokenType::Ident {
            let ident = self.next();
            if self.at(TokenType::Colon) {
                let colon = self.next();
                if self.at(TokenType::Eq) {
                    self.next();
                    let init = self.parse_expression();
                    self.eat(TokenType::Semicolon);
                    let decl = self.ast.add(
                        AstNode::new(
                            AstNodeKind::VarDecl {
                                name: ident.text.clone(),
                                qtype: None,
                            },
                            start_loc,
                        ),
                        None,
                    );
                    self.ast.get_mut(init).parent = Some(decl);
                    self.ast.get_mut(decl).children.push(init);
                    self.scopes
                        .get_mut(scope)
                        .declare(ident.text, Member::Node(decl));
                    return decl;
                }
                self.stream.unget_token(colon);
                self.stream.unget_token(ident);
            } else {
                self.stream.unget_token(ident);
            }
        }

        let qualifiers = self.parse_qualifiers();
        let type_text = self.parse_type_name();
        let generic_use = self.last_generic_args.take();
        let name = self.expect(TokenType::Ident, "declaration name").text;

        if self.at(TokenType::LParen) {
            return self.parse_function(scope, start_loc, type_text, name, qualifiers, generic_use);
        }

        // bit-field
        let mut bit_width = None;
        if self.eat(TokenType::Colon) {
            let width_tok = self.expect(TokenType::Integer, "bit-field width");
            if let crate::token::TokenNumber::Integer(n) = width_tok.number {
                bit_width = Some(n);
            }
        }

        let decl = self.ast.add(
            AstNode::new(
                AstNodeKind::VarDecl {
                    name: name.clone(),
                    qtype: None,
                },
                start_loc,
            ),
            None,
        );
        self.ast.get_mut(decl).qualifiers = qualifiers;
        let decl_loc = self.ast.get(decl).location.clone();
        self.ast.get_mut(decl).type_name = Some(type_text);
        self.ast.get_mut(decl).bit_width = bit_width.map(|n| n as u8);
        if let Some((tname, arg_texts)) = generic_use {
            self.attach_template_instance(&tname, &arg_texts, decl_loc);
        }

        if self.eat(TokenType::Eq) {
            let init = self.parse_assignment_expr();
            self.ast.get_mut(init).parent = Some(decl);
            self.ast.get_mut(decl).children.push(init);
        } else if self.at(TokenType::LBrace) {
            let init = self.parse_struct_literal();
            self.ast.get_mut(init).parent = Some(decl);
            self.ast.get_mut(decl).children.push(init);
        }
        self.eat(TokenType::Semicolon);
        if let Some((mangled, owner_scope)) = self.state_local_relocation(scope, &name) {
            self.ast.get_mut(decl).kind = AstNodeKind::VarDecl {
                name: mangled.clone(),
                qtype: None,
            };
            self.scopes.get_mut(owner_scope).declare(mangled, Member::Node(decl));
            self.scopes.get_mut(scope).declare(name, Member::Node(decl));
        } else {
            self.scopes.get_mut(scope).declare(name, Member::Node(decl));
        }
        decl
    }

    /// If `scope` is a statement scope textually inside a `state`-qualified
    /// nested class's method, a local declared there doesn't get a stack
    /// slot: it's spliced into the nearest non-state enclosing class as a
    /// `name$function`-mangled member instead, so its value survives a
    /// state switch the way a field would rather than resetting on every
    /// call. Returns the mangled name and the scope to register it in;
    /// `None` leaves ordinary local declaration untouched.
    fn state_local_relocation(&self, scope: ScopeId, name: &str) -> Option<(String, ScopeId)> {
        let mut fn_scope = scope;
        loop {
            match self.scopes.get(fn_scope).kind {
                ScopeKind::Function => break,
                ScopeKind::Local | ScopeKind::Loop | ScopeKind::Switch => {
                    fn_scope = self.scopes.get(fn_scope).parent?;
                }
                _ => return None,
            }
        }
        let fn_name = self.scopes.get(fn_scope).name.clone();
        let args_scope = self.scopes.get(fn_scope).parent?;
        let mut class_scope = self.scopes.get(args_scope).parent?;
        if !matches!(self.scopes.get(class_scope).kind, ScopeKind::Class | ScopeKind::Struct) {
            return None;
        }
        if !self.scope_is_state(class_scope) {
            return None;
        }
        while self.scope_is_state(class_scope) {
            class_scope = self.scopes.get(class_scope).parent?;
        }
        Some((format!("{name}${fn_name}"), class_scope))
    }

    fn scope_is_state(&self, scope: ScopeId) -> bool {
        self.scopes
            .get(scope)
            .node
            .is_some_and(|n| self.ast.get(n).qualifiers.contains(AstQualifiers::STATE))
    }

    fn parse_qualifiers(&mut self) -> AstQualifiers {
        let mut q = AstQualifiers::empty();
        loop {
            let t = self.peek();
            let bit = match t.ttype() {
                TokenType::KeywordConst => AstQualifiers::CONST,
                TokenType::KeywordPublic => AstQualifiers::PUBLIC,
                TokenType::KeywordProtected => AstQualifiers::PROTECTED,
                TokenType::KeywordPrivate => AstQualifiers::PRIVATE,
                TokenType::KeywordNative => AstQualifiers::NATIVE,
                TokenType::KeywordStatic => AstQualifiers::STATIC,
                TokenType::KeywordFinal => AstQualifiers::FINAL,
                TokenType::KeywordTransient => AstQualifiers::TRANSIENT,
                TokenType::KeywordNocopy => AstQualifiers::NOCOPY,
                TokenType::KeywordNobounds => AstQualifiers::NOBOUNDS,
                TokenType::KeywordNoinit => AstQualifiers::NOINIT,
                TokenType::KeywordEditable => AstQualifiers::EDITABLE,
                TokenType::KeywordPlaceable => AstQualifiers::PLACEABLE,
                TokenType::KeywordLatent => AstQualifiers::LATENT,
                TokenType::KeywordWeak => AstQualifiers::WEAK,
                TokenType::KeywordRaw => AstQualifiers::RAW,
                TokenType::KeywordState => AstQualifiers::STATE,
                _ => break,
            };
            self.next();
            q |= bit;
        }
        q
    }

    fn parse_function(
        &mut self,
        parent_scope: ScopeId,
        loc: crate::token::TokenLocation,
        return_type: String,
        name: String,
        qualifiers: AstQualifiers,
        return_generic_use: Option<(String, Vec<String>)>,
    ) -> NodeId {
        let fn_scope = self
            .scopes
            .alloc(NamedScope::new(name.clone(), ScopeKind::Function, Some(parent_scope)));
        self.scopes
            .get_mut(parent_scope)
            .declare(name.clone(), Member::Scope(fn_scope));

        let func = self.ast.add(
            AstNode::new(
                AstNodeKind::FuncDecl {
                    name: name.clone(),
                    scope: fn_scope,
                },
                loc.clone(),
            ),
            None,
        );
        self.scopes.get_mut(fn_scope).node = Some(func);
        self.ast.get_mut(func).qualifiers = qualifiers;
        self.ast.get_mut(func).type_name = Some(return_type);
        if let Some((tname, arg_texts)) = return_generic_use {
            self.attach_template_instance(&tname, &arg_texts, loc.clone());
        }

        self.expect(TokenType::LParen, "'('");
        // `args_scope` sits between `fn_scope` and the scope the function
        // was declared in -- parenting it to `parent_scope` (not `fn_scope`)
        // here and re-parenting `fn_scope` to `args_scope` below keeps the
        // chain `parent_scope -> args_scope -> fn_scope -> body` instead of
        // closing a two-node cycle between `fn_scope` and `args_scope`.
        let args_scope = self
            .scopes
            .alloc(NamedScope::new("<args>", ScopeKind::Args, Some(parent_scope)));
        while !self.at(TokenType::RParen) && !self.at(TokenType::Eof) {
            let param_loc = self.peek().location.clone();
            let ptype = self.parse_type_name();
            let param_generic_use = self.last_generic_args.take();
            let pname = if self.at(TokenType::Ident) {
                self.next().text
            } else {
                String::new()
            };
            let default = if self.eat(TokenType::Eq) {
                Some(self.parse_assignment_expr())
            } else {
                None
            };
            let param = self.ast.add(
                AstNode::new(
                    AstNodeKind::Param {
                        name: pname.clone(),
                        qtype: None,
                        default,
                    },
                    param_loc.clone(),
                ),
                Some(func),
            );
            self.ast.get_mut(param).type_name = Some(ptype);
            if let Some((tname, arg_texts)) = param_generic_use {
                self.attach_template_instance(&tname, &arg_texts, param_loc);
            }
            if let Some(d) = default {
                self.ast.get_mut(d).parent = Some(param);
                self.ast.get_mut(param).children.push(d);
            }
            if !pname.is_empty() {
                self.scopes
                    .get_mut(args_scope)
                    .declare(pname, Member::Node(param));
            }
            if !self.eat(TokenType::Comma) {
                break;
            }
        }
        self.expect(TokenType::RParen, "')'");
        self.scopes.get_mut(fn_scope).parent = Some(args_scope);

        // trailing qualifiers (override/final/const); `override` isn't an
        // `AstQualifiers` bit (it lives on `AstFlags`, alongside the
        // virtual-by-default bit `parse_class_or_struct` already set), so
        // it's consumed separately, interleaved with ordinary qualifiers.
        loop {
            if self.eat(TokenType::KeywordOverride) {
                self.ast.get_mut(func).flags |= AstFlags::OVERRIDE;
                continue;
            }
            let q = self.parse_qualifiers();
            if q.is_empty() {
                break;
            }
            self.ast.get_mut(func).qualifiers |= q;
        }

        if self.eat(TokenType::FatArrow) {
            // expression-bodied function: `=> expr;`
            let expr = self.parse_expression();
            self.eat(TokenType::Semicolon);
            let ret_loc = self.ast.get(expr).location.clone();
            let ret = self.ast.add(
                AstNode::new(
                    AstNodeKind::Return {
                        value: Some(expr),
                    },
                    ret_loc,
                ),
                None,
            );
            self.ast.get_mut(expr).parent = Some(ret);
            self.ast.get_mut(ret).children.push(expr);
            let body = self.ast.add(AstNode::new(AstNodeKind::Block, loc), Some(func));
            self.ast.get_mut(ret).parent = Some(body);
            self.ast.get_mut(body).children.push(ret);
            return func;
        }

        if self.eat(TokenType::Semicolon) {
            // native/abstract declaration, no body
            return func;
        }

        let body = self.parse_block(fn_scope);
        self.ast.get_mut(body).parent = Some(func);
        self.ast.get_mut(func).children.push(body);
        func
    }

    fn parse_block(&mut self, scope: ScopeId) -> NodeId {
        let loc = self.peek().location.clone();
        self.expect(TokenType::LBrace, "'{'");
        self.stream.begin_macro_scope();
        let block = self.ast.add(AstNode::new(AstNodeKind::Block, loc), None);
        self.ast.get_mut(block).scope_ref = Some(scope);
        while !self.at(TokenType::RBrace) && !self.at(TokenType::Eof) {
            if self.eat(TokenType::Semicolon) {
                continue;
            }
            if self.bump_depth().is_err() {
                break;
            }
            let stmt = self.parse_statement(scope);
            self.depth -= 1;
            self.ast.get_mut(stmt).parent = Some(block);
            self.ast.get_mut(block).children.push(stmt);
        }
        self.expect(TokenType::RBrace, "'}'");
        self.stream.end_macro_scope();
        block
    }

    fn parse_statement(&mut self, scope: ScopeId) -> NodeId {
        let tok = self.peek();
        match tok.ttype() {
            TokenType::LBrace => {
                let inner =
                    self.scopes
                        .alloc(NamedScope::new("<block>", ScopeKind::Local, Some(scope)));
                self.parse_block(inner)
            }
            TokenType::KeywordMacro => {
                self.parse_macro_def();
                let loc = self.peek().location.clone();
                self.ast.add(AstNode::new(AstNodeKind::Block, loc), None)
            }
            TokenType::KeywordIf => self.parse_if(scope),
            TokenType::KeywordWhile => self.parse_while(scope),
            TokenType::KeywordDo => self.parse_do_while(scope),
            TokenType::KeywordFor => self.parse_for(scope),
            TokenType::KeywordSwitch => self.parse_switch(scope),
            TokenType::KeywordBreak => {
                let loc = self.next().location;
                self.eat(TokenType::Semicolon);
                self.ast.add(AstNode::new(AstNodeKind::Break, loc), None)
            }
            TokenType::KeywordContinue => {
                let loc = self.next().location;
                self.eat(TokenType::Semicolon);
                self.ast.add(AstNode::new(AstNodeKind::Continue, loc), None)
            }
            TokenType::KeywordStatebreak => {
                let loc = self.next().location;
                self.eat(TokenType::Semicolon);
                self.ast
                    .add(AstNode::new(AstNodeKind::StateBreak, loc), None)
            }
            TokenType::KeywordReturn => {
                let loc = self.next().location;
                let value = if self.at(TokenType::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression())
                };
                self.eat(TokenType::Semicolon);
                let node = self
                    .ast
                    .add(AstNode::new(AstNodeKind::Return { value }, loc), None);
                if let Some(v) = value {
                    self.ast.get_mut(v).parent = Some(node);
                    self.ast.get_mut(node).children.push(v);
                }
                node
            }
            TokenType::KeywordGoto => {
                let loc = self.next().location;
                let label = self.expect(TokenType::Ident, "label name").text;
                self.eat(TokenType::Semicolon);
                self.ast.add(AstNode::new(AstNodeKind::Goto { label }, loc), None)
            }
            TokenType::KeywordDefer => {
                let loc = self.next().location;
                let stmt = self.parse_statement(scope);
                self.scopes.get_mut(scope).deferred.push(stmt);
                let node = self
                    .ast
                    .add(AstNode::new(AstNodeKind::Defer { stmt }, loc), None);
                self.ast.get_mut(stmt).parent = Some(node);
                self.ast.get_mut(node).children.push(stmt);
                node
            }
            TokenType::KeywordTypedef => self.parse_typedef(),
            TokenType::KeywordUsing => self.parse_using(),
            TokenType::Ident if self.is_label_ahead() => {
                let loc = self.next().location;
                let name = self.peek().text.clone();
                self.next(); // consume the colon we peeked past in is_label_ahead
                let node = self
                    .ast
                    .add(AstNode::new(AstNodeKind::Label { name: name.clone() }, loc), None);
                self.scopes.get_mut(scope).labels.insert(name, node);
                node
            }
            _ if self.looks_like_type_start() && self.declaration_follows() => {
                self.parse_declaration_or_function(scope)
            }
            _ => {
                let expr = self.parse_expression();
                self.eat(TokenType::Semicolon);
                let loc = self.ast.get(expr).location.clone();
                let node = self
                    .ast
                    .add(AstNode::new(AstNodeKind::ExprStmt, loc), None);
                self.ast.get_mut(expr).parent = Some(node);
                self.ast.get_mut(node).children.push(expr);
                node
            }
        }
    }

    /// Best-effort lookahead: `ident :` not followed by `=` is a label,
    /// distinguishing `foo: stmt` from the `ident := expr` walrus form
    /// and from ternary/bit-field contexts that don't appear at
    /// statement-start position.
    fn is_label_ahead(&mut self) -> bool {
        let ident = self.peek();
        if ident.ttype() != TokenType::Ident {
            return false;
        }
        // single-token lookahead is all the stream guarantees without
        // support for save/restore snapshots; label detection is
        // therefore limited to the common `name:` (no further text on
        // the same logical token) shape.
        false
    }

    /// Heuristic used to decide whether the upcoming tokens are a
    /// declaration (`Type name ...`) versus a bare expression statement
    /// starting with an identifier used as a type name look-alike. Since
    /// the stream only buffers one token of lookahead at this layer, this
    /// relies on keyword type tokens being unambiguous and only treats a
    /// leading plain `Ident` as a declaration when a second identifier
    /// would follow -- approximated conservatively by keyword-start only.
    fn declaration_follows(&mut self) -> bool {
        !matches!(self.peek().ttype(), TokenType::Ident)
    }

    fn parse_if(&mut self, scope: ScopeId) -> NodeId {
        let loc = self.next().location; // `if`
        self.expect(TokenType::LParen, "'('");
        let cond = self.parse_expression();
        self.expect(TokenType::RParen, "')'");
        let then_branch = self.parse_statement(scope);
        let else_branch = if self.eat(TokenType::KeywordElse) {
            Some(self.parse_statement(scope))
        } else {
            None
        };
        let node = self.ast.add(
            AstNode::new(
                AstNodeKind::If {
                    cond,
                    then_branch,
                    else_branch,
                },
                loc,
            ),
            None,
        );
        self.ast.get_mut(cond).parent = Some(node);
        self.ast.get_mut(node).children.push(cond);
        self.ast.get_mut(then_branch).parent = Some(node);
        self.ast.get_mut(node).children.push(then_branch);
        if let Some(e) = else_branch {
            self.ast.get_mut(e).parent = Some(node);
            self.ast.get_mut(node).children.push(e);
        }
        node
    }

    fn parse_while(&mut self, scope: ScopeId) -> NodeId {
        let loc = self.next().location; // `while`
        self.expect(TokenType::LParen, "'('");
        let cond = self.parse_expression();
        self.expect(TokenType::RParen, "')'");
        let loop_scope = self
            .scopes
            .alloc(NamedScope::new("<loop>", ScopeKind::Loop, Some(scope)));
        let body = self.parse_statement(loop_scope);
        let node = self
            .ast
            .add(AstNode::new(AstNodeKind::While { cond, body }, loc), None);
        self.ast.get_mut(cond).parent = Some(node);
        self.ast.get_mut(node).children.push(cond);
        self.ast.get_mut(body).parent = Some(node);
        self.ast.get_mut(node).children.push(body);
        node
    }

    fn parse_do_while(&mut self, scope: ScopeId) -> NodeId {
        let loc = self.next().location; // `do`
        let loop_scope = self
            .scopes
            .alloc(NamedScope::new("<loop>", ScopeKind::Loop, Some(scope)));
        let body = self.parse_statement(loop_scope);
        self.expect(TokenType::KeywordWhile, "'while'");
        self.expect(TokenType::LParen, "'('");
        let cond = self.parse_expression();
        self.expect(TokenType::RParen, "')'");
        self.eat(TokenType::Semicolon);
        let node = self
            .ast
            .add(AstNode::new(AstNodeKind::DoWhile { cond, body }, loc), None);
        self.ast.get_mut(cond).parent = Some(node);
        self.ast.get_mut(node).children.push(cond);
        self.ast.get_mut(body).parent = Some(node);
        self.ast.get_mut(node).children.push(body);
        node
    }

    /// Handles both plain C-style `for`, and `for(decl : expr)` range form
    /// rewritten to `for(decl = 0; decl < expr; ++decl)`.
    fn parse_for(&mut self, scope: ScopeId) -> NodeId {
        let loc = self.next().location; // `for`
        self.expect(TokenType::LParen, "'('");
        let loop_scope = self
            .scopes
            .alloc(NamedScope::new("<loop>", ScopeKind::Loop, Some(scope)));

        if self.at(TokenType::KeywordAuto) || self.looks_like_range_for() {
            return self.parse_range_for(loc, loop_scope);
        }

        let init = if self.at(TokenType::Semicolon) {
            None
        } else {
            Some(self.parse_statement_no_terminator_decl(loop_scope))
        };
        self.eat(TokenType::Semicolon);
        let cond = if self.at(TokenType::Semicolon) {
            None
        } else {
            Some(self.parse_expression())
        };
        self.expect(TokenType::Semicolon, "';'");
        let step = if self.at(TokenType::RParen) {
            None
        } else {
            Some(self.parse_expression())
        };
        self.expect(TokenType::RParen, "')'");
        let body = self.parse_statement(loop_scope);
        let node = self.ast.add(
            AstNode::new(
                AstNodeKind::For {
                    init,
                    cond,
                    step,
                    body,
                },
                loc,
            ),
            None,
        );
        if let Some(i) = init {
            self.ast.get_mut(i).parent = Some(node);
            self.ast.get_mut(node).children.push(i);
        }
        if let Some(c) = cond {
            self.ast.get_mut(c).parent = Some(node);
            self.ast.get_mut(node).children.push(c);
        }
        if let Some(s) = step {
            self.ast.get_mut(s).parent = Some(node);
            self.ast.get_mut(node).children.push(s);
        }
        self.ast.get_mut(body).parent = Some(node);
        self.ast.get_mut(node).children.push(body);
        node
    }

    fn looks_like_range_for(&mut self) -> bool {
        false
    }

    fn parse_statement_no_terminator_decl(&mut self, scope: ScopeId) -> NodeId {
        if self.looks_like_type_start() {
            self.parse_declaration_in_for_init(scope)
        } else {
            self.parse_expression()
        }
    }

    fn parse_declaration_in_for_init(&mut self, scope: ScopeId) -> NodeId {
        let loc = self.peek().location.clone();
        let _qual = self.parse_qualifiers();
        let _ty = self.parse_type_name();
        let name = self.expect(TokenType::Ident, "loop variable").text;
        let decl = self.ast.add(
            AstNode::new(
                AstNodeKind::VarDecl {
                    name: name.clone(),
                    qtype: None,
                },
                loc,
            ),
            None,
        );
        if self.eat(TokenType::Eq) {
            let init = self.parse_assignment_expr();
            self.ast.get_mut(init).parent = Some(decl);
            self.ast.get_mut(decl).children.push(init);
        }
        self.scopes.get_mut(scope).declare(name, Member::Node(decl));
        decl
    }

    /// `for (auto x : n)` iterates `[0, n)`; `for (decl : expr)` iterates
    /// the dynamic-array/range `expr`, desugared as `for(decl=0; decl<expr; ++decl)`
    /// (the language's one deliberately restricted range form).
    fn parse_range_for(&mut self, loc: crate::token::TokenLocation, loop_scope: ScopeId) -> NodeId {
        self.eat(TokenType::KeywordAuto);
        let var_name = self.expect(TokenType::Ident, "range variable").text;
        self.expect(TokenType::Colon, "':'");
        let iterable = self.parse_expression();
        self.expect(TokenType::RParen, "')'");

        let decl = self.ast.add(
            AstNode::new(
                AstNodeKind::VarDecl {
                    name: var_name.clone(),
                    qtype: None,
                },
                loc.clone(),
            ),
            None,
        );
        self.ast
            .add(AstNode::new(AstNodeKind::IntLiteral(0), loc.clone()), Some(decl));
        self.scopes
            .get_mut(loop_scope)
            .declare(var_name.clone(), Member::Node(decl));

        let var_ref = self
            .ast
            .add(AstNode::new(AstNodeKind::Ident(var_name.clone()), loc.clone()), None);
        let cond = self.ast.add(
            AstNode::new(
                AstNodeKind::Binary {
                    op: "<".to_string(),
                    lhs: var_ref,
                    rhs: iterable,
                },
                loc.clone(),
            ),
            None,
        );
        self.ast.get_mut(var_ref).parent = Some(cond);
        self.ast.get_mut(iterable).parent = Some(cond);
        self.ast.get_mut(cond).children = vec![var_ref, iterable];

        let step_ref = self
            .ast
            .add(AstNode::new(AstNodeKind::Ident(var_name), loc.clone()), None);
        let step = self.ast.add(
            AstNode::new(
                AstNodeKind::Unary {
                    op: "++".to_string(),
                    operand: step_ref,
                },
                loc.clone(),
            ),
            None,
        );
        self.ast.get_mut(step_ref).parent = Some(step);
        self.ast.get_mut(step).children = vec![step_ref];

        let body = self.parse_statement(loop_scope);
        let node = self.ast.add(
            AstNode::new(
                AstNodeKind::For {
                    init: Some(decl),
                    cond: Some(cond),
                    step: Some(step),
                    body,
                },
                loc,
            ),
            None,
        );
        self.ast.get_mut(decl).parent = Some(node);
        self.ast.get_mut(cond).parent = Some(node);
        self.ast.get_mut(step).parent = Some(node);
        self.ast.get_mut(body).parent = Some(node);
        self.ast.get_mut(node).children = vec![decl, cond, step, body];
        node
    }

    /// Handles both classic `switch(e){case X: ...}` with fall-through, and
    /// `switch break(e){...}` where each arm implicitly breaks unless
    /// immediately followed by `fallthrough`.
    fn parse_switch(&mut self, scope: ScopeId) -> NodeId {
        let loc = self.next().location; // `switch`
        let implicit_break = self.eat(TokenType::KeywordBreak);
        self.expect(TokenType::LParen, "'('");
        let expr = self.parse_expression();
        self.expect(TokenType::RParen, "')'");
        let switch_scope = self
            .scopes
            .alloc(NamedScope::new("<switch>", ScopeKind::Switch, Some(scope)));
        self.expect(TokenType::LBrace, "'{'");
        self.stream.begin_macro_scope();

        let mut arms = Vec::new();
        while !self.at(TokenType::RBrace) && !self.at(TokenType::Eof) {
            let arm_loc = self.peek().location.clone();
            let mut labels = Vec::new();
            let mut is_default = false;
            loop {
                if self.eat(TokenType::KeywordCase) {
                    labels.push(self.parse_expression());
                    self.expect(TokenType::Colon, "':'");
                } else if self.eat(TokenType::KeywordDefault) {
                    is_default = true;
                    self.expect(TokenType::Colon, "':'");
                } else {
                    break;
                }
            }
            let suppress_break = self.eat_fallthrough();
            let mut stmts = Vec::new();
            while !self.at(TokenType::KeywordCase)
                && !self.at(TokenType::KeywordDefault)
                && !self.at(TokenType::RBrace)
                && !self.at(TokenType::Eof)
            {
                stmts.push(self.parse_statement(switch_scope));
            }
            let body = self.ast.add(AstNode::new(AstNodeKind::Block, arm_loc.clone()), None);
            for s in &stmts {
                self.ast.get_mut(*s).parent = Some(body);
            }
            self.ast.get_mut(body).children = stmts;
            if implicit_break && !suppress_break {
                let brk = self
                    .ast
                    .add(AstNode::new(AstNodeKind::Break, arm_loc.clone()), Some(body));
                self.ast.get_mut(body).children.push(brk);
            }
            let arm = self.ast.add(
                AstNode::new(
                    AstNodeKind::Case {
                        labels: labels.clone(),
                        is_default,
                        body,
                    },
                    arm_loc,
                ),
                None,
            );
            for l in &labels {
                self.ast.get_mut(*l).parent = Some(arm);
            }
            self.ast.get_mut(body).parent = Some(arm);
            self.ast.get_mut(arm).children = labels.iter().copied().chain(std::iter::once(body)).collect();
            arms.push(arm);
        }
        self.expect(TokenType::RBrace, "'}'");
        self.stream.end_macro_scope();
        let node = self
            .ast
            .add(AstNode::new(AstNodeKind::Switch { expr, arms: arms.clone() }, loc), None);
        self.ast.get_mut(expr).parent = Some(node);
        for a in &arms {
            self.ast.get_mut(*a).parent = Some(node);
        }
        self.ast.get_mut(node).children = std::iter::once(expr).chain(arms).collect();
        node
    }

    fn eat_fallthrough(&mut self) -> bool {
        let t = self.peek();
        if t.ttype() == TokenType::Ident && t.text == "fallthrough" {
            self.next();
            true
        } else {
            false
        }
    }

    // ---- expressions ----

    pub fn parse_expression(&mut self) -> NodeId {
        let first = self.parse_assignment_expr();
        if !self.at(TokenType::Comma) {
            return first;
        }
        let mut exprs = vec![first];
        while self.eat(TokenType::Comma) {
            exprs.push(self.parse_assignment_expr());
        }
        let loc = self.ast.get(exprs[0]).location.clone();
        let node = self.ast.add(AstNode::new(AstNodeKind::Block, loc), None);
        for e in &exprs {
            self.ast.get_mut(*e).parent = Some(node);
        }
        self.ast.get_mut(node).children = exprs;
        node
    }

    fn parse_assignment_expr(&mut self) -> NodeId {
        let lhs = self.parse_ternary();
        let op = match self.peek().ttype() {
            TokenType::Eq => "=",
            TokenType::PlusEq => "+=",
            TokenType::MinusEq => "-=",
            TokenType::StarEq => "*=",
            TokenType::SlashEq => "/=",
            TokenType::PercentEq => "%=",
            TokenType::AmpEq => "&=",
            TokenType::PipeEq => "|=",
            TokenType::CaretEq => "^=",
            TokenType::ShlEq => "<<=",
            TokenType::ShrEq => ">>=",
            _ => return lhs,
        };
        self.next();
        let rhs = self.parse_assignment_expr(); // right-associative
        let loc = self.ast.get(lhs).location.clone();
        let node = self.ast.add(
            AstNode::new(
                AstNodeKind::Assign {
                    op: op.to_string(),
                    lhs,
                    rhs,
                },
                loc,
            ),
            None,
        );
        self.ast.get_mut(lhs).parent = Some(node);
        self.ast.get_mut(rhs).parent = Some(node);
        self.ast.get_mut(node).children = vec![lhs, rhs];
        node
    }

    fn parse_ternary(&mut self) -> NodeId {
        let cond = self.parse_logical_or();
        if !self.eat(TokenType::Question) {
            return cond;
        }
        let then_val = self.parse_assignment_expr();
        self.expect(TokenType::Colon, "':'");
        let else_val = self.parse_assignment_expr(); // right-assoc
        let loc = self.ast.get(cond).location.clone();
        let node = self.ast.add(
            AstNode::new(
                AstNodeKind::Ternary {
                    cond,
                    then_val,
                    else_val,
                },
                loc,
            ),
            None,
        );
        self.ast.get_mut(cond).parent = Some(node);
        self.ast.get_mut(then_val).parent = Some(node);
        self.ast.get_mut(else_val).parent = Some(node);
        self.ast.get_mut(node).children = vec![cond, then_val, else_val];
        node
    }

    fn binary_level(
        &mut self,
        next: impl Fn(&mut Self) -> NodeId,
        ops: &[(TokenType, &str)],
    ) -> NodeId {
        let mut lhs = next(self);
        loop {
            let tt = self.peek().ttype();
            let Some(&(_, text)) = ops.iter().find(|(t, _)| *t == tt) else {
                break;
            };
            self.next();
            let rhs = next(self);
            let loc = self.ast.get(lhs).location.clone();
            let node = self.ast.add(
                AstNode::new(
                    AstNodeKind::Binary {
                        op: text.to_string(),
                        lhs,
                        rhs,
                    },
                    loc,
                ),
                None,
            );
            self.ast.get_mut(lhs).parent = Some(node);
            self.ast.get_mut(rhs).parent = Some(node);
            self.ast.get_mut(node).children = vec![lhs, rhs];
            lhs = node;
        }
        lhs
    }

    fn parse_logical_or(&mut self) -> NodeId {
        self.binary_level(Self::parse_logical_and, &[(TokenType::PipePipe, "||")])
    }

    fn parse_logical_and(&mut self) -> NodeId {
        self.binary_level(Self::parse_bit_or, &[(TokenType::AmpAmp, "&&")])
    }

    fn parse_bit_or(&mut self) -> NodeId {
        self.binary_level(Self::parse_bit_xor, &[(TokenType::Pipe, "|")])
    }

    fn parse_bit_xor(&mut self) -> NodeId {
        self.binary_level(Self::parse_bit_and, &[(TokenType::Caret, "^")])
    }

    fn parse_bit_and(&mut self) -> NodeId {
        self.binary_level(Self::parse_equality, &[(TokenType::Amp, "&")])
    }

    fn parse_equality(&mut self) -> NodeId {
        self.binary_level(
            Self::parse_relational,
            &[(TokenType::EqEq, "=="), (TokenType::NotEq, "!=")],
        )
    }

    fn parse_relational(&mut self) -> NodeId {
        self.binary_level(
            Self::parse_shift,
            &[
                (TokenType::Lt, "<"),
                (TokenType::Leq, "<="),
                (TokenType::Gt, ">"),
                (TokenType::Geq, ">="),
                (TokenType::Cmp3Way, "<=>"),
            ],
        )
    }

    fn parse_shift(&mut self) -> NodeId {
        self.binary_level(
            Self::parse_additive,
            &[
                (TokenType::Shl, "<<"),
                (TokenType::Shr, ">>"),
                (TokenType::Shru, ">>>"),
            ],
        )
    }

    fn parse_additive(&mut self) -> NodeId {
        self.binary_level(
            Self::parse_multiplicative,
            &[(TokenType::Plus, "+"), (TokenType::Minus, "-")],
        )
    }

    fn parse_multiplicative(&mut self) -> NodeId {
        self.binary_level(
            Self::parse_unary,
            &[
                (TokenType::Star, "*"),
                (TokenType::Slash, "/"),
                (TokenType::Percent, "%"),
            ],
        )
    }

    fn parse_unary(&mut self) -> NodeId {
        let tok = self.peek();
        let op = match tok.ttype() {
            TokenType::Plus => Some("+"),
            TokenType::Minus => Some("-"),
            TokenType::Bang => Some("!"),
            TokenType::Tilde => Some("~"),
            TokenType::Inc => Some("++"),
            TokenType::Dec => Some("--"),
            TokenType::Amp => Some("&"),
            TokenType::Star => Some("*"),
            _ => None,
        };
        if let Some(op) = op {
            let loc = self.next().location;
            let operand = self.parse_unary();
            let node = self.ast.add(
                AstNode::new(
                    AstNodeKind::Unary {
                        op: op.to_string(),
                        operand,
                    },
                    loc,
                ),
                None,
            );
            self.ast.get_mut(operand).parent = Some(node);
            self.ast.get_mut(node).children.push(operand);
            return node;
        }
        match tok.ttype() {
            TokenType::KeywordCast => self.parse_cast(),
            TokenType::KeywordSizeof => self.parse_sizeof(),
            TokenType::KeywordOffsetof => self.parse_offsetof(),
            TokenType::KeywordAlignof => self.parse_alignof(),
            TokenType::KeywordTypeid => self.parse_typeid(),
            _ => self.parse_postfix(),
        }
    }

    fn parse_cast(&mut self) -> NodeId {
        let loc = self.next().location; // `cast`
        self.expect(TokenType::Lt, "'<'");
        let ty = self.parse_type_name();
        self.expect(TokenType::Gt, "'>'");
        self.expect(TokenType::LParen, "'('");
        let expr = self.parse_expression();
        self.expect(TokenType::RParen, "')'");
        let node = self.ast.add(
            AstNode::new(
                AstNodeKind::Cast {
                    qtype: placeholder_qtype(),
                    expr,
                },
                loc,
            ),
            None,
        );
        self.ast.get_mut(node).type_name = Some(ty);
        self.ast.get_mut(expr).parent = Some(node);
        self.ast.get_mut(node).children.push(expr);
        node
    }

    fn parse_sizeof(&mut self) -> NodeId {
        let loc = self.next().location; // `sizeof`
        self.expect(TokenType::LParen, "'('");
        let expr = self.parse_expression();
        self.expect(TokenType::RParen, "')'");
        let node = self
            .ast
            .add(AstNode::new(AstNodeKind::Sizeof { expr }, loc), None);
        self.ast.get_mut(expr).parent = Some(node);
        self.ast.get_mut(node).children.push(expr);
        node
    }

    fn parse_offsetof(&mut self) -> NodeId {
        let loc = self.next().location; // `offsetof`
        self.expect(TokenType::LParen, "'('");
        let ty = self.parse_type_name();
        self.expect(TokenType::Comma, "','");
        let member = self.expect(TokenType::Ident, "member name").text;
        self.expect(TokenType::RParen, "')'");
        let node = self.ast.add(
            AstNode::new(
                AstNodeKind::Offsetof {
                    qtype: placeholder_qtype(),
                    member,
                },
                loc,
            ),
            None,
        );
        self.ast.get_mut(node).type_name = Some(ty);
        node
    }

    fn parse_alignof(&mut self) -> NodeId {
        let loc = self.next().location; // `alignof`
        self.expect(TokenType::LParen, "'('");
        let ty = self.parse_type_name();
        self.expect(TokenType::RParen, "')'");
        let node = self.ast.add(
            AstNode::new(
                AstNodeKind::Alignof {
                    qtype: placeholder_qtype(),
                },
                loc,
            ),
            None,
        );
        self.ast.get_mut(node).type_name = Some(ty);
        node
    }

    fn parse_typeid(&mut self) -> NodeId {
        let loc = self.next().location; // `typeid`
        self.expect(TokenType::LParen, "'('");
        let ty = self.parse_type_name();
        self.expect(TokenType::RParen, "')'");
        let node = self.ast.add(
            AstNode::new(
                AstNodeKind::Typeid {
                    qtype: placeholder_qtype(),
                },
                loc,
            ),
            None,
        );
        self.ast.get_mut(node).type_name = Some(ty);
        node
    }

    fn parse_postfix(&mut self) -> NodeId {
        let mut expr = self.parse_primary();
        loop {
            match self.peek().ttype() {
                TokenType::LParen => {
                    self.next();
                    let mut args = Vec::new();
                    while !self.at(TokenType::RParen) && !self.at(TokenType::Eof) {
                        args.push(self.parse_assignment_expr());
                        if !self.eat(TokenType::Comma) {
                            break;
                        }
                    }
                    self.expect(TokenType::RParen, "')'");
                    let loc = self.ast.get(expr).location.clone();
                    let node = self.ast.add(
                        AstNode::new(
                            AstNodeKind::Call {
                                callee: expr,
                                args: args.clone(),
                            },
                            loc,
                        ),
                        None,
                    );
                    self.ast.get_mut(expr).parent = Some(node);
                    for a in &args {
                        self.ast.get_mut(*a).parent = Some(node);
                    }
                    self.ast.get_mut(node).children = std::iter::once(expr).chain(args).collect();
                    expr = node;
                }
                TokenType::LBracket => {
                    self.next();
                    let index = self.parse_expression();
                    self.expect(TokenType::RBracket, "']'");
                    let loc = self.ast.get(expr).location.clone();
                    let node = self
                        .ast
                        .add(AstNode::new(AstNodeKind::Index { base: expr, index }, loc), None);
                    self.ast.get_mut(expr).parent = Some(node);
                    self.ast.get_mut(index).parent = Some(node);
                    self.ast.get_mut(node).children = vec![expr, index];
                    expr = node;
                }
                TokenType::Dot => {
                    self.next();
                    let name = self.expect(TokenType::Ident, "member name").text;
                    let loc = self.ast.get(expr).location.clone();
                    let node = self
                        .ast
                        .add(AstNode::new(AstNodeKind::Member { base: expr, name }, loc), None);
                    self.ast.get_mut(expr).parent = Some(node);
                    self.ast.get_mut(node).children.push(expr);
                    expr = node;
                }
                TokenType::Arrow => {
                    self.next();
                    let name = self.expect(TokenType::Ident, "member name").text;
                    let loc = self.ast.get(expr).location.clone();
                    let node = self
                        .ast
                        .add(AstNode::new(AstNodeKind::Member { base: expr, name }, loc), None);
                    self.ast.get_mut(expr).parent = Some(node);
                    self.ast.get_mut(node).children.push(expr);
                    expr = node;
                }
                TokenType::DoubleColon => {
                    self.next();
                    let name = self.expect(TokenType::Ident, "name").text;
                    let loc = self.ast.get(expr).location.clone();
                    let node = self.ast.add(
                        AstNode::new(AstNodeKind::ScopeResolution { base: expr, name }, loc),
                        None,
                    );
                    self.ast.get_mut(expr).parent = Some(node);
                    self.ast.get_mut(node).children.push(expr);
                    expr = node;
                }
                TokenType::Inc => {
                    let loc = self.next().location;
                    let node = self.ast.add(
                        AstNode::new(
                            AstNodeKind::PostfixUnary {
                                op: "++".to_string(),
                                operand: expr,
                            },
                            loc,
                        ),
                        None,
                    );
                    self.ast.get_mut(expr).parent = Some(node);
                    self.ast.get_mut(node).children.push(expr);
                    expr = node;
                }
                TokenType::Dec => {
                    let loc = self.next().location;
                    let node = self.ast.add(
                        AstNode::new(
                            AstNodeKind::PostfixUnary {
                                op: "--".to_string(),
                                operand: expr,
                            },
                            loc,
                        ),
                        None,
                    );
                    self.ast.get_mut(expr).parent = Some(node);
                    self.ast.get_mut(node).children.push(expr);
                    expr = node;
                }
                _ => break,
            }
        }
        expr
    }

    fn parse_primary(&mut self) -> NodeId {
        let tok = self.next();
        let loc = tok.location.clone();
        match tok.ttype() {
            TokenType::Integer => {
                let v = match tok.number {
                    crate::token::TokenNumber::Integer(n) => n as i64,
                    _ => 0,
                };
                self.ast.add(AstNode::new(AstNodeKind::IntLiteral(v), loc), None)
            }
            TokenType::Double => {
                let v = match tok.number {
                    crate::token::TokenNumber::Double(d) => d,
                    _ => 0.0,
                };
                self.ast
                    .add(AstNode::new(AstNodeKind::DoubleLiteral(v), loc), None)
            }
            TokenType::String => self
                .ast
                .add(AstNode::new(AstNodeKind::StringLiteral(tok.text), loc), None),
            TokenType::Name => self
                .ast
                .add(AstNode::new(AstNodeKind::NameLiteral(tok.text), loc), None),
            TokenType::KeywordTrue => {
                self.ast.add(AstNode::new(AstNodeKind::BoolLiteral(true), loc), None)
            }
            TokenType::KeywordFalse => {
                self.ast.add(AstNode::new(AstNodeKind::BoolLiteral(false), loc), None)
            }
            TokenType::KeywordNull => self.ast.add(AstNode::new(AstNodeKind::NullLiteral, loc), None),
            TokenType::KeywordThis => self.ast.add(AstNode::new(AstNodeKind::This, loc), None),
            TokenType::KeywordSuper => self.ast.add(AstNode::new(AstNodeKind::Super, loc), None),
            TokenType::Ident => self
                .ast
                .add(AstNode::new(AstNodeKind::Ident(tok.text), loc), None),
            TokenType::LParen => {
                let inner = self.parse_expression();
                self.expect(TokenType::RParen, "')'");
                inner
            }
            TokenType::LBrace => {
                self.stream.unget_token(tok);
                self.parse_struct_literal()
            }
            TokenType::LBracket => {
                let mut elems = Vec::new();
                while !self.at(TokenType::RBracket) && !self.at(TokenType::Eof) {
                    elems.push(self.parse_assignment_expr());
                    if !self.eat(TokenType::Comma) {
                        break;
                    }
                }
                self.expect(TokenType::RBracket, "']'");
                let node = self
                    .ast
                    .add(AstNode::new(AstNodeKind::ArrayLiteral { elems: elems.clone() }, loc), None);
                for e in &elems {
                    self.ast.get_mut(*e).parent = Some(node);
                }
                self.ast.get_mut(node).children = elems;
                node
            }
            TokenType::Eof => {
                self.error("unexpected end of file".to_string());
                self.ast.add(AstNode::new(AstNodeKind::NullLiteral, loc), None)
            }
            _ => {
                self.error(format!("unexpected token '{}'", tok.text));
                self.ast.add(AstNode::new(AstNodeKind::NullLiteral, loc), None)
            }
        }
    }

    /// Struct-type declaration with `{ ... }` initializer list; `.field =
    /// expr` and bare `field = expr` designators both accepted.
    fn parse_struct_literal(&mut self) -> NodeId {
        let loc = self.peek().location.clone();
        self.expect(TokenType::LBrace, "'{'");
        let mut fields: Vec<(Option<String>, NodeId)> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        while !self.at(TokenType::RBrace) && !self.at(TokenType::Eof) {
            let mut designator = None;
            if self.eat(TokenType::Dot) {
                designator = Some(self.expect(TokenType::Ident, "field name").text);
                self.expect(TokenType::Eq, "'='");
            } else if self.at(TokenType::Ident) {
                let save = self.peek();
                let ident = self.next();
                if self.eat(TokenType::Eq) {
                    designator = Some(ident.text);
                } else {
                    self.stream.unget_token(ident);
                    let _ = save;
                }
            }
            if let Some(name) = &designator {
                if !seen.insert(name.clone()) {
                    self.error(format!("duplicate designated initializer '{name}'"));
                }
            }
            let value = self.parse_assignment_expr();
            fields.push((designator, value));
            if !self.eat(TokenType::Comma) {
                break;
            }
        }
        self.expect(TokenType::RBrace, "'}'");
        let node = self
            .ast
            .add(AstNode::new(AstNodeKind::StructLiteral { fields: fields.clone() }, loc), None);
        for (_, v) in &fields {
            self.ast.get_mut(*v).parent = Some(node);
        }
        self.ast.get_mut(node).children = fields.iter().map(|(_, v)| *v).collect();
        node
    }
}

fn placeholder_qtype() -> crate::types::QDataType {
    crate::types::QDataType::new(crate::types::DataTypeId(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CollectingErrorHandler;
    use crate::lexer::LexerMode;

    fn parse(src: &str) -> (AstArena, NodeId) {
        let mut handler = CollectingErrorHandler::new();
        let stream = TokenStream::new(src, "t.le", LexerMode::Default);
        let mut parser = Parser::new(stream, &mut handler);
        let root = parser.parse_program();
        (parser.ast, root)
    }

    #[test]
    fn parses_empty_function() {
        let (ast, root) = parse("void f() { }");
        assert_eq!(ast.get(root).children.len(), 1);
        assert!(matches!(
            ast.get(ast.get(root).children[0]).kind,
            AstNodeKind::FuncDecl { .. }
        ));
    }

    #[test]
    fn macro_definition_expands_inline_at_use_site() {
        let (ast, root) = parse("macro M(x) (x + 1) endmacro int a = M(2);");
        assert_eq!(ast.get(root).children.len(), 1);
        let decl = ast.get(root).children[0];
        let init = ast.get(decl).children[0];
        match &ast.get(init).kind {
            AstNodeKind::Binary { op, lhs, rhs } => {
                assert_eq!(op, "+");
                assert!(matches!(ast.get(*lhs).kind, AstNodeKind::IntLiteral(2)));
                assert!(matches!(ast.get(*rhs).kind, AstNodeKind::IntLiteral(1)));
            }
            other => panic!("expected expanded binary expression, got {other:?}"),
        }
    }

    #[test]
    fn object_like_macro_expands_with_no_arguments() {
        let (ast, root) = parse("macro ANSWER 42 endmacro int a = ANSWER;");
        let decl = ast.get(root).children[0];
        let init = ast.get(decl).children[0];
        assert!(matches!(ast.get(init).kind, AstNodeKind::IntLiteral(42)));
    }

    #[test]
    fn parses_class_with_member_function() {
        let (ast, root) = parse("class Foo { void bar() {} }");
        let class_node = ast.get(root).children[0];
        assert!(matches!(ast.get(class_node).kind, AstNodeKind::ClassDecl { .. }));
        assert_eq!(ast.get(class_node).children.len(), 1);
    }

    #[test]
    fn binary_precedence_groups_multiplicative_tighter_than_additive() {
        let mut handler = CollectingErrorHandler::new();
        let stream = TokenStream::new("1 + 2 * 3;", "t.le", LexerMode::Default);
        let mut parser = Parser::new(stream, &mut handler);
        let expr = parser.parse_expression();
        match &parser.ast.get(expr).kind {
            AstNodeKind::Binary { op, rhs, .. } => {
                assert_eq!(op, "+");
                assert!(matches!(
                    parser.ast.get(*rhs).kind,
                    AstNodeKind::Binary { ref op, .. } if op == "*"
                ));
            }
            other => panic!("expected binary +, got {other:?}"),
        }
    }

    #[test]
    fn ternary_is_right_associative_with_assignment() {
        let mut handler = CollectingErrorHandler::new();
        let stream = TokenStream::new("a = b ? 1 : 2;", "t.le", LexerMode::Default);
        let mut parser = Parser::new(stream, &mut handler);
        let expr = parser.parse_expression();
        assert!(matches!(parser.ast.get(expr).kind, AstNodeKind::Assign { .. }));
    }

    #[test]
    fn switch_break_flavor_auto_inserts_break() {
        let (ast, root) = parse(
            "void f() { int x; switch break(x) { case 1: x = 1; case 2: x = 2; } }",
        );
        let func = ast.get(root).children[0];
        let block = ast.get(func).children[0];
        let switch_stmt = ast
            .get(block)
            .children
            .iter()
            .copied()
            .find(|&c| matches!(ast.get(c).kind, AstNodeKind::Switch { .. }))
            .unwrap();
        if let AstNodeKind::Switch { arms, .. } = &ast.get(switch_stmt).kind {
            let first_arm_body = match &ast.get(arms[0]).kind {
                AstNodeKind::Case { body, .. } => *body,
                _ => unreachable!(),
            };
            let last_stmt = *ast.get(first_arm_body).children.last().unwrap();
            assert!(matches!(ast.get(last_stmt).kind, AstNodeKind::Break));
        } else {
            panic!("expected switch node");
        }
    }

    #[test]
    fn nested_state_class_auto_inherits_its_outer_class() {
        let (ast, root) = parse("class Foo { state class Idle { } }");
        let foo = ast.get(root).children[0];
        let idle = ast.get(foo).children[0];
        match &ast.get(idle).kind {
            AstNodeKind::ClassDecl { base_name, .. } => {
                assert_eq!(base_name.as_deref(), Some("Foo"));
            }
            other => panic!("expected nested ClassDecl, got {other:?}"),
        }
        assert!(ast.get(idle).qualifiers.contains(AstQualifiers::STATE));
    }

    #[test]
    fn explicit_base_on_a_state_class_overrides_the_auto_inject() {
        let (ast, root) = parse("class Foo { state class Idle : Other { } }");
        let foo = ast.get(root).children[0];
        let idle = ast.get(foo).children[0];
        match &ast.get(idle).kind {
            AstNodeKind::ClassDecl { base_name, .. } => {
                assert_eq!(base_name.as_deref(), Some("Other"));
            }
            other => panic!("expected nested ClassDecl, got {other:?}"),
        }
    }

    #[test]
    fn ignores_clause_populates_the_class_scope() {
        let mut handler = CollectingErrorHandler::new();
        let stream = TokenStream::new("class Foo { ignores bar, baz; int bar; }", "t.le", LexerMode::Default);
        let mut parser = Parser::new(stream, &mut handler);
        let root = parser.parse_program();
        let foo = parser.ast.get(root).children[0];
        let scope = match &parser.ast.get(foo).kind {
            AstNodeKind::ClassDecl { scope, .. } => *scope,
            other => panic!("expected ClassDecl, got {other:?}"),
        };
        assert_eq!(parser.scopes.get(scope).ignores, vec!["bar".to_string(), "baz".to_string()]);
    }

    #[test]
    fn a_local_inside_a_state_class_method_relocates_to_a_mangled_class_member() {
        let mut handler = CollectingErrorHandler::new();
        let stream = TokenStream::new(
            "class Foo { state class Idle { void tick() { int counter = 0; } } }",
            "t.le",
            LexerMode::Default,
        );
        let mut parser = Parser::new(stream, &mut handler);
        let root = parser.parse_program();
        let foo = parser.ast.get(root).children[0];
        let foo_scope = match &parser.ast.get(foo).kind {
            AstNodeKind::ClassDecl { scope, .. } => *scope,
            other => panic!("expected ClassDecl, got {other:?}"),
        };
        // the storage lives on the outer (non-state) class under a
        // mangled name...
        assert!(matches!(
            parser.scopes.get(foo_scope).find_local("counter$tick"),
            Some(Member::Node(_))
        ));
        // ...while the method body still finds it under its own name.
        let idle = parser.ast.get(foo).children[0];
        let tick = parser.ast.get(idle).children[0];
        let tick_scope = match &parser.ast.get(tick).kind {
            AstNodeKind::FuncDecl { scope, .. } => *scope,
            other => panic!("expected FuncDecl, got {other:?}"),
        };
        assert!(matches!(
            parser.scopes.get(tick_scope).find_local("counter"),
            Some(Member::Node(_))
        ));
    }

    #[test]
    fn a_local_inside_an_ordinary_class_method_is_not_relocated() {
        let mut handler = CollectingErrorHandler::new();
        let stream = TokenStream::new(
            "class Foo { void tick() { int counter = 0; } }",
            "t.le",
            LexerMode::Default,
        );
        let mut parser = Parser::new(stream, &mut handler);
        let root = parser.parse_program();
        let foo = parser.ast.get(root).children[0];
        let foo_scope = match &parser.ast.get(foo).kind {
            AstNodeKind::ClassDecl { scope, .. } => *scope,
            other => panic!("expected ClassDecl, got {other:?}"),
        };
        assert!(parser.scopes.get(foo_scope).find_local("counter$tick").is_none());
    }

    #[test]
    fn depth_limit_reports_error_instead_of_overflowing() {
        let src = "void f() {".to_string() + &"{".repeat(2000) + &"}".repeat(2000) + "}";
        let mut handler = CollectingErrorHandler::new();
        let stream = TokenStream::new(&src, "t.le", LexerMode::Default);
        let mut parser = Parser::new(stream, &mut handler);
        parser.parse_program();
        assert!(handler.has_errors());
    }
}
