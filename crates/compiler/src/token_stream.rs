//! Token stream and macro engine
//!
//! Multi-token lookahead sits above the byte-level [`crate::lexer::Lexer`]
//! here, plus the whole token-macro preprocessor: definition, recursive
//! expansion with a locked-name recursion guard, `__stringize`/`__concat`,
//! and the magic identifiers (`__LINE__`, `__FILE__`, `__func__`,
//! `__COUNTER__`, `self`).

use std::collections::{HashMap, HashSet, VecDeque};

use crate::lexer::{Lexer, LexerMode};
use crate::token::{Token, TokenType};

#[derive(Debug, Clone)]
pub struct Macro {
    pub name: String,
    pub params: Vec<String>,
    pub variadic: bool,
    pub body: Vec<Token>,
}

struct CounterCell(u64);

impl CounterCell {
    fn next(&mut self) -> u64 {
        let v = self.0;
        self.0 += 1;
        v
    }
}

/// One pushed macro-body activation: the remaining tokens of an expansion
/// plus the macro name, so it can be unlocked once fully consumed. Locked
/// macros cannot be re-expanded until their activation is popped.
struct Activation {
    name: String,
    tokens: VecDeque<Token>,
}

pub struct TokenStream {
    lexer: Lexer,
    /// Tokens returned to the stream via `unget_token`, highest-priority
    /// (consumed before anything else).
    ungot: VecDeque<Token>,
    /// Currently active macro expansions, most recent last.
    activations: Vec<Activation>,
    macros: HashMap<String, Macro>,
    /// Per-`BeginMacroScope` record of which macro names were newly
    /// defined, so `EndMacroScope` can erase exactly those.
    scope_stack: Vec<Vec<String>>,
    locked: HashSet<String>,
    /// Tokens queued by `AppendEof` to be delivered once the lexer itself
    /// reaches EOF.
    eof_queue: VecDeque<Token>,
    counter: CounterCell,
    self_name: Option<String>,
    func_name: Option<String>,
}

impl TokenStream {
    pub fn new(source: &str, file: impl Into<String>, mode: LexerMode) -> Self {
        TokenStream {
            lexer: Lexer::new(source, file, mode),
            ungot: VecDeque::new(),
            activations: Vec::new(),
            macros: HashMap::new(),
            scope_stack: Vec::new(),
            locked: HashSet::new(),
            eof_queue: VecDeque::new(),
            counter: CounterCell(0),
            self_name: None,
            func_name: None,
        }
    }

    pub fn set_self_name(&mut self, name: Option<String>) {
        self.self_name = name;
    }

    pub fn set_func_name(&mut self, name: Option<String>) {
        self.func_name = name;
    }

    /// Queue tokens to be delivered once the underlying lexer signals EOF.
    pub fn append_eof(&mut self, tokens: Vec<Token>) {
        self.eof_queue.extend(tokens);
    }

    pub fn begin_macro_scope(&mut self) {
        self.scope_stack.push(Vec::new());
    }

    pub fn end_macro_scope(&mut self) {
        if let Some(names) = self.scope_stack.pop() {
            for name in names {
                self.macros.remove(&name);
            }
        }
    }

    /// Retargets the underlying lexer's line/file after a `#line` directive.
    pub fn set_location(&mut self, line: i32, file: Option<String>) {
        self.lexer.set_token_location(line, file);
    }

    /// Reads a `macro NAME(params...) body... endmacro` (or object-like
    /// `macro NAME body... endmacro`) definition from raw, unexpanded
    /// tokens. Assumes the leading `macro` keyword has already been
    /// consumed by the caller.
    pub fn parse_macro_definition(&mut self) -> Result<Macro, String> {
        let name_tok = self.next_raw()?;
        if name_tok.ttype() != TokenType::Ident {
            return Err("expected macro name".to_string());
        }
        let name = name_tok.text;

        let mut params = Vec::new();
        let mut variadic = false;
        if self.peek_raw()?.ttype() == TokenType::LParen {
            self.next_raw()?;
            loop {
                let t = self.next_raw()?;
                match t.ttype() {
                    TokenType::RParen => break,
                    TokenType::Ident => params.push(t.text),
                    TokenType::Ellipsis => variadic = true,
                    TokenType::Comma => continue,
                    TokenType::Eof => return Err("unterminated macro parameter list".to_string()),
                    _ => return Err(format!("unexpected token '{}' in macro parameters", t.text)),
                }
            }
        }

        let mut body = Vec::new();
        loop {
            let t = self.next_raw()?;
            match t.ttype() {
                TokenType::KeywordEndmacro => break,
                TokenType::Eof => return Err(format!("unterminated macro '{name}'")),
                _ => body.push(t),
            }
        }

        Ok(Macro {
            name,
            params,
            variadic,
            body,
        })
    }

    /// `AddSwapSimpleMacro`: installs a macro, erroring on
    /// redefinition.
    pub fn add_macro(&mut self, m: Macro) -> Result<(), String> {
        if self.macros.contains_key(&m.name) {
            return Err(format!("macro '{}' redefined", m.name));
        }
        if let Some(scope) = self.scope_stack.last_mut() {
            scope.push(m.name.clone());
        }
        self.macros.insert(m.name.clone(), m);
        Ok(())
    }

    /// Raw token source beneath macro expansion: ungot tokens, then active
    /// macro-body activations (innermost first), then the lexer, then the
    /// EOF injection queue.
    fn next_raw(&mut self) -> Result<Token, String> {
        if let Some(t) = self.ungot.pop_front() {
            return Ok(t);
        }
        while let Some(top) = self.activations.last_mut() {
            if let Some(t) = top.tokens.pop_front() {
                return Ok(t);
            }
            let done = self.activations.pop().unwrap();
            self.locked.remove(&done.name);
        }
        let t = self.lexer.get_token()?;
        if t.ttype() == TokenType::Eof {
            if let Some(t) = self.eof_queue.pop_front() {
                return Ok(t);
            }
        }
        Ok(t)
    }

    fn peek_raw(&mut self) -> Result<Token, String> {
        let t = self.next_raw()?;
        self.ungot.push_front(t.clone());
        Ok(t)
    }

    /// Reads one balanced-parenthesis macro argument list, splitting on top-level commas. The trailing `...` parameter, if
    /// present, absorbs every remaining argument as one joined sequence.
    fn read_macro_args(&mut self) -> Result<Vec<Vec<Token>>, String> {
        let open = self.next_raw()?;
        if open.ttype() != TokenType::LParen {
            return Err("expected '(' to begin macro arguments".to_string());
        }
        let mut args: Vec<Vec<Token>> = vec![Vec::new()];
        let mut depth = 0i32;
        loop {
            let t = self.next_raw()?;
            match t.ttype() {
                TokenType::LParen => {
                    depth += 1;
                    args.last_mut().unwrap().push(t);
                }
                TokenType::RParen => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                    args.last_mut().unwrap().push(t);
                }
                TokenType::Comma if depth == 0 => {
                    args.push(Vec::new());
                }
                TokenType::Eof => return Err("unterminated macro argument list".to_string()),
                _ => args.last_mut().unwrap().push(t),
            }
        }
        if args.len() == 1 && args[0].is_empty() {
            args.clear();
        }
        Ok(args)
    }

    /// Re-prints a token sequence into one string: adjacent identical binary operators get a
    /// separating space so e.g. `+` `+` doesn't read back as `++`.
    fn stringize(tokens: &[Token]) -> String {
        let mut out = String::new();
        let mut prev: Option<&Token> = None;
        for t in tokens {
            if let Some(p) = prev {
                let needs_space = p.text == t.text && !t.text.is_empty();
                if needs_space || (p.is_text() && t.is_text()) {
                    out.push(' ');
                }
            }
            if t.ttype() == TokenType::String {
                out.push('"');
                out.push_str(&t.text);
                out.push('"');
            } else {
                out.push_str(&t.text);
            }
            prev = Some(t);
        }
        out
    }

    /// step 5 `__concat`: fuses two identifier/number tokens
    /// into one identifier token, composing left-to-right across more
    /// than two operands.
    fn concat(tokens: &[Token]) -> Token {
        let mut text = String::new();
        let mut loc = None;
        for t in tokens {
            if loc.is_none() {
                loc = Some(t.location.clone());
            }
            text.push_str(&t.text);
        }
        Token {
            ttype: Some(TokenType::Ident),
            location: loc.unwrap_or_default(),
            text,
            ..Default::default()
        }
    }

    /// Builds the token list to push as a macro's expansion body,
    /// substituting parameters, `__VA_ARGS__`/`__VA_COUNT__`, and the
    /// magic identifiers, and evaluating `__stringize`/`__concat` forms
    /// inline.
    fn instantiate_body(
        &mut self,
        m: &Macro,
        args: &[Vec<Token>],
        expansion_loc: &crate::token::TokenLocation,
    ) -> Result<Vec<Token>, String> {
        let param_arg = |name: &str| -> Option<Vec<Token>> {
            m.params.iter().position(|p| p == name).and_then(|i| {
                if m.variadic && i == m.params.len() - 1 {
                    let rest: Vec<Token> = args
                        .get(i..)
                        .into_iter()
                        .flatten()
                        .flat_map(|a| a.iter().cloned())
                        .collect();
                    Some(rest)
                } else {
                    args.get(i).cloned()
                }
            })
        };

        let mut out: Vec<Token> = Vec::new();
        let mut i = 0;
        while i < m.body.len() {
            let tok = &m.body[i];

            if tok.ttype() == TokenType::Ident && tok.text == "__stringize" {
                if let Some(open) = m.body.get(i + 1).filter(|t| t.ttype() == TokenType::LParen) {
                    let _ = open;
                    let (arg_tokens, consumed) = self.collect_paren_group(&m.body, i + 1)?;
                    let expanded = self.substitute_tokens(&arg_tokens, &param_arg);
                    let text = Self::stringize(&expanded);
                    out.push(Token {
                        ttype: Some(TokenType::String),
                        location: tok.location.clone(),
                        text,
                        ..Default::default()
                    });
                    i += 1 + consumed;
                    continue;
                }
            }

            if tok.ttype() == TokenType::Ident && tok.text == "__VA_OPT__" {
                if let Some(open) = m.body.get(i + 1).filter(|t| t.ttype() == TokenType::LParen) {
                    let _ = open;
                    let (inner, consumed) = self.collect_paren_group(&m.body, i + 1)?;
                    let variadic_count = args.len().saturating_sub(m.params.len().saturating_sub(1));
                    if m.variadic && variadic_count > 0 {
                        let expanded = self.substitute_tokens(&inner, &param_arg);
                        out.extend(expanded);
                    }
                    i += 1 + consumed;
                    continue;
                }
            }

            match tok.text.as_str() {
                "__LINE__" => {
                    out.push(Token {
                        ttype: Some(TokenType::Integer),
                        location: tok.location.clone(),
                        text: expansion_loc.line.to_string(),
                        number: crate::token::TokenNumber::Integer(expansion_loc.line as u64),
                        ..Default::default()
                    });
                    i += 1;
                    continue;
                }
                "__FILE__" => {
                    out.push(Token {
                        ttype: Some(TokenType::String),
                        location: tok.location.clone(),
                        text: expansion_loc.file.clone(),
                        ..Default::default()
                    });
                    i += 1;
                    continue;
                }
                "__func__" => {
                    out.push(Token {
                        ttype: Some(TokenType::String),
                        location: tok.location.clone(),
                        text: self.func_name.clone().unwrap_or_default(),
                        ..Default::default()
                    });
                    i += 1;
                    continue;
                }
                "__COUNTER__" => {
                    out.push(Token {
                        ttype: Some(TokenType::Integer),
                        location: tok.location.clone(),
                        text: String::new(),
                        number: crate::token::TokenNumber::Integer(self.counter.next()),
                        ..Default::default()
                    });
                    i += 1;
                    continue;
                }
                "self" => {
                    if let Some(name) = &self.self_name {
                        out.push(Token {
                            ttype: Some(TokenType::Ident),
                            location: tok.location.clone(),
                            text: name.clone(),
                            ..Default::default()
                        });
                        i += 1;
                        continue;
                    }
                }
                "__VA_COUNT" => {
                    let count = args.len().saturating_sub(m.params.len().saturating_sub(1));
                    out.push(Token {
                        ttype: Some(TokenType::Integer),
                        location: tok.location.clone(),
                        text: count.to_string(),
                        number: crate::token::TokenNumber::Integer(count as u64),
                        ..Default::default()
                    });
                    i += 1;
                    continue;
                }
                _ => {}
            }

            if let Some(arg) = param_arg(&tok.text) {
                out.extend(self.substitute_tokens(&arg, &param_arg));
                i += 1;
                continue;
            }

            out.push(tok.clone());
            i += 1;
        }

        // `__concat` fuses the tokens immediately surrounding it; applied
        // as a post-pass so earlier substitutions (parameters, stringize)
        // are already in place.
        let mut fused: Vec<Token> = Vec::new();
        let mut j = 0;
        while j < out.len() {
            if out[j].ttype() == TokenType::Ident
                && out[j].text == "__concat"
                && j + 1 < out.len()
                && out[j + 1].ttype() == TokenType::LParen
            {
                let (inner, consumed) = self.collect_paren_group(&out, j + 1)?;
                let parts = Self::split_top_level_commas(&inner);
                let mut pieces: Vec<Token> = Vec::new();
                for part in &parts {
                    if let Some(last) = pieces.last() {
                        let combined = Self::concat(&[last.clone(), part[0].clone()]);
                        *pieces.last_mut().unwrap() = combined;
                        for extra in &part[1..] {
                            pieces.push(extra.clone());
                        }
                    } else if !part.is_empty() {
                        pieces.push(part[0].clone());
                        pieces.extend(part[1..].iter().cloned());
                    }
                }
                fused.extend(pieces);
                j += 1 + consumed;
                continue;
            }
            fused.push(out[j].clone());
            j += 1;
        }

        Ok(fused)
    }

    fn substitute_tokens(
        &self,
        tokens: &[Token],
        param_arg: &impl Fn(&str) -> Option<Vec<Token>>,
    ) -> Vec<Token> {
        let mut out = Vec::new();
        for t in tokens {
            if let Some(arg) = param_arg(&t.text) {
                out.extend(arg);
            } else {
                out.push(t.clone());
            }
        }
        out
    }

    /// Returns the tokens inside a balanced `( ... )` group starting at
    /// `tokens[open_idx]` (which must be `(`), and how many tokens
    /// (including both parens) were consumed.
    fn collect_paren_group(
        &self,
        tokens: &[Token],
        open_idx: usize,
    ) -> Result<(Vec<Token>, usize), String> {
        if tokens.get(open_idx).map(|t| t.ttype()) != Some(TokenType::LParen) {
            return Err("expected '(' ".to_string());
        }
        let mut depth = 0i32;
        let mut inner = Vec::new();
        let mut k = open_idx;
        loop {
            k += 1;
            let Some(t) = tokens.get(k) else {
                return Err("unterminated macro call".to_string());
            };
            match t.ttype() {
                TokenType::LParen => {
                    depth += 1;
                    inner.push(t.clone());
                }
                TokenType::RParen if depth == 0 => break,
                TokenType::RParen => {
                    depth -= 1;
                    inner.push(t.clone());
                }
                _ => inner.push(t.clone()),
            }
        }
        Ok((inner, k - open_idx + 1))
    }

    fn split_top_level_commas(tokens: &[Token]) -> Vec<Vec<Token>> {
        let mut out = vec![Vec::new()];
        let mut depth = 0i32;
        for t in tokens {
            match t.ttype() {
                TokenType::LParen => {
                    depth += 1;
                    out.last_mut().unwrap().push(t.clone());
                }
                TokenType::RParen => {
                    depth -= 1;
                    out.last_mut().unwrap().push(t.clone());
                }
                TokenType::Comma if depth == 0 => out.push(Vec::new()),
                _ => out.last_mut().unwrap().push(t.clone()),
            }
        }
        out
    }

    /// Core expansion loop: pulls raw tokens,
    /// recursively expanding any non-locked macro name encountered.
    pub fn get_token(&mut self) -> Result<Token, String> {
        loop {
            let tok = self.next_raw()?;
            if tok.ttype() == TokenType::Ident {
                if let Some(m) = self.macros.get(&tok.text).cloned() {
                    if !self.locked.contains(&tok.text) {
                        // Object-like macros (no parameter list) expand bare,
                        // with no argument list to consume; a function-like
                        // macro always requires one, even with zero params.
                        let args = if m.params.is_empty() && !m.variadic {
                            Vec::new()
                        } else {
                            self.read_macro_args()?
                        };
                        let body = self.instantiate_body(&m, &args, &tok.location)?;
                        self.locked.insert(tok.text.clone());
                        self.activations.push(Activation {
                            name: tok.text.clone(),
                            tokens: body.into(),
                        });
                        continue;
                    }
                }
            }
            return Ok(tok);
        }
    }

    pub fn peek_token(&mut self) -> Result<Token, String> {
        let t = self.get_token()?;
        self.unget_token(t.clone());
        Ok(t)
    }

    pub fn unget_token(&mut self, t: Token) {
        self.ungot.push_front(t);
    }

    pub fn consume_token(&mut self) -> Result<Token, String> {
        self.get_token()
    }

    pub fn consume_token_if(&mut self, ttype: TokenType) -> Result<Option<Token>, String> {
        let t = self.peek_token()?;
        if t.ttype() == ttype {
            self.get_token().map(Some)
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize_all(src: &str, stream: &mut TokenStream) -> Vec<Token> {
        let _ = src;
        let mut out = Vec::new();
        loop {
            let t = stream.get_token().unwrap();
            if t.ttype() == TokenType::Eof {
                break;
            }
            out.push(t);
        }
        out
    }

    fn macro_body(src: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(src, "m.le", LexerMode::Default);
        let mut out = Vec::new();
        loop {
            let t = lexer.get_token().unwrap();
            if t.ttype() == TokenType::Eof {
                break;
            }
            out.push(t);
        }
        out
    }

    #[test]
    fn expands_simple_object_like_macro() {
        let mut stream = TokenStream::new("TWO", "t.le", LexerMode::Default);
        stream
            .add_macro(Macro {
                name: "TWO".to_string(),
                params: vec![],
                variadic: false,
                body: macro_body("1 + 1"),
            })
            .unwrap();
        let toks = tokenize_all("", &mut stream);
        assert_eq!(toks.len(), 3);
        assert_eq!(toks[0].ttype(), TokenType::Integer);
    }

    #[test]
    fn parses_function_like_macro_definition_from_source() {
        let mut stream = TokenStream::new(
            "macro M(x) (x + __COUNTER__) endmacro int a = M(1);",
            "t.le",
            LexerMode::Default,
        );
        let first = stream.get_token().unwrap(); // `macro`
        assert_eq!(first.ttype(), TokenType::KeywordMacro);
        let m = stream.parse_macro_definition().unwrap();
        assert_eq!(m.name, "M");
        assert_eq!(m.params, vec!["x".to_string()]);
        assert!(!m.variadic);
        stream.add_macro(m).unwrap();

        let toks = tokenize_all("", &mut stream);
        // `int a = M(1);` with `M(1)` expanding to `( 1 + 0 )`
        assert_eq!(toks[0].ttype(), TokenType::KeywordTypeInt);
        assert_eq!(toks[3].ttype(), TokenType::LParen);
        assert_eq!(toks[4].text, "1");
        assert_eq!(toks[5].ttype(), TokenType::Plus);
        assert_eq!(toks[6].number, crate::token::TokenNumber::Integer(0));
        assert_eq!(toks[7].ttype(), TokenType::RParen);
    }

    #[test]
    fn substitutes_function_like_macro_parameter() {
        let mut stream = TokenStream::new("SQUARE(5)", "t.le", LexerMode::Default);
        stream
            .add_macro(Macro {
                name: "SQUARE".to_string(),
                params: vec!["x".to_string()],
                variadic: false,
                body: macro_body("x * x"),
            })
            .unwrap();
        let toks = tokenize_all("", &mut stream);
        assert_eq!(toks[0].text, "5");
        assert_eq!(toks[1].ttype(), TokenType::Star);
        assert_eq!(toks[2].text, "5");
    }

    #[test]
    fn recursive_self_reference_is_not_re_expanded() {
        let mut stream = TokenStream::new("LOOP", "t.le", LexerMode::Default);
        stream
            .add_macro(Macro {
                name: "LOOP".to_string(),
                params: vec![],
                variadic: false,
                body: macro_body("LOOP done"),
            })
            .unwrap();
        let toks = tokenize_all("", &mut stream);
        // `LOOP` inside its own body must not re-expand (locked).
        assert_eq!(toks[0].text, "LOOP");
        assert_eq!(toks[1].text, "done");
    }

    #[test]
    fn macro_scope_erases_macros_on_end() {
        let mut stream = TokenStream::new("", "t.le", LexerMode::Default);
        stream.begin_macro_scope();
        stream
            .add_macro(Macro {
                name: "SCOPED".to_string(),
                params: vec![],
                variadic: false,
                body: macro_body("1"),
            })
            .unwrap();
        stream.end_macro_scope();
        assert!(!stream.macros.contains_key("SCOPED"));
    }

    #[test]
    fn redefinition_is_an_error() {
        let mut stream = TokenStream::new("", "t.le", LexerMode::Default);
        stream
            .add_macro(Macro {
                name: "X".to_string(),
                params: vec![],
                variadic: false,
                body: macro_body("1"),
            })
            .unwrap();
        let result = stream.add_macro(Macro {
            name: "X".to_string(),
            params: vec![],
            variadic: false,
            body: macro_body("2"),
        });
        assert!(result.is_err());
    }

    #[test]
    fn stringize_adds_separator_between_identical_operators() {
        let tokens = macro_body("+ +");
        assert_eq!(TokenStream::stringize(&tokens), "+ +");
    }

    #[test]
    fn line_file_and_counter_substitute_at_expansion_site() {
        let mut stream = TokenStream::new("TAG TAG", "my_file.le", LexerMode::Default);
        stream
            .add_macro(Macro {
                name: "TAG".to_string(),
                params: vec![],
                variadic: false,
                body: macro_body("__COUNTER__"),
            })
            .unwrap();
        let toks = tokenize_all("", &mut stream);
        assert_eq!(toks.len(), 2);
        assert_ne!(
            format!("{:?}", toks[0].number),
            format!("{:?}", toks[1].number)
        );
    }

    #[test]
    fn va_opt_suppresses_content_when_no_variadic_args() {
        let mut stream = TokenStream::new("LOG(hi)", "t.le", LexerMode::Default);
        stream
            .add_macro(Macro {
                name: "LOG".to_string(),
                params: vec!["fmt".to_string(), "rest".to_string()],
                variadic: true,
                body: macro_body("fmt __VA_OPT__(, rest)"),
            })
            .unwrap();
        let toks = tokenize_all("", &mut stream);
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].text, "hi");
    }

    #[test]
    fn va_opt_expands_content_when_variadic_args_present() {
        let mut stream = TokenStream::new("LOG(hi, a, b)", "t.le", LexerMode::Default);
        stream
            .add_macro(Macro {
                name: "LOG".to_string(),
                params: vec!["fmt".to_string(), "rest".to_string()],
                variadic: true,
                body: macro_body("fmt __VA_OPT__(, rest)"),
            })
            .unwrap();
        let toks = tokenize_all("", &mut stream);
        // `fmt` then the comma and the flattened variadic tail `a, b`
        assert_eq!(toks[0].text, "hi");
        assert_eq!(toks[1].ttype(), TokenType::Comma);
        assert_eq!(toks[2].text, "a");
        assert_eq!(toks[3].ttype(), TokenType::Comma);
        assert_eq!(toks[4].text, "b");
    }
}
