//! Byte-stream lexer
//!
//! Single-token lookahead is sufficient at this layer; multi-token
//! lookahead and macro expansion live one level up in [`crate::token_stream`].

use crate::number::{parse_number, parse_suffix};
use crate::token::{Token, TokenLocation, TokenNumber, TokenType};

/// Default vs double float mode: in default mode an unsuffixed
/// `1.2` is a `float`; in double mode it's a `double`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexerMode {
    Default,
    Double,
}

const KEYWORDS: &[(&str, TokenType)] = &[
    ("__assert", TokenType::KeywordAssert),
    ("__format", TokenType::KeywordFormat),
    ("__intrinsic", TokenType::KeywordIntrinsic),
    ("alignof", TokenType::KeywordAlignof),
    ("auto", TokenType::KeywordAuto),
    ("bool", TokenType::KeywordTypeBool),
    ("break", TokenType::KeywordBreak),
    ("byte", TokenType::KeywordTypeByte),
    ("case", TokenType::KeywordCase),
    ("cast", TokenType::KeywordCast),
    ("char", TokenType::KeywordTypeChar),
    ("class", TokenType::KeywordClass),
    ("const", TokenType::KeywordConst),
    ("constexpr", TokenType::KeywordConstExpr),
    ("continue", TokenType::KeywordContinue),
    ("default", TokenType::KeywordDefault),
    ("defer", TokenType::KeywordDefer),
    ("do", TokenType::KeywordDo),
    ("double", TokenType::KeywordTypeDouble),
    ("editable", TokenType::KeywordEditable),
    ("else", TokenType::KeywordElse),
    ("endclass", TokenType::KeywordEndclass),
    ("endif", TokenType::KeywordEndif),
    ("endmacro", TokenType::KeywordEndmacro),
    ("enum", TokenType::KeywordEnum),
    ("false", TokenType::KeywordFalse),
    ("final", TokenType::KeywordFinal),
    ("float", TokenType::KeywordTypeFloat),
    ("for", TokenType::KeywordFor),
    ("goto", TokenType::KeywordGoto),
    ("if", TokenType::KeywordIf),
    ("ignores", TokenType::KeywordIgnores),
    ("import", TokenType::KeywordImport),
    ("inline", TokenType::KeywordInline),
    ("int", TokenType::KeywordTypeInt),
    ("latent", TokenType::KeywordLatent),
    ("long", TokenType::KeywordTypeLong),
    ("macro", TokenType::KeywordMacro),
    ("name", TokenType::KeywordTypeName),
    ("namespace", TokenType::KeywordNamespace),
    ("native", TokenType::KeywordNative),
    ("new", TokenType::KeywordNew),
    ("nobounds", TokenType::KeywordNobounds),
    ("nobreak", TokenType::KeywordNobreak),
    ("nocopy", TokenType::KeywordNocopy),
    ("nodiscard", TokenType::KeywordNodiscard),
    ("noinit", TokenType::KeywordNoinit),
    ("nontrivial", TokenType::KeywordNontrivial),
    ("null", TokenType::KeywordNull),
    ("nullptr", TokenType::KeywordNull),
    ("offsetof", TokenType::KeywordOffsetof),
    ("operator", TokenType::KeywordOperator),
    ("override", TokenType::KeywordOverride),
    ("placeable", TokenType::KeywordPlaceable),
    ("private", TokenType::KeywordPrivate),
    ("protected", TokenType::KeywordProtected),
    ("public", TokenType::KeywordPublic),
    ("raw", TokenType::KeywordRaw),
    ("return", TokenType::KeywordReturn),
    ("sbyte", TokenType::KeywordTypeSByte),
    ("short", TokenType::KeywordTypeShort),
    ("sizeof", TokenType::KeywordSizeof),
    ("state", TokenType::KeywordState),
    ("statebreak", TokenType::KeywordStatebreak),
    ("static", TokenType::KeywordStatic),
    ("static_assert", TokenType::KeywordStaticAssert),
    ("string", TokenType::KeywordTypeString),
    ("struct", TokenType::KeywordStruct),
    ("super", TokenType::KeywordSuper),
    ("switch", TokenType::KeywordSwitch),
    ("this", TokenType::KeywordThis),
    ("transient", TokenType::KeywordTransient),
    ("true", TokenType::KeywordTrue),
    ("typedef", TokenType::KeywordTypedef),
    ("typeid", TokenType::KeywordTypeid),
    ("uint", TokenType::KeywordTypeUInt),
    ("ulong", TokenType::KeywordTypeULong),
    ("ushort", TokenType::KeywordTypeUShort),
    ("using", TokenType::KeywordUsing),
    ("void", TokenType::KeywordTypeVoid),
    ("weak", TokenType::KeywordWeak),
    ("while", TokenType::KeywordWhile),
];

fn keyword_lookup(ident: &str) -> Option<TokenType> {
    // binary search over the sorted static table
    KEYWORDS
        .binary_search_by_key(&ident, |(name, _)| name)
        .ok()
        .map(|i| KEYWORDS[i].1)
}

/// Longest-match-wins operator table, ordered long to short so the scan
/// below can just walk it in order.
const OPERATORS: &[(&str, TokenType)] = &[
    (">>>=", TokenType::ShruEq),
    ("...", TokenType::Ellipsis),
    ("<<=", TokenType::ShlEq),
    (">>=", TokenType::ShrEq),
    (">>>", TokenType::Shru),
    ("<=>", TokenType::Cmp3Way),
    ("<->", TokenType::Swap),
    ("===", TokenType::Equiv),
    ("!==", TokenType::NotEquiv),
    ("->*", TokenType::ArrowMember),
    ("=>", TokenType::FatArrow),
    ("..", TokenType::Range),
    ("::", TokenType::DoubleColon),
    ("+=", TokenType::PlusEq),
    ("++", TokenType::Inc),
    ("-=", TokenType::MinusEq),
    ("--", TokenType::Dec),
    ("->", TokenType::Arrow),
    ("*=", TokenType::StarEq),
    ("/=", TokenType::SlashEq),
    ("%=", TokenType::PercentEq),
    ("<<", TokenType::Shl),
    (">>", TokenType::Shr),
    ("&=", TokenType::AmpEq),
    ("&&", TokenType::AmpAmp),
    ("|=", TokenType::PipeEq),
    ("||", TokenType::PipePipe),
    ("^=", TokenType::CaretEq),
    ("==", TokenType::EqEq),
    ("!=", TokenType::NotEq),
    ("<=", TokenType::Leq),
    (">=", TokenType::Geq),
    (".*", TokenType::DotMember),
    (".", TokenType::Dot),
    (":", TokenType::Colon),
    (";", TokenType::Semicolon),
    ("{", TokenType::LBrace),
    ("}", TokenType::RBrace),
    ("[", TokenType::LBracket),
    ("]", TokenType::RBracket),
    ("(", TokenType::LParen),
    (")", TokenType::RParen),
    (",", TokenType::Comma),
    ("+", TokenType::Plus),
    ("-", TokenType::Minus),
    ("*", TokenType::Star),
    ("/", TokenType::Slash),
    ("%", TokenType::Percent),
    ("&", TokenType::Amp),
    ("|", TokenType::Pipe),
    ("^", TokenType::Caret),
    ("!", TokenType::Bang),
    ("~", TokenType::Tilde),
    ("?", TokenType::Question),
    ("=", TokenType::Eq),
    ("<", TokenType::Lt),
    (">", TokenType::Gt),
    ("#", TokenType::Hash),
];

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: i32,
    column: i32,
    file: String,
    mode: LexerMode,
    peeked: Option<Token>,
}

impl Lexer {
    pub fn new(source: &str, file: impl Into<String>, mode: LexerMode) -> Self {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            file: file.into(),
            mode,
            peeked: None,
        }
    }

    fn loc(&self) -> TokenLocation {
        TokenLocation::new(self.file.clone(), self.line, self.column)
    }

    /// Lets the token stream retarget location after a `#line` directive.
    pub fn set_token_location(&mut self, line: i32, file: Option<String>) {
        self.line = line;
        if let Some(f) = file {
            self.file = f;
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_char_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += 1;
        match c {
            '\n' => {
                self.line += 1;
                self.column = 1;
            }
            '\r' => {
                // \r or \r\n both count as one line advance
                if self.peek_char() == Some('\n') {
                    self.pos += 1;
                }
                self.line += 1;
                self.column = 1;
            }
            _ => self.column += 1,
        }
        Some(c)
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), String> {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_char_at(1) == Some('/') => {
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek_char() {
                            None | Some('\n') | Some('\r') => break,
                            Some('\\') => {
                                // line continuation
                                self.bump();
                                if matches!(self.peek_char(), Some('\n') | Some('\r')) {
                                    self.bump();
                                }
                            }
                            _ => {
                                self.bump();
                            }
                        }
                    }
                }
                Some('/') if self.peek_char_at(1) == Some('*') => {
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek_char() {
                            None => return Err("unterminated block comment".to_string()),
                            Some('*') if self.peek_char_at(1) == Some('/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            _ => {
                                self.bump();
                            }
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn read_escape(&mut self, out: &mut String) -> Result<(), String> {
        match self.bump() {
            Some('a') => out.push('\u{07}'),
            Some('b') => out.push('\u{08}'),
            Some('f') => out.push('\u{0C}'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('v') => out.push('\u{0B}'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('0'..='7') => {
                self.pos -= 1;
                self.column -= 1;
                let mut val: u32 = 0;
                for _ in 0..3 {
                    match self.peek_char() {
                        Some(c) if ('0'..='7').contains(&c) => {
                            val = val * 8 + c.to_digit(8).unwrap();
                            self.bump();
                        }
                        _ => break,
                    }
                }
                out.push(char::from_u32(val).unwrap_or('\u{FFFD}'));
            }
            Some('x') => {
                let mut val: u32 = 0;
                for _ in 0..2 {
                    match self.peek_char() {
                        Some(c) if c.is_ascii_hexdigit() => {
                            val = val * 16 + c.to_digit(16).unwrap();
                            self.bump();
                        }
                        _ => break,
                    }
                }
                out.push(char::from_u32(val).unwrap_or('\u{FFFD}'));
            }
            Some('u') | Some('U') => {
                if self.peek_char() == Some('{') {
                    self.bump();
                    let mut val: u32 = 0;
                    while let Some(c) = self.peek_char() {
                        if c == '}' {
                            self.bump();
                            break;
                        }
                        val = val * 16 + c.to_digit(16).ok_or("bad unicode escape")?;
                        self.bump();
                    }
                    out.push(char::from_u32(val).unwrap_or('\u{FFFD}'));
                } else {
                    return Err("expected '{' after \\u/\\U".to_string());
                }
            }
            Some(other) => out.push(other),
            None => return Err("unterminated escape sequence".to_string()),
        }
        Ok(())
    }

    fn read_string(&mut self) -> Result<Token, String> {
        let loc = self.loc();
        self.bump(); // opening quote
        // raw triple-quote string
        if self.peek_char() == Some('"') && self.peek_char_at(1) == Some('"') {
            self.bump();
            self.bump();
            let mut text = String::new();
            loop {
                if self.peek_char() == Some('"')
                    && self.peek_char_at(1) == Some('"')
                    && self.peek_char_at(2) == Some('"')
                {
                    self.bump();
                    self.bump();
                    self.bump();
                    break;
                }
                match self.bump() {
                    Some(c) => text.push(c),
                    None => return Err("unterminated raw string".to_string()),
                }
            }
            return Ok(Token {
                ttype: Some(TokenType::String),
                location: loc,
                text,
                ..Default::default()
            });
        }

        let mut text = String::new();
        loop {
            match self.peek_char() {
                None | Some('\n') => return Err("unterminated string literal".to_string()),
                Some('"') => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    self.bump();
                    self.read_escape(&mut text)?;
                }
                Some(c) => {
                    self.bump();
                    text.push(c);
                }
            }
        }
        Ok(Token {
            ttype: Some(TokenType::String),
            location: loc,
            text,
            ..Default::default()
        })
    }

    fn read_name(&mut self) -> Result<Token, String> {
        let loc = self.loc();
        self.bump(); // opening quote
        let mut text = String::new();
        loop {
            match self.peek_char() {
                None | Some('\n') => return Err("unterminated name literal".to_string()),
                Some('\'') => {
                    self.bump();
                    break;
                }
                Some(c) => {
                    self.bump();
                    text.push(c);
                }
            }
        }
        Ok(Token {
            ttype: Some(TokenType::Name),
            location: loc,
            text,
            ..Default::default()
        })
    }

    fn read_ident(&mut self) -> Token {
        let loc = self.loc();
        let mut text = String::new();
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        let ttype = keyword_lookup(&text).unwrap_or(TokenType::Ident);
        Token {
            ttype: Some(ttype),
            location: loc,
            text,
            ..Default::default()
        }
    }

    fn read_number(&mut self) -> Result<Token, String> {
        let loc = self.loc();
        let remaining: String = self.chars[self.pos..].iter().collect();
        let (parsed, consumed) = parse_number(&remaining)?;
        for _ in 0..consumed {
            self.bump();
        }
        let suffix_remaining: String = self.chars[self.pos..].iter().collect();
        let (mut flags, suffix_len) = parse_suffix(&suffix_remaining, parsed.is_double);
        for _ in 0..suffix_len {
            self.bump();
        }

        // Default mode: an unsuffixed float literal narrows to `float`
        // rather than `double`.
        // There's no separate `Float` token type, so this is recorded as
        // a flag alongside the `Double` token rather than a new variant.
        if parsed.is_double
            && self.mode == LexerMode::Default
            && !flags.contains(crate::token::NumberFlags::DOUBLE_SUFFIX)
        {
            flags |= crate::token::NumberFlags::FLOAT_SUFFIX;
        }

        let text: String = remaining.chars().take(consumed + suffix_len).collect();
        Ok(Token {
            ttype: Some(if parsed.is_double {
                TokenType::Double
            } else {
                TokenType::Integer
            }),
            location: loc,
            text,
            number: parsed.value,
            number_flags: flags,
            err: parsed.warning,
            ..Default::default()
        })
    }

    fn read_operator(&mut self) -> Result<Token, String> {
        let loc = self.loc();
        let remaining: String = self.chars[self.pos..].iter().take(4).collect();
        for (op, ttype) in OPERATORS {
            if remaining.starts_with(op) {
                for _ in 0..op.chars().count() {
                    self.bump();
                }
                return Ok(Token {
                    ttype: Some(*ttype),
                    location: loc,
                    text: (*op).to_string(),
                    ..Default::default()
                });
            }
        }
        Err(format!(
            "invalid character '{}'",
            remaining.chars().next().unwrap_or('?')
        ))
    }

    fn next_token(&mut self) -> Result<Token, String> {
        self.skip_whitespace_and_comments()?;
        let Some(c) = self.peek_char() else {
            return Ok(Token::eof(self.loc()));
        };
        if c.is_ascii_digit() {
            return self.read_number();
        }
        if c == '"' {
            return self.read_string();
        }
        if c == '\'' {
            return self.read_name();
        }
        if c.is_alphabetic() || c == '_' {
            return Ok(self.read_ident());
        }
        self.read_operator()
    }

    pub fn peek_token(&mut self) -> Result<Token, String> {
        if self.peeked.is_none() {
            self.peeked = Some(self.next_token()?);
        }
        Ok(self.peeked.clone().unwrap())
    }

    pub fn get_token(&mut self) -> Result<Token, String> {
        if let Some(t) = self.peeked.take() {
            return Ok(t);
        }
        self.next_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(src: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(src, "test.le", LexerMode::Default);
        let mut out = Vec::new();
        loop {
            let t = lexer.get_token().unwrap();
            if t.ttype() == TokenType::Eof {
                out.push(t);
                break;
            }
            out.push(t);
        }
        out
    }

    #[test]
    fn lexes_keywords() {
        let toks = lex_all("if else class struct");
        assert_eq!(toks[0].ttype(), TokenType::KeywordIf);
        assert_eq!(toks[1].ttype(), TokenType::KeywordElse);
        assert_eq!(toks[2].ttype(), TokenType::KeywordClass);
        assert_eq!(toks[3].ttype(), TokenType::KeywordStruct);
    }

    #[test]
    fn identifier_round_trips() {
        let toks = lex_all("myVariable_1");
        assert_eq!(toks[0].ttype(), TokenType::Ident);
        assert_eq!(toks[0].text, "myVariable_1");
    }

    #[test]
    fn operators_longest_match_wins() {
        let toks = lex_all(">>>= >>= >> > <=> <-> ...");
        assert_eq!(toks[0].ttype(), TokenType::ShruEq);
        assert_eq!(toks[1].ttype(), TokenType::ShrEq);
        assert_eq!(toks[2].ttype(), TokenType::Shr);
        assert_eq!(toks[3].ttype(), TokenType::Gt);
        assert_eq!(toks[4].ttype(), TokenType::Cmp3Way);
        assert_eq!(toks[5].ttype(), TokenType::Swap);
        assert_eq!(toks[6].ttype(), TokenType::Ellipsis);
    }

    #[test]
    fn line_comment_supports_continuation() {
        let toks = lex_all("// a comment \\\n still comment\n123");
        assert_eq!(toks[0].ttype(), TokenType::Integer);
    }

    #[test]
    fn block_comment_is_single_level() {
        let toks = lex_all("/* outer /* inner */ still_code */");
        // single-level nesting means the first `*/` ends the comment and
        // `still_code` is lexed as live source.
        assert_eq!(toks[0].ttype(), TokenType::Ident);
        assert_eq!(toks[0].text, "still_code");
    }

    #[test]
    fn string_literal_handles_escapes() {
        let toks = lex_all(r#""hi\n\t!""#);
        assert_eq!(toks[0].ttype(), TokenType::String);
        assert_eq!(toks[0].text, "hi\n\t!");
    }

    #[test]
    fn raw_triple_quote_string_has_no_escapes() {
        let toks = lex_all(r#""""raw \n text""""#);
        assert_eq!(toks[0].text, "raw \\n text");
    }

    #[test]
    fn name_literal_is_single_quoted() {
        let toks = lex_all("'MyName'");
        assert_eq!(toks[0].ttype(), TokenType::Name);
        assert_eq!(toks[0].text, "MyName");
    }

    #[test]
    fn eof_repeats_forever() {
        let mut lexer = Lexer::new("", "test.le", LexerMode::Default);
        assert_eq!(lexer.get_token().unwrap().ttype(), TokenType::Eof);
        assert_eq!(lexer.get_token().unwrap().ttype(), TokenType::Eof);
    }

    #[test]
    fn unterminated_string_is_lex_error() {
        let mut lexer = Lexer::new("\"unterminated", "test.le", LexerMode::Default);
        assert!(lexer.get_token().is_err());
    }

    #[test]
    fn peek_token_is_idempotent() {
        let mut lexer = Lexer::new("abc def", "test.le", LexerMode::Default);
        let p1 = lexer.peek_token().unwrap();
        let p2 = lexer.peek_token().unwrap();
        assert_eq!(p1.text, p2.text);
        let g = lexer.get_token().unwrap();
        assert_eq!(g.text, "abc");
        assert_eq!(lexer.get_token().unwrap().text, "def");
    }
}
