//! Token types

use bitflags::bitflags;

/// Literal/operator/keyword enum where keyword variants are a contiguous
/// range so "is this a keyword" is a single range test
/// (`TokenType::is_keyword`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum TokenType {
    Invalid,
    Eof,
    // literals
    Integer,
    Double,
    Char,
    Ident,
    String,
    Name,
    // punctuation
    Dot,
    Range,
    DotMember,
    Ellipsis,
    Colon,
    DoubleColon,
    Semicolon,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Plus,
    PlusEq,
    Inc,
    Minus,
    MinusEq,
    Dec,
    Arrow,
    ArrowMember,
    FatArrow,
    Star,
    StarEq,
    Slash,
    SlashEq,
    Percent,
    PercentEq,
    Shl,
    ShlEq,
    Shr,
    ShrEq,
    Shru,
    ShruEq,
    Amp,
    AmpEq,
    AmpAmp,
    AmpAmpEq,
    Pipe,
    PipeEq,
    PipePipe,
    PipePipeEq,
    Caret,
    CaretEq,
    Bang,
    Tilde,
    Question,
    Eq,
    EqEq,
    NotEq,
    Equiv,
    NotEquiv,
    Lt,
    Leq,
    Gt,
    Geq,
    Cmp3Way,
    Swap,
    Hash,
    // keyword range begins here
    KeywordBreak,
    KeywordCase,
    KeywordDefault,
    KeywordContinue,
    KeywordClass,
    KeywordStruct,
    KeywordDo,
    KeywordElse,
    KeywordFor,
    KeywordIf,
    KeywordGoto,
    KeywordOperator,
    KeywordReturn,
    KeywordSwitch,
    KeywordWhile,
    KeywordEnum,
    KeywordThis,
    KeywordSuper,
    KeywordTypeVoid,
    KeywordTypeBool,
    KeywordTypeByte,
    KeywordTypeSByte,
    KeywordTypeShort,
    KeywordTypeUShort,
    KeywordTypeChar,
    KeywordTypeInt,
    KeywordTypeUInt,
    KeywordTypeLong,
    KeywordTypeULong,
    KeywordTypeFloat,
    KeywordTypeDouble,
    KeywordTypeName,
    KeywordTypeString,
    KeywordTrue,
    KeywordFalse,
    KeywordNew,
    KeywordNull,
    KeywordConst,
    KeywordConstExpr,
    KeywordRaw,
    KeywordWeak,
    KeywordNamespace,
    KeywordNative,
    KeywordStatic,
    KeywordTransient,
    KeywordFinal,
    KeywordPublic,
    KeywordProtected,
    KeywordPrivate,
    KeywordOverride,
    KeywordCast,
    KeywordSizeof,
    KeywordOffsetof,
    KeywordAlignof,
    KeywordTypeid,
    KeywordAuto,
    KeywordImport,
    KeywordInline,
    KeywordDefer,
    KeywordNocopy,
    KeywordNobounds,
    KeywordNoinit,
    KeywordTypedef,
    KeywordUsing,
    KeywordNobreak,
    KeywordEditable,
    KeywordPlaceable,
    KeywordLatent,
    KeywordState,
    KeywordIgnores,
    KeywordEndclass,
    KeywordStatebreak,
    KeywordNontrivial,
    KeywordNodiscard,
    KeywordMacro,
    KeywordEndmacro,
    KeywordEndif,
    KeywordFormat,
    KeywordIntrinsic,
    KeywordAssert,
    KeywordStaticAssert,
}

const KEYWORD_BASE: TokenType = TokenType::KeywordBreak;

impl TokenType {
    pub fn is_keyword(self) -> bool {
        self >= KEYWORD_BASE
    }

    pub fn is_number(self) -> bool {
        matches!(self, TokenType::Integer | TokenType::Double | TokenType::Char)
    }

    pub fn is_text(self) -> bool {
        self.is_keyword()
            || matches!(
                self,
                TokenType::Ident | TokenType::Name | TokenType::String
            )
    }
}

bitflags! {
    /// `TokenNumberFlags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NumberFlags: u32 {
        const UNSIGNED_SUFFIX = 1 << 0;
        const LONG_SUFFIX     = 1 << 1;
        const FLOAT_SUFFIX    = 1 << 2;
        const DOUBLE_SUFFIX   = 1 << 3;
    }
}

/// Tagged numeric payload for integer or floating-point literals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenNumber {
    Integer(u64),
    Double(f64),
}

impl Default for TokenNumber {
    fn default() -> Self {
        TokenNumber::Integer(0)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TokenLocation {
    pub file: String,
    pub line: i32,
    pub column: i32,
}

impl TokenLocation {
    pub fn new(file: impl Into<String>, line: i32, column: i32) -> Self {
        TokenLocation {
            file: file.into(),
            line,
            column,
        }
    }
}

impl std::fmt::Display for TokenLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Token {
    pub ttype: Option<TokenType>,
    pub location: TokenLocation,
    pub text: String,
    pub number: TokenNumber,
    pub number_flags: NumberFlags,
    /// `__VA_COUNT`/macro-pool bookkeeping: when this
    /// token stands for an unexpanded macro parameter, `user_index` encodes
    /// `(start << 32) | end` into the argument token pool.
    pub user_index: u64,
    /// Non-null when the lexer wants to report a soft error (e.g. integer
    /// overflow) without failing the whole tokenization.
    pub err: Option<String>,
}

impl Token {
    pub fn eof(loc: TokenLocation) -> Self {
        Token {
            ttype: Some(TokenType::Eof),
            location: loc,
            ..Default::default()
        }
    }

    pub fn ttype(&self) -> TokenType {
        self.ttype.unwrap_or(TokenType::Invalid)
    }

    pub fn is_keyword(&self) -> bool {
        self.ttype().is_keyword()
    }

    pub fn is_keyword_or_ident(&self) -> bool {
        self.is_keyword() || self.ttype() == TokenType::Ident
    }

    pub fn is_text(&self) -> bool {
        self.ttype().is_text()
    }

    /// Convert a keyword token into a plain identifier in place: macro
    /// names and some attribute contexts accept keywords reinterpreted as
    /// identifiers.
    pub fn keyword_as_ident(&mut self) -> &mut Self {
        if self.is_keyword() {
            self.ttype = Some(TokenType::Ident);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_range_test_is_single_comparison() {
        assert!(TokenType::KeywordIf.is_keyword());
        assert!(TokenType::KeywordEndif.is_keyword());
        assert!(!TokenType::Ident.is_keyword());
        assert!(!TokenType::Plus.is_keyword());
    }

    #[test]
    fn keyword_as_ident_converts_in_place() {
        let mut tok = Token {
            ttype: Some(TokenType::KeywordState),
            text: "state".into(),
            ..Default::default()
        };
        tok.keyword_as_ident();
        assert_eq!(tok.ttype(), TokenType::Ident);
    }
}
