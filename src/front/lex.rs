//! The lexer.
//!
//! Converts preprocessed source text into a vector of located tokens,
//! produced eagerly so the parser never has to worry about a streaming or
//! backtracking interface. Whitespace and comments are already stripped by
//! the external preprocessor the driver shells out to; the matcher table
//! here tolerates stray whitespace defensively rather than assuming it.

use derive_more::Display;
use regex::Regex;

use crate::common::SourceOffset;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[display("{kind}")]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub text: &'src str,
    pub offset: SourceOffset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum TokenKind {
    #[display("identifier")]
    Id,
    #[display("integer constant")]
    IntConst,
    #[display("character constant")]
    CharConst,
    #[display("double constant")]
    DoubleConst,
    #[display("string literal")]
    StringLit,

    #[display("int")]
    KwInt,
    #[display("long")]
    KwLong,
    #[display("unsigned")]
    KwUnsigned,
    #[display("signed")]
    KwSigned,
    #[display("double")]
    KwDouble,
    #[display("char")]
    KwChar,
    #[display("void")]
    KwVoid,
    #[display("struct")]
    KwStruct,
    #[display("union")]
    KwUnion,
    #[display("if")]
    KwIf,
    #[display("else")]
    KwElse,
    #[display("while")]
    KwWhile,
    #[display("do")]
    KwDo,
    #[display("for")]
    KwFor,
    #[display("break")]
    KwBreak,
    #[display("continue")]
    KwContinue,
    #[display("return")]
    KwReturn,
    #[display("switch")]
    KwSwitch,
    #[display("case")]
    KwCase,
    #[display("default")]
    KwDefault,
    #[display("goto")]
    KwGoto,
    #[display("sizeof")]
    KwSizeof,
    #[display("static")]
    KwStatic,
    #[display("extern")]
    KwExtern,

    #[display("{{")]
    LBrace,
    #[display("}}")]
    RBrace,
    #[display("(")]
    LParen,
    #[display(")")]
    RParen,
    #[display("[")]
    LBracket,
    #[display("]")]
    RBracket,
    #[display(";")]
    Semi,
    #[display(",")]
    Comma,
    #[display(":")]
    Colon,
    #[display("?")]
    Question,
    #[display(".")]
    Dot,
    #[display("->")]
    Arrow,
    #[display("++")]
    PlusPlus,
    #[display("--")]
    MinusMinus,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("*")]
    Star,
    #[display("/")]
    Slash,
    #[display("%")]
    Percent,
    #[display("&")]
    Amp,
    #[display("|")]
    Pipe,
    #[display("^")]
    Caret,
    #[display("~")]
    Tilde,
    #[display("!")]
    Bang,
    #[display("<<")]
    Shl,
    #[display(">>")]
    Shr,
    #[display("<")]
    Lt,
    #[display("<=")]
    Le,
    #[display(">")]
    Gt,
    #[display(">=")]
    Ge,
    #[display("==")]
    EqEq,
    #[display("!=")]
    NotEq,
    #[display("&&")]
    AmpAmp,
    #[display("||")]
    PipePipe,
    #[display("=")]
    Assign,
    #[display("+=")]
    PlusAssign,
    #[display("-=")]
    MinusAssign,
    #[display("*=")]
    StarAssign,
    #[display("/=")]
    SlashAssign,
    #[display("%=")]
    PercentAssign,
    #[display("&=")]
    AmpAssign,
    #[display("|=")]
    PipeAssign,
    #[display("^=")]
    CaretAssign,
    #[display("<<=")]
    ShlAssign,
    #[display(">>=")]
    ShrAssign,
}

#[derive(Clone, Debug, Display)]
#[display("unexpected character {ch:?} line: {line} column: {column}")]
pub struct LexError {
    pub ch: char,
    pub offset: SourceOffset,
    pub line: usize,
    pub column: usize,
}

/// Keyword lookup, tried after the generic identifier pattern matches so
/// that `ifx` lexes as an identifier rather than `if` followed by `x`.
fn keyword(text: &str) -> Option<TokenKind> {
    use TokenKind::*;
    Some(match text {
        "int" => KwInt,
        "long" => KwLong,
        "unsigned" => KwUnsigned,
        "signed" => KwSigned,
        "double" => KwDouble,
        "char" => KwChar,
        "void" => KwVoid,
        "struct" => KwStruct,
        "union" => KwUnion,
        "if" => KwIf,
        "else" => KwElse,
        "while" => KwWhile,
        "do" => KwDo,
        "for" => KwFor,
        "break" => KwBreak,
        "continue" => KwContinue,
        "return" => KwReturn,
        "switch" => KwSwitch,
        "case" => KwCase,
        "default" => KwDefault,
        "goto" => KwGoto,
        "sizeof" => KwSizeof,
        "static" => KwStatic,
        "extern" => KwExtern,
        _ => return None,
    })
}

/// Longest-match-first table of punctuation/operator patterns. Order matters:
/// `<<=` must be tried before `<<` before `<`.
fn punct_matchers() -> Vec<(Regex, TokenKind)> {
    use TokenKind::*;
    let table: &[(&str, TokenKind)] = &[
        (r"\A<<=", ShlAssign),
        (r"\A>>=", ShrAssign),
        (r"\A\+\+", PlusPlus),
        (r"\A--", MinusMinus),
        (r"\A->", Arrow),
        (r"\A<<", Shl),
        (r"\A>>", Shr),
        (r"\A<=", Le),
        (r"\A>=", Ge),
        (r"\A==", EqEq),
        (r"\A!=", NotEq),
        (r"\A&&", AmpAmp),
        (r"\A\|\|", PipePipe),
        (r"\A\+=", PlusAssign),
        (r"\A-=", MinusAssign),
        (r"\A\*=", StarAssign),
        (r"\A/=", SlashAssign),
        (r"\A%=", PercentAssign),
        (r"\A&=", AmpAssign),
        (r"\A\|=", PipeAssign),
        (r"\A\^=", CaretAssign),
        (r"\A\{", LBrace),
        (r"\A\}", RBrace),
        (r"\A\(", LParen),
        (r"\A\)", RParen),
        (r"\A\[", LBracket),
        (r"\A\]", RBracket),
        (r"\A;", Semi),
        (r"\A,", Comma),
        (r"\A:", Colon),
        (r"\A\?", Question),
        (r"\A\.", Dot),
        (r"\A\+", Plus),
        (r"\A-", Minus),
        (r"\A\*", Star),
        (r"\A/", Slash),
        (r"\A%", Percent),
        (r"\A&", Amp),
        (r"\A\|", Pipe),
        (r"\A\^", Caret),
        (r"\A~", Tilde),
        (r"\A!", Bang),
        (r"\A<", Lt),
        (r"\A>", Gt),
        (r"\A=", Assign),
    ];
    table.iter().map(|(pat, kind)| (Regex::new(pat).unwrap(), *kind)).collect()
}

pub struct Lexer<'input> {
    input: &'input str,
    pos: usize,
    whitespace: Regex,
    id: Regex,
    double: Regex,
    int: Regex,
    char_lit: Regex,
    string_lit: Regex,
    punct: Vec<(Regex, TokenKind)>,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        Lexer {
            input,
            pos: 0,
            whitespace: Regex::new(r"\A(?:[ \t\f\r\n\v]|(?://[^\n]*)|(?s:/\*.*?\*/))*").unwrap(),
            id: Regex::new(r"\A[A-Za-z_][A-Za-z0-9_]*").unwrap(),
            double: Regex::new(r"\A(?:[0-9]*\.[0-9]+|[0-9]+\.)(?:[eE][-+]?[0-9]+)?|\A[0-9]+[eE][-+]?[0-9]+")
                .unwrap(),
            int: Regex::new(r"\A(?:0[xX][0-9a-fA-F]+|[0-9]+)(?:[uUlL]{0,2})").unwrap(),
            char_lit: Regex::new(r"\A'(?:\\.|[^'\\])'").unwrap(),
            string_lit: Regex::new(r#"\A"(?:\\.|[^"\\])*""#).unwrap(),
            punct: punct_matchers(),
        }
    }

    pub fn end_of_input(&self) -> bool {
        self.pos == self.input.len()
    }

    fn skip_whitespace(&mut self) {
        if let Some(m) = self.whitespace.find(&self.input[self.pos..]) {
            self.pos += m.end();
        }
    }

    /// Produce the next token, or `None` at end of input.
    pub fn next(&mut self) -> Result<Option<Token<'input>>, LexError> {
        self.skip_whitespace();
        if self.end_of_input() {
            return Ok(None);
        }
        let start = self.pos;
        let rest = &self.input[self.pos..];

        if let Some(m) = self.double.find(rest) {
            self.pos += m.end();
            return Ok(Some(Token { kind: TokenKind::DoubleConst, text: m.as_str(), offset: start }));
        }
        if let Some(m) = self.int.find(rest) {
            self.pos += m.end();
            return Ok(Some(Token { kind: TokenKind::IntConst, text: m.as_str(), offset: start }));
        }
        if let Some(m) = self.char_lit.find(rest) {
            self.pos += m.end();
            return Ok(Some(Token { kind: TokenKind::CharConst, text: m.as_str(), offset: start }));
        }
        if let Some(m) = self.string_lit.find(rest) {
            self.pos += m.end();
            return Ok(Some(Token { kind: TokenKind::StringLit, text: m.as_str(), offset: start }));
        }
        if let Some(m) = self.id.find(rest) {
            self.pos += m.end();
            let kind = keyword(m.as_str()).unwrap_or(TokenKind::Id);
            return Ok(Some(Token { kind, text: m.as_str(), offset: start }));
        }
        for (re, kind) in &self.punct {
            if let Some(m) = re.find(rest) {
                self.pos += m.end();
                return Ok(Some(Token { kind: *kind, text: m.as_str(), offset: start }));
            }
        }

        let ch = rest.chars().next().unwrap();
        let (line, column) = crate::common::line_column(self.input, start);
        Err(LexError { ch, offset: start, line, column })
    }

    /// Lex the whole input eagerly, collecting lexical errors rather than
    /// stopping at the first bad token so later tokens on the same line are
    /// still available to the caller.
    pub fn tokenize(mut self) -> (Vec<Token<'input>>, Vec<LexError>) {
        let mut tokens = Vec::new();
        let mut errors = Vec::new();
        loop {
            match self.next() {
                Ok(Some(tok)) => tokens.push(tok),
                Ok(None) => break,
                Err(e) => {
                    errors.push(e);
                    // Skip the offending byte and keep going.
                    self.pos += 1;
                }
            }
        }
        (tokens, errors)
    }
}

/// Decode the escapes in a quoted char/string literal's raw text into bytes.
/// `raw` includes the surrounding `'`/`"` delimiters, which are stripped.
pub fn decode_escapes(raw: &str) -> Vec<u8> {
    let inner = &raw[1..raw.len() - 1];
    let mut out = Vec::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') => out.push(b'\n'),
            Some('t') => out.push(b'\t'),
            Some('r') => out.push(b'\r'),
            Some('0') => out.push(0),
            Some('\\') => out.push(b'\\'),
            Some('\'') => out.push(b'\''),
            Some('"') => out.push(b'"'),
            Some(other) => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let (toks, errs) = Lexer::new(src).tokenize();
        assert!(errs.is_empty(), "unexpected lex errors: {errs:?}");
        toks.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_keywords_and_identifiers() {
        use TokenKind::*;
        assert_eq!(kinds("int ifx if"), vec![KwInt, Id, KwIf]);
    }

    #[test]
    fn longest_match_picks_the_widest_operator() {
        use TokenKind::*;
        assert_eq!(kinds("a <<= b"), vec![Id, ShlAssign, Id]);
        assert_eq!(kinds("a << b"), vec![Id, Shl, Id]);
        assert_eq!(kinds("a < b"), vec![Id, Lt, Id]);
    }

    #[test]
    fn lexes_integer_suffixes_and_doubles() {
        use TokenKind::*;
        assert_eq!(kinds("0xFFu 42L 3.14 1e10"), vec![IntConst, IntConst, DoubleConst, DoubleConst]);
    }

    #[test]
    fn lexes_char_and_string_literals() {
        use TokenKind::*;
        assert_eq!(kinds(r#"'a' "hi\n""#), vec![CharConst, StringLit]);
    }

    #[test]
    fn unknown_character_is_a_located_error() {
        let (_, errs) = Lexer::new("int x = 1 @ 2;").tokenize();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].ch, '@');
    }

    #[test]
    fn decodes_common_escapes() {
        assert_eq!(decode_escapes(r#""a\nb""#), b"a\nb");
        assert_eq!(decode_escapes(r"'\0'"), vec![0u8]);
    }
}
