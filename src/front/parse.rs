//! The parser.
//!
//! Recursive-descent with a single token of lookahead (two to disambiguate a
//! cast's parenthesized type name from a parenthesized expression). Binary
//! expressions are parsed by a precedence-climbing helper over a per-operator
//! binding-power table; declarators are parsed as an abstract "pointer /
//! array / function" chain and then resolved outside-in against a base type,
//! which is what lets `int *a[3]` and `int (*a)[3]` parse to different types.

use derive_more::Display;

use crate::common::{Id, SourceOffset};

use super::ast::*;
use super::lex::{decode_escapes, Lexer, Token, TokenKind};

#[derive(Clone, Display)]
#[display("{message} line: {line} column: {column}")]
pub struct ParseError {
    pub message: String,
    pub offset: SourceOffset,
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Debug for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

/// An unresolved declarator chain, outside-in: `Pointer(Array(Ident(a), 3))`
/// reads as "pointer to array of 3 of `a`'s base type", matching how the
/// grammar's `*` prefix binds tighter than declarator suffixes.
#[derive(Clone, Debug)]
enum Declarator {
    Ident(Id),
    Pointer(Box<Declarator>),
    Array(Box<Declarator>, usize),
    Function(Vec<(Id, TypeName)>, Box<Declarator>),
}

/// Resolve a declarator chain against an accumulating base type, outside-in.
/// Each layer of the chain wraps the *base* (not the result) because the
/// chain was built from the name outward, but the grammar's modifiers apply
/// from the name outward onto the specifier type, which is itself the
/// innermost, last-applied layer.
fn process_declarator(d: &Declarator, base: &TypeName) -> (Id, TypeName, Vec<(Id, TypeName)>) {
    match d {
        Declarator::Ident(name) => (*name, base.clone(), Vec::new()),
        Declarator::Pointer(inner) => {
            process_declarator(inner, &TypeName::Pointer(Box::new(base.clone())))
        }
        Declarator::Array(inner, len) => {
            process_declarator(inner, &TypeName::Array(Box::new(base.clone()), *len))
        }
        Declarator::Function(params, inner) => match inner.as_ref() {
            Declarator::Ident(name) => (*name, base.clone(), params.clone()),
            _ => panic!("internal error: function declarators of function pointers are unsupported"),
        },
    }
}

pub struct Parser<'src> {
    tokens: Vec<Token<'src>>,
    pos: usize,
    source: &'src str,
    errors: Vec<ParseError>,
}

pub fn parse(input: &str) -> (Program, Vec<ParseError>) {
    let (tokens, lex_errors) = Lexer::new(input).tokenize();
    let mut parser = Parser { tokens, pos: 0, source: input, errors: Vec::new() };
    for e in lex_errors {
        parser.errors.push(ParseError {
            message: format!("unexpected character {:?}", e.ch),
            offset: e.offset,
            line: e.line,
            column: e.column,
        });
    }
    let program = parser.parse_program();
    (program, parser.errors)
}

impl<'src> Parser<'src> {
    fn peek(&self) -> Option<Token<'src>> {
        self.tokens.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<Token<'src>> {
        self.tokens.get(self.pos + n).copied()
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn current_offset(&self) -> SourceOffset {
        self.peek().map(|t| t.offset).unwrap_or(self.source.len())
    }

    fn advance(&mut self) -> Option<Token<'src>> {
        let t = self.peek();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error_here(&mut self, message: impl Into<String>) -> ParseError {
        let offset = self.current_offset();
        let (line, column) = crate::common::line_column(self.source, offset);
        let err = ParseError { message: message.into(), offset, line, column };
        self.errors.push(err.clone());
        err
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token<'src>, ParseError> {
        if self.peek_kind() == Some(kind) {
            Ok(self.advance().unwrap())
        } else {
            let found = self.peek().map(|t| t.kind.to_string()).unwrap_or_else(|| "end of input".into());
            Err(self.error_here(format!("expected {kind} but found {found}")))
        }
    }

    fn expect_id(&mut self) -> Result<Id, ParseError> {
        let tok = self.expect(TokenKind::Id)?;
        Ok(crate::common::id(tok.text))
    }

    /// Skip forward to the next statement/declaration boundary after a
    /// recoverable parse error, so later, independent errors are still
    /// surfaced in the same run.
    fn resync(&mut self) {
        let mut depth: i32 = 0;
        loop {
            match self.peek_kind() {
                None => return,
                Some(TokenKind::LBrace) => {
                    depth += 1;
                    self.pos += 1;
                }
                Some(TokenKind::RBrace) => {
                    if depth == 0 {
                        self.pos += 1;
                        return;
                    }
                    depth -= 1;
                    self.pos += 1;
                }
                Some(TokenKind::Semi) if depth == 0 => {
                    self.pos += 1;
                    return;
                }
                _ => self.pos += 1,
            }
        }
    }

    fn is_type_start(&self, kind: TokenKind) -> bool {
        use TokenKind::*;
        matches!(
            kind,
            KwInt | KwLong | KwUnsigned | KwSigned | KwDouble | KwChar | KwVoid | KwStruct | KwUnion
        )
    }

    fn parse_program(&mut self) -> Program {
        let mut decls = Vec::new();
        while self.peek().is_some() {
            match self.parse_top_level_decl() {
                Ok(decl) => decls.push(decl),
                Err(_) => self.resync(),
            }
        }
        Program { decls }
    }

    fn parse_storage_class(&mut self) -> StorageClass {
        if self.eat(TokenKind::KwStatic) {
            StorageClass::Static
        } else if self.eat(TokenKind::KwExtern) {
            StorageClass::Extern
        } else {
            StorageClass::None
        }
    }

    /// Parses the base type specifier (no pointer/array/declarator parts):
    /// combinations of `int`/`long`/`unsigned`/`signed`/`double`/`char`/
    /// `void`/`struct Tag`/`union Tag`.
    fn parse_specifiers(&mut self) -> Result<TypeName, ParseError> {
        let mut saw_int = false;
        let mut saw_long = false;
        let mut saw_unsigned = false;
        let mut saw_signed = false;
        let mut saw_char = false;
        let mut saw_double = false;
        let mut saw_void = false;
        let mut structured = None;

        loop {
            match self.peek_kind() {
                Some(TokenKind::KwInt) => {
                    saw_int = true;
                    self.pos += 1;
                }
                Some(TokenKind::KwLong) => {
                    saw_long = true;
                    self.pos += 1;
                }
                Some(TokenKind::KwUnsigned) => {
                    saw_unsigned = true;
                    self.pos += 1;
                }
                Some(TokenKind::KwSigned) => {
                    saw_signed = true;
                    self.pos += 1;
                }
                Some(TokenKind::KwChar) => {
                    saw_char = true;
                    self.pos += 1;
                }
                Some(TokenKind::KwDouble) => {
                    saw_double = true;
                    self.pos += 1;
                }
                Some(TokenKind::KwVoid) => {
                    saw_void = true;
                    self.pos += 1;
                }
                Some(TokenKind::KwStruct) => {
                    self.pos += 1;
                    let tag = self.expect_id()?;
                    structured = Some(TypeName::Struct(tag));
                }
                Some(TokenKind::KwUnion) => {
                    self.pos += 1;
                    let tag = self.expect_id()?;
                    structured = Some(TypeName::Union(tag));
                }
                _ => break,
            }
        }

        if let Some(ty) = structured {
            return Ok(ty);
        }
        if saw_void {
            return Ok(TypeName::Void);
        }
        if saw_double {
            return Ok(TypeName::Double);
        }
        if saw_char {
            return Ok(if saw_unsigned {
                TypeName::UChar
            } else if saw_signed {
                TypeName::SChar
            } else {
                TypeName::Char
            });
        }
        if saw_long {
            return Ok(if saw_unsigned { TypeName::ULong } else { TypeName::Long });
        }
        if saw_int || saw_unsigned || saw_signed {
            return Ok(if saw_unsigned { TypeName::UInt } else { TypeName::Int });
        }
        Err(self.error_here("expected a type specifier"))
    }

    fn parse_declarator(&mut self) -> Result<Declarator, ParseError> {
        if self.eat(TokenKind::Star) {
            return Ok(Declarator::Pointer(Box::new(self.parse_declarator()?)));
        }
        self.parse_direct_declarator()
    }

    fn parse_direct_declarator(&mut self) -> Result<Declarator, ParseError> {
        let mut d = self.parse_simple_declarator()?;
        if self.eat(TokenKind::LParen) {
            let params = self.parse_param_list()?;
            self.expect(TokenKind::RParen)?;
            return Ok(Declarator::Function(params, Box::new(d)));
        }
        while self.eat(TokenKind::LBracket) {
            let len = self.parse_array_size()?;
            self.expect(TokenKind::RBracket)?;
            d = Declarator::Array(Box::new(d), len);
        }
        Ok(d)
    }

    fn parse_simple_declarator(&mut self) -> Result<Declarator, ParseError> {
        if self.eat(TokenKind::LParen) {
            let d = self.parse_declarator()?;
            self.expect(TokenKind::RParen)?;
            Ok(d)
        } else {
            Ok(Declarator::Ident(self.expect_id()?))
        }
    }

    fn parse_array_size(&mut self) -> Result<usize, ParseError> {
        let tok = self.expect(TokenKind::IntConst)?;
        let (value, _) = parse_int_text(tok.text);
        Ok(value as usize)
    }

    fn parse_param_list(&mut self) -> Result<Vec<(Id, TypeName)>, ParseError> {
        if self.peek_kind() == Some(TokenKind::KwVoid) && self.peek_at(1).map(|t| t.kind) == Some(TokenKind::RParen) {
            self.pos += 1;
            return Ok(Vec::new());
        }
        if self.peek_kind() == Some(TokenKind::RParen) {
            return Ok(Vec::new());
        }
        let mut params = Vec::new();
        loop {
            let base = self.parse_specifiers()?;
            let declarator = self.parse_declarator()?;
            let (name, ty, _) = process_declarator(&declarator, &base);
            params.push((name, ty));
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Ok(params)
    }

    /// A type name with no identifier, as used by casts and `sizeof(type)`:
    /// specifiers followed by zero or more `*`, optionally followed by one
    /// array suffix. Parenthesized abstract declarators (e.g. a cast to a
    /// pointer-to-array) are outside this subset.
    fn parse_type_name(&mut self) -> Result<TypeName, ParseError> {
        let mut ty = self.parse_specifiers()?;
        while self.eat(TokenKind::Star) {
            ty = TypeName::Pointer(Box::new(ty));
        }
        if self.eat(TokenKind::LBracket) {
            let len = self.parse_array_size()?;
            self.expect(TokenKind::RBracket)?;
            ty = TypeName::Array(Box::new(ty), len);
        }
        Ok(ty)
    }

    fn looks_like_type_name(&self) -> bool {
        self.peek_kind().map(|k| self.is_type_start(k)).unwrap_or(false)
    }

    fn parse_top_level_decl(&mut self) -> Result<Decl, ParseError> {
        let offset = self.current_offset();
        if self.peek_kind() == Some(TokenKind::KwStruct) || self.peek_kind() == Some(TokenKind::KwUnion) {
            if let Some(decl) = self.try_parse_structured_decl(offset)? {
                return Ok(Decl::Structured(decl));
            }
        }
        let storage = self.parse_storage_class();
        let base = self.parse_specifiers()?;
        let storage = if storage == StorageClass::None { self.parse_storage_class() } else { storage };
        let declarator = self.parse_declarator()?;
        let (name, ty, params) = process_declarator(&declarator, &base);

        if let Declarator::Function(_, _) = declarator {
            if self.eat(TokenKind::LBrace) {
                let body = self.parse_block_items()?;
                return Ok(Decl::Func(FuncDecl { name, ret: ty, params, storage, body: Some(body), offset }));
            }
            self.expect(TokenKind::Semi)?;
            return Ok(Decl::Func(FuncDecl { name, ret: ty, params, storage, body: None, offset }));
        }

        let init = if self.eat(TokenKind::Assign) { Some(self.parse_initializer()?) } else { None };
        self.expect(TokenKind::Semi)?;
        Ok(Decl::Var(VarDecl { name, ty, storage, init, offset }))
    }

    /// Tries to parse a bare `struct Tag { members... };` declaration.
    /// Returns `Ok(None)` if this is actually a variable/function declaration
    /// that merely starts with `struct Tag` as its specifier (the caller
    /// falls back to the general declaration path in that case) — detected
    /// by peeking past the tag for `{`.
    fn try_parse_structured_decl(&mut self, offset: SourceOffset) -> Result<Option<StructuredDecl>, ParseError> {
        let kind = match self.peek_kind() {
            Some(TokenKind::KwStruct) => StructuredKind::Struct,
            Some(TokenKind::KwUnion) => StructuredKind::Union,
            _ => return Ok(None),
        };
        let tag_tok = self.peek_at(1);
        let brace_tok = self.peek_at(2);
        if tag_tok.map(|t| t.kind) != Some(TokenKind::Id) || brace_tok.map(|t| t.kind) != Some(TokenKind::LBrace) {
            return Ok(None);
        }
        self.pos += 1;
        let name = self.expect_id()?;
        self.expect(TokenKind::LBrace)?;
        let mut members = Vec::new();
        while self.peek_kind() != Some(TokenKind::RBrace) {
            let base = self.parse_specifiers()?;
            loop {
                let declarator = self.parse_declarator()?;
                let (mname, mty, _) = process_declarator(&declarator, &base);
                members.push(MemberDecl { name: mname, ty: mty });
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::Semi)?;
        }
        self.expect(TokenKind::RBrace)?;
        self.expect(TokenKind::Semi)?;
        Ok(Some(StructuredDecl { name, kind, members, offset }))
    }

    fn parse_initializer(&mut self) -> Result<Initializer, ParseError> {
        if self.eat(TokenKind::LBrace) {
            let mut items = Vec::new();
            if self.peek_kind() != Some(TokenKind::RBrace) {
                loop {
                    items.push(self.parse_initializer()?);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                    if self.peek_kind() == Some(TokenKind::RBrace) {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RBrace)?;
            Ok(Initializer::Compound(items))
        } else {
            Ok(Initializer::Single(self.parse_expr()?))
        }
    }

    fn parse_block_items(&mut self) -> Result<Vec<BlockItem>, ParseError> {
        let mut items = Vec::new();
        while self.peek_kind() != Some(TokenKind::RBrace) && self.peek().is_some() {
            match self.parse_block_item() {
                Ok(item) => items.push(item),
                Err(_) => self.resync(),
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(items)
    }

    fn parse_block_item(&mut self) -> Result<BlockItem, ParseError> {
        if self.looks_like_decl_start() {
            return Ok(BlockItem::Decl(self.parse_local_decl()?));
        }
        Ok(BlockItem::Stmt(self.parse_stmt()?))
    }

    fn looks_like_decl_start(&self) -> bool {
        matches!(self.peek_kind(), Some(TokenKind::KwStatic) | Some(TokenKind::KwExtern))
            || self.looks_like_type_name()
    }

    fn parse_local_decl(&mut self) -> Result<Decl, ParseError> {
        let offset = self.current_offset();
        if self.peek_kind() == Some(TokenKind::KwStruct) || self.peek_kind() == Some(TokenKind::KwUnion) {
            if let Some(decl) = self.try_parse_structured_decl(offset)? {
                return Ok(Decl::Structured(decl));
            }
        }
        let mut storage = self.parse_storage_class();
        let base = self.parse_specifiers()?;
        if storage == StorageClass::None {
            storage = self.parse_storage_class();
        }
        let declarator = self.parse_declarator()?;
        let (name, ty, params) = process_declarator(&declarator, &base);
        if let Declarator::Function(_, _) = declarator {
            if self.eat(TokenKind::LBrace) {
                let body = self.parse_block_items()?;
                return Ok(Decl::Func(FuncDecl { name, ret: ty, params, storage, body: Some(body), offset }));
            }
            self.expect(TokenKind::Semi)?;
            return Ok(Decl::Func(FuncDecl { name, ret: ty, params, storage, body: None, offset }));
        }
        let init = if self.eat(TokenKind::Assign) { Some(self.parse_initializer()?) } else { None };
        self.expect(TokenKind::Semi)?;
        Ok(Decl::Var(VarDecl { name, ty, storage, init, offset }))
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        let offset = self.current_offset();
        match self.peek_kind() {
            Some(TokenKind::Semi) => {
                self.pos += 1;
                Ok(Stmt::new(StmtKind::Null, offset))
            }
            Some(TokenKind::LBrace) => {
                self.pos += 1;
                let items = self.parse_block_items()?;
                Ok(Stmt::new(StmtKind::Compound(items), offset))
            }
            Some(TokenKind::KwReturn) => {
                self.pos += 1;
                let expr = if self.peek_kind() != Some(TokenKind::Semi) { Some(self.parse_expr()?) } else { None };
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::new(StmtKind::Return(expr), offset))
            }
            Some(TokenKind::KwIf) => {
                self.pos += 1;
                self.expect(TokenKind::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                let then_branch = Box::new(self.parse_stmt()?);
                let else_branch = if self.eat(TokenKind::KwElse) { Some(Box::new(self.parse_stmt()?)) } else { None };
                Ok(Stmt::new(StmtKind::If { cond, then_branch, else_branch }, offset))
            }
            Some(TokenKind::KwWhile) => {
                self.pos += 1;
                self.expect(TokenKind::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                let body = Box::new(self.parse_stmt()?);
                Ok(Stmt::new(StmtKind::While { cond, body, label: None }, offset))
            }
            Some(TokenKind::KwDo) => {
                self.pos += 1;
                let body = Box::new(self.parse_stmt()?);
                self.expect(TokenKind::KwWhile)?;
                self.expect(TokenKind::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::new(StmtKind::DoWhile { body, cond, label: None }, offset))
            }
            Some(TokenKind::KwFor) => {
                self.pos += 1;
                self.expect(TokenKind::LParen)?;
                let init = if self.looks_like_decl_start() {
                    ForInit::Decl(self.parse_for_decl()?)
                } else if self.peek_kind() == Some(TokenKind::Semi) {
                    self.pos += 1;
                    ForInit::Expr(None)
                } else {
                    let e = self.parse_expr()?;
                    self.expect(TokenKind::Semi)?;
                    ForInit::Expr(Some(e))
                };
                let cond = if self.peek_kind() != Some(TokenKind::Semi) { Some(self.parse_expr()?) } else { None };
                self.expect(TokenKind::Semi)?;
                let post = if self.peek_kind() != Some(TokenKind::RParen) { Some(self.parse_expr()?) } else { None };
                self.expect(TokenKind::RParen)?;
                let body = Box::new(self.parse_stmt()?);
                Ok(Stmt::new(StmtKind::For { init, cond, post, body, label: None }, offset))
            }
            Some(TokenKind::KwBreak) => {
                self.pos += 1;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::new(StmtKind::Break(None), offset))
            }
            Some(TokenKind::KwContinue) => {
                self.pos += 1;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::new(StmtKind::Continue(None), offset))
            }
            Some(TokenKind::KwGoto) => {
                self.pos += 1;
                let label = self.expect_id()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::new(StmtKind::Goto(label), offset))
            }
            Some(TokenKind::KwSwitch) => {
                self.pos += 1;
                self.expect(TokenKind::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                let body = Box::new(self.parse_stmt()?);
                Ok(Stmt::new(
                    StmtKind::Switch { cond, body, label: None, cases: Vec::new(), default: None },
                    offset,
                ))
            }
            Some(TokenKind::KwCase) => {
                self.pos += 1;
                let value_expr = self.parse_expr()?;
                self.expect(TokenKind::Colon)?;
                let stmt = Box::new(self.parse_stmt()?);
                let value = const_fold_int(&value_expr);
                Ok(Stmt::new(StmtKind::Case { value, label: None, stmt }, offset))
            }
            Some(TokenKind::KwDefault) => {
                self.pos += 1;
                self.expect(TokenKind::Colon)?;
                let stmt = Box::new(self.parse_stmt()?);
                Ok(Stmt::new(StmtKind::Default { label: None, stmt }, offset))
            }
            Some(TokenKind::Id) if self.peek_at(1).map(|t| t.kind) == Some(TokenKind::Colon) => {
                let label = self.expect_id()?;
                self.pos += 1;
                let stmt = Box::new(self.parse_stmt()?);
                Ok(Stmt::new(StmtKind::Label(label, stmt), offset))
            }
            _ => {
                let expr = self.parse_expr()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::new(StmtKind::Expr(expr), offset))
            }
        }
    }

    fn parse_for_decl(&mut self) -> Result<VarDecl, ParseError> {
        let offset = self.current_offset();
        let storage = self.parse_storage_class();
        let base = self.parse_specifiers()?;
        let declarator = self.parse_declarator()?;
        let (name, ty, _) = process_declarator(&declarator, &base);
        let init = if self.eat(TokenKind::Assign) { Some(self.parse_initializer()?) } else { None };
        self.expect(TokenKind::Semi)?;
        Ok(VarDecl { name, ty, storage, init, offset })
    }

    // --- Expressions ---

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        let offset = self.current_offset();
        let lhs = self.parse_ternary()?;
        let op = match self.peek_kind() {
            Some(TokenKind::Assign) => Some(AssignOp::Assign),
            Some(TokenKind::PlusAssign) => Some(AssignOp::Compound(BinaryOp::Add)),
            Some(TokenKind::MinusAssign) => Some(AssignOp::Compound(BinaryOp::Sub)),
            Some(TokenKind::StarAssign) => Some(AssignOp::Compound(BinaryOp::Mul)),
            Some(TokenKind::SlashAssign) => Some(AssignOp::Compound(BinaryOp::Div)),
            Some(TokenKind::PercentAssign) => Some(AssignOp::Compound(BinaryOp::Mod)),
            Some(TokenKind::AmpAssign) => Some(AssignOp::Compound(BinaryOp::BitAnd)),
            Some(TokenKind::PipeAssign) => Some(AssignOp::Compound(BinaryOp::BitOr)),
            Some(TokenKind::CaretAssign) => Some(AssignOp::Compound(BinaryOp::BitXor)),
            Some(TokenKind::ShlAssign) => Some(AssignOp::Compound(BinaryOp::Shl)),
            Some(TokenKind::ShrAssign) => Some(AssignOp::Compound(BinaryOp::Shr)),
            _ => None,
        };
        match op {
            Some(op) => {
                self.pos += 1;
                let rhs = self.parse_assignment()?;
                Ok(Expr::new(ExprKind::Assign(op, Box::new(lhs), Box::new(rhs)), offset))
            }
            None => Ok(lhs),
        }
    }

    fn parse_ternary(&mut self) -> Result<Expr, ParseError> {
        let offset = self.current_offset();
        let cond = self.parse_binary(0)?;
        if self.eat(TokenKind::Question) {
            let then_expr = self.parse_expr()?;
            self.expect(TokenKind::Colon)?;
            let else_expr = self.parse_ternary()?;
            Ok(Expr::new(
                ExprKind::Ternary(Box::new(cond), Box::new(then_expr), Box::new(else_expr)),
                offset,
            ))
        } else {
            Ok(cond)
        }
    }

    fn binop_for(&self, kind: TokenKind) -> Option<(BinaryOp, u8)> {
        use BinaryOp::*;
        use TokenKind::*;
        Some(match kind {
            PipePipe => (Or, 1),
            AmpAmp => (And, 2),
            Pipe => (BitOr, 3),
            Caret => (BitXor, 4),
            Amp => (BitAnd, 5),
            EqEq => (Eq, 6),
            NotEq => (Ne, 6),
            Lt => (Lt, 7),
            Le => (Le, 7),
            Gt => (Gt, 7),
            Ge => (Ge, 7),
            Shl => (Shl, 8),
            Shr => (Shr, 8),
            Plus => (Add, 9),
            Minus => (Sub, 9),
            Star => (Mul, 10),
            Slash => (Div, 10),
            Percent => (Mod, 10),
            _ => return None,
        })
    }

    fn parse_binary(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let offset = self.current_offset();
        let mut lhs = self.parse_unary()?;
        while let Some(kind) = self.peek_kind() {
            let Some((op, bp)) = self.binop_for(kind) else { break };
            if bp < min_bp {
                break;
            }
            self.pos += 1;
            let rhs = self.parse_binary(bp + 1)?;
            lhs = Expr::new(ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)), offset);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let offset = self.current_offset();
        match self.peek_kind() {
            Some(TokenKind::Minus) => {
                self.pos += 1;
                let e = self.parse_unary()?;
                Ok(Expr::new(ExprKind::Unary(UnaryOp::Neg, Box::new(e)), offset))
            }
            Some(TokenKind::Plus) => {
                self.pos += 1;
                let e = self.parse_unary()?;
                Ok(Expr::new(ExprKind::Unary(UnaryOp::Plus, Box::new(e)), offset))
            }
            Some(TokenKind::Bang) => {
                self.pos += 1;
                let e = self.parse_unary()?;
                Ok(Expr::new(ExprKind::Unary(UnaryOp::Not, Box::new(e)), offset))
            }
            Some(TokenKind::Tilde) => {
                self.pos += 1;
                let e = self.parse_unary()?;
                Ok(Expr::new(ExprKind::Unary(UnaryOp::Complement, Box::new(e)), offset))
            }
            Some(TokenKind::PlusPlus) => {
                self.pos += 1;
                let e = self.parse_unary()?;
                Ok(Expr::new(ExprKind::PreInc(Box::new(e)), offset))
            }
            Some(TokenKind::MinusMinus) => {
                self.pos += 1;
                let e = self.parse_unary()?;
                Ok(Expr::new(ExprKind::PreDec(Box::new(e)), offset))
            }
            Some(TokenKind::Star) => {
                self.pos += 1;
                let e = self.parse_unary()?;
                Ok(Expr::new(ExprKind::Deref(Box::new(e)), offset))
            }
            Some(TokenKind::Amp) => {
                self.pos += 1;
                let e = self.parse_unary()?;
                Ok(Expr::new(ExprKind::AddrOf(Box::new(e)), offset))
            }
            Some(TokenKind::KwSizeof) => {
                self.pos += 1;
                if self.peek_kind() == Some(TokenKind::LParen)
                    && self.peek_at(1).map(|t| self.is_type_start(t.kind)).unwrap_or(false)
                {
                    self.pos += 1;
                    let ty = self.parse_type_name()?;
                    self.expect(TokenKind::RParen)?;
                    Ok(Expr::new(ExprKind::SizeofType(ty), offset))
                } else {
                    let e = self.parse_unary()?;
                    Ok(Expr::new(ExprKind::SizeofExpr(Box::new(e)), offset))
                }
            }
            Some(TokenKind::LParen)
                if self.peek_at(1).map(|t| self.is_type_start(t.kind)).unwrap_or(false) =>
            {
                self.pos += 1;
                let ty = self.parse_type_name()?;
                self.expect(TokenKind::RParen)?;
                let e = self.parse_unary()?;
                Ok(Expr::new(ExprKind::Cast(ty, Box::new(e)), offset))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let offset = self.current_offset();
        let mut e = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                Some(TokenKind::LBracket) => {
                    self.pos += 1;
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::RBracket)?;
                    e = Expr::new(ExprKind::Subscript(Box::new(e), Box::new(index)), offset);
                }
                Some(TokenKind::Dot) => {
                    self.pos += 1;
                    let field = self.expect_id()?;
                    e = Expr::new(ExprKind::Dot(Box::new(e), field), offset);
                }
                Some(TokenKind::Arrow) => {
                    self.pos += 1;
                    let field = self.expect_id()?;
                    e = Expr::new(ExprKind::Arrow(Box::new(e), field), offset);
                }
                Some(TokenKind::PlusPlus) => {
                    self.pos += 1;
                    e = Expr::new(ExprKind::PostInc(Box::new(e)), offset);
                }
                Some(TokenKind::MinusMinus) => {
                    self.pos += 1;
                    e = Expr::new(ExprKind::PostDec(Box::new(e)), offset);
                }
                _ => break,
            }
        }
        Ok(e)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let offset = self.current_offset();
        match self.peek_kind() {
            Some(TokenKind::IntConst) => {
                let tok = self.advance().unwrap();
                let (value, suffix) = parse_int_text(tok.text);
                Ok(Expr::new(ExprKind::ConstInt(value, suffix), offset))
            }
            Some(TokenKind::DoubleConst) => {
                let tok = self.advance().unwrap();
                let value: f64 = tok.text.parse().unwrap_or(0.0);
                Ok(Expr::new(ExprKind::ConstDouble(value), offset))
            }
            Some(TokenKind::CharConst) => {
                let tok = self.advance().unwrap();
                let bytes = decode_escapes(tok.text);
                let byte = bytes.first().copied().unwrap_or(0) as i8;
                Ok(Expr::new(ExprKind::ConstChar(byte), offset))
            }
            Some(TokenKind::StringLit) => {
                let tok = self.advance().unwrap();
                let bytes = decode_escapes(tok.text);
                Ok(Expr::new(ExprKind::Str(bytes), offset))
            }
            Some(TokenKind::Id) => {
                let tok = self.advance().unwrap();
                let name = crate::common::id(tok.text);
                if self.eat(TokenKind::LParen) {
                    let mut args = Vec::new();
                    if self.peek_kind() != Some(TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat(TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(TokenKind::RParen)?;
                    Ok(Expr::new(ExprKind::Call(name, args), offset))
                } else {
                    Ok(Expr::new(ExprKind::Var(name), offset))
                }
            }
            Some(TokenKind::LParen) => {
                self.pos += 1;
                let e = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(e)
            }
            _ => {
                let found = self.peek().map(|t| t.kind.to_string()).unwrap_or_else(|| "end of input".into());
                Err(self.error_here(format!("expected an expression but found {found}")))
            }
        }
    }
}

/// Parse an integer-literal token's text (decimal or `0x` hex, with an
/// optional `u`/`U`/`l`/`L` suffix in any order/case) into its raw bit
/// pattern and the suffix the source spelled. Width/signedness selection from
/// this raw form happens in type checking (see `sema::typecheck`).
fn parse_int_text(text: &str) -> (u64, IntSuffix) {
    let suffix_start = text.find(|c: char| matches!(c, 'u' | 'U' | 'l' | 'L')).unwrap_or(text.len());
    let (digits, suffix_str) = text.split_at(suffix_start);
    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).unwrap_or(0)
    } else {
        digits.parse::<u64>().unwrap_or(0)
    };
    let lower = suffix_str.to_ascii_lowercase();
    let suffix = if lower.contains('u') && lower.contains('l') {
        IntSuffix::UL
    } else if lower.contains('u') {
        IntSuffix::U
    } else if lower.contains('l') {
        IntSuffix::L
    } else {
        IntSuffix::None
    };
    (value, suffix)
}

/// Fold a `case` label expression (required by the grammar to be an integer
/// constant expression) to its value. Returns `None` for anything that is not
/// a simple literal or a unary-minus of one; `sema::labels` reports the
/// non-constant-expression error for that case using this as a detector.
fn const_fold_int(e: &Expr) -> Option<i64> {
    match &e.kind {
        ExprKind::ConstInt(v, _) => Some(*v as i64),
        ExprKind::ConstChar(c) => Some(*c as i64),
        ExprKind::Unary(UnaryOp::Neg, inner) => const_fold_int(inner).map(|v| -v),
        ExprKind::Unary(UnaryOp::Plus, inner) => const_fold_int(inner),
        ExprKind::Cast(_, inner) => const_fold_int(inner),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Program {
        let (prog, errs) = parse(src);
        assert!(errs.is_empty(), "unexpected parse errors: {errs:?}");
        prog
    }

    #[test]
    fn parses_simple_function() {
        let prog = parse_ok("int main(void) { return 2+3*4; }");
        assert_eq!(prog.decls.len(), 1);
        match &prog.decls[0] {
            Decl::Func(f) => {
                assert_eq!(&*f.name, "main");
                assert!(f.body.is_some());
            }
            _ => panic!("expected a function"),
        }
    }

    #[test]
    fn declarator_disambiguates_pointer_array_vs_array_of_pointer() {
        let prog = parse_ok("int *a[3]; int (*b)[3];");
        let ty_of = |d: &Decl| match d {
            Decl::Var(v) => v.ty.clone(),
            _ => panic!("expected var"),
        };
        assert_eq!(ty_of(&prog.decls[0]), TypeName::Array(Box::new(TypeName::Pointer(Box::new(TypeName::Int))), 3));
        assert_eq!(ty_of(&prog.decls[1]), TypeName::Pointer(Box::new(TypeName::Array(Box::new(TypeName::Int), 3))));
    }

    #[test]
    fn parses_struct_decl_and_member_access() {
        let prog = parse_ok("struct Point { int x; int y; }; int main(void) { struct Point p; return p.x; }");
        assert_eq!(prog.decls.len(), 2);
    }

    #[test]
    fn parses_for_loop_with_decl_init() {
        let prog = parse_ok("int main(void) { int x = 0; for (int i = 0; i < 10; i = i + 1) x = x + i; return x; }");
        assert_eq!(prog.decls.len(), 1);
    }

    #[test]
    fn recovers_after_a_malformed_statement() {
        let (_, errs) = parse("int main(void) { 1 + ; return 0; }");
        assert!(!errs.is_empty());
    }

    #[test]
    fn int_literal_suffix_parsing() {
        assert_eq!(parse_int_text("0xFFu"), (0xFF, IntSuffix::U));
        assert_eq!(parse_int_text("42UL"), (42, IntSuffix::UL));
        assert_eq!(parse_int_text("7"), (7, IntSuffix::None));
    }
}
