//! The abstract syntax tree produced by the parser and refined in place by
//! the semantic passes in [`crate::sema`].
//!
//! Passes after parsing do not rebuild this tree: they walk it with `&mut`
//! access and fill in the slots that are `None` until their pass runs
//! (`Expr::ty`, the various `label` fields, `ForInit` normalization). This
//! mirrors the note that visitor dispatch is an implementation detail, not a
//! semantic requirement — only the final shape of the tree after all passes
//! matters, not how many trees got allocated getting there.

use crate::common::{Id, SourceOffset};
use crate::sema::types::Type;

/// A parsed, not-yet-resolved type expression. Semantic analysis turns this
/// into a [`Type`] by resolving `Struct`/`Union` tags to their unique name in
/// the aggregate registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeName {
    Void,
    Char,
    SChar,
    UChar,
    Int,
    UInt,
    Long,
    ULong,
    Double,
    Pointer(Box<TypeName>),
    Array(Box<TypeName>, usize),
    Struct(Id),
    Union(Id),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageClass {
    None,
    Static,
    Extern,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StructuredKind {
    Struct,
    Union,
}

#[derive(Clone, Debug)]
pub struct MemberDecl {
    pub name: Id,
    pub ty: TypeName,
}

#[derive(Clone, Debug)]
pub struct StructuredDecl {
    pub name: Id,
    pub kind: StructuredKind,
    pub members: Vec<MemberDecl>,
    pub offset: SourceOffset,
}

#[derive(Clone, Debug)]
pub struct VarDecl {
    pub name: Id,
    pub ty: TypeName,
    pub storage: StorageClass,
    pub init: Option<Initializer>,
    pub offset: SourceOffset,
}

#[derive(Clone, Debug)]
pub struct FuncDecl {
    pub name: Id,
    pub ret: TypeName,
    pub params: Vec<(Id, TypeName)>,
    pub storage: StorageClass,
    pub body: Option<Vec<BlockItem>>,
    pub offset: SourceOffset,
}

#[derive(Clone, Debug)]
pub enum Decl {
    Var(VarDecl),
    Func(FuncDecl),
    Structured(StructuredDecl),
}

/// An initializer. [`Initializer::Zero`] never comes out of the parser: it is
/// introduced by [`crate::sema::initializers`] when flattening a compound
/// array/aggregate initializer that does not fully cover its declared size.
#[derive(Clone, Debug)]
pub enum Initializer {
    Single(Expr),
    Compound(Vec<Initializer>),
    Zero(usize),
    String(Vec<u8>, bool),
}

#[derive(Clone, Debug)]
pub enum ForInit {
    Decl(VarDecl),
    Expr(Option<Expr>),
}

#[derive(Clone, Debug)]
pub enum BlockItem {
    Decl(Decl),
    Stmt(Stmt),
}

#[derive(Clone, Debug)]
pub struct Stmt {
    pub kind: StmtKind,
    pub offset: SourceOffset,
}

impl Stmt {
    pub fn new(kind: StmtKind, offset: SourceOffset) -> Self {
        Stmt { kind, offset }
    }
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    Return(Option<Expr>),
    Expr(Expr),
    If { cond: Expr, then_branch: Box<Stmt>, else_branch: Option<Box<Stmt>> },
    Goto(Id),
    Label(Id, Box<Stmt>),
    Compound(Vec<BlockItem>),
    Break(Option<Id>),
    Continue(Option<Id>),
    Case { value: Option<i64>, label: Option<Id>, stmt: Box<Stmt> },
    Default { label: Option<Id>, stmt: Box<Stmt> },
    While { cond: Expr, body: Box<Stmt>, label: Option<Id> },
    DoWhile { body: Box<Stmt>, cond: Expr, label: Option<Id> },
    For { init: ForInit, cond: Option<Expr>, post: Option<Expr>, body: Box<Stmt>, label: Option<Id> },
    Switch {
        cond: Expr,
        body: Box<Stmt>,
        label: Option<Id>,
        cases: Vec<(i64, Id)>,
        default: Option<Id>,
    },
    Null,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    Complement,
    Plus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }

    pub fn is_shift(self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr)
    }

    pub fn is_short_circuit(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

/// The eleven assignment spellings: simple `=` plus the ten compound forms.
/// Compound assignment is deliberately *not* desugared here; IR generation
/// reads the lhs twice once it is known to be a side-effect-free lvalue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Compound(BinaryOp),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntSuffix {
    None,
    U,
    L,
    UL,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    ConstInt(u64, IntSuffix),
    ConstChar(i8),
    ConstDouble(f64),
    Str(Vec<u8>),
    Var(Id),
    Cast(TypeName, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Assign(AssignOp, Box<Expr>, Box<Expr>),
    PreInc(Box<Expr>),
    PreDec(Box<Expr>),
    PostInc(Box<Expr>),
    PostDec(Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(Id, Vec<Expr>),
    Deref(Box<Expr>),
    AddrOf(Box<Expr>),
    Subscript(Box<Expr>, Box<Expr>),
    SizeofExpr(Box<Expr>),
    SizeofType(TypeName),
    Dot(Box<Expr>, Id),
    Arrow(Box<Expr>, Id),
}

/// One expression node. `ty` starts `None` and is filled in by
/// [`crate::sema::typecheck`]; every node that survives type checking has
/// `ty.is_some()` (see the data-model invariant this upholds).
#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Option<Type>,
    pub offset: SourceOffset,
}

impl Expr {
    pub fn new(kind: ExprKind, offset: SourceOffset) -> Self {
        Expr { kind, ty: None, offset }
    }

    pub fn ty(&self) -> &Type {
        self.ty.as_ref().expect("internal error: expression type not yet resolved")
    }
}

#[derive(Clone, Debug, Default)]
pub struct Program {
    pub decls: Vec<Decl>,
}
