//! The typed three-address IR that sits between the checked AST
//! ([`crate::front::ast`]) and instruction selection ([`crate::back::select`]).
//!
//! Every instruction here already carries concrete types: widths, signedness
//! and pointer/aggregate shape are all resolved by the time a program reaches
//! this form, so instruction selection never has to re-derive them from the
//! AST. Short-circuit `&&`/`||`, pre/post inc-dec, compound assignment and
//! array subscripting have all been expanded away by
//! [`crate::front::lower`]; nothing below this line needs to know those
//! surface forms ever existed.

use crate::common::Id;
use crate::sema::types::{Base, Type};

/// An operand: either a named temporary/variable (carrying its type) or an
/// immediate. Constants are always of scalar type, matching the AST's typed
/// constant variants.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Var(Id, Type),
    ConstInt(u64, Base),
    ConstDouble(f64),
}

impl Value {
    pub fn ty(&self) -> Type {
        match self {
            Value::Var(_, ty) => ty.clone(),
            Value::ConstInt(_, base) => Type::Var(*base),
            Value::ConstDouble(_) => Type::Var(Base::Double),
        }
    }

    pub fn var(name: Id, ty: Type) -> Value {
        Value::Var(name, ty)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Complement,
    Negate,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
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
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge)
    }
}

/// One three-address instruction. Every instruction that produces a value
/// names its destination as a fresh [`Value::Var`]; nothing is implicitly
/// clobbered.
#[derive(Clone, Debug)]
pub enum Instruction {
    Return(Option<Value>),

    SignExtend { src: Value, dst: Value },
    ZeroExtend { src: Value, dst: Value },
    Truncate { src: Value, dst: Value },
    DoubleToInt { src: Value, dst: Value },
    DoubleToUInt { src: Value, dst: Value },
    IntToDouble { src: Value, dst: Value },
    UIntToDouble { src: Value, dst: Value },

    Unary { op: UnOp, src: Value, dst: Value },
    Binary { op: BinOp, lhs: Value, rhs: Value, dst: Value },

    Copy { src: Value, dst: Value },

    GetAddress { src: Value, dst: Value },
    Load { ptr: Value, dst: Value },
    Store { src: Value, ptr: Value },

    /// `dst = ptr + index * scale`, in bytes. `scale` is the pointee size.
    AddPtr { ptr: Value, index: Value, scale: i64, dst: Value },

    /// Write `src` (a scalar of `width` bytes) into the aggregate object
    /// named `dst_name` at `offset` bytes, used while initializing or
    /// copying aggregates member-by-member.
    CopyToOffset { src: Value, dst_name: Id, offset: i64, width: i64, alignment: i64 },

    Jump(Id),
    JumpIfZero(Value, Id),
    JumpIfNotZero(Value, Id),
    Label(Id),

    FunCall { name: Id, args: Vec<Value>, dst: Option<Value> },

    /// Reserve `bytes` of stack for an aggregate-valued temporary named
    /// `name`; instruction selection turns this into a `PseudoMem` slot.
    Allocate { bytes: i64, name: Id },
}

/// A function's body: one flat instruction stream (no explicit basic-block
/// graph — labels and jumps encode control flow directly, matching the
/// source's own linear instruction-list IR).
#[derive(Clone, Debug, Default)]
pub struct Function {
    pub name: Id,
    pub global: bool,
    pub params: Vec<Id>,
    pub param_types: Vec<Type>,
    pub ret_type: Type,
    pub body: Vec<Instruction>,
}

/// A scalar initializer for static data: either a concrete value or a run of
/// zero bytes, mirroring [`crate::front::ast::Initializer`] after
/// flattening.
#[derive(Clone, Debug)]
pub enum StaticInit {
    Int(u64, Base),
    Double(f64),
    Zero(i64),
    /// Bytes of a string literal; `null_terminated` adds one extra zero byte.
    String(Vec<u8>, bool),
    /// A pointer-sized zero, used for a null-initialized pointer global.
    PointerZero,
}

#[derive(Clone, Debug)]
pub enum TopLevel {
    Function(Function),
    /// A scalar static object (also covers pointers and tentative
    /// zero-initialized definitions).
    StaticVariable { name: Id, global: bool, ty: Type, init: StaticInit },
    /// An array or structured static object, flattened to a row-major
    /// sequence of initializer slots.
    StaticArray { name: Id, global: bool, ty: Type, init: Vec<StaticInit> },
    /// An interned read-only constant: either a double literal (`double.N`)
    /// or a string literal's byte payload. Always local (`.L`-prefixed in
    /// the emitted assembly).
    StaticConstant { name: Id, bytes: Vec<u8>, alignment: i64 },
}

#[derive(Clone, Debug, Default)]
pub struct Program {
    pub top_level: Vec<TopLevel>,
}
