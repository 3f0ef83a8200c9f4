//! The semantic type tree and the aggregate-layout registry.
//!
//! Types are owned trees: a pointer or array type owns a boxed copy of its
//! referent/element rather than sharing it, so that deep-copying a typed
//! expression node (as every pass below [`typecheck`](super::typecheck) does)
//! never aliases another node's type. Equality is structural for every
//! variant except [`Type::Structured`], whose equality is nominal: two
//! structured types are equal exactly when they carry the same unique tag
//! name, which is how shadowed/nested struct tags are told apart.

use crate::common::{round_up, Id, Map};

#[cfg(test)]
use crate::common::id;

/// The scalar base kinds a [`Type::Var`] can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Base {
    I8,
    U8,
    Char,
    I32,
    U32,
    I64,
    U64,
    Double,
    Void,
}

impl Base {
    /// Byte size of this scalar, per the x86-64 System V ABI.
    pub fn size(self) -> i64 {
        match self {
            Base::I8 | Base::U8 | Base::Char => 1,
            Base::I32 | Base::U32 => 4,
            Base::I64 | Base::U64 | Base::Double => 8,
            Base::Void => 0,
        }
    }

    pub fn alignment(self) -> i64 {
        self.size().max(1)
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Base::I8 | Base::Char | Base::I32 | Base::I64)
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, Base::Double | Base::Void)
    }

    /// Conversion rank used by the common-type rule: wider wins, and at equal
    /// width a signed operand converts to the unsigned partner's type.
    pub fn rank(self) -> u8 {
        match self {
            Base::I8 | Base::U8 | Base::Char => 0,
            Base::I32 | Base::U32 => 1,
            Base::I64 | Base::U64 => 2,
            Base::Double => 3,
            Base::Void => u8::MAX,
        }
    }
}

/// The semantic type of an expression or declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Var(Base),
    Pointer(Box<Type>),
    Array(Box<Type>, usize),
    Func(Box<Type>, Vec<Type>),
    /// Nominal: equality compares the unique tag name only.
    Structured(Id),
}

impl Type {
    pub fn pointer(to: Type) -> Type {
        Type::Pointer(Box::new(to))
    }

    pub fn array(of: Type, len: usize) -> Type {
        Type::Array(Box::new(of), len)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array(..))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Type::Func(..))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Var(Base::Void))
    }

    pub fn is_void_pointer(&self) -> bool {
        matches!(self, Type::Pointer(inner) if inner.is_void())
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Type::Structured(_))
    }

    pub fn is_double(&self) -> bool {
        matches!(self, Type::Var(Base::Double))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Var(b) if b.is_integer())
    }

    pub fn is_arithmetic(&self) -> bool {
        self.is_integer() || self.is_double()
    }

    /// Scalars are arithmetic types and pointers; arrays, functions, structs
    /// and unions are not (e.g. they cannot appear bare as a `?:`/`if` guard).
    pub fn is_scalar(&self) -> bool {
        self.is_arithmetic() || self.is_pointer()
    }

    pub fn as_base(&self) -> Option<Base> {
        match self {
            Type::Var(b) => Some(*b),
            _ => None,
        }
    }

    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Pointer(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::Array(inner, _) => Some(inner),
            _ => None,
        }
    }

    /// Decay an array type to a pointer to its element; leave everything else
    /// unchanged. Function designators are left as-is here: the one call site
    /// that needs function-to-pointer-like treatment (a bare function name
    /// used as a call target) never routes through this helper.
    pub fn decay(&self) -> Type {
        match self {
            Type::Array(elem, _) => Type::pointer((**elem).clone()),
            other => other.clone(),
        }
    }

    pub fn signed_integer_counterpart(&self) -> Type {
        match self.as_base() {
            Some(Base::U8) => Type::Var(Base::I8),
            Some(Base::U32) => Type::Var(Base::I32),
            Some(Base::U64) => Type::Var(Base::I64),
            _ => self.clone(),
        }
    }
}

/// Kind of a structured (struct/union) declaration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StructuredKind {
    Struct,
    Union,
}

/// One member of a laid-out aggregate.
#[derive(Clone, Debug)]
pub struct Member {
    pub name: Id,
    pub ty: Type,
    pub offset: i64,
    pub alignment: i64,
}

/// The fully laid-out form of a struct or union, keyed by its unique tag name
/// in the [`AggregateRegistry`].
#[derive(Clone, Debug)]
pub struct Aggregate {
    pub kind: StructuredKind,
    pub members: Vec<Member>,
    pub member_index: Map<Id, usize>,
    pub size: i64,
    pub alignment: i64,
}

impl Aggregate {
    pub fn member(&self, name: Id) -> Option<&Member> {
        self.member_index.get(&name).map(|&i| &self.members[i])
    }
}

/// Maps a structured type's unique tag name to its layout. Single-scoped: a
/// tag declared in an inner block is registered under its already-mangled
/// unique name (`tag.N.tmp`), so nested shadowing never collides here.
#[derive(Clone, Debug, Default)]
pub struct AggregateRegistry {
    aggregates: Map<Id, Aggregate>,
}

impl AggregateRegistry {
    pub fn new() -> Self {
        AggregateRegistry::default()
    }

    pub fn get(&self, name: Id) -> Option<&Aggregate> {
        self.aggregates.get(&name)
    }

    /// Lay out and register a structured declaration's members.
    ///
    /// Struct members are placed in declaration order at
    /// `round_up(cursor, member_align)`; union members all start at offset 0
    /// and the union's size is the widest member. The aggregate's own size is
    /// always rounded up to its own alignment so that arrays of it are
    /// densely packed.
    pub fn declare(&mut self, name: Id, kind: StructuredKind, members: Vec<(Id, Type)>) {
        let mut laid_out = Vec::with_capacity(members.len());
        let mut member_index = Map::new();
        let mut cursor: i64 = 0;
        let mut align: i64 = 1;

        for (i, (member_name, ty)) in members.into_iter().enumerate() {
            let member_align = self.alignment_of(&ty);
            let member_size = self.size_of(&ty);
            align = align.max(member_align);

            let offset = match kind {
                StructuredKind::Struct => {
                    let offset = round_up(cursor, member_align);
                    cursor = offset + member_size;
                    offset
                }
                StructuredKind::Union => 0,
            };
            if kind == StructuredKind::Union {
                cursor = cursor.max(member_size);
            }

            member_index.insert(member_name, i);
            laid_out.push(Member { name: member_name, ty, offset, alignment: member_align });
        }

        let size = round_up(cursor.max(0), align.max(1));
        self.aggregates.insert(
            name,
            Aggregate { kind, members: laid_out, member_index, size, alignment: align.max(1) },
        );
    }

    /// Size in bytes of `ty`. Pointers, functions-by-value and incomplete
    /// structured types never reach here past type checking (`sizeof`
    /// rejects them), so an unknown structured tag is an internal bug.
    pub fn size_of(&self, ty: &Type) -> i64 {
        match ty {
            Type::Var(b) => b.size(),
            Type::Pointer(_) => 8,
            Type::Array(elem, len) => self.size_of(elem) * (*len as i64),
            Type::Func(..) => panic!("internal error: sizeof a function type"),
            Type::Structured(name) => {
                self.get(*name).unwrap_or_else(|| panic!("internal error: unknown aggregate {name}")).size
            }
        }
    }

    /// Alignment in bytes of `ty`. Arrays whose *total* size is >= 16 bytes
    /// are aligned to 16 regardless of element alignment, matching the SysV
    /// "large aggregate" convention (see the compiler's design notes on this
    /// rule); smaller arrays take their element's alignment.
    pub fn alignment_of(&self, ty: &Type) -> i64 {
        match ty {
            Type::Var(b) => b.alignment(),
            Type::Pointer(_) => 8,
            Type::Array(elem, _) => {
                let elem_align = self.alignment_of(elem);
                if self.size_of(ty) >= 16 {
                    16
                } else {
                    elem_align
                }
            }
            Type::Func(..) => panic!("internal error: alignment of a function type"),
            Type::Structured(name) => {
                self.get(*name)
                    .unwrap_or_else(|| panic!("internal error: unknown aggregate {name}"))
                    .alignment
            }
        }
    }
}

/// The common type of two arithmetic operands, per the binary-operator
/// conversion rule: double beats everything; otherwise equal-size operands
/// convert to the unsigned one if either is unsigned, and differing sizes
/// convert to whichever is wider.
pub fn common_arithmetic_type(a: &Type, b: &Type) -> Type {
    let (Some(ba), Some(bb)) = (a.as_base(), b.as_base()) else {
        panic!("internal error: common_arithmetic_type on non-scalar types");
    };
    if ba == Base::Double || bb == Base::Double {
        return Type::Var(Base::Double);
    }
    let (ba, bb) = (promote_char(ba), promote_char(bb));
    if ba == bb {
        return Type::Var(ba);
    }
    if ba.size() == bb.size() {
        let unsigned = if !ba.is_signed() { ba } else { bb };
        return Type::Var(unsigned);
    }
    Type::Var(if ba.rank() > bb.rank() { ba } else { bb })
}

/// `char` participates in arithmetic as if it were `int` (matching the
/// promotion `typecheck` inserts an explicit cast for at use sites).
fn promote_char(b: Base) -> Base {
    if b == Base::Char {
        Base::I32
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg() -> AggregateRegistry {
        AggregateRegistry::new()
    }

    #[test]
    fn struct_layout_packs_and_aligns_members() {
        let mut r = reg();
        // struct { char c; int i; char d; double x; }
        r.declare(
            id("Pt"),
            StructuredKind::Struct,
            vec![
                (id("c"), Type::Var(Base::Char)),
                (id("i"), Type::Var(Base::I32)),
                (id("d"), Type::Var(Base::Char)),
                (id("x"), Type::Var(Base::Double)),
            ],
        );
        let agg = r.get(id("Pt")).unwrap();
        assert_eq!(agg.member(id("c")).unwrap().offset, 0);
        assert_eq!(agg.member(id("i")).unwrap().offset, 4);
        assert_eq!(agg.member(id("d")).unwrap().offset, 8);
        assert_eq!(agg.member(id("x")).unwrap().offset, 16);
        assert_eq!(agg.size, 24);
        assert_eq!(agg.alignment, 8);
    }

    #[test]
    fn union_layout_shares_offset_zero() {
        let mut r = reg();
        r.declare(
            id("U"),
            StructuredKind::Union,
            vec![(id("i"), Type::Var(Base::I32)), (id("x"), Type::Var(Base::Double))],
        );
        let agg = r.get(id("U")).unwrap();
        assert_eq!(agg.member(id("i")).unwrap().offset, 0);
        assert_eq!(agg.member(id("x")).unwrap().offset, 0);
        assert_eq!(agg.size, 8);
        assert_eq!(agg.alignment, 8);
    }

    #[test]
    fn large_array_is_16_aligned() {
        let r = reg();
        let ty = Type::array(Type::Var(Base::I32), 8); // 32 bytes
        assert_eq!(r.alignment_of(&ty), 16);
        let small = Type::array(Type::Var(Base::I32), 2); // 8 bytes
        assert_eq!(r.alignment_of(&small), 4);
    }

    #[test]
    fn common_type_prefers_double_then_width_then_unsigned() {
        assert_eq!(
            common_arithmetic_type(&Type::Var(Base::I32), &Type::Var(Base::Double)),
            Type::Var(Base::Double)
        );
        assert_eq!(
            common_arithmetic_type(&Type::Var(Base::I32), &Type::Var(Base::I64)),
            Type::Var(Base::I64)
        );
        assert_eq!(
            common_arithmetic_type(&Type::Var(Base::I32), &Type::Var(Base::U32)),
            Type::Var(Base::U32)
        );
    }

    #[test]
    fn structured_type_equality_is_nominal() {
        let a = Type::Structured(id("Point"));
        let b = Type::Structured(id("Point"));
        let c = Type::Structured(id("Point.1.tmp"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
