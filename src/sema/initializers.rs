//! Pass 6: array/aggregate initializer normalization.
//!
//! A compound initializer as written by the programmer is a tree shaped like
//! the declared type (nested braces mirroring nested arrays/structs). IR
//! generation and static-data emission don't want that tree: they want one
//! flat, byte-ordered sequence of `Single(scalar expr)` and `Zero(n)` slots
//! they can walk left to right while advancing a byte cursor. This pass does
//! that flattening once, here, so every later stage can assume it.
//!
//! Grounded on `Initializers/Zeropad.cpp`'s zero-fill bookkeeping and
//! `Initializers/StringInit.cpp`'s string-to-char-array handling in the
//! original source.

use crate::common::{Diagnostics, SourceOffset};
use crate::front::ast::*;
use crate::sema::symtab::SymbolTable;
use crate::sema::typecheck::typename_to_type;
use crate::sema::types::{AggregateRegistry, Base, StructuredKind, Type};

pub fn normalize(program: &mut Program, _symbols: &SymbolTable, aggregates: &AggregateRegistry, diags: &mut Diagnostics) {
    for decl in &mut program.decls {
        match decl {
            Decl::Var(v) => normalize_var(v, aggregates, diags),
            Decl::Func(f) => {
                if let Some(body) = &mut f.body {
                    for item in body {
                        block_item(item, aggregates, diags);
                    }
                }
            }
            Decl::Structured(_) => {}
        }
    }
}

fn normalize_var(v: &mut VarDecl, aggregates: &AggregateRegistry, diags: &mut Diagnostics) {
    let Some(init) = &mut v.init else { return };
    let ty = typename_to_type(&v.ty);
    normalize_init(&ty, init, aggregates, v.offset, diags);
}

fn block_item(item: &mut BlockItem, aggregates: &AggregateRegistry, diags: &mut Diagnostics) {
    match item {
        BlockItem::Decl(Decl::Var(v)) => normalize_var(v, aggregates, diags),
        BlockItem::Decl(_) => {}
        BlockItem::Stmt(s) => stmt(s, aggregates, diags),
    }
}

fn stmt(s: &mut Stmt, aggregates: &AggregateRegistry, diags: &mut Diagnostics) {
    match &mut s.kind {
        StmtKind::If { then_branch, else_branch, .. } => {
            stmt(then_branch, aggregates, diags);
            if let Some(e) = else_branch {
                stmt(e, aggregates, diags);
            }
        }
        StmtKind::Label(_, inner) => stmt(inner, aggregates, diags),
        StmtKind::Compound(items) => {
            for i in items {
                block_item(i, aggregates, diags);
            }
        }
        StmtKind::Case { stmt: inner, .. } | StmtKind::Default { stmt: inner, .. } => stmt(inner, aggregates, diags),
        StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } => stmt(body, aggregates, diags),
        StmtKind::For { init, body, .. } => {
            if let ForInit::Decl(v) = init {
                normalize_var(v, aggregates, diags);
            }
            stmt(body, aggregates, diags);
        }
        StmtKind::Switch { body, .. } => stmt(body, aggregates, diags),
        StmtKind::Return(_)
        | StmtKind::Expr(_)
        | StmtKind::Goto(_)
        | StmtKind::Break(_)
        | StmtKind::Continue(_)
        | StmtKind::Null => {}
    }
}

fn is_null_pointer_constant(e: &Expr) -> bool {
    matches!(&e.kind, ExprKind::ConstInt(0, _))
}

fn is_char_sized(ty: &Type) -> bool {
    matches!(ty.as_base(), Some(Base::Char) | Some(Base::I8) | Some(Base::U8))
}

/// Rewrite `init` in place to its flattened form for `ty`: `Compound` of
/// `Single`/`Zero`/`String` leaves for arrays and structured types, an
/// untouched `Single` for ordinary scalars, and a canonicalized U64 zero
/// constant for a null-pointer scalar initializer.
fn normalize_init(ty: &Type, init: &mut Initializer, aggregates: &AggregateRegistry, offset: SourceOffset, diags: &mut Diagnostics) {
    match ty {
        Type::Array(elem, len) => {
            let flat = flatten_array(elem, *len, aggregates, init, offset, diags);
            *init = Initializer::Compound(flat);
        }
        Type::Structured(tag) => {
            let flat = flatten_struct(*tag, aggregates, init, offset, diags);
            *init = Initializer::Compound(flat);
        }
        Type::Pointer(_) => {
            if let Initializer::Single(e) = init {
                if is_null_pointer_constant(e) {
                    e.kind = ExprKind::ConstInt(0, IntSuffix::UL);
                    e.ty = Some(Type::Var(Base::U64));
                }
            }
        }
        _ => {}
    }
}

/// Push `item`'s flattened content onto `out`: an aggregate leaf that was
/// just normalized into `Compound(flat)` contributes its flat slots directly
/// (no nested `Compound` survives this pass); anything else is one slot.
fn splice(out: &mut Vec<Initializer>, item: Initializer) {
    match item {
        Initializer::Compound(items) => out.extend(items),
        other => out.push(other),
    }
}

fn string_literal_fill(bytes: &[u8], len: usize, offset: SourceOffset, diags: &mut Diagnostics) -> Vec<Initializer> {
    if bytes.len() > len {
        diags.push("initializer string is too long for the declared array", offset);
    }
    if bytes.len() >= len {
        return vec![Initializer::String(bytes[..len].to_vec(), false)];
    }
    let mut out = vec![Initializer::String(bytes.to_vec(), true)];
    let remaining = len - bytes.len() - 1;
    if remaining > 0 {
        out.push(Initializer::Zero(remaining));
    }
    out
}

fn flatten_array(
    elem: &Type,
    len: usize,
    aggregates: &AggregateRegistry,
    init: &mut Initializer,
    offset: SourceOffset,
    diags: &mut Diagnostics,
) -> Vec<Initializer> {
    let elem_size = aggregates.size_of(elem) as usize;
    match init {
        Initializer::Single(e) if is_char_sized(elem) && matches!(e.kind, ExprKind::Str(_)) => {
            let ExprKind::Str(bytes) = &e.kind else { unreachable!() };
            string_literal_fill(bytes, len, offset, diags)
        }
        Initializer::String(bytes, _) => string_literal_fill(bytes, len, offset, diags),
        Initializer::Compound(items) => {
            let mut out = Vec::new();
            let n = items.len().min(len);
            for item in items.iter_mut().take(n) {
                normalize_init(elem, item, aggregates, offset, diags);
                splice(&mut out, std::mem::replace(item, Initializer::Zero(0)));
            }
            if items.len() > len {
                diags.push("too many elements in array initializer", offset);
            }
            if len > n {
                out.push(Initializer::Zero((len - n) * elem_size));
            }
            out
        }
        Initializer::Single(_) => {
            diags.push("array initializer must be brace-enclosed or a string literal", offset);
            vec![Initializer::Zero(len * elem_size)]
        }
        Initializer::Zero(_) => vec![Initializer::Zero(len * elem_size)],
    }
}

fn flatten_struct(
    tag: crate::common::Id,
    aggregates: &AggregateRegistry,
    init: &mut Initializer,
    offset: SourceOffset,
    diags: &mut Diagnostics,
) -> Vec<Initializer> {
    let agg = aggregates.get(tag).expect("internal error: unknown aggregate in initializer");
    match init {
        Initializer::Compound(items) => {
            let cap = match agg.kind {
                StructuredKind::Union => 1,
                StructuredKind::Struct => agg.members.len(),
            };
            let n = items.len().min(cap);
            let mut out = Vec::new();
            let mut cursor: i64 = 0;
            for (i, item) in items.iter_mut().take(n).enumerate() {
                let member = &agg.members[i];
                if member.offset > cursor {
                    out.push(Initializer::Zero((member.offset - cursor) as usize));
                }
                normalize_init(&member.ty, item, aggregates, offset, diags);
                splice(&mut out, std::mem::replace(item, Initializer::Zero(0)));
                cursor = member.offset + aggregates.size_of(&member.ty);
            }
            if items.len() > cap {
                diags.push("too many initializers for structured type", offset);
            }
            if cursor < agg.size {
                out.push(Initializer::Zero((agg.size - cursor) as usize));
            }
            out
        }
        Initializer::Zero(_) => vec![Initializer::Zero(agg.size as usize)],
        Initializer::Single(_) | Initializer::String(_, _) => {
            diags.push("structured type requires a brace-enclosed initializer", offset);
            vec![Initializer::Zero(agg.size as usize)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Counter;
    use crate::sema::{resolve, typecheck};

    fn run(src: &str) -> (Program, Diagnostics) {
        let (mut prog, errs) = crate::front::parse::parse(src);
        assert!(errs.is_empty(), "{errs:?}");
        let mut symbols = SymbolTable::new();
        let mut aggregates = AggregateRegistry::new();
        let mut counter = Counter::new();
        let mut diags = Diagnostics::new();
        resolve::resolve(&mut prog, &mut symbols, &mut aggregates, &mut counter, &mut diags);
        assert!(diags.is_empty(), "resolve: {diags:?}");
        typecheck::typecheck(&mut prog, &mut symbols, &aggregates, &mut diags);
        assert!(diags.is_empty(), "typecheck: {diags:?}");
        normalize(&mut prog, &symbols, &aggregates, &mut diags);
        (prog, diags)
    }

    fn first_local_init(prog: &Program) -> Initializer {
        let Decl::Func(f) = &prog.decls[0] else { panic!() };
        let BlockItem::Decl(Decl::Var(v)) = &f.body.as_ref().unwrap()[0] else { panic!() };
        v.init.clone().unwrap()
    }

    #[test]
    fn flattens_partial_array_initializer_with_trailing_zero() {
        let (prog, diags) = run("int main(void) { int a[4] = {1, 2}; return 0; }");
        assert!(diags.is_empty(), "{diags:?}");
        let Initializer::Compound(items) = first_local_init(&prog) else { panic!() };
        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], Initializer::Single(_)));
        assert!(matches!(items[1], Initializer::Single(_)));
        assert!(matches!(&items[2], Initializer::Zero(n) if *n == 8));
    }

    #[test]
    fn string_shorter_than_array_gets_terminator_and_padding() {
        let (prog, diags) = run("int main(void) { char s[5] = \"hi\"; return 0; }");
        assert!(diags.is_empty(), "{diags:?}");
        let Initializer::Compound(items) = first_local_init(&prog) else { panic!() };
        assert!(matches!(&items[0], Initializer::String(b, true) if b == b"hi"));
        assert!(matches!(&items[1], Initializer::Zero(2)));
    }

    #[test]
    fn string_exactly_filling_array_has_no_terminator() {
        let (prog, diags) = run("int main(void) { char s[2] = \"hi\"; return 0; }");
        assert!(diags.is_empty(), "{diags:?}");
        let Initializer::Compound(items) = first_local_init(&prog) else { panic!() };
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Initializer::String(b, false) if b == b"hi"));
    }

    #[test]
    fn null_pointer_initializer_becomes_u64_zero() {
        let (prog, diags) = run("int main(void) { int *p = 0; return 0; }");
        assert!(diags.is_empty(), "{diags:?}");
        let Initializer::Single(e) = first_local_init(&prog) else { panic!() };
        assert_eq!(e.ty, Some(Type::Var(Base::U64)));
        assert!(matches!(e.kind, ExprKind::ConstInt(0, IntSuffix::UL)));
    }
}
