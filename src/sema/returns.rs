//! Pass 5: return validation.
//!
//! Type checking computes the type of a `return`'s operand but, deliberately,
//! neither checks it against the function's declared return type nor fills
//! in a bare `return;` inside a non-void function — both are this pass's job,
//! since both need nothing except the fully-typed tree type checking leaves
//! behind. It also appends a synthetic `return 0;` to the end of an
//! integer-returning function whose body doesn't already end in one, which
//! is what lets `int main(void) { }` compile and return `0` the way `main`
//! is specially allowed to.
//!
//! Grounded on `Semantics/Typecheck.cpp`'s end-of-function handling in the
//! original source.

use crate::common::{Diagnostics, SourceOffset};
use crate::front::ast::*;
use crate::sema::symtab::SymbolTable;
use crate::sema::types::{Base, Type};

pub fn validate_returns(program: &mut Program, symbols: &SymbolTable, diags: &mut Diagnostics) {
    for decl in &mut program.decls {
        if let Decl::Func(f) = decl {
            let ret = return_type_of(f, symbols);
            if let Some(body) = &mut f.body {
                for item in body.iter_mut() {
                    walk_block_item(item, &ret, diags);
                }
                if ret.is_integer() && !ends_in_return(body) {
                    body.push(BlockItem::Stmt(Stmt::new(StmtKind::Return(Some(zero_expr(&ret, f.offset))), f.offset)));
                }
            }
        }
    }
}

fn return_type_of(f: &FuncDecl, symbols: &SymbolTable) -> Type {
    match symbols.entry(f.name).map(|e| &e.ty) {
        Some(Type::Func(ret, _)) => (**ret).clone(),
        _ => Type::Var(Base::Void),
    }
}

fn ends_in_return(body: &[BlockItem]) -> bool {
    matches!(body.last(), Some(BlockItem::Stmt(s)) if matches!(s.kind, StmtKind::Return(_)))
}

fn is_null_pointer_constant(e: &Expr) -> bool {
    matches!(&e.kind, ExprKind::ConstInt(0, _))
}

/// Same compatibility rule [`crate::sema::typecheck`] applies to a simple
/// assignment's right-hand side, since `return e;` is assignment of `e` into
/// an implicit variable of the declared return type.
fn returnable(ret: &Type, actual: &Expr) -> bool {
    let at = actual.ty();
    (ret.is_arithmetic() && at.is_arithmetic())
        || (ret.is_pointer() && is_null_pointer_constant(actual))
        || (ret.is_pointer() && at.is_pointer() && (ret == at || ret.is_void_pointer() || at.is_void_pointer()))
        || (ret.is_structured() && ret == at)
}

fn zero_expr(ty: &Type, offset: SourceOffset) -> Expr {
    let mut e = match ty.as_base() {
        Some(Base::Double) => Expr::new(ExprKind::ConstDouble(0.0), offset),
        Some(b) => {
            let suffix = match b {
                Base::U8 | Base::U32 => IntSuffix::U,
                Base::I64 => IntSuffix::L,
                Base::U64 => IntSuffix::UL,
                _ => IntSuffix::None,
            };
            Expr::new(ExprKind::ConstInt(0, suffix), offset)
        }
        None => Expr::new(ExprKind::ConstInt(0, IntSuffix::None), offset),
    };
    e.ty = Some(ty.clone());
    e
}

fn walk_block_item(item: &mut BlockItem, ret: &Type, diags: &mut Diagnostics) {
    if let BlockItem::Stmt(s) = item {
        walk_stmt(s, ret, diags);
    }
}

fn walk_stmt(s: &mut Stmt, ret: &Type, diags: &mut Diagnostics) {
    let offset = s.offset;
    match &mut s.kind {
        StmtKind::Return(e) => {
            if ret.is_void() {
                return;
            }
            match e {
                Some(expr) => {
                    if !returnable(ret, expr) {
                        diags.push("incompatible type for return value", offset);
                    }
                }
                None => *e = Some(zero_expr(ret, offset)),
            }
        }
        StmtKind::Expr(_) | StmtKind::Goto(_) | StmtKind::Break(_) | StmtKind::Continue(_) | StmtKind::Null => {}
        StmtKind::If { then_branch, else_branch, .. } => {
            walk_stmt(then_branch, ret, diags);
            if let Some(e) = else_branch {
                walk_stmt(e, ret, diags);
            }
        }
        StmtKind::Label(_, inner) => walk_stmt(inner, ret, diags),
        StmtKind::Compound(items) => {
            for i in items {
                walk_block_item(i, ret, diags);
            }
        }
        StmtKind::Case { stmt, .. } | StmtKind::Default { stmt, .. } => walk_stmt(stmt, ret, diags),
        StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } | StmtKind::For { body, .. } => {
            walk_stmt(body, ret, diags)
        }
        StmtKind::Switch { body, .. } => walk_stmt(body, ret, diags),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Counter;
    use crate::sema::types::AggregateRegistry;
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
        validate_returns(&mut prog, &symbols, &mut diags);
        (prog, diags)
    }

    #[test]
    fn appends_return_zero_for_int_main_without_one() {
        let (prog, diags) = run("int main(void) { int x = 1; }");
        assert!(diags.is_empty(), "{diags:?}");
        let Decl::Func(f) = &prog.decls[0] else { panic!() };
        let body = f.body.as_ref().unwrap();
        assert!(matches!(body.last(), Some(BlockItem::Stmt(s)) if matches!(s.kind, StmtKind::Return(Some(_)))));
    }

    #[test]
    fn does_not_duplicate_an_existing_trailing_return() {
        let (prog, diags) = run("int main(void) { return 5; }");
        assert!(diags.is_empty(), "{diags:?}");
        let Decl::Func(f) = &prog.decls[0] else { panic!() };
        let body = f.body.as_ref().unwrap();
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn fills_bare_return_with_zero_in_non_void_function() {
        let (prog, diags) = run("int f(void) { return; }");
        assert!(diags.is_empty(), "{diags:?}");
        let Decl::Func(f) = &prog.decls[0] else { panic!() };
        let BlockItem::Stmt(s) = &f.body.as_ref().unwrap()[0] else { panic!() };
        assert!(matches!(s.kind, StmtKind::Return(Some(_))));
    }

    #[test]
    fn rejects_returning_pointer_from_int_function() {
        let (_, diags) = run("int f(void) { int x = 0; int *p = &x; return p; }");
        assert!(!diags.is_empty());
    }
}
