//! Pass 3: lvalue verification.
//!
//! Type checking already rejects a non-lvalue assignment target and a
//! non-lvalue `&` operand by shape, but it does not look *inside* an
//! increment/decrement operand to notice that the operand itself is not an
//! lvalue (`(x + 1)++`), nor does it catch the specific "address of an
//! increment" and "postfix on postfix" shapes the original diagnoses by
//! name. This pass re-walks the tree once more, purely to check those
//! shapes, after type checking has already filled in every node's type.
//!
//! Grounded on `Semantics/ValidateLabels.cpp`'s sibling lvalue-shape checks
//! in the original source (folded into a dedicated pass here rather than
//! interleaved with type checking, so each pass has one job).

use crate::common::{Diagnostics, SourceOffset};
use crate::front::ast::*;

pub fn check(program: &mut Program, diags: &mut Diagnostics) {
    let mut v = LvalueChecker { diags };
    for decl in &program.decls {
        v.top_level(decl);
    }
}

struct LvalueChecker<'a> {
    diags: &'a mut Diagnostics,
}

fn is_lvalue_shape(e: &Expr) -> bool {
    matches!(e.kind, ExprKind::Var(_) | ExprKind::Deref(_) | ExprKind::Subscript(..) | ExprKind::Dot(..) | ExprKind::Arrow(..))
}

fn is_incdec(e: &Expr) -> bool {
    matches!(e.kind, ExprKind::PreInc(_) | ExprKind::PreDec(_) | ExprKind::PostInc(_) | ExprKind::PostDec(_))
}

impl<'a> LvalueChecker<'a> {
    fn err(&mut self, msg: impl Into<String>, offset: SourceOffset) {
        self.diags.push(msg, offset);
    }

    fn top_level(&mut self, decl: &Decl) {
        match decl {
            Decl::Var(v) => {
                if let Some(init) = &v.init {
                    self.initializer(init);
                }
            }
            Decl::Func(f) => {
                if let Some(body) = &f.body {
                    for item in body {
                        self.block_item(item);
                    }
                }
            }
            Decl::Structured(_) => {}
        }
    }

    fn block_item(&mut self, item: &BlockItem) {
        match item {
            BlockItem::Decl(Decl::Var(v)) => {
                if let Some(init) = &v.init {
                    self.initializer(init);
                }
            }
            BlockItem::Decl(_) => {}
            BlockItem::Stmt(s) => self.stmt(s),
        }
    }

    fn initializer(&mut self, init: &Initializer) {
        match init {
            Initializer::Single(e) => self.expr(e),
            Initializer::Compound(items) => {
                for i in items {
                    self.initializer(i);
                }
            }
            Initializer::Zero(_) | Initializer::String(_, _) => {}
        }
    }

    fn stmt(&mut self, s: &Stmt) {
        match &s.kind {
            StmtKind::Return(e) => {
                if let Some(e) = e {
                    self.expr(e);
                }
            }
            StmtKind::Expr(e) => self.expr(e),
            StmtKind::If { cond, then_branch, else_branch } => {
                self.expr(cond);
                self.stmt(then_branch);
                if let Some(e) = else_branch {
                    self.stmt(e);
                }
            }
            StmtKind::Goto(_) => {}
            StmtKind::Label(_, inner) => self.stmt(inner),
            StmtKind::Compound(items) => {
                for i in items {
                    self.block_item(i);
                }
            }
            StmtKind::Break(_) | StmtKind::Continue(_) => {}
            StmtKind::Case { stmt, .. } => self.stmt(stmt),
            StmtKind::Default { stmt, .. } => self.stmt(stmt),
            StmtKind::While { cond, body, .. } => {
                self.expr(cond);
                self.stmt(body);
            }
            StmtKind::DoWhile { body, cond, .. } => {
                self.stmt(body);
                self.expr(cond);
            }
            StmtKind::For { init, cond, post, body, .. } => {
                match init {
                    ForInit::Decl(v) => {
                        if let Some(i) = &v.init {
                            self.initializer(i);
                        }
                    }
                    ForInit::Expr(Some(e)) => self.expr(e),
                    ForInit::Expr(None) => {}
                }
                if let Some(c) = cond {
                    self.expr(c);
                }
                if let Some(p) = post {
                    self.expr(p);
                }
                self.stmt(body);
            }
            StmtKind::Switch { cond, body, .. } => {
                self.expr(cond);
                self.stmt(body);
            }
            StmtKind::Null => {}
        }
    }

    fn expr(&mut self, e: &Expr) {
        match &e.kind {
            ExprKind::ConstInt(..) | ExprKind::ConstChar(_) | ExprKind::ConstDouble(_) | ExprKind::Str(_) | ExprKind::Var(_) => {}
            ExprKind::Cast(_, inner) => self.expr(inner),
            ExprKind::Unary(_, inner) => self.expr(inner),
            ExprKind::PreInc(inner) | ExprKind::PreDec(inner) | ExprKind::PostInc(inner) | ExprKind::PostDec(inner) => {
                if !is_lvalue_shape(inner) {
                    if is_incdec(inner) {
                        self.err("increment/decrement cannot be applied to the result of another increment/decrement", e.offset);
                    } else {
                        self.err("increment/decrement requires an lvalue operand", e.offset);
                    }
                }
                self.expr(inner);
            }
            ExprKind::Binary(_, l, r) | ExprKind::Subscript(l, r) => {
                self.expr(l);
                self.expr(r);
            }
            ExprKind::Assign(_, l, r) => {
                self.expr(l);
                self.expr(r);
            }
            ExprKind::Ternary(a, b, c) => {
                self.expr(a);
                self.expr(b);
                self.expr(c);
            }
            ExprKind::Call(_, args) => {
                for a in args {
                    self.expr(a);
                }
            }
            ExprKind::Deref(inner) | ExprKind::SizeofExpr(inner) | ExprKind::Dot(inner, _) | ExprKind::Arrow(inner, _) => {
                self.expr(inner)
            }
            ExprKind::AddrOf(inner) => {
                if is_incdec(inner) {
                    self.err("cannot take the address of an increment/decrement expression", e.offset);
                } else if !is_lvalue_shape(inner) {
                    self.err("'&' requires an lvalue operand", e.offset);
                }
                self.expr(inner);
            }
            ExprKind::SizeofType(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Diagnostics;

    fn check_src(src: &str) -> Diagnostics {
        let (mut prog, errs) = crate::front::parse::parse(src);
        assert!(errs.is_empty(), "{errs:?}");
        let mut diags = Diagnostics::new();
        check(&mut prog, &mut diags);
        diags
    }

    #[test]
    fn rejects_increment_of_non_lvalue() {
        let diags = check_src("int main(void) { (1 + 2)++; return 0; }");
        assert!(!diags.is_empty());
    }

    #[test]
    fn accepts_increment_of_variable() {
        let diags = check_src("int main(void) { int x = 0; x++; return x; }");
        assert!(diags.is_empty(), "{diags:?}");
    }

    #[test]
    fn rejects_address_of_increment() {
        let diags = check_src("int main(void) { int x = 0; int *p = &(x++); return 0; }");
        assert!(!diags.is_empty());
    }
}
