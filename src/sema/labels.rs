//! Pass 4: control-flow labeling.
//!
//! Assigns every loop/switch a fresh unique label, stamps `break`/`continue`
//! with the label of the nearest enclosing target (skipping switches for
//! `continue`, not skipping them for `break`), validates and numbers
//! `case`/`default` inside the nearest enclosing `switch`, and uniquifies
//! `goto`/label-statement names by suffixing the enclosing function's name
//! exactly once (see the source's double-suffix pitfall this resolves: a
//! label is mangled once, at declaration time, and every reference reuses
//! that stored unique name rather than re-mangling).
//!
//! Grounded on `Semantics/LabelLoops.cpp` / `ValidateLabels.cpp` in the
//! original source, merged into one pass here since both walk the same
//! control-flow skeleton.

use crate::common::{id, Counter, Diagnostics, Id, Map, Set, SourceOffset};
use crate::front::ast::*;
use crate::sema::types::Base;

pub fn resolve_labels(program: &mut Program, counter: &mut Counter, diags: &mut Diagnostics) {
    for decl in &mut program.decls {
        if let Decl::Func(f) = decl {
            if let Some(body) = &mut f.body {
                let mut declared = Map::new();
                collect_labels(body, f.name, &mut declared, diags);

                let mut r = LabelResolver { diags, counter, stack: Vec::new(), switch_stack: Vec::new(), declared };
                for item in body.iter_mut() {
                    r.block_item(item);
                }
            }
        }
    }
}

/// One enclosing control-flow target: a loop provides both a break and a
/// continue target (its own label); a switch provides only a break target.
enum Frame {
    Loop(Id),
    Switch(Id),
}

/// Per-switch accumulator, pushed when entering a `switch` and popped (its
/// contents written back into the node) when its body finishes.
struct SwitchCtx {
    int_ty: Base,
    seen: Set<i64>,
    cases: Vec<(i64, Id)>,
    default: Option<Id>,
}

struct LabelResolver<'a> {
    diags: &'a mut Diagnostics,
    counter: &'a mut Counter,
    stack: Vec<Frame>,
    switch_stack: Vec<SwitchCtx>,
    /// source-spelled goto label -> its unique, function-suffixed name.
    declared: Map<Id, Id>,
}

/// Walk every `Label` statement in the function body (labels are
/// function-scoped in C, not block-scoped, so this ignores block
/// boundaries), mangling each one's name once and rejecting duplicates.
fn collect_labels(items: &mut [BlockItem], func: Id, declared: &mut Map<Id, Id>, diags: &mut Diagnostics) {
    for item in items {
        if let BlockItem::Stmt(s) = item {
            collect_labels_stmt(s, func, declared, diags);
        }
    }
}

fn collect_labels_stmt(s: &mut Stmt, func: Id, declared: &mut Map<Id, Id>, diags: &mut Diagnostics) {
    match &mut s.kind {
        StmtKind::Label(name, inner) => {
            if declared.contains_key(name) {
                diags.push(format!("redefinition of label '{name}'"), s.offset);
            } else {
                declared.insert(*name, id(format!("{name}.{func}")));
            }
            collect_labels_stmt(inner, func, declared, diags);
        }
        StmtKind::If { then_branch, else_branch, .. } => {
            collect_labels_stmt(then_branch, func, declared, diags);
            if let Some(e) = else_branch {
                collect_labels_stmt(e, func, declared, diags);
            }
        }
        StmtKind::Compound(items) => collect_labels(items, func, declared, diags),
        StmtKind::Case { stmt, .. } | StmtKind::Default { stmt, .. } => collect_labels_stmt(stmt, func, declared, diags),
        StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } | StmtKind::For { body, .. } => {
            collect_labels_stmt(body, func, declared, diags)
        }
        StmtKind::Switch { body, .. } => collect_labels_stmt(body, func, declared, diags),
        StmtKind::Return(_)
        | StmtKind::Expr(_)
        | StmtKind::Goto(_)
        | StmtKind::Break(_)
        | StmtKind::Continue(_)
        | StmtKind::Null => {}
    }
}

/// Mask a case value down to the representation width of the switch's
/// controlling integer type, so `case 256:` and `case 0:` collide under a
/// `char` switch the same way the declared type's wraparound would make
/// them collide at runtime.
fn mask_to_width(v: i64, ty: Base) -> i64 {
    match ty {
        Base::I8 | Base::U8 | Base::Char => (v as i8) as i64,
        Base::I32 | Base::U32 => (v as i32) as i64,
        _ => v,
    }
}

impl<'a> LabelResolver<'a> {
    fn err(&mut self, msg: impl Into<String>, offset: SourceOffset) {
        self.diags.push(msg, offset);
    }

    fn break_target(&self) -> Option<Id> {
        self.stack.last().map(|f| match f {
            Frame::Loop(l) | Frame::Switch(l) => *l,
        })
    }

    fn continue_target(&self) -> Option<Id> {
        self.stack.iter().rev().find_map(|f| match f {
            Frame::Loop(l) => Some(*l),
            Frame::Switch(_) => None,
        })
    }

    fn block_items(&mut self, items: &mut [BlockItem]) {
        for item in items {
            self.block_item(item);
        }
    }

    fn block_item(&mut self, item: &mut BlockItem) {
        if let BlockItem::Stmt(s) = item {
            self.stmt(s);
        }
    }

    fn stmt(&mut self, s: &mut Stmt) {
        let offset = s.offset;
        match &mut s.kind {
            StmtKind::Return(_) | StmtKind::Expr(_) | StmtKind::Null => {}
            StmtKind::If { then_branch, else_branch, .. } => {
                self.stmt(then_branch);
                if let Some(e) = else_branch {
                    self.stmt(e);
                }
            }
            StmtKind::Goto(name) => match self.declared.get(name) {
                Some(&unique) => *name = unique,
                None => self.err(format!("use of undeclared label '{name}'"), offset),
            },
            StmtKind::Label(name, inner) => {
                if let Some(&unique) = self.declared.get(name) {
                    *name = unique;
                }
                self.stmt(inner);
            }
            StmtKind::Compound(items) => self.block_items(items),
            StmtKind::Break(label) => match self.break_target() {
                Some(t) => *label = Some(t),
                None => self.err("'break' statement not in a loop or switch", offset),
            },
            StmtKind::Continue(label) => match self.continue_target() {
                Some(t) => *label = Some(t),
                None => self.err("'continue' statement not in a loop", offset),
            },
            StmtKind::Case { value, label, stmt } => {
                match self.switch_stack.last_mut() {
                    None => self.err("'case' statement not in a switch", offset),
                    Some(ctx) => match value {
                        None => self.err("case label does not reduce to an integer constant", offset),
                        Some(v) => {
                            let masked = mask_to_width(*v, ctx.int_ty);
                            if !ctx.seen.insert(masked) {
                                self.err(format!("duplicate case value '{v}'"), offset);
                            } else {
                                let switch_label = self.break_target().expect("switch frame active");
                                let case_label = id(format!("{switch_label}.{v}"));
                                *label = Some(case_label);
                                ctx.cases.push((*v, case_label));
                            }
                        }
                    },
                }
                self.stmt(stmt);
            }
            StmtKind::Default { label, stmt } => {
                match self.switch_stack.last_mut() {
                    None => self.err("'default' statement not in a switch", offset),
                    Some(ctx) if ctx.default.is_some() => {
                        self.err("multiple default labels in one switch", offset);
                    }
                    Some(ctx) => {
                        let switch_label = self.break_target().expect("switch frame active");
                        let default_label = id(format!("{switch_label}.default"));
                        *label = Some(default_label);
                        ctx.default = Some(default_label);
                    }
                }
                self.stmt(stmt);
            }
            StmtKind::While { body, label, .. } => {
                let l = self.counter.fresh("while");
                *label = Some(l);
                self.stack.push(Frame::Loop(l));
                self.stmt(body);
                self.stack.pop();
            }
            StmtKind::DoWhile { body, label, .. } => {
                let l = id(format!("do.While.{}", self.counter.next()));
                *label = Some(l);
                self.stack.push(Frame::Loop(l));
                self.stmt(body);
                self.stack.pop();
            }
            StmtKind::For { body, label, .. } => {
                let l = self.counter.fresh("for");
                *label = Some(l);
                self.stack.push(Frame::Loop(l));
                self.stmt(body);
                self.stack.pop();
            }
            StmtKind::Switch { cond, body, label, cases, default } => {
                let l = self.counter.fresh("switch");
                *label = Some(l);
                let int_ty = cond.ty.as_ref().and_then(|t| t.as_base()).unwrap_or(Base::I32);
                self.switch_stack.push(SwitchCtx { int_ty, seen: Set::new(), cases: Vec::new(), default: None });
                self.stack.push(Frame::Switch(l));
                self.stmt(body);
                self.stack.pop();
                let ctx = self.switch_stack.pop().unwrap();
                *cases = ctx.cases;
                *default = ctx.default;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Counter, Diagnostics};
    use crate::sema::{resolve, typecheck, types::AggregateRegistry};
    use crate::sema::symtab::SymbolTable;

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
        resolve_labels(&mut prog, &mut counter, &mut diags);
        (prog, diags)
    }

    #[test]
    fn break_targets_nearest_loop_or_switch() {
        let (_, diags) = run("int main(void) { while (1) { break; } return 0; }");
        assert!(diags.is_empty(), "{diags:?}");
    }

    #[test]
    fn rejects_break_outside_loop_or_switch() {
        let (_, diags) = run("int main(void) { break; return 0; }");
        assert!(!diags.is_empty());
    }

    #[test]
    fn rejects_duplicate_case_values() {
        let (_, diags) = run("int main(void) { switch (1) { case 1: ; case 1: ; } return 0; }");
        assert!(!diags.is_empty());
    }

    #[test]
    fn rejects_goto_to_undeclared_label() {
        let (_, diags) = run("int main(void) { goto nope; return 0; }");
        assert!(!diags.is_empty());
    }

    #[test]
    fn continue_skips_enclosing_switch_to_find_loop() {
        let (_, diags) =
            run("int main(void) { while (1) { switch (1) { case 1: continue; } } return 0; }");
        assert!(diags.is_empty(), "{diags:?}");
    }
}
