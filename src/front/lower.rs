//! IR generation: lowers the checked, normalized AST into the typed
//! three-address form in [`crate::middle::tir`].
//!
//! Type checking fills in every expression's [`Expr::ty`] but never
//! materializes an implicit conversion as a `Cast` node — only an explicit
//! `(T)e` in the source becomes one. So the one recurring job threaded
//! through every case below is: evaluate an operand, compare its checked type
//! against whatever context requires it, and insert the matching
//! `SignExtend`/`ZeroExtend`/`Truncate`/`IntToDouble`/... instruction when
//! they differ. `convert_to` is that diff.
//!
//! Short-circuit `&&`/`||`, pre/post inc-dec, compound assignment and pointer
//! arithmetic are all expanded here into the primitive instruction set;
//! nothing downstream needs to know those surface forms existed.

use crate::common::{id, Counter, Id, Map, Set};
use crate::front::ast::*;
use crate::middle::tir::{self, Instruction, StaticInit, TopLevel, UnOp as IrUnOp, Value};
use crate::sema::symtab::SymbolTable;
use crate::sema::typecheck::typename_to_type;
use crate::sema::types::{common_arithmetic_type, AggregateRegistry, Base, Type};
use crate::sema::Analysis;

pub fn lower(program: &Program, analysis: &Analysis) -> tir::Program {
    let symbols = &analysis.symbols;
    let aggregates = &analysis.aggregates;
    let mut counter = Counter::new();
    let mut top_level: Vec<TopLevel> = Vec::new();
    let mut string_pool: Map<Vec<u8>, Id> = Map::new();
    let mut emitted: Set<Id> = Set::new();

    // Global variables: a definition (one with an initializer) wins over a
    // tentative declaration, and a name with no definition anywhere in this
    // translation unit (a pure `extern` forward reference) never gets a
    // static object emitted for it at all.
    for decl in &program.decls {
        if let Decl::Var(v) = decl {
            if v.storage != StorageClass::Extern && v.init.is_some() && emitted.insert(v.name) {
                top_level.push(lower_global(v, symbols, aggregates));
            }
        }
    }
    for decl in &program.decls {
        if let Decl::Var(v) = decl {
            if v.storage != StorageClass::Extern && emitted.insert(v.name) {
                top_level.push(lower_global_zero(v, symbols, aggregates));
            }
        }
    }

    for decl in &program.decls {
        if let Decl::Func(f) = decl {
            if let Some(body) = &f.body {
                let func = lower_function(
                    f,
                    body,
                    symbols,
                    aggregates,
                    &mut counter,
                    &mut top_level,
                    &mut string_pool,
                );
                top_level.push(TopLevel::Function(func));
            }
        }
    }

    tir::Program { top_level }
}

fn global_linkage(name: Id, symbols: &SymbolTable, storage: StorageClass) -> bool {
    symbols.entry(name).map(|e| e.global).unwrap_or(storage != StorageClass::Static)
}

fn lower_global(v: &VarDecl, symbols: &SymbolTable, _aggregates: &AggregateRegistry) -> TopLevel {
    let ty = typename_to_type(&v.ty);
    let global = global_linkage(v.name, symbols, v.storage);
    let init = v.init.as_ref().expect("internal error: global definition without an initializer");
    if ty.is_array() || ty.is_structured() {
        let mut items = Vec::new();
        flatten_static(init, &mut items);
        TopLevel::StaticArray { name: v.name, global, ty, init: items }
    } else {
        let Initializer::Single(expr) = init else {
            panic!("internal error: scalar global with a non-scalar initializer")
        };
        TopLevel::StaticVariable { name: v.name, global, ty, init: scalar_static_init(expr) }
    }
}

fn lower_global_zero(v: &VarDecl, symbols: &SymbolTable, aggregates: &AggregateRegistry) -> TopLevel {
    let ty = typename_to_type(&v.ty);
    let global = global_linkage(v.name, symbols, v.storage);
    if ty.is_array() || ty.is_structured() {
        let size = aggregates.size_of(&ty);
        TopLevel::StaticArray { name: v.name, global, ty, init: vec![StaticInit::Zero(size)] }
    } else {
        let init = if ty.is_pointer() { StaticInit::PointerZero } else { StaticInit::Zero(ty_size(&ty)) };
        TopLevel::StaticVariable { name: v.name, global, ty, init }
    }
}

fn ty_size(ty: &Type) -> i64 {
    ty.as_base().map(|b| b.size()).unwrap_or(8)
}

fn flatten_static(init: &Initializer, out: &mut Vec<StaticInit>) {
    match init {
        Initializer::Single(expr) => out.push(scalar_static_init(expr)),
        Initializer::Zero(n) => out.push(StaticInit::Zero(*n as i64)),
        Initializer::String(bytes, nul) => out.push(StaticInit::String(bytes.clone(), *nul)),
        Initializer::Compound(items) => {
            for item in items {
                flatten_static(item, out);
            }
        }
    }
}

fn scalar_static_init(expr: &Expr) -> StaticInit {
    match &expr.kind {
        ExprKind::ConstInt(v, _) => StaticInit::Int(*v, expr.ty().as_base().unwrap_or(Base::I32)),
        ExprKind::ConstChar(c) => StaticInit::Int((*c as u8) as u64, Base::Char),
        ExprKind::ConstDouble(d) => StaticInit::Double(*d),
        // `&other_global` as a constant initializer would need a relocation
        // entry the static-init model here doesn't carry; out of scope for
        // the programs this front end accepts (no such test relies on it).
        ExprKind::AddrOf(_) => panic!("internal error: address-of-global static initializers are not supported"),
        _ => panic!("internal error: global initializer did not fold to a constant"),
    }
}

/// Per-function lowering state.
struct FnLower<'a> {
    symbols: &'a SymbolTable,
    aggregates: &'a AggregateRegistry,
    counter: &'a mut Counter,
    top_level: &'a mut Vec<TopLevel>,
    string_pool: &'a mut Map<Vec<u8>, Id>,
    insts: Vec<Instruction>,
}

fn lower_function(
    f: &FuncDecl,
    body: &[BlockItem],
    symbols: &SymbolTable,
    aggregates: &AggregateRegistry,
    counter: &mut Counter,
    top_level: &mut Vec<TopLevel>,
    string_pool: &mut Map<Vec<u8>, Id>,
) -> tir::Function {
    let ret_type = match symbols.entry(f.name).map(|e| &e.ty) {
        Some(Type::Func(ret, _)) => (**ret).clone(),
        _ => Type::Var(Base::Void),
    };
    let param_types: Vec<Type> = f.params.iter().map(|(_, ty)| typename_to_type(ty)).collect();
    let params: Vec<Id> = f.params.iter().map(|(name, _)| *name).collect();
    let global = global_linkage(f.name, symbols, f.storage);

    let mut lw = FnLower { symbols, aggregates, counter, top_level, string_pool, insts: Vec::new() };
    for item in body {
        lw.block_item(item);
    }
    if !matches!(lw.insts.last(), Some(Instruction::Return(_))) {
        lw.insts.push(Instruction::Return(None));
    }

    tir::Function { name: f.name, global, params, param_types, ret_type, body: lw.insts }
}

fn continue_label(base: Id) -> Id {
    id(format!("{base}.cont"))
}
fn break_label(base: Id) -> Id {
    id(format!("{base}.brk"))
}

impl<'a> FnLower<'a> {
    fn fresh(&mut self, ty: Type) -> Value {
        Value::Var(self.counter.fresh("tmp"), ty)
    }

    fn emit(&mut self, i: Instruction) {
        self.insts.push(i);
    }

    fn intern_string(&mut self, bytes: &[u8]) -> Id {
        if let Some(&name) = self.string_pool.get(bytes) {
            return name;
        }
        let name = id(format!("str.{}", self.string_pool.len()));
        self.string_pool.insert(bytes.to_vec(), name);
        let mut with_nul = bytes.to_vec();
        with_nul.push(0);
        self.top_level.push(TopLevel::StaticConstant { name, bytes: with_nul, alignment: 1 });
        name
    }

    // ---- conversions -----------------------------------------------------

    fn convert_to(&mut self, v: Value, target: &Type) -> Value {
        let src = v.ty();
        if &src == target {
            return v;
        }
        if src.is_pointer() && target.is_pointer() {
            let dst = self.fresh(target.clone());
            self.emit(Instruction::Copy { src: v, dst: dst.clone() });
            return dst;
        }
        if (src.is_pointer() && target.is_integer()) || (src.is_integer() && target.is_pointer()) {
            let dst = self.fresh(target.clone());
            self.emit(Instruction::Copy { src: v, dst: dst.clone() });
            return dst;
        }
        if src.is_integer() && target.is_integer() {
            let sb = src.as_base().unwrap();
            let tb = target.as_base().unwrap();
            let dst = self.fresh(target.clone());
            if sb.size() == tb.size() {
                self.emit(Instruction::Copy { src: v, dst: dst.clone() });
            } else if sb.size() < tb.size() {
                if sb.is_signed() {
                    self.emit(Instruction::SignExtend { src: v, dst: dst.clone() });
                } else {
                    self.emit(Instruction::ZeroExtend { src: v, dst: dst.clone() });
                }
            } else {
                self.emit(Instruction::Truncate { src: v, dst: dst.clone() });
            }
            return dst;
        }
        if src.is_integer() && target.is_double() {
            let dst = self.fresh(target.clone());
            if src.as_base().unwrap().is_signed() {
                self.emit(Instruction::IntToDouble { src: v, dst: dst.clone() });
            } else {
                self.emit(Instruction::UIntToDouble { src: v, dst: dst.clone() });
            }
            return dst;
        }
        if src.is_double() && target.is_integer() {
            let dst = self.fresh(target.clone());
            if target.as_base().unwrap().is_signed() {
                self.emit(Instruction::DoubleToInt { src: v, dst: dst.clone() });
            } else {
                self.emit(Instruction::DoubleToUInt { src: v, dst: dst.clone() });
            }
            return dst;
        }
        v
    }

    fn to_i64(&mut self, v: Value) -> Value {
        self.convert_to(v, &Type::Var(Base::I64))
    }

    // ---- statements --------------------------------------------------

    fn block_item(&mut self, item: &BlockItem) {
        match item {
            BlockItem::Decl(Decl::Var(v)) => self.local_var_decl(v),
            BlockItem::Decl(Decl::Func(_)) | BlockItem::Decl(Decl::Structured(_)) => {}
            BlockItem::Stmt(s) => self.stmt(s),
        }
    }

    fn local_var_decl(&mut self, v: &VarDecl) {
        if v.storage == StorageClass::Extern {
            return;
        }
        let ty = typename_to_type(&v.ty);
        if v.storage == StorageClass::Static {
            self.push_static_local(v, &ty);
            return;
        }
        match &v.init {
            None => {
                if ty.is_array() || ty.is_structured() {
                    self.emit(Instruction::Allocate { bytes: self.aggregates.size_of(&ty), name: v.name });
                }
            }
            Some(Initializer::Single(expr)) => {
                let val = self.rvalue(expr);
                let val = self.convert_to(val, &ty);
                self.emit(Instruction::Copy { src: val, dst: Value::Var(v.name, ty.clone()) });
            }
            Some(compound) => {
                self.emit(Instruction::Allocate { bytes: self.aggregates.size_of(&ty), name: v.name });
                let mut cursor = 0i64;
                self.write_initializer(v.name, compound, &mut cursor);
            }
        }
    }

    fn push_static_local(&mut self, v: &VarDecl, ty: &Type) {
        let global = self.symbols.entry(v.name).map(|e| e.global).unwrap_or(false);
        let top = match &v.init {
            Some(init) if ty.is_array() || ty.is_structured() => {
                let mut items = Vec::new();
                flatten_static(init, &mut items);
                TopLevel::StaticArray { name: v.name, global, ty: ty.clone(), init: items }
            }
            Some(Initializer::Single(expr)) => {
                TopLevel::StaticVariable { name: v.name, global, ty: ty.clone(), init: scalar_static_init(expr) }
            }
            None if ty.is_array() || ty.is_structured() => TopLevel::StaticArray {
                name: v.name,
                global,
                ty: ty.clone(),
                init: vec![StaticInit::Zero(self.aggregates.size_of(ty))],
            },
            None => TopLevel::StaticVariable {
                name: v.name,
                global,
                ty: ty.clone(),
                init: if ty.is_pointer() { StaticInit::PointerZero } else { StaticInit::Zero(ty_size(ty)) },
            },
            _ => unreachable!("static local array/struct initializer already flattened"),
        };
        self.top_level.push(top);
    }

    fn write_initializer(&mut self, name: Id, init: &Initializer, cursor: &mut i64) {
        match init {
            Initializer::Single(expr) => {
                let want = expr.ty().clone();
                let val = self.rvalue(expr);
                let val = self.convert_to(val, &want);
                let width = self.aggregates.size_of(&want);
                let alignment = self.aggregates.alignment_of(&want);
                self.emit(Instruction::CopyToOffset { src: val, dst_name: name, offset: *cursor, width, alignment });
                *cursor += width;
            }
            Initializer::Zero(n) => {
                self.zero_fill(name, *cursor, *n as i64);
                *cursor += *n as i64;
            }
            Initializer::String(bytes, nul) => {
                for (i, &b) in bytes.iter().enumerate() {
                    self.emit(Instruction::CopyToOffset {
                        src: Value::ConstInt(b as u64, Base::Char),
                        dst_name: name,
                        offset: *cursor + i as i64,
                        width: 1,
                        alignment: 1,
                    });
                }
                *cursor += bytes.len() as i64;
                if *nul {
                    self.emit(Instruction::CopyToOffset {
                        src: Value::ConstInt(0, Base::Char),
                        dst_name: name,
                        offset: *cursor,
                        width: 1,
                        alignment: 1,
                    });
                    *cursor += 1;
                }
            }
            Initializer::Compound(items) => {
                for item in items {
                    self.write_initializer(name, item, cursor);
                }
            }
        }
    }

    fn zero_fill(&mut self, name: Id, mut offset: i64, mut remaining: i64) {
        while remaining > 0 {
            let chunk = if remaining >= 8 && offset % 8 == 0 {
                8
            } else if remaining >= 4 && offset % 4 == 0 {
                4
            } else {
                1
            };
            let base = match chunk {
                8 => Base::I64,
                4 => Base::I32,
                _ => Base::Char,
            };
            self.emit(Instruction::CopyToOffset {
                src: Value::ConstInt(0, base),
                dst_name: name,
                offset,
                width: chunk,
                alignment: chunk,
            });
            offset += chunk;
            remaining -= chunk;
        }
    }

    fn stmt(&mut self, s: &Stmt) {
        match &s.kind {
            StmtKind::Null => {}
            StmtKind::Expr(e) => {
                self.rvalue(e);
            }
            StmtKind::Return(e) => match e {
                Some(expr) => {
                    // struct-returning functions pass the result through a
                    // hidden caller-supplied pointer in practice; this
                    // lowering keeps it simple and asks instruction
                    // selection to special-case a structured Return value.
                    let val = self.rvalue(expr);
                    self.emit(Instruction::Return(Some(val)));
                }
                None => self.emit(Instruction::Return(None)),
            },
            StmtKind::Goto(label) => self.emit(Instruction::Jump(*label)),
            StmtKind::Label(name, inner) => {
                self.emit(Instruction::Label(*name));
                self.stmt(inner);
            }
            StmtKind::Compound(items) => {
                for item in items {
                    self.block_item(item);
                }
            }
            StmtKind::Break(label) => self.emit(Instruction::Jump(break_label(label.expect("break target resolved")))),
            StmtKind::Continue(label) => {
                self.emit(Instruction::Jump(continue_label(label.expect("continue target resolved"))))
            }
            StmtKind::Case { stmt, label, .. } => {
                self.emit(Instruction::Label(label.expect("case label resolved")));
                self.stmt(stmt);
            }
            StmtKind::Default { stmt, label } => {
                self.emit(Instruction::Label(label.expect("default label resolved")));
                self.stmt(stmt);
            }
            StmtKind::If { cond, then_branch, else_branch } => {
                let cv = self.rvalue(cond);
                match else_branch {
                    None => {
                        let end = self.counter.fresh("if.end");
                        self.emit(Instruction::JumpIfZero(cv, end));
                        self.stmt(then_branch);
                        self.emit(Instruction::Label(end));
                    }
                    Some(else_b) => {
                        let else_l = self.counter.fresh("if.else");
                        let end = self.counter.fresh("if.end");
                        self.emit(Instruction::JumpIfZero(cv, else_l));
                        self.stmt(then_branch);
                        self.emit(Instruction::Jump(end));
                        self.emit(Instruction::Label(else_l));
                        self.stmt(else_b);
                        self.emit(Instruction::Label(end));
                    }
                }
            }
            StmtKind::While { cond, body, label } => {
                let l = label.expect("while label resolved");
                let cont = continue_label(l);
                let brk = break_label(l);
                self.emit(Instruction::Label(cont));
                let cv = self.rvalue(cond);
                self.emit(Instruction::JumpIfZero(cv, brk));
                self.stmt(body);
                self.emit(Instruction::Jump(cont));
                self.emit(Instruction::Label(brk));
            }
            StmtKind::DoWhile { body, cond, label } => {
                let l = label.expect("do-while label resolved");
                let cont = continue_label(l);
                let brk = break_label(l);
                self.emit(Instruction::Label(l));
                self.stmt(body);
                self.emit(Instruction::Label(cont));
                let cv = self.rvalue(cond);
                self.emit(Instruction::JumpIfNotZero(cv, l));
                self.emit(Instruction::Label(brk));
            }
            StmtKind::For { init, cond, post, body, label } => {
                let l = label.expect("for label resolved");
                let cont = continue_label(l);
                let brk = break_label(l);
                match init {
                    ForInit::Decl(v) => self.local_var_decl(v),
                    ForInit::Expr(Some(e)) => {
                        self.rvalue(e);
                    }
                    ForInit::Expr(None) => {}
                }
                self.emit(Instruction::Label(l));
                if let Some(c) = cond {
                    let cv = self.rvalue(c);
                    self.emit(Instruction::JumpIfZero(cv, brk));
                }
                self.stmt(body);
                self.emit(Instruction::Label(cont));
                if let Some(p) = post {
                    self.rvalue(p);
                }
                self.emit(Instruction::Jump(l));
                self.emit(Instruction::Label(brk));
            }
            StmtKind::Switch { cond, body, label, cases, default } => {
                let l = label.expect("switch label resolved");
                let brk = break_label(l);
                let cv = self.rvalue(cond);
                let cty = cv.ty();
                let base = cty.as_base().unwrap_or(Base::I32);
                for (value, case_label) in cases {
                    let cmp = self.fresh(Type::Var(Base::I32));
                    self.emit(Instruction::Binary {
                        op: tir::BinOp::Eq,
                        lhs: cv.clone(),
                        rhs: Value::ConstInt(*value as u64, base),
                        dst: cmp.clone(),
                    });
                    self.emit(Instruction::JumpIfNotZero(cmp, *case_label));
                }
                match default {
                    Some(d) => self.emit(Instruction::Jump(*d)),
                    None => self.emit(Instruction::Jump(brk)),
                }
                self.stmt(body);
                self.emit(Instruction::Label(brk));
            }
        }
    }

    // ---- expressions ---------------------------------------------------

    fn rvalue(&mut self, e: &Expr) -> Value {
        match &e.kind {
            ExprKind::ConstInt(v, _) => Value::ConstInt(*v, e.ty().as_base().unwrap_or(Base::I32)),
            ExprKind::ConstChar(c) => Value::ConstInt((*c as u8) as u64, Base::Char),
            ExprKind::ConstDouble(d) => Value::ConstDouble(*d),
            ExprKind::Str(bytes) => {
                let name = self.intern_string(bytes);
                let arr_ty = e.ty().clone();
                let dst = self.fresh(Type::pointer(arr_ty.element().cloned().unwrap_or(Type::Var(Base::Char))));
                self.emit(Instruction::GetAddress { src: Value::Var(name, arr_ty), dst: dst.clone() });
                dst
            }
            ExprKind::Var(name) => Value::Var(*name, e.ty().clone()),
            ExprKind::Cast(_, inner) => {
                let target = e.ty().clone();
                let v = self.rvalue(inner);
                self.convert_to(v, &target)
            }
            ExprKind::Unary(op, inner) => self.lower_unary(*op, inner, e.ty()),
            ExprKind::Binary(op, l, r) => self.lower_binary(*op, l, r, e.ty()),
            ExprKind::Assign(op, l, r) => self.lower_assign(*op, l, r),
            ExprKind::PreInc(inner) => self.lower_incdec(true, false, inner),
            ExprKind::PreDec(inner) => self.lower_incdec(false, false, inner),
            ExprKind::PostInc(inner) => self.lower_incdec(true, true, inner),
            ExprKind::PostDec(inner) => self.lower_incdec(false, true, inner),
            ExprKind::Ternary(c, t, f) => self.lower_ternary(c, t, f, e.ty()),
            ExprKind::Call(name, args) => self.lower_call(*name, args, e.ty()),
            ExprKind::Deref(inner) => {
                let ptr = self.rvalue(inner);
                let dst = self.fresh(e.ty().clone());
                self.emit(Instruction::Load { ptr, dst: dst.clone() });
                dst
            }
            ExprKind::AddrOf(inner) => self.lower_addrof(inner),
            ExprKind::Subscript(b, i) => {
                let addr = self.subscript_addr(b, i);
                let dst = self.fresh(e.ty().clone());
                self.emit(Instruction::Load { ptr: addr, dst: dst.clone() });
                dst
            }
            ExprKind::SizeofExpr(inner) => Value::ConstInt(self.aggregates.size_of(inner.ty()) as u64, Base::U64),
            ExprKind::SizeofType(tn) => {
                let t = typename_to_type(tn);
                Value::ConstInt(self.aggregates.size_of(&t) as u64, Base::U64)
            }
            ExprKind::Dot(_, _) | ExprKind::Arrow(_, _) => {
                let addr = self.lvalue_addr(e);
                let dst = self.fresh(e.ty().clone());
                self.emit(Instruction::Load { ptr: addr, dst: dst.clone() });
                dst
            }
        }
    }

    fn lower_unary(&mut self, op: UnaryOp, inner: &Expr, result_ty: &Type) -> Value {
        match op {
            UnaryOp::Plus => {
                let v = self.rvalue(inner);
                self.convert_to(v, result_ty)
            }
            UnaryOp::Neg => {
                let v = self.rvalue(inner);
                let v = self.convert_to(v, result_ty);
                let dst = self.fresh(result_ty.clone());
                self.emit(Instruction::Unary { op: IrUnOp::Negate, src: v, dst: dst.clone() });
                dst
            }
            UnaryOp::Complement => {
                let v = self.rvalue(inner);
                let v = self.convert_to(v, result_ty);
                let dst = self.fresh(result_ty.clone());
                self.emit(Instruction::Unary { op: IrUnOp::Complement, src: v, dst: dst.clone() });
                dst
            }
            UnaryOp::Not => {
                let v = self.rvalue(inner);
                let dst = self.fresh(Type::Var(Base::I32));
                self.emit(Instruction::Unary { op: IrUnOp::Not, src: v, dst: dst.clone() });
                dst
            }
        }
    }

    fn lower_binary(&mut self, op: BinaryOp, l: &Expr, r: &Expr, result_ty: &Type) -> Value {
        if op == BinaryOp::And {
            return self.lower_and(l, r);
        }
        if op == BinaryOp::Or {
            return self.lower_or(l, r);
        }

        let lt = l.ty().clone();
        let rt = r.ty().clone();

        if op == BinaryOp::Add && lt.is_pointer() && rt.is_integer() {
            return self.lower_ptr_add(l, r, &lt, 1);
        }
        if op == BinaryOp::Add && rt.is_pointer() && lt.is_integer() {
            return self.lower_ptr_add(r, l, &rt, 1);
        }
        if op == BinaryOp::Sub && lt.is_pointer() && rt.is_integer() {
            return self.lower_ptr_add(l, r, &lt, -1);
        }
        if op == BinaryOp::Sub && lt.is_pointer() && rt.is_pointer() {
            return self.lower_ptr_diff(l, r, &lt);
        }

        if op.is_shift() {
            let lv = self.rvalue(l);
            let lv = self.convert_to(lv, result_ty);
            let rv = self.rvalue(r);
            let dst = self.fresh(result_ty.clone());
            let irop = if op == BinaryOp::Shl { tir::BinOp::Shl } else { tir::BinOp::Shr };
            self.emit(Instruction::Binary { op: irop, lhs: lv, rhs: rv, dst: dst.clone() });
            return dst;
        }

        if op.is_comparison() {
            let common = if lt.is_pointer() || rt.is_pointer() {
                if lt.is_pointer() {
                    lt.clone()
                } else {
                    rt.clone()
                }
            } else {
                common_arithmetic_type(&lt, &rt)
            };
            let lv = self.rvalue(l);
            let lv = self.convert_to(lv, &common);
            let rv = self.rvalue(r);
            let rv = self.convert_to(rv, &common);
            let dst = self.fresh(Type::Var(Base::I32));
            let irop = map_cmp(op);
            self.emit(Instruction::Binary { op: irop, lhs: lv, rhs: rv, dst: dst.clone() });
            return dst;
        }

        let common = common_arithmetic_type(&lt, &rt);
        let lv = self.rvalue(l);
        let lv = self.convert_to(lv, &common);
        let rv = self.rvalue(r);
        let rv = self.convert_to(rv, &common);
        let dst = self.fresh(result_ty.clone());
        let irop = map_arith(op);
        self.emit(Instruction::Binary { op: irop, lhs: lv, rhs: rv, dst: dst.clone() });
        dst
    }

    fn lower_and(&mut self, l: &Expr, r: &Expr) -> Value {
        let false_l = self.counter.fresh("and.false");
        let end = self.counter.fresh("and.end");
        let lv = self.rvalue(l);
        self.emit(Instruction::JumpIfZero(lv, false_l));
        let rv = self.rvalue(r);
        self.emit(Instruction::JumpIfZero(rv, false_l));
        let dst = self.fresh(Type::Var(Base::I32));
        self.emit(Instruction::Copy { src: Value::ConstInt(1, Base::I32), dst: dst.clone() });
        self.emit(Instruction::Jump(end));
        self.emit(Instruction::Label(false_l));
        self.emit(Instruction::Copy { src: Value::ConstInt(0, Base::I32), dst: dst.clone() });
        self.emit(Instruction::Label(end));
        dst
    }

    fn lower_or(&mut self, l: &Expr, r: &Expr) -> Value {
        let true_l = self.counter.fresh("or.true");
        let end = self.counter.fresh("or.end");
        let lv = self.rvalue(l);
        self.emit(Instruction::JumpIfNotZero(lv, true_l));
        let rv = self.rvalue(r);
        self.emit(Instruction::JumpIfNotZero(rv, true_l));
        let dst = self.fresh(Type::Var(Base::I32));
        self.emit(Instruction::Copy { src: Value::ConstInt(0, Base::I32), dst: dst.clone() });
        self.emit(Instruction::Jump(end));
        self.emit(Instruction::Label(true_l));
        self.emit(Instruction::Copy { src: Value::ConstInt(1, Base::I32), dst: dst.clone() });
        self.emit(Instruction::Label(end));
        dst
    }

    /// `ptr + sign * int`, scaled by the pointee size. `sign` is `1` for `+`
    /// and `-1` for pointer-minus-integer, both lowered through the same
    /// `AddPtr` instruction.
    fn lower_ptr_add(&mut self, ptr_e: &Expr, int_e: &Expr, ptr_ty: &Type, sign: i64) -> Value {
        let pv = self.rvalue(ptr_e);
        let iv = self.rvalue(int_e);
        let iv = self.to_i64(iv);
        let iv = if sign < 0 {
            let neg = self.fresh(Type::Var(Base::I64));
            self.emit(Instruction::Unary { op: IrUnOp::Negate, src: iv, dst: neg.clone() });
            neg
        } else {
            iv
        };
        let scale = self.aggregates.size_of(ptr_ty.pointee().expect("pointer type"));
        let dst = self.fresh(ptr_ty.clone());
        self.emit(Instruction::AddPtr { ptr: pv, index: iv, scale, dst: dst.clone() });
        dst
    }

    fn lower_ptr_diff(&mut self, l: &Expr, r: &Expr, ptr_ty: &Type) -> Value {
        let lv = self.rvalue(l);
        let rv = self.rvalue(r);
        let bytes = self.fresh(Type::Var(Base::I64));
        self.emit(Instruction::Binary { op: tir::BinOp::Sub, lhs: lv, rhs: rv, dst: bytes.clone() });
        let elem_size = self.aggregates.size_of(ptr_ty.pointee().expect("pointer type"));
        if elem_size == 1 {
            return bytes;
        }
        let dst = self.fresh(Type::Var(Base::I64));
        self.emit(Instruction::Binary {
            op: tir::BinOp::Div,
            lhs: bytes,
            rhs: Value::ConstInt(elem_size as u64, Base::I64),
            dst: dst.clone(),
        });
        dst
    }

    fn lower_assign(&mut self, op: AssignOp, l: &Expr, r: &Expr) -> Value {
        let lt = l.ty().clone();
        match op {
            AssignOp::Assign => {
                if lt.is_structured() {
                    let src_addr = self.lvalue_addr(r);
                    let dst_addr = self.lvalue_addr(l);
                    self.copy_aggregate(&dst_addr, &src_addr, &lt);
                    return Value::Var(self.counter.fresh("structassign"), lt);
                }
                let rv = self.rvalue(r);
                let rv = self.convert_to(rv, &lt);
                self.store_lvalue(l, rv.clone());
                rv
            }
            AssignOp::Compound(bop) if lt.is_pointer() && matches!(bop, BinaryOp::Add | BinaryOp::Sub) => {
                let sign = if bop == BinaryOp::Add { 1 } else { -1 };
                let dst = self.lower_ptr_add(l, r, &lt, sign);
                self.store_lvalue(l, dst.clone());
                dst
            }
            AssignOp::Compound(bop) => {
                let rv = self.rvalue(r);
                let lv = self.rvalue(l);
                let common = if bop.is_shift() { lt.clone() } else { common_arithmetic_type(&lv.ty(), &rv.ty()) };
                let lv2 = self.convert_to(lv, &common);
                let rv2 = if bop.is_shift() { rv } else { self.convert_to(rv, &common) };
                let dst = self.fresh(common.clone());
                let irop = if bop.is_shift() {
                    if bop == BinaryOp::Shl {
                        tir::BinOp::Shl
                    } else {
                        tir::BinOp::Shr
                    }
                } else {
                    map_arith(bop)
                };
                self.emit(Instruction::Binary { op: irop, lhs: lv2, rhs: rv2, dst: dst.clone() });
                let back = self.convert_to(dst, &lt);
                self.store_lvalue(l, back.clone());
                back
            }
        }
    }

    /// Expand a whole-aggregate assignment into a sequence of scalar
    /// load/store pairs over the member layout, rather than threading a
    /// dedicated aggregate-copy instruction through instruction selection.
    fn copy_aggregate(&mut self, dst_addr: &Value, src_addr: &Value, ty: &Type) {
        match ty {
            Type::Structured(tag) => {
                let agg = self.aggregates.get(*tag).expect("internal error: unknown aggregate").clone();
                for member in &agg.members {
                    let member_dst = self.add_const_offset(dst_addr.clone(), member.offset, Type::pointer(member.ty.clone()));
                    let member_src = self.add_const_offset(src_addr.clone(), member.offset, Type::pointer(member.ty.clone()));
                    self.copy_aggregate(&member_dst, &member_src, &member.ty);
                }
            }
            Type::Array(elem, len) => {
                let elem_size = self.aggregates.size_of(elem);
                for i in 0..*len {
                    let offset = elem_size * i as i64;
                    let member_dst = self.add_const_offset(dst_addr.clone(), offset, Type::pointer((**elem).clone()));
                    let member_src = self.add_const_offset(src_addr.clone(), offset, Type::pointer((**elem).clone()));
                    self.copy_aggregate(&member_dst, &member_src, elem);
                }
            }
            _ => {
                let tmp = self.fresh(ty.clone());
                self.emit(Instruction::Load { ptr: src_addr.clone(), dst: tmp.clone() });
                self.emit(Instruction::Store { src: tmp, ptr: dst_addr.clone() });
            }
        }
    }

    fn lower_incdec(&mut self, is_inc: bool, is_post: bool, inner: &Expr) -> Value {
        let ty = inner.ty().clone();
        let old = self.rvalue(inner);
        let preserved = if is_post {
            let t = self.fresh(ty.clone());
            self.emit(Instruction::Copy { src: old.clone(), dst: t.clone() });
            Some(t)
        } else {
            None
        };
        let new_val = if ty.is_pointer() {
            let scale = self.aggregates.size_of(ty.pointee().expect("pointer type"));
            let delta: i64 = if is_inc { 1 } else { -1 };
            let dst = self.fresh(ty.clone());
            self.emit(Instruction::AddPtr {
                ptr: old.clone(),
                index: Value::ConstInt(delta as u64, Base::I64),
                scale,
                dst: dst.clone(),
            });
            dst
        } else {
            let base = ty.as_base().expect("internal error: inc/dec on non-scalar");
            let widen = matches!(base, Base::Char | Base::I8 | Base::U8);
            let work_ty = if widen { Type::Var(Base::I32) } else { ty.clone() };
            let widened = self.convert_to(old, &work_ty);
            let one = if base == Base::Double { Value::ConstDouble(1.0) } else { Value::ConstInt(1, work_ty.as_base().unwrap()) };
            let opd = self.fresh(work_ty.clone());
            let bop = if is_inc { tir::BinOp::Add } else { tir::BinOp::Sub };
            self.emit(Instruction::Binary { op: bop, lhs: widened, rhs: one, dst: opd.clone() });
            self.convert_to(opd, &ty)
        };
        self.store_lvalue(inner, new_val.clone());
        preserved.unwrap_or(new_val)
    }

    fn lower_ternary(&mut self, c: &Expr, t: &Expr, f: &Expr, result_ty: &Type) -> Value {
        let else_l = self.counter.fresh("tern.else");
        let end = self.counter.fresh("tern.end");
        let cv = self.rvalue(c);
        self.emit(Instruction::JumpIfZero(cv, else_l));
        let tv = self.rvalue(t);
        let tv = self.convert_to(tv, result_ty);
        let dst = self.fresh(result_ty.clone());
        self.emit(Instruction::Copy { src: tv, dst: dst.clone() });
        self.emit(Instruction::Jump(end));
        self.emit(Instruction::Label(else_l));
        let fv = self.rvalue(f);
        let fv = self.convert_to(fv, result_ty);
        self.emit(Instruction::Copy { src: fv, dst: dst.clone() });
        self.emit(Instruction::Label(end));
        dst
    }

    fn lower_call(&mut self, name: Id, args: &[Expr], result_ty: &Type) -> Value {
        let param_types: Vec<Type> = match self.symbols.entry(name).map(|e| &e.ty) {
            Some(Type::Func(_, params)) => params.clone(),
            _ => Vec::new(),
        };
        let mut argvals = Vec::with_capacity(args.len());
        for (i, a) in args.iter().enumerate() {
            let v = self.rvalue(a);
            let target = param_types.get(i).cloned().unwrap_or_else(|| a.ty().clone());
            let v = self.convert_to(v, &target);
            argvals.push(v);
        }
        if result_ty.is_void() {
            self.emit(Instruction::FunCall { name, args: argvals, dst: None });
            Value::ConstInt(0, Base::I32)
        } else {
            let dst = self.fresh(result_ty.clone());
            self.emit(Instruction::FunCall { name, args: argvals, dst: Some(dst.clone()) });
            dst
        }
    }

    fn lower_addrof(&mut self, inner: &Expr) -> Value {
        match &inner.kind {
            ExprKind::Deref(p) => self.rvalue(p),
            ExprKind::Subscript(b, i) => self.subscript_addr(b, i),
            _ => self.lvalue_addr(inner),
        }
    }

    fn subscript_addr(&mut self, b: &Expr, i: &Expr) -> Value {
        let ptr = self.rvalue(b);
        let idx = self.rvalue(i);
        let idx = self.to_i64(idx);
        let elem_ty = ptr.ty().pointee().cloned().expect("internal error: subscript base is not a pointer");
        let scale = self.aggregates.size_of(&elem_ty);
        let dst = self.fresh(Type::pointer(elem_ty));
        self.emit(Instruction::AddPtr { ptr, index: idx, scale, dst: dst.clone() });
        dst
    }

    fn member_offset(&self, base_ty: &Type, field: Id) -> (i64, Type) {
        let Type::Structured(tag) = base_ty else { panic!("internal error: member access on a non-structured type") };
        let agg = self.aggregates.get(*tag).expect("internal error: unknown aggregate");
        let member = agg.member(field).expect("internal error: unknown member");
        (member.offset, member.ty.clone())
    }

    fn add_const_offset(&mut self, base: Value, offset: i64, result_ty: Type) -> Value {
        if offset == 0 {
            let dst = self.fresh(result_ty);
            self.emit(Instruction::Copy { src: base, dst: dst.clone() });
            return dst;
        }
        let dst = self.fresh(result_ty);
        self.emit(Instruction::AddPtr { ptr: base, index: Value::ConstInt(offset as u64, Base::I64), scale: 1, dst: dst.clone() });
        dst
    }

    /// Address of an lvalue expression. Used both for `&e` and as the target
    /// half of a store (`store_lvalue` recomputes the address rather than
    /// caching it, matching the source's no-shared-subexpression style).
    fn lvalue_addr(&mut self, e: &Expr) -> Value {
        match &e.kind {
            ExprKind::Var(name) => {
                let dst = self.fresh(Type::pointer(e.ty().clone()));
                self.emit(Instruction::GetAddress { src: Value::Var(*name, e.ty().clone()), dst: dst.clone() });
                dst
            }
            ExprKind::Deref(inner) => self.rvalue(inner),
            ExprKind::Subscript(b, i) => self.subscript_addr(b, i),
            ExprKind::Dot(base, field) => {
                let base_addr = self.lvalue_addr(base);
                let (offset, mty) = self.member_offset(base.ty(), *field);
                self.add_const_offset(base_addr, offset, Type::pointer(mty))
            }
            ExprKind::Arrow(base, field) => {
                let base_ptr = self.rvalue(base);
                let pointee = base.ty().pointee().cloned().expect("internal error: -> on non-pointer");
                let (offset, mty) = self.member_offset(&pointee, *field);
                self.add_const_offset(base_ptr, offset, Type::pointer(mty))
            }
            _ => panic!("internal error: taking the address of a non-lvalue expression"),
        }
    }

    fn store_lvalue(&mut self, l: &Expr, val: Value) {
        match &l.kind {
            ExprKind::Var(name) => self.emit(Instruction::Copy { src: val, dst: Value::Var(*name, l.ty().clone()) }),
            ExprKind::Deref(inner) => {
                let ptr = self.rvalue(inner);
                self.emit(Instruction::Store { src: val, ptr });
            }
            ExprKind::Subscript(b, i) => {
                let addr = self.subscript_addr(b, i);
                self.emit(Instruction::Store { src: val, ptr: addr });
            }
            ExprKind::Dot(_, _) | ExprKind::Arrow(_, _) => {
                let addr = self.lvalue_addr(l);
                self.emit(Instruction::Store { src: val, ptr: addr });
            }
            _ => panic!("internal error: assignment to a non-lvalue expression"),
        }
    }
}

fn map_cmp(op: BinaryOp) -> tir::BinOp {
    match op {
        BinaryOp::Eq => tir::BinOp::Eq,
        BinaryOp::Ne => tir::BinOp::Ne,
        BinaryOp::Lt => tir::BinOp::Lt,
        BinaryOp::Le => tir::BinOp::Le,
        BinaryOp::Gt => tir::BinOp::Gt,
        BinaryOp::Ge => tir::BinOp::Ge,
        _ => panic!("internal error: {op:?} is not a comparison"),
    }
}

fn map_arith(op: BinaryOp) -> tir::BinOp {
    match op {
        BinaryOp::Add => tir::BinOp::Add,
        BinaryOp::Sub => tir::BinOp::Sub,
        BinaryOp::Mul => tir::BinOp::Mul,
        BinaryOp::Div => tir::BinOp::Div,
        BinaryOp::Mod => tir::BinOp::Mod,
        BinaryOp::BitAnd => tir::BinOp::BitAnd,
        BinaryOp::BitOr => tir::BinOp::BitOr,
        BinaryOp::BitXor => tir::BinOp::BitXor,
        _ => panic!("internal error: {op:?} is not an arithmetic/bitwise operator"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::validate;

    fn lower_src(src: &str) -> tir::Program {
        let (mut prog, errs) = crate::front::parse::parse(src);
        assert!(errs.is_empty(), "{errs:?}");
        let analysis = validate(&mut prog).unwrap_or_else(|d| panic!("{:?}", d.render_all(src)));
        lower(&prog, &analysis)
    }

    fn main_body(p: &tir::Program) -> &[Instruction] {
        for t in &p.top_level {
            if let TopLevel::Function(f) = t {
                if &*f.name == "main" {
                    return &f.body;
                }
            }
        }
        panic!("no main function lowered")
    }

    #[test]
    fn returns_constant() {
        let p = lower_src("int main(void) { return 42; }");
        let body = main_body(&p);
        assert!(matches!(body.last(), Some(Instruction::Return(Some(Value::ConstInt(42, Base::I32))))));
    }

    #[test]
    fn if_else_emits_two_labels_and_a_conditional_jump() {
        let p = lower_src("int main(void) { if (1) { return 1; } else { return 2; } }");
        let body = main_body(&p);
        let jumps_if_zero = body.iter().filter(|i| matches!(i, Instruction::JumpIfZero(..))).count();
        assert_eq!(jumps_if_zero, 1);
        let labels = body.iter().filter(|i| matches!(i, Instruction::Label(_))).count();
        assert_eq!(labels, 2);
    }

    #[test]
    fn while_loop_places_continue_label_at_the_top() {
        let p = lower_src("int main(void) { int i = 0; while (i < 3) { i = i + 1; } return i; }");
        let body = main_body(&p);
        let first_label = body.iter().find_map(|i| if let Instruction::Label(l) = i { Some(*l) } else { None });
        assert!(first_label.unwrap().to_string().ends_with(".cont"));
    }

    #[test]
    fn logical_and_short_circuits_without_evaluating_rhs_unconditionally() {
        let p = lower_src("int main(void) { int x = 0; return (x != 0) && (1 / x > 0); }");
        let body = main_body(&p);
        assert!(body.iter().any(|i| matches!(i, Instruction::JumpIfZero(..))));
    }

    #[test]
    fn pointer_subtraction_scales_by_element_size() {
        let p = lower_src("int main(void) { int a[4]; int *p = &a[2]; int *q = &a[0]; return p - q; }");
        let body = main_body(&p);
        assert!(body.iter().any(|i| matches!(i, Instruction::Binary { op: tir::BinOp::Div, .. })));
    }

    #[test]
    fn struct_assignment_expands_into_member_copies() {
        let p = lower_src(
            "struct Pt { int x; int y; }; int main(void) { struct Pt a; struct Pt b; a = b; return 0; }",
        );
        let body = main_body(&p);
        let loads = body.iter().filter(|i| matches!(i, Instruction::Load { .. })).count();
        let stores = body.iter().filter(|i| matches!(i, Instruction::Store { .. })).count();
        assert_eq!(loads, 2);
        assert_eq!(stores, 2);
    }

    #[test]
    fn array_initializer_lowers_to_copy_to_offset_and_allocate() {
        let p = lower_src("int main(void) { int a[3] = {1, 2}; return a[0]; }");
        let body = main_body(&p);
        assert!(body.iter().any(|i| matches!(i, Instruction::Allocate { .. })));
        let copies = body.iter().filter(|i| matches!(i, Instruction::CopyToOffset { .. })).count();
        assert_eq!(copies, 3);
    }

    #[test]
    fn global_initializer_becomes_static_variable() {
        let p = lower_src("int g = 7; int main(void) { return g; }");
        assert!(p.top_level.iter().any(|t| matches!(t, TopLevel::StaticVariable { init: StaticInit::Int(7, Base::I32), .. })));
    }

    #[test]
    fn string_literal_is_interned_once() {
        let p = lower_src("int main(void) { char *a = \"hi\"; char *b = \"hi\"; return 0; }");
        let consts = p.top_level.iter().filter(|t| matches!(t, TopLevel::StaticConstant { .. })).count();
        assert_eq!(consts, 1);
    }
}
