//! Pass 1: identifier resolution.
//!
//! Walks every declaration, pushing scope entries and rewriting each
//! referenced name to its unique form in place. Also resolves parsed
//! [`TypeName`]s into semantic [`Type`]s, which requires a parallel scope
//! stack for structured-type tags (shadowed the same way variable names are,
//! but keyed into the [`AggregateRegistry`] by a mangled unique tag name
//! rather than the spelled tag).
//!
//! Grounded on `Semantics/TypeResolution.cpp` / `RemoveRedundantDecls.cpp` in
//! the original source: one front-to-back walk that both renames and
//! resolves structured-type tags, deferring type *checking* (as opposed to
//! type *resolution*) to [`super::typecheck`].

use crate::common::{id, Counter, Diagnostics, Id, Map, SourceOffset};
use crate::front::ast::*;
use crate::sema::symtab::{mangle_local, Entry, Linkage, SymbolTable};
use crate::sema::types::{AggregateRegistry, Base, StructuredKind as SK, Type};

pub struct Resolver<'a> {
    symbols: &'a mut SymbolTable,
    aggregates: &'a mut AggregateRegistry,
    counter: &'a mut Counter,
    diags: &'a mut Diagnostics,
    tags: Vec<Map<Id, Id>>,
    current_func: Option<Id>,
}

pub fn resolve(
    program: &mut Program,
    symbols: &mut SymbolTable,
    aggregates: &mut AggregateRegistry,
    counter: &mut Counter,
    diags: &mut Diagnostics,
) {
    let mut r = Resolver { symbols, aggregates, counter, diags, tags: vec![Map::new()], current_func: None };
    for decl in &mut program.decls {
        r.top_level(decl);
    }
}

impl<'a> Resolver<'a> {
    fn err(&mut self, msg: impl Into<String>, offset: SourceOffset) {
        self.diags.push(msg, offset);
    }

    // ---- type-name resolution -------------------------------------------

    fn lookup_tag(&self, tag: Id) -> Option<Id> {
        self.tags.iter().rev().find_map(|scope| scope.get(&tag).copied())
    }

    fn resolve_type_name(&mut self, tn: &TypeName, offset: SourceOffset) -> Type {
        match tn {
            TypeName::Void => Type::Var(Base::Void),
            TypeName::Char => Type::Var(Base::Char),
            TypeName::SChar => Type::Var(Base::I8),
            TypeName::UChar => Type::Var(Base::U8),
            TypeName::Int => Type::Var(Base::I32),
            TypeName::UInt => Type::Var(Base::U32),
            TypeName::Long => Type::Var(Base::I64),
            TypeName::ULong => Type::Var(Base::U64),
            TypeName::Double => Type::Var(Base::Double),
            TypeName::Pointer(inner) => Type::pointer(self.resolve_type_name(inner, offset)),
            TypeName::Array(inner, n) => Type::array(self.resolve_type_name(inner, offset), *n),
            TypeName::Struct(tag) | TypeName::Union(tag) => match self.lookup_tag(*tag) {
                Some(unique) => Type::Structured(unique),
                None => {
                    self.err(format!("undeclared struct/union tag '{tag}'"), offset);
                    Type::Structured(*tag)
                }
            },
        }
    }

    fn declare_structured(&mut self, decl: &mut StructuredDecl) {
        let unique = id(format!("{}.{}.tmp", decl.name, self.counter.next()));
        self.tags.last_mut().unwrap().insert(decl.name, unique);
        let mut members = Vec::with_capacity(decl.members.len());
        for m in &mut decl.members {
            let ty = self.resolve_type_name(&m.ty, decl.offset);
            members.push((m.name, ty));
        }
        let kind = match decl.kind {
            StructuredKind::Struct => SK::Struct,
            StructuredKind::Union => SK::Union,
        };
        self.aggregates.declare(unique, kind, members);
        decl.name = unique;
    }

    // ---- top level ---------------------------------------------------

    fn top_level(&mut self, decl: &mut Decl) {
        match decl {
            Decl::Structured(s) => self.declare_structured(s),
            Decl::Var(v) => self.file_scope_var(v),
            Decl::Func(f) => self.func_decl(f, true),
        }
    }

    fn file_scope_var(&mut self, v: &mut VarDecl) {
        let ty = self.resolve_type_name(&v.ty, v.offset);
        if v.storage == StorageClass::Extern && v.init.is_some() {
            self.err("extern declaration with initializer", v.offset);
        }
        let wants_internal = v.storage == StorageClass::Static;
        let defined = v.init.is_some();
        if let Some(existing) = self.symbols.entry(v.name).cloned() {
            let existing_internal = existing.linkage == Linkage::Internal;
            if v.storage != StorageClass::Extern && existing_internal != wants_internal {
                self.err(format!("conflicting linkage for '{}'", v.name), v.offset);
            }
            let linkage = if existing_internal || wants_internal { Linkage::Internal } else { Linkage::External };
            let entry = Entry {
                unique_name: v.name,
                ty,
                linkage,
                global: linkage == Linkage::External,
                static_storage: true,
                defined: existing.defined || defined,
            };
            self.symbols.declare(v.name, v.name, entry);
        } else {
            let linkage = if wants_internal { Linkage::Internal } else { Linkage::External };
            let entry = Entry {
                unique_name: v.name,
                ty,
                linkage,
                global: linkage == Linkage::External,
                static_storage: true,
                defined,
            };
            self.symbols.declare(v.name, v.name, entry);
        }
    }

    fn func_decl(&mut self, f: &mut FuncDecl, file_scope: bool) {
        if !file_scope && f.storage == StorageClass::Static {
            self.err(format!("static function '{}' declared inside a function", f.name), f.offset);
        }
        let ret = self.resolve_type_name(&f.ret, f.offset);
        let param_type_names: Vec<TypeName> = f.params.iter().map(|(_, t)| t.clone()).collect();
        let param_types: Vec<Type> = param_type_names.iter().map(|t| self.resolve_type_name(t, f.offset)).collect();
        let ty = Type::Func(Box::new(ret), param_types.clone());

        let wants_internal = f.storage == StorageClass::Static;
        let has_body = f.body.is_some();
        if let Some(existing) = self.symbols.entry(f.name).cloned() {
            if has_body && existing.defined {
                self.err(format!("function '{}' defined more than once", f.name), f.offset);
            }
            let existing_internal = existing.linkage == Linkage::Internal;
            if f.storage != StorageClass::Extern && existing_internal != wants_internal {
                self.err(format!("conflicting linkage for '{}'", f.name), f.offset);
            }
            let linkage = if existing_internal || wants_internal { Linkage::Internal } else { Linkage::External };
            let entry = Entry {
                unique_name: f.name,
                ty,
                linkage,
                global: linkage == Linkage::External,
                static_storage: true,
                defined: existing.defined || has_body,
            };
            self.symbols.declare(f.name, f.name, entry);
        } else {
            let linkage = if wants_internal { Linkage::Internal } else { Linkage::External };
            let entry = Entry {
                unique_name: f.name,
                ty,
                linkage,
                global: linkage == Linkage::External,
                static_storage: true,
                defined: has_body,
            };
            self.symbols.declare(f.name, f.name, entry);
        }

        if let Some(body) = &mut f.body {
            let prev_func = self.current_func.replace(f.name);
            self.symbols.push_scope();
            self.tags.push(Map::new());
            for (pname, pty) in &mut f.params {
                let resolved = self.resolve_type_name(pty, f.offset);
                if self.symbols.bound_in_current_scope(*pname) {
                    self.err(format!("duplicate parameter name '{pname}'"), f.offset);
                }
                let unique = mangle_local(*pname, self.counter);
                let entry = Entry {
                    unique_name: unique,
                    ty: resolved,
                    linkage: Linkage::None,
                    global: false,
                    static_storage: false,
                    defined: true,
                };
                self.symbols.declare(*pname, unique, entry);
                *pname = unique;
            }
            for item in body.iter_mut() {
                self.block_item(item);
            }
            self.tags.pop();
            self.symbols.pop_scope();
            self.current_func = prev_func;
        }
    }

    // ---- block scope ---------------------------------------------------

    fn block_items(&mut self, items: &mut [BlockItem]) {
        self.symbols.push_scope();
        self.tags.push(Map::new());
        for item in items {
            self.block_item(item);
        }
        self.tags.pop();
        self.symbols.pop_scope();
    }

    fn block_item(&mut self, item: &mut BlockItem) {
        match item {
            BlockItem::Decl(Decl::Structured(s)) => self.declare_structured(s),
            BlockItem::Decl(Decl::Func(f)) => self.func_decl(f, false),
            BlockItem::Decl(Decl::Var(v)) => self.local_var(v),
            BlockItem::Stmt(s) => self.stmt(s),
        }
    }

    fn local_var(&mut self, v: &mut VarDecl) {
        let ty = self.resolve_type_name(&v.ty, v.offset);
        if v.storage == StorageClass::Extern {
            if v.init.is_some() {
                self.err("extern declaration with initializer", v.offset);
            }
            if self.symbols.entry(v.name).is_none() {
                let entry = Entry {
                    unique_name: v.name,
                    ty,
                    linkage: Linkage::External,
                    global: true,
                    static_storage: true,
                    defined: false,
                };
                self.symbols.declare(v.name, v.name, entry);
            } else {
                self.symbols.alias(v.name, v.name);
            }
            return;
        }

        if self.symbols.bound_in_current_scope(v.name) {
            self.err(format!("redeclaration of '{}' in the same scope", v.name), v.offset);
        }

        if v.storage == StorageClass::Static {
            let unique = id(format!("{}.{}.tmp", v.name, self.counter.next()));
            let entry =
                Entry { unique_name: unique, ty, linkage: Linkage::Internal, global: false, static_storage: true, defined: true };
            self.symbols.declare(v.name, unique, entry);
            v.name = unique;
        } else {
            let unique = mangle_local(v.name, self.counter);
            let entry =
                Entry { unique_name: unique, ty, linkage: Linkage::None, global: false, static_storage: false, defined: true };
            self.symbols.declare(v.name, unique, entry);
            v.name = unique;
        }

        if let Some(init) = &mut v.init {
            self.initializer(init);
        }
    }

    fn stmt(&mut self, s: &mut Stmt) {
        match &mut s.kind {
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
            StmtKind::Compound(items) => self.block_items(items),
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
                self.symbols.push_scope();
                self.tags.push(Map::new());
                match init {
                    ForInit::Decl(d) => self.local_var(d),
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
                self.tags.pop();
                self.symbols.pop_scope();
            }
            StmtKind::Switch { cond, body, .. } => {
                self.expr(cond);
                self.stmt(body);
            }
            StmtKind::Null => {}
        }
    }

    fn initializer(&mut self, init: &mut Initializer) {
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

    fn expr(&mut self, e: &mut Expr) {
        match &mut e.kind {
            ExprKind::ConstInt(..) | ExprKind::ConstChar(_) | ExprKind::ConstDouble(_) | ExprKind::Str(_) => {}
            ExprKind::Var(name) => match self.symbols.lookup_name(*name) {
                Some((unique, _)) => *name = unique,
                None => self.err(format!("use of undeclared identifier '{name}'"), e.offset),
            },
            ExprKind::Cast(ty, inner) => {
                *ty = self.type_name_resolved_in_place(ty, e.offset);
                self.expr(inner);
            }
            ExprKind::Unary(_, inner)
            | ExprKind::PreInc(inner)
            | ExprKind::PreDec(inner)
            | ExprKind::PostInc(inner)
            | ExprKind::PostDec(inner)
            | ExprKind::Deref(inner)
            | ExprKind::AddrOf(inner)
            | ExprKind::SizeofExpr(inner)
            | ExprKind::Dot(inner, _)
            | ExprKind::Arrow(inner, _) => self.expr(inner),
            ExprKind::Binary(_, l, r) | ExprKind::Assign(_, l, r) | ExprKind::Subscript(l, r) => {
                self.expr(l);
                self.expr(r);
            }
            ExprKind::Ternary(a, b, c) => {
                self.expr(a);
                self.expr(b);
                self.expr(c);
            }
            ExprKind::Call(callee, args) => {
                match self.symbols.lookup_name(*callee) {
                    Some((unique, _)) => *callee = unique,
                    None => self.err(format!("call to undeclared function '{callee}'"), e.offset),
                }
                for a in args {
                    self.expr(a);
                }
            }
            ExprKind::SizeofType(ty) => {
                *ty = self.type_name_resolved_in_place(ty, e.offset);
            }
        }
    }

    /// `TypeName`s embedded inside expressions (`Cast`, `sizeof(type)`) still
    /// need their structured tags resolved, but the node keeps the
    /// [`TypeName`] shape; we resolve tags by rewriting any `Struct`/`Union`
    /// leaf's tag in place to its unique name rather than returning a
    /// [`Type`] here (type checking does the `TypeName -> Type` conversion
    /// for these node kinds using the same tag scope already resolved).
    fn type_name_resolved_in_place(&mut self, ty: &TypeName, offset: SourceOffset) -> TypeName {
        match ty {
            TypeName::Pointer(inner) => TypeName::Pointer(Box::new(self.type_name_resolved_in_place(inner, offset))),
            TypeName::Array(inner, n) => {
                TypeName::Array(Box::new(self.type_name_resolved_in_place(inner, offset)), *n)
            }
            TypeName::Struct(tag) => match self.lookup_tag(*tag) {
                Some(unique) => TypeName::Struct(unique),
                None => {
                    self.err(format!("undeclared struct tag '{tag}'"), offset);
                    TypeName::Struct(*tag)
                }
            },
            TypeName::Union(tag) => match self.lookup_tag(*tag) {
                Some(unique) => TypeName::Union(unique),
                None => {
                    self.err(format!("undeclared union tag '{tag}'"), offset);
                    TypeName::Union(*tag)
                }
            },
            other => other.clone(),
        }
    }
}
