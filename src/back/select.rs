//! Instruction selection: lowers [`crate::middle::tir`] into the pseudo-machine
//! form defined in [`crate::back::asm`].
//!
//! Every `tir::Value::Var` becomes either an [`asm::Operand::Pseudo`] (an
//! automatic local/temporary, left for [`crate::back::pseudo`] to place) or an
//! [`asm::Operand::Data`] (a static/extern object). That choice is made here,
//! once, by consulting the symbol table's [`Entry::static_storage`] flag
//! while it's still in scope — neither pseudo-register replacement nor
//! legalization need their own copy of that bookkeeping.
//!
//! Double and string constants interned during IR generation
//! ([`tir::TopLevel::StaticConstant`]) are carried through unchanged as local
//! `.rodata` data; additional doubles that only ever appear as immediate
//! operands here (sign-bit masks, out-of-range conversion thresholds) are
//! interned the same way, by this pass, the moment they're needed.

use crate::back::asm::{self, AsmType, BinOp, Cond, Instruction as AsmI, Operand, Reg, TopLevel as AsmTop, UnOp as AsmUnOp};
use crate::common::{Counter, Id, Map};
use crate::middle::tir::{self, BinOp as IrBinOp, Instruction as IrI, TopLevel as IrTop, UnOp as IrUnOp, Value};
use crate::sema::symtab::SymbolTable;
use crate::sema::types::{Base, Type};

/// Byte size of every automatic aggregate (`Allocate`d local), keyed by its
/// pseudo name. [`crate::back::pseudo`] consults this to size a
/// `PseudoMem` slot the first time it sees one, since the instruction stream
/// alone carries no size once `Allocate` has been selected away.
pub type AggregateSizes = Map<Id, i64>;

pub fn select(program: &tir::Program, symbols: &SymbolTable) -> (asm::Program, AggregateSizes) {
    let mut local_constants: Map<Id, ()> = Map::new();
    for top in &program.top_level {
        if let IrTop::StaticConstant { name, .. } = top {
            local_constants.insert(*name, ());
        }
    }

    let mut top_level = Vec::new();
    let mut double_pool: Map<u64, Id> = Map::new();
    let mut counter = Counter::new();
    let mut aggregate_sizes = AggregateSizes::new();

    // Carry every already-interned constant and static object straight
    // through; only functions need translating.
    for top in &program.top_level {
        match top {
            IrTop::StaticConstant { name, bytes, alignment } => {
                top_level.push(AsmTop::StaticConstant { name: *name, alignment: *alignment, bytes: bytes.clone() });
            }
            IrTop::StaticVariable { name, global, init, .. } => {
                top_level.push(AsmTop::StaticObject { name: *name, global: *global, alignment: static_alignment(init), init: vec![init.clone()] });
            }
            IrTop::StaticArray { name, global, ty, init } => {
                top_level.push(AsmTop::StaticObject { name: *name, global: *global, alignment: array_alignment(ty), init: init.clone() });
            }
            IrTop::Function(f) => {
                let mut sel = Select {
                    symbols,
                    local_constants: &local_constants,
                    counter: &mut counter,
                    double_pool: &mut double_pool,
                    constants: &mut top_level,
                    insts: Vec::new(),
                    aggregate_sizes: &mut aggregate_sizes,
                };
                let instructions = sel.function(f);
                top_level.push(AsmTop::Function { name: f.name, global: f.global, instructions, stack_size: 0 });
            }
        }
    }

    (asm::Program { top_level }, aggregate_sizes)
}

fn static_alignment(init: &tir::StaticInit) -> i64 {
    match init {
        tir::StaticInit::Double(_) => 8,
        tir::StaticInit::Int(_, base) => base.alignment(),
        tir::StaticInit::PointerZero => 8,
        tir::StaticInit::Zero(n) => (*n).min(8).max(1),
        tir::StaticInit::String(..) => 1,
    }
}

/// SysV's "large aggregate" rule: arrays/structs of 16 bytes or more are
/// 16-aligned regardless of element alignment.
fn array_alignment(ty: &Type) -> i64 {
    match ty {
        Type::Array(elem, len) => {
            let elem_align = scalar_align(elem);
            let size = scalar_size(elem) * *len as i64;
            if size >= 16 { 16 } else { elem_align }
        }
        _ => 8,
    }
}

fn scalar_size(ty: &Type) -> i64 {
    ty.as_base().map(Base::size).unwrap_or(8)
}

fn scalar_align(ty: &Type) -> i64 {
    ty.as_base().map(Base::alignment).unwrap_or(8)
}

fn asm_type(ty: &Type) -> AsmType {
    match ty {
        Type::Var(Base::I8 | Base::U8 | Base::Char) => AsmType::Byte,
        Type::Var(Base::I32 | Base::U32) => AsmType::LongWord,
        Type::Var(Base::I64 | Base::U64) => AsmType::QuadWord,
        Type::Var(Base::Double) => AsmType::Double,
        Type::Var(Base::Void) => AsmType::QuadWord,
        Type::Pointer(_) | Type::Array(..) | Type::Structured(_) | Type::Func(..) => AsmType::QuadWord,
    }
}

fn is_signed_value(v: &Value) -> bool {
    match v.ty() {
        Type::Var(base) => base.is_signed(),
        Type::Pointer(_) => false,
        _ => false,
    }
}

struct Select<'a> {
    symbols: &'a SymbolTable,
    local_constants: &'a Map<Id, ()>,
    counter: &'a mut Counter,
    double_pool: &'a mut Map<u64, Id>,
    constants: &'a mut Vec<AsmTop>,
    insts: Vec<AsmI>,
    aggregate_sizes: &'a mut AggregateSizes,
}

impl<'a> Select<'a> {
    fn emit(&mut self, i: AsmI) {
        self.insts.push(i);
    }

    fn fresh(&mut self, base: &str) -> Id {
        self.counter.fresh(base)
    }

    fn intern_double(&mut self, d: f64) -> Id {
        let bits = d.to_bits();
        if let Some(&name) = self.double_pool.get(&bits) {
            return name;
        }
        let name = crate::common::id(format!("double.{}", self.double_pool.len()));
        self.double_pool.insert(bits, name);
        self.constants.push(AsmTop::StaticConstant { name, alignment: 8, bytes: d.to_le_bytes().to_vec() });
        name
    }

    /// Is `name` a static/extern object (file-scope or `static`-local),
    /// rather than an automatic local or compiler temporary?
    fn is_static_object(&self, name: Id) -> bool {
        self.symbols.entry(name).map(|e| e.static_storage).unwrap_or(false)
    }

    /// An operand naming a scalar value: a pseudo for an automatic local or
    /// temporary, or a `Data` reference for anything with static storage.
    fn operand(&mut self, v: &Value) -> Operand {
        match v {
            Value::ConstInt(bits, _) => Operand::Imm(*bits),
            Value::ConstDouble(d) => Operand::Data(self.intern_double(*d), true),
            Value::Var(name, _) => {
                if self.local_constants.contains_key(name) {
                    Operand::Data(*name, true)
                } else if self.is_static_object(*name) {
                    Operand::Data(*name, false)
                } else {
                    Operand::Pseudo(*name)
                }
            }
        }
    }

    /// The address of a named object `src` refers to — used only by
    /// `GetAddress`, where `src` may name an aggregate with no scalar
    /// `AsmType` of its own.
    fn address_operand(&self, name: Id) -> Operand {
        if self.local_constants.contains_key(&name) {
            Operand::Data(name, true)
        } else if self.is_static_object(name) {
            Operand::Data(name, false)
        } else {
            Operand::PseudoMem(name, 0)
        }
    }

    fn function(&mut self, f: &tir::Function) -> Vec<AsmI> {
        self.insts = Vec::new();
        self.receive_params(f);
        for inst in &f.body {
            self.lower(inst);
        }
        std::mem::take(&mut self.insts)
    }

    /// Move the incoming-register / incoming-stack-slot arguments into each
    /// parameter's pseudo slot. Mirrors the outgoing half in `lower_call`.
    fn receive_params(&mut self, f: &tir::Function) {
        let mut int_regs = asm::Reg::INT_ARG_REGS.iter();
        let mut sse_regs = asm::Reg::SSE_ARG_REGS.iter();
        let mut stack_offset: i64 = 16; // above the saved return address and rbp
        for (name, ty) in f.params.iter().zip(&f.param_types) {
            let at = asm_type(ty);
            let dst = Operand::Pseudo(*name);
            if at.is_double() {
                if let Some(&reg) = sse_regs.next() {
                    self.emit(AsmI::Mov(at, Operand::Reg(reg), dst));
                } else {
                    self.emit(AsmI::Mov(at, Operand::Memory(Reg::Bp, stack_offset), dst));
                    stack_offset += 8;
                }
            } else if let Some(&reg) = int_regs.next() {
                self.emit(AsmI::Mov(at, Operand::Reg(reg), dst));
            } else {
                self.emit(AsmI::Mov(at, Operand::Memory(Reg::Bp, stack_offset), dst));
                stack_offset += 8;
            }
        }
    }

    fn lower(&mut self, inst: &IrI) {
        match inst {
            IrI::Return(val) => self.lower_return(val.as_ref()),
            IrI::SignExtend { src, dst } => {
                let (s, d) = (asm_type(&src.ty()), asm_type(&dst.ty()));
                let (so, do_) = (self.operand(src), self.operand(dst));
                self.emit(AsmI::MovSx(s, d, so, do_));
            }
            IrI::ZeroExtend { src, dst } => {
                let (s, d) = (asm_type(&src.ty()), asm_type(&dst.ty()));
                let (so, do_) = (self.operand(src), self.operand(dst));
                self.emit(AsmI::MovZeroExtend(s, d, so, do_));
            }
            IrI::Truncate { src, dst } => {
                let d = asm_type(&dst.ty());
                let (so, do_) = (self.operand(src), self.operand(dst));
                self.emit(AsmI::Mov(d, so, do_));
            }
            IrI::DoubleToInt { src, dst } => {
                let d = asm_type(&dst.ty());
                let (so, do_) = (self.operand(src), self.operand(dst));
                self.emit(AsmI::Cvttsd2si(d, so, do_));
            }
            IrI::IntToDouble { src, dst } => {
                let s = asm_type(&src.ty());
                let (so, do_) = (self.operand(src), self.operand(dst));
                self.emit(AsmI::Cvtsi2sd(s, so, do_));
            }
            IrI::DoubleToUInt { src, dst } => self.lower_double_to_uint(src, dst),
            IrI::UIntToDouble { src, dst } => self.lower_uint_to_double(src, dst),
            IrI::Unary { op, src, dst } => self.lower_unary(*op, src, dst),
            IrI::Binary { op, lhs, rhs, dst } => self.lower_binary(*op, lhs, rhs, dst),
            IrI::Copy { src, dst } => {
                let at = asm_type(&dst.ty());
                let (so, do_) = (self.operand(src), self.operand(dst));
                self.emit(AsmI::Mov(at, so, do_));
            }
            IrI::GetAddress { src, dst } => {
                let name = match src {
                    Value::Var(name, _) => *name,
                    _ => unreachable!("internal error: GetAddress source must name an object"),
                };
                let src_op = self.address_operand(name);
                let dst_op = self.operand(dst);
                self.emit(AsmI::Lea(src_op, dst_op));
            }
            IrI::Load { ptr, dst } => {
                let at = asm_type(&dst.ty());
                let ptr_op = self.operand(ptr);
                let dst_op = self.operand(dst);
                self.emit(AsmI::Mov(AsmType::QuadWord, ptr_op, Operand::Reg(Reg::Ax)));
                self.emit(AsmI::Mov(at, Operand::Memory(Reg::Ax, 0), dst_op));
            }
            IrI::Store { src, ptr } => {
                let at = asm_type(&src.ty());
                let src_op = self.operand(src);
                let ptr_op = self.operand(ptr);
                self.emit(AsmI::Mov(AsmType::QuadWord, ptr_op, Operand::Reg(Reg::Ax)));
                self.emit(AsmI::Mov(at, src_op, Operand::Memory(Reg::Ax, 0)));
            }
            IrI::AddPtr { ptr, index, scale, dst } => self.lower_add_ptr(ptr, index, *scale, dst),
            IrI::CopyToOffset { src, dst_name, offset, width, .. } => {
                let at = width_to_asm_type(*width);
                let src_op = self.operand(src);
                self.emit(AsmI::Mov(at, src_op, Operand::PseudoMem(*dst_name, *offset)));
            }
            IrI::Jump(label) => self.emit(AsmI::Jmp(*label)),
            IrI::JumpIfZero(val, label) => self.lower_jump_if(val, *label, true),
            IrI::JumpIfNotZero(val, label) => self.lower_jump_if(val, *label, false),
            IrI::Label(label) => self.emit(AsmI::Label(*label)),
            IrI::FunCall { name, args, dst } => self.lower_call(*name, args, dst.as_ref()),
            IrI::Allocate { bytes, name } => {
                self.aggregate_sizes.insert(*name, *bytes);
            }
        }
    }

    fn lower_return(&mut self, val: Option<&Value>) {
        if let Some(v) = val {
            let at = asm_type(&v.ty());
            let src = self.operand(v);
            let ret_reg = if at.is_double() { Reg::Xmm0 } else { Reg::Ax };
            self.emit(AsmI::Mov(at, src, Operand::Reg(ret_reg)));
        }
        self.emit(AsmI::Ret);
    }

    fn lower_unary(&mut self, op: IrUnOp, src: &Value, dst: &Value) {
        let at = asm_type(&dst.ty());
        match op {
            IrUnOp::Negate if at.is_double() => {
                // `xorpd` requires its memory operand 16-byte aligned, unlike
                // the scalar `movsd`/`addsd`/... constants interned at 8.
                let mask = self.intern_double_bits(0x8000_0000_0000_0000, 16);
                let (so, do_) = (self.operand(src), self.operand(dst));
                self.emit(AsmI::Mov(at, so, do_.clone()));
                self.emit(AsmI::Binary(BinOp::XorDouble, AsmType::Double, Operand::Data(mask, true), do_));
            }
            IrUnOp::Negate | IrUnOp::Complement => {
                let asm_op = if op == IrUnOp::Negate { AsmUnOp::Neg } else { AsmUnOp::Not };
                let (so, do_) = (self.operand(src), self.operand(dst));
                self.emit(AsmI::Mov(at, so, do_.clone()));
                self.emit(AsmI::Unary(asm_op, at, do_));
            }
            IrUnOp::Not => {
                let src_at = asm_type(&src.ty());
                let so = self.operand(src);
                let do_ = self.operand(dst);
                if src_at.is_double() {
                    let zero = self.intern_double(0.0);
                    self.emit(AsmI::Ucomisd(Operand::Data(zero, true), so));
                } else {
                    self.emit(AsmI::Cmp(src_at, Operand::Imm(0), so));
                }
                self.emit(AsmI::Mov(at, Operand::Imm(0), do_.clone()));
                self.emit(AsmI::SetCc(Cond::E, do_));
            }
        }
    }

    /// `.rodata` constant given as a raw bit pattern rather than an `f64`
    /// (the sign-bit mask isn't representable as a normal double literal).
    /// `alignment` is caller-specified because some consumers (`xorpd`'s
    /// memory operand) require 16-byte alignment where a plain scalar
    /// double only needs 8.
    fn intern_double_bits(&mut self, bits: u64, alignment: i64) -> Id {
        if let Some(&name) = self.double_pool.get(&bits) {
            return name;
        }
        let name = crate::common::id(format!("double.{}", self.double_pool.len()));
        self.double_pool.insert(bits, name);
        self.constants.push(AsmTop::StaticConstant { name, alignment, bytes: bits.to_le_bytes().to_vec() });
        name
    }

    fn lower_binary(&mut self, op: IrBinOp, lhs: &Value, rhs: &Value, dst: &Value) {
        let at = asm_type(&lhs.ty());
        if op.is_comparison() {
            return self.lower_compare(op, lhs, rhs, dst);
        }
        match op {
            IrBinOp::Div | IrBinOp::Mod if !at.is_double() => self.lower_divmod(op, lhs, rhs, dst, at),
            _ if at.is_double() => {
                let asm_op = match op {
                    IrBinOp::Add => BinOp::AddDouble,
                    IrBinOp::Sub => BinOp::SubDouble,
                    IrBinOp::Mul => BinOp::MulDouble,
                    IrBinOp::Div => BinOp::DivDouble,
                    _ => unreachable!("internal error: non-arithmetic op on double"),
                };
                let (lo, ro, do_) = (self.operand(lhs), self.operand(rhs), self.operand(dst));
                self.emit(AsmI::Mov(at, lo, do_.clone()));
                self.emit(AsmI::Binary(asm_op, at, ro, do_));
            }
            _ => {
                let signed = is_signed_value(lhs);
                let asm_op = match op {
                    IrBinOp::Add => BinOp::Add,
                    IrBinOp::Sub => BinOp::Sub,
                    IrBinOp::Mul => BinOp::Mul,
                    IrBinOp::BitAnd => BinOp::And,
                    IrBinOp::BitOr => BinOp::Or,
                    IrBinOp::BitXor => BinOp::Xor,
                    IrBinOp::Shl => BinOp::Shl,
                    IrBinOp::Shr if signed => BinOp::SarSigned,
                    IrBinOp::Shr => BinOp::ShrUnsigned,
                    IrBinOp::Div | IrBinOp::Mod => unreachable!(),
                    _ => unreachable!(),
                };
                let (lo, ro, do_) = (self.operand(lhs), self.operand(rhs), self.operand(dst));
                self.emit(AsmI::Mov(at, lo, do_.clone()));
                self.emit(AsmI::Binary(asm_op, at, ro, do_));
            }
        }
    }

    fn lower_divmod(&mut self, op: IrBinOp, lhs: &Value, rhs: &Value, dst: &Value, at: AsmType) {
        let signed = is_signed_value(lhs);
        let (lo, ro, do_) = (self.operand(lhs), self.operand(rhs), self.operand(dst));
        self.emit(AsmI::Mov(at, lo, Operand::Reg(Reg::Ax)));
        if signed {
            self.emit(AsmI::SignExtendAx(at));
            self.emit(AsmI::Idiv(at, ro));
        } else {
            self.emit(AsmI::Mov(at, Operand::Imm(0), Operand::Reg(Reg::Dx)));
            self.emit(AsmI::Div(at, ro));
        }
        let result_reg = if matches!(op, IrBinOp::Mod) { Reg::Dx } else { Reg::Ax };
        self.emit(AsmI::Mov(at, Operand::Reg(result_reg), do_));
    }

    fn lower_compare(&mut self, op: IrBinOp, lhs: &Value, rhs: &Value, dst: &Value) {
        let operand_at = asm_type(&lhs.ty());
        let dst_at = asm_type(&dst.ty());
        let signed = is_signed_value(lhs);
        let (lo, ro, do_) = (self.operand(lhs), self.operand(rhs), self.operand(dst));
        if operand_at.is_double() {
            self.emit(AsmI::Ucomisd(ro, lo));
        } else {
            self.emit(AsmI::Cmp(operand_at, ro, lo));
        }
        let cond = match op {
            IrBinOp::Eq => Cond::E,
            IrBinOp::Ne => Cond::Ne,
            IrBinOp::Lt if signed || operand_at.is_double() => {
                if operand_at.is_double() { Cond::B } else { Cond::L }
            }
            IrBinOp::Lt => Cond::B,
            IrBinOp::Le if signed => Cond::Le,
            IrBinOp::Le => Cond::Be,
            IrBinOp::Gt if signed => Cond::G,
            IrBinOp::Gt => Cond::A,
            IrBinOp::Ge if signed => Cond::Ge,
            IrBinOp::Ge => Cond::Ae,
            _ => unreachable!(),
        };
        self.emit(AsmI::Mov(dst_at, Operand::Imm(0), do_.clone()));
        self.emit(AsmI::SetCc(cond, do_));
    }

    fn lower_jump_if(&mut self, val: &Value, label: Id, want_zero: bool) {
        let at = asm_type(&val.ty());
        let op = self.operand(val);
        if at.is_double() {
            let zero = self.intern_double(0.0);
            self.emit(AsmI::Ucomisd(Operand::Data(zero, true), op));
            if want_zero {
                // Unordered (NaN) never counts as zero: skip the E-branch
                // when the parity flag reports an unordered comparison.
                let skip = self.fresh("dtz.skip");
                self.emit(AsmI::JmpCc(Cond::P, skip));
                self.emit(AsmI::JmpCc(Cond::E, label));
                self.emit(AsmI::Label(skip));
            } else {
                self.emit(AsmI::JmpCc(Cond::Ne, label));
                self.emit(AsmI::JmpCc(Cond::P, label));
            }
        } else {
            self.emit(AsmI::Cmp(at, Operand::Imm(0), op));
            self.emit(AsmI::JmpCc(if want_zero { Cond::E } else { Cond::Ne }, label));
        }
    }

    /// Regular power-of-two scales use a single `lea`; anything else
    /// multiplies the index first. Both sequences route the intermediate
    /// values through `%rax`/`%rdx` (or, for the multiply, `%r10`): a
    /// self-contained computation consumed by the immediately following
    /// `lea`, safe to fix to concrete registers without colliding with any
    /// pseudo's eventual stack slot.
    fn lower_add_ptr(&mut self, ptr: &Value, index: &Value, scale: i64, dst: &Value) {
        let ptr_op = self.operand(ptr);
        let index_op = self.operand(index);
        let dst_op = self.operand(dst);
        self.emit(AsmI::Mov(AsmType::QuadWord, ptr_op, Operand::Reg(Reg::Ax)));
        self.emit(AsmI::Mov(AsmType::QuadWord, index_op, Operand::Reg(Reg::Dx)));
        if matches!(scale, 1 | 2 | 4 | 8) {
            self.emit(AsmI::Lea(Operand::Indexed(Reg::Ax, Reg::Dx, scale), dst_op));
        } else {
            self.emit(AsmI::Binary(BinOp::Mul, AsmType::QuadWord, Operand::Imm(scale as u64), Operand::Reg(Reg::Dx)));
            self.emit(AsmI::Lea(Operand::Indexed(Reg::Ax, Reg::Dx, 1), dst_op));
        }
    }

    /// Full-I64-range double-to-unsigned conversion: below `2^63` a plain
    /// signed `cvttsd2si` is exact; at or above it, subtract `2^63`,
    /// convert the now-in-range remainder, and add the sign bit back.
    /// Narrower unsigned destinations never reach `2^63`, so they skip
    /// straight to the simple case via a 64-bit intermediate.
    fn lower_double_to_uint(&mut self, src: &Value, dst: &Value) {
        let dst_at = asm_type(&dst.ty());
        let src_op = self.operand(src);
        let dst_op = self.operand(dst);
        if dst_at != AsmType::QuadWord {
            let wide = self.fresh("dtoui.wide");
            let wide_op = Operand::Pseudo(wide);
            self.emit(AsmI::Cvttsd2si(AsmType::QuadWord, src_op, wide_op.clone()));
            self.emit(AsmI::Mov(dst_at, wide_op, dst_op));
            return;
        }
        let threshold = self.intern_double(9_223_372_036_854_775_808.0);
        let out_of_range = self.fresh("dtoui.oor");
        let end = self.fresh("dtoui.end");
        let shifted_src = self.fresh("dtoui.shifted");
        let shifted_op = Operand::Pseudo(shifted_src);

        self.emit(AsmI::Ucomisd(Operand::Data(threshold, true), src_op.clone()));
        self.emit(AsmI::JmpCc(Cond::Ae, out_of_range));
        self.emit(AsmI::Cvttsd2si(AsmType::QuadWord, src_op.clone(), dst_op.clone()));
        self.emit(AsmI::Jmp(end));
        self.emit(AsmI::Label(out_of_range));
        self.emit(AsmI::Mov(AsmType::Double, src_op, shifted_op.clone()));
        self.emit(AsmI::Binary(BinOp::SubDouble, AsmType::Double, Operand::Data(threshold, true), shifted_op.clone()));
        self.emit(AsmI::Cvttsd2si(AsmType::QuadWord, shifted_op, dst_op.clone()));
        self.emit(AsmI::Binary(BinOp::Add, AsmType::QuadWord, Operand::Imm(0x8000_0000_0000_0000), dst_op));
        self.emit(AsmI::Label(end));
    }

    /// Unsigned-to-double, mirroring `lower_double_to_uint`: a 32-bit
    /// unsigned source always fits signed 64-bit, so it's zero-extended and
    /// converted directly. A 64-bit unsigned source may set the top bit, so
    /// out of the signed range it's halved (rounding to even via the
    /// preserved low bit) before conversion, then the result is doubled.
    fn lower_uint_to_double(&mut self, src: &Value, dst: &Value) {
        let src_at = asm_type(&src.ty());
        let src_op = self.operand(src);
        let dst_op = self.operand(dst);
        if src_at != AsmType::QuadWord {
            let wide = self.fresh("utod.wide");
            let wide_op = Operand::Pseudo(wide);
            self.emit(AsmI::MovZeroExtend(src_at, AsmType::QuadWord, src_op, wide_op.clone()));
            self.emit(AsmI::Cvtsi2sd(AsmType::QuadWord, wide_op, dst_op));
            return;
        }
        let negative = self.fresh("utod.neg");
        let end = self.fresh("utod.end");
        let halved = self.fresh("utod.halved");
        let parity = self.fresh("utod.parity");
        let halved_op = Operand::Pseudo(halved);
        let parity_op = Operand::Pseudo(parity);

        self.emit(AsmI::Cmp(AsmType::QuadWord, Operand::Imm(0), src_op.clone()));
        self.emit(AsmI::JmpCc(Cond::L, negative));
        self.emit(AsmI::Cvtsi2sd(AsmType::QuadWord, src_op.clone(), dst_op.clone()));
        self.emit(AsmI::Jmp(end));
        self.emit(AsmI::Label(negative));
        self.emit(AsmI::Mov(AsmType::QuadWord, src_op.clone(), halved_op.clone()));
        self.emit(AsmI::Mov(AsmType::QuadWord, src_op, parity_op.clone()));
        self.emit(AsmI::Binary(BinOp::ShrUnsigned, AsmType::QuadWord, Operand::Imm(1), halved_op.clone()));
        self.emit(AsmI::Binary(BinOp::And, AsmType::QuadWord, Operand::Imm(1), parity_op.clone()));
        self.emit(AsmI::Binary(BinOp::Or, AsmType::QuadWord, parity_op, halved_op.clone()));
        self.emit(AsmI::Cvtsi2sd(AsmType::QuadWord, halved_op, dst_op.clone()));
        self.emit(AsmI::Binary(BinOp::AddDouble, AsmType::Double, dst_op.clone(), dst_op));
        self.emit(AsmI::Label(end));
    }

    fn lower_call(&mut self, name: Id, args: &[Value], dst: Option<&Value>) {
        let mut int_args = Vec::new();
        let mut double_args = Vec::new();
        for a in args {
            if asm_type(&a.ty()).is_double() {
                double_args.push(a);
            } else {
                int_args.push(a);
            }
        }
        let int_regs = asm::Reg::INT_ARG_REGS;
        let sse_regs = asm::Reg::SSE_ARG_REGS;
        // Overflow args (beyond either register file's quota) are pushed in
        // their original source-list order, not grouped by kind: an
        // overflowing double ahead of an overflowing int in the call must
        // still land on the stack before it, matching the SysV layout.
        let mut int_seen = 0usize;
        let mut double_seen = 0usize;
        let stack_args: Vec<&Value> = args
            .iter()
            .filter(|a| {
                if asm_type(&a.ty()).is_double() {
                    double_seen += 1;
                    double_seen > sse_regs.len()
                } else {
                    int_seen += 1;
                    int_seen > int_regs.len()
                }
            })
            .collect();

        let padding = stack_args.len() % 2 == 1;
        if padding {
            self.emit(AsmI::Binary(BinOp::Sub, AsmType::QuadWord, Operand::Imm(8), Operand::Reg(Reg::Sp)));
        }
        for a in stack_args.iter().rev() {
            let at = asm_type(&a.ty());
            let op = self.operand(a);
            if at.is_double() || matches!(op, Operand::Imm(_) | Operand::Reg(_)) {
                self.emit(AsmI::Push(op));
            } else {
                self.emit(AsmI::Mov(at, op, Operand::Reg(Reg::Ax)));
                self.emit(AsmI::Push(Operand::Reg(Reg::Ax)));
            }
        }
        for (i, a) in int_args.iter().take(int_regs.len()).enumerate() {
            let at = asm_type(&a.ty());
            let op = self.operand(a);
            self.emit(AsmI::Mov(at, op, Operand::Reg(int_regs[i])));
        }
        for (i, a) in double_args.iter().take(sse_regs.len()).enumerate() {
            let op = self.operand(a);
            self.emit(AsmI::Mov(AsmType::Double, op, Operand::Reg(sse_regs[i])));
        }
        self.emit(AsmI::Call(name));

        let bytes_to_pop = 8 * stack_args.len() as u64 + if padding { 8 } else { 0 };
        if bytes_to_pop > 0 {
            self.emit(AsmI::Binary(BinOp::Add, AsmType::QuadWord, Operand::Imm(bytes_to_pop), Operand::Reg(Reg::Sp)));
        }
        if let Some(d) = dst {
            let at = asm_type(&d.ty());
            let ret_reg = if at.is_double() { Reg::Xmm0 } else { Reg::Ax };
            let dst_op = self.operand(d);
            self.emit(AsmI::Mov(at, Operand::Reg(ret_reg), dst_op));
        }
    }
}

fn width_to_asm_type(width: i64) -> AsmType {
    match width {
        1 => AsmType::Byte,
        4 => AsmType::LongWord,
        8 => AsmType::QuadWord,
        _ => AsmType::QuadWord,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select_src(src: &str) -> asm::Program {
        let (mut prog, errs) = crate::front::parse::parse(src);
        assert!(errs.is_empty(), "{errs:?}");
        let analysis = crate::sema::validate(&mut prog).expect("validate");
        let tir = crate::front::lower::lower(&prog, &analysis);
        let (asm_prog, _) = select(&tir, &analysis.symbols);
        asm_prog
    }

    fn main_instructions(p: &asm::Program) -> &[AsmI] {
        for top in &p.top_level {
            if let AsmTop::Function { name, instructions, .. } = top {
                if name.as_str() == "main" {
                    return instructions;
                }
            }
        }
        panic!("no main function selected");
    }

    #[test]
    fn return_constant_moves_into_ax() {
        let p = select_src("int main(void) { return 7; }");
        let insts = main_instructions(&p);
        assert!(insts.iter().any(|i| matches!(i, AsmI::Mov(AsmType::LongWord, Operand::Imm(7), Operand::Reg(Reg::Ax)))));
        assert!(matches!(insts.last(), Some(AsmI::Ret)));
    }

    #[test]
    fn double_return_moves_into_xmm0() {
        let p = select_src("double main(void) { return 1.5; }");
        let insts = main_instructions(&p);
        assert!(insts.iter().any(|i| matches!(i, AsmI::Mov(AsmType::Double, Operand::Data(_, true), Operand::Reg(Reg::Xmm0)))));
    }

    #[test]
    fn comparison_zeroes_destination_before_setcc() {
        let p = select_src("int main(void) { return 3 < 4; }");
        let insts = main_instructions(&p);
        let zero_then_set = insts.windows(2).any(|w| {
            matches!(w[0], AsmI::Mov(_, Operand::Imm(0), _)) && matches!(w[1], AsmI::SetCc(..))
        });
        assert!(zero_then_set);
    }

    #[test]
    fn call_classifies_integer_args_into_abi_registers() {
        let p = select_src("int f(int a, int b) { return a + b; } int main(void) { return f(1, 2); }");
        let insts = main_instructions(&p);
        assert!(insts.iter().any(|i| matches!(i, AsmI::Mov(AsmType::LongWord, Operand::Imm(1), Operand::Reg(Reg::Di)))));
        assert!(insts.iter().any(|i| matches!(i, AsmI::Mov(AsmType::LongWord, Operand::Imm(2), Operand::Reg(Reg::Si)))));
        assert!(insts.iter().any(|i| matches!(i, AsmI::Call(n) if n.as_str() == "f")));
    }

    #[test]
    fn call_preserves_source_order_for_mixed_overflow_stack_args() {
        // 6 int + 9 double args: the 9th double and the 7th int both overflow
        // their register files, and the double appears first in source order.
        // Grouping stack args by kind (ints-then-doubles) would push the int
        // first; the fix must push the double first instead.
        let src = "void f(int a0,int a1,int a2,int a3,int a4,int a5,\
                   double d0,double d1,double d2,double d3,double d4,double d5,double d6,double d7,double d8,\
                   int a6) {}\
                   int main(void) { f(0,1,2,3,4,5, 0.0,1.0,2.0,3.0,4.0,5.0,6.0,7.0,8.0, 6); return 0; }";
        let p = select_src(src);
        let insts = main_instructions(&p);
        let push_positions: Vec<usize> =
            insts.iter().enumerate().filter(|(_, i)| matches!(i, AsmI::Push(_))).map(|(i, _)| i).collect();
        assert_eq!(push_positions.len(), 2, "expected exactly two stack args pushed: {insts:?}");
        let first_push_idx = push_positions[0];
        let first_push_is_int =
            first_push_idx > 0 && matches!(&insts[first_push_idx - 1], AsmI::Mov(AsmType::LongWord, _, Operand::Reg(Reg::Ax)));
        assert!(!first_push_is_int, "overflow double must push before the overflow int: {insts:?}");
    }

    #[test]
    fn global_variable_becomes_static_object() {
        let p = select_src("int g = 5; int main(void) { return g; }");
        assert!(p.top_level.iter().any(|t| matches!(t, AsmTop::StaticObject { name, .. } if name.as_str() == "g")));
    }

    #[test]
    fn allocate_records_aggregate_size_without_emitting_an_instruction() {
        let (mut prog, errs) = crate::front::parse::parse("int main(void) { int a[4] = {1,2,3,4}; return a[0]; }");
        assert!(errs.is_empty(), "{errs:?}");
        let analysis = crate::sema::validate(&mut prog).expect("validate");
        let tir = crate::front::lower::lower(&prog, &analysis);
        let (_, sizes) = select(&tir, &analysis.symbols);
        assert!(sizes.values().any(|&b| b == 16));
    }
}
