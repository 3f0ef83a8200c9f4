//! Pseudo-register replacement: assigns every [`Operand::Pseudo`]/
//! [`Operand::PseudoMem`] left by instruction selection a concrete
//! `%rbp`-relative [`Operand::Memory`] slot, and computes each function's
//! frame size.
//!
//! One pass per function, left to right. A running (negative) stack
//! pointer is decremented by each newly seen pseudo's size and then rounded
//! down to that size's natural alignment, so `Operand::Memory(Bp, offset)`
//! can be read straight off the map on every later reference to the same
//! name. Static/extern identification already happened in
//! [`crate::back::select`] — this pass only ever sees automatic locals and
//! compiler temporaries, never a name with its own linker symbol.

use crate::back::asm::{AsmType, BinOp, Instruction as AsmI, Operand, Program, Reg, TopLevel};
use crate::back::select::AggregateSizes;
use crate::common::{round_down, Id, Map};

pub fn replace(program: &mut Program, aggregate_sizes: &AggregateSizes) {
    for top in &mut program.top_level {
        if let TopLevel::Function { instructions, stack_size, .. } = top {
            let mut r = Replacer { offsets: Map::new(), stack_ptr: 0, aggregate_sizes };
            for inst in instructions.iter_mut() {
                r.instruction(inst);
            }
            *stack_size = -round_down(r.stack_ptr, 16);
        }
    }
}

struct Replacer<'a> {
    offsets: Map<Id, i64>,
    stack_ptr: i64,
    aggregate_sizes: &'a AggregateSizes,
}

impl<'a> Replacer<'a> {
    fn slot_for_scalar(&mut self, name: Id, at: AsmType) -> i64 {
        if let Some(&off) = self.offsets.get(&name) {
            return off;
        }
        self.stack_ptr -= at.size();
        self.stack_ptr = round_down(self.stack_ptr, at.alignment());
        self.offsets.insert(name, self.stack_ptr);
        self.stack_ptr
    }

    fn slot_for_aggregate(&mut self, name: Id) -> i64 {
        if let Some(&off) = self.offsets.get(&name) {
            return off;
        }
        let bytes = *self.aggregate_sizes.get(&name).unwrap_or(&8);
        let align = if bytes >= 16 { 16 } else { 8 };
        self.stack_ptr -= bytes;
        self.stack_ptr = round_down(self.stack_ptr, align);
        self.offsets.insert(name, self.stack_ptr);
        self.stack_ptr
    }

    /// Replace `op` in place if it's a scalar pseudo of width `at`.
    fn scalar(&mut self, op: &mut Operand, at: AsmType) {
        if let Operand::Pseudo(name) = *op {
            let off = self.slot_for_scalar(name, at);
            *op = Operand::Memory(Reg::Bp, off);
        }
    }

    /// Replace `op` in place if it's the address of an aggregate pseudo (a
    /// `Lea` source, or a `CopyToOffset` target already expressed in
    /// `select` as a `PseudoMem`).
    fn address(&mut self, op: &mut Operand) {
        match *op {
            Operand::PseudoMem(name, extra) => {
                let base = self.slot_for_aggregate(name);
                *op = Operand::Memory(Reg::Bp, base + extra);
            }
            Operand::Pseudo(name) => {
                let off = self.slot_for_scalar(name, AsmType::QuadWord);
                *op = Operand::Memory(Reg::Bp, off);
            }
            _ => {}
        }
    }

    fn instruction(&mut self, inst: &mut AsmI) {
        match inst {
            AsmI::Mov(at, src, dst) => {
                self.scalar(src, *at);
                self.scalar(dst, *at);
            }
            AsmI::MovSx(s, d, src, dst) => {
                self.scalar(src, *s);
                self.scalar(dst, *d);
            }
            AsmI::MovZeroExtend(s, d, src, dst) => {
                self.scalar(src, *s);
                self.scalar(dst, *d);
            }
            AsmI::Lea(src, dst) => {
                self.address(src);
                self.scalar(dst, AsmType::QuadWord);
            }
            AsmI::Cvttsd2si(at, src, dst) => {
                self.scalar(src, AsmType::Double);
                self.scalar(dst, *at);
            }
            AsmI::Cvtsi2sd(at, src, dst) => {
                self.scalar(src, *at);
                self.scalar(dst, AsmType::Double);
            }
            AsmI::Unary(_, at, op) => self.scalar(op, *at),
            AsmI::Binary(op, at, src, dst) => {
                let width = if matches!(op, BinOp::AddDouble | BinOp::SubDouble | BinOp::MulDouble | BinOp::DivDouble | BinOp::XorDouble) {
                    AsmType::Double
                } else {
                    *at
                };
                self.scalar(src, width);
                self.scalar(dst, width);
            }
            AsmI::Cmp(at, a, b) => {
                self.scalar(a, *at);
                self.scalar(b, *at);
            }
            AsmI::Ucomisd(a, b) => {
                self.scalar(a, AsmType::Double);
                self.scalar(b, AsmType::Double);
            }
            AsmI::Idiv(at, op) | AsmI::Div(at, op) => self.scalar(op, *at),
            AsmI::SignExtendAx(_) => {}
            AsmI::Jmp(_) | AsmI::JmpCc(_, _) | AsmI::Label(_) | AsmI::Call(_) | AsmI::Ret => {}
            AsmI::SetCc(_, op) => self.scalar(op, AsmType::QuadWord),
            AsmI::Push(op) => self.scalar(op, AsmType::QuadWord),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::back::select::select;
    use crate::common::id;

    fn placed(src: &str) -> Program {
        let (mut prog, errs) = crate::front::parse::parse(src);
        assert!(errs.is_empty(), "{errs:?}");
        let analysis = crate::sema::validate(&mut prog).expect("validate");
        let tir = crate::front::lower::lower(&prog, &analysis);
        let (mut asm_prog, sizes) = select(&tir, &analysis.symbols);
        replace(&mut asm_prog, &sizes);
        asm_prog
    }

    fn main_fn(p: &Program) -> (&[AsmI], i64) {
        for top in &p.top_level {
            if let TopLevel::Function { name, instructions, stack_size } = top {
                if name.as_str() == "main" {
                    return (instructions, *stack_size);
                }
            }
        }
        panic!("no main");
    }

    #[test]
    fn no_pseudo_operands_survive() {
        let p = placed("int main(void) { int x = 1; int y = 2; return x + y; }");
        let (insts, _) = main_fn(&p);
        for i in insts {
            let has_pseudo = format!("{i:?}").contains("Pseudo");
            assert!(!has_pseudo, "{i:?} still references a pseudo");
        }
    }

    #[test]
    fn frame_size_is_16_aligned() {
        let p = placed("int main(void) { int a = 1; int b = 2; int c = 3; return a + b + c; }");
        let (_, stack_size) = main_fn(&p);
        assert_eq!(stack_size % 16, 0);
    }

    #[test]
    fn scalar_slot_offset_is_a_multiple_of_its_size() {
        let p = placed("int main(void) { double d = 1.0; return 0; }");
        let (insts, _) = main_fn(&p);
        let mut saw = false;
        for i in insts {
            if let AsmI::Mov(AsmType::Double, _, Operand::Memory(Reg::Bp, off)) = i {
                assert_eq!(off % 8, 0);
                saw = true;
            }
        }
        assert!(saw);
    }

    #[test]
    fn aggregate_pseudomem_is_placed_and_indexable_by_offset() {
        let p = placed("int main(void) { int a[4] = {1,2,3,4}; return a[2]; }");
        let (insts, _) = main_fn(&p);
        let _ = id("a");
        assert!(insts.iter().any(|i| matches!(i, AsmI::Mov(AsmType::LongWord, Operand::Imm(_), Operand::Memory(Reg::Bp, _)))));
    }

    use proptest::prelude::*;

    fn any_asm_type() -> impl Strategy<Value = AsmType> {
        prop_oneof![
            Just(AsmType::Byte),
            Just(AsmType::LongWord),
            Just(AsmType::QuadWord),
            Just(AsmType::Double),
        ]
    }

    proptest! {
        /// §8 testable property 3: every pseudo slot offset is a multiple of
        /// its own `AsmType`'s size, no matter which names and widths a
        /// function happens to allocate in.
        #[test]
        fn scalar_slots_are_naturally_aligned(widths in prop::collection::vec(any_asm_type(), 1..12)) {
            let mut r = Replacer { offsets: Map::new(), stack_ptr: 0, aggregate_sizes: &Map::new() };
            for (i, at) in widths.iter().enumerate() {
                let name = crate::common::id(format!("slot.{i}"));
                let off = r.slot_for_scalar(name, *at);
                prop_assert_eq!(off % at.size(), 0);
            }
        }

        /// Re-requesting the same name's slot always returns the offset it
        /// was first assigned, regardless of what's been allocated since.
        #[test]
        fn repeated_lookups_are_stable(widths in prop::collection::vec(any_asm_type(), 1..12)) {
            let mut r = Replacer { offsets: Map::new(), stack_ptr: 0, aggregate_sizes: &Map::new() };
            let mut first = Vec::new();
            for (i, at) in widths.iter().enumerate() {
                let name = crate::common::id(format!("slot.{i}"));
                first.push(r.slot_for_scalar(name, *at));
            }
            for (i, at) in widths.iter().enumerate() {
                let name = crate::common::id(format!("slot.{i}"));
                prop_assert_eq!(r.slot_for_scalar(name, *at), first[i]);
            }
        }
    }
}
