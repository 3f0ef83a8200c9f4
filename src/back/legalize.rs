//! Legalization: the last pass over the pseudo-machine tree, run after
//! [`crate::back::pseudo`] has turned every operand into a concrete
//! register, immediate, or `%rbp`-relative memory location. Rewrites the
//! encodings the CPU can't actually execute (memory-to-memory moves, an
//! immediate destination, a non-register SSE operand where one is required,
//! ...) into sequences that stay within real instruction forms, borrowing
//! `%r10`/`%r11` (integer) and `%xmm14`/`%xmm15` (SSE) as scratch. Nothing
//! upstream of this pass may use those four registers; this is the only
//! place that does.
//!
//! Also prepends the stack-frame adjustment (`sub $frame, %rsp`) that
//! reserves the locals computed by pseudo-register replacement; the
//! `push %rbp` / `mov %rsp, %rbp` framing around it is the emitter's job,
//! not this pass's.

use crate::back::asm::{AsmType, BinOp, Cond, Instruction as AsmI, Operand, Program, Reg, TopLevel};

pub fn legalize(program: &mut Program) {
    for top in &mut program.top_level {
        if let TopLevel::Function { instructions, stack_size, .. } = top {
            let mut out = Vec::with_capacity(instructions.len() + 1);
            if *stack_size > 0 {
                out.push(AsmI::Binary(BinOp::Sub, AsmType::QuadWord, Operand::Imm(*stack_size as u64), Operand::Reg(Reg::Sp)));
            }
            for inst in instructions.drain(..) {
                legalize_one(inst, &mut out);
            }
            *instructions = out;
            // Consumed: a second pass over already-legalized output (the
            // idempotence property) must not prepend another adjustment.
            *stack_size = 0;
        }
    }
}

fn is_reg(op: &Operand) -> bool {
    matches!(op, Operand::Reg(_))
}

/// Every integer instruction's immediate field is a 32-bit value, sign-
/// extended to the operand's width; a `QuadWord` immediate outside that
/// range (e.g. the `2^63` sign bit used by the unsigned double conversions)
/// has no direct encoding and must be materialized into a register first.
fn fits_imm32(v: u64) -> bool {
    let v = v as i64;
    v >= i32::MIN as i64 && v <= i32::MAX as i64
}

fn legalize_one(inst: AsmI, out: &mut Vec<AsmI>) {
    match inst {
        AsmI::Mov(at, src, dst) if src.is_memory() && dst.is_memory() => {
            out.push(AsmI::Mov(at, src, Operand::Reg(Reg::R10)));
            out.push(AsmI::Mov(at, Operand::Reg(Reg::R10), dst));
        }
        AsmI::MovSx(s, d, src, dst) if src.is_immediate() => {
            out.push(AsmI::Mov(s, src, Operand::Reg(Reg::R10)));
            out.push(AsmI::MovSx(s, d, Operand::Reg(Reg::R10), dst));
        }
        AsmI::MovSx(s, d, src, dst) if dst.is_memory() => {
            out.push(AsmI::MovSx(s, d, src, Operand::Reg(Reg::R11)));
            out.push(AsmI::Mov(d, Operand::Reg(Reg::R11), dst));
        }
        AsmI::MovZeroExtend(_, _, src, dst) if is_reg(&dst) => {
            out.push(AsmI::Mov(AsmType::QuadWord, src, dst));
        }
        AsmI::MovZeroExtend(s, d, src, dst) if dst.is_memory() => {
            out.push(AsmI::Mov(s, src, Operand::Reg(Reg::R11)));
            out.push(AsmI::Mov(d, Operand::Reg(Reg::R11), dst));
        }
        AsmI::Lea(src, dst) if dst.is_memory() => {
            out.push(AsmI::Lea(src, Operand::Reg(Reg::R11)));
            out.push(AsmI::Mov(AsmType::QuadWord, Operand::Reg(Reg::R11), dst));
        }
        AsmI::Binary(op, at, src, dst)
            if matches!(op, BinOp::Shl | BinOp::SarSigned | BinOp::ShrUnsigned) && !matches!(src, Operand::Imm(_) | Operand::Reg(Reg::Cx)) =>
        {
            out.push(AsmI::Mov(AsmType::QuadWord, src, Operand::Reg(Reg::Cx)));
            out.push(AsmI::Binary(op, at, Operand::Reg(Reg::Cx), dst));
        }
        // Every integer instruction's immediate is encoded as a 32-bit
        // field, sign-extended to the operand width; anything wider (e.g.
        // the `2^63` sign bit the unsigned double conversions add back)
        // can't be encoded directly and must be loaded into a register
        // first. Re-dispatched through `legalize_one` since the resulting
        // instruction (e.g. `imul %r10, <memory>`) may still need its own
        // rewrite.
        AsmI::Binary(op, AsmType::QuadWord, Operand::Imm(v), dst)
            if !fits_imm32(v) && !matches!(op, BinOp::Shl | BinOp::SarSigned | BinOp::ShrUnsigned) =>
        {
            out.push(AsmI::Mov(AsmType::QuadWord, Operand::Imm(v), Operand::Reg(Reg::R10)));
            legalize_one(AsmI::Binary(op, AsmType::QuadWord, Operand::Reg(Reg::R10), dst), out);
        }
        AsmI::Binary(BinOp::Mul, at, src, dst) if dst.is_memory() => {
            out.push(AsmI::Mov(at, dst.clone(), Operand::Reg(Reg::R11)));
            out.push(AsmI::Binary(BinOp::Mul, at, src, Operand::Reg(Reg::R11)));
            out.push(AsmI::Mov(at, Operand::Reg(Reg::R11), dst));
        }
        AsmI::Binary(op, AsmType::Double, src, dst)
            if matches!(op, BinOp::AddDouble | BinOp::SubDouble | BinOp::MulDouble | BinOp::DivDouble | BinOp::XorDouble) && dst.is_memory() =>
        {
            out.push(AsmI::Mov(AsmType::Double, dst.clone(), Operand::Reg(Reg::Xmm15)));
            out.push(AsmI::Binary(op, AsmType::Double, src, Operand::Reg(Reg::Xmm15)));
            out.push(AsmI::Mov(AsmType::Double, Operand::Reg(Reg::Xmm15), dst));
        }
        AsmI::Binary(op, at, src, dst) if src.is_memory() && dst.is_memory() => {
            out.push(AsmI::Mov(at, src, Operand::Reg(Reg::R10)));
            out.push(AsmI::Binary(op, at, Operand::Reg(Reg::R10), dst));
        }
        AsmI::Cmp(at, a, b) if b.is_immediate() => {
            out.push(AsmI::Mov(at, b, Operand::Reg(Reg::R11)));
            out.push(AsmI::Cmp(at, a, Operand::Reg(Reg::R11)));
        }
        AsmI::Cmp(at, a, b) if a.is_memory() && b.is_memory() => {
            out.push(AsmI::Mov(at, a, Operand::Reg(Reg::R10)));
            out.push(AsmI::Cmp(at, Operand::Reg(Reg::R10), b));
        }
        AsmI::Ucomisd(a, b) if !is_reg(&b) => {
            out.push(AsmI::Mov(AsmType::Double, b, Operand::Reg(Reg::Xmm15)));
            out.push(AsmI::Ucomisd(a, Operand::Reg(Reg::Xmm15)));
        }
        AsmI::Idiv(at, op) if op.is_immediate() || op.is_memory() => {
            out.push(AsmI::Mov(at, op, Operand::Reg(Reg::R10)));
            out.push(AsmI::Idiv(at, Operand::Reg(Reg::R10)));
        }
        AsmI::Div(at, op) if op.is_immediate() || op.is_memory() => {
            out.push(AsmI::Mov(at, op, Operand::Reg(Reg::R10)));
            out.push(AsmI::Div(at, Operand::Reg(Reg::R10)));
        }
        AsmI::Cvttsd2si(at, src, dst) if dst.is_memory() => {
            out.push(AsmI::Cvttsd2si(at, src, Operand::Reg(Reg::R11)));
            out.push(AsmI::Mov(at, Operand::Reg(Reg::R11), dst));
        }
        AsmI::Cvtsi2sd(at, src, dst) if src.is_immediate() => {
            out.push(AsmI::Mov(at, src, Operand::Reg(Reg::R10)));
            out.push(AsmI::Cvtsi2sd(at, Operand::Reg(Reg::R10), dst));
        }
        AsmI::Cvtsi2sd(at, src, dst) if dst.is_memory() => {
            out.push(AsmI::Cvtsi2sd(at, src, Operand::Reg(Reg::Xmm15)));
            out.push(AsmI::Mov(AsmType::Double, Operand::Reg(Reg::Xmm15), dst));
        }
        other => out.push(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::back::pseudo::replace;
    use crate::back::select::select;

    fn legalized(src: &str) -> Program {
        let (mut prog, errs) = crate::front::parse::parse(src);
        assert!(errs.is_empty(), "{errs:?}");
        let analysis = crate::sema::validate(&mut prog).expect("validate");
        let tir = crate::front::lower::lower(&prog, &analysis);
        let (mut asm_prog, sizes) = select(&tir, &analysis.symbols);
        replace(&mut asm_prog, &sizes);
        legalize(&mut asm_prog);
        asm_prog
    }

    fn main_insts(p: &Program) -> &[AsmI] {
        for top in &p.top_level {
            if let TopLevel::Function { name, instructions, .. } = top {
                if name.as_str() == "main" {
                    return instructions;
                }
            }
        }
        panic!("no main");
    }

    #[test]
    fn no_memory_to_memory_mov_survives() {
        let p = legalized("int main(void) { int a = 1; int b = a; return b; }");
        for i in main_insts(&p) {
            if let AsmI::Mov(_, src, dst) = i {
                assert!(!(src.is_memory() && dst.is_memory()), "{i:?}");
            }
        }
    }

    #[test]
    fn double_binary_never_writes_directly_to_memory() {
        let p = legalized("double main(void) { double a = 1.0; double b = 2.0; return a + b; }");
        for i in main_insts(&p) {
            if let AsmI::Binary(BinOp::AddDouble | BinOp::SubDouble | BinOp::MulDouble | BinOp::DivDouble, _, _, dst) = i {
                assert!(!dst.is_memory(), "{i:?}");
            }
        }
    }

    #[test]
    fn positive_frame_size_gets_a_leading_stack_adjustment() {
        let p = legalized("int main(void) { int a = 1; return a; }");
        let insts = main_insts(&p);
        assert!(matches!(insts.first(), Some(AsmI::Binary(BinOp::Sub, AsmType::QuadWord, Operand::Imm(_), Operand::Reg(Reg::Sp)))));
    }

    #[test]
    fn no_out_of_range_immediate_survives_in_a_binary_instruction() {
        let p = legalized("unsigned long f(double d) { return (unsigned long)d; }");
        for top in &p.top_level {
            if let TopLevel::Function { instructions, .. } = top {
                for i in instructions {
                    if let AsmI::Binary(_, AsmType::QuadWord, Operand::Imm(v), _) = i {
                        assert!(fits_imm32(*v), "{i:?} has an unencodable immediate");
                    }
                }
            }
        }
    }

    #[test]
    fn idempotent_on_its_own_output() {
        let mut p = legalized("int main(void) { int a = 1; int b = 2; return a + b; }");
        let before = format!("{p:?}");
        legalize(&mut p);
        assert_eq!(format!("{p:?}"), before);
    }
}
