//! Renders a legalized [`asm::Program`] as GNU-assembler (AT&T syntax,
//! x86-64, Linux) text.
//!
//! Append-only: every top level is written in order with whatever section
//! directive it needs immediately in front of it, rather than grouped and
//! sorted into one `.text`/`.data`/`.bss` each — the assembler is perfectly
//! happy to see a section directive more than once, and this keeps the
//! emitter a single linear pass with no buffering pass of its own.
//!
//! A function's `Ret` instructions each get their own epilogue
//! (`movq %rbp, %rsp; popq %rbp; ret`) written out in place, since a
//! function may return from more than one point; the fixed prologue
//! (`pushq %rbp; movq %rsp, %rbp`) is written once, before the legalized
//! body (which already carries its own `sub $N, %rsp` frame adjustment, see
//! [`crate::back::legalize`]).

use std::fmt::Write as _;

use crate::back::asm::{AsmType, BinOp, Cond, Instruction as AsmI, Operand, Program, Reg, TopLevel, UnOp};
use crate::middle::tir::StaticInit;

pub fn emit(program: &Program) -> String {
    let mut out = String::new();
    for top in &program.top_level {
        match top {
            TopLevel::Function { name, global, instructions, .. } => emit_function(&mut out, *name, *global, instructions),
            TopLevel::StaticObject { name, global, alignment, init } => emit_static_object(&mut out, *name, *global, *alignment, init),
            TopLevel::StaticConstant { name, alignment, bytes } => emit_static_constant(&mut out, *name, *alignment, bytes),
        }
    }
    out.push_str("    .section .note.GNU-stack,\"\",@progbits\n");
    out
}

fn emit_function(out: &mut String, name: crate::common::Id, global: bool, instructions: &[AsmI]) {
    out.push_str("    .text\n");
    if global {
        let _ = writeln!(out, "    .globl {name}");
    }
    let _ = writeln!(out, "{name}:");
    out.push_str("    pushq %rbp\n");
    out.push_str("    movq %rsp, %rbp\n");
    for inst in instructions {
        emit_instruction(out, inst);
    }
}

fn is_all_zero(init: &[StaticInit]) -> bool {
    init.iter().all(|i| matches!(i, StaticInit::Zero(_) | StaticInit::PointerZero))
}

fn zero_total(init: &[StaticInit]) -> i64 {
    init.iter()
        .map(|i| match i {
            StaticInit::Zero(n) => *n,
            StaticInit::PointerZero => 8,
            _ => 0,
        })
        .sum()
}

fn emit_static_object(out: &mut String, name: crate::common::Id, global: bool, alignment: i64, init: &[StaticInit]) {
    if global {
        let _ = writeln!(out, "    .globl {name}");
    }
    if is_all_zero(init) {
        out.push_str("    .bss\n");
        let _ = writeln!(out, "    .align {alignment}");
        let _ = writeln!(out, "{name}:");
        let _ = writeln!(out, "    .zero {}", zero_total(init));
        return;
    }
    out.push_str("    .data\n");
    let _ = writeln!(out, "    .align {alignment}");
    let _ = writeln!(out, "{name}:");
    for item in init {
        emit_static_init(out, item);
    }
}

fn emit_static_constant(out: &mut String, name: crate::common::Id, alignment: i64, bytes: &[u8]) {
    out.push_str("    .section .rodata\n");
    let _ = writeln!(out, "    .align {alignment}");
    let _ = writeln!(out, ".L{name}:");
    let _ = writeln!(out, "    .byte {}", bytes.iter().map(|b| b.to_string()).collect::<Vec<_>>().join(", "));
}

fn emit_static_init(out: &mut String, item: &StaticInit) {
    match item {
        StaticInit::Int(bits, base) => match base.size() {
            1 => {
                let _ = writeln!(out, "    .byte {}", (*bits as u8));
            }
            2 => {
                let _ = writeln!(out, "    .value {}", (*bits as u16));
            }
            4 => {
                let _ = writeln!(out, "    .long {}", (*bits as u32));
            }
            _ => {
                let _ = writeln!(out, "    .quad {bits}");
            }
        },
        StaticInit::Double(d) => {
            let _ = writeln!(out, "    .quad {}", d.to_bits());
        }
        StaticInit::Zero(n) => {
            let _ = writeln!(out, "    .zero {n}");
        }
        StaticInit::PointerZero => {
            out.push_str("    .quad 0\n");
        }
        StaticInit::String(bytes, null_terminated) => {
            let escaped = escape_ascii(bytes);
            if *null_terminated {
                let _ = writeln!(out, "    .asciz \"{escaped}\"");
            } else {
                let _ = writeln!(out, "    .ascii \"{escaped}\"");
            }
        }
    }
}

fn escape_ascii(bytes: &[u8]) -> String {
    let mut s = String::new();
    for &b in bytes {
        match b {
            b'"' => s.push_str("\\\""),
            b'\\' => s.push_str("\\\\"),
            b'\n' => s.push_str("\\n"),
            b'\t' => s.push_str("\\t"),
            0x20..=0x7e => s.push(b as char),
            _ => {
                let _ = write!(s, "\\{:03o}", b);
            }
        }
    }
    s
}

fn suffix(at: AsmType) -> &'static str {
    match at {
        AsmType::Byte => "b",
        AsmType::Word => "w",
        AsmType::LongWord => "l",
        AsmType::QuadWord => "q",
        AsmType::Double => unreachable!("internal error: double has no integer mnemonic suffix"),
    }
}

fn gp_name(r: Reg, at: AsmType) -> &'static str {
    use AsmType::*;
    use Reg::*;
    match (r, at) {
        (Ax, Byte) => "al",
        (Ax, Word) => "ax",
        (Ax, LongWord) => "eax",
        (Ax, QuadWord) => "rax",
        (Cx, Byte) => "cl",
        (Cx, Word) => "cx",
        (Cx, LongWord) => "ecx",
        (Cx, QuadWord) => "rcx",
        (Dx, Byte) => "dl",
        (Dx, Word) => "dx",
        (Dx, LongWord) => "edx",
        (Dx, QuadWord) => "rdx",
        (Di, Byte) => "dil",
        (Di, Word) => "di",
        (Di, LongWord) => "edi",
        (Di, QuadWord) => "rdi",
        (Si, Byte) => "sil",
        (Si, Word) => "si",
        (Si, LongWord) => "esi",
        (Si, QuadWord) => "rsi",
        (R8, Byte) => "r8b",
        (R8, Word) => "r8w",
        (R8, LongWord) => "r8d",
        (R8, QuadWord) => "r8",
        (R9, Byte) => "r9b",
        (R9, Word) => "r9w",
        (R9, LongWord) => "r9d",
        (R9, QuadWord) => "r9",
        (R10, Byte) => "r10b",
        (R10, Word) => "r10w",
        (R10, LongWord) => "r10d",
        (R10, QuadWord) => "r10",
        (R11, Byte) => "r11b",
        (R11, Word) => "r11w",
        (R11, LongWord) => "r11d",
        (R11, QuadWord) => "r11",
        (Sp, Byte) => "spl",
        (Sp, Word) => "sp",
        (Sp, LongWord) => "esp",
        (Sp, QuadWord) => "rsp",
        (Bp, Byte) => "bpl",
        (Bp, Word) => "bp",
        (Bp, LongWord) => "ebp",
        (Bp, QuadWord) => "rbp",
        (reg, _) if reg.is_sse() => sse_name(reg),
        _ => unreachable!("internal error: no GP register name for {r:?}/{at:?}"),
    }
}

fn sse_name(r: Reg) -> &'static str {
    match r {
        Reg::Xmm0 => "xmm0",
        Reg::Xmm1 => "xmm1",
        Reg::Xmm2 => "xmm2",
        Reg::Xmm3 => "xmm3",
        Reg::Xmm4 => "xmm4",
        Reg::Xmm5 => "xmm5",
        Reg::Xmm6 => "xmm6",
        Reg::Xmm7 => "xmm7",
        Reg::Xmm14 => "xmm14",
        Reg::Xmm15 => "xmm15",
        _ => unreachable!("internal error: {r:?} is not an SSE register"),
    }
}

fn operand(op: &Operand, at: AsmType) -> String {
    match op {
        Operand::Imm(v) => format!("${v}"),
        Operand::Reg(r) if r.is_sse() => format!("%{}", sse_name(*r)),
        Operand::Reg(r) => format!("%{}", gp_name(*r, at)),
        Operand::Memory(base, 0) => format!("(%{})", gp_name(*base, AsmType::QuadWord)),
        Operand::Memory(base, off) => format!("{off}(%{})", gp_name(*base, AsmType::QuadWord)),
        Operand::Data(name, true) => format!(".L{name}(%rip)"),
        Operand::Data(name, false) => format!("{name}(%rip)"),
        Operand::Indexed(base, index, scale) => {
            format!("(%{}, %{}, {scale})", gp_name(*base, AsmType::QuadWord), gp_name(*index, AsmType::QuadWord))
        }
        Operand::Pseudo(_) | Operand::PseudoMem(..) => {
            unreachable!("internal error: pseudo operand reached the emitter")
        }
    }
}

fn cond_suffix(c: Cond) -> &'static str {
    match c {
        Cond::E => "e",
        Cond::Ne => "ne",
        Cond::L => "l",
        Cond::Le => "le",
        Cond::G => "g",
        Cond::Ge => "ge",
        Cond::A => "a",
        Cond::Ae => "ae",
        Cond::B => "b",
        Cond::Be => "be",
        Cond::P => "p",
    }
}

fn emit_instruction(out: &mut String, inst: &AsmI) {
    match inst {
        AsmI::Mov(AsmType::Double, src, dst) => {
            let _ = writeln!(out, "    movsd {}, {}", operand(src, AsmType::Double), operand(dst, AsmType::Double));
        }
        AsmI::Mov(at, src, dst) => {
            let _ = writeln!(out, "    mov{} {}, {}", suffix(*at), operand(src, *at), operand(dst, *at));
        }
        AsmI::MovSx(s, d, src, dst) => {
            let _ = writeln!(out, "    movs{}{} {}, {}", suffix(*s), suffix(*d), operand(src, *s), operand(dst, *d));
        }
        AsmI::MovZeroExtend(s, d, src, dst) => {
            let _ = writeln!(out, "    movz{}{} {}, {}", suffix(*s), suffix(*d), operand(src, *s), operand(dst, *d));
        }
        AsmI::Lea(src, dst) => {
            let _ = writeln!(out, "    leaq {}, {}", operand(src, AsmType::QuadWord), operand(dst, AsmType::QuadWord));
        }
        AsmI::Cvttsd2si(at, src, dst) => {
            let _ = writeln!(out, "    cvttsd2si{} {}, {}", suffix(*at), operand(src, AsmType::Double), operand(dst, *at));
        }
        AsmI::Cvtsi2sd(at, src, dst) => {
            let _ = writeln!(out, "    cvtsi2sd{} {}, {}", suffix(*at), operand(src, *at), operand(dst, AsmType::Double));
        }
        AsmI::Unary(op, at, operand_) => {
            let mnemonic = match op {
                UnOp::Neg => "neg",
                UnOp::Not => "not",
            };
            let _ = writeln!(out, "    {}{} {}", mnemonic, suffix(*at), operand(operand_, *at));
        }
        AsmI::Binary(op, at, src, dst) => emit_binary(out, *op, *at, src, dst),
        AsmI::Cmp(at, a, b) => {
            let _ = writeln!(out, "    cmp{} {}, {}", suffix(*at), operand(a, *at), operand(b, *at));
        }
        AsmI::Ucomisd(a, b) => {
            let _ = writeln!(out, "    ucomisd {}, {}", operand(a, AsmType::Double), operand(b, AsmType::Double));
        }
        AsmI::Idiv(at, op) => {
            let _ = writeln!(out, "    idiv{} {}", suffix(*at), operand(op, *at));
        }
        AsmI::Div(at, op) => {
            let _ = writeln!(out, "    div{} {}", suffix(*at), operand(op, *at));
        }
        AsmI::SignExtendAx(at) => {
            out.push_str(if matches!(at, AsmType::QuadWord) { "    cqto\n" } else { "    cltd\n" });
        }
        AsmI::Jmp(label) => {
            let _ = writeln!(out, "    jmp {label}");
        }
        AsmI::JmpCc(cond, label) => {
            let _ = writeln!(out, "    j{} {label}", cond_suffix(*cond));
        }
        AsmI::SetCc(cond, op) => {
            let _ = writeln!(out, "    set{} {}", cond_suffix(*cond), operand(op, AsmType::Byte));
        }
        AsmI::Label(label) => {
            let _ = writeln!(out, "{label}:");
        }
        AsmI::Push(op) => {
            let _ = writeln!(out, "    pushq {}", operand(op, AsmType::QuadWord));
        }
        AsmI::Call(name) => {
            let _ = writeln!(out, "    call {name}");
        }
        AsmI::Ret => {
            out.push_str("    movq %rbp, %rsp\n");
            out.push_str("    popq %rbp\n");
            out.push_str("    ret\n");
        }
    }
}

fn emit_binary(out: &mut String, op: BinOp, at: AsmType, src: &Operand, dst: &Operand) {
    let mnemonic = match op {
        BinOp::Add => "add",
        BinOp::Sub => "sub",
        BinOp::Mul => "imul",
        BinOp::And => "and",
        BinOp::Or => "or",
        BinOp::Xor => "xor",
        BinOp::Shl => "shl",
        BinOp::SarSigned => "sar",
        BinOp::ShrUnsigned => "shr",
        BinOp::AddDouble => "addsd",
        BinOp::SubDouble => "subsd",
        BinOp::MulDouble => "mulsd",
        BinOp::DivDouble => "divsd",
        BinOp::XorDouble => "xorpd",
    };
    let is_double_op = matches!(op, BinOp::AddDouble | BinOp::SubDouble | BinOp::MulDouble | BinOp::DivDouble | BinOp::XorDouble);
    let is_shift = matches!(op, BinOp::Shl | BinOp::SarSigned | BinOp::ShrUnsigned);
    let src_text = if is_shift && matches!(src, Operand::Reg(Reg::Cx)) {
        "%cl".to_string()
    } else if is_double_op {
        operand(src, AsmType::Double)
    } else {
        operand(src, at)
    };
    let dst_text = if is_double_op { operand(dst, AsmType::Double) } else { operand(dst, at) };
    let width = if is_double_op { "" } else { suffix(at) };
    let _ = writeln!(out, "    {mnemonic}{width} {src_text}, {dst_text}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::back::legalize::legalize;
    use crate::back::pseudo::replace;
    use crate::back::select::select;

    fn emitted(src: &str) -> String {
        let (mut prog, errs) = crate::front::parse::parse(src);
        assert!(errs.is_empty(), "{errs:?}");
        let analysis = crate::sema::validate(&mut prog).expect("validate");
        let tir = crate::front::lower::lower(&prog, &analysis);
        let (mut asm_prog, sizes) = select(&tir, &analysis.symbols);
        replace(&mut asm_prog, &sizes);
        legalize(&mut asm_prog);
        emit(&asm_prog)
    }

    #[test]
    fn ends_with_note_gnu_stack() {
        let text = emitted("int main(void) { return 0; }");
        assert!(text.trim_end().ends_with(".section .note.GNU-stack,\"\",@progbits"));
    }

    #[test]
    fn every_return_gets_its_own_epilogue() {
        let text = emitted("int main(void) { if (1) return 1; return 0; }");
        assert_eq!(text.matches("popq %rbp").count(), 2);
    }

    #[test]
    fn global_function_gets_globl_directive() {
        let text = emitted("int main(void) { return 0; }");
        assert!(text.contains(".globl main"));
    }

    #[test]
    fn zero_initialized_global_lands_in_bss() {
        let text = emitted("int g; int main(void) { return g; }");
        assert!(text.contains(".bss"));
    }

    #[test]
    fn double_literal_is_emitted_as_a_bit_pattern() {
        let text = emitted("double main(void) { return 1.5; }");
        assert!(text.contains(&1.5f64.to_bits().to_string()));
    }
}
