/// String storage operations on NUL-terminated byte strings.
///
/// Only length and equality live here; richer manipulation (concat,
/// substring, trim) is out of scope for the backend.
use crate::ast::Node;
use crate::codegen::x86_64_linux::instructions::{Cond, Reg};

use super::{compile_expression, eval_unary_operand, expect_arity, Builtin, CompileContext, CompileError};

pub(crate) fn compile(ctx: &mut CompileContext, op: Builtin, node: &Node) -> Result<(), CompileError> {
    match op {
        Builtin::StringLength => compile_string_length(ctx, node),
        Builtin::StringCompare => compile_string_compare(ctx, node),
        _ => unreachable!("routed by compile_builtin"),
    }
}

/// Byte count up to (excluding) the terminator.
fn compile_string_length(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    eval_unary_operand(ctx, node, "StringLength")?;
    ctx.asm.emit_mov_reg_reg(Reg::Rbx, Reg::Rax);
    ctx.asm.emit_xor_reg_reg(Reg::Rax, Reg::Rax);

    let scan = ctx.asm.create_label();
    let done = ctx.asm.create_label();
    ctx.asm.mark_label(scan)?;
    ctx.asm.emit_cmp_byte_mem_zero(Reg::Rbx);
    ctx.asm.emit_jcc_label(Cond::E, done);
    ctx.asm.emit_inc_reg(Reg::Rax);
    ctx.asm.emit_inc_reg(Reg::Rbx);
    ctx.asm.emit_jmp_label(scan);
    ctx.asm.mark_label(done)?;
    Ok(())
}

/// Byte-wise comparison of two strings: 0 when equal, 1 when different.
fn compile_string_compare(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    expect_arity(node, 2, "StringCompare")?;
    compile_expression(ctx, node.child(0).expect("arity checked"))?;
    ctx.asm.emit_push_reg(Reg::Rax);
    compile_expression(ctx, node.child(1).expect("arity checked"))?;
    ctx.asm.emit_mov_reg_reg(Reg::Rsi, Reg::Rax);
    ctx.asm.emit_pop_reg(Reg::Rdi);

    let compare = ctx.asm.create_label();
    let equal = ctx.asm.create_label();
    let not_equal = ctx.asm.create_label();
    let done = ctx.asm.create_label();

    ctx.asm.mark_label(compare)?;
    ctx.asm.emit_load_byte_al(Reg::Rdi);
    ctx.asm.emit_load_byte_bl(Reg::Rsi);
    ctx.asm.emit_cmp_al_bl();
    ctx.asm.emit_jcc_label(Cond::Ne, not_equal);
    ctx.asm.emit_test_al_al();
    ctx.asm.emit_jcc_label(Cond::E, equal);
    ctx.asm.emit_inc_reg(Reg::Rdi);
    ctx.asm.emit_inc_reg(Reg::Rsi);
    ctx.asm.emit_jmp_label(compare);

    ctx.asm.mark_label(equal)?;
    ctx.asm.emit_xor_reg_reg(Reg::Rax, Reg::Rax);
    ctx.asm.emit_jmp_label(done);
    ctx.asm.mark_label(not_equal)?;
    ctx.asm.emit_mov_reg_imm(Reg::Rax, 1);
    ctx.asm.mark_label(done)?;
    Ok(())
}
