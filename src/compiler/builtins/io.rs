/// Output operations, lowered to `write` syscalls on stdout.
///
/// `PrintMessage` writes exactly the string bytes, no trailing newline.
/// A literal argument is stored once in the data section and written with
/// its known length; any other argument is treated as a pointer to a
/// NUL-terminated string and measured with an inline scan.
/// `PrintNumber` prints the signed decimal digits plus one newline and
/// leaves the printed value in the accumulator.
use crate::ast::{Node, NodeTag};
use crate::codegen::x86_64_linux::instructions::{Cond, Reg};

use super::system::sys;
use super::{compile_expression, eval_unary_operand, expect_arity, Builtin, CompileContext, CompileError};

pub(crate) fn compile(ctx: &mut CompileContext, op: Builtin, node: &Node) -> Result<(), CompileError> {
    match op {
        Builtin::PrintMessage => compile_print_message(ctx, node),
        Builtin::PrintNumber => compile_print_number(ctx, node),
        Builtin::PrintChar => compile_print_char(ctx, node),
        _ => unreachable!("routed by compile_builtin"),
    }
}

fn compile_print_message(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    expect_arity(node, 1, "PrintMessage")?;
    let argument = node.child(0).expect("arity checked");

    if argument.tag() == NodeTag::StringLit {
        let text = argument
            .data1()
            .as_name()
            .ok_or_else(|| CompileError::MalformedAst("StringLit node without text".to_string()))?
            .to_string();
        let offset = ctx.asm.add_string(&text);
        ctx.asm.emit_mov_reg_imm(Reg::Rax, sys::WRITE);
        ctx.asm.emit_mov_reg_imm(Reg::Rdi, 1);
        ctx.asm.emit_load_data_address(Reg::Rsi, offset);
        ctx.asm.emit_mov_reg_imm(Reg::Rdx, text.len() as i64);
        ctx.asm.emit_syscall();
        return Ok(());
    }

    // Computed pointer: scan for the terminator to find the length.
    compile_expression(ctx, argument)?;
    ctx.asm.emit_mov_reg_reg(Reg::Rsi, Reg::Rax);
    ctx.asm.emit_mov_reg_reg(Reg::Rcx, Reg::Rax);

    let scan = ctx.asm.create_label();
    let done = ctx.asm.create_label();
    ctx.asm.mark_label(scan)?;
    ctx.asm.emit_cmp_byte_mem_zero(Reg::Rcx);
    ctx.asm.emit_jcc_label(Cond::E, done);
    ctx.asm.emit_inc_reg(Reg::Rcx);
    ctx.asm.emit_jmp_label(scan);
    ctx.asm.mark_label(done)?;

    ctx.asm.emit_mov_reg_reg(Reg::Rdx, Reg::Rcx);
    ctx.asm.emit_sub_reg_reg(Reg::Rdx, Reg::Rsi);
    ctx.asm.emit_mov_reg_imm(Reg::Rax, sys::WRITE);
    ctx.asm.emit_mov_reg_imm(Reg::Rdi, 1);
    ctx.asm.emit_syscall();
    Ok(())
}

fn compile_print_number(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    eval_unary_operand(ctx, node, "PrintNumber")?;
    ctx.asm.emit_print_number();

    // Trailing newline; the printed value survives in the accumulator.
    let newline = ctx.asm.add_string("\n");
    ctx.asm.emit_push_reg(Reg::Rax);
    ctx.asm.emit_mov_reg_imm(Reg::Rax, sys::WRITE);
    ctx.asm.emit_mov_reg_imm(Reg::Rdi, 1);
    ctx.asm.emit_load_data_address(Reg::Rsi, newline);
    ctx.asm.emit_mov_reg_imm(Reg::Rdx, 1);
    ctx.asm.emit_syscall();
    ctx.asm.emit_pop_reg(Reg::Rax);
    Ok(())
}

fn compile_print_char(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    eval_unary_operand(ctx, node, "PrintChar")?;
    // The byte is written from the stack slot the push created.
    ctx.asm.emit_push_reg(Reg::Rax);
    ctx.asm.emit_mov_reg_imm(Reg::Rax, sys::WRITE);
    ctx.asm.emit_mov_reg_imm(Reg::Rdi, 1);
    ctx.asm.emit_mov_reg_reg(Reg::Rsi, Reg::Rsp);
    ctx.asm.emit_mov_reg_imm(Reg::Rdx, 1);
    ctx.asm.emit_syscall();
    ctx.asm.emit_pop_reg(Reg::Rax);
    Ok(())
}
