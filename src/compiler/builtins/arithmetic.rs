/// Arithmetic operators.
///
/// Two-operand forms follow the accumulator discipline: left into rax,
/// pushed, right into rax, moved to rbx, left popped back. Division
/// sign-extends the dividend with `cqo` before `idiv`, which also clears
/// rdx of stale bits; the remainder lands in rdx for `Modulo`.
use crate::ast::Node;
use crate::codegen::x86_64_linux::instructions::Reg;

use super::{eval_binary_operands, eval_unary_operand, Builtin, CompileContext, CompileError};

pub(crate) fn compile(ctx: &mut CompileContext, op: Builtin, node: &Node) -> Result<(), CompileError> {
    match op {
        Builtin::Add => {
            eval_binary_operands(ctx, node, "Add")?;
            ctx.asm.emit_add_reg_reg(Reg::Rax, Reg::Rbx);
        }
        Builtin::Subtract => {
            eval_binary_operands(ctx, node, "Subtract")?;
            ctx.asm.emit_sub_reg_reg(Reg::Rax, Reg::Rbx);
        }
        Builtin::Multiply => {
            eval_binary_operands(ctx, node, "Multiply")?;
            ctx.asm.emit_imul_reg_reg(Reg::Rax, Reg::Rbx);
        }
        Builtin::Divide => {
            eval_binary_operands(ctx, node, "Divide")?;
            ctx.asm.emit_cqo();
            ctx.asm.emit_idiv_reg(Reg::Rbx);
        }
        Builtin::Modulo => {
            eval_binary_operands(ctx, node, "Modulo")?;
            ctx.asm.emit_cqo();
            ctx.asm.emit_idiv_reg(Reg::Rbx);
            ctx.asm.emit_mov_reg_reg(Reg::Rax, Reg::Rdx);
        }
        Builtin::Negate => {
            eval_unary_operand(ctx, node, "Negate")?;
            ctx.asm.emit_neg_reg(Reg::Rax);
        }
        Builtin::Increment => {
            eval_unary_operand(ctx, node, "Increment")?;
            ctx.asm.emit_inc_reg(Reg::Rax);
        }
        Builtin::Decrement => {
            eval_unary_operand(ctx, node, "Decrement")?;
            ctx.asm.emit_dec_reg(Reg::Rax);
        }
        _ => unreachable!("routed by compile_builtin"),
    }
    Ok(())
}
