/// Bitwise operators. Shifts move the count into the fixed shift register
/// (rcx) and shift the accumulator by cl; `RightShift` is arithmetic,
/// matching the language's signed integers.
use crate::ast::Node;
use crate::codegen::x86_64_linux::instructions::Reg;

use super::{compile_expression, eval_binary_operands, eval_unary_operand, expect_arity, Builtin, CompileContext, CompileError};

pub(crate) fn compile(ctx: &mut CompileContext, op: Builtin, node: &Node) -> Result<(), CompileError> {
    match op {
        Builtin::BitwiseAnd => {
            eval_binary_operands(ctx, node, "BitwiseAnd")?;
            ctx.asm.emit_and_reg_reg(Reg::Rax, Reg::Rbx);
        }
        Builtin::BitwiseOr => {
            eval_binary_operands(ctx, node, "BitwiseOr")?;
            ctx.asm.emit_or_reg_reg(Reg::Rax, Reg::Rbx);
        }
        Builtin::BitwiseXor => {
            eval_binary_operands(ctx, node, "BitwiseXor")?;
            ctx.asm.emit_xor_reg_reg(Reg::Rax, Reg::Rbx);
        }
        Builtin::BitwiseNot => {
            eval_unary_operand(ctx, node, "BitwiseNot")?;
            ctx.asm.emit_not_reg(Reg::Rax);
        }
        Builtin::LeftShift | Builtin::RightShift => {
            let name = if op == Builtin::LeftShift { "LeftShift" } else { "RightShift" };
            expect_arity(node, 2, name)?;
            compile_expression(ctx, node.child(0).expect("arity checked"))?;
            ctx.asm.emit_push_reg(Reg::Rax);
            compile_expression(ctx, node.child(1).expect("arity checked"))?;
            ctx.asm.emit_mov_reg_reg(Reg::Rcx, Reg::Rax);
            ctx.asm.emit_pop_reg(Reg::Rax);
            if op == Builtin::LeftShift {
                ctx.asm.emit_shl_reg_cl(Reg::Rax);
            } else {
                ctx.asm.emit_sar_reg_cl(Reg::Rax);
            }
        }
        _ => unreachable!("routed by compile_builtin"),
    }
    Ok(())
}
