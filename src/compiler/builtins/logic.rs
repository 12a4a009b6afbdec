/// Logical operators with short-circuit evaluation.
///
/// `And` skips the right operand when the left is zero; `Or` skips it when
/// the left is nonzero. The accumulator keeps the deciding operand's value
/// (zero for a failed `And`). `Not` normalizes to 0/1.
use crate::ast::Node;
use crate::codegen::x86_64_linux::instructions::{Cond, Reg};

use super::{compile_expression, eval_unary_operand, expect_arity, Builtin, CompileContext, CompileError};

pub(crate) fn compile(ctx: &mut CompileContext, op: Builtin, node: &Node) -> Result<(), CompileError> {
    match op {
        Builtin::And => {
            expect_arity(node, 2, "And")?;
            let false_label = ctx.asm.create_label();
            let end_label = ctx.asm.create_label();

            compile_expression(ctx, node.child(0).expect("arity checked"))?;
            ctx.asm.emit_test_reg_reg(Reg::Rax, Reg::Rax);
            ctx.asm.emit_jcc_label(Cond::E, false_label);
            compile_expression(ctx, node.child(1).expect("arity checked"))?;
            ctx.asm.emit_jmp_label(end_label);
            ctx.asm.mark_label(false_label)?;
            ctx.asm.emit_xor_reg_reg(Reg::Rax, Reg::Rax);
            ctx.asm.mark_label(end_label)?;
        }
        Builtin::Or => {
            expect_arity(node, 2, "Or")?;
            let end_label = ctx.asm.create_label();

            compile_expression(ctx, node.child(0).expect("arity checked"))?;
            ctx.asm.emit_test_reg_reg(Reg::Rax, Reg::Rax);
            ctx.asm.emit_jcc_label(Cond::Ne, end_label);
            compile_expression(ctx, node.child(1).expect("arity checked"))?;
            ctx.asm.mark_label(end_label)?;
        }
        Builtin::Not => {
            eval_unary_operand(ctx, node, "Not")?;
            ctx.asm.emit_test_reg_reg(Reg::Rax, Reg::Rax);
            ctx.asm.emit_setcc_al(Cond::E);
            ctx.asm.emit_movzx_rax_al();
        }
        _ => unreachable!("routed by compile_builtin"),
    }
    Ok(())
}
