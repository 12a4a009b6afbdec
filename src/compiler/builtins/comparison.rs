/// Comparison operators: signed compare, set-byte into the low accumulator
/// byte, zero-extend. Result is always 0 or 1.
use crate::ast::Node;
use crate::codegen::x86_64_linux::instructions::{Cond, Reg};

use super::{eval_binary_operands, Builtin, CompileContext, CompileError};

pub(crate) fn compile(ctx: &mut CompileContext, op: Builtin, node: &Node) -> Result<(), CompileError> {
    let (name, cond) = match op {
        Builtin::EqualTo => ("EqualTo", Cond::E),
        Builtin::NotEqual => ("NotEqual", Cond::Ne),
        Builtin::LessThan => ("LessThan", Cond::L),
        Builtin::GreaterThan => ("GreaterThan", Cond::G),
        Builtin::LessEqual => ("LessEqual", Cond::Le),
        Builtin::GreaterEqual => ("GreaterEqual", Cond::Ge),
        _ => unreachable!("routed by compile_builtin"),
    };

    eval_binary_operands(ctx, node, name)?;
    ctx.asm.emit_cmp_reg_reg(Reg::Rax, Reg::Rbx);
    ctx.asm.emit_setcc_al(cond);
    ctx.asm.emit_movzx_rax_al();
    Ok(())
}
