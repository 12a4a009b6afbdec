/// Expression compilation.
///
/// Contract: on return the expression's value occupies the accumulator
/// (rax). Other registers may be clobbered; callers save anything they need
/// across sub-expressions on the machine stack.
use log::trace;

use crate::ast::{Node, NodeTag};
use crate::codegen::x86_64_linux::instructions::Reg;

use super::builtins::{self, Builtin};
use super::{functions, CompileContext, CompileError};

pub(crate) fn compile_expression(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    trace!("expression: {:?}", node.tag());
    match node.tag() {
        NodeTag::Number => {
            let value = node
                .data1()
                .as_int()
                .ok_or_else(|| CompileError::MalformedAst("Number node without a value".to_string()))?;
            ctx.asm.emit_mov_reg_imm(Reg::Rax, value);
            Ok(())
        }
        NodeTag::StringLit => {
            let text = node
                .data1()
                .as_name()
                .ok_or_else(|| CompileError::MalformedAst("StringLit node without text".to_string()))?
                .to_string();
            let offset = ctx.asm.add_string(&text);
            ctx.asm.emit_load_data_address(Reg::Rax, offset);
            Ok(())
        }
        NodeTag::Identifier => {
            let name = node
                .data1()
                .as_name()
                .ok_or_else(|| CompileError::MalformedAst("Identifier node without a name".to_string()))?;
            compile_identifier(ctx, name)
        }
        NodeTag::Call => compile_call(ctx, node),
        tag => Err(CompileError::MalformedAst(format!(
            "{tag:?} is not an expression"
        ))),
    }
}

/// Load a named binding: frame slot first, then pool field.
fn compile_identifier(ctx: &mut CompileContext, name: &str) -> Result<(), CompileError> {
    if let Some(offset) = ctx.lookup_variable(name) {
        ctx.asm.emit_load_frame(Reg::Rax, -offset);
        return Ok(());
    }
    if let Some(field) = ctx.pool_field(name) {
        ctx.asm.emit_load_data(Reg::Rax, field.data_offset);
        return Ok(());
    }
    Err(CompileError::UndefinedVariable(name.to_string()))
}

/// Resolve a call: built-in operator modules first, then the user function
/// table populated by the pre-pass.
pub(crate) fn compile_call(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    let name = node
        .data1()
        .as_name()
        .ok_or_else(|| CompileError::MalformedAst("Call node without a name".to_string()))?;

    if let Some(builtin) = Builtin::from_name(name) {
        return builtins::compile_builtin(ctx, builtin, node);
    }
    if ctx.get_function(name).is_some() {
        return functions::compile_call(ctx, node);
    }
    Err(CompileError::UnknownFunction(name.to_string()))
}
