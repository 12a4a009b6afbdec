/// Direct system access: raw syscalls, process exit, and function
/// pointers.
///
/// `SystemCall(number, arg1, ..)` loads the kernel argument registers in
/// order (r10 in the fourth slot) and leaves the kernel's return value in
/// the accumulator. `Exit(code)` specializes to the exit syscall.
use crate::ast::{Node, NodeTag};
use crate::codegen::x86_64_linux::instructions::Reg;

use super::{compile_expression, eval_unary_operand, Builtin, CompileContext, CompileError};

/// Linux x86-64 syscall numbers the backend emits directly.
pub(crate) mod sys {
    pub const READ: i64 = 0;
    pub const WRITE: i64 = 1;
    pub const OPEN: i64 = 2;
    pub const CLOSE: i64 = 3;
    pub const MMAP: i64 = 9;
    pub const MUNMAP: i64 = 11;
    pub const EXIT: i64 = 60;
}

pub(crate) fn compile(ctx: &mut CompileContext, op: Builtin, node: &Node) -> Result<(), CompileError> {
    match op {
        Builtin::SystemCall => compile_system_call(ctx, node),
        Builtin::Exit => compile_exit(ctx, node),
        Builtin::AddressOf => compile_address_of(ctx, node),
        Builtin::CallIndirect => compile_call_indirect(ctx, node),
        _ => unreachable!("routed by compile_builtin"),
    }
}

fn compile_system_call(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    let found = node.child_count();
    if found == 0 || found > 7 {
        return Err(CompileError::Arity {
            name: "SystemCall".to_string(),
            expected: 1,
            found,
        });
    }

    // Push the number, then each argument, left to right.
    for child in node.children() {
        compile_expression(ctx, child)?;
        ctx.asm.emit_push_reg(Reg::Rax);
    }
    ctx.asm.emit_syscall_arguments(found - 1);
    ctx.asm.emit_pop_reg(Reg::Rax);
    ctx.asm.emit_syscall();
    Ok(())
}

fn compile_exit(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    eval_unary_operand(ctx, node, "Exit")?;
    ctx.asm.emit_mov_reg_reg(Reg::Rdi, Reg::Rax);
    ctx.asm.emit_mov_reg_imm(Reg::Rax, sys::EXIT);
    ctx.asm.emit_syscall();
    Ok(())
}

/// `AddressOf(Function)` loads the absolute entry address of a registered
/// function, patched once the layout is final.
fn compile_address_of(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    super::expect_arity(node, 1, "AddressOf")?;
    let target = node.child(0).expect("arity checked");
    if target.tag() != NodeTag::Identifier {
        return Err(CompileError::MalformedAst(
            "AddressOf takes a function name".to_string(),
        ));
    }
    let name = target
        .data1()
        .as_name()
        .ok_or_else(|| CompileError::MalformedAst("Identifier node without a name".to_string()))?;
    let entry = ctx
        .get_function(name)
        .ok_or_else(|| CompileError::UnknownFunction(name.to_string()))?
        .entry;
    ctx.asm.emit_load_label_address(Reg::Rax, entry);
    Ok(())
}

/// `CallIndirect(address, arg1, ..)` calls through a computed address with
/// the normal argument registers.
fn compile_call_indirect(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    let found = node.child_count();
    if found == 0 || found > 7 {
        return Err(CompileError::Arity {
            name: "CallIndirect".to_string(),
            expected: 1,
            found,
        });
    }

    for child in node.children() {
        compile_expression(ctx, child)?;
        ctx.asm.emit_push_reg(Reg::Rax);
    }
    ctx.asm.emit_call_arguments(found - 1);
    ctx.asm.emit_pop_reg(Reg::Rax);
    ctx.asm.emit_call_reg(Reg::Rax);
    Ok(())
}
