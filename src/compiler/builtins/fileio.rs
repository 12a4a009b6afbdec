/// File operations, lowered to the open/read/write/close syscalls.
///
/// Paths are pointers to NUL-terminated strings. `FileOpen` opens
/// read-only; `FileCreate` opens for writing with create+truncate and mode
/// 0644. All results are raw kernel return values: descriptors or byte
/// counts on success, negative errno values on failure, for the program to
/// inspect.
use crate::ast::Node;
use crate::codegen::x86_64_linux::instructions::Reg;

use super::system::sys;
use super::{compile_expression, eval_unary_operand, expect_arity, Builtin, CompileContext, CompileError};

const O_RDONLY: i64 = 0;
const O_WRONLY_CREAT_TRUNC: i64 = 0x241;
const CREATE_MODE: i64 = 0o644;

pub(crate) fn compile(ctx: &mut CompileContext, op: Builtin, node: &Node) -> Result<(), CompileError> {
    match op {
        Builtin::FileOpen => {
            eval_unary_operand(ctx, node, "FileOpen")?;
            ctx.asm.emit_mov_reg_reg(Reg::Rdi, Reg::Rax);
            ctx.asm.emit_mov_reg_imm(Reg::Rsi, O_RDONLY);
            ctx.asm.emit_mov_reg_imm(Reg::Rax, sys::OPEN);
            ctx.asm.emit_syscall();
        }
        Builtin::FileCreate => {
            eval_unary_operand(ctx, node, "FileCreate")?;
            ctx.asm.emit_mov_reg_reg(Reg::Rdi, Reg::Rax);
            ctx.asm.emit_mov_reg_imm(Reg::Rsi, O_WRONLY_CREAT_TRUNC);
            ctx.asm.emit_mov_reg_imm(Reg::Rdx, CREATE_MODE);
            ctx.asm.emit_mov_reg_imm(Reg::Rax, sys::OPEN);
            ctx.asm.emit_syscall();
        }
        Builtin::FileRead => compile_transfer(ctx, node, "FileRead", sys::READ)?,
        Builtin::FileWrite => compile_transfer(ctx, node, "FileWrite", sys::WRITE)?,
        Builtin::FileClose => {
            eval_unary_operand(ctx, node, "FileClose")?;
            ctx.asm.emit_mov_reg_reg(Reg::Rdi, Reg::Rax);
            ctx.asm.emit_mov_reg_imm(Reg::Rax, sys::CLOSE);
            ctx.asm.emit_syscall();
        }
        _ => unreachable!("routed by compile_builtin"),
    }
    Ok(())
}

/// `(fd, buffer, count)` marshalling shared by read and write.
fn compile_transfer(
    ctx: &mut CompileContext,
    node: &Node,
    name: &str,
    number: i64,
) -> Result<(), CompileError> {
    expect_arity(node, 3, name)?;
    compile_expression(ctx, node.child(0).expect("arity checked"))?;
    ctx.asm.emit_push_reg(Reg::Rax);
    compile_expression(ctx, node.child(1).expect("arity checked"))?;
    ctx.asm.emit_push_reg(Reg::Rax);
    compile_expression(ctx, node.child(2).expect("arity checked"))?;
    ctx.asm.emit_mov_reg_reg(Reg::Rdx, Reg::Rax);
    ctx.asm.emit_pop_reg(Reg::Rsi);
    ctx.asm.emit_pop_reg(Reg::Rdi);
    ctx.asm.emit_mov_reg_imm(Reg::Rax, number);
    ctx.asm.emit_syscall();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_open_is_read_only() {
        let mut ctx = CompileContext::new();
        let node = Node::call("FileOpen", vec![Node::string("/tmp/x")]);
        compile(&mut ctx, Builtin::FileOpen, &node).unwrap();
        let code = ctx.asm.code();
        // mov rsi, 0; mov rax, 2; syscall
        assert_eq!(
            &code[code.len() - 16..],
            &[
                0x48, 0xc7, 0xc6, 0, 0, 0, 0, // mov rsi, O_RDONLY
                0x48, 0xc7, 0xc0, 2, 0, 0, 0, // mov rax, open
                0x0f, 0x05,
            ]
        );
    }

    #[test]
    fn file_create_sets_flags_and_mode() {
        let mut ctx = CompileContext::new();
        let node = Node::call("FileCreate", vec![Node::string("/tmp/x")]);
        compile(&mut ctx, Builtin::FileCreate, &node).unwrap();
        let code = ctx.asm.code();
        // mov rsi, 0x241 followed by mov rdx, 0o644.
        assert!(code.windows(7).any(|w| w == [0x48, 0xc7, 0xc6, 0x41, 0x02, 0, 0]));
        assert!(code.windows(7).any(|w| w == [0x48, 0xc7, 0xc2, 0xa4, 0x01, 0, 0]));
    }

    #[test]
    fn file_write_marshals_fd_buffer_count() {
        let mut ctx = CompileContext::new();
        let node = Node::call(
            "FileWrite",
            vec![Node::number(1), Node::number(0x1000), Node::number(5)],
        );
        compile(&mut ctx, Builtin::FileWrite, &node).unwrap();
        let code = ctx.asm.code();
        // mov rdx, rax; pop rsi; pop rdi; mov rax, 1; syscall
        assert_eq!(
            &code[code.len() - 14..],
            &[0x48, 0x89, 0xc2, 0x5e, 0x5f, 0x48, 0xc7, 0xc0, 1, 0, 0, 0, 0x0f, 0x05]
        );
    }

    #[test]
    fn file_close_takes_one_descriptor() {
        let mut ctx = CompileContext::new();
        let node = Node::call("FileClose", vec![Node::number(3)]);
        compile(&mut ctx, Builtin::FileClose, &node).unwrap();
        let code = ctx.asm.code();
        assert_eq!(
            &code[code.len() - 9..],
            &[0x48, 0xc7, 0xc0, 3, 0, 0, 0, 0x0f, 0x05]
        );
    }
}
