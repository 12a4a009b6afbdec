/// Heap and raw memory operations.
///
/// `Allocate` maps anonymous private pages and yields the base address;
/// `Deallocate` unmaps them. `StoreValue`/`Dereference` take an optional
/// size hint (`"byte"`, `"word"`, `"dword"`, `"qword"`; default qword) as
/// a literal third/second argument, resolved at compile time.
///
/// Arrays are length-prefixed heap blocks: the element count in the first
/// qword, elements after it. `ForEvery` iterates this layout.
use crate::ast::{Node, NodeTag};
use crate::codegen::x86_64_linux::instructions::{Cond, OperandSize, Reg};

use super::system::sys;
use super::{compile_expression, eval_unary_operand, expect_arity, Builtin, CompileContext, CompileError};

const PROT_READ_WRITE: i64 = 0x3;
const MAP_PRIVATE_ANONYMOUS: i64 = 0x22;

pub(crate) fn compile(ctx: &mut CompileContext, op: Builtin, node: &Node) -> Result<(), CompileError> {
    match op {
        Builtin::Allocate => compile_allocate(ctx, node),
        Builtin::Deallocate => compile_deallocate(ctx, node),
        Builtin::StoreValue => compile_store_value(ctx, node),
        Builtin::Dereference => compile_dereference(ctx, node),
        Builtin::ArrayCreate => compile_array_create(ctx, node),
        Builtin::ArraySet => compile_array_set(ctx, node),
        Builtin::ArrayGet => compile_array_get(ctx, node),
        Builtin::ArrayLength => compile_array_length(ctx, node),
        Builtin::MemCopy => compile_mem_copy(ctx, node),
        Builtin::MemCompare => compile_mem_compare(ctx, node),
        Builtin::MemChr => compile_mem_chr(ctx, node),
        _ => unreachable!("routed by compile_builtin"),
    }
}

/// `mmap(NULL, size, PROT_READ|PROT_WRITE, MAP_PRIVATE|MAP_ANONYMOUS, -1, 0)`
/// with the requested size already in the accumulator.
fn emit_mmap_for_size_in_rax(ctx: &mut CompileContext) {
    ctx.asm.emit_mov_reg_reg(Reg::Rsi, Reg::Rax);
    ctx.asm.emit_mov_reg_imm(Reg::Rax, sys::MMAP);
    ctx.asm.emit_xor_reg_reg(Reg::Rdi, Reg::Rdi);
    ctx.asm.emit_mov_reg_imm(Reg::Rdx, PROT_READ_WRITE);
    ctx.asm.emit_mov_reg_imm(Reg::R10, MAP_PRIVATE_ANONYMOUS);
    ctx.asm.emit_mov_reg_imm(Reg::R8, -1);
    ctx.asm.emit_xor_reg_reg(Reg::R9, Reg::R9);
    ctx.asm.emit_syscall();
}

fn compile_allocate(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    eval_unary_operand(ctx, node, "Allocate")?;
    emit_mmap_for_size_in_rax(ctx);
    Ok(())
}

fn compile_deallocate(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    expect_arity(node, 2, "Deallocate")?;
    compile_expression(ctx, node.child(0).expect("arity checked"))?;
    ctx.asm.emit_push_reg(Reg::Rax);
    compile_expression(ctx, node.child(1).expect("arity checked"))?;
    ctx.asm.emit_mov_reg_reg(Reg::Rsi, Reg::Rax);
    ctx.asm.emit_pop_reg(Reg::Rdi);
    ctx.asm.emit_mov_reg_imm(Reg::Rax, sys::MUNMAP);
    ctx.asm.emit_syscall();
    Ok(())
}

/// Parse the optional size-hint literal at `index`.
fn size_hint(node: &Node, index: usize, name: &str) -> Result<OperandSize, CompileError> {
    let Some(hint) = node.child(index) else {
        return Ok(OperandSize::Qword);
    };
    if hint.tag() != NodeTag::StringLit {
        return Err(CompileError::MalformedAst(format!(
            "size hint of `{name}` must be a string literal"
        )));
    }
    match hint.data1().as_name() {
        Some("byte") => Ok(OperandSize::Byte),
        Some("word") => Ok(OperandSize::Word),
        Some("dword") => Ok(OperandSize::Dword),
        Some("qword") | None => Ok(OperandSize::Qword),
        Some(other) => Err(CompileError::MalformedAst(format!(
            "unknown size hint `{other}` for `{name}`"
        ))),
    }
}

fn compile_store_value(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    if node.child_count() < 2 || node.child_count() > 3 {
        return Err(CompileError::Arity {
            name: "StoreValue".to_string(),
            expected: 2,
            found: node.child_count(),
        });
    }
    let size = size_hint(node, 2, "StoreValue")?;

    compile_expression(ctx, node.child(0).expect("checked above"))?;
    ctx.asm.emit_push_reg(Reg::Rax);
    compile_expression(ctx, node.child(1).expect("checked above"))?;
    ctx.asm.emit_mov_reg_reg(Reg::Rbx, Reg::Rax);
    ctx.asm.emit_pop_reg(Reg::Rax);
    ctx.asm.emit_store_sized(size);
    // The stored value is the expression's result.
    ctx.asm.emit_mov_reg_reg(Reg::Rax, Reg::Rbx);
    Ok(())
}

fn compile_dereference(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    if node.child_count() < 1 || node.child_count() > 2 {
        return Err(CompileError::Arity {
            name: "Dereference".to_string(),
            expected: 1,
            found: node.child_count(),
        });
    }
    let size = size_hint(node, 1, "Dereference")?;
    compile_expression(ctx, node.child(0).expect("checked above"))?;
    ctx.asm.emit_load_sized(size);
    Ok(())
}

fn compile_array_create(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    eval_unary_operand(ctx, node, "ArrayCreate")?;
    // Keep the element count for the length header; map 8 + n*8 bytes.
    ctx.asm.emit_push_reg(Reg::Rax);
    ctx.asm.emit_shl_reg_imm(Reg::Rax, 3);
    ctx.asm.emit_add_reg_imm(Reg::Rax, 8);
    emit_mmap_for_size_in_rax(ctx);
    ctx.asm.emit_pop_reg(Reg::Rbx);
    ctx.asm.emit_store_sized(OperandSize::Qword);
    Ok(())
}

fn compile_array_set(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    expect_arity(node, 3, "ArraySet")?;
    compile_expression(ctx, node.child(0).expect("arity checked"))?;
    ctx.asm.emit_push_reg(Reg::Rax);
    compile_expression(ctx, node.child(1).expect("arity checked"))?;
    ctx.asm.emit_push_reg(Reg::Rax);
    compile_expression(ctx, node.child(2).expect("arity checked"))?;
    ctx.asm.emit_mov_reg_reg(Reg::Rbx, Reg::Rax);
    ctx.asm.emit_pop_reg(Reg::Rax); // index
    ctx.asm.emit_pop_reg(Reg::Rcx); // base
    ctx.asm.emit_shl_reg_imm(Reg::Rax, 3);
    ctx.asm.emit_add_reg_reg(Reg::Rax, Reg::Rcx);
    ctx.asm.emit_store_mem(Reg::Rax, 8, Reg::Rbx);
    ctx.asm.emit_mov_reg_reg(Reg::Rax, Reg::Rbx);
    Ok(())
}

fn compile_array_get(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    expect_arity(node, 2, "ArrayGet")?;
    compile_expression(ctx, node.child(0).expect("arity checked"))?;
    ctx.asm.emit_push_reg(Reg::Rax);
    compile_expression(ctx, node.child(1).expect("arity checked"))?;
    ctx.asm.emit_pop_reg(Reg::Rbx);
    ctx.asm.emit_shl_reg_imm(Reg::Rax, 3);
    ctx.asm.emit_add_reg_reg(Reg::Rax, Reg::Rbx);
    ctx.asm.emit_load_mem(Reg::Rax, Reg::Rax, 8);
    Ok(())
}

fn compile_array_length(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    eval_unary_operand(ctx, node, "ArrayLength")?;
    ctx.asm.emit_load_mem(Reg::Rax, Reg::Rax, 0);
    Ok(())
}

/// `MemCopy(dest, src, length)` — non-overlapping bulk copy; yields the
/// byte count.
fn compile_mem_copy(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    expect_arity(node, 3, "MemCopy")?;
    compile_expression(ctx, node.child(0).expect("arity checked"))?;
    ctx.asm.emit_push_reg(Reg::Rax);
    compile_expression(ctx, node.child(1).expect("arity checked"))?;
    ctx.asm.emit_push_reg(Reg::Rax);
    compile_expression(ctx, node.child(2).expect("arity checked"))?;
    ctx.asm.emit_mov_reg_reg(Reg::Rcx, Reg::Rax);
    ctx.asm.emit_pop_reg(Reg::Rsi);
    ctx.asm.emit_pop_reg(Reg::Rdi);
    // rep movsb consumes rcx; keep the count for the result.
    ctx.asm.emit_mov_reg_reg(Reg::Rbx, Reg::Rcx);
    ctx.asm.emit_cld();
    ctx.asm.emit_rep_movsb();
    ctx.asm.emit_mov_reg_reg(Reg::Rax, Reg::Rbx);
    Ok(())
}

/// `MemCompare(a, b, length)` — 0 when the ranges match, 1 otherwise.
fn compile_mem_compare(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    expect_arity(node, 3, "MemCompare")?;
    compile_expression(ctx, node.child(0).expect("arity checked"))?;
    ctx.asm.emit_push_reg(Reg::Rax);
    compile_expression(ctx, node.child(1).expect("arity checked"))?;
    ctx.asm.emit_push_reg(Reg::Rax);
    compile_expression(ctx, node.child(2).expect("arity checked"))?;
    ctx.asm.emit_mov_reg_reg(Reg::Rcx, Reg::Rax);
    ctx.asm.emit_pop_reg(Reg::Rdi);
    ctx.asm.emit_pop_reg(Reg::Rsi);

    let done = ctx.asm.create_label();
    ctx.asm.emit_xor_reg_reg(Reg::Rax, Reg::Rax);
    ctx.asm.emit_test_reg_reg(Reg::Rcx, Reg::Rcx);
    ctx.asm.emit_jcc_label(Cond::E, done);
    ctx.asm.emit_cld();
    ctx.asm.emit_repe_cmpsb();
    ctx.asm.emit_setcc_al(Cond::Ne);
    ctx.asm.emit_movzx_rax_al();
    ctx.asm.mark_label(done)?;
    Ok(())
}

/// `MemChr(addr, byte, length)` — index of the first occurrence, or -1.
fn compile_mem_chr(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    expect_arity(node, 3, "MemChr")?;
    compile_expression(ctx, node.child(0).expect("arity checked"))?;
    ctx.asm.emit_push_reg(Reg::Rax);
    compile_expression(ctx, node.child(1).expect("arity checked"))?;
    ctx.asm.emit_push_reg(Reg::Rax);
    compile_expression(ctx, node.child(2).expect("arity checked"))?;
    ctx.asm.emit_mov_reg_reg(Reg::Rcx, Reg::Rax);
    ctx.asm.emit_pop_reg(Reg::Rax);
    ctx.asm.emit_pop_reg(Reg::Rdi);
    ctx.asm.emit_mov_reg_reg(Reg::Rbx, Reg::Rdi);

    let not_found = ctx.asm.create_label();
    let done = ctx.asm.create_label();
    ctx.asm.emit_test_reg_reg(Reg::Rcx, Reg::Rcx);
    ctx.asm.emit_jcc_label(Cond::E, not_found);
    ctx.asm.emit_cld();
    ctx.asm.emit_repne_scasb();
    ctx.asm.emit_jcc_label(Cond::Ne, not_found);
    // rdi stops one past the match.
    ctx.asm.emit_mov_reg_reg(Reg::Rax, Reg::Rdi);
    ctx.asm.emit_dec_reg(Reg::Rax);
    ctx.asm.emit_sub_reg_reg(Reg::Rax, Reg::Rbx);
    ctx.asm.emit_jmp_label(done);
    ctx.asm.mark_label(not_found)?;
    ctx.asm.emit_mov_reg_imm(Reg::Rax, -1);
    ctx.asm.mark_label(done)?;
    Ok(())
}
