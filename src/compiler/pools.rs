/// Fixed pool declarations and field access.
///
/// A `FixedPool` is the program's global storage: each field gets one
/// eight-byte slot in the data section, assigned in declaration order and
/// initialized in the process image. Code reaches fields through dotted
/// `Pool.Field` names, compiled to RIP-relative loads and stores patched
/// at final layout.
use log::debug;

use crate::ast::{Node, NodeTag};
use crate::codegen::x86_64_linux::instructions::Reg;

use super::context::PoolField;
use super::{CompileContext, CompileError};

/// Materialize a pool during the symbol pre-pass.
pub(crate) fn declare_pool(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    let pool_name = node
        .data1()
        .as_name()
        .ok_or_else(|| CompileError::MalformedAst("Pool without a name".to_string()))?;

    for field in node.children() {
        if field.tag() != NodeTag::PoolField {
            return Err(CompileError::MalformedAst(format!(
                "pool `{pool_name}` contains a non-field child"
            )));
        }
        let field_name = field
            .data1()
            .as_name()
            .ok_or_else(|| CompileError::MalformedAst(format!("unnamed field in pool `{pool_name}`")))?;
        let initial = field.data2().as_int().unwrap_or(0);
        let mutable = field.data3().as_int().unwrap_or(1) != 0;

        let data_offset = ctx.asm.append_data(&initial.to_le_bytes());
        ctx.add_pool_field(
            format!("{pool_name}.{field_name}"),
            PoolField {
                data_offset,
                mutable,
            },
        )?;
    }
    debug!("declared pool `{pool_name}` with {} fields", node.child_count());
    Ok(())
}

/// Store the accumulator into a dotted pool field.
pub(crate) fn compile_pool_store(ctx: &mut CompileContext, target: &str) -> Result<(), CompileError> {
    let field = ctx
        .pool_field(target)
        .ok_or_else(|| CompileError::UndefinedVariable(target.to_string()))?;
    ctx.asm.emit_store_data(field.data_offset, Reg::Rax);
    Ok(())
}
