/// Compile layer: walks the AST and drives the emission layer.
///
/// Organized into:
/// - `context`: the compilation context threaded through every routine
/// - `expressions`: expression dispatch into the accumulator
/// - `statements`: control flow, assignment, and loop lowering
/// - `functions`: symbol registration, frames, calls
/// - `pools`: fixed pool declaration and field access
/// - `builtins`: one module per built-in operator family
pub mod builtins;
mod context;
mod expressions;
mod functions;
mod pools;
mod statements;

use log::debug;
use thiserror::Error;

use crate::ast::{Node, NodeTag};
use crate::codegen::x86_64_linux::instructions::Reg;
use crate::emit::{Assembler, EmitError};

pub use context::{CompileContext, FunctionSymbol, LoopLabels, PoolField};
pub(crate) use expressions::compile_expression;

use builtins::system::sys;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("undefined variable `{0}`")]
    UndefinedVariable(String),
    #[error("duplicate function `{0}`")]
    DuplicateFunction(String),
    #[error("duplicate pool field `{0}`")]
    DuplicatePoolField(String),
    #[error("wrong number of arguments for `{name}`: expected {expected}, found {found}")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("`{0}` used outside of a loop")]
    LoopControlOutsideLoop(&'static str),
    #[error("`Return` used outside of a function")]
    ReturnOutsideFunction,
    #[error("function `{0}` has more than six parameters")]
    TooManyParameters(String),
    #[error("malformed AST: {0}")]
    MalformedAst(String),
    #[error("unsupported construct `{0}`")]
    Unsupported(String),
    #[error(transparent)]
    Emit(#[from] EmitError),
    #[error("failed to write executable: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a successful compilation: frozen buffers with all relative
/// fixups resolved, plus what the output layers need for layout and
/// symbols. Data relocations are patched (executable path) or exported
/// (object path) downstream.
#[derive(Debug)]
pub struct CompiledProgram {
    pub asm: Assembler,
    pub entry_offset: usize,
    pub functions: Vec<(String, usize)>,
}

/// Compile a whole program AST down to machine code and data buffers.
pub fn compile_program(root: &Node) -> Result<CompiledProgram, CompileError> {
    if root.tag() != NodeTag::Program {
        return Err(CompileError::MalformedAst(
            "root node must be a Program".to_string(),
        ));
    }

    let mut ctx = CompileContext::new();

    // Pre-pass: register every function and materialize every pool before
    // any body is compiled, so forward calls and pool accesses resolve.
    for decl in root.children() {
        match decl.tag() {
            NodeTag::Function | NodeTag::Subroutine => functions::register_function(&mut ctx, decl)?,
            NodeTag::Pool => pools::declare_pool(&mut ctx, decl)?,
            _ => {}
        }
    }
    debug!(
        "pre-pass registered {} functions, {} pool fields",
        ctx.function_count(),
        ctx.pool_field_count()
    );

    // Entry sequence at code offset zero.
    let top_level: Vec<&Node> = root
        .children()
        .iter()
        .filter(|n| {
            !matches!(
                n.tag(),
                NodeTag::Function | NodeTag::Subroutine | NodeTag::Pool
            )
        })
        .collect();

    if top_level.is_empty() {
        if let Some(main) = ctx.get_function("Main") {
            // No top-level statements: call Main and exit with its result.
            let entry = main.entry;
            ctx.asm.emit_call_label(entry);
            ctx.asm.emit_mov_reg_reg(Reg::Rdi, Reg::Rax);
            ctx.asm.emit_mov_reg_imm(Reg::Rax, sys::EXIT);
            ctx.asm.emit_syscall();
        } else {
            // Empty program: exit(0).
            ctx.asm.emit_mov_reg_imm(Reg::Rax, sys::EXIT);
            ctx.asm.emit_xor_reg_reg(Reg::Rdi, Reg::Rdi);
            ctx.asm.emit_syscall();
        }
    } else {
        let local_slots = statements::scan_for_locals(top_level.iter().copied(), &[]);
        ctx.begin_frame(&[], local_slots);
        ctx.asm.emit_prologue(0, local_slots);
        for stmt in &top_level {
            compile_node(&mut ctx, stmt)?;
        }
        // Exit path: always terminate the top-level sequence. Unreachable
        // when the program already called Exit.
        ctx.asm.emit_mov_reg_imm(Reg::Rax, sys::EXIT);
        ctx.asm.emit_xor_reg_reg(Reg::Rdi, Reg::Rdi);
        ctx.asm.emit_syscall();
    }

    // Function bodies follow the entry sequence.
    for decl in root.children() {
        if matches!(decl.tag(), NodeTag::Function | NodeTag::Subroutine) {
            functions::compile_function_body(&mut ctx, decl)?;
        }
    }

    ctx.asm.resolve_fixups()?;

    let functions = ctx.function_offsets();
    debug!(
        "compiled {} bytes of code, {} bytes of data",
        ctx.asm.code().len(),
        ctx.asm.data().len()
    );

    Ok(CompiledProgram {
        asm: ctx.asm,
        entry_offset: 0,
        functions,
    })
}

/// Statement-level dispatch.
pub(crate) fn compile_node(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    match node.tag() {
        NodeTag::Assignment => statements::compile_assignment(ctx, node),
        NodeTag::If => statements::compile_if(ctx, node),
        NodeTag::While => statements::compile_while(ctx, node),
        NodeTag::ForEvery => statements::compile_for_every(ctx, node),
        NodeTag::Branch => statements::compile_branch(ctx, node),
        NodeTag::Return => statements::compile_return(ctx, node),
        NodeTag::Break => statements::compile_break(ctx),
        NodeTag::Continue => statements::compile_continue(ctx),
        NodeTag::Block => statements::compile_block(ctx, node),
        // An expression in statement position: evaluate for effect.
        NodeTag::Call | NodeTag::Identifier | NodeTag::Number | NodeTag::StringLit => {
            compile_expression(ctx, node)
        }
        NodeTag::Function | NodeTag::Subroutine | NodeTag::Pool => Err(CompileError::Unsupported(
            format!("{:?} declaration nested in a body", node.tag()),
        )),
        tag => Err(CompileError::Unsupported(format!("{tag:?}"))),
    }
}
