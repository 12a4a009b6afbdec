/// Statement compilation: assignment, control flow, and loop lowering.
use std::collections::HashSet;

use crate::ast::{Node, NodeTag};
use crate::codegen::x86_64_linux::instructions::{Cond, Reg};
use crate::emit::Label;

use super::{compile_expression, compile_node, pools, CompileContext, CompileError, LoopLabels};

/// Count the frame slots a body needs before its prologue is emitted:
/// every distinct assignment target that is not a parameter or pool field,
/// each `ForEvery` element variable, plus two hidden slots per `ForEvery`
/// (collection pointer and index).
pub(crate) fn scan_for_locals<'a>(
    statements: impl Iterator<Item = &'a Node>,
    params: &[String],
) -> usize {
    let mut names: HashSet<&str> = HashSet::new();
    let mut hidden = 0usize;
    for stmt in statements {
        scan_statement(stmt, params, &mut names, &mut hidden);
    }
    names.len() + hidden
}

fn scan_statement<'a>(
    node: &'a Node,
    params: &[String],
    names: &mut HashSet<&'a str>,
    hidden: &mut usize,
) {
    match node.tag() {
        NodeTag::Assignment => {
            if let Some(target) = node.data1().as_name() {
                if !target.contains('.') && !params.iter().any(|p| p == target) {
                    names.insert(target);
                }
            }
        }
        NodeTag::If => {
            for body in node.children().iter().skip(1) {
                scan_statement(body, params, names, hidden);
            }
        }
        NodeTag::While => {
            if let Some(body) = node.child(1) {
                scan_statement(body, params, names, hidden);
            }
        }
        NodeTag::ForEvery => {
            if let Some(variable) = node.data1().as_name() {
                names.insert(variable);
            }
            *hidden += 2;
            if let Some(body) = node.child(1) {
                scan_statement(body, params, names, hidden);
            }
        }
        NodeTag::Branch => {
            *hidden += 1;
            for child in node.children().iter().skip(1) {
                scan_statement(child, params, names, hidden);
            }
        }
        NodeTag::BranchCase => {
            if let Some(body) = node.child(0) {
                scan_statement(body, params, names, hidden);
            }
        }
        NodeTag::Block => {
            for child in node.children() {
                scan_statement(child, params, names, hidden);
            }
        }
        _ => {}
    }
}

/// Assignment: first write to a plain name allocates its stack slot;
/// dotted targets store into pool fields.
pub(crate) fn compile_assignment(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    let target = node
        .data1()
        .as_name()
        .ok_or_else(|| CompileError::MalformedAst("Assignment without a target".to_string()))?
        .to_string();
    let value = node
        .child(0)
        .ok_or_else(|| CompileError::MalformedAst("Assignment without a value".to_string()))?;

    compile_expression(ctx, value)?;

    if target.contains('.') {
        return pools::compile_pool_store(ctx, &target);
    }

    let offset = match ctx.lookup_variable(&target) {
        Some(offset) => offset,
        None => ctx.define_local(&target),
    };
    ctx.asm.emit_store_frame(-offset, Reg::Rax);
    Ok(())
}

pub(crate) fn compile_if(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    let condition = node
        .child(0)
        .ok_or_else(|| CompileError::MalformedAst("If without a condition".to_string()))?;
    let then_body = node
        .child(1)
        .ok_or_else(|| CompileError::MalformedAst("If without a then branch".to_string()))?;

    compile_expression(ctx, condition)?;
    ctx.asm.emit_test_reg_reg(Reg::Rax, Reg::Rax);

    let else_label = ctx.asm.create_label();
    ctx.asm.emit_jcc_label(Cond::E, else_label);
    compile_node(ctx, then_body)?;

    if let Some(else_body) = node.child(2) {
        let end_label = ctx.asm.create_label();
        ctx.asm.emit_jmp_label(end_label);
        ctx.asm.mark_label(else_label)?;
        compile_node(ctx, else_body)?;
        ctx.asm.mark_label(end_label)?;
    } else {
        ctx.asm.mark_label(else_label)?;
    }
    Ok(())
}

pub(crate) fn compile_while(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    let condition = node
        .child(0)
        .ok_or_else(|| CompileError::MalformedAst("While without a condition".to_string()))?;
    let body = node
        .child(1)
        .ok_or_else(|| CompileError::MalformedAst("While without a body".to_string()))?;

    let header = ctx.asm.create_label();
    let exit = ctx.asm.create_label();
    ctx.push_loop(LoopLabels {
        break_label: exit,
        continue_label: header,
    });

    ctx.asm.mark_label(header)?;
    compile_expression(ctx, condition)?;
    ctx.asm.emit_test_reg_reg(Reg::Rax, Reg::Rax);
    ctx.asm.emit_jcc_label(Cond::E, exit);
    compile_node(ctx, body)?;
    ctx.asm.emit_jmp_label(header);
    ctx.asm.mark_label(exit)?;

    ctx.pop_loop();
    Ok(())
}

/// `ForEvery` lowers to an index loop over a length-prefixed array: the
/// collection pointer and index live in hidden frame slots, the length is
/// re-read from the array header each iteration.
pub(crate) fn compile_for_every(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    let variable = node
        .data1()
        .as_name()
        .ok_or_else(|| CompileError::MalformedAst("ForEvery without a variable".to_string()))?
        .to_string();
    let collection = node
        .child(0)
        .ok_or_else(|| CompileError::MalformedAst("ForEvery without a collection".to_string()))?;
    let body = node
        .child(1)
        .ok_or_else(|| CompileError::MalformedAst("ForEvery without a body".to_string()))?;

    compile_expression(ctx, collection)?;
    let collection_slot = ctx.alloc_hidden_slot();
    ctx.asm.emit_store_frame(-collection_slot, Reg::Rax);

    let index_slot = ctx.alloc_hidden_slot();
    ctx.asm.emit_xor_reg_reg(Reg::Rax, Reg::Rax);
    ctx.asm.emit_store_frame(-index_slot, Reg::Rax);

    let element_slot = match ctx.lookup_variable(&variable) {
        Some(offset) => offset,
        None => ctx.define_local(&variable),
    };

    let header = ctx.asm.create_label();
    let continue_label = ctx.asm.create_label();
    let exit = ctx.asm.create_label();
    ctx.push_loop(LoopLabels {
        break_label: exit,
        continue_label,
    });

    ctx.asm.mark_label(header)?;
    ctx.asm.emit_load_frame(Reg::Rax, -index_slot);
    ctx.asm.emit_load_frame(Reg::Rbx, -collection_slot);
    ctx.asm.emit_load_mem(Reg::Rbx, Reg::Rbx, 0); // length header
    ctx.asm.emit_cmp_reg_reg(Reg::Rax, Reg::Rbx);
    ctx.asm.emit_jcc_label(Cond::Ge, exit);

    // element = collection[index]
    ctx.asm.emit_load_frame(Reg::Rbx, -collection_slot);
    ctx.asm.emit_shl_reg_imm(Reg::Rax, 3);
    ctx.asm.emit_add_reg_reg(Reg::Rax, Reg::Rbx);
    ctx.asm.emit_load_mem(Reg::Rax, Reg::Rax, 8);
    ctx.asm.emit_store_frame(-element_slot, Reg::Rax);

    compile_node(ctx, body)?;

    ctx.asm.mark_label(continue_label)?;
    ctx.asm.emit_load_frame(Reg::Rax, -index_slot);
    ctx.asm.emit_inc_reg(Reg::Rax);
    ctx.asm.emit_store_frame(-index_slot, Reg::Rax);
    ctx.asm.emit_jmp_label(header);
    ctx.asm.mark_label(exit)?;

    ctx.pop_loop();
    Ok(())
}

/// Multi-way `Branch` on an integer selector. Small case counts compile
/// to a linear compare chain; eight or more cases compile to a binary
/// search over the sorted case values. The selector is evaluated once
/// into a hidden frame slot.
pub(crate) fn compile_branch(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    let selector = node
        .child(0)
        .ok_or_else(|| CompileError::MalformedAst("Branch without a selector".to_string()))?;

    let mut cases: Vec<(i64, &Node)> = Vec::new();
    let mut default: Option<&Node> = None;
    for child in node.children().iter().skip(1) {
        match child.tag() {
            NodeTag::BranchCase if default.is_none() => {
                let value = child.data1().as_int().ok_or_else(|| {
                    CompileError::MalformedAst("BranchCase without a value".to_string())
                })?;
                let body = child.child(0).ok_or_else(|| {
                    CompileError::MalformedAst("BranchCase without a body".to_string())
                })?;
                cases.push((value, body));
            }
            NodeTag::Block if default.is_none() => default = Some(child),
            tag => {
                return Err(CompileError::MalformedAst(format!(
                    "unexpected {tag:?} in a Branch"
                )))
            }
        }
    }

    compile_expression(ctx, selector)?;
    let selector_slot = ctx.alloc_hidden_slot();
    ctx.asm.emit_store_frame(-selector_slot, Reg::Rax);

    let end = ctx.asm.create_label();
    let default_label = ctx.asm.create_label();
    let case_labels: Vec<Label> = cases.iter().map(|_| ctx.asm.create_label()).collect();

    if cases.len() >= 8 {
        let mut order: Vec<usize> = (0..cases.len()).collect();
        order.sort_by_key(|&i| cases[i].0);
        emit_branch_search(ctx, &cases, &order, selector_slot, &case_labels, default_label)?;
    } else {
        for (i, (value, _)) in cases.iter().enumerate() {
            emit_selector_compare(ctx, selector_slot, *value);
            ctx.asm.emit_jcc_label(Cond::E, case_labels[i]);
        }
        ctx.asm.emit_jmp_label(default_label);
    }

    ctx.asm.mark_label(default_label)?;
    if let Some(default) = default {
        compile_node(ctx, default)?;
    }
    ctx.asm.emit_jmp_label(end);

    for (i, (_, body)) in cases.iter().enumerate() {
        ctx.asm.mark_label(case_labels[i])?;
        compile_node(ctx, body)?;
        ctx.asm.emit_jmp_label(end);
    }
    ctx.asm.mark_label(end)?;
    Ok(())
}

/// Load the saved selector and compare it against one case value.
fn emit_selector_compare(ctx: &mut CompileContext, selector_slot: i32, value: i64) {
    ctx.asm.emit_load_frame(Reg::Rax, -selector_slot);
    if let Ok(small) = i32::try_from(value) {
        ctx.asm.emit_cmp_reg_imm(Reg::Rax, small);
    } else {
        ctx.asm.emit_mov_reg_imm(Reg::Rbx, value);
        ctx.asm.emit_cmp_reg_reg(Reg::Rax, Reg::Rbx);
    }
}

/// Emit the compare tree for the sorted case index range `order`: equal
/// dispatches to the case label, less recurses into the lower half, the
/// upper half falls through. Exhausted ranges jump to the default.
fn emit_branch_search(
    ctx: &mut CompileContext,
    cases: &[(i64, &Node)],
    order: &[usize],
    selector_slot: i32,
    case_labels: &[Label],
    default_label: Label,
) -> Result<(), CompileError> {
    if order.is_empty() {
        ctx.asm.emit_jmp_label(default_label);
        return Ok(());
    }
    let mid = order.len() / 2;
    let index = order[mid];

    emit_selector_compare(ctx, selector_slot, cases[index].0);
    ctx.asm.emit_jcc_label(Cond::E, case_labels[index]);
    let lower = ctx.asm.create_label();
    ctx.asm.emit_jcc_label(Cond::L, lower);
    emit_branch_search(ctx, cases, &order[mid + 1..], selector_slot, case_labels, default_label)?;
    ctx.asm.mark_label(lower)?;
    emit_branch_search(ctx, cases, &order[..mid], selector_slot, case_labels, default_label)
}

/// `Return` never emits `ret` directly: it loads the value and jumps to
/// the function's single exit label so the epilogue runs.
pub(crate) fn compile_return(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    let exit = ctx.exit_label().ok_or(CompileError::ReturnOutsideFunction)?;
    if let Some(value) = node.child(0) {
        compile_expression(ctx, value)?;
    } else {
        ctx.asm.emit_xor_reg_reg(Reg::Rax, Reg::Rax);
    }
    ctx.asm.emit_jmp_label(exit);
    Ok(())
}

pub(crate) fn compile_break(ctx: &mut CompileContext) -> Result<(), CompileError> {
    let labels = ctx
        .current_loop()
        .ok_or(CompileError::LoopControlOutsideLoop("Break"))?;
    ctx.asm.emit_jmp_label(labels.break_label);
    Ok(())
}

pub(crate) fn compile_continue(ctx: &mut CompileContext) -> Result<(), CompileError> {
    let labels = ctx
        .current_loop()
        .ok_or(CompileError::LoopControlOutsideLoop("Continue"))?;
    ctx.asm.emit_jmp_label(labels.continue_label);
    Ok(())
}

pub(crate) fn compile_block(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    for child in node.children() {
        compile_node(ctx, child)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_counts_distinct_assignment_targets() {
        let statements = vec![
            Node::assignment("x", Node::number(1)),
            Node::assignment("y", Node::number(2)),
            Node::assignment("x", Node::number(3)),
        ];
        assert_eq!(scan_for_locals(statements.iter(), &[]), 2);
    }

    #[test]
    fn scan_skips_parameters_and_pool_fields() {
        let statements = vec![
            Node::assignment("p", Node::number(1)),
            Node::assignment("State.counter", Node::number(2)),
            Node::assignment("fresh", Node::number(3)),
        ];
        assert_eq!(scan_for_locals(statements.iter(), &["p".to_string()]), 1);
    }

    #[test]
    fn scan_descends_into_nested_bodies() {
        let statements = vec![Node::if_stmt(
            Node::number(1),
            vec![Node::while_loop(
                Node::number(1),
                vec![Node::assignment("inner", Node::number(1))],
            )],
            Some(vec![Node::assignment("other", Node::number(2))]),
        )];
        assert_eq!(scan_for_locals(statements.iter(), &[]), 2);
    }

    #[test]
    fn scan_reserves_hidden_slots_for_for_every() {
        let statements = vec![Node::for_every(
            "item",
            Node::identifier("xs"),
            vec![Node::assignment("acc", Node::identifier("item"))],
        )];
        // xs is read, not assigned: item + acc + 2 hidden slots.
        assert_eq!(scan_for_locals(statements.iter(), &[]), 4);
    }

    #[test]
    fn scan_reserves_a_selector_slot_for_branch() {
        let statements = vec![Node::branch(
            Node::number(1),
            vec![
                (1, vec![Node::assignment("a", Node::number(1))]),
                (2, vec![Node::assignment("b", Node::number(2))]),
            ],
            Some(vec![Node::assignment("c", Node::number(3))]),
        )];
        // a, b, c plus the hidden selector slot.
        assert_eq!(scan_for_locals(statements.iter(), &[]), 4);
    }

    #[test]
    fn branch_with_many_cases_emits_a_compare_tree() {
        let mut ctx = CompileContext::new();
        ctx.begin_frame(&[], 1);
        let cases: Vec<(i64, Vec<Node>)> = (0..10)
            .map(|v| (v, vec![Node::call("PrintNumber", vec![Node::number(v)])]))
            .collect();
        let node = Node::branch(Node::number(4), cases, None);
        compile_branch(&mut ctx, &node).unwrap();
        ctx.asm.resolve_fixups().unwrap();
        // Ten equality compares, but fewer than ten on any execution path;
        // statically the tree still contains one je per case.
        let je_count = ctx
            .asm
            .code()
            .windows(2)
            .filter(|w| w == &[0x0f, 0x84])
            .count();
        assert_eq!(je_count, 10);
        // jl opcodes mark the tree structure.
        assert!(ctx.asm.code().windows(2).any(|w| w == [0x0f, 0x8c]));
    }

    #[test]
    fn empty_branch_falls_through_to_the_default() {
        let mut ctx = CompileContext::new();
        ctx.begin_frame(&[], 2);
        let node = Node::branch(
            Node::number(5),
            vec![],
            Some(vec![Node::assignment("hit", Node::number(1))]),
        );
        compile_branch(&mut ctx, &node).unwrap();
        ctx.asm.resolve_fixups().unwrap();
        assert!(ctx.lookup_variable("hit").is_some());
    }

    #[test]
    fn while_condition_test_precedes_the_body() {
        let mut ctx = CompileContext::new();
        ctx.begin_frame(&[], 1);
        let node = Node::while_loop(
            Node::number(0),
            vec![Node::assignment("x", Node::number(1))],
        );
        compile_while(&mut ctx, &node).unwrap();
        ctx.asm.resolve_fixups().unwrap();
        let code = ctx.asm.code();
        // mov rax, 0; test rax, rax; je exit
        assert_eq!(&code[..7], &[0x48, 0xc7, 0xc0, 0, 0, 0, 0]);
        assert_eq!(&code[7..10], &[0x48, 0x85, 0xc0]);
        assert_eq!(&code[10..12], &[0x0f, 0x84]);
        // Loop stack is balanced afterwards.
        assert!(ctx.current_loop().is_none());
    }

    #[test]
    fn assignment_allocates_on_first_write_and_reuses_after() {
        let mut ctx = CompileContext::new();
        ctx.begin_frame(&[], 1);
        compile_assignment(&mut ctx, &Node::assignment("v", Node::number(5))).unwrap();
        let first = ctx.lookup_variable("v").unwrap();
        compile_assignment(&mut ctx, &Node::assignment("v", Node::number(6))).unwrap();
        assert_eq!(ctx.lookup_variable("v").unwrap(), first);
    }
}
