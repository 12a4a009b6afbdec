/// Function and subroutine compilation.
///
/// Registration happens in a pre-pass so call sites can reference any
/// function through its entry label before the body exists; bodies are
/// compiled afterwards, each with exactly one entry label bound at the
/// prologue and one exit label bound at the epilogue.
use log::trace;

use crate::ast::{Node, NodeTag, TypeTag};
use crate::codegen::x86_64_linux::instructions::Reg;

use super::context::FunctionSymbol;
use super::{compile_expression, compile_node, statements, CompileContext, CompileError};

/// Pre-pass: allocate the entry label and record the signature.
pub(crate) fn register_function(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    let name = node
        .data1()
        .as_name()
        .ok_or_else(|| CompileError::MalformedAst("function declaration without a name".to_string()))?
        .to_string();

    let (params, return_type) = match node.tag() {
        NodeTag::Function => {
            let mut params = Vec::new();
            for param in node.children().iter().take(node.child_count().saturating_sub(1)) {
                let param_name = param
                    .data1()
                    .as_name()
                    .ok_or_else(|| {
                        CompileError::MalformedAst(format!("unnamed parameter of `{name}`"))
                    })?
                    .to_string();
                let ty = param
                    .data2()
                    .as_int()
                    .and_then(TypeTag::from_code)
                    .unwrap_or_default();
                params.push((param_name, ty));
            }
            let return_type = node
                .data2()
                .as_int()
                .and_then(TypeTag::from_code)
                .unwrap_or_default();
            (params, return_type)
        }
        NodeTag::Subroutine => (Vec::new(), TypeTag::Void),
        tag => {
            return Err(CompileError::MalformedAst(format!(
                "{tag:?} is not a function declaration"
            )))
        }
    };

    if params.len() > 6 {
        return Err(CompileError::TooManyParameters(name));
    }

    let entry = ctx.asm.create_label();
    ctx.add_function(FunctionSymbol {
        name,
        params,
        return_type,
        entry,
    })
}

/// Compile one registered function's body.
pub(crate) fn compile_function_body(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    let name = node
        .data1()
        .as_name()
        .expect("registered function has a name")
        .to_string();
    let symbol = ctx.get_function(&name).expect("function was registered").clone();
    trace!("compiling body of `{name}`");

    let body = node
        .child(node.child_count().wrapping_sub(1))
        .filter(|n| n.tag() == NodeTag::Block)
        .ok_or_else(|| CompileError::MalformedAst(format!("function `{name}` has no body block")))?;

    let param_names: Vec<String> = symbol.params.iter().map(|(n, _)| n.clone()).collect();
    let local_slots = statements::scan_for_locals(body.children().iter(), &param_names);

    ctx.begin_frame(&symbol.params, local_slots);
    ctx.asm.mark_label(symbol.entry)?;
    ctx.asm.emit_prologue(symbol.params.len(), local_slots);

    let exit = ctx.asm.create_label();
    ctx.set_exit_label(Some(exit));

    for stmt in body.children() {
        compile_node(ctx, stmt)?;
    }

    // Fall-through default: functions that never hit a Return yield zero.
    // Return statements jump straight to the exit label and skip this.
    ctx.asm.emit_xor_reg_reg(Reg::Rax, Reg::Rax);
    ctx.asm.mark_label(exit)?;
    ctx.asm.emit_epilogue();

    ctx.set_exit_label(None);
    Ok(())
}

/// Call a user function: evaluate arguments left to right onto the machine
/// stack, marshal them into the argument registers, and emit a direct call
/// against the entry label.
pub(crate) fn compile_call(ctx: &mut CompileContext, node: &Node) -> Result<(), CompileError> {
    let name = node.data1().as_name().expect("checked by the dispatcher");
    let symbol = ctx.get_function(name).expect("checked by the dispatcher");
    let entry = symbol.entry;
    let expected = symbol.params.len();
    let found = node.child_count();
    if expected != found {
        return Err(CompileError::Arity {
            name: name.to_string(),
            expected,
            found,
        });
    }

    for arg in node.children() {
        compile_expression(ctx, arg)?;
        ctx.asm.emit_push_reg(Reg::Rax);
    }
    ctx.asm.emit_call_arguments(found);
    ctx.asm.emit_call_label(entry);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_program;

    #[test]
    fn seven_parameters_are_rejected() {
        let params: Vec<(&str, TypeTag)> = vec![
            ("a", TypeTag::Integer),
            ("b", TypeTag::Integer),
            ("c", TypeTag::Integer),
            ("d", TypeTag::Integer),
            ("e", TypeTag::Integer),
            ("f", TypeTag::Integer),
            ("g", TypeTag::Integer),
        ];
        let root = Node::program(vec![Node::function("Wide", &params, TypeTag::Integer, vec![])]);
        assert!(matches!(
            compile_program(&root),
            Err(CompileError::TooManyParameters(name)) if name == "Wide"
        ));
    }

    #[test]
    fn call_arity_is_checked() {
        let root = Node::program(vec![
            Node::function(
                "One",
                &[("x", TypeTag::Integer)],
                TypeTag::Integer,
                vec![Node::ret(Some(Node::identifier("x")))],
            ),
            Node::call("One", vec![]),
        ]);
        assert!(matches!(
            compile_program(&root),
            Err(CompileError::Arity { expected: 1, found: 0, .. })
        ));
    }

    #[test]
    fn entry_and_exit_labels_bracket_the_body() {
        let root = Node::program(vec![Node::function(
            "Id",
            &[("x", TypeTag::Integer)],
            TypeTag::Integer,
            vec![Node::ret(Some(Node::identifier("x")))],
        )]);
        let program = compile_program(&root).unwrap();
        let offset = program.functions[0].1;
        let code = program.asm.code();
        // Prologue at the entry label.
        assert_eq!(&code[offset..offset + 4], &[0x55, 0x48, 0x89, 0xe5]);
        // Epilogue ends the function (mov rsp,rbp; pop rbp; ret).
        assert_eq!(&code[code.len() - 5..], &[0x48, 0x89, 0xec, 0x5d, 0xc3]);
    }

    #[test]
    fn mutual_recursion_compiles() {
        let root = Node::program(vec![
            Node::function(
                "Even",
                &[("n", TypeTag::Integer)],
                TypeTag::Integer,
                vec![Node::ret(Some(Node::call(
                    "Odd",
                    vec![Node::identifier("n")],
                )))],
            ),
            Node::function(
                "Odd",
                &[("n", TypeTag::Integer)],
                TypeTag::Integer,
                vec![Node::ret(Some(Node::call(
                    "Even",
                    vec![Node::identifier("n")],
                )))],
            ),
        ]);
        let program = compile_program(&root).unwrap();
        assert_eq!(program.functions.len(), 2);
    }
}
