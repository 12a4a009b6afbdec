/// veldc - compiler backend for the Veld language.
///
/// Consumes a fully-parsed, semantically-checked AST and produces a
/// statically-linked x86-64 ELF executable for Linux (or a relocatable
/// ELF object). The front end - lexer, parser, type checking - lives
/// elsewhere and talks to this crate through the [`ast`] node interface
/// and the [`compile_to_executable`] entry point.
///
/// Layers, leaves first:
/// - `emit`: code/data buffers, labels, fixups, string pool, relocations
/// - `codegen::x86_64_linux::instructions`: exact-byte x86-64 encoder
/// - `compiler`: AST walk, calling convention, frames, per-construct
///   lowering
/// - `codegen::x86_64_linux::executable`: ELF64 image layout and output
pub mod ast;
pub mod codegen;
pub mod compiler;
pub mod emit;

pub use codegen::{compile_to_executable, compile_to_object, detect_host_target, Target};
pub use compiler::{compile_program, CompileError, CompiledProgram};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Node, TypeTag};
    use std::fs;
    use std::path::PathBuf;
    use std::process::Command;

    /// Compile, run, and capture one program.
    fn run_program(name: &str, root: &Node) -> (i32, Vec<u8>) {
        let path = PathBuf::from(format!("/tmp/veldc_test_{}_{}", name, std::process::id()));
        compile_to_executable(root, &path).unwrap();

        let output = Command::new(&path).output().expect("failed to execute");
        let _ = fs::remove_file(&path);

        let status = output.status.code().unwrap_or_else(|| {
            panic!("program `{name}` was terminated by a signal");
        });
        (status, output.stdout)
    }

    #[test]
    fn print_message_writes_exactly_the_string() {
        let root = Node::program(vec![Node::call("PrintMessage", vec![Node::string("Hello")])]);
        let (status, stdout) = run_program("hello", &root);
        assert_eq!(status, 0);
        assert_eq!(stdout, b"Hello");
    }

    #[test]
    fn print_number_of_a_sum() {
        let root = Node::program(vec![Node::call(
            "PrintNumber",
            vec![Node::call("Add", vec![Node::number(10), Node::number(5)])],
        )]);
        let (status, stdout) = run_program("sum", &root);
        assert_eq!(status, 0);
        assert_eq!(stdout, b"15\n");
    }

    #[test]
    fn branch_on_a_comparison() {
        let root = Node::program(vec![
            Node::assignment("x", Node::number(10)),
            Node::if_stmt(
                Node::call("GreaterThan", vec![Node::identifier("x"), Node::number(5)]),
                vec![Node::call("PrintMessage", vec![Node::string("big")])],
                Some(vec![Node::call("PrintMessage", vec![Node::string("small")])]),
            ),
        ]);
        let (status, stdout) = run_program("branch", &root);
        assert_eq!(status, 0);
        assert_eq!(stdout, b"big");
    }

    #[test]
    fn while_loop_counts_to_three() {
        let root = Node::program(vec![
            Node::assignment("i", Node::number(0)),
            Node::while_loop(
                Node::call("LessThan", vec![Node::identifier("i"), Node::number(3)]),
                vec![
                    Node::call("PrintNumber", vec![Node::identifier("i")]),
                    Node::assignment("i", Node::call("Add", vec![Node::identifier("i"), Node::number(1)])),
                ],
            ),
        ]);
        let (status, stdout) = run_program("loop", &root);
        assert_eq!(status, 0);
        assert_eq!(stdout, b"0\n1\n2\n");
    }

    #[test]
    fn recursive_factorial_of_five() {
        let root = Node::program(vec![
            Node::function(
                "Factorial",
                &[("n", TypeTag::Integer)],
                TypeTag::Integer,
                vec![
                    Node::if_stmt(
                        Node::call("LessEqual", vec![Node::identifier("n"), Node::number(1)]),
                        vec![Node::ret(Some(Node::number(1)))],
                        None,
                    ),
                    Node::ret(Some(Node::call(
                        "Multiply",
                        vec![
                            Node::identifier("n"),
                            Node::call(
                                "Factorial",
                                vec![Node::call(
                                    "Subtract",
                                    vec![Node::identifier("n"), Node::number(1)],
                                )],
                            ),
                        ],
                    ))),
                ],
            ),
            Node::call(
                "PrintNumber",
                vec![Node::call("Factorial", vec![Node::number(5)])],
            ),
        ]);
        let (status, stdout) = run_program("factorial", &root);
        assert_eq!(status, 0);
        assert_eq!(stdout, b"120\n");
    }

    #[test]
    fn heap_round_trip_through_store_and_dereference() {
        let root = Node::program(vec![
            Node::assignment("buf", Node::call("Allocate", vec![Node::number(16)])),
            Node::call(
                "StoreValue",
                vec![Node::identifier("buf"), Node::number(42), Node::string("byte")],
            ),
            Node::call(
                "PrintNumber",
                vec![Node::call(
                    "Dereference",
                    vec![Node::identifier("buf"), Node::string("byte")],
                )],
            ),
            Node::call(
                "Deallocate",
                vec![Node::identifier("buf"), Node::number(16)],
            ),
        ]);
        let (status, stdout) = run_program("heap", &root);
        assert_eq!(status, 0);
        assert_eq!(stdout, b"42\n");
    }

    #[test]
    fn exit_status_round_trips() {
        for code in [0i64, 1, 5, 100, 255] {
            let root = Node::program(vec![Node::call("Exit", vec![Node::number(code)])]);
            let (status, stdout) = run_program(&format!("exit{code}"), &root);
            assert_eq!(status, code as i32);
            assert!(stdout.is_empty());
        }
    }

    #[test]
    fn negative_numbers_print_with_a_sign() {
        let root = Node::program(vec![Node::call(
            "PrintNumber",
            vec![Node::call("Negate", vec![Node::number(123)])],
        )]);
        let (_, stdout) = run_program("negative", &root);
        assert_eq!(stdout, b"-123\n");
    }

    #[test]
    fn zero_prints_as_a_single_digit() {
        let root = Node::program(vec![Node::call("PrintNumber", vec![Node::number(0)])]);
        let (_, stdout) = run_program("zero", &root);
        assert_eq!(stdout, b"0\n");
    }

    #[test]
    fn pool_fields_persist_across_functions() {
        let root = Node::program(vec![
            Node::pool("State", &[("counter", 40)]),
            Node::subroutine(
                "Bump",
                vec![Node::assignment(
                    "State.counter",
                    Node::call("Add", vec![Node::identifier("State.counter"), Node::number(1)]),
                )],
            ),
            Node::call("Bump", vec![]),
            Node::call("Bump", vec![]),
            Node::call("PrintNumber", vec![Node::identifier("State.counter")]),
        ]);
        let (status, stdout) = run_program("pool", &root);
        assert_eq!(status, 0);
        assert_eq!(stdout, b"42\n");
    }

    #[test]
    fn for_every_walks_an_array() {
        let root = Node::program(vec![
            Node::assignment("xs", Node::call("ArrayCreate", vec![Node::number(3)])),
            Node::call(
                "ArraySet",
                vec![Node::identifier("xs"), Node::number(0), Node::number(7)],
            ),
            Node::call(
                "ArraySet",
                vec![Node::identifier("xs"), Node::number(1), Node::number(8)],
            ),
            Node::call(
                "ArraySet",
                vec![Node::identifier("xs"), Node::number(2), Node::number(9)],
            ),
            Node::for_every(
                "x",
                Node::identifier("xs"),
                vec![Node::call("PrintNumber", vec![Node::identifier("x")])],
            ),
        ]);
        let (status, stdout) = run_program("forevery", &root);
        assert_eq!(status, 0);
        assert_eq!(stdout, b"7\n8\n9\n");
    }

    #[test]
    fn break_and_continue_target_the_innermost_loop() {
        // i from 0: skip 1, stop at 3 -> prints 0, 2.
        let root = Node::program(vec![
            Node::assignment("i", Node::number(-1)),
            Node::while_loop(
                Node::number(1),
                vec![
                    Node::assignment("i", Node::call("Add", vec![Node::identifier("i"), Node::number(1)])),
                    Node::if_stmt(
                        Node::call("EqualTo", vec![Node::identifier("i"), Node::number(1)]),
                        vec![Node::cont()],
                        None,
                    ),
                    Node::if_stmt(
                        Node::call("EqualTo", vec![Node::identifier("i"), Node::number(3)]),
                        vec![Node::brk()],
                        None,
                    ),
                    Node::call("PrintNumber", vec![Node::identifier("i")]),
                ],
            ),
            Node::call("PrintMessage", vec![Node::string("done")]),
        ]);
        let (status, stdout) = run_program("breakcontinue", &root);
        assert_eq!(status, 0);
        assert_eq!(stdout, b"0\n2\ndone");
    }

    #[test]
    fn six_parameters_arrive_in_order() {
        let root = Node::program(vec![
            Node::function(
                "Weigh",
                &[
                    ("a", TypeTag::Integer),
                    ("b", TypeTag::Integer),
                    ("c", TypeTag::Integer),
                    ("d", TypeTag::Integer),
                    ("e", TypeTag::Integer),
                    ("f", TypeTag::Integer),
                ],
                TypeTag::Integer,
                vec![
                    // a + 2*b + 3*c + 4*d + 5*e + 6*f distinguishes every slot.
                    Node::assignment("acc", Node::identifier("a")),
                    Node::assignment(
                        "acc",
                        Node::call(
                            "Add",
                            vec![
                                Node::identifier("acc"),
                                Node::call("Multiply", vec![Node::number(2), Node::identifier("b")]),
                            ],
                        ),
                    ),
                    Node::assignment(
                        "acc",
                        Node::call(
                            "Add",
                            vec![
                                Node::identifier("acc"),
                                Node::call("Multiply", vec![Node::number(3), Node::identifier("c")]),
                            ],
                        ),
                    ),
                    Node::assignment(
                        "acc",
                        Node::call(
                            "Add",
                            vec![
                                Node::identifier("acc"),
                                Node::call("Multiply", vec![Node::number(4), Node::identifier("d")]),
                            ],
                        ),
                    ),
                    Node::assignment(
                        "acc",
                        Node::call(
                            "Add",
                            vec![
                                Node::identifier("acc"),
                                Node::call("Multiply", vec![Node::number(5), Node::identifier("e")]),
                            ],
                        ),
                    ),
                    Node::assignment(
                        "acc",
                        Node::call(
                            "Add",
                            vec![
                                Node::identifier("acc"),
                                Node::call("Multiply", vec![Node::number(6), Node::identifier("f")]),
                            ],
                        ),
                    ),
                    Node::ret(Some(Node::identifier("acc"))),
                ],
            ),
            Node::call(
                "PrintNumber",
                vec![Node::call(
                    "Weigh",
                    vec![
                        Node::number(1),
                        Node::number(1),
                        Node::number(1),
                        Node::number(1),
                        Node::number(1),
                        Node::number(1),
                    ],
                )],
            ),
        ]);
        let (_, stdout) = run_program("sixparams", &root);
        assert_eq!(stdout, b"21\n");
    }

    #[test]
    fn logic_short_circuits() {
        // Or(1, anything) is true without evaluating the right side;
        // And(0, anything) is false. Division by zero on the skipped side
        // would crash if it were evaluated.
        let root = Node::program(vec![
            Node::if_stmt(
                Node::call(
                    "Or",
                    vec![
                        Node::number(1),
                        Node::call("Divide", vec![Node::number(1), Node::number(0)]),
                    ],
                ),
                vec![Node::call("PrintMessage", vec![Node::string("or")])],
                None,
            ),
            Node::if_stmt(
                Node::call(
                    "And",
                    vec![
                        Node::number(0),
                        Node::call("Divide", vec![Node::number(1), Node::number(0)]),
                    ],
                ),
                vec![Node::call("PrintMessage", vec![Node::string("bad")])],
                Some(vec![Node::call("PrintMessage", vec![Node::string("and")])]),
            ),
        ]);
        let (status, stdout) = run_program("shortcircuit", &root);
        assert_eq!(status, 0);
        assert_eq!(stdout, b"orand");
    }

    #[test]
    fn bitwise_and_modulo_arithmetic() {
        let root = Node::program(vec![
            Node::call(
                "PrintNumber",
                vec![Node::call("LeftShift", vec![Node::number(3), Node::number(4)])],
            ),
            Node::call(
                "PrintNumber",
                vec![Node::call("Modulo", vec![Node::number(17), Node::number(5)])],
            ),
            Node::call(
                "PrintNumber",
                vec![Node::call("BitwiseXor", vec![Node::number(0xff), Node::number(0x0f)])],
            ),
            Node::call(
                "PrintNumber",
                vec![Node::call("RightShift", vec![Node::call("Negate", vec![Node::number(16)]), Node::number(2)])],
            ),
        ]);
        let (_, stdout) = run_program("bits", &root);
        assert_eq!(stdout, b"48\n2\n240\n-4\n");
    }

    #[test]
    fn address_of_and_call_indirect_reach_a_function() {
        let root = Node::program(vec![
            Node::function(
                "Twice",
                &[("x", TypeTag::Integer)],
                TypeTag::Integer,
                vec![Node::ret(Some(Node::call(
                    "Multiply",
                    vec![Node::identifier("x"), Node::number(2)],
                )))],
            ),
            Node::assignment("f", Node::call("AddressOf", vec![Node::identifier("Twice")])),
            Node::call(
                "PrintNumber",
                vec![Node::call(
                    "CallIndirect",
                    vec![Node::identifier("f"), Node::number(21)],
                )],
            ),
        ]);
        let (_, stdout) = run_program("indirect", &root);
        assert_eq!(stdout, b"42\n");
    }

    #[test]
    fn print_char_emits_single_bytes() {
        let root = Node::program(vec![
            Node::call("PrintChar", vec![Node::number(72)]),
            Node::call("PrintChar", vec![Node::number(105)]),
        ]);
        let (_, stdout) = run_program("chars", &root);
        assert_eq!(stdout, b"Hi");
    }

    #[test]
    fn print_message_of_a_computed_pointer() {
        // A string literal's address flows through a variable; the scan
        // finds the terminator.
        let root = Node::program(vec![
            Node::assignment("s", Node::string("scan me")),
            Node::call("PrintMessage", vec![Node::identifier("s")]),
        ]);
        let (_, stdout) = run_program("cstring", &root);
        assert_eq!(stdout, b"scan me");
    }

    #[test]
    fn string_length_and_compare() {
        let root = Node::program(vec![
            Node::call(
                "PrintNumber",
                vec![Node::call("StringLength", vec![Node::string("Hello")])],
            ),
            Node::call(
                "PrintNumber",
                vec![Node::call(
                    "StringCompare",
                    vec![Node::string("same"), Node::string("same")],
                )],
            ),
            Node::call(
                "PrintNumber",
                vec![Node::call(
                    "StringCompare",
                    vec![Node::string("one"), Node::string("two")],
                )],
            ),
        ]);
        let (_, stdout) = run_program("strings", &root);
        assert_eq!(stdout, b"5\n0\n1\n");
    }

    #[test]
    fn mem_copy_compare_and_scan() {
        // Copy a literal into a heap block, verify equality, find a byte.
        let root = Node::program(vec![
            Node::assignment("src", Node::string("needle")),
            Node::assignment("buf", Node::call("Allocate", vec![Node::number(64)])),
            Node::call(
                "MemCopy",
                vec![Node::identifier("buf"), Node::identifier("src"), Node::number(7)],
            ),
            Node::call(
                "PrintNumber",
                vec![Node::call(
                    "MemCompare",
                    vec![Node::identifier("buf"), Node::identifier("src"), Node::number(7)],
                )],
            ),
            Node::call("PrintMessage", vec![Node::identifier("buf")]),
            Node::call("PrintChar", vec![Node::number(10)]),
            Node::call(
                "PrintNumber",
                vec![Node::call(
                    "MemChr",
                    vec![Node::identifier("buf"), Node::number(b'd' as i64), Node::number(6)],
                )],
            ),
            Node::call(
                "PrintNumber",
                vec![Node::call(
                    "MemChr",
                    vec![Node::identifier("buf"), Node::number(b'z' as i64), Node::number(6)],
                )],
            ),
        ]);
        let (_, stdout) = run_program("mem", &root);
        assert_eq!(stdout, b"0\nneedle\n3\n-1\n");
    }

    #[test]
    fn file_round_trip_through_the_kernel() {
        let path = format!("/tmp/veldc_file_io_{}", std::process::id());
        let root = Node::program(vec![
            Node::assignment("fd", Node::call("FileCreate", vec![Node::string(&path)])),
            Node::call(
                "FileWrite",
                vec![Node::identifier("fd"), Node::string("stored"), Node::number(6)],
            ),
            Node::call("FileClose", vec![Node::identifier("fd")]),
            Node::assignment("buf", Node::call("Allocate", vec![Node::number(64)])),
            Node::assignment("rd", Node::call("FileOpen", vec![Node::string(&path)])),
            Node::call(
                "FileRead",
                vec![Node::identifier("rd"), Node::identifier("buf"), Node::number(64)],
            ),
            Node::call("FileClose", vec![Node::identifier("rd")]),
            Node::call("PrintMessage", vec![Node::identifier("buf")]),
        ]);
        let (status, stdout) = run_program("fileio", &root);
        let _ = fs::remove_file(&path);
        assert_eq!(status, 0);
        assert_eq!(stdout, b"stored");
    }

    #[test]
    fn branch_selects_the_matching_case() {
        let root = Node::program(vec![
            Node::assignment("x", Node::number(2)),
            Node::branch(
                Node::identifier("x"),
                vec![
                    (1, vec![Node::call("PrintMessage", vec![Node::string("one")])]),
                    (2, vec![Node::call("PrintMessage", vec![Node::string("two")])]),
                    (3, vec![Node::call("PrintMessage", vec![Node::string("three")])]),
                ],
                Some(vec![Node::call("PrintMessage", vec![Node::string("other")])]),
            ),
            Node::branch(
                Node::number(99),
                vec![(1, vec![Node::call("PrintMessage", vec![Node::string("one")])])],
                Some(vec![Node::call("PrintMessage", vec![Node::string("default")])]),
            ),
        ]);
        let (_, stdout) = run_program("branchstmt", &root);
        assert_eq!(stdout, b"twodefault");
    }

    #[test]
    fn wide_branch_uses_the_search_tree_correctly() {
        // Twelve cases forces the binary-search lowering; probe a few
        // selectors including a miss.
        let cases: Vec<(i64, Vec<Node>)> = (0..12)
            .map(|v| {
                (
                    v * 10,
                    vec![Node::call("PrintNumber", vec![Node::number(v * 10)])],
                )
            })
            .collect();
        let mut statements = Vec::new();
        for probe in [0i64, 50, 110, 55] {
            statements.push(Node::branch(
                Node::number(probe),
                cases.clone(),
                Some(vec![Node::call("PrintNumber", vec![Node::number(-1)])]),
            ));
        }
        let root = Node::program(statements);
        let (_, stdout) = run_program("widebranch", &root);
        assert_eq!(stdout, b"0\n50\n110\n-1\n");
    }

    #[test]
    fn subroutine_main_return_value_becomes_the_exit_status() {
        let root = Node::program(vec![Node::subroutine(
            "Main",
            vec![
                Node::call("PrintMessage", vec![Node::string("main")]),
                Node::ret(Some(Node::number(9))),
            ],
        )]);
        let (status, stdout) = run_program("main", &root);
        assert_eq!(status, 9);
        assert_eq!(stdout, b"main");
    }
}
