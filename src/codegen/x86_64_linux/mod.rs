/// x86-64 Linux backend.
///
/// Submodules:
/// - `instructions`: exact-byte instruction encoder
/// - `abi`: System V calling convention and stack frames
/// - `executable`: hand-written ELF64 static executable output
///
/// This module also lowers a compiled program into a relocatable ELF
/// object via the `object` crate, for users who prefer to run their own
/// linker over the self-contained executable path.
pub(crate) mod abi;
pub mod executable;
pub mod instructions;

use std::path::Path;

use object::write::{Object, Relocation as ObjectRelocation, StandardSection, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, RelocationEncoding, RelocationFlags, RelocationKind,
    SymbolFlags, SymbolKind, SymbolScope,
};

use crate::ast::Node;
use crate::compiler::{self, CompileError};
use crate::emit::DataRelocKind;

/// Compile `root` and write a static ELF executable to `output_path`.
pub fn compile_to_executable(root: &Node, output_path: &Path) -> Result<(), CompileError> {
    let mut program = compiler::compile_program(root)?;
    executable::write_executable(&mut program, output_path)
}

/// Compile `root` into relocatable ELF object bytes.
///
/// Internal label fixups are already resolved; what remains are the
/// code-to-data references and absolute code addresses, which become
/// relocations against the section symbols.
pub fn compile_to_object(root: &Node) -> Result<Vec<u8>, CompileError> {
    let program = compiler::compile_program(root)?;

    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let text_section = obj.section_id(StandardSection::Text);
    obj.append_section_data(text_section, program.asm.code(), 16);

    let data_section = obj.section_id(StandardSection::Data);
    if !program.asm.data().is_empty() {
        obj.append_section_data(data_section, program.asm.data(), 8);
    }

    obj.add_symbol(Symbol {
        name: b"_start".to_vec(),
        value: program.entry_offset as u64,
        size: 0,
        kind: SymbolKind::Text,
        scope: SymbolScope::Linkage,
        weak: false,
        section: SymbolSection::Section(text_section),
        flags: SymbolFlags::None,
    });

    for (name, offset) in &program.functions {
        obj.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value: *offset as u64,
            size: 0,
            kind: SymbolKind::Text,
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Section(text_section),
            flags: SymbolFlags::None,
        });
    }

    let data_symbol = obj.section_symbol(data_section);
    for reloc in program.asm.data_relocations() {
        let (kind, size, addend) = match reloc.kind {
            DataRelocKind::Abs64 => (RelocationKind::Absolute, 64, reloc.data_offset as i64),
            DataRelocKind::Rel32 => (RelocationKind::Relative, 32, reloc.data_offset as i64 - 4),
        };
        obj.add_relocation(
            text_section,
            ObjectRelocation {
                offset: reloc.site as u64,
                symbol: data_symbol,
                addend,
                flags: RelocationFlags::Generic {
                    kind,
                    encoding: RelocationEncoding::Generic,
                    size,
                },
            },
        )
        .expect("data relocation against the data section symbol");
    }

    let text_symbol = obj.section_symbol(text_section);
    for reference in program.asm.abs_label_refs()? {
        obj.add_relocation(
            text_section,
            ObjectRelocation {
                offset: reference.site as u64,
                symbol: text_symbol,
                addend: reference.target_offset as i64,
                flags: RelocationFlags::Generic {
                    kind: RelocationKind::Absolute,
                    encoding: RelocationEncoding::Generic,
                    size: 64,
                },
            },
        )
        .expect("absolute relocation against the text section symbol");
    }

    Ok(obj.write().expect("serialize ELF object"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::TypeTag;
    use object::{Object as _, ObjectSection, ObjectSymbol};

    fn sample_program() -> Node {
        Node::program(vec![
            Node::pool("State", &[("counter", 3)]),
            Node::function(
                "Bump",
                &[("n", TypeTag::Integer)],
                TypeTag::Integer,
                vec![Node::ret(Some(Node::call(
                    "Add",
                    vec![Node::identifier("n"), Node::identifier("State.counter")],
                )))],
            ),
            Node::call("PrintMessage", vec![Node::string("hi")]),
        ])
    }

    #[test]
    fn object_output_parses_and_carries_symbols() {
        let bytes = compile_to_object(&sample_program()).unwrap();
        let parsed = object::File::parse(bytes.as_slice()).unwrap();

        let symbols: Vec<String> = parsed
            .symbols()
            .filter_map(|s| s.name().ok().map(str::to_string))
            .collect();
        assert!(symbols.iter().any(|s| s == "_start"));
        assert!(symbols.iter().any(|s| s == "Bump"));

        let text = parsed.section_by_name(".text").unwrap();
        assert!(text.size() > 0);
        // The pool slot and the string literal both live in .data.
        let data = parsed.section_by_name(".data").unwrap();
        assert_eq!(data.data().unwrap().len(), 8 + 3);

        // The pool load and the string address load produced relocations.
        assert!(text.relocations().count() >= 2);
    }
}
