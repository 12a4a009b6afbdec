/// Code generation: target selection and the public compile entry points.
///
/// Current supported target:
/// - x86-64 Linux (ELF executables, System V ABI, Linux syscalls)
///
/// The emission layer and the compile layer are target-neutral; a second
/// backend adds its own encoder and output modules under `codegen` and a
/// new `Target` arm.
pub mod x86_64_linux;

use std::path::Path;

use crate::ast::Node;
use crate::compiler::CompileError;

/// Supported target platforms (architecture + OS).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    X86_64Linux,
    X86_64Windows,
    X86_64MacOs,
    Arm64Linux,
    Riscv64Linux,
}

impl Target {
    /// Compile a program AST into a static executable at `output_path`.
    pub fn compile_to_executable(self, root: &Node, output_path: &Path) -> Result<(), CompileError> {
        match self {
            Target::X86_64Linux => x86_64_linux::compile_to_executable(root, output_path),
            Target::X86_64Windows => unimplemented!("x86-64 Windows (PE format) not yet implemented"),
            Target::X86_64MacOs => unimplemented!("x86-64 macOS (Mach-O format) not yet implemented"),
            Target::Arm64Linux => unimplemented!("ARM64 Linux code generation not yet implemented"),
            Target::Riscv64Linux => unimplemented!("RISC-V Linux code generation not yet implemented"),
        }
    }

    /// Compile a program AST into a relocatable object file.
    pub fn compile_to_object(self, root: &Node) -> Result<Vec<u8>, CompileError> {
        match self {
            Target::X86_64Linux => x86_64_linux::compile_to_object(root),
            Target::X86_64Windows => unimplemented!("x86-64 Windows (PE format) not yet implemented"),
            Target::X86_64MacOs => unimplemented!("x86-64 macOS (Mach-O format) not yet implemented"),
            Target::Arm64Linux => unimplemented!("ARM64 Linux code generation not yet implemented"),
            Target::Riscv64Linux => unimplemented!("RISC-V Linux code generation not yet implemented"),
        }
    }
}

/// Detect the host target platform.
pub fn detect_host_target() -> Target {
    Target::X86_64Linux
}

/// Compile for the host target and write a static executable.
pub fn compile_to_executable(root: &Node, output_path: &Path) -> Result<(), CompileError> {
    detect_host_target().compile_to_executable(root, output_path)
}

/// Compile for the host target into relocatable object bytes.
pub fn compile_to_object(root: &Node) -> Result<Vec<u8>, CompileError> {
    detect_host_target().compile_to_object(root)
}
