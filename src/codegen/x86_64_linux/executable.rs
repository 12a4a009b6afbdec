/// ELF64 executable generation for x86-64 Linux.
///
/// Builds a minimal static executable: ELF header, two PT_LOAD program
/// headers (R+X code, R+W data), a header page of padding, the code image,
/// and the data image at the next page boundary. No section headers are
/// emitted; the kernel only reads program headers.
use log::debug;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::compiler::{CompileError, CompiledProgram};

/// Standard Linux load address for non-PIE executables.
const LOAD_ADDR: u64 = 0x400000;
const PAGE_SIZE: u64 = 0x1000;

/// Final file/memory layout, derived from the section sizes alone.
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub code_file_offset: u64,
    pub code_vaddr: u64,
    pub data_file_offset: u64,
    pub data_vaddr: u64,
}

impl Layout {
    pub fn for_sizes(code_size: usize, _data_size: usize) -> Layout {
        // First page holds the ELF and program headers.
        let code_file_offset = PAGE_SIZE;
        let code_end = code_file_offset + code_size as u64;
        // Data begins at the next page boundary after the code image so the
        // two segments never share a page with different permissions.
        let data_file_offset = (code_end + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
        Layout {
            code_file_offset,
            code_vaddr: LOAD_ADDR + code_file_offset,
            data_file_offset,
            data_vaddr: LOAD_ADDR + data_file_offset,
        }
    }
}

/// Apply final relocations and write the executable image to `path`.
pub fn write_executable(program: &mut CompiledProgram, path: &Path) -> Result<(), CompileError> {
    let layout = Layout::for_sizes(program.asm.code().len(), program.asm.data().len());
    program
        .asm
        .apply_relocations(layout.code_vaddr, layout.data_vaddr)?;

    debug!(
        "ELF layout: code 0x{:x} ({} bytes), data 0x{:x} ({} bytes), entry +0x{:x}",
        layout.code_vaddr,
        program.asm.code().len(),
        layout.data_vaddr,
        program.asm.data().len(),
        program.entry_offset
    );

    let image = build_image(
        program.asm.code(),
        program.asm.data(),
        &layout,
        program.entry_offset,
    );

    let mut file = fs::File::create(path)?;
    file.write_all(&image)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = file.metadata()?.permissions();
        permissions.set_mode(0o755);
        file.set_permissions(permissions)?;
    }

    Ok(())
}

fn build_image(code: &[u8], data: &[u8], layout: &Layout, entry_offset: usize) -> Vec<u8> {
    let mut elf = Vec::with_capacity(layout.data_file_offset as usize + data.len());
    let entry_point = layout.code_vaddr + entry_offset as u64;

    // ===== ELF header (64 bytes) =====
    elf.extend_from_slice(&[0x7f, b'E', b'L', b'F']); // magic
    elf.push(2); // EI_CLASS: 64-bit
    elf.push(1); // EI_DATA: little endian
    elf.push(1); // EI_VERSION: current
    elf.push(0); // EI_OSABI: System V
    elf.extend_from_slice(&[0; 8]); // EI_PAD
    elf.extend_from_slice(&2u16.to_le_bytes()); // e_type: ET_EXEC
    elf.extend_from_slice(&0x3eu16.to_le_bytes()); // e_machine: EM_X86_64
    elf.extend_from_slice(&1u32.to_le_bytes()); // e_version
    elf.extend_from_slice(&entry_point.to_le_bytes()); // e_entry
    elf.extend_from_slice(&64u64.to_le_bytes()); // e_phoff
    elf.extend_from_slice(&0u64.to_le_bytes()); // e_shoff (no sections)
    elf.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    elf.extend_from_slice(&64u16.to_le_bytes()); // e_ehsize
    elf.extend_from_slice(&56u16.to_le_bytes()); // e_phentsize
    elf.extend_from_slice(&2u16.to_le_bytes()); // e_phnum
    elf.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
    elf.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    elf.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx

    // ===== Program header: code segment (R+X) =====
    elf.extend_from_slice(&1u32.to_le_bytes()); // p_type: PT_LOAD
    elf.extend_from_slice(&5u32.to_le_bytes()); // p_flags: R+X
    elf.extend_from_slice(&layout.code_file_offset.to_le_bytes());
    elf.extend_from_slice(&layout.code_vaddr.to_le_bytes());
    elf.extend_from_slice(&layout.code_vaddr.to_le_bytes());
    elf.extend_from_slice(&(code.len() as u64).to_le_bytes());
    elf.extend_from_slice(&(code.len() as u64).to_le_bytes());
    elf.extend_from_slice(&PAGE_SIZE.to_le_bytes());

    // ===== Program header: data segment (R+W) =====
    elf.extend_from_slice(&1u32.to_le_bytes()); // p_type: PT_LOAD
    elf.extend_from_slice(&6u32.to_le_bytes()); // p_flags: R+W
    elf.extend_from_slice(&layout.data_file_offset.to_le_bytes());
    elf.extend_from_slice(&layout.data_vaddr.to_le_bytes());
    elf.extend_from_slice(&layout.data_vaddr.to_le_bytes());
    elf.extend_from_slice(&(data.len() as u64).to_le_bytes());
    elf.extend_from_slice(&(data.len() as u64).to_le_bytes());
    elf.extend_from_slice(&PAGE_SIZE.to_le_bytes());

    elf.resize(layout.code_file_offset as usize, 0);
    elf.extend_from_slice(code);
    elf.resize(layout.data_file_offset as usize, 0);
    elf.extend_from_slice(data);

    elf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_places_data_on_the_next_page() {
        let layout = Layout::for_sizes(10, 100);
        assert_eq!(layout.code_file_offset, 0x1000);
        assert_eq!(layout.code_vaddr, 0x401000);
        assert_eq!(layout.data_file_offset, 0x2000);
        assert_eq!(layout.data_vaddr, 0x402000);

        let big = Layout::for_sizes(0x1001, 8);
        assert_eq!(big.data_file_offset, 0x3000);
        assert_eq!(big.data_vaddr, 0x403000);
    }

    #[test]
    fn image_has_well_formed_header() {
        let layout = Layout::for_sizes(16, 8);
        let image = build_image(&[0x90; 16], &[1, 2, 3, 4, 5, 6, 7, 8], &layout, 4);

        assert_eq!(&image[0..4], &[0x7f, b'E', b'L', b'F']);
        assert_eq!(image[4], 2); // 64-bit
        assert_eq!(image[5], 1); // little endian
        assert_eq!(&image[16..18], &2u16.to_le_bytes()); // ET_EXEC
        assert_eq!(&image[18..20], &0x3eu16.to_le_bytes()); // x86-64
        assert_eq!(&image[24..32], &0x401004u64.to_le_bytes()); // entry
        assert_eq!(&image[32..40], &64u64.to_le_bytes()); // phoff
        assert_eq!(&image[54..56], &64u16.to_le_bytes()); // ehsize
        assert_eq!(&image[56..58], &56u16.to_le_bytes()); // phentsize
        assert_eq!(&image[58..60], &2u16.to_le_bytes()); // phnum

        // Code phdr.
        assert_eq!(&image[64..68], &1u32.to_le_bytes()); // PT_LOAD
        assert_eq!(&image[68..72], &5u32.to_le_bytes()); // R+X
        // Data phdr.
        assert_eq!(&image[120..124], &1u32.to_le_bytes()); // PT_LOAD
        assert_eq!(&image[124..128], &6u32.to_le_bytes()); // R+W

        // Code and data land at their file offsets.
        assert_eq!(image[0x1000], 0x90);
        assert_eq!(&image[0x2000..0x2008], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
