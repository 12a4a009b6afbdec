/// Architecture-neutral emission layer.
///
/// The `Assembler` owns the code and data buffers plus everything needed to
/// resolve forward references: a label table, a fixup table, a deduplicating
/// string pool, and the list of code-to-data relocations that can only be
/// patched once the final section addresses are known.
///
/// Instruction encodings live in `codegen::x86_64_linux`; compile modules
/// only ever go through the `emit_*` wrappers defined there, never through
/// raw byte appends.
use log::debug;
use std::collections::HashMap;
use thiserror::Error;

/// Identifier for a jump/call target. Allocated unbound, bound at most once.
/// Ids index a dense table and are never reused within a compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(u32);

impl Label {
    pub fn id(self) -> u32 {
        self.0
    }
}

/// Width and interpretation of a patched label reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixupKind {
    /// One-byte signed displacement from the end of the field.
    Rel8,
    /// Four-byte signed displacement from the end of the field.
    Rel32,
    /// Eight-byte absolute virtual address, patched at final layout.
    Abs64,
}

impl FixupKind {
    fn width(self) -> usize {
        match self {
            FixupKind::Rel8 => 1,
            FixupKind::Rel32 => 4,
            FixupKind::Abs64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Fixup {
    site: usize,
    target: Label,
    kind: FixupKind,
}

/// How a code-to-data reference is patched at final layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataRelocKind {
    /// Eight-byte absolute data address (movabs immediate).
    Abs64,
    /// Four-byte RIP-relative displacement to the data section.
    Rel32,
}

/// A code-buffer site that refers into the data section.
#[derive(Debug, Clone, Copy)]
pub struct DataReloc {
    pub site: usize,
    pub data_offset: usize,
    pub kind: DataRelocKind,
}

/// A label reference that resolves to an absolute code address.
/// Exported so the object-file path can turn these into relocations.
#[derive(Debug, Clone, Copy)]
pub struct AbsLabelRef {
    pub site: usize,
    pub target_offset: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmitError {
    #[error("fixup references label {0}, which was never bound")]
    UnboundLabel(u32),
    #[error("label {0} bound twice")]
    LabelRebound(u32),
    #[error("rel8 displacement {displacement} at code offset {site} does not fit in a signed byte")]
    DisplacementOutOfRange { site: usize, displacement: i64 },
}

/// Code and data buffers with forward-reference bookkeeping.
#[derive(Debug, Default)]
pub struct Assembler {
    code: Vec<u8>,
    data: Vec<u8>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
    strings: HashMap<String, usize>,
    data_relocs: Vec<DataReloc>,
    resolved: bool,
}

impl Assembler {
    pub fn new() -> Assembler {
        Assembler {
            code: Vec::with_capacity(4096),
            data: Vec::with_capacity(512),
            ..Assembler::default()
        }
    }

    /// Current emission offset relative to the start of the code buffer.
    pub fn position(&self) -> usize {
        self.code.len()
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn emit_byte(&mut self, byte: u8) {
        assert!(!self.resolved, "emission after fixup resolution");
        self.code.push(byte);
    }

    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        assert!(!self.resolved, "emission after fixup resolution");
        self.code.extend_from_slice(bytes);
    }

    pub fn emit_word(&mut self, value: u16) {
        self.emit_bytes(&value.to_le_bytes());
    }

    pub fn emit_dword(&mut self, value: u32) {
        self.emit_bytes(&value.to_le_bytes());
    }

    pub fn emit_qword(&mut self, value: u64) {
        self.emit_bytes(&value.to_le_bytes());
    }

    /// Allocate an unbound label.
    pub fn create_label(&mut self) -> Label {
        let id = self.labels.len() as u32;
        self.labels.push(None);
        Label(id)
    }

    /// Bind a label to the current code offset.
    pub fn mark_label(&mut self, label: Label) -> Result<(), EmitError> {
        let slot = &mut self.labels[label.0 as usize];
        if slot.is_some() {
            return Err(EmitError::LabelRebound(label.0));
        }
        *slot = Some(self.code.len());
        Ok(())
    }

    /// Offset a label is bound to, if it has been bound.
    pub fn label_offset(&self, label: Label) -> Option<usize> {
        self.labels[label.0 as usize]
    }

    /// Record the current offset as a fixup site against `target` and emit
    /// placeholder bytes of the matching width.
    pub fn add_fixup(&mut self, target: Label, kind: FixupKind) {
        let site = self.code.len();
        self.fixups.push(Fixup { site, target, kind });
        self.emit_bytes(&[0u8; 8][..kind.width()]);
    }

    /// Deduplicating string pool: returns the data-buffer offset of a
    /// NUL-terminated copy of `s`, appending it on first use.
    pub fn add_string(&mut self, s: &str) -> usize {
        if let Some(&offset) = self.strings.get(s) {
            return offset;
        }
        let offset = self.data.len();
        self.strings.insert(s.to_string(), offset);
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
        offset
    }

    /// Append raw bytes (pool field initial values) to the data buffer.
    pub fn append_data(&mut self, bytes: &[u8]) -> usize {
        let offset = self.data.len();
        self.data.extend_from_slice(bytes);
        offset
    }

    /// Record the current offset as a data reference and emit the
    /// placeholder field (4 or 8 bytes depending on the kind).
    pub fn add_data_reloc(&mut self, kind: DataRelocKind, data_offset: usize) {
        let site = self.code.len();
        self.data_relocs.push(DataReloc {
            site,
            data_offset,
            kind,
        });
        match kind {
            DataRelocKind::Abs64 => self.emit_bytes(&[0u8; 8]),
            DataRelocKind::Rel32 => self.emit_bytes(&[0u8; 4]),
        }
    }

    pub fn data_relocations(&self) -> &[DataReloc] {
        &self.data_relocs
    }

    /// Absolute label references left pending after `resolve_fixups`,
    /// with their bound target offsets.
    pub fn abs_label_refs(&self) -> Result<Vec<AbsLabelRef>, EmitError> {
        self.fixups
            .iter()
            .filter(|f| f.kind == FixupKind::Abs64)
            .map(|f| {
                let target_offset = self
                    .label_offset(f.target)
                    .ok_or(EmitError::UnboundLabel(f.target.0))?;
                Ok(AbsLabelRef {
                    site: f.site,
                    target_offset,
                })
            })
            .collect()
    }

    /// Resolve every relative label fixup against the code buffer.
    ///
    /// Absolute (`Abs64`) fixups and data relocations survive this pass;
    /// they need the final virtual addresses and are patched by
    /// `apply_relocations` (executable path) or exported as relocation
    /// records (object path). After this call the buffers are frozen:
    /// further emission is a bug.
    pub fn resolve_fixups(&mut self) -> Result<(), EmitError> {
        for i in 0..self.fixups.len() {
            let fixup = self.fixups[i];
            let target = self
                .label_offset(fixup.target)
                .ok_or(EmitError::UnboundLabel(fixup.target.0))?;
            let displacement = target as i64 - (fixup.site + fixup.kind.width()) as i64;
            match fixup.kind {
                FixupKind::Rel8 => {
                    if i8::try_from(displacement).is_err() {
                        return Err(EmitError::DisplacementOutOfRange {
                            site: fixup.site,
                            displacement,
                        });
                    }
                    self.code[fixup.site] = displacement as i8 as u8;
                }
                FixupKind::Rel32 => {
                    if i32::try_from(displacement).is_err() {
                        return Err(EmitError::DisplacementOutOfRange {
                            site: fixup.site,
                            displacement,
                        });
                    }
                    self.patch_dword(fixup.site, displacement as i32 as u32);
                }
                FixupKind::Abs64 => {}
            }
        }
        debug!(
            "resolved {} fixups, {} data relocations pending",
            self.fixups.len(),
            self.data_relocs.len()
        );
        self.resolved = true;
        Ok(())
    }

    /// Patch absolute label fixups and data relocations against the final
    /// section addresses. Runs once, after layout, on the executable path.
    pub fn apply_relocations(&mut self, code_vaddr: u64, data_vaddr: u64) -> Result<(), EmitError> {
        for reference in self.abs_label_refs()? {
            self.patch_qword(reference.site, code_vaddr + reference.target_offset as u64);
        }
        for i in 0..self.data_relocs.len() {
            let reloc = self.data_relocs[i];
            let target = data_vaddr + reloc.data_offset as u64;
            match reloc.kind {
                DataRelocKind::Abs64 => self.patch_qword(reloc.site, target),
                DataRelocKind::Rel32 => {
                    let displacement = target as i64 - (code_vaddr + reloc.site as u64 + 4) as i64;
                    self.patch_dword(reloc.site, displacement as i32 as u32);
                }
            }
        }
        debug!(
            "applied relocations at code 0x{code_vaddr:x}, data 0x{data_vaddr:x}"
        );
        Ok(())
    }

    fn patch_dword(&mut self, site: usize, value: u32) {
        self.code[site..site + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn patch_qword(&mut self, site: usize, value: u64) {
        self.code[site..site + 8].copy_from_slice(&value.to_le_bytes());
    }
}
