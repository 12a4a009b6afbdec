/// x86-64 instruction encoder.
///
/// Every method appends the exact byte sequence for one instruction: REX
/// prefix (W=1 for 64-bit operands, R/B for extended registers), opcode,
/// ModR/M, SIB where required, and little-endian displacement/immediate
/// fields. The encoder holds no state of its own; it writes through the
/// emission layer. Compile modules call these wrappers and never append
/// opcode bytes themselves.
use crate::emit::{Assembler, DataRelocKind, FixupKind, Label};

/// General-purpose registers the backend uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    Rax,
    Rcx,
    Rdx,
    Rbx,
    Rsp,
    Rbp,
    Rsi,
    Rdi,
    R8,
    R9,
    R10,
    R11,
}

impl Reg {
    /// Low three bits of the register number (ModR/M field value).
    fn code(self) -> u8 {
        match self {
            Reg::Rax | Reg::R8 => 0,
            Reg::Rcx | Reg::R9 => 1,
            Reg::Rdx | Reg::R10 => 2,
            Reg::Rbx | Reg::R11 => 3,
            Reg::Rsp => 4,
            Reg::Rbp => 5,
            Reg::Rsi => 6,
            Reg::Rdi => 7,
        }
    }

    /// Whether the register needs the REX extension bit.
    fn extended(self) -> bool {
        matches!(self, Reg::R8 | Reg::R9 | Reg::R10 | Reg::R11)
    }
}

/// Condition codes for `jcc` and `setcc`. The discriminant is the low
/// nibble of the opcode (`0F 8x` / `0F 9x`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    B = 0x2,
    Ae = 0x3,
    E = 0x4,
    Ne = 0x5,
    Be = 0x6,
    A = 0x7,
    S = 0x8,
    Ns = 0x9,
    L = 0xc,
    Ge = 0xd,
    Le = 0xe,
    G = 0xf,
}

/// Operand width for sized memory loads and stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandSize {
    Byte,
    Word,
    Dword,
    Qword,
}

/// REX prefix with W set; `r` extends the ModR/M reg field, `b` the r/m
/// field.
fn rex_w(r: bool, b: bool) -> u8 {
    0x48 | ((r as u8) << 2) | (b as u8)
}

fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
    (mode << 6) | (reg << 3) | rm
}

impl Assembler {
    // ===== Register moves =====

    /// `mov reg, imm` — 32-bit sign-extended form when the value fits,
    /// `movabs` otherwise.
    pub fn emit_mov_reg_imm(&mut self, reg: Reg, value: i64) {
        if i32::try_from(value).is_ok() {
            self.emit_byte(rex_w(false, reg.extended()));
            self.emit_byte(0xc7);
            self.emit_byte(modrm(0b11, 0, reg.code()));
            self.emit_dword(value as i32 as u32);
        } else {
            self.emit_byte(rex_w(false, reg.extended()));
            self.emit_byte(0xb8 + reg.code());
            self.emit_qword(value as u64);
        }
    }

    /// `mov dst, src` (64-bit).
    pub fn emit_mov_reg_reg(&mut self, dst: Reg, src: Reg) {
        self.emit_byte(rex_w(src.extended(), dst.extended()));
        self.emit_byte(0x89);
        self.emit_byte(modrm(0b11, src.code(), dst.code()));
    }

    // ===== Stack =====

    pub fn emit_push_reg(&mut self, reg: Reg) {
        if reg.extended() {
            self.emit_byte(0x41);
        }
        self.emit_byte(0x50 + reg.code());
    }

    pub fn emit_pop_reg(&mut self, reg: Reg) {
        if reg.extended() {
            self.emit_byte(0x41);
        }
        self.emit_byte(0x58 + reg.code());
    }

    /// `sub rsp, imm`.
    pub fn emit_sub_rsp_imm(&mut self, bytes: i32) {
        if (0..=127).contains(&bytes) {
            self.emit_bytes(&[0x48, 0x83, 0xec, bytes as u8]);
        } else {
            self.emit_bytes(&[0x48, 0x81, 0xec]);
            self.emit_dword(bytes as u32);
        }
    }

    /// `add rsp, imm`.
    pub fn emit_add_rsp_imm(&mut self, bytes: i32) {
        if (0..=127).contains(&bytes) {
            self.emit_bytes(&[0x48, 0x83, 0xc4, bytes as u8]);
        } else {
            self.emit_bytes(&[0x48, 0x81, 0xc4]);
            self.emit_dword(bytes as u32);
        }
    }

    // ===== Frame and memory access =====

    /// `mov [rbp+disp], src`.
    pub fn emit_store_frame(&mut self, disp: i32, src: Reg) {
        self.emit_byte(rex_w(src.extended(), false));
        self.emit_byte(0x89);
        self.emit_frame_modrm_disp(src.code(), disp);
    }

    /// `mov dst, [rbp+disp]`.
    pub fn emit_load_frame(&mut self, dst: Reg, disp: i32) {
        self.emit_byte(rex_w(dst.extended(), false));
        self.emit_byte(0x8b);
        self.emit_frame_modrm_disp(dst.code(), disp);
    }

    /// `lea dst, [rbp+disp]`.
    pub fn emit_lea_frame(&mut self, dst: Reg, disp: i32) {
        self.emit_byte(rex_w(dst.extended(), false));
        self.emit_byte(0x8d);
        self.emit_frame_modrm_disp(dst.code(), disp);
    }

    fn emit_frame_modrm_disp(&mut self, reg: u8, disp: i32) {
        if i8::try_from(disp).is_ok() {
            self.emit_byte(modrm(0b01, reg, Reg::Rbp.code()));
            self.emit_byte(disp as i8 as u8);
        } else {
            self.emit_byte(modrm(0b10, reg, Reg::Rbp.code()));
            self.emit_dword(disp as u32);
        }
    }

    /// `lea dst, [rsp+disp8]` (SIB form).
    pub fn emit_lea_rsp(&mut self, dst: Reg, disp: i8) {
        self.emit_byte(rex_w(dst.extended(), false));
        self.emit_byte(0x8d);
        self.emit_byte(modrm(0b01, dst.code(), 0b100));
        self.emit_byte(0x24); // SIB: no index, base rsp
        self.emit_byte(disp as u8);
    }

    /// `mov dst, [base+disp]` (64-bit). `base` must not be rsp.
    pub fn emit_load_mem(&mut self, dst: Reg, base: Reg, disp: i32) {
        self.emit_byte(rex_w(dst.extended(), base.extended()));
        self.emit_byte(0x8b);
        self.emit_mem_modrm_disp(dst.code(), base, disp);
    }

    /// `mov [base+disp], src` (64-bit). `base` must not be rsp.
    pub fn emit_store_mem(&mut self, base: Reg, disp: i32, src: Reg) {
        self.emit_byte(rex_w(src.extended(), base.extended()));
        self.emit_byte(0x89);
        self.emit_mem_modrm_disp(src.code(), base, disp);
    }

    fn emit_mem_modrm_disp(&mut self, reg: u8, base: Reg, disp: i32) {
        debug_assert!(base != Reg::Rsp, "rsp-based addressing needs a SIB byte");
        if disp == 0 && base.code() != Reg::Rbp.code() {
            self.emit_byte(modrm(0b00, reg, base.code()));
        } else if i8::try_from(disp).is_ok() {
            self.emit_byte(modrm(0b01, reg, base.code()));
            self.emit_byte(disp as i8 as u8);
        } else {
            self.emit_byte(modrm(0b10, reg, base.code()));
            self.emit_dword(disp as u32);
        }
    }

    /// Sized load `[rax] -> rax`, zero-extending below qword.
    pub fn emit_load_sized(&mut self, size: OperandSize) {
        match size {
            OperandSize::Byte => self.emit_bytes(&[0x48, 0x0f, 0xb6, 0x00]), // movzx rax, byte [rax]
            OperandSize::Word => self.emit_bytes(&[0x48, 0x0f, 0xb7, 0x00]), // movzx rax, word [rax]
            OperandSize::Dword => self.emit_bytes(&[0x8b, 0x00]),            // mov eax, [rax]
            OperandSize::Qword => self.emit_bytes(&[0x48, 0x8b, 0x00]),      // mov rax, [rax]
        }
    }

    /// Sized store `rbx -> [rax]`.
    pub fn emit_store_sized(&mut self, size: OperandSize) {
        match size {
            OperandSize::Byte => self.emit_bytes(&[0x88, 0x18]),        // mov [rax], bl
            OperandSize::Word => self.emit_bytes(&[0x66, 0x89, 0x18]),  // mov [rax], bx
            OperandSize::Dword => self.emit_bytes(&[0x89, 0x18]),       // mov [rax], ebx
            OperandSize::Qword => self.emit_bytes(&[0x48, 0x89, 0x18]), // mov [rax], rbx
        }
    }

    /// `cmp byte [base], 0`.
    pub fn emit_cmp_byte_mem_zero(&mut self, base: Reg) {
        debug_assert!(!base.extended() && base != Reg::Rsp && base != Reg::Rbp);
        self.emit_bytes(&[0x80, modrm(0b00, 7, base.code()), 0x00]);
    }

    /// `mov byte [base], imm8`.
    pub fn emit_store_byte_imm(&mut self, base: Reg, value: u8) {
        debug_assert!(!base.extended() && base != Reg::Rsp && base != Reg::Rbp);
        self.emit_bytes(&[0xc6, modrm(0b00, 0, base.code()), value]);
    }

    /// `mov [base], dl`.
    pub fn emit_store_byte_dl(&mut self, base: Reg) {
        debug_assert!(!base.extended() && base != Reg::Rsp && base != Reg::Rbp);
        self.emit_bytes(&[0x88, modrm(0b00, Reg::Rdx.code(), base.code())]);
    }

    /// `mov al, [base]`.
    pub fn emit_load_byte_al(&mut self, base: Reg) {
        debug_assert!(!base.extended() && base != Reg::Rsp && base != Reg::Rbp);
        self.emit_bytes(&[0x8a, modrm(0b00, Reg::Rax.code(), base.code())]);
    }

    /// `mov bl, [base]`.
    pub fn emit_load_byte_bl(&mut self, base: Reg) {
        debug_assert!(!base.extended() && base != Reg::Rsp && base != Reg::Rbp);
        self.emit_bytes(&[0x8a, modrm(0b00, Reg::Rbx.code(), base.code())]);
    }

    /// `cmp al, bl`.
    pub fn emit_cmp_al_bl(&mut self) {
        self.emit_bytes(&[0x38, 0xd8]);
    }

    /// `test al, al`.
    pub fn emit_test_al_al(&mut self) {
        self.emit_bytes(&[0x84, 0xc0]);
    }

    // ===== String instructions =====

    /// `cld` — forward direction for the rep family.
    pub fn emit_cld(&mut self) {
        self.emit_byte(0xfc);
    }

    /// `rep movsb` — copy rcx bytes from [rsi] to [rdi].
    pub fn emit_rep_movsb(&mut self) {
        self.emit_bytes(&[0xf3, 0xa4]);
    }

    /// `repe cmpsb` — compare [rsi] with [rdi] while equal, at most rcx
    /// bytes.
    pub fn emit_repe_cmpsb(&mut self) {
        self.emit_bytes(&[0xf3, 0xa6]);
    }

    /// `repne scasb` — scan [rdi] for the byte in al, at most rcx bytes.
    pub fn emit_repne_scasb(&mut self) {
        self.emit_bytes(&[0xf2, 0xae]);
    }

    // ===== Data-section references =====

    /// `movabs reg, <data address>` with an 8-byte relocation patched at
    /// final layout.
    pub fn emit_load_data_address(&mut self, reg: Reg, data_offset: usize) {
        self.emit_byte(rex_w(false, reg.extended()));
        self.emit_byte(0xb8 + reg.code());
        self.add_data_reloc(DataRelocKind::Abs64, data_offset);
    }

    /// `mov reg, [rip+disp32]` load from a data slot.
    pub fn emit_load_data(&mut self, reg: Reg, data_offset: usize) {
        self.emit_byte(rex_w(reg.extended(), false));
        self.emit_byte(0x8b);
        self.emit_byte(modrm(0b00, reg.code(), 0b101));
        self.add_data_reloc(DataRelocKind::Rel32, data_offset);
    }

    /// `mov [rip+disp32], reg` store to a data slot.
    pub fn emit_store_data(&mut self, data_offset: usize, reg: Reg) {
        self.emit_byte(rex_w(reg.extended(), false));
        self.emit_byte(0x89);
        self.emit_byte(modrm(0b00, reg.code(), 0b101));
        self.add_data_reloc(DataRelocKind::Rel32, data_offset);
    }

    /// `movabs reg, <code address of label>`; patched with the absolute
    /// virtual address of the label at final layout.
    pub fn emit_load_label_address(&mut self, reg: Reg, label: Label) {
        self.emit_byte(rex_w(false, reg.extended()));
        self.emit_byte(0xb8 + reg.code());
        self.add_fixup(label, FixupKind::Abs64);
    }

    // ===== Arithmetic =====

    pub fn emit_add_reg_reg(&mut self, dst: Reg, src: Reg) {
        self.emit_byte(rex_w(src.extended(), dst.extended()));
        self.emit_byte(0x01);
        self.emit_byte(modrm(0b11, src.code(), dst.code()));
    }

    pub fn emit_sub_reg_reg(&mut self, dst: Reg, src: Reg) {
        self.emit_byte(rex_w(src.extended(), dst.extended()));
        self.emit_byte(0x29);
        self.emit_byte(modrm(0b11, src.code(), dst.code()));
    }

    pub fn emit_imul_reg_reg(&mut self, dst: Reg, src: Reg) {
        self.emit_byte(rex_w(dst.extended(), src.extended()));
        self.emit_bytes(&[0x0f, 0xaf]);
        self.emit_byte(modrm(0b11, dst.code(), src.code()));
    }

    pub fn emit_add_reg_imm(&mut self, reg: Reg, value: i32) {
        self.emit_byte(rex_w(false, reg.extended()));
        if i8::try_from(value).is_ok() {
            self.emit_bytes(&[0x83, modrm(0b11, 0, reg.code()), value as i8 as u8]);
        } else {
            self.emit_byte(0x81);
            self.emit_byte(modrm(0b11, 0, reg.code()));
            self.emit_dword(value as u32);
        }
    }

    /// `cqo` — sign-extend rax into rdx:rax before signed division.
    pub fn emit_cqo(&mut self) {
        self.emit_bytes(&[0x48, 0x99]);
    }

    /// `idiv reg` — signed divide of rdx:rax.
    pub fn emit_idiv_reg(&mut self, reg: Reg) {
        self.emit_byte(rex_w(false, reg.extended()));
        self.emit_byte(0xf7);
        self.emit_byte(modrm(0b11, 7, reg.code()));
    }

    /// `div reg` — unsigned divide of rdx:rax.
    pub fn emit_div_reg(&mut self, reg: Reg) {
        self.emit_byte(rex_w(false, reg.extended()));
        self.emit_byte(0xf7);
        self.emit_byte(modrm(0b11, 6, reg.code()));
    }

    pub fn emit_neg_reg(&mut self, reg: Reg) {
        self.emit_byte(rex_w(false, reg.extended()));
        self.emit_byte(0xf7);
        self.emit_byte(modrm(0b11, 3, reg.code()));
    }

    pub fn emit_inc_reg(&mut self, reg: Reg) {
        self.emit_byte(rex_w(false, reg.extended()));
        self.emit_byte(0xff);
        self.emit_byte(modrm(0b11, 0, reg.code()));
    }

    pub fn emit_dec_reg(&mut self, reg: Reg) {
        self.emit_byte(rex_w(false, reg.extended()));
        self.emit_byte(0xff);
        self.emit_byte(modrm(0b11, 1, reg.code()));
    }

    // ===== Logical and bitwise =====

    pub fn emit_and_reg_reg(&mut self, dst: Reg, src: Reg) {
        self.emit_byte(rex_w(src.extended(), dst.extended()));
        self.emit_byte(0x21);
        self.emit_byte(modrm(0b11, src.code(), dst.code()));
    }

    pub fn emit_or_reg_reg(&mut self, dst: Reg, src: Reg) {
        self.emit_byte(rex_w(src.extended(), dst.extended()));
        self.emit_byte(0x09);
        self.emit_byte(modrm(0b11, src.code(), dst.code()));
    }

    pub fn emit_xor_reg_reg(&mut self, dst: Reg, src: Reg) {
        self.emit_byte(rex_w(src.extended(), dst.extended()));
        self.emit_byte(0x31);
        self.emit_byte(modrm(0b11, src.code(), dst.code()));
    }

    pub fn emit_not_reg(&mut self, reg: Reg) {
        self.emit_byte(rex_w(false, reg.extended()));
        self.emit_byte(0xf7);
        self.emit_byte(modrm(0b11, 2, reg.code()));
    }

    /// `shl reg, cl`.
    pub fn emit_shl_reg_cl(&mut self, reg: Reg) {
        self.emit_byte(rex_w(false, reg.extended()));
        self.emit_byte(0xd3);
        self.emit_byte(modrm(0b11, 4, reg.code()));
    }

    /// `shr reg, cl` — logical right shift.
    pub fn emit_shr_reg_cl(&mut self, reg: Reg) {
        self.emit_byte(rex_w(false, reg.extended()));
        self.emit_byte(0xd3);
        self.emit_byte(modrm(0b11, 5, reg.code()));
    }

    /// `sar reg, cl` — arithmetic right shift.
    pub fn emit_sar_reg_cl(&mut self, reg: Reg) {
        self.emit_byte(rex_w(false, reg.extended()));
        self.emit_byte(0xd3);
        self.emit_byte(modrm(0b11, 7, reg.code()));
    }

    /// `shl reg, imm8`.
    pub fn emit_shl_reg_imm(&mut self, reg: Reg, count: u8) {
        self.emit_byte(rex_w(false, reg.extended()));
        self.emit_byte(0xc1);
        self.emit_byte(modrm(0b11, 4, reg.code()));
        self.emit_byte(count);
    }

    // ===== Compare, test, setcc =====

    /// `cmp lhs, rhs` — flags reflect `lhs - rhs`.
    pub fn emit_cmp_reg_reg(&mut self, lhs: Reg, rhs: Reg) {
        self.emit_byte(rex_w(rhs.extended(), lhs.extended()));
        self.emit_byte(0x39);
        self.emit_byte(modrm(0b11, rhs.code(), lhs.code()));
    }

    pub fn emit_cmp_reg_imm(&mut self, reg: Reg, value: i32) {
        self.emit_byte(rex_w(false, reg.extended()));
        if i8::try_from(value).is_ok() {
            self.emit_bytes(&[0x83, modrm(0b11, 7, reg.code()), value as i8 as u8]);
        } else {
            self.emit_byte(0x81);
            self.emit_byte(modrm(0b11, 7, reg.code()));
            self.emit_dword(value as u32);
        }
    }

    pub fn emit_test_reg_reg(&mut self, a: Reg, b: Reg) {
        self.emit_byte(rex_w(b.extended(), a.extended()));
        self.emit_byte(0x85);
        self.emit_byte(modrm(0b11, b.code(), a.code()));
    }

    /// `setcc al`.
    pub fn emit_setcc_al(&mut self, cond: Cond) {
        self.emit_bytes(&[0x0f, 0x90 + cond as u8, 0xc0]);
    }

    /// `movzx rax, al` — widen a setcc result to the full accumulator.
    pub fn emit_movzx_rax_al(&mut self) {
        self.emit_bytes(&[0x48, 0x0f, 0xb6, 0xc0]);
    }

    // ===== Control flow =====

    /// `jmp` to a label (rel32 fixup).
    pub fn emit_jmp_label(&mut self, target: Label) {
        self.emit_byte(0xe9);
        self.add_fixup(target, FixupKind::Rel32);
    }

    /// `jmp` short form (rel8 fixup); only valid when the target lands
    /// within a signed byte of the next instruction.
    pub fn emit_jmp_short(&mut self, target: Label) {
        self.emit_byte(0xeb);
        self.add_fixup(target, FixupKind::Rel8);
    }

    /// Conditional jump to a label (rel32 fixup).
    pub fn emit_jcc_label(&mut self, cond: Cond, target: Label) {
        self.emit_bytes(&[0x0f, 0x80 + cond as u8]);
        self.add_fixup(target, FixupKind::Rel32);
    }

    /// Conditional jump, short form (rel8 fixup); same range restriction
    /// as `emit_jmp_short`.
    pub fn emit_jcc_short(&mut self, cond: Cond, target: Label) {
        self.emit_byte(0x70 + cond as u8);
        self.add_fixup(target, FixupKind::Rel8);
    }

    /// Direct near call to a label (rel32 fixup).
    pub fn emit_call_label(&mut self, target: Label) {
        self.emit_byte(0xe8);
        self.add_fixup(target, FixupKind::Rel32);
    }

    /// Indirect call through a register.
    pub fn emit_call_reg(&mut self, reg: Reg) {
        if reg.extended() {
            self.emit_byte(0x41);
        }
        self.emit_byte(0xff);
        self.emit_byte(modrm(0b11, 2, reg.code()));
    }

    pub fn emit_ret(&mut self) {
        self.emit_byte(0xc3);
    }

    pub fn emit_syscall(&mut self) {
        self.emit_bytes(&[0x0f, 0x05]);
    }

    // ===== Composite sequences =====

    /// Convert the signed value in rax to decimal ASCII in a stack buffer
    /// and `write` it to stdout. Preserves every register it touches, so
    /// the printed value survives in rax. Negative values get a leading
    /// `-`; `i64::MIN` works because the negated value is divided unsigned.
    pub fn emit_print_number(&mut self) {
        let minus = self.add_string("-");

        self.emit_push_reg(Reg::Rax);
        self.emit_push_reg(Reg::Rbx);
        self.emit_push_reg(Reg::Rdx);
        self.emit_push_reg(Reg::Rsi);
        self.emit_push_reg(Reg::Rdi);

        let non_negative = self.create_label();
        self.emit_test_reg_reg(Reg::Rax, Reg::Rax);
        self.emit_jcc_label(Cond::Ns, non_negative);

        // Sign: write "-" first, then continue with the magnitude.
        self.emit_push_reg(Reg::Rax);
        self.emit_mov_reg_imm(Reg::Rax, 1);
        self.emit_mov_reg_imm(Reg::Rdi, 1);
        self.emit_load_data_address(Reg::Rsi, minus);
        self.emit_mov_reg_imm(Reg::Rdx, 1);
        self.emit_syscall();
        self.emit_pop_reg(Reg::Rax);
        self.emit_neg_reg(Reg::Rax);
        self.mark_label(non_negative).expect("fresh label");

        // Digits are produced least-significant first into the top of a
        // 32-byte scratch buffer.
        self.emit_sub_rsp_imm(32);
        self.emit_lea_rsp(Reg::Rsi, 31);
        self.emit_mov_reg_imm(Reg::Rbx, 10);

        let digit_loop = self.create_label();
        let write = self.create_label();
        let nonzero = self.create_label();
        self.emit_test_reg_reg(Reg::Rax, Reg::Rax);
        self.emit_jcc_label(Cond::Ne, nonzero);
        self.emit_dec_reg(Reg::Rsi);
        self.emit_store_byte_imm(Reg::Rsi, b'0');
        self.emit_jmp_label(write);

        self.mark_label(nonzero).expect("fresh label");
        self.mark_label(digit_loop).expect("fresh label");
        self.emit_xor_reg_reg(Reg::Rdx, Reg::Rdx);
        self.emit_div_reg(Reg::Rbx);
        self.emit_add_reg_imm(Reg::Rdx, b'0' as i32);
        self.emit_dec_reg(Reg::Rsi);
        self.emit_store_byte_dl(Reg::Rsi);
        self.emit_test_reg_reg(Reg::Rax, Reg::Rax);
        self.emit_jcc_label(Cond::Ne, digit_loop);

        self.mark_label(write).expect("fresh label");
        self.emit_lea_rsp(Reg::Rdx, 31);
        self.emit_sub_reg_reg(Reg::Rdx, Reg::Rsi);
        self.emit_mov_reg_imm(Reg::Rax, 1);
        self.emit_mov_reg_imm(Reg::Rdi, 1);
        self.emit_syscall();
        self.emit_add_rsp_imm(32);

        self.emit_pop_reg(Reg::Rdi);
        self.emit_pop_reg(Reg::Rsi);
        self.emit_pop_reg(Reg::Rdx);
        self.emit_pop_reg(Reg::Rbx);
        self.emit_pop_reg(Reg::Rax);
    }
}
