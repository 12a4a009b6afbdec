/// System V AMD64 ABI helpers: calling convention, stack frames, and
/// argument marshalling.
///
/// Frames are laid out below rbp: parameter `i` is spilled to
/// `[rbp - 8*(i+1)]`, local slot `j` lives at `[rbp - 8*(params+j+1)]`.
/// Spilling the incoming registers lets the compile layer address every
/// binding uniformly as a frame slot.
use crate::emit::Assembler;

use super::instructions::Reg;

/// Integer argument registers, in order, for user function calls.
pub const ARG_REGS: [Reg; 6] = [Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];

/// Kernel syscall argument registers. The fourth argument goes in r10, not
/// rcx, because `syscall` destroys rcx.
pub const SYSCALL_ARG_REGS: [Reg; 6] = [Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::R10, Reg::R8, Reg::R9];

/// Frame bytes needed for `params + locals` eight-byte slots, rounded up to
/// keep rsp 16-aligned.
pub fn frame_size(param_count: usize, local_slots: usize) -> i32 {
    let bytes = (param_count + local_slots) * 8;
    ((bytes + 15) & !15) as i32
}

impl Assembler {
    /// Function prologue: establish the frame, reserve slot space, and
    /// spill the incoming register arguments so they can be addressed as
    /// ordinary frame slots.
    pub fn emit_prologue(&mut self, param_count: usize, local_slots: usize) {
        self.emit_push_reg(Reg::Rbp);
        self.emit_mov_reg_reg(Reg::Rbp, Reg::Rsp);

        let size = frame_size(param_count, local_slots);
        if size > 0 {
            self.emit_sub_rsp_imm(size);
        }

        for (i, reg) in ARG_REGS.iter().enumerate().take(param_count) {
            self.emit_store_frame(-(8 * (i as i32 + 1)), *reg);
        }
    }

    /// Function epilogue: tear down the frame and return.
    pub fn emit_epilogue(&mut self) {
        self.emit_mov_reg_reg(Reg::Rsp, Reg::Rbp);
        self.emit_pop_reg(Reg::Rbp);
        self.emit_ret();
    }

    /// Pop `arg_count` evaluated arguments off the machine stack into the
    /// argument registers. Arguments were pushed left to right, so popping
    /// in reverse register order lands argument 0 in rdi.
    pub fn emit_call_arguments(&mut self, arg_count: usize) {
        for i in (0..arg_count.min(6)).rev() {
            self.emit_pop_reg(ARG_REGS[i]);
        }
    }

    /// Same marshalling for syscall arguments (r10 in the fourth slot).
    pub fn emit_syscall_arguments(&mut self, arg_count: usize) {
        for i in (0..arg_count.min(6)).rev() {
            self.emit_pop_reg(SYSCALL_ARG_REGS[i]);
        }
    }
}
