/// Compilation context threaded through every compile routine.
///
/// Owns the assembler plus all symbol state: the function table populated
/// by the pre-pass, the pool field table, the frame of the function
/// currently being compiled, and the loop label stack that `Break` and
/// `Continue` jump through. One context lives exactly as long as one
/// `compile_program` call.
use std::collections::HashMap;

use crate::ast::TypeTag;
use crate::emit::{Assembler, Label};

use super::CompileError;

/// A user function or subroutine registered during the pre-pass.
#[derive(Debug, Clone)]
pub struct FunctionSymbol {
    pub name: String,
    pub params: Vec<(String, TypeTag)>,
    pub return_type: TypeTag,
    pub entry: Label,
}

/// A named slot in a `FixedPool`, stored in the data section.
#[derive(Debug, Clone, Copy)]
pub struct PoolField {
    pub data_offset: usize,
    pub mutable: bool,
}

/// Jump targets for the innermost enclosing loop.
#[derive(Debug, Clone, Copy)]
pub struct LoopLabels {
    pub break_label: Label,
    pub continue_label: Label,
}

/// Stack frame of the function (or entry sequence) being compiled.
/// Offsets are positive distances below rbp.
#[derive(Debug, Default)]
struct Frame {
    variables: HashMap<String, i32>,
    param_count: usize,
    next_slot: usize,
    slot_budget: usize,
}

#[derive(Debug, Default)]
pub struct CompileContext {
    pub asm: Assembler,
    functions: HashMap<String, FunctionSymbol>,
    pools: HashMap<String, PoolField>,
    frame: Frame,
    loop_stack: Vec<LoopLabels>,
    exit_label: Option<Label>,
}

impl CompileContext {
    pub fn new() -> CompileContext {
        CompileContext {
            asm: Assembler::new(),
            ..CompileContext::default()
        }
    }

    // ===== Function table =====

    pub fn add_function(&mut self, symbol: FunctionSymbol) -> Result<(), CompileError> {
        if self.functions.contains_key(&symbol.name) {
            return Err(CompileError::DuplicateFunction(symbol.name));
        }
        self.functions.insert(symbol.name.clone(), symbol);
        Ok(())
    }

    pub fn get_function(&self, name: &str) -> Option<&FunctionSymbol> {
        self.functions.get(name)
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Resolved code offsets of every registered function, sorted by
    /// offset. Valid once bodies are compiled and labels bound.
    pub fn function_offsets(&self) -> Vec<(String, usize)> {
        let mut offsets: Vec<(String, usize)> = self
            .functions
            .values()
            .filter_map(|f| self.asm.label_offset(f.entry).map(|o| (f.name.clone(), o)))
            .collect();
        offsets.sort_by_key(|(_, offset)| *offset);
        offsets
    }

    // ===== Pool table =====

    pub fn add_pool_field(&mut self, qualified: String, field: PoolField) -> Result<(), CompileError> {
        if self.pools.contains_key(&qualified) {
            return Err(CompileError::DuplicatePoolField(qualified));
        }
        self.pools.insert(qualified, field);
        Ok(())
    }

    pub fn pool_field(&self, qualified: &str) -> Option<PoolField> {
        self.pools.get(qualified).copied()
    }

    pub fn pool_field_count(&self) -> usize {
        self.pools.len()
    }

    // ===== Frame state =====

    /// Reset the frame for a new function (or the entry sequence).
    /// Parameters occupy the first slots; `local_slots` is the pre-scanned
    /// budget for named locals and loop temporaries.
    pub fn begin_frame(&mut self, params: &[(String, TypeTag)], local_slots: usize) {
        let mut variables = HashMap::new();
        for (i, (name, _)) in params.iter().enumerate() {
            variables.insert(name.clone(), 8 * (i as i32 + 1));
        }
        self.frame = Frame {
            variables,
            param_count: params.len(),
            next_slot: 0,
            slot_budget: local_slots,
        };
    }

    pub fn frame_slot_budget(&self) -> usize {
        self.frame.slot_budget
    }

    /// Frame offset of a parameter or local, if bound.
    pub fn lookup_variable(&self, name: &str) -> Option<i32> {
        self.frame.variables.get(name).copied()
    }

    /// Bind a new local on first assignment and return its frame offset.
    fn alloc_slot(&mut self) -> i32 {
        debug_assert!(
            self.frame.next_slot < self.frame.slot_budget,
            "local slot allocation exceeded the pre-scanned frame budget"
        );
        let offset = 8 * (self.frame.param_count + self.frame.next_slot + 1) as i32;
        self.frame.next_slot += 1;
        offset
    }

    pub fn define_local(&mut self, name: &str) -> i32 {
        let offset = self.alloc_slot();
        self.frame.variables.insert(name.to_string(), offset);
        offset
    }

    /// Anonymous slot for lowered constructs (loop collection/index).
    pub fn alloc_hidden_slot(&mut self) -> i32 {
        self.alloc_slot()
    }

    // ===== Loop context stack =====

    pub fn push_loop(&mut self, labels: LoopLabels) {
        self.loop_stack.push(labels);
    }

    pub fn pop_loop(&mut self) {
        self.loop_stack.pop();
    }

    pub fn current_loop(&self) -> Option<LoopLabels> {
        self.loop_stack.last().copied()
    }

    // ===== Function exit label =====

    pub fn set_exit_label(&mut self, label: Option<Label>) {
        self.exit_label = label;
    }

    pub fn exit_label(&self) -> Option<Label> {
        self.exit_label
    }
}
