use crate::core::value::{ArrayKey, Val};
use crate::runtime::context::ClassDef;
use crate::vm::opcode::Instruction;
use indexmap::IndexMap;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub struct UserFunc {
    pub name: Rc<str>,
    pub params: Vec<FuncParam>,
    pub chunk: Rc<CodeChunk>,
    /// Method bodies receive `$this` in slot 0 and parameters from slot 1
    pub is_method: bool,
    pub is_static: bool,
    pub is_generator: bool,
    pub returns_ref: bool,
}

impl UserFunc {
    pub fn new(name: impl Into<Rc<str>>, chunk: Rc<CodeChunk>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            chunk,
            is_method: false,
            is_static: false,
            is_generator: false,
            returns_ref: false,
        }
    }

    /// First variable slot that receives a positional parameter
    pub fn param_base(&self) -> u32 {
        if self.is_method { 1 } else { 0 }
    }

    pub fn required_params(&self) -> usize {
        self.params
            .iter()
            .filter(|p| p.default_value.is_none() && !p.is_variadic)
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct FuncParam {
    pub name: Rc<str>,
    pub by_ref: bool,
    pub is_variadic: bool,
    pub default_value: Option<Val>,
}

impl FuncParam {
    pub fn required(name: impl Into<Rc<str>>) -> Self {
        Self {
            name: name.into(),
            by_ref: false,
            is_variadic: false,
            default_value: None,
        }
    }

    pub fn optional(name: impl Into<Rc<str>>, default: Val) -> Self {
        Self {
            default_value: Some(default),
            ..Self::required(name)
        }
    }

    pub fn by_ref(name: impl Into<Rc<str>>) -> Self {
        Self {
            by_ref: true,
            ..Self::required(name)
        }
    }

    pub fn variadic(name: impl Into<Rc<str>>) -> Self {
        Self {
            is_variadic: true,
            ..Self::required(name)
        }
    }
}

/// One lexical try/catch/finally region. Offsets are absolute instruction
/// indices; `try_end` is exclusive.
#[derive(Debug, Clone)]
pub struct CatchEntry {
    pub try_start: u32,
    pub try_end: u32,
    pub catch_start: Option<u32>,
    pub finally_start: Option<u32>,
    /// Variable slot receiving the caught exception
    pub catch_var: Option<u32>,
    /// Accepted classes; empty catches everything
    pub catch_types: Vec<Rc<str>>,
}

/// Jump table for SWITCH_LONG / SWITCH_STRING / MATCH
#[derive(Debug, Clone, Default)]
pub struct JumpTable {
    pub cases: IndexMap<ArrayKey, u32>,
    pub default: Option<u32>,
}

#[derive(Debug, Default)]
pub struct CodeChunk {
    pub name: Rc<str>,             // File/Func name
    pub file_path: Option<String>, // Source file path
    pub code: Vec<Instruction>,    // Instructions
    pub constants: Vec<Val>,       // Literals (Ints, Strings)
    pub var_names: Vec<Rc<str>>,   // Compiled-variable names by slot, for diagnostics
    pub catch_table: Vec<CatchEntry>,
    pub jump_tables: Vec<JumpTable>,
}

impl CodeChunk {
    pub fn var_name(&self, slot: u32) -> Option<&str> {
        self.var_names.get(slot as usize).map(|n| n.as_ref())
    }
}

/// A compilation unit as handed over by the external compiler
#[derive(Debug, Default)]
pub struct Program {
    pub main: Rc<CodeChunk>,
    pub functions: Vec<Rc<UserFunc>>,
    pub classes: Vec<ClassDef>,
}
