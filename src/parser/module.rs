//! The immutable decoded form of a WebAssembly binary.
//!
//! A [`Module`] is pure data: every index it contains has been checked by
//! the decoder, and every function body has been validated and rewritten
//! into the flat form described in [`crate::parser::instruction`]. Nothing
//! here is mutated after parsing; instantiation borrows or consumes the
//! module but never changes it.

use std::fmt;

use super::instruction::{BranchTarget, Instr};
use super::ParseError;

/// The four scalar value types of WebAssembly 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
}

impl ValueType {
    pub(crate) fn decode(byte: u8) -> Result<ValueType, ParseError> {
        match byte {
            0x7f => Ok(ValueType::I32),
            0x7e => Ok(ValueType::I64),
            0x7d => Ok(ValueType::F32),
            0x7c => Ok(ValueType::F64),
            b => Err(ParseError::InvalidValueType(b)),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
        };
        write!(f, "{name}")
    }
}

/// A function signature. Equality is structural.
///
/// The result list holds at most one type; multi-value results are not
/// part of WebAssembly 1.0 and are rejected by the decoder.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionType {
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,
}

impl FunctionType {
    /// The single result type, if the function has one.
    pub fn result(&self) -> Option<ValueType> {
        self.results.first().copied()
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ") -> ")?;
        match self.result() {
            Some(r) => write!(f, "{r}"),
            None => write!(f, "()"),
        }
    }
}

/// Size limits for a table or memory, in elements or pages respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
}

impl Limits {
    /// Whether an entity with limits `provided` can satisfy an import
    /// declared with these limits: the provided minimum must reach the
    /// declared minimum, and the provided maximum must not exceed the
    /// declared one (when a declared maximum exists, the provided entity
    /// must be bounded too).
    pub fn admits(&self, provided: &Limits) -> bool {
        if provided.min < self.min {
            return false;
        }
        match self.max {
            None => true,
            Some(declared_max) => match provided.max {
                Some(provided_max) => provided_max <= declared_max,
                None => false,
            },
        }
    }
}

/// The type of a global: its value type plus mutability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub value_type: ValueType,
    pub mutable: bool,
}

/// What an import provides, with its type descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportKind {
    Function { type_idx: u32 },
    Table { limits: Limits },
    Memory { limits: Limits },
    Global { global_type: GlobalType },
}

/// A single import declaration.
#[derive(Debug, Clone)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub kind: ImportKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Function,
    Table,
    Memory,
    Global,
}

/// A single export: a name bound to an index in one of the index spaces.
#[derive(Debug, Clone)]
pub struct Export {
    pub name: String,
    pub kind: ExportKind,
    pub index: u32,
}

/// A constant initializer expression: a single literal, or a read of a
/// previously declared imported immutable global, terminated by `end`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstExpr {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    GlobalGet(u32),
}

/// A module-defined global with its initializer.
#[derive(Debug, Clone)]
pub struct Global {
    pub global_type: GlobalType,
    pub init: ConstExpr,
}

/// A table initializer: function indices written at a computed offset.
#[derive(Debug, Clone)]
pub struct ElementSegment {
    pub offset: ConstExpr,
    pub functions: Vec<u32>,
}

/// A memory initializer: raw bytes written at a computed offset.
#[derive(Debug, Clone)]
pub struct DataSegment {
    pub offset: ConstExpr,
    pub bytes: Vec<u8>,
}

/// A validated function body.
///
/// `locals` lists the declared (non-parameter) locals in order. `instrs`
/// is the flat instruction stream, and `labels` is the branch target table
/// computed during validation; see [`crate::parser::instruction`].
#[derive(Debug, Clone)]
pub struct Code {
    pub locals: Vec<ValueType>,
    pub instrs: Vec<Instr>,
    pub labels: Vec<BranchTarget>,
}

/// A parsed and validated module.
///
/// The function index space is imports first, then module-defined
/// functions; the same ordering applies to globals. Tables and memories
/// are limited to one each, either imported or defined.
#[derive(Debug, Default)]
pub struct Module {
    pub types: Vec<FunctionType>,
    pub imports: Vec<Import>,
    /// Type indices of module-defined functions, zipped with `code`.
    pub functions: Vec<u32>,
    pub table: Option<Limits>,
    pub memory: Option<Limits>,
    pub globals: Vec<Global>,
    pub exports: Vec<Export>,
    pub start: Option<u32>,
    pub elements: Vec<ElementSegment>,
    pub code: Vec<Code>,
    pub datas: Vec<DataSegment>,

    // Caches over `imports`, filled by the decoder as imports are read.
    pub(crate) imported_function_types: Vec<u32>,
    pub(crate) imported_globals: Vec<GlobalType>,
    pub(crate) imported_table: Option<Limits>,
    pub(crate) imported_memory: Option<Limits>,
}

impl Module {
    /// Number of imported functions (they occupy the front of the
    /// function index space).
    pub fn imported_function_count(&self) -> usize {
        self.imported_function_types.len()
    }

    /// Total number of functions in the index space, imports included.
    pub fn function_count(&self) -> usize {
        self.imported_function_types.len() + self.functions.len()
    }

    /// The signature of any function in the index space.
    ///
    /// # Panics
    ///
    /// Panics if `func_idx` is out of bounds; every index inside a parsed
    /// module has already been checked by the decoder.
    pub fn function_type(&self, func_idx: u32) -> &FunctionType {
        let idx = func_idx as usize;
        let type_idx = if idx < self.imported_function_types.len() {
            self.imported_function_types[idx]
        } else {
            self.functions[idx - self.imported_function_types.len()]
        };
        &self.types[type_idx as usize]
    }

    /// The validated body of a module-defined function.
    ///
    /// # Panics
    ///
    /// Panics if `func_idx` is out of bounds or refers to an imported
    /// function, which has no body here.
    pub fn function_code(&self, func_idx: u32) -> &Code {
        &self.code[func_idx as usize - self.imported_function_types.len()]
    }

    /// Look up an exported function index by name.
    pub fn find_exported_function(&self, name: &str) -> Option<u32> {
        self.exports
            .iter()
            .find(|e| e.kind == ExportKind::Function && e.name == name)
            .map(|e| e.index)
    }

    /// Limits of the module's table, declared or imported.
    pub fn table_limits(&self) -> Option<Limits> {
        self.table.or(self.imported_table)
    }

    /// Limits of the module's memory, declared or imported.
    pub fn memory_limits(&self) -> Option<Limits> {
        self.memory.or(self.imported_memory)
    }

    pub(crate) fn has_table(&self) -> bool {
        self.table_limits().is_some()
    }

    pub(crate) fn has_memory(&self) -> bool {
        self.memory_limits().is_some()
    }

    /// Number of imported globals (they occupy the front of the global
    /// index space).
    pub(crate) fn imported_global_count(&self) -> usize {
        self.imported_globals.len()
    }

    pub(crate) fn global_count(&self) -> usize {
        self.imported_globals.len() + self.globals.len()
    }

    /// The type of any global in the index space.
    pub(crate) fn global_type(&self, global_idx: u32) -> GlobalType {
        let idx = global_idx as usize;
        if idx < self.imported_globals.len() {
            self.imported_globals[idx]
        } else {
            self.globals[idx - self.imported_globals.len()].global_type
        }
    }
}
