//! Binary format decoder.
//!
//! [`parse`] reads a `.wasm` byte sequence into a [`module::Module`]. The
//! decoder is also the validator: section contents are checked as they are
//! read, function bodies go through the abstract interpreter in
//! [`validate`], and no partially decoded module is ever returned.

pub mod instruction;
pub mod limits;
pub mod module;
pub mod reader;
mod validate;

use std::collections::HashSet;

use log::trace;
use thiserror::Error;

use module::{
    DataSegment, ElementSegment, Export, ExportKind, FunctionType, Global, GlobalType, Import,
    ImportKind, Limits, Module, ValueType,
};
use reader::Reader;

/// Why a byte sequence was rejected.
///
/// Decoding and validation failures share this type; both happen in the
/// same pass and both mean no module is produced.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("malformed LEB128 encoding")]
    MalformedLeb128,
    #[error("invalid utf-8 in name")]
    InvalidUtf8,

    #[error("invalid magic number")]
    InvalidMagic,
    #[error("unsupported version {0}")]
    UnsupportedVersion(u32),
    #[error("unknown section id {0}")]
    UnknownSection(u8),
    #[error("section id {0} out of order")]
    SectionOutOfOrder(u8),
    #[error("section size mismatch: declared {declared}, consumed {consumed}")]
    SectionSizeMismatch { declared: u32, consumed: u32 },
    #[error("function body size mismatch: declared {declared}, consumed {consumed}")]
    BodySizeMismatch { declared: u32, consumed: u32 },

    #[error("invalid value type 0x{0:02x}")]
    InvalidValueType(u8),
    #[error("expected 0x60 to lead a function type, got 0x{0:02x}")]
    InvalidTypeForm(u8),
    #[error("function type declares {0} results, at most one is supported")]
    TooManyResults(u32),
    #[error("invalid import kind 0x{0:02x}")]
    InvalidImportKind(u8),
    #[error("invalid export kind 0x{0:02x}")]
    InvalidExportKind(u8),
    #[error("duplicate export name '{0}'")]
    DuplicateExportName(String),
    #[error("invalid global mutability 0x{0:02x}")]
    InvalidGlobalMutability(u8),
    #[error("invalid element type 0x{0:02x}")]
    InvalidElementType(u8),
    #[error("invalid limits flag 0x{0:02x}")]
    InvalidLimitsFlag(u8),
    #[error("limits minimum {min} exceeds maximum {max}")]
    InvalidLimits { min: u32, max: u32 },
    #[error("too many {kind} ({count})")]
    LimitExceeded { kind: &'static str, count: u64 },
    #[error("multiple tables declared")]
    MultipleTables,
    #[error("multiple memories declared")]
    MultipleMemories,
    #[error("function and code section lengths differ: {functions} vs {bodies}")]
    FunctionCodeCountMismatch { functions: u32, bodies: u32 },
    #[error("start function must have signature () -> ()")]
    InvalidStartFunctionType,

    #[error("unknown type index {0}")]
    UnknownType(u32),
    #[error("unknown function index {0}")]
    UnknownFunction(u32),
    #[error("unknown table index {0}")]
    UnknownTable(u32),
    #[error("unknown memory index {0}")]
    UnknownMemory(u32),
    #[error("unknown global index {0}")]
    UnknownGlobal(u32),
    #[error("unknown local index {0}")]
    UnknownLocal(u32),
    #[error("unknown label depth {0}")]
    UnknownLabel(u32),
    #[error("module has no table")]
    MissingTable,
    #[error("module has no memory")]
    MissingMemory,

    #[error("invalid constant expression")]
    InvalidConstantExpression,
    #[error("constant expression has type {actual}, expected {expected}")]
    ConstExprTypeMismatch {
        expected: ValueType,
        actual: ValueType,
    },
    #[error("constant expression may only read an imported immutable global (global {0})")]
    ConstExprInvalidGlobal(u32),

    #[error("invalid opcode 0x{0:02x}")]
    InvalidOpcode(u8),
    #[error("invalid prefixed opcode 0xfc {0}")]
    InvalidPrefixedOpcode(u32),
    #[error("invalid reserved byte 0x{0:02x}")]
    InvalidReservedByte(u8),
    #[error("invalid block type 0x{0:02x}")]
    InvalidBlockType(u8),
    #[error("alignment 2^{align} exceeds the natural alignment of the access")]
    InvalidAlignment { align: u32 },
    #[error("type mismatch: {0}")]
    TypeMismatch(&'static str),
    #[error("else without a matching if")]
    UnexpectedElse,
    #[error("global {0} is immutable")]
    GlobalIsImmutable(u32),
}

const MAGIC: u32 = 0x6d73_6100; // "\0asm"
const VERSION: u32 = 1;

/// Parse and validate a binary module.
///
/// On success the returned [`Module`] is fully validated: all indices are
/// in bounds, every function body type-checks, and branch metadata has
/// been computed. Any violation aborts with a [`ParseError`] and nothing
/// is returned.
pub fn parse(bytes: &[u8]) -> Result<Module, ParseError> {
    let mut reader = Reader::new(bytes);

    if reader.read_u32()? != MAGIC {
        return Err(ParseError::InvalidMagic);
    }
    let version = reader.read_u32()?;
    if version != VERSION {
        return Err(ParseError::UnsupportedVersion(version));
    }

    let mut module = Module::default();
    let mut last_section_id = 0u8;

    while !reader.is_at_end() {
        let id = reader.read_byte()?;
        let size = reader.read_var_u32()?;
        if size as usize > reader.remaining() {
            return Err(ParseError::UnexpectedEof);
        }
        let start = reader.pos();
        let end = start + size as usize;

        if id == 0 {
            // Custom sections may appear anywhere. Their name must still
            // be well-formed; the payload is opaque.
            let name = reader.read_name()?;
            if reader.pos() > end {
                return Err(ParseError::SectionSizeMismatch {
                    declared: size,
                    consumed: (reader.pos() - start) as u32,
                });
            }
            trace!("skipping custom section '{name}' ({size} bytes)");
            reader.skip_to(end)?;
            continue;
        }

        if id > 11 {
            return Err(ParseError::UnknownSection(id));
        }
        if id <= last_section_id {
            return Err(ParseError::SectionOutOfOrder(id));
        }
        last_section_id = id;
        trace!("section {id}, {size} bytes");

        match id {
            1 => read_type_section(&mut reader, &mut module)?,
            2 => read_import_section(&mut reader, &mut module)?,
            3 => read_function_section(&mut reader, &mut module)?,
            4 => read_table_section(&mut reader, &mut module)?,
            5 => read_memory_section(&mut reader, &mut module)?,
            6 => read_global_section(&mut reader, &mut module)?,
            7 => read_export_section(&mut reader, &mut module)?,
            8 => read_start_section(&mut reader, &mut module)?,
            9 => read_element_section(&mut reader, &mut module)?,
            10 => read_code_section(&mut reader, &mut module)?,
            11 => read_data_section(&mut reader, &mut module)?,
            _ => return Err(ParseError::UnknownSection(id)),
        }

        // Every section must consume exactly its declared length.
        if reader.pos() != end {
            return Err(ParseError::SectionSizeMismatch {
                declared: size,
                consumed: (reader.pos() - start) as u32,
            });
        }
    }

    if module.functions.len() != module.code.len() {
        return Err(ParseError::FunctionCodeCountMismatch {
            functions: module.functions.len() as u32,
            bodies: module.code.len() as u32,
        });
    }

    log::debug!(
        "parsed module: {} types, {} imports, {} functions, {} exports",
        module.types.len(),
        module.imports.len(),
        module.function_count(),
        module.exports.len()
    );
    Ok(module)
}

fn read_value_types(
    reader: &mut Reader<'_>,
    max: u32,
    kind: &'static str,
) -> Result<Vec<ValueType>, ParseError> {
    let count = reader.read_var_u32()?;
    if count > max {
        return Err(ParseError::LimitExceeded {
            kind,
            count: u64::from(count),
        });
    }
    let mut types = Vec::with_capacity(count as usize);
    for _ in 0..count {
        types.push(ValueType::decode(reader.read_byte()?)?);
    }
    Ok(types)
}

fn read_type_section(reader: &mut Reader<'_>, module: &mut Module) -> Result<(), ParseError> {
    let count = reader.read_var_u32()?;
    if count > limits::MAX_TYPES {
        return Err(ParseError::LimitExceeded {
            kind: "types",
            count: u64::from(count),
        });
    }
    for _ in 0..count {
        let form = reader.read_byte()?;
        if form != 0x60 {
            return Err(ParseError::InvalidTypeForm(form));
        }
        let params = read_value_types(reader, limits::MAX_FUNCTION_PARAMS, "parameters")?;
        let results = read_value_types(reader, limits::MAX_FUNCTION_PARAMS, "results")?;
        if results.len() > 1 {
            return Err(ParseError::TooManyResults(results.len() as u32));
        }
        module.types.push(FunctionType { params, results });
    }
    Ok(())
}

fn read_limits(reader: &mut Reader<'_>) -> Result<Limits, ParseError> {
    let flag = reader.read_byte()?;
    let limits = match flag {
        0x00 => Limits {
            min: reader.read_var_u32()?,
            max: None,
        },
        0x01 => {
            let min = reader.read_var_u32()?;
            let max = reader.read_var_u32()?;
            Limits {
                min,
                max: Some(max),
            }
        }
        b => return Err(ParseError::InvalidLimitsFlag(b)),
    };
    if let Some(max) = limits.max {
        if limits.min > max {
            return Err(ParseError::InvalidLimits {
                min: limits.min,
                max,
            });
        }
    }
    Ok(limits)
}

fn read_table_limits(reader: &mut Reader<'_>) -> Result<Limits, ParseError> {
    let elem_type = reader.read_byte()?;
    if elem_type != 0x70 {
        // funcref is the only element type in 1.0
        return Err(ParseError::InvalidElementType(elem_type));
    }
    let limits = read_limits(reader)?;
    if limits.min > limits::MAX_TABLE_SIZE {
        return Err(ParseError::LimitExceeded {
            kind: "table elements",
            count: u64::from(limits.min),
        });
    }
    Ok(limits)
}

fn read_memory_limits(reader: &mut Reader<'_>) -> Result<Limits, ParseError> {
    let limits = read_limits(reader)?;
    let bound = limits.max.unwrap_or(limits.min);
    if limits.min > limits::MAX_MEMORY_PAGES || bound > limits::MAX_MEMORY_PAGES {
        return Err(ParseError::LimitExceeded {
            kind: "memory pages",
            count: u64::from(bound.max(limits.min)),
        });
    }
    Ok(limits)
}

fn read_import_section(reader: &mut Reader<'_>, module: &mut Module) -> Result<(), ParseError> {
    let count = reader.read_var_u32()?;
    if count > limits::MAX_IMPORTS {
        return Err(ParseError::LimitExceeded {
            kind: "imports",
            count: u64::from(count),
        });
    }
    for _ in 0..count {
        let module_name = reader.read_name()?;
        let name = reader.read_name()?;
        let kind = match reader.read_byte()? {
            0x00 => {
                let type_idx = reader.read_var_u32()?;
                if type_idx as usize >= module.types.len() {
                    return Err(ParseError::UnknownType(type_idx));
                }
                module.imported_function_types.push(type_idx);
                ImportKind::Function { type_idx }
            }
            0x01 => {
                if module.imported_table.is_some() {
                    return Err(ParseError::MultipleTables);
                }
                let limits = read_table_limits(reader)?;
                module.imported_table = Some(limits);
                ImportKind::Table { limits }
            }
            0x02 => {
                if module.imported_memory.is_some() {
                    return Err(ParseError::MultipleMemories);
                }
                let limits = read_memory_limits(reader)?;
                module.imported_memory = Some(limits);
                ImportKind::Memory { limits }
            }
            0x03 => {
                let global_type = read_global_type(reader)?;
                module.imported_globals.push(global_type);
                ImportKind::Global { global_type }
            }
            b => return Err(ParseError::InvalidImportKind(b)),
        };
        module.imports.push(Import {
            module: module_name,
            name,
            kind,
        });
    }
    Ok(())
}

fn read_global_type(reader: &mut Reader<'_>) -> Result<GlobalType, ParseError> {
    let value_type = ValueType::decode(reader.read_byte()?)?;
    let mutable = match reader.read_byte()? {
        0x00 => false,
        0x01 => true,
        b => return Err(ParseError::InvalidGlobalMutability(b)),
    };
    Ok(GlobalType {
        value_type,
        mutable,
    })
}

fn read_function_section(reader: &mut Reader<'_>, module: &mut Module) -> Result<(), ParseError> {
    let count = reader.read_var_u32()?;
    if count > limits::MAX_FUNCTIONS {
        return Err(ParseError::LimitExceeded {
            kind: "functions",
            count: u64::from(count),
        });
    }
    for _ in 0..count {
        let type_idx = reader.read_var_u32()?;
        if type_idx as usize >= module.types.len() {
            return Err(ParseError::UnknownType(type_idx));
        }
        module.functions.push(type_idx);
    }
    Ok(())
}

fn read_table_section(reader: &mut Reader<'_>, module: &mut Module) -> Result<(), ParseError> {
    let count = reader.read_var_u32()?;
    if count > 1 || (count == 1 && module.imported_table.is_some()) {
        return Err(ParseError::MultipleTables);
    }
    if count == 1 {
        module.table = Some(read_table_limits(reader)?);
    }
    Ok(())
}

fn read_memory_section(reader: &mut Reader<'_>, module: &mut Module) -> Result<(), ParseError> {
    let count = reader.read_var_u32()?;
    if count > 1 || (count == 1 && module.imported_memory.is_some()) {
        return Err(ParseError::MultipleMemories);
    }
    if count == 1 {
        module.memory = Some(read_memory_limits(reader)?);
    }
    Ok(())
}

fn read_global_section(reader: &mut Reader<'_>, module: &mut Module) -> Result<(), ParseError> {
    let count = reader.read_var_u32()?;
    if count > limits::MAX_GLOBALS {
        return Err(ParseError::LimitExceeded {
            kind: "globals",
            count: u64::from(count),
        });
    }
    for _ in 0..count {
        let global_type = read_global_type(reader)?;
        let init = validate::decode_const_expr(reader, module, global_type.value_type)?;
        module.globals.push(Global { global_type, init });
    }
    Ok(())
}

fn read_export_section(reader: &mut Reader<'_>, module: &mut Module) -> Result<(), ParseError> {
    let count = reader.read_var_u32()?;
    if count > limits::MAX_EXPORTS {
        return Err(ParseError::LimitExceeded {
            kind: "exports",
            count: u64::from(count),
        });
    }
    let mut seen = HashSet::new();
    for _ in 0..count {
        let name = reader.read_name()?;
        if !seen.insert(name.clone()) {
            return Err(ParseError::DuplicateExportName(name));
        }
        let kind_byte = reader.read_byte()?;
        let index = reader.read_var_u32()?;
        let kind = match kind_byte {
            0x00 => {
                if index as usize >= module.function_count() {
                    return Err(ParseError::UnknownFunction(index));
                }
                ExportKind::Function
            }
            0x01 => {
                if index != 0 || !module.has_table() {
                    return Err(ParseError::UnknownTable(index));
                }
                ExportKind::Table
            }
            0x02 => {
                if index != 0 || !module.has_memory() {
                    return Err(ParseError::UnknownMemory(index));
                }
                ExportKind::Memory
            }
            0x03 => {
                if index as usize >= module.global_count() {
                    return Err(ParseError::UnknownGlobal(index));
                }
                ExportKind::Global
            }
            b => return Err(ParseError::InvalidExportKind(b)),
        };
        module.exports.push(Export { name, kind, index });
    }
    Ok(())
}

fn read_start_section(reader: &mut Reader<'_>, module: &mut Module) -> Result<(), ParseError> {
    let func_idx = reader.read_var_u32()?;
    if func_idx as usize >= module.function_count() {
        return Err(ParseError::UnknownFunction(func_idx));
    }
    let ty = module.function_type(func_idx);
    if !ty.params.is_empty() || !ty.results.is_empty() {
        return Err(ParseError::InvalidStartFunctionType);
    }
    module.start = Some(func_idx);
    Ok(())
}

fn read_element_section(reader: &mut Reader<'_>, module: &mut Module) -> Result<(), ParseError> {
    let count = reader.read_var_u32()?;
    if count > limits::MAX_ELEMENT_SEGMENTS {
        return Err(ParseError::LimitExceeded {
            kind: "element segments",
            count: u64::from(count),
        });
    }
    for _ in 0..count {
        let table_idx = reader.read_var_u32()?;
        if table_idx != 0 || !module.has_table() {
            return Err(ParseError::UnknownTable(table_idx));
        }
        let offset = validate::decode_const_expr(reader, module, ValueType::I32)?;
        let func_count = reader.read_var_u32()?;
        if func_count > limits::MAX_TABLE_SIZE {
            return Err(ParseError::LimitExceeded {
                kind: "element segment entries",
                count: u64::from(func_count),
            });
        }
        let mut functions = Vec::with_capacity(func_count as usize);
        for _ in 0..func_count {
            let func_idx = reader.read_var_u32()?;
            if func_idx as usize >= module.function_count() {
                return Err(ParseError::UnknownFunction(func_idx));
            }
            functions.push(func_idx);
        }
        module.elements.push(ElementSegment { offset, functions });
    }
    Ok(())
}

fn read_code_section(reader: &mut Reader<'_>, module: &mut Module) -> Result<(), ParseError> {
    let count = reader.read_var_u32()?;
    if count as usize != module.functions.len() {
        return Err(ParseError::FunctionCodeCountMismatch {
            functions: module.functions.len() as u32,
            bodies: count,
        });
    }
    for i in 0..count as usize {
        let body_size = reader.read_var_u32()?;
        if body_size as usize > reader.remaining() {
            return Err(ParseError::UnexpectedEof);
        }
        let body_start = reader.pos();
        let body_end = body_start + body_size as usize;

        let func_type = &module.types[module.functions[i] as usize];

        // Locals are declared as run-length (count, type) pairs; the total
        // including parameters is capped before anything is materialised.
        let decl_count = reader.read_var_u32()?;
        let mut declared = Vec::new();
        let mut total = func_type.params.len() as u64;
        for _ in 0..decl_count {
            let n = reader.read_var_u32()?;
            let t = ValueType::decode(reader.read_byte()?)?;
            total += u64::from(n);
            if total > u64::from(limits::MAX_FUNCTION_LOCALS) {
                return Err(ParseError::LimitExceeded {
                    kind: "locals",
                    count: total,
                });
            }
            declared.extend(std::iter::repeat(t).take(n as usize));
        }

        let code = validate::decode_function_body(reader, module, func_type, declared)?;
        module.code.push(code);

        if reader.pos() != body_end {
            return Err(ParseError::BodySizeMismatch {
                declared: body_size,
                consumed: (reader.pos() - body_start) as u32,
            });
        }
    }
    Ok(())
}

fn read_data_section(reader: &mut Reader<'_>, module: &mut Module) -> Result<(), ParseError> {
    let count = reader.read_var_u32()?;
    if count > limits::MAX_DATA_SEGMENTS {
        return Err(ParseError::LimitExceeded {
            kind: "data segments",
            count: u64::from(count),
        });
    }
    for _ in 0..count {
        let memory_idx = reader.read_var_u32()?;
        if memory_idx != 0 || !module.has_memory() {
            return Err(ParseError::UnknownMemory(memory_idx));
        }
        let offset = validate::decode_const_expr(reader, module, ValueType::I32)?;
        let len = reader.read_var_u32()?;
        let bytes = reader.read_bytes(len as usize)?.to_vec();
        module.datas.push(DataSegment { offset, bytes });
    }
    Ok(())
}
