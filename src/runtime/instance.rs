//! Instantiation: turning a validated module into live mutable state.
//!
//! The pipeline follows a fixed order: match imports, allocate memory,
//! allocate the table, evaluate global initializers, apply element
//! segments, apply data segments, and finally invoke the start function.
//! Any failure releases everything allocated by this call, and segment
//! ranges are checked in full before a single slot or byte is written, so
//! a failed instantiation leaves imported tables and memories untouched.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use log::debug;

use super::executor;
use super::host::{ExternalFunction, ExternalGlobal};
use super::memory::Memory;
use super::table::Table;
use super::{GlobalCell, InstantiateError, SharedMemory, SharedTable, Value};
use crate::parser::limits::DEFAULT_MEMORY_PAGES_LIMIT;
use crate::parser::module::{ConstExpr, ExportKind, ImportKind, Module};

/// Positional import vectors for [`instantiate`].
///
/// Functions and globals are consumed in the order the module declares
/// its imports of that kind; the single table or memory is matched by
/// presence.
pub struct Imports {
    pub functions: Vec<ExternalFunction>,
    pub table: Option<SharedTable>,
    pub memory: Option<SharedMemory>,
    pub globals: Vec<ExternalGlobal>,
    /// Hard ceiling for an instance-allocated memory, in pages.
    pub memory_pages_limit: u32,
}

impl Default for Imports {
    fn default() -> Imports {
        Imports {
            functions: Vec::new(),
            table: None,
            memory: None,
            globals: Vec::new(),
            memory_pages_limit: DEFAULT_MEMORY_PAGES_LIMIT,
        }
    }
}

/// The runtime incarnation of a module.
///
/// An instance owns its module exclusively for its lifetime. Memory and
/// table cells are either allocated here or clones of imported cells; in
/// the latter case the exporter keeps observing every write.
#[derive(Debug)]
pub struct Instance {
    module: Rc<Module>,
    memory: Option<SharedMemory>,
    table: Option<SharedTable>,
    /// Module-defined globals, in declaration order.
    globals: Vec<GlobalCell>,
    imported_globals: Vec<ExternalGlobal>,
    imported_functions: Vec<ExternalFunction>,
}

/// Instantiate a module, consuming it.
///
/// See the module docs for the pipeline; all-or-nothing failure is the
/// contract. A trap in the start function surfaces as
/// [`InstantiateError::StartFunctionTrapped`] and discards the instance.
pub fn instantiate(module: Module, imports: Imports) -> Result<Instance, InstantiateError> {
    match_imports(&module, &imports)?;

    let memory = match (&module.memory, imports.memory) {
        (Some(limits), None) => Some(Rc::new(RefCell::new(Memory::new(
            *limits,
            imports.memory_pages_limit,
        )?))),
        (None, provided) => provided,
        (Some(_), Some(_)) => {
            // Rejected by the parser: a module cannot both declare and
            // import a memory.
            return Err(InstantiateError::ImportCountMismatch {
                kind: "memory",
                declared: 0,
                provided: 1,
            });
        }
    };

    let table = match (&module.table, imports.table) {
        (Some(limits), None) => Some(Rc::new(RefCell::new(Table::new(*limits)))),
        (None, provided) => provided,
        (Some(_), Some(_)) => {
            return Err(InstantiateError::ImportCountMismatch {
                kind: "table",
                declared: 0,
                provided: 1,
            });
        }
    };

    // Globals evaluate in declaration order; initializers may only read
    // imported globals, which are all available by now.
    let globals: Vec<GlobalCell> = module
        .globals
        .iter()
        .map(|g| Rc::new(Cell::new(eval_const(&g.init, &imports.globals))))
        .collect();

    apply_element_segments(&module, &table, &imports.globals)?;
    apply_data_segments(&module, &memory, &imports.globals)?;

    let mut instance = Instance {
        module: Rc::new(module),
        memory,
        table,
        globals,
        imported_globals: imports.globals,
        imported_functions: imports.functions,
    };

    if let Some(start_idx) = instance.module.start {
        debug!("invoking start function {start_idx}");
        executor::invoke(&mut instance, start_idx, &[], 0)
            .map_err(InstantiateError::StartFunctionTrapped)?;
    }

    Ok(instance)
}

fn match_imports(module: &Module, imports: &Imports) -> Result<(), InstantiateError> {
    let declared_functions = module.imported_function_count();
    if imports.functions.len() != declared_functions {
        return Err(InstantiateError::ImportCountMismatch {
            kind: "function",
            declared: declared_functions,
            provided: imports.functions.len(),
        });
    }
    let declared_globals = module.imported_global_count();
    if imports.globals.len() != declared_globals {
        return Err(InstantiateError::ImportCountMismatch {
            kind: "global",
            declared: declared_globals,
            provided: imports.globals.len(),
        });
    }
    let table_mismatch = module.imported_table.is_some() != imports.table.is_some();
    if table_mismatch {
        return Err(InstantiateError::ImportCountMismatch {
            kind: "table",
            declared: usize::from(module.imported_table.is_some()),
            provided: usize::from(imports.table.is_some()),
        });
    }
    let memory_mismatch = module.imported_memory.is_some() != imports.memory.is_some();
    if memory_mismatch {
        return Err(InstantiateError::ImportCountMismatch {
            kind: "memory",
            declared: usize::from(module.imported_memory.is_some()),
            provided: usize::from(imports.memory.is_some()),
        });
    }

    let mismatch = |import: &crate::parser::module::Import| InstantiateError::ImportTypeMismatch {
        module: import.module.clone(),
        name: import.name.clone(),
    };

    let mut next_function = 0;
    let mut next_global = 0;
    for import in &module.imports {
        match &import.kind {
            ImportKind::Function { type_idx } => {
                let provided = &imports.functions[next_function];
                next_function += 1;
                if provided.func_type != module.types[*type_idx as usize] {
                    return Err(mismatch(import));
                }
            }
            ImportKind::Global { global_type } => {
                let provided = &imports.globals[next_global];
                next_global += 1;
                // Exact match, mutability included.
                if provided.global_type != *global_type {
                    return Err(mismatch(import));
                }
            }
            // Presence was established by the count checks above.
            ImportKind::Table { limits } => {
                if let Some(table) = &imports.table {
                    if !limits.admits(&table.borrow().limits()) {
                        return Err(mismatch(import));
                    }
                }
            }
            ImportKind::Memory { limits } => {
                if let Some(memory) = &imports.memory {
                    if !limits.admits(&memory.borrow().limits()) {
                        return Err(mismatch(import));
                    }
                }
            }
        }
    }
    Ok(())
}

fn eval_const(expr: &ConstExpr, imported_globals: &[ExternalGlobal]) -> Value {
    match expr {
        ConstExpr::I32(v) => Value::I32(*v),
        ConstExpr::I64(v) => Value::I64(*v),
        ConstExpr::F32(v) => Value::F32(*v),
        ConstExpr::F64(v) => Value::F64(*v),
        // Validation restricted the index to imported immutable globals.
        ConstExpr::GlobalGet(idx) => imported_globals[*idx as usize].value.get(),
    }
}

fn const_offset(expr: &ConstExpr, imported_globals: &[ExternalGlobal]) -> u32 {
    match eval_const(expr, imported_globals) {
        Value::I32(v) => v as u32,
        v => unreachable!("validated offset expression yielded {v}"),
    }
}

/// Write element segments into the table, checking every segment's range
/// before the first write.
fn apply_element_segments(
    module: &Module,
    table: &Option<SharedTable>,
    imported_globals: &[ExternalGlobal],
) -> Result<(), InstantiateError> {
    if module.elements.is_empty() {
        return Ok(());
    }
    let table = match table {
        Some(t) => t,
        // The parser rejects element segments without a table.
        None => return Err(InstantiateError::ElementSegmentOutOfBounds),
    };
    let size = u64::from(table.borrow().size());
    for segment in &module.elements {
        let offset = u64::from(const_offset(&segment.offset, imported_globals));
        if offset + segment.functions.len() as u64 > size {
            return Err(InstantiateError::ElementSegmentOutOfBounds);
        }
    }
    let mut table = table.borrow_mut();
    for segment in &module.elements {
        let offset = const_offset(&segment.offset, imported_globals);
        for (i, func_idx) in segment.functions.iter().enumerate() {
            // Ranges were checked above.
            let _ = table.set(offset + i as u32, Some(*func_idx));
        }
    }
    Ok(())
}

/// Write data segments into the memory, checking every segment's range
/// before the first write.
fn apply_data_segments(
    module: &Module,
    memory: &Option<SharedMemory>,
    imported_globals: &[ExternalGlobal],
) -> Result<(), InstantiateError> {
    if module.datas.is_empty() {
        return Ok(());
    }
    let memory = match memory {
        Some(m) => m,
        None => return Err(InstantiateError::DataSegmentOutOfBounds),
    };
    let size = memory.borrow().size_in_bytes() as u64;
    for segment in &module.datas {
        let offset = u64::from(const_offset(&segment.offset, imported_globals));
        if offset + segment.bytes.len() as u64 > size {
            return Err(InstantiateError::DataSegmentOutOfBounds);
        }
    }
    let mut memory = memory.borrow_mut();
    for segment in &module.datas {
        let offset = u64::from(const_offset(&segment.offset, imported_globals));
        let _ = memory.write_bytes(offset, &segment.bytes);
    }
    Ok(())
}

impl Instance {
    /// The module this instance was created from.
    pub fn module(&self) -> &Module {
        &self.module
    }

    pub(crate) fn module_handle(&self) -> Rc<Module> {
        Rc::clone(&self.module)
    }

    /// The instance's memory, if it has one.
    pub fn memory(&self) -> Option<&SharedMemory> {
        self.memory.as_ref()
    }

    /// Current memory size in bytes, zero when the module has none.
    pub fn memory_size(&self) -> usize {
        self.memory
            .as_ref()
            .map(|m| m.borrow().size_in_bytes())
            .unwrap_or(0)
    }

    pub(crate) fn table(&self) -> Option<&SharedTable> {
        self.table.as_ref()
    }

    pub(crate) fn imported_function_count(&self) -> usize {
        self.imported_functions.len()
    }

    pub(crate) fn imported_function(&self, func_idx: u32) -> ExternalFunction {
        self.imported_functions[func_idx as usize].clone()
    }

    /// Read a global by index (imports first, then module-defined).
    pub(crate) fn global_get(&self, idx: u32) -> Value {
        let idx = idx as usize;
        if idx < self.imported_globals.len() {
            self.imported_globals[idx].value.get()
        } else {
            self.globals[idx - self.imported_globals.len()].get()
        }
    }

    /// Write a global by index. Validation only emits writes to mutable
    /// globals.
    pub(crate) fn global_set(&self, idx: u32, value: Value) {
        let idx = idx as usize;
        if idx < self.imported_globals.len() {
            self.imported_globals[idx].value.set(value);
        } else {
            self.globals[idx - self.imported_globals.len()].set(value);
        }
    }

    /// Look up an exported function index by name.
    pub fn find_exported_function(&self, name: &str) -> Option<u32> {
        self.module.find_exported_function(name)
    }

    /// An exported global as a shareable cell, for wiring into another
    /// instantiation.
    pub fn exported_global(&self, name: &str) -> Option<ExternalGlobal> {
        let export = self
            .module
            .exports
            .iter()
            .find(|e| e.kind == ExportKind::Global && e.name == name)?;
        let idx = export.index as usize;
        if idx < self.imported_globals.len() {
            Some(self.imported_globals[idx].clone())
        } else {
            let local = idx - self.imported_globals.len();
            Some(ExternalGlobal {
                value: Rc::clone(&self.globals[local]),
                global_type: self.module.globals[local].global_type,
            })
        }
    }

    /// An exported memory handle, for wiring into another instantiation.
    pub fn exported_memory(&self, name: &str) -> Option<SharedMemory> {
        self.module
            .exports
            .iter()
            .find(|e| e.kind == ExportKind::Memory && e.name == name)?;
        self.memory.clone()
    }

    /// An exported table handle, for wiring into another instantiation.
    pub fn exported_table(&self, name: &str) -> Option<SharedTable> {
        self.module
            .exports
            .iter()
            .find(|e| e.kind == ExportKind::Table && e.name == name)?;
        self.table.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::instruction::{BranchTarget, Instr};
    use crate::parser::module::{
        Code, DataSegment, ElementSegment, FunctionType, Global, GlobalType, Limits, ValueType,
    };

    fn empty_void_body() -> Code {
        Code {
            locals: vec![],
            instrs: vec![Instr::End],
            labels: vec![BranchTarget {
                pc: 0,
                stack_height: 0,
                arity: 0,
            }],
        }
    }

    #[test]
    fn test_instantiate_empty_module() {
        let instance = instantiate(Module::default(), Imports::default()).unwrap();
        assert_eq!(instance.memory_size(), 0);
        assert!(instance.memory().is_none());
    }

    #[test]
    fn test_memory_allocation_and_data_segment() {
        let mut module = Module::default();
        module.memory = Some(Limits { min: 1, max: None });
        module.datas.push(DataSegment {
            offset: ConstExpr::I32(4),
            bytes: vec![0xaa, 0xbb],
        });
        let instance = instantiate(module, Imports::default()).unwrap();
        let memory = instance.memory().unwrap().borrow();
        assert_eq!(memory.read_u8(4).unwrap(), 0xaa);
        assert_eq!(memory.read_u8(5).unwrap(), 0xbb);
        assert_eq!(memory.read_u8(3).unwrap(), 0);
    }

    #[test]
    fn test_data_segment_out_of_bounds_checked_before_write() {
        // First segment fits, second does not. Because every range is
        // checked before anything is written, the imported memory must
        // come back untouched.
        let memory: SharedMemory = Rc::new(RefCell::new(
            Memory::new(Limits { min: 1, max: None }, 256).unwrap(),
        ));
        let mut module = Module::default();
        module.imported_memory = Some(Limits { min: 1, max: None });
        module.imports.push(crate::parser::module::Import {
            module: "env".into(),
            name: "mem".into(),
            kind: ImportKind::Memory {
                limits: Limits { min: 1, max: None },
            },
        });
        module.datas.push(DataSegment {
            offset: ConstExpr::I32(0),
            bytes: vec![1, 2, 3],
        });
        module.datas.push(DataSegment {
            offset: ConstExpr::I32(65_534),
            bytes: vec![4, 5, 6],
        });

        let imports = Imports {
            memory: Some(Rc::clone(&memory)),
            ..Imports::default()
        };
        let err = instantiate(module, imports).unwrap_err();
        assert!(matches!(err, InstantiateError::DataSegmentOutOfBounds));
        assert_eq!(memory.borrow().read_u8(0).unwrap(), 0);
    }

    #[test]
    fn test_element_segment_fills_table() {
        let mut module = Module::default();
        module.types.push(FunctionType::default());
        module.functions.push(0);
        module.code.push(empty_void_body());
        module.table = Some(Limits { min: 2, max: None });
        module.elements.push(ElementSegment {
            offset: ConstExpr::I32(1),
            functions: vec![0],
        });
        let instance = instantiate(module, Imports::default()).unwrap();
        let table = instance.table().unwrap().borrow();
        assert_eq!(table.get(0).unwrap(), None);
        assert_eq!(table.get(1).unwrap(), Some(0));
    }

    #[test]
    fn test_element_segment_out_of_bounds() {
        let mut module = Module::default();
        module.types.push(FunctionType::default());
        module.functions.push(0);
        module.code.push(empty_void_body());
        module.table = Some(Limits { min: 1, max: None });
        module.elements.push(ElementSegment {
            offset: ConstExpr::I32(1),
            functions: vec![0],
        });
        let err = instantiate(module, Imports::default()).unwrap_err();
        assert!(matches!(err, InstantiateError::ElementSegmentOutOfBounds));
    }

    #[test]
    fn test_global_initializers() {
        let mut module = Module::default();
        module.globals.push(Global {
            global_type: GlobalType {
                value_type: ValueType::I64,
                mutable: true,
            },
            init: ConstExpr::I64(-3),
        });
        let instance = instantiate(module, Imports::default()).unwrap();
        assert_eq!(instance.global_get(0), Value::I64(-3));
        instance.global_set(0, Value::I64(10));
        assert_eq!(instance.global_get(0), Value::I64(10));
    }

    #[test]
    fn test_global_initializer_from_imported_global() {
        let mut module = Module::default();
        let global_type = GlobalType {
            value_type: ValueType::I32,
            mutable: false,
        };
        module.imported_globals.push(global_type);
        module.imports.push(crate::parser::module::Import {
            module: "env".into(),
            name: "base".into(),
            kind: ImportKind::Global { global_type },
        });
        module.globals.push(Global {
            global_type,
            init: ConstExpr::GlobalGet(0),
        });

        let imports = Imports {
            globals: vec![ExternalGlobal::new(
                Rc::new(Cell::new(Value::I32(99))),
                global_type,
            )],
            ..Imports::default()
        };
        let instance = instantiate(module, imports).unwrap();
        // Global 0 is the import, global 1 the module-defined copy.
        assert_eq!(instance.global_get(1), Value::I32(99));
    }

    #[test]
    fn test_import_count_mismatch() {
        let mut module = Module::default();
        module.types.push(FunctionType::default());
        module.imported_function_types.push(0);
        module.imports.push(crate::parser::module::Import {
            module: "env".into(),
            name: "f".into(),
            kind: ImportKind::Function { type_idx: 0 },
        });
        let err = instantiate(module, Imports::default()).unwrap_err();
        assert!(matches!(
            err,
            InstantiateError::ImportCountMismatch {
                kind: "function",
                declared: 1,
                provided: 0,
            }
        ));
    }

    #[test]
    fn test_imported_global_type_must_match_exactly() {
        let mut module = Module::default();
        let declared = GlobalType {
            value_type: ValueType::I32,
            mutable: false,
        };
        module.imported_globals.push(declared);
        module.imports.push(crate::parser::module::Import {
            module: "env".into(),
            name: "g".into(),
            kind: ImportKind::Global {
                global_type: declared,
            },
        });

        // Same value type, wrong mutability.
        let imports = Imports {
            globals: vec![ExternalGlobal::new(
                Rc::new(Cell::new(Value::I32(0))),
                GlobalType {
                    value_type: ValueType::I32,
                    mutable: true,
                },
            )],
            ..Imports::default()
        };
        let err = instantiate(module, imports).unwrap_err();
        assert!(matches!(err, InstantiateError::ImportTypeMismatch { .. }));
    }

    #[test]
    fn test_imported_memory_limits_checked() {
        let mut module = Module::default();
        let declared = Limits { min: 2, max: Some(4) };
        module.imported_memory = Some(declared);
        module.imports.push(crate::parser::module::Import {
            module: "env".into(),
            name: "mem".into(),
            kind: ImportKind::Memory { limits: declared },
        });

        // Provided memory is too small.
        let provided: SharedMemory = Rc::new(RefCell::new(
            Memory::new(Limits { min: 1, max: Some(4) }, 256).unwrap(),
        ));
        let imports = Imports {
            memory: Some(provided),
            ..Imports::default()
        };
        let err = instantiate(module, imports).unwrap_err();
        assert!(matches!(err, InstantiateError::ImportTypeMismatch { .. }));
    }

    #[test]
    fn test_start_function_trap_aborts_instantiation() {
        let mut module = Module::default();
        module.types.push(FunctionType::default());
        module.functions.push(0);
        module.code.push(Code {
            locals: vec![],
            instrs: vec![Instr::Unreachable, Instr::End],
            labels: vec![BranchTarget {
                pc: 1,
                stack_height: 0,
                arity: 0,
            }],
        });
        module.start = Some(0);
        let err = instantiate(module, Imports::default()).unwrap_err();
        assert!(matches!(
            err,
            InstantiateError::StartFunctionTrapped(super::super::Trap::Unreachable)
        ));
    }
}
