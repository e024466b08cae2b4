//! Runtime: instantiation and execution.
//!
//! This module turns a validated [`crate::parser::module::Module`] into a
//! live [`Instance`] and runs its functions on a stack machine. Failures
//! fall into two disjoint categories: [`InstantiateError`] for anything
//! that goes wrong while building an instance, and [`Trap`] for abrupt
//! termination during execution. Traps are the only failures an embedder
//! can recover from mid-run.

pub mod executor;
pub mod host;
pub mod instance;
pub mod memory;
pub mod ops;
pub mod resolver;
pub mod stack;
pub mod table;
pub mod value;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use thiserror::Error;

pub use executor::execute;
pub use host::{ExternalFunction, ExternalGlobal, HostFn};
pub use instance::{instantiate, Imports, Instance};
pub use memory::Memory;
pub use resolver::{resolve_imported_functions, resolve_instantiate, ImportedFunction};
pub use table::Table;
pub use value::Value;

/// A memory shared between its owning instance and any importers.
pub type SharedMemory = Rc<RefCell<Memory>>;

/// A table shared between its owning instance and any importers.
pub type SharedTable = Rc<RefCell<Table>>;

/// A single global cell. Imported mutable globals stay writable through
/// the exporter's copy of the cell.
pub type GlobalCell = Rc<Cell<Value>>;

/// Abrupt termination of an execution call.
///
/// A trap unwinds the whole call, leaving no observable result. The
/// host/guest boundary is value-returning, so traps never unwind through
/// host code.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    #[error("unreachable instruction executed")]
    Unreachable,
    #[error("integer divide by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("invalid conversion to integer")]
    InvalidConversionToInteger,
    #[error("out of bounds memory access")]
    OutOfBoundsMemoryAccess,
    #[error("undefined table element")]
    UndefinedElement,
    #[error("uninitialized table element")]
    UninitializedElement,
    #[error("indirect call type mismatch")]
    IndirectCallTypeMismatch,
    #[error("call stack exhausted")]
    CallStackExhausted,
    #[error("host function trapped")]
    HostFunctionTrapped,
    #[error("host function result does not match its declared type")]
    HostResultTypeMismatch,
}

/// Why instantiation failed. Whatever was allocated before the failure is
/// released; no partially built instance is observable.
#[derive(Debug, Error)]
pub enum InstantiateError {
    #[error("module declares {declared} {kind} imports, {provided} provided")]
    ImportCountMismatch {
        kind: &'static str,
        declared: usize,
        provided: usize,
    },
    #[error("import type mismatch for {module}.{name}")]
    ImportTypeMismatch { module: String, name: String },
    #[error("unresolved import {module}.{name}")]
    UnresolvedImport { module: String, name: String },
    #[error("no matching signature for import {module}.{name}")]
    ImportSignatureMismatch { module: String, name: String },
    #[error("module memory of {pages} pages exceeds the {limit} page allocation limit")]
    MemoryLimitExceeded { pages: u32, limit: u32 },
    #[error("out of memory")]
    OutOfMemory,
    #[error("element segment does not fit the table")]
    ElementSegmentOutOfBounds,
    #[error("data segment does not fit the memory")]
    DataSegmentOutOfBounds,
    #[error("start function trapped: {0}")]
    StartFunctionTrapped(Trap),
}

/// The outcome of one execution call: a single value, nothing, or a trap.
///
/// Host functions return this type as well; it is the whole protocol of
/// the host/guest boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExecutionResult {
    Value(Value),
    Void,
    Trap,
}

impl ExecutionResult {
    pub fn trapped(&self) -> bool {
        matches!(self, ExecutionResult::Trap)
    }

    /// The result value, when execution produced one.
    pub fn value(&self) -> Option<Value> {
        match self {
            ExecutionResult::Value(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<Value> for ExecutionResult {
    fn from(v: Value) -> ExecutionResult {
        ExecutionResult::Value(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_result_accessors() {
        assert!(ExecutionResult::Trap.trapped());
        assert!(!ExecutionResult::Void.trapped());
        assert_eq!(ExecutionResult::Trap.value(), None);
        assert_eq!(ExecutionResult::Void.value(), None);
        assert_eq!(
            ExecutionResult::Value(Value::I32(5)).value(),
            Some(Value::I32(5))
        );
        assert_eq!(
            ExecutionResult::from(Value::I64(9)),
            ExecutionResult::Value(Value::I64(9))
        );
    }

    #[test]
    fn test_trap_messages() {
        assert_eq!(Trap::DivisionByZero.to_string(), "integer divide by zero");
        assert_eq!(
            Trap::CallStackExhausted.to_string(),
            "call stack exhausted"
        );
    }
}
