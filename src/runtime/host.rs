//! Host function capability types.
//!
//! A host function is a callable plus its declared signature. The callable
//! receives a borrow of the instance (so it may call back in), the
//! argument slice, and the current call depth; it answers with an
//! [`ExecutionResult`]. Context travels inside the closure, so no separate
//! cookie parameter is needed.

use std::fmt;
use std::rc::Rc;

use super::instance::Instance;
use super::{ExecutionResult, GlobalCell, Value};
use crate::parser::module::{FunctionType, GlobalType};

/// The callable half of a host function.
///
/// Re-entering [`crate::runtime::execute`] from inside is allowed; pass
/// `depth + 1` so the recursion guard keeps working.
pub type HostFn = dyn Fn(&mut Instance, &[Value], u32) -> ExecutionResult;

/// A host function bound to a signature, ready to satisfy a function
/// import.
#[derive(Clone)]
pub struct ExternalFunction {
    pub func: Rc<HostFn>,
    pub func_type: FunctionType,
}

impl ExternalFunction {
    pub fn new(func_type: FunctionType, func: Rc<HostFn>) -> ExternalFunction {
        ExternalFunction { func, func_type }
    }
}

impl fmt::Debug for ExternalFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalFunction")
            .field("func_type", &self.func_type)
            .finish_non_exhaustive()
    }
}

/// An externally owned global cell with its declared type. Writes through
/// a mutable imported global are observed by the exporter, since both
/// sides share the cell.
#[derive(Debug, Clone)]
pub struct ExternalGlobal {
    pub value: GlobalCell,
    pub global_type: GlobalType,
}

impl ExternalGlobal {
    pub fn new(value: GlobalCell, global_type: GlobalType) -> ExternalGlobal {
        ExternalGlobal { value, global_type }
    }
}
