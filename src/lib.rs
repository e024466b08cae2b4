//! A WebAssembly 1.0 interpreter.
//!
//! wrasm parses a binary module, validates it, instantiates it, and
//! executes its functions on a stack-machine interpreter with precise
//! trap semantics:
//!
//! - [`parser`] -- Binary format decoder and validator. Reads `.wasm`
//!   bytes into a [`Module`], pre-computing branch metadata so that
//!   execution never scans for branch targets.
//! - [`runtime`] -- Instantiation, linear memory, tables, globals, host
//!   functions, and the interpreter itself.
//!
//! # Example
//!
//! Parse a module exporting an add function, instantiate it, and call it:
//!
//! ```
//! use wrasm::{execute, instantiate, parse, ExecutionResult, Imports, Value};
//!
//! // (module
//! //   (func (export "add") (param i32 i32) (result i32)
//! //     local.get 0
//! //     local.get 1
//! //     i32.add))
//! let bytes = [
//!     0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, // magic + version
//!     0x01, 0x07, 0x01, 0x60, 0x02, 0x7f, 0x7f, 0x01, 0x7f, // type section
//!     0x03, 0x02, 0x01, 0x00, // function section
//!     0x07, 0x07, 0x01, 0x03, b'a', b'd', b'd', 0x00, 0x00, // export section
//!     0x0a, 0x09, 0x01, 0x07, 0x00, 0x20, 0x00, 0x20, 0x01, 0x6a, 0x0b, // code
//! ];
//!
//! let module = parse(&bytes).unwrap();
//! let add = module.find_exported_function("add").unwrap();
//! let mut instance = instantiate(module, Imports::default()).unwrap();
//! let result = execute(&mut instance, add, &[Value::I32(2), Value::I32(3)], 0);
//! assert_eq!(result, ExecutionResult::Value(Value::I32(5)));
//! ```
//!
//! Host functionality is injected as closures; see
//! [`runtime::resolver::resolve_instantiate`] for matching a bag of named
//! host functions against a module's imports.
//!
//! # Scope
//!
//! The full WebAssembly 1.0 instruction set plus the saturating
//! truncation and sign extension operations. One memory and one table
//! per module, single-value results. No SIMD, threads, reference types
//! or multi-value.

pub mod parser;
pub mod runtime;

pub use parser::module::Module;
pub use parser::{parse, ParseError};
pub use runtime::{
    execute, instantiate, resolve_instantiate, ExecutionResult, Imports, Instance,
    InstantiateError, Trap, Value,
};

/// Parse-only validation: true iff `parse` would accept the bytes.
///
/// No module is retained.
pub fn validate(bytes: &[u8]) -> bool {
    parser::parse(bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_matches_parse() {
        let valid = [0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];
        assert!(validate(&valid));
        assert!(parse(&valid).is_ok());

        let invalid = [0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x01];
        assert!(!validate(&invalid));
        assert!(parse(&invalid).is_err());

        assert!(!validate(&[]));
        assert!(!validate(&[0x00]));
    }
}
