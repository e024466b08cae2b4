//! Named import resolution.
//!
//! The instantiator wants positional import vectors; embedders usually
//! have a bag of named host functions. [`resolve_imported_functions`]
//! matches the bag against the module's declared function imports by
//! (module, name) and then by structural signature, producing the
//! positional vector. Extra candidates are permitted and ignored.

use std::rc::Rc;

use super::host::{ExternalFunction, HostFn};
use super::instance::{instantiate, Imports, Instance};
use super::InstantiateError;
use crate::parser::module::{ImportKind, Module, ValueType};

/// A named host function offered to the resolver.
#[derive(Clone)]
pub struct ImportedFunction {
    pub module: String,
    pub name: String,
    pub inputs: Vec<ValueType>,
    pub output: Option<ValueType>,
    pub function: Rc<HostFn>,
}

impl ImportedFunction {
    pub fn new(
        module: impl Into<String>,
        name: impl Into<String>,
        inputs: Vec<ValueType>,
        output: Option<ValueType>,
        function: Rc<HostFn>,
    ) -> ImportedFunction {
        ImportedFunction {
            module: module.into(),
            name: name.into(),
            inputs,
            output,
            function,
        }
    }
}

/// Produce, for each function import the module declares, exactly one
/// matching candidate.
///
/// A name with no candidate at all is an unresolved import; a name whose
/// candidates all carry the wrong signature is a signature mismatch.
pub fn resolve_imported_functions(
    module: &Module,
    imported: &[ImportedFunction],
) -> Result<Vec<ExternalFunction>, InstantiateError> {
    let mut resolved = Vec::new();
    for import in &module.imports {
        let ImportKind::Function { type_idx } = &import.kind else {
            continue;
        };
        let declared = &module.types[*type_idx as usize];

        let mut name_seen = false;
        let mut matched = None;
        for candidate in imported {
            if candidate.module != import.module || candidate.name != import.name {
                continue;
            }
            name_seen = true;
            if candidate.inputs == declared.params && candidate.output == declared.result() {
                matched = Some(candidate);
                break;
            }
        }

        match matched {
            Some(candidate) => resolved.push(ExternalFunction {
                func: Rc::clone(&candidate.function),
                func_type: declared.clone(),
            }),
            None if name_seen => {
                return Err(InstantiateError::ImportSignatureMismatch {
                    module: import.module.clone(),
                    name: import.name.clone(),
                });
            }
            None => {
                return Err(InstantiateError::UnresolvedImport {
                    module: import.module.clone(),
                    name: import.name.clone(),
                });
            }
        }
    }
    Ok(resolved)
}

/// Resolve named imports, then instantiate. Consumes the module the same
/// way [`instantiate`] does.
pub fn resolve_instantiate(
    module: Module,
    imported: &[ImportedFunction],
) -> Result<Instance, InstantiateError> {
    let functions = resolve_imported_functions(&module, imported)?;
    instantiate(
        module,
        Imports {
            functions,
            ..Imports::default()
        },
    )
}
