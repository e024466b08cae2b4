//! Instantiation and linking tests: import matching, the resolver, and
//! sharing of memories and globals between embedder and instance.

mod common;

use std::cell::Cell;
use std::rc::Rc;

use common::*;
use wrasm::parser::module::{GlobalType, ValueType};
use wrasm::runtime::host::{ExternalFunction, ExternalGlobal};
use wrasm::runtime::resolver::{resolve_imported_functions, ImportedFunction};
use wrasm::runtime::Instance;
use wrasm::{
    execute, instantiate, parse, resolve_instantiate, ExecutionResult, Imports, InstantiateError,
    Value,
};

fn host_noop() -> Rc<wrasm::runtime::HostFn> {
    Rc::new(|_: &mut Instance, _: &[Value], _| ExecutionResult::Void)
}

fn logging_import_module() -> Vec<u8> {
    // (import "env" "log" (func (param i32)))
    module(&[
        type_section(&[func_type(&[I32], &[])]),
        import_section(&[import_func("env", "log", 0)]),
    ])
}

#[test]
fn missing_function_import_fails() {
    let parsed = parse(&logging_import_module()).unwrap();
    let err = instantiate(parsed, Imports::default()).unwrap_err();
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
fn function_import_signature_is_checked() {
    let parsed = parse(&logging_import_module()).unwrap();
    // Offered as () -> () instead of (i32) -> ()
    let imports = Imports {
        functions: vec![ExternalFunction::new(
            wrasm::parser::module::FunctionType::default(),
            host_noop(),
        )],
        ..Imports::default()
    };
    let err = instantiate(parsed, imports).unwrap_err();
    assert!(matches!(err, InstantiateError::ImportTypeMismatch { .. }));
}

#[test]
fn resolver_matches_unordered_candidates() {
    let parsed = parse(&logging_import_module()).unwrap();
    let candidates = vec![
        ImportedFunction::new("env", "other", vec![], None, host_noop()),
        ImportedFunction::new("env", "log", vec![ValueType::I32], None, host_noop()),
    ];
    let resolved = resolve_imported_functions(&parsed, &candidates).unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].func_type.params, vec![ValueType::I32]);
}

#[test]
fn resolver_reports_unresolved_and_mismatched_imports() {
    let parsed = parse(&logging_import_module()).unwrap();
    let err = resolve_imported_functions(&parsed, &[]).unwrap_err();
    assert!(matches!(err, InstantiateError::UnresolvedImport { .. }));

    let parsed = parse(&logging_import_module()).unwrap();
    let candidates = vec![ImportedFunction::new(
        "env",
        "log",
        vec![ValueType::F32],
        None,
        host_noop(),
    )];
    let err = resolve_instantiate(parsed, &candidates).unwrap_err();
    assert!(matches!(
        err,
        InstantiateError::ImportSignatureMismatch { .. }
    ));
}

#[test]
fn imported_immutable_global_seeds_offsets_and_reads() {
    // (import "env" "base" (global i32))
    // (func (export "get") (result i32) global.get 0)
    let bytes = module(&[
        type_section(&[func_type(&[], &[I32])]),
        import_section(&[import_global("env", "base", I32, false)]),
        function_section(&[0]),
        export_section(&[export_func("get", 0)]),
        code_section(&[body(&[], &[0x23, 0x00, 0x0b])]),
    ]);
    let parsed = parse(&bytes).unwrap();

    let imports = Imports {
        globals: vec![ExternalGlobal::new(
            Rc::new(Cell::new(Value::I32(7))),
            GlobalType {
                value_type: ValueType::I32,
                mutable: false,
            },
        )],
        ..Imports::default()
    };
    let mut instance = instantiate(parsed, imports).unwrap();
    assert_eq!(
        execute(&mut instance, 0, &[], 0),
        ExecutionResult::Value(Value::I32(7))
    );
}

#[test]
fn writes_to_imported_mutable_global_reach_the_owner() {
    // (import "env" "counter" (global (mut i32)))
    // (func (export "bump") global.get 0, i32.const 1, i32.add, global.set 0)
    let bytes = module(&[
        type_section(&[func_type(&[], &[])]),
        import_section(&[import_global("env", "counter", I32, true)]),
        function_section(&[0]),
        export_section(&[export_func("bump", 0)]),
        code_section(&[body(&[], &[0x23, 0x00, 0x41, 0x01, 0x6a, 0x24, 0x00, 0x0b])]),
    ]);
    let parsed = parse(&bytes).unwrap();

    let cell = Rc::new(Cell::new(Value::I32(10)));
    let imports = Imports {
        globals: vec![ExternalGlobal::new(
            Rc::clone(&cell),
            GlobalType {
                value_type: ValueType::I32,
                mutable: true,
            },
        )],
        ..Imports::default()
    };
    let mut instance = instantiate(parsed, imports).unwrap();
    assert!(!execute(&mut instance, 0, &[], 0).trapped());
    assert!(!execute(&mut instance, 0, &[], 0).trapped());
    // The exporter's cell observed both writes.
    assert_eq!(cell.get(), Value::I32(12));
}

#[test]
fn global_import_mutability_must_match() {
    let bytes = module(&[import_section(&[import_global("env", "g", I32, false)])]);
    let parsed = parse(&bytes).unwrap();
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
    assert!(matches!(
        instantiate(parsed, imports).unwrap_err(),
        InstantiateError::ImportTypeMismatch { .. }
    ));
}

#[test]
fn exported_memory_can_back_another_instance() {
    // Exporter: (memory 1) (data (i32.const 16) "\2a") (export "mem" (memory 0))
    let exporter_bytes = module(&[
        memory_section(1, Some(4)),
        export_section(&[export_memory("mem")]),
        data_section(&[data_segment(16, &[0x2a])]),
    ]);
    let exporter = instantiate(parse(&exporter_bytes).unwrap(), Imports::default()).unwrap();
    let shared = exporter.exported_memory("mem").unwrap();

    // Importer: (import "env" "mem" (memory 1 4))
    // (func (export "peek") (param i32) (result i32) local.get 0 i32.load8_u)
    let importer_bytes = module(&[
        type_section(&[func_type(&[I32], &[I32])]),
        import_section(&[import_memory("env", "mem", 1, Some(4))]),
        function_section(&[0]),
        export_section(&[export_func("peek", 0)]),
        code_section(&[body(&[], &[0x20, 0x00, 0x2d, 0x00, 0x00, 0x0b])]),
    ]);
    let imports = Imports {
        memory: Some(shared),
        ..Imports::default()
    };
    let mut importer = instantiate(parse(&importer_bytes).unwrap(), imports).unwrap();

    // The importer reads the byte the exporter's data segment wrote.
    assert_eq!(
        execute(&mut importer, 0, &[Value::I32(16)], 0),
        ExecutionResult::Value(Value::I32(42))
    );
}

#[test]
fn imported_memory_limits_are_enforced() {
    // Importer requires at least 2 pages.
    let importer_bytes = module(&[import_section(&[import_memory("env", "mem", 2, Some(4))])]);

    // Exporter only has one page.
    let exporter_bytes = module(&[
        memory_section(1, Some(4)),
        export_section(&[export_memory("mem")]),
    ]);
    let exporter = instantiate(parse(&exporter_bytes).unwrap(), Imports::default()).unwrap();

    let imports = Imports {
        memory: Some(exporter.exported_memory("mem").unwrap()),
        ..Imports::default()
    };
    let err = instantiate(parse(&importer_bytes).unwrap(), imports).unwrap_err();
    assert!(matches!(err, InstantiateError::ImportTypeMismatch { .. }));
}

#[test]
fn data_segment_outside_memory_fails_instantiation() {
    let bytes = module(&[
        memory_section(1, None),
        data_section(&[data_segment(65_535, &[1, 2])]),
    ]);
    let err = instantiate(parse(&bytes).unwrap(), Imports::default()).unwrap_err();
    assert!(matches!(err, InstantiateError::DataSegmentOutOfBounds));
}

#[test]
fn element_segment_outside_table_fails_instantiation() {
    let bytes = module(&[
        type_section(&[func_type(&[], &[])]),
        function_section(&[0]),
        table_section(1, None),
        element_section(&[element_segment(1, &[0])]),
        code_section(&[body(&[], &[0x0b])]),
    ]);
    let err = instantiate(parse(&bytes).unwrap(), Imports::default()).unwrap_err();
    assert!(matches!(err, InstantiateError::ElementSegmentOutOfBounds));
}

#[test]
fn instance_memory_accessors() {
    let bytes = module(&[
        memory_section(2, None),
        data_section(&[data_segment(0, b"wasm")]),
    ]);
    let instance = instantiate(parse(&bytes).unwrap(), Imports::default()).unwrap();
    assert_eq!(instance.memory_size(), 2 * 65_536);
    let memory = instance.memory().unwrap().borrow();
    assert_eq!(&memory.data()[0..4], b"wasm");
}
