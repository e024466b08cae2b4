//! Shared helpers for building binary modules in tests.
//!
//! Tests assemble real `.wasm` bytes rather than poking internal data
//! structures, so every scenario exercises the decoder and validator on
//! its way to the runtime.

#![allow(dead_code)]

// Value type bytes
pub const I32: u8 = 0x7f;
pub const I64: u8 = 0x7e;
pub const F32: u8 = 0x7d;
pub const F64: u8 = 0x7c;

/// Unsigned LEB128.
pub fn leb(n: u32) -> Vec<u8> {
    let mut out = Vec::new();
    let mut v = n;
    loop {
        let mut byte = (v & 0x7f) as u8;
        v >>= 7;
        if v != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if v == 0 {
            return out;
        }
    }
}

/// Signed LEB128, for const immediates.
pub fn sleb(n: i64) -> Vec<u8> {
    let mut out = Vec::new();
    let mut v = n;
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        let done = (v == 0 && byte & 0x40 == 0) || (v == -1 && byte & 0x40 != 0);
        out.push(if done { byte } else { byte | 0x80 });
        if done {
            return out;
        }
    }
}

pub fn section(id: u8, mut payload: Vec<u8>) -> Vec<u8> {
    let mut out = vec![id];
    out.extend(leb(payload.len() as u32));
    out.append(&mut payload);
    out
}

pub fn module(sections: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];
    for s in sections {
        out.extend_from_slice(s);
    }
    out
}

fn counted(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut out = leb(entries.len() as u32);
    for e in entries {
        out.extend_from_slice(e);
    }
    out
}

/// One function type entry: `(params) -> (results)`.
pub fn func_type(params: &[u8], results: &[u8]) -> Vec<u8> {
    let mut out = vec![0x60];
    out.extend(leb(params.len() as u32));
    out.extend_from_slice(params);
    out.extend(leb(results.len() as u32));
    out.extend_from_slice(results);
    out
}

pub fn type_section(types: &[Vec<u8>]) -> Vec<u8> {
    section(1, counted(types))
}

pub fn import_func(module_name: &str, name: &str, type_idx: u32) -> Vec<u8> {
    let mut out = name_bytes(module_name);
    out.extend(name_bytes(name));
    out.push(0x00);
    out.extend(leb(type_idx));
    out
}

pub fn import_global(module_name: &str, name: &str, value_type: u8, mutable: bool) -> Vec<u8> {
    let mut out = name_bytes(module_name);
    out.extend(name_bytes(name));
    out.push(0x03);
    out.push(value_type);
    out.push(u8::from(mutable));
    out
}

pub fn import_memory(module_name: &str, name: &str, min: u32, max: Option<u32>) -> Vec<u8> {
    let mut out = name_bytes(module_name);
    out.extend(name_bytes(name));
    out.push(0x02);
    out.extend(limits(min, max));
    out
}

pub fn import_section(imports: &[Vec<u8>]) -> Vec<u8> {
    section(2, counted(imports))
}

pub fn function_section(type_indices: &[u32]) -> Vec<u8> {
    let mut payload = leb(type_indices.len() as u32);
    for idx in type_indices {
        payload.extend(leb(*idx));
    }
    section(3, payload)
}

fn limits(min: u32, max: Option<u32>) -> Vec<u8> {
    let mut out = Vec::new();
    match max {
        None => {
            out.push(0x00);
            out.extend(leb(min));
        }
        Some(max) => {
            out.push(0x01);
            out.extend(leb(min));
            out.extend(leb(max));
        }
    }
    out
}

pub fn table_section(min: u32, max: Option<u32>) -> Vec<u8> {
    let mut payload = vec![0x01, 0x70];
    payload.extend(limits(min, max));
    section(4, payload)
}

pub fn memory_section(min: u32, max: Option<u32>) -> Vec<u8> {
    let mut payload = vec![0x01];
    payload.extend(limits(min, max));
    section(5, payload)
}

/// One global entry with an `i32.const` initializer.
pub fn global_i32(value: i32, mutable: bool) -> Vec<u8> {
    let mut out = vec![I32, u8::from(mutable), 0x41];
    out.extend(sleb(i64::from(value)));
    out.push(0x0b);
    out
}

pub fn global_section(globals: &[Vec<u8>]) -> Vec<u8> {
    section(6, counted(globals))
}

fn name_bytes(name: &str) -> Vec<u8> {
    let mut out = leb(name.len() as u32);
    out.extend_from_slice(name.as_bytes());
    out
}

pub fn export_func(name: &str, func_idx: u32) -> Vec<u8> {
    let mut out = name_bytes(name);
    out.push(0x00);
    out.extend(leb(func_idx));
    out
}

pub fn export_global(name: &str, global_idx: u32) -> Vec<u8> {
    let mut out = name_bytes(name);
    out.push(0x03);
    out.extend(leb(global_idx));
    out
}

pub fn export_memory(name: &str) -> Vec<u8> {
    let mut out = name_bytes(name);
    out.push(0x02);
    out.extend(leb(0));
    out
}

pub fn export_section(exports: &[Vec<u8>]) -> Vec<u8> {
    section(7, counted(exports))
}

pub fn start_section(func_idx: u32) -> Vec<u8> {
    section(8, leb(func_idx))
}

/// One element segment at a constant offset.
pub fn element_segment(offset: i32, functions: &[u32]) -> Vec<u8> {
    let mut out = vec![0x00, 0x41];
    out.extend(sleb(i64::from(offset)));
    out.push(0x0b);
    out.extend(leb(functions.len() as u32));
    for f in functions {
        out.extend(leb(*f));
    }
    out
}

pub fn element_section(segments: &[Vec<u8>]) -> Vec<u8> {
    section(9, counted(segments))
}

/// One code entry. `locals` lists (count, type) runs; `code` is the raw
/// instruction stream including the terminating `end`.
pub fn body(locals: &[(u32, u8)], code: &[u8]) -> Vec<u8> {
    let mut inner = leb(locals.len() as u32);
    for (count, ty) in locals {
        inner.extend(leb(*count));
        inner.push(*ty);
    }
    inner.extend_from_slice(code);
    let mut out = leb(inner.len() as u32);
    out.append(&mut inner);
    out
}

pub fn code_section(bodies: &[Vec<u8>]) -> Vec<u8> {
    section(10, counted(bodies))
}

/// One data segment at a constant offset.
pub fn data_segment(offset: i32, bytes: &[u8]) -> Vec<u8> {
    let mut out = vec![0x00, 0x41];
    out.extend(sleb(i64::from(offset)));
    out.push(0x0b);
    out.extend(leb(bytes.len() as u32));
    out.extend_from_slice(bytes);
    out
}

pub fn data_section(segments: &[Vec<u8>]) -> Vec<u8> {
    section(11, counted(segments))
}

/// The canonical add module:
/// `(func (export "add") (param i32 i32) (result i32) ...)`.
pub fn add_module() -> Vec<u8> {
    module(&[
        type_section(&[func_type(&[I32, I32], &[I32])]),
        function_section(&[0]),
        export_section(&[export_func("add", 0)]),
        code_section(&[body(&[], &[0x20, 0x00, 0x20, 0x01, 0x6a, 0x0b])]),
    ])
}
