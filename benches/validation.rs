//! Decoding and validation benchmarks.
//!
//! Modules are synthesised in memory so the benchmarks measure the
//! decoder, not the filesystem.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

fn leb(n: u32) -> Vec<u8> {
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

fn section(id: u8, mut payload: Vec<u8>) -> Vec<u8> {
    let mut out = vec![id];
    out.extend(leb(payload.len() as u32));
    out.append(&mut payload);
    out
}

/// A module with `count` small arithmetic functions, all `(i32) -> i32`.
fn arithmetic_module(count: u32) -> Vec<u8> {
    let mut out = vec![0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

    out.extend(section(1, {
        let mut p = leb(1);
        p.extend([0x60, 0x01, 0x7f, 0x01, 0x7f]);
        p
    }));

    out.extend(section(3, {
        let mut p = leb(count);
        for _ in 0..count {
            p.extend(leb(0));
        }
        p
    }));

    out.extend(section(10, {
        let mut p = leb(count);
        for i in 0..count {
            // local.get 0, i32.const i, i32.add, i32.const 3, i32.mul, end
            let mut code = vec![0x00, 0x20, 0x00, 0x41];
            code.extend(leb(i & 0x3f));
            code.extend([0x6a, 0x41, 0x03, 0x6c, 0x0b]);
            let mut entry = leb(code.len() as u32);
            entry.extend(code);
            p.extend(entry);
        }
        p
    }));

    out
}

/// A module with one function full of nested blocks and branches, to
/// exercise the control-stack and branch-patching paths.
fn branchy_module(depth: u32) -> Vec<u8> {
    let mut code = vec![0x00];
    for _ in 0..depth {
        code.extend([0x02, 0x40]); // block
    }
    for level in 0..depth {
        // i32.const 1, br_if <level>
        code.extend([0x41, 0x01, 0x0d]);
        code.extend(leb(level));
    }
    for _ in 0..depth {
        code.push(0x0b);
    }
    code.push(0x0b);

    let mut out = vec![0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];
    out.extend(section(1, {
        let mut p = leb(1);
        p.extend([0x60, 0x00, 0x00]);
        p
    }));
    out.extend(section(3, {
        let mut p = leb(1);
        p.extend(leb(0));
        p
    }));
    out.extend(section(10, {
        let mut p = leb(1);
        let mut entry = leb(code.len() as u32);
        entry.extend(code);
        p.extend(entry);
        p
    }));
    out
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    for count in [16u32, 256, 2048] {
        let bytes = arithmetic_module(count);
        assert!(wrasm::validate(&bytes), "benchmark module must be valid");
        group.throughput(criterion::Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::new("functions", count), &bytes, |b, bytes| {
            b.iter(|| wrasm::parse(black_box(bytes)).unwrap());
        });
    }
    group.finish();
}

fn bench_validate_only(c: &mut Criterion) {
    let bytes = arithmetic_module(256);
    c.bench_function("validate/functions_256", |b| {
        b.iter(|| assert!(wrasm::validate(black_box(&bytes))));
    });
}

fn bench_branchy(c: &mut Criterion) {
    let bytes = branchy_module(64);
    assert!(wrasm::validate(&bytes), "benchmark module must be valid");
    c.bench_function("parse/nested_blocks_64", |b| {
        b.iter(|| wrasm::parse(black_box(&bytes)).unwrap());
    });
}

criterion_group!(benches, bench_parse, bench_validate_only, bench_branchy);
criterion_main!(benches);
