//! Criterion benchmarks for unpyc-core.
//!
//! These benchmarks exercise the pure-Rust internals that do NOT need a
//! Python runtime or any external decompiler.
//!
//! ## Benchmark groups
//!
//! 1. **report_parsing**: Disassembler report to code-unit tree.
//! 2. **gap_counting**: Marker and stub detection over decompiled text.
//! 3. **constant_recovery**: Store tracing and literal formatting.
//!
//! ## Running
//!
//! ```sh
//! cargo bench --manifest-path crates/unpyc-core/Cargo.toml
//! # Run only the gap counting group:
//! cargo bench --manifest-path crates/unpyc-core/Cargo.toml -- gap_counting
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use _unpyc_core::analysis::completeness::{count_gaps, find_incomplete_items};
use _unpyc_core::analysis::constants::{find_missing_module_constants, format_constant, recover};
use _unpyc_core::bytecode::disasm::parse_report;
use _unpyc_core::bytecode::{BytecodeIndex, PyValue};
use _unpyc_core::config::DecompilerConfig;
use _unpyc_core::guards::GAP_MARKER;

// ---------------------------------------------------------------------------
// Synthetic inputs
// ---------------------------------------------------------------------------

fn op(offset: usize, name: &str, arg: &str) -> String {
    format!("{offset:<8}{name:<30}{arg}").trim_end().to_string()
}

struct Block<'a> {
    name: &'a str,
    qualname: &'a str,
    argcount: u32,
    stacksize: u32,
    names: Vec<String>,
    locals: Vec<String>,
    /// Pre-rendered constant entries, each starting at the item indent.
    consts: Vec<String>,
    disassembly: Vec<String>,
}

fn render(block: &Block<'_>, indent: usize) -> String {
    let pad = " ".repeat(indent);
    let field = " ".repeat(indent + 4);
    let item = " ".repeat(indent + 8);
    let mut out = format!("{pad}[Code]\n");
    out += &format!("{field}File Name: synth.py\n");
    out += &format!("{field}Object Name: {}\n", block.name);
    out += &format!("{field}Qualified Name: {}\n", block.qualname);
    out += &format!("{field}Arg Count: {}\n", block.argcount);
    out += &format!("{field}Pos Only Arg Count: 0\n");
    out += &format!("{field}KW Only Arg Count: 0\n");
    out += &format!("{field}Stack Size: {}\n", block.stacksize);
    out += &format!("{field}Flags: 0x00000000\n");
    out += &format!("{field}[Names]\n");
    for name in &block.names {
        out += &format!("{item}'{name}'\n");
    }
    out += &format!("{field}[Locals+Names]\n");
    for local in &block.locals {
        out += &format!("{item}'{local}'\n");
    }
    out += &format!("{field}[Constants]\n");
    for konst in &block.consts {
        out += konst;
    }
    out += &format!("{field}[Disassembly]\n");
    for line in &block.disassembly {
        out += &format!("{item}{line}\n");
    }
    out
}

fn method(class: &str, name: &str, indent: usize) -> String {
    let qualname = format!("{class}.{name}");
    render(
        &Block {
            name,
            qualname: &qualname,
            argcount: 1,
            stacksize: 2,
            names: vec!["refresh".to_string()],
            locals: vec!["self".to_string()],
            consts: vec![format!("{}None\n", " ".repeat(indent + 8))],
            disassembly: vec![
                op(0, "RESUME", "0"),
                op(2, "LOAD_FAST", "0: self"),
                op(4, "LOAD_ATTR", "0: refresh"),
                op(6, "RETURN_VALUE", ""),
            ],
        },
        indent,
    )
}

fn class(name: &str, methods: usize, indent: usize) -> String {
    let item = " ".repeat(indent + 8);
    let mut names = vec!["__name__".to_string(), "__module__".to_string(), "__qualname__".to_string()];
    let mut consts = vec![format!("{item}'{name}'\n")];
    let mut disassembly = vec![
        op(0, "RESUME", "0"),
        op(2, "LOAD_NAME", "0: __name__"),
        op(4, "STORE_NAME", "1: __module__"),
        op(6, "LOAD_CONST", &format!("0: '{name}'")),
        op(8, "STORE_NAME", "2: __qualname__"),
    ];
    let mut offset = 10;
    for m in 0..methods {
        let method_name = format!("handle_{m}");
        consts.push(method(name, &method_name, indent + 8));
        names.push(method_name.clone());
        disassembly.push(op(offset, "LOAD_CONST", &format!("{}: <CODE> {method_name}", m + 1)));
        disassembly.push(op(offset + 2, "MAKE_FUNCTION", "0"));
        disassembly.push(op(offset + 4, "STORE_NAME", &format!("{}: {method_name}", names.len() - 1)));
        offset += 6;
    }
    consts.push(format!("{item}None\n"));
    disassembly.push(op(offset, "LOAD_CONST", &format!("{}: None", methods + 1)));
    disassembly.push(op(offset + 2, "RETURN_VALUE", ""));
    render(
        &Block {
            name,
            qualname: name,
            argcount: 0,
            stacksize: 1,
            names,
            locals: Vec::new(),
            consts,
            disassembly,
        },
        indent,
    )
}

/// A module with `classes` classes of `methods` methods each plus one
/// integer constant per class.
fn synthetic_report(classes: usize, methods: usize) -> String {
    let item = " ".repeat(8);
    let mut names = Vec::new();
    let mut consts = Vec::new();
    let mut disassembly = vec![op(0, "RESUME", "0")];
    let mut offset = 2;
    for c in 0..classes {
        let class_name = format!("Widget{c}");
        let class_const = consts.len();
        consts.push(class(&class_name, methods, 8));
        let name_const = consts.len();
        consts.push(format!("{item}'{class_name}'\n"));
        let level_const = consts.len();
        consts.push(format!("{item}{c}\n"));

        disassembly.push(op(offset, "PUSH_NULL", ""));
        disassembly.push(op(offset + 2, "LOAD_BUILD_CLASS", ""));
        disassembly.push(op(offset + 4, "LOAD_CONST", &format!("{class_const}: <CODE> {class_name}")));
        disassembly.push(op(offset + 6, "MAKE_FUNCTION", "0"));
        disassembly.push(op(offset + 8, "LOAD_CONST", &format!("{name_const}: '{class_name}'")));
        disassembly.push(op(offset + 10, "PRECALL", "2"));
        disassembly.push(op(offset + 14, "CALL", "2"));
        disassembly.push(op(offset + 24, "STORE_NAME", &format!("{}: {class_name}", names.len())));
        names.push(class_name);
        disassembly.push(op(offset + 26, "LOAD_CONST", &format!("{level_const}: {c}")));
        disassembly.push(op(offset + 28, "STORE_NAME", &format!("{}: LEVEL_{c}", names.len())));
        names.push(format!("LEVEL_{c}"));
        offset += 30;
    }
    consts.push(format!("{item}None\n"));
    disassembly.push(op(offset, "LOAD_CONST", &format!("{}: None", consts.len() - 1)));
    disassembly.push(op(offset + 2, "RETURN_VALUE", ""));

    let body = render(
        &Block {
            name: "<module>",
            qualname: "<module>",
            argcount: 0,
            stacksize: 4,
            names,
            locals: Vec::new(),
            consts,
            disassembly,
        },
        0,
    );
    format!("synth.pyc (Python 3.11)\n{body}")
}

/// Decompiled text for the synthetic module: every class stubbed with
/// `pass`, every fifth one followed by a gap marker.
fn synthetic_source(classes: usize) -> String {
    let mut out = String::from("import os\n\n");
    for c in 0..classes {
        out += &format!("class Widget{c}(object):\n    pass\n");
        if c % 5 == 0 {
            out += &format!("{GAP_MARKER}\n");
        }
        out += "\n";
    }
    out
}

// ---------------------------------------------------------------------------
// 1. Report parsing
// ---------------------------------------------------------------------------

fn bench_report_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("report_parsing");
    for classes in [10usize, 100] {
        let report = synthetic_report(classes, 4);
        group.bench_with_input(BenchmarkId::new("parse_report", classes), &report, |b, r| {
            b.iter(|| parse_report(black_box(r)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("build_index", classes), &report, |b, r| {
            b.iter(|| BytecodeIndex::from_report(black_box(r)).unwrap())
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// 2. Gap counting
// ---------------------------------------------------------------------------

fn bench_gap_counting(c: &mut Criterion) {
    let mut group = c.benchmark_group("gap_counting");
    let config = DecompilerConfig::default();
    for classes in [10usize, 100] {
        let index = BytecodeIndex::from_report(&synthetic_report(classes, 4)).unwrap();
        let source = synthetic_source(classes);
        group.bench_with_input(BenchmarkId::new("text_only", classes), &source, |b, s| {
            b.iter(|| count_gaps(black_box(s), None, &config))
        });
        group.bench_with_input(BenchmarkId::new("with_bytecode", classes), &source, |b, s| {
            b.iter(|| count_gaps(black_box(s), Some(&index), &config))
        });
        group.bench_with_input(BenchmarkId::new("find_items", classes), &source, |b, s| {
            b.iter(|| find_incomplete_items(black_box(s), Some(&index), &config))
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// 3. Constant recovery
// ---------------------------------------------------------------------------

fn bench_constant_recovery(c: &mut Criterion) {
    let mut group = c.benchmark_group("constant_recovery");
    let index = BytecodeIndex::from_report(&synthetic_report(100, 2)).unwrap();
    let source = synthetic_source(100);

    group.bench_function("find_missing", |b| {
        b.iter(|| find_missing_module_constants(black_box(&source), &index))
    });
    let missing = find_missing_module_constants(&source, &index);
    group.bench_function("recover", |b| b.iter(|| recover(&index, black_box(&missing))));

    let mapping = PyValue::Dict(
        (0..64)
            .map(|i| {
                (
                    PyValue::Int(i),
                    PyValue::Tuple(vec![PyValue::Str(format!("pad_{i}")), PyValue::Int(i * 3)]),
                )
            })
            .collect(),
    );
    group.bench_function("format_dict_64", |b| {
        b.iter(|| format_constant("PAD_MAP", black_box(&mapping)))
    });
    let rows = PyValue::Tuple(
        (0..32)
            .map(|r| PyValue::Tuple((0..8).map(|c| PyValue::Int(r * 8 + c)).collect()))
            .collect(),
    );
    group.bench_function("format_tuple_rows", |b| {
        b.iter(|| format_constant("GRID", black_box(&rows)))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_report_parsing,
    bench_gap_counting,
    bench_constant_recovery,
);
criterion_main!(benches);
