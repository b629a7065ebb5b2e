//! Benchmarks for the full driver pipeline.
//!
//! - Size-based: contracts with a growing number of functions
//! - Standard library: the bundled units behind `import "std"`
//! - Front end only: parse, resolve and check without code generation
//!
//! ```bash
//! cargo bench --bench compile_benchmarks
//! ```

use covenant::{Compiler, CompilerOptions};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::fmt::Write;
use std::hint::black_box;

/// A contract with `functions` public functions, each calling the previous
/// one.
fn generated_contract(functions: usize) -> String {
    let mut source = String::from("contract Generated {\n    uint256 total;\n");
    for index in 0..functions {
        let _ = writeln!(
            source,
            "    function f{index}(uint256 v) public returns (uint256) {{"
        );
        source.push_str("        total = total + v;\n");
        if index == 0 {
            source.push_str("        return total;\n    }\n");
        } else {
            let _ = writeln!(source, "        return f{}(v + 1);\n    }}", index - 1);
        }
    }
    source.push_str("}\n");
    source
}

fn compiler() -> Compiler {
    Compiler::with_options(CompilerOptions::new().with_standard_sources(false))
}

fn size_based_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile/functions");
    for functions in [1, 10, 50, 200] {
        let source = generated_contract(functions);
        group.throughput(Throughput::Bytes(source.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(functions), &source, |b, source| {
            b.iter(|| {
                let mut compiler = compiler();
                compiler.add_source("generated", black_box(source.as_str()), false);
                compiler.compile().unwrap();
                black_box(compiler.object("Generated").unwrap().bytecode.len())
            });
        });
    }
    group.finish();
}

fn standard_library_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile/standard_library");
    let source =
        "import \"std\";\ncontract Wallet is mortal { function deposit() public payable {} }";
    group.bench_function("wallet", |b| {
        b.iter(|| {
            let mut compiler = Compiler::new();
            compiler.add_source("", black_box(source), false);
            compiler.compile().unwrap();
            black_box(compiler.contract_code_hash("").unwrap())
        });
    });
    group.finish();
}

fn front_end_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse/functions");
    let source = generated_contract(200);
    group.throughput(Throughput::Bytes(source.len() as u64));
    group.bench_function("200", |b| {
        b.iter(|| {
            let mut compiler = compiler();
            compiler.add_source("generated", black_box(source.as_str()), false);
            compiler.parse().unwrap();
            black_box(compiler.contract_names().unwrap().len())
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    size_based_benchmarks,
    standard_library_benchmarks,
    front_end_benchmarks
);

criterion_main!(benches);
