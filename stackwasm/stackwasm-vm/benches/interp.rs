use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use stackwasm_vm::{Module, Value};

const PROGRAMS: &str = r#"(module
  (func $fib (export "fib") (param i32) (result i32)
    (if (result i32) (i32.lt_s (local.get 0) (i32.const 2))
      (then (local.get 0))
      (else (i32.add
        (call $fib (i32.sub (local.get 0) (i32.const 1)))
        (call $fib (i32.sub (local.get 0) (i32.const 2)))))))
  (func (export "sum") (param i32) (result i64) (local i64)
    (block $done
      (loop $next
        (br_if $done (i32.eqz (local.get 0)))
        (local.set 1 (i64.add (local.get 1) (i64.extend_i32_u (local.get 0))))
        (local.set 0 (i32.sub (local.get 0) (i32.const 1)))
        (br $next)))
    (local.get 1)))"#;

fn load() -> Module {
    let bytes = wat::parse_str(PROGRAMS).expect("benchmark module parses");
    Module::from_bytes(&bytes).expect("benchmark module decodes")
}

fn bench_fib(c: &mut Criterion) {
    let mut module = load();
    let mut group = c.benchmark_group("fib");
    for &n in &[10i32, 15, 20] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let r = module.call("fib", &[Value::I32(black_box(n))]).unwrap();
                black_box(r);
            })
        });
    }
    group.finish();
}

fn bench_counted_loop(c: &mut Criterion) {
    let mut module = load();
    let mut group = c.benchmark_group("sum_loop");
    for &n in &[1_000u32, 10_000, 100_000] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let r = module.call("sum", &[Value::I32(black_box(n as i32))]).unwrap();
                black_box(r);
            })
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let bytes = wat::parse_str(PROGRAMS).expect("benchmark module parses");
    c.bench_function("decode", |b| {
        b.iter(|| {
            let module = Module::from_bytes(black_box(&bytes)).unwrap();
            black_box(module.jump_table(0).unwrap().ifs.len());
        })
    });
}

criterion_group!(benches, bench_fib, bench_counted_loop, bench_decode);
criterion_main!(benches);
