#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

use color_eyre::eyre;
use criterion::{black_box, Criterion};
use socachesim::{
    config::Config,
    trace::{Op, Program},
    Platform,
};

const COUNTER: u64 = 0x100;

fn atomic_increments(num_procs: usize, increments: usize) -> Vec<Program> {
    (0..num_procs)
        .map(|_| Program {
            ops: vec![Op::AtomicIncrement { addr: COUNTER }],
            repeat: increments,
        })
        .collect()
}

fn streaming_writes(num_procs: usize, words: u64) -> Vec<Program> {
    (0..num_procs as u64)
        .map(|proc| {
            let base = 0x1000 * (proc + 1);
            Program::new((0..words).map(|word| Op::Write {
                addr: base + word * 4,
                value: word as u32,
                be: 0xF,
            }))
        })
        .collect()
}

pub fn run(num_procs: usize, programs: Vec<Program>) -> eyre::Result<u64> {
    let config = Config {
        num_procs,
        ..Config::default()
    };
    let mut platform = Platform::new(config, programs, 1)?;
    let cycles = platform.run(1_000_000)?;
    Ok(cycles)
}

pub fn contention_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("contention");
    group.sample_size(10);
    group.sampling_mode(criterion::SamplingMode::Flat);

    for num_procs in [2, 4, 8] {
        group.bench_function(format!("atomic_increment/{num_procs}x20"), |b| {
            b.iter(|| run(num_procs, black_box(atomic_increments(num_procs, 20))));
        });
    }
}

pub fn write_buffer_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_buffer");
    group.sample_size(10);
    group.sampling_mode(criterion::SamplingMode::Flat);

    group.bench_function("streaming_writes/4x256", |b| {
        b.iter(|| run(4, black_box(streaming_writes(4, 256))));
    });
}

criterion::criterion_group!(benches, contention_benchmark, write_buffer_benchmark);
criterion::criterion_main!(benches);
