//! Control block and bank access benchmarks

use criterion::{Criterion, criterion_group, criterion_main};
use mbscript_common::shm::layout::{BankCounts, BankKind, RegionLayout};
use mbscript_shared_memory::{ChannelName, ScriptChannel, get_current_pid};
use std::hint::black_box;

fn open_bench_channel(tag: &str) -> ScriptChannel {
    let counts = BankCounts::new(1024, 1024, 1024, 1024);
    let layout = RegionLayout::new(counts).unwrap();
    let name = ChannelName::for_device("mbscript.bench", tag, &get_current_pid().to_string()).unwrap();
    let channel = ScriptChannel::open(&name, layout.region_size()).unwrap();
    channel.control().host_prepare(counts);
    channel
}

/// Benchmark the per-tick control block traffic
fn bench_control_block(c: &mut Criterion) {
    let channel = open_bench_channel("control");
    let control = channel.control();

    c.bench_function("host_bump_cycle", |b| {
        b.iter(|| black_box(control.host_bump_cycle()));
    });

    c.bench_function("is_running", |b| {
        b.iter(|| black_box(control.is_running()));
    });
}

/// Benchmark bank element access
fn bench_bank_access(c: &mut Criterion) {
    let channel = open_bench_channel("bank");
    let coils = channel.bank(BankKind::Coils).unwrap();
    let holding = channel.bank(BankKind::HoldingRegisters).unwrap();

    c.bench_function("set_bit", |b| {
        let mut i = 0usize;
        b.iter(|| {
            coils.set_bit(i % 1024, i % 2 == 0).unwrap();
            i += 1;
        });
    });

    c.bench_function("register_read", |b| {
        b.iter(|| black_box(holding.register(black_box(512)).unwrap()));
    });

    let data = vec![0xAAu8; 2048];
    c.bench_function("write_bytes_2k", |b| {
        b.iter(|| holding.write_bytes(0, black_box(&data)).unwrap());
    });
}

criterion_group!(benches, bench_control_block, bench_bank_access);
criterion_main!(benches);
