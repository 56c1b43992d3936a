//! Throughput of the shared output ring, both sides in one process.

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use domctl_protocol::{ExecutorSide, IpcBlock, ManagerSide, STDOUT_BUFFER_SIZE};

fn ring_throughput(c: &mut Criterion) {
    let mut block = Box::new(IpcBlock::zeroed());
    let ptr: *mut IpcBlock = &mut *block;
    let manager = unsafe { ManagerSide::new(ptr) };
    let executor = unsafe { ExecutorSide::new(ptr) };

    let chunk = vec![0x55u8; 64];

    let mut group = c.benchmark_group("stdout_ring");
    group.throughput(Throughput::Bytes(chunk.len() as u64));

    group.bench_function("produce_consume_64", |b| {
        b.iter(|| {
            executor.write_stdout(&chunk);
            let mut drained = 0;
            while manager.pop_stdout().is_some() {
                drained += 1;
            }
            drained
        })
    });

    group.bench_function("fill_and_drain", |b| {
        let fill = vec![0xAAu8; STDOUT_BUFFER_SIZE - 1];
        b.iter(|| {
            executor.write_stdout(&fill);
            while manager.pop_stdout().is_some() {}
        })
    });

    group.finish();
}

criterion_group!(benches, ring_throughput);
criterion_main!(benches);
