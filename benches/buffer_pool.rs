use std::sync::{Arc, Mutex};

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use framepool::{
    test_utils::generate_filename, BlockId, BufferPool, Clock, FileManager, LogManager,
    ManualClock, Page, PoolConfig, SharedFS, TestDir,
};

fn setup_pool(num_buffers: usize, crt_ms: u64) -> (Arc<BufferPool>, Arc<ManualClock>, TestDir) {
    let dir = TestDir::new(format!("/tmp/framepool_bench_{}", generate_filename()));
    let file_manager: SharedFS = Arc::new(Mutex::new(Box::new(
        FileManager::new(&dir, true).unwrap(),
    )));
    let log_manager = Arc::new(Mutex::new(
        LogManager::new(Arc::clone(&file_manager), "bench.log").unwrap(),
    ));
    let clock = Arc::new(ManualClock::new(0));
    let pool = Arc::new(BufferPool::with_clock(
        Arc::clone(&file_manager),
        log_manager,
        PoolConfig::new(num_buffers).with_crt_ms(crt_ms),
        Arc::clone(&clock) as Arc<dyn Clock>,
    ));
    precreate_blocks(&file_manager, "benchfile", 64);
    (pool, clock, dir)
}

fn precreate_blocks(file_manager: &SharedFS, file: &str, count: u64) {
    let mut file_manager = file_manager.lock().unwrap();
    for block_num in 0..count {
        let mut page = Page::new();
        page.set_int(0, block_num as i32);
        file_manager
            .write(&BlockId::new(file.to_string(), block_num), &page)
            .unwrap();
    }
}

/// Repeated pins of a working set that fits the pool: pure hit path.
fn bench_pin_hit(c: &mut Criterion) {
    let (pool, _clock, _dir) = setup_pool(64, PoolConfig::DEFAULT_CRT_MS);
    let blocks: Vec<BlockId> = (0..32)
        .map(|n| BlockId::new("benchfile".to_string(), n))
        .collect();
    //  warm the pool so the measured loop never touches disk
    for block_id in &blocks {
        let frame = pool.pin(block_id).unwrap();
        pool.unpin(&frame);
    }

    let mut next = 0usize;
    c.bench_function("pin_hit", |b| {
        b.iter(|| {
            let frame = pool.pin(&blocks[next % blocks.len()]).unwrap();
            pool.unpin(&frame);
            next += 1;
        })
    });
}

/// Cold pins into a fresh pool: miss path with free frames, no eviction.
fn bench_pin_cold_miss(c: &mut Criterion) {
    c.bench_function("pin_cold_miss", |b| {
        b.iter_batched(
            || setup_pool(32, PoolConfig::DEFAULT_CRT_MS),
            |(pool, _clock, _dir)| {
                for n in 0..32 {
                    let frame = pool.pin(&BlockId::new("benchfile".to_string(), n)).unwrap();
                    pool.unpin(&frame);
                }
            },
            BatchSize::SmallInput,
        )
    });
}

/// Pins over a working set much larger than the pool: every pin evicts.
fn bench_pin_evict(c: &mut Criterion) {
    let (pool, clock, _dir) = setup_pool(8, 0);
    let blocks: Vec<BlockId> = (0..64)
        .map(|n| BlockId::new("benchfile".to_string(), n))
        .collect();

    let mut next = 0usize;
    c.bench_function("pin_evict", |b| {
        b.iter(|| {
            //  step the clock past the (zero-length) correlated window so
            //  the previous iteration's block is immediately evictable
            clock.advance_ms(2);
            let frame = pool.pin(&blocks[next % blocks.len()]).unwrap();
            pool.unpin(&frame);
            next += 1;
        })
    });
}

criterion_group!(
    benches,
    bench_pin_hit,
    bench_pin_cold_miss,
    bench_pin_evict
);
criterion_main!(benches);
