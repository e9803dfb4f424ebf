use criterion::{Criterion, black_box, criterion_group, criterion_main};
use netpool::{Element, MetaInfo, PoolError, PoolOption, SimplePool};
use tokio_util::sync::CancellationToken;

struct Counter {
    meta: MetaInfo,
    value: u64,
}

impl Element for Counter {
    fn meta_info(&self) -> &MetaInfo {
        &self.meta
    }
}

fn counter_pool(option: PoolOption) -> SimplePool<Counter> {
    SimplePool::new(option, |_ctx: CancellationToken| async {
        Ok::<_, PoolError>(Counter {
            meta: MetaInfo::new(),
            value: 0,
        })
    })
}

fn bench_get_put(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let pool = counter_pool(PoolOption::default());
    let ctx = CancellationToken::new();

    c.bench_function("get_put_uncontended", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let mut counter = pool.get(&ctx).await.unwrap();
                counter.value += 1;
                black_box(counter.value);
                pool.put(counter);
            })
        })
    });
}

fn bench_get_put_contended(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();
    let pool = counter_pool(PoolOption::new().with_max_open(4));

    c.bench_function("get_put_contended_8_tasks", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let tasks: Vec<_> = (0..8)
                    .map(|_| {
                        let pool = pool.clone();
                        tokio::spawn(async move {
                            let ctx = CancellationToken::new();
                            for _ in 0..16 {
                                let counter = pool.get(&ctx).await.unwrap();
                                pool.put(counter);
                            }
                        })
                    })
                    .collect();
                for task in tasks {
                    task.await.unwrap();
                }
            })
        })
    });
}

criterion_group!(benches, bench_get_put, bench_get_put_contended);
criterion_main!(benches);
