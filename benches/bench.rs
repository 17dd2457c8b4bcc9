use criterion::{black_box, criterion_group, criterion_main, Criterion};
use crossbeam_utils::thread;
use entitylocker::{EntityLocker, Fairness, Locker, LockerConfig};
use std::sync::Mutex;
use std::time::Duration;

const FIFO: LockerConfig = LockerConfig {
    fairness: Fairness::Fifo,
};

pub fn single_thread_lock_unlock(c: &mut Criterion) {
    let mut g = c.benchmark_group("single thread lock unlock");
    g.bench_function("std Mutex", |b| {
        let mutex = Mutex::new(());
        b.iter(|| {
            let _g = mutex.lock().unwrap();
        })
    });
    g.bench_function("EntityLocker (same key)", |b| {
        let locker = EntityLocker::new();
        b.iter(|| {
            let _g = locker.lock(black_box(3));
        })
    });
    g.bench_function("EntityLocker (same key, reentrant)", |b| {
        let locker = EntityLocker::new();
        let _outer = locker.lock(3);
        b.iter(|| {
            let _g = locker.lock(black_box(3));
        })
    });
    g.bench_function("EntityLocker (different key)", |b| {
        let locker = EntityLocker::new();
        let mut i = 0;
        b.iter(|| {
            i += 1;
            let _g = locker.lock(black_box(i));
        })
    });
    g.bench_function("EntityLocker with_lock_timeout", |b| {
        let locker = EntityLocker::new();
        b.iter(|| {
            locker
                .with_lock_timeout(black_box(3), Duration::from_secs(1), |id| *id)
                .unwrap()
        })
    });
    g.finish();
}

fn spawn_threads(num: usize, func: impl Fn(usize) + Send + Sync) {
    thread::scope(|s| {
        for thread_index in 0..num {
            let func = &func;
            s.spawn(move |_| func(thread_index));
        }
    })
    .unwrap();
}

pub fn multi_thread_lock_unlock(c: &mut Criterion) {
    const NUM_THREADS: usize = 50;
    const NUM_LOCKS_PER_THREAD: usize = 1000;

    let mut g = c.benchmark_group("multi thread lock unlock");
    g.bench_function("std Mutex", |b| {
        let mutex = Mutex::new(());
        b.iter(|| {
            spawn_threads(NUM_THREADS, |_| {
                for _ in 0..NUM_LOCKS_PER_THREAD {
                    let _g = mutex.lock().unwrap();
                }
            });
        })
    });
    for (name, config) in [("barging", LockerConfig::default()), ("fifo", FIFO)] {
        g.bench_function(format!("EntityLocker {} (same key)", name), |b| {
            let locker = EntityLocker::with_config(config);
            b.iter(|| {
                spawn_threads(NUM_THREADS, |_| {
                    for _ in 0..NUM_LOCKS_PER_THREAD {
                        let _g = locker.lock(black_box(3));
                    }
                });
            })
        });
        g.bench_function(format!("EntityLocker {} (different key)", name), |b| {
            let locker = EntityLocker::with_config(config);
            b.iter(|| {
                spawn_threads(NUM_THREADS, |thread_index| {
                    for _ in 0..NUM_LOCKS_PER_THREAD {
                        let _g = locker.lock(black_box(thread_index));
                    }
                });
            })
        });
    }
    g.finish();
}

criterion_group!(benches, single_thread_lock_unlock, multi_thread_lock_unlock,);
criterion_main!(benches);
