use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use msgloop::BoundedRingQueue;
use std::{
    collections::VecDeque,
    sync::{Arc, Barrier, Mutex},
    thread,
};

const ITEMS_PER_PRODUCER: usize = 10_000;
const QUEUE_SIZE: usize = 1024;

/// The ring queue's baseline: a mutex-guarded deque with the same bound.
struct MutexQueue {
    inner: Mutex<VecDeque<usize>>,
    capacity: usize,
}

impl MutexQueue {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn try_enqueue(&self, value: usize) -> Result<(), usize> {
        let mut queue = self.inner.lock().unwrap();
        if queue.len() == self.capacity {
            return Err(value);
        }
        queue.push_back(value);
        Ok(())
    }

    fn try_dequeue(&self) -> Option<usize> {
        self.inner.lock().unwrap().pop_front()
    }
}

fn bench_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_single_thread");
    group.throughput(Throughput::Elements(QUEUE_SIZE as u64 - 1));

    group.bench_function("ring", |b| {
        let queue = BoundedRingQueue::<usize, QUEUE_SIZE>::new();
        b.iter(|| {
            for i in 0..QUEUE_SIZE - 1 {
                queue.try_enqueue(i).unwrap();
            }
            while let Some(v) = queue.try_dequeue() {
                black_box(v);
            }
        });
    });

    group.bench_function("mutex", |b| {
        let queue = MutexQueue::new(QUEUE_SIZE - 1);
        b.iter(|| {
            for i in 0..QUEUE_SIZE - 1 {
                queue.try_enqueue(i).unwrap();
            }
            while let Some(v) = queue.try_dequeue() {
                black_box(v);
            }
        });
    });

    group.finish();
}

/// `producers` threads push, the same number pop, until every item went through.
fn run_contended<E, D>(producers: usize, enqueue: E, dequeue: D)
where
    E: Fn(usize) -> bool + Send + Sync + 'static,
    D: Fn() -> Option<usize> + Send + Sync + 'static,
{
    let enqueue = Arc::new(enqueue);
    let dequeue = Arc::new(dequeue);
    let barrier = Arc::new(Barrier::new(producers * 2));
    let mut handles = Vec::with_capacity(producers * 2);

    for p in 0..producers {
        let enqueue = Arc::clone(&enqueue);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            for i in 0..ITEMS_PER_PRODUCER {
                while !enqueue(p * ITEMS_PER_PRODUCER + i) {
                    std::hint::spin_loop();
                }
            }
        }));
    }

    for _ in 0..producers {
        let dequeue = Arc::clone(&dequeue);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            let mut taken = 0;
            while taken < ITEMS_PER_PRODUCER {
                match dequeue() {
                    Some(v) => {
                        black_box(v);
                        taken += 1;
                    }
                    None => std::hint::spin_loop(),
                }
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
}

fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_contended");
    group.sample_size(20);

    for producers in [1, 2, 4] {
        group.throughput(Throughput::Elements((producers * ITEMS_PER_PRODUCER) as u64));

        group.bench_with_input(BenchmarkId::new("ring", producers), &producers, |b, &n| {
            b.iter(|| {
                let queue = Arc::new(BoundedRingQueue::<usize, QUEUE_SIZE>::new());
                let pusher = Arc::clone(&queue);
                run_contended(
                    n,
                    move |v| pusher.try_enqueue(v).is_ok(),
                    move || queue.try_dequeue(),
                );
            });
        });

        group.bench_with_input(BenchmarkId::new("mutex", producers), &producers, |b, &n| {
            b.iter(|| {
                let queue = Arc::new(MutexQueue::new(QUEUE_SIZE - 1));
                let pusher = Arc::clone(&queue);
                run_contended(
                    n,
                    move |v| pusher.try_enqueue(v).is_ok(),
                    move || queue.try_dequeue(),
                );
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_single_thread, bench_contended);
criterion_main!(benches);
