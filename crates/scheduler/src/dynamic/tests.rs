use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fanout_core::{Backend, BatchConfig, BatchError, Submitter, Work};

use super::ThreadBatch;

fn config(max_workers: usize) -> BatchConfig {
    BatchConfig::default()
        .with_max_workers(max_workers)
        .with_poll_interval(Duration::from_millis(20))
}

#[test]
fn doubles_and_collects() {
    let seen = Arc::new(Mutex::new(HashSet::new()));
    let sink = seen.clone();
    let batch = ThreadBatch::new(config(4)).on_result(move |v: u32| {
        sink.lock().unwrap().insert(v);
    });

    let metrics = batch
        .run(Work::plain(|x: u32| Ok::<_, Infallible>(x * 2)), vec![1, 2, 3])
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), HashSet::from([2, 4, 6]));
    assert_eq!(metrics.backend, Backend::Dynamic);
    assert_eq!(metrics.submitted, 3);
    assert_eq!(metrics.completed, 3);
}

#[test]
fn invokes_work_once_per_task() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let batch: ThreadBatch<()> = ThreadBatch::new(config(8));

    batch
        .run(
            Work::plain(move |_: usize| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(())
            }),
            0..200,
        )
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 200);
}

#[test]
fn countdown_chain_runs_every_link() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let batch = ThreadBatch::new(config(2)).on_result(move |v: u32| sink.lock().unwrap().push(v));

    let metrics = batch
        .run(
            Work::with_submit(|x: u32, submit: &Submitter<u32>| {
                if x > 0 {
                    submit.submit(x - 1).map_err(|e| e.to_string())?;
                }
                Ok::<_, String>(x)
            }),
            vec![3],
        )
        .unwrap();

    let mut seen = seen.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2, 3]);
    assert_eq!(metrics.submitted, 4);
}

#[test]
fn deep_chain_with_single_worker() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let batch: ThreadBatch<()> = ThreadBatch::new(config(1));

    batch
        .run(
            Work::with_submit(move |depth: usize, submit: &Submitter<usize>| {
                c.fetch_add(1, Ordering::SeqCst);
                if depth < 500 {
                    submit.submit(depth + 1).map_err(|e| e.to_string())?;
                }
                Ok::<_, String>(())
            }),
            vec![1],
        )
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 500);
}

#[test]
fn worker_count_never_exceeds_cap() {
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));
    let (a, m) = (active.clone(), max_active.clone());
    let batch: ThreadBatch<()> = ThreadBatch::new(config(3));

    let metrics = batch
        .run(
            Work::with_submit(move |fanout: u32, submit: &Submitter<u32>| {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                m.fetch_max(now, Ordering::SeqCst);
                if fanout > 0 {
                    for _ in 0..4 {
                        submit.submit(fanout - 1).map_err(|e| e.to_string())?;
                    }
                }
                std::thread::sleep(Duration::from_millis(2));
                a.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(())
            }),
            vec![3, 3, 3, 3],
        )
        .unwrap();

    // 4 roots, each a complete 4-ary tree of depth 3: 4 * (1 + 4 + 16 + 64)
    assert_eq!(metrics.submitted, 340);
    assert!(metrics.peak_workers <= 3, "peak {}", metrics.peak_workers);
    assert!(max_active.load(Ordering::SeqCst) <= 3);
}

#[test]
fn failures_are_discarded() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let batch = ThreadBatch::new(config(4)).on_result(move |v: i32| sink.lock().unwrap().push(v));

    let metrics = batch
        .run(
            Work::plain(|x: i32| match x {
                2 => Err(format!("refusing {x}")),
                3 => panic!("task {x} exploded"),
                _ => Ok(x),
            }),
            vec![1, 2, 3, 4],
        )
        .unwrap();

    let mut seen = seen.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(seen, vec![1, 4]);
    assert_eq!(metrics.completed, 2);
    assert_eq!(metrics.failed, 2);
}

#[test]
fn callback_panic_does_not_stall_batch() {
    let batch = ThreadBatch::new(config(2)).on_result(|v: u8| {
        if v == 0 {
            panic!("sink rejected zero");
        }
    });

    let metrics = batch
        .run(Work::plain(|x: u8| Ok::<_, Infallible>(x)), vec![0, 1, 2])
        .unwrap();

    assert_eq!(metrics.failed, 1);
    assert_eq!(metrics.completed, 2);
}

#[test]
fn empty_batch_starts_no_workers() {
    let batch: ThreadBatch<()> = ThreadBatch::new(config(4));
    let metrics = batch
        .run(Work::plain(|_: u8| Ok::<_, Infallible>(())), Vec::new())
        .unwrap();

    assert_eq!(metrics.submitted, 0);
    assert_eq!(metrics.peak_workers, 0);
}

#[test]
fn submitter_is_closed_after_run() {
    let kept: Arc<Mutex<Option<Submitter<u8>>>> = Arc::new(Mutex::new(None));
    let slot = kept.clone();
    let batch: ThreadBatch<()> = ThreadBatch::new(config(2));

    batch
        .run(
            Work::with_submit(move |_: u8, submit: &Submitter<u8>| {
                *slot.lock().unwrap() = Some(submit.clone());
                Ok::<_, Infallible>(())
            }),
            vec![1],
        )
        .unwrap();

    let submitter = kept.lock().unwrap().take().unwrap();
    assert!(matches!(submitter.submit(9), Err(BatchError::Closed)));
}

#[test]
fn sequential_runs_are_isolated() {
    let batch = ThreadBatch::new(config(3));
    let first = Arc::new(AtomicUsize::new(0));
    let f = first.clone();

    let a = batch
        .run(
            Work::plain(move |x: usize| {
                f.fetch_add(x, Ordering::SeqCst);
                Ok::<_, Infallible>(())
            }),
            vec![1, 2, 3],
        )
        .unwrap();
    let b = batch
        .run(Work::plain(|_: usize| Ok::<_, Infallible>(())), vec![10, 20])
        .unwrap();

    assert_eq!(first.load(Ordering::SeqCst), 6);
    assert_eq!(a.submitted, 3);
    assert_eq!(b.submitted, 2);
}

#[test]
fn zero_workers_falls_back_to_default() {
    let batch: ThreadBatch<()> = ThreadBatch::new(config(0));
    let metrics = batch
        .run(Work::plain(|_: u8| Ok::<_, Infallible>(())), vec![1, 2, 3])
        .unwrap();

    assert!(metrics.peak_workers >= 1);
    assert!(metrics.peak_workers <= fanout_core::default_max_workers());
}
