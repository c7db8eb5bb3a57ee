use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use fanout_core::{Backend, BatchConfig, BatchError, Submitter, Work};

use super::PoolBatch;

fn config(max_workers: usize) -> BatchConfig {
    BatchConfig::default().with_max_workers(max_workers)
}

#[test]
fn doubles_and_collects() {
    let seen = Arc::new(Mutex::new(HashSet::new()));
    let sink = seen.clone();
    let batch = PoolBatch::new(config(4)).on_result(move |v: u32| {
        sink.lock().unwrap().insert(v);
    });

    let metrics = batch
        .run(Work::plain(|x: u32| Ok::<_, Infallible>(x * 2)), vec![1, 2, 3])
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), HashSet::from([2, 4, 6]));
    assert_eq!(metrics.backend, Backend::Pool);
    assert_eq!(metrics.completed, 3);
}

#[test]
fn empty_batch_returns_immediately() {
    let batch: PoolBatch<()> = PoolBatch::new(config(2));
    let metrics = batch
        .run(Work::plain(|_: u8| Ok::<_, Infallible>(())), Vec::new())
        .unwrap();
    assert_eq!(metrics.submitted, 0);
}

#[test]
fn fast_tasks_do_not_end_seeding_early() {
    // Each task finishes long before the next one is seeded; the batch must
    // still wait for all of them.
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let batch: PoolBatch<()> = PoolBatch::new(config(2));

    let slow_tasks = (0..20).map(|i| {
        std::thread::sleep(Duration::from_millis(1));
        i
    });
    batch
        .run(
            Work::plain(move |_: u32| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(())
            }),
            slow_tasks,
        )
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 20);
}

#[test]
fn countdown_chain_runs_every_link() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let batch = PoolBatch::new(config(2)).on_result(move |v: u32| sink.lock().unwrap().push(v));

    batch
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
}

#[test]
fn parent_outstanding_until_it_returns() {
    // The parent submits its child first and keeps running afterwards; the
    // batch must not finish before the parent's own invocation does.
    let finished = Arc::new(Mutex::new(Vec::new()));
    let f = finished.clone();
    let batch: PoolBatch<()> = PoolBatch::new(config(4));

    batch
        .run(
            Work::with_submit(move |name: &'static str, submit: &Submitter<&'static str>| {
                if name == "parent" {
                    submit.submit("child").map_err(|e| e.to_string())?;
                    std::thread::sleep(Duration::from_millis(50));
                }
                f.lock().unwrap().push(name);
                Ok::<_, String>(())
            }),
            vec!["parent"],
        )
        .unwrap();

    let finished = finished.lock().unwrap();
    assert_eq!(finished.len(), 2);
    assert!(finished.contains(&"parent"));
    assert!(finished.contains(&"child"));
}

#[test]
fn failures_do_not_block_completion() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let batch = PoolBatch::new(config(3)).on_result(move |v: i32| sink.lock().unwrap().push(v));

    let metrics = batch
        .run(
            Work::plain(|x: i32| match x {
                2 => Err("bad input"),
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
fn callback_panic_counts_as_failure() {
    let batch = PoolBatch::new(config(2)).on_result(|v: u8| {
        if v == 1 {
            panic!("sink rejected one");
        }
    });

    let metrics = batch
        .run(Work::plain(|x: u8| Ok::<_, Infallible>(x)), vec![0, 1, 2])
        .unwrap();

    assert_eq!(metrics.failed, 1);
    assert_eq!(metrics.completed, 2);
}

#[test]
fn wide_fanout_counts_every_task() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let batch: PoolBatch<()> = PoolBatch::new(config(4));

    let metrics = batch
        .run(
            Work::with_submit(move |level: u32, submit: &Submitter<u32>| {
                c.fetch_add(1, Ordering::SeqCst);
                if level < 3 {
                    for _ in 0..5 {
                        submit.submit(level + 1).map_err(|e| e.to_string())?;
                    }
                }
                Ok::<_, String>(())
            }),
            vec![0, 0],
        )
        .unwrap();

    // Two roots, each a 5-ary tree of depth 3: 2 * (1 + 5 + 25 + 125)
    assert_eq!(calls.load(Ordering::SeqCst), 312);
    assert_eq!(metrics.submitted, 312);
}

#[test]
fn submitter_is_closed_after_run() {
    let kept: Arc<Mutex<Option<Submitter<u8>>>> = Arc::new(Mutex::new(None));
    let slot = kept.clone();
    let batch: PoolBatch<()> = PoolBatch::new(config(2));

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
    assert!(matches!(submitter.submit(2), Err(BatchError::Closed)));
}

#[test]
fn sequential_runs_are_isolated() {
    let batch: PoolBatch<usize> = PoolBatch::new(config(2));
    let a = batch
        .run(Work::plain(|x: usize| Ok::<_, Infallible>(x)), vec![1, 2, 3])
        .unwrap();
    let b = batch
        .run(Work::plain(|x: usize| Ok::<_, Infallible>(x)), vec![4])
        .unwrap();
    assert_eq!(a.submitted, 3);
    assert_eq!(b.submitted, 1);
}

#[test]
fn peak_workers_tracks_busy_pool_threads() {
    let batch: PoolBatch<()> = PoolBatch::new(config(4));

    let metrics = batch
        .run(
            Work::plain(|_: u32| {
                thread::sleep(Duration::from_millis(30));
                Ok::<_, Infallible>(())
            }),
            0..8,
        )
        .unwrap();

    assert!(metrics.peak_workers >= 2, "peak {}", metrics.peak_workers);
    assert!(metrics.peak_workers <= 4, "peak {}", metrics.peak_workers);
}

/// Submissions from outside the pool stop being accepted at quiescence.
#[test]
fn late_outside_submits_are_refused_once_idle() {
    type Outcome = (usize, Option<BatchError>);

    for _ in 0..20 {
        let ran = Arc::new(AtomicUsize::new(0));
        let feeder: Arc<Mutex<Option<JoinHandle<Outcome>>>> = Arc::new(Mutex::new(None));
        let (r, slot) = (ran.clone(), feeder.clone());
        let batch: PoolBatch<()> = PoolBatch::new(config(2));

        batch
            .run(
                Work::with_submit(move |x: u8, submit: &Submitter<u8>| {
                    r.fetch_add(1, Ordering::SeqCst);
                    if x == 0 {
                        let submit = submit.clone();
                        *slot.lock().unwrap() = Some(thread::spawn(move || {
                            let mut accepted = 0;
                            while accepted < 50_000 {
                                match submit.submit(1) {
                                    Ok(()) => accepted += 1,
                                    Err(e) => return (accepted, Some(e)),
                                }
                            }
                            (accepted, None)
                        }));
                    }
                    Ok::<_, Infallible>(())
                }),
                vec![0],
            )
            .unwrap();
        let ran_at_return = ran.load(Ordering::SeqCst);

        let handle = feeder.lock().unwrap().take().unwrap();
        let (accepted, refusal) = handle.join().unwrap();
        assert_eq!(ran_at_return, accepted + 1);
        if let Some(e) = refusal {
            assert!(matches!(e, BatchError::Closed));
        }

        thread::sleep(Duration::from_millis(20));
        assert_eq!(ran.load(Ordering::SeqCst), ran_at_return);
    }
}
