use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use std::sync::{Arc, Mutex};

use enoki::{Config, Scheduler, TaskId};

mod util;

#[test]
fn spawned_tasks_run_to_completion() {
    util::trace_init();
    let scheduler = Scheduler::new().unwrap();
    let completed = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        let completed = completed.clone();
        scheduler.spawn(move || {
            completed.fetch_add(1, Relaxed);
        });
    }
    assert_eq!(scheduler.task_count(), 10);
    assert_eq!(scheduler.runnable_task_count(), 10);

    util::drive(&scheduler);

    assert_eq!(completed.load(Relaxed), 10);
    assert_eq!(scheduler.task_count(), 0);
    assert!(scheduler.is_empty());
}

#[test]
fn yield_round_robins_between_tasks() {
    util::trace_init();
    let scheduler = Scheduler::new().unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let recorded = order.clone();
    let handle = scheduler.clone();
    scheduler.spawn(move || {
        recorded.lock().unwrap().push(1);
        handle.yield_now();
        recorded.lock().unwrap().push(3);
    });

    let recorded = order.clone();
    let handle = scheduler.clone();
    scheduler.spawn(move || {
        recorded.lock().unwrap().push(2);
        handle.yield_now();
        recorded.lock().unwrap().push(4);
    });

    util::drive(&scheduler);

    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3, 4]);
}

#[test]
fn run_respects_the_dispatch_fairness_bound() {
    util::trace_init();
    let scheduler = Scheduler::with_config(Config {
        chunk_count: 2,
        max_chunk_size: 3,
        ..Config::default()
    })
    .unwrap();

    for _ in 0..10 {
        scheduler.spawn(|| {});
    }

    // clamp(10 / 2, 1, 3) = 3
    assert_eq!(scheduler.run(), 3);
    // clamp(7 / 2, 1, 3) = 3
    assert_eq!(scheduler.run(), 3);
    assert_eq!(scheduler.run(), 3);
    // one task left: clamp(1 / 2, 1, 3) = 1
    assert_eq!(scheduler.run(), 1);
    assert!(scheduler.is_empty());
}

#[test]
fn a_large_chunk_count_dispatches_one_task_per_run() {
    util::trace_init();
    let scheduler = Scheduler::with_config(Config {
        chunk_count: 1024,
        ..Config::default()
    })
    .unwrap();

    for _ in 0..5 {
        scheduler.spawn(|| {});
    }

    for remaining in (1..=5).rev() {
        assert_eq!(scheduler.task_count(), remaining);
        assert_eq!(scheduler.run(), 1);
    }
}

#[test]
fn task_ids_and_debug_info() {
    util::trace_init();
    let scheduler = Scheduler::new().unwrap();

    assert!(!scheduler.is_coroutine());
    assert_eq!(scheduler.current_task_id(), TaskId::NONE);
    assert_eq!(scheduler.current_task_debug_info(), None);

    let handle = scheduler.clone();
    scheduler.spawn(move || {
        assert!(handle.is_coroutine());
        assert_eq!(handle.current_task_id().as_u64(), 1);
        assert_eq!(handle.current_task_debug_info().unwrap(), "task 1");

        handle.set_current_task_debug_info("fetcher");
        assert_eq!(
            handle.current_task_debug_info().unwrap(),
            "fetcher (task 1)"
        );
    });

    let handle = scheduler.clone();
    scheduler.spawn(move || {
        assert_eq!(handle.current_task_id().as_u64(), 2);
    });

    util::drive(&scheduler);
    assert_eq!(scheduler.current_task_id(), TaskId::NONE);
}

#[test]
fn many_tasks_across_worker_threads() {
    const TASKS: usize = 200;
    const WORKERS: usize = 4;

    util::trace_init();
    let scheduler = Scheduler::new().unwrap();
    let completed = Arc::new(AtomicUsize::new(0));

    for _ in 0..TASKS {
        let completed = completed.clone();
        let handle = scheduler.clone();
        scheduler.spawn(move || {
            handle.yield_now();
            completed.fetch_add(1, Relaxed);
            handle.yield_now();
        });
    }

    let workers: Vec<_> = (0..WORKERS)
        .map(|_| {
            let scheduler = scheduler.clone();
            std::thread::spawn(move || scheduler.run_loop())
        })
        .collect();

    while !scheduler.is_empty() {
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    scheduler.stop();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(completed.load(Relaxed), TASKS);
}

#[test]
fn a_panicking_task_does_not_take_down_the_worker() {
    util::trace_init();
    let scheduler = Scheduler::new().unwrap();
    let survived = Arc::new(AtomicUsize::new(0));

    scheduler.spawn(|| panic!("boom"));
    let survived_by = survived.clone();
    scheduler.spawn(move || {
        survived_by.fetch_add(1, Relaxed);
    });

    util::drive(&scheduler);
    assert_eq!(survived.load(Relaxed), 1);
}
