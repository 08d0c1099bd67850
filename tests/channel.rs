use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::Relaxed};
use std::sync::{Arc, Mutex};

use enoki::{Channel, Scheduler};

mod util;

#[test]
fn capacity_one_bounds_the_buffer() {
    util::trace_init();
    let scheduler = Scheduler::new().unwrap();
    let channel = Channel::new(&scheduler, 1);
    let done = Arc::new(AtomicBool::new(false));

    let done_flag = done.clone();
    scheduler.spawn(move || {
        channel.push(1);
        assert!(channel.try_push(2).is_err());
        assert_eq!(channel.pop(), 1);
        assert!(channel.try_push(2).is_ok());
        assert_eq!(channel.pop(), 2);
        done_flag.store(true, Relaxed);
    });

    util::drive(&scheduler);
    assert!(done.load(Relaxed));
}

#[test]
fn items_are_delivered_in_push_order() {
    const ITEMS: usize = 100;

    util::trace_init();
    let scheduler = Scheduler::new().unwrap();
    let channel = Channel::new(&scheduler, 10);
    let received = Arc::new(Mutex::new(Vec::new()));

    let tx = channel.clone();
    scheduler.spawn(move || {
        for i in 0..ITEMS {
            tx.push(i);
        }
    });

    let rx = channel.clone();
    let received_into = received.clone();
    scheduler.spawn(move || {
        for _ in 0..ITEMS {
            received_into.lock().unwrap().push(rx.pop());
        }
    });

    util::drive(&scheduler);

    let received = received.lock().unwrap();
    assert_eq!(*received, (0..ITEMS).collect::<Vec<_>>());
}

#[test]
fn rendezvous_push_waits_for_a_pop() {
    util::trace_init();
    let scheduler = Scheduler::new().unwrap();
    let channel = Channel::new(&scheduler, 0);
    let pushed = Arc::new(AtomicBool::new(false));
    let popped = Arc::new(AtomicBool::new(false));

    let tx = channel.clone();
    let pushed_flag = pushed.clone();
    scheduler.spawn(move || {
        tx.push("x");
        pushed_flag.store(true, Relaxed);
    });

    // the pusher parks: nothing may be buffered in a rendezvous channel.
    util::run_until_idle(&scheduler);
    assert!(!pushed.load(Relaxed));
    assert_eq!(scheduler.runnable_task_count(), 0);
    assert_eq!(scheduler.task_count(), 1);

    let rx = channel.clone();
    let popped_flag = popped.clone();
    scheduler.spawn(move || {
        assert_eq!(rx.pop(), "x");
        popped_flag.store(true, Relaxed);
    });

    util::drive(&scheduler);
    assert!(pushed.load(Relaxed));
    assert!(popped.load(Relaxed));
}

#[test]
fn try_pop_reports_empty_without_blocking() {
    util::trace_init();
    let scheduler = Scheduler::new().unwrap();

    let rendezvous: Channel<i32> = Channel::new(&scheduler, 0);
    assert_eq!(rendezvous.try_pop(), None);

    let buffered: Channel<i32> = Channel::new(&scheduler, 3);
    assert_eq!(buffered.try_pop(), None);

    let tx = buffered.clone();
    scheduler.spawn(move || tx.push(11));
    util::drive(&scheduler);

    assert_eq!(buffered.try_pop(), Some(11));
    assert_eq!(buffered.try_pop(), None);
}

#[test]
fn many_producers_one_consumer_across_workers() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 250;
    const WORKERS: usize = 2;

    util::trace_init();
    let scheduler = Scheduler::new().unwrap();
    let channel = Channel::new(&scheduler, 16);
    let sum = Arc::new(AtomicUsize::new(0));

    for _ in 0..PRODUCERS {
        let tx = channel.clone();
        scheduler.spawn(move || {
            for i in 0..PER_PRODUCER {
                tx.push(i);
            }
        });
    }

    let rx = channel.clone();
    let total = sum.clone();
    scheduler.spawn(move || {
        for _ in 0..PRODUCERS * PER_PRODUCER {
            total.fetch_add(rx.pop(), Relaxed);
        }
    });

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

    let expected = PRODUCERS * (0..PER_PRODUCER).sum::<usize>();
    assert_eq!(sum.load(Relaxed), expected);
}
