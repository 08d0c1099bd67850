use enoki::Scheduler;

pub fn trace_init() {
    use tracing_subscriber::filter::LevelFilter;
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_test_writer()
        .try_init();
}

/// Drives `scheduler` on the calling thread until no tasks remain.
pub fn drive(scheduler: &Scheduler) {
    for _ in 0..1_000_000 {
        if scheduler.is_empty() {
            return;
        }
        scheduler.run();
    }
    panic!("scheduler failed to drain: {scheduler:?}");
}

/// Runs `scheduler` until no runnable tasks remain; parked tasks stay
/// parked.
#[allow(dead_code)]
pub fn run_until_idle(scheduler: &Scheduler) {
    while scheduler.run() > 0 {}
}
