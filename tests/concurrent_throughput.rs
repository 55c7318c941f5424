use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use fimo_scheduler::{FrameworkManager, SchedulerConfig};

static INIT: Once = Once::new();

fn init_logger() {
    INIT.call_once(pretty_env_logger::init);
}

#[test]
fn concurrent_tasks_all_run_exactly_once() {
    init_logger();

    let framework = FrameworkManager::new(SchedulerConfig::default());
    framework.run(Vec::new, false);

    const N: usize = 1_000;
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..N {
        let counter = counter.clone();
        framework
            .thread_manager()
            .post_closure("test", move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while counter.load(Ordering::SeqCst) < N && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(counter.load(Ordering::SeqCst), N);
}
