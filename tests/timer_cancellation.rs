use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use fimo_scheduler::{FrameworkManager, SchedulerConfig};

static INIT: Once = Once::new();

fn init_logger() {
    INIT.call_once(pretty_env_logger::init);
}

#[test]
fn repeating_timer_stops_after_self_unregister() {
    init_logger();

    let framework = FrameworkManager::new(SchedulerConfig::default());
    framework.run(Vec::new, false);

    let count = Arc::new(AtomicUsize::new(0));
    let timer = framework.timer().clone();
    let timer_for_callback = timer.clone();
    let count_for_callback = count.clone();

    timer.register(
        move |fired_id, _name| {
            let fired = count_for_callback.fetch_add(1, Ordering::SeqCst) + 1;
            if fired >= 5 {
                timer_for_callback.unregister(fired_id);
            }
        },
        Duration::from_millis(10),
        0,
        "test.repeat",
        None,
    );

    std::thread::sleep(Duration::from_millis(500));
    let after_cancel = count.load(Ordering::SeqCst);
    assert!(
        after_cancel >= 5,
        "timer should have fired at least 5 times, got {after_cancel}"
    );

    std::thread::sleep(Duration::from_millis(300));
    let settled = count.load(Ordering::SeqCst);
    assert!(
        settled - after_cancel <= 1,
        "timer kept firing after unregister: {after_cancel} -> {settled}"
    );
}
