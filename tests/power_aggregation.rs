use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use fimo_scheduler::module::{Module, ModuleContext, PowerCell, PowerStatus, SchedulingPolicy};
use fimo_scheduler::task::Task;
use fimo_scheduler::{EventKind, EventPayload, FrameworkManager, SchedulerConfig, TaskPayload};

static INIT: Once = Once::new();

fn init_logger() {
    INIT.call_once(pretty_env_logger::init);
}

/// A bare module that tracks its own power status the way the builtin
/// modules do, passing through the `powering_on`/`powering_off`
/// intermediate within its handler the way scenario 4 requires, and counts
/// how many `power_status_changed` broadcasts it has sent.
struct Toggle {
    name: &'static str,
    power: PowerCell,
    transitions: AtomicUsize,
}

impl Toggle {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            power: PowerCell::default(),
            transitions: AtomicUsize::new(0),
        })
    }
}

impl Module for Toggle {
    fn name(&self) -> &str {
        self.name
    }

    fn policy(&self) -> SchedulingPolicy {
        SchedulingPolicy::Concurrent
    }

    fn power_status(&self) -> PowerStatus {
        self.power.get()
    }

    fn handle_task(&self, _task: &Task, _ctx: ModuleContext<'_>) {}

    fn handle_event(&self, event: &EventPayload, ctx: ModuleContext<'_>) {
        let target = match event.kind {
            EventKind::PowerOn if self.power.get() != PowerStatus::On => Some(PowerStatus::On),
            EventKind::PowerOff if self.power.get() != PowerStatus::Off => Some(PowerStatus::Off),
            _ => None,
        };
        let Some(target) = target else { return };

        let transitional = if target == PowerStatus::On {
            PowerStatus::PoweringOn
        } else {
            PowerStatus::PoweringOff
        };
        self.power.set(transitional);
        self.power.set(target);
        self.transitions.fetch_add(1, Ordering::SeqCst);

        ctx.thread_manager.post(Task::new(
            self.name,
            "",
            TaskPayload::Event(EventPayload::with_subject(EventKind::PowerStatusChanged, self.name)),
        ));
    }
}

fn wait_for(deadline: std::time::Instant, mut check: impl FnMut() -> bool) -> bool {
    while std::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}

#[test]
fn aggregate_power_tracks_every_module() {
    init_logger();

    let a = Toggle::new("test.toggle.a");
    let b = Toggle::new("test.toggle.b");
    let c = Toggle::new("test.toggle.c");
    let modules: Vec<Arc<dyn Module>> = vec![a.clone(), b.clone(), c.clone()];

    let framework = FrameworkManager::new(SchedulerConfig::default());
    let aggregate_notifications = Arc::new(AtomicUsize::new(0));
    let counter = aggregate_notifications.clone();
    framework.set_power_changed_callback(move |_status| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    framework.run(move || modules, false);

    framework.power_up();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    assert!(
        wait_for(deadline, || framework.registry().aggregate_power() == PowerStatus::On),
        "registry never reached aggregate On"
    );
    // Give any extra (wrongly duplicated) events a moment to show up before
    // we assert exact counts.
    std::thread::sleep(Duration::from_millis(50));

    for toggle in [&a, &b, &c] {
        assert_eq!(
            toggle.transitions.load(Ordering::SeqCst),
            1,
            "module {} should have emitted exactly one power_status_changed",
            toggle.name
        );
    }
    assert_eq!(
        aggregate_notifications.load(Ordering::SeqCst),
        1,
        "registry should have emitted exactly one aggregate-level notification"
    );

    framework.power_down();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    assert!(
        wait_for(deadline, || framework.registry().aggregate_power() == PowerStatus::Off),
        "registry never reached aggregate Off"
    );
    std::thread::sleep(Duration::from_millis(50));

    for toggle in [&a, &b, &c] {
        assert_eq!(
            toggle.transitions.load(Ordering::SeqCst),
            2,
            "module {} should have emitted exactly one more power_status_changed after powering down",
            toggle.name
        );
    }
    assert_eq!(
        aggregate_notifications.load(Ordering::SeqCst),
        2,
        "registry should have emitted exactly one more aggregate-level notification after powering down"
    );
}
