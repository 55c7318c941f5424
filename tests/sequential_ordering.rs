use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use fimo_scheduler::module::{Module, ModuleContext, PowerStatus, SchedulingPolicy};
use fimo_scheduler::task::Task;
use fimo_scheduler::{EventPayload, FrameworkManager, SchedulerConfig, TaskPayload};

static INIT: Once = Once::new();

fn init_logger() {
    INIT.call_once(pretty_env_logger::init);
}

/// Records the order in which tasks reach it. Its `handle_task` is the thing
/// under test - everything else is plumbing.
struct Recorder {
    seen: Mutex<Vec<u32>>,
}

impl Module for Recorder {
    fn name(&self) -> &str {
        "test.recorder"
    }

    fn policy(&self) -> SchedulingPolicy {
        SchedulingPolicy::Sequential
    }

    fn power_status(&self) -> PowerStatus {
        PowerStatus::On
    }

    fn handle_task(&self, task: &Task, _ctx: ModuleContext<'_>) {
        if let TaskPayload::Normal(bytes) = &task.payload {
            let n = u32::from_le_bytes(bytes.as_slice().try_into().unwrap());
            self.seen.lock().unwrap().push(n);
        }
    }

    fn handle_event(&self, _event: &EventPayload, _ctx: ModuleContext<'_>) {}
}

#[test]
fn sequential_module_preserves_post_order() {
    init_logger();

    let recorder = Arc::new(Recorder {
        seen: Mutex::new(Vec::new()),
    });
    let framework = FrameworkManager::new(SchedulerConfig::default());
    let for_run = recorder.clone();
    framework.run(|| vec![for_run as Arc<dyn Module>], false);

    const N: u32 = 10_000;
    for i in 0..N {
        framework.thread_manager().post(Task::new(
            "test",
            "test.recorder",
            TaskPayload::Normal(i.to_le_bytes().to_vec()),
        ));
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        if recorder.seen.lock().unwrap().len() >= N as usize {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "recorder did not drain in time");
        std::thread::sleep(Duration::from_millis(5));
    }

    let recorded = recorder.seen.lock().unwrap();
    assert_eq!(recorded.len(), N as usize);
    for (i, value) in recorded.iter().enumerate() {
        assert_eq!(*value, i as u32, "sequential module reordered task {i}");
    }
}
