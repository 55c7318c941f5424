use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use fimo_scheduler::builtin::TaskHandler;
use fimo_scheduler::module::{Module, ModuleContext, PowerStatus, SchedulingPolicy};
use fimo_scheduler::task::Task;
use fimo_scheduler::{EventPayload, FrameworkManager, SchedulerConfig, TaskPayload};

static INIT: Once = Once::new();

fn init_logger() {
    INIT.call_once(pretty_env_logger::init);
}

/// A handler-routed module: every task it receives is re-posted by the
/// thread manager onto its handler's helper before landing here. Two
/// `Routed` instances sharing the same `TaskHandler` land on the same
/// single-threaded helper, so posts to both serialize against each other.
struct Routed {
    name: String,
    handler: Arc<TaskHandler>,
    seen: Mutex<Vec<u32>>,
}

impl Routed {
    fn new(name: &str, handler: Arc<TaskHandler>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            handler,
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl Module for Routed {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> SchedulingPolicy {
        SchedulingPolicy::HandlerRouted
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

    fn handler_helper_name(&self) -> Option<&str> {
        Some(self.handler.helper_name())
    }
}

#[test]
fn handler_routed_modules_keep_their_own_order() {
    init_logger();

    let framework = FrameworkManager::new(SchedulerConfig::default());
    let handler = Arc::new(TaskHandler::new(framework.registry(), framework.thread_manager()).expect("helper registration"));
    let a = Routed::new("test.routed.a", handler.clone());
    let b = Routed::new("test.routed.b", handler.clone());

    let run_a = a.clone();
    let run_b = b.clone();
    framework.run(move || vec![run_a as Arc<dyn Module>, run_b as Arc<dyn Module>], false);

    const N: u32 = 500;
    for i in 0..N {
        framework.thread_manager().post(Task::new(
            "test",
            "test.routed.a",
            TaskPayload::Normal(i.to_le_bytes().to_vec()),
        ));
        framework.thread_manager().post(Task::new(
            "test",
            "test.routed.b",
            TaskPayload::Normal(i.to_le_bytes().to_vec()),
        ));
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        let done = a.seen.lock().unwrap().len() >= N as usize && b.seen.lock().unwrap().len() >= N as usize;
        if done {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "handler-routed modules did not drain in time");
        std::thread::sleep(Duration::from_millis(5));
    }

    for (name, module) in [("a", &a), ("b", &b)] {
        let recorded = module.seen.lock().unwrap();
        assert_eq!(recorded.len(), N as usize);
        for (i, value) in recorded.iter().enumerate() {
            assert_eq!(*value, i as u32, "module {name} reordered task {i}");
        }
    }
}

#[test]
fn shared_handler_interleaves_cross_module_posts() {
    init_logger();

    let framework = FrameworkManager::new(SchedulerConfig::default());
    let handler = Arc::new(TaskHandler::new(framework.registry(), framework.thread_manager()).expect("helper registration"));
    let order: Arc<Mutex<Vec<(char, u32)>>> = Arc::new(Mutex::new(Vec::new()));

    struct Recording {
        name: String,
        tag: char,
        handler: Arc<TaskHandler>,
        order: Arc<Mutex<Vec<(char, u32)>>>,
    }

    impl Module for Recording {
        fn name(&self) -> &str {
            &self.name
        }

        fn policy(&self) -> SchedulingPolicy {
            SchedulingPolicy::HandlerRouted
        }

        fn power_status(&self) -> PowerStatus {
            PowerStatus::On
        }

        fn handle_task(&self, task: &Task, _ctx: ModuleContext<'_>) {
            if let TaskPayload::Normal(bytes) = &task.payload {
                let n = u32::from_le_bytes(bytes.as_slice().try_into().unwrap());
                self.order.lock().unwrap().push((self.tag, n));
            }
        }

        fn handle_event(&self, _event: &EventPayload, _ctx: ModuleContext<'_>) {}

        fn handler_helper_name(&self) -> Option<&str> {
            Some(self.handler.helper_name())
        }
    }

    let a = Arc::new(Recording {
        name: "test.routed.x".to_string(),
        tag: 'A',
        handler: handler.clone(),
        order: order.clone(),
    });
    let b = Arc::new(Recording {
        name: "test.routed.y".to_string(),
        tag: 'B',
        handler: handler.clone(),
        order: order.clone(),
    });

    let run_a = a.clone();
    let run_b = b.clone();
    framework.run(move || vec![run_a as Arc<dyn Module>, run_b as Arc<dyn Module>], false);

    const N: u32 = 2;
    for i in 0..N {
        framework.thread_manager().post(Task::new(
            "test",
            "test.routed.x",
            TaskPayload::Normal(i.to_le_bytes().to_vec()),
        ));
        framework.thread_manager().post(Task::new(
            "test",
            "test.routed.y",
            TaskPayload::Normal(i.to_le_bytes().to_vec()),
        ));
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        if order.lock().unwrap().len() >= (2 * N) as usize {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "shared handler did not drain in time");
        std::thread::sleep(Duration::from_millis(5));
    }

    let recorded = order.lock().unwrap().clone();
    assert_eq!(recorded, vec![('A', 0), ('B', 0), ('A', 1), ('B', 1)]);
}
