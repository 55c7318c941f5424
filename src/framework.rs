use std::sync::Arc;

use log::warn;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;

use crate::builtin::{GeneralSeqTaskRunnerModule, TaskRunnerModule, TimerModule};
use crate::config::SchedulerConfig;
use crate::event::{EventKind, EventPayload};
use crate::info_registry::InformationRegistry;
use crate::module::{Module, PowerStatus};
use crate::registry::ModuleRegistry;
use crate::task::{Task, TaskPayload};
use crate::thread_manager::ThreadManager;
use crate::timer::TimerWheel;

static INSTANCE: OnceCell<Arc<FrameworkManager>> = OnceCell::new();

/// Composes the module registry, the thread manager and the timer wheel
/// into the single object application code drives. Reachable either as an
/// explicit value (pass it around, the way every `Module` callback receives
/// a `ModuleContext` instead) or, for top-level call sites, through the
/// process-wide `instance()` accessor.
pub struct FrameworkManager {
    registry: Arc<ModuleRegistry>,
    thread_manager: Arc<ThreadManager>,
    timer_module: Arc<TimerModule>,
    information: InformationRegistry,
    running: RwLock<bool>,
}

impl FrameworkManager {
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        let registry = ModuleRegistry::new();
        let thread_manager = ThreadManager::new(config.clone());
        let timer = TimerWheel::new(config);

        thread_manager.wire(
            Arc::downgrade(&thread_manager),
            Arc::downgrade(&registry),
            Arc::downgrade(&timer),
        );
        timer.wire(Arc::downgrade(&timer), Arc::downgrade(&thread_manager));

        let timer_module = TimerModule::new(timer);

        Arc::new(Self {
            registry,
            thread_manager,
            timer_module,
            information: InformationRegistry::new(),
            running: RwLock::new(false),
        })
    }

    /// Returns the process-wide singleton, lazily constructing it with
    /// default settings on first use.
    pub fn instance() -> Arc<FrameworkManager> {
        INSTANCE
            .get_or_init(|| FrameworkManager::new(SchedulerConfig::default()))
            .clone()
    }

    /// Installs a specific, already-configured instance as the process-wide
    /// singleton. Must happen before the first call to `instance()`;
    /// returns the rejected instance back to the caller otherwise.
    pub fn install(instance: Arc<FrameworkManager>) -> Result<(), Arc<FrameworkManager>> {
        INSTANCE.set(instance)
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn thread_manager(&self) -> &Arc<ThreadManager> {
        &self.thread_manager
    }

    pub fn timer(&self) -> &Arc<TimerModule> {
        &self.timer_module
    }

    pub fn information(&self) -> &InformationRegistry {
        &self.information
    }

    pub fn set_power_changed_callback<F>(&self, callback: F)
    where
        F: Fn(PowerStatus) + Send + Sync + 'static,
    {
        self.registry.set_power_changed_callback(callback);
    }

    /// Registers the modules built by `module_maker`, then the three
    /// standard ones (timer, task runner, general sequential task runner),
    /// and starts the pool. Idempotent: a second call is a no-op.
    ///
    /// `module_maker` is only invoked once the idempotency check passes, so
    /// a redundant second call never pays for constructing modules it's
    /// just going to discard.
    pub fn run(&self, module_maker: impl FnOnce() -> Vec<Arc<dyn Module>>, occupy_current_thread: bool) {
        {
            let mut running = self.running.write();
            if *running {
                warn!("framework manager is already running, ignoring duplicate run()");
                return;
            }
            *running = true;
        }

        for module in module_maker() {
            let name = module.name().to_string();
            if let Err(e) = self.registry.add(module, &self.thread_manager) {
                warn!("skipping module '{name}': {e}");
            }
        }
        for standard in [
            self.timer_module.clone() as Arc<dyn Module>,
            TaskRunnerModule::new(),
            GeneralSeqTaskRunnerModule::standard(),
        ] {
            let name = standard.name().to_string();
            if let Err(e) = self.registry.add(standard, &self.thread_manager) {
                warn!("standard module '{name}' lost to a user module of the same name: {e}");
            }
        }

        self.thread_manager.run(occupy_current_thread);
    }

    /// Broadcasts a `power_on` event to every registered module.
    pub fn power_up(&self) {
        self.thread_manager.post(Task::new(
            "fimo.framework",
            "",
            TaskPayload::Event(EventPayload::new(EventKind::PowerOn)),
        ));
    }

    /// Broadcasts a `power_off` event to every registered module.
    pub fn power_down(&self) {
        self.thread_manager.post(Task::new(
            "fimo.framework",
            "",
            TaskPayload::Event(EventPayload::new(EventKind::PowerOff)),
        ));
    }
}
