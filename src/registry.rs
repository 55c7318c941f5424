use std::collections::HashMap;
use std::sync::Arc;

use log::{error, warn};
use parking_lot::RwLock;

use crate::event::{EventKind, EventPayload};
use crate::module::{Module, ModuleContext, PowerCell, PowerStatus, MODULE_MANAGER_NAME};
use crate::task::{Task, TaskPayload};
use crate::thread_manager::ThreadManager;

/// Callback invoked when the registry's aggregate power status actually
/// changes, run on the general sequential task runner so it observes a
/// predictable thread.
pub type PowerChangedCallback = Arc<dyn Fn(PowerStatus) + Send + Sync>;

/// Owns the canonical set of modules, routes tasks by target name, and
/// derives the aggregate framework power state from the modules it holds.
pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, Arc<dyn Module>>>,
    aggregate: PowerCell,
    power_changed_callback: RwLock<Option<PowerChangedCallback>>,
}

impl ModuleRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            modules: RwLock::new(HashMap::new()),
            aggregate: PowerCell::new(PowerStatus::Off),
            power_changed_callback: RwLock::new(None),
        })
    }

    pub fn set_power_changed_callback<F>(&self, callback: F)
    where
        F: Fn(PowerStatus) + Send + Sync + 'static,
    {
        *self.power_changed_callback.write() = Some(Arc::new(callback));
    }

    pub fn aggregate_power(&self) -> PowerStatus {
        self.aggregate.get()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.modules.read().keys().cloned().collect()
    }

    /// Registers a module, initializes it, and synchronously brings it to
    /// the registry's current aggregate power state.
    ///
    /// This call is synchronous by design, mirroring the original
    /// `add_new_module`: a module joining mid-flight should not observe a
    /// window where its power status lags the rest of the framework.
    pub fn add(&self, module: Arc<dyn Module>, thread_manager: &ThreadManager) -> crate::error::Result<()> {
        let name = module.name().to_string();
        {
            let mut modules = self.modules.write();
            if modules.contains_key(&name) {
                return Err(crate::error::Error::new(
                    crate::error::ErrorKind::AlreadyExists,
                    format!("module '{name}' already registered"),
                ));
            }
            modules.insert(name.clone(), module.clone());
        }
        thread_manager.register_module_type(module.policy(), &name);
        let ctx = ModuleContext {
            thread_manager,
            registry: self,
        };
        module.initialize(ctx);

        let target_status = match self.aggregate_power() {
            PowerStatus::On | PowerStatus::PoweringOn => EventKind::PowerOn,
            PowerStatus::Off | PowerStatus::PoweringOff => EventKind::PowerOff,
        };
        let event = EventPayload::new(target_status);
        module.handle_event(&event, ctx);
        Ok(())
    }

    pub fn remove(&self, name: &str, thread_manager: &ThreadManager) {
        let removed = self.modules.write().remove(name);
        if let Some(module) = removed {
            let ctx = ModuleContext {
                thread_manager,
                registry: self,
            };
            module.deinitialize(ctx);
        } else {
            warn!("attempted to remove unknown module '{name}'");
        }
    }

    fn modules_except(&self, source: &str) -> Vec<Arc<dyn Module>> {
        self.modules
            .read()
            .values()
            .filter(|m| m.name() != source)
            .cloned()
            .collect()
    }

    /// Routes a task that has already been assigned to a worker by the
    /// thread manager. Runs synchronously on the calling (worker) thread.
    pub fn dispatch(&self, task: &Task, thread_manager: &ThreadManager) {
        let ctx = ModuleContext {
            thread_manager,
            registry: self,
        };
        match &task.payload {
            TaskPayload::Event(event) => self.dispatch_event(task, event, ctx),
            TaskPayload::Normal(_) => self.dispatch_normal(task, ctx),
            TaskPayload::Executable(_) => {
                task.run();
            }
        }
    }

    fn dispatch_normal(&self, task: &Task, ctx: ModuleContext<'_>) {
        if task.target.is_empty() {
            for module in self.modules_except(&task.source) {
                module.handle_task(task, ctx);
            }
            return;
        }
        if task.target == MODULE_MANAGER_NAME {
            return;
        }
        match self.get(&task.target) {
            Some(module) => module.handle_task(task, ctx),
            None => error!(
                "dropping normal task for unknown module '{}' (from '{}')",
                task.target, task.source
            ),
        }
    }

    fn dispatch_event(&self, task: &Task, event: &EventPayload, ctx: ModuleContext<'_>) {
        if task.target.is_empty() || task.target == MODULE_MANAGER_NAME {
            let propagate = self.handle_local_event(event, ctx);
            if task.target.is_empty() && propagate {
                for module in self.modules_except(&task.source) {
                    module.handle_event(event, ctx);
                }
            }
            return;
        }
        match self.get(&task.target) {
            Some(module) => module.handle_event(event, ctx),
            None => error!(
                "dropping event for unknown module '{}' (from '{}')",
                task.target, task.source
            ),
        }
    }

    /// Handles an event addressed to the registry itself: power gating and
    /// aggregate recomputation. Returns whether the event should still be
    /// fanned out to the individual modules.
    fn handle_local_event(&self, event: &EventPayload, ctx: ModuleContext<'_>) -> bool {
        match event.kind {
            EventKind::PowerOn => self.handle_power_on(),
            EventKind::PowerOff => self.handle_power_off(),
            EventKind::PowerStatusChanged => self.handle_module_power_changed(ctx),
            EventKind::Derived(_) => true,
        }
    }

    fn handle_power_on(&self) -> bool {
        match self.aggregate_power() {
            PowerStatus::On => {
                warn!("ignoring power_on: registry aggregate is already on");
                false
            }
            PowerStatus::PoweringOff => {
                error!("ignoring power_on while registry aggregate is powering off");
                false
            }
            PowerStatus::Off | PowerStatus::PoweringOn => {
                self.aggregate.set(PowerStatus::PoweringOn);
                true
            }
        }
    }

    fn handle_power_off(&self) -> bool {
        match self.aggregate_power() {
            PowerStatus::Off => {
                warn!("ignoring power_off: registry aggregate is already off");
                false
            }
            PowerStatus::PoweringOn => {
                error!("ignoring power_off while registry aggregate is powering on");
                false
            }
            PowerStatus::On | PowerStatus::PoweringOff => {
                self.aggregate.set(PowerStatus::PoweringOff);
                true
            }
        }
    }

    fn handle_module_power_changed(&self, ctx: ModuleContext<'_>) -> bool {
        let modules = self.modules.read();
        let total = modules.len();
        let mut off = 0;
        let mut powering_on = 0;
        let mut on = 0;
        let mut powering_off = 0;
        for module in modules.values() {
            match module.power_status() {
                PowerStatus::Off => off += 1,
                PowerStatus::PoweringOn => powering_on += 1,
                PowerStatus::On => on += 1,
                PowerStatus::PoweringOff => powering_off += 1,
            }
        }
        drop(modules);

        if powering_on > 0 && powering_off > 0 {
            error!("modules are simultaneously powering on and off");
        }

        let previous = self.aggregate_power();
        let mut next = previous;
        if total > 0 && on == total {
            next = PowerStatus::On;
        } else if total > 0 && off == total {
            next = PowerStatus::Off;
        }

        if next != previous {
            self.aggregate.set(next);
            let callback = self.power_changed_callback.read().clone();
            if let Some(callback) = callback {
                let status = next;
                let cb_task = crate::task::executable_infallible(
                    MODULE_MANAGER_NAME,
                    crate::module::GENERAL_SEQ_TASK_RUNNER_MODULE_NAME,
                    move || callback(status),
                );
                ctx.thread_manager.post(cb_task);
            }
        }
        true
    }
}
