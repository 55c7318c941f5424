//! The handful of standard modules every framework instance loads
//! automatically, plus the helper that backs handler-routed dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::error;

use crate::event::{EventKind, EventPayload};
use crate::module::{
    Module, ModuleContext, PowerCell, PowerStatus, SchedulingPolicy, GENERAL_SEQ_TASK_RUNNER_MODULE_NAME,
    TASK_RUNNER_MODULE_NAME, TIMER_MODULE_NAME,
};
use crate::registry::ModuleRegistry;
use crate::task::Task;
use crate::thread_manager::ThreadManager;
use crate::timer::{TimerId, TimerWheel};

/// Flips a module's own power status in response to power_on/power_off,
/// broadcasting a `power_status_changed` event on an actual transition.
/// Shared by every standard module; nothing here is gated the way the
/// registry's aggregate transitions are.
fn apply_power_event(name: &str, power: &PowerCell, event: &EventPayload, ctx: ModuleContext<'_>) {
    let next = match event.kind {
        EventKind::PowerOn if power.get() != PowerStatus::On => Some(PowerStatus::On),
        EventKind::PowerOff if power.get() != PowerStatus::Off => Some(PowerStatus::Off),
        _ => None,
    };
    if let Some(next) = next {
        power.set(next);
        let changed = Task::new(
            name,
            "",
            crate::task::TaskPayload::Event(EventPayload::with_subject(
                EventKind::PowerStatusChanged,
                name,
            )),
        );
        ctx.thread_manager.post(changed);
    }
}

/// Accepts only executable tasks addressed to the generic task runner or
/// with an empty target; anything else is a routing mistake.
pub struct TaskRunnerModule {
    power: PowerCell,
}

impl TaskRunnerModule {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            power: PowerCell::default(),
        })
    }
}

impl Module for TaskRunnerModule {
    fn name(&self) -> &str {
        TASK_RUNNER_MODULE_NAME
    }

    fn policy(&self) -> SchedulingPolicy {
        SchedulingPolicy::Concurrent
    }

    fn power_status(&self) -> PowerStatus {
        self.power.get()
    }

    fn handle_task(&self, task: &Task, _ctx: ModuleContext<'_>) {
        error!(
            "task runner module received a non-executable task from '{}', dropping",
            task.source
        );
    }

    fn handle_event(&self, event: &EventPayload, ctx: ModuleContext<'_>) {
        apply_power_event(self.name(), &self.power, event, ctx);
    }
}

/// The sequential analogue of `TaskRunnerModule`; also reused as every
/// handler-routed module's private helper.
pub struct GeneralSeqTaskRunnerModule {
    name: String,
    power: PowerCell,
}

impl GeneralSeqTaskRunnerModule {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            power: PowerCell::default(),
        })
    }

    pub fn standard() -> Arc<Self> {
        Self::new(GENERAL_SEQ_TASK_RUNNER_MODULE_NAME)
    }
}

impl Module for GeneralSeqTaskRunnerModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> SchedulingPolicy {
        SchedulingPolicy::Sequential
    }

    fn power_status(&self) -> PowerStatus {
        self.power.get()
    }

    fn handle_task(&self, task: &Task, _ctx: ModuleContext<'_>) {
        error!(
            "general sequential task runner '{}' received a non-executable task from '{}', dropping",
            self.name, task.source
        );
    }

    fn handle_event(&self, event: &EventPayload, ctx: ModuleContext<'_>) {
        apply_power_event(self.name(), &self.power, event, ctx);
    }
}

/// Backs the handler-routed scheduling policy: a dedicated, uniquely named
/// sequential helper module that the thread manager re-posts wrapped tasks
/// onto. Owned by whichever concrete `Module` declares itself handler-routed.
pub struct TaskHandler {
    helper_name: String,
}

impl TaskHandler {
    /// Creates and registers the private helper module. Call this from the
    /// owning module's constructor, before it is itself added to the
    /// registry.
    pub fn new(registry: &Arc<ModuleRegistry>, thread_manager: &Arc<ThreadManager>) -> crate::error::Result<Self> {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let helper_name = format!("fimo.handler_helper_{n}");
        let helper = GeneralSeqTaskRunnerModule::new(helper_name.clone());
        registry.add(helper, thread_manager)?;
        Ok(Self { helper_name })
    }

    pub fn helper_name(&self) -> &str {
        &self.helper_name
    }
}

/// Wraps the timer wheel as a module so it rides the same power-state and
/// task-routing machinery as everything else.
pub struct TimerModule {
    wheel: Arc<TimerWheel>,
    power: PowerCell,
}

impl TimerModule {
    pub fn new(wheel: Arc<TimerWheel>) -> Arc<Self> {
        Arc::new(Self {
            wheel,
            power: PowerCell::default(),
        })
    }

    pub fn register(
        &self,
        callback: impl Fn(TimerId, &str) + Send + Sync + 'static,
        interval: Duration,
        trigger_times: u32,
        name: impl Into<String>,
        handle_module: Option<String>,
    ) -> TimerId {
        self.wheel.register(callback, interval, trigger_times, name, handle_module)
    }

    pub fn register_once(
        &self,
        callback: impl Fn(TimerId, &str) + Send + Sync + 'static,
        delay: Duration,
        name: impl Into<String>,
        handle_module: Option<String>,
    ) -> TimerId {
        self.wheel.register_once(callback, delay, name, handle_module)
    }

    pub fn reset(&self, id: TimerId, interval: Duration) {
        self.wheel.reset(id, interval);
    }

    pub fn unregister(&self, id: TimerId) {
        self.wheel.unregister(id);
    }
}

impl Module for TimerModule {
    fn name(&self) -> &str {
        TIMER_MODULE_NAME
    }

    fn policy(&self) -> SchedulingPolicy {
        SchedulingPolicy::Concurrent
    }

    fn power_status(&self) -> PowerStatus {
        self.power.get()
    }

    fn handle_task(&self, task: &Task, _ctx: ModuleContext<'_>) {
        error!("timer module received an unexpected non-executable task from '{}'", task.source);
    }

    fn handle_event(&self, event: &EventPayload, ctx: ModuleContext<'_>) {
        apply_power_event(self.name(), &self.power, event, ctx);
    }
}
