use std::cell::RefCell;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::event::EventPayload;
use crate::registry::ModuleRegistry;
use crate::task::Task;
use crate::thread_manager::ThreadManager;

/// Name of the built-in timer module.
pub const TIMER_MODULE_NAME: &str = "fimo.timer";
/// Name of the built-in module that only ever runs executable tasks posted
/// to it, on any concurrent worker.
pub const TASK_RUNNER_MODULE_NAME: &str = "fimo.task_runner";
/// Name of the built-in single-threaded task runner, also reused as the
/// helper module every handler-routed module's `TaskHandler` schedules onto.
pub const GENERAL_SEQ_TASK_RUNNER_MODULE_NAME: &str = "fimo.general_seq_task_runner";
/// Name under which the module registry answers to power-aggregation tasks
/// addressed to itself rather than to a specific module.
pub const MODULE_MANAGER_NAME: &str = "fimo.module_manager";

/// The four mutually exclusive ways the thread manager may dispatch tasks
/// addressed to a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingPolicy {
    /// Runs on any available worker; no ordering guarantee between tasks.
    Concurrent,
    /// Runs on a single worker pinned to the module, in post order.
    Sequential,
    /// Runs synchronously on the posting thread.
    Immediate,
    /// Delegated to the module's `TaskHandler`, which re-posts onto a
    /// private sequential helper module.
    HandlerRouted,
}

/// Power lifecycle of a module, counted by the registry to derive the
/// aggregate framework power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PowerStatus {
    Off = 0,
    PoweringOn = 1,
    On = 2,
    PoweringOff = 3,
}

impl PowerStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PowerStatus::Off,
            1 => PowerStatus::PoweringOn,
            2 => PowerStatus::On,
            _ => PowerStatus::PoweringOff,
        }
    }
}

/// Atomic cell for a module's power status, cheaper than a `RwLock` for a
/// single-word value that's read far more often than written.
#[derive(Debug)]
pub struct PowerCell(AtomicU8);

impl PowerCell {
    pub fn new(initial: PowerStatus) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub fn get(&self) -> PowerStatus {
        PowerStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, status: PowerStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

impl Default for PowerCell {
    fn default() -> Self {
        Self::new(PowerStatus::Off)
    }
}

/// Borrowed handle bundling everything a module needs to post further tasks
/// or look up siblings, passed explicitly into every `Module` callback
/// instead of the module reaching for a process-global singleton.
#[derive(Clone, Copy)]
pub struct ModuleContext<'a> {
    pub thread_manager: &'a ThreadManager,
    pub registry: &'a ModuleRegistry,
}

/// A named participant in the framework.
///
/// Implementors own their business logic; routing, worker assignment and
/// power aggregation all live in the registry and thread manager instead.
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    fn policy(&self) -> SchedulingPolicy;

    fn power_status(&self) -> PowerStatus;

    /// Called once when the module joins the registry.
    fn initialize(&self, _ctx: ModuleContext<'_>) {}

    /// Called once when the module leaves the registry.
    fn deinitialize(&self, _ctx: ModuleContext<'_>) {}

    /// Handles a normal or executable task addressed to this module.
    fn handle_task(&self, task: &Task, ctx: ModuleContext<'_>);

    /// Handles an event addressed to this module.
    fn handle_event(&self, event: &EventPayload, ctx: ModuleContext<'_>);

    /// Name of the private sequential helper module this module's task
    /// handler re-posts onto. Only meaningful (and required) for modules
    /// whose `policy()` is `SchedulingPolicy::HandlerRouted`.
    fn handler_helper_name(&self) -> Option<&str> {
        None
    }
}

thread_local! {
    static CURRENT_OWNER: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Scope guard mirroring the original `auto_guard`: records the module name
/// a worker is currently executing a task on behalf of, and clears it again
/// on drop - including on unwind, so a panicking task never leaves stale
/// thread-local state behind for the next task on the same worker.
pub struct ScopedOwnerGuard;

impl ScopedOwnerGuard {
    pub fn enter(owner: &str) -> Self {
        CURRENT_OWNER.with(|cell| *cell.borrow_mut() = Some(owner.to_string()));
        ScopedOwnerGuard
    }
}

impl Drop for ScopedOwnerGuard {
    fn drop(&mut self) {
        CURRENT_OWNER.with(|cell| *cell.borrow_mut() = None);
    }
}

/// Returns the module name the calling thread is currently executing a task
/// on behalf of, if any.
pub fn current_owner() -> Option<String> {
    CURRENT_OWNER.with(|cell| cell.borrow().clone())
}
