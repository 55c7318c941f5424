use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use log::{error, warn};
use once_cell::sync::OnceCell;
use parking_lot::ReentrantMutex;

use crate::config::SchedulerConfig;
use crate::module::{ScopedOwnerGuard, SchedulingPolicy};
use crate::registry::ModuleRegistry;
use crate::task::Task;
use crate::worker::{Worker, WorkerId};

struct ScheduleRecord {
    policy: SchedulingPolicy,
    pending: VecDeque<Task>,
    pinned_worker: Option<WorkerId>,
}

impl ScheduleRecord {
    fn new(policy: SchedulingPolicy) -> Self {
        Self {
            policy,
            pending: VecDeque::new(),
            pinned_worker: None,
        }
    }
}

struct ThreadManagerState {
    schedules: HashMap<String, ScheduleRecord>,
    idle: VecDeque<Arc<Worker>>,
    working: HashMap<WorkerId, Arc<Worker>>,
    work_need_assign: VecDeque<Task>,
    next_worker_id: WorkerId,
}

/// Multiplexes a bounded pool of workers onto modules according to each
/// module's scheduling policy.
///
/// All bookkeeping lives behind one recursive lock - the same shape as the
/// original thread manager - so that a single public entry point (`post`,
/// `push_idle`, ...) may internally fan out to several of the private
/// `*_locked` helpers without re-acquiring the lock.
pub struct ThreadManager {
    state: ReentrantMutex<RefCell<ThreadManagerState>>,
    config: SchedulerConfig,
    self_ref: OnceCell<Weak<ThreadManager>>,
    registry_ref: OnceCell<Weak<ModuleRegistry>>,
    timer_ref: OnceCell<Weak<crate::timer::TimerWheel>>,
    started: AtomicBool,
}

impl ThreadManager {
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        Arc::new(Self {
            state: ReentrantMutex::new(RefCell::new(ThreadManagerState {
                schedules: HashMap::new(),
                idle: VecDeque::new(),
                working: HashMap::new(),
                work_need_assign: VecDeque::new(),
                next_worker_id: 0,
            })),
            config,
            self_ref: OnceCell::new(),
            registry_ref: OnceCell::new(),
            timer_ref: OnceCell::new(),
            started: AtomicBool::new(false),
        })
    }

    /// Completes the ownership graph: called once after all of
    /// `ThreadManager`, `ModuleRegistry` and `TimerWheel` are constructed.
    pub fn wire(&self, self_weak: Weak<ThreadManager>, registry: Weak<ModuleRegistry>, timer: Weak<crate::timer::TimerWheel>) {
        let _ = self.self_ref.set(self_weak);
        let _ = self.registry_ref.set(registry);
        let _ = self.timer_ref.set(timer);
    }

    fn weak_self(&self) -> Weak<ThreadManager> {
        self.self_ref.get().cloned().unwrap_or_default()
    }

    fn weak_registry(&self) -> Weak<ModuleRegistry> {
        self.registry_ref.get().cloned().unwrap_or_default()
    }

    fn registry(&self) -> Option<Arc<ModuleRegistry>> {
        self.registry_ref.get().and_then(Weak::upgrade)
    }

    fn timer(&self) -> Option<Arc<crate::timer::TimerWheel>> {
        self.timer_ref.get().and_then(Weak::upgrade)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ThreadManagerState) -> R) -> R {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Starts the pool: two pre-warmed workers, the periodic safety-net
    /// tick, and optionally runs one more worker's loop on the caller's own
    /// thread (in which case this call does not return until that worker
    /// exits).
    pub fn run(&self, occupy_current_thread: bool) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("thread manager is already running, ignoring duplicate run()");
            return;
        }

        for _ in 0..2 {
            let id = self.with_state(|state| {
                let id = state.next_worker_id;
                state.next_worker_id += 1;
                id
            });
            Worker::spawn(id, self.weak_self(), self.weak_registry());
        }

        if let Some(timer) = self.timer() {
            let tick_target = self.weak_self();
            timer.register(
                move |_id, _name| {
                    if let Some(manager) = tick_target.upgrade() {
                        manager.schedule_workers_tick();
                    }
                },
                self.config.scheduler_tick_get(),
                0,
                "fimo.scheduler_tick",
                None,
            );
        } else {
            warn!("no timer wheel wired in, periodic scheduler tick will not run");
        }

        if occupy_current_thread {
            let id = self.with_state(|state| {
                let id = state.next_worker_id;
                state.next_worker_id += 1;
                id
            });
            let worker = Worker::new(id);
            worker.run_loop(self.weak_self(), self.weak_registry());
        }
    }

    /// The thread manager's own safety net: if the pool has gone fully busy
    /// with nothing idle and there is still headroom, grow it by one.
    fn schedule_workers_tick(&self) {
        self.with_state(|state| {
            if state.idle.is_empty() && state.working.len() < self.config.max_workers_get() {
                let id = state.next_worker_id;
                state.next_worker_id += 1;
                Worker::spawn(id, self.weak_self(), self.weak_registry());
            }
        });
    }

    /// Registers (or overwrites) the scheduling policy of a module.
    pub fn register_module_type(&self, policy: SchedulingPolicy, name: &str) {
        self.with_state(|state| {
            state.schedules.insert(name.to_string(), ScheduleRecord::new(policy));
        });
    }

    /// Returns the native thread a sequential module is currently pinned
    /// to. `None` for concurrent and immediate modules by contract, and for
    /// a sequential module that has no worker pinned to it right now.
    pub fn get_scheduled_thread_id(&self, name: &str) -> Option<crate::platform::ThreadId> {
        let policy = self.with_state(|state| state.schedules.get(name).map(|r| r.policy));
        match policy {
            Some(SchedulingPolicy::Sequential) => self.with_state(|state| {
                let record = state.schedules.get(name)?;
                let worker_id = record.pinned_worker?;
                state.working.get(&worker_id)?.thread_id()
            }),
            Some(SchedulingPolicy::HandlerRouted) => {
                let helper_name = self
                    .registry()
                    .and_then(|registry| registry.get(name))
                    .and_then(|module| module.handler_helper_name().map(str::to_string))?;
                self.get_scheduled_thread_id(&helper_name)
            }
            _ => None,
        }
    }

    /// Posts a task according to its target module's scheduling policy.
    ///
    /// The policy lookup and the locked dispatch happen inside a single
    /// `with_state` call, so a concurrent `register_module_type` for the
    /// same module can't land between the two and make this dispatch under
    /// a policy that's already stale. Immediate dispatch is the one
    /// exception: it still has to run outside any lock, since a module's
    /// immediate handler may itself post - recursing back into `post` while
    /// still holding the lock would double-borrow the `RefCell` underneath
    /// `ReentrantMutex`.
    pub fn post(&self, task: Task) {
        if task.target.is_empty() {
            if let crate::task::TaskPayload::Event(_) = task.payload {
                if let Some(registry) = self.registry() {
                    for name in registry.names() {
                        self.post(task.retargeted(name));
                    }
                }
                return;
            }
            self.with_state(|state| self.dispatch_concurrent_locked(state, task));
            return;
        }

        let immediate = self.with_state(|state| {
            let policy = self.policy_for_locked(state, &task.target);
            match policy {
                SchedulingPolicy::Immediate => Some(task),
                SchedulingPolicy::Sequential => {
                    self.dispatch_sequential_locked(state, task);
                    None
                }
                SchedulingPolicy::Concurrent => {
                    self.dispatch_concurrent_locked(state, task);
                    None
                }
                SchedulingPolicy::HandlerRouted => {
                    self.dispatch_handler_routed_locked(state, task);
                    None
                }
            }
        });

        if let Some(task) = immediate {
            self.dispatch_immediate(task);
        }
    }

    /// Posts every task in order. Equivalent to calling `post` in a loop,
    /// spelled out separately so callers posting a batch don't need to
    /// re-derive it.
    pub fn post_many(&self, tasks: impl IntoIterator<Item = Task>) {
        for task in tasks {
            self.post(task);
        }
    }

    /// Convenience for posting a bare closure onto the generic concurrent
    /// task runner.
    pub fn post_closure<F>(&self, source: impl Into<String>, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.post(crate::task::executable_infallible(
            source,
            crate::module::TASK_RUNNER_MODULE_NAME,
            f,
        ));
    }

    /// Posts a closure through the timer wheel after `delay`, running it
    /// once on the generic concurrent task runner.
    pub fn post_delayed<F>(&self, source: impl Into<String>, delay: std::time::Duration, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let source = source.into();
        match self.timer() {
            Some(timer) => {
                timer.register_once(move |_id, _name| f(), delay, source, None);
            }
            None => warn!("no timer wheel wired in, post_delayed('{source}') dropped"),
        }
    }

    fn policy_for_locked(&self, state: &mut ThreadManagerState, target: &str) -> SchedulingPolicy {
        if let Some(record) = state.schedules.get(target) {
            record.policy
        } else {
            error!("post to unregistered module '{target}', defaulting to concurrent policy");
            state
                .schedules
                .insert(target.to_string(), ScheduleRecord::new(SchedulingPolicy::Concurrent));
            SchedulingPolicy::Concurrent
        }
    }

    fn dispatch_immediate(&self, task: Task) {
        let _owner = ScopedOwnerGuard::enter(&task.target);
        if let Some(registry) = self.registry() {
            registry.dispatch(&task, self);
        }
    }

    fn dispatch_concurrent_locked(&self, state: &mut ThreadManagerState, task: Task) {
        if let Some(worker) = self.claim_idle_worker_locked(state) {
            worker.push(task);
        } else {
            state.work_need_assign.push_back(task);
        }
    }

    fn dispatch_sequential_locked(&self, state: &mut ThreadManagerState, task: Task) {
        let name = task.target.clone();
        let pinned = state.schedules.get(&name).and_then(|r| r.pinned_worker);
        if let Some(worker_id) = pinned {
            if let Some(worker) = state.working.get(&worker_id).cloned() {
                worker.push(task);
                return;
            }
        }

        if let Some(worker) = self.claim_idle_worker_locked(state) {
            let record = state
                .schedules
                .entry(name)
                .or_insert_with(|| ScheduleRecord::new(SchedulingPolicy::Sequential));
            record.pinned_worker = Some(worker.id());
            worker.push(task);
        } else {
            let record = state
                .schedules
                .entry(name)
                .or_insert_with(|| ScheduleRecord::new(SchedulingPolicy::Sequential));
            record.pending.push_back(task);
        }
    }

    fn dispatch_handler_routed_locked(&self, state: &mut ThreadManagerState, task: Task) {
        let registry = match self.registry() {
            Some(registry) => registry,
            None => {
                self.dispatch_concurrent_locked(state, task);
                return;
            }
        };
        let module = match registry.get(&task.target) {
            Some(module) => module,
            None => {
                error!("handler-routed dispatch to unknown module '{}'", task.target);
                self.dispatch_concurrent_locked(state, task);
                return;
            }
        };
        let helper_name = match module.handler_helper_name() {
            Some(name) => name.to_string(),
            None => {
                error!(
                    "module '{}' declares handler-routed policy without a task handler, falling back to concurrent dispatch",
                    task.target
                );
                self.dispatch_concurrent_locked(state, task);
                return;
            }
        };

        let registry_weak = self.weak_registry();
        let manager_weak = self.weak_self();
        let original = task.clone();
        let position = task.position;
        let source = task.source.clone();
        let wrapper = crate::task::executable_infallible(source, helper_name, move || {
            if let (Some(registry), Some(manager)) = (registry_weak.upgrade(), manager_weak.upgrade()) {
                registry.dispatch(&original, &manager);
            }
        })
        .with_position(position);
        self.dispatch_sequential_locked(state, wrapper);
    }

    /// Claims an idle worker, growing the pool if there is headroom and no
    /// worker is currently idle. Returns `None` only once the pool is at
    /// capacity and every worker is busy.
    fn claim_idle_worker_locked(&self, state: &mut ThreadManagerState) -> Option<Arc<Worker>> {
        if let Some(worker) = state.idle.pop_front() {
            state.working.insert(worker.id(), worker.clone());
            self.consider_dismiss_locked(state);
            return Some(worker);
        }

        if state.working.len() < self.config.max_workers_get() {
            let id = state.next_worker_id;
            state.next_worker_id += 1;
            let worker = Worker::spawn(id, self.weak_self(), self.weak_registry());
            state.working.insert(id, worker.clone());
            return Some(worker);
        }

        None
    }

    fn consider_dismiss_locked(&self, state: &mut ThreadManagerState) {
        let watermark = self.config.idle_parking_watermark_get();
        if state.idle.len() <= watermark {
            return;
        }
        let threshold = self.config.idle_dismiss_after_get();
        if let Some(pos) = state.idle.iter().position(|w| w.is_idle_for_long(threshold)) {
            let worker = state.idle.remove(pos).expect("position came from this deque");
            worker.exit_later();
        }
    }

    /// Called by a worker once its private queue runs dry. Scans every
    /// sequential module's pending queue before deciding whether the
    /// releasing worker itself goes idle - mirrors the original's
    /// `push_idle_worker`, including its ability to recruit a different
    /// idle worker for an unrelated pending sequential module in the same
    /// call.
    pub fn push_idle(&self, worker: Arc<Worker>) {
        self.with_state(|state| self.push_idle_locked(state, worker));
    }

    fn push_idle_locked(&self, state: &mut ThreadManagerState, worker: Arc<Worker>) {
        let id = worker.id();
        let mut releaser_assigned = false;

        let sequential_names: Vec<String> = state
            .schedules
            .iter()
            .filter(|(_, record)| record.policy == SchedulingPolicy::Sequential)
            .map(|(name, _)| name.clone())
            .collect();

        for name in sequential_names {
            let pinned_to_releaser = state
                .schedules
                .get(&name)
                .map(|r| r.pinned_worker == Some(id))
                .unwrap_or(false);

            if pinned_to_releaser {
                let pending_empty = state.schedules.get(&name).map(|r| r.pending.is_empty()).unwrap_or(true);
                if pending_empty {
                    if let Some(record) = state.schedules.get_mut(&name) {
                        record.pinned_worker = None;
                    }
                } else {
                    let drained: Vec<Task> = state
                        .schedules
                        .get_mut(&name)
                        .map(|record| record.pending.drain(..).collect())
                        .unwrap_or_default();
                    worker.push_many(drained);
                    releaser_assigned = true;
                }
                continue;
            }

            let (needs_worker, has_pending) = state
                .schedules
                .get(&name)
                .map(|r| (r.pinned_worker.is_none(), !r.pending.is_empty()))
                .unwrap_or((false, false));

            if needs_worker && has_pending {
                if let Some(new_worker) = self.claim_idle_worker_locked(state) {
                    let drained: Vec<Task> = {
                        let record = state
                            .schedules
                            .get_mut(&name)
                            .expect("name came from this map's own keys");
                        record.pinned_worker = Some(new_worker.id());
                        record.pending.drain(..).collect()
                    };
                    new_worker.push_many(drained);
                }
            }
        }

        if releaser_assigned {
            return;
        }

        if let Some(task) = state.work_need_assign.pop_front() {
            worker.push(task);
            return;
        }

        state.working.remove(&id);
        if !state.idle.iter().any(|w| w.id() == id) {
            state.idle.push_back(worker);
        }
    }

    /// Current (idle, working) worker counts. Mainly useful for tests and
    /// diagnostics; nothing in the dispatch path depends on it.
    pub fn worker_counts(&self) -> (usize, usize) {
        self.with_state(|state| (state.idle.len(), state.working.len()))
    }

    pub fn remove_worker(&self, id: WorkerId) {
        self.with_state(|state| {
            state.working.remove(&id);
            state.idle.retain(|w| w.id() != id);
        });
    }
}
