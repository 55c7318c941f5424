use std::cell::RefCell;
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::warn;
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex, ReentrantMutex};

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::module::TASK_RUNNER_MODULE_NAME;
use crate::thread_manager::ThreadManager;

pub type TimerId = u32;
pub type TimerCallback = Arc<dyn Fn(TimerId, &str) + Send + Sync>;

struct TimerControlBlock {
    id: TimerId,
    start_ms: i64,
    interval_ms: i64,
    trigger_times: u32,
    triggered: u32,
    next_fire: i64,
    name: String,
    handle_module: Option<String>,
    callback: TimerCallback,
}

struct TimerWheelState {
    timers: Vec<TimerControlBlock>,
    next_id: TimerId,
}

struct WaitCell {
    waiting: bool,
    wake_up_time: Option<i64>,
}

/// Sorted set of timer control blocks that re-entrantly schedules its own
/// wake-ups through the same task pipeline every other module uses.
///
/// At most one "wake me up at time T" task is outstanding at once; a new
/// registration either shortens the current wait (by signalling the wait
/// cell) or, if none is outstanding, posts a fresh one.
pub struct TimerWheel {
    state: ReentrantMutex<RefCell<TimerWheelState>>,
    wait_cell: Mutex<WaitCell>,
    wait_condvar: Condvar,
    clock: Clock,
    config: SchedulerConfig,
    self_ref: OnceCell<Weak<TimerWheel>>,
    manager_ref: OnceCell<Weak<ThreadManager>>,
}

impl TimerWheel {
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        Arc::new(Self {
            state: ReentrantMutex::new(RefCell::new(TimerWheelState {
                timers: Vec::new(),
                next_id: 1,
            })),
            wait_cell: Mutex::new(WaitCell {
                waiting: false,
                wake_up_time: None,
            }),
            wait_condvar: Condvar::new(),
            clock: Clock::new(),
            config,
            self_ref: OnceCell::new(),
            manager_ref: OnceCell::new(),
        })
    }

    pub fn wire(&self, self_weak: Weak<TimerWheel>, manager: Weak<ThreadManager>) {
        let _ = self.self_ref.set(self_weak);
        let _ = self.manager_ref.set(manager);
    }

    fn weak_self(&self) -> Weak<TimerWheel> {
        self.self_ref.get().cloned().unwrap_or_default()
    }

    fn manager(&self) -> Option<Arc<ThreadManager>> {
        self.manager_ref.get().and_then(Weak::upgrade)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut TimerWheelState) -> R) -> R {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    /// Registers a repeating (or, with `trigger_times == 1`, one-shot)
    /// timer. `handle_module`, if given, receives the fired task instead of
    /// the generic task runner.
    pub fn register(
        &self,
        callback: impl Fn(TimerId, &str) + Send + Sync + 'static,
        interval: Duration,
        trigger_times: u32,
        name: impl Into<String>,
        handle_module: Option<String>,
    ) -> TimerId {
        let interval_ms = interval.as_millis() as i64;
        let name = name.into();
        let callback: TimerCallback = Arc::new(callback);

        self.with_state(|state| {
            let id = state.next_id;
            state.next_id += 1;
            let now = self.clock.now_ms();
            let previous_front = state.timers.first().map(|t| t.next_fire);

            state.timers.push(TimerControlBlock {
                id,
                start_ms: now,
                interval_ms,
                trigger_times,
                triggered: 0,
                next_fire: now + interval_ms,
                name: name.clone(),
                handle_module,
                callback,
            });
            state.timers.sort_by_key(|t| t.next_fire);

            let new_front = state.timers.first().map(|t| t.next_fire);
            if previous_front.map(|p| new_front < Some(p)).unwrap_or(true) {
                self.make_schedule_task_if_need_locked(state, 0);
            }
            id
        })
    }

    /// Registers a timer that fires exactly once.
    pub fn register_once(
        &self,
        callback: impl Fn(TimerId, &str) + Send + Sync + 'static,
        delay: Duration,
        name: impl Into<String>,
        handle_module: Option<String>,
    ) -> TimerId {
        self.register(callback, delay, 1, name, handle_module)
    }

    /// Rewrites a timer's interval, immediately recomputing its pending
    /// `next_fire` from `start_ms + interval * (triggered + 1)` so the
    /// invariant holds for the slot that hasn't fired yet, not just for
    /// fires recorded after this call.
    pub fn reset(&self, id: TimerId, interval: Duration) {
        self.with_state(|state| {
            let interval_ms = interval.as_millis() as i64;
            let previous_front = state.timers.first().map(|t| t.next_fire);

            let found = if let Some(tcb) = state.timers.iter_mut().find(|t| t.id == id) {
                tcb.interval_ms = interval_ms;
                tcb.next_fire = tcb.start_ms + interval_ms.max(1) * (tcb.triggered as i64 + 1);
                true
            } else {
                false
            };

            if !found {
                warn!("reset() on unknown timer {id}");
                return;
            }

            state.timers.sort_by_key(|t| t.next_fire);
            let new_front = state.timers.first().map(|t| t.next_fire);
            if new_front != previous_front {
                self.make_schedule_task_if_need_locked(state, 0);
            }
        });
    }

    pub fn unregister(&self, id: TimerId) {
        self.with_state(|state| {
            state.timers.retain(|t| t.id != id);
        });
    }

    fn run_schedule_task(&self, duration_ms: i64) {
        {
            let mut cell = self.wait_cell.lock();
            cell.waiting = true;
        }
        if duration_ms > 0 {
            let mut cell = self.wait_cell.lock();
            self.wait_condvar.wait_for(&mut cell, Duration::from_millis(duration_ms as u64));
        }
        {
            let mut cell = self.wait_cell.lock();
            cell.waiting = false;
        }
        self.with_state(|state| self.handle_timer_expired_locked(state));
    }

    fn handle_timer_expired_locked(&self, state: &mut TimerWheelState) {
        let now = self.clock.now_ms();
        let slack = self.config.timer_slack_get().as_millis() as i64;
        let late_fire_threshold = self.config.late_fire_threshold_get().as_millis() as i64;
        let mut expired_ids = Vec::new();

        for tcb in state.timers.iter_mut() {
            let diff = now - tcb.next_fire;
            if diff < -slack {
                // Sorted ascending: every later timer is even further out.
                break;
            }
            if diff > 100 {
                warn!("timer '{}' fired {diff}ms late", tcb.name);
            }

            let target = tcb
                .handle_module
                .clone()
                .unwrap_or_else(|| TASK_RUNNER_MODULE_NAME.to_string());
            let id = tcb.id;
            let name = tcb.name.clone();
            let callback = tcb.callback.clone();
            let execute_time = tcb.next_fire;
            let triggered_after = tcb.triggered + 1;
            let remaining = if tcb.trigger_times == 0 {
                None
            } else {
                Some(tcb.trigger_times.saturating_sub(triggered_after))
            };
            let clock = self.clock;

            let task = crate::task::executable_infallible("fimo.timer", target, move || {
                let elapsed = clock.now_ms() - execute_time;
                let more_fires_remain = remaining.map(|r| r > 0).unwrap_or(true);
                if elapsed > late_fire_threshold && more_fires_remain {
                    return;
                }
                callback(id, &name);
            });

            if let Some(manager) = self.manager() {
                manager.post(task);
            }

            tcb.triggered = triggered_after;
            // Recomputed from the timer's own start and interval rather than
            // accumulated, so a `reset()` between triggers takes effect
            // without the drift a running `+= interval` total would pick up.
            tcb.next_fire = tcb.start_ms + tcb.interval_ms.max(1) * (tcb.triggered as i64 + 1);
            if tcb.trigger_times != 0 && tcb.triggered >= tcb.trigger_times {
                expired_ids.push(tcb.id);
            }
        }

        state.timers.sort_by_key(|t| t.next_fire);
        if !expired_ids.is_empty() {
            state.timers.retain(|t| !expired_ids.contains(&t.id));
        }

        // A head that lies in the past only clamps the *wait* for the next
        // schedule task, never the timer's own recorded deadline.
        self.make_schedule_task_if_need_locked(state, slack);
    }

    fn make_schedule_task_if_need_locked(&self, state: &mut TimerWheelState, min_wait_ms: i64) {
        let front = match state.timers.first() {
            Some(tcb) => tcb.next_fire,
            None => return,
        };
        let now = self.clock.now_ms();

        {
            let cell = self.wait_cell.lock();
            if cell.waiting && cell.wake_up_time.map(|t| t > front).unwrap_or(false) {
                drop(cell);
                self.wait_condvar.notify_all();
                return;
            }
        }

        let duration_ms = (front - now).max(min_wait_ms);

        {
            let mut cell = self.wait_cell.lock();
            cell.wake_up_time = Some(now + duration_ms);
        }

        let weak_self = self.weak_self();
        let task = crate::task::executable_infallible(
            "fimo.timer",
            crate::module::TIMER_MODULE_NAME,
            move || {
                if let Some(wheel) = weak_self.upgrade() {
                    wheel.run_schedule_task(duration_ms);
                }
            },
        );

        if let Some(manager) = self.manager() {
            manager.post(task);
        } else {
            warn!("no thread manager wired in, timer wheel cannot schedule its wake-up task");
        }
    }
}
