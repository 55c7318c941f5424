use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use log::{error, trace};
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};

use crate::module::ScopedOwnerGuard;
use crate::platform::ThreadId;
use crate::registry::ModuleRegistry;
use crate::task::{Task, TaskKind};
use crate::thread_manager::ThreadManager;

pub type WorkerId = u64;

struct WorkerState {
    queue: Vec<Task>,
}

/// One OS thread and its private FIFO.
///
/// A worker knows nothing about scheduling policy - it just drains whatever
/// the thread manager hands it, in order, and reports back when it runs dry.
pub struct Worker {
    id: WorkerId,
    state: Mutex<WorkerState>,
    condvar: Condvar,
    running: AtomicBool,
    last_active: Mutex<Instant>,
    thread_id: OnceCell<ThreadId>,
}

impl Worker {
    /// Creates the worker's data without starting anything.
    pub fn new(id: WorkerId) -> Arc<Worker> {
        Arc::new(Worker {
            id,
            state: Mutex::new(WorkerState { queue: Vec::new() }),
            condvar: Condvar::new(),
            running: AtomicBool::new(true),
            last_active: Mutex::new(Instant::now()),
            thread_id: OnceCell::new(),
        })
    }

    /// The OS thread this worker ended up running on, once its loop has
    /// started. `None` before that.
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.thread_id.get().copied()
    }

    /// Creates a worker and runs its loop on a freshly spawned background thread.
    pub fn spawn(id: WorkerId, manager: Weak<ThreadManager>, registry: Weak<ModuleRegistry>) -> Arc<Worker> {
        let worker = Worker::new(id);
        worker.clone().launch(manager, registry);
        worker
    }

    /// Starts the background thread for a worker created via `new`.
    pub fn launch(self: Arc<Self>, manager: Weak<ThreadManager>, registry: Weak<ModuleRegistry>) {
        let id = self.id;
        std::thread::Builder::new()
            .name(format!("fimo-worker-{id}"))
            .spawn(move || self.run_loop(manager, registry))
            .expect("failed to spawn worker thread");
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn push(&self, task: Task) {
        let mut state = self.state.lock();
        state.queue.push(task);
        self.condvar.notify_one();
    }

    pub fn push_many(&self, tasks: impl IntoIterator<Item = Task>) {
        let mut state = self.state.lock();
        state.queue.extend(tasks);
        self.condvar.notify_one();
    }

    pub fn exit_later(&self) {
        self.running.store(false, Ordering::SeqCst);
        // Unblocks a worker that is currently waiting on an empty queue.
        self.push(crate::task::executable_infallible("", "", || {}));
    }

    pub fn is_idle_for_long(&self, threshold: Duration) -> bool {
        self.last_active.lock().elapsed() > threshold
    }

    /// Runs the worker loop on whichever thread calls this. Used both by
    /// background workers (via `launch`) and by a worker that occupies the
    /// caller's own thread.
    pub fn run_loop(self: Arc<Self>, manager: Weak<ThreadManager>, registry: Weak<ModuleRegistry>) {
        let _ = self.thread_id.set(crate::platform::current_thread_id());
        loop {
            let batch = {
                let mut state = self.state.lock();
                if state.queue.is_empty() {
                    drop(state);
                    if let Some(manager) = manager.upgrade() {
                        manager.push_idle(self.clone());
                    }
                    state = self.state.lock();
                    self.condvar.wait_while(&mut state, |s| s.queue.is_empty());
                }
                std::mem::take(&mut state.queue)
            };

            if self.run_batch(&batch, &manager, &registry) {
                break;
            }
        }
        trace!("worker {} exiting", self.id);
    }

    /// Runs a drained batch; returns whether the worker should stop.
    ///
    /// A task that panics does not take the worker down with it: the panic
    /// is caught and logged, and the batch continues. A module that can't
    /// handle one task cleanly shouldn't also take out everything else
    /// pinned to the same worker.
    fn run_batch(&self, batch: &[Task], manager: &Weak<ThreadManager>, registry: &Weak<ModuleRegistry>) -> bool {
        for (i, task) in batch.iter().enumerate() {
            let _owner = ScopedOwnerGuard::enter(&task.target);

            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| match task.kind() {
                TaskKind::Executable => task.run(),
                _ => {
                    if let (Some(registry), Some(manager)) = (registry.upgrade(), manager.upgrade()) {
                        registry.dispatch(task, &manager);
                    }
                    false
                }
            }));

            let exit_requested = match outcome {
                Ok(exit_requested) => exit_requested,
                Err(_) => {
                    error!(
                        "task for '{}' (from '{}') panicked, worker {} continues",
                        task.target, task.source, self.id
                    );
                    false
                }
            };

            *self.last_active.lock() = Instant::now();

            if exit_requested || !self.running.load(Ordering::SeqCst) {
                if let Some(manager) = manager.upgrade() {
                    manager.remove_worker(self.id);
                    for tail_task in &batch[i + 1..] {
                        manager.post(tail_task.clone());
                    }
                }
                return true;
            }
        }
        false
    }
}
