use std::fmt;
use std::sync::Arc;

/// Where in the caller's source a task was posted from, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePosition {
    pub file: &'static str,
    pub line: u32,
}

/// Captures `file!()`/`line!()` at the call site, the way the original
/// framework's `source_here` macro captures `__FILE__`/`__LINE__`.
#[macro_export]
macro_rules! source_here {
    () => {
        $crate::task::SourcePosition {
            file: file!(),
            line: line!(),
        }
    };
}

/// Closed set of task shapes. Kept in lock-step with `TaskPayload` so that
/// dispatch can branch on this cheap tag without matching the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Normal,
    Executable,
    Event,
}

/// A runnable unit posted onto a worker.
///
/// An executable task wraps either a fallible closure (returning `true` to
/// request that the worker running it exit) or an infallible one. Both are
/// `Arc`-wrapped so that cloning a task for broadcast never re-executes the
/// closure twice for the price of one logical post - only one of the
/// resulting clones is ever actually run.
#[derive(Clone)]
pub enum ExecutableBody {
    Fallible(Arc<dyn Fn() -> bool + Send + Sync>),
    Infallible(Arc<dyn Fn() + Send + Sync>),
}

impl ExecutableBody {
    /// Runs the closure, returning whether the executing worker should exit.
    pub fn run(&self) -> bool {
        match self {
            ExecutableBody::Fallible(f) => f(),
            ExecutableBody::Infallible(f) => {
                f();
                false
            }
        }
    }
}

impl fmt::Debug for ExecutableBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutableBody::Fallible(_) => f.write_str("ExecutableBody::Fallible(..)"),
            ExecutableBody::Infallible(_) => f.write_str("ExecutableBody::Infallible(..)"),
        }
    }
}

/// The tagged union of everything a `Task` can carry, replacing the
/// polymorphic-clone/downcast hierarchy of the original design.
#[derive(Debug, Clone)]
pub enum TaskPayload {
    Normal(Vec<u8>),
    Executable(ExecutableBody),
    Event(crate::event::EventPayload),
}

/// A message flowing through the dispatch fabric.
///
/// A task is mutable until posted; the dispatcher may overwrite `target`
/// while fanning a broadcast out to individual modules, but otherwise treats
/// a posted task as immutable.
#[derive(Debug, Clone)]
pub struct Task {
    pub source: String,
    pub target: String,
    pub debug_info: String,
    pub position: SourcePosition,
    pub payload: TaskPayload,
}

impl Task {
    pub fn new(source: impl Into<String>, target: impl Into<String>, payload: TaskPayload) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            debug_info: String::new(),
            position: SourcePosition {
                file: "<unknown>",
                line: 0,
            },
            payload,
        }
    }

    pub fn with_position(mut self, position: SourcePosition) -> Self {
        self.position = position;
        self
    }

    pub fn with_debug_info(mut self, info: impl Into<String>) -> Self {
        self.debug_info = info.into();
        self
    }

    pub fn kind(&self) -> TaskKind {
        match self.payload {
            TaskPayload::Normal(_) => TaskKind::Normal,
            TaskPayload::Executable(_) => TaskKind::Executable,
            TaskPayload::Event(_) => TaskKind::Event,
        }
    }

    /// Returns a clone of this task retargeted at `target`, used for
    /// broadcast fan-out.
    pub fn retargeted(&self, target: impl Into<String>) -> Task {
        let mut clone = self.clone();
        clone.target = target.into();
        clone
    }

    /// Runs the task as an executable, returning whether the running worker
    /// should exit. Returns `false` for non-executable tasks - those are
    /// never run directly, only routed through the registry.
    pub fn run(&self) -> bool {
        match &self.payload {
            TaskPayload::Executable(body) => body.run(),
            _ => false,
        }
    }
}

pub(crate) fn executable_infallible<F>(source: impl Into<String>, target: impl Into<String>, f: F) -> Task
where
    F: Fn() + Send + Sync + 'static,
{
    Task::new(
        source,
        target,
        TaskPayload::Executable(ExecutableBody::Infallible(Arc::new(f))),
    )
}

pub(crate) fn executable_fallible<F>(source: impl Into<String>, target: impl Into<String>, f: F) -> Task
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    Task::new(
        source,
        target,
        TaskPayload::Executable(ExecutableBody::Fallible(Arc::new(f))),
    )
}
