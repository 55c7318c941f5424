//! An in-process module-task scheduling framework.
//!
//! Application logic is split into named [`module::Module`]s that talk to
//! each other exclusively by posting typed [`task::Task`]s and
//! [`event::EventPayload`]s through a [`thread_manager::ThreadManager`],
//! which multiplexes a bounded worker pool onto them according to each
//! module's [`module::SchedulingPolicy`]. A [`timer::TimerWheel`]
//! self-schedules delayed and periodic work through the same pipeline, and
//! the [`registry::ModuleRegistry`] aggregates module power state into a
//! single framework-wide status.
//!
//! [`framework::FrameworkManager`] composes all of the above into the
//! object application code actually drives; see its docs for the entry
//! points (`run`, `power_up`, `instance`).
//!
//! This crate never installs a logging subscriber itself - wire one
//! (`env_logger`, `pretty_env_logger`, ...) in your binary to see the
//! `trace!`/`debug!`/`info!`/`warn!`/`error!` output every subsystem here
//! emits.

pub mod builtin;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod framework;
pub mod info_registry;
pub mod module;
pub mod platform;
pub mod registry;
pub mod task;
pub mod thread_manager;
pub mod timer;
pub mod worker;

pub use config::SchedulerConfig;
pub use error::{Error, ErrorKind, Result};
pub use event::{EventKind, EventPayload};
pub use framework::FrameworkManager;
pub use module::{Module, ModuleContext, PowerStatus, SchedulingPolicy};
pub use registry::ModuleRegistry;
pub use task::{Task, TaskKind, TaskPayload};
pub use thread_manager::ThreadManager;
pub use timer::TimerId;
