//! Thin platform helpers: native thread ids and thread naming.
//!
//! The scheduling core only ever needs an opaque, comparable identifier for
//! "the thread a sequential module is pinned to" - it never needs to signal
//! or join that thread through this id. `std::thread::ThreadId` already
//! provides exactly that, so no raw `gettid`-style FFI is needed here.

pub type ThreadId = std::thread::ThreadId;

pub fn current_thread_id() -> ThreadId {
    std::thread::current().id()
}

pub fn name_current_thread(name: &str) {
    // Rust threads can only be named at spawn time; this is a best-effort
    // hint for loggers/debuggers that inspect the thread-local name via
    // std::thread::current().name(), which is already set by Worker's
    // use of std::thread::Builder::name.
    let _ = name;
}
