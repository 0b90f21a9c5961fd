//! Async runtime around `fim-core`: OS notifications, the debounce
//! pipeline, the periodic audit loop, the baseline coordinator, and the
//! reporting sinks used by the `fim` binary.

pub mod audit_log;
pub mod audit_loop;
pub mod coordinator;
pub mod logging;
pub mod pipeline;
pub mod reporting;
pub mod watch;
pub mod watcher;

pub use audit_log::{AuditEntry, AuditLog, ChainStatus, Severity};
pub use reporting::{FanoutSink, TracingSink};
pub use watch::{Notifications, WatchHandle, WatchLoop, WatchMode};
pub use watcher::{FileWatcher, WatchSignal};
