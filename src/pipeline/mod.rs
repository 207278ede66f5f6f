//! Polling pipeline.
//!
//! - `diff`: pure snapshot comparison
//! - `retry`: bounded retries with per-attempt timeouts
//! - `monitor`: one polling cycle over every target
//! - `schedule`: recurring trigger and graceful shutdown

pub mod diff;
pub mod monitor;
pub mod retry;
pub mod schedule;

pub use diff::{ChangeDetector, ChangeKind, ChangeReason, ChangeResult, ValueComparator};
pub use monitor::{CycleEvent, CycleReport, Monitor, MonitorState, TargetReport};
pub use retry::RetryPolicy;
pub use schedule::{Trigger, run_scheduled, shutdown_signal};
