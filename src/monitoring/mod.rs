//! Monitoring layer: observing bridged processes after spawn
//!
//! # Examples
//!
//! ```ignore
//! use external_bridge::monitoring::{ExitEvent, MemorySink};
//!
//! let sink = MemorySink::new();
//! let record = sink.wait_terminal(pid, Duration::from_secs(5));
//! assert_eq!(record.map(|r| r.event), Some(ExitEvent::Exited(0)));
//! ```

pub mod exit;

#[cfg(unix)]
pub use exit::watch_pid;
pub use exit::{ExitEvent, LogSink, MemorySink, StatusRecord, StatusSink};
