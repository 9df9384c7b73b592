//! Execution layer: argument assembly and process creation
//!
//! Two spawners share one contract. `PosixSpawner` uses `posix_spawn(3)` with
//! a file-action list; `CreateProcessSpawner` goes through the Windows process
//! creation API. [`NativeSpawner`] names whichever one the target builds.
//!
//! # Examples
//!
//! ```ignore
//! use external_bridge::execution::{Arguments, CommandSpec};
//!
//! let spec = CommandSpec::assemble(Path::new("/bin/echo"), &Arguments::from("hello world"))?;
//! assert_eq!(spec.args, vec!["hello", "world"]);
//! ```

pub mod args;
#[cfg(unix)]
pub mod spawn_posix;
#[cfg(windows)]
pub mod spawn_windows;

pub use args::{quote_argument, split_words, Arguments, CommandSpec};
#[cfg(unix)]
pub use spawn_posix::PosixSpawner;
#[cfg(windows)]
pub use spawn_windows::{CreateProcessSpawner, WindowsProcess};

use crate::errors::Result;
use crate::monitoring::StatusSink;
use crate::transport::Transport;

#[cfg(unix)]
pub type NativeSpawner = PosixSpawner;
#[cfg(windows)]
pub type NativeSpawner = CreateProcessSpawner;

/// Creates a child whose stdin, stdout and stderr are the given transport
pub trait ProcessSpawner: Send + Sync {
    /// Process record handed to the exit monitor
    type Process: Send + 'static;

    /// Start the child. The spawner takes `child_side`; the parent's copy is
    /// closed right after spawn or, where the platform needs it alive, when the
    /// monitor finishes.
    fn spawn(&self, command: &CommandSpec, child_side: Transport) -> Result<Self::Process>;

    fn pid(process: &Self::Process) -> u32;

    /// Block until the process is gone, reporting transitions to `sink`
    fn monitor(process: Self::Process, sink: &dyn StatusSink);
}
