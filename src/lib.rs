//! external-bridge: external commands as host stream endpoints
//!
//! Starts a command from a host-configured table and bridges its stdin, stdout
//! and stderr to one end of a connected stream pair. The other end becomes a
//! host endpoint, registered with the host's reactor like any network socket.
//! A detached monitor logs the child's state changes until it exits.
//!
//! # Modules
//!
//! - **config**: Command table loaded from host configuration
//! - **execution**: Argument assembly and platform spawners
//! - **endpoint**: Endpoint model and registry interface
//! - **transport**: Stream pairs bridging the child's stdio
//! - **reactor**: Readiness reactor interface
//! - **monitoring**: Exit monitor and status sinks
//! - **controller**: The `start` operation
//!
//! # Example
//!
//! ```ignore
//! use external_bridge::{Arguments, CommandTable, LauncherBuilder, StartRequest};
//!
//! let launcher = LauncherBuilder::new(CommandTable::load(path)?).build();
//! let handle = launcher.start(&mut registry, &mut reactor, StartRequest {
//!     command_index: 1,
//!     arguments: Arguments::from("-u"),
//!     callbacks,
//!     owner,
//! })?;
//! ```

// Core modules
pub mod config;
pub mod errors;

// Layered modules
pub mod endpoint;
pub mod execution;
pub mod monitoring;
pub mod reactor;
pub mod runner;
pub mod security;
pub mod transport;

// Main controller
pub mod controller;

// Public API
pub use config::CommandTable;
pub use controller::{Launcher, LauncherBuilder, StartRequest};
pub use endpoint::{
    BridgeEndpoint, CallbackId, Callbacks, EndpointHandle, EndpointRegistry, OwnerId,
    SlabRegistry,
};
pub use errors::{BridgeError, ErrorCode, Result};
pub use execution::{Arguments, CommandSpec, NativeSpawner, ProcessSpawner};
pub use monitoring::{ExitEvent, LogSink, MemorySink, StatusRecord, StatusSink};
#[cfg(unix)]
pub use reactor::PollReactor;
pub use reactor::{Interest, Reactor, Readiness};
pub use runner::{TaskRunner, ThreadRunner};
pub use security::{AllowAll, DenyAll, OwnerAllowList, SecurityPolicy};
