//! Process creation with `posix_spawn(3)`

use crate::errors::{BridgeError, Result};
use crate::execution::{CommandSpec, ProcessSpawner};
use crate::monitoring::{watch_pid, StatusSink};
use crate::transport::Transport;

use log::{debug, warn};
use nix::unistd::Pid;
use std::io;
use std::mem::MaybeUninit;
use std::os::unix::io::{AsRawFd, RawFd};
use std::ptr;

/// File-action list, destroyed on drop
struct FileActions {
    // boxed so the initialized object never moves
    inner: Box<MaybeUninit<libc::posix_spawn_file_actions_t>>,
}

impl FileActions {
    fn new() -> io::Result<Self> {
        let mut inner = Box::new(MaybeUninit::uninit());
        // SAFETY: inner points to writable storage for the object
        let ret = unsafe { libc::posix_spawn_file_actions_init(inner.as_mut_ptr()) };
        if ret != 0 {
            return Err(io::Error::from_raw_os_error(ret));
        }
        Ok(FileActions { inner })
    }

    fn add_dup2(&mut self, fd: RawFd, target: RawFd) -> io::Result<()> {
        // SAFETY: the object was initialized in new()
        let ret =
            unsafe { libc::posix_spawn_file_actions_adddup2(self.inner.as_mut_ptr(), fd, target) };
        if ret != 0 {
            return Err(io::Error::from_raw_os_error(ret));
        }
        Ok(())
    }

    fn as_ptr(&self) -> *const libc::posix_spawn_file_actions_t {
        self.inner.as_ptr()
    }
}

impl Drop for FileActions {
    fn drop(&mut self) {
        // SAFETY: initialized in new() and destroyed exactly once here
        unsafe {
            libc::posix_spawn_file_actions_destroy(self.inner.as_mut_ptr());
        }
    }
}

/// Spawns with `posix_spawn` and an empty environment
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixSpawner;

impl PosixSpawner {
    fn file_actions(child_fd: RawFd) -> io::Result<FileActions> {
        let mut actions = FileActions::new()?;
        for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
            actions.add_dup2(child_fd, target)?;
        }
        Ok(actions)
    }
}

impl ProcessSpawner for PosixSpawner {
    type Process = Pid;

    fn spawn(&self, command: &CommandSpec, child_side: Transport) -> Result<Pid> {
        let argv = command.to_argv()?;

        let actions = Self::file_actions(child_side.as_raw_fd()).map_err(|e| {
            warn!(target: "external_start", "posix_spawn file actions: {}", e);
            BridgeError::socket("prepare file actions")
        })?;

        let argv_ptrs: Vec<*mut libc::c_char> = argv
            .iter()
            .map(|arg| arg.as_ptr() as *mut libc::c_char)
            .chain(std::iter::once(ptr::null_mut()))
            .collect();
        let envp: [*mut libc::c_char; 1] = [ptr::null_mut()];

        let mut pid: libc::pid_t = 0;
        // SAFETY: argv and envp are NUL-terminated pointer arrays whose strings
        // outlive the call; actions is initialized
        let ret = unsafe {
            libc::posix_spawn(
                &mut pid,
                argv[0].as_ptr(),
                actions.as_ptr(),
                ptr::null(),
                argv_ptrs.as_ptr(),
                envp.as_ptr(),
            )
        };
        if ret != 0 {
            warn!(
                target: "external_start",
                "posix_spawn {}: {}",
                command.program.display(),
                io::Error::from_raw_os_error(ret)
            );
            return Err(BridgeError::socket("posix_spawn"));
        }

        // the child has its own copies on fds 0-2
        drop(child_side);

        debug!(
            target: "external_start",
            "Launching external command '{} {}', pid: {}.",
            command.program.display(),
            command.describe_args(),
            pid
        );
        Ok(Pid::from_raw(pid))
    }

    fn pid(process: &Pid) -> u32 {
        process.as_raw() as u32
    }

    fn monitor(process: Pid, sink: &dyn StatusSink) {
        watch_pid(process, sink);
    }
}
