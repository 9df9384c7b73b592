//! Process creation through `CreateProcessW`

use crate::errors::{BridgeError, Result};
use crate::execution::{CommandSpec, ProcessSpawner};
use crate::monitoring::{ExitEvent, StatusRecord, StatusSink};
use crate::transport::Transport;

use log::{debug, error};
use std::ffi::c_void;
use std::io;
use std::os::windows::io::{AsRawHandle, AsRawSocket, FromRawHandle, OwnedHandle};
use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_FAILED};
use windows::Win32::System::Threading::{
    CreateProcessW, GetExitCodeProcess, WaitForSingleObject, INFINITE, PROCESS_CREATION_FLAGS,
    PROCESS_INFORMATION, STARTF_USESHOWWINDOW, STARTF_USESTDHANDLES, STARTUPINFOW,
};
use windows::Win32::UI::WindowsAndMessaging::SW_HIDE;

/// A running child plus the parent's reference to its stdio socket
#[derive(Debug)]
pub struct WindowsProcess {
    process: OwnedHandle,
    pid: u32,
    child_side: Transport,
}

/// Spawns with `CreateProcessW`, hidden window, parent environment
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateProcessSpawner;

/// NUL-terminated UTF-16 buffer; `CreateProcessW` may write into it
pub(crate) fn wide_command_line(command: &CommandSpec) -> Vec<u16> {
    command
        .to_command_line()
        .encode_utf16()
        .chain(std::iter::once(0))
        .collect()
}

impl ProcessSpawner for CreateProcessSpawner {
    type Process = WindowsProcess;

    fn spawn(&self, command: &CommandSpec, child_side: Transport) -> Result<WindowsProcess> {
        let command_line = command.to_command_line();
        let mut wide = wide_command_line(command);

        let stdio = HANDLE(child_side.as_raw_socket() as *mut c_void);
        let startup = STARTUPINFOW {
            cb: std::mem::size_of::<STARTUPINFOW>() as u32,
            dwFlags: STARTF_USESHOWWINDOW | STARTF_USESTDHANDLES,
            wShowWindow: SW_HIDE.0 as u16,
            hStdInput: stdio,
            hStdOutput: stdio,
            hStdError: stdio,
            ..Default::default()
        };
        let mut info = PROCESS_INFORMATION::default();

        // SAFETY: wide is a writable NUL-terminated buffer, startup and info
        // outlive the call, and the stdio socket is open and inheritable
        let created = unsafe {
            CreateProcessW(
                PCWSTR::null(),
                PWSTR(wide.as_mut_ptr()),
                None,
                None,
                true,
                PROCESS_CREATION_FLAGS(0),
                None,
                PCWSTR::null(),
                &startup,
                &mut info,
            )
        };
        // creation failure is surfaced to the caller, not turned into a code
        if let Err(e) = created {
            let err = io::Error::from(e);
            error!(
                target: "external_start",
                "CreateProcess() failed for '{}': {}",
                command_line,
                err
            );
            return Err(BridgeError::SpawnFatal(err));
        }

        // SAFETY: the thread handle is ours and not used again
        unsafe {
            let _ = CloseHandle(info.hThread);
        }
        // SAFETY: the process handle is ours; ownership moves into OwnedHandle
        let process = unsafe { OwnedHandle::from_raw_handle(info.hProcess.0) };

        debug!(
            target: "external_start",
            "Launching external command '{}', pid: {}.",
            command_line,
            info.dwProcessId
        );
        Ok(WindowsProcess {
            process,
            pid: info.dwProcessId,
            child_side,
        })
    }

    fn pid(process: &WindowsProcess) -> u32 {
        process.pid
    }

    fn monitor(process: WindowsProcess, sink: &dyn StatusSink) {
        let WindowsProcess {
            process,
            pid,
            child_side,
        } = process;
        let handle = HANDLE(process.as_raw_handle());

        // SAFETY: handle stays open until `process` drops below
        if unsafe { WaitForSingleObject(handle, INFINITE) } == WAIT_FAILED {
            sink.wait_failed(pid, &io::Error::last_os_error());
        } else {
            let mut code = u32::MAX;
            // SAFETY: as above; code is a valid out pointer
            match unsafe { GetExitCodeProcess(handle, &mut code) } {
                Ok(()) => sink.record(&StatusRecord::now(pid, ExitEvent::Exited(code as i32))),
                Err(e) => sink.wait_failed(pid, &io::Error::from(e)),
            }
        }

        // process handle goes first, then our socket reference
        drop(process);
        drop(child_side);
    }
}
