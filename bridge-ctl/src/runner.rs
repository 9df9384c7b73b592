use console::style;
use external_bridge::{
    Arguments, CallbackId, Callbacks, CommandTable, EndpointHandle, ExitEvent, LauncherBuilder,
    MemorySink, OwnerId, StartRequest,
};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::time::Duration;

/// How long to wait for the exit status once the stream has closed
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Configuration for a bridged run
pub struct RunConfig {
    pub config: PathBuf,
    pub index: i64,
    pub line: Option<String>,
    pub json: Option<String>,
    pub args: Vec<String>,
}

impl RunConfig {
    /// Arguments in the form the user picked
    pub fn arguments(&self) -> Result<Arguments, Box<dyn std::error::Error>> {
        if let Some(json) = &self.json {
            let value: serde_json::Value = serde_json::from_str(json)?;
            return Ok(Arguments::from_value(value)?);
        }
        if let Some(line) = &self.line {
            return Ok(Arguments::Line(line.clone()));
        }
        Ok(Arguments::from(self.args.clone()))
    }
}

/// Shell-style exit code for a terminal event
pub fn exit_code(event: ExitEvent) -> i32 {
    match event {
        ExitEvent::Exited(code) => code,
        ExitEvent::Signaled(signal) => 128 + signal,
        ExitEvent::Stopped(_) | ExitEvent::Continued => 0,
    }
}

#[cfg_attr(not(unix), allow(dead_code))]
fn start_request(config: &RunConfig, arguments: Arguments) -> StartRequest {
    StartRequest {
        command_index: config.index,
        arguments,
        callbacks: Callbacks {
            on_read: CallbackId(1),
            on_write: CallbackId(2),
            on_close: Some(CallbackId(3)),
        },
        owner: OwnerId(u64::from(std::process::id())),
    }
}

/// Start the configured command and pump this terminal through its endpoint.
///
/// Returns the child's exit code.
#[cfg(unix)]
pub fn run_bridged(config: RunConfig) -> Result<i32, Box<dyn std::error::Error>> {
    use external_bridge::{EndpointRegistry, Interest, PollReactor, Reactor, SlabRegistry};
    use std::io::{ErrorKind, Read, Write};
    use std::net::Shutdown;

    // stdin shares the reactor under a handle the registry never hands out
    const STDIN: EndpointHandle = EndpointHandle(usize::MAX);

    let table = CommandTable::load(&config.config)?;
    debug!(
        "Loaded {} command entries from {}",
        table.len(),
        config.config.display()
    );
    let arguments = config.arguments()?;
    debug!("Arguments: {}", arguments.describe());

    let sink = MemorySink::new();
    let launcher = LauncherBuilder::new(table)
        .status_sink(sink.clone())
        .build();
    let mut registry = SlabRegistry::with_capacity(1);
    let mut reactor = PollReactor::new();

    let raw = launcher.start(
        &mut registry,
        &mut reactor,
        start_request(&config, arguments),
    )?;
    if raw < 0 {
        return Err(format!("start failed with code {}", raw).into());
    }
    let handle = EndpointHandle(raw as usize);
    info!("Command {} bridged on endpoint {}", config.index, handle);

    reactor.set_interest(handle, Interest::READABLE);
    reactor.register(STDIN, libc::STDIN_FILENO, Interest::READABLE)?;

    let mut stream = registry
        .get(handle)
        .and_then(|endpoint| endpoint.transport.as_ref())
        .ok_or("endpoint lost its transport")?;
    let mut stdout = std::io::stdout();
    let mut pending: Vec<u8> = Vec::new();
    let mut stdin_open = true;
    let mut buf = [0u8; 4096];

    'pump: loop {
        for ready in reactor.poll(None)? {
            if ready.handle == STDIN {
                // SAFETY: buf is valid for buf.len() bytes and fd 0 stays open
                let n = unsafe {
                    libc::read(
                        libc::STDIN_FILENO,
                        buf.as_mut_ptr() as *mut libc::c_void,
                        buf.len(),
                    )
                };
                if n < 0 {
                    let err = std::io::Error::last_os_error();
                    if err.kind() == ErrorKind::Interrupted {
                        continue;
                    }
                    return Err(err.into());
                }
                if n == 0 {
                    debug!("stdin closed");
                    stdin_open = false;
                    reactor.deregister(STDIN);
                    if pending.is_empty() {
                        stream.shutdown(Shutdown::Write)?;
                    }
                } else {
                    pending.extend_from_slice(&buf[..n as usize]);
                    reactor.set_interest(handle, Interest::BOTH);
                }
                continue;
            }

            if ready.handle != handle {
                continue;
            }

            if ready.readable || ready.closed {
                match stream.read(&mut buf) {
                    Ok(0) => break 'pump,
                    Ok(n) => {
                        stdout.write_all(&buf[..n])?;
                        stdout.flush()?;
                    }
                    Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
                    Err(e) => return Err(e.into()),
                }
            }

            if ready.writable && !pending.is_empty() {
                match stream.write(&pending) {
                    Ok(n) => {
                        pending.drain(..n);
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                    Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                        warn!("command stopped reading its input");
                        pending.clear();
                    }
                    Err(e) => return Err(e.into()),
                }
                if pending.is_empty() {
                    reactor.set_interest(handle, Interest::READABLE);
                    if !stdin_open {
                        stream.shutdown(Shutdown::Write)?;
                    }
                }
            }
        }
    }

    reactor.deregister(STDIN);
    reactor.deregister(handle);
    drop(registry.release(handle));

    let finished = sink.wait_until(EXIT_GRACE, |records| {
        records.iter().any(|r| r.event.is_terminal())
    });
    let status = sink
        .records()
        .into_iter()
        .rev()
        .find(|r| r.event.is_terminal());
    match status {
        Some(record) if finished => {
            debug!("{}", record);
            Ok(exit_code(record.event))
        }
        _ => {
            eprintln!(
                "{} no exit status within {}s",
                style("warning:").yellow().bold(),
                EXIT_GRACE.as_secs()
            );
            Ok(0)
        }
    }
}

#[cfg(not(unix))]
pub fn run_bridged(config: RunConfig) -> Result<i32, Box<dyn std::error::Error>> {
    config.arguments()?;
    Err("interactive bridging needs a poll(2) reactor and is only available on unix".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RunConfig {
        RunConfig {
            config: PathBuf::from("commands.json"),
            index: 1,
            line: None,
            json: None,
            args: Vec::new(),
        }
    }

    #[test]
    fn json_arguments_take_precedence() {
        let config = RunConfig {
            json: Some(r#"["-c", "exit 3"]"#.to_string()),
            args: vec!["ignored".to_string()],
            ..config()
        };
        assert!(matches!(config.arguments().unwrap(), Arguments::List(items) if items.len() == 2));
    }

    #[test]
    fn json_object_is_rejected() {
        let config = RunConfig {
            json: Some(r#"{"a": 1}"#.to_string()),
            ..config()
        };
        assert!(config.arguments().is_err());
    }

    #[test]
    fn line_and_list_forms() {
        let line = RunConfig {
            line: Some("-c date".to_string()),
            ..config()
        };
        assert_eq!(
            line.arguments().unwrap(),
            Arguments::Line("-c date".to_string())
        );

        let list = RunConfig {
            args: vec!["a b".to_string()],
            ..config()
        };
        assert_eq!(list.arguments().unwrap(), Arguments::from(vec!["a b"]));
    }

    #[test]
    fn exit_codes_follow_shell_convention() {
        assert_eq!(exit_code(ExitEvent::Exited(7)), 7);
        assert_eq!(exit_code(ExitEvent::Signaled(9)), 137);
    }

    #[test]
    fn request_carries_index_and_close_callback() {
        let request = start_request(&config(), Arguments::from(""));
        assert_eq!(request.command_index, 1);
        assert_eq!(request.callbacks.on_close, Some(CallbackId(3)));
    }
}
