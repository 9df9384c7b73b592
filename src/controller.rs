//! Starting external commands bridged to host endpoints

use std::sync::Arc;

use log::{debug, error, warn};

use crate::config::CommandTable;
use crate::endpoint::{
    BridgeEndpoint, Callbacks, EndpointHandle, EndpointRegistry, EndpointState, OwnerId,
};
use crate::errors::{BridgeError, ErrorCode, Result};
use crate::execution::{Arguments, CommandSpec, NativeSpawner, ProcessSpawner};
use crate::monitoring::{LogSink, StatusSink};
use crate::reactor::{Interest, Reactor};
use crate::runner::{TaskRunner, ThreadRunner};
use crate::security::{AllowAll, SecurityPolicy};
use crate::transport::{self, RawTransport, TransportPair};

/// One call to start an external command
#[derive(Debug, Clone)]
pub struct StartRequest {
    /// 1-based index into the command table
    pub command_index: i64,
    pub arguments: Arguments,
    pub callbacks: Callbacks,
    pub owner: OwnerId,
}

/// Endpoint slot released on drop unless committed
struct ReservedEndpoint<'a, R: EndpointRegistry + ?Sized> {
    registry: &'a mut R,
    handle: EndpointHandle,
    armed: bool,
}

impl<'a, R: EndpointRegistry + ?Sized> ReservedEndpoint<'a, R> {
    fn allocate(registry: &'a mut R) -> Result<Self> {
        let handle = registry.allocate()?;
        Ok(Self {
            registry,
            handle,
            armed: true,
        })
    }

    fn endpoint_mut(&mut self) -> Result<&mut BridgeEndpoint> {
        let handle = self.handle;
        self.registry.get_mut(handle).ok_or_else(|| {
            error!("registry lost endpoint {} during setup", handle);
            BridgeError::socket("endpoint lookup")
        })
    }

    /// Mark the endpoint live and hand it to the registry for good
    fn commit(mut self, owner: OwnerId) -> EndpointHandle {
        if let Some(endpoint) = self.registry.get_mut(self.handle) {
            endpoint.state = EndpointState::DataTransfer;
        }
        self.registry.mark_owner(owner);
        self.armed = false;
        self.handle
    }
}

impl<R: EndpointRegistry + ?Sized> Drop for ReservedEndpoint<'_, R> {
    fn drop(&mut self) {
        if self.armed {
            debug!("releasing endpoint {}", self.handle);
            // dropping the slot closes the host side
            drop(self.registry.release(self.handle));
        }
    }
}

/// Reactor registration removed on drop unless disarmed
struct Registration<'a, X: Reactor + ?Sized> {
    reactor: &'a mut X,
    handle: EndpointHandle,
    armed: bool,
}

impl<'a, X: Reactor + ?Sized> Registration<'a, X> {
    fn register(
        reactor: &'a mut X,
        handle: EndpointHandle,
        raw: RawTransport,
        interest: Interest,
    ) -> Result<Self> {
        reactor.register(handle, raw, interest).map_err(|e| {
            warn!("reactor registration for endpoint {}: {}", handle, e);
            BridgeError::socket("reactor registration")
        })?;
        Ok(Self {
            reactor,
            handle,
            armed: true,
        })
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<X: Reactor + ?Sized> Drop for Registration<'_, X> {
    fn drop(&mut self) {
        if self.armed {
            self.reactor.deregister(self.handle);
        }
    }
}

/// Starts commands from a fixed table and bridges them to host endpoints
pub struct Launcher<S = NativeSpawner> {
    commands: CommandTable,
    security: Arc<dyn SecurityPolicy>,
    sink: Arc<dyn StatusSink>,
    runner: Arc<dyn TaskRunner>,
    spawner: S,
}

impl<S: ProcessSpawner + 'static> Launcher<S> {
    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    /// Host-facing entry point.
    ///
    /// Returns the endpoint handle, or a negative code when a resource or the
    /// security check failed. Validation failures (and process creation
    /// failures on Windows) come back as `Err`.
    pub fn start<R, X>(&self, registry: &mut R, reactor: &mut X, request: StartRequest) -> Result<i32>
    where
        R: EndpointRegistry + ?Sized,
        X: Reactor + ?Sized,
    {
        let result = self.launch(registry, reactor, request).and_then(|handle| {
            handle.as_raw().ok_or(BridgeError::Resource {
                stage: "report endpoint",
                code: ErrorCode::NoSockets,
            })
        });
        match result {
            Ok(raw) => Ok(raw),
            Err(err) => match err.code() {
                Some(code) => {
                    warn!("external start failed: {}", err);
                    Ok(code.as_raw())
                }
                None => Err(err),
            },
        }
    }

    /// Typed variant of [`Launcher::start`]
    pub fn launch<R, X>(
        &self,
        registry: &mut R,
        reactor: &mut X,
        request: StartRequest,
    ) -> Result<EndpointHandle>
    where
        R: EndpointRegistry + ?Sized,
        X: Reactor + ?Sized,
    {
        let StartRequest {
            command_index,
            arguments,
            callbacks,
            owner,
        } = request;

        if !self.security.may_start_external(owner) {
            return Err(BridgeError::PermissionDenied(format!(
                "owner {} may not start external commands",
                owner.0
            )));
        }

        let program = self.commands.resolve(command_index)?;
        let command = CommandSpec::assemble(program, &arguments)?;

        let mut slot = ReservedEndpoint::allocate(registry)?;
        let handle = slot.handle;
        if handle.as_raw().is_none() {
            warn!("registry handed out endpoint {} past the host range", handle);
            return Err(BridgeError::Resource {
                stage: "allocate endpoint",
                code: ErrorCode::NoSockets,
            });
        }

        let TransportPair { host, child } = TransportPair::new().map_err(|e| {
            warn!("socketpair for endpoint {}: {}", handle, e);
            BridgeError::socket("socketpair")
        })?;
        host.set_nonblocking(true).map_err(|e| {
            warn!("non-blocking mode for endpoint {}: {}", handle, e);
            BridgeError::socket("set non-blocking")
        })?;

        let raw = transport::raw(&host);
        slot.endpoint_mut()?.attach_external(host, callbacks, owner);

        let registration = Registration::register(reactor, handle, raw, Interest::BOTH)?;

        let process = self.spawner.spawn(&command, child)?;

        registration.disarm();
        let handle = slot.commit(owner);
        self.launch_monitor(process);
        Ok(handle)
    }

    fn launch_monitor(&self, process: S::Process) {
        let pid = S::pid(&process);
        let sink = Arc::clone(&self.sink);
        let task = Box::new(move || S::monitor(process, sink.as_ref()));
        if let Err(e) = self.runner.submit(format!("external-{}", pid), task) {
            error!("cannot start exit monitor for pid {}: {}", pid, e);
        }
    }
}

/// Builder for [`Launcher`]
pub struct LauncherBuilder<S = NativeSpawner> {
    commands: CommandTable,
    security: Arc<dyn SecurityPolicy>,
    sink: Arc<dyn StatusSink>,
    runner: Arc<dyn TaskRunner>,
    spawner: S,
}

impl LauncherBuilder<NativeSpawner> {
    pub fn new(commands: CommandTable) -> Self {
        Self {
            commands,
            security: Arc::new(AllowAll),
            sink: Arc::new(LogSink),
            runner: Arc::new(ThreadRunner),
            spawner: NativeSpawner::default(),
        }
    }
}

impl<S> LauncherBuilder<S> {
    pub fn security(mut self, policy: impl SecurityPolicy + 'static) -> Self {
        self.security = Arc::new(policy);
        self
    }

    pub fn status_sink(mut self, sink: impl StatusSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn task_runner(mut self, runner: impl TaskRunner + 'static) -> Self {
        self.runner = Arc::new(runner);
        self
    }

    /// Replace the platform spawner
    pub fn spawner<T>(self, spawner: T) -> LauncherBuilder<T> {
        LauncherBuilder {
            commands: self.commands,
            security: self.security,
            sink: self.sink,
            runner: self.runner,
            spawner,
        }
    }

    pub fn build(self) -> Launcher<S> {
        Launcher {
            commands: self.commands,
            security: self.security,
            sink: self.sink,
            runner: self.runner,
            spawner: self.spawner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{CallbackId, EndpointKind, SlabRegistry};
    use crate::monitoring::{ExitEvent, MemorySink};
    use crate::runner::InlineRunner;
    use crate::security::DenyAll;
    use crate::test_support::RecordingReactor;
    use crate::transport::Transport;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn callbacks() -> Callbacks {
        Callbacks {
            on_read: CallbackId(1),
            on_write: CallbackId(2),
            on_close: Some(CallbackId(3)),
        }
    }

    fn request(index: i64, arguments: Arguments) -> StartRequest {
        StartRequest {
            command_index: index,
            arguments,
            callbacks: callbacks(),
            owner: OwnerId(11),
        }
    }

    fn table() -> CommandTable {
        CommandTable::new([Some("/bin/true"), None])
    }

    /// Spawner that never creates a process
    #[derive(Default, Clone)]
    struct FailingSpawner {
        calls: Arc<AtomicUsize>,
    }

    impl ProcessSpawner for FailingSpawner {
        type Process = u32;

        fn spawn(&self, _command: &CommandSpec, _child_side: Transport) -> Result<u32> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(BridgeError::socket("spawn"))
        }

        fn pid(process: &u32) -> u32 {
            *process
        }

        fn monitor(_process: u32, _sink: &dyn StatusSink) {}
    }

    /// Spawner that pretends to succeed and exits immediately
    #[derive(Default, Clone)]
    struct FakeSpawner {
        commands: Arc<std::sync::Mutex<Vec<CommandSpec>>>,
    }

    impl ProcessSpawner for FakeSpawner {
        type Process = u32;

        fn spawn(&self, command: &CommandSpec, _child_side: Transport) -> Result<u32> {
            self.commands.lock().unwrap().push(command.clone());
            Ok(4242)
        }

        fn pid(process: &u32) -> u32 {
            *process
        }

        fn monitor(process: u32, sink: &dyn StatusSink) {
            sink.record(&crate::monitoring::StatusRecord::now(
                process,
                ExitEvent::Exited(0),
            ));
        }
    }

    #[test]
    fn security_rejection_returns_code_before_validation() {
        let launcher = LauncherBuilder::new(table())
            .security(DenyAll)
            .spawner(FailingSpawner::default())
            .build();
        let mut registry = SlabRegistry::default();
        let mut reactor = RecordingReactor::default();

        // index 99 is invalid, but security is checked first
        let code = launcher
            .start(&mut registry, &mut reactor, request(99, Arguments::from("")))
            .unwrap();
        assert_eq!(code, ErrorCode::Security.as_raw());
        assert_eq!(registry.live(), 0);
    }

    #[test]
    fn bad_index_is_a_hard_failure_before_allocation() {
        let spawner = FailingSpawner::default();
        let launcher = LauncherBuilder::new(table())
            .spawner(spawner.clone())
            .build();
        let mut registry = SlabRegistry::default();
        let mut reactor = RecordingReactor::default();

        for index in [0, 2, 3, -5] {
            let err = launcher
                .start(&mut registry, &mut reactor, request(index, Arguments::from("")))
                .unwrap_err();
            assert!(matches!(err, BridgeError::BadCommandIndex(i) if i == index));
        }
        assert_eq!(registry.live(), 0);
        assert_eq!(reactor.registered_count(), 0);
        assert_eq!(spawner.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn non_string_argument_names_position() {
        let spawner = FailingSpawner::default();
        let launcher = LauncherBuilder::new(table())
            .spawner(spawner.clone())
            .build();
        let mut registry = SlabRegistry::default();
        let mut reactor = RecordingReactor::default();

        let args = Arguments::List(vec![json!("a"), json!("b"), json!(3)]);
        let err = launcher
            .start(&mut registry, &mut reactor, request(1, args))
            .unwrap_err();
        assert!(matches!(err, BridgeError::BadArgument { position: 3 }));
        assert_eq!(registry.live(), 0);
        assert_eq!(spawner.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn exhausted_registry_propagates_its_code() {
        let launcher = LauncherBuilder::new(table())
            .spawner(FailingSpawner::default())
            .build();
        let mut registry = SlabRegistry::with_capacity(0);
        let mut reactor = RecordingReactor::default();

        let code = launcher
            .start(&mut registry, &mut reactor, request(1, Arguments::from("")))
            .unwrap();
        assert_eq!(code, ErrorCode::NoSockets.as_raw());
        assert_eq!(reactor.registered_count(), 0);
    }

    /// Registry whose only slot sits past the range the host can be given
    #[derive(Default)]
    struct OutOfRangeRegistry {
        slot: Option<BridgeEndpoint>,
        released: usize,
    }

    impl EndpointRegistry for OutOfRangeRegistry {
        fn allocate(&mut self) -> Result<EndpointHandle> {
            self.slot = Some(BridgeEndpoint::default());
            Ok(EndpointHandle(EndpointHandle::MAX.0 + 1))
        }

        fn get(&self, _handle: EndpointHandle) -> Option<&BridgeEndpoint> {
            self.slot.as_ref()
        }

        fn get_mut(&mut self, _handle: EndpointHandle) -> Option<&mut BridgeEndpoint> {
            self.slot.as_mut()
        }

        fn release(&mut self, _handle: EndpointHandle) -> Option<BridgeEndpoint> {
            self.released += 1;
            self.slot.take()
        }

        fn mark_owner(&mut self, _owner: OwnerId) {}
    }

    #[test]
    fn out_of_range_handle_is_rejected_at_allocation() {
        let spawner = FailingSpawner::default();
        let launcher = LauncherBuilder::new(table())
            .spawner(spawner.clone())
            .build();
        let mut registry = OutOfRangeRegistry::default();
        let mut reactor = RecordingReactor::default();

        let code = launcher
            .start(&mut registry, &mut reactor, request(1, Arguments::from("")))
            .unwrap();
        assert_eq!(code, ErrorCode::NoSockets.as_raw());
        assert_eq!(registry.released, 1);
        assert!(registry.slot.is_none());
        assert!(reactor.history().is_empty());
        assert_eq!(spawner.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn spawn_failure_unwinds_endpoint_and_registration() {
        let spawner = FailingSpawner::default();
        let launcher = LauncherBuilder::new(table())
            .spawner(spawner.clone())
            .build();
        let mut registry = SlabRegistry::default();
        let mut reactor = RecordingReactor::default();

        let code = launcher
            .start(&mut registry, &mut reactor, request(1, Arguments::from("x")))
            .unwrap();
        assert_eq!(code, ErrorCode::Socket.as_raw());
        assert_eq!(spawner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.live(), 0);
        assert!(!registry.owner_has_channel(OwnerId(11)));
        assert_eq!(reactor.registered_count(), 0);
        assert_eq!(reactor.history().len(), 1);
    }

    #[test]
    fn reactor_failure_unwinds_endpoint() {
        let spawner = FailingSpawner::default();
        let launcher = LauncherBuilder::new(table())
            .spawner(spawner.clone())
            .build();
        let mut registry = SlabRegistry::default();
        let mut reactor = RecordingReactor::failing();

        let code = launcher
            .start(&mut registry, &mut reactor, request(1, Arguments::from("")))
            .unwrap();
        assert_eq!(code, ErrorCode::Socket.as_raw());
        assert_eq!(registry.live(), 0);
        assert_eq!(spawner.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn successful_start_wires_endpoint() {
        let spawner = FakeSpawner::default();
        let sink = MemorySink::new();
        let launcher = LauncherBuilder::new(table())
            .spawner(spawner.clone())
            .status_sink(sink.clone())
            .task_runner(InlineRunner)
            .build();
        let mut registry = SlabRegistry::default();
        let mut reactor = RecordingReactor::default();

        let handle = launcher
            .launch(
                &mut registry,
                &mut reactor,
                request(1, Arguments::from("-n hello")),
            )
            .unwrap();

        let endpoint = registry.get(handle).unwrap();
        assert_eq!(endpoint.kind, EndpointKind::External);
        assert_eq!(endpoint.state, EndpointState::DataTransfer);
        assert_eq!(endpoint.owner, Some(OwnerId(11)));
        assert_eq!(endpoint.callbacks, Some(callbacks()));
        assert!(endpoint.transport.is_some());
        assert!(endpoint.read_buf.is_empty() && endpoint.write_buf.is_empty());
        assert!(registry.owner_has_channel(OwnerId(11)));

        assert_eq!(reactor.interest_of(handle), Some(Interest::BOTH));

        let spawned = spawner.commands.lock().unwrap();
        assert_eq!(spawned[0].program, std::path::Path::new("/bin/true"));
        assert_eq!(spawned[0].args, vec!["-n", "hello"]);

        assert_eq!(sink.records_for(4242).len(), 1);
    }

    #[test]
    fn start_returns_non_negative_handle() {
        let launcher = LauncherBuilder::new(table())
            .spawner(FakeSpawner::default())
            .task_runner(InlineRunner)
            .build();
        let mut registry = SlabRegistry::default();
        let mut reactor = RecordingReactor::default();

        let first = launcher
            .start(&mut registry, &mut reactor, request(1, Arguments::from("")))
            .unwrap();
        let second = launcher
            .start(&mut registry, &mut reactor, request(1, Arguments::from("")))
            .unwrap();
        assert_eq!((first, second), (0, 1));
    }
}
