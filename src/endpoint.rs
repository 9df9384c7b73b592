//! Host-visible endpoints and the registry that owns them

use crate::errors::{BridgeError, ErrorCode, Result};
use crate::transport::Transport;
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

/// Index of an endpoint in the host registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointHandle(pub usize);

impl EndpointHandle {
    /// Largest slot index the host can be handed
    pub const MAX: EndpointHandle = EndpointHandle(i32::MAX as usize);

    /// Non-negative value reported to the host, `None` past [`EndpointHandle::MAX`]
    pub fn as_raw(self) -> Option<i32> {
        i32::try_from(self.0).ok()
    }
}

impl fmt::Display for EndpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque host callback identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(pub u64);

/// Identity of the host object that asked for the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(pub u64);

/// Callbacks the host event loop invokes for an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Callbacks {
    pub on_read: CallbackId,
    pub on_write: CallbackId,
    pub on_close: Option<CallbackId>,
}

/// What backs an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndpointKind {
    /// Reserved but not wired yet
    #[default]
    Reserved,
    /// Bridged to an external process
    External,
}

/// Protocol state of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndpointState {
    #[default]
    Unbound,
    DataTransfer,
}

/// Endpoint slot owned by the registry
#[derive(Debug, Default)]
pub struct BridgeEndpoint {
    pub transport: Option<Transport>,
    pub kind: EndpointKind,
    pub state: EndpointState,
    pub owner: Option<OwnerId>,
    pub callbacks: Option<Callbacks>,
    /// No network peer for process-backed endpoints
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
    pub read_buf: Vec<u8>,
    pub write_buf: Vec<u8>,
}

impl BridgeEndpoint {
    /// Wire a reserved slot to the host side of a process bridge.
    ///
    /// The state stays `Unbound` until the process is running.
    pub fn attach_external(&mut self, host: Transport, callbacks: Callbacks, owner: OwnerId) {
        *self = BridgeEndpoint {
            transport: Some(host),
            kind: EndpointKind::External,
            state: EndpointState::Unbound,
            owner: Some(owner),
            callbacks: Some(callbacks),
            local_addr: None,
            remote_addr: None,
            read_buf: Vec::new(),
            write_buf: Vec::new(),
        };
    }

    pub fn is_external(&self) -> bool {
        self.kind == EndpointKind::External
    }
}

/// Host registry allocating and owning endpoints
pub trait EndpointRegistry {
    /// Reserve a free endpoint
    fn allocate(&mut self) -> Result<EndpointHandle>;

    fn get(&self, handle: EndpointHandle) -> Option<&BridgeEndpoint>;

    fn get_mut(&mut self, handle: EndpointHandle) -> Option<&mut BridgeEndpoint>;

    /// Free a slot, returning whatever it held
    fn release(&mut self, handle: EndpointHandle) -> Option<BridgeEndpoint>;

    /// Record that `owner` now holds an externally visible channel
    fn mark_owner(&mut self, owner: OwnerId);
}

/// Fixed-capacity registry backed by a slot vector
#[derive(Debug)]
pub struct SlabRegistry {
    slots: Vec<Option<BridgeEndpoint>>,
    capacity: usize,
    channel_owners: HashSet<OwnerId>,
}

impl SlabRegistry {
    /// Registry holding at most `capacity` endpoints, capped so every
    /// handle fits the host's non-negative range
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            capacity: capacity.min(EndpointHandle::MAX.0 + 1),
            channel_owners: HashSet::new(),
        }
    }

    /// Number of live endpoints
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn owner_has_channel(&self, owner: OwnerId) -> bool {
        self.channel_owners.contains(&owner)
    }

    /// Handles of live endpoints
    pub fn handles(&self) -> Vec<EndpointHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| EndpointHandle(i))
            .collect()
    }
}

impl Default for SlabRegistry {
    fn default() -> Self {
        Self::with_capacity(64)
    }
}

impl EndpointRegistry for SlabRegistry {
    fn allocate(&mut self) -> Result<EndpointHandle> {
        if let Some(i) = self.slots.iter().position(Option::is_none) {
            self.slots[i] = Some(BridgeEndpoint::default());
            return Ok(EndpointHandle(i));
        }
        if self.slots.len() < self.capacity {
            self.slots.push(Some(BridgeEndpoint::default()));
            return Ok(EndpointHandle(self.slots.len() - 1));
        }
        Err(BridgeError::Resource {
            stage: "allocate endpoint",
            code: ErrorCode::NoSockets,
        })
    }

    fn get(&self, handle: EndpointHandle) -> Option<&BridgeEndpoint> {
        self.slots.get(handle.0).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, handle: EndpointHandle) -> Option<&mut BridgeEndpoint> {
        self.slots.get_mut(handle.0).and_then(Option::as_mut)
    }

    fn release(&mut self, handle: EndpointHandle) -> Option<BridgeEndpoint> {
        self.slots.get_mut(handle.0).and_then(Option::take)
    }

    fn mark_owner(&mut self, owner: OwnerId) {
        self.channel_owners.insert(owner);
    }
}
