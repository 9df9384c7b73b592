//! Readiness reactor interface
//!
//! The host owns the real event loop. `PollReactor` is a small `poll(2)`
//! implementation good enough for the command-line tool and tests.

use crate::endpoint::EndpointHandle;
use crate::transport::RawTransport;
use std::io;

/// Readiness a registration is interested in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest {
        readable: true,
        writable: false,
    };
    pub const WRITABLE: Interest = Interest {
        readable: false,
        writable: true,
    };
    pub const BOTH: Interest = Interest {
        readable: true,
        writable: true,
    };
}

/// Event loop that watches endpoint descriptors
pub trait Reactor {
    fn register(
        &mut self,
        handle: EndpointHandle,
        raw: RawTransport,
        interest: Interest,
    ) -> io::Result<()>;

    /// Stop watching an endpoint; unknown handles are ignored
    fn deregister(&mut self, handle: EndpointHandle);
}

/// One readiness notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub handle: EndpointHandle,
    pub readable: bool,
    pub writable: bool,
    /// Peer hung up or the descriptor errored
    pub closed: bool,
}

#[cfg(unix)]
pub use self::poll::PollReactor;

#[cfg(unix)]
mod poll {
    use super::*;
    use log::trace;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy)]
    struct Registration {
        handle: EndpointHandle,
        fd: RawTransport,
        interest: Interest,
    }

    /// Level-triggered reactor over `poll(2)`
    #[derive(Debug, Default)]
    pub struct PollReactor {
        registrations: Vec<Registration>,
    }

    impl PollReactor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn is_registered(&self, handle: EndpointHandle) -> bool {
            self.registrations.iter().any(|r| r.handle == handle)
        }

        pub fn len(&self) -> usize {
            self.registrations.len()
        }

        pub fn is_empty(&self) -> bool {
            self.registrations.is_empty()
        }

        /// Change what an existing registration waits for
        pub fn set_interest(&mut self, handle: EndpointHandle, interest: Interest) -> bool {
            match self.registrations.iter_mut().find(|r| r.handle == handle) {
                Some(reg) => {
                    reg.interest = interest;
                    true
                }
                None => false,
            }
        }

        /// Wait for readiness; `None` blocks until something happens
        pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<Vec<Readiness>> {
            let mut fds: Vec<libc::pollfd> = self
                .registrations
                .iter()
                .map(|r| {
                    let mut events = 0;
                    if r.interest.readable {
                        events |= libc::POLLIN;
                    }
                    if r.interest.writable {
                        events |= libc::POLLOUT;
                    }
                    libc::pollfd {
                        fd: r.fd,
                        events,
                        revents: 0,
                    }
                })
                .collect();

            let timeout_ms = timeout
                .map(|t| i32::try_from(t.as_millis()).unwrap_or(i32::MAX))
                .unwrap_or(-1);

            // SAFETY: fds is a valid, initialized slice for the duration of the call
            let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    return Ok(Vec::new());
                }
                return Err(err);
            }

            let ready: Vec<Readiness> = self
                .registrations
                .iter()
                .zip(&fds)
                .filter(|(_, p)| p.revents != 0)
                .map(|(r, p)| Readiness {
                    handle: r.handle,
                    readable: p.revents & libc::POLLIN != 0,
                    writable: p.revents & libc::POLLOUT != 0,
                    closed: p.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0,
                })
                .collect();
            trace!("poll: {} of {} descriptors ready", ready.len(), fds.len());
            Ok(ready)
        }
    }

    impl Reactor for PollReactor {
        fn register(
            &mut self,
            handle: EndpointHandle,
            raw: RawTransport,
            interest: Interest,
        ) -> io::Result<()> {
            if self.is_registered(handle) {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("endpoint {} already registered", handle),
                ));
            }
            self.registrations.push(Registration {
                handle,
                fd: raw,
                interest,
            });
            Ok(())
        }

        fn deregister(&mut self, handle: EndpointHandle) {
            self.registrations.retain(|r| r.handle != handle);
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::transport::{raw, TransportPair};
        use std::io::Write;

        #[test]
        fn reports_readable_after_write() {
            let mut pair = TransportPair::new().unwrap();
            let mut reactor = PollReactor::new();
            let handle = EndpointHandle(0);
            reactor
                .register(handle, raw(&pair.host), Interest::READABLE)
                .unwrap();

            assert!(reactor
                .poll(Some(Duration::from_millis(0)))
                .unwrap()
                .is_empty());

            pair.child.write_all(b"x").unwrap();
            let ready = reactor.poll(Some(Duration::from_secs(5))).unwrap();
            assert_eq!(ready.len(), 1);
            assert!(ready[0].readable);
            assert_eq!(ready[0].handle, handle);
        }

        #[test]
        fn reports_hangup_when_peer_closes() {
            let pair = TransportPair::new().unwrap();
            let mut reactor = PollReactor::new();
            reactor
                .register(EndpointHandle(1), raw(&pair.host), Interest::READABLE)
                .unwrap();
            drop(pair.child);

            let ready = reactor.poll(Some(Duration::from_secs(5))).unwrap();
            assert_eq!(ready.len(), 1);
            assert!(ready[0].readable || ready[0].closed);
        }

        #[test]
        fn duplicate_registration_is_rejected() {
            let pair = TransportPair::new().unwrap();
            let mut reactor = PollReactor::new();
            let handle = EndpointHandle(2);
            reactor
                .register(handle, raw(&pair.host), Interest::BOTH)
                .unwrap();
            assert!(reactor
                .register(handle, raw(&pair.host), Interest::BOTH)
                .is_err());

            reactor.deregister(handle);
            assert!(reactor.is_empty());
        }

        #[test]
        fn set_interest_only_touches_known_handles() {
            let pair = TransportPair::new().unwrap();
            let mut reactor = PollReactor::new();
            reactor
                .register(EndpointHandle(3), raw(&pair.host), Interest::BOTH)
                .unwrap();
            assert!(reactor.set_interest(EndpointHandle(3), Interest::READABLE));
            assert!(!reactor.set_interest(EndpointHandle(4), Interest::READABLE));
        }
    }
}
