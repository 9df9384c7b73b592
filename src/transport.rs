//! Connected stream pairs bridging a child's stdio to the host
//!
//! On unix the pair is a `socketpair(2)` of Unix stream sockets. Windows has no
//! native socket pair, so a loopback TCP connection stands in for it; its child
//! end is a non-overlapped socket so it can serve as a standard handle.

use std::io;

#[cfg(unix)]
pub type Transport = std::os::unix::net::UnixStream;
#[cfg(unix)]
pub type RawTransport = std::os::unix::io::RawFd;

#[cfg(windows)]
pub type Transport = std::net::TcpStream;
#[cfg(windows)]
pub type RawTransport = std::os::windows::io::RawSocket;

/// Both ends of a freshly created transport
#[derive(Debug)]
pub struct TransportPair {
    /// End kept by the host and registered with the reactor
    pub host: Transport,
    /// End handed to the child as stdin, stdout and stderr
    pub child: Transport,
}

impl TransportPair {
    #[cfg(unix)]
    pub fn new() -> io::Result<Self> {
        let (host, child) = Transport::pair()?;
        Ok(TransportPair { host, child })
    }

    #[cfg(windows)]
    pub fn new() -> io::Result<Self> {
        use std::net::{Ipv4Addr, SocketAddr, TcpListener};

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        let addr = match listener.local_addr()? {
            SocketAddr::V4(addr) => addr,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("loopback listener bound to {}", other),
                ))
            }
        };
        let child = win::connect_plain(addr)?;
        let expected = child.local_addr()?;
        loop {
            let (host, peer) = listener.accept()?;
            // something else on the machine may have raced us to the port
            if peer == expected {
                host.set_nodelay(true)?;
                return Ok(TransportPair { host, child });
            }
        }
    }
}

/// Child-side sockets a process can use as ordinary standard handles
#[cfg(windows)]
mod win {
    use super::Transport;
    use std::io;
    use std::net::SocketAddrV4;
    use std::os::windows::io::{FromRawSocket, RawSocket};
    use windows::Win32::Networking::WinSock::{
        closesocket, connect, WSAGetLastError, WSASocketW, AF_INET, IN_ADDR, IN_ADDR_0,
        IPPROTO_TCP, SOCKADDR, SOCKADDR_IN, SOCK_STREAM,
    };

    /// Connect a socket created without `WSA_FLAG_OVERLAPPED`.
    ///
    /// Standard handles must support synchronous `ReadFile`/`WriteFile`,
    /// which overlapped sockets do not. The socket stays inheritable.
    pub(super) fn connect_plain(addr: SocketAddrV4) -> io::Result<Transport> {
        // SAFETY: plain socket creation; Winsock is already initialized by the
        // listener std created before this call
        let socket = unsafe {
            WSASocketW(AF_INET.0 as i32, SOCK_STREAM.0, IPPROTO_TCP.0, None, 0, 0)
        }
        .map_err(io::Error::from)?;

        let sockaddr = SOCKADDR_IN {
            sin_family: AF_INET,
            sin_port: addr.port().to_be(),
            sin_addr: IN_ADDR {
                S_un: IN_ADDR_0 {
                    S_addr: u32::from(*addr.ip()).to_be(),
                },
            },
            sin_zero: Default::default(),
        };
        // SAFETY: sockaddr is a valid SOCKADDR_IN for the length passed
        let ret = unsafe {
            connect(
                socket,
                &sockaddr as *const SOCKADDR_IN as *const SOCKADDR,
                std::mem::size_of::<SOCKADDR_IN>() as i32,
            )
        };
        if ret != 0 {
            // SAFETY: reads this thread's last Winsock error
            let err = io::Error::from_raw_os_error(unsafe { WSAGetLastError() }.0);
            // SAFETY: socket is open and owned here
            unsafe { closesocket(socket) };
            return Err(err);
        }

        // SAFETY: ownership of the connected socket moves into the stream
        Ok(unsafe { Transport::from_raw_socket(socket.0 as RawSocket) })
    }
}

/// Raw descriptor of a transport, as handed to the reactor
pub fn raw(transport: &Transport) -> RawTransport {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        transport.as_raw_fd()
    }
    #[cfg(windows)]
    {
        use std::os::windows::io::AsRawSocket;
        transport.as_raw_socket()
    }
}
