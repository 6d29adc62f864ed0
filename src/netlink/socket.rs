//! Low-level, synchronous netlink socket operations.
//!
//! Unlike the teacher's `tokio`-based socket, this crate is single-threaded
//! and cooperative: the only two operations that ever block are a command
//! `send`+`recv` round trip and a single-message event drain. Both block via
//! a plain `poll(2)` call rather than an async runtime, so the caller's own
//! event loop stays in full control of scheduling.

use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use netlink_sys::{Socket, SocketAddr, protocols};

use super::error::{Error, Result};

/// Netlink protocol families used by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Routing/device hook, used only by the link-name helper.
    Route,
    /// Generic netlink, used for the `team` family itself.
    Generic,
}

impl Protocol {
    fn as_isize(self) -> isize {
        match self {
            Protocol::Route => protocols::NETLINK_ROUTE,
            Protocol::Generic => protocols::NETLINK_GENERIC,
        }
    }
}

/// A synchronous netlink socket.
///
/// The socket itself is always non-blocking at the OS level; blocking
/// semantics (when wanted) are implemented on top with `poll(2)` so that a
/// stuck peer can never hang the whole process past a single `recv`.
pub struct NetlinkSocket {
    socket: Socket,
    seq: AtomicU32,
    pid: u32,
    protocol: Protocol,
}

impl NetlinkSocket {
    /// Create a new netlink socket for the given protocol, bound and ready.
    pub fn new(protocol: Protocol) -> Result<Self> {
        let mut socket = Socket::new(protocol.as_isize())?;
        socket.set_non_blocking(true)?;

        let mut addr = SocketAddr::new(0, 0);
        socket.bind(&addr)?;
        socket.get_address(&mut addr)?;
        let pid = addr.port_number();

        socket.set_ext_ack(true).ok();

        Ok(Self {
            socket,
            seq: AtomicU32::new(1),
            pid,
            protocol,
        })
    }

    /// Get the next sequence number for a request.
    pub fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Get the local port ID assigned by the kernel.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Get the protocol this socket uses.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Subscribe to a multicast group.
    pub fn add_membership(&mut self, group: u32) -> Result<()> {
        self.socket
            .add_membership(group)
            .map_err(|e| Error::MembershipFailed(e.to_string()))
    }

    /// Unsubscribe from a multicast group.
    pub fn drop_membership(&mut self, group: u32) -> Result<()> {
        self.socket
            .drop_membership(group)
            .map_err(|e| Error::MembershipFailed(e.to_string()))
    }

    /// Block until the socket is writable, then send the whole message.
    pub fn send(&self, msg: &[u8]) -> Result<()> {
        loop {
            match self.socket.send(msg, 0) {
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    self.wait(libc::POLLOUT, None)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Block until a message is available and return it.
    ///
    /// Used for the command channel's request/response round trip. This is
    /// one of the two operations in this crate allowed to block.
    pub fn recv_msg(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(32768);
        loop {
            match self.socket.recv(&mut buf, 0) {
                Ok(_n) => return Ok(buf.to_vec()),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    self.wait(libc::POLLIN, None)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Non-blocking receive: returns `Ok(None)` immediately if no message
    /// is pending, instead of waiting.
    ///
    /// Used for the event channel, which a caller drains only after its own
    /// `poll`/`select` loop reports the fd readable.
    pub fn try_recv_msg(&self) -> Result<Option<Vec<u8>>> {
        let mut buf = BytesMut::with_capacity(32768);
        match self.socket.recv(&mut buf, 0) {
            Ok(_n) => Ok(Some(buf.to_vec())),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Wait for the socket to become ready for the given `poll(2)` event
    /// mask, retrying transparently across `EINTR`.
    fn wait(&self, events: libc::c_short, timeout: Option<Duration>) -> Result<()> {
        let timeout_ms = timeout.map(|d| d.as_millis() as libc::c_int).unwrap_or(-1);
        let mut pfd = libc::pollfd {
            fd: self.as_raw_fd(),
            events,
            revents: 0,
        };
        loop {
            let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            if ret >= 0 {
                return Ok(());
            }
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err.into());
        }
    }
}

impl AsRawFd for NetlinkSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

/// Multicast groups for `NETLINK_ROUTE`, used by the link-name helper.
pub mod rtnetlink_groups {
    pub const RTNLGRP_LINK: u32 = 1;
}
