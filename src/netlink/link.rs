//! Link-name helper: resolves between interface names and `ifindex` values.
//!
//! This is a thin, lazily-opened RTNetlink client. It exists only to answer
//! `ifname2ifindex`/`ifindex2ifname`, so it speaks just enough of the
//! `RTM_GETLINK` protocol to read back `IFLA_IFNAME` for a dump or a single
//! indexed lookup. The socket is opened on first use rather than at
//! `Handle::alloc` time, and is one of the three sockets a `Handle` must
//! release on `free`.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::attr::{AttrIter, get};
use super::builder::MessageBuilder;
use super::error::{Error, Result};
use super::message::{
    MessageIter, NLM_F_DUMP, NLM_F_REQUEST, NlMsgError, NlMsgType, attrs_after,
};
use super::socket::{NetlinkSocket, Protocol};

const IFLA_IFNAME: u16 = 3;

/// Fixed header at the start of every `RTM_*LINK` message (struct ifinfomsg).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct IfInfoMsg {
    ifi_family: u8,
    __pad: u8,
    ifi_type: u16,
    ifi_index: i32,
    ifi_flags: u32,
    ifi_change: u32,
}

const IFINFOMSG_LEN: usize = std::mem::size_of::<IfInfoMsg>();

/// Lazily-opened route-netlink client for name/index resolution.
pub struct LinkResolver {
    socket: Option<NetlinkSocket>,
}

impl LinkResolver {
    /// Create a resolver that has not yet opened its socket.
    pub fn new() -> Self {
        Self { socket: None }
    }

    fn socket(&mut self) -> Result<&NetlinkSocket> {
        if self.socket.is_none() {
            self.socket = Some(NetlinkSocket::new(Protocol::Route)?);
        }
        Ok(self.socket.as_ref().expect("just initialized"))
    }

    /// Resolve an interface name to its `ifindex`, or `None` if not found.
    pub fn ifname2ifindex(&mut self, name: &str) -> Result<Option<u32>> {
        for (ifindex, ifname) in self.dump_links()? {
            if ifname == name {
                return Ok(Some(ifindex));
            }
        }
        Ok(None)
    }

    /// Resolve an `ifindex` to its interface name, or `None` if not found.
    pub fn ifindex2ifname(&mut self, ifindex: u32) -> Result<Option<String>> {
        for (idx, ifname) in self.dump_links()? {
            if idx == ifindex {
                return Ok(Some(ifname));
            }
        }
        Ok(None)
    }

    fn dump_links(&mut self) -> Result<Vec<(u32, String)>> {
        let socket = self.socket()?;

        let mut builder = MessageBuilder::new(NlMsgType::RTM_GETLINK, NLM_F_REQUEST | NLM_F_DUMP);
        builder.append(&IfInfoMsg::default());

        let seq = socket.next_seq();
        builder.set_seq(seq);
        builder.set_pid(socket.pid());

        socket.send(&builder.finish())?;

        let mut links = Vec::new();
        loop {
            let data = socket.recv_msg()?;
            let mut done = false;

            for result in MessageIter::new(&data) {
                let (header, payload) = result?;

                if header.nlmsg_seq != seq {
                    continue;
                }
                if header.is_error() {
                    let err = NlMsgError::from_bytes(payload)?;
                    if !err.is_ack() {
                        return Err(Error::from_errno(-err.error));
                    }
                    continue;
                }
                if header.is_done() {
                    done = true;
                    break;
                }
                if payload.len() < IFINFOMSG_LEN {
                    continue;
                }

                let info = IfInfoMsg::ref_from_prefix(payload)
                    .map(|(r, _)| r)
                    .map_err(|_| Error::Truncated {
                        expected: IFINFOMSG_LEN,
                        actual: payload.len(),
                    })?;

                for (attr_type, attr_payload) in attrs_after(payload, IFINFOMSG_LEN) {
                    if attr_type == IFLA_IFNAME {
                        let name = get::string(attr_payload)?.to_string();
                        links.push((info.ifi_index as u32, name));
                        break;
                    }
                }
            }

            if done {
                break;
            }
        }

        Ok(links)
    }
}

impl Default for LinkResolver {
    fn default() -> Self {
        Self::new()
    }
}
