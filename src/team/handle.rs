//! The Handle Facade: the library's one long-lived, stateful object.
//!
//! A `Handle` owns the command socket, the event socket, the lazy
//! route-netlink link resolver, the port/option cache, and the change
//! dispatcher. It drives `init`'s synchronous refreshes and the
//! application's event pump (`process_event`/`check_events`).

use std::os::unix::io::RawFd;

use tracing::{debug, warn};

use crate::netlink::builder::MessageBuilder;
use crate::netlink::error::{Error, Result};
use crate::netlink::genl::{self, FamilyInfo};
use crate::netlink::header::GENL_HDRLEN;
use crate::netlink::link::LinkResolver;
use crate::netlink::message::{MessageIter, NlMsgError};
use crate::netlink::socket::{NetlinkSocket, Protocol};

use super::cache::{OptionList, OptionValue, Port, PortList, TeamOption};
use super::codec::{decode_option_list, decode_port_list, encode_get_request, encode_option_set};
use super::dispatcher::{ChangeType, Dispatcher, HandlerId};
use super::{
    ACTIVE_PORT_OPTION_NAME, MODE_OPTION_NAME, TEAM_GENL_CHANGE_EVENT_MC_GRP_NAME, TEAM_GENL_NAME,
    TeamCmd,
};

/// Blocking request/reply transport used for commands.
///
/// `exchange` sends one request and pumps replies until an ack, a finish,
/// or a kernel-reported error terminates the in-flight request, returning
/// every well-formed payload seen along the way.
pub trait CommandChannel {
    /// Resolve a generic netlink family by name.
    fn resolve_family(&mut self, name: &str) -> Result<FamilyInfo>;
    /// Send `builder` and collect every valid reply payload.
    fn exchange(&mut self, builder: MessageBuilder) -> Result<Vec<Vec<u8>>>;
}

/// Non-blocking multicast transport used for unsolicited change events.
pub trait EventChannel {
    /// Read at most one pending datagram, or `None` if nothing is ready.
    fn try_recv(&mut self) -> std::io::Result<Option<Vec<u8>>>;
    /// The underlying file descriptor, exposed read-only for external
    /// poll-loop integration.
    fn as_raw_fd(&self) -> RawFd;
    /// Subscribe to a multicast group.
    fn add_membership(&mut self, group: u32) -> std::io::Result<()>;
}

struct RealCommandChannel {
    socket: NetlinkSocket,
}

impl CommandChannel for RealCommandChannel {
    fn resolve_family(&mut self, name: &str) -> Result<FamilyInfo> {
        genl::resolve_family(&self.socket, name)
    }

    fn exchange(&mut self, mut builder: MessageBuilder) -> Result<Vec<Vec<u8>>> {
        let seq = self.socket.next_seq();
        builder.set_seq(seq);
        builder.set_pid(self.socket.pid());
        let request = builder.finish();

        self.socket.send(&request)?;

        let mut payloads = Vec::new();
        loop {
            let data = self.socket.recv_msg()?;
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
                    done = true;
                    break;
                }

                if header.is_done() {
                    done = true;
                    break;
                }

                payloads.push(payload.to_vec());
            }

            if done {
                break;
            }
        }

        Ok(payloads)
    }
}

struct RealEventChannel {
    socket: NetlinkSocket,
}

impl EventChannel for RealEventChannel {
    fn try_recv(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        match self.socket.try_recv_msg() {
            Ok(v) => Ok(v),
            Err(Error::Io(e)) => Err(e),
            Err(e) => Err(std::io::Error::other(e.to_string())),
        }
    }

    fn as_raw_fd(&self) -> RawFd {
        use std::os::unix::io::AsRawFd;
        self.socket.as_raw_fd()
    }

    fn add_membership(&mut self, group: u32) -> std::io::Result<()> {
        self.socket
            .add_membership(group)
            .map_err(|e| std::io::Error::other(e.to_string()))
    }
}

/// The library's opaque, long-lived handle to one team device.
pub struct Handle {
    family_id: u16,
    ifindex: u32,
    cmd: Box<dyn CommandChannel>,
    evt: Box<dyn EventChannel>,
    link: LinkResolver,
    ports: PortList,
    options: OptionList,
    dispatcher: Dispatcher,
}

impl Handle {
    /// Allocate a handle: opens the command and event sockets and
    /// initializes empty caches. Returns `None` if any sub-step fails, in
    /// which case nothing partially-initialized escapes.
    pub fn alloc() -> Option<Handle> {
        let cmd_socket = NetlinkSocket::new(Protocol::Generic).ok()?;
        let evt_socket = NetlinkSocket::new(Protocol::Generic).ok()?;

        Some(Self::with_channels(
            Box::new(RealCommandChannel { socket: cmd_socket }),
            Box::new(RealEventChannel { socket: evt_socket }),
        ))
    }

    fn with_channels(cmd: Box<dyn CommandChannel>, evt: Box<dyn EventChannel>) -> Handle {
        Handle {
            family_id: 0,
            ifindex: 0,
            cmd,
            evt,
            link: LinkResolver::new(),
            ports: PortList::new(),
            options: OptionList::new(),
            dispatcher: Dispatcher::new(),
        }
    }

    /// Bind the handle to a team device and perform the initial refresh.
    ///
    /// Returns `0` on success or a negative errno. The handle remains safe
    /// to `free` regardless of where initialization failed.
    pub fn init(&mut self, ifindex: u32) -> i32 {
        if ifindex == 0 {
            warn!(ifindex, "rejecting invalid ifindex");
            return Error::InvalidIfindex(ifindex).to_errno();
        }

        let family = match self.cmd.resolve_family(TEAM_GENL_NAME) {
            Ok(f) => f,
            Err(Error::FamilyNotFound { .. }) => return -libc::ENOENT,
            Err(Error::Kernel { errno, .. }) => return -errno,
            Err(_) => return -libc::ENOTSUP,
        };
        self.family_id = family.id;

        let group_id = match family.mcast_groups.get(TEAM_GENL_CHANGE_EVENT_MC_GRP_NAME) {
            Some(id) => *id,
            None => {
                return Error::GroupNotFound {
                    family: TEAM_GENL_NAME.into(),
                    name: TEAM_GENL_CHANGE_EVENT_MC_GRP_NAME.into(),
                }
                .to_errno();
            }
        };

        if self.evt.add_membership(group_id).is_err() {
            return -libc::EINVAL;
        }

        self.ifindex = ifindex;

        if let Err(e) = self.refresh_ports() {
            return match e {
                Error::Kernel { errno, .. } => -errno,
                _ => -libc::EINVAL,
            };
        }
        if let Err(e) = self.refresh_options() {
            return match e {
                Error::Kernel { errno, .. } => -errno,
                _ => -libc::EINVAL,
            };
        }

        0
    }

    /// Release all owned resources. Safe to call after any subset of
    /// `alloc`/`init` steps, including a failed `init`.
    pub fn free(mut self) {
        self.dispatcher.clear();
    }

    /// The event socket's file descriptor, for external poll-loop
    /// integration. Read-only: the handle never exposes a way to write to
    /// this socket.
    pub fn event_fd(&self) -> RawFd {
        self.evt.as_raw_fd()
    }

    /// Drain and dispatch exactly one multicast event, then fire every
    /// handler left pending by it (class `ALL`, so any class fires).
    pub fn process_event(&mut self) {
        let Ok(Some(data)) = self.evt.try_recv() else {
            return;
        };
        self.ingest_event(&data);
        self.dispatcher
            .fire(ChangeType::All, &self.ports, &self.options);
    }

    /// Convenience drain: non-blocking poll on the event fd, calling
    /// `process_event` while readable. Retries across `EINTR`.
    pub fn check_events(&mut self) {
        loop {
            let mut pfd = libc::pollfd {
                fd: self.evt.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            let ret = unsafe { libc::poll(&mut pfd, 1, 0) };
            if ret < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return;
            }
            if ret == 0 || pfd.revents & libc::POLLIN == 0 {
                return;
            }
            self.process_event();
        }
    }

    fn ingest_event(&mut self, data: &[u8]) {
        for result in MessageIter::new(data) {
            let Ok((header, payload)) = result else {
                continue;
            };
            if header.is_error() || header.is_done() {
                continue;
            }
            if payload.len() < GENL_HDRLEN {
                continue;
            }

            let genl_hdr = match crate::netlink::header::GenlMsgHdr::from_bytes(payload) {
                Ok(h) => h,
                Err(_) => continue,
            };
            let attrs_data = &payload[GENL_HDRLEN..];

            match genl_hdr.cmd {
                c if c == TeamCmd::PortListGet as u8 => {
                    if let Some(ports) = decode_port_list(attrs_data, self.ifindex) {
                        self.ports.replace(ports);
                        self.dispatcher.mark(ChangeType::Port);
                    }
                }
                c if c == TeamCmd::OptionsGet as u8 => {
                    if let Some(options) = decode_option_list(attrs_data, self.ifindex) {
                        self.options.replace(options);
                        self.dispatcher.mark(ChangeType::Option);
                    }
                }
                other => {
                    debug!(cmd = other, "ignoring unrecognized team event command");
                }
            }
        }
    }

    fn refresh_ports(&mut self) -> Result<()> {
        let builder = encode_get_request(self.family_id, TeamCmd::PortListGet, self.ifindex);
        let payloads = self.cmd.exchange(builder)?;

        let mut merged: Option<Vec<Port>> = None;
        for payload in payloads {
            if payload.len() < GENL_HDRLEN {
                continue;
            }
            if let Some(ports) = decode_port_list(&payload[GENL_HDRLEN..], self.ifindex) {
                merged = Some(ports);
            }
        }

        if let Some(ports) = merged {
            self.ports.replace(ports);
            self.dispatcher.mark(ChangeType::Port);
            self.dispatcher
                .fire(ChangeType::Port, &self.ports, &self.options);
        }
        Ok(())
    }

    fn refresh_options(&mut self) -> Result<()> {
        let builder = encode_get_request(self.family_id, TeamCmd::OptionsGet, self.ifindex);
        let payloads = self.cmd.exchange(builder)?;

        let mut merged: Option<Vec<TeamOption>> = None;
        for payload in payloads {
            if payload.len() < GENL_HDRLEN {
                continue;
            }
            if let Some(options) = decode_option_list(&payload[GENL_HDRLEN..], self.ifindex) {
                merged = Some(options);
            }
        }

        if let Some(options) = merged {
            self.options.replace(options);
            self.dispatcher.mark(ChangeType::Option);
            self.dispatcher
                .fire(ChangeType::Option, &self.ports, &self.options);
        }
        Ok(())
    }

    /// Cursor iteration over the cached port list.
    pub fn get_next_port<'a>(&'a self, prev: Option<&Port>) -> Option<&'a Port> {
        self.ports.get_next(prev)
    }

    /// Cursor iteration over the cached option list.
    pub fn get_next_option<'a>(&'a self, prev: Option<&TeamOption>) -> Option<&'a TeamOption> {
        self.options.get_next(prev)
    }

    /// Register a change handler. Fails with `-EEXIST` if `id` is already
    /// registered.
    pub fn register_change_handler<F>(&mut self, id: HandlerId, class: ChangeType, callback: F) -> i32
    where
        F: FnMut(&PortList, &OptionList, ChangeType) + 'static,
    {
        match self.dispatcher.register(id, class, Box::new(callback)) {
            Ok(()) => 0,
            Err(e) => e.to_errno(),
        }
    }

    /// Unregister a change handler. A no-op if `id` is unknown.
    pub fn unregister_change_handler(&mut self, id: HandlerId) {
        self.dispatcher.unregister(id);
    }

    /// Look up an option by name.
    pub fn get_option_by_name(&self, name: &str) -> Option<&TeamOption> {
        self.options.get_by_name(name)
    }

    /// Typed lookup: the named option's value as a `u32`.
    ///
    /// Returns `-ENOENT` if no option with this name is cached, or
    /// `-EINVAL` if it is cached but holds a STRING value instead.
    pub fn get_option_value_by_name_u32(&self, name: &str) -> std::result::Result<u32, i32> {
        let option = self
            .options
            .get_by_name(name)
            .ok_or_else(|| Error::UnknownOption(name.to_string()).to_errno())?;
        option.value_u32().ok_or_else(|| {
            Error::OptionTypeMismatch {
                name: name.to_string(),
                wanted: "u32",
            }
            .to_errno()
        })
    }

    /// Typed lookup: the named option's value as a string.
    ///
    /// Returns `-ENOENT` if no option with this name is cached, or
    /// `-EINVAL` if it is cached but holds a U32 value instead.
    pub fn get_option_value_by_name_string(&self, name: &str) -> std::result::Result<&str, i32> {
        let option = self
            .options
            .get_by_name(name)
            .ok_or_else(|| Error::UnknownOption(name.to_string()).to_errno())?;
        option.value_string().ok_or_else(|| {
            Error::OptionTypeMismatch {
                name: name.to_string(),
                wanted: "string",
            }
            .to_errno()
        })
    }

    /// Encode and send an option-set request for a `u32`-valued option.
    /// Does not update the local cache; the cache only updates once the
    /// kernel echoes the change via an event.
    pub fn set_option_value_by_name_u32(&mut self, name: &str, value: u32) -> i32 {
        self.set_option_value(name, OptionValue::U32(value))
    }

    /// Encode and send an option-set request for a `STRING`-valued option.
    pub fn set_option_value_by_name_string(&mut self, name: &str, value: &str) -> i32 {
        self.set_option_value(name, OptionValue::Str(value.to_string()))
    }

    fn set_option_value(&mut self, name: &str, value: OptionValue) -> i32 {
        let builder = match encode_option_set(self.family_id, self.ifindex, name, &value) {
            Ok(b) => b,
            Err(e) => return e.to_errno(),
        };
        match self.cmd.exchange(builder) {
            Ok(_) => 0,
            Err(e) => e.to_errno(),
        }
    }

    /// Alias for the `mode` STRING option.
    pub fn get_mode_name(&self) -> Option<&str> {
        self.options.get_by_name(MODE_OPTION_NAME).and_then(|o| o.value_string())
    }

    /// Alias for setting the `mode` STRING option.
    pub fn set_mode_name(&mut self, mode: &str) -> i32 {
        self.set_option_value_by_name_string(MODE_OPTION_NAME, mode)
    }

    /// Alias for the `activeport` U32 option.
    pub fn get_active_port(&self) -> Option<u32> {
        self.options
            .get_by_name(ACTIVE_PORT_OPTION_NAME)
            .and_then(|o| o.value_u32())
    }

    /// Alias for setting the `activeport` U32 option.
    pub fn set_active_port(&mut self, ifindex: u32) -> i32 {
        self.set_option_value_by_name_u32(ACTIVE_PORT_OPTION_NAME, ifindex)
    }

    /// Resolve an interface name to its ifindex via the lazy route-netlink
    /// helper.
    pub fn ifname2ifindex(&mut self, name: &str) -> Option<u32> {
        self.link.ifname2ifindex(name).ok().flatten()
    }

    /// Resolve an ifindex to its interface name via the lazy route-netlink
    /// helper.
    pub fn ifindex2ifname(&mut self, ifindex: u32) -> Option<String> {
        self.link.ifindex2ifname(ifindex).ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::attr::{AttrIter, NlAttr, get};
    use crate::netlink::header::GenlMsgHdr;
    use crate::netlink::message::NLMSG_HDRLEN;
    use std::cell::RefCell;
    use std::collections::{HashMap, VecDeque};
    use std::rc::Rc;

    /// Replays canned responses instead of talking to a real kernel,
    /// exercising the handle's refresh/dispatch logic against exact byte
    /// buffers the way the wire protocol would actually deliver them.
    struct MockCommandChannel {
        family: std::result::Result<FamilyInfo, Error>,
        responses: VecDeque<Result<Vec<Vec<u8>>>>,
        last_sent: Rc<RefCell<Vec<u8>>>,
    }

    impl MockCommandChannel {
        fn new(family: FamilyInfo) -> Self {
            Self {
                family: Ok(family),
                responses: VecDeque::new(),
                last_sent: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn failing(err: Error) -> Self {
            Self {
                family: Err(err),
                responses: VecDeque::new(),
                last_sent: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn push_response(&mut self, payloads: Vec<Vec<u8>>) {
            self.responses.push_back(Ok(payloads));
        }

        /// A handle to inspect the last message handed to `exchange`, kept
        /// alive after the channel itself is moved into a `Handle`.
        fn last_sent_handle(&self) -> Rc<RefCell<Vec<u8>>> {
            self.last_sent.clone()
        }
    }

    impl CommandChannel for MockCommandChannel {
        fn resolve_family(&mut self, _name: &str) -> Result<FamilyInfo> {
            match &self.family {
                Ok(f) => Ok(f.clone()),
                Err(e) => Err(clone_error(e)),
            }
        }

        fn exchange(&mut self, builder: MessageBuilder) -> Result<Vec<Vec<u8>>> {
            *self.last_sent.borrow_mut() = builder.finish();
            self.responses.pop_front().unwrap_or(Ok(Vec::new()))
        }
    }

    fn clone_error(e: &Error) -> Error {
        match e {
            Error::FamilyNotFound { name } => Error::FamilyNotFound { name: name.clone() },
            Error::Kernel { errno, message } => Error::Kernel {
                errno: *errno,
                message: message.clone(),
            },
            _ => Error::InvalidMessage("unclonable mock error".into()),
        }
    }

    struct MockEventChannel {
        queue: VecDeque<Vec<u8>>,
        memberships: Vec<u32>,
    }

    impl MockEventChannel {
        fn new() -> Self {
            Self {
                queue: VecDeque::new(),
                memberships: Vec::new(),
            }
        }
    }

    impl EventChannel for MockEventChannel {
        fn try_recv(&mut self) -> std::io::Result<Option<Vec<u8>>> {
            Ok(self.queue.pop_front())
        }

        fn as_raw_fd(&self) -> RawFd {
            -1
        }

        fn add_membership(&mut self, group: u32) -> std::io::Result<()> {
            self.memberships.push(group);
            Ok(())
        }
    }

    fn family_with_group(id: u16, group_id: u32) -> FamilyInfo {
        let mut mcast_groups = HashMap::new();
        mcast_groups.insert(TEAM_GENL_CHANGE_EVENT_MC_GRP_NAME.to_string(), group_id);
        FamilyInfo { id, mcast_groups }
    }

    fn genl_payload(cmd: u8, attrs: &[u8]) -> Vec<u8> {
        let mut payload = GenlMsgHdr::new(cmd, super::super::TEAM_GENL_VERSION)
            .as_bytes()
            .to_vec();
        payload.extend_from_slice(attrs);
        payload
    }

    fn port_item(ifindex: u32, speed: u32, duplex: u8, linkup: bool) -> Vec<u8> {
        let mut b = MessageBuilder::new(0, 0);
        b.append_attr_u32(super::super::TeamPortAttr::Ifindex as u16, ifindex);
        if linkup {
            b.append_attr_empty(super::super::TeamPortAttr::Linkup as u16);
        }
        b.append_attr_u32(super::super::TeamPortAttr::Speed as u16, speed);
        b.append_attr_u8(super::super::TeamPortAttr::Duplex as u16, duplex);
        b.finish()[crate::netlink::message::NLMSG_HDRLEN..].to_vec()
    }

    fn option_item_u32(name: &str, value: u32) -> Vec<u8> {
        let mut b = MessageBuilder::new(0, 0);
        b.append_attr_str(super::super::TeamOptionAttr::Name as u16, name);
        b.append_attr_u32(
            super::super::TeamOptionAttr::Type as u16,
            super::super::NLA_TYPE_U32,
        );
        b.append_attr_u32(super::super::TeamOptionAttr::Data as u16, value);
        b.finish()[crate::netlink::message::NLMSG_HDRLEN..].to_vec()
    }

    fn option_item_str(name: &str, value: &str) -> Vec<u8> {
        let mut b = MessageBuilder::new(0, 0);
        b.append_attr_str(super::super::TeamOptionAttr::Name as u16, name);
        b.append_attr_u32(
            super::super::TeamOptionAttr::Type as u16,
            super::super::NLA_TYPE_STRING,
        );
        b.append_attr_str(super::super::TeamOptionAttr::Data as u16, value);
        b.finish()[crate::netlink::message::NLMSG_HDRLEN..].to_vec()
    }

    fn wrap_nested(attr_type: u16, items: &[Vec<u8>]) -> Vec<u8> {
        let mut inner = Vec::new();
        for item in items {
            let attr = NlAttr::new(super::super::TEAM_ATTR_ITEM_PORT, item.len());
            inner.extend_from_slice(attr.as_bytes());
            inner.extend_from_slice(item);
            let aligned = crate::netlink::attr::nla_align(inner.len());
            inner.resize(aligned, 0);
        }
        let outer = NlAttr::new(attr_type, inner.len());
        let mut full = Vec::new();
        full.extend_from_slice(outer.as_bytes());
        full.extend_from_slice(&inner);
        full
    }

    fn team_ifindex_attr(ifindex: u32) -> Vec<u8> {
        let attr = NlAttr::new(super::super::TeamAttr::TeamIfindex as u16, 4);
        let mut buf = attr.as_bytes().to_vec();
        buf.extend_from_slice(&ifindex.to_ne_bytes());
        buf
    }

    fn port_list_reply(ifindex: u32, ports: &[(u32, u32, u8, bool)]) -> Vec<u8> {
        let mut attrs = team_ifindex_attr(ifindex);
        let items: Vec<Vec<u8>> = ports
            .iter()
            .map(|(i, s, d, l)| port_item(*i, *s, *d, *l))
            .collect();
        attrs.extend_from_slice(&wrap_nested(super::super::TeamAttr::ListPort as u16, &items));
        genl_payload(TeamCmd::PortListGet as u8, &attrs)
    }

    /// Wrap a genl-level payload (as produced by `genl_payload`) in a full
    /// `nlmsghdr`, the way a real multicast datagram arrives off the event
    /// socket. Command replies skip this wrapping (the transport strips the
    /// `nlmsghdr` before handing payloads to the codec); events don't.
    fn event_datagram(payload: &[u8]) -> Vec<u8> {
        let mut b = MessageBuilder::new(0, 0);
        b.append_bytes(payload);
        b.finish()
    }

    fn make_handle(cmd: MockCommandChannel, evt: MockEventChannel) -> Handle {
        Handle::with_channels(Box::new(cmd), Box::new(evt))
    }

    #[test]
    fn s1_initial_sync_populates_ports_and_options() {
        let mut cmd = MockCommandChannel::new(family_with_group(0x1a, 5));

        let mut port_attrs = team_ifindex_attr(7);
        port_attrs.extend_from_slice(&wrap_nested(
            super::super::TeamAttr::ListPort as u16,
            &[
                port_item(11, 1000, 1, true),
                port_item(12, 100, 0, false),
            ],
        ));
        cmd.push_response(vec![genl_payload(TeamCmd::PortListGet as u8, &port_attrs)]);

        let mut option_attrs = team_ifindex_attr(7);
        option_attrs.extend_from_slice(&wrap_nested(
            super::super::TeamAttr::ListOption as u16,
            &[
                option_item_str("mode", "activebackup"),
                option_item_u32("activeport", 11),
            ],
        ));
        cmd.push_response(vec![genl_payload(
            TeamCmd::OptionsGet as u8,
            &option_attrs,
        )]);

        let mut handle = make_handle(cmd, MockEventChannel::new());
        let rc = handle.init(7);
        assert_eq!(rc, 0);

        let first = handle.get_next_port(None).unwrap();
        assert_eq!(first.ifindex(), 11);
        let second = handle.get_next_port(Some(first)).unwrap();
        assert_eq!(second.ifindex(), 12);
        assert!(handle.get_next_port(Some(second)).is_none());

        assert_eq!(handle.get_mode_name(), Some("activebackup"));
        assert_eq!(handle.get_active_port(), Some(11));
    }

    #[test]
    fn s2_cross_ifindex_event_is_ignored() {
        let cmd = MockCommandChannel::new(family_with_group(0x1a, 5));
        let mut evt = MockEventChannel::new();
        evt.queue
            .push_back(event_datagram(&port_list_reply(99, &[(11, 1000, 1, true)])));

        let mut handle = make_handle(cmd, evt);
        handle.ifindex = 7;

        let fired = Rc::new(RefCell::new(0));
        let f = fired.clone();
        handle
            .dispatcher
            .register(1, ChangeType::All, Box::new(move |_, _, _| *f.borrow_mut() += 1))
            .unwrap();

        handle.process_event();

        assert!(handle.ports.is_empty());
        assert_eq!(*fired.borrow(), 0);
    }

    #[test]
    fn s3_duplicate_option_name_keeps_first_and_fires_once() {
        let cmd = MockCommandChannel::new(family_with_group(0x1a, 5));
        let mut evt = MockEventChannel::new();

        let mut attrs = team_ifindex_attr(7);
        attrs.extend_from_slice(&wrap_nested(
            super::super::TeamAttr::ListOption as u16,
            &[
                option_item_str("mode", "activebackup"),
                option_item_str("mode", "loadbalance"),
            ],
        ));
        evt.queue
            .push_back(event_datagram(&genl_payload(TeamCmd::OptionsGet as u8, &attrs)));

        let mut handle = make_handle(cmd, evt);
        handle.ifindex = 7;

        let fired = Rc::new(RefCell::new(0));
        let f = fired.clone();
        handle
            .dispatcher
            .register(1, ChangeType::Option, Box::new(move |_, _, _| *f.borrow_mut() += 1))
            .unwrap();

        handle.process_event();

        assert_eq!(handle.options.len(), 1);
        assert_eq!(handle.get_mode_name(), Some("activebackup"));
        assert_eq!(*fired.borrow(), 1);
    }

    #[test]
    fn s4_set_active_port_encodes_without_mutating_cache() {
        let mut cmd = MockCommandChannel::new(family_with_group(0x1a, 5));
        cmd.push_response(vec![]);
        let last_sent = cmd.last_sent_handle();

        let mut handle = make_handle(cmd, MockEventChannel::new());
        handle.family_id = 0x1a;
        handle.ifindex = 7;
        handle
            .options
            .replace(vec![TeamOption::new(
                "activeport".into(),
                OptionValue::U32(11),
                false,
            )]);

        let rc = handle.set_active_port(42);
        assert_eq!(rc, 0);

        // Cache is untouched until an echoing event arrives.
        assert_eq!(handle.get_active_port(), Some(11));

        // The encoded request itself carries TEAM_IFINDEX and a nested
        // list-option item {name="activeport", type=U32, data=42}.
        let sent = last_sent.borrow();
        let attrs_data = &sent[NLMSG_HDRLEN + GENL_HDRLEN..];

        let mut ifindex = None;
        let mut item_payload: Option<&[u8]> = None;
        for (attr_type, payload) in AttrIter::new(attrs_data) {
            match attr_type {
                t if t == super::super::TeamAttr::TeamIfindex as u16 => {
                    ifindex = get::u32_ne(payload).ok()
                }
                t if t == super::super::TeamAttr::ListOption as u16 => {
                    let (item_type, item) = AttrIter::new(payload).next().expect("one item");
                    assert_eq!(item_type, super::super::TEAM_ATTR_ITEM_OPTION);
                    item_payload = Some(item);
                }
                _ => {}
            }
        }
        assert_eq!(ifindex, Some(7));

        let item_payload = item_payload.expect("TEAM_ATTR_LIST_OPTION present");
        let mut name = None;
        let mut nla_type = None;
        let mut data = None;
        for (attr_type, payload) in AttrIter::new(item_payload) {
            match attr_type {
                t if t == super::super::TeamOptionAttr::Name as u16 => {
                    name = get::string(payload).ok().map(str::to_string)
                }
                t if t == super::super::TeamOptionAttr::Type as u16 => {
                    nla_type = get::u32_ne(payload).ok()
                }
                t if t == super::super::TeamOptionAttr::Data as u16 => {
                    data = get::u32_ne(payload).ok()
                }
                _ => {}
            }
        }
        assert_eq!(name.as_deref(), Some("activeport"));
        assert_eq!(nla_type, Some(super::super::NLA_TYPE_U32));
        assert_eq!(data, Some(42));
    }

    #[test]
    fn s5_two_phase_dispatch_fires_each_handler_once_per_pump() {
        let cmd = MockCommandChannel::new(family_with_group(0x1a, 5));
        let mut evt = MockEventChannel::new();
        evt.queue
            .push_back(event_datagram(&port_list_reply(7, &[(11, 1000, 1, true)])));
        evt.queue.push_back(event_datagram(&port_list_reply(
            7,
            &[(11, 1000, 1, true), (12, 100, 0, false)],
        )));

        let mut handle = make_handle(cmd, evt);
        handle.ifindex = 7;

        let port_calls = Rc::new(RefCell::new(0));
        let all_calls = Rc::new(RefCell::new(0));
        {
            let c = port_calls.clone();
            handle
                .dispatcher
                .register(1, ChangeType::Port, Box::new(move |_, _, _| *c.borrow_mut() += 1))
                .unwrap();
        }
        {
            let c = all_calls.clone();
            handle
                .dispatcher
                .register(2, ChangeType::All, Box::new(move |_, _, _| *c.borrow_mut() += 1))
                .unwrap();
        }

        // Drain both queued messages in one pump, mirroring check_events.
        handle.process_event();
        handle.process_event();

        assert_eq!(*port_calls.borrow(), 2);
        assert_eq!(*all_calls.borrow(), 2);
        assert_eq!(handle.ports.len(), 2);
    }

    #[test]
    fn s6_init_failure_leaves_handle_safe_to_free() {
        let cmd = MockCommandChannel::failing(Error::FamilyNotFound {
            name: TEAM_GENL_NAME.into(),
        });
        let mut handle = make_handle(cmd, MockEventChannel::new());

        let rc = handle.init(7);
        assert_eq!(rc, -libc::ENOENT);

        handle.free();
    }

    #[test]
    fn init_rejects_zero_ifindex() {
        let cmd = MockCommandChannel::new(family_with_group(0x1a, 5));
        let mut handle = make_handle(cmd, MockEventChannel::new());
        assert_eq!(handle.init(0), -libc::ENOENT);
    }

    #[test]
    fn duplicate_register_returns_eexist() {
        let cmd = MockCommandChannel::new(family_with_group(0x1a, 5));
        let mut handle = make_handle(cmd, MockEventChannel::new());
        assert_eq!(
            handle.register_change_handler(1, ChangeType::All, |_, _, _| {}),
            0
        );
        assert_eq!(
            handle.register_change_handler(1, ChangeType::All, |_, _, _| {}),
            -libc::EEXIST
        );
    }

    #[test]
    fn unregister_unknown_handler_is_noop() {
        let cmd = MockCommandChannel::new(family_with_group(0x1a, 5));
        let mut handle = make_handle(cmd, MockEventChannel::new());
        handle.unregister_change_handler(42);
    }

    #[test]
    fn typed_getter_reports_unknown_option_as_enoent() {
        let cmd = MockCommandChannel::new(family_with_group(0x1a, 5));
        let handle = make_handle(cmd, MockEventChannel::new());
        assert_eq!(
            handle.get_option_value_by_name_u32("activeport"),
            Err(-libc::ENOENT)
        );
    }

    #[test]
    fn typed_getter_reports_type_mismatch_as_einval() {
        let cmd = MockCommandChannel::new(family_with_group(0x1a, 5));
        let mut handle = make_handle(cmd, MockEventChannel::new());
        handle
            .options
            .replace(vec![TeamOption::new("mode".into(), OptionValue::Str("activebackup".into()), false)]);

        assert_eq!(
            handle.get_option_value_by_name_u32("mode"),
            Err(-libc::EINVAL)
        );
        assert_eq!(
            handle.get_option_value_by_name_string("mode"),
            Ok("activebackup")
        );
    }
}
