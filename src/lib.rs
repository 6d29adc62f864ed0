//! Control library for the Linux kernel `team` network device.
//!
//! `team` is a synchronous, single-threaded client for the kernel's `team`
//! generic-netlink family: the link-aggregation virtual interface driven by
//! the in-tree `team` driver. A [`team::Handle`](crate::team::Handle) owns
//! the command and event sockets, keeps a live cache of the device's ports
//! and options, and dispatches change notifications to registered
//! callbacks.
//!
//! ```no_run
//! use team::team::{ChangeType, Handle};
//!
//! let mut handle = Handle::alloc().expect("failed to allocate handle");
//! let rc = handle.init(3);
//! if rc != 0 {
//!     eprintln!("init failed: {}", rc);
//! }
//!
//! handle.register_change_handler(1, ChangeType::All, |ports, options, _class| {
//!     for port in ports.iter() {
//!         println!("port {} up={}", port.ifindex(), port.is_link_up());
//!     }
//!     if let Some(mode) = options.get_by_name("mode") {
//!         println!("mode = {:?}", mode.value_string());
//!     }
//! });
//!
//! handle.check_events();
//! handle.free();
//! ```
//!
//! The crate is organized in two layers: [`netlink`] is the generic
//! transport substrate (sockets, message framing, attribute codec, family
//! resolution, link-name lookup) and has no knowledge of the `team`
//! protocol; [`team`] builds the `team`-specific wire format, cache,
//! dispatcher, and facade on top of it.

pub mod netlink;
pub mod team;

pub use team::Handle;
