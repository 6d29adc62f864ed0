//! Control library for the kernel `team` link-aggregation device.
//!
//! This module assembles the generic netlink substrate in [`crate::netlink`]
//! into the `team`-specific wire protocol, cache, dispatcher, and facade.

pub mod cache;
pub mod codec;
pub mod dispatcher;
pub mod handle;

pub use cache::{OptionType, OptionValue, Port, PortList, TeamOption};
pub use dispatcher::{ChangeType, HandlerId};
pub use handle::Handle;

/// Generic netlink family name registered by the kernel team driver.
pub const TEAM_GENL_NAME: &str = "team";

/// Generic netlink family version.
pub const TEAM_GENL_VERSION: u8 = 1;

/// Multicast group carrying unsolicited port/option change notifications.
pub const TEAM_GENL_CHANGE_EVENT_MC_GRP_NAME: &str = "team_change_event";

/// Generic netlink commands of the `team` family.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamCmd {
    OptionsSet = 1,
    OptionsGet = 2,
    PortListGet = 3,
}

/// Top-level attributes carried directly under the genl header.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamAttr {
    /// The team device's own ifindex (u32). Used to filter cross-talk.
    TeamIfindex = 1,
    /// Nested list of option items.
    ListOption = 2,
    /// Nested list of port items.
    ListPort = 3,
}

/// Wrapper attribute type for a single item inside a list-option/list-port.
pub const TEAM_ATTR_ITEM_OPTION: u16 = 1;
pub const TEAM_ATTR_ITEM_PORT: u16 = 1;

/// Attributes nested within one option item.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamOptionAttr {
    Name = 1,
    Changed = 2,
    Type = 3,
    Data = 4,
}

/// Attributes nested within one port item.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamPortAttr {
    Ifindex = 1,
    Changed = 2,
    Linkup = 3,
    Speed = 4,
    Duplex = 5,
}

/// Netlink-level type codes carried in `TEAM_ATTR_OPTION_TYPE`.
///
/// These mirror the kernel's `NLA_U32`/`NLA_STRING` constants, which is
/// what the driver actually puts on the wire for an option's type tag.
pub const NLA_TYPE_U32: u32 = 3;
pub const NLA_TYPE_STRING: u32 = 5;

/// Name of the option that selects the team's runner mode (STRING).
pub const MODE_OPTION_NAME: &str = "mode";
/// Name of the option that selects the active port in active-backup mode (U32).
pub const ACTIVE_PORT_OPTION_NAME: &str = "activeport";
