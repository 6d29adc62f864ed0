//! Message codec: decodes port-list/option-list replies, encodes option-set
//! requests.
//!
//! Both decoders apply the same cross-talk filter (reject messages whose
//! `TEAM_ATTR_TEAM_IFINDEX` does not match the handle's own ifindex) and the
//! same "skip the offending entry, log, keep going" policy for malformed
//! nested items — a single bad entry never aborts the whole refresh.

use tracing::warn;

use crate::netlink::attr::{AttrIter, get};
use crate::netlink::builder::MessageBuilder;
use crate::netlink::error::Result;

use super::cache::{OptionValue, Port, TeamOption};
use super::{
    NLA_TYPE_STRING, NLA_TYPE_U32, TEAM_ATTR_ITEM_OPTION, TEAM_ATTR_ITEM_PORT, TeamAttr, TeamCmd,
    TeamOptionAttr, TeamPortAttr,
};

/// Decode a `TEAM_CMD_PORT_LIST_GET` reply into a fresh list of ports.
///
/// Returns `None` if the message's team ifindex does not match `ifindex`
/// (cross-talk: some other handle's notification sharing the same group).
pub fn decode_port_list(data: &[u8], ifindex: u32) -> Option<Vec<Port>> {
    let mut team_ifindex: Option<u32> = None;
    let mut list_attr: Option<&[u8]> = None;

    for (attr_type, payload) in AttrIter::new(data) {
        match attr_type {
            t if t == TeamAttr::TeamIfindex as u16 => {
                team_ifindex = get::u32_ne(payload).ok();
            }
            t if t == TeamAttr::ListPort as u16 => {
                list_attr = Some(payload);
            }
            _ => {}
        }
    }

    if team_ifindex != Some(ifindex) {
        return None;
    }

    let mut ports = Vec::new();
    let Some(list_data) = list_attr else {
        return Some(ports);
    };

    for (item_type, item_payload) in AttrIter::new(list_data) {
        if item_type != TEAM_ATTR_ITEM_PORT {
            continue;
        }

        let mut port_ifindex: Option<u32> = None;
        let mut speed: u32 = 0;
        let mut duplex: u8 = 0;
        let mut linkup = false;
        let mut changed = false;

        for (attr_type, payload) in AttrIter::new(item_payload) {
            match attr_type {
                t if t == TeamPortAttr::Ifindex as u16 => {
                    port_ifindex = get::u32_ne(payload).ok();
                }
                t if t == TeamPortAttr::Changed as u16 => changed = true,
                t if t == TeamPortAttr::Linkup as u16 => linkup = true,
                t if t == TeamPortAttr::Speed as u16 => {
                    speed = get::u32_ne(payload).unwrap_or(0);
                }
                t if t == TeamPortAttr::Duplex as u16 => {
                    duplex = get::u8(payload).unwrap_or(0);
                }
                _ => {}
            }
        }

        let Some(port_ifindex) = port_ifindex else {
            warn!("team port entry missing required ifindex attribute, skipping");
            continue;
        };

        ports.push(Port::new(port_ifindex, speed, duplex, linkup, changed));
    }

    Some(ports)
}

/// Decode a `TEAM_CMD_OPTIONS_GET` reply into a fresh list of options.
///
/// Returns `None` if the message's team ifindex does not match `ifindex`.
pub fn decode_option_list(data: &[u8], ifindex: u32) -> Option<Vec<TeamOption>> {
    let mut team_ifindex: Option<u32> = None;
    let mut list_attr: Option<&[u8]> = None;

    for (attr_type, payload) in AttrIter::new(data) {
        match attr_type {
            t if t == TeamAttr::TeamIfindex as u16 => {
                team_ifindex = get::u32_ne(payload).ok();
            }
            t if t == TeamAttr::ListOption as u16 => {
                list_attr = Some(payload);
            }
            _ => {}
        }
    }

    if team_ifindex != Some(ifindex) {
        return None;
    }

    let mut options: Vec<TeamOption> = Vec::new();
    let Some(list_data) = list_attr else {
        return Some(options);
    };

    for (item_type, item_payload) in AttrIter::new(list_data) {
        if item_type != TEAM_ATTR_ITEM_OPTION {
            continue;
        }

        let mut name: Option<String> = None;
        let mut nla_type: Option<u32> = None;
        let mut raw_data: Option<&[u8]> = None;
        let mut changed = false;

        for (attr_type, payload) in AttrIter::new(item_payload) {
            match attr_type {
                t if t == TeamOptionAttr::Name as u16 => {
                    name = get::string(payload).ok().map(str::to_string);
                }
                t if t == TeamOptionAttr::Type as u16 => {
                    nla_type = get::u32_ne(payload).ok();
                }
                t if t == TeamOptionAttr::Data as u16 => {
                    raw_data = Some(payload);
                }
                t if t == TeamOptionAttr::Changed as u16 => changed = true,
                _ => {}
            }
        }

        let (Some(name), Some(nla_type), Some(raw_data)) = (name, nla_type, raw_data) else {
            warn!("team option entry missing name/type/data, skipping");
            continue;
        };

        if options.iter().any(|o| o.name() == name) {
            warn!(option = %name, "duplicate team option name in refresh, keeping first");
            continue;
        }

        let value = match nla_type {
            NLA_TYPE_U32 => match get::u32_ne(raw_data) {
                Ok(v) => OptionValue::U32(v),
                Err(_) => {
                    warn!(option = %name, "malformed u32 option data, skipping");
                    continue;
                }
            },
            NLA_TYPE_STRING => match get::string(raw_data) {
                Ok(v) => OptionValue::Str(v.to_string()),
                Err(_) => {
                    warn!(option = %name, "malformed string option data, skipping");
                    continue;
                }
            },
            other => {
                warn!(option = %name, netlink_type = other, "unknown option type, skipping");
                continue;
            }
        };

        options.push(TeamOption::new(name, value, changed));
    }

    Some(options)
}

/// Encode a `TEAM_CMD_OPTIONS_SET` request for a single option.
///
/// Returns an unfinished [`MessageBuilder`] so the caller (the command
/// channel) can stamp in a sequence number and port ID before sending.
pub fn encode_option_set(
    family_id: u16,
    ifindex: u32,
    name: &str,
    value: &OptionValue,
) -> Result<MessageBuilder> {
    use crate::netlink::message::NLM_F_ACK;
    use crate::netlink::message::NLM_F_REQUEST;

    let (nla_type, encode_data): (u32, Box<dyn Fn(&mut MessageBuilder)>) = match value {
        OptionValue::U32(v) => {
            let v = *v;
            (
                NLA_TYPE_U32,
                Box::new(move |b: &mut MessageBuilder| {
                    b.append_attr_u32(TeamOptionAttr::Data as u16, v)
                }),
            )
        }
        OptionValue::Str(s) => {
            let s = s.clone();
            (
                NLA_TYPE_STRING,
                Box::new(move |b: &mut MessageBuilder| {
                    b.append_attr_str(TeamOptionAttr::Data as u16, &s)
                }),
            )
        }
    };

    let mut builder = MessageBuilder::new(family_id, NLM_F_REQUEST | NLM_F_ACK);
    builder.append(&crate::netlink::header::GenlMsgHdr::new(
        TeamCmd::OptionsSet as u8,
        super::TEAM_GENL_VERSION,
    ));
    builder.append_attr_u32(TeamAttr::TeamIfindex as u16, ifindex);

    let list = builder.nest_start(TeamAttr::ListOption as u16);
    let item = builder.nest_start(TEAM_ATTR_ITEM_OPTION);
    builder.append_attr_str(TeamOptionAttr::Name as u16, name);
    builder.append_attr_u32(TeamOptionAttr::Type as u16, nla_type);
    encode_data(&mut builder);
    builder.nest_end(item);
    builder.nest_end(list);

    Ok(builder)
}

/// Encode a `TEAM_CMD_PORT_LIST_GET`/`TEAM_CMD_OPTIONS_GET` request.
///
/// Both refresh requests carry nothing but the team ifindex. Returns an
/// unfinished builder, same convention as [`encode_option_set`].
pub fn encode_get_request(family_id: u16, cmd: TeamCmd, ifindex: u32) -> MessageBuilder {
    use crate::netlink::message::NLM_F_ACK;
    use crate::netlink::message::NLM_F_REQUEST;

    let mut builder = MessageBuilder::new(family_id, NLM_F_REQUEST | NLM_F_ACK);
    builder.append(&crate::netlink::header::GenlMsgHdr::new(
        cmd as u8,
        super::TEAM_GENL_VERSION,
    ));
    builder.append_attr_u32(TeamAttr::TeamIfindex as u16, ifindex);
    builder
}
