//! Generic Netlink (GENL) family and multicast-group resolution.
//!
//! The `team` family is dynamically assigned a numeric ID by the kernel;
//! the only fixed family is the control family (`GENL_ID_CTRL`), queried
//! with `CTRL_CMD_GETFAMILY` to resolve both the family ID and any
//! multicast group IDs it advertises.

use std::collections::HashMap;

use super::attr::{AttrIter, get};
use super::builder::MessageBuilder;
use super::error::{Error, Result};
use super::header::{GENL_HDRLEN, GenlMsgHdr};
use super::message::{MessageIter, NLM_F_ACK, NLM_F_REQUEST, NlMsgError};
use super::socket::NetlinkSocket;

/// Fixed family ID of the GENL control family.
pub const GENL_ID_CTRL: u16 = 0x10;

/// Control family commands.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlCmd {
    GetFamily = 3,
}

/// Control family attributes.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlAttr {
    FamilyId = 1,
    FamilyName = 2,
    McastGroups = 7,
}

/// Control family multicast group attributes (nested under `McastGroups`).
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlAttrMcastGrp {
    Name = 1,
    Id = 2,
}

/// Resolved identity of a Generic Netlink family.
#[derive(Debug, Clone)]
pub struct FamilyInfo {
    /// Dynamically assigned family ID (used as `nlmsg_type` in requests).
    pub id: u16,
    /// Multicast groups advertised by the family: name -> group ID.
    pub mcast_groups: HashMap<String, u32>,
}

/// Query the kernel for a Generic Netlink family by name.
///
/// This is a single blocking request/response exchange over the given
/// socket, which must already be bound to `Protocol::Generic`.
pub fn resolve_family(socket: &NetlinkSocket, name: &str) -> Result<FamilyInfo> {
    let mut builder = MessageBuilder::new(GENL_ID_CTRL, NLM_F_REQUEST | NLM_F_ACK);
    builder.append(&GenlMsgHdr::new(CtrlCmd::GetFamily as u8, 1));
    builder.append_attr_str(CtrlAttr::FamilyName as u16, name);

    let seq = socket.next_seq();
    builder.set_seq(seq);
    builder.set_pid(socket.pid());

    socket.send(&builder.finish())?;
    let response = socket.recv_msg()?;
    parse_family_response(&response, seq, name)
}

fn parse_family_response(data: &[u8], seq: u32, name: &str) -> Result<FamilyInfo> {
    for result in MessageIter::new(data) {
        let (header, payload) = result?;

        if header.nlmsg_seq != seq {
            continue;
        }

        if header.is_error() {
            let err = NlMsgError::from_bytes(payload)?;
            if !err.is_ack() {
                if err.error == -libc::ENOENT {
                    return Err(Error::FamilyNotFound { name: name.into() });
                }
                return Err(Error::from_errno(-err.error));
            }
            continue;
        }

        if header.is_done() {
            continue;
        }

        if payload.len() < GENL_HDRLEN {
            return Err(Error::InvalidMessage("GENL header too short".into()));
        }

        return parse_family_attrs(&payload[GENL_HDRLEN..]);
    }

    Err(Error::FamilyNotFound { name: name.into() })
}

fn parse_family_attrs(data: &[u8]) -> Result<FamilyInfo> {
    let mut id: Option<u16> = None;
    let mut mcast_groups = HashMap::new();

    for (attr_type, payload) in AttrIter::new(data) {
        match attr_type {
            t if t == CtrlAttr::FamilyId as u16 => {
                id = Some(get::u16_ne(payload)?);
            }
            t if t == CtrlAttr::McastGroups as u16 => {
                mcast_groups = parse_mcast_groups(payload)?;
            }
            _ => {}
        }
    }

    let id = id.ok_or_else(|| Error::InvalidMessage("missing family ID".into()))?;
    Ok(FamilyInfo { id, mcast_groups })
}

fn parse_mcast_groups(data: &[u8]) -> Result<HashMap<String, u32>> {
    let mut groups = HashMap::new();

    for (_idx, group_payload) in AttrIter::new(data) {
        let mut name: Option<String> = None;
        let mut grp_id: Option<u32> = None;

        for (attr_type, payload) in AttrIter::new(group_payload) {
            match attr_type {
                t if t == CtrlAttrMcastGrp::Name as u16 => {
                    name = Some(get::string(payload)?.to_string());
                }
                t if t == CtrlAttrMcastGrp::Id as u16 => {
                    grp_id = Some(get::u32_ne(payload)?);
                }
                _ => {}
            }
        }

        if let (Some(name), Some(id)) = (name, grp_id) {
            groups.insert(name, id);
        }
    }

    Ok(groups)
}
