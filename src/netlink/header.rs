//! Generic netlink message header (genlmsghdr).

use super::error::{Error, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Size of the generic netlink header.
pub const GENL_HDRLEN: usize = 4;

/// Generic netlink message header (mirrors struct genlmsghdr).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct GenlMsgHdr {
    /// Command code.
    pub cmd: u8,
    /// Interface version.
    pub version: u8,
    /// Reserved, must be zero.
    pub reserved: u16,
}

impl GenlMsgHdr {
    /// Create a new generic netlink header.
    pub fn new(cmd: u8, version: u8) -> Self {
        Self {
            cmd,
            version,
            reserved: 0,
        }
    }

    /// Convert header to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    /// Parse header from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| Error::Truncated {
                expected: std::mem::size_of::<Self>(),
                actual: data.len(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let hdr = GenlMsgHdr::new(3, 1);
        let bytes = hdr.as_bytes();
        let parsed = GenlMsgHdr::from_bytes(bytes).unwrap();
        assert_eq!(parsed.cmd, 3);
        assert_eq!(parsed.version, 1);
    }
}
