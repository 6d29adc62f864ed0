//! Error types for netlink and team operations.

use std::io;

/// Result type for netlink and team operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the kernel's team driver.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Kernel returned an error code in an ACK message.
    #[error("kernel error: {message} (errno {errno})")]
    Kernel {
        /// Positive errno value reported by the kernel.
        errno: i32,
        /// Human-readable description.
        message: String,
    },

    /// A fixed-size header or struct did not fit in the remaining buffer.
    #[error("message truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Expected length in bytes.
        expected: usize,
        /// Actual bytes available.
        actual: usize,
    },

    /// Message framing was invalid (bad length, bad sequence, stray type).
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// An attribute's payload could not be interpreted as its claimed type.
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    /// The `team` generic netlink family is not registered with the kernel.
    #[error("netlink family '{name}' not found")]
    FamilyNotFound {
        /// The family name that was queried.
        name: String,
    },

    /// The requested multicast group does not exist on the resolved family.
    #[error("multicast group '{name}' not found on family '{family}'")]
    GroupNotFound {
        /// Family the group was expected on.
        family: String,
        /// Group name that was requested.
        name: String,
    },

    /// `ifindex` passed to `init` does not name an existing interface.
    #[error("ifindex {0} is not valid")]
    InvalidIfindex(u32),

    /// A change handler with this identity is already registered.
    #[error("change handler already registered")]
    HandlerExists,

    /// No option with the given name is present in the cache.
    #[error("no such option: {0}")]
    UnknownOption(String),

    /// The requested operation is not supported on this option (wrong type).
    #[error("option '{name}' does not hold a {wanted} value")]
    OptionTypeMismatch {
        /// Name of the offending option.
        name: String,
        /// Type that was requested.
        wanted: &'static str,
    },

    /// A socket could not join the requested multicast group.
    #[error("failed to join multicast group: {0}")]
    MembershipFailed(String),
}

impl Error {
    /// Build a kernel error from a positive errno reported by an ACK.
    pub fn from_errno(errno: i32) -> Self {
        let message = io::Error::from_raw_os_error(errno).to_string();
        Self::Kernel { errno, message }
    }

    /// Map this error onto the negative-errno convention used at the
    /// `Handle` public API boundary, mirroring libteam's `team_*` return
    /// values.
    pub fn to_errno(&self) -> i32 {
        match self {
            Error::Io(e) => -e.raw_os_error().unwrap_or(libc::EIO),
            Error::Kernel { errno, .. } => -errno,
            Error::Truncated { .. } | Error::InvalidMessage(_) | Error::InvalidAttribute(_) => {
                -libc::EINVAL
            }
            Error::FamilyNotFound { .. } | Error::GroupNotFound { .. } => -libc::ENOENT,
            Error::InvalidIfindex(_) => -libc::ENOENT,
            Error::HandlerExists => -libc::EEXIST,
            Error::UnknownOption(_) => -libc::ENOENT,
            Error::OptionTypeMismatch { .. } => -libc::EINVAL,
            Error::MembershipFailed(_) => -libc::EINVAL,
        }
    }
}
