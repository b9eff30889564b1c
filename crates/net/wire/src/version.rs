use std::fmt;

/// A version of the `btp` sub-protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BtpVersion {
    /// btp/63: the base protocol.
    Btp63 = 63,
    /// btp/64: adds the fork id to `Status`.
    Btp64 = 64,
}

impl BtpVersion {
    /// Every supported version, newest first, as offered during handshake.
    pub const ALL: [Self; 2] = [Self::Btp64, Self::Btp63];

    /// Whether the `Status` message carries a fork id at this version.
    pub const fn has_fork_id(&self) -> bool {
        matches!(self, Self::Btp64)
    }
}

impl TryFrom<u8> for BtpVersion {
    type Error = u8;

    fn try_from(version: u8) -> Result<Self, Self::Error> {
        match version {
            63 => Ok(Self::Btp63),
            64 => Ok(Self::Btp64),
            other => Err(other),
        }
    }
}

impl From<BtpVersion> for u8 {
    fn from(version: BtpVersion) -> Self {
        version as u8
    }
}

impl fmt::Display for BtpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "btp/{}", *self as u8)
    }
}
