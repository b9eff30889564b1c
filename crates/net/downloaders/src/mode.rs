use std::{fmt, str::FromStr};

/// How much of the chain a sync replays locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Replay every transaction from the local head forward.
    #[default]
    Full,
    /// Download headers and receipts, pull the pivot block's state, then
    /// run full from the pivot on.
    Fast,
    /// Keep headers only.
    Light,
}

impl SyncMode {
    /// Whether this mode downloads receipts and pivot state.
    pub const fn is_fast(&self) -> bool {
        matches!(self, Self::Fast)
    }

    /// Whether this mode stops after headers.
    pub const fn is_light(&self) -> bool {
        matches!(self, Self::Light)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::Fast => f.write_str("fast"),
            Self::Light => f.write_str("light"),
        }
    }
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "fast" => Ok(Self::Fast),
            "light" => Ok(Self::Light),
            other => Err(format!("unknown sync mode: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrip() {
        for mode in [SyncMode::Full, SyncMode::Fast, SyncMode::Light] {
            assert_eq!(mode.to_string().parse::<SyncMode>().unwrap(), mode);
        }
        assert!("warp".parse::<SyncMode>().is_err());
    }
}
