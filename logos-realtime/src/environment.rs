//! Host environment hints that affect reconnection.
//!
//! Hosts with a notion of page visibility or network reachability forward
//! those transitions here. Hosts without one simply never send anything and
//! the client falls back to backoff-only reconnection.

use serde::{Deserialize, Serialize};

/// A change in the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentSignal {
    /// The page/app became visible again
    Visible,
    /// The page/app was hidden
    Hidden,
    /// Network connectivity came back
    Online,
    /// Network connectivity was lost
    Offline,
}

impl EnvironmentSignal {
    /// Whether this signal makes a connection attempt plausible again.
    pub fn suggests_reconnect(self) -> bool {
        matches!(self, Self::Visible | Self::Online)
    }
}

impl std::fmt::Display for EnvironmentSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Visible => "visible",
            Self::Hidden => "hidden",
            Self::Online => "online",
            Self::Offline => "offline",
        };
        f.write_str(name)
    }
}
