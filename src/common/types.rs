//! Shared types used across the application.

use std::fmt;

/// Game server client number, as printed in the console log.
pub type ClientId = u32;

/// Privilege transition reported by a `master:` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterOp {
    Claimed,
    Relinquished,
}

impl MasterOp {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "claimed" => Some(Self::Claimed),
            "relinquished" => Some(Self::Relinquished),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claimed => "claimed",
            Self::Relinquished => "relinquished",
        }
    }
}

impl fmt::Display for MasterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classified line of the game server's console output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Chat {
        author: String,
        client_id: ClientId,
        message: String,
    },
    Connect {
        client_id: ClientId,
        name: String,
    },
    Disconnect {
        client_id: ClientId,
        name: String,
    },
    GeoIp {
        client_id: ClientId,
        location: String,
    },
    MasterChange {
        name: String,
        op: MasterOp,
        privilege: String,
    },
    Rename {
        client_id: ClientId,
        old_name: String,
        new_name: String,
    },
    Kick {
        actor: String,
        target: String,
    },
    Unrecognized {
        raw: String,
    },
}

impl Event {
    /// Client id this event is keyed on, if any.
    pub fn client_id(&self) -> Option<ClientId> {
        match self {
            Self::Chat { client_id, .. }
            | Self::Connect { client_id, .. }
            | Self::Disconnect { client_id, .. }
            | Self::GeoIp { client_id, .. }
            | Self::Rename { client_id, .. } => Some(*client_id),
            Self::MasterChange { .. } | Self::Kick { .. } | Self::Unrecognized { .. } => None,
        }
    }

    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chat { .. } => "chat",
            Self::Connect { .. } => "connect",
            Self::Disconnect { .. } => "disconnect",
            Self::GeoIp { .. } => "geoip",
            Self::MasterChange { .. } => "master",
            Self::Rename { .. } => "rename",
            Self::Kick { .. } => "kick",
            Self::Unrecognized { .. } => "unrecognized",
        }
    }
}

/// A message posted in the bridged chat channel, reduced to what the game needs.
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    /// Sender's display name, if the platform provided one.
    pub sender: Option<String>,
    /// Message content with mentions already resolved to plain text.
    pub content: String,
    /// Attached files as (file name, URL).
    pub attachments: Vec<(String, String)>,
}
