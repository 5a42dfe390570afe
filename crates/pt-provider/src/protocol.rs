//! Control channel protocol
//!
//! The host app talks to the running tunnel with short UTF-8 messages:
//!
//! | Request                           | Reply                  |
//! |-----------------------------------|------------------------|
//! | `stats`                           | `<upload>,<download>`  |
//! | `split_tunnel:enable:<a;b;...>`   | `OK`                   |
//! | `split_tunnel:disable:<ignored>`  | `OK`                   |
//! | `split_tunnel:is_routed:<app>`    | `YES` / `NO`           |
//!
//! `split_tunnel` requests are split on `:` and need at least three fields;
//! anything past the third is ignored. Requests that do not parse get no
//! reply at all.

use crate::traffic::TrafficSnapshot;
use pt_policy::{AppId, parse_app_list};
use std::collections::BTreeSet;
use std::fmt;

const STATS: &str = "stats";
const SPLIT_TUNNEL: &str = "split_tunnel";
const ENABLE: &str = "enable";
const DISABLE: &str = "disable";
const IS_ROUTED: &str = "is_routed";

/// Separator between apps in an `enable` request
pub const ENABLE_LIST_SEPARATOR: char = ';';

/// Parsed control request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Read traffic totals
    Stats,
    /// Switch to include mode over these apps
    EnableSplitTunnel { apps: BTreeSet<AppId> },
    /// Back to all-routed
    DisableSplitTunnel,
    /// Ask whether an app goes through the tunnel
    IsRouted { app: String },
}

impl ControlMessage {
    /// Decode a raw request
    pub fn parse(data: &[u8]) -> Result<Self, MessageError> {
        let text = std::str::from_utf8(data).map_err(|_| MessageError::NotUtf8)?;
        text.parse()
    }
}

impl std::str::FromStr for ControlMessage {
    type Err = MessageError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text == STATS {
            return Ok(ControlMessage::Stats);
        }

        let fields: Vec<&str> = text.split(':').collect();
        if fields[0] != SPLIT_TUNNEL {
            return Err(MessageError::Unrecognised);
        }
        if fields.len() < 3 {
            return Err(MessageError::MissingFields(fields.len()));
        }

        let (command, param) = (fields[1], fields[2]);
        match command {
            ENABLE => Ok(ControlMessage::EnableSplitTunnel {
                apps: parse_app_list(param, ENABLE_LIST_SEPARATOR),
            }),
            DISABLE => Ok(ControlMessage::DisableSplitTunnel),
            IS_ROUTED => Ok(ControlMessage::IsRouted {
                app: param.to_string(),
            }),
            other => Err(MessageError::UnknownCommand(other.to_string())),
        }
    }
}

/// Reply to a handled request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Stats(TrafficSnapshot),
    Ok,
    Routed(bool),
}

impl Reply {
    /// Wire encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Stats(snapshot) => write!(f, "{snapshot}"),
            Reply::Ok => f.write_str("OK"),
            Reply::Routed(true) => f.write_str("YES"),
            Reply::Routed(false) => f.write_str("NO"),
        }
    }
}

/// Malformed request. Never answered, only logged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("Message is not valid UTF-8")]
    NotUtf8,

    #[error("Unrecognised message")]
    Unrecognised,

    #[error("Expected at least 3 fields, got {0}")]
    MissingFields(usize),

    #[error("Unknown split_tunnel command: {0:?}")]
    UnknownCommand(String),
}
