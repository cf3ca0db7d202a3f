//! Leading tag bytes shared by the client, gateway, bridge and host legs.
//!
//! Every message starts with one signed byte. The values are stable across
//! both legs of a session so the bridge can forward tags without translation.

use std::fmt;

use crate::protocol::error::OffloadError;

/// Protocol tag, one signed byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum Tag {
    /// Stream closed. Never written; produced when a read hits EOF.
    ConnectionReleased = -1,
    Ping = 11,
    Pong = 12,
    CodeRegister = 21,
    CodePresent = 22,
    CodeRequest = 23,
    PhoneConnection = 30,
    PhoneAuthentication = 31,
    PhoneDisconnection = 32,
    /// Gateway could not lease a node; the connection is closed after this tag.
    NoCapacity = 33,
    /// The leased node never became reachable; the session ends after this tag.
    NodeUnreachable = 34,
    ComputationRequest = 40,
    ComputationRequestWithFile = 41,
    SendFileRequest = 42,
}

impl Tag {
    pub fn as_byte(self) -> i8 {
        self as i8
    }

    /// True for tags that close the session.
    pub fn is_disconnect(self) -> bool {
        matches!(self, Tag::PhoneDisconnection | Tag::ConnectionReleased)
    }
}

impl TryFrom<i8> for Tag {
    type Error = OffloadError;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        let tag = match value {
            -1 => Tag::ConnectionReleased,
            11 => Tag::Ping,
            12 => Tag::Pong,
            21 => Tag::CodeRegister,
            22 => Tag::CodePresent,
            23 => Tag::CodeRequest,
            30 => Tag::PhoneConnection,
            31 => Tag::PhoneAuthentication,
            32 => Tag::PhoneDisconnection,
            33 => Tag::NoCapacity,
            34 => Tag::NodeUnreachable,
            40 => Tag::ComputationRequest,
            41 => Tag::ComputationRequestWithFile,
            42 => Tag::SendFileRequest,
            other => {
                return Err(OffloadError::Protocol(format!("unknown tag {}", other)));
            }
        };
        Ok(tag)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tag::ConnectionReleased => "CONNECTION_RELEASED",
            Tag::Ping => "PING",
            Tag::Pong => "PONG",
            Tag::CodeRegister => "CODE_REGISTER",
            Tag::CodePresent => "CODE_PRESENT",
            Tag::CodeRequest => "CODE_REQUEST",
            Tag::PhoneConnection => "PHONE_CONNECTION",
            Tag::PhoneAuthentication => "PHONE_AUTHENTICATION",
            Tag::PhoneDisconnection => "PHONE_DISCONNECTION",
            Tag::NoCapacity => "NO_CAPACITY",
            Tag::NodeUnreachable => "NODE_UNREACHABLE",
            Tag::ComputationRequest => "COMPUTATION_REQUEST",
            Tag::ComputationRequestWithFile => "COMPUTATION_REQUEST_WITH_FILE",
            Tag::SendFileRequest => "SEND_FILE_REQUEST",
        };
        f.write_str(name)
    }
}
