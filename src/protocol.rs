//! # Command Protocol
//!
//! Wire record shapes for the request/reply command channel, the reserved
//! command identifiers every [`crate::command_server::CommandServer`]
//! handles internally, and the result codes a reply carries.

use crate::identity::HostIdentity;
use crate::serializer::{BinarySerializable, Deserializer, Serializer};
use crate::error::SerializeError;

/// A command id in `[0, 99]` is reserved by the protocol itself; ids `>= 100`
/// are application-defined.
pub const RESERVED_COMMAND_MAX: i32 = 99;
pub const USER_COMMAND_MIN: i32 = 100;

/// Reserved command identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedCommand {
    /// Never legally sent; read-side sentinel.
    Invalid,
    /// Begin session; server registers the client.
    Connect,
    /// End session; server removes the client.
    Disconnect,
    /// Keepalive ping; refreshes `last_seen`.
    Alive,
    /// Server returns its current timestamp.
    GetServerTime,
}

impl ReservedCommand {
    pub const fn id(self) -> i32 {
        match self {
            ReservedCommand::Invalid => 0,
            ReservedCommand::Connect => 1,
            ReservedCommand::Disconnect => 2,
            ReservedCommand::Alive => 3,
            ReservedCommand::GetServerTime => 4,
        }
    }

    /// Map a wire command id back to its reserved variant, if it is one.
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(ReservedCommand::Invalid),
            1 => Some(ReservedCommand::Connect),
            2 => Some(ReservedCommand::Disconnect),
            3 => Some(ReservedCommand::Alive),
            4 => Some(ReservedCommand::GetServerTime),
            _ => None,
        }
    }
}

/// `true` for any id in `[0, 99]`, reserved for the protocol regardless of
/// whether it names one of the currently defined [`ReservedCommand`]s.
pub fn is_reserved(id: i32) -> bool {
    (0..=RESERVED_COMMAND_MAX).contains(&id)
}

/// Result codes carried in a [`CommandReply`]'s `result` field. This is the
/// single point of truth for success or failure of a command; parameters
/// must not be read by the caller when the result is not `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ResultCode {
    Ok = 0,
    InvalidMsg = 1,
    EmptyMsg = 2,
    EmptyParams = 3,
    BadParameters = 4,
    NotImplemented = 5,
    UnknownCommand = 6,
    CommandFailed = 7,
    DisconnectCurrentClient = 8,
    ServerStopped = 9,
    Timeout = 10,
    BadCommand = 11,
    ClientNotConnected = 12,
}

impl ResultCode {
    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            0 => Self::Ok,
            1 => Self::InvalidMsg,
            2 => Self::EmptyMsg,
            3 => Self::EmptyParams,
            4 => Self::BadParameters,
            5 => Self::NotImplemented,
            6 => Self::UnknownCommand,
            7 => Self::CommandFailed,
            8 => Self::DisconnectCurrentClient,
            9 => Self::ServerStopped,
            10 => Self::Timeout,
            11 => Self::BadCommand,
            12 => Self::ClientNotConnected,
            _ => return None,
        })
    }
}

/// Wire form of a request on the command channel: the sender's identity, a
/// signed command id, and an opaque length-prefixed parameter buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub sender: HostIdentity,
    pub command_id: i32,
    pub params: Vec<u8>,
}

impl BinarySerializable for CommandRequest {
    fn write_to(&self, s: &mut Serializer) {
        s.write_string(&self.sender.uuid.to_string());
        s.write_string(&self.sender.ip);
        s.write_string(&self.sender.hostname);
        s.write_string(&self.sender.pid);
        s.write_string(&self.sender.name);
        s.write_string(&self.sender.info);
        s.write_primitive(self.command_id);
        s.write_bytes(&self.params);
    }

    fn read_from(d: &mut Deserializer) -> Result<Self, SerializeError> {
        let uuid_str = d.read_string()?;
        let ip = d.read_string()?;
        let hostname = d.read_string()?;
        let pid = d.read_string()?;
        let name = d.read_string()?;
        let info = d.read_string()?;
        let command_id = d.read_primitive()?;
        let params = d.read_bytes()?;

        let uuid = uuid::Uuid::parse_str(&uuid_str).unwrap_or_else(|_| uuid::Uuid::nil());

        Ok(Self {
            sender: HostIdentity {
                uuid,
                ip,
                hostname,
                pid,
                name,
                info,
            },
            command_id,
            params,
        })
    }
}

/// Wire form of a reply on the command channel: a result code, the echoed
/// command id, and an opaque length-prefixed parameter buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub result: i32,
    pub command_id: i32,
    pub params: Vec<u8>,
}

impl CommandReply {
    pub fn new(result: ResultCode, command_id: i32, params: Vec<u8>) -> Self {
        Self {
            result: result as i32,
            command_id,
            params,
        }
    }

    pub fn empty(result: ResultCode, command_id: i32) -> Self {
        Self::new(result, command_id, Vec::new())
    }

    pub fn result_code(&self) -> Option<ResultCode> {
        ResultCode::from_i32(self.result)
    }
}

impl BinarySerializable for CommandReply {
    fn write_to(&self, s: &mut Serializer) {
        s.write_primitive(self.result);
        s.write_primitive(self.command_id);
        s.write_bytes(&self.params);
    }

    fn read_from(d: &mut Deserializer) -> Result<Self, SerializeError> {
        Ok(Self {
            result: d.read_primitive()?,
            command_id: d.read_primitive()?,
            params: d.read_bytes()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_ids_cover_zero_through_four_only() {
        assert!(is_reserved(0));
        assert!(is_reserved(4));
        assert!(is_reserved(99));
        assert!(!is_reserved(100));
        assert_eq!(ReservedCommand::from_id(1), Some(ReservedCommand::Connect));
        assert_eq!(ReservedCommand::from_id(100), None);
    }

    #[test]
    fn command_request_round_trips() {
        let identity = HostIdentity::new("svc", "info", None);
        let request = CommandRequest {
            sender: identity,
            command_id: 100,
            params: vec![1, 2, 3],
        };

        let mut s = Serializer::new();
        s.write_record(&request);
        let bytes = s.into_bytes();

        let mut d = Deserializer::new(&bytes);
        let decoded: CommandRequest = d.read_record().unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn command_reply_round_trips_and_reports_result_code() {
        let reply = CommandReply::new(ResultCode::BadParameters, 101, vec![9]);
        let mut s = Serializer::new();
        s.write_record(&reply);
        let bytes = s.into_bytes();

        let mut d = Deserializer::new(&bytes);
        let decoded: CommandReply = d.read_record().unwrap();
        assert_eq!(decoded, reply);
        assert_eq!(decoded.result_code(), Some(ResultCode::BadParameters));
    }
}
