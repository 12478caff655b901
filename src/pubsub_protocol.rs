//! # PubSub Protocol
//!
//! The envelope prepended to every message on the publish channel: topic,
//! publisher identity, a monotonic per-publisher sequence number, a
//! timestamp, and the opaque payload.

use crate::identity::HostIdentity;
use crate::serializer::{BinarySerializable, Deserializer, Serializer};
use crate::error::SerializeError;

/// Envelope carried by every published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedEnvelope {
    /// UTF-8 topic string, used by the transport for prefix matching.
    pub topic: String,
    pub publisher: HostIdentity,
    /// Monotonically increasing within a single publisher; never reused or
    /// decremented.
    pub sequence: u64,
    /// Epoch nanoseconds, fixed to this one representation so sequence
    /// gaps and latency can be compared without parsing a timestamp string.
    pub timestamp_ns: u64,
    pub payload: Vec<u8>,
}

impl BinarySerializable for PublishedEnvelope {
    fn write_to(&self, s: &mut Serializer) {
        s.write_string(&self.topic);
        s.write_string(&self.publisher.uuid.to_string());
        s.write_string(&self.publisher.ip);
        s.write_string(&self.publisher.hostname);
        s.write_string(&self.publisher.pid);
        s.write_string(&self.publisher.name);
        s.write_string(&self.publisher.info);
        s.write_primitive(self.sequence);
        s.write_primitive(self.timestamp_ns);
        s.write_bytes(&self.payload);
    }

    fn read_from(d: &mut Deserializer) -> Result<Self, SerializeError> {
        let topic = d.read_string()?;
        let uuid_str = d.read_string()?;
        let ip = d.read_string()?;
        let hostname = d.read_string()?;
        let pid = d.read_string()?;
        let name = d.read_string()?;
        let info = d.read_string()?;
        let sequence = d.read_primitive()?;
        let timestamp_ns = d.read_primitive()?;
        let payload = d.read_bytes()?;

        let uuid = uuid::Uuid::parse_str(&uuid_str).unwrap_or_else(|_| uuid::Uuid::nil());

        Ok(Self {
            topic,
            publisher: HostIdentity {
                uuid,
                ip,
                hostname,
                pid,
                name,
                info,
            },
            sequence,
            timestamp_ns,
            payload,
        })
    }
}
