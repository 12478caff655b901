//! # Publisher
//!
//! Binds a fan-out topic channel and assigns every message a
//! monotonically increasing, per-publisher sequence number so subscribers
//! can detect gaps or reordering.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::TransportError;
use crate::identity::HostIdentity;
use crate::pubsub_protocol::PublishedEnvelope;
use crate::serializer::{BinarySerializable, Serializer};
use crate::transport::{PublishSocket, TransportConfig};
use crate::utils::current_timestamp_ns;

/// Publish side of the topic channel. Generic over the transport's
/// concrete [`PublishSocket`] implementation; production code uses
/// [`crate::transport::tcp::TcpPublishSocket`].
pub struct Publisher<T: PublishSocket> {
    transport: T,
    identity: HostIdentity,
    sequence: AtomicU64,
}

impl<T: PublishSocket> Publisher<T> {
    pub fn new(transport: T, identity: HostIdentity) -> Self {
        Self {
            transport,
            identity,
            sequence: AtomicU64::new(0),
        }
    }

    pub async fn start(&mut self, endpoint: &str, config: &TransportConfig) -> Result<(), TransportError> {
        self.transport.bind(endpoint, config).await
    }

    /// Publish one message on `topic`. `payload` is any
    /// [`BinarySerializable`] value; the envelope wrapping it carries this
    /// publisher's identity and the next sequence number.
    pub async fn send<P: BinarySerializable>(&mut self, topic: &str, payload: &P) -> Result<u64, TransportError> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        let mut payload_writer = Serializer::new();
        payload_writer.write_record(payload);

        let envelope = PublishedEnvelope {
            topic: topic.to_string(),
            publisher: self.identity.clone(),
            sequence,
            timestamp_ns: current_timestamp_ns(),
            payload: payload_writer.into_bytes(),
        };

        let mut s = Serializer::new();
        s.write_record(&envelope);
        self.transport.send(topic, &s.into_bytes()).await?;
        Ok(sequence)
    }

    pub async fn stop(&mut self) -> Result<(), TransportError> {
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPublishSocket {
        sent: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl PublishSocket for RecordingPublishSocket {
        async fn bind(&mut self, _endpoint: &str, _config: &TransportConfig) -> Result<(), TransportError> {
            Ok(())
        }
        async fn send(&mut self, topic: &str, bytes: &[u8]) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push((topic.to_string(), bytes.to_vec()));
            Ok(())
        }
        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[derive(Debug, PartialEq)]
    struct Payload(String);

    impl BinarySerializable for Payload {
        fn write_to(&self, s: &mut Serializer) {
            s.write_string(&self.0);
        }
        fn read_from(d: &mut crate::serializer::Deserializer) -> Result<Self, crate::error::SerializeError> {
            Ok(Self(d.read_string()?))
        }
    }

    #[tokio::test]
    async fn sequence_numbers_increase_monotonically() {
        let mut publisher = Publisher::new(RecordingPublishSocket::default(), HostIdentity::new("pub", "", None));
        let first = publisher.send("t/a", &Payload("one".to_string())).await.unwrap();
        let second = publisher.send("t/a", &Payload("two".to_string())).await.unwrap();
        assert_eq!(first, 0);
        assert_eq!(second, 1);
    }
}
