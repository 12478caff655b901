//! # commsrt
//!
//! A high-level messaging runtime providing two reusable primitives over a
//! ZeroMQ-style transport: a request/reply command channel
//! ([`command_server`], [`command_client`]) and a fan-out topic channel
//! ([`publisher`], [`subscriber`]). [`transport`] specifies the abstract
//! socket contract both channels are built on and backs it with Tokio TCP;
//! [`serializer`] is the wire codec every message on either channel uses.

pub mod callback;
pub mod command_client;
pub mod command_server;
pub mod error;
pub mod identity;
pub mod logging;
pub mod protocol;
pub mod publisher;
pub mod pubsub_protocol;
pub mod serializer;
pub mod subscriber;
pub mod transport;
pub mod utils;

pub use callback::CallbackRegistry;
pub use command_client::{ClientConfig, ClientLifecycle, CommandClient};
pub use command_server::{CommandServer, ServerConfig};
pub use identity::HostIdentity;
pub use protocol::{CommandReply, CommandRequest, ReservedCommand, ResultCode};
pub use publisher::Publisher;
pub use pubsub_protocol::PublishedEnvelope;
pub use serializer::{BinarySerializable, Deserializer, Serializer};
pub use subscriber::{ErrorPolicy, Subscriber};
pub use transport::{ConnectionId, TransportConfig, TransportContext};

/// The current version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
