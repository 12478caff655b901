//! # Error Types
//!
//! Error taxonomy for the messaging runtime, following the categories laid
//! out for the wire protocol: serialization failures are always terminal
//! for the offending message, transport failures never escape the
//! component that owns the socket (they become a result code plus a
//! lifecycle event), and protocol/application failures become result codes
//! on the reply. See [`crate::protocol::ResultCode`] for the user-visible
//! half of this taxonomy.

use thiserror::Error;

/// Errors raised by the binary serializer (component A).
///
/// Always terminal for the message being read or written; a reader that
/// hits one of these must discard the in-flight message rather than try to
/// resynchronize the stream.
#[derive(Debug, Error)]
pub enum SerializeError {
    /// Fewer bytes remained in the buffer than the operation needed.
    #[error("insufficient data: needed {needed} bytes, {remaining} remaining")]
    InsufficientData { needed: usize, remaining: usize },

    /// A string read was expected to carry the string type tag but did not.
    #[error("type mismatch: expected tag {expected}, found {found}")]
    TypeMismatch { expected: u64, found: u64 },

    /// A declared element size could not possibly fit in the remaining buffer.
    #[error("declared element size {declared} exceeds remaining buffer of {remaining} bytes")]
    ElementTooLarge { declared: u64, remaining: usize },

    /// Bytes did not form valid UTF-8 where a string was expected.
    #[error("invalid UTF-8 in string payload: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Errors raised by the transport abstraction (component B).
///
/// These never propagate past the component that owns the socket; server,
/// client, publisher, and subscriber all convert them into a result code,
/// a local error, or a lifecycle event as appropriate.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind endpoint {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to endpoint {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on socket: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled: component is stopping")]
    Cancelled,

    #[error("send timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("message of {0} bytes exceeds the transport's maximum message size")]
    MessageTooLarge(usize),

    #[error("no endpoint in the supplied list could be reached")]
    NoReachableEndpoint,
}

/// Errors the callback registry (component D) can raise during dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no callback registered for command {0}")]
    CallbackMissing(i32),

    #[error("failed to deserialize parameters: {0}")]
    BadParameters(#[from] SerializeError),

    #[error("callback for command {0} failed: {1}")]
    CallbackFailed(i32, String),
}

/// Local, client-side error returned by [`crate::command_client::CommandClient`]
/// when a command could not be completed. Distinct from [`crate::protocol::ResultCode`],
/// which is the *server's* verdict carried in a well-formed reply.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is not started")]
    NotStarted,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Serialize(#[from] SerializeError),

    #[error("command id {0} is reserved and cannot be sent by user code")]
    ReservedCommand(i32),

    /// The server answered with a well-formed reply carrying a non-`Ok`
    /// result code; callers see this instead of a parsed reply value.
    #[error("command {command_id} failed with result {result:?}")]
    CommandFailed {
        command_id: i32,
        result: crate::protocol::ResultCode,
    },
}

/// Errors a [`crate::subscriber::Subscriber`] reports through its observer
/// interface while running its receive loop.
#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("envelope could not be parsed: {0}")]
    BadEnvelope(#[from] SerializeError),

    #[error("no callback registered for topic {0:?} despite a matching prefix subscription")]
    UnknownTopic(String),

    #[error("payload for topic {0:?} could not be deserialized into the registered type")]
    BadPayload(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
