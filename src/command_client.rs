//! # Command Client
//!
//! The request side of the command channel. A client is `Stopped` until
//! [`CommandClient::start`] connects and sends `CONNECT`; from then on it
//! alternates between `Idle` and `InFlight` as commands are sent, with at
//! most one request ever outstanding on the wire at a time, the same
//! lockstep discipline the reserved `ALIVE` keepalive uses, so a keepalive
//! firing mid-command simply waits its turn rather than racing it.
//!
//! Any transport error or timeout during a command forces a reset of the
//! underlying connection: the client does not try to guess whether the
//! peer is still in sync after a partial round trip, it reconnects and
//! lets the server's `CONNECT` handling re-establish state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{ClientError, TransportError};
use crate::identity::HostIdentity;
use crate::protocol::{CommandReply, CommandRequest, ReservedCommand, ResultCode};
use crate::serializer::{BinarySerializable, Deserializer, Serializer};
use crate::transport::{RequestSocket, TransportConfig};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub transport: TransportConfig,
    pub command_timeout: Duration,
    pub keepalive_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            command_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientLifecycle {
    Stopped,
    Started,
}

/// Lifecycle events a [`CommandClient`] fires. Every method defaults to a
/// no-op.
pub trait ClientObserver: Send + Sync {
    fn on_started(&self) {}
    fn on_stopped(&self) {}
    fn on_timeout(&self, command_id: i32) {}
    fn on_reset(&self, reason: &str) {}
    fn on_keepalive_failed(&self, reason: &str) {}
}

#[derive(Default)]
pub struct NullClientObserver;
impl ClientObserver for NullClientObserver {}

/// Request/reply command client. Generic over the transport's concrete
/// [`RequestSocket`] implementation; production code uses
/// [`crate::transport::tcp::TcpRequestSocket`].
pub struct CommandClient<T: RequestSocket + 'static> {
    config: ClientConfig,
    endpoint: String,
    transport: Arc<Mutex<T>>,
    identity: HostIdentity,
    lifecycle: Arc<AtomicBool>,
    in_flight: Arc<AtomicBool>,
    observer: Arc<dyn ClientObserver>,
    keepalive_task: Option<JoinHandle<()>>,
}

impl<T: RequestSocket + 'static> CommandClient<T> {
    pub fn new(config: ClientConfig, transport: T, identity: HostIdentity, observer: Arc<dyn ClientObserver>) -> Self {
        Self {
            config,
            endpoint: String::new(),
            transport: Arc::new(Mutex::new(transport)),
            identity,
            lifecycle: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicBool::new(false)),
            observer,
            keepalive_task: None,
        }
    }

    pub fn lifecycle(&self) -> ClientLifecycle {
        if self.lifecycle.load(Ordering::SeqCst) {
            ClientLifecycle::Started
        } else {
            ClientLifecycle::Stopped
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Connect, send `CONNECT`, and start the background keepalive task.
    pub async fn start(&mut self, endpoint: &str) -> Result<(), ClientError> {
        self.endpoint = endpoint.to_string();
        self.transport.lock().await.connect(endpoint, &self.config.transport).await?;

        self.send_reserved(ReservedCommand::Connect, Vec::new()).await?;
        self.lifecycle.store(true, Ordering::SeqCst);
        self.observer.on_started();

        let transport = self.transport.clone();
        let in_flight = self.in_flight.clone();
        let lifecycle = self.lifecycle.clone();
        let observer = self.observer.clone();
        let endpoint = self.endpoint.clone();
        let transport_config = self.config.transport.clone();
        let interval = self.config.keepalive_interval;
        let timeout = self.config.command_timeout;
        let identity = self.identity.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !lifecycle.load(Ordering::SeqCst) {
                    break;
                }
                let request = CommandRequest {
                    sender: identity.clone(),
                    command_id: ReservedCommand::Alive.id(),
                    params: Vec::new(),
                };
                let outcome = roundtrip(&transport, &in_flight, &endpoint, &transport_config, timeout, request, &observer).await;
                if let Err(err) = outcome {
                    observer.on_keepalive_failed(&err.to_string());
                }
            }
        });
        self.keepalive_task = Some(task);
        Ok(())
    }

    /// Send a user command and deserialize its reply parameters as `R`.
    /// Rejects `command_id`s in the reserved range without ever touching
    /// the wire.
    pub async fn send_command<P, R>(&self, command_id: i32, params: P) -> Result<R, ClientError>
    where
        P: BinarySerializable,
        R: BinarySerializable,
    {
        if !self.lifecycle.load(Ordering::SeqCst) {
            return Err(ClientError::NotStarted);
        }
        if crate::protocol::is_reserved(command_id) {
            return Err(ClientError::ReservedCommand(command_id));
        }

        let mut s = Serializer::new();
        s.write_record(&params);

        let request = CommandRequest {
            sender: self.identity.clone(),
            command_id,
            params: s.into_bytes(),
        };

        let reply = roundtrip(
            &self.transport,
            &self.in_flight,
            &self.endpoint,
            &self.config.transport,
            self.config.command_timeout,
            request,
            &self.observer,
        )
        .await?;
        self.reply_into::<R>(reply)
    }

    async fn send_reserved(&self, command: ReservedCommand, params: Vec<u8>) -> Result<CommandReply, ClientError> {
        let request = CommandRequest {
            sender: self.identity.clone(),
            command_id: command.id(),
            params,
        };
        roundtrip(
            &self.transport,
            &self.in_flight,
            &self.endpoint,
            &self.config.transport,
            self.config.command_timeout,
            request,
            &self.observer,
        )
        .await
    }

    fn reply_into<R: BinarySerializable>(&self, reply: CommandReply) -> Result<R, ClientError> {
        match reply.result_code() {
            Some(ResultCode::Ok) => {
                let mut d = Deserializer::new(&reply.params);
                Ok(d.read_record::<R>()?)
            }
            Some(other) => Err(ClientError::CommandFailed {
                command_id: reply.command_id,
                result: other,
            }),
            None => Err(ClientError::CommandFailed {
                command_id: reply.command_id,
                result: ResultCode::InvalidMsg,
            }),
        }
    }

    /// Force-close and reconnect the underlying transport without changing
    /// lifecycle state, re-sending `CONNECT` so the server re-registers
    /// this client.
    pub async fn reset_client(&self) -> Result<(), ClientError> {
        reset_transport(&self.transport, &self.endpoint, &self.config.transport).await?;
        self.send_reserved(ReservedCommand::Connect, Vec::new()).await?;
        self.observer.on_reset("explicit reset_client call");
        Ok(())
    }

    /// Best-effort `DISCONNECT`, bounded by `command_timeout`, then close
    /// the transport and stop the keepalive task regardless of whether the
    /// disconnect reply arrived.
    pub async fn stop(&mut self) -> Result<(), ClientError> {
        self.lifecycle.store(false, Ordering::SeqCst);
        if let Some(task) = self.keepalive_task.take() {
            task.abort();
        }

        let disconnect = self.send_reserved(ReservedCommand::Disconnect, Vec::new()).await;
        if let Err(err) = disconnect {
            debug!(%err, "disconnect during stop() did not complete cleanly");
        }

        self.transport.lock().await.close().await?;
        self.observer.on_stopped();
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn roundtrip<T: RequestSocket>(
    transport: &Arc<Mutex<T>>,
    in_flight: &Arc<AtomicBool>,
    endpoint: &str,
    config: &TransportConfig,
    timeout: Duration,
    request: CommandRequest,
    observer: &Arc<dyn ClientObserver>,
) -> Result<CommandReply, ClientError> {
    in_flight.store(true, Ordering::SeqCst);
    let result = roundtrip_inner(transport, endpoint, config, timeout, request, observer).await;
    in_flight.store(false, Ordering::SeqCst);
    result
}

/// Send `request` and wait for its reply. A timeout or transport error
/// during the round trip resets the connection before the error is
/// returned: the client never tries to guess whether the peer is still in
/// sync after a partial exchange.
async fn roundtrip_inner<T: RequestSocket>(
    transport: &Arc<Mutex<T>>,
    endpoint: &str,
    config: &TransportConfig,
    timeout: Duration,
    request: CommandRequest,
    observer: &Arc<dyn ClientObserver>,
) -> Result<CommandReply, ClientError> {
    let command_id = request.command_id;
    let mut s = Serializer::new();
    s.write_record(&request);
    let bytes = s.into_bytes();

    let reply_bytes = {
        let mut guard = transport.lock().await;
        let outcome: Result<Vec<u8>, TransportError> = match guard.send_request(&bytes).await {
            Ok(()) => guard.receive_reply_within(timeout).await,
            Err(err) => Err(err),
        };
        drop(guard);
        match outcome {
            Ok(bytes) => bytes,
            Err(err) => {
                if matches!(err, TransportError::Timeout(_)) {
                    observer.on_timeout(command_id);
                }
                if reset_transport(transport, endpoint, config).await.is_err() {
                    warn!("reset after a failed command did not complete cleanly");
                }
                return Err(err.into());
            }
        }
    };

    let mut d = Deserializer::new(&reply_bytes);
    Ok(d.read_record::<CommandReply>()?)
}

async fn reset_transport<T: RequestSocket>(
    transport: &Arc<Mutex<T>>,
    endpoint: &str,
    config: &TransportConfig,
) -> Result<(), ClientError> {
    transport.lock().await.reset(endpoint, config).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Unit;

    impl BinarySerializable for Unit {
        fn write_to(&self, _s: &mut Serializer) {}
        fn read_from(_d: &mut Deserializer) -> Result<Self, crate::error::SerializeError> {
            Ok(Unit)
        }
    }

    #[test]
    fn reply_into_surfaces_non_ok_result_as_error() {
        let reply = CommandReply::empty(ResultCode::UnknownCommand, 500);
        let client: CommandClient<crate::transport::tcp::TcpRequestSocket> = CommandClient::new(
            ClientConfig::default(),
            crate::transport::tcp::TcpRequestSocket::default(),
            HostIdentity::new("test", "", None),
            Arc::new(NullClientObserver),
        );
        let result: Result<Unit, ClientError> = client.reply_into(reply);
        assert!(result.is_err());
    }
}
