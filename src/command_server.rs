//! # Command Server
//!
//! Runs the reply side of the request/reply command channel: accepts
//! connections, tracks each peer's connect/keepalive/dead lifecycle,
//! handles the reserved commands itself (`CONNECT`, `DISCONNECT`, `ALIVE`,
//! `GET_SERVER_TIME`), and dispatches everything else through a
//! [`CallbackRegistry`].
//!
//! A client is tracked from its derived id ([`HostIdentity::derived_id`])
//! the moment it sends `CONNECT`; it stays `Connected` as long as it keeps
//! sending requests (any request, not just `ALIVE`, refreshes `last_seen`)
//! and is swept to dead, firing [`CommandServerObserver::on_dead_client`],
//! once `keepalive_timeout` elapses without a request. A derived id the
//! server has never seen `CONNECT` from is `Unknown`: by default (see
//! [`UnknownClientPolicy`]) every command other than `CONNECT` is rejected
//! with [`ResultCode::ClientNotConnected`] until it does; the policy can be
//! relaxed to implicitly register the client instead.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::callback::CallbackRegistry;
use crate::error::DispatchError;
use crate::protocol::{CommandReply, CommandRequest, ReservedCommand, ResultCode};
use crate::serializer::{BinarySerializable, Deserializer, Serializer};
use crate::transport::{ConnectionId, ReplySocket, TransportConfig, TransportContext};
use crate::utils::current_timestamp_ns;

/// Server-side configuration, analogous to the transport's own
/// [`TransportConfig`] but scoped to policy the server owns: how long a
/// silent client is tolerated, and how often the sweep looks for one.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub transport: TransportConfig,
    pub keepalive_timeout: Duration,
    pub sweep_interval: Duration,
    pub unknown_client_policy: UnknownClientPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            keepalive_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            unknown_client_policy: UnknownClientPolicy::Strict,
        }
    }
}

/// What to do with a non-`CONNECT` command from a derived id the server has
/// never seen `CONNECT` from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownClientPolicy {
    /// Reject with [`ResultCode::ClientNotConnected`]. The default.
    Strict,
    /// Implicitly register the client, as if it had just sent `CONNECT`,
    /// and dispatch the command normally.
    Accept,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connected,
    Dead,
}

#[derive(Debug, Clone)]
struct ClientRecord {
    connection_id: ConnectionId,
    last_seen: Instant,
    state: ClientState,
}

/// Lifecycle and traffic events a [`CommandServer`] fires as it runs.
/// Every method defaults to a no-op, so an observer can implement only the
/// handful of events it cares about.
pub trait CommandServerObserver: Send + Sync {
    fn on_start(&self) {}
    fn on_stop(&self) {}
    fn on_waiting_command(&self) {}
    fn on_command_received(&self, client_id: &str, command_id: i32) {}
    fn on_invalid_msg_received(&self, connection_id: ConnectionId) {}
    fn on_sending_response(&self, client_id: &str, command_id: i32, result: ResultCode) {}
    fn on_connected(&self, client_id: &str) {}
    fn on_disconnected(&self, client_id: &str) {}
    fn on_dead_client(&self, client_id: &str) {}
    fn on_server_error(&self, message: &str) {}
}

/// An observer that does nothing; the default when the caller does not
/// need lifecycle events.
#[derive(Default)]
pub struct NullObserver;
impl CommandServerObserver for NullObserver {}

#[derive(Debug, PartialEq, Eq)]
struct ServerTimeReply {
    epoch_ns: u64,
}

impl BinarySerializable for ServerTimeReply {
    fn write_to(&self, s: &mut Serializer) {
        s.write_primitive(self.epoch_ns);
    }
    fn read_from(d: &mut Deserializer) -> Result<Self, crate::error::SerializeError> {
        Ok(Self {
            epoch_ns: d.read_primitive()?,
        })
    }
}

/// Request/reply command server. Generic over the transport's concrete
/// [`ReplySocket`] implementation so tests can swap in a fake one;
/// production code uses [`crate::transport::tcp::TcpReplySocket`].
pub struct CommandServer<T: ReplySocket + 'static> {
    config: ServerConfig,
    transport: Arc<Mutex<T>>,
    registry: CallbackRegistry,
    clients: Arc<Mutex<HashMap<String, ClientRecord>>>,
    observer: Arc<dyn CommandServerObserver>,
    context: TransportContext,
    serve_task: Option<JoinHandle<()>>,
    sweep_task: Option<JoinHandle<()>>,
}

impl<T: ReplySocket + 'static> CommandServer<T> {
    pub fn new(config: ServerConfig, transport: T, observer: Arc<dyn CommandServerObserver>) -> Self {
        Self {
            config,
            transport: Arc::new(Mutex::new(transport)),
            registry: CallbackRegistry::new(),
            clients: Arc::new(Mutex::new(HashMap::new())),
            observer,
            context: TransportContext::new(),
            serve_task: None,
            sweep_task: None,
        }
    }

    /// Register a handler for a user command id. Panics if `command_id`
    /// falls in the reserved range `0..=99`, since those are owned by the
    /// server itself.
    pub fn register_command<P, R, F, Fut>(&mut self, command_id: i32, handler: F)
    where
        P: BinarySerializable + Send + 'static,
        R: BinarySerializable + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<R, String>> + Send + 'static,
    {
        assert!(
            !crate::protocol::is_reserved(command_id),
            "command id {command_id} is reserved and cannot be overridden"
        );
        self.registry.register(command_id, handler);
    }

    /// Bind and begin serving in the background. Returns once binding has
    /// succeeded; the accept/dispatch loop and the dead-client sweep both
    /// run as spawned tasks from here on.
    pub async fn start(&mut self, endpoint: &str) -> Result<(), crate::error::TransportError> {
        {
            let mut transport = self.transport.lock().await;
            transport.bind(endpoint, &self.config.transport).await?;
        }
        self.observer.on_start();

        let transport = self.transport.clone();
        let registry = self.registry.clone();
        let clients = self.clients.clone();
        let observer = self.observer.clone();
        let context = self.context.clone();
        let unknown_client_policy = self.config.unknown_client_policy;

        let serve_task = tokio::spawn(async move {
            loop {
                observer.on_waiting_command();
                let received = context
                    .cancellable({
                        let transport = transport.clone();
                        async move { transport.lock().await.receive_request().await }
                    })
                    .await;

                let (connection_id, bytes) = match received {
                    Ok(Ok(pair)) => pair,
                    Ok(Err(_)) | Err(_) => break,
                };

                let mut d = Deserializer::new(&bytes);
                let request: CommandRequest = match d.read_record() {
                    Ok(request) => request,
                    Err(_) => {
                        observer.on_invalid_msg_received(connection_id);
                        let reply = CommandReply::empty(ResultCode::InvalidMsg, ReservedCommand::Invalid.id());
                        let mut s = Serializer::new();
                        s.write_record(&reply);
                        let mut transport = transport.lock().await;
                        let _ = transport.send_reply(connection_id, &s.into_bytes()).await;
                        continue;
                    }
                };

                let client_id = request.sender.derived_id();
                observer.on_command_received(&client_id, request.command_id);

                let reply = handle_request(
                    &registry,
                    &clients,
                    &observer,
                    connection_id,
                    &client_id,
                    request,
                    unknown_client_policy,
                )
                .await;

                if let Some(result_code) = reply.result_code() {
                    observer.on_sending_response(&client_id, reply.command_id, result_code);
                }

                let mut s = Serializer::new();
                s.write_record(&reply);
                let reply_bytes = s.into_bytes();

                let mut transport = transport.lock().await;
                if transport.send_reply(connection_id, &reply_bytes).await.is_err() {
                    observer.on_server_error("failed to send reply; connection likely closed");
                }
            }
        });

        let clients = self.clients.clone();
        let observer = self.observer.clone();
        let keepalive_timeout = self.config.keepalive_timeout;
        let sweep_interval = self.config.sweep_interval;
        let context = self.context.clone();

        let sweep_task = tokio::spawn(async move {
            loop {
                if context.cancellable(tokio::time::sleep(sweep_interval)).await.is_err() {
                    break;
                }
                let mut clients = clients.lock().await;
                let mut dead = Vec::new();
                for (id, record) in clients.iter_mut() {
                    if record.state == ClientState::Connected && record.last_seen.elapsed() > keepalive_timeout {
                        record.state = ClientState::Dead;
                        dead.push(id.clone());
                    }
                }
                for id in &dead {
                    clients.remove(id);
                    observer.on_dead_client(id);
                }
            }
        });

        self.serve_task = Some(serve_task);
        self.sweep_task = Some(sweep_task);
        Ok(())
    }

    /// Stop serving, cancel the sweep task, and close the transport.
    pub async fn stop(&mut self) -> Result<(), crate::error::TransportError> {
        self.context.stop();
        if let Some(task) = self.serve_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.sweep_task.take() {
            task.abort();
        }
        self.transport.lock().await.close().await?;
        self.observer.on_stop();
        Ok(())
    }

    pub async fn connected_client_ids(&self) -> Vec<String> {
        self.clients.lock().await.keys().cloned().collect()
    }
}

async fn handle_request(
    registry: &CallbackRegistry,
    clients: &Arc<Mutex<HashMap<String, ClientRecord>>>,
    observer: &Arc<dyn CommandServerObserver>,
    connection_id: ConnectionId,
    client_id: &str,
    request: CommandRequest,
    unknown_client_policy: UnknownClientPolicy,
) -> CommandReply {
    if request.command_id < 0 {
        return CommandReply::empty(ResultCode::BadCommand, request.command_id);
    }

    if let Some(reserved) = ReservedCommand::from_id(request.command_id) {
        return handle_reserved(clients, observer, connection_id, client_id, reserved, request.command_id).await;
    }

    if crate::protocol::is_reserved(request.command_id) {
        return CommandReply::empty(ResultCode::UnknownCommand, request.command_id);
    }

    let mut known = clients.lock().await;
    match known.get_mut(client_id) {
        Some(record) => {
            record.last_seen = Instant::now();
            record.connection_id = connection_id;
        }
        None => match unknown_client_policy {
            UnknownClientPolicy::Strict => return CommandReply::empty(ResultCode::ClientNotConnected, request.command_id),
            UnknownClientPolicy::Accept => {
                known.insert(
                    client_id.to_string(),
                    ClientRecord {
                        connection_id,
                        last_seen: Instant::now(),
                        state: ClientState::Connected,
                    },
                );
                observer.on_connected(client_id);
            }
        },
    }
    drop(known);

    match registry.dispatch(request.command_id, request.params).await {
        Ok(params) => CommandReply::new(ResultCode::Ok, request.command_id, params),
        Err(DispatchError::CallbackMissing(id)) => CommandReply::empty(ResultCode::NotImplemented, id),
        Err(DispatchError::BadParameters(_)) => CommandReply::empty(ResultCode::BadParameters, request.command_id),
        Err(DispatchError::CallbackFailed(id, message)) => {
            warn!(command_id = id, %message, "command handler failed");
            CommandReply::empty(ResultCode::CommandFailed, id)
        }
    }
}

async fn handle_reserved(
    clients: &Arc<Mutex<HashMap<String, ClientRecord>>>,
    observer: &Arc<dyn CommandServerObserver>,
    connection_id: ConnectionId,
    client_id: &str,
    reserved: ReservedCommand,
    command_id: i32,
) -> CommandReply {
    match reserved {
        ReservedCommand::Connect => {
            clients.lock().await.insert(
                client_id.to_string(),
                ClientRecord {
                    connection_id,
                    last_seen: Instant::now(),
                    state: ClientState::Connected,
                },
            );
            observer.on_connected(client_id);
            info!(client_id, "client connected");
            CommandReply::empty(ResultCode::Ok, command_id)
        }
        ReservedCommand::Disconnect => {
            let existed = clients.lock().await.remove(client_id).is_some();
            if existed {
                observer.on_disconnected(client_id);
                debug!(client_id, "client disconnected");
                CommandReply::empty(ResultCode::Ok, command_id)
            } else {
                CommandReply::empty(ResultCode::ClientNotConnected, command_id)
            }
        }
        ReservedCommand::Alive => {
            let mut known = clients.lock().await;
            match known.get_mut(client_id) {
                Some(record) => {
                    record.last_seen = Instant::now();
                    CommandReply::empty(ResultCode::Ok, command_id)
                }
                None => CommandReply::empty(ResultCode::ClientNotConnected, command_id),
            }
        }
        ReservedCommand::GetServerTime => {
            let mut known = clients.lock().await;
            match known.get_mut(client_id) {
                Some(record) => record.last_seen = Instant::now(),
                None => return CommandReply::empty(ResultCode::ClientNotConnected, command_id),
            }
            drop(known);
            let mut s = Serializer::new();
            s.write_record(&ServerTimeReply {
                epoch_ns: current_timestamp_ns(),
            });
            CommandReply::new(ResultCode::Ok, command_id, s.into_bytes())
        }
        ReservedCommand::Invalid => CommandReply::empty(ResultCode::InvalidMsg, command_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::HostIdentity;

    fn make_request(identity: &HostIdentity, command_id: i32, params: Vec<u8>) -> Vec<u8> {
        let request = CommandRequest {
            sender: identity.clone(),
            command_id,
            params,
        };
        let mut s = Serializer::new();
        s.write_record(&request);
        s.into_bytes()
    }

    #[tokio::test]
    async fn unconnected_client_is_rejected_for_non_connect_commands() {
        let clients: Arc<Mutex<HashMap<String, ClientRecord>>> = Arc::new(Mutex::new(HashMap::new()));
        let observer: Arc<dyn CommandServerObserver> = Arc::new(NullObserver);
        let registry = CallbackRegistry::new();
        let identity = HostIdentity::new("test", "", None);

        let request = CommandRequest {
            sender: identity.clone(),
            command_id: 100,
            params: Vec::new(),
        };
        let reply = handle_request(&registry, &clients, &observer, 1, &identity.derived_id(), request, UnknownClientPolicy::Strict).await;
        assert_eq!(reply.result_code(), Some(ResultCode::ClientNotConnected));
    }

    #[tokio::test]
    async fn connect_then_unregistered_user_command_reports_not_implemented() {
        let clients: Arc<Mutex<HashMap<String, ClientRecord>>> = Arc::new(Mutex::new(HashMap::new()));
        let observer: Arc<dyn CommandServerObserver> = Arc::new(NullObserver);
        let registry = CallbackRegistry::new();
        let identity = HostIdentity::new("test", "", None);
        let client_id = identity.derived_id();

        let connect = CommandRequest {
            sender: identity.clone(),
            command_id: ReservedCommand::Connect.id(),
            params: Vec::new(),
        };
        let connect_reply = handle_request(&registry, &clients, &observer, 1, &client_id, connect, UnknownClientPolicy::Strict).await;
        assert_eq!(connect_reply.result_code(), Some(ResultCode::Ok));

        let unregistered = CommandRequest {
            sender: identity.clone(),
            command_id: 500,
            params: Vec::new(),
        };
        let reply = handle_request(&registry, &clients, &observer, 1, &client_id, unregistered, UnknownClientPolicy::Strict).await;
        assert_eq!(reply.result_code(), Some(ResultCode::NotImplemented));

        let unassigned_reserved = CommandRequest {
            sender: identity,
            command_id: 50,
            params: Vec::new(),
        };
        let reply = handle_request(&registry, &clients, &observer, 1, &client_id, unassigned_reserved, UnknownClientPolicy::Strict).await;
        assert_eq!(reply.result_code(), Some(ResultCode::UnknownCommand));
    }

    #[tokio::test]
    async fn negative_command_id_reports_bad_command() {
        let clients: Arc<Mutex<HashMap<String, ClientRecord>>> = Arc::new(Mutex::new(HashMap::new()));
        let observer: Arc<dyn CommandServerObserver> = Arc::new(NullObserver);
        let registry = CallbackRegistry::new();
        let identity = HostIdentity::new("test", "", None);
        let client_id = identity.derived_id();

        let request = CommandRequest {
            sender: identity,
            command_id: -7,
            params: Vec::new(),
        };
        let reply = handle_request(&registry, &clients, &observer, 1, &client_id, request, UnknownClientPolicy::Strict).await;
        assert_eq!(reply.result_code(), Some(ResultCode::BadCommand));
    }

    #[tokio::test]
    async fn accept_policy_implicitly_registers_an_unknown_client() {
        let clients: Arc<Mutex<HashMap<String, ClientRecord>>> = Arc::new(Mutex::new(HashMap::new()));
        let observer: Arc<dyn CommandServerObserver> = Arc::new(NullObserver);
        let mut registry = CallbackRegistry::new();
        registry.register(100, |text: String| async move { Ok(text) });
        let identity = HostIdentity::new("test", "", None);
        let client_id = identity.derived_id();

        let request = CommandRequest {
            sender: identity,
            command_id: 100,
            params: Vec::new(),
        };
        let reply =
            handle_request(&registry, &clients, &observer, 1, &client_id, request, UnknownClientPolicy::Accept).await;
        assert_ne!(reply.result_code(), Some(ResultCode::ClientNotConnected));
        assert!(clients.lock().await.contains_key(&client_id));
    }

    #[test]
    fn make_request_helper_produces_parseable_bytes() {
        let identity = HostIdentity::new("test", "", None);
        let bytes = make_request(&identity, 100, vec![1, 2, 3]);
        let mut d = Deserializer::new(&bytes);
        let decoded: CommandRequest = d.read_record().unwrap();
        assert_eq!(decoded.command_id, 100);
    }
}
