//! Tokio-TCP-backed implementation of the four transport traits.
//!
//! A u32 big-endian length prefix ahead of every frame, a spawned accept
//! loop per listening socket,
//! and a connection table keyed by a monotonically allocated
//! [`ConnectionId`]. Reply and publish sockets serve many peers; request
//! and subscribe sockets own exactly one outbound connection each.
//!
//! The publish/subscribe pair additionally carries a tiny control protocol:
//! a subscriber sends its full prefix table to the publisher on connect and
//! after every `subscribe`/`unsubscribe` call, so the publisher can filter
//! fan-out per connection instead of broadcasting every message to every
//! subscriber regardless of interest.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

use crate::error::TransportError;
use crate::serializer::{BinarySerializable, Deserializer, Serializer};

use super::{ConnectionId, PublishSocket, ReplySocket, RequestSocket, SubscribeSocket, TransportConfig};

const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

async fn write_frame(writer: &mut OwnedWriteHalf, bytes: &[u8]) -> Result<(), TransportError> {
    if bytes.len() as u64 > MAX_FRAME_LEN as u64 {
        return Err(TransportError::MessageTooLarge(bytes.len()));
    }
    let len = bytes.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_frame(reader: &mut OwnedReadHalf) -> Result<Vec<u8>, TransportError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(TransportError::MessageTooLarge(len as usize));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

fn configure_socket(stream: &TcpStream, config: &TransportConfig) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    let sock_ref = socket2::SockRef::from(stream);
    let _ = sock_ref.set_recv_buffer_size(config.buffer_size);
    let _ = sock_ref.set_send_buffer_size(config.buffer_size);
    Ok(())
}

/// A list of topic prefixes a subscriber currently wants delivered,
/// exchanged as a tiny control frame over the same connection that carries
/// published data in the other direction.
struct SubscriptionUpdate {
    prefixes: Vec<String>,
}

impl BinarySerializable for SubscriptionUpdate {
    fn write_to(&self, s: &mut Serializer) {
        s.write_primitive(self.prefixes.len() as u64);
        for prefix in &self.prefixes {
            s.write_string(prefix);
        }
    }

    fn read_from(d: &mut Deserializer) -> Result<Self, crate::error::SerializeError> {
        let count: u64 = d.read_primitive()?;
        let mut prefixes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            prefixes.push(d.read_string()?);
        }
        Ok(Self { prefixes })
    }
}

/// Envelope wrapper used only on the wire between a [`TcpPublishSocket`] and
/// its subscribers, carrying the topic alongside the already-serialized
/// payload so the receiving side can match it without re-parsing the inner
/// record.
struct WireMessage {
    topic: String,
    payload: Vec<u8>,
}

impl BinarySerializable for WireMessage {
    fn write_to(&self, s: &mut Serializer) {
        s.write_string(&self.topic);
        s.write_bytes(&self.payload);
    }

    fn read_from(d: &mut Deserializer) -> Result<Self, crate::error::SerializeError> {
        Ok(Self {
            topic: d.read_string()?,
            payload: d.read_bytes()?,
        })
    }
}

/// Multi-client reply socket. `bind` spawns an accept loop that hands each
/// accepted connection's read half to a task forwarding frames into a
/// shared inbound channel, tagged with a freshly allocated [`ConnectionId`];
/// write halves are kept in a table so `send_reply` can address a specific
/// connection.
pub struct TcpReplySocket {
    writers: Arc<Mutex<HashMap<ConnectionId, OwnedWriteHalf>>>,
    next_id: Arc<AtomicU64>,
    inbound: Option<mpsc::Receiver<(ConnectionId, Vec<u8>)>>,
    listener_task: Option<tokio::task::JoinHandle<()>>,
}

impl Default for TcpReplySocket {
    fn default() -> Self {
        Self {
            writers: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            inbound: None,
            listener_task: None,
        }
    }
}

#[async_trait]
impl ReplySocket for TcpReplySocket {
    async fn bind(&mut self, endpoint: &str, config: &TransportConfig) -> Result<(), TransportError> {
        let listener = TcpListener::bind(endpoint)
            .await
            .map_err(|source| TransportError::Bind {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let (tx, rx) = mpsc::channel(config.max_connections.max(1));
        self.inbound = Some(rx);

        let writers = self.writers.clone();
        let next_id = self.next_id.clone();
        let config = config.clone();

        let task = tokio::spawn(async move {
            loop {
                let (stream, _addr) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                if configure_socket(&stream, &config).is_err() {
                    continue;
                }
                let (read_half, write_half) = stream.into_split();
                let connection_id = next_id.fetch_add(1, Ordering::SeqCst);
                writers.lock().await.insert(connection_id, write_half);

                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut read_half = read_half;
                    loop {
                        match read_frame(&mut read_half).await {
                            Ok(bytes) => {
                                if tx.send((connection_id, bytes)).await.is_err() {
                                    break;
                                }
                            }
                            Err(_) => break,
                        }
                    }
                });
            }
        });
        self.listener_task = Some(task);
        Ok(())
    }

    async fn receive_request(&mut self) -> Result<(ConnectionId, Vec<u8>), TransportError> {
        let rx = self
            .inbound
            .as_mut()
            .expect("receive_request called before bind");
        rx.recv().await.ok_or(TransportError::Cancelled)
    }

    async fn send_reply(&mut self, connection: ConnectionId, bytes: &[u8]) -> Result<(), TransportError> {
        let mut writers = self.writers.lock().await;
        let writer = writers
            .get_mut(&connection)
            .ok_or(TransportError::NoReachableEndpoint)?;
        write_frame(writer, bytes).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(task) = self.listener_task.take() {
            task.abort();
        }
        self.writers.lock().await.clear();
        Ok(())
    }
}

/// Single-connection, strictly lockstep request socket.
#[derive(Default)]
pub struct TcpRequestSocket {
    read_half: Option<OwnedReadHalf>,
    write_half: Option<OwnedWriteHalf>,
}

#[async_trait]
impl RequestSocket for TcpRequestSocket {
    async fn connect(&mut self, endpoint: &str, config: &TransportConfig) -> Result<(), TransportError> {
        let stream = TcpStream::connect(endpoint)
            .await
            .map_err(|source| TransportError::Connect {
                endpoint: endpoint.to_string(),
                source,
            })?;
        configure_socket(&stream, config)?;
        let (read_half, write_half) = stream.into_split();
        self.read_half = Some(read_half);
        self.write_half = Some(write_half);
        Ok(())
    }

    async fn send_request(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let writer = self.write_half.as_mut().ok_or(TransportError::Cancelled)?;
        write_frame(writer, bytes).await
    }

    async fn receive_reply_within(&mut self, timeout: std::time::Duration) -> Result<Vec<u8>, TransportError> {
        let reader = self.read_half.as_mut().ok_or(TransportError::Cancelled)?;
        match tokio::time::timeout(timeout, read_frame(reader)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    async fn reset(&mut self, endpoint: &str, config: &TransportConfig) -> Result<(), TransportError> {
        self.close().await?;
        self.connect(endpoint, config).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.read_half = None;
        self.write_half = None;
        Ok(())
    }
}

struct PublishConnection {
    writer: OwnedWriteHalf,
    prefixes: Vec<String>,
}

/// Multi-subscriber publish socket. Each accepted connection gets a reader
/// task that only ever receives [`SubscriptionUpdate`] control frames and
/// updates that connection's prefix table; `send` walks the table and
/// writes to every connection with at least one matching prefix.
pub struct TcpPublishSocket {
    connections: Arc<Mutex<HashMap<ConnectionId, PublishConnection>>>,
    next_id: Arc<AtomicU64>,
    listener_task: Option<tokio::task::JoinHandle<()>>,
}

impl Default for TcpPublishSocket {
    fn default() -> Self {
        Self {
            connections: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            listener_task: None,
        }
    }
}

#[async_trait]
impl PublishSocket for TcpPublishSocket {
    async fn bind(&mut self, endpoint: &str, config: &TransportConfig) -> Result<(), TransportError> {
        let listener = TcpListener::bind(endpoint)
            .await
            .map_err(|source| TransportError::Bind {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let connections = self.connections.clone();
        let next_id = self.next_id.clone();
        let config = config.clone();

        let task = tokio::spawn(async move {
            loop {
                let (stream, _addr) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                if configure_socket(&stream, &config).is_err() {
                    continue;
                }
                let (mut read_half, write_half) = stream.into_split();
                let connection_id = next_id.fetch_add(1, Ordering::SeqCst);
                connections.lock().await.insert(
                    connection_id,
                    PublishConnection {
                        writer: write_half,
                        prefixes: Vec::new(),
                    },
                );

                let connections = connections.clone();
                tokio::spawn(async move {
                    loop {
                        let bytes = match read_frame(&mut read_half).await {
                            Ok(bytes) => bytes,
                            Err(_) => break,
                        };
                        let mut d = Deserializer::new(&bytes);
                        let update: SubscriptionUpdate = match d.read_record() {
                            Ok(update) => update,
                            Err(_) => continue,
                        };
                        if let Some(entry) = connections.lock().await.get_mut(&connection_id) {
                            entry.prefixes = update.prefixes;
                        }
                    }
                    connections.lock().await.remove(&connection_id);
                });
            }
        });
        self.listener_task = Some(task);
        Ok(())
    }

    async fn send(&mut self, topic: &str, bytes: &[u8]) -> Result<(), TransportError> {
        let mut s = Serializer::new();
        s.write_record(&WireMessage {
            topic: topic.to_string(),
            payload: bytes.to_vec(),
        });
        let frame = s.into_bytes();

        let mut connections = self.connections.lock().await;
        let mut dead = Vec::new();
        for (id, connection) in connections.iter_mut() {
            if !connection.prefixes.iter().any(|prefix| topic.starts_with(prefix.as_str())) {
                continue;
            }
            if write_frame(&mut connection.writer, &frame).await.is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            connections.remove(&id);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(task) = self.listener_task.take() {
            task.abort();
        }
        self.connections.lock().await.clear();
        Ok(())
    }
}

/// Single-connection subscribe socket: writes [`SubscriptionUpdate`] control
/// frames to the publisher and reads back [`WireMessage`] data frames.
#[derive(Default)]
pub struct TcpSubscribeSocket {
    read_half: Option<OwnedReadHalf>,
    write_half: Option<OwnedWriteHalf>,
    prefixes: Vec<String>,
}

impl TcpSubscribeSocket {
    async fn push_subscription(&mut self) -> Result<(), TransportError> {
        let mut s = Serializer::new();
        s.write_record(&SubscriptionUpdate {
            prefixes: self.prefixes.clone(),
        });
        let frame = s.into_bytes();
        let writer = self.write_half.as_mut().ok_or(TransportError::Cancelled)?;
        write_frame(writer, &frame).await
    }
}

#[async_trait]
impl SubscribeSocket for TcpSubscribeSocket {
    async fn connect(&mut self, endpoint: &str, config: &TransportConfig) -> Result<(), TransportError> {
        let stream = TcpStream::connect(endpoint)
            .await
            .map_err(|source| TransportError::Connect {
                endpoint: endpoint.to_string(),
                source,
            })?;
        configure_socket(&stream, config)?;
        let (read_half, write_half) = stream.into_split();
        self.read_half = Some(read_half);
        self.write_half = Some(write_half);
        self.push_subscription().await
    }

    async fn subscribe(&mut self, topic_prefix: &str) -> Result<(), TransportError> {
        if !self.prefixes.iter().any(|p| p == topic_prefix) {
            self.prefixes.push(topic_prefix.to_string());
        }
        self.push_subscription().await
    }

    async fn unsubscribe(&mut self, topic_prefix: &str) -> Result<(), TransportError> {
        self.prefixes.retain(|p| p != topic_prefix);
        self.push_subscription().await
    }

    async fn receive(&mut self) -> Result<(String, Vec<u8>), TransportError> {
        let reader = self.read_half.as_mut().ok_or(TransportError::Cancelled)?;
        let bytes = read_frame(reader).await?;
        let mut d = Deserializer::new(&bytes);
        let message: WireMessage = d
            .read_record()
            .map_err(|_| TransportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, "bad envelope frame")))?;
        Ok((message.topic, message.payload))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.read_half = None;
        self.write_half = None;
        Ok(())
    }
}
