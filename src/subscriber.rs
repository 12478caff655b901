//! # Subscriber
//!
//! Connects to a publisher, maintains a prefix subscription table, and
//! dispatches received messages to handlers registered against an exact
//! topic string (prefix matching happens on the publisher side; a
//! subscriber's own handlers are looked up by the message's literal
//! topic).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::{SerializeError, TransportError};
use crate::pubsub_protocol::PublishedEnvelope;
use crate::serializer::{BinarySerializable, Deserializer};
use crate::transport::{SubscribeSocket, TransportConfig};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
type ErasedTopicHandler = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// What a subscriber does when it receives a message for a topic it has
/// no handler for, or one whose payload fails to deserialize: keep running
/// and report the problem through the observer, or stop the receive loop
/// entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    EmitEvent,
    Halt,
}

/// Lifecycle and traffic events a [`Subscriber`] fires. Every method
/// defaults to a no-op.
pub trait SubscriberObserver: Send + Sync {
    fn on_subscribed(&self, prefix: &str) {}
    fn on_unsubscribed(&self, prefix: &str) {}
    fn on_msg_received(&self, topic: &str, publisher_id: &str, sequence: u64) {}
    fn on_invalid_msg_received(&self, reason: &str) {}
    fn on_error(&self, message: &str) {}
}

#[derive(Default)]
pub struct NullSubscriberObserver;
impl SubscriberObserver for NullSubscriberObserver {}

/// Subscribe side of the topic channel. Generic over the transport's
/// concrete [`SubscribeSocket`] implementation; production code uses
/// [`crate::transport::tcp::TcpSubscribeSocket`].
pub struct Subscriber<T: SubscribeSocket + 'static> {
    transport: Arc<tokio::sync::Mutex<T>>,
    handlers: Arc<tokio::sync::Mutex<HashMap<String, ErasedTopicHandler>>>,
    observer: Arc<dyn SubscriberObserver>,
    error_policy: ErrorPolicy,
    receive_task: Option<JoinHandle<()>>,
}

impl<T: SubscribeSocket + 'static> Subscriber<T> {
    pub fn new(transport: T, observer: Arc<dyn SubscriberObserver>, error_policy: ErrorPolicy) -> Self {
        Self {
            transport: Arc::new(tokio::sync::Mutex::new(transport)),
            handlers: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            observer,
            error_policy,
            receive_task: None,
        }
    }

    pub async fn start(&mut self, endpoint: &str, config: &TransportConfig) -> Result<(), TransportError> {
        self.transport.lock().await.connect(endpoint, config).await?;

        let transport = self.transport.clone();
        let handlers = self.handlers.clone();
        let observer = self.observer.clone();
        let error_policy = self.error_policy;

        let task = tokio::spawn(async move {
            loop {
                let received = transport.lock().await.receive().await;
                let (_wire_topic, envelope_bytes) = match received {
                    Ok(pair) => pair,
                    Err(err) => {
                        observer.on_error(&err.to_string());
                        if error_policy == ErrorPolicy::Halt {
                            break;
                        }
                        continue;
                    }
                };

                let mut d = Deserializer::new(&envelope_bytes);
                let envelope: PublishedEnvelope = match d.read_record() {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        observer.on_invalid_msg_received(&format!("malformed envelope: {err}"));
                        if error_policy == ErrorPolicy::Halt {
                            break;
                        }
                        continue;
                    }
                };

                observer.on_msg_received(&envelope.topic, &envelope.publisher.derived_id(), envelope.sequence);

                let handler = handlers.lock().await.get(&envelope.topic).cloned();
                match handler {
                    Some(handler) => {
                        if let Err(message) = handler(envelope.payload).await {
                            observer.on_invalid_msg_received(&format!("handler for {:?} failed: {message}", envelope.topic));
                            if error_policy == ErrorPolicy::Halt {
                                break;
                            }
                        }
                    }
                    None => {
                        observer.on_invalid_msg_received(&format!("no handler registered for topic {:?}", envelope.topic));
                        if error_policy == ErrorPolicy::Halt {
                            break;
                        }
                    }
                }
            }
        });
        self.receive_task = Some(task);
        Ok(())
    }

    pub async fn subscribe(&self, topic_prefix: &str) -> Result<(), TransportError> {
        self.transport.lock().await.subscribe(topic_prefix).await?;
        self.observer.on_subscribed(topic_prefix);
        Ok(())
    }

    pub async fn unsubscribe(&self, topic_prefix: &str) -> Result<(), TransportError> {
        self.transport.lock().await.unsubscribe(topic_prefix).await?;
        self.observer.on_unsubscribed(topic_prefix);
        Ok(())
    }

    /// Register a handler for an exact topic string. `P` is the payload
    /// type the publisher used on this topic; a mismatched type surfaces
    /// as a deserialize failure handled per [`ErrorPolicy`].
    pub async fn register_topic_handler<P, F, Fut>(&self, topic: impl Into<String>, handler: F)
    where
        P: BinarySerializable + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: ErasedTopicHandler = Arc::new(move |bytes: Vec<u8>| {
            let handler = handler.clone();
            Box::pin(async move {
                let mut d = Deserializer::new(&bytes);
                let payload: P = d.read_record().map_err(|err: SerializeError| err.to_string())?;
                handler(payload).await
            })
        });
        self.handlers.lock().await.insert(topic.into(), erased);
    }

    pub async fn stop(&mut self) -> Result<(), TransportError> {
        if let Some(task) = self.receive_task.take() {
            task.abort();
        }
        self.transport.lock().await.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct ChannelSubscribeSocket {
        inbound: Option<mpsc::Receiver<(String, Vec<u8>)>>,
        prefixes: Vec<String>,
    }

    #[async_trait]
    impl SubscribeSocket for ChannelSubscribeSocket {
        async fn connect(&mut self, _endpoint: &str, _config: &TransportConfig) -> Result<(), TransportError> {
            Ok(())
        }
        async fn subscribe(&mut self, topic_prefix: &str) -> Result<(), TransportError> {
            self.prefixes.push(topic_prefix.to_string());
            Ok(())
        }
        async fn unsubscribe(&mut self, topic_prefix: &str) -> Result<(), TransportError> {
            self.prefixes.retain(|p| p != topic_prefix);
            Ok(())
        }
        async fn receive(&mut self) -> Result<(String, Vec<u8>), TransportError> {
            self.inbound
                .as_mut()
                .expect("test fixture channel missing")
                .recv()
                .await
                .ok_or(TransportError::Cancelled)
        }
        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn subscribe_records_the_requested_prefix() {
        let mut socket = ChannelSubscribeSocket::default();
        let (_tx, rx) = mpsc::channel(1);
        socket.inbound = Some(rx);
        let subscriber = Subscriber::new(socket, Arc::new(NullSubscriberObserver), ErrorPolicy::EmitEvent);
        subscriber.subscribe("t/").await.unwrap();
    }
}
