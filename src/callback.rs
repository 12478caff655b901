//! # Callback Registry
//!
//! Type-erased dispatch table keyed by command id. A handler is registered
//! with its real argument and return types; the registry stores a small
//! wrapper closure that captures those types once, at registration time, and
//! does the deserialize-call-serialize dance internally. Dispatch itself
//! only ever sees `Vec<u8> -> Result<Vec<u8>, DispatchError>`, so the
//! registry's storage stays a single flat, non-generic map keyed by `i32`
//! and there is no dynamic dispatch cost on the hot path beyond the one
//! indirect call through the stored closure.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{DispatchError, SerializeError};
use crate::serializer::{BinarySerializable, Deserializer, Serializer};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The type-erased shape every registered handler is reduced to.
type ErasedHandler = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>, DispatchError>> + Send + Sync>;

/// Maps user command ids to type-erased handlers. Registration is generic
/// over the handler's real argument and return types; dispatch is not.
#[derive(Default, Clone)]
pub struct CallbackRegistry {
    handlers: HashMap<i32, ErasedHandler>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for `command_id`, taking a single deserialized
    /// parameter of type `P` and returning a single serializable value of
    /// type `R`. `command_id` must not fall in the reserved range
    /// (`0..=99`); callers are expected to have already checked that with
    /// [`crate::protocol::is_reserved`] before calling this.
    pub fn register<P, R, F, Fut>(&mut self, command_id: i32, handler: F)
    where
        P: BinarySerializable + Send + 'static,
        R: BinarySerializable + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, String>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: ErasedHandler = Arc::new(move |bytes: Vec<u8>| {
            let handler = handler.clone();
            Box::pin(async move {
                let mut d = Deserializer::new(&bytes);
                let params: P = d
                    .read_record()
                    .map_err(DispatchError::BadParameters)?;
                let result = handler(params)
                    .await
                    .map_err(|message| DispatchError::CallbackFailed(command_id, message))?;
                let mut s = Serializer::new();
                s.write_record(&result);
                Ok(s.into_bytes())
            })
        });
        self.handlers.insert(command_id, erased);
    }

    pub fn unregister(&mut self, command_id: i32) -> bool {
        self.handlers.remove(&command_id).is_some()
    }

    pub fn is_registered(&self, command_id: i32) -> bool {
        self.handlers.contains_key(&command_id)
    }

    /// Invoke the handler registered for `command_id`, or
    /// `CallbackMissing` if none is registered.
    pub async fn dispatch(&self, command_id: i32, params: Vec<u8>) -> Result<Vec<u8>, DispatchError> {
        let handler = self
            .handlers
            .get(&command_id)
            .ok_or(DispatchError::CallbackMissing(command_id))?
            .clone();
        handler(params).await
    }
}

/// Allow a handler's deserialization failure to be surfaced distinctly
/// from a handler that ran and failed on its own terms.
pub fn bad_parameters(err: SerializeError) -> DispatchError {
    DispatchError::BadParameters(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Echo(String);

    impl BinarySerializable for Echo {
        fn write_to(&self, s: &mut Serializer) {
            s.write_string(&self.0);
        }
        fn read_from(d: &mut Deserializer) -> Result<Self, SerializeError> {
            Ok(Self(d.read_string()?))
        }
    }

    #[tokio::test]
    async fn dispatch_round_trips_through_registered_handler() {
        let mut registry = CallbackRegistry::new();
        registry.register(100, |Echo(text)| async move { Ok(Echo(text)) });

        let mut s = Serializer::new();
        s.write_record(&Echo("hi".to_string()));
        let params = s.into_bytes();

        let reply_bytes = registry.dispatch(100, params).await.unwrap();
        let mut d = Deserializer::new(&reply_bytes);
        let reply: Echo = d.read_record().unwrap();
        assert_eq!(reply, Echo("hi".to_string()));
    }

    #[tokio::test]
    async fn dispatch_reports_missing_callback() {
        let registry = CallbackRegistry::new();
        let result = registry.dispatch(999, Vec::new()).await;
        assert!(matches!(result, Err(DispatchError::CallbackMissing(999))));
    }

    #[tokio::test]
    async fn dispatch_reports_callback_failure() {
        let mut registry = CallbackRegistry::new();
        registry.register::<Echo, Echo, _, _>(101, |_| async move { Err("boom".to_string()) });

        let mut s = Serializer::new();
        s.write_record(&Echo("x".to_string()));
        let params = s.into_bytes();

        let result = registry.dispatch(101, params).await;
        assert!(matches!(result, Err(DispatchError::CallbackFailed(101, _))));
    }

    #[tokio::test]
    async fn unregister_removes_the_handler() {
        let mut registry = CallbackRegistry::new();
        registry.register(100, |Echo(text)| async move { Ok(Echo(text)) });
        assert!(registry.is_registered(100));
        assert!(registry.unregister(100));
        assert!(!registry.is_registered(100));
    }
}
