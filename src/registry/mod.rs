//! Endpoint registry for dispatching requests by endpoint name
//!
//! Endpoints are registered before the server starts and the registry is
//! shared read-only with the accept loop afterwards. There is no removal.
//!
//! # Example
//!
//! ```ignore
//! use bluerpc::registry::EndpointRegistry;
//!
//! let mut registry = EndpointRegistry::new();
//! registry.register("echo", |payload| async move { anyhow::Ok(payload) })?;
//! ```

use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use thiserror::Error;

use crate::protocol::Reply;

/// Registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("The endpoint '{0}' already exists")]
    EndpointExists(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Boxed future for handler results
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Logic bound to an endpoint name
pub trait Handler: Send + Sync + 'static {
    /// Handle a request with its raw payload bytes
    fn call(&self, payload: Bytes) -> BoxFuture<'static, anyhow::Result<Reply>>;
}

/// Adapts an async closure returning anything convertible to a [`Reply`]
pub struct FnHandler<F, Fut, R>
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    R: Into<Reply> + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(Bytes) -> (Fut, R)>,
}

impl<F, Fut, R> FnHandler<F, Fut, R>
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    R: Into<Reply> + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut, R> Handler for FnHandler<F, Fut, R>
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    R: Into<Reply> + 'static,
{
    fn call(&self, payload: Bytes) -> BoxFuture<'static, anyhow::Result<Reply>> {
        let fut = (self.handler)(payload);
        Box::pin(async move { fut.await.map(Into::into) })
    }
}

/// Mapping from endpoint name to handler
#[derive(Default)]
pub struct EndpointRegistry {
    endpoints: HashMap<String, Box<dyn Handler>>,
}

impl EndpointRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async closure under `name`
    pub fn register<F, Fut, R>(&mut self, name: &str, handler: F) -> RegistryResult<()>
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Into<Reply> + 'static,
    {
        self.register_handler(name, FnHandler::new(handler))
    }

    /// Register a [`Handler`] implementation under `name`
    pub fn register_handler<H: Handler>(&mut self, name: &str, handler: H) -> RegistryResult<()> {
        if self.endpoints.contains_key(name) {
            return Err(RegistryError::EndpointExists(name.to_string()));
        }
        self.endpoints.insert(name.to_string(), Box::new(handler));
        Ok(())
    }

    /// Look up the handler for `name`. Absence is not an error here.
    pub fn lookup(&self, name: &str) -> Option<&dyn Handler> {
        self.endpoints.get(name).map(|h| h.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.endpoints.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Registered endpoint names, in no particular order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(|k| k.as_str())
    }

    /// Run the endpoint and normalize its reply to response bytes.
    ///
    /// Returns `None` for an unknown endpoint. Handler errors and replies
    /// that cannot be normalized become an `{"error": ...}` response.
    pub async fn dispatch(&self, name: &str, payload: Bytes) -> Option<Bytes> {
        let handler = self.lookup(name)?;

        let reply = match handler.call(payload).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!("Endpoint '{}' failed: {:#}", name, e);
                Reply::error(e.to_string())
            }
        };

        let kind = reply.kind();
        match reply.into_bytes() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::error!("Endpoint '{}' returned a {} reply: {}", name, kind, e);
                // An error map always normalizes
                Reply::error(e.to_string()).into_bytes().ok()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn echo_registry() -> EndpointRegistry {
        let mut registry = EndpointRegistry::new();
        registry
            .register("echo", |payload: Bytes| async move { anyhow::Ok(payload) })
            .unwrap();
        registry
    }

    #[test]
    fn test_register_endpoint() {
        let registry = echo_registry();
        assert!(registry.lookup("echo").is_some());
        assert!(registry.contains("echo"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["echo"]);
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let mut registry = echo_registry();

        let result = registry.register("echo", |_payload: Bytes| async move { anyhow::Ok("second") });
        assert!(matches!(result, Err(RegistryError::EndpointExists(ref name)) if name == "echo"));

        // The first registration stays active
        let response = registry.dispatch("echo", Bytes::from_static(b"ping")).await;
        assert_eq!(response.as_deref(), Some(&b"ping"[..]));
    }

    #[tokio::test]
    async fn test_unknown_endpoint() {
        let registry = echo_registry();
        assert!(registry.lookup("missing").is_none());
        assert!(registry.dispatch("missing", Bytes::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_handler_error_becomes_error_map() {
        let mut registry = EndpointRegistry::new();
        registry
            .register("fail", |_payload: Bytes| async move {
                Err::<(), _>(anyhow::anyhow!("database unavailable"))
            })
            .unwrap();

        let response = registry.dispatch("fail", Bytes::new()).await.unwrap();
        let parsed: Value = serde_json::from_slice(&response).unwrap();
        assert_eq!(parsed, json!({ "error": "database unavailable" }));
    }

    #[tokio::test]
    async fn test_unsupported_reply_becomes_error_map() {
        let mut registry = EndpointRegistry::new();
        registry
            .register("number", |_payload: Bytes| async move { anyhow::Ok(json!(7)) })
            .unwrap();

        let response = registry.dispatch("number", Bytes::new()).await.unwrap();
        let parsed: Value = serde_json::from_slice(&response).unwrap();
        let message = parsed["error"].as_str().unwrap();
        assert!(message.contains("number"));
    }

    #[tokio::test]
    async fn test_text_and_map_replies() {
        let mut registry = EndpointRegistry::new();
        registry
            .register("greet", |payload: Bytes| async move {
                anyhow::Ok(format!("hello {}", String::from_utf8_lossy(&payload)))
            })
            .unwrap();
        registry
            .register("status", |_payload: Bytes| async move { anyhow::Ok(json!({ "ok": true })) })
            .unwrap();

        let greet = registry.dispatch("greet", Bytes::from_static(b"bob")).await.unwrap();
        assert_eq!(&greet[..], b"hello bob");

        let status = registry.dispatch("status", Bytes::new()).await.unwrap();
        let parsed: Value = serde_json::from_slice(&status).unwrap();
        assert_eq!(parsed["ok"], true);
    }

    struct Constant(&'static str);

    impl Handler for Constant {
        fn call(&self, _payload: Bytes) -> BoxFuture<'static, anyhow::Result<Reply>> {
            let text = self.0;
            Box::pin(async move { anyhow::Ok(Reply::from(text)) })
        }
    }

    #[tokio::test]
    async fn test_register_handler_impl() {
        let mut registry = EndpointRegistry::new();
        registry.register_handler("version", Constant("1.0")).unwrap();

        let response = registry.dispatch("version", Bytes::new()).await.unwrap();
        assert_eq!(&response[..], b"1.0");
    }
}
