//! # Shutdown hooks.
//!
//! Hooks run last during graceful shutdown, after every listener has drained.
//! Each hook is isolated: a failing or panicking hook is logged and the next one
//! still runs.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::Adapter;
use crate::error::BoxError;

/// Shared handle to a shutdown hook.
pub type ShutdownHookRef = Arc<dyn ShutdownHook>;

#[async_trait]
pub trait ShutdownHook: Send + Sync + 'static {
    async fn on_shutdown(&self, adapter: &Adapter) -> Result<(), BoxError>;
}

/// Closure-backed shutdown hook; the closure receives a clone of the adapter.
pub struct ShutdownFn<F> {
    f: F,
}

impl<F, Fut> ShutdownFn<F>
where
    F: Fn(Adapter) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self { f })
    }
}

#[async_trait]
impl<F, Fut> ShutdownHook for ShutdownFn<F>
where
    F: Fn(Adapter) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn on_shutdown(&self, adapter: &Adapter) -> Result<(), BoxError> {
        (self.f)(adapter.clone()).await
    }
}
