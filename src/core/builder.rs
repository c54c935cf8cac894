use std::sync::Arc;

use crate::core::adapter::{Adapter, Shared};
use crate::core::config::Config;
use crate::core::registry::TopicRegistry;
use crate::error::Error;
use crate::events::Bus;
use crate::handlers::{ErrorHandlerRef, LogErrors, ShutdownHookRef};
use crate::middleware::{Inbound, Middleware, Outbound, inbound_stack, outbound_stack};
use crate::observers::{Observe, ObserverSet};
use crate::serializer::{JsonSerializer, Serializer};
use crate::transport::Transport;

/// Builder for an [`Adapter`] with its non-data configuration.
///
/// Data settings live in [`Config`]; callbacks, observers, extra interceptors and
/// the serializer are attached here.
pub struct AdapterBuilder {
    transport: Arc<dyn Transport>,
    config: Config,
    serializer: Arc<dyn Serializer>,
    error_handlers: Vec<ErrorHandlerRef>,
    shutdown_hooks: Vec<ShutdownHookRef>,
    observers: Vec<Arc<dyn Observe>>,
    inbound_prepend: Vec<Arc<dyn Middleware<Inbound>>>,
    inbound_append: Vec<Arc<dyn Middleware<Inbound>>>,
    outbound_prepend: Vec<Arc<dyn Middleware<Outbound>>>,
    outbound_append: Vec<Arc<dyn Middleware<Outbound>>>,
}

impl AdapterBuilder {
    /// Default config, JSON bodies, and a single logging error handler.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            config: Config::default(),
            serializer: Arc::new(JsonSerializer),
            error_handlers: vec![Arc::new(LogErrors)],
            shutdown_hooks: Vec::new(),
            observers: Vec::new(),
            inbound_prepend: Vec::new(),
            inbound_append: Vec::new(),
            outbound_prepend: Vec::new(),
            outbound_append: Vec::new(),
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Adds an error handler; handlers run in the order they were added.
    pub fn error_handler(mut self, handler: ErrorHandlerRef) -> Self {
        self.error_handlers.push(handler);
        self
    }

    /// Drops every error handler added so far, including the default one.
    pub fn clear_error_handlers(mut self) -> Self {
        self.error_handlers.clear();
        self
    }

    /// Adds a hook run at the end of graceful shutdown.
    pub fn shutdown_hook(mut self, hook: ShutdownHookRef) -> Self {
        self.shutdown_hooks.push(hook);
        self
    }

    /// Attaches a runtime-event observer.
    pub fn observer(mut self, observer: Arc<dyn Observe>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Inbound interceptor running inside the configured ones.
    pub fn append_inbound(mut self, layer: Arc<dyn Middleware<Inbound>>) -> Self {
        self.inbound_append.push(layer);
        self
    }

    /// Inbound interceptor wrapping everything else; the last one prepended runs first.
    pub fn prepend_inbound(mut self, layer: Arc<dyn Middleware<Inbound>>) -> Self {
        self.inbound_prepend.push(layer);
        self
    }

    pub fn append_outbound(mut self, layer: Arc<dyn Middleware<Outbound>>) -> Self {
        self.outbound_append.push(layer);
        self
    }

    pub fn prepend_outbound(mut self, layer: Arc<dyn Middleware<Outbound>>) -> Self {
        self.outbound_prepend.push(layer);
        self
    }

    /// Builds the adapter.
    ///
    /// Must be called from within a tokio runtime when observers are attached.
    ///
    /// # Errors
    /// [`Error::InvalidMiddleware`] if a configured middleware name is unknown.
    pub fn build(self) -> Result<Adapter, Error> {
        let mut inbound = inbound_stack(&self.config.inbound_middleware)?;
        for layer in self.inbound_append {
            inbound.append(layer);
        }
        for layer in self.inbound_prepend {
            inbound.prepend(layer);
        }

        let mut outbound = outbound_stack(&self.config.outbound_middleware)?;
        for layer in self.outbound_append {
            outbound.append(layer);
        }
        for layer in self.outbound_prepend {
            outbound.prepend(layer);
        }

        let bus = Bus::new(self.config.bus_capacity_clamped());
        let observers =
            (!self.observers.is_empty()).then(|| ObserverSet::new(self.observers, bus.clone()));
        let registry = TopicRegistry::new(self.transport, self.config.auto_create_topics, bus.clone());

        let shared = Shared {
            config: Arc::new(self.config),
            bus,
            serializer: self.serializer,
            inbound: Arc::new(inbound),
            outbound: Arc::new(outbound),
            error_handlers: self.error_handlers.into(),
            registry,
        };
        Ok(Adapter::from_parts(shared, self.shutdown_hooks, observers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    #[test]
    fn unknown_middleware_fails_the_build() {
        let cfg = Config {
            inbound_middleware: vec!["logging".into(), "metrics".into()],
            ..Config::default()
        };
        let err = AdapterBuilder::new(Arc::new(MemoryTransport::new()))
            .config(cfg)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidMiddleware { ref name } if name == "metrics"));
    }
}
