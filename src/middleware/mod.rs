//! # Middleware: ordered interceptor chains around publish and delivery.
//!
//! A [`Stack<R>`] holds interceptors implementing [`Middleware<R>`] and runs them
//! outermost-first around a [`Terminal<R>`]:
//!
//! ```text
//! invoke(req, terminal)
//!   └─► X.call(req, next) ──► A.call(req, next) ──► B.call(req, next) ──► terminal.call(req)
//!        (prepended)           (appended first)       (appended last)
//! ```
//!
//! ## Rules
//! - [`Next::run`] consumes the continuation: an interceptor can proceed at most once.
//! - Not calling `next.run` halts the chain; no later interceptor nor the terminal runs.
//! - An error returned below an interceptor flows back through it (it may observe
//!   or replace it) and out of `invoke`.
//! - Stacks are built during setup and shared read-only afterwards.
//!
//! Two request shapes exist: [`Inbound`] (a delivered message plus its mutable
//! [`Context`]) and [`Outbound`] (a publish about to be handed to the transport).
//! Built-in interceptors are resolved by name, see [`inbound`] and [`outbound`].

mod catalog;
mod logging;
mod request_id;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::HandlerError;
use crate::transport::{Attributes, Message};

pub use catalog::{inbound, inbound_stack, outbound, outbound_stack};
pub use logging::Logging;
pub use request_id::{RequestId, StampRequestId, current_request_id};

/// An interceptor wrapping a request of type `R`.
#[async_trait]
pub trait Middleware<R: Send + 'static>: Send + Sync + 'static {
    /// Handles the request; call `next.run(req)` to proceed down the chain.
    async fn call(&self, req: &mut R, next: Next<'_, R>) -> Result<(), HandlerError>;

    /// Name shown in debug output.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// The innermost operation a stack wraps.
#[async_trait]
pub trait Terminal<R: Send + 'static>: Send + Sync {
    async fn call(&self, req: &mut R) -> Result<(), HandlerError>;
}

/// Continuation handed to an interceptor: the rest of the chain.
pub struct Next<'a, R: Send + 'static> {
    rest: &'a [Arc<dyn Middleware<R>>],
    terminal: &'a dyn Terminal<R>,
}

impl<'a, R: Send + 'static> Next<'a, R> {
    /// Runs the remaining interceptors and the terminal.
    pub async fn run(self, req: &mut R) -> Result<(), HandlerError> {
        match self.rest.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    rest,
                    terminal: self.terminal,
                };
                head.call(req, next).await
            }
            None => self.terminal.call(req).await,
        }
    }
}

/// Ordered interceptor chain.
pub struct Stack<R: Send + 'static> {
    layers: Vec<Arc<dyn Middleware<R>>>,
}

impl<R: Send + 'static> Stack<R> {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Adds an interceptor at the tail (runs last, innermost).
    pub fn append(&mut self, layer: Arc<dyn Middleware<R>>) -> &mut Self {
        self.layers.push(layer);
        self
    }

    /// Adds an interceptor at the head (runs first, outermost).
    pub fn prepend(&mut self, layer: Arc<dyn Middleware<R>>) -> &mut Self {
        self.layers.insert(0, layer);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Interceptor names, outermost first.
    pub fn names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|l| l.name()).collect()
    }

    /// Runs the chain around `terminal`.
    pub async fn invoke(&self, req: &mut R, terminal: &dyn Terminal<R>) -> Result<(), HandlerError> {
        Next {
            rest: &self.layers,
            terminal,
        }
        .run(req)
        .await
    }
}

impl<R: Send + 'static> Default for Stack<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Send + 'static> Clone for Stack<R> {
    fn clone(&self) -> Self {
        Self {
            layers: self.layers.clone(),
        }
    }
}

impl<R: Send + 'static> fmt::Debug for Stack<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Per-delivery values visible to (and mutable by) inbound interceptors.
#[derive(Clone, Debug, Default)]
pub struct Context {
    /// Namespaced event name the listener is bound to.
    pub event_name: String,
    /// Namespaced subscription name.
    pub subscription: String,
    /// Delivery attempt reported by the transport, if any.
    pub attempts: Option<u32>,
    /// Request id for the duration of the call (set by the `request_id` interceptor).
    pub request_id: Option<String>,
    /// Free-form values interceptors can hand to each other.
    pub extras: BTreeMap<String, String>,
}

/// A delivered message travelling through the inbound chain.
#[derive(Debug)]
pub struct Inbound {
    pub message: Message,
    pub context: Context,
}

/// A publish travelling through the outbound chain.
#[derive(Clone, Debug)]
pub struct Outbound {
    /// Namespaced event name.
    pub event_name: String,
    /// Serialized payload.
    pub data: Bytes,
    /// Attributes; interceptors may add to them.
    pub attributes: Attributes,
    pub ordering_key: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    type Trace = Arc<Mutex<Vec<String>>>;

    struct Step {
        label: &'static str,
        proceed: bool,
        trace: Trace,
    }

    #[async_trait]
    impl Middleware<Vec<&'static str>> for Step {
        async fn call(
            &self,
            req: &mut Vec<&'static str>,
            next: Next<'_, Vec<&'static str>>,
        ) -> Result<(), HandlerError> {
            self.trace.lock().push(self.label.to_string());
            req.push(self.label);
            if self.proceed {
                let res = next.run(req).await;
                self.trace.lock().push(format!("{}:after", self.label));
                res
            } else {
                Ok(())
            }
        }
    }

    struct End {
        trace: Trace,
        fail: bool,
    }

    #[async_trait]
    impl Terminal<Vec<&'static str>> for End {
        async fn call(&self, req: &mut Vec<&'static str>) -> Result<(), HandlerError> {
            self.trace.lock().push("terminal".into());
            req.push("terminal");
            if self.fail {
                Err(HandlerError::fail("terminal failed"))
            } else {
                Ok(())
            }
        }
    }

    fn step(label: &'static str, proceed: bool, trace: &Trace) -> Arc<dyn Middleware<Vec<&'static str>>> {
        Arc::new(Step {
            label,
            proceed,
            trace: trace.clone(),
        })
    }

    #[tokio::test]
    async fn prepend_runs_before_appended_layers() {
        let trace = Trace::default();
        let mut stack = Stack::new();
        stack
            .append(step("A", true, &trace))
            .append(step("B", true, &trace))
            .append(step("C", true, &trace))
            .prepend(step("X", true, &trace));

        let mut req = Vec::new();
        let end = End { trace: trace.clone(), fail: false };
        stack.invoke(&mut req, &end).await.unwrap();
        assert_eq!(req, vec!["X", "A", "B", "C", "terminal"]);
        assert_eq!(
            *trace.lock(),
            vec!["X", "A", "B", "C", "terminal", "C:after", "B:after", "A:after", "X:after"]
        );
    }

    #[tokio::test]
    async fn a_layer_that_does_not_proceed_halts_the_chain() {
        let trace = Trace::default();
        let mut stack = Stack::new();
        stack
            .append(step("A", true, &trace))
            .append(step("B", false, &trace))
            .append(step("C", true, &trace));

        let mut req = Vec::new();
        let end = End { trace: trace.clone(), fail: false };
        stack.invoke(&mut req, &end).await.unwrap();
        assert_eq!(req, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn errors_flow_back_through_entered_layers() {
        let trace = Trace::default();
        let mut stack = Stack::new();
        stack.append(step("A", true, &trace)).append(step("B", true, &trace));

        let mut req = Vec::new();
        let end = End { trace: trace.clone(), fail: true };
        let err = stack.invoke(&mut req, &end).await.unwrap_err();
        assert_eq!(err.as_label(), "handler_failed");
        assert!(trace.lock().ends_with(&["B:after".to_string(), "A:after".to_string()]));
    }

    #[tokio::test]
    async fn empty_stack_calls_the_terminal() {
        let trace = Trace::default();
        let stack: Stack<Vec<&'static str>> = Stack::default();
        let mut req = Vec::new();
        stack
            .invoke(&mut req, &End { trace, fail: false })
            .await
            .unwrap();
        assert_eq!(req, vec!["terminal"]);
    }
}
