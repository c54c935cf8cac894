//! Built-in interceptors, addressable by name from [`Config`](crate::Config).
//!
//! | name         | inbound            | outbound                |
//! |--------------|--------------------|-------------------------|
//! | `logging`    | [`Logging`]        | -                       |
//! | `request_id` | [`RequestId`]      | [`StampRequestId`]      |
//!
//! Unknown names fail with [`Error::InvalidMiddleware`] when the stack is
//! built, never when it runs.

use std::sync::Arc;

use super::{Inbound, Logging, Middleware, Outbound, RequestId, Stack, StampRequestId};
use crate::error::Error;

/// Resolves a built-in inbound interceptor.
pub fn inbound(name: &str) -> Result<Arc<dyn Middleware<Inbound>>, Error> {
    match name {
        "logging" => Ok(Arc::new(Logging)),
        "request_id" => Ok(Arc::new(RequestId)),
        other => Err(Error::InvalidMiddleware {
            name: other.to_string(),
        }),
    }
}

/// Resolves a built-in outbound interceptor.
pub fn outbound(name: &str) -> Result<Arc<dyn Middleware<Outbound>>, Error> {
    match name {
        "request_id" => Ok(Arc::new(StampRequestId)),
        other => Err(Error::InvalidMiddleware {
            name: other.to_string(),
        }),
    }
}

/// Builds an inbound stack from names, in order.
pub fn inbound_stack<S: AsRef<str>>(names: &[S]) -> Result<Stack<Inbound>, Error> {
    let mut stack = Stack::new();
    for name in names {
        stack.append(inbound(name.as_ref())?);
    }
    Ok(stack)
}

/// Builds an outbound stack from names, in order.
pub fn outbound_stack<S: AsRef<str>>(names: &[S]) -> Result<Stack<Outbound>, Error> {
    let mut stack = Stack::new();
    for name in names {
        stack.append(outbound(name.as_ref())?);
    }
    Ok(stack)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_names_resolve_in_order() {
        let stack = inbound_stack(&["request_id", "logging"]).unwrap();
        assert_eq!(stack.names(), vec!["request_id", "logging"]);
    }

    #[test]
    fn unknown_names_are_rejected_at_build_time() {
        let err = inbound_stack(&["logging", "prometheus"]).unwrap_err();
        assert_eq!(err.as_label(), "invalid_middleware");
        assert!(matches!(err, Error::InvalidMiddleware { ref name } if name == "prometheus"));

        // logging only exists inbound
        assert!(outbound("logging").is_err());
    }
}
