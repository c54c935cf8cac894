//! User callbacks: message handlers, error handlers and shutdown hooks.
//!
//! ## Contents
//! - [`Handler`], [`HandlerFn`] business logic per delivered message
//! - [`ErrorHandler`], [`ErrorHandlerFn`], [`LogErrors`] failure callbacks
//! - [`SafeErrorHandler`] isolation wrapper for error handlers
//! - [`ShutdownHook`], [`ShutdownFn`] last step of graceful shutdown

mod error_handler;
mod handler;
mod shutdown;

pub use error_handler::{ErrorHandler, ErrorHandlerFn, ErrorHandlerRef, LogErrors, SafeErrorHandler};
pub use handler::{Handler, HandlerFn, HandlerRef};
pub use shutdown::{ShutdownFn, ShutdownHook, ShutdownHookRef};
