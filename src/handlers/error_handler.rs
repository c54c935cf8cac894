//! # Error handlers and their isolation.
//!
//! Error handlers are called for every failed delivery, before the retry policy
//! is applied. [`SafeErrorHandler::invoke`] isolates them: an error handler that
//! returns an error or panics is logged (message and backtrace) and swallowed,
//! so it can never keep a message from being acknowledged or backed off.

use std::backtrace::Backtrace;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::error;

use crate::error::{BoxError, HandlerError, panic_message};
use crate::transport::Message;

/// Shared handle to an error handler.
pub type ErrorHandlerRef = Arc<dyn ErrorHandler>;

/// Callback for failed deliveries.
pub trait ErrorHandler: Send + Sync + 'static {
    fn on_error(&self, error: &HandlerError, message: &Message) -> Result<(), BoxError>;
}

/// Closure-backed error handler.
pub struct ErrorHandlerFn<F> {
    f: F,
}

impl<F> ErrorHandlerFn<F>
where
    F: Fn(&HandlerError, &Message) -> Result<(), BoxError> + Send + Sync + 'static,
{
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self { f })
    }
}

impl<F> ErrorHandler for ErrorHandlerFn<F>
where
    F: Fn(&HandlerError, &Message) -> Result<(), BoxError> + Send + Sync + 'static,
{
    fn on_error(&self, error: &HandlerError, message: &Message) -> Result<(), BoxError> {
        (self.f)(error, message)
    }
}

/// Default error handler: logs the failure.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogErrors;

impl ErrorHandler for LogErrors {
    fn on_error(&self, error: &HandlerError, message: &Message) -> Result<(), BoxError> {
        error!(
            message_id = message.id(),
            label = error.as_label(),
            "Message({}) failed with exception {}",
            message.id(),
            error
        );
        Ok(())
    }
}

/// Runs error handlers without letting them escape.
pub struct SafeErrorHandler;

impl SafeErrorHandler {
    /// Calls `handler`; a returned error or a panic is logged and reported back
    /// as text, never propagated.
    pub fn invoke(
        handler: &dyn ErrorHandler,
        error: &HandlerError,
        message: &Message,
    ) -> Result<(), String> {
        let failure = match catch_unwind(AssertUnwindSafe(|| handler.on_error(error, message))) {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            Err(panic) => format!("panicked: {}", panic_message(&*panic)),
        };

        error!(message_id = message.id(), "!!! ERROR HANDLER THREW AN ERROR !!!");
        error!(message_id = message.id(), "{failure}");
        error!("{}", Backtrace::force_capture());
        Err(failure)
    }
}
