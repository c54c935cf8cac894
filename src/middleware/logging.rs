//! Inbound timing log.

use std::time::Instant;

use async_trait::async_trait;
use tracing::info;

use super::{Inbound, Middleware, Next};
use crate::error::HandlerError;

/// Logs how long each delivery took to process, whether it succeeded or not.
#[derive(Clone, Copy, Debug, Default)]
pub struct Logging;

#[async_trait]
impl Middleware<Inbound> for Logging {
    async fn call(&self, req: &mut Inbound, next: Next<'_, Inbound>) -> Result<(), HandlerError> {
        let started = Instant::now();
        let res = next.run(req).await;
        info!(
            message_id = req.message.id(),
            event_name = %req.context.event_name,
            subscription = %req.context.subscription,
            ok = res.is_ok(),
            "Event took {:.3} seconds to process",
            started.elapsed().as_secs_f64()
        );
        res
    }

    fn name(&self) -> &'static str {
        "logging"
    }
}
