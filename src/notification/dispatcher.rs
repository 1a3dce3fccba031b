//! Fire-and-forget delivery of composed notifications.

use crate::core::MessageTransport;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// What happened to a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    Failed(String),
}

/// Sends notifications to destination groups.
///
/// Failures are logged and reported back as a [`DispatchOutcome`]; they are
/// never retried or propagated.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn MessageTransport>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn MessageTransport>) -> Self {
        Self { transport }
    }

    #[instrument(skip(self, message))]
    pub async fn dispatch(&self, destination: &str, message: &str) -> DispatchOutcome {
        match self.transport.send_group_message(destination, message).await {
            Ok(()) => {
                metrics::counter!("notifications_sent_total").increment(1);
                info!(destination, "Departure notification sent");
                DispatchOutcome::Delivered
            }
            Err(e) => {
                metrics::counter!("notifications_failed_total").increment(1);
                error!(destination, error = %e, "Failed to send departure notification");
                DispatchOutcome::Failed(format!("{:#}", e))
            }
        }
    }
}
