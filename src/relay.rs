//! The departure pipeline: classify, resolve, compose, dispatch.

use crate::classifier::Classifier;
use crate::core::{Classification, InboundEvent};
use crate::formatting::NotificationComposer;
use crate::notification::{DispatchOutcome, Dispatcher};
use crate::registry::Registry;
use chrono::Local;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Reacts to inbound events by notifying the mapped destination group.
#[derive(Clone)]
pub struct DepartureRelay {
    classifier: Classifier,
    registry: Arc<Registry>,
    composer: NotificationComposer,
    dispatcher: Dispatcher,
}

impl DepartureRelay {
    pub fn new(
        classifier: Classifier,
        registry: Arc<Registry>,
        composer: NotificationComposer,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            classifier,
            registry,
            composer,
            dispatcher,
        }
    }

    /// Handles one inbound event.
    ///
    /// Returns `None` when the event was not a monitored departure, otherwise
    /// the outcome of the single delivery attempt.
    #[instrument(skip_all)]
    pub async fn handle_event(&self, event: &InboundEvent) -> Option<DispatchOutcome> {
        let snapshot = self.registry.snapshot();
        let Classification::Departure { event, destination } =
            self.classifier.classify(event, &snapshot)
        else {
            return None;
        };
        drop(snapshot);

        metrics::counter!("departures_matched_total").increment(1);
        debug!(
            source_id = %event.source_id,
            user_id = %event.departed_user_id,
            reason = ?event.reason,
            destination = %destination,
            "Monitored departure detected"
        );

        let message = self.composer.compose(&event, Local::now()).await;
        Some(self.dispatcher.dispatch(&destination, &message).await)
    }
}
