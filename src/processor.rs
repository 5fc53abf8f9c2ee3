//! Entry point for one delivered queue message.

use std::sync::Arc;
use tracing::{error, info, instrument};

use crate::context::Context;
use crate::error::ProcessResult;
use crate::event::QueueMessage;
use crate::reconciler::AppointmentReconciler;
use crate::repository::{AppointmentRepository, EventRepository};
use crate::router::{Dispatch, EventRouter};

/// Decodes a message, routes it and runs its handler.
///
/// Called once per delivery by the consumer loop. Safe to share across tasks.
#[derive(Clone)]
pub struct EventProcessor {
    router: EventRouter,
}

impl EventProcessor {
    /// Wire the processor to its two storage collaborators.
    pub fn new(
        event_repository: Arc<dyn EventRepository>,
        appointment_repository: Arc<dyn AppointmentRepository>,
    ) -> Self {
        let reconciler = AppointmentReconciler::new(event_repository, appointment_repository);
        Self::with_router(EventRouter::new(Arc::new(reconciler)))
    }

    pub fn with_router(router: EventRouter) -> Self {
        Self { router }
    }

    /// Process one message.
    ///
    /// Returns `Ok` for handled events, for events of an unknown type and for
    /// events that were already processed. Every other failure is returned
    /// as-is so the queue can redeliver.
    #[instrument(skip(self, ctx, message))]
    pub async fn handle(
        &self,
        ctx: &Context,
        message_id: &str,
        message: &QueueMessage,
    ) -> ProcessResult<Dispatch> {
        info!(message_id = %message_id, "Event received");

        let envelope = message.decode().map_err(|e| {
            error!(message_id = %message_id, error = %e, "Failed to decode event");
            e
        })?;

        self.router.dispatch(ctx, message_id, &envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessError;
    use crate::repository::{MockAppointmentRepository, MockEventRepository};
    use serde_json::json;

    fn untouched_processor() -> EventProcessor {
        let mut events = MockEventRepository::new();
        let mut appointments = MockAppointmentRepository::new();
        events.expect_get_by_message_id().never();
        events.expect_update().never();
        appointments.expect_get_by_ids_and_date_time().never();
        appointments.expect_create().never();

        EventProcessor::new(Arc::new(events), Arc::new(appointments))
    }

    #[tokio::test]
    async fn test_undecodable_message() {
        let processor = untouched_processor();
        let message = QueueMessage::new(json!("not an event"));

        let result = processor
            .handle(&Context::background(), "msg-1", &message)
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, ProcessError::Decode { what: "event envelope", .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_unknown_event_type_is_success() {
        let processor = untouched_processor();
        let message = QueueMessage::new(json!({"EventType": "send_invoice", "Data": "{}"}));

        let dispatch = processor
            .handle(&Context::background(), "msg-1", &message)
            .await
            .unwrap();

        assert!(matches!(dispatch, Dispatch::Dropped { ref event_type } if event_type == "send_invoice"));
    }

    #[tokio::test]
    async fn test_envelope_without_data_is_dropped() {
        let processor = untouched_processor();
        let message = QueueMessage::new(json!({"EventType": "send_invoice"}));

        let dispatch = processor
            .handle(&Context::background(), "msg-1", &message)
            .await
            .unwrap();

        assert!(matches!(dispatch, Dispatch::Dropped { ref event_type } if event_type == "send_invoice"));
    }

    #[tokio::test]
    async fn test_wrongly_typed_event_type_is_decode_error() {
        let processor = untouched_processor();
        let message = QueueMessage::new(json!({"EventType": 42, "Data": {}}));

        let err = processor
            .handle(&Context::background(), "msg-1", &message)
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::Decode { what: "event envelope", .. }));
    }

    #[tokio::test]
    async fn test_malformed_appointment_payload() {
        let processor = untouched_processor();
        let message = QueueMessage::new(json!({
            "EventType": "create_appointment",
            "Data": "{\"ScheduleID\": 1"
        }));

        let result = processor
            .handle(&Context::background(), "msg-1", &message)
            .await;

        assert!(matches!(
            result,
            Err(ProcessError::Decode { what: "appointment payload", .. })
        ));
    }
}
