//! 接入到总线的规范化入口。

use async_trait::async_trait;
use domain::RawMessage;
use fab_bus::{BusEvent, EventBus, Topic};
use fab_ingest::{IngestError, RawMessageHandler};
use fab_normalize::{NormalizeError, Normalizer};
use fab_telemetry::{
    record_dropped_malformed, record_dropped_unknown_device, record_normalized_record,
    record_raw_message,
};
use std::sync::Arc;
use tracing::warn;

/// 原始报文 -> 规范化 -> telemetry.processed。
///
/// 规范化失败只计数并丢弃，不会让接入源停摆。
pub struct PipelineHandler {
    normalizer: Normalizer,
    bus: EventBus,
}

impl PipelineHandler {
    pub fn new(bus: EventBus) -> Self {
        Self {
            normalizer: Normalizer::new(),
            bus,
        }
    }
}

#[async_trait]
impl RawMessageHandler for PipelineHandler {
    async fn handle(&self, message: RawMessage) -> Result<(), IngestError> {
        record_raw_message();
        match self.normalizer.normalize(&message) {
            Ok(record) => {
                record_normalized_record();
                self.bus
                    .publish(Topic::TelemetryProcessed, BusEvent::Record(Arc::new(record)));
            }
            Err(err @ NormalizeError::UnknownDevice(_)) => {
                record_dropped_unknown_device();
                warn!(target: "fab.app", topic = %message.topic, error = %err, "record_dropped");
            }
            Err(err @ NormalizeError::MalformedPayload(_)) => {
                record_dropped_malformed();
                warn!(
                    target: "fab.app",
                    device_id = %message.device_id,
                    error = %err,
                    "record_dropped"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(device_id: &str, payload: &str) -> RawMessage {
        RawMessage {
            device_id: device_id.to_string(),
            topic: format!("factory/telemetry/etcher/{device_id}"),
            payload: payload.as_bytes().to_vec(),
            received_at_ms: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn valid_message_reaches_bus() {
        let bus = EventBus::new(16);
        let sub = bus.subscribe(Topic::TelemetryProcessed);
        let handler = PipelineHandler::new(bus);

        handler
            .handle(raw("etch-01", r#"{"t": 21.5, "ts": 1700000000000}"#))
            .await
            .expect("handled");

        match sub.try_recv() {
            Some(BusEvent::Record(record)) => {
                assert_eq!(record.device_id, "etch-01");
                assert_eq!(record.parameters.get("temperature"), Some(&21.5));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_message_is_dropped_without_error() {
        let bus = EventBus::new(16);
        let sub = bus.subscribe(Topic::TelemetryProcessed);
        let handler = PipelineHandler::new(bus);

        handler
            .handle(raw("etch-01", "not json"))
            .await
            .expect("handled");

        assert!(sub.try_recv().is_none());
    }
}
