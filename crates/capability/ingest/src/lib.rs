use async_trait::async_trait;
use domain::{RawMessage, now_epoch_ms};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// 采集错误。
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("handler error: {0}")]
    Handler(String),
    #[error("source error: {0}")]
    Source(String),
}

/// RawMessage 处理器。
#[async_trait]
pub trait RawMessageHandler: Send + Sync {
    async fn handle(&self, message: RawMessage) -> Result<(), IngestError>;
}

/// 采集源抽象。具体传输自行负责重连与投递。
#[async_trait]
pub trait Source: Send + Sync {
    async fn run(&self, handler: Arc<dyn RawMessageHandler>) -> Result<(), IngestError>;
}

/// 占位源（用于接线与测试）。
#[derive(Debug, Default)]
pub struct NoopSource;

#[async_trait]
impl Source for NoopSource {
    async fn run(&self, _handler: Arc<dyn RawMessageHandler>) -> Result<(), IngestError> {
        Ok(())
    }
}

/// MQTT 采集源配置。
#[derive(Debug, Clone)]
pub struct MqttSourceConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
}

/// MQTT 采集源。
///
/// 订阅 `<prefix>/#`，从 `<prefix>/{device_type}/{device_id}` 主题中提取
/// 设备标识；payload 原样透传给处理器。
#[derive(Debug, Clone)]
pub struct MqttSource {
    config: MqttSourceConfig,
}

impl MqttSource {
    pub fn new(config: MqttSourceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MqttSourceConfig {
        &self.config
    }
}

#[async_trait]
impl Source for MqttSource {
    async fn run(&self, handler: Arc<dyn RawMessageHandler>) -> Result<(), IngestError> {
        let client_id = format!("fab-ingest-{}", now_epoch_ms());
        let mut options =
            rumqttc::MqttOptions::new(client_id, self.config.host.clone(), self.config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) =
            (self.config.username.as_ref(), self.config.password.as_ref())
        {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = rumqttc::AsyncClient::new(options, 10);
        let topic = format!("{}/#", self.config.topic_prefix.trim_end_matches('/'));
        client
            .subscribe(topic, rumqttc::QoS::AtMostOnce)
            .await
            .map_err(|err| IngestError::Source(err.to_string()))?;

        loop {
            match eventloop.poll().await {
                Ok(rumqttc::Event::Incoming(rumqttc::Packet::Publish(publish))) => {
                    let device_id =
                        match extract_device_id(&self.config.topic_prefix, &publish.topic) {
                            Some(device_id) => device_id,
                            None => {
                                warn!(target: "fab.ingest", topic = %publish.topic, "topic_skipped");
                                continue;
                            }
                        };
                    let message = RawMessage {
                        device_id,
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                        received_at_ms: now_epoch_ms(),
                    };
                    if let Err(err) = handler.handle(message).await {
                        warn!(target: "fab.ingest", error = %err, "raw_message_handler_failed");
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    // 断连视为"暂无消息"：记录后稍候重试，eventloop 自行重连
                    warn!(target: "fab.ingest", error = %err, "mqtt_poll_failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

/// 从主题 `<prefix>/{device_type}/{device_id}` 提取设备标识。
fn extract_device_id(prefix: &str, topic: &str) -> Option<String> {
    let prefix = prefix.trim_matches('/');
    let topic = topic.trim_matches('/');
    let rest = if prefix.is_empty() {
        topic
    } else {
        topic.strip_prefix(prefix)?
    };
    let rest = rest.trim_start_matches('/');
    let mut parts = rest.split('/');
    let _device_type = parts.next()?;
    let device_id = parts.next()?;
    if device_id.is_empty() {
        return None;
    }
    Some(device_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_device_id_from_topic() {
        let device = extract_device_id("factory/telemetry", "factory/telemetry/etcher/etch-01");
        assert_eq!(device.as_deref(), Some("etch-01"));
    }

    #[test]
    fn rejects_topic_without_device_segment() {
        assert!(extract_device_id("factory/telemetry", "factory/telemetry/etcher").is_none());
        assert!(extract_device_id("factory/telemetry", "other/stream/etcher/etch-01").is_none());
    }

    #[test]
    fn empty_prefix_matches_any_topic() {
        let device = extract_device_id("", "line3/aligner-2");
        assert_eq!(device.as_deref(), Some("aligner-2"));
    }
}
