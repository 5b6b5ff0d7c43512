use std::sync::Arc;

use async_trait::async_trait;

use super::Sink;
use crate::error::PublishError;
use crate::routes::DestinationKind;

/// Minimal contract of a topic-publish service.
#[async_trait]
pub trait TopicClient: Send + Sync {
    async fn publish(&self, topic: &str, message: &str) -> Result<(), PublishError>;
}

/// Sends each payload as the body of one topic publish call.
#[derive(Clone)]
pub struct TopicSink {
    client: Arc<dyn TopicClient>,
}

impl TopicSink {
    pub fn new(client: Arc<dyn TopicClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Sink for TopicSink {
    fn kind(&self) -> DestinationKind {
        DestinationKind::Topic
    }

    async fn publish(&self, _channel: &str, target: &str, payload: &str) -> Result<(), PublishError> {
        self.client.publish(target, payload).await
    }
}

/// Amazon SNS backed [`TopicClient`]; `topic` is a topic ARN.
#[derive(Debug, Clone)]
pub struct SnsTopicClient {
    client: aws_sdk_sns::Client,
}

impl SnsTopicClient {
    pub fn new(client: aws_sdk_sns::Client) -> Self {
        Self { client }
    }

    /// Builds a client from the standard AWS environment (region, credentials).
    pub async fn from_env() -> Self {
        let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(aws_sdk_sns::Client::new(&sdk_config))
    }
}

#[async_trait]
impl TopicClient for SnsTopicClient {
    async fn publish(&self, topic: &str, message: &str) -> Result<(), PublishError> {
        self.client
            .publish()
            .topic_arn(topic)
            .message(message)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| PublishError::Client {
                target: topic.to_string(),
                reason: aws_sdk_sns::error::DisplayErrorContext(&e).to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingClient {
        calls: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl TopicClient for RecordingClient {
        async fn publish(&self, topic: &str, message: &str) -> Result<(), PublishError> {
            self.calls.lock().await.push((topic.into(), message.into()));
            if self.fail {
                Err(PublishError::Client {
                    target: topic.into(),
                    reason: "throttled".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn publishes_payload_to_target_topic() {
        let client = Arc::new(RecordingClient::default());
        let sink = TopicSink::new(client.clone());
        sink.publish("orders", "arn:topic:orders", r#"{"id":1}"#)
            .await
            .unwrap();
        let calls = client.calls.lock().await;
        assert_eq!(
            *calls,
            vec![("arn:topic:orders".to_string(), r#"{"id":1}"#.to_string())]
        );
    }

    #[tokio::test]
    async fn client_failure_surfaces_as_publish_error() {
        let client = Arc::new(RecordingClient {
            fail: true,
            ..Default::default()
        });
        let sink = TopicSink::new(client.clone());
        let err = sink.publish("orders", "arn:topic:orders", "{}").await.unwrap_err();
        assert!(err.to_string().contains("throttled"));
        assert_eq!(client.calls.lock().await.len(), 1);
    }
}
