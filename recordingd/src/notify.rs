use anyhow::Result;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use shared::protocol::MESSAGING_TOPIC;
use shared::types::{LinkedRecordingDescriptor, Notification, NotificationCategory, RecordingEvent};

/// Publishes recording lifecycle notifications onto the messaging topic.
/// Publishing never fails the caller; undeliverable notifications are logged.
#[derive(Clone)]
pub struct NotificationPublisher {
    tx: broadcast::Sender<Notification>,
}

impl NotificationPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn notify(
        &self,
        category: NotificationCategory,
        connect_url: &str,
        recording: LinkedRecordingDescriptor,
    ) {
        let notification = Notification {
            category,
            message: RecordingEvent {
                target: connect_url.to_string(),
                recording,
            },
        };

        if self.tx.send(notification).is_err() {
            tracing::warn!(
                "No subscribers on {}; dropped {} for {}",
                MESSAGING_TOPIC,
                category,
                connect_url
            );
        }
    }
}

/// Subscriber that writes every notification to the log.
pub async fn run_logger(
    mut rx: broadcast::Receiver<Notification>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Ok(notification) => match serde_json::to_string(&notification) {
                        Ok(payload) => tracing::debug!("{} <- {}", MESSAGING_TOPIC, payload),
                        Err(e) => tracing::error!(
                            "Failed to encode {} notification for {}: {}",
                            notification.category,
                            notification.message.target,
                            e
                        ),
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Notification logger lagged, skipped {} messages", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Notification logger shutting down");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::types::{Metadata, RecordingState};

    fn recording() -> LinkedRecordingDescriptor {
        LinkedRecordingDescriptor {
            id: 1,
            state: RecordingState::New,
            duration: 0,
            start_time: 0,
            continuous: true,
            to_disk: true,
            max_size: 0,
            max_age: 0,
            name: "r1".to_string(),
            download_url: None,
            report_url: None,
            metadata: Metadata::default(),
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_envelope() {
        let publisher = NotificationPublisher::new(8);
        let mut rx = publisher.subscribe();

        publisher.notify(NotificationCategory::ActiveRecordingCreated, "jmx://a", recording());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.category, NotificationCategory::ActiveRecordingCreated);
        assert_eq!(received.message.target, "jmx://a");
        assert_eq!(received.message.recording.name, "r1");
    }

    #[test]
    fn test_publish_without_subscribers_does_not_panic() {
        let publisher = NotificationPublisher::new(8);
        publisher.notify(NotificationCategory::ActiveRecordingDeleted, "jmx://a", recording());
    }

    #[tokio::test]
    async fn test_logger_stops_on_cancel() {
        let publisher = NotificationPublisher::new(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_logger(publisher.subscribe(), cancel.clone()));

        publisher.notify(NotificationCategory::SnapshotCreated, "jmx://a", recording());
        cancel.cancel();

        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_logger_keeps_running_across_messages() {
        let publisher = NotificationPublisher::new(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_logger(publisher.subscribe(), cancel.clone()));

        for _ in 0..3 {
            publisher.notify(NotificationCategory::ActiveRecordingCreated, "jmx://a", recording());
        }
        tokio::task::yield_now().await;

        assert!(!handle.is_finished());
        assert_eq!(publisher.tx.receiver_count(), 1);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
