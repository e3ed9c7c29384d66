use crate::errors::{ApiError, Result};
use crate::metrics::ANNOUNCEMENTS_PUBLISHED;
use async_nats::Client;
use economy_core::announce::Announcement;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

pub struct NatsProducer {
    client: Client,
    topic_prefix: String,
}

impl NatsProducer {
    pub async fn new(url: &str, topic_prefix: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| ApiError::Nats(e.to_string()))?;

        info!("Connected to NATS at {}", url);

        Ok(NatsProducer {
            client,
            topic_prefix: topic_prefix.to_string(),
        })
    }

    fn subject(&self) -> String {
        format!("{}.donations.announcements", self.topic_prefix)
    }

    pub async fn publish_announcement(&self, announcement: &Announcement) -> Result<()> {
        let subject = self.subject();
        let payload = serde_json::to_vec(announcement)?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| ApiError::Nats(format!("Failed to publish announcement: {}", e)))?;

        info!(
            donation_id = %announcement.donation_id,
            subject = %subject,
            "Published donation announcement"
        );

        Ok(())
    }
}

/// Drain the announcement channel until every sender is dropped.
///
/// Without a producer, announcements are only logged.
pub fn spawn_announcement_forwarder(
    mut receiver: mpsc::Receiver<Announcement>,
    producer: Option<NatsProducer>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(announcement) = receiver.recv().await {
            match producer {
                Some(ref producer) => match producer.publish_announcement(&announcement).await {
                    Ok(()) => ANNOUNCEMENTS_PUBLISHED.with_label_values(&["published"]).inc(),
                    Err(e) => {
                        ANNOUNCEMENTS_PUBLISHED.with_label_values(&["failed"]).inc();
                        tracing::error!(
                            reconcile = true,
                            donation_id = %announcement.donation_id,
                            error = %e,
                            "Donation announcement was not published"
                        );
                    }
                },
                None => {
                    ANNOUNCEMENTS_PUBLISHED.with_label_values(&["logged"]).inc();
                    info!(
                        donation_id = %announcement.donation_id,
                        donor = %announcement.donor_name,
                        amount = %announcement.amount,
                        "Donation announcement (NATS disabled)"
                    );
                }
            }
        }
        info!("Announcement channel closed");
    })
}
