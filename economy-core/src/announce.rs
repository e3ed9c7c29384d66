//! Public donation announcements
//!
//! The spend engine hands announcements to an owned, bounded channel; the
//! service drains it and publishes to the chat transport. Sending never
//! blocks a ledger caller.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Event shown to the stream when a donation completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// Donation being announced
    pub donation_id: Uuid,
    /// Donor name, or "Anonymous"
    pub donor_name: String,
    /// Amount in currency units
    pub amount: Decimal,
    /// Optional donor message
    pub message: Option<String>,
    /// When the donation completed
    pub created_at: DateTime<Utc>,
}

/// Announcement could not be queued
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceError {
    /// Channel at capacity
    #[error("announcement channel is full")]
    Full,

    /// Receiver dropped
    #[error("announcement channel is closed")]
    Closed,
}

/// Sending half of the announcement channel
#[derive(Debug, Clone)]
pub struct AnnouncementSink {
    sender: mpsc::Sender<Announcement>,
}

/// Create a bounded announcement channel
pub fn channel(capacity: usize) -> (AnnouncementSink, mpsc::Receiver<Announcement>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (AnnouncementSink { sender }, receiver)
}

impl AnnouncementSink {
    /// Queue an announcement without waiting
    pub fn announce(&self, announcement: Announcement) -> Result<(), AnnounceError> {
        self.sender.try_send(announcement).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => AnnounceError::Full,
            mpsc::error::TrySendError::Closed(_) => AnnounceError::Closed,
        })
    }
}
