//! Viewer Economy Ledger Core
//!
//! Per-viewer Points and XP ledger for a live-streaming community, with the
//! engines that feed it (accrual, spend, admin override, referral) and the
//! read-models derived from it (level, eligibility).
//!
//! # Architecture
//!
//! - **Append-only log**: every balance change is an immutable transaction row
//! - **Materialized snapshot**: one account record per viewer, committed in the
//!   same RocksDB transaction as its log row
//! - **Store-enforced guards**: idempotent kinds claim a uniqueness key inside
//!   that same transaction
//! - **Hash chain**: each row commits to its predecessor, so the log is
//!   tamper-evident
//!
//! # Invariants
//!
//! - `points_balance == Σ points_delta` for every account
//! - `points_earned_total == Σ max(points_delta, 0)`
//! - `user_level == level_for(xp_total)` after every mutation
//! - Rows are never modified or deleted

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod accrual;
pub mod admin;
pub mod announce;
pub mod config;
pub mod crypto;
pub mod eligibility;
pub mod error;
pub mod ledger;
pub mod leveling;
pub mod metrics;
pub mod referral;
pub mod spend;
pub mod storage;
pub mod types;

// Re-exports
pub use accrual::AccrualEngine;
pub use admin::AdminGateway;
pub use announce::{Announcement, AnnouncementSink};
pub use config::Config;
pub use eligibility::{tts_eligible, Eligibility, EligibilityReason};
pub use error::{Error, Result};
pub use ledger::{AccountAudit, Applied, Ledger, LedgerTxn};
pub use leveling::LevelTable;
pub use referral::ReferralCoordinator;
pub use spend::SpendEngine;
pub use storage::Storage;
pub use types::{
    Account, AccountId, DonationRecord, DonationStatus, Guard, Principal, Role, Transaction,
    TransactionIntent, TransactionKind,
};
