//! Core types for the ledger
//!
//! All stored types are designed for:
//! - Deterministic serialization (bincode)
//! - Integer arithmetic for Points and XP
//! - Exact decimals for currency amounts

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum length of an account identifier
pub const MAX_ACCOUNT_ID_LEN: usize = 128;

/// Account identifier (the authenticated principal's subject)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifiers are used as key prefixes, so control characters are rejected.
    pub fn validate(&self) -> crate::Result<()> {
        if self.0.is_empty() || self.0.len() > MAX_ACCOUNT_ID_LEN {
            return Err(crate::Error::Validation(format!(
                "account id must be 1..={} bytes",
                MAX_ACCOUNT_ID_LEN
            )));
        }
        if self.0.chars().any(char::is_control) {
            return Err(crate::Error::Validation(
                "account id must not contain control characters".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Kind of ledger mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Qualifying chat message
    ChatActivity,
    /// Watched minutes
    WatchTime,
    /// Daily check-in with streak bonus
    DailyCheckin,
    /// Referral reward (both sides)
    ReferralBonus,
    /// Staff credit
    AdminAward,
    /// Staff debit
    AdminDeduct,
    /// Points spent on a donation
    DonationSpend,
    /// Points spent in the shop
    ShopSpend,
}

impl TransactionKind {
    /// All kinds, in declaration order
    pub const ALL: [TransactionKind; 8] = [
        TransactionKind::ChatActivity,
        TransactionKind::WatchTime,
        TransactionKind::DailyCheckin,
        TransactionKind::ReferralBonus,
        TransactionKind::AdminAward,
        TransactionKind::AdminDeduct,
        TransactionKind::DonationSpend,
        TransactionKind::ShopSpend,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::ChatActivity => "chat_activity",
            TransactionKind::WatchTime => "watch_time",
            TransactionKind::DailyCheckin => "daily_checkin",
            TransactionKind::ReferralBonus => "referral_bonus",
            TransactionKind::AdminAward => "admin_award",
            TransactionKind::AdminDeduct => "admin_deduct",
            TransactionKind::DonationSpend => "donation_spend",
            TransactionKind::ShopSpend => "shop_spend",
        }
    }

    /// Parse from wire name
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == s)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to mutate one account's balances
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionIntent {
    /// Target account
    pub account_id: AccountId,
    /// Mutation kind
    pub kind: TransactionKind,
    /// Signed Points change
    pub points_delta: i64,
    /// Signed XP change (XP never decreases, so negative values are rejected)
    pub xp_delta: i64,
    /// Free-text description
    pub description: String,
    /// Who caused the mutation, for audited paths
    pub actor: Option<String>,
}

impl TransactionIntent {
    /// Create an intent with no actor
    pub fn new(
        account_id: AccountId,
        kind: TransactionKind,
        points_delta: i64,
        xp_delta: i64,
        description: impl Into<String>,
    ) -> Self {
        Self {
            account_id,
            kind,
            points_delta,
            xp_delta,
            description: description.into(),
            actor: None,
        }
    }

    /// Attach the audited actor
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

/// Immutable ledger row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique row ID (UUIDv7 for time-ordering)
    pub tx_id: Uuid,
    /// Owning account
    pub account_id: AccountId,
    /// Position in the account's log, starting at 0
    pub sequence: u64,
    /// Mutation kind
    pub kind: TransactionKind,
    /// Signed Points change
    pub points_delta: i64,
    /// Signed XP change
    pub xp_delta: i64,
    /// Free-text description
    pub description: String,
    /// Audited actor (admin overrides)
    pub actor: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Hash of the previous row of this account (zeroes for the first)
    pub prev_hash: [u8; 32],
    /// SHA-256 over the canonical bytes
    pub hash: [u8; 32],
    /// Ed25519 signature over `hash`, when the ledger signs rows
    pub signature: Option<Vec<u8>>,
}

/// Fields covered by a row hash; everything except `hash` and `signature`.
#[derive(Serialize)]
struct CanonicalTransaction<'a> {
    tx_id: &'a Uuid,
    account_id: &'a AccountId,
    sequence: u64,
    kind: TransactionKind,
    points_delta: i64,
    xp_delta: i64,
    description: &'a str,
    actor: &'a Option<String>,
    created_at_nanos: i64,
    prev_hash: &'a [u8; 32],
}

impl Transaction {
    /// Create canonical bytes for hashing
    pub fn canonical_bytes(&self) -> crate::Result<Vec<u8>> {
        let canonical = CanonicalTransaction {
            tx_id: &self.tx_id,
            account_id: &self.account_id,
            sequence: self.sequence,
            kind: self.kind,
            points_delta: self.points_delta,
            xp_delta: self.xp_delta,
            description: &self.description,
            actor: &self.actor,
            created_at_nanos: self.created_at.timestamp_nanos_opt().unwrap_or(0),
            prev_hash: &self.prev_hash,
        };
        Ok(bincode::serialize(&canonical)?)
    }

    /// Recompute the row hash from its contents
    pub fn compute_hash(&self) -> crate::Result<[u8; 32]> {
        Ok(crate::crypto::hash_bytes(&self.canonical_bytes()?))
    }
}

/// Materialized per-viewer snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Identity reference
    pub account_id: AccountId,
    /// Name shown in announcements
    pub display_name: String,
    /// Spendable Points, never negative
    pub points_balance: i64,
    /// Sum of positive Points deltas
    pub points_earned_total: i64,
    /// Lifetime XP
    pub xp_total: i64,
    /// Cached `level_for(xp_total)`
    pub user_level: u32,
    /// Lifetime watched minutes
    pub watch_time_minutes: i64,
    /// Last processed watch timestamp; `None` when no session is open
    pub last_watch_time_update: Option<DateTime<Utc>>,
    /// Consecutive daily check-ins
    pub current_streak: u32,
    /// UTC calendar date of the last check-in
    pub last_checkin_date: Option<NaiveDate>,
    /// Lifetime check-ins
    pub total_checkins: u32,
    /// Unique, immutable token other viewers sign up with
    pub referral_token: String,
    /// Referrer, set at most once
    pub referred_by: Option<AccountId>,
    /// Viewers this account referred
    pub referral_count: u32,
    /// Points this account earned from referring others
    pub referral_points_earned: i64,
    /// Mirrored from the subscriptions collaborator
    pub is_subscriber: bool,
    /// Mirrored from the payments collaborator
    pub is_lifetime_donor: bool,
    /// Number of rows in this account's log
    pub tx_count: u64,
    /// Hash of the last row (zeroes when the log is empty)
    pub head_hash: [u8; 32],
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last snapshot update
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Fresh account with empty balances
    pub fn new(
        account_id: AccountId,
        display_name: impl Into<String>,
        referral_token: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id,
            display_name: display_name.into(),
            points_balance: 0,
            points_earned_total: 0,
            xp_total: 0,
            user_level: 1,
            watch_time_minutes: 0,
            last_watch_time_update: None,
            current_streak: 0,
            last_checkin_date: None,
            total_checkins: 0,
            referral_token,
            referred_by: None,
            referral_count: 0,
            referral_points_earned: 0,
            is_subscriber: false,
            is_lifetime_donor: false,
            tx_count: 0,
            head_hash: [0u8; 32],
            created_at: now,
            updated_at: now,
        }
    }
}

/// Uniqueness key claimed by idempotent operations
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Guard {
    /// At most one check-in per account per UTC day
    DailyCheckin {
        /// Account checking in
        account_id: AccountId,
        /// UTC calendar date
        date: NaiveDate,
    },
    /// At most one referral reward per referee
    ReferralBonus {
        /// Referred account
        referee: AccountId,
    },
    /// At most one credit per chat message
    ChatMessage {
        /// Collaborator-assigned message ID
        message_id: String,
    },
    /// At most one record and announcement per captured payment
    PaymentCapture {
        /// Collaborator-assigned donation ID
        donation_id: Uuid,
    },
}

impl Guard {
    /// Key prefix shared by every chat message guard
    pub const CHAT_KEY_PREFIX: &'static [u8] = b"chat\0";

    /// Store key
    pub fn key(&self) -> Vec<u8> {
        match self {
            Guard::DailyCheckin { account_id, date } => {
                format!("checkin\0{}\0{}", account_id, date.format("%Y-%m-%d")).into_bytes()
            }
            Guard::ReferralBonus { referee } => format!("referral\0{}", referee).into_bytes(),
            Guard::ChatMessage { message_id } => {
                let mut key = Self::CHAT_KEY_PREFIX.to_vec();
                key.extend_from_slice(message_id.as_bytes());
                key
            }
            Guard::PaymentCapture { donation_id } => format!("payment\0{}", donation_id).into_bytes(),
        }
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Guard::DailyCheckin { account_id, date } => {
                write!(f, "daily check-in for {} on {}", account_id, date)
            }
            Guard::ReferralBonus { referee } => write!(f, "referral bonus for {}", referee),
            Guard::ChatMessage { message_id } => write!(f, "chat message {}", message_id),
            Guard::PaymentCapture { donation_id } => write!(f, "payment capture {}", donation_id),
        }
    }
}

/// Donation lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonationStatus {
    /// Awaiting payment capture
    Pending,
    /// Funded
    Completed,
    /// Capture failed
    Failed,
}

/// How a donation was paid for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonationFunding {
    /// Debited from a Points balance
    Points,
    /// Captured by the payment collaborator
    Payment,
}

/// Donation record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationRecord {
    /// Unique donation ID
    pub donation_id: Uuid,
    /// Donating account, when known
    pub account_id: Option<AccountId>,
    /// Donor name as entered
    pub donor_name: String,
    /// Donor email
    pub donor_email: Option<String>,
    /// Amount in currency units
    pub amount: Decimal,
    /// Points debited (points-funded only)
    pub points_cost: Option<i64>,
    /// Message shown with the announcement
    pub message: Option<String>,
    /// Hide the donor name publicly
    pub is_anonymous: bool,
    /// Lifecycle status
    pub status: DonationStatus,
    /// Funding source
    pub funding: DonationFunding,
    /// Ledger row that paid for it (points-funded only)
    pub tx_id: Option<Uuid>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl DonationRecord {
    /// Name to show publicly
    pub fn public_name(&self) -> &str {
        if self.is_anonymous {
            "Anonymous"
        } else {
            &self.donor_name
        }
    }
}

/// Collaborator-owned supporter facts mirrored onto an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SupporterStatus {
    /// Active subscription
    pub is_subscriber: bool,
    /// Has ever completed a money donation
    pub is_lifetime_donor: bool,
}

/// One referral, as indexed under the referrer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralEntry {
    /// Referred account
    pub referee: AccountId,
    /// Referee's display name at claim time
    pub referee_name: String,
    /// Points credited to the referrer
    pub points: i64,
    /// Claim timestamp
    pub claimed_at: DateTime<Utc>,
}

/// Caller role, as asserted by the authentication collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular viewer
    Viewer,
    /// Staff with override privileges
    Admin,
    /// Trusted collaborator (chat bot, payment webhook)
    Service,
}

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Account the caller acts as
    pub account_id: AccountId,
    /// Display name
    pub display_name: String,
    /// Role
    pub role: Role,
}

impl Principal {
    /// Whether the caller may use the admin override path
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
