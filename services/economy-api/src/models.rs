use chrono::{DateTime, NaiveDate, Utc};
use economy_core::{
    eligibility::EligibilityReason,
    leveling::LevelProgress,
    referral::ReferralStats,
    types::{Account, DonationStatus, ReferralEntry, Transaction, TransactionKind},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Accept currency amounts as JSON numbers or strings
fn decimal_from_number_or_string<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .map_err(D::Error::custom),
        serde_json::Value::String(s) => Decimal::from_str(s.trim()).map_err(D::Error::custom),
        other => Err(D::Error::custom(format!("expected a decimal amount, got {}", other))),
    }
}

/// Points-funded donation request
#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct PointsDonationRequest {
    #[serde(default)]
    #[validate(length(max = 100))]
    pub donor_name: String,
    #[validate(email)]
    pub donor_email: Option<String>,
    #[serde(deserialize_with = "decimal_from_number_or_string")]
    pub amount: Decimal,
    #[validate(range(min = 1))]
    pub points_cost: i64,
    #[validate(length(max = 500))]
    pub message: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PointsDonationResponse {
    pub donation_id: Uuid,
    pub new_points_balance: i64,
    pub transaction_id: Uuid,
    pub announced: bool,
    pub message: String,
}

/// Capture confirmation from the payment collaborator
#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct PaymentCapturedRequest {
    pub donation_id: Uuid,
    #[validate(length(min = 1, max = 128))]
    pub user_id: Option<String>,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub donor_name: String,
    #[validate(email)]
    pub donor_email: Option<String>,
    #[serde(deserialize_with = "decimal_from_number_or_string")]
    pub amount: Decimal,
    #[validate(length(max = 500))]
    pub message: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DonationResponse {
    pub donation_id: Uuid,
    pub status: DonationStatus,
    pub amount: Decimal,
}

/// Admin override request; `points_amount` is signed
#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct AwardPointsRequest {
    pub points_amount: i64,
    pub transaction_type: Option<String>,
    #[validate(length(min = 1, max = 500))]
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AwardPointsResponse {
    pub new_points_balance: i64,
    pub message: String,
    pub transaction_id: Uuid,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SupporterStatusRequest {
    pub is_subscriber: bool,
    pub is_lifetime_donor: bool,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct ChatActivityRequest {
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
    #[validate(length(min = 1, max = 256))]
    pub message_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatActivityResponse {
    pub points_awarded: i64,
    pub new_points_balance: i64,
    pub transaction_id: Uuid,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct ReferralClaimRequest {
    #[validate(length(min = 1, max = 64))]
    pub referral_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckinResponse {
    pub already_checked_in: bool,
    pub xp_awarded: i64,
    pub points_awarded: i64,
    pub current_streak: u32,
    pub level_up: bool,
    pub new_level: u32,
    pub new_points_balance: i64,
    pub bonus_xp: i64,
    pub bonus_points: i64,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EligibilityResponse {
    pub eligible: bool,
    pub reasons: BTreeSet<EligibilityReason>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    pub limit: Option<usize>,
}

/// Account snapshot as shown to its owner
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub account_id: String,
    pub display_name: String,
    pub points_balance: i64,
    pub points_earned_total: i64,
    pub xp_total: i64,
    pub user_level: u32,
    pub xp_into_level: i64,
    pub xp_to_next_level: i64,
    pub watch_time_minutes: i64,
    pub current_streak: u32,
    pub last_checkin_date: Option<NaiveDate>,
    pub total_checkins: u32,
    pub referral_token: String,
    pub referred_by: Option<String>,
    pub is_subscriber: bool,
    pub is_lifetime_donor: bool,
    pub created_at: DateTime<Utc>,
}

impl AccountResponse {
    pub fn new(account: Account, progress: LevelProgress) -> Self {
        Self {
            account_id: account.account_id.to_string(),
            display_name: account.display_name,
            points_balance: account.points_balance,
            points_earned_total: account.points_earned_total,
            xp_total: account.xp_total,
            user_level: account.user_level,
            xp_into_level: progress.xp_into_level,
            xp_to_next_level: progress.xp_to_next_level,
            watch_time_minutes: account.watch_time_minutes,
            current_streak: account.current_streak,
            last_checkin_date: account.last_checkin_date,
            total_checkins: account.total_checkins,
            referral_token: account.referral_token,
            referred_by: account.referred_by.map(|id| id.to_string()),
            is_subscriber: account.is_subscriber,
            is_lifetime_donor: account.is_lifetime_donor,
            created_at: account.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub tx_id: Uuid,
    pub sequence: u64,
    pub kind: TransactionKind,
    pub points_delta: i64,
    pub xp_delta: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub hash: String,
}

impl From<Transaction> for TransactionResponse {
    fn from(tx: Transaction) -> Self {
        Self {
            tx_id: tx.tx_id,
            sequence: tx.sequence,
            kind: tx.kind,
            points_delta: tx.points_delta,
            xp_delta: tx.xp_delta,
            description: tx.description,
            created_at: tx.created_at,
            hash: hex::encode(tx.hash),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentReferral {
    pub user_id: String,
    pub display_name: String,
    pub points_earned: i64,
    pub referred_at: DateTime<Utc>,
}

impl From<ReferralEntry> for RecentReferral {
    fn from(entry: ReferralEntry) -> Self {
        Self {
            user_id: entry.referee.to_string(),
            display_name: entry.referee_name,
            points_earned: entry.points,
            referred_at: entry.claimed_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralStatsResponse {
    pub referral_token: String,
    pub referred_users: u32,
    pub points_earned: i64,
    pub recent_referrals: Vec<RecentReferral>,
}

impl From<ReferralStats> for ReferralStatsResponse {
    fn from(stats: ReferralStats) -> Self {
        Self {
            referral_token: stats.referral_token,
            referred_users: stats.referred_users,
            points_earned: stats.points_earned,
            recent_referrals: stats.recent_referrals.into_iter().map(Into::into).collect(),
        }
    }
}
