//! Referral reward coordinator
//!
//! A claim links the referee to the referrer and credits both sides in one
//! ledger transaction. The per-referee guard key and `referred_by` are
//! written together, so a retried claim can never pay twice.

use crate::{
    types::{AccountId, Guard, ReferralEntry, TransactionIntent, TransactionKind},
    Error, Ledger, Result,
};
use serde::Serialize;
use std::sync::Arc;

/// Result of a successful claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferralClaim {
    /// Account that owns the token
    pub referrer: AccountId,
    /// Points credited to the referrer
    pub referrer_credited: i64,
    /// Points credited to the referee
    pub referee_credited: i64,
    /// Referee balance afterwards
    pub referee_balance: i64,
}

/// Referral standing of one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferralStats {
    /// Token others sign up with
    pub referral_token: String,
    /// Viewers referred
    pub referred_users: u32,
    /// Points earned from referrals
    pub points_earned: i64,
    /// Latest referrals, newest first
    pub recent_referrals: Vec<ReferralEntry>,
}

/// Referral reward coordinator
#[derive(Debug, Clone)]
pub struct ReferralCoordinator {
    ledger: Arc<Ledger>,
}

impl ReferralCoordinator {
    /// Create coordinator over a shared ledger
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    /// Claim a referral for `referee` with someone else's token
    pub fn claim(&self, referee: &AccountId, token: &str) -> Result<ReferralClaim> {
        let token = token.trim().to_ascii_uppercase();
        if token.is_empty() {
            return Err(Error::Validation("referral token is required".to_string()));
        }
        let bonus = self.ledger.config().referral.bonus_points;

        let claim = self.ledger.transact(|txn| {
            let referrer = txn
                .referral_token_owner(&token)?
                .ok_or_else(|| Error::UnknownReferralToken(token.clone()))?;
            if &referrer == referee {
                return Err(Error::SelfReferral);
            }

            let (mut referee_account, mut referrer_account) = txn.account_pair(referee, &referrer)?;
            if referee_account.referred_by.is_some() {
                return Err(Error::AlreadyReferred(referee.clone()));
            }
            txn.claim(&Guard::ReferralBonus {
                referee: referee.clone(),
            })
            .map_err(|e| match e {
                Error::AlreadyApplied(_) => Error::AlreadyReferred(referee.clone()),
                other => other,
            })?;

            referee_account.referred_by = Some(referrer.clone());
            let referee_applied = txn.apply(
                &mut referee_account,
                &TransactionIntent::new(
                    referee.clone(),
                    TransactionKind::ReferralBonus,
                    bonus,
                    0,
                    format!("Referral bonus (referred by {})", referrer),
                ),
            )?;

            let sequence = referrer_account.referral_count;
            referrer_account.referral_count = sequence.saturating_add(1);
            referrer_account.referral_points_earned += bonus;
            txn.apply(
                &mut referrer_account,
                &TransactionIntent::new(
                    referrer.clone(),
                    TransactionKind::ReferralBonus,
                    bonus,
                    0,
                    format!("Referral bonus (referred {})", referee),
                ),
            )?;

            txn.append_referral(
                &referrer,
                sequence,
                &ReferralEntry {
                    referee: referee.clone(),
                    referee_name: referee_account.display_name.clone(),
                    points: bonus,
                    claimed_at: txn.now(),
                },
            )?;

            Ok(ReferralClaim {
                referrer,
                referrer_credited: bonus,
                referee_credited: bonus,
                referee_balance: referee_applied.new_balance,
            })
        })?;

        tracing::info!(
            referee = %referee,
            referrer = %claim.referrer,
            bonus,
            "Referral claimed"
        );
        Ok(claim)
    }

    /// Referral standing of an account
    pub fn stats(&self, account_id: &AccountId) -> Result<ReferralStats> {
        let account = self.ledger.account(account_id)?;
        let recent = self
            .ledger
            .referrals(account_id, self.ledger.config().referral.recent_limit)?;

        Ok(ReferralStats {
            referral_token: account.referral_token,
            referred_users: account.referral_count,
            points_earned: account.referral_points_earned,
            recent_referrals: recent,
        })
    }
}
