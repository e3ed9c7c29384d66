//! Feature eligibility derived from an account snapshot
//!
//! Text-to-speech is a privileged output, so the evaluation is a pure
//! projection of the snapshot it is given and keeps no state of its own.

use crate::types::Account;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Why an account qualifies
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityReason {
    /// Active subscriber
    Subscriber,
    /// Has completed a money donation
    LifetimeDonor,
    /// Holds spendable Points
    PositiveBalance,
    /// Has ever earned Points
    EarnedPoints,
}

impl EligibilityReason {
    /// Human-readable explanation
    pub fn describe(&self) -> &'static str {
        match self {
            EligibilityReason::Subscriber => "Active subscriber",
            EligibilityReason::LifetimeDonor => "Lifetime donor",
            EligibilityReason::PositiveBalance => "Has a points balance",
            EligibilityReason::EarnedPoints => "Has earned points",
        }
    }
}

/// Evaluation result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Eligibility {
    /// Whether the feature is unlocked
    pub eligible: bool,
    /// Every condition that holds
    pub reasons: BTreeSet<EligibilityReason>,
}

/// Text-to-speech eligibility: any one reason is enough.
pub fn tts_eligible(account: &Account) -> Eligibility {
    let mut reasons = BTreeSet::new();

    if account.is_subscriber {
        reasons.insert(EligibilityReason::Subscriber);
    }
    if account.is_lifetime_donor {
        reasons.insert(EligibilityReason::LifetimeDonor);
    }
    if account.points_balance > 0 {
        reasons.insert(EligibilityReason::PositiveBalance);
    }
    if account.points_earned_total > 0 {
        reasons.insert(EligibilityReason::EarnedPoints);
    }

    Eligibility {
        eligible: !reasons.is_empty(),
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn fresh() -> Account {
        Account::new("viewer".into(), "Viewer", "TOKEN00001".to_string(), Utc::now())
    }

    #[test]
    fn test_fresh_account_not_eligible() {
        let result = tts_eligible(&fresh());
        assert!(!result.eligible);
        assert!(result.reasons.is_empty());
    }

    #[test]
    fn test_each_reason_alone_is_enough() {
        let mut subscriber = fresh();
        subscriber.is_subscriber = true;
        assert!(tts_eligible(&subscriber).eligible);

        let mut donor = fresh();
        donor.is_lifetime_donor = true;
        assert!(tts_eligible(&donor).eligible);

        // Spent everything, but has earned before
        let mut spender = fresh();
        spender.points_earned_total = 40;
        let result = tts_eligible(&spender);
        assert!(result.eligible);
        assert_eq!(
            result.reasons.into_iter().collect::<Vec<_>>(),
            vec![EligibilityReason::EarnedPoints]
        );
    }

    #[test]
    fn test_reasons_serialize_as_tags() {
        let mut account = fresh();
        account.is_subscriber = true;
        account.points_balance = 5;
        account.points_earned_total = 5;
        let json = serde_json::to_value(tts_eligible(&account)).unwrap();
        assert_eq!(
            json["reasons"],
            serde_json::json!(["subscriber", "positive_balance", "earned_points"])
        );
    }
}
