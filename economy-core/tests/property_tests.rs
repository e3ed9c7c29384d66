//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Balance conservation: points_balance == Σ points_delta
//! - Earned total: only increases, by exactly the positive deltas
//! - Level cache: user_level == level_for(xp_total) after every mutation
//! - Streak bonus: capped for arbitrarily long streaks

use chrono::{Duration, TimeZone, Utc};
use economy_core::{
    accrual::{AccrualEngine, CheckinRewards},
    config::AccrualConfig,
    types::{AccountId, TransactionIntent, TransactionKind},
    Config, Error, Ledger, LevelTable,
};
use proptest::prelude::*;
use std::sync::Arc;

/// One mutation attempt
#[derive(Debug, Clone)]
enum Op {
    Credit(TransactionKind, i64, i64),
    Debit(TransactionKind, i64),
}

/// Strategy for credit kinds
fn credit_kind_strategy() -> impl Strategy<Value = TransactionKind> {
    prop_oneof![
        Just(TransactionKind::ChatActivity),
        Just(TransactionKind::WatchTime),
        Just(TransactionKind::DailyCheckin),
        Just(TransactionKind::ReferralBonus),
        Just(TransactionKind::AdminAward),
    ]
}

/// Strategy for debit kinds
fn debit_kind_strategy() -> impl Strategy<Value = TransactionKind> {
    prop_oneof![
        Just(TransactionKind::AdminDeduct),
        Just(TransactionKind::DonationSpend),
        Just(TransactionKind::ShopSpend),
    ]
}

/// Strategy for mutation sequences
fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (credit_kind_strategy(), 0i64..500, 0i64..400)
            .prop_filter("non-empty", |(_, p, x)| *p > 0 || *x > 0)
            .prop_map(|(kind, points, xp)| Op::Credit(kind, points, xp)),
        (debit_kind_strategy(), 1i64..500).prop_map(|(kind, points)| Op::Debit(kind, points)),
    ]
}

fn create_test_ledger() -> (Arc<Ledger>, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();
    (Arc::new(Ledger::open(config).unwrap()), temp_dir)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Snapshot always equals the sum of its log, whatever was accepted or rejected
    #[test]
    fn prop_snapshot_matches_log(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let (ledger, _temp) = create_test_ledger();
        let id: AccountId = "viewer".into();
        ledger.open_account(&id, "Viewer").unwrap();

        let mut expected_balance = 0i64;
        let mut expected_earned = 0i64;
        let mut expected_xp = 0i64;

        for op in ops {
            let earned_before = ledger.account(&id).unwrap().points_earned_total;
            let (intent, points, xp) = match op {
                Op::Credit(kind, points, xp) => {
                    (TransactionIntent::new(id.clone(), kind, points, xp, "credit"), points, xp)
                }
                Op::Debit(kind, points) => {
                    (TransactionIntent::new(id.clone(), kind, -points, 0, "debit"), -points, 0)
                }
            };

            match ledger.apply(&intent) {
                Ok(applied) => {
                    expected_balance += points;
                    expected_earned += points.max(0);
                    expected_xp += xp;
                    prop_assert_eq!(applied.new_balance, expected_balance);
                }
                Err(Error::InsufficientBalance { available, .. }) => {
                    prop_assert!(expected_balance + points < 0);
                    prop_assert_eq!(available, expected_balance);
                }
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }

            let account = ledger.account(&id).unwrap();
            prop_assert!(account.points_balance >= 0);
            prop_assert!(account.points_earned_total >= earned_before);
            prop_assert_eq!(account.points_balance, expected_balance);
            prop_assert_eq!(account.points_earned_total, expected_earned);
            prop_assert_eq!(account.xp_total, expected_xp);
            prop_assert_eq!(account.user_level, ledger.levels().level_for(account.xp_total));
        }

        let audit = ledger.verify_account(&id).unwrap();
        prop_assert_eq!(audit.points_balance, expected_balance);
        prop_assert_eq!(audit.points_earned_total, expected_earned);
    }

    /// Level is monotonic over the whole i64 range
    #[test]
    fn prop_level_monotonic(a in any::<i64>(), b in any::<i64>()) {
        let table = LevelTable::default();
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(table.level_for(low) <= table.level_for(high));
        prop_assert!(table.level_for(low) >= 1);
    }

    /// Progress is consistent with the level curve
    #[test]
    fn prop_progress_consistent(xp in 0i64..10_000_000) {
        let table = LevelTable::default();
        let progress = table.progress(xp);
        prop_assert_eq!(progress.level, table.level_for(xp));
        prop_assert!(progress.xp_to_next_level > 0);
        prop_assert_eq!(table.level_for(xp + progress.xp_to_next_level), progress.level + 1);
    }

    /// Bonus is min(streak - 1, 10) for any streak
    #[test]
    fn prop_streak_bonus_caps(streak in 1u32..100_000) {
        let rules = AccrualConfig::default();
        let rewards = CheckinRewards::for_streak(&rules, streak);
        let bonus = i64::from((streak - 1).min(10));
        prop_assert_eq!(rewards.xp, 25 + 5 * bonus);
        prop_assert_eq!(rewards.points, 10 + 2 * bonus);
        prop_assert!(rewards.xp <= 75);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Consecutive check-ins build the streak day by day
    #[test]
    fn prop_consecutive_checkins(days in 1u32..20, hour in 0u32..24) {
        let (ledger, _temp) = create_test_ledger();
        let id: AccountId = "viewer".into();
        ledger.open_account(&id, "Viewer").unwrap();
        let engine = AccrualEngine::new(ledger.clone());
        let start = Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap();

        for day in 0..days {
            let now = start + Duration::days(i64::from(day));
            let outcome = engine.check_in_at(&id, now).unwrap();
            prop_assert!(!outcome.already_checked_in());
            prop_assert_eq!(outcome.receipt().current_streak, day + 1);
            prop_assert!(engine.check_in_at(&id, now).unwrap().already_checked_in());
        }

        let account = ledger.account(&id).unwrap();
        prop_assert_eq!(account.total_checkins, days);
        prop_assert_eq!(account.tx_count, u64::from(days));
    }
}
