//! Accrual engine: daily check-in, watch time and chat activity credits
//!
//! Every earning path runs inside one ledger transaction with the account
//! row locked, so status reads and writes never race each other. Calendar
//! days are UTC days.

use crate::{
    config::AccrualConfig,
    ledger::{Applied, LedgerTxn},
    types::{Account, AccountId, Guard, TransactionIntent, TransactionKind},
    Error, Ledger, Result,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Longest message id accepted from the chat collaborator
const MAX_MESSAGE_ID_LEN: usize = 256;

/// Amounts awarded by one check-in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckinRewards {
    /// Total XP
    pub xp: i64,
    /// Total Points
    pub points: i64,
    /// XP above the base amount
    pub bonus_xp: i64,
    /// Points above the base amount
    pub bonus_points: i64,
}

impl CheckinRewards {
    /// Rewards for a check-in that brings the streak to `streak`
    pub fn for_streak(config: &AccrualConfig, streak: u32) -> Self {
        let steps = i64::from(streak.saturating_sub(1).min(config.checkin_max_bonus));
        let bonus_xp = config.checkin_bonus_xp * steps;
        let bonus_points = config.checkin_bonus_points * steps;
        Self {
            xp: config.checkin_base_xp + bonus_xp,
            points: config.checkin_base_points + bonus_points,
            bonus_xp,
            bonus_points,
        }
    }
}

/// Check-in view for the current UTC day
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckinStatus {
    /// No check-in recorded today
    pub can_checkin: bool,
    /// A check-in was recorded today
    pub already_checked_in: bool,
    /// Streak still alive today (0 once a day has been missed)
    pub current_streak: u32,
    /// Lifetime check-ins
    pub total_checkins: u32,
    /// Awarded today, or awarded by the next check-in
    pub today_rewards: CheckinRewards,
}

/// State after a check-in request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckinReceipt {
    /// Today's amounts
    pub rewards: CheckinRewards,
    /// Streak including today
    pub current_streak: u32,
    /// Lifetime check-ins
    pub total_checkins: u32,
    /// The check-in moved the account to a new level
    pub level_up: bool,
    /// Level after the check-in
    pub new_level: u32,
    /// Points balance after the check-in
    pub new_points_balance: i64,
    /// XP total after the check-in
    pub new_xp_total: i64,
}

/// Result of a check-in request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckinOutcome {
    /// Today's check-in already happened; nothing was written
    AlreadyCheckedIn(CheckinReceipt),
    /// A new `daily_checkin` row was committed
    Awarded(CheckinReceipt),
}

impl CheckinOutcome {
    /// Receipt for either outcome
    pub fn receipt(&self) -> &CheckinReceipt {
        match self {
            CheckinOutcome::AlreadyCheckedIn(receipt) | CheckinOutcome::Awarded(receipt) => receipt,
        }
    }

    /// Whether this call found today's check-in already recorded
    pub fn already_checked_in(&self) -> bool {
        matches!(self, CheckinOutcome::AlreadyCheckedIn(_))
    }
}

/// Watch-time accrual result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchAccrual {
    /// Minutes added to the account
    pub minutes_credited: i64,
    /// Points credited for completed blocks
    pub points_awarded: i64,
    /// Lifetime watched minutes
    pub watch_time_minutes: i64,
    /// Points balance afterwards
    pub new_points_balance: i64,
    /// This heartbeat opened a new session
    pub session_started: bool,
}

/// Accrual engine
#[derive(Debug, Clone)]
pub struct AccrualEngine {
    ledger: Arc<Ledger>,
}

impl AccrualEngine {
    /// Create engine over a shared ledger
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    fn rules(&self) -> &AccrualConfig {
        &self.ledger.config().accrual
    }

    /// Check-in status right now
    pub fn checkin_status(&self, account_id: &AccountId) -> Result<CheckinStatus> {
        self.checkin_status_at(account_id, Utc::now())
    }

    /// Check-in status as of `now`
    pub fn checkin_status_at(&self, account_id: &AccountId, now: DateTime<Utc>) -> Result<CheckinStatus> {
        let account = self.ledger.account(account_id)?;
        let today = now.date_naive();
        let already = checked_in_on_or_after(&account, today);
        let streak = effective_streak(&account, today);

        let today_rewards = if already {
            CheckinRewards::for_streak(self.rules(), streak)
        } else {
            CheckinRewards::for_streak(self.rules(), streak.saturating_add(1))
        };

        Ok(CheckinStatus {
            can_checkin: !already,
            already_checked_in: already,
            current_streak: streak,
            total_checkins: account.total_checkins,
            today_rewards,
        })
    }

    /// Check in right now
    pub fn check_in(&self, account_id: &AccountId) -> Result<CheckinOutcome> {
        self.check_in_at(account_id, Utc::now())
    }

    /// Check in as of `now`.
    ///
    /// A second call on the same UTC day returns `AlreadyCheckedIn` with the
    /// amounts awarded earlier and leaves the ledger untouched.
    pub fn check_in_at(&self, account_id: &AccountId, now: DateTime<Utc>) -> Result<CheckinOutcome> {
        let rules = self.rules().clone();
        let today = now.date_naive();

        let outcome = self.ledger.transact_at(now, |txn| {
            let mut account = txn.account(account_id)?;

            // A skewed clock can report a day before the stored one
            if checked_in_on_or_after(&account, today) {
                return Ok(CheckinOutcome::AlreadyCheckedIn(CheckinReceipt {
                    rewards: CheckinRewards::for_streak(&rules, account.current_streak),
                    current_streak: account.current_streak,
                    total_checkins: account.total_checkins,
                    level_up: false,
                    new_level: account.user_level,
                    new_points_balance: account.points_balance,
                    new_xp_total: account.xp_total,
                }));
            }

            let streak = if account.last_checkin_date.is_some()
                && account.last_checkin_date == today.pred_opt()
            {
                account.current_streak.saturating_add(1)
            } else {
                1
            };
            let rewards = CheckinRewards::for_streak(&rules, streak);

            txn.claim(&Guard::DailyCheckin {
                account_id: account_id.clone(),
                date: today,
            })?;

            account.current_streak = streak;
            account.last_checkin_date = Some(today);
            account.total_checkins = account.total_checkins.saturating_add(1);

            let applied = txn.apply(
                &mut account,
                &TransactionIntent::new(
                    account_id.clone(),
                    TransactionKind::DailyCheckin,
                    rewards.points,
                    rewards.xp,
                    format!("Daily check-in (day {} streak)", streak),
                ),
            )?;

            Ok(CheckinOutcome::Awarded(CheckinReceipt {
                rewards,
                current_streak: streak,
                total_checkins: account.total_checkins,
                level_up: applied.leveled_up(),
                new_level: applied.new_level,
                new_points_balance: applied.new_balance,
                new_xp_total: applied.new_xp_total,
            }))
        })?;

        if let CheckinOutcome::Awarded(ref receipt) = outcome {
            tracing::info!(
                account_id = %account_id,
                streak = receipt.current_streak,
                xp = receipt.rewards.xp,
                points = receipt.rewards.points,
                level_up = receipt.level_up,
                "Daily check-in recorded"
            );
        }
        Ok(outcome)
    }

    /// Credit watch time up to now
    pub fn record_watch_heartbeat(&self, account_id: &AccountId) -> Result<WatchAccrual> {
        self.record_watch_heartbeat_at(account_id, Utc::now())
    }

    /// Credit whole minutes watched since the last processed timestamp.
    ///
    /// Safe to call at any frequency: the clock only advances by the minutes
    /// actually credited, so the sub-minute remainder carries over.
    pub fn record_watch_heartbeat_at(&self, account_id: &AccountId, now: DateTime<Utc>) -> Result<WatchAccrual> {
        let rules = self.rules().clone();
        self.ledger.transact_at(now, |txn| {
            let mut account = txn.account(account_id)?;
            accrue_watch(txn, &mut account, &rules, now, false)
        })
    }

    /// Close the watch session right now
    pub fn end_watch_session(&self, account_id: &AccountId) -> Result<WatchAccrual> {
        self.end_watch_session_at(account_id, Utc::now())
    }

    /// Credit the final stretch and clear the session clock
    pub fn end_watch_session_at(&self, account_id: &AccountId, now: DateTime<Utc>) -> Result<WatchAccrual> {
        let rules = self.rules().clone();
        self.ledger.transact_at(now, |txn| {
            let mut account = txn.account(account_id)?;
            accrue_watch(txn, &mut account, &rules, now, true)
        })
    }

    /// Credit one qualifying chat message, at most once per message id
    pub fn credit_chat_message(&self, account_id: &AccountId, message_id: &str) -> Result<Applied> {
        let message_id = message_id.trim();
        if message_id.is_empty() || message_id.len() > MAX_MESSAGE_ID_LEN {
            return Err(Error::Validation(format!(
                "message_id must be 1..={} bytes",
                MAX_MESSAGE_ID_LEN
            )));
        }

        let rules = self.rules();
        let intent = TransactionIntent::new(
            account_id.clone(),
            TransactionKind::ChatActivity,
            rules.chat_points,
            rules.chat_xp,
            "Chat activity",
        );
        self.ledger.apply_guarded(
            &intent,
            &Guard::ChatMessage {
                message_id: message_id.to_string(),
            },
        )
    }

    /// Prune chat message guards past the retention window
    pub fn prune_chat_guards(&self) -> Result<usize> {
        self.prune_chat_guards_at(Utc::now())
    }

    /// Prune chat message guards claimed more than the retention window
    /// before `now`. A collaborator retry older than that would credit again.
    pub fn prune_chat_guards_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::hours(self.rules().chat_guard_retention_hours);
        let pruned = self
            .ledger
            .storage()
            .prune_guards(Guard::CHAT_KEY_PREFIX, cutoff)?;
        if pruned > 0 {
            tracing::info!(pruned, cutoff = %cutoff, "Pruned chat message guards");
        }
        Ok(pruned)
    }
}

fn checked_in_on_or_after(account: &Account, today: NaiveDate) -> bool {
    matches!(account.last_checkin_date, Some(last) if last >= today)
}

/// Streak that is still alive on `today`
fn effective_streak(account: &Account, today: NaiveDate) -> u32 {
    match account.last_checkin_date {
        Some(last) if last >= today || Some(last) == today.pred_opt() => account.current_streak,
        _ => 0,
    }
}

fn accrue_watch(
    txn: &mut LedgerTxn<'_>,
    account: &mut Account,
    rules: &AccrualConfig,
    now: DateTime<Utc>,
    close: bool,
) -> Result<WatchAccrual> {
    let mut accrual = WatchAccrual {
        minutes_credited: 0,
        points_awarded: 0,
        watch_time_minutes: account.watch_time_minutes,
        new_points_balance: account.points_balance,
        session_started: false,
    };

    let next_clock = match account.last_watch_time_update {
        None => {
            accrual.session_started = !close;
            Some(now)
        }
        // Clock went backwards; keep the stored timestamp
        Some(last) if now < last => Some(last),
        Some(last) if (now - last).num_seconds() > rules.max_heartbeat_gap_secs => {
            tracing::debug!(account_id = %account.account_id, "Watch session gap, restarting clock");
            accrual.session_started = !close;
            Some(now)
        }
        Some(last) => {
            let minutes = (now - last).num_minutes();
            accrual.minutes_credited = minutes;
            Some(last + Duration::minutes(minutes))
        }
    };

    let before = account.watch_time_minutes;
    let after = before
        .checked_add(accrual.minutes_credited)
        .ok_or_else(|| Error::Validation("watch time overflow".to_string()))?;
    let blocks = after / rules.watch_block_minutes - before / rules.watch_block_minutes;
    let points = blocks * rules.watch_points_per_block;

    account.watch_time_minutes = after;
    account.last_watch_time_update = if close { None } else { next_clock };

    if points > 0 {
        let intent = TransactionIntent::new(
            account.account_id.clone(),
            TransactionKind::WatchTime,
            points,
            0,
            format!("Watch time ({} minutes total)", after),
        );
        let applied = txn.apply(account, &intent)?;
        accrual.new_points_balance = applied.new_balance;
    } else {
        account.updated_at = txn.now();
        txn.put_account(account)?;
    }

    accrual.points_awarded = points;
    accrual.watch_time_minutes = after;
    Ok(accrual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use chrono::TimeZone;

    fn setup() -> (AccrualEngine, Arc<Ledger>, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let ledger = Arc::new(Ledger::open(config).unwrap());
        ledger.open_account(&"viewer".into(), "Viewer").unwrap();
        (AccrualEngine::new(ledger.clone()), ledger, temp_dir)
    }

    fn at(day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, minute, second).unwrap()
    }

    #[test]
    fn test_reward_formula_caps() {
        let rules = AccrualConfig::default();
        assert_eq!(CheckinRewards::for_streak(&rules, 1).xp, 25);
        assert_eq!(CheckinRewards::for_streak(&rules, 2).points, 12);
        let capped = CheckinRewards::for_streak(&rules, 11);
        assert_eq!((capped.xp, capped.points), (75, 30));
        assert_eq!(CheckinRewards::for_streak(&rules, 500), capped);
        assert_eq!(CheckinRewards::for_streak(&rules, 0).bonus_xp, 0);
    }

    #[test]
    fn test_three_day_streak() {
        let (engine, ledger, _temp) = setup();
        let id: AccountId = "viewer".into();

        let expected = [(1, 25, 10), (2, 30, 12), (3, 35, 14)];
        for (offset, (streak, xp, points)) in expected.into_iter().enumerate() {
            let outcome = engine.check_in_at(&id, at(10 + offset as u32, 12, 0, 0)).unwrap();
            assert!(!outcome.already_checked_in());
            let receipt = outcome.receipt();
            assert_eq!(receipt.current_streak, streak);
            assert_eq!((receipt.rewards.xp, receipt.rewards.points), (xp, points));
        }

        let account = ledger.account(&id).unwrap();
        assert_eq!(account.xp_total, 90);
        assert_eq!(account.points_balance, 36);
        assert_eq!(account.total_checkins, 3);
    }

    #[test]
    fn test_second_checkin_same_day() {
        let (engine, ledger, _temp) = setup();
        let id: AccountId = "viewer".into();

        engine.check_in_at(&id, at(10, 0, 0, 1)).unwrap();
        let again = engine.check_in_at(&id, at(10, 23, 59, 59)).unwrap();
        assert!(again.already_checked_in());
        assert_eq!(again.receipt().rewards.points, 10);
        assert_eq!(again.receipt().new_points_balance, 10);

        let rows = ledger.recent_transactions(&id, 10).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_checkin_with_earlier_day_keeps_latest_date() {
        let (engine, ledger, _temp) = setup();
        let id: AccountId = "viewer".into();

        engine.check_in_at(&id, at(10, 12, 0, 0)).unwrap();
        engine.check_in_at(&id, at(11, 12, 0, 0)).unwrap();

        let skewed = engine.check_in_at(&id, at(10, 23, 0, 0)).unwrap();
        assert!(skewed.already_checked_in());
        assert_eq!(skewed.receipt().current_streak, 2);

        let status = engine.checkin_status_at(&id, at(10, 23, 0, 0)).unwrap();
        assert!(status.already_checked_in && !status.can_checkin);

        let account = ledger.account(&id).unwrap();
        assert_eq!(account.last_checkin_date, Some(at(11, 0, 0, 0).date_naive()));
        assert_eq!(account.total_checkins, 2);
        assert_eq!(ledger.recent_transactions(&id, 10).unwrap().len(), 2);
    }

    #[test]
    fn test_missed_day_resets_streak() {
        let (engine, _ledger, _temp) = setup();
        let id: AccountId = "viewer".into();

        engine.check_in_at(&id, at(10, 12, 0, 0)).unwrap();
        engine.check_in_at(&id, at(11, 12, 0, 0)).unwrap();
        let status = engine.checkin_status_at(&id, at(13, 8, 0, 0)).unwrap();
        assert!(status.can_checkin);
        assert_eq!(status.current_streak, 0);
        assert_eq!(status.today_rewards.points, 10);

        let outcome = engine.check_in_at(&id, at(13, 8, 0, 0)).unwrap();
        assert_eq!(outcome.receipt().current_streak, 1);
    }

    #[test]
    fn test_status_after_checkin() {
        let (engine, _ledger, _temp) = setup();
        let id: AccountId = "viewer".into();

        let before = engine.checkin_status_at(&id, at(10, 9, 0, 0)).unwrap();
        assert!(before.can_checkin && !before.already_checked_in);
        assert_eq!(before.today_rewards.xp, 25);

        engine.check_in_at(&id, at(10, 9, 0, 0)).unwrap();
        let after = engine.checkin_status_at(&id, at(10, 21, 0, 0)).unwrap();
        assert!(after.already_checked_in && !after.can_checkin);
        assert_eq!(after.current_streak, 1);
        assert_eq!(after.total_checkins, 1);

        let tomorrow = engine.checkin_status_at(&id, at(11, 1, 0, 0)).unwrap();
        assert_eq!(tomorrow.current_streak, 1);
        assert_eq!(tomorrow.today_rewards.xp, 30);
    }

    #[test]
    fn test_watch_time_blocks() {
        let (engine, ledger, _temp) = setup();
        let id: AccountId = "viewer".into();

        let first = engine.record_watch_heartbeat_at(&id, at(10, 20, 0, 0)).unwrap();
        assert!(first.session_started);
        assert_eq!(first.minutes_credited, 0);

        // Heartbeats every five minutes for an hour and a half
        let mut points = 0;
        for step in 1..=18 {
            let minute = step * 5;
            let now = at(10, 20 + minute / 60, minute % 60, 0);
            points += engine.record_watch_heartbeat_at(&id, now).unwrap().points_awarded;
        }
        assert_eq!(points, 5);

        let account = ledger.account(&id).unwrap();
        assert_eq!(account.watch_time_minutes, 90);
        assert_eq!(account.points_balance, 5);
    }

    #[test]
    fn test_repeated_heartbeat_does_not_double_count() {
        let (engine, ledger, _temp) = setup();
        let id: AccountId = "viewer".into();

        engine.record_watch_heartbeat_at(&id, at(10, 20, 0, 0)).unwrap();
        let a = engine.record_watch_heartbeat_at(&id, at(10, 20, 4, 30)).unwrap();
        let b = engine.record_watch_heartbeat_at(&id, at(10, 20, 4, 30)).unwrap();
        let c = engine.record_watch_heartbeat_at(&id, at(10, 20, 5, 0)).unwrap();
        assert_eq!(a.minutes_credited, 4);
        assert_eq!(b.minutes_credited, 0);
        // Remainder carried over from the first call
        assert_eq!(c.minutes_credited, 1);
        assert_eq!(ledger.account(&id).unwrap().watch_time_minutes, 5);
    }

    #[test]
    fn test_hourly_heartbeat_earns_block() {
        let (engine, ledger, _temp) = setup();
        let id: AccountId = "viewer".into();

        engine.record_watch_heartbeat_at(&id, at(10, 20, 0, 0)).unwrap();
        let hour = engine.record_watch_heartbeat_at(&id, at(10, 21, 0, 0)).unwrap();
        assert!(!hour.session_started);
        assert_eq!(hour.minutes_credited, 60);
        assert_eq!(hour.points_awarded, 5);
        assert_eq!(ledger.account(&id).unwrap().points_balance, 5);
    }

    #[test]
    fn test_long_gap_restarts_session() {
        let (engine, ledger, _temp) = setup();
        let id: AccountId = "viewer".into();

        engine.record_watch_heartbeat_at(&id, at(10, 20, 0, 0)).unwrap();
        let after_gap = engine.record_watch_heartbeat_at(&id, at(10, 22, 0, 0)).unwrap();
        assert!(after_gap.session_started);
        assert_eq!(after_gap.minutes_credited, 0);

        let ended = engine.end_watch_session_at(&id, at(10, 22, 7, 0)).unwrap();
        assert_eq!(ended.minutes_credited, 7);
        let account = ledger.account(&id).unwrap();
        assert_eq!(account.last_watch_time_update, None);
        assert_eq!(account.watch_time_minutes, 7);
    }

    #[test]
    fn test_chat_credit_once_per_message() {
        let (engine, ledger, _temp) = setup();
        let id: AccountId = "viewer".into();

        engine.credit_chat_message(&id, "msg-1").unwrap();
        engine.credit_chat_message(&id, "msg-2").unwrap();
        assert!(matches!(
            engine.credit_chat_message(&id, "msg-1"),
            Err(Error::AlreadyApplied(_))
        ));
        assert!(matches!(
            engine.credit_chat_message(&id, "  "),
            Err(Error::Validation(_))
        ));
        assert_eq!(ledger.account(&id).unwrap().points_balance, 2);
    }

    #[test]
    fn test_chat_guard_retention() {
        let (engine, ledger, _temp) = setup();
        let id: AccountId = "viewer".into();

        engine.credit_chat_message(&id, "msg-1").unwrap();
        assert_eq!(engine.prune_chat_guards_at(Utc::now()).unwrap(), 0);
        assert!(engine.credit_chat_message(&id, "msg-1").is_err());

        let later = Utc::now() + Duration::hours(73);
        assert_eq!(engine.prune_chat_guards_at(later).unwrap(), 1);
        engine.credit_chat_message(&id, "msg-1").unwrap();
        assert_eq!(ledger.account(&id).unwrap().points_balance, 2);
    }
}
