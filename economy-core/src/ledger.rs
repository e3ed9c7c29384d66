//! Main ledger orchestration layer
//!
//! This module ties together storage, crypto, leveling and metrics into the
//! ledger contract every engine goes through.
//!
//! # Example
//!
//! ```no_run
//! use economy_core::{Config, Ledger, TransactionIntent, TransactionKind};
//!
//! fn main() -> economy_core::Result<()> {
//!     let ledger = Ledger::open(Config::default())?;
//!     let account = ledger.open_account(&"viewer-1".into(), "Viewer One")?;
//!
//!     let applied = ledger.apply(&TransactionIntent::new(
//!         account.account_id,
//!         TransactionKind::ChatActivity,
//!         1,
//!         0,
//!         "chat message",
//!     ))?;
//!     assert_eq!(applied.new_balance, 1);
//!     Ok(())
//! }
//! ```

use crate::{
    crypto::{generate_referral_token, KeyPair},
    leveling::LevelTable,
    metrics::Metrics,
    storage::StoreTxn,
    types::{
        Account, AccountId, DonationRecord, Guard, ReferralEntry, SupporterStatus, Transaction,
        TransactionIntent,
    },
    Config, Error, Result, Storage,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use uuid::Uuid;

/// Attempts at drawing an unused referral token before giving up
const TOKEN_ATTEMPTS: usize = 8;

/// Page size when replaying an account log
const AUDIT_PAGE: usize = 512;

/// Result of a committed mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// Points balance after the row
    pub new_balance: i64,
    /// XP total after the row
    pub new_xp_total: i64,
    /// Level before the row
    pub previous_level: u32,
    /// Level after the row
    pub new_level: u32,
    /// The committed row
    pub transaction: Transaction,
}

impl Applied {
    /// Whether the row moved the account to a new level
    pub fn leveled_up(&self) -> bool {
        self.new_level != self.previous_level
    }
}

/// Outcome of replaying an account's log against its snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountAudit {
    /// Audited account
    pub account_id: AccountId,
    /// Rows replayed
    pub transactions: u64,
    /// Σ points_delta
    pub points_balance: i64,
    /// Σ positive points_delta
    pub points_earned_total: i64,
    /// Σ xp_delta
    pub xp_total: i64,
    /// `level_for(xp_total)`
    pub user_level: u32,
    /// Hex of the last row hash
    pub head_hash: String,
    /// Whether row signatures were checked
    pub signatures_verified: bool,
}

/// Main ledger interface
#[derive(Debug)]
pub struct Ledger {
    storage: Storage,
    levels: LevelTable,
    keypair: Option<KeyPair>,
    metrics: Metrics,
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let levels = LevelTable::from_config(&config.leveling)?;
        let storage = Storage::open(&config)?;
        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to create metrics: {}", e)))?;

        Ok(Self {
            storage,
            levels,
            keypair: None,
            metrics,
            config,
        })
    }

    /// Sign every new row with this key
    pub fn with_keypair(mut self, keypair: KeyPair) -> Self {
        self.keypair = Some(keypair);
        self
    }

    /// Configuration the ledger was opened with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Level curve
    pub fn levels(&self) -> &LevelTable {
        &self.levels
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Underlying storage (committed reads)
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Create the account on first authentication; returns the existing one afterwards.
    pub fn open_account(&self, account_id: &AccountId, display_name: &str) -> Result<Account> {
        account_id.validate()?;
        if let Some(existing) = self.storage.get_account(account_id)? {
            return Ok(existing);
        }
        let token_length = self.config.referral.token_length;

        let (account, created) = self.transact(|txn| {
            if let Some(existing) = txn.inner.account_for_update(account_id)? {
                return Ok((existing, false));
            }

            let mut token = None;
            for _ in 0..TOKEN_ATTEMPTS {
                let candidate = generate_referral_token(token_length);
                if txn.inner.referral_token_owner_for_update(&candidate)?.is_none() {
                    token = Some(candidate);
                    break;
                }
            }
            let token = token.ok_or_else(|| {
                Error::StoreUnavailable("Could not allocate a unique referral token".to_string())
            })?;

            let account = Account::new(account_id.clone(), display_name, token, txn.now());
            txn.inner.put_referral_token(&account.referral_token, account_id)?;
            txn.inner.put_account(&account)?;
            Ok((account, true))
        })?;

        if created {
            self.metrics.accounts_opened.inc();
            tracing::info!(account_id = %account_id, "Account opened");
        }
        Ok(account)
    }

    /// Get account snapshot
    pub fn account(&self, account_id: &AccountId) -> Result<Account> {
        self.storage
            .get_account(account_id)?
            .ok_or_else(|| Error::AccountNotFound(account_id.clone()))
    }

    /// Apply one mutation: one row plus the updated snapshot, committed together.
    pub fn apply(&self, intent: &TransactionIntent) -> Result<Applied> {
        self.transact(|txn| {
            let mut account = txn.account(&intent.account_id)?;
            txn.apply(&mut account, intent)
        })
    }

    /// Apply one mutation at most once per guard key
    pub fn apply_guarded(&self, intent: &TransactionIntent, guard: &Guard) -> Result<Applied> {
        self.transact(|txn| {
            let mut account = txn.account(&intent.account_id)?;
            txn.claim(guard)?;
            txn.apply(&mut account, intent)
        })
    }

    /// Run `f` inside one store transaction stamped with the current time
    pub fn transact<T>(&self, f: impl FnOnce(&mut LedgerTxn<'_>) -> Result<T>) -> Result<T> {
        self.transact_at(Utc::now(), f)
    }

    /// Run `f` inside one store transaction stamped with `now`.
    ///
    /// Everything `f` stages commits atomically when it returns `Ok`; on
    /// `Err` the transaction is dropped and nothing is written.
    pub fn transact_at<T>(
        &self,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut LedgerTxn<'_>) -> Result<T>,
    ) -> Result<T> {
        let started = Instant::now();
        let mut txn = LedgerTxn {
            inner: self.storage.begin(),
            ledger: self,
            now,
            applied: Vec::new(),
        };

        let value = match f(&mut txn) {
            Ok(value) => value,
            Err(err) => {
                self.metrics.record_rejection(&err);
                return Err(err);
            }
        };

        let LedgerTxn { inner, applied, .. } = txn;
        if let Err(err) = inner.commit() {
            self.metrics.record_rejection(&err);
            tracing::warn!(error = %err, "Ledger commit failed");
            return Err(err);
        }

        for tx in &applied {
            self.metrics.record_transaction(tx.kind);
            tracing::debug!(
                account_id = %tx.account_id,
                tx_id = %tx.tx_id,
                kind = %tx.kind,
                points_delta = tx.points_delta,
                xp_delta = tx.xp_delta,
                "Transaction committed"
            );
        }
        self.metrics
            .record_apply_duration(started.elapsed().as_secs_f64());

        Ok(value)
    }

    /// Most recent rows of an account, newest first
    pub fn recent_transactions(&self, account_id: &AccountId, limit: usize) -> Result<Vec<Transaction>> {
        let account = self.account(account_id)?;
        let from = account.tx_count.saturating_sub(limit as u64);
        let mut rows = self.storage.account_transactions(account_id, from, limit)?;
        rows.reverse();
        Ok(rows)
    }

    /// Referrals made by an account, newest first
    pub fn referrals(&self, referrer: &AccountId, limit: usize) -> Result<Vec<ReferralEntry>> {
        self.storage.referrals(referrer, limit)
    }

    /// Mirror collaborator-owned supporter facts onto the snapshot
    pub fn set_supporter_status(&self, account_id: &AccountId, status: SupporterStatus) -> Result<Account> {
        self.transact(|txn| {
            let mut account = txn.account(account_id)?;
            account.is_subscriber = status.is_subscriber;
            account.is_lifetime_donor = status.is_lifetime_donor;
            account.updated_at = txn.now();
            txn.put_account(&account)?;
            Ok(account)
        })
    }

    /// Store a donation record
    pub fn record_donation(&self, record: &DonationRecord) -> Result<()> {
        self.storage.put_donation(record)
    }

    /// Get donation record
    pub fn donation(&self, donation_id: Uuid) -> Result<Option<DonationRecord>> {
        self.storage.get_donation(donation_id)
    }

    /// Replay an account's log and check it against the snapshot.
    ///
    /// The account row is locked for the duration, so no writer can append
    /// while the replay runs. Any mismatch is an `InvariantViolation`.
    pub fn verify_account(&self, account_id: &AccountId) -> Result<AccountAudit> {
        let txn = self.storage.begin();
        let account = txn
            .account_for_update(account_id)?
            .ok_or_else(|| Error::AccountNotFound(account_id.clone()))?;

        let mut points = 0i64;
        let mut earned = 0i64;
        let mut xp = 0i64;
        let mut count = 0u64;
        let mut prev_hash = [0u8; 32];

        loop {
            let page = txn.account_transactions(account_id, count, AUDIT_PAGE)?;
            if page.is_empty() {
                break;
            }
            for tx in &page {
                if tx.sequence != count {
                    return Err(violation(account_id, format!(
                        "expected sequence {}, found {}",
                        count, tx.sequence
                    )));
                }
                if tx.prev_hash != prev_hash {
                    return Err(violation(account_id, format!(
                        "row {} does not link to its predecessor",
                        tx.sequence
                    )));
                }
                if tx.compute_hash()? != tx.hash {
                    return Err(violation(account_id, format!(
                        "row {} hash does not match its contents",
                        tx.sequence
                    )));
                }
                if let Some(ref keypair) = self.keypair {
                    let signature = tx.signature.as_deref().ok_or_else(|| {
                        violation(account_id, format!("row {} is unsigned", tx.sequence))
                    })?;
                    keypair.verify(&tx.hash, signature)?;
                }

                points += tx.points_delta;
                earned += tx.points_delta.max(0);
                xp += tx.xp_delta;
                prev_hash = tx.hash;
                count += 1;
            }
        }

        let level = self.levels.level_for(xp);
        let checks = [
            ("points_balance", account.points_balance, points),
            ("points_earned_total", account.points_earned_total, earned),
            ("xp_total", account.xp_total, xp),
            ("user_level", i64::from(account.user_level), i64::from(level)),
        ];
        for (field, snapshot, replayed) in checks {
            if snapshot != replayed {
                return Err(violation(account_id, format!(
                    "{} is {} but the log sums to {}",
                    field, snapshot, replayed
                )));
            }
        }
        if account.tx_count != count || account.head_hash != prev_hash {
            return Err(violation(account_id, "snapshot chain head does not match the log".to_string()));
        }

        Ok(AccountAudit {
            account_id: account_id.clone(),
            transactions: count,
            points_balance: points,
            points_earned_total: earned,
            xp_total: xp,
            user_level: level,
            head_hash: hex::encode(prev_hash),
            signatures_verified: self.keypair.is_some(),
        })
    }
}

fn violation(account_id: &AccountId, detail: String) -> Error {
    tracing::error!(account_id = %account_id, detail = %detail, "Ledger invariant violated");
    Error::InvariantViolation(format!("account {}: {}", account_id, detail))
}

/// Handle passed to `Ledger::transact` closures
pub struct LedgerTxn<'a> {
    inner: StoreTxn<'a>,
    ledger: &'a Ledger,
    now: DateTime<Utc>,
    applied: Vec<Transaction>,
}

impl std::fmt::Debug for LedgerTxn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerTxn")
            .field("now", &self.now)
            .field("applied", &self.applied.len())
            .finish_non_exhaustive()
    }
}

impl<'a> LedgerTxn<'a> {
    /// Transaction timestamp
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Ledger configuration
    pub fn config(&self) -> &Config {
        &self.ledger.config
    }

    /// Lock and read an account
    pub fn account(&self, account_id: &AccountId) -> Result<Account> {
        self.inner
            .account_for_update(account_id)?
            .ok_or_else(|| Error::AccountNotFound(account_id.clone()))
    }

    /// Lock and read two accounts in key order
    pub fn account_pair(&self, a: &AccountId, b: &AccountId) -> Result<(Account, Account)> {
        if a <= b {
            let first = self.account(a)?;
            let second = self.account(b)?;
            Ok((first, second))
        } else {
            let second = self.account(b)?;
            let first = self.account(a)?;
            Ok((first, second))
        }
    }

    /// Stage a snapshot change that carries no ledger row
    pub fn put_account(&self, account: &Account) -> Result<()> {
        self.inner.put_account(account)
    }

    /// Claim a uniqueness key (`AlreadyApplied` when taken)
    pub fn claim(&self, guard: &Guard) -> Result<()> {
        self.inner.claim_guard(guard, self.now)
    }

    /// Stage a donation record alongside the rest of the transaction
    pub fn record_donation(&self, record: &DonationRecord) -> Result<()> {
        self.inner.put_donation(record)
    }

    /// Account owning a referral token
    pub fn referral_token_owner(&self, token: &str) -> Result<Option<AccountId>> {
        self.inner.referral_token_owner_for_update(token)
    }

    /// Stage a referral index entry under `referrer`
    pub fn append_referral(&self, referrer: &AccountId, sequence: u32, entry: &ReferralEntry) -> Result<()> {
        self.inner.append_referral(referrer, sequence, entry)
    }

    /// Apply a mutation to a locked account, staging the row and the snapshot.
    ///
    /// `account` is updated in place; later snapshot edits in the same
    /// transaction must be staged again with `put_account`.
    pub fn apply(&mut self, account: &mut Account, intent: &TransactionIntent) -> Result<Applied> {
        if intent.account_id != account.account_id {
            return Err(Error::Validation(format!(
                "intent for {} applied to account {}",
                intent.account_id, account.account_id
            )));
        }
        if intent.points_delta == 0 && intent.xp_delta == 0 {
            return Err(Error::Validation("transaction changes nothing".to_string()));
        }
        if intent.xp_delta < 0 {
            return Err(Error::Validation("xp cannot decrease".to_string()));
        }

        let new_balance = account
            .points_balance
            .checked_add(intent.points_delta)
            .ok_or_else(|| Error::Validation("points balance overflow".to_string()))?;
        if intent.points_delta < 0 && new_balance < 0 {
            return Err(Error::InsufficientBalance {
                required: -intent.points_delta,
                available: account.points_balance,
            });
        }
        let new_earned = account
            .points_earned_total
            .checked_add(intent.points_delta.max(0))
            .ok_or_else(|| Error::Validation("points earned overflow".to_string()))?;
        let new_xp = account
            .xp_total
            .checked_add(intent.xp_delta)
            .ok_or_else(|| Error::Validation("xp overflow".to_string()))?;

        let mut tx = Transaction {
            tx_id: Uuid::now_v7(),
            account_id: account.account_id.clone(),
            sequence: account.tx_count,
            kind: intent.kind,
            points_delta: intent.points_delta,
            xp_delta: intent.xp_delta,
            description: intent.description.clone(),
            actor: intent.actor.clone(),
            created_at: self.now,
            prev_hash: account.head_hash,
            hash: [0u8; 32],
            signature: None,
        };
        tx.hash = tx.compute_hash()?;
        if let Some(ref keypair) = self.ledger.keypair {
            tx.signature = Some(keypair.sign(&tx.hash));
        }

        let previous_level = account.user_level;
        account.points_balance = new_balance;
        account.points_earned_total = new_earned;
        account.xp_total = new_xp;
        account.user_level = self.ledger.levels.level_for(new_xp);
        account.tx_count += 1;
        account.head_hash = tx.hash;
        account.updated_at = self.now;

        self.inner.append_transaction(&tx)?;
        self.inner.put_account(account)?;
        self.applied.push(tx.clone());

        Ok(Applied {
            new_balance,
            new_xp_total: new_xp,
            previous_level,
            new_level: account.user_level,
            transaction: tx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionKind;

    fn create_test_ledger() -> (Ledger, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Ledger::open(config).unwrap(), temp_dir)
    }

    fn intent(id: &str, kind: TransactionKind, points: i64, xp: i64) -> TransactionIntent {
        TransactionIntent::new(id.into(), kind, points, xp, kind.as_str())
    }

    #[test]
    fn test_open_account_is_idempotent() {
        let (ledger, _temp) = create_test_ledger();
        let first = ledger.open_account(&"alice".into(), "Alice").unwrap();
        let second = ledger.open_account(&"alice".into(), "Someone Else").unwrap();

        assert_eq!(first.referral_token, second.referral_token);
        assert_eq!(second.display_name, "Alice");
        assert_eq!(
            ledger.storage().referral_token_owner(&first.referral_token).unwrap(),
            Some("alice".into())
        );
        assert_eq!(ledger.metrics().accounts_opened.get(), 1);
    }

    #[test]
    fn test_apply_updates_snapshot_and_log() {
        let (ledger, _temp) = create_test_ledger();
        ledger.open_account(&"alice".into(), "Alice").unwrap();

        let applied = ledger
            .apply(&intent("alice", TransactionKind::DailyCheckin, 10, 25))
            .unwrap();
        assert_eq!(applied.new_balance, 10);
        assert_eq!(applied.new_xp_total, 25);
        assert!(!applied.leveled_up());

        let account = ledger.account(&"alice".into()).unwrap();
        assert_eq!(account.points_balance, 10);
        assert_eq!(account.points_earned_total, 10);
        assert_eq!(account.tx_count, 1);
        assert_eq!(account.head_hash, applied.transaction.hash);

        let rows = ledger.recent_transactions(&"alice".into(), 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, TransactionKind::DailyCheckin);
    }

    #[test]
    fn test_unknown_account() {
        let (ledger, _temp) = create_test_ledger();
        let err = ledger
            .apply(&intent("ghost", TransactionKind::ChatActivity, 1, 0))
            .unwrap_err();
        assert!(matches!(err, Error::AccountNotFound(_)));
    }

    #[test]
    fn test_debit_floor() {
        let (ledger, _temp) = create_test_ledger();
        ledger.open_account(&"bob".into(), "Bob").unwrap();
        ledger
            .apply(&intent("bob", TransactionKind::AdminAward, 100, 0))
            .unwrap();

        let err = ledger
            .apply(&intent("bob", TransactionKind::DonationSpend, -150, 0))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientBalance { required: 150, available: 100 }
        ));
        assert_eq!(ledger.account(&"bob".into()).unwrap().points_balance, 100);
        assert_eq!(ledger.account(&"bob".into()).unwrap().tx_count, 1);

        // Exactly to zero is allowed
        let applied = ledger
            .apply(&intent("bob", TransactionKind::DonationSpend, -100, 0))
            .unwrap();
        assert_eq!(applied.new_balance, 0);
    }

    #[test]
    fn test_rejects_empty_and_negative_xp() {
        let (ledger, _temp) = create_test_ledger();
        ledger.open_account(&"carol".into(), "Carol").unwrap();

        assert!(matches!(
            ledger.apply(&intent("carol", TransactionKind::ChatActivity, 0, 0)),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            ledger.apply(&intent("carol", TransactionKind::ChatActivity, 1, -5)),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_guarded_apply_runs_once() {
        let (ledger, _temp) = create_test_ledger();
        ledger.open_account(&"dave".into(), "Dave").unwrap();
        let guard = Guard::ChatMessage { message_id: "msg-1".to_string() };
        let chat = intent("dave", TransactionKind::ChatActivity, 1, 0);

        ledger.apply_guarded(&chat, &guard).unwrap();
        let err = ledger.apply_guarded(&chat, &guard).unwrap_err();
        assert!(matches!(err, Error::AlreadyApplied(_)));
        assert_eq!(ledger.account(&"dave".into()).unwrap().points_balance, 1);
    }

    #[test]
    fn test_failed_closure_writes_nothing() {
        let (ledger, _temp) = create_test_ledger();
        ledger.open_account(&"erin".into(), "Erin").unwrap();

        let result: Result<()> = ledger.transact(|txn| {
            let mut account = txn.account(&"erin".into())?;
            txn.apply(&mut account, &intent("erin", TransactionKind::ChatActivity, 5, 0))?;
            Err(Error::Validation("abort".to_string()))
        });
        assert!(result.is_err());

        let account = ledger.account(&"erin".into()).unwrap();
        assert_eq!(account.points_balance, 0);
        assert!(ledger.recent_transactions(&"erin".into(), 10).unwrap().is_empty());
    }

    #[test]
    fn test_level_cache_tracks_xp() {
        let (ledger, _temp) = create_test_ledger();
        ledger.open_account(&"frank".into(), "Frank").unwrap();

        let applied = ledger
            .apply(&intent("frank", TransactionKind::AdminAward, 0, 260))
            .unwrap();
        assert!(applied.leveled_up());
        assert_eq!(applied.new_level, 3);

        let account = ledger.account(&"frank".into()).unwrap();
        assert_eq!(account.user_level, ledger.levels().level_for(account.xp_total));
    }

    #[test]
    fn test_verify_account_with_signatures() {
        let (ledger, _temp) = create_test_ledger();
        let ledger = ledger.with_keypair(KeyPair::from_seed(&[9u8; 32]));
        ledger.open_account(&"gina".into(), "Gina").unwrap();

        for points in [5, 7, -3] {
            let kind = if points > 0 { TransactionKind::AdminAward } else { TransactionKind::AdminDeduct };
            ledger.apply(&intent("gina", kind, points, 0)).unwrap();
        }

        let audit = ledger.verify_account(&"gina".into()).unwrap();
        assert_eq!(audit.transactions, 3);
        assert_eq!(audit.points_balance, 9);
        assert_eq!(audit.points_earned_total, 12);
        assert!(audit.signatures_verified);
    }

    #[test]
    fn test_supporter_status_does_not_touch_balances() {
        let (ledger, _temp) = create_test_ledger();
        ledger.open_account(&"hank".into(), "Hank").unwrap();

        let account = ledger
            .set_supporter_status(
                &"hank".into(),
                SupporterStatus { is_subscriber: true, is_lifetime_donor: false },
            )
            .unwrap();
        assert!(account.is_subscriber);
        assert_eq!(account.tx_count, 0);
        assert!(ledger.verify_account(&"hank".into()).is_ok());
    }
}
