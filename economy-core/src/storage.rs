//! Storage layer using RocksDB
//!
//! Every mutation runs inside a pessimistic RocksDB transaction: rows are
//! read with `get_for_update`, which takes an exclusive lock held until
//! commit. Two writers touching the same account (or guard key) are therefore
//! serialized by the store itself, whichever process or thread they run on.
//!
//! # Column Families
//!
//! - `accounts` - Account snapshots (key: account_id)
//! - `transactions` - Append-only ledger rows (key: tx_id)
//! - `indices` - Secondary indices (account log order, referral tokens, referrals)
//! - `guards` - Idempotency keys claimed by guarded operations
//! - `donations` - Donation records (key: donation_id)

use crate::{
    error::{Error, Result},
    types::{Account, AccountId, DonationRecord, Guard, ReferralEntry, Transaction},
    Config,
};
use chrono::{DateTime, Utc};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, TransactionDB,
    TransactionDBOptions, TransactionOptions, WriteOptions,
};
use std::fmt;
use uuid::Uuid;

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_TRANSACTIONS: &str = "transactions";
const CF_INDICES: &str = "indices";
const CF_GUARDS: &str = "guards";
const CF_DONATIONS: &str = "donations";

/// Index key prefixes
const IDX_ACCOUNT_LOG: &[u8] = b"log\0";
const IDX_REFERRAL_TOKEN: &[u8] = b"token\0";
const IDX_REFERRALS: &[u8] = b"referrals\0";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: TransactionDB,
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        // Database options
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let mut txn_db_opts = TransactionDBOptions::default();
        txn_db_opts.set_txn_lock_timeout(config.rocksdb.lock_timeout_ms);

        // Column family descriptors
        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_GUARDS, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_DONATIONS, Self::cf_options_log()),
        ];

        let db = TransactionDB::open_cf_descriptors(&db_opts, &txn_db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB transaction store");

        Ok(Self { db })
    }

    // Column family options

    fn cf_options_hot() -> Options {
        let mut opts = Options::default();
        // Snapshots are read on every request, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_log() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    // Helper: get column family handle

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    /// Start a pessimistic transaction
    pub fn begin(&self) -> StoreTxn<'_> {
        let mut txn_opts = TransactionOptions::default();
        txn_opts.set_deadlock_detect(true);

        StoreTxn {
            txn: self.db.transaction_opt(&WriteOptions::default(), &txn_opts),
            storage: self,
        }
    }

    // Committed reads

    /// Get account snapshot
    pub fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        match self.db.get_cf(cf, account_id.as_str().as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Get ledger row by ID
    pub fn get_transaction(&self, tx_id: Uuid) -> Result<Option<Transaction>> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        match self.db.get_cf(cf, tx_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Ledger rows of one account in log order, starting at `from_sequence`
    pub fn account_transactions(
        &self,
        account_id: &AccountId,
        from_sequence: u64,
        limit: usize,
    ) -> Result<Vec<Transaction>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let prefix = Self::index_key_account_log(account_id, None);
        let start = Self::index_key_account_log(account_id, Some(from_sequence));

        let iter = self
            .db
            .iterator_cf(cf_indices, IteratorMode::From(&start, Direction::Forward));

        let mut transactions = Vec::new();
        for item in iter {
            if transactions.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }

            let tx_id = Uuid::from_slice(&value)
                .map_err(|e| Error::Storage(format!("Corrupt log index entry: {}", e)))?;
            let tx = self.get_transaction(tx_id)?.ok_or_else(|| {
                Error::InvariantViolation(format!("Indexed transaction {} missing", tx_id))
            })?;
            transactions.push(tx);
        }

        Ok(transactions)
    }

    /// Account owning a referral token
    pub fn referral_token_owner(&self, token: &str) -> Result<Option<AccountId>> {
        let cf = self.cf_handle(CF_INDICES)?;
        match self.db.get_cf(cf, Self::index_key_referral_token(token))? {
            Some(value) => Ok(Some(Self::decode_account_id(&value)?)),
            None => Ok(None),
        }
    }

    /// Referrals made by `referrer`, newest first
    pub fn referrals(&self, referrer: &AccountId, limit: usize) -> Result<Vec<ReferralEntry>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let prefix = Self::index_key_referral(referrer, None);
        let mut end = prefix.clone();
        end.extend_from_slice(&u32::MAX.to_be_bytes());

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&end, Direction::Reverse));

        let mut entries = Vec::new();
        for item in iter {
            if entries.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            entries.push(bincode::deserialize(&value)?);
        }

        Ok(entries)
    }

    /// Delete guard keys starting with `prefix` that were claimed before
    /// `cutoff`. Returns how many were removed.
    pub fn prune_guards(&self, prefix: &[u8], cutoff: DateTime<Utc>) -> Result<usize> {
        let cf = self.cf_handle(CF_GUARDS)?;
        let cutoff = cutoff.timestamp_nanos_opt().unwrap_or(i64::MIN);

        let mut stale = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            let stamp: [u8; 8] = value
                .as_ref()
                .try_into()
                .map_err(|_| Error::Storage("Corrupt guard stamp".to_string()))?;
            if i64::from_be_bytes(stamp) < cutoff {
                stale.push(key);
            }
        }

        for key in &stale {
            self.db.delete_cf(cf, key)?;
        }
        Ok(stale.len())
    }

    /// Write a donation record outside any ledger transaction
    pub fn put_donation(&self, record: &DonationRecord) -> Result<()> {
        let cf = self.cf_handle(CF_DONATIONS)?;
        self.db
            .put_cf(cf, record.donation_id.as_bytes(), bincode::serialize(record)?)?;

        tracing::debug!(donation_id = %record.donation_id, "Donation record stored");
        Ok(())
    }

    /// Get donation record
    pub fn get_donation(&self, donation_id: Uuid) -> Result<Option<DonationRecord>> {
        let cf = self.cf_handle(CF_DONATIONS)?;
        match self.db.get_cf(cf, donation_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    // Index key helpers

    fn index_key_account_log(account_id: &AccountId, sequence: Option<u64>) -> Vec<u8> {
        let mut key = IDX_ACCOUNT_LOG.to_vec();
        key.extend_from_slice(account_id.as_str().as_bytes());
        key.push(0); // Separator; ids never contain control characters
        if let Some(seq) = sequence {
            key.extend_from_slice(&seq.to_be_bytes());
        }
        key
    }

    fn index_key_referral_token(token: &str) -> Vec<u8> {
        let mut key = IDX_REFERRAL_TOKEN.to_vec();
        key.extend_from_slice(token.as_bytes());
        key
    }

    fn index_key_referral(referrer: &AccountId, sequence: Option<u32>) -> Vec<u8> {
        let mut key = IDX_REFERRALS.to_vec();
        key.extend_from_slice(referrer.as_str().as_bytes());
        key.push(0);
        if let Some(seq) = sequence {
            key.extend_from_slice(&seq.to_be_bytes());
        }
        key
    }

    fn decode_account_id(bytes: &[u8]) -> Result<AccountId> {
        String::from_utf8(bytes.to_vec())
            .map(AccountId::new)
            .map_err(|e| Error::Storage(format!("Corrupt account id: {}", e)))
    }
}

/// Open store transaction. Dropping it without `commit` rolls everything back.
pub struct StoreTxn<'a> {
    txn: rocksdb::Transaction<'a, TransactionDB>,
    storage: &'a Storage,
}

impl fmt::Debug for StoreTxn<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreTxn").finish_non_exhaustive()
    }
}

impl<'a> StoreTxn<'a> {
    /// Read an account and lock it until commit
    pub fn account_for_update(&self, account_id: &AccountId) -> Result<Option<Account>> {
        let cf = self.storage.cf_handle(CF_ACCOUNTS)?;
        match self
            .txn
            .get_for_update_cf(cf, account_id.as_str().as_bytes(), true)?
        {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Stage an account snapshot
    pub fn put_account(&self, account: &Account) -> Result<()> {
        let cf = self.storage.cf_handle(CF_ACCOUNTS)?;
        self.txn.put_cf(
            cf,
            account.account_id.as_str().as_bytes(),
            bincode::serialize(account)?,
        )?;
        Ok(())
    }

    /// Stage a ledger row and its log index entry
    pub fn append_transaction(&self, tx: &Transaction) -> Result<()> {
        let cf_transactions = self.storage.cf_handle(CF_TRANSACTIONS)?;
        self.txn
            .put_cf(cf_transactions, tx.tx_id.as_bytes(), bincode::serialize(tx)?)?;

        let cf_indices = self.storage.cf_handle(CF_INDICES)?;
        let idx = Storage::index_key_account_log(&tx.account_id, Some(tx.sequence));
        self.txn.put_cf(cf_indices, idx, tx.tx_id.as_bytes())?;

        Ok(())
    }

    /// Claim a uniqueness key; fails with `AlreadyApplied` if it exists.
    ///
    /// The key is locked even when absent, so two racing claimants are
    /// serialized and the loser sees the winner's key after it commits.
    pub fn claim_guard(&self, guard: &Guard, now: DateTime<Utc>) -> Result<()> {
        let cf = self.storage.cf_handle(CF_GUARDS)?;
        let key = guard.key();

        if self.txn.get_for_update_cf(cf, &key, true)?.is_some() {
            return Err(Error::AlreadyApplied(guard.to_string()));
        }

        let stamp = now.timestamp_nanos_opt().unwrap_or(0);
        self.txn.put_cf(cf, &key, stamp.to_be_bytes())?;
        Ok(())
    }

    /// Stage a donation record
    pub fn put_donation(&self, record: &DonationRecord) -> Result<()> {
        let cf = self.storage.cf_handle(CF_DONATIONS)?;
        self.txn
            .put_cf(cf, record.donation_id.as_bytes(), bincode::serialize(record)?)?;
        Ok(())
    }

    /// Resolve a referral token, locking the index entry
    pub fn referral_token_owner_for_update(&self, token: &str) -> Result<Option<AccountId>> {
        let cf = self.storage.cf_handle(CF_INDICES)?;
        match self
            .txn
            .get_for_update_cf(cf, Storage::index_key_referral_token(token), true)?
        {
            Some(value) => Ok(Some(Storage::decode_account_id(&value)?)),
            None => Ok(None),
        }
    }

    /// Stage a referral token index entry
    pub fn put_referral_token(&self, token: &str, owner: &AccountId) -> Result<()> {
        let cf = self.storage.cf_handle(CF_INDICES)?;
        self.txn.put_cf(
            cf,
            Storage::index_key_referral_token(token),
            owner.as_str().as_bytes(),
        )?;
        Ok(())
    }

    /// Stage a referral entry under the referrer
    pub fn append_referral(
        &self,
        referrer: &AccountId,
        sequence: u32,
        entry: &ReferralEntry,
    ) -> Result<()> {
        let cf = self.storage.cf_handle(CF_INDICES)?;
        self.txn.put_cf(
            cf,
            Storage::index_key_referral(referrer, Some(sequence)),
            bincode::serialize(entry)?,
        )?;
        Ok(())
    }

    /// Committed log rows of an account. Only consistent while the account is locked.
    pub fn account_transactions(
        &self,
        account_id: &AccountId,
        from_sequence: u64,
        limit: usize,
    ) -> Result<Vec<Transaction>> {
        self.storage
            .account_transactions(account_id, from_sequence, limit)
    }

    /// Commit all staged writes atomically
    pub fn commit(self) -> Result<()> {
        self.txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DonationFunding, DonationStatus, TransactionKind};
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn test_account(id: &str) -> Account {
        Account::new(id.into(), id, format!("TOKEN{}", id.to_uppercase()), Utc::now())
    }

    fn test_transaction(account_id: &AccountId, sequence: u64) -> Transaction {
        Transaction {
            tx_id: Uuid::now_v7(),
            account_id: account_id.clone(),
            sequence,
            kind: TransactionKind::ChatActivity,
            points_delta: 1,
            xp_delta: 0,
            description: "chat".to_string(),
            actor: None,
            created_at: Utc::now(),
            prev_hash: [0u8; 32],
            hash: [0u8; 32],
            signature: None,
        }
    }

    #[test]
    fn test_storage_open() {
        let (storage, _temp) = test_storage();
        assert!(storage.db.cf_handle(CF_ACCOUNTS).is_some());
        assert!(storage.db.cf_handle(CF_GUARDS).is_some());
    }

    #[test]
    fn test_commit_makes_writes_visible() {
        let (storage, _temp) = test_storage();
        let account = test_account("alice");

        let txn = storage.begin();
        txn.put_account(&account).unwrap();
        assert!(storage.get_account(&account.account_id).unwrap().is_none());
        txn.commit().unwrap();

        let stored = storage.get_account(&account.account_id).unwrap().unwrap();
        assert_eq!(stored, account);
    }

    #[test]
    fn test_drop_rolls_back() {
        let (storage, _temp) = test_storage();
        let account = test_account("bob");

        {
            let txn = storage.begin();
            txn.put_account(&account).unwrap();
            txn.append_transaction(&test_transaction(&account.account_id, 0))
                .unwrap();
        }

        assert!(storage.get_account(&account.account_id).unwrap().is_none());
        assert!(storage
            .account_transactions(&account.account_id, 0, 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_log_order_and_prefix_isolation() {
        let (storage, _temp) = test_storage();
        let alice: AccountId = "alice".into();
        let alicia: AccountId = "alice2".into();

        let txn = storage.begin();
        for seq in 0..3 {
            txn.append_transaction(&test_transaction(&alice, seq)).unwrap();
        }
        txn.append_transaction(&test_transaction(&alicia, 0)).unwrap();
        txn.commit().unwrap();

        let log = storage.account_transactions(&alice, 0, 10).unwrap();
        assert_eq!(log.iter().map(|t| t.sequence).collect::<Vec<_>>(), vec![0, 1, 2]);

        let tail = storage.account_transactions(&alice, 2, 10).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].sequence, 2);
    }

    #[test]
    fn test_guard_claimed_once() {
        let (storage, _temp) = test_storage();
        let guard = Guard::ReferralBonus { referee: "carol".into() };

        let txn = storage.begin();
        txn.claim_guard(&guard, Utc::now()).unwrap();
        txn.commit().unwrap();

        let txn = storage.begin();
        let err = txn.claim_guard(&guard, Utc::now()).unwrap_err();
        assert!(matches!(err, Error::AlreadyApplied(_)));
    }

    #[test]
    fn test_prune_guards_by_prefix_and_age() {
        let (storage, _temp) = test_storage();
        let now = Utc::now();
        let old_chat = Guard::ChatMessage { message_id: "m-1".to_string() };
        let new_chat = Guard::ChatMessage { message_id: "m-2".to_string() };
        let referral = Guard::ReferralBonus { referee: "frank".into() };

        let txn = storage.begin();
        txn.claim_guard(&old_chat, now - chrono::Duration::days(5)).unwrap();
        txn.claim_guard(&referral, now - chrono::Duration::days(5)).unwrap();
        txn.claim_guard(&new_chat, now).unwrap();
        txn.commit().unwrap();

        let cutoff = now - chrono::Duration::days(3);
        assert_eq!(storage.prune_guards(Guard::CHAT_KEY_PREFIX, cutoff).unwrap(), 1);

        let txn = storage.begin();
        txn.claim_guard(&old_chat, now).unwrap();
        assert!(matches!(
            txn.claim_guard(&new_chat, now),
            Err(Error::AlreadyApplied(_))
        ));
        assert!(matches!(
            txn.claim_guard(&referral, now),
            Err(Error::AlreadyApplied(_))
        ));
    }

    #[test]
    fn test_staged_donation_needs_commit() {
        let (storage, _temp) = test_storage();
        let record = DonationRecord {
            donation_id: Uuid::new_v4(),
            account_id: None,
            donor_name: "Gus".to_string(),
            donor_email: None,
            amount: Decimal::new(500, 2),
            points_cost: None,
            message: None,
            is_anonymous: true,
            status: DonationStatus::Completed,
            funding: DonationFunding::Payment,
            tx_id: None,
            created_at: Utc::now(),
        };

        let txn = storage.begin();
        txn.put_donation(&record).unwrap();
        drop(txn);
        assert_eq!(storage.get_donation(record.donation_id).unwrap(), None);

        let txn = storage.begin();
        txn.put_donation(&record).unwrap();
        txn.commit().unwrap();
        assert_eq!(storage.get_donation(record.donation_id).unwrap(), Some(record));
    }

    #[test]
    fn test_referrals_newest_first() {
        let (storage, _temp) = test_storage();
        let referrer: AccountId = "dave".into();

        let txn = storage.begin();
        for seq in 0..3u32 {
            let entry = ReferralEntry {
                referee: format!("referee-{}", seq).as_str().into(),
                referee_name: format!("Referee {}", seq),
                points: 20,
                claimed_at: Utc::now(),
            };
            txn.append_referral(&referrer, seq, &entry).unwrap();
        }
        txn.commit().unwrap();

        let entries = storage.referrals(&referrer, 2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].referee.as_str(), "referee-2");
        assert_eq!(entries[1].referee.as_str(), "referee-1");
    }

    #[test]
    fn test_donation_roundtrip() {
        let (storage, _temp) = test_storage();
        let record = DonationRecord {
            donation_id: Uuid::new_v4(),
            account_id: Some("erin".into()),
            donor_name: "Erin".to_string(),
            donor_email: None,
            amount: Decimal::new(250, 2),
            points_cost: Some(250),
            message: Some("gg".to_string()),
            is_anonymous: false,
            status: DonationStatus::Completed,
            funding: DonationFunding::Points,
            tx_id: None,
            created_at: Utc::now(),
        };

        storage.put_donation(&record).unwrap();
        assert_eq!(storage.get_donation(record.donation_id).unwrap(), Some(record));
    }
}
