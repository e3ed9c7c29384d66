//! Spend engine: points-funded donations
//!
//! A donation is two-phase. The debit commits first and is authoritative;
//! the donation record and the public announcement follow as best-effort
//! side effects. When a side effect fails the debit stays, and the failure
//! is logged with `reconcile = true` for manual follow-up.
//!
//! Payment captures carry no debit: the record commits together with a
//! `PaymentCapture` guard key, and only the announcement follows.

use crate::{
    announce::{Announcement, AnnouncementSink},
    config::SpendConfig,
    types::{
        AccountId, DonationFunding, DonationRecord, DonationStatus, Guard, TransactionIntent,
        TransactionKind,
    },
    Error, Ledger, Result,
};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Longest donor name accepted
const MAX_DONOR_NAME_LEN: usize = 100;

/// Longest donor email accepted
const MAX_EMAIL_LEN: usize = 254;

/// Viewer request to fund a donation with Points
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationRequest {
    /// Name shown publicly unless anonymous
    pub donor_name: String,
    /// Contact email
    pub donor_email: Option<String>,
    /// Donation amount in currency units
    pub amount: Decimal,
    /// Points to debit
    pub points_cost: i64,
    /// Message read on stream
    pub message: Option<String>,
    /// Hide the donor name
    pub is_anonymous: bool,
}

/// Confirmed capture reported by the payment collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCapture {
    /// Donation id assigned at checkout
    pub donation_id: Uuid,
    /// Donating account, when the donor was signed in
    pub account_id: Option<AccountId>,
    /// Donor name
    pub donor_name: String,
    /// Contact email
    pub donor_email: Option<String>,
    /// Captured amount in currency units
    pub amount: Decimal,
    /// Message read on stream
    pub message: Option<String>,
    /// Hide the donor name
    pub is_anonymous: bool,
}

/// Result of a points-funded donation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DonationReceipt {
    /// The donation
    pub donation: DonationRecord,
    /// Balance after the debit
    pub new_points_balance: i64,
    /// Debit row
    pub transaction_id: Uuid,
    /// Donation record was stored
    pub recorded: bool,
    /// Announcement was queued
    pub announced: bool,
}

/// Spend engine
#[derive(Debug, Clone)]
pub struct SpendEngine {
    ledger: Arc<Ledger>,
    announcements: AnnouncementSink,
}

impl SpendEngine {
    /// Create engine over a shared ledger and an announcement sink
    pub fn new(ledger: Arc<Ledger>, announcements: AnnouncementSink) -> Self {
        Self {
            ledger,
            announcements,
        }
    }

    /// Debit Points for a donation, then record and announce it.
    ///
    /// Fails with `InsufficientBalance` and no effect when the account cannot
    /// cover `points_cost`.
    pub fn spend_for_donation(&self, account_id: &AccountId, request: &DonationRequest) -> Result<DonationReceipt> {
        validate_request(&self.ledger.config().spend, request)?;

        let intent = TransactionIntent::new(
            account_id.clone(),
            TransactionKind::DonationSpend,
            -request.points_cost,
            0,
            format!("Donation of {}", request.amount),
        );
        let applied = self.ledger.apply(&intent)?;
        let tx_id = applied.transaction.tx_id;

        let donation = DonationRecord {
            donation_id: Uuid::new_v4(),
            account_id: Some(account_id.clone()),
            donor_name: request.donor_name.trim().to_string(),
            donor_email: request.donor_email.clone(),
            amount: request.amount,
            points_cost: Some(request.points_cost),
            message: request.message.clone(),
            is_anonymous: request.is_anonymous,
            status: DonationStatus::Completed,
            funding: DonationFunding::Points,
            tx_id: Some(tx_id),
            created_at: applied.transaction.created_at,
        };

        let recorded = match self.ledger.record_donation(&donation) {
            Ok(()) => true,
            Err(e) => {
                self.ledger.metrics().reconciliation_backlog.inc();
                tracing::error!(
                    reconcile = true,
                    account_id = %account_id,
                    tx_id = %tx_id,
                    donation_id = %donation.donation_id,
                    error = %e,
                    "Donation debit committed but record was not stored"
                );
                false
            }
        };

        let announced = self.announce(&donation);

        tracing::info!(
            account_id = %account_id,
            donation_id = %donation.donation_id,
            points_cost = request.points_cost,
            amount = %request.amount,
            "Points donation completed"
        );

        Ok(DonationReceipt {
            donation,
            new_points_balance: applied.new_balance,
            transaction_id: tx_id,
            recorded,
            announced,
        })
    }

    /// Record a money donation whose capture already succeeded.
    ///
    /// The guard claim, the lifetime donor flag and the record commit in one
    /// transaction; the announcement follows the commit. Replaying the same
    /// `donation_id` returns the stored record without announcing twice.
    pub fn record_payment_donation(&self, capture: &PaymentCapture) -> Result<DonationRecord> {
        if capture.amount <= Decimal::ZERO {
            return Err(Error::Validation("amount must be positive".to_string()));
        }
        validate_donor(
            &self.ledger.config().spend,
            &capture.donor_name,
            capture.donor_email.as_deref(),
            capture.message.as_deref(),
            capture.is_anonymous,
        )?;

        let donation = DonationRecord {
            donation_id: capture.donation_id,
            account_id: capture.account_id.clone(),
            donor_name: capture.donor_name.trim().to_string(),
            donor_email: capture.donor_email.clone(),
            amount: capture.amount,
            points_cost: None,
            message: capture.message.clone(),
            is_anonymous: capture.is_anonymous,
            status: DonationStatus::Completed,
            funding: DonationFunding::Payment,
            tx_id: None,
            created_at: Utc::now(),
        };

        let committed = self.ledger.transact(|txn| {
            txn.claim(&Guard::PaymentCapture {
                donation_id: capture.donation_id,
            })?;
            if let Some(ref account_id) = capture.account_id {
                let mut account = txn.account(account_id)?;
                if !account.is_lifetime_donor {
                    account.is_lifetime_donor = true;
                    account.updated_at = txn.now();
                    txn.put_account(&account)?;
                }
            }
            txn.record_donation(&donation)
        });

        match committed {
            Ok(()) => {}
            Err(Error::AlreadyApplied(_)) => {
                tracing::debug!(donation_id = %capture.donation_id, "Payment capture already recorded");
                return self.ledger.donation(capture.donation_id)?.ok_or_else(|| {
                    Error::InvariantViolation(format!(
                        "Payment capture {} claimed without a record",
                        capture.donation_id
                    ))
                });
            }
            Err(e) => return Err(e),
        }
        self.announce(&donation);

        tracing::info!(
            donation_id = %donation.donation_id,
            amount = %donation.amount,
            "Payment donation recorded"
        );
        Ok(donation)
    }

    fn announce(&self, donation: &DonationRecord) -> bool {
        let announcement = Announcement {
            donation_id: donation.donation_id,
            donor_name: donation.public_name().to_string(),
            amount: donation.amount,
            message: donation.message.clone(),
            created_at: donation.created_at,
        };

        match self.announcements.announce(announcement) {
            Ok(()) => true,
            Err(e) => {
                self.ledger.metrics().reconciliation_backlog.inc();
                tracing::error!(
                    reconcile = true,
                    donation_id = %donation.donation_id,
                    error = %e,
                    "Donation announcement was not queued"
                );
                false
            }
        }
    }
}

/// Smallest Points cost accepted for `amount`
pub fn minimum_points_cost(config: &SpendConfig, amount: Decimal) -> Result<i64> {
    amount
        .checked_mul(Decimal::from(config.points_per_currency_unit))
        .map(|cost| cost.ceil())
        .and_then(|cost| cost.to_i64())
        .ok_or_else(|| Error::Validation("amount is too large".to_string()))
}

fn validate_request(config: &SpendConfig, request: &DonationRequest) -> Result<()> {
    if request.points_cost <= 0 {
        return Err(Error::Validation("points_cost must be positive".to_string()));
    }
    if request.amount <= Decimal::ZERO {
        return Err(Error::Validation("amount must be positive".to_string()));
    }
    let minimum = minimum_points_cost(config, request.amount)?;
    if request.points_cost < minimum {
        return Err(Error::Validation(format!(
            "points_cost must be at least {} for a donation of {}",
            minimum, request.amount
        )));
    }
    validate_donor(
        config,
        &request.donor_name,
        request.donor_email.as_deref(),
        request.message.as_deref(),
        request.is_anonymous,
    )
}

fn validate_donor(
    config: &SpendConfig,
    donor_name: &str,
    donor_email: Option<&str>,
    message: Option<&str>,
    is_anonymous: bool,
) -> Result<()> {
    let name = donor_name.trim();
    if name.is_empty() && !is_anonymous {
        return Err(Error::Validation("donor_name is required".to_string()));
    }
    if name.chars().count() > MAX_DONOR_NAME_LEN {
        return Err(Error::Validation(format!(
            "donor_name must be at most {} characters",
            MAX_DONOR_NAME_LEN
        )));
    }
    if let Some(email) = donor_email {
        if email.len() > MAX_EMAIL_LEN || !email.contains('@') {
            return Err(Error::Validation("donor_email is not a valid address".to_string()));
        }
    }
    if let Some(message) = message {
        if message.chars().count() > config.max_message_len {
            return Err(Error::Validation(format!(
                "message must be at most {} characters",
                config.max_message_len
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{announce, Config};
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    fn setup() -> (SpendEngine, Arc<Ledger>, mpsc::Receiver<Announcement>, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let ledger = Arc::new(Ledger::open(config).unwrap());
        ledger.open_account(&"donor".into(), "Donor").unwrap();
        let (sink, rx) = announce::channel(8);
        (SpendEngine::new(ledger.clone(), sink), ledger, rx, temp_dir)
    }

    fn fund(ledger: &Ledger, points: i64) {
        ledger
            .apply(&TransactionIntent::new(
                "donor".into(),
                TransactionKind::AdminAward,
                points,
                0,
                "seed",
            ))
            .unwrap();
    }

    fn request(amount: Decimal, points_cost: i64) -> DonationRequest {
        DonationRequest {
            donor_name: "Donor".to_string(),
            donor_email: None,
            amount,
            points_cost,
            message: Some("keep it up".to_string()),
            is_anonymous: false,
        }
    }

    #[test]
    fn test_spend_records_and_announces() {
        let (engine, ledger, mut rx, _temp) = setup();
        fund(&ledger, 600);

        let receipt = engine
            .spend_for_donation(&"donor".into(), &request(dec!(5.00), 500))
            .unwrap();
        assert_eq!(receipt.new_points_balance, 100);
        assert!(receipt.recorded && receipt.announced);
        assert_eq!(receipt.donation.status, DonationStatus::Completed);

        let stored = ledger.donation(receipt.donation.donation_id).unwrap().unwrap();
        assert_eq!(stored.tx_id, Some(receipt.transaction_id));

        let announcement = rx.try_recv().unwrap();
        assert_eq!(announcement.donor_name, "Donor");
        assert_eq!(announcement.amount, dec!(5.00));
    }

    #[test]
    fn test_insufficient_balance_has_no_effect() {
        let (engine, ledger, mut rx, _temp) = setup();
        fund(&ledger, 100);

        let err = engine
            .spend_for_donation(&"donor".into(), &request(dec!(1.00), 150))
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { .. }));
        assert_eq!(ledger.account(&"donor".into()).unwrap().points_balance, 100);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_anonymous_announcement() {
        let (engine, ledger, mut rx, _temp) = setup();
        fund(&ledger, 200);

        let mut anonymous = request(dec!(1), 100);
        anonymous.donor_name = String::new();
        anonymous.is_anonymous = true;
        engine.spend_for_donation(&"donor".into(), &anonymous).unwrap();

        assert_eq!(rx.try_recv().unwrap().donor_name, "Anonymous");
    }

    #[test]
    fn test_validation() {
        let (engine, ledger, _rx, _temp) = setup();
        fund(&ledger, 10_000);
        let id: AccountId = "donor".into();

        let cases = [
            request(dec!(5), 0),
            request(dec!(0), 100),
            request(dec!(5), 499),
            DonationRequest { donor_name: " ".to_string(), ..request(dec!(1), 100) },
            DonationRequest { message: Some("x".repeat(501)), ..request(dec!(1), 100) },
            DonationRequest { donor_email: Some("nope".to_string()), ..request(dec!(1), 100) },
        ];
        for case in cases {
            assert!(matches!(engine.spend_for_donation(&id, &case), Err(Error::Validation(_))));
        }
        assert_eq!(ledger.account(&id).unwrap().points_balance, 10_000);
    }

    #[test]
    fn test_minimum_cost_rounds_up() {
        let config = SpendConfig::default();
        assert_eq!(minimum_points_cost(&config, dec!(5)).unwrap(), 500);
        assert_eq!(minimum_points_cost(&config, dec!(0.015)).unwrap(), 2);
    }

    #[test]
    fn test_closed_channel_keeps_debit() {
        let (engine, ledger, rx, _temp) = setup();
        fund(&ledger, 100);
        drop(rx);

        let receipt = engine
            .spend_for_donation(&"donor".into(), &request(dec!(1), 100))
            .unwrap();
        assert!(receipt.recorded);
        assert!(!receipt.announced);
        assert_eq!(ledger.account(&"donor".into()).unwrap().points_balance, 0);
        assert_eq!(ledger.metrics().reconciliation_backlog.get(), 1);
    }

    #[test]
    fn test_payment_capture_marks_lifetime_donor() {
        let (engine, ledger, mut rx, _temp) = setup();
        let capture = PaymentCapture {
            donation_id: Uuid::new_v4(),
            account_id: Some("donor".into()),
            donor_name: "Donor".to_string(),
            donor_email: Some("donor@example.com".to_string()),
            amount: dec!(10.00),
            message: None,
            is_anonymous: false,
        };

        let record = engine.record_payment_donation(&capture).unwrap();
        assert_eq!(record.funding, DonationFunding::Payment);
        assert!(ledger.account(&"donor".into()).unwrap().is_lifetime_donor);
        assert!(rx.try_recv().is_ok());

        // Replayed webhook
        engine.record_payment_donation(&capture).unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(ledger.account(&"donor".into()).unwrap().points_balance, 0);
    }

    #[test]
    fn test_failed_capture_leaves_no_claim() {
        let (engine, ledger, mut rx, _temp) = setup();
        let capture = PaymentCapture {
            donation_id: Uuid::new_v4(),
            account_id: Some("newcomer".into()),
            donor_name: "Newcomer".to_string(),
            donor_email: None,
            amount: dec!(4.20),
            message: None,
            is_anonymous: false,
        };

        assert!(matches!(
            engine.record_payment_donation(&capture),
            Err(Error::AccountNotFound(_))
        ));
        assert_eq!(ledger.donation(capture.donation_id).unwrap(), None);
        assert!(rx.try_recv().is_err());

        ledger.open_account(&"newcomer".into(), "Newcomer").unwrap();
        let record = engine.record_payment_donation(&capture).unwrap();
        assert_eq!(ledger.donation(capture.donation_id).unwrap(), Some(record));
        assert!(ledger.account(&"newcomer".into()).unwrap().is_lifetime_donor);
        assert!(rx.try_recv().is_ok());
    }
}
