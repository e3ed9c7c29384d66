use crate::errors::{ApiError, Result};
use actix_web::web;
use economy_core::{
    accrual::{CheckinOutcome, CheckinStatus, WatchAccrual},
    admin::AdminReceipt,
    announce::AnnouncementSink,
    eligibility::{tts_eligible, Eligibility},
    referral::{ReferralClaim, ReferralStats},
    spend::{DonationReceipt, DonationRequest, PaymentCapture},
    types::{
        Account, AccountId, DonationRecord, Principal, Role, SupporterStatus, Transaction,
        TransactionKind,
    },
    AccountAudit, AccrualEngine, AdminGateway, Applied, Ledger, ReferralCoordinator, SpendEngine,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Largest page of transactions returned at once
pub const MAX_TRANSACTIONS_PAGE: usize = 200;

/// Ledger engines behind the HTTP surface.
///
/// RocksDB calls block, so every operation runs on the blocking pool.
pub struct EconomyService {
    ledger: Arc<Ledger>,
    accrual: AccrualEngine,
    spend: SpendEngine,
    admin: AdminGateway,
    referral: ReferralCoordinator,
}

impl EconomyService {
    pub fn new(ledger: Arc<Ledger>, announcements: AnnouncementSink) -> Self {
        Self {
            accrual: AccrualEngine::new(ledger.clone()),
            spend: SpendEngine::new(ledger.clone(), announcements),
            admin: AdminGateway::new(ledger.clone()),
            referral: ReferralCoordinator::new(ledger.clone()),
            ledger,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    async fn blocking<T, F>(f: F) -> Result<T>
    where
        F: FnOnce() -> economy_core::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        Ok(web::block(f).await??)
    }

    fn require_role(principal: &Principal, allowed: &[Role]) -> Result<()> {
        if allowed.contains(&principal.role) {
            Ok(())
        } else {
            tracing::warn!(
                actor = %principal.account_id,
                role = ?principal.role,
                "Caller lacks the required role"
            );
            Err(ApiError::Forbidden("insufficient role for this operation".to_string()))
        }
    }

    /// The caller's account, created on first authentication
    pub async fn account(&self, principal: &Principal) -> Result<Account> {
        let ledger = self.ledger.clone();
        let principal = principal.clone();
        Self::blocking(move || ledger.open_account(&principal.account_id, &principal.display_name)).await
    }

    pub async fn transactions(&self, principal: &Principal, limit: usize) -> Result<Vec<Transaction>> {
        self.account(principal).await?;
        let ledger = self.ledger.clone();
        let account_id = principal.account_id.clone();
        let limit = limit.clamp(1, MAX_TRANSACTIONS_PAGE);
        Self::blocking(move || ledger.recent_transactions(&account_id, limit)).await
    }

    pub async fn checkin_status(&self, principal: &Principal) -> Result<CheckinStatus> {
        self.account(principal).await?;
        let accrual = self.accrual.clone();
        let account_id = principal.account_id.clone();
        Self::blocking(move || accrual.checkin_status(&account_id)).await
    }

    pub async fn check_in(&self, principal: &Principal) -> Result<CheckinOutcome> {
        self.account(principal).await?;
        let accrual = self.accrual.clone();
        let account_id = principal.account_id.clone();
        Self::blocking(move || accrual.check_in(&account_id)).await
    }

    pub async fn watch_heartbeat(&self, principal: &Principal) -> Result<WatchAccrual> {
        self.account(principal).await?;
        let accrual = self.accrual.clone();
        let account_id = principal.account_id.clone();
        Self::blocking(move || accrual.record_watch_heartbeat(&account_id)).await
    }

    pub async fn watch_end(&self, principal: &Principal) -> Result<WatchAccrual> {
        self.account(principal).await?;
        let accrual = self.accrual.clone();
        let account_id = principal.account_id.clone();
        Self::blocking(move || accrual.end_watch_session(&account_id)).await
    }

    /// Chat collaborator reports a qualifying message
    pub async fn credit_chat(&self, principal: &Principal, user_id: AccountId, message_id: String) -> Result<Applied> {
        Self::require_role(principal, &[Role::Service, Role::Admin])?;
        let accrual = self.accrual.clone();
        Self::blocking(move || accrual.credit_chat_message(&user_id, &message_id)).await
    }

    pub async fn spend_for_donation(&self, principal: &Principal, request: DonationRequest) -> Result<DonationReceipt> {
        self.account(principal).await?;
        let spend = self.spend.clone();
        let account_id = principal.account_id.clone();
        Self::blocking(move || spend.spend_for_donation(&account_id, &request)).await
    }

    /// Payment collaborator reports a captured payment
    pub async fn record_payment(&self, principal: &Principal, capture: PaymentCapture) -> Result<DonationRecord> {
        Self::require_role(principal, &[Role::Service])?;
        let spend = self.spend.clone();
        Self::blocking(move || spend.record_payment_donation(&capture)).await
    }

    pub async fn award_points(
        &self,
        principal: &Principal,
        account_id: AccountId,
        amount: i64,
        description: String,
        transaction_type: Option<String>,
    ) -> Result<AdminReceipt> {
        Self::require_role(principal, &[Role::Admin])?;
        let kind = match transaction_type.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(name) => Some(TransactionKind::parse(name).ok_or_else(|| {
                ApiError::Validation(format!("Unknown transaction_type: {}", name))
            })?),
        };
        let admin = self.admin.clone();
        let principal = principal.clone();
        Self::blocking(move || admin.award(&principal, &account_id, amount, &description, kind)).await
    }

    /// Drop chat message guards past their retention window
    pub async fn prune_chat_guards(&self) -> Result<usize> {
        let accrual = self.accrual.clone();
        Self::blocking(move || accrual.prune_chat_guards()).await
    }

    pub async fn set_supporter_status(
        &self,
        principal: &Principal,
        account_id: AccountId,
        status: SupporterStatus,
    ) -> Result<Account> {
        Self::require_role(principal, &[Role::Admin, Role::Service])?;
        let ledger = self.ledger.clone();
        Self::blocking(move || ledger.set_supporter_status(&account_id, status)).await
    }

    pub async fn audit(&self, principal: &Principal, account_id: AccountId) -> Result<AccountAudit> {
        Self::require_role(principal, &[Role::Admin])?;
        let ledger = self.ledger.clone();
        Self::blocking(move || ledger.verify_account(&account_id)).await
    }

    pub async fn referral_stats(&self, principal: &Principal) -> Result<ReferralStats> {
        self.account(principal).await?;
        let referral = self.referral.clone();
        let account_id = principal.account_id.clone();
        Self::blocking(move || referral.stats(&account_id)).await
    }

    pub async fn claim_referral(&self, principal: &Principal, token: String) -> Result<ReferralClaim> {
        self.account(principal).await?;
        let referral = self.referral.clone();
        let account_id = principal.account_id.clone();
        Self::blocking(move || referral.claim(&account_id, &token)).await
    }

    /// Eligibility from the committed snapshot; unknown accounts are not eligible
    pub async fn tts_eligibility(&self, account_id: AccountId) -> Result<Eligibility> {
        account_id.validate()?;
        let ledger = self.ledger.clone();
        Self::blocking(move || match ledger.account(&account_id) {
            Ok(account) => Ok(tts_eligible(&account)),
            Err(economy_core::Error::AccountNotFound(_)) => Ok(Eligibility {
                eligible: false,
                reasons: Default::default(),
            }),
            Err(e) => Err(e),
        })
        .await
    }
}

/// Prune expired chat message guards every `every`
pub fn spawn_chat_guard_pruner(service: Arc<EconomyService>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            if let Err(e) = service.prune_chat_guards().await {
                tracing::warn!(error = %e, "Chat guard pruning failed");
            }
        }
    })
}
