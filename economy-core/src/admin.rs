//! Admin override gateway
//!
//! Staff credit or debit any amount without earning rules. Overrides are
//! still ordinary ledger rows, tagged with the acting admin.

use crate::{
    types::{AccountId, Principal, Transaction, TransactionIntent, TransactionKind},
    Error, Ledger, Result,
};
use std::sync::Arc;

/// Longest audit description accepted
const MAX_DESCRIPTION_LEN: usize = 500;

/// Result of an override
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminReceipt {
    /// Balance after the override
    pub new_balance: i64,
    /// The override row
    pub transaction: Transaction,
}

/// Admin override gateway
#[derive(Debug, Clone)]
pub struct AdminGateway {
    ledger: Arc<Ledger>,
}

impl AdminGateway {
    /// Create gateway over a shared ledger
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    /// Credit (`amount > 0`) or debit (`amount < 0`) an account.
    ///
    /// `kind`, when given, must agree with the sign of `amount`. Debits obey
    /// the floor at zero like every other path.
    pub fn award(
        &self,
        principal: &Principal,
        account_id: &AccountId,
        amount: i64,
        description: &str,
        kind: Option<TransactionKind>,
    ) -> Result<AdminReceipt> {
        if !principal.is_admin() {
            tracing::warn!(
                actor = %principal.account_id,
                account_id = %account_id,
                "Non-admin attempted a balance override"
            );
            return Err(Error::Authorization(
                "administrator privileges required".to_string(),
            ));
        }

        let description = description.trim();
        if description.is_empty() {
            return Err(Error::Validation("description is required".to_string()));
        }
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(Error::Validation(format!(
                "description must be at most {} characters",
                MAX_DESCRIPTION_LEN
            )));
        }
        if amount == 0 {
            return Err(Error::Validation("amount must be non-zero".to_string()));
        }
        let limit = self.ledger.config().admin.max_override_amount;
        if amount.unsigned_abs() > limit.unsigned_abs() {
            return Err(Error::Validation(format!(
                "amount magnitude must be at most {}",
                limit
            )));
        }

        let derived = if amount > 0 {
            TransactionKind::AdminAward
        } else {
            TransactionKind::AdminDeduct
        };
        if let Some(requested) = kind {
            if requested != derived {
                return Err(Error::Validation(format!(
                    "transaction_type {} does not match amount {}",
                    requested, amount
                )));
            }
        }

        let intent = TransactionIntent::new(account_id.clone(), derived, amount, 0, description)
            .with_actor(principal.account_id.as_str());
        let applied = self.ledger.apply(&intent)?;

        tracing::info!(
            actor = %principal.account_id,
            account_id = %account_id,
            kind = %derived,
            amount,
            new_balance = applied.new_balance,
            "Admin override applied"
        );

        Ok(AdminReceipt {
            new_balance: applied.new_balance,
            transaction: applied.transaction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{types::Role, Config};

    fn setup() -> (AdminGateway, Arc<Ledger>, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let ledger = Arc::new(Ledger::open(config).unwrap());
        ledger.open_account(&"viewer".into(), "Viewer").unwrap();
        (AdminGateway::new(ledger.clone()), ledger, temp_dir)
    }

    fn principal(role: Role) -> Principal {
        Principal {
            account_id: "staff".into(),
            display_name: "Staff".to_string(),
            role,
        }
    }

    #[test]
    fn test_award_and_deduct() {
        let (gateway, ledger, _temp) = setup();
        let admin = principal(Role::Admin);
        let id: AccountId = "viewer".into();

        let credit = gateway.award(&admin, &id, 250, "Giveaway winner", None).unwrap();
        assert_eq!(credit.new_balance, 250);
        assert_eq!(credit.transaction.kind, TransactionKind::AdminAward);
        assert_eq!(credit.transaction.actor.as_deref(), Some("staff"));

        let debit = gateway
            .award(&admin, &id, -50, "Correction", Some(TransactionKind::AdminDeduct))
            .unwrap();
        assert_eq!(debit.new_balance, 200);

        // Deductions do not count as earnings
        assert_eq!(ledger.account(&id).unwrap().points_earned_total, 250);
    }

    #[test]
    fn test_requires_admin() {
        let (gateway, _ledger, _temp) = setup();
        for role in [Role::Viewer, Role::Service] {
            let err = gateway
                .award(&principal(role), &"viewer".into(), 10, "nope", None)
                .unwrap_err();
            assert!(matches!(err, Error::Authorization(_)));
        }
    }

    #[test]
    fn test_validation() {
        let (gateway, _ledger, _temp) = setup();
        let admin = principal(Role::Admin);
        let id: AccountId = "viewer".into();

        assert!(matches!(gateway.award(&admin, &id, 10, "  ", None), Err(Error::Validation(_))));
        assert!(matches!(gateway.award(&admin, &id, 0, "zero", None), Err(Error::Validation(_))));
        assert!(matches!(
            gateway.award(&admin, &id, 1_000_001, "too much", None),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            gateway.award(&admin, &id, 10, "mismatch", Some(TransactionKind::AdminDeduct)),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            gateway.award(&admin, &id, 10, "wrong kind", Some(TransactionKind::ChatActivity)),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_deduct_respects_floor() {
        let (gateway, ledger, _temp) = setup();
        let admin = principal(Role::Admin);
        let id: AccountId = "viewer".into();

        gateway.award(&admin, &id, 30, "seed", None).unwrap();
        let err = gateway.award(&admin, &id, -31, "overdraw", None).unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { required: 31, available: 30 }));
        assert_eq!(ledger.account(&id).unwrap().points_balance, 30);
    }
}
