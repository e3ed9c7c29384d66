use crate::auth::AuthenticatedUser;
use crate::errors::{ApiError, Result};
use crate::metrics;
use crate::models::{
    AccountResponse, AwardPointsRequest, AwardPointsResponse, ChatActivityRequest,
    ChatActivityResponse, CheckinResponse, DonationResponse, EligibilityResponse,
    PaymentCapturedRequest, PointsDonationRequest, PointsDonationResponse, ReferralClaimRequest,
    ReferralStatsResponse, SupporterStatusRequest, TransactionResponse, TransactionsQuery,
};
use crate::services::EconomyService;
use actix_web::{web, HttpResponse};
use economy_core::{
    spend::{DonationRequest, PaymentCapture},
    types::{AccountId, SupporterStatus},
};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

type Service = web::Data<Arc<EconomyService>>;

/// Default page size for `GET /transactions`
const DEFAULT_TRANSACTIONS_LIMIT: usize = 50;

/// Health check endpoint
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "economy-api",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Prometheus metrics endpoint
pub async fn metrics_endpoint(service: Service) -> HttpResponse {
    match metrics::metrics_handler(service.ledger().metrics()) {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => HttpResponse::InternalServerError().json(json!({
            "error": "Failed to gather metrics",
            "details": e.to_string()
        })),
    }
}

/// Caller's account snapshot
pub async fn get_account(service: Service, user: AuthenticatedUser) -> Result<HttpResponse> {
    let account = service.account(&user.0).await?;
    let progress = service.ledger().levels().progress(account.xp_total);
    Ok(HttpResponse::Ok().json(AccountResponse::new(account, progress)))
}

/// Caller's most recent ledger rows
pub async fn get_transactions(
    service: Service,
    user: AuthenticatedUser,
    query: web::Query<TransactionsQuery>,
) -> Result<HttpResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_TRANSACTIONS_LIMIT);
    let rows = service.transactions(&user.0, limit).await?;
    let count = rows.len();
    let rows: Vec<TransactionResponse> = rows.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(json!({
        "transactions": rows,
        "count": count
    })))
}

/// Check-in status for today (UTC)
pub async fn checkin_status(service: Service, user: AuthenticatedUser) -> Result<HttpResponse> {
    let status = service.checkin_status(&user.0).await?;
    Ok(HttpResponse::Ok().json(status))
}

/// Perform today's check-in
pub async fn checkin(service: Service, user: AuthenticatedUser) -> Result<HttpResponse> {
    let outcome = service.check_in(&user.0).await?;
    let already = outcome.already_checked_in();
    let receipt = outcome.receipt();

    let message = if already {
        "Already checked in today".to_string()
    } else if receipt.level_up {
        format!(
            "Checked in! {} day streak, reached level {}",
            receipt.current_streak, receipt.new_level
        )
    } else {
        format!("Checked in! {} day streak", receipt.current_streak)
    };

    Ok(HttpResponse::Ok().json(CheckinResponse {
        already_checked_in: already,
        xp_awarded: receipt.rewards.xp,
        points_awarded: receipt.rewards.points,
        current_streak: receipt.current_streak,
        level_up: receipt.level_up,
        new_level: receipt.new_level,
        new_points_balance: receipt.new_points_balance,
        bonus_xp: receipt.rewards.bonus_xp,
        bonus_points: receipt.rewards.bonus_points,
        message,
    }))
}

/// Credit watch time since the last heartbeat
pub async fn watch_heartbeat(service: Service, user: AuthenticatedUser) -> Result<HttpResponse> {
    let accrual = service.watch_heartbeat(&user.0).await?;
    Ok(HttpResponse::Ok().json(accrual))
}

/// Close the caller's watch session
pub async fn watch_end(service: Service, user: AuthenticatedUser) -> Result<HttpResponse> {
    let accrual = service.watch_end(&user.0).await?;
    Ok(HttpResponse::Ok().json(accrual))
}

/// Qualifying chat message reported by the chat collaborator
pub async fn chat_activity(
    service: Service,
    user: AuthenticatedUser,
    request: web::Json<ChatActivityRequest>,
) -> Result<HttpResponse> {
    request.validate()?;
    let request = request.into_inner();
    let applied = service
        .credit_chat(&user.0, AccountId::new(request.user_id), request.message_id)
        .await?;

    Ok(HttpResponse::Ok().json(ChatActivityResponse {
        points_awarded: applied.transaction.points_delta,
        new_points_balance: applied.new_balance,
        transaction_id: applied.transaction.tx_id,
    }))
}

/// Spend Points on a donation
pub async fn donate_points(
    service: Service,
    user: AuthenticatedUser,
    request: web::Json<PointsDonationRequest>,
) -> Result<HttpResponse> {
    request.validate()?;
    let request = request.into_inner();
    let receipt = service
        .spend_for_donation(
            &user.0,
            DonationRequest {
                donor_name: request.donor_name,
                donor_email: request.donor_email,
                amount: request.amount,
                points_cost: request.points_cost,
                message: request.message,
                is_anonymous: request.is_anonymous,
            },
        )
        .await?;

    Ok(HttpResponse::Ok().json(PointsDonationResponse {
        donation_id: receipt.donation.donation_id,
        new_points_balance: receipt.new_points_balance,
        transaction_id: receipt.transaction_id,
        announced: receipt.announced,
        message: "Donation completed".to_string(),
    }))
}

/// Confirmed payment capture from the payment collaborator
pub async fn payment_captured(
    service: Service,
    user: AuthenticatedUser,
    request: web::Json<PaymentCapturedRequest>,
) -> Result<HttpResponse> {
    request.validate()?;
    let request = request.into_inner();
    let record = service
        .record_payment(
            &user.0,
            PaymentCapture {
                donation_id: request.donation_id,
                account_id: request.user_id.map(AccountId::new),
                donor_name: request.donor_name,
                donor_email: request.donor_email,
                amount: request.amount,
                message: request.message,
                is_anonymous: request.is_anonymous,
            },
        )
        .await?;

    Ok(HttpResponse::Ok().json(DonationResponse {
        donation_id: record.donation_id,
        status: record.status,
        amount: record.amount,
    }))
}

/// Admin balance override
pub async fn award_points(
    service: Service,
    user: AuthenticatedUser,
    user_id: web::Path<String>,
    request: web::Json<AwardPointsRequest>,
) -> Result<HttpResponse> {
    request.validate()?;
    let request = request.into_inner();
    let account_id = AccountId::new(user_id.into_inner());
    let receipt = service
        .award_points(
            &user.0,
            account_id.clone(),
            request.points_amount,
            request.description,
            request.transaction_type,
        )
        .await?;

    let message = if request.points_amount > 0 {
        format!("Awarded {} points to {}", request.points_amount, account_id)
    } else {
        format!("Deducted {} points from {}", -request.points_amount, account_id)
    };

    Ok(HttpResponse::Ok().json(AwardPointsResponse {
        new_points_balance: receipt.new_balance,
        message,
        transaction_id: receipt.transaction.tx_id,
    }))
}

/// Mirror subscription and donor facts onto an account
pub async fn supporter_status(
    service: Service,
    user: AuthenticatedUser,
    user_id: web::Path<String>,
    request: web::Json<SupporterStatusRequest>,
) -> Result<HttpResponse> {
    let account = service
        .set_supporter_status(
            &user.0,
            AccountId::new(user_id.into_inner()),
            SupporterStatus {
                is_subscriber: request.is_subscriber,
                is_lifetime_donor: request.is_lifetime_donor,
            },
        )
        .await?;
    let progress = service.ledger().levels().progress(account.xp_total);
    Ok(HttpResponse::Ok().json(AccountResponse::new(account, progress)))
}

/// Replay and verify an account's ledger
pub async fn audit_account(
    service: Service,
    user: AuthenticatedUser,
    user_id: web::Path<String>,
) -> Result<HttpResponse> {
    let audit = service
        .audit(&user.0, AccountId::new(user_id.into_inner()))
        .await?;
    Ok(HttpResponse::Ok().json(audit))
}

/// Caller's referral standing
pub async fn referral_stats(service: Service, user: AuthenticatedUser) -> Result<HttpResponse> {
    let stats = service.referral_stats(&user.0).await?;
    Ok(HttpResponse::Ok().json(ReferralStatsResponse::from(stats)))
}

/// Claim a referral with another viewer's token
pub async fn claim_referral(
    service: Service,
    user: AuthenticatedUser,
    request: web::Json<ReferralClaimRequest>,
) -> Result<HttpResponse> {
    request.validate()?;
    let claim = service
        .claim_referral(&user.0, request.into_inner().referral_token)
        .await?;
    Ok(HttpResponse::Ok().json(claim))
}

/// Text-to-speech eligibility of any account
pub async fn tts_eligibility(
    service: Service,
    _user: AuthenticatedUser,
    user_id: web::Path<String>,
) -> Result<HttpResponse> {
    let eligibility = service
        .tts_eligibility(AccountId::new(user_id.into_inner()))
        .await?;
    Ok(HttpResponse::Ok().json(EligibilityResponse {
        eligible: eligibility.eligible,
        reasons: eligibility.reasons,
    }))
}

/// JSON body errors become validation errors with the standard envelope
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(16 * 1024)
        .error_handler(|err, _req| ApiError::Validation(err.to_string()).into())
}

/// Configure routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .route("/health", web::get().to(health_check))
        .route("/metrics", web::get().to(metrics_endpoint))
        .route("/account", web::get().to(get_account))
        .route("/transactions", web::get().to(get_transactions))
        .route("/checkin/status", web::get().to(checkin_status))
        .route("/checkin", web::post().to(checkin))
        .route("/watch/heartbeat", web::post().to(watch_heartbeat))
        .route("/watch/end", web::post().to(watch_end))
        .route("/chat/activity", web::post().to(chat_activity))
        .route("/donations/points", web::post().to(donate_points))
        .route("/donations/payment-captured", web::post().to(payment_captured))
        .route("/admin/users/{id}/award-points", web::put().to(award_points))
        .route("/admin/users/{id}/supporter-status", web::put().to(supporter_status))
        .route("/admin/users/{id}/audit", web::get().to(audit_account))
        .route("/referrals/stats", web::get().to(referral_stats))
        .route("/referrals/claim", web::post().to(claim_referral))
        .route("/tts-eligibility/check/{user_id}", web::get().to(tts_eligibility));
}
