use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::repositories::ledger::LedgerRepository;
use crate::settings::Settings;
use crate::store::{StoreError, TreeStore};

pub mod claims;
pub mod commission;
pub mod http;
pub mod purchases;
pub mod transactions;
pub mod users;

/// Everything a financial operation can fail with. Validation failures are
/// detected inside the atomic attempt and never retried; only the store
/// variants are transient. Variants carry the data a caller needs to
/// describe the failure, never display text.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("recharge balance short by {shortfall} cents")]
    InsufficientFunds { shortfall: i64 },
    #[error("balance short by {shortfall} cents")]
    InsufficientBalance { shortfall: i64 },
    #[error("package already owned")]
    AlreadyOwned,
    #[error("claim due again in {seconds_remaining}s")]
    NotYetEligible { seconds_remaining: i64 },
    #[error("no invested principal to pay a bonus on")]
    NoEligiblePrincipal,
    #[error("referral code does not match any user")]
    InvalidReferralCode,
    #[error("transaction reference already used")]
    DuplicateReference,
    #[error("transaction reference must be exactly 10 alphanumeric characters")]
    InvalidReference,
    #[error("amount must be positive")]
    InvalidAmount,
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("request is no longer pending")]
    RequestAlreadyProcessed,
    #[error("mobile number already registered")]
    MobileAlreadyRegistered,
    #[error("invalid mobile number")]
    InvalidMobileNumber,
    #[error("password must be at least 6 characters")]
    WeakPassword,
    #[error("unknown user {0}")]
    UnknownUser(String),
    #[error("unknown package {0}")]
    UnknownPackage(String),
    #[error("unknown holding {0}")]
    UnknownHolding(String),
    #[error("unknown request {0}")]
    UnknownRequest(String),
    #[error("no bank card on file")]
    MissingBankCard,
    #[error("withdrawals are currently disabled")]
    WithdrawalsDisabled,
    #[error("platform is temporarily offline")]
    SiteOffline,
    #[error("minimum withdrawal is {minimum} cents")]
    BelowMinimumWithdrawal { minimum: i64 },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("communication error: {0} - {1}")]
    Communication(String, String),
}

impl ServiceError {
    /// Stable machine-readable kind for the HTTP surface.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            ServiceError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            ServiceError::AlreadyOwned => "ALREADY_OWNED",
            ServiceError::NotYetEligible { .. } => "NOT_YET_ELIGIBLE",
            ServiceError::NoEligiblePrincipal => "NO_ELIGIBLE_PRINCIPAL",
            ServiceError::InvalidReferralCode => "INVALID_REFERRAL_CODE",
            ServiceError::DuplicateReference => "DUPLICATE_REFERENCE",
            ServiceError::InvalidReference => "INVALID_REFERENCE",
            ServiceError::InvalidAmount => "INVALID_AMOUNT",
            ServiceError::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ServiceError::RequestAlreadyProcessed => "REQUEST_ALREADY_PROCESSED",
            ServiceError::MobileAlreadyRegistered => "MOBILE_ALREADY_REGISTERED",
            ServiceError::InvalidMobileNumber => "INVALID_MOBILE_NUMBER",
            ServiceError::WeakPassword => "WEAK_PASSWORD",
            ServiceError::UnknownUser(_) => "UNKNOWN_USER",
            ServiceError::UnknownPackage(_) => "UNKNOWN_PACKAGE",
            ServiceError::UnknownHolding(_) => "UNKNOWN_HOLDING",
            ServiceError::UnknownRequest(_) => "UNKNOWN_REQUEST",
            ServiceError::MissingBankCard => "MISSING_BANK_CARD",
            ServiceError::WithdrawalsDisabled => "WITHDRAWALS_DISABLED",
            ServiceError::SiteOffline => "SITE_OFFLINE",
            ServiceError::BelowMinimumWithdrawal { .. } => "BELOW_MINIMUM_WITHDRAWAL",
            ServiceError::Store(StoreError::Timeout(_)) => "TIMEOUT",
            ServiceError::Store(_) => "STORE_UNAVAILABLE",
            ServiceError::Communication(..) => "COMMUNICATION",
        }
    }
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

pub async fn start_services(
    store: Arc<dyn TreeStore>,
    settings: Settings,
) -> Result<(), anyhow::Error> {
    let repository = LedgerRepository::new(store);

    let (user_tx, mut user_rx) = mpsc::channel(512);
    let (claim_tx, mut claim_rx) = mpsc::channel(512);
    let (purchase_tx, mut purchase_rx) = mpsc::channel(512);
    let (commission_tx, mut commission_rx) = mpsc::channel(512);
    let (transaction_tx, mut transaction_rx) = mpsc::channel(512);

    let mut user_service = users::UserService::new();
    let mut claim_service = claims::ClaimService::new();
    let mut purchase_service = purchases::PurchaseService::new();
    let mut commission_service = commission::CommissionService::new();
    let mut transaction_service = transactions::TransactionService::new();

    log::info!("Starting user service.");
    let user_repository = repository.clone();
    tokio::spawn(async move {
        user_service
            .run(users::UserRequestHandler::new(user_repository), &mut user_rx)
            .await;
    });

    log::info!("Starting claim service.");
    let claim_repository = repository.clone();
    tokio::spawn(async move {
        claim_service
            .run(
                claims::ClaimRequestHandler::new(claim_repository),
                &mut claim_rx,
            )
            .await;
    });

    log::info!("Starting commission service.");
    let commission_repository = repository.clone();
    tokio::spawn(async move {
        commission_service
            .run(
                commission::CommissionRequestHandler::new(commission_repository),
                &mut commission_rx,
            )
            .await;
    });

    log::info!("Starting purchase service.");
    let purchase_repository = repository.clone();
    let purchase_commission_tx = commission_tx.clone();
    tokio::spawn(async move {
        purchase_service
            .run(
                purchases::PurchaseRequestHandler::new(
                    purchase_repository,
                    purchase_commission_tx,
                ),
                &mut purchase_rx,
            )
            .await;
    });

    log::info!("Starting transaction service.");
    let transaction_repository = repository.clone();
    tokio::spawn(async move {
        transaction_service
            .run(
                transactions::TransactionRequestHandler::new(transaction_repository),
                &mut transaction_rx,
            )
            .await;
    });

    log::info!("Starting HTTP server.");
    http::start_http_server(
        &settings.server.bind,
        http::AppState::new(
            user_tx,
            claim_tx,
            purchase_tx,
            transaction_tx,
            repository,
            settings.admin,
        ),
    )
    .await
}
