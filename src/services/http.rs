use std::sync::Arc;

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;

use super::claims::ClaimRequest;
use super::purchases::PurchaseRequest;
use super::transactions::TransactionServiceRequest;
use super::users::UserRequest;
use super::ServiceError;
use crate::models::transactions::{RequestKind, Verdict};
use crate::models::users::BankCard;
use crate::repositories::ledger::LedgerRepository;
use crate::settings::Admin;
use crate::store::StoreError;
use crate::utils;

type ErrorResponse = (StatusCode, Json<Value>);

/// In-memory bearer-token registry. Tokens are opaque uuids; they replace
/// the original client-stored "logged in" flag without changing the
/// mobile + secret login contract.
#[derive(Default)]
pub struct Sessions {
    users: DashMap<String, String>,
    admins: DashMap<String, ()>,
}

impl Sessions {
    pub fn issue_user(&self, user_id: &str) -> String {
        let token = utils::session_token();
        self.users.insert(token.clone(), user_id.to_string());
        token
    }

    pub fn user_id(&self, token: &str) -> Option<String> {
        self.users.get(token).map(|entry| entry.value().clone())
    }

    pub fn issue_admin(&self) -> String {
        let token = utils::session_token();
        self.admins.insert(token.clone(), ());
        token
    }

    pub fn is_admin(&self, token: &str) -> bool {
        self.admins.contains_key(token)
    }
}

#[derive(Clone)]
pub struct AppState {
    user_channel: mpsc::Sender<UserRequest>,
    claim_channel: mpsc::Sender<ClaimRequest>,
    purchase_channel: mpsc::Sender<PurchaseRequest>,
    transaction_channel: mpsc::Sender<TransactionServiceRequest>,
    repository: LedgerRepository,
    sessions: Arc<Sessions>,
    admin: Admin,
}

impl AppState {
    pub fn new(
        user_channel: mpsc::Sender<UserRequest>,
        claim_channel: mpsc::Sender<ClaimRequest>,
        purchase_channel: mpsc::Sender<PurchaseRequest>,
        transaction_channel: mpsc::Sender<TransactionServiceRequest>,
        repository: LedgerRepository,
        admin: Admin,
    ) -> Self {
        AppState {
            user_channel,
            claim_channel,
            purchase_channel,
            transaction_channel,
            repository,
            sessions: Arc::new(Sessions::default()),
            admin,
        }
    }
}

fn service_error_response(error: ServiceError) -> ErrorResponse {
    let status = match &error {
        ServiceError::AuthenticationFailed => StatusCode::UNAUTHORIZED,
        ServiceError::UnknownUser(_)
        | ServiceError::UnknownPackage(_)
        | ServiceError::UnknownHolding(_)
        | ServiceError::UnknownRequest(_) => StatusCode::NOT_FOUND,
        ServiceError::AlreadyOwned
        | ServiceError::DuplicateReference
        | ServiceError::MobileAlreadyRegistered
        | ServiceError::RequestAlreadyProcessed => StatusCode::CONFLICT,
        ServiceError::Store(StoreError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        ServiceError::SiteOffline | ServiceError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        ServiceError::Communication(..) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };

    let mut body = json!({
        "kind": error.kind(),
        "description": error.to_string(),
    });
    match &error {
        ServiceError::NotYetEligible { seconds_remaining } => {
            body["secondsRemaining"] = json!(seconds_remaining);
        }
        ServiceError::InsufficientFunds { shortfall }
        | ServiceError::InsufficientBalance { shortfall } => {
            body["shortfall"] = json!(shortfall);
        }
        ServiceError::BelowMinimumWithdrawal { minimum } => {
            body["minimum"] = json!(minimum);
        }
        _ => {}
    }

    (status, Json(body))
}

fn channel_down(service: &str) -> ErrorResponse {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "kind": "COMMUNICATION",
            "description": format!("{} is not accepting requests", service),
        })),
    )
}

fn unauthorized() -> ErrorResponse {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"kind": "AUTHENTICATION_FAILED", "description": "missing or invalid token"})),
    )
}

async fn await_reply<R>(
    receiver: oneshot::Receiver<Result<R, ServiceError>>,
) -> Result<R, ErrorResponse> {
    match receiver.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(service_error_response(error)),
        Err(_) => Err(channel_down("service")),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

fn require_user(state: &AppState, headers: &HeaderMap) -> Result<String, ErrorResponse> {
    bearer_token(headers)
        .and_then(|token| state.sessions.user_id(&token))
        .ok_or_else(unauthorized)
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ErrorResponse> {
    let is_admin = bearer_token(headers)
        .map(|token| state.sessions.is_admin(&token))
        .unwrap_or(false);
    if is_admin {
        Ok(())
    } else {
        Err(unauthorized())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBody {
    full_name: String,
    mobile_number: String,
    password: String,
    #[serde(default)]
    recommendation_code: Option<String>,
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let (tx, rx) = oneshot::channel();
    state
        .user_channel
        .send(UserRequest::Register {
            full_name: body.full_name,
            mobile_number: body.mobile_number,
            password: body.password,
            recommendation_code: body.recommendation_code,
            response: tx,
        })
        .await
        .map_err(|_| channel_down("user service"))?;

    let registered = await_reply(rx).await?;
    Ok((StatusCode::CREATED, Json(json!(registered))))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginBody {
    mobile_number: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let (tx, rx) = oneshot::channel();
    state
        .user_channel
        .send(UserRequest::Authenticate {
            mobile_number: body.mobile_number,
            password: body.password,
            response: tx,
        })
        .await
        .map_err(|_| channel_down("user service"))?;

    let user = await_reply(rx).await?;
    let token = state.sessions.issue_user(&user.id);
    Ok(Json(json!({"token": token, "userId": user.id})))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdminLoginBody {
    username: String,
    password: String,
}

async fn admin_login(
    State(state): State<AppState>,
    Json(body): Json<AdminLoginBody>,
) -> Result<impl IntoResponse, ErrorResponse> {
    if body.username != state.admin.username || body.password != state.admin.password {
        return Err(service_error_response(ServiceError::AuthenticationFailed));
    }
    let token = state.sessions.issue_admin();
    Ok(Json(json!({"token": token})))
}

async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ErrorResponse> {
    let user_id = require_user(&state, &headers)?;

    let (tx, rx) = oneshot::channel();
    state
        .user_channel
        .send(UserRequest::GetUser {
            id: user_id.clone(),
            response: tx,
        })
        .await
        .map_err(|_| channel_down("user service"))?;

    let user = await_reply(rx)
        .await?
        .ok_or_else(|| service_error_response(ServiceError::UnknownUser(user_id)))?;

    // Credential material never leaves the service.
    let mut view = serde_json::to_value(&user).unwrap_or_else(|_| json!({}));
    if let Some(fields) = view.as_object_mut() {
        fields.remove("passwordHash");
        fields.remove("passwordSalt");
    }
    Ok(Json(view))
}

async fn catalog(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let entries = state
        .repository
        .catalog()
        .await
        .map_err(|e| service_error_response(ServiceError::Store(e)))?;
    Ok(Json(json!(entries)))
}

async fn payment_details(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let details = state
        .repository
        .payment_details()
        .await
        .map_err(|e| service_error_response(ServiceError::Store(e)))?;
    Ok(Json(json!(details)))
}

async fn team(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ErrorResponse> {
    let user_id = require_user(&state, &headers)?;

    let (tx, rx) = oneshot::channel();
    state
        .user_channel
        .send(UserRequest::TeamReport {
            user_id,
            response: tx,
        })
        .await
        .map_err(|_| channel_down("user service"))?;

    let report = await_reply(rx).await?;
    Ok(Json(json!(report)))
}

async fn set_bank_card(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(card): Json<BankCard>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let user_id = require_user(&state, &headers)?;

    let (tx, rx) = oneshot::channel();
    state
        .user_channel
        .send(UserRequest::SetBankCard {
            user_id,
            card,
            response: tx,
        })
        .await
        .map_err(|_| channel_down("user service"))?;

    await_reply(rx).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseBody {
    package_id: String,
}

async fn purchase(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PurchaseBody>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let user_id = require_user(&state, &headers)?;

    let (tx, rx) = oneshot::channel();
    state
        .purchase_channel
        .send(PurchaseRequest::Purchase {
            user_id,
            package_id: body.package_id,
            response: tx,
        })
        .await
        .map_err(|_| channel_down("purchase service"))?;

    let receipt = await_reply(rx).await?;
    Ok((StatusCode::CREATED, Json(json!(receipt))))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomeClaimBody {
    holding_key: String,
}

async fn claim_income(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<IncomeClaimBody>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let user_id = require_user(&state, &headers)?;

    let (tx, rx) = oneshot::channel();
    state
        .claim_channel
        .send(ClaimRequest::Income {
            user_id,
            holding_key: body.holding_key,
            response: tx,
        })
        .await
        .map_err(|_| channel_down("claim service"))?;

    let receipt = await_reply(rx).await?;
    Ok(Json(json!(receipt)))
}

async fn claim_bonus(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ErrorResponse> {
    let user_id = require_user(&state, &headers)?;

    let (tx, rx) = oneshot::channel();
    state
        .claim_channel
        .send(ClaimRequest::Bonus {
            user_id,
            response: tx,
        })
        .await
        .map_err(|_| channel_down("claim service"))?;

    let receipt = await_reply(rx).await?;
    Ok(Json(json!(receipt)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RechargeBody {
    amount_in_cents: i64,
    trx_id: String,
}

async fn submit_recharge(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RechargeBody>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let user_id = require_user(&state, &headers)?;

    let (tx, rx) = oneshot::channel();
    state
        .transaction_channel
        .send(TransactionServiceRequest::SubmitRecharge {
            user_id,
            amount: body.amount_in_cents,
            trx_id: body.trx_id,
            response: tx,
        })
        .await
        .map_err(|_| channel_down("transaction service"))?;

    let receipt = await_reply(rx).await?;
    Ok((StatusCode::CREATED, Json(json!(receipt))))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawalBody {
    amount_in_cents: i64,
    password: String,
}

async fn submit_withdrawal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<WithdrawalBody>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let user_id = require_user(&state, &headers)?;

    let (tx, rx) = oneshot::channel();
    state
        .transaction_channel
        .send(TransactionServiceRequest::SubmitWithdrawal {
            user_id,
            amount: body.amount_in_cents,
            password: body.password,
            response: tx,
        })
        .await
        .map_err(|_| channel_down("transaction service"))?;

    let receipt = await_reply(rx).await?;
    Ok((StatusCode::CREATED, Json(json!(receipt))))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewBody {
    user_id: String,
    kind: RequestKind,
    request_key: String,
    verdict: Verdict,
}

async fn review(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ReviewBody>,
) -> Result<impl IntoResponse, ErrorResponse> {
    require_admin(&state, &headers)?;

    let (tx, rx) = oneshot::channel();
    state
        .transaction_channel
        .send(TransactionServiceRequest::Review {
            user_id: body.user_id,
            kind: body.kind,
            request_key: body.request_key,
            verdict: body.verdict,
            response: tx,
        })
        .await
        .map_err(|_| channel_down("transaction service"))?;

    await_reply(rx).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn start_http_server(bind: &str, state: AppState) -> Result<(), anyhow::Error> {
    let app = Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/admin/login", post(admin_login))
        .route("/admin/review", post(review))
        .route("/me", get(me))
        .route("/catalog", get(catalog))
        .route("/payment-details", get(payment_details))
        .route("/team", get(team))
        .route("/bank-card", post(set_bank_card))
        .route("/purchases", post(purchase))
        .route("/claims/income", post(claim_income))
        .route("/claims/bonus", post(claim_bonus))
        .route("/recharges", post(submit_recharge))
        .route("/withdrawals", post(submit_withdrawal))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(bind).await?;
    println!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
