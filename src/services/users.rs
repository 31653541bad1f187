use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::users::{BankCard, TeamReport, User};
use crate::repositories::ledger::LedgerRepository;
use crate::store::{Transition, TxOutcome};
use crate::utils;

/// Attempts at drawing an unused 5-digit referral code before giving up on
/// uniqueness-by-regeneration.
const REFERRAL_CODE_ATTEMPTS: u32 = 8;

pub enum UserRequest {
    Register {
        full_name: String,
        mobile_number: String,
        password: String,
        recommendation_code: Option<String>,
        response: oneshot::Sender<Result<RegisteredUser, ServiceError>>,
    },
    Authenticate {
        mobile_number: String,
        password: String,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
    GetUser {
        id: String,
        response: oneshot::Sender<Result<Option<User>, ServiceError>>,
    },
    SetBankCard {
        user_id: String,
        card: BankCard,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
    TeamReport {
        user_id: String,
        response: oneshot::Sender<Result<TeamReport, ServiceError>>,
    },
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredUser {
    pub id: String,
    pub referral_code: String,
}

#[derive(Clone)]
pub struct UserRequestHandler {
    repository: LedgerRepository,
}

impl UserRequestHandler {
    pub fn new(repository: LedgerRepository) -> Self {
        UserRequestHandler { repository }
    }

    pub async fn register(
        &self,
        full_name: String,
        mobile_number: String,
        password: String,
        recommendation_code: Option<String>,
    ) -> Result<RegisteredUser, ServiceError> {
        if !utils::valid_mobile_number(&mobile_number) {
            return Err(ServiceError::InvalidMobileNumber);
        }
        if password.len() < 6 {
            return Err(ServiceError::WeakPassword);
        }

        // Referrer resolution happens once, at creation; the link is
        // immutable afterwards, which keeps the commission chain acyclic.
        let referrer = match recommendation_code.as_deref() {
            Some(code) if !code.is_empty() => {
                match self.repository.find_by_referral_code(code).await? {
                    Some((referrer_id, referrer)) => {
                        Some((referrer_id, referrer.referral_code))
                    }
                    None => return Err(ServiceError::InvalidReferralCode),
                }
            }
            _ => None,
        };

        let mut referral_code = utils::referral_code();
        for _ in 0..REFERRAL_CODE_ATTEMPTS {
            if !self.repository.referral_code_in_use(&referral_code).await? {
                break;
            }
            referral_code = utils::referral_code();
        }

        let user_id = format!("uid_{}", mobile_number);
        let salt = utils::new_salt();
        let (referrer_id, referrer_code) = match referrer {
            Some((id, code)) => (Some(id), Some(code)),
            None => (None, None),
        };
        let user = User {
            id: user_id.clone(),
            mobile_number,
            full_name,
            password_hash: utils::hash_password(&password, &salt),
            password_salt: salt,
            balance: 0,
            recharge_balance: 0,
            total_income: 0,
            team_commission: 0,
            investments: BTreeMap::new(),
            recharge_history: BTreeMap::new(),
            withdrawal_history: BTreeMap::new(),
            commission_history: BTreeMap::new(),
            income_history: BTreeMap::new(),
            bank_card: None,
            last_bonus_claim_time: None,
            referral_code,
            referrer_id,
            referrer_code,
            registration_date: Utc::now(),
        };

        // Commit-if-absent closes the race between two signups with the
        // same mobile number.
        let outcome = self
            .repository
            .transact(&user_id, |current| match current {
                Some(_) => Transition::Abort,
                None => Transition::Commit(user.clone()),
            })
            .await?;

        match outcome {
            TxOutcome::Committed(user) => Ok(RegisteredUser {
                id: user.id,
                referral_code: user.referral_code,
            }),
            TxOutcome::Aborted => Err(ServiceError::MobileAlreadyRegistered),
        }
    }

    pub async fn authenticate(
        &self,
        mobile_number: &str,
        password: &str,
    ) -> Result<User, ServiceError> {
        let Some((_, user)) = self.repository.find_by_mobile(mobile_number).await? else {
            return Err(ServiceError::AuthenticationFailed);
        };
        if !utils::verify_password(password, &user.password_salt, &user.password_hash) {
            return Err(ServiceError::AuthenticationFailed);
        }
        Ok(user)
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>, ServiceError> {
        Ok(self.repository.user(id).await?)
    }

    pub async fn set_bank_card(
        &self,
        user_id: &str,
        card: BankCard,
    ) -> Result<(), ServiceError> {
        let outcome = self
            .repository
            .transact(user_id, |current| match current {
                Some(mut user) => {
                    user.bank_card = Some(card.clone());
                    Transition::Commit(user)
                }
                None => Transition::Abort,
            })
            .await?;

        match outcome {
            TxOutcome::Committed(_) => Ok(()),
            TxOutcome::Aborted => Err(ServiceError::UnknownUser(user_id.to_string())),
        }
    }

    /// Member counts per referral level plus this user's commission income
    /// split by level. Read-only; stale counts are acceptable.
    pub async fn team_report(&self, user_id: &str) -> Result<TeamReport, ServiceError> {
        let Some(user) = self.repository.user(user_id).await? else {
            return Err(ServiceError::UnknownUser(user_id.to_string()));
        };

        let mut report = TeamReport::default();
        let mut frontier = vec![user_id.to_string()];
        for level in 0..3 {
            let mut next = Vec::new();
            for id in &frontier {
                let members = self.repository.direct_referrals(id).await?;
                report.levels[level].members += members.len() as u32;
                next.extend(members.into_keys());
            }
            frontier = next;
        }

        for record in user.commission_history.values() {
            let index = (record.level as usize).wrapping_sub(1);
            if index < 3 {
                report.levels[index].commission_income += record.amount;
            }
        }

        Ok(report)
    }
}

#[async_trait]
impl RequestHandler<UserRequest> for UserRequestHandler {
    async fn handle_request(&self, request: UserRequest) {
        match request {
            UserRequest::Register {
                full_name,
                mobile_number,
                password,
                recommendation_code,
                response,
            } => {
                let result = self
                    .register(full_name, mobile_number, password, recommendation_code)
                    .await;
                let _ = response.send(result);
            }
            UserRequest::Authenticate {
                mobile_number,
                password,
                response,
            } => {
                let result = self.authenticate(&mobile_number, &password).await;
                let _ = response.send(result);
            }
            UserRequest::GetUser { id, response } => {
                let result = self.get_user(&id).await;
                let _ = response.send(result);
            }
            UserRequest::SetBankCard {
                user_id,
                card,
                response,
            } => {
                let result = self.set_bank_card(&user_id, card).await;
                let _ = response.send(result);
            }
            UserRequest::TeamReport { user_id, response } => {
                let result = self.team_report(&user_id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct UserService;

impl UserService {
    pub fn new() -> Self {
        UserService {}
    }
}

#[async_trait]
impl Service<UserRequest, UserRequestHandler> for UserService {}
