use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::users::IncomeRecord;
use crate::repositories::ledger::LedgerRepository;
use crate::store::{Transition, TxOutcome};
use crate::utils;

/// Daily bonus rate in basis points of invested principal.
pub const DAILY_BONUS_BP: i64 = 50;

pub fn bonus_amount(principal: i64) -> i64 {
    utils::basis_points(principal, DAILY_BONUS_BP)
}

pub enum ClaimRequest {
    Income {
        user_id: String,
        holding_key: String,
        response: oneshot::Sender<Result<ClaimReceipt, ServiceError>>,
    },
    Bonus {
        user_id: String,
        response: oneshot::Sender<Result<ClaimReceipt, ServiceError>>,
    },
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimReceipt {
    pub amount: i64,
    pub balance: i64,
    pub total_income: i64,
}

#[derive(Clone)]
pub struct ClaimRequestHandler {
    repository: LedgerRepository,
}

impl ClaimRequestHandler {
    pub fn new(repository: LedgerRepository) -> Self {
        ClaimRequestHandler { repository }
    }

    /// Move one holding's accumulated daily income into the spendable
    /// balance. Eligibility is evaluated inside the atomic body, so a CAS
    /// loser re-checks against the committed value and reports
    /// `NotYetEligible` instead of double-paying.
    pub async fn claim_income(
        &self,
        user_id: &str,
        holding_key: &str,
    ) -> Result<ClaimReceipt, ServiceError> {
        if !self.repository.site_settings().await?.is_site_online {
            return Err(ServiceError::SiteOffline);
        }

        let now = Utc::now();
        let record_key = utils::history_key("inc", now);
        let mut rejection = None;
        let mut amount = 0;

        let outcome = self
            .repository
            .transact(user_id, |current| {
                rejection = None;
                let Some(mut user) = current else {
                    rejection = Some(ServiceError::UnknownUser(user_id.to_string()));
                    return Transition::Abort;
                };
                let Some(holding) = user.investments.get_mut(holding_key) else {
                    rejection = Some(ServiceError::UnknownHolding(holding_key.to_string()));
                    return Transition::Abort;
                };

                let anchor = Some(holding.claim_anchor());
                if !utils::claim_due(now, anchor) {
                    rejection = Some(ServiceError::NotYetEligible {
                        seconds_remaining: utils::claim_remaining_secs(now, anchor),
                    });
                    return Transition::Abort;
                }

                amount = holding.daily_income;
                let title = holding.title.clone();
                holding.last_claim_time = Some(now);
                user.balance += amount;
                user.total_income += amount;
                user.income_history.insert(
                    record_key.clone(),
                    IncomeRecord {
                        investment_title: title,
                        amount,
                        date: now,
                    },
                );
                Transition::Commit(user)
            })
            .await?;

        match outcome {
            TxOutcome::Committed(user) => Ok(ClaimReceipt {
                amount,
                balance: user.balance,
                total_income: user.total_income,
            }),
            TxOutcome::Aborted => Err(rejection.unwrap_or_else(|| {
                ServiceError::Communication(
                    "ClaimService".to_string(),
                    "aborted without a recorded reason".to_string(),
                )
            })),
        }
    }

    /// Pay 0.50% of the invested principal as computed from the live
    /// holdings set at claim time; the payout is never cached across the
    /// cooldown, so principal bought mid-window counts.
    pub async fn claim_bonus(&self, user_id: &str) -> Result<ClaimReceipt, ServiceError> {
        if !self.repository.site_settings().await?.is_site_online {
            return Err(ServiceError::SiteOffline);
        }

        let now = Utc::now();
        let mut rejection = None;
        let mut amount = 0;

        let outcome = self
            .repository
            .transact(user_id, |current| {
                rejection = None;
                let Some(mut user) = current else {
                    rejection = Some(ServiceError::UnknownUser(user_id.to_string()));
                    return Transition::Abort;
                };

                amount = bonus_amount(user.invested_principal());
                if amount <= 0 {
                    rejection = Some(ServiceError::NoEligiblePrincipal);
                    return Transition::Abort;
                }

                if !utils::claim_due(now, user.last_bonus_claim_time) {
                    rejection = Some(ServiceError::NotYetEligible {
                        seconds_remaining: utils::claim_remaining_secs(
                            now,
                            user.last_bonus_claim_time,
                        ),
                    });
                    return Transition::Abort;
                }

                user.balance += amount;
                user.total_income += amount;
                user.last_bonus_claim_time = Some(now);
                Transition::Commit(user)
            })
            .await?;

        match outcome {
            TxOutcome::Committed(user) => Ok(ClaimReceipt {
                amount,
                balance: user.balance,
                total_income: user.total_income,
            }),
            TxOutcome::Aborted => Err(rejection.unwrap_or_else(|| {
                ServiceError::Communication(
                    "ClaimService".to_string(),
                    "aborted without a recorded reason".to_string(),
                )
            })),
        }
    }
}

#[async_trait]
impl RequestHandler<ClaimRequest> for ClaimRequestHandler {
    async fn handle_request(&self, request: ClaimRequest) {
        match request {
            ClaimRequest::Income {
                user_id,
                holding_key,
                response,
            } => {
                let result = self.claim_income(&user_id, &holding_key).await;
                let _ = response.send(result);
            }
            ClaimRequest::Bonus { user_id, response } => {
                let result = self.claim_bonus(&user_id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct ClaimService;

impl ClaimService {
    pub fn new() -> Self {
        ClaimService {}
    }
}

#[async_trait]
impl Service<ClaimRequest, ClaimRequestHandler> for ClaimService {}

#[cfg(test)]
mod tests {
    #[test]
    fn bonus_is_fifty_basis_points() {
        assert_eq!(super::bonus_amount(100_000), 500);
        assert_eq!(super::bonus_amount(0), 0);
        assert_eq!(super::bonus_amount(100), 0); // rounds down below 2 taka
    }
}
