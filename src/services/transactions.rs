use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::transactions::{
    RechargeRequest, RequestKind, RequestStatus, Verdict, WithdrawalRequest,
};
use crate::repositories::ledger::LedgerRepository;
use crate::store::{Transition, TxOutcome};
use crate::utils;

/// Withdrawal fee in basis points.
pub const WITHDRAWAL_FEE_BP: i64 = 700;
/// Smallest withdrawal the platform accepts, in cents (200 taka).
pub const MINIMUM_WITHDRAWAL_CENTS: i64 = 20_000;

pub fn withdrawal_fee(amount: i64) -> i64 {
    utils::basis_points(amount, WITHDRAWAL_FEE_BP)
}

pub enum TransactionServiceRequest {
    SubmitRecharge {
        user_id: String,
        amount: i64,
        trx_id: String,
        response: oneshot::Sender<Result<RechargeReceipt, ServiceError>>,
    },
    SubmitWithdrawal {
        user_id: String,
        amount: i64,
        password: String,
        response: oneshot::Sender<Result<WithdrawalReceipt, ServiceError>>,
    },
    Review {
        user_id: String,
        kind: RequestKind,
        request_key: String,
        verdict: Verdict,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RechargeReceipt {
    pub request_key: String,
    pub amount: i64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalReceipt {
    pub request_key: String,
    pub amount: i64,
    pub charge: i64,
    pub received: i64,
    pub balance: i64,
}

#[derive(Clone)]
pub struct TransactionRequestHandler {
    repository: LedgerRepository,
}

impl TransactionRequestHandler {
    pub fn new(repository: LedgerRepository) -> Self {
        TransactionRequestHandler { repository }
    }

    /// Record a deposit claim against an externally-paid reference. Balances
    /// stay untouched until an admin approves. The global duplicate scan
    /// runs before the append, same as the original system; the remaining
    /// window between scan and append is an accepted race.
    pub async fn submit_recharge(
        &self,
        user_id: &str,
        amount: i64,
        trx_id: &str,
    ) -> Result<RechargeReceipt, ServiceError> {
        if !self.repository.site_settings().await?.is_site_online {
            return Err(ServiceError::SiteOffline);
        }
        if amount <= 0 {
            return Err(ServiceError::InvalidAmount);
        }
        if !utils::valid_trx_reference(trx_id) {
            return Err(ServiceError::InvalidReference);
        }
        if self.repository.trx_reference_in_use(trx_id).await? {
            return Err(ServiceError::DuplicateReference);
        }

        let now = Utc::now();
        let request_key = utils::history_key("rc", now);
        let record = RechargeRequest {
            amount,
            date: now,
            status: RequestStatus::Pending,
            trx_id: trx_id.to_string(),
        };

        let outcome = self
            .repository
            .transact(user_id, |current| {
                let Some(mut user) = current else {
                    return Transition::Abort;
                };
                user.recharge_history
                    .insert(request_key.clone(), record.clone());
                Transition::Commit(user)
            })
            .await?;

        match outcome {
            TxOutcome::Committed(_) => Ok(RechargeReceipt {
                request_key,
                amount,
            }),
            TxOutcome::Aborted => Err(ServiceError::UnknownUser(user_id.to_string())),
        }
    }

    /// Withdrawal debits `balance` immediately and atomically — the
    /// opposite of recharge, which credits only on approval. The early
    /// debit removes the funds from availability while the request is
    /// pending; a failed review credits them back.
    pub async fn submit_withdrawal(
        &self,
        user_id: &str,
        amount: i64,
        password: &str,
    ) -> Result<WithdrawalReceipt, ServiceError> {
        let settings = self.repository.site_settings().await?;
        if !settings.is_site_online {
            return Err(ServiceError::SiteOffline);
        }
        if !settings.is_withdrawal_enabled {
            return Err(ServiceError::WithdrawalsDisabled);
        }
        if amount < MINIMUM_WITHDRAWAL_CENTS {
            return Err(ServiceError::BelowMinimumWithdrawal {
                minimum: MINIMUM_WITHDRAWAL_CENTS,
            });
        }

        let charge = withdrawal_fee(amount);
        let received = amount - charge;
        let now = Utc::now();
        let request_key = utils::history_key("wd", now);
        let mut rejection = None;

        let outcome = self
            .repository
            .transact(user_id, |current| {
                rejection = None;
                let Some(mut user) = current else {
                    rejection = Some(ServiceError::UnknownUser(user_id.to_string()));
                    return Transition::Abort;
                };

                if !utils::verify_password(password, &user.password_salt, &user.password_hash)
                {
                    rejection = Some(ServiceError::AuthenticationFailed);
                    return Transition::Abort;
                }
                let Some(card) = user.bank_card.clone() else {
                    rejection = Some(ServiceError::MissingBankCard);
                    return Transition::Abort;
                };
                if user.balance < amount {
                    rejection = Some(ServiceError::InsufficientBalance {
                        shortfall: amount - user.balance,
                    });
                    return Transition::Abort;
                }

                user.balance -= amount;
                user.withdrawal_history.insert(
                    request_key.clone(),
                    WithdrawalRequest {
                        amount,
                        charge,
                        received,
                        date: now,
                        status: RequestStatus::Pending,
                        payment_method: card.payment_method,
                        account_number: card.account_number,
                    },
                );
                Transition::Commit(user)
            })
            .await?;

        match outcome {
            TxOutcome::Committed(user) => Ok(WithdrawalReceipt {
                request_key,
                amount,
                charge,
                received,
                balance: user.balance,
            }),
            TxOutcome::Aborted => Err(rejection.unwrap_or_else(|| {
                ServiceError::Communication(
                    "TransactionService".to_string(),
                    "aborted without a recorded reason".to_string(),
                )
            })),
        }
    }

    /// Admin decision on a pending request. The pending check runs inside
    /// the atomic body, so a terminal request can never be re-processed even
    /// by two racing admin sessions.
    pub async fn review(
        &self,
        user_id: &str,
        kind: RequestKind,
        request_key: &str,
        verdict: Verdict,
    ) -> Result<(), ServiceError> {
        let mut rejection = None;

        let outcome = self
            .repository
            .transact(user_id, |current| {
                rejection = None;
                let Some(mut user) = current else {
                    rejection = Some(ServiceError::UnknownUser(user_id.to_string()));
                    return Transition::Abort;
                };

                let status = verdict.terminal_status();
                match kind {
                    RequestKind::Recharge => {
                        let amount = {
                            let Some(request) =
                                user.recharge_history.get_mut(request_key)
                            else {
                                rejection = Some(ServiceError::UnknownRequest(
                                    request_key.to_string(),
                                ));
                                return Transition::Abort;
                            };
                            if request.status != RequestStatus::Pending {
                                rejection = Some(ServiceError::RequestAlreadyProcessed);
                                return Transition::Abort;
                            }
                            request.status = status;
                            request.amount
                        };
                        // Funds become spendable only now, on approval.
                        if verdict == Verdict::Approve {
                            user.recharge_balance += amount;
                        }
                    }
                    RequestKind::Withdrawal => {
                        let amount = {
                            let Some(request) =
                                user.withdrawal_history.get_mut(request_key)
                            else {
                                rejection = Some(ServiceError::UnknownRequest(
                                    request_key.to_string(),
                                ));
                                return Transition::Abort;
                            };
                            if request.status != RequestStatus::Pending {
                                rejection = Some(ServiceError::RequestAlreadyProcessed);
                                return Transition::Abort;
                            }
                            request.status = status;
                            request.amount
                        };
                        // Approval is balance-neutral (debited at
                        // submission); failure compensates in full.
                        if verdict == Verdict::Fail {
                            user.balance += amount;
                        }
                    }
                }
                Transition::Commit(user)
            })
            .await?;

        match outcome {
            TxOutcome::Committed(_) => Ok(()),
            TxOutcome::Aborted => Err(rejection.unwrap_or_else(|| {
                ServiceError::Communication(
                    "TransactionService".to_string(),
                    "aborted without a recorded reason".to_string(),
                )
            })),
        }
    }
}

#[async_trait]
impl RequestHandler<TransactionServiceRequest> for TransactionRequestHandler {
    async fn handle_request(&self, request: TransactionServiceRequest) {
        match request {
            TransactionServiceRequest::SubmitRecharge {
                user_id,
                amount,
                trx_id,
                response,
            } => {
                let result = self.submit_recharge(&user_id, amount, &trx_id).await;
                let _ = response.send(result);
            }
            TransactionServiceRequest::SubmitWithdrawal {
                user_id,
                amount,
                password,
                response,
            } => {
                let result = self.submit_withdrawal(&user_id, amount, &password).await;
                let _ = response.send(result);
            }
            TransactionServiceRequest::Review {
                user_id,
                kind,
                request_key,
                verdict,
                response,
            } => {
                let result = self.review(&user_id, kind, &request_key, verdict).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct TransactionService;

impl TransactionService {
    pub fn new() -> Self {
        TransactionService {}
    }
}

#[async_trait]
impl Service<TransactionServiceRequest, TransactionRequestHandler> for TransactionService {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_is_seven_percent_rounded_down() {
        assert_eq!(withdrawal_fee(20_000), 1_400);
        assert_eq!(withdrawal_fee(100_000), 7_000);
        assert_eq!(withdrawal_fee(33), 2);
    }

    #[test]
    fn fee_stays_sane_for_extreme_amounts() {
        let fee = withdrawal_fee(i64::MAX);
        assert!(fee > 0);
        assert!(fee < i64::MAX);
    }
}
