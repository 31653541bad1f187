use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use super::commission::CommissionRequest;
use super::{RequestHandler, Service, ServiceError};
use crate::models::users::Holding;
use crate::repositories::ledger::LedgerRepository;
use crate::store::{Transition, TxOutcome};
use crate::utils;

pub enum PurchaseRequest {
    Purchase {
        user_id: String,
        package_id: String,
        response: oneshot::Sender<Result<PurchaseReceipt, ServiceError>>,
    },
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseReceipt {
    pub holding_key: String,
    pub package_id: String,
    pub price: i64,
    pub recharge_balance: i64,
}

#[derive(Clone)]
pub struct PurchaseRequestHandler {
    repository: LedgerRepository,
    commission_channel: mpsc::Sender<CommissionRequest>,
}

impl PurchaseRequestHandler {
    pub fn new(
        repository: LedgerRepository,
        commission_channel: mpsc::Sender<CommissionRequest>,
    ) -> Self {
        PurchaseRequestHandler {
            repository,
            commission_channel,
        }
    }

    /// Debit the recharge balance and create the holding in one atomic
    /// transform. Both validations run inside the body, so a CAS loser
    /// re-reads the committed value and reports the specific reason —
    /// `InsufficientFunds` or `AlreadyOwned` — not a generic failure.
    /// Commission is queued after the commit and never blocks or reverts it.
    pub async fn purchase(
        &self,
        user_id: &str,
        package_id: &str,
    ) -> Result<PurchaseReceipt, ServiceError> {
        if !self.repository.site_settings().await?.is_site_online {
            return Err(ServiceError::SiteOffline);
        }
        let Some(entry) = self.repository.catalog_entry(package_id).await? else {
            return Err(ServiceError::UnknownPackage(package_id.to_string()));
        };

        let now = Utc::now();
        let holding_key = utils::history_key("inv", now);
        let mut rejection = None;

        let outcome = self
            .repository
            .transact(user_id, |current| {
                rejection = None;
                let Some(mut user) = current else {
                    rejection = Some(ServiceError::UnknownUser(user_id.to_string()));
                    return Transition::Abort;
                };

                if user.recharge_balance < entry.price {
                    rejection = Some(ServiceError::InsufficientFunds {
                        shortfall: entry.price - user.recharge_balance,
                    });
                    return Transition::Abort;
                }
                if user.owns_package(&entry.id) {
                    rejection = Some(ServiceError::AlreadyOwned);
                    return Transition::Abort;
                }

                user.recharge_balance -= entry.price;
                user.investments.insert(
                    holding_key.clone(),
                    Holding {
                        catalog_id: entry.id.clone(),
                        title: entry.title.clone(),
                        price: entry.price,
                        daily_income: entry.daily_income,
                        cycle: entry.cycle,
                        tag: entry.tag.clone(),
                        image: entry.image.clone(),
                        purchase_date: now,
                        last_claim_time: Some(now),
                    },
                );
                Transition::Commit(user)
            })
            .await?;

        let user = match outcome {
            TxOutcome::Committed(user) => user,
            TxOutcome::Aborted => {
                return Err(rejection.unwrap_or_else(|| {
                    ServiceError::Communication(
                        "PurchaseService".to_string(),
                        "aborted without a recorded reason".to_string(),
                    )
                }))
            }
        };

        // Best-effort side effect outside the atomic boundary. A failure
        // here leaves the purchase standing; the gap is eventual-consistency
        // bookkeeping, not part of the purchase.
        let queued = self
            .commission_channel
            .send(CommissionRequest::Propagate {
                buyer_id: user_id.to_string(),
                price: entry.price,
            })
            .await;
        if let Err(e) = queued {
            log::warn!(
                "could not queue commission propagation for buyer {}: {}",
                user_id,
                e
            );
        }

        Ok(PurchaseReceipt {
            holding_key,
            package_id: entry.id,
            price: entry.price,
            recharge_balance: user.recharge_balance,
        })
    }
}

#[async_trait]
impl RequestHandler<PurchaseRequest> for PurchaseRequestHandler {
    async fn handle_request(&self, request: PurchaseRequest) {
        match request {
            PurchaseRequest::Purchase {
                user_id,
                package_id,
                response,
            } => {
                let result = self.purchase(&user_id, &package_id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct PurchaseService;

impl PurchaseService {
    pub fn new() -> Self {
        PurchaseService {}
    }
}

#[async_trait]
impl Service<PurchaseRequest, PurchaseRequestHandler> for PurchaseService {}
