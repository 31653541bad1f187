use async_trait::async_trait;
use chrono::Utc;

use super::{RequestHandler, Service};
use crate::models::users::CommissionRecord;
use crate::repositories::ledger::LedgerRepository;
use crate::store::{Transition, TxOutcome};
use crate::utils;

/// Commission per referral level, in basis points of the purchase price.
/// Index 0 is the direct referrer.
pub const COMMISSION_RATES_BP: [i64; 3] = [1500, 300, 200];

pub fn commission_amount(price: i64, level_index: usize) -> i64 {
    utils::basis_points(price, COMMISSION_RATES_BP[level_index])
}

/// Fire-and-forget: the purchase engine queues a propagation and never waits
/// on it. There is deliberately no response channel.
pub enum CommissionRequest {
    Propagate { buyer_id: String, price: i64 },
}

#[derive(Clone)]
pub struct CommissionRequestHandler {
    repository: LedgerRepository,
}

impl CommissionRequestHandler {
    pub fn new(repository: LedgerRepository) -> Self {
        CommissionRequestHandler { repository }
    }

    /// Walk the buyer's referrer chain up to three levels and credit each
    /// ancestor independently. Each credit is one atomic transform on that
    /// ancestor's own subtree; there is no cross-subtree atomicity, and a
    /// failed step is logged and skipped rather than retried or rolled back.
    pub async fn propagate(&self, buyer_id: &str, price: i64) {
        let chain = match self.resolve_chain(buyer_id).await {
            Ok(chain) => chain,
            Err(e) => {
                log::warn!(
                    "commission chain resolution failed for buyer {}: {}",
                    buyer_id,
                    e
                );
                return;
            }
        };

        for (index, ancestor_id) in chain.iter().enumerate() {
            let level = (index + 1) as u8;
            let amount = commission_amount(price, index);
            let now = Utc::now();
            let record_key = utils::history_key("comm", now);
            let buyer = buyer_id.to_string();

            let result = self
                .repository
                .transact(ancestor_id, |current| {
                    let Some(mut ancestor) = current else {
                        return Transition::Abort;
                    };
                    ancestor.balance += amount;
                    ancestor.team_commission += amount;
                    ancestor.total_income += amount;
                    ancestor.commission_history.insert(
                        record_key.clone(),
                        CommissionRecord {
                            from: buyer.clone(),
                            level,
                            amount,
                            date: now,
                        },
                    );
                    Transition::Commit(ancestor)
                })
                .await;

            match result {
                Ok(TxOutcome::Committed(_)) => {
                    log::info!(
                        "credited {} cents to {} (level {}) for buyer {}",
                        amount,
                        ancestor_id,
                        level,
                        buyer_id
                    );
                }
                Ok(TxOutcome::Aborted) => {
                    log::warn!(
                        "commission ancestor {} vanished; skipping level {}",
                        ancestor_id,
                        level
                    );
                }
                Err(e) => {
                    log::warn!(
                        "commission credit failed for {} (level {}): {}",
                        ancestor_id,
                        level,
                        e
                    );
                }
            }
        }
    }

    /// Buyer → referrer → referrer's referrer, bounded at three hops. The
    /// referrer link is write-once at signup, so the walk cannot cycle; the
    /// bound is still the hard stop.
    async fn resolve_chain(
        &self,
        buyer_id: &str,
    ) -> Result<Vec<String>, crate::store::StoreError> {
        let mut chain = Vec::new();
        let mut current = buyer_id.to_string();

        for _ in 0..COMMISSION_RATES_BP.len() {
            let Some(user) = self.repository.user(&current).await? else {
                break;
            };
            let Some(referrer_id) = user.referrer_id else {
                break;
            };
            chain.push(referrer_id.clone());
            current = referrer_id;
        }

        Ok(chain)
    }
}

#[async_trait]
impl RequestHandler<CommissionRequest> for CommissionRequestHandler {
    async fn handle_request(&self, request: CommissionRequest) {
        match request {
            CommissionRequest::Propagate { buyer_id, price } => {
                self.propagate(&buyer_id, price).await;
            }
        }
    }
}

pub struct CommissionService;

impl CommissionService {
    pub fn new() -> Self {
        CommissionService {}
    }
}

#[async_trait]
impl Service<CommissionRequest, CommissionRequestHandler> for CommissionService {}
