use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::users::PaymentMethod;

/// Request lifecycle. `Pending` is initial, the other two are terminal and
/// never revisited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Successful,
    Failed,
}

/// A deposit request. Balance is untouched until an admin marks it
/// successful, which credits `rechargeBalance`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RechargeRequest {
    pub amount: i64,
    pub date: DateTime<Utc>,
    pub status: RequestStatus,
    /// Externally-obtained payment reference, globally unique once submitted.
    pub trx_id: String,
}

/// A payout request. `balance` is debited optimistically at submission;
/// marking it failed credits the full amount back.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRequest {
    pub amount: i64,
    /// Fee in cents, 7% of `amount`.
    pub charge: i64,
    /// Net receivable after the fee.
    pub received: i64,
    pub date: DateTime<Utc>,
    pub status: RequestStatus,
    /// Destination snapshot taken from the bank card at submission time.
    pub payment_method: PaymentMethod,
    pub account_number: String,
}

/// Which per-user history collection an admin review targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Recharge,
    Withdrawal,
}

/// Admin decision on a pending request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Approve,
    Fail,
}

impl Verdict {
    pub fn terminal_status(self) -> RequestStatus {
        match self {
            Verdict::Approve => RequestStatus::Successful,
            Verdict::Fail => RequestStatus::Failed,
        }
    }
}
