use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::transactions::{RechargeRequest, WithdrawalRequest};

/// Payout destinations supported by the platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum PaymentMethod {
    #[serde(rename = "bKash")]
    Bkash,
    Nagad,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BankCard {
    pub name: String,
    pub payment_method: PaymentMethod,
    pub account_number: String,
}

/// A purchased instance of a catalog package. `catalog_id` references the
/// catalog entry and is not unique per holding key; the purchase engine
/// enforces at most one holding per catalog id.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    #[serde(rename = "id")]
    pub catalog_id: String,
    pub title: String,
    /// Principal in cents.
    pub price: i64,
    /// Claimable income per 24h window, in cents.
    pub daily_income: i64,
    /// Revenue cycle length in days. Display only; claims are not gated on it.
    pub cycle: u32,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    pub purchase_date: DateTime<Utc>,
    /// None means never claimed; the cooldown anchor falls back to
    /// `purchase_date`.
    #[serde(default)]
    pub last_claim_time: Option<DateTime<Utc>>,
}

impl Holding {
    pub fn claim_anchor(&self) -> DateTime<Utc> {
        self.last_claim_time.unwrap_or(self.purchase_date)
    }
}

/// One entry per ancestor per purchase event. Append only.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionRecord {
    /// The buyer whose purchase produced this commission.
    pub from: String,
    /// 1 = direct referrer, up to 3.
    pub level: u8,
    pub amount: i64,
    pub date: DateTime<Utc>,
}

/// One entry per successful income claim. Append only.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeRecord {
    pub investment_title: String,
    pub amount: i64,
    pub date: DateTime<Utc>,
}

/// Root aggregate for one user's ledger subtree. The whole struct is the unit
/// the store's atomic transform reads and commits.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub mobile_number: String,
    pub full_name: String,
    pub password_hash: String,
    pub password_salt: String,
    /// Withdrawable balance in cents. Accrues income, commission and bonus.
    pub balance: i64,
    /// Spendable only on purchases. Accrues via approved recharges.
    pub recharge_balance: i64,
    /// Lifetime accrual counter, never decremented.
    pub total_income: i64,
    pub team_commission: i64,
    #[serde(default)]
    pub investments: BTreeMap<String, Holding>,
    #[serde(default)]
    pub recharge_history: BTreeMap<String, RechargeRequest>,
    #[serde(default)]
    pub withdrawal_history: BTreeMap<String, WithdrawalRequest>,
    #[serde(default)]
    pub commission_history: BTreeMap<String, CommissionRecord>,
    #[serde(default)]
    pub income_history: BTreeMap<String, IncomeRecord>,
    #[serde(default)]
    pub bank_card: Option<BankCard>,
    /// None means never claimed, immediately eligible.
    #[serde(default)]
    pub last_bonus_claim_time: Option<DateTime<Utc>>,
    /// Unique 5-digit code assigned at signup.
    pub referral_code: String,
    /// Set once at signup, immutable afterwards. The commission chain is
    /// acyclic because a referrer must already exist when it is assigned.
    #[serde(default)]
    pub referrer_id: Option<String>,
    #[serde(default)]
    pub referrer_code: Option<String>,
    pub registration_date: DateTime<Utc>,
}

impl User {
    /// Sum of invested principal over live holdings, in cents.
    pub fn invested_principal(&self) -> i64 {
        self.investments.values().map(|h| h.price).sum()
    }

    pub fn owns_package(&self, catalog_id: &str) -> bool {
        self.investments.values().any(|h| h.catalog_id == catalog_id)
    }
}

/// Per-level slice of a team report.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamLevel {
    pub members: u32,
    pub commission_income: i64,
}

/// Three-level referral summary for a user's team view.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamReport {
    pub levels: [TeamLevel; 3],
}
