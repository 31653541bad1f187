use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::models::catalog::{CatalogEntry, PaymentChannel, SiteSettings};
use crate::models::users::User;

pub mod memory;
pub mod rtdb;

/// Bound on compare-and-swap retries for one atomic transform. Exhausting it
/// surfaces `StoreError::Timeout` instead of spinning forever.
pub const MAX_TX_ATTEMPTS: u32 = 25;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("transaction retries exhausted on {0}")]
    Timeout(String),
    #[error("malformed record at {0}")]
    Malformed(String),
}

/// What an atomic-transform body wants done with the subtree it was shown.
pub enum Transition {
    Commit(User),
    Abort,
}

/// Result of an atomic transform. `Aborted` carries no data; the body itself
/// records why it gave up, computed against the freshest value it saw.
#[derive(Debug)]
pub enum TxOutcome {
    Committed(User),
    Aborted,
}

/// Indexed user lookups the registry and auth paths need.
#[derive(Clone, Copy, Debug)]
pub enum UserField {
    MobileNumber,
    ReferralCode,
    ReferrerId,
}

impl UserField {
    pub fn key(self) -> &'static str {
        match self {
            UserField::MobileNumber => "mobileNumber",
            UserField::ReferralCode => "referralCode",
            UserField::ReferrerId => "referrerId",
        }
    }

    fn matches(self, user: &User, value: &str) -> bool {
        match self {
            UserField::MobileNumber => user.mobile_number == value,
            UserField::ReferralCode => user.referral_code == value,
            UserField::ReferrerId => user.referrer_id.as_deref() == Some(value),
        }
    }
}

pub type TxBody<'a> = &'a mut (dyn FnMut(Option<User>) -> Transition + Send);

/// The ledger store boundary: a tree-structured, multi-writer service with
/// whole-subtree reads and a per-subtree atomic read-modify-write. Every
/// balance-affecting operation must go through `transact_user`; a separate
/// read followed by an unguarded write is never correct here.
#[async_trait]
pub trait TreeStore: Send + Sync {
    async fn read_user(&self, id: &str) -> Result<Option<User>, StoreError>;

    async fn read_all_users(&self) -> Result<BTreeMap<String, User>, StoreError>;

    async fn find_users_by(
        &self,
        field: UserField,
        value: &str,
    ) -> Result<BTreeMap<String, User>, StoreError>;

    /// Run `body` against the current value of the user's subtree and commit
    /// the result only if no concurrent writer changed the subtree since it
    /// was read; otherwise re-invoke `body` with the fresher value. `body`
    /// must be side-effect free: it may run any number of times before the
    /// commit (or abort) that counts.
    async fn transact_user(&self, id: &str, body: TxBody<'_>)
        -> Result<TxOutcome, StoreError>;

    async fn read_catalog(&self) -> Result<Vec<CatalogEntry>, StoreError>;

    async fn read_site_settings(&self) -> Result<SiteSettings, StoreError>;

    async fn read_payment_details(&self)
        -> Result<BTreeMap<String, PaymentChannel>, StoreError>;
}
