use std::collections::BTreeMap;
use std::sync::Arc;

use crate::models::catalog::{CatalogEntry, PaymentChannel, SiteSettings};
use crate::models::users::User;
use crate::store::{StoreError, Transition, TreeStore, TxOutcome, UserField};

/// Typed access to the ledger tree. Every service goes through this instead
/// of talking to the store directly.
#[derive(Clone)]
pub struct LedgerRepository {
    store: Arc<dyn TreeStore>,
}

impl LedgerRepository {
    pub fn new(store: Arc<dyn TreeStore>) -> Self {
        LedgerRepository { store }
    }

    pub async fn user(&self, id: &str) -> Result<Option<User>, StoreError> {
        self.store.read_user(id).await
    }

    /// Run one atomic transform over a user's subtree. The body may run
    /// several times; see `TreeStore::transact_user`.
    pub async fn transact<F>(&self, id: &str, mut body: F) -> Result<TxOutcome, StoreError>
    where
        F: FnMut(Option<User>) -> Transition + Send,
    {
        self.store.transact_user(id, &mut body).await
    }

    pub async fn find_by_mobile(
        &self,
        mobile: &str,
    ) -> Result<Option<(String, User)>, StoreError> {
        let hits = self
            .store
            .find_users_by(UserField::MobileNumber, mobile)
            .await?;
        Ok(hits.into_iter().next())
    }

    pub async fn find_by_referral_code(
        &self,
        code: &str,
    ) -> Result<Option<(String, User)>, StoreError> {
        let hits = self
            .store
            .find_users_by(UserField::ReferralCode, code)
            .await?;
        Ok(hits.into_iter().next())
    }

    pub async fn referral_code_in_use(&self, code: &str) -> Result<bool, StoreError> {
        Ok(self.find_by_referral_code(code).await?.is_some())
    }

    pub async fn direct_referrals(
        &self,
        referrer_id: &str,
    ) -> Result<BTreeMap<String, User>, StoreError> {
        self.store
            .find_users_by(UserField::ReferrerId, referrer_id)
            .await
    }

    /// Global scan for a recharge reference across every user's history.
    /// The original system runs the same whole-tree scan; the window between
    /// this check and the submitting write is a known, accepted race.
    pub async fn trx_reference_in_use(&self, trx_id: &str) -> Result<bool, StoreError> {
        let users = self.store.read_all_users().await?;
        Ok(users.values().any(|user| {
            user.recharge_history
                .values()
                .any(|request| request.trx_id == trx_id)
        }))
    }

    pub async fn catalog(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        self.store.read_catalog().await
    }

    pub async fn catalog_entry(&self, id: &str) -> Result<Option<CatalogEntry>, StoreError> {
        let entries = self.store.read_catalog().await?;
        Ok(entries.into_iter().find(|entry| entry.id == id))
    }

    pub async fn site_settings(&self) -> Result<SiteSettings, StoreError> {
        self.store.read_site_settings().await
    }

    pub async fn payment_details(
        &self,
    ) -> Result<BTreeMap<String, PaymentChannel>, StoreError> {
        self.store.read_payment_details().await
    }
}
