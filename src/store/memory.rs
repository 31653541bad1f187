use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{StoreError, Transition, TreeStore, TxBody, TxOutcome, UserField, MAX_TX_ATTEMPTS};
use crate::models::catalog::{CatalogEntry, PaymentChannel, SiteSettings};
use crate::models::users::User;

/// In-process tree store with the same compare-and-swap contract as the
/// network-backed one. Each user subtree carries a version counter; a commit
/// only lands if the version is unchanged since the body read it.
#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<String, (u64, User)>,
    catalog: RwLock<Vec<CatalogEntry>>,
    site_settings: RwLock<SiteSettings>,
    payment_details: RwLock<BTreeMap<String, PaymentChannel>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Direct write, bypassing the transform path. Seeding only. Bumps the
    /// version so any in-flight transform sees it as a conflicting commit.
    pub fn put_user(&self, user: User) {
        match self.users.entry(user.id.clone()) {
            Entry::Occupied(mut slot) => {
                let slot = slot.get_mut();
                slot.0 += 1;
                slot.1 = user;
            }
            Entry::Vacant(slot) => {
                slot.insert((1, user));
            }
        }
    }

    pub fn set_catalog(&self, entries: Vec<CatalogEntry>) {
        *self.catalog.write().unwrap() = entries;
    }

    pub fn set_site_settings(&self, settings: SiteSettings) {
        *self.site_settings.write().unwrap() = settings;
    }

    pub fn set_payment_details(&self, details: BTreeMap<String, PaymentChannel>) {
        *self.payment_details.write().unwrap() = details;
    }
}

#[async_trait]
impl TreeStore for MemoryStore {
    async fn read_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(id).map(|entry| entry.1.clone()))
    }

    async fn read_all_users(&self) -> Result<BTreeMap<String, User>, StoreError> {
        Ok(self
            .users
            .iter()
            .map(|entry| (entry.key().clone(), entry.1.clone()))
            .collect())
    }

    async fn find_users_by(
        &self,
        field: UserField,
        value: &str,
    ) -> Result<BTreeMap<String, User>, StoreError> {
        Ok(self
            .users
            .iter()
            .filter(|entry| field.matches(&entry.1, value))
            .map(|entry| (entry.key().clone(), entry.1.clone()))
            .collect())
    }

    async fn transact_user(
        &self,
        id: &str,
        body: TxBody<'_>,
    ) -> Result<TxOutcome, StoreError> {
        for _ in 0..MAX_TX_ATTEMPTS {
            let snapshot = self.users.get(id).map(|entry| (entry.0, entry.1.clone()));

            let next = match body(snapshot.as_ref().map(|(_, user)| user.clone())) {
                Transition::Abort => return Ok(TxOutcome::Aborted),
                Transition::Commit(next) => next,
            };

            match snapshot {
                None => match self.users.entry(id.to_string()) {
                    Entry::Vacant(slot) => {
                        slot.insert((1, next.clone()));
                        return Ok(TxOutcome::Committed(next));
                    }
                    // A concurrent writer created the subtree; re-run the
                    // body against it.
                    Entry::Occupied(_) => continue,
                },
                Some((version, _)) => {
                    if let Some(mut entry) = self.users.get_mut(id) {
                        if entry.0 == version {
                            entry.0 += 1;
                            entry.1 = next.clone();
                            return Ok(TxOutcome::Committed(next));
                        }
                    }
                    // Version moved (or the subtree vanished); retry.
                }
            }
        }

        Err(StoreError::Timeout(format!("users/{}", id)))
    }

    async fn read_catalog(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        Ok(self.catalog.read().unwrap().clone())
    }

    async fn read_site_settings(&self) -> Result<SiteSettings, StoreError> {
        Ok(self.site_settings.read().unwrap().clone())
    }

    async fn read_payment_details(
        &self,
    ) -> Result<BTreeMap<String, PaymentChannel>, StoreError> {
        Ok(self.payment_details.read().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            mobile_number: "01712345678".to_string(),
            full_name: "Test User".to_string(),
            password_hash: String::new(),
            password_salt: String::new(),
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
            referral_code: "12345".to_string(),
            referrer_id: None,
            referrer_code: None,
            registration_date: Utc::now(),
        }
    }

    #[tokio::test]
    async fn commit_lands_and_is_readable() {
        let store = MemoryStore::new();
        store.put_user(user("u1"));

        let outcome = store
            .transact_user("u1", &mut |current| {
                let mut user = current.unwrap();
                user.balance += 500;
                Transition::Commit(user)
            })
            .await
            .unwrap();

        assert!(matches!(outcome, TxOutcome::Committed(_)));
        assert_eq!(store.read_user("u1").await.unwrap().unwrap().balance, 500);
    }

    #[tokio::test]
    async fn abort_leaves_subtree_untouched() {
        let store = MemoryStore::new();
        store.put_user(user("u1"));

        let outcome = store
            .transact_user("u1", &mut |_| Transition::Abort)
            .await
            .unwrap();

        assert!(matches!(outcome, TxOutcome::Aborted));
        assert_eq!(store.read_user("u1").await.unwrap().unwrap().balance, 0);
    }

    #[tokio::test]
    async fn create_if_absent_commits_once() {
        let store = MemoryStore::new();

        let outcome = store
            .transact_user("u2", &mut |current| match current {
                Some(_) => Transition::Abort,
                None => Transition::Commit(user("u2")),
            })
            .await
            .unwrap();
        assert!(matches!(outcome, TxOutcome::Committed(_)));

        let outcome = store
            .transact_user("u2", &mut |current| match current {
                Some(_) => Transition::Abort,
                None => Transition::Commit(user("u2")),
            })
            .await
            .unwrap();
        assert!(matches!(outcome, TxOutcome::Aborted));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_all_land() {
        let store = Arc::new(MemoryStore::new());
        store.put_user(user("u1"));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .transact_user("u1", &mut |current| {
                        let mut user = current.unwrap();
                        user.balance += 1;
                        Transition::Commit(user)
                    })
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.read_user("u1").await.unwrap().unwrap().balance, 8);
    }

    #[tokio::test]
    async fn permanent_contention_exhausts_retries() {
        let store = MemoryStore::new();
        store.put_user(user("u1"));

        // A conflicting write lands between every read and commit, so the
        // transform can never win and must give up with a timeout.
        let result = store
            .transact_user("u1", &mut |current| {
                let mut user = current.unwrap();
                store.put_user(user.clone());
                user.balance += 1;
                Transition::Commit(user)
            })
            .await;

        assert!(matches!(result, Err(StoreError::Timeout(_))));
        assert_eq!(store.read_user("u1").await.unwrap().unwrap().balance, 0);
    }

    #[tokio::test]
    async fn indexed_lookup_matches_field() {
        let store = MemoryStore::new();
        let mut a = user("a");
        a.referral_code = "11111".to_string();
        let mut b = user("b");
        b.referral_code = "22222".to_string();
        b.referrer_id = Some("a".to_string());
        store.put_user(a);
        store.put_user(b);

        let hits = store
            .find_users_by(UserField::ReferralCode, "22222")
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits.contains_key("b"));

        let hits = store
            .find_users_by(UserField::ReferrerId, "a")
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits.contains_key("b"));
    }
}
