use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ETAG, IF_MATCH};
use reqwest::StatusCode;
use serde_json::Value;

use super::{StoreError, Transition, TreeStore, TxBody, TxOutcome, UserField, MAX_TX_ATTEMPTS};
use crate::models::catalog::{CatalogEntry, PaymentChannel, SiteSettings};
use crate::models::users::User;

/// Bound on plain transport retries for a single read or write.
const TRANSPORT_ATTEMPTS: u32 = 3;

/// REST client for a JSON-tree realtime database. Atomicity comes from the
/// server's ETag protocol: a read tagged `X-Firebase-ETag` returns the
/// subtree's current tag, and a `PUT` carrying `if-match` only lands if the
/// tag still matches; `412` means a concurrent writer got there first and the
/// transform body is re-run against the fresher value.
pub struct RtdbStore {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl RtdbStore {
    pub fn new(base_url: &str, auth_token: Option<String>) -> Self {
        RtdbStore {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path)
    }

    fn auth_query(&self) -> Vec<(&'static str, String)> {
        match &self.auth_token {
            Some(token) => vec![("auth", token.clone())],
            None => Vec::new(),
        }
    }

    async fn read_value(&self, path: &str) -> Result<Value, StoreError> {
        let url = self.url(path);
        let mut last_failure = String::new();

        for attempt in 1..=TRANSPORT_ATTEMPTS {
            let result = self
                .client
                .get(&url)
                .query(&self.auth_query())
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    return response
                        .json()
                        .await
                        .map_err(|e| StoreError::Malformed(format!("{}: {}", path, e)));
                }
                Ok(response) => {
                    last_failure = format!("{} returned {}", path, response.status());
                }
                Err(e) => {
                    last_failure = format!("{}: {}", path, e);
                }
            }

            tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
        }

        Err(StoreError::Unavailable(last_failure))
    }

    async fn read_tagged_user(
        &self,
        id: &str,
    ) -> Result<(String, Option<User>), StoreError> {
        let path = format!("users/{}", id);
        let url = self.url(&path);
        let mut last_failure = String::new();

        for attempt in 1..=TRANSPORT_ATTEMPTS {
            let result = self
                .client
                .get(&url)
                .query(&self.auth_query())
                .header("X-Firebase-ETag", "true")
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    let etag = response
                        .headers()
                        .get(ETAG)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                        .ok_or_else(|| {
                            StoreError::Unavailable(format!("{}: no etag in response", path))
                        })?;
                    let value: Value = response
                        .json()
                        .await
                        .map_err(|e| StoreError::Malformed(format!("{}: {}", path, e)))?;
                    return Ok((etag, parse_user(&path, value)?));
                }
                Ok(response) => {
                    last_failure = format!("{} returned {}", path, response.status());
                }
                Err(e) => {
                    last_failure = format!("{}: {}", path, e);
                }
            }

            tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
        }

        Err(StoreError::Unavailable(last_failure))
    }
}

fn parse_user(path: &str, value: Value) -> Result<Option<User>, StoreError> {
    if value.is_null() {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| StoreError::Malformed(format!("{}: {}", path, e)))
}

fn parse_user_map(value: Value) -> BTreeMap<String, User> {
    let Value::Object(entries) = value else {
        return BTreeMap::new();
    };

    let mut users = BTreeMap::new();
    for (id, entry) in entries {
        match serde_json::from_value(entry) {
            Ok(user) => {
                users.insert(id, user);
            }
            Err(e) => {
                // One corrupt subtree must not take every scan down with it.
                log::warn!("skipping malformed user record users/{}: {}", id, e);
            }
        }
    }
    users
}

#[async_trait]
impl TreeStore for RtdbStore {
    async fn read_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        let path = format!("users/{}", id);
        let value = self.read_value(&path).await?;
        parse_user(&path, value)
    }

    async fn read_all_users(&self) -> Result<BTreeMap<String, User>, StoreError> {
        let value = self.read_value("users").await?;
        Ok(parse_user_map(value))
    }

    async fn find_users_by(
        &self,
        field: UserField,
        value: &str,
    ) -> Result<BTreeMap<String, User>, StoreError> {
        let url = self.url("users");
        let order_by = format!("\"{}\"", field.key());
        let equal_to = format!("\"{}\"", value);

        let response = self
            .client
            .get(&url)
            .query(&self.auth_query())
            .query(&[("orderBy", order_by.as_str()), ("equalTo", equal_to.as_str())])
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(format!("users query: {}", e)))?;

        if !response.status().is_success() {
            return Err(StoreError::Unavailable(format!(
                "users query returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| StoreError::Malformed(format!("users query: {}", e)))?;
        Ok(parse_user_map(body))
    }

    async fn transact_user(
        &self,
        id: &str,
        body: TxBody<'_>,
    ) -> Result<TxOutcome, StoreError> {
        let path = format!("users/{}", id);
        let url = self.url(&path);

        for _ in 0..MAX_TX_ATTEMPTS {
            let (etag, current) = self.read_tagged_user(id).await?;

            let next = match body(current) {
                Transition::Abort => return Ok(TxOutcome::Aborted),
                Transition::Commit(next) => next,
            };

            let response = self
                .client
                .put(&url)
                .query(&self.auth_query())
                .header(IF_MATCH, &etag)
                .json(&next)
                .send()
                .await
                .map_err(|e| StoreError::Unavailable(format!("{}: {}", path, e)))?;

            if response.status() == StatusCode::PRECONDITION_FAILED {
                // Someone committed between our read and write; go around.
                continue;
            }
            if !response.status().is_success() {
                return Err(StoreError::Unavailable(format!(
                    "{} returned {}",
                    path,
                    response.status()
                )));
            }

            return Ok(TxOutcome::Committed(next));
        }

        Err(StoreError::Timeout(path))
    }

    async fn read_catalog(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        let value = self.read_value("siteContent/investments").await?;
        let entries = match value {
            Value::Null => Vec::new(),
            Value::Array(items) => items
                .into_iter()
                .filter(|item| !item.is_null())
                .map(serde_json::from_value)
                .collect::<Result<_, _>>()
                .map_err(|e| StoreError::Malformed(format!("siteContent/investments: {}", e)))?,
            Value::Object(items) => items
                .into_values()
                .map(serde_json::from_value)
                .collect::<Result<_, _>>()
                .map_err(|e| StoreError::Malformed(format!("siteContent/investments: {}", e)))?,
            _ => {
                return Err(StoreError::Malformed(
                    "siteContent/investments: not a collection".to_string(),
                ))
            }
        };
        Ok(entries)
    }

    async fn read_site_settings(&self) -> Result<SiteSettings, StoreError> {
        let value = self.read_value("siteSettings").await?;
        if value.is_null() {
            return Ok(SiteSettings::default());
        }
        serde_json::from_value(value)
            .map_err(|e| StoreError::Malformed(format!("siteSettings: {}", e)))
    }

    async fn read_payment_details(
        &self,
    ) -> Result<BTreeMap<String, PaymentChannel>, StoreError> {
        let value = self.read_value("paymentDetails").await?;
        if value.is_null() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_value(value)
            .map_err(|e| StoreError::Malformed(format!("paymentDetails: {}", e)))
    }
}
