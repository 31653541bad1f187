use serde::{Deserialize, Serialize};

/// Admin-managed investment package. Read-only from the transactional core;
/// mutated only through the content-management surface.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: String,
    pub title: String,
    /// Price in cents.
    pub price: i64,
    /// Daily income in cents.
    pub daily_income: i64,
    /// Revenue cycle length in days.
    pub cycle: u32,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

/// Global feature flags, read-mostly. Stale reads are acceptable.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteSettings {
    pub is_site_online: bool,
    pub is_withdrawal_enabled: bool,
}

impl Default for SiteSettings {
    fn default() -> Self {
        SiteSettings {
            is_site_online: true,
            is_withdrawal_enabled: true,
        }
    }
}

/// Where users send manual deposits for one payment method.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentChannel {
    pub number: String,
    #[serde(default)]
    pub logo: Option<String>,
}
