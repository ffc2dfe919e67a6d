use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A resolved `product_url -> short_code` mapping, reused within the freshness window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductCacheEntry {
    pub product_url: String,
    pub short_code: String,
    pub resolved_at: DateTime<Utc>,
}

impl ProductCacheEntry {
    /// Fresh while strictly younger than `max_age`.
    pub fn is_fresh(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.resolved_at) < max_age
    }
}
