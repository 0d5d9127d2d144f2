//! Wire types of the Admin REST price-rule and discount-code listings, and of
//! the Admin GraphQL collection listing.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// A remote discount rule (`price_rule`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRule {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    /// Signed decimal string, e.g. `"-10.0"`
    #[serde(default)]
    pub value: String,
    /// `percentage` or `fixed_amount`
    #[serde(default)]
    pub value_type: String,
    #[serde(default)]
    pub usage_limit: Option<i64>,
    #[serde(default)]
    pub starts_at: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub ends_at: Option<DateTime<FixedOffset>>,
}

/// A remote discount code belonging to exactly one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCode {
    pub id: i64,
    pub code: String,
    #[serde(default)]
    pub usage_count: i64,
    /// Owning rule as reported by the code listing
    #[serde(default)]
    pub price_rule_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PriceRulesEnvelope {
    #[serde(default)]
    pub price_rules: Vec<RemoteRule>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DiscountCodesEnvelope {
    #[serde(default)]
    pub discount_codes: Vec<RemoteCode>,
}

/// One page of a listing plus the opaque continuation, if any.
///
/// For REST listings `next` is the next-page URL; for GraphQL it is the cursor
/// to pass as `after`.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

/// A storefront collection from the GraphQL `collections` connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCollection {
    /// GraphQL global id, e.g. `gid://shopify/Collection/841564295`
    pub id: String,
    pub handle: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub image: Option<CollectionImage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionImage {
    #[serde(rename = "originalSrc")]
    pub original_src: String,
}

impl RemoteCollection {
    pub fn image_url(&self) -> Option<&str> {
        self.image.as_ref().map(|image| image.original_src.as_str())
    }
}

/// GraphQL response envelope: data plus any top-level errors.
#[derive(Debug, Deserialize)]
pub(crate) struct GraphqlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphqlError {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CollectionsData {
    pub collections: Connection<RemoteCollection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Connection<T> {
    #[serde(default = "Vec::new")]
    pub nodes: Vec<T>,
    pub page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PageInfo {
    pub end_cursor: Option<String>,
    #[serde(default)]
    pub has_next_page: bool,
}

impl PageInfo {
    /// Cursor of the following page; a page claiming more without a cursor ends the listing.
    pub fn next_cursor(self) -> Option<String> {
        if self.has_next_page {
            self.end_cursor
        } else {
            None
        }
    }
}
