//! Rate-limited fetcher for the Shopify Admin REST and GraphQL APIs.
//!
//! Every request carries the static access token. A 429 is retried after the
//! `Retry-After` delay up to a fixed budget; any other failure propagates on
//! the first occurrence.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use metrics::counter;
use regex::Regex;
use reqwest::header::{HeaderMap, LINK, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::config::ShopifyConfig;
use crate::error::{SyncError, truncate_body};
use crate::shopify::types::{
    CollectionsData, DiscountCodesEnvelope, GraphqlResponse, Page, PriceRulesEnvelope,
    RemoteCode, RemoteCollection, RemoteRule,
};

pub const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";

const USER_AGENT: &str = concat!("promo-sync/", env!("CARGO_PKG_VERSION"));

/// Upstream bodies quoted in errors are cut to this many bytes.
const MAX_ERROR_BODY_BYTES: usize = 512;

const COLLECTIONS_QUERY: &str = r#"
query CollectionList($first: Int!, $after: String) {
  collections(first: $first, after: $after) {
    nodes {
      id
      handle
      title
      image {
        originalSrc
      }
    }
    pageInfo {
      endCursor
      hasNextPage
    }
  }
}
"#;

static NEXT_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<([^>]+)>;\s*rel="next""#).expect("next-link pattern is valid")
});

/// Extract the `rel="next"` URL from a `Link` header value.
///
/// Shopify cursors (`page_info`) are opaque, so the URL is taken verbatim.
pub fn next_page_link(link_header: &str) -> Option<String> {
    NEXT_LINK
        .captures(link_header)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Delay requested by a 429 response.
///
/// Accepts integral or fractional seconds. Missing, unparseable or
/// non-positive values fall back to `default`; the result never exceeds `max`.
pub(crate) fn retry_after_delay(headers: &HeaderMap, default: Duration, max: Duration) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(default)
        .min(max)
}

/// HTTP client for the price-rule and discount-code listings.
#[derive(Debug, Clone)]
pub struct ShopifyClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    page_limit: u32,
    max_retries: u32,
    default_retry_after: Duration,
    max_retry_after: Duration,
}

impl ShopifyClient {
    /// Build a client from explicit configuration.
    pub fn new(config: &ShopifyConfig) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            base_url: config.admin_api_base.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone().unwrap_or_default(),
            page_limit: config.page_limit,
            max_retries: config.max_rate_limit_retries,
            default_retry_after: config.default_retry_after(),
            max_retry_after: config.max_retry_after(),
        })
    }

    /// First page of the rule listing, optionally filtered to rules created at or after `created_at_min`.
    pub fn rules_url(&self, created_at_min: Option<DateTime<Utc>>) -> Result<String, SyncError> {
        let mut url = Url::parse(&format!("{}/price_rules.json", self.base_url))?;
        url.query_pairs_mut()
            .append_pair("limit", &self.page_limit.to_string());
        if let Some(min) = created_at_min {
            url.query_pairs_mut().append_pair(
                "created_at_min",
                &min.to_rfc3339_opts(SecondsFormat::Secs, true),
            );
        }
        Ok(url.into())
    }

    pub fn graphql_url(&self) -> Result<String, SyncError> {
        Ok(Url::parse(&format!("{}/graphql.json", self.base_url))?.into())
    }

    /// First page of the code listing of one rule.
    pub fn codes_url(&self, rule_id: i64) -> Result<String, SyncError> {
        let mut url = Url::parse(&format!(
            "{}/price_rules/{}/discount_codes.json",
            self.base_url, rule_id
        ))?;
        url.query_pairs_mut()
            .append_pair("limit", &self.page_limit.to_string());
        Ok(url.into())
    }

    pub async fn fetch_rules_page(&self, url: &str) -> Result<Page<RemoteRule>, SyncError> {
        let (envelope, next) = self.get_json::<PriceRulesEnvelope>(url).await?;
        Ok(Page {
            items: envelope.price_rules,
            next,
        })
    }

    pub async fn fetch_codes_page(&self, url: &str) -> Result<Page<RemoteCode>, SyncError> {
        let (envelope, next) = self.get_json::<DiscountCodesEnvelope>(url).await?;
        Ok(Page {
            items: envelope.discount_codes,
            next,
        })
    }

    /// One page of the collection listing, starting after `after` (`None` for the first page).
    ///
    /// The returned `next` is the cursor of the following page. GraphQL errors
    /// in a 200 response fail the page as `Upstream`.
    pub async fn fetch_collections_page(
        &self,
        after: Option<&str>,
    ) -> Result<Page<RemoteCollection>, SyncError> {
        let url = self.graphql_url()?;
        let body = json!({
            "query": COLLECTIONS_QUERY,
            "variables": { "first": self.page_limit, "after": after },
        });

        let response = self.send(&url, || self.http.post(&url).json(&body)).await?;
        let status = response.status().as_u16();
        let decoded: GraphqlResponse<CollectionsData> = read_json(&url, response).await?;

        if !decoded.errors.is_empty() {
            let messages: Vec<&str> = decoded
                .errors
                .iter()
                .map(|err| err.message.as_str())
                .collect();
            return Err(SyncError::upstream(
                &url,
                status,
                format!("graphql errors: {}", messages.join("; ")),
            ));
        }

        let connection = decoded
            .data
            .ok_or_else(|| SyncError::upstream(&url, status, "graphql response carried no data"))?
            .collections;
        Ok(Page {
            items: connection.nodes,
            next: connection.page_info.next_cursor(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<(T, Option<String>), SyncError> {
        let response = self.get(url).await?;
        let next = response
            .headers()
            .get(LINK)
            .and_then(|h| h.to_str().ok())
            .and_then(next_page_link);
        Ok((read_json(url, response).await?, next))
    }

    /// Issue a GET, retrying only on 429.
    ///
    /// Fails with `RateLimitExceeded` once `max_retries` retries have also been
    /// rejected, `Upstream` on any other non-2xx, `Network` on transport errors.
    pub async fn get(&self, url: &str) -> Result<Response, SyncError> {
        self.send(url, || self.http.get(url)).await
    }

    /// Send the request produced by `build`, rebuilding it for every 429 retry.
    async fn send<F>(&self, url: &str, build: F) -> Result<Response, SyncError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0u32;

        loop {
            let response = build()
                .header(ACCESS_TOKEN_HEADER, &self.access_token)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                debug!(url, status = status.as_u16(), retries, "Fetched page");
                return Ok(response);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                counter!("promo_sync_rate_limited_total").increment(1);
                if retries >= self.max_retries {
                    warn!(url, attempts = retries + 1, "Rate limit retry budget exhausted");
                    return Err(SyncError::RateLimitExceeded {
                        url: url.to_string(),
                        attempts: retries + 1,
                    });
                }

                let wait = retry_after_delay(
                    response.headers(),
                    self.default_retry_after,
                    self.max_retry_after,
                );
                retries += 1;
                warn!(
                    url,
                    retry = retries,
                    wait_ms = wait.as_millis() as u64,
                    "Rate limited by Shopify, backing off"
                );
                sleep(wait).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::upstream(
                url,
                status.as_u16(),
                truncate_body(&body, MAX_ERROR_BODY_BYTES),
            ));
        }
    }
}

async fn read_json<T: DeserializeOwned>(url: &str, response: Response) -> Result<T, SyncError> {
    let status = response.status().as_u16();
    let body = response.text().await?;
    serde_json::from_str(&body)
        .map_err(|err| SyncError::upstream(url, status, format!("malformed response body: {err}")))
}
