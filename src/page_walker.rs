//! Cursor-driven traversal of rules and their codes, and of the collection
//! listing.
//!
//! Both walkers are pull-based: nothing is fetched until the caller asks for
//! the next batch, so a rule page is never requested before every code page of
//! the previous rule page has been handed out.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::shopify::{RemoteCode, RemoteCollection, RemoteRule, ShopifyClient};

/// One non-empty page of codes together with the rule that owns them.
#[derive(Debug, Clone)]
pub struct CodeBatch {
    pub rule: Arc<RemoteRule>,
    pub codes: Vec<RemoteCode>,
}

/// Counters of what the walker has fetched so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub rule_pages: u64,
    /// Rules whose codes have been fully drained
    pub rules: u64,
    pub code_pages: u64,
    pub codes: u64,
}

struct RuleCursor {
    rule: Arc<RemoteRule>,
    next_url: Option<String>,
}

/// Lazy, finite, non-restartable sequence of [`CodeBatch`]es.
pub struct PageWalker {
    client: ShopifyClient,
    pacing: Duration,
    next_rules_url: Option<String>,
    pending_rules: VecDeque<RemoteRule>,
    current: Option<RuleCursor>,
    done: bool,
    stats: WalkStats,
}

impl PageWalker {
    /// Walk starting from an explicit first rule-listing URL.
    pub fn new(client: ShopifyClient, first_rules_url: String, pacing: Duration) -> Self {
        Self {
            client,
            pacing,
            next_rules_url: Some(first_rules_url),
            pending_rules: VecDeque::new(),
            current: None,
            done: false,
            stats: WalkStats::default(),
        }
    }

    /// Walk rules created within `lookback` of now, or every rule when `None`.
    pub fn for_window(
        client: ShopifyClient,
        lookback: Option<chrono::Duration>,
        pacing: Duration,
    ) -> Result<Self, SyncError> {
        let created_at_min = lookback.map(|window| Utc::now() - window);
        let first = client.rules_url(created_at_min)?;
        Ok(Self::new(client, first, pacing))
    }

    pub fn stats(&self) -> WalkStats {
        self.stats
    }

    /// Next batch of codes, or `None` once every rule has been drained.
    ///
    /// After an error or exhaustion the walker yields `None` forever.
    pub async fn next_batch(&mut self) -> Result<Option<CodeBatch>, SyncError> {
        if self.done {
            return Ok(None);
        }

        match self.advance().await {
            Ok(Some(batch)) => Ok(Some(batch)),
            Ok(None) => {
                self.done = true;
                debug!(stats = ?self.stats, "Page walk exhausted");
                Ok(None)
            }
            Err(err) => {
                self.done = true;
                Err(err)
            }
        }
    }

    async fn advance(&mut self) -> Result<Option<CodeBatch>, SyncError> {
        loop {
            if let Some(cursor) = self.current.as_mut() {
                if let Some(url) = cursor.next_url.take() {
                    let page = self.client.fetch_codes_page(&url).await?;
                    self.stats.code_pages += 1;
                    self.stats.codes += page.items.len() as u64;
                    cursor.next_url = page.next;

                    let foreign = foreign_codes(cursor.rule.id, &page.items);
                    if foreign > 0 {
                        warn!(
                            rule_id = cursor.rule.id,
                            foreign,
                            "Code listing returned codes owned by another rule"
                        );
                    }

                    if page.items.is_empty() {
                        continue;
                    }
                    return Ok(Some(CodeBatch {
                        rule: Arc::clone(&cursor.rule),
                        codes: page.items,
                    }));
                }

                // Rule drained
                self.current = None;
                self.stats.rules += 1;
                if !self.pacing.is_zero() {
                    sleep(self.pacing).await;
                }
                continue;
            }

            if let Some(rule) = self.pending_rules.pop_front() {
                let first = self.client.codes_url(rule.id)?;
                self.current = Some(RuleCursor {
                    rule: Arc::new(rule),
                    next_url: Some(first),
                });
                continue;
            }

            if let Some(url) = self.next_rules_url.take() {
                let page = self.client.fetch_rules_page(&url).await?;
                self.stats.rule_pages += 1;
                debug!(url, rules = page.items.len(), "Fetched rule page");
                self.pending_rules.extend(page.items);
                self.next_rules_url = page.next;
                continue;
            }

            return Ok(None);
        }
    }
}

enum CollectionCursor {
    Start,
    After(String),
    Done,
}

/// Lazy, finite, non-restartable sequence of collection pages, following
/// GraphQL `endCursor` while `hasNextPage` holds.
pub struct CollectionWalker {
    client: ShopifyClient,
    cursor: CollectionCursor,
    pages: u64,
    collections: u64,
}

impl CollectionWalker {
    pub fn new(client: ShopifyClient) -> Self {
        Self {
            client,
            cursor: CollectionCursor::Start,
            pages: 0,
            collections: 0,
        }
    }

    /// Pages fetched and collections seen so far.
    pub fn counts(&self) -> (u64, u64) {
        (self.pages, self.collections)
    }

    /// Next non-empty page of collections, or `None` once the listing is exhausted.
    ///
    /// After an error or exhaustion the walker yields `None` forever.
    pub async fn next_page(&mut self) -> Result<Option<Vec<RemoteCollection>>, SyncError> {
        loop {
            let after = match std::mem::replace(&mut self.cursor, CollectionCursor::Done) {
                CollectionCursor::Done => return Ok(None),
                CollectionCursor::Start => None,
                CollectionCursor::After(cursor) => Some(cursor),
            };

            let page = self.client.fetch_collections_page(after.as_deref()).await?;
            self.pages += 1;
            self.collections += page.items.len() as u64;
            if let Some(next) = page.next {
                self.cursor = CollectionCursor::After(next);
            }

            if !page.items.is_empty() {
                return Ok(Some(page.items));
            }
        }
    }
}

/// Codes whose reported owner differs from the rule whose listing returned them.
///
/// They are still written under the listing rule; the count only feeds a warning.
fn foreign_codes(rule_id: i64, codes: &[RemoteCode]) -> usize {
    codes
        .iter()
        .filter(|code| code.price_rule_id.is_some_and(|owner| owner != rule_id))
        .count()
}
