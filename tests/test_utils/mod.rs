//! Test utilities shared by the integration tests.
//!
//! In-memory SQLite with migrations applied, configuration pointed at a
//! wiremock server, and fixtures for the price-rule, discount-code and
//! collection listings.

use std::time::Duration;

use anyhow::{Result, bail};
use chrono::Utc;
use migration::{Migrator, MigratorTrait};
use promo_sync::config::{AppConfig, SchedulerConfig, ShopifyConfig, SyncConfig};
use promo_sync::models::sync_job::{ActiveModel as SyncJobActiveModel, Model as SyncJobModel};
use promo_sync::collection_sync::CollectionSync;
use promo_sync::models::{SyncJobStatus, SyncTrigger};
use promo_sync::shopify::ShopifyClient;
use promo_sync::sync_executor::SyncExecutor;
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use serde_json::{Value, json};
use uuid::Uuid;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path, query_param, query_param_is_missing},
};

pub const ACCESS_TOKEN: &str = "shpat_test_token";

/// Sets up an in-memory SQLite database with all migrations applied.
#[allow(dead_code)]
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Configuration pointed at `server` with pacing disabled.
#[allow(dead_code)]
pub fn test_config(server: &MockServer) -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        database_url: "sqlite::memory:".to_string(),
        shopify: ShopifyConfig {
            admin_api_base: server.uri(),
            access_token: Some(ACCESS_TOKEN.to_string()),
            ..ShopifyConfig::default()
        },
        sync: SyncConfig {
            rule_pacing_ms: 0,
            ..SyncConfig::default()
        },
        scheduler: SchedulerConfig {
            run_on_startup: false,
            ..SchedulerConfig::default()
        },
        ..AppConfig::default()
    }
}

#[allow(dead_code)]
pub fn test_executor(db: &DatabaseConnection, config: &AppConfig) -> SyncExecutor {
    SyncExecutor::from_config(db.clone(), config).expect("executor builds")
}

#[allow(dead_code)]
pub fn test_collection_sync(db: &DatabaseConnection, config: &AppConfig) -> CollectionSync {
    let client = ShopifyClient::new(&config.shopify).expect("client builds");
    CollectionSync::new(db.clone(), client)
}

#[allow(dead_code)]
pub fn rule_json(id: i64) -> Value {
    json!({
        "id": id,
        "title": format!("RULE{id}"),
        "value": "-10.0",
        "value_type": "percentage",
        "usage_limit": null,
        "starts_at": "2026-10-01T00:00:00Z",
        "ends_at": null,
        "created_at": "2026-10-16T00:00:00Z"
    })
}

#[allow(dead_code)]
pub fn code_json(id: i64, rule_id: i64) -> Value {
    json!({
        "id": id,
        "price_rule_id": rule_id,
        "code": format!("CODE{id}"),
        "usage_count": 0
    })
}

#[allow(dead_code)]
fn page_response(server: &MockServer, listing: &str, body: Value, next: Option<&str>) -> ResponseTemplate {
    let mut response = ResponseTemplate::new(200).set_body_json(body);
    if let Some(next) = next {
        response = response.insert_header(
            "Link",
            format!(
                "<{}{}?limit=250&page_info={}>; rel=\"next\"",
                server.uri(),
                listing,
                next
            )
            .as_str(),
        );
    }
    response
}

/// Mount one page of the rule listing. `page_info` of `None` is the first page.
#[allow(dead_code)]
pub async fn mount_rule_page(
    server: &MockServer,
    page_info: Option<&str>,
    rules: Vec<Value>,
    next: Option<&str>,
) {
    let listing = "/price_rules.json";
    let response = page_response(server, listing, json!({ "price_rules": rules }), next);
    let mock = Mock::given(method("GET"))
        .and(path(listing))
        .and(header("X-Shopify-Access-Token", ACCESS_TOKEN));
    match page_info {
        Some(cursor) => mock.and(query_param("page_info", cursor)),
        None => mock.and(query_param_is_missing("page_info")),
    }
    .respond_with(response)
    .mount(server)
    .await;
}

/// Mount one page of a rule's code listing.
#[allow(dead_code)]
pub async fn mount_code_page(
    server: &MockServer,
    rule_id: i64,
    page_info: Option<&str>,
    codes: Vec<Value>,
    next: Option<&str>,
) {
    let listing = format!("/price_rules/{rule_id}/discount_codes.json");
    let response = page_response(server, &listing, json!({ "discount_codes": codes }), next);
    let mock = Mock::given(method("GET"))
        .and(path(listing.as_str()))
        .and(header("X-Shopify-Access-Token", ACCESS_TOKEN));
    match page_info {
        Some(cursor) => mock.and(query_param("page_info", cursor)),
        None => mock.and(query_param_is_missing("page_info")),
    }
    .respond_with(response)
    .mount(server)
    .await;
}

#[allow(dead_code)]
pub fn collection_json(id: i64, handle: &str) -> Value {
    json!({
        "id": format!("gid://shopify/Collection/{id}"),
        "handle": handle,
        "title": handle.to_uppercase(),
        "image": { "originalSrc": format!("https://cdn.test/{handle}.png") }
    })
}

/// GraphQL body of one collection page; `next` becomes `endCursor` with `hasNextPage`.
#[allow(dead_code)]
pub fn collection_page_json(nodes: Vec<Value>, next: Option<&str>) -> Value {
    json!({
        "data": {
            "collections": {
                "nodes": nodes,
                "pageInfo": { "endCursor": next, "hasNextPage": next.is_some() }
            }
        }
    })
}

/// Mount one page of the collection listing, matched on the `after` variable.
#[allow(dead_code)]
pub async fn mount_collection_page(
    server: &MockServer,
    after: Option<&str>,
    nodes: Vec<Value>,
    next: Option<&str>,
) {
    Mock::given(method("POST"))
        .and(path("/graphql.json"))
        .and(header("X-Shopify-Access-Token", ACCESS_TOKEN))
        .and(body_partial_json(json!({ "variables": { "after": after } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(collection_page_json(nodes, next)))
        .mount(server)
        .await;
}

/// Insert a job row directly, bypassing the ledger transitions.
#[allow(dead_code)]
pub async fn insert_job(
    db: &DatabaseConnection,
    status: SyncJobStatus,
    heartbeat_age: chrono::Duration,
) -> Result<SyncJobModel> {
    let now = Utc::now().fixed_offset();
    let heartbeat = now - heartbeat_age;
    let job = SyncJobActiveModel {
        id: Set(Uuid::new_v4()),
        status: Set(status.as_str().to_string()),
        trigger: Set(SyncTrigger::Scheduled.as_str().to_string()),
        lookback_seconds: Set(None),
        rules_synced: Set(0),
        codes_synced: Set(0),
        started_at: Set((status == SyncJobStatus::Running).then_some(heartbeat)),
        completed_at: Set(None),
        error: Set(None),
        created_at: Set(heartbeat),
        updated_at: Set(heartbeat),
    };
    Ok(job.insert(db).await?)
}

/// Poll the ledger until `job_id` reaches a terminal state.
#[allow(dead_code)]
pub async fn wait_for_terminal(executor: &SyncExecutor, job_id: Uuid) -> Result<SyncJobModel> {
    for _ in 0..400 {
        let job = executor.job_status(job_id).await?;
        if job.is_terminal() {
            return Ok(job);
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    bail!("sync job {job_id} did not finish in time")
}

/// Poll the ledger until a terminal job created by `trigger` shows up.
#[allow(dead_code)]
pub async fn wait_for_trigger(executor: &SyncExecutor, trigger: SyncTrigger) -> Result<SyncJobModel> {
    for _ in 0..200 {
        let jobs = executor.jobs().list_recent(50).await?;
        if let Some(job) = jobs
            .into_iter()
            .find(|job| job.trigger == trigger.as_str() && job.is_terminal())
        {
            return Ok(job);
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    bail!("no finished {trigger} sync job appeared in time")
}
