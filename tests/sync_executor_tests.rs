use promo_sync::error::{GATE_REJECTED_REASON, LEASE_EXPIRED_REASON};
use promo_sync::models::{PromoCode, SyncJobStatus, SyncTrigger};
use promo_sync::models::promo_code::{Column as PromoCodeColumn, Model as PromoCodeModel};
use promo_sync::sync_executor::SyncRequest;
use sea_orm::{DatabaseConnection, EntityTrait, QueryOrder};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

mod test_utils;
use test_utils::{
    code_json, insert_job, mount_code_page, mount_rule_page, rule_json, setup_test_db,
    test_config, test_executor, wait_for_terminal,
};

fn manual(lookback_days: i64) -> SyncRequest {
    SyncRequest::new(SyncTrigger::Manual, Some(chrono::Duration::days(lookback_days)))
}

async fn all_codes(db: &DatabaseConnection) -> Vec<PromoCodeModel> {
    PromoCode::find()
        .order_by_asc(PromoCodeColumn::ShopifyCodeId)
        .all(db)
        .await
        .unwrap()
}

#[tokio::test]
async fn one_rule_with_two_codes() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_rule_page(&server, None, vec![rule_json(1)], None).await;
    mount_code_page(
        &server,
        1,
        None,
        vec![
            json!({ "id": 11, "price_rule_id": 1, "code": "CODE11", "usage_count": 3 }),
            json!({ "id": 12, "price_rule_id": 1, "code": "CODE12", "usage_count": 5 }),
        ],
        None,
    )
    .await;

    let executor = test_executor(&db, &test_config(&server));
    let job = executor.sync_now(manual(30)).await.unwrap();

    assert_eq!(job.job_status(), SyncJobStatus::Completed);
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());
    assert!(job.error.is_none());
    assert_eq!(job.rules_synced, 1);
    assert_eq!(job.codes_synced, 2);
    assert_eq!(job.trigger, "manual");
    assert_eq!(job.lookback_seconds, Some(30 * 24 * 60 * 60));

    let codes = all_codes(&db).await;
    assert_eq!(codes.len(), 2);
    assert_eq!(codes[0].shopify_code_id, 11);
    assert_eq!(codes[0].code, "CODE11");
    assert_eq!(codes[0].shopify_rule_id, 1);
    assert_eq!(codes[0].rule_title, "RULE1");
    assert_eq!(codes[0].value, "-10.0");
    assert_eq!(codes[0].value_type, "percentage");
    assert!(codes[0].starts_at.is_some());
    assert!(codes[0].ends_at.is_none());
    assert_eq!(codes[0].usage_count, 3);
    assert_eq!(codes[1].shopify_rule_id, 1);
    assert_eq!(codes[1].usage_count, 5);

    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn every_code_is_written_once_regardless_of_paging() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_rule_page(&server, None, vec![rule_json(1)], Some("r2")).await;
    mount_rule_page(&server, Some("r2"), vec![rule_json(2)], None).await;
    mount_code_page(&server, 1, None, vec![code_json(11, 1), code_json(12, 1)], Some("c2")).await;
    mount_code_page(&server, 1, Some("c2"), vec![code_json(13, 1), code_json(14, 1)], Some("c3")).await;
    mount_code_page(&server, 1, Some("c3"), vec![code_json(15, 1)], None).await;
    mount_code_page(&server, 2, None, vec![code_json(21, 2)], None).await;

    let executor = test_executor(&db, &test_config(&server));
    let job = executor.sync_now(manual(30)).await.unwrap();

    assert_eq!(job.job_status(), SyncJobStatus::Completed);
    assert_eq!(job.codes_synced, 6);
    assert_eq!(job.rules_synced, 2);

    let ids: Vec<i64> = all_codes(&db)
        .await
        .into_iter()
        .map(|code| code.shopify_code_id)
        .collect();
    assert_eq!(ids, vec![11, 12, 13, 14, 15, 21]);
}

#[tokio::test]
async fn repeated_runs_converge_to_the_same_rows() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_rule_page(&server, None, vec![rule_json(1), rule_json(2)], None).await;
    mount_code_page(&server, 1, None, vec![code_json(11, 1), code_json(12, 1)], None).await;
    mount_code_page(&server, 2, None, vec![code_json(21, 2)], None).await;

    let executor = test_executor(&db, &test_config(&server));

    let snapshot = |codes: Vec<PromoCodeModel>| {
        codes
            .into_iter()
            .map(|code| PromoCodeModel {
                updated_at: code.created_at,
                ..code
            })
            .collect::<Vec<_>>()
    };

    let first = executor.sync_now(manual(30)).await.unwrap();
    assert_eq!(first.job_status(), SyncJobStatus::Completed);
    let after_first = snapshot(all_codes(&db).await);

    let second = executor.sync_now(manual(30)).await.unwrap();
    assert_eq!(second.job_status(), SyncJobStatus::Completed);
    let after_second = snapshot(all_codes(&db).await);

    assert_eq!(after_first.len(), 3);
    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn live_job_rejects_a_second_sync_without_network_calls() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    let executor = test_executor(&db, &test_config(&server));

    let holder = insert_job(&db, SyncJobStatus::Running, chrono::Duration::seconds(5))
        .await
        .unwrap();

    let rejected = executor.sync_now(manual(30)).await.unwrap();
    assert_eq!(rejected.job_status(), SyncJobStatus::Failed);
    assert_eq!(rejected.error.as_deref(), Some(GATE_REJECTED_REASON));
    assert!(rejected.started_at.is_none());

    assert_eq!(executor.start_sync(manual(30)).await.unwrap(), None);

    let jobs = executor.jobs().list_recent(10).await.unwrap();
    assert_eq!(jobs.len(), 3);
    let failed = jobs
        .iter()
        .filter(|job| job.error.as_deref() == Some(GATE_REJECTED_REASON))
        .count();
    assert_eq!(failed, 2);

    let holder = executor.job_status(holder.id).await.unwrap();
    assert_eq!(holder.job_status(), SyncJobStatus::Running);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn abandoned_job_is_reclaimed_by_the_lease() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_rule_page(&server, None, vec![rule_json(1)], None).await;
    mount_code_page(&server, 1, None, vec![code_json(11, 1)], None).await;

    let executor = test_executor(&db, &test_config(&server));
    let stale = insert_job(&db, SyncJobStatus::Running, chrono::Duration::hours(2))
        .await
        .unwrap();
    assert!(!executor.jobs().has_active().await.unwrap());

    let job = executor.sync_now(manual(30)).await.unwrap();
    assert_eq!(job.job_status(), SyncJobStatus::Completed);

    let stale = executor.job_status(stale.id).await.unwrap();
    assert_eq!(stale.job_status(), SyncJobStatus::Failed);
    assert_eq!(stale.error.as_deref(), Some(LEASE_EXPIRED_REASON));
    assert!(stale.completed_at.is_some());
}

#[tokio::test]
async fn exhausted_rate_limit_fails_the_job() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/price_rules.json"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0.01"))
        .mount(&server)
        .await;

    let executor = test_executor(&db, &test_config(&server));
    let job = executor.sync_now(manual(30)).await.unwrap();

    assert_eq!(job.job_status(), SyncJobStatus::Failed);
    let error = job.error.unwrap_or_default();
    assert!(error.contains("rate limit exceeded"), "error was {error}");
    assert!(job.completed_at.is_some());
    assert_eq!(server.received_requests().await.unwrap().len(), 6);
    assert!(all_codes(&db).await.is_empty());
    assert!(!executor.jobs().has_active().await.unwrap());
}

#[tokio::test]
async fn failure_midway_keeps_committed_batches() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_rule_page(&server, None, vec![rule_json(1), rule_json(2)], None).await;
    mount_code_page(&server, 1, None, vec![code_json(11, 1)], None).await;
    Mock::given(method("GET"))
        .and(path("/price_rules/2/discount_codes.json"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let executor = test_executor(&db, &test_config(&server));
    let job = executor.sync_now(manual(30)).await.unwrap();

    assert_eq!(job.job_status(), SyncJobStatus::Failed);
    assert!(job.error.unwrap_or_default().contains("502"));
    assert_eq!(job.codes_synced, 1);

    let codes = all_codes(&db).await;
    assert_eq!(codes.len(), 1);
    assert_eq!(codes[0].shopify_code_id, 11);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn start_sync_runs_in_the_background() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_rule_page(&server, None, vec![rule_json(1)], None).await;
    mount_code_page(&server, 1, None, vec![code_json(11, 1)], None).await;

    let executor = test_executor(&db, &test_config(&server));
    let job_id = executor
        .start_sync(SyncRequest::new(SyncTrigger::Manual, None))
        .await
        .unwrap()
        .expect("gate is free");

    let job = wait_for_terminal(&executor, job_id).await.unwrap();
    assert_eq!(job.job_status(), SyncJobStatus::Completed);
    assert_eq!(job.lookback_seconds, None);
    assert_eq!(all_codes(&db).await.len(), 1);

    let requests = server.received_requests().await.unwrap();
    assert!(
        !requests[0]
            .url
            .query_pairs()
            .any(|(key, _)| key == "created_at_min")
    );
}

#[tokio::test]
async fn execute_claims_an_enqueued_job() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_rule_page(&server, None, vec![], None).await;

    let executor = test_executor(&db, &test_config(&server));
    let pending = executor.enqueue(manual(1)).await.unwrap();
    assert_eq!(pending.job_status(), SyncJobStatus::Pending);

    let job = executor.execute(pending.id).await.unwrap();
    assert_eq!(job.id, pending.id);
    assert_eq!(job.job_status(), SyncJobStatus::Completed);
    assert_eq!(job.rules_synced, 0);
}

#[tokio::test]
async fn slow_walk_without_codes_keeps_its_lease() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_rule_page(
        &server,
        None,
        vec![rule_json(1), rule_json(2), rule_json(3)],
        None,
    )
    .await;
    for rule_id in 1..=3 {
        mount_code_page(&server, rule_id, None, vec![], None).await;
    }

    let mut config = test_config(&server);
    config.sync.lease_seconds = 2;
    config.sync.rule_pacing_ms = 1200;
    let executor = test_executor(&db, &config);

    let first = executor
        .start_sync(manual(30))
        .await
        .unwrap()
        .expect("gate is free");

    // Past the lease while the first run is still pacing between code-less rules
    tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
    let walking = executor.job_status(first).await.unwrap();
    assert_eq!(walking.job_status(), SyncJobStatus::Running);
    assert!(executor.jobs().has_active().await.unwrap());
    assert_eq!(executor.start_sync(manual(30)).await.unwrap(), None);

    let first = wait_for_terminal(&executor, first).await.unwrap();
    assert_eq!(first.job_status(), SyncJobStatus::Completed);
    assert!(first.error.is_none());
    assert_eq!(first.rules_synced, 3);
    assert_eq!(first.codes_synced, 0);

    let jobs = executor.jobs().list_recent(10).await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(
        jobs.iter()
            .all(|job| job.error.as_deref() != Some(LEASE_EXPIRED_REASON))
    );
}
