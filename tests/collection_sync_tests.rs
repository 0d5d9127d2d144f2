use std::time::Duration;

use promo_sync::error::SyncError;
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

mod test_utils;
use test_utils::{
    collection_json, collection_page_json, mount_collection_page, setup_test_db, test_collection_sync,
    test_config,
};

#[tokio::test]
async fn mirrors_every_collection_page() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_collection_page(
        &server,
        None,
        vec![collection_json(1, "summer"), collection_json(2, "sale")],
        Some("c1"),
    )
    .await;
    mount_collection_page(&server, Some("c1"), vec![collection_json(3, "winter")], None).await;

    let sync = test_collection_sync(&db, &test_config(&server));
    let report = sync.run().await.unwrap().expect("no other pass running");
    assert_eq!(report.pages, 2);
    assert_eq!(report.collections, 3);

    let rows = sync.collections().list(10, 0).await.unwrap();
    let handles: Vec<&str> = rows.iter().map(|row| row.handle.as_str()).collect();
    assert_eq!(handles, vec!["sale", "summer", "winter"]);

    let summer = sync.collections().find_by_handle("summer").await.unwrap().unwrap();
    assert_eq!(summer.shopify_collection_id, "gid://shopify/Collection/1");
    assert_eq!(summer.title, "SUMMER");
    assert_eq!(summer.image_url.as_deref(), Some("https://cdn.test/summer.png"));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let first: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(first["variables"]["first"], json!(250));
    assert!(first["query"].as_str().unwrap().contains("collections"));
}

#[tokio::test]
async fn repeated_passes_refresh_rows_in_place() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_collection_page(
        &server,
        None,
        vec![collection_json(1, "summer"), collection_json(2, "sale")],
        None,
    )
    .await;

    let sync = test_collection_sync(&db, &test_config(&server));
    sync.run().await.unwrap();
    let before = sync.collections().list(10, 0).await.unwrap();
    sync.run().await.unwrap();
    let after = sync.collections().list(10, 0).await.unwrap();

    assert_eq!(before.len(), 2);
    let ids = |rows: &[promo_sync::models::collection::Model]| {
        rows.iter().map(|row| row.id).collect::<Vec<_>>()
    };
    assert_eq!(ids(&before), ids(&after));
}

#[tokio::test]
async fn graphql_errors_fail_the_pass() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [{ "message": "Access denied for collections field." }]
        })))
        .mount(&server)
        .await;

    let sync = test_collection_sync(&db, &test_config(&server));
    let err = sync.run().await.unwrap_err();
    assert_eq!(err.kind(), "upstream_error");
    assert!(err.to_string().contains("Access denied"), "error was {err}");
    assert!(sync.collections().list(10, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn failure_on_a_later_page_keeps_earlier_pages() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_collection_page(&server, None, vec![collection_json(1, "summer")], Some("c1")).await;
    Mock::given(method("POST"))
        .and(path("/graphql.json"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .with_priority(10)
        .mount(&server)
        .await;

    let sync = test_collection_sync(&db, &test_config(&server));
    let err = sync.run().await.unwrap_err();
    assert!(matches!(err, SyncError::Upstream { status: 502, .. }));

    let rows = sync.collections().list(10, 0).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].handle, "summer");
}

#[tokio::test]
async fn rate_limited_page_is_retried() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql.json"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0.05"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_collection_page(&server, None, vec![collection_json(1, "summer")], None).await;

    let sync = test_collection_sync(&db, &test_config(&server));
    let report = sync.run().await.unwrap().unwrap();
    assert_eq!(report.collections, 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn overlapping_pass_is_skipped() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(collection_page_json(vec![collection_json(1, "summer")], None))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let sync = test_collection_sync(&db, &test_config(&server));
    let first = tokio::spawn({
        let sync = sync.clone();
        async move { sync.run().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(sync.run().await.unwrap(), None);
    let report = first.await.unwrap().unwrap();
    assert_eq!(report.map(|report| report.collections), Some(1));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}
