//! End-to-end export test: a canonical `State` compared against a mocked
//! backend HTTP endpoint via `wiremock`, run through the real
//! `HttpBackendClient` and `ExportPlanner`.

use std::collections::BTreeMap;
use watchstate::backend::{HttpBackendClient, LoggingActionQueue};
use watchstate_core::{ItemType, State};
use watchstate_export::{BackendClient, ExportPlanner, PlannerOptions};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn movie_state(updated: i64, backend_id: &str) -> State {
    let mut guids = BTreeMap::new();
    guids.insert("imdb".to_string(), "tt9".to_string());

    let mut meta = BTreeMap::new();
    meta.insert(
        "jellyfin-main".to_string(),
        watchstate_core::BackendMeta {
            id: Some(backend_id.to_string()),
            watched: "1".to_string(),
            played_at: Some(updated),
            guids: BTreeMap::new(),
            parent: BTreeMap::new(),
        },
    );

    State {
        id: Some(1),
        kind: ItemType::Movie,
        watched: true,
        updated,
        via: "plex".to_string(),
        title: "Arrival".to_string(),
        year: Some(2016),
        season: None,
        episode: None,
        guids,
        parent: BTreeMap::new(),
        metadata: meta,
        extra: BTreeMap::new(),
    }
}

#[tokio::test]
async fn test_planner_skips_backend_already_in_sync() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Items/42"))
        .and(header("X-Emby-Token", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "UserData": { "Played": true, "LastPlayedDate": "2024-01-01T00:00:05Z" },
            "DateCreated": "2023-01-01T00:00:00Z",
        })))
        .mount(&server)
        .await;

    let client = HttpBackendClient::new("jellyfin-main", server.uri(), "secret");
    let queue = LoggingActionQueue;
    let planner = ExportPlanner::new(
        vec![&client as &dyn BackendClient],
        &queue,
        PlannerOptions {
            export_allowed_time_diff: 3600,
            ..PlannerOptions::default()
        },
    );

    let state = movie_state(1_704_067_205, "42"); // 2024-01-01T00:00:05Z
    let stats = planner.plan(&[state], None).await.unwrap();
    assert_eq!(stats.skipped_in_sync, 1);
    assert_eq!(stats.exported, 0);
}

#[tokio::test]
async fn test_planner_exports_when_backend_is_unplayed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Items/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "UserData": { "Played": false, "LastPlayedDate": null },
            "DateCreated": "2023-01-01T00:00:00Z",
        })))
        .mount(&server)
        .await;

    let client = HttpBackendClient::new("jellyfin-main", server.uri(), "secret");
    let queue = LoggingActionQueue;
    let planner = ExportPlanner::new(vec![&client as &dyn BackendClient], &queue, PlannerOptions::default());

    let state = movie_state(1_704_067_200, "42");
    let stats = planner.plan(&[state], None).await.unwrap();
    assert_eq!(stats.exported, 1);
}

#[tokio::test]
async fn test_planner_skips_item_missing_from_backend() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Items/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = HttpBackendClient::new("jellyfin-main", server.uri(), "secret");
    let queue = LoggingActionQueue;
    let planner = ExportPlanner::new(vec![&client as &dyn BackendClient], &queue, PlannerOptions::default());

    let state = movie_state(1_704_067_200, "missing");
    let stats = planner.plan(&[state], None).await.unwrap();
    assert_eq!(stats.skipped_not_found, 1);
}

#[tokio::test]
async fn test_planner_dry_run_counts_without_dispatching() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Items/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "UserData": { "Played": false, "LastPlayedDate": null },
            "DateCreated": "2023-01-01T00:00:00Z",
        })))
        .mount(&server)
        .await;

    let client = HttpBackendClient::new("jellyfin-main", server.uri(), "secret");
    let queue = LoggingActionQueue;
    let planner = ExportPlanner::new(
        vec![&client as &dyn BackendClient],
        &queue,
        PlannerOptions {
            dry_run: true,
            ..PlannerOptions::default()
        },
    );

    let state = movie_state(1_704_067_200, "42");
    let stats = planner.plan(&[state], None).await.unwrap();
    assert_eq!(stats.would_export, 1);
    assert_eq!(stats.exported, 0);
}
