use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lmsctl::store::FileStore;
use lmsctl::{AuthError, FlowStage, StoreBackend, Token, TokenSource, TokenStore};
use wiremock::{MockServer, ResponseTemplate};

mod common;

use common::token_endpoint::{mount_refresh, token_body};

const MARGIN: Duration = Duration::from_secs(60);

async fn source_for(
    server: &MockServer,
    name: &str,
    stored: &lmsctl::Token,
) -> (tempfile::TempDir, Arc<FileStore>, TokenSource) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path()));
    store.save(name, stored).await.unwrap();
    let instance = common::instance(name, &server.uri());
    let source = TokenSource::for_instance(&instance, store.clone(), MARGIN).unwrap();
    (dir, store, source)
}

async fn call_concurrently(
    source: &TokenSource,
    callers: usize,
) -> Vec<Result<lmsctl::Token, AuthError>> {
    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let source = source.clone();
            tokio::spawn(async move { source.token().await })
        })
        .collect();
    let mut results = Vec::with_capacity(callers);
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ten_callers_inside_margin_share_one_refresh() {
    let server = MockServer::start().await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200).set_body_json(token_body("access-2", Some("refresh-2"), 3600)),
        Duration::from_millis(300),
        1,
    )
    .await;
    let stored = common::stored_token("access-1", Some("refresh-1"), 30);
    let (_dir, store, source) = source_for(&server, "prod", &stored).await;

    let results = call_concurrently(&source, 10).await;
    assert_eq!(results.len(), 10);
    let first = results[0].as_ref().unwrap().clone();
    assert_eq!(first.access_token, "access-2");
    for result in &results {
        assert_eq!(result.as_ref().unwrap(), &first);
    }

    let persisted = store.load("prod").await.unwrap().unwrap();
    assert_eq!(persisted, first);
    assert_eq!(persisted.refresh_token.as_deref(), Some("refresh-2"));

    // Fresh now: served from memory without another request.
    assert_eq!(source.token().await.unwrap(), first);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn revoked_refresh_fails_every_caller_and_keeps_store() {
    let server = MockServer::start().await;
    mount_refresh(
        &server,
        ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked"
        })),
        Duration::from_millis(200),
        1,
    )
    .await;
    let stored = common::stored_token("access-1", Some("refresh-1"), 30);
    let (_dir, store, source) = source_for(&server, "prod", &stored).await;

    for result in call_concurrently(&source, 5).await {
        let err = result.unwrap_err();
        assert!(matches!(err, AuthError::RefreshRevoked { ref instance, .. } if instance == "prod"));
        assert!(err.requires_login());
        assert_eq!(err.stage(), Some(FlowStage::Refreshing));
    }
    assert_eq!(store.load("prod").await.unwrap(), Some(stored.clone()));
    assert_eq!(source.cached(), Some(stored));
}

#[tokio::test]
async fn unauthorized_without_body_is_revoked() {
    let server = MockServer::start().await;
    mount_refresh(&server, ResponseTemplate::new(401), Duration::ZERO, 1).await;
    let stored = common::stored_token("access-1", Some("refresh-1"), 10);
    let (_dir, _store, source) = source_for(&server, "prod", &stored).await;

    assert!(matches!(
        source.token().await.unwrap_err(),
        AuthError::RefreshRevoked { .. }
    ));
}

#[tokio::test]
async fn server_error_is_a_network_error() {
    let server = MockServer::start().await;
    mount_refresh(
        &server,
        ResponseTemplate::new(503).set_body_string("maintenance"),
        Duration::ZERO,
        1,
    )
    .await;
    let stored = common::stored_token("access-1", Some("refresh-1"), 10);
    let (_dir, store, source) = source_for(&server, "prod", &stored).await;

    let err = source.token().await.unwrap_err();
    assert!(matches!(err, AuthError::Network { stage: FlowStage::Refreshing, .. }));
    assert!(err.to_string().contains("maintenance"));
    assert_eq!(store.load("prod").await.unwrap(), Some(stored));
}

#[tokio::test]
async fn refresh_without_new_refresh_token_keeps_the_old_one() {
    let server = MockServer::start().await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200).set_body_json(token_body("access-2", None, 3600)),
        Duration::ZERO,
        1,
    )
    .await;
    let stored = common::stored_token("access-1", Some("refresh-1"), -5);
    let (_dir, store, source) = source_for(&server, "prod", &stored).await;

    let token = source.token().await.unwrap();
    assert_eq!(token.access_token, "access-2");
    assert_eq!(token.refresh_token.as_deref(), Some("refresh-1"));
    assert_eq!(
        store.load("prod").await.unwrap().unwrap().refresh_token.as_deref(),
        Some("refresh-1")
    );
}

/// Reads from a real file store but refuses every write.
struct ReadOnlyStore(FileStore);

#[async_trait]
impl TokenStore for ReadOnlyStore {
    async fn save(&self, _instance: &str, _token: &Token) -> Result<(), AuthError> {
        Err(AuthError::StoreUnavailable("store is read-only".into()))
    }

    async fn load(&self, instance: &str) -> Result<Option<Token>, AuthError> {
        self.0.load(instance).await
    }

    async fn delete(&self, instance: &str) -> Result<(), AuthError> {
        self.0.delete(instance).await
    }

    fn backend(&self) -> StoreBackend {
        StoreBackend::File
    }
}

#[tokio::test]
async fn unsaved_refresh_still_succeeds_and_is_reported() {
    let server = MockServer::start().await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200).set_body_json(token_body("access-2", Some("refresh-2"), 3600)),
        Duration::ZERO,
        1,
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let files = FileStore::new(dir.path());
    let stored = common::stored_token("access-1", Some("refresh-1"), 10);
    files.save("prod", &stored).await.unwrap();

    let instance = common::instance("prod", &server.uri());
    let source =
        TokenSource::for_instance(&instance, Arc::new(ReadOnlyStore(files)), MARGIN).unwrap();
    assert!(source.last_persist_error().is_none());

    let token = source.token().await.unwrap();
    assert_eq!(token.access_token, "access-2");
    assert_eq!(source.cached(), Some(token));
    assert!(matches!(
        source.last_persist_error(),
        Some(AuthError::StoreUnavailable(_))
    ));

    let on_disk = FileStore::new(dir.path()).load("prod").await.unwrap();
    assert_eq!(on_disk, Some(stored));
}

#[tokio::test]
async fn saved_refresh_reports_no_persist_error() {
    let server = MockServer::start().await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200).set_body_json(token_body("access-2", Some("refresh-2"), 3600)),
        Duration::ZERO,
        1,
    )
    .await;
    let stored = common::stored_token("access-1", Some("refresh-1"), 10);
    let (_dir, _store, source) = source_for(&server, "prod", &stored).await;

    source.token().await.unwrap();
    assert!(source.last_persist_error().is_none());
}

#[tokio::test]
async fn fresh_token_needs_no_request() {
    let server = MockServer::start().await;
    common::token_endpoint::forbid_token_requests(&server).await;
    let stored = common::stored_token("access-1", Some("refresh-1"), 3600);
    let (_dir, _store, source) = source_for(&server, "prod", &stored).await;

    assert_eq!(source.access_token().await.unwrap(), "access-1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn instances_refresh_independently() {
    let slow = MockServer::start().await;
    mount_refresh(
        &slow,
        ResponseTemplate::new(200).set_body_json(token_body("slow-2", Some("r"), 3600)),
        Duration::from_millis(1500),
        1,
    )
    .await;
    let fast = MockServer::start().await;
    mount_refresh(
        &fast,
        ResponseTemplate::new(200).set_body_json(token_body("fast-2", Some("r"), 3600)),
        Duration::ZERO,
        1,
    )
    .await;

    let (_a_dir, _a_store, a) =
        source_for(&slow, "a", &common::stored_token("a-1", Some("r"), 10)).await;
    let (_b_dir, _b_store, b) =
        source_for(&fast, "b", &common::stored_token("b-1", Some("r"), 10)).await;

    let pending_a = tokio::spawn(async move { a.token().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let b_token = tokio::time::timeout(Duration::from_millis(1000), b.token())
        .await
        .expect("b must not wait for a")
        .unwrap();
    assert_eq!(b_token.access_token, "fast-2");
    assert!(!pending_a.is_finished());
    assert_eq!(pending_a.await.unwrap().unwrap().access_token, "slow-2");
}
