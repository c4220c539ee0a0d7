use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use dlsgate_application::{
    GrantManager, GrantPolicy, PermissionStore, SystemClock, TokioGrantScheduler,
};
use dlsgate_core::PermissionStoreError;
use dlsgate_domain::RequestId;
use dlsgate_infrastructure::InMemoryGrantLedger;

use super::build_router;
use crate::state::AppState;

const ADMIN_TOKEN: &str = "test-admin-token";

#[derive(Default)]
struct RecordingStore {
    calls: Mutex<Vec<String>>,
    unreachable: AtomicBool,
}

#[async_trait]
impl PermissionStore for RecordingStore {
    async fn grant(
        &self,
        _request_id: RequestId,
        index: &str,
        username: &str,
    ) -> Result<(), PermissionStoreError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(PermissionStoreError::Unreachable(
                "connection refused".to_owned(),
            ));
        }
        self.calls
            .lock()
            .await
            .push(format!("grant {index} {username}"));
        Ok(())
    }

    async fn clear(
        &self,
        _request_id: RequestId,
        index: &str,
        username: &str,
    ) -> Result<(), PermissionStoreError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(PermissionStoreError::Unreachable(
                "connection refused".to_owned(),
            ));
        }
        self.calls
            .lock()
            .await
            .push(format!("clear {index} {username}"));
        Ok(())
    }
}

struct TestApi {
    base_url: String,
    client: reqwest::Client,
    store: Arc<RecordingStore>,
}

impl TestApi {
    async fn start() -> Self {
        let store = Arc::new(RecordingStore::default());
        let clock = Arc::new(SystemClock);
        let grant_manager = GrantManager::new(
            Arc::new(InMemoryGrantLedger::new()),
            store.clone(),
            Arc::new(TokioGrantScheduler::new(clock.clone())),
            clock,
            GrantPolicy::default(),
        );
        let router = build_router(AppState {
            grant_manager,
            admin_token: ADMIN_TOKEN.to_owned(),
            postgres_pool: None,
        });

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|error| panic!("failed to bind test listener: {error}"));
        let address = listener
            .local_addr()
            .unwrap_or_else(|error| panic!("failed to read test listener address: {error}"));
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self {
            base_url: format!("http://{address}"),
            client: reqwest::Client::new(),
            store,
        }
    }

    async fn submit(&self, body: Value) -> (StatusCode, Value) {
        let response = self
            .client
            .post(format!("{}/api/requests", self.base_url))
            .json(&body)
            .send()
            .await
            .unwrap_or_else(|error| panic!("submit failed: {error}"));
        read(response).await
    }

    async fn admin(&self, method: reqwest::Method, path: &str) -> (StatusCode, Value) {
        let response = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
            .unwrap_or_else(|error| panic!("admin call failed: {error}"));
        read(response).await
    }
}

async fn read(response: reqwest::Response) -> (StatusCode, Value) {
    let status = response.status();
    let body = response.json::<Value>().await.unwrap_or(Value::Null);
    (status, body)
}

fn alice_request() -> Value {
    json!({"username": "alice", "index": "logs-prod", "ticket_ref": "INC-42"})
}

#[tokio::test]
async fn health_reports_in_memory_ledger() {
    let api = TestApi::start().await;

    let (status, body) = api.admin(reqwest::Method::GET, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["ledger"]["status"], "memory");
}

#[tokio::test]
async fn submit_creates_pending_request_without_admin_token() {
    let api = TestApi::start().await;

    let (status, body) = api.submit(alice_request()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], 1);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["index"], "logs-prod");
    assert_eq!(body["ticket_ref"], "INC-42");
    assert_eq!(body["status"], "pending");
    assert_eq!(body["expires_at"], Value::Null);
    assert!(api.store.calls.lock().await.is_empty());
}

#[tokio::test]
async fn submit_rejects_blank_fields_and_index_lists() {
    let api = TestApi::start().await;

    let (status, body) = api
        .submit(json!({"username": "  ", "index": "logs-prod", "ticket_ref": "INC-42"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        body["message"]
            .as_str()
            .is_some_and(|message| message.contains("username"))
    );

    let (status, _) = api
        .submit(json!({"username": "alice", "index": "logs-*,audit-*", "ticket_ref": "INC-42"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_routes_require_matching_bearer_token() {
    let api = TestApi::start().await;
    let _ = api.submit(alice_request()).await;

    let anonymous = api
        .client
        .post(format!("{}/api/requests/1/approve", api.base_url))
        .send()
        .await
        .unwrap_or_else(|error| panic!("approve failed: {error}"));
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let wrong_token = api
        .client
        .get(format!("{}/api/requests", api.base_url))
        .bearer_auth("not-the-token")
        .send()
        .await
        .unwrap_or_else(|error| panic!("list failed: {error}"));
    assert_eq!(wrong_token.status(), StatusCode::UNAUTHORIZED);

    assert!(api.store.calls.lock().await.is_empty());
}

#[tokio::test]
async fn approve_then_revoke_walks_the_grant_lifecycle() {
    let api = TestApi::start().await;
    let _ = api.submit(alice_request()).await;

    let (status, approved) = api
        .admin(reqwest::Method::POST, "/api/requests/1/approve")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["status"], "active");
    assert!(approved["approved_at"].is_string());
    assert!(approved["expires_at"].is_string());

    let (status, revoked) = api
        .admin(reqwest::Method::POST, "/api/requests/1/revoke")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(revoked["status"], "revoked");
    assert_eq!(revoked["revocation_cause"], "manual");
    assert!(revoked["ended_at"].is_string());

    let (status, listed) = api.admin(reqwest::Method::GET, "/api/requests").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
    assert_eq!(listed[0]["status"], "revoked");

    assert_eq!(
        *api.store.calls.lock().await,
        vec![
            "grant logs-prod alice".to_owned(),
            "clear logs-prod alice".to_owned(),
        ]
    );
}

#[tokio::test]
async fn unknown_and_malformed_ids_are_rejected() {
    let api = TestApi::start().await;

    let (status, _) = api.admin(reqwest::Method::GET, "/api/requests/99").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = api
        .admin(reqwest::Method::POST, "/api/requests/abc/approve")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unreachable_store_fails_approve_and_leaves_request_pending() {
    let api = TestApi::start().await;
    let _ = api.submit(alice_request()).await;
    api.store.unreachable.store(true, Ordering::SeqCst);

    let (status, body) = api
        .admin(reqwest::Method::POST, "/api/requests/1/approve")
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["message"].is_string());

    let (status, current) = api.admin(reqwest::Method::GET, "/api/requests/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(current["status"], "pending");
}
