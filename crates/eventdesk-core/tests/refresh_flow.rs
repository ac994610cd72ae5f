//! End-to-end behaviour of the request pipeline against a mock portal and
//! identity backend.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use eventdesk_core::auth::{
    AuthError, AuthManager, AuthSettings, Credential, CredentialStore, FileCredentialStore,
    HttpIdentityBackend, MemoryCredentialStore, SessionEvent, SignOutReason,
};
use eventdesk_core::{ApiClient, ApiError};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn jwt(exp_offset_secs: i64, subject: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::json!({"sub": subject, "exp": Utc::now().timestamp() + exp_offset_secs})
            .to_string(),
    );
    format!("{header}.{payload}.signature")
}

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

fn client(server: &MockServer, store: Box<dyn CredentialStore>) -> ApiClient {
    let backend =
        HttpIdentityBackend::new(&server.uri(), Duration::from_secs(5)).expect("identity client");
    let auth = AuthManager::new(Arc::new(backend), store, AuthSettings::default());
    ApiClient::new(&server.uri(), Duration::from_secs(5), auth).expect("api client")
}

async fn requests_to(server: &MockServer, route: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == route)
        .count()
}

/// Wait until the mock server has seen `count` requests to `route`
async fn wait_for_requests(server: &MockServer, route: &str, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while requests_to(server, route).await < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {count} request(s) to {route}"));
}

#[tokio::test]
async fn test_concurrent_unauthorized_requests_share_one_refresh() {
    let server = MockServer::start().await;
    let a1 = jwt(-60, "expired");
    let a2 = jwt(3600, "fresh");

    Mock::given(method("GET"))
        .and(path("/events"))
        .and(header("authorization", bearer(&a1).as_str()))
        .respond_with(ResponseTemplate::new(401))
        .expect(5)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .and(header("authorization", bearer(&a2).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{"id": 1}])))
        .expect(5)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(serde_json::json!({"refreshToken": "R1"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"accessToken": a2, "refreshToken": "R2"}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileCredentialStore::new(dir.path().to_path_buf());
    store.save(&Credential::new(a1.clone(), "R1")).expect("seed");
    let api = client(&server, Box::new(store));

    let results = futures::future::join_all(
        (0..5).map(|_| api.get_json::<serde_json::Value>("/events")),
    )
    .await;

    for result in results {
        assert_eq!(result.expect("request"), serde_json::json!([{"id": 1}]));
    }
    assert_eq!(
        api.auth().credential().as_deref(),
        Some(&Credential::new(a2.clone(), "R2"))
    );

    // Persisted as one pair
    let reloaded = FileCredentialStore::new(dir.path().to_path_buf())
        .load()
        .expect("load");
    assert_eq!(reloaded, Some(Credential::new(a2, "R2")));

    server.verify().await;
}

#[tokio::test]
async fn test_expiring_token_refreshes_without_waiting_for_401() {
    let server = MockServer::start().await;
    // 3 minutes left, default window is 5 minutes
    let a1 = jwt(180, "expiring");
    let a2 = jwt(3600, "fresh");

    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"accessToken": a2, "refreshToken": "R2"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let api = client(
        &server,
        Box::new(MemoryCredentialStore::with_credential(Credential::new(a1.clone(), "R1"))),
    );
    let mut events = api.auth().subscribe();

    let response = api
        .send(api.request(reqwest::Method::GET, "/events"))
        .await
        .expect("request");
    assert_eq!(response.status(), 200);

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("refresh in time")
        .expect("event");
    assert_eq!(event, SessionEvent::Refreshed);
    assert_eq!(api.auth().credential().expect("signed in").access_token, a2);

    // The request itself was not held back: it went out with the old token
    let sent = server.received_requests().await.unwrap_or_default();
    let event_request = sent
        .iter()
        .find(|r| r.url.path() == "/events")
        .expect("events request");
    assert_eq!(
        event_request.headers.get("authorization").map(|v| v.as_bytes()),
        Some(bearer(&a1).as_bytes())
    );

    server.verify().await;
}

#[tokio::test]
async fn test_rejected_refresh_fails_every_waiter_and_ends_session() {
    let server = MockServer::start().await;
    let a1 = jwt(3600, "revoked-server-side");

    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(401))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_string("invalid_grant")
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .and(body_json(serde_json::json!({"refreshToken": "R1"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let api = client(
        &server,
        Box::new(MemoryCredentialStore::with_credential(Credential::new(a1, "R1"))),
    );
    let mut events = api.auth().subscribe();

    let results = futures::future::join_all(
        (0..3).map(|_| api.get_json::<serde_json::Value>("/events")),
    )
    .await;

    for result in results {
        match result {
            Err(ApiError::Refresh(AuthError::Rejected { status, body })) => {
                assert_eq!(status, 400);
                assert_eq!(body, "invalid_grant");
            }
            other => panic!("expected refresh rejection, got {other:?}"),
        }
    }
    assert!(api.auth().credential().is_none());

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("sign-out in time")
        .expect("event");
    assert!(matches!(event, SessionEvent::SignedOut(SignOutReason::RefreshFailed(_))));

    wait_for_requests(&server, "/auth/logout", 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err(), "session terminated more than once");

    server.verify().await;
}

#[tokio::test]
async fn test_unauthorized_after_refresh_is_not_retried_again() {
    let server = MockServer::start().await;
    let a1 = jwt(3600, "one");
    let a2 = jwt(7200, "two");

    Mock::given(method("DELETE"))
        .and(path("/events/7"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"accessToken": a2, "refreshToken": "R2"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let api = client(
        &server,
        Box::new(MemoryCredentialStore::with_credential(Credential::new(a1, "R1"))),
    );

    let err = api.delete("/events/7").await.expect_err("should stay unauthorized");
    assert!(matches!(err, ApiError::Unauthorized));
    // The refreshed session is kept; the rejection is an authorization decision
    assert_eq!(api.auth().credential().expect("signed in").access_token, a2);

    server.verify().await;
}

#[tokio::test]
async fn test_other_error_statuses_pass_through_without_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/departments"))
        .respond_with(ResponseTemplate::new(403).set_body_string("organizer role required"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let api = client(
        &server,
        Box::new(MemoryCredentialStore::with_credential(Credential::new(
            jwt(3600, "member"),
            "R1",
        ))),
    );

    let err = api
        .post_json::<serde_json::Value, _>("/departments", &serde_json::json!({"name": "Music"}))
        .await
        .expect_err("forbidden");
    assert!(matches!(err, ApiError::AccessDenied(ref body) if body == "organizer role required"));

    server.verify().await;
}

#[tokio::test]
async fn test_signed_out_requests_carry_no_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/tags"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let api = client(&server, Box::new(MemoryCredentialStore::default()));

    let err = api
        .get_json::<serde_json::Value>("/tags")
        .await
        .expect_err("not signed in");
    assert!(matches!(err, ApiError::Refresh(AuthError::NotSignedIn)));

    let sent = server.received_requests().await.unwrap_or_default();
    assert!(sent[0].headers.get("authorization").is_none());

    server.verify().await;
}

#[tokio::test]
async fn test_sign_in_persists_and_logout_clears_once() {
    let server = MockServer::start().await;
    let a1 = jwt(3600, "ada");

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(
            serde_json::json!({"email": "ada@example.org", "password": "hunter2"}),
        ))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"accessToken": a1, "refreshToken": "R1"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    // Logout notification failing must not keep the session alive
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let api = client(&server, Box::new(FileCredentialStore::new(dir.path().to_path_buf())));

    api.auth()
        .sign_in("ada@example.org", "hunter2")
        .await
        .expect("sign in");

    // A second process picks the session up from disk
    let restored = client(&server, Box::new(FileCredentialStore::new(dir.path().to_path_buf())));
    assert_eq!(
        restored.auth().credential().as_deref(),
        Some(&Credential::new(a1, "R1"))
    );

    assert!(api.auth().logout().await);
    assert!(!api.auth().logout().await);
    assert!(api.auth().credential().is_none());
    assert!(FileCredentialStore::new(dir.path().to_path_buf())
        .load()
        .expect("load")
        .is_none());

    server.verify().await;
}
