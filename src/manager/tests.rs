use super::*;
use crate::credentials::UserType;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use mockito::{Matcher, Mock, ServerGuard};
use serde_json::json;

const CUSTOM_VALUES: &str = "/locations/loc_123/customValues";

fn make_upstream(server: &ServerGuard) -> Upstream {
    let key = BASE64.encode([0u8; 32]);
    let store = Arc::new(CredentialStore::new(":memory:", &key).unwrap());
    let http = reqwest::Client::new();
    let oauth = OAuthClient::new(
        http.clone(),
        &server.url(),
        "app-client",
        "app-secret",
        "http://localhost:3000/api/v1/auth/authorize",
    );
    Upstream::new(store, oauth, http, &server.url(), "2021-07-28")
}

fn seed_location(upstream: &Upstream, access_token: &str, refresh_token: &str) {
    let record = CredentialRecord {
        location_id: Some("loc_123".to_string()),
        user_type: Some(UserType::Location),
        ..CredentialRecord::new(access_token, refresh_token)
    };
    upstream.store().upsert("loc_123", &record).unwrap();
}

async fn resource_mock(
    server: &mut ServerGuard,
    token: &str,
    status: usize,
    body: &str,
    hits: usize,
) -> Mock {
    server
        .mock("GET", CUSTOM_VALUES)
        .match_header("authorization", format!("Bearer {}", token).as_str())
        .match_header("version", "2021-07-28")
        .with_status(status)
        .with_header("content-type", "application/json")
        .with_body(body)
        .expect(hits)
        .create_async()
        .await
}

async fn refresh_mock(
    server: &mut ServerGuard,
    refresh_token: &str,
    user_type: &str,
    hits: usize,
) -> Mock {
    server
        .mock("POST", "/oauth/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            Matcher::UrlEncoded("refresh_token".into(), refresh_token.into()),
            Matcher::UrlEncoded("user_type".into(), user_type.into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"new","refresh_token":"r2","expires_in":3600}"#)
        .expect(hits)
        .create_async()
        .await
}

#[tokio::test]
async fn test_call_success_without_refresh() {
    let mut server = mockito::Server::new_async().await;
    let upstream = make_upstream(&server);
    seed_location(&upstream, "old", "r1");

    let ok = resource_mock(&mut server, "old", 200, r#"{"customValues":[]}"#, 1).await;
    let token = refresh_mock(&mut server, "r1", "Location", 0).await;

    let response = upstream
        .manager("loc_123")
        .call(Method::GET, CUSTOM_VALUES, RequestBody::Empty)
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, json!({"customValues": []}));
    ok.assert_async().await;
    token.assert_async().await;
}

#[tokio::test]
async fn test_401_refreshes_once_and_retries_once() {
    let mut server = mockito::Server::new_async().await;
    let upstream = make_upstream(&server);
    seed_location(&upstream, "old", "r1");

    let rejected = resource_mock(&mut server, "old", 401, r#"{"msg":"Invalid JWT"}"#, 1).await;
    let token = refresh_mock(&mut server, "r1", "Location", 1).await;
    let accepted = resource_mock(&mut server, "new", 200, r#"{"customValues":[{"id":"cv_1"}]}"#, 1).await;

    let response = upstream
        .manager("loc_123")
        .call(Method::GET, CUSTOM_VALUES, RequestBody::Empty)
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["customValues"][0]["id"], "cv_1");

    let stored = upstream.store().find("loc_123").unwrap().unwrap();
    assert_eq!(stored.access_token, "new");
    assert_eq!(stored.refresh_token, "r2");
    assert_eq!(stored.expires_in, 3600);

    rejected.assert_async().await;
    token.assert_async().await;
    accepted.assert_async().await;
}

#[tokio::test]
async fn test_second_401_fails_without_third_attempt() {
    let mut server = mockito::Server::new_async().await;
    let upstream = make_upstream(&server);
    seed_location(&upstream, "old", "r1");

    let rejected = resource_mock(&mut server, "old", 401, "{}", 1).await;
    let token = refresh_mock(&mut server, "r1", "Location", 1).await;
    let rejected_again = resource_mock(&mut server, "new", 401, "{}", 1).await;

    let err = upstream
        .manager("loc_123")
        .call(Method::GET, CUSTOM_VALUES, RequestBody::Empty)
        .await
        .unwrap_err();

    assert!(
        matches!(err, TokenError::AuthenticationFailed { ref tenant, .. } if tenant == "loc_123"),
        "unexpected error: {err:?}"
    );
    rejected.assert_async().await;
    token.assert_async().await;
    rejected_again.assert_async().await;
}

#[tokio::test]
async fn test_non_401_error_is_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let upstream = make_upstream(&server);
    seed_location(&upstream, "old", "r1");

    let limited = resource_mock(&mut server, "old", 429, r#"{"message":"Too many requests"}"#, 1).await;
    let token = refresh_mock(&mut server, "r1", "Location", 0).await;

    let err = upstream
        .manager("loc_123")
        .call(Method::GET, CUSTOM_VALUES, RequestBody::Empty)
        .await
        .unwrap_err();

    match err {
        TokenError::Upstream { status, body, .. } => {
            assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
            assert!(body.contains("Too many requests"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    limited.assert_async().await;
    token.assert_async().await;
}

#[tokio::test]
async fn test_failed_refresh_is_authentication_failure() {
    let mut server = mockito::Server::new_async().await;
    let upstream = make_upstream(&server);
    seed_location(&upstream, "old", "revoked");

    let rejected = resource_mock(&mut server, "old", 401, "{}", 1).await;
    let token = server
        .mock("POST", "/oauth/token")
        .with_status(400)
        .with_body(r#"{"error":"invalid_grant"}"#)
        .expect(1)
        .create_async()
        .await;

    let err = upstream
        .manager("loc_123")
        .call(Method::GET, CUSTOM_VALUES, RequestBody::Empty)
        .await
        .unwrap_err();

    match err {
        TokenError::AuthenticationFailed { reason, .. } => assert!(reason.contains("invalid_grant")),
        other => panic!("unexpected error: {other:?}"),
    }

    let stored = upstream.store().find("loc_123").unwrap().unwrap();
    assert_eq!(stored.access_token, "old");
    assert_eq!(stored.refresh_token, "revoked");

    rejected.assert_async().await;
    token.assert_async().await;
}

#[tokio::test]
async fn test_unknown_tenant() {
    let mut server = mockito::Server::new_async().await;
    let upstream = make_upstream(&server);

    let token = server
        .mock("POST", "/oauth/token")
        .expect(0)
        .create_async()
        .await;
    let resource = server
        .mock("GET", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let manager = upstream.manager("loc_missing");

    let err = manager.refresh().await.unwrap_err();
    assert!(matches!(err, TokenError::TenantNotFound(ref t) if t == "loc_missing"));

    let err = manager
        .call(Method::GET, CUSTOM_VALUES, RequestBody::Empty)
        .await
        .unwrap_err();
    assert!(matches!(err, TokenError::TenantNotFound(_)));

    assert!(upstream.store().find("loc_missing").unwrap().is_none());
    token.assert_async().await;
    resource.assert_async().await;
}

#[tokio::test]
async fn test_refresh_sends_company_user_type() {
    let mut server = mockito::Server::new_async().await;
    let upstream = make_upstream(&server);
    let record = CredentialRecord {
        company_id: Some("cmp_456".to_string()),
        user_type: Some(UserType::Company),
        ..CredentialRecord::new("old", "r1")
    };
    upstream.store().upsert("cmp_456", &record).unwrap();

    let token = refresh_mock(&mut server, "r1", "Company", 1).await;

    let new_token = upstream.manager("cmp_456").refresh().await.unwrap();
    assert_eq!(new_token, "new");

    let stored = upstream.store().find("cmp_456").unwrap().unwrap();
    assert_eq!(stored.access_token, "new");
    assert_eq!(stored.refresh_token, "r2");
    assert_eq!(stored.company_id.as_deref(), Some("cmp_456"));
    token.assert_async().await;
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let mut server = mockito::Server::new_async().await;
    let upstream = make_upstream(&server);
    seed_location(&upstream, "old", "r1");

    let rejected = server
        .mock("GET", CUSTOM_VALUES)
        .match_header("authorization", "Bearer old")
        .with_status(401)
        .expect_at_least(1)
        .create_async()
        .await;
    let token = refresh_mock(&mut server, "r1", "Location", 1).await;
    let accepted = resource_mock(&mut server, "new", 200, "{}", 2).await;

    let first = upstream.manager("loc_123");
    let second = upstream.manager("loc_123");
    let (a, b) = tokio::join!(
        first.call(Method::GET, CUSTOM_VALUES, RequestBody::Empty),
        second.call(Method::GET, CUSTOM_VALUES, RequestBody::Empty),
    );

    assert!(a.is_ok(), "first call failed: {:?}", a);
    assert!(b.is_ok(), "second call failed: {:?}", b);
    rejected.assert_async().await;
    token.assert_async().await;
    accepted.assert_async().await;
}

#[tokio::test]
async fn test_json_and_form_bodies() {
    let mut server = mockito::Server::new_async().await;
    let upstream = make_upstream(&server);
    seed_location(&upstream, "old", "r1");

    let create = server
        .mock("POST", CUSTOM_VALUES)
        .match_header("content-type", "application/json")
        .match_body(Matcher::Json(json!({"name": "Industry", "value": "Dental"})))
        .with_status(201)
        .with_body(r#"{"customValue":{"id":"cv_9"}}"#)
        .expect(1)
        .create_async()
        .await;
    let mint = server
        .mock("POST", "/oauth/locationToken")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("companyId".into(), "cmp_456".into()),
            Matcher::UrlEncoded("locationId".into(), "loc_123".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"access_token":"loc_at","refresh_token":"loc_rt","userType":"Location","locationId":"loc_123"}"#)
        .expect(1)
        .create_async()
        .await;

    let manager = upstream.manager("loc_123");
    let response = manager
        .call(
            Method::POST,
            CUSTOM_VALUES,
            RequestBody::Json(json!({"name": "Industry", "value": "Dental"})),
        )
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["customValue"]["id"], "cv_9");

    let tokens = manager.mint_location_token("cmp_456", "loc_123").await.unwrap();
    assert_eq!(tokens.access_token, "loc_at");
    assert_eq!(tokens.user_type, Some(UserType::Location));

    create.assert_async().await;
    mint.assert_async().await;
}

#[tokio::test]
async fn test_retry_resends_identical_body() {
    let mut server = mockito::Server::new_async().await;
    let upstream = make_upstream(&server);
    seed_location(&upstream, "old", "r1");
    let payload = json!({"name": "Industry", "value": "Dental"});

    let rejected = server
        .mock("POST", CUSTOM_VALUES)
        .match_header("authorization", "Bearer old")
        .match_body(Matcher::Json(payload.clone()))
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let token = refresh_mock(&mut server, "r1", "Location", 1).await;
    let accepted = server
        .mock("POST", CUSTOM_VALUES)
        .match_header("authorization", "Bearer new")
        .match_body(Matcher::Json(payload.clone()))
        .with_status(201)
        .with_body(r#"{"customValue":{"id":"cv_9"}}"#)
        .expect(1)
        .create_async()
        .await;

    let response = upstream
        .manager("loc_123")
        .call(Method::POST, CUSTOM_VALUES, RequestBody::Json(payload))
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::CREATED);

    rejected.assert_async().await;
    token.assert_async().await;
    accepted.assert_async().await;
}

#[test]
fn test_parse_body() {
    assert_eq!(parse_body(String::new()), Value::Null);
    assert_eq!(parse_body("{\"a\":1}".to_string()), json!({"a": 1}));
    assert_eq!(parse_body("plain".to_string()), Value::String("plain".to_string()));
}
