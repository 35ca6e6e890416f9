use std::time::Duration;

use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::TOKEN_PATH;

#[allow(dead_code)]
pub fn token_body(access: &str, refresh: Option<&str>, expires_in: i64) -> serde_json::Value {
    let mut body = serde_json::json!({
        "access_token": access,
        "token_type": "Bearer",
        "expires_in": expires_in,
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = serde_json::Value::String(refresh.to_string());
    }
    body
}

/// Token endpoint answering the authorization-code grant, expected `calls` times.
#[allow(dead_code)]
pub async fn mount_code_exchange(server: &MockServer, code: &str, access: &str, calls: u64) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains(format!("code={code}").as_str()))
        .and(body_string_contains("code_verifier="))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body(access, Some("refresh-1"), 3600)),
        )
        .expect(calls)
        .mount(server)
        .await;
}

/// Token endpoint answering the refresh grant after `delay`, expected `calls` times.
#[allow(dead_code)]
pub async fn mount_refresh(
    server: &MockServer,
    response: ResponseTemplate,
    delay: Duration,
    calls: u64,
) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(response.set_delay(delay))
        .expect(calls)
        .mount(server)
        .await;
}

/// Any request to the token endpoint is a test failure.
#[allow(dead_code)]
pub async fn forbid_token_requests(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(server)
        .await;
}
