use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    extract::{ConnectInfo, Request},
    http::{
        StatusCode,
        header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE},
    },
    middleware,
    response::{IntoResponse, Response},
};
use portero::{
    Error,
    directory::{DirectoryClient, Session},
    sso::{FormLogin, LoginFlow, LoginOutcome, Sso, require_session},
};
use secrecy::SecretString;
use serde_json::json;
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};
use tower::ServiceExt;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{basic_auth, body_json, method, path},
};

const COOKIE_NAME: &str = "crowd.token_key";
const CALLER: [u8; 4] = [10, 0, 0, 7];
// 2100-01-01T00:00:00Z in epoch milliseconds
const FAR_FUTURE_MS: i64 = 4_102_444_800_000;

fn can_bind_localhost() -> bool {
    std::net::TcpListener::bind("127.0.0.1:0").is_ok()
}

async fn directory_with_policy() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/usermanagement/1/config/cookie"))
        .and(basic_auth("portero", "app-secret"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"name": COOKIE_NAME, "domain": "", "secure": false})),
        )
        .mount(&server)
        .await;
    server
}

fn sso_for(server: &MockServer) -> Result<Sso> {
    let directory = DirectoryClient::new(
        "portero",
        SecretString::from("app-secret".to_string()),
        &server.uri(),
    )?;
    Ok(Sso::new(directory))
}

/// Protected app with a counter that tracks how often the handler runs.
fn protected(sso: Sso) -> (Router, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    let app = Router::new()
        .fallback(move |request: Request| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let user = request
                    .extensions()
                    .get::<Session>()
                    .and_then(|session| session.username.clone())
                    .unwrap_or_default();
                format!("downstream:{user}")
            }
        })
        .layer(middleware::from_fn_with_state(sso, require_session));

    (app, hits)
}

fn with_caller(mut request: Request) -> Request {
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((CALLER, 50_000))));
    request
}

fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::to_string)
        .collect()
}

async fn body_text(response: Response) -> Result<String> {
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(String::from_utf8(body.to_vec())?)
}

async fn mount_validate(server: &MockServer, token: &str, response: ResponseTemplate, hits: u64) {
    Mock::given(method("POST"))
        .and(path(format!("/rest/usermanagement/1/session/{token}")))
        .and(body_json(json!({
            "validationFactors": [{"name": "remote_address", "value": "10.0.0.7"}]
        })))
        .respond_with(response)
        .expect(hits)
        .mount(server)
        .await;
}

async fn mount_create(server: &MockServer, response: ResponseTemplate, hits: u64) {
    Mock::given(method("POST"))
        .and(path("/rest/usermanagement/1/session"))
        .and(body_json(json!({
            "username": "alice",
            "password": "correct",
            "validation-factors": {
                "validationFactors": [{"name": "remote_address", "value": "10.0.0.7"}]
            }
        })))
        .respond_with(response)
        .expect(hits)
        .mount(server)
        .await;
}

fn session_body(token: &str) -> serde_json::Value {
    json!({
        "token": token,
        "expiry-date": FAR_FUTURE_MS,
        "user": {"name": "alice"}
    })
}

fn login_post(uri: &str, body: &str) -> Result<Request> {
    Ok(with_caller(
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))?,
    ))
}

#[tokio::test]
async fn get_without_cookie_shows_login_form() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = directory_with_policy().await;
    let (app, hits) = protected(sso_for(&server)?);

    let response = app
        .oneshot(with_caller(
            Request::builder().uri("/reports").body(Body::empty())?,
        ))
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).is_empty());
    let body = body_text(response).await?;
    assert!(body.contains(r#"<form method="post">"#));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn post_credentials_sets_session_cookie() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = directory_with_policy().await;
    mount_create(
        &server,
        ResponseTemplate::new(201).set_body_json(session_body("tok-123")),
        1,
    )
    .await;
    let (app, hits) = protected(sso_for(&server)?);

    let response = app
        .oneshot(login_post("/reports?page=2", "username=alice&password=correct")?)
        .await?;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(LOCATION).and_then(|v| v.to_str().ok()),
        Some("/reports?page=2")
    );

    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].starts_with("crowd.token_key=tok-123"));
    assert!(cookies[0].contains("Expires=Fri, 01 Jan 2100 00:00:00 GMT"));
    assert!(cookies[0].contains("HttpOnly"));
    assert!(cookies[0].contains("Path=/"));

    // the login request itself is never forwarded
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn login_redirect_never_leaves_the_gateway() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = directory_with_policy().await;
    mount_create(
        &server,
        ResponseTemplate::new(201).set_body_json(session_body("tok-123")),
        1,
    )
    .await;
    let (app, _) = protected(sso_for(&server)?);

    let response = app
        .oneshot(login_post(
            "//evil.example/phish",
            "username=alice&password=correct",
        )?)
        .await?;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(LOCATION).and_then(|v| v.to_str().ok()),
        Some("/")
    );
    assert_eq!(set_cookies(&response).len(), 1);
    Ok(())
}

#[tokio::test]
async fn login_redirect_keeps_nest_prefix() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = directory_with_policy().await;
    mount_create(
        &server,
        ResponseTemplate::new(201).set_body_json(session_body("tok-123")),
        1,
    )
    .await;
    let (inner, hits) = protected(sso_for(&server)?);
    let app = Router::new().nest("/app", inner);

    let response = app
        .oneshot(login_post(
            "/app/reports?page=2",
            "username=alice&password=correct",
        )?)
        .await?;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(LOCATION).and_then(|v| v.to_str().ok()),
        Some("/app/reports?page=2")
    );
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn login_without_peer_address_skips_the_directory() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = directory_with_policy().await;
    Mock::given(method("POST"))
        .and(path("/rest/usermanagement/1/session"))
        .respond_with(ResponseTemplate::new(201).set_body_json(session_body("tok-123")))
        .expect(0)
        .mount(&server)
        .await;
    let sso = sso_for(&server)?;

    // no ConnectInfo extension
    let submission = || {
        Request::builder()
            .method("POST")
            .uri("/reports")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("username=alice&password=correct"))
    };

    let outcome = FormLogin::new().handle(submission()?, &sso).await;
    assert!(!outcome.authenticated);
    assert_eq!(outcome.response.status(), StatusCode::OK);
    assert!(set_cookies(&outcome.response).is_empty());

    let (app, hits) = protected(sso);
    let response = app.oneshot(submission()?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).is_empty());
    assert!(body_text(response).await?.contains("<form"));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn session_start_failure_emits_no_cookie() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;
    // first fetch is the middleware pass, the second comes from start_session
    Mock::given(method("GET"))
        .and(path("/rest/usermanagement/1/config/cookie"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": COOKIE_NAME})))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/usermanagement/1/config/cookie"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    mount_create(
        &server,
        ResponseTemplate::new(201).set_body_json(session_body("tok-123")),
        1,
    )
    .await;
    let (app, hits) = protected(sso_for(&server)?);

    let response = app
        .oneshot(login_post("/reports", "username=alice&password=correct")?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).is_empty());
    assert!(response.headers().get(LOCATION).is_none());
    assert!(body_text(response).await?.contains("<form"));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn head_without_cookie_is_not_forwarded() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = directory_with_policy().await;
    let (app, hits) = protected(sso_for(&server)?);

    let response = app
        .oneshot(with_caller(
            Request::builder()
                .method("HEAD")
                .uri("/reports")
                .body(Body::empty())?,
        ))
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).is_empty());
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn wrong_password_shows_form_again() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = directory_with_policy().await;
    Mock::given(method("POST"))
        .and(path("/rest/usermanagement/1/session"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "reason": "INVALID_USER_AUTHENTICATION",
            "message": "Failed to authenticate principal, password was invalid"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let (app, hits) = protected(sso_for(&server)?);

    let response = app
        .oneshot(login_post("/", "username=alice&password=wrong")?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).is_empty());
    assert!(body_text(response).await?.contains(r#"name="password""#));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn empty_credentials_skip_the_directory() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = directory_with_policy().await;
    mount_create(&server, ResponseTemplate::new(201), 0).await;
    let (app, _) = protected(sso_for(&server)?);

    let response = app
        .oneshot(login_post("/", "username=alice&password=")?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).is_empty());
    Ok(())
}

#[tokio::test]
async fn valid_cookie_is_forwarded() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = directory_with_policy().await;
    mount_validate(
        &server,
        "tok-123",
        ResponseTemplate::new(200).set_body_json(session_body("tok-123")),
        1,
    )
    .await;
    let (app, hits) = protected(sso_for(&server)?);

    let response = app
        .oneshot(with_caller(
            Request::builder()
                .uri("/reports")
                .header(COOKIE, "theme=dark; crowd.token_key=tok-123")
                .body(Body::empty())?,
        ))
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).is_empty());
    assert_eq!(body_text(response).await?, "downstream:alice");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn rejected_cookie_is_cleared() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = directory_with_policy().await;
    mount_validate(
        &server,
        "tok-stale",
        ResponseTemplate::new(404).set_body_json(json!({
            "reason": "INVALID_SSO_TOKEN",
            "message": "Token does not validate"
        })),
        1,
    )
    .await;
    let (app, hits) = protected(sso_for(&server)?);

    let response = app
        .oneshot(with_caller(
            Request::builder()
                .uri("/reports")
                .header(COOKIE, "crowd.token_key=tok-stale")
                .body(Body::empty())?,
        ))
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].starts_with("crowd.token_key=;"));
    assert!(cookies[0].contains("Max-Age=0"));
    assert!(body_text(response).await?.contains("<form"));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn missing_peer_address_clears_cookie_without_validating() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = directory_with_policy().await;
    Mock::given(method("POST"))
        .and(path("/rest/usermanagement/1/session/tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_body("tok-123")))
        .expect(0)
        .mount(&server)
        .await;
    let (app, hits) = protected(sso_for(&server)?);

    // no ConnectInfo extension
    let response = app
        .oneshot(
            Request::builder()
                .uri("/reports")
                .header(COOKIE, "crowd.token_key=tok-123")
                .body(Body::empty())?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].contains("Max-Age=0"));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn directory_outage_keeps_cookie() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = directory_with_policy().await;
    mount_validate(&server, "tok-123", ResponseTemplate::new(503), 1).await;
    let (app, hits) = protected(sso_for(&server)?);

    let response = app
        .oneshot(with_caller(
            Request::builder()
                .uri("/reports")
                .header(COOKIE, "crowd.token_key=tok-123")
                .body(Body::empty())?,
        ))
        .await?;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(set_cookies(&response).is_empty());
    assert_eq!(body_text(response).await?, "service error");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn stale_cookie_then_login_clears_before_setting() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = directory_with_policy().await;
    mount_validate(&server, "tok-stale", ResponseTemplate::new(404), 1).await;
    mount_create(
        &server,
        ResponseTemplate::new(201).set_body_json(session_body("tok-new")),
        1,
    )
    .await;
    let (app, _) = protected(sso_for(&server)?);

    let mut request = login_post("/", "username=alice&password=correct")?;
    request
        .headers_mut()
        .insert(COOKIE, "crowd.token_key=tok-stale".parse()?);

    let response = app.oneshot(request).await?;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 2);
    assert!(cookies[0].contains("Max-Age=0"));
    assert!(cookies[1].starts_with("crowd.token_key=tok-new"));
    Ok(())
}

#[tokio::test]
async fn other_methods_without_cookie_are_unauthorized() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = directory_with_policy().await;
    let (app, hits) = protected(sso_for(&server)?);

    let response = app
        .oneshot(with_caller(
            Request::builder()
                .method("DELETE")
                .uri("/reports/1")
                .body(Body::empty())?,
        ))
        .await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn cookie_policy_failure_is_a_service_error() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/usermanagement/1/config/cookie"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let (app, hits) = protected(sso_for(&server)?);

    let response = app
        .oneshot(with_caller(
            Request::builder().uri("/").body(Body::empty())?,
        ))
        .await?;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn wrong_application_password_keeps_cookie() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = directory_with_policy().await;
    mount_validate(&server, "tok-123", ResponseTemplate::new(401), 1).await;
    let (app, _) = protected(sso_for(&server)?);

    let response = app
        .oneshot(with_caller(
            Request::builder()
                .uri("/")
                .header(COOKIE, "crowd.token_key=tok-123")
                .body(Body::empty())?,
        ))
        .await?;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(set_cookies(&response).is_empty());
    Ok(())
}

struct Teapot;

#[async_trait]
impl LoginFlow for Teapot {
    async fn handle(&self, _request: Request, _sso: &Sso) -> LoginOutcome {
        LoginOutcome::rejected(StatusCode::IM_A_TEAPOT.into_response())
    }
}

#[tokio::test]
async fn custom_strategies_are_used() -> Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping test: cannot bind localhost");
        return Ok(());
    }
    let server = directory_with_policy().await;
    Mock::given(method("POST"))
        .and(path("/rest/usermanagement/1/session/tok-123"))
        .and(body_json(json!({
            "validationFactors": [{"name": "remote_address", "value": "192.0.2.10"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_body("tok-123")))
        .expect(1)
        .mount(&server)
        .await;

    let directory = DirectoryClient::new(
        "portero",
        SecretString::from("app-secret".to_string()),
        &server.uri(),
    )?;
    let sso = Sso::builder(directory)
        .login_flow(Teapot)
        .address_resolver(|request: &Request| {
            request
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| Error::AddressResolution("no x-forwarded-for".to_string()))
        })
        .build();

    // resolver reads the header, no ConnectInfo needed
    let (app, hits) = protected(sso.clone());
    let response = app
        .oneshot(
            Request::builder()
                .uri("/")
                .header("x-forwarded-for", "192.0.2.10")
                .header(COOKIE, "crowd.token_key=tok-123")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // login presentation comes from the custom flow
    let (app, _) = protected(sso);
    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    Ok(())
}
