use std::time::Duration;

use harvest_core::{FailureKind, Location, Strategy, Target};
use harvest_engine::{Fetcher, HarvestSettings, LightFetch};
use pretty_assertions::assert_eq;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

fn article() -> String {
    format!(
        "<html><head><title>Listing</title></head><body><article>{}</article></body></html>",
        "Plenty of server rendered text for a reader. ".repeat(8)
    )
}

fn location(server: &MockServer, route: &str) -> Location {
    Target::new(1, format!("{}{}", server.uri(), route))
        .locate()
        .expect("mock server url is valid")
}

fn settings() -> HarvestSettings {
    HarvestSettings {
        user_agent_pool: vec!["agent-one/1.0".to_string(), "agent-two/2.0".to_string()],
        ..HarvestSettings::default()
    }
}

#[tokio::test]
async fn sends_browser_headers_and_returns_payload() {
    let server = MockServer::start().await;
    let origin = format!("{}/", server.uri());
    Mock::given(method("GET"))
        .and(path("/jobs"))
        .and(header("accept-language", "en-US,en;q=0.5"))
        .and(header("referer", origin.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_raw(article(), "text/html; charset=utf-8"))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = LightFetch::new(&settings()).unwrap();
    let target = location(&server, "/jobs");
    let payload = fetcher.fetch(&target, TIMEOUT).await.expect("fetch ok");

    assert_eq!(payload.status, 200);
    assert_eq!(payload.strategy, Strategy::Light);
    assert_eq!(payload.source_url, target.url().to_string());
    assert_eq!(payload.final_url, payload.source_url);
    assert_eq!(payload.content.as_ref(), article().as_bytes());
    assert!(payload
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.starts_with("text/html")));
}

#[tokio::test]
async fn rotates_user_agents_round_robin() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(article(), "text/html"))
        .mount(&server)
        .await;

    let fetcher = LightFetch::new(&settings()).unwrap();
    let target = location(&server, "/");
    for _ in 0..3 {
        fetcher.fetch(&target, TIMEOUT).await.unwrap();
    }

    let agents: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|req| {
            req.headers
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        })
        .collect();
    assert_eq!(agents, vec!["agent-one/1.0", "agent-two/2.0", "agent-one/1.0"]);
}

#[tokio::test]
async fn too_many_requests_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .mount(&server)
        .await;

    let fetcher = LightFetch::new(&settings()).unwrap();
    let err = fetcher.fetch(&location(&server, "/"), TIMEOUT).await.unwrap_err();
    assert_eq!(
        err.kind,
        FailureKind::RateLimited {
            retry_after: Some(Duration::from_secs(7))
        }
    );
}

#[tokio::test]
async fn refusal_statuses_map_to_failure_kinds() {
    let server = MockServer::start().await;
    for (route, status) in [("/forbidden", 403), ("/odd", 999), ("/down", 503), ("/gone", 404)] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
    }

    let fetcher = LightFetch::new(&settings()).unwrap();
    let kind = |route: &'static str| {
        let fetcher = &fetcher;
        let target = location(&server, route);
        async move { fetcher.fetch(&target, TIMEOUT).await.unwrap_err().kind }
    };

    assert_eq!(kind("/forbidden").await, FailureKind::Blocked);
    assert_eq!(kind("/odd").await, FailureKind::Blocked);

    let unavailable = kind("/down").await;
    assert_eq!(unavailable, FailureKind::HttpStatus(503));
    assert!(unavailable.is_retryable());

    let missing = kind("/gone").await;
    assert_eq!(missing, FailureKind::HttpStatus(404));
    assert!(!missing.is_retryable());
}

#[tokio::test]
async fn challenge_page_is_blocked_even_with_success_status() {
    let server = MockServer::start().await;
    let body = format!(
        "<html><body><p>{}</p><div class=\"g-recaptcha\"></div></body></html>",
        "Please verify you are human. ".repeat(10)
    );
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/html"))
        .mount(&server)
        .await;

    let fetcher = LightFetch::new(&settings()).unwrap();
    let err = fetcher.fetch(&location(&server, "/"), TIMEOUT).await.unwrap_err();
    assert_eq!(err.kind, FailureKind::Blocked);
}

#[tokio::test]
async fn script_shell_reports_empty_content() {
    let server = MockServer::start().await;
    let body = "<html><body><div id=\"app\"></div><script src=\"/bundle.js\"></script></body></html>";
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/html"))
        .mount(&server)
        .await;

    let fetcher = LightFetch::new(&settings()).unwrap();
    let err = fetcher.fetch(&location(&server, "/"), TIMEOUT).await.unwrap_err();
    assert_eq!(err.kind, FailureKind::EmptyContent);
    assert!(!err.kind.is_retryable());
}

#[tokio::test]
async fn oversized_body_is_too_large() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(article(), "text/html"))
        .mount(&server)
        .await;

    let settings = HarvestSettings {
        max_bytes: 64,
        ..settings()
    };
    let fetcher = LightFetch::new(&settings).unwrap();
    let err = fetcher.fetch(&location(&server, "/"), TIMEOUT).await.unwrap_err();
    assert!(
        matches!(err.kind, FailureKind::TooLarge { max_bytes: 64, .. }),
        "{err:?}"
    );
}

#[tokio::test]
async fn slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(article(), "text/html")
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let fetcher = LightFetch::new(&settings()).unwrap();
    let err = fetcher
        .fetch(&location(&server, "/"), Duration::from_millis(50))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::Timeout);
}
