use chrono::{TimeZone, Utc};
use common::{ApiConfig, QueryWindow};
use hec_agent::{Error, QueryClient};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const QUERY_PATH: &str = "/app/hec-api/v1.0/event/query";

fn config(server: &MockServer, max_pages: usize) -> ApiConfig {
    ApiConfig {
        client_id: "client".to_string(),
        access_key: "key".to_string(),
        host: server.uri(),
        max_pages,
        ..Default::default()
    }
}

fn window() -> QueryWindow {
    QueryWindow::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap(),
    )
}

async fn mount_auth(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth/external"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "token": "test-token", "expiresIn": 3600 }
        })))
        .expect(1)
        .mount(server)
        .await;
}

fn page(ids: &[&str], next: Option<&str>) -> ResponseTemplate {
    let events: Vec<_> = ids.iter().map(|id| json!({ "eventId": id })).collect();
    let mut body = json!({ "responseData": events });
    if let Some(next) = next {
        body["nextPageToken"] = json!(next);
    }
    ResponseTemplate::new(200).set_body_json(body)
}

fn with_cursor(token: &str) -> impl wiremock::Match {
    body_partial_json(json!({ "requestData": { "pageToken": token } }))
}

#[tokio::test]
async fn follows_cursors_and_concatenates_pages() {
    let server = MockServer::start().await;
    mount_auth(&server).await;

    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .and(with_cursor("p2"))
        .respond_with(page(&["c", "d", "e"], Some("p3")))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .and(with_cursor("p3"))
        .respond_with(page(&["f"], None))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .respond_with(page(&["a", "b"], Some("p2")))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    let client = QueryClient::new(&config(&server, 10)).unwrap();
    let events = client.query_events(&window()).await.unwrap();

    let ids: Vec<_> = events.iter().map(|e| e.event_id.as_str()).collect();
    assert_eq!(ids, ["a", "b", "c", "d", "e", "f"]);
}

#[tokio::test]
async fn follow_up_requests_keep_the_window() {
    let server = MockServer::start().await;
    mount_auth(&server).await;

    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .and(body_partial_json(json!({
            "requestData": {
                "startDate": "2024-01-01T00:00:00Z",
                "endDate": "2024-01-01T00:05:00Z",
                "pageToken": "p2"
            }
        })))
        .respond_with(page(&["b"], Some("")))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .respond_with(page(&["a"], Some("p2")))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    let client = QueryClient::new(&config(&server, 10)).unwrap();
    // An empty cursor ends pagination just like a missing one.
    assert_eq!(client.query_events(&window()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn endless_cursor_hits_page_limit() {
    let server = MockServer::start().await;
    mount_auth(&server).await;

    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .respond_with(page(&["x"], Some("again")))
        .expect(3)
        .mount(&server)
        .await;

    let client = QueryClient::new(&config(&server, 3)).unwrap();
    let err = client.query_events(&window()).await.unwrap_err();
    assert!(matches!(err, Error::PageLimitExceeded { max_pages: 3 }), "unexpected error: {err:?}");
}

#[tokio::test]
async fn failure_on_a_later_page_fails_the_query() {
    let server = MockServer::start().await;
    mount_auth(&server).await;

    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .and(with_cursor("p2"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(QUERY_PATH))
        .respond_with(page(&["a"], Some("p2")))
        .with_priority(2)
        .mount(&server)
        .await;

    let client = QueryClient::new(&config(&server, 10)).unwrap();
    let err = client.query_events(&window()).await.unwrap_err();
    assert!(matches!(err, Error::Api { status: 502, .. }));
}
