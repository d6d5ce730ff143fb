use std::sync::Arc;
use std::time::Duration;

use common::{ApiConfig, Event, QueryWindow};
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::{Credentials, TokenManager};
use crate::error::{Error, Result};

/// Per-request correlation id header understood by HEC support.
pub const TRACE_HEADER: &str = "x-av-req-id";
pub const EVENT_QUERY_ENDPOINT: &str = "event/query";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    request_data: QueryRequestData,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequestData {
    start_date: String,
    end_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    response_data: Option<Vec<Value>>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Authenticated client for the HEC smart API.
#[derive(Clone)]
pub struct QueryClient {
    http: Client,
    base_url: String,
    api_version: String,
    max_pages: usize,
    tokens: Arc<TokenManager>,
}

impl QueryClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(Error::Network)?;

        let base_url = config.base_url();
        let tokens = TokenManager::new(
            http.clone(),
            &base_url,
            Credentials::new(config.client_id.clone(), config.access_key.clone()),
        );

        Ok(Self {
            http,
            base_url,
            api_version: config.api_version.clone(),
            max_pages: config.max_pages.max(1),
            tokens: Arc::new(tokens),
        })
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/app/hec-api/{}/{}", self.base_url, self.api_version, endpoint)
    }

    /// POSTs `body` to an API endpoint with a bearer token and a fresh trace id.
    async fn call_api<B, R>(&self, endpoint: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let token = self.tokens.get_valid_token().await?;
        let request_id = Uuid::new_v4().to_string();
        debug!("POST {} ({}={})", endpoint, TRACE_HEADER, request_id);

        let response = self.http
            .post(self.endpoint_url(endpoint))
            .bearer_auth(token.value())
            .header(TRACE_HEADER, &request_id)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                warn!("API request {} failed: {}", request_id, e);
                Error::Network(e)
            })?;

        let status = response.status();
        let text = response.text().await.map_err(Error::Network)?;

        if !status.is_success() {
            warn!("API request {} returned status {}", request_id, status);
            if status == StatusCode::UNAUTHORIZED {
                // Next cycle starts with a fresh exchange.
                self.tokens.invalidate().await;
            }
            return Err(Error::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(Error::Decode)
    }

    /// Fetches every event in `window`, following page cursors until the
    /// server stops returning one. Pages are concatenated in arrival order.
    pub async fn query_events(&self, window: &QueryWindow) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            if pages == self.max_pages {
                warn!("Query for {} still paginating after {} pages, giving up", window, pages);
                return Err(Error::PageLimitExceeded { max_pages: self.max_pages });
            }

            let request = QueryRequest {
                request_data: QueryRequestData {
                    start_date: window.start_date(),
                    end_date: window.end_date(),
                    page_token: page_token.take(),
                },
            };

            let response: QueryResponse = self.call_api(EVENT_QUERY_ENDPOINT, &request).await?;
            pages += 1;

            let page = response.response_data.unwrap_or_default();
            debug!("Page {} for {} returned {} events", pages, window, page.len());
            events.extend(page.into_iter().filter_map(decode_event));

            match response.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        info!("Retrieved {} events for {} in {} page(s)", events.len(), window, pages);
        Ok(events)
    }
}

/// Decodes one page element. An element that is not an event is logged and
/// skipped so the rest of the page is still delivered.
fn decode_event(raw: Value) -> Option<Event> {
    match serde_json::from_value::<Event>(raw) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Skipping malformed event in response: {}", e);
            None
        }
    }
}
