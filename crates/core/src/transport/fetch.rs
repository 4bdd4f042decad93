// Roundtrip transport
//
// POSTs the JSON payload and waits for the answer. The only transport that
// can report failures or hand back a visitor id.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, warn};
use url::form_urlencoded;

use super::{AnalyticsRequest, Transport, TransportKind, TransportSettings};
use crate::error::{AnalyticsError, Result};
use crate::event_types::is_legacy;
use crate::payload::Payload;

/// Request/response transport backed by reqwest
pub struct FetchTransport {
    settings: TransportSettings,
    client: Client,
}

impl FetchTransport {
    /// Create a transport with its own HTTP client
    pub fn new(settings: TransportSettings, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalyticsError::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(settings, client))
    }

    /// Create a transport over an existing client
    pub fn with_client(settings: TransportSettings, client: Client) -> Self {
        Self { settings, client }
    }

    /// `GET {base}/analytics/visit`
    pub async fn get_visit(&self) -> Result<Value> {
        self.get("visit").await
    }

    /// `GET {base}/analytics/monitoring/health`
    pub async fn get_health(&self) -> Result<Value> {
        self.get("monitoring/health").await
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let request = AnalyticsRequest {
            method: Method::GET,
            url: self.settings.analytics_url(path),
            headers: self.auth_headers(),
            body: None,
            transport: TransportKind::Fetch,
        };
        let request = self.settings.preprocess(request).await?;
        Ok(self.execute(path, request).await?.unwrap_or(Value::Null))
    }

    fn auth_headers(&self) -> Vec<(String, String)> {
        match &self.settings.token {
            Some(token) => vec![("Authorization".to_string(), format!("Bearer {}", token))],
            None => Vec::new(),
        }
    }

    async fn execute(&self, event_type: &str, request: AnalyticsRequest) -> Result<Option<Value>> {
        debug!(url = %request.url, method = %request.method, "Sending analytics request");

        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            // Drain the body so the connection is released and the error is readable
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(event_type = %event_type, status = %status, body = %body, "Analytics request failed");
            return Err(AnalyticsError::Transport {
                event_type: event_type.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        match serde_json::from_str(&text) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(event_type = %event_type, error = %e, "Ignoring non-JSON analytics response");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Transport for FetchTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Fetch
    }

    async fn send(
        &self,
        wire_type: &str,
        payload: &Payload,
        visitor_id: Option<&str>,
    ) -> Result<Option<Value>> {
        let mut url = self.settings.analytics_url(wire_type);
        if let Some(id) = visitor_id.filter(|_| is_legacy(wire_type)) {
            let encoded: String = form_urlencoded::byte_serialize(id.as_bytes()).collect();
            url = format!("{}?visitor={}", url, encoded);
        }

        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        headers.extend(self.auth_headers());

        let request = AnalyticsRequest {
            method: Method::POST,
            url,
            headers,
            body: Some(serde_json::to_string(payload)?),
            transport: TransportKind::Fetch,
        };
        let request = self.settings.preprocess(request).await?;
        self.execute(wire_type, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RequestPreprocessor;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(server: &MockServer, token: Option<&str>) -> FetchTransport {
        FetchTransport::new(
            TransportSettings {
                base_url: format!("{}/rest/v15", server.uri()),
                token: token.map(|t| t.to_string()),
                preprocessor: None,
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn as_map(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_legacy_send_posts_json_with_visitor_param() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v15/analytics/search"))
            .and(query_param("visitor", "visitor-1"))
            .and(header("Authorization", "Bearer secret"))
            .and(header("Content-Type", "application/json"))
            .and(body_json(json!({"queryText": "shoes"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"visitorId": "v-2"})))
            .expect(1)
            .mount(&server)
            .await;

        let response = transport(&server, Some("secret"))
            .send("search", &as_map(json!({"queryText": "shoes"})), Some("visitor-1"))
            .await
            .unwrap();
        assert_eq!(response, Some(json!({"visitorId": "v-2"})));
    }

    #[tokio::test]
    async fn test_collect_send_has_no_visitor_param() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v15/analytics/collect"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let response = transport(&server, None)
            .send("collect", &as_map(json!({"t": "event"})), Some("visitor-1"))
            .await
            .unwrap();
        assert_eq!(response, None);

        let received = server.received_requests().await.unwrap();
        assert_eq!(received[0].url.query(), None);
        assert!(received[0].headers.get("Authorization").is_none());
    }

    #[tokio::test]
    async fn test_error_status_becomes_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = transport(&server, None)
            .send("click", &Payload::new(), None)
            .await
            .unwrap_err();
        match err {
            AnalyticsError::Transport {
                event_type,
                status,
                body,
            } => {
                assert_eq!(event_type, "click");
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    struct HeaderInjector;

    #[async_trait]
    impl RequestPreprocessor for HeaderInjector {
        async fn preprocess(&self, mut request: AnalyticsRequest) -> Result<AnalyticsRequest> {
            assert_eq!(request.transport, TransportKind::Fetch);
            request.headers.push(("X-Tenant".to_string(), "acme".to_string()));
            Ok(request)
        }
    }

    #[tokio::test]
    async fn test_preprocessor_can_rewrite_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v15/analytics/monitoring/health"))
            .and(header("X-Tenant", "acme"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .expect(1)
            .mount(&server)
            .await;

        let mut settings = transport(&server, None).settings;
        settings.preprocessor = Some(Arc::new(HeaderInjector));
        let transport = FetchTransport::new(settings, Duration::from_secs(5)).unwrap();

        let health = transport.get_health().await.unwrap();
        assert_eq!(health, json!({"status": "ok"}));
    }
}
