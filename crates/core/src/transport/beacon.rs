// Fire-and-forget transport
//
// Form-encodes the payload and hands the request to a background task.
// `send` awaits nothing beyond the preprocessor; delivery failures are only
// logged. Deliveries are tracked so a terminating process can wait for them
// before its runtime shuts down.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};
use url::form_urlencoded;

use super::{AnalyticsRequest, Transport, TransportKind, TransportSettings};
use crate::config::DEFAULT_TIMEOUT;
use crate::error::{AnalyticsError, Result};
use crate::event_types::is_legacy;
use crate::payload::{to_form_value, Payload};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// One-shot delivery transport
pub struct BeaconTransport {
    settings: TransportSettings,
    client: Client,
    enabled: bool,
    /// Upper bound for waiting on in-flight deliveries
    timeout: Duration,
    deliveries: TaskTracker,
}

impl BeaconTransport {
    /// Create a transport with its own HTTP client
    pub fn new(settings: TransportSettings, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalyticsError::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(settings, client).with_timeout(timeout))
    }

    /// Create a transport over an existing client
    pub fn with_client(settings: TransportSettings, client: Client) -> Self {
        Self {
            settings,
            client,
            enabled: true,
            timeout: DEFAULT_TIMEOUT,
            deliveries: TaskTracker::new(),
        }
    }

    /// Bound the wait in [`Transport::wait_for_delivery`]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Deliveries still in flight
    pub fn in_flight(&self) -> usize {
        self.deliveries.len()
    }

    /// Allow or forbid use of this transport
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Build the request without sending it
    pub fn build_request(
        &self,
        wire_type: &str,
        payload: &Payload,
        visitor_id: Option<&str>,
    ) -> Result<AnalyticsRequest> {
        let legacy = is_legacy(wire_type);

        let mut query = form_urlencoded::Serializer::new(String::new());
        if let Some(token) = self.settings.token.as_deref().filter(|_| legacy) {
            query.append_pair("access_token", token);
        }
        query.append_pair("visitorId", visitor_id.unwrap_or_default());
        query.append_pair("discardVisitInfo", "true");
        let url = format!("{}?{}", self.settings.analytics_url(wire_type), query.finish());

        let body = if legacy {
            let json = serde_json::to_string(payload)?;
            form_urlencoded::Serializer::new(String::new())
                .append_pair(&format!("{}Event", wire_type), &json)
                .finish()
        } else {
            encode_flat(self.settings.token.as_deref(), payload)?
        };

        Ok(AnalyticsRequest {
            method: Method::POST,
            url,
            headers: vec![("Content-Type".to_string(), FORM_CONTENT_TYPE.to_string())],
            body: Some(body),
            transport: TransportKind::Beacon,
        })
    }
}

/// `access_token=..&key=value&..` with objects and arrays JSON-stringified
fn encode_flat(token: Option<&str>, payload: &Payload) -> Result<String> {
    let mut form = form_urlencoded::Serializer::new(String::new());
    if let Some(token) = token {
        form.append_pair("access_token", token);
    }
    for (key, value) in payload {
        let encoded = match value {
            Value::Object(_) | Value::Array(_) => serde_json::to_string(value)?,
            scalar => to_form_value(scalar),
        };
        form.append_pair(key, &encoded);
    }
    Ok(form.finish())
}

#[async_trait]
impl Transport for BeaconTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Beacon
    }

    fn is_available(&self) -> bool {
        self.enabled && Handle::try_current().is_ok()
    }

    async fn send(
        &self,
        wire_type: &str,
        payload: &Payload,
        visitor_id: Option<&str>,
    ) -> Result<Option<Value>> {
        let request = self.build_request(wire_type, payload, visitor_id)?;
        let request = self.settings.preprocess(request).await?;

        let client = self.client.clone();
        let wire_type = wire_type.to_string();
        self.deliveries.spawn(async move {
            let mut builder = client.request(request.method, &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }
            match builder.send().await {
                Ok(response) => {
                    debug!(wire_type = %wire_type, status = %response.status(), "Beacon delivered")
                }
                Err(e) => warn!(wire_type = %wire_type, error = %e, "Beacon delivery failed"),
            }
        });

        Ok(None)
    }

    async fn wait_for_delivery(&self) -> bool {
        if self.deliveries.is_empty() {
            return true;
        }
        // wait() resolves once the tracker is closed and empty
        self.deliveries.close();
        let settled = tokio::time::timeout(self.timeout, self.deliveries.wait())
            .await
            .is_ok();
        self.deliveries.reopen();
        if !settled {
            warn!(
                in_flight = self.deliveries.len(),
                "Timed out waiting for beacon deliveries"
            );
        }
        settled
    }
}
