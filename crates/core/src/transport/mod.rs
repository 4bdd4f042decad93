// Delivery transports
//
// Two interchangeable senders:
// - FetchTransport: request/response, awaits and parses the server answer
// - BeaconTransport: fire-and-forget, used for lossy-tolerant events and for
//   the terminate flush
//
// Both build an `AnalyticsRequest` first so a preprocessor can rewrite it.

mod beacon;
mod fetch;

pub use beacon::BeaconTransport;
pub use fetch::FetchTransport;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::event_types::CLICK;
use crate::payload::Payload;

/// Which transport produced a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Fetch,
    Beacon,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Fetch => write!(f, "analyticsFetch"),
            TransportKind::Beacon => write!(f, "analyticsBeacon"),
        }
    }
}

/// A fully built HTTP request, before it is sent
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsRequest {
    pub method: reqwest::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub transport: TransportKind,
}

impl AnalyticsRequest {
    /// Value of the first header named `name` (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Last chance to rewrite a request before it leaves the process
#[async_trait]
pub trait RequestPreprocessor: Send + Sync {
    async fn preprocess(&self, request: AnalyticsRequest) -> Result<AnalyticsRequest>;
}

/// Settings shared by both transports
#[derive(Clone)]
pub struct TransportSettings {
    /// `{endpoint}/{version}`, without trailing slash
    pub base_url: String,
    /// Bearer token / access token
    pub token: Option<String>,
    pub preprocessor: Option<Arc<dyn RequestPreprocessor>>,
}

impl TransportSettings {
    pub(crate) fn analytics_url(&self, wire_type: &str) -> String {
        format!("{}/analytics/{}", self.base_url, wire_type)
    }

    pub(crate) async fn preprocess(&self, request: AnalyticsRequest) -> Result<AnalyticsRequest> {
        match &self.preprocessor {
            Some(preprocessor) => preprocessor.preprocess(request).await,
            None => Ok(request),
        }
    }
}

impl fmt::Debug for TransportSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSettings")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("preprocessor", &self.preprocessor.is_some())
            .finish()
    }
}

/// Sends one event to the collection endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which kind of transport this is
    fn kind(&self) -> TransportKind;

    /// Whether the transport can be used in the current runtime
    fn is_available(&self) -> bool {
        true
    }

    /// Send `payload` as a `wire_type` event.
    ///
    /// Returns the parsed server response, or `None` when the transport does
    /// not wait for one.
    async fn send(
        &self,
        wire_type: &str,
        payload: &Payload,
        visitor_id: Option<&str>,
    ) -> Result<Option<Value>>;

    /// Wait until requests handed off by `send` have left the process.
    ///
    /// Returns false when the wait gave up first. Transports that finish
    /// delivery inside `send` have nothing to wait for.
    async fn wait_for_delivery(&self) -> bool {
        true
    }
}

/// Picks the transport for each event
#[derive(Clone)]
pub struct TransportSelector {
    roundtrip: Arc<dyn Transport>,
    fire_and_forget: Arc<dyn Transport>,
    lossy_types: Vec<String>,
}

impl TransportSelector {
    /// Selector where only `click` events may be lost
    pub fn new(roundtrip: Arc<dyn Transport>, fire_and_forget: Arc<dyn Transport>) -> Self {
        Self {
            roundtrip,
            fire_and_forget,
            lossy_types: vec![CLICK.to_string()],
        }
    }

    /// Replace the set of lossy-tolerant wire types
    pub fn with_lossy_types(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.lossy_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Fire-and-forget for lossy-tolerant types when available, else roundtrip
    pub fn choose_transport(&self, wire_type: &str) -> Arc<dyn Transport> {
        let lossy = self.lossy_types.iter().any(|t| t == wire_type);
        if lossy && self.fire_and_forget.is_available() {
            self.fire_and_forget.clone()
        } else {
            self.roundtrip.clone()
        }
    }

    /// Transport used while the runtime is terminating
    pub fn terminate_transport(&self) -> Arc<dyn Transport> {
        self.fire_and_forget.clone()
    }

    /// The request/response transport
    pub fn roundtrip(&self) -> Arc<dyn Transport> {
        self.roundtrip.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeTransport {
        kind: TransportKind,
        available: bool,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn kind(&self) -> TransportKind {
            self.kind
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn send(
            &self,
            _wire_type: &str,
            _payload: &Payload,
            _visitor_id: Option<&str>,
        ) -> Result<Option<Value>> {
            Ok(None)
        }
    }

    fn selector(beacon_available: bool) -> TransportSelector {
        TransportSelector::new(
            Arc::new(FakeTransport {
                kind: TransportKind::Fetch,
                available: true,
            }),
            Arc::new(FakeTransport {
                kind: TransportKind::Beacon,
                available: beacon_available,
            }),
        )
    }

    #[test]
    fn test_click_uses_beacon_when_available() {
        let selector = selector(true);
        assert_eq!(selector.choose_transport("click").kind(), TransportKind::Beacon);
        assert_eq!(selector.choose_transport("search").kind(), TransportKind::Fetch);
        assert_eq!(selector.choose_transport("collect").kind(), TransportKind::Fetch);
    }

    #[test]
    fn test_click_falls_back_to_fetch_without_beacon() {
        let selector = selector(false);
        assert_eq!(selector.choose_transport("click").kind(), TransportKind::Fetch);
    }

    #[test]
    fn test_terminate_always_uses_beacon() {
        let selector = selector(false);
        assert_eq!(selector.terminate_transport().kind(), TransportKind::Beacon);
    }

    #[test]
    fn test_custom_lossy_types() {
        let selector = selector(true).with_lossy_types(["custom"]);
        assert_eq!(selector.choose_transport("custom").kind(), TransportKind::Beacon);
        assert_eq!(selector.choose_transport("click").kind(), TransportKind::Fetch);
    }

    #[test]
    fn test_transport_kind_display() {
        assert_eq!(TransportKind::Fetch.to_string(), "analyticsFetch");
        assert_eq!(TransportKind::Beacon.to_string(), "analyticsBeacon");
    }
}
