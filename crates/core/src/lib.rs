// Analytics Event Pipeline
//
// This crate turns loosely typed "send event" calls into well-formed, ordered,
// wire-encoded requests for a usage-analytics collection endpoint.
//
// Key design decisions:
// - Runtime facts (Storage, Environment) and delivery (Transport) are traits,
//   so the pipeline runs the same in a server, a CLI or a test
// - Hooks are uniform async transforms; plugins inject domain data through them
// - Send order is fixed when `send_event` is called, not when hooks finish
// - Two transports: a roundtrip one that reports errors and visitor ids, and a
//   fire-and-forget one for lossy-tolerant events and terminate flushes
// - Protocol mapping to short wire keys is stateless and table driven
// - Page-view identity (page-view id, location, referrer chain) is a shared
//   state machine that only page-view events advance

pub mod config;
pub mod dispatcher;
pub mod environment;
pub mod error;
pub mod event_types;
pub mod history;
pub mod hooks;
pub mod identity;
pub mod payload;
pub mod protocol;
pub mod queue;
pub mod storage;
pub mod transport;

// Re-exports for convenience
pub use config::{AnalyticsConfig, AnalyticsConfigBuilder};
pub use dispatcher::{EventDispatcher, ANONYMOUS_USER_ID};
pub use environment::{Environment, StaticEnvironment};
pub use error::{AnalyticsError, Result};
pub use event_types::{EventTypeConfig, EventTypeRegistry};
pub use history::{HistoryElement, HistoryStore};
pub use hooks::{after_send_fn, before_send_fn, AfterSendHook, BeforeSendHook, HookPipeline};
pub use identity::{PageViewIdentity, PageViewSnapshot, PAGE_VIEW_EVENT};
pub use payload::Payload;
pub use storage::{FileStorage, InMemoryStorage, NullStorage, Storage};
pub use transport::{
    AnalyticsRequest, BeaconTransport, FetchTransport, RequestPreprocessor, Transport,
    TransportKind, TransportSelector, TransportSettings,
};
