// Event dispatcher
//
// Turns a loosely typed "send event" call into a wire-encoded request and
// delivers it in call order. Pipeline stages, in order:
//
// 1. resolve positional/object arguments into a payload
// 2. prepend the visitor id (mapped types that request it)
// 3. tag API-key traffic with the anonymous user id
// 4. run the before-send hooks
// 5. drop empty values
// 6. coerce special fields
// 7-9. protocol key conversion, unknown-key removal, custom flattening
// 10. buffer the request
// 11. wait for the call's send turn, then send through the selected transport
// 12. notify after-send hooks
//
// Stages 1-10 run one call at a time in call order, as does stage 11; a call
// can build while earlier ones are still on the network.

use futures::Future;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AnalyticsConfig;
use crate::environment::Environment;
use crate::error::{AnalyticsError, Result};
use crate::event_types::{keys_allowed_empty, EventTypeConfig, EventTypeRegistry};
use crate::event_types::{CLICK, CUSTOM, SEARCH, VIEW};
use crate::history::HistoryStore;
use crate::hooks::{AfterSendHook, BeforeSendHook, DefaultValuesHook, HookPipeline, ViewEventEnhancer};
use crate::payload::{prepend, remove_empty_values, resolve_payload, validate_params, Payload};
use crate::protocol::{convert_keys, flatten_custom, remove_unknown_keys};
use crate::queue::{BufferedRequest, RequestBuffer, Sequencer, Stage, Ticket};
use crate::storage::{Storage, VISITOR_ID_KEY};
use crate::transport::{
    BeaconTransport, FetchTransport, Transport, TransportSelector, TransportSettings,
};

/// User id sent for API-key traffic that names no user
pub const ANONYMOUS_USER_ID: &str = "anonymous";

/// Visitor id key for protocol-mapped payloads
const PROTOCOL_VISITOR_KEY: &str = "cid";

/// Visitor id key for every other payload
const VISITOR_KEY: &str = "visitorId";

tokio::task_local! {
    /// Address of the dispatcher whose before-send hooks are running on this task
    static RUNNING_HOOKS_OF: usize;
}

/// Core of the analytics client
///
/// Before-send hooks must not await `send_event` on the dispatcher running
/// them: the nested call waits for the outer one to finish building. Such a
/// call made on the hook's own task fails with [`AnalyticsError::Hook`].
pub struct EventDispatcher {
    config: AnalyticsConfig,
    event_types: EventTypeRegistry,
    hooks: HookPipeline,
    after_send_hooks: RwLock<Vec<Arc<dyn AfterSendHook>>>,
    selector: TransportSelector,
    api: Arc<FetchTransport>,
    sequencer: Arc<Sequencer>,
    buffer: RequestBuffer,
    visitor_id: Mutex<Option<String>>,
    history: HistoryStore,
}

impl EventDispatcher {
    /// Create a dispatcher sending over HTTP
    pub fn new(config: AnalyticsConfig) -> Result<Self> {
        config.validate()?;
        let settings = transport_settings(&config);
        let fetch = Arc::new(FetchTransport::new(settings.clone(), config.timeout)?);
        let beacon = BeaconTransport::new(settings, config.timeout)?
            .with_enabled(config.beacon_enabled);
        let selector = TransportSelector::new(fetch.clone(), Arc::new(beacon));
        Ok(Self::assemble(config, selector, fetch))
    }

    /// Create a dispatcher with caller-provided transports
    ///
    /// Visit and health lookups still go over HTTP.
    pub fn with_transports(
        config: AnalyticsConfig,
        roundtrip: Arc<dyn Transport>,
        fire_and_forget: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;
        let api = Arc::new(FetchTransport::new(
            transport_settings(&config),
            config.timeout,
        )?);
        let selector = TransportSelector::new(roundtrip, fire_and_forget);
        Ok(Self::assemble(config, selector, api))
    }

    fn assemble(config: AnalyticsConfig, selector: TransportSelector, api: Arc<FetchTransport>) -> Self {
        let history = HistoryStore::new(config.storage.clone());

        let hooks = HookPipeline::new();
        hooks.register(Arc::new(ViewEventEnhancer::new(
            config.environment.clone(),
            history.clone(),
        )));
        hooks.register(Arc::new(DefaultValuesHook::new(config.environment.clone())));
        for hook in &config.before_send_hooks {
            hooks.register(hook.clone());
        }

        Self {
            config,
            event_types: EventTypeRegistry::new(),
            hooks,
            after_send_hooks: RwLock::new(Vec::new()),
            selector,
            api,
            sequencer: Sequencer::new(),
            buffer: RequestBuffer::new(),
            visitor_id: Mutex::new(None),
            history,
        }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register (or replace) how `event_type` is sent
    pub fn add_event_type_mapping(&self, event_type: impl Into<String>, config: EventTypeConfig) {
        self.event_types.insert(event_type, config);
    }

    /// Append a hook after every hook registered so far
    ///
    /// The hook runs while its event holds the build turn, so it must not
    /// await `send_event` on this dispatcher. A nested call from the hook's
    /// task is rejected with [`AnalyticsError::Hook`]; one spawned onto
    /// another task and awaited never completes.
    pub fn register_before_send_hook(&self, hook: Arc<dyn BeforeSendHook>) {
        debug!(hook = hook.name(), "Registering before-send hook");
        self.hooks.register(hook);
    }

    pub fn register_after_send_hook(&self, hook: Arc<dyn AfterSendHook>) {
        debug!(hook = hook.name(), "Registering after-send hook");
        self.after_send_hooks.write().push(hook);
    }

    pub fn event_types(&self) -> &EventTypeRegistry {
        &self.event_types
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Send an event.
    ///
    /// The call's place in the send order is fixed when this method is
    /// called, before the returned future is first polled. Resolves to the
    /// server response for roundtrip sends and `None` otherwise.
    pub fn send_event(
        &self,
        event_type: &str,
        args: Vec<Value>,
    ) -> impl Future<Output = Result<Option<Value>>> + Send + '_ {
        let ticket = self.sequencer.ticket();
        let event_type = event_type.to_string();
        async move { self.process_event(ticket, event_type, args).await }
    }

    pub fn send_search_event(
        &self,
        payload: Payload,
    ) -> impl Future<Output = Result<Option<Value>>> + Send + '_ {
        self.send_event(SEARCH, vec![Value::Object(payload)])
    }

    pub fn send_click_event(
        &self,
        payload: Payload,
    ) -> impl Future<Output = Result<Option<Value>>> + Send + '_ {
        self.send_event(CLICK, vec![Value::Object(payload)])
    }

    pub fn send_custom_event(
        &self,
        payload: Payload,
    ) -> impl Future<Output = Result<Option<Value>>> + Send + '_ {
        self.send_event(CUSTOM, vec![Value::Object(payload)])
    }

    pub fn send_view_event(
        &self,
        payload: Payload,
    ) -> impl Future<Output = Result<Option<Value>>> + Send + '_ {
        self.send_event(VIEW, vec![Value::Object(payload)])
    }

    async fn process_event(
        &self,
        mut ticket: Ticket,
        event_type: String,
        args: Vec<Value>,
    ) -> Result<Option<Value>> {
        if event_type.is_empty() {
            return Err(AnalyticsError::config("event type must not be empty"));
        }
        if self.is_running_hooks() {
            return Err(AnalyticsError::hook(format!(
                "cannot send '{event_type}' from a before-send hook of the same dispatcher"
            )));
        }

        ticket.wait_turn(Stage::Build).await;
        let mapping = self.event_types.resolve(&event_type);
        let payload = self.build_payload(&event_type, &mapping, args).await?;

        debug!(
            event_type = %event_type,
            wire_type = %mapping.wire_type,
            sequence = ticket.sequence(),
            "Queueing analytics event"
        );
        // Removes the request again if this call is abandoned before sending
        let pending = self.buffer.enqueue(BufferedRequest::new(
            ticket.sequence(),
            mapping.wire_type.clone(),
            payload,
        ));
        ticket.finish(Stage::Build);

        ticket.wait_turn(Stage::Send).await;
        let request = match pending.claim() {
            Some(request) if !request.handled => request,
            _ => {
                debug!(event_type = %event_type, "Event already flushed on terminate");
                return Ok(None);
            }
        };

        let visitor_id = self.get_current_visitor_id().await?;
        let transport = self.selector.choose_transport(&request.wire_type);
        let response = transport
            .send(&request.wire_type, &request.payload, Some(&visitor_id))
            .await?;

        if let Some(id) = response
            .as_ref()
            .and_then(|r| r.get(VISITOR_KEY))
            .and_then(Value::as_str)
        {
            self.set_current_visitor_id(id).await;
        }

        // Later events may proceed while observers run
        drop(ticket);
        self.run_after_send_hooks(&event_type, &request.payload).await;

        Ok(response)
    }

    /// Stages 1 through 9
    async fn build_payload(
        &self,
        event_type: &str,
        mapping: &EventTypeConfig,
        args: Vec<Value>,
    ) -> Result<Payload> {
        let mut payload = resolve_payload(&mapping.positional_arg_names, args);

        if mapping.add_visitor_id {
            let key = if mapping.uses_protocol_mapping {
                PROTOCOL_VISITOR_KEY
            } else {
                VISITOR_KEY
            };
            let visitor_id = self.get_current_visitor_id().await?;
            payload = prepend(payload, key, Value::String(visitor_id));
        }

        if mapping.uses_protocol_mapping
            && self.config.uses_api_key()
            && !payload.contains_key("userId")
        {
            payload.insert("userId".to_string(), Value::from(ANONYMOUS_USER_ID));
        }

        let payload = RUNNING_HOOKS_OF
            .scope(self.address(), self.hooks.run(event_type, payload))
            .await?;
        let payload = remove_empty_values(payload, keys_allowed_empty(event_type));
        let payload = validate_params(payload);

        if !mapping.uses_protocol_mapping {
            return Ok(payload);
        }
        let payload = convert_keys(payload);
        let payload = remove_unknown_keys(payload);
        Ok(flatten_custom(payload))
    }

    fn address(&self) -> usize {
        self as *const Self as usize
    }

    fn is_running_hooks(&self) -> bool {
        RUNNING_HOOKS_OF
            .try_with(|owner| *owner == self.address())
            .unwrap_or(false)
    }

    async fn run_after_send_hooks(&self, event_type: &str, payload: &Payload) {
        let hooks: Vec<Arc<dyn AfterSendHook>> = self.after_send_hooks.read().clone();
        for hook in hooks {
            if let Err(e) = hook.after_send(event_type, payload).await {
                warn!(hook = hook.name(), error = %e, "After-send hook failed");
            }
        }
    }

    /// Number of buffered requests not yet sent or flushed
    pub fn pending_requests(&self) -> usize {
        self.buffer.pending()
    }

    /// Deliver every buffered request through the fire-and-forget transport.
    ///
    /// Call when the runtime is about to terminate. Requests go out newest
    /// first; their `send_event` calls then resolve to `None`. Waits, up to
    /// the configured timeout, until the handed-off requests (and any earlier
    /// fire-and-forget sends) have been dispatched, without reading responses.
    /// Returns how many buffered requests were handed to the transport.
    pub async fn flush_on_terminate(&self) -> usize {
        let requests = self.buffer.take_unhandled_newest_first();
        let transport = self.selector.terminate_transport();

        let mut flushed = 0;
        if !requests.is_empty() {
            let visitor_id = self.get_current_visitor_id().await.ok();
            for request in &requests {
                match transport
                    .send(&request.wire_type, &request.payload, visitor_id.as_deref())
                    .await
                {
                    Ok(_) => flushed += 1,
                    Err(e) => warn!(
                        wire_type = %request.wire_type,
                        error = %e,
                        "Failed to flush analytics event on terminate"
                    ),
                }
            }
        }

        let delivered = transport.wait_for_delivery().await;
        info!(count = flushed, delivered = delivered, "Flushed pending analytics events on terminate");
        flushed
    }

    // ========================================================================
    // Visitor id
    // ========================================================================

    /// Visitor id, loading it from storage or creating one on first use
    ///
    /// Storage failures are logged and an in-memory id is used instead.
    pub async fn get_current_visitor_id(&self) -> Result<String> {
        let mut slot = self.visitor_id.lock().await;
        if let Some(id) = slot.as_ref() {
            return Ok(id.clone());
        }

        let id = match self.config.storage.get_item(VISITOR_ID_KEY).await {
            Ok(Some(id)) if !id.is_empty() => id,
            Ok(_) => {
                let id = Uuid::now_v7().to_string();
                if let Err(e) = self.config.storage.set_item(VISITOR_ID_KEY, &id).await {
                    warn!(error = %e, "Failed to persist visitor id");
                }
                id
            }
            Err(e) => {
                warn!(error = %e, "Visitor id storage unavailable, using an ephemeral id");
                Uuid::now_v7().to_string()
            }
        };

        *slot = Some(id.clone());
        Ok(id)
    }

    /// Replace the visitor id in memory and storage
    pub async fn set_current_visitor_id(&self, id: impl Into<String>) {
        let id = id.into();
        let mut slot = self.visitor_id.lock().await;
        if slot.as_deref() == Some(id.as_str()) {
            return;
        }
        if let Err(e) = self.config.storage.set_item(VISITOR_ID_KEY, &id).await {
            warn!(error = %e, "Failed to persist visitor id");
        }
        debug!(visitor_id = %id, "Visitor id updated");
        *slot = Some(id);
    }

    /// Forget the visitor id and the page-view history
    pub async fn clear(&self) {
        let mut slot = self.visitor_id.lock().await;
        *slot = None;
        if let Err(e) = self.config.storage.remove_item(VISITOR_ID_KEY).await {
            warn!(error = %e, "Failed to remove visitor id from storage");
        }
        if let Err(e) = self.history.clear().await {
            warn!(error = %e, "Failed to clear page-view history");
        }
    }

    // ========================================================================
    // Visit and health
    // ========================================================================

    /// Fetch the current visit; adopts the visitor id it reports
    pub async fn get_visit(&self) -> Result<Value> {
        let visit = self.api.get_visit().await?;
        if let Some(id) = visit.get(VISITOR_KEY).and_then(Value::as_str) {
            self.set_current_visitor_id(id).await;
        }
        Ok(visit)
    }

    /// Fetch the collection service health
    pub async fn get_health(&self) -> Result<Value> {
        self.api.get_health().await
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub fn environment(&self) -> Arc<dyn Environment> {
        self.config.environment.clone()
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        self.config.storage.clone()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }
}

fn transport_settings(config: &AnalyticsConfig) -> TransportSettings {
    TransportSettings {
        base_url: config.base_url(),
        token: config.token.clone(),
        preprocessor: config.preprocessor.clone(),
    }
}
