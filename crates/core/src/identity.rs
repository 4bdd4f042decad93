// Page-view identity
//
// Tracks which page view the next event belongs to. Readers can preview the
// values an event of a given type would carry without changing anything;
// commit applies them, and only page-view events ever change state.
//
// Invariants:
// - every non-page-view event between two page views shares one page_view_id
// - the referrer recorded on a page view is the location in effect just
//   before that page view

use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

use crate::environment::Environment;

/// Caller-facing type of page-view events
pub const PAGE_VIEW_EVENT: &str = "pageview";

/// True for the event type that opens a new page view
pub fn is_page_view(event_type: &str) -> bool {
    event_type == PAGE_VIEW_EVENT
}

/// Values an event would carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageViewSnapshot {
    pub page_view_id: String,
    pub referrer: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone)]
struct IdentityState {
    page_view_id: String,
    next_page_view_id: String,
    current_location: Option<String>,
    last_referrer: Option<String>,
    has_sent_first_page_view: bool,
}

impl IdentityState {
    fn initial(env: &dyn Environment) -> Self {
        Self {
            page_view_id: new_id(),
            next_page_view_id: new_id(),
            current_location: env.location(),
            last_referrer: env.referrer(),
            has_sent_first_page_view: false,
        }
    }
}

fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// Shared page-view state machine
///
/// One instance is shared by every plugin of a client so page-view id,
/// location and referrer stay consistent between them.
pub struct PageViewIdentity {
    environment: Arc<dyn Environment>,
    state: Mutex<IdentityState>,
}

impl PageViewIdentity {
    /// Create an identity in the before-first-page-view state
    pub fn new(environment: Arc<dyn Environment>) -> Self {
        let state = IdentityState::initial(environment.as_ref());
        Self {
            environment,
            state: Mutex::new(state),
        }
    }

    /// Values an event of `event_type` would carry if sent now
    pub fn preview(&self, event_type: &str, page: Option<&str>) -> PageViewSnapshot {
        let state = self.state.lock();
        self.preview_locked(&state, event_type, page)
    }

    /// Apply the preview for `event_type`; no-op unless it is a page view
    pub fn commit(&self, event_type: &str, page: Option<&str>) {
        let mut state = self.state.lock();
        if is_page_view(event_type) {
            let snapshot = self.preview_locked(&state, event_type, page);
            Self::apply(&mut state, snapshot);
        }
    }

    /// Preview and commit atomically, returning what the event carries
    pub fn advance(&self, event_type: &str, page: Option<&str>) -> PageViewSnapshot {
        let mut state = self.state.lock();
        let snapshot = self.preview_locked(&state, event_type, page);
        if is_page_view(event_type) {
            Self::apply(&mut state, snapshot.clone());
        }
        snapshot
    }

    /// Current page-view id (what a non-page-view event would carry)
    pub fn page_view_id(&self) -> String {
        self.state.lock().page_view_id.clone()
    }

    /// Whether a page view has been committed yet
    pub fn has_sent_first_page_view(&self) -> bool {
        self.state.lock().has_sent_first_page_view
    }

    /// Back to the initial state with fresh ids and live location/referrer
    pub fn reset(&self) {
        *self.state.lock() = IdentityState::initial(self.environment.as_ref());
    }

    fn apply(state: &mut IdentityState, snapshot: PageViewSnapshot) {
        state.current_location = snapshot.location;
        state.last_referrer = snapshot.referrer;
        state.page_view_id = snapshot.page_view_id;
        state.next_page_view_id = new_id();
        state.has_sent_first_page_view = true;
    }

    fn preview_locked(
        &self,
        state: &IdentityState,
        event_type: &str,
        page: Option<&str>,
    ) -> PageViewSnapshot {
        if !is_page_view(event_type) {
            return PageViewSnapshot {
                page_view_id: state.page_view_id.clone(),
                referrer: state.last_referrer.clone(),
                location: state.current_location.clone(),
            };
        }

        let referrer = if state.has_sent_first_page_view {
            state.current_location.clone()
        } else {
            state.last_referrer.clone()
        };

        let location = match page.filter(|p| !p.is_empty()) {
            Some(page) => Some(location_for_page(state.current_location.as_deref(), page)),
            None => self.environment.location(),
        };

        PageViewSnapshot {
            page_view_id: state.next_page_view_id.clone(),
            referrer,
            location,
        }
    }
}

/// Replace the path of `current`'s origin with `page`
fn location_for_page(current: Option<&str>, page: &str) -> String {
    let origin = current
        .map(|loc| loc.split('/').take(3).collect::<Vec<_>>().join("/"))
        .unwrap_or_default();
    let path = page.trim_start_matches('/');
    format!("{}/{}", origin, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::StaticEnvironment;

    fn identity_at(location: &str, referrer: &str) -> (PageViewIdentity, StaticEnvironment) {
        let env = StaticEnvironment::new()
            .with_location(location)
            .with_referrer(referrer);
        (PageViewIdentity::new(Arc::new(env.clone())), env)
    }

    #[test]
    fn test_preview_does_not_mutate() {
        let (identity, _) = identity_at("https://shop.example.com/", "https://search.example.com/");
        let first = identity.preview(PAGE_VIEW_EVENT, None);
        let second = identity.preview(PAGE_VIEW_EVENT, None);
        assert_eq!(first, second);
        assert!(!identity.has_sent_first_page_view());
        assert_ne!(first.page_view_id, identity.page_view_id());
    }

    #[test]
    fn test_first_page_view_uses_runtime_referrer() {
        let (identity, _) = identity_at("https://shop.example.com/", "https://search.example.com/");
        let snapshot = identity.advance(PAGE_VIEW_EVENT, None);

        assert_eq!(snapshot.referrer.as_deref(), Some("https://search.example.com/"));
        assert_eq!(snapshot.location.as_deref(), Some("https://shop.example.com/"));
        assert_eq!(identity.page_view_id(), snapshot.page_view_id);
        assert!(identity.has_sent_first_page_view());
    }

    #[test]
    fn test_events_between_page_views_share_id() {
        let (identity, _) = identity_at("https://shop.example.com/", "");
        let page_view = identity.advance(PAGE_VIEW_EVENT, None);

        for _ in 0..5 {
            let event = identity.advance("event", None);
            assert_eq!(event.page_view_id, page_view.page_view_id);
            assert_eq!(event.location, page_view.location);
        }

        let next = identity.advance(PAGE_VIEW_EVENT, Some("/cart"));
        assert_ne!(next.page_view_id, page_view.page_view_id);
    }

    #[test]
    fn test_referrer_chain_follows_locations() {
        let (identity, env) = identity_at("https://shop.example.com/home", "https://ref.example.com/");
        let first = identity.advance(PAGE_VIEW_EVENT, None);

        env.navigate("https://shop.example.com/products");
        let second = identity.advance(PAGE_VIEW_EVENT, None);
        assert_eq!(second.referrer, first.location);
        assert_eq!(second.location.as_deref(), Some("https://shop.example.com/products"));

        let third = identity.advance(PAGE_VIEW_EVENT, Some("checkout"));
        assert_eq!(third.referrer, second.location);
        assert_eq!(third.location.as_deref(), Some("https://shop.example.com/checkout"));
    }

    #[test]
    fn test_explicit_page_replaces_path() {
        assert_eq!(
            location_for_page(Some("https://shop.example.com/a/b?c=d"), "/cart"),
            "https://shop.example.com/cart"
        );
        assert_eq!(
            location_for_page(Some("https://shop.example.com"), "cart"),
            "https://shop.example.com/cart"
        );
    }

    #[test]
    fn test_commit_ignores_non_page_views() {
        let (identity, _) = identity_at("https://shop.example.com/", "");
        let before = identity.page_view_id();
        identity.commit("event", None);
        assert_eq!(identity.page_view_id(), before);
        assert!(!identity.has_sent_first_page_view());

        identity.commit(PAGE_VIEW_EVENT, None);
        assert_ne!(identity.page_view_id(), before);
    }

    #[test]
    fn test_reset_returns_to_initial_state() {
        let (identity, _) = identity_at("https://shop.example.com/", "");
        identity.advance(PAGE_VIEW_EVENT, None);
        let committed = identity.page_view_id();

        identity.reset();
        assert!(!identity.has_sent_first_page_view());
        assert_ne!(identity.page_view_id(), committed);
    }
}
