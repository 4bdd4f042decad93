// Page-view history
//
// A short, newest-first list of visited pages persisted through Storage.
// The view-event hook appends to it; `EventDispatcher::clear` wipes it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::error::Result;
use crate::storage::Storage;

/// Storage key for the serialized history
pub const HISTORY_KEY: &str = "__trackline.analytics.history";

/// Maximum number of elements kept
pub const MAX_HISTORY_ELEMENTS: usize = 20;

/// Values longer than this are truncated
pub const MAX_VALUE_LENGTH: usize = 75;

/// Window in which an identical element is not recorded twice
const DUPLICATE_WINDOW_SECS: i64 = 60;

/// One visited page (or other named element)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryElement {
    pub name: String,
    pub value: String,
    pub time: DateTime<Utc>,
}

impl HistoryElement {
    /// Create a page-view element stamped now
    pub fn page_view(value: impl Into<String>) -> Self {
        Self {
            name: "PageView".to_string(),
            value: value.into(),
            time: Utc::now(),
        }
    }
}

/// History persisted in a [`Storage`]
#[derive(Clone)]
pub struct HistoryStore {
    storage: Arc<dyn Storage>,
}

impl HistoryStore {
    /// Create a history over the given storage
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Load the history, newest first (empty when missing or unreadable)
    pub async fn get_history(&self) -> Vec<HistoryElement> {
        match self.storage.get_item(HISTORY_KEY).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "Ignoring unreadable page-view history");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read page-view history");
                Vec::new()
            }
        }
    }

    /// Record an element at the front of the history
    pub async fn add_element(&self, mut element: HistoryElement) -> Result<()> {
        if element.value.chars().count() > MAX_VALUE_LENGTH {
            element.value = element.value.chars().take(MAX_VALUE_LENGTH).collect();
        }

        let mut history = self.get_history().await;
        if let Some(newest) = history.first() {
            let same = newest.name == element.name && newest.value == element.value;
            let recent = element.time - newest.time < Duration::seconds(DUPLICATE_WINDOW_SECS);
            if same && recent {
                return Ok(());
            }
        }

        history.insert(0, element);
        history.truncate(MAX_HISTORY_ELEMENTS);

        let raw = serde_json::to_string(&history)?;
        self.storage.set_item(HISTORY_KEY, &raw).await
    }

    /// Most recent element, if any
    pub async fn most_recent(&self) -> Option<HistoryElement> {
        self.get_history().await.into_iter().next()
    }

    /// Forget the whole history
    pub async fn clear(&self) -> Result<()> {
        self.storage.remove_item(HISTORY_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    fn store() -> HistoryStore {
        HistoryStore::new(Arc::new(InMemoryStorage::new()))
    }

    #[tokio::test]
    async fn test_add_and_read_newest_first() {
        let history = store();
        history
            .add_element(HistoryElement::page_view("/a"))
            .await
            .unwrap();
        history
            .add_element(HistoryElement::page_view("/b"))
            .await
            .unwrap();

        let elements = history.get_history().await;
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].value, "/b");
        assert_eq!(elements[1].value, "/a");
        assert_eq!(history.most_recent().await.unwrap().value, "/b");
    }

    #[tokio::test]
    async fn test_recent_duplicate_is_skipped() {
        let history = store();
        history
            .add_element(HistoryElement::page_view("/a"))
            .await
            .unwrap();
        history
            .add_element(HistoryElement::page_view("/a"))
            .await
            .unwrap();
        assert_eq!(history.get_history().await.len(), 1);

        let mut later = HistoryElement::page_view("/a");
        later.time += Duration::seconds(DUPLICATE_WINDOW_SECS + 1);
        history.add_element(later).await.unwrap();
        assert_eq!(history.get_history().await.len(), 2);
    }

    #[tokio::test]
    async fn test_history_is_bounded_and_values_truncated() {
        let history = store();
        for i in 0..(MAX_HISTORY_ELEMENTS + 5) {
            history
                .add_element(HistoryElement::page_view(format!("/page/{}", i)))
                .await
                .unwrap();
        }
        assert_eq!(history.get_history().await.len(), MAX_HISTORY_ELEMENTS);

        history
            .add_element(HistoryElement::page_view("x".repeat(200)))
            .await
            .unwrap();
        let newest = history.most_recent().await.unwrap();
        assert_eq!(newest.value.len(), MAX_VALUE_LENGTH);
    }

    #[tokio::test]
    async fn test_clear() {
        let history = store();
        history
            .add_element(HistoryElement::page_view("/a"))
            .await
            .unwrap();
        history.clear().await.unwrap();
        assert!(history.get_history().await.is_empty());
    }
}
