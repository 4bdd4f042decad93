// Runtime environment facts
//
// A browser exposes location, referrer, title, language and so on. Outside a
// browser the host supplies them through this trait; `StaticEnvironment`
// covers the common case where they are known up front or updated by the
// host as the user navigates.

use parking_lot::RwLock;
use std::sync::Arc;

/// Facts about the runtime the events originate from
///
/// Every accessor is synchronous and cheap; values may change between calls
/// (e.g. after a navigation).
pub trait Environment: Send + Sync {
    /// Live location (full URL) of the current page
    fn location(&self) -> Option<String>;

    /// Referrer reported by the runtime for the current page
    fn referrer(&self) -> Option<String>;

    /// Document title
    fn title(&self) -> Option<String> {
        None
    }

    /// Document character encoding
    fn encoding(&self) -> Option<String> {
        None
    }

    /// Preferred user language (e.g. "en-US")
    fn language(&self) -> Option<String> {
        None
    }

    /// User agent string
    fn user_agent(&self) -> Option<String> {
        None
    }

    /// Screen resolution, formatted "WIDTHxHEIGHT"
    fn screen_resolution(&self) -> Option<String> {
        None
    }

    /// Screen colour depth, formatted "N-bit"
    fn screen_color(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Default)]
struct EnvironmentValues {
    location: Option<String>,
    referrer: Option<String>,
    title: Option<String>,
    encoding: Option<String>,
    language: Option<String>,
    user_agent: Option<String>,
    screen_resolution: Option<String>,
    screen_color: Option<String>,
}

/// Environment backed by host-provided values
///
/// Clones share state, so the host can keep one handle and call
/// [`StaticEnvironment::navigate`] while the pipeline reads from another.
#[derive(Debug, Clone, Default)]
pub struct StaticEnvironment {
    values: Arc<RwLock<EnvironmentValues>>,
}

impl StaticEnvironment {
    /// Create an environment with no known values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the location
    pub fn with_location(self, location: impl Into<String>) -> Self {
        self.values.write().location = Some(location.into());
        self
    }

    /// Set the referrer
    pub fn with_referrer(self, referrer: impl Into<String>) -> Self {
        self.values.write().referrer = Some(referrer.into());
        self
    }

    /// Set the document title
    pub fn with_title(self, title: impl Into<String>) -> Self {
        self.values.write().title = Some(title.into());
        self
    }

    /// Set the character encoding
    pub fn with_encoding(self, encoding: impl Into<String>) -> Self {
        self.values.write().encoding = Some(encoding.into());
        self
    }

    /// Set the language
    pub fn with_language(self, language: impl Into<String>) -> Self {
        self.values.write().language = Some(language.into());
        self
    }

    /// Set the user agent
    pub fn with_user_agent(self, user_agent: impl Into<String>) -> Self {
        self.values.write().user_agent = Some(user_agent.into());
        self
    }

    /// Set screen width, height and colour depth
    pub fn with_screen(self, width: u32, height: u32, color_depth: u32) -> Self {
        {
            let mut values = self.values.write();
            values.screen_resolution = Some(format!("{}x{}", width, height));
            values.screen_color = Some(format!("{}-bit", color_depth));
        }
        self
    }

    /// Move to a new page: the old location becomes the referrer
    pub fn navigate(&self, location: impl Into<String>) {
        let mut values = self.values.write();
        values.referrer = values.location.take();
        values.location = Some(location.into());
    }

    /// Change the document title
    pub fn set_title(&self, title: impl Into<String>) {
        self.values.write().title = Some(title.into());
    }
}

impl Environment for StaticEnvironment {
    fn location(&self) -> Option<String> {
        self.values.read().location.clone()
    }

    fn referrer(&self) -> Option<String> {
        self.values.read().referrer.clone()
    }

    fn title(&self) -> Option<String> {
        self.values.read().title.clone()
    }

    fn encoding(&self) -> Option<String> {
        self.values.read().encoding.clone()
    }

    fn language(&self) -> Option<String> {
        self.values.read().language.clone()
    }

    fn user_agent(&self) -> Option<String> {
        self.values.read().user_agent.clone()
    }

    fn screen_resolution(&self) -> Option<String> {
        self.values.read().screen_resolution.clone()
    }

    fn screen_color(&self) -> Option<String> {
        self.values.read().screen_color.clone()
    }
}
