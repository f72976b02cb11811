//! Navigation context handed to predicates and behaviors.

use chrono::{DateTime, Local};
use url::Url;

use crate::error::{EngineError, Result};

/// Snapshot of where the user is, built once per navigation event.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationContext {
    url: Url,
    title: String,
    at: DateTime<Local>,
}

impl NavigationContext {
    /// Build a context observed right now.
    pub fn new(url: Url, title: impl Into<String>) -> Self {
        Self::observed_at(url, title, Local::now())
    }

    /// Build a context with an explicit observation time.
    pub fn observed_at(url: Url, title: impl Into<String>, at: DateTime<Local>) -> Self {
        Self {
            url,
            title: title.into(),
            at,
        }
    }

    /// Parse `url` and build a context observed right now.
    pub fn parse(url: &str, title: impl Into<String>) -> Result<Self> {
        Ok(Self::new(parse_url(url)?, title))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Path component of the URL, e.g. `/home`.
    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Instant at which the navigation was observed.
    pub fn at(&self) -> DateTime<Local> {
        self.at
    }
}

/// Parse a URL, mapping failures into [`EngineError::InvalidUrl`].
pub fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| EngineError::InvalidUrl {
        url: url.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_context() {
        let ctx = NavigationContext::parse("https://mobile.twitter.com/home?x=1", "Home").unwrap();
        assert_eq!(ctx.path(), "/home");
        assert_eq!(ctx.title(), "Home");
    }

    #[test]
    fn test_parse_invalid_url() {
        let err = NavigationContext::parse("not a url", "").unwrap_err();
        assert!(matches!(err, EngineError::InvalidUrl { .. }));
    }
}
