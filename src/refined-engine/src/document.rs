//! Host document abstraction.
//!
//! The engine never touches markup directly. Everything it needs from the
//! page goes through [`Document`]: the root marker attributes, a single
//! injected stylesheet, and element lookups for behaviors. [`MemoryDocument`]
//! is a complete in-process implementation used by tests and headless hosts.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

/// The page the engine decorates.
pub trait Document: Send + Sync {
    /// Current location of the page.
    fn current_url(&self) -> String;

    /// Current page title.
    fn title(&self) -> String;

    /// Read an attribute of the root element.
    fn root_attribute(&self, name: &str) -> Option<String>;

    /// Set an attribute of the root element.
    fn set_root_attribute(&self, name: &str, value: &str);

    /// Insert or replace the stylesheet identified by `id`.
    fn inject_stylesheet(&self, id: &str, css: &str);

    /// Whether an element matching `selector` currently exists.
    fn has_element(&self, selector: &str) -> bool;

    /// Set an attribute on the first element matching `selector`.
    /// Returns `false` when no element matched.
    fn set_element_attribute(&self, selector: &str, name: &str, value: &str) -> bool;

    /// Remove an attribute from the first element matching `selector`.
    fn remove_element_attribute(&self, selector: &str, name: &str) -> bool;
}

#[derive(Debug, Default)]
struct DocumentState {
    url: String,
    title: String,
    root: BTreeMap<String, String>,
    stylesheets: BTreeMap<String, String>,
    elements: HashMap<String, BTreeMap<String, String>>,
}

/// In-memory document. Elements are keyed by the exact selector used to
/// look them up.
#[derive(Debug, Default)]
pub struct MemoryDocument {
    state: Mutex<DocumentState>,
}

impl MemoryDocument {
    pub fn new(url: impl Into<String>) -> Self {
        let doc = Self::default();
        doc.state.lock().url = url.into();
        doc
    }

    /// Change the location without any navigation signal, as the host
    /// application does when it renders a new route.
    pub fn set_location(&self, url: impl Into<String>, title: impl Into<String>) {
        let mut state = self.state.lock();
        state.url = url.into();
        state.title = title.into();
    }

    /// Add an element reachable through `selector`.
    pub fn insert_element(&self, selector: impl Into<String>) {
        self.state.lock().elements.entry(selector.into()).or_default();
    }

    pub fn remove_element(&self, selector: &str) {
        self.state.lock().elements.remove(selector);
    }

    /// Attribute of an element, if both exist.
    pub fn element_attribute(&self, selector: &str, name: &str) -> Option<String> {
        self.state
            .lock()
            .elements
            .get(selector)
            .and_then(|attrs| attrs.get(name).cloned())
    }

    /// Content of an injected stylesheet.
    pub fn stylesheet(&self, id: &str) -> Option<String> {
        self.state.lock().stylesheets.get(id).cloned()
    }

    pub fn stylesheet_count(&self) -> usize {
        self.state.lock().stylesheets.len()
    }
}

impl Document for MemoryDocument {
    fn current_url(&self) -> String {
        self.state.lock().url.clone()
    }

    fn title(&self) -> String {
        self.state.lock().title.clone()
    }

    fn root_attribute(&self, name: &str) -> Option<String> {
        self.state.lock().root.get(name).cloned()
    }

    fn set_root_attribute(&self, name: &str, value: &str) {
        self.state
            .lock()
            .root
            .insert(name.to_string(), value.to_string());
    }

    fn inject_stylesheet(&self, id: &str, css: &str) {
        self.state
            .lock()
            .stylesheets
            .insert(id.to_string(), css.to_string());
    }

    fn has_element(&self, selector: &str) -> bool {
        self.state.lock().elements.contains_key(selector)
    }

    fn set_element_attribute(&self, selector: &str, name: &str, value: &str) -> bool {
        match self.state.lock().elements.get_mut(selector) {
            Some(attrs) => {
                attrs.insert(name.to_string(), value.to_string());
                true
            }
            None => false,
        }
    }

    fn remove_element_attribute(&self, selector: &str, name: &str) -> bool {
        match self.state.lock().elements.get_mut(selector) {
            Some(attrs) => attrs.remove(name).is_some(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_attributes() {
        let doc = MemoryDocument::new("https://mobile.twitter.com/home");
        assert!(!doc.set_element_attribute("nav", "data-x", "1"));

        doc.insert_element("nav");
        assert!(doc.set_element_attribute("nav", "data-x", "1"));
        assert_eq!(doc.element_attribute("nav", "data-x"), Some("1".to_string()));
        assert!(doc.remove_element_attribute("nav", "data-x"));
        assert_eq!(doc.element_attribute("nav", "data-x"), None);
    }

    #[test]
    fn test_stylesheet_replaced_by_id() {
        let doc = MemoryDocument::default();
        doc.inject_stylesheet("refined", "a{}");
        doc.inject_stylesheet("refined", "b{}");
        assert_eq!(doc.stylesheet_count(), 1);
        assert_eq!(doc.stylesheet("refined").as_deref(), Some("b{}"));
    }
}
