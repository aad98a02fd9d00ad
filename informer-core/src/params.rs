//! Query parameters for list and watch calls
use crate::labels::{ParseSelectorError, Selector};

/// Common query parameters used in list calls on collections
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListParams {
    /// A selector to restrict the list of returned objects by their labels.
    ///
    /// Defaults to everything if `None`.
    pub label_selector: Option<String>,

    /// Timeout for the list call.
    pub timeout: Option<u32>,
}

/// Builder interface to ListParams
///
/// Usage:
/// ```
/// use informer_core::ListParams;
/// let lp = ListParams::default().labels("k8s-app=kube-dns");
/// ```
impl ListParams {
    /// Configure the timeout for list calls
    #[must_use]
    pub fn timeout(mut self, timeout_secs: u32) -> Self {
        self.timeout = Some(timeout_secs);
        self
    }

    /// Configure the selector to restrict the list of returned objects by their labels.
    ///
    /// Defaults to everything.
    /// Supports `=`, `==`, `!=`, `in`, `notin`, `key` and `!key`, comma separated.
    #[must_use]
    pub fn labels(mut self, label_selector: &str) -> Self {
        self.label_selector = Some(label_selector.to_string());
        self
    }

    /// Parse the label selector, an absent selector selects everything
    pub fn selector(&self) -> Result<Selector, ParseSelectorError> {
        parse_selector(self.label_selector.as_deref())
    }
}

/// Common query parameters used in watch calls on collections
#[derive(Clone, Debug, PartialEq)]
pub struct WatchParams {
    /// A selector to restrict returned objects by their labels.
    ///
    /// Defaults to everything if `None`.
    pub label_selector: Option<String>,

    /// Timeout for the watch call.
    ///
    /// This limits the duration of the call, regardless of any activity or inactivity.
    /// If unset for a watch call, the server default applies.
    pub timeout: Option<u32>,

    /// Enables watch events with type "BOOKMARK".
    ///
    /// Servers may send bookmarks at their discretion; clients must not rely on any interval.
    pub bookmarks: bool,
}

impl Default for WatchParams {
    /// Default `WatchParams` without any constricting selectors
    fn default() -> Self {
        Self {
            bookmarks: true,
            label_selector: None,
            timeout: None,
        }
    }
}

/// Builder interface to WatchParams
///
/// Usage:
/// ```
/// use informer_core::WatchParams;
/// let wp = WatchParams::default()
///     .timeout(60)
///     .labels("app=hello-world");
/// ```
impl WatchParams {
    /// Configure the timeout for watch calls
    ///
    /// This limits the duration of the call, regardless of any activity or inactivity.
    #[must_use]
    pub fn timeout(mut self, timeout_secs: u32) -> Self {
        self.timeout = Some(timeout_secs);
        self
    }

    /// Configure the selector to restrict the list of returned objects by their labels.
    ///
    /// Defaults to everything.
    #[must_use]
    pub fn labels(mut self, label_selector: &str) -> Self {
        self.label_selector = Some(label_selector.to_string());
        self
    }

    /// Disables watch bookmarks
    #[must_use]
    pub fn disable_bookmarks(mut self) -> Self {
        self.bookmarks = false;
        self
    }

    /// Parse the label selector, an absent selector selects everything
    pub fn selector(&self) -> Result<Selector, ParseSelectorError> {
        parse_selector(self.label_selector.as_deref())
    }
}

fn parse_selector(raw: Option<&str>) -> Result<Selector, ParseSelectorError> {
    raw.map_or_else(|| Ok(Selector::default()), str::parse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_set_selector_and_timeout() {
        let lp = ListParams::default().labels("app=web").timeout(10);
        assert_eq!(lp.label_selector.as_deref(), Some("app=web"));
        assert_eq!(lp.timeout, Some(10));
        let wp = WatchParams::default().labels("app=web");
        assert_eq!(wp.label_selector.as_deref(), Some("app=web"));
        assert_eq!(wp.timeout, None);
        assert!(wp.bookmarks);
    }

    #[test]
    fn absent_selector_selects_all() {
        assert!(ListParams::default().selector().unwrap().selects_all());
        assert!(WatchParams::default().disable_bookmarks().selector().unwrap().selects_all());
    }

    #[test]
    fn invalid_selector_is_reported() {
        assert!(ListParams::default().labels("in (").selector().is_err());
    }
}
