//! EnvironmentBridge: the per-request CGI variable view
//!
//! An [`EnvironmentView`] is built once on the host side, moved into the
//! request task, and read by the engine through the [`ParamSource`]
//! callback while the request is decoded on a worker.

use mapserv_sdk::ParamSource;
use std::collections::BTreeMap;

/// Immutable CGI-style variables plus an optional request body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentView {
    vars: BTreeMap<String, String>,
    body: Option<Vec<u8>>,
}

impl EnvironmentView {
    /// Create an empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable, replacing an earlier value with the same name
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Attach a request body
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Look up a variable
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|v| v.as_str())
    }

    /// All variables, sorted by name
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// The request body, if one was supplied
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Length of the request body (0 when absent)
    pub fn body_len(&self) -> usize {
        self.body.as_ref().map(|b| b.len()).unwrap_or(0)
    }

    /// Move the body out, keeping the variables as the lookup view
    pub(crate) fn split_body(mut self) -> (Self, Option<Vec<u8>>) {
        let body = self.body.take();
        (self, body)
    }
}

impl ParamSource for EnvironmentView {
    fn get(&self, name: &str) -> Option<&str> {
        self.var(name)
    }
}

impl<K, V> FromIterator<(K, V)> for EnvironmentView
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            body: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_through_param_source() {
        let env: EnvironmentView = [("QUERY_STRING", "mode=map"), ("REQUEST_METHOD", "GET")]
            .into_iter()
            .collect();
        let source: &dyn ParamSource = &env;
        assert_eq!(source.get("QUERY_STRING"), Some("mode=map"));
        assert_eq!(source.get("CONTENT_TYPE"), None);
    }

    #[test]
    fn test_body_is_optional() {
        let env = EnvironmentView::new().with_var("REQUEST_METHOD", "POST");
        assert_eq!(env.body(), None);
        assert_eq!(env.body_len(), 0);

        let env = env.with_body("mode=map");
        assert_eq!(env.body(), Some(&b"mode=map"[..]));
        assert_eq!(env.body_len(), 8);

        let (view, body) = env.split_body();
        assert_eq!(body.as_deref(), Some(&b"mode=map"[..]));
        assert_eq!(view.body(), None);
        assert_eq!(view.var("REQUEST_METHOD"), Some("POST"));
    }

    #[test]
    fn test_later_values_win() {
        let env = EnvironmentView::new().with_var("A", "1").with_var("A", "2");
        assert_eq!(env.var("A"), Some("2"));
        assert_eq!(env.vars().len(), 1);
    }
}
