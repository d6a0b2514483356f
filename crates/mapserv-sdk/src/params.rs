//! CGI request parameters

/// Callback contract used by an engine to pull CGI variables.
///
/// The engine calls [`ParamSource::get`] synchronously, once per variable it
/// wants to resolve, while the request is being decoded.
pub trait ParamSource {
    /// Look up a variable by name
    fn get(&self, name: &str) -> Option<&str>;
}

impl ParamSource for std::collections::HashMap<String, String> {
    fn get(&self, name: &str) -> Option<&str> {
        std::collections::HashMap::get(self, name).map(|v| v.as_str())
    }
}

impl ParamSource for std::collections::BTreeMap<String, String> {
    fn get(&self, name: &str) -> Option<&str> {
        std::collections::BTreeMap::get(self, name).map(|v| v.as_str())
    }
}

/// Decoded request parameters, in the order they were supplied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParams {
    params: Vec<(String, String)>,
    raw_post_data: Option<Vec<u8>>,
    cookie_data: Option<String>,
}

impl RequestParams {
    /// Create an empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a name/value pair
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.push((name.into(), value.into()));
    }

    /// All pairs, in request order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// First value for `name`, compared case-insensitively
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Number of pairs
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Check if there are no pairs
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Keep a request body that was not form encoded
    pub fn set_raw_post_data(&mut self, data: Vec<u8>) {
        self.raw_post_data = Some(data);
    }

    /// Request body that was not form encoded
    pub fn raw_post_data(&self) -> Option<&[u8]> {
        self.raw_post_data.as_deref()
    }

    /// Keep the HTTP cookie header for forwarding
    pub fn set_cookie_data(&mut self, cookie: impl Into<String>) {
        self.cookie_data = Some(cookie.into());
    }

    /// HTTP cookie header, if the request carried one
    pub fn cookie_data(&self) -> Option<&str> {
        self.cookie_data.as_deref()
    }
}
