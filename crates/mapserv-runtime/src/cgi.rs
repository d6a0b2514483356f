//! Build a CGI environment from an HTTP request
//!
//! Hosts that receive plain HTTP requests use [`environment`] to produce the
//! variables an [`EnvironmentView`] is made of.

use crate::environment::EnvironmentView;
use percent_encoding::percent_decode_str;
use std::path::Path;
use thiserror::Error;
use url::Url;

/// Errors raised while building a CGI environment
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CgiError {
    /// The request target could not be parsed
    #[error("Invalid request URL '{0}'")]
    InvalidUrl(String),

    /// The request carries no Host header
    #[error("Request has no Host header")]
    MissingHost,
}

/// The parts of an HTTP request that feed the CGI environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CgiRequest {
    /// Request target, absolute or origin-form ("/path?query")
    pub url: String,
    /// HTTP version, e.g. "1.1"
    pub http_version: String,
    /// Request method
    pub method: String,
    /// Header name/value pairs; names are matched case-insensitively
    pub headers: Vec<(String, String)>,
    /// Peer address
    pub remote_addr: String,
}

impl CgiRequest {
    /// First value of a header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Produce the CGI variables for `request`.
///
/// Variables in `extra` are applied last and override computed ones.
pub fn environment<I, K, V>(request: &CgiRequest, extra: I) -> Result<EnvironmentView, CgiError>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let decoded = percent_decode_str(&request.url)
        .decode_utf8()
        .map_err(|_| CgiError::InvalidUrl(request.url.clone()))?;
    let url = parse_target(&decoded).ok_or_else(|| CgiError::InvalidUrl(request.url.clone()))?;

    let host = request.header("host").ok_or(CgiError::MissingHost)?;
    let (server_name, server_port) = match host.split_once(':') {
        Some((name, port)) => (name, Some(port)),
        None => (host, None),
    };

    let path_info = match url.path() {
        "" => "/",
        path => path,
    };
    let path_translated = std::env::current_dir()
        .map(|cwd| cwd.join(path_info.trim_start_matches('/')))
        .unwrap_or_else(|_| Path::new(path_info).to_path_buf());

    let mut env = EnvironmentView::new()
        .with_var("SERVER_SOFTWARE", concat!("mapserv/", env!("CARGO_PKG_VERSION")))
        .with_var("SERVER_NAME", server_name)
        .with_var("GATEWAY_INTERFACE", "CGI/1.1")
        .with_var("SERVER_PROTOCOL", format!("HTTP/{}", request.http_version))
        .with_var("REQUEST_METHOD", request.method.as_str())
        .with_var("PATH_INFO", path_info)
        .with_var("PATH_TRANSLATED", path_translated.to_string_lossy())
        .with_var("SCRIPT_NAME", "/")
        .with_var("QUERY_STRING", url.query().unwrap_or(""))
        .with_var("REMOTE_ADDR", request.remote_addr.as_str());

    if let Some(port) = server_port {
        env = env.with_var("SERVER_PORT", port);
    }

    for (name, value) in &request.headers {
        let lower = name.to_ascii_lowercase();
        env = match lower.as_str() {
            "host" => env,
            "content-length" => env.with_var("CONTENT_LENGTH", value.as_str()),
            "content-type" => env.with_var("CONTENT_TYPE", value.as_str()),
            "authorization" => {
                let scheme = value.split(' ').next().unwrap_or("");
                env.with_var("AUTH_TYPE", scheme)
            }
            _ => env.with_var(format!("HTTP_{}", lower.to_ascii_uppercase().replace('-', "_")), value.as_str()),
        };
    }

    for (name, value) in extra {
        env = env.with_var(name, value);
    }

    Ok(env)
}

fn parse_target(target: &str) -> Option<Url> {
    match Url::parse(target) {
        Ok(url) if url.has_host() => Some(url),
        _ => Url::parse("http://localhost").ok()?.join(target).ok(),
    }
}
