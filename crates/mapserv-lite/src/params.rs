//! CGI parameter decoding

use mapserv_sdk::{EngineContext, ErrorCode, ParamSource, RequestParams};
use tracing::debug;

/// Printed when the process was not started as a CGI request
pub const NOT_CGI_NOTICE: &str = "This script can only be used to decode form results and \nshould be initiated as a CGI process via a httpd server.\n";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Resolve request parameters from CGI variables and the stdin channel.
///
/// Returns `None` when the environment does not describe a request at all,
/// or uses a method other than GET or POST.
pub fn load(ctx: &mut EngineContext, env: &dyn ParamSource) -> Option<RequestParams> {
    let query = env.get("QUERY_STRING");
    let method = match env.get("REQUEST_METHOD") {
        Some(method) => method.to_ascii_uppercase(),
        None if query.is_some() => "GET".to_string(),
        None => {
            ctx.io.write_stdout(NOT_CGI_NOTICE.as_bytes());
            return None;
        }
    };

    let mut params = RequestParams::new();
    match method.as_str() {
        "GET" => {
            decode_into(&mut params, query.unwrap_or("").as_bytes());
        }
        "POST" => {
            let body = ctx.io.read_stdin_to_end();
            let is_form = env
                .get("CONTENT_TYPE")
                .map(|ct| ct.to_ascii_lowercase().starts_with(FORM_CONTENT_TYPE))
                .unwrap_or(false);
            if is_form {
                decode_into(&mut params, &body);
            } else if !body.is_empty() {
                params.set_raw_post_data(body);
            }
            if let Some(query) = query {
                decode_into(&mut params, query.as_bytes());
            }
        }
        other => {
            ctx.errors.set_error(
                ErrorCode::Web,
                format!("Unsupported HTTP request method: {}.", other),
                "LiteEngine::load_params",
            );
            return None;
        }
    }

    if let Some(cookie) = env.get("HTTP_COOKIE") {
        params.set_cookie_data(cookie);
    }

    debug!(method = %method, count = params.len(), "decoded request parameters");
    Some(params)
}

fn decode_into(params: &mut RequestParams, input: &[u8]) {
    for (name, value) in url::form_urlencoded::parse(input) {
        if !name.is_empty() {
            params.push(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> HashMap<String, String> {
        vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_get_defaults_from_query_string() {
        let mut ctx = EngineContext::new();
        let params = load(&mut ctx, &env(&[("QUERY_STRING", "mode=map&layer=roads+main&x=%41")])).unwrap();
        assert_eq!(params.get("mode"), Some("map"));
        assert_eq!(params.get("layer"), Some("roads main"));
        assert_eq!(params.get("x"), Some("A"));
    }

    #[test]
    fn test_empty_query_is_an_empty_set() {
        let mut ctx = EngineContext::new();
        let params = load(&mut ctx, &env(&[("REQUEST_METHOD", "GET")])).unwrap();
        assert!(params.is_empty());
    }

    #[test]
    fn test_no_request_prints_notice() {
        let mut ctx = EngineContext::new();
        ctx.io.install_stdout_buffer("buf");
        assert!(load(&mut ctx, &env(&[])).is_none());
        assert!(ctx.errors.is_empty());
        let sink = ctx.io.stdout_sink_mut("buf").unwrap();
        assert_eq!(sink.data(), NOT_CGI_NOTICE.as_bytes());
    }

    #[test]
    fn test_post_form_body() {
        let mut ctx = EngineContext::new();
        ctx.io.install_stdin_buffer(b"mode=mapfile&map.name=posted".to_vec());
        let params = load(
            &mut ctx,
            &env(&[
                ("REQUEST_METHOD", "POST"),
                ("CONTENT_TYPE", "application/x-www-form-urlencoded; charset=utf-8"),
                ("QUERY_STRING", "extra=1"),
                ("HTTP_COOKIE", "session=abc"),
            ]),
        )
        .unwrap();
        assert_eq!(params.get("mode"), Some("mapfile"));
        assert_eq!(params.get("map.name"), Some("posted"));
        assert_eq!(params.get("extra"), Some("1"));
        assert_eq!(params.cookie_data(), Some("session=abc"));
        assert_eq!(params.raw_post_data(), None);
    }

    #[test]
    fn test_post_raw_body() {
        let mut ctx = EngineContext::new();
        ctx.io.install_stdin_buffer(b"<GetMap/>".to_vec());
        let params = load(
            &mut ctx,
            &env(&[("REQUEST_METHOD", "POST"), ("CONTENT_TYPE", "text/xml")]),
        )
        .unwrap();
        assert!(params.is_empty());
        assert_eq!(params.raw_post_data(), Some(&b"<GetMap/>"[..]));
    }

    #[test]
    fn test_unsupported_method() {
        let mut ctx = EngineContext::new();
        assert!(load(&mut ctx, &env(&[("REQUEST_METHOD", "DELETE")])).is_none());
        assert_eq!(ctx.errors.current().unwrap().code, ErrorCode::Web);
    }
}
