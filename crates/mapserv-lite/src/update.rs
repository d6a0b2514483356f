//! Per-request map edits
//!
//! Applied to a private copy of the map before a request is dispatched:
//!
//! - `map.<path>=value` / `map_<path>=value` structural edits, under the
//!   parser lock;
//! - `classgroup=<group>` for every layer;
//! - `%name%` substitutions in layer DATA, allowed only when the value
//!   matches a VALIDATION pattern for `name`;
//! - `default_<name>` validation entries filling whatever is left;
//! - the request cookie copied to `http_cookie_data` web metadata.

use crate::mapfile::{LayerStatus, MapDef, Table};
use mapserv_sdk::{EngineContext, EngineLocks, ErrorCode, LockName, RequestParams, Status};
use regex::Regex;
use tracing::{debug, trace};

const ROUTINE: &str = "LiteEngine::update_map";

/// Apply every request edit to `map`
pub fn apply(ctx: &mut EngineContext, map: &mut MapDef, params: &RequestParams, locks: &EngineLocks) -> Status {
    for (name, value) in params.iter() {
        if starts_with_ignore_case(name, "qstring") {
            continue;
        }

        if starts_with_ignore_case(name, "map_") || starts_with_ignore_case(name, "map.") {
            let _parser = locks.acquire(LockName::Parser);
            if let Err(message) = edit_from_url(map, name, value) {
                ctx.errors.set_error(ErrorCode::Web, message, ROUTINE);
                return Status::Failure;
            }
            continue;
        }

        if starts_with_ignore_case(name, "classgroup") {
            for layer in &mut map.layers {
                layer.class_group = Some(value.to_string());
            }
        }
    }

    apply_substitutions(ctx, map, params);
    apply_default_substitutions(map);

    if let Some(cookie) = params.cookie_data() {
        map.web.metadata.insert("http_cookie_data", cookie);
    }

    Status::Success
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// Split `layer[roads].data` into `["layer[roads]", "data"]`, keeping
/// separators that appear inside brackets
fn split_path(path: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in path.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            c if c == separator && depth == 0 => {
                parts.push(&path[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&path[start..]);
    parts
}

fn edit_from_url(map: &mut MapDef, name: &str, value: &str) -> Result<(), String> {
    let separator = if name.as_bytes()[3] == b'.' { '.' } else { '_' };
    let parts = split_path(&name[4..], separator);
    let invalid = || format!("Parsing error near ({}):(line 1)", name);

    match parts.as_slice() {
        [prop] if prop.eq_ignore_ascii_case("name") => map.name = value.to_string(),
        [prop] if prop.eq_ignore_ascii_case("size") => {
            let mut dims = value.split_whitespace().map(str::parse::<u32>);
            match (dims.next(), dims.next(), dims.next()) {
                (Some(Ok(w)), Some(Ok(h)), None) => map.size = (w, h),
                _ => return Err(format!("Parsing error near ({}):(line 1)", value)),
            }
        }
        [layer, prop] => {
            let layer_name = layer
                .strip_prefix("layer[")
                .or_else(|| layer.strip_prefix("LAYER["))
                .and_then(|rest| rest.strip_suffix(']'))
                .ok_or_else(invalid)?;
            let target = map
                .layer_mut(layer_name)
                .ok_or_else(|| format!("Layer named '{}' does not exist in the map.", layer_name))?;
            match prop.to_ascii_lowercase().as_str() {
                "data" => target.data = value.to_string(),
                "status" => {
                    target.status =
                        LayerStatus::parse(value).ok_or_else(|| format!("Parsing error near ({}):(line 1)", value))?;
                }
                _ => return Err(invalid()),
            }
        }
        _ => return Err(invalid()),
    }

    trace!(param = name, "applied structural edit");
    Ok(())
}

/// Find the validation pattern for `key`, layer first then web
fn validation_pattern<'a>(layer: &'a Table, web: &'a Table, key: &str) -> Option<&'a str> {
    layer.get(key).or_else(|| web.get(key))
}

fn apply_substitutions(ctx: &mut EngineContext, map: &mut MapDef, params: &RequestParams) {
    let MapDef { layers, web, .. } = map;
    for (name, value) in params.iter() {
        let tag = format!("%{}%", name);
        for layer in layers.iter_mut() {
            if !layer.data.contains(&tag) {
                continue;
            }
            let Some(pattern) = validation_pattern(&layer.validation, &web.validation, name) else {
                debug!(layer = %layer.name, param = name, "no validation pattern, substitution skipped");
                continue;
            };
            match Regex::new(pattern) {
                Ok(re) if re.is_match(value) => {
                    layer.data = layer.data.replace(&tag, value);
                }
                Ok(_) => {
                    ctx.errors.set_error(
                        ErrorCode::Regex,
                        format!("Parameter pattern validation failed for '{}'.", name),
                        "LiteEngine::apply_substitutions",
                    );
                }
                Err(e) => {
                    ctx.errors.set_error(
                        ErrorCode::Regex,
                        format!("Invalid validation pattern for '{}': {}", name, e),
                        "LiteEngine::apply_substitutions",
                    );
                }
            }
        }
    }
}

fn apply_default_substitutions(map: &mut MapDef) {
    let defaults: Vec<(String, String)> = map
        .web
        .validation
        .iter()
        .filter_map(|(k, v)| default_key(k).map(|key| (key.to_string(), v.to_string())))
        .collect();

    for layer in &mut map.layers {
        let layer_defaults: Vec<(String, String)> = layer
            .validation
            .iter()
            .filter_map(|(k, v)| default_key(k).map(|key| (key.to_string(), v.to_string())))
            .collect();
        for (key, value) in layer_defaults.iter().chain(defaults.iter()) {
            let tag = format!("%{}%", key);
            if layer.data.contains(&tag) {
                layer.data = layer.data.replace(&tag, value);
            }
        }
    }
}

fn default_key(key: &str) -> Option<&str> {
    if starts_with_ignore_case(key, "default_") {
        Some(&key["default_".len()..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    const MAP: &str = r#"
MAP
  NAME "base"
  WEB
    VALIDATION "q" "^[0-9]+$" "default_q" "0" END
  END
  LAYER
    NAME "roads"
    STATUS OFF
    DATA "roads_%q%"
  END
  LAYER
    NAME "labels"
    DATA "labels_%lang%"
    VALIDATION "default_lang" "en" END
  END
END
"#;

    fn params(pairs: &[(&str, &str)]) -> RequestParams {
        let mut params = RequestParams::new();
        for (n, v) in pairs {
            params.push(*n, *v);
        }
        params
    }

    fn apply_to(pairs: &[(&str, &str)]) -> (Status, MapDef, EngineContext) {
        let mut ctx = EngineContext::new();
        let mut map = MapDef::parse(MAP).unwrap();
        let status = apply(&mut ctx, &mut map, &params(pairs), &EngineLocks::new());
        (status, map, ctx)
    }

    #[test]
    fn test_structural_edits() {
        let (status, map, ctx) = apply_to(&[
            ("map.name", "edited"),
            ("map_size", "640 480"),
            ("map.layer[roads].status", "on"),
            ("map_layer[labels]_data", "static"),
        ]);
        assert_eq!(status, Status::Success);
        assert!(ctx.errors.is_empty());
        assert_eq!(map.name, "edited");
        assert_eq!(map.size, (640, 480));
        assert_eq!(map.layer("roads").unwrap().status, LayerStatus::On);
        assert_eq!(map.layer("labels").unwrap().data, "static");
    }

    #[test]
    fn test_structural_edits_wait_for_parser_lock() {
        let locks = Arc::new(EngineLocks::new());
        let held = locks.acquire(LockName::Parser);

        let (done_tx, done_rx) = channel::bounded(1);
        let worker_locks = Arc::clone(&locks);
        let worker = thread::spawn(move || {
            let mut ctx = EngineContext::new();
            let mut map = MapDef::parse(MAP).unwrap();
            let status = apply(&mut ctx, &mut map, &params(&[("map.name", "locked")]), &worker_locks);
            done_tx.send(()).unwrap();
            (status, map.name)
        });

        // Blocked while another thread holds the parser lock
        assert!(done_rx.recv_timeout(Duration::from_millis(200)).is_err());

        drop(held);
        done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        let (status, name) = worker.join().unwrap();
        assert_eq!(status, Status::Success);
        assert_eq!(name, "locked");
    }

    #[test]
    fn test_substitutions_do_not_take_parser_lock() {
        let locks = EngineLocks::new();
        let _held = locks.acquire(LockName::Parser);

        // The parser lock is not reentrant, so this would hang if taken
        let mut ctx = EngineContext::new();
        let mut map = MapDef::parse(MAP).unwrap();
        let status = apply(&mut ctx, &mut map, &params(&[("q", "42"), ("classgroup", "day")]), &locks);
        assert_eq!(status, Status::Success);
        assert_eq!(map.layer("roads").unwrap().data, "roads_42");
    }

    #[test]
    fn test_bad_edit_fails() {
        let (status, _, ctx) = apply_to(&[("map.layer[missing].data", "x")]);
        assert_eq!(status, Status::Failure);
        assert_eq!(
            ctx.errors.current().unwrap().message,
            "Layer named 'missing' does not exist in the map."
        );

        let (status, _, ctx) = apply_to(&[("map.size", "huge")]);
        assert_eq!(status, Status::Failure);
        assert_eq!(ctx.errors.current().unwrap().message, "Parsing error near (huge):(line 1)");
    }

    #[test]
    fn test_validated_substitution() {
        let (status, map, ctx) = apply_to(&[("q", "42"), ("lang", "fr")]);
        assert_eq!(status, Status::Success);
        assert_eq!(map.layer("roads").unwrap().data, "roads_42");
        // No pattern for "lang", so the default applies
        assert_eq!(map.layer("labels").unwrap().data, "labels_en");
        assert!(ctx.errors.is_empty());
    }

    #[test]
    fn test_rejected_substitution_falls_back_to_default() {
        let (status, map, ctx) = apply_to(&[("q", "1;DROP")]);
        assert_eq!(status, Status::Success);
        assert_eq!(map.layer("roads").unwrap().data, "roads_0");
        let head = ctx.errors.current().unwrap();
        assert_eq!(head.code, ErrorCode::Regex);
        assert!(!head.is_reported);
    }

    #[test]
    fn test_classgroup_cookie_and_qstring() {
        let mut p = params(&[("classgroup", "night"), ("qstring", "%q%"), ("map.name", "kept")]);
        p.set_cookie_data("session=1");
        let mut ctx = EngineContext::new();
        let mut map = MapDef::parse(MAP).unwrap();
        assert!(apply(&mut ctx, &mut map, &p, &EngineLocks::new()).is_success());
        assert!(map.layers.iter().all(|l| l.class_group.as_deref() == Some("night")));
        assert_eq!(map.web.metadata.get("http_cookie_data"), Some("session=1"));
        assert_eq!(map.name, "kept");
    }

    #[test]
    fn test_split_path_respects_brackets() {
        assert_eq!(split_path("layer[a.b].data", '.'), vec!["layer[a.b]", "data"]);
        assert_eq!(split_path("layer[a_b]_status", '_'), vec!["layer[a_b]", "status"]);
        assert_eq!(split_path("name", '.'), vec!["name"]);
    }
}
