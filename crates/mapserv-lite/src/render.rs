//! Request dispatch: `map`, `query` and `mapfile` modes

use crate::mapfile::{Layer, LayerStatus, MapDef};
use mapserv_sdk::{EngineContext, ErrorCode, RequestParams, Status};
use std::fmt::Write;

/// Output modes understood by the engine
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Draw the map
    Map,
    /// Search layers for `qstring`
    Query,
    /// Echo the map definition the request ran against
    Mapfile,
}

impl Mode {
    /// Parse a `mode` parameter
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "map" => Some(Mode::Map),
            "query" => Some(Mode::Query),
            "mapfile" => Some(Mode::Mapfile),
            _ => None,
        }
    }
}

/// Execute the request, writing a CGI response to the stdout channel
pub fn dispatch(ctx: &mut EngineContext, map: &MapDef, params: &RequestParams) -> Status {
    let mode = match params.get("mode") {
        None => Mode::Map,
        Some(value) => match Mode::parse(value) {
            Some(mode) => mode,
            None => {
                ctx.errors.set_error(ErrorCode::Web, "Invalid mode.", "LiteEngine::dispatch");
                return Status::Failure;
            }
        },
    };

    match mode {
        Mode::Map => render_map(ctx, map, params),
        Mode::Query => render_query(ctx, map, params),
        Mode::Mapfile => {
            ctx.io.write_header("Content-Type", "text/plain");
            ctx.io.end_headers();
            ctx.io.print(format_args!("{}", map));
            Status::Success
        }
    }
}

/// Layers switched on by STATUS or by the `layer`/`layers` parameters
fn drawn_layers<'a>(map: &'a MapDef, params: &RequestParams) -> Vec<&'a Layer> {
    let requested: Vec<&str> = params
        .iter()
        .filter(|(n, _)| n.eq_ignore_ascii_case("layer") || n.eq_ignore_ascii_case("layers"))
        .flat_map(|(_, v)| v.split_whitespace())
        .collect();
    let all = requested.iter().any(|r| r.eq_ignore_ascii_case("all"));

    map.layers
        .iter()
        .filter(|layer| {
            layer.status != LayerStatus::Off || all || requested.iter().any(|r| r.eq_ignore_ascii_case(&layer.name))
        })
        .collect()
}

fn render_map(ctx: &mut EngineContext, map: &MapDef, params: &RequestParams) -> Status {
    let mut body = String::new();
    let _ = writeln!(body, "MAP {} {}x{}", map.name, map.size.0, map.size.1);
    if let Some([minx, miny, maxx, maxy]) = map.extent {
        let _ = writeln!(body, "EXTENT {} {} {} {}", minx, miny, maxx, maxy);
    }

    for layer in drawn_layers(map, params) {
        if layer.data.is_empty() {
            ctx.errors.set_error(
                ErrorCode::Io,
                format!("Layer '{}' has no data source, skipped.", layer.name),
                "LiteEngine::render_map",
            );
            continue;
        }
        let _ = write!(body, "LAYER {} {} DATA={}", layer.name, layer.kind, layer.data);
        if let Some(group) = &layer.class_group {
            let _ = write!(body, " CLASSGROUP={}", group);
        }
        body.push('\n');
    }

    ctx.io.write_header("Content-Type", "text/plain");
    ctx.io.end_headers();
    ctx.io.write_stdout(body.as_bytes());
    Status::Success
}

fn render_query(ctx: &mut EngineContext, map: &MapDef, params: &RequestParams) -> Status {
    let needle = params.get("qstring").unwrap_or("").to_ascii_lowercase();
    let qlayer = params.get("qlayer");

    let matches: Vec<&Layer> = map
        .layers
        .iter()
        .filter(|l| qlayer.map(|q| l.name.eq_ignore_ascii_case(q)).unwrap_or(true))
        .filter(|l| {
            !needle.is_empty()
                && (l.name.to_ascii_lowercase().contains(&needle) || l.data.to_ascii_lowercase().contains(&needle))
        })
        .collect();

    if matches.is_empty() {
        // The error page below is the engine's own report of the failure
        ctx.errors.set_error(ErrorCode::NotFound, "No matching record(s) found.", "LiteEngine::query");
        ctx.errors.mark_reported();
        ctx.io.write_header("Content-Type", "text/html");
        ctx.io.end_headers();
        ctx.io.print(format_args!(
            "<HTML>\n<HEAD><TITLE>MapServer Message</TITLE></HEAD>\n<BODY>\nLiteEngine::query: Search returned no results. No matching record(s) found.\n</BODY></HTML>"
        ));
        return Status::Success;
    }

    ctx.io.write_header("Content-Type", "text/plain");
    ctx.io.end_headers();
    for layer in matches {
        ctx.io.print(format_args!("MATCH {} DATA={}\n", layer.name, layer.data));
    }
    Status::Success
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP: &str = r#"
MAP
  NAME "demo"
  SIZE 10 20
  LAYER NAME "base" STATUS DEFAULT DATA "base.shp" END
  LAYER NAME "roads" STATUS ON DATA "roads.shp" END
  LAYER NAME "hidden" STATUS OFF DATA "hidden.shp" END
  LAYER NAME "empty" STATUS ON DATA "" END
END
"#;

    fn run(pairs: &[(&str, &str)]) -> (Status, String, EngineContext) {
        let mut ctx = EngineContext::new();
        ctx.io.install_stdout_buffer("out");
        let map = MapDef::parse(MAP).unwrap();
        let mut params = RequestParams::new();
        for (n, v) in pairs {
            params.push(*n, *v);
        }
        let status = dispatch(&mut ctx, &map, &params);
        let out = ctx.io.stdout_sink_mut("out").unwrap().take_data();
        (status, String::from_utf8(out).unwrap(), ctx)
    }

    #[test]
    fn test_map_mode_is_default() {
        let (status, out, ctx) = run(&[]);
        assert_eq!(status, Status::Success);
        assert!(out.starts_with("Content-Type: text/plain\r\n\r\nMAP demo 10x20\n"));
        assert!(out.contains("LAYER base POLYGON DATA=base.shp\n"));
        assert!(out.contains("LAYER roads POLYGON DATA=roads.shp\n"));
        assert!(!out.contains("hidden"));

        // The empty layer leaves an unreported error behind
        let head = ctx.errors.current().unwrap();
        assert!(!head.is_reported);
        assert_eq!(head.message, "Layer 'empty' has no data source, skipped.");
    }

    #[test]
    fn test_requested_layers_are_drawn() {
        let (_, out, _) = run(&[("mode", "MAP"), ("layers", "hidden other")]);
        assert!(out.contains("LAYER hidden POLYGON DATA=hidden.shp\n"));
    }

    #[test]
    fn test_query_mode() {
        let (status, out, ctx) = run(&[("mode", "query"), ("qstring", "ROADS")]);
        assert_eq!(status, Status::Success);
        assert_eq!(out, "Content-Type: text/plain\r\n\r\nMATCH roads DATA=roads.shp\n");
        assert!(ctx.errors.is_empty());
    }

    #[test]
    fn test_query_without_matches_is_reported() {
        let (status, out, ctx) = run(&[("mode", "query"), ("qstring", "rivers")]);
        assert_eq!(status, Status::Success);
        assert!(out.starts_with("Content-Type: text/html\r\n\r\n<HTML>"));
        let head = ctx.errors.current().unwrap();
        assert_eq!(head.code, ErrorCode::NotFound);
        assert!(head.is_reported);
    }

    #[test]
    fn test_mapfile_mode_echoes_map() {
        let (status, out, _) = run(&[("mode", "mapfile")]);
        assert_eq!(status, Status::Success);
        let body = out.strip_prefix("Content-Type: text/plain\r\n\r\n").unwrap();
        assert_eq!(MapDef::parse(body).unwrap(), MapDef::parse(MAP).unwrap());
    }

    #[test]
    fn test_invalid_mode() {
        let (status, out, ctx) = run(&[("mode", "teapot")]);
        assert_eq!(status, Status::Failure);
        assert!(out.is_empty());
        assert_eq!(ctx.errors.current().unwrap().message, "Invalid mode.");
    }
}
