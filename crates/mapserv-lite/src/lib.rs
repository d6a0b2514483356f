//! Mapserv lite - a small mapping engine for the mapserv bridge
//!
//! `LiteEngine` implements [`mapserv_sdk::MapEngine`] over a subset of the
//! mapfile format. It decodes CGI requests, applies `map.*` edits and
//! validated `%var%` substitutions, and answers in one of three modes:
//!
//! - `map` (default): a plain-text rendering of the drawn layers
//! - `query`: layers whose name or data match `qstring`
//! - `mapfile`: the map definition the request ran against
//!
//! Every failure is reported on the context's error stack, never through a
//! return value, so the engine behaves the way the bridge expects a native
//! engine to behave.

pub mod mapfile;
pub mod params;
pub mod render;
pub mod update;

pub use mapfile::{Layer, LayerStatus, MapDef, ParseError, Table, Web};
pub use render::Mode;

use mapserv_sdk::{
    EngineContext, EngineLocks, EngineVersion, ErrorCode, MapEngine, ParamSource, RequestParams, Status,
};
use std::borrow::Cow;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Engine version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Counts one live map for the engine that created it
#[derive(Debug)]
struct LiveToken(Arc<AtomicUsize>);

impl LiveToken {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Clone for LiveToken {
    fn clone(&self) -> Self {
        Self::new(&self.0)
    }
}

impl Drop for LiveToken {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A map owned by a [`LiteEngine`]
#[derive(Debug, Clone)]
pub struct LiteMap {
    def: MapDef,
    _live: LiveToken,
}

impl Deref for LiteMap {
    type Target = MapDef;

    fn deref(&self) -> &MapDef {
        &self.def
    }
}

impl DerefMut for LiteMap {
    fn deref_mut(&mut self) -> &mut MapDef {
        &mut self.def
    }
}

/// The engine
#[derive(Debug)]
pub struct LiteEngine {
    threads: bool,
    live: Arc<AtomicUsize>,
}

impl Default for LiteEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LiteEngine {
    /// Create an engine built with thread support
    pub fn new() -> Self {
        Self {
            threads: true,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create an engine that claims no thread support
    pub fn single_threaded() -> Self {
        Self {
            threads: false,
            ..Self::new()
        }
    }

    /// Number of maps (loaded or copied) currently alive
    pub fn live_maps(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    fn adopt(&self, def: MapDef) -> LiteMap {
        LiteMap {
            def,
            _live: LiveToken::new(&self.live),
        }
    }

    fn parse(&self, ctx: &mut EngineContext, source: &[u8]) -> Option<LiteMap> {
        match MapDef::parse(&decode(source)) {
            Ok(def) => Some(self.adopt(def)),
            Err(e) => {
                let code = match e {
                    ParseError::Unexpected { .. } => ErrorCode::Parse,
                    ParseError::Eof => ErrorCode::Eof,
                };
                ctx.errors.set_error(code, e.to_string(), "LiteEngine::load_map");
                None
            }
        }
    }
}

/// Mapfile text as UTF-8, or as Latin-1 when the bytes are not valid UTF-8.
///
/// Latin-1 maps every byte to one char, so no input is altered or rejected.
fn decode(source: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(source) {
        Ok(text) => Cow::Borrowed(text),
        Err(e) => {
            debug!(valid_up_to = e.valid_up_to(), "mapfile is not UTF-8, reading it as Latin-1");
            Cow::Owned(source.iter().map(|&b| char::from(b)).collect())
        }
    }
}

impl MapEngine for LiteEngine {
    type Map = LiteMap;

    fn version(&self) -> EngineVersion {
        let mut details = format!("MapServer-lite version {} OUTPUT=TEXT SUPPORTS=PROJ", VERSION);
        if self.threads {
            details.push_str(" SUPPORTS=THREADS");
        }
        details.push_str(" INPUT=MAPFILE");

        let mut parts = VERSION.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
        let numeric = parts.next().unwrap_or(0) * 10000 + parts.next().unwrap_or(0) * 100 + parts.next().unwrap_or(0);

        EngineVersion {
            version: VERSION.to_string(),
            numeric: Some(numeric),
            details,
        }
    }

    fn cleanup(&self) {
        debug!(live_maps = self.live_maps(), "engine cleanup");
    }

    fn load_map_file(&self, ctx: &mut EngineContext, path: &Path) -> Option<LiteMap> {
        // An unreadable file leaves the error stack untouched
        let source = match std::fs::read(path) {
            Ok(source) => source,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cannot read mapfile");
                return None;
            }
        };
        self.parse(ctx, &source)
    }

    fn load_map_string(&self, ctx: &mut EngineContext, source: &[u8]) -> Option<LiteMap> {
        self.parse(ctx, source)
    }

    fn copy_map(&self, _ctx: &mut EngineContext, map: &LiteMap) -> Option<LiteMap> {
        trace!(map = %map.name, "copying map");
        Some(map.clone())
    }

    fn load_params(&self, ctx: &mut EngineContext, env: &dyn ParamSource) -> Option<RequestParams> {
        params::load(ctx, env)
    }

    fn update_map(
        &self,
        ctx: &mut EngineContext,
        map: &mut LiteMap,
        params: &RequestParams,
        locks: &EngineLocks,
    ) -> Status {
        update::apply(ctx, map, params, locks)
    }

    fn dispatch(&self, ctx: &mut EngineContext, map: &LiteMap, params: &RequestParams) -> Status {
        render::dispatch(ctx, map, params)
    }
}
