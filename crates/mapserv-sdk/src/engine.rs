//! The `MapEngine` trait and the per-thread engine context

use crate::error::ErrorStack;
use crate::io::IoContext;
use crate::lock::EngineLocks;
use crate::params::{ParamSource, RequestParams};
use std::path::Path;

/// Outcome of an engine operation that has no other return value
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    /// Operation succeeded
    Success,
    /// Operation failed; details are on the error stack
    Failure,
}

impl Status {
    /// Check for [`Status::Success`]
    #[inline]
    pub fn is_success(self) -> bool {
        self == Status::Success
    }

    /// Map a boolean to a status
    #[inline]
    pub fn from_bool(ok: bool) -> Self {
        if ok {
            Status::Success
        } else {
            Status::Failure
        }
    }
}

/// Version and capability information reported by an engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineVersion {
    /// Short version string, e.g. "6.2.0"
    pub version: String,
    /// Numeric version, e.g. 60200
    pub numeric: Option<u32>,
    /// Full build details, including `SUPPORTS=...` capability flags
    pub details: String,
}

impl EngineVersion {
    /// Check a `SUPPORTS=<flag>` capability in the build details
    pub fn supports(&self, flag: &str) -> bool {
        self.details
            .split_whitespace()
            .any(|word| word.strip_prefix("SUPPORTS=").map(|f| f == flag).unwrap_or(false))
    }

    /// Whether the engine was built to run on several threads at once
    pub fn supports_threads(&self) -> bool {
        self.supports("THREADS")
    }
}

/// Engine state owned by one thread of execution.
///
/// Holds what a native engine keeps in thread globals: the error list and
/// the IO handlers. A worker creates one context and passes it to every
/// engine call it makes, so nothing here is shared between threads.
#[derive(Debug, Default)]
pub struct EngineContext {
    /// The error list
    pub errors: ErrorStack,
    /// stdout/stdin handlers
    pub io: IoContext,
}

impl EngineContext {
    /// Create a clean context
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no errors are recorded and both IO channels are on defaults
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.io.is_default()
    }

    /// Drop recorded errors and restore default IO handlers
    pub fn reset(&mut self) {
        self.errors.reset();
        self.io.reset_handlers();
    }
}

/// A blocking mapping engine.
///
/// Every method runs on a worker thread and reports failures through
/// `ctx.errors`. Implementations must not keep references to the context
/// beyond a call.
pub trait MapEngine: Send + Sync + 'static {
    /// The engine's in-memory map definition
    type Map: Send + Sync + 'static;

    /// Version and capability information
    fn version(&self) -> EngineVersion;

    /// One-time process initialisation
    fn setup(&self, _ctx: &mut EngineContext) -> Status {
        Status::Success
    }

    /// Process teardown, called once after the last worker has stopped
    fn cleanup(&self) {}

    /// Parse a mapfile from disk
    fn load_map_file(&self, ctx: &mut EngineContext, path: &Path) -> Option<Self::Map>;

    /// Parse a mapfile held in memory. The bytes are passed through as
    /// given; decoding them is up to the engine.
    fn load_map_string(&self, ctx: &mut EngineContext, source: &[u8]) -> Option<Self::Map>;

    /// Deep-copy a map so a request can edit it privately
    fn copy_map(&self, ctx: &mut EngineContext, map: &Self::Map) -> Option<Self::Map>;

    /// Decode the CGI parameters of a request.
    ///
    /// `env` resolves CGI variables; a posted body is read from the stdin
    /// channel. Returns `None` when no parameter set could be resolved at
    /// all, which is distinct from an empty set.
    fn load_params(&self, ctx: &mut EngineContext, env: &dyn ParamSource) -> Option<RequestParams>;

    /// Apply per-request edits and substitutions to a private map copy.
    ///
    /// Structural edits derived from request parameters must be made while
    /// holding [`crate::LockName::Parser`] from `locks`.
    fn update_map(
        &self,
        ctx: &mut EngineContext,
        map: &mut Self::Map,
        params: &RequestParams,
        locks: &EngineLocks,
    ) -> Status;

    /// Execute the request, writing the CGI response to the stdout channel
    fn dispatch(&self, ctx: &mut EngineContext, map: &Self::Map, params: &RequestParams) -> Status;
}
