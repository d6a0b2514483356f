//! MapHandle: a reference-counted, loaded map
//!
//! A handle owns one engine map. Every operation is submitted to a
//! [`Dispatcher`] as an [`AsyncTask`] and reports back through a callback on
//! the host thread.
//!
//! Requests never edit the shared map. The worker copies it, applies the
//! request's edits to the copy, dispatches against the copy and drops it.
//! Each submitted request holds a [`Retained`] guard, so the map outlives
//! every request that was submitted against it, whatever order the
//! completions run in.

use crate::capture::{CapturedOutput, OutputBuffer, OutputCapture};
use crate::dispatcher::{Dispatcher, WorkerScope};
use crate::environment::EnvironmentView;
use crate::error::{ErrorKind, MapserverError};
use crate::task::{AsyncTask, TaskId, TaskResult};
use crate::translate::ErrorTranslator;
use mapserv_sdk::{EngineContext, EngineLocks, ErrorCode, MapEngine, RequestParams};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

static NEXT_MAP_ID: AtomicU64 = AtomicU64::new(1);

struct MapInner<E: MapEngine> {
    id: u64,
    map: E::Map,
    in_flight: AtomicUsize,
}

impl<E: MapEngine> Drop for MapInner<E> {
    fn drop(&mut self) {
        debug!(map = self.id, "map released");
    }
}

/// A loaded map shared by every request submitted against it
pub struct MapHandle<E: MapEngine> {
    inner: Arc<MapInner<E>>,
}

impl<E: MapEngine> Clone for MapHandle<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: MapEngine> fmt::Debug for MapHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapHandle")
            .field("id", &self.inner.id)
            .field("in_flight", &self.in_flight())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

/// Keeps a map alive while a task that uses it is outstanding.
///
/// Created at submission and dropped after the task's completion has run
/// (or unwound).
pub struct Retained<E: MapEngine> {
    inner: Arc<MapInner<E>>,
}

impl<E: MapEngine> Retained<E> {
    fn new(inner: Arc<MapInner<E>>) -> Self {
        inner.in_flight.fetch_add(1, Ordering::AcqRel);
        Self { inner }
    }
}

impl<E: MapEngine> Drop for Retained<E> {
    fn drop(&mut self) {
        self.inner.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<E: MapEngine> MapHandle<E> {
    fn new(map: E::Map) -> Self {
        let id = NEXT_MAP_ID.fetch_add(1, Ordering::Relaxed);
        debug!(map = id, "map loaded");
        Self {
            inner: Arc::new(MapInner {
                id,
                map,
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Load a mapfile from disk
    pub fn from_file<P, F>(dispatcher: &Dispatcher<E>, path: P, callback: F) -> TaskId
    where
        P: Into<PathBuf>,
        F: FnOnce(Result<MapHandle<E>, MapserverError>) + 'static,
    {
        let task = AsyncTask::new(
            "load_file",
            path.into(),
            |scope: &mut WorkerScope<'_, E>, path: PathBuf| {
                let map = scope.engine.load_map_file(scope.ctx, &path);
                finish_load(scope.ctx, map)
            },
            move |result: TaskResult<E::Map>| callback(result.map(MapHandle::new)),
        );
        dispatcher.submit(task)
    }

    /// Load a mapfile held in memory
    pub fn from_string<S, F>(dispatcher: &Dispatcher<E>, source: S, callback: F) -> TaskId
    where
        S: AsRef<[u8]>,
        F: FnOnce(Result<MapHandle<E>, MapserverError>) + 'static,
    {
        let source = source.as_ref().to_vec();
        let task = AsyncTask::new(
            "load_string",
            source,
            |scope: &mut WorkerScope<'_, E>, source: Vec<u8>| {
                let map = scope.engine.load_map_string(scope.ctx, &source);
                finish_load(scope.ctx, map)
            },
            move |result: TaskResult<E::Map>| callback(result.map(MapHandle::new)),
        );
        dispatcher.submit(task)
    }

    /// Run one CGI-style request against this map
    pub fn execute<F>(&self, dispatcher: &Dispatcher<E>, env: EnvironmentView, callback: F) -> TaskId
    where
        F: FnOnce(Result<Response, MapserverError>) + 'static,
    {
        let retained = Retained::new(Arc::clone(&self.inner));
        let input = (Arc::clone(&self.inner), env);
        let task = AsyncTask::new(
            "execute",
            input,
            |scope: &mut WorkerScope<'_, E>, (inner, env): (Arc<MapInner<E>>, EnvironmentView)| {
                execute_request(scope, inner.id, &inner.map, env)
            },
            callback,
        )
        .retaining(retained);
        dispatcher.submit(task)
    }

    /// Numeric identifier, unique within the process
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The engine's map
    pub fn map(&self) -> &E::Map {
        &self.inner.map
    }

    /// Number of submitted requests whose completion has not run yet
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Number of live references to the map, handles and tasks alike
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

fn finish_load<M>(ctx: &mut EngineContext, map: Option<M>) -> TaskResult<M> {
    let chain = ErrorTranslator::snapshot(&mut ctx.errors);
    match map {
        Some(map) => Ok(map),
        None => Err(ErrorTranslator::load_failure(chain)),
    }
}

/// Progress of one execute request
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ExecuteStage {
    Submitted,
    ParamsLoaded,
    MapCopied,
    RequestDispatched,
    OutputCaptured,
    ErrorChecked,
}

fn execute_request<E: MapEngine>(
    scope: &mut WorkerScope<'_, E>,
    map_id: u64,
    map: &E::Map,
    env: EnvironmentView,
) -> TaskResult<Response> {
    let engine = scope.engine;
    let locks = scope.locks;
    let (env, body) = env.split_body();

    let mut stage = ExecuteStage::Submitted;
    let mut failure: Option<ErrorKind> = None;
    let mut working_copy: Option<E::Map> = None;

    // Every path below falls through to output harvesting
    let captured = {
        let mut capture = OutputCapture::install(scope.ctx, body);

        match engine.load_params(&mut capture, &env) {
            None => {
                capture.errors.set_error(
                    ErrorCode::Misc,
                    ErrorKind::Param.fallback_message(),
                    "MapHandle::execute",
                );
                failure = Some(ErrorKind::Param);
            }
            Some(params) => {
                stage = ExecuteStage::ParamsLoaded;
                match prepare_map(engine, &mut capture, map, &params, locks) {
                    None => failure = Some(ErrorKind::Substitution),
                    Some(copy) => {
                        stage = ExecuteStage::MapCopied;
                        let copy = working_copy.insert(copy);
                        if engine.dispatch(&mut capture, copy, &params).is_success() {
                            stage = ExecuteStage::RequestDispatched;
                        } else {
                            failure = Some(ErrorKind::Dispatch);
                        }
                    }
                }
            }
        }

        if let Some(kind) = failure {
            debug!(map = map_id, ?stage, ?kind, "request failed, harvesting output");
        }
        capture.finish()
    };
    stage = ExecuteStage::OutputCaptured;
    trace!(map = map_id, ?stage, headers = captured.headers.len(), "output captured");

    let chain = ErrorTranslator::snapshot(&mut scope.ctx.errors);
    let reportable = ErrorTranslator::reportable(&chain, failure.is_some());
    stage = ExecuteStage::ErrorChecked;

    drop(working_copy);
    trace!(map = map_id, ?stage, errors = chain.len(), reportable, "request done");

    if reportable {
        return Err(MapserverError::from_chain(
            failure.unwrap_or(ErrorKind::UnhandledEngine),
            chain,
        ));
    }
    Ok(Response::from_captured(captured))
}

/// Copy the shared map and apply the request's edits to the copy only
fn prepare_map<E: MapEngine>(
    engine: &E,
    ctx: &mut EngineContext,
    map: &E::Map,
    params: &RequestParams,
    locks: &EngineLocks,
) -> Option<E::Map> {
    let mut copy = engine.copy_map(ctx, map)?;
    if engine.update_map(ctx, &mut copy, params, locks).is_success() {
        Some(copy)
    } else {
        None
    }
}

/// One response header value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum HeaderValue {
    /// Textual value
    Text(String),
    /// Numeric value (Content-Length)
    Integer(u64),
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Text(s) => f.write_str(s),
            HeaderValue::Integer(n) => write!(f, "{}", n),
        }
    }
}

/// Response headers: each name maps to every value emitted for it
pub type Headers = BTreeMap<String, Vec<HeaderValue>>;

/// The result of a successful execute
#[derive(Debug)]
pub struct Response {
    headers: Headers,
    data: Option<OutputBuffer>,
}

impl Response {
    fn from_captured(captured: CapturedOutput) -> Self {
        let CapturedOutput {
            content_type,
            headers: lines,
            buffer,
        } = captured;

        let mut headers = Headers::new();
        if let Some(content_type) = content_type {
            headers
                .entry("Content-Type".to_string())
                .or_default()
                .push(HeaderValue::Text(content_type));
        }
        for (name, value) in lines {
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            headers.entry(name).or_default().push(HeaderValue::Text(value));
        }

        let data = buffer.filter(|b| !b.is_empty());
        if let Some(data) = &data {
            headers.insert(
                "Content-Length".to_string(),
                vec![HeaderValue::Integer(data.size() as u64)],
            );
        }

        Self { headers, data }
    }

    /// All headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Values of one header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&[HeaderValue]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// The Content-Type header
    pub fn content_type(&self) -> Option<&str> {
        match self.header("Content-Type")?.first()? {
            HeaderValue::Text(s) => Some(s),
            HeaderValue::Integer(_) => None,
        }
    }

    /// The Content-Length header
    pub fn content_length(&self) -> Option<u64> {
        match self.header("Content-Length")?.first()? {
            HeaderValue::Integer(n) => Some(*n),
            HeaderValue::Text(s) => s.parse().ok(),
        }
    }

    /// The body, if the engine wrote one
    pub fn data(&self) -> Option<&OutputBuffer> {
        self.data.as_ref()
    }

    /// Take ownership of the body bytes. Only the first call returns them.
    pub fn take_data(&mut self) -> Option<Vec<u8>> {
        self.data.as_mut()?.take()
    }

    /// Split into headers and body
    pub fn into_parts(self) -> (Headers, Option<OutputBuffer>) {
        (self.headers, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captured(content_type: Option<&str>, headers: &[(&str, &str)], body: &[u8]) -> CapturedOutput {
        CapturedOutput {
            content_type: content_type.map(str::to_string),
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            buffer: Some(OutputBuffer::from_vec(body.to_vec())),
        }
    }

    #[test]
    fn test_response_headers() {
        let response = Response::from_captured(captured(
            Some("image/png"),
            &[("Set-Cookie", "a=1"), ("Set-Cookie", "b=2"), ("Content-Length", "999")],
            b"12345",
        ));
        assert_eq!(response.content_type(), Some("image/png"));
        assert_eq!(response.content_length(), Some(5));
        assert_eq!(
            response.header("set-cookie").unwrap(),
            &[HeaderValue::Text("a=1".into()), HeaderValue::Text("b=2".into())]
        );
    }

    #[test]
    fn test_empty_body_has_no_length() {
        let response = Response::from_captured(captured(Some("text/plain"), &[], b""));
        assert!(response.data().is_none());
        assert_eq!(response.content_length(), None);
    }

    #[test]
    fn test_take_data_once() {
        let mut response = Response::from_captured(captured(None, &[], b"abc"));
        assert_eq!(response.take_data(), Some(b"abc".to_vec()));
        assert_eq!(response.take_data(), None);
        assert!(!response.data().unwrap().owns_data());
    }

    #[test]
    fn test_headers_serialize_as_lists() {
        let response = Response::from_captured(captured(Some("text/plain"), &[], b"hi"));
        let json = serde_json::to_value(response.headers()).unwrap();
        assert_eq!(json, serde_json::json!({"Content-Length": [2], "Content-Type": ["text/plain"]}));
    }
}
