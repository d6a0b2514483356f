//! Mapserv runtime - runs a blocking mapping engine behind an async bridge
//!
//! The runtime drives any [`mapserv_sdk::MapEngine`] from a single-threaded
//! host without ever blocking it:
//!
//! - [`Dispatcher`] owns the engine and a pool of worker threads, and runs
//!   completions on the host thread when the host polls it.
//! - [`MapHandle`] is a reference-counted loaded map whose operations
//!   (load from file, load from string, execute a request) are submitted as
//!   [`AsyncTask`]s.
//! - [`OutputCapture`] redirects the engine's output to memory for one
//!   request and seizes the bytes without copying them.
//! - [`ErrorTranslator`] snapshots and clears the engine's error list exactly
//!   once per operation.
//! - [`EnvironmentView`] is the per-request CGI variable view the engine
//!   pulls parameters from.
//!
//! # Example
//!
//! ```ignore
//! use mapserv_runtime::{Dispatcher, EnvironmentView, MapHandle, RuntimeConfig};
//!
//! let dispatcher = Dispatcher::start(engine, &RuntimeConfig::default())?;
//! MapHandle::from_file(&dispatcher, "world.map", |result| {
//!     let map = result.expect("load failed");
//!     // keep `map` and call `map.execute(...)` later
//! });
//! dispatcher.run_until_idle();
//! ```

pub mod capture;
pub mod cgi;
pub mod config;
pub mod dispatcher;
pub mod environment;
pub mod error;
pub mod handle;
pub mod task;
pub mod translate;

pub use capture::{CapturedOutput, OutputBuffer, OutputCapture};
pub use cgi::{CgiError, CgiRequest};
pub use config::{CompletionPanic, ConfigError, RuntimeConfig};
pub use dispatcher::{Dispatcher, Versions, WorkerScope};
pub use environment::EnvironmentView;
pub use error::{ErrorKind, MapserverError};
pub use handle::{HeaderValue, Headers, MapHandle, Response, Retained};
pub use task::{AsyncTask, TaskId, TaskResult};
pub use translate::{ErrorChain, ErrorEntry, ErrorTranslator};
