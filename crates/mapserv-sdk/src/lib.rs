//! Mapserv SDK - the contract between the bridge and a mapping engine
//!
//! This crate provides the minimal types and traits a mapping engine has to
//! implement to be driven by `mapserv-runtime`, without depending on the
//! runtime itself.
//!
//! The engine state that a native mapping library keeps in thread globals
//! (the error list and the stdout/stdin IO handlers) is modelled here as an
//! explicit [`EngineContext`] value. Each worker thread owns one and lends it
//! to every engine call it makes.
//!
//! # Example
//!
//! ```ignore
//! use mapserv_sdk::{EngineContext, ErrorCode, MapEngine};
//!
//! fn fail(ctx: &mut EngineContext) {
//!     ctx.errors.set_error(ErrorCode::Misc, "Something broke", "fail()");
//! }
//! ```

#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod io;
pub mod lock;
pub mod params;

pub use engine::{EngineContext, EngineVersion, MapEngine, Status};
pub use error::{ErrorCode, ErrorObj, ErrorStack};
pub use io::{ChannelError, IoContext, OutputSink};
pub use lock::{EngineLocks, LockName};
pub use params::{ParamSource, RequestParams};
