//! Error types surfaced to the host

use crate::translate::{ErrorChain, ErrorEntry};
use mapserv_sdk::ErrorCode;
use serde::Serialize;
use thiserror::Error;

/// Which part of an operation failed
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// The engine could not be initialised or lacks a required capability
    Setup,
    /// A mapfile could not be parsed into a map
    Load,
    /// No CGI parameters could be resolved from the environment
    Param,
    /// Copying the map or applying request edits to it failed
    Substitution,
    /// The engine failed to execute the request
    Dispatch,
    /// An unreported error was left behind by an otherwise successful run
    UnhandledEngine,
    /// Worker-side execution panicked
    WorkerPanic,
}

impl ErrorKind {
    /// Message used when the engine recorded nothing for a failure
    pub fn fallback_message(self) -> &'static str {
        match self {
            ErrorKind::Setup => "Mapserver setup failed",
            ErrorKind::Load => "Could not load mapfile",
            ErrorKind::Param => "No request parameters loaded",
            ErrorKind::Substitution => "Could not prepare the map for the request",
            ErrorKind::Dispatch => "Request dispatch failed",
            ErrorKind::UnhandledEngine => "Unhandled engine error",
            ErrorKind::WorkerPanic => "Worker panicked",
        }
    }
}

/// A structured engine error, as delivered to completion callbacks.
///
/// The fields mirror the engine's own error record: the head of the error
/// list supplies `code`, `routine`, `message` and `is_reported`, while
/// `error_stack` keeps every entry that was on the list, outer to inner.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{message}")]
#[serde(rename_all = "camelCase")]
pub struct MapserverError {
    /// Always "MapserverError"
    pub name: &'static str,
    /// Which part of the operation failed
    pub kind: ErrorKind,
    /// Error message
    pub message: String,
    /// Numeric engine error code
    pub code: i32,
    /// Category string for `code`
    pub category: &'static str,
    /// Routine that raised the error
    pub routine: String,
    /// Whether the engine had already emitted the error in its output
    pub is_reported: bool,
    /// Full snapshot of the engine's error list
    pub error_stack: ErrorChain,
}

impl MapserverError {
    /// Error name carried by every instance
    pub const NAME: &'static str = "MapserverError";

    /// Create an error that did not come from the engine's error list
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            name: Self::NAME,
            kind,
            message: message.into(),
            code: ErrorCode::Misc.as_i32(),
            category: ErrorCode::Misc.category(),
            routine: String::new(),
            is_reported: false,
            error_stack: ErrorChain::default(),
        }
    }

    /// Create an error from a snapshot of the engine's error list.
    ///
    /// The head entry provides the message and identity; an empty chain
    /// falls back to the kind's fixed message.
    pub fn from_chain(kind: ErrorKind, chain: ErrorChain) -> Self {
        match chain.head().cloned() {
            Some(head) if !head.code.is_no_error() && !head.message.is_empty() => {
                Self::from_entry(kind, &head).with_stack(chain)
            }
            _ => Self::new(kind, kind.fallback_message()).with_stack(chain),
        }
    }

    fn from_entry(kind: ErrorKind, entry: &ErrorEntry) -> Self {
        Self {
            name: Self::NAME,
            kind,
            message: entry.message.clone(),
            code: entry.code.as_i32(),
            category: entry.category,
            routine: entry.routine.clone(),
            is_reported: entry.is_reported,
            error_stack: ErrorChain::default(),
        }
    }

    /// Attach the engine error list snapshot
    pub fn with_stack(mut self, chain: ErrorChain) -> Self {
        self.error_stack = chain;
        self
    }

    /// Set the routine name
    pub fn with_routine(mut self, routine: impl Into<String>) -> Self {
        self.routine = routine.into();
        self
    }

    /// The engine error code
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::from_i32(self.code)
    }

    /// Render the error in its documented JSON shape
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({ "name": self.name, "message": self.message }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::ErrorTranslator;
    use mapserv_sdk::ErrorStack;

    #[test]
    fn test_new_uses_misc_code() {
        let err = MapserverError::new(ErrorKind::Load, "Could not load mapfile");
        assert_eq!(err.name, "MapserverError");
        assert_eq!(err.error_code(), ErrorCode::Misc);
        assert_eq!(err.to_string(), "Could not load mapfile");
        assert!(err.error_stack.is_empty());
    }

    #[test]
    fn test_from_chain_takes_head() {
        let mut stack = ErrorStack::new();
        stack.set_error(ErrorCode::Io, "inner", "open()");
        stack.set_error(ErrorCode::Parse, "outer", "parse()");
        let chain = ErrorTranslator::snapshot(&mut stack);

        let err = MapserverError::from_chain(ErrorKind::Dispatch, chain);
        assert_eq!(err.message, "outer");
        assert_eq!(err.routine, "parse()");
        assert_eq!(err.code, 20);
        assert_eq!(err.category, "Expression parser error.");
        assert_eq!(err.error_stack.len(), 2);
    }

    #[test]
    fn test_from_empty_chain_uses_fallback() {
        let err = MapserverError::from_chain(ErrorKind::Dispatch, ErrorChain::default());
        assert_eq!(err.message, "Request dispatch failed");
    }

    #[test]
    fn test_json_shape() {
        let mut stack = ErrorStack::new();
        stack.set_error(ErrorCode::Web, "Invalid mode.", "dispatch()");
        let chain = ErrorTranslator::snapshot(&mut stack);
        let json = MapserverError::from_chain(ErrorKind::Dispatch, chain).to_json();

        assert_eq!(json["name"], "MapserverError");
        assert_eq!(json["code"], 14);
        assert_eq!(json["category"], "Web application error.");
        assert_eq!(json["routine"], "dispatch()");
        assert_eq!(json["isReported"], false);
        assert_eq!(json["errorStack"][0]["message"], "Invalid mode.");
        assert_eq!(json["errorStack"][0]["isReported"], false);
    }
}
