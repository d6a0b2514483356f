//! ErrorTranslator: turns the engine's error list into per-request data
//!
//! The engine keeps one error list per thread of execution. After every
//! operation the bridge takes exactly one [`ErrorChain`] snapshot, which
//! empties the list, so nothing leaks into the next request the same worker
//! runs.

use crate::error::{ErrorKind, MapserverError};
use mapserv_sdk::{ErrorCode, ErrorObj, ErrorStack};
use serde::{Serialize, Serializer};

/// One entry of an [`ErrorChain`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    /// Engine error code
    #[serde(serialize_with = "serialize_code")]
    pub code: ErrorCode,
    /// Category string for `code`
    #[serde(skip)]
    pub category: &'static str,
    /// Routine that raised the error
    pub routine: String,
    /// Error message
    pub message: String,
    /// Whether the engine already emitted this error in its output
    pub is_reported: bool,
}

fn serialize_code<S: Serializer>(code: &ErrorCode, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_i32(code.as_i32())
}

impl From<&ErrorObj> for ErrorEntry {
    fn from(error: &ErrorObj) -> Self {
        Self {
            code: error.code,
            category: error.code.category(),
            routine: error.routine.clone(),
            message: error.message.clone(),
            is_reported: error.is_reported,
        }
    }
}

/// Ordered snapshot of the engine's error list, outer (most recent) first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ErrorChain {
    entries: Vec<ErrorEntry>,
}

impl ErrorChain {
    /// The most recent error
    pub fn head(&self) -> Option<&ErrorEntry> {
        self.entries.first()
    }

    /// Number of entries captured
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing was captured
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries, outer to inner
    pub fn iter(&self) -> std::slice::Iter<'_, ErrorEntry> {
        self.entries.iter()
    }

    /// Consume the chain into its entries
    pub fn into_entries(self) -> Vec<ErrorEntry> {
        self.entries
    }

    /// Whether the head is a real error the engine has not emitted yet
    pub fn has_unreported(&self) -> bool {
        self.head()
            .map(|head| !head.code.is_no_error() && !head.is_reported)
            .unwrap_or(false)
    }
}

impl<'a> IntoIterator for &'a ErrorChain {
    type Item = &'a ErrorEntry;
    type IntoIter = std::slice::Iter<'a, ErrorEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Read-and-clear access to the engine's error list
pub struct ErrorTranslator;

impl ErrorTranslator {
    /// Copy every linked error into a chain and empty the engine's list
    pub fn snapshot(errors: &mut ErrorStack) -> ErrorChain {
        let entries = match errors.take() {
            Some(head) => head.iter().map(ErrorEntry::from).collect(),
            None => Vec::new(),
        };
        ErrorChain { entries }
    }

    /// Whether an operation should surface an error to its caller.
    ///
    /// True when the operation flagged failure itself, or when the head of
    /// the chain is an error the engine has not already emitted in its
    /// output.
    pub fn reportable(chain: &ErrorChain, explicit_failure: bool) -> bool {
        explicit_failure || chain.has_unreported()
    }

    /// Build the error for a load operation that produced no map.
    ///
    /// The engine's own message is used only when it recorded a real,
    /// unreported error with a non-empty message; otherwise the fixed
    /// "Could not load mapfile" applies.
    pub fn load_failure(chain: ErrorChain) -> MapserverError {
        Self::failure_or_fallback(ErrorKind::Load, chain)
    }

    /// Build the error for an operation that failed outright, preferring a
    /// usable engine message over the kind's fixed one
    pub fn failure_or_fallback(kind: ErrorKind, chain: ErrorChain) -> MapserverError {
        let usable = chain
            .head()
            .map(|head| !head.code.is_no_error() && !head.is_reported && !head.message.is_empty())
            .unwrap_or(false);
        if usable {
            MapserverError::from_chain(kind, chain)
        } else {
            MapserverError::new(kind, kind.fallback_message()).with_stack(chain)
        }
    }
}
