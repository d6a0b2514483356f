//! The engine's error list
//!
//! Engines record failures by pushing onto an [`ErrorStack`]. The most recent
//! error sits at the head and links to the ones recorded before it. Nothing
//! is ever removed from the stack except by [`ErrorStack::reset`] or
//! [`ErrorStack::take`], which is how the bridge consumes it once per request.

use std::fmt;

/// Numeric error codes reported by a mapping engine
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// No error recorded
    NoError,
    /// Unable to access file
    Io,
    /// Memory allocation error
    Memory,
    /// Incorrect data type
    Type,
    /// Symbol definition error
    Symbol,
    /// Regular expression error
    Regex,
    /// TrueType font error
    Font,
    /// DBASE file error
    Dbase,
    /// GD library error
    Gd,
    /// Unknown identifier
    Identifier,
    /// Premature end of file
    Eof,
    /// Projection library error
    Projection,
    /// General error message
    Misc,
    /// CGI error
    Cgi,
    /// Web application error
    Web,
    /// Image handling error
    Image,
    /// Hash table error
    Hash,
    /// Join error
    Join,
    /// Search returned no results
    NotFound,
    /// Shapefile error
    Shapefile,
    /// Expression parser error
    Parse,
    /// A code this SDK does not know about
    Other(i32),
}

impl ErrorCode {
    /// The raw numeric value of the code
    pub fn as_i32(self) -> i32 {
        match self {
            ErrorCode::NoError => 0,
            ErrorCode::Io => 1,
            ErrorCode::Memory => 2,
            ErrorCode::Type => 3,
            ErrorCode::Symbol => 4,
            ErrorCode::Regex => 5,
            ErrorCode::Font => 6,
            ErrorCode::Dbase => 7,
            ErrorCode::Gd => 8,
            ErrorCode::Identifier => 9,
            ErrorCode::Eof => 10,
            ErrorCode::Projection => 11,
            ErrorCode::Misc => 12,
            ErrorCode::Cgi => 13,
            ErrorCode::Web => 14,
            ErrorCode::Image => 15,
            ErrorCode::Hash => 16,
            ErrorCode::Join => 17,
            ErrorCode::NotFound => 18,
            ErrorCode::Shapefile => 19,
            ErrorCode::Parse => 20,
            ErrorCode::Other(code) => code,
        }
    }

    /// Build a code from its numeric value
    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => ErrorCode::NoError,
            1 => ErrorCode::Io,
            2 => ErrorCode::Memory,
            3 => ErrorCode::Type,
            4 => ErrorCode::Symbol,
            5 => ErrorCode::Regex,
            6 => ErrorCode::Font,
            7 => ErrorCode::Dbase,
            8 => ErrorCode::Gd,
            9 => ErrorCode::Identifier,
            10 => ErrorCode::Eof,
            11 => ErrorCode::Projection,
            12 => ErrorCode::Misc,
            13 => ErrorCode::Cgi,
            14 => ErrorCode::Web,
            15 => ErrorCode::Image,
            16 => ErrorCode::Hash,
            17 => ErrorCode::Join,
            18 => ErrorCode::NotFound,
            19 => ErrorCode::Shapefile,
            20 => ErrorCode::Parse,
            other => ErrorCode::Other(other),
        }
    }

    /// Human readable category for the code
    pub fn category(self) -> &'static str {
        match self {
            ErrorCode::NoError => "",
            ErrorCode::Io => "Unable to access file.",
            ErrorCode::Memory => "Memory allocation error.",
            ErrorCode::Type => "Incorrect data type.",
            ErrorCode::Symbol => "Symbol definition error.",
            ErrorCode::Regex => "Regular expression error.",
            ErrorCode::Font => "TrueType Font error.",
            ErrorCode::Dbase => "DBASE file error.",
            ErrorCode::Gd => "GD library error.",
            ErrorCode::Identifier => "Unknown identifier.",
            ErrorCode::Eof => "Premature End-of-File.",
            ErrorCode::Projection => "Projection library error.",
            ErrorCode::Misc => "General error message.",
            ErrorCode::Cgi => "CGI error.",
            ErrorCode::Web => "Web application error.",
            ErrorCode::Image => "Image handling error.",
            ErrorCode::Hash => "Hash table error.",
            ErrorCode::Join => "Join error.",
            ErrorCode::NotFound => "Search returned no results.",
            ErrorCode::Shapefile => "Shapefile error.",
            ErrorCode::Parse => "Expression parser error.",
            ErrorCode::Other(_) => "Unknown error",
        }
    }

    /// Whether this is the "no error" sentinel
    pub fn is_no_error(self) -> bool {
        self == ErrorCode::NoError
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

/// One entry of the engine's error list
#[derive(Debug)]
pub struct ErrorObj {
    /// Error code
    pub code: ErrorCode,
    /// Routine that raised the error
    pub routine: String,
    /// Error message
    pub message: String,
    /// Has the engine already emitted this error in its own output?
    pub is_reported: bool,
    /// The error recorded before this one
    pub next: Option<Box<ErrorObj>>,
}

impl ErrorObj {
    fn empty() -> Self {
        ErrorObj {
            code: ErrorCode::NoError,
            routine: String::new(),
            message: String::new(),
            is_reported: false,
            next: None,
        }
    }

    /// Iterate over this error and every error linked behind it
    pub fn iter(&self) -> ErrorIter<'_> {
        ErrorIter { cursor: Some(self) }
    }
}

impl Drop for ErrorObj {
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(mut node) = next {
            next = node.next.take();
        }
    }
}

/// Iterator over a linked error list, head first
pub struct ErrorIter<'a> {
    cursor: Option<&'a ErrorObj>,
}

impl<'a> Iterator for ErrorIter<'a> {
    type Item = &'a ErrorObj;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.cursor?;
        self.cursor = current.next.as_deref();
        Some(current)
    }
}

/// The engine's error list for one thread of execution
#[derive(Debug, Default)]
pub struct ErrorStack {
    head: Option<Box<ErrorObj>>,
}

impl ErrorStack {
    /// Create an empty error stack
    pub fn new() -> Self {
        Self { head: None }
    }

    /// Record an error.
    ///
    /// A head whose code is [`ErrorCode::NoError`] is overwritten in place;
    /// otherwise the new error becomes the head and links to the old one.
    pub fn set_error(&mut self, code: ErrorCode, message: impl Into<String>, routine: impl Into<String>) {
        let reuse_head = matches!(&self.head, Some(head) if head.code.is_no_error());
        if !reuse_head {
            let mut node = Box::new(ErrorObj::empty());
            node.next = self.head.take();
            self.head = Some(node);
        }
        if let Some(head) = self.head.as_mut() {
            head.code = code;
            head.message = message.into();
            head.routine = routine.into();
            head.is_reported = false;
        }
    }

    /// The most recent error, if any
    pub fn current(&self) -> Option<&ErrorObj> {
        self.head.as_deref()
    }

    /// Flag the most recent error as already emitted by the engine
    pub fn mark_reported(&mut self) {
        if let Some(head) = self.head.as_mut() {
            head.is_reported = true;
        }
    }

    /// Whether an error with a code other than "no error" is recorded
    pub fn has_error(&self) -> bool {
        self.head.as_ref().map(|h| !h.code.is_no_error()).unwrap_or(false)
    }

    /// Number of linked entries
    pub fn len(&self) -> usize {
        self.head.as_deref().map(|h| h.iter().count()).unwrap_or(0)
    }

    /// Check if the stack is empty
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Detach the whole list, leaving the stack empty
    pub fn take(&mut self) -> Option<Box<ErrorObj>> {
        self.head.take()
    }

    /// Discard every recorded error
    pub fn reset(&mut self) {
        // ErrorObj's Drop unlinks the tail iteratively
        self.head = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip_and_category() {
        assert_eq!(ErrorCode::from_i32(20), ErrorCode::Parse);
        assert_eq!(ErrorCode::Parse.as_i32(), 20);
        assert_eq!(ErrorCode::from_i32(999), ErrorCode::Other(999));
        assert_eq!(ErrorCode::Other(999).category(), "Unknown error");
        assert_eq!(ErrorCode::Misc.category(), "General error message.");
    }

    #[test]
    fn test_set_error_pushes_new_head() {
        let mut stack = ErrorStack::new();
        stack.set_error(ErrorCode::Io, "first", "a()");
        stack.set_error(ErrorCode::Parse, "second", "b()");

        let head = stack.current().unwrap();
        assert_eq!(head.code, ErrorCode::Parse);
        assert_eq!(head.message, "second");
        assert_eq!(head.next.as_ref().unwrap().message, "first");
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_set_error_reuses_no_error_head() {
        let mut stack = ErrorStack::new();
        stack.set_error(ErrorCode::NoError, "", "");
        stack.set_error(ErrorCode::Misc, "boom", "c()");
        assert_eq!(stack.len(), 1);
        assert!(stack.has_error());
    }

    #[test]
    fn test_mark_reported_only_touches_head() {
        let mut stack = ErrorStack::new();
        stack.set_error(ErrorCode::Io, "first", "a()");
        stack.set_error(ErrorCode::Web, "second", "b()");
        stack.mark_reported();

        let flags: Vec<bool> = stack.current().unwrap().iter().map(|e| e.is_reported).collect();
        assert_eq!(flags, vec![true, false]);
    }

    #[test]
    fn test_reset_deep_list() {
        let mut stack = ErrorStack::new();
        for i in 0..200_000 {
            stack.set_error(ErrorCode::Misc, format!("error {}", i), "deep()");
        }
        assert_eq!(stack.len(), 200_000);
        stack.reset();
        assert!(stack.is_empty());
        assert!(!stack.has_error());
    }
}
