//! Engine IO channels
//!
//! A mapping engine writes its CGI response (headers followed by the body)
//! to "stdout" and reads posted request bodies from "stdin". Either channel
//! can be redirected to memory by installing a labelled handler, which is how
//! the bridge captures a response without touching the process streams.

use std::fmt;
use std::io::Write;
use thiserror::Error;

/// Errors raised when looking up an installed IO handler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// No in-memory handler is installed on the channel
    #[error("No buffer handler installed on {0}")]
    NotInstalled(&'static str),

    /// A handler is installed but it belongs to somebody else
    #[error("Handler label mismatch on {channel}: expected {expected}, found {found}")]
    LabelMismatch {
        /// Channel name
        channel: &'static str,
        /// Label the caller installed
        expected: String,
        /// Label actually found
        found: String,
    },
}

/// In-memory sink for the stdout channel
#[derive(Debug, Default)]
pub struct OutputSink {
    label: String,
    data: Vec<u8>,
}

impl OutputSink {
    /// Create an empty sink identified by `label`
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: Vec::new(),
        }
    }

    /// Label given at installation
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Bytes written so far
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access to the written bytes
    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if nothing has been written
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Move the written bytes out, leaving the sink empty
    pub fn take_data(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }
}

/// In-memory source for the stdin channel
#[derive(Debug, Default)]
struct InputSource {
    data: Vec<u8>,
    offset: usize,
}

/// Handler attached to the stdout channel
#[derive(Debug, Default)]
enum StdoutHandler {
    /// Write to the process stdout
    #[default]
    Default,
    /// Write to memory
    Buffer(OutputSink),
}

/// Handler attached to the stdin channel
#[derive(Debug, Default)]
enum StdinHandler {
    /// No request body available
    #[default]
    Default,
    /// Serve a request body from memory
    Buffer(InputSource),
}

/// The stdout/stdin handler pair for one thread of execution
#[derive(Debug, Default)]
pub struct IoContext {
    stdout: StdoutHandler,
    stdin: StdinHandler,
}

impl IoContext {
    /// Create a context with default handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Redirect stdout to a fresh in-memory sink
    pub fn install_stdout_buffer(&mut self, label: impl Into<String>) {
        self.stdout = StdoutHandler::Buffer(OutputSink::new(label));
    }

    /// Serve stdin from `data`
    pub fn install_stdin_buffer(&mut self, data: Vec<u8>) {
        self.stdin = StdinHandler::Buffer(InputSource { data, offset: 0 });
    }

    /// Look up the stdout sink installed under `label`
    pub fn stdout_sink_mut(&mut self, label: &str) -> Result<&mut OutputSink, ChannelError> {
        match &mut self.stdout {
            StdoutHandler::Buffer(sink) => {
                if sink.label == label {
                    Ok(sink)
                } else {
                    Err(ChannelError::LabelMismatch {
                        channel: "stdout",
                        expected: label.to_string(),
                        found: sink.label.clone(),
                    })
                }
            }
            StdoutHandler::Default => Err(ChannelError::NotInstalled("stdout")),
        }
    }

    /// Write raw bytes to stdout
    pub fn write_stdout(&mut self, bytes: &[u8]) {
        match &mut self.stdout {
            StdoutHandler::Buffer(sink) => sink.data.extend_from_slice(bytes),
            StdoutHandler::Default => {
                let _ = std::io::stdout().write_all(bytes);
            }
        }
    }

    /// Write formatted text to stdout
    pub fn print(&mut self, args: fmt::Arguments<'_>) {
        let text = fmt::format(args);
        self.write_stdout(text.as_bytes());
    }

    /// Write one `Name: value` header line
    pub fn write_header(&mut self, name: &str, value: &str) {
        self.print(format_args!("{}: {}\r\n", name, value));
    }

    /// Terminate the header block
    pub fn end_headers(&mut self) {
        self.write_stdout(b"\r\n");
    }

    /// Read whatever is left on stdin
    pub fn read_stdin_to_end(&mut self) -> Vec<u8> {
        match &mut self.stdin {
            StdinHandler::Buffer(source) => {
                let rest = source.data[source.offset..].to_vec();
                source.offset = source.data.len();
                rest
            }
            StdinHandler::Default => Vec::new(),
        }
    }

    /// Restore both channels to their default handlers
    pub fn reset_handlers(&mut self) {
        self.stdout = StdoutHandler::Default;
        self.stdin = StdinHandler::Default;
    }

    /// Whether both channels are on their default handlers
    pub fn is_default(&self) -> bool {
        matches!(self.stdout, StdoutHandler::Default) && matches!(self.stdin, StdinHandler::Default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_stdout_collects_writes() {
        let mut io = IoContext::new();
        io.install_stdout_buffer("buffer-1");
        io.write_header("Content-Type", "text/plain");
        io.end_headers();
        io.print(format_args!("hello {}", 42));

        let sink = io.stdout_sink_mut("buffer-1").unwrap();
        assert_eq!(sink.data(), b"Content-Type: text/plain\r\n\r\nhello 42");
    }

    #[test]
    fn test_sink_lookup_checks_label() {
        let mut io = IoContext::new();
        assert_eq!(
            io.stdout_sink_mut("buffer-1").unwrap_err(),
            ChannelError::NotInstalled("stdout")
        );

        io.install_stdout_buffer("buffer-2");
        assert_eq!(
            io.stdout_sink_mut("buffer-1").unwrap_err(),
            ChannelError::LabelMismatch {
                channel: "stdout",
                expected: "buffer-1".to_string(),
                found: "buffer-2".to_string(),
            }
        );

        // The matching label hands out the sink itself
        io.write_stdout(b"abc");
        let sink = io.stdout_sink_mut("buffer-2").unwrap();
        sink.data_mut().push(b'd');
        assert_eq!(io.stdout_sink_mut("buffer-2").unwrap().take_data(), b"abcd");
        assert!(io.stdout_sink_mut("buffer-2").unwrap().is_empty());
    }

    #[test]
    fn test_stdin_is_consumed_once() {
        let mut io = IoContext::new();
        io.install_stdin_buffer(b"a=1&b=2".to_vec());
        assert_eq!(io.read_stdin_to_end(), b"a=1&b=2");
        assert!(io.read_stdin_to_end().is_empty());
    }

    #[test]
    fn test_reset_handlers() {
        let mut io = IoContext::new();
        io.install_stdout_buffer("x");
        io.install_stdin_buffer(Vec::new());
        assert!(!io.is_default());
        io.reset_handlers();
        assert!(io.is_default());
    }
}
