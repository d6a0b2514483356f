//! OutputCapture: scoped redirection of the engine's IO channels
//!
//! [`OutputCapture::install`] points the stdout channel of a worker's engine
//! context at a fresh in-memory sink (and stdin at the request body). The
//! guard derefs to the context, so engine calls are made through it. When
//! the request is done, [`OutputCapture::finish`] strips the CGI headers,
//! seizes the remaining bytes and restores the default handlers. Dropping
//! the guard without finishing (a panic in the engine) still restores them.

use mapserv_sdk::{EngineContext, ErrorCode, OutputSink};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

static NEXT_CAPTURE_ID: AtomicU64 = AtomicU64::new(1);

/// Bytes seized from an output sink.
///
/// `owns_data` is true while the buffer still holds bytes nobody else has
/// taken. [`OutputBuffer::take`] hands them over exactly once; afterwards
/// the buffer is empty and reports `owns_data == false`.
#[derive(Debug, PartialEq, Eq)]
pub struct OutputBuffer {
    data: Vec<u8>,
    owns_data: bool,
}

impl OutputBuffer {
    /// Move the sink's bytes into a new buffer, leaving the sink empty
    pub fn seize(sink: &mut OutputSink) -> Self {
        Self {
            data: sink.take_data(),
            owns_data: true,
        }
    }

    /// Wrap bytes that are already owned by the caller
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data, owns_data: true }
    }

    /// Number of bytes held
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Check if no bytes are held
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the bytes are still owned by this buffer
    pub fn owns_data(&self) -> bool {
        self.owns_data
    }

    /// View the bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Transfer the bytes out. Returns `None` once they have been taken.
    pub fn take(&mut self) -> Option<Vec<u8>> {
        if !self.owns_data {
            return None;
        }
        self.owns_data = false;
        Some(std::mem::take(&mut self.data))
    }
}

/// Everything harvested from one capture
#[derive(Debug)]
pub struct CapturedOutput {
    /// Value of the leading Content-Type header
    pub content_type: Option<String>,
    /// Other header lines, in output order
    pub headers: Vec<(String, String)>,
    /// The response body
    pub buffer: Option<OutputBuffer>,
}

/// Guard holding a worker's engine context while its IO is redirected
pub struct OutputCapture<'a> {
    ctx: &'a mut EngineContext,
    label: String,
    finished: bool,
}

impl<'a> OutputCapture<'a> {
    /// Redirect stdout to memory and serve `body` (or nothing) on stdin
    pub fn install(ctx: &'a mut EngineContext, body: Option<Vec<u8>>) -> Self {
        let id = NEXT_CAPTURE_ID.fetch_add(1, Ordering::Relaxed);
        let label = format!("buffer-{}", id);
        ctx.io.install_stdout_buffer(label.clone());
        ctx.io.install_stdin_buffer(body.unwrap_or_default());
        trace!(label = %label, "installed output capture");
        Self {
            ctx,
            label,
            finished: false,
        }
    }

    /// The label identifying this installation
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Strip headers, seize the body and restore the default handlers
    pub fn finish(mut self) -> CapturedOutput {
        let content_type = self.strip_content_type();
        let headers = self.strip_headers();
        let buffer = self.take_buffer();
        self.release();
        CapturedOutput {
            content_type,
            headers,
            buffer,
        }
    }

    fn sink(&mut self) -> Option<&mut OutputSink> {
        self.ctx.io.stdout_sink_mut(&self.label).ok()
    }

    /// Remove a leading `Content-Type` header line and return its value
    fn strip_content_type(&mut self) -> Option<String> {
        let sink = self.sink()?;
        let data = sink.data();
        let starts_with_ct = data.len() >= 13 && data[..13].eq_ignore_ascii_case(b"content-type:");
        if !starts_with_ct {
            return None;
        }
        match parse_header_block(data) {
            Some(block) => {
                let (name, value) = block.headers.first()?;
                debug_assert!(name.eq_ignore_ascii_case("content-type"));
                let value = value.clone();
                let first_line = block.first_line_len;
                sink.data_mut().drain(..first_line);
                Some(value)
            }
            None => {
                self.ctx.errors.set_error(
                    ErrorCode::Misc,
                    "Corrupt Content-type header.",
                    "OutputCapture::strip_content_type",
                );
                None
            }
        }
    }

    /// Remove the remaining header block, up to and including the blank line
    fn strip_headers(&mut self) -> Vec<(String, String)> {
        let Some(sink) = self.sink() else {
            return Vec::new();
        };
        match parse_header_block(sink.data()) {
            Some(block) => {
                sink.data_mut().drain(..block.consumed);
                block.headers
            }
            None => Vec::new(),
        }
    }

    /// Seize the sink's bytes without copying them
    fn take_buffer(&mut self) -> Option<OutputBuffer> {
        let label = self.label.clone();
        match self.ctx.io.stdout_sink_mut(&label) {
            Ok(sink) => {
                trace!(label = sink.label(), bytes = sink.len(), "seizing output");
                Some(OutputBuffer::seize(sink))
            }
            Err(err) => {
                trace!(label = %label, error = %err, "output sink missing");
                self.ctx.errors.set_error(
                    ErrorCode::Misc,
                    "Can't identify msIO buffer.",
                    "OutputCapture::take_buffer",
                );
                None
            }
        }
    }

    fn release(&mut self) {
        if !self.finished {
            self.ctx.io.reset_handlers();
            self.finished = true;
            trace!(label = %self.label, "released output capture");
        }
    }
}

impl Deref for OutputCapture<'_> {
    type Target = EngineContext;

    fn deref(&self) -> &EngineContext {
        self.ctx
    }
}

impl DerefMut for OutputCapture<'_> {
    fn deref_mut(&mut self) -> &mut EngineContext {
        self.ctx
    }
}

impl Drop for OutputCapture<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

struct HeaderBlock {
    headers: Vec<(String, String)>,
    first_line_len: usize,
    consumed: usize,
}

/// Parse `Name: value` lines terminated by an empty line.
///
/// Returns `None` unless the data starts with a complete, well formed block.
fn parse_header_block(data: &[u8]) -> Option<HeaderBlock> {
    let mut headers = Vec::new();
    let mut first_line_len = 0;
    let mut pos = 0;

    loop {
        let rest = &data[pos..];
        let newline = rest.iter().position(|&b| b == b'\n')?;
        let line = &rest[..newline];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let line_len = newline + 1;

        if line.is_empty() {
            if headers.is_empty() {
                first_line_len = line_len;
            }
            return Some(HeaderBlock {
                headers,
                first_line_len,
                consumed: pos + line_len,
            });
        }

        let text = std::str::from_utf8(line).ok()?;
        let (name, value) = text.split_once(':')?;
        if name.is_empty() || name.contains(char::is_whitespace) {
            return None;
        }
        if headers.is_empty() {
            first_line_len = line_len;
        }
        headers.push((name.to_string(), value.trim().to_string()));
        pos += line_len;
    }
}
