//! AMI wire codec
//!
//! A frame is a run of `key: value` lines closed by one blank line. There is
//! no escaping: values must not contain the line terminator.

use crate::{
    constants::{FIELD_SEPARATOR, LINE_TERMINATOR, MAX_BUFFER_SIZE, MAX_FRAME_SIZE},
    error::{AmiError, AmiResult},
    frame::Frame,
    headers::AmiHeader,
};

/// Serialize a frame to wire bytes.
///
/// `Action` goes first when present since Asterisk expects it to lead a
/// command; the remaining fields follow in unspecified order.
pub fn serialize(frame: &Frame) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        frame
            .iter()
            .map(|(k, v)| k.len() + v.len() + FIELD_SEPARATOR.len() + LINE_TERMINATOR.len())
            .sum::<usize>()
            + LINE_TERMINATOR.len(),
    );

    let action = AmiHeader::Action.as_str();
    if let Some(value) = frame.field(action) {
        write_field(&mut out, action, value);
    }
    for (key, value) in frame
        .iter()
        .filter(|(k, _)| *k != action)
    {
        write_field(&mut out, key, value);
    }

    out.extend_from_slice(LINE_TERMINATOR.as_bytes());
    out
}

fn write_field(out: &mut Vec<u8>, key: &str, value: &str) {
    out.extend_from_slice(key.as_bytes());
    out.extend_from_slice(FIELD_SEPARATOR.as_bytes());
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(LINE_TERMINATOR.as_bytes());
}

/// Parse one frame from a complete byte slice.
///
/// Stops at the first blank line or at the end of input, whichever comes
/// first; anything after the blank line is ignored.
pub fn parse_frame(input: &[u8]) -> Frame {
    let mut frame = Frame::new();
    for line in input.split(|b| *b == b'\n') {
        let line = trim_line(line);
        if line.is_empty() {
            break;
        }
        insert_line(&mut frame, line);
    }
    frame
}

/// Strip a trailing carriage return so CRLF traffic reads like LF traffic.
fn trim_line(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r")
        .unwrap_or(line)
}

/// Split at the first separator; a line without one becomes a field with an
/// empty value. Later duplicates overwrite earlier ones.
fn insert_line(frame: &mut Frame, line: &[u8]) {
    let line = String::from_utf8_lossy(line);
    match line.split_once(FIELD_SEPARATOR) {
        Some((key, value)) => frame.set_field(key, value),
        None => frame.set_field(&*line, ""),
    }
}

/// Incremental frame decoder.
///
/// Socket bytes are appended with [`add_data`](Self::add_data) as they arrive;
/// [`decode`](Self::decode) yields a frame each time a blank line closes one.
/// Lines and fields received so far are kept across calls, so a read timeout
/// in the middle of a frame loses nothing.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    position: usize,
    pending: Frame,
    /// Line bytes folded into `pending` since the last blank line.
    pending_bytes: usize,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    ///
    /// Fails with [`AmiError::ProtocolError`] once a single line or a single
    /// unterminated frame outgrows its limit.
    pub fn add_data(&mut self, data: &[u8]) -> AmiResult<()> {
        if self.pending_bytes > MAX_FRAME_SIZE {
            return Err(AmiError::protocol_error(format!(
                "{} bytes of fields without a closing blank line (limit {})",
                self.pending_bytes, MAX_FRAME_SIZE
            )));
        }
        self.compact();
        self.buffer
            .extend_from_slice(data);
        if self.buffer.len() > MAX_BUFFER_SIZE
            && !self
                .buffer
                .contains(&b'\n')
        {
            return Err(AmiError::protocol_error(format!(
                "{} bytes buffered without a line terminator (limit {})",
                self.buffer.len(),
                MAX_BUFFER_SIZE
            )));
        }
        Ok(())
    }

    /// Decode the next complete frame, or `None` if more data is needed.
    ///
    /// A blank line with no fields before it yields an empty frame; callers
    /// decide whether to drop it.
    pub fn decode(&mut self) -> Option<Frame> {
        loop {
            let rest = &self.buffer[self.position..];
            let newline = rest
                .iter()
                .position(|b| *b == b'\n')?;
            let start = self.position;
            self.position += newline + 1;

            let line = trim_line(&self.buffer[start..start + newline]);
            if line.is_empty() {
                self.pending_bytes = 0;
                return Some(std::mem::take(&mut self.pending));
            }
            self.pending_bytes += line.len();
            insert_line(&mut self.pending, line);
        }
    }

    /// Whether a frame is partially received.
    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty() || self.position < self.buffer.len()
    }

    fn compact(&mut self) {
        if self.position > 0 {
            self.buffer
                .drain(..self.position);
            self.position = 0;
        }
    }
}
