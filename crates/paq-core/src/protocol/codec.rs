//! Incremental decoder for the method message stream.
//!
//! Bytes arrive with arbitrary read-boundary fragmentation; a message is only
//! emitted once its terminating blank line has been seen. A malformed status
//! line poisons that single message, not the stream.

use super::message::Message;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The first line of a message block did not start with a numeric code.
    #[error("malformed status line: {0:?}")]
    MalformedStatusLine(String),
}

/// Accumulates raw bytes from one worker's stdout and extracts complete
/// messages. The only state is the partial tail of the stream.
#[derive(Debug, Default)]
pub struct MessageReader {
    buf: Vec<u8>,
}

impl MessageReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extract every complete message currently buffered. Partial trailing
    /// data stays buffered for the next read.
    pub fn drain(&mut self) -> Vec<Result<Message, ProtocolError>> {
        let mut out = Vec::new();
        loop {
            let Some(end) = find_blank_line(&self.buf) else {
                break;
            };
            let block: Vec<u8> = self.buf.drain(..end).collect();
            // swallow the blank-line terminator (and any extra newlines)
            let skip = self.buf.iter().take_while(|&&b| b == b'\n').count();
            self.buf.drain(..skip);

            let text = String::from_utf8_lossy(&block);
            out.push(parse_block(&text));
        }
        out
    }

    /// Bytes currently held as a partial message.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Offset of the first `\n\n` in `buf` (end of the message body), if any.
fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn parse_block(text: &str) -> Result<Message, ProtocolError> {
    let mut lines = text.lines();
    let status = lines.next().unwrap_or("");

    let digits: &str = status
        .split_once(char::is_whitespace)
        .map(|(d, _)| d)
        .unwrap_or(status);
    let code: u16 = digits
        .parse()
        .map_err(|_| ProtocolError::MalformedStatusLine(status.to_string()))?;
    let reason = status[digits.len()..].trim_start().to_string();

    let mut msg = Message::new(code, reason);
    for line in lines {
        // header lines without a colon are ignored, matching the tolerant
        // behaviour of the original tag parser
        if let Some((key, value)) = line.split_once(':') {
            msg.push_parsed(key.trim().to_string(), value.trim().to_string());
        }
    }
    Ok(msg)
}
