//! Chunk-to-event codec for agent stdout.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length and
//! feeds each complete line to a [`StreamParser`]. Partial lines stay
//! buffered until the terminating newline arrives, so chunk boundaries
//! never affect the events produced.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use agent_relay::stream::codec::EventCodec;
//!
//! let events = FramedRead::new(child_stdout, EventCodec::new());
//! ```

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::warn;

use crate::models::event::DomainEvent;
use crate::stream::parser::StreamParser;
use crate::{AppError, Result};

/// Maximum line length accepted from the agent: 4 MiB.
///
/// Longer lines are discarded and logged instead of being buffered.
pub const MAX_LINE_BYTES: usize = 4 * 1_048_576;

/// Line-framing decoder producing batches of [`DomainEvent`]s.
///
/// Each decoded item holds the events of one or more complete lines; lines
/// that yield no events are consumed silently.
#[derive(Debug)]
pub struct EventCodec {
    lines: LinesCodec,
    parser: StreamParser,
}

impl EventCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom line-length limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
            parser: StreamParser::new(),
        }
    }

    /// Parser state, for inspecting the session token after decoding.
    #[must_use]
    pub fn parser(&self) -> &StreamParser {
        &self.parser
    }

    fn next_events(&mut self, src: &mut BytesMut, eof: bool) -> Result<Option<Vec<DomainEvent>>> {
        loop {
            let decoded = if eof {
                self.lines.decode_eof(src)
            } else {
                self.lines.decode(src)
            };

            match decoded {
                Ok(Some(line)) => {
                    let events = self.parser.parse_line(&line);
                    if !events.is_empty() {
                        return Ok(Some(events));
                    }
                }
                Ok(None) => {
                    if eof {
                        self.parser.finish();
                    }
                    return Ok(None);
                }
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(
                        max_bytes = MAX_LINE_BYTES,
                        "agent output line too long, discarding"
                    );
                }
                Err(LinesCodecError::Io(err)) if err.kind() == std::io::ErrorKind::InvalidData => {
                    warn!(error = %err, "agent output line is not valid utf-8, discarding");
                }
                Err(LinesCodecError::Io(err)) => {
                    return Err(AppError::Stream(format!("read failed: {err}")));
                }
            }
        }
    }
}

impl Default for EventCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EventCodec {
    type Item = Vec<DomainEvent>;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.next_events(src, false)
    }

    /// Flush a final unterminated line at end of stream, then close the
    /// parser.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.next_events(src, true)
    }
}
