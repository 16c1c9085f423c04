//! Byte-accumulating control-channel parser (spec §4.2).
//!
//! A single TCP socket carries both RTSP text messages and, once SETUP has
//! negotiated interleaved transport, binary `$`-framed RTP/RTCP blocks
//! (RFC 2326 §10.12). [`ControlParser`] distinguishes the two by looking at
//! the next unconsumed byte and yields one [`ControlEvent`] at a time,
//! buffering partial input until a complete unit is available.

use crate::error::{ParseErrorKind, RtspError};
use crate::protocol::{RtspRequest, RtspResponse};

/// One fully decoded unit off the control channel, or a buffering/fatal signal.
pub enum ControlEvent {
    Request(RtspRequest),
    Response(RtspResponse),
    /// A complete interleaved RTP/RTCP block (RFC 2326 §10.12).
    Interleaved { channel_id: u8, data: Vec<u8> },
    /// Not enough bytes buffered yet for a complete unit.
    More,
    /// Framing could not be recovered; the session must terminate (spec §4.1).
    Desync(String),
}

const INTERLEAVED_MARKER: u8 = b'$';

/// Accumulates bytes from the control socket and yields [`ControlEvent`]s.
///
/// Feed bytes with [`feed`](Self::feed), then call [`poll`](Self::poll) in a
/// loop until it returns [`ControlEvent::More`] — matching spec §4.2's "the
/// Controller feeds the buffer until the parser returns `more`".
#[derive(Default)]
pub struct ControlParser {
    buffer: Vec<u8>,
}

impl ControlParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly read bytes to the internal buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Attempt to decode the next complete unit from the buffer.
    pub fn poll(&mut self) -> ControlEvent {
        if self.buffer.is_empty() {
            return ControlEvent::More;
        }

        if self.buffer[0] == INTERLEAVED_MARKER {
            return self.poll_interleaved();
        }

        self.poll_text()
    }

    fn poll_interleaved(&mut self) -> ControlEvent {
        if self.buffer.len() < 4 {
            return ControlEvent::More;
        }
        let channel_id = self.buffer[1];
        let length = u16::from_be_bytes([self.buffer[2], self.buffer[3]]) as usize;
        let total = 4 + length;
        if self.buffer.len() < total {
            return ControlEvent::More;
        }
        let data = self.buffer[4..total].to_vec();
        self.buffer.drain(0..total);
        ControlEvent::Interleaved { channel_id, data }
    }

    fn poll_text(&mut self) -> ControlEvent {
        let header_end = match find_header_terminator(&self.buffer) {
            Some(pos) => pos,
            None => return ControlEvent::More,
        };

        let header_bytes = &self.buffer[..header_end];
        let Ok(header_text) = std::str::from_utf8(header_bytes) else {
            self.buffer.clear();
            return ControlEvent::Desync("control header block was not valid UTF-8".into());
        };

        let content_length = content_length_of(header_text);
        let body_start = header_end + terminator_len(&self.buffer, header_end);
        let total = body_start + content_length;
        if self.buffer.len() < total {
            return ControlEvent::More;
        }

        let body = if content_length > 0 {
            Some(self.buffer[body_start..total].to_vec())
        } else {
            None
        };

        let is_response = header_text.starts_with("RTSP/");
        let event = if is_response {
            match RtspResponse::parse_with_body(header_text, body) {
                Ok(response) => ControlEvent::Response(response),
                Err(err) => ControlEvent::Desync(format!("{err}")),
            }
        } else {
            match RtspRequest::parse_with_body(header_text, body) {
                Ok(request) => ControlEvent::Request(request),
                Err(err) => ControlEvent::Desync(format!("{err}")),
            }
        };

        self.buffer.drain(0..total);
        event
    }
}

/// Read `Content-Length` out of a raw header block (request or response).
fn content_length_of(header_text: &str) -> usize {
    header_text
        .lines()
        .skip(1)
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim().eq_ignore_ascii_case("Content-Length").then(|| value.trim().parse().ok())
        })
        .flatten()
        .unwrap_or(0)
}

/// Find the offset of the blank line terminating the header block (the
/// start of `\r\n\r\n` or `\n\n`), scanning for either line ending.
fn find_header_terminator(buffer: &[u8]) -> Option<usize> {
    if let Some(pos) = find_subslice(buffer, b"\r\n\r\n") {
        return Some(pos + 2);
    }
    find_subslice(buffer, b"\n\n").map(|pos| pos + 1)
}

/// Length of the blank-line terminator starting at `header_end`.
fn terminator_len(buffer: &[u8], header_end: usize) -> usize {
    if buffer[header_end..].starts_with(b"\r\n") {
        2
    } else {
        1
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

impl From<RtspError> for ControlEvent {
    fn from(err: RtspError) -> Self {
        ControlEvent::Desync(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_with_no_body() {
        let mut parser = ControlParser::new();
        parser.feed(b"OPTIONS rtsp://h/stream RTSP/1.0\r\nCSeq: 1\r\n\r\n");
        match parser.poll() {
            ControlEvent::Request(req) => assert_eq!(req.method, "OPTIONS"),
            _ => panic!("expected Request"),
        }
    }

    #[test]
    fn more_until_blank_line_arrives() {
        let mut parser = ControlParser::new();
        parser.feed(b"OPTIONS rtsp://h/stream RTSP/1.0\r\nCSeq: 1\r\n");
        assert!(matches!(parser.poll(), ControlEvent::More));
        parser.feed(b"\r\n");
        assert!(matches!(parser.poll(), ControlEvent::Request(_)));
    }

    #[test]
    fn waits_for_full_body() {
        let mut parser = ControlParser::new();
        parser.feed(b"ANNOUNCE rtsp://h/s RTSP/1.0\r\nContent-Length: 5\r\n\r\nv=0");
        assert!(matches!(parser.poll(), ControlEvent::More));
        parser.feed(b"\r\n");
        match parser.poll() {
            ControlEvent::Request(req) => {
                assert_eq!(req.body_str().unwrap(), "v=0\r\n");
            }
            _ => panic!("expected Request"),
        }
    }

    #[test]
    fn parses_response() {
        let mut parser = ControlParser::new();
        parser.feed(b"RTSP/1.0 200 OK\r\nCSeq: 1\r\n\r\n");
        match parser.poll() {
            ControlEvent::Response(resp) => assert_eq!(resp.status_code, 200),
            _ => panic!("expected Response"),
        }
    }

    #[test]
    fn parses_interleaved_block() {
        let mut parser = ControlParser::new();
        let mut bytes = vec![b'$', 0, 0, 3];
        bytes.extend_from_slice(&[1, 2, 3]);
        parser.feed(&bytes);
        match parser.poll() {
            ControlEvent::Interleaved { channel_id, data } => {
                assert_eq!(channel_id, 0);
                assert_eq!(data, vec![1, 2, 3]);
            }
            _ => panic!("expected Interleaved"),
        }
    }

    #[test]
    fn interleaved_waits_for_full_payload() {
        let mut parser = ControlParser::new();
        parser.feed(&[b'$', 1, 0, 4, 0xAA]);
        assert!(matches!(parser.poll(), ControlEvent::More));
        parser.feed(&[0xBB, 0xCC, 0xDD]);
        match parser.poll() {
            ControlEvent::Interleaved { channel_id, data } => {
                assert_eq!(channel_id, 1);
                assert_eq!(data, vec![0xAA, 0xBB, 0xCC, 0xDD]);
            }
            _ => panic!("expected Interleaved"),
        }
    }

    #[test]
    fn mixed_text_and_interleaved_sequence() {
        let mut parser = ControlParser::new();
        parser.feed(b"OPTIONS rtsp://h/s RTSP/1.0\r\nCSeq: 1\r\n\r\n");
        parser.feed(&[b'$', 0, 0, 2, 9, 9]);
        assert!(matches!(parser.poll(), ControlEvent::Request(_)));
        assert!(matches!(parser.poll(), ControlEvent::Interleaved { .. }));
        assert!(matches!(parser.poll(), ControlEvent::More));
    }

    #[test]
    fn desync_on_invalid_header() {
        let mut parser = ControlParser::new();
        parser.feed(b"NOT_A_REQUEST_LINE\r\n\r\n");
        assert!(matches!(parser.poll(), ControlEvent::Desync(_)));
    }
}
