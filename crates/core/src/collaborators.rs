//! External collaborators the core calls out to but does not implement
//! itself (spec §6): the recording sink for `ANNOUNCE`/`RECORD`, and the
//! segment-listing surface for `LIST_SEGMENTS`/`GET_SEGMENT`.
//!
//! The "media source" collaborator (`describe`/`play`) is realized
//! concretely by [`crate::mount::MountRegistry`] rather than an injected
//! trait — this crate's server role always streams from a registered
//! [`Mount`](crate::mount::Mount), so there is no indirection to abstract
//! over there. `ANNOUNCE`/`RECORD` and the segment surface have no such
//! built-in concrete type, so they stay as trait objects an embedder plugs in.

use crate::media::DecodedFrame;
use crate::protocol::sdp::MediaInfo;

/// Outcome of an `ANNOUNCE`/`RECORD` ingestion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// The caller is not authorized to record to this URL.
    Unauthorized,
    /// No sink is registered for this URL.
    NotFound,
}

/// Receives pushed media description and (eventually) recorded frames.
///
/// The default [`NullMediaSink`] rejects everything with [`SinkError::NotFound`],
/// matching spec §4.3's "pass-through... returning 404 when unimplemented".
pub trait MediaSink: Send + Sync {
    /// Handle an `ANNOUNCE`: the client described the stream it intends to push.
    fn announce(&self, url: &str, media_info: &MediaInfo) -> Result<(), SinkError>;

    /// List available recorded segments under `path` (spec §6, optional).
    fn list_segments(&self, _path: &str) -> Result<Vec<u8>, SinkError> {
        Err(SinkError::NotFound)
    }

    /// Fetch one recorded segment's bytes (spec §6, optional).
    fn get_segment(&self, _path: &str, _segment: &str) -> Result<Vec<u8>, SinkError> {
        Err(SinkError::NotFound)
    }

    /// Receive a decoded access unit depacketized from RECORD-ingested RTP
    /// (spec §6). Only invoked for channels that negotiated `mode=record`
    /// with a decoder attached; no-op by default.
    fn on_frame(&self, _url: &str, _channel_index: u8, _frame: DecodedFrame) {}
}

/// No-op sink: every `ANNOUNCE`/segment request is reported not found.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMediaSink;

impl MediaSink for NullMediaSink {
    fn announce(&self, _url: &str, _media_info: &MediaInfo) -> Result<(), SinkError> {
        Err(SinkError::NotFound)
    }
}

/// Client-role consumer of decoded access units produced from inbound RTP.
///
/// Kept separate from [`MediaSink`]: that trait carries server/recording
/// concerns (`announce`, segment listing) that have no meaning for a pure
/// client connection.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, channel_index: u8, frame: DecodedFrame);
}

/// No-op frame sink, the default for [`crate::ClientConfig`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NullFrameSink;

impl FrameSink for NullFrameSink {
    fn on_frame(&self, _channel_index: u8, _frame: DecodedFrame) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_rejects_announce() {
        let sink = NullMediaSink;
        assert_eq!(sink.announce("rtsp://h/s", &MediaInfo::default()), Err(SinkError::NotFound));
    }

    #[test]
    fn null_sink_rejects_segments() {
        let sink = NullMediaSink;
        assert_eq!(sink.list_segments("/clips"), Err(SinkError::NotFound));
        assert_eq!(sink.get_segment("/clips", "1"), Err(SinkError::NotFound));
    }

    #[test]
    fn null_sink_on_frame_is_a_noop() {
        let sink = NullMediaSink;
        sink.on_frame("rtsp://h/s", 0, DecodedFrame { data: vec![1, 2, 3], dts: 0, pts: 0 });
    }

    #[test]
    fn null_frame_sink_on_frame_is_a_noop() {
        let sink = NullFrameSink;
        sink.on_frame(0, DecodedFrame { data: vec![1, 2, 3], dts: 0, pts: 0 });
    }
}
