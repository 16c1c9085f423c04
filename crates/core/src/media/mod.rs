//! Media codecs, RTP packetization and depacketization.
//!
//! This module provides the [`Packetizer`] trait (outbound: encoded frame
//! -> RTP packets) and the [`FrameDecoder`] trait (inbound: RTP payload ->
//! reconstructed frames), plus the codec-specific implementations that
//! realize both directions for H.264 and AAC.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each encoded access unit is split into one or more RTP packets. Every
//! RTP packet carries a 12-byte fixed header ([`rtp::RtpHeader`]), optionally
//! followed by a 4-byte header extension ([`rtp::HeaderExtension`]), containing:
//!
//! - **Sequence number** (16-bit, wrapping) — for reordering and loss detection.
//! - **Timestamp** (32-bit) — media clock, per-stream scale (90 kHz for H.264).
//! - **SSRC** (32-bit) — identifies the sender; the track id in server mode.
//! - **Marker bit** — set on the last packet of an access unit (frame).
//!
//! ## Supported codecs
//!
//! | Codec | Module | RFC | Direction |
//! |-------|--------|-----|-----------|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) | packetize + depacketize |
//! | AAC   | [`aac`]  | [RFC 3640](https://tools.ietf.org/html/rfc3640) | packetize + depacketize |

pub mod aac;
pub mod h264;
pub mod rtcp;
pub mod rtp;

/// What kind of access unit an [`EncodedFrame`] carries.
///
/// Only [`Video`](Self::Video) and [`Audio`](Self::Audio) frames are ever
/// packetized onto RTP; [`Metadata`](Self::Metadata) and
/// [`CodecConfig`](Self::CodecConfig) frames are gated out by the session
/// engine per the outbound gating rule (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Video,
    Audio,
    Metadata,
    CodecConfig,
}

/// An encoded access unit handed to a [`Packetizer`].
///
/// `dts`/`pts` are media-time units (millisecond-like, matching whatever
/// scale the upstream encoder uses) — *not* RTP timestamp units. The
/// packetizer converts them using the stream's RTP scale.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
    pub dts: i64,
    pub pts: i64,
    pub kind: FrameKind,
}

impl EncodedFrame {
    pub fn video(data: Vec<u8>, dts: i64, pts: i64) -> Self {
        Self { data, dts, pts, kind: FrameKind::Video }
    }

    pub fn audio(data: Vec<u8>, dts: i64) -> Self {
        Self { data, dts, pts: dts, kind: FrameKind::Audio }
    }

    /// Whether presentation and decode order diverge (B-frames / reordering).
    pub fn has_cts_offset(&self) -> bool {
        self.pts != self.dts
    }
}

/// Codec-specific RTP packetizer (outbound direction).
///
/// Each supported codec implements this trait, providing:
/// - **Packetization**: splitting an encoded access unit into RTP packets.
/// - **SDP attributes**: codec parameters for the DESCRIBE response.
/// - **RTP metadata**: payload type, clock rate, sequence/timestamp state.
///
/// The generic RTP header is handled by [`rtp::RtpHeader`] — packetizers
/// compose it rather than reimplementing header serialization.
pub trait Packetizer: Send {
    /// Packetize one encoded access unit into zero or more RTP packets.
    ///
    /// `scale` converts media-time `dts`/`pts` units into this stream's RTP
    /// clock (e.g. 90.0 for 90 kHz video when media time is milliseconds).
    /// Implementations that batch access units (AAC) may buffer internally
    /// and return an empty vec until a batch is ready — see [`flush`](Self::flush).
    fn packetize(&mut self, frame: &EncodedFrame, scale: f64) -> Vec<Vec<u8>>;

    /// Flush any buffered access units into RTP packets immediately
    /// (called on pause/teardown so no batched audio is lost).
    fn flush(&mut self) -> Vec<Vec<u8>> {
        Vec::new()
    }

    /// Codec name for the SDP `a=rtpmap` attribute (e.g. `"H264"`, `"mpeg4-generic"`).
    fn codec_name(&self) -> &'static str;

    /// RTP clock rate in Hz (RFC 3551 §4).
    fn clock_rate(&self) -> u32;

    /// RTP payload type number (RFC 3551). H.264 uses 96, AAC uses 97 here.
    fn payload_type(&self) -> u8;

    /// SDP media-level attribute lines for this codec (with the `a=` prefix).
    fn sdp_attributes(&self) -> Vec<String>;

    /// Current RTP sequence number (for the `RTP-Info` header in PLAY responses).
    fn next_sequence(&self) -> u16;

    /// Current RTP timestamp as u32 (for the `RTP-Info` header in PLAY responses).
    fn next_rtp_timestamp(&self) -> u32;

    /// SSRC this packetizer stamps on every packet (RFC 3550 §8.1), needed
    /// by callers that emit sideband RTCP (e.g. the `FlFD` APP packet) tied
    /// to the same source.
    fn ssrc(&self) -> u32;
}

/// A reconstructed access unit produced by a [`FrameDecoder`] (inbound direction).
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub data: Vec<u8>,
    pub dts: i64,
    pub pts: i64,
}

/// Codec-aware inbound depacketizer.
///
/// Named as an external collaborator in the protocol design: embedders may
/// supply their own decoder, but the crate ships reference implementations
/// ([`h264::H264Decoder`], [`aac::AacDecoder`]) for self-contained use and
/// testing.
pub trait FrameDecoder: Send + std::fmt::Debug {
    /// Reset internal reassembly state (called once per channel on SETUP/PLAY).
    fn init(&mut self) {}

    /// Resynchronize with the `RTP-Info` values from a server's PLAY response
    /// (spec §4.4: "apply RTP-Info sync to each channel's decoder").
    fn sync(&mut self, seq: u16, rtptime: u32) {
        let _ = (seq, rtptime);
    }

    /// Feed one RTP payload (header already stripped) through reassembly.
    /// Returns zero or more fully reconstructed access units.
    fn decode(&mut self, payload: &[u8], timestamp: u32, marker: bool) -> Vec<DecodedFrame>;
}
