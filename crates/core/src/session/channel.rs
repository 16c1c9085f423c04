//! Per-track channel state (spec §3 "Channel").
//!
//! A [`Channel`] is the unit SETUP/ANNOUNCE populate: one per media track,
//! addressed by a fixed slot index (0 = video, 1 = audio, per the
//! two-element channel model spec §9 adopts in place of dynamic indexing).

use std::io::Write;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::error::Result;
use crate::media::rtcp::{self, SenderReport};
use crate::media::rtp::RtpPacket;
use crate::media::{DecodedFrame, FrameDecoder};
use crate::session::transport::Transport;
use crate::session::Session;
use crate::transport::UdpPortPair;

/// Media type carried by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelContent {
    Video,
    Audio,
}

/// One media track's transport, RTCP timing, and inbound decode state.
///
/// The codec-aware [`FrameDecoder`] lives here, behind a lock, so that both
/// the TCP-interleaved and UDP receive paths can feed the same channel's
/// decoder regardless of which transport a given packet arrived on.
#[derive(Debug)]
pub struct Channel {
    pub index: u8,
    pub content: ChannelContent,
    pub codec: String,
    pub timescale: u32,
    transport: RwLock<Option<Transport>>,
    /// Bound RTP/RTCP sockets, present only when [`Transport`] is `Udp`
    /// (spec §3 Channel: "present only in UDP mode").
    udp_pair: RwLock<Option<Arc<UdpPortPair>>>,
    /// Clone of the control socket, present only when [`Transport`] is
    /// `Interleaved`, used to write `$`-framed RTP/RTCP blocks outbound.
    tcp_writer: RwLock<Option<TcpStream>>,
    ssrc: RwLock<Option<u32>>,
    seq: RwLock<u16>,
    timecode: RwLock<u32>,
    ntp: RwLock<u64>,
    wall_clock_ms: RwLock<i64>,
    last_sr_at: RwLock<Option<Instant>>,
    decoder: RwLock<Option<Box<dyn FrameDecoder>>>,
}

impl Channel {
    pub fn new(index: u8, content: ChannelContent, codec: &str, timescale: u32) -> Self {
        Self {
            index,
            content,
            codec: codec.to_string(),
            timescale,
            transport: RwLock::new(None),
            udp_pair: RwLock::new(None),
            tcp_writer: RwLock::new(None),
            ssrc: RwLock::new(None),
            seq: RwLock::new(0),
            timecode: RwLock::new(0),
            ntp: RwLock::new(0),
            wall_clock_ms: RwLock::new(0),
            last_sr_at: RwLock::new(None),
            decoder: RwLock::new(None),
        }
    }

    /// Attach the inbound depacketizer for this channel (client role, or a
    /// server ingesting RECORD media).
    pub fn set_decoder(&self, decoder: Box<dyn FrameDecoder>) {
        *self.decoder.write() = Some(decoder);
    }

    /// Resynchronize the decoder with a PLAY response's `RTP-Info` values
    /// (spec §4.4).
    pub fn sync_decoder(&self, seq: u16, rtptime: u32) {
        if let Some(decoder) = self.decoder.write().as_mut() {
            decoder.sync(seq, rtptime);
        }
    }

    /// Feed one RTP payload through this channel's decoder, if attached.
    /// Returns `None` if no decoder has been set (e.g. server-role publish-only channels).
    pub fn decode(&self, payload: &[u8], timestamp: u32, marker: bool) -> Option<Vec<DecodedFrame>> {
        let mut guard = self.decoder.write();
        guard.as_mut().map(|decoder| decoder.decode(payload, timestamp, marker))
    }

    pub fn set_transport(&self, transport: Transport) {
        *self.transport.write() = Some(transport);
    }

    pub fn transport(&self) -> Option<Transport> {
        self.transport.read().clone()
    }

    /// Attach the bound UDP socket pair backing this channel's `Udp` transport.
    pub fn set_udp_pair(&self, pair: Arc<UdpPortPair>) {
        *self.udp_pair.write() = Some(pair);
    }

    pub fn udp_pair(&self) -> Option<Arc<UdpPortPair>> {
        self.udp_pair.read().clone()
    }

    /// Attach a clone of the control socket backing this channel's
    /// `Interleaved` transport.
    pub fn set_tcp_writer(&self, stream: TcpStream) {
        *self.tcp_writer.write() = Some(stream);
    }

    /// Write an RTP payload as a `$`-framed interleaved block on the
    /// control socket (RFC 2326 §10.12, spec §4.5 "interleaved TCP emission").
    pub fn send_interleaved_rtp(&self, payload: &[u8]) -> Result<()> {
        self.send_interleaved(self.interleaved_rtp_channel(), payload)
    }

    pub fn send_interleaved_rtcp(&self, payload: &[u8]) -> Result<()> {
        self.send_interleaved(self.interleaved_rtcp_channel(), payload)
    }

    fn send_interleaved(&self, channel_id: u8, payload: &[u8]) -> Result<()> {
        let mut guard = self.tcp_writer.write();
        let Some(stream) = guard.as_mut() else { return Ok(()) };

        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.push(b'$');
        frame.push(channel_id);
        frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        frame.extend_from_slice(payload);
        stream.write_all(&frame)?;
        Ok(())
    }

    /// Interleaved channel id RTP uses when multiplexed on the control
    /// socket: even bytes `2·i` (spec §3 invariants).
    pub fn interleaved_rtp_channel(&self) -> u8 {
        2 * self.index
    }

    /// Interleaved channel id RTCP uses: odd bytes `2·i + 1`.
    pub fn interleaved_rtcp_channel(&self) -> u8 {
        2 * self.index + 1
    }

    /// Record an inbound RTP packet's sequence number and SSRC (first
    /// non-null SSRC wins, per spec §4.6).
    pub fn observe_rtp(&self, seq: u16, ssrc: u32) {
        *self.seq.write() = seq;
        let mut current = self.ssrc.write();
        if current.is_none() {
            *current = Some(ssrc);
        }
    }

    pub fn ssrc(&self) -> Option<u32> {
        *self.ssrc.read()
    }

    pub fn seq(&self) -> u16 {
        *self.seq.read()
    }

    /// Ingest an RTCP Sender Report: store its NTP/RTP timecode and the
    /// wall-clock time it corresponds to (spec §4.7).
    pub fn observe_sender_report(&self, sr: &SenderReport) {
        let mut ssrc = self.ssrc.write();
        if ssrc.is_none() {
            *ssrc = Some(sr.ssrc);
        }
        *self.timecode.write() = sr.rtp_timestamp;
        *self.ntp.write() = sr.ntp_timestamp;
        *self.wall_clock_ms.write() = sr.wall_clock_ms();
        *self.last_sr_at.write() = Some(Instant::now());
    }

    pub fn last_ntp(&self) -> u64 {
        *self.ntp.read()
    }

    pub fn last_timecode(&self) -> u32 {
        *self.timecode.read()
    }

    /// Seconds elapsed since the last Sender Report, used for RR's DLSR.
    pub fn seconds_since_last_sr(&self) -> f64 {
        self.last_sr_at
            .read()
            .map(|at| at.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    pub fn has_sender_report(&self) -> bool {
        self.last_sr_at.read().is_some()
    }
}

/// Ingest an inbound RTCP block: Sender Reports update the channel's
/// wall-clock anchor, `FlFD` APP packets anchor the session's `first_dts`.
/// Shared by the TCP-interleaved and UDP receive paths so neither
/// duplicates this dispatch.
pub fn ingest_rtcp(channel: &Channel, session: &Session, data: &[u8]) {
    if let Some(sr) = SenderReport::parse(data) {
        channel.observe_sender_report(&sr);
        return;
    }
    if let Some(first_dts) = rtcp::parse_first_dts_app(data) {
        session.anchor_first_dts(first_dts);
    }
}

/// Ingest an inbound RTP packet: observe its sequence/SSRC, run it through
/// the channel's decoder, convert each reconstructed access unit from RTP
/// clock units to the session's ms-domain (applying CTS and the session's
/// `first_dts` anchor), reconcile audio/video drift, and hand the result to
/// `forward`. Shared by the TCP-interleaved and UDP receive paths.
///
/// Returns `Err(RtspError::TooManyAudioShift)` if audio drift correction
/// has failed too many times in a row — callers should tear the session down.
pub fn ingest_rtp(
    channel: &Channel,
    session: &Session,
    data: &[u8],
    forward: &dyn Fn(u8, DecodedFrame),
) -> Result<()> {
    let Some(packet) = RtpPacket::parse(data) else { return Ok(()) };
    channel.observe_rtp(packet.sequence, packet.ssrc);

    let cts = packet.cts_offset();
    let Some(frames) = channel.decode(packet.payload, packet.timestamp, packet.marker) else {
        return Ok(());
    };

    let clock_scale = channel.timescale as f64 / 1000.0;
    for mut frame in frames {
        if let Some(offset) = cts {
            frame.pts = frame.dts + offset as i64;
        }
        let mut dts_ms = (frame.dts as f64 / clock_scale).round() as i64;
        let mut pts_ms = (frame.pts as f64 / clock_scale).round() as i64;
        if let Some(first_dts) = session.first_dts() {
            dts_ms += first_dts;
            pts_ms += first_dts;
        }

        match channel.content {
            ChannelContent::Video => session.observe_video_dts(dts_ms),
            ChannelContent::Audio => {
                if let Some(video_dts) = session.last_video_dts() {
                    let adjusted = session.reconcile_audio_drift(dts_ms, video_dts)?;
                    pts_ms += adjusted - dts_ms;
                    dts_ms = adjusted;
                }
            }
        }

        frame.dts = dts_ms;
        frame.pts = pts_ms;
        forward(channel.index, frame);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaved_channel_ids_follow_slot_index() {
        let video = Channel::new(0, ChannelContent::Video, "H264", 90000);
        let audio = Channel::new(1, ChannelContent::Audio, "mpeg4-generic", 44100);
        assert_eq!(video.interleaved_rtp_channel(), 0);
        assert_eq!(video.interleaved_rtcp_channel(), 1);
        assert_eq!(audio.interleaved_rtp_channel(), 2);
        assert_eq!(audio.interleaved_rtcp_channel(), 3);
    }

    #[test]
    fn first_ssrc_wins() {
        let ch = Channel::new(0, ChannelContent::Video, "H264", 90000);
        ch.observe_rtp(10, 0xAAAA);
        ch.observe_rtp(11, 0xBBBB);
        assert_eq!(ch.ssrc(), Some(0xAAAA));
        assert_eq!(ch.seq(), 11);
    }

    #[test]
    fn decode_returns_none_without_decoder() {
        let ch = Channel::new(0, ChannelContent::Video, "H264", 90000);
        assert!(ch.decode(&[0x65, 0xAA], 9000, true).is_none());
    }

    fn rtp_packet(pt: u8, ssrc: u32, seq: u16, timestamp: u32, marker: bool, payload: &[u8]) -> Vec<u8> {
        let mut header = crate::media::rtp::RtpHeader::new(pt, ssrc);
        // advance to the desired sequence number
        for _ in 0..seq {
            header.write(false);
        }
        header.set_timestamp(timestamp);
        let mut bytes = header.write(marker).to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn ingest_rtp_anchors_video_dts_and_forwards_frame() {
        use crate::media::h264::H264Decoder;

        let session = Session::new("rtsp://h/s");
        let ch = Channel::new(0, ChannelContent::Video, "H264", 90000);
        ch.set_decoder(Box::new(H264Decoder::new()));

        let packet = rtp_packet(96, 0x1111, 0, 9000, true, &[0x65, 0xAA, 0xBB]);
        let forwarded = std::cell::RefCell::new(Vec::new());
        ingest_rtp(&ch, &session, &packet, &|idx, frame| forwarded.borrow_mut().push((idx, frame))).unwrap();

        let forwarded = forwarded.into_inner();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].0, 0);
        // 9000 RTP-clock units / 90.0 scale = 100ms
        assert_eq!(forwarded[0].1.dts, 100);
        assert_eq!(session.last_video_dts(), Some(100));
    }

    #[test]
    fn ingest_rtcp_parses_flfd_and_anchors_first_dts() {
        let session = Session::new("rtsp://h/s");
        let ch = Channel::new(0, ChannelContent::Video, "H264", 90000);
        let app = crate::media::rtcp::build_first_dts_app(0x2222, 250);
        ingest_rtcp(&ch, &session, &app);
        assert_eq!(session.first_dts(), Some(250));
    }
}
