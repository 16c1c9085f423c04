use super::rtp::RtpHeader;
use super::{DecodedFrame, EncodedFrame, FrameDecoder, FrameKind, Packetizer};

/// Batch window for outbound AAC packetization (spec §4.6): up to 4 access
/// units are coalesced into one RTP packet as long as they arrive within
/// 150 milliseconds of the first one in the batch.
const MAX_BATCH_SIZE: usize = 4;
const MAX_BATCH_AGE_MS: i64 = 150;

/// AAC RTP packetizer, high-bit-rate mode (RFC 3640 §3.3.6).
///
/// AAC access units are batched rather than packetized one-to-one with
/// RTP packets: up to [`MAX_BATCH_SIZE`] AUs are buffered and emitted as a
/// single RTP packet once the batch is full or has aged past
/// [`MAX_BATCH_AGE_MS`] (spec §4.6). [`flush`](Packetizer::flush) drains
/// any partial batch immediately, used on pause/teardown so buffered audio
/// is never silently dropped.
///
/// ## Wire format (RFC 3640 §3.3.6, hbr mode, no interleaving)
///
/// ```text
/// AU-headers-length (16 bits, in bits)
/// AU-header[0]: AU-size (13 bits) | AU-Index (3 bits, always 0)
/// AU-header[1]: AU-size (13 bits) | AU-Index-delta (3 bits, always 0)
/// ...
/// AU[0] data | AU[1] data | ...
/// ```
///
/// Each AU-header is exactly 2 bytes, so `AU-headers-length = 16 * n_aus`.
/// No interleaving is supported (index-delta is always 0) — batched AUs
/// are assumed strictly sequential, which holds for a single live encoder.
///
/// ## Marker bit
///
/// Set on every packet: a batch, once emitted, always contains complete
/// access units (RFC 3640 has no notion of fragmenting hbr AUs across
/// packets for the frame sizes this crate targets).
#[derive(Debug)]
pub struct AacPacketizer {
    header: RtpHeader,
    sample_rate: u32,
    channels: u8,
    batch: Vec<EncodedFrame>,
    batch_start_dts: i64,
}

impl AacPacketizer {
    /// Create with explicit payload type, SSRC, sample rate and channel count.
    pub fn new(pt: u8, ssrc: u32, sample_rate: u32, channels: u8) -> Self {
        Self {
            header: RtpHeader::new(pt, ssrc),
            sample_rate,
            channels,
            batch: Vec::with_capacity(MAX_BATCH_SIZE),
            batch_start_dts: 0,
        }
    }

    /// Create with a random SSRC (RFC 3550 §8.1).
    pub fn with_random_ssrc(pt: u8, sample_rate: u32, channels: u8) -> Self {
        Self {
            header: RtpHeader::with_random_ssrc(pt),
            sample_rate,
            channels,
            batch: Vec::with_capacity(MAX_BATCH_SIZE),
            batch_start_dts: 0,
        }
    }

    /// `AudioSpecificConfig` as two bytes (MPEG-4 §1.6.2.1), used for the
    /// SDP `config=` fmtp parameter: AAC-LC (object type 2), this sample
    /// rate and channel count.
    fn audio_specific_config(&self) -> [u8; 2] {
        const AAC_LC: u8 = 2;
        let sr_index = sample_rate_index(self.sample_rate);
        let byte0 = (AAC_LC << 3) | (sr_index >> 1);
        let byte1 = ((sr_index & 0x1) << 7) | (self.channels << 3);
        [byte0, byte1]
    }

    fn build_packet(&mut self, batch: Vec<EncodedFrame>) -> Vec<u8> {
        let au_header_bits: u16 = (batch.len() as u16) * 16;

        let mut packet = Vec::new();
        let base_dts = batch.first().map(|f| f.dts).unwrap_or(0);
        self.header.set_timestamp(
            (base_dts as f64 * self.clock_rate() as f64 / 1000.0).round() as u32,
        );
        packet.extend_from_slice(&self.header.write(true));

        packet.extend_from_slice(&au_header_bits.to_be_bytes());
        for frame in &batch {
            let size = (frame.data.len() as u16) & 0x1fff;
            let au_header = size << 3; // index/index-delta = 0
            packet.extend_from_slice(&au_header.to_be_bytes());
        }
        for frame in &batch {
            packet.extend_from_slice(&frame.data);
        }

        tracing::trace!(
            batch_len = batch.len(),
            seq = self.header.sequence(),
            ts = self.header.timestamp(),
            "AAC batch packetized"
        );

        packet
    }
}

impl Packetizer for AacPacketizer {
    fn packetize(&mut self, frame: &EncodedFrame, _scale: f64) -> Vec<Vec<u8>> {
        if frame.kind != FrameKind::Audio {
            return Vec::new();
        }

        if self.batch.is_empty() {
            self.batch_start_dts = frame.dts;
        }
        self.batch.push(frame.clone());

        let age = frame.dts - self.batch_start_dts;
        if self.batch.len() >= MAX_BATCH_SIZE || age >= MAX_BATCH_AGE_MS {
            let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(MAX_BATCH_SIZE));
            vec![self.build_packet(batch)]
        } else {
            Vec::new()
        }
    }

    fn flush(&mut self) -> Vec<Vec<u8>> {
        if self.batch.is_empty() {
            return Vec::new();
        }
        let batch = std::mem::take(&mut self.batch);
        vec![self.build_packet(batch)]
    }

    fn codec_name(&self) -> &'static str {
        "mpeg4-generic"
    }

    fn clock_rate(&self) -> u32 {
        self.sample_rate
    }

    fn payload_type(&self) -> u8 {
        self.header.pt
    }

    /// SDP attributes per RFC 3640 §4.1.
    ///
    /// - `a=rtpmap:<pt> mpeg4-generic/<rate>/<channels>`
    /// - `a=fmtp:<pt> streamtype=5;profile-level-id=1;mode=AAC-hbr;config=<hex AudioSpecificConfig>;sizelength=13;indexlength=3;indexdeltalength=3`
    /// - `a=control:track2`
    fn sdp_attributes(&self) -> Vec<String> {
        let config = self.audio_specific_config();
        let config_hex = config.iter().map(|b| format!("{:02x}", b)).collect::<String>();

        vec![
            format!(
                "a=rtpmap:{} {}/{}/{}",
                self.payload_type(),
                self.codec_name(),
                self.clock_rate(),
                self.channels
            ),
            format!(
                "a=fmtp:{} streamtype=5;profile-level-id=1;mode=AAC-hbr;config={};sizelength=13;indexlength=3;indexdeltalength=3",
                self.payload_type(),
                config_hex
            ),
            "a=control:track2".to_string(),
        ]
    }

    fn next_sequence(&self) -> u16 {
        self.header.sequence()
    }

    fn next_rtp_timestamp(&self) -> u32 {
        self.header.timestamp()
    }

    fn ssrc(&self) -> u32 {
        self.header.ssrc
    }
}

/// Maps a sample rate to its MPEG-4 `samplingFrequencyIndex` (MPEG-4 §1.6.2.1).
fn sample_rate_index(rate: u32) -> u8 {
    match rate {
        96000 => 0,
        88200 => 1,
        64000 => 2,
        48000 => 3,
        44100 => 4,
        32000 => 5,
        24000 => 6,
        22050 => 7,
        16000 => 8,
        12000 => 9,
        11025 => 10,
        8000 => 11,
        _ => 4, // default to 44.1kHz if unrecognized
    }
}

/// AAC inbound depacketizer (RFC 3640 §3.3.6, hbr mode), reference
/// implementation of [`FrameDecoder`].
///
/// Splits a batched RTP payload back into its constituent access units
/// using the AU-header section, returning one [`DecodedFrame`] per AU.
/// Sub-frame timestamps within a batch are not reconstructed (this
/// crate's own packetizer never uses index-delta interleaving) — every
/// AU in a packet is returned with that packet's RTP timestamp.
#[derive(Debug, Default)]
pub struct AacDecoder;

impl AacDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl FrameDecoder for AacDecoder {
    fn decode(&mut self, payload: &[u8], timestamp: u32, _marker: bool) -> Vec<DecodedFrame> {
        if payload.len() < 2 {
            return Vec::new();
        }

        let au_header_bits = u16::from_be_bytes([payload[0], payload[1]]) as usize;
        let au_header_bytes = au_header_bits / 8;
        if au_header_bytes % 2 != 0 || payload.len() < 2 + au_header_bytes {
            tracing::warn!("malformed AAC AU-header section, dropping packet");
            return Vec::new();
        }

        let n_aus = au_header_bytes / 2;
        let headers = &payload[2..2 + au_header_bytes];
        let mut data = &payload[2 + au_header_bytes..];

        let mut frames = Vec::with_capacity(n_aus);
        for i in 0..n_aus {
            let raw = u16::from_be_bytes([headers[i * 2], headers[i * 2 + 1]]);
            let size = (raw >> 3) as usize;
            if data.len() < size {
                tracing::warn!("AAC AU size exceeds remaining payload, truncating batch");
                break;
            }
            let (au, rest) = data.split_at(size);
            frames.push(DecodedFrame { data: au.to_vec(), dts: timestamp as i64, pts: timestamp as i64 });
            data = rest;
        }

        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_packetizer() -> AacPacketizer {
        AacPacketizer::new(97, 0xAABBCCDD, 44100, 2)
    }

    #[test]
    fn codec_metadata() {
        let p = make_packetizer();
        assert_eq!(p.codec_name(), "mpeg4-generic");
        assert_eq!(p.clock_rate(), 44100);
        assert_eq!(p.payload_type(), 97);
    }

    #[test]
    fn buffers_until_batch_full() {
        let mut p = make_packetizer();
        for i in 0..3 {
            let frame = EncodedFrame::audio(vec![0xAA; 10], i * 10);
            assert!(p.packetize(&frame, 1.0).is_empty(), "batch not yet full");
        }
        let frame = EncodedFrame::audio(vec![0xAA; 10], 30);
        let packets = p.packetize(&frame, 1.0);
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn flush_drains_partial_batch() {
        let mut p = make_packetizer();
        p.packetize(&EncodedFrame::audio(vec![0xAA; 5], 0), 1.0);
        assert!(p.flush().len() == 1);
        assert!(p.flush().is_empty(), "second flush has nothing to drain");
    }

    #[test]
    fn batch_flushes_on_age() {
        let mut p = make_packetizer();
        assert!(p.packetize(&EncodedFrame::audio(vec![0xAA; 5], 0), 1.0).is_empty());
        let packets = p.packetize(&EncodedFrame::audio(vec![0xBB; 5], 151), 1.0);
        assert_eq!(packets.len(), 1, "batch must flush once age exceeds 150ms");
    }

    #[test]
    fn au_header_roundtrip() {
        let mut p = make_packetizer();
        let mut packet = Vec::new();
        for i in 0..4u8 {
            let frame = EncodedFrame::audio(vec![i; 20 + i as usize], i as i64 * 10);
            let mut out = p.packetize(&frame, 1.0);
            if !out.is_empty() {
                packet = out.remove(0);
            }
        }
        assert!(!packet.is_empty());

        let mut dec = AacDecoder::new();
        let rtp_payload = &packet[12..];
        let frames = dec.decode(rtp_payload, 0, true);
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].data.len(), 20);
        assert_eq!(frames[3].data.len(), 23);
        assert_eq!(frames[3].data[0], 3);
    }

    #[test]
    fn sample_rate_index_known_values() {
        assert_eq!(sample_rate_index(44100), 4);
        assert_eq!(sample_rate_index(48000), 3);
        assert_eq!(sample_rate_index(8000), 11);
    }

    #[test]
    fn sdp_includes_config() {
        let p = make_packetizer();
        let attrs = p.sdp_attributes();
        assert!(attrs.iter().any(|a| a.contains("mode=AAC-hbr")));
        assert!(attrs.iter().any(|a| a.contains("config=")));
    }

    #[test]
    fn decode_rejects_short_payload() {
        let mut dec = AacDecoder::new();
        assert!(dec.decode(&[0x00], 0, true).is_empty());
    }

    #[test]
    fn ssrc_matches_header() {
        let p = make_packetizer();
        assert_eq!(Packetizer::ssrc(&p), 0xAABBCCDD);
    }
}
