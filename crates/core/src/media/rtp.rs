use rand::Rng;

/// RTP header extension profile used to carry CTS (PTS − DTS) offsets
/// (spec §4.6; this profile id is a convention of this crate, not an
/// IANA-registered one — RFC 3550 §5.3.1 leaves the field opaque).
pub const CTS_EXTENSION_PROFILE: u16 = 0x0007;

/// Generic RTP fixed header builder/parser (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// This struct is shared by all codec packetizers. It manages:
/// - **Sequence number**: 16-bit, wrapping — incremented on every packet.
/// - **Timestamp**: set directly per packet (spec §4.6 computes it as
///   `round(dts * scale)` rather than by accumulating a per-frame increment).
/// - **SSRC**: randomly generated per RFC 3550 §8.1 to avoid collisions.
///
/// Version is always 2. Padding and CSRC count are always 0. The extension
/// bit is set only by [`write_with_extension`](Self::write_with_extension).
#[derive(Debug)]
pub struct RtpHeader {
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    sequence: u16,
    timestamp: u32,
}

impl RtpHeader {
    /// Create a new RTP header state with explicit SSRC.
    pub fn new(pt: u8, ssrc: u32) -> Self {
        tracing::debug!(
            pt,
            ssrc = format_args!("{:#010X}", ssrc),
            "RTP header state created"
        );
        Self { pt, ssrc, sequence: 0, timestamp: 0 }
    }

    /// Create with a random SSRC.
    ///
    /// Per RFC 3550 §8.1, the SSRC should be chosen randomly to minimize
    /// the probability of collisions between independent sessions.
    pub fn with_random_ssrc(pt: u8) -> Self {
        let ssrc = rand::rng().random::<u32>();
        Self::new(pt, ssrc)
    }

    /// Current sequence number (before the next [`write`](Self::write) call).
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Current timestamp (the value the last [`write`](Self::write) emitted,
    /// or the value set by [`set_timestamp`](Self::set_timestamp)).
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Set the RTP timestamp for the next packet.
    pub fn set_timestamp(&mut self, timestamp: u32) {
        self.timestamp = timestamp;
    }

    /// Serialize a 12-byte RTP fixed header and advance the sequence number.
    ///
    /// The `marker` bit (RFC 3550 §5.1) signals the last packet of a frame.
    /// For H.264, it is set on the last RTP packet of an access unit
    /// (RFC 6184 §5.1).
    pub fn write(&mut self, marker: bool) -> [u8; 12] {
        let mut header = [0u8; 12];
        header[0] = 2 << 6;
        header[1] = ((marker as u8) << 7) | self.pt;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        self.sequence = self.sequence.wrapping_add(1);
        header
    }

    /// Serialize a 12-byte header with the extension bit set, followed by
    /// an 8-byte generic header extension (RFC 3550 §5.3.1) carrying `cts`
    /// as a single 32-bit word under [`CTS_EXTENSION_PROFILE`], length 1.
    pub fn write_with_extension(&mut self, marker: bool, cts: i32) -> [u8; 20] {
        let mut header = [0u8; 20];
        header[0] = (2 << 6) | 0x10; // version=2, X=1
        header[1] = ((marker as u8) << 7) | self.pt;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        header[12..14].copy_from_slice(&CTS_EXTENSION_PROFILE.to_be_bytes());
        header[14..16].copy_from_slice(&1u16.to_be_bytes());
        header[16..20].copy_from_slice(&(cts as u32).to_be_bytes());

        self.sequence = self.sequence.wrapping_add(1);
        header
    }
}

/// A parsed inbound RTP packet (RFC 3550 §5.1).
///
/// Only version-2, zero-CSRC packets are accepted — anything else is
/// rejected per spec §4.6 ("validate RTP version=2 and CC=0").
#[derive(Debug, Clone)]
pub struct RtpPacket<'a> {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    /// Header-extension word, if the packet carried one (profile, data).
    pub extension: Option<(u16, u32)>,
    pub payload: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    /// Parse a full RTP packet (header + payload) from `bytes`.
    ///
    /// Returns `None` for version != 2, CC != 0, or a packet too short to
    /// contain a full header (and, if X is set, a full extension word).
    pub fn parse(bytes: &'a [u8]) -> Option<Self> {
        if bytes.len() < 12 {
            return None;
        }
        let version = bytes[0] >> 6;
        let padding = bytes[0] & 0x20 != 0;
        let has_extension = bytes[0] & 0x10 != 0;
        let cc = bytes[0] & 0x0f;
        if version != 2 || cc != 0 {
            return None;
        }

        let marker = bytes[1] & 0x80 != 0;
        let payload_type = bytes[1] & 0x7f;
        let sequence = u16::from_be_bytes([bytes[2], bytes[3]]);
        let timestamp = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let ssrc = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);

        let mut offset = 12usize;
        let mut extension = None;
        if has_extension {
            if bytes.len() < offset + 4 {
                return None;
            }
            let profile = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
            let words = u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]) as usize;
            offset += 4;
            let ext_len = words * 4;
            if bytes.len() < offset + ext_len {
                return None;
            }
            if words == 1 {
                let data = u32::from_be_bytes([
                    bytes[offset],
                    bytes[offset + 1],
                    bytes[offset + 2],
                    bytes[offset + 3],
                ]);
                extension = Some((profile, data));
            }
            offset += ext_len;
        }

        if offset > bytes.len() {
            return None;
        }
        let mut payload = &bytes[offset..];

        if padding {
            if let Some(&pad_len) = payload.last() {
                let pad_len = pad_len as usize;
                if pad_len > 0 && pad_len <= payload.len() {
                    payload = &payload[..payload.len() - pad_len];
                }
            }
        }

        Some(Self { marker, payload_type, sequence, timestamp, ssrc, extension, payload })
    }

    /// The CTS offset carried in the extension, if any, decoded as a signed value.
    pub fn cts_offset(&self) -> Option<i32> {
        self.extension
            .and_then(|(profile, data)| (profile == CTS_EXTENSION_PROFILE).then_some(data as i32))
    }
}

/// Patch the 32-bit timestamp field (bytes 4..8) of an already-serialized RTP
/// packet in place. Used to re-anchor a shared packetizer's output per
/// session once each session's own `first_dts` shift is known, without
/// re-running packetization.
pub fn rewrite_timestamp(packet: &mut [u8], timestamp: u32) {
    if packet.len() < 8 {
        return;
    }
    packet[4..8].copy_from_slice(&timestamp.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header() -> RtpHeader {
        RtpHeader::new(96, 0xAABBCCDD)
    }

    #[test]
    fn version_is_2() {
        let mut h = make_header();
        let buf = h.write(false);
        assert_eq!(buf[0] >> 6, 2);
    }

    #[test]
    fn marker_bit() {
        let mut h = make_header();
        let no_marker = h.write(false);
        assert_eq!(no_marker[1] & 0x80, 0);

        let with_marker = h.write(true);
        assert_eq!(with_marker[1] & 0x80, 0x80);
    }

    #[test]
    fn payload_type() {
        let mut h = make_header();
        let buf = h.write(false);
        assert_eq!(buf[1] & 0x7f, 96);
    }

    #[test]
    fn sequence_increments() {
        let mut h = make_header();
        let b1 = h.write(false);
        let seq1 = u16::from_be_bytes([b1[2], b1[3]]);
        let b2 = h.write(false);
        let seq2 = u16::from_be_bytes([b2[2], b2[3]]);
        assert_eq!(seq2, seq1 + 1);
    }

    #[test]
    fn ssrc_written() {
        let mut h = make_header();
        let buf = h.write(false);
        let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        assert_eq!(ssrc, 0xAABBCCDD);
    }

    #[test]
    fn set_timestamp_is_written_directly() {
        let mut h = make_header();
        h.set_timestamp(123_456);
        let buf = h.write(false);
        assert_eq!(u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]), 123_456);
        assert_eq!(h.timestamp(), 123_456);
    }

    #[test]
    fn random_ssrc_differs() {
        let h1 = RtpHeader::with_random_ssrc(96);
        let h2 = RtpHeader::with_random_ssrc(96);
        assert_ne!(h1.ssrc, h2.ssrc);
    }

    #[test]
    fn extension_header_roundtrip() {
        let mut h = RtpHeader::new(96, 0x1234);
        h.set_timestamp(9000);
        let buf = h.write_with_extension(true, -500);
        assert_eq!(buf.len(), 20);
        assert_eq!(buf[0] & 0x10, 0x10, "extension bit must be set");

        let pkt = RtpPacket::parse(&buf).expect("parses");
        assert_eq!(pkt.timestamp, 9000);
        assert_eq!(pkt.cts_offset(), Some(-500));
        assert!(pkt.payload.is_empty());
    }

    #[test]
    fn parse_rejects_non_v2() {
        let mut buf = [0u8; 12];
        buf[0] = 1 << 6;
        assert!(RtpPacket::parse(&buf).is_none());
    }

    #[test]
    fn parse_rejects_nonzero_cc() {
        let mut buf = [0u8; 12];
        buf[0] = (2 << 6) | 0x01;
        assert!(RtpPacket::parse(&buf).is_none());
    }

    #[test]
    fn rewrite_timestamp_patches_header_only() {
        let mut h = RtpHeader::new(96, 0xAABBCCDD);
        h.set_timestamp(42);
        let header = h.write(true);
        let mut bytes = header.to_vec();
        bytes.extend_from_slice(&[9, 9, 9]);

        rewrite_timestamp(&mut bytes, 777);

        let pkt = RtpPacket::parse(&bytes).unwrap();
        assert_eq!(pkt.timestamp, 777);
        assert_eq!(pkt.sequence, 0);
        assert_eq!(pkt.ssrc, 0xAABBCCDD);
        assert_eq!(pkt.payload, &[9, 9, 9]);
    }

    #[test]
    fn rewrite_timestamp_ignores_short_buffers() {
        let mut bytes = vec![1, 2, 3];
        rewrite_timestamp(&mut bytes, 777);
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[test]
    fn parse_simple_packet() {
        let mut h = RtpHeader::new(96, 0xAABBCCDD);
        h.set_timestamp(42);
        let header = h.write(true);
        let mut bytes = header.to_vec();
        bytes.extend_from_slice(&[1, 2, 3]);
        let pkt = RtpPacket::parse(&bytes).unwrap();
        assert!(pkt.marker);
        assert_eq!(pkt.payload_type, 96);
        assert_eq!(pkt.timestamp, 42);
        assert_eq!(pkt.ssrc, 0xAABBCCDD);
        assert_eq!(pkt.payload, &[1, 2, 3]);
    }
}
