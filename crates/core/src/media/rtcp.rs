//! RTCP Sender/Receiver Reports and the custom `FlFD` APP packet (RFC 3550 §6).
//!
//! Only the subset of RTCP this endpoint actually exchanges is implemented:
//! ingesting a sender's SR to learn its wall-clock anchor, emitting RR to
//! report reception quality back, and a private APP packet that carries
//! the first access unit's DTS so a peer can anchor its own timebase
//! before the first SR arrives.

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch (1970-01-01).
pub const UNIX_TO_NTP_EPOCH_SECS: u64 = 2_208_988_800;

/// Convert a 64-bit NTP timestamp (32.32 fixed point, RFC 3550 §4) into
/// Unix wall-clock milliseconds.
pub fn ntp64_to_wall_clock_ms(ntp: u64) -> i64 {
    let seconds = (ntp >> 32) as f64 + ((ntp & 0xFFFF_FFFF) as f64 / 4_294_967_296.0);
    ((seconds - UNIX_TO_NTP_EPOCH_SECS as f64) * 1000.0).round() as i64
}

/// Convert Unix wall-clock milliseconds into a 64-bit NTP timestamp.
pub fn wall_clock_ms_to_ntp64(wall_clock_ms: i64) -> u64 {
    let seconds = wall_clock_ms as f64 / 1000.0 + UNIX_TO_NTP_EPOCH_SECS as f64;
    let whole = seconds.trunc() as u64;
    let frac = ((seconds.fract()) * 4_294_967_296.0).round() as u64;
    (whole << 32) | (frac & 0xFFFF_FFFF)
}

/// A parsed RTCP Sender Report (RFC 3550 §6.4.1).
#[derive(Debug, Clone, Copy)]
pub struct SenderReport {
    pub ssrc: u32,
    pub ntp_timestamp: u64,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
}

impl SenderReport {
    /// Parse an SR packet, including its 4-byte RTCP common header.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 28 {
            return None;
        }
        let version = bytes[0] >> 6;
        let packet_type = bytes[1];
        if version != 2 || packet_type != 200 {
            return None;
        }

        let ssrc = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let ntp_msw = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let ntp_lsw = u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        let ntp_timestamp = ((ntp_msw as u64) << 32) | ntp_lsw as u64;
        let rtp_timestamp = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        let packet_count = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
        let octet_count = u32::from_be_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]);

        Some(Self { ssrc, ntp_timestamp, rtp_timestamp, packet_count, octet_count })
    }

    /// Wall-clock time (Unix ms) this SR's NTP timestamp corresponds to.
    pub fn wall_clock_ms(&self) -> i64 {
        ntp64_to_wall_clock_ms(self.ntp_timestamp)
    }

    /// Middle 32 bits of the NTP timestamp, as used for `LSR` in a
    /// following Receiver Report (RFC 3550 §6.4.1).
    pub fn lsr(&self) -> u32 {
        ((self.ntp_timestamp >> 16) & 0xFFFF_FFFF) as u32
    }
}

/// Build an RTCP Receiver Report with a single reception-report block
/// (RC=1, PT=201, length=7 32-bit words) (RFC 3550 §6.4.2).
///
/// `delay_since_last_sr_secs` is the elapsed time since the last SR was
/// received; `lsr` is the peer SR's [`SenderReport::lsr`] (0 if no SR has
/// been received yet, in which case DLSR is also reported as 0 per RFC 3550).
pub fn build_receiver_report(
    reporter_ssrc: u32,
    source_ssrc: u32,
    fraction_lost: u8,
    cumulative_lost: i32,
    extended_highest_sequence: u32,
    jitter: u32,
    lsr: u32,
    delay_since_last_sr_secs: f64,
) -> Vec<u8> {
    let mut packet = Vec::with_capacity(32);

    packet.push((2 << 6) | 1); // V=2, P=0, RC=1
    packet.push(201); // PT=201 (RR)
    packet.extend_from_slice(&7u16.to_be_bytes()); // length = 7 words
    packet.extend_from_slice(&reporter_ssrc.to_be_bytes());

    packet.extend_from_slice(&source_ssrc.to_be_bytes());
    packet.push(fraction_lost);
    let lost_bytes = cumulative_lost.to_be_bytes();
    packet.extend_from_slice(&lost_bytes[1..4]);
    packet.extend_from_slice(&extended_highest_sequence.to_be_bytes());
    packet.extend_from_slice(&jitter.to_be_bytes());
    packet.extend_from_slice(&lsr.to_be_bytes());

    let dlsr = if lsr == 0 {
        0
    } else {
        (delay_since_last_sr_secs * 65536.0).round() as u32
    };
    packet.extend_from_slice(&dlsr.to_be_bytes());

    packet
}

const FL_FD_NAME: [u8; 4] = *b"FlFD";

/// Build the private `FlFD` APP packet (RFC 3550 §6.7) carrying the
/// session's first DTS, scaled by 90 (spec §4.7), as a 64-bit payload.
pub fn build_first_dts_app(ssrc: u32, first_dts: i64) -> Vec<u8> {
    let mut packet = Vec::with_capacity(20);
    packet.push(2 << 6); // V=2, P=0, subtype=0
    packet.push(204); // PT=204 (APP)
    packet.extend_from_slice(&4u16.to_be_bytes()); // length = 4 words
    packet.extend_from_slice(&ssrc.to_be_bytes());
    packet.extend_from_slice(&FL_FD_NAME);
    let scaled = (first_dts as f64 * 90.0).round() as i64;
    packet.extend_from_slice(&scaled.to_be_bytes());
    packet
}

/// Parse a `FlFD` APP packet, returning the unscaled first DTS (the
/// payload divided back by 90).
pub fn parse_first_dts_app(bytes: &[u8]) -> Option<i64> {
    if bytes.len() < 20 {
        return None;
    }
    let version = bytes[0] >> 6;
    let packet_type = bytes[1];
    if version != 2 || packet_type != 204 {
        return None;
    }
    if bytes[8..12] != FL_FD_NAME {
        return None;
    }
    let scaled = i64::from_be_bytes(bytes[12..20].try_into().ok()?);
    Some((scaled as f64 / 90.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sr(ssrc: u32, ntp: u64, rtp_ts: u32) -> Vec<u8> {
        let mut b = Vec::with_capacity(28);
        b.push((2 << 6) | 0);
        b.push(200);
        b.extend_from_slice(&6u16.to_be_bytes());
        b.extend_from_slice(&ssrc.to_be_bytes());
        b.extend_from_slice(&((ntp >> 32) as u32).to_be_bytes());
        b.extend_from_slice(&((ntp & 0xFFFF_FFFF) as u32).to_be_bytes());
        b.extend_from_slice(&rtp_ts.to_be_bytes());
        b.extend_from_slice(&100u32.to_be_bytes());
        b.extend_from_slice(&50_000u32.to_be_bytes());
        b
    }

    #[test]
    fn parse_sender_report() {
        let ntp = wall_clock_ms_to_ntp64(1_700_000_000_000);
        let bytes = sample_sr(0xAABBCCDD, ntp, 9000);
        let sr = SenderReport::parse(&bytes).expect("parses");
        assert_eq!(sr.ssrc, 0xAABBCCDD);
        assert_eq!(sr.rtp_timestamp, 9000);
        assert_eq!(sr.packet_count, 100);
        assert_eq!(sr.octet_count, 50_000);
    }

    #[test]
    fn ntp_roundtrip_within_a_millisecond() {
        let wall_clock_ms = 1_753_000_000_123i64;
        let ntp = wall_clock_ms_to_ntp64(wall_clock_ms);
        let back = ntp64_to_wall_clock_ms(ntp);
        assert!((back - wall_clock_ms).abs() <= 1);
    }

    #[test]
    fn rejects_non_sr_packet() {
        let mut bytes = sample_sr(1, 0, 0);
        bytes[1] = 201; // claim RR
        assert!(SenderReport::parse(&bytes).is_none());
    }

    #[test]
    fn receiver_report_has_expected_header() {
        let rr = build_receiver_report(0x1111, 0x2222, 0, 0, 500, 10, 0, 0.0);
        assert_eq!(rr[0], (2 << 6) | 1);
        assert_eq!(rr[1], 201);
        assert_eq!(u16::from_be_bytes([rr[2], rr[3]]), 7);
        assert_eq!(rr.len(), 32);
    }

    #[test]
    fn receiver_report_dlsr_zero_without_prior_sr() {
        let rr = build_receiver_report(1, 2, 0, 0, 0, 0, 0, 2.5);
        let dlsr = u32::from_be_bytes(rr[28..32].try_into().unwrap());
        assert_eq!(dlsr, 0);
    }

    #[test]
    fn receiver_report_dlsr_scales_by_65536() {
        let rr = build_receiver_report(1, 2, 0, 0, 0, 0, 0xDEAD_BEEF, 1.5);
        let dlsr = u32::from_be_bytes(rr[28..32].try_into().unwrap());
        assert_eq!(dlsr, (1.5 * 65536.0).round() as u32);
    }

    #[test]
    fn fl_fd_app_packet_roundtrip() {
        let packet = build_first_dts_app(0x55667788, 12_345);
        assert_eq!(packet[1], 204);
        assert_eq!(&packet[8..12], b"FlFD");
        let recovered = parse_first_dts_app(&packet).expect("parses");
        assert_eq!(recovered, 12_345);
    }

    #[test]
    fn fl_fd_app_rejects_wrong_name() {
        let mut packet = build_first_dts_app(1, 100);
        packet[8..12].copy_from_slice(b"XXXX");
        assert!(parse_first_dts_app(&packet).is_none());
    }
}
