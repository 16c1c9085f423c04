use std::net::SocketAddr;

/// Negotiated RTP/RTCP transport for one channel (RFC 2326 §12.39).
///
/// Created during SETUP from the client's `Transport` header: either a
/// bound UDP port pair, or a pair of interleaved channel ids multiplexed
/// on the control socket (RFC 2326 §10.12).
///
/// ## Wire format examples
///
/// ```text
/// Client → Server:
///   Transport: RTP/AVP;unicast;client_port=8000-8001
///   Transport: RTP/AVP/TCP;unicast;interleaved=0-1
///
/// Server → Client:
///   Transport: RTP/AVP;unicast;client_port=8000-8001;server_port=5000-5001
///   Transport: RTP/AVP/TCP;unicast;interleaved=0-1
/// ```
#[derive(Debug, Clone)]
pub enum Transport {
    Udp {
        client_rtp_port: u16,
        client_rtcp_port: u16,
        server_rtp_port: u16,
        server_rtcp_port: u16,
        /// Full socket address for RTP delivery (`client_ip:client_rtp_port`).
        client_addr: SocketAddr,
    },
    Interleaved {
        rtp_channel: u8,
        rtcp_channel: u8,
    },
}

impl Transport {
    /// The peer address RTP should be sent to, for UDP transport.
    pub fn client_addr(&self) -> Option<SocketAddr> {
        match self {
            Transport::Udp { client_addr, .. } => Some(*client_addr),
            Transport::Interleaved { .. } => None,
        }
    }
}

/// What kind of transport a client's `Transport` header requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportKind {
    Udp { client_rtp_port: u16, client_rtcp_port: u16 },
    Interleaved { rtp_channel: u8, rtcp_channel: u8 },
}

/// Parsed client-side `Transport` header (RFC 2326 §12.39).
///
/// Handles `RTP/AVP;unicast;client_port=RP-RC` (UDP) and
/// `RTP/AVP/TCP;unicast;interleaved=R-RC` (interleaved). `mode=record` is
/// recorded separately since it determines whether SETUP must reject the
/// request (record-over-TCP, spec §4.3) or echo `;mode=receive` back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    pub kind: TransportKind,
    pub mode_record: bool,
    /// Server-chosen UDP ports, present when parsing a server's SETUP
    /// response (`server_port=RP-RC`) rather than a client's request.
    pub server_port: Option<(u16, u16)>,
}

impl TransportHeader {
    /// Parse the `Transport` header value.
    ///
    /// ## Examples
    ///
    /// ```
    /// use rtsp_endpoint::session::transport::{TransportHeader, TransportKind};
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert_eq!(th.kind, TransportKind::Udp { client_rtp_port: 8000, client_rtcp_port: 8001 });
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        let mut udp = None;
        let mut interleaved = None;
        let mut mode_record = false;
        let mut server_port = None;

        for part in header.split(';') {
            let part = part.trim();
            if let Some(ports) = part.strip_prefix("client_port=") {
                if let Some((rtp, rtcp)) = split_port_pair(ports) {
                    udp = Some((rtp, rtcp));
                }
            } else if let Some(ports) = part.strip_prefix("server_port=") {
                server_port = split_port_pair(ports);
            } else if let Some(channels) = part.strip_prefix("interleaved=") {
                if let Some((rtp, rtcp)) = split_port_pair(channels) {
                    interleaved = Some((rtp as u8, rtcp as u8));
                }
            } else if part.eq_ignore_ascii_case("mode=record") {
                mode_record = true;
            }
        }

        let kind = match (udp, interleaved) {
            (Some((client_rtp_port, client_rtcp_port)), _) => {
                TransportKind::Udp { client_rtp_port, client_rtcp_port }
            }
            (None, Some((rtp_channel, rtcp_channel))) => {
                TransportKind::Interleaved { rtp_channel, rtcp_channel }
            }
            (None, None) => return None,
        };

        Some(TransportHeader { kind, mode_record, server_port })
    }
}

fn split_port_pair(s: &str) -> Option<(u16, u16)> {
    let (a, b) = s.split_once('-')?;
    Some((a.parse().ok()?, b.parse().ok()?))
}
