//! Server-side RTSP method dispatch (spec §4.3).

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use crate::collaborators::{MediaSink, SinkError};
use crate::error::RtspError;
use crate::media::aac::AacDecoder;
use crate::media::h264::H264Decoder;
use crate::mount::MountRegistry;
use crate::protocol::digest::{self, DigestChallenge};
use crate::protocol::request::RtspRequest;
use crate::protocol::response::RtspResponse;
use crate::protocol::sdp;
use crate::server::ServerConfig;
use crate::session::channel::{ingest_rtcp, ingest_rtp, Channel, ChannelContent};
use crate::session::transport::{Transport, TransportHeader, TransportKind};
use crate::session::{FlowType, Session, SessionManager, SessionState};
use crate::transport::UdpPortPair;

/// Handles RTSP method requests for a single TCP connection (server role).
///
/// Tracks which sessions were created on this connection so they can be
/// cleaned up when the connection drops.
pub struct MethodHandler {
    session_manager: SessionManager,
    mounts: MountRegistry,
    sink: Arc<dyn MediaSink>,
    client_addr: SocketAddr,
    /// Clone of the control socket, handed to channels that negotiate
    /// interleaved transport so outbound RTP/RTCP can be written to it.
    tcp_writer: Option<TcpStream>,
    config: Arc<ServerConfig>,
    /// Session IDs created during this connection, for cleanup on disconnect.
    session_ids: Vec<String>,
}

impl MethodHandler {
    pub fn new(
        session_manager: SessionManager,
        client_addr: SocketAddr,
        mounts: MountRegistry,
        sink: Arc<dyn MediaSink>,
        config: Arc<ServerConfig>,
    ) -> Self {
        MethodHandler {
            session_manager,
            mounts,
            sink,
            client_addr,
            tcp_writer: None,
            config,
            session_ids: Vec::new(),
        }
    }

    /// Attach a clone of the control socket, enabling interleaved RTP/RTCP
    /// output for channels set up with `RTP/AVP/TCP`.
    pub fn set_tcp_writer(&mut self, stream: TcpStream) {
        self.tcp_writer = Some(stream);
    }

    /// Returns session IDs owned by this connection (for cleanup on disconnect).
    pub fn session_ids(&self) -> &[String] {
        &self.session_ids
    }

    fn channel_and_session_for_interleaved_id(&self, channel_id: u8) -> Option<(Arc<Session>, Arc<Channel>)> {
        for session_id in &self.session_ids {
            let session = self.session_manager.get_session(session_id)?;
            for channel in session.channels() {
                if channel.interleaved_rtp_channel() == channel_id
                    || channel.interleaved_rtcp_channel() == channel_id
                {
                    return Some((session, channel));
                }
            }
        }
        None
    }

    /// Route an inbound interleaved RTP/RTCP block (spec §4.5 "UDP demultiplexing...
    /// shared with interleaved RTCP") to the channel it belongs to.
    ///
    /// RTP is depacketized via the channel's decoder (only present for
    /// RECORD-ingesting channels — a publish-only server channel has none,
    /// so decoding is a no-op there) and forwarded to the recording sink.
    /// If audio/video drift correction fails too many times in a row, the
    /// session is torn down (spec §4.6, §8 "too many audio shifts terminates").
    pub fn route_interleaved(&mut self, channel_id: u8, data: &[u8]) {
        let Some((session, channel)) = self.channel_and_session_for_interleaved_id(channel_id) else {
            tracing::trace!(channel_id, "interleaved block for unknown channel");
            return;
        };

        if channel_id == channel.interleaved_rtcp_channel() {
            ingest_rtcp(&channel, &session, data);
            return;
        }

        let sink = self.sink.clone();
        let uri = session.uri.clone();
        let outcome = ingest_rtp(&channel, &session, data, &|idx, frame| sink.on_frame(&uri, idx, frame));

        if let Err(RtspError::TooManyAudioShift) = outcome {
            let session_id = session.id();
            tracing::warn!(session_id, "too many audio drift corrections, tearing down session");
            self.session_manager.remove_session(&session_id);
            self.mounts.unsubscribe_all(&session_id);
            self.session_ids.retain(|id| id != &session_id);
        }
    }

    /// Build RTCP Receiver Reports due on this connection's channels (spec §4.7),
    /// each paired with the interleaved channel id to send it on.
    pub fn due_receiver_reports(&self) -> Vec<(u8, Vec<u8>)> {
        let mut reports = Vec::new();
        for session_id in &self.session_ids {
            let Some(session) = self.session_manager.get_session(session_id) else { continue };
            for channel in session.channels() {
                let Some(ssrc) = channel.ssrc() else { continue };
                if channel.seq() == 0 {
                    continue;
                }
                let report = crate::media::rtcp::build_receiver_report(
                    ssrc,
                    ssrc,
                    0,
                    0,
                    channel.seq() as u32,
                    0,
                    (channel.last_ntp() >> 16) as u32,
                    channel.seconds_since_last_sr(),
                );
                reports.push((channel.interleaved_rtcp_channel(), report));
            }
        }
        reports
    }

    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq().unwrap_or("0").to_string();

        let response = match request.method.as_str() {
            "OPTIONS" => self.handle_options(),
            "DESCRIBE" => self.handle_describe(request),
            "SETUP" => self.handle_setup(request),
            "PLAY" => self.handle_play(request),
            "PAUSE" => self.handle_pause(request),
            "TEARDOWN" => self.handle_teardown(request),
            "ANNOUNCE" => self.handle_announce(request),
            "RECORD" => self.handle_record(request),
            "GET_PARAMETER" => self.handle_get_parameter(request),
            "LIST_SEGMENTS" => self.handle_list_segments(request),
            "GET_SEGMENT" => self.handle_get_segment(request),
            other => {
                tracing::warn!(method = other, %cseq, "unsupported RTSP method");
                RtspResponse::method_not_allowed()
            }
        };

        self.finish(response, &cseq, request)
    }

    /// Stamp every response with `CSeq`, `Date`, and — when a session is
    /// bound to the request — `Session` (spec §4.3 "all responses carry...").
    fn finish(&self, mut response: RtspResponse, cseq: &str, request: &RtspRequest) -> RtspResponse {
        response = response.add_header("CSeq", cseq).add_header("Date", &httpdate_now());

        if response.get_header("Session").is_none()
            && let Some(id) = self.extract_session_id(request)
            && self.session_manager.get_session(&id).is_some()
        {
            response = response.add_header("Session", &id);
        }

        if response.body.is_some() && response.get_header("Content-Type").is_none() {
            response = response.add_header("Content-Type", "application/sdp");
        }

        response
    }

    fn handle_options(&self) -> RtspResponse {
        tracing::debug!("OPTIONS");
        RtspResponse::ok().add_header(
            "Public",
            "OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN, ANNOUNCE, RECORD, GET_PARAMETER, LIST_SEGMENTS, GET_SEGMENT",
        )
    }

    /// Check `Authorization` against the configured server credentials, if any.
    ///
    /// Returns `None` when the request is authorized (or no auth is
    /// configured); `Some(response)` with a 401 challenge otherwise.
    fn check_auth(&self, request: &RtspRequest) -> Option<RtspResponse> {
        let auth = self.config.auth.as_ref()?;

        let challenge = DigestChallenge {
            realm: auth.realm.clone(),
            nonce: self.config.nonce.clone(),
            qop: None,
            stale: false,
        };

        let authorized = request
            .get_header("Authorization")
            .is_some_and(|header| {
                digest::verify_digest_authorization(header, &auth.credentials, &challenge, &request.method)
            });

        if authorized {
            return None;
        }

        tracing::debug!(uri = %request.uri, "authentication challenge issued");
        Some(
            RtspResponse::unauthorized().add_header(
                "WWW-Authenticate",
                &format!("Digest realm=\"{}\", nonce=\"{}\"", auth.realm, self.config.nonce),
            ),
        )
    }

    fn host_from_uri_or_client(&self, uri: &str) -> String {
        if let Some(host) = &self.config.public_host {
            return host.clone();
        }

        if let Some(after_scheme) = uri.strip_prefix("rtsp://").or_else(|| uri.strip_prefix("rtsps://")) {
            let host = after_scheme
                .split('/')
                .next()
                .and_then(|host_port| host_port.split(':').next())
                .unwrap_or("")
                .trim();
            if !host.is_empty() {
                return host.to_string();
            }
        }
        self.client_addr.ip().to_string()
    }

    fn handle_describe(&mut self, request: &RtspRequest) -> RtspResponse {
        let uri = &request.uri;
        tracing::debug!(uri, "DESCRIBE");

        if let Some(challenge) = self.check_auth(request) {
            return challenge;
        }

        let mount = match self.mounts.resolve_from_uri(uri) {
            Some(m) => m,
            None => {
                tracing::warn!(uri, "DESCRIBE for unknown mount");
                return RtspResponse::not_found();
            }
        };

        let session = self.session_manager.create_session(uri);
        self.session_ids.push(session.id());

        let host = self.host_from_uri_or_client(uri);
        let sdp_body = sdp::generate_sdp(
            &mount,
            &host,
            &self.config.sdp_session_id,
            &self.config.sdp_session_version,
            &self.config.sdp_username,
            &self.config.sdp_session_name,
        );

        RtspResponse::ok()
            .add_header("Content-Base", &format!("{}/", uri.trim_end_matches('/')))
            .add_header("Session", &session.id())
            .with_body(sdp_body)
    }

    /// Parse the track index out of a SETUP/control URL. Accepts both
    /// `trackID=N` (conventional, 0-indexed) and this crate's own SDP
    /// `track1`/`track2` (1-indexed) control-URL forms.
    fn parse_track_index(uri: &str) -> Option<u8> {
        let last = uri.rsplit('/').next()?;
        if let Some(digits) = last.strip_prefix("trackID=") {
            return digits.parse::<u8>().ok();
        }
        if let Some(digits) = last.strip_prefix("track") {
            let n: u8 = digits.parse().ok()?;
            return n.checked_sub(1);
        }
        None
    }

    fn handle_setup(&mut self, request: &RtspRequest) -> RtspResponse {
        let mount = match self.mounts.resolve_from_uri(&request.uri) {
            Some(m) => m,
            None => {
                tracing::warn!(uri = %request.uri, "SETUP for unknown mount");
                return RtspResponse::not_found();
            }
        };

        let track_index = Self::parse_track_index(&request.uri).unwrap_or(0).min(1);
        let content = if track_index == 0 { ChannelContent::Video } else { ChannelContent::Audio };

        let transport_header = match request.get_header("Transport") {
            Some(t) => t,
            None => {
                tracing::warn!("SETUP missing Transport header");
                return RtspResponse::bad_request();
            }
        };

        let client_transport = match TransportHeader::parse(transport_header) {
            Some(t) => t,
            None => {
                tracing::warn!(transport_header, "SETUP invalid Transport header");
                return RtspResponse::bad_request();
            }
        };

        if client_transport.mode_record && matches!(client_transport.kind, TransportKind::Interleaved { .. }) {
            tracing::warn!("record-over-TCP rejected");
            return RtspResponse::unsupported_transport();
        }

        let session_id = self.extract_session_id(request).unwrap_or_else(|| {
            let session = self.session_manager.create_session(&request.uri);
            self.session_ids.push(session.id());
            session.id()
        });
        let session = match self.session_manager.get_session(&session_id) {
            Some(s) => s,
            None => return RtspResponse::session_not_found(),
        };
        if !self.session_ids.contains(&session_id) {
            self.session_ids.push(session_id.clone());
        }

        let codec = match content {
            ChannelContent::Video => "H264",
            ChannelContent::Audio => "mpeg4-generic",
        };
        let timescale = match content {
            ChannelContent::Video => 90_000,
            ChannelContent::Audio => 44_100,
        };
        let channel = Arc::new(Channel::new(track_index, content, codec, timescale));
        if client_transport.mode_record {
            let decoder: Box<dyn crate::media::FrameDecoder> = match content {
                ChannelContent::Video => Box::new(H264Decoder::new()),
                ChannelContent::Audio => Box::new(AacDecoder::new()),
            };
            channel.set_decoder(decoder);
        }

        let (transport, transport_response) = match client_transport.kind {
            TransportKind::Udp { client_rtp_port, client_rtcp_port } => {
                let pair = match UdpPortPair::bind() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to allocate UDP port pair");
                        return RtspResponse::internal_server_error();
                    }
                };
                let client_rtp_addr = SocketAddr::new(self.client_addr.ip(), client_rtp_port);
                let client_rtcp_addr = SocketAddr::new(self.client_addr.ip(), client_rtcp_port);
                let rtp_port = pair.rtp_port;
                let rtcp_port = pair.rtcp_port;
                channel.set_udp_pair(Arc::new(pair));

                let transport = Transport::Udp {
                    client_rtp_port,
                    client_rtcp_port,
                    server_rtp_port: rtp_port,
                    server_rtcp_port: rtcp_port,
                    client_addr: client_rtp_addr,
                };
                let _ = client_rtcp_addr;

                let mut header = format!(
                    "RTP/AVP;unicast;client_port={client_rtp_port}-{client_rtcp_port};server_port={rtp_port}-{rtcp_port}"
                );
                if client_transport.mode_record {
                    header.push_str(";mode=receive");
                }
                (transport, header)
            }
            TransportKind::Interleaved { rtp_channel, rtcp_channel } => {
                if let Some(stream) = self.tcp_writer.as_ref().and_then(|s| s.try_clone().ok()) {
                    channel.set_tcp_writer(stream);
                }
                let transport = Transport::Interleaved { rtp_channel, rtcp_channel };
                (transport, format!("RTP/AVP/TCP;unicast;interleaved={rtp_channel}-{rtcp_channel}"))
            }
        };

        channel.set_transport(transport);
        session.set_channel(track_index, channel);
        mount.subscribe(&session_id);

        tracing::info!(session_id, mount = %mount.path(), track_index, "channel configured via SETUP");

        RtspResponse::ok().add_header("Transport", &transport_response).add_header("Session", &session.id())
    }

    fn handle_play(&mut self, request: &RtspRequest) -> RtspResponse {
        let session_id = match self.extract_session_id(request) {
            Some(id) => id,
            None => {
                tracing::warn!("PLAY missing Session header");
                return RtspResponse::session_not_found();
            }
        };

        let session = match self.session_manager.get_session(&session_id) {
            Some(s) => s,
            None => {
                tracing::warn!(session_id, "PLAY for unknown session");
                return RtspResponse::session_not_found();
            }
        };

        // Pause-shortcut (spec §4.3): resuming a paused stream-flow session
        // skips re-subscribing to the media source.
        if session.is_paused() && session.flow_type() == FlowType::Stream {
            session.set_paused(false);
            session.set_state(SessionState::Playing);
            return RtspResponse::ok().add_header("Range", "npt=0-");
        }

        let Some(mount) = self.mounts.resolve_from_uri(&session.uri) else {
            return RtspResponse::not_found();
        };

        session.set_state(SessionState::Playing);
        session.set_paused(false);
        tracing::info!(session_id, "session started playing");

        let mut rtp_info_parts = Vec::new();
        for (index, info) in [(0u8, mount.video_rtp_info()), (1u8, mount.audio_rtp_info())] {
            if let Some((seq, rtptime)) = info {
                rtp_info_parts.push(format!("url={}/trackID={};seq={};rtptime={}", session.uri, index, seq, rtptime));
            }
        }

        let mut response = RtspResponse::ok().add_header("Range", "npt=0-");
        if !rtp_info_parts.is_empty() {
            response = response.add_header("RTP-Info", &rtp_info_parts.join(","));
        }
        response
    }

    fn handle_pause(&mut self, request: &RtspRequest) -> RtspResponse {
        let session_id = match self.extract_session_id(request) {
            Some(id) => id,
            None => return RtspResponse::session_not_found(),
        };

        match self.session_manager.get_session(&session_id) {
            Some(session) if session.flow_type() == FlowType::Stream => {
                session.set_paused(true);
                session.set_state(SessionState::Paused);
                tracing::info!(session_id, "session paused");
                RtspResponse::ok()
            }
            Some(_) => RtspResponse::method_not_allowed(),
            None => {
                tracing::warn!(session_id, "PAUSE for unknown session");
                RtspResponse::session_not_found()
            }
        }
    }

    fn handle_teardown(&mut self, request: &RtspRequest) -> RtspResponse {
        let session_id = match self.extract_session_id(request) {
            Some(id) => id,
            None => return RtspResponse::session_not_found(),
        };

        match self.session_manager.remove_session(&session_id) {
            Some(_) => {
                self.mounts.unsubscribe_all(&session_id);
                self.session_ids.retain(|id| id != &session_id);
                tracing::info!(session_id, "session terminated via TEARDOWN");
                RtspResponse::ok()
            }
            None => {
                tracing::warn!(session_id, "TEARDOWN for unknown session");
                RtspResponse::session_not_found()
            }
        }
    }

    fn handle_announce(&mut self, request: &RtspRequest) -> RtspResponse {
        if request.get_header("Content-Type") != Some("application/sdp") {
            tracing::warn!("ANNOUNCE missing application/sdp Content-Type");
            return RtspResponse::bad_request();
        }

        if let Some(challenge) = self.check_auth(request) {
            return challenge;
        }

        let Some(body) = request.body_str() else {
            return RtspResponse::bad_request();
        };
        let media_info = sdp::parse(&body);

        match self.sink.announce(&request.uri, &media_info) {
            Ok(()) => {
                let session = self.session_manager.create_session(&request.uri);
                self.session_ids.push(session.id());
                RtspResponse::ok().add_header("Session", &session.id())
            }
            Err(SinkError::Unauthorized) => RtspResponse::unauthorized(),
            Err(SinkError::NotFound) => RtspResponse::not_found(),
        }
    }

    fn handle_record(&self, _request: &RtspRequest) -> RtspResponse {
        RtspResponse::ok()
    }

    fn handle_list_segments(&self, request: &RtspRequest) -> RtspResponse {
        match self.sink.list_segments(&request.uri) {
            Ok(bytes) => RtspResponse::ok().with_body(String::from_utf8_lossy(&bytes).into_owned()),
            Err(_) => RtspResponse::not_found(),
        }
    }

    fn handle_get_segment(&self, request: &RtspRequest) -> RtspResponse {
        let segment = request.get_header("Segment").unwrap_or_default();
        match self.sink.get_segment(&request.uri, segment) {
            Ok(bytes) => RtspResponse::ok().with_body(String::from_utf8_lossy(&bytes).into_owned()),
            Err(_) => RtspResponse::not_found(),
        }
    }

    /// GET_PARAMETER is used by clients (e.g. VLC) as a keepalive (RFC 2326 §10.8).
    fn handle_get_parameter(&self, _request: &RtspRequest) -> RtspResponse {
        tracing::trace!("GET_PARAMETER keepalive");
        RtspResponse::ok()
    }

    /// Extract session ID from the Session header, stripping the
    /// `;timeout=` suffix: `"SESSIONID;timeout=60"` -> `"SESSIONID"`.
    fn extract_session_id(&self, request: &RtspRequest) -> Option<String> {
        request.get_header("Session").map(|s| s.split(';').next().unwrap_or(s).trim().to_string())
    }
}

/// RFC 1123 date for the `Date` response header (RFC 2326 §12.19).
fn httpdate_now() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    const DAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
    const MONTHS: [&str; 12] =
        ["Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec"];

    let secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    let days_since_epoch = secs / 86_400;
    let time_of_day = secs % 86_400;
    let (h, m, s) = (time_of_day / 3600, (time_of_day % 3600) / 60, time_of_day % 60);
    let weekday = DAYS[((days_since_epoch + 4) % 7) as usize];

    let mut days = days_since_epoch as i64;
    let mut year = 1970i64;
    loop {
        let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
        let year_days = if leap { 366 } else { 365 };
        if days < year_days {
            break;
        }
        days -= year_days;
        year += 1;
    }
    let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
    let month_lengths =
        [31, if leap { 29 } else { 28 }, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut month = 0;
    for &len in &month_lengths {
        if days < len {
            break;
        }
        days -= len;
        month += 1;
    }

    format!(
        "{}, {:02} {} {} {:02}:{:02}:{:02} GMT",
        weekday,
        days + 1,
        MONTHS[month],
        year,
        h,
        m,
        s
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_index_parses_trackid_form() {
        assert_eq!(MethodHandler::parse_track_index("rtsp://h/s/trackID=1"), Some(1));
        assert_eq!(MethodHandler::parse_track_index("rtsp://h/s/trackID=0"), Some(0));
    }

    #[test]
    fn track_index_parses_sdp_track_form() {
        assert_eq!(MethodHandler::parse_track_index("rtsp://h/s/track1"), Some(0));
        assert_eq!(MethodHandler::parse_track_index("rtsp://h/s/track2"), Some(1));
    }

    #[test]
    fn httpdate_has_expected_shape() {
        let date = httpdate_now();
        assert!(date.ends_with(" GMT"));
        assert_eq!(date.matches(':').count(), 2);
    }
}
