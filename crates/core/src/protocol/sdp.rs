//! SDP (Session Description Protocol) encode/decode (RFC 4566 / RFC 8866).
//!
//! [`generate_sdp`] produces the SDP body returned by DESCRIBE responses.
//! The format, for a two-track (video+audio) mount:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=<user> <sess-id> <sess-ver> IN IP4 <addr>  ← origin
//! s=<session-name>                              ← session name
//! c=IN IP4 <addr>                               ← connection address
//! t=0 0                                         ← timing (live stream)
//! a=tool:rtsp-rs                                ← server software (§6)
//! a=sendonly                                    ← direction (§6)
//! m=video 0 RTP/AVP 96                          ← media description
//! a=rtpmap:96 H264/90000                        ← codec/clock rate
//! a=fmtp:96 packetization-mode=1                ← codec parameters
//! a=control:track1                              ← track control URL
//! m=audio 0 RTP/AVP 97
//! a=rtpmap:97 mpeg4-generic/44100/2
//! a=control:track2
//! ```
//!
//! [`parse`] decodes the subset of this format the core needs to drive
//! `SETUP`/`ANNOUNCE`: which tracks exist, their payload type/codec/clock
//! rate, and their control URL — used both by server-side `ANNOUNCE` and by
//! the client role after its own `DESCRIBE`.

use crate::mount::Mount;

/// Generate an SDP session description for the given mount's tracks.
///
/// Emits one `m=video` line (track1) if the mount has a video packetizer,
/// and one `m=audio` line (track2) if it has an audio packetizer.
pub fn generate_sdp(
    mount: &Mount,
    ip: &str,
    session_id: &str,
    session_version: &str,
    username: &str,
    session_name: &str,
) -> String {
    let mut sdp: Vec<String> = Vec::new();

    sdp.push("v=0".to_string());
    sdp.push(format!(
        "o={} {} {} IN IP4 {}",
        username, session_id, session_version, ip
    ));
    sdp.push(format!("s={}", session_name));
    sdp.push(format!("c=IN IP4 {}", ip));
    sdp.push("t=0 0".to_string());
    sdp.push("a=tool:rtsp-rs".to_string());
    sdp.push("a=sendonly".to_string());

    if let Some(video) = mount.video_info() {
        sdp.push(format!("m=video 0 RTP/AVP {}", video.payload_type));
        sdp.extend(video.sdp_attributes);
        sdp.push("a=control:track1".to_string());
    }
    if let Some(audio) = mount.audio_info() {
        sdp.push(format!("m=audio 0 RTP/AVP {}", audio.payload_type));
        sdp.extend(
            audio
                .sdp_attributes
                .into_iter()
                .filter(|a| !a.starts_with("a=control:")),
        );
        sdp.push("a=control:track2".to_string());
    }

    tracing::debug!("SDP: {}", sdp.join("\r\n"));

    format!("{}\r\n", sdp.join("\r\n"))
}

/// Media content type declared by an `m=` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaContent {
    Video,
    Audio,
}

/// A single decoded `m=` section.
#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub content: MediaContent,
    pub payload_type: u8,
    pub codec_name: String,
    pub clock_rate: u32,
    pub fmtp: Option<String>,
    /// Control URL from `a=control:`, relative or absolute.
    pub control: Option<String>,
}

/// Decoded stream descriptor: the subset of an SDP body the core needs to
/// drive `SETUP` (client role) or populate `media_info` (server `ANNOUNCE`).
#[derive(Debug, Clone, Default)]
pub struct MediaInfo {
    pub connection_address: Option<String>,
    pub video: Option<TrackInfo>,
    pub audio: Option<TrackInfo>,
}

/// Parse an SDP body, extracting `c=`, and per-`m=`-section `a=rtpmap`,
/// `a=fmtp`, and `a=control` lines.
///
/// This is intentionally narrow (RFC 4566 has far more line types); only
/// what `SETUP`/`ANNOUNCE` track negotiation needs is decoded.
pub fn parse(body: &str) -> MediaInfo {
    let mut info = MediaInfo::default();
    let mut current: Option<TrackInfo> = None;

    let flush = |current: &mut Option<TrackInfo>, info: &mut MediaInfo| {
        if let Some(track) = current.take() {
            match track.content {
                MediaContent::Video => info.video = Some(track),
                MediaContent::Audio => info.audio = Some(track),
            }
        }
    };

    for line in body.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("c=IN IP4 ") {
            info.connection_address = Some(rest.trim().to_string());
            continue;
        }
        if let Some(rest) = line.strip_prefix("m=") {
            flush(&mut current, &mut info);
            let mut parts = rest.split_whitespace();
            let kind = parts.next().unwrap_or("");
            let content = match kind {
                "video" => Some(MediaContent::Video),
                "audio" => Some(MediaContent::Audio),
                _ => None,
            };
            // m=<media> <port> <proto> <fmt...>; take the first payload type.
            let payload_type = parts.nth(1).and_then(|p| p.parse().ok()).unwrap_or(0);
            if let Some(content) = content {
                current = Some(TrackInfo {
                    content,
                    payload_type,
                    codec_name: String::new(),
                    clock_rate: 0,
                    fmtp: None,
                    control: None,
                });
            }
            continue;
        }
        let Some(track) = current.as_mut() else { continue };
        if let Some(rest) = line.strip_prefix("a=rtpmap:") {
            // "<pt> <codec>/<clock-rate>[/<channels>]"
            if let Some((_, codec_spec)) = rest.split_once(' ') {
                let mut fields = codec_spec.split('/');
                track.codec_name = fields.next().unwrap_or("").to_string();
                track.clock_rate = fields.next().and_then(|r| r.parse().ok()).unwrap_or(0);
            }
        } else if let Some(rest) = line.strip_prefix("a=fmtp:") {
            track.fmtp = rest.split_once(' ').map(|(_, params)| params.to_string());
        } else if let Some(rest) = line.strip_prefix("a=control:") {
            track.control = Some(rest.to_string());
        }
    }
    flush(&mut current, &mut info);

    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::aac::AacPacketizer;
    use crate::media::h264::H264Packetizer;

    #[test]
    fn generates_h264_sdp() {
        let mount = Mount::new("/stream", Box::new(H264Packetizer::new(96, 0x12345678)));
        let sdp = generate_sdp(
            &mount,
            "192.168.1.100",
            "1234567890",
            "1",
            "server",
            "Test Session",
        );
        assert!(sdp.contains("v=0\r\n"));
        assert!(sdp.contains("o=server 1234567890 1 IN IP4 192.168.1.100\r\n"));
        assert!(sdp.contains("s=Test Session\r\n"));
        assert!(
            sdp.contains("c=IN IP4 192.168.1.100\r\n"),
            "c= must use configured IP, not 0.0.0.0"
        );
        assert!(
            sdp.contains("a=tool:rtsp-rs\r\n"),
            "SDP must include tool attribute"
        );
        assert!(
            sdp.contains("a=sendonly\r\n"),
            "SDP must include sendonly direction"
        );
        assert!(
            sdp.contains("a=rtpmap:96 H264/90000\r\n"),
            "SDP must include valid rtpmap"
        );
        assert!(sdp.contains("a=fmtp:96 packetization-mode=1\r\n"));
        assert!(sdp.contains("a=control:track1\r\n"));

        let rtpmap_idx = sdp.find("a=rtpmap").expect("SDP must include rtpmap");
        let fmtp_idx = sdp.find("a=fmtp").expect("SDP must include fmtp");
        assert!(
            rtpmap_idx < fmtp_idx,
            "a=rtpmap must precede a=fmtp per RFC 6184"
        );

        let sendonly_idx = sdp.find("a=sendonly").expect("SDP must include sendonly");
        let m_idx = sdp.find("m=video").expect("SDP must include media section");
        assert!(
            sendonly_idx < m_idx,
            "session-level attrs must precede m= line"
        );

        assert!(fmtp_idx > m_idx, "media attributes must follow m=video");
        assert!(sdp.ends_with("\r\n"), "SDP must end with CRLF");
    }

    #[test]
    fn generates_two_track_sdp() {
        let mount = Mount::new("/stream", Box::new(H264Packetizer::new(96, 1)))
            .with_audio(Box::new(AacPacketizer::new(97, 2, 44100, 2)));
        let sdp = generate_sdp(&mount, "10.0.0.1", "1", "1", "-", "Stream");
        assert!(sdp.contains("m=video 0 RTP/AVP 96\r\n"));
        assert!(sdp.contains("m=audio 0 RTP/AVP 97\r\n"));
        assert!(sdp.contains("a=control:track1\r\n"));
        assert!(sdp.contains("a=control:track2\r\n"));
        assert!(sdp.contains("a=rtpmap:97 mpeg4-generic/44100\r\n"));
    }

    #[test]
    fn parse_decodes_video_and_audio_tracks() {
        let body = "v=0\r\n\
                    o=- 1 1 IN IP4 10.0.0.1\r\n\
                    s=Stream\r\n\
                    c=IN IP4 10.0.0.1\r\n\
                    t=0 0\r\n\
                    m=video 0 RTP/AVP 96\r\n\
                    a=rtpmap:96 H264/90000\r\n\
                    a=fmtp:96 packetization-mode=1\r\n\
                    a=control:track1\r\n\
                    m=audio 0 RTP/AVP 97\r\n\
                    a=rtpmap:97 mpeg4-generic/44100/2\r\n\
                    a=control:track2\r\n";
        let info = parse(body);
        assert_eq!(info.connection_address.as_deref(), Some("10.0.0.1"));

        let video = info.video.expect("video track");
        assert_eq!(video.payload_type, 96);
        assert_eq!(video.codec_name, "H264");
        assert_eq!(video.clock_rate, 90000);
        assert_eq!(video.fmtp.as_deref(), Some("packetization-mode=1"));
        assert_eq!(video.control.as_deref(), Some("track1"));

        let audio = info.audio.expect("audio track");
        assert_eq!(audio.payload_type, 97);
        assert_eq!(audio.codec_name, "mpeg4-generic");
        assert_eq!(audio.clock_rate, 44100);
        assert_eq!(audio.control.as_deref(), Some("track2"));
    }

    #[test]
    fn parse_handles_video_only_sdp() {
        let body = "v=0\r\nm=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\n";
        let info = parse(body);
        assert!(info.video.is_some());
        assert!(info.audio.is_none());
    }
}
