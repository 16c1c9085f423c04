/// An RTSP response (RFC 2326 §7).
///
/// Serializes to the standard text format:
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 1\r\n
/// Content-Type: application/sdp\r\n
/// Content-Length: 142\r\n
/// \r\n
/// v=0\r\n...
/// ```
///
/// Uses a builder pattern — chain [`add_header`](Self::add_header) and
/// [`with_body`](Self::with_body), then call [`serialize`](Self::serialize).
/// `Content-Length` is computed automatically when a body is present.
#[must_use]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Server identification string included in every RTSP response
/// per RFC 2326 §12.36.
pub const SERVER_AGENT: &str = "rtsp-rs/0.1";

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: vec![("Server".to_string(), SERVER_AGENT.to_string())],
            body: None,
        }
    }

    /// 200 OK — success (RFC 2326 §7.1.1).
    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    /// 404 Not Found — the requested resource does not exist.
    pub fn not_found() -> Self {
        Self::new(404, "Not Found")
    }

    /// 400 Bad Request — malformed or missing required header.
    pub fn bad_request() -> Self {
        Self::new(400, "Bad Request")
    }

    /// 401 Unauthorized — caller should emit `WWW-Authenticate` alongside this.
    pub fn unauthorized() -> Self {
        Self::new(401, "Unauthorized")
    }

    /// 405 Method Not Allowed — unrecognized or unsupported RTSP method.
    pub fn method_not_allowed() -> Self {
        Self::new(405, "Method Not Allowed")
    }

    /// 454 Session Not Found — `Session` header did not match a known session.
    pub fn session_not_found() -> Self {
        Self::new(454, "Session Not Found")
    }

    /// 461 Unsupported Transport — the `Transport` header could not be honored.
    pub fn unsupported_transport() -> Self {
        Self::new(461, "Unsupported Transport")
    }

    /// 500 Internal Server Error — e.g. UDP port-pool exhaustion.
    pub fn internal_server_error() -> Self {
        Self::new(500, "Internal Server Error")
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize to the RTSP text wire format.
    ///
    /// If a body is present, `Content-Length` is appended automatically
    /// (RFC 2326 §12.14).
    pub fn serialize(&self) -> String {
        let mut response = format!("RTSP/1.0 {} {}\r\n", self.status_code, self.status_text);

        for (name, value) in &self.headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }

        if let Some(body) = &self.body {
            response.push_str(&format!("Content-Length: {}\r\n", body.len()));
            response.push_str("\r\n");
            response.push_str(body);
        } else {
            response.push_str("\r\n");
        }
        response
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Parse a client-received status line + header block, with a body
    /// already extracted according to `Content-Length`.
    pub fn parse_with_body(raw: &str, body: Option<Vec<u8>>) -> crate::error::Result<Self> {
        use crate::error::{ParseErrorKind, RtspError};

        let mut lines = raw.lines();
        let status_line = lines.next().ok_or(RtspError::Parse {
            kind: ParseErrorKind::EmptyRequest,
        })?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().ok_or(RtspError::Parse {
            kind: ParseErrorKind::InvalidStatusLine,
        })?;
        let code = parts.next().ok_or(RtspError::Parse {
            kind: ParseErrorKind::InvalidStatusLine,
        })?;
        let reason = parts.next().unwrap_or("").to_string();

        if !version.starts_with("RTSP/") {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidStatusLine,
            });
        }
        let status_code = code.trim().parse::<u16>().map_err(|_| RtspError::Parse {
            kind: ParseErrorKind::InvalidStatusLine,
        })?;

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let colon_pos = line.find(':').ok_or(RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;
            headers.push((
                line[..colon_pos].trim().to_string(),
                line[colon_pos + 1..].trim().to_string(),
            ));
        }

        Ok(RtspResponse {
            status_code,
            status_text: reason,
            headers,
            body: body.map(|b| String::from_utf8_lossy(&b).into_owned()),
        })
    }

    /// `Content-Length` header, parsed to `usize` (0 if absent or invalid).
    pub fn content_length(&self) -> usize {
        self.get_header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_no_body() {
        let resp = RtspResponse::ok()
            .add_header("CSeq", "1")
            .add_header("Public", "OPTIONS");
        let s = resp.serialize();
        assert!(s.starts_with("RTSP/1.0 200 OK\r\n"));
        assert!(s.contains("Server: rtsp-rs/0.1\r\n"));
        assert!(s.contains("CSeq: 1\r\n"));
        assert!(s.contains("Public: OPTIONS\r\n"));
        assert!(s.ends_with("\r\n"));
    }

    #[test]
    fn serialize_with_body() {
        let resp = RtspResponse::ok()
            .add_header("CSeq", "2")
            .with_body("v=0\r\n".to_string());
        let s = resp.serialize();
        assert!(s.contains("Server: rtsp-rs/0.1\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("v=0\r\n"));
    }

    #[test]
    fn not_found_response() {
        let resp = RtspResponse::not_found().add_header("CSeq", "5");
        assert_eq!(resp.status_code, 404);
        let s = resp.serialize();
        assert!(s.starts_with("RTSP/1.0 404 Not Found\r\n"));
        assert!(s.contains("Server: rtsp-rs/0.1\r\n"));
    }

    #[test]
    fn parse_status_line_and_headers() {
        let raw = "RTSP/1.0 200 OK\r\nCSeq: 2\r\nSession: 12345;timeout=60\r\n\r\n";
        let resp = RtspResponse::parse_with_body(raw, None).unwrap();
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.get_header("CSeq"), Some("2"));
        assert_eq!(resp.get_header("Session"), Some("12345;timeout=60"));
    }

    #[test]
    fn parse_with_body_sets_content_length_lookup() {
        let raw = "RTSP/1.0 200 OK\r\nContent-Length: 5\r\n\r\n";
        let resp = RtspResponse::parse_with_body(raw, Some(b"v=0\r\n".to_vec())).unwrap();
        assert_eq!(resp.body.as_deref(), Some("v=0\r\n"));
        assert_eq!(resp.content_length(), 5);
    }

    #[test]
    fn parse_rejects_non_rtsp_status_line() {
        assert!(RtspResponse::parse_with_body("HTTP/1.1 200 OK\r\n\r\n", None).is_err());
    }

    #[test]
    fn status_constructors() {
        assert_eq!(RtspResponse::unauthorized().status_code, 401);
        assert_eq!(RtspResponse::method_not_allowed().status_code, 405);
        assert_eq!(RtspResponse::session_not_found().status_code, 454);
        assert_eq!(RtspResponse::unsupported_transport().status_code, 461);
        assert_eq!(RtspResponse::internal_server_error().status_code, 500);
    }
}
