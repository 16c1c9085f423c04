//! UDP RTP/RTCP transport: per-channel port-pair binding and datagram I/O
//! (RFC 2326 §C.1.1, spec §4.5).

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::error::{Result, RtspError};
use crate::media::DecodedFrame;
use crate::session::channel::{ingest_rtcp, ingest_rtp, Channel};
use crate::session::Session;

/// How long a UDP receive call blocks before the polling loop re-checks
/// the `running` flag.
const UDP_RECV_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Lower bound of the port-pair search range (spec §4.5).
const PORT_RANGE_MIN: u16 = 10_000;
/// Exclusive upper bound of the initial random start (spec §4.5).
const PORT_RANGE_RANDOM_MAX: u16 = 20_000;
/// Hard ceiling the retry loop advances toward before giving up (spec §4.5).
const PORT_RANGE_SEARCH_MAX: u16 = 60_000;

/// A bound RTP/RTCP socket pair for one channel.
///
/// RTP uses the even-numbered port of the pair, RTCP the next odd port
/// (RFC 3550 §11). Both sockets are bound during SETUP; [`connect`](Self::connect)
/// is called once the SETUP response has told the client which addresses to
/// expect so demultiplexing can rely on the socket's default peer rather
/// than re-validating `recv_from`'s source on every datagram.
pub struct UdpPortPair {
    pub rtp_socket: UdpSocket,
    pub rtcp_socket: UdpSocket,
    pub rtp_port: u16,
    pub rtcp_port: u16,
}

impl UdpPortPair {
    /// Bind a fresh even/odd port pair, starting from a random even port in
    /// `[10000, 20000)` and retrying at `+2` on bind failure up to `60000`
    /// (spec §4.5). Returns [`RtspError::NoPorts`] once the range is exhausted.
    pub fn bind() -> Result<Self> {
        let half_range = (PORT_RANGE_RANDOM_MAX - PORT_RANGE_MIN) / 2;
        let start = PORT_RANGE_MIN + 2 * rand::rng().random_range(0..half_range);

        let mut port = start;
        loop {
            if port >= PORT_RANGE_SEARCH_MAX {
                return Err(RtspError::NoPorts);
            }

            match (
                UdpSocket::bind(("0.0.0.0", port)),
                UdpSocket::bind(("0.0.0.0", port + 1)),
            ) {
                (Ok(rtp_socket), Ok(rtcp_socket)) => {
                    return Ok(UdpPortPair {
                        rtp_socket,
                        rtcp_socket,
                        rtp_port: port,
                        rtcp_port: port + 1,
                    });
                }
                _ => {
                    port += 2;
                }
            }
        }
    }

    /// Connect both sockets to the client's negotiated addresses, so
    /// subsequent `send`/`recv` do not need an explicit peer address
    /// (spec §4.5: "UDP connect on channel activation").
    pub fn connect(&self, client_rtp_addr: SocketAddr, client_rtcp_addr: SocketAddr) -> Result<()> {
        self.rtp_socket.connect(client_rtp_addr)?;
        self.rtcp_socket.connect(client_rtcp_addr)?;
        Ok(())
    }

    pub fn send_rtp(&self, payload: &[u8]) -> Result<usize> {
        Ok(self.rtp_socket.send(payload)?)
    }

    pub fn send_rtcp(&self, payload: &[u8]) -> Result<usize> {
        Ok(self.rtcp_socket.send(payload)?)
    }

    pub fn send_rtp_to(&self, payload: &[u8], addr: SocketAddr) -> Result<usize> {
        Ok(self.rtp_socket.send_to(payload, addr)?)
    }

    pub fn send_rtcp_to(&self, payload: &[u8], addr: SocketAddr) -> Result<usize> {
        Ok(self.rtcp_socket.send_to(payload, addr)?)
    }

    /// Block for the next RTP datagram (or the socket's read timeout).
    pub fn recv_rtp(&self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.rtp_socket.recv(buf)?)
    }

    /// Block for the next RTCP datagram (or the socket's read timeout).
    pub fn recv_rtcp(&self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.rtcp_socket.recv(buf)?)
    }

    /// Apply a read timeout to both sockets, so a receive loop can poll a
    /// `running` flag between blocking calls.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.rtp_socket.set_read_timeout(timeout)?;
        self.rtcp_socket.set_read_timeout(timeout)?;
        Ok(())
    }
}

/// Spawn the background RTP and RTCP receive loops for one channel's bound
/// UDP port pair (spec §4.5 UDP demultiplexing). Each loop polls its socket
/// with a [`UDP_RECV_POLL_INTERVAL`] timeout so it can observe `running`
/// going false and exit without blocking shutdown.
///
/// Mirrors the TCP-interleaved path's dispatch: RTP runs through
/// [`ingest_rtp`], RTCP through [`ingest_rtcp`]. If `ingest_rtp` reports
/// [`RtspError::TooManyAudioShift`], the RTP loop clears `running` so the
/// paired RTCP loop also stops.
pub fn spawn_inbound(
    pair: Arc<UdpPortPair>,
    channel: Arc<Channel>,
    session: Arc<Session>,
    forward: Arc<dyn Fn(u8, DecodedFrame) + Send + Sync>,
    running: Arc<AtomicBool>,
) {
    if pair.set_read_timeout(Some(UDP_RECV_POLL_INTERVAL)).is_err() {
        return;
    }

    {
        let pair = pair.clone();
        let channel = channel.clone();
        let session = session.clone();
        let forward = forward.clone();
        let running = running.clone();
        thread::spawn(move || {
            let mut buf = [0u8; 2048];
            while running.load(Ordering::SeqCst) {
                match pair.recv_rtp(&mut buf) {
                    Ok(n) => {
                        let outcome = ingest_rtp(&channel, &session, &buf[..n], &|idx, frame| forward(idx, frame));
                        if let Err(RtspError::TooManyAudioShift) = outcome {
                            tracing::warn!(session_id = %session.id(), "too many audio drift corrections, stopping UDP reception");
                            running.store(false, Ordering::SeqCst);
                            return;
                        }
                    }
                    Err(RtspError::Io(e))
                        if e.kind() == std::io::ErrorKind::WouldBlock
                            || e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(_) => return,
                }
            }
        });
    }

    thread::spawn(move || {
        let mut buf = [0u8; 2048];
        while running.load(Ordering::SeqCst) {
            match pair.recv_rtcp(&mut buf) {
                Ok(n) => ingest_rtcp(&channel, &session, &buf[..n]),
                Err(RtspError::Io(e))
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(_) => return,
            }
        }
    });
}
