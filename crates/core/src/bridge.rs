//! Control/data-plane bridge.
//!
//! The RTSP server drives the worker pool with five commands, each a
//! single binary frame over a fresh TCP connection. Replies do not come
//! back on that connection: every frame carries a `response_port`, the
//! sender listens there one-shot, and the pool connects back with exactly
//! one fixed-size reply. The callback decouples the pool's internal
//! routing from the synchronous call site on the control plane.
//!
//! Frame layout (big-endian):
//!
//! ```text
//! kind u8 | ssrc u32 | session u64 | client_ip [4] | client_port u16
//!         | response_port u16 | uri_len u16 | uri bytes
//! ```
//!
//! Reply layout: `kind u8 | ssrc u32 | server_port u16`.
//!
//! Every blocking step of the round trip (connect, accept, read) is
//! bounded by the configured timeout; a silent peer is a
//! [`Error::Bridge`], not a hang.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::error::{Error, ParseErrorKind, Result};
use crate::media::uri_host;

/// Longest URI a frame may carry.
pub const MAX_URI_LEN: usize = 1024;

/// Fixed part of a command frame, before the URI bytes.
pub const COMMAND_PREFIX_LEN: usize = 23;

/// Serialized reply length.
pub const REPLY_LEN: usize = 7;

/// Default bound on each blocking step of a round trip.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

const KIND_SETUP_UNICAST: u8 = 0;
const KIND_PLAY: u8 = 1;
const KIND_PAUSE: u8 = 2;
const KIND_TEARDOWN: u8 = 3;
const KIND_CHECK_EXISTS: u8 = 4;

const REPLY_OK: u8 = 0;
const REPLY_ERR: u8 = 1;

/// A command sent from the control plane to the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Does the pool know a media source behind this URI?
    CheckExists { uri: String },
    /// Provision a worker streaming the URI's media to the client
    /// endpoint. The reply carries the minted ssrc and the worker's RTP
    /// port.
    SetupUnicast {
        uri: String,
        session: u64,
        client_ip: Ipv4Addr,
        client_port: u16,
    },
    Play { uri: String, ssrc: u32 },
    Pause { uri: String, ssrc: u32 },
    Teardown { uri: String, ssrc: u32 },
}

impl Command {
    pub fn uri(&self) -> &str {
        match self {
            Command::CheckExists { uri }
            | Command::SetupUnicast { uri, .. }
            | Command::Play { uri, .. }
            | Command::Pause { uri, .. }
            | Command::Teardown { uri, .. } => uri,
        }
    }

    fn kind(&self) -> u8 {
        match self {
            Command::SetupUnicast { .. } => KIND_SETUP_UNICAST,
            Command::Play { .. } => KIND_PLAY,
            Command::Pause { .. } => KIND_PAUSE,
            Command::Teardown { .. } => KIND_TEARDOWN,
            Command::CheckExists { .. } => KIND_CHECK_EXISTS,
        }
    }

    /// Serialize with the callback port stamped in.
    pub fn encode(&self, response_port: u16) -> Result<Vec<u8>> {
        let uri = self.uri().as_bytes();
        if uri.len() > MAX_URI_LEN {
            return Err(ParseErrorKind::InvalidFrame.into());
        }

        let (ssrc, session, client_ip, client_port) = match self {
            Command::SetupUnicast {
                session,
                client_ip,
                client_port,
                ..
            } => (0, *session, client_ip.octets(), *client_port),
            Command::Play { ssrc, .. }
            | Command::Pause { ssrc, .. }
            | Command::Teardown { ssrc, .. } => (*ssrc, 0, [0; 4], 0),
            Command::CheckExists { .. } => (0, 0, [0; 4], 0),
        };

        let mut frame = Vec::with_capacity(COMMAND_PREFIX_LEN + uri.len());
        frame.push(self.kind());
        frame.extend_from_slice(&ssrc.to_be_bytes());
        frame.extend_from_slice(&session.to_be_bytes());
        frame.extend_from_slice(&client_ip);
        frame.extend_from_slice(&client_port.to_be_bytes());
        frame.extend_from_slice(&response_port.to_be_bytes());
        frame.extend_from_slice(&(uri.len() as u16).to_be_bytes());
        frame.extend_from_slice(uri);
        Ok(frame)
    }

    /// Parse a full frame. Returns the command and its callback port.
    pub fn decode(frame: &[u8]) -> Result<(Command, u16)> {
        if frame.len() < COMMAND_PREFIX_LEN {
            return Err(ParseErrorKind::InvalidFrame.into());
        }
        let kind = frame[0];
        let ssrc = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        let session = u64::from_be_bytes([
            frame[5], frame[6], frame[7], frame[8], frame[9], frame[10], frame[11], frame[12],
        ]);
        let client_ip = Ipv4Addr::new(frame[13], frame[14], frame[15], frame[16]);
        let client_port = u16::from_be_bytes([frame[17], frame[18]]);
        let response_port = u16::from_be_bytes([frame[19], frame[20]]);
        let uri_len = u16::from_be_bytes([frame[21], frame[22]]) as usize;
        if uri_len > MAX_URI_LEN || frame.len() != COMMAND_PREFIX_LEN + uri_len {
            return Err(ParseErrorKind::InvalidFrame.into());
        }
        let uri = std::str::from_utf8(&frame[COMMAND_PREFIX_LEN..])
            .map_err(|_| ParseErrorKind::InvalidFrame)?
            .to_string();

        let command = match kind {
            KIND_SETUP_UNICAST => Command::SetupUnicast {
                uri,
                session,
                client_ip,
                client_port,
            },
            KIND_PLAY => Command::Play { uri, ssrc },
            KIND_PAUSE => Command::Pause { uri, ssrc },
            KIND_TEARDOWN => Command::Teardown { uri, ssrc },
            KIND_CHECK_EXISTS => Command::CheckExists { uri },
            _ => return Err(ParseErrorKind::InvalidFrame.into()),
        };
        Ok((command, response_port))
    }

    /// Read one frame off a stream (prefix, then the URI it announces).
    pub fn read_from(stream: &mut TcpStream) -> Result<(Command, u16)> {
        let mut prefix = [0u8; COMMAND_PREFIX_LEN];
        stream.read_exact(&mut prefix)?;
        let uri_len = u16::from_be_bytes([prefix[21], prefix[22]]) as usize;
        if uri_len > MAX_URI_LEN {
            return Err(ParseErrorKind::InvalidFrame.into());
        }
        let mut frame = prefix.to_vec();
        frame.resize(COMMAND_PREFIX_LEN + uri_len, 0);
        stream.read_exact(&mut frame[COMMAND_PREFIX_LEN..])?;
        Command::decode(&frame)
    }
}

/// The pool's answer to one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ok { ssrc: u32, server_port: u16 },
    Err,
}

impl Reply {
    pub fn encode(&self) -> [u8; REPLY_LEN] {
        let mut frame = [0u8; REPLY_LEN];
        match self {
            Reply::Ok { ssrc, server_port } => {
                frame[0] = REPLY_OK;
                frame[1..5].copy_from_slice(&ssrc.to_be_bytes());
                frame[5..7].copy_from_slice(&server_port.to_be_bytes());
            }
            Reply::Err => frame[0] = REPLY_ERR,
        }
        frame
    }

    pub fn decode(frame: &[u8]) -> Result<Reply> {
        if frame.len() != REPLY_LEN {
            return Err(ParseErrorKind::InvalidFrame.into());
        }
        match frame[0] {
            REPLY_OK => Ok(Reply::Ok {
                ssrc: u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]),
                server_port: u16::from_be_bytes([frame[5], frame[6]]),
            }),
            REPLY_ERR => Ok(Reply::Err),
            _ => Err(ParseErrorKind::InvalidFrame.into()),
        }
    }
}

/// What the per-connection handler needs from the data plane.
///
/// `BridgeClient` is the real implementation; tests substitute their own.
pub trait StreamControl: Send + Sync {
    /// `Ok(false)` means the pool answered ERR (no such path); `Err` means
    /// the round trip itself failed.
    fn check_exists(&self, uri: &str) -> Result<bool>;

    /// Returns the minted `(ssrc, server_port)` pair.
    fn setup_unicast(
        &self,
        uri: &str,
        session: u64,
        client_ip: Ipv4Addr,
        client_port: u16,
    ) -> Result<(u32, u16)>;

    fn play(&self, uri: &str, ssrc: u32) -> Result<()>;
    fn pause(&self, uri: &str, ssrc: u32) -> Result<()>;
    fn teardown(&self, uri: &str, ssrc: u32) -> Result<()>;
}

/// Blocking bridge round-trip client.
///
/// The pool's host is taken from each command's URI; only the command port
/// is configured.
pub struct BridgeClient {
    command_port: u16,
    timeout: Duration,
}

impl BridgeClient {
    pub fn new(command_port: u16) -> BridgeClient {
        BridgeClient {
            command_port,
            timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }

    pub fn with_timeout(command_port: u16, timeout: Duration) -> BridgeClient {
        BridgeClient {
            command_port,
            timeout,
        }
    }

    /// One full command round trip: listen one-shot, send the frame on a
    /// fresh connection, accept the callback, read one reply.
    fn call(&self, command: &Command) -> Result<Reply> {
        let host = uri_host(command.uri()).ok_or(ParseErrorKind::InvalidUri)?;

        let listener = TcpListener::bind(("0.0.0.0", 0))?;
        listener.set_nonblocking(true)?;
        let response_port = listener.local_addr()?.port();

        let frame = command.encode(response_port)?;
        let peer = (host, self.command_port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Bridge(format!("cannot resolve {host}")))?;
        let mut stream = TcpStream::connect_timeout(&peer, self.timeout)?;
        stream.write_all(&frame)?;
        drop(stream);

        let deadline = Instant::now() + self.timeout;
        let mut callback = loop {
            match listener.accept() {
                Ok((conn, _)) => break conn,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(Error::Bridge("timed out waiting for reply".to_string()));
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => return Err(e.into()),
            }
        };
        callback.set_nonblocking(false)?;
        callback.set_read_timeout(Some(self.timeout))?;

        let mut buf = [0u8; REPLY_LEN];
        callback.read_exact(&mut buf)?;
        Reply::decode(&buf)
    }

    fn expect_ok(&self, command: &Command) -> Result<(u32, u16)> {
        match self.call(command)? {
            Reply::Ok { ssrc, server_port } => Ok((ssrc, server_port)),
            Reply::Err => Err(Error::Bridge(format!(
                "pool answered ERR for {}",
                command.uri()
            ))),
        }
    }
}

impl StreamControl for BridgeClient {
    fn check_exists(&self, uri: &str) -> Result<bool> {
        match self.call(&Command::CheckExists {
            uri: uri.to_string(),
        })? {
            Reply::Ok { .. } => Ok(true),
            Reply::Err => Ok(false),
        }
    }

    fn setup_unicast(
        &self,
        uri: &str,
        session: u64,
        client_ip: Ipv4Addr,
        client_port: u16,
    ) -> Result<(u32, u16)> {
        self.expect_ok(&Command::SetupUnicast {
            uri: uri.to_string(),
            session,
            client_ip,
            client_port,
        })
    }

    fn play(&self, uri: &str, ssrc: u32) -> Result<()> {
        self.expect_ok(&Command::Play {
            uri: uri.to_string(),
            ssrc,
        })
        .map(|_| ())
    }

    fn pause(&self, uri: &str, ssrc: u32) -> Result<()> {
        self.expect_ok(&Command::Pause {
            uri: uri.to_string(),
            ssrc,
        })
        .map(|_| ())
    }

    fn teardown(&self, uri: &str, ssrc: u32) -> Result<()> {
        self.expect_ok(&Command::Teardown {
            uri: uri.to_string(),
            ssrc,
        })
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_frames_round_trip() {
        let commands = [
            Command::CheckExists {
                uri: "rtsp://host/item".to_string(),
            },
            Command::SetupUnicast {
                uri: "rtsp://host/item/audio".to_string(),
                session: 77,
                client_ip: Ipv4Addr::new(10, 0, 0, 2),
                client_port: 9000,
            },
            Command::Play {
                uri: "rtsp://host/item/audio".to_string(),
                ssrc: 0xDEADBEEF,
            },
            Command::Pause {
                uri: "rtsp://host/item/audio".to_string(),
                ssrc: 1,
            },
            Command::Teardown {
                uri: "rtsp://host/item".to_string(),
                ssrc: 2,
            },
        ];
        for command in commands {
            let frame = command.encode(4242).unwrap();
            let (decoded, response_port) = Command::decode(&frame).unwrap();
            assert_eq!(decoded, command);
            assert_eq!(response_port, 4242);
        }
    }

    #[test]
    fn reply_frames_round_trip() {
        for reply in [
            Reply::Ok {
                ssrc: 0x01020304,
                server_port: 5000,
            },
            Reply::Err,
        ] {
            assert_eq!(Reply::decode(&reply.encode()).unwrap(), reply);
        }
    }

    #[test]
    fn oversized_uri_rejected() {
        let command = Command::CheckExists {
            uri: format!("rtsp://host/{}", "x".repeat(MAX_URI_LEN)),
        };
        assert!(command.encode(1).is_err());
    }

    #[test]
    fn truncated_frames_rejected() {
        let frame = Command::CheckExists {
            uri: "rtsp://host/item".to_string(),
        }
        .encode(1)
        .unwrap();
        assert!(Command::decode(&frame[..10]).is_err());
        assert!(Command::decode(&frame[..frame.len() - 1]).is_err());
    }

    #[test]
    fn unknown_kind_rejected() {
        let mut frame = Command::CheckExists {
            uri: "rtsp://host/item".to_string(),
        }
        .encode(1)
        .unwrap();
        frame[0] = 9;
        assert!(Command::decode(&frame).is_err());
        assert!(Reply::decode(&[9, 0, 0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn call_times_out_without_peer() {
        // Nothing listens on the command port: connect (or the callback
        // accept) must fail within the timeout instead of hanging.
        let client = BridgeClient::with_timeout(1, Duration::from_millis(200));
        let started = Instant::now();
        let result = client.check_exists("rtsp://127.0.0.1/item");
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
