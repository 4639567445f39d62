//! RTSP request codec.
//!
//! Grammar:
//!
//! ```text
//! METHOD SP URI SP RTSP/1.0 CRLF
//! (Header ":" SP Value CRLF)*
//! CRLF
//! ```
//!
//! Field obligations enforced on both parse and serialize:
//!
//! - `CSeq` on every request
//! - `Session` on PLAY, PAUSE, TEARDOWN
//! - `Transport` with `client_port` on SETUP
//! - the URI starts with `rtsp://`
//! - the header block ends with a truly empty line; running out of input
//!   first is an error, not "no more headers"

use super::{Cast, Header, Method, leading_number, next_line, parse_header_line, parse_transport};
use crate::error::{ParseErrorKind, Result};

/// A parsed RTSP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub cseq: u32,
    pub session: Option<u64>,
    pub cast: Cast,
    /// First port of the client's `client_port` pair, when a `Transport`
    /// header carried one.
    pub client_port: Option<u16>,
}

impl Request {
    /// Client-side DESCRIBE constructor.
    pub fn describe(uri: &str, cseq: u32) -> Request {
        Request {
            method: Method::Describe,
            uri: uri.to_string(),
            cseq,
            session: None,
            cast: Cast::Unicast,
            client_port: None,
        }
    }

    /// Client-side SETUP constructor. `session` is absent on the first
    /// SETUP of a session.
    pub fn setup(uri: &str, cseq: u32, session: Option<u64>, client_port: u16) -> Request {
        Request {
            method: Method::Setup,
            uri: uri.to_string(),
            cseq,
            session,
            cast: Cast::Unicast,
            client_port: Some(client_port),
        }
    }

    pub fn play(uri: &str, cseq: u32, session: u64) -> Request {
        Request::command(Method::Play, uri, cseq, session)
    }

    pub fn pause(uri: &str, cseq: u32, session: u64) -> Request {
        Request::command(Method::Pause, uri, cseq, session)
    }

    pub fn teardown(uri: &str, cseq: u32, session: u64) -> Request {
        Request::command(Method::Teardown, uri, cseq, session)
    }

    fn command(method: Method, uri: &str, cseq: u32, session: u64) -> Request {
        Request {
            method,
            uri: uri.to_string(),
            cseq,
            session: Some(session),
            cast: Cast::Unicast,
            client_port: None,
        }
    }

    /// Parse a complete request (request line, headers, terminating blank
    /// line).
    pub fn parse(text: &str) -> Result<Request> {
        if text.is_empty() {
            return Err(ParseErrorKind::EmptyMessage.into());
        }
        let (request_line, mut rest) =
            next_line(text).ok_or(ParseErrorKind::MissingTerminator)?;

        let mut tokens = request_line.split(' ');
        let method_token = tokens.next().ok_or(ParseErrorKind::InvalidRequestLine)?;
        let uri = tokens.next().ok_or(ParseErrorKind::InvalidRequestLine)?;
        let version = tokens.next().ok_or(ParseErrorKind::InvalidRequestLine)?;
        if tokens.next().is_some() || !version.starts_with("RTSP/1.0") {
            return Err(ParseErrorKind::InvalidRequestLine.into());
        }

        let method =
            Method::from_token(method_token).ok_or(ParseErrorKind::UnknownMethod)?;
        if !uri.starts_with("rtsp://") {
            return Err(ParseErrorKind::InvalidUri.into());
        }

        let mut cseq = None;
        let mut session = None;
        let mut cast = Cast::Unicast;
        let mut client_port = None;

        loop {
            let (line, next) = next_line(rest).ok_or(ParseErrorKind::MissingTerminator)?;
            rest = next;
            if line.is_empty() {
                break;
            }
            match parse_header_line(line)? {
                Header::Accept(value) => {
                    if !value.contains("application/sdp") {
                        return Err(ParseErrorKind::UnacceptableAccept.into());
                    }
                }
                Header::CSeq(value) => {
                    cseq = Some(
                        leading_number(value)
                            .filter(|n| *n > 0 && *n <= u32::MAX as u64)
                            .ok_or(ParseErrorKind::InvalidHeader)?
                            as u32,
                    );
                }
                Header::Session(value) => {
                    session = Some(
                        leading_number(value)
                            .filter(|n| *n > 0)
                            .ok_or(ParseErrorKind::InvalidHeader)?,
                    );
                }
                Header::Transport(value) => {
                    let transport = parse_transport(value)?;
                    cast = transport.cast;
                    client_port = transport.client_port;
                }
                // Content-Type/Content-Length are recognized but carry no
                // meaning on requests; anything else is ignored.
                Header::ContentType(_) | Header::ContentLength(_) | Header::Other => {}
            }
        }

        let cseq = cseq.ok_or(ParseErrorKind::MissingCseq)?;
        if session.is_none() && method.requires_session() {
            return Err(ParseErrorKind::MissingSession.into());
        }
        if client_port.is_none() && method == Method::Setup {
            return Err(ParseErrorKind::MissingTransport.into());
        }

        Ok(Request {
            method,
            uri: uri.to_string(),
            cseq,
            session,
            cast,
            client_port,
        })
    }

    /// Serialize to the wire text. Fails when an obligatory field for the
    /// method is missing rather than emitting an incomplete message.
    pub fn serialize(&self) -> Result<String> {
        if self.cseq == 0 {
            return Err(ParseErrorKind::MissingCseq.into());
        }

        let mut text = format!("{} {} RTSP/1.0\r\n", self.method.as_str(), self.uri);
        text.push_str(&format!("CSeq: {}\r\n", self.cseq));

        match self.session {
            Some(session) => text.push_str(&format!("Session: {session}\r\n")),
            None => {
                if self.method.requires_session() {
                    return Err(ParseErrorKind::MissingSession.into());
                }
            }
        }

        if self.method == Method::Describe {
            text.push_str("Accept: application/sdp\r\n");
        }

        match self.client_port {
            Some(port) => text.push_str(&format!(
                "Transport: RTP/AVP;{};client_port={}-{}\r\n",
                self.cast.as_str(),
                port,
                port + 1
            )),
            None => {
                if self.method == Method::Setup {
                    return Err(ParseErrorKind::MissingTransport.into());
                }
            }
        }

        text.push_str("\r\n");
        Ok(text)
    }
}
