//! RTSP response codec.
//!
//! Mirrors the request grammar: status line, header block, blank line,
//! optional body of exactly `Content-Length` bytes. Two response shapes
//! exist and are mutually exclusive: describe-with-body and
//! setup-with-transport — a message carrying both is rejected.
//!
//! The parser is client-side and accepts only 2xx status codes; the
//! serializer is server-side and emits the fixed header order the original
//! protocol peers expect.

use super::{
    Cast, Header, PUBLIC_METHODS, Request, leading_number, next_line, parse_header_line,
    parse_transport,
};
use crate::error::{ParseErrorKind, Result};

/// An RTSP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub cseq: u32,
    pub session: Option<u64>,
    pub cast: Cast,
    pub client_port: Option<u16>,
    pub server_port: Option<u16>,
    pub body: Option<String>,
    /// Emit the `Public` method list (OPTIONS responses).
    pub public_methods: bool,
}

impl Response {
    fn base(code: u16, req: &Request) -> Response {
        Response {
            code,
            cseq: req.cseq,
            session: req.session,
            cast: req.cast,
            client_port: None,
            server_port: None,
            body: None,
            public_methods: false,
        }
    }

    /// 200 with an SDP body (DESCRIBE).
    pub fn describe_ok(req: &Request, sdp: String) -> Response {
        Response {
            session: None,
            body: Some(sdp),
            ..Response::base(200, req)
        }
    }

    /// 200 with the negotiated transport (SETUP). Echoes the client port
    /// pair and advertises the server's.
    pub fn setup_ok(req: &Request, session: u64, server_port: u16) -> Response {
        Response {
            session: Some(session),
            client_port: req.client_port,
            server_port: Some(server_port),
            ..Response::base(200, req)
        }
    }

    /// Plain 200 echoing the session (PLAY/PAUSE/TEARDOWN).
    pub fn command_ok(req: &Request) -> Response {
        Response::base(200, req)
    }

    /// 200 with the `Public` method list (OPTIONS).
    pub fn options_ok(req: &Request) -> Response {
        Response {
            session: None,
            public_methods: true,
            ..Response::base(200, req)
        }
    }

    /// 404 Not found.
    pub fn not_found(req: &Request) -> Response {
        Response::base(404, req)
    }

    /// 500 Internal server error.
    pub fn server_error(req: &Request) -> Response {
        Response::base(500, req)
    }

    /// Parse a complete response, body included. Only 2xx codes are
    /// accepted.
    pub fn parse(text: &str) -> Result<Response> {
        if text.is_empty() {
            return Err(ParseErrorKind::EmptyMessage.into());
        }
        let (status_line, mut rest) =
            next_line(text).ok_or(ParseErrorKind::MissingTerminator)?;

        let mut tokens = status_line.split(' ');
        let version = tokens.next().ok_or(ParseErrorKind::InvalidStatusLine)?;
        let code_token = tokens.next().ok_or(ParseErrorKind::InvalidStatusLine)?;
        if !version.starts_with("RTSP/1.0") || !code_token.starts_with('2') {
            return Err(ParseErrorKind::InvalidStatusLine.into());
        }
        let code = leading_number(code_token)
            .filter(|c| *c <= u16::MAX as u64)
            .ok_or(ParseErrorKind::InvalidStatusLine)? as u16;

        let mut cseq = None;
        let mut session = None;
        let mut cast = Cast::Unicast;
        let mut client_port = None;
        let mut server_port = None;
        let mut content_length = None;
        let mut public_methods = false;

        loop {
            let (line, next) = next_line(rest).ok_or(ParseErrorKind::MissingTerminator)?;
            rest = next;
            if line.is_empty() {
                break;
            }
            if line.starts_with("Public:") {
                public_methods = true;
                continue;
            }
            match parse_header_line(line)? {
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
                Header::ContentType(value) => {
                    if value != "application/sdp" {
                        return Err(ParseErrorKind::UnacceptableAccept.into());
                    }
                }
                Header::ContentLength(value) => {
                    content_length = Some(
                        leading_number(value)
                            .filter(|n| *n > 0)
                            .ok_or(ParseErrorKind::BodyLengthMismatch)?
                            as usize,
                    );
                }
                Header::Transport(value) => {
                    let transport = parse_transport(value)?;
                    cast = transport.cast;
                    client_port = transport.client_port;
                    server_port = transport.server_port;
                }
                Header::Accept(_) | Header::Other => {}
            }
        }

        let body = match content_length {
            Some(length) => {
                let bytes = rest.as_bytes();
                if bytes.len() < length {
                    return Err(ParseErrorKind::BodyLengthMismatch.into());
                }
                Some(String::from_utf8_lossy(&bytes[..length]).into_owned())
            }
            None => {
                if !rest.is_empty() {
                    return Err(ParseErrorKind::BodyLengthMismatch.into());
                }
                None
            }
        };

        let cseq = cseq.ok_or(ParseErrorKind::MissingCseq)?;
        if body.is_some() && client_port.is_some() {
            return Err(ParseErrorKind::BodyWithTransport.into());
        }

        Ok(Response {
            code,
            cseq,
            session,
            cast,
            client_port,
            server_port,
            body,
            public_methods,
        })
    }

    /// Serialize to the wire text, headers in the fixed order: status line,
    /// `CSeq`, `Public`, `Session`, `Transport`, `Content-Length`, blank
    /// line, body.
    pub fn serialize(&self) -> Result<String> {
        if self.cseq == 0 {
            return Err(ParseErrorKind::MissingCseq.into());
        }

        let status_text = match self.code {
            200 => "OK",
            404 => "Not found",
            500 => "Internal server error",
            _ => "",
        };
        let mut text = format!("RTSP/1.0 {} {}\r\n", self.code, status_text);
        text.push_str(&format!("CSeq: {}\r\n", self.cseq));

        if self.public_methods {
            text.push_str(&format!("Public: {PUBLIC_METHODS}\r\n"));
        }
        if let Some(session) = self.session {
            if session > 0 {
                text.push_str(&format!("Session: {session}\r\n"));
            }
        }
        if let (Some(client_port), Some(server_port)) = (self.client_port, self.server_port) {
            text.push_str(&format!(
                "Transport: RTP/AVP;{};client_port={}-{};server_port={}-{}\r\n",
                self.cast.as_str(),
                client_port,
                client_port + 1,
                server_port,
                server_port + 1
            ));
        }
        if let Some(body) = &self.body {
            text.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        text.push_str("\r\n");
        if let Some(body) = &self.body {
            text.push_str(body);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Method;

    fn setup_request() -> Request {
        Request::setup("rtsp://host/item/audio", 2, None, 9000)
    }

    #[test]
    fn serialize_setup_response() {
        let req = setup_request();
        let res = Response::setup_ok(&req, 10, 5000);
        assert_eq!(
            res.serialize().unwrap(),
            "RTSP/1.0 200 OK\r\n\
             CSeq: 2\r\n\
             Session: 10\r\n\
             Transport: RTP/AVP;unicast;client_port=9000-9001;server_port=5000-5001\r\n\
             \r\n"
        );
    }

    #[test]
    fn serialize_describe_response() {
        let req = Request::describe("rtsp://host/item", 1);
        let res = Response::describe_ok(&req, "a=control:rtsp://host/item\r\n".to_string());
        let text = res.serialize().unwrap();
        assert!(text.starts_with("RTSP/1.0 200 OK\r\n"));
        assert!(text.contains("Content-Length: 28\r\n"));
        assert!(text.ends_with("\r\n\r\na=control:rtsp://host/item\r\n"));
    }

    #[test]
    fn serialize_options_response() {
        let req = Request {
            method: Method::Options,
            uri: "rtsp://host/item".to_string(),
            cseq: 1,
            session: None,
            cast: Cast::Unicast,
            client_port: None,
        };
        let text = Response::options_ok(&req).serialize().unwrap();
        assert_eq!(
            text,
            "RTSP/1.0 200 OK\r\n\
             CSeq: 1\r\n\
             Public: DESCRIBE, SETUP, TEARDOWN, PLAY, PAUSE\r\n\
             \r\n"
        );
    }

    #[test]
    fn error_codes_have_reason_texts() {
        let req = Request::play("rtsp://host/item", 3, 10);
        let not_found = Response::not_found(&req).serialize().unwrap();
        assert!(not_found.starts_with("RTSP/1.0 404 Not found\r\n"));

        let error = Response::server_error(&req).serialize().unwrap();
        assert!(error.starts_with("RTSP/1.0 500 Internal server error\r\n"));
        // Session from the request is echoed.
        assert!(error.contains("Session: 10\r\n"));
    }

    #[test]
    fn parse_round_trip() {
        let req = setup_request();
        for res in [
            Response::setup_ok(&req, 10, 5000),
            Response::command_ok(&Request::play("rtsp://host/item", 3, 10)),
            Response::describe_ok(
                &Request::describe("rtsp://host/item", 1),
                "a=control:x\r\n".to_string(),
            ),
            Response::options_ok(&Request::describe("rtsp://host/item", 4)),
        ] {
            let text = res.serialize().unwrap();
            assert_eq!(Response::parse(&text).unwrap(), res);
            assert_eq!(Response::parse(&text).unwrap().serialize().unwrap(), text);
        }
    }

    #[test]
    fn parse_rejects_non_2xx() {
        let text = "RTSP/1.0 404 Not found\r\nCSeq: 1\r\n\r\n";
        assert!(Response::parse(text).is_err());
    }

    #[test]
    fn parse_rejects_missing_cseq() {
        let text = "RTSP/1.0 200 OK\r\n\r\n";
        assert!(Response::parse(text).is_err());
    }

    #[test]
    fn parse_rejects_short_body() {
        let text = "RTSP/1.0 200 OK\r\nCSeq: 1\r\nContent-Length: 50\r\n\r\nshort";
        assert!(Response::parse(text).is_err());
    }

    #[test]
    fn parse_rejects_body_without_length() {
        let text = "RTSP/1.0 200 OK\r\nCSeq: 1\r\n\r\nstray body";
        assert!(Response::parse(text).is_err());
    }

    #[test]
    fn parse_rejects_body_with_transport() {
        let text = "RTSP/1.0 200 OK\r\n\
                    CSeq: 1\r\n\
                    Transport: RTP/AVP;unicast;client_port=9000-9001\r\n\
                    Content-Length: 4\r\n\
                    \r\n\
                    v=0\n";
        assert!(Response::parse(text).is_err());
    }

    #[test]
    fn unknown_code_gets_empty_reason() {
        let req = Request::describe("rtsp://host/item", 1);
        let mut res = Response::command_ok(&req);
        res.code = 204;
        let text = res.serialize().unwrap();
        assert!(text.starts_with("RTSP/1.0 204 \r\n"));
        // Still parseable as a 2xx response.
        assert_eq!(Response::parse(&text).unwrap().code, 204);
    }
}
