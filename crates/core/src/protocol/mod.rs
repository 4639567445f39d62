//! RTSP message and SDP codecs.
//!
//! Strict, line-oriented parsing of the protocol subset this server speaks
//! (RFC 2326 shape, reduced header set). Parsers reject anything the
//! serializers cannot reproduce; for canonical messages
//! `parse(serialize(x)) == x` and `serialize(parse(bytes)) == bytes`.

pub mod request;
pub mod response;
pub mod sdp;

pub use request::Request;
pub use response::Response;
pub use sdp::Sdp;

use crate::error::{ParseErrorKind, Result};

/// RTSP methods, in protocol-table order (matching is by position in this
/// table, case-sensitive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Describe,
    Play,
    Pause,
    Setup,
    Teardown,
    Options,
}

pub(crate) const METHODS: [(&str, Method); 6] = [
    ("DESCRIBE", Method::Describe),
    ("PLAY", Method::Play),
    ("PAUSE", Method::Pause),
    ("SETUP", Method::Setup),
    ("TEARDOWN", Method::Teardown),
    ("OPTIONS", Method::Options),
];

impl Method {
    pub fn from_token(token: &str) -> Option<Method> {
        METHODS
            .iter()
            .find(|(name, _)| *name == token)
            .map(|(_, m)| *m)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Describe => "DESCRIBE",
            Method::Play => "PLAY",
            Method::Pause => "PAUSE",
            Method::Setup => "SETUP",
            Method::Teardown => "TEARDOWN",
            Method::Options => "OPTIONS",
        }
    }

    /// Methods that must carry a `Session` header.
    pub fn requires_session(self) -> bool {
        matches!(self, Method::Play | Method::Pause | Method::Teardown)
    }
}

/// Unicast/multicast selector of the `Transport` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cast {
    #[default]
    Unicast,
    Multicast,
}

impl Cast {
    pub fn as_str(self) -> &'static str {
        match self {
            Cast::Unicast => "unicast",
            Cast::Multicast => "multicast",
        }
    }
}

/// `Public` list advertised in OPTIONS responses.
pub const PUBLIC_METHODS: &str = "DESCRIBE, SETUP, TEARDOWN, PLAY, PAUSE";

/// Take one line off `text`. Returns `(line, rest)` with the terminator
/// stripped (`\r\n` or bare `\n`), or `None` when no terminator remains —
/// an unterminated tail is never yielded as a line.
pub(crate) fn next_line(text: &str) -> Option<(&str, &str)> {
    let nl = text.find('\n')?;
    let line = text[..nl].strip_suffix('\r').unwrap_or(&text[..nl]);
    Some((line, &text[nl + 1..]))
}

/// Leading-digits numeric parse (`"9000-9001"` → 9000), the tolerant
/// number reading both sides of the protocol use.
pub(crate) fn leading_number(value: &str) -> Option<u64> {
    let digits: &str = {
        let end = value
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(value.len());
        &value[..end]
    };
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Recognized header of either message kind, with its raw value.
pub(crate) enum Header<'a> {
    Accept(&'a str),
    ContentType(&'a str),
    ContentLength(&'a str),
    CSeq(&'a str),
    Session(&'a str),
    Transport(&'a str),
    /// Tokenizable but unrecognized; ignored.
    Other,
}

/// Tokenize one header line. Unknown names are accepted (and ignored), but
/// a line that cannot be split on `:` or has an empty name/value is an
/// error.
pub(crate) fn parse_header_line(line: &str) -> Result<Header<'_>> {
    let colon = line.find(':').ok_or(ParseErrorKind::InvalidHeader)?;
    let name = &line[..colon];
    let value = line[colon + 1..].trim_start_matches(' ');
    if name.is_empty() || value.is_empty() {
        return Err(ParseErrorKind::InvalidHeader.into());
    }
    Ok(match name {
        "Accept" => Header::Accept(value),
        "Content-Type" => Header::ContentType(value),
        "Content-Length" => Header::ContentLength(value),
        "CSeq" => Header::CSeq(value),
        "Session" => Header::Session(value),
        "Transport" => Header::Transport(value),
        _ => Header::Other,
    })
}

/// Parsed `Transport` header value.
pub(crate) struct TransportValue {
    pub cast: Cast,
    pub client_port: Option<u16>,
    pub server_port: Option<u16>,
}

/// Validate and extract a `Transport` value: `RTP/AVP` is mandatory, so is
/// one of `unicast`/`multicast`; each `*_port=A-B` contributes the first
/// port of its pair (0 is invalid).
pub(crate) fn parse_transport(value: &str) -> Result<TransportValue> {
    if !value.contains("RTP/AVP") {
        return Err(ParseErrorKind::InvalidTransport.into());
    }
    let cast = if value.contains("unicast") {
        Cast::Unicast
    } else if value.contains("multicast") {
        Cast::Multicast
    } else {
        return Err(ParseErrorKind::InvalidTransport.into());
    };

    // Upper bound leaves room for the implicit second port of the pair.
    let port_after = |marker: &str| -> Result<Option<u16>> {
        match value.find(marker) {
            None => Ok(None),
            Some(pos) => {
                let port = leading_number(&value[pos + marker.len()..])
                    .filter(|p| *p > 0 && *p < u16::MAX as u64)
                    .ok_or(ParseErrorKind::InvalidTransport)?;
                Ok(Some(port as u16))
            }
        }
    };

    Ok(TransportValue {
        cast,
        client_port: port_after("client_port=")?,
        server_port: port_after("server_port=")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_table_order() {
        assert_eq!(Method::from_token("DESCRIBE"), Some(Method::Describe));
        assert_eq!(Method::from_token("OPTIONS"), Some(Method::Options));
        assert_eq!(Method::from_token("describe"), None);
        assert_eq!(Method::from_token("GET_PARAMETER"), None);
    }

    #[test]
    fn next_line_requires_terminator() {
        assert_eq!(next_line("abc\r\ndef"), Some(("abc", "def")));
        assert_eq!(next_line("abc\ndef"), Some(("abc", "def")));
        assert_eq!(next_line("abc"), None);
        assert_eq!(next_line("\r\nrest"), Some(("", "rest")));
    }

    #[test]
    fn leading_number_is_atoi_like() {
        assert_eq!(leading_number("9000-9001"), Some(9000));
        assert_eq!(leading_number("42"), Some(42));
        assert_eq!(leading_number("x42"), None);
        assert_eq!(leading_number(""), None);
    }

    #[test]
    fn transport_requires_rtp_avp_and_cast() {
        assert!(parse_transport("RTP/AVP;unicast;client_port=9000-9001").is_ok());
        assert!(parse_transport("RTP/AVP;client_port=9000-9001").is_err());
        assert!(parse_transport("TCP;unicast;client_port=9000-9001").is_err());
        assert!(parse_transport("RTP/AVP;unicast;client_port=0-1").is_err());
    }

    #[test]
    fn transport_extracts_first_of_pair() {
        let t = parse_transport("RTP/AVP;multicast;client_port=8000-8001;server_port=5000-5001")
            .unwrap();
        assert_eq!(t.cast, Cast::Multicast);
        assert_eq!(t.client_port, Some(8000));
        assert_eq!(t.server_port, Some(5000));
    }

    #[test]
    fn header_line_tokenization() {
        assert!(matches!(
            parse_header_line("CSeq: 3").unwrap(),
            Header::CSeq("3")
        ));
        assert!(matches!(
            parse_header_line("X-Custom: anything").unwrap(),
            Header::Other
        ));
        assert!(parse_header_line("no colon here").is_err());
        assert!(parse_header_line(": empty name").is_err());
    }
}
