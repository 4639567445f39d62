//! SDP session-description codec (the subset DESCRIBE exchanges use).
//!
//! A description is an optional global control URI followed by one or more
//! media entries, each a media line immediately paired with its own control
//! line:
//!
//! ```text
//! a=control:rtsp://host/item            ← global control (optional)
//! m=audio 0 RTP/AVP 0
//! a=control:rtsp://host/item/audio
//! m=video 0 RTP/AVP 1
//! a=control:rtsp://host/item/video
//! ```
//!
//! Ordering is load-bearing: a control line belongs to the media line
//! before it, and a global control must precede the first `m=`. The parser
//! rejects descriptions where a media's control precedes its media line.

use super::next_line;
use crate::error::{ParseErrorKind, Result};
use crate::media::MediaKind;

const MEDIA_PREFIX: &str = "m=";
const CONTROL_PREFIX: &str = "a=control:";

/// One media entry of a description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpMedia {
    pub kind: MediaKind,
    pub port: u16,
    pub control: String,
}

/// A parsed session description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sdp {
    /// Global control URI covering every media, when present.
    pub control: Option<String>,
    pub medias: Vec<SdpMedia>,
}

impl Sdp {
    /// The canonical two-media description served for a source: audio and
    /// video leaves under the global URI, ports left to SETUP negotiation.
    pub fn describe(global_uri: &str) -> Sdp {
        let media = |kind: MediaKind| SdpMedia {
            kind,
            port: 0,
            control: format!("{global_uri}{}", kind.suffix()),
        };
        Sdp {
            control: Some(global_uri.to_string()),
            medias: vec![media(MediaKind::Audio), media(MediaKind::Video)],
        }
    }

    pub fn serialize(&self) -> String {
        let mut text = String::new();
        if let Some(control) = &self.control {
            text.push_str(&format!("{CONTROL_PREFIX}{control}\r\n"));
        }
        for media in &self.medias {
            text.push_str(&format!(
                "{MEDIA_PREFIX}{} {} RTP/AVP {}\r\n",
                media.kind.as_str(),
                media.port,
                media.kind as u8
            ));
            text.push_str(&format!("{CONTROL_PREFIX}{}\r\n", media.control));
        }
        text
    }

    /// Parse a description. Requires at least one media line and one
    /// control line; every media line must be followed by its own control
    /// line before the next media line.
    pub fn parse(text: &str) -> Result<Sdp> {
        let media_starts = line_starts(text, MEDIA_PREFIX);
        let control_starts = line_starts(text, CONTROL_PREFIX);
        if media_starts.is_empty() || control_starts.is_empty() {
            return Err(ParseErrorKind::InvalidSdp.into());
        }

        let mut controls = control_starts.into_iter().peekable();
        let control = match controls.peek() {
            Some(&pos) if pos < media_starts[0] => {
                controls.next();
                Some(control_value(text, pos)?)
            }
            _ => None,
        };

        let mut medias = Vec::with_capacity(media_starts.len());
        for (index, &media_pos) in media_starts.iter().enumerate() {
            let control_pos = controls.next().ok_or(ParseErrorKind::InvalidSdp)?;
            // The control must follow its media line and precede the next
            // media line; anything else means the pairing is broken.
            if control_pos < media_pos {
                return Err(ParseErrorKind::InvalidSdp.into());
            }
            if let Some(&next_media) = media_starts.get(index + 1) {
                if control_pos > next_media {
                    return Err(ParseErrorKind::InvalidSdp.into());
                }
            }

            let (kind, port) = media_line(text, media_pos)?;
            medias.push(SdpMedia {
                kind,
                port,
                control: control_value(text, control_pos)?,
            });
        }

        Ok(Sdp { control, medias })
    }
}

/// Byte offsets where a line starting with `prefix` begins.
fn line_starts(text: &str, prefix: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut offset = 0;
    let mut rest = text;
    loop {
        let line_len = match rest.find('\n') {
            Some(nl) => nl + 1,
            None => rest.len(),
        };
        if rest.starts_with(prefix) {
            starts.push(offset);
        }
        if line_len == rest.len() && !rest.ends_with('\n') {
            break;
        }
        offset += line_len;
        rest = &rest[line_len..];
        if rest.is_empty() {
            break;
        }
    }
    starts
}

/// Value of the control line starting at `pos`. The line must be
/// newline-terminated.
fn control_value(text: &str, pos: usize) -> Result<String> {
    let (line, _) = next_line(&text[pos..]).ok_or(ParseErrorKind::InvalidSdp)?;
    let value = &line[CONTROL_PREFIX.len()..];
    if value.is_empty() {
        return Err(ParseErrorKind::InvalidSdp.into());
    }
    Ok(value.to_string())
}

/// Kind and port of the media line starting at `pos`.
fn media_line(text: &str, pos: usize) -> Result<(MediaKind, u16)> {
    let line = match next_line(&text[pos..]) {
        Some((line, _)) => line,
        None => &text[pos..],
    };
    let mut tokens = line[MEDIA_PREFIX.len()..].split(' ');
    let kind = tokens
        .next()
        .and_then(MediaKind::from_label)
        .ok_or(ParseErrorKind::InvalidSdp)?;
    let port = tokens
        .next()
        .and_then(|t| t.parse::<u16>().ok())
        .ok_or(ParseErrorKind::InvalidSdp)?;
    Ok((kind, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_serializes_reference_bytes() {
        let sdp = Sdp::describe("rtsp://uri/cacosa");
        assert_eq!(
            sdp.serialize(),
            "a=control:rtsp://uri/cacosa\r\n\
             m=audio 0 RTP/AVP 0\r\n\
             a=control:rtsp://uri/cacosa/audio\r\n\
             m=video 0 RTP/AVP 1\r\n\
             a=control:rtsp://uri/cacosa/video\r\n"
        );
    }

    #[test]
    fn round_trip() {
        let sdp = Sdp::describe("rtsp://host/item");
        let text = sdp.serialize();
        let parsed = Sdp::parse(&text).unwrap();
        assert_eq!(parsed, sdp);
        assert_eq!(parsed.serialize(), text);
    }

    #[test]
    fn parse_without_global_control() {
        let text = "m=audio 9000 RTP/AVP 0\r\n\
                    a=control:rtsp://host/item/audio\r\n";
        let sdp = Sdp::parse(text).unwrap();
        assert_eq!(sdp.control, None);
        assert_eq!(sdp.medias.len(), 1);
        assert_eq!(sdp.medias[0].kind, MediaKind::Audio);
        assert_eq!(sdp.medias[0].port, 9000);
    }

    #[test]
    fn parse_rejects_missing_media() {
        assert!(Sdp::parse("a=control:rtsp://host/item\r\n").is_err());
    }

    #[test]
    fn parse_rejects_missing_control() {
        assert!(Sdp::parse("m=audio 0 RTP/AVP 0\r\n").is_err());
    }

    #[test]
    fn parse_rejects_control_before_its_media() {
        // Two controls before the first media line: the second can only
        // belong to the media, but precedes it.
        let text = "a=control:rtsp://host/item\r\n\
                    a=control:rtsp://host/item/audio\r\n\
                    m=audio 0 RTP/AVP 0\r\n";
        assert!(Sdp::parse(text).is_err());
    }

    #[test]
    fn parse_rejects_media_without_own_control() {
        // The second media's control is missing; the third media's control
        // must not be stolen for it.
        let text = "m=audio 0 RTP/AVP 0\r\n\
                    a=control:rtsp://host/item/audio\r\n\
                    m=video 0 RTP/AVP 1\r\n";
        assert!(Sdp::parse(text).is_err());
    }

    #[test]
    fn parse_rejects_unknown_media_kind() {
        let text = "m=text 0 RTP/AVP 0\r\n\
                    a=control:rtsp://host/item/text\r\n";
        assert!(Sdp::parse(text).is_err());
    }

    #[test]
    fn interleaved_attribute_lines_are_skipped() {
        let text = "v=0\r\n\
                    a=control:rtsp://host/item\r\n\
                    s=session\r\n\
                    m=audio 0 RTP/AVP 0\r\n\
                    a=rtpmap:0 PCMU/8000\r\n\
                    a=control:rtsp://host/item/audio\r\n";
        let sdp = Sdp::parse(text).unwrap();
        assert_eq!(sdp.control.as_deref(), Some("rtsp://host/item"));
        assert_eq!(sdp.medias[0].control, "rtsp://host/item/audio");
    }
}
