//! Media stream kinds, URI helpers, and the RTP/RTCP wire codecs.
//!
//! Every source exposes exactly two elementary streams, addressed by
//! suffixing the source's global URI with `/audio` or `/video`:
//!
//! ```text
//! rtsp://host/item          ← global (source-level) URI
//! rtsp://host/item/audio    ← media URI, kind Audio
//! rtsp://host/item/video    ← media URI, kind Video
//! ```

pub mod rtcp;
pub mod rtp;

/// Kind of elementary stream under a source.
///
/// The discriminant doubles as the RTP/AVP payload number in generated SDP
/// (`m=audio … RTP/AVP 0`, `m=video … RTP/AVP 1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio = 0,
    Video = 1,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "audio" => Some(MediaKind::Audio),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }

    /// URI suffix addressing this media under its source.
    pub fn suffix(self) -> &'static str {
        match self {
            MediaKind::Audio => "/audio",
            MediaKind::Video => "/video",
        }
    }
}

/// Split a media URI into its global prefix and media kind.
///
/// Returns `None` for a URI without a `/audio`/`/video` suffix (a global,
/// source-level URI).
pub fn split_media_uri(uri: &str) -> Option<(&str, MediaKind)> {
    for kind in [MediaKind::Audio, MediaKind::Video] {
        if let Some(global) = uri.strip_suffix(kind.suffix()) {
            if !global.is_empty() {
                return Some((global, kind));
            }
        }
    }
    None
}

/// Split an `rtsp://` URI into host and path.
///
/// `rtsp://host:554/item/audio` → `("host:554", Some("/item/audio"))`.
/// The scheme is mandatory and the host must be non-empty; the path is
/// absent when the URI stops at the host.
pub fn extract_uri(uri: &str) -> Option<(&str, Option<&str>)> {
    let rest = uri.strip_prefix("rtsp://")?;
    match rest.find('/') {
        None => {
            if rest.is_empty() {
                None
            } else {
                Some((rest, None))
            }
        }
        Some(0) => None,
        Some(slash) => Some((&rest[..slash], Some(&rest[slash..]))),
    }
}

/// Host portion of an `rtsp://` URI, without any `:port`.
pub fn uri_host(uri: &str) -> Option<&str> {
    let (host, _) = extract_uri(uri)?;
    Some(host.split(':').next().unwrap_or(host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_leaf_uris() {
        assert_eq!(
            split_media_uri("rtsp://host/item/audio"),
            Some(("rtsp://host/item", MediaKind::Audio))
        );
        assert_eq!(
            split_media_uri("rtsp://host/item/video"),
            Some(("rtsp://host/item", MediaKind::Video))
        );
    }

    #[test]
    fn split_global_uri_is_none() {
        assert_eq!(split_media_uri("rtsp://host/item"), None);
    }

    #[test]
    fn extract_host_and_path() {
        assert_eq!(
            extract_uri("rtsp://host/item/audio"),
            Some(("host", Some("/item/audio")))
        );
        assert_eq!(extract_uri("rtsp://host"), Some(("host", None)));
        assert_eq!(extract_uri("rtsp:///item"), None);
        assert_eq!(extract_uri("http://host/item"), None);
    }

    #[test]
    fn host_strips_port() {
        assert_eq!(uri_host("rtsp://host:8554/item"), Some("host"));
        assert_eq!(uri_host("rtsp://host/item"), Some("host"));
    }
}
