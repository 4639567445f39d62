//! Control-plane session state.
//!
//! A session groups everything one client set up: sources keyed by their
//! global URI, each holding the medias (audio/video leaves) that have been
//! SETUP so far. The directory owns the sessions outright; lookups go
//! through one exclusive lock and hand out access only inside a closure, so
//! every traversal and mutation of a session's sources/medias happens with
//! the lock held.
//!
//! Session lifecycle:
//!
//! ```text
//! SETUP (no Session header) -> minted id, empty session registered
//! SETUP leaf                -> source/media created lazily, ssrc bound
//! TEARDOWN leaf             -> media removed (source may become empty)
//! TEARDOWN global           -> source and all its medias removed
//! process shutdown          -> directory drained
//! ```
//!
//! An empty session is never removed by TEARDOWN; it lives until shutdown.

use std::net::SocketAddr;

use parking_lot::Mutex;
use rand::RngExt;

use crate::dict::Directory;
use crate::error::{Error, Result};
use crate::media::MediaKind;

/// One elementary stream under a source.
#[derive(Debug, Clone)]
pub struct Media {
    /// Full control URI (`<global_uri>/audio` or `<global_uri>/video`).
    pub uri: String,
    pub kind: MediaKind,
    /// Stream identifier minted by the data plane; `None` only while the
    /// provisioning SETUP is still in flight. Immutable once assigned —
    /// this is the key every PLAY/PAUSE/TEARDOWN is routed by.
    pub ssrc: Option<u32>,
    /// RTP port the data-plane worker sends from, kept so a repeated SETUP
    /// can be answered without provisioning a second worker.
    pub server_port: u16,
}

impl Media {
    pub fn new(uri: &str, kind: MediaKind) -> Media {
        Media {
            uri: uri.to_string(),
            kind,
            ssrc: None,
            server_port: 0,
        }
    }
}

/// A group of medias under one global control URI.
#[derive(Debug, Clone)]
pub struct Source {
    pub global_uri: String,
    pub medias: Vec<Media>,
}

impl Source {
    fn new(global_uri: &str) -> Source {
        Source {
            global_uri: global_uri.to_string(),
            medias: Vec::new(),
        }
    }

    pub fn media(&self, uri: &str) -> Option<&Media> {
        self.medias.iter().find(|m| m.uri == uri)
    }

    pub fn media_mut(&mut self, uri: &str) -> Option<&mut Media> {
        self.medias.iter_mut().find(|m| m.uri == uri)
    }

    /// Remove one media. The order of the remaining medias may change.
    pub fn remove_media(&mut self, uri: &str) -> bool {
        match self.medias.iter().position(|m| m.uri == uri) {
            Some(index) => {
                self.medias.swap_remove(index);
                true
            }
            None => false,
        }
    }
}

/// One client's server-side state.
#[derive(Debug)]
pub struct Session {
    pub id: u64,
    /// Peer address of the RTSP connection that created the session.
    pub client_addr: SocketAddr,
    pub sources: Vec<Source>,
}

impl Session {
    fn new(id: u64, client_addr: SocketAddr) -> Session {
        Session {
            id,
            client_addr,
            sources: Vec::new(),
        }
    }

    pub fn source(&self, global_uri: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.global_uri == global_uri)
    }

    pub fn source_mut(&mut self, global_uri: &str) -> Option<&mut Source> {
        self.sources.iter_mut().find(|s| s.global_uri == global_uri)
    }

    /// Find or lazily create the source for a global URI. The flag reports
    /// whether this call created it (callers undo exactly what they did on
    /// failure).
    pub fn source_mut_or_insert(&mut self, global_uri: &str) -> (&mut Source, bool) {
        match self.sources.iter().position(|s| s.global_uri == global_uri) {
            Some(index) => (&mut self.sources[index], false),
            None => {
                tracing::debug!(global_uri, "source created");
                self.sources.push(Source::new(global_uri));
                let last = self.sources.len() - 1;
                (&mut self.sources[last], true)
            }
        }
    }

    pub fn remove_source(&mut self, global_uri: &str) -> bool {
        match self.sources.iter().position(|s| s.global_uri == global_uri) {
            Some(index) => {
                self.sources.swap_remove(index);
                true
            }
            None => false,
        }
    }
}

/// Exclusive-locked directory of live sessions.
pub struct SessionDirectory {
    inner: Mutex<Directory<u64, Session>>,
}

impl SessionDirectory {
    pub fn new(minsize: usize) -> SessionDirectory {
        SessionDirectory {
            inner: Mutex::new(Directory::new(minsize)),
        }
    }

    /// Resolve the session a request addresses.
    ///
    /// A request that names a session id must match a live session; a
    /// request without one mints a random unused id and registers the
    /// (still empty) session before returning, all under one lock hold.
    pub fn resolve(&self, id: Option<u64>, client_addr: SocketAddr) -> Result<u64> {
        let mut dir = self.inner.lock();
        if let Some(id) = id {
            return if dir.contains(&id) {
                Ok(id)
            } else {
                Err(Error::SessionNotFound(id))
            };
        }

        let mut rng = rand::rng();
        let id = loop {
            let candidate = rng.random::<u32>() as u64;
            if candidate != 0 && !dir.contains(&candidate) {
                break candidate;
            }
        };
        dir.insert(id, Session::new(id, client_addr));
        tracing::info!(session_id = id, %client_addr, "session created");
        Ok(id)
    }

    /// Run `f` on a session with the directory lock held for the whole
    /// traversal/mutation.
    pub fn with_session<R>(&self, id: u64, f: impl FnOnce(&mut Session) -> Result<R>) -> Result<R> {
        let mut dir = self.inner.lock();
        let session = dir.get_mut(&id).ok_or(Error::SessionNotFound(id))?;
        f(session)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.inner.lock().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Drop every session (shutdown path).
    pub fn clear(&self) {
        let mut dir = self.inner.lock();
        let drained = dir.drain();
        if !drained.is_empty() {
            tracing::info!(sessions = drained.len(), "session directory drained");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn resolve_unknown_id_fails() {
        let dir = SessionDirectory::new(11);
        assert!(matches!(
            dir.resolve(Some(42), addr()),
            Err(Error::SessionNotFound(42))
        ));
        assert_eq!(dir.len(), 0);
    }

    #[test]
    fn resolve_without_id_mints_and_registers() {
        let dir = SessionDirectory::new(11);
        let id = dir.resolve(None, addr()).unwrap();
        assert!(id > 0);
        assert!(dir.contains(id));
        assert_eq!(dir.resolve(Some(id), addr()).unwrap(), id);

        let other = dir.resolve(None, addr()).unwrap();
        assert_ne!(id, other);
        assert_eq!(dir.len(), 2);
    }

    #[test]
    fn source_and_media_lifecycle() {
        let dir = SessionDirectory::new(11);
        let id = dir.resolve(None, addr()).unwrap();

        dir.with_session(id, |session| {
            let (source, created) = session.source_mut_or_insert("rtsp://host/item");
            assert!(created);
            source.medias.push(Media::new("rtsp://host/item/audio", MediaKind::Audio));
            source.medias.push(Media::new("rtsp://host/item/video", MediaKind::Video));

            let (_, created_again) = session.source_mut_or_insert("rtsp://host/item");
            assert!(!created_again);
            Ok(())
        })
        .unwrap();

        dir.with_session(id, |session| {
            let source = session.source_mut("rtsp://host/item").unwrap();
            assert!(source.remove_media("rtsp://host/item/audio"));
            assert!(!source.remove_media("rtsp://host/item/audio"));
            assert_eq!(source.medias.len(), 1);
            assert!(session.remove_source("rtsp://host/item"));
            assert!(session.source("rtsp://host/item").is_none());
            Ok(())
        })
        .unwrap();

        // The emptied session stays registered.
        assert!(dir.contains(id));
    }

    #[test]
    fn clear_drains_everything() {
        let dir = SessionDirectory::new(11);
        for _ in 0..5 {
            dir.resolve(None, addr()).unwrap();
        }
        dir.clear();
        assert!(dir.is_empty());
    }
}
