//! Media input abstraction for the data plane.
//!
//! The pool does not know how media is produced; it pulls fixed-size
//! chunks from a [`ChunkSource`] resolved through a [`MediaCatalog`]. The
//! file-backed implementations here serve a directory of media files —
//! enough to stream real bytes end to end while the decode/transcode
//! pipeline stays outside this crate.

use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;

use crate::media::MediaKind;

/// A sequence of media data chunks.
pub trait ChunkSource: Send {
    /// Fill `buf` with the next chunk. `Ok(0)` is end of stream.
    fn next_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Resolves URI paths to chunk sources.
pub trait MediaCatalog: Send + Sync {
    /// Whether a media source exists behind `path` (the URI path with any
    /// `/audio`/`/video` suffix already stripped).
    fn exists(&self, path: &str) -> bool;

    /// Open the stream for one media kind of the source at `path`.
    fn open(&self, path: &str, kind: MediaKind) -> io::Result<Box<dyn ChunkSource>>;
}

/// Catalog rooted in a filesystem directory.
pub struct FileCatalog {
    root: PathBuf,
}

impl FileCatalog {
    pub fn new(root: impl Into<PathBuf>) -> FileCatalog {
        FileCatalog { root: root.into() }
    }

    /// Map a URI path into the root directory. Paths that climb upwards
    /// are refused.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        if path.contains("..") {
            return None;
        }
        Some(self.root.join(path.trim_start_matches('/')))
    }
}

impl MediaCatalog for FileCatalog {
    fn exists(&self, path: &str) -> bool {
        self.resolve(path)
            .map(|p| p.metadata().is_ok())
            .unwrap_or(false)
    }

    /// Both media kinds of a source are fed from the same backing file;
    /// the kind matters only to catalogs that split streams.
    fn open(&self, path: &str, _kind: MediaKind) -> io::Result<Box<dyn ChunkSource>> {
        let resolved = self
            .resolve(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path climbs upwards"))?;
        let file = File::open(resolved)?;
        Ok(Box::new(FileSource { file }))
    }
}

/// File-reading chunk source.
pub struct FileSource {
    file: File,
}

impl ChunkSource for FileSource {
    fn next_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}
