//! Bounded registry of live streaming workers, keyed by ssrc.
//!
//! One lock guards the whole pool: the ssrc directory and the live count.
//! Worker creation is atomic under it — ssrc minting, UDP port binding,
//! thread spawn, and registration either all happen or every acquired
//! resource is released before the error is returned. Removal signals the
//! worker, joins it, and only then deletes the directory entry, so a
//! registered handle can never dangle.

use std::net::{SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::RngExt;

use crate::dict::Directory;
use crate::error::{Error, Result};
use crate::pool::stream::{StreamShared, StreamWorker};
use crate::source::ChunkSource;

/// Attempts at finding a bindable consecutive UDP port pair.
const MAX_UDP_BIND_ATTEMPTS: u32 = 100;

struct WorkerEntry {
    handle: Option<JoinHandle<()>>,
    shared: Arc<StreamShared>,
    server_port: u16,
    last_contact: Instant,
}

pub struct WorkerRegistry {
    inner: Mutex<Directory<u32, WorkerEntry>>,
    max_workers: usize,
    done_tx: Sender<u32>,
}

impl WorkerRegistry {
    /// `done_tx` is handed to every worker for its end-of-stream notice.
    pub fn new(max_workers: usize, done_tx: Sender<u32>) -> WorkerRegistry {
        WorkerRegistry {
            inner: Mutex::new(Directory::new(max_workers * 2)),
            max_workers,
            done_tx,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Provision one worker streaming `source` to `client`. Returns the
    /// minted ssrc and the worker's RTP port.
    pub fn create(
        &self,
        source: Box<dyn ChunkSource>,
        client: SocketAddrV4,
    ) -> Result<(u32, u16)> {
        let mut dir = self.inner.lock();
        if dir.len() >= self.max_workers {
            tracing::warn!(max = self.max_workers, "worker pool full");
            return Err(Error::PoolFull);
        }

        // Fresh ssrc, re-rolled until unused among live workers.
        let mut rng = rand::rng();
        let ssrc = loop {
            let candidate = rng.random::<u32>();
            if candidate != 0 && !dir.contains(&candidate) {
                break candidate;
            }
        };

        let (rtp_socket, rtcp_socket, server_port) = bind_udp_pair()?;
        let shared = Arc::new(StreamShared::new());
        let worker = StreamWorker::new(
            ssrc,
            rtp_socket,
            rtcp_socket,
            client,
            source,
            shared.clone(),
            self.done_tx.clone(),
        );
        // A failed spawn drops the worker and its sockets right here;
        // nothing has been registered yet.
        let handle = std::thread::Builder::new()
            .name(format!("rtp-{ssrc:08x}"))
            .spawn(move || worker.run())?;

        dir.insert(
            ssrc,
            WorkerEntry {
                handle: Some(handle),
                shared,
                server_port,
                last_contact: Instant::now(),
            },
        );
        tracing::info!(
            ssrc = format_args!("{ssrc:#010x}"),
            server_port,
            %client,
            workers = dir.len(),
            "worker created"
        );
        Ok((ssrc, server_port))
    }

    pub fn play(&self, ssrc: u32) -> Result<u16> {
        self.set_playing(ssrc, true)
    }

    pub fn pause(&self, ssrc: u32) -> Result<u16> {
        self.set_playing(ssrc, false)
    }

    fn set_playing(&self, ssrc: u32, playing: bool) -> Result<u16> {
        let mut dir = self.inner.lock();
        let entry = dir.get_mut(&ssrc).ok_or(Error::WorkerNotFound(ssrc))?;
        entry.shared.set_playing(playing);
        entry.last_contact = Instant::now();
        tracing::debug!(ssrc = format_args!("{ssrc:#010x}"), playing, "gate flipped");
        Ok(entry.server_port)
    }

    /// Tear one worker down: stop, join, delete — under the lock, so the
    /// entry and the thread disappear together.
    pub fn remove(&self, ssrc: u32) -> Result<u16> {
        let mut dir = self.inner.lock();
        let (entry, _) = dir.remove(&ssrc);
        let mut entry = entry.ok_or(Error::WorkerNotFound(ssrc))?;
        stop_and_join(ssrc, &mut entry);
        tracing::info!(
            ssrc = format_args!("{ssrc:#010x}"),
            workers = dir.len(),
            "worker removed"
        );
        Ok(entry.server_port)
    }

    /// A worker announced its own completion; reap it if still registered.
    pub fn finished(&self, ssrc: u32) {
        let mut dir = self.inner.lock();
        let (entry, _) = dir.remove(&ssrc);
        if let Some(mut entry) = entry {
            stop_and_join(ssrc, &mut entry);
            tracing::debug!(ssrc = format_args!("{ssrc:#010x}"), "finished worker reaped");
        }
    }

    /// Evict workers not contacted within `max_idle`. Returns how many
    /// went.
    pub fn sweep(&self, max_idle: Duration) -> usize {
        let mut dir = self.inner.lock();
        let idle: Vec<u32> = dir
            .iter()
            .filter(|(_, entry)| entry.last_contact.elapsed() > max_idle)
            .map(|(ssrc, _)| *ssrc)
            .collect();
        for ssrc in &idle {
            let (entry, _) = dir.remove(ssrc);
            if let Some(mut entry) = entry {
                tracing::warn!(ssrc = format_args!("{:#010x}", *ssrc), "idle worker evicted");
                stop_and_join(*ssrc, &mut entry);
            }
        }
        idle.len()
    }

    /// Stop and join every worker, leaving the directory empty.
    pub fn shutdown(&self) {
        let mut dir = self.inner.lock();
        let entries = dir.drain();
        let count = entries.len();
        for (ssrc, mut entry) in entries {
            stop_and_join(ssrc, &mut entry);
        }
        if count > 0 {
            tracing::info!(workers = count, "worker pool drained");
        }
    }
}

fn stop_and_join(ssrc: u32, entry: &mut WorkerEntry) {
    entry.shared.stop();
    if let Some(handle) = entry.handle.take() {
        if handle.join().is_err() {
            tracing::error!(ssrc = format_args!("{ssrc:#010x}"), "worker thread panicked");
        }
    }
}

/// Bind a consecutive UDP port pair (RTP on the first port, even; RTCP on
/// the next). Random probing, bounded attempts.
fn bind_udp_pair() -> Result<(UdpSocket, UdpSocket, u16)> {
    let mut rng = rand::rng();
    for _ in 0..MAX_UDP_BIND_ATTEMPTS {
        let first: u16 = rng.random_range(1026..59998) & !1;
        let Ok(rtp_socket) = UdpSocket::bind(("0.0.0.0", first)) else {
            continue;
        };
        let Ok(rtcp_socket) = UdpSocket::bind(("0.0.0.0", first + 1)) else {
            continue;
        };
        return Ok((rtp_socket, rtcp_socket, first));
    }
    Err(Error::BindExhausted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::mpsc;

    /// Endless zero chunks; only stop/teardown ends it.
    struct EndlessSource;

    impl ChunkSource for EndlessSource {
        fn next_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            buf.fill(0);
            Ok(buf.len())
        }
    }

    /// Immediate end of stream.
    struct EmptySource;

    impl ChunkSource for EmptySource {
        fn next_chunk(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
    }

    fn client() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9)
    }

    fn registry(max: usize) -> (WorkerRegistry, mpsc::Receiver<u32>) {
        let (tx, rx) = mpsc::channel();
        (WorkerRegistry::new(max, tx), rx)
    }

    #[test]
    fn create_and_remove() {
        let (registry, _rx) = registry(4);
        let (ssrc, server_port) = registry.create(Box::new(EndlessSource), client()).unwrap();
        assert_ne!(ssrc, 0);
        assert_eq!(server_port % 2, 0);
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.remove(ssrc).unwrap(), server_port);
        assert!(registry.is_empty());
        assert!(matches!(
            registry.remove(ssrc),
            Err(Error::WorkerNotFound(_))
        ));
    }

    #[test]
    fn ssrcs_are_unique_among_live_workers() {
        let (registry, _rx) = registry(8);
        let mut seen = Vec::new();
        for _ in 0..5 {
            let (ssrc, _) = registry.create(Box::new(EndlessSource), client()).unwrap();
            assert!(!seen.contains(&ssrc));
            seen.push(ssrc);
        }
        registry.shutdown();
    }

    #[test]
    fn pool_bound_enforced() {
        let (registry, _rx) = registry(2);
        registry.create(Box::new(EndlessSource), client()).unwrap();
        registry.create(Box::new(EndlessSource), client()).unwrap();
        assert!(matches!(
            registry.create(Box::new(EndlessSource), client()),
            Err(Error::PoolFull)
        ));
        // Tearing one down frees a slot.
        let ssrc = {
            let dir = registry.inner.lock();
            *dir.iter().next().unwrap().0
        };
        registry.remove(ssrc).unwrap();
        assert!(registry.create(Box::new(EndlessSource), client()).is_ok());
        registry.shutdown();
    }

    #[test]
    fn play_pause_route_by_ssrc() {
        let (registry, _rx) = registry(4);
        let (ssrc, port) = registry.create(Box::new(EndlessSource), client()).unwrap();
        assert_eq!(registry.play(ssrc).unwrap(), port);
        assert_eq!(registry.pause(ssrc).unwrap(), port);
        assert!(matches!(
            registry.play(ssrc.wrapping_add(1)),
            Err(Error::WorkerNotFound(_))
        ));
        registry.shutdown();
    }

    #[test]
    fn finished_worker_reaped_via_channel() {
        let (registry, rx) = registry(4);
        let (ssrc, _) = registry.create(Box::new(EmptySource), client()).unwrap();
        registry.play(ssrc).unwrap();
        // The worker hits end of stream immediately and reports itself.
        let done = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(done, ssrc);
        registry.finished(done);
        assert!(registry.is_empty());
    }

    #[test]
    fn sweep_evicts_only_idle_workers() {
        let (registry, _rx) = registry(4);
        let (idle, _) = registry.create(Box::new(EndlessSource), client()).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        let (fresh, _) = registry.create(Box::new(EndlessSource), client()).unwrap();

        let evicted = registry.sweep(Duration::from_millis(40));
        assert_eq!(evicted, 1);
        assert!(matches!(registry.play(idle), Err(Error::WorkerNotFound(_))));
        assert!(registry.play(fresh).is_ok());
        registry.shutdown();
    }

    #[test]
    fn shutdown_drains_pool() {
        let (registry, _rx) = registry(8);
        for _ in 0..3 {
            registry.create(Box::new(EndlessSource), client()).unwrap();
        }
        registry.shutdown();
        assert!(registry.is_empty());
    }
}
