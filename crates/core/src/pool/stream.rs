//! The streaming worker: one thread producing RTP (and periodic RTCP) for
//! exactly one media stream.
//!
//! The worker starts paused. PLAY/PAUSE flip a gate shared with the
//! registry; TEARDOWN (or the idle reaper, or shutdown) raises the stop
//! flag and joins the thread. The RTP timestamp counts accumulated
//! *playing* milliseconds: the clock runs while the gate is open and
//! freezes across pauses.

use std::net::{SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::media::rtcp::SenderReport;
use crate::media::rtp::{self, RTP_HEADER_LEN, RtpHeader};
use crate::source::ChunkSource;

/// Media bytes carried per RTP packet.
pub const RTP_CHUNK_SIZE: usize = 512;

/// Largest packet the worker ever emits.
pub const RTP_MAX_PACKET: usize = RTP_CHUNK_SIZE + RTP_HEADER_LEN;

/// A sender report goes out roughly every this many payload octets (~2%
/// RTCP share).
const RTCP_OCTET_INTERVAL: u32 = 10_976;

/// Fixed inter-chunk sleep. Stands in for the real pacing algorithm,
/// which lives outside this crate.
const PACE_INTERVAL: Duration = Duration::from_millis(20);

/// Re-check period for the stop flag while the gate is closed.
const GATE_POLL: Duration = Duration::from_millis(100);

/// Play gate and stop flag shared between a worker and the registry.
pub struct StreamShared {
    playing: Mutex<bool>,
    resumed: Condvar,
    stop: AtomicBool,
}

impl StreamShared {
    /// Workers start paused.
    pub fn new() -> StreamShared {
        StreamShared {
            playing: Mutex::new(false),
            resumed: Condvar::new(),
            stop: AtomicBool::new(false),
        }
    }

    pub fn set_playing(&self, playing: bool) {
        *self.playing.lock() = playing;
        self.resumed.notify_all();
    }

    pub fn is_playing(&self) -> bool {
        *self.playing.lock()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.resumed.notify_all();
    }

    pub fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Block until the gate opens. Returns false when stopped instead.
    fn wait_playing(&self) -> bool {
        let mut playing = self.playing.lock();
        loop {
            if self.stopped() {
                return false;
            }
            if *playing {
                return true;
            }
            self.resumed.wait_for(&mut playing, GATE_POLL);
        }
    }
}

impl Default for StreamShared {
    fn default() -> Self {
        StreamShared::new()
    }
}

/// Accumulated-playing-time clock behind the RTP timestamp.
struct PlayClock {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl PlayClock {
    fn new() -> PlayClock {
        PlayClock {
            accumulated: Duration::ZERO,
            running_since: None,
        }
    }

    fn resume(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    fn pause(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    fn elapsed_ms(&self) -> u32 {
        let running = self
            .running_since
            .map(|since| since.elapsed())
            .unwrap_or(Duration::ZERO);
        (self.accumulated + running).as_millis() as u32
    }
}

/// One data-plane streaming unit.
pub struct StreamWorker {
    ssrc: u32,
    rtp_socket: UdpSocket,
    rtcp_socket: UdpSocket,
    rtp_dest: SocketAddrV4,
    rtcp_dest: SocketAddrV4,
    source: Box<dyn ChunkSource>,
    shared: Arc<StreamShared>,
    done: Sender<u32>,
}

impl StreamWorker {
    /// `client` is the client's RTP endpoint; RTCP goes to the next port.
    pub fn new(
        ssrc: u32,
        rtp_socket: UdpSocket,
        rtcp_socket: UdpSocket,
        client: SocketAddrV4,
        source: Box<dyn ChunkSource>,
        shared: Arc<StreamShared>,
        done: Sender<u32>,
    ) -> StreamWorker {
        StreamWorker {
            ssrc,
            rtp_socket,
            rtcp_socket,
            rtp_dest: client,
            rtcp_dest: SocketAddrV4::new(*client.ip(), client.port() + 1),
            source,
            shared,
            done,
        }
    }

    /// Streaming loop; runs until stop, end of stream, or a source error.
    pub fn run(mut self) {
        let mut seq: u16 = 0;
        let mut packet_count: u32 = 0;
        let mut octet_count: u32 = 0;
        let mut next_report = RTCP_OCTET_INTERVAL;
        let mut clock = PlayClock::new();
        let mut chunk = [0u8; RTP_CHUNK_SIZE];

        tracing::debug!(
            ssrc = format_args!("{:#010x}", self.ssrc),
            dest = %self.rtp_dest,
            "stream worker started"
        );

        loop {
            if self.shared.stopped() {
                break;
            }
            if !self.shared.is_playing() {
                clock.pause();
                if !self.shared.wait_playing() {
                    break;
                }
            }
            clock.resume();

            let read = match self.source.next_chunk(&mut chunk) {
                Ok(0) => {
                    tracing::debug!(ssrc = format_args!("{:#010x}", self.ssrc), "end of stream");
                    break;
                }
                Ok(read) => read,
                Err(e) => {
                    tracing::warn!(
                        ssrc = format_args!("{:#010x}", self.ssrc),
                        error = %e,
                        "source read failed"
                    );
                    break;
                }
            };

            seq = seq.wrapping_add(1);
            packet_count = packet_count.wrapping_add(1);
            octet_count = octet_count.wrapping_add(read as u32);

            let header = RtpHeader {
                seq,
                timestamp: clock.elapsed_ms(),
                ssrc: self.ssrc,
            };
            match rtp::pack(&header, &chunk[..read], RTP_MAX_PACKET) {
                Ok(packet) => {
                    if let Err(e) = self.rtp_socket.send_to(&packet, self.rtp_dest) {
                        tracing::trace!(error = %e, "rtp send failed");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "rtp pack failed");
                    break;
                }
            }

            if octet_count >= next_report {
                next_report = next_report.wrapping_add(RTCP_OCTET_INTERVAL);
                let report =
                    SenderReport::now(self.ssrc, clock.elapsed_ms(), packet_count, octet_count);
                if let Err(e) = self.rtcp_socket.send_to(&report.serialize(), self.rtcp_dest) {
                    tracing::trace!(error = %e, "rtcp send failed");
                }
            }

            std::thread::sleep(PACE_INTERVAL);
        }

        tracing::debug!(ssrc = format_args!("{:#010x}", self.ssrc), "stream worker finished");
        let _ = self.done.send(self.ssrc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::mpsc;

    /// Yields `chunks` full chunks, then end of stream.
    struct CountedSource {
        chunks: usize,
    }

    impl ChunkSource for CountedSource {
        fn next_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.chunks == 0 {
                return Ok(0);
            }
            self.chunks -= 1;
            buf.fill(0xAB);
            Ok(buf.len())
        }
    }

    fn udp_pair() -> (UdpSocket, UdpSocket) {
        (
            UdpSocket::bind("127.0.0.1:0").unwrap(),
            UdpSocket::bind("127.0.0.1:0").unwrap(),
        )
    }

    #[test]
    fn play_clock_freezes_while_paused() {
        let mut clock = PlayClock::new();
        assert_eq!(clock.elapsed_ms(), 0);
        clock.resume();
        std::thread::sleep(Duration::from_millis(30));
        clock.pause();
        let frozen = clock.elapsed_ms();
        assert!(frozen >= 20);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(clock.elapsed_ms(), frozen);
        clock.resume();
        std::thread::sleep(Duration::from_millis(10));
        assert!(clock.elapsed_ms() >= frozen);
    }

    #[test]
    fn gate_blocks_until_played_or_stopped() {
        let shared = Arc::new(StreamShared::new());
        let waiter = shared.clone();
        let handle = std::thread::spawn(move || waiter.wait_playing());
        std::thread::sleep(Duration::from_millis(20));
        shared.set_playing(true);
        assert!(handle.join().unwrap());

        let shared = Arc::new(StreamShared::new());
        let waiter = shared.clone();
        let handle = std::thread::spawn(move || waiter.wait_playing());
        std::thread::sleep(Duration::from_millis(20));
        shared.stop();
        assert!(!handle.join().unwrap());
    }

    #[test]
    fn worker_streams_packets_to_client() {
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let client_addr = match client.local_addr().unwrap() {
            std::net::SocketAddr::V4(addr) => addr,
            _ => unreachable!(),
        };

        let (rtp_socket, rtcp_socket) = udp_pair();
        let shared = Arc::new(StreamShared::new());
        let (done_tx, done_rx) = mpsc::channel();
        let worker = StreamWorker::new(
            0x1234,
            rtp_socket,
            rtcp_socket,
            client_addr,
            Box::new(CountedSource { chunks: 3 }),
            shared.clone(),
            done_tx,
        );
        let handle = std::thread::spawn(move || worker.run());

        shared.set_playing(true);

        let mut buf = [0u8; RTP_MAX_PACKET];
        let mut seqs = Vec::new();
        for _ in 0..3 {
            let (n, _) = client.recv_from(&mut buf).unwrap();
            let packet = rtp::unpack(&buf[..n]).unwrap();
            assert_eq!(packet.header.ssrc, 0x1234);
            assert_eq!(packet.payload.len(), RTP_CHUNK_SIZE);
            seqs.push(packet.header.seq);
        }
        assert_eq!(seqs, vec![1, 2, 3]);

        // End of stream: the worker reports completion on the channel.
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(2)).unwrap(), 0x1234);
        handle.join().unwrap();
    }

    #[test]
    fn stopped_worker_exits_while_paused() {
        let (rtp_socket, rtcp_socket) = udp_pair();
        let shared = Arc::new(StreamShared::new());
        let (done_tx, done_rx) = mpsc::channel();
        let worker = StreamWorker::new(
            7,
            rtp_socket,
            rtcp_socket,
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9),
            Box::new(CountedSource { chunks: 1000 }),
            shared.clone(),
            done_tx,
        );
        let handle = std::thread::spawn(move || worker.run());

        // Never played; stop must still unblock it.
        std::thread::sleep(Duration::from_millis(30));
        shared.stop();
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(2)).unwrap(), 7);
        handle.join().unwrap();
    }
}
