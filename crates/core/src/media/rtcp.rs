//! RTCP sender-report construction (RFC 3550 §6.4.1).
//!
//! Only the 28-byte sender-info portion is emitted (no report blocks):
//!
//! ```text
//! 0x80 0xC8 0x00 0x06 | ssrc | ntp sec | ntp frac | rtp ts | pkt count | octet count
//! ```
//!
//! Each field is a big-endian u32. The length word stays `0x0006`.

use std::time::{SystemTime, UNIX_EPOCH};

/// Serialized sender-report length in bytes.
pub const SENDER_REPORT_LEN: usize = 28;

/// Offset between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Sender-report fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderReport {
    pub ssrc: u32,
    pub ntp_seconds: u32,
    pub ntp_fraction: u32,
    /// Sender's media clock at the moment of the report (accumulated
    /// playing-time milliseconds, same unit as the RTP stream).
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
}

impl SenderReport {
    /// Build a report stamped with the current wall-clock NTP time.
    pub fn now(ssrc: u32, rtp_timestamp: u32, packet_count: u32, octet_count: u32) -> Self {
        let (ntp_seconds, ntp_fraction) = ntp_now();
        SenderReport {
            ssrc,
            ntp_seconds,
            ntp_fraction,
            rtp_timestamp,
            packet_count,
            octet_count,
        }
    }

    pub fn serialize(&self) -> [u8; SENDER_REPORT_LEN] {
        let mut packet = [0u8; SENDER_REPORT_LEN];
        packet[0] = 0x80; // V=2, no padding, RC=0
        packet[1] = 0xC8; // PT=200 (SR)
        packet[2] = 0x00;
        packet[3] = 0x06;
        packet[4..8].copy_from_slice(&self.ssrc.to_be_bytes());
        packet[8..12].copy_from_slice(&self.ntp_seconds.to_be_bytes());
        packet[12..16].copy_from_slice(&self.ntp_fraction.to_be_bytes());
        packet[16..20].copy_from_slice(&self.rtp_timestamp.to_be_bytes());
        packet[20..24].copy_from_slice(&self.packet_count.to_be_bytes());
        packet[24..28].copy_from_slice(&self.octet_count.to_be_bytes());
        packet
    }
}

/// Current time as (seconds, fraction) in NTP format.
pub fn ntp_now() -> (u32, u32) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let seconds = (now.as_secs() + NTP_UNIX_OFFSET) as u32;
    let fraction = ((now.subsec_nanos() as u64) << 32) / 1_000_000_000;
    (seconds, fraction as u32)
}
