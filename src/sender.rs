//! Egress endpoint for one media stream.

use rtp::{extend_seq, NackEntry, ReceptionReport, RtpPacket, SeqNo};
use serde_json::{json, Value};

use crate::dictionaries::{MediaKind, RtpParameters};
use crate::transport::PacketSink;

/// Number of retransmission slots kept per sender.
const CACHE_SLOTS: usize = 32;

/// Size of one slot. Packets above this are not cached; media packets stay
/// under the MTU in practice.
const CACHE_SLOT_BYTES: usize = 2048;

struct CacheSlot {
    used: bool,
    seq: u16,
    len: usize,
    buf: Box<[u8]>,
}

/// Fixed ring of recently sent packets serving NACK requests. All slots are
/// allocated up front so the send path never allocates.
struct RtxCache {
    slots: Vec<CacheSlot>,
    head: usize,
}

impl RtxCache {
    fn new() -> Self {
        let slots = (0..CACHE_SLOTS)
            .map(|_| CacheSlot {
                used: false,
                seq: 0,
                len: 0,
                buf: vec![0_u8; CACHE_SLOT_BYTES].into_boxed_slice(),
            })
            .collect();

        RtxCache { slots, head: 0 }
    }

    fn store(&mut self, packet: &RtpPacket) {
        let raw_len = packet.raw().len();
        if raw_len > CACHE_SLOT_BYTES {
            trace!("Packet of {} bytes too big for the resend cache", raw_len);
            return;
        }

        let slot = &mut self.slots[self.head];
        packet.clone_to(&mut slot.buf);
        slot.used = true;
        slot.seq = packet.sequence_number();
        slot.len = raw_len;

        self.head = (self.head + 1) % CACHE_SLOTS;
    }

    fn get(&self, seq: u16) -> Option<&[u8]> {
        self.slots
            .iter()
            .find(|s| s.used && s.seq == seq)
            .map(|s| &s.buf[..s.len])
    }
}

/// Sends one stream to one subscribing peer, mirroring some receiver. The
/// sender never mutates packets; the view handed in by the room is forwarded
/// as is and a copy is parked in the resend cache.
pub struct RtpSender {
    id: u32,
    kind: MediaKind,
    transport_id: Option<u32>,
    parameters: Option<RtpParameters>,
    cache: RtxCache,
    last_seq: Option<SeqNo>,
    last_report: Option<ReceptionReport>,
    packets_sent: u64,
    bytes_sent: u64,
    packets_retransmitted: u64,
    closed: bool,
}

impl RtpSender {
    pub fn new(id: u32, kind: MediaKind) -> Self {
        RtpSender {
            id,
            kind,
            transport_id: None,
            parameters: None,
            cache: RtxCache::new(),
            last_seq: None,
            last_report: None,
            packets_sent: 0,
            bytes_sent: 0,
            packets_retransmitted: 0,
            closed: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// A sender without negotiated parameters drops everything.
    pub fn is_available(&self) -> bool {
        self.parameters.is_some()
    }

    pub fn parameters(&self) -> Option<&RtpParameters> {
        self.parameters.as_ref()
    }

    pub fn set_parameters(&mut self, params: RtpParameters) {
        self.parameters = Some(params);
    }

    pub fn transport_id(&self) -> Option<u32> {
        self.transport_id
    }

    pub fn set_transport(&mut self, transport_id: u32) {
        self.transport_id = Some(transport_id);
    }

    /// Whether RTCP mentioning `ssrc` concerns this sender's stream.
    pub fn handles_ssrc(&self, ssrc: u32) -> bool {
        self.parameters
            .as_ref()
            .map(|p| p.ssrcs().any(|s| s == ssrc))
            .unwrap_or(false)
    }

    /// Forward one packet. Synchronous, no per-packet allocation; the cache
    /// copy goes into a preallocated slot.
    pub fn send(&mut self, packet: &RtpPacket, sink: Option<&mut dyn PacketSink>) {
        if self.closed {
            return;
        }
        if !self.is_available() {
            trace!("Sender {} has no parameters, dropping packet", self.id);
            return;
        }

        if let Some(sink) = sink {
            sink.send_rtp(packet.raw());
        }

        self.cache.store(packet);
        self.last_seq = Some(extend_seq(self.last_seq, packet.sequence_number()));
        self.packets_sent += 1;
        self.bytes_sent += packet.raw().len() as u64;
    }

    /// A reception report from the subscribing peer, kept for the dump and
    /// for the supervisor to read loop health off of.
    pub fn receive_receiver_report(&mut self, report: ReceptionReport) {
        if self.closed {
            return;
        }
        self.last_report = Some(report);
    }

    /// Service a NACK from the resend cache. `scratch` is the room owned
    /// vector reused across dispatches to coalesce the hit sequence numbers
    /// before writing anything out.
    pub fn receive_nack(
        &mut self,
        entries: &[NackEntry],
        scratch: &mut Vec<u16>,
        sink: Option<&mut dyn PacketSink>,
    ) {
        if self.closed {
            return;
        }

        scratch.clear();
        for entry in entries {
            for seq in entry.sequence_numbers() {
                if self.cache.get(seq).is_some() {
                    scratch.push(seq);
                } else {
                    trace!("Sender {} cannot retransmit seq {}, not in cache", self.id, seq);
                }
            }
        }

        let Some(sink) = sink else {
            return;
        };

        for seq in scratch.iter() {
            let raw = self.cache.get(*seq).expect("coalesced seq to be cached");
            sink.send_rtp(raw);
            self.packets_retransmitted += 1;
        }
    }

    /// Returns true on the open -> closed transition.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        true
    }

    pub fn dump(&self) -> Value {
        json!({
            "rtpSenderId": self.id,
            "kind": self.kind,
            "transportId": self.transport_id,
            "rtpParameters": self.parameters,
            "available": self.is_available(),
            "stats": {
                "packetsSent": self.packets_sent,
                "bytesSent": self.bytes_sent,
                "packetsRetransmitted": self.packets_retransmitted,
                "lastFractionLost": self.last_report.map(|r| r.fraction_lost),
            },
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dictionaries::{RtpCodecParameters, RtpEncoding};

    struct Recorder(Vec<Vec<u8>>);

    impl PacketSink for Recorder {
        fn send_rtp(&mut self, raw: &[u8]) {
            self.0.push(raw.to_vec());
        }

        fn send_rtcp(&mut self, _raw: &[u8]) {}
    }

    fn params() -> RtpParameters {
        RtpParameters {
            codecs: vec![RtpCodecParameters {
                mime_type: "audio/opus".into(),
                payload_type: 96,
                clock_rate: 48_000,
                channels: Some(2),
                parameters: Default::default(),
                rtcp_feedback: Vec::new(),
            }],
            encodings: vec![RtpEncoding {
                ssrc: Some(0xaaa),
                codec_payload_type: Some(96),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn packet(seq: u16) -> Vec<u8> {
        let mut buf = vec![
            0x80, 0x60, 0, 0, 0x00, 0x00, 0x00, 0x64, 0x00, 0x00, 0x0a, 0xaa, 0xde, 0xad,
        ];
        buf[2..4].copy_from_slice(&seq.to_be_bytes());
        buf
    }

    #[test]
    fn drops_until_available() {
        let mut sender = RtpSender::new(1, MediaKind::Audio);
        let mut sink = Recorder(Vec::new());

        let buf = packet(1);
        let pkt = RtpPacket::parse(&buf).unwrap();

        sender.send(&pkt, Some(&mut sink));
        assert!(sink.0.is_empty());

        sender.set_parameters(params());
        sender.send(&pkt, Some(&mut sink));
        assert_eq!(sink.0, vec![buf]);
    }

    #[test]
    fn nack_served_from_cache() {
        let mut sender = RtpSender::new(1, MediaKind::Audio);
        sender.set_parameters(params());

        let mut sink = Recorder(Vec::new());
        let bufs: Vec<Vec<u8>> = (10..14).map(packet).collect();
        for buf in &bufs {
            sender.send(&RtpPacket::parse(buf).unwrap(), Some(&mut sink));
        }
        sink.0.clear();

        // Ask for 11 and 13 (blp bit 1 relative to pid 11), plus 500 which
        // was never sent.
        let entries = [
            NackEntry {
                pid: 11,
                blp: 0b10,
            },
            NackEntry { pid: 500, blp: 0 },
        ];

        let mut scratch = Vec::new();
        sender.receive_nack(&entries, &mut scratch, Some(&mut sink));

        assert_eq!(sink.0, vec![bufs[1].clone(), bufs[3].clone()]);
    }

    #[test]
    fn cache_overwrites_oldest() {
        let mut sender = RtpSender::new(1, MediaKind::Audio);
        sender.set_parameters(params());

        for seq in 0..(CACHE_SLOTS as u16 + 1) {
            let buf = packet(seq);
            sender.send(&RtpPacket::parse(&buf).unwrap(), None);
        }

        let mut sink = Recorder(Vec::new());
        let mut scratch = Vec::new();

        // Seq 0 has been overwritten, seq 1 is still there.
        sender.receive_nack(&[NackEntry { pid: 0, blp: 0 }], &mut scratch, Some(&mut sink));
        assert!(sink.0.is_empty());

        sender.receive_nack(&[NackEntry { pid: 1, blp: 0 }], &mut scratch, Some(&mut sink));
        assert_eq!(sink.0.len(), 1);
    }

    #[test]
    fn closed_sender_ignores_everything() {
        let mut sender = RtpSender::new(1, MediaKind::Audio);
        sender.set_parameters(params());
        assert!(sender.close());
        assert!(!sender.close());

        let mut sink = Recorder(Vec::new());
        let buf = packet(1);
        sender.send(&RtpPacket::parse(&buf).unwrap(), Some(&mut sink));
        assert!(sink.0.is_empty());
    }
}
