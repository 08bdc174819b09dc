//! Ingress endpoint for one media stream.

use rand::Rng;
use rtp::{RtpPacket, SdesType, SenderInfo};
use serde_json::{json, Value};

use crate::dictionaries::{MediaKind, RtpCapabilities, RtpParameters};
use crate::error::RequestError;

const CNAME_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// CNAME announced downstream when the stream's parameters don't carry one.
fn random_cname() -> String {
    let mut rng = rand::thread_rng();
    (0..16)
        .map(|_| CNAME_CHARS[rng.gen_range(0..CNAME_CHARS.len())] as char)
        .collect()
}

/// Receives RTP for a single stream of a peer. Holds the negotiated
/// parameters and validates every inbound packet against them before the
/// room fans it out.
pub struct RtpReceiver {
    id: u32,
    kind: MediaKind,
    transport_id: Option<u32>,
    parameters: Option<RtpParameters>,
    /// CNAME learned from RTCP SDES when the parameters don't carry one.
    cname: Option<String>,
    last_sender_report: Option<SenderInfo>,
    packets_received: u64,
    bytes_received: u64,
    closed: bool,
}

impl RtpReceiver {
    pub fn new(id: u32, kind: MediaKind) -> Self {
        RtpReceiver {
            id,
            kind,
            transport_id: None,
            parameters: None,
            cname: None,
            last_sender_report: None,
            packets_received: 0,
            bytes_received: 0,
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

    pub fn parameters(&self) -> Option<&RtpParameters> {
        self.parameters.as_ref()
    }

    pub fn transport_id(&self) -> Option<u32> {
        self.transport_id
    }

    pub fn set_transport(&mut self, transport_id: u32) {
        self.transport_id = Some(transport_id);
    }

    /// Install negotiated parameters after validating them against the
    /// peer's capabilities. Rejection leaves previous parameters untouched.
    pub fn set_parameters(
        &mut self,
        params: RtpParameters,
        caps: &RtpCapabilities,
    ) -> Result<(), RequestError> {
        if self.closed {
            return Err(RequestError::other("receiver closed"));
        }

        params.validate(caps)?;

        if self.cname.is_none() {
            self.cname = Some(params.rtcp.cname.clone().unwrap_or_else(random_cname));
        }
        self.parameters = Some(params);

        Ok(())
    }

    /// Whether an inbound packet belongs to this stream: its payload type
    /// must be in the parameters and its SSRC must be announced by an
    /// encoding. Packets failing either are dropped by the caller.
    pub fn accepts(&self, packet: &RtpPacket) -> bool {
        if self.closed {
            return false;
        }

        let Some(params) = &self.parameters else {
            return false;
        };

        if !params.has_payload_type(*packet.payload_type()) {
            trace!(
                "Packet with payload type {} does not match receiver {}",
                packet.payload_type(),
                self.id
            );
            return false;
        }

        let mut any_ssrc = false;
        for ssrc in params.ssrcs() {
            any_ssrc = true;
            if ssrc == *packet.ssrc() {
                return true;
            }
        }

        // No SSRC announced at all means matching is by payload type alone.
        !any_ssrc
    }

    pub fn record_packet(&mut self, bytes: usize) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
    }

    pub fn receive_sender_report(&mut self, info: &SenderInfo) {
        if self.closed {
            return;
        }
        self.last_sender_report = Some(*info);
    }

    pub fn receive_sdes_item(&mut self, sdes_type: SdesType, value: &str) {
        if self.closed {
            return;
        }
        if sdes_type == SdesType::CNAME && self.cname.is_none() {
            debug!("Receiver {} associated with CNAME {}", self.id, value);
            self.cname = Some(value.to_string());
        }
    }

    /// Returns true on the open -> closed transition so the caller notifies
    /// exactly once.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        true
    }

    pub fn dump(&self) -> Value {
        json!({
            "rtpReceiverId": self.id,
            "kind": self.kind,
            "transportId": self.transport_id,
            "rtpParameters": self.parameters,
            "cname": self.cname,
            "stats": {
                "packetsReceived": self.packets_received,
                "bytesReceived": self.bytes_received,
            },
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dictionaries::negotiate_capabilities;
    use crate::dictionaries::{RtpCodec, RtpCodecParameters, RtpEncoding};

    fn caps() -> RtpCapabilities {
        negotiate_capabilities(vec![RtpCodec {
            kind: MediaKind::Audio,
            mime_type: "audio/opus".into(),
            preferred_payload_type: None,
            clock_rate: 48_000,
            channels: Some(2),
            parameters: Default::default(),
            rtcp_feedback: Vec::new(),
        }])
        .unwrap()
    }

    fn params(pt: u8, ssrc: u32) -> RtpParameters {
        RtpParameters {
            codecs: vec![RtpCodecParameters {
                mime_type: "audio/opus".into(),
                payload_type: pt,
                clock_rate: 48_000,
                channels: Some(2),
                parameters: Default::default(),
                rtcp_feedback: Vec::new(),
            }],
            encodings: vec![RtpEncoding {
                ssrc: Some(ssrc),
                codec_payload_type: Some(pt),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn packet(pt: u8, ssrc: u32) -> Vec<u8> {
        let mut buf = vec![
            0x80, pt, 0x00, 0x01, 0x00, 0x00, 0x00, 0x64, 0, 0, 0, 0, 1, 2, 3,
        ];
        buf[8..12].copy_from_slice(&ssrc.to_be_bytes());
        buf
    }

    #[test]
    fn drops_unknown_payload_type_and_ssrc() {
        let mut receiver = RtpReceiver::new(1, MediaKind::Audio);

        // Nothing negotiated yet: everything is dropped.
        let buf = packet(96, 0xaaa);
        let pkt = RtpPacket::parse(&buf).unwrap();
        assert!(!receiver.accepts(&pkt));

        receiver.set_parameters(params(96, 0xaaa), &caps()).unwrap();
        assert!(receiver.accepts(&pkt));

        let other_pt = packet(97, 0xaaa);
        assert!(!receiver.accepts(&RtpPacket::parse(&other_pt).unwrap()));

        let other_ssrc = packet(96, 0xbbb);
        assert!(!receiver.accepts(&RtpPacket::parse(&other_ssrc).unwrap()));
    }

    #[test]
    fn rejects_parameters_outside_capabilities() {
        let mut receiver = RtpReceiver::new(1, MediaKind::Audio);

        let mut bad = params(96, 0xaaa);
        bad.codecs[0].mime_type = "audio/G719".into();

        assert!(receiver.set_parameters(bad, &caps()).is_err());
        assert!(receiver.parameters().is_none());
    }

    #[test]
    fn close_is_terminal_and_reported_once() {
        let mut receiver = RtpReceiver::new(1, MediaKind::Audio);
        receiver.set_parameters(params(96, 0xaaa), &caps()).unwrap();

        assert!(receiver.close());
        assert!(!receiver.close());

        let buf = packet(96, 0xaaa);
        assert!(!receiver.accepts(&RtpPacket::parse(&buf).unwrap()));
        assert!(receiver
            .set_parameters(params(96, 0xaaa), &caps())
            .is_err());
    }
}
