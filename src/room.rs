//! The room routing engine: the receiver/sender bipartite map, fan-out on
//! every packet, and lifecycle coordination across peer join/leave and
//! stream open/close.

use std::collections::HashMap;

use rtp::{NackEntry, RtcpPacket, RtpPacket};
use serde_json::{json, Value};

use crate::channel::Notifier;
use crate::dictionaries::{
    negotiate_capabilities, MediaKind, RtpCapabilities, RtpCodec, RtpParameters,
};
use crate::error::RequestError;
use crate::peer::Peer;
use crate::sender::RtpSender;

/// A room holds its peers and the bipartite routing map between ingress
/// receivers and egress senders. The two map sides are only ever mutated
/// together, under the same call, so they cannot diverge; removals tolerate
/// entries that are already gone because a sender can be torn down from
/// either side within one turn.
pub struct Room {
    id: u32,
    capabilities: RtpCapabilities,
    /// Peers in insertion order. Fan-out follows this order.
    peers: Vec<Peer>,
    /// receiver id -> (peer id, sender id) of every sender mirroring it.
    receiver_senders: HashMap<u32, Vec<(u32, u32)>>,
    /// sender id -> the receiver it mirrors.
    sender_receiver: HashMap<u32, u32>,
    next_sender_id: u32,
    /// Scratch reused across NACK dispatches, never outliving one.
    rtx_scratch: Vec<u16>,
    /// Supervisor asked for the room to go away once the last peer leaves.
    close_when_empty: bool,
    closed: bool,
}

impl Room {
    /// Create the room, computing effective capabilities from the supervisor
    /// supplied media codecs. Payload type clashes fail room creation.
    pub fn new(
        id: u32,
        media_codecs: Vec<RtpCodec>,
        close_when_empty: bool,
    ) -> Result<Room, RequestError> {
        let capabilities = negotiate_capabilities(media_codecs)?;

        Ok(Room {
            id,
            capabilities,
            peers: Vec::new(),
            receiver_senders: HashMap::new(),
            sender_receiver: HashMap::new(),
            next_sender_id: 1,
            rtx_scratch: Vec::new(),
            close_when_empty,
            closed: false,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn capabilities(&self) -> &RtpCapabilities {
        &self.capabilities
    }

    pub fn peer(&self, id: u32) -> Option<&Peer> {
        self.peers.iter().find(|p| p.id() == id)
    }

    pub fn peer_mut(&mut self, id: u32) -> Option<&mut Peer> {
        self.peers.iter_mut().find(|p| p.id() == id)
    }

    fn allocate_sender_id(&mut self) -> u32 {
        let id = self.next_sender_id;
        self.next_sender_id += 1;
        id
    }

    pub fn add_peer(&mut self, peer_id: u32, notifier: &mut Notifier) -> Result<(), RequestError> {
        if self.peer(peer_id).is_some() {
            return Err(RequestError::other("peer already exists"));
        }

        self.peers.push(Peer::new(peer_id));
        notifier.emit(self.id, "newpeer", json!({ "peerId": peer_id }));

        debug!("Peer {} joined room {}", peer_id, self.id);
        Ok(())
    }

    /// Install a peer's capabilities, then mirror every receiver the other
    /// peers already announced into new senders for this late joiner.
    pub fn set_peer_capabilities(
        &mut self,
        peer_id: u32,
        caps: RtpCapabilities,
        notifier: &mut Notifier,
    ) -> Result<(), RequestError> {
        let room_caps = self.capabilities.clone();
        let peer = self
            .peer_mut(peer_id)
            .ok_or_else(|| RequestError::other("peer not found"))?;
        peer.set_capabilities(caps, &room_caps)?;

        let existing: Vec<(u32, MediaKind, RtpParameters)> = self
            .peers
            .iter()
            .filter(|p| p.id() != peer_id)
            .flat_map(|p| p.receivers.iter())
            .filter_map(|r| r.parameters().map(|params| (r.id(), r.kind(), params.clone())))
            .collect();

        for (receiver_id, kind, params) in existing {
            self.create_sender(peer_id, receiver_id, kind, &params, notifier);
        }

        Ok(())
    }

    /// Make `subscriber_id` mirror one receiver with a freshly allocated
    /// sender. Both map sides are inserted here, never separately.
    fn create_sender(
        &mut self,
        subscriber_id: u32,
        receiver_id: u32,
        kind: MediaKind,
        source_params: &RtpParameters,
        notifier: &mut Notifier,
    ) {
        let sender_id = self.allocate_sender_id();

        let Some(subscriber) = self.peer_mut(subscriber_id) else {
            return;
        };

        let mut sender = RtpSender::new(sender_id, kind);
        // Without subscriber capabilities, or with a codec the subscriber
        // lacks, the sender exists but stays unavailable and drops packets.
        let adapted = subscriber
            .capabilities()
            .and_then(|caps| source_params.adapt_to(caps));
        if let Some(params) = adapted {
            sender.set_parameters(params);
        }

        let dump = sender.dump();
        subscriber.senders.push(sender);

        self.receiver_senders
            .entry(receiver_id)
            .or_default()
            .push((subscriber_id, sender_id));
        self.sender_receiver.insert(sender_id, receiver_id);

        notifier.emit(subscriber_id, "newrtpsender", dump);
    }

    /// Install parameters on a receiver, validated against its peer's
    /// capabilities, then fan the stream out: every other peer gets a sender
    /// mirroring it (or has its existing one retargeted on renegotiation).
    pub fn set_receiver_parameters(
        &mut self,
        peer_id: u32,
        receiver_id: u32,
        params: RtpParameters,
        notifier: &mut Notifier,
    ) -> Result<(), RequestError> {
        let peer = self
            .peer_mut(peer_id)
            .ok_or_else(|| RequestError::other("peer not found"))?;
        let caps = peer
            .capabilities()
            .cloned()
            .ok_or_else(|| RequestError::other("peer capabilities are not yet set"))?;
        let receiver = peer
            .receiver_mut(receiver_id)
            .ok_or_else(|| RequestError::other("receiver not found"))?;

        receiver.set_parameters(params, &caps)?;
        let installed = receiver
            .parameters()
            .expect("parameters just installed")
            .clone();
        let kind = receiver.kind();

        let mirrored: Vec<(u32, u32)> = self
            .receiver_senders
            .get(&receiver_id)
            .cloned()
            .unwrap_or_default();

        let subscribers: Vec<u32> = self
            .peers
            .iter()
            .filter(|p| p.id() != peer_id)
            .map(|p| p.id())
            .collect();

        for subscriber_id in subscribers {
            if let Some((_, sender_id)) = mirrored.iter().find(|(pid, _)| *pid == subscriber_id) {
                // Renegotiation: retarget the existing sender.
                let sender_id = *sender_id;
                let Some(subscriber) = self.peer_mut(subscriber_id) else {
                    continue;
                };
                let adapted = subscriber
                    .capabilities()
                    .and_then(|caps| installed.adapt_to(caps));
                if let (Some(sender), Some(params)) = (subscriber.sender_mut(sender_id), adapted) {
                    sender.set_parameters(params);
                }
            } else {
                self.create_sender(subscriber_id, receiver_id, kind, &installed, notifier);
            }
        }

        Ok(())
    }

    /// One inbound RTP packet for a receiver. The receiver validates it,
    /// then every mirroring sender forwards the same borrowed view, in peer
    /// insertion order. No copy is made on this path.
    pub fn receive_packet(&mut self, peer_id: u32, receiver_id: u32, packet: &RtpPacket) {
        let Some(peer) = self.peer_mut(peer_id) else {
            return;
        };
        let Some(receiver) = peer.receiver_mut(receiver_id) else {
            return;
        };

        if !receiver.accepts(packet) {
            return;
        }
        receiver.record_packet(packet.raw().len());

        let Some(subscribers) = self.receiver_senders.get(&receiver_id) else {
            return;
        };

        // The map entry cannot be borrowed across the sender calls below.
        let subscribers = subscribers.clone();

        for (subscriber_id, sender_id) in subscribers {
            let Some(subscriber) = self.peer_mut(subscriber_id) else {
                continue;
            };
            subscriber.send_through(sender_id, packet);
        }
    }

    /// Inbound RTCP from one peer's transport, already parsed. Sender
    /// reports and SDES concern the peer's own receivers; receiver reports
    /// and feedback close the loop on its senders.
    pub fn receive_rtcp(&mut self, peer_id: u32, packets: &[RtcpPacket]) {
        for packet in packets {
            match packet {
                RtcpPacket::SenderReport(sr) => {
                    if let Some(receiver) = self.receiver_by_ssrc(peer_id, *sr.sender_info.ssrc) {
                        receiver.receive_sender_report(&sr.sender_info);
                    }
                }
                RtcpPacket::Descriptions(sdes) => {
                    for chunk in &sdes.chunks {
                        let Some(receiver) = self.receiver_by_ssrc(peer_id, *chunk.ssrc) else {
                            continue;
                        };
                        for (sdes_type, value) in &chunk.items {
                            receiver.receive_sdes_item(*sdes_type, value);
                        }
                    }
                }
                RtcpPacket::ReceiverReport(rr) => {
                    for report in &rr.reports {
                        if let Some(peer) = self.peer_mut(peer_id) {
                            if let Some(sender) =
                                peer.senders.iter_mut().find(|s| s.handles_ssrc(*report.ssrc))
                            {
                                sender.receive_receiver_report(*report);
                            }
                        }
                    }
                }
                RtcpPacket::RtpFeedback(fb) => {
                    let nacks = fb.nacks();
                    if nacks.is_empty() {
                        trace!("Ignoring transport feedback {:?}", fb.fmt);
                        continue;
                    }
                    self.dispatch_nack(peer_id, *fb.media_ssrc, &nacks);
                }
                RtcpPacket::PsFeedback(fb) => {
                    self.forward_ps_feedback(peer_id, packet, *fb.media_ssrc);
                }
                RtcpPacket::Goodbye(bye) => {
                    debug!("Peer {} sent RTCP Bye for {} sources", peer_id, bye.ssrcs.len());
                }
                RtcpPacket::App(_) => {}
            }
        }
    }

    fn receiver_by_ssrc(
        &mut self,
        peer_id: u32,
        ssrc: u32,
    ) -> Option<&mut crate::receiver::RtpReceiver> {
        let peer = self.peer_mut(peer_id)?;
        peer.receivers
            .iter_mut()
            .find(|r| r.parameters().map(|p| p.ssrcs().any(|s| s == ssrc)).unwrap_or(false))
    }

    /// NACK from a subscriber: the sender coalesces cache hits into the room
    /// scratch and retransmits through its own transport.
    fn dispatch_nack(&mut self, peer_id: u32, media_ssrc: u32, nacks: &[NackEntry]) {
        let mut scratch = std::mem::take(&mut self.rtx_scratch);

        if let Some(peer) = self.peer_mut(peer_id) {
            if !peer.nack_through(media_ssrc, nacks, &mut scratch) {
                trace!("NACK for unknown media SSRC {}, dropped", media_ssrc);
            }
        }

        self.rtx_scratch = scratch;
    }

    /// Payload specific feedback (PLI and friends) from a subscriber is
    /// routed upstream to the peer producing the mirrored stream.
    fn forward_ps_feedback(&mut self, peer_id: u32, packet: &RtcpPacket, media_ssrc: u32) {
        let sender_id = {
            let Some(peer) = self.peer_mut(peer_id) else {
                return;
            };
            let Some(sender) = peer.senders.iter().find(|s| s.handles_ssrc(media_ssrc)) else {
                trace!("Feedback for unknown media SSRC {}, dropped", media_ssrc);
                return;
            };
            sender.id()
        };

        let Some(receiver_id) = self.sender_receiver.get(&sender_id).copied() else {
            return;
        };

        // Find the producing peer that owns the receiver.
        let Some(producer) = self
            .peers
            .iter_mut()
            .find(|p| p.receivers.iter().any(|r| r.id() == receiver_id))
        else {
            return;
        };

        let Some(sink) = producer.receiver_rtcp_sink(receiver_id) else {
            trace!("No transport to forward feedback upstream, dropped");
            return;
        };

        let mut buf = vec![0_u8; packet.length_words() * 4];
        packet.write_to(&mut buf);
        sink.send_rtcp(&buf);
    }

    /// Close a receiver: its senders on the other peers die with it and all
    /// bipartite entries referring to either side disappear.
    pub fn close_receiver(&mut self, peer_id: u32, receiver_id: u32, notifier: &mut Notifier) {
        if let Some(peer) = self.peer_mut(peer_id) {
            if let Some(receiver) = peer.receiver_mut(receiver_id) {
                if receiver.close() {
                    notifier.emit(receiver_id, "close", Value::Null);
                }
            }
            peer.remove_receiver(receiver_id);
        }

        let mirroring = self.receiver_senders.remove(&receiver_id).unwrap_or_default();
        for (subscriber_id, sender_id) in mirroring {
            self.close_sender(subscriber_id, sender_id, notifier);
        }
    }

    /// Close a sender and remove it from both map sides. Idempotent: the
    /// entries may already be gone when the teardown started on the receiver
    /// side within the same turn.
    pub fn close_sender(&mut self, peer_id: u32, sender_id: u32, notifier: &mut Notifier) {
        if let Some(receiver_id) = self.sender_receiver.remove(&sender_id) {
            if let Some(set) = self.receiver_senders.get_mut(&receiver_id) {
                set.retain(|(_, s)| *s != sender_id);
            }
        }

        if let Some(peer) = self.peer_mut(peer_id) {
            if let Some(sender) = peer.sender_mut(sender_id) {
                if sender.close() {
                    notifier.emit(sender_id, "close", Value::Null);
                }
            }
            peer.remove_sender(sender_id);
        }
    }

    /// Close a peer: receivers first (cascading into the senders mirroring
    /// them on other peers), then the peer's own senders and transports,
    /// then the peer itself. Returns true when the room closed itself
    /// because it became empty while marked for collection.
    pub fn close_peer(&mut self, peer_id: u32, notifier: &mut Notifier) -> bool {
        let Some(peer) = self.peer_mut(peer_id) else {
            return false;
        };

        let receiver_ids: Vec<u32> = peer.receivers.iter().map(|r| r.id()).collect();
        let sender_ids: Vec<u32> = peer.senders.iter().map(|s| s.id()).collect();

        for receiver_id in receiver_ids {
            self.close_receiver(peer_id, receiver_id, notifier);
        }
        for sender_id in sender_ids {
            self.close_sender(peer_id, sender_id, notifier);
        }

        if let Some(peer) = self.peer_mut(peer_id) {
            for transport in peer.transports.iter_mut() {
                transport.close();
            }
            if peer.close() {
                notifier.emit(peer_id, "close", Value::Null);
            }
        }

        self.peers.retain(|p| p.id() != peer_id);
        debug!("Peer {} left room {}", peer_id, self.id);

        if self.peers.is_empty() && self.close_when_empty && !self.closed {
            self.closed = true;
            notifier.emit(self.id, "close", Value::Null);
            return true;
        }

        false
    }

    /// Close the whole room.
    pub fn close(&mut self, notifier: &mut Notifier) {
        if self.closed {
            return;
        }

        let peer_ids: Vec<u32> = self.peers.iter().map(|p| p.id()).collect();
        for peer_id in peer_ids {
            self.close_peer(peer_id, notifier);
        }

        if !self.closed {
            self.closed = true;
            notifier.emit(self.id, "close", Value::Null);
        }
    }

    pub fn dump(&self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .receiver_senders
            .iter()
            .map(|(receiver_id, senders)| {
                (
                    receiver_id.to_string(),
                    Value::Array(
                        senders
                            .iter()
                            .map(|(_, sender_id)| json!(sender_id))
                            .collect(),
                    ),
                )
            })
            .collect();

        json!({
            "roomId": self.id,
            "capabilities": self.capabilities,
            "peers": self.peers.iter().map(|p| p.dump()).collect::<Vec<_>>(),
            "mapRtpReceiverRtpSenders": map,
        })
    }

    /// Map symmetry, checked by tests: every sender in a receiver's set maps
    /// back to that receiver and vice versa.
    #[cfg(test)]
    pub(crate) fn assert_map_symmetry(&self) {
        for (receiver_id, senders) in &self.receiver_senders {
            for (_, sender_id) in senders {
                assert_eq!(self.sender_receiver.get(sender_id), Some(receiver_id));
            }
        }
        for (sender_id, receiver_id) in &self.sender_receiver {
            let set = self.receiver_senders.get(receiver_id).expect("receiver entry");
            assert!(set.iter().any(|(_, s)| s == sender_id));
        }
    }

    #[cfg(test)]
    pub(crate) fn map_mentions(&self, id: u32) -> bool {
        self.receiver_senders.contains_key(&id)
            || self.sender_receiver.contains_key(&id)
            || self
                .receiver_senders
                .values()
                .flatten()
                .any(|(_, s)| *s == id)
            || self.sender_receiver.values().any(|r| *r == id)
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    use super::*;
    use crate::dictionaries::{RtpCodecParameters, RtpEncoding};
    use crate::transport::{PacketSink, Transport};

    type Log = Rc<RefCell<Vec<(u32, Vec<u8>)>>>;

    struct TaggedSink {
        tag: u32,
        rtp: Log,
        rtcp: Log,
    }

    impl PacketSink for TaggedSink {
        fn send_rtp(&mut self, raw: &[u8]) {
            self.rtp.borrow_mut().push((self.tag, raw.to_vec()));
        }

        fn send_rtcp(&mut self, raw: &[u8]) {
            self.rtcp.borrow_mut().push((self.tag, raw.to_vec()));
        }
    }

    fn opus() -> RtpCodec {
        RtpCodec {
            kind: MediaKind::Audio,
            mime_type: "audio/opus".into(),
            preferred_payload_type: None,
            clock_rate: 48_000,
            channels: Some(2),
            parameters: BTreeMap::new(),
            rtcp_feedback: Vec::new(),
        }
    }

    fn room() -> Room {
        Room::new(1, vec![opus()], false).unwrap()
    }

    fn peer_caps(room: &Room) -> RtpCapabilities {
        room.capabilities().clone()
    }

    fn receiver_params(ssrc: u32) -> RtpParameters {
        RtpParameters {
            codecs: vec![RtpCodecParameters {
                mime_type: "audio/opus".into(),
                payload_type: 96,
                clock_rate: 48_000,
                channels: Some(2),
                parameters: BTreeMap::new(),
                rtcp_feedback: Vec::new(),
            }],
            encodings: vec![RtpEncoding {
                ssrc: Some(ssrc),
                codec_payload_type: Some(96),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn rtp_bytes(ssrc: u32, seq: u16) -> Vec<u8> {
        let mut buf = vec![
            0x80, 0x60, 0, 0, 0x00, 0x00, 0x00, 0x64, 0, 0, 0, 0, 0xde, 0xad,
        ];
        buf[2..4].copy_from_slice(&seq.to_be_bytes());
        buf[8..12].copy_from_slice(&ssrc.to_be_bytes());
        buf
    }

    /// Room with peers 1, 2, 3 (capabilities set), peer 1 announcing
    /// receiver 10 with SSRC 0xaaa. Returns the shared sink logs.
    fn fanned_out_room() -> (Room, Notifier, Log, Log) {
        let mut room = room();
        let mut notifier = Notifier::new();
        let rtp: Log = Rc::new(RefCell::new(Vec::new()));
        let rtcp: Log = Rc::new(RefCell::new(Vec::new()));

        for peer_id in [1, 2, 3] {
            room.add_peer(peer_id, &mut notifier).unwrap();
            let caps = peer_caps(&room);
            room.set_peer_capabilities(peer_id, caps, &mut notifier)
                .unwrap();

            let transport = Transport::with_sink(
                peer_id * 100,
                Box::new(TaggedSink {
                    tag: peer_id,
                    rtp: rtp.clone(),
                    rtcp: rtcp.clone(),
                }),
            );
            room.peer_mut(peer_id)
                .unwrap()
                .create_transport(transport)
                .unwrap();
        }

        room.peer_mut(1)
            .unwrap()
            .create_receiver(10, MediaKind::Audio)
            .unwrap();
        room.peer_mut(1)
            .unwrap()
            .receiver_mut(10)
            .unwrap()
            .set_transport(100);
        room.set_receiver_parameters(1, 10, receiver_params(0xaaa), &mut notifier)
            .unwrap();

        // Bind every mirrored sender to its peer's transport.
        let mirroring = room.receiver_senders.get(&10).cloned().unwrap();
        for (peer_id, sender_id) in mirroring {
            room.peer_mut(peer_id)
                .unwrap()
                .sender_mut(sender_id)
                .unwrap()
                .set_transport(peer_id * 100);
        }

        (room, notifier, rtp, rtcp)
    }

    #[test]
    fn duplicate_peer_is_rejected() {
        let mut room = room();
        let mut notifier = Notifier::new();

        room.add_peer(1, &mut notifier).unwrap();
        let err = room.add_peer(1, &mut notifier).unwrap_err();
        assert_eq!(err.to_string(), "peer already exists");
    }

    #[test]
    fn receiver_fans_out_to_other_peers_in_insertion_order() {
        let (mut room, mut notifier, rtp, _) = fanned_out_room();

        // One sender mirroring receiver 10 appeared on peers 2 and 3, in
        // peer insertion order, each mapping back to the receiver.
        let mirroring = room.receiver_senders.get(&10).unwrap().clone();
        let peers: Vec<u32> = mirroring.iter().map(|(p, _)| *p).collect();
        assert_eq!(peers, vec![2, 3]);
        room.assert_map_symmetry();

        assert!(room.peer(1).unwrap().senders.is_empty());

        let buf = rtp_bytes(0xaaa, 1);
        let packet = RtpPacket::parse(&buf).unwrap();
        room.receive_packet(1, 10, &packet);

        let log = rtp.borrow();
        let tags: Vec<u32> = log.iter().map(|(t, _)| *t).collect();
        assert_eq!(tags, vec![2, 3]);
        assert_eq!(log[0].1, buf);
        drop(log);

        // Packets with an SSRC unknown to the receiver are dropped silently.
        rtp.borrow_mut().clear();
        let stray = rtp_bytes(0xbbb, 2);
        room.receive_packet(1, 10, &RtpPacket::parse(&stray).unwrap());
        assert!(rtp.borrow().is_empty());

        let _ = notifier.drain();
    }

    #[test]
    fn closing_receiver_closes_its_senders() {
        let (mut room, mut notifier, rtp, _) = fanned_out_room();

        let mirroring = room.receiver_senders.get(&10).unwrap().clone();
        let _ = notifier.drain();

        room.close_receiver(1, 10, &mut notifier);

        // Every bipartite entry referring to the receiver or its senders is
        // gone, and the senders left their peers.
        assert!(!room.map_mentions(10));
        for (peer_id, sender_id) in &mirroring {
            assert!(!room.map_mentions(*sender_id));
            assert!(room.peer(*peer_id).unwrap().senders.is_empty());
        }
        room.assert_map_symmetry();

        // One close notification per sender plus one for the receiver.
        let events = notifier.drain();
        assert_eq!(events.iter().filter(|n| n.event == "close").count(), 3);

        // Delivering to the closed receiver is a no-op, not a dangling
        // access.
        let buf = rtp_bytes(0xaaa, 2);
        room.receive_packet(1, 10, &RtpPacket::parse(&buf).unwrap());
        assert!(rtp.borrow().is_empty());
    }

    #[test]
    fn closing_subscriber_peer_cleans_the_maps() {
        let (mut room, mut notifier, _, _) = fanned_out_room();

        let mirroring = room.receiver_senders.get(&10).unwrap().clone();
        let (_, sender_on_2) = mirroring[0];

        room.close_peer(2, &mut notifier);

        assert!(room.peer(2).is_none());
        assert!(!room.map_mentions(sender_on_2));
        room.assert_map_symmetry();

        // The receiver keeps its remaining subscriber.
        let peers: Vec<u32> = room
            .receiver_senders
            .get(&10)
            .unwrap()
            .iter()
            .map(|(p, _)| *p)
            .collect();
        assert_eq!(peers, vec![3]);
    }

    #[test]
    fn closing_producer_peer_cleans_the_maps() {
        let (mut room, mut notifier, _, _) = fanned_out_room();

        room.close_peer(1, &mut notifier);

        assert!(room.peer(1).is_none());
        assert!(!room.map_mentions(10));
        assert!(room.receiver_senders.is_empty());
        assert!(room.sender_receiver.is_empty());
        assert!(room.peer(2).unwrap().senders.is_empty());
        assert!(room.peer(3).unwrap().senders.is_empty());
    }

    #[test]
    fn late_joiner_mirrors_existing_receivers() {
        let (mut room, mut notifier, rtp, _) = fanned_out_room();

        room.add_peer(4, &mut notifier).unwrap();
        let caps = peer_caps(&room);
        room.set_peer_capabilities(4, caps, &mut notifier).unwrap();

        let peers: Vec<u32> = room
            .receiver_senders
            .get(&10)
            .unwrap()
            .iter()
            .map(|(p, _)| *p)
            .collect();
        assert_eq!(peers, vec![2, 3, 4]);
        room.assert_map_symmetry();

        // The late sender has no transport yet: the packet still reaches
        // the two bound ones.
        let buf = rtp_bytes(0xaaa, 1);
        room.receive_packet(1, 10, &RtpPacket::parse(&buf).unwrap());
        assert_eq!(rtp.borrow().len(), 2);
    }

    #[test]
    fn sender_without_capabilities_stays_unavailable() {
        let mut room = room();
        let mut notifier = Notifier::new();

        room.add_peer(1, &mut notifier).unwrap();
        let caps = peer_caps(&room);
        room.set_peer_capabilities(1, caps, &mut notifier).unwrap();
        // Peer 2 never announces capabilities.
        room.add_peer(2, &mut notifier).unwrap();

        room.peer_mut(1)
            .unwrap()
            .create_receiver(10, MediaKind::Audio)
            .unwrap();
        room.set_receiver_parameters(1, 10, receiver_params(0xaaa), &mut notifier)
            .unwrap();

        let (_, sender_id) = room.receiver_senders.get(&10).unwrap()[0];
        let sender = room.peer(2).unwrap().sender(sender_id).unwrap();
        assert!(!sender.is_available());
    }

    #[test]
    fn room_marked_for_collection_closes_when_empty() {
        let mut room = Room::new(9, vec![opus()], true).unwrap();
        let mut notifier = Notifier::new();

        room.add_peer(1, &mut notifier).unwrap();
        let _ = notifier.drain();

        assert!(room.close_peer(1, &mut notifier));
        assert!(room.is_closed());

        let events = notifier.drain();
        assert!(events
            .iter()
            .any(|n| n.event == "close" && n.target_id == 9));
    }

    #[test]
    fn nack_is_served_through_the_subscriber_transport() {
        let (mut room, _, rtp, _) = fanned_out_room();

        for seq in 1..=3 {
            let buf = rtp_bytes(0xaaa, seq);
            room.receive_packet(1, 10, &RtpPacket::parse(&buf).unwrap());
        }
        rtp.borrow_mut().clear();

        // Peer 2 missed seq 2.
        let nack = RtcpPacket::RtpFeedback(rtp::RtpFeedback {
            fmt: rtp::TransportFeedbackType::Nack,
            sender_ssrc: 0.into(),
            media_ssrc: 0xaaa.into(),
            fci: vec![0, 2, 0, 0],
        });
        room.receive_rtcp(2, &[nack]);

        let log = rtp.borrow();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, 2);
        assert_eq!(log[0].1, rtp_bytes(0xaaa, 2));
    }

    #[test]
    fn pli_is_forwarded_to_the_producing_peer() {
        let (mut room, _, _, rtcp) = fanned_out_room();

        let pli = RtcpPacket::PsFeedback(rtp::PsFeedback {
            fmt: rtp::PayloadFeedbackType::PictureLossIndication,
            sender_ssrc: 0.into(),
            media_ssrc: 0xaaa.into(),
            fci: vec![],
        });
        room.receive_rtcp(3, &[pli.clone()]);

        let log = rtcp.borrow();
        assert_eq!(log.len(), 1);
        // Forwarded out the producer's (peer 1) transport, byte for byte.
        assert_eq!(log[0].0, 1);
        assert_eq!(rtp::parse_single(&log[0].1).unwrap(), pli);
    }

    #[test]
    fn receiver_reports_land_on_the_sender() {
        let (mut room, _, _, _) = fanned_out_room();

        let rr = RtcpPacket::ReceiverReport(rtp::ReceiverReport {
            sender_ssrc: 5.into(),
            reports: vec![rtp::ReceptionReport {
                ssrc: 0xaaa.into(),
                fraction_lost: 17,
                packets_lost: 3,
                max_seq: 100,
                jitter: 2,
                last_sr_time: 0,
                last_sr_delay: 0,
            }],
        });
        room.receive_rtcp(2, &[rr]);

        let (_, sender_id) = room.receiver_senders.get(&10).unwrap()[0];
        let dump = room.peer(2).unwrap().sender(sender_id).unwrap().dump();
        assert_eq!(dump["stats"]["lastFractionLost"], 17);
    }
}
