//! One conference participant.

use serde_json::{json, Value};

use rtp::RtpPacket;

use crate::dictionaries::{MediaKind, RtpCapabilities};
use crate::error::RequestError;
use crate::receiver::RtpReceiver;
use crate::sender::RtpSender;
use crate::transport::{PacketSink, Transport};

/// A peer owns its receivers, senders and transports. All routing between
/// peers goes through the room; the peer never reaches into another peer.
pub struct Peer {
    id: u32,
    capabilities: Option<RtpCapabilities>,
    pub(crate) receivers: Vec<RtpReceiver>,
    pub(crate) senders: Vec<RtpSender>,
    pub(crate) transports: Vec<Transport>,
    closed: bool,
}

impl Peer {
    pub fn new(id: u32) -> Self {
        Peer {
            id,
            capabilities: None,
            receivers: Vec::new(),
            senders: Vec::new(),
            transports: Vec::new(),
            closed: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn capabilities(&self) -> Option<&RtpCapabilities> {
        self.capabilities.as_ref()
    }

    /// Install the peer's capabilities: a one time operation, and they must
    /// be a subset of the room's.
    pub fn set_capabilities(
        &mut self,
        caps: RtpCapabilities,
        room_caps: &RtpCapabilities,
    ) -> Result<(), RequestError> {
        if self.capabilities.is_some() {
            return Err(RequestError::other("peer capabilities already set"));
        }
        caps.ensure_subset_of(room_caps)?;
        self.capabilities = Some(caps);
        Ok(())
    }

    pub fn create_transport(&mut self, transport: Transport) -> Result<(), RequestError> {
        if self.transport(transport.id()).is_some() {
            return Err(RequestError::other("transport already exists"));
        }
        self.transports.push(transport);
        Ok(())
    }

    pub fn create_receiver(&mut self, id: u32, kind: MediaKind) -> Result<(), RequestError> {
        if self.capabilities.is_none() {
            return Err(RequestError::other("peer capabilities are not yet set"));
        }
        if self.receiver(id).is_some() {
            return Err(RequestError::other("receiver already exists"));
        }
        self.receivers.push(RtpReceiver::new(id, kind));
        Ok(())
    }

    pub fn receiver(&self, id: u32) -> Option<&RtpReceiver> {
        self.receivers.iter().find(|r| r.id() == id)
    }

    pub fn receiver_mut(&mut self, id: u32) -> Option<&mut RtpReceiver> {
        self.receivers.iter_mut().find(|r| r.id() == id)
    }

    pub fn sender(&self, id: u32) -> Option<&RtpSender> {
        self.senders.iter().find(|s| s.id() == id)
    }

    pub fn sender_mut(&mut self, id: u32) -> Option<&mut RtpSender> {
        self.senders.iter_mut().find(|s| s.id() == id)
    }

    pub fn transport(&self, id: u32) -> Option<&Transport> {
        self.transports.iter().find(|t| t.id() == id)
    }

    pub fn transport_mut(&mut self, id: u32) -> Option<&mut Transport> {
        self.transports.iter_mut().find(|t| t.id() == id)
    }

    pub(crate) fn remove_receiver(&mut self, id: u32) {
        self.receivers.retain(|r| r.id() != id);
    }

    pub(crate) fn remove_sender(&mut self, id: u32) {
        self.senders.retain(|s| s.id() != id);
    }

    /// Forward a packet through one of this peer's senders, routing it to
    /// the sender's transport when one is attached.
    pub(crate) fn send_through(&mut self, sender_id: u32, packet: &RtpPacket) {
        let Some(sender) = self.senders.iter_mut().find(|s| s.id() == sender_id) else {
            return;
        };

        let sink = sender
            .transport_id()
            .and_then(|tid| self.transports.iter_mut().find(|t| t.id() == tid))
            .filter(|t| !t.is_closed())
            .map(|t| t.sink());

        sender.send(packet, sink);
    }

    /// Service a NACK addressed at whichever of this peer's senders handles
    /// `media_ssrc`. Returns false when no sender does.
    pub(crate) fn nack_through(
        &mut self,
        media_ssrc: u32,
        nacks: &[rtp::NackEntry],
        scratch: &mut Vec<u16>,
    ) -> bool {
        let Some(sender) = self.senders.iter_mut().find(|s| s.handles_ssrc(media_ssrc)) else {
            return false;
        };

        let sink = sender
            .transport_id()
            .and_then(|tid| self.transports.iter_mut().find(|t| t.id() == tid))
            .filter(|t| !t.is_closed())
            .map(|t| t.sink());

        sender.receive_nack(nacks, scratch, sink);
        true
    }

    /// The sink of the transport a receiver is bound to, for sending RTCP
    /// back towards the media source.
    pub(crate) fn receiver_rtcp_sink(&mut self, receiver_id: u32) -> Option<&mut dyn PacketSink> {
        let tid = self
            .receivers
            .iter()
            .find(|r| r.id() == receiver_id)?
            .transport_id()?;
        self.transports
            .iter_mut()
            .find(|t| t.id() == tid)
            .filter(|t| !t.is_closed())
            .map(|t| t.sink())
    }

    /// Mark the peer itself closed. The room drives closing of the owned
    /// entities first, because their teardown touches the routing maps.
    pub(crate) fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        true
    }

    pub fn dump(&self) -> Value {
        json!({
            "peerId": self.id,
            "capabilities": self.capabilities,
            "rtpReceivers": self.receivers.iter().map(|r| r.dump()).collect::<Vec<_>>(),
            "rtpSenders": self.senders.iter().map(|s| s.dump()).collect::<Vec<_>>(),
            "transports": self.transports.iter().map(|t| t.dump()).collect::<Vec<_>>(),
        })
    }
}
