//! The transport entity. ICE/DTLS/SRTP live in an external collaborator
//! behind [`PacketSink`]; this entity holds what the control channel can see
//! of it.

use serde_json::{json, Value};

use crate::error::RequestError;

/// Where egress packets go. The real implementation encrypts and writes to a
/// socket; tests record.
pub trait PacketSink {
    fn send_rtp(&mut self, raw: &[u8]);
    fn send_rtcp(&mut self, raw: &[u8]);
}

/// Sink used until a real transport collaborator is attached.
pub struct DiscardSink;

impl PacketSink for DiscardSink {
    fn send_rtp(&mut self, raw: &[u8]) {
        trace!("No transport attached, dropping {} byte RTP packet", raw.len());
    }

    fn send_rtcp(&mut self, raw: &[u8]) {
        trace!("No transport attached, dropping {} byte RTCP packet", raw.len());
    }
}

pub struct Transport {
    id: u32,
    sink: Box<dyn PacketSink>,
    remote_dtls_parameters: Option<Value>,
    closed: bool,
}

impl Transport {
    pub fn new(id: u32) -> Self {
        Transport::with_sink(id, Box::new(DiscardSink))
    }

    pub fn with_sink(id: u32, sink: Box<dyn PacketSink>) -> Self {
        Transport {
            id,
            sink,
            remote_dtls_parameters: None,
            closed: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn sink(&mut self) -> &mut dyn PacketSink {
        &mut *self.sink
    }

    /// Store the remote end's DTLS parameters for the collaborator to pick
    /// up. The handshake itself is not this entity's business.
    pub fn set_remote_dtls_parameters(&mut self, params: Value) -> Result<(), RequestError> {
        if self.closed {
            return Err(RequestError::other("transport closed"));
        }
        self.remote_dtls_parameters = Some(params);
        Ok(())
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
            "transportId": self.id,
            "closed": self.closed,
            "remoteDtlsParameters": self.remote_dtls_parameters,
        })
    }
}
