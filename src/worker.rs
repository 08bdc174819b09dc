//! Request dispatch: the worker owns the rooms and routes every control
//! request to the entity its routing path addresses.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing_subscriber::reload;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Registry;

use crate::channel::{Internal, Notifier, Request};
use crate::dictionaries::{MediaKind, RtpCapabilities, RtpCodec, RtpParameters};
use crate::error::RequestError;
use crate::room::Room;
use crate::transport::Transport;

/// Handle to swap the log filter at runtime via `worker.updateSettings`.
pub type LogReloadHandle = reload::Handle<EnvFilter, Registry>;

#[derive(Default)]
pub struct Worker {
    rooms: Vec<Room>,
    log_handle: Option<LogReloadHandle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRouterData {
    #[serde(default)]
    media_codecs: Vec<RtpCodec>,
    #[serde(default)]
    close_when_empty: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateReceiverData {
    kind: MediaKind,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateSettingsData {
    log_level: Option<String>,
}

impl Worker {
    pub fn new() -> Self {
        Worker::default()
    }

    pub fn with_log_handle(handle: LogReloadHandle) -> Self {
        Worker {
            rooms: Vec::new(),
            log_handle: Some(handle),
        }
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    /// Handle one request, returning the accepted data or the rejection
    /// reason. Exactly one response per request goes back to the supervisor.
    pub fn handle_request(
        &mut self,
        request: &Request,
        notifier: &mut Notifier,
    ) -> Result<Value, RequestError> {
        match request.method.as_str() {
            "worker.dump" => Ok(json!({
                "rooms": self.rooms.iter().map(|r| r.dump()).collect::<Vec<_>>(),
            })),

            "worker.updateSettings" => {
                let data: UpdateSettingsData = parse_data(&request.data)?;
                if let Some(level) = data.log_level {
                    let filter = EnvFilter::try_new(&level)
                        .map_err(|_| RequestError::other(format!("invalid log level: {}", level)))?;
                    if let Some(handle) = &self.log_handle {
                        if handle.reload(filter).is_err() {
                            return Err(RequestError::Internal);
                        }
                    }
                    info!("Log level set to {}", level);
                }
                Ok(Value::Null)
            }

            "worker.createRouter" => {
                let room_id = require(request.internal.room_id, "roomId")?;
                if self.room(room_id).is_some() {
                    return Err(RequestError::other("room already exists"));
                }
                let data: CreateRouterData = parse_data(&request.data)?;
                let room = Room::new(room_id, data.media_codecs, data.close_when_empty)?;
                self.rooms.push(room);
                info!("Room {} created", room_id);
                Ok(Value::Null)
            }

            "router.close" => {
                let room = self.room_mut(&request.internal)?;
                let room_id = room.id();
                room.close(notifier);
                self.rooms.retain(|r| r.id() != room_id);
                Ok(Value::Null)
            }

            "router.dump" => Ok(self.room_mut(&request.internal)?.dump()),

            "router.createPeer" => {
                let peer_id = require(request.internal.peer_id, "peerId")?;
                let room = self.room_mut(&request.internal)?;
                room.add_peer(peer_id, notifier)?;
                Ok(Value::Null)
            }

            "peer.close" => {
                let peer_id = require(request.internal.peer_id, "peerId")?;
                let room = self.room_mut(&request.internal)?;
                let room_id = room.id();
                if room.peer(peer_id).is_none() {
                    return Err(RequestError::other("peer not found"));
                }
                let room_closed = room.close_peer(peer_id, notifier);
                if room_closed {
                    self.rooms.retain(|r| r.id() != room_id);
                }
                Ok(Value::Null)
            }

            "peer.dump" => Ok(self.peer_entity(&request.internal)?.dump()),

            "peer.setCapabilities" => {
                let peer_id = require(request.internal.peer_id, "peerId")?;
                let caps: RtpCapabilities = parse_data(&request.data)?;
                let room = self.room_mut(&request.internal)?;
                room.set_peer_capabilities(peer_id, caps, notifier)?;
                Ok(Value::Null)
            }

            "peer.createTransport" => {
                let transport_id = require(request.internal.transport_id, "transportId")?;
                let peer = self.peer_mut(&request.internal)?;
                peer.create_transport(Transport::new(transport_id))?;
                Ok(Value::Null)
            }

            "peer.createRtpReceiver" => {
                let receiver_id = require(request.internal.rtp_receiver_id, "rtpReceiverId")?;
                let data: CreateReceiverData = parse_data(&request.data)?;
                let peer = self.peer_mut(&request.internal)?;
                peer.create_receiver(receiver_id, data.kind)?;
                Ok(Value::Null)
            }

            "transport.close" => {
                let transport_id = require(request.internal.transport_id, "transportId")?;
                let peer = self.peer_mut(&request.internal)?;
                let transport = peer
                    .transport_mut(transport_id)
                    .ok_or_else(|| RequestError::other("transport not found"))?;
                if transport.close() {
                    notifier.emit(transport_id, "close", Value::Null);
                }
                Ok(Value::Null)
            }

            "transport.dump" => {
                let transport_id = require(request.internal.transport_id, "transportId")?;
                let peer = self.peer_mut(&request.internal)?;
                let transport = peer
                    .transport(transport_id)
                    .ok_or_else(|| RequestError::other("transport not found"))?;
                Ok(transport.dump())
            }

            "transport.setRemoteDtlsParameters" => {
                let transport_id = require(request.internal.transport_id, "transportId")?;
                let peer = self.peer_mut(&request.internal)?;
                let transport = peer
                    .transport_mut(transport_id)
                    .ok_or_else(|| RequestError::other("transport not found"))?;
                transport.set_remote_dtls_parameters(request.data.clone())?;
                Ok(Value::Null)
            }

            "rtpReceiver.close" => {
                let peer_id = require(request.internal.peer_id, "peerId")?;
                let receiver_id = require(request.internal.rtp_receiver_id, "rtpReceiverId")?;
                let room = self.room_mut(&request.internal)?;
                if room
                    .peer(peer_id)
                    .and_then(|p| p.receiver(receiver_id))
                    .is_none()
                {
                    return Err(RequestError::other("receiver not found"));
                }
                room.close_receiver(peer_id, receiver_id, notifier);
                Ok(Value::Null)
            }

            "rtpReceiver.dump" => {
                let receiver_id = require(request.internal.rtp_receiver_id, "rtpReceiverId")?;
                let peer = self.peer_mut(&request.internal)?;
                let receiver = peer
                    .receiver(receiver_id)
                    .ok_or_else(|| RequestError::other("receiver not found"))?;
                Ok(receiver.dump())
            }

            "rtpReceiver.receive" => {
                let peer_id = require(request.internal.peer_id, "peerId")?;
                let receiver_id = require(request.internal.rtp_receiver_id, "rtpReceiverId")?;
                let params: RtpParameters = parse_data(&request.data)?;
                let room = self.room_mut(&request.internal)?;
                room.set_receiver_parameters(peer_id, receiver_id, params, notifier)?;
                Ok(Value::Null)
            }

            "rtpReceiver.setTransport" => {
                let receiver_id = require(request.internal.rtp_receiver_id, "rtpReceiverId")?;
                let transport_id = require(request.internal.transport_id, "transportId")?;
                let peer = self.peer_mut(&request.internal)?;
                if peer.transport(transport_id).is_none() {
                    return Err(RequestError::other("transport not found"));
                }
                let receiver = peer
                    .receiver_mut(receiver_id)
                    .ok_or_else(|| RequestError::other("receiver not found"))?;
                receiver.set_transport(transport_id);
                Ok(Value::Null)
            }

            "rtpSender.dump" => {
                let sender_id = require(request.internal.rtp_sender_id, "rtpSenderId")?;
                let peer = self.peer_mut(&request.internal)?;
                let sender = peer
                    .sender(sender_id)
                    .ok_or_else(|| RequestError::other("sender not found"))?;
                Ok(sender.dump())
            }

            "rtpSender.setTransport" => {
                let sender_id = require(request.internal.rtp_sender_id, "rtpSenderId")?;
                let transport_id = require(request.internal.transport_id, "transportId")?;
                let peer = self.peer_mut(&request.internal)?;
                if peer.transport(transport_id).is_none() {
                    return Err(RequestError::other("transport not found"));
                }
                let sender = peer
                    .sender_mut(sender_id)
                    .ok_or_else(|| RequestError::other("sender not found"))?;
                sender.set_transport(transport_id);
                Ok(Value::Null)
            }

            // A method addressing a known entity kind that the worker has
            // no handler for, as opposed to a method naming nothing at all.
            m if m.starts_with("worker.")
                || m.starts_with("router.")
                || m.starts_with("peer.")
                || m.starts_with("transport.")
                || m.starts_with("rtpReceiver.")
                || m.starts_with("rtpSender.") =>
            {
                Err(RequestError::NotImplemented)
            }

            _ => Err(RequestError::MethodNotFound),
        }
    }

    pub fn room(&self, id: u32) -> Option<&Room> {
        self.rooms.iter().find(|r| r.id() == id)
    }

    fn room_mut(&mut self, internal: &Internal) -> Result<&mut Room, RequestError> {
        let id = require(internal.room_id, "roomId")?;
        self.rooms
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or_else(|| RequestError::other("room not found"))
    }

    fn peer_mut(&mut self, internal: &Internal) -> Result<&mut crate::peer::Peer, RequestError> {
        let peer_id = require(internal.peer_id, "peerId")?;
        self.room_mut(internal)?
            .peer_mut(peer_id)
            .ok_or_else(|| RequestError::other("peer not found"))
    }

    fn peer_entity(&mut self, internal: &Internal) -> Result<&crate::peer::Peer, RequestError> {
        self.peer_mut(internal).map(|p| &*p)
    }

    /// Close everything, used on worker shutdown.
    pub fn close(&mut self, notifier: &mut Notifier) {
        for room in self.rooms.iter_mut() {
            room.close(notifier);
        }
        self.rooms.clear();
    }
}

fn require(id: Option<u32>, name: &str) -> Result<u32, RequestError> {
    id.ok_or_else(|| RequestError::other(format!("request has no {}", name)))
}

fn parse_data<T: for<'de> Deserialize<'de>>(data: &Value) -> Result<T, RequestError> {
    // Absent data means an empty object.
    let value = if data.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        data.clone()
    };
    serde_json::from_value(value)
        .map_err(|e| RequestError::other(format!("invalid request data: {}", e)))
}
