//! Single threaded SFU media worker.
//!
//! The worker terminates RTP/RTCP from conference participants and forwards
//! every ingress stream to the peers subscribed to it. It is driven entirely
//! by an out of process supervisor over a netstring framed channel inherited
//! as two file descriptors.
//!
//! Everything runs cooperatively on one event loop. No entity mutates state
//! owned by another outside a call explicitly made by the owner; the room is
//! the only place that touches the receiver/sender routing maps.

#[macro_use]
extern crate tracing;

pub mod channel;
pub mod dictionaries;
pub mod error;
pub mod peer;
pub mod receiver;
pub mod room;
pub mod sender;
pub mod settings;
pub mod transport;
pub mod worker;

pub use error::{ChannelError, RequestError};
pub use settings::Settings;
pub use worker::Worker;
