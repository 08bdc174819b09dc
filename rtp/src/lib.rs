#[macro_use]
extern crate tracing;

mod bytes;
pub use bytes::{pad_to_4, read_u16, read_u24, read_u32, read_u8};
pub use bytes::{write_u16, write_u24, write_u32, write_u8};

mod id;
pub use id::{Pt, SeqNo, Ssrc};

mod packet;
pub use packet::{extend_seq, RtpExtension, RtpPacket};

mod rtcp;
pub use rtcp::{parse_compound, parse_single, serialize_compound, RtcpPacket};
pub use rtcp::{App, FeedbackMessageType, RtcpHeader, RtcpType};
pub use rtcp::{Descriptions, Sdes, SdesType};
pub use rtcp::{Goodbye, ReceptionReport, ReceiverReport, SenderInfo, SenderReport};
pub use rtcp::{
    NackEntry, PayloadFeedbackType, PsFeedback, RtpFeedback, SliEntry, TransportFeedbackType,
};
