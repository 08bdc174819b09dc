//! Compound RTCP parsing and serialization.
//!
//! A compound packet is an ordered sequence of RTCP packets sharing one
//! transport datagram, the first of which must be a sender or receiver
//! report. Parsing is all or nothing: any truncation or impossible length
//! field discards the whole datagram.

use crate::bytes::read_u32;
use crate::Ssrc;

mod header;
pub use header::{FeedbackMessageType, RtcpHeader, RtcpType};
pub use header::{PayloadFeedbackType, TransportFeedbackType};

mod sr;
pub use sr::{SenderInfo, SenderReport};

mod rr;
pub use rr::{ReceptionReport, ReceiverReport};

mod sdes;
pub use sdes::{Descriptions, Sdes, SdesType};

mod bye;
pub use bye::Goodbye;

mod fb;
pub use fb::{NackEntry, PsFeedback, RtpFeedback, SliEntry};

#[cfg(test)]
mod test;

/// One RTCP packet of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport(SenderReport),
    ReceiverReport(ReceiverReport),
    Descriptions(Descriptions),
    Goodbye(Goodbye),
    App(App),
    PsFeedback(PsFeedback),
    RtpFeedback(RtpFeedback),
}

/// Application defined packet (PT=204): subtype, SSRC, four ASCII name bytes
/// and opaque application data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct App {
    pub subtype: u8,
    pub ssrc: Ssrc,
    pub name: [u8; 4],
    pub data: Vec<u8>,
}

impl App {
    fn parse(header: &RtcpHeader, buf: &[u8]) -> Option<App> {
        let FeedbackMessageType::Subtype(subtype) = header.fmt else {
            return None;
        };

        if buf.len() < 8 {
            warn!("Truncated APP packet, packet discarded");
            return None;
        }

        Some(App {
            subtype,
            ssrc: read_u32(buf, 0).into(),
            name: [buf[4], buf[5], buf[6], buf[7]],
            data: buf[8..].to_vec(),
        })
    }

    fn header(&self) -> RtcpHeader {
        RtcpHeader {
            has_padding: false,
            fmt: FeedbackMessageType::Subtype(self.subtype),
            rtcp_type: RtcpType::ApplicationDefined,
            length: self.length_words() * 4,
        }
    }

    fn length_words(&self) -> usize {
        3 + crate::pad_to_4(self.data.len()) / 4
    }

    fn write_to(&self, buf: &mut [u8]) -> usize {
        self.header().write_to(buf);
        crate::write_u32(buf, 4, *self.ssrc);
        buf[8..12].copy_from_slice(&self.name);
        buf[12..12 + self.data.len()].copy_from_slice(&self.data);
        12 + crate::pad_to_4(self.data.len())
    }
}

impl RtcpPacket {
    pub fn length_words(&self) -> usize {
        use RtcpPacket::*;
        match self {
            SenderReport(v) => v.length_words(),
            ReceiverReport(v) => v.length_words(),
            Descriptions(v) => v.length_words(),
            Goodbye(v) => v.length_words(),
            App(v) => v.length_words(),
            PsFeedback(v) => v.length_words(),
            RtpFeedback(v) => v.length_words(),
        }
    }

    pub fn header(&self) -> RtcpHeader {
        use RtcpPacket::*;
        match self {
            SenderReport(v) => v.header(),
            ReceiverReport(v) => v.header(),
            Descriptions(v) => v.header(),
            Goodbye(v) => v.header(),
            App(v) => v.header(),
            PsFeedback(v) => v.header(),
            RtpFeedback(v) => v.header(),
        }
    }

    /// Write this packet, header included, into `buf`. Returns the number of
    /// bytes written, always a multiple of 4.
    pub fn write_to(&self, buf: &mut [u8]) -> usize {
        use RtcpPacket::*;
        match self {
            SenderReport(v) => v.write_to(buf),
            ReceiverReport(v) => v.write_to(buf),
            Descriptions(v) => v.write_to(buf),
            Goodbye(v) => v.write_to(buf),
            App(v) => v.write_to(buf),
            PsFeedback(v) => v.write_to(buf),
            RtpFeedback(v) => v.write_to(buf),
        }
    }

}

/// Parse a compound RTCP datagram. `None` means the whole datagram is
/// discarded; partial results are never exposed.
pub fn parse_compound(buf: &[u8]) -> Option<Vec<RtcpPacket>> {
    let mut packets = Vec::new();
    let mut offset = 0;

    while offset < buf.len() {
        let remaining = &buf[offset..];
        let header = RtcpHeader::parse(remaining)?;

        if offset == 0
            && !matches!(
                header.rtcp_type,
                RtcpType::SenderReport | RtcpType::ReceiverReport
            )
        {
            warn!("Compound RTCP does not start with a sender or receiver report, discarded");
            return None;
        }

        if header.length > remaining.len() {
            warn!(
                "RTCP packet length {} exceeds datagram, compound discarded",
                header.length
            );
            return None;
        }

        let span = &remaining[..header.length];
        let mut body = &span[4..];

        if header.has_padding {
            if body.is_empty() {
                warn!("RTCP padding bit set on empty packet, compound discarded");
                return None;
            }
            let pad = span[span.len() - 1] as usize;
            if pad == 0 || pad > body.len() {
                warn!("Impossible RTCP padding {}, compound discarded", pad);
                return None;
            }
            body = &body[..body.len() - pad];
        }

        use RtcpType::*;
        let packet = match header.rtcp_type {
            SenderReport => RtcpPacket::SenderReport(sr::SenderReport::parse(&header, body)?),
            ReceiverReport => {
                RtcpPacket::ReceiverReport(rr::ReceiverReport::parse(&header, body)?)
            }
            SourceDescription => {
                RtcpPacket::Descriptions(sdes::Descriptions::parse(&header, body)?)
            }
            Goodbye => RtcpPacket::Goodbye(bye::Goodbye::parse(&header, body)?),
            ApplicationDefined => RtcpPacket::App(App::parse(&header, body)?),
            TransportLayerFeedback => RtcpPacket::RtpFeedback(fb::RtpFeedback::parse(&header, body)?),
            PayloadSpecificFeedback => RtcpPacket::PsFeedback(fb::PsFeedback::parse(&header, body)?),
            ExtendedReport => {
                trace!("Ignoring RTCP XR packet");
                offset += header.length;
                continue;
            }
        };

        packets.push(packet);
        offset += header.length;
    }

    if packets.is_empty() {
        return None;
    }

    Some(packets)
}

/// Serialize packets into one compound datagram, in the order given. Each
/// member 4-byte-aligns itself.
pub fn serialize_compound(packets: &[RtcpPacket]) -> Vec<u8> {
    let total = packets.iter().map(|p| p.length_words() * 4).sum();
    let mut buf = vec![0_u8; total];

    let mut offset = 0;
    for packet in packets {
        let n = packet.write_to(&mut buf[offset..]);
        debug_assert_eq!(n, packet.length_words() * 4);
        offset += n;
    }

    buf
}

/// Parse a single RTCP packet that is not part of a compound datagram, e.g.
/// reduced-size feedback. The first-must-be-a-report rule does not apply.
pub fn parse_single(buf: &[u8]) -> Option<RtcpPacket> {
    let header = RtcpHeader::parse(buf)?;

    if header.length > buf.len() {
        warn!(
            "RTCP packet length {} exceeds buffer, packet discarded",
            header.length
        );
        return None;
    }

    let span = &buf[..header.length];
    let mut body = &span[4..];

    if header.has_padding {
        if body.is_empty() {
            warn!("RTCP padding bit set on empty packet, packet discarded");
            return None;
        }
        let pad = span[span.len() - 1] as usize;
        if pad == 0 || pad > body.len() {
            warn!("Impossible RTCP padding {}, packet discarded", pad);
            return None;
        }
        body = &body[..body.len() - pad];
    }

    use RtcpType::*;
    let packet = match header.rtcp_type {
        SenderReport => RtcpPacket::SenderReport(sr::SenderReport::parse(&header, body)?),
        ReceiverReport => RtcpPacket::ReceiverReport(rr::ReceiverReport::parse(&header, body)?),
        SourceDescription => RtcpPacket::Descriptions(sdes::Descriptions::parse(&header, body)?),
        Goodbye => RtcpPacket::Goodbye(bye::Goodbye::parse(&header, body)?),
        ApplicationDefined => RtcpPacket::App(App::parse(&header, body)?),
        TransportLayerFeedback => RtcpPacket::RtpFeedback(fb::RtpFeedback::parse(&header, body)?),
        PayloadSpecificFeedback => RtcpPacket::PsFeedback(fb::PsFeedback::parse(&header, body)?),
        ExtendedReport => return None,
    };

    Some(packet)
}
