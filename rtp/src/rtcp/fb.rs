use crate::bytes::{pad_to_4, read_u16, read_u32, write_u32};
use crate::Ssrc;

use super::{FeedbackMessageType, PayloadFeedbackType, RtcpHeader, RtcpType, TransportFeedbackType};

/// Transport layer feedback (PT=205), RFC 4585. The FMT field of the common
/// header selects the message type; the FCI is kept as an opaque slice with
/// typed accessors for the well-known types. Unknown types parse fine and are
/// tagged [`TransportFeedbackType::Unknown`] so callers may log and forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpFeedback {
    pub fmt: TransportFeedbackType,
    pub sender_ssrc: Ssrc,
    pub media_ssrc: Ssrc,
    pub fci: Vec<u8>,
}

/// One NACK item: a packet id and a bitmask of the 16 following packets.
///
/// https://www.rfc-editor.org/rfc/rfc4585#section-6.2.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackEntry {
    pub pid: u16,
    pub blp: u16,
}

impl NackEntry {
    /// All sequence numbers this entry asks for: the pid plus one per bit
    /// set in the bitmask.
    pub fn sequence_numbers(&self) -> impl Iterator<Item = u16> + '_ {
        let pid = self.pid;
        let blp = self.blp;
        std::iter::once(pid).chain(
            (0..16_u16)
                .filter(move |i| blp & (1 << i) != 0)
                .map(move |i| pid.wrapping_add(i + 1)),
        )
    }
}

impl RtpFeedback {
    pub(crate) fn parse(header: &RtcpHeader, buf: &[u8]) -> Option<RtpFeedback> {
        let FeedbackMessageType::TransportFeedback(fmt) = header.fmt else {
            return None;
        };

        if buf.len() < 8 {
            warn!("Truncated transport layer feedback, packet discarded");
            return None;
        }

        Some(RtpFeedback {
            fmt,
            sender_ssrc: read_u32(buf, 0).into(),
            media_ssrc: read_u32(buf, 4).into(),
            fci: buf[8..].to_vec(),
        })
    }

    /// The NACK items when this is a NACK message, empty otherwise.
    pub fn nacks(&self) -> Vec<NackEntry> {
        if self.fmt != TransportFeedbackType::Nack {
            return Vec::new();
        }

        self.fci
            .chunks_exact(4)
            .map(|c| NackEntry {
                pid: read_u16(c, 0),
                blp: read_u16(c, 2),
            })
            .collect()
    }

    pub(crate) fn header(&self) -> RtcpHeader {
        RtcpHeader {
            has_padding: false,
            fmt: FeedbackMessageType::TransportFeedback(self.fmt),
            rtcp_type: RtcpType::TransportLayerFeedback,
            length: self.length_words() * 4,
        }
    }

    pub(crate) fn length_words(&self) -> usize {
        3 + pad_to_4(self.fci.len()) / 4
    }

    pub(crate) fn write_to(&self, buf: &mut [u8]) -> usize {
        self.header().write_to(buf);
        write_u32(buf, 4, *self.sender_ssrc);
        write_u32(buf, 8, *self.media_ssrc);
        buf[12..12 + self.fci.len()].copy_from_slice(&self.fci);
        12 + pad_to_4(self.fci.len())
    }
}

/// Payload specific feedback (PT=206), RFC 4585. Same opaque-FCI treatment
/// as [`RtpFeedback`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsFeedback {
    pub fmt: PayloadFeedbackType,
    pub sender_ssrc: Ssrc,
    pub media_ssrc: Ssrc,
    pub fci: Vec<u8>,
}

/// One SLI item, RFC 4585 section 6.3.2: 13 bit first macroblock, 13 bit
/// count, 6 bit picture id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliEntry {
    pub first: u16,
    pub number: u16,
    pub picture_id: u8,
}

impl PsFeedback {
    pub(crate) fn parse(header: &RtcpHeader, buf: &[u8]) -> Option<PsFeedback> {
        let FeedbackMessageType::PayloadFeedback(fmt) = header.fmt else {
            return None;
        };

        if buf.len() < 8 {
            warn!("Truncated payload specific feedback, packet discarded");
            return None;
        }

        Some(PsFeedback {
            fmt,
            sender_ssrc: read_u32(buf, 0).into(),
            media_ssrc: read_u32(buf, 4).into(),
            fci: buf[8..].to_vec(),
        })
    }

    pub fn is_pli(&self) -> bool {
        self.fmt == PayloadFeedbackType::PictureLossIndication
    }

    /// The SLI items when this is an SLI message, empty otherwise.
    pub fn slis(&self) -> Vec<SliEntry> {
        if self.fmt != PayloadFeedbackType::SliceLossIndication {
            return Vec::new();
        }

        self.fci
            .chunks_exact(4)
            .map(|c| {
                let word = read_u32(c, 0);
                SliEntry {
                    first: (word >> 19) as u16,
                    number: ((word >> 6) & 0x1fff) as u16,
                    picture_id: (word & 0x3f) as u8,
                }
            })
            .collect()
    }

    pub(crate) fn header(&self) -> RtcpHeader {
        RtcpHeader {
            has_padding: false,
            fmt: FeedbackMessageType::PayloadFeedback(self.fmt),
            rtcp_type: RtcpType::PayloadSpecificFeedback,
            length: self.length_words() * 4,
        }
    }

    pub(crate) fn length_words(&self) -> usize {
        3 + pad_to_4(self.fci.len()) / 4
    }

    pub(crate) fn write_to(&self, buf: &mut [u8]) -> usize {
        self.header().write_to(buf);
        write_u32(buf, 4, *self.sender_ssrc);
        write_u32(buf, 8, *self.media_ssrc);
        buf[12..12 + self.fci.len()].copy_from_slice(&self.fci);
        12 + pad_to_4(self.fci.len())
    }
}
