use std::str::from_utf8;

use crate::bytes::{pad_to_4, read_u32, write_u32};
use crate::Ssrc;

use super::{FeedbackMessageType, RtcpHeader, RtcpType};

/// Goodbye (PT=203): SSRCs leaving the session, with an optional reason
/// string prefixed by a one byte length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goodbye {
    pub ssrcs: Vec<Ssrc>,
    pub reason: Option<String>,
}

impl Goodbye {
    pub(crate) fn parse(header: &RtcpHeader, buf: &[u8]) -> Option<Goodbye> {
        let count = header.fmt.count() as usize;

        if buf.len() < count * 4 {
            warn!("Not enough space for SSRCs in RTCP Bye, packet discarded");
            return None;
        }

        let ssrcs = (0..count).map(|i| read_u32(buf, i * 4).into()).collect();

        let mut offset = count * 4;
        let mut reason = None;

        // The reason is optional. If the length byte announces more than is
        // actually there, the reason is ignored rather than the packet
        // rejected.
        if buf.len() > offset {
            let len = buf[offset] as usize;
            offset += 1;
            if buf.len() >= offset + len {
                let Ok(text) = from_utf8(&buf[offset..offset + len]) else {
                    warn!("Bye reason is not valid utf-8, packet discarded");
                    return None;
                };
                reason = Some(text.to_string());
            }
        }

        Some(Goodbye { ssrcs, reason })
    }

    pub(crate) fn header(&self) -> RtcpHeader {
        RtcpHeader {
            has_padding: false,
            fmt: FeedbackMessageType::SourceCount(self.ssrcs.len() as u8),
            rtcp_type: RtcpType::Goodbye,
            length: self.length_words() * 4,
        }
    }

    pub(crate) fn length_words(&self) -> usize {
        let reason_bytes = self.reason.as_ref().map(|r| 1 + r.len()).unwrap_or(0);
        1 + self.ssrcs.len() + pad_to_4(reason_bytes) / 4
    }

    pub(crate) fn write_to(&self, buf: &mut [u8]) -> usize {
        self.header().write_to(buf);

        let mut pos = 4;
        for ssrc in &self.ssrcs {
            write_u32(buf, pos, **ssrc);
            pos += 4;
        }

        if let Some(reason) = &self.reason {
            buf[pos] = reason.len() as u8;
            buf[pos + 1..pos + 1 + reason.len()].copy_from_slice(reason.as_bytes());
            // Zero bytes up to the 32-bit boundary; buffer is pre-zeroed.
            pos += pad_to_4(1 + reason.len());
        }

        pos
    }
}
