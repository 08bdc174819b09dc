use std::str::from_utf8;

use crate::bytes::{pad_to_4, read_u32, write_u32};
use crate::Ssrc;

use super::{FeedbackMessageType, RtcpHeader, RtcpType};

/// Source Description (PT=202): one chunk per source, each chunk a list of
/// TLV items terminated by a zero type and padded to a 32-bit boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptions {
    pub chunks: Vec<Sdes>,
}

/// One SDES chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sdes {
    pub ssrc: Ssrc,
    pub items: Vec<(SdesType, String)>,
}

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdesType {
    /// End of SDES item list.
    END = 0,
    /// Canonical name.
    CNAME = 1,
    /// User name.
    NAME = 2,
    /// User's electronic mail address.
    EMAIL = 3,
    /// User's phone number.
    PHONE = 4,
    /// Geographic user location.
    LOC = 5,
    /// Name of application or tool.
    TOOL = 6,
    /// Notice about the source.
    NOTE = 7,
    /// Private extensions.
    PRIV = 8,
    /// Who knows.
    Unknown,
}

impl From<u8> for SdesType {
    fn from(v: u8) -> Self {
        use SdesType::*;
        match v {
            0 => END,
            1 => CNAME,
            2 => NAME,
            3 => EMAIL,
            4 => PHONE,
            5 => LOC,
            6 => TOOL,
            7 => NOTE,
            8 => PRIV,
            _ => Unknown,
        }
    }
}

impl Descriptions {
    pub(crate) fn parse(header: &RtcpHeader, buf: &[u8]) -> Option<Descriptions> {
        let count = header.fmt.count() as usize;

        let mut chunks = Vec::with_capacity(count);
        let mut offset = 0;

        for _ in 0..count {
            if buf.len() < offset + 4 {
                warn!("Truncated SDES chunk, packet discarded");
                return None;
            }

            let chunk_start = offset;
            let ssrc = read_u32(buf, offset).into();
            offset += 4;

            let mut items = Vec::new();

            loop {
                if buf.len() < offset + 1 {
                    warn!("SDES chunk without terminating zero, packet discarded");
                    return None;
                }

                let sdes_type = SdesType::from(buf[offset]);
                offset += 1;

                if sdes_type == SdesType::END {
                    break;
                }

                if buf.len() < offset + 1 {
                    warn!("Truncated SDES item, packet discarded");
                    return None;
                }
                let len = buf[offset] as usize;
                offset += 1;

                if buf.len() < offset + len {
                    warn!("SDES item length exceeds chunk, packet discarded");
                    return None;
                }
                let Ok(text) = from_utf8(&buf[offset..offset + len]) else {
                    warn!("SDES item is not valid utf-8, packet discarded");
                    return None;
                };
                offset += len;

                items.push((sdes_type, text.to_string()));
            }

            // The chunk, terminator included, is padded with zeros to the
            // next 32-bit boundary.
            offset = chunk_start + pad_to_4(offset - chunk_start);
            if buf.len() < offset {
                warn!("SDES chunk padding exceeds packet, packet discarded");
                return None;
            }

            chunks.push(Sdes { ssrc, items });
        }

        Some(Descriptions { chunks })
    }

    pub(crate) fn header(&self) -> RtcpHeader {
        RtcpHeader {
            has_padding: false,
            fmt: FeedbackMessageType::SourceCount(self.chunks.len() as u8),
            rtcp_type: RtcpType::SourceDescription,
            length: self.length_words() * 4,
        }
    }

    pub(crate) fn length_words(&self) -> usize {
        1 + self.chunks.iter().map(|c| c.word_size()).sum::<usize>()
    }

    pub(crate) fn write_to(&self, buf: &mut [u8]) -> usize {
        self.header().write_to(buf);

        let mut pos = 4;
        for chunk in &self.chunks {
            let chunk_start = pos;

            write_u32(buf, pos, *chunk.ssrc);
            pos += 4;

            for (t, text) in &chunk.items {
                buf[pos] = *t as u8;
                buf[pos + 1] = text.len() as u8;
                buf[pos + 2..pos + 2 + text.len()].copy_from_slice(text.as_bytes());
                pos += 2 + text.len();
            }

            // Terminator, then zeros to the 32-bit boundary. The buffer is
            // zeroed by the caller so just move past them.
            buf[pos] = SdesType::END as u8;
            pos += 1;
            pos = chunk_start + pad_to_4(pos - chunk_start);
        }

        pos
    }
}

impl Sdes {
    fn word_size(&self) -> usize {
        let bytes = 4
            + self
                .items
                .iter()
                // 2 bytes for type + length, then the value.
                .map(|(_, s)| 2 + s.len())
                .sum::<usize>()
            // terminating zero
            + 1;

        pad_to_4(bytes) / 4
    }
}
