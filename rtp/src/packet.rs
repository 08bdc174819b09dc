use crate::bytes::{pad_to_4, read_u16, read_u32, write_u16, write_u32};
use crate::{Pt, SeqNo, Ssrc};

/// One RTP header extension as announced by the extension bit. The value
/// borrows from the same buffer as the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpExtension<'a> {
    /// Profile identifier, e.g. 0xbede for one-byte extensions.
    pub profile: u16,
    /// Extension value. Always a multiple of 4 bytes on the wire.
    pub value: &'a [u8],
}

/// A parsed RTP packet.
///
/// This is a non-owning view over the buffer it was parsed from and is only
/// valid as long as that buffer is. Header fields are mutable on the view;
/// [`RtpPacket::serialize`] lays the mutated packet out into an owned buffer,
/// [`RtpPacket::clone_to`] relocates the view into a caller supplied buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpPacket<'a> {
    marker: bool,
    payload_type: Pt,
    sequence_number: u16,
    timestamp: u32,
    ssrc: Ssrc,
    csrc: [u32; 15],
    csrc_count: u8,
    extension: Option<RtpExtension<'a>>,
    payload: &'a [u8],
    padding: u8,
    raw: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    /// Parse a single RTP packet. Returns `None` for anything that is not
    /// valid version 2 RTP; the caller drops the packet and carries on.
    pub fn parse(buf: &'a [u8]) -> Option<RtpPacket<'a>> {
        if buf.len() < 12 {
            trace!("Packet too short to be RTP: {}", buf.len());
            return None;
        }

        let version = buf[0] >> 6;
        if version != 2 {
            trace!("RTP version is not 2");
            return None;
        }

        let has_padding = buf[0] & 0b0010_0000 > 0;
        let has_extension = buf[0] & 0b0001_0000 > 0;
        let csrc_count = buf[0] & 0b0000_1111;
        let marker = buf[1] & 0b1000_0000 > 0;
        let payload_type = (buf[1] & 0b0111_1111).into();
        let sequence_number = read_u16(buf, 2);
        let timestamp = read_u32(buf, 4);
        let ssrc: Ssrc = read_u32(buf, 8).into();

        let mut pos = 12;

        let csrc_len = csrc_count as usize * 4;
        if buf.len() < pos + csrc_len {
            warn!("Not enough space for the announced CSRC list, packet discarded");
            return None;
        }
        let mut csrc = [0_u32; 15];
        for (i, c) in csrc.iter_mut().enumerate().take(csrc_count as usize) {
            *c = read_u32(buf, pos + i * 4);
        }
        pos += csrc_len;

        let extension = if has_extension {
            if buf.len() < pos + 4 {
                warn!("Not enough space for the announced extension header, packet discarded");
                return None;
            }
            let profile = read_u16(buf, pos);
            // The length field counts 32-bit words, excluding the four
            // octet extension header itself.
            let value_len = read_u16(buf, pos + 2) as usize * 4;
            if buf.len() < pos + 4 + value_len {
                warn!("Not enough space for the announced extension value, packet discarded");
                return None;
            }
            let value = &buf[pos + 4..pos + 4 + value_len];
            pos += 4 + value_len;
            Some(RtpExtension { profile, value })
        } else {
            None
        };

        let mut payload_len = buf.len() - pos;
        let mut padding = 0;

        if has_padding {
            if payload_len == 0 {
                warn!("Padding bit is set but no space for a padding byte, packet discarded");
                return None;
            }
            padding = buf[buf.len() - 1];
            if padding == 0 {
                warn!("Padding byte cannot be 0, packet discarded");
                return None;
            }
            if payload_len < padding as usize {
                warn!("Number of padding octets is greater than available space for payload, packet discarded");
                return None;
            }
            payload_len -= padding as usize;
        }

        let payload = &buf[pos..pos + payload_len];

        Some(RtpPacket {
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            csrc_count,
            extension,
            payload,
            padding,
            raw: buf,
        })
    }

    pub fn marker(&self) -> bool {
        self.marker
    }

    pub fn payload_type(&self) -> Pt {
        self.payload_type
    }

    pub fn sequence_number(&self) -> u16 {
        self.sequence_number
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn ssrc(&self) -> Ssrc {
        self.ssrc
    }

    pub fn csrc(&self) -> &[u32] {
        &self.csrc[..self.csrc_count as usize]
    }

    pub fn extension(&self) -> Option<RtpExtension<'a>> {
        self.extension
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    pub fn padding(&self) -> u8 {
        self.padding
    }

    /// Total packet length: header + CSRC list + extension + payload + padding.
    pub fn len(&self) -> usize {
        12 + self.csrc_count as usize * 4
            + self.extension.map(|e| 4 + e.value.len()).unwrap_or(0)
            + self.payload.len()
            + self.padding as usize
    }

    /// The bytes this view was parsed from. Stale with respect to any field
    /// mutations made since parsing.
    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    pub fn set_marker(&mut self, v: bool) {
        self.marker = v;
    }

    pub fn set_payload_type(&mut self, v: Pt) {
        self.payload_type = v;
    }

    pub fn set_sequence_number(&mut self, v: u16) {
        self.sequence_number = v;
    }

    pub fn set_timestamp(&mut self, v: u32) {
        self.timestamp = v;
    }

    pub fn set_ssrc(&mut self, v: Ssrc) {
        self.ssrc = v;
    }

    /// Lay the packet out into a single owned contiguous buffer: header,
    /// CSRC list, extension, payload, then zero padding with the padding
    /// length in the last byte.
    pub fn serialize(&self) -> Vec<u8> {
        let ext_value_len = self.extension.map(|e| pad_to_4(e.value.len())).unwrap_or(0);
        let ext_len = self.extension.map(|_| 4 + ext_value_len).unwrap_or(0);
        let csrc_len = self.csrc_count as usize * 4;
        let total = 12 + csrc_len + ext_len + self.payload.len() + self.padding as usize;

        let mut buf = vec![0_u8; total];

        buf[0] = 2 << 6
            | if self.padding > 0 { 1 << 5 } else { 0 }
            | if self.extension.is_some() { 1 << 4 } else { 0 }
            | self.csrc_count;
        buf[1] = *self.payload_type & 0b0111_1111 | if self.marker { 1 << 7 } else { 0 };
        write_u16(&mut buf, 2, self.sequence_number);
        write_u32(&mut buf, 4, self.timestamp);
        write_u32(&mut buf, 8, *self.ssrc);

        let mut pos = 12;

        for i in 0..self.csrc_count as usize {
            write_u32(&mut buf, pos, self.csrc[i]);
            pos += 4;
        }

        if let Some(ext) = &self.extension {
            write_u16(&mut buf, pos, ext.profile);
            write_u16(&mut buf, pos + 2, (ext_value_len / 4) as u16);
            buf[pos + 4..pos + 4 + ext.value.len()].copy_from_slice(ext.value);
            pos += 4 + ext_value_len;
        }

        buf[pos..pos + self.payload.len()].copy_from_slice(self.payload);
        pos += self.payload.len();

        if self.padding > 0 {
            pos += self.padding as usize;
            buf[pos - 1] = self.padding;
        }

        debug_assert_eq!(pos, total);

        buf
    }

    /// Copy the packet into `dst` and return a new view over it with all
    /// interior slices relocated. One memcpy plus pointer fixup. `dst` must
    /// hold at least [`RtpPacket::len`] bytes.
    pub fn clone_to<'b>(&self, dst: &'b mut [u8]) -> RtpPacket<'b> {
        let raw = self.raw;
        dst[..raw.len()].copy_from_slice(raw);

        let mut pos = 12 + self.csrc_count as usize * 4;

        let extension = if let Some(e) = self.extension {
            let value = &dst[pos + 4..pos + 4 + e.value.len()];
            pos += 4 + e.value.len();
            Some(RtpExtension {
                profile: e.profile,
                value,
            })
        } else {
            None
        };

        let payload = &dst[pos..pos + self.payload.len()];

        RtpPacket {
            marker: self.marker,
            payload_type: self.payload_type,
            sequence_number: self.sequence_number,
            timestamp: self.timestamp,
            ssrc: self.ssrc,
            csrc: self.csrc,
            csrc_count: self.csrc_count,
            extension,
            payload,
            padding: self.padding,
            raw: &dst[..raw.len()],
        }
    }
}

/// "Extend" a 16 bit sequence number into 64 bits using the previously
/// extended number to detect wrap-arounds (RFC 3711 appendix A).
pub fn extend_seq(prev: Option<SeqNo>, seq: u16) -> SeqNo {
    let seq = seq as u64;

    let Some(prev) = prev else {
        return seq.into();
    };

    let roc = *prev >> 16;
    let prev_seq = *prev & 0xffff;

    let roc = if prev_seq < 32_768 {
        if seq > 32_768 + prev_seq {
            roc.wrapping_sub(1) & 0xffff_ffff
        } else {
            roc
        }
    } else if prev_seq > seq + 32_768 {
        (roc + 1) & 0xffff_ffff
    } else {
        roc
    };

    (roc * 65_536 + seq).into()
}
