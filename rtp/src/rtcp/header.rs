use crate::bytes::{read_u16, write_u16};

/// Common header shared by all RTCP packet kinds: version, padding bit, a
/// 5 bit count whose meaning depends on the packet type, the packet type and
/// the length in 32-bit words minus one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcpHeader {
    pub has_padding: bool,
    pub fmt: FeedbackMessageType,
    pub rtcp_type: RtcpType,
    /// Total packet length in bytes, including this header and any padding.
    pub length: usize,
}

/// Interpretation of the 5 bit count field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackMessageType {
    /// For SenderReport and ReceiverReport: number of report blocks.
    ReceptionReport(u8),
    /// For SourceDescription and Goodbye: number of chunks/sources.
    SourceCount(u8),
    /// For ApplicationDefined: application subtype.
    Subtype(u8),
    /// For TransportLayerFeedback: the feedback message type.
    TransportFeedback(TransportFeedbackType),
    /// For PayloadSpecificFeedback: the feedback message type.
    PayloadFeedback(PayloadFeedbackType),
    /// For ExtendedReport.
    NotUsed,
}

impl FeedbackMessageType {
    pub fn count(&self) -> u8 {
        match self {
            FeedbackMessageType::ReceptionReport(v) => *v,
            FeedbackMessageType::SourceCount(v) => *v,
            _ => panic!("Not a count"),
        }
    }

    pub fn as_u8(&self) -> u8 {
        use FeedbackMessageType::*;
        match self {
            ReceptionReport(v) | SourceCount(v) | Subtype(v) => {
                assert!(*v <= 31, "rtcp count must be <= 31");
                *v
            }
            TransportFeedback(v) => v.as_u8(),
            PayloadFeedback(v) => v.as_u8(),
            NotUsed => 0,
        }
    }
}

/// RTP feedback message types (PT=205), RFC 4585 section 6.2.
///
/// Unknown types are carried through rather than rejected so the payload can
/// still be logged and forwarded as an opaque message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFeedbackType {
    Nack,
    TransportWide,
    Unknown(u8),
}

impl TransportFeedbackType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => TransportFeedbackType::Nack,
            15 => TransportFeedbackType::TransportWide,
            _ => {
                trace!("Unknown TransportLayerFeedback type: {}", v);
                TransportFeedbackType::Unknown(v)
            }
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            TransportFeedbackType::Nack => 1,
            TransportFeedbackType::TransportWide => 15,
            TransportFeedbackType::Unknown(v) => *v,
        }
    }
}

/// Payload specific feedback message types (PT=206), RFC 4585 section 6.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFeedbackType {
    PictureLossIndication,
    SliceLossIndication,
    ReferencePictureSelectionIndication,
    FullIntraRequest,
    ApplicationLayer,
    Unknown(u8),
}

impl PayloadFeedbackType {
    pub fn from_u8(v: u8) -> Self {
        use PayloadFeedbackType::*;
        match v {
            1 => PictureLossIndication,
            2 => SliceLossIndication,
            3 => ReferencePictureSelectionIndication,
            4 => FullIntraRequest,
            15 => ApplicationLayer,
            _ => {
                trace!("Unknown PayloadSpecificFeedback type: {}", v);
                Unknown(v)
            }
        }
    }

    pub fn as_u8(&self) -> u8 {
        use PayloadFeedbackType::*;
        match self {
            PictureLossIndication => 1,
            SliceLossIndication => 2,
            ReferencePictureSelectionIndication => 3,
            FullIntraRequest => 4,
            ApplicationLayer => 15,
            Unknown(v) => *v,
        }
    }
}

/// Kind of RTCP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtcpType {
    /// RTCP_PT_SR
    SenderReport = 200,
    /// RTCP_PT_RR
    ReceiverReport = 201,
    /// RTCP_PT_SDES
    SourceDescription = 202,
    /// RTCP_PT_BYE
    Goodbye = 203,
    /// RTCP_PT_APP
    ApplicationDefined = 204,
    /// RTCP_PT_RTPFB, RFC 4585
    TransportLayerFeedback = 205,
    /// RTCP_PT_PSFB, RFC 4585
    PayloadSpecificFeedback = 206,
    /// RTCP_PT_XR
    ExtendedReport = 207,
}

impl RtcpType {
    fn from_u8(v: u8) -> Option<Self> {
        use RtcpType::*;
        match v {
            200 => Some(SenderReport),
            201 => Some(ReceiverReport),
            202 => Some(SourceDescription),
            203 => Some(Goodbye),
            204 => Some(ApplicationDefined),
            205 => Some(TransportLayerFeedback),
            206 => Some(PayloadSpecificFeedback),
            207 => Some(ExtendedReport),
            _ => {
                trace!("Unknown RTCP type: {}", v);
                None
            }
        }
    }
}

impl RtcpHeader {
    /// Parse the 4 byte common header. `None` means the datagram cannot be
    /// RTCP and the whole thing is discarded by the caller.
    pub fn parse(buf: &[u8]) -> Option<RtcpHeader> {
        use RtcpType::*;

        if buf.len() < 4 {
            trace!("RTCP header too short < 4: {}", buf.len());
            return None;
        }

        let version = buf[0] >> 6;
        if version != 2 {
            trace!("RTCP version is not 2");
            return None;
        }
        let has_padding = buf[0] & 0b0010_0000 > 0;

        let fmt_n = buf[0] & 0b0001_1111;
        let rtcp_type = RtcpType::from_u8(buf[1])?;
        let fmt = match rtcp_type {
            SenderReport | ReceiverReport => FeedbackMessageType::ReceptionReport(fmt_n),
            SourceDescription | Goodbye => FeedbackMessageType::SourceCount(fmt_n),
            ApplicationDefined => FeedbackMessageType::Subtype(fmt_n),
            TransportLayerFeedback => {
                FeedbackMessageType::TransportFeedback(TransportFeedbackType::from_u8(fmt_n))
            }
            PayloadSpecificFeedback => {
                FeedbackMessageType::PayloadFeedback(PayloadFeedbackType::from_u8(fmt_n))
            }
            ExtendedReport => FeedbackMessageType::NotUsed,
        };

        // https://tools.ietf.org/html/rfc3550#section-6.4.1
        //   The length of this RTCP packet in 32-bit words minus one,
        //   including the header and any padding.
        let length = (read_u16(buf, 2) as usize + 1) * 4;

        Some(RtcpHeader {
            has_padding,
            fmt,
            rtcp_type,
            length,
        })
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        assert!(self.length % 4 == 0, "RTCP length must be a multiple of 4");

        buf[0] = 2 << 6 | if self.has_padding { 1 << 5 } else { 0 } | self.fmt.as_u8();
        buf[1] = self.rtcp_type as u8;
        write_u16(&mut buf[..], 2, (self.length / 4 - 1) as u16);
    }
}
