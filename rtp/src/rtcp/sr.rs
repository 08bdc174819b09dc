use crate::bytes::{read_u32, write_u32};
use crate::Ssrc;

use super::rr::{ReceptionReport, REPORT_LEN};
use super::{FeedbackMessageType, RtcpHeader, RtcpType};

/// Sender Report (PT=200): sender info followed by reception report blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderReport {
    pub sender_info: SenderInfo,
    pub reports: Vec<ReceptionReport>,
}

/// The fixed 24 byte sender info section of a sender report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderInfo {
    pub ssrc: Ssrc,
    /// NTP timestamp, 64 bit fixed point.
    pub ntp_time: u64,
    /// The same instant in the media clock.
    pub rtp_time: u32,
    pub sender_packet_count: u32,
    pub sender_octet_count: u32,
}

impl SenderReport {
    pub(crate) fn parse(header: &RtcpHeader, buf: &[u8]) -> Option<SenderReport> {
        let count = header.fmt.count() as usize;

        if buf.len() < 24 + count * REPORT_LEN {
            warn!("Truncated sender report, packet discarded");
            return None;
        }

        let sender_info = SenderInfo {
            ssrc: read_u32(buf, 0).into(),
            ntp_time: (read_u32(buf, 4) as u64) << 32 | read_u32(buf, 8) as u64,
            rtp_time: read_u32(buf, 12),
            sender_packet_count: read_u32(buf, 16),
            sender_octet_count: read_u32(buf, 20),
        };

        let reports = (0..count)
            .map(|i| ReceptionReport::parse(&buf[24 + i * REPORT_LEN..]))
            .collect();

        Some(SenderReport {
            sender_info,
            reports,
        })
    }

    pub(crate) fn header(&self) -> RtcpHeader {
        RtcpHeader {
            has_padding: false,
            fmt: FeedbackMessageType::ReceptionReport(self.reports.len() as u8),
            rtcp_type: RtcpType::SenderReport,
            length: self.length_words() * 4,
        }
    }

    pub(crate) fn length_words(&self) -> usize {
        // header + sender info + 6 words per report
        1 + 6 + 6 * self.reports.len()
    }

    pub(crate) fn write_to(&self, buf: &mut [u8]) -> usize {
        self.header().write_to(buf);

        let si = &self.sender_info;
        write_u32(buf, 4, *si.ssrc);
        write_u32(buf, 8, (si.ntp_time >> 32) as u32);
        write_u32(buf, 12, si.ntp_time as u32);
        write_u32(buf, 16, si.rtp_time);
        write_u32(buf, 20, si.sender_packet_count);
        write_u32(buf, 24, si.sender_octet_count);

        let mut pos = 28;
        for report in &self.reports {
            report.write_to(&mut buf[pos..]);
            pos += REPORT_LEN;
        }

        pos
    }
}
