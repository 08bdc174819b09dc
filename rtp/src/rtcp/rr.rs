use crate::bytes::{read_u24, read_u32, write_u24, write_u32};
use crate::Ssrc;

use super::{FeedbackMessageType, RtcpHeader, RtcpType};

/// Size of one reception report block.
pub(crate) const REPORT_LEN: usize = 24;

/// Receiver Report (PT=201): the reporting source plus reception report
/// blocks, one per reported stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverReport {
    pub sender_ssrc: Ssrc,
    pub reports: Vec<ReceptionReport>,
}

/// One 24 byte reception report block as found in both SR and RR.
///
/// https://www.rfc-editor.org/rfc/rfc3550#section-6.4.2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceptionReport {
    pub ssrc: Ssrc,
    pub fraction_lost: u8,
    /// Cumulative packets lost, 24 bit.
    pub packets_lost: u32,
    pub max_seq: u32,
    pub jitter: u32,
    pub last_sr_time: u32,
    pub last_sr_delay: u32,
}

impl ReceptionReport {
    pub(crate) fn parse(buf: &[u8]) -> Self {
        ReceptionReport {
            ssrc: read_u32(buf, 0).into(),
            fraction_lost: buf[4],
            packets_lost: read_u24(buf, 5),
            max_seq: read_u32(buf, 8),
            jitter: read_u32(buf, 12),
            last_sr_time: read_u32(buf, 16),
            last_sr_delay: read_u32(buf, 20),
        }
    }

    pub(crate) fn write_to(&self, buf: &mut [u8]) {
        write_u32(buf, 0, *self.ssrc);
        buf[4] = self.fraction_lost;
        write_u24(buf, 5, self.packets_lost);
        write_u32(buf, 8, self.max_seq);
        write_u32(buf, 12, self.jitter);
        write_u32(buf, 16, self.last_sr_time);
        write_u32(buf, 20, self.last_sr_delay);
    }
}

impl ReceiverReport {
    pub(crate) fn parse(header: &RtcpHeader, buf: &[u8]) -> Option<ReceiverReport> {
        let count = header.fmt.count() as usize;

        if buf.len() < 4 + count * REPORT_LEN {
            warn!("Truncated receiver report, packet discarded");
            return None;
        }

        let sender_ssrc = read_u32(buf, 0).into();

        let reports = (0..count)
            .map(|i| ReceptionReport::parse(&buf[4 + i * REPORT_LEN..]))
            .collect();

        Some(ReceiverReport {
            sender_ssrc,
            reports,
        })
    }

    pub(crate) fn header(&self) -> RtcpHeader {
        RtcpHeader {
            has_padding: false,
            fmt: FeedbackMessageType::ReceptionReport(self.reports.len() as u8),
            rtcp_type: RtcpType::ReceiverReport,
            length: self.length_words() * 4,
        }
    }

    pub(crate) fn length_words(&self) -> usize {
        // header + sender ssrc + 6 words per report
        2 + 6 * self.reports.len()
    }

    pub(crate) fn write_to(&self, buf: &mut [u8]) -> usize {
        self.header().write_to(buf);
        write_u32(buf, 4, *self.sender_ssrc);

        let mut pos = 8;
        for report in &self.reports {
            report.write_to(&mut buf[pos..]);
            pos += REPORT_LEN;
        }

        pos
    }
}
