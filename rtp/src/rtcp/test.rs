use super::*;

fn sr(ssrc: u32) -> RtcpPacket {
    RtcpPacket::SenderReport(SenderReport {
        sender_info: SenderInfo {
            ssrc: ssrc.into(),
            ntp_time: 0x0001_0002_0003_0004,
            rtp_time: 90_000,
            sender_packet_count: 5,
            sender_octet_count: 6,
        },
        reports: vec![report(ssrc + 1)],
    })
}

fn rr(ssrc: u32) -> RtcpPacket {
    RtcpPacket::ReceiverReport(ReceiverReport {
        sender_ssrc: ssrc.into(),
        reports: vec![report(0xaaa)],
    })
}

fn report(ssrc: u32) -> ReceptionReport {
    ReceptionReport {
        ssrc: ssrc.into(),
        fraction_lost: 3,
        packets_lost: 1234,
        max_seq: 4000,
        jitter: 5,
        last_sr_time: 12,
        last_sr_delay: 1,
    }
}

fn sdes(ssrc: u32) -> RtcpPacket {
    RtcpPacket::Descriptions(Descriptions {
        chunks: vec![Sdes {
            ssrc: ssrc.into(),
            items: vec![(SdesType::CNAME, "abc@example".into())],
        }],
    })
}

#[test]
fn sender_report_round_trip() {
    let compound = vec![sr(1)];
    let buf = serialize_compound(&compound);

    assert_eq!(buf.len(), 4 + 24 + 24);
    assert_eq!(parse_compound(&buf).unwrap(), compound);
}

#[test]
fn receiver_report_round_trip() {
    let compound = vec![rr(2)];
    let buf = serialize_compound(&compound);

    assert_eq!(buf.len(), 8 + 24);
    assert_eq!(parse_compound(&buf).unwrap(), compound);
}

#[test]
fn sdes_round_trip() {
    let compound = vec![rr(2), sdes(7)];
    let buf = serialize_compound(&compound);

    assert_eq!(parse_compound(&buf).unwrap(), compound);
}

#[test]
fn bye_round_trip() {
    let bye = Goodbye {
        ssrcs: vec![0x1111.into(), 0x2222.into()],
        reason: Some("bye".into()),
    };

    let mut buf = vec![0_u8; bye.length_words() * 4];
    let n = bye.write_to(&mut buf);
    assert_eq!(n, 16);

    // 2 SSRCs + 1 length byte + 3 reason bytes after the common header,
    // so 4 words in total and a length field of 3.
    assert_eq!(
        buf,
        [
            0x82, 203, 0x00, 0x03, //
            0x00, 0x00, 0x11, 0x11, //
            0x00, 0x00, 0x22, 0x22, //
            3, b'b', b'y', b'e',
        ]
    );

    let back = parse_single(&buf).unwrap();
    assert_eq!(back, RtcpPacket::Goodbye(bye));
}

#[test]
fn bye_zero_ssrcs() {
    let bye = Goodbye {
        ssrcs: vec![],
        reason: None,
    };

    let mut buf = vec![0_u8; bye.length_words() * 4];
    let n = bye.write_to(&mut buf);
    assert_eq!(n, 4);

    let back = parse_single(&buf).unwrap();
    assert_eq!(back, RtcpPacket::Goodbye(bye));
}

#[test]
fn bye_long_reason() {
    let bye = Goodbye {
        ssrcs: vec![9.into()],
        reason: Some("x".repeat(255)),
    };

    let mut buf = vec![0_u8; bye.length_words() * 4];
    let n = bye.write_to(&mut buf);
    assert_eq!(n, 4 + 4 + 256);

    let back = parse_single(&buf).unwrap();
    assert_eq!(back, RtcpPacket::Goodbye(bye));
}

#[test]
fn compound_round_trip() {
    let compound = vec![
        sr(1),
        sdes(1),
        RtcpPacket::Goodbye(Goodbye {
            ssrcs: vec![1.into()],
            reason: None,
        }),
    ];

    let buf = serialize_compound(&compound);
    assert_eq!(parse_compound(&buf).unwrap(), compound);
    assert_eq!(serialize_compound(&parse_compound(&buf).unwrap()), buf);
}

#[test]
fn compound_must_start_with_report() {
    let bye = RtcpPacket::Goodbye(Goodbye {
        ssrcs: vec![1.into()],
        reason: None,
    });

    let buf = serialize_compound(&[bye.clone()]);
    assert!(parse_compound(&buf).is_none());

    // Single packet parsing has no such rule.
    assert_eq!(parse_single(&buf).unwrap(), bye);
}

#[test]
fn truncation_discards_whole_compound() {
    let buf = serialize_compound(&[rr(2), sdes(7)]);

    // Chop one byte off the tail: the announced SDES length no longer fits.
    assert!(parse_compound(&buf[..buf.len() - 1]).is_none());

    // A valid first packet is not exposed on its own.
    let mut long = buf.clone();
    long[2] = 0xff; // impossible length on the leading RR
    long[3] = 0xff;
    assert!(parse_compound(&long).is_none());
}

#[test]
fn truncated_sender_report() {
    let buf = serialize_compound(&[sr(1)]);

    // Announce one more report block than is present.
    let mut bad = buf.clone();
    bad[0] = 0x82;
    assert!(parse_compound(&bad).is_none());
}

#[test]
fn nack_entries() {
    let fb = RtpFeedback {
        fmt: TransportFeedbackType::Nack,
        sender_ssrc: 1.into(),
        media_ssrc: 0xaaa.into(),
        fci: vec![0x00, 100, 0b0000_0000, 0b0000_0101],
    };

    let nacks = fb.nacks();
    assert_eq!(nacks, vec![NackEntry { pid: 100, blp: 5 }]);

    let seqs: Vec<u16> = nacks[0].sequence_numbers().collect();
    assert_eq!(seqs, vec![100, 101, 103]);

    let mut buf = vec![0_u8; fb.length_words() * 4];
    fb.write_to(&mut buf);
    assert_eq!(parse_single(&buf).unwrap(), RtcpPacket::RtpFeedback(fb));
}

#[test]
fn pli_round_trip() {
    let fb = PsFeedback {
        fmt: PayloadFeedbackType::PictureLossIndication,
        sender_ssrc: 1.into(),
        media_ssrc: 0xaaa.into(),
        fci: vec![],
    };
    assert!(fb.is_pli());

    let mut buf = vec![0_u8; fb.length_words() * 4];
    let n = fb.write_to(&mut buf);
    assert_eq!(n, 12);

    assert_eq!(parse_single(&buf).unwrap(), RtcpPacket::PsFeedback(fb));
}

#[test]
fn sli_entries() {
    // first=2, number=3, picture_id=4
    let word: u32 = 2 << 19 | 3 << 6 | 4;

    let fb = PsFeedback {
        fmt: PayloadFeedbackType::SliceLossIndication,
        sender_ssrc: 1.into(),
        media_ssrc: 2.into(),
        fci: word.to_be_bytes().to_vec(),
    };

    assert_eq!(
        fb.slis(),
        vec![SliEntry {
            first: 2,
            number: 3,
            picture_id: 4
        }]
    );
}

#[test]
fn unknown_feedback_subtype_is_kept() {
    // FMT=9 is not a known payload specific feedback type.
    let buf = [
        0x89, 206, 0x00, 0x03, //
        0, 0, 0, 1, //
        0, 0, 0, 2, //
        0xde, 0xad, 0xbe, 0xef,
    ];

    let RtcpPacket::PsFeedback(fb) = parse_single(&buf).unwrap() else {
        panic!("expected payload specific feedback");
    };

    assert_eq!(fb.fmt, PayloadFeedbackType::Unknown(9));
    assert_eq!(fb.fci, [0xde, 0xad, 0xbe, 0xef]);
}
