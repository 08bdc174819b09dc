//! Value types for codec parameters, capabilities and per-stream RTP
//! parameters, plus the payload type negotiation done at room creation.
//!
//! These mirror the JSON the supervisor sends: camelCase fields, `muxId`,
//! `preferredPayloadType` and friends.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::RequestError;

/// Media kind of a codec or stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// A codec specific parameter value. The supervisor sends both strings and
/// numbers ("packetization-mode", "profile-level-id", "apt", ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    String(String),
    Number(u32),
}

/// One RTCP feedback token a codec supports, e.g. `nack pli` or `ccm fir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtcpFeedback {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub parameter: String,
}

/// A codec within a set of capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodec {
    pub kind: MediaKind,
    /// MIME type/subtype, e.g. `audio/opus` or `video/VP8`.
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_payload_type: Option<u8>,
    pub clock_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterValue>,
    #[serde(default)]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl RtpCodec {
    /// Whether this is a repair codec rather than a media codec.
    pub fn is_rtx(&self) -> bool {
        self.mime_type.to_ascii_lowercase().ends_with("/rtx")
    }

    fn is_fec(&self) -> bool {
        let lc = self.mime_type.to_ascii_lowercase();
        lc.ends_with("/red") || lc.ends_with("/ulpfec") || lc.ends_with("/flexfec")
    }

    /// Codecs match when MIME type (case insensitive) and clock rate agree.
    pub fn matches(&self, other: &RtpCodec) -> bool {
        self.mime_type.eq_ignore_ascii_case(&other.mime_type) && self.clock_rate == other.clock_rate
    }
}

/// Supported RTP header extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpHeaderExtension {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<MediaKind>,
    pub uri: String,
    pub preferred_id: u16,
}

/// What can be received at media level: codecs with assigned payload types,
/// header extensions and FEC mechanisms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    pub codecs: Vec<RtpCodec>,
    #[serde(default)]
    pub header_extensions: Vec<RtpHeaderExtension>,
    #[serde(default)]
    pub fec_mechanisms: Vec<String>,
}

impl RtpCapabilities {
    /// Find a codec by assigned payload type.
    pub fn codec_by_pt(&self, pt: u8) -> Option<&RtpCodec> {
        self.codecs
            .iter()
            .find(|c| c.preferred_payload_type == Some(pt))
    }

    pub fn find_matching(&self, codec: &RtpCodec) -> Option<&RtpCodec> {
        self.codecs.iter().find(|c| c.matches(codec))
    }

    /// Check that `self` is a subset of `of` by MIME type and clock rate.
    /// RTX entries are companions of whatever they repair and not compared.
    pub fn ensure_subset_of(&self, of: &RtpCapabilities) -> Result<(), RequestError> {
        for codec in self.codecs.iter().filter(|c| !c.is_rtx()) {
            if of.find_matching(codec).is_none() {
                return Err(RequestError::other(format!(
                    "codec not supported by the room: {}",
                    codec.mime_type
                )));
            }
        }
        Ok(())
    }
}

/// Codec entry in per-stream parameters: like [`RtpCodec`] but the payload
/// type is the one actually used on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecParameters {
    pub mime_type: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterValue>,
    #[serde(default)]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl RtpCodecParameters {
    pub fn is_rtx(&self) -> bool {
        self.mime_type.to_ascii_lowercase().ends_with("/rtx")
    }
}

/// RTX stream description inside an encoding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RtxParameters {
    pub ssrc: u32,
}

/// FEC stream description inside an encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FecParameters {
    pub ssrc: u32,
    #[serde(default)]
    pub mechanism: String,
}

/// One transmitted RTP stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpEncoding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssrc: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec_payload_type: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtx: Option<RtxParameters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fec: Option<FecParameters>,
}

/// Header extension mapping in per-stream parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtpHeaderExtensionParameters {
    pub uri: String,
    pub id: u16,
}

/// RTCP settings within the RTP parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcpParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cname: Option<String>,
    #[serde(default = "default_true")]
    pub reduced_size: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RtcpParameters {
    fn default() -> Self {
        RtcpParameters {
            cname: None,
            reduced_size: true,
        }
    }
}

/// Negotiated parameters of one media stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mux_id: Option<String>,
    pub codecs: Vec<RtpCodecParameters>,
    #[serde(default)]
    pub encodings: Vec<RtpEncoding>,
    #[serde(default)]
    pub header_extensions: Vec<RtpHeaderExtensionParameters>,
    #[serde(default)]
    pub rtcp: RtcpParameters,
}

impl RtpParameters {
    /// Validate against a set of capabilities: every codec must be present
    /// in the capabilities and every encoding must reference a payload type
    /// declared by the codec list.
    pub fn validate(&self, caps: &RtpCapabilities) -> Result<(), RequestError> {
        for codec in &self.codecs {
            if codec.is_rtx() {
                continue;
            }
            let found = caps.codecs.iter().any(|c| {
                c.mime_type.eq_ignore_ascii_case(&codec.mime_type)
                    && c.clock_rate == codec.clock_rate
            });
            if !found {
                return Err(RequestError::other(format!(
                    "codec not in capabilities: {}",
                    codec.mime_type
                )));
            }
        }

        for encoding in &self.encodings {
            if let Some(pt) = encoding.codec_payload_type {
                if !self.codecs.iter().any(|c| c.payload_type == pt) {
                    return Err(RequestError::other(format!(
                        "encoding references unknown codec payload type {}",
                        pt
                    )));
                }
            }
        }

        Ok(())
    }

    /// Whether a packet with this payload type belongs to the stream.
    pub fn has_payload_type(&self, pt: u8) -> bool {
        self.codecs.iter().any(|c| c.payload_type == pt)
    }

    /// All SSRCs announced by the encodings, media, RTX and FEC alike.
    pub fn ssrcs(&self) -> impl Iterator<Item = u32> + '_ {
        self.encodings.iter().flat_map(|e| {
            e.ssrc
                .into_iter()
                .chain(e.rtx.map(|r| r.ssrc))
                .chain(e.fec.as_ref().map(|f| f.ssrc))
        })
    }

    /// Translate these parameters for a subscribing peer: each codec is
    /// re-targeted at the payload type the subscriber numbered it with. The
    /// mapping is recorded on the sender; packets are not rewritten. `None`
    /// when the subscriber lacks a codec, making the stream unsendable.
    pub fn adapt_to(&self, caps: &RtpCapabilities) -> Option<RtpParameters> {
        let mut adapted = self.clone();

        for codec in adapted.codecs.iter_mut().filter(|c| !c.is_rtx()) {
            let target = caps.codecs.iter().find(|c| {
                c.mime_type.eq_ignore_ascii_case(&codec.mime_type)
                    && c.clock_rate == codec.clock_rate
            })?;
            codec.payload_type = target.preferred_payload_type?;
        }

        Some(adapted)
    }
}

/// Payload types usable for codec assignment: the RFC 3551 static audio and
/// video assignments plus the dynamic range.
const STATIC_PAYLOAD_TYPES: &[u8] = &[
    0, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 25, 26, 28, 31, 32, 33, 34,
];

const DYNAMIC_PAYLOAD_TYPES: std::ops::RangeInclusive<u8> = 96..=127;

/// Header extensions the worker understands, attached to every room's
/// capabilities.
pub static SUPPORTED_HEADER_EXTENSIONS: Lazy<Vec<RtpHeaderExtension>> = Lazy::new(|| {
    vec![
        RtpHeaderExtension {
            kind: Some(MediaKind::Audio),
            uri: "urn:ietf:params:rtp-hdrext:ssrc-audio-level".into(),
            preferred_id: 1,
        },
        RtpHeaderExtension {
            kind: None,
            uri: "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time".into(),
            preferred_id: 3,
        },
    ]
});

/// Per room payload type allocator, initialized from the shared constant
/// pool above. Every type is handed out at most once.
#[derive(Debug, Clone)]
pub struct PtPool {
    taken: [bool; 128],
}

impl PtPool {
    pub fn new() -> Self {
        PtPool {
            taken: [false; 128],
        }
    }

    fn is_usable(pt: u8) -> bool {
        pt < 128 && (STATIC_PAYLOAD_TYPES.contains(&pt) || DYNAMIC_PAYLOAD_TYPES.contains(&pt))
    }

    /// Reserve an explicitly requested payload type.
    pub fn reserve(&mut self, pt: u8) -> Result<(), RequestError> {
        if !Self::is_usable(pt) {
            return Err(RequestError::other(format!(
                "cannot assign payload type {}",
                pt
            )));
        }
        if self.taken[pt as usize] {
            return Err(RequestError::other(format!(
                "payload type {} already in use",
                pt
            )));
        }
        self.taken[pt as usize] = true;
        Ok(())
    }

    /// Allocate the lowest unused dynamic payload type.
    pub fn allocate_dynamic(&mut self) -> Option<u8> {
        let pt = DYNAMIC_PAYLOAD_TYPES.into_iter().find(|pt| !self.taken[*pt as usize])?;
        self.taken[pt as usize] = true;
        Some(pt)
    }

    /// Take `pt` if it is still free. Used for RTX companions, which are
    /// skipped rather than failed when the slot is gone.
    pub fn try_take(&mut self, pt: u8) -> bool {
        if !Self::is_usable(pt) || self.taken[pt as usize] {
            return false;
        }
        self.taken[pt as usize] = true;
        true
    }
}

impl Default for PtPool {
    fn default() -> Self {
        PtPool::new()
    }
}

/// Compute effective room capabilities from the supervisor supplied media
/// codec list: assign payload types and fabricate RTX companions.
pub fn negotiate_capabilities(
    media_codecs: Vec<RtpCodec>,
) -> Result<RtpCapabilities, RequestError> {
    let mut pool = PtPool::new();
    let mut codecs = Vec::with_capacity(media_codecs.len() * 2);

    for mut codec in media_codecs {
        let pt = match codec.preferred_payload_type {
            Some(pt) => {
                pool.reserve(pt)?;
                pt
            }
            None => pool
                .allocate_dynamic()
                .ok_or_else(|| RequestError::other("no available dynamic payload types"))?,
        };
        codec.preferred_payload_type = Some(pt);

        let wants_rtx = !codec.is_rtx() && !codec.is_fec();
        let kind = codec.kind;
        let clock_rate = codec.clock_rate;

        codecs.push(codec);

        if wants_rtx && pt < 127 && pool.try_take(pt + 1) {
            let mime_type = match kind {
                MediaKind::Audio => "audio/rtx",
                MediaKind::Video => "video/rtx",
            };
            let mut parameters = BTreeMap::new();
            parameters.insert("apt".to_string(), ParameterValue::Number(pt as u32));

            codecs.push(RtpCodec {
                kind,
                mime_type: mime_type.into(),
                preferred_payload_type: Some(pt + 1),
                clock_rate,
                channels: None,
                parameters,
                rtcp_feedback: Vec::new(),
            });
        }
    }

    Ok(RtpCapabilities {
        codecs,
        header_extensions: SUPPORTED_HEADER_EXTENSIONS.clone(),
        fec_mechanisms: Vec::new(),
    })
}
