use std::fmt;
use std::ops::Deref;

/// Synchronization source. 32 bit stream identifier carried in every RTP
/// packet and most RTCP packet kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ssrc(u32);

impl Deref for Ssrc {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<u32> for Ssrc {
    fn from(v: u32) -> Self {
        Ssrc(v)
    }
}

impl fmt::Display for Ssrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// RTP payload type, 0-127.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pt(u8);

impl Deref for Pt {
    type Target = u8;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<u8> for Pt {
    fn from(v: u8) -> Self {
        Pt(v)
    }
}

impl fmt::Display for Pt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// RTP sequence number extended to 64 bit to track wrap-arounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SeqNo(u64);

impl SeqNo {
    /// The 16 bit number as it appears on the wire.
    pub fn as_u16(&self) -> u16 {
        (self.0 & 0xffff) as u16
    }
}

impl Deref for SeqNo {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<u64> for SeqNo {
    fn from(v: u64) -> Self {
        SeqNo(v)
    }
}
