use std::io;

use thiserror::Error;

/// Why a control request was rejected. The display string goes verbatim into
/// the `reason` field of the response.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("method not found")]
    MethodNotFound,

    #[error("not implemented")]
    NotImplemented,

    #[error("internal error")]
    Internal,

    #[error("{0}")]
    Other(String),
}

impl RequestError {
    pub fn other(reason: impl Into<String>) -> Self {
        RequestError::Other(reason.into())
    }
}

/// Errors on the supervisor channel. All of these are fatal for the worker;
/// packet level problems never surface here.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("channel frame of {0} bytes exceeds the buffer")]
    FrameTooBig(usize),

    #[error("invalid channel frame")]
    BadFrame,
}
